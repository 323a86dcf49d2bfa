//! HTTP surface: the admission middleware, the protected router and the
//! admin API.

mod admin;
mod middleware;
mod server;

pub use admin::admin_router;
pub use middleware::{too_many_requests, Admission, AdmissionLayer, AdmissionService, REJECTION_BODY};
pub use server::{protected_router, HttpServer};
