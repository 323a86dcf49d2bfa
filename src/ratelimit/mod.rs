//! Rate limiting logic and counter storage.

mod backend;
mod counter;
mod distributed;
mod failover;
mod limiter;
mod memory;
mod rules;
mod scope;

pub use backend::CounterStore;
pub use distributed::{RedisStore, RedisStoreConfig};
pub use failover::{Backend, Failover, FailoverStatus};
pub use limiter::RateLimiter;
pub use memory::{spawn_sweeper, MemoryStore};
pub use rules::{LimitRule, RateLimitRules};
pub use scope::{Scope, ScopeSelector};
