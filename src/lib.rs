//! Warden - Fixed-Window Admission Control
//!
//! This crate implements a request admission layer for HTTP services. Each
//! request is counted against a fixed-window counter keyed by its API
//! credential or remote address; requests over the limit are rejected with
//! `429 Too Many Requests`. Counters live in Redis with an in-memory store
//! taking over when Redis fails.

pub mod config;
pub mod error;
pub mod http;
pub mod ratelimit;
