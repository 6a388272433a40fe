//! Sentinel Limiter - Distributed Rate Limiting Engine
//!
//! This crate decides in real time whether a request to a (service, endpoint)
//! pair is admitted. Limits are published into a store shared by every
//! instance of the calling service, and one of four algorithms (fixed window,
//! sliding window, token bucket, leaky bucket) is evaluated against it.

pub mod clock;
pub mod config;
pub mod error;
pub mod ratelimit;
pub mod store;
