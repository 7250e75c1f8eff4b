//! Portico work queue: a deduplicating, rate-limited queue of keys.
//!
//! A key is either *pending* (waiting to be handed out), *processing*
//! (handed out by [`WorkQueue::get`] and not yet [`WorkQueue::done`]), or
//! both. A key added while processing is parked as pending and only
//! redelivered once the current holder calls `done`, so one key is never
//! worked on by two workers at once.

#![forbid(unsafe_code)]

mod delay;
pub mod limiter;
mod queue;

pub use limiter::{default_controller_limiter, ItemExponential, MaxOf, RateLimiter, TokenBucket};
pub use queue::{Lease, WorkQueue};
