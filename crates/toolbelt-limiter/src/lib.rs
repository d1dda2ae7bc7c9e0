//! # Toolbelt Limiter
//!
//! Fixed-window rate limiting for the Toolbelt gateway.
//!
//! Counters live behind the [`CounterStore`] trait. The in-process
//! [`MemoryStore`] always exists; a shared [`RestStore`] can be layered on
//! top, in which case any remote failure degrades to the local store for
//! that call instead of surfacing an error.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod clock;
pub mod limiter;
pub mod rest;
pub mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use limiter::{FixedWindowLimiter, RateLimitConfig, RateLimitResult};
pub use rest::RestStore;
pub use store::{CounterStore, MemoryStore, StoreError, WindowRecord};
