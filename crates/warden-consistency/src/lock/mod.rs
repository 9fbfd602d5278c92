//! Distributed master lock
//!
//! This module provides:
//! - Lock configuration and the per-process ownership stub
//! - The acquisition transaction and its disambiguation rule
//! - Background lease keep-alive with a health channel
//! - The lock handle that ties them together

mod handle;
mod keeper;
mod model;
pub mod protocol;

pub use handle::DistributedLock;
pub use model::*;
pub use protocol::AcquireOutcome;
