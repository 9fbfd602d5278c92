//! Warden Consistency - master election over a coordination store
//!
//! This crate provides:
//! - The coordination store contract (leases, CAS transactions, creation revisions)
//! - An in-process linearizable store and an endpoint connector for it
//! - The distributed master lock: one CAS transaction per attempt plus the
//!   ownership disambiguation rule, with lease keep-alive in the background
//! - Metric descriptions for acquisition outcomes and lease renewal
//!
//! # Example
//!
//! ```ignore
//! use warden_consistency::{DistributedLock, LockOptions};
//!
//! let config = LockOptions::new("/warden/master/scheduler")
//!     .ttl_secs(10)
//!     .endpoint("memory://default")
//!     .on_acquire(|lock, stub| async move {
//!         tracing::info!(key = lock.key(), owner = %stub.owner, "now master");
//!     })
//!     .build()?;
//!
//! let lock = DistributedLock::new(config);
//! loop {
//!     lock.try_acquire().await?;
//!     tokio::time::sleep(std::time::Duration::from_secs(1)).await;
//! }
//! ```

pub mod error;
pub mod lock;
pub mod metrics;
pub mod store;

// Re-export commonly used types
pub use error::{LockError, StoreError};
pub use self::metrics::describe_metrics;

pub use store::{
    Compare, CoordinationStore, KeyValue, Lease, LeaseId, MemoryConnector,
    MemoryCoordinationStore, OpResponse, StoreConnector, TxnOp, TxnRequest, TxnResponse,
};

pub use lock::{
    AcquireCallback, AcquireOutcome, DistributedLock, LeaseHealth, LockConfig, LockOptions,
    LockStub, LockStubSnapshot,
};
