//! Coordination store contract
//!
//! The master lock only needs three capabilities from a store:
//! - Time-bounded leases; keys bound to a lease vanish when it is not renewed
//! - Atomic compare-then-else transactions
//! - A store-assigned creation revision per key, totally ordered across keys
//!
//! [`MemoryCoordinationStore`] implements the contract in-process and
//! [`MemoryConnector`] resolves `memory://<name>` endpoints to shared instances.

mod connector;
mod memory;

use std::fmt::{Display, Formatter};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

pub use connector::{MEMORY_SCHEME, MemoryConnector, StoreConnector};
pub use memory::MemoryCoordinationStore;

/// Store-assigned lease identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LeaseId(pub i64);

impl Display for LeaseId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A granted lease
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lease {
    pub id: LeaseId,
    pub ttl: Duration,
}

/// A stored key with its revision metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyValue {
    pub key: String,
    pub value: String,
    /// Revision at which the key was created; 0 never appears on a stored key
    pub create_revision: i64,
    /// Revision of the last write to the key
    pub mod_revision: i64,
    /// Number of writes since creation
    pub version: i64,
    /// Lease the key is bound to, if any
    #[serde(default)]
    pub lease: Option<LeaseId>,
}

/// Transaction guard
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Compare {
    /// Holds when the key's creation revision equals `revision`.
    /// An absent key has creation revision 0.
    CreateRevision { key: String, revision: i64 },
}

impl Compare {
    pub fn create_revision(key: impl Into<String>, revision: i64) -> Self {
        Compare::CreateRevision {
            key: key.into(),
            revision,
        }
    }

    pub fn key(&self) -> &str {
        match self {
            Compare::CreateRevision { key, .. } => key,
        }
    }
}

/// A single operation inside a transaction branch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxnOp {
    /// Write `value` to `key`, optionally binding the key to a lease
    Put {
        key: String,
        value: String,
        lease: Option<LeaseId>,
    },
    /// Read one key
    Get { key: String },
    /// Read the key with the smallest creation revision under `prefix`
    GetFirstCreated { prefix: String },
}

impl TxnOp {
    pub fn put(key: impl Into<String>, value: impl Into<String>, lease: Option<LeaseId>) -> Self {
        TxnOp::Put {
            key: key.into(),
            value: value.into(),
            lease,
        }
    }

    pub fn get(key: impl Into<String>) -> Self {
        TxnOp::Get { key: key.into() }
    }

    pub fn first_created(prefix: impl Into<String>) -> Self {
        TxnOp::GetFirstCreated {
            prefix: prefix.into(),
        }
    }
}

/// Compare-then-else transaction
///
/// When every compare holds, `success` runs; otherwise `failure` runs.
/// The evaluation and the chosen branch commit as one indivisible step.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TxnRequest {
    pub compare: Vec<Compare>,
    pub success: Vec<TxnOp>,
    pub failure: Vec<TxnOp>,
}

impl TxnRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn when(mut self, compare: Compare) -> Self {
        self.compare.push(compare);
        self
    }

    pub fn and_then(mut self, ops: impl IntoIterator<Item = TxnOp>) -> Self {
        self.success.extend(ops);
        self
    }

    pub fn or_else(mut self, ops: impl IntoIterator<Item = TxnOp>) -> Self {
        self.failure.extend(ops);
        self
    }
}

/// Result of one operation, positionally matching the executed branch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpResponse {
    Put { revision: i64 },
    Range { kvs: Vec<KeyValue> },
}

impl OpResponse {
    /// Keys returned by a read, `None` for writes
    pub fn kvs(&self) -> Option<&[KeyValue]> {
        match self {
            OpResponse::Range { kvs } => Some(kvs),
            OpResponse::Put { .. } => None,
        }
    }
}

/// Outcome of a committed transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxnResponse {
    /// Whether the compare held and the success branch ran
    pub succeeded: bool,
    /// Store revision after the transaction
    pub revision: i64,
    pub responses: Vec<OpResponse>,
}

/// Linearizable coordination store
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    /// Grant a lease that expires after `ttl` unless renewed
    async fn grant_lease(&self, ttl: Duration) -> Result<Lease, StoreError>;

    /// Renew a lease once, returning its refreshed time-to-live
    async fn keep_alive_once(&self, lease: LeaseId) -> Result<Duration, StoreError>;

    /// Commit a compare-then-else transaction
    async fn txn(&self, request: TxnRequest) -> Result<TxnResponse, StoreError>;

    /// Read one key
    async fn get(&self, key: &str) -> Result<Option<KeyValue>, StoreError>;

    /// Read the key with the smallest creation revision under `prefix`
    async fn get_first_created(&self, prefix: &str) -> Result<Option<KeyValue>, StoreError>;
}
