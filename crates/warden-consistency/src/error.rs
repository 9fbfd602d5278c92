//! Error types for the coordination store and the master lock

use std::time::Duration;

use warden_common::WardenError;

use crate::store::LeaseId;

/// Errors returned by a coordination store or its connector
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("requested lease {0} not found")]
    LeaseNotFound(LeaseId),

    #[error("invalid lease ttl: {0:?}")]
    InvalidTtl(Duration),

    #[error("invalid endpoint: '{0}'")]
    InvalidEndpoint(String),

    #[error("unsupported endpoint scheme: '{0}'")]
    UnsupportedEndpoint(String),

    #[error("dial timed out after {0:?}")]
    DialTimeout(Duration),

    #[error("internal store error: {0}")]
    Internal(String),
}

/// Errors returned by [`crate::DistributedLock::try_acquire`]
///
/// Losing the race is not an error; every variant here means the attempt
/// could not be evaluated at all.
#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("invalid lock configuration: {0}")]
    InvalidConfig(#[from] WardenError),

    #[error("failed to initialize coordination client for '{endpoint}': {source}")]
    ClientInit {
        endpoint: String,
        #[source]
        source: StoreError,
    },

    #[error("failed to grant lease with ttl {ttl_secs}s: {source}")]
    LeaseGrant {
        ttl_secs: u64,
        #[source]
        source: StoreError,
    },

    #[error("acquire transaction on '{key}' failed: {source}")]
    Transaction {
        key: String,
        #[source]
        source: StoreError,
    },
}

impl LockError {
    /// The store error behind this failure, if any
    pub fn store_error(&self) -> Option<&StoreError> {
        match self {
            LockError::InvalidConfig(_) => None,
            LockError::ClientInit { source, .. }
            | LockError::LeaseGrant { source, .. }
            | LockError::Transaction { source, .. } => Some(source),
        }
    }
}
