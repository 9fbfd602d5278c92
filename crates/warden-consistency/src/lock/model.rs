//! Lock configuration and ownership state

use std::fmt::{Debug, Formatter};
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use warden_common::{
    DEFAULT_DIAL_TIMEOUT, DEFAULT_ENDPOINT, DEFAULT_TTL_SECS, WardenError, validate_key,
};

use super::handle::DistributedLock;
use crate::error::LockError;
use crate::store::{CoordinationStore, LeaseId, MemoryConnector, StoreConnector};

/// `is_master` value before this process has observed mastery
pub const NOT_MASTER: u8 = 0;
/// `is_master` value once mastery has been observed
pub const MASTER: u8 = 1;

/// Callback run once when this process first becomes master
pub type AcquireCallback =
    Arc<dyn Fn(DistributedLock, LockStubSnapshot) -> BoxFuture<'static, ()> + Send + Sync>;

/// Builder for [`LockConfig`]
pub struct LockOptions {
    key: String,
    ttl_secs: u64,
    endpoint: String,
    dial_timeout: Duration,
    identity: Option<String>,
    client: Option<Arc<dyn CoordinationStore>>,
    connector: Option<Arc<dyn StoreConnector>>,
    on_acquire: Option<AcquireCallback>,
}

impl LockOptions {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            ttl_secs: DEFAULT_TTL_SECS,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            dial_timeout: DEFAULT_DIAL_TIMEOUT,
            identity: None,
            client: None,
            connector: None,
            on_acquire: None,
        }
    }

    /// Lease lifetime; also bounds how long a dead master blocks failover
    pub fn ttl_secs(mut self, ttl_secs: u64) -> Self {
        self.ttl_secs = ttl_secs;
        self
    }

    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn dial_timeout(mut self, dial_timeout: Duration) -> Self {
        self.dial_timeout = dial_timeout;
        self
    }

    /// Override the owner identity written to the key (host name by default)
    pub fn identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = Some(identity.into());
        self
    }

    /// Use an already connected store instead of dialing the endpoint
    pub fn client(mut self, client: Arc<dyn CoordinationStore>) -> Self {
        self.client = Some(client);
        self
    }

    /// Connector used to dial the endpoint (process-wide memory connector by default)
    pub fn connector(mut self, connector: Arc<dyn StoreConnector>) -> Self {
        self.connector = Some(connector);
        self
    }

    pub fn on_acquire<F, Fut>(mut self, callback: F) -> Self
    where
        F: Fn(DistributedLock, LockStubSnapshot) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handler: AcquireCallback =
            Arc::new(move |lock: DistributedLock, stub: LockStubSnapshot| {
                callback(lock, stub).boxed()
            });
        self.on_acquire = Some(handler);
        self
    }

    pub fn build(self) -> Result<LockConfig, LockError> {
        validate_key(&self.key)?;
        if self.ttl_secs == 0 {
            return Err(
                WardenError::ConfigError("ttl must be at least one second".to_string()).into(),
            );
        }
        if self.dial_timeout.is_zero() {
            return Err(WardenError::ConfigError("dial timeout must be positive".to_string()).into());
        }
        if self.client.is_none() && self.endpoint.trim().is_empty() {
            return Err(
                WardenError::ConfigError("an endpoint or a client is required".to_string()).into(),
            );
        }
        if let Some(identity) = &self.identity
            && identity.is_empty()
        {
            return Err(WardenError::IllegalArgument("identity must not be empty".to_string()).into());
        }

        Ok(LockConfig {
            key: self.key,
            ttl_secs: self.ttl_secs,
            endpoint: self.endpoint,
            dial_timeout: self.dial_timeout,
            identity: self.identity,
            client: self.client,
            connector: self
                .connector
                .unwrap_or_else(|| MemoryConnector::shared() as Arc<dyn StoreConnector>),
            on_acquire: self.on_acquire,
        })
    }
}

/// Immutable lock configuration
pub struct LockConfig {
    key: String,
    ttl_secs: u64,
    endpoint: String,
    dial_timeout: Duration,
    identity: Option<String>,
    pub(crate) client: Option<Arc<dyn CoordinationStore>>,
    pub(crate) connector: Arc<dyn StoreConnector>,
    pub(crate) on_acquire: Option<AcquireCallback>,
}

impl LockConfig {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn ttl_secs(&self) -> u64 {
        self.ttl_secs
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn dial_timeout(&self) -> Duration {
        self.dial_timeout
    }

    /// Configured identity override, if any
    pub fn identity(&self) -> Option<&str> {
        self.identity.as_deref()
    }
}

impl Debug for LockConfig {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockConfig")
            .field("key", &self.key)
            .field("ttl_secs", &self.ttl_secs)
            .field("endpoint", &self.endpoint)
            .field("dial_timeout", &self.dial_timeout)
            .field("identity", &self.identity)
            .field("has_client", &self.client.is_some())
            .field("has_on_acquire", &self.on_acquire.is_some())
            .finish()
    }
}

/// Per-process ownership state
///
/// `is_master` moves from [`NOT_MASTER`] to [`MASTER`] at most once and never
/// moves back. `owner` is fixed at creation.
#[derive(Debug)]
pub struct LockStub {
    is_master: AtomicU8,
    owner: String,
}

impl LockStub {
    pub fn new(owner: impl Into<String>) -> Self {
        Self {
            is_master: AtomicU8::new(NOT_MASTER),
            owner: owner.into(),
        }
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn is_master(&self) -> bool {
        self.is_master.load(Ordering::Acquire) == MASTER
    }

    /// Flip to master; only the first caller ever gets `true`
    pub(crate) fn promote(&self) -> bool {
        self.is_master
            .compare_exchange(NOT_MASTER, MASTER, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn snapshot(&self) -> LockStubSnapshot {
        LockStubSnapshot {
            owner: self.owner.clone(),
            is_master: self.is_master(),
        }
    }
}

/// Point-in-time copy of a [`LockStub`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockStubSnapshot {
    pub owner: String,
    pub is_master: bool,
}

/// Health of the lease backing a lock handle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaseHealth {
    /// No lease granted yet
    Pending,
    /// Lease granted and being renewed
    Alive { lease: LeaseId },
    /// Lease unknown to the store or past its deadline; the next attempt grants a new one
    Lost { lease: LeaseId, reason: String },
}

impl LeaseHealth {
    pub fn is_alive(&self) -> bool {
        matches!(self, LeaseHealth::Alive { .. })
    }

    pub fn lease(&self) -> Option<LeaseId> {
        match self {
            LeaseHealth::Pending => None,
            LeaseHealth::Alive { lease } | LeaseHealth::Lost { lease, .. } => Some(*lease),
        }
    }
}
