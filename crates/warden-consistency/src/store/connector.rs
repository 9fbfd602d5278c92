//! Endpoint resolution for coordination stores

use std::sync::{Arc, LazyLock};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::info;

use super::{CoordinationStore, MemoryCoordinationStore};
use crate::error::StoreError;

/// Scheme of endpoints served by [`MemoryConnector`]
pub const MEMORY_SCHEME: &str = "memory://";

/// Store name used for `memory://` with nothing after the scheme
const DEFAULT_STORE_NAME: &str = "default";

/// Dials a coordination store from an endpoint address
#[async_trait]
pub trait StoreConnector: Send + Sync {
    async fn connect(&self, endpoint: &str) -> Result<Arc<dyn CoordinationStore>, StoreError>;
}

static SHARED: LazyLock<Arc<MemoryConnector>> = LazyLock::new(|| Arc::new(MemoryConnector::new()));

/// Connector for `memory://<name>` endpoints
///
/// Every endpoint with the same name resolves to the same store instance, so
/// all lock handles dialing it contend in one keyspace.
#[derive(Default)]
pub struct MemoryConnector {
    stores: DashMap<String, Arc<MemoryCoordinationStore>>,
    scan_interval: Option<Duration>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide connector used when a lock is not given one explicitly
    pub fn shared() -> Arc<MemoryConnector> {
        SHARED.clone()
    }

    /// Stores created by this connector reap expired leases in the background
    pub fn with_expiry_scanner(mut self, scan_interval: Duration) -> Self {
        self.scan_interval = Some(scan_interval);
        self
    }

    /// Look up a store that has already been dialed
    pub fn store(&self, name: &str) -> Option<Arc<MemoryCoordinationStore>> {
        self.stores.get(name).map(|entry| entry.value().clone())
    }

    /// Store name addressed by a `memory://` endpoint
    pub fn parse_endpoint(endpoint: &str) -> Result<String, StoreError> {
        let endpoint = endpoint.trim();
        if endpoint.is_empty() {
            return Err(StoreError::InvalidEndpoint(endpoint.to_string()));
        }

        let name = endpoint
            .strip_prefix(MEMORY_SCHEME)
            .ok_or_else(|| StoreError::UnsupportedEndpoint(endpoint.to_string()))?
            .trim_end_matches('/');

        if name.is_empty() {
            Ok(DEFAULT_STORE_NAME.to_string())
        } else if name.contains('/') {
            Err(StoreError::InvalidEndpoint(endpoint.to_string()))
        } else {
            Ok(name.to_string())
        }
    }
}

#[async_trait]
impl StoreConnector for MemoryConnector {
    async fn connect(&self, endpoint: &str) -> Result<Arc<dyn CoordinationStore>, StoreError> {
        let name = Self::parse_endpoint(endpoint)?;

        let store: Arc<dyn CoordinationStore> = self
            .stores
            .entry(name.clone())
            .or_insert_with(|| {
                info!(store = %name, "Creating in-memory coordination store");
                let store = MemoryCoordinationStore::new(name.clone());
                let store = match self.scan_interval {
                    Some(scan_interval) => store.with_expiry_scanner(scan_interval),
                    None => store,
                };
                Arc::new(store)
            })
            .value()
            .clone();

        Ok(store)
    }
}
