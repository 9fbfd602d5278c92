//! Lock handle

use std::fmt::{Debug, Formatter};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tokio::sync::{Mutex, OnceCell, watch};
use tracing::{debug, info, warn};
use warden_common::local_identity;

use super::keeper::LeaseKeeper;
use super::model::{LeaseHealth, LockConfig, LockStub, LockStubSnapshot};
use super::protocol::{self, AcquireOutcome};
use crate::error::{LockError, StoreError};
use crate::metrics;
use crate::store::{CoordinationStore, Lease, LeaseId};

struct LockInner {
    config: LockConfig,
    client: OnceCell<Arc<dyn CoordinationStore>>,
    stub: OnceLock<Arc<LockStub>>,
    lease: Mutex<Option<LeaseKeeper>>,
    health: watch::Sender<LeaseHealth>,
}

/// Handle for contending on one key
///
/// Clones share the same client, stub, and lease. The lease keep-alive stops
/// when the last clone is dropped.
///
/// Callers drive the retry cadence: call [`DistributedLock::try_acquire`]
/// periodically to take over after the current master's lease expires.
#[derive(Clone)]
pub struct DistributedLock {
    inner: Arc<LockInner>,
}

impl DistributedLock {
    pub fn new(config: LockConfig) -> Self {
        let client = OnceCell::new_with(config.client.clone());
        let (health, _) = watch::channel(LeaseHealth::Pending);

        Self {
            inner: Arc::new(LockInner {
                config,
                client,
                stub: OnceLock::new(),
                lease: Mutex::new(None),
                health,
            }),
        }
    }

    pub fn config(&self) -> &LockConfig {
        &self.inner.config
    }

    pub fn key(&self) -> &str {
        self.inner.config.key()
    }

    pub fn ttl(&self) -> Duration {
        self.inner.config.ttl()
    }

    /// Whether this process has observed mastery; never resets once true
    pub fn is_master(&self) -> bool {
        self.inner.stub.get().is_some_and(|stub| stub.is_master())
    }

    /// Snapshot of the ownership stub, `None` before the first attempt
    pub fn stub(&self) -> Option<LockStubSnapshot> {
        self.inner.stub.get().map(|stub| stub.snapshot())
    }

    /// Subscribe to lease health changes
    pub fn lease_health(&self) -> watch::Receiver<LeaseHealth> {
        self.inner.health.subscribe()
    }

    /// Lease currently backing this handle, if it is alive
    pub fn current_lease(&self) -> Option<LeaseId> {
        match &*self.inner.health.borrow() {
            LeaseHealth::Alive { lease } => Some(*lease),
            _ => None,
        }
    }

    /// Make one attempt to become master.
    ///
    /// Returns `Ok(())` whether or not this process ended up master; losing
    /// the race is the normal state for every other contender. The first
    /// attempt that observes mastery spawns the `on_acquire` callback; later
    /// ones, concurrent or not, never fire it again.
    pub async fn try_acquire(&self) -> Result<(), LockError> {
        let client = self.client().await?;
        let stub = self.stub_or_init();
        let lease = self.ensure_lease(&client).await?;

        let key = self.key();
        let request = protocol::build_acquire_txn(key, stub.owner(), lease.id);
        let response = match client.txn(request).await {
            Ok(response) => response,
            Err(e) => {
                metrics::record_acquire("error");
                if let StoreError::LeaseNotFound(id) = &e {
                    self.forget_lease(*id, "lease missing at commit").await;
                }
                return Err(LockError::Transaction {
                    key: key.to_string(),
                    source: e,
                });
            }
        };

        let outcome = protocol::classify(&response, stub.owner());
        metrics::record_acquire(outcome.as_str());

        match outcome {
            AcquireOutcome::NotMaster => {
                debug!(key, owner = stub.owner(), revision = response.revision, "Not master");
            }
            AcquireOutcome::Created | AcquireOutcome::Reconfirmed => {
                if stub.promote() {
                    info!(
                        key,
                        owner = stub.owner(),
                        lease = %lease.id,
                        outcome = outcome.as_str(),
                        "Became master"
                    );
                    metrics::set_master(key);
                    self.dispatch_on_acquire(&stub);
                } else {
                    debug!(key, owner = stub.owner(), outcome = outcome.as_str(), "Still master");
                }
            }
        }

        Ok(())
    }

    async fn client(&self) -> Result<Arc<dyn CoordinationStore>, LockError> {
        let config = &self.inner.config;
        self.inner
            .client
            .get_or_try_init(|| async {
                let endpoint = config.endpoint();
                info!(endpoint, "Connecting to coordination store");
                match tokio::time::timeout(config.dial_timeout(), config.connector.connect(endpoint))
                    .await
                {
                    Ok(Ok(client)) => Ok(client),
                    Ok(Err(source)) => Err(LockError::ClientInit {
                        endpoint: endpoint.to_string(),
                        source,
                    }),
                    Err(_) => Err(LockError::ClientInit {
                        endpoint: endpoint.to_string(),
                        source: StoreError::DialTimeout(config.dial_timeout()),
                    }),
                }
            })
            .await
            .cloned()
    }

    fn stub_or_init(&self) -> Arc<LockStub> {
        self.inner
            .stub
            .get_or_init(|| {
                let owner = self
                    .inner
                    .config
                    .identity()
                    .map(str::to_string)
                    .unwrap_or_else(local_identity);
                debug!(key = self.key(), owner = %owner, "Created lock stub");
                Arc::new(LockStub::new(owner))
            })
            .clone()
    }

    /// Reuse the live lease or grant a new one and start renewing it
    async fn ensure_lease(&self, client: &Arc<dyn CoordinationStore>) -> Result<Lease, LockError> {
        let mut slot = self.inner.lease.lock().await;
        if let Some(keeper) = slot.as_ref()
            && !keeper.is_finished()
        {
            return Ok(keeper.lease());
        }

        let config = &self.inner.config;
        let lease = client
            .grant_lease(config.ttl())
            .await
            .map_err(|source| LockError::LeaseGrant {
                ttl_secs: config.ttl_secs(),
                source,
            })?;
        info!(key = self.key(), lease = %lease.id, ttl_secs = config.ttl_secs(), "Granted lease");

        *slot = Some(LeaseKeeper::spawn(
            client.clone(),
            lease,
            self.key().to_string(),
            self.inner.health.clone(),
        ));
        Ok(lease)
    }

    async fn forget_lease(&self, lease: LeaseId, reason: &str) {
        let mut slot = self.inner.lease.lock().await;
        if slot.as_ref().is_some_and(|keeper| keeper.lease().id == lease) {
            warn!(key = self.key(), lease = %lease, reason, "Dropping lease");
            *slot = None;
            self.inner.health.send_replace(LeaseHealth::Lost {
                lease,
                reason: reason.to_string(),
            });
        }
    }

    fn dispatch_on_acquire(&self, stub: &LockStub) {
        let Some(callback) = self.inner.config.on_acquire.clone() else {
            return;
        };
        let lock = self.clone();
        let snapshot = stub.snapshot();
        tokio::spawn(async move {
            callback(lock, snapshot).await;
        });
    }
}

impl Debug for DistributedLock {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DistributedLock")
            .field("config", &self.inner.config)
            .field("stub", &self.stub())
            .field("lease", &*self.inner.health.borrow())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::LockOptions;
    use crate::store::{MemoryConnector, MemoryCoordinationStore, StoreConnector};
    use async_trait::async_trait;

    struct UnreachableConnector;

    #[async_trait]
    impl StoreConnector for UnreachableConnector {
        async fn connect(&self, endpoint: &str) -> Result<Arc<dyn CoordinationStore>, StoreError> {
            Err(StoreError::Unavailable(format!("connection refused: {}", endpoint)))
        }
    }

    struct HangingConnector;

    #[async_trait]
    impl StoreConnector for HangingConnector {
        async fn connect(&self, _endpoint: &str) -> Result<Arc<dyn CoordinationStore>, StoreError> {
            std::future::pending().await
        }
    }

    fn lock_on(store: &Arc<MemoryCoordinationStore>, identity: &str) -> DistributedLock {
        let config = LockOptions::new("/warden/master/test")
            .ttl_secs(5)
            .identity(identity)
            .client(store.clone())
            .build()
            .unwrap();
        DistributedLock::new(config)
    }

    #[tokio::test]
    async fn test_client_init_failure_has_no_side_effects() {
        let config = LockOptions::new("/warden/master/test")
            .endpoint("memory://unreachable")
            .connector(Arc::new(UnreachableConnector))
            .build()
            .unwrap();
        let lock = DistributedLock::new(config);

        let err = lock.try_acquire().await.unwrap_err();
        assert!(matches!(err, LockError::ClientInit { .. }));
        assert!(lock.stub().is_none());
        assert_eq!(*lock.lease_health().borrow(), LeaseHealth::Pending);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dial_timeout() {
        let config = LockOptions::new("/warden/master/test")
            .dial_timeout(Duration::from_secs(1))
            .connector(Arc::new(HangingConnector))
            .build()
            .unwrap();
        let lock = DistributedLock::new(config);

        let err = lock.try_acquire().await.unwrap_err();
        assert!(matches!(
            err,
            LockError::ClientInit {
                source: StoreError::DialTimeout(_),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_endpoint_is_dialed_once() {
        let connector = Arc::new(MemoryConnector::new());
        let config = LockOptions::new("/warden/master/test")
            .endpoint("memory://dial-once")
            .identity("node-a")
            .connector(connector.clone())
            .build()
            .unwrap();
        let lock = DistributedLock::new(config);

        lock.try_acquire().await.unwrap();
        lock.try_acquire().await.unwrap();

        let store = connector.store("dial-once").unwrap();
        let kv = store.get("/warden/master/test").await.unwrap().unwrap();
        assert_eq!(kv.value, "node-a");
        assert!(lock.is_master());
    }

    #[tokio::test]
    async fn test_stub_uses_local_identity_by_default() {
        let store = Arc::new(MemoryCoordinationStore::new("identity"));
        let config = LockOptions::new("/warden/master/test")
            .client(store.clone())
            .build()
            .unwrap();
        let lock = DistributedLock::new(config);

        assert!(lock.stub().is_none());
        lock.try_acquire().await.unwrap();
        assert_eq!(lock.stub().unwrap().owner, local_identity());
    }

    #[tokio::test]
    async fn test_lease_is_reused_across_attempts() {
        let store = Arc::new(MemoryCoordinationStore::new("reuse"));
        let lock = lock_on(&store, "node-a");

        lock.try_acquire().await.unwrap();
        let first = lock.current_lease().unwrap();
        lock.try_acquire().await.unwrap();
        lock.try_acquire().await.unwrap();

        assert_eq!(lock.current_lease(), Some(first));
        assert_eq!(store.active_leases(), 1);
    }

    #[tokio::test]
    async fn test_lost_lease_is_replaced() {
        let store = Arc::new(MemoryCoordinationStore::new("replace"));
        let lock = lock_on(&store, "node-a");

        lock.try_acquire().await.unwrap();
        let first = lock.current_lease().unwrap();
        store.revoke_lease(first).unwrap();

        // The keeper has not noticed yet, so the commit fails on the missing lease
        let err = lock.try_acquire().await.unwrap_err();
        assert!(matches!(
            err,
            LockError::Transaction {
                source: StoreError::LeaseNotFound(_),
                ..
            }
        ));
        assert!(matches!(
            *lock.lease_health().borrow(),
            LeaseHealth::Lost { .. }
        ));

        lock.try_acquire().await.unwrap();
        let second = lock.current_lease().unwrap();
        assert_ne!(first, second);
        assert!(lock.is_master());
        let kv = store.get("/warden/master/test").await.unwrap().unwrap();
        assert_eq!(kv.lease, Some(second));
    }

    #[tokio::test]
    async fn test_debug_output() {
        let store = Arc::new(MemoryCoordinationStore::new("debug"));
        let lock = lock_on(&store, "node-a");
        lock.try_acquire().await.unwrap();
        let debug = format!("{:?}", lock);
        assert!(debug.contains("node-a"));
        assert!(debug.contains("Alive"));
    }
}
