//! Lease keep-alive task

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval};
use tracing::{debug, error, warn};

use super::model::LeaseHealth;
use crate::error::StoreError;
use crate::metrics;
use crate::store::{CoordinationStore, Lease};

/// Shortest renewal period regardless of TTL
const MIN_RENEW_INTERVAL: Duration = Duration::from_millis(100);

/// Renew at a third of the TTL so two renewals can be missed before expiry
pub(crate) fn renew_interval(ttl: Duration) -> Duration {
    (ttl / 3).max(MIN_RENEW_INTERVAL)
}

/// Background renewal of one lease
///
/// Renewal errors are retried on the next tick while the lease can still be
/// alive in the store, i.e. until one TTL has passed since the last
/// successful renewal. The keeper reports [`LeaseHealth::Lost`] and stops
/// when the store no longer knows the lease or that deadline passes. The
/// task is aborted when the keeper is dropped.
pub(crate) struct LeaseKeeper {
    lease: Lease,
    task: JoinHandle<()>,
}

impl LeaseKeeper {
    pub(crate) fn spawn(
        store: Arc<dyn CoordinationStore>,
        lease: Lease,
        key: String,
        health: watch::Sender<LeaseHealth>,
    ) -> Self {
        health.send_replace(LeaseHealth::Alive { lease: lease.id });
        let task = tokio::spawn(run(store, lease, key, health));
        Self { lease, task }
    }

    pub(crate) fn lease(&self) -> Lease {
        self.lease
    }

    /// Whether renewal has stopped
    pub(crate) fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for LeaseKeeper {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run(
    store: Arc<dyn CoordinationStore>,
    lease: Lease,
    key: String,
    health: watch::Sender<LeaseHealth>,
) {
    let mut ticker = interval(renew_interval(lease.ttl));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately and the lease was just granted
    ticker.tick().await;
    // Measured after the grant returned, so never earlier than the store's own expiry
    let mut deadline = Instant::now() + lease.ttl;

    loop {
        ticker.tick().await;

        let e = match store.keep_alive_once(lease.id).await {
            Ok(ttl) => {
                deadline = Instant::now() + ttl;
                debug!(key = %key, lease = %lease.id, ttl_ms = ttl.as_millis() as u64, "Lease renewed");
                continue;
            }
            Err(e) => e,
        };

        metrics::record_keepalive_failure(&key);
        let expired = Instant::now() >= deadline;
        if !expired && !matches!(e, StoreError::LeaseNotFound(_)) {
            warn!(key = %key, lease = %lease.id, error = %e, "Lease keep-alive failed, retrying");
            continue;
        }

        error!(key = %key, lease = %lease.id, error = %e, expired, "Lease lost");
        health.send_replace(LeaseHealth::Lost {
            lease: lease.id,
            reason: e.to_string(),
        });
        break;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{KeyValue, MemoryCoordinationStore, TxnOp, TxnRequest, TxnResponse};
    use async_trait::async_trait;
    use metrics_exporter_prometheus::PrometheusBuilder;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Memory store whose next `failures` renewals fail as if the link dropped
    struct FlakyStore {
        inner: MemoryCoordinationStore,
        failures: AtomicUsize,
    }

    impl FlakyStore {
        fn new(failures: usize) -> Self {
            Self {
                inner: MemoryCoordinationStore::new("flaky"),
                failures: AtomicUsize::new(failures),
            }
        }
    }

    #[async_trait]
    impl CoordinationStore for FlakyStore {
        async fn grant_lease(&self, ttl: Duration) -> Result<Lease, StoreError> {
            self.inner.grant_lease(ttl).await
        }

        async fn keep_alive_once(&self, lease: crate::store::LeaseId) -> Result<Duration, StoreError> {
            let failing = self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failing {
                return Err(StoreError::Unavailable("connection reset".to_string()));
            }
            self.inner.keep_alive_once(lease).await
        }

        async fn txn(&self, request: TxnRequest) -> Result<TxnResponse, StoreError> {
            self.inner.txn(request).await
        }

        async fn get(&self, key: &str) -> Result<Option<KeyValue>, StoreError> {
            self.inner.get(key).await
        }

        async fn get_first_created(&self, prefix: &str) -> Result<Option<KeyValue>, StoreError> {
            self.inner.get_first_created(prefix).await
        }
    }

    #[test]
    fn test_renew_interval() {
        assert_eq!(renew_interval(Duration::from_secs(9)), Duration::from_secs(3));
        assert_eq!(renew_interval(Duration::from_millis(90)), MIN_RENEW_INTERVAL);
    }

    #[tokio::test(start_paused = true)]
    async fn test_keeper_holds_lease_past_ttl() {
        let store = Arc::new(MemoryCoordinationStore::new("keeper"));
        let lease = store.grant_lease(Duration::from_secs(3)).await.unwrap();
        store
            .txn(TxnRequest::new().and_then([TxnOp::put("/k", "a", Some(lease.id))]))
            .await
            .unwrap();

        let (tx, rx) = watch::channel(LeaseHealth::Pending);
        let keeper = LeaseKeeper::spawn(store.clone(), lease, "/k".to_string(), tx);
        assert_eq!(*rx.borrow(), LeaseHealth::Alive { lease: lease.id });

        tokio::time::sleep(Duration::from_secs(20)).await;
        assert!(store.get("/k").await.unwrap().is_some());
        assert!(!keeper.is_finished());
        assert!(rx.borrow().is_alive());
    }

    #[tokio::test(start_paused = true)]
    async fn test_keeper_reports_lost_lease() {
        let store = Arc::new(MemoryCoordinationStore::new("keeper"));
        let lease = store.grant_lease(Duration::from_secs(3)).await.unwrap();

        let (tx, mut rx) = watch::channel(LeaseHealth::Pending);
        let keeper = LeaseKeeper::spawn(store.clone(), lease, "/k".to_string(), tx);
        rx.borrow_and_update();

        store.revoke_lease(lease.id).unwrap();
        rx.changed().await.unwrap();

        assert!(matches!(
            *rx.borrow(),
            LeaseHealth::Lost { lease: id, .. } if id == lease.id
        ));
        tokio::task::yield_now().await;
        assert!(keeper.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_keeper_stops_renewal() {
        let store = Arc::new(MemoryCoordinationStore::new("keeper"));
        let lease = store.grant_lease(Duration::from_secs(3)).await.unwrap();

        let (tx, _rx) = watch::channel(LeaseHealth::Pending);
        let keeper = LeaseKeeper::spawn(store.clone(), lease, "/k".to_string(), tx);
        drop(keeper);

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(store.active_leases(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_keeper_retries_transient_failure() {
        let store = Arc::new(FlakyStore::new(1));
        let lease = store.grant_lease(Duration::from_secs(3)).await.unwrap();
        store
            .txn(TxnRequest::new().and_then([TxnOp::put("/k", "a", Some(lease.id))]))
            .await
            .unwrap();

        let (tx, rx) = watch::channel(LeaseHealth::Pending);
        let keeper = LeaseKeeper::spawn(store.clone(), lease, "/k".to_string(), tx);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(store.failures.load(Ordering::SeqCst), 0);
        assert!(!keeper.is_finished());
        assert_eq!(*rx.borrow(), LeaseHealth::Alive { lease: lease.id });
        assert_eq!(store.get("/k").await.unwrap().unwrap().lease, Some(lease.id));
    }

    #[tokio::test(start_paused = true)]
    async fn test_keeper_gives_up_after_ttl_of_failures() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        let _guard = ::metrics::set_default_local_recorder(&recorder);
        crate::metrics::describe_metrics();

        let store = Arc::new(FlakyStore::new(usize::MAX));
        let lease = store.grant_lease(Duration::from_secs(3)).await.unwrap();

        let (tx, mut rx) = watch::channel(LeaseHealth::Pending);
        let keeper = LeaseKeeper::spawn(store.clone(), lease, "/k".to_string(), tx);
        rx.borrow_and_update();

        // Failures at 1s and 2s are retried; the one at 3s is past the deadline
        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert!(rx.borrow().is_alive());

        rx.changed().await.unwrap();
        assert!(matches!(
            &*rx.borrow(),
            LeaseHealth::Lost { lease: id, reason } if *id == lease.id && reason.contains("connection reset")
        ));
        tokio::task::yield_now().await;
        assert!(keeper.is_finished());

        let rendered = handle.render();
        assert!(rendered.contains("# HELP warden_lease_keepalive_failures_total"));
        assert!(rendered.contains("warden_lease_keepalive_failures_total{key=\"/k\"} 3"));
    }
}
