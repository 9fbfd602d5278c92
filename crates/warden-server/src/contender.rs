//! Contender poll loop
//!
//! Each contender owns one lock handle and calls `try_acquire` on a fixed
//! interval until shutdown. Retrying is the caller's job, so this loop is
//! what turns a single attempt into failover once the master's lease lapses.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::broadcast;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{info, warn};
use warden_common::local_identity;
use warden_consistency::{
    DistributedLock, LeaseHealth, LockOptions, LockStubSnapshot, MemoryConnector, StoreConnector,
};

use crate::model::Configuration;

/// Identity for contender `index` out of `total`
///
/// A single contender keeps the configured identity, or `None` to let the
/// lock resolve the host identity itself. Several contenders get `-<n>`
/// suffixes so they do not reconfirm each other's claims.
pub fn contender_identity(base: Option<&str>, index: usize, total: usize) -> Option<String> {
    if total <= 1 {
        return base.map(str::to_string);
    }
    let base = base.map(str::to_string).unwrap_or_else(local_identity);
    Some(format!("{}-{}", base, index + 1))
}

/// Connector for the configured endpoint
pub fn connector(configuration: &Configuration) -> Arc<dyn StoreConnector> {
    match configuration.store_scan_interval() {
        Some(scan_interval) => Arc::new(MemoryConnector::new().with_expiry_scanner(scan_interval)),
        None => MemoryConnector::shared(),
    }
}

/// Build one lock handle per configured contender
pub fn build_contenders(
    configuration: &Configuration,
    connector: Arc<dyn StoreConnector>,
) -> anyhow::Result<Vec<DistributedLock>> {
    let total = configuration.contenders();
    let identity = configuration.lock_identity();

    (0..total)
        .map(|index| {
            let mut options = LockOptions::new(configuration.lock_key())
                .ttl_secs(configuration.lock_ttl_secs())
                .endpoint(configuration.endpoint())
                .connector(connector.clone())
                .on_acquire(|lock, stub| async move {
                    match serde_json::to_string(&stub) {
                        Ok(status) => info!(key = lock.key(), %status, "Master duties started"),
                        Err(e) => warn!(key = lock.key(), error = %e, "Failed to encode lock status"),
                    }
                });
            if let Some(identity) = contender_identity(identity.as_deref(), index, total) {
                options = options.identity(identity);
            }

            let config = options
                .build()
                .with_context(|| format!("invalid lock configuration for contender {}", index + 1))?;
            Ok(DistributedLock::new(config))
        })
        .collect()
}

/// Poll `try_acquire` until shutdown, returning the final ownership state
pub async fn run_contender(
    lock: DistributedLock,
    poll_interval: Duration,
    mut shutdown: broadcast::Receiver<()>,
) -> Option<LockStubSnapshot> {
    let mut ticker = interval(poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut health = lock.lease_health();
    let mut was_master = false;

    loop {
        tokio::select! {
            _ = shutdown.recv() => break,
            _ = ticker.tick() => {
                match lock.try_acquire().await {
                    Ok(()) => {
                        if lock.is_master() && !was_master {
                            was_master = true;
                            info!(key = lock.key(), "Became master");
                        }
                    }
                    Err(e) => {
                        warn!(key = lock.key(), error = %e, "Acquire attempt failed");
                    }
                }
            }
            Ok(()) = health.changed() => {
                let state = health.borrow_and_update().clone();
                if let LeaseHealth::Lost { lease, reason } = state {
                    warn!(key = lock.key(), %lease, reason = %reason, "Lease lost, next attempt grants a new one");
                }
            }
        }
    }

    let snapshot = lock.stub();
    info!(key = lock.key(), master = was_master, "Contender stopped");
    snapshot
}
