//! In-process coordination store
//!
//! A single mutex guards the whole keyspace, so every transaction is evaluated
//! and applied as one indivisible step. Revisions follow the usual MVCC rules:
//! - The store revision increases by one for every committed write batch
//! - A created key takes the batch revision as its creation revision
//! - Absent keys report creation revision 0 to compares
//!
//! Lease expiry is checked lazily before every operation. An optional
//! background scanner also reaps expired leases when the store is idle.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::{Instant, interval};
use tracing::{debug, info};

use super::{
    Compare, CoordinationStore, KeyValue, Lease, LeaseId, OpResponse, TxnOp, TxnRequest,
    TxnResponse,
};
use crate::error::StoreError;

struct LeaseEntry {
    ttl: Duration,
    deadline: Instant,
    keys: BTreeSet<String>,
}

#[derive(Default)]
struct StoreState {
    revision: i64,
    next_lease: i64,
    kvs: BTreeMap<String, KeyValue>,
    leases: HashMap<LeaseId, LeaseEntry>,
}

impl StoreState {
    /// Drop every lease whose deadline has passed, deleting its keys
    fn purge_expired(&mut self, now: Instant) -> usize {
        let expired: Vec<LeaseId> = self
            .leases
            .iter()
            .filter(|(_, lease)| now >= lease.deadline)
            .map(|(id, _)| *id)
            .collect();

        for id in &expired {
            let deleted = self.revoke(*id);
            debug!(lease = %id, deleted, "Lease expired");
        }
        expired.len()
    }

    /// Remove a lease and its keys; returns the number of deleted keys
    fn revoke(&mut self, id: LeaseId) -> usize {
        let Some(entry) = self.leases.remove(&id) else {
            return 0;
        };

        let mut deleted = 0;
        for key in entry.keys {
            if self.kvs.get(&key).is_some_and(|kv| kv.lease == Some(id)) {
                self.kvs.remove(&key);
                deleted += 1;
            }
        }
        if deleted > 0 {
            self.revision += 1;
        }
        deleted
    }

    fn create_revision_of(&self, key: &str) -> i64 {
        self.kvs.get(key).map(|kv| kv.create_revision).unwrap_or(0)
    }

    fn holds(&self, compare: &Compare) -> bool {
        match compare {
            Compare::CreateRevision { key, revision } => self.create_revision_of(key) == *revision,
        }
    }

    fn first_created(&self, prefix: &str) -> Option<KeyValue> {
        self.kvs
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(_, kv)| kv)
            .min_by_key(|kv| kv.create_revision)
            .cloned()
    }

    /// Check that every op in a branch can be applied before touching anything
    fn validate(&self, ops: &[TxnOp]) -> Result<(), StoreError> {
        for op in ops {
            if let TxnOp::Put {
                lease: Some(lease), ..
            } = op
                && !self.leases.contains_key(lease)
            {
                return Err(StoreError::LeaseNotFound(*lease));
            }
        }
        Ok(())
    }

    fn put(&mut self, key: String, value: String, lease: Option<LeaseId>, revision: i64) {
        let previous_lease = match self.kvs.get_mut(&key) {
            Some(kv) => {
                let previous = kv.lease;
                kv.value = value;
                kv.mod_revision = revision;
                kv.version += 1;
                kv.lease = lease;
                previous
            }
            None => {
                self.kvs.insert(
                    key.clone(),
                    KeyValue {
                        key: key.clone(),
                        value,
                        create_revision: revision,
                        mod_revision: revision,
                        version: 1,
                        lease,
                    },
                );
                None
            }
        };

        if previous_lease != lease
            && let Some(old) = previous_lease.and_then(|id| self.leases.get_mut(&id))
        {
            old.keys.remove(&key);
        }
        if let Some(entry) = lease.and_then(|id| self.leases.get_mut(&id)) {
            entry.keys.insert(key);
        }
    }

    fn apply(&mut self, ops: Vec<TxnOp>) -> Vec<OpResponse> {
        let writes = ops.iter().any(|op| matches!(op, TxnOp::Put { .. }));
        let batch_revision = self.revision + 1;

        let responses = ops
            .into_iter()
            .map(|op| match op {
                TxnOp::Put { key, value, lease } => {
                    self.put(key, value, lease, batch_revision);
                    OpResponse::Put {
                        revision: batch_revision,
                    }
                }
                TxnOp::Get { key } => OpResponse::Range {
                    kvs: self.kvs.get(&key).cloned().into_iter().collect(),
                },
                TxnOp::GetFirstCreated { prefix } => OpResponse::Range {
                    kvs: self.first_created(&prefix).into_iter().collect(),
                },
            })
            .collect();

        if writes {
            self.revision = batch_revision;
        }
        responses
    }
}

/// Linearizable in-process coordination store
pub struct MemoryCoordinationStore {
    name: String,
    state: Arc<Mutex<StoreState>>,
}

impl MemoryCoordinationStore {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Arc::new(Mutex::new(StoreState {
                next_lease: 1,
                ..Default::default()
            })),
        }
    }

    /// Start a background task reaping expired leases every `scan_interval`.
    ///
    /// Must be called from within a tokio runtime. The task stops once the
    /// store is dropped.
    pub fn with_expiry_scanner(self, scan_interval: Duration) -> Self {
        let weak: Weak<Mutex<StoreState>> = Arc::downgrade(&self.state);
        let name = self.name.clone();

        tokio::spawn(async move {
            let mut ticker = interval(scan_interval);
            loop {
                ticker.tick().await;
                let Some(state) = weak.upgrade() else {
                    break;
                };
                let expired = state.lock().purge_expired(Instant::now());
                if expired > 0 {
                    info!(store = %name, expired, "Reaped expired leases");
                }
            }
        });

        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current store revision
    pub fn revision(&self) -> i64 {
        self.locked().revision
    }

    /// Number of live keys
    pub fn len(&self) -> usize {
        self.locked().kvs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of unexpired leases
    pub fn active_leases(&self) -> usize {
        self.locked().leases.len()
    }

    /// Revoke a lease immediately, deleting the keys bound to it
    pub fn revoke_lease(&self, lease: LeaseId) -> Result<usize, StoreError> {
        let mut state = self.locked();
        if !state.leases.contains_key(&lease) {
            return Err(StoreError::LeaseNotFound(lease));
        }
        Ok(state.revoke(lease))
    }

    /// Delete a key regardless of its lease; returns whether it existed
    pub fn delete(&self, key: &str) -> bool {
        let mut state = self.locked();
        let Some(kv) = state.kvs.remove(key) else {
            return false;
        };
        if let Some(entry) = kv.lease.and_then(|id| state.leases.get_mut(&id)) {
            entry.keys.remove(key);
        }
        state.revision += 1;
        true
    }

    /// Lock the state after reaping expired leases
    fn locked(&self) -> parking_lot::MutexGuard<'_, StoreState> {
        let mut state = self.state.lock();
        state.purge_expired(Instant::now());
        state
    }
}

impl Default for MemoryCoordinationStore {
    fn default() -> Self {
        Self::new("default")
    }
}

#[async_trait]
impl CoordinationStore for MemoryCoordinationStore {
    async fn grant_lease(&self, ttl: Duration) -> Result<Lease, StoreError> {
        if ttl.is_zero() {
            return Err(StoreError::InvalidTtl(ttl));
        }

        let mut state = self.locked();
        let id = LeaseId(state.next_lease);
        state.next_lease += 1;
        state.leases.insert(
            id,
            LeaseEntry {
                ttl,
                deadline: Instant::now() + ttl,
                keys: BTreeSet::new(),
            },
        );

        Ok(Lease { id, ttl })
    }

    async fn keep_alive_once(&self, lease: LeaseId) -> Result<Duration, StoreError> {
        let mut state = self.locked();
        let entry = state
            .leases
            .get_mut(&lease)
            .ok_or(StoreError::LeaseNotFound(lease))?;
        entry.deadline = Instant::now() + entry.ttl;
        Ok(entry.ttl)
    }

    async fn txn(&self, request: TxnRequest) -> Result<TxnResponse, StoreError> {
        let mut state = self.locked();

        let succeeded = request.compare.iter().all(|compare| state.holds(compare));
        let ops = if succeeded {
            request.success
        } else {
            request.failure
        };

        state.validate(&ops)?;
        let responses = state.apply(ops);

        Ok(TxnResponse {
            succeeded,
            revision: state.revision,
            responses,
        })
    }

    async fn get(&self, key: &str) -> Result<Option<KeyValue>, StoreError> {
        Ok(self.locked().kvs.get(key).cloned())
    }

    async fn get_first_created(&self, prefix: &str) -> Result<Option<KeyValue>, StoreError> {
        Ok(self.locked().first_created(prefix))
    }
}
