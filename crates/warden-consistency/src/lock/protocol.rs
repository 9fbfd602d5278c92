//! Acquisition transaction and ownership disambiguation
//!
//! One attempt is a single transaction:
//!
//! ```text
//! if create_revision(key) == 0
//! then put(key, owner, lease), first_created(key)
//! else get(key),               first_created(key)
//! ```
//!
//! A committed `then` branch means this process created the key. On the
//! `else` branch the key already existed, and the caller is still master when
//! the key holds its own identity and no older key shares the prefix. That
//! covers a process re-asserting a claim it made earlier with a lease that
//! has not expired yet.

use tracing::warn;

use crate::store::{Compare, KeyValue, LeaseId, OpResponse, TxnOp, TxnRequest, TxnResponse};

/// How an acquisition transaction was classified
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// The key was absent and this attempt created it
    Created,
    /// The key already held this process's identity
    Reconfirmed,
    /// Someone else owns the key
    NotMaster,
}

impl AcquireOutcome {
    pub fn is_master(self) -> bool {
        matches!(self, AcquireOutcome::Created | AcquireOutcome::Reconfirmed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AcquireOutcome::Created => "created",
            AcquireOutcome::Reconfirmed => "reconfirmed",
            AcquireOutcome::NotMaster => "not_master",
        }
    }
}

/// Build the acquisition transaction for `key`
pub fn build_acquire_txn(key: &str, owner: &str, lease: LeaseId) -> TxnRequest {
    TxnRequest::new()
        .when(Compare::create_revision(key, 0))
        .and_then([TxnOp::put(key, owner, Some(lease)), TxnOp::first_created(key)])
        .or_else([TxnOp::get(key), TxnOp::first_created(key)])
}

fn first_kv(responses: &[OpResponse], index: usize) -> Option<&KeyValue> {
    responses
        .get(index)
        .and_then(OpResponse::kvs)
        .and_then(<[KeyValue]>::first)
}

/// Classify a committed acquisition transaction for `owner`
pub fn classify(response: &TxnResponse, owner: &str) -> AcquireOutcome {
    if response.succeeded {
        return AcquireOutcome::Created;
    }

    let Some(current) = first_kv(&response.responses, 0) else {
        warn!(
            revision = response.revision,
            "Acquire transaction returned no current owner, treating as not master"
        );
        return AcquireOutcome::NotMaster;
    };

    let same_generation = first_kv(&response.responses, 1)
        .is_none_or(|first| first.create_revision == current.create_revision);

    if same_generation && current.value == owner {
        AcquireOutcome::Reconfirmed
    } else {
        AcquireOutcome::NotMaster
    }
}

/// Whether `owner` is master according to `response`
pub fn is_lock_master(response: &TxnResponse, owner: &str) -> bool {
    classify(response, owner).is_master()
}
