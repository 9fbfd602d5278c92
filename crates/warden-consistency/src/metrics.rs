// Metrics for lock acquisition and lease renewal
// Recorded through the `metrics` facade; the host process installs the recorder

use metrics::{counter, describe_counter, describe_gauge, gauge};

pub const ACQUIRE_TOTAL: &str = "warden_lock_acquire_total";
pub const IS_MASTER: &str = "warden_lock_is_master";
pub const KEEPALIVE_FAILURES_TOTAL: &str = "warden_lease_keepalive_failures_total";

/// Register metric descriptions with the installed recorder
/// Call once at startup, after the recorder is installed
pub fn describe_metrics() {
    describe_counter!(
        ACQUIRE_TOTAL,
        "Total number of acquisition attempts by outcome"
    );
    describe_gauge!(
        IS_MASTER,
        "Set to 1 once this process has observed mastery of the key"
    );
    describe_counter!(
        KEEPALIVE_FAILURES_TOTAL,
        "Total number of failed lease renewals"
    );
}

/// Record one acquisition attempt
pub fn record_acquire(outcome: &'static str) {
    counter!(ACQUIRE_TOTAL, "outcome" => outcome).increment(1);
}

/// Mark the key as mastered by this process
pub fn set_master(key: &str) {
    gauge!(IS_MASTER, "key" => key.to_string()).set(1.0);
}

/// Record a failed lease renewal
pub fn record_keepalive_failure(key: &str) {
    counter!(KEEPALIVE_FAILURES_TOTAL, "key" => key.to_string()).increment(1);
}
