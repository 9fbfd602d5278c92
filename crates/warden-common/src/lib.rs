//! Warden Common - Shared types, constants, and utilities
//!
//! This crate provides the foundational pieces used across all Warden components:
//! - Error types
//! - Node identity resolution
//! - Key validation
//! - Common defaults

pub mod error;
pub mod utils;

use std::time::Duration;

// Re-exports for convenience
pub use error::WardenError;
pub use utils::{local_identity, validate_key};

/// Endpoint used when none is configured: the shared in-process store named `default`
pub const DEFAULT_ENDPOINT: &str = "memory://default";

/// Default lease lifetime in seconds
pub const DEFAULT_TTL_SECS: u64 = 10;

/// Default time allowed for dialing the coordination store
pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(5);

/// Prefix applied to bare resource names to build contended keys
pub const DEFAULT_KEY_PREFIX: &str = "/warden/master/";

/// Identity used when neither the host name nor a local address can be resolved
pub const FALLBACK_IDENTITY: &str = "warden-node";

/// Maximum accepted length of a contended key, in bytes
pub const MAX_KEY_LEN: usize = 1024;

/// Build a contended key from a bare resource name.
///
/// Names that already start with `/` are treated as full keys and returned as-is.
pub fn master_key(name: &str) -> String {
    if name.starts_with('/') {
        name.to_string()
    } else {
        format!("{}{}", DEFAULT_KEY_PREFIX, name)
    }
}
