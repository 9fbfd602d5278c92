//! Utility functions for Warden
//!
//! Identity resolution and key validation helpers.

use if_addrs::IfAddr;

use crate::error::WardenError;
use crate::{FALLBACK_IDENTITY, MAX_KEY_LEN};

/// Validate a contended key
///
/// A valid key is non-empty, contains no whitespace or control characters,
/// and is at most [`MAX_KEY_LEN`] bytes long.
///
/// # Examples
///
/// ```
/// use warden_common::validate_key;
///
/// assert!(validate_key("/warden/master/scheduler").is_ok());
/// assert!(validate_key("").is_err());
/// assert!(validate_key("with spaces").is_err());
/// ```
pub fn validate_key(key: &str) -> Result<(), WardenError> {
    if key.is_empty() {
        return Err(WardenError::IllegalArgument("key is empty".to_string()));
    }
    if key.len() > MAX_KEY_LEN {
        return Err(WardenError::IllegalArgument(format!(
            "key is {} bytes, limit is {}",
            key.len(),
            MAX_KEY_LEN
        )));
    }
    if key.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(WardenError::IllegalArgument(format!(
            "key '{}' contains whitespace or control characters",
            key.escape_debug()
        )));
    }
    Ok(())
}

/// Resolve this process's stable identity
///
/// Uses the host name, then the first non-loopback IPv4 address,
/// then [`FALLBACK_IDENTITY`].
pub fn local_identity() -> String {
    hostname::get()
        .ok()
        .map(|h| h.to_string_lossy().to_string())
        .filter(|h| !h.is_empty())
        .or_else(first_ipv4)
        .unwrap_or_else(|| FALLBACK_IDENTITY.to_string())
}

fn first_ipv4() -> Option<String> {
    if_addrs::get_if_addrs().ok().and_then(|addrs| {
        addrs
            .into_iter()
            .find(|iface| !iface.is_loopback() && matches!(iface.addr, IfAddr::V4(_)))
            .and_then(|iface| match iface.addr {
                IfAddr::V4(addr) => Some(addr.ip.to_string()),
                _ => None,
            })
    })
}
