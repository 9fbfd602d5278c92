//! Error types for Warden
//!
//! `WardenError` covers failures that are not specific to the coordination
//! store or to the lock protocol, mostly argument and configuration problems.

/// Argument and configuration errors
#[derive(thiserror::Error, Debug)]
pub enum WardenError {
    #[error("illegal argument: {0}")]
    IllegalArgument(String),

    #[error("configuration error: {0}")]
    ConfigError(String),
}
