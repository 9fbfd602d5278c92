//! Data models module
//!
//! - `constants` - Configuration keys and defaults
//! - `config` - Configuration loading and typed accessors

pub mod config;
pub mod constants;

pub use self::config::{Cli, Configuration};
pub use self::constants::*;
