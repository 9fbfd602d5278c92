//! Warden server - runs lock contenders as a standalone process
//!
//! The binary loads configuration, installs logging, and polls one or more
//! lock handles until Ctrl+C or SIGTERM.

pub mod contender; // Contender poll loop
pub mod model; // Configuration and constants
pub mod startup; // Logging and shutdown
