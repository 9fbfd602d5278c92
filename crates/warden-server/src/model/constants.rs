//! Configuration keys and defaults for the warden server

/// Default configuration file, optional
pub const DEFAULT_CONFIG_FILE: &str = "conf/application.yml";

/// Environment variables with this prefix override file settings
pub const ENV_PREFIX: &str = "WARDEN__";
/// Separator for nested keys in environment variable names
pub const ENV_SEPARATOR: &str = "__";

pub const ENDPOINT_PROPERTY: &str = "warden.endpoint";
pub const LOCK_KEY_PROPERTY: &str = "warden.lock.key";
pub const LOCK_TTL_PROPERTY: &str = "warden.lock.ttl";
pub const LOCK_IDENTITY_PROPERTY: &str = "warden.lock.identity";
pub const POLL_INTERVAL_PROPERTY: &str = "warden.poll.interval_ms";
pub const CONTENDERS_PROPERTY: &str = "warden.contenders";
pub const LOGS_PATH_PROPERTY: &str = "warden.logs.path";
pub const LOGS_LEVEL_PROPERTY: &str = "warden.logs.level";
pub const LOGS_FILE_PROPERTY: &str = "warden.logs.file";
pub const LOGS_CONSOLE_PROPERTY: &str = "warden.logs.console";
pub const LOGS_ROTATION_PROPERTY: &str = "warden.logs.rotation";
pub const STORE_SCAN_INTERVAL_PROPERTY: &str = "warden.store.scan_interval_ms";

pub const DEFAULT_LOCK_NAME: &str = "default";
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;
pub const DEFAULT_CONTENDERS: usize = 1;
pub const DEFAULT_LOG_LEVEL: &str = "info";
pub const DEFAULT_SCAN_INTERVAL_MS: u64 = 1000;
