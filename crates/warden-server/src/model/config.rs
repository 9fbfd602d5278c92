//! Configuration management for the warden server
//!
//! Sources, lowest precedence first:
//! 1. `conf/application.yml` (optional)
//! 2. `WARDEN__`-prefixed environment variables, `__` between key segments
//!    (`WARDEN__LOCK__TTL=5` sets `warden.lock.ttl`)
//! 3. Command line flags

use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use config::{Config, Environment, File};
use warden_common::{DEFAULT_ENDPOINT, DEFAULT_TTL_SECS, master_key};

use super::constants::{
    CONTENDERS_PROPERTY, DEFAULT_CONFIG_FILE, DEFAULT_CONTENDERS, DEFAULT_LOCK_NAME,
    DEFAULT_LOG_LEVEL, DEFAULT_POLL_INTERVAL_MS, DEFAULT_SCAN_INTERVAL_MS, ENDPOINT_PROPERTY,
    ENV_PREFIX, ENV_SEPARATOR, LOCK_IDENTITY_PROPERTY, LOCK_KEY_PROPERTY, LOCK_TTL_PROPERTY,
    LOGS_CONSOLE_PROPERTY, LOGS_FILE_PROPERTY, LOGS_LEVEL_PROPERTY, LOGS_PATH_PROPERTY,
    LOGS_ROTATION_PROPERTY, POLL_INTERVAL_PROPERTY, STORE_SCAN_INTERVAL_PROPERTY,
};
use crate::startup::{LogRotation, LoggingConfig};

/// Command line arguments for the server
#[derive(Debug, Parser)]
#[command(name = "warden", version, about = "Contend for a master lock")]
pub struct Cli {
    /// Configuration file
    #[arg(short = 'c', long = "config", default_value = DEFAULT_CONFIG_FILE)]
    pub config_file: String,
    /// Coordination store endpoint, e.g. memory://default
    #[arg(short = 'e', long = "endpoint")]
    pub endpoint: Option<String>,
    /// Lock name or full key
    #[arg(short = 'k', long = "key")]
    pub key: Option<String>,
    /// Lease TTL in seconds
    #[arg(short = 't', long = "ttl")]
    pub ttl: Option<u64>,
    /// Owner identity written to the key
    #[arg(short = 'i', long = "identity")]
    pub identity: Option<String>,
    /// Acquisition attempt interval in milliseconds
    #[arg(long = "interval")]
    pub interval: Option<u64>,
    /// Number of contending handles in this process
    #[arg(short = 'n', long = "contenders")]
    pub contenders: Option<u64>,
}

/// Application configuration loaded from config files and environment
#[derive(Clone, Debug, Default)]
pub struct Configuration {
    pub config: Config,
}

impl Configuration {
    /// Load configuration from the process arguments and environment
    pub fn new() -> anyhow::Result<Self> {
        let args = Cli::parse();
        let env: config::Map<String, String> = std::env::vars()
            .filter(|(name, _)| name.starts_with(ENV_PREFIX))
            .collect();
        Self::load(args, env)
    }

    /// Load configuration from parsed arguments and a set of environment variables
    pub fn load(args: Cli, env: config::Map<String, String>) -> anyhow::Result<Self> {
        let mut config_builder = Config::builder()
            .add_source(File::with_name(&args.config_file).required(false))
            .add_source(
                Environment::default()
                    .separator(ENV_SEPARATOR)
                    .try_parsing(true)
                    .source(Some(env)),
            );

        if let Some(v) = args.endpoint {
            config_builder = config_builder.set_override(ENDPOINT_PROPERTY, v)?;
        }
        if let Some(v) = args.key {
            config_builder = config_builder.set_override(LOCK_KEY_PROPERTY, v)?;
        }
        if let Some(v) = args.ttl {
            config_builder = config_builder.set_override(LOCK_TTL_PROPERTY, v)?;
        }
        if let Some(v) = args.identity {
            config_builder = config_builder.set_override(LOCK_IDENTITY_PROPERTY, v)?;
        }
        if let Some(v) = args.interval {
            config_builder = config_builder.set_override(POLL_INTERVAL_PROPERTY, v)?;
        }
        if let Some(v) = args.contenders {
            config_builder = config_builder.set_override(CONTENDERS_PROPERTY, v)?;
        }

        let config = config_builder
            .build()
            .with_context(|| format!("failed to load configuration from {}", args.config_file))?;

        Ok(Configuration { config })
    }

    // ========================================================================
    // Lock Configuration
    // ========================================================================

    pub fn endpoint(&self) -> String {
        self.config
            .get_string(ENDPOINT_PROPERTY)
            .unwrap_or(DEFAULT_ENDPOINT.to_string())
    }

    /// Contended key; bare names get the default prefix
    pub fn lock_key(&self) -> String {
        let name = self
            .config
            .get_string(LOCK_KEY_PROPERTY)
            .unwrap_or(DEFAULT_LOCK_NAME.to_string());
        master_key(&name)
    }

    pub fn lock_ttl_secs(&self) -> u64 {
        self.config
            .get_int(LOCK_TTL_PROPERTY)
            .ok()
            .and_then(|v| u64::try_from(v).ok())
            .unwrap_or(DEFAULT_TTL_SECS)
    }

    pub fn lock_identity(&self) -> Option<String> {
        self.config
            .get_string(LOCK_IDENTITY_PROPERTY)
            .ok()
            .filter(|v| !v.is_empty())
    }

    // ========================================================================
    // Contender Configuration
    // ========================================================================

    pub fn poll_interval(&self) -> Duration {
        let millis = self
            .config
            .get_int(POLL_INTERVAL_PROPERTY)
            .ok()
            .and_then(|v| u64::try_from(v).ok())
            .filter(|v| *v > 0)
            .unwrap_or(DEFAULT_POLL_INTERVAL_MS);
        Duration::from_millis(millis)
    }

    pub fn contenders(&self) -> usize {
        self.config
            .get_int(CONTENDERS_PROPERTY)
            .ok()
            .and_then(|v| usize::try_from(v).ok())
            .filter(|v| *v > 0)
            .unwrap_or(DEFAULT_CONTENDERS)
    }

    /// Expiry scan period for in-memory stores; `None` when set to 0
    pub fn store_scan_interval(&self) -> Option<Duration> {
        let millis = self
            .config
            .get_int(STORE_SCAN_INTERVAL_PROPERTY)
            .unwrap_or(DEFAULT_SCAN_INTERVAL_MS as i64);
        u64::try_from(millis)
            .ok()
            .filter(|v| *v > 0)
            .map(Duration::from_millis)
    }

    // ========================================================================
    // Logging Configuration
    // ========================================================================

    pub fn logging_config(&self) -> LoggingConfig {
        let rotation = self
            .config
            .get_string(LOGS_ROTATION_PROPERTY)
            .ok()
            .and_then(|v| v.parse::<LogRotation>().ok())
            .unwrap_or(LogRotation::Daily);

        LoggingConfig::from_config(
            self.config.get_string(LOGS_PATH_PROPERTY).ok(),
            self.config.get_bool(LOGS_CONSOLE_PROPERTY).unwrap_or(true),
            self.config.get_bool(LOGS_FILE_PROPERTY).unwrap_or(false),
            self.config
                .get_string(LOGS_LEVEL_PROPERTY)
                .unwrap_or(DEFAULT_LOG_LEVEL.to_string()),
        )
        .with_rotation(rotation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::TempDir;
    use tracing::Level;

    fn args(config_file: &str, flags: &[&str]) -> Cli {
        let mut argv = vec!["warden", "--config", config_file];
        argv.extend_from_slice(flags);
        Cli::try_parse_from(argv).unwrap()
    }

    fn no_env() -> config::Map<String, String> {
        config::Map::new()
    }

    fn write_config(dir: &TempDir, contents: &str) -> String {
        let path = dir.path().join("application.yml");
        std::fs::write(&path, contents).unwrap();
        path.to_string_lossy().into_owned()
    }

    #[test]
    fn test_defaults_without_config_file() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("missing.yml");
        let configuration =
            Configuration::load(args(&missing.to_string_lossy(), &[]), no_env()).unwrap();

        assert_eq!(configuration.endpoint(), DEFAULT_ENDPOINT);
        assert_eq!(configuration.lock_key(), "/warden/master/default");
        assert_eq!(configuration.lock_ttl_secs(), DEFAULT_TTL_SECS);
        assert_eq!(configuration.lock_identity(), None);
        assert_eq!(configuration.poll_interval(), Duration::from_secs(1));
        assert_eq!(configuration.contenders(), 1);
        assert_eq!(
            configuration.store_scan_interval(),
            Some(Duration::from_secs(1))
        );
    }

    #[test]
    fn test_values_from_file() {
        let dir = TempDir::new().unwrap();
        let file = write_config(
            &dir,
            r#"
warden:
  endpoint: "memory://orders"
  contenders: 3
  lock:
    key: "scheduler"
    ttl: 4
    identity: "node-a"
  poll:
    interval_ms: 250
  store:
    scan_interval_ms: 0
  logs:
    path: "/var/log/warden"
    level: "debug"
    file: true
    rotation: "hourly"
"#,
        );
        let configuration = Configuration::load(args(&file, &[]), no_env()).unwrap();

        assert_eq!(configuration.endpoint(), "memory://orders");
        assert_eq!(configuration.lock_key(), "/warden/master/scheduler");
        assert_eq!(configuration.lock_ttl_secs(), 4);
        assert_eq!(configuration.lock_identity().as_deref(), Some("node-a"));
        assert_eq!(configuration.poll_interval(), Duration::from_millis(250));
        assert_eq!(configuration.contenders(), 3);
        assert_eq!(configuration.store_scan_interval(), None);

        let logging = configuration.logging_config();
        assert_eq!(logging.log_dir, PathBuf::from("/var/log/warden"));
        assert!(logging.file_logging);
        assert!(logging.console_output);
        assert_eq!(logging.console_level, Level::DEBUG);
        assert!(matches!(logging.rotation, LogRotation::Hourly));
    }

    #[test]
    fn test_environment_overrides_file() {
        let dir = TempDir::new().unwrap();
        let file = write_config(
            &dir,
            r#"
warden:
  lock:
    ttl: 4
"#,
        );
        let env = config::Map::from([
            ("WARDEN__LOCK__TTL".to_string(), "7".to_string()),
            ("WARDEN__ENDPOINT".to_string(), "memory://env".to_string()),
        ]);
        let configuration = Configuration::load(args(&file, &[]), env).unwrap();

        assert_eq!(configuration.lock_ttl_secs(), 7);
        assert_eq!(configuration.endpoint(), "memory://env");
    }

    #[test]
    fn test_flags_override_everything() {
        let dir = TempDir::new().unwrap();
        let file = write_config(
            &dir,
            r#"
warden:
  endpoint: "memory://file"
  lock:
    key: "file-key"
    ttl: 4
"#,
        );
        let env = config::Map::from([("WARDEN__LOCK__TTL".to_string(), "7".to_string())]);
        let flags = [
            "--endpoint",
            "memory://flag",
            "--key",
            "/custom/leader",
            "--ttl",
            "9",
            "--identity",
            "node-z",
            "--interval",
            "50",
            "--contenders",
            "2",
        ];
        let configuration = Configuration::load(args(&file, &flags), env).unwrap();

        assert_eq!(configuration.endpoint(), "memory://flag");
        assert_eq!(configuration.lock_key(), "/custom/leader");
        assert_eq!(configuration.lock_ttl_secs(), 9);
        assert_eq!(configuration.lock_identity().as_deref(), Some("node-z"));
        assert_eq!(configuration.poll_interval(), Duration::from_millis(50));
        assert_eq!(configuration.contenders(), 2);
    }

    #[test]
    fn test_invalid_values_fall_back_to_defaults() {
        let dir = TempDir::new().unwrap();
        let file = write_config(
            &dir,
            r#"
warden:
  contenders: 0
  poll:
    interval_ms: 0
  lock:
    ttl: -3
    identity: ""
"#,
        );
        let configuration = Configuration::load(args(&file, &[]), no_env()).unwrap();

        assert_eq!(configuration.contenders(), DEFAULT_CONTENDERS);
        assert_eq!(
            configuration.poll_interval(),
            Duration::from_millis(DEFAULT_POLL_INTERVAL_MS)
        );
        assert_eq!(configuration.lock_ttl_secs(), DEFAULT_TTL_SECS);
        assert_eq!(configuration.lock_identity(), None);
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let file = write_config(&dir, "warden: [unterminated");
        let err = Configuration::load(args(&file, &[]), no_env()).unwrap_err();
        assert!(err.to_string().contains("failed to load configuration"));
    }
}
