use clap::Parser;
use lib_events::SessionConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Config file read when `--config-path` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "server_events.conf";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file {0} does not exist")]
    Missing(PathBuf),

    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Parser, Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
#[clap(about = "Cluster event WebSocket streaming server", version)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[clap(long, env = "EVENTS_PORT", help = "Port to listen on for client connections.")]
    pub port: Option<u16>,

    #[clap(long, env = "EVENTS_CONFIG_PATH", help = "Path to the JSON configuration file.")]
    pub config_path: Option<PathBuf>,

    #[clap(long, env = "EVENTS_LOG_DIR", help = "Directory for log files.")]
    pub log_dir: Option<PathBuf>,

    #[clap(long, env = "EVENTS_LOG_LEVEL", help = "Logging level (trace, debug, info, warn, error).")]
    pub log_level: Option<String>,

    #[clap(long, env = "EVENTS_INVENTORY_PATH", help = "JSON file with clusters, instances, groups and seed events.")]
    pub inventory_path: Option<PathBuf>,

    #[clap(long, env = "EVENTS_VIEWER_TOKENS", value_delimiter = ',', help = "Bearer tokens allowed to open streams. Empty allows everyone.")]
    pub viewer_tokens: Option<Vec<String>>,

    #[clap(long, env = "EVENTS_MAX_FAILED", help = "Failed pushes tolerated before a session is closed.")]
    pub max_failed: Option<u32>,

    #[clap(long, env = "EVENTS_FAILURE_COOLDOWN_MS", help = "Pause in milliseconds after a failed push.")]
    pub failure_cooldown_ms: Option<u64>,

    #[clap(long, env = "EVENTS_WATCHDOG_INTERVAL_SECONDS", help = "Seconds between failure ceiling checks.")]
    pub watchdog_interval_seconds: Option<u64>,

    #[clap(long, env = "EVENTS_INSTANCE_KIND", help = "Object kind of group instances (e.g. Pod).")]
    pub instance_kind: Option<String>,

    #[clap(long, env = "EVENTS_GROUP_LABEL", help = "Instance label naming the group an instance belongs to.")]
    pub group_label: Option<String>,

    #[clap(long, env = "EVENTS_DEFAULT_NAMESPACE", help = "Namespace used when a group request names none.")]
    pub default_namespace: Option<String>,

    #[clap(long, env = "TLS_CERT_PATH", help = "Path to the TLS certificate file.")]
    pub tls_cert_path: Option<PathBuf>,

    #[clap(long, env = "TLS_KEY_PATH", help = "Path to the TLS private key file.")]
    pub tls_key_path: Option<PathBuf>,
}

impl Config {
    // Merge two Config structs, where 'other' overrides 'self' for Some values
    fn merge(self, other: Config) -> Config {
        Config {
            port: other.port.or(self.port),
            config_path: other.config_path.or(self.config_path),
            log_dir: other.log_dir.or(self.log_dir),
            log_level: other.log_level.or(self.log_level),
            inventory_path: other.inventory_path.or(self.inventory_path),
            viewer_tokens: other.viewer_tokens.or(self.viewer_tokens),
            max_failed: other.max_failed.or(self.max_failed),
            failure_cooldown_ms: other.failure_cooldown_ms.or(self.failure_cooldown_ms),
            watchdog_interval_seconds: other.watchdog_interval_seconds.or(self.watchdog_interval_seconds),
            instance_kind: other.instance_kind.or(self.instance_kind),
            group_label: other.group_label.or(self.group_label),
            default_namespace: other.default_namespace.or(self.default_namespace),
            tls_cert_path: other.tls_cert_path.or(self.tls_cert_path),
            tls_key_path: other.tls_key_path.or(self.tls_key_path),
        }
    }

    fn defaults() -> Config {
        let session = SessionConfig::default();
        Config {
            port: Some(9003),
            log_dir: Some(PathBuf::from("./logs")),
            log_level: Some("info".to_string()),
            max_failed: Some(session.max_failed),
            failure_cooldown_ms: Some(session.failure_cooldown.as_millis() as u64),
            watchdog_interval_seconds: Some(session.watchdog_interval.as_secs()),
            instance_kind: Some(session.instance_kind),
            group_label: Some("app".to_string()),
            default_namespace: Some("default".to_string()),
            ..Default::default()
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.tls_cert_path.is_some() != self.tls_key_path.is_some() {
            return Err(ConfigError::Invalid(
                "TLS needs both a certificate and a key".to_string(),
            ));
        }
        if self.watchdog_interval_seconds == Some(0) {
            return Err(ConfigError::Invalid(
                "watchdog interval must be at least one second".to_string(),
            ));
        }
        Ok(())
    }

    pub fn port(&self) -> u16 {
        self.port.unwrap_or(9003)
    }

    pub fn log_dir(&self) -> PathBuf {
        self.log_dir.clone().unwrap_or_else(|| PathBuf::from("./logs"))
    }

    pub fn log_level(&self) -> &str {
        self.log_level.as_deref().unwrap_or("info")
    }

    pub fn group_label(&self) -> &str {
        self.group_label.as_deref().unwrap_or("app")
    }

    pub fn default_namespace(&self) -> &str {
        self.default_namespace.as_deref().unwrap_or("default")
    }

    /// Configured tokens with blanks removed.
    pub fn viewer_tokens(&self) -> Vec<String> {
        self.viewer_tokens
            .iter()
            .flatten()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect()
    }

    pub fn session_config(&self) -> SessionConfig {
        let defaults = SessionConfig::default();
        SessionConfig {
            max_failed: self.max_failed.unwrap_or(defaults.max_failed),
            failure_cooldown: self
                .failure_cooldown_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.failure_cooldown),
            watchdog_interval: self
                .watchdog_interval_seconds
                .map(Duration::from_secs)
                .unwrap_or(defaults.watchdog_interval),
            instance_kind: self.instance_kind.clone().unwrap_or(defaults.instance_kind),
        }
    }
}

pub fn load_config() -> Result<Config, ConfigError> {
    load_with(Config::parse())
}

/// Layers defaults, then the config file, then `cli` (which already carries
/// environment variables).
pub fn load_with(cli: Config) -> Result<Config, ConfigError> {
    // 1. Load defaults
    let mut current_config = Config::defaults();

    // 2. Load from config file if present. An explicitly named file must exist.
    let config_file_path = cli
        .config_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

    if config_file_path.exists() {
        let config_str = fs::read_to_string(&config_file_path).map_err(|source| ConfigError::Read {
            path: config_file_path.clone(),
            source,
        })?;
        let file_config = serde_json::from_str::<Config>(&config_str).map_err(|source| ConfigError::Parse {
            path: config_file_path.clone(),
            source,
        })?;
        current_config = current_config.merge(file_config);
    } else if cli.config_path.is_some() {
        return Err(ConfigError::Missing(config_file_path));
    } else {
        log::info!(
            "Config file not found at {}. Using defaults and environment/CLI variables.",
            config_file_path.display()
        );
    }

    // 3. Override with environment variables and CLI arguments
    current_config = current_config.merge(cli);
    current_config.validate()?;
    Ok(current_config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn cli(args: &[&str]) -> Config {
        let mut argv = vec!["server_events"];
        argv.extend_from_slice(args);
        Config::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_file_overrides_defaults_and_cli_overrides_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{ "port": 7000, "maxFailed": 3, "viewerTokens": ["a", "b"], "logLevel": "debug" }}"#
        )
        .unwrap();
        let path = file.path().to_str().unwrap().to_string();

        let config = load_with(cli(&["--config-path", &path, "--port", "7100"])).unwrap();
        assert_eq!(config.port(), 7100);
        assert_eq!(config.max_failed, Some(3));
        assert_eq!(config.log_level(), "debug");
        assert_eq!(config.viewer_tokens(), vec!["a".to_string(), "b".to_string()]);
        // Untouched defaults survive both layers.
        assert_eq!(config.group_label(), "app");
    }

    #[test]
    fn test_named_config_file_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.conf");
        let err = load_with(cli(&["--config-path", missing.to_str().unwrap()])).unwrap_err();
        assert!(matches!(err, ConfigError::Missing(_)));
    }

    #[test]
    fn test_malformed_config_file_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ not json").unwrap();
        let err = load_with(cli(&["--config-path", file.path().to_str().unwrap()])).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_tls_requires_both_paths() {
        let err = load_with(cli(&["--tls-cert-path", "/tmp/cert.pem"])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_session_config_conversion() {
        let config = cli(&[
            "--max-failed",
            "4",
            "--failure-cooldown-ms",
            "250",
            "--watchdog-interval-seconds",
            "2",
            "--viewer-tokens",
            "x, ,y",
        ]);
        let session = config.session_config();
        assert_eq!(session.max_failed, 4);
        assert_eq!(session.failure_cooldown, Duration::from_millis(250));
        assert_eq!(session.watchdog_interval, Duration::from_secs(2));
        assert_eq!(session.instance_kind, "Pod");
        assert_eq!(config.viewer_tokens(), vec!["x".to_string(), "y".to_string()]);
    }
}
