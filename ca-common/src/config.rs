//! Bootstrap configuration loading
//!
//! The orchestrator reads a single TOML file at startup. The file is located
//! using this priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. `~/.config/content-analysis/config.toml`
//! 4. `/etc/content-analysis/config.toml` (Linux)
//!
//! When no file is found, built-in defaults are used.

use crate::model::{Backend, BackendId, Capability, DataGroup, DataGroups};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Directory name used under the platform config and data directories
pub const APP_DIR_NAME: &str = "content-analysis";

/// Bootstrap configuration loaded from TOML file
///
/// These settings cannot change during runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TomlConfig {
    /// HTTP server port
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Externally reachable base URL, used to build the callback URI sent to backends
    #[serde(default)]
    pub public_url: Option<String>,

    /// Path to SQLite database file (OS data directory when absent)
    #[serde(default)]
    pub database_path: Option<PathBuf>,

    /// Delay before a scheduled task is delivered; 0 or negative runs it immediately
    #[serde(default)]
    pub task_delay_ms: i64,

    /// Interval of the sweep re-scheduling undelivered tasks; 0 disables it
    #[serde(default = "default_retry_sweep_interval_secs")]
    pub retry_sweep_interval_secs: u64,

    #[serde(default = "default_delivery_timeout_secs")]
    pub delivery_timeout_secs: u64,

    #[serde(default = "default_search_timeout_secs")]
    pub search_timeout_secs: u64,

    /// Maximum total time a write is retried while the database is locked
    #[serde(default = "default_max_lock_wait_ms")]
    pub database_max_lock_wait_ms: u64,

    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,

    /// Logging configuration (optional)
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Backends registered at startup
    #[serde(default)]
    pub backends: Vec<BackendConfig>,
}

impl Default for TomlConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind_address: default_bind_address(),
            public_url: None,
            database_path: None,
            task_delay_ms: 0,
            retry_sweep_interval_secs: default_retry_sweep_interval_secs(),
            delivery_timeout_secs: default_delivery_timeout_secs(),
            search_timeout_secs: default_search_timeout_secs(),
            database_max_lock_wait_ms: default_max_lock_wait_ms(),
            event_capacity: default_event_capacity(),
            logging: LoggingConfig::default(),
            backends: Vec::new(),
        }
    }
}

impl TomlConfig {
    /// Base URL backends use to reach this service
    pub fn callback_base_url(&self) -> String {
        match &self.public_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => format!("http://{}:{}", self.bind_address, self.port),
        }
    }

    /// Database path, falling back to the OS data directory
    pub fn resolved_database_path(&self) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(default_database_path)
    }

    /// Reject settings that cannot work
    pub fn validate(&self) -> Result<()> {
        if self.event_capacity == 0 {
            return Err(Error::Config("event_capacity must be positive".to_string()));
        }
        if self.search_timeout_secs == 0 || self.delivery_timeout_secs == 0 {
            return Err(Error::Config("timeouts must be positive".to_string()));
        }
        let mut seen = std::collections::HashSet::new();
        for backend in &self.backends {
            if !seen.insert(backend.backend_id) {
                return Err(Error::Config(format!(
                    "backend {} configured twice",
                    backend.backend_id
                )));
            }
            if backend.endpoint.trim().is_empty() {
                return Err(Error::Config(format!(
                    "backend {} has no endpoint",
                    backend.backend_id
                )));
            }
        }
        Ok(())
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level or filter directive (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log file path (optional, logs to stderr if not specified)
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

/// Backend registry entry as written in the config file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    pub backend_id: BackendId,
    pub endpoint: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub capabilities: Vec<Capability>,
    #[serde(default = "default_data_groups")]
    pub default_data_groups: Vec<DataGroup>,
    #[serde(default)]
    pub description: Option<String>,
}

impl BackendConfig {
    pub fn data_groups(&self) -> DataGroups {
        DataGroups::new(self.default_data_groups.iter().copied())
    }

    /// Registry entry for this configured backend
    pub fn to_backend(&self) -> Backend {
        Backend {
            backend_id: self.backend_id,
            endpoint: self.endpoint.clone(),
            enabled: self.enabled,
            capabilities: self.capabilities.iter().copied().collect(),
            default_data_groups: self.data_groups(),
            description: self.description.clone(),
        }
    }
}

fn default_port() -> u16 {
    5780
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_retry_sweep_interval_secs() -> u64 {
    300
}

fn default_delivery_timeout_secs() -> u64 {
    30
}

fn default_search_timeout_secs() -> u64 {
    10
}

fn default_max_lock_wait_ms() -> u64 {
    5000
}

fn default_event_capacity() -> usize {
    256
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_enabled() -> bool {
    true
}

fn default_data_groups() -> Vec<DataGroup> {
    vec![DataGroup::Basic]
}

/// Locate the config file
///
/// Returns `None` when neither an explicit path nor a default file exists.
pub fn resolve_config_path(cli_arg: Option<&Path>, env_var_name: &str) -> Option<PathBuf> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(env_var_name) {
        if !path.is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    // Priority 3/4: platform locations
    let user_config = dirs::config_dir().map(|d| d.join(APP_DIR_NAME).join("config.toml"));
    if let Some(path) = user_config {
        if path.exists() {
            return Some(path);
        }
    }

    if cfg!(target_os = "linux") {
        let system_config = PathBuf::from("/etc").join(APP_DIR_NAME).join("config.toml");
        if system_config.exists() {
            return Some(system_config);
        }
    }

    None
}

/// Read and parse a TOML config file
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    let content = std::fs::read_to_string(path)?;
    let config: TomlConfig = toml::from_str(&content)
        .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
    config.validate()?;
    Ok(config)
}

/// Load the config from the resolved location, or defaults when there is none
pub fn load_or_default(cli_arg: Option<&Path>, env_var_name: &str) -> Result<TomlConfig> {
    match resolve_config_path(cli_arg, env_var_name) {
        Some(path) => {
            tracing::info!(path = %path.display(), "Loading configuration");
            load_toml_config(&path)
        }
        None => {
            tracing::info!("No configuration file found, using built-in defaults");
            Ok(TomlConfig::default())
        }
    }
}

/// Get OS-dependent default database path
pub fn default_database_path() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join(APP_DIR_NAME))
        .unwrap_or_else(|| PathBuf::from("./ca_data"))
        .join("ca.db")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    const ENV_VAR: &str = "CA_TEST_CONFIG_PATH";

    #[test]
    fn test_defaults_when_fields_missing() {
        let config: TomlConfig = toml::from_str("").unwrap();
        assert_eq!(config.port, 5780);
        assert_eq!(config.search_timeout_secs, 10);
        assert_eq!(config.logging.level, "info");
        assert!(config.backends.is_empty());
        assert_eq!(config.callback_base_url(), "http://127.0.0.1:5780");
    }

    #[test]
    fn test_parse_backends() {
        let config: TomlConfig = toml::from_str(
            r#"
            port = 6000
            public_url = "https://ca.example.org/"

            [[backends]]
            backend_id = 1
            endpoint = "http://analysis-1:8080/rest/"
            capabilities = ["PHOTO_ANALYSIS", "USER_FEEDBACK", "BACKEND_FEEDBACK"]
            default_data_groups = ["basic", "keywords"]

            [[backends]]
            backend_id = 2
            endpoint = "http://search-1:8080/rest/"
            enabled = false
            capabilities = ["PHOTO_SEARCH"]
            "#,
        )
        .unwrap();

        assert!(config.validate().is_ok());
        assert_eq!(config.callback_base_url(), "https://ca.example.org");
        assert_eq!(config.backends.len(), 2);
        assert!(config.backends[0].data_groups().contains(DataGroup::Keywords));
        assert!(!config.backends[1].enabled);
        assert_eq!(config.backends[1].default_data_groups, vec![DataGroup::Basic]);

        let backend = config.backends[0].to_backend();
        assert!(backend.has_all_capabilities(&crate::model::DEFAULT_CAPABILITIES));
        assert_eq!(backend.method_uri("addTask"), "http://analysis-1:8080/rest/addTask");
    }

    #[test]
    fn test_validate_rejects_duplicate_backend() {
        let config: TomlConfig = toml::from_str(
            r#"
            [[backends]]
            backend_id = 1
            endpoint = "http://a/"

            [[backends]]
            backend_id = 1
            endpoint = "http://b/"
            "#,
        )
        .unwrap();

        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    #[serial]
    fn test_cli_path_wins_over_env() {
        std::env::set_var(ENV_VAR, "/from/env.toml");
        let resolved = resolve_config_path(Some(Path::new("/from/cli.toml")), ENV_VAR);
        assert_eq!(resolved, Some(PathBuf::from("/from/cli.toml")));

        let resolved = resolve_config_path(None, ENV_VAR);
        assert_eq!(resolved, Some(PathBuf::from("/from/env.toml")));
        std::env::remove_var(ENV_VAR);
    }

    #[test]
    #[serial]
    fn test_load_toml_config_from_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        std::fs::write(&path, "port = 7001\ntask_delay_ms = 250\n").unwrap();

        let config = load_toml_config(&path).unwrap();
        assert_eq!(config.port, 7001);
        assert_eq!(config.task_delay_ms, 250);

        std::fs::write(&path, "port = \"not a number\"").unwrap();
        assert!(matches!(load_toml_config(&path), Err(Error::Config(_))));
    }
}
