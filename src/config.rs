use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

use crate::detection::scenario::{default_login_paths, PageScan, UserEnumeration};

/// Configuration for the leakwatch daemon
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Engine-wide settings
    pub engine: EngineConfig,
    /// Scenario selection
    pub scenarios: ScenariosConfig,
    /// Signal push pipeline
    pub push: PushConfig,
    /// Event store location
    pub persistence: PersistenceConfig,
    /// Access log input
    pub input: InputConfig,
    /// Where signals are delivered
    pub sink: SinkConfig,
    /// Request bouncing
    pub bounce: BounceConfig,
    /// Alert side effects
    pub alerting: AlertConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Remediation duration in seconds when an event carries none
    pub ban_duration: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScenariosConfig {
    /// Names of the scenarios to run
    pub enabled: Vec<String>,
    /// Paths treated as login endpoints by user enumeration
    pub login_paths: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PushConfig {
    /// Sleep between two push attempts
    pub interval_seconds: u64,
    /// Maximum number of signals in one batch
    pub max_signals: usize,
    /// Events failing this many times are no longer retried
    pub max_error_count: u32,
    /// Minimum number of seconds between two pushes
    pub push_time_delay: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    /// Path to the SQLite database
    pub db_path: PathBuf,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    /// Access log in combined format to follow
    pub access_log: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SinkConfig {
    /// "http" or "file"
    pub kind: String,
    /// Collector endpoint (kind = "http")
    pub url: Option<String>,
    /// Identifier sent along with every batch
    pub machine_id: String,
    /// Bearer token for the collector
    pub api_key: Option<String>,
    pub timeout_seconds: u64,
    /// Output file (kind = "file"); signals go to stdout when unset
    pub file_path: Option<PathBuf>,
    /// "json", "jsonl" or "console" (kind = "file")
    pub format: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BounceConfig {
    pub enabled: bool,
    /// Ban page body, `{{ip}}` is replaced by the client address
    pub ban_template: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    pub enabled: bool,
    /// Ban triggering addresses in the local decision cache
    pub local_ban: bool,
    pub webhooks: Vec<WebhookConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    pub name: String,
    pub url: String,
    pub method: Option<String>,
    pub headers: Option<HashMap<String, String>>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig { ban_duration: 3600 }
    }
}

impl Default for ScenariosConfig {
    fn default() -> Self {
        ScenariosConfig {
            enabled: vec![PageScan::NAME.to_string(), UserEnumeration::NAME.to_string()],
            login_paths: default_login_paths(),
        }
    }
}

impl PushConfig {
    /// Number of 100 ms naps making up one push interval, at least one
    pub fn sleep_ticks(&self) -> u64 {
        self.interval_seconds.max(1).saturating_mul(10)
    }
}

impl Default for PushConfig {
    fn default() -> Self {
        PushConfig {
            interval_seconds: 10,
            max_signals: 250,
            max_error_count: 5,
            push_time_delay: 10,
        }
    }
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        PersistenceConfig {
            db_path: PathBuf::from("leakwatch.db"),
        }
    }
}

impl Default for SinkConfig {
    fn default() -> Self {
        SinkConfig {
            kind: "file".to_string(),
            url: None,
            machine_id: "leakwatch".to_string(),
            api_key: None,
            timeout_seconds: 10,
            file_path: Some(PathBuf::from("signals.jsonl")),
            format: "jsonl".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to a file
    pub fn to_file(&self, path: &PathBuf) -> Result<(), Box<dyn std::error::Error>> {
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }
}
