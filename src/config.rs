use crate::error::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};

const DEFAULT_PULL_INTERVAL_MS: u64 = 10_000;
const DEFAULT_STATUS_CACHE_MS: i64 = 0;

/// Load environment variables from a `.env` file if one exists.
/// Variables already set in the environment win.
pub fn load_dotenv() {
    if let Err(e) = dotenvy::dotenv()
        && !e.not_found()
    {
        log::warn!("Failed to load .env file: {}", e);
    }
}

/// Default accessory config location, `<config dir>/accessory-bridge/accessory.json`.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("accessory-bridge")
        .join("accessory.json")
}

/// Accessory configuration as written by the user.
///
/// URL and topic properties keep their raw JSON shape here; they are
/// validated by [`config_parser`](crate::config_parser) when the accessory
/// is set up.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessoryConfig {
    pub name: String,
    #[serde(default = "default_pull_interval")]
    pub pull_interval: u64,
    /// Status cache time in ms; negative caches forever.
    #[serde(default = "default_status_cache")]
    pub status_cache: Value,
    #[serde(default)]
    pub get_url: Option<Value>,
    #[serde(default)]
    pub status_pattern: Option<Value>,
    #[serde(default)]
    pub on_url: Option<Value>,
    #[serde(default)]
    pub off_url: Option<Value>,
    #[serde(default)]
    pub http_execution_strategy: Option<String>,
    #[serde(default)]
    pub mqtt: Option<Value>,
    #[serde(default)]
    pub mqtt_get_topic: Option<Value>,
    #[serde(default)]
    pub mqtt_set_topic: Option<Value>,
    #[serde(default, rename = "notificationID")]
    pub notification_id: Option<String>,
    #[serde(default)]
    pub notification_password: Option<String>,
}

fn default_pull_interval() -> u64 {
    DEFAULT_PULL_INTERVAL_MS
}

fn default_status_cache() -> Value {
    Value::from(DEFAULT_STATUS_CACHE_MS)
}

impl Default for AccessoryConfig {
    fn default() -> Self {
        Self {
            name: "Switch".to_string(),
            pull_interval: DEFAULT_PULL_INTERVAL_MS,
            status_cache: default_status_cache(),
            get_url: None,
            status_pattern: None,
            on_url: None,
            off_url: None,
            http_execution_strategy: None,
            mqtt: None,
            mqtt_get_topic: None,
            mqtt_set_topic: None,
            notification_id: None,
            notification_password: None,
        }
    }
}

impl AccessoryConfig {
    /// Read a config file and apply environment overrides.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let mut config: Self = serde_json::from_str(&content)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Defaults plus environment overrides, for running without a file.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_overrides(|key| std::env::var(key).ok());
        config
    }

    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(interval) = var("PULL_INTERVAL_MS")
            && let Ok(interval) = interval.parse()
        {
            self.pull_interval = interval;
        }
        if let Some(strategy) = var("HTTP_EXECUTION_STRATEGY") {
            self.http_execution_strategy = Some(strategy);
        }

        // broker overrides only patch an existing mqtt section or create a minimal one
        let host = var("MQTT_BROKER_HOST");
        let port = var("MQTT_BROKER_PORT").and_then(|p| p.parse::<u16>().ok());
        if host.is_none() && port.is_none() {
            return;
        }
        let mqtt = self
            .mqtt
            .get_or_insert_with(|| Value::Object(Default::default()));
        if let Value::Object(options) = mqtt {
            if let Some(host) = host {
                options.insert("host".to_string(), Value::from(host));
            }
            if let Some(port) = port {
                options.insert("port".to_string(), Value::from(port));
            }
        }
    }
}
