//! Process settings with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`Settings::default()`]
//! 2. If a settings file was given, deep-merge its values over the defaults
//! 3. Apply `POLICYD_*` environment overrides
//!
//! Command line flags are applied last, by `main`.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use policy_server::ServerConfig;
use policy_telemetry::{default_data_dir, TelemetryConfig};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::Level;

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("failed to read settings file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse settings JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid log level: {0:?}")]
    InvalidLogLevel(String),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Default level, e.g. `"info"`. `RUST_LOG` still wins when set.
    pub level: String,
    /// JSON lines on stdout instead of the human-readable format.
    pub json: bool,
    /// Persist warn+ records to a SQLite log database.
    pub persist: bool,
    pub db_path: PathBuf,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            persist: true,
            db_path: default_data_dir().join("logs.db"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub server: ServerConfig,
    /// Policy database file, or `:memory:`.
    pub database_path: PathBuf,
    pub logging: LoggingSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            database_path: default_data_dir().join("policies.db"),
            logging: LoggingSettings::default(),
        }
    }
}

/// An environment variable that was set but could not be used.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IgnoredEnvVar {
    pub key: &'static str,
    pub value: String,
}

impl Settings {
    /// Telemetry config for these settings.
    pub fn telemetry_config(&self) -> Result<TelemetryConfig, SettingsError> {
        let log_level = Level::from_str(&self.logging.level)
            .map_err(|_| SettingsError::InvalidLogLevel(self.logging.level.clone()))?;
        Ok(TelemetryConfig {
            log_level,
            module_levels: Vec::new(),
            json: self.logging.json,
            log_to_sqlite: self.logging.persist,
            log_db_path: self.logging.db_path.clone(),
        })
    }

    /// Apply `POLICYD_*` overrides read through `env`.
    ///
    /// Unparseable values are skipped and returned so the caller can log
    /// them once a subscriber is installed.
    pub fn apply_env_overrides(
        &mut self,
        env: impl Fn(&str) -> Option<String>,
    ) -> Vec<IgnoredEnvVar> {
        let mut ignored = Vec::new();
        let read = |key: &'static str| -> Option<(String, &'static str)> {
            env(key).filter(|v| !v.is_empty()).map(|v| (v, key))
        };

        if let Some((v, _)) = read("POLICYD_HOST") {
            self.server.host = v;
        }
        if let Some((v, key)) = read("POLICYD_PORT") {
            match v.parse::<u16>() {
                Ok(port) => self.server.port = port,
                Err(_) => ignored.push(IgnoredEnvVar { key, value: v }),
            }
        }
        if let Some((v, _)) = read("POLICYD_DATABASE") {
            self.database_path = PathBuf::from(v);
        }
        if let Some((v, _)) = read("POLICYD_LOG_LEVEL") {
            self.logging.level = v;
        }
        if let Some((v, key)) = read("POLICYD_LOG_JSON") {
            match parse_bool(&v) {
                Some(json) => self.logging.json = json,
                None => ignored.push(IgnoredEnvVar { key, value: v }),
            }
        }
        if let Some((v, key)) = read("POLICYD_HEARTBEAT_SECS") {
            match v.parse::<u64>() {
                Ok(secs) => self.server.heartbeat_interval_secs = secs,
                Err(_) => ignored.push(IgnoredEnvVar { key, value: v }),
            }
        }
        ignored
    }
}

/// Load defaults, then the optional settings file, then the process environment.
pub fn load(path: Option<&Path>) -> Result<(Settings, Vec<IgnoredEnvVar>), SettingsError> {
    let mut settings = load_file(path)?;
    let ignored = settings.apply_env_overrides(|key| std::env::var(key).ok());
    Ok((settings, ignored))
}

/// Defaults deep-merged with the settings file, if any. A given path must exist.
pub fn load_file(path: Option<&Path>) -> Result<Settings, SettingsError> {
    let defaults = serde_json::to_value(Settings::default())?;
    let merged = match path {
        Some(path) => {
            let content = std::fs::read_to_string(path).map_err(|source| SettingsError::Io {
                path: path.to_owned(),
                source,
            })?;
            let user: Value = serde_json::from_str(&content)?;
            deep_merge(defaults, user)
        }
        None => defaults,
    };
    Ok(serde_json::from_value(merged)?)
}

/// Objects merge per key, everything else is replaced, nulls in `source` are skipped.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = match target_map.remove(&key) {
                    Some(target_val) => deep_merge(target_val, source_val),
                    None => source_val,
                };
                target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Accepts `true`/`1`/`yes`/`on` and `false`/`0`/`no`/`off`, any case.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}
