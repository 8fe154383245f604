//! # PMONetease Configuration Module
//!
//! Configuration management for the NetEase playback monitor:
//! - Loading configuration from a YAML file
//! - Merging with the embedded default configuration
//! - Environment variable overrides
//! - Typed getters and setters for configuration values
//! - Lazily loaded global instance
//!
//! ## Usage
//!
//! ```no_run
//! use pmoconfig::get_config;
//!
//! let config = get_config();
//! let port = config.get_cdp_port();
//! let interval = config.get_poll_interval_ms()?;
//!
//! config.set_cdp_port(9333)?;
//! # Ok::<(), anyhow::Error>(())
//! ```

use anyhow::{anyhow, Result};
use dirs::home_dir;
use lazy_static::lazy_static;
use serde_yaml::{Mapping, Number, Value};
use std::{
    env, fs,
    path::Path,
    sync::{Arc, Mutex},
};
use tracing::{info, warn};

// Configuration par défaut intégrée
const DEFAULT_CONFIG: &str = include_str!("pmonetease.yaml");

lazy_static! {
    static ref CONFIG: Arc<Config> =
        Arc::new(Config::load_config("").expect("Failed to load PMONetease configuration"));
}

const ENV_CONFIG_DIR: &str = "PMONETEASE_CONFIG";
const ENV_PREFIX: &str = "PMONETEASE_CONFIG__";
const CONFIG_DIR_NAME: &str = ".pmonetease";

// Valeurs par défaut
pub const DEFAULT_CDP_PORT: u16 = 9222;
pub const DEFAULT_TARGET_MARKER: &str = "orpheus://";
pub const DEFAULT_DISCOVERY_TIMEOUT_MS: u64 = 5000;
pub const DEFAULT_COMMAND_SLICE_MS: u64 = 1;
pub const DEFAULT_COMMAND_BUDGET: u64 = 200;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;
pub const DEFAULT_RECONNECT_BACKOFF_MS: u64 = 3000;
pub const DEFAULT_STALE_AFTER_MS: u64 = 5000;
pub const DEFAULT_PLAYING_THRESHOLD_MS: u64 = 400;
pub const DEFAULT_DURATION_EPSILON: f64 = 0.1;
const DEFAULT_LOG_MIN_LEVEL: &str = "INFO";
const DEFAULT_LOG_ENABLE_CONSOLE: bool = true;

/// Macro to generate getter/setter for u64 values with default
macro_rules! impl_u64_config {
    ($getter:ident, $setter:ident, $path:expr, $default:expr) => {
        pub fn $getter(&self) -> Result<u64> {
            match self.get_value($path)? {
                Value::Number(n) => Ok(n.as_u64().unwrap_or($default)),
                Value::String(s) => Ok(s.trim().parse::<u64>().unwrap_or($default)),
                _ => Ok($default),
            }
        }

        pub fn $setter(&self, value: u64) -> Result<()> {
            self.set_value($path, Value::Number(Number::from(value)))
        }
    };
}

/// Macro to generate getter/setter for f64 values with default
macro_rules! impl_f64_config {
    ($getter:ident, $setter:ident, $path:expr, $default:expr) => {
        pub fn $getter(&self) -> Result<f64> {
            match self.get_value($path)? {
                Value::Number(n) => Ok(n.as_f64().unwrap_or($default)),
                _ => Ok($default),
            }
        }

        pub fn $setter(&self, value: f64) -> Result<()> {
            self.set_value($path, Value::Number(Number::from(value)))
        }
    };
}

/// Macro to generate getter/setter for bool values with default
macro_rules! impl_bool_config {
    ($getter:ident, $setter:ident, $path:expr, $default:expr) => {
        pub fn $getter(&self) -> Result<bool> {
            match self.get_value($path)? {
                Value::Bool(b) => Ok(b),
                _ => Ok($default),
            }
        }

        pub fn $setter(&self, value: bool) -> Result<()> {
            self.set_value($path, Value::Bool(value))
        }
    };
}

/// Configuration manager for PMONetease
///
/// Holds the merged YAML tree (embedded defaults, `config.yaml`, environment
/// overrides) and writes it back to `config.yaml` whenever a value changes.
#[derive(Debug)]
pub struct Config {
    config_dir: String,
    path: String,
    data: Mutex<Value>,
}

impl Clone for Config {
    fn clone(&self) -> Self {
        let data = self.data.lock().expect("config mutex poisoned").clone();
        Self {
            config_dir: self.config_dir.clone(),
            path: self.path.clone(),
            data: Mutex::new(data),
        }
    }
}

impl Config {
    /// Finds a config directory by trying different locations in order
    fn find_config_dir(directory: &str) -> String {
        if !directory.is_empty() {
            return directory.to_string();
        }

        if let Ok(env_path) = env::var(ENV_CONFIG_DIR) {
            info!(env_var = ENV_CONFIG_DIR, path = %env_path, "Trying to load config from env");
            return env_path;
        }

        if Path::new(CONFIG_DIR_NAME).exists() {
            return CONFIG_DIR_NAME.to_string();
        }

        if let Some(home) = home_dir() {
            let home_config = home.join(CONFIG_DIR_NAME);
            if home_config.exists() {
                return home_config.to_string_lossy().to_string();
            }
        }

        CONFIG_DIR_NAME.to_string()
    }

    /// Creates the directory if needed and checks it is readable and writable
    fn validate_config_dir(path: &Path) -> Result<()> {
        if !path.exists() {
            fs::create_dir_all(path)?;
        }

        if !path.is_dir() {
            return Err(anyhow!(
                "Le chemin spécifié n'est pas un répertoire: {}",
                path.display()
            ));
        }

        let test_file = path.join(".write_test");
        fs::write(&test_file, b"test")?;
        fs::remove_file(&test_file)?;

        fs::read_dir(path)?;

        Ok(())
    }

    /// Determines and validates the configuration directory
    ///
    /// The directory is searched in the following order:
    /// 1. The provided `directory` parameter if not empty
    /// 2. The `PMONETEASE_CONFIG` environment variable
    /// 3. `.pmonetease` in the current directory
    /// 4. `.pmonetease` in the user's home directory
    ///
    /// The directory is created if it doesn't exist.
    pub fn config_dir(directory: &str) -> Result<String> {
        let dir_path = Self::find_config_dir(directory);
        Self::validate_config_dir(Path::new(&dir_path))?;
        Ok(dir_path)
    }

    /// Loads the configuration from the specified directory
    ///
    /// The embedded defaults are merged with `config.yaml` when present, keys
    /// are lowercased, environment overrides are applied and the result is
    /// written back so that the file always lists every known key.
    pub fn load_config(directory: &str) -> Result<Self> {
        let config_dir = Self::config_dir(directory)?;
        info!(config_dir = %config_dir, "Using config directory");

        let config_file_path = Path::new(&config_dir).join("config.yaml");
        let path = config_file_path.to_string_lossy().to_string();

        let mut config_value: Value = serde_yaml::from_str(DEFAULT_CONFIG)?;

        match fs::read(&path) {
            Ok(data) => {
                info!(config_file = %path, "Loaded config file");
                let external_value: Value = serde_yaml::from_slice(&data)?;
                // Un fichier vide se lit comme `null` : on garde les défauts
                if !external_value.is_null() {
                    merge_yaml(&mut config_value, &Self::lower_keys_value(external_value));
                }
            }
            Err(_) => {
                info!(config_file = %path, "Config file not found, using default embedded config");
            }
        }

        let mut config_value = Self::lower_keys_value(config_value);
        Self::apply_env_overrides(&mut config_value);

        let config = Config {
            config_dir,
            path,
            data: Mutex::new(config_value),
        };

        config.save()?;
        Ok(config)
    }

    /// Directory holding `config.yaml`
    pub fn directory(&self) -> &str {
        &self.config_dir
    }

    /// Full path of the backing `config.yaml`
    pub fn file_path(&self) -> &str {
        &self.path
    }

    /// Saves the current configuration to the config.yaml file
    pub fn save(&self) -> Result<()> {
        let yaml = {
            let data = self.data.lock().expect("config mutex poisoned");
            serde_yaml::to_string(&*data)?
        };
        fs::write(&self.path, yaml)?;
        Ok(())
    }

    /// Sets a configuration value at the specified path and saves it
    ///
    /// `path` is a list of keys, e.g. `&["cdp", "port"]`.
    pub fn set_value(&self, path: &[&str], value: Value) -> Result<()> {
        {
            let mut data = self.data.lock().expect("config mutex poisoned");
            Self::set_value_internal(&mut data, path, value)?;
        }
        self.save()
    }

    fn set_value_internal(data: &mut Value, path: &[&str], value: Value) -> Result<()> {
        if path.is_empty() {
            *data = value;
            return Ok(());
        }
        if let Value::Mapping(map) = data {
            let key_value = Value::String(path[0].to_lowercase());
            if path.len() == 1 {
                map.insert(key_value, value);
            } else {
                let entry = map
                    .entry(key_value)
                    .or_insert(Value::Mapping(Mapping::new()));
                Self::set_value_internal(entry, &path[1..], value)?;
            }
            Ok(())
        } else {
            Err(anyhow!("Current node is not a map"))
        }
    }

    /// Gets a configuration value at the specified path
    ///
    /// Returns an error if the path doesn't exist.
    pub fn get_value(&self, path: &[&str]) -> Result<Value> {
        let data = self.data.lock().expect("config mutex poisoned");
        Self::get_value_internal(&data, path)
    }

    fn get_value_internal(data: &Value, path: &[&str]) -> Result<Value> {
        let mut current = data;
        for (i, key) in path.iter().enumerate() {
            if let Value::Mapping(map) = current {
                match map.get(&Value::String(key.to_lowercase())) {
                    Some(next) => current = next,
                    None => return Err(anyhow!("Path {} does not exist", path[..=i].join("."))),
                }
            } else {
                return Err(anyhow!("Path {} is not a Config", path[..i].join(".")));
            }
        }
        Ok(current.clone())
    }

    fn apply_env_overrides(config: &mut Value) {
        for (key, value) in env::vars() {
            if let Some(rest) = key.strip_prefix(ENV_PREFIX) {
                let key_path = rest.split("__").collect::<Vec<_>>();
                let yaml_value = Self::convert_env_value(&value);
                if let Err(err) = Self::set_value_internal(config, &key_path, yaml_value) {
                    warn!(env_var = %key, error = %err, "Ignoring environment override");
                }
            }
        }
    }

    fn convert_env_value(value: &str) -> Value {
        serde_yaml::from_str::<Value>(value).unwrap_or_else(|_| Value::String(value.to_string()))
    }

    fn lower_keys_value(value: Value) -> Value {
        match value {
            Value::Mapping(map) => {
                let mut new_map = Mapping::new();
                for (k, v) in map {
                    let k = match k {
                        Value::String(s) => Value::String(s.to_lowercase()),
                        other => other,
                    };
                    new_map.insert(k, Self::lower_keys_value(v));
                }
                Value::Mapping(new_map)
            }
            Value::Sequence(seq) => {
                Value::Sequence(seq.into_iter().map(Self::lower_keys_value).collect())
            }
            _ => value,
        }
    }

    /// Remote debugging port of the NetEase client
    ///
    /// Falls back to 9222 when the value is missing or not a valid port.
    pub fn get_cdp_port(&self) -> u16 {
        match self.get_value(&["cdp", "port"]) {
            Ok(Value::Number(n)) => match n.as_u64().and_then(|p| u16::try_from(p).ok()) {
                Some(port) if port != 0 => port,
                _ => {
                    warn!(port = %n, "Invalid CDP port, using default {}", DEFAULT_CDP_PORT);
                    DEFAULT_CDP_PORT
                }
            },
            Ok(Value::String(s)) => match s.trim().parse::<u16>() {
                Ok(port) if port != 0 => port,
                _ => {
                    warn!("Invalid CDP port '{}', using default {}", s, DEFAULT_CDP_PORT);
                    DEFAULT_CDP_PORT
                }
            },
            Ok(_) => {
                warn!(
                    "CDP port not a number or string, using default {}",
                    DEFAULT_CDP_PORT
                );
                DEFAULT_CDP_PORT
            }
            Err(err) => {
                warn!(
                    "Failed to get CDP port: {}, using default {}",
                    err, DEFAULT_CDP_PORT
                );
                DEFAULT_CDP_PORT
            }
        }
    }

    pub fn set_cdp_port(&self, port: u16) -> Result<()> {
        self.set_value(&["cdp", "port"], Value::Number(Number::from(port)))
    }

    /// Fragment identifying the target page in the DevTools page list
    pub fn get_target_marker(&self) -> Result<String> {
        match self.get_value(&["cdp", "target_marker"])? {
            Value::String(s) if !s.trim().is_empty() => Ok(s),
            _ => Ok(DEFAULT_TARGET_MARKER.to_string()),
        }
    }

    pub fn set_target_marker(&self, marker: String) -> Result<()> {
        self.set_value(&["cdp", "target_marker"], Value::String(marker))
    }

    impl_u64_config!(
        get_discovery_timeout_ms,
        set_discovery_timeout_ms,
        &["cdp", "discovery_timeout_ms"],
        DEFAULT_DISCOVERY_TIMEOUT_MS
    );

    impl_u64_config!(
        get_command_slice_ms,
        set_command_slice_ms,
        &["cdp", "command_slice_ms"],
        DEFAULT_COMMAND_SLICE_MS
    );

    impl_u64_config!(
        get_command_budget,
        set_command_budget,
        &["cdp", "command_budget"],
        DEFAULT_COMMAND_BUDGET
    );

    impl_u64_config!(
        get_poll_interval_ms,
        set_poll_interval_ms,
        &["driver", "poll_interval_ms"],
        DEFAULT_POLL_INTERVAL_MS
    );

    impl_u64_config!(
        get_reconnect_backoff_ms,
        set_reconnect_backoff_ms,
        &["driver", "reconnect_backoff_ms"],
        DEFAULT_RECONNECT_BACKOFF_MS
    );

    impl_u64_config!(
        get_stale_after_ms,
        set_stale_after_ms,
        &["driver", "stale_after_ms"],
        DEFAULT_STALE_AFTER_MS
    );

    impl_u64_config!(
        get_playing_threshold_ms,
        set_playing_threshold_ms,
        &["driver", "playing_threshold_ms"],
        DEFAULT_PLAYING_THRESHOLD_MS
    );

    impl_f64_config!(
        get_duration_epsilon,
        set_duration_epsilon,
        &["driver", "duration_epsilon"],
        DEFAULT_DURATION_EPSILON
    );

    impl_bool_config!(
        get_log_enable_console,
        set_log_enable_console,
        &["logger", "enable_console"],
        DEFAULT_LOG_ENABLE_CONSOLE
    );

    /// Récupère le niveau de log minimum depuis la configuration
    pub fn get_log_min_level(&self) -> Result<String> {
        match self.get_value(&["logger", "min_level"])? {
            Value::String(s) => Ok(s),
            _ => Ok(DEFAULT_LOG_MIN_LEVEL.to_string()),
        }
    }

    /// Définit le niveau de log minimum dans la configuration
    pub fn set_log_min_level(&self, level: String) -> Result<()> {
        self.set_value(&["logger", "min_level"], Value::String(level))
    }
}

/// Returns the global configuration instance
///
/// Loaded on first access from the default directory search order.
pub fn get_config() -> Arc<Config> {
    CONFIG.clone()
}

/// Merges external YAML configuration into default configuration
///
/// Mappings are merged key by key; scalars and sequences from `external`
/// replace the default ones.
fn merge_yaml(default: &mut Value, external: &Value) {
    match (default, external) {
        (Value::Mapping(dmap), Value::Mapping(emap)) => {
            for (k, v) in emap {
                match dmap.get_mut(k) {
                    Some(dv) => merge_yaml(dv, v),
                    None => {
                        dmap.insert(k.clone(), v.clone());
                    }
                }
            }
        }
        (d, e) => *d = e.clone(),
    }
}
