use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::types::Credentials;
use crate::{Error, Result};

const DATA_FILE: &str = "data/config.json";
const DEFAULTS_FILE: &str = "defaults/config.json";

pub const DEFAULT_POLL_TIME_MIN: &str = "1";

/// Persisted adapter configuration and credentials.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    #[serde(skip)]
    work_dir: PathBuf,
    #[serde(flatten)]
    pub credentials: Credentials,
    /// Poll interval in minutes, kept as the string the UI sends.
    pub poll_time_min: String,
    pub log_level: String,
    pub log_format: String,
    pub mqtt_server_uri: String,
    pub mqtt_username: String,
    pub mqtt_password: String,
    pub mqtt_client_id_prefix: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from("./"),
            credentials: Credentials::default(),
            poll_time_min: DEFAULT_POLL_TIME_MIN.to_string(),
            log_level: "info".to_string(),
            log_format: "text".to_string(),
            mqtt_server_uri: "tcp://localhost:1883".to_string(),
            mqtt_username: String::new(),
            mqtt_password: String::new(),
            mqtt_client_id_prefix: "glamox_adapter".to_string(),
        }
    }
}

impl Config {
    /// Built-in defaults rooted at `work_dir`, not yet backed by a file.
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
            ..Default::default()
        }
    }

    /// Load `data/config.json`, falling back to the defaults when it does not
    /// exist yet. An existing but unreadable file is an error.
    pub fn load(work_dir: impl Into<PathBuf>) -> Result<Self> {
        let work_dir = work_dir.into();
        let path = work_dir.join(DATA_FILE);
        if !path.exists() {
            debug!(path = %path.display(), "no config file, using defaults");
            let mut config = Self::defaults(&work_dir)?;
            config.save()?;
            return Ok(config);
        }
        let mut config: Config = serde_json::from_str(&fs::read_to_string(&path)?)?;
        config.work_dir = work_dir;
        Ok(config)
    }

    /// Defaults from `defaults/config.json` when shipped, built-in otherwise.
    pub fn defaults(work_dir: &Path) -> Result<Self> {
        let path = work_dir.join(DEFAULTS_FILE);
        let mut config = if path.exists() {
            serde_json::from_str(&fs::read_to_string(&path)?)?
        } else {
            Config::default()
        };
        config.work_dir = work_dir.to_path_buf();
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let path = self.path();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let body = serde_json::to_string_pretty(self)?;
        fs::write(&path, body)?;
        debug!(path = %path.display(), "config saved");
        Ok(())
    }

    /// Replace everything but the working directory with the defaults.
    pub fn reset_to_defaults(&mut self) -> Result<()> {
        let defaults = Self::defaults(&self.work_dir)?;
        *self = defaults;
        Ok(())
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    pub fn path(&self) -> PathBuf {
        self.work_dir.join(DATA_FILE)
    }

    pub fn poll_interval_minutes(&self) -> Result<u64> {
        parse_poll_interval(&self.poll_time_min)
    }

    /// Apply a new poll interval if it is valid. Returns whether it was applied.
    pub fn set_poll_time_min(&mut self, value: &str) -> bool {
        match parse_poll_interval(value) {
            Ok(_) => {
                self.poll_time_min = value.trim().to_string();
                true
            }
            Err(e) => {
                warn!(value, error = %e, "rejecting poll interval, keeping current value");
                false
            }
        }
    }
}

/// Longest accepted poll interval: one day.
pub const MAX_POLL_TIME_MIN: u64 = 24 * 60;

/// Poll interval must be a whole number of minutes in 1..=[`MAX_POLL_TIME_MIN`].
pub fn parse_poll_interval(value: &str) -> Result<u64> {
    match value.trim().parse::<u64>() {
        Ok(0) => Err(Error::validation("poll interval must be positive")),
        Ok(n) if n > MAX_POLL_TIME_MIN => Err(Error::validation(format!(
            "poll interval {n} exceeds {MAX_POLL_TIME_MIN} minutes"
        ))),
        Ok(n) => Ok(n),
        Err(_) => Err(Error::validation(format!(
            "{value:?} is not a number or contains illegal symbols"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_yields_defaults_and_creates_it() {
        let dir = TempDir::new().unwrap();
        let config = Config::load(dir.path()).unwrap();
        assert_eq!(config.poll_time_min, DEFAULT_POLL_TIME_MIN);
        assert!(dir.path().join(DATA_FILE).exists());
    }

    #[test]
    fn save_and_reload_keeps_credentials() {
        let dir = TempDir::new().unwrap();
        let mut config = Config::new(dir.path());
        config.credentials.access_token = "access".into();
        config.credentials.refresh_token = "refresh".into();
        config.credentials.user_id = Some(42);
        config.poll_time_min = "5".into();
        config.save().unwrap();

        let loaded = Config::load(dir.path()).unwrap();
        assert_eq!(loaded, config);
        assert_eq!(loaded.credentials.user_id, Some(42));
    }

    #[test]
    fn credentials_are_flat_in_the_file() {
        let dir = TempDir::new().unwrap();
        let mut config = Config::new(dir.path());
        config.credentials.user_id = Some(3);
        config.save().unwrap();
        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(config.path()).unwrap()).unwrap();
        assert_eq!(raw["user"], 3);
        assert!(raw.get("access_token").is_some());
    }

    #[test]
    fn unreadable_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("data")).unwrap();
        fs::write(dir.path().join(DATA_FILE), "{ not json").unwrap();
        assert!(matches!(Config::load(dir.path()), Err(Error::Json(_))));
    }

    #[test]
    fn shipped_defaults_win_over_builtin() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("defaults")).unwrap();
        fs::write(dir.path().join(DEFAULTS_FILE), r#"{"poll_time_min": "10"}"#).unwrap();
        let mut config = Config::new(dir.path());
        config.credentials.user_id = Some(1);
        config.reset_to_defaults().unwrap();
        assert_eq!(config.poll_time_min, "10");
        assert_eq!(config.credentials.user_id, None);
        assert_eq!(config.work_dir(), dir.path());
    }

    #[test]
    fn poll_interval_validation() {
        assert_eq!(parse_poll_interval("15").unwrap(), 15);
        assert!(parse_poll_interval("0").is_err());
        assert!(parse_poll_interval("-3").is_err());
        assert!(parse_poll_interval("ten").is_err());
        assert_eq!(parse_poll_interval("1440").unwrap(), MAX_POLL_TIME_MIN);
        assert!(parse_poll_interval("1441").is_err());
        assert!(parse_poll_interval("18446744073709551615").is_err());

        let mut config = Config::default();
        assert!(!config.set_poll_time_min("abc"));
        assert_eq!(config.poll_time_min, DEFAULT_POLL_TIME_MIN);
        assert!(config.set_poll_time_min("7"));
        assert_eq!(config.poll_interval_minutes().unwrap(), 7);
    }
}
