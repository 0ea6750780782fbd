//! Controller configuration.
//!
//! Loaded from an optional TOML file and then overridden by `KEEL_*`
//! environment variables. Every field has a default so an empty file (or no
//! file at all) yields a runnable local configuration.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::result::Result;

/// Default NATS server URL.
pub const DEFAULT_NATS_URL: &str = "nats://127.0.0.1:4222";
/// Default API server base URL.
pub const DEFAULT_API_URL: &str = "http://127.0.0.1:1323";
/// Default key-value bucket holding reconciliation locks.
pub const DEFAULT_LOCK_BUCKET: &str = "keelControllerLock";
/// Default lock TTL: a crashed worker blocks an object for at most this long.
pub const DEFAULT_LOCK_TTL_SECS: u64 = 300;
/// Default first requeue delay.
pub const DEFAULT_INITIAL_DELAY_SECS: i64 = 1;
/// Default requeue delay ceiling.
pub const DEFAULT_MAX_DELAY_SECS: i64 = 300;

/// Per-reconciler tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcilerSettings {
    /// Number of competing workers for this object type.
    #[serde(default = "default_concurrent_reconciles")]
    pub concurrent_reconciles: usize,

    /// Delay used for the first requeue of a notification.
    #[serde(default = "default_initial_delay_secs")]
    pub initial_delay_secs: i64,

    /// Ceiling for the exponential backoff.
    #[serde(default = "default_max_delay_secs")]
    pub max_delay_secs: i64,
}

impl Default for ReconcilerSettings {
    fn default() -> Self {
        Self {
            concurrent_reconciles: default_concurrent_reconciles(),
            initial_delay_secs: default_initial_delay_secs(),
            max_delay_secs: default_max_delay_secs(),
        }
    }
}

impl ReconcilerSettings {
    /// Set the number of concurrent workers.
    #[must_use]
    pub const fn concurrent_reconciles(mut self, count: usize) -> Self {
        self.concurrent_reconciles = count;
        self
    }

    /// Set the backoff bounds.
    #[must_use]
    pub const fn delays(mut self, initial_secs: i64, max_secs: i64) -> Self {
        self.initial_delay_secs = initial_secs;
        self.max_delay_secs = max_secs;
        self
    }

    fn validate(&self, name: &str) -> Result<()> {
        if self.concurrent_reconciles == 0 {
            return Err(Error::invalid_config(
                format!("reconcilers.{name}.concurrent_reconciles"),
                "must be at least 1",
            ));
        }
        if self.initial_delay_secs <= 0 {
            return Err(Error::invalid_config(
                format!("reconcilers.{name}.initial_delay_secs"),
                "must be positive",
            ));
        }
        if self.max_delay_secs < self.initial_delay_secs {
            return Err(Error::invalid_config(
                format!("reconcilers.{name}.max_delay_secs"),
                "must not be smaller than initial_delay_secs",
            ));
        }
        Ok(())
    }
}

/// Configuration for a controller process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// NATS server URL.
    #[serde(default = "default_nats_url")]
    pub nats_url: String,

    /// API server base URL.
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Key-value bucket used for reconciliation locks.
    #[serde(default = "default_lock_bucket")]
    pub lock_bucket: String,

    /// Lock record TTL in seconds.
    #[serde(default = "default_lock_ttl_secs")]
    pub lock_ttl_secs: u64,

    /// Unique identifier of this controller instance, stored as the lock value.
    #[serde(default = "default_controller_id")]
    pub controller_id: String,

    /// Tracing filter directive used when `RUST_LOG` is not set.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Per-reconciler settings keyed by reconciler name.
    #[serde(default)]
    pub reconcilers: BTreeMap<String, ReconcilerSettings>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            nats_url: default_nats_url(),
            api_url: default_api_url(),
            lock_bucket: default_lock_bucket(),
            lock_ttl_secs: default_lock_ttl_secs(),
            controller_id: default_controller_id(),
            log_level: default_log_level(),
            reconcilers: BTreeMap::new(),
        }
    }
}

impl ControllerConfig {
    /// Load configuration from an optional TOML file and the process environment.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, is not valid TOML, or the
    /// resulting configuration fails validation.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        let config = config.with_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Read configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::file_read_failed(path, e.to_string()))?;
        Self::from_toml_str(&contents)
    }

    /// Parse configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not valid TOML for this schema.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        toml::from_str(contents).map_err(|e| Error::toml_parse_failed(e.to_string()))
    }

    /// Apply `KEEL_*` overrides using the given variable lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if a numeric override cannot be parsed.
    pub fn with_env_overrides<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("KEEL_NATS_URL") {
            self.nats_url = url;
        }
        if let Some(url) = lookup("KEEL_API_URL") {
            self.api_url = url;
        }
        if let Some(bucket) = lookup("KEEL_LOCK_BUCKET") {
            self.lock_bucket = bucket;
        }
        if let Some(ttl) = lookup("KEEL_LOCK_TTL_SECS") {
            self.lock_ttl_secs = ttl
                .trim()
                .parse()
                .map_err(|e| Error::invalid_config("KEEL_LOCK_TTL_SECS", format!("{e}")))?;
        }
        if let Some(id) = lookup("KEEL_CONTROLLER_ID") {
            self.controller_id = id;
        }
        if let Some(level) = lookup("KEEL_LOG_LEVEL") {
            self.log_level = level;
        }
        Ok(self)
    }

    /// Validate cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns the first invalid value found.
    pub fn validate(&self) -> Result<()> {
        if self.lock_ttl_secs == 0 {
            return Err(Error::invalid_config("lock_ttl_secs", "must be positive"));
        }
        if self.controller_id.trim().is_empty() {
            return Err(Error::invalid_config("controller_id", "must not be empty"));
        }
        self.reconcilers
            .iter()
            .try_for_each(|(name, settings)| settings.validate(name))
    }

    /// Settings for the named reconciler, falling back to defaults.
    #[must_use]
    pub fn settings_for(&self, reconciler_name: &str) -> ReconcilerSettings {
        self.reconcilers
            .get(reconciler_name)
            .copied()
            .unwrap_or_default()
    }
}

fn default_nats_url() -> String {
    DEFAULT_NATS_URL.to_string()
}

fn default_api_url() -> String {
    DEFAULT_API_URL.to_string()
}

fn default_lock_bucket() -> String {
    DEFAULT_LOCK_BUCKET.to_string()
}

const fn default_lock_ttl_secs() -> u64 {
    DEFAULT_LOCK_TTL_SECS
}

fn default_controller_id() -> String {
    ulid::Ulid::new().to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

const fn default_concurrent_reconciles() -> usize {
    1
}

const fn default_initial_delay_secs() -> i64 {
    DEFAULT_INITIAL_DELAY_SECS
}

const fn default_max_delay_secs() -> i64 {
    DEFAULT_MAX_DELAY_SECS
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::expect_used)]

    use std::collections::HashMap;
    use std::io::Write;

    use super::*;

    #[test]
    fn empty_toml_yields_defaults() {
        let config = ControllerConfig::from_toml_str("").unwrap();
        assert_eq!(config.nats_url, DEFAULT_NATS_URL);
        assert_eq!(config.lock_ttl_secs, DEFAULT_LOCK_TTL_SECS);
        assert!(!config.controller_id.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn reconciler_table_is_parsed() {
        let config = ControllerConfig::from_toml_str(
            r#"
            api_url = "https://api.example.com"

            [reconcilers.WorkloadInstanceReconciler]
            concurrent_reconciles = 4
            max_delay_secs = 60
            "#,
        )
        .unwrap();

        let settings = config.settings_for("WorkloadInstanceReconciler");
        assert_eq!(settings.concurrent_reconciles, 4);
        assert_eq!(settings.initial_delay_secs, DEFAULT_INITIAL_DELAY_SECS);
        assert_eq!(settings.max_delay_secs, 60);
        assert_eq!(
            config.settings_for("SomethingElse"),
            ReconcilerSettings::default()
        );
    }

    #[test]
    fn env_overrides_win() {
        let env: HashMap<&str, &str> = [
            ("KEEL_NATS_URL", "nats://bus:4222"),
            ("KEEL_LOCK_TTL_SECS", "30"),
            ("KEEL_CONTROLLER_ID", "controller-a"),
        ]
        .into_iter()
        .collect();

        let config = ControllerConfig::default()
            .with_env_overrides(|k| env.get(k).map(ToString::to_string))
            .unwrap();

        assert_eq!(config.nats_url, "nats://bus:4222");
        assert_eq!(config.lock_ttl_secs, 30);
        assert_eq!(config.controller_id, "controller-a");
    }

    #[test]
    fn bad_numeric_override_is_rejected() {
        let result = ControllerConfig::default().with_env_overrides(|k| {
            (k == "KEEL_LOCK_TTL_SECS").then(|| "soon".to_string())
        });
        assert!(matches!(result, Err(Error::InvalidConfig { .. })));
    }

    #[test]
    fn zero_workers_fail_validation() {
        let config = ControllerConfig::from_toml_str(
            r#"
            [reconcilers.WorkloadDefinitionReconciler]
            concurrent_reconciles = 0
            "#,
        )
        .unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn ceiling_below_initial_fails_validation() {
        let mut config = ControllerConfig::default();
        config.reconcilers.insert(
            "WorkloadDefinitionReconciler".to_string(),
            ReconcilerSettings::default().delays(10, 5),
        );
        assert!(config.validate().is_err());
    }

    #[test]
    fn from_file_reads_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "lock_bucket = \"locks\"").unwrap();

        let config = ControllerConfig::from_file(file.path()).unwrap();
        assert_eq!(config.lock_bucket, "locks");
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let result = ControllerConfig::from_file(Path::new("/nonexistent/keel.toml"));
        assert!(matches!(result, Err(Error::FileReadFailed { .. })));
    }
}
