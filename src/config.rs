//! Configuration loaded from `batchline.toml`.
//!
//! Every field has a default, so a missing file or a partial one is fine.
//! `BATCHLINE_DATABASE` takes precedence over the file's `database`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Duration;
use serde::Deserialize;

use crate::products::TranslatorRegistry;
use crate::progress::LeasePolicy;

pub const DEFAULT_CONFIG_FILE: &str = "batchline.toml";
pub const DATABASE_ENV: &str = "BATCHLINE_DATABASE";

/// One year, for both the session TTL and the reclaim window.
pub const MAX_SESSION_TTL_HOURS: i64 = 24 * 365;
pub const MAX_RECLAIM_AFTER_MINUTES: i64 = 60 * 24 * 365;

#[derive(Debug, Clone, Deserialize)]
pub struct BatchlineConfig {
    /// Path of the redb database file.
    #[serde(default = "default_database")]
    pub database: PathBuf,

    #[serde(default)]
    pub session: SessionConfig,

    #[serde(default)]
    pub lease: LeaseConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    /// Display labels for coded attribute values, keyed by reference type.
    #[serde(default)]
    pub translations: HashMap<String, HashMap<String, String>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_ttl_hours")]
    pub ttl_hours: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LeaseConfig {
    /// Minutes after which another worker may take over a fixation.
    /// Absent means fixations never expire.
    #[serde(default)]
    pub reclaim_after_minutes: Option<i64>,

    #[serde(default = "default_true")]
    pub auto_fix_on_view: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_level")]
    pub level: String,
}

fn default_database() -> PathBuf {
    PathBuf::from("batchline.redb")
}

fn default_ttl_hours() -> i64 {
    24
}

fn default_true() -> bool {
    true
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for BatchlineConfig {
    fn default() -> Self {
        Self {
            database: default_database(),
            session: SessionConfig::default(),
            lease: LeaseConfig::default(),
            logging: LoggingConfig::default(),
            translations: HashMap::new(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_hours: default_ttl_hours(),
        }
    }
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self {
            reclaim_after_minutes: None,
            auto_fix_on_view: true,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
        }
    }
}

impl BatchlineConfig {
    /// Loads `path`, or `batchline.toml` in the working directory when
    /// `path` is `None`. A missing default file yields the defaults; a
    /// missing explicit file is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::read(path)?,
            None => {
                let path = Path::new(DEFAULT_CONFIG_FILE);
                if path.exists() {
                    Self::read(path)?
                } else {
                    Self::default()
                }
            }
        };

        if let Ok(database) = std::env::var(DATABASE_ENV) {
            if !database.is_empty() {
                config.database = PathBuf::from(database);
            }
        }

        config.validate()?;
        Ok(config)
    }

    fn read(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config = toml::from_str::<BatchlineConfig>(&contents)
            .with_context(|| format!("parsing {}", path.display()))?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if !(0..=MAX_SESSION_TTL_HOURS).contains(&self.session.ttl_hours) {
            anyhow::bail!(
                "session.ttl_hours must be between 0 and {MAX_SESSION_TTL_HOURS}, got {}",
                self.session.ttl_hours
            );
        }
        if let Some(minutes) = self.lease.reclaim_after_minutes {
            if !(1..=MAX_RECLAIM_AFTER_MINUTES).contains(&minutes) {
                anyhow::bail!(
                    "lease.reclaim_after_minutes must be between 1 and \
                     {MAX_RECLAIM_AFTER_MINUTES}, got {minutes}"
                );
            }
        }
        Ok(())
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::hours(self.session.ttl_hours.clamp(0, MAX_SESSION_TTL_HOURS))
    }

    pub fn translators(&self) -> TranslatorRegistry {
        let mut registry = TranslatorRegistry::new();
        for (reference, table) in &self.translations {
            registry.register_table(reference.clone(), table.clone());
        }
        registry
    }

    pub fn lease_policy(&self) -> LeasePolicy {
        match self.lease.reclaim_after_minutes {
            Some(minutes) => LeasePolicy::reclaim_after(Duration::minutes(
                minutes.clamp(1, MAX_RECLAIM_AFTER_MINUTES),
            )),
            None => LeasePolicy::never(),
        }
    }
}
