//! Configuration for the intake worker.
//!
//! Loaded once at startup and passed by reference into the components that
//! need it; nothing here mutates process-wide state. Identity context for
//! the store (run_as, superuser) lives in `StoreConfig` rather than any
//! global.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::consumer::RunWindow;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub log_level: Option<String>,
    pub queue: QueueConfig,
    pub store: StoreConfig,
    pub run_hours: RunHoursConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Name of the pre-provisioned queue to drain
    pub name: String,
    /// Path to the queue database
    pub db_path: PathBuf,
    /// How long one receive blocks waiting for a message
    pub receive_timeout_ms: u64,
    /// Pause between claim attempts within a receive
    pub poll_interval_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            name: "intake".to_string(),
            db_path: data_dir().join("queue.db"),
            receive_timeout_ms: 60_000,
            poll_interval_ms: 250,
        }
    }
}

impl QueueConfig {
    pub fn receive_timeout(&self) -> Duration {
        Duration::from_millis(self.receive_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Path to the contact store database
    pub db_path: PathBuf,
    /// Identity the worker runs as; stamped onto created rows
    pub run_as: String,
    /// Whether the identity may create the store schema
    pub superuser: bool,
    /// Record field used as the natural key for the existence check
    pub natural_key_field: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: data_dir().join("contacts.db"),
            run_as: "intake".to_string(),
            superuser: true,
            natural_key_field: "email".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunHoursConfig {
    /// Whether run-hour limiting is enabled at all
    pub limit: bool,
    /// Active window as "startHour,endHour", both 0-23
    pub hours: String,
}

impl Default for RunHoursConfig {
    fn default() -> Self {
        Self {
            limit: false,
            hours: "8,18".to_string(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: Some("info".to_string()),
            queue: QueueConfig::default(),
            store: StoreConfig::default(),
            run_hours: RunHoursConfig::default(),
        }
    }
}

fn data_dir() -> PathBuf {
    dirs::data_local_dir().unwrap_or_else(|| PathBuf::from(".")).join("intake")
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try primary location: ~/.config/<project>/<project>.yml
        if let Some(config_dir) = dirs::config_dir() {
            let project_name = env!("CARGO_PKG_NAME");
            let primary_config = config_dir.join(project_name).join(format!("{}.yml", project_name));
            if primary_config.exists() {
                match Self::load_from_file(&primary_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        log::warn!("Failed to load config from {}: {}", primary_config.display(), e);
                    }
                }
            }
        }

        // Try fallback location: ./<project>.yml
        let project_name = env!("CARGO_PKG_NAME");
        let fallback_config = PathBuf::from(format!("{}.yml", project_name));
        if fallback_config.exists() {
            match Self::load_from_file(&fallback_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    log::warn!("Failed to load config from {}: {}", fallback_config.display(), e);
                }
            }
        }

        // No config file found, use defaults
        log::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        log::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    /// Resolve the run-window gate from the run_hours section.
    ///
    /// Limiting disabled yields `None`. A malformed hours string is logged
    /// and downgrades to no limiting rather than failing startup.
    pub fn run_window(&self) -> Option<RunWindow> {
        if !self.run_hours.limit {
            return None;
        }
        match RunWindow::parse(&self.run_hours.hours) {
            Ok(window) => Some(window),
            Err(e) => {
                log::error!("Invalid run_hours '{}': {}; run-hour limiting disabled", self.run_hours.hours, e);
                None
            }
        }
    }
}
