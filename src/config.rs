//! # Farm Configuration
//!
//! TOML configuration for the scheduling core and the `farm-host` binary.
//! Every section and field is optional; missing values fall back to the
//! defaults below.
//!
//! ## Example
//!
//! ```toml
//! [scheduler]
//! reschedule_interval_secs = 60
//!
//! [monitor]
//! poll_interval_secs = 5
//! offline_threshold_secs = 120
//!
//! [[printers]]
//! printer_id = "mk4-01"
//! model = "MK4"
//! supported_materials = ["pla", "petg"]
//! capabilities = ["fdm"]
//! build_volume = { x = 250.0, y = 210.0, z = 220.0 }
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::printer::PrinterProfile;

const MAX_LOOP_INTERVAL_SECS: u64 = 86_400;
const MAX_ERROR_BACKOFF_SECS: u64 = 3_600;
const MAX_TIME_HORIZON_HOURS: u64 = 87_600;
const MAX_OFFLINE_THRESHOLD_SECS: u64 = 30 * 86_400;
const MAX_METRICS_RETENTION_HOURS: u64 = 8_760;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct FarmConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub maintenance: MaintenanceConfig,
    /// Printers registered at start-up.
    #[serde(default)]
    pub printers: Vec<PrinterProfile>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_reschedule_interval_secs")]
    pub reschedule_interval_secs: u64,
    /// Pause after a failed loop tick before the next attempt.
    #[serde(default = "default_error_backoff_secs")]
    pub error_backoff_secs: u64,
    #[serde(default = "default_time_horizon_hours")]
    pub time_horizon_hours: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            reschedule_interval_secs: default_reschedule_interval_secs(),
            error_backoff_secs: default_error_backoff_secs(),
            time_horizon_hours: default_time_horizon_hours(),
        }
    }
}

impl SchedulerConfig {
    pub fn reschedule_interval(&self) -> Duration {
        Duration::from_secs(self.reschedule_interval_secs)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_secs(self.error_backoff_secs)
    }

    pub fn time_horizon(&self) -> chrono::Duration {
        span_secs(self.time_horizon_hours.saturating_mul(3_600))
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MonitorConfig {
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_offline_threshold_secs")]
    pub offline_threshold_secs: u64,
    /// Degrees between nozzle reading and target before alerting.
    #[serde(default = "default_temp_variance_threshold")]
    pub temp_variance_threshold: f64,
    /// Filament percentage below which a low-consumable alert is raised.
    #[serde(default = "default_filament_low_threshold")]
    pub filament_low_threshold: f64,
    #[serde(default = "default_metrics_retention_hours")]
    pub metrics_retention_hours: u64,
    #[serde(default = "default_error_backoff_secs")]
    pub error_backoff_secs: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            offline_threshold_secs: default_offline_threshold_secs(),
            temp_variance_threshold: default_temp_variance_threshold(),
            filament_low_threshold: default_filament_low_threshold(),
            metrics_retention_hours: default_metrics_retention_hours(),
            error_backoff_secs: default_error_backoff_secs(),
        }
    }
}

impl MonitorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn offline_threshold(&self) -> chrono::Duration {
        span_secs(self.offline_threshold_secs)
    }

    pub fn metrics_retention(&self) -> chrono::Duration {
        span_secs(self.metrics_retention_hours.saturating_mul(3_600))
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_secs(self.error_backoff_secs)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MaintenanceConfig {
    /// Take printers out of scheduling when a required or critical task is pending.
    #[serde(default = "default_block_on_required")]
    pub block_on_required: bool,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self { block_on_required: default_block_on_required() }
    }
}

/// Seconds as a chrono span, saturating instead of wrapping negative.
fn span_secs(secs: u64) -> chrono::Duration {
    i64::try_from(secs)
        .ok()
        .and_then(chrono::Duration::try_seconds)
        .unwrap_or(chrono::Duration::MAX)
}

fn default_reschedule_interval_secs() -> u64 { 300 }
fn default_error_backoff_secs() -> u64 { 10 }
fn default_time_horizon_hours() -> u64 { 168 }
fn default_poll_interval_secs() -> u64 { 10 }
fn default_offline_threshold_secs() -> u64 { 120 }
fn default_temp_variance_threshold() -> f64 { 10.0 }
fn default_filament_low_threshold() -> f64 { 20.0 }
fn default_metrics_retention_hours() -> u64 { 24 }
fn default_block_on_required() -> bool { true }

impl FarmConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let scheduler = &self.scheduler;
        let monitor = &self.monitor;
        check_range("scheduler.reschedule_interval_secs", scheduler.reschedule_interval_secs, 1, MAX_LOOP_INTERVAL_SECS)?;
        check_range("scheduler.error_backoff_secs", scheduler.error_backoff_secs, 0, MAX_ERROR_BACKOFF_SECS)?;
        check_range("scheduler.time_horizon_hours", scheduler.time_horizon_hours, 1, MAX_TIME_HORIZON_HOURS)?;
        check_range("monitor.poll_interval_secs", monitor.poll_interval_secs, 1, MAX_LOOP_INTERVAL_SECS)?;
        check_range("monitor.offline_threshold_secs", monitor.offline_threshold_secs, 1, MAX_OFFLINE_THRESHOLD_SECS)?;
        check_range("monitor.metrics_retention_hours", monitor.metrics_retention_hours, 1, MAX_METRICS_RETENTION_HOURS)?;
        check_range("monitor.error_backoff_secs", monitor.error_backoff_secs, 0, MAX_ERROR_BACKOFF_SECS)?;
        if self.monitor.temp_variance_threshold <= 0.0 {
            return Err(ConfigError::Invalid("monitor.temp_variance_threshold must be positive".into()));
        }
        if !(0.0..=100.0).contains(&self.monitor.filament_low_threshold) {
            return Err(ConfigError::Invalid("monitor.filament_low_threshold must be within 0-100".into()));
        }
        let mut seen = std::collections::HashSet::new();
        for printer in &self.printers {
            if printer.printer_id.is_empty() {
                return Err(ConfigError::Invalid("printer_id cannot be empty".into()));
            }
            if !seen.insert(printer.printer_id.as_str()) {
                return Err(ConfigError::Invalid(format!("duplicate printer_id '{}'", printer.printer_id)));
            }
        }
        Ok(())
    }
}

fn check_range(field: &str, value: u64, min: u64, max: u64) -> Result<(), ConfigError> {
    if (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::Invalid(format!("{} must be within {}-{}, got {}", field, min, max, value)))
    }
}

/// Load configuration from a TOML file at the given path.
pub fn load_config(path: &str) -> Result<FarmConfig, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| {
        tracing::error!("Failed to read config file '{}': {}", path, e);
        ConfigError::Io(e)
    })?;
    let config: FarmConfig = toml::from_str(&contents).map_err(|e| {
        tracing::error!("Failed to parse config TOML: {}", e);
        ConfigError::Toml(e)
    })?;
    config.validate()?;
    Ok(config)
}
