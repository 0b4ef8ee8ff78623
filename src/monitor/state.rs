// src/monitor/state.rs - Live printer state and telemetry merge
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrinterStatus {
    Offline,
    Idle,
    Preparing,
    Printing,
    Paused,
    Error,
    Maintenance,
}

impl fmt::Display for PrinterStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PrinterStatus::Offline => "offline",
            PrinterStatus::Idle => "idle",
            PrinterStatus::Preparing => "preparing",
            PrinterStatus::Printing => "printing",
            PrinterStatus::Paused => "paused",
            PrinterStatus::Error => "error",
            PrinterStatus::Maintenance => "maintenance",
        };
        write!(f, "{}", name)
    }
}

/// Last known condition of one printer, as reported by telemetry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrinterState {
    pub printer_id: String,
    pub status: PrinterStatus,
    pub last_seen: DateTime<Utc>,

    pub current_job_id: Option<String>,
    pub job_progress: f64,
    pub job_started_at: Option<DateTime<Utc>>,
    pub estimated_completion: Option<DateTime<Utc>>,

    pub nozzle_temp: f64,
    pub nozzle_target: f64,
    pub bed_temp: f64,
    pub bed_target: f64,
    pub chamber_temp: Option<f64>,

    pub filament_remaining_percent: f64,
    pub current_material: Option<String>,

    pub print_speed_percent: u32,
    pub fan_speed_percent: u32,

    pub error_code: Option<String>,
    pub error_message: Option<String>,
}

impl PrinterState {
    /// A freshly registered printer is offline until it reports in.
    pub fn new(printer_id: impl Into<String>, seen_at: DateTime<Utc>) -> Self {
        Self {
            printer_id: printer_id.into(),
            status: PrinterStatus::Offline,
            last_seen: seen_at,
            current_job_id: None,
            job_progress: 0.0,
            job_started_at: None,
            estimated_completion: None,
            nozzle_temp: 0.0,
            nozzle_target: 0.0,
            bed_temp: 0.0,
            bed_target: 0.0,
            chamber_temp: None,
            filament_remaining_percent: 100.0,
            current_material: None,
            print_speed_percent: 100,
            fan_speed_percent: 0,
            error_code: None,
            error_message: None,
        }
    }

    /// Absolute distance between nozzle reading and target, when a target is set.
    pub fn nozzle_variance(&self) -> Option<f64> {
        (self.nozzle_target > 0.0).then(|| (self.nozzle_temp - self.nozzle_target).abs())
    }

    /// Copies every field present in `update`. Returns the previous status.
    pub fn apply(&mut self, update: TelemetryUpdate) -> PrinterStatus {
        let previous = self.status;
        let TelemetryUpdate {
            status,
            current_job_id,
            job_progress,
            job_started_at,
            estimated_completion,
            nozzle_temp,
            nozzle_target,
            bed_temp,
            bed_target,
            chamber_temp,
            filament_remaining_percent,
            current_material,
            print_speed_percent,
            fan_speed_percent,
            error_code,
            error_message,
        } = update;

        if let Some(v) = status { self.status = v; }
        if let Some(v) = current_job_id { self.current_job_id = v; }
        if let Some(v) = job_progress { self.job_progress = v.clamp(0.0, 100.0); }
        if let Some(v) = job_started_at { self.job_started_at = v; }
        if let Some(v) = estimated_completion { self.estimated_completion = v; }
        if let Some(v) = nozzle_temp { self.nozzle_temp = v; }
        if let Some(v) = nozzle_target { self.nozzle_target = v; }
        if let Some(v) = bed_temp { self.bed_temp = v; }
        if let Some(v) = bed_target { self.bed_target = v; }
        if let Some(v) = chamber_temp { self.chamber_temp = v; }
        if let Some(v) = filament_remaining_percent { self.filament_remaining_percent = v; }
        if let Some(v) = current_material { self.current_material = v; }
        if let Some(v) = print_speed_percent { self.print_speed_percent = v; }
        if let Some(v) = fan_speed_percent { self.fan_speed_percent = v; }
        if let Some(v) = error_code { self.error_code = v; }
        if let Some(v) = error_message { self.error_message = v; }
        previous
    }
}

/// Partial telemetry push. `None` leaves a field untouched; for nullable
/// fields `Some(None)` clears it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryUpdate {
    pub status: Option<PrinterStatus>,
    pub current_job_id: Option<Option<String>>,
    pub job_progress: Option<f64>,
    pub job_started_at: Option<Option<DateTime<Utc>>>,
    pub estimated_completion: Option<Option<DateTime<Utc>>>,
    pub nozzle_temp: Option<f64>,
    pub nozzle_target: Option<f64>,
    pub bed_temp: Option<f64>,
    pub bed_target: Option<f64>,
    pub chamber_temp: Option<Option<f64>>,
    pub filament_remaining_percent: Option<f64>,
    pub current_material: Option<Option<String>>,
    pub print_speed_percent: Option<u32>,
    pub fan_speed_percent: Option<u32>,
    pub error_code: Option<Option<String>>,
    pub error_message: Option<Option<String>>,
}

impl TelemetryUpdate {
    pub fn status(status: PrinterStatus) -> Self {
        Self { status: Some(status), ..Self::default() }
    }

    pub fn with_nozzle(mut self, temp: f64, target: f64) -> Self {
        self.nozzle_temp = Some(temp);
        self.nozzle_target = Some(target);
        self
    }

    pub fn with_bed(mut self, temp: f64, target: f64) -> Self {
        self.bed_temp = Some(temp);
        self.bed_target = Some(target);
        self
    }

    pub fn with_filament(mut self, percent: f64) -> Self {
        self.filament_remaining_percent = Some(percent);
        self
    }

    pub fn with_job(mut self, job_id: impl Into<String>, progress: f64) -> Self {
        self.current_job_id = Some(Some(job_id.into()));
        self.job_progress = Some(progress);
        self
    }

    pub fn with_error(mut self, code: impl Into<String>, message: impl Into<String>) -> Self {
        self.error_code = Some(Some(code.into()));
        self.error_message = Some(Some(message.into()));
        self
    }
}
