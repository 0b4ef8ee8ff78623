//! # Maintenance Predictor
//!
//! Tracks per-printer usage since each kind of maintenance was last done and
//! turns it into prioritized maintenance tasks. A task becomes due when
//! either the print-hour or the calendar interval for its kind runs out;
//! repeated clogs and layer shifts escalate nozzle and belt work early.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::clock::{self, Clock};
use crate::events::{Subscriber, Subscribers};
use crate::optimizer::FarmOptimizer;

const CRITICAL_RATIO: f64 = 1.5;
const REQUIRED_RATIO: f64 = 1.0;
const RECOMMENDED_RATIO: f64 = 0.8;
const CLOG_LIMIT: u32 = 3;
const LAYER_SHIFT_LIMIT: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaintenanceType {
    NozzleReplace,
    BeltTension,
    Lubrication,
    Calibration,
    Cleaning,
    FirmwareUpdate,
    FilterReplace,
    BedLevel,
}

impl MaintenanceType {
    pub const ALL: [MaintenanceType; 8] = [
        MaintenanceType::NozzleReplace,
        MaintenanceType::BeltTension,
        MaintenanceType::Lubrication,
        MaintenanceType::Calibration,
        MaintenanceType::Cleaning,
        MaintenanceType::FirmwareUpdate,
        MaintenanceType::FilterReplace,
        MaintenanceType::BedLevel,
    ];

    /// Recommended interval, or `None` for work that is only done on demand.
    pub fn schedule(self) -> Option<MaintenanceSchedule> {
        let (interval_hours, interval_days, description) = match self {
            MaintenanceType::NozzleReplace => (500.0, 90, "Replace printer nozzle"),
            MaintenanceType::BeltTension => (200.0, 60, "Check and adjust belt tension"),
            MaintenanceType::Lubrication => (100.0, 30, "Lubricate linear rails and lead screws"),
            MaintenanceType::Calibration => (300.0, 60, "Full printer calibration"),
            MaintenanceType::Cleaning => (50.0, 14, "General cleaning"),
            MaintenanceType::FilterReplace => (400.0, 90, "Replace air filters"),
            MaintenanceType::BedLevel => (100.0, 30, "Verify and adjust bed leveling"),
            MaintenanceType::FirmwareUpdate => return None,
        };
        Some(MaintenanceSchedule {
            maintenance_type: self,
            interval_hours,
            interval_days,
            description: description.to_string(),
        })
    }
}

impl fmt::Display for MaintenanceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MaintenanceType::NozzleReplace => "nozzle_replace",
            MaintenanceType::BeltTension => "belt_tension",
            MaintenanceType::Lubrication => "lubrication",
            MaintenanceType::Calibration => "calibration",
            MaintenanceType::Cleaning => "cleaning",
            MaintenanceType::FirmwareUpdate => "firmware_update",
            MaintenanceType::FilterReplace => "filter_replace",
            MaintenanceType::BedLevel => "bed_level",
        };
        write!(f, "{}", name)
    }
}

/// Ordered from least to most pressing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MaintenanceUrgency {
    Optional,
    Recommended,
    Required,
    Critical,
}

impl MaintenanceUrgency {
    /// Severe enough to take the printer out of scheduling.
    pub fn blocks_printing(self) -> bool {
        self >= MaintenanceUrgency::Required
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaintenanceSchedule {
    pub maintenance_type: MaintenanceType,
    pub interval_hours: f64,
    pub interval_days: i64,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaintenanceRecord {
    pub record_id: String,
    pub printer_id: String,
    pub maintenance_type: MaintenanceType,
    pub performed_at: DateTime<Utc>,
    pub performed_by: String,
    pub notes: String,
    pub parts_replaced: Vec<String>,
    pub print_hours_at_maintenance: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaintenanceTask {
    pub printer_id: String,
    pub maintenance_type: MaintenanceType,
    pub urgency: MaintenanceUrgency,
    pub reason: String,
    pub due_date: DateTime<Utc>,
    pub print_hours_since_last: f64,
    pub days_since_last: i64,
}

/// Failure signals that hint at wear.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Clog,
    LayerShift,
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageSince {
    pub print_hours: f64,
    pub performed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrinterUsageMetrics {
    pub printer_id: String,
    pub total_print_hours: f64,
    pub total_prints: u64,
    /// Usage since each kind of maintenance was last done. Registration
    /// counts as the starting point.
    pub since: BTreeMap<MaintenanceType, UsageSince>,
    pub failed_prints_recent: u32,
    pub layer_shift_count: u32,
    pub clog_count: u32,
}

impl PrinterUsageMetrics {
    fn new(printer_id: &str, now: DateTime<Utc>) -> Self {
        let since = MaintenanceType::ALL
            .iter()
            .map(|t| (*t, UsageSince { print_hours: 0.0, performed_at: now }))
            .collect();
        Self {
            printer_id: printer_id.to_string(),
            total_print_hours: 0.0,
            total_prints: 0,
            since,
            failed_prints_recent: 0,
            layer_shift_count: 0,
            clog_count: 0,
        }
    }

    fn task_for(&self, schedule: &MaintenanceSchedule, now: DateTime<Utc>) -> Option<MaintenanceTask> {
        let kind = schedule.maintenance_type;
        let usage = self.since.get(&kind)?;
        let days_since = (now - usage.performed_at).num_days();
        let hours_ratio = usage.print_hours / schedule.interval_hours;
        let days_ratio = days_since as f64 / schedule.interval_days as f64;
        let ratio = hours_ratio.max(days_ratio);

        let mut due = if ratio >= CRITICAL_RATIO {
            Some((
                MaintenanceUrgency::Critical,
                format!(
                    "Overdue: {:.0}h / {}h or {}d / {}d",
                    usage.print_hours, schedule.interval_hours, days_since, schedule.interval_days
                ),
            ))
        } else if ratio >= REQUIRED_RATIO {
            Some((
                MaintenanceUrgency::Required,
                format!("Due: {:.0}h print time or {}d elapsed", usage.print_hours, days_since),
            ))
        } else if ratio >= RECOMMENDED_RATIO {
            Some((
                MaintenanceUrgency::Recommended,
                format!("Soon: {:.0}h / {}h", usage.print_hours, schedule.interval_hours),
            ))
        } else {
            None
        };

        let escalation = match kind {
            MaintenanceType::NozzleReplace if self.clog_count >= CLOG_LIMIT => {
                Some(format!("Multiple clogs detected ({})", self.clog_count))
            }
            MaintenanceType::BeltTension if self.layer_shift_count >= LAYER_SHIFT_LIMIT => {
                Some(format!("Layer shifts detected ({})", self.layer_shift_count))
            }
            _ => None,
        };
        if let Some(reason) = escalation {
            if due.as_ref().is_none_or(|(urgency, _)| *urgency < MaintenanceUrgency::Required) {
                due = Some((MaintenanceUrgency::Required, reason));
            }
        }

        let (urgency, reason) = due?;
        Some(MaintenanceTask {
            printer_id: self.printer_id.clone(),
            maintenance_type: kind,
            urgency,
            reason,
            due_date: usage.performed_at + chrono::Duration::days(schedule.interval_days),
            print_hours_since_last: usage.print_hours,
            days_since_last: days_since,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MaintenanceSummary {
    pub total_printers: usize,
    pub printers_need_maintenance: usize,
    pub critical_tasks: usize,
    pub required_tasks: usize,
    pub recommended_tasks: usize,
    pub by_type: BTreeMap<MaintenanceType, usize>,
}

#[derive(Debug)]
struct PrinterMaintenance {
    usage: PrinterUsageMetrics,
    history: Vec<MaintenanceRecord>,
}

#[derive(Clone)]
pub struct MaintenancePredictor {
    printers: Arc<RwLock<HashMap<String, PrinterMaintenance>>>,
    on_maintenance: Arc<Subscribers<MaintenanceRecord>>,
    clock: Arc<dyn Clock>,
}

impl Default for MaintenancePredictor {
    fn default() -> Self {
        Self::new()
    }
}

impl MaintenancePredictor {
    pub fn new() -> Self {
        Self::with_clock(clock::system())
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            printers: Arc::new(RwLock::new(HashMap::new())),
            on_maintenance: Arc::new(Subscribers::new()),
            clock,
        }
    }

    /// Called with every record logged by [`record_maintenance`](Self::record_maintenance).
    pub async fn on_maintenance<S>(&self, subscriber: S)
    where
        S: Subscriber<MaintenanceRecord> + 'static,
    {
        self.on_maintenance.subscribe(subscriber).await;
    }

    pub async fn register_printer(&self, printer_id: &str) {
        let now = self.clock.now();
        let mut printers = self.printers.write().await;
        Self::entry(&mut printers, printer_id, now);
    }

    fn entry<'a>(
        printers: &'a mut HashMap<String, PrinterMaintenance>,
        printer_id: &str,
        now: DateTime<Utc>,
    ) -> &'a mut PrinterMaintenance {
        printers.entry(printer_id.to_string()).or_insert_with(|| {
            tracing::info!(printer_id, "Registered printer for maintenance tracking");
            PrinterMaintenance {
                usage: PrinterUsageMetrics::new(printer_id, now),
                history: Vec::new(),
            }
        })
    }

    pub async fn get_usage(&self, printer_id: &str) -> Option<PrinterUsageMetrics> {
        self.printers.read().await.get(printer_id).map(|p| p.usage.clone())
    }

    /// Records one finished print lasting `hours`.
    pub async fn add_print_time(&self, printer_id: &str, hours: f64) {
        if !hours.is_finite() || hours < 0.0 {
            tracing::warn!(printer_id, hours, "Ignoring invalid print time");
            return;
        }
        let now = self.clock.now();
        let mut printers = self.printers.write().await;
        let usage = &mut Self::entry(&mut printers, printer_id, now).usage;
        usage.total_print_hours += hours;
        usage.total_prints += 1;
        for since in usage.since.values_mut() {
            since.print_hours += hours;
        }
    }

    pub async fn record_failure(&self, printer_id: &str, kind: FailureKind) {
        let now = self.clock.now();
        let mut printers = self.printers.write().await;
        let usage = &mut Self::entry(&mut printers, printer_id, now).usage;
        usage.failed_prints_recent += 1;
        match kind {
            FailureKind::Clog => usage.clog_count += 1,
            FailureKind::LayerShift => usage.layer_shift_count += 1,
            FailureKind::Other => {}
        }
        tracing::debug!(printer_id, ?kind, "Recorded print failure");
    }

    /// Logs completed maintenance, resets the counters it addresses and
    /// notifies maintenance subscribers.
    pub async fn record_maintenance(
        &self,
        printer_id: &str,
        maintenance_type: MaintenanceType,
        performed_by: &str,
        notes: &str,
        parts_replaced: Vec<String>,
    ) -> MaintenanceRecord {
        let now = self.clock.now();
        let record = {
            let mut printers = self.printers.write().await;
            let state = Self::entry(&mut printers, printer_id, now);
            let usage = &mut state.usage;

            let print_hours_at_maintenance = usage.total_print_hours;
            usage.since.insert(maintenance_type, UsageSince { print_hours: 0.0, performed_at: now });
            match maintenance_type {
                MaintenanceType::NozzleReplace => usage.clog_count = 0,
                MaintenanceType::BeltTension => usage.layer_shift_count = 0,
                _ => {}
            }

            let record = MaintenanceRecord {
                record_id: format!("MR-{:06}", state.history.len() + 1),
                printer_id: printer_id.to_string(),
                maintenance_type,
                performed_at: now,
                performed_by: performed_by.to_string(),
                notes: notes.to_string(),
                parts_replaced,
                print_hours_at_maintenance,
            };
            state.history.push(record.clone());
            record
        };

        tracing::info!(printer_id, maintenance_type = %maintenance_type, record_id = %record.record_id, "Recorded maintenance");
        self.on_maintenance.notify_all("maintenance", &record).await;
        record
    }

    /// Mirrors the printer's blocking maintenance state into the optimizer's
    /// `maintenance_due` flag, setting or clearing it. Returns whether
    /// printing is now blocked.
    pub async fn sync_schedulable(&self, optimizer: &FarmOptimizer, printer_id: &str) -> bool {
        let blocked = self.most_urgent(printer_id).await.is_some_and(|u| u.blocks_printing());
        let flagged = optimizer.get_printer(printer_id).await.map(|p| p.maintenance_due);
        if flagged.is_some_and(|due| due != blocked) {
            if blocked {
                tracing::warn!(printer_id, "Maintenance due, removing printer from scheduling");
            } else {
                tracing::info!(printer_id, "Maintenance cleared, printer back in scheduling");
            }
            optimizer.set_maintenance_due(printer_id, blocked).await;
        }
        blocked
    }

    /// Due and upcoming work for one printer, most urgent first.
    pub async fn get_pending_tasks(&self, printer_id: &str) -> Vec<MaintenanceTask> {
        let now = self.clock.now();
        let printers = self.printers.read().await;
        printers
            .get(printer_id)
            .map(|p| pending_tasks(&p.usage, now))
            .unwrap_or_default()
    }

    pub async fn get_all_pending_tasks(&self) -> BTreeMap<String, Vec<MaintenanceTask>> {
        let now = self.clock.now();
        let printers = self.printers.read().await;
        printers
            .iter()
            .map(|(id, p)| (id.clone(), pending_tasks(&p.usage, now)))
            .collect()
    }

    /// Most pressing pending task, if any.
    pub async fn most_urgent(&self, printer_id: &str) -> Option<MaintenanceUrgency> {
        self.get_pending_tasks(printer_id).await.first().map(|t| t.urgency)
    }

    /// Past maintenance, newest first.
    pub async fn get_history(
        &self,
        printer_id: &str,
        maintenance_type: Option<MaintenanceType>,
        limit: usize,
    ) -> Vec<MaintenanceRecord> {
        let printers = self.printers.read().await;
        let Some(state) = printers.get(printer_id) else {
            return Vec::new();
        };
        state
            .history
            .iter()
            .rev()
            .filter(|r| maintenance_type.is_none_or(|t| r.maintenance_type == t))
            .take(limit)
            .cloned()
            .collect()
    }

    pub async fn get_maintenance_summary(&self) -> MaintenanceSummary {
        let all = self.get_all_pending_tasks().await;
        let mut summary = MaintenanceSummary { total_printers: all.len(), ..Default::default() };
        for tasks in all.values() {
            if tasks.iter().any(|t| t.urgency.blocks_printing()) {
                summary.printers_need_maintenance += 1;
            }
            for task in tasks {
                match task.urgency {
                    MaintenanceUrgency::Critical => summary.critical_tasks += 1,
                    MaintenanceUrgency::Required => summary.required_tasks += 1,
                    MaintenanceUrgency::Recommended => summary.recommended_tasks += 1,
                    MaintenanceUrgency::Optional => {}
                }
                *summary.by_type.entry(task.maintenance_type).or_default() += 1;
            }
        }
        summary
    }
}

fn pending_tasks(usage: &PrinterUsageMetrics, now: DateTime<Utc>) -> Vec<MaintenanceTask> {
    let mut tasks: Vec<MaintenanceTask> = MaintenanceType::ALL
        .iter()
        .filter_map(|t| t.schedule())
        .filter_map(|schedule| usage.task_for(&schedule, now))
        .collect();
    tasks.sort_by(|a, b| b.urgency.cmp(&a.urgency));
    tasks
}
