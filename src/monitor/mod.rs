//! # Farm Monitor
//!
//! Tracks live printer state from telemetry pushes, raises alerts on
//! concerning transitions and readings, and keeps a rolling history of fleet
//! metrics. A periodic loop marks silent printers offline and records a
//! metrics snapshot.
//!
//! The monitor's view of a printer is independent of the optimizer registry:
//! a printer marked offline here stays schedulable until the host changes its
//! availability.

mod alerts;
mod metrics;
mod state;

pub use alerts::{
    Alert, AlertFilter, AlertSeverity, CATEGORY_CONNECTIVITY, CATEGORY_CONSUMABLES, CATEGORY_STATUS,
    CATEGORY_TEMPERATURE,
};
pub use metrics::FarmMetrics;
pub use state::{PrinterState, PrinterStatus, TelemetryUpdate};

use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock, broadcast};
use tokio::task::JoinHandle;

use crate::clock::{self, Clock};
use crate::config::MonitorConfig;
use crate::events::{Subscriber, Subscribers, panic_message};

use alerts::AlertBook;
use metrics::{MetricsHistory, OutcomeLog, success_rate};

/// Published to `on_status_change` subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChange {
    pub printer_id: String,
    pub old_status: PrinterStatus,
    pub new_status: PrinterStatus,
}

#[derive(Clone)]
pub struct FarmMonitor {
    inner: Arc<MonitorInner>,
}

struct MonitorInner {
    config: MonitorConfig,
    clock: Arc<dyn Clock>,
    states: RwLock<HashMap<String, PrinterState>>,
    alerts: Mutex<AlertBook>,
    history: Mutex<MetricsHistory>,
    outcomes: Mutex<OutcomeLog>,
    on_status_change: Subscribers<StatusChange>,
    on_alert: Subscribers<Alert>,
    task: Mutex<Option<(broadcast::Sender<()>, JoinHandle<()>)>>,
}

impl FarmMonitor {
    pub fn new(config: MonitorConfig) -> Self {
        Self::with_clock(config, clock::system())
    }

    pub fn with_clock(config: MonitorConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(MonitorInner {
                config,
                clock,
                states: RwLock::new(HashMap::new()),
                alerts: Mutex::new(AlertBook::default()),
                history: Mutex::new(MetricsHistory::default()),
                outcomes: Mutex::new(OutcomeLog::default()),
                on_status_change: Subscribers::new(),
                on_alert: Subscribers::new(),
                task: Mutex::new(None),
            }),
        }
    }

    pub async fn on_status_change<S>(&self, subscriber: S)
    where
        S: Subscriber<StatusChange> + 'static,
    {
        self.inner.on_status_change.subscribe(subscriber).await;
    }

    pub async fn on_alert<S>(&self, subscriber: S)
    where
        S: Subscriber<Alert> + 'static,
    {
        self.inner.on_alert.subscribe(subscriber).await;
    }

    /// Starts tracking a printer. Already-known printers keep their state.
    pub async fn register_printer(&self, printer_id: &str) {
        let now = self.inner.clock.now();
        let mut states = self.inner.states.write().await;
        if !states.contains_key(printer_id) {
            states.insert(printer_id.to_string(), PrinterState::new(printer_id, now));
            tracing::info!(printer_id, "Registered printer for monitoring");
        }
    }

    pub async fn unregister_printer(&self, printer_id: &str) -> bool {
        let removed = self.inner.states.write().await.remove(printer_id).is_some();
        if removed {
            tracing::info!(printer_id, "Unregistered printer from monitoring");
        }
        removed
    }

    pub async fn get_state(&self, printer_id: &str) -> Option<PrinterState> {
        self.inner.states.read().await.get(printer_id).cloned()
    }

    pub async fn get_all_states(&self) -> HashMap<String, PrinterState> {
        self.inner.states.read().await.clone()
    }

    /// Merges a telemetry push. Unknown printers are registered on first
    /// contact. A status change is handled before the reading checks, so one
    /// update can raise both kinds of alert.
    pub async fn update_state(&self, printer_id: &str, update: TelemetryUpdate) {
        let now = self.inner.clock.now();
        let (previous, state) = {
            let mut states = self.inner.states.write().await;
            let state = states
                .entry(printer_id.to_string())
                .or_insert_with(|| PrinterState::new(printer_id, now));
            let previous = state.apply(update);
            state.last_seen = now;
            (previous, state.clone())
        };

        if previous != state.status {
            self.handle_status_change(&state, previous).await;
        }
        self.check_conditions(&state).await;
    }

    async fn handle_status_change(&self, state: &PrinterState, previous: PrinterStatus) {
        tracing::info!(
            printer_id = %state.printer_id,
            from = %previous,
            to = %state.status,
            "Printer status changed"
        );

        match state.status {
            PrinterStatus::Error => {
                let reason = state.error_message.as_deref().unwrap_or("Unknown error");
                self.create_alert(
                    &state.printer_id,
                    AlertSeverity::Error,
                    CATEGORY_STATUS,
                    format!("Printer entered error state: {}", reason),
                )
                .await;
            }
            PrinterStatus::Offline => {
                self.create_alert(
                    &state.printer_id,
                    AlertSeverity::Warning,
                    CATEGORY_CONNECTIVITY,
                    "Printer went offline".to_string(),
                )
                .await;
            }
            _ => {}
        }

        let change = StatusChange {
            printer_id: state.printer_id.clone(),
            old_status: previous,
            new_status: state.status,
        };
        self.inner.on_status_change.notify_all("status_change", &change).await;
    }

    async fn check_conditions(&self, state: &PrinterState) {
        let config = &self.inner.config;
        if let Some(variance) = state.nozzle_variance() {
            if variance > config.temp_variance_threshold {
                self.create_alert(
                    &state.printer_id,
                    AlertSeverity::Warning,
                    CATEGORY_TEMPERATURE,
                    format!("Nozzle temperature variance: {:.1}°C from target", variance),
                )
                .await;
            }
        }
        if state.filament_remaining_percent < config.filament_low_threshold {
            self.create_alert(
                &state.printer_id,
                AlertSeverity::Warning,
                CATEGORY_CONSUMABLES,
                format!("Low filament: {:.1}% remaining", state.filament_remaining_percent),
            )
            .await;
        }
    }

    /// Records a new alert and notifies alert subscribers.
    pub async fn create_alert(
        &self,
        printer_id: &str,
        severity: AlertSeverity,
        category: &str,
        message: String,
    ) -> Alert {
        let now = self.inner.clock.now();
        let alert = self
            .inner
            .alerts
            .lock()
            .await
            .raise(printer_id, severity, category, message, now);
        tracing::warn!(
            alert_id = %alert.alert_id,
            printer_id,
            severity = %severity,
            category,
            "Alert created: {}",
            alert.message
        );
        self.inner.on_alert.notify_all("alert", &alert).await;
        alert
    }

    pub async fn get_alerts(&self, filter: &AlertFilter) -> Vec<Alert> {
        self.inner.alerts.lock().await.query(filter)
    }

    pub async fn acknowledge_alert(&self, alert_id: &str, user_id: &str) -> bool {
        let now = self.inner.clock.now();
        let acknowledged = self.inner.alerts.lock().await.acknowledge(alert_id, user_id, now);
        if acknowledged {
            tracing::info!(alert_id, user_id, "Alert acknowledged");
        }
        acknowledged
    }

    pub async fn resolve_alert(&self, alert_id: &str) -> bool {
        let now = self.inner.clock.now();
        let resolved = self.inner.alerts.lock().await.resolve(alert_id, now);
        if resolved {
            tracing::info!(alert_id, "Alert resolved");
        }
        resolved
    }

    /// Feeds the 24 hour job counters in [`FarmMetrics`].
    pub async fn record_job_outcome(&self, succeeded: bool) {
        let now = self.inner.clock.now();
        self.inner.outcomes.lock().await.record(now, succeeded);
    }

    pub async fn get_metrics(&self) -> FarmMetrics {
        let now = self.inner.clock.now();
        let cutoff = self.online_cutoff(now);
        let mut metrics = {
            let states = self.inner.states.read().await;
            FarmMetrics::compute(now, states.values(), cutoff)
        };

        let (active, critical) = self.inner.alerts.lock().await.active_counts();
        metrics.active_alerts = active;
        metrics.critical_alerts = critical;

        let (completed, failed) = self.inner.outcomes.lock().await.last_day(now);
        metrics.jobs_completed_24h = completed;
        metrics.jobs_failed_24h = failed;
        metrics.success_rate_24h = success_rate(completed, failed);
        metrics
    }

    fn online_cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now.checked_sub_signed(self.inner.config.offline_threshold())
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// Snapshots within the retention window, oldest first.
    pub async fn metrics_history(&self) -> Vec<FarmMetrics> {
        self.inner.history.lock().await.to_vec()
    }

    /// One loop iteration: marks silent printers offline, then records a
    /// metrics snapshot. Returns how many printers went offline.
    pub async fn tick(&self) -> usize {
        let now = self.inner.clock.now();
        let cutoff = self.online_cutoff(now);
        let mut stale: Vec<String> = {
            let states = self.inner.states.read().await;
            states
                .values()
                .filter(|s| s.last_seen < cutoff && s.status != PrinterStatus::Offline)
                .map(|s| s.printer_id.clone())
                .collect()
        };
        stale.sort();

        for printer_id in &stale {
            tracing::warn!(printer_id = %printer_id, "No telemetry within offline threshold");
            self.update_state(printer_id, TelemetryUpdate::status(PrinterStatus::Offline)).await;
        }

        let snapshot = self.get_metrics().await;
        self.inner
            .history
            .lock()
            .await
            .push(snapshot, self.inner.config.metrics_retention());
        stale.len()
    }

    pub async fn is_running(&self) -> bool {
        self.inner.task.lock().await.is_some()
    }

    pub async fn start(&self) {
        let mut task = self.inner.task.lock().await;
        if task.is_some() {
            return;
        }
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let this = self.clone();
        let handle = tokio::spawn(async move { this.run(shutdown_rx).await });
        *task = Some((shutdown_tx, handle));
        tracing::info!(poll_interval_secs = self.inner.config.poll_interval_secs, "Farm monitor started");
    }

    /// Stops the loop and waits for it to exit.
    pub async fn stop(&self) {
        let task = self.inner.task.lock().await.take();
        if let Some((shutdown_tx, handle)) = task {
            let _ = shutdown_tx.send(());
            if let Err(e) = handle.await {
                tracing::error!("Monitor loop terminated abnormally: {}", e);
            }
        }
        tracing::info!("Farm monitor stopped");
    }

    async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) {
        let mut interval = tokio::time::interval(self.inner.config.poll_interval());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    tracing::info!("Monitor loop shutting down");
                    break;
                }
                _ = interval.tick() => {}
            }

            if let Err(panic) = AssertUnwindSafe(self.tick()).catch_unwind().await {
                tracing::error!("Monitor loop error: {}", panic_message(panic.as_ref()));
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    _ = tokio::time::sleep(self.inner.config.error_backoff()) => {}
                }
            }
        }
    }
}
