// src/monitor/metrics.rs - Fleet snapshot aggregation and rolling history
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use super::state::{PrinterState, PrinterStatus};

/// Point-in-time fleet snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FarmMetrics {
    pub timestamp: DateTime<Utc>,
    pub total_printers: usize,
    pub online_printers: usize,
    pub printing_printers: usize,
    pub idle_printers: usize,
    pub error_printers: usize,
    pub maintenance_printers: usize,

    pub utilization_percent: f64,
    pub avg_job_progress: f64,

    pub jobs_completed_24h: usize,
    pub jobs_failed_24h: usize,
    pub success_rate_24h: f64,

    pub active_alerts: usize,
    pub critical_alerts: usize,
}

impl FarmMetrics {
    /// Aggregates printer states. A printer counts as online when it reported
    /// after `online_cutoff` and is not marked offline.
    pub(crate) fn compute<'a>(
        now: DateTime<Utc>,
        states: impl Iterator<Item = &'a PrinterState>,
        online_cutoff: DateTime<Utc>,
    ) -> Self {
        let mut metrics = Self::empty(now);
        let mut progress_sum = 0.0;

        for state in states {
            metrics.total_printers += 1;
            if state.last_seen <= online_cutoff || state.status == PrinterStatus::Offline {
                continue;
            }
            metrics.online_printers += 1;
            match state.status {
                PrinterStatus::Printing => {
                    metrics.printing_printers += 1;
                    progress_sum += state.job_progress;
                }
                PrinterStatus::Idle => metrics.idle_printers += 1,
                PrinterStatus::Error => metrics.error_printers += 1,
                PrinterStatus::Maintenance => metrics.maintenance_printers += 1,
                _ => {}
            }
        }

        if metrics.online_printers > 0 {
            metrics.utilization_percent =
                metrics.printing_printers as f64 / metrics.online_printers as f64 * 100.0;
        }
        if metrics.printing_printers > 0 {
            metrics.avg_job_progress = progress_sum / metrics.printing_printers as f64;
        }
        metrics
    }

    fn empty(now: DateTime<Utc>) -> Self {
        Self {
            timestamp: now,
            total_printers: 0,
            online_printers: 0,
            printing_printers: 0,
            idle_printers: 0,
            error_printers: 0,
            maintenance_printers: 0,
            utilization_percent: 0.0,
            avg_job_progress: 0.0,
            jobs_completed_24h: 0,
            jobs_failed_24h: 0,
            success_rate_24h: 100.0,
            active_alerts: 0,
            critical_alerts: 0,
        }
    }
}

/// Job outcomes reported by the host, kept for one day.
#[derive(Debug, Default)]
pub(crate) struct OutcomeLog {
    entries: VecDeque<(DateTime<Utc>, bool)>,
}

impl OutcomeLog {
    pub fn record(&mut self, at: DateTime<Utc>, succeeded: bool) {
        self.entries.push_back((at, succeeded));
    }

    /// Prunes entries older than a day and returns (completed, failed).
    pub fn last_day(&mut self, now: DateTime<Utc>) -> (usize, usize) {
        let cutoff = now - Duration::hours(24);
        while self.entries.front().is_some_and(|(at, _)| *at <= cutoff) {
            self.entries.pop_front();
        }
        let completed = self.entries.iter().filter(|(_, ok)| *ok).count();
        (completed, self.entries.len() - completed)
    }
}

/// Snapshots newer than the retention window.
#[derive(Debug, Default)]
pub(crate) struct MetricsHistory {
    snapshots: VecDeque<FarmMetrics>,
}

impl MetricsHistory {
    pub fn push(&mut self, snapshot: FarmMetrics, retention: Duration) {
        let cutoff = snapshot
            .timestamp
            .checked_sub_signed(retention)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        self.snapshots.push_back(snapshot);
        while self.snapshots.front().is_some_and(|m| m.timestamp <= cutoff) {
            self.snapshots.pop_front();
        }
    }

    pub fn to_vec(&self) -> Vec<FarmMetrics> {
        self.snapshots.iter().cloned().collect()
    }
}

pub(crate) fn success_rate(completed: usize, failed: usize) -> f64 {
    let total = completed + failed;
    if total == 0 {
        100.0
    } else {
        completed as f64 / total as f64 * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::state::TelemetryUpdate;

    fn state(id: &str, status: PrinterStatus, seen: DateTime<Utc>, progress: f64) -> PrinterState {
        let mut s = PrinterState::new(id, seen);
        s.apply(TelemetryUpdate { status: Some(status), job_progress: Some(progress), ..Default::default() });
        s
    }

    #[test]
    fn test_utilization_counts_only_online_printers() {
        let now = Utc::now();
        let cutoff = now - Duration::seconds(120);
        let states = [
            state("a", PrinterStatus::Printing, now, 40.0),
            state("b", PrinterStatus::Printing, now, 60.0),
            state("c", PrinterStatus::Idle, now, 0.0),
            state("d", PrinterStatus::Idle, now, 0.0),
            state("e", PrinterStatus::Printing, now - Duration::seconds(600), 10.0),
            state("f", PrinterStatus::Offline, now, 0.0),
        ];
        let m = FarmMetrics::compute(now, states.iter(), cutoff);
        assert_eq!(m.total_printers, 6);
        assert_eq!(m.online_printers, 4);
        assert_eq!(m.printing_printers, 2);
        assert_eq!(m.idle_printers, 2);
        assert!((m.utilization_percent - 50.0).abs() < 1e-9);
        assert!((m.avg_job_progress - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_empty_fleet_has_zero_utilization() {
        let now = Utc::now();
        let m = FarmMetrics::compute(now, std::iter::empty(), now);
        assert_eq!(m.utilization_percent, 0.0);
        assert_eq!(m.success_rate_24h, 100.0);
    }

    #[test]
    fn test_outcomes_expire_after_a_day() {
        let now = Utc::now();
        let mut log = OutcomeLog::default();
        log.record(now - Duration::hours(30), false);
        log.record(now - Duration::hours(2), true);
        log.record(now - Duration::hours(1), false);
        assert_eq!(log.last_day(now), (1, 1));
        assert_eq!(success_rate(1, 1), 50.0);
        assert_eq!(success_rate(0, 0), 100.0);
    }

    #[test]
    fn test_history_is_pruned_to_retention() {
        let now = Utc::now();
        let mut history = MetricsHistory::default();
        history.push(FarmMetrics::empty(now - Duration::hours(25)), Duration::hours(24));
        history.push(FarmMetrics::empty(now - Duration::hours(1)), Duration::hours(24));
        history.push(FarmMetrics::empty(now), Duration::hours(24));
        assert_eq!(history.to_vec().len(), 2);
    }
}
