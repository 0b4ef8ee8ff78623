// src/monitor/alerts.rs - Append-only alert book with acknowledge/resolve lifecycle
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

pub const CATEGORY_STATUS: &str = "status";
pub const CATEGORY_CONNECTIVITY: &str = "connectivity";
pub const CATEGORY_TEMPERATURE: &str = "temperature";
pub const CATEGORY_CONSUMABLES: &str = "consumables";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

impl fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AlertSeverity::Info => "info",
            AlertSeverity::Warning => "warning",
            AlertSeverity::Error => "error",
            AlertSeverity::Critical => "critical",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub alert_id: String,
    pub printer_id: String,
    pub severity: AlertSeverity,
    pub category: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
    pub acknowledged: bool,
    pub acknowledged_by: Option<String>,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub resolved: bool,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Alert {
    pub fn is_active(&self) -> bool {
        !self.resolved
    }
}

/// Query for [`FarmMonitor::get_alerts`](super::FarmMonitor::get_alerts).
/// The default selects every unresolved alert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertFilter {
    pub printer_id: Option<String>,
    pub severity: Option<AlertSeverity>,
    pub active_only: bool,
}

impl Default for AlertFilter {
    fn default() -> Self {
        Self { printer_id: None, severity: None, active_only: true }
    }
}

impl AlertFilter {
    pub fn all() -> Self {
        Self { active_only: false, ..Self::default() }
    }

    pub fn for_printer(printer_id: impl Into<String>) -> Self {
        Self { printer_id: Some(printer_id.into()), ..Self::default() }
    }

    pub fn with_severity(mut self, severity: AlertSeverity) -> Self {
        self.severity = Some(severity);
        self
    }

    fn matches(&self, alert: &Alert) -> bool {
        self.printer_id.as_deref().is_none_or(|id| alert.printer_id == id)
            && self.severity.is_none_or(|s| alert.severity == s)
            && (!self.active_only || alert.is_active())
    }
}

/// Alerts keyed by their raise sequence, with an id index for lookups.
#[derive(Debug, Default)]
pub(crate) struct AlertBook {
    alerts: BTreeMap<u64, Alert>,
    ids: HashMap<String, u64>,
    counter: u64,
}

impl AlertBook {
    pub fn raise(
        &mut self,
        printer_id: &str,
        severity: AlertSeverity,
        category: &str,
        message: String,
        now: DateTime<Utc>,
    ) -> Alert {
        self.counter += 1;
        let alert = Alert {
            alert_id: format!("ALT-{:06}", self.counter),
            printer_id: printer_id.to_string(),
            severity,
            category: category.to_string(),
            message,
            created_at: now,
            acknowledged: false,
            acknowledged_by: None,
            acknowledged_at: None,
            resolved: false,
            resolved_at: None,
        };
        self.ids.insert(alert.alert_id.clone(), self.counter);
        self.alerts.insert(self.counter, alert.clone());
        alert
    }

    /// Matching alerts, newest first. Equal timestamps fall back to the
    /// most recently raised.
    pub fn query(&self, filter: &AlertFilter) -> Vec<Alert> {
        // Walk in descending sequence; the stable sort keeps that order for ties.
        let mut alerts: Vec<Alert> = self.alerts.values().rev().filter(|a| filter.matches(a)).cloned().collect();
        alerts.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        alerts
    }

    fn get_mut(&mut self, alert_id: &str) -> Option<&mut Alert> {
        let seq = self.ids.get(alert_id)?;
        self.alerts.get_mut(seq)
    }

    pub fn acknowledge(&mut self, alert_id: &str, user_id: &str, now: DateTime<Utc>) -> bool {
        match self.get_mut(alert_id) {
            Some(alert) => {
                alert.acknowledged = true;
                alert.acknowledged_by = Some(user_id.to_string());
                alert.acknowledged_at = Some(now);
                true
            }
            None => false,
        }
    }

    pub fn resolve(&mut self, alert_id: &str, now: DateTime<Utc>) -> bool {
        match self.get_mut(alert_id) {
            Some(alert) => {
                alert.resolved = true;
                alert.resolved_at = Some(now);
                true
            }
            None => false,
        }
    }

    pub fn active_counts(&self) -> (usize, usize) {
        let active = self.alerts.values().filter(|a| a.is_active());
        active.fold((0, 0), |(all, critical), a| {
            (all + 1, critical + usize::from(a.severity == AlertSeverity::Critical))
        })
    }
}
