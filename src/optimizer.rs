//! # Farm Optimizer
//!
//! Owns the printer registry and turns a batch of jobs into job → printer →
//! time-window assignments.
//!
//! The pass is greedy: jobs are visited highest priority first (earliest
//! deadline breaking ties), every compatible printer is scored for the chosen
//! [`OptimizationGoal`], and the lowest score wins. Each printer's "next free"
//! time advances as soon as it receives a job, so later jobs in the same batch
//! see earlier decisions.
//!
//! The registry is only mutated through this type. Other components read and
//! flip live fields (availability, maintenance, current job, reservations)
//! through the accessors below.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::clock::{self, Clock, hours_between};
use crate::print_job::PrintJob;
use crate::printer::PrinterProfile;

/// Default planning horizon handed to [`FarmOptimizer::optimize`] (one week).
pub const DEFAULT_TIME_HORIZON_HOURS: i64 = 168;

const OVERLOAD_FACTOR: f64 = 1.5;
const UNDERLOAD_FACTOR: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizationGoal {
    MinimizeTime,
    MinimizeCost,
    MaximizeUtilization,
    Balanced,
}

impl fmt::Display for OptimizationGoal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OptimizationGoal::MinimizeTime => "minimize_time",
            OptimizationGoal::MinimizeCost => "minimize_cost",
            OptimizationGoal::MaximizeUtilization => "maximize_utilization",
            OptimizationGoal::Balanced => "balanced",
        };
        write!(f, "{}", name)
    }
}

impl OptimizationGoal {
    /// Score of a candidate placement; lower is better. All times in hours.
    pub fn score(
        self,
        now: DateTime<Utc>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        cost: f64,
        deadline: Option<DateTime<Utc>>,
    ) -> f64 {
        let wait = hours_between(now, start);
        let duration = hours_between(start, end);
        match self {
            OptimizationGoal::MinimizeTime => wait + duration,
            OptimizationGoal::MinimizeCost => cost,
            OptimizationGoal::MaximizeUtilization => wait * 2.0 + duration,
            OptimizationGoal::Balanced => {
                wait + duration + cost / 10.0 + deadline_penalty(end, deadline)
            }
        }
    }
}

/// Heavy penalty per hour late, mild penalty when finishing within a day of
/// the deadline.
pub fn deadline_penalty(end: DateTime<Utc>, deadline: Option<DateTime<Utc>>) -> f64 {
    let Some(deadline) = deadline else {
        return 0.0;
    };
    let slack = hours_between(end, deadline);
    if slack < 0.0 {
        slack.abs() * 100.0
    } else if slack < 24.0 {
        (24.0 - slack) * 2.0
    } else {
        0.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    pub job_id: String,
    pub printer_id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub estimated_cost: f64,
    pub score: f64,
}

impl Assignment {
    pub fn duration_hours(&self) -> f64 {
        hours_between(self.start_time, self.end_time)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizationResult {
    pub assignments: Vec<Assignment>,
    pub unassigned_jobs: Vec<String>,
    pub total_time_hours: f64,
    pub total_cost: f64,
    pub utilization_percent: f64,
    pub optimization_goal: OptimizationGoal,
    pub computed_at: DateTime<Utc>,
}

impl OptimizationResult {
    pub fn assignment_for(&self, job_id: &str) -> Option<&Assignment> {
        self.assignments.iter().find(|a| a.job_id == job_id)
    }
}

/// Imbalance report produced by [`FarmOptimizer::rebalance`].
///
/// `migrations` is reserved for (job, from, to) moves and is currently always
/// empty: only the candidate printers are identified.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RebalanceCandidates {
    pub average_workload_hours: f64,
    pub overloaded: Vec<String>,
    pub underloaded: Vec<String>,
    pub migrations: Vec<(String, String, String)>,
}

#[derive(Clone)]
pub struct FarmOptimizer {
    printers: Arc<RwLock<HashMap<String, PrinterProfile>>>,
    clock: Arc<dyn Clock>,
}

impl Default for FarmOptimizer {
    fn default() -> Self {
        Self::new()
    }
}

impl FarmOptimizer {
    pub fn new() -> Self {
        Self::with_clock(clock::system())
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            printers: Arc::new(RwLock::new(HashMap::new())),
            clock,
        }
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        self.clock.clone()
    }

    /// Adds or replaces a printer profile.
    pub async fn register_printer(&self, profile: PrinterProfile) {
        tracing::info!(printer_id = %profile.printer_id, model = %profile.model, "Registered printer");
        self.printers.write().await.insert(profile.printer_id.clone(), profile);
    }

    /// Removes a printer; unknown ids are ignored.
    pub async fn remove_printer(&self, printer_id: &str) -> Option<PrinterProfile> {
        let removed = self.printers.write().await.remove(printer_id);
        if removed.is_some() {
            tracing::info!(printer_id, "Removed printer");
        }
        removed
    }

    pub async fn get_printer(&self, printer_id: &str) -> Option<PrinterProfile> {
        self.printers.read().await.get(printer_id).cloned()
    }

    /// All registered printers ordered by id.
    pub async fn printers(&self) -> Vec<PrinterProfile> {
        let printers = self.printers.read().await;
        sorted_profiles(&printers).into_iter().cloned().collect()
    }

    pub async fn printer_count(&self) -> usize {
        self.printers.read().await.len()
    }

    /// Printers that are available and not due for maintenance.
    pub async fn available_printers(&self) -> Vec<PrinterProfile> {
        let printers = self.printers.read().await;
        sorted_profiles(&printers)
            .into_iter()
            .filter(|p| p.is_schedulable())
            .cloned()
            .collect()
    }

    pub async fn find_compatible_printers(&self, job: &PrintJob) -> Vec<PrinterProfile> {
        let printers = self.printers.read().await;
        compatible(&printers, job).into_iter().cloned().collect()
    }

    pub async fn set_availability(&self, printer_id: &str, available: bool) -> bool {
        self.update(printer_id, |p| p.available = available).await
    }

    pub async fn set_maintenance_due(&self, printer_id: &str, due: bool) -> bool {
        self.update(printer_id, |p| p.maintenance_due = due).await
    }

    pub async fn set_current_job(&self, printer_id: &str, job_id: Option<String>) -> bool {
        self.update(printer_id, |p| p.current_job_id = job_id).await
    }

    /// Records that the printer is booked until `until`. Never moves
    /// `estimated_free_at` backwards.
    pub async fn reserve(&self, printer_id: &str, until: DateTime<Utc>) -> bool {
        self.update(printer_id, |p| {
            if p.estimated_free_at.is_none_or(|free_at| free_at < until) {
                p.estimated_free_at = Some(until);
            }
        })
        .await
    }

    async fn update<F>(&self, printer_id: &str, f: F) -> bool
    where
        F: FnOnce(&mut PrinterProfile),
    {
        match self.printers.write().await.get_mut(printer_id) {
            Some(profile) => {
                f(profile);
                true
            }
            None => {
                tracing::debug!(printer_id, "Registry update for unknown printer ignored");
                false
            }
        }
    }

    /// Assigns `jobs` to compatible printers. Never fails: jobs without a
    /// compatible printer are reported in `unassigned_jobs`. Placements that
    /// start after `now + time_horizon` are still made and logged.
    pub async fn optimize(
        &self,
        jobs: &[PrintJob],
        goal: OptimizationGoal,
        time_horizon: Duration,
    ) -> OptimizationResult {
        tracing::info!(jobs = jobs.len(), goal = %goal, "Optimizing job distribution");

        // One consistent registry view for the whole pass.
        let printers = self.printers.read().await;
        let now = self.clock.now();
        let horizon_end = now.checked_add_signed(time_horizon).unwrap_or(DateTime::<Utc>::MAX_UTC);

        let mut ordered: Vec<&PrintJob> = jobs.iter().collect();
        ordered.sort_by(|a, b| {
            b.priority.cmp(&a.priority).then_with(|| {
                let a_deadline = a.deadline.unwrap_or(DateTime::<Utc>::MAX_UTC);
                let b_deadline = b.deadline.unwrap_or(DateTime::<Utc>::MAX_UTC);
                a_deadline.cmp(&b_deadline)
            })
        });

        let mut next_free: HashMap<&str, DateTime<Utc>> = printers
            .values()
            .map(|p| (p.printer_id.as_str(), p.estimated_free_at.unwrap_or(now)))
            .collect();

        let mut assignments = Vec::new();
        let mut unassigned = Vec::new();

        for job in ordered {
            let candidates = compatible(&printers, job);
            if candidates.is_empty() {
                tracing::warn!(job_id = %job.job_id, "No compatible printer for job");
                unassigned.push(job.job_id.clone());
                continue;
            }

            let mut best: Option<Assignment> = None;
            for printer in candidates {
                let free_at = next_free.get(printer.printer_id.as_str()).copied().unwrap_or(now);
                let start = free_at.max(now);
                let end = start + clock::hours(printer.estimate_hours(job));
                let cost = printer.estimate_cost(job);
                let score = goal.score(now, start, end, cost, job.deadline);

                if best.as_ref().is_none_or(|b| score < b.score) {
                    best = Some(Assignment {
                        job_id: job.job_id.clone(),
                        printer_id: printer.printer_id.clone(),
                        start_time: start,
                        end_time: end,
                        estimated_cost: cost,
                        score,
                    });
                }
            }

            match best {
                Some(assignment) => {
                    if assignment.start_time > horizon_end {
                        tracing::warn!(
                            job_id = %assignment.job_id,
                            printer_id = %assignment.printer_id,
                            "Job placed beyond planning horizon"
                        );
                    }
                    tracing::debug!(
                        job_id = %assignment.job_id,
                        printer_id = %assignment.printer_id,
                        score = assignment.score,
                        "Assigned job"
                    );
                    if let Some(free) = next_free.get_mut(assignment.printer_id.as_str()) {
                        *free = assignment.end_time;
                    }
                    assignments.push(assignment);
                }
                None => {
                    tracing::warn!(job_id = %job.job_id, "No printer could be scored for job");
                    unassigned.push(job.job_id.clone());
                }
            }
        }

        let total_time_hours: f64 = assignments.iter().map(Assignment::duration_hours).sum();
        let total_cost: f64 = assignments.iter().map(|a| a.estimated_cost).sum();
        let utilization_percent = utilization(&assignments, printers.len(), total_time_hours);

        tracing::info!(
            assigned = assignments.len(),
            unassigned = unassigned.len(),
            utilization_percent,
            "Optimization complete"
        );

        OptimizationResult {
            assignments,
            unassigned_jobs: unassigned,
            total_time_hours,
            total_cost,
            utilization_percent,
            optimization_goal: goal,
            computed_at: now,
        }
    }

    /// Finds printers whose remaining booked time is far above or below the
    /// fleet average. No jobs are moved.
    pub async fn rebalance(&self, max_migrations: usize) -> RebalanceCandidates {
        let printers = self.printers.read().await;
        if printers.is_empty() {
            return RebalanceCandidates::default();
        }
        let now = self.clock.now();

        let workloads: Vec<(&str, f64)> = sorted_profiles(&printers)
            .into_iter()
            .map(|p| {
                let hours = p
                    .estimated_free_at
                    .map(|free_at| hours_between(now, free_at).max(0.0))
                    .unwrap_or(0.0);
                (p.printer_id.as_str(), hours)
            })
            .collect();

        let average = workloads.iter().map(|(_, h)| h).sum::<f64>() / workloads.len() as f64;
        let overloaded: Vec<String> = workloads
            .iter()
            .filter(|(_, h)| *h > average * OVERLOAD_FACTOR)
            .map(|(id, _)| id.to_string())
            .collect();
        let underloaded: Vec<String> = workloads
            .iter()
            .filter(|(_, h)| *h < average * UNDERLOAD_FACTOR)
            .map(|(id, _)| id.to_string())
            .collect();

        tracing::debug!(
            average_hours = average,
            overloaded = overloaded.len(),
            underloaded = underloaded.len(),
            max_migrations,
            "Rebalance candidates identified"
        );

        // TODO: pick pending jobs off `overloaded` printers and move them to
        // `underloaded` ones, bounded by `max_migrations`.
        RebalanceCandidates {
            average_workload_hours: average,
            overloaded,
            underloaded,
            migrations: Vec::new(),
        }
    }
}

fn sorted_profiles(printers: &HashMap<String, PrinterProfile>) -> Vec<&PrinterProfile> {
    let mut profiles: Vec<&PrinterProfile> = printers.values().collect();
    profiles.sort_by(|a, b| a.printer_id.cmp(&b.printer_id));
    profiles
}

fn compatible<'a>(printers: &'a HashMap<String, PrinterProfile>, job: &PrintJob) -> Vec<&'a PrinterProfile> {
    sorted_profiles(printers)
        .into_iter()
        .filter(|p| p.is_schedulable())
        .filter(|p| match p.check(job) {
            Ok(()) => true,
            Err(reason) => {
                tracing::debug!(job_id = %job.job_id, printer_id = %p.printer_id, %reason, "Printer rejected");
                false
            }
        })
        .collect()
}

fn utilization(assignments: &[Assignment], printer_count: usize, total_hours: f64) -> f64 {
    let (Some(first_start), Some(last_end)) = (
        assignments.iter().map(|a| a.start_time).min(),
        assignments.iter().map(|a| a.end_time).max(),
    ) else {
        return 0.0;
    };
    let capacity = hours_between(first_start, last_end) * printer_count as f64;
    if capacity > 0.0 {
        total_hours / capacity * 100.0
    } else {
        0.0
    }
}
