//! # Farm Scheduler
//!
//! Stateful orchestrator over the optimizer: owns the job graph and the
//! per-printer timeline, moves jobs through their lifecycle and runs the
//! periodic promote/reschedule loop.
//!
//! Lock order is always job graph → timeline → optimizer registry, and no
//! lock is held while subscribers run.

mod graph;
mod timeline;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock, broadcast};
use tokio::task::JoinHandle;

use crate::clock::Clock;
use crate::config::SchedulerConfig;
use crate::events::{Subscriber, Subscribers, panic_message};
use crate::optimizer::{FarmOptimizer, OptimizationGoal};
use crate::print_job::{JobState, PrintJob, PrintJobError, ScheduleSlot, ScheduledJob};

use graph::JobGraph;
use timeline::Timeline;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleStatus {
    Stopped,
    Running,
    Paused,
}

impl fmt::Display for ScheduleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ScheduleStatus::Stopped => "stopped",
            ScheduleStatus::Running => "running",
            ScheduleStatus::Paused => "paused",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleSummary {
    pub status: ScheduleStatus,
    pub total_jobs: usize,
    pub by_state: BTreeMap<JobState, usize>,
    pub printers_scheduled: usize,
    pub queued: usize,
    pub printing: usize,
    pub completed: usize,
    pub failed: usize,
}

/// Outcome of one loop iteration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub started: usize,
    pub scheduled: usize,
}

#[derive(Clone)]
pub struct FarmScheduler {
    inner: Arc<SchedulerInner>,
}

struct SchedulerInner {
    optimizer: FarmOptimizer,
    config: SchedulerConfig,
    clock: Arc<dyn Clock>,
    status: RwLock<ScheduleStatus>,
    jobs: Mutex<JobGraph>,
    timeline: Mutex<Timeline>,
    on_job_start: Subscribers<ScheduledJob>,
    on_job_complete: Subscribers<ScheduledJob>,
    on_job_fail: Subscribers<ScheduledJob>,
    task: Mutex<Option<LoopHandle>>,
}

struct LoopHandle {
    shutdown_tx: broadcast::Sender<()>,
    handle: JoinHandle<()>,
}

impl FarmScheduler {
    /// The scheduler reads time from the optimizer's clock so both agree on "now".
    pub fn new(optimizer: FarmOptimizer, config: SchedulerConfig) -> Self {
        let clock = optimizer.clock();
        Self {
            inner: Arc::new(SchedulerInner {
                optimizer,
                config,
                clock,
                status: RwLock::new(ScheduleStatus::Stopped),
                jobs: Mutex::new(JobGraph::new()),
                timeline: Mutex::new(Timeline::new()),
                on_job_start: Subscribers::new(),
                on_job_complete: Subscribers::new(),
                on_job_fail: Subscribers::new(),
                task: Mutex::new(None),
            }),
        }
    }

    pub fn optimizer(&self) -> &FarmOptimizer {
        &self.inner.optimizer
    }

    pub async fn status(&self) -> ScheduleStatus {
        *self.inner.status.read().await
    }

    pub async fn on_job_start<S>(&self, subscriber: S)
    where
        S: Subscriber<ScheduledJob> + 'static,
    {
        self.inner.on_job_start.subscribe(subscriber).await;
    }

    pub async fn on_job_complete<S>(&self, subscriber: S)
    where
        S: Subscriber<ScheduledJob> + 'static,
    {
        self.inner.on_job_complete.subscribe(subscriber).await;
    }

    pub async fn on_job_fail<S>(&self, subscriber: S)
    where
        S: Subscriber<ScheduledJob> + 'static,
    {
        self.inner.on_job_fail.subscribe(subscriber).await;
    }

    /// Starts the background loop, or resumes it when paused.
    pub async fn start(&self) {
        let mut status = self.inner.status.write().await;
        match *status {
            ScheduleStatus::Running => return,
            ScheduleStatus::Paused => {
                *status = ScheduleStatus::Running;
                tracing::info!("Farm scheduler resumed");
                return;
            }
            ScheduleStatus::Stopped => {}
        }
        *status = ScheduleStatus::Running;

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let this = self.clone();
        let handle = tokio::spawn(async move { this.run(shutdown_rx).await });
        *self.inner.task.lock().await = Some(LoopHandle { shutdown_tx, handle });
        tracing::info!(
            interval_secs = self.inner.config.reschedule_interval_secs,
            "Farm scheduler started"
        );
    }

    /// Stops the loop and waits for it to exit. No scheduler state changes
    /// from the loop after this returns.
    pub async fn stop(&self) {
        let mut status = self.inner.status.write().await;
        *status = ScheduleStatus::Stopped;
        let task = self.inner.task.lock().await.take();
        drop(status);

        if let Some(LoopHandle { shutdown_tx, handle }) = task {
            let _ = shutdown_tx.send(());
            if let Err(e) = handle.await {
                tracing::error!("Scheduler loop terminated abnormally: {}", e);
            }
        }
        tracing::info!("Farm scheduler stopped");
    }

    /// Suspends job starts and periodic rescheduling. Jobs already printing
    /// are unaffected.
    pub async fn pause(&self) {
        let mut status = self.inner.status.write().await;
        if *status == ScheduleStatus::Running {
            *status = ScheduleStatus::Paused;
            tracing::info!("Farm scheduler paused");
        }
    }

    pub async fn resume(&self) {
        let mut status = self.inner.status.write().await;
        if *status == ScheduleStatus::Paused {
            *status = ScheduleStatus::Running;
            tracing::info!("Farm scheduler resumed");
        }
    }

    async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) {
        let mut interval = tokio::time::interval(self.inner.config.reschedule_interval());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    tracing::info!("Scheduler loop shutting down");
                    break;
                }
                _ = interval.tick() => {}
            }
            if self.status().await != ScheduleStatus::Running {
                continue;
            }

            let failure = match AssertUnwindSafe(self.tick()).catch_unwind().await {
                Ok(Ok(report)) => {
                    tracing::debug!(started = report.started, scheduled = report.scheduled, "Scheduler tick");
                    None
                }
                Ok(Err(e)) => Some(e.to_string()),
                Err(panic) => Some(panic_message(panic.as_ref())),
            };
            if let Some(error) = failure {
                tracing::error!("Scheduler error: {}", error);
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    _ = tokio::time::sleep(self.inner.config.error_backoff()) => {}
                }
            }
        }
    }

    /// One loop iteration: start due jobs, then reschedule.
    pub async fn tick(&self) -> Result<TickReport, PrintJobError> {
        let started = self.start_ready_jobs().await?;
        let scheduled = self.reschedule().await?;
        Ok(TickReport { started, scheduled })
    }

    pub async fn add_job(&self, job: PrintJob, depends_on: Vec<String>) -> Result<ScheduledJob, PrintJobError> {
        let mut jobs = self.inner.jobs.lock().await;
        let scheduled = jobs.insert(job, depends_on)?.clone();
        tracing::info!(job_id = %scheduled.job_id(), depends_on = ?scheduled.depends_on, "Added job to schedule");
        Ok(scheduled)
    }

    /// Cancels a job that has not started and frees its reservation. The
    /// returned record is in the `Cancelled` state.
    pub async fn remove_job(&self, job_id: &str) -> Result<ScheduledJob, PrintJobError> {
        let mut jobs = self.inner.jobs.lock().await;
        let removed = jobs.remove(job_id)?;
        self.inner.timeline.lock().await.release(job_id);
        tracing::info!(job_id, "Removed job from schedule");
        Ok(removed)
    }

    pub async fn get_job(&self, job_id: &str) -> Option<ScheduledJob> {
        self.inner.jobs.lock().await.get(job_id).cloned()
    }

    /// Jobs in submission order, optionally filtered by state.
    pub async fn get_all_jobs(&self, state: Option<JobState>) -> Vec<ScheduledJob> {
        let jobs = self.inner.jobs.lock().await;
        jobs.iter()
            .filter(|j| state.is_none_or(|s| j.state == s))
            .cloned()
            .collect()
    }

    /// Jobs waiting for a printer.
    pub async fn get_queue(&self) -> Vec<ScheduledJob> {
        self.get_all_jobs(Some(JobState::Queued)).await
    }

    pub async fn get_printer_schedule(&self, printer_id: &str) -> Vec<ScheduleSlot> {
        self.inner.timeline.lock().await.for_printer(printer_id)
    }

    pub async fn get_schedule_summary(&self) -> ScheduleSummary {
        let status = self.status().await;
        let jobs = self.inner.jobs.lock().await;
        let mut by_state: BTreeMap<JobState, usize> = JobState::ALL.iter().map(|s| (*s, 0)).collect();
        for job in jobs.iter() {
            *by_state.entry(job.state).or_default() += 1;
        }
        let printers_scheduled = self.inner.timeline.lock().await.printer_count();
        let count = |s: JobState| by_state.get(&s).copied().unwrap_or(0);
        ScheduleSummary {
            status,
            total_jobs: jobs.len(),
            printers_scheduled,
            queued: count(JobState::Queued),
            printing: count(JobState::Printing),
            completed: count(JobState::Completed),
            failed: count(JobState::Failed),
            by_state,
        }
    }

    /// Assigns every queued job whose dependencies are complete. Reservations
    /// on printers that were removed, disabled or sent to maintenance are
    /// dropped and their jobs re-planned in the same pass. Returns how many
    /// jobs were scheduled.
    pub async fn reschedule(&self) -> Result<usize, PrintJobError> {
        let optimizer = &self.inner.optimizer;
        let mut jobs = self.inner.jobs.lock().await;
        let mut timeline = self.inner.timeline.lock().await;

        for job_id in jobs.ids() {
            let Some(printer_id) = jobs
                .get(&job_id)
                .filter(|j| j.state == JobState::Scheduled)
                .and_then(|j| j.assigned_printer.clone())
            else {
                continue;
            };
            let still_valid = optimizer
                .get_printer(&printer_id)
                .await
                .is_some_and(|p| p.is_schedulable());
            if still_valid {
                continue;
            }
            if let Some(job) = jobs.get_mut(&job_id) {
                tracing::warn!(job_id = %job_id, printer_id = %printer_id, "Reservation invalidated, re-planning job");
                timeline.release(&job_id);
                job.clear_assignment();
                job.transition(JobState::Queued)?;
            }
        }

        let pending: Vec<PrintJob> = jobs
            .iter()
            .filter(|j| j.state == JobState::Queued && jobs.dependencies_met(j))
            .map(|j| j.job.clone())
            .collect();
        if pending.is_empty() {
            return Ok(0);
        }

        let result = optimizer
            .optimize(&pending, OptimizationGoal::Balanced, self.inner.config.time_horizon())
            .await;

        let mut scheduled_count = 0;
        for assignment in &result.assignments {
            let Some(job) = jobs.get_mut(&assignment.job_id) else {
                continue;
            };
            let slot = ScheduleSlot {
                printer_id: assignment.printer_id.clone(),
                job_id: assignment.job_id.clone(),
                start_time: assignment.start_time,
                end_time: assignment.end_time,
                confirmed: false,
            };
            // A re-registered printer forgets its busy time; the job stays
            // queued and the next pass plans after the held slot.
            if let Err(held) = timeline.reserve(slot) {
                tracing::warn!(
                    job_id = %assignment.job_id,
                    printer_id = %assignment.printer_id,
                    held_by = %held.job_id,
                    "Placement overlaps a held slot, deferring job"
                );
                optimizer.reserve(&held.printer_id, held.end_time).await;
                continue;
            }
            job.transition(JobState::Scheduled)?;
            job.assign(&assignment.printer_id, assignment.start_time, assignment.end_time);
            optimizer.reserve(&assignment.printer_id, assignment.end_time).await;
            scheduled_count += 1;
        }

        tracing::info!(
            scheduled = scheduled_count,
            unassigned = result.unassigned_jobs.len(),
            "Rescheduled jobs"
        );
        Ok(scheduled_count)
    }

    /// Moves due SCHEDULED jobs whose dependencies are complete through
    /// PREPARING to PRINTING, notifying start subscribers in between. A
    /// printer that is still busy with another job holds its next job back.
    async fn start_ready_jobs(&self) -> Result<usize, PrintJobError> {
        let now = self.inner.clock.now();
        let ready = {
            let mut jobs = self.inner.jobs.lock().await;
            let mut timeline = self.inner.timeline.lock().await;

            let mut busy: HashSet<String> = jobs
                .iter()
                .filter(|j| j.state.is_active())
                .filter_map(|j| j.assigned_printer.clone())
                .collect();
            let due: Vec<String> = jobs
                .iter()
                .filter(|j| j.state == JobState::Scheduled && is_due(j.scheduled_start, now))
                .filter(|j| jobs.dependencies_met(j))
                .map(|j| j.job_id().to_string())
                .collect();

            let mut ready = Vec::new();
            for job_id in due {
                let Some(printer_id) = jobs.get(&job_id).and_then(|j| j.assigned_printer.clone()) else {
                    continue;
                };
                // Reservations on printers that left service are re-planned by reschedule.
                let in_service = self
                    .inner
                    .optimizer
                    .get_printer(&printer_id)
                    .await
                    .is_some_and(|p| p.is_schedulable());
                if !in_service {
                    tracing::debug!(job_id = %job_id, printer_id = %printer_id, "Printer out of service, start deferred");
                    continue;
                }
                let Some(job) = jobs.get_mut(&job_id) else { continue };
                if !busy.insert(printer_id.clone()) {
                    tracing::debug!(job_id = %job_id, printer_id = %printer_id, "Printer busy, start deferred");
                    continue;
                }
                job.transition(JobState::Preparing)?;
                job.actual_start = Some(now);
                timeline.confirm(&job_id);
                self.inner.optimizer.set_current_job(&printer_id, Some(job_id.clone())).await;
                ready.push(job.clone());
            }
            ready
        };

        for job in &ready {
            tracing::info!(
                job_id = %job.job_id(),
                printer_id = job.assigned_printer.as_deref().unwrap_or("-"),
                "Starting job"
            );
            self.inner.on_job_start.notify_all("job_start", job).await;

            let mut jobs = self.inner.jobs.lock().await;
            if let Some(current) = jobs.get_mut(job.job_id()) {
                // A failure reported while preparing wins over the start.
                if current.state == JobState::Preparing {
                    current.transition(JobState::Printing)?;
                }
            }
        }
        Ok(ready.len())
    }

    /// Records a finished print and frees its timeline slot. Dependents
    /// that become eligible are scheduled immediately.
    pub async fn mark_job_complete(&self, job_id: &str) -> Result<(), PrintJobError> {
        let (job, has_dependents) = {
            let mut jobs = self.inner.jobs.lock().await;
            let job = jobs
                .get_mut(job_id)
                .ok_or_else(|| PrintJobError::NotFound(job_id.to_string()))?;
            job.transition(JobState::Completed)?;
            job.actual_end = Some(self.inner.clock.now());
            job.progress_percent = 100.0;
            self.inner.timeline.lock().await.release(job_id);
            if let Some(printer_id) = &job.assigned_printer {
                self.inner.optimizer.set_current_job(printer_id, None).await;
            }
            let has_dependents = !job.blocks.is_empty();
            (job.clone(), has_dependents)
        };

        tracing::info!(job_id, "Job completed");
        self.inner.on_job_complete.notify_all("job_complete", &job).await;

        if has_dependents {
            let scheduled = self.reschedule().await?;
            tracing::debug!(job_id, scheduled, "Rescheduled after dependency completed");
        }
        Ok(())
    }

    /// Records a failed print. Dependents stay blocked; nothing is retried.
    pub async fn mark_job_failed(&self, job_id: &str, error: &str) -> Result<(), PrintJobError> {
        let job = {
            let mut jobs = self.inner.jobs.lock().await;
            let job = jobs
                .get_mut(job_id)
                .ok_or_else(|| PrintJobError::NotFound(job_id.to_string()))?;
            job.transition(JobState::Failed)?;
            job.actual_end = Some(self.inner.clock.now());
            job.error_message = Some(error.to_string());
            self.inner.timeline.lock().await.release(job_id);
            if let Some(printer_id) = &job.assigned_printer {
                self.inner.optimizer.set_current_job(printer_id, None).await;
            }
            job.clone()
        };

        tracing::error!(job_id, error, "Job failed");
        self.inner.on_job_fail.notify_all("job_fail", &job).await;
        Ok(())
    }

    /// Sets progress on a printing job, clamped to 0-100.
    pub async fn update_progress(&self, job_id: &str, percent: f64) -> Result<(), PrintJobError> {
        let mut jobs = self.inner.jobs.lock().await;
        let job = jobs
            .get_mut(job_id)
            .ok_or_else(|| PrintJobError::NotFound(job_id.to_string()))?;
        if job.state != JobState::Printing {
            return Err(PrintJobError::NotPrinting(job_id.to_string()));
        }
        if percent.is_nan() {
            tracing::warn!(job_id, "Ignoring NaN progress update");
            return Ok(());
        }
        job.progress_percent = percent.clamp(0.0, 100.0);
        Ok(())
    }
}

fn is_due(scheduled_start: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    scheduled_start.is_some_and(|start| start <= now)
}
