// src/print_job.rs - Job records and the per-job lifecycle state machine
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use thiserror::Error;

use crate::printer::{BuildVolume, PrinterCapability};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PrintJobError {
    #[error("Job not found: {0}")]
    NotFound(String),
    #[error("Job already exists: {0}")]
    Duplicate(String),
    #[error("Job {0} cannot depend on itself")]
    SelfDependency(String),
    #[error("Adding job {job_id} would create a dependency cycle through {via}")]
    DependencyCycle { job_id: String, via: String },
    #[error("Invalid state transition for job {job_id}: {from} -> {to}")]
    InvalidTransition { job_id: String, from: JobState, to: JobState },
    #[error("Job {0} is not printing")]
    NotPrinting(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Queued,
    Scheduled,
    Preparing,
    Printing,
    Completed,
    Failed,
    Cancelled,
}

impl JobState {
    pub const ALL: [JobState; 7] = [
        JobState::Queued,
        JobState::Scheduled,
        JobState::Preparing,
        JobState::Printing,
        JobState::Completed,
        JobState::Failed,
        JobState::Cancelled,
    ];

    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed | JobState::Cancelled)
    }

    /// Not yet started: the only states a job may be removed from.
    pub fn is_pending(self) -> bool {
        matches!(self, JobState::Queued | JobState::Scheduled)
    }

    pub fn is_active(self) -> bool {
        matches!(self, JobState::Preparing | JobState::Printing)
    }

    pub fn can_transition_to(self, to: JobState) -> bool {
        use JobState::*;
        match (self, to) {
            (Queued, Scheduled) | (Queued, Cancelled) => true,
            (Scheduled, Queued) | (Scheduled, Preparing) | (Scheduled, Cancelled) => true,
            (Preparing, Printing) | (Preparing, Completed) | (Preparing, Failed) => true,
            (Printing, Completed) | (Printing, Failed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobState::Queued => "queued",
            JobState::Scheduled => "scheduled",
            JobState::Preparing => "preparing",
            JobState::Printing => "printing",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::Cancelled => "cancelled",
        };
        write!(f, "{}", name)
    }
}

/// A unit of work submitted to the farm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrintJob {
    pub job_id: String,
    pub name: String,
    #[serde(default)]
    pub model_path: String,
    /// Bounding box of the part (mm).
    pub size: BuildVolume,
    #[serde(default)]
    pub material: Option<String>,
    #[serde(default)]
    pub colors: Vec<String>,
    #[serde(default)]
    pub required_capabilities: BTreeSet<PrinterCapability>,
    /// Higher is more urgent.
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub deadline: Option<DateTime<Utc>>,
    #[serde(default)]
    pub organization_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,

    #[serde(default)]
    pub assigned_printer: Option<String>,
    #[serde(default)]
    pub scheduled_start: Option<DateTime<Utc>>,
    #[serde(default = "default_status")]
    pub status: JobState,
}

fn default_status() -> JobState {
    JobState::Queued
}

impl PrintJob {
    pub fn new(name: impl Into<String>, size: BuildVolume) -> Self {
        let mut job_id = uuid::Uuid::new_v4().simple().to_string();
        job_id.truncate(8);
        Self {
            job_id,
            name: name.into(),
            model_path: String::new(),
            size,
            material: None,
            colors: Vec::new(),
            required_capabilities: BTreeSet::new(),
            priority: 0,
            deadline: None,
            organization_id: None,
            user_id: None,
            assigned_printer: None,
            scheduled_start: None,
            status: JobState::Queued,
        }
    }

    pub fn with_id(mut self, job_id: impl Into<String>) -> Self {
        self.job_id = job_id.into();
        self
    }

    pub fn with_material(mut self, material: impl Into<String>) -> Self {
        self.material = Some(material.into());
        self
    }

    pub fn with_capability(mut self, capability: PrinterCapability) -> Self {
        self.required_capabilities.insert(capability);
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_deadline(mut self, deadline: DateTime<Utc>) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_owner(mut self, organization_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        self.organization_id = Some(organization_id.into());
        self.user_id = Some(user_id.into());
        self
    }
}

/// A job as tracked by the scheduler: lifecycle state, timing and
/// dependency edges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledJob {
    pub job: PrintJob,
    pub state: JobState,
    pub assigned_printer: Option<String>,
    pub scheduled_start: Option<DateTime<Utc>>,
    pub scheduled_end: Option<DateTime<Utc>>,
    pub actual_start: Option<DateTime<Utc>>,
    pub actual_end: Option<DateTime<Utc>>,
    pub progress_percent: f64,
    pub error_message: Option<String>,
    pub depends_on: Vec<String>,
    pub blocks: Vec<String>,
}

impl ScheduledJob {
    pub fn new(job: PrintJob, depends_on: Vec<String>) -> Self {
        let mut job = job;
        job.status = JobState::Queued;
        Self {
            job,
            state: JobState::Queued,
            assigned_printer: None,
            scheduled_start: None,
            scheduled_end: None,
            actual_start: None,
            actual_end: None,
            progress_percent: 0.0,
            error_message: None,
            depends_on,
            blocks: Vec::new(),
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job.job_id
    }

    /// Moves to `to` if the lifecycle allows it, keeping the embedded job's
    /// status in step.
    pub fn transition(&mut self, to: JobState) -> Result<(), PrintJobError> {
        if !self.state.can_transition_to(to) {
            return Err(PrintJobError::InvalidTransition {
                job_id: self.job.job_id.clone(),
                from: self.state,
                to,
            });
        }
        self.state = to;
        self.job.status = to;
        Ok(())
    }

    pub(crate) fn assign(&mut self, printer_id: &str, start: DateTime<Utc>, end: DateTime<Utc>) {
        self.assigned_printer = Some(printer_id.to_string());
        self.scheduled_start = Some(start);
        self.scheduled_end = Some(end);
        self.job.assigned_printer = Some(printer_id.to_string());
        self.job.scheduled_start = Some(start);
    }

    pub(crate) fn clear_assignment(&mut self) {
        self.assigned_printer = None;
        self.scheduled_start = None;
        self.scheduled_end = None;
        self.job.assigned_printer = None;
        self.job.scheduled_start = None;
    }

    /// Wall-clock hours between actual start and end, when both are known.
    pub fn print_hours(&self) -> Option<f64> {
        match (self.actual_start, self.actual_end) {
            (Some(start), Some(end)) => Some(crate::clock::hours_between(start, end)),
            _ => None,
        }
    }
}

/// A reservation on one printer's timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleSlot {
    pub printer_id: String,
    pub job_id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub confirmed: bool,
}

impl ScheduleSlot {
    pub fn overlaps(&self, other: &ScheduleSlot) -> bool {
        self.printer_id == other.printer_id
            && self.start_time < other.end_time
            && other.start_time < self.end_time
    }
}
