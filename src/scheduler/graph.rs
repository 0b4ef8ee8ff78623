// src/scheduler/graph.rs - Job map with "must complete before" edges
use std::collections::{HashMap, HashSet};

use crate::print_job::{JobState, PrintJob, PrintJobError, ScheduledJob};

/// Jobs keyed by id, iterated in submission order.
///
/// Invariants: `blocks` on every job is exactly the set of jobs whose
/// `depends_on` names it, and the `depends_on` edges never form a cycle.
#[derive(Debug, Default)]
pub(crate) struct JobGraph {
    jobs: HashMap<String, ScheduledJob>,
    order: Vec<String>,
}

impl JobGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn get(&self, job_id: &str) -> Option<&ScheduledJob> {
        self.jobs.get(job_id)
    }

    pub fn get_mut(&mut self, job_id: &str) -> Option<&mut ScheduledJob> {
        self.jobs.get_mut(job_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ScheduledJob> {
        self.order.iter().filter_map(|id| self.jobs.get(id))
    }

    pub fn ids(&self) -> Vec<String> {
        self.order.clone()
    }

    pub fn insert(&mut self, job: PrintJob, depends_on: Vec<String>) -> Result<&ScheduledJob, PrintJobError> {
        let job_id = job.job_id.clone();
        if self.jobs.contains_key(&job_id) {
            return Err(PrintJobError::Duplicate(job_id));
        }
        if depends_on.iter().any(|d| d == &job_id) {
            return Err(PrintJobError::SelfDependency(job_id));
        }
        let mut depends_on = depends_on;
        let mut seen = HashSet::new();
        depends_on.retain(|d| seen.insert(d.clone()));

        if let Some(via) = depends_on.iter().find(|d| self.reaches(d, &job_id)) {
            return Err(PrintJobError::DependencyCycle { job_id, via: via.clone() });
        }

        let mut scheduled = ScheduledJob::new(job, depends_on);
        for dep_id in &scheduled.depends_on {
            if let Some(dep) = self.jobs.get_mut(dep_id) {
                dep.blocks.push(job_id.clone());
            }
        }
        // Jobs submitted earlier may already name this one as a dependency.
        scheduled.blocks = self
            .iter()
            .filter(|j| j.depends_on.contains(&job_id))
            .map(|j| j.job.job_id.clone())
            .collect();

        self.order.push(job_id.clone());
        let entry = self.jobs.entry(job_id).or_insert(scheduled);
        Ok(&*entry)
    }

    /// Detaches and returns a job that has not started yet.
    pub fn remove(&mut self, job_id: &str) -> Result<ScheduledJob, PrintJobError> {
        let job = self
            .jobs
            .get(job_id)
            .ok_or_else(|| PrintJobError::NotFound(job_id.to_string()))?;
        if !job.state.is_pending() {
            return Err(PrintJobError::InvalidTransition {
                job_id: job_id.to_string(),
                from: job.state,
                to: JobState::Cancelled,
            });
        }
        let mut removed = self
            .jobs
            .remove(job_id)
            .ok_or_else(|| PrintJobError::NotFound(job_id.to_string()))?;
        self.order.retain(|id| id != job_id);
        for dep_id in &removed.depends_on {
            if let Some(dep) = self.jobs.get_mut(dep_id) {
                dep.blocks.retain(|b| b != job_id);
            }
        }
        removed.clear_assignment();
        removed.transition(JobState::Cancelled)?;
        Ok(removed)
    }

    /// Every dependency exists and is completed. A missing dependency keeps
    /// the job blocked.
    pub fn dependencies_met(&self, job: &ScheduledJob) -> bool {
        job.depends_on.iter().all(|dep_id| {
            self.jobs
                .get(dep_id)
                .is_some_and(|dep| dep.state == JobState::Completed)
        })
    }

    /// True when `target` is reachable from `from` by following `depends_on`.
    fn reaches(&self, from: &str, target: &str) -> bool {
        let mut stack = vec![from.to_string()];
        let mut visited = HashSet::new();
        while let Some(current) = stack.pop() {
            if current == target {
                return true;
            }
            if !visited.insert(current.clone()) {
                continue;
            }
            if let Some(job) = self.jobs.get(&current) {
                stack.extend(job.depends_on.iter().cloned());
            }
        }
        false
    }
}
