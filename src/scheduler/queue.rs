use std::collections::BTreeMap;

use crate::error::{Result, SchedError};
use crate::request::JobRequest;
use crate::scheduler::job::{Job, JobId, JobState, MoldableId, StateLogEntry};

const DEFAULT_MAX_JOBS: usize = 10_000;

/// Owns every job record and its state history.
///
/// Job and moldable ids are allocated here and never reused. Every state
/// change goes through [`JobStore::transition`], which keeps the state log
/// in step with the job: exactly one open entry per job, closed at the
/// instant the next one opens.
#[derive(Debug)]
pub struct JobStore {
    jobs: BTreeMap<JobId, Job>,
    state_log: Vec<StateLogEntry>,
    next_job_id: JobId,
    next_moldable_id: MoldableId,
    max_jobs: usize,
}

impl Default for JobStore {
    fn default() -> Self {
        Self::new()
    }
}

impl JobStore {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_JOBS)
    }

    pub fn with_capacity(max_jobs: usize) -> Self {
        Self {
            jobs: BTreeMap::new(),
            state_log: Vec::new(),
            next_job_id: 1,
            next_moldable_id: 1,
            max_jobs,
        }
    }

    /// Create a Waiting job for `request` and open its first log entry.
    pub fn add(&mut self, request: JobRequest, queue_priority: u32, now: i64) -> Result<JobId> {
        if self.is_full() {
            return Err(SchedError::StoreFull(self.max_jobs));
        }
        let id = self.next_job_id;
        self.next_job_id += 1;

        let moldable_ids = (0..request.moldables.len())
            .map(|_| {
                let m = self.next_moldable_id;
                self.next_moldable_id += 1;
                m
            })
            .collect();

        self.jobs
            .insert(id, Job::new(id, request, moldable_ids, queue_priority, now));
        self.state_log.push(StateLogEntry {
            job_id: id,
            state: JobState::Waiting,
            date_start: now,
            date_stop: None,
        });
        Ok(id)
    }

    pub fn get(&self, id: JobId) -> Option<&Job> {
        self.jobs.get(&id)
    }

    pub fn get_mut(&mut self, id: JobId) -> Option<&mut Job> {
        self.jobs.get_mut(&id)
    }

    /// Like [`get`](Self::get) but reports a missing job as an error.
    pub fn job(&self, id: JobId) -> Result<&Job> {
        self.jobs.get(&id).ok_or(SchedError::UnknownJob(id))
    }

    pub fn job_mut(&mut self, id: JobId) -> Result<&mut Job> {
        self.jobs.get_mut(&id).ok_or(SchedError::UnknownJob(id))
    }

    /// Move a job to `to`, closing its open log entry at `now`.
    ///
    /// Terminal states also stamp the job's `stop_time`.
    pub fn transition(&mut self, id: JobId, to: JobState, now: i64) -> Result<JobState> {
        let job = self.jobs.get_mut(&id).ok_or(SchedError::UnknownJob(id))?;
        let from = job.state;
        if !from.can_transition_to(to) {
            return Err(SchedError::InvalidTransition {
                job_id: id,
                from,
                to,
            });
        }

        job.state = to;
        if to.is_terminal() {
            job.stop_time = now;
        }

        let mut date_start = now;
        if let Some(last) = self.state_log.iter_mut().rev().find(|e| e.job_id == id) {
            date_start = now.max(last.date_start);
            last.date_stop = Some(date_start);
        }
        // Terminal entries stay open: nothing follows them.
        self.state_log.push(StateLogEntry {
            job_id: id,
            state: to,
            date_start,
            date_stop: None,
        });

        tracing::debug!(job_id = id, from = %from, to = %to, "Job state changed");
        Ok(from)
    }

    /// Jobs in `state`, by ascending id.
    pub fn in_state(&self, state: JobState) -> Vec<&Job> {
        self.jobs.values().filter(|j| j.state == state).collect()
    }

    pub fn ids_in_state(&self, state: JobState) -> Vec<JobId> {
        self.jobs
            .values()
            .filter(|j| j.state == state)
            .map(|j| j.id)
            .collect()
    }

    /// All jobs by ascending id.
    pub fn all_jobs(&self) -> Vec<&Job> {
        self.jobs.values().collect()
    }

    /// Job owning `moldable_id`.
    pub fn by_moldable(&self, moldable_id: MoldableId) -> Option<&Job> {
        self.jobs
            .values()
            .find(|j| j.moldable_ids.contains(&moldable_id))
    }

    pub fn state_log(&self) -> &[StateLogEntry] {
        &self.state_log
    }

    /// State history of one job, oldest first.
    pub fn history(&self, id: JobId) -> Vec<&StateLogEntry> {
        self.state_log.iter().filter(|e| e.job_id == id).collect()
    }

    /// Remove terminated and errored jobs along with their history.
    /// Returns the archived jobs.
    pub fn archive_finished(&mut self) -> Vec<Job> {
        let finished: Vec<JobId> = self
            .jobs
            .values()
            .filter(|j| j.state.is_terminal())
            .map(|j| j.id)
            .collect();
        self.state_log
            .retain(|e| !finished.contains(&e.job_id));
        finished
            .into_iter()
            .filter_map(|id| self.jobs.remove(&id))
            .collect()
    }

    /// Returns the current number of jobs
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.jobs.len() >= self.max_jobs
    }
}
