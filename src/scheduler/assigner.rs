use std::cmp::Reverse;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::config::SchedulerConfig;
use crate::error::{Result, SchedError};
use crate::event::{EventKind, EventLog};
use crate::gantt::{GanttEntry, GanttTable};
use crate::request::{normalize, JobRequest, RawSubmission, ReservationMode};
use crate::resource::{ResourceCatalog, ResourceUpdate};
use crate::scheduler::job::{Job, JobId, JobState};
use crate::scheduler::matcher::{self, Placement, Snapshot};
use crate::scheduler::policy::{NoPreemption, PreemptionPolicy};
use crate::scheduler::queue::JobStore;

/// Something reported by a collaborator outside the scheduling core.
/// Applied between passes, never during one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExternalEvent {
    /// The launcher accepted a `toLaunch` job
    Launched { job_id: JobId },
    /// The job's processes are up
    Started { job_id: JobId },
    /// The job ended on its own
    Completed {
        job_id: JobId,
        #[serde(default)]
        exit_code: i32,
    },
    /// Cleanup after the job is done
    CleanedUp { job_id: JobId },
    Failed { job_id: JobId, message: String },
    Frag { job_id: JobId },
    Resource(ResourceUpdate),
}

/// What one pass did.
#[derive(Debug, Default)]
pub struct PassReport {
    pub now: i64,
    /// Ordinary jobs given a (possibly future) slot
    pub scheduled: Vec<JobId>,
    /// Ordinary jobs that found no slot and stay queued
    pub deferred: Vec<JobId>,
    pub reservations_accepted: Vec<JobId>,
    /// Jobs moved to `toLaunch`
    pub launched: Vec<JobId>,
    pub walltime_expired: Vec<JobId>,
    pub preempted: Vec<JobId>,
    /// Reservations that could not be honoured
    pub rejected: Vec<SchedError>,
}

enum ReservationOutcome {
    Placed(Placement),
    TooLate,
    Busy(Option<i64>),
}

/// The scheduling core: resource catalog, Gantt table and job store behind
/// one owner, advanced one serialized pass at a time.
pub struct Scheduler {
    config: SchedulerConfig,
    catalog: ResourceCatalog,
    gantt: GanttTable,
    jobs: JobStore,
    events: EventLog,
    policy: Box<dyn PreemptionPolicy>,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig, catalog: ResourceCatalog) -> Self {
        Self {
            config,
            catalog,
            gantt: GanttTable::new(),
            jobs: JobStore::new(),
            events: EventLog::new(),
            policy: Box::new(NoPreemption),
        }
    }

    pub fn with_policy(mut self, policy: impl PreemptionPolicy + 'static) -> Self {
        self.policy = Box::new(policy);
        self
    }

    pub fn with_job_capacity(mut self, max_jobs: usize) -> Self {
        self.jobs = JobStore::with_capacity(max_jobs);
        self
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn catalog(&self) -> &ResourceCatalog {
        &self.catalog
    }

    pub fn gantt(&self) -> &GanttTable {
        &self.gantt
    }

    pub fn jobs(&self) -> &JobStore {
        &self.jobs
    }

    /// Mutable access for the archival collaborator.
    pub fn jobs_mut(&mut self) -> &mut JobStore {
        &mut self.jobs
    }

    pub fn events(&self) -> &EventLog {
        &self.events
    }

    pub fn job(&self, id: JobId) -> Option<&Job> {
        self.jobs.get(id)
    }

    pub fn snapshot(&self, now: i64) -> Snapshot<'_> {
        Snapshot {
            now,
            catalog: &self.catalog,
            config: &self.config,
        }
    }

    // ========================================================================
    // Intake
    // ========================================================================

    /// Accept a normalized request into its queue as a Waiting job.
    pub fn submit(&mut self, request: JobRequest, now: i64) -> Result<JobId> {
        request.validate(self.config.max_time)?;
        if let Some(dep) = request
            .dependencies
            .iter()
            .find(|dep| self.jobs.get(**dep).is_none())
        {
            return Err(SchedError::MalformedRequest(format!(
                "unknown dependency: job {}",
                dep
            )));
        }
        let priority = self
            .config
            .queue(&request.queue)
            .map(|q| q.priority)
            .ok_or_else(|| {
                SchedError::MalformedRequest(format!("unknown queue: {}", request.queue))
            })?;

        let user = request.user.clone();
        let queue = request.queue.clone();
        let reservation = request.reservation_start;
        let id = self.jobs.add(request, priority, now)?;
        tracing::info!(job_id = id, user = %user, queue = %queue, ?reservation, "Job submitted");
        Ok(id)
    }

    /// Normalize a front-end submission, then [`submit`](Self::submit) it.
    pub fn submit_raw(&mut self, raw: &RawSubmission, now: i64) -> Result<JobId> {
        let request = normalize(raw, &self.config)?;
        self.submit(request, now)
    }

    // ========================================================================
    // External events
    // ========================================================================

    pub fn apply(&mut self, event: ExternalEvent, now: i64) -> Result<()> {
        match event {
            ExternalEvent::Launched { job_id } => self.set_state(job_id, JobState::Launching, now),
            ExternalEvent::Started { job_id } => self.set_state(job_id, JobState::Running, now),
            ExternalEvent::Completed { job_id, exit_code } => {
                self.set_state(job_id, JobState::Finishing, now)?;
                self.jobs.job_mut(job_id)?.exit_code = Some(exit_code);
                Ok(())
            }
            ExternalEvent::CleanedUp { job_id } => self.terminate(job_id, now),
            ExternalEvent::Failed { job_id, message } => {
                self.fail(job_id, now, EventKind::ExternalError, message)
            }
            ExternalEvent::Frag { job_id } => self.frag(job_id, now),
            ExternalEvent::Resource(update) => self.catalog.apply_update(&update),
        }
    }

    /// Force a job in any non-terminal state into Error, freeing its
    /// reservation immediately.
    pub fn frag(&mut self, job_id: JobId, now: i64) -> Result<()> {
        self.fail(
            job_id,
            now,
            EventKind::FragJobRequest,
            "Job fragged on request".to_string(),
        )
    }

    fn set_state(&mut self, job_id: JobId, to: JobState, now: i64) -> Result<()> {
        let from = self.jobs.transition(job_id, to, now)?;
        self.events
            .push(EventKind::StateChange, job_id, now, format!("{} -> {}", from, to));
        Ok(())
    }

    /// `Finishing -> Terminated`, archiving the Gantt entry.
    fn terminate(&mut self, job_id: JobId, now: i64) -> Result<()> {
        let job = self.jobs.job(job_id)?;
        if !job.state.can_transition_to(JobState::Terminated) {
            return Err(SchedError::InvalidTransition {
                job_id,
                from: job.state,
                to: JobState::Terminated,
            });
        }
        self.gantt.commit_log(job.assigned_moldable)?;
        self.set_state(job_id, JobState::Terminated, now)
    }

    /// `* -> toError -> Error`. Resources the job already used are archived
    /// to the Gantt log; an unstarted reservation is simply released.
    fn fail(&mut self, job_id: JobId, now: i64, kind: EventKind, message: String) -> Result<()> {
        let job = self.jobs.job(job_id)?;
        let state = job.state;
        if !state.can_transition_to(JobState::ToError) {
            return Err(SchedError::InvalidTransition {
                job_id,
                from: state,
                to: JobState::ToError,
            });
        }

        let moldable = job.assigned_moldable;
        if self.gantt.get(moldable).is_some() {
            if matches!(state, JobState::Launching | JobState::Running | JobState::Finishing) {
                self.gantt.commit_log(moldable)?;
            } else {
                self.gantt.release(moldable);
            }
        }

        self.events.push(kind, job_id, now, message.clone());
        self.jobs.job_mut(job_id)?.message = message;
        self.set_state(job_id, JobState::ToError, now)?;
        self.set_state(job_id, JobState::Error, now)
    }

    // ========================================================================
    // Scheduling pass
    // ========================================================================

    /// Run one serialized scheduling pass at `now`.
    ///
    /// Order: staged resource states, walltime expiry, dropping stale
    /// predictions, new reservations, ordinary jobs by queue priority, due
    /// reservations, then launching every job whose slot has started.
    pub fn run_pass(&mut self, now: i64) -> Result<PassReport> {
        let mut report = PassReport {
            now,
            ..Default::default()
        };

        self.apply_resource_states(now);
        self.enforce_walltimes(now, &mut report)?;
        let previous = self.drop_predictions();
        self.schedule_reservations(now, &mut report)?;
        self.ack_reservations(now)?;
        self.schedule_queue(now, &previous, &mut report)?;
        self.start_due_reservations(now, &mut report)?;
        self.launch_due_jobs(now, &mut report)?;

        tracing::info!(
            now,
            scheduled = report.scheduled.len(),
            deferred = report.deferred.len(),
            launched = report.launched.len(),
            rejected = report.rejected.len(),
            "Scheduling pass complete"
        );
        Ok(report)
    }

    fn apply_resource_states(&mut self, now: i64) {
        for (id, from, to) in self.catalog.apply_pending_states() {
            self.events.push(
                EventKind::ResourceState,
                0,
                now,
                format!("resource {}: {} -> {}", id, from, to),
            );
        }
    }

    fn enforce_walltimes(&mut self, now: i64, report: &mut PassReport) -> Result<()> {
        for id in self.jobs.ids_in_state(JobState::Running) {
            let job = self.jobs.job(id)?;
            let entry = self
                .gantt
                .get(job.assigned_moldable)
                .ok_or(SchedError::NotFound(job.assigned_moldable))?;
            if entry.end_time() > now {
                continue;
            }
            self.events.push(
                EventKind::Walltime,
                id,
                now,
                format!("walltime of {}s reached", entry.walltime),
            );
            self.set_state(id, JobState::Finishing, now)?;
            report.walltime_expired.push(id);
        }
        Ok(())
    }

    /// Forget the slots of ordinary jobs that are still waiting so they get
    /// re-planned against the current table. Returns their previous starts.
    fn drop_predictions(&mut self) -> BTreeMap<JobId, i64> {
        let mut previous = BTreeMap::new();
        for id in self.jobs.ids_in_state(JobState::Waiting) {
            let Some(job) = self.jobs.get_mut(id) else {
                continue;
            };
            if job.is_reservation() || !job.has_assignment() {
                continue;
            }
            self.gantt.release(job.assigned_moldable);
            previous.insert(id, job.start_time);
            job.assigned_moldable = 0;
            job.start_time = 0;
        }
        previous
    }

    /// Waiting jobs matching `filter` in scheduling order: queue priority
    /// first, then submission time, then id. Jobs of inactive queues are
    /// left out.
    fn ordered(&self, filter: impl Fn(&Job) -> bool) -> Vec<JobId> {
        let mut jobs: Vec<&Job> = self
            .jobs
            .in_state(JobState::Waiting)
            .into_iter()
            .filter(|j| filter(j))
            .filter(|j| self.config.queue(&j.request.queue).map_or(true, |q| q.active))
            .collect();
        jobs.sort_by_key(|j| (Reverse(j.queue_priority), j.submission_time, j.id));
        jobs.into_iter().map(|j| j.id).collect()
    }

    fn commit(&mut self, job_id: JobId, placement: &Placement) -> Result<String> {
        let job = self.jobs.job_mut(job_id)?;
        self.gantt.reserve(GanttEntry {
            moldable_id: placement.moldable_id,
            job_id,
            resources: placement.resources.clone(),
            start_time: placement.start_time,
            walltime: placement.walltime,
            sharing: job.request.sharing_key(),
            slot_set: job.request.types.inner.clone(),
            container: job.container_name(),
        })?;
        job.assigned_moldable = placement.moldable_id;
        job.start_time = placement.start_time;
        job.message = job.describe(placement.resources.len(), placement.walltime);
        Ok(job.message.clone())
    }

    fn schedule_reservations(&mut self, now: i64, report: &mut PassReport) -> Result<()> {
        for id in self.ordered(|j| j.reservation == ReservationMode::ToSchedule) {
            let (start, outcome) = {
                let job = self.jobs.job(id)?;
                let snapshot = self.snapshot(now);
                let start = job.start_time;
                let outcome = if start < now {
                    ReservationOutcome::TooLate
                } else if let Some(p) = matcher::exact(&snapshot, &self.gantt, job, start) {
                    ReservationOutcome::Placed(p)
                } else {
                    ReservationOutcome::Busy(
                        matcher::earliest(&snapshot, &self.gantt, job, start).map(|p| p.start_time),
                    )
                };
                (start, outcome)
            };

            let message = match outcome {
                ReservationOutcome::Placed(placement) => {
                    let summary = self.commit(id, &placement)?;
                    self.jobs.job_mut(id)?.reservation = ReservationMode::Scheduled;
                    self.events.push(
                        EventKind::ReservationValidated,
                        id,
                        now,
                        format!("advance reservation validated for {}: {}", start, summary),
                    );
                    self.set_state(id, JobState::ToAckReservation, now)?;
                    report.reservations_accepted.push(id);
                    continue;
                }
                ReservationOutcome::TooLate => {
                    format!("reservation start time {} has already passed", start)
                }
                ReservationOutcome::Busy(Some(t)) => format!(
                    "This advance reservation cannot run at {}; this reservation could run at {}",
                    start, t
                ),
                ReservationOutcome::Busy(None) => format!(
                    "This advance reservation cannot run at {}; no start found before the horizon",
                    start
                ),
            };
            self.fail(id, now, EventKind::ReservationRejected, message.clone())?;
            report.rejected.push(SchedError::Scheduling {
                job_id: id,
                message,
            });
        }
        Ok(())
    }

    fn ack_reservations(&mut self, now: i64) -> Result<()> {
        for id in self.jobs.ids_in_state(JobState::ToAckReservation) {
            self.set_state(id, JobState::Waiting, now)?;
        }
        Ok(())
    }

    fn schedule_queue(
        &mut self,
        now: i64,
        previous: &BTreeMap<JobId, i64>,
        report: &mut PassReport,
    ) -> Result<()> {
        for id in self.ordered(|j| j.reservation == ReservationMode::None) {
            let not_before = match self.dependency_bound(self.jobs.job(id)?, now) {
                Ok(t) => t,
                Err(reason) => {
                    tracing::info!(job_id = id, %reason, "Job can't be scheduled due to dependencies");
                    report.deferred.push(id);
                    continue;
                }
            };
            let placement = {
                let job = self.jobs.job(id)?;
                matcher::earliest(&self.snapshot(now), &self.gantt, job, not_before)
            };
            let placement = match placement {
                Some(p) if p.start_time <= now => Some(p),
                other if not_before <= now => self.preempt_for(id, now, report)?.or(other),
                other => other,
            };

            let Some(placement) = placement else {
                tracing::debug!(job_id = id, "No slot found, job stays queued");
                report.deferred.push(id);
                continue;
            };
            let summary = self.commit(id, &placement)?;
            if previous.get(&id) != Some(&placement.start_time) {
                self.events.push(
                    EventKind::Scheduled,
                    id,
                    now,
                    format!("start at {}: {}", placement.start_time, summary),
                );
            }
            report.scheduled.push(id);
        }
        Ok(())
    }

    /// Earliest start the dependencies of `job` allow, or why it cannot be
    /// scheduled in this pass.
    ///
    /// Dependencies in Error are ignored and successful terminations are
    /// satisfied. A Waiting dependency pushes the start to the end of its
    /// planned slot. Anything else blocks the job.
    fn dependency_bound(&self, job: &Job, now: i64) -> std::result::Result<i64, String> {
        let mut not_before = now;
        for dep_id in &job.request.dependencies {
            let Some(dep) = self.jobs.get(*dep_id) else {
                return Err(format!("dependency {} is gone", dep_id));
            };
            match dep.state {
                JobState::Error => {
                    tracing::debug!(job_id = job.id, dependency = dep_id, "Dependency in Error is ignored");
                }
                JobState::Terminated if dep.exit_code.unwrap_or(0) == 0 => {}
                JobState::Terminated => {
                    return Err(format!("dependency {} exited with an error", dep_id));
                }
                JobState::Waiting => {
                    let end = dep
                        .has_assignment()
                        .then(|| self.gantt.get(dep.assigned_moldable))
                        .flatten()
                        .map(|e| e.end_time())
                        .ok_or_else(|| format!("dependency {} has no slot yet", dep_id))?;
                    not_before = not_before.max(end);
                }
                state => {
                    return Err(format!("dependency {} is {}", dep_id, state));
                }
            }
        }
        Ok(not_before)
    }

    /// Ask the preemption policy for besteffort victims standing in the way
    /// of `job_id`, frag them and retry. `None` when nothing was freed.
    fn preempt_for(
        &mut self,
        job_id: JobId,
        now: i64,
        report: &mut PassReport,
    ) -> Result<Option<Placement>> {
        let victims = {
            let job = self.jobs.job(job_id)?;
            if job.is_besteffort() {
                return Ok(None);
            }
            self.policy
                .victims(job, &self.jobs, &self.gantt, &self.snapshot(now))
        };
        let victims: Vec<JobId> = victims
            .into_iter()
            .filter(|v| *v != job_id)
            .filter(|v| {
                self.jobs.get(*v).is_some_and(|j| {
                    j.is_besteffort() && j.state.can_transition_to(JobState::ToError)
                })
            })
            .collect();
        if victims.is_empty() {
            return Ok(None);
        }

        for victim in victims {
            self.fail(
                victim,
                now,
                EventKind::BesteffortKill,
                format!("besteffort job preempted by job {}", job_id),
            )?;
            report.preempted.push(victim);
        }
        let job = self.jobs.job(job_id)?;
        Ok(matcher::earliest(&self.snapshot(now), &self.gantt, job, now))
    }

    /// Move Scheduled reservations whose start has come to `toLaunch`, or
    /// keep them waiting for missing resources until the timeout.
    fn start_due_reservations(&mut self, now: i64, report: &mut PassReport) -> Result<()> {
        let due: Vec<JobId> = self
            .jobs
            .in_state(JobState::Waiting)
            .into_iter()
            .filter(|j| j.reservation == ReservationMode::Scheduled && j.start_time <= now)
            .map(|j| j.id)
            .collect();

        for id in due {
            let (moldable, start, end, missing) = {
                let job = self.jobs.job(id)?;
                let entry = self
                    .gantt
                    .get(job.assigned_moldable)
                    .ok_or(SchedError::NotFound(job.assigned_moldable))?;
                (
                    job.assigned_moldable,
                    job.start_time,
                    entry.end_time(),
                    self.catalog.missing(&entry.resources),
                )
            };

            let timed_out = !missing.is_empty()
                && now >= start.saturating_add(self.config.reservation_waiting_timeout);
            if now >= end || timed_out {
                let message = "advance reservation expired and couldn't be started".to_string();
                self.fail(id, now, EventKind::ReservationRejected, message.clone())?;
                report.rejected.push(SchedError::Scheduling {
                    job_id: id,
                    message,
                });
                continue;
            }

            if !missing.is_empty() {
                if self
                    .events
                    .for_job(id)
                    .iter()
                    .all(|e| e.kind != EventKind::ReservationNoResource)
                {
                    self.events.push(
                        EventKind::ReservationNoResource,
                        id,
                        now,
                        format!("waiting for resources {:?}", missing),
                    );
                }
                continue;
            }

            if start < now {
                let walltime = self.gantt.shift_start(moldable, now)?;
                let resources = self.gantt.get(moldable).map_or(0, |e| e.resources.len());
                let job = self.jobs.job_mut(id)?;
                job.start_time = now;
                job.message = job.describe(resources, walltime);
                self.events.push(
                    EventKind::ReduceReservationWalltime,
                    id,
                    now,
                    format!("launched {}s late, walltime reduced to {}s", now - start, walltime),
                );
            }
            self.set_state(id, JobState::ToLaunch, now)?;
            report.launched.push(id);
        }
        Ok(())
    }

    fn launch_due_jobs(&mut self, now: i64, report: &mut PassReport) -> Result<()> {
        let due: Vec<JobId> = self
            .jobs
            .in_state(JobState::Waiting)
            .into_iter()
            .filter(|j| !j.is_reservation() && j.has_assignment() && j.start_time <= now)
            .map(|j| j.id)
            .collect();
        for id in due {
            self.set_state(id, JobState::ToLaunch, now)?;
            report.launched.push(id);
        }
        Ok(())
    }
}
