//! In-process stand-in for the launch and execution collaborator.
//!
//! Nothing is executed: jobs are acknowledged as soon as they reach
//! `toLaunch` and reported complete once their configured runtime has
//! elapsed. Jobs without a runtime run until the scheduler ends them at
//! walltime expiry.

use std::collections::BTreeMap;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::node::{Clock, NodeHandle};
use crate::request::JobRequest;
use crate::scheduler::{ExternalEvent, JobId, JobState, Scheduler};

#[derive(Debug, Default, Clone)]
pub struct LoopbackLauncher {
    runtimes: BTreeMap<JobId, i64>,
    started_at: BTreeMap<JobId, i64>,
    /// State each job was in when its events were last reported
    reported: BTreeMap<JobId, JobState>,
}

impl LoopbackLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `job_id` finish on its own `runtime` seconds after it starts.
    pub fn set_runtime(&mut self, job_id: JobId, runtime: i64) {
        self.runtimes.insert(job_id, runtime);
    }

    /// Jobs the launcher still keeps track of.
    pub fn tracked(&self) -> usize {
        let mut ids: Vec<&JobId> = self
            .runtimes
            .keys()
            .chain(self.started_at.keys())
            .chain(self.reported.keys())
            .collect();
        ids.sort_unstable();
        ids.dedup();
        ids.len()
    }

    fn forget(&mut self, job_id: JobId) {
        self.runtimes.remove(&job_id);
        self.started_at.remove(&job_id);
        self.reported.remove(&job_id);
    }

    /// Events this launcher reports at `now`, in the order they must be
    /// applied. A job's events are reported once per state, even if the
    /// scheduler has not applied them by the next poll.
    pub fn poll(&mut self, scheduler: &Scheduler, now: i64) -> Vec<ExternalEvent> {
        let gone: Vec<JobId> = self
            .reported
            .keys()
            .chain(self.runtimes.keys())
            .copied()
            .filter(|id| scheduler.job(*id).map_or(true, |j| j.state.is_terminal()))
            .collect();
        for job_id in gone {
            self.forget(job_id);
        }

        let mut events = Vec::new();
        for job in scheduler.jobs().all_jobs() {
            let job_id = job.id;
            if self.reported.get(&job_id) == Some(&job.state) {
                continue;
            }
            match job.state {
                JobState::ToLaunch => {
                    tracing::debug!(job_id, "Launching job");
                    self.started_at.insert(job_id, now);
                    events.push(ExternalEvent::Launched { job_id });
                    events.push(ExternalEvent::Started { job_id });
                }
                JobState::Running => {
                    let Some(runtime) = self.runtimes.get(&job_id).copied() else {
                        continue;
                    };
                    let started = self.started_at.get(&job_id).copied().unwrap_or(job.start_time);
                    if now < started.saturating_add(runtime) {
                        continue;
                    }
                    events.push(ExternalEvent::Completed {
                        job_id,
                        exit_code: 0,
                    });
                }
                JobState::Finishing => {
                    events.push(ExternalEvent::CleanedUp { job_id });
                }
                _ => continue,
            }
            self.reported.insert(job_id, job.state);
        }
        events
    }
}

/// A job the launcher submits itself once `due` has passed.
#[derive(Debug, Clone)]
pub struct Arrival {
    pub due: i64,
    pub request: JobRequest,
    pub runtime: Option<i64>,
}

/// Drive `launcher` against a running node until `shutdown` fires:
/// submit due arrivals, then report launch and completion events.
pub async fn run_launcher(
    handle: NodeHandle,
    mut launcher: LoopbackLauncher,
    mut arrivals: Vec<Arrival>,
    clock: Clock,
    interval_ms: u64,
    shutdown: CancellationToken,
) {
    arrivals.sort_by_key(|a| std::cmp::Reverse(a.due));
    let mut interval = tokio::time::interval(Duration::from_millis(interval_ms.max(1)));
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                tracing::debug!("Launcher stopping");
                break;
            }
            _ = interval.tick() => {
                let now = clock();
                while arrivals.last().is_some_and(|a| a.due <= now) {
                    let Some(arrival) = arrivals.pop() else {
                        break;
                    };
                    match handle.submit(arrival.request).await {
                        Ok(job_id) => {
                            if let Some(runtime) = arrival.runtime {
                                launcher.set_runtime(job_id, runtime);
                            }
                        }
                        Err(e) => tracing::warn!(error = %e, "Submission refused"),
                    }
                }

                let events = {
                    let scheduler = handle.scheduler();
                    let scheduler = scheduler.read().await;
                    launcher.poll(&scheduler, now)
                };
                for event in events {
                    if let Err(e) = handle.send(event).await {
                        tracing::warn!(error = %e, "Failed to report launcher event");
                        return;
                    }
                }
            }
        }
    }
}
