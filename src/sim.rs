use std::collections::VecDeque;

use serde::Serialize;

use crate::error::{Result, SchedError};
use crate::launcher::LoopbackLauncher;
use crate::platform::{Platform, TimedSubmission, TimedUpdate};
use crate::scheduler::{ExternalEvent, PassReport, Scheduler};

/// A submission the scheduler refused at intake.
#[derive(Debug, Clone, Serialize)]
pub struct Refusal {
    pub at: i64,
    pub user: String,
    pub reason: String,
}

/// Discrete-time replay of a [`Platform`] workload.
///
/// Each step delivers due submissions and health updates, lets the
/// loopback launcher report, runs one pass, then launches what the pass
/// released. Time then advances by `step` seconds.
pub struct Simulation {
    scheduler: Scheduler,
    launcher: LoopbackLauncher,
    submissions: VecDeque<TimedSubmission>,
    updates: VecDeque<TimedUpdate>,
    start: i64,
    now: i64,
    step: i64,
    refusals: Vec<Refusal>,
}

impl Simulation {
    pub fn new(platform: &Platform, start: i64, step: i64) -> Result<Self> {
        if step <= 0 {
            return Err(SchedError::Config(format!(
                "simulation step must be positive, got {}",
                step
            )));
        }
        let mut submissions = platform.submissions.clone();
        submissions.sort_by_key(|s| s.at);
        let mut updates = platform.resource_updates.clone();
        updates.sort_by_key(|u| u.at);

        Ok(Self {
            scheduler: platform.scheduler()?,
            launcher: LoopbackLauncher::new(),
            submissions: submissions.into(),
            updates: updates.into(),
            start,
            now: start,
            step,
            refusals: Vec::new(),
        })
    }

    pub fn now(&self) -> i64 {
        self.now
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn refusals(&self) -> &[Refusal] {
        &self.refusals
    }

    /// No workload left to deliver and every job has reached a final state.
    pub fn is_idle(&self) -> bool {
        self.submissions.is_empty()
            && self.updates.is_empty()
            && self
                .scheduler
                .jobs()
                .all_jobs()
                .iter()
                .all(|j| j.state.is_terminal())
    }

    pub fn step(&mut self) -> Result<PassReport> {
        let now = self.now;

        while self
            .submissions
            .front()
            .is_some_and(|s| self.start.saturating_add(s.at) <= now)
        {
            let Some(timed) = self.submissions.pop_front() else {
                break;
            };
            match self.scheduler.submit_raw(&timed.submission, now) {
                Ok(job_id) => {
                    if let Some(runtime) = timed.runtime {
                        self.launcher.set_runtime(job_id, runtime);
                    }
                }
                Err(e) => {
                    tracing::warn!(user = %timed.submission.user, error = %e, "Submission refused");
                    self.refusals.push(Refusal {
                        at: now,
                        user: timed.submission.user.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        while self.updates.front().is_some_and(|u| self.start.saturating_add(u.at) <= now) {
            let Some(timed) = self.updates.pop_front() else {
                break;
            };
            if let Err(e) = self
                .scheduler
                .apply(ExternalEvent::Resource(timed.update), now)
            {
                tracing::warn!(error = %e, "Resource update refused");
            }
        }

        self.deliver_launcher_events(now)?;
        let report = self.scheduler.run_pass(now)?;
        self.deliver_launcher_events(now)?;

        self.now += self.step;
        Ok(report)
    }

    fn deliver_launcher_events(&mut self, now: i64) -> Result<()> {
        for event in self.launcher.poll(&self.scheduler, now) {
            self.scheduler.apply(event, now)?;
        }
        Ok(())
    }

    /// Step until `until` (inclusive) or until the workload is done.
    /// Returns the number of passes run.
    pub fn run_until(&mut self, until: i64) -> Result<usize> {
        let mut passes = 0;
        while self.now <= until {
            self.step()?;
            passes += 1;
            if self.is_idle() {
                break;
            }
        }
        tracing::info!(passes, now = self.now, "Simulation finished");
        Ok(passes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const START: i64 = 1_000;

    fn platform() -> Platform {
        Platform::from_json(
            r#"{
                "resources": [ { "id": 1 }, { "id": 2 } ],
                "submissions": [
                    { "at": 0, "runtime": 30, "user": "alice",
                      "moldables": [ { "walltime": 100, "groups": [ { "resources": "/resource_id=2" } ] } ] },
                    { "at": 0, "runtime": 30, "user": "bob",
                      "moldables": [ { "walltime": 100, "groups": [ { "resources": "/resource_id=1" } ] } ] },
                    { "at": 10, "user": "carol", "queue": "nope",
                      "moldables": [ { "walltime": 100, "groups": [ { "resources": "/resource_id=1" } ] } ] }
                ]
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn step_must_be_positive() {
        assert!(Simulation::new(&platform(), START, 0).is_err());
    }

    #[test]
    fn runs_workload_to_completion() {
        let mut sim = Simulation::new(&platform(), START, 10).unwrap();
        let passes = sim.run_until(START + 10_000).unwrap();
        assert!(sim.is_idle());
        assert!(passes < 20);

        let s = sim.scheduler();
        assert_eq!(s.jobs().len(), 2);
        assert!(s
            .jobs()
            .all_jobs()
            .iter()
            .all(|j| j.state == crate::scheduler::JobState::Terminated));
        assert_eq!(s.gantt().log().len(), 2);
        assert!(s.gantt().is_empty());

        // bob waited for alice's early completion, not for her walltime
        let bob = s.job(2).unwrap();
        assert_eq!(bob.start_time, START + 40);

        assert_eq!(sim.refusals().len(), 1);
        assert_eq!(sim.refusals()[0].user, "carol");
    }
}
