use crate::gantt::GanttTable;
use crate::scheduler::job::{Job, JobId};
use crate::scheduler::matcher::{self, Snapshot};
use crate::scheduler::queue::JobStore;

/// Hook consulted when a job that is not besteffort cannot start right now.
///
/// The returned jobs are fragged and the placement is retried. Only
/// besteffort jobs are ever killed; other ids are ignored by the scheduler.
pub trait PreemptionPolicy: Send + Sync {
    fn victims(
        &self,
        job: &Job,
        jobs: &JobStore,
        gantt: &GanttTable,
        snapshot: &Snapshot<'_>,
    ) -> Vec<JobId>;
}

/// Never preempts anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoPreemption;

impl PreemptionPolicy for NoPreemption {
    fn victims(&self, _: &Job, _: &JobStore, _: &GanttTable, _: &Snapshot<'_>) -> Vec<JobId> {
        Vec::new()
    }
}

/// Kills the besteffort jobs occupying the resources the blocked job would
/// get if besteffort work were invisible, provided that lets it start now.
#[derive(Debug, Default, Clone, Copy)]
pub struct KillBesteffort;

impl PreemptionPolicy for KillBesteffort {
    fn victims(
        &self,
        job: &Job,
        jobs: &JobStore,
        gantt: &GanttTable,
        snapshot: &Snapshot<'_>,
    ) -> Vec<JobId> {
        let is_besteffort = |id: JobId| jobs.get(id).is_some_and(|j| j.is_besteffort());

        let mut without = gantt.clone();
        let besteffort: Vec<_> = gantt
            .current()
            .filter(|e| is_besteffort(e.job_id))
            .map(|e| e.moldable_id)
            .collect();
        if besteffort.is_empty() {
            return Vec::new();
        }
        for moldable_id in besteffort {
            without.release(moldable_id);
        }

        let Some(placement) = matcher::earliest(snapshot, &without, job, snapshot.now) else {
            return Vec::new();
        };
        if placement.start_time > snapshot.now {
            return Vec::new();
        }

        let end = placement.start_time + placement.walltime;
        let mut victims: Vec<JobId> = gantt
            .query(placement.start_time, end)
            .into_iter()
            .filter(|e| is_besteffort(e.job_id))
            .filter(|e| !e.resources.is_disjoint(&placement.resources))
            .map(|e| e.job_id)
            .collect();
        victims.sort_unstable();
        victims.dedup();
        victims
    }
}
