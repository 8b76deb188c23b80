//! Resource matching for a single job against a frozen view of the cluster.
//!
//! Nothing here mutates state: the pass decides what to do with a
//! [`Placement`] once it has one.
//!
//! An inner job is matched inside its container's Gantt entry: only the
//! container's resources, no sooner than its start and ending by its end.
//! Without a live container there is nowhere to put it.

use std::collections::BTreeSet;

use crate::config::SchedulerConfig;
use crate::gantt::{GanttTable, GroupRequest, SlotRequest};
use crate::request::{MoldableAlternative, ResourceGroup, SharingKey};
use crate::resource::{ResourceCatalog, ResourceId};
use crate::scheduler::job::{Job, MoldableId};

/// Read-only view of the cluster handed to the matcher for one pass.
#[derive(Debug, Clone, Copy)]
pub struct Snapshot<'a> {
    pub now: i64,
    pub catalog: &'a ResourceCatalog,
    pub config: &'a SchedulerConfig,
}

/// Where and when one moldable alternative of a job fits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placement {
    pub moldable_id: MoldableId,
    pub moldable_index: usize,
    pub start_time: i64,
    pub walltime: i64,
    pub resources: BTreeSet<ResourceId>,
}

/// Resources a group of `job` may ever use: its predicate, narrowed to
/// besteffort-capable resources for besteffort jobs.
pub fn eligible(
    snapshot: &Snapshot<'_>,
    job: &Job,
    group: &ResourceGroup,
) -> BTreeSet<ResourceId> {
    let matching = snapshot.catalog.find(&group.predicate);
    if !job.is_besteffort() {
        return matching;
    }
    matching
        .into_iter()
        .filter(|id| snapshot.catalog.get(*id).is_some_and(|r| r.besteffort))
        .collect()
}

fn slot_request<'a>(
    snapshot: &Snapshot<'_>,
    gantt: &GanttTable,
    job: &'a Job,
    alternative: &'a MoldableAlternative,
    sharing: Option<&'a SharingKey>,
    not_before: i64,
) -> Option<SlotRequest<'a>> {
    let slot_set = job.request.types.inner.as_deref();
    let container = match slot_set {
        Some(name) => Some(gantt.container(name)?),
        None => None,
    };

    let groups = alternative
        .groups
        .iter()
        .map(|g| {
            let mut eligible = eligible(snapshot, job, g);
            if let Some(c) = container {
                eligible.retain(|id| c.resources.contains(id));
            }
            GroupRequest {
                eligible,
                levels: &g.levels,
            }
        })
        .collect();

    Some(SlotRequest {
        groups,
        walltime: alternative.walltime,
        not_before: container.map_or(not_before, |c| not_before.max(c.start_time)),
        horizon: container.map_or(snapshot.config.max_time, |c| {
            c.end_time().min(snapshot.config.max_time)
        }),
        sharing,
        slot_set,
    })
}

fn placement(
    job: &Job,
    index: usize,
    walltime: i64,
    start_time: i64,
    resources: BTreeSet<ResourceId>,
) -> Option<Placement> {
    Some(Placement {
        moldable_id: *job.moldable_ids.get(index)?,
        moldable_index: index,
        start_time,
        walltime,
        resources,
    })
}

/// Earliest placement of `job` no sooner than `not_before`.
///
/// Alternatives are tried in the order the job lists them and the first
/// one that fits anywhere before the horizon wins.
pub fn earliest(
    snapshot: &Snapshot<'_>,
    gantt: &GanttTable,
    job: &Job,
    not_before: i64,
) -> Option<Placement> {
    let sharing = job.request.sharing_key();
    for (index, alternative) in job.request.moldables.iter().enumerate() {
        let request = slot_request(snapshot, gantt, job, alternative, sharing.as_ref(), not_before)?;
        if let Some((start, resources)) = gantt.find_slot(snapshot.catalog, &request) {
            return placement(job, index, alternative.walltime, start, resources);
        }
    }
    None
}

/// Placement of `job` starting exactly at `start`, as an advance
/// reservation requires.
pub fn exact(
    snapshot: &Snapshot<'_>,
    gantt: &GanttTable,
    job: &Job,
    start: i64,
) -> Option<Placement> {
    let sharing = job.request.sharing_key();
    for (index, alternative) in job.request.moldables.iter().enumerate() {
        let request = slot_request(snapshot, gantt, job, alternative, sharing.as_ref(), start)?;
        if let Some(resources) = gantt.fits_at(snapshot.catalog, &request, start) {
            return placement(job, index, alternative.walltime, start, resources);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gantt::GanttEntry;
    use crate::request::{JobRequest, JobTypes};
    use crate::resource::predicate::parse;
    use crate::resource::{Predicate, Resource};

    fn catalog() -> ResourceCatalog {
        ResourceCatalog::from_resources((1..=4).map(|id| {
            Resource::new(id)
                .with_property("mem", if id <= 2 { 64i64 } else { 128 })
                .with_besteffort(id != 4)
        }))
        .unwrap()
    }

    fn job(request: JobRequest) -> Job {
        let ids = (1..=request.moldables.len() as u64).collect();
        Job::new(1, request, ids, 2, 0)
    }

    fn alt(walltime: i64, count: u32, pred: Predicate) -> MoldableAlternative {
        MoldableAlternative::new(walltime, vec![ResourceGroup::resources(count, pred)])
    }

    #[test]
    fn predicate_restricts_eligible_resources() {
        let c = catalog();
        let cfg = SchedulerConfig::default();
        let snap = Snapshot { now: 0, catalog: &c, config: &cfg };
        let j = job(JobRequest::new("a", alt(60, 2, parse("mem >= 128").unwrap())));

        let p = earliest(&snap, &GanttTable::new(), &j, 0).unwrap();
        assert_eq!(p.resources, BTreeSet::from([3, 4]));
        assert_eq!(p.moldable_id, 1);
    }

    #[test]
    fn besteffort_jobs_avoid_flagged_resources() {
        let c = catalog();
        let cfg = SchedulerConfig::default();
        let snap = Snapshot { now: 0, catalog: &c, config: &cfg };
        let types = JobTypes {
            besteffort: true,
            ..Default::default()
        };
        let j = job(JobRequest::new("a", alt(60, 1, parse("mem = 128").unwrap())).with_types(types));

        let p = earliest(&snap, &GanttTable::new(), &j, 0).unwrap();
        assert_eq!(p.resources, BTreeSet::from([3]));
    }

    #[test]
    fn first_fitting_alternative_wins() {
        let c = catalog();
        let cfg = SchedulerConfig::default();
        let snap = Snapshot { now: 0, catalog: &c, config: &cfg };
        let j = job(
            JobRequest::new("a", alt(60, 8, Predicate::True))
                .with_moldable(alt(120, 2, Predicate::True))
                .with_moldable(alt(30, 1, Predicate::True)),
        );

        let p = earliest(&snap, &GanttTable::new(), &j, 0).unwrap();
        assert_eq!((p.moldable_index, p.moldable_id, p.walltime), (1, 2, 120));
    }

    #[test]
    fn exact_refuses_busy_start() {
        let c = catalog();
        let cfg = SchedulerConfig::default();
        let snap = Snapshot { now: 0, catalog: &c, config: &cfg };
        let mut g = GanttTable::new();
        g.reserve(GanttEntry {
            moldable_id: 9,
            job_id: 9,
            resources: c.ids(),
            start_time: 0,
            walltime: 100,
            sharing: None,
            slot_set: None,
            container: None,
        })
        .unwrap();
        let j = job(JobRequest::new("a", alt(60, 4, Predicate::True)));

        assert!(exact(&snap, &g, &j, 50).is_none());
        assert_eq!(exact(&snap, &g, &j, 100).map(|p| p.start_time), Some(100));
        assert_eq!(earliest(&snap, &g, &j, 0).map(|p| p.start_time), Some(100));
    }

    #[test]
    fn inner_job_stays_inside_its_container() {
        let c = catalog();
        let cfg = SchedulerConfig::default();
        let snap = Snapshot { now: 0, catalog: &c, config: &cfg };
        let inner = JobTypes {
            inner: Some("box".to_string()),
            ..Default::default()
        };
        let j = job(JobRequest::new("a", alt(60, 1, Predicate::True)).with_types(inner));

        let mut g = GanttTable::new();
        assert!(earliest(&snap, &g, &j, 0).is_none());

        g.reserve(GanttEntry {
            moldable_id: 9,
            job_id: 9,
            resources: BTreeSet::from([3, 4]),
            start_time: 100,
            walltime: 100,
            sharing: None,
            slot_set: None,
            container: Some("box".to_string()),
        })
        .unwrap();
        let p = earliest(&snap, &g, &j, 0).unwrap();
        assert_eq!((p.start_time, p.resources), (100, BTreeSet::from([3])));

        let long = job(
            JobRequest::new("a", alt(150, 1, Predicate::True)).with_types(JobTypes {
                inner: Some("box".to_string()),
                ..Default::default()
            }),
        );
        assert!(earliest(&snap, &g, &long, 0).is_none());
    }
}
