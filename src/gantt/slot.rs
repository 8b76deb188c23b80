//! Earliest-slot search over the current Gantt entries.
//!
//! The set of free resources only grows when a current entry ends, so the
//! earliest feasible start is either `not_before` or the end of some current
//! entry. Those instants are tried in ascending order; at each one the
//! resources busy during `[t, t + walltime)` are removed and the hierarchy
//! extractor picks among what is left.

use std::collections::BTreeSet;

use crate::gantt::GanttTable;
use crate::request::{Level, SharingKey};
use crate::resource::hierarchy::find_resource_hierarchies;
use crate::resource::{ResourceCatalog, ResourceId};

/// One resource group of a slot request: the resources its predicate
/// selected and the levels to extract from them.
#[derive(Debug, Clone)]
pub struct GroupRequest<'a> {
    pub eligible: BTreeSet<ResourceId>,
    pub levels: &'a [Level],
}

#[derive(Debug, Clone)]
pub struct SlotRequest<'a> {
    pub groups: Vec<GroupRequest<'a>>,
    pub walltime: i64,
    pub not_before: i64,
    /// No slot may end after this instant
    pub horizon: i64,
    pub sharing: Option<&'a SharingKey>,
    /// Slot set to search; `None` is the main set
    pub slot_set: Option<&'a str>,
}

impl GanttTable {
    /// Resources of `slot_set` that a job holding `sharing` cannot use
    /// during `[start, end)`.
    pub fn busy(
        &self,
        start: i64,
        end: i64,
        sharing: Option<&SharingKey>,
        slot_set: Option<&str>,
    ) -> BTreeSet<ResourceId> {
        self.query(start, end)
            .into_iter()
            .filter(|e| e.in_slot_set(slot_set) && !e.shares_with(sharing))
            .flat_map(|e| e.resources.iter().copied())
            .collect()
    }

    /// Try to place every group of `request` starting exactly at `start`.
    ///
    /// Groups are served in order and never reuse resources picked by an
    /// earlier group.
    pub fn fits_at(
        &self,
        catalog: &ResourceCatalog,
        request: &SlotRequest<'_>,
        start: i64,
    ) -> Option<BTreeSet<ResourceId>> {
        let end = start.checked_add(request.walltime)?;
        if end > request.horizon {
            return None;
        }
        let busy = self.busy(start, end, request.sharing, request.slot_set);

        let mut picked = BTreeSet::new();
        for group in &request.groups {
            let free: BTreeSet<ResourceId> = group
                .eligible
                .iter()
                .filter(|id| !busy.contains(id) && !picked.contains(*id))
                .filter(|id| catalog.available_for(**id, start, end))
                .copied()
                .collect();
            let chosen = find_resource_hierarchies(catalog, &free, group.levels)?;
            picked.extend(chosen);
        }
        Some(picked)
    }

    /// Earliest `(start_time, resources)` at or after `request.not_before`.
    ///
    /// Ties on start time go to the lowest resource ids, so identical inputs
    /// always produce identical answers.
    pub fn find_slot(
        &self,
        catalog: &ResourceCatalog,
        request: &SlotRequest<'_>,
    ) -> Option<(i64, BTreeSet<ResourceId>)> {
        let mut candidates: Vec<i64> = self
            .current()
            .filter(|e| e.in_slot_set(request.slot_set))
            .map(|e| e.end_time())
            .filter(|t| *t > request.not_before)
            .collect();
        candidates.push(request.not_before);
        candidates.sort_unstable();
        candidates.dedup();

        candidates
            .into_iter()
            .take_while(|t| {
                t.checked_add(request.walltime)
                    .is_some_and(|end| end <= request.horizon)
            })
            .find_map(|t| self.fits_at(catalog, request, t).map(|r| (t, r)))
    }

    /// Earliest instant at which `count` resources out of `eligible` are
    /// simultaneously free for `walltime` seconds, starting no sooner than
    /// `not_before`.
    pub fn first_free_slot(
        &self,
        catalog: &ResourceCatalog,
        eligible: &BTreeSet<ResourceId>,
        count: u32,
        walltime: i64,
        not_before: i64,
        horizon: i64,
    ) -> Option<(i64, BTreeSet<ResourceId>)> {
        let levels = [Level::new("resource_id", count)];
        let request = SlotRequest {
            groups: vec![GroupRequest {
                eligible: eligible.clone(),
                levels: &levels,
            }],
            walltime,
            not_before,
            horizon,
            sharing: None,
            slot_set: None,
        };
        self.find_slot(catalog, &request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MAX_TIME;
    use crate::gantt::GanttEntry;
    use crate::resource::{Resource, ResourceUpdate};

    fn catalog(n: u64) -> ResourceCatalog {
        ResourceCatalog::from_resources((1..=n).map(Resource::new)).unwrap()
    }

    fn busy_entry(mld: u64, resources: &[u64], start: i64, walltime: i64) -> GanttEntry {
        GanttEntry {
            moldable_id: mld,
            job_id: mld,
            resources: resources.iter().copied().collect(),
            start_time: start,
            walltime,
            sharing: None,
            slot_set: None,
            container: None,
        }
    }

    #[test]
    fn empty_table_starts_now_with_lowest_ids() {
        let c = catalog(4);
        let g = GanttTable::new();
        let slot = g.first_free_slot(&c, &c.ids(), 2, 3600, 1000, MAX_TIME);
        assert_eq!(slot, Some((1000, BTreeSet::from([1, 2]))));
    }

    #[test]
    fn waits_for_both_resources() {
        let c = catalog(2);
        let mut g = GanttTable::new();
        g.reserve(busy_entry(1, &[1], 0, 7200)).unwrap();
        g.reserve(busy_entry(2, &[2], 0, 3600)).unwrap();

        let slot = g.first_free_slot(&c, &c.ids(), 2, 3600, 0, MAX_TIME);
        assert_eq!(slot, Some((7200, BTreeSet::from([1, 2]))));

        let slot = g.first_free_slot(&c, &c.ids(), 1, 3600, 0, MAX_TIME);
        assert_eq!(slot, Some((3600, BTreeSet::from([2]))));
    }

    #[test]
    fn gap_must_fit_whole_walltime() {
        let c = catalog(1);
        let mut g = GanttTable::new();
        g.reserve(busy_entry(1, &[1], 0, 100)).unwrap();
        g.reserve(busy_entry(2, &[1], 150, 100)).unwrap();

        assert_eq!(
            g.first_free_slot(&c, &c.ids(), 1, 50, 0, MAX_TIME).map(|s| s.0),
            Some(100)
        );
        assert_eq!(
            g.first_free_slot(&c, &c.ids(), 1, 51, 0, MAX_TIME).map(|s| s.0),
            Some(250)
        );
    }

    #[test]
    fn available_upto_bounds_the_window() {
        let c = ResourceCatalog::from_resources([
            Resource::new(1).with_available_upto(1000),
            Resource::new(2),
        ])
        .unwrap();
        let g = GanttTable::new();

        let slot = g.first_free_slot(&c, &c.ids(), 1, 2000, 0, MAX_TIME);
        assert_eq!(slot, Some((0, BTreeSet::from([2]))));
        assert!(g.first_free_slot(&c, &c.ids(), 2, 2000, 0, MAX_TIME).is_none());
        assert!(g.first_free_slot(&c, &c.ids(), 2, 1000, 0, MAX_TIME).is_some());
    }

    #[test]
    fn drained_resources_are_skipped() {
        let mut c = catalog(3);
        c.apply_update(&ResourceUpdate::new(1).drain(true)).unwrap();
        let g = GanttTable::new();
        let slot = g.first_free_slot(&c, &c.ids(), 2, 10, 0, MAX_TIME);
        assert_eq!(slot, Some((0, BTreeSet::from([2, 3]))));
        assert!(g.first_free_slot(&c, &c.ids(), 3, 10, 0, MAX_TIME).is_none());
    }

    #[test]
    fn horizon_limits_search() {
        let c = catalog(1);
        let mut g = GanttTable::new();
        g.reserve(busy_entry(1, &[1], 0, 100)).unwrap();
        assert!(g.first_free_slot(&c, &c.ids(), 1, 50, 0, 120).is_none());
        assert_eq!(
            g.first_free_slot(&c, &c.ids(), 1, 20, 0, 120).map(|s| s.0),
            Some(100)
        );
    }

    #[test]
    fn groups_do_not_share_resources() {
        let c = catalog(3);
        let g = GanttTable::new();
        let one = [Level::new("resource_id", 1)];
        let two = [Level::new("resource_id", 2)];
        let request = SlotRequest {
            groups: vec![
                GroupRequest {
                    eligible: c.ids(),
                    levels: &two,
                },
                GroupRequest {
                    eligible: BTreeSet::from([1, 2, 3]),
                    levels: &one,
                },
            ],
            walltime: 10,
            not_before: 0,
            horizon: MAX_TIME,
            sharing: None,
            slot_set: None,
        };
        assert_eq!(g.find_slot(&c, &request), Some((0, BTreeSet::from([1, 2, 3]))));
    }

    #[test]
    fn huge_walltime_finds_nothing() {
        let c = catalog(1);
        let mut g = GanttTable::new();
        g.reserve(busy_entry(1, &[1], 0, 100)).unwrap();
        assert!(g.first_free_slot(&c, &c.ids(), 1, i64::MAX, 0, MAX_TIME).is_none());
        assert!(g.first_free_slot(&c, &c.ids(), 1, i64::MAX, 0, i64::MAX).is_none());
    }

    #[test]
    fn slot_set_search_ignores_other_sets() {
        let c = catalog(2);
        let mut g = GanttTable::new();
        let mut outer = busy_entry(1, &[1, 2], 0, 1000);
        outer.container = Some("c".to_string());
        g.reserve(outer).unwrap();
        let mut inner = busy_entry(2, &[1], 0, 300);
        inner.slot_set = Some("c".to_string());
        g.reserve(inner).unwrap();

        let levels = [Level::new("resource_id", 2)];
        let request = SlotRequest {
            groups: vec![GroupRequest {
                eligible: c.ids(),
                levels: &levels,
            }],
            walltime: 100,
            not_before: 0,
            horizon: 1000,
            sharing: None,
            slot_set: Some("c"),
        };
        // only the inner entry is in the way, not the container itself
        assert_eq!(g.find_slot(&c, &request).map(|s| s.0), Some(300));
        assert_eq!(g.first_free_slot(&c, &c.ids(), 1, 100, 0, MAX_TIME).map(|s| s.0), Some(1000));
    }

    #[test]
    fn search_is_deterministic() {
        let c = catalog(8);
        let mut g = GanttTable::new();
        g.reserve(busy_entry(1, &[1, 3, 5], 0, 500)).unwrap();
        g.reserve(busy_entry(2, &[2, 4], 100, 300)).unwrap();
        let first = g.first_free_slot(&c, &c.ids(), 4, 200, 0, MAX_TIME);
        for _ in 0..10 {
            assert_eq!(g.first_free_slot(&c, &c.ids(), 4, 200, 0, MAX_TIME), first);
        }
        assert_eq!(first, Some((400, BTreeSet::from([2, 4, 6, 7]))));
    }
}
