//! The Gantt assignment table: the live resource-time reservation calendar.
//!
//! Entries live in one of two partitions:
//!
//! - **current**: authoritative reservations, consulted for every conflict
//!   check and slot search
//! - **log**: entries of terminated jobs, immutable once written
//!
//! # Invariant
//!
//! Two current entries of the same slot set that share a resource never
//! overlap in time unless both carry timesharing keys that are compatible.
//! [`GanttTable::reserve`] refuses any insertion that would break this.
//!
//! # Slot sets
//!
//! Ordinary entries live in the main slot set. A container job's entry opens
//! a named slot set; entries of its inner jobs live in that set, inside the
//! container's resources and interval, and only compete with each other.

pub mod slot;

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::{Result, SchedError};
use crate::request::SharingKey;
use crate::resource::ResourceId;
use crate::scheduler::job::{JobId, MoldableId};

pub use slot::{GroupRequest, SlotRequest};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GanttEntry {
    pub moldable_id: MoldableId,
    pub job_id: JobId,
    pub resources: BTreeSet<ResourceId>,
    pub start_time: i64,
    pub walltime: i64,
    #[serde(default)]
    pub sharing: Option<SharingKey>,
    /// Container slot set this entry lives in; `None` is the main set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slot_set: Option<String>,
    /// Slot set this entry opens for inner jobs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container: Option<String>,
}

impl GanttEntry {
    /// Exclusive end of the reserved interval.
    pub fn end_time(&self) -> i64 {
        self.start_time.saturating_add(self.walltime)
    }

    pub fn in_slot_set(&self, slot_set: Option<&str>) -> bool {
        self.slot_set.as_deref() == slot_set
    }

    /// True iff `[start, end)` intersects this entry's interval.
    pub fn overlaps(&self, start: i64, end: i64) -> bool {
        self.start_time < end && start < self.end_time()
    }

    /// True iff this entry may share resource-time with a job holding `other`.
    pub fn shares_with(&self, other: Option<&SharingKey>) -> bool {
        match (&self.sharing, other) {
            (Some(a), Some(b)) => a.compatible(b),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct GanttTable {
    current: BTreeMap<MoldableId, GanttEntry>,
    log: Vec<GanttEntry>,
}

impl GanttTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a current entry, refusing any overlap with an incompatible
    /// current entry on a shared resource.
    pub fn reserve(&mut self, entry: GanttEntry) -> Result<()> {
        if entry.walltime <= 0 || entry.resources.is_empty() {
            return Err(SchedError::Internal(format!(
                "refusing empty reservation for moldable {}",
                entry.moldable_id
            )));
        }
        if self.current.contains_key(&entry.moldable_id) {
            return Err(SchedError::Internal(format!(
                "moldable {} is already reserved",
                entry.moldable_id
            )));
        }

        for other in self.query(entry.start_time, entry.end_time()) {
            if !other.in_slot_set(entry.slot_set.as_deref())
                || other.shares_with(entry.sharing.as_ref())
            {
                continue;
            }
            if let Some(resource_id) = other.resources.intersection(&entry.resources).next() {
                tracing::error!(
                    moldable_id = entry.moldable_id,
                    other = other.moldable_id,
                    resource_id = *resource_id,
                    "Gantt conflict on reserve"
                );
                return Err(SchedError::Conflict {
                    moldable_id: entry.moldable_id,
                    other: other.moldable_id,
                    resource_id: *resource_id,
                });
            }
        }

        tracing::debug!(
            moldable_id = entry.moldable_id,
            job_id = entry.job_id,
            start_time = entry.start_time,
            walltime = entry.walltime,
            resources = entry.resources.len(),
            "Gantt entry reserved"
        );
        self.current.insert(entry.moldable_id, entry);
        Ok(())
    }

    /// Current entries overlapping `[start, end)`.
    pub fn query(&self, start: i64, end: i64) -> Vec<&GanttEntry> {
        self.current
            .values()
            .filter(|e| e.overlaps(start, end))
            .collect()
    }

    /// Move a current entry to the immutable log.
    pub fn commit_log(&mut self, moldable_id: MoldableId) -> Result<()> {
        let entry = self
            .current
            .remove(&moldable_id)
            .ok_or(SchedError::NotFound(moldable_id))?;
        tracing::debug!(moldable_id, job_id = entry.job_id, "Gantt entry moved to log");
        self.log.push(entry);
        Ok(())
    }

    /// Drop a current entry without logging it, freeing its resource-time.
    pub fn release(&mut self, moldable_id: MoldableId) -> Option<GanttEntry> {
        let entry = self.current.remove(&moldable_id);
        if entry.is_some() {
            tracing::debug!(moldable_id, "Gantt entry released");
        }
        entry
    }

    /// Move a current entry's start later and shorten it accordingly. Used
    /// when a reservation is launched after its booked start.
    ///
    /// The new start must fall inside the entry's interval: nothing would be
    /// left of it at or past its end.
    pub fn shift_start(&mut self, moldable_id: MoldableId, new_start: i64) -> Result<i64> {
        let entry = self
            .current
            .get_mut(&moldable_id)
            .ok_or(SchedError::NotFound(moldable_id))?;
        let end = entry.end_time();
        if new_start >= end {
            return Err(SchedError::Internal(format!(
                "cannot move moldable {} to {}: its interval ends at {}",
                moldable_id, new_start, end
            )));
        }
        if new_start > entry.start_time {
            entry.start_time = new_start;
            entry.walltime = end - new_start;
        }
        Ok(entry.walltime)
    }

    /// Current entry of the container that opened slot set `name`. With
    /// several live containers of that name the lowest moldable id wins.
    pub fn container(&self, name: &str) -> Option<&GanttEntry> {
        self.current
            .values()
            .find(|e| e.container.as_deref() == Some(name))
    }

    pub fn get(&self, moldable_id: MoldableId) -> Option<&GanttEntry> {
        self.current.get(&moldable_id)
    }

    pub fn current(&self) -> impl Iterator<Item = &GanttEntry> {
        self.current.values()
    }

    pub fn log(&self) -> &[GanttEntry] {
        &self.log
    }

    pub fn len(&self) -> usize {
        self.current.len()
    }

    pub fn is_empty(&self) -> bool {
        self.current.is_empty()
    }

    /// Check the disjointness invariant over every pair of current entries.
    pub fn check_disjoint(&self) -> Result<()> {
        let entries: Vec<&GanttEntry> = self.current.values().collect();
        for (i, a) in entries.iter().enumerate() {
            for b in &entries[i + 1..] {
                if a.slot_set != b.slot_set
                    || !a.overlaps(b.start_time, b.end_time())
                    || a.shares_with(b.sharing.as_ref())
                {
                    continue;
                }
                if let Some(r) = a.resources.intersection(&b.resources).next() {
                    return Err(SchedError::Conflict {
                        moldable_id: a.moldable_id,
                        other: b.moldable_id,
                        resource_id: *r,
                    });
                }
            }
        }
        Ok(())
    }
}
