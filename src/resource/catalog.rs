use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::{Result, SchedError};
use crate::resource::{Predicate, Resource, ResourceId, ResourceState};

/// Change pushed by the health-monitoring collaborator.
///
/// `next_state` is staged and only becomes the resource's `state` when
/// [`ResourceCatalog::apply_pending_states`] runs at a pass boundary.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceUpdate {
    pub resource_id: ResourceId,
    #[serde(default)]
    pub next_state: Option<ResourceState>,
    #[serde(default)]
    pub drain: Option<bool>,
    #[serde(default)]
    pub available_upto: Option<i64>,
}

impl ResourceUpdate {
    pub fn new(resource_id: ResourceId) -> Self {
        Self {
            resource_id,
            ..Default::default()
        }
    }

    pub fn next_state(mut self, state: ResourceState) -> Self {
        self.next_state = Some(state);
        self
    }

    pub fn drain(mut self, drain: bool) -> Self {
        self.drain = Some(drain);
        self
    }

    pub fn available_upto(mut self, t: i64) -> Self {
        self.available_upto = Some(t);
        self
    }
}

/// Inventory of schedulable resources, keyed by id.
#[derive(Debug, Clone, Default)]
pub struct ResourceCatalog {
    resources: BTreeMap<ResourceId, Resource>,
}

impl ResourceCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_resources(resources: impl IntoIterator<Item = Resource>) -> Result<Self> {
        let mut catalog = Self::new();
        for r in resources {
            catalog.insert(r)?;
        }
        Ok(catalog)
    }

    pub fn insert(&mut self, resource: Resource) -> Result<()> {
        if self.resources.contains_key(&resource.id) {
            return Err(SchedError::Config(format!(
                "duplicate resource id {}",
                resource.id
            )));
        }
        self.resources.insert(resource.id, resource);
        Ok(())
    }

    pub fn get(&self, id: ResourceId) -> Option<&Resource> {
        self.resources.get(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Resource> {
        self.resources.values()
    }

    pub fn ids(&self) -> BTreeSet<ResourceId> {
        self.resources.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// All resources whose properties satisfy `predicate`, regardless of health.
    pub fn find(&self, predicate: &Predicate) -> BTreeSet<ResourceId> {
        self.resources
            .values()
            .filter(|r| predicate.matches(r))
            .map(|r| r.id)
            .collect()
    }

    /// Alive, not drained, and `at_time` before the resource's horizon.
    /// Unknown resources are never available.
    pub fn availability(&self, id: ResourceId, at_time: i64) -> bool {
        self.resources
            .get(&id)
            .is_some_and(|r| r.is_available(at_time))
    }

    pub fn available_for(&self, id: ResourceId, start: i64, end: i64) -> bool {
        self.resources
            .get(&id)
            .is_some_and(|r| r.is_available_for(start, end))
    }

    /// Resources of `ids` that are not Alive right now. Drain does not count:
    /// drained resources keep serving the assignments they already hold.
    pub fn missing(&self, ids: &BTreeSet<ResourceId>) -> BTreeSet<ResourceId> {
        ids.iter()
            .filter(|id| {
                self.resources
                    .get(id)
                    .map_or(true, |r| r.state != ResourceState::Alive)
            })
            .copied()
            .collect()
    }

    pub fn apply_update(&mut self, update: &ResourceUpdate) -> Result<()> {
        let resource = self
            .resources
            .get_mut(&update.resource_id)
            .ok_or(SchedError::UnknownResource(update.resource_id))?;

        if let Some(state) = update.next_state {
            resource.next_state = Some(state);
        }
        if let Some(drain) = update.drain {
            if drain != resource.drain {
                tracing::info!(resource_id = resource.id, drain, "Resource drain flag changed");
            }
            resource.drain = drain;
        }
        if let Some(t) = update.available_upto {
            resource.available_upto = t;
        }
        Ok(())
    }

    /// Promote every staged `next_state`. Returns `(id, old, new)` for each
    /// resource whose state actually changed.
    pub fn apply_pending_states(&mut self) -> Vec<(ResourceId, ResourceState, ResourceState)> {
        let mut changed = Vec::new();
        for resource in self.resources.values_mut() {
            if let Some(next) = resource.next_state.take() {
                if next != resource.state {
                    tracing::info!(
                        resource_id = resource.id,
                        from = %resource.state,
                        to = %next,
                        "Resource state changed"
                    );
                    changed.push((resource.id, resource.state, next));
                    resource.state = next;
                }
            }
        }
        changed
    }

    /// Blocks of a hierarchy level restricted to `scope`: resources grouped by
    /// their value of `level`, ordered by smallest member id. `resource_id`
    /// yields one block per resource. Resources without the property are left
    /// out.
    pub fn blocks(&self, level: &str, scope: &BTreeSet<ResourceId>) -> Vec<BTreeSet<ResourceId>> {
        if level == "resource_id" || level == "id" {
            return scope.iter().map(|id| BTreeSet::from([*id])).collect();
        }

        let mut by_value: BTreeMap<String, BTreeSet<ResourceId>> = BTreeMap::new();
        for id in scope {
            if let Some(value) = self.resources.get(id).and_then(|r| r.property(level)) {
                by_value.entry(value.to_string()).or_default().insert(*id);
            }
        }

        let mut blocks: Vec<BTreeSet<ResourceId>> = by_value.into_values().collect();
        blocks.sort_by_key(|b| b.first().copied());
        blocks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::predicate::parse;

    fn cluster() -> ResourceCatalog {
        // two hosts with two cores each
        ResourceCatalog::from_resources((1..=4).map(|id| {
            Resource::new(id)
                .with_property("network_address", if id <= 2 { "node1" } else { "node2" })
                .with_property("core", id as i64)
        }))
        .unwrap()
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let err = ResourceCatalog::from_resources([Resource::new(1), Resource::new(1)]);
        assert!(matches!(err, Err(SchedError::Config(_))));
    }

    #[test]
    fn find_by_predicate() {
        let c = cluster();
        let p = parse("network_address = 'node2'").unwrap();
        assert_eq!(c.find(&p), BTreeSet::from([3, 4]));
        assert_eq!(c.find(&Predicate::True).len(), 4);
    }

    #[test]
    fn availability_of_unknown_resource_is_false() {
        let c = cluster();
        assert!(c.availability(1, 0));
        assert!(!c.availability(99, 0));
    }

    #[test]
    fn next_state_is_staged_until_applied() {
        let mut c = cluster();
        c.apply_update(&ResourceUpdate::new(2).next_state(ResourceState::Dead))
            .unwrap();
        assert!(c.availability(2, 0));

        let changed = c.apply_pending_states();
        assert_eq!(changed, vec![(2, ResourceState::Alive, ResourceState::Dead)]);
        assert!(!c.availability(2, 0));
        assert!(c.get(2).unwrap().next_state.is_none());
        assert_eq!(c.missing(&BTreeSet::from([1, 2])), BTreeSet::from([2]));
    }

    #[test]
    fn drain_is_immediate_but_not_missing() {
        let mut c = cluster();
        c.apply_update(&ResourceUpdate::new(1).drain(true)).unwrap();
        assert!(!c.availability(1, 0));
        assert!(c.missing(&BTreeSet::from([1])).is_empty());
    }

    #[test]
    fn update_of_unknown_resource_fails() {
        let mut c = cluster();
        let err = c.apply_update(&ResourceUpdate::new(42).drain(true));
        assert!(matches!(err, Err(SchedError::UnknownResource(42))));
    }

    #[test]
    fn blocks_group_by_level_value() {
        let c = cluster();
        let blocks = c.blocks("network_address", &c.ids());
        assert_eq!(blocks, vec![BTreeSet::from([1, 2]), BTreeSet::from([3, 4])]);

        let scoped = c.blocks("core", &BTreeSet::from([3, 4]));
        assert_eq!(scoped, vec![BTreeSet::from([3]), BTreeSet::from([4])]);

        let singles = c.blocks("resource_id", &BTreeSet::from([2, 4]));
        assert_eq!(singles.len(), 2);
        assert!(c.blocks("gpu", &c.ids()).is_empty());
    }
}
