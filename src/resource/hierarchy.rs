//! Extraction of nested resource requests.
//!
//! A request such as `network_address=2/core=4` asks for two hosts and four
//! cores on each of them. Each level partitions the resources of its parent
//! block by a property value. A leaf block is only taken when every resource
//! in it is free, so asking for a whole host never returns half of one.

use std::collections::BTreeSet;

use crate::request::Level;
use crate::resource::{ResourceCatalog, ResourceId};

/// Pick resources out of `free` satisfying `levels`, or `None`.
///
/// Blocks are tried in ascending order of their smallest resource id, which
/// makes the choice deterministic and favours low ids.
pub fn find_resource_hierarchies(
    catalog: &ResourceCatalog,
    free: &BTreeSet<ResourceId>,
    levels: &[Level],
) -> Option<BTreeSet<ResourceId>> {
    if levels.is_empty() {
        return None;
    }
    pick(catalog, free, levels, &catalog.ids())
}

fn pick(
    catalog: &ResourceCatalog,
    free: &BTreeSet<ResourceId>,
    levels: &[Level],
    scope: &BTreeSet<ResourceId>,
) -> Option<BTreeSet<ResourceId>> {
    let (level, rest) = levels.split_first()?;
    let wanted = level.count as usize;

    let mut picked = BTreeSet::new();
    let mut found = 0;

    for block in catalog.blocks(&level.property, scope) {
        if found == wanted {
            break;
        }
        if rest.is_empty() {
            if block.is_subset(free) {
                picked.extend(block);
                found += 1;
            }
        } else if !block.is_disjoint(free) {
            if let Some(sub) = pick(catalog, free, rest, &block) {
                picked.extend(sub);
                found += 1;
            }
        }
    }

    (found == wanted).then_some(picked)
}
