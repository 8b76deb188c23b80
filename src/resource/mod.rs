//! Schedulable resources and the catalog that holds them.
//!
//! - [`Resource`]: one schedulable unit (a core, a cpu, a node) with named
//!   properties, a health state and a time horizon
//! - [`ResourceCatalog`]: predicate lookup and availability checks
//! - [`predicate`]: the boolean property language used by job requests
//! - [`hierarchy`]: block extraction for nested requests such as
//!   `network_address=2/core=4`

pub mod catalog;
pub mod hierarchy;
pub mod predicate;

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::MAX_TIME;

pub use catalog::{ResourceCatalog, ResourceUpdate};
pub use predicate::Predicate;

pub type ResourceId = u64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Int(i64),
    Str(String),
}

impl PropertyValue {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            PropertyValue::Int(i) => Some(*i),
            PropertyValue::Str(s) => s.parse().ok(),
        }
    }

    /// Exact equality, treating `2` and `'2'` as the same value.
    pub fn loosely_equals(&self, other: &PropertyValue) -> bool {
        match (self, other) {
            (PropertyValue::Int(a), PropertyValue::Int(b)) => a == b,
            (PropertyValue::Str(a), PropertyValue::Str(b)) => a == b,
            (PropertyValue::Int(a), PropertyValue::Str(b))
            | (PropertyValue::Str(b), PropertyValue::Int(a)) => a.to_string() == *b,
        }
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyValue::Int(i) => write!(f, "{}", i),
            PropertyValue::Str(s) => f.write_str(s),
        }
    }
}

impl From<i64> for PropertyValue {
    fn from(v: i64) -> Self {
        PropertyValue::Int(v)
    }
}

impl From<&str> for PropertyValue {
    fn from(v: &str) -> Self {
        PropertyValue::Str(v.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(v: String) -> Self {
        PropertyValue::Str(v)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResourceState {
    #[default]
    Alive,
    Absent,
    Dead,
    Suspected,
}

impl fmt::Display for ResourceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceState::Alive => write!(f, "Alive"),
            ResourceState::Absent => write!(f, "Absent"),
            ResourceState::Dead => write!(f, "Dead"),
            ResourceState::Suspected => write!(f, "Suspected"),
        }
    }
}

fn default_available_upto() -> i64 {
    MAX_TIME
}

fn default_besteffort() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub id: ResourceId,
    #[serde(default)]
    pub properties: BTreeMap<String, PropertyValue>,
    #[serde(default = "default_available_upto")]
    pub available_upto: i64,
    #[serde(default)]
    pub state: ResourceState,
    #[serde(default)]
    pub next_state: Option<ResourceState>,
    #[serde(default)]
    pub drain: bool,
    #[serde(default = "default_besteffort")]
    pub besteffort: bool,
}

impl Resource {
    pub fn new(id: ResourceId) -> Self {
        Self {
            id,
            properties: BTreeMap::new(),
            available_upto: MAX_TIME,
            state: ResourceState::Alive,
            next_state: None,
            drain: false,
            besteffort: true,
        }
    }

    pub fn with_property(mut self, name: &str, value: impl Into<PropertyValue>) -> Self {
        self.properties.insert(name.to_string(), value.into());
        self
    }

    pub fn with_available_upto(mut self, t: i64) -> Self {
        self.available_upto = t;
        self
    }

    pub fn with_besteffort(mut self, besteffort: bool) -> Self {
        self.besteffort = besteffort;
        self
    }

    /// Property lookup used by predicates and hierarchy levels.
    ///
    /// `resource_id`/`id` and `besteffort` are synthesized from the record
    /// itself; everything else comes from `properties`.
    pub fn property(&self, name: &str) -> Option<Cow<'_, PropertyValue>> {
        match name {
            "resource_id" | "id" => Some(Cow::Owned(PropertyValue::Int(self.id as i64))),
            "besteffort" => Some(Cow::Owned(PropertyValue::Str(
                if self.besteffort { "YES" } else { "NO" }.to_string(),
            ))),
            _ => self.properties.get(name).map(Cow::Borrowed),
        }
    }

    /// True iff the resource accepts a new assignment at `at_time`.
    pub fn is_available(&self, at_time: i64) -> bool {
        self.state == ResourceState::Alive && !self.drain && at_time < self.available_upto
    }

    /// True iff the resource accepts a new assignment covering `[start, end)`.
    pub fn is_available_for(&self, start: i64, end: i64) -> bool {
        self.is_available(start) && end <= self.available_upto
    }
}
