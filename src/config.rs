use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Scheduling horizon used when a resource has no explicit `available_upto`.
pub const MAX_TIME: i64 = 2_147_483_648;

/// A scheduling queue.
///
/// Queues with a higher `priority` are scheduled first within a pass.
/// Inactive queues keep their jobs waiting without scheduling them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueConfig {
    pub name: String,
    pub priority: u32,
    #[serde(default = "default_true")]
    pub active: bool,
}

fn default_true() -> bool {
    true
}

impl QueueConfig {
    pub fn new(name: &str, priority: u32) -> Self {
        Self {
            name: name.to_string(),
            priority,
            active: true,
        }
    }
}

/// Configuration of the scheduling core.
///
/// Every field has a default so a platform file only needs to list what it
/// overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Walltime injected into moldable alternatives submitted without one (seconds)
    pub default_walltime: i64,
    /// Upper bound for interactive, non-reservation jobs (seconds)
    pub interactive_max_walltime: i64,
    /// End of the scheduling horizon (seconds since epoch)
    pub max_time: i64,
    /// Queue used when a submission names none
    pub default_queue: String,
    pub queues: Vec<QueueConfig>,
    /// Predicate ANDed onto every resource group, e.g. `type = 'default'`
    pub default_property: Option<String>,
    /// How long a due reservation waits for missing resources (seconds)
    pub reservation_waiting_timeout: i64,
    /// Interval between two scheduling passes of the node loop
    pub pass_interval_ms: u64,
    /// Level name aliases accepted in resource descriptions
    pub level_aliases: BTreeMap<String, String>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        let level_aliases = [("nodes", "network_address"), ("host", "network_address")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        Self {
            default_walltime: 7200,
            interactive_max_walltime: 43_200,
            max_time: MAX_TIME,
            default_queue: "default".to_string(),
            queues: vec![
                QueueConfig::new("admin", 10),
                QueueConfig::new("default", 2),
                QueueConfig::new("besteffort", 0),
            ],
            default_property: None,
            reservation_waiting_timeout: 300,
            pass_interval_ms: 1000,
            level_aliases,
        }
    }
}

impl SchedulerConfig {
    pub fn with_default_walltime(mut self, walltime: i64) -> Self {
        self.default_walltime = walltime;
        self
    }

    pub fn with_default_property(mut self, property: &str) -> Self {
        self.default_property = Some(property.to_string());
        self
    }

    pub fn with_queue(mut self, name: &str, priority: u32) -> Self {
        self.queues.retain(|q| q.name != name);
        self.queues.push(QueueConfig::new(name, priority));
        self
    }

    pub fn with_reservation_waiting_timeout(mut self, timeout: i64) -> Self {
        self.reservation_waiting_timeout = timeout;
        self
    }

    pub fn queue(&self, name: &str) -> Option<&QueueConfig> {
        self.queues.iter().find(|q| q.name == name)
    }

    /// Resolve a level alias (`nodes` -> `network_address`).
    pub fn resolve_level<'a>(&'a self, name: &'a str) -> &'a str {
        self.level_aliases
            .get(name)
            .map(String::as_str)
            .unwrap_or(name)
    }
}

/// Runtime settings of the asynchronous node loop.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub pass_interval_ms: u64,
    /// Capacity of the external event channel
    pub event_capacity: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            pass_interval_ms: 1000,
            event_capacity: 1024,
        }
    }
}

impl RuntimeConfig {
    pub fn from_scheduler(config: &SchedulerConfig) -> Self {
        Self {
            pass_interval_ms: config.pass_interval_ms,
            ..Default::default()
        }
    }
}
