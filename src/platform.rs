//! Platform description files: scheduler configuration, resource inventory
//! and a timed workload, as consumed by the `simulate` and `run` commands.
//!
//! ```json
//! {
//!   "config": { "default_walltime": 3600 },
//!   "resources": [
//!     { "id": 1, "properties": { "network_address": "node1", "cpu": 1 } }
//!   ],
//!   "submissions": [
//!     { "at": 0, "runtime": 600, "user": "alice",
//!       "moldables": [ { "walltime": "1:0:0", "groups": [ { "resources": "/nodes=1" } ] } ] }
//!   ],
//!   "resource_updates": [ { "at": 100, "resource_id": 1, "drain": true } ]
//! }
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::config::SchedulerConfig;
use crate::error::{Result, SchedError};
use crate::request::RawSubmission;
use crate::resource::{Resource, ResourceCatalog, ResourceUpdate};
use crate::scheduler::Scheduler;

/// A submission arriving at a given instant of the workload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimedSubmission {
    /// Offset from the start of the run, in seconds
    pub at: i64,
    /// How long the job actually runs once started; unset means it runs to
    /// its walltime
    #[serde(default)]
    pub runtime: Option<i64>,
    #[serde(flatten)]
    pub submission: RawSubmission,
}

/// A health-monitor report arriving at a given instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimedUpdate {
    pub at: i64,
    #[serde(flatten)]
    pub update: ResourceUpdate,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Platform {
    #[serde(default)]
    pub config: SchedulerConfig,
    pub resources: Vec<Resource>,
    #[serde(default)]
    pub submissions: Vec<TimedSubmission>,
    #[serde(default)]
    pub resource_updates: Vec<TimedUpdate>,
}

impl Platform {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let platform = Self::from_json(&text)?;
        tracing::info!(
            path = %path.display(),
            resources = platform.resources.len(),
            submissions = platform.submissions.len(),
            "Platform loaded"
        );
        Ok(platform)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let platform: Platform = serde_json::from_str(text)?;
        platform.validate()?;
        Ok(platform)
    }

    fn validate(&self) -> Result<()> {
        if self.resources.is_empty() {
            return Err(SchedError::Config("platform has no resources".to_string()));
        }
        if self.config.queue(&self.config.default_queue).is_none() {
            return Err(SchedError::Config(format!(
                "default queue '{}' is not declared",
                self.config.default_queue
            )));
        }
        if self.config.pass_interval_ms == 0 {
            return Err(SchedError::Config(
                "pass_interval_ms must be positive".to_string(),
            ));
        }
        if let Some(s) = self.submissions.iter().find(|s| s.at < 0) {
            return Err(SchedError::Config(format!(
                "submission of {} has a negative offset",
                s.submission.user
            )));
        }
        if let Some(u) = self.resource_updates.iter().find(|u| u.at < 0) {
            return Err(SchedError::Config(format!(
                "update of resource {} has a negative offset",
                u.update.resource_id
            )));
        }
        Ok(())
    }

    pub fn catalog(&self) -> Result<ResourceCatalog> {
        ResourceCatalog::from_resources(self.resources.iter().cloned())
    }

    pub fn scheduler(&self) -> Result<Scheduler> {
        Ok(Scheduler::new(self.config.clone(), self.catalog()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::RawWalltime;
    use std::io::Write;

    const PLATFORM: &str = r#"{
        "config": { "default_walltime": 600 },
        "resources": [
            { "id": 1, "properties": { "network_address": "node1", "cpu": 1 } },
            { "id": 2, "properties": { "network_address": "node1", "cpu": 2 }, "besteffort": false }
        ],
        "submissions": [
            { "at": 5, "runtime": 100, "user": "alice",
              "moldables": [ { "walltime": "0:10:0", "groups": [ { "resources": "/nodes=1" } ] } ] },
            { "at": 10, "user": "bob", "types": ["besteffort"],
              "moldables": [ { "groups": [ { "resources": "/resource_id=1", "property": "cpu = 1" } ] } ] }
        ],
        "resource_updates": [ { "at": 50, "resource_id": 2, "drain": true } ]
    }"#;

    #[test]
    fn parses_full_platform() {
        let p = Platform::from_json(PLATFORM).unwrap();
        assert_eq!(p.config.default_walltime, 600);
        assert_eq!(p.config.default_queue, "default");
        assert_eq!(p.resources.len(), 2);
        assert!(!p.resources[1].besteffort);
        assert_eq!(p.submissions[0].runtime, Some(100));
        assert_eq!(
            p.submissions[0].submission.moldables[0].walltime,
            Some(RawWalltime::Text("0:10:0".to_string()))
        );
        assert_eq!(p.submissions[1].submission.types, vec!["besteffort".to_string()]);
        assert_eq!(p.resource_updates[0].update.drain, Some(true));
        assert_eq!(p.catalog().unwrap().len(), 2);
    }

    #[test]
    fn rejects_empty_or_duplicate_resources() {
        assert!(matches!(
            Platform::from_json(r#"{ "resources": [] }"#),
            Err(SchedError::Config(_))
        ));
        let dup = Platform::from_json(r#"{ "resources": [ { "id": 1 }, { "id": 1 } ] }"#).unwrap();
        assert!(dup.scheduler().is_err());
        assert!(matches!(Platform::from_json("{"), Err(SchedError::Json(_))));
    }

    #[test]
    fn rejects_zero_pass_interval() {
        let zero = r#"{ "config": { "pass_interval_ms": 0 }, "resources": [ { "id": 1 } ] }"#;
        assert!(matches!(Platform::from_json(zero), Err(SchedError::Config(_))));
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(PLATFORM.as_bytes()).unwrap();
        let p = Platform::load(file.path()).unwrap();
        assert_eq!(p.submissions.len(), 2);

        assert!(matches!(
            Platform::load("/nonexistent/platform.json"),
            Err(SchedError::Io(_))
        ));
    }
}
