//! Job requests: moldable alternatives, resource groups and admission
//! normalization.
//!
//! A [`RawSubmission`] is what a front end hands over. [`normalize`] turns it
//! into a [`JobRequest`] whose alternatives all carry a positive walltime and
//! a parsed predicate, which is the only form the scheduler accepts.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::SchedulerConfig;
use crate::error::{Result, SchedError};
use crate::resource::predicate::{self, Predicate};
use crate::scheduler::job::JobId;

/// One level of a nested request: `count` blocks sharing a value of `property`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Level {
    pub property: String,
    pub count: u32,
}

impl Level {
    pub fn new(property: &str, count: u32) -> Self {
        Self {
            property: property.to_string(),
            count,
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.property, self.count)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceGroup {
    pub levels: Vec<Level>,
    pub predicate: Predicate,
}

impl ResourceGroup {
    /// `count` individual resources matching `predicate`.
    pub fn resources(count: u32, predicate: Predicate) -> Self {
        Self {
            levels: vec![Level::new("resource_id", count)],
            predicate,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoldableAlternative {
    pub walltime: i64,
    pub groups: Vec<ResourceGroup>,
}

impl MoldableAlternative {
    pub fn new(walltime: i64, groups: Vec<ResourceGroup>) -> Self {
        Self { walltime, groups }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReservationMode {
    #[default]
    None,
    #[serde(rename = "toSchedule")]
    ToSchedule,
    Scheduled,
}

impl fmt::Display for ReservationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReservationMode::None => write!(f, "None"),
            ReservationMode::ToSchedule => write!(f, "toSchedule"),
            ReservationMode::Scheduled => write!(f, "Scheduled"),
        }
    }
}

/// Key declared by a `timesharing=<a>,<b>` type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SharingMode {
    /// `*,*`
    Anyone,
    /// `user,*`
    SameUser,
    /// `*,name`
    SameName,
    /// `user,name`
    SameUserAndName,
}

impl SharingMode {
    fn parse(spec: &str) -> Option<Self> {
        let (a, b) = spec.split_once(',')?;
        let mut user = false;
        let mut name = false;
        for part in [a, b] {
            match part {
                "*" => {}
                "user" if !user => user = true,
                "name" if !name => name = true,
                _ => return None,
            }
        }
        Some(match (user, name) {
            (false, false) => SharingMode::Anyone,
            (true, false) => SharingMode::SameUser,
            (false, true) => SharingMode::SameName,
            (true, true) => SharingMode::SameUserAndName,
        })
    }
}

impl fmt::Display for SharingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SharingMode::Anyone => write!(f, "*,*"),
            SharingMode::SameUser => write!(f, "user,*"),
            SharingMode::SameName => write!(f, "*,name"),
            SharingMode::SameUserAndName => write!(f, "user,name"),
        }
    }
}

/// Everything needed to decide whether two jobs may share resource-time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharingKey {
    pub mode: SharingMode,
    pub user: String,
    pub name: Option<String>,
}

impl SharingKey {
    pub fn compatible(&self, other: &SharingKey) -> bool {
        use SharingMode::*;
        let same_user = self.user == other.user;
        let same_name = self.name == other.name;
        (self.mode == Anyone && other.mode == Anyone)
            || (same_user && same_name)
            || (same_user && self.mode == SameUser && other.mode == SameUser)
            || (same_name && self.mode == SameName && other.mode == SameName)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobTypes {
    pub besteffort: bool,
    pub interactive: bool,
    pub deploy: bool,
    /// `container` or `container=<name>`: the job opens a slot set for
    /// inner jobs. An empty name means the set is named after the job id.
    pub container: Option<String>,
    /// `inner=<name>`: the job runs inside the slot set of that container
    pub inner: Option<String>,
    pub idempotent: bool,
    pub timesharing: Option<SharingMode>,
}

impl JobTypes {
    pub fn parse(types: &[String]) -> Result<Self> {
        let mut parsed = JobTypes::default();
        for t in types {
            let (head, arg) = match t.split_once('=') {
                Some((h, a)) => (h, Some(a)),
                None => (t.as_str(), None),
            };
            match (head, arg) {
                ("besteffort", None) => parsed.besteffort = true,
                ("interactive", None) => parsed.interactive = true,
                ("deploy", None) | ("deploy", Some("standby")) => parsed.deploy = true,
                ("container", name) => parsed.container = Some(name.unwrap_or("").to_string()),
                ("inner", Some(name)) if !name.is_empty() => parsed.inner = Some(name.to_string()),
                ("idempotent", None) => parsed.idempotent = true,
                ("timesharing", Some(spec)) => match SharingMode::parse(spec) {
                    Some(mode) => parsed.timesharing = Some(mode),
                    None => {
                        return Err(SchedError::MalformedRequest(format!(
                            "invalid timesharing key: {}",
                            spec
                        )))
                    }
                },
                _ => {
                    return Err(SchedError::MalformedRequest(format!(
                        "unknown job type: {}",
                        t
                    )))
                }
            }
        }
        Ok(parsed)
    }

    pub fn labels(&self) -> Vec<String> {
        let mut labels = Vec::new();
        if self.besteffort {
            labels.push("besteffort".to_string());
        }
        if self.interactive {
            labels.push("interactive".to_string());
        }
        if self.deploy {
            labels.push("deploy".to_string());
        }
        match self.container.as_deref() {
            Some("") => labels.push("container".to_string()),
            Some(name) => labels.push(format!("container={}", name)),
            None => {}
        }
        if let Some(name) = &self.inner {
            labels.push(format!("inner={}", name));
        }
        if self.idempotent {
            labels.push("idempotent".to_string());
        }
        if let Some(mode) = self.timesharing {
            labels.push(format!("timesharing={}", mode));
        }
        labels
    }
}

/// A normalized job request, ready for the scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRequest {
    pub user: String,
    pub name: Option<String>,
    pub queue: String,
    pub types: JobTypes,
    pub reservation: ReservationMode,
    /// Requested start of an advance reservation
    pub reservation_start: Option<i64>,
    pub moldables: Vec<MoldableAlternative>,
    /// Jobs that must be over before this one may start
    #[serde(default)]
    pub dependencies: Vec<JobId>,
}

impl JobRequest {
    /// Single-alternative batch request in the default queue.
    pub fn new(user: &str, moldable: MoldableAlternative) -> Self {
        Self {
            user: user.to_string(),
            name: None,
            queue: "default".to_string(),
            types: JobTypes::default(),
            reservation: ReservationMode::None,
            reservation_start: None,
            moldables: vec![moldable],
            dependencies: Vec::new(),
        }
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    pub fn with_queue(mut self, queue: &str) -> Self {
        self.queue = queue.to_string();
        self
    }

    pub fn with_types(mut self, types: JobTypes) -> Self {
        self.types = types;
        self
    }

    pub fn with_dependencies(mut self, dependencies: Vec<JobId>) -> Self {
        self.dependencies = dependencies;
        self
    }

    pub fn with_moldable(mut self, moldable: MoldableAlternative) -> Self {
        self.moldables.push(moldable);
        self
    }

    /// Turn the request into an advance reservation starting at `start`.
    pub fn reserved_at(mut self, start: i64) -> Self {
        self.reservation = ReservationMode::ToSchedule;
        self.reservation_start = Some(start);
        self
    }

    pub fn sharing_key(&self) -> Option<SharingKey> {
        self.types.timesharing.map(|mode| SharingKey {
            mode,
            user: self.user.clone(),
            name: self.name.clone(),
        })
    }

    /// Check the invariants `normalize` guarantees. The scheduler refuses
    /// anything that fails here. Walltimes and reservation starts must stay
    /// below `max_time`, the end of the scheduling horizon.
    pub fn validate(&self, max_time: i64) -> Result<()> {
        if self.moldables.is_empty() {
            return Err(SchedError::MalformedRequest(
                "no moldable alternative".to_string(),
            ));
        }
        for (i, m) in self.moldables.iter().enumerate() {
            if m.walltime <= 0 {
                return Err(SchedError::MalformedRequest(format!(
                    "moldable #{} has a non-positive walltime ({})",
                    i, m.walltime
                )));
            }
            if m.walltime > max_time {
                return Err(SchedError::MalformedRequest(format!(
                    "moldable #{} has a walltime beyond the horizon ({})",
                    i, m.walltime
                )));
            }
            if m.groups.is_empty() {
                return Err(SchedError::MalformedRequest(format!(
                    "moldable #{} has no resource group",
                    i
                )));
            }
            for g in &m.groups {
                if g.levels.is_empty() || g.levels.iter().any(|l| l.count == 0) {
                    return Err(SchedError::MalformedRequest(format!(
                        "moldable #{} has an empty resource level",
                        i
                    )));
                }
            }
        }
        if self.types.inner.is_some() && self.types.besteffort {
            return Err(SchedError::MalformedRequest(
                "a besteffort job cannot run inside a container".to_string(),
            ));
        }
        match (self.reservation, self.reservation_start) {
            (ReservationMode::ToSchedule, None) => Err(SchedError::MalformedRequest(
                "reservation without a start time".to_string(),
            )),
            (_, Some(start)) if !(0..max_time).contains(&start) => {
                Err(SchedError::MalformedRequest(format!(
                    "reservation start {} is outside the horizon",
                    start
                )))
            }
            _ if self.types.besteffort && self.reservation != ReservationMode::None => {
                Err(SchedError::MalformedRequest(
                    "a job cannot both be of type besteffort and be a reservation".to_string(),
                ))
            }
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawWalltime {
    Seconds(i64),
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawGroup {
    /// Level description such as `/nodes=2/core=4`
    pub resources: String,
    #[serde(default)]
    pub property: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawMoldable {
    #[serde(default)]
    pub walltime: Option<RawWalltime>,
    #[serde(default)]
    pub groups: Vec<RawGroup>,
}

/// Submission as produced by a front end, before admission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawSubmission {
    pub user: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub queue: Option<String>,
    #[serde(default)]
    pub types: Vec<String>,
    /// Job-level property ANDed into every group
    #[serde(default)]
    pub properties: Option<String>,
    /// Requested start time of an advance reservation
    #[serde(default)]
    pub reservation: Option<i64>,
    #[serde(default)]
    pub dependencies: Vec<JobId>,
    #[serde(default)]
    pub moldables: Vec<RawMoldable>,
}

/// Parse `H:M:S`, `H:M` or `H` into seconds.
pub fn parse_walltime(text: &str) -> Result<i64> {
    let bad = || SchedError::MalformedRequest(format!("invalid walltime: {}", text));
    let parts = text
        .trim()
        .split(':')
        .map(|p| p.parse::<i64>().map_err(|_| bad()))
        .collect::<Result<Vec<i64>>>()?;
    if parts.iter().any(|p| *p < 0) {
        return Err(bad());
    }
    let (h, m, s) = match parts.as_slice() {
        [h] => (*h, 0, 0),
        [h, m] => (*h, *m, 0),
        [h, m, s] => (*h, *m, *s),
        _ => return Err(bad()),
    };
    h.checked_mul(3600)
        .and_then(|t| m.checked_mul(60).and_then(|m| t.checked_add(m)))
        .and_then(|t| t.checked_add(s))
        .ok_or_else(bad)
}

/// Seconds as `H:M:S` without padding, e.g. `2:0:0`.
pub fn format_walltime(seconds: i64) -> String {
    format!(
        "{}:{}:{}",
        seconds / 3600,
        (seconds % 3600) / 60,
        seconds % 60
    )
}

/// Parse a level description such as `/nodes=2/core=4`, resolving aliases.
pub fn parse_levels(desc: &str, config: &SchedulerConfig) -> Result<Vec<Level>> {
    let mut levels = Vec::new();
    for part in desc.split('/').map(str::trim).filter(|p| !p.is_empty()) {
        let (name, count) = part.split_once('=').ok_or_else(|| {
            SchedError::MalformedRequest(format!("invalid resource level: {}", part))
        })?;
        let count: u32 = count.trim().parse().map_err(|_| {
            SchedError::MalformedRequest(format!("invalid resource count: {}", part))
        })?;
        if count == 0 {
            return Err(SchedError::MalformedRequest(format!(
                "resource count must be positive: {}",
                part
            )));
        }
        levels.push(Level::new(config.resolve_level(name.trim()), count));
    }
    if levels.is_empty() {
        return Err(SchedError::MalformedRequest(format!(
            "empty resource description: '{}'",
            desc
        )));
    }
    Ok(levels)
}

const DEPLOY_FORBIDDEN_LEVELS: [&str; 4] = ["core", "cpu", "thread", "resource_id"];

/// Apply admission defaults and turn a raw submission into a [`JobRequest`].
pub fn normalize(raw: &RawSubmission, config: &SchedulerConfig) -> Result<JobRequest> {
    let mut types = JobTypes::parse(&raw.types)?;

    let mut queue = raw
        .queue
        .clone()
        .unwrap_or_else(|| config.default_queue.clone());
    if types.besteffort && queue != "besteffort" {
        tracing::debug!(user = %raw.user, "Redirecting besteffort job to the besteffort queue");
        queue = "besteffort".to_string();
    }
    if queue == "besteffort" {
        types.besteffort = true;
    }

    if raw.moldables.is_empty() {
        return Err(SchedError::MalformedRequest(
            "no moldable alternative".to_string(),
        ));
    }

    let job_property = raw
        .properties
        .as_deref()
        .map(predicate::parse)
        .transpose()?
        .unwrap_or(Predicate::True);
    let default_property = config
        .default_property
        .as_deref()
        .map(predicate::parse)
        .transpose()?
        .unwrap_or(Predicate::True);

    let mut moldables = Vec::with_capacity(raw.moldables.len());
    for raw_mold in &raw.moldables {
        if raw_mold.groups.is_empty() {
            return Err(SchedError::MalformedRequest(
                "no resource group".to_string(),
            ));
        }

        let mut walltime = match &raw_mold.walltime {
            Some(RawWalltime::Seconds(s)) => *s,
            Some(RawWalltime::Text(t)) => parse_walltime(t)?,
            None => config.default_walltime,
        };
        if types.interactive && raw.reservation.is_none() && walltime > config.interactive_max_walltime {
            tracing::debug!(
                walltime,
                max = config.interactive_max_walltime,
                "Clamping interactive walltime"
            );
            walltime = config.interactive_max_walltime;
        }

        let mut groups = Vec::with_capacity(raw_mold.groups.len());
        for raw_group in &raw_mold.groups {
            let levels = parse_levels(&raw_group.resources, config)?;
            if types.deploy {
                if let Some(bad) = levels
                    .iter()
                    .find(|l| DEPLOY_FORBIDDEN_LEVELS.contains(&l.property.as_str()))
                {
                    return Err(SchedError::MalformedRequest(format!(
                        "{} resource is not allowed with a deploy job",
                        bad.property
                    )));
                }
            }
            let own = raw_group
                .property
                .as_deref()
                .map(predicate::parse)
                .transpose()?
                .unwrap_or(Predicate::True);
            let predicate = own
                .and(job_property.clone())
                .and(default_property.clone());
            groups.push(ResourceGroup { levels, predicate });
        }

        moldables.push(MoldableAlternative { walltime, groups });
    }

    let request = JobRequest {
        user: raw.user.clone(),
        name: raw.name.clone(),
        queue,
        types,
        reservation: if raw.reservation.is_some() {
            ReservationMode::ToSchedule
        } else {
            ReservationMode::None
        },
        reservation_start: raw.reservation,
        moldables,
        dependencies: raw.dependencies.clone(),
    };
    request.validate(config.max_time)?;
    Ok(request)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(resources: &str) -> RawSubmission {
        RawSubmission {
            user: "alice".to_string(),
            name: None,
            queue: None,
            types: Vec::new(),
            properties: None,
            reservation: None,
            dependencies: Vec::new(),
            moldables: vec![RawMoldable {
                walltime: None,
                groups: vec![RawGroup {
                    resources: resources.to_string(),
                    property: None,
                }],
            }],
        }
    }

    #[test]
    fn default_walltime_is_injected() {
        let req = normalize(&raw("resource_id=1"), &SchedulerConfig::default()).unwrap();
        assert_eq!(req.moldables[0].walltime, 7200);
        assert_eq!(req.queue, "default");
        assert_eq!(req.reservation, ReservationMode::None);
    }

    #[test]
    fn walltime_text_and_seconds() {
        let mut r = raw("resource_id=1");
        r.moldables[0].walltime = Some(RawWalltime::Text("1:30:00".to_string()));
        let req = normalize(&r, &SchedulerConfig::default()).unwrap();
        assert_eq!(req.moldables[0].walltime, 5400);

        r.moldables[0].walltime = Some(RawWalltime::Seconds(60));
        let req = normalize(&r, &SchedulerConfig::default()).unwrap();
        assert_eq!(req.moldables[0].walltime, 60);

        r.moldables[0].walltime = Some(RawWalltime::Seconds(0));
        assert!(normalize(&r, &SchedulerConfig::default()).is_err());
    }

    #[test]
    fn walltime_beyond_horizon_is_malformed() {
        let cfg = SchedulerConfig::default();
        let mut r = raw("resource_id=1");
        r.moldables[0].walltime = Some(RawWalltime::Seconds(i64::MAX));
        assert!(matches!(normalize(&r, &cfg), Err(SchedError::MalformedRequest(_))));

        r.moldables[0].walltime = Some(RawWalltime::Seconds(cfg.max_time));
        assert!(normalize(&r, &cfg).is_ok());

        r.reservation = Some(i64::MAX);
        assert!(matches!(normalize(&r, &cfg), Err(SchedError::MalformedRequest(_))));
    }

    #[test]
    fn parse_walltime_forms() {
        assert_eq!(parse_walltime("2").unwrap(), 7200);
        assert_eq!(parse_walltime("0:30").unwrap(), 1800);
        assert_eq!(parse_walltime("1:0:5").unwrap(), 3605);
        assert!(parse_walltime("1:x").is_err());
        assert!(parse_walltime("1:2:3:4").is_err());
        assert!(parse_walltime("-1").is_err());
        assert!(parse_walltime("9999999999999999").is_err());
        assert!(parse_walltime("1:9223372036854775807").is_err());
        assert_eq!(format_walltime(7200), "2:0:0");
        assert_eq!(format_walltime(3661), "1:1:1");
    }

    #[test]
    fn levels_resolve_aliases() {
        let cfg = SchedulerConfig::default();
        let levels = parse_levels("/nodes=2/core=4", &cfg).unwrap();
        assert_eq!(
            levels,
            vec![Level::new("network_address", 2), Level::new("core", 4)]
        );
        assert!(parse_levels("", &cfg).is_err());
        assert!(parse_levels("/core", &cfg).is_err());
        assert!(parse_levels("/core=0", &cfg).is_err());
        assert!(parse_levels("/core=x", &cfg).is_err());
    }

    #[test]
    fn missing_groups_or_moldables_are_malformed() {
        let mut r = raw("resource_id=1");
        r.moldables[0].groups.clear();
        assert!(matches!(
            normalize(&r, &SchedulerConfig::default()),
            Err(SchedError::MalformedRequest(_))
        ));

        r.moldables.clear();
        assert!(matches!(
            normalize(&r, &SchedulerConfig::default()),
            Err(SchedError::MalformedRequest(_))
        ));
    }

    #[test]
    fn unparsable_predicate_is_malformed() {
        let mut r = raw("resource_id=1");
        r.properties = Some("cpu = ".to_string());
        assert!(matches!(
            normalize(&r, &SchedulerConfig::default()),
            Err(SchedError::MalformedRequest(_))
        ));
    }

    #[test]
    fn properties_are_combined() {
        let mut r = raw("resource_id=1");
        r.properties = Some("cpu = 1".to_string());
        r.moldables[0].groups[0].property = Some("mem = 64".to_string());
        let cfg = SchedulerConfig::default().with_default_property("type = 'default'");
        let req = normalize(&r, &cfg).unwrap();
        assert_eq!(
            req.moldables[0].groups[0].predicate.to_string(),
            "((mem = 64 AND cpu = 1) AND type = 'default')"
        );
    }

    #[test]
    fn besteffort_and_queue_imply_each_other() {
        let mut r = raw("resource_id=1");
        r.types = vec!["besteffort".to_string()];
        let req = normalize(&r, &SchedulerConfig::default()).unwrap();
        assert_eq!(req.queue, "besteffort");

        let mut r = raw("resource_id=1");
        r.queue = Some("besteffort".to_string());
        let req = normalize(&r, &SchedulerConfig::default()).unwrap();
        assert!(req.types.besteffort);
    }

    #[test]
    fn besteffort_reservation_is_rejected() {
        let mut r = raw("resource_id=1");
        r.types = vec!["besteffort".to_string()];
        r.reservation = Some(1000);
        assert!(normalize(&r, &SchedulerConfig::default()).is_err());
    }

    #[test]
    fn reservation_is_to_schedule() {
        let mut r = raw("resource_id=1");
        r.reservation = Some(5000);
        let req = normalize(&r, &SchedulerConfig::default()).unwrap();
        assert_eq!(req.reservation, ReservationMode::ToSchedule);
        assert_eq!(req.reservation_start, Some(5000));
    }

    #[test]
    fn interactive_walltime_is_clamped() {
        let mut r = raw("resource_id=1");
        r.types = vec!["interactive".to_string()];
        r.moldables[0].walltime = Some(RawWalltime::Text("24:00:00".to_string()));
        let req = normalize(&r, &SchedulerConfig::default()).unwrap();
        assert_eq!(req.moldables[0].walltime, 43_200);
    }

    #[test]
    fn deploy_requires_whole_nodes() {
        let mut r = raw("/nodes=1/core=2");
        r.types = vec!["deploy".to_string()];
        let err = normalize(&r, &SchedulerConfig::default()).unwrap_err();
        assert!(err.to_string().contains("core resource is not allowed"));

        let mut r = raw("/nodes=2");
        r.types = vec!["deploy".to_string()];
        assert!(normalize(&r, &SchedulerConfig::default()).is_ok());
    }

    #[test]
    fn job_types_parsing() {
        let types = JobTypes::parse(&[
            "timesharing=user,*".to_string(),
            "container=inner1".to_string(),
        ])
        .unwrap();
        assert_eq!(types.timesharing, Some(SharingMode::SameUser));
        assert_eq!(types.container.as_deref(), Some("inner1"));

        let types = JobTypes::parse(&["container".to_string()]).unwrap();
        assert_eq!(types.container.as_deref(), Some(""));
        assert_eq!(types.labels(), vec!["container".to_string()]);
        let types = JobTypes::parse(&["inner=12".to_string()]).unwrap();
        assert_eq!(types.inner.as_deref(), Some("12"));
        assert!(JobTypes::parse(&["inner".to_string()]).is_err());
        assert!(JobTypes::parse(&["inner=".to_string()]).is_err());

        let t = |s: &str| JobTypes::parse(&[s.to_string()]).map(|t| t.timesharing);
        assert_eq!(t("timesharing=*,*").unwrap(), Some(SharingMode::Anyone));
        assert_eq!(t("timesharing=name,*").unwrap(), Some(SharingMode::SameName));
        assert_eq!(t("timesharing=name,user").unwrap(), Some(SharingMode::SameUserAndName));
        assert!(t("timesharing=user,user").is_err());
        assert!(t("timesharing=user").is_err());
        assert!(JobTypes::parse(&["bogus".to_string()]).is_err());
    }

    #[test]
    fn sharing_compatibility() {
        let key = |mode, user: &str, name: Option<&str>| SharingKey {
            mode,
            user: user.to_string(),
            name: name.map(str::to_string),
        };
        use SharingMode::*;
        assert!(key(Anyone, "a", None).compatible(&key(Anyone, "b", Some("x"))));
        assert!(key(SameUser, "a", Some("x")).compatible(&key(SameUser, "a", Some("y"))));
        assert!(!key(SameUser, "a", None).compatible(&key(SameUser, "b", None)));
        assert!(key(SameName, "a", Some("x")).compatible(&key(SameName, "b", Some("x"))));
        assert!(!key(SameName, "a", Some("x")).compatible(&key(SameName, "b", Some("y"))));
        assert!(key(SameUserAndName, "a", Some("x")).compatible(&key(Anyone, "a", Some("x"))));
        assert!(!key(Anyone, "a", None).compatible(&key(SameUser, "b", None)));
    }

    #[test]
    fn validate_rejects_broken_requests() {
        let max = SchedulerConfig::default().max_time;
        let ok = JobRequest::new(
            "bob",
            MoldableAlternative::new(60, vec![ResourceGroup::resources(1, Predicate::True)]),
        );
        assert!(ok.validate(max).is_ok());

        let mut bad = ok.clone();
        bad.moldables[0].walltime = 0;
        assert!(bad.validate(max).is_err());

        let mut bad = ok.clone();
        bad.moldables[0].walltime = i64::MAX;
        assert!(bad.validate(max).is_err());

        let mut bad = ok.clone();
        bad.reservation = ReservationMode::ToSchedule;
        assert!(bad.validate(max).is_err());

        let bad = ok.clone().reserved_at(-5);
        assert!(bad.validate(max).is_err());

        let mut bad = ok;
        bad.moldables[0].groups[0].levels.clear();
        assert!(bad.validate(max).is_err());
    }
}
