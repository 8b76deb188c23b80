//! Append-only record of scheduling decisions.
//!
//! Every state transition and every accept/reject/error decision is pushed
//! here and mirrored to `tracing`, so the same history is available to an
//! embedding program and to whoever reads the logs.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::scheduler::job::JobId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    StateChange,
    Scheduled,
    ReservationValidated,
    ReservationRejected,
    #[serde(rename = "RESERVATION_NO_NODE")]
    ReservationNoResource,
    ReduceReservationWalltime,
    Walltime,
    FragJobRequest,
    BesteffortKill,
    ExternalError,
    ResourceState,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::StateChange => "STATE_CHANGE",
            EventKind::Scheduled => "SCHEDULED",
            EventKind::ReservationValidated => "RESERVATION_VALIDATED",
            EventKind::ReservationRejected => "RESERVATION_REJECTED",
            EventKind::ReservationNoResource => "RESERVATION_NO_NODE",
            EventKind::ReduceReservationWalltime => "REDUCE_RESERVATION_WALLTIME",
            EventKind::Walltime => "WALLTIME",
            EventKind::FragJobRequest => "FRAG_JOB_REQUEST",
            EventKind::BesteffortKill => "BESTEFFORT_KILL",
            EventKind::ExternalError => "EXTERNAL_ERROR",
            EventKind::ResourceState => "RESOURCE_STATE",
        }
    }

    fn is_error(&self) -> bool {
        matches!(
            self,
            EventKind::ReservationRejected | EventKind::ExternalError
        )
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub kind: EventKind,
    /// 0 for events that concern no job
    pub job_id: JobId,
    pub date: i64,
    pub description: String,
}

#[derive(Debug, Default, Clone)]
pub struct EventLog {
    events: Vec<Event>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, kind: EventKind, job_id: JobId, date: i64, description: impl Into<String>) {
        let description = description.into();
        if kind.is_error() {
            tracing::warn!(kind = %kind, job_id, date, "{}", description);
        } else {
            tracing::info!(kind = %kind, job_id, date, "{}", description);
        }
        self.events.push(Event {
            kind,
            job_id,
            date,
            description,
        });
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn for_job(&self, job_id: JobId) -> Vec<&Event> {
        self.events.iter().filter(|e| e.job_id == job_id).collect()
    }

    pub fn of_kind(&self, kind: EventKind) -> Vec<&Event> {
        self.events.iter().filter(|e| e.kind == kind).collect()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_and_filter() {
        let mut log = EventLog::new();
        log.push(EventKind::Scheduled, 1, 10, "R=1,W=0:1:0,J=B,Q=default");
        log.push(EventKind::StateChange, 1, 20, "Waiting -> toLaunch");
        log.push(EventKind::Walltime, 2, 30, "walltime exceeded");

        assert_eq!(log.len(), 3);
        assert_eq!(log.for_job(1).len(), 2);
        assert_eq!(log.of_kind(EventKind::Walltime)[0].job_id, 2);
    }

    #[test]
    fn kinds_serialize_as_screaming_snake() {
        assert_eq!(
            serde_json::to_string(&EventKind::FragJobRequest).unwrap(),
            "\"FRAG_JOB_REQUEST\""
        );
        assert_eq!(EventKind::ReservationNoResource.to_string(), "RESERVATION_NO_NODE");
    }
}
