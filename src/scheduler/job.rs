use std::fmt;

use serde::{Deserialize, Serialize};

use crate::request::{format_walltime, JobRequest, ReservationMode};

pub type JobId = u64;
pub type MoldableId = u64;

/// Job lifecycle.
///
/// ```text
/// Waiting -> toLaunch -> Launching -> Running -> Finishing -> Terminated
/// Waiting -> toAckReservation -> Waiting
/// {Waiting, toAckReservation, toLaunch, Launching, Running, Finishing} -> toError -> Error
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum JobState {
    Waiting,
    #[serde(rename = "toAckReservation")]
    ToAckReservation,
    #[serde(rename = "toLaunch")]
    ToLaunch,
    Launching,
    Running,
    Finishing,
    Terminated,
    #[serde(rename = "toError")]
    ToError,
    Error,
}

impl JobState {
    pub const ALL: [JobState; 9] = [
        JobState::Waiting,
        JobState::ToAckReservation,
        JobState::ToLaunch,
        JobState::Launching,
        JobState::Running,
        JobState::Finishing,
        JobState::Terminated,
        JobState::ToError,
        JobState::Error,
    ];

    pub fn can_transition_to(self, to: JobState) -> bool {
        use JobState::*;
        matches!(
            (self, to),
            (Waiting, ToLaunch)
                | (Waiting, ToAckReservation)
                | (ToAckReservation, Waiting)
                | (ToLaunch, Launching)
                | (Launching, Running)
                | (Running, Finishing)
                | (Finishing, Terminated)
                | (Waiting, ToError)
                | (ToAckReservation, ToError)
                | (ToLaunch, ToError)
                | (Launching, ToError)
                | (Running, ToError)
                | (Finishing, ToError)
                | (ToError, Error)
        )
    }

    pub fn successors(self) -> Vec<JobState> {
        Self::ALL
            .into_iter()
            .filter(|to| self.can_transition_to(*to))
            .collect()
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Terminated | JobState::Error)
    }

    /// States in which the job holds, or is about to hold, its resources.
    pub fn is_launched(self) -> bool {
        matches!(
            self,
            JobState::ToLaunch | JobState::Launching | JobState::Running | JobState::Finishing
        )
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobState::Waiting => "Waiting",
            JobState::ToAckReservation => "toAckReservation",
            JobState::ToLaunch => "toLaunch",
            JobState::Launching => "Launching",
            JobState::Running => "Running",
            JobState::Finishing => "Finishing",
            JobState::Terminated => "Terminated",
            JobState::ToError => "toError",
            JobState::Error => "Error",
        };
        f.write_str(s)
    }
}

/// One closed or open interval of a job's state history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateLogEntry {
    pub job_id: JobId,
    pub state: JobState,
    pub date_start: i64,
    /// `None` while the interval is still open
    pub date_stop: Option<i64>,
}

impl StateLogEntry {
    pub fn is_open(&self) -> bool {
        self.date_stop.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub request: JobRequest,
    /// One id per moldable alternative, in request order
    pub moldable_ids: Vec<MoldableId>,
    pub state: JobState,
    pub reservation: ReservationMode,
    pub queue_priority: u32,
    pub submission_time: i64,
    /// Start of the committed Gantt entry, or the requested start of a
    /// reservation; 0 while unknown
    pub start_time: i64,
    /// 0 until the job reaches a terminal state
    pub stop_time: i64,
    /// 0 until scheduled
    pub assigned_moldable: MoldableId,
    /// Reported by the launcher when the job ends on its own
    pub exit_code: Option<i32>,
    pub message: String,
}

impl Job {
    pub fn new(
        id: JobId,
        request: JobRequest,
        moldable_ids: Vec<MoldableId>,
        queue_priority: u32,
        submission_time: i64,
    ) -> Self {
        Self {
            id,
            reservation: request.reservation,
            start_time: request.reservation_start.unwrap_or(0),
            request,
            moldable_ids,
            state: JobState::Waiting,
            queue_priority,
            submission_time,
            stop_time: 0,
            assigned_moldable: 0,
            exit_code: None,
            message: String::new(),
        }
    }

    pub fn is_reservation(&self) -> bool {
        self.reservation != ReservationMode::None
    }

    pub fn is_besteffort(&self) -> bool {
        self.request.types.besteffort
    }

    pub fn has_assignment(&self) -> bool {
        self.assigned_moldable != 0
    }

    /// Name of the slot set this job opens for inner jobs, if it is a
    /// container. An unnamed container is named after its job id.
    pub fn container_name(&self) -> Option<String> {
        self.request.types.container.as_ref().map(|name| {
            if name.is_empty() {
                self.id.to_string()
            } else {
                name.clone()
            }
        })
    }

    /// Index of `moldable_id` within this job's alternatives.
    pub fn moldable_index(&self, moldable_id: MoldableId) -> Option<usize> {
        self.moldable_ids.iter().position(|m| *m == moldable_id)
    }

    /// Summary of the last scheduling decision, e.g. `R=4,W=2:0:0,J=B,Q=default`.
    pub fn describe(&self, resources: usize, walltime: i64) -> String {
        let kind = if self.is_reservation() {
            "R"
        } else if self.request.types.interactive {
            "I"
        } else {
            "B"
        };
        let mut message = format!(
            "R={},W={},J={},Q={}",
            resources,
            format_walltime(walltime),
            kind,
            self.request.queue
        );
        let labels = self.request.types.labels();
        if !labels.is_empty() {
            message.push_str(",T=");
            message.push_str(&labels.join("|"));
        }
        message
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::{JobTypes, MoldableAlternative, ResourceGroup};
    use crate::resource::Predicate;

    fn request() -> JobRequest {
        JobRequest::new(
            "alice",
            MoldableAlternative::new(3600, vec![ResourceGroup::resources(1, Predicate::True)]),
        )
    }

    #[test]
    fn job_creation() {
        let job = Job::new(1, request(), vec![10], 2, 100);
        assert_eq!(job.state, JobState::Waiting);
        assert_eq!(job.start_time, 0);
        assert_eq!(job.stop_time, 0);
        assert_eq!(job.assigned_moldable, 0);
        assert!(!job.is_reservation());
        assert_eq!(job.moldable_index(10), Some(0));
        assert_eq!(job.moldable_index(11), None);
    }

    #[test]
    fn reservation_start_is_copied() {
        let job = Job::new(1, request().reserved_at(5000), vec![1], 2, 100);
        assert_eq!(job.start_time, 5000);
        assert_eq!(job.reservation, ReservationMode::ToSchedule);
    }

    #[test]
    fn container_names() {
        let mut req = request();
        assert_eq!(Job::new(1, req.clone(), vec![1], 2, 0).container_name(), None);
        req.types.container = Some(String::new());
        assert_eq!(Job::new(7, req.clone(), vec![1], 2, 0).container_name().as_deref(), Some("7"));
        req.types.container = Some("box".to_string());
        assert_eq!(Job::new(7, req, vec![1], 2, 0).container_name().as_deref(), Some("box"));
    }

    #[test]
    fn forward_path_is_allowed() {
        use JobState::*;
        let path = [Waiting, ToLaunch, Launching, Running, Finishing, Terminated];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
        assert!(Waiting.can_transition_to(ToAckReservation));
        assert!(ToAckReservation.can_transition_to(Waiting));
    }

    #[test]
    fn no_going_back() {
        use JobState::*;
        assert!(!Running.can_transition_to(Waiting));
        assert!(!ToLaunch.can_transition_to(Waiting));
        assert!(!Finishing.can_transition_to(Running));
        assert!(!Waiting.can_transition_to(Running));
        assert!(!Waiting.can_transition_to(Error));
    }

    #[test]
    fn error_path_from_every_active_state() {
        use JobState::*;
        for s in [Waiting, ToAckReservation, ToLaunch, Launching, Running, Finishing] {
            assert!(s.can_transition_to(ToError), "{s}");
        }
        assert_eq!(ToError.successors(), vec![Error]);
    }

    #[test]
    fn terminal_states_have_no_successors() {
        for s in JobState::ALL {
            assert_eq!(s.is_terminal(), s.successors().is_empty(), "{s}");
        }
    }

    #[test]
    fn message_format() {
        let mut req = request();
        let job = Job::new(1, req.clone(), vec![1], 2, 0);
        assert_eq!(job.describe(4, 7200), "R=4,W=2:0:0,J=B,Q=default");

        req.types = JobTypes {
            interactive: true,
            ..Default::default()
        };
        let job = Job::new(2, req.clone(), vec![2], 2, 0);
        assert_eq!(job.describe(1, 90), "R=1,W=0:1:30,J=I,Q=default,T=interactive");

        let job = Job::new(3, req.reserved_at(10), vec![3], 2, 0);
        assert!(job.describe(1, 60).contains("J=R"));
    }

    #[test]
    fn display_uses_lifecycle_names() {
        assert_eq!(JobState::ToAckReservation.to_string(), "toAckReservation");
        assert_eq!(JobState::ToLaunch.to_string(), "toLaunch");
        assert_eq!(
            serde_json::to_string(&JobState::ToError).unwrap(),
            "\"toError\""
        );
    }
}
