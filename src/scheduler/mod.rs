pub mod assigner;
pub mod job;
pub mod matcher;
pub mod policy;
pub mod queue;

pub use assigner::{ExternalEvent, PassReport, Scheduler};
pub use job::{Job, JobId, JobState, MoldableId, StateLogEntry};
pub use matcher::{Placement, Snapshot};
pub use policy::{KillBesteffort, NoPreemption, PreemptionPolicy};
pub use queue::JobStore;
