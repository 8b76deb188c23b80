use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch, RwLock};
use tokio_util::sync::CancellationToken;

use crate::config::RuntimeConfig;
use crate::error::{Result, SchedError};
use crate::request::JobRequest;
use crate::scheduler::{JobId, Scheduler};

pub use crate::scheduler::ExternalEvent;

/// Source of "now", in seconds since epoch.
pub type Clock = Arc<dyn Fn() -> i64 + Send + Sync>;

pub fn system_clock() -> Clock {
    Arc::new(|| chrono::Utc::now().timestamp())
}

/// Messages queued for the node loop. They are applied between passes.
#[derive(Debug)]
pub enum NodeMessage {
    Submit {
        request: JobRequest,
        response_tx: oneshot::Sender<Result<JobId>>,
    },
    Event(ExternalEvent),
}

/// Serialized scheduling loop around one [`Scheduler`].
///
/// Exactly one task mutates the scheduler. Submissions and collaborator
/// events arrive on a channel and are applied before the next pass, never
/// in the middle of one.
pub struct Node {
    scheduler: Arc<RwLock<Scheduler>>,
    config: RuntimeConfig,
    clock: Clock,
    message_rx: mpsc::Receiver<NodeMessage>,
    passes_tx: watch::Sender<u64>,
}

/// Cheap, cloneable access to a running [`Node`].
#[derive(Clone)]
pub struct NodeHandle {
    scheduler: Arc<RwLock<Scheduler>>,
    message_tx: mpsc::Sender<NodeMessage>,
    passes_rx: watch::Receiver<u64>,
}

impl Node {
    pub fn new(scheduler: Scheduler, config: RuntimeConfig) -> (Self, NodeHandle) {
        let (message_tx, message_rx) = mpsc::channel(config.event_capacity);
        let (passes_tx, passes_rx) = watch::channel(0);
        let scheduler = Arc::new(RwLock::new(scheduler));

        let handle = NodeHandle {
            scheduler: scheduler.clone(),
            message_tx,
            passes_rx,
        };
        let node = Self {
            scheduler,
            config,
            clock: system_clock(),
            message_rx,
            passes_tx,
        };
        (node, handle)
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Run passes every `pass_interval_ms` until `shutdown` is cancelled.
    ///
    /// # Errors
    ///
    /// Returns the error of a pass that left the Gantt table and the job
    /// store out of sync. Any other failure is logged and the loop goes on.
    pub async fn run(mut self, shutdown: CancellationToken) -> Result<()> {
        let mut interval =
            tokio::time::interval(Duration::from_millis(self.config.pass_interval_ms.max(1)));
        let mut passes: u64 = 0;

        tracing::info!(interval_ms = self.config.pass_interval_ms, "Node loop started");
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!(passes, "Node loop shutting down");
                    break;
                }

                Some(message) = self.message_rx.recv() => {
                    let now = (self.clock)();
                    let mut scheduler = self.scheduler.write().await;
                    Self::handle_message(&mut scheduler, message, now);
                }

                _ = interval.tick() => {
                    let now = (self.clock)();
                    let mut scheduler = self.scheduler.write().await;
                    // anything queued while we waited for the lock goes first
                    while let Ok(message) = self.message_rx.try_recv() {
                        Self::handle_message(&mut scheduler, message, now);
                    }

                    match scheduler.run_pass(now) {
                        Ok(report) => {
                            tracing::debug!(
                                now,
                                launched = report.launched.len(),
                                "Pass finished"
                            );
                        }
                        Err(e) if e.is_fatal() => {
                            tracing::error!(error = %e, "Scheduling pass failed, stopping node");
                            return Err(e);
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "Scheduling pass failed");
                        }
                    }
                    passes += 1;
                    self.passes_tx.send_replace(passes);
                }
            }
        }
        Ok(())
    }

    fn handle_message(scheduler: &mut Scheduler, message: NodeMessage, now: i64) {
        match message {
            NodeMessage::Submit {
                request,
                response_tx,
            } => {
                let result = scheduler.submit(request, now);
                if let Err(e) = &result {
                    tracing::warn!(error = %e, "Submission refused");
                }
                // the submitter may have gone away; the job stays queued
                let _ = response_tx.send(result);
            }
            NodeMessage::Event(event) => {
                if let Err(e) = scheduler.apply(event.clone(), now) {
                    tracing::warn!(error = %e, ?event, "External event refused");
                }
            }
        }
    }
}

impl NodeHandle {
    /// Submit a normalized request and wait for its job id.
    pub async fn submit(&self, request: JobRequest) -> Result<JobId> {
        let (response_tx, response_rx) = oneshot::channel();
        self.message_tx
            .send(NodeMessage::Submit {
                request,
                response_tx,
            })
            .await
            .map_err(|_| SchedError::Internal("node loop is not running".to_string()))?;
        response_rx
            .await
            .map_err(|_| SchedError::Internal("node loop dropped the submission".to_string()))?
    }

    /// Queue a collaborator event for the next pass boundary.
    pub async fn send(&self, event: ExternalEvent) -> Result<()> {
        self.message_tx
            .send(NodeMessage::Event(event))
            .await
            .map_err(|_| SchedError::Internal("node loop is not running".to_string()))
    }

    pub fn scheduler(&self) -> Arc<RwLock<Scheduler>> {
        self.scheduler.clone()
    }

    /// Number of passes completed so far.
    pub fn passes(&self) -> u64 {
        *self.passes_rx.borrow()
    }

    /// Wait until at least `count` passes have completed.
    pub async fn wait_for_passes(&self, count: u64) -> Result<()> {
        let mut rx = self.passes_rx.clone();
        rx.wait_for(|n| *n >= count)
            .await
            .map_err(|_| SchedError::Internal("node loop stopped".to_string()))?;
        Ok(())
    }
}
