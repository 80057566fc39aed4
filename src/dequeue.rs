//! Blocking-pop dequeue loop (C9): the worker's inbound side, running on
//! the main tokio runtime alongside the HTTP callback server (spec §5 —
//! only OCR engine calls get a dedicated blocking thread, not this loop).

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, warn};

use crate::errors::QueueError;
use crate::orchestrator::Orchestrator;
use crate::queue::JobQueue;

pub const DEFAULT_POLL_TIMEOUT_SECS: u64 = 5;

pub struct DequeueLoop {
    queue: Arc<dyn JobQueue>,
    inbound_queue: String,
    orchestrator: Arc<Orchestrator>,
    poll_timeout_secs: u64,
}

impl DequeueLoop {
    pub fn new(queue: Arc<dyn JobQueue>, inbound_queue: impl Into<String>, orchestrator: Arc<Orchestrator>) -> Self {
        Self {
            queue,
            inbound_queue: inbound_queue.into(),
            orchestrator,
            poll_timeout_secs: DEFAULT_POLL_TIMEOUT_SECS,
        }
    }

    /// Runs until `shutdown` resolves. Each popped message is handed to the
    /// orchestrator on its own spawned task so a slow job (an image stuck
    /// mid-resolve) never blocks the next pop.
    pub async fn run(self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return;
                    }
                }
                popped = self.queue.dequeue(&self.inbound_queue, self.poll_timeout_secs) => {
                    match popped {
                        Ok(Some(raw)) => {
                            let orchestrator = self.orchestrator.clone();
                            tokio::spawn(async move {
                                orchestrator.process_inbound(raw).await;
                            });
                        }
                        Ok(None) => {
                            // Timed out with nothing queued; poll again.
                        }
                        Err(QueueError::Decode(reason)) => {
                            log_decode_failure(&reason);
                        }
                        Err(e @ QueueError::Backend(_)) => {
                            error!(error = %e, queue = %self.inbound_queue, "dequeue failed, backing off");
                            tokio::time::sleep(Duration::from_secs(1)).await;
                        }
                    }
                }
            }
        }
    }
}

/// Logs and drops a message whose bytes never decoded as JSON at all —
/// distinct from a structurally-invalid-but-parseable envelope, which the
/// orchestrator turns into a best-effort completion instead (spec §4.9).
pub fn log_decode_failure(reason: &str) {
    warn!(reason, "dropped a message that was not valid JSON");
}
