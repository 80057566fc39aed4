//! Per-job orchestration (C8): drives the image-at-a-time sequence through
//! the tier controller and owns the retry policy. A tier exhaustion on one
//! image is always a per-image failure (spec §4.7); every image in the job
//! is attempted regardless of earlier failures, and the only source of a
//! job-level error is a malformed envelope rejected before it ever becomes
//! a job (`reject_envelope`). Entered both from the dequeue loop (a freshly
//! popped job) and from the validation callback (resuming a suspended
//! image) — both paths converge on `continue_from`.

use std::sync::Arc;

use serde_json::Value;
use tracing::{error, info};

use crate::controller::{StepOutcome, TierController, Verdict};
use crate::emitter;
use crate::errors::{ErrorCode, ValidationError};
use crate::model::{
    now_iso8601, CompletionStatus, ImageResult, JobEnvelope, Options, Payload, PendingState, TopLevelError, Trace,
    JOB_TYPE_REQUEST, SCHEMA_VERSION,
};
use crate::queue::JobQueue;
use crate::tiers::Tier;
use crate::validator;

pub struct Orchestrator {
    controller: Arc<TierController>,
    queue: Arc<dyn JobQueue>,
    inbound_queue: String,
    tier_order: Vec<Tier>,
    max_retry_attempts: i64,
}

impl Orchestrator {
    pub fn new(
        controller: Arc<TierController>,
        queue: Arc<dyn JobQueue>,
        inbound_queue: impl Into<String>,
        tier_order: Vec<Tier>,
        max_retry_attempts: i64,
    ) -> Self {
        Self {
            controller,
            queue,
            inbound_queue: inbound_queue.into(),
            tier_order,
            max_retry_attempts,
        }
    }

    /// Entry point for a freshly dequeued raw message (spec §4.9). Handles
    /// both the structural-validation failure path and the happy path.
    pub async fn process_inbound(&self, raw: Value) {
        match validator::validate(&raw) {
            Ok(job) => self.start_job(job).await,
            Err(e) => self.reject_envelope(&raw, &e).await,
        }
    }

    pub async fn start_job(&self, job: JobEnvelope) {
        let order = image_order(&job);
        self.continue_from(job, Vec::new(), 0, order).await;
    }

    /// Entry point for the validation callback (C10), resuming the image
    /// that was suspended at JUDGING.
    pub async fn resume(&self, state: PendingState, verdict: Verdict) {
        let job = state.original_job.clone();
        let image_index = state.image_index;
        let mut processed_results = state.processed_results.clone();
        let order = image_order(&job);

        match self.controller.resume(state, verdict).await {
            StepOutcome::Suspended => {}
            StepOutcome::Final(result) => {
                processed_results.push(result);
                let next_pos = order.iter().position(|&i| i == image_index).map(|p| p + 1).unwrap_or(order.len());
                self.continue_from(job, processed_results, next_pos, order).await;
            }
        }
    }

    /// Process images `order[next_pos..]` in order, stopping early only on
    /// suspension. A tier exhaustion for one image is a per-image failure;
    /// every other image in the job still runs (spec §4.7).
    async fn continue_from(&self, job: JobEnvelope, mut processed_results: Vec<ImageResult>, mut next_pos: usize, order: Vec<i64>) {
        while next_pos < order.len() {
            let image_index = order[next_pos];
            match self.controller.begin(&job, image_index, &self.tier_order, processed_results.clone()).await {
                StepOutcome::Suspended => return,
                StepOutcome::Final(result) => {
                    processed_results.push(result);
                    next_pos += 1;
                }
            }
        }

        self.finish_job(&job, processed_results, None).await;
    }

    async fn finish_job(&self, job: &JobEnvelope, results: Vec<ImageResult>, job_level_error: Option<TopLevelError>) {
        let completion = emitter::build_completion(job, results, job_level_error);
        emitter::emit(self.queue.as_ref(), &job.reply_to, &completion).await;

        if completion.payload.status != CompletionStatus::Failed {
            return;
        }

        let retryable = completion
            .payload
            .error
            .code
            .as_deref()
            .and_then(ErrorCode::from_str)
            .map(|code| code.retryable())
            .unwrap_or(false);

        if retryable && job.attempt < self.max_retry_attempts {
            self.requeue(job).await;
        }
    }

    async fn requeue(&self, job: &JobEnvelope) {
        let mut next = job.clone();
        next.attempt += 1;

        let value = match serde_json::to_value(&next) {
            Ok(v) => v,
            Err(e) => {
                error!(error = %e, job_id = %job.job_id, "failed to serialize job for retry");
                return;
            }
        };

        match self.queue.publish(&self.inbound_queue, &value, true).await {
            Ok(()) => info!(job_id = %job.job_id, attempt = next.attempt, "requeued job for retry"),
            Err(e) => error!(error = %e, job_id = %job.job_id, "failed to requeue job for retry"),
        }
    }

    /// Best-effort job-level failure for an envelope that never became a
    /// `JobEnvelope` (spec §4.9). Drops the message entirely when no
    /// `reply_to` can be recovered — there is nowhere to send a completion.
    async fn reject_envelope(&self, raw: &Value, validation_error: &ValidationError) {
        let Some(reply_to) = raw.get("reply_to").and_then(Value::as_str).map(str::to_string) else {
            error!(reason = %validation_error.reason, "rejected envelope has no reply_to, dropping");
            return;
        };

        let stub = JobEnvelope {
            schema_version: SCHEMA_VERSION,
            job_id: raw.get("job_id").and_then(Value::as_str).unwrap_or("unknown").to_string(),
            workflow_id: raw.get("workflow_id").and_then(Value::as_str).unwrap_or("unknown").to_string(),
            job_type: JOB_TYPE_REQUEST.to_string(),
            source: raw.get("source").and_then(Value::as_str).unwrap_or("unknown").to_string(),
            target: raw.get("target").and_then(Value::as_str).unwrap_or("ocr").to_string(),
            created_at: now_iso8601(),
            attempt: 1,
            reply_to,
            payload: Payload { image_refs: Vec::new(), image_count: Some(0), options: Options::default() },
            trace: Trace {
                request_id: raw.get("trace").and_then(|t| t.get("request_id")).and_then(Value::as_str).map(str::to_string),
                parent_job_id: None,
            },
        };

        let job_level_error = Some(TopLevelError {
            message: Some(validation_error.reason.clone()),
            code: Some(ErrorCode::SchemaInvalid.as_str().to_string()),
        });
        let completion = emitter::build_completion(&stub, Vec::new(), job_level_error);
        emitter::emit(self.queue.as_ref(), &stub.reply_to, &completion).await;
        // schema_invalid is non-retryable, so no requeue follows.
    }
}

fn image_order(job: &JobEnvelope) -> Vec<i64> {
    let mut indices: Vec<i64> = job.payload.image_refs.iter().map(|r| r.index).collect();
    indices.sort_unstable();
    indices
}
