//! Completion emitter (C5): shapes the terminal envelope and publishes it
//! to the caller-chosen reply queue (spec §4.8). The dispatcher rule for
//! `jarvis.recipes.jobs` lives in `queue::RedisJobQueue::publish` — the
//! emitter only needs to push to the front of the named queue either way.

use tracing::{error, info};

use crate::model::{
    now_iso8601, CompletionEnvelope, CompletionPayload, CompletionStatus, ImageResult, JobEnvelope, Trace,
    TopLevelError, JOB_TYPE_COMPLETED,
};
use crate::queue::JobQueue;

pub const SERVICE_NAME: &str = "jarvis-ocr-worker";

/// Build a completion envelope from the inbound job and the accumulated
/// per-image results, applying the ordering and status rules of spec §3.
pub fn build_completion(
    inbound: &JobEnvelope,
    mut results: Vec<ImageResult>,
    job_level_error: Option<TopLevelError>,
) -> CompletionEnvelope {
    results.sort_by_key(|r| r.index);

    let any_valid = results.iter().any(ImageResult::is_valid);
    let status = if any_valid { CompletionStatus::Success } else { CompletionStatus::Failed };

    let error = match (&status, job_level_error) {
        (CompletionStatus::Success, _) => TopLevelError::default(),
        (CompletionStatus::Failed, Some(e)) => e,
        (CompletionStatus::Failed, None) => TopLevelError::default(),
    };

    CompletionEnvelope {
        schema_version: inbound.schema_version,
        job_id: CompletionEnvelope::new_id(),
        workflow_id: inbound.workflow_id.clone(),
        job_type: JOB_TYPE_COMPLETED.to_string(),
        source: SERVICE_NAME.to_string(),
        target: inbound.source.clone(),
        created_at: now_iso8601(),
        attempt: 1,
        reply_to: None,
        payload: CompletionPayload {
            status,
            results,
            artifact_ref: None,
            error,
        },
        trace: Trace {
            request_id: inbound.trace.request_id.clone(),
            parent_job_id: Some(inbound.job_id.clone()),
        },
    }
}

/// Publish a completion to `reply_to`. Returns `false` (without retrying)
/// on publish failure, matching spec §4.8 — the caller treats that as
/// non-recoverable for this job.
pub async fn emit(queue: &dyn JobQueue, reply_to: &str, completion: &CompletionEnvelope) -> bool {
    let value = match serde_json::to_value(completion) {
        Ok(v) => v,
        Err(e) => {
            error!(error = %e, "failed to serialize completion envelope");
            return false;
        }
    };

    match queue.publish(reply_to, &value, false).await {
        Ok(()) => {
            info!(
                job_id = %completion.job_id,
                workflow_id = %completion.workflow_id,
                status = ?completion.payload.status,
                reply_to,
                "published completion envelope"
            );
            true
        }
        Err(e) => {
            error!(error = %e, reply_to, job_id = %completion.job_id, "failed to publish completion envelope");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ImageKind, ImageRef, Options, Payload, ResultMeta};

    fn inbound() -> JobEnvelope {
        JobEnvelope {
            schema_version: 1,
            job_id: "job-1".to_string(),
            workflow_id: "wf-1".to_string(),
            job_type: "ocr.extract_text.requested".to_string(),
            source: "caller".to_string(),
            target: "ocr".to_string(),
            created_at: now_iso8601(),
            attempt: 1,
            reply_to: "q.out".to_string(),
            payload: Payload {
                image_refs: vec![ImageRef { kind: ImageKind::LocalPath, value: "a.png".to_string(), index: 0 }],
                image_count: Some(1),
                options: Options { language: Some("en".to_string()) },
            },
            trace: Trace { request_id: Some("r-1".to_string()), parent_job_id: None },
        }
    }

    fn result(index: i64, is_valid: bool) -> ImageResult {
        ImageResult {
            index,
            ocr_text: "hi".to_string(),
            truncated: false,
            meta: ResultMeta {
                language: "en".to_string(),
                confidence: 0.9,
                text_len: 2,
                is_valid,
                tier: "tesseract".to_string(),
                validation_reason: Some("ok".to_string()),
            },
            error: None,
        }
    }

    #[test]
    fn success_requires_at_least_one_valid_result() {
        let completion = build_completion(&inbound(), vec![result(0, false), result(1, true)], None);
        assert_eq!(completion.payload.status, CompletionStatus::Success);
        assert_eq!(completion.payload.error.code, None);
    }

    #[test]
    fn results_are_sorted_by_index() {
        let completion = build_completion(&inbound(), vec![result(2, true), result(0, false), result(1, true)], None);
        let indices: Vec<i64> = completion.payload.results.iter().map(|r| r.index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
    }

    #[test]
    fn trace_parent_job_id_is_inbound_job_id() {
        let completion = build_completion(&inbound(), vec![result(0, true)], None);
        assert_eq!(completion.trace.parent_job_id, Some("job-1".to_string()));
        assert_ne!(completion.job_id, "job-1");
    }

    #[test]
    fn failed_without_results_carries_job_level_error() {
        let err = TopLevelError { message: Some("boom".to_string()), code: Some("internal_error".to_string()) };
        let completion = build_completion(&inbound(), vec![], Some(err.clone()));
        assert_eq!(completion.payload.status, CompletionStatus::Failed);
        assert_eq!(completion.payload.error.code, err.code);
    }
}
