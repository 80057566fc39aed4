//! End-to-end state-machine scenarios driven entirely through in-memory
//! fakes, matching the worked examples in spec §8.

use std::sync::Arc;

use jarvis_ocr_worker::controller::{ControllerConfig, TierController, Verdict};
use jarvis_ocr_worker::model::{
    now_iso8601, CompletionStatus, ImageKind, ImageRef, JobEnvelope, Options, Payload, Trace, JOB_TYPE_REQUEST,
};
use jarvis_ocr_worker::orchestrator::Orchestrator;
use jarvis_ocr_worker::state_store::ValidationStateStore;
use jarvis_ocr_worker::testutil::{FakeImageResolver, FakeQueue, FakeStateStore, RecordingJudgeClient, ScriptedTierEngine};
use jarvis_ocr_worker::tiers::{Tier, TierRegistry};

fn job(image_refs: Vec<ImageRef>, reply_to: &str) -> JobEnvelope {
    JobEnvelope {
        schema_version: 1,
        job_id: "job-1".to_string(),
        workflow_id: "wf-1".to_string(),
        job_type: JOB_TYPE_REQUEST.to_string(),
        source: "caller".to_string(),
        target: "ocr".to_string(),
        created_at: now_iso8601(),
        attempt: 1,
        reply_to: reply_to.to_string(),
        payload: Payload { image_count: Some(image_refs.len() as i64), image_refs, options: Options::default() },
        trace: Trace::default(),
    }
}

fn image_ref(value: &str, index: i64) -> ImageRef {
    ImageRef { kind: ImageKind::LocalPath, value: value.to_string(), index }
}

struct Harness {
    orchestrator: Orchestrator,
    queue: Arc<FakeQueue>,
    state_store: Arc<FakeStateStore>,
    judge: Arc<RecordingJudgeClient>,
}

fn harness(tiers: Vec<(Tier, ScriptedTierEngine)>, resolver: FakeImageResolver, min_valid_chars: usize) -> Harness {
    let mut registry = TierRegistry::new();
    let mut order = Vec::new();
    for (tier, engine) in tiers {
        registry.register(tier, Arc::new(engine));
        order.push(tier);
    }

    let queue = Arc::new(FakeQueue::new());
    let state_store = Arc::new(FakeStateStore::new());
    let judge = Arc::new(RecordingJudgeClient::new());

    let controller = Arc::new(TierController::new(
        Arc::new(registry),
        Arc::new(resolver),
        judge.clone(),
        state_store.clone(),
        ControllerConfig {
            max_output_bytes: 51200,
            min_valid_chars,
            min_confidence_floor: None,
            default_language: "en".to_string(),
            callback_url: "http://localhost/internal/validation/callback".to_string(),
        },
    ));

    let orchestrator = Orchestrator::new(controller, queue.clone(), "jarvis.ocr.jobs", order, 3);
    Harness { orchestrator, queue, state_store, judge }
}

#[tokio::test]
async fn s3_single_image_all_tiers_exhausted_yields_no_valid_output_and_no_retry() {
    let resolver = FakeImageResolver::new();
    resolver.put("a.png", b"bytes".to_vec());
    let harness = harness(vec![(Tier::Tesseract, ScriptedTierEngine::new([Ok("##".to_string())]))], resolver, 3);

    harness.orchestrator.start_job(job(vec![image_ref("a.png", 0)], "q.out")).await;

    let published = harness.queue.drain("q.out");
    assert_eq!(published.len(), 1);
    assert_eq!(published[0]["payload"]["status"], "failed");
    assert_eq!(published[0]["payload"]["results"][0]["error"]["code"], "ocr_no_valid_output");
    assert_eq!(published[0]["payload"]["error"]["code"], serde_json::Value::Null);
    assert!(harness.queue.drain("jarvis.ocr.jobs").is_empty(), "ocr_no_valid_output is non-retryable");
}

#[tokio::test]
async fn s4_pdf_is_rejected_as_unsupported_media_without_retry() {
    let resolver = FakeImageResolver::new();
    let harness = harness(vec![(Tier::Tesseract, ScriptedTierEngine::new([]))], resolver, 3);

    harness.orchestrator.start_job(job(vec![image_ref("doc.pdf", 0)], "q.out")).await;

    let published = harness.queue.drain("q.out");
    assert_eq!(published[0]["payload"]["status"], "failed");
    assert_eq!(published[0]["payload"]["results"][0]["error"]["code"], "unsupported_media");
    assert!(harness.queue.drain("jarvis.ocr.jobs").is_empty());
}

#[tokio::test]
async fn s6_sole_tier_adapter_failure_is_per_image_and_does_not_retry() {
    // A tier exhaustion for one image is a per-image failure; it never
    // promotes to a job-level error or triggers a retry requeue, even when
    // it is the only (and first) image in the job.
    let resolver = FakeImageResolver::new();
    resolver.put("a.png", b"bytes".to_vec());
    let harness = harness(
        vec![(Tier::Tesseract, ScriptedTierEngine::new([Err("io error".to_string())]))],
        resolver,
        3,
    );

    harness.orchestrator.start_job(job(vec![image_ref("a.png", 0)], "q.out")).await;

    let published = harness.queue.drain("q.out");
    assert_eq!(published.len(), 1);
    assert_eq!(published[0]["payload"]["status"], "failed");
    assert_eq!(published[0]["payload"]["results"].as_array().unwrap().len(), 1, "per-image failure still carries a result");
    assert_eq!(published[0]["payload"]["results"][0]["error"]["code"], "ocr_engine_error");
    assert_eq!(published[0]["payload"]["error"]["code"], serde_json::Value::Null, "no job-level error");

    assert!(harness.queue.drain("jarvis.ocr.jobs").is_empty(), "no retry without a job-level retryable error");
}

#[tokio::test]
async fn s5_one_image_valid_one_exhausted_yields_success_with_both_results() {
    let resolver = FakeImageResolver::new();
    resolver.put("a.png", b"good".to_vec());
    resolver.put("b.png", b"bad".to_vec());
    let harness = harness(
        vec![(Tier::Tesseract, ScriptedTierEngine::new([Ok("valid text here".to_string()), Ok("##".to_string())]))],
        resolver,
        3,
    );

    harness
        .orchestrator
        .start_job(job(vec![image_ref("a.png", 0), image_ref("b.png", 1)], "q.out"))
        .await;

    // Image 0 suspends waiting on a judge verdict.
    assert!(harness.queue.drain("q.out").is_empty());
    let validation_job_id = harness.judge.enqueued.lock().unwrap()[0].validation_job_id.clone();
    let state = harness.state_store.get(&validation_job_id).await.unwrap().expect("state saved");
    harness
        .orchestrator
        .resume(state, Verdict { is_valid: true, confidence: 0.9, reason: "clear".to_string() })
        .await;

    // Image 0 is now final; image 1 runs next and exhausts its only tier.
    let published = harness.queue.drain("q.out");
    assert_eq!(published.len(), 1);
    assert_eq!(published[0]["payload"]["status"], "success", "one valid image is enough for overall success");
    let results = published[0]["payload"]["results"].as_array().unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0]["index"], 0);
    assert_eq!(results[0]["meta"]["is_valid"], true);
    assert_eq!(results[1]["index"], 1);
    assert_eq!(results[1]["error"]["code"], "ocr_no_valid_output");
}

#[tokio::test]
async fn p9_images_process_in_ascending_index_order_regardless_of_input_order() {
    let resolver = FakeImageResolver::new();
    resolver.put("b.png", b"second".to_vec());
    resolver.put("a.png", b"first".to_vec());
    let harness = harness(
        vec![(
            Tier::Tesseract,
            ScriptedTierEngine::new([Ok("first content".to_string()), Ok("second content".to_string())]),
        )],
        resolver,
        3,
    );

    // image_refs given out of order: index 1 before index 0.
    harness
        .orchestrator
        .start_job(job(vec![image_ref("b.png", 1), image_ref("a.png", 0)], "q.out"))
        .await;

    // Both images suspend waiting on a judge verdict; nothing published yet.
    assert!(harness.queue.drain("q.out").is_empty());
    assert_eq!(harness.state_store.len(), 1, "only the first image (index 0) reaches JUDGING at a time");
}

#[tokio::test]
async fn p5_confidence_is_clamped_into_zero_to_one() {
    let resolver = FakeImageResolver::new();
    resolver.put("a.png", b"bytes".to_vec());
    let harness = harness(
        vec![(Tier::Tesseract, ScriptedTierEngine::new([Ok("valid looking text".to_string())]))],
        resolver,
        3,
    );

    harness.orchestrator.start_job(job(vec![image_ref("a.png", 0)], "q.out")).await;
    assert_eq!(harness.state_store.len(), 1);

    // Drive the resume path directly with an already-clamped verdict — the
    // clamp itself is exercised at the HTTP callback layer (see
    // tests/callback_route.rs); here we confirm the controller/orchestrator
    // pipeline reports a boundary value unchanged.
    let validation_job_id = harness.judge.enqueued.lock().unwrap()[0].validation_job_id.clone();
    let state = harness.state_store.get(&validation_job_id).await.unwrap().expect("state saved");
    harness
        .orchestrator
        .resume(state, Verdict { is_valid: true, confidence: 1.0, reason: "clear".to_string() })
        .await;

    let published = harness.queue.drain("q.out");
    assert_eq!(published[0]["payload"]["results"][0]["meta"]["confidence"], 1.0);
    assert_eq!(published[0]["payload"]["status"], "success");
}
