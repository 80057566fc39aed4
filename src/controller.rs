//! Per-image tier controller (C7): the state machine described in spec
//! §4.6. Split into `begin` (reach JUDGING, persist state, return) and
//! `resume` (continue from JUDGED), since the suspension crosses a process
//! boundary via the HTTP callback rather than being a long-lived
//! coroutine (spec §9 redesign flags).

use std::sync::Arc;
use uuid::Uuid;

use crate::errors::{ErrorCode, ResolveError};
use crate::image_resolver::ImageResolver;
use crate::judge::JudgeClient;
use crate::model::{ImageRef, JobEnvelope, PendingState, ResultError, ResultMeta, ImageResult};
use crate::ocr::{OcrMode, TierEngine};
use crate::state_store::ValidationStateStore;
use crate::text;
use crate::tiers::{Tier, TierRegistry};

pub struct Verdict {
    pub is_valid: bool,
    pub confidence: f64,
    pub reason: String,
}

pub enum StepOutcome {
    Suspended,
    Final(ImageResult),
}

#[derive(Clone, Copy)]
enum FailureKind {
    /// Every attempted tier either never got judged as valid (too-short
    /// output skipped the judge call) or was explicitly judged invalid.
    NoOutput,
    /// At least the last attempted tier's adapter, the state-store save,
    /// or the judge enqueue itself raised an error.
    EngineError,
}

impl FailureKind {
    fn code(self) -> ErrorCode {
        match self {
            FailureKind::NoOutput => ErrorCode::OcrNoValidOutput,
            FailureKind::EngineError => ErrorCode::OcrEngineError,
        }
    }
}

pub struct ControllerConfig {
    pub max_output_bytes: usize,
    pub min_valid_chars: usize,
    pub min_confidence_floor: Option<f64>,
    pub default_language: String,
    pub callback_url: String,
}

pub struct TierController {
    registry: Arc<TierRegistry>,
    resolver: Arc<dyn ImageResolver>,
    judge: Arc<dyn JudgeClient>,
    state_store: Arc<dyn ValidationStateStore>,
    config: ControllerConfig,
}

impl TierController {
    pub fn new(
        registry: Arc<TierRegistry>,
        resolver: Arc<dyn ImageResolver>,
        judge: Arc<dyn JudgeClient>,
        state_store: Arc<dyn ValidationStateStore>,
        config: ControllerConfig,
    ) -> Self {
        Self { registry, resolver, judge, state_store, config }
    }

    fn effective_language(&self, job: &JobEnvelope) -> String {
        job.payload
            .options
            .language
            .clone()
            .unwrap_or_else(|| self.config.default_language.clone())
    }

    fn find_image_ref(job: &JobEnvelope, image_index: i64) -> Option<&ImageRef> {
        job.payload.image_refs.iter().find(|r| r.index == image_index)
    }

    /// RESOLVING -> OCR_RUNNING -> JUDGING (suspend) | FINAL_FAIL.
    pub async fn begin(
        &self,
        job: &JobEnvelope,
        image_index: i64,
        tier_order: &[Tier],
        processed_results: Vec<ImageResult>,
    ) -> StepOutcome {
        let language = self.effective_language(job);

        let Some(image_ref) = Self::find_image_ref(job, image_index) else {
            return StepOutcome::Final(self.build_fail_result(
                image_index,
                "unknown",
                &language,
                ErrorCode::ImageNotFound,
            ));
        };

        let resolved = match self.resolver.resolve(image_ref).await {
            Ok(r) => r,
            Err(e) => {
                return StepOutcome::Final(self.build_fail_result(
                    image_index,
                    "unknown",
                    &language,
                    e.code(),
                ));
            }
        };

        self.run_tiers(
            job,
            image_index,
            &resolved.bytes,
            &language,
            tier_order,
            processed_results,
            FailureKind::NoOutput,
        )
        .await
    }

    /// JUDGED -> FINAL_OK | OCR_RUNNING(next tier) | FINAL_FAIL.
    pub async fn resume(&self, state: PendingState, verdict: Verdict) -> StepOutcome {
        let language = self.effective_language(&state.original_job);
        let floor_ok = self
            .config
            .min_confidence_floor
            .map_or(true, |floor| verdict.confidence >= floor);

        if verdict.is_valid && floor_ok {
            let (truncated, was_truncated) = text::truncate(&state.ocr_text, self.config.max_output_bytes);
            return StepOutcome::Final(ImageResult {
                index: state.image_index,
                ocr_text: truncated.clone(),
                truncated: was_truncated,
                meta: ResultMeta {
                    language,
                    confidence: verdict.confidence.clamp(0.0, 1.0),
                    text_len: truncated.len(),
                    is_valid: true,
                    tier: state.tier_name.as_str().to_string(),
                    validation_reason: Some(truncate_reason(&verdict.reason)),
                },
                error: None,
            });
        }

        if state.remaining_tiers.is_empty() {
            return StepOutcome::Final(self.build_judged_fail_result(&state, &verdict, &language));
        }

        // Re-resolve the image: the callback may land on a different
        // worker than the one that suspended the job (spec §9 open
        // question decision, recorded in DESIGN.md).
        let image_ref = match Self::find_image_ref(&state.original_job, state.image_index) {
            Some(r) => r,
            None => {
                return StepOutcome::Final(self.build_fail_result(
                    state.image_index,
                    state.tier_name.as_str(),
                    &language,
                    ErrorCode::ImageNotFound,
                ));
            }
        };
        let resolved = match self.resolver.resolve(image_ref).await {
            Ok(r) => r,
            Err(e) => {
                return StepOutcome::Final(self.build_fail_result(
                    state.image_index,
                    state.tier_name.as_str(),
                    &language,
                    e.code(),
                ));
            }
        };

        self.run_tiers(
            &state.original_job,
            state.image_index,
            &resolved.bytes,
            &language,
            &state.remaining_tiers,
            state.processed_results,
            FailureKind::NoOutput,
        )
        .await
    }

    /// Walk `tier_order` starting from its head, trying to reach a judge
    /// suspension. On exhaustion, returns FINAL_FAIL carrying whichever
    /// `FailureKind` best describes why nothing was produced.
    #[allow(clippy::too_many_arguments)]
    async fn run_tiers(
        &self,
        job: &JobEnvelope,
        image_index: i64,
        image_bytes: &[u8],
        language: &str,
        tier_order: &[Tier],
        processed_results: Vec<ImageResult>,
        mut failure_kind: FailureKind,
    ) -> StepOutcome {
        let mut last_tier: Option<Tier> = None;

        for (position, tier) in tier_order.iter().enumerate() {
            last_tier = Some(*tier);

            let Some(engine) = self.registry.get(*tier) else {
                failure_kind = FailureKind::EngineError;
                continue;
            };

            let output = match engine.process(image_bytes, std::slice::from_ref(&language.to_string()), OcrMode::Document).await {
                Ok(o) => o,
                Err(_) => {
                    failure_kind = FailureKind::EngineError;
                    continue;
                }
            };

            let normalized = text::normalize(&output.text);
            if normalized.chars().count() < self.config.min_valid_chars {
                failure_kind = FailureKind::NoOutput;
                continue;
            }

            let remaining: Vec<Tier> = tier_order[position + 1..].to_vec();
            let validation_job_id = format!("val-{}", Uuid::new_v4());
            let state = PendingState {
                original_job: job.clone(),
                image_index,
                tier_name: *tier,
                ocr_text: normalized,
                remaining_tiers: remaining,
                processed_results: processed_results.clone(),
                validation_job_id: validation_job_id.clone(),
                created_at: chrono::Utc::now(),
            };

            if self.state_store.save(&state).await.is_err() {
                failure_kind = FailureKind::EngineError;
                continue;
            }

            match self.judge.enqueue(&state, &self.config.callback_url).await {
                Ok(_) => return StepOutcome::Suspended,
                Err(_) => {
                    let _ = self.state_store.delete(&validation_job_id).await;
                    failure_kind = FailureKind::EngineError;
                    continue;
                }
            }
        }

        let tier_label = last_tier.map(|t| t.as_str().to_string()).unwrap_or_else(|| "unknown".to_string());
        StepOutcome::Final(self.build_fail_result(image_index, &tier_label, language, failure_kind.code()))
    }

    /// Tier exhaustion with no remaining tiers after a judge verdict: unlike
    /// `build_fail_result`, the OCR text, confidence, and judged reason are
    /// real and worth keeping on the result rather than discarding them.
    fn build_judged_fail_result(&self, state: &PendingState, verdict: &Verdict, language: &str) -> ImageResult {
        let (ocr_text, was_truncated) = text::truncate(&state.ocr_text, self.config.max_output_bytes);
        let reason = truncate_reason(&verdict.reason);
        ImageResult {
            index: state.image_index,
            ocr_text: ocr_text.clone(),
            truncated: was_truncated,
            meta: ResultMeta {
                language: language.to_string(),
                confidence: verdict.confidence.clamp(0.0, 1.0),
                text_len: ocr_text.len(),
                is_valid: false,
                tier: state.tier_name.as_str().to_string(),
                validation_reason: Some(reason.clone()),
            },
            error: Some(ResultError {
                code: ErrorCode::OcrNoValidOutput.as_str().to_string(),
                message: reason,
            }),
        }
    }

    fn build_fail_result(&self, image_index: i64, tier: &str, language: &str, code: ErrorCode) -> ImageResult {
        ImageResult {
            index: image_index,
            ocr_text: String::new(),
            truncated: false,
            meta: ResultMeta {
                language: language.to_string(),
                confidence: 0.0,
                text_len: 0,
                is_valid: false,
                tier: tier.to_string(),
                validation_reason: None,
            },
            error: Some(ResultError {
                code: code.as_str().to_string(),
                message: fail_message(code),
            }),
        }
    }
}

fn fail_message(code: ErrorCode) -> String {
    match code {
        ErrorCode::UnsupportedMedia => "image media type is not supported".to_string(),
        ErrorCode::ImageNotFound => "image could not be resolved".to_string(),
        ErrorCode::OcrEngineError => "an OCR tier failed to produce output".to_string(),
        ErrorCode::OcrNoValidOutput => "no enabled tier produced valid output".to_string(),
        other => other.as_str().to_string(),
    }
}

fn truncate_reason(reason: &str) -> String {
    let (t, _) = text::truncate_chars(reason, 200);
    t
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::TierEngineError;
    use crate::model::{ImageKind, Options, Payload, Trace};
    use crate::ocr::OcrOutput;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct ScriptedEngine {
        outputs: Mutex<Vec<Result<&'static str, ()>>>,
    }

    #[async_trait]
    impl TierEngine for ScriptedEngine {
        async fn is_available(&self) -> bool {
            true
        }
        async fn process(&self, _bytes: &[u8], _lang: &[String], _mode: OcrMode) -> Result<OcrOutput, TierEngineError> {
            let mut guard = self.outputs.lock().unwrap();
            match guard.remove(0) {
                Ok(text) => Ok(OcrOutput { text: text.to_string(), duration_ms: 1 }),
                Err(()) => Err(TierEngineError::Failed("boom".to_string())),
            }
        }
    }

    struct AlwaysResolves;
    #[async_trait]
    impl ImageResolver for AlwaysResolves {
        async fn resolve(&self, _r: &ImageRef) -> Result<crate::image_resolver::ResolvedImage, ResolveError> {
            Ok(crate::image_resolver::ResolvedImage { bytes: vec![1, 2, 3], media_type: "image/png".to_string() })
        }
    }

    struct RejectingJudge;
    #[async_trait]
    impl JudgeClient for RejectingJudge {
        async fn enqueue(&self, state: &PendingState, _cb: &str) -> Result<String, crate::errors::JudgeError> {
            Ok(state.validation_job_id.clone())
        }
    }

    struct InMemoryStateStore {
        saved: Mutex<Option<PendingState>>,
    }
    #[async_trait]
    impl ValidationStateStore for InMemoryStateStore {
        async fn save(&self, state: &PendingState) -> Result<(), crate::errors::StateStoreError> {
            *self.saved.lock().unwrap() = Some(state.clone());
            Ok(())
        }
        async fn get(&self, _id: &str) -> Result<Option<PendingState>, crate::errors::StateStoreError> {
            Ok(self.saved.lock().unwrap().clone())
        }
        async fn delete(&self, _id: &str) -> Result<(), crate::errors::StateStoreError> {
            *self.saved.lock().unwrap() = None;
            Ok(())
        }
    }

    fn job_with_one_image() -> JobEnvelope {
        JobEnvelope {
            schema_version: 1,
            job_id: "job-1".to_string(),
            workflow_id: "wf-1".to_string(),
            job_type: "ocr.extract_text.requested".to_string(),
            source: "caller".to_string(),
            target: "ocr".to_string(),
            created_at: "2026-01-01T00:00:00Z".to_string(),
            attempt: 1,
            reply_to: "q.out".to_string(),
            payload: Payload {
                image_refs: vec![ImageRef { kind: ImageKind::LocalPath, value: "a.png".to_string(), index: 0 }],
                image_count: Some(1),
                options: Options { language: Some("en".to_string()) },
            },
            trace: Trace { request_id: None, parent_job_id: None },
        }
    }

    fn controller_with(engine: Arc<dyn TierEngine>) -> TierController {
        let mut registry = TierRegistry::new();
        registry.register(Tier::Tesseract, engine);
        TierController::new(
            Arc::new(registry),
            Arc::new(AlwaysResolves),
            Arc::new(RejectingJudge),
            Arc::new(InMemoryStateStore { saved: Mutex::new(None) }),
            ControllerConfig {
                max_output_bytes: 51200,
                min_valid_chars: 3,
                min_confidence_floor: None,
                default_language: "en".to_string(),
                callback_url: "http://localhost/internal/validation/callback".to_string(),
            },
        )
    }

    #[tokio::test]
    async fn begin_suspends_on_successful_ocr() {
        let engine = Arc::new(ScriptedEngine { outputs: Mutex::new(vec![Ok("Hello World")]) });
        let controller = controller_with(engine);
        let outcome = controller.begin(&job_with_one_image(), 0, &[Tier::Tesseract], vec![]).await;
        assert!(matches!(outcome, StepOutcome::Suspended));
    }

    #[tokio::test]
    async fn begin_fails_with_ocr_engine_error_when_only_tier_throws() {
        let engine = Arc::new(ScriptedEngine { outputs: Mutex::new(vec![Err(())]) });
        let controller = controller_with(engine);
        let outcome = controller.begin(&job_with_one_image(), 0, &[Tier::Tesseract], vec![]).await;
        match outcome {
            StepOutcome::Final(result) => {
                assert_eq!(result.error.unwrap().code, "ocr_engine_error");
                assert_eq!(result.meta.tier, "tesseract");
            }
            _ => panic!("expected Final"),
        }
    }

    #[tokio::test]
    async fn resume_with_valid_verdict_produces_final_ok() {
        let engine = Arc::new(ScriptedEngine { outputs: Mutex::new(vec![]) });
        let controller = controller_with(engine);
        let state = PendingState {
            original_job: job_with_one_image(),
            image_index: 0,
            tier_name: Tier::Tesseract,
            ocr_text: "Hello World".to_string(),
            remaining_tiers: vec![],
            processed_results: vec![],
            validation_job_id: "val-1".to_string(),
            created_at: chrono::Utc::now(),
        };
        let outcome = controller
            .resume(state, Verdict { is_valid: true, confidence: 0.95, reason: "clear".to_string() })
            .await;
        match outcome {
            StepOutcome::Final(result) => {
                assert!(result.meta.is_valid);
                assert_eq!(result.meta.tier, "tesseract");
                assert_eq!(result.ocr_text, "Hello World");
                assert_eq!(result.meta.confidence, 0.95);
            }
            _ => panic!("expected Final"),
        }
    }

    #[tokio::test]
    async fn resume_with_invalid_verdict_and_no_remaining_tiers_exhausts() {
        let engine = Arc::new(ScriptedEngine { outputs: Mutex::new(vec![]) });
        let controller = controller_with(engine);
        let state = PendingState {
            original_job: job_with_one_image(),
            image_index: 0,
            tier_name: Tier::Tesseract,
            ocr_text: "xx##qq".to_string(),
            remaining_tiers: vec![],
            processed_results: vec![],
            validation_job_id: "val-1".to_string(),
            created_at: chrono::Utc::now(),
        };
        let outcome = controller
            .resume(state, Verdict { is_valid: false, confidence: 0.1, reason: "garbled".to_string() })
            .await;
        match outcome {
            StepOutcome::Final(result) => {
                assert_eq!(result.ocr_text, "xx##qq", "exhausted result must keep the real OCR text");
                assert_eq!(result.meta.confidence, 0.1, "exhausted result must keep the judged confidence");
                assert_eq!(result.meta.validation_reason.as_deref(), Some("garbled"));
                let error = result.error.unwrap();
                assert_eq!(error.code, "ocr_no_valid_output");
                assert_eq!(error.message, "garbled");
            }
            _ => panic!("expected Final"),
        }
    }

    #[tokio::test]
    async fn confidence_below_floor_is_treated_as_invalid() {
        let engine = Arc::new(ScriptedEngine { outputs: Mutex::new(vec![]) });
        let mut registry = TierRegistry::new();
        registry.register(Tier::Tesseract, engine);
        let controller = TierController::new(
            Arc::new(registry),
            Arc::new(AlwaysResolves),
            Arc::new(RejectingJudge),
            Arc::new(InMemoryStateStore { saved: Mutex::new(None) }),
            ControllerConfig {
                max_output_bytes: 51200,
                min_valid_chars: 3,
                min_confidence_floor: Some(0.5),
                default_language: "en".to_string(),
                callback_url: "http://localhost/internal/validation/callback".to_string(),
            },
        );
        let state = PendingState {
            original_job: job_with_one_image(),
            image_index: 0,
            tier_name: Tier::Tesseract,
            ocr_text: "maybe text".to_string(),
            remaining_tiers: vec![],
            processed_results: vec![],
            validation_job_id: "val-1".to_string(),
            created_at: chrono::Utc::now(),
        };
        let outcome = controller
            .resume(state, Verdict { is_valid: true, confidence: 0.2, reason: "low conf".to_string() })
            .await;
        match outcome {
            StepOutcome::Final(result) => assert!(!result.meta.is_valid),
            _ => panic!("expected Final"),
        }
    }
}
