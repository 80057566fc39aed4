//! In-memory fakes for the five external collaborators, so the state
//! machine and orchestration policy can be exercised without live Redis or
//! HTTP (spec §8's testable properties, A5 in SPEC_FULL.md).

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use crate::errors::{JudgeError, QueueError, ResolveError, StateStoreError, TierEngineError};
use crate::image_resolver::{ImageResolver, ResolvedImage};
use crate::judge::JudgeClient;
use crate::model::{ImageRef, PendingState};
use crate::ocr::{OcrMode, OcrOutput, TierEngine};
use crate::queue::JobQueue;
use crate::state_store::ValidationStateStore;

/// A named, in-process message queue mirroring `RedisJobQueue`'s mapping:
/// `dequeue` pops from the tail (as `BRPOP` would), `publish` inserts at
/// the head by default (`LPUSH`) or at the tail when `to_back` (`RPUSH`).
#[derive(Default)]
pub struct FakeQueue {
    queues: Mutex<HashMap<String, VecDeque<Value>>>,
}

impl FakeQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn drain(&self, queue: &str) -> Vec<Value> {
        self.queues.lock().unwrap().remove(queue).map(Vec::from).unwrap_or_default()
    }
}

#[async_trait]
impl JobQueue for FakeQueue {
    async fn dequeue(&self, queue: &str, _timeout_secs: u64) -> Result<Option<Value>, QueueError> {
        Ok(self.queues.lock().unwrap().get_mut(queue).and_then(VecDeque::pop_back))
    }

    async fn publish(&self, queue: &str, message: &Value, to_back: bool) -> Result<(), QueueError> {
        let mut queues = self.queues.lock().unwrap();
        let deque = queues.entry(queue.to_string()).or_default();
        if to_back {
            deque.push_back(message.clone());
        } else {
            deque.push_front(message.clone());
        }
        Ok(())
    }
}

/// A `validation_job_id -> PendingState` map with no TTL enforcement
/// (tests assert GC behavior by calling `delete` explicitly).
#[derive(Default)]
pub struct FakeStateStore {
    rows: Mutex<HashMap<String, PendingState>>,
}

impl FakeStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.lock().unwrap().len()
    }
}

#[async_trait]
impl ValidationStateStore for FakeStateStore {
    async fn save(&self, state: &PendingState) -> Result<(), StateStoreError> {
        self.rows.lock().unwrap().insert(state.validation_job_id.clone(), state.clone());
        Ok(())
    }

    async fn get(&self, validation_job_id: &str) -> Result<Option<PendingState>, StateStoreError> {
        Ok(self.rows.lock().unwrap().get(validation_job_id).cloned())
    }

    async fn delete(&self, validation_job_id: &str) -> Result<(), StateStoreError> {
        self.rows.lock().unwrap().remove(validation_job_id);
        Ok(())
    }
}

/// A judge client that records every enqueued state and always succeeds.
/// Tests drive the callback path separately by calling the orchestrator's
/// `resume` directly with a scripted verdict.
#[derive(Default)]
pub struct RecordingJudgeClient {
    pub enqueued: Mutex<Vec<PendingState>>,
}

impl RecordingJudgeClient {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JudgeClient for RecordingJudgeClient {
    async fn enqueue(&self, state: &PendingState, _callback_url: &str) -> Result<String, JudgeError> {
        self.enqueued.lock().unwrap().push(state.clone());
        Ok(state.validation_job_id.clone())
    }
}

/// An image resolver backed by an in-memory `value -> bytes` map.
#[derive(Default)]
pub struct FakeImageResolver {
    images: Mutex<HashMap<String, Vec<u8>>>,
}

impl FakeImageResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, value: impl Into<String>, bytes: impl Into<Vec<u8>>) {
        self.images.lock().unwrap().insert(value.into(), bytes.into());
    }
}

#[async_trait]
impl ImageResolver for FakeImageResolver {
    async fn resolve(&self, image_ref: &ImageRef) -> Result<ResolvedImage, ResolveError> {
        if image_ref.value.to_lowercase().ends_with(".pdf") {
            return Err(ResolveError::UnsupportedMedia(image_ref.value.clone()));
        }
        self.images
            .lock()
            .unwrap()
            .get(&image_ref.value)
            .cloned()
            .map(|bytes| ResolvedImage { bytes, media_type: "image/png".to_string() })
            .ok_or_else(|| ResolveError::NotFound(image_ref.value.clone()))
    }
}

/// A scripted tier engine: returns the next entry in its queue each call,
/// erroring once the script is exhausted.
pub struct ScriptedTierEngine {
    script: Mutex<VecDeque<Result<String, String>>>,
}

impl ScriptedTierEngine {
    pub fn new(outputs: impl IntoIterator<Item = Result<String, String>>) -> Self {
        Self { script: Mutex::new(outputs.into_iter().collect()) }
    }
}

#[async_trait]
impl TierEngine for ScriptedTierEngine {
    async fn is_available(&self) -> bool {
        true
    }

    async fn process(&self, _bytes: &[u8], _language_hints: &[String], _mode: OcrMode) -> Result<OcrOutput, TierEngineError> {
        match self.script.lock().unwrap().pop_front() {
            Some(Ok(text)) => Ok(OcrOutput { text, duration_ms: 0 }),
            Some(Err(message)) => Err(TierEngineError::Failed(message)),
            None => Err(TierEngineError::Unavailable("script exhausted".to_string())),
        }
    }
}
