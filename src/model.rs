//! Job/completion envelope schema v1 and the per-image result and pending
//! state records (spec §3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::tiers::Tier;

pub const SCHEMA_VERSION: u32 = 1;
pub const JOB_TYPE_REQUEST: &str = "ocr.extract_text.requested";
pub const JOB_TYPE_COMPLETED: &str = "ocr.completed";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ImageKind {
    LocalPath,
    S3,
    Minio,
    Db,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageRef {
    pub kind: ImageKind,
    pub value: String,
    pub index: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Options {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payload {
    pub image_refs: Vec<ImageRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_count: Option<i64>,
    #[serde(default)]
    pub options: Options,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Trace {
    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(default)]
    pub parent_job_id: Option<String>,
}

/// Inbound job envelope (schema v1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobEnvelope {
    pub schema_version: u32,
    pub job_id: String,
    pub workflow_id: String,
    pub job_type: String,
    pub source: String,
    pub target: String,
    pub created_at: String,
    pub attempt: i64,
    pub reply_to: String,
    pub payload: Payload,
    pub trace: Trace,
}

/// Per-image `meta` block of a completion result record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultMeta {
    pub language: String,
    pub confidence: f64,
    pub text_len: usize,
    pub is_valid: bool,
    pub tier: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultError {
    pub code: String,
    pub message: String,
}

/// One image's finalized result in a completion envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageResult {
    pub index: i64,
    pub ocr_text: String,
    pub truncated: bool,
    pub meta: ResultMeta,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ResultError>,
}

impl ImageResult {
    pub fn is_valid(&self) -> bool {
        self.meta.is_valid
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CompletionStatus {
    Success,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TopLevelError {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionPayload {
    pub status: CompletionStatus,
    pub results: Vec<ImageResult>,
    pub artifact_ref: Option<String>,
    pub error: TopLevelError,
}

/// Outbound completion envelope published to `reply_to`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionEnvelope {
    pub schema_version: u32,
    pub job_id: String,
    pub workflow_id: String,
    pub job_type: String,
    pub source: String,
    pub target: String,
    pub created_at: String,
    pub attempt: i64,
    pub reply_to: Option<String>,
    pub payload: CompletionPayload,
    pub trace: Trace,
}

impl CompletionEnvelope {
    pub fn new_id() -> String {
        Uuid::new_v4().to_string()
    }
}

/// Per-image state persisted while a judge verdict is outstanding (C4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingState {
    pub original_job: JobEnvelope,
    pub image_index: i64,
    pub tier_name: Tier,
    pub ocr_text: String,
    pub remaining_tiers: Vec<Tier>,
    pub processed_results: Vec<ImageResult>,
    pub validation_job_id: String,
    pub created_at: DateTime<Utc>,
}

pub fn now_iso8601() -> String {
    Utc::now().to_rfc3339()
}
