use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde_json::json;
use thiserror::Error;

/// Common trait for the service's error types, following the same shape
/// as readur's `AppError`: an HTTP status, a user-facing message, and a
/// stable machine-readable code.
pub trait AppError: std::error::Error + Send + Sync + 'static {
    fn status_code(&self) -> StatusCode;
    fn user_message(&self) -> String;
    fn error_code(&self) -> &'static str;
}

macro_rules! impl_into_response {
    ($error_type:ty) => {
        impl IntoResponse for $error_type {
            fn into_response(self) -> Response {
                let status = self.status_code();
                let body = Json(json!({
                    "error": self.user_message(),
                    "code": self.error_code(),
                    "status": status.as_u16(),
                }));
                (status, body).into_response()
            }
        }
    };
}

/// The stable error-code taxonomy exposed in completion envelopes (spec §7).
///
/// `retryable()` backs the retry policy in the orchestrator (spec §4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    BadRequest,
    SchemaInvalid,
    ImageNotFound,
    UnsupportedMedia,
    OcrEngineError,
    FileReadError,
    RedisError,
    InternalError,
    OcrNoValidOutput,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::BadRequest => "bad_request",
            ErrorCode::SchemaInvalid => "schema_invalid",
            ErrorCode::ImageNotFound => "image_not_found",
            ErrorCode::UnsupportedMedia => "unsupported_media",
            ErrorCode::OcrEngineError => "ocr_engine_error",
            ErrorCode::FileReadError => "file_read_error",
            ErrorCode::RedisError => "redis_error",
            ErrorCode::InternalError => "internal_error",
            ErrorCode::OcrNoValidOutput => "ocr_no_valid_output",
        }
    }

    pub fn from_str(s: &str) -> Option<ErrorCode> {
        match s {
            "bad_request" => Some(ErrorCode::BadRequest),
            "schema_invalid" => Some(ErrorCode::SchemaInvalid),
            "image_not_found" => Some(ErrorCode::ImageNotFound),
            "unsupported_media" => Some(ErrorCode::UnsupportedMedia),
            "ocr_engine_error" => Some(ErrorCode::OcrEngineError),
            "file_read_error" => Some(ErrorCode::FileReadError),
            "redis_error" => Some(ErrorCode::RedisError),
            "internal_error" => Some(ErrorCode::InternalError),
            "ocr_no_valid_output" => Some(ErrorCode::OcrNoValidOutput),
            _ => None,
        }
    }

    pub fn retryable(&self) -> bool {
        matches!(
            self,
            ErrorCode::OcrEngineError
                | ErrorCode::FileReadError
                | ErrorCode::RedisError
                | ErrorCode::InternalError
        )
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors surfaced while resolving an image reference (C2).
#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("image not found: {0}")]
    NotFound(String),
    #[error("access denied: {0}")]
    AccessDenied(String),
    #[error("unsupported media: {0}")]
    UnsupportedMedia(String),
    #[error("transport error: {0}")]
    TransportError(String),
    #[error("unknown image kind: {0}")]
    UnknownKind(String),
}

impl ResolveError {
    pub fn code(&self) -> ErrorCode {
        match self {
            ResolveError::NotFound(_) | ResolveError::AccessDenied(_) => ErrorCode::ImageNotFound,
            ResolveError::UnsupportedMedia(_) => ErrorCode::UnsupportedMedia,
            ResolveError::TransportError(_) => ErrorCode::FileReadError,
            ResolveError::UnknownKind(_) => ErrorCode::BadRequest,
        }
    }
}

/// Errors surfaced by a tier's OCR engine adapter (C1).
#[derive(Error, Debug)]
pub enum TierEngineError {
    #[error("engine unavailable: {0}")]
    Unavailable(String),
    #[error("engine failed: {0}")]
    Failed(String),
    #[error("engine timed out after {0}s")]
    Timeout(u64),
}

/// Errors surfaced by the judge client (C3).
#[derive(Error, Debug)]
pub enum JudgeError {
    #[error("gateway request failed: {0}")]
    Http(String),
    #[error("gateway request timed out")]
    Timeout,
}

/// Errors surfaced by the validation state store (C4).
#[derive(Error, Debug)]
pub enum StateStoreError {
    #[error("state store unavailable: {0}")]
    Backend(String),
}

/// Errors surfaced by the job queue (C9/C5 publish path).
#[derive(Error, Debug)]
pub enum QueueError {
    #[error("queue backend error: {0}")]
    Backend(String),
    #[error("envelope was not valid JSON: {0}")]
    Decode(String),
}

/// Envelope structural-validation failure (C6).
#[derive(Error, Debug, Clone)]
#[error("invalid envelope: {reason}")]
pub struct ValidationError {
    pub reason: String,
}

impl ValidationError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self { reason: reason.into() }
    }
}

/// Generic API error for the callback HTTP surface (C10).
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn user_message(&self) -> String {
        match self {
            ApiError::BadRequest(m) => m.clone(),
            ApiError::NotFound(m) => m.clone(),
            ApiError::Internal(_) => "An internal error occurred".to_string(),
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "BAD_REQUEST",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl_into_response!(ApiError);
