//! Validation callback handler (C10): the HTTP half of the suspend/resume
//! protocol, invoked by the external LLM gateway once a judge request
//! completes (spec §4.10).

use axum::extract::State;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::warn;

use crate::controller::Verdict;
use crate::errors::ApiError;
use crate::text;
use crate::AppState;

#[derive(Deserialize)]
struct VerdictContent {
    is_valid: bool,
    confidence: f64,
    reason: String,
}

/// `POST /internal/validation/callback`. Steps numbered per spec §4.10;
/// 2 (fetch) and 4 (delete) must bracket verdict parsing as shown there.
pub async fn handle(State(app): State<AppState>, Json(body): Json<Value>) -> Result<Json<Value>, ApiError> {
    let validation_state_key = body
        .get("metadata")
        .and_then(|m| m.get("validation_state_key"))
        .and_then(Value::as_str)
        .ok_or_else(|| ApiError::BadRequest("metadata.validation_state_key is required".to_string()))?
        .to_string();

    let state = app
        .state_store
        .get(&validation_state_key)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .ok_or_else(|| ApiError::NotFound(format!("no pending validation for {validation_state_key}")))?;

    let verdict = parse_verdict(&body);

    app.state_store
        .delete(&validation_state_key)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    app.orchestrator.resume(state, verdict).await;

    Ok(Json(json!({"status": "ok", "processed": true})))
}

fn parse_verdict(body: &Value) -> Verdict {
    if body.get("status").and_then(Value::as_str) == Some("failed") {
        let message = body.get("error").and_then(|e| e.get("message")).and_then(Value::as_str).unwrap_or("");
        let (reason, _) = text::truncate_chars(message, 200);
        return Verdict { is_valid: false, confidence: 0.0, reason };
    }

    let Some(content) = body.get("result").and_then(|r| r.get("content")).and_then(Value::as_str) else {
        warn!("validation callback succeeded status but result.content was missing");
        return parse_failure();
    };

    match serde_json::from_str::<VerdictContent>(content) {
        Ok(parsed) => {
            let (reason, _) = text::truncate_chars(&parsed.reason, 200);
            Verdict {
                is_valid: parsed.is_valid,
                confidence: parsed.confidence.clamp(0.0, 1.0),
                reason,
            }
        }
        Err(e) => {
            warn!(error = %e, "validation callback result.content was not the expected JSON shape");
            parse_failure()
        }
    }
}

fn parse_failure() -> Verdict {
    Verdict { is_valid: false, confidence: 0.0, reason: "parse failure: result.content was not valid JSON".to_string() }
}
