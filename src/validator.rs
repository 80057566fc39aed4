//! Envelope validator (C6): a pure structural check of an inbound job
//! envelope against the v1 schema (spec §4.1).
//!
//! Validation works against the raw `serde_json::Value` rather than
//! `JobEnvelope` directly so that malformed `kind` strings and missing
//! fields are reported as `ValidationError` rather than surfacing as a
//! generic serde deserialization failure — the caller needs a
//! human-readable `reason` either way.

use serde_json::Value;

use crate::errors::ValidationError;
use crate::model::{ImageKind, ImageRef, JobEnvelope, Options, Payload, Trace, JOB_TYPE_REQUEST, SCHEMA_VERSION};

const MAX_IMAGES: usize = 8;

fn err(reason: impl Into<String>) -> ValidationError {
    ValidationError::new(reason)
}

/// Validate and normalize an inbound envelope. On success returns the
/// strongly-typed `JobEnvelope` with `image_count` filled in when it was
/// absent from the input (the only mutation the validator performs).
pub fn validate(raw: &Value) -> Result<JobEnvelope, ValidationError> {
    let obj = raw.as_object().ok_or_else(|| err("envelope must be a JSON object"))?;

    let schema_version = obj
        .get("schema_version")
        .and_then(Value::as_u64)
        .ok_or_else(|| err("schema_version is required and must be an integer"))?;
    if schema_version != SCHEMA_VERSION as u64 {
        return Err(err(format!("unsupported schema_version: {schema_version}")));
    }

    let job_id = required_string(obj, "job_id")?;
    let workflow_id = required_string(obj, "workflow_id")?;
    let job_type = required_string(obj, "job_type")?;
    if job_type != JOB_TYPE_REQUEST {
        return Err(err(format!("unexpected job_type: {job_type}")));
    }
    let source = required_string(obj, "source")?;
    let target = required_string(obj, "target")?;
    let created_at = required_string(obj, "created_at")?;
    chrono::DateTime::parse_from_rfc3339(&created_at)
        .map_err(|_| err(format!("created_at is not a valid ISO-8601 timestamp: {created_at}")))?;

    let attempt = obj
        .get("attempt")
        .and_then(Value::as_i64)
        .ok_or_else(|| err("attempt is required and must be an integer"))?;
    if attempt < 1 {
        return Err(err("attempt must be >= 1"));
    }

    let reply_to = required_string(obj, "reply_to")?;
    if reply_to.is_empty() {
        return Err(err("reply_to must be non-empty"));
    }

    let payload_value = obj.get("payload").ok_or_else(|| err("payload is required"))?;
    let payload = validate_payload(payload_value)?;

    let trace_value = obj.get("trace").ok_or_else(|| err("trace is required"))?;
    let trace = validate_trace(trace_value)?;

    Ok(JobEnvelope {
        schema_version: SCHEMA_VERSION,
        job_id,
        workflow_id,
        job_type,
        source,
        target,
        created_at,
        attempt,
        reply_to,
        payload,
        trace,
    })
}

fn required_string(obj: &serde_json::Map<String, Value>, field: &str) -> Result<String, ValidationError> {
    obj.get(field)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| err(format!("{field} is required and must be a string")))
}

fn validate_trace(value: &Value) -> Result<Trace, ValidationError> {
    let obj = value.as_object().ok_or_else(|| err("trace must be an object"))?;
    if !obj.contains_key("request_id") {
        return Err(err("trace.request_id is required"));
    }
    if !obj.contains_key("parent_job_id") {
        return Err(err("trace.parent_job_id is required"));
    }
    Ok(Trace {
        request_id: obj.get("request_id").and_then(Value::as_str).map(str::to_string),
        parent_job_id: obj.get("parent_job_id").and_then(Value::as_str).map(str::to_string),
    })
}

fn validate_payload(value: &Value) -> Result<Payload, ValidationError> {
    let obj = value.as_object().ok_or_else(|| err("payload must be an object"))?;

    let image_refs_value = obj
        .get("image_refs")
        .and_then(Value::as_array)
        .ok_or_else(|| err("payload.image_refs is required and must be an array"))?;

    if image_refs_value.is_empty() || image_refs_value.len() > MAX_IMAGES {
        return Err(err(format!(
            "payload.image_refs must contain between 1 and {MAX_IMAGES} entries, got {}",
            image_refs_value.len()
        )));
    }

    let mut image_refs = Vec::with_capacity(image_refs_value.len());
    let mut seen_indices = std::collections::HashSet::new();
    for (position, raw_ref) in image_refs_value.iter().enumerate() {
        let image_ref = validate_image_ref(raw_ref, position)?;
        if !seen_indices.insert(image_ref.index) {
            return Err(err(format!("duplicate image index: {}", image_ref.index)));
        }
        image_refs.push(image_ref);
    }

    let image_count = obj.get("image_count").and_then(Value::as_i64);
    let image_count = match image_count {
        Some(declared) => {
            if declared != image_refs.len() as i64 {
                return Err(err(format!(
                    "image_count ({declared}) does not match image_refs length ({})",
                    image_refs.len()
                )));
            }
            Some(declared)
        }
        None => Some(image_refs.len() as i64),
    };

    let options = match obj.get("options") {
        Some(options_value) => validate_options(options_value)?,
        None => Options::default(),
    };

    Ok(Payload {
        image_refs,
        image_count,
        options,
    })
}

fn validate_image_ref(value: &Value, position: usize) -> Result<ImageRef, ValidationError> {
    let obj = value
        .as_object()
        .ok_or_else(|| err(format!("image_refs[{position}] must be an object")))?;

    let kind_str = obj
        .get("kind")
        .and_then(Value::as_str)
        .ok_or_else(|| err(format!("image_refs[{position}].kind is required")))?;
    let kind = match kind_str {
        "local_path" => ImageKind::LocalPath,
        "s3" => ImageKind::S3,
        "minio" => ImageKind::Minio,
        "db" => ImageKind::Db,
        other => return Err(err(format!("image_refs[{position}].kind is unknown: {other}"))),
    };

    let value_str = obj
        .get("value")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| err(format!("image_refs[{position}].value is required")))?;

    let index = obj
        .get("index")
        .and_then(Value::as_i64)
        .ok_or_else(|| err(format!("image_refs[{position}].index is required and must be an integer")))?;
    if index < 0 {
        return Err(err(format!("image_refs[{position}].index must be >= 0")));
    }

    Ok(ImageRef {
        kind,
        value: value_str,
        index,
    })
}

fn validate_options(value: &Value) -> Result<Options, ValidationError> {
    let obj = value.as_object().ok_or_else(|| err("payload.options must be an object"))?;
    let language = match obj.get("language") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        Some(Value::String(_)) => return Err(err("payload.options.language must be non-empty when present")),
        Some(_) => return Err(err("payload.options.language must be a string")),
    };
    Ok(Options { language })
}
