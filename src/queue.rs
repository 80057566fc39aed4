//! Redis-backed job queue (C9 dequeue source, C5 publish sink).
//!
//! Grounded on `original_source/app/queue_client.py` for the blocking-pop
//! and dispatcher semantics, and on
//! `examples/monokrome-foiacquire/src/rate_limit/redis.rs` for idiomatic
//! use of `redis::aio::ConnectionManager` in this corpus (readur itself
//! has no Redis usage to draw from).

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde_json::{json, Value};

use crate::errors::QueueError;

/// The one reply queue that gets the downstream job-framework's
/// named-function-call wrapper instead of a raw JSON push (spec §4.8).
pub const DISPATCHER_QUEUE: &str = "jarvis.recipes.jobs";
const DISPATCHER_FUNCTION: &str = "jarvis_recipes.app.services.queue_worker.process_job";
const DISPATCHER_TIMEOUT: &str = "10m";
const COMPLETED_JOB_TYPE: &str = "ocr.completed";

#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Blocking pop from the front of `queue`, bounded by `timeout_secs`.
    /// Returns `None` on timeout (queue empty).
    async fn dequeue(&self, queue: &str, timeout_secs: u64) -> Result<Option<Value>, QueueError>;

    /// Push `message` onto `queue`. `to_back` selects RPUSH (retries) over
    /// the default LPUSH (front, for completions) — spec §6. Completion
    /// envelopes addressed to `DISPATCHER_QUEUE` are framed specially
    /// regardless of `to_back`.
    async fn publish(&self, queue: &str, message: &Value, to_back: bool) -> Result<(), QueueError>;
}

#[derive(Clone)]
pub struct RedisJobQueue {
    conn: ConnectionManager,
}

impl RedisJobQueue {
    pub async fn connect(redis_url: &str) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url).map_err(|e| QueueError::Backend(e.to_string()))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| QueueError::Backend(e.to_string()))?;
        Ok(Self { conn })
    }

    fn is_dispatcher_completion(queue: &str, message: &Value) -> bool {
        queue == DISPATCHER_QUEUE && message.get("job_type").and_then(Value::as_str) == Some(COMPLETED_JOB_TYPE)
    }

    /// Build the RQ-style named-function-call wrapper this one downstream
    /// queue expects: `(function_name, envelope_json, job_id, timeout)`.
    fn dispatcher_frame(message: &Value) -> Result<Value, QueueError> {
        let job_id = message
            .get("job_id")
            .and_then(Value::as_str)
            .ok_or_else(|| QueueError::Decode("completion message missing job_id".to_string()))?;

        Ok(json!({
            "function": DISPATCHER_FUNCTION,
            "args": [message.to_string()],
            "job_id": job_id,
            "timeout": DISPATCHER_TIMEOUT,
        }))
    }
}

#[async_trait]
impl JobQueue for RedisJobQueue {
    async fn dequeue(&self, queue: &str, timeout_secs: u64) -> Result<Option<Value>, QueueError> {
        let mut conn = self.conn.clone();
        let result: Option<(String, Vec<u8>)> = conn
            .brpop(queue, timeout_secs as f64)
            .await
            .map_err(|e| QueueError::Backend(e.to_string()))?;

        let Some((_, raw)) = result else {
            return Ok(None);
        };

        serde_json::from_slice(&raw)
            .map(Some)
            .map_err(|e| QueueError::Decode(e.to_string()))
    }

    async fn publish(&self, queue: &str, message: &Value, to_back: bool) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();

        if Self::is_dispatcher_completion(queue, message) {
            let framed = Self::dispatcher_frame(message)?;
            let payload = serde_json::to_vec(&framed).map_err(|e| QueueError::Decode(e.to_string()))?;
            let _: () = conn
                .rpush(queue, payload)
                .await
                .map_err(|e| QueueError::Backend(e.to_string()))?;
            return Ok(());
        }

        let payload = serde_json::to_vec(message).map_err(|e| QueueError::Decode(e.to_string()))?;
        if to_back {
            let _: () = conn
                .rpush(queue, payload)
                .await
                .map_err(|e| QueueError::Backend(e.to_string()))?;
        } else {
            let _: () = conn
                .lpush(queue, payload)
                .await
                .map_err(|e| QueueError::Backend(e.to_string()))?;
        }
        Ok(())
    }
}
