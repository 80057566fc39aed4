//! Validation state store (C4): a TTL-bounded `validation_job_id ->
//! PendingState` map backed by Redis, shared across the worker cluster so
//! a callback can be served by any worker (spec §4.5).
//!
//! Grounded on `original_source/app/validation_state.py` for the key
//! prefix and TTL-reset-on-save semantics, and on
//! `examples/monokrome-foiacquire/src/rate_limit/redis.rs` for the
//! `ConnectionManager` usage idiom.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use crate::errors::StateStoreError;
use crate::model::PendingState;

pub const KEY_PREFIX: &str = "ocr:pending_validation:";

fn make_key(validation_job_id: &str) -> String {
    format!("{KEY_PREFIX}{validation_job_id}")
}

#[async_trait]
pub trait ValidationStateStore: Send + Sync {
    async fn save(&self, state: &PendingState) -> Result<(), StateStoreError>;
    async fn get(&self, validation_job_id: &str) -> Result<Option<PendingState>, StateStoreError>;
    async fn delete(&self, validation_job_id: &str) -> Result<(), StateStoreError>;
}

#[derive(Clone)]
pub struct RedisStateStore {
    conn: ConnectionManager,
    ttl_seconds: u64,
}

impl RedisStateStore {
    pub async fn connect(redis_url: &str, ttl_seconds: u64) -> Result<Self, StateStoreError> {
        let client = redis::Client::open(redis_url).map_err(|e| StateStoreError::Backend(e.to_string()))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| StateStoreError::Backend(e.to_string()))?;
        Ok(Self { conn, ttl_seconds })
    }
}

#[async_trait]
impl ValidationStateStore for RedisStateStore {
    async fn save(&self, state: &PendingState) -> Result<(), StateStoreError> {
        let mut conn = self.conn.clone();
        let key = make_key(&state.validation_job_id);
        let payload = serde_json::to_vec(state).map_err(|e| StateStoreError::Backend(e.to_string()))?;
        let _: () = conn
            .set_ex(key, payload, self.ttl_seconds)
            .await
            .map_err(|e| StateStoreError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn get(&self, validation_job_id: &str) -> Result<Option<PendingState>, StateStoreError> {
        let mut conn = self.conn.clone();
        let key = make_key(validation_job_id);
        let raw: Option<Vec<u8>> = conn.get(key).await.map_err(|e| StateStoreError::Backend(e.to_string()))?;

        // A deserialization failure is treated as missing, not an error
        // (spec §4.5) — a corrupted row shouldn't wedge the callback path.
        Ok(raw.and_then(|bytes| serde_json::from_slice(&bytes).ok()))
    }

    async fn delete(&self, validation_job_id: &str) -> Result<(), StateStoreError> {
        let mut conn = self.conn.clone();
        let key = make_key(validation_job_id);
        let _: () = conn.del(key).await.map_err(|e| StateStoreError::Backend(e.to_string()))?;
        Ok(())
    }
}
