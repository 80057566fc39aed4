//! Service configuration, loaded once at startup from environment
//! variables (with `.env` support). Mirrors readur's `Config::from_env`
//! diagnostic-logging style: every value logs whether it was loaded from
//! the environment or defaulted, with credential-bearing values masked.

use anyhow::Result;
use std::env;
use std::time::Duration;
use tracing::{info, warn};

use crate::tiers::{parse_enabled_tiers, Tier};

#[derive(Clone, Debug)]
pub struct Config {
    pub redis_url: String,
    pub job_queue_name: String,
    pub bind_address: String,

    pub llm_gateway_url: String,
    pub llm_app_id: String,
    pub llm_app_key: String,
    pub judge_model: String,
    pub public_callback_base_url: String,

    pub image_mount_root: String,

    pub default_language: String,
    pub max_output_bytes: usize,
    pub min_valid_chars: usize,
    pub max_retry_attempts: i64,
    pub enabled_tiers: Vec<Tier>,
    pub validation_state_ttl_seconds: u64,
    pub min_confidence_floor: Option<f64>,
    pub judge_timeout: Duration,
}

fn mask_credential(value: &str) -> String {
    if value.len() <= 4 {
        "***".to_string()
    } else {
        format!("{}***", &value[..2])
    }
}

fn env_or_default(key: &str, default: &str) -> String {
    match env::var(key) {
        Ok(val) => {
            info!(key, value = %val, "loaded from environment");
            val
        }
        Err(_) => {
            warn!(key, default, "env var not set, using default");
            default.to_string()
        }
    }
}

fn env_or_default_masked(key: &str, default: &str) -> String {
    match env::var(key) {
        Ok(val) => {
            info!(key, value = %mask_credential(&val), "loaded from environment (masked)");
            val
        }
        Err(_) => {
            warn!(key, "env var not set, using default");
            default.to_string()
        }
    }
}

fn env_parsed_or_default<T: std::str::FromStr>(key: &str, default: T) -> T {
    match env::var(key).ok().and_then(|v| v.parse::<T>().ok()) {
        Some(parsed) => {
            info!(key, "loaded from environment");
            parsed
        }
        None => {
            warn!(key, "env var not set or unparseable, using default");
            default
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        match dotenvy::dotenv() {
            Ok(path) => info!(path = %path.display(), "loaded .env file"),
            Err(_) => info!("no .env file found, using system environment variables"),
        }

        let enabled_tiers_csv = env_or_default(
            "OCR_ENABLED_TIERS",
            "tesseract,easyocr,paddleocr,rapidocr,apple_vision,llm_local,llm_cloud",
        );
        let enabled_tiers = parse_enabled_tiers(&enabled_tiers_csv);

        let min_confidence_floor = env::var("OCR_MIN_CONFIDENCE_FLOOR")
            .ok()
            .and_then(|v| v.parse::<f64>().ok());

        let config = Config {
            redis_url: env_or_default_masked("REDIS_URL", "redis://localhost:6379"),
            job_queue_name: env_or_default("OCR_JOB_QUEUE", "jarvis.ocr.jobs"),
            bind_address: env_or_default("BIND_ADDRESS", "0.0.0.0:8080"),

            llm_gateway_url: env_or_default("JARVIS_LLM_PROXY_URL", "http://localhost:9000"),
            llm_app_id: env_or_default_masked("JARVIS_APP_ID", "unset"),
            llm_app_key: env_or_default_masked("JARVIS_APP_KEY", "unset"),
            judge_model: env_or_default("OCR_VALIDATION_MODEL", "gpt-4o-mini"),
            public_callback_base_url: env_or_default("OCR_PUBLIC_URL", "http://localhost:8080"),

            image_mount_root: env_or_default("IMAGE_MOUNT_ROOT", "/data/images"),

            default_language: env_or_default("OCR_DEFAULT_LANGUAGE", "en"),
            max_output_bytes: env_parsed_or_default("OCR_MAX_TEXT_BYTES", 51200usize),
            min_valid_chars: env_parsed_or_default("OCR_MIN_VALID_CHARS", 3usize),
            max_retry_attempts: env_parsed_or_default("OCR_MAX_RETRY_ATTEMPTS", 3i64),
            enabled_tiers,
            validation_state_ttl_seconds: env_parsed_or_default("OCR_VALIDATION_STATE_TTL", 300u64),
            min_confidence_floor,
            judge_timeout: Duration::from_secs(env_parsed_or_default("OCR_JUDGE_TIMEOUT_SECONDS", 10u64)),
        };

        Ok(config)
    }

    pub fn callback_url(&self) -> String {
        format!(
            "{}/internal/validation/callback",
            self.public_callback_base_url.trim_end_matches('/')
        )
    }
}
