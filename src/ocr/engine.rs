//! `TierEngine` (C1): the polymorphic external interface each OCR backend
//! implements. Real backends (tesseract bindings, the LLM-vision proxy
//! calls) are out of this core's scope (spec §1) — adapters here either
//! shell out to the already-deployed engine process over HTTP, or, for the
//! local `tesseract` tier, run the CPU-bound binary via `spawn_blocking`
//! so the event loop stays responsive to callbacks (spec §5).

use async_trait::async_trait;
use std::time::Duration;

use crate::errors::TierEngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OcrMode {
    Document,
    SingleLine,
}

#[derive(Debug, Clone)]
pub struct OcrOutput {
    pub text: String,
    pub duration_ms: u64,
}

#[async_trait]
pub trait TierEngine: Send + Sync {
    /// Whether this adapter believes its backend is currently reachable.
    /// Checked opportunistically; a `false` here is advisory only — actual
    /// failures still surface through `process`.
    async fn is_available(&self) -> bool;

    async fn process(
        &self,
        bytes: &[u8],
        language_hints: &[String],
        mode: OcrMode,
    ) -> Result<OcrOutput, TierEngineError>;
}

/// Adapter for a locally-installed tesseract binary, invoked out of
/// process so the worker doesn't need a tesseract FFI binding to build.
/// CPU work runs on a blocking thread per spec §5.
pub struct TesseractEngine {
    pub binary_path: String,
    pub timeout: Duration,
}

impl TesseractEngine {
    pub fn new(binary_path: impl Into<String>, timeout: Duration) -> Self {
        Self {
            binary_path: binary_path.into(),
            timeout,
        }
    }
}

#[async_trait]
impl TierEngine for TesseractEngine {
    async fn is_available(&self) -> bool {
        tokio::process::Command::new(&self.binary_path)
            .arg("--version")
            .output()
            .await
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    async fn process(
        &self,
        bytes: &[u8],
        language_hints: &[String],
        _mode: OcrMode,
    ) -> Result<OcrOutput, TierEngineError> {
        let binary_path = self.binary_path.clone();
        let lang = language_hints.first().cloned().unwrap_or_else(|| "eng".to_string());
        let image_bytes = bytes.to_vec();
        let started = std::time::Instant::now();

        let fut = tokio::task::spawn_blocking(move || run_tesseract(&binary_path, &image_bytes, &lang));

        match tokio::time::timeout(self.timeout, fut).await {
            Ok(Ok(Ok(text))) => Ok(OcrOutput {
                text,
                duration_ms: started.elapsed().as_millis() as u64,
            }),
            Ok(Ok(Err(e))) => Err(TierEngineError::Failed(e)),
            Ok(Err(join_err)) => Err(TierEngineError::Failed(join_err.to_string())),
            Err(_) => Err(TierEngineError::Timeout(self.timeout.as_secs())),
        }
    }
}

fn run_tesseract(binary_path: &str, image_bytes: &[u8], lang: &str) -> Result<String, String> {
    use std::io::Write;
    let mut input = tempfile::NamedTempFile::new().map_err(|e| format!("failed to create temp file for tesseract: {e}"))?;
    input
        .write_all(image_bytes)
        .map_err(|e| format!("failed to stage image for tesseract: {e}"))?;
    let path = input.path().to_path_buf();

    let output = std::process::Command::new(binary_path)
        .arg(&path)
        .arg("stdout")
        .arg("-l")
        .arg(lang)
        .output()
        .map_err(|e| format!("failed to invoke tesseract: {e}"))?;

    if !output.status.success() {
        return Err(format!(
            "tesseract exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr)
        ));
    }

    String::from_utf8(output.stdout).map_err(|e| format!("tesseract produced non-UTF-8 output: {e}"))
}

/// Adapter that calls an already-deployed OCR engine's HTTP surface
/// (`easyocr`, `paddleocr`, `rapidocr`, `apple_vision`, and the two
/// `llm_proxy_*` providers all expose the same shape per the source
/// system's `app/providers/*`).
pub struct HttpEngine {
    pub client: reqwest::Client,
    pub base_url: String,
    pub timeout: Duration,
}

impl HttpEngine {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            timeout,
        }
    }
}

#[derive(serde::Serialize)]
struct HttpEngineRequest<'a> {
    image_base64: String,
    language_hints: &'a [String],
    mode: &'static str,
}

#[derive(serde::Deserialize)]
struct HttpEngineResponse {
    text: String,
}

#[async_trait]
impl TierEngine for HttpEngine {
    async fn is_available(&self) -> bool {
        self.client
            .get(format!("{}/health", self.base_url))
            .timeout(Duration::from_secs(2))
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }

    async fn process(
        &self,
        bytes: &[u8],
        language_hints: &[String],
        mode: OcrMode,
    ) -> Result<OcrOutput, TierEngineError> {
        use base64::Engine as _;

        let started = std::time::Instant::now();
        let body = HttpEngineRequest {
            image_base64: base64::engine::general_purpose::STANDARD.encode(bytes),
            language_hints,
            mode: match mode {
                OcrMode::Document => "document",
                OcrMode::SingleLine => "single_line",
            },
        };

        let response = self
            .client
            .post(format!("{}/process", self.base_url))
            .json(&body)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TierEngineError::Timeout(self.timeout.as_secs())
                } else {
                    TierEngineError::Failed(e.to_string())
                }
            })?;

        if !response.status().is_success() {
            return Err(TierEngineError::Failed(format!(
                "engine returned status {}",
                response.status()
            )));
        }

        let parsed: HttpEngineResponse = response
            .json()
            .await
            .map_err(|e| TierEngineError::Failed(format!("invalid engine response: {e}")))?;

        Ok(OcrOutput {
            text: parsed.text,
            duration_ms: started.elapsed().as_millis() as u64,
        })
    }
}
