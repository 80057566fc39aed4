//! Image reference resolver (C2). Grounded on
//! `original_source/app/image_resolver.py` and readur's `file_service.rs`
//! / `s3_service.rs` for the local-path and S3 access idioms respectively.

use async_trait::async_trait;

use crate::errors::ResolveError;
use crate::model::{ImageKind, ImageRef};

#[derive(Debug, Clone)]
pub struct ResolvedImage {
    pub bytes: Vec<u8>,
    pub media_type: String,
}

#[async_trait]
pub trait ImageResolver: Send + Sync {
    async fn resolve(&self, image_ref: &ImageRef) -> Result<ResolvedImage, ResolveError>;
}

/// PDF rejection must happen before any bytes are fetched, regardless of
/// `kind` (spec §4.2, P11).
fn reject_pdf(value: &str) -> Result<(), ResolveError> {
    if value.to_lowercase().ends_with(".pdf") {
        return Err(ResolveError::UnsupportedMedia(format!(
            "PDF images are not supported: {value}"
        )));
    }
    Ok(())
}

fn content_type_for(path: &str) -> &'static str {
    let lower = path.to_lowercase();
    if lower.ends_with(".png") {
        "image/png"
    } else if lower.ends_with(".jpg") || lower.ends_with(".jpeg") {
        "image/jpeg"
    } else if lower.ends_with(".gif") {
        "image/gif"
    } else if lower.ends_with(".bmp") {
        "image/bmp"
    } else if lower.ends_with(".webp") {
        "image/webp"
    } else if lower.ends_with(".tiff") || lower.ends_with(".tif") {
        "image/tiff"
    } else {
        "image/png"
    }
}

pub struct ServiceImageResolver {
    pub local_mount_root: std::path::PathBuf,
    pub http_client: reqwest::Client,
    #[cfg(feature = "s3")]
    pub s3_client: Option<aws_sdk_s3::Client>,
}

impl ServiceImageResolver {
    pub fn new(local_mount_root: impl Into<std::path::PathBuf>) -> Self {
        Self {
            local_mount_root: local_mount_root.into(),
            http_client: reqwest::Client::new(),
            #[cfg(feature = "s3")]
            s3_client: None,
        }
    }

    #[cfg(feature = "s3")]
    pub fn with_s3_client(mut self, client: aws_sdk_s3::Client) -> Self {
        self.s3_client = Some(client);
        self
    }

    async fn resolve_local_path(&self, value: &str) -> Result<ResolvedImage, ResolveError> {
        let path = std::path::Path::new(value);
        let resolved = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.local_mount_root.join(path)
        };

        let bytes = tokio::fs::read(&resolved).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ResolveError::NotFound(format!("image file not found: {value}"))
            } else if e.kind() == std::io::ErrorKind::PermissionDenied {
                ResolveError::AccessDenied(format!("permission denied reading image: {value}"))
            } else {
                ResolveError::TransportError(format!("failed to read image {value}: {e}"))
            }
        })?;

        Ok(ResolvedImage {
            media_type: content_type_for(value).to_string(),
            bytes,
        })
    }

    async fn resolve_https(&self, url: &str) -> Result<ResolvedImage, ResolveError> {
        let response = self
            .http_client
            .get(url)
            .send()
            .await
            .map_err(|e| ResolveError::TransportError(format!("failed to fetch {url}: {e}")))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(ResolveError::NotFound(format!("remote image not found: {url}")));
        }
        if response.status() == reqwest::StatusCode::FORBIDDEN
            || response.status() == reqwest::StatusCode::UNAUTHORIZED
        {
            return Err(ResolveError::AccessDenied(format!("access denied fetching {url}")));
        }
        if !response.status().is_success() {
            return Err(ResolveError::TransportError(format!(
                "unexpected status {} fetching {url}",
                response.status()
            )));
        }

        let media_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string())
            .unwrap_or_else(|| content_type_for(url).to_string());

        let bytes = response
            .bytes()
            .await
            .map_err(|e| ResolveError::TransportError(format!("failed to read body from {url}: {e}")))?;

        Ok(ResolvedImage {
            bytes: bytes.to_vec(),
            media_type,
        })
    }

    #[cfg(feature = "s3")]
    async fn resolve_s3_uri(&self, uri: &str) -> Result<ResolvedImage, ResolveError> {
        if uri.starts_with("https://") || uri.starts_with("http://") {
            return self.resolve_https(uri).await;
        }

        let rest = uri
            .strip_prefix("s3://")
            .ok_or_else(|| ResolveError::TransportError(format!("invalid S3 URI: {uri}")))?;
        let mut parts = rest.splitn(2, '/');
        let bucket = parts.next().unwrap_or_default();
        let key = parts.next().unwrap_or_default();
        if bucket.is_empty() || key.is_empty() {
            return Err(ResolveError::TransportError(format!("invalid S3 URI: {uri}")));
        }

        let client = self
            .s3_client
            .as_ref()
            .ok_or_else(|| ResolveError::TransportError("S3 client not configured".to_string()))?;

        let output = client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                let msg = e.to_string();
                if msg.contains("NoSuchKey") {
                    ResolveError::NotFound(format!("S3 object not found: {uri}"))
                } else if msg.contains("AccessDenied") {
                    ResolveError::AccessDenied(format!("access denied to S3 object: {uri}"))
                } else {
                    ResolveError::TransportError(format!("failed to access S3 object {uri}: {msg}"))
                }
            })?;

        let media_type = output
            .content_type()
            .map(|s| s.to_string())
            .unwrap_or_else(|| content_type_for(key).to_string());

        let bytes = output
            .body
            .collect()
            .await
            .map_err(|e| ResolveError::TransportError(format!("failed to read S3 body for {uri}: {e}")))?
            .into_bytes()
            .to_vec();

        Ok(ResolvedImage { bytes, media_type })
    }

    #[cfg(not(feature = "s3"))]
    async fn resolve_s3_uri(&self, uri: &str) -> Result<ResolvedImage, ResolveError> {
        Err(ResolveError::TransportError(format!(
            "S3 support not compiled into this binary: {uri}"
        )))
    }
}

#[async_trait]
impl ImageResolver for ServiceImageResolver {
    async fn resolve(&self, image_ref: &ImageRef) -> Result<ResolvedImage, ResolveError> {
        reject_pdf(&image_ref.value)?;

        match image_ref.kind {
            ImageKind::LocalPath => self.resolve_local_path(&image_ref.value).await,
            ImageKind::S3 => self.resolve_s3_uri(&image_ref.value).await,
            ImageKind::Minio => {
                let normalized = image_ref.value.replacen("minio://", "s3://", 1);
                self.resolve_s3_uri(&normalized).await
            }
            ImageKind::Db => Err(ResolveError::TransportError(
                "image kind 'db' is not implemented".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rejects_pdf_regardless_of_kind() {
        let resolver = ServiceImageResolver::new(std::env::temp_dir());
        let image_ref = ImageRef {
            kind: ImageKind::S3,
            value: "s3://bucket/doc.PDF".to_string(),
            index: 0,
        };
        let err = resolver.resolve(&image_ref).await.unwrap_err();
        assert!(matches!(err, ResolveError::UnsupportedMedia(_)));
    }

    #[tokio::test]
    async fn local_path_not_found_maps_to_not_found() {
        let resolver = ServiceImageResolver::new(std::env::temp_dir());
        let image_ref = ImageRef {
            kind: ImageKind::LocalPath,
            value: "does-not-exist-1234.png".to_string(),
            index: 0,
        };
        let err = resolver.resolve(&image_ref).await.unwrap_err();
        assert!(matches!(err, ResolveError::NotFound(_)));
    }

    #[tokio::test]
    async fn local_path_reads_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("sample.png");
        tokio::fs::write(&file_path, b"fake-bytes").await.unwrap();

        let resolver = ServiceImageResolver::new(dir.path());
        let image_ref = ImageRef {
            kind: ImageKind::LocalPath,
            value: "sample.png".to_string(),
            index: 0,
        };
        let resolved = resolver.resolve(&image_ref).await.unwrap();
        assert_eq!(resolved.bytes, b"fake-bytes");
        assert_eq!(resolved.media_type, "image/png");
    }

    #[tokio::test]
    async fn db_kind_is_rejected() {
        let resolver = ServiceImageResolver::new(std::env::temp_dir());
        let image_ref = ImageRef {
            kind: ImageKind::Db,
            value: "row-123".to_string(),
            index: 0,
        };
        assert!(resolver.resolve(&image_ref).await.is_err());
    }
}
