//! Source fetching
//!
//! The pipeline never reads sources itself; a [`SourceFetcher`] turns a source
//! reference into bytes plus a detected format.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use resizr_core::{FetchError, ImagePayload, ImageType};
use std::path::Path;

#[async_trait]
pub trait SourceFetcher: Send + Sync {
    async fn fetch(&self, source: &str) -> Result<ImagePayload, FetchError>;
}

/// Reads filesystem paths and base64 `data:` URIs
#[derive(Debug, Clone, Default)]
pub struct LocalFetcher {
    /// Maximum source size in bytes, 0 = unlimited
    max_size: usize,
}

impl LocalFetcher {
    pub fn new(max_size: usize) -> Self {
        Self { max_size }
    }

    fn check_size(&self, size: usize) -> Result<(), FetchError> {
        if self.max_size > 0 && size > self.max_size {
            return Err(FetchError::SizeExceeded {
                size,
                limit: self.max_size,
            });
        }
        Ok(())
    }

    fn decode_data_uri(uri: &str) -> Result<Vec<u8>, FetchError> {
        let (meta, encoded) = uri
            .strip_prefix("data:")
            .and_then(|rest| rest.split_once(','))
            .ok_or_else(|| FetchError::Decode("malformed data URI".into()))?;

        if !meta.ends_with(";base64") {
            return Err(FetchError::Decode(
                "only base64 data URIs are supported".into(),
            ));
        }

        STANDARD
            .decode(encoded.trim())
            .map_err(|e| FetchError::Decode(format!("invalid base64: {}", e)))
    }

    async fn read_file(&self, path: &Path) -> Result<Vec<u8>, FetchError> {
        let metadata = tokio::fs::metadata(path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => FetchError::NotFound(path.display().to_string()),
            _ => FetchError::Network(format!("{}: {}", path.display(), e)),
        })?;
        self.check_size(metadata.len() as usize)?;

        tokio::fs::read(path)
            .await
            .map_err(|e| FetchError::Network(format!("{}: {}", path.display(), e)))
    }
}

#[async_trait]
impl SourceFetcher for LocalFetcher {
    async fn fetch(&self, source: &str) -> Result<ImagePayload, FetchError> {
        let data = if source.starts_with("data:") {
            Self::decode_data_uri(source)?
        } else {
            let path = source.strip_prefix("file://").unwrap_or(source);
            self.read_file(Path::new(path)).await?
        };
        self.check_size(data.len())?;

        let payload = ImagePayload::detect(data);
        if payload.image_type == ImageType::Unknown {
            return Err(FetchError::Decode("unknown image format".into()));
        }

        tracing::debug!(
            image_type = %payload.image_type,
            size = payload.len(),
            "Source fetched"
        );

        Ok(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const PNG_MAGIC: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0];

    #[tokio::test]
    async fn test_fetch_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(PNG_MAGIC).unwrap();

        let payload = LocalFetcher::default()
            .fetch(file.path().to_str().unwrap())
            .await
            .unwrap();
        assert_eq!(payload.image_type, ImageType::Png);
        assert_eq!(payload.len(), PNG_MAGIC.len());
    }

    #[tokio::test]
    async fn test_fetch_data_uri() {
        let uri = format!("data:image/png;base64,{}", STANDARD.encode(PNG_MAGIC));
        let payload = LocalFetcher::default().fetch(&uri).await.unwrap();
        assert_eq!(payload.image_type, ImageType::Png);

        let err = LocalFetcher::default()
            .fetch("data:image/png,plain")
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Decode(_)));
    }

    #[tokio::test]
    async fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.png");
        let err = LocalFetcher::default()
            .fetch(path.to_str().unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_size_limit() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(PNG_MAGIC).unwrap();

        let err = LocalFetcher::new(4)
            .fetch(file.path().to_str().unwrap())
            .await
            .unwrap_err();
        assert_eq!(err, FetchError::SizeExceeded { size: 10, limit: 4 });
    }

    #[tokio::test]
    async fn test_unknown_format() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"just some text").unwrap();

        let err = LocalFetcher::default()
            .fetch(file.path().to_str().unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Decode(_)));
    }
}
