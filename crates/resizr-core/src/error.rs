//! Error types module
//!
//! Every failure of a transform invocation is reported as a [`TransformError`]. The
//! variants fall into four families (see [`ErrorKind`]) so callers can tell a bad
//! source apart from an engine fault or an expired deadline.

use crate::models::ImageType;

/// Log level for error reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Debug level - for expected errors like rejected input
    Debug,
    /// Warning level - for deadlines and recoverable issues
    Warn,
    /// Error level - for unexpected failures
    Error,
}

/// Failure family of a [`TransformError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InputRejection,
    EngineFailure,
    Timeout,
    Configuration,
}

/// Metadata for error responses - defines how an error should be presented
pub trait ErrorMetadata {
    /// HTTP status code a front end should return
    fn http_status_code(&self) -> u16;

    /// Machine-readable error code (e.g., "ENGINE_FAILURE")
    fn error_code(&self) -> &'static str;

    /// Whether retrying the same request may succeed
    fn is_recoverable(&self) -> bool;

    /// Log level for this error
    fn log_level(&self) -> LogLevel;
}

/// Failure to obtain source bytes
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    #[error("Can't decode source: {0}")]
    Decode(String),

    #[error("Source not found: {0}")]
    NotFound(String),

    #[error("Source is too large: {size} bytes exceeds limit of {limit} bytes")]
    SizeExceeded { size: usize, limit: usize },

    #[error("Network failure: {0}")]
    Network(String),
}

#[derive(Debug, thiserror::Error)]
pub enum TransformError {
    #[error("Source image type is not supported: {0}")]
    UnsupportedSource(String),

    #[error("Source image is invalid: {0}")]
    InvalidSource(String),

    #[error("Converting non-SVG images to SVG is not supported")]
    VectorOutputOnly,

    #[error("Source image resolution is too big: {width}x{height} exceeds {max_megapixels} megapixels")]
    DimensionsTooLarge {
        width: u32,
        height: u32,
        max_megapixels: f64,
    },

    #[error("Resulting image format is not supported: {0}")]
    UnsupportedOutputFormat(ImageType),

    #[error("Can't extract image from container: {0}")]
    Sniff(String),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("Engine failure during {stage}: {message}")]
    Engine {
        stage: &'static str,
        message: String,
    },

    #[error("Processing timed out during {stage}")]
    Timeout { stage: &'static str },

    #[error("Processing was cancelled during {stage}")]
    Cancelled { stage: &'static str },

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type TransformResult<T> = Result<T, TransformError>;

impl TransformError {
    pub fn engine(stage: &'static str, message: impl Into<String>) -> Self {
        TransformError::Engine {
            stage,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            TransformError::UnsupportedSource(_)
            | TransformError::InvalidSource(_)
            | TransformError::VectorOutputOnly
            | TransformError::DimensionsTooLarge { .. }
            | TransformError::UnsupportedOutputFormat(_)
            | TransformError::Sniff(_)
            | TransformError::Fetch(_) => ErrorKind::InputRejection,
            TransformError::Engine { .. } => ErrorKind::EngineFailure,
            TransformError::Timeout { .. } | TransformError::Cancelled { .. } => {
                ErrorKind::Timeout
            }
            TransformError::Config(_) => ErrorKind::Configuration,
        }
    }

    pub fn is_timeout(&self) -> bool {
        self.kind() == ErrorKind::Timeout
    }
}

/// Static metadata for each variant: (http_status, error_code, recoverable, log_level).
fn transform_error_static_metadata(err: &TransformError) -> (u16, &'static str, bool, LogLevel) {
    match err {
        TransformError::UnsupportedSource(_) => {
            (422, "UNSUPPORTED_SOURCE", false, LogLevel::Debug)
        }
        TransformError::InvalidSource(_) => (422, "INVALID_SOURCE", false, LogLevel::Debug),
        TransformError::VectorOutputOnly => (422, "VECTOR_OUTPUT_ONLY", false, LogLevel::Debug),
        TransformError::DimensionsTooLarge { .. } => {
            (422, "DIMENSIONS_TOO_LARGE", false, LogLevel::Debug)
        }
        TransformError::UnsupportedOutputFormat(_) => {
            (422, "UNSUPPORTED_OUTPUT_FORMAT", false, LogLevel::Debug)
        }
        TransformError::Sniff(_) => (422, "CONTAINER_EXTRACTION_FAILED", false, LogLevel::Debug),
        TransformError::Fetch(FetchError::NotFound(_)) => {
            (404, "SOURCE_NOT_FOUND", false, LogLevel::Debug)
        }
        TransformError::Fetch(FetchError::SizeExceeded { .. }) => {
            (413, "SOURCE_TOO_LARGE", false, LogLevel::Debug)
        }
        TransformError::Fetch(FetchError::Decode(_)) => {
            (422, "SOURCE_DECODE_FAILED", false, LogLevel::Debug)
        }
        TransformError::Fetch(FetchError::Network(_)) => {
            (404, "SOURCE_NETWORK_FAILURE", true, LogLevel::Warn)
        }
        TransformError::Engine { .. } => (500, "ENGINE_FAILURE", false, LogLevel::Error),
        TransformError::Timeout { .. } => (504, "TIMEOUT", true, LogLevel::Warn),
        TransformError::Cancelled { .. } => (499, "CANCELLED", true, LogLevel::Debug),
        TransformError::Config(_) => (500, "CONFIGURATION_ERROR", false, LogLevel::Error),
    }
}

impl ErrorMetadata for TransformError {
    fn http_status_code(&self) -> u16 {
        transform_error_static_metadata(self).0
    }

    fn error_code(&self) -> &'static str {
        transform_error_static_metadata(self).1
    }

    fn is_recoverable(&self) -> bool {
        transform_error_static_metadata(self).2
    }

    fn log_level(&self) -> LogLevel {
        transform_error_static_metadata(self).3
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_classification() {
        assert_eq!(
            TransformError::VectorOutputOnly.kind(),
            ErrorKind::InputRejection
        );
        assert_eq!(
            TransformError::engine("resize", "boom").kind(),
            ErrorKind::EngineFailure
        );
        assert_eq!(
            TransformError::Timeout { stage: "crop" }.kind(),
            ErrorKind::Timeout
        );
        assert_eq!(
            TransformError::Config("bad".into()).kind(),
            ErrorKind::Configuration
        );
        assert!(TransformError::Cancelled { stage: "blur" }.is_timeout());
    }

    #[test]
    fn test_invalid_source_is_rejected_input() {
        let err = TransformError::InvalidSource("truncated png".into());
        assert_eq!(err.kind(), ErrorKind::InputRejection);
        assert_eq!(err.http_status_code(), 422);
        assert_eq!(err.error_code(), "INVALID_SOURCE");
        assert_eq!(err.log_level(), LogLevel::Debug);
    }

    #[test]
    fn test_fetch_error_conversion() {
        let err: TransformError = FetchError::NotFound("a.png".into()).into();
        assert_eq!(err.kind(), ErrorKind::InputRejection);
        assert_eq!(err.http_status_code(), 404);
        assert_eq!(err.error_code(), "SOURCE_NOT_FOUND");
    }

    #[test]
    fn test_engine_error_message_names_stage() {
        let err = TransformError::engine("smart crop", "out of memory");
        assert_eq!(
            err.to_string(),
            "Engine failure during smart crop: out of memory"
        );
        assert_eq!(err.log_level(), LogLevel::Error);
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_timeout_is_distinct_from_engine_failure() {
        let timeout = TransformError::Timeout { stage: "resize" };
        assert_eq!(timeout.http_status_code(), 504);
        assert_ne!(
            timeout.error_code(),
            TransformError::engine("resize", "x").error_code()
        );
    }
}
