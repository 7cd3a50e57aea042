//! Resizr Core Library
//!
//! This crate provides the domain models, error types and configuration shared by
//! the transform pipeline and its front ends.

pub mod config;
pub mod error;
pub mod models;

// Re-export commonly used types
pub use config::{AutoResizePolicy, ProcessingConfig};
pub use error::{ErrorKind, ErrorMetadata, FetchError, LogLevel, TransformError, TransformResult};
pub use models::{
    CropOptions, ExtendOptions, Gravity, GravityType, ImagePayload, ImageType, PaddingOptions,
    ProcessingOptions, ResizingType, Rgb, TrimOptions, WatermarkOptions,
};
