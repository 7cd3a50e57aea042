//! Domain models for the transform pipeline

pub mod image_type;
pub mod options;
pub mod payload;

pub use image_type::ImageType;
pub use options::{
    CropOptions, ExtendOptions, Gravity, GravityType, PaddingOptions, ProcessingOptions,
    ResizingType, Rgb, TrimOptions, WatermarkOptions,
};
pub use payload::ImagePayload;
