//! Image engine abstraction
//!
//! The pipeline drives an [`ImageEngine`] and mutates the [`Raster`] handles it
//! decodes. A raster is owned by exactly one invocation and released on drop.

mod orientation;
mod pixel;
mod smart_crop;

pub use orientation::{read_orientation, Orientation};
pub use pixel::{ImageRaster, PixelEngine};
pub use smart_crop::SmartCrop;

use bytes::Bytes;
use resizr_core::{ImageType, Rgb, TransformError, TransformResult};

/// Metadata key holding the height of one animation frame
pub const META_PAGE_HEIGHT: &str = "page-height";
/// Metadata key holding the number of frames in the source container
pub const META_N_PAGES: &str = "n-pages";
/// Frame delay in hundredths of a second
pub const META_DELAY: &str = "gif-delay";
/// Loop count, 0 = forever
pub const META_LOOP: &str = "gif-loop";

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EngineError {
    #[error("Failed to decode {0}: {1}")]
    Decode(ImageType, String),

    #[error("Failed to encode {0}: {1}")]
    Encode(ImageType, String),

    #[error("Image type {0} is not supported by the engine")]
    Unsupported(ImageType),

    #[error("Metadata field '{0}' is missing")]
    MissingField(String),

    #[error("{0}")]
    Operation(String),
}

impl EngineError {
    /// Classify a failure to read the source image. Corrupt or unsupported data is
    /// rejected input; anything else stays an engine failure of `stage`.
    pub fn into_source_error(self, stage: &'static str) -> TransformError {
        match self {
            EngineError::Decode(..) => TransformError::InvalidSource(self.to_string()),
            EngineError::Unsupported(image_type) => {
                TransformError::UnsupportedSource(image_type.to_string())
            }
            other => TransformError::engine(stage, other.to_string()),
        }
    }
}

/// Tags engine errors with the pipeline stage that produced them
pub trait StageExt<T> {
    fn stage(self, stage: &'static str) -> TransformResult<T>;
}

impl<T> StageExt<T> for Result<T, EngineError> {
    fn stage(self, stage: &'static str) -> TransformResult<T> {
        self.map_err(|e| TransformError::engine(stage, e.to_string()))
    }
}

/// Rotation applied after resizing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Angle {
    #[default]
    D0,
    D90,
    D180,
    D270,
}

/// Decode parameters used by the initial load and by scale-on-load reloads
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecodeOptions {
    /// Discrete JPEG shrink factor (1, 2, 4 or 8)
    pub shrink: u32,
    /// Continuous scale applied by formats that support it
    pub scale: f64,
    /// Number of frames to load; `None` loads every frame
    pub pages: Option<usize>,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            shrink: 1,
            scale: 1.0,
            pages: Some(1),
        }
    }
}

impl DecodeOptions {
    pub fn all_pages() -> Self {
        Self {
            pages: None,
            ..Self::default()
        }
    }
}

/// Trim parameters passed to [`Raster::trim`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrimParams {
    pub threshold: f64,
    pub smart: bool,
    pub color: Rgb,
    pub equal_hor: bool,
    pub equal_ver: bool,
}

/// Engine-owned decoded image, mutated in place
pub trait Raster: Sized {
    fn width(&self) -> u32;
    fn height(&self) -> u32;
    fn has_alpha(&self) -> bool;
    fn is_srgb(&self) -> bool;
    /// EXIF orientation 1..=8
    fn orientation(&self) -> u8;

    fn get_int(&self, name: &str) -> Result<i64, EngineError>;
    fn set_int(&mut self, name: &str, value: i64);

    /// True when the raster holds more than one stacked frame
    fn is_animated(&self) -> bool {
        match self.get_int(META_PAGE_HEIGHT) {
            Ok(page_height) => page_height > 0 && (page_height as u32) < self.height(),
            Err(_) => false,
        }
    }

    fn trim(&mut self, params: &TrimParams) -> Result<(), EngineError>;
    fn resize(&mut self, scale: f64, has_alpha: bool) -> Result<(), EngineError>;
    fn rotate(&mut self, angle: Angle) -> Result<(), EngineError>;
    /// Mirror horizontally
    fn flip(&mut self) -> Result<(), EngineError>;
    fn crop(&mut self, left: i32, top: i32, width: u32, height: u32) -> Result<(), EngineError>;
    fn smart_crop(&mut self, width: u32, height: u32) -> Result<(), EngineError>;

    fn import_profile(&mut self, linear: bool) -> Result<(), EngineError>;
    fn linear_colourspace(&mut self) -> Result<(), EngineError>;
    fn rgb_colourspace(&mut self) -> Result<(), EngineError>;

    fn flatten(&mut self, background: Rgb) -> Result<(), EngineError>;
    fn blur(&mut self, sigma: f32) -> Result<(), EngineError>;
    fn sharpen(&mut self, sigma: f32) -> Result<(), EngineError>;

    /// Place the raster at `(left, top)` on a `width`x`height` canvas
    fn embed(
        &mut self,
        width: u32,
        height: u32,
        left: i32,
        top: i32,
        background: Rgb,
        transparent: bool,
    ) -> Result<(), EngineError>;
    /// Tile the raster until it covers `width`x`height`
    fn replicate(&mut self, width: u32, height: u32) -> Result<(), EngineError>;
    fn ensure_alpha(&mut self) -> Result<(), EngineError>;
    /// Blend a same-sized overlay on top
    fn apply_watermark(&mut self, overlay: &Self, opacity: f64) -> Result<(), EngineError>;

    /// Materialize pending work. Acts as a barrier between stages.
    fn copy_memory(&mut self) -> Result<(), EngineError>;

    fn extract(&self, left: u32, top: u32, width: u32, height: u32) -> Result<Self, EngineError>;
    /// Replace the content with `frames` stacked vertically
    fn join(&mut self, frames: Vec<Self>) -> Result<(), EngineError>;
    fn cast_uchar(&mut self) -> Result<(), EngineError>;
}

/// Codec and capability surface of an engine
pub trait ImageEngine: Send + Sync + 'static {
    type Raster: Raster;

    fn decode(
        &self,
        data: &[u8],
        image_type: ImageType,
        options: DecodeOptions,
    ) -> Result<Self::Raster, EngineError>;

    /// Header dimensions of an encoded image, read without decoding pixels.
    /// For animations this is the size of one frame.
    fn read_dimensions(
        &self,
        data: &[u8],
        image_type: ImageType,
    ) -> Result<(u32, u32), EngineError>;

    fn encode(
        &self,
        raster: &mut Self::Raster,
        format: ImageType,
        quality: u8,
        strip_metadata: bool,
    ) -> Result<Bytes, EngineError>;

    fn supports_load(&self, image_type: ImageType) -> bool;
    fn supports_save(&self, image_type: ImageType) -> bool;
    fn supports_smart_crop(&self) -> bool;
    fn supports_animation(&self, image_type: ImageType) -> bool;
}
