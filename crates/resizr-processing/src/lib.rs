//! Resizr Processing Library
//!
//! The transform pipeline: scale and placement math, the per-frame stage sequence,
//! animation handling, watermark compositing, byte-budget encoding and the entry
//! point that composes them. Image primitives come from an [`ImageEngine`];
//! [`PixelEngine`] is the in-memory implementation shipped with the crate.

pub mod animation;
pub mod deadline;
pub mod encoder;
pub mod engine;
pub mod executor;
pub mod fetch;
pub mod geometry;
pub mod pipeline;
pub mod shared;
pub mod sniff;
pub mod transform;
pub mod watermark;

pub use animation::AnimationHandler;
pub use deadline::Deadline;
pub use encoder::{fit_to_bytes, quality_multiplier, save_to_fit_bytes};
pub use engine::{
    DecodeOptions, EngineError, ImageEngine, ImageRaster, PixelEngine, Raster, TrimParams,
};
pub use executor::PinnedExecutor;
pub use fetch::{LocalFetcher, SourceFetcher};
pub use geometry::{
    can_scale_on_load, check_dimensions, compute_position, compute_scale, discrete_shrink,
};
pub use pipeline::{Pipeline, ProcessedImage};
pub use shared::SharedAssets;
pub use sniff::{FormatSniffer, IcoSniffer, SniffedImage};
pub use transform::FrameTransformer;
pub use watermark::{render_text_watermark, GlyphProvider, OutlineFont, TextBox, Watermark};
