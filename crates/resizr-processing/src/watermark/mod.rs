//! Watermark compositor
//!
//! The overlay goes through the same frame transformer as the main image (fit,
//! enlarge, dpr 1), then gets positioned on a transparent canvas the size of one
//! target frame and blended.

mod text;

pub use text::{render_text_watermark, GlyphProvider, OutlineFont, TextBox, WATERMARK_FONT_SIZE};

use crate::deadline::Deadline;
use crate::engine::{DecodeOptions, ImageEngine, Raster, StageExt};
use crate::geometry::{compute_position, scale_dimension};
use crate::transform::FrameTransformer;
use resizr_core::{
    ImagePayload, ProcessingConfig, ProcessingOptions, ResizingType, Rgb, TransformResult,
    WatermarkOptions,
};

pub struct Watermark;

impl Watermark {
    /// Decode and lay out the overlay on a `target_width`x`target_height` canvas
    pub fn prepare<E: ImageEngine>(
        engine: &E,
        config: &ProcessingConfig,
        payload: &ImagePayload,
        options: &WatermarkOptions,
        target_width: u32,
        target_height: u32,
    ) -> TransformResult<E::Raster> {
        let mut overlay = engine
            .decode(&payload.data, payload.image_type, DecodeOptions::default())
            .stage("watermark decode")?;

        let mut po = ProcessingOptions {
            resizing_type: ResizingType::Fit,
            dpr: 1.0,
            enlarge: true,
            format: payload.image_type,
            ..ProcessingOptions::default()
        };
        if options.scale > 0.0 {
            po.width = scale_dimension(target_width, options.scale).max(1);
            po.height = scale_dimension(target_height, options.scale).max(1);
        }

        // The overlay has its own budget; only the target's deadline aborts a request
        let deadline = Deadline::none();
        FrameTransformer::new(engine, config, &deadline).transform(
            &mut overlay,
            Some(&payload.data[..]),
            &po,
            payload.image_type,
        )?;

        overlay.ensure_alpha().stage("watermark")?;

        if options.replicate {
            overlay
                .replicate(target_width, target_height)
                .stage("watermark replicate")?;
            return Ok(overlay);
        }

        let (left, top) = compute_position(
            target_width,
            target_height,
            overlay.width(),
            overlay.height(),
            &options.gravity,
            true,
        );
        overlay
            .embed(target_width, target_height, left, top, Rgb::new(0, 0, 0), true)
            .stage("watermark embed")?;

        Ok(overlay)
    }

    /// Blend the overlay into `raster`, which holds `frames` frames stacked vertically
    pub fn apply<E: ImageEngine>(
        engine: &E,
        config: &ProcessingConfig,
        raster: &mut E::Raster,
        payload: &ImagePayload,
        options: &WatermarkOptions,
        frames: u32,
    ) -> TransformResult<()> {
        raster.rgb_colourspace().stage("watermark")?;
        raster.copy_memory().stage("watermark")?;

        let width = raster.width();
        let height = raster.height();
        let frames = frames.max(1);

        let mut overlay =
            Self::prepare(engine, config, payload, options, width, height / frames)?;

        if frames > 1 {
            overlay
                .replicate(width, height)
                .stage("watermark replicate")?;
        }

        let opacity = options.opacity * config.watermark_opacity;
        tracing::debug!(
            width = width,
            height = height,
            frames = frames,
            opacity = opacity,
            replicate = options.replicate,
            "Applying watermark"
        );

        raster
            .apply_watermark(&overlay, opacity)
            .stage("watermark")
    }
}
