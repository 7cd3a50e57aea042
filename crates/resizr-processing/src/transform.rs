//! Frame transformer - runs the ordered stage sequence over one raster
//!
//! The stages always run in the same order:
//! 1. Trim
//! 2. Source dimensions and EXIF orientation
//! 3. Crop gravity resolution
//! 4. Scale against the crop-constrained size
//! 5. Scale-on-load reload
//! 6. Colour management
//! 7. Resize
//! 8. Rotate and flip
//! 9. Crop (explicit crop box, then output box)
//! 10. WebP dimension limit
//! 11. Profile import and sRGB conversion
//! 12. Flatten
//! 13. Blur and sharpen
//! 14. Extend
//! 15. Padding
//! 16. Watermark
//! 17. Final sRGB conversion and 8-bit cast

use crate::deadline::Deadline;
use crate::engine::{DecodeOptions, ImageEngine, Orientation, Raster, StageExt, TrimParams};
use crate::geometry::{
    can_scale_on_load, compute_position, compute_scale, discrete_shrink, min_non_zero,
    scale_dimension,
};
use crate::watermark::Watermark;
use resizr_core::{
    Gravity, GravityType, ImagePayload, ImageType, ProcessingConfig, ProcessingOptions,
    TransformError, TransformResult,
};

/// Largest width or height a WebP encoder accepts
pub const WEBP_MAX_DIMENSION: f64 = 16383.0;

/// Values carried from one stage to the next
#[derive(Debug, Clone, Copy)]
struct FrameState {
    trimmed: bool,
    src_width: u32,
    src_height: u32,
    orientation: Orientation,
    width_to_scale: u32,
    height_to_scale: u32,
    crop_width: u32,
    crop_height: u32,
    crop_gravity: Gravity,
    scale: f64,
    icc_imported: bool,
    has_alpha: bool,
}

pub struct FrameTransformer<'a, E: ImageEngine> {
    engine: &'a E,
    config: &'a ProcessingConfig,
    deadline: &'a Deadline,
    watermark: Option<&'a ImagePayload>,
}

impl<'a, E: ImageEngine> FrameTransformer<'a, E> {
    pub fn new(engine: &'a E, config: &'a ProcessingConfig, deadline: &'a Deadline) -> Self {
        Self {
            engine,
            config,
            deadline,
            watermark: None,
        }
    }

    /// Shared overlay applied when the options enable watermarking
    pub fn with_watermark(mut self, watermark: Option<&'a ImagePayload>) -> Self {
        self.watermark = watermark;
        self
    }

    pub fn engine(&self) -> &'a E {
        self.engine
    }

    pub fn config(&self) -> &'a ProcessingConfig {
        self.config
    }

    pub fn deadline(&self) -> &'a Deadline {
        self.deadline
    }

    pub fn watermark(&self) -> Option<&'a ImagePayload> {
        self.watermark
    }

    /// Memory barrier followed by a deadline check
    pub fn copy_memory_and_check(
        &self,
        raster: &mut E::Raster,
        stage: &'static str,
    ) -> TransformResult<()> {
        raster.copy_memory().stage(stage)?;
        self.deadline.check(stage)
    }

    /// Transform one frame in place.
    ///
    /// `data` is the encoded source and enables scale-on-load; animation frames pass
    /// `None` because they can't be re-decoded individually.
    pub fn transform(
        &self,
        raster: &mut E::Raster,
        data: Option<&[u8]>,
        po: &ProcessingOptions,
        image_type: ImageType,
    ) -> TransformResult<()> {
        let trimmed = self.trim(raster, po)?;
        let mut state = self.read_source(raster, po, trimmed, image_type);

        self.scale_on_load(raster, data, po, image_type, &mut state)?;
        self.manage_colour(raster, po, &mut state)?;
        self.resize(raster, &state)?;
        self.orient(raster, &state)?;
        self.crop(raster, po, &state)?;
        self.limit_webp_dimensions(raster, po, &state)?;
        self.convert_to_srgb(raster, &state)?;
        self.flatten(raster, po, &state)?;
        self.apply_filters(raster, po)?;
        self.extend(raster, po)?;
        self.pad(raster, po)?;
        self.watermark_frame(raster, po)?;
        self.finalize(raster)
    }

    fn trim(&self, raster: &mut E::Raster, po: &ProcessingOptions) -> TransformResult<bool> {
        if !po.trim.enabled {
            return Ok(false);
        }

        let params = TrimParams {
            threshold: po.trim.threshold,
            smart: po.trim.smart,
            color: po.trim.color,
            equal_hor: po.trim.equal_hor,
            equal_ver: po.trim.equal_ver,
        };
        raster.trim(&params).stage("trim")?;
        self.copy_memory_and_check(raster, "trim")?;

        tracing::debug!(
            width = raster.width(),
            height = raster.height(),
            "Image trimmed"
        );
        Ok(true)
    }

    /// Stages 2-4: dimensions, crop gravity and the initial scale
    fn read_source(
        &self,
        raster: &E::Raster,
        po: &ProcessingOptions,
        trimmed: bool,
        image_type: ImageType,
    ) -> FrameState {
        let orientation = Orientation::from_exif(raster.orientation());
        let (src_width, src_height) =
            orientation.display_dimensions(raster.width(), raster.height());

        let mut crop_gravity = po.effective_crop_gravity();

        let width_to_scale = min_non_zero(po.crop.width, src_width);
        let height_to_scale = min_non_zero(po.crop.height, src_height);

        let scale = compute_scale(
            src_width,
            src_height,
            width_to_scale,
            height_to_scale,
            po,
            &self.config.auto_resize,
            image_type,
        );

        // Crop box and pixel offsets are expressed in source pixels
        let crop_width = scale_dimension(po.crop.width, scale);
        let crop_height = scale_dimension(po.crop.height, scale);
        if crop_gravity.kind != GravityType::FocusPoint {
            crop_gravity.x *= scale;
            crop_gravity.y *= scale;
        }

        tracing::debug!(
            src_width = src_width,
            src_height = src_height,
            orientation = raster.orientation(),
            scale = scale,
            crop_width = crop_width,
            crop_height = crop_height,
            "Scale calculated"
        );

        FrameState {
            trimmed,
            src_width,
            src_height,
            orientation,
            width_to_scale,
            height_to_scale,
            crop_width,
            crop_height,
            crop_gravity,
            scale,
            icc_imported: false,
            has_alpha: false,
        }
    }

    fn scale_on_load(
        &self,
        raster: &mut E::Raster,
        data: Option<&[u8]>,
        po: &ProcessingOptions,
        image_type: ImageType,
        state: &mut FrameState,
    ) -> TransformResult<()> {
        let Some(data) = data else {
            return Ok(());
        };
        if state.trimmed
            || state.scale == 1.0
            || !can_scale_on_load(image_type, state.scale, self.config.disable_shrink_on_load)
        {
            return Ok(());
        }

        let shrink = discrete_shrink(state.scale);
        if image_type != ImageType::Jpeg || shrink != 1 {
            let options = DecodeOptions {
                shrink,
                scale: state.scale,
                pages: Some(1),
            };
            *raster = self
                .engine
                .decode(data, image_type, options)
                .stage("scale-on-load")?;
        }

        let (new_width, new_height) = state
            .orientation
            .display_dimensions(raster.width(), raster.height());

        state.width_to_scale = scale_dimension(
            state.width_to_scale,
            new_width as f64 / state.src_width as f64,
        );
        state.height_to_scale = scale_dimension(
            state.height_to_scale,
            new_height as f64 / state.src_height as f64,
        );
        state.scale = compute_scale(
            state.src_width,
            state.src_height,
            state.width_to_scale,
            state.height_to_scale,
            po,
            &self.config.auto_resize,
            image_type,
        );

        tracing::debug!(
            shrink = shrink,
            width = raster.width(),
            height = raster.height(),
            scale = state.scale,
            "Scaled on load"
        );
        Ok(())
    }

    fn manage_colour(
        &self,
        raster: &mut E::Raster,
        po: &ProcessingOptions,
        state: &mut FrameState,
    ) -> TransformResult<()> {
        let convert_to_linear =
            self.config.use_linear_colorspace && (state.scale != 1.0 || po.dpr != 1.0);

        if convert_to_linear || !raster.is_srgb() {
            raster.import_profile(true).stage("colour management")?;
            state.icc_imported = true;
        }

        if convert_to_linear {
            raster.linear_colourspace().stage("colour management")?;
        } else {
            raster.rgb_colourspace().stage("colour management")?;
        }

        state.has_alpha = raster.has_alpha();
        Ok(())
    }

    fn resize(&self, raster: &mut E::Raster, state: &FrameState) -> TransformResult<()> {
        if state.scale != 1.0 {
            raster
                .resize(state.scale, state.has_alpha)
                .stage("resize")?;
        }
        self.copy_memory_and_check(raster, "resize")
    }

    fn orient(&self, raster: &mut E::Raster, state: &FrameState) -> TransformResult<()> {
        raster.rotate(state.orientation.angle).stage("rotate")?;
        if state.orientation.flip {
            raster.flip().stage("flip")?;
        }
        Ok(())
    }

    fn crop(
        &self,
        raster: &mut E::Raster,
        po: &ProcessingOptions,
        state: &FrameState,
    ) -> TransformResult<()> {
        let dpr_width = scale_dimension(po.width, po.dpr);
        let dpr_height = scale_dimension(po.height, po.dpr);

        self.crop_to(
            raster,
            state.crop_width,
            state.crop_height,
            &state.crop_gravity,
        )?;
        self.crop_to(raster, dpr_width, dpr_height, &po.gravity)
    }

    /// Crop to `width`x`height` (0 = keep that axis) positioned by `gravity`
    pub fn crop_to(
        &self,
        raster: &mut E::Raster,
        width: u32,
        height: u32,
        gravity: &Gravity,
    ) -> TransformResult<()> {
        if width == 0 && height == 0 {
            return Ok(());
        }

        let (img_width, img_height) = (raster.width(), raster.height());
        let width = min_non_zero(width, img_width);
        let height = min_non_zero(height, img_height);

        if width >= img_width && height >= img_height {
            return Ok(());
        }

        if gravity.kind == GravityType::Smart {
            raster.copy_memory().stage("smart crop")?;
            raster.smart_crop(width, height).stage("smart crop")?;
            return raster.copy_memory().stage("smart crop");
        }

        let (left, top) = compute_position(img_width, img_height, width, height, gravity, false);
        raster.crop(left, top, width, height).stage("crop")
    }

    fn limit_webp_dimensions(
        &self,
        raster: &mut E::Raster,
        po: &ProcessingOptions,
        state: &FrameState,
    ) -> TransformResult<()> {
        if po.format != ImageType::Webp {
            return Ok(());
        }

        let limit_shrink = raster.width().max(raster.height()) as f64 / WEBP_MAX_DIMENSION;
        if limit_shrink > 1.0 {
            raster
                .resize(1.0 / limit_shrink, state.has_alpha)
                .stage("webp limit")?;
            tracing::warn!(
                max_dimension = WEBP_MAX_DIMENSION as u32,
                width = raster.width(),
                height = raster.height(),
                "WebP dimension size is limited, image rescaled"
            );
        }

        self.copy_memory_and_check(raster, "webp limit")
    }

    fn convert_to_srgb(&self, raster: &mut E::Raster, state: &FrameState) -> TransformResult<()> {
        if !state.icc_imported {
            raster.import_profile(false).stage("colour management")?;
        }
        raster.rgb_colourspace().stage("colour management")
    }

    fn flatten(
        &self,
        raster: &mut E::Raster,
        po: &ProcessingOptions,
        state: &FrameState,
    ) -> TransformResult<()> {
        if state.has_alpha && !transparent_background(po) {
            raster.flatten(po.background).stage("flatten")?;
        }
        self.copy_memory_and_check(raster, "flatten")
    }

    fn apply_filters(&self, raster: &mut E::Raster, po: &ProcessingOptions) -> TransformResult<()> {
        if po.blur > 0.0 {
            raster.blur(po.blur).stage("blur")?;
        }
        if po.sharpen > 0.0 {
            raster.sharpen(po.sharpen).stage("sharpen")?;
        }
        self.copy_memory_and_check(raster, "filters")
    }

    fn extend(&self, raster: &mut E::Raster, po: &ProcessingOptions) -> TransformResult<()> {
        let (width, height) = (raster.width(), raster.height());
        if !po.extend.enabled || (po.width <= width && po.height <= height) {
            return Ok(());
        }

        // An unconstrained axis keeps the current size
        let canvas_width = po.width.max(width);
        let canvas_height = po.height.max(height);
        let (left, top) = compute_position(
            canvas_width,
            canvas_height,
            width,
            height,
            &po.extend.gravity,
            false,
        );
        raster
            .embed(
                canvas_width,
                canvas_height,
                left,
                top,
                po.background,
                transparent_background(po),
            )
            .stage("extend")
    }

    fn pad(&self, raster: &mut E::Raster, po: &ProcessingOptions) -> TransformResult<()> {
        if !po.padding.enabled {
            return Ok(());
        }

        let top = scale_dimension(po.padding.top, po.dpr);
        let right = scale_dimension(po.padding.right, po.dpr);
        let bottom = scale_dimension(po.padding.bottom, po.dpr);
        let left = scale_dimension(po.padding.left, po.dpr);

        let overflow = || TransformError::engine("padding", "padded size is out of range");
        let width = raster
            .width()
            .checked_add(left)
            .and_then(|w| w.checked_add(right))
            .ok_or_else(overflow)?;
        let height = raster
            .height()
            .checked_add(top)
            .and_then(|h| h.checked_add(bottom))
            .ok_or_else(overflow)?;
        let left = i32::try_from(left).map_err(|_| overflow())?;
        let top = i32::try_from(top).map_err(|_| overflow())?;

        raster
            .embed(
                width,
                height,
                left,
                top,
                po.background,
                transparent_background(po),
            )
            .stage("padding")
    }

    fn watermark_frame(&self, raster: &mut E::Raster, po: &ProcessingOptions) -> TransformResult<()> {
        match self.watermark {
            Some(payload) if po.watermark.enabled => {
                Watermark::apply(self.engine, self.config, raster, payload, &po.watermark, 1)
            }
            _ => Ok(()),
        }
    }

    fn finalize(&self, raster: &mut E::Raster) -> TransformResult<()> {
        raster.rgb_colourspace().stage("finalize")?;
        raster.cast_uchar().stage("finalize")?;
        self.copy_memory_and_check(raster, "finalize")
    }
}

/// Whether the output keeps transparency instead of flattening onto the background
pub fn transparent_background(po: &ProcessingOptions) -> bool {
    po.format.supports_alpha() && !po.flatten
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{ImageRaster, PixelEngine};
    use image::{DynamicImage, GenericImageView, Rgba, RgbaImage};
    use resizr_core::{ResizingType, TransformError};
    use std::time::Duration;

    fn raster(width: u32, height: u32) -> ImageRaster {
        ImageRaster::new(DynamicImage::ImageRgba8(RgbaImage::from_pixel(
            width,
            height,
            Rgba([30, 60, 90, 255]),
        )))
    }

    fn run(raster: &mut ImageRaster, po: &ProcessingOptions) -> TransformResult<()> {
        let engine = PixelEngine::new();
        let config = ProcessingConfig::default();
        let deadline = Deadline::none();
        FrameTransformer::new(&engine, &config, &deadline).transform(
            raster,
            None,
            po,
            ImageType::Png,
        )
    }

    fn options(width: u32, height: u32, mode: ResizingType) -> ProcessingOptions {
        ProcessingOptions {
            width,
            height,
            resizing_type: mode,
            format: ImageType::Png,
            ..ProcessingOptions::default()
        }
    }

    #[test]
    fn test_single_axis_resize() {
        let mut r = raster(2000, 1000);
        run(&mut r, &options(500, 0, ResizingType::Fit)).unwrap();
        assert_eq!((r.width(), r.height()), (500, 250));
    }

    #[test]
    fn test_no_enlarge_keeps_source_size() {
        let mut r = raster(100, 100);
        run(&mut r, &options(200, 200, ResizingType::Fit)).unwrap();
        assert_eq!((r.width(), r.height()), (100, 100));
    }

    #[test]
    fn test_fill_crops_to_request() {
        let mut r = raster(400, 200);
        run(&mut r, &options(100, 100, ResizingType::Fill)).unwrap();
        assert_eq!((r.width(), r.height()), (100, 100));
    }

    #[test]
    fn test_fit_keeps_aspect() {
        let mut r = raster(400, 200);
        run(&mut r, &options(100, 100, ResizingType::Fit)).unwrap();
        assert_eq!((r.width(), r.height()), (100, 50));
    }

    #[test]
    fn test_dpr_scales_output() {
        let mut r = raster(1000, 500);
        let mut po = options(100, 0, ResizingType::Fit);
        po.dpr = 2.0;
        run(&mut r, &po).unwrap();
        assert_eq!((r.width(), r.height()), (200, 100));
    }

    #[test]
    fn test_explicit_crop_box_with_gravity() {
        let mut img = RgbaImage::from_pixel(100, 100, Rgba([0, 0, 0, 255]));
        for y in 0..20 {
            for x in 80..100 {
                img.put_pixel(x, y, Rgba([255, 0, 0, 255]));
            }
        }
        let mut r = ImageRaster::new(DynamicImage::ImageRgba8(img));
        let mut po = options(0, 0, ResizingType::Fit);
        po.crop.width = 20;
        po.crop.height = 20;
        po.crop.gravity = Gravity::new(GravityType::NorthEast);
        run(&mut r, &po).unwrap();

        assert_eq!((r.width(), r.height()), (20, 20));
        assert_eq!(r.image().to_rgba8().get_pixel(10, 10), &Rgba([255, 0, 0, 255]));
    }

    #[test]
    fn test_crop_offsets_scale_with_image() {
        // 200x200 source scaled by 0.5; a 20px crop offset becomes 10px
        let mut img = RgbaImage::from_pixel(200, 200, Rgba([0, 0, 0, 255]));
        for y in 0..200 {
            for x in 0..40 {
                img.put_pixel(x, y, Rgba([0, 255, 0, 255]));
            }
        }
        let mut r = ImageRaster::new(DynamicImage::ImageRgba8(img));
        let mut po = options(50, 0, ResizingType::Fit);
        po.crop.width = 100;
        po.crop.gravity = Gravity::with_offset(GravityType::West, 20.0, 0.0);
        run(&mut r, &po).unwrap();

        assert_eq!((r.width(), r.height()), (50, 100));
        let out = r.image().to_rgba8();
        // crop starts 10px into the scaled image: first 10px of output are green
        assert!(out.get_pixel(2, 50)[1] > 200);
        assert!(out.get_pixel(30, 50)[1] < 50);
    }

    #[test]
    fn test_smart_crop_gravity() {
        let mut r = raster(300, 100);
        let mut po = options(100, 100, ResizingType::Fill);
        po.gravity = Gravity::new(GravityType::Smart);
        run(&mut r, &po).unwrap();
        assert_eq!((r.width(), r.height()), (100, 100));
    }

    #[test]
    fn test_extend_and_padding() {
        let mut r = raster(100, 100);
        let mut po = options(200, 150, ResizingType::Fit);
        po.extend.enabled = true;
        run(&mut r, &po).unwrap();
        assert_eq!((r.width(), r.height()), (200, 150));

        let mut r = raster(100, 100);
        let mut po = options(0, 0, ResizingType::Fit);
        po.padding.enabled = true;
        po.padding.top = 5;
        po.padding.bottom = 5;
        po.padding.left = 10;
        po.dpr = 2.0;
        run(&mut r, &po).unwrap();
        // dpr enlarges the image too: 200x200 plus 20px left, 10px top and bottom
        assert_eq!((r.width(), r.height()), (220, 220));
    }

    #[test]
    fn test_padding_overflow_is_an_error() {
        let mut r = raster(10, 10);
        let mut po = options(0, 0, ResizingType::Fit);
        po.padding.enabled = true;
        po.padding.left = u32::MAX;
        po.padding.right = 1;

        let err = run(&mut r, &po).unwrap_err();
        assert!(matches!(err, TransformError::Engine { stage: "padding", .. }), "got {:?}", err);
    }

    #[test]
    fn test_orientation_swaps_dimensions() {
        let mut r = raster(40, 20).with_orientation(6);
        run(&mut r, &options(0, 0, ResizingType::Fit)).unwrap();
        assert_eq!((r.width(), r.height()), (20, 40));

        // Requested size applies to the displayed orientation
        let mut r = raster(400, 200).with_orientation(8);
        run(&mut r, &options(100, 0, ResizingType::Fit)).unwrap();
        assert_eq!((r.width(), r.height()), (100, 200));
    }

    #[test]
    fn test_flatten_for_opaque_format() {
        let mut r = ImageRaster::new(DynamicImage::ImageRgba8(RgbaImage::from_pixel(
            10,
            10,
            Rgba([0, 0, 0, 0]),
        )));
        let mut po = options(0, 0, ResizingType::Fit);
        po.format = ImageType::Jpeg;
        run(&mut r, &po).unwrap();
        assert!(!r.has_alpha());
        assert_eq!(r.image().get_pixel(0, 0), Rgba([255, 255, 255, 255]));
    }

    #[test]
    fn test_webp_dimension_limit() {
        let mut r = raster(16400, 2);
        let mut po = options(0, 0, ResizingType::Fit);
        po.format = ImageType::Webp;
        run(&mut r, &po).unwrap();
        assert_eq!(r.width(), 16383);
    }

    #[test]
    fn test_linear_colorspace_round_trip() {
        let engine = PixelEngine::new();
        let config = ProcessingConfig {
            use_linear_colorspace: true,
            ..ProcessingConfig::default()
        };
        let deadline = Deadline::none();
        let mut r = raster(200, 100);
        FrameTransformer::new(&engine, &config, &deadline)
            .transform(&mut r, None, &options(100, 0, ResizingType::Fit), ImageType::Png)
            .unwrap();
        assert_eq!((r.width(), r.height()), (100, 50));
        assert!(!r.is_linear());
        let p = r.image().to_rgba8().get_pixel(50, 25).0;
        assert!((p[0] as i32 - 30).abs() <= 1);
        assert!((p[2] as i32 - 90).abs() <= 1);
    }

    #[test]
    fn test_expired_deadline_aborts() {
        let engine = PixelEngine::new();
        let config = ProcessingConfig::default();
        let deadline = Deadline::new(Duration::ZERO);
        let mut r = raster(50, 50);
        let err = FrameTransformer::new(&engine, &config, &deadline)
            .transform(&mut r, None, &options(10, 10, ResizingType::Fit), ImageType::Png)
            .unwrap_err();
        assert!(matches!(err, TransformError::Timeout { stage: "resize" }));
    }

    #[test]
    fn test_scale_on_load_reload() {
        let engine = PixelEngine::new();
        let config = ProcessingConfig::default();
        let deadline = Deadline::none();

        let mut source = raster(800, 400);
        let jpeg = engine
            .encode(&mut source, ImageType::Jpeg, 90, true)
            .unwrap();
        let mut r = engine
            .decode(&jpeg, ImageType::Jpeg, DecodeOptions::default())
            .unwrap();

        let mut po = options(200, 0, ResizingType::Fit);
        po.format = ImageType::Jpeg;
        FrameTransformer::new(&engine, &config, &deadline)
            .transform(&mut r, Some(&jpeg[..]), &po, ImageType::Jpeg)
            .unwrap();
        assert_eq!((r.width(), r.height()), (200, 100));
    }
}
