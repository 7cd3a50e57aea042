//! Animated sources: split the frame strip, transform every frame, join them back

use crate::engine::{
    DecodeOptions, ImageEngine, Raster, StageExt, META_DELAY, META_LOOP, META_N_PAGES,
    META_PAGE_HEIGHT,
};
use crate::geometry::{can_scale_on_load, check_dimensions, compute_scale};
use crate::transform::FrameTransformer;
use crate::watermark::Watermark;
use resizr_core::{ImageType, ProcessingOptions, TransformError, TransformResult};

pub struct AnimationHandler<'t, 'a, E: ImageEngine> {
    transformer: &'t FrameTransformer<'a, E>,
}

impl<'t, 'a, E: ImageEngine> AnimationHandler<'t, 'a, E> {
    pub fn new(transformer: &'t FrameTransformer<'a, E>) -> Self {
        Self { transformer }
    }

    /// Transform an animated raster in place.
    ///
    /// `raster` holds every decoded frame stacked vertically; `page-height` gives the
    /// height of one frame. Any failing frame aborts the whole image.
    pub fn transform(
        &self,
        raster: &mut E::Raster,
        data: &[u8],
        po: &ProcessingOptions,
        image_type: ImageType,
    ) -> TransformResult<()> {
        let config = self.transformer.config();
        let mut frame_options = po.clone();

        if frame_options.trim.enabled {
            tracing::warn!("Trim is not supported for animated images");
            frame_options.trim.enabled = false;
        }

        let mut width = raster.width();
        let mut frame_height = page_height(raster)?;

        let frames_count = ((raster.height() / frame_height) as usize)
            .min(config.max_animation_frames)
            .max(1);

        // The whole strip of frames we keep must fit the resolution limit
        check_dimensions(width, frame_height * frames_count as u32, config)?;

        let n_pages = raster.get_int(META_N_PAGES).unwrap_or(0);
        if n_pages > 0 {
            // No scale-on-load when cropping, the crop box is in source pixels
            let scale = if po.crop.width == 0 && po.crop.height == 0 {
                compute_scale(
                    width,
                    frame_height,
                    width,
                    frame_height,
                    po,
                    &config.auto_resize,
                    image_type,
                )
            } else {
                1.0
            };

            if n_pages > frames_count as i64
                || can_scale_on_load(image_type, scale, config.disable_shrink_on_load)
            {
                let options = DecodeOptions {
                    shrink: 1,
                    scale,
                    pages: Some(frames_count),
                };
                *raster = self
                    .transformer
                    .engine()
                    .decode(data, image_type, options)
                    .stage("animation reload")?;
            }

            width = raster.width();
            frame_height = page_height(raster)?;
        }

        let delay = raster.get_int(META_DELAY).stage("animation")?;
        let loop_count = raster.get_int(META_LOOP).stage("animation")?;

        let watermark_enabled = frame_options.watermark.enabled;
        frame_options.watermark.enabled = false;

        tracing::debug!(
            frames = frames_count,
            width = width,
            frame_height = frame_height,
            delay = delay,
            loop_count = loop_count,
            "Transforming animated image"
        );

        let mut frames = Vec::with_capacity(frames_count);
        for i in 0..frames_count as u32 {
            let mut frame = raster
                .extract(0, i * frame_height, width, frame_height)
                .stage("animation extract")?;

            self.transformer
                .transform(&mut frame, None, &frame_options, image_type)?;
            self.transformer
                .copy_memory_and_check(&mut frame, "animation frame")?;

            frames.push(frame);
        }

        let result_frame_height = frames
            .first()
            .map(|f| f.height())
            .ok_or_else(|| TransformError::engine("animation join", "no frames"))?;

        raster.join(frames).stage("animation join")?;

        if watermark_enabled {
            if let Some(payload) = self.transformer.watermark() {
                Watermark::apply(
                    self.transformer.engine(),
                    config,
                    raster,
                    payload,
                    &frame_options.watermark,
                    frames_count as u32,
                )?;
            }
        }

        raster.cast_uchar().stage("animation")?;
        self.transformer.copy_memory_and_check(raster, "animation")?;

        raster.set_int(META_PAGE_HEIGHT, result_frame_height as i64);
        raster.set_int(META_DELAY, delay);
        raster.set_int(META_LOOP, loop_count);
        raster.set_int(META_N_PAGES, frames_count as i64);

        Ok(())
    }
}

fn page_height<R: Raster>(raster: &R) -> TransformResult<u32> {
    let height = raster.get_int(META_PAGE_HEIGHT).stage("animation")?;
    if height <= 0 || height > raster.height() as i64 {
        return Err(TransformError::engine(
            "animation",
            format!("invalid page height {}", height),
        ));
    }
    Ok(height as u32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deadline::Deadline;
    use crate::engine::{ImageRaster, PixelEngine};
    use image::codecs::gif::{GifEncoder, Repeat};
    use image::{Delay, Frame, GenericImageView, Rgba, RgbaImage};
    use resizr_core::{ImagePayload, ProcessingConfig, ResizingType, WatermarkOptions};

    const COLORS: [[u8; 4]; 4] = [
        [255, 0, 0, 255],
        [0, 255, 0, 255],
        [0, 0, 255, 255],
        [255, 255, 0, 255],
    ];

    fn animated_gif(frames: usize, width: u32, height: u32) -> Vec<u8> {
        let mut out = Vec::new();
        {
            let mut encoder = GifEncoder::new(&mut out);
            encoder.set_repeat(Repeat::Infinite).unwrap();
            for i in 0..frames {
                let buffer = RgbaImage::from_pixel(width, height, Rgba(COLORS[i % COLORS.len()]));
                let frame = Frame::from_parts(buffer, 0, 0, Delay::from_numer_denom_ms(100, 1));
                encoder.encode_frame(frame).unwrap();
            }
        }
        out
    }

    fn config(max_frames: usize) -> ProcessingConfig {
        ProcessingConfig {
            max_animation_frames: max_frames,
            ..ProcessingConfig::default()
        }
    }

    fn decode_all(engine: &PixelEngine, data: &[u8]) -> ImageRaster {
        engine
            .decode(data, ImageType::Gif, DecodeOptions::all_pages())
            .unwrap()
    }

    fn options(width: u32, height: u32) -> ProcessingOptions {
        ProcessingOptions {
            width,
            height,
            resizing_type: ResizingType::Fill,
            format: ImageType::Gif,
            ..ProcessingOptions::default()
        }
    }

    #[test]
    fn test_frames_are_resized_and_joined() {
        let engine = PixelEngine::new();
        let config = config(10);
        let deadline = Deadline::none();
        let transformer = FrameTransformer::new(&engine, &config, &deadline);

        let data = animated_gif(3, 40, 20);
        let mut raster = decode_all(&engine, &data);

        AnimationHandler::new(&transformer)
            .transform(&mut raster, &data, &options(10, 10), ImageType::Gif)
            .unwrap();

        assert_eq!((raster.width(), raster.height()), (10, 30));
        assert_eq!(raster.get_int(META_PAGE_HEIGHT).unwrap(), 10);
        assert_eq!(raster.get_int(META_N_PAGES).unwrap(), 3);
        assert_eq!(raster.get_int(META_DELAY).unwrap(), 10);
        assert_eq!(raster.get_int(META_LOOP).unwrap(), 0);

        // Frame order survives the round trip
        for (i, color) in COLORS.iter().take(3).enumerate() {
            let pixel = raster.image().get_pixel(5, i as u32 * 10 + 5);
            for c in 0..3 {
                assert!((pixel[c] as i32 - color[c] as i32).abs() <= 8);
            }
        }
    }

    #[test]
    fn test_frame_count_is_capped() {
        let engine = PixelEngine::new();
        let config = config(2);
        let deadline = Deadline::none();
        let transformer = FrameTransformer::new(&engine, &config, &deadline);

        let data = animated_gif(4, 20, 20);
        let mut raster = decode_all(&engine, &data);

        AnimationHandler::new(&transformer)
            .transform(&mut raster, &data, &options(0, 0), ImageType::Gif)
            .unwrap();

        assert_eq!((raster.width(), raster.height()), (20, 40));
        assert_eq!(raster.get_int(META_N_PAGES).unwrap(), 2);
    }

    #[test]
    fn test_strip_resolution_is_checked() {
        let engine = PixelEngine::new();
        let config = ProcessingConfig {
            max_animation_frames: 10,
            max_src_resolution: 0.002,
            ..ProcessingConfig::default()
        };
        let deadline = Deadline::none();
        let transformer = FrameTransformer::new(&engine, &config, &deadline);

        // Six 20x20 frames make a 2400 pixel strip
        let data = animated_gif(6, 20, 20);
        let mut raster = decode_all(&engine, &data);

        let err = AnimationHandler::new(&transformer)
            .transform(&mut raster, &data, &options(0, 0), ImageType::Gif)
            .unwrap_err();
        assert!(matches!(err, TransformError::DimensionsTooLarge { .. }));
    }

    #[test]
    fn test_watermark_applied_once_per_frame() {
        let engine = PixelEngine::new();
        let config = config(10);
        let deadline = Deadline::none();

        let mut overlay_png = Vec::new();
        image::DynamicImage::ImageRgba8(RgbaImage::from_pixel(4, 4, Rgba([255, 255, 255, 255])))
            .write_to(
                &mut std::io::Cursor::new(&mut overlay_png),
                image::ImageFormat::Png,
            )
            .unwrap();
        let payload = ImagePayload::new(overlay_png, ImageType::Png);

        let transformer =
            FrameTransformer::new(&engine, &config, &deadline).with_watermark(Some(&payload));

        let data = animated_gif(2, 10, 10);
        let mut raster = decode_all(&engine, &data);
        let mut po = options(0, 0);
        po.watermark = WatermarkOptions {
            enabled: true,
            gravity: resizr_core::Gravity::new(resizr_core::GravityType::NorthWest),
            ..WatermarkOptions::default()
        };

        AnimationHandler::new(&transformer)
            .transform(&mut raster, &data, &po, ImageType::Gif)
            .unwrap();

        assert_eq!((raster.width(), raster.height()), (10, 20));
        for top in [0, 10] {
            assert_eq!(raster.image().get_pixel(1, top + 1), Rgba([255, 255, 255, 255]));
            assert_ne!(raster.image().get_pixel(8, top + 8), Rgba([255, 255, 255, 255]));
        }
    }
}
