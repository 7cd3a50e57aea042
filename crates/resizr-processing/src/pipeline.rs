//! Pipeline entry point
//!
//! Resolves the output format, applies degradations, decodes the source, hands it to
//! the frame transformer or the animation handler and encodes the result. Each
//! invocation runs on one pinned executor slot with its own deadline.

use crate::animation::AnimationHandler;
use crate::deadline::Deadline;
use crate::encoder::save_to_fit_bytes;
use crate::engine::{DecodeOptions, ImageEngine, Raster, StageExt};
use crate::executor::PinnedExecutor;
use crate::geometry::check_dimensions;
use crate::shared::SharedAssets;
use crate::sniff::{FormatSniffer, IcoSniffer};
use crate::transform::FrameTransformer;
use bytes::Bytes;
use resizr_core::{
    ErrorMetadata, FetchError, GravityType, ImagePayload, ImageType, LogLevel, ProcessingConfig,
    ProcessingOptions, TransformError, TransformResult,
};
use std::sync::Arc;
use std::time::Duration;

const SMART_CROP_NOT_SUPPORTED: &str = "Smart crop is not supported by the image engine";

/// Encoded output of one invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessedImage {
    pub data: Bytes,
    pub image_type: ImageType,
}

impl ProcessedImage {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn mime_type(&self) -> &'static str {
        self.image_type.mime_type()
    }

    /// Hand the buffer back once the caller is done with it
    pub fn release(self) {
        drop(self);
    }
}

pub struct Pipeline<E: ImageEngine> {
    engine: Arc<E>,
    config: Arc<ProcessingConfig>,
    assets: Arc<SharedAssets>,
    executor: PinnedExecutor,
    sniffer: Arc<dyn FormatSniffer>,
}

impl<E: ImageEngine> Clone for Pipeline<E> {
    fn clone(&self) -> Self {
        Self {
            engine: self.engine.clone(),
            config: self.config.clone(),
            assets: self.assets.clone(),
            executor: self.executor.clone(),
            sniffer: self.sniffer.clone(),
        }
    }
}

impl<E: ImageEngine> Pipeline<E> {
    pub fn new(engine: E, config: ProcessingConfig, assets: Arc<SharedAssets>) -> Self {
        let executor = PinnedExecutor::new(config.concurrency);
        Self {
            engine: Arc::new(engine),
            config: Arc::new(config),
            assets,
            executor,
            sniffer: Arc::new(IcoSniffer),
        }
    }

    pub fn with_sniffer(mut self, sniffer: Arc<dyn FormatSniffer>) -> Self {
        self.sniffer = sniffer;
        self
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn config(&self) -> &ProcessingConfig {
        &self.config
    }

    pub fn executor(&self) -> &PinnedExecutor {
        &self.executor
    }

    /// Transform on a pinned slot with the configured processing timeout
    pub async fn transform(
        &self,
        options: ProcessingOptions,
        payload: ImagePayload,
    ) -> TransformResult<ProcessedImage> {
        let deadline = Deadline::new(Duration::from_secs(self.config.processing_timeout_secs));
        self.transform_with_deadline(options, payload, deadline)
            .await
    }

    pub async fn transform_with_deadline(
        &self,
        options: ProcessingOptions,
        payload: ImagePayload,
        deadline: Deadline,
    ) -> TransformResult<ProcessedImage> {
        let pipeline = self.clone();
        self.executor
            .run(move || pipeline.process(options, payload, &deadline))
            .await
    }

    /// Transform the fetched source, or the fallback image when fetching failed
    pub async fn transform_or_fallback(
        &self,
        options: ProcessingOptions,
        fetched: Result<ImagePayload, FetchError>,
    ) -> TransformResult<ProcessedImage> {
        match fetched {
            Ok(payload) => self.transform(options, payload).await,
            Err(error) => match &self.assets.fallback {
                Some(fallback) => {
                    tracing::warn!(error = %error, "Source unavailable, using fallback image");
                    self.transform(options, fallback.clone()).await
                }
                None => {
                    let error = TransformError::from(error);
                    log_error(&error);
                    Err(error)
                }
            },
        }
    }

    /// Run one invocation on the current thread. Failures are logged once here.
    pub fn process(
        &self,
        options: ProcessingOptions,
        payload: ImagePayload,
        deadline: &Deadline,
    ) -> TransformResult<ProcessedImage> {
        let result = self.process_image(options, payload, deadline);
        if let Err(error) = &result {
            log_error(error);
        }
        result
    }

    /// Pick the output format when unset and enforce WebP when asked to
    pub fn resolve_format(
        &self,
        po: &mut ProcessingOptions,
        source_type: ImageType,
    ) -> TransformResult<()> {
        let engine = &self.engine;

        if po.format == ImageType::Unknown {
            po.format = if po.prefer_webp && engine.supports_save(ImageType::Webp) {
                ImageType::Webp
            } else if engine.supports_save(source_type) && source_type.good_for_web() {
                source_type
            } else {
                ImageType::Jpeg
            };
        } else if po.enforce_webp && engine.supports_save(ImageType::Webp) {
            po.format = ImageType::Webp;
        }

        if po.format != ImageType::Svg && !engine.supports_save(po.format) {
            return Err(TransformError::UnsupportedOutputFormat(po.format));
        }
        Ok(())
    }

    fn degrade_smart_crop(&self, po: &mut ProcessingOptions) {
        if self.engine.supports_smart_crop() {
            return;
        }
        if po.gravity.kind == GravityType::Smart {
            tracing::warn!("{}", SMART_CROP_NOT_SUPPORTED);
            po.gravity.kind = GravityType::Center;
        }
        if po.crop.gravity.kind == GravityType::Smart {
            tracing::warn!("{}", SMART_CROP_NOT_SUPPORTED);
            po.crop.gravity.kind = GravityType::Center;
        }
    }

    fn process_image(
        &self,
        mut po: ProcessingOptions,
        mut payload: ImagePayload,
        deadline: &Deadline,
    ) -> TransformResult<ProcessedImage> {
        let engine = self.engine.as_ref();

        self.resolve_format(&mut po, payload.image_type)?;

        if po.format == ImageType::Svg {
            if payload.image_type != ImageType::Svg {
                return Err(TransformError::VectorOutputOnly);
            }
            return Ok(ProcessedImage {
                data: payload.data,
                image_type: ImageType::Svg,
            });
        }

        if payload.image_type == ImageType::Ico {
            payload = self.sniffer.extract(&payload.data)?;
            if !engine.supports_load(payload.image_type) {
                return Err(TransformError::Sniff(format!(
                    "Can't load {} from ICO",
                    payload.image_type
                )));
            }
        }

        if !engine.supports_load(payload.image_type) {
            return Err(TransformError::UnsupportedSource(
                payload.image_type.to_string(),
            ));
        }

        self.degrade_smart_crop(&mut po);

        if po.normalize_legacy_crop() {
            tracing::warn!(
                "`crop` resizing type is deprecated and will be removed in future versions. Use the `crop` option instead"
            );
        }

        let animation_support = self.config.animation_enabled()
            && engine.supports_animation(payload.image_type)
            && engine.supports_animation(po.format);

        let decode_options = if animation_support {
            DecodeOptions::all_pages()
        } else {
            DecodeOptions::default()
        };

        // Header dimensions are checked before any pixels are allocated
        let (source_width, source_height) = engine
            .read_dimensions(&payload.data, payload.image_type)
            .map_err(|e| e.into_source_error("decode"))?;
        check_dimensions(source_width, source_height, &self.config)?;

        let mut raster = engine
            .decode(&payload.data, payload.image_type, decode_options)
            .map_err(|e| e.into_source_error("decode"))?;

        let animated = animation_support && raster.is_animated();

        tracing::debug!(
            source_type = %payload.image_type,
            format = %po.format,
            width = raster.width(),
            height = raster.height(),
            animated = animated,
            "Processing image"
        );

        let transformer = FrameTransformer::new(engine, &self.config, deadline)
            .with_watermark(self.assets.watermark.as_ref());

        if animated {
            AnimationHandler::new(&transformer).transform(
                &mut raster,
                &payload.data,
                &po,
                payload.image_type,
            )?;
        } else {
            transformer.transform(&mut raster, Some(&payload.data[..]), &po, payload.image_type)?;
        }

        transformer.copy_memory_and_check(&mut raster, "encode")?;

        let data = if po.max_bytes > 0 && po.format.can_fit_to_bytes() {
            save_to_fit_bytes(
                engine,
                &mut raster,
                po.format,
                po.quality,
                po.max_bytes,
                po.strip_metadata,
            )?
        } else {
            engine
                .encode(&mut raster, po.format, po.quality, po.strip_metadata)
                .stage("encode")?
        };

        tracing::debug!(
            format = %po.format,
            size = data.len(),
            "Image processed"
        );

        Ok(ProcessedImage {
            data,
            image_type: po.format,
        })
    }
}

fn log_error(error: &TransformError) {
    let error_type = error.error_code();
    match error.log_level() {
        LogLevel::Debug => {
            tracing::debug!(error = %error, error_type = error_type, "Error occurred");
        }
        LogLevel::Warn => {
            tracing::warn!(error = %error, error_type = error_type, "Error occurred");
        }
        LogLevel::Error => {
            tracing::error!(error = %error, error_type = error_type, "Error occurred");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::PixelEngine;
    use resizr_core::ResizingType;

    fn pipeline(config: ProcessingConfig) -> Pipeline<PixelEngine> {
        Pipeline::new(PixelEngine::new(), config, Arc::new(SharedAssets::default()))
    }

    fn resolve(source: ImageType, po: &mut ProcessingOptions) -> TransformResult<()> {
        pipeline(ProcessingConfig::default()).resolve_format(po, source)
    }

    #[test]
    fn test_format_resolution() {
        let mut po = ProcessingOptions::default();
        resolve(ImageType::Png, &mut po).unwrap();
        assert_eq!(po.format, ImageType::Png);

        let mut po = ProcessingOptions::default();
        resolve(ImageType::Tiff, &mut po).unwrap();
        assert_eq!(po.format, ImageType::Jpeg);

        let mut po = ProcessingOptions {
            prefer_webp: true,
            ..ProcessingOptions::default()
        };
        resolve(ImageType::Png, &mut po).unwrap();
        assert_eq!(po.format, ImageType::Webp);

        let mut po = ProcessingOptions {
            format: ImageType::Png,
            enforce_webp: true,
            ..ProcessingOptions::default()
        };
        resolve(ImageType::Jpeg, &mut po).unwrap();
        assert_eq!(po.format, ImageType::Webp);

        let mut po = ProcessingOptions {
            format: ImageType::Heic,
            ..ProcessingOptions::default()
        };
        assert!(matches!(
            resolve(ImageType::Jpeg, &mut po),
            Err(TransformError::UnsupportedOutputFormat(ImageType::Heic))
        ));
    }

    #[test]
    fn test_svg_handling() {
        let pipeline = pipeline(ProcessingConfig::default());
        let svg = ImagePayload::new(&b"<svg xmlns=\"http://www.w3.org/2000/svg\"/>"[..], ImageType::Svg);
        let po = ProcessingOptions {
            format: ImageType::Svg,
            ..ProcessingOptions::default()
        };

        let out = pipeline
            .process(po.clone(), svg.clone(), &Deadline::none())
            .unwrap();
        assert_eq!(out.data, svg.data);
        assert_eq!(out.image_type, ImageType::Svg);

        let png = ImagePayload::new(&b"\x89PNG\r\n\x1a\n"[..], ImageType::Png);
        assert!(matches!(
            pipeline.process(po, png, &Deadline::none()),
            Err(TransformError::VectorOutputOnly)
        ));

        // No SVG loader in the pixel engine
        let po = ProcessingOptions {
            format: ImageType::Png,
            ..ProcessingOptions::default()
        };
        assert!(matches!(
            pipeline.process(po, svg, &Deadline::none()),
            Err(TransformError::UnsupportedSource(_))
        ));
    }

    #[test]
    fn test_dimension_limit() {
        let config = ProcessingConfig {
            max_src_resolution: 0.0001,
            ..ProcessingConfig::default()
        };
        let pipeline = pipeline(config);

        let mut png = Vec::new();
        image::DynamicImage::new_rgb8(20, 20)
            .write_to(&mut std::io::Cursor::new(&mut png), image::ImageFormat::Png)
            .unwrap();

        let po = ProcessingOptions {
            width: 10,
            resizing_type: ResizingType::Fit,
            ..ProcessingOptions::default()
        };
        let err = pipeline
            .process(po, ImagePayload::new(png, ImageType::Png), &Deadline::none())
            .unwrap_err();
        assert!(matches!(err, TransformError::DimensionsTooLarge { width: 20, height: 20, .. }));
    }

    #[test]
    fn test_release() {
        let out = ProcessedImage {
            data: Bytes::from_static(b"abc"),
            image_type: ImageType::Png,
        };
        assert_eq!(out.len(), 3);
        assert_eq!(out.mime_type(), "image/png");
        out.release();
    }
}
