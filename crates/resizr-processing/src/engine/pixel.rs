//! Eager in-memory engine built on the `image` crate
//!
//! Every mutation is applied immediately, so [`Raster::copy_memory`] has nothing to
//! materialize. Encoders follow the format: mozjpeg for JPEG, libwebp for WebP,
//! ravif for AVIF and the `image` codecs for everything else.

use super::orientation::read_orientation;
use super::smart_crop::SmartCrop;
use super::{
    Angle, DecodeOptions, EngineError, ImageEngine, Raster, TrimParams, META_DELAY, META_LOOP,
    META_N_PAGES, META_PAGE_HEIGHT,
};
use bytes::Bytes;
use image::codecs::gif::{GifDecoder, GifEncoder, Repeat};
use image::imageops::{self, FilterType};
use image::{
    AnimationDecoder, Delay, DynamicImage, Frame, GenericImageView, ImageFormat, ImageReader,
    Rgb32FImage, Rgba, Rgba32FImage, RgbaImage,
};
use img_parts::{DynImage, ImageICC};
use resizr_core::{ImageType, Rgb};
use std::collections::HashMap;
use std::io::Cursor;

const NETSCAPE_EXTENSION: &[u8] = b"NETSCAPE2.0";
const AVIF_SPEED: u8 = 6;

/// Decoded image plus the metadata the pipeline reads and writes
pub struct ImageRaster {
    image: DynamicImage,
    meta: HashMap<String, i64>,
    orientation: u8,
    icc_profile: Option<Bytes>,
    profile_imported: bool,
    /// Pixels hold linear-light f32 values
    linear: bool,
}

impl ImageRaster {
    pub fn new(image: DynamicImage) -> Self {
        Self {
            image,
            meta: HashMap::new(),
            orientation: 1,
            icc_profile: None,
            profile_imported: false,
            linear: false,
        }
    }

    /// EXIF orientation tag (1-8) the pipeline should apply
    pub fn with_orientation(mut self, orientation: u8) -> Self {
        self.orientation = orientation;
        self
    }

    pub fn image(&self) -> &DynamicImage {
        &self.image
    }

    pub fn into_image(self) -> DynamicImage {
        self.image
    }

    pub fn icc_profile(&self) -> Option<&Bytes> {
        self.icc_profile.as_ref()
    }

    pub fn is_linear(&self) -> bool {
        self.linear
    }

    /// 8-bit sRGB copy of the pixels, whatever the working representation
    fn rgba8(&self) -> RgbaImage {
        if self.linear {
            let mut buffer = self.image.to_rgba32f();
            map_color_channels_rgba(&mut buffer, linear_to_srgb);
            DynamicImage::ImageRgba32F(buffer).to_rgba8()
        } else {
            self.image.to_rgba8()
        }
    }

    /// Store an 8-bit result, dropping the alpha channel when it isn't wanted
    fn set_rgba8(&mut self, buffer: RgbaImage, keep_alpha: bool) {
        let image = DynamicImage::ImageRgba8(buffer);
        self.image = if keep_alpha {
            image
        } else {
            DynamicImage::ImageRgb8(image.to_rgb8())
        };
        self.linear = false;
    }
}

/// Filter choice by downscale ratio: cheap filters for large reductions
pub fn select_filter(orig_width: u32, orig_height: u32, new_width: u32, new_height: u32) -> FilterType {
    let width_ratio = orig_width as f32 / new_width as f32;
    let height_ratio = orig_height as f32 / new_height as f32;
    let max_ratio = width_ratio.max(height_ratio);

    if max_ratio > 2.0 {
        FilterType::Triangle
    } else if max_ratio > 1.5 {
        FilterType::CatmullRom
    } else {
        FilterType::Lanczos3
    }
}

fn srgb_to_linear(c: f32) -> f32 {
    if c <= 0.04045 {
        c / 12.92
    } else {
        ((c + 0.055) / 1.055).powf(2.4)
    }
}

fn linear_to_srgb(c: f32) -> f32 {
    if c <= 0.003_130_8 {
        c * 12.92
    } else {
        1.055 * c.powf(1.0 / 2.4) - 0.055
    }
}

fn map_color_channels_rgba(buffer: &mut Rgba32FImage, f: fn(f32) -> f32) {
    for pixel in buffer.pixels_mut() {
        for c in 0..3 {
            pixel[c] = f(pixel[c]);
        }
    }
}

fn map_color_channels_rgb(buffer: &mut Rgb32FImage, f: fn(f32) -> f32) {
    for pixel in buffer.pixels_mut() {
        for c in 0..3 {
            pixel[c] = f(pixel[c]);
        }
    }
}

fn premultiply(buffer: &mut Rgba32FImage) {
    for pixel in buffer.pixels_mut() {
        let alpha = pixel[3];
        for c in 0..3 {
            pixel[c] *= alpha;
        }
    }
}

fn unpremultiply(buffer: &mut Rgba32FImage) {
    for pixel in buffer.pixels_mut() {
        let alpha = pixel[3];
        if alpha > 0.0 {
            for c in 0..3 {
                pixel[c] = (pixel[c] / alpha).min(1.0);
            }
        }
    }
}

fn check_box(raster_w: u32, raster_h: u32, left: i64, top: i64, width: u32, height: u32) -> Result<(), EngineError> {
    if width == 0
        || height == 0
        || left < 0
        || top < 0
        || left + width as i64 > raster_w as i64
        || top + height as i64 > raster_h as i64
    {
        return Err(EngineError::Operation(format!(
            "area {}x{}+{}+{} is outside of {}x{}",
            width, height, left, top, raster_w, raster_h
        )));
    }
    Ok(())
}

impl Raster for ImageRaster {
    fn width(&self) -> u32 {
        self.image.width()
    }

    fn height(&self) -> u32 {
        self.image.height()
    }

    fn has_alpha(&self) -> bool {
        self.image.color().has_alpha()
    }

    fn is_srgb(&self) -> bool {
        match &self.icc_profile {
            None => true,
            Some(_) if self.profile_imported => true,
            Some(profile) => profile.windows(4).any(|w| w == b"sRGB"),
        }
    }

    fn orientation(&self) -> u8 {
        self.orientation
    }

    fn get_int(&self, name: &str) -> Result<i64, EngineError> {
        self.meta
            .get(name)
            .copied()
            .ok_or_else(|| EngineError::MissingField(name.to_string()))
    }

    fn set_int(&mut self, name: &str, value: i64) {
        self.meta.insert(name.to_string(), value);
    }

    fn trim(&mut self, params: &TrimParams) -> Result<(), EngineError> {
        let rgba = self.rgba8();
        let (width, height) = rgba.dimensions();
        if width == 0 || height == 0 {
            return Ok(());
        }

        let background = if params.smart {
            let p = rgba.get_pixel(0, 0);
            [p[0], p[1], p[2]]
        } else {
            [params.color.r, params.color.g, params.color.b]
        };

        let differs = |p: &Rgba<u8>| {
            (0..3).any(|c| (p[c] as f64 - background[c] as f64).abs() > params.threshold)
        };

        let (mut min_x, mut min_y, mut max_x, mut max_y) = (u32::MAX, u32::MAX, 0u32, 0u32);
        for (x, y, pixel) in rgba.enumerate_pixels() {
            if differs(pixel) {
                min_x = min_x.min(x);
                min_y = min_y.min(y);
                max_x = max_x.max(x);
                max_y = max_y.max(y);
            }
        }

        if min_x == u32::MAX {
            tracing::debug!("Nothing to trim, image is uniform");
            return Ok(());
        }

        let (mut left, mut right) = (min_x, width - 1 - max_x);
        let (mut top, mut bottom) = (min_y, height - 1 - max_y);
        if params.equal_hor {
            let margin = left.min(right);
            left = margin;
            right = margin;
        }
        if params.equal_ver {
            let margin = top.min(bottom);
            top = margin;
            bottom = margin;
        }

        self.image = self
            .image
            .crop_imm(left, top, width - left - right, height - top - bottom);
        Ok(())
    }

    fn resize(&mut self, scale: f64, has_alpha: bool) -> Result<(), EngineError> {
        if scale <= 0.0 || !scale.is_finite() {
            return Err(EngineError::Operation(format!("invalid resize scale {}", scale)));
        }

        let (width, height) = self.image.dimensions();
        let new_width = ((width as f64 * scale).round() as u32).max(1);
        let new_height = ((height as f64 * scale).round() as u32).max(1);
        if (new_width, new_height) == (width, height) {
            return Ok(());
        }

        let filter = select_filter(width, height, new_width, new_height);

        if has_alpha && self.has_alpha() {
            // Resample premultiplied so transparent pixels don't bleed their color
            let mut buffer = self.image.to_rgba32f();
            premultiply(&mut buffer);
            let mut resized = imageops::resize(&buffer, new_width, new_height, filter);
            unpremultiply(&mut resized);
            let resized = DynamicImage::ImageRgba32F(resized);
            self.image = if self.linear {
                resized
            } else {
                DynamicImage::ImageRgba8(resized.to_rgba8())
            };
        } else {
            self.image = self.image.resize_exact(new_width, new_height, filter);
        }
        Ok(())
    }

    fn rotate(&mut self, angle: Angle) -> Result<(), EngineError> {
        self.image = match angle {
            Angle::D0 => return Ok(()),
            Angle::D90 => self.image.rotate90(),
            Angle::D180 => self.image.rotate180(),
            Angle::D270 => self.image.rotate270(),
        };
        Ok(())
    }

    fn flip(&mut self) -> Result<(), EngineError> {
        self.image = self.image.fliph();
        Ok(())
    }

    fn crop(&mut self, left: i32, top: i32, width: u32, height: u32) -> Result<(), EngineError> {
        check_box(
            self.width(),
            self.height(),
            left as i64,
            top as i64,
            width,
            height,
        )?;
        self.image = self.image.crop_imm(left as u32, top as u32, width, height);
        Ok(())
    }

    fn smart_crop(&mut self, width: u32, height: u32) -> Result<(), EngineError> {
        let width = width.min(self.width());
        let height = height.min(self.height());
        let (left, top) = SmartCrop::find_best_window(&self.image, width, height);
        self.image = self.image.crop_imm(left, top, width, height);
        Ok(())
    }

    fn import_profile(&mut self, linear: bool) -> Result<(), EngineError> {
        if let Some(profile) = &self.icc_profile {
            if !self.profile_imported {
                // No CMS here: pixels are kept as-is and the profile is re-attached on save
                tracing::debug!(
                    profile_bytes = profile.len(),
                    linear = linear,
                    "Embedded colour profile treated as sRGB"
                );
                self.profile_imported = true;
            }
        }
        Ok(())
    }

    fn linear_colourspace(&mut self) -> Result<(), EngineError> {
        if self.linear {
            return Ok(());
        }
        self.image = if self.has_alpha() {
            let mut buffer = self.image.to_rgba32f();
            map_color_channels_rgba(&mut buffer, srgb_to_linear);
            DynamicImage::ImageRgba32F(buffer)
        } else {
            let mut buffer = self.image.to_rgb32f();
            map_color_channels_rgb(&mut buffer, srgb_to_linear);
            DynamicImage::ImageRgb32F(buffer)
        };
        self.linear = true;
        Ok(())
    }

    fn rgb_colourspace(&mut self) -> Result<(), EngineError> {
        if !self.linear {
            return Ok(());
        }
        self.image = if self.has_alpha() {
            let mut buffer = self.image.to_rgba32f();
            map_color_channels_rgba(&mut buffer, linear_to_srgb);
            DynamicImage::ImageRgba8(DynamicImage::ImageRgba32F(buffer).to_rgba8())
        } else {
            let mut buffer = self.image.to_rgb32f();
            map_color_channels_rgb(&mut buffer, linear_to_srgb);
            DynamicImage::ImageRgb8(DynamicImage::ImageRgb32F(buffer).to_rgb8())
        };
        self.linear = false;
        Ok(())
    }

    fn flatten(&mut self, background: Rgb) -> Result<(), EngineError> {
        if !self.has_alpha() {
            return Ok(());
        }

        let mut bg = [
            background.r as f32 / 255.0,
            background.g as f32 / 255.0,
            background.b as f32 / 255.0,
        ];
        if self.linear {
            bg = bg.map(srgb_to_linear);
        }

        let source = self.image.to_rgba32f();
        let flattened = Rgb32FImage::from_fn(source.width(), source.height(), |x, y| {
            let p = source.get_pixel(x, y);
            let a = p[3];
            image::Rgb([
                p[0] * a + bg[0] * (1.0 - a),
                p[1] * a + bg[1] * (1.0 - a),
                p[2] * a + bg[2] * (1.0 - a),
            ])
        });

        let flattened = DynamicImage::ImageRgb32F(flattened);
        self.image = if self.linear {
            flattened
        } else {
            DynamicImage::ImageRgb8(flattened.to_rgb8())
        };
        Ok(())
    }

    fn blur(&mut self, sigma: f32) -> Result<(), EngineError> {
        self.image = self.image.blur(sigma);
        Ok(())
    }

    fn sharpen(&mut self, sigma: f32) -> Result<(), EngineError> {
        self.image = self.image.unsharpen(sigma, 1);
        Ok(())
    }

    fn embed(
        &mut self,
        width: u32,
        height: u32,
        left: i32,
        top: i32,
        background: Rgb,
        transparent: bool,
    ) -> Result<(), EngineError> {
        if width == 0 || height == 0 {
            return Err(EngineError::Operation(format!(
                "can't embed into {}x{}",
                width, height
            )));
        }

        let fill = Rgba([
            background.r,
            background.g,
            background.b,
            if transparent { 0 } else { 255 },
        ]);
        let keep_alpha = transparent || self.has_alpha();
        let mut canvas = RgbaImage::from_pixel(width, height, fill);
        imageops::replace(&mut canvas, &self.rgba8(), left as i64, top as i64);
        self.set_rgba8(canvas, keep_alpha);
        Ok(())
    }

    fn replicate(&mut self, width: u32, height: u32) -> Result<(), EngineError> {
        let tile = self.rgba8();
        let (tile_w, tile_h) = tile.dimensions();
        if tile_w == 0 || tile_h == 0 {
            return Err(EngineError::Operation("can't replicate an empty image".into()));
        }

        let keep_alpha = self.has_alpha();
        let mut canvas = RgbaImage::new(width, height);
        for y in (0..height).step_by(tile_h as usize) {
            for x in (0..width).step_by(tile_w as usize) {
                imageops::replace(&mut canvas, &tile, x as i64, y as i64);
            }
        }
        self.set_rgba8(canvas, keep_alpha);
        Ok(())
    }

    fn ensure_alpha(&mut self) -> Result<(), EngineError> {
        if self.has_alpha() {
            return Ok(());
        }
        self.image = if self.linear {
            DynamicImage::ImageRgba32F(self.image.to_rgba32f())
        } else {
            DynamicImage::ImageRgba8(self.image.to_rgba8())
        };
        Ok(())
    }

    fn apply_watermark(&mut self, overlay: &Self, opacity: f64) -> Result<(), EngineError> {
        let opacity = opacity.clamp(0.0, 1.0);
        let overlay = overlay.rgba8();
        let keep_alpha = self.has_alpha();
        let mut base = self.rgba8();

        let (ow, oh) = overlay.dimensions();
        for (x, y, pixel) in base.enumerate_pixels_mut() {
            if x >= ow || y >= oh {
                continue;
            }
            let over = overlay.get_pixel(x, y);
            let a_over = over[3] as f64 / 255.0 * opacity;
            if a_over <= 0.0 {
                continue;
            }
            let a_base = if keep_alpha {
                pixel[3] as f64 / 255.0
            } else {
                1.0
            };
            let a_out = a_over + a_base * (1.0 - a_over);
            for c in 0..3 {
                let blended =
                    (over[c] as f64 * a_over + pixel[c] as f64 * a_base * (1.0 - a_over)) / a_out;
                pixel[c] = blended.round().clamp(0.0, 255.0) as u8;
            }
            pixel[3] = (a_out * 255.0).round().clamp(0.0, 255.0) as u8;
        }

        self.set_rgba8(base, keep_alpha);
        Ok(())
    }

    fn copy_memory(&mut self) -> Result<(), EngineError> {
        Ok(())
    }

    fn extract(&self, left: u32, top: u32, width: u32, height: u32) -> Result<Self, EngineError> {
        check_box(
            self.width(),
            self.height(),
            left as i64,
            top as i64,
            width,
            height,
        )?;
        Ok(Self {
            image: self.image.crop_imm(left, top, width, height),
            meta: HashMap::new(),
            orientation: 1,
            icc_profile: self.icc_profile.clone(),
            profile_imported: self.profile_imported,
            linear: self.linear,
        })
    }

    fn join(&mut self, frames: Vec<Self>) -> Result<(), EngineError> {
        if frames.is_empty() {
            return Err(EngineError::Operation("no frames to join".into()));
        }

        let width = frames.iter().map(|f| f.width()).max().unwrap_or(0);
        let height: u32 = frames.iter().map(|f| f.height()).sum();
        let keep_alpha = frames.iter().any(|f| f.has_alpha());

        let mut strip = RgbaImage::new(width, height);
        let mut top = 0i64;
        for frame in &frames {
            imageops::replace(&mut strip, &frame.rgba8(), 0, top);
            top += frame.height() as i64;
        }

        self.set_rgba8(strip, keep_alpha);
        Ok(())
    }

    fn cast_uchar(&mut self) -> Result<(), EngineError> {
        self.rgb_colourspace()?;
        let has_alpha = self.has_alpha();
        self.image = match std::mem::replace(&mut self.image, DynamicImage::new_rgb8(0, 0)) {
            image @ (DynamicImage::ImageRgb8(_)
            | DynamicImage::ImageRgba8(_)
            | DynamicImage::ImageLuma8(_)
            | DynamicImage::ImageLumaA8(_)) => image,
            other if has_alpha => DynamicImage::ImageRgba8(other.to_rgba8()),
            other => DynamicImage::ImageRgb8(other.to_rgb8()),
        };
        Ok(())
    }
}

/// Reference engine over the `image` crate family
#[derive(Debug, Clone)]
pub struct PixelEngine {
    smart_crop: bool,
}

impl Default for PixelEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl PixelEngine {
    pub fn new() -> Self {
        Self { smart_crop: true }
    }

    /// Engine that reports no smart crop support
    pub fn without_smart_crop() -> Self {
        Self { smart_crop: false }
    }

    fn image_format(image_type: ImageType) -> Option<ImageFormat> {
        match image_type {
            ImageType::Jpeg => Some(ImageFormat::Jpeg),
            ImageType::Png => Some(ImageFormat::Png),
            ImageType::Webp => Some(ImageFormat::WebP),
            ImageType::Gif => Some(ImageFormat::Gif),
            ImageType::Ico => Some(ImageFormat::Ico),
            ImageType::Bmp => Some(ImageFormat::Bmp),
            ImageType::Tiff => Some(ImageFormat::Tiff),
            ImageType::Avif => Some(ImageFormat::Avif),
            _ => None,
        }
    }

    fn read_icc_profile(data: &[u8]) -> Option<Bytes> {
        DynImage::from_bytes(Bytes::copy_from_slice(data))
            .ok()
            .flatten()
            .and_then(|img| img.icc_profile())
    }

    fn attach_icc_profile(data: Bytes, profile: Bytes) -> Bytes {
        match DynImage::from_bytes(data.clone()) {
            Ok(Some(mut img)) => {
                img.set_icc_profile(Some(profile));
                img.encoder().bytes()
            }
            _ => data,
        }
    }

    /// Loop count from the NETSCAPE2.0 application extension.
    ///
    /// 0 plays forever, otherwise the number of plays. Without the extension the
    /// animation plays once.
    fn read_gif_loop(data: &[u8]) -> i64 {
        let position = data
            .windows(NETSCAPE_EXTENSION.len())
            .position(|w| w == NETSCAPE_EXTENSION);
        let Some(start) = position else {
            return 1;
        };
        let block = &data[start + NETSCAPE_EXTENSION.len()..];
        match block {
            [0x03, 0x01, lo, hi, ..] => {
                let repeats = u16::from_le_bytes([*lo, *hi]) as i64;
                if repeats == 0 {
                    0
                } else {
                    repeats + 1
                }
            }
            _ => 1,
        }
    }

    fn decode_gif_frames(data: &[u8], pages: Option<usize>) -> Result<ImageRaster, EngineError> {
        let decode_err = |e: image::ImageError| EngineError::Decode(ImageType::Gif, e.to_string());

        let decoder = GifDecoder::new(Cursor::new(data)).map_err(decode_err)?;
        let mut frames: Vec<RgbaImage> = Vec::new();
        let mut total = 0i64;
        let mut delay_ms: Option<u32> = None;

        // A limited decode stops early; n-pages then counts only the loaded frames
        let limit = pages.unwrap_or(usize::MAX);
        for frame in decoder.into_frames().take(limit) {
            let frame = frame.map_err(decode_err)?;
            total += 1;
            if delay_ms.is_none() {
                let (numer, denom) = frame.delay().numer_denom_ms();
                delay_ms = Some(numer / denom.max(1));
            }
            frames.push(frame.into_buffer());
        }

        let Some(first) = frames.first() else {
            return Err(EngineError::Decode(ImageType::Gif, "no frames".into()));
        };
        let (width, frame_height) = first.dimensions();

        let mut strip = RgbaImage::new(width, frame_height * frames.len() as u32);
        for (i, frame) in frames.iter().enumerate() {
            imageops::replace(&mut strip, frame, 0, (i as u32 * frame_height) as i64);
        }

        let mut raster = ImageRaster::new(DynamicImage::ImageRgba8(strip));
        raster.set_int(META_PAGE_HEIGHT, frame_height as i64);
        raster.set_int(META_N_PAGES, total);
        raster.set_int(META_DELAY, (delay_ms.unwrap_or(0) / 10) as i64);
        raster.set_int(META_LOOP, Self::read_gif_loop(data));
        Ok(raster)
    }

    fn encode_jpeg(image: &DynamicImage, quality: u8) -> Result<Vec<u8>, EngineError> {
        let encode_err = |e: std::io::Error| EngineError::Encode(ImageType::Jpeg, e.to_string());
        let rgb_img = image.to_rgb8();
        let (width, height) = rgb_img.dimensions();

        let mut comp = mozjpeg::Compress::new(mozjpeg::ColorSpace::JCS_RGB);
        comp.set_size(width as usize, height as usize);
        comp.set_quality(quality.max(1) as f32);
        comp.set_progressive_mode();
        comp.set_optimize_coding(true);

        let mut comp = comp.start_compress(Vec::new()).map_err(encode_err)?;
        comp.write_scanlines(&rgb_img).map_err(encode_err)?;
        comp.finish().map_err(encode_err)
    }

    fn encode_webp(image: &DynamicImage, quality: u8) -> Vec<u8> {
        let (width, height) = image.dimensions();
        if image.color().has_alpha() {
            let rgba = image.to_rgba8();
            webp::Encoder::from_rgba(&rgba, width, height)
                .encode(quality as f32)
                .to_vec()
        } else {
            let rgb = image.to_rgb8();
            webp::Encoder::from_rgb(&rgb, width, height)
                .encode(quality as f32)
                .to_vec()
        }
    }

    fn encode_avif(image: &DynamicImage, quality: u8) -> Result<Vec<u8>, EngineError> {
        let encode_err = |e: ravif::Error| EngineError::Encode(ImageType::Avif, e.to_string());
        let (width, height) = image.dimensions();
        let encoder = ravif::Encoder::new()
            .with_quality(quality as f32)
            .with_speed(AVIF_SPEED);

        let encoded = if image.color().has_alpha() {
            let pixels: Vec<rgb::RGBA8> = image
                .to_rgba8()
                .pixels()
                .map(|p| rgb::RGBA8::new(p[0], p[1], p[2], p[3]))
                .collect();
            encoder
                .encode_rgba(ravif::Img::new(pixels.as_slice(), width as usize, height as usize))
                .map_err(encode_err)?
        } else {
            let pixels: Vec<rgb::RGB8> = image
                .to_rgb8()
                .pixels()
                .map(|p| rgb::RGB8::new(p[0], p[1], p[2]))
                .collect();
            encoder
                .encode_rgb(ravif::Img::new(pixels.as_slice(), width as usize, height as usize))
                .map_err(encode_err)?
        };

        Ok(encoded.avif_file)
    }

    fn encode_gif(raster: &ImageRaster) -> Result<Vec<u8>, EngineError> {
        let encode_err = |e: image::ImageError| EngineError::Encode(ImageType::Gif, e.to_string());
        let rgba = raster.rgba8();
        let (width, height) = rgba.dimensions();

        let page_height = raster
            .get_int(META_PAGE_HEIGHT)
            .ok()
            .filter(|h| *h > 0 && (*h as u32) <= height)
            .map(|h| h as u32)
            .unwrap_or(height);
        let frame_count = height / page_height;
        let delay_cs = raster.get_int(META_DELAY).unwrap_or(0).max(0) as u32;
        let loop_count = raster.get_int(META_LOOP).unwrap_or(0);

        let mut buffer = Vec::new();
        {
            let mut encoder = GifEncoder::new(&mut buffer);
            if frame_count > 1 {
                match loop_count {
                    0 => encoder.set_repeat(Repeat::Infinite).map_err(encode_err)?,
                    1 => {}
                    n => encoder
                        .set_repeat(Repeat::Finite((n - 1).min(u16::MAX as i64) as u16))
                        .map_err(encode_err)?,
                }
            }

            let frames = (0..frame_count).map(|i| {
                let page = imageops::crop_imm(&rgba, 0, i * page_height, width, page_height);
                Frame::from_parts(
                    page.to_image(),
                    0,
                    0,
                    Delay::from_numer_denom_ms(delay_cs * 10, 1),
                )
            });
            encoder.encode_frames(frames).map_err(encode_err)?;
        }
        Ok(buffer)
    }

    fn encode_with_image(image: &DynamicImage, format: ImageType) -> Result<Vec<u8>, EngineError> {
        let image_format = Self::image_format(format).ok_or(EngineError::Unsupported(format))?;
        let mut buffer = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut buffer), image_format)
            .map_err(|e| EngineError::Encode(format, e.to_string()))?;
        Ok(buffer)
    }
}

impl ImageEngine for PixelEngine {
    type Raster = ImageRaster;

    fn decode(
        &self,
        data: &[u8],
        image_type: ImageType,
        options: DecodeOptions,
    ) -> Result<ImageRaster, EngineError> {
        if !self.supports_load(image_type) {
            return Err(EngineError::Unsupported(image_type));
        }

        let mut raster = if image_type == ImageType::Gif && options.pages != Some(1) {
            Self::decode_gif_frames(data, options.pages)?
        } else {
            let format =
                Self::image_format(image_type).ok_or(EngineError::Unsupported(image_type))?;
            let image = image::load_from_memory_with_format(data, format)
                .map_err(|e| EngineError::Decode(image_type, e.to_string()))?;
            ImageRaster::new(image)
        };

        if image_type != ImageType::Gif {
            raster.orientation = read_orientation(data);
            raster.icc_profile = Self::read_icc_profile(data);
        }

        let (width, height) = raster.image.dimensions();
        match image_type {
            ImageType::Jpeg if options.shrink > 1 => {
                let shrink = options.shrink;
                let new_width = width.div_ceil(shrink).max(1);
                let new_height = height.div_ceil(shrink).max(1);
                raster.image = raster.image.thumbnail_exact(new_width, new_height);
            }
            ImageType::Webp if options.scale > 0.0 && options.scale < 1.0 => {
                let new_width = ((width as f64 * options.scale).round() as u32).max(1);
                let new_height = ((height as f64 * options.scale).round() as u32).max(1);
                raster.image = raster.image.thumbnail_exact(new_width, new_height);
            }
            _ => {}
        }

        tracing::debug!(
            image_type = %image_type,
            width = raster.width(),
            height = raster.height(),
            shrink = options.shrink,
            scale = options.scale,
            "Image decoded"
        );

        Ok(raster)
    }

    fn encode(
        &self,
        raster: &mut ImageRaster,
        format: ImageType,
        quality: u8,
        strip_metadata: bool,
    ) -> Result<Bytes, EngineError> {
        if !self.supports_save(format) {
            return Err(EngineError::Unsupported(format));
        }
        raster.cast_uchar()?;

        let data = match format {
            ImageType::Jpeg => Self::encode_jpeg(&raster.image, quality)?,
            ImageType::Webp => Self::encode_webp(&raster.image, quality),
            ImageType::Avif => Self::encode_avif(&raster.image, quality)?,
            ImageType::Gif => Self::encode_gif(raster)?,
            other => Self::encode_with_image(&raster.image, other)?,
        };
        let mut data = Bytes::from(data);

        if !strip_metadata {
            if let Some(profile) = raster.icc_profile.clone() {
                data = Self::attach_icc_profile(data, profile);
            }
        }

        Ok(data)
    }

    fn read_dimensions(
        &self,
        data: &[u8],
        image_type: ImageType,
    ) -> Result<(u32, u32), EngineError> {
        let format = Self::image_format(image_type).ok_or(EngineError::Unsupported(image_type))?;
        let mut reader = ImageReader::with_format(Cursor::new(data), format);
        reader.no_limits();
        reader
            .into_dimensions()
            .map_err(|e| EngineError::Decode(image_type, e.to_string()))
    }

    fn supports_load(&self, image_type: ImageType) -> bool {
        matches!(
            image_type,
            ImageType::Jpeg
                | ImageType::Png
                | ImageType::Webp
                | ImageType::Gif
                | ImageType::Ico
                | ImageType::Bmp
                | ImageType::Tiff
        )
    }

    fn supports_save(&self, image_type: ImageType) -> bool {
        matches!(
            image_type,
            ImageType::Jpeg
                | ImageType::Png
                | ImageType::Webp
                | ImageType::Gif
                | ImageType::Ico
                | ImageType::Bmp
                | ImageType::Tiff
                | ImageType::Avif
        )
    }

    fn supports_smart_crop(&self) -> bool {
        self.smart_crop
    }

    fn supports_animation(&self, image_type: ImageType) -> bool {
        image_type == ImageType::Gif
    }
}
