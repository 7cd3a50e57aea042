//! Configuration module
//!
//! Process-wide, read-only settings for the transform pipeline, loaded from the
//! environment (and an optional `.env` file) once at startup.

use crate::models::ResizingType;
use std::env;
use std::str::FromStr;

const MAX_SRC_RESOLUTION_MP: f64 = 16.8;
const MAX_ANIMATION_FRAMES: usize = 1;
const WATERMARK_OPACITY: f64 = 1.0;
const PROCESSING_TIMEOUT_SECS: u64 = 10;

/// Policy that turns the `auto` resizing type into fit or fill
#[derive(Clone, Debug, PartialEq)]
pub enum AutoResizePolicy {
    /// Fill when source and request share an orientation, fit otherwise
    OrientationMatch,
    /// Business-specific rules: exact request sizes that always fill, and a request
    /// aspect ratio that fits whenever the source is at least as wide
    AspectRatio {
        fill_sizes: Vec<(u32, u32)>,
        fit_ratio: f64,
    },
}

impl Default for AutoResizePolicy {
    fn default() -> Self {
        AutoResizePolicy::OrientationMatch
    }
}

impl AutoResizePolicy {
    /// Resolve `auto` for a request of `req_w`x`req_h` against a `src_w`x`src_h` source
    pub fn resolve(&self, req_w: u32, req_h: u32, src_w: u32, src_h: u32) -> ResizingType {
        match self {
            AutoResizePolicy::OrientationMatch => {
                let src_landscape = src_w >= src_h;
                let dst_landscape = req_w >= req_h;
                if src_landscape == dst_landscape {
                    ResizingType::Fill
                } else {
                    ResizingType::Fit
                }
            }
            AutoResizePolicy::AspectRatio {
                fill_sizes,
                fit_ratio,
            } => {
                if fill_sizes.contains(&(req_w, req_h)) {
                    return ResizingType::Fill;
                }
                if req_h == 0 || src_h == 0 {
                    return ResizingType::Fill;
                }
                let req_ratio = req_w as f64 / req_h as f64;
                let src_ratio = src_w as f64 / src_h as f64;
                if (req_ratio - fit_ratio).abs() < 1e-9 && src_ratio >= *fit_ratio {
                    ResizingType::Fit
                } else {
                    ResizingType::Fill
                }
            }
        }
    }

    /// Parse `"696x928,375x500"` into size pairs
    pub fn parse_sizes(s: &str) -> Result<Vec<(u32, u32)>, anyhow::Error> {
        s.split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(|part| {
                let (w, h) = part
                    .split_once('x')
                    .ok_or_else(|| anyhow::anyhow!("Invalid size '{}', expected WxH", part))?;
                Ok((
                    w.parse()
                        .map_err(|_| anyhow::anyhow!("Invalid width in '{}'", part))?,
                    h.parse()
                        .map_err(|_| anyhow::anyhow!("Invalid height in '{}'", part))?,
                ))
            })
            .collect()
    }
}

/// Transform pipeline configuration
#[derive(Clone, Debug)]
pub struct ProcessingConfig {
    /// Maximum source resolution in megapixels
    pub max_src_resolution: f64,
    /// Maximum source size in bytes, 0 = unlimited
    pub max_src_file_size: usize,
    /// Frames processed for animated sources; 1 disables animation support
    pub max_animation_frames: usize,
    /// Global multiplier applied to every watermark's own opacity
    pub watermark_opacity: f64,
    pub use_linear_colorspace: bool,
    pub disable_shrink_on_load: bool,
    pub processing_timeout_secs: u64,
    /// Number of pinned worker slots
    pub concurrency: usize,
    pub auto_resize: AutoResizePolicy,
    // Shared watermark sources (first match wins: data, path, text)
    pub watermark_data: Option<String>,
    pub watermark_path: Option<String>,
    pub watermark_text: Option<String>,
    pub watermark_font_path: Option<String>,
    // Fallback image served when the source can't be fetched
    pub fallback_image_data: Option<String>,
    pub fallback_image_path: Option<String>,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            max_src_resolution: MAX_SRC_RESOLUTION_MP,
            max_src_file_size: 0,
            max_animation_frames: MAX_ANIMATION_FRAMES,
            watermark_opacity: WATERMARK_OPACITY,
            use_linear_colorspace: false,
            disable_shrink_on_load: false,
            processing_timeout_secs: PROCESSING_TIMEOUT_SECS,
            concurrency: default_concurrency(),
            auto_resize: AutoResizePolicy::default(),
            watermark_data: None,
            watermark_path: None,
            watermark_text: None,
            watermark_font_path: None,
            fallback_image_data: None,
            fallback_image_path: None,
        }
    }
}

fn default_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get() * 2)
        .unwrap_or(4)
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

impl ProcessingConfig {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();

        let auto_resize = match env_opt("RESIZR_AUTO_RESIZE_FILL_SIZES") {
            Some(sizes) => AutoResizePolicy::AspectRatio {
                fill_sizes: AutoResizePolicy::parse_sizes(&sizes)?,
                fit_ratio: env::var("RESIZR_AUTO_RESIZE_FIT_RATIO")
                    .map_err(|_| {
                        anyhow::anyhow!(
                            "RESIZR_AUTO_RESIZE_FIT_RATIO must be set with RESIZR_AUTO_RESIZE_FILL_SIZES"
                        )
                    })?
                    .parse()
                    .map_err(|_| {
                        anyhow::anyhow!("RESIZR_AUTO_RESIZE_FIT_RATIO must be a number")
                    })?,
            },
            None => AutoResizePolicy::OrientationMatch,
        };

        let config = ProcessingConfig {
            max_src_resolution: env_or("RESIZR_MAX_SRC_RESOLUTION", MAX_SRC_RESOLUTION_MP),
            max_src_file_size: env_or("RESIZR_MAX_SRC_FILE_SIZE", 0),
            max_animation_frames: env_or("RESIZR_MAX_ANIMATION_FRAMES", MAX_ANIMATION_FRAMES),
            watermark_opacity: env_or("RESIZR_WATERMARK_OPACITY", WATERMARK_OPACITY),
            use_linear_colorspace: env_or("RESIZR_USE_LINEAR_COLORSPACE", false),
            disable_shrink_on_load: env_or("RESIZR_DISABLE_SHRINK_ON_LOAD", false),
            processing_timeout_secs: env_or(
                "RESIZR_PROCESSING_TIMEOUT_SECS",
                PROCESSING_TIMEOUT_SECS,
            ),
            concurrency: env_or("RESIZR_CONCURRENCY", default_concurrency()),
            auto_resize,
            watermark_data: env_opt("RESIZR_WATERMARK_DATA"),
            watermark_path: env_opt("RESIZR_WATERMARK_PATH"),
            watermark_text: env_opt("RESIZR_WATERMARK_TEXT"),
            watermark_font_path: env_opt("RESIZR_WATERMARK_FONT_PATH"),
            fallback_image_data: env_opt("RESIZR_FALLBACK_IMAGE_DATA"),
            fallback_image_path: env_opt("RESIZR_FALLBACK_IMAGE_PATH"),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.max_src_resolution <= 0.0 {
            return Err(anyhow::anyhow!(
                "RESIZR_MAX_SRC_RESOLUTION must be greater than 0"
            ));
        }
        if self.max_animation_frames == 0 {
            return Err(anyhow::anyhow!(
                "RESIZR_MAX_ANIMATION_FRAMES must be at least 1"
            ));
        }
        if !(0.0..=1.0).contains(&self.watermark_opacity) {
            return Err(anyhow::anyhow!(
                "RESIZR_WATERMARK_OPACITY must be between 0 and 1"
            ));
        }
        if self.processing_timeout_secs == 0 {
            return Err(anyhow::anyhow!(
                "RESIZR_PROCESSING_TIMEOUT_SECS must be greater than 0"
            ));
        }
        if self.concurrency == 0 {
            return Err(anyhow::anyhow!("RESIZR_CONCURRENCY must be at least 1"));
        }
        if self.watermark_text.is_some() && self.watermark_font_path.is_none() {
            return Err(anyhow::anyhow!(
                "RESIZR_WATERMARK_FONT_PATH must be set to render RESIZR_WATERMARK_TEXT"
            ));
        }
        if let AutoResizePolicy::AspectRatio { fit_ratio, .. } = &self.auto_resize {
            if *fit_ratio <= 0.0 {
                return Err(anyhow::anyhow!(
                    "RESIZR_AUTO_RESIZE_FIT_RATIO must be greater than 0"
                ));
            }
        }
        Ok(())
    }

    /// Maximum number of source pixels
    pub fn max_src_pixels(&self) -> u64 {
        (self.max_src_resolution * 1_000_000.0) as u64
    }

    pub fn animation_enabled(&self) -> bool {
        self.max_animation_frames > 1
    }
}
