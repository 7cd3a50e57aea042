//! Process-wide payloads loaded once at startup
//!
//! The watermark overlay and the fallback image are read-only after
//! initialisation and shared by every invocation.

use crate::watermark::{render_text_watermark, OutlineFont};
use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use resizr_core::{ImagePayload, ImageType, ProcessingConfig};
use std::sync::{Arc, OnceLock};

static SHARED_ASSETS: OnceLock<Arc<SharedAssets>> = OnceLock::new();

#[derive(Debug, Clone, Default)]
pub struct SharedAssets {
    pub watermark: Option<ImagePayload>,
    pub fallback: Option<ImagePayload>,
}

impl SharedAssets {
    /// Load the configured watermark and fallback image
    pub fn load(config: &ProcessingConfig) -> Result<Self> {
        let watermark = if let Some(data) = &config.watermark_data {
            Some(decode_base64("watermark", data)?)
        } else if let Some(path) = &config.watermark_path {
            Some(read_file("watermark", path)?)
        } else if let Some(text) = &config.watermark_text {
            let font_path = config
                .watermark_font_path
                .as_deref()
                .context("A font path is required to render a text watermark")?;
            let font_data = std::fs::read(font_path)
                .with_context(|| format!("Failed to read watermark font {}", font_path))?;
            let font = OutlineFont::from_bytes(font_data)?;
            Some(render_text_watermark(&font, text)?)
        } else {
            None
        };

        let fallback = if let Some(data) = &config.fallback_image_data {
            Some(decode_base64("fallback image", data)?)
        } else if let Some(path) = &config.fallback_image_path {
            Some(read_file("fallback image", path)?)
        } else {
            None
        };

        tracing::info!(
            watermark = watermark.is_some(),
            fallback = fallback.is_some(),
            "Shared assets loaded"
        );

        Ok(Self {
            watermark,
            fallback,
        })
    }
}

fn detect(what: &str, data: Vec<u8>) -> Result<ImagePayload> {
    let payload = ImagePayload::detect(data);
    if payload.image_type == ImageType::Unknown {
        anyhow::bail!("Unknown image format for {}", what);
    }
    Ok(payload)
}

fn decode_base64(what: &str, data: &str) -> Result<ImagePayload> {
    let bytes = STANDARD
        .decode(data.trim())
        .with_context(|| format!("Failed to decode base64 {}", what))?;
    detect(what, bytes)
}

fn read_file(what: &str, path: &str) -> Result<ImagePayload> {
    let bytes = std::fs::read(path).with_context(|| format!("Failed to read {} {}", what, path))?;
    detect(what, bytes)
}

/// Install the process-wide assets; later calls return the first value
pub fn init_global(assets: SharedAssets) -> Arc<SharedAssets> {
    SHARED_ASSETS.get_or_init(|| Arc::new(assets)).clone()
}
