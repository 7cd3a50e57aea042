//! Shared pieces of the `resizr` command-line front end.

use anyhow::{bail, Context};
use clap::Args;
use resizr_core::{
    Gravity, GravityType, ImageType, ProcessingOptions, ResizingType, WatermarkOptions,
};
use std::path::Path;

/// Transform flags layered on top of an optional JSON options document
#[derive(Debug, Clone, Default, Args)]
pub struct TransformArgs {
    /// Target width in pixels (0 keeps the aspect ratio)
    #[arg(short = 'w', long)]
    pub width: Option<u32>,
    /// Target height in pixels (0 keeps the aspect ratio)
    #[arg(short = 'H', long)]
    pub height: Option<u32>,
    /// Resizing type: fit, fill, crop or auto
    #[arg(long)]
    pub resize: Option<String>,
    /// Gravity: ce, no, so, ea, we, noea, nowe, soea, sowe or sm
    #[arg(long)]
    pub gravity: Option<String>,
    /// Allow scaling beyond the source size
    #[arg(long)]
    pub enlarge: bool,
    /// Device pixel ratio
    #[arg(long)]
    pub dpr: Option<f64>,
    /// Output format; defaults to the output file extension
    #[arg(long)]
    pub format: Option<String>,
    /// Encoder quality 1-100
    #[arg(short, long)]
    pub quality: Option<u8>,
    /// Byte budget for the encoded result
    #[arg(long)]
    pub max_bytes: Option<usize>,
    #[arg(long)]
    pub blur: Option<f32>,
    #[arg(long)]
    pub sharpen: Option<f32>,
    /// Composite the configured watermark
    #[arg(long)]
    pub watermark: bool,
    #[arg(long)]
    pub watermark_opacity: Option<f64>,
    #[arg(long)]
    pub watermark_gravity: Option<String>,
    /// Watermark size relative to the result
    #[arg(long)]
    pub watermark_scale: Option<f64>,
    /// Tile the watermark over the whole image
    #[arg(long)]
    pub watermark_replicate: bool,
    /// Full options as JSON; individual flags override its fields
    #[arg(long)]
    pub options: Option<String>,
}

fn parse_gravity(value: &str) -> anyhow::Result<Gravity> {
    match GravityType::parse(value) {
        Some(kind) => Ok(Gravity::new(kind)),
        None => bail!("Unknown gravity: {}", value),
    }
}

impl TransformArgs {
    /// Build processing options; `output` supplies the format when none is given
    pub fn to_options(&self, output: Option<&Path>) -> anyhow::Result<ProcessingOptions> {
        let mut po = match &self.options {
            Some(json) => {
                serde_json::from_str::<ProcessingOptions>(json).context("Invalid --options JSON")?
            }
            None => ProcessingOptions::default(),
        };

        if let Some(width) = self.width {
            po.width = width;
        }
        if let Some(height) = self.height {
            po.height = height;
        }
        if let Some(resize) = &self.resize {
            po.resizing_type = ResizingType::parse(resize)
                .with_context(|| format!("Unknown resizing type: {}", resize))?;
        }
        if let Some(gravity) = &self.gravity {
            po.gravity = parse_gravity(gravity)?;
        }
        if self.enlarge {
            po.enlarge = true;
        }
        if let Some(dpr) = self.dpr {
            if dpr <= 0.0 {
                bail!("dpr must be positive");
            }
            po.dpr = dpr;
        }
        if let Some(quality) = self.quality {
            if !(1..=100).contains(&quality) {
                bail!("quality must be between 1 and 100");
            }
            po.quality = quality;
        }
        if let Some(max_bytes) = self.max_bytes {
            po.max_bytes = max_bytes;
        }
        if let Some(blur) = self.blur {
            po.blur = blur;
        }
        if let Some(sharpen) = self.sharpen {
            po.sharpen = sharpen;
        }

        if self.watermark {
            po.watermark = WatermarkOptions {
                enabled: true,
                ..po.watermark
            };
        }
        if let Some(opacity) = self.watermark_opacity {
            po.watermark.opacity = opacity.clamp(0.0, 1.0);
        }
        if let Some(gravity) = &self.watermark_gravity {
            po.watermark.gravity = parse_gravity(gravity)?;
        }
        if let Some(scale) = self.watermark_scale {
            po.watermark.scale = scale;
        }
        if self.watermark_replicate {
            po.watermark.replicate = true;
        }

        let format = match &self.format {
            Some(format) => Some(
                ImageType::parse(format).with_context(|| format!("Unknown format: {}", format))?,
            ),
            None => output
                .and_then(|path| path.extension())
                .and_then(|ext| ext.to_str())
                .and_then(ImageType::parse),
        };
        if let Some(format) = format {
            po.format = format;
        }

        Ok(po)
    }
}

/// Output path for `input` when none is given: `<stem>.resized.<ext>` next to it
pub fn default_output(input: &Path, image_type: ImageType) -> std::path::PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_string());
    input.with_file_name(format!("{}.resized.{}", stem, image_type.extension()))
}

/// Initialize tracing for CLI binaries.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("resizr=debug")),
        )
        .init();
}
