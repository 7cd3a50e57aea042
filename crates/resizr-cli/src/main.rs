//! Resizr CLI: transform a local image file.
//!
//! Processing limits, the watermark and the fallback image come from RESIZR_* environment
//! variables (a `.env` file is honoured).

use anyhow::Context;
use clap::Parser;
use resizr_cli::{default_output, init_tracing, TransformArgs};
use resizr_core::ProcessingConfig;
use resizr_processing::{shared, LocalFetcher, Pipeline, PixelEngine, SharedAssets, SourceFetcher};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "resizr", about = "Resize, crop and re-encode images")]
struct Cli {
    /// Source image
    input: PathBuf,
    /// Destination file; defaults to `<input>.resized.<ext>`
    #[arg(short, long)]
    output: Option<PathBuf>,
    /// Print a JSON summary of the result
    #[arg(long)]
    json: bool,
    #[command(flatten)]
    transform: TransformArgs,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = ProcessingConfig::from_env().context("Invalid RESIZR_* configuration")?;
    let assets = shared::init_global(
        SharedAssets::load(&config).context("Failed to load watermark or fallback image")?,
    );

    let options = cli.transform.to_options(cli.output.as_deref())?;
    let fetcher = LocalFetcher::new(config.max_src_file_size);
    let fetched = fetcher.fetch(&cli.input.to_string_lossy()).await;

    let pipeline = Pipeline::new(PixelEngine::new(), config, assets);
    let result = pipeline
        .transform_or_fallback(options, fetched)
        .await
        .with_context(|| format!("Failed to transform {}", cli.input.display()))?;

    let output = cli
        .output
        .unwrap_or_else(|| default_output(&cli.input, result.image_type));
    tokio::fs::write(&output, &result.data)
        .await
        .with_context(|| format!("Failed to write {}", output.display()))?;

    tracing::info!(
        output = %output.display(),
        format = %result.image_type,
        bytes = result.len(),
        "Image written"
    );

    if cli.json {
        let summary = serde_json::json!({
            "output": output.display().to_string(),
            "format": result.image_type,
            "mime_type": result.mime_type(),
            "bytes": result.len(),
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&summary).context("Serialize summary")?
        );
    }

    Ok(())
}
