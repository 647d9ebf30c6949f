mod cli;

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Command};
use pixbatch::config::PixbatchConfig;
use pixbatch::engine::{BatchError, BatchSummary};
use pixbatch::error::PixbatchError;
use pixbatch::service::media::discover_images;
use pixbatch::service::{
    ResizeClient, UploadClient, resize_batch, resize_engine, upload_batch, upload_engine,
    upload_items,
};
use pixbatch::ui::{self, BatchProgress};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = match &cli.config {
        Some(path) => PixbatchConfig::load_from(path)?,
        None => PixbatchConfig::load()?,
    };

    match cli.command {
        Command::Upload { dir, concurrency } => {
            let concurrency = concurrency.unwrap_or(config.upload_concurrency);
            run_upload(&config, &dir, concurrency, cli.json).await?;
        }
        Command::Resize {
            source_path,
            sizes,
            output_dir,
        } => {
            let sizes = sizes.unwrap_or_else(|| config.resize_sizes.clone());
            let output_dir = output_dir.unwrap_or_else(|| config.output_dir.clone());
            run_resize(&config, &source_path, &sizes, &output_dir, cli.json).await?;
        }
    }
    Ok(())
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "pixbatch=debug" } else { "pixbatch=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run_upload(
    config: &PixbatchConfig,
    dir: &Path,
    concurrency: usize,
    json: bool,
) -> Result<(), PixbatchError> {
    let paths = discover_images(dir).map_err(|source| PixbatchError::Io {
        path: dir.to_path_buf(),
        source,
    })?;
    if paths.is_empty() {
        return Err(PixbatchError::NoImages(dir.to_path_buf()));
    }
    info!(count = paths.len(), concurrency, "uploading images");

    let labels = paths
        .iter()
        .map(|p| p.strip_prefix(dir).unwrap_or(p).display().to_string())
        .collect();
    let progress = BatchProgress::start("Uploading", labels);

    let tokens = config.clone();
    let client = UploadClient::new(
        &config.api_base_url,
        Arc::new(move || tokens.current_token()),
    )?;
    let mut engine = upload_engine(concurrency).with_progress_sink(progress.clone());

    let result = upload_batch(&mut engine, Arc::new(client), upload_items(paths)).await;
    report(&progress, result, json)
}

async fn run_resize(
    config: &PixbatchConfig,
    source_path: &str,
    sizes: &[u32],
    output_dir: &Path,
    json: bool,
) -> Result<(), PixbatchError> {
    if config.public_base_url.is_empty() {
        return Err(PixbatchError::Config("public_base_url must be set to resize".into()));
    }

    let client =
        ResizeClient::new(&config.resize_service_url, &config.public_base_url, output_dir)?;
    let source_url = client.check_source(source_path).await?;
    info!(source = %source_url, ?sizes, "rendering sizes");

    let labels = sizes.iter().map(|s| format!("{s}x")).collect();
    let progress = BatchProgress::start("Resizing", labels);
    let mut engine = resize_engine().with_progress_sink(progress.clone());

    let result = resize_batch(&mut engine, Arc::new(client), source_path, sizes).await;
    report(&progress, result, json)
}

fn report<T: Serialize>(
    progress: &BatchProgress,
    result: Result<BatchSummary<T>, BatchError>,
    json: bool,
) -> Result<(), PixbatchError> {
    let summary = match result {
        Ok(summary) => summary,
        Err(err) => {
            progress.abort(&err);
            return Err(err.into());
        }
    };

    progress.finish(&summary);
    if json {
        ui::print_json(&summary)?;
    }

    if summary.is_clean() {
        Ok(())
    } else {
        Err(PixbatchError::ItemsFailed {
            failed: summary.failed,
            total: summary.total,
        })
    }
}
