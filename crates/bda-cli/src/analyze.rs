//! The `analyze` command

use crate::cli::AnalyzeArgs;
use crate::export::save_json;
use crate::inputs::{discover_images, resolve_input};
use anyhow::{Context, Result};
use bda_core::Error;
use bda_pipeline::{default_models_dir, BdaPipeline, HfSnapshotFetcher, PipelineSettings};
use bda_vlm_candle::MoondreamLoader;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

/// Outcome of a batch run
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunSummary {
    /// Exported report files, in input order
    pub exported: Vec<PathBuf>,

    /// Inputs skipped because they could not be decoded
    pub skipped: Vec<PathBuf>,
}

/// Settings for the pipeline from command-line arguments
pub fn pipeline_settings(args: &AnalyzeArgs) -> PipelineSettings {
    PipelineSettings::new(&args.config, &args.doctrine)
        .with_models_dir(args.models_dir.clone().unwrap_or_else(default_models_dir))
}

/// Snapshot fetcher pinned to `--revision`, or to the revision the Candle
/// backend was built against
pub fn snapshot_fetcher(args: &AnalyzeArgs) -> HfSnapshotFetcher {
    let revision = args
        .revision
        .as_deref()
        .unwrap_or(MoondreamLoader::DEFAULT_REVISION);
    HfSnapshotFetcher::new().with_revision(revision)
}

/// Resolve inputs, build the pipeline and export one report per image
pub fn run(args: &AnalyzeArgs) -> Result<RunSummary> {
    let input = resolve_input(&args.input)?;
    let images = discover_images(&input)?;
    info!(images = images.len(), "Found input images");

    let pipeline = BdaPipeline::builder(pipeline_settings(args))
        .with_loader(Arc::new(MoondreamLoader::new()))
        .with_fetcher(Arc::new(snapshot_fetcher(args)))
        .build()
        .context("Failed to initialize the BDA pipeline")?;

    analyze_all(&images, &args.output, |path| pipeline.analyze(path))
}

/// Analyze each image in order and export its report.
///
/// Decode failures skip the image; any other failure aborts the run.
pub fn analyze_all<F>(images: &[PathBuf], output_dir: &Path, mut analyze: F) -> Result<RunSummary>
where
    F: FnMut(&Path) -> bda_core::Result<String>,
{
    let mut summary = RunSummary::default();
    let total = images.len();

    for (index, image) in images.iter().enumerate() {
        info!(image = %image.display(), "Processing {}/{}", index + 1, total);
        let start = Instant::now();

        let report = match analyze(image) {
            Ok(report) => report,
            Err(e) if !e.is_fatal_for_batch() => {
                warn!(image = %image.display(), error = %e, "Skipping unreadable image");
                summary.skipped.push(image.clone());
                continue;
            }
            Err(e) => {
                error!(image = %image.display(), error = %e, "Analysis failed");
                return Err(abort(e, image));
            }
        };

        let path = save_json(&report, image, output_dir)?;
        println!("[*] Exported: {}", path.display());
        info!(
            image = %image.display(),
            elapsed_ms = %start.elapsed().as_millis(),
            "Report exported"
        );
        summary.exported.push(path);
    }

    Ok(summary)
}

fn abort(error: Error, image: &Path) -> anyhow::Error {
    anyhow::Error::new(error).context(format!("Failed to analyze {}", image.display()))
}
