//! BDA pipeline orchestration
//!
//! Construction drives `Unconfigured -> ConfigLoaded -> ModelAcquiring ->
//! Ready`, or `Failed` on any fatal error. A ready pipeline answers
//! [`BdaPipeline::analyze`] repeatedly with no further state change:
//!
//! 1. decode the image
//! 2. detect categories (injected detector, or VLM self-classification)
//! 3. compose the doctrine-grounded report prompt
//! 4. generate the report
//!
//! Calls block for the whole decode and both inference calls. The pipeline
//! expects at most one `analyze` call in flight.

use crate::classifier::CategoryVocabulary;
use crate::config::{BdaConfig, PipelineSettings, PromptTemplates};
use crate::detector::Detector;
use crate::doctrine::{Doctrine, DoctrineComposer};
use crate::image_source::{FileImageSource, ImageSource};
use crate::loader_plugin::{SnapshotFetcher, VlmLoader};
use crate::model_loader::ModelGateway;
use bda_core::{Detection, Error, ParamMap, Result};
use image::RgbImage;
use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Lifecycle states of a pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineState {
    Unconfigured,
    ConfigLoaded,
    ModelAcquiring,
    Ready,
    Failed,
}

impl PipelineState {
    /// Whether `next` is a legal successor of this state
    pub fn can_transition_to(self, next: PipelineState) -> bool {
        use PipelineState::*;
        matches!(
            (self, next),
            (Unconfigured, ConfigLoaded)
                | (ConfigLoaded, ModelAcquiring)
                | (ModelAcquiring, Ready)
                | (Unconfigured | ConfigLoaded | ModelAcquiring, Failed)
        )
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unconfigured => "unconfigured",
            Self::ConfigLoaded => "config-loaded",
            Self::ModelAcquiring => "model-acquiring",
            Self::Ready => "ready",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Record of the states a pipeline passed through
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lifecycle {
    history: Vec<PipelineState>,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            history: vec![PipelineState::Unconfigured],
        }
    }

    /// Current state
    pub fn state(&self) -> PipelineState {
        self.history
            .last()
            .copied()
            .unwrap_or(PipelineState::Unconfigured)
    }

    /// Every state visited, oldest first
    pub fn history(&self) -> &[PipelineState] {
        &self.history
    }

    /// Move to `next`, rejecting illegal transitions
    pub fn advance(&mut self, next: PipelineState) -> Result<()> {
        let current = self.state();
        if !current.can_transition_to(next) {
            return Err(Error::internal(format!(
                "illegal pipeline transition {} -> {}",
                current, next
            )));
        }
        debug!(from = %current, to = %next, "Pipeline state transition");
        self.history.push(next);
        Ok(())
    }

    /// Enter `Failed`, returning the state the failure happened in
    fn fail(&mut self) -> PipelineState {
        let current = self.state();
        if current.can_transition_to(PipelineState::Failed) {
            self.history.push(PipelineState::Failed);
        }
        current
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

/// Fatal construction failure; the lifecycle is always `Failed`
#[derive(Debug, thiserror::Error)]
#[error("pipeline construction failed while {failed_from}: {error}")]
pub struct BuildError {
    lifecycle: Lifecycle,
    failed_from: PipelineState,
    #[source]
    error: Error,
}

impl BuildError {
    fn new(mut lifecycle: Lifecycle, error: Error) -> Self {
        let failed_from = lifecycle.fail();
        warn!(state = %failed_from, error = %error, "Pipeline construction failed");
        Self {
            lifecycle,
            failed_from,
            error,
        }
    }

    /// Terminal state, always [`PipelineState::Failed`]
    pub fn state(&self) -> PipelineState {
        self.lifecycle.state()
    }

    /// State that was active when construction failed
    pub fn failed_from(&self) -> PipelineState {
        self.failed_from
    }

    pub fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    pub fn error(&self) -> &Error {
        &self.error
    }

    pub fn into_error(self) -> Error {
        self.error
    }
}

#[cfg(feature = "hub")]
fn default_fetcher() -> Arc<dyn SnapshotFetcher> {
    Arc::new(crate::hub::HfSnapshotFetcher::new())
}

#[cfg(not(feature = "hub"))]
fn default_fetcher() -> Arc<dyn SnapshotFetcher> {
    struct Offline;

    impl SnapshotFetcher for Offline {
        fn fetch(&self, model_id: &str, _target_dir: &Path) -> Result<()> {
            Err(Error::model_unavailable(format!(
                "'{}' is not cached and snapshot downloads are disabled",
                model_id
            )))
        }
    }

    Arc::new(Offline)
}

/// Builder wiring collaborators into a [`BdaPipeline`]
pub struct PipelineBuilder {
    settings: PipelineSettings,
    loader: Option<Arc<dyn VlmLoader>>,
    fetcher: Arc<dyn SnapshotFetcher>,
    image_source: Arc<dyn ImageSource>,
    detector: Option<Arc<dyn Detector>>,
}

impl PipelineBuilder {
    pub fn new(settings: PipelineSettings) -> Self {
        Self {
            settings,
            loader: None,
            fetcher: default_fetcher(),
            image_source: Arc::new(FileImageSource),
            detector: None,
        }
    }

    /// Inference backend used to load the model (required)
    pub fn with_loader(mut self, loader: Arc<dyn VlmLoader>) -> Self {
        self.loader = Some(loader);
        self
    }

    /// Replace the snapshot fetcher
    pub fn with_fetcher(mut self, fetcher: Arc<dyn SnapshotFetcher>) -> Self {
        self.fetcher = fetcher;
        self
    }

    /// Replace the image decoder
    pub fn with_image_source(mut self, image_source: Arc<dyn ImageSource>) -> Self {
        self.image_source = image_source;
        self
    }

    /// Use an external detector instead of VLM self-classification
    pub fn with_detector(mut self, detector: Arc<dyn Detector>) -> Self {
        self.detector = Some(detector);
        self
    }

    /// Load configuration, acquire the model and return a ready pipeline
    pub fn build(self) -> std::result::Result<BdaPipeline, BuildError> {
        let mut lifecycle = Lifecycle::new();

        let (config, doctrine) = match load_documents(&self.settings) {
            Ok(documents) => documents,
            Err(e) => return Err(BuildError::new(lifecycle, e)),
        };

        let vocabulary = CategoryVocabulary::from_doctrine(&doctrine);
        if vocabulary.is_empty() {
            return Err(BuildError::new(
                lifecycle,
                Error::config(format!(
                    "{} defines no damage categories",
                    self.settings.doctrine_path.display()
                )),
            ));
        }
        let classify_prompt = config.prompts.resolve_classify(vocabulary.labels());

        info!(
            categories = vocabulary.len(),
            model = %config.vlm.model_id,
            "Configuration loaded"
        );
        if let Err(e) = lifecycle.advance(PipelineState::ConfigLoaded) {
            return Err(BuildError::new(lifecycle, e));
        }

        let loader = match self.loader {
            Some(loader) => loader,
            None => {
                return Err(BuildError::new(
                    lifecycle,
                    Error::config("no model loader configured"),
                ))
            }
        };

        if let Err(e) = lifecycle.advance(PipelineState::ModelAcquiring) {
            return Err(BuildError::new(lifecycle, e));
        }

        let gateway = match ModelGateway::acquire(
            &self.settings.models_dir,
            &config.vlm,
            loader.as_ref(),
            self.fetcher.as_ref(),
        ) {
            Ok(gateway) => gateway,
            Err(e) => return Err(BuildError::new(lifecycle, e)),
        };

        if let Err(e) = lifecycle.advance(PipelineState::Ready) {
            return Err(BuildError::new(lifecycle, e));
        }

        info!(
            detector = self.detector.as_ref().map(|d| d.name()).unwrap_or("vlm"),
            "BDA pipeline ready"
        );

        Ok(BdaPipeline {
            prompts: config.prompts,
            classify_prompt,
            generate_params: config.vlm.generate_params,
            vocabulary,
            composer: DoctrineComposer::new(doctrine),
            gateway,
            image_source: self.image_source,
            detector: self.detector,
            lifecycle,
        })
    }
}

fn load_documents(settings: &PipelineSettings) -> Result<(BdaConfig, Doctrine)> {
    let config = BdaConfig::from_file(&settings.config_path)?;
    let doctrine = Doctrine::from_file(&settings.doctrine_path)?;
    Ok((config, doctrine))
}

/// Ready-to-use BDA pipeline
pub struct BdaPipeline {
    prompts: PromptTemplates,
    classify_prompt: String,
    generate_params: ParamMap,
    vocabulary: CategoryVocabulary,
    composer: DoctrineComposer,
    gateway: ModelGateway,
    image_source: Arc<dyn ImageSource>,
    detector: Option<Arc<dyn Detector>>,
    lifecycle: Lifecycle,
}

impl fmt::Debug for BdaPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BdaPipeline")
            .field("state", &self.state())
            .field("vocabulary", &self.vocabulary)
            .field("gateway", &self.gateway)
            .field("detector", &self.detector.as_ref().map(|d| d.name().to_string()))
            .finish_non_exhaustive()
    }
}

impl BdaPipeline {
    /// Start building a pipeline
    pub fn builder(settings: PipelineSettings) -> PipelineBuilder {
        PipelineBuilder::new(settings)
    }

    /// Always [`PipelineState::Ready`] for a constructed pipeline
    pub fn state(&self) -> PipelineState {
        self.lifecycle.state()
    }

    pub fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    pub fn vocabulary(&self) -> &CategoryVocabulary {
        &self.vocabulary
    }

    /// Classification prompt with the vocabulary substituted
    pub fn classify_prompt(&self) -> &str {
        &self.classify_prompt
    }

    pub fn gateway(&self) -> &ModelGateway {
        &self.gateway
    }

    /// Detections for a decoded scene.
    ///
    /// Detector output outside the vocabulary is dropped. Without a detector
    /// the model classifies the scene and yields label-only detections.
    pub fn detect_categories(&self, image: &RgbImage) -> Result<Vec<Detection>> {
        if let Some(detector) = &self.detector {
            let detections = detector.detect(image)?;
            let total = detections.len();
            let kept: Vec<Detection> = detections
                .into_iter()
                .filter(|d| {
                    let known = self.vocabulary.contains(&d.label);
                    if !known {
                        warn!(
                            detector = detector.name(),
                            label = %d.label,
                            "Dropping detection outside the category vocabulary"
                        );
                    }
                    known
                })
                .collect();
            debug!(detector = detector.name(), total, kept = kept.len(), "Detector finished");
            return Ok(kept);
        }

        let raw = self.gateway.generate(
            image,
            &self.classify_prompt,
            &self.prompts.system,
            &self.generate_params,
        )?;
        debug!(raw = %raw, "Raw classification output");
        Ok(self.vocabulary.detections(&raw))
    }

    /// Report prompt for the given detections, labels in first-seen order
    pub fn report_prompt(&self, detections: &[Detection]) -> String {
        let labels = unique_labels(detections);
        self.composer
            .compose_report_prompt(&self.prompts.report, &labels)
    }

    /// Run the full pipeline on one image and return the report text
    pub fn analyze(&self, image_path: impl AsRef<Path>) -> Result<String> {
        let path = image_path.as_ref();
        let _span = tracing::info_span!("analyze", image = %path.display()).entered();
        let start = Instant::now();

        let image = self.image_source.decode(path)?;
        let detections = self.detect_categories(&image)?;
        let prompt = self.report_prompt(&detections);
        debug!(prompt_chars = prompt.len(), "Report prompt composed");

        let report = self.gateway.generate(
            &image,
            &prompt,
            &self.prompts.system,
            &self.generate_params,
        )?;

        info!(
            categories = %DoctrineComposer::categories_text(&unique_labels(&detections)),
            report_chars = report.len(),
            elapsed_ms = %start.elapsed().as_millis(),
            "BDA report generated"
        );

        Ok(report)
    }
}

fn unique_labels(detections: &[Detection]) -> Vec<&str> {
    let mut seen = HashSet::new();
    detections
        .iter()
        .map(|d| d.label.as_str())
        .filter(|label| seen.insert(*label))
        .collect()
}
