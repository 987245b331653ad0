//! BDA Pipeline
//!
//! Classify-then-report battle damage assessment over a vision-language model.
//!
//! A pipeline is built once from a prompt configuration and a target doctrine:
//! - Category vocabulary is derived from the doctrine keys
//! - The model is loaded from a local cache, fetching a snapshot when missing
//! - Partial CPU or disk offload is refused
//!
//! Each [`BdaPipeline::analyze`] call decodes an image, detects damaged target
//! categories and generates a report grounded in the matching doctrine text.
//!
//! Inference backends plug in through [`VlmLoader`], so this crate carries no
//! tensor runtime of its own.

pub mod classifier;
pub mod config;
pub mod detector;
pub mod doctrine;
#[cfg(feature = "hub")]
pub mod hub;
pub mod image_source;
pub mod loader_plugin;
pub mod model_config;
pub mod model_loader;
pub mod pipeline;

pub use classifier::{normalize, CategoryVocabulary};
pub use config::{default_models_dir, BdaConfig, PipelineSettings, PromptTemplates};
pub use detector::Detector;
pub use doctrine::{Doctrine, DoctrineComposer};
#[cfg(feature = "hub")]
pub use hub::HfSnapshotFetcher;
pub use image_source::{FileImageSource, ImageSource};
pub use loader_plugin::{LoadError, SnapshotFetcher, VisionLanguageModel, VlmLoader};
pub use model_config::ModelConfig;
pub use model_loader::{cache_dir_for, validate_residency, ModelGateway};
pub use pipeline::{BdaPipeline, BuildError, Lifecycle, PipelineBuilder, PipelineState};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::classifier::CategoryVocabulary;
    pub use crate::config::{BdaConfig, PipelineSettings};
    pub use crate::detector::Detector;
    pub use crate::loader_plugin::{LoadError, SnapshotFetcher, VisionLanguageModel, VlmLoader};
    pub use crate::pipeline::{BdaPipeline, PipelineBuilder, PipelineState};
    pub use bda_core::prelude::*;
}
