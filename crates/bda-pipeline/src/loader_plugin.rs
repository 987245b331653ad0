//! Extension points for the inference capability.
//!
//! The pipeline never tokenizes or runs a network itself. A loader plugin
//! turns a local model directory into a [`VisionLanguageModel`], and a
//! [`SnapshotFetcher`] fills that directory when artifacts are missing. This
//! keeps the pipeline crate free of heavyweight runtime dependencies.

use bda_core::{ChatMessage, ModuleDevice, ParamMap, Result};
use image::RgbImage;
use std::path::Path;

/// Why a local model load failed
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    /// Required artifacts are absent from the model directory
    #[error("missing model artifacts: {}", .0.join(", "))]
    MissingArtifacts(Vec<String>),

    /// Any other failure; never triggers a snapshot fetch
    #[error("{0}")]
    Failed(String),
}

impl LoadError {
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }
}

/// Pluggable backend that constructs models purely from local files.
pub trait VlmLoader: Send + Sync {
    /// Load the model stored in `model_dir`, without network access.
    fn load_local(
        &self,
        model_dir: &Path,
        load_params: &ParamMap,
        quantization: &ParamMap,
    ) -> std::result::Result<Box<dyn VisionLanguageModel>, LoadError>;

    /// Backend name, for logging
    fn name(&self) -> &str;
}

/// A loaded vision-language model.
///
/// Token ids returned by [`generate`](Self::generate) include the prompt ids
/// they were given; the caller strips them.
pub trait VisionLanguageModel: Send + Sync {
    /// Device placement of every submodule
    fn device_map(&self) -> Vec<ModuleDevice>;

    /// Switch to inference (non-training) mode; idempotent
    fn set_inference_mode(&mut self);

    /// Render the message sequence into the model's prompt format
    fn render_prompt(&self, messages: &[ChatMessage]) -> Result<String>;

    /// Tokenize a rendered prompt
    fn encode(&self, prompt: &str) -> Result<Vec<u32>>;

    /// Generate a continuation of `input_ids` conditioned on `image`
    fn generate(&self, image: &RgbImage, input_ids: &[u32], params: &ParamMap) -> Result<Vec<u32>>;

    /// Decode token ids, skipping special tokens
    fn decode(&self, ids: &[u32]) -> Result<String>;
}

/// Downloads a complete model snapshot into a directory.
pub trait SnapshotFetcher: Send + Sync {
    fn fetch(&self, model_id: &str, target_dir: &Path) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_error_display() {
        let err = LoadError::MissingArtifacts(vec!["model.safetensors".into(), "tokenizer.json".into()]);
        assert_eq!(
            err.to_string(),
            "missing model artifacts: model.safetensors, tokenizer.json"
        );
        assert_eq!(LoadError::failed("bad header").to_string(), "bad header");
    }
}
