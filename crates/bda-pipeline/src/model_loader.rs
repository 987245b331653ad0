//! Model acquisition and generation
//!
//! The gateway owns the resident model. Acquisition is a bounded two-step
//! strategy: load from the local cache, and only when artifacts are missing,
//! fetch the snapshot and load once more. A loaded model must be fully
//! resident on an accelerator; partial CPU or disk offload is refused.

use crate::loader_plugin::{LoadError, SnapshotFetcher, VisionLanguageModel, VlmLoader};
use crate::model_config::ModelConfig;
use bda_core::{ChatMessage, Error, ModuleDevice, ParamMap, Result};
use image::RgbImage;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Separator replacing `/` in model identifiers on disk
pub const CACHE_SEPARATOR: &str = "--";

/// Local cache directory for a model: `<models_dir>/<org>--<name>`
pub fn cache_dir_for(models_dir: &Path, model_id: &str) -> PathBuf {
    models_dir.join(model_id.replace('/', CACHE_SEPARATOR))
}

/// Fail unless every submodule is on an accelerator
pub fn validate_residency(device_map: &[ModuleDevice]) -> Result<()> {
    if device_map.is_empty() {
        return Err(Error::resource_exhausted(
            "model reported no submodule placement, cannot confirm accelerator residency",
        ));
    }

    let offloaded: Vec<String> = device_map
        .iter()
        .filter(|m| !m.placement.is_accelerator())
        .map(|m| format!("{}={}", m.module, m.placement))
        .collect();

    if offloaded.is_empty() {
        Ok(())
    } else {
        Err(Error::resource_exhausted(format!(
            "submodules not resident on an accelerator: {}",
            offloaded.join(", ")
        )))
    }
}

/// Next step of the acquisition strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AcquireStep {
    LoadLocal { after_fetch: bool },
    Fetch,
}

/// Owner of the resident vision-language model
pub struct ModelGateway {
    model_id: String,
    cache_dir: PathBuf,
    fetched_snapshot: bool,
    model: Box<dyn VisionLanguageModel>,
}

impl std::fmt::Debug for ModelGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelGateway")
            .field("model_id", &self.model_id)
            .field("cache_dir", &self.cache_dir)
            .field("fetched_snapshot", &self.fetched_snapshot)
            .finish_non_exhaustive()
    }
}

impl ModelGateway {
    /// Acquire a resident model.
    ///
    /// Local load, then at most one fetch-and-retry when artifacts are
    /// missing. Any other load failure is fatal immediately.
    pub fn acquire(
        models_dir: &Path,
        config: &ModelConfig,
        loader: &dyn VlmLoader,
        fetcher: &dyn SnapshotFetcher,
    ) -> Result<Self> {
        let start = Instant::now();
        let cache_dir = cache_dir_for(models_dir, &config.model_id);
        std::fs::create_dir_all(&cache_dir).map_err(|e| {
            Error::model_unavailable(format!(
                "Failed to create model cache {}: {}",
                cache_dir.display(),
                e
            ))
        })?;

        let load_params = config.effective_load_params();
        let mut fetched_snapshot = false;
        let mut step = AcquireStep::LoadLocal { after_fetch: false };

        let mut model = loop {
            step = match step {
                AcquireStep::LoadLocal { after_fetch } => {
                    debug!(
                        model = %config.model_id,
                        loader = loader.name(),
                        after_fetch,
                        "Loading model from local cache"
                    );
                    match loader.load_local(&cache_dir, &load_params, &config.quantization) {
                        Ok(model) => break model,
                        Err(LoadError::MissingArtifacts(missing)) if !after_fetch => {
                            info!(
                                model = %config.model_id,
                                missing = %missing.join(", "),
                                "Model not in local cache, fetching snapshot"
                            );
                            AcquireStep::Fetch
                        }
                        Err(e) => {
                            return Err(Error::model_unavailable(format!(
                                "Failed to load '{}' from {}: {}",
                                config.model_id,
                                cache_dir.display(),
                                e
                            )));
                        }
                    }
                }
                AcquireStep::Fetch => {
                    fetcher.fetch(&config.model_id, &cache_dir).map_err(|e| {
                        Error::model_unavailable(format!(
                            "Failed to fetch snapshot of '{}': {}",
                            config.model_id, e
                        ))
                    })?;
                    fetched_snapshot = true;
                    AcquireStep::LoadLocal { after_fetch: true }
                }
            };
        };

        let device_map = model.device_map();
        if let Err(e) = validate_residency(&device_map) {
            warn!(model = %config.model_id, "Refusing degraded model placement");
            return Err(e);
        }

        model.set_inference_mode();

        info!(
            model = %config.model_id,
            modules = device_map.len(),
            fetched_snapshot,
            elapsed_ms = %start.elapsed().as_millis(),
            "Model resident and ready"
        );

        Ok(Self {
            model_id: config.model_id.clone(),
            cache_dir,
            fetched_snapshot,
            model,
        })
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Whether acquisition had to download the snapshot
    pub fn fetched_snapshot(&self) -> bool {
        self.fetched_snapshot
    }

    /// Ordered messages: optional system message, then image + prompt
    pub fn build_messages(prompt: &str, system_prompt: &str) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(2);
        if !system_prompt.is_empty() {
            messages.push(ChatMessage::system(system_prompt));
        }
        messages.push(ChatMessage::user_with_image(prompt));
        messages
    }

    /// Generate text for an image and prompt.
    ///
    /// Generation parameters are forwarded untouched. Only tokens produced
    /// after the prompt are decoded. Failures propagate without retry.
    pub fn generate(
        &self,
        image: &RgbImage,
        prompt: &str,
        system_prompt: &str,
        generate_params: &ParamMap,
    ) -> Result<String> {
        let start = Instant::now();
        let messages = Self::build_messages(prompt, system_prompt);
        let rendered = self.model.render_prompt(&messages)?;
        let input_ids = self.model.encode(&rendered)?;

        let output_ids = self.model.generate(image, &input_ids, generate_params)?;
        let new_ids = output_ids.get(input_ids.len()..).unwrap_or(&[]);
        let text = self.model.decode(new_ids)?;

        debug!(
            model = %self.model_id,
            prompt_tokens = input_ids.len(),
            new_tokens = new_ids.len(),
            elapsed_ms = %start.elapsed().as_millis(),
            "Generation complete"
        );

        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bda_core::{DevicePlacement, Role};

    #[test]
    fn test_cache_dir_sanitizes_slashes() {
        let dir = cache_dir_for(Path::new("/models"), "vikhyatk/moondream2");
        assert_eq!(dir, PathBuf::from("/models/vikhyatk--moondream2"));
    }

    #[test]
    fn test_residency_all_accelerator() {
        let map = vec![
            ModuleDevice::new("vision_encoder", DevicePlacement::Cuda(0)),
            ModuleDevice::new("text_model", DevicePlacement::Cuda(1)),
        ];
        assert!(validate_residency(&map).is_ok());
    }

    #[test]
    fn test_residency_partial_offload() {
        let map = vec![
            ModuleDevice::new("vision_encoder", DevicePlacement::Cuda(0)),
            ModuleDevice::new("text_model.layers.23", DevicePlacement::Cpu),
        ];
        let err = validate_residency(&map).unwrap_err();
        assert!(matches!(err, Error::ResourceExhausted(_)));
        assert!(err.to_string().contains("text_model.layers.23=cpu"));
    }

    #[test]
    fn test_residency_empty_map() {
        assert!(matches!(
            validate_residency(&[]),
            Err(Error::ResourceExhausted(_))
        ));
    }

    #[test]
    fn test_messages_with_system_prompt() {
        let messages = ModelGateway::build_messages("REPORT BDA", "You are an analyst.");
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::System);
        assert_eq!(messages[1].role, Role::User);
        assert!(messages[1].has_image());
        assert_eq!(messages[1].text(), "REPORT BDA");
    }

    #[test]
    fn test_messages_without_system_prompt() {
        let messages = ModelGateway::build_messages("REPORT BDA", "");
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, Role::User);
    }
}
