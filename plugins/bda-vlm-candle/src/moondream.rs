//! Moondream2 via Candle
//!
//! Loads `model.safetensors` and `tokenizer.json` from a local snapshot and
//! runs image-conditioned greedy or sampled decoding.

use crate::params::{dtype_from_params, placement_of, DeviceSpec, GenerationSettings};
use bda_core::{ChatMessage, ContentPart, Error, ModuleDevice, ParamMap, Result, Role};
use bda_pipeline::{LoadError, VisionLanguageModel, VlmLoader};
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::generation::LogitsProcessor;
use candle_transformers::models::moondream;
use image::{imageops::FilterType, DynamicImage, RgbImage};
use parking_lot::Mutex;
use serde_json::Value;
use std::path::Path;
use std::time::Instant;
use tokenizers::Tokenizer;
use tracing::{debug, info, warn};

/// Files a snapshot must contain
pub const REQUIRED_ARTIFACTS: &[&str] = &["model.safetensors", "tokenizer.json"];

/// Square input resolution of the vision encoder
pub const IMAGE_SIZE: u32 = 378;

const END_OF_TEXT: &str = "<|endoftext|>";

/// Token ids of the `<END>` marker the model emits after an answer
const END_MARKER: &[u32] = &[27, 10619, 29];

/// Submodules reported in the device map
const MODULES: &[&str] = &["vision_encoder", "text_model"];

/// Loader for Moondream2 snapshots
#[derive(Debug, Clone, Copy, Default)]
pub struct MoondreamLoader;

impl MoondreamLoader {
    /// Hub revision of `vikhyatk/moondream2` whose weights match
    /// `moondream::Config::v2`. Later revisions changed the architecture.
    pub const DEFAULT_REVISION: &'static str = "30c7cdf3fa6914f50bee3956694374143f5cc884";

    pub fn new() -> Self {
        Self
    }

    /// Required artifacts absent from `model_dir`
    pub fn missing_artifacts(model_dir: &Path) -> Vec<String> {
        REQUIRED_ARTIFACTS
            .iter()
            .filter(|name| !model_dir.join(name).is_file())
            .map(|name| name.to_string())
            .collect()
    }
}

fn quantization_requested(quantization: &ParamMap) -> bool {
    ["enabled", "load_in_4bit", "load_in_8bit"]
        .iter()
        .any(|flag| matches!(quantization.get(*flag), Some(Value::Bool(true))))
}

impl VlmLoader for MoondreamLoader {
    fn load_local(
        &self,
        model_dir: &Path,
        load_params: &ParamMap,
        quantization: &ParamMap,
    ) -> std::result::Result<Box<dyn VisionLanguageModel>, LoadError> {
        if quantization_requested(quantization) {
            return Err(LoadError::failed(
                "quantized loading is not supported by the candle moondream backend",
            ));
        }

        let missing = Self::missing_artifacts(model_dir);
        if !missing.is_empty() {
            return Err(LoadError::MissingArtifacts(missing));
        }

        let start = Instant::now();
        let device = DeviceSpec::from_params(load_params)?.open()?;
        let dtype = dtype_from_params(load_params, &device)?;

        let tokenizer = Tokenizer::from_file(model_dir.join("tokenizer.json"))
            .map_err(|e| LoadError::failed(format!("Failed to load tokenizer.json: {}", e)))?;
        let eos_token = *tokenizer
            .get_vocab(true)
            .get(END_OF_TEXT)
            .ok_or_else(|| LoadError::failed(format!("tokenizer has no {} token", END_OF_TEXT)))?;

        let weights = model_dir.join("model.safetensors");
        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[weights], dtype, &device)
                .map_err(|e| LoadError::failed(format!("Failed to load weights: {}", e)))?
        };
        let config = moondream::Config::v2();
        let model = moondream::Model::new(&config, vb)
            .map_err(|e| LoadError::failed(format!("Failed to build moondream model: {}", e)))?;

        info!(
            model_dir = %model_dir.display(),
            device = ?device.location(),
            dtype = ?dtype,
            elapsed_ms = %start.elapsed().as_millis(),
            "Loaded moondream2 weights"
        );

        Ok(Box::new(MoondreamModel {
            model: Mutex::new(model),
            tokenizer,
            device,
            dtype,
            eos_token,
            inference_mode: false,
        }))
    }

    fn name(&self) -> &str {
        "candle-moondream"
    }
}

/// A resident Moondream2 model
pub struct MoondreamModel {
    model: Mutex<moondream::Model>,
    tokenizer: Tokenizer,
    device: Device,
    dtype: DType,
    eos_token: u32,
    inference_mode: bool,
}

impl MoondreamModel {
    /// Resize, normalize and encode the scene into image embeddings
    fn embed_image(&self, model: &moondream::Model, image: &RgbImage) -> candle_core::Result<Tensor> {
        let resized = DynamicImage::ImageRgb8(image.clone())
            .resize_to_fill(IMAGE_SIZE, IMAGE_SIZE, FilterType::Triangle)
            .to_rgb8();
        let size = IMAGE_SIZE as usize;
        let pixels = Tensor::from_vec(resized.into_raw(), (size, size, 3), &Device::Cpu)?
            .permute((2, 0, 1))?;

        let mean = Tensor::new(&[0.5f32, 0.5, 0.5], &Device::Cpu)?.reshape((3, 1, 1))?;
        let std = Tensor::new(&[0.5f32, 0.5, 0.5], &Device::Cpu)?.reshape((3, 1, 1))?;
        let normalized = (pixels.to_dtype(DType::F32)? / 255.)?
            .broadcast_sub(&mean)?
            .broadcast_div(&std)?;

        normalized
            .to_device(&self.device)?
            .to_dtype(self.dtype)?
            .unsqueeze(0)?
            .apply(model.vision_encoder())
    }

    fn run(
        &self,
        image: &RgbImage,
        input_ids: &[u32],
        settings: &GenerationSettings,
    ) -> candle_core::Result<Vec<u32>> {
        let mut model = self.model.lock();
        model.text_model.clear_kv_cache();

        let image_embeds = self.embed_image(&model, image)?;
        let bos_token = Tensor::new(&[self.eos_token], &self.device)?.unsqueeze(0)?;
        let mut processor = LogitsProcessor::new(settings.seed, settings.temperature, settings.top_p);

        let mut tokens = input_ids.to_vec();
        for index in 0..settings.max_new_tokens {
            let context_size = if index > 0 { 1 } else { tokens.len() };
            let context = &tokens[tokens.len().saturating_sub(context_size)..];
            let input = Tensor::new(context, &self.device)?.unsqueeze(0)?;

            let logits = if index > 0 {
                model.text_model.forward(&input)?
            } else {
                model
                    .text_model
                    .forward_with_img(&bos_token, &input, &image_embeds)?
            };
            let logits = logits.squeeze(0)?.to_dtype(DType::F32)?;
            let logits = if settings.repeat_penalty == 1.0 {
                logits
            } else {
                let start_at = tokens.len().saturating_sub(settings.repeat_last_n);
                candle_transformers::utils::apply_repeat_penalty(
                    &logits,
                    settings.repeat_penalty,
                    &tokens[start_at..],
                )?
            };

            let next = processor.sample(&logits)?;
            if next == self.eos_token {
                break;
            }
            tokens.push(next);
            if tokens.ends_with(END_MARKER) {
                tokens.truncate(tokens.len() - END_MARKER.len());
                break;
            }
        }

        Ok(tokens)
    }
}

impl VisionLanguageModel for MoondreamModel {
    fn device_map(&self) -> Vec<ModuleDevice> {
        let placement = placement_of(&self.device);
        MODULES
            .iter()
            .map(|module| ModuleDevice::new(*module, placement))
            .collect()
    }

    fn set_inference_mode(&mut self) {
        self.inference_mode = true;
    }

    /// Moondream has no chat template: system text, then a Question/Answer turn
    fn render_prompt(&self, messages: &[ChatMessage]) -> Result<String> {
        let mut system = Vec::new();
        let mut question = Vec::new();

        for message in messages {
            for part in &message.content {
                let text = match part {
                    ContentPart::Text { text } => text.trim(),
                    ContentPart::Image => continue,
                };
                match message.role {
                    Role::System => system.push(text),
                    Role::User => question.push(text),
                }
            }
        }

        if question.is_empty() {
            return Err(Error::inference("no user message to answer"));
        }

        let mut prompt = String::new();
        if !system.is_empty() {
            prompt.push_str(&system.join("\n"));
        }
        prompt.push_str(&format!("\n\nQuestion: {}\n\nAnswer:", question.join("\n")));
        Ok(prompt)
    }

    fn encode(&self, prompt: &str) -> Result<Vec<u32>> {
        let encoding = self
            .tokenizer
            .encode(prompt, true)
            .map_err(|e| Error::inference(format!("Tokenization failed: {}", e)))?;
        Ok(encoding.get_ids().to_vec())
    }

    fn generate(&self, image: &RgbImage, input_ids: &[u32], params: &ParamMap) -> Result<Vec<u32>> {
        if !self.inference_mode {
            return Err(Error::internal("model used before inference mode was set"));
        }
        if input_ids.is_empty() {
            return Err(Error::inference("empty prompt"));
        }

        let settings = GenerationSettings::from_params(params)?;
        debug!(?settings, prompt_tokens = input_ids.len(), "Starting generation");

        let tokens = self.run(image, input_ids, &settings).map_err(|e| {
            warn!(error = %e, "Generation failed");
            Error::inference(format!("Generation failed: {}", e))
        })?;
        Ok(tokens)
    }

    fn decode(&self, ids: &[u32]) -> Result<String> {
        self.tokenizer
            .decode(ids, true)
            .map(|text| text.trim().to_string())
            .map_err(|e| Error::inference(format!("Detokenization failed: {}", e)))
    }
}
