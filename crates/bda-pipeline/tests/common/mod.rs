//! Mock collaborators for pipeline tests
//!
//! Scripted loaders, fetchers, models, image sources and detectors with call
//! counters, so acquisition and analysis paths can be driven without a real
//! inference backend.

#![allow(dead_code)]

use bda_core::{
    ChatMessage, ContentPart, Detection, DevicePlacement, Error, ModuleDevice, ParamMap, Result,
    Role,
};
use bda_pipeline::{LoadError, PipelineSettings, SnapshotFetcher, VisionLanguageModel, VlmLoader};
use bda_pipeline::{Detector, ImageSource};
use image::{Rgb, RgbImage};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

pub const CONFIG_YAML: &str = r#"
prompts:
  system: "You are a battle damage assessment analyst."
  classify: "CLASSIFY TARGETS. Choose from: {categories}. Answer with a comma separated list."
  report: |
    DETECTED CATEGORIES: {categories}
    {doctrine}
    REPORT BDA
vlm:
  model-id: "vikhyatk/moondream2"
  load-params:
    device_map: auto
    torch_dtype: float16
  generate-params:
    max_new_tokens: 64
"#;

pub const DOCTRINE_YAML: &str = r#"
vehicle:
  physical_damage_definitions: "Vehicle destroyed when the hull is breached."
  physical_damage_considerations: "Check for fire damage."
structure:
  physical_damage_definitions: "Structure destroyed when the roof has collapsed."
functional_damage_definitions: "Scene is non-functional when access is denied."
"#;

/// Marker only the classification prompt contains
pub const CLASSIFY_MARKER: &str = "CLASSIFY TARGETS";

/// Marker only the report prompt contains
pub const REPORT_MARKER: &str = "REPORT BDA";

/// Config and doctrine files written into a temporary directory
pub struct Fixture {
    pub dir: TempDir,
    pub settings: PipelineSettings,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_documents(CONFIG_YAML, DOCTRINE_YAML)
    }

    pub fn with_documents(config: &str, doctrine: &str) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("config.yaml");
        let doctrine_path = dir.path().join("doctrine.yaml");
        std::fs::write(&config_path, config).unwrap();
        std::fs::write(&doctrine_path, doctrine).unwrap();

        let settings = PipelineSettings::new(config_path, doctrine_path)
            .with_models_dir(dir.path().join("models"));
        Self { dir, settings }
    }

    pub fn image_path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }
}

/// Shared script and observations for [`MockModel`]
#[derive(Default)]
pub struct ModelScript {
    device_map: Mutex<Vec<ModuleDevice>>,
    responses: Mutex<Vec<(String, String)>>,
    fail_on: Mutex<Option<String>>,
    prompts: Mutex<Vec<String>>,
    params: Mutex<Vec<ParamMap>>,
    generate_calls: AtomicU32,
    inference_mode: AtomicU32,
}

impl ModelScript {
    pub fn new() -> Arc<Self> {
        let script = Self::default();
        *script.device_map.lock().unwrap() = vec![
            ModuleDevice::new("vision_encoder", DevicePlacement::Cuda(0)),
            ModuleDevice::new("text_model", DevicePlacement::Cuda(0)),
        ];
        Arc::new(script)
    }

    /// Reply with `response` whenever the rendered prompt contains `marker`
    pub fn respond(&self, marker: &str, response: &str) {
        self.responses
            .lock()
            .unwrap()
            .push((marker.to_string(), response.to_string()));
    }

    /// Fail generation whenever the rendered prompt contains `marker`
    pub fn fail_on(&self, marker: &str) {
        *self.fail_on.lock().unwrap() = Some(marker.to_string());
    }

    pub fn set_device_map(&self, map: Vec<ModuleDevice>) {
        *self.device_map.lock().unwrap() = map;
    }

    /// Rendered prompts seen by `generate`, in call order
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    pub fn params(&self) -> Vec<ParamMap> {
        self.params.lock().unwrap().clone()
    }

    pub fn generate_calls(&self) -> u32 {
        self.generate_calls.load(Ordering::Relaxed)
    }

    pub fn inference_mode_calls(&self) -> u32 {
        self.inference_mode.load(Ordering::Relaxed)
    }
}

/// Character-level mock model.
///
/// Each char is one token. The output is the input ids followed by the
/// scripted response, mirroring real decoder output.
pub struct MockModel {
    script: Arc<ModelScript>,
}

impl VisionLanguageModel for MockModel {
    fn device_map(&self) -> Vec<ModuleDevice> {
        self.script.device_map.lock().unwrap().clone()
    }

    fn set_inference_mode(&mut self) {
        self.script.inference_mode.fetch_add(1, Ordering::Relaxed);
    }

    fn render_prompt(&self, messages: &[ChatMessage]) -> Result<String> {
        let mut rendered = String::new();
        for message in messages {
            let role = match message.role {
                Role::System => "system",
                Role::User => "user",
            };
            rendered.push_str(role);
            rendered.push_str(": ");
            for part in &message.content {
                match part {
                    ContentPart::Image => rendered.push_str("<image>"),
                    ContentPart::Text { text } => rendered.push_str(text),
                }
            }
            rendered.push('\n');
        }
        Ok(rendered)
    }

    fn encode(&self, prompt: &str) -> Result<Vec<u32>> {
        Ok(prompt.chars().map(|c| c as u32).collect())
    }

    fn generate(&self, _image: &RgbImage, input_ids: &[u32], params: &ParamMap) -> Result<Vec<u32>> {
        self.script.generate_calls.fetch_add(1, Ordering::Relaxed);
        let prompt = self.decode(input_ids)?;
        self.script.prompts.lock().unwrap().push(prompt.clone());
        self.script.params.lock().unwrap().push(params.clone());

        if let Some(marker) = self.script.fail_on.lock().unwrap().as_deref() {
            if prompt.contains(marker) {
                return Err(Error::inference("simulated out-of-memory during generation"));
            }
        }

        let response = self
            .script
            .responses
            .lock()
            .unwrap()
            .iter()
            .find(|(marker, _)| prompt.contains(marker.as_str()))
            .map(|(_, response)| response.clone())
            .unwrap_or_default();

        let mut output = input_ids.to_vec();
        output.extend(response.chars().map(|c| c as u32));
        Ok(output)
    }

    fn decode(&self, ids: &[u32]) -> Result<String> {
        ids.iter()
            .map(|&id| char::from_u32(id).ok_or_else(|| Error::inference("invalid token id")))
            .collect()
    }
}

/// Scripted outcome of one `load_local` call
#[derive(Debug, Clone)]
pub enum LoadOutcome {
    Missing,
    Fail(String),
    Model,
}

/// Loader replaying a queue of outcomes; an empty queue yields a model
pub struct ScriptedLoader {
    outcomes: Mutex<VecDeque<LoadOutcome>>,
    script: Arc<ModelScript>,
    calls: AtomicU32,
    seen_load_params: Mutex<Vec<ParamMap>>,
}

impl ScriptedLoader {
    pub fn new(script: Arc<ModelScript>) -> Self {
        Self {
            outcomes: Mutex::new(VecDeque::new()),
            script,
            calls: AtomicU32::new(0),
            seen_load_params: Mutex::new(Vec::new()),
        }
    }

    pub fn with_outcomes(self, outcomes: impl IntoIterator<Item = LoadOutcome>) -> Self {
        self.outcomes.lock().unwrap().extend(outcomes);
        self
    }

    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::Relaxed)
    }

    pub fn seen_load_params(&self) -> Vec<ParamMap> {
        self.seen_load_params.lock().unwrap().clone()
    }
}

impl VlmLoader for ScriptedLoader {
    fn load_local(
        &self,
        _model_dir: &Path,
        load_params: &ParamMap,
        _quantization: &ParamMap,
    ) -> std::result::Result<Box<dyn VisionLanguageModel>, LoadError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        self.seen_load_params
            .lock()
            .unwrap()
            .push(load_params.clone());

        let outcome = self
            .outcomes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(LoadOutcome::Model);

        match outcome {
            LoadOutcome::Missing => Err(LoadError::MissingArtifacts(vec![
                "model.safetensors".to_string(),
            ])),
            LoadOutcome::Fail(msg) => Err(LoadError::failed(msg)),
            LoadOutcome::Model => Ok(Box::new(MockModel {
                script: self.script.clone(),
            })),
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Fetcher counting its calls, optionally failing
#[derive(Default)]
pub struct CountingFetcher {
    calls: AtomicU32,
    fail: bool,
    targets: Mutex<Vec<PathBuf>>,
}

impl CountingFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::Relaxed)
    }

    pub fn targets(&self) -> Vec<PathBuf> {
        self.targets.lock().unwrap().clone()
    }
}

impl SnapshotFetcher for CountingFetcher {
    fn fetch(&self, model_id: &str, target_dir: &Path) -> Result<()> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        self.targets.lock().unwrap().push(target_dir.to_path_buf());
        if self.fail {
            return Err(Error::model_unavailable(format!("network down for {}", model_id)));
        }
        Ok(())
    }
}

/// Image source returning a fixed scene, rejecting paths containing `corrupt`
pub struct FixedImageSource {
    calls: AtomicU32,
}

impl FixedImageSource {
    pub fn new() -> Self {
        Self {
            calls: AtomicU32::new(0),
        }
    }

    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::Relaxed)
    }
}

impl ImageSource for FixedImageSource {
    fn decode(&self, path: &Path) -> Result<RgbImage> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        if path.to_string_lossy().contains("corrupt") {
            return Err(Error::decode(format!("{} is not an image", path.display())));
        }
        Ok(RgbImage::from_pixel(8, 8, Rgb([90, 90, 90])))
    }
}

/// Detector returning fixed detections
pub struct FixedDetector {
    detections: Vec<Detection>,
    calls: AtomicU32,
}

impl FixedDetector {
    pub fn new(detections: Vec<Detection>) -> Self {
        Self {
            detections,
            calls: AtomicU32::new(0),
        }
    }

    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::Relaxed)
    }
}

impl Detector for FixedDetector {
    fn detect(&self, _image: &RgbImage) -> Result<Vec<Detection>> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        Ok(self.detections.clone())
    }

    fn name(&self) -> &str {
        "fixed"
    }
}
