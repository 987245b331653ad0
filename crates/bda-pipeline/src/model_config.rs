//! Model configuration from the `vlm` section
//!
//! The three parameter groups are opaque to the pipeline and forwarded to the
//! inference capability verbatim. The one rule applied here is precedence:
//! enabled quantization wins over an explicit numeric precision.

use bda_core::{Error, ParamMap, Result};
use serde_json::Value;
use tracing::warn;

const MODEL_ID_KEYS: &[&str] = &["model-id", "model_id"];
const LOAD_KEYS: &[&str] = &["load-params", "load_params", "load"];
const GENERATE_KEYS: &[&str] = &[
    "generate-params",
    "generate_params",
    "generate",
    "pipeline-params",
    "pipeline_params",
];
const QUANTIZATION_KEYS: &[&str] = &["quantization", "quantization-params", "quantization_params"];

/// Load parameters that pin a numeric precision
pub const PRECISION_KEYS: &[&str] = &["torch_dtype", "dtype"];

/// Quantization flags that count as "enabled"
const QUANTIZATION_FLAGS: &[&str] = &["enabled", "load_in_4bit", "load_in_8bit"];

/// Configuration for the resident vision-language model
#[derive(Debug, Clone, PartialEq)]
pub struct ModelConfig {
    /// Hub model identifier, e.g. `vikhyatk/moondream2`
    pub model_id: String,

    /// Parameters for constructing the model
    pub load_params: ParamMap,

    /// Parameters for every generation call
    pub generate_params: ParamMap,

    /// Quantization parameters
    pub quantization: ParamMap,
}

impl ModelConfig {
    /// Create a configuration with empty parameter groups
    pub fn new(model_id: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            load_params: ParamMap::new(),
            generate_params: ParamMap::new(),
            quantization: ParamMap::new(),
        }
    }

    /// Set load parameters
    pub fn with_load_params(mut self, params: ParamMap) -> Self {
        self.load_params = params;
        self
    }

    /// Set generation parameters
    pub fn with_generate_params(mut self, params: ParamMap) -> Self {
        self.generate_params = params;
        self
    }

    /// Set quantization parameters
    pub fn with_quantization(mut self, params: ParamMap) -> Self {
        self.quantization = params;
        self
    }

    /// Build from the raw `vlm` section.
    ///
    /// Keys that belong to no known group are generation parameters; explicit
    /// `generate-params` entries win over them.
    pub fn from_section(mut section: ParamMap) -> Result<Self> {
        let model_id = take_model_id(&mut section)?;
        let load_params = take_group(&mut section, LOAD_KEYS)?;
        let quantization = take_group(&mut section, QUANTIZATION_KEYS)?;
        let explicit_generate = take_group(&mut section, GENERATE_KEYS)?;

        let mut generate_params = section;
        generate_params.extend(explicit_generate);

        Ok(Self {
            model_id,
            load_params,
            generate_params,
            quantization,
        })
    }

    /// Whether quantization is switched on
    pub fn quantization_enabled(&self) -> bool {
        QUANTIZATION_FLAGS
            .iter()
            .any(|flag| matches!(self.quantization.get(*flag), Some(Value::Bool(true))))
    }

    /// Load parameters after applying the quantization precedence rule
    pub fn effective_load_params(&self) -> ParamMap {
        let mut params = self.load_params.clone();
        if !self.quantization_enabled() {
            return params;
        }

        for key in PRECISION_KEYS {
            if let Some(dropped) = params.remove(*key) {
                warn!(
                    model = %self.model_id,
                    key = *key,
                    value = %dropped,
                    "Quantization enabled, ignoring explicit precision"
                );
            }
        }

        params
    }
}

fn take_model_id(section: &mut ParamMap) -> Result<String> {
    let mut model_id = None;
    for key in MODEL_ID_KEYS {
        if let Some(value) = section.remove(*key) {
            model_id = Some(value);
        }
    }

    match model_id {
        Some(Value::String(id)) if !id.trim().is_empty() => Ok(id.trim().to_string()),
        Some(_) => Err(Error::config("vlm.model-id must be a non-empty string")),
        None => Err(Error::config("vlm.model-id is required")),
    }
}

fn take_group(section: &mut ParamMap, aliases: &[&str]) -> Result<ParamMap> {
    let mut group = ParamMap::new();
    for key in aliases {
        match section.remove(*key) {
            None | Some(Value::Null) => {}
            Some(Value::Object(map)) => group.extend(map),
            Some(_) => {
                return Err(Error::config(format!("vlm.{} must be a mapping", key)));
            }
        }
    }
    Ok(group)
}
