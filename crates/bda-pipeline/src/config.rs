//! Configuration documents for the BDA pipeline
//!
//! Two YAML documents drive the pipeline: the prompt/model configuration and
//! the doctrine knowledge base. Both are read once, at construction, and are
//! immutable afterwards.

use crate::model_config::ModelConfig;
use bda_core::{Error, ParamMap, Result};
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use std::path::{Path, PathBuf};

/// Placeholder resolved to the comma-joined category list
pub const CATEGORIES_PLACEHOLDER: &str = "{categories}";

/// Placeholder resolved to the rendered doctrine text
pub const DOCTRINE_PLACEHOLDER: &str = "{doctrine}";

/// Load a YAML document whose top level must be a mapping
pub fn load_document(path: impl AsRef<Path>) -> Result<Mapping> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path)
        .map_err(|e| Error::config(format!("Failed to read {}: {}", path.display(), e)))?;

    parse_document(&contents).map_err(|e| in_file(path, e))
}

/// Prefix a configuration error with the document it came from
pub(crate) fn in_file(path: &Path, error: Error) -> Error {
    match error {
        Error::Config(msg) => Error::Config(format!("{}: {}", path.display(), msg)),
        other => other,
    }
}

/// Parse a YAML document whose top level must be a mapping
pub fn parse_document(contents: &str) -> Result<Mapping> {
    let value: Value = serde_yaml::from_str(contents)
        .map_err(|e| Error::config(format!("Malformed YAML: {}", e)))?;

    match value {
        Value::Mapping(mapping) => Ok(mapping),
        other => Err(Error::config(format!(
            "Top level must be a mapping, found {}",
            value_kind(&other)
        ))),
    }
}

pub(crate) fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Sequence(_) => "a sequence",
        Value::Mapping(_) => "a mapping",
        Value::Tagged(_) => "a tagged value",
    }
}

/// Prompt templates from the `prompts` section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptTemplates {
    /// System prompt, sent ahead of every request when non-empty
    #[serde(default)]
    pub system: String,

    /// Classification prompt, contains `{categories}`
    pub classify: String,

    /// Report prompt, contains `{categories}` and `{doctrine}`
    pub report: String,
}

impl PromptTemplates {
    /// Check the placeholder contract of the templates
    pub fn validate(&self) -> Result<()> {
        if !self.classify.contains(CATEGORIES_PLACEHOLDER) {
            return Err(Error::config(format!(
                "prompts.classify must contain {}",
                CATEGORIES_PLACEHOLDER
            )));
        }

        for placeholder in [CATEGORIES_PLACEHOLDER, DOCTRINE_PLACEHOLDER] {
            if !self.report.contains(placeholder) {
                return Err(Error::config(format!(
                    "prompts.report must contain {}",
                    placeholder
                )));
            }
        }

        Ok(())
    }

    /// Classification prompt with the full category vocabulary substituted
    pub fn resolve_classify<S: AsRef<str>>(&self, categories: &[S]) -> String {
        let joined = categories
            .iter()
            .map(|c| c.as_ref())
            .collect::<Vec<_>>()
            .join(", ");
        self.classify.replace(CATEGORIES_PLACEHOLDER, &joined)
    }
}

#[derive(Deserialize)]
struct RawConfig {
    prompts: PromptTemplates,
    vlm: ParamMap,
}

/// Typed view of the prompt/model configuration document
#[derive(Debug, Clone)]
pub struct BdaConfig {
    pub prompts: PromptTemplates,
    pub vlm: ModelConfig,
}

impl BdaConfig {
    /// Load from a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        Self::from_document(load_document(path)?).map_err(|e| in_file(path, e))
    }

    /// Load from a YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Self::from_document(parse_document(yaml)?)
    }

    /// Build from an already parsed document
    pub fn from_document(document: Mapping) -> Result<Self> {
        let raw: RawConfig = serde_yaml::from_value(Value::Mapping(document))
            .map_err(|e| Error::config(format!("Invalid configuration: {}", e)))?;

        raw.prompts.validate()?;
        let vlm = ModelConfig::from_section(raw.vlm)?;

        Ok(Self {
            prompts: raw.prompts,
            vlm,
        })
    }
}

/// Locations the pipeline reads from, fixed for its lifetime
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineSettings {
    /// Prompt/model configuration document
    pub config_path: PathBuf,

    /// Doctrine knowledge base document
    pub doctrine_path: PathBuf,

    /// Root of the local model cache
    pub models_dir: PathBuf,
}

impl PipelineSettings {
    /// Create settings using the default model cache root
    pub fn new(config_path: impl Into<PathBuf>, doctrine_path: impl Into<PathBuf>) -> Self {
        Self {
            config_path: config_path.into(),
            doctrine_path: doctrine_path.into(),
            models_dir: default_models_dir(),
        }
    }

    /// Set the model cache root
    pub fn with_models_dir(mut self, models_dir: impl Into<PathBuf>) -> Self {
        self.models_dir = models_dir.into();
        self
    }
}

/// `<user cache dir>/bda-svc/models`, or `./models` without a cache dir
pub fn default_models_dir() -> PathBuf {
    dirs::cache_dir()
        .map(|dir| dir.join("bda-svc").join("models"))
        .unwrap_or_else(|| PathBuf::from("./models"))
}
