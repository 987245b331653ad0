//! Doctrine knowledge base and report prompt composition
//!
//! The doctrine document is a flat mapping from category key to an entry with
//! physical damage sections, plus one reserved scene-level string holding the
//! functional damage definitions. Composition is deterministic: the same
//! categories always render byte-identical text.

use crate::config::{
    in_file, load_document, parse_document, value_kind, CATEGORIES_PLACEHOLDER,
    DOCTRINE_PLACEHOLDER,
};
use bda_core::{Error, Result};
use serde_yaml::{Mapping, Value};
use std::path::Path;
use tracing::debug;

/// Reserved key holding the scene-level functional damage definitions
pub const FUNCTIONAL_DAMAGE_KEY: &str = "functional_damage_definitions";

/// Physical damage sections, in rendering order
pub const PHYSICAL_SECTIONS: &[&str] = &[
    "physical_damage_definitions",
    "physical_damage_considerations",
];

/// Rendered when no requested category has a doctrine entry
pub const NO_TARGET_DOCTRINE: &str = "NO TARGET DOCTRINE AVAILABLE.";

/// Heading of the functional damage block
pub const FUNCTIONAL_HEADING: &str = "SCENE-LEVEL FUNCTIONAL DAMAGE DEFINITIONS";

/// Rendered under the functional heading when the reserved key is absent
pub const NO_FUNCTIONAL_DOCTRINE: &str = "NO FUNCTIONAL DOCTRINE AVAILABLE.";

/// Categories text when nothing was detected
pub const NO_CATEGORIES: &str = "NONE";

/// Parsed doctrine knowledge base
#[derive(Debug, Clone)]
pub struct Doctrine {
    entries: Vec<(String, Value)>,
    functional: Option<String>,
}

impl Doctrine {
    /// Load from a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        Self::from_document(load_document(path)?).map_err(|e| in_file(path, e))
    }

    /// Load from a YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Self::from_document(parse_document(yaml)?)
    }

    /// Build from an already parsed document, preserving key order
    pub fn from_document(document: Mapping) -> Result<Self> {
        let mut entries = Vec::with_capacity(document.len());
        let mut functional = None;

        for (key, value) in document {
            let key = match key {
                Value::String(key) => key,
                other => {
                    return Err(Error::config(format!(
                        "Doctrine keys must be strings, found {}",
                        value_kind(&other)
                    )));
                }
            };

            if key == FUNCTIONAL_DAMAGE_KEY {
                functional = match value {
                    Value::String(text) => Some(text),
                    Value::Null => None,
                    other => {
                        return Err(Error::config(format!(
                            "{} must be a string, found {}",
                            FUNCTIONAL_DAMAGE_KEY,
                            value_kind(&other)
                        )));
                    }
                };
                continue;
            }

            entries.push((key, value));
        }

        Ok(Self {
            entries,
            functional,
        })
    }

    /// Category keys in document order, without the reserved key
    pub fn categories(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(key, _)| key.as_str())
    }

    /// Raw entry for a category
    pub fn entry(&self, category: &str) -> Option<&Value> {
        self.entries
            .iter()
            .find(|(key, _)| key == category)
            .map(|(_, value)| value)
    }

    /// Scene-level functional damage definitions
    pub fn functional_definitions(&self) -> Option<&str> {
        self.functional.as_deref()
    }
}

/// Renders doctrine into report prompt text
#[derive(Debug, Clone)]
pub struct DoctrineComposer {
    doctrine: Doctrine,
}

impl DoctrineComposer {
    pub fn new(doctrine: Doctrine) -> Self {
        Self { doctrine }
    }

    pub fn doctrine(&self) -> &Doctrine {
        &self.doctrine
    }

    /// Physical damage doctrine for the given categories, in input order.
    ///
    /// Categories without a structured entry are skipped.
    pub fn render_physical<S: AsRef<str>>(&self, categories: &[S]) -> String {
        let mut lines = Vec::new();

        for category in categories {
            let category = category.as_ref();
            let entry = match self.doctrine.entry(category) {
                Some(Value::Mapping(entry)) => entry,
                Some(_) => {
                    debug!(category, "Doctrine entry is not structured, skipping");
                    continue;
                }
                None => {
                    debug!(category, "No doctrine entry, skipping");
                    continue;
                }
            };

            let title = heading(category);
            lines.push(format!("TARGET CATEGORY: {}", title));

            for section in PHYSICAL_SECTIONS {
                let text = match entry.get(*section).and_then(section_text) {
                    Some(text) => text,
                    None => continue,
                };
                lines.push(format!("{} {}", title, heading(section)));
                lines.push(text);
            }
        }

        if lines.is_empty() {
            NO_TARGET_DOCTRINE.to_string()
        } else {
            lines.join("\n").trim().to_string()
        }
    }

    /// Scene-level functional damage doctrine, rendered unconditionally
    pub fn render_functional(&self) -> String {
        let text = self
            .doctrine
            .functional_definitions()
            .map(str::trim)
            .unwrap_or(NO_FUNCTIONAL_DOCTRINE);
        format!("{}\n{}", FUNCTIONAL_HEADING, text)
    }

    /// Comma-joined categories, or `NONE`
    pub fn categories_text<S: AsRef<str>>(categories: &[S]) -> String {
        if categories.is_empty() {
            return NO_CATEGORIES.to_string();
        }
        categories
            .iter()
            .map(|c| c.as_ref())
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Physical block and functional block separated by a blank line
    pub fn doctrine_text<S: AsRef<str>>(&self, categories: &[S]) -> String {
        let physical = if categories.is_empty() {
            String::new()
        } else {
            self.render_physical(categories)
        };

        [physical, self.render_functional()]
            .iter()
            .filter(|part| !part.is_empty())
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join("\n\n")
            .trim()
            .to_string()
    }

    /// Report prompt with `{categories}` and `{doctrine}` substituted
    pub fn compose_report_prompt<S: AsRef<str>>(&self, template: &str, categories: &[S]) -> String {
        let categories_text = Self::categories_text(categories);
        let doctrine_text = self.doctrine_text(categories);

        template
            .replace(CATEGORIES_PLACEHOLDER, &categories_text)
            .replace(DOCTRINE_PLACEHOLDER, &doctrine_text)
    }
}

/// `physical_damage_definitions` -> `PHYSICAL DAMAGE DEFINITIONS`
fn heading(key: &str) -> String {
    key.replace('_', " ").to_uppercase()
}

fn section_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(text) => Some(text.trim().to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Sequence(items) => Some(
            items
                .iter()
                .filter_map(section_text)
                .map(|item| format!("- {}", item))
                .collect::<Vec<_>>()
                .join("\n"),
        ),
        Value::Mapping(_) => serde_yaml::to_string(value)
            .ok()
            .map(|text| text.trim().to_string()),
        Value::Tagged(tagged) => section_text(&tagged.value),
    }
}
