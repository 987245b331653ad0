//! Core types shared across the BDA pipeline

use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque parameter map forwarded verbatim to the inference capability
pub type ParamMap = serde_json::Map<String, serde_json::Value>;

/// Axis-aligned bounding region in pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub xmin: u32,
    pub ymin: u32,
    pub xmax: u32,
    pub ymax: u32,
}

impl BoundingBox {
    /// Create a new bounding box
    pub fn new(xmin: u32, ymin: u32, xmax: u32, ymax: u32) -> Self {
        Self {
            xmin,
            ymin,
            xmax,
            ymax,
        }
    }

    /// Width of the region (zero when inverted)
    pub fn width(&self) -> u32 {
        self.xmax.saturating_sub(self.xmin)
    }

    /// Height of the region (zero when inverted)
    pub fn height(&self) -> u32 {
        self.ymax.saturating_sub(self.ymin)
    }
}

/// A detected damage category in a scene
///
/// Detections produced by model self-classification carry only a label.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    /// Category label, a member of the category vocabulary
    pub label: String,

    /// Detector confidence (0.0-1.0)
    pub score: Option<f32>,

    /// Region of the scene the detection covers
    pub bbox: Option<BoundingBox>,

    /// Sub-image cut out of the scene at `bbox`
    pub crop: Option<RgbImage>,
}

impl Detection {
    /// Create a label-only detection
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            score: None,
            bbox: None,
            crop: None,
        }
    }

    /// Attach a confidence score
    pub fn with_score(mut self, score: f32) -> Self {
        self.score = Some(score);
        self
    }

    /// Attach a bounding box
    pub fn with_box(mut self, bbox: BoundingBox) -> Self {
        self.bbox = Some(bbox);
        self
    }

    /// Cut the crop out of `scene` using the attached box.
    ///
    /// The box is clamped to the scene bounds. Detections without a box are
    /// returned unchanged.
    pub fn with_crop_from(mut self, scene: &RgbImage) -> Self {
        if let Some(bbox) = self.bbox {
            let x = bbox.xmin.min(scene.width());
            let y = bbox.ymin.min(scene.height());
            let w = bbox.width().min(scene.width() - x);
            let h = bbox.height().min(scene.height() - y);
            self.crop = Some(image::imageops::crop_imm(scene, x, y, w, h).to_image());
        }
        self
    }
}

/// Role of a message in the prompt sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
}

/// One piece of message content
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ContentPart {
    /// Placeholder for the scene image passed alongside the messages
    Image,
    Text { text: String },
}

/// A chat message sent to the vision-language model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: Vec<ContentPart>,
}

impl ChatMessage {
    /// Create a system message
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: vec![ContentPart::Text { text: text.into() }],
        }
    }

    /// Create a user message carrying the scene image followed by text
    pub fn user_with_image(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: vec![ContentPart::Image, ContentPart::Text { text: text.into() }],
        }
    }

    /// Concatenated text parts of the message
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|part| match part {
                ContentPart::Text { text } => Some(text.as_str()),
                ContentPart::Image => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Whether the message carries the image
    pub fn has_image(&self) -> bool {
        self.content.iter().any(|p| matches!(p, ContentPart::Image))
    }
}

/// Where a model submodule's weights live
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DevicePlacement {
    Cpu,
    /// Offloaded to disk
    Disk,
    Cuda(usize),
    Metal(usize),
}

impl DevicePlacement {
    /// Whether this placement is on an accelerator
    pub fn is_accelerator(&self) -> bool {
        matches!(self, Self::Cuda(_) | Self::Metal(_))
    }
}

impl fmt::Display for DevicePlacement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cpu => write!(f, "cpu"),
            Self::Disk => write!(f, "disk"),
            Self::Cuda(idx) => write!(f, "cuda:{}", idx),
            Self::Metal(idx) => write!(f, "metal:{}", idx),
        }
    }
}

/// Device placement of one model submodule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleDevice {
    pub module: String,
    pub placement: DevicePlacement,
}

impl ModuleDevice {
    pub fn new(module: impl Into<String>, placement: DevicePlacement) -> Self {
        Self {
            module: module.into(),
            placement,
        }
    }
}
