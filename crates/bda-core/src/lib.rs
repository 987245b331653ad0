//! BDA Core
//!
//! Core types and error handling shared across the BDA service crates.
//!
//! This crate provides:
//! - The error taxonomy for configuration, model acquisition, decoding and inference
//! - Detections and bounding boxes
//! - Chat message structures passed to vision-language models
//! - Device placement reporting for resident models

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::{
    BoundingBox, ChatMessage, ContentPart, Detection, DevicePlacement, ModuleDevice, ParamMap,
    Role,
};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::error::{Error, Result};
    pub use crate::types::{ChatMessage, Detection, DevicePlacement, ParamMap};
}
