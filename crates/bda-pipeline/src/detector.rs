//! Optional object detector capability

use bda_core::{Detection, Result};
use image::RgbImage;

/// External detector that locates damaged targets in a scene.
///
/// When the pipeline is built without one, the vision-language model
/// classifies the scene itself.
pub trait Detector: Send + Sync {
    /// Detect targets in the decoded scene
    fn detect(&self, image: &RgbImage) -> Result<Vec<Detection>>;

    /// Detector name, for logging
    fn name(&self) -> &str {
        "detector"
    }
}
