//! Image decoding

use bda_core::{Error, Result};
use image::{ImageReader, RgbImage};
use std::path::Path;

/// Decodes an image path into a 3-channel pixel buffer
pub trait ImageSource: Send + Sync {
    fn decode(&self, path: &Path) -> Result<RgbImage>;
}

/// Reads images from the filesystem with the `image` crate
#[derive(Debug, Clone, Copy, Default)]
pub struct FileImageSource;

impl ImageSource for FileImageSource {
    fn decode(&self, path: &Path) -> Result<RgbImage> {
        let reader = ImageReader::open(path)
            .map_err(|e| Error::decode(format!("Failed to open {}: {}", path.display(), e)))?
            .with_guessed_format()
            .map_err(|e| Error::decode(format!("Failed to read {}: {}", path.display(), e)))?;

        let image = reader
            .decode()
            .map_err(|e| Error::decode(format!("Failed to decode {}: {}", path.display(), e)))?;

        Ok(image.to_rgb8())
    }
}
