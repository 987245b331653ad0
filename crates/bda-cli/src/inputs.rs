//! Input image discovery

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Extensions accepted as input images, compared case-insensitively
pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp"];

/// Whether the path carries an accepted image extension
pub fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            IMAGE_EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
        .unwrap_or(false)
}

/// Validate the input path
pub fn resolve_input(input: &Path) -> Result<PathBuf> {
    info!("Input source set to {}", input.display());
    if !input.exists() {
        bail!("The input path {} does not exist", input.display());
    }
    Ok(input.to_path_buf())
}

/// All images under `input`, sorted.
///
/// A file is returned as-is when it has an image extension. Directories are
/// searched recursively without following symlinked directories, so a link
/// back into the tree cannot yield the same image twice.
pub fn discover_images(input: &Path) -> Result<Vec<PathBuf>> {
    if input.is_file() {
        if has_image_extension(input) {
            return Ok(vec![input.to_path_buf()]);
        }
        bail!("The input path {} does not contain valid input data", input.display());
    }

    let mut images = Vec::new();
    collect_images(input, &mut images)?;

    if images.is_empty() {
        bail!("The input path {} does not contain valid input data", input.display());
    }

    images.sort();
    debug!(count = images.len(), "Discovered input images");
    Ok(images)
}

fn collect_images(dir: &Path, images: &mut Vec<PathBuf>) -> Result<()> {
    let entries = std::fs::read_dir(dir)
        .with_context(|| format!("Failed to read directory {}", dir.display()))?;

    for entry in entries {
        let entry =
            entry.with_context(|| format!("Failed to read directory {}", dir.display()))?;
        let file_type = entry
            .file_type()
            .with_context(|| format!("Failed to stat {}", entry.path().display()))?;
        let path = entry.path();

        if file_type.is_dir() {
            collect_images(&path, images)?;
        } else if file_type.is_symlink() && path.is_dir() {
            debug!(path = %path.display(), "Skipping symlinked directory");
        } else if path.is_file() && has_image_extension(&path) {
            images.push(path);
        }
    }

    Ok(())
}
