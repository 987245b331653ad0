//! Snapshot downloads from the Hugging Face Hub

use crate::loader_plugin::SnapshotFetcher;
use bda_core::{Error, Result};
use hf_hub::{api::sync::ApiBuilder, Repo, RepoType};
use std::path::Path;
use tracing::{debug, info, warn};

/// Hub download cache, kept inside the model directory while a fetch runs
pub const HUB_CACHE_DIR: &str = ".hub-cache";

/// Fetches every file of a Hub model repository into a local directory
#[derive(Debug, Clone, Default)]
pub struct HfSnapshotFetcher {
    revision: Option<String>,
}

impl HfSnapshotFetcher {
    /// Fetch the default branch
    pub fn new() -> Self {
        Self::default()
    }

    /// Pin a revision (branch, tag or commit)
    pub fn with_revision(mut self, revision: impl Into<String>) -> Self {
        self.revision = Some(revision.into());
        self
    }

    /// The pinned revision, if any
    pub fn revision(&self) -> Option<&str> {
        self.revision.as_deref()
    }
}

/// Move a downloaded file out of the hub cache.
///
/// The cache hands out symlinks into its blob store, so the blob itself is
/// moved. Falls back to a copy when the blob cannot be renamed.
fn move_into_place(cached: &Path, dest: &Path) -> std::io::Result<()> {
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let blob = std::fs::canonicalize(cached)?;
    if std::fs::rename(&blob, dest).is_err() {
        std::fs::copy(&blob, dest)?;
    }
    Ok(())
}

/// Drop the hub cache so the snapshot is stored once
fn remove_hub_cache(target_dir: &Path) {
    let cache = target_dir.join(HUB_CACHE_DIR);
    if let Err(e) = std::fs::remove_dir_all(&cache) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(cache = %cache.display(), error = %e, "Failed to remove hub cache");
        }
    }
}

impl SnapshotFetcher for HfSnapshotFetcher {
    fn fetch(&self, model_id: &str, target_dir: &Path) -> Result<()> {
        info!(
            model = model_id,
            revision = self.revision.as_deref().unwrap_or("main"),
            target = %target_dir.display(),
            "Downloading model snapshot from HuggingFace"
        );

        let api = ApiBuilder::new()
            .with_cache_dir(target_dir.join(HUB_CACHE_DIR))
            .with_progress(false)
            .build()
            .map_err(|e| {
                Error::model_unavailable(format!("Failed to initialize HuggingFace API: {}", e))
            })?;

        let repo = match &self.revision {
            Some(revision) => api.repo(Repo::with_revision(
                model_id.to_string(),
                RepoType::Model,
                revision.clone(),
            )),
            None => api.model(model_id.to_string()),
        };

        let listing = repo.info().map_err(|e| {
            Error::model_unavailable(format!("Failed to list files of '{}': {}", model_id, e))
        })?;

        for sibling in &listing.siblings {
            let file = &sibling.rfilename;
            debug!("Downloading {}", file);

            let cached = repo.get(file).map_err(|e| {
                Error::model_unavailable(format!("Failed to download {}: {}", file, e))
            })?;

            move_into_place(&cached, &target_dir.join(file)).map_err(|e| {
                Error::model_unavailable(format!("Failed to store {}: {}", file, e))
            })?;
        }
        remove_hub_cache(target_dir);

        info!(
            model = model_id,
            files = listing.siblings.len(),
            "Model snapshot stored at {}",
            target_dir.display()
        );
        Ok(())
    }
}
