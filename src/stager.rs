//! Resource staging
//!
//! Copies runtime data (tesseract model files) into the build's staging
//! directory so the bundle references a stable, build-owned copy.

use crate::common::{is_contained_dest, ResourceAsset};
use crate::{PackError, PackResult};
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Result of staging one source
#[derive(Debug, Clone)]
pub struct StagedPath {
    /// Where the copy lives
    pub path: PathBuf,
    /// Files copied
    pub file_count: usize,
    /// Bytes copied
    pub total_size: u64,
}

/// Copies resources into a staging directory
pub struct Stager {
    staging_dir: PathBuf,
}

impl Stager {
    pub fn new(staging_dir: impl Into<PathBuf>) -> Self {
        Self {
            staging_dir: staging_dir.into(),
        }
    }

    /// Staging root
    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }

    /// Copy `source` to `dest`, replacing whatever `dest` held
    ///
    /// The destination is cleared first, so staging the same source twice
    /// yields identical content.
    pub fn stage(source: &Path, dest: &Path) -> PackResult<StagedPath> {
        if !source.exists() {
            return Err(PackError::AssetNotFound(source.to_path_buf()));
        }

        if dest.is_dir() {
            fs::remove_dir_all(dest)?;
        } else if dest.exists() {
            fs::remove_file(dest)?;
        }
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut file_count = 0usize;
        let mut total_size = 0u64;

        if source.is_file() {
            total_size = fs::copy(source, dest)?;
            file_count = 1;
        } else {
            fs::create_dir_all(dest)?;
            for entry in WalkDir::new(source).follow_links(true) {
                let entry = entry.map_err(|e| PackError::Io(e.into()))?;
                let rel = entry
                    .path()
                    .strip_prefix(source)
                    .map_err(|e| PackError::Config(e.to_string()))?;
                let target = dest.join(rel);

                if entry.file_type().is_dir() {
                    fs::create_dir_all(&target)?;
                } else if entry.file_type().is_file() {
                    total_size += fs::copy(entry.path(), &target)?;
                    file_count += 1;
                }
            }
        }

        tracing::debug!(
            "Staged {} -> {} ({} files, {} bytes)",
            source.display(),
            dest.display(),
            file_count,
            total_size
        );

        Ok(StagedPath {
            path: dest.to_path_buf(),
            file_count,
            total_size,
        })
    }

    /// Stage every asset marked `stage` and point it at its staged copy
    ///
    /// Unstaged assets are returned unchanged.
    pub fn stage_all(&self, assets: &[ResourceAsset]) -> PackResult<Vec<ResourceAsset>> {
        let mut out = Vec::with_capacity(assets.len());
        let mut staged = 0usize;

        for asset in assets {
            if !asset.stage {
                out.push(asset.clone());
                continue;
            }

            if !is_contained_dest(&asset.dest) {
                return Err(PackError::Config(format!(
                    "staged resource {} would land outside {}: {}",
                    asset.source.display(),
                    self.staging_dir.display(),
                    asset.dest
                )));
            }
            let dest = self.staging_dir.join(&asset.dest);
            let result = Self::stage(&asset.source, &dest)?;
            tracing::info!(
                "Staged {} ({} files) -> {}",
                asset.source.display(),
                result.file_count,
                result.path.display()
            );
            out.push(ResourceAsset {
                source: result.path,
                dest: asset.dest.clone(),
                stage: false,
            });
            staged += 1;
        }

        if staged == 0 {
            tracing::debug!("No resources to stage");
        }
        Ok(out)
    }
}
