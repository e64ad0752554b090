//! Restoring patched native binaries
//!
//! Every backup created by the patcher is moved back over its patched file,
//! whether the run succeeded or not. [`PatchSession`] owns the patched set
//! and restores it on drop, so an early return or a panic between Patch and
//! Restore still leaves the installation directory as it was found.

use crate::common::{is_backup_path, is_partial_backup_path, BACKUP_SUFFIX};
use crate::error::Warning;
use crate::lock::BuildLock;
use crate::patcher::NativeBinaryArtifact;
use crate::{PackError, PackResult};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Outcome of a restore pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestoreReport {
    /// Files moved back from their backup
    pub restored: usize,
    /// Backups that were gone
    pub missing: usize,
    /// Restored files whose content differs from the recorded digest
    pub mismatched: usize,
    pub warnings: Vec<Warning>,
}

impl RestoreReport {
    /// Every backup was restored with its original content
    pub fn is_clean(&self) -> bool {
        self.missing == 0 && self.mismatched == 0 && self.warnings.is_empty()
    }
}

/// Moves backups back over patched files
pub struct Restorer;

impl Restorer {
    /// Restore every artifact that has a backup
    ///
    /// Never fails: problems are recorded as warnings and the remaining
    /// artifacts are still restored.
    pub fn restore(artifacts: &mut [NativeBinaryArtifact]) -> RestoreReport {
        let mut report = RestoreReport::default();

        for artifact in artifacts.iter_mut().filter(|a| a.has_backup()) {
            if !artifact.backup.exists() {
                report.missing += 1;
                report.warnings.push(Warning::Restore {
                    path: artifact.path.clone(),
                    reason: format!("backup {} is missing", artifact.backup.display()),
                });
                continue;
            }

            if let Err(e) = fs::rename(&artifact.backup, &artifact.path) {
                report.warnings.push(Warning::Restore {
                    path: artifact.path.clone(),
                    reason: format!("failed to move backup into place: {}", e),
                });
                continue;
            }
            report.restored += 1;
            artifact.patched = false;

            if let Some(ref expected) = artifact.original_digest {
                match fs::read(&artifact.path) {
                    Ok(data) if blake3::hash(&data).to_hex().as_str() == expected => {}
                    Ok(_) => {
                        report.mismatched += 1;
                        report.warnings.push(Warning::Restore {
                            path: artifact.path.clone(),
                            reason: "restored content does not match the original digest"
                                .to_string(),
                        });
                    }
                    Err(e) => {
                        report.warnings.push(Warning::Restore {
                            path: artifact.path.clone(),
                            reason: format!("failed to verify restored file: {}", e),
                        });
                    }
                }
            }
        }

        for warning in &report.warnings {
            tracing::warn!("{}", warning);
        }
        tracing::info!(
            "Restored {} native binaries ({} missing backups)",
            report.restored,
            report.missing
        );

        report
    }

    /// Put back backups left behind by an interrupted run
    ///
    /// Returns the number of files recovered.
    pub fn recover_stale(site_dir: &Path) -> PackResult<usize> {
        if !site_dir.is_dir() {
            return Ok(0);
        }

        let mut backups = Vec::new();
        let mut partials = Vec::new();
        for entry in WalkDir::new(site_dir) {
            let entry = entry.map_err(|e| PackError::Io(e.into()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            if is_partial_backup_path(entry.path()) {
                partials.push(entry.into_path());
            } else if is_backup_path(entry.path()) {
                backups.push(entry.into_path());
            }
        }

        // never completed, so the original was not touched
        for partial in &partials {
            tracing::warn!("Removing incomplete backup: {}", partial.display());
            fs::remove_file(partial)?;
        }

        let mut recovered = 0usize;
        for backup in &backups {
            let name = backup.to_string_lossy();
            let original = PathBuf::from(&name[..name.len() - BACKUP_SUFFIX.len()]);

            tracing::warn!(
                "Recovering stale backup from an interrupted run: {}",
                original.display()
            );
            fs::rename(backup, &original)?;
            recovered += 1;
        }

        if recovered > 0 {
            tracing::info!("Recovered {} stale backups", recovered);
        }
        Ok(recovered)
    }
}

/// The set of patched artifacts between Patch and Restore
///
/// Holds the exclusive lock on a shared installation directory for its
/// whole life.
/// Dropping a session that was not restored explicitly restores it.
#[derive(Debug)]
pub struct PatchSession {
    artifacts: Vec<NativeBinaryArtifact>,
    lock: Option<BuildLock>,
    restored: bool,
    warnings: Vec<Warning>,
}

impl PatchSession {
    pub fn new(lock: Option<BuildLock>) -> Self {
        Self {
            artifacts: Vec::new(),
            lock,
            restored: false,
            warnings: Vec::new(),
        }
    }

    /// Record an artifact whose backup exists
    pub fn track(&mut self, artifact: NativeBinaryArtifact) {
        self.artifacts.push(artifact);
    }

    pub(crate) fn warn(&mut self, warning: Warning) {
        self.warnings.push(warning);
    }

    /// Tracked artifacts
    pub fn artifacts(&self) -> &[NativeBinaryArtifact] {
        &self.artifacts
    }

    /// Non-fatal problems hit while patching
    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }

    pub fn backups_created(&self) -> usize {
        self.artifacts.iter().filter(|a| a.has_backup()).count()
    }

    pub fn patched_count(&self) -> usize {
        self.artifacts.iter().filter(|a| a.patched).count()
    }

    /// Parent directories of patched artifacts, sorted
    pub fn patched_dirs(&self) -> Vec<PathBuf> {
        self.artifacts
            .iter()
            .filter(|a| a.patched)
            .filter_map(|a| a.path.parent().map(Path::to_path_buf))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Restore every tracked artifact and release the lock
    pub fn restore(mut self) -> RestoreReport {
        self.restore_inner()
    }

    fn restore_inner(&mut self) -> RestoreReport {
        self.restored = true;
        let report = Restorer::restore(&mut self.artifacts);
        self.lock.take();
        report
    }
}

impl Drop for PatchSession {
    fn drop(&mut self) {
        if !self.restored && !self.artifacts.is_empty() {
            tracing::warn!(
                "Run ended before restore; restoring {} native binaries",
                self.artifacts.len()
            );
            self.restore_inner();
        }
    }
}
