//! Native extension patching
//!
//! Extension modules built by package maintainers carry RPATH/RUNPATH entries
//! pointing at directories that only existed on their build machines (or at
//! `$ORIGIN`-relative vendored library folders). staticx refuses to relink a
//! bundle whose libraries carry search paths it cannot follow, so before
//! bundling every native binary of the configured packages is backed up and
//! stripped of those entries.
//!
//! Discovery runs over the whole rule table before the first file is touched.

use crate::common::{backup_path_for, is_backup_path, partial_backup_path_for, PatchRule};
use crate::elf::{is_elf, ElfFile};
use crate::error::Warning;
use crate::lock::BuildLock;
use crate::restorer::PatchSession;
use crate::{PackError, PackResult};
use glob::{MatchOptions, Pattern};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;

/// A native binary selected for patching
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeBinaryArtifact {
    /// File inside the installation directory
    pub path: PathBuf,
    /// Owning package (rule name)
    pub package: String,
    /// Search paths were removed
    pub patched: bool,
    /// Backup location (`path` + reserved suffix)
    pub backup: PathBuf,
    /// BLAKE3 digest of the original content, set once the backup exists
    pub original_digest: Option<String>,
}

impl NativeBinaryArtifact {
    pub fn new(path: impl Into<PathBuf>, package: impl Into<String>) -> Self {
        let path = path.into();
        let backup = backup_path_for(&path);
        Self {
            path,
            package: package.into(),
            patched: false,
            backup,
            original_digest: None,
        }
    }

    /// A backup was created for this artifact
    pub fn has_backup(&self) -> bool {
        self.original_digest.is_some()
    }
}

/// Outcome of patching one artifact
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatchResult {
    /// Search paths were removed
    Patched { removed: Vec<String> },
    /// The file was left as is
    Skipped { reason: String },
}

/// Result of scanning the installation directory
#[derive(Debug, Default)]
pub struct Discovery {
    /// Artifacts ordered by path
    pub artifacts: Vec<NativeBinaryArtifact>,
    pub warnings: Vec<Warning>,
}

impl Discovery {
    /// Number of distinct owning packages
    pub fn package_count(&self) -> usize {
        let mut packages: Vec<&str> = self.artifacts.iter().map(|a| a.package.as_str()).collect();
        packages.sort_unstable();
        packages.dedup();
        packages.len()
    }
}

/// Finds and patches native binaries in an installation directory
pub struct Patcher {
    site_dir: PathBuf,
    rules: Vec<PatchRule>,
    case_sensitive: bool,
}

impl Patcher {
    pub fn new(site_dir: impl Into<PathBuf>, rules: Vec<PatchRule>, case_sensitive: bool) -> Self {
        Self {
            site_dir: site_dir.into(),
            rules,
            case_sensitive,
        }
    }

    /// Installation directory being scanned
    pub fn site_dir(&self) -> &Path {
        &self.site_dir
    }

    fn fold(&self, s: &str) -> String {
        if self.case_sensitive {
            s.to_string()
        } else {
            s.to_lowercase()
        }
    }

    /// A fragment matches a path component equal to it, or one that starts
    /// with it followed by a separator (`pillow.libs`, `PyMuPDF-1.24.dist-info`)
    fn fragment_matches(&self, rel: &Path, fragment: &str) -> bool {
        let fragment = self.fold(fragment.trim());
        if fragment.is_empty() {
            return false;
        }
        rel.components().any(|c| match c {
            Component::Normal(part) => {
                let part = self.fold(&part.to_string_lossy());
                match part.strip_prefix(fragment.as_str()) {
                    Some("") => true,
                    Some(rest) => rest.starts_with(|c: char| !c.is_alphanumeric()),
                    None => false,
                }
            }
            _ => false,
        })
    }

    /// Scan for artifacts; fails if a required rule matches nothing
    pub fn discover(&self) -> PackResult<Discovery> {
        let mut discovery = Discovery::default();

        if !self.site_dir.is_dir() {
            return Err(PackError::Discovery(format!(
                "installation directory does not exist: {}",
                self.site_dir.display()
            )));
        }

        let options = MatchOptions {
            case_sensitive: self.case_sensitive,
            require_literal_separator: false,
            require_literal_leading_dot: false,
        };

        let mut compiled = Vec::with_capacity(self.rules.len());
        for rule in &self.rules {
            let patterns = rule
                .patterns
                .iter()
                .map(|p| {
                    Pattern::new(p).map_err(|e| {
                        PackError::Config(format!(
                            "invalid pattern '{}' for {}: {}",
                            p, rule.package, e
                        ))
                    })
                })
                .collect::<PackResult<Vec<_>>>()?;
            compiled.push((rule, patterns));
        }

        let mut found: BTreeMap<PathBuf, String> = BTreeMap::new();
        let mut counts = vec![0usize; compiled.len()];

        for entry in WalkDir::new(&self.site_dir).sort_by_file_name() {
            let entry = entry.map_err(|e| PackError::Io(e.into()))?;
            if !entry.file_type().is_file() || is_backup_path(entry.path()) {
                continue;
            }

            let rel = entry
                .path()
                .strip_prefix(&self.site_dir)
                .unwrap_or_else(|_| entry.path());
            let file_name = entry.file_name().to_string_lossy();

            for (idx, (rule, patterns)) in compiled.iter().enumerate() {
                let name_matches = patterns.iter().any(|p| p.matches_with(&file_name, options));
                if !name_matches || !rule.fragments.iter().any(|f| self.fragment_matches(rel, f)) {
                    continue;
                }

                if !is_elf(entry.path()) {
                    discovery.warnings.push(Warning::Discovery(format!(
                        "{} matches {} but is not an ELF binary",
                        entry.path().display(),
                        rule.package
                    )));
                    break;
                }

                counts[idx] += 1;
                found
                    .entry(entry.path().to_path_buf())
                    .or_insert_with(|| rule.package.clone());
                break;
            }
        }

        let mut missing = Vec::new();
        for ((rule, _), count) in compiled.iter().zip(&counts) {
            if *count > 0 {
                tracing::info!("{}: {} native binaries", rule.package, count);
            } else if rule.required {
                missing.push(rule.package.clone());
            } else {
                discovery.warnings.push(Warning::Discovery(format!(
                    "no native binaries found for {}",
                    rule.package
                )));
            }
        }

        if !missing.is_empty() {
            return Err(PackError::Discovery(format!(
                "required packages have no native binaries in {}: {}",
                self.site_dir.display(),
                missing.join(", ")
            )));
        }

        discovery.artifacts = found
            .into_iter()
            .map(|(path, package)| NativeBinaryArtifact::new(path, package))
            .collect();

        for warning in &discovery.warnings {
            tracing::warn!("{}", warning);
        }

        Ok(discovery)
    }

    /// Write a complete copy of `data` to the artifact's backup path
    ///
    /// The copy is written and synced under the partial name, then linked to
    /// the backup name, which fails if a backup already exists. Only complete
    /// backups ever carry the backup suffix; the partial file is removed on
    /// every path.
    fn write_backup(artifact: &NativeBinaryArtifact, data: &[u8]) -> PackResult<()> {
        let partial = partial_backup_path_for(&artifact.path);
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&partial)?;

        let written = file
            .write_all(data)
            .and_then(|()| file.sync_all())
            .and_then(|()| fs::metadata(&artifact.path))
            .and_then(|meta| fs::set_permissions(&partial, meta.permissions()))
            .and_then(|()| fs::hard_link(&partial, &artifact.backup));
        drop(file);

        if let Err(e) = fs::remove_file(&partial) {
            tracing::debug!("Failed to remove {}: {}", partial.display(), e);
        }
        written.map_err(PackError::from)
    }

    /// Back up one artifact and strip its search paths
    ///
    /// The backup is complete and synced before the file is touched; an
    /// existing backup or a failed copy is fatal and leaves no backup behind.
    /// A file that cannot be rewritten is skipped, its backup is kept for
    /// restore.
    pub fn patch(&self, artifact: &mut NativeBinaryArtifact) -> PackResult<PatchResult> {
        let data = fs::read(&artifact.path)?;
        let digest = blake3::hash(&data).to_hex().to_string();

        Self::write_backup(artifact, &data)?;
        artifact.original_digest = Some(digest);

        let mut elf = match ElfFile::parse(&artifact.path, data) {
            Ok(elf) => elf,
            Err(e) => {
                return Ok(PatchResult::Skipped {
                    reason: e.to_string(),
                })
            }
        };

        let removed = match elf.remove_search_paths() {
            Ok(removed) => removed,
            Err(e) => {
                return Ok(PatchResult::Skipped {
                    reason: e.to_string(),
                })
            }
        };

        if removed.is_empty() {
            let reason = match elf.is_dynamic() {
                Ok(true) => "no RPATH/RUNPATH entries",
                _ => "no dynamic section",
            };
            return Ok(PatchResult::Skipped {
                reason: reason.to_string(),
            });
        }

        elf.save()?;
        artifact.patched = true;
        Ok(PatchResult::Patched { removed })
    }

    /// Patch every artifact inside a session that restores them on drop
    ///
    /// If a fatal error stops the loop, the partially built session is
    /// dropped and everything backed up so far is restored.
    pub fn patch_all(
        &self,
        artifacts: Vec<NativeBinaryArtifact>,
        lock: Option<BuildLock>,
    ) -> PackResult<PatchSession> {
        let mut session = PatchSession::new(lock);

        for mut artifact in artifacts {
            let result = self.patch(&mut artifact);
            if artifact.has_backup() {
                session.track(artifact.clone());
            }

            match result? {
                PatchResult::Patched { removed } => {
                    tracing::debug!(
                        "Patched {} (removed: {})",
                        artifact.path.display(),
                        removed.join(", ")
                    );
                }
                PatchResult::Skipped { reason } => {
                    let warning = Warning::Patch {
                        path: artifact.path.clone(),
                        reason,
                    };
                    tracing::warn!("{}", warning);
                    session.warn(warning);
                }
            }
        }

        tracing::info!(
            "Patched {} of {} native binaries ({} backups)",
            session.patched_count(),
            session.artifacts().len(),
            session.backups_created()
        );
        Ok(session)
    }
}
