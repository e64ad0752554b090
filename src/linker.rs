//! Static relinking with staticx
//!
//! staticx bundles the frozen executable together with every shared library
//! it loads and the dynamic loader itself. The result is audited natively
//! before it replaces the final output.

use crate::bundle::{ArtifactKind, BuildArtifact};
use crate::common::{ToolCommand, RUNTIME_NAME_RESOLUTION_LIBS};
use crate::elf::ElfFile;
use crate::{PackError, PackResult};
use std::fs;
use std::path::{Path, PathBuf};

/// Dynamic dependencies of `path` that are not in `allow`
///
/// Covers every `DT_NEEDED` name and the `PT_INTERP` loader, compared by
/// file name. A fully static executable has neither.
pub fn audit(path: &Path, allow: &[String]) -> PackResult<Vec<String>> {
    let elf = ElfFile::open(path)?;

    let mut deps = elf.needed()?;
    if let Some(interp) = elf.interpreter()? {
        deps.push(interp);
    }

    let allowed = |dep: &str| {
        let name = Path::new(dep)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| dep.to_string());
        allow.iter().any(|a| a == dep || *a == name)
    };

    Ok(deps.into_iter().filter(|d| !allowed(d)).collect())
}

/// Drives staticx
pub struct StaticLinker {
    staticx: ToolCommand,
    output: PathBuf,
    allow: Vec<String>,
}

impl StaticLinker {
    /// Relink into `output`, tolerating only the `allow`-listed libraries
    pub fn new(staticx: ToolCommand, output: impl Into<PathBuf>, allow: Vec<String>) -> Self {
        Self {
            staticx,
            output: output.into(),
            allow,
        }
    }

    /// Final output path
    pub fn output(&self) -> &Path {
        &self.output
    }

    fn temp_output(&self) -> PathBuf {
        let mut name = self
            .output
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".staticx-tmp");
        self.output.with_file_name(name)
    }

    /// Produce the static executable from the dynamic bundle
    pub fn staticize(&self, dynamic: &BuildArtifact) -> PackResult<BuildArtifact> {
        if dynamic.kind != ArtifactKind::Dynamic {
            return Err(PackError::static_link(format!(
                "{} is already static",
                dynamic.path.display()
            )));
        }

        if let Some(parent) = self.output.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = self.temp_output();
        if tmp.exists() {
            fs::remove_file(&tmp)?;
        }

        tracing::info!(
            "Relinking {} statically -> {}",
            dynamic.path.display(),
            self.output.display()
        );
        tracing::info!(
            "Runtime constraint: {} are loaded by glibc at runtime and must exist on the target host",
            RUNTIME_NAME_RESOLUTION_LIBS.join(", ")
        );

        let status = self
            .staticx
            .command()
            .arg(&dynamic.path)
            .arg(&tmp)
            .status()
            .map_err(|e| {
                PackError::static_link(format!("Failed to run {}: {}", self.staticx, e))
            })?;

        if !status.success() {
            remove_quietly(&tmp);
            return Err(PackError::StaticLink {
                message: format!("{} exited with status: {}", self.staticx, status),
                code: status.code(),
            });
        }

        if !tmp.is_file() {
            return Err(PackError::static_link(format!(
                "{} did not produce {}",
                self.staticx,
                tmp.display()
            )));
        }

        let offenders = match audit(&tmp, &self.allow) {
            Ok(offenders) => offenders,
            Err(e) => {
                remove_quietly(&tmp);
                return Err(PackError::static_link(format!(
                    "cannot audit {}: {}",
                    tmp.display(),
                    e
                )));
            }
        };
        if !offenders.is_empty() {
            remove_quietly(&tmp);
            return Err(PackError::static_link(format!(
                "output still depends on shared libraries: {}",
                offenders.join(", ")
            )));
        }

        fs::rename(&tmp, &self.output)?;

        let artifact = BuildArtifact::from_path(&self.output, ArtifactKind::Static)?;
        tracing::info!(
            "Static executable: {} ({} bytes)",
            artifact.path.display(),
            artifact.size
        );
        Ok(artifact)
    }
}

fn remove_quietly(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::debug!("Failed to remove {}: {}", path.display(), e);
        }
    }
}
