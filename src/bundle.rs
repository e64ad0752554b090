//! Bundling with PyInstaller
//!
//! Freezes the entry script together with the installed packages, the data
//! assets and the system binaries into one dynamically linked executable.

use crate::common::{ResourceAsset, SystemBinaryDependency, ToolCommand, BINARY_DIR};
use crate::{PackError, PackResult};
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

/// Everything that goes into the bundle besides Python code
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleManifest {
    /// Data entries, in order
    pub resources: Vec<ResourceAsset>,
    /// System binaries, placed under `bin/`
    pub binaries: Vec<SystemBinaryDependency>,
    /// Modules PyInstaller cannot find by static analysis
    pub hidden_imports: Vec<String>,
}

impl BundleManifest {
    pub fn new(
        resources: Vec<ResourceAsset>,
        binaries: Vec<SystemBinaryDependency>,
        hidden_imports: Vec<String>,
    ) -> Self {
        Self {
            resources,
            binaries,
            hidden_imports,
        }
    }

    /// Every referenced path must exist at bundle time
    pub fn validate(&self) -> PackResult<()> {
        let mut missing = Vec::new();
        for asset in &self.resources {
            if !asset.source.exists() {
                missing.push(asset.source.display().to_string());
            }
        }
        for binary in &self.binaries {
            if !binary.path.is_file() {
                missing.push(binary.path.display().to_string());
            }
        }

        if missing.is_empty() {
            Ok(())
        } else {
            Err(PackError::bundle(format!(
                "bundle entries do not exist: {}",
                missing.join(", ")
            )))
        }
    }

    /// `--add-data` / `--add-binary` / `--hidden-import` arguments
    pub fn pyinstaller_args(&self) -> Vec<OsString> {
        let mut args = Vec::new();
        for asset in &self.resources {
            args.push(OsString::from("--add-data"));
            args.push(pair_arg(&asset.source, &asset.dest));
        }
        for binary in &self.binaries {
            args.push(OsString::from("--add-binary"));
            args.push(pair_arg(&binary.path, BINARY_DIR));
        }
        for module in &self.hidden_imports {
            args.push(OsString::from("--hidden-import"));
            args.push(OsString::from(module));
        }
        args
    }
}

fn pair_arg(source: &Path, dest: &str) -> OsString {
    let mut arg = source.as_os_str().to_owned();
    arg.push(":");
    arg.push(dest);
    arg
}

/// Kind of executable produced by a stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    /// Frozen bundle, still linked against the host's shared libraries
    Dynamic,
    /// Relinked bundle without host library dependencies
    Static,
}

/// An executable written by the pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildArtifact {
    pub path: PathBuf,
    pub kind: ArtifactKind,
    /// Size in bytes
    pub size: u64,
}

impl BuildArtifact {
    /// Describe an existing file
    pub fn from_path(path: impl Into<PathBuf>, kind: ArtifactKind) -> PackResult<Self> {
        let path = path.into();
        let size = fs::metadata(&path)?.len();
        Ok(Self { path, kind, size })
    }
}

/// Drives PyInstaller
pub struct Bundler {
    name: String,
    pyinstaller: ToolCommand,
    dist_dir: PathBuf,
    work_dir: PathBuf,
    site_dir: Option<PathBuf>,
    library_dirs: Vec<PathBuf>,
}

impl Bundler {
    /// Bundle named `name` into `dist_dir`, using `work_dir` for scratch
    pub fn new(
        name: impl Into<String>,
        pyinstaller: ToolCommand,
        dist_dir: impl Into<PathBuf>,
        work_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            name: name.into(),
            pyinstaller,
            dist_dir: dist_dir.into(),
            work_dir: work_dir.into(),
            site_dir: None,
            library_dirs: Vec::new(),
        }
    }

    /// Installation directory to import packages from
    pub fn with_site_dir(mut self, site_dir: impl Into<PathBuf>) -> Self {
        self.site_dir = Some(site_dir.into());
        self
    }

    /// Directories holding patched libraries, searched first by the loader
    pub fn with_library_dirs(mut self, mut dirs: Vec<PathBuf>) -> Self {
        dirs.sort();
        dirs.dedup();
        self.library_dirs = dirs;
        self
    }

    /// Path the dynamic executable is written to
    pub fn output_path(&self) -> PathBuf {
        self.dist_dir.join(&self.name)
    }

    /// Path of the bundle report written next to the executable
    pub fn report_path(&self) -> PathBuf {
        self.dist_dir.join(format!("{}.bundle.json", self.name))
    }

    /// `LD_LIBRARY_PATH` for the PyInstaller process
    pub fn library_path(&self, inherited: Option<OsString>) -> Option<OsString> {
        let mut paths: Vec<PathBuf> = self.library_dirs.clone();
        if let Some(ref inherited) = inherited {
            paths.extend(std::env::split_paths(inherited));
        }
        if paths.is_empty() {
            return None;
        }
        std::env::join_paths(paths).ok().or(inherited)
    }

    /// Freeze the entry script into a dynamic executable
    pub fn freeze(&self, entry_point: &Path, manifest: &BundleManifest) -> PackResult<BuildArtifact> {
        if !entry_point.is_file() {
            return Err(PackError::bundle(format!(
                "entry point does not exist: {}",
                entry_point.display()
            )));
        }
        manifest.validate()?;

        fs::create_dir_all(&self.dist_dir)?;
        fs::create_dir_all(&self.work_dir)?;

        let output = self.output_path();
        if output.exists() {
            fs::remove_file(&output)?;
        }

        let mut cmd = self.pyinstaller.command();
        cmd.args(["--noconfirm", "--clean", "--onefile", "--name"])
            .arg(&self.name)
            .arg("--distpath")
            .arg(&self.dist_dir)
            .arg("--workpath")
            .arg(&self.work_dir)
            .arg("--specpath")
            .arg(&self.work_dir);
        if let Some(ref site) = self.site_dir {
            cmd.arg("--paths").arg(site).env("PYTHONPATH", site);
        }
        cmd.args(manifest.pyinstaller_args()).arg(entry_point);

        if let Some(library_path) = self.library_path(std::env::var_os("LD_LIBRARY_PATH")) {
            cmd.env("LD_LIBRARY_PATH", library_path);
        }

        tracing::info!(
            "Bundling {} ({} data entries, {} binaries, {} hidden imports)...",
            entry_point.display(),
            manifest.resources.len(),
            manifest.binaries.len(),
            manifest.hidden_imports.len()
        );
        tracing::debug!("Running: {:?}", cmd);

        let status = cmd
            .status()
            .map_err(|e| PackError::bundle(format!("Failed to run {}: {}", self.pyinstaller, e)))?;

        if !status.success() {
            return Err(PackError::Bundle {
                message: format!("{} exited with status: {}", self.pyinstaller, status),
                code: status.code(),
            });
        }

        if !output.is_file() {
            return Err(PackError::bundle(format!(
                "bundler did not produce {}",
                output.display()
            )));
        }

        fs::write(self.report_path(), serde_json::to_string_pretty(manifest)?)?;

        let artifact = BuildArtifact::from_path(output, ArtifactKind::Dynamic)?;
        tracing::info!(
            "Bundled {} ({} bytes)",
            artifact.path.display(),
            artifact.size
        );
        Ok(artifact)
    }
}
