//! Pack configuration types
//!
//! [`PackConfig`] is the manifest resolved against its base directory: every
//! path is absolute, every tool has a concrete command, and the build layout
//! under the work directory is fixed.

use crate::common::{
    resolve_path, PackageSpec, PatchRule, ResourceAsset, SystemBinaryDependency, ToolCommand,
};
use crate::manifest::Manifest;
use crate::PackResult;
use std::path::{Path, PathBuf};

/// Interpreter expectations
#[derive(Debug, Clone)]
pub struct InterpreterConfig {
    /// Expected interpreter path
    pub path: PathBuf,
    /// Required version prefix
    pub version: Option<String>,
    /// The interpreter found first on PATH must be this one
    pub require_on_path: bool,
}

/// External tool commands
#[derive(Debug, Clone)]
pub struct ToolsConfig {
    pub pip: ToolCommand,
    pub pyinstaller: ToolCommand,
    pub staticx: ToolCommand,
}

impl ToolsConfig {
    /// Run every tool as a module of the given interpreter
    pub fn for_interpreter(interpreter: &Path) -> Self {
        Self {
            pip: ToolCommand::python_module(interpreter, "pip"),
            pyinstaller: ToolCommand::python_module(interpreter, "PyInstaller"),
            staticx: ToolCommand::python_module(interpreter, "staticx"),
        }
    }
}

/// Fully resolved configuration for one pipeline run
#[derive(Debug, Clone)]
pub struct PackConfig {
    /// Executable name
    pub name: String,
    /// Application entry script
    pub entry_point: PathBuf,
    /// Final executable path
    pub output: PathBuf,
    /// Directory for staged data and build byproducts
    pub work_dir: PathBuf,
    /// Interpreter expectations
    pub interpreter: InterpreterConfig,
    /// Shared installation directory; `None` means ephemeral per run
    pub site_packages: Option<PathBuf>,
    /// Keep the ephemeral installation directory after the run
    pub keep_environment: bool,
    /// Packages to install
    pub packages: Vec<PackageSpec>,
    /// Data assets (sources resolved)
    pub resources: Vec<ResourceAsset>,
    /// System binaries
    pub binaries: Vec<SystemBinaryDependency>,
    /// Modules imported dynamically at runtime
    pub hidden_imports: Vec<String>,
    /// Native binary discovery rules
    pub patch_rules: Vec<PatchRule>,
    /// Case policy for fragment matching
    pub case_sensitive: bool,
    /// Shared libraries the final artifact may still require
    pub static_allow: Vec<String>,
    /// External tools
    pub tools: ToolsConfig,
}

impl PackConfig {
    /// Resolve a validated manifest against `base_dir`
    pub fn from_manifest(manifest: &Manifest, base_dir: &Path) -> PackResult<Self> {
        manifest.validate()?;

        let interpreter_path = resolve_path(base_dir, &manifest.interpreter.path);
        let work_dir = resolve_path(base_dir, &manifest.package.work_dir);
        let output = match manifest.package.output {
            Some(ref p) => resolve_path(base_dir, p),
            None => base_dir.join("dist").join(&manifest.package.name),
        };

        let mut tools = ToolsConfig::for_interpreter(&interpreter_path);
        if let Some(ref pip) = manifest.tools.pip {
            tools.pip = pip.clone();
        }
        if let Some(ref pyinstaller) = manifest.tools.pyinstaller {
            tools.pyinstaller = pyinstaller.clone();
        }
        if let Some(ref staticx) = manifest.tools.staticx {
            tools.staticx = staticx.clone();
        }

        let resources = manifest
            .resources
            .iter()
            .map(|asset| ResourceAsset {
                source: resolve_path(base_dir, &asset.source),
                dest: asset.dest.trim_matches('/').to_string(),
                stage: asset.stage,
            })
            .collect();

        let mut hidden_imports = manifest.bundle.hidden_imports.clone();
        hidden_imports.sort();
        hidden_imports.dedup();

        Ok(Self {
            name: manifest.package.name.clone(),
            entry_point: resolve_path(base_dir, &manifest.package.entry_point),
            output,
            work_dir,
            interpreter: InterpreterConfig {
                path: interpreter_path,
                version: manifest.interpreter.version.clone(),
                require_on_path: manifest.interpreter.require_on_path,
            },
            site_packages: manifest
                .environment
                .site_packages
                .as_ref()
                .map(|p| resolve_path(base_dir, p)),
            keep_environment: false,
            packages: manifest.environment.packages.clone(),
            resources,
            binaries: manifest.binaries.clone(),
            hidden_imports,
            patch_rules: manifest.patch.rules.clone(),
            case_sensitive: manifest.patch.case_sensitive,
            static_allow: manifest.static_link.allow.clone(),
            tools,
        })
    }

    /// Keep the ephemeral installation directory after the run
    pub fn with_keep_environment(mut self, keep: bool) -> Self {
        self.keep_environment = keep;
        self
    }

    /// Override the final output path
    pub fn with_output(mut self, output: impl Into<PathBuf>) -> Self {
        self.output = output.into();
        self
    }

    /// Where staged resources are copied
    pub fn staging_dir(&self) -> PathBuf {
        self.work_dir.join("staged")
    }

    /// Where the dynamically linked bundle is written
    pub fn dynamic_dist_dir(&self) -> PathBuf {
        self.work_dir.join("dist-dynamic")
    }

    /// Bundler scratch directory
    pub fn bundler_work_dir(&self) -> PathBuf {
        self.work_dir.join("pyinstaller")
    }

    /// Parent of ephemeral installation directories
    pub fn environments_dir(&self) -> PathBuf {
        self.work_dir.join("env")
    }
}
