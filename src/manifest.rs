//! Manifest file parser for staticpack
//!
//! This module provides support for `staticpack.toml` manifest files. When no
//! manifest is present the built-in manifest for the OCR service is used, so
//! a bare `staticpack` invocation reproduces the reference build.
//!
//! ## Configuration Hierarchy
//!
//! ```toml
//! [package]                    # What to build and where
//! name = "ocr-service"
//! entry_point = "main.py"
//! output = "dist/ocr-service"  # default: dist/<name>
//! work_dir = "build"
//!
//! [interpreter]                # Toolchain the build must run against
//! path = "/usr/bin/python3"
//! version = "3.11"
//! require_on_path = true
//!
//! [environment]                # Package installation
//! # site_packages = "/opt/site" # shared directory; default is ephemeral
//! packages = ["fastapi", { name = "pillow", version = ">=10" }]
//!
//! [[resources]]                # Data embedded verbatim
//! source = "/usr/share/tesseract-ocr/5/tessdata"
//! dest = "tessdata"
//! stage = true
//!
//! [[binaries]]                 # System executables embedded under bin/
//! path = "/usr/bin/tesseract"
//!
//! [bundle]
//! hidden_imports = ["uvicorn.logging"]
//!
//! [patch]                      # Native binaries whose search paths are stripped
//! case_sensitive = false
//! [[patch.rules]]
//! package = "pillow"
//! fragments = ["PIL", "pillow.libs"]
//!
//! [static_link]
//! allow = []
//!
//! [tools]                      # Overrides for external tools
//! pip = ["/usr/bin/python3", "-m", "pip"]
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::common::{
    is_contained_dest, PackageSpec, PatchRule, ResourceAsset, SystemBinaryDependency, ToolCommand,
};
use crate::error::{PackError, PackResult};

/// Manifest file name looked up in the working directory
pub const MANIFEST_FILE: &str = "staticpack.toml";

// ============================================================================
// Root Manifest Structure
// ============================================================================

/// Root manifest structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    /// What to build
    pub package: PackageConfig,

    /// Interpreter the build is verified against
    #[serde(default)]
    pub interpreter: InterpreterManifestConfig,

    /// Package installation
    #[serde(default)]
    pub environment: EnvironmentManifestConfig,

    /// Data assets
    #[serde(default)]
    pub resources: Vec<ResourceAsset>,

    /// System binaries
    #[serde(default)]
    pub binaries: Vec<SystemBinaryDependency>,

    /// Bundler settings
    #[serde(default)]
    pub bundle: BundleManifestConfig,

    /// Native binary patching
    #[serde(default)]
    pub patch: PatchManifestConfig,

    /// Static linking
    #[serde(default)]
    pub static_link: StaticLinkManifestConfig,

    /// External tool overrides
    #[serde(default)]
    pub tools: ToolsManifestConfig,
}

// ============================================================================
// Sections
// ============================================================================

/// `[package]`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageConfig {
    /// Executable name
    pub name: String,

    /// Application entry script
    pub entry_point: PathBuf,

    /// Final executable path (default: `dist/<name>`)
    #[serde(default)]
    pub output: Option<PathBuf>,

    /// Directory for staged data and build byproducts
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,
}

fn default_work_dir() -> PathBuf {
    PathBuf::from("build")
}

/// `[interpreter]`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterpreterManifestConfig {
    /// Expected interpreter path
    #[serde(default = "default_interpreter")]
    pub path: PathBuf,

    /// Required version prefix (e.g. "3.11")
    #[serde(default)]
    pub version: Option<String>,

    /// The interpreter found first on PATH must be the expected one
    #[serde(default)]
    pub require_on_path: bool,
}

fn default_interpreter() -> PathBuf {
    PathBuf::from("/usr/bin/python3")
}

impl Default for InterpreterManifestConfig {
    fn default() -> Self {
        Self {
            path: default_interpreter(),
            version: None,
            require_on_path: false,
        }
    }
}

/// `[environment]`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnvironmentManifestConfig {
    /// Shared installation directory; an ephemeral one is used when unset
    #[serde(default)]
    pub site_packages: Option<PathBuf>,

    /// Packages to install
    #[serde(default)]
    pub packages: Vec<PackageSpec>,
}

/// `[bundle]`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BundleManifestConfig {
    /// Modules imported dynamically at runtime
    #[serde(default)]
    pub hidden_imports: Vec<String>,
}

/// `[patch]`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PatchManifestConfig {
    /// Case policy for every fragment
    #[serde(default)]
    pub case_sensitive: bool,

    /// Discovery rules
    #[serde(default)]
    pub rules: Vec<PatchRule>,
}

/// `[static_link]`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StaticLinkManifestConfig {
    /// Shared libraries the final artifact may still require
    #[serde(default)]
    pub allow: Vec<String>,
}

/// `[tools]`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolsManifestConfig {
    #[serde(default)]
    pub pip: Option<ToolCommand>,
    #[serde(default)]
    pub pyinstaller: Option<ToolCommand>,
    #[serde(default)]
    pub staticx: Option<ToolCommand>,
}

// ============================================================================
// Manifest Implementation
// ============================================================================

impl Manifest {
    /// Load a manifest from a file
    pub fn from_file(path: impl AsRef<Path>) -> PackResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            PackError::Config(format!(
                "Failed to read manifest file {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::parse(&content)
    }

    /// Parse a manifest from TOML text
    pub fn parse(content: &str) -> PackResult<Self> {
        toml::from_str(content)
            .map_err(|e| PackError::Config(format!("Failed to parse manifest: {}", e)))
    }

    /// Render the manifest as TOML
    pub fn to_toml_string(&self) -> PackResult<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Find `staticpack.toml` in a directory
    pub fn find_in_dir(dir: impl AsRef<Path>) -> Option<PathBuf> {
        let candidate = dir.as_ref().join(MANIFEST_FILE);
        candidate.is_file().then_some(candidate)
    }

    /// Validate the manifest
    pub fn validate(&self) -> PackResult<()> {
        if self.package.name.trim().is_empty() {
            return Err(PackError::InvalidManifest(
                "[package] name must not be empty".to_string(),
            ));
        }
        if self.package.name.contains('/') {
            return Err(PackError::InvalidManifest(format!(
                "[package] name must be a file name: {}",
                self.package.name
            )));
        }
        if self.package.entry_point.as_os_str().is_empty() {
            return Err(PackError::InvalidManifest(
                "[package] entry_point must not be empty".to_string(),
            ));
        }

        if let Some(ref v) = self.interpreter.version {
            if v.is_empty() || !v.chars().all(|c| c.is_ascii_digit() || c == '.') {
                return Err(PackError::InvalidManifest(format!(
                    "Invalid interpreter version format: {}",
                    v
                )));
            }
        }

        let mut dests = HashSet::new();
        for asset in &self.resources {
            let dest = asset.dest.trim_matches('/');
            if dest.is_empty() {
                return Err(PackError::InvalidManifest(format!(
                    "Resource {} has an empty destination",
                    asset.source.display()
                )));
            }
            if !is_contained_dest(dest) {
                return Err(PackError::InvalidManifest(format!(
                    "Resource destination must stay inside the bundle: {}",
                    asset.dest
                )));
            }
            if !dests.insert(dest.to_string()) {
                return Err(PackError::InvalidManifest(format!(
                    "Duplicate resource destination: {}",
                    dest
                )));
            }
        }

        let mut names = HashSet::new();
        for binary in &self.binaries {
            if !binary.path.is_absolute() {
                return Err(PackError::InvalidManifest(format!(
                    "System binary path must be absolute: {}",
                    binary.path.display()
                )));
            }
            let name = binary.file_name().ok_or_else(|| {
                PackError::InvalidManifest(format!(
                    "System binary has no file name: {}",
                    binary.path.display()
                ))
            })?;
            if !names.insert(name.clone()) {
                return Err(PackError::InvalidManifest(format!(
                    "Two system binaries would land on bin/{}",
                    name
                )));
            }
        }

        for module in &self.bundle.hidden_imports {
            let valid = !module.is_empty()
                && module
                    .split('.')
                    .all(|part| !part.is_empty() && part.chars().all(|c| c.is_alphanumeric() || c == '_'));
            if !valid {
                return Err(PackError::InvalidManifest(format!(
                    "Invalid hidden import module name: '{}'",
                    module
                )));
            }
        }

        for rule in &self.patch.rules {
            if rule.fragments.iter().all(|f| f.trim().is_empty()) {
                return Err(PackError::InvalidManifest(format!(
                    "Patch rule '{}' needs at least one fragment",
                    rule.package
                )));
            }
            if rule.patterns.is_empty() {
                return Err(PackError::InvalidManifest(format!(
                    "Patch rule '{}' needs at least one file pattern",
                    rule.package
                )));
            }
            for pattern in &rule.patterns {
                glob::Pattern::new(pattern).map_err(|e| {
                    PackError::InvalidManifest(format!(
                        "Patch rule '{}' has invalid pattern '{}': {}",
                        rule.package, pattern, e
                    ))
                })?;
            }
        }

        Ok(())
    }

    /// Built-in manifest for the OCR web service
    ///
    /// The service needs tesseract and poppler executables at runtime, the
    /// tesseract model data, and the uvicorn modules it only imports lazily.
    pub fn builtin() -> Self {
        let packages = [
            "fastapi",
            "uvicorn",
            "python-multipart",
            "jinja2",
            "pytesseract",
            "pdf2image",
            "pillow",
            "pymupdf",
            "tinydb",
            "python-jose",
            "python-docx",
            "pyinstaller",
            "staticx",
        ]
        .into_iter()
        .map(PackageSpec::new)
        .collect();

        let hidden_imports = [
            "uvicorn.logging",
            "uvicorn.loops",
            "uvicorn.loops.auto",
            "uvicorn.protocols",
            "uvicorn.protocols.http",
            "uvicorn.protocols.http.auto",
            "uvicorn.protocols.websockets",
            "uvicorn.protocols.websockets.auto",
            "uvicorn.lifespan",
            "uvicorn.lifespan.on",
            "multipart",
            "jose.backends",
        ]
        .into_iter()
        .map(String::from)
        .collect();

        Self {
            package: PackageConfig {
                name: "ocr-service".to_string(),
                entry_point: PathBuf::from("main.py"),
                output: None,
                work_dir: default_work_dir(),
            },
            interpreter: InterpreterManifestConfig {
                path: default_interpreter(),
                version: None,
                require_on_path: true,
            },
            environment: EnvironmentManifestConfig {
                site_packages: None,
                packages,
            },
            resources: vec![
                ResourceAsset::new("/usr/share/tesseract-ocr/5/tessdata", "tessdata").staged(),
                ResourceAsset::new("templates", "templates"),
            ],
            binaries: [
                "/usr/bin/tesseract",
                "/usr/bin/pdftoppm",
                "/usr/bin/pdfinfo",
                "/usr/bin/pdftocairo",
            ]
            .into_iter()
            .map(SystemBinaryDependency::new)
            .collect(),
            bundle: BundleManifestConfig { hidden_imports },
            patch: PatchManifestConfig {
                case_sensitive: false,
                rules: vec![
                    PatchRule::new("pillow", ["PIL", "pillow.libs"]),
                    PatchRule::new("pymupdf", ["fitz", "pymupdf"]),
                ],
            },
            static_link: StaticLinkManifestConfig::default(),
            tools: ToolsManifestConfig::default(),
        }
    }
}
