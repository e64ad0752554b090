//! staticpack - Statically Linked Executables for Python Services
//!
//! This crate packages a Python web service that depends on native
//! extensions (image, PDF and OCR libraries) and on external command-line
//! tools into **one statically linked executable** that runs on a host with
//! no Python, no extension libraries and no OCR toolchain installed.
//!
//! # Pipeline
//!
//! ```text
//! Verify -> Install -> Stage -> Patch -> Bundle -> Staticize -> Restore
//! ```
//!
//! 1. **Verify** that the interpreter which would run is the expected one
//! 2. **Install** every dependency into one installation directory, all or nothing
//! 3. **Stage** data assets (trained OCR models) into the build directory
//! 4. **Patch** native extension binaries: back them up, strip RPATH/RUNPATH
//! 5. **Bundle** with PyInstaller into a dynamic one-file executable
//! 6. **Staticize** with staticx and audit the result for dynamic dependencies
//! 7. **Restore** every patched binary from its backup
//!
//! Restore is guaranteed: the patched set lives in a [`PatchSession`] that
//! puts every backup back when it is dropped, including on failure.
//!
//! # Quick Start
//!
//! ```bash
//! # Build with ./staticpack.toml, or the built-in OCR service manifest
//! staticpack
//!
//! # Explicit manifest, verbose
//! staticpack --config service.toml -vv
//!
//! # Show the resolved manifest
//! staticpack --print-manifest
//! ```
//!
//! ```no_run
//! use staticpack::{Manifest, PackConfig, Pipeline};
//! use std::path::Path;
//!
//! let manifest = Manifest::from_file("staticpack.toml")?;
//! let config = PackConfig::from_manifest(&manifest, Path::new("."))?;
//! let report = Pipeline::new(config).run()?;
//! println!("{}", report.output.path.display());
//! # Ok::<(), staticpack::PackError>(())
//! ```

mod bundle;
pub mod common;
mod config;
pub mod elf;
mod error;
mod installer;
mod linker;
mod lock;
mod manifest;
mod metrics;
mod patcher;
mod pipeline;
pub mod progress;
mod restorer;
mod stager;
mod verify;

pub use bundle::{ArtifactKind, BuildArtifact, BundleManifest, Bundler};

// Re-export common types
pub use common::{
    PackageSpec, PatchRule, ResourceAsset, SystemBinaryDependency, ToolCommand, BACKUP_SUFFIX,
    BINARY_DIR, PARTIAL_BACKUP_SUFFIX, RUNTIME_NAME_RESOLUTION_LIBS,
};

// Re-export config types (runtime configuration)
pub use config::{InterpreterConfig, PackConfig, ToolsConfig};

pub use elf::{is_elf, ElfFile};
pub use error::{PackError, PackResult, Warning};
pub use installer::{InstalledPackage, InstalledSet, Installer};
pub use linker::{audit, StaticLinker};
pub use lock::BuildLock;

// Re-export manifest types (TOML parsing)
pub use manifest::{
    BundleManifestConfig, EnvironmentManifestConfig, InterpreterManifestConfig, Manifest,
    PackageConfig, PatchManifestConfig, StaticLinkManifestConfig, ToolsManifestConfig,
    MANIFEST_FILE,
};

pub use metrics::BuildMetrics;
pub use patcher::{Discovery, NativeBinaryArtifact, PatchResult, Patcher};
pub use pipeline::{Pipeline, PipelineReport, PipelineState};
pub use progress::{BuildProgress, ProgressExt, ProgressStyles};
pub use restorer::{PatchSession, RestoreReport, Restorer};
pub use stager::{StagedPath, Stager};
pub use verify::{verify_interpreter, version_matches, EnvironmentVerifier, InterpreterInfo};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
