//! The build pipeline
//!
//! ```text
//! Init -> Verified -> Installed -> Staged -> Patched -> Bundled
//!      -> Staticized -> Restored -> Done
//! ```
//!
//! Any stage failure moves the run to `Aborted`. Once native binaries have
//! been patched they are owned by a [`PatchSession`], which restores them on
//! every exit path, including an abort.

use crate::bundle::{BuildArtifact, BundleManifest, Bundler};
use crate::config::PackConfig;
use crate::error::Warning;
use crate::installer::{InstalledSet, Installer};
use crate::linker::StaticLinker;
use crate::lock::BuildLock;
use crate::metrics::BuildMetrics;
use crate::patcher::{NativeBinaryArtifact, Patcher};
use crate::progress::{BuildProgress, ProgressExt};
use crate::restorer::{RestoreReport, Restorer};
use crate::stager::Stager;
use crate::verify::EnvironmentVerifier;
use crate::{PackError, PackResult};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tempfile::TempDir;

/// Pipeline state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineState {
    Init,
    Verified,
    Installed,
    Staged,
    Patched,
    Bundled,
    Staticized,
    Restored,
    Done,
    Aborted,
}

impl PipelineState {
    fn rank(self) -> u8 {
        match self {
            Self::Init => 0,
            Self::Verified => 1,
            Self::Installed => 2,
            Self::Staged => 3,
            Self::Patched => 4,
            Self::Bundled => 5,
            Self::Staticized => 6,
            Self::Restored => 7,
            Self::Done => 8,
            Self::Aborted => u8::MAX,
        }
    }

    /// `Done` or `Aborted`
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Aborted)
    }

    /// Move to `next`; only the following state or `Aborted` is accepted
    pub fn advance(self, next: PipelineState) -> PackResult<PipelineState> {
        if self.is_terminal() {
            return Err(PackError::Config(format!(
                "pipeline already finished ({}), cannot move to {}",
                self, next
            )));
        }
        if next == Self::Aborted || next.rank() == self.rank() + 1 {
            Ok(next)
        } else {
            Err(PackError::Config(format!(
                "invalid pipeline transition {} -> {}",
                self, next
            )))
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Init => "init",
            Self::Verified => "verified",
            Self::Installed => "installed",
            Self::Staged => "staged",
            Self::Patched => "patched",
            Self::Bundled => "bundled",
            Self::Staticized => "staticized",
            Self::Restored => "restored",
            Self::Done => "done",
            Self::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

/// Result of a successful run
#[derive(Debug)]
pub struct PipelineReport {
    /// Final static executable
    pub output: BuildArtifact,
    /// Intermediate dynamic bundle
    pub dynamic: BuildArtifact,
    /// Distributions found after installation
    pub installed: InstalledSet,
    /// Native binaries that were backed up (state before restore)
    pub artifacts: Vec<NativeBinaryArtifact>,
    pub backups_created: usize,
    pub restore: RestoreReport,
    /// Every non-fatal condition of the run
    pub warnings: Vec<Warning>,
    /// Installation directory left on disk (shared, or kept on request)
    pub environment: Option<PathBuf>,
    pub metrics: BuildMetrics,
}

/// Installation directory for one run
enum Environment {
    /// Configured by the user; other runs may use it too
    Shared(PathBuf),
    /// Created for this run and removed with it
    Ephemeral(TempDir),
    /// Created for this run and kept on request
    Kept(PathBuf),
}

impl Environment {
    fn create(config: &PackConfig) -> PackResult<Self> {
        if let Some(ref dir) = config.site_packages {
            fs::create_dir_all(dir)?;
            return Ok(Self::Shared(dir.clone()));
        }

        let parent = config.environments_dir();
        fs::create_dir_all(&parent)?;
        let temp = tempfile::Builder::new()
            .prefix("site-")
            .tempdir_in(&parent)?;

        if config.keep_environment {
            Ok(Self::Kept(temp.keep()))
        } else {
            Ok(Self::Ephemeral(temp))
        }
    }

    fn path(&self) -> &Path {
        match self {
            Self::Shared(p) | Self::Kept(p) => p,
            Self::Ephemeral(t) => t.path(),
        }
    }

    fn is_shared(&self) -> bool {
        matches!(self, Self::Shared(_))
    }

    fn persistent_path(&self) -> Option<PathBuf> {
        match self {
            Self::Shared(p) | Self::Kept(p) => Some(p.clone()),
            Self::Ephemeral(_) => None,
        }
    }
}

/// Runs every stage in order
pub struct Pipeline {
    config: PackConfig,
    state: PipelineState,
    progress: BuildProgress,
}

impl Pipeline {
    /// Create a pipeline with progress output disabled
    pub fn new(config: PackConfig) -> Self {
        Self {
            config,
            state: PipelineState::Init,
            progress: BuildProgress::hidden(),
        }
    }

    /// Use the given progress tracker
    pub fn with_progress(mut self, progress: BuildProgress) -> Self {
        self.progress = progress;
        self
    }

    pub fn config(&self) -> &PackConfig {
        &self.config
    }

    /// Current state
    pub fn state(&self) -> PipelineState {
        self.state
    }

    fn advance(&mut self, next: PipelineState) -> PackResult<()> {
        self.state = self.state.advance(next)?;
        tracing::debug!("Pipeline state: {}", self.state);
        Ok(())
    }

    /// Run one stage behind a spinner and record its duration
    fn stage<T>(
        &self,
        metrics: &mut BuildMetrics,
        name: &str,
        msg: &str,
        f: impl FnOnce() -> PackResult<T>,
    ) -> PackResult<T> {
        let pb = self.progress.stage(msg);
        let start = Instant::now();
        let result = f();
        metrics.add_phase(name, start.elapsed());

        match result {
            Ok(value) => {
                pb.finish_success(&format!("{} ({:.1}s)", name, start.elapsed().as_secs_f64()));
                Ok(value)
            }
            Err(e) => {
                pb.finish_error(&format!("{}: {}", name, e));
                Err(e)
            }
        }
    }

    /// Run the whole pipeline
    pub fn run(&mut self) -> PackResult<PipelineReport> {
        if self.state != PipelineState::Init {
            return Err(PackError::Config(format!(
                "pipeline cannot be run from state {}",
                self.state
            )));
        }

        let mut metrics = BuildMetrics::new();
        tracing::info!("Packaging {}", self.config.name);

        match self.execute(&mut metrics) {
            Ok(report) => {
                for warning in &report.warnings {
                    self.progress.warn(&warning.to_string());
                }
                report.metrics.log_report();
                Ok(report)
            }
            Err(e) => {
                let failed_in = self.state;
                self.state = PipelineState::Aborted;
                tracing::error!("Pipeline aborted after {}: {}", failed_in, e);
                metrics.mark_total();
                metrics.log_report();
                Err(e)
            }
        }
    }

    fn execute(&mut self, metrics: &mut BuildMetrics) -> PackResult<PipelineReport> {
        let mut warnings = Vec::new();

        // Verify
        let verifier = EnvironmentVerifier::new(self.config.interpreter.clone());
        let info = self.stage(metrics, "verify", "Verifying interpreter...", || {
            verifier.verify()
        })?;
        tracing::info!("Interpreter: {} ({})", info.executable.display(), info.version);
        self.advance(PipelineState::Verified)?;

        // Install
        let environment = Environment::create(&self.config)?;
        let site_dir = environment.path().to_path_buf();
        // held from install until the patch session is restored
        let lock = if environment.is_shared() {
            Some(BuildLock::acquire(&site_dir)?)
        } else {
            None
        };
        let installer = Installer::new(self.config.tools.pip.clone(), &site_dir);
        let installed = self.stage(metrics, "install", "Installing packages...", || {
            installer.install(&self.config.packages)
        })?;
        self.advance(PipelineState::Installed)?;

        // Stage
        let stager = Stager::new(self.config.staging_dir());
        let resources = self.stage(metrics, "stage", "Staging resources...", || {
            stager.stage_all(&self.config.resources)
        })?;
        self.advance(PipelineState::Staged)?;

        // Patch
        let patcher = Patcher::new(
            &site_dir,
            self.config.patch_rules.clone(),
            self.config.case_sensitive,
        );
        let session = self.stage(metrics, "patch", "Patching native binaries...", || {
            Restorer::recover_stale(&site_dir)?;
            let discovery = patcher.discover()?;
            warnings.extend(discovery.warnings);
            patcher.patch_all(discovery.artifacts, lock)
        })?;
        warnings.extend(session.warnings().iter().cloned());
        self.advance(PipelineState::Patched)?;

        // Bundle
        let manifest = BundleManifest::new(
            resources,
            self.config.binaries.clone(),
            self.config.hidden_imports.clone(),
        );
        let bundler = Bundler::new(
            &self.config.name,
            self.config.tools.pyinstaller.clone(),
            self.config.dynamic_dist_dir(),
            self.config.bundler_work_dir(),
        )
        .with_site_dir(&site_dir)
        .with_library_dirs(session.patched_dirs());
        let dynamic = self.stage(metrics, "bundle", "Bundling application...", || {
            bundler.freeze(&self.config.entry_point, &manifest)
        })?;
        self.advance(PipelineState::Bundled)?;

        // Staticize
        let linker = StaticLinker::new(
            self.config.tools.staticx.clone(),
            &self.config.output,
            self.config.static_allow.clone(),
        );
        let output = self.stage(metrics, "staticize", "Linking statically...", || {
            linker.staticize(&dynamic)
        })?;
        self.advance(PipelineState::Staticized)?;

        // Restore
        let artifacts = session.artifacts().to_vec();
        let backups_created = session.backups_created();
        let restore = self.stage(metrics, "restore", "Restoring native binaries...", || {
            Ok(session.restore())
        })?;
        warnings.extend(restore.warnings.iter().cloned());
        self.advance(PipelineState::Restored)?;

        let environment_path = environment.persistent_path();
        drop(environment);
        self.advance(PipelineState::Done)?;

        metrics.mark_total();
        tracing::info!(
            "Built {} ({} bytes, {} warnings)",
            output.path.display(),
            output.size,
            warnings.len()
        );

        Ok(PipelineReport {
            output,
            dynamic,
            installed,
            artifacts,
            backups_created,
            restore,
            warnings,
            environment: environment_path,
            metrics: std::mem::take(metrics),
        })
    }
}
