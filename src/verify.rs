//! Environment verification
//!
//! Confirms the interpreter the build will run against is the expected one
//! before anything is installed or mutated.

use crate::config::InterpreterConfig;
use crate::{PackError, PackResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Command;

const PROBE_SCRIPT: &str = r#"
import json
import platform
import sys
print(json.dumps({
    "executable": sys.executable,
    "version": platform.python_version(),
    "prefix": sys.prefix,
    "base_prefix": getattr(sys, "base_prefix", sys.prefix),
}))
"#;

/// What the interpreter reports about itself
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterpreterInfo {
    pub executable: PathBuf,
    pub version: String,
    pub prefix: PathBuf,
    pub base_prefix: PathBuf,
}

impl InterpreterInfo {
    /// Running inside a virtual environment
    pub fn is_virtualenv(&self) -> bool {
        self.prefix != self.base_prefix
    }
}

/// Checks the build toolchain
pub struct EnvironmentVerifier {
    config: InterpreterConfig,
}

impl EnvironmentVerifier {
    pub fn new(config: InterpreterConfig) -> Self {
        Self { config }
    }

    /// Verify the configured interpreter
    pub fn verify(&self) -> PackResult<InterpreterInfo> {
        let expected = &self.config.path;
        tracing::info!("Verifying interpreter: {}", expected.display());

        let info = self.probe()?;
        tracing::info!(
            "Interpreter reports {} (Python {})",
            info.executable.display(),
            info.version
        );

        let expected_canonical = canonical(expected)?;
        let reported_canonical = canonical(&info.executable)?;
        if expected_canonical != reported_canonical {
            return Err(PackError::EnvironmentMismatch(format!(
                "expected interpreter {} but {} is running",
                expected_canonical.display(),
                reported_canonical.display()
            )));
        }

        if let Some(ref required) = self.config.version {
            if !version_matches(&info.version, required) {
                return Err(PackError::EnvironmentMismatch(format!(
                    "interpreter version {} does not match required {}",
                    info.version, required
                )));
            }
        }

        if self.config.require_on_path {
            self.check_path_resolution(&expected_canonical)?;
        }

        if info.is_virtualenv() {
            tracing::debug!("Interpreter runs inside a virtual environment: {}", info.prefix.display());
        }

        Ok(info)
    }

    fn probe(&self) -> PackResult<InterpreterInfo> {
        let output = Command::new(&self.config.path)
            .args(["-c", PROBE_SCRIPT])
            .output()
            .map_err(|e| {
                PackError::EnvironmentMismatch(format!(
                    "cannot run interpreter {}: {}",
                    self.config.path.display(),
                    e
                ))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(PackError::EnvironmentMismatch(format!(
                "interpreter probe failed ({}): {}",
                output.status,
                stderr.trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let line = stdout
            .lines()
            .rev()
            .find(|l| l.trim_start().starts_with('{'))
            .ok_or_else(|| {
                PackError::EnvironmentMismatch(format!(
                    "interpreter probe printed no report: {}",
                    stdout.trim()
                ))
            })?;
        Ok(serde_json::from_str(line)?)
    }

    /// The same interpreter name on PATH must resolve to the expected file
    fn check_path_resolution(&self, expected: &Path) -> PackResult<()> {
        let name = self.config.path.file_name().ok_or_else(|| {
            PackError::Config(format!(
                "interpreter path has no file name: {}",
                self.config.path.display()
            ))
        })?;

        let found = which::which(name).map_err(|e| {
            PackError::EnvironmentMismatch(format!(
                "{} is not on PATH: {}",
                name.to_string_lossy(),
                e
            ))
        })?;
        let found = canonical(&found)?;

        if found.as_path() != expected {
            return Err(PackError::EnvironmentMismatch(format!(
                "{} on PATH resolves to {}, which shadows {}",
                name.to_string_lossy(),
                found.display(),
                expected.display()
            )));
        }

        tracing::debug!("PATH resolves {} to the expected interpreter", name.to_string_lossy());
        Ok(())
    }
}

/// Verify an interpreter path with no further constraints
pub fn verify_interpreter(expected: impl Into<PathBuf>) -> PackResult<InterpreterInfo> {
    EnvironmentVerifier::new(InterpreterConfig {
        path: expected.into(),
        version: None,
        require_on_path: false,
    })
    .verify()
}

fn canonical(path: &Path) -> PackResult<PathBuf> {
    std::fs::canonicalize(path).map_err(|e| {
        PackError::EnvironmentMismatch(format!("cannot resolve {}: {}", path.display(), e))
    })
}

/// `3.11` matches `3.11.9` but not `3.1.2` or `3.111`
pub fn version_matches(version: &str, required: &str) -> bool {
    let have: Vec<&str> = version.trim().split('.').collect();
    let want: Vec<&str> = required.trim().split('.').collect();
    want.len() <= have.len() && want.iter().zip(&have).all(|(w, h)| w == h)
}
