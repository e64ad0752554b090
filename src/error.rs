//! Error types for staticpack

use std::path::PathBuf;
use thiserror::Error;

/// Result type for pack operations
pub type PackResult<T> = Result<T, PackError>;

/// Errors that can occur while packaging
///
/// Every variant is fatal to a pipeline run. Conditions the pipeline
/// tolerates are reported as [`crate::Warning`] values instead.
#[derive(Error, Debug)]
pub enum PackError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid manifest file
    #[error("Invalid manifest: {0}")]
    InvalidManifest(String),

    /// TOML parsing error
    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    /// TOML serialization error
    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Asset not found
    #[error("Asset not found: {0}")]
    AssetNotFound(PathBuf),

    /// The interpreter that would run is not the expected one
    #[error("Environment mismatch: {0}")]
    EnvironmentMismatch(String),

    /// Package installation failed or was incomplete
    #[error("Installation failed: {message}")]
    Installation {
        message: String,
        code: Option<i32>,
    },

    /// A required patch rule matched nothing
    #[error("Discovery failed: {0}")]
    Discovery(String),

    /// Bundling failed (missing manifest entry, unresolved import, tool error)
    #[error("Bundle error: {message}")]
    Bundle {
        message: String,
        code: Option<i32>,
    },

    /// Static linking failed or left disallowed dynamic dependencies
    #[error("Static link error: {message}")]
    StaticLink {
        message: String,
        code: Option<i32>,
    },

    /// Malformed or unsupported ELF file
    #[error("ELF error in {path}: {reason}")]
    Elf { path: PathBuf, reason: String },

    /// Build directory lock could not be taken
    #[error("Lock error: {0}")]
    Lock(String),
}

impl PackError {
    /// Installation failure without an exit status
    pub fn installation(message: impl Into<String>) -> Self {
        Self::Installation {
            message: message.into(),
            code: None,
        }
    }

    /// Bundle failure without an exit status
    pub fn bundle(message: impl Into<String>) -> Self {
        Self::Bundle {
            message: message.into(),
            code: None,
        }
    }

    /// Static link failure without an exit status
    pub fn static_link(message: impl Into<String>) -> Self {
        Self::StaticLink {
            message: message.into(),
            code: None,
        }
    }

    pub(crate) fn elf(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Elf {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Process exit status for this error
    ///
    /// External tool failures propagate the tool's own status.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Installation { code: Some(c), .. }
            | Self::Bundle { code: Some(c), .. }
            | Self::StaticLink { code: Some(c), .. }
                if *c != 0 =>
            {
                *c
            }
            Self::EnvironmentMismatch(_) => 2,
            _ => 1,
        }
    }
}

/// A non-fatal condition reported during a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Warning {
    /// Discovery found something odd (empty rule, non-ELF candidate)
    Discovery(String),
    /// A native binary could not be rewritten
    Patch { path: PathBuf, reason: String },
    /// A backup was missing or did not restore cleanly
    Restore { path: PathBuf, reason: String },
}

impl std::fmt::Display for Warning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Discovery(msg) => write!(f, "discovery: {}", msg),
            Self::Patch { path, reason } => write!(f, "patch {}: {}", path.display(), reason),
            Self::Restore { path, reason } => {
                write!(f, "restore {}: {}", path.display(), reason)
            }
        }
    }
}
