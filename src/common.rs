//! Common types shared between the manifest, the runtime config and the stages
//!
//! ```text
//! PackageSpec             - a requirement handed to the installer
//! ResourceAsset           - data copied verbatim into the bundle
//! SystemBinaryDependency  - external executable embedded under `bin/`
//! PatchRule               - which native binaries of a package get patched
//! ToolCommand             - program + leading arguments for an external tool
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::process::Command;

use crate::error::{PackError, PackResult};

/// Reserved suffix appended to a native binary's path to form its backup
pub const BACKUP_SUFFIX: &str = ".staticpack-orig";

/// Suffix of a backup still being written; renamed to [`BACKUP_SUFFIX`] once synced
pub const PARTIAL_BACKUP_SUFFIX: &str = ".staticpack-part";

/// Virtual directory inside the bundle that holds system binaries
pub const BINARY_DIR: &str = "bin";

/// Libraries glibc loads at runtime for name resolution
///
/// These cannot be linked statically. They are a runtime requirement of the
/// final artifact on the target host, not a build-time dependency.
pub const RUNTIME_NAME_RESOLUTION_LIBS: &[&str] =
    &["libnss_files.so.2", "libnss_dns.so.2", "libresolv.so.2"];

/// Normalize a path by removing `.` and resolving `..` components
pub(crate) fn normalize_path(path: &Path) -> PathBuf {
    let mut components = Vec::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if let Some(Component::Normal(_)) = components.last() {
                    components.pop();
                } else {
                    components.push(component);
                }
            }
            _ => components.push(component),
        }
    }
    components.iter().collect()
}

/// Resolve `path` against `base_dir` unless it is already absolute
pub(crate) fn resolve_path(base_dir: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        normalize_path(path)
    } else {
        normalize_path(&base_dir.join(path))
    }
}

/// Backup path for a native binary
pub fn backup_path_for(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_owned();
    os.push(BACKUP_SUFFIX);
    PathBuf::from(os)
}

/// Path a backup is written to before it is complete
pub fn partial_backup_path_for(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_owned();
    os.push(PARTIAL_BACKUP_SUFFIX);
    PathBuf::from(os)
}

/// Whether a path names a backup created by the patcher, complete or not
pub fn is_backup_path(path: &Path) -> bool {
    path.file_name()
        .map(|n| {
            let n = n.to_string_lossy();
            n.ends_with(BACKUP_SUFFIX) || n.ends_with(PARTIAL_BACKUP_SUFFIX)
        })
        .unwrap_or(false)
}

/// Whether a path names a backup that was never completed
pub fn is_partial_backup_path(path: &Path) -> bool {
    path.file_name()
        .map(|n| n.to_string_lossy().ends_with(PARTIAL_BACKUP_SUFFIX))
        .unwrap_or(false)
}

/// A bundle destination must be a relative path of plain components
///
/// Rejects empty paths, absolute paths, `.` and `..`, so a staged copy can
/// never land outside the staging directory.
pub fn is_contained_dest(dest: &str) -> bool {
    let path = Path::new(dest);
    path.components().next().is_some()
        && path.components().all(|c| matches!(c, Component::Normal(_)))
}

/// PEP 503 name normalization: lowercase, runs of `-_.` become one `-`
pub fn normalize_package_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut pending_sep = false;
    for c in name.trim().chars() {
        if matches!(c, '-' | '_' | '.') {
            pending_sep = true;
            continue;
        }
        if pending_sep && !out.is_empty() {
            out.push('-');
        }
        pending_sep = false;
        out.extend(c.to_lowercase());
    }
    out
}

// ============================================================================
// Package Requirements
// ============================================================================

/// A package requirement: name plus optional version constraint
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "PackageSpecRepr", into = "PackageSpecRepr")]
pub struct PackageSpec {
    /// Distribution name as written, without extras
    pub name: String,
    /// Optional features (`python-jose[cryptography]`)
    pub extras: Vec<String>,
    /// Version constraint including the operator (e.g. `==10.4.0`, `>=2`)
    pub constraint: Option<String>,
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum PackageSpecRepr {
    Requirement(String),
    Table {
        name: String,
        #[serde(default)]
        version: Option<String>,
        #[serde(default)]
        extras: Vec<String>,
    },
}

impl TryFrom<PackageSpecRepr> for PackageSpec {
    type Error = PackError;

    fn try_from(repr: PackageSpecRepr) -> PackResult<Self> {
        match repr {
            PackageSpecRepr::Requirement(s) => PackageSpec::parse(&s),
            PackageSpecRepr::Table {
                name,
                version,
                extras,
            } => {
                let mut spec = PackageSpec::parse(&name)?;
                if let Some(v) = version {
                    spec = spec.with_constraint(v);
                }
                Ok(spec.with_extras(extras))
            }
        }
    }
}

impl From<PackageSpec> for PackageSpecRepr {
    fn from(spec: PackageSpec) -> Self {
        PackageSpecRepr::Requirement(spec.requirement())
    }
}

impl PackageSpec {
    /// Create an unpinned spec
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            extras: Vec::new(),
            constraint: None,
        }
    }

    /// Add optional features; duplicates and blanks are dropped
    pub fn with_extras<I, S>(mut self, extras: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for extra in extras {
            let extra = extra.into().trim().to_string();
            if !extra.is_empty() && !self.extras.contains(&extra) {
                self.extras.push(extra);
            }
        }
        self
    }

    /// Attach a version constraint; a bare version means `==`
    pub fn with_constraint(mut self, constraint: impl Into<String>) -> Self {
        let constraint: String = constraint.into().split_whitespace().collect();
        self.constraint = if constraint.is_empty() {
            None
        } else if constraint.starts_with(is_operator_char) {
            Some(constraint)
        } else {
            Some(format!("=={}", constraint))
        };
        self
    }

    /// Parse a requirement string such as `pillow>=10`, `fastapi` or
    /// `python-jose[cryptography]==3.3.0`
    pub fn parse(s: &str) -> PackResult<Self> {
        let s = s.trim();
        let (head, constraint) = match s.find(is_operator_char) {
            Some(idx) => (s[..idx].trim(), Some(s[idx..].trim())),
            None => (s, None),
        };

        let (name, extras) = match head.split_once('[') {
            Some((name, rest)) => {
                let inner = rest.trim_end().strip_suffix(']').ok_or_else(|| {
                    PackError::InvalidManifest(format!("Unclosed extras in requirement: '{}'", s))
                })?;
                let extras: Vec<&str> = inner.split(',').map(str::trim).collect();
                if extras.iter().any(|e| {
                    e.is_empty()
                        || e.chars()
                            .any(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
                }) {
                    return Err(PackError::InvalidManifest(format!(
                        "Invalid extras in requirement: '{}'",
                        s
                    )));
                }
                (name.trim(), extras)
            }
            None => (head, Vec::new()),
        };

        if name.is_empty() {
            return Err(PackError::InvalidManifest(format!(
                "Package requirement has no name: '{}'",
                s
            )));
        }
        if name
            .chars()
            .any(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
        {
            return Err(PackError::InvalidManifest(format!(
                "Invalid package name: '{}'",
                name
            )));
        }

        let spec = Self::new(name).with_extras(extras);
        Ok(match constraint {
            Some(c) if !c.is_empty() => spec.with_constraint(c),
            _ => spec,
        })
    }

    /// Normalized distribution name
    pub fn normalized_name(&self) -> String {
        normalize_package_name(&self.name)
    }

    /// Exact version when the constraint is an `==` pin
    pub fn pinned_version(&self) -> Option<&str> {
        self.constraint
            .as_deref()
            .and_then(|c| c.strip_prefix("=="))
            .filter(|v| !v.starts_with('=') && !v.contains(','))
    }

    /// Requirement string understood by pip
    pub fn requirement(&self) -> String {
        let mut out = self.name.clone();
        if !self.extras.is_empty() {
            out.push('[');
            out.push_str(&self.extras.join(","));
            out.push(']');
        }
        if let Some(ref c) = self.constraint {
            out.push_str(c);
        }
        out
    }
}

impl fmt::Display for PackageSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.requirement())
    }
}

fn is_operator_char(c: char) -> bool {
    matches!(c, '=' | '<' | '>' | '!' | '~')
}

// ============================================================================
// Bundle Entries
// ============================================================================

/// Data copied verbatim into the bundle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceAsset {
    /// Source file or directory
    pub source: PathBuf,
    /// Destination path inside the bundle
    pub dest: String,
    /// Copy into the staging directory before bundling
    #[serde(default)]
    pub stage: bool,
}

impl ResourceAsset {
    /// Create an asset bundled straight from its source
    pub fn new(source: impl Into<PathBuf>, dest: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            dest: dest.into(),
            stage: false,
        }
    }

    /// Mark the asset for staging
    pub fn staged(mut self) -> Self {
        self.stage = true;
        self
    }
}

/// External executable the application needs at runtime
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemBinaryDependency {
    /// Absolute path on the build host
    pub path: PathBuf,
}

impl SystemBinaryDependency {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// File name the binary will carry inside the bundle
    pub fn file_name(&self) -> Option<String> {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
    }

    /// Virtual path inside the bundle (`bin/<name>`)
    pub fn bundle_path(&self) -> Option<String> {
        self.file_name().map(|n| format!("{}/{}", BINARY_DIR, n))
    }
}

// ============================================================================
// Patch Rules
// ============================================================================

fn default_binary_patterns() -> Vec<String> {
    vec!["*.so".to_string(), "*.so.*".to_string()]
}

/// Declarative discovery rule for one package's native binaries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchRule {
    /// Owning package name (reporting only)
    pub package: String,
    /// Path fragments identifying the package's files (`PIL`, `pillow.libs`)
    pub fragments: Vec<String>,
    /// File name glob patterns of the binaries to patch
    #[serde(default = "default_binary_patterns")]
    pub patterns: Vec<String>,
    /// Fail discovery when nothing matches
    #[serde(default)]
    pub required: bool,
}

impl PatchRule {
    /// Create a rule with the default shared-object patterns
    pub fn new<I, S>(package: impl Into<String>, fragments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            package: package.into(),
            fragments: fragments.into_iter().map(Into::into).collect(),
            patterns: default_binary_patterns(),
            required: false,
        }
    }

    /// Replace the file name patterns
    pub fn with_patterns<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.patterns = patterns.into_iter().map(Into::into).collect();
        self
    }

    /// Make an empty match fatal
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }
}

// ============================================================================
// External Tools
// ============================================================================

/// An external tool invocation prefix: program followed by fixed arguments
///
/// Serialized as a TOML array, e.g. `["/usr/bin/python3", "-m", "pip"]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct ToolCommand {
    program: String,
    args: Vec<String>,
}

impl TryFrom<Vec<String>> for ToolCommand {
    type Error = PackError;

    fn try_from(mut parts: Vec<String>) -> PackResult<Self> {
        if parts.is_empty() || parts[0].trim().is_empty() {
            return Err(PackError::InvalidManifest(
                "Tool command must name a program".to_string(),
            ));
        }
        let program = parts.remove(0);
        Ok(Self {
            program,
            args: parts,
        })
    }
}

impl From<ToolCommand> for Vec<String> {
    fn from(tool: ToolCommand) -> Self {
        let mut v = vec![tool.program];
        v.extend(tool.args);
        v
    }
}

impl ToolCommand {
    /// A bare program
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Run a Python module with the given interpreter (`python -m <module>`)
    pub fn python_module(interpreter: &Path, module: &str) -> Self {
        Self::new(interpreter.to_string_lossy()).arg("-m").arg(module)
    }

    /// Append a fixed argument
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Build a [`Command`] with the fixed prefix applied
    pub fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        cmd
    }
}

impl fmt::Display for ToolCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}
