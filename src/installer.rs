//! Dependency installation
//!
//! pip does the resolution; this module only drives it and checks the result.
//! Installation is all-or-nothing: after pip returns, the target directory's
//! distribution metadata must account for every requested package.

use crate::common::{normalize_package_name, PackageSpec, ToolCommand};
use crate::{PackError, PackResult};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// A distribution found in an installation directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledPackage {
    /// Name as recorded in the metadata directory
    pub name: String,
    /// Installed version
    pub version: String,
    /// The `*.dist-info` / `*.egg-info` directory
    pub metadata_dir: PathBuf,
}

/// Distributions present in an installation directory
#[derive(Debug, Clone, Default)]
pub struct InstalledSet {
    site_dir: PathBuf,
    packages: BTreeMap<String, InstalledPackage>,
}

impl InstalledSet {
    /// Scan an installation directory for distribution metadata
    pub fn scan(site_dir: impl AsRef<Path>) -> PackResult<Self> {
        let site_dir = site_dir.as_ref();
        let mut packages = BTreeMap::new();

        if site_dir.is_dir() {
            for entry in fs::read_dir(site_dir)? {
                let entry = entry?;
                if !entry.file_type()?.is_dir() {
                    continue;
                }
                let file_name = entry.file_name().to_string_lossy().into_owned();
                if let Some((name, version)) = parse_metadata_dir(&file_name) {
                    packages.insert(
                        normalize_package_name(&name),
                        InstalledPackage {
                            name,
                            version,
                            metadata_dir: entry.path(),
                        },
                    );
                }
            }
        }

        Ok(Self {
            site_dir: site_dir.to_path_buf(),
            packages,
        })
    }

    /// Installation directory
    pub fn site_dir(&self) -> &Path {
        &self.site_dir
    }

    /// Look a distribution up by (unnormalized) name
    pub fn get(&self, name: &str) -> Option<&InstalledPackage> {
        self.packages.get(&normalize_package_name(name))
    }

    /// Whether a spec is satisfied; only `==` pins are checked for version
    pub fn satisfies(&self, spec: &PackageSpec) -> bool {
        match (self.get(&spec.name), spec.pinned_version()) {
            (None, _) => false,
            (Some(_), None) => true,
            (Some(pkg), Some(pin)) => pin_matches(&pkg.version, pin),
        }
    }

    /// Specs that are not satisfied
    pub fn unsatisfied<'a>(&self, specs: &'a [PackageSpec]) -> Vec<&'a PackageSpec> {
        specs.iter().filter(|s| !self.satisfies(s)).collect()
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    /// Iterate installed distributions ordered by normalized name
    pub fn iter(&self) -> impl Iterator<Item = &InstalledPackage> {
        self.packages.values()
    }
}

/// Release segments and the lowercased remainder (`10.4.0rc1` -> `[10, 4, 0]`, `rc1`)
fn split_release(version: &str) -> (Vec<u64>, String) {
    let version = version.trim().trim_start_matches(['v', 'V']);
    let end = version
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(version.len());
    let (release, rest) = version.split_at(end);
    let segments = release
        .split('.')
        .filter(|s| !s.is_empty())
        .map(|s| s.parse().unwrap_or(u64::MAX))
        .collect();
    (segments, rest.trim_start_matches('.').to_ascii_lowercase())
}

/// `==` comparison the way pip applies it
///
/// Release segments are compared with trailing zeros padded (`10.4` equals
/// `10.4.0`), `X.*` matches any release starting with `X`, and a local
/// label (`+cpu`) is ignored unless the pin names one.
fn pin_matches(installed: &str, pin: &str) -> bool {
    let pin = pin.trim();
    let installed = if pin.contains('+') {
        installed
    } else {
        installed.split('+').next().unwrap_or(installed)
    };

    if let Some(prefix) = pin.strip_suffix(".*") {
        let (want, want_rest) = split_release(prefix);
        let (have, _) = split_release(installed);
        return want_rest.is_empty()
            && want
                .iter()
                .enumerate()
                .all(|(i, w)| have.get(i).copied().unwrap_or(0) == *w);
    }

    let (mut want, want_rest) = split_release(pin);
    let (mut have, have_rest) = split_release(installed);
    let len = want.len().max(have.len());
    want.resize(len, 0);
    have.resize(len, 0);
    want == have && want_rest == have_rest
}

/// `Pillow-10.4.0.dist-info` or `tinydb-4.8.0-py3.11.egg-info`
fn parse_metadata_dir(dir_name: &str) -> Option<(String, String)> {
    let stem = dir_name
        .strip_suffix(".dist-info")
        .or_else(|| dir_name.strip_suffix(".egg-info"))?;
    let (name, rest) = stem.split_once('-')?;
    let version = rest.split('-').next()?;
    if name.is_empty() || version.is_empty() {
        return None;
    }
    Some((name.to_string(), version.to_string()))
}

/// Installs packages into one target directory
pub struct Installer {
    pip: ToolCommand,
    target: PathBuf,
}

impl Installer {
    /// Create an installer that runs `pip` against `target`
    pub fn new(pip: ToolCommand, target: impl Into<PathBuf>) -> Self {
        Self {
            pip,
            target: target.into(),
        }
    }

    /// Installation directory
    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Install every package or fail
    pub fn install(&self, packages: &[PackageSpec]) -> PackResult<InstalledSet> {
        fs::create_dir_all(&self.target)?;

        if packages.is_empty() {
            tracing::info!("No packages to install");
            return InstalledSet::scan(&self.target);
        }

        tracing::info!(
            "Installing {} packages into {}...",
            packages.len(),
            self.target.display()
        );

        let status = self
            .pip
            .command()
            .arg("install")
            .arg("--target")
            .arg(&self.target)
            .args(["--no-input", "--disable-pip-version-check", "--upgrade"])
            .args(packages.iter().map(PackageSpec::requirement))
            .status()
            .map_err(|e| {
                PackError::installation(format!("Failed to run {}: {}", self.pip, e))
            })?;

        if !status.success() {
            return Err(PackError::Installation {
                message: format!("{} install exited with status: {}", self.pip, status),
                code: status.code(),
            });
        }

        let installed = InstalledSet::scan(&self.target)?;
        let unsatisfied = installed.unsatisfied(packages);
        if !unsatisfied.is_empty() {
            let names: Vec<String> = unsatisfied.iter().map(|s| s.requirement()).collect();
            return Err(PackError::installation(format!(
                "{} of {} packages missing after install: {}",
                names.len(),
                packages.len(),
                names.join(", ")
            )));
        }

        for spec in packages {
            if let Some(pkg) = installed.get(&spec.name) {
                tracing::debug!("Installed {} {}", pkg.name, pkg.version);
            }
        }
        tracing::info!("All {} packages installed", packages.len());

        Ok(installed)
    }
}
