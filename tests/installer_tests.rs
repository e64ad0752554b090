//! Tests for staticpack installer module

#![cfg(unix)]

mod common;

use common::tools;
use staticpack::{InstalledSet, Installer, PackError, PackageSpec, ToolCommand};
use std::fs;
use tempfile::TempDir;

fn specs(names: &[&str]) -> Vec<PackageSpec> {
    names.iter().map(|n| PackageSpec::parse(n).unwrap()).collect()
}

fn pip_command(path: &std::path::Path) -> ToolCommand {
    ToolCommand::new(path.to_string_lossy())
}

#[test]
fn test_install_all_packages() {
    let temp = TempDir::new().unwrap();
    let pip = tools::pip(&temp.path().join("tools"), None, None);
    let target = temp.path().join("site");

    let installer = Installer::new(pip_command(&pip), &target);
    let installed = installer
        .install(&specs(&["fastapi", "Pillow", "pymupdf==1.24.0"]))
        .unwrap();

    assert_eq!(installed.len(), 3);
    assert_eq!(installed.site_dir(), target.as_path());
    assert!(installed.get("pillow").is_some());
    assert_eq!(installed.get("PyMuPDF").unwrap().version, "1.24.0");
}

#[test]
fn test_install_is_all_or_nothing() {
    let temp = TempDir::new().unwrap();
    let pip = tools::pip(&temp.path().join("tools"), None, Some("pymupdf"));
    let installer = Installer::new(pip_command(&pip), temp.path().join("site"));

    let err = installer
        .install(&specs(&["fastapi", "pillow", "pymupdf"]))
        .unwrap_err();

    match err {
        PackError::Installation { message, code } => {
            assert!(message.contains("pymupdf"), "{}", message);
            assert!(message.contains("1 of 3"), "{}", message);
            assert_eq!(code, None);
        }
        other => panic!("expected Installation error, got {:?}", other),
    }
}

#[test]
fn test_install_propagates_tool_exit_code() {
    let temp = TempDir::new().unwrap();
    let pip = tools::failing(&temp.path().join("tools"), "pip", 7);
    let installer = Installer::new(pip_command(&pip), temp.path().join("site"));

    let err = installer.install(&specs(&["fastapi"])).unwrap_err();
    assert!(matches!(err, PackError::Installation { code: Some(7), .. }));
    assert_eq!(err.exit_code(), 7);
}

#[test]
fn test_install_checks_pinned_version() {
    let temp = TempDir::new().unwrap();
    let pip = tools::pip(&temp.path().join("tools"), None, None);
    let site = temp.path().join("site");
    let installer = Installer::new(pip_command(&pip), &site);

    installer.install(&specs(&["pillow==10.4.0"])).unwrap();

    let installed = InstalledSet::scan(&site).unwrap();
    assert!(installed.satisfies(&PackageSpec::parse("pillow==10.4.0").unwrap()));
    assert!(installed.satisfies(&PackageSpec::parse("pillow>=10").unwrap()));
    assert!(!installed.satisfies(&PackageSpec::parse("pillow==9.5.0").unwrap()));
    assert!(!installed.satisfies(&PackageSpec::new("pymupdf")));
}

#[test]
fn test_install_nothing_skips_pip() {
    let temp = TempDir::new().unwrap();
    let pip = tools::failing(&temp.path().join("tools"), "pip", 1);
    let site = temp.path().join("site");
    fs::create_dir_all(site.join("tinydb-4.8.0.dist-info")).unwrap();

    let installed = Installer::new(pip_command(&pip), &site).install(&[]).unwrap();
    assert_eq!(installed.len(), 1);
    assert_eq!(installed.get("tinydb").unwrap().version, "4.8.0");
}

#[test]
fn test_missing_pip_is_installation_error() {
    let temp = TempDir::new().unwrap();
    let installer = Installer::new(
        ToolCommand::new("/nonexistent/pip"),
        temp.path().join("site"),
    );
    let err = installer.install(&specs(&["fastapi"])).unwrap_err();
    assert!(matches!(err, PackError::Installation { code: None, .. }));
}

#[test]
fn test_scan_reads_metadata_dirs() {
    let temp = TempDir::new().unwrap();
    for dir in [
        "Pillow-10.4.0.dist-info",
        "python_jose-3.3.0.dist-info",
        "tinydb-4.8.0-py3.11.egg-info",
        "PIL",
    ] {
        fs::create_dir_all(temp.path().join(dir)).unwrap();
    }
    fs::write(temp.path().join("six-1.16.0.dist-info"), "not a directory").unwrap();

    let installed = InstalledSet::scan(temp.path()).unwrap();
    let names: Vec<&str> = installed.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(names, vec!["Pillow", "python_jose", "tinydb"]);
    assert!(installed.get("python-jose").is_some());
}

#[test]
fn test_pinned_version_uses_release_equivalence() {
    let temp = TempDir::new().unwrap();
    fs::create_dir_all(temp.path().join("Pillow-10.4.0.dist-info")).unwrap();
    fs::create_dir_all(temp.path().join("PyMuPDF-1.24.0.dist-info")).unwrap();

    let installed = InstalledSet::scan(temp.path()).unwrap();
    for pinned in ["pillow==10.4", "pillow==10.4.0", "pillow==10.4.*", "pymupdf==1.24"] {
        assert!(
            installed.satisfies(&PackageSpec::parse(pinned).unwrap()),
            "{} should be satisfied",
            pinned
        );
    }
    assert!(!installed.satisfies(&PackageSpec::parse("pillow==10.5").unwrap()));
    assert!(!installed.satisfies(&PackageSpec::parse("pillow==10.3.*").unwrap()));
    assert!(installed
        .unsatisfied(&specs(&["pillow==10.4", "pymupdf==1.24.0"]))
        .is_empty());
}

#[test]
fn test_install_with_extras() {
    let temp = TempDir::new().unwrap();
    let pip = tools::pip(&temp.path().join("tools"), None, None);
    let site = temp.path().join("site");
    let installer = Installer::new(pip_command(&pip), &site);

    let requested = specs(&["python-jose[cryptography]==3.3.0", "uvicorn[standard]"]);
    let installed = installer.install(&requested).unwrap();

    assert!(site.join("python_jose-3.3.0.dist-info").is_dir());
    assert_eq!(installed.len(), 2);
    assert!(installed.unsatisfied(&requested).is_empty());
}
