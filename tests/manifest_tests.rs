//! Tests for staticpack manifest module

use staticpack::{Manifest, PackConfig, PackError, PackageSpec};
use std::path::{Path, PathBuf};

// ============================================================================
// Parsing Tests
// ============================================================================

#[test]
fn test_parse_minimal_manifest() {
    let toml = r#"
[package]
name = "ocr-service"
entry_point = "main.py"
"#;
    let manifest = Manifest::parse(toml).unwrap();
    assert_eq!(manifest.package.name, "ocr-service");
    assert_eq!(manifest.package.work_dir, PathBuf::from("build"));
    assert_eq!(manifest.interpreter.path, PathBuf::from("/usr/bin/python3"));
    assert!(!manifest.interpreter.require_on_path);
    assert!(manifest.environment.site_packages.is_none());
    assert!(!manifest.patch.case_sensitive);
    assert!(manifest.static_link.allow.is_empty());
    manifest.validate().unwrap();
}

#[test]
fn test_parse_full_manifest() {
    let toml = r#"
[package]
name = "ocr-service"
entry_point = "main.py"
output = "out/ocr"
work_dir = "target/pack"

[interpreter]
path = "/usr/local/bin/python3"
version = "3.11"
require_on_path = true

[environment]
site_packages = "/opt/site"
packages = ["fastapi", "uvicorn==0.30.1", { name = "pillow", version = ">=10" }, { name = "pymupdf", version = "1.24.0" }]

[[resources]]
source = "/usr/share/tesseract-ocr/5/tessdata"
dest = "tessdata"
stage = true

[[resources]]
source = "templates"
dest = "templates"

[[binaries]]
path = "/usr/bin/tesseract"

[[binaries]]
path = "/usr/bin/pdftoppm"

[bundle]
hidden_imports = ["uvicorn.logging", "multipart"]

[patch]
case_sensitive = true

[[patch.rules]]
package = "pillow"
fragments = ["PIL", "pillow.libs"]
required = true

[[patch.rules]]
package = "pymupdf"
fragments = ["fitz", "pymupdf"]
patterns = ["*.so"]

[static_link]
allow = ["libnss_files.so.2"]

[tools]
pip = ["/usr/bin/python3", "-m", "pip"]
staticx = ["/usr/local/bin/staticx"]
"#;
    let manifest = Manifest::parse(toml).unwrap();
    manifest.validate().unwrap();

    assert_eq!(manifest.interpreter.version.as_deref(), Some("3.11"));
    assert!(manifest.interpreter.require_on_path);

    let packages = &manifest.environment.packages;
    assert_eq!(packages.len(), 4);
    assert_eq!(packages[1].pinned_version(), Some("0.30.1"));
    assert_eq!(packages[2].requirement(), "pillow>=10");
    assert_eq!(packages[3].requirement(), "pymupdf==1.24.0");

    assert_eq!(manifest.resources.len(), 2);
    assert!(manifest.resources[0].stage);
    assert!(!manifest.resources[1].stage);
    assert_eq!(manifest.binaries.len(), 2);

    let rules = &manifest.patch.rules;
    assert!(rules[0].required);
    assert_eq!(rules[0].patterns, vec!["*.so", "*.so.*"]);
    assert!(!rules[1].required);
    assert_eq!(rules[1].patterns, vec!["*.so"]);

    let staticx = manifest.tools.staticx.as_ref().unwrap();
    assert_eq!(staticx.program(), "/usr/local/bin/staticx");
    assert!(staticx.args().is_empty());
    assert!(manifest.tools.pyinstaller.is_none());
}

#[test]
fn test_parse_rejects_bad_package_name() {
    let toml = r#"
[package]
name = "app"
entry_point = "main.py"

[environment]
packages = ["bad name"]
"#;
    assert!(Manifest::parse(toml).is_err());
}

#[test]
fn test_parse_rejects_empty_tool_command() {
    let toml = r#"
[package]
name = "app"
entry_point = "main.py"

[tools]
pip = []
"#;
    assert!(Manifest::parse(toml).is_err());
}

// ============================================================================
// Validation Tests
// ============================================================================

fn base_manifest() -> Manifest {
    Manifest::parse(
        r#"
[package]
name = "app"
entry_point = "main.py"
"#,
    )
    .unwrap()
}

fn assert_invalid(manifest: &Manifest, needle: &str) {
    match manifest.validate() {
        Err(PackError::InvalidManifest(msg)) => {
            assert!(msg.contains(needle), "'{}' does not mention '{}'", msg, needle)
        }
        other => panic!("expected InvalidManifest, got {:?}", other),
    }
}

#[test]
fn test_validate_empty_name() {
    let mut manifest = base_manifest();
    manifest.package.name = "  ".to_string();
    assert_invalid(&manifest, "name");
}

#[test]
fn test_validate_duplicate_resource_dest() {
    let mut manifest = Manifest::parse(
        r#"
[package]
name = "app"
entry_point = "main.py"

[[resources]]
source = "a"
dest = "data/"

[[resources]]
source = "b"
dest = "data"
"#,
    )
    .unwrap();
    assert_invalid(&manifest, "Duplicate resource destination");

    manifest.resources[1].dest = "other".to_string();
    manifest.validate().unwrap();
}

#[test]
fn test_validate_resource_dest_stays_inside_bundle() {
    for dest in ["../x", "../..", "data/../../x", ".."] {
        let manifest = Manifest::parse(&format!(
            r#"
[package]
name = "app"
entry_point = "main.py"

[[resources]]
source = "tessdata"
dest = "{}"
stage = true
"#,
            dest
        ))
        .unwrap();
        assert_invalid(&manifest, "must stay inside the bundle");
        assert!(PackConfig::from_manifest(&manifest, Path::new("/srv/app")).is_err());
    }
}

#[test]
fn test_validate_binaries() {
    let relative = Manifest::parse(
        r#"
[package]
name = "app"
entry_point = "main.py"

[[binaries]]
path = "bin/tesseract"
"#,
    )
    .unwrap();
    assert_invalid(&relative, "absolute");

    let clash = Manifest::parse(
        r#"
[package]
name = "app"
entry_point = "main.py"

[[binaries]]
path = "/usr/bin/tesseract"

[[binaries]]
path = "/usr/local/bin/tesseract"
"#,
    )
    .unwrap();
    assert_invalid(&clash, "bin/tesseract");
}

#[test]
fn test_validate_patch_rules() {
    let no_fragment = Manifest::parse(
        r#"
[package]
name = "app"
entry_point = "main.py"

[[patch.rules]]
package = "pillow"
fragments = [" "]
"#,
    )
    .unwrap();
    assert_invalid(&no_fragment, "fragment");

    let bad_glob = Manifest::parse(
        r#"
[package]
name = "app"
entry_point = "main.py"

[[patch.rules]]
package = "pillow"
fragments = ["PIL"]
patterns = ["[*.so"]
"#,
    )
    .unwrap();
    assert_invalid(&bad_glob, "invalid pattern");
}

#[test]
fn test_validate_hidden_imports_and_version() {
    let mut manifest = base_manifest();
    manifest.bundle.hidden_imports = vec!["uvicorn..loops".to_string()];
    assert_invalid(&manifest, "hidden import");

    let mut manifest = base_manifest();
    manifest.interpreter.version = Some("3.x".to_string());
    assert_invalid(&manifest, "version");
}

// ============================================================================
// Built-in Manifest Tests
// ============================================================================

#[test]
fn test_builtin_manifest() {
    let manifest = Manifest::builtin();
    manifest.validate().unwrap();

    assert_eq!(manifest.package.name, "ocr-service");
    assert_eq!(manifest.binaries.len(), 4);
    assert_eq!(manifest.resources.len(), 2);
    assert!(manifest.resources.iter().any(|r| r.dest == "tessdata" && r.stage));
    assert!(manifest.interpreter.require_on_path);

    let packages: Vec<String> = manifest
        .environment
        .packages
        .iter()
        .map(PackageSpec::normalized_name)
        .collect();
    for expected in ["pillow", "pymupdf", "pytesseract", "pdf2image", "staticx"] {
        assert!(packages.contains(&expected.to_string()), "missing {}", expected);
    }

    let rules: Vec<&str> = manifest.patch.rules.iter().map(|r| r.package.as_str()).collect();
    assert_eq!(rules, vec!["pillow", "pymupdf"]);
    assert!(manifest
        .bundle
        .hidden_imports
        .contains(&"uvicorn.protocols.http.auto".to_string()));
}

#[test]
fn test_builtin_manifest_survives_toml() {
    let manifest = Manifest::builtin();
    let text = manifest.to_toml_string().unwrap();
    let parsed = Manifest::parse(&text).unwrap();

    parsed.validate().unwrap();
    assert_eq!(parsed.package.name, manifest.package.name);
    assert_eq!(parsed.environment.packages, manifest.environment.packages);
    assert_eq!(parsed.resources, manifest.resources);
    assert_eq!(parsed.binaries, manifest.binaries);
    assert_eq!(parsed.patch.rules, manifest.patch.rules);
}

// ============================================================================
// PackConfig Resolution Tests
// ============================================================================

#[test]
fn test_pack_config_resolves_paths() {
    let manifest = Manifest::parse(
        r#"
[package]
name = "app"
entry_point = "src/../main.py"
work_dir = "build"

[interpreter]
path = "/usr/bin/python3"

[[resources]]
source = "templates"
dest = "/templates/"

[bundle]
hidden_imports = ["uvicorn.logging", "multipart", "uvicorn.logging"]
"#,
    )
    .unwrap();
    let base = Path::new("/srv/project");
    let config = PackConfig::from_manifest(&manifest, base).unwrap();

    assert_eq!(config.entry_point, PathBuf::from("/srv/project/main.py"));
    assert_eq!(config.output, PathBuf::from("/srv/project/dist/app"));
    assert_eq!(config.work_dir, PathBuf::from("/srv/project/build"));
    assert_eq!(config.staging_dir(), PathBuf::from("/srv/project/build/staged"));
    assert_eq!(config.resources[0].source, PathBuf::from("/srv/project/templates"));
    assert_eq!(config.resources[0].dest, "templates");
    assert_eq!(config.hidden_imports, vec!["multipart", "uvicorn.logging"]);
    assert!(config.site_packages.is_none());
    assert!(!config.keep_environment);

    assert_eq!(config.tools.pip.to_string(), "/usr/bin/python3 -m pip");
    assert_eq!(
        config.tools.pyinstaller.to_string(),
        "/usr/bin/python3 -m PyInstaller"
    );
    assert_eq!(config.tools.staticx.to_string(), "/usr/bin/python3 -m staticx");
}

#[test]
fn test_pack_config_tool_overrides() {
    let manifest = Manifest::parse(
        r#"
[package]
name = "app"
entry_point = "main.py"
output = "/opt/out/app"

[environment]
site_packages = "site"

[tools]
pyinstaller = ["/usr/local/bin/pyinstaller", "--log-level", "WARN"]
"#,
    )
    .unwrap();
    let config = PackConfig::from_manifest(&manifest, Path::new("/srv/project"))
        .unwrap()
        .with_keep_environment(true);

    assert_eq!(config.output, PathBuf::from("/opt/out/app"));
    assert_eq!(config.site_packages, Some(PathBuf::from("/srv/project/site")));
    assert!(config.keep_environment);
    assert_eq!(
        config.tools.pyinstaller.to_string(),
        "/usr/local/bin/pyinstaller --log-level WARN"
    );
    assert_eq!(config.tools.pip.to_string(), "/usr/bin/python3 -m pip");
}

#[test]
fn test_pack_config_rejects_invalid_manifest() {
    let mut manifest = base_manifest();
    manifest.package.entry_point = PathBuf::new();
    assert!(PackConfig::from_manifest(&manifest, Path::new("/srv")).is_err());
}
