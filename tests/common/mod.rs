//! Shared test fixtures: minimal ELF images and stand-ins for external tools

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

const PT_LOAD: u32 = 1;
const PT_DYNAMIC: u32 = 2;
const PT_INTERP: u32 = 3;

const EHDR_SIZE: usize = 64;
const PHDR_SIZE: usize = 56;

/// Builds little-endian ELF64 images with just enough structure to be parsed
#[derive(Debug, Clone, Default)]
pub struct ElfBuilder {
    dynamic: bool,
    interp: Option<String>,
    needed: Vec<String>,
    rpath: Option<String>,
    runpath: Option<String>,
}

impl ElfBuilder {
    /// A shared object with a dynamic section
    pub fn shared_object() -> Self {
        Self {
            dynamic: true,
            ..Self::default()
        }
    }

    /// A dynamically linked executable
    pub fn executable() -> Self {
        Self {
            dynamic: true,
            interp: Some("/lib64/ld-linux-x86-64.so.2".to_string()),
            ..Self::default()
        }
    }

    /// An executable with no dynamic section and no loader
    pub fn static_executable() -> Self {
        Self::default()
    }

    pub fn needed(mut self, lib: &str) -> Self {
        self.needed.push(lib.to_string());
        self
    }

    pub fn rpath(mut self, path: &str) -> Self {
        self.rpath = Some(path.to_string());
        self
    }

    pub fn runpath(mut self, path: &str) -> Self {
        self.runpath = Some(path.to_string());
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let phnum = 1 + usize::from(self.dynamic) + usize::from(self.interp.is_some());
        let body_start = EHDR_SIZE + PHDR_SIZE * phnum;

        let mut body = Vec::new();

        let interp = self.interp.as_ref().map(|i| {
            let offset = body_start + body.len();
            body.extend_from_slice(i.as_bytes());
            body.push(0);
            (offset, i.len() + 1)
        });

        let mut dynamic = None;
        if self.dynamic {
            let strtab_offset = body_start + body.len();
            let mut strtab = vec![0u8];
            let mut add = |s: &str| -> u64 {
                let idx = strtab.len() as u64;
                strtab.extend_from_slice(s.as_bytes());
                strtab.push(0);
                idx
            };

            let mut entries: Vec<(i64, u64)> = Vec::new();
            for lib in &self.needed {
                entries.push((1, add(lib)));
            }
            if let Some(ref p) = self.rpath {
                entries.push((15, add(p)));
            }
            if let Some(ref p) = self.runpath {
                entries.push((29, add(p)));
            }
            let strsz = strtab.len() as u64;
            entries.push((5, strtab_offset as u64));
            entries.push((10, strsz));
            entries.push((0, 0));
            entries.push((0, 0));

            body.extend_from_slice(&strtab);
            while (body_start + body.len()) % 8 != 0 {
                body.push(0);
            }

            let dyn_offset = body_start + body.len();
            for (tag, value) in &entries {
                body.extend_from_slice(&(*tag as u64).to_le_bytes());
                body.extend_from_slice(&value.to_le_bytes());
            }
            dynamic = Some((dyn_offset, entries.len() * 16));
        }

        let total = body_start + body.len();

        let mut out = Vec::with_capacity(total);
        out.extend_from_slice(b"\x7fELF");
        out.extend_from_slice(&[2, 1, 1, 0]);
        out.extend_from_slice(&[0u8; 8]);
        let e_type: u16 = if self.interp.is_some() || !self.dynamic { 2 } else { 3 };
        out.extend_from_slice(&e_type.to_le_bytes());
        out.extend_from_slice(&62u16.to_le_bytes());
        out.extend_from_slice(&1u32.to_le_bytes());
        out.extend_from_slice(&0u64.to_le_bytes());
        out.extend_from_slice(&(EHDR_SIZE as u64).to_le_bytes());
        out.extend_from_slice(&0u64.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(&(EHDR_SIZE as u16).to_le_bytes());
        out.extend_from_slice(&(PHDR_SIZE as u16).to_le_bytes());
        out.extend_from_slice(&(phnum as u16).to_le_bytes());
        out.extend_from_slice(&[0u8; 6]);
        assert_eq!(out.len(), EHDR_SIZE);

        let mut phdr = |p_type: u32, offset: usize, size: usize| {
            out.extend_from_slice(&p_type.to_le_bytes());
            out.extend_from_slice(&4u32.to_le_bytes());
            out.extend_from_slice(&(offset as u64).to_le_bytes());
            out.extend_from_slice(&(offset as u64).to_le_bytes());
            out.extend_from_slice(&(offset as u64).to_le_bytes());
            out.extend_from_slice(&(size as u64).to_le_bytes());
            out.extend_from_slice(&(size as u64).to_le_bytes());
            out.extend_from_slice(&8u64.to_le_bytes());
        };
        phdr(PT_LOAD, 0, total);
        if let Some((offset, size)) = interp {
            phdr(PT_INTERP, offset, size);
        }
        if let Some((offset, size)) = dynamic {
            phdr(PT_DYNAMIC, offset, size);
        }

        out.extend_from_slice(&body);
        assert_eq!(out.len(), total);
        out
    }

    /// Write the image to `path`, creating parent directories
    pub fn write(&self, path: &Path) -> PathBuf {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, self.build()).unwrap();
        path.to_path_buf()
    }
}

/// An installation directory laid out like a real one:
///
/// ```text
/// PIL/_imaging.cpython-311-x86_64-linux-gnu.so   RUNPATH $ORIGIN/../pillow.libs
/// pillow.libs/libjpeg-45e70d75.so.62.4.0        RPATH   $ORIGIN
/// pymupdf/_mupdf.so                             RUNPATH /opt/build/mupdf/lib
/// pymupdf/__init__.py
/// numpy/core/_multiarray_umath.so               (no rule)
/// ```
pub fn populate_site(site: &Path) -> Vec<PathBuf> {
    let files = vec![
        ElfBuilder::shared_object()
            .needed("libjpeg-45e70d75.so.62.4.0")
            .needed("libc.so.6")
            .runpath("$ORIGIN/../pillow.libs")
            .write(&site.join("PIL/_imaging.cpython-311-x86_64-linux-gnu.so")),
        ElfBuilder::shared_object()
            .needed("libc.so.6")
            .rpath("$ORIGIN")
            .write(&site.join("pillow.libs/libjpeg-45e70d75.so.62.4.0")),
        ElfBuilder::shared_object()
            .needed("libstdc++.so.6")
            .runpath("/opt/build/mupdf/lib")
            .write(&site.join("pymupdf/_mupdf.so")),
    ];
    fs::write(site.join("pymupdf/__init__.py"), "from ._mupdf import *\n").unwrap();
    ElfBuilder::shared_object()
        .runpath("$ORIGIN")
        .write(&site.join("numpy/core/_multiarray_umath.so"));
    files
}

/// Backups currently present under `dir`
pub fn backups_in(dir: &Path) -> Vec<PathBuf> {
    walkdir::WalkDir::new(dir)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_name().to_string_lossy().ends_with(".staticpack-orig"))
        .map(|e| e.into_path())
        .collect()
}

#[cfg(unix)]
pub mod tools {
    //! Shell-script stand-ins for the interpreter, pip, PyInstaller and staticx

    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use std::path::{Path, PathBuf};

    pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
        fs::create_dir_all(dir).unwrap();
        let path = dir.join(name);
        fs::write(&path, format!("#!/bin/sh\n{}", body)).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    /// Interpreter that reports itself as Python `version`
    pub fn python(dir: &Path, version: &str) -> PathBuf {
        write_script(
            dir,
            "python3",
            &format!(
                "printf '{{\"executable\": \"%s\", \"version\": \"{}\", \"prefix\": \"/usr\", \"base_prefix\": \"/usr\"}}\\n' \"$0\"\n",
                version
            ),
        )
    }

    /// pip that records every requested package as installed
    ///
    /// `template` is copied into the target (native libraries), `skip` is a
    /// package it silently fails to install.
    pub fn pip(dir: &Path, template: Option<&Path>, skip: Option<&str>) -> PathBuf {
        let copy = match template {
            Some(t) => format!("cp -R '{}/.' \"$target/\"\n", t.display()),
            None => String::new(),
        };
        let skip = skip.unwrap_or("");
        write_script(
            dir,
            "pip",
            &format!(
                r#"target=""
while [ $# -gt 0 ]; do
  case "$1" in
    install) ;;
    --target) shift; target="$1" ;;
    --*) ;;
    *)
      name=$(printf '%s' "$1" | sed -e 's/[<>!~=[].*//' -e 's/-/_/g')
      ver=$(printf '%s' "$1" | sed -n 's/^[^=]*==//p')
      [ -z "$ver" ] && ver=1.0
      if [ "$name" != "{skip}" ]; then
        mkdir -p "$target/$name-$ver.dist-info"
      fi
      ;;
  esac
  shift
done
{copy}"#
            ),
        )
    }

    /// A tool that always exits with `code`
    pub fn failing(dir: &Path, name: &str, code: i32) -> PathBuf {
        write_script(dir, name, &format!("echo '{} failed' >&2\nexit {}\n", name, code))
    }

    /// PyInstaller that copies `binary` to `<distpath>/<name>`
    ///
    /// Writes its arguments (one per line), its `LD_LIBRARY_PATH` and the
    /// number of backups under `--paths` to `log`.
    pub fn pyinstaller(dir: &Path, binary: &Path, log: &Path) -> PathBuf {
        write_script(
            dir,
            "pyinstaller",
            &format!(
                r#"log='{log}'
: > "$log"
for arg in "$@"; do printf '%s\n' "$arg" >> "$log"; done
printf 'LD_LIBRARY_PATH=%s\n' "$LD_LIBRARY_PATH" >> "$log"
name=""; dist=""; paths=""
while [ $# -gt 0 ]; do
  case "$1" in
    --name) shift; name="$1" ;;
    --distpath) shift; dist="$1" ;;
    --paths) shift; paths="$1" ;;
  esac
  shift
done
if [ -n "$paths" ]; then
  printf 'BACKUPS=%s\n' "$(find "$paths" -name '*.staticpack-orig' | wc -l | tr -d ' ')" >> "$log"
fi
mkdir -p "$dist"
cp '{binary}' "$dist/$name"
"#,
                log = log.display(),
                binary = binary.display()
            ),
        )
    }

    /// staticx that writes `binary` to its output argument
    pub fn staticx(dir: &Path, binary: &Path) -> PathBuf {
        write_script(
            dir,
            "staticx",
            &format!("cp '{}' \"$2\"\n", binary.display()),
        )
    }
}
