//! Tests for staticpack elf module

mod common;

use common::ElfBuilder;
use staticpack::{is_elf, ElfFile};
use std::fs;
use tempfile::TempDir;

#[test]
fn test_reads_needed_and_search_paths() {
    let data = ElfBuilder::shared_object()
        .needed("libjpeg.so.62")
        .needed("libc.so.6")
        .rpath("/build/lib")
        .runpath("$ORIGIN/../pillow.libs")
        .build();
    let elf = ElfFile::parse("_imaging.so", data).unwrap();

    assert!(elf.is_dynamic().unwrap());
    assert_eq!(elf.needed().unwrap(), vec!["libjpeg.so.62", "libc.so.6"]);
    assert_eq!(
        elf.search_paths().unwrap(),
        vec!["/build/lib", "$ORIGIN/../pillow.libs"]
    );
    assert_eq!(elf.interpreter().unwrap(), None);
}

#[test]
fn test_reads_interpreter() {
    let elf = ElfFile::parse("app", ElfBuilder::executable().needed("libc.so.6").build()).unwrap();
    assert_eq!(
        elf.interpreter().unwrap().as_deref(),
        Some("/lib64/ld-linux-x86-64.so.2")
    );
}

#[test]
fn test_remove_search_paths_keeps_other_entries() {
    let original = ElfBuilder::shared_object()
        .needed("libc.so.6")
        .rpath("/build/lib")
        .runpath("$ORIGIN")
        .build();
    let mut elf = ElfFile::parse("lib.so", original.clone()).unwrap();

    let removed = elf.remove_search_paths().unwrap();
    assert_eq!(removed, vec!["/build/lib", "$ORIGIN"]);

    assert!(elf.search_paths().unwrap().is_empty());
    assert_eq!(elf.needed().unwrap(), vec!["libc.so.6"]);
    assert_eq!(elf.as_bytes().len(), original.len());
    assert_ne!(elf.as_bytes(), original.as_slice());
}

#[test]
fn test_remove_search_paths_is_idempotent() {
    let data = ElfBuilder::shared_object().runpath("$ORIGIN").build();
    let mut elf = ElfFile::parse("lib.so", data).unwrap();

    assert_eq!(elf.remove_search_paths().unwrap().len(), 1);
    let once = elf.as_bytes().to_vec();

    assert!(elf.remove_search_paths().unwrap().is_empty());
    assert_eq!(elf.as_bytes(), once.as_slice());
}

#[test]
fn test_remove_without_search_paths_changes_nothing() {
    let data = ElfBuilder::shared_object().needed("libc.so.6").build();
    let mut elf = ElfFile::parse("lib.so", data.clone()).unwrap();

    assert!(elf.remove_search_paths().unwrap().is_empty());
    assert_eq!(elf.as_bytes(), data.as_slice());
}

#[test]
fn test_static_executable_has_no_dependencies() {
    let elf = ElfFile::parse("app", ElfBuilder::static_executable().build()).unwrap();
    assert!(!elf.is_dynamic().unwrap());
    assert!(elf.needed().unwrap().is_empty());
    assert!(elf.interpreter().unwrap().is_none());
}

#[test]
fn test_save_writes_in_place() {
    let temp = TempDir::new().unwrap();
    let path = ElfBuilder::shared_object()
        .needed("libc.so.6")
        .runpath("/opt/build")
        .write(&temp.path().join("lib.so"));

    let mut elf = ElfFile::open(&path).unwrap();
    elf.remove_search_paths().unwrap();
    elf.save().unwrap();

    let reloaded = ElfFile::open(&path).unwrap();
    assert!(reloaded.search_paths().unwrap().is_empty());
    assert_eq!(reloaded.needed().unwrap(), vec!["libc.so.6"]);
}

#[test]
fn test_is_elf() {
    let temp = TempDir::new().unwrap();
    let so = ElfBuilder::shared_object().write(&temp.path().join("lib.so"));
    let text = temp.path().join("lib.so.txt");
    fs::write(&text, "not a binary").unwrap();

    assert!(is_elf(&so));
    assert!(!is_elf(&text));
    assert!(!is_elf(&temp.path().join("missing.so")));
}

#[test]
fn test_truncated_dynamic_section_is_an_error() {
    let mut data = ElfBuilder::shared_object().runpath("$ORIGIN").build();
    let len = data.len();
    data.truncate(len - 40);
    let elf = ElfFile::parse("broken.so", data).unwrap();
    assert!(elf.dynamic_entries().is_err());
}
