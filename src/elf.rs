//! Minimal ELF reader/rewriter
//!
//! Only the parts of the format the pipeline needs are understood: the file
//! header, program headers, the `PT_INTERP` segment and the `PT_DYNAMIC`
//! segment. Both ELF classes and both byte orders are supported.
//!
//! Search-path removal works in place: `DT_RPATH`/`DT_RUNPATH` entries are
//! dropped from the dynamic array, later entries move up and the freed slots
//! at the tail become `DT_NULL`. The string table is left untouched, so the
//! file size and every other offset stay the same.

use crate::error::{PackError, PackResult};
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

/// ELF magic bytes
pub const ELF_MAGIC: &[u8; 4] = b"\x7fELF";

const PT_LOAD: u32 = 1;
const PT_DYNAMIC: u32 = 2;
const PT_INTERP: u32 = 3;

pub const DT_NULL: i64 = 0;
pub const DT_NEEDED: i64 = 1;
pub const DT_STRTAB: i64 = 5;
pub const DT_STRSZ: i64 = 10;
pub const DT_RPATH: i64 = 15;
pub const DT_RUNPATH: i64 = 29;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Class {
    Elf32,
    Elf64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Endian {
    Little,
    Big,
}

#[derive(Debug, Clone, Copy)]
struct ProgramHeader {
    p_type: u32,
    offset: u64,
    vaddr: u64,
    filesz: u64,
}

/// One entry of the dynamic array
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DynamicEntry {
    pub tag: i64,
    pub value: u64,
}

/// An ELF image loaded into memory
#[derive(Debug)]
pub struct ElfFile {
    path: PathBuf,
    data: Vec<u8>,
    class: Class,
    endian: Endian,
}

/// Check the magic bytes of a file without loading it
pub fn is_elf(path: &Path) -> bool {
    let mut magic = [0u8; 4];
    match fs::File::open(path) {
        Ok(mut file) => file.read_exact(&mut magic).is_ok() && &magic == ELF_MAGIC,
        Err(_) => false,
    }
}

impl ElfFile {
    /// Load and validate an ELF file
    pub fn open(path: impl AsRef<Path>) -> PackResult<Self> {
        let path = path.as_ref();
        let data = fs::read(path)?;
        Self::parse(path, data)
    }

    /// Validate in-memory ELF bytes; `path` is used for error reporting
    pub fn parse(path: impl Into<PathBuf>, data: Vec<u8>) -> PackResult<Self> {
        let path = path.into();

        if data.len() < 16 || &data[..4] != ELF_MAGIC {
            return Err(PackError::elf(path, "not an ELF file"));
        }

        let class = match data[4] {
            1 => Class::Elf32,
            2 => Class::Elf64,
            other => return Err(PackError::elf(path, format!("unknown ELF class {}", other))),
        };
        let endian = match data[5] {
            1 => Endian::Little,
            2 => Endian::Big,
            other => {
                return Err(PackError::elf(
                    path,
                    format!("unknown ELF data encoding {}", other),
                ))
            }
        };

        let header_size = match class {
            Class::Elf32 => 52,
            Class::Elf64 => 64,
        };
        if data.len() < header_size {
            return Err(PackError::elf(path, "truncated ELF header"));
        }

        Ok(Self {
            path,
            data,
            class,
            endian,
        })
    }

    /// Path this image was loaded from
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Raw bytes, including any in-memory modifications
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Write the (possibly modified) image back to its path
    ///
    /// The existing file is overwritten in place so its permissions survive.
    pub fn save(&self) -> PackResult<()> {
        fs::write(&self.path, &self.data)?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Primitive access
    // ------------------------------------------------------------------

    fn bytes<const N: usize>(&self, offset: u64) -> PackResult<[u8; N]> {
        let start = usize::try_from(offset)
            .map_err(|_| PackError::elf(&self.path, "offset out of range"))?;
        let end = start
            .checked_add(N)
            .ok_or_else(|| PackError::elf(&self.path, "offset overflow"))?;
        let slice = self.data.get(start..end).ok_or_else(|| {
            PackError::elf(&self.path, format!("read past end of file at 0x{:x}", offset))
        })?;
        let mut out = [0u8; N];
        out.copy_from_slice(slice);
        Ok(out)
    }

    fn u16_at(&self, offset: u64) -> PackResult<u16> {
        let b = self.bytes::<2>(offset)?;
        Ok(match self.endian {
            Endian::Little => u16::from_le_bytes(b),
            Endian::Big => u16::from_be_bytes(b),
        })
    }

    fn u32_at(&self, offset: u64) -> PackResult<u32> {
        let b = self.bytes::<4>(offset)?;
        Ok(match self.endian {
            Endian::Little => u32::from_le_bytes(b),
            Endian::Big => u32::from_be_bytes(b),
        })
    }

    fn u64_at(&self, offset: u64) -> PackResult<u64> {
        let b = self.bytes::<8>(offset)?;
        Ok(match self.endian {
            Endian::Little => u64::from_le_bytes(b),
            Endian::Big => u64::from_be_bytes(b),
        })
    }

    /// Address-sized word
    fn word_at(&self, offset: u64) -> PackResult<u64> {
        match self.class {
            Class::Elf32 => self.u32_at(offset).map(u64::from),
            Class::Elf64 => self.u64_at(offset),
        }
    }

    fn put_word(&mut self, offset: u64, value: u64) -> PackResult<()> {
        // bounds check through the reader first
        match self.class {
            Class::Elf32 => {
                self.bytes::<4>(offset)?;
                let v = u32::try_from(value)
                    .map_err(|_| PackError::elf(&self.path, "value does not fit ELF32 word"))?;
                let b = match self.endian {
                    Endian::Little => v.to_le_bytes(),
                    Endian::Big => v.to_be_bytes(),
                };
                let at = offset as usize;
                self.data[at..at + 4].copy_from_slice(&b);
            }
            Class::Elf64 => {
                self.bytes::<8>(offset)?;
                let b = match self.endian {
                    Endian::Little => value.to_le_bytes(),
                    Endian::Big => value.to_be_bytes(),
                };
                let at = offset as usize;
                self.data[at..at + 8].copy_from_slice(&b);
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Structure
    // ------------------------------------------------------------------

    fn program_headers(&self) -> PackResult<Vec<ProgramHeader>> {
        let (phoff, phentsize, phnum) = match self.class {
            Class::Elf32 => (
                u64::from(self.u32_at(28)?),
                self.u16_at(42)?,
                self.u16_at(44)?,
            ),
            Class::Elf64 => (self.u64_at(32)?, self.u16_at(54)?, self.u16_at(56)?),
        };

        if phnum == 0xffff {
            return Err(PackError::elf(
                &self.path,
                "extended program header count is not supported",
            ));
        }

        let mut headers = Vec::with_capacity(usize::from(phnum));
        for i in 0..u64::from(phnum) {
            let base = phoff + i * u64::from(phentsize);
            let ph = match self.class {
                Class::Elf32 => ProgramHeader {
                    p_type: self.u32_at(base)?,
                    offset: u64::from(self.u32_at(base + 4)?),
                    vaddr: u64::from(self.u32_at(base + 8)?),
                    filesz: u64::from(self.u32_at(base + 16)?),
                },
                Class::Elf64 => ProgramHeader {
                    p_type: self.u32_at(base)?,
                    offset: self.u64_at(base + 8)?,
                    vaddr: self.u64_at(base + 16)?,
                    filesz: self.u64_at(base + 32)?,
                },
            };
            headers.push(ph);
        }
        Ok(headers)
    }

    fn dyn_entry_size(&self) -> u64 {
        match self.class {
            Class::Elf32 => 8,
            Class::Elf64 => 16,
        }
    }

    /// File offset and slot count of the dynamic array
    fn dynamic_table(&self) -> PackResult<Option<(u64, u64)>> {
        let table = self
            .program_headers()?
            .into_iter()
            .find(|ph| ph.p_type == PT_DYNAMIC)
            .map(|ph| (ph.offset, ph.filesz / self.dyn_entry_size()));
        Ok(table)
    }

    fn read_dyn(&self, offset: u64) -> PackResult<DynamicEntry> {
        let (tag, value) = match self.class {
            Class::Elf32 => (
                i64::from(self.u32_at(offset)? as i32),
                u64::from(self.u32_at(offset + 4)?),
            ),
            Class::Elf64 => (self.u64_at(offset)? as i64, self.u64_at(offset + 8)?),
        };
        Ok(DynamicEntry { tag, value })
    }

    fn write_dyn(&mut self, offset: u64, entry: DynamicEntry) -> PackResult<()> {
        let half = self.dyn_entry_size() / 2;
        self.put_word(offset, entry.tag as u64)?;
        self.put_word(offset + half, entry.value)
    }

    /// Whether the image has a dynamic segment at all
    pub fn is_dynamic(&self) -> PackResult<bool> {
        Ok(self.dynamic_table()?.is_some())
    }

    /// Dynamic entries up to (not including) the terminating `DT_NULL`
    pub fn dynamic_entries(&self) -> PackResult<Vec<DynamicEntry>> {
        let Some((offset, slots)) = self.dynamic_table()? else {
            return Ok(Vec::new());
        };

        let mut entries = Vec::new();
        for i in 0..slots {
            let entry = self.read_dyn(offset + i * self.dyn_entry_size())?;
            if entry.tag == DT_NULL {
                break;
            }
            entries.push(entry);
        }
        Ok(entries)
    }

    fn vaddr_to_offset(&self, vaddr: u64) -> PackResult<Option<u64>> {
        Ok(self
            .program_headers()?
            .into_iter()
            .filter(|ph| ph.p_type == PT_LOAD)
            .find(|ph| vaddr >= ph.vaddr && vaddr < ph.vaddr + ph.filesz)
            .map(|ph| ph.offset + (vaddr - ph.vaddr)))
    }

    fn read_cstr(&self, start: u64, limit: Option<u64>) -> PackResult<String> {
        let start_idx = usize::try_from(start)
            .map_err(|_| PackError::elf(&self.path, "string offset out of range"))?;
        let rest = self
            .data
            .get(start_idx..)
            .ok_or_else(|| PackError::elf(&self.path, "string offset past end of file"))?;
        let rest = match limit.and_then(|l| usize::try_from(l).ok()) {
            Some(l) if l < rest.len() => &rest[..l],
            _ => rest,
        };
        let end = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| PackError::elf(&self.path, "unterminated string"))?;
        Ok(String::from_utf8_lossy(&rest[..end]).into_owned())
    }

    /// Resolve a dynamic string-table index
    fn dyn_string(&self, entries: &[DynamicEntry], index: u64) -> PackResult<String> {
        let strtab = entries
            .iter()
            .find(|e| e.tag == DT_STRTAB)
            .ok_or_else(|| PackError::elf(&self.path, "dynamic section has no DT_STRTAB"))?;
        let strsz = entries.iter().find(|e| e.tag == DT_STRSZ).map(|e| e.value);

        let table = self.vaddr_to_offset(strtab.value)?.ok_or_else(|| {
            PackError::elf(&self.path, "DT_STRTAB is not inside a loadable segment")
        })?;

        if let Some(size) = strsz {
            if index >= size {
                return Err(PackError::elf(&self.path, "string index past DT_STRSZ"));
            }
        }
        self.read_cstr(table + index, strsz.map(|s| s - index))
    }

    fn dyn_strings(&self, tags: &[i64]) -> PackResult<Vec<String>> {
        let entries = self.dynamic_entries()?;
        entries
            .iter()
            .filter(|e| tags.contains(&e.tag))
            .map(|e| self.dyn_string(&entries, e.value))
            .collect()
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Program interpreter requested by `PT_INTERP`
    pub fn interpreter(&self) -> PackResult<Option<String>> {
        let interp = self
            .program_headers()?
            .into_iter()
            .find(|ph| ph.p_type == PT_INTERP);
        match interp {
            Some(ph) => self.read_cstr(ph.offset, Some(ph.filesz)).map(Some),
            None => Ok(None),
        }
    }

    /// Shared libraries named by `DT_NEEDED`
    pub fn needed(&self) -> PackResult<Vec<String>> {
        self.dyn_strings(&[DT_NEEDED])
    }

    /// Embedded library search paths (`DT_RPATH` and `DT_RUNPATH`)
    pub fn search_paths(&self) -> PackResult<Vec<String>> {
        self.dyn_strings(&[DT_RPATH, DT_RUNPATH])
    }

    // ------------------------------------------------------------------
    // Mutation
    // ------------------------------------------------------------------

    /// Drop every `DT_RPATH`/`DT_RUNPATH` entry from the dynamic array
    ///
    /// Returns the removed search paths; an empty vector means nothing was
    /// changed. Unresolvable strings are reported as `<unresolved>`.
    pub fn remove_search_paths(&mut self) -> PackResult<Vec<String>> {
        let Some((offset, slots)) = self.dynamic_table()? else {
            return Ok(Vec::new());
        };
        let entries = self.dynamic_entries()?;

        let removed: Vec<String> = entries
            .iter()
            .filter(|e| e.tag == DT_RPATH || e.tag == DT_RUNPATH)
            .map(|e| {
                self.dyn_string(&entries, e.value)
                    .unwrap_or_else(|_| "<unresolved>".to_string())
            })
            .collect();

        if removed.is_empty() {
            return Ok(removed);
        }

        let kept: Vec<DynamicEntry> = entries
            .iter()
            .copied()
            .filter(|e| e.tag != DT_RPATH && e.tag != DT_RUNPATH)
            .collect();

        let size = self.dyn_entry_size();
        let used = (entries.len() as u64 + 1).min(slots);
        for i in 0..used {
            let entry = kept.get(i as usize).copied().unwrap_or(DynamicEntry {
                tag: DT_NULL,
                value: 0,
            });
            self.write_dyn(offset + i * size, entry)?;
        }

        tracing::debug!(
            "Removed {} search path entr{} from {}",
            removed.len(),
            if removed.len() == 1 { "y" } else { "ies" },
            self.path.display()
        );
        Ok(removed)
    }
}
