//! Find the embedded debug-info container in a PE file.
//!
//! The Watcom toolchain appends a whole ELF object (carrying DWARF 2 sections)
//! after the normal PE content. We first try the well-behaved case — a
//! recognizable debug section inside the PE section table — and only fall
//! back to scanning raw bytes for the ELF magic when that fails, preferring
//! the *last* (tail-most) candidate that parses as a well-formed container.

use crate::error::{Error, Result};
use memmap2::Mmap;
use object::{Object, ObjectSection};
use std::fs::File;
use std::path::Path;

const ELF_MAGIC: [u8; 4] = [0x7F, 0x45, 0x4C, 0x46];

/// A located debug-info container, as raw bytes ready to hand to the DWARF reader.
pub struct DebugContainer {
    pub data: Vec<u8>,
    /// Byte offset of the container within the original file, kept for diagnostics.
    pub file_offset: usize,
    pub kind: ContainerKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerKind {
    /// Found as an ordinary PE section (e.g. `.debug_info` present directly).
    PeSection,
    /// Found as a Watcom-style ELF blob appended after the PE image.
    AppendedElf,
}

/// Locate the debug container for `path`, or `NoDebugInfo` if none validates.
pub fn locate_debug_container(path: &Path) -> Result<DebugContainer> {
    let file = File::open(path).map_err(Error::IO)?;
    // Safety: the mapping is read-only and the file is not concurrently
    // truncated by this process.
    let mmap = unsafe { Mmap::map(&file).map_err(Error::IO)? };
    let raw: &[u8] = &mmap;

    let pe = object::File::parse(raw).map_err(Error::ObjParsing)?;
    if !pe.format().eq(&object::BinaryFormat::Pe) {
        return Err(Error::NoDebugInfo(path.to_path_buf()));
    }

    if let Some(container) = find_standard_section(&pe) {
        return Ok(container);
    }

    find_appended_container(raw).ok_or_else(|| Error::NoDebugInfo(path.to_path_buf()))
}

/// Try the well-behaved path: a `.debug_info`/`.debug$S`-style section already
/// present in the PE section table and itself holding DWARF.
fn find_standard_section(pe: &object::File) -> Option<DebugContainer> {
    let section = pe
        .section_by_name(".debug_info")
        .or_else(|| pe.section_by_name(".debug"))?;
    let data = section.uncompressed_data().ok()?.into_owned();
    if data.is_empty() || !looks_like_dwarf(&data) {
        return None;
    }
    Some(DebugContainer {
        data,
        file_offset: section.file_range().map(|(off, _)| off as usize).unwrap_or(0),
        kind: ContainerKind::PeSection,
    })
}

/// Scan the raw file for ELF magic sequences and return the last one that
/// validates as a parseable ELF object positioned near the file tail.
fn find_appended_container(raw: &[u8]) -> Option<DebugContainer> {
    let candidates: Vec<usize> = find_all(raw, &ELF_MAGIC);

    for &offset in candidates.iter().rev() {
        let slice = &raw[offset..];
        if slice.len() < 52 {
            // Smaller than an ELF32 header; can't be a real container.
            continue;
        }
        match object::File::parse(slice) {
            Ok(obj) if matches!(obj.format(), object::BinaryFormat::Elf) => {
                return Some(DebugContainer {
                    data: slice.to_vec(),
                    file_offset: offset,
                    kind: ContainerKind::AppendedElf,
                });
            }
            _ => continue,
        }
    }
    None
}

fn looks_like_dwarf(data: &[u8]) -> bool {
    // A DWARF 2 .debug_info unit header starts with a 4-byte length followed
    // by a 2-byte version field; version 2 is the only one this crate reads.
    data.len() >= 6 && u16::from_le_bytes([data[4], data[5]]) == 2
}

fn find_all(haystack: &[u8], needle: &[u8]) -> Vec<usize> {
    let mut out = Vec::new();
    if needle.is_empty() || haystack.len() < needle.len() {
        return out;
    }
    for i in 0..=haystack.len() - needle.len() {
        if &haystack[i..i + needle.len()] == needle {
            out.push(i);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_last_of_multiple_elf_magics() {
        let mut raw = vec![0u8; 16];
        // A bogus, too-short "candidate" magic that won't parse as ELF.
        raw.extend_from_slice(&ELF_MAGIC);
        raw.extend_from_slice(&[0u8; 4]);
        let offsets = find_all(&raw, &ELF_MAGIC);
        assert_eq!(offsets, vec![16]);
    }

    #[test]
    fn no_magic_present_returns_empty() {
        let raw = vec![0u8; 64];
        assert!(find_all(&raw, &ELF_MAGIC).is_empty());
    }
}
