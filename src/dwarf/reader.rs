//! Parse a DWARF 2 container into compilation units exposing a restartable
//! line-program handle per unit.
//!
//! DWARF 2 only. Malformed unit headers are skipped and logged rather than
//! failing the whole container — `MalformedDwarf` is a per-compilation-unit
//! recovery, not a container-wide failure.

use crate::error::{Error, Result};
use gimli::{EndianRcSlice, RunTimeEndian};
use log::warn;
use object::{Object, ObjectSection};
use std::borrow::Cow;
use std::rc::Rc;

pub type R = EndianRcSlice<RunTimeEndian>;

/// A parsed compilation unit: the attributes the line index needs
/// (`DW_AT_name`, `DW_AT_comp_dir`) plus the full `gimli::Unit`, whose
/// `line_program` is cloned fresh by every consumer — never iterated here —
/// so the file table stays lazily populated for whoever actually runs it.
pub struct CompilationUnit {
    pub unit: gimli::Unit<R>,
    /// `DW_AT_name`: fallback source-file name when the line program's file
    /// table yields no entry for a row.
    pub name: Option<String>,
    /// `DW_AT_comp_dir`: used to absolutize relative paths.
    pub comp_dir: Option<String>,
}

pub struct DwarfReader {
    dwarf: gimli::Dwarf<R>,
}

impl DwarfReader {
    /// Parse `container` (the bytes located by the PE scanner) as a DWARF 2
    /// payload. The container is itself an ELF object (Watcom's appended
    /// blob, or a standard PE debug section already holding DWARF) whose
    /// sections are loaded by name.
    pub fn parse(container: &[u8]) -> Result<Self> {
        let endian = RunTimeEndian::Little;
        let obj = object::File::parse(container).map_err(Error::ObjParsing)?;

        let load_section = |id: gimli::SectionId| -> Result<R> {
            let data = obj
                .section_by_name(id.name())
                .and_then(|s| s.uncompressed_data().ok())
                .unwrap_or(Cow::Borrowed(&[][..]));
            Ok(EndianRcSlice::new(Rc::from(&*data), endian))
        };

        let dwarf = gimli::Dwarf::load(load_section).map_err(Error::DwarfParsing)?;
        Ok(Self { dwarf })
    }

    /// Iterate compilation units. Each unit's encoding version is checked
    /// individually; a non-DWARF-2 unit is skipped rather than failing
    /// everything else in the container.
    pub fn units(&self) -> Vec<CompilationUnit> {
        let mut out = Vec::new();
        let mut iter = self.dwarf.units();
        loop {
            let header = match iter.next() {
                Ok(Some(h)) => h,
                Ok(None) => break,
                Err(e) => {
                    warn!("stopping at malformed compilation unit header: {e}");
                    break;
                }
            };
            if header.version() != 2 {
                warn!(
                    "skipping compilation unit with unsupported dwarf version {}",
                    header.version()
                );
                continue;
            }
            let unit = match self.dwarf.unit(header) {
                Ok(u) => u,
                Err(e) => {
                    warn!("skipping malformed compilation unit: {e}");
                    continue;
                }
            };

            let name = unit
                .name
                .as_ref()
                .and_then(|n| n.to_string_lossy().ok().map(|s| s.to_string()));
            let comp_dir = unit
                .comp_dir
                .as_ref()
                .and_then(|n| n.to_string_lossy().ok().map(|s| s.to_string()));

            out.push(CompilationUnit {
                unit,
                name,
                comp_dir,
            });
        }
        out
    }

    pub fn dwarf(&self) -> &gimli::Dwarf<R> {
        &self.dwarf
    }
}
