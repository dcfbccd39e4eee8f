//! Regression coverage for `LineIndex::build` against a real, `gimli`-parsed
//! compilation unit (as opposed to the hand-built `LineRow` fixtures in the
//! unit tests beside the code, which exercise the lookup tables but not the
//! line-program walk itself).
//!
//! Builds a small line program with two files across one address sequence,
//! using `gimli::write`, then round-trips it through the real reader path
//! (`gimli::Dwarf::load` + `Dwarf::unit`) so `LineIndex::build` sees exactly
//! the kind of lazily-populated file table a Watcom-produced program emits.

use gimli::write::{Address, DwarfUnit, EndianVec, LineProgram, LineString, Sections};
use gimli::{Encoding, Format, LineEncoding, RunTimeEndian};
use std::rc::Rc;
use watcom_dbg_server::dwarf::line_index::LineIndex;
use watcom_dbg_server::dwarf::reader::{CompilationUnit, R};

fn parse_synthetic_unit() -> (gimli::Dwarf<R>, Vec<CompilationUnit>) {
    let encoding = Encoding {
        format: Format::Dwarf32,
        version: 2,
        address_size: 4,
    };

    let mut dwarf_unit = DwarfUnit::new(encoding);
    let mut line_program = LineProgram::new(
        encoding,
        LineEncoding::default(),
        LineString::String(b"c:/proj".to_vec()),
        LineString::String(b"main.c".to_vec()),
        None,
    );
    let dir_id = line_program.default_directory();
    let second_file = line_program.add_file(LineString::String(b"helper.c".to_vec()), dir_id, None);

    line_program.begin_sequence(Some(Address::Constant(0x1000)));
    line_program.row().line = 4;
    line_program.row().column = 1;
    line_program.generate_row();

    line_program.row().line = 5;
    line_program.row().address_offset = 0x10;
    line_program.generate_row();

    // Switch to the second file mid-sequence -- the scenario a lazily
    // populated file table (`DW_LNE_define_file` interleaved with rows) has
    // to cope with: this row must resolve against `helper.c`, not `main.c`.
    line_program.row().file = second_file;
    line_program.row().line = 12;
    line_program.row().address_offset = 0x20;
    line_program.generate_row();

    line_program.end_sequence(0x30);
    dwarf_unit.unit.line_program = line_program;

    let mut sections = Sections::new(EndianVec::new(RunTimeEndian::Little));
    dwarf_unit.write(&mut sections).expect("write synthetic dwarf");

    let endian = RunTimeEndian::Little;
    let load_section = |id: gimli::SectionId| -> Result<R, gimli::Error> {
        let data = sections.get(id).slice();
        Ok(gimli::EndianRcSlice::new(Rc::from(data), endian))
    };
    let dwarf = gimli::Dwarf::load(load_section).expect("load synthetic sections");

    let mut units = Vec::new();
    let mut iter = dwarf.units();
    while let Some(header) = iter.next().expect("iterate unit headers") {
        let unit = dwarf.unit(header).expect("parse unit");
        let name = unit
            .name
            .as_ref()
            .and_then(|n| n.to_string_lossy().ok().map(|s| s.to_string()));
        let comp_dir = unit
            .comp_dir
            .as_ref()
            .and_then(|n| n.to_string_lossy().ok().map(|s| s.to_string()));
        units.push(CompilationUnit {
            unit,
            name,
            comp_dir,
        });
    }
    (dwarf, units)
}

#[test]
fn resolves_files_added_mid_sequence() {
    let (dwarf, units) = parse_synthetic_unit();
    let index = LineIndex::build(&dwarf, &units);

    let at_0x1005 = index.address_to_line(0x1005).expect("row at 0x1005");
    assert_eq!(at_0x1005.line, 4);
    assert!(at_0x1005.path.to_string_lossy().ends_with("main.c"));

    let at_0x1025 = index.address_to_line(0x1025).expect("row at 0x1025");
    assert_eq!(at_0x1025.line, 12);
    assert!(at_0x1025.path.to_string_lossy().ends_with("helper.c"));

    let files: Vec<String> = index
        .files()
        .map(|p| p.to_string_lossy().to_string())
        .collect();
    assert!(files.iter().any(|f| f.ends_with("main.c")));
    assert!(files.iter().any(|f| f.ends_with("helper.c")));
}
