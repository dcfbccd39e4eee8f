//! Per-module bidirectional address <-> source-location index.
//!
//! The build order here is the load-bearing part: for every row we ask the
//! *current* line-program header (as returned by that row's `next_row` call)
//! for the file-table entry, never a header snapshot taken before or after
//! the whole program ran. Watcom's compiler defines most or all of its file
//! table entries via `DW_LNE_define_file` opcodes interleaved with the rows
//! themselves rather than up front, so reading the header only once — before
//! the state machine has advanced to a given row — observes an empty table
//! and silently falls back to the compilation unit's name for every file.
//! See `tests/line_index.rs` for the regression this guards against.

use crate::dwarf::reader::{CompilationUnit, R};
use log::warn;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineRow {
    /// Module-relative address, as emitted by the compiler.
    pub address: u32,
    pub file_id: u32,
    pub line: u64,
    pub column: u64,
    pub is_stmt: bool,
    pub end_sequence: bool,
}

#[derive(Debug, Clone)]
pub struct Resolved {
    pub path: PathBuf,
    pub line: u64,
    pub column: u64,
}

/// Per-module bidirectional line index.
#[derive(Debug, Default)]
pub struct LineIndex {
    rows: Vec<LineRow>,
    files: HashMap<u32, PathBuf>,
    inverse: HashMap<(String, u64), (u32, bool)>,
}

impl LineIndex {
    /// Build from all of a module's compilation units. Individual units with
    /// no line program are skipped; this never fails the whole module (a
    /// module with no usable debug info just gets an empty index).
    pub fn build(dwarf: &gimli::Dwarf<R>, units: &[CompilationUnit]) -> Self {
        let mut rows = Vec::new();
        let mut files: HashMap<u32, PathBuf> = HashMap::new();
        let mut path_to_id: HashMap<PathBuf, u32> = HashMap::new();
        let mut next_file_id = 0u32;

        for cu in units {
            let Some(ref line_program) = cu.unit.line_program else {
                continue;
            };

            // Per-unit cache of already-resolved `file` indices; discarded
            // when the unit ends.
            let mut unit_cache: HashMap<u64, u32> = HashMap::new();
            let mut program_rows = line_program.clone().rows();

            loop {
                let (header, row) = match program_rows.next_row() {
                    Ok(Some(pair)) => pair,
                    Ok(None) => break,
                    Err(e) => {
                        warn!("stopping line program early on malformed row: {e}");
                        break;
                    }
                };

                let file_index = row.file_index();
                let file_id = *unit_cache.entry(file_index).or_insert_with(|| {
                    let path = resolve_file_path(dwarf, cu, header, file_index);
                    *path_to_id.entry(path.clone()).or_insert_with(|| {
                        let id = next_file_id;
                        next_file_id += 1;
                        files.insert(id, path);
                        id
                    })
                });

                let column = match row.column() {
                    gimli::ColumnType::LeftEdge => 0,
                    gimli::ColumnType::Column(x) => x.get(),
                };

                rows.push(LineRow {
                    address: row.address() as u32,
                    file_id,
                    line: row.line().map(|l| l.get()).unwrap_or(0),
                    column,
                    is_stmt: row.is_stmt(),
                    end_sequence: row.end_sequence(),
                });
            }
        }

        // Sort by address; when addresses tie, a non-end_sequence row sorts
        // before its end_sequence counterpart so exact-address lookups land
        // on the terminator, matching the "ends on end_sequence" edge case.
        rows.sort_by_key(|r| (r.address, r.end_sequence));

        let inverse = build_inverse(&rows, &files);

        Self {
            rows,
            files,
            inverse,
        }
    }

    pub fn files(&self) -> impl Iterator<Item = &Path> {
        self.files.values().map(PathBuf::as_path)
    }

    /// Binary-search for the greatest row with `address <= addr_rel`,
    /// excluding `end_sequence` rows and addresses past the last real row.
    pub fn address_to_line(&self, addr_rel: u32) -> Option<Resolved> {
        let count = self.rows.partition_point(|r| r.address <= addr_rel);
        if count == 0 {
            return None;
        }
        let row = &self.rows[count - 1];
        if row.end_sequence {
            return None;
        }
        Some(Resolved {
            path: self.files.get(&row.file_id)?.clone(),
            line: row.line,
            column: row.column,
        })
    }

    /// Resolve `path:line` to the lowest module-relative address that
    /// implements it.
    pub fn line_to_address(&self, path: &Path, line: u64) -> Option<u32> {
        let key = (normalize_path(path), line);
        self.inverse.get(&key).map(|&(addr, _)| addr)
    }
}

fn build_inverse(rows: &[LineRow], files: &HashMap<u32, PathBuf>) -> HashMap<(String, u64), (u32, bool)> {
    let mut inverse: HashMap<(String, u64), (u32, bool)> = HashMap::new();
    for row in rows {
        if row.end_sequence {
            continue;
        }
        let Some(path) = files.get(&row.file_id) else {
            continue;
        };
        let key = (normalize_path(path), row.line);
        match inverse.get(&key) {
            None => {
                inverse.insert(key, (row.address, row.is_stmt));
            }
            Some(&(addr, is_stmt)) => {
                let better = row.address < addr || (row.address == addr && row.is_stmt && !is_stmt);
                if better {
                    inverse.insert(key, (row.address, row.is_stmt));
                }
            }
        }
    }
    inverse
}

/// Resolve the absolute source path for `file_index` using the line-program
/// header *as it stands right now*, falling back to the
/// compilation unit's `DW_AT_name` when the file table has no such entry yet.
fn resolve_file_path(
    dwarf: &gimli::Dwarf<R>,
    cu: &CompilationUnit,
    header: &gimli::LineProgramHeader<R>,
    file_index: u64,
) -> PathBuf {
    let comp_dir = cu.comp_dir.as_deref();

    if let Some(file) = header.file(file_index) {
        let mut path = PathBuf::new();
        let dir_string = if file.directory_index() != 0 {
            file.directory(header)
                .and_then(|dir_attr| dwarf.attr_string(&cu.unit, dir_attr).ok())
                .and_then(|dir| dir.to_string_lossy().ok().map(|s| s.to_string()))
        } else {
            None
        };
        match dir_string {
            // directory_index 0 is DWARF's convention for "the compilation
            // directory"; an unresolvable directory entry falls back to the
            // same place, so either way the file still gets absolutized.
            Some(dir) => path.push(absolutize(&dir, comp_dir)),
            None => {
                if let Some(dir) = comp_dir {
                    path.push(dir);
                }
            }
        }
        if let Ok(name) = dwarf.attr_string(&cu.unit, file.path_name()) {
            if let Ok(name) = name.to_string_lossy() {
                path.push(name.as_ref());
                return path;
            }
        }
    }

    // Lazy file table had nothing for this index (yet, or ever) — fall back
    // to the compilation unit's own name.
    match cu.name.as_deref() {
        Some(name) => absolutize(name, comp_dir),
        None => PathBuf::from("unknown"),
    }
}

fn absolutize(path: &str, comp_dir: Option<&str>) -> PathBuf {
    let p = Path::new(path);
    if p.is_absolute() {
        return p.to_path_buf();
    }
    match comp_dir {
        Some(dir) => Path::new(dir).join(p),
        None => p.to_path_buf(),
    }
}

/// Lowercase drive letter, forward slashes, for case-insensitive comparison.
pub fn normalize_path(path: &Path) -> String {
    let s = path.to_string_lossy().replace('\\', "/");
    let mut chars = s.chars();
    match (chars.next(), chars.next()) {
        (Some(drive), Some(':')) if drive.is_ascii_alphabetic() => {
            let rest = &s[2..];
            format!("{}:{}", drive.to_ascii_lowercase(), rest)
        }
        _ => s,
    }
    .to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_drive_letter_and_separators() {
        assert_eq!(
            normalize_path(Path::new(r"C:\Project\Src\Main.c")),
            "c:/project/src/main.c"
        );
        assert_eq!(
            normalize_path(Path::new("c:/project/src/main.c")),
            "c:/project/src/main.c"
        );
    }

    #[test]
    fn address_to_line_skips_end_sequence_rows() {
        let mut files = HashMap::new();
        files.insert(0u32, PathBuf::from("c:/proj/main.c"));
        let rows = vec![
            LineRow {
                address: 0x1000,
                file_id: 0,
                line: 4,
                column: 1,
                is_stmt: true,
                end_sequence: false,
            },
            LineRow {
                address: 0x1010,
                file_id: 0,
                line: 0,
                column: 0,
                is_stmt: false,
                end_sequence: true,
            },
        ];
        let inverse = build_inverse(&rows, &files);
        let idx = LineIndex {
            rows,
            files,
            inverse,
        };

        assert_eq!(idx.address_to_line(0x1005).unwrap().line, 4);
        assert!(idx.address_to_line(0x1010).is_none());
        assert!(idx.address_to_line(0x2000).is_none());
    }

    #[test]
    fn line_to_address_round_trips_to_lowest_address() {
        let mut files = HashMap::new();
        files.insert(0u32, PathBuf::from("c:/proj/main.c"));
        let rows = vec![
            LineRow {
                address: 0x2000,
                file_id: 0,
                line: 4,
                column: 1,
                is_stmt: true,
                end_sequence: false,
            },
            LineRow {
                address: 0x1000,
                file_id: 0,
                line: 4,
                column: 1,
                is_stmt: true,
                end_sequence: false,
            },
        ];
        let inverse = build_inverse(&rows, &files);
        let idx = LineIndex {
            rows,
            files,
            inverse,
        };

        let addr = idx
            .line_to_address(Path::new("c:/proj/main.c"), 4)
            .unwrap();
        assert_eq!(addr, 0x1000);
    }
}
