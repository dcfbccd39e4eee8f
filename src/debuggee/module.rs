//! Tracks every loaded image and its line index, and resolves
//! addresses/locations across modules.

use crate::dwarf::line_index::{normalize_path, LineIndex, Resolved};
use crate::dwarf::reader::DwarfReader;
use crate::pe::scanner::locate_debug_container;
use indexmap::IndexMap;
use log::{info, warn};
use std::path::{Path, PathBuf};

pub type ModuleId = u32;

/// A loaded image.
pub struct Module {
    pub id: ModuleId,
    pub path: PathBuf,
    pub base_address: u32,
    pub size: u32,
    pub line_index: Option<LineIndex>,
    pub is_executable: bool,
}

impl Module {
    /// Build a module entry from a module-load event. `size` is best-effort:
    /// `DEBUG_EVENT`'s `LOAD_DLL_DEBUG_EVENT`/`CREATE_PROCESS_DEBUG_EVENT`
    /// payloads carry a base address but not an image size, so this re-reads
    /// the PE header from disk and takes the highest `section.address() +
    /// section.size()`.
    pub fn from_load_event(path: PathBuf, base_address: u32, is_executable: bool) -> Self {
        let size = pe_image_size(&path).unwrap_or(0);
        Self {
            id: 0,
            path,
            base_address,
            size,
            line_index: None,
            is_executable,
        }
    }

    pub fn contains(&self, abs_addr: u32) -> bool {
        abs_addr >= self.base_address && abs_addr < self.base_address.saturating_add(self.size)
    }

    pub fn to_relative(&self, abs_addr: u32) -> u32 {
        abs_addr - self.base_address
    }

    pub fn to_absolute(&self, rel_addr: u32) -> u32 {
        self.base_address + rel_addr
    }

    /// Best-effort: locate, parse and index this module's debug info. A
    /// failure here just leaves the module without an index — `NoDebugInfo`
    /// and `MalformedDwarf` are local recoveries, not session errors.
    pub fn try_build_line_index(&mut self) {
        match locate_debug_container(&self.path) {
            Ok(container) => match DwarfReader::parse(&container.data) {
                Ok(reader) => {
                    let units = reader.units();
                    let index = LineIndex::build(reader.dwarf(), &units);
                    info!(
                        "module {} ({}): indexed {} files",
                        self.id,
                        self.path.display(),
                        index.files().count()
                    );
                    self.line_index = Some(index);
                }
                Err(e) => {
                    warn!("module {} ({}): {e}", self.id, self.path.display());
                }
            },
            Err(e) => {
                warn!("module {} ({}): {e}", self.id, self.path.display());
            }
        }
    }
}

/// Tracks every loaded module, in deterministic (executable-first, then load
/// order) iteration order.
#[derive(Default)]
pub struct ModuleRegistry {
    modules: IndexMap<ModuleId, Module>,
    next_id: ModuleId,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, mut module: Module) -> ModuleId {
        let id = self.next_id;
        self.next_id += 1;
        module.id = id;
        self.modules.insert(id, module);
        id
    }

    pub fn remove(&mut self, id: ModuleId) -> Option<Module> {
        self.modules.shift_remove(&id)
    }

    pub fn get(&self, id: ModuleId) -> Option<&Module> {
        self.modules.get(&id)
    }

    pub fn get_mut(&mut self, id: ModuleId) -> Option<&mut Module> {
        self.modules.get_mut(&id)
    }

    pub fn lookup_by_address(&self, abs_addr: u32) -> Option<&Module> {
        self.modules.values().find(|m| m.contains(abs_addr))
    }

    /// Executable first, then DLLs in load order — the deterministic scan
    /// order every resolver below relies on.
    pub fn iterate(&self) -> impl Iterator<Item = &Module> {
        let exe = self.modules.values().filter(|m| m.is_executable);
        let dlls = self.modules.values().filter(|m| !m.is_executable);
        exe.chain(dlls)
    }

    /// Resolve a source location to an absolute address, trying each module
    /// in deterministic order. First hit wins.
    pub fn resolve_line_to_address(&self, path: &Path, line: u64) -> Option<(u32, ModuleId)> {
        for module in self.iterate() {
            if let Some(index) = &module.line_index {
                if let Some(rel) = index.line_to_address(path, line) {
                    return Some((module.to_absolute(rel), module.id));
                }
            }
        }
        None
    }

    pub fn resolve_address_to_line(&self, abs_addr: u32) -> Option<Resolved> {
        let module = self.lookup_by_address(abs_addr)?;
        let index = module.line_index.as_ref()?;
        index.address_to_line(module.to_relative(abs_addr))
    }

    /// Any path, across any loaded module, normalizing the same way the
    /// line index does — used by `get_source` to accept a bare filename.
    /// Falls back to a basename match if nothing normalizes exactly equal,
    /// since a caller may reasonably hand over `simple.c` rather than the
    /// full path the compiler recorded.
    pub fn find_source_path(&self, hint: &Path) -> Option<PathBuf> {
        let normalized_hint = normalize_path(hint);
        for module in self.iterate() {
            if let Some(index) = &module.line_index {
                if let Some(p) = index
                    .files()
                    .find(|p| normalize_path(p) == normalized_hint)
                {
                    return Some(p.to_path_buf());
                }
            }
        }

        let hint_name = hint.file_name()?;
        for module in self.iterate() {
            if let Some(index) = &module.line_index {
                if let Some(p) = index.files().find(|p| p.file_name() == Some(hint_name)) {
                    return Some(p.to_path_buf());
                }
            }
        }
        None
    }
}

fn pe_image_size(path: &Path) -> Option<u32> {
    use object::{Object, ObjectSection};
    let raw = std::fs::read(path).ok()?;
    let file = object::File::parse(&*raw).ok()?;
    file.sections()
        .map(|s| s.address().saturating_add(s.size()))
        .max()
        .map(|v| v as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn module(id: ModuleId, base: u32, size: u32, exe: bool) -> Module {
        Module {
            id,
            path: PathBuf::from(format!("mod{id}.dll")),
            base_address: base,
            size,
            line_index: None,
            is_executable: exe,
        }
    }

    #[test]
    fn iterate_puts_executable_first() {
        let mut reg = ModuleRegistry::new();
        reg.add(module(0, 0x1000, 0x100, false));
        reg.add(module(0, 0x2000, 0x100, true));
        reg.add(module(0, 0x3000, 0x100, false));

        let order: Vec<bool> = reg.iterate().map(|m| m.is_executable).collect();
        assert_eq!(order, vec![true, false, false]);
    }

    #[test]
    fn lookup_by_address_respects_bounds() {
        let mut reg = ModuleRegistry::new();
        let id = reg.add(module(0, 0x10000, 0x1000, true));
        assert!(reg.lookup_by_address(0x10500).is_some());
        assert!(reg.lookup_by_address(0x20500).is_none());
        assert_eq!(reg.lookup_by_address(0x10500).unwrap().id, id);
    }
}
