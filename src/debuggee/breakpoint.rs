//! Plant/remove software breakpoints and resolve pending ones as modules load.
//!
//! The breakpoint manager references modules by id only (never owns or
//! borrows the registry across calls), so every operation here that needs
//! module data takes `&ModuleRegistry` as an explicit argument from the
//! caller (the debug-event loop, which owns both).

use crate::debuggee::module::{ModuleId, ModuleRegistry};
use crate::debuggee::process::ProcessController;
use crate::error::{Error, Result};
use indexmap::IndexMap;
use std::path::PathBuf;
use uuid::Uuid;

pub type BreakpointId = Uuid;

#[derive(Debug, Clone)]
pub enum Location {
    Address(u32),
    SourceLine { path: PathBuf, line: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakpointState {
    Pending,
    Active,
    Failed,
}

#[derive(Debug, Clone)]
pub struct Breakpoint {
    pub id: BreakpointId,
    pub location: Location,
    pub state: BreakpointState,
    pub module: Option<ModuleId>,
    pub planted_address: Option<u32>,
    pub original_byte: Option<u8>,
    pub hit_count: u64,
    pub enabled: bool,
}

const INT3: u8 = 0xCC;

/// Owns the breakpoint table for one session. Holds no reference to the
/// module registry; every call that needs one is passed it explicitly.
#[derive(Default)]
pub struct BreakpointManager {
    breakpoints: IndexMap<BreakpointId, Breakpoint>,
}

impl BreakpointManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_by_address(
        &mut self,
        abs_addr: u32,
        modules: &ModuleRegistry,
        proc: &mut dyn ProcessController,
    ) -> BreakpointId {
        let id = Uuid::new_v4();
        let mut bp = Breakpoint {
            id,
            location: Location::Address(abs_addr),
            state: BreakpointState::Pending,
            module: None,
            planted_address: None,
            original_byte: None,
            hit_count: 0,
            enabled: true,
        };

        if let Some(module) = modules.lookup_by_address(abs_addr) {
            bp.module = Some(module.id);
            plant(&mut bp, abs_addr, proc);
        } else {
            bp.state = BreakpointState::Failed;
        }

        self.breakpoints.insert(id, bp);
        id
    }

    pub fn set_by_line(
        &mut self,
        path: PathBuf,
        line: u64,
        modules: &ModuleRegistry,
        proc: &mut dyn ProcessController,
    ) -> BreakpointId {
        let id = Uuid::new_v4();
        let mut bp = Breakpoint {
            id,
            location: Location::SourceLine {
                path: path.clone(),
                line,
            },
            state: BreakpointState::Pending,
            module: None,
            planted_address: None,
            original_byte: None,
            hit_count: 0,
            enabled: true,
        };

        if let Some((abs_addr, module_id)) = modules.resolve_line_to_address(&path, line) {
            bp.module = Some(module_id);
            plant(&mut bp, abs_addr, proc);
        }
        // Else: stays `Pending`; `(path, line)` is already remembered in `bp.location`.

        self.breakpoints.insert(id, bp);
        id
    }

    /// Idempotent: removing an already-removed id is not an error.
    pub fn remove(&mut self, id: BreakpointId, proc: &mut dyn ProcessController) {
        let Some(bp) = self.breakpoints.shift_remove(&id) else {
            return;
        };
        if let (BreakpointState::Active, Some(addr), Some(byte)) =
            (bp.state, bp.planted_address, bp.original_byte)
        {
            let _ = proc.write_byte(addr, byte);
        }
    }

    pub fn list(&self) -> Vec<Breakpoint> {
        self.breakpoints.values().cloned().collect()
    }

    pub fn get(&self, id: BreakpointId) -> Result<&Breakpoint> {
        self.breakpoints
            .get(&id)
            .ok_or(Error::InvalidBreakpointId(id))
    }

    /// Try to resolve every pending breakpoint against a newly loaded module.
    pub fn on_module_loaded(
        &mut self,
        module_id: ModuleId,
        modules: &ModuleRegistry,
        proc: &mut dyn ProcessController,
    ) {
        for bp in self.breakpoints.values_mut() {
            if bp.state != BreakpointState::Pending {
                continue;
            }
            let resolved = match &bp.location {
                Location::Address(addr) => modules
                    .get(module_id)
                    .filter(|m| m.contains(*addr))
                    .map(|_| *addr),
                Location::SourceLine { path, line } => modules
                    .get(module_id)
                    .and_then(|m| m.line_index.as_ref().map(|idx| (m, idx)))
                    .and_then(|(m, idx)| idx.line_to_address(path, *line).map(|rel| m.to_absolute(rel))),
            };
            if let Some(addr) = resolved {
                bp.module = Some(module_id);
                plant(bp, addr, proc);
            }
        }
    }

    /// All active breakpoints owned by `module_id` revert to pending; their
    /// planted state is meaningless once the address range is gone.
    pub fn on_module_unloaded(&mut self, module_id: ModuleId) {
        for bp in self.breakpoints.values_mut() {
            if bp.module == Some(module_id) && bp.state == BreakpointState::Active {
                bp.state = BreakpointState::Pending;
                bp.module = None;
                bp.planted_address = None;
                bp.original_byte = None;
            }
        }
    }

    /// Look up a breakpoint by its planted address (used by the debug-event
    /// loop on a breakpoint exception). Returns `None` for a spurious/external
    /// trap not owned by this manager.
    pub fn find_by_planted_address(&self, addr: u32) -> Option<BreakpointId> {
        self.breakpoints
            .values()
            .find(|bp| bp.state == BreakpointState::Active && bp.planted_address == Some(addr))
            .map(|bp| bp.id)
    }

    /// Restore the original byte and bump the hit count. Returns the saved
    /// byte so the caller can decide when to re-plant (after the mandatory
    /// single-step re-arm).
    pub fn record_hit(&mut self, id: BreakpointId) -> Option<u8> {
        let bp = self.breakpoints.get_mut(&id)?;
        bp.hit_count += 1;
        bp.original_byte
    }

    /// Re-arm after the re-arm single-step, but only if the breakpoint is
    /// still enabled — it may have been disabled or removed between the hit
    /// and the step, in which case the original byte stays in place.
    pub fn rearm(&mut self, id: BreakpointId, proc: &mut dyn ProcessController) {
        let Some(bp) = self.breakpoints.get_mut(&id) else {
            return;
        };
        if !bp.enabled {
            return;
        }
        if let Some(addr) = bp.planted_address {
            if let Ok(byte) = proc.read_byte(addr) {
                bp.original_byte = Some(byte);
                let _ = proc.write_byte(addr, INT3);
            }
        }
    }
}

fn plant(bp: &mut Breakpoint, abs_addr: u32, proc: &mut dyn ProcessController) {
    match proc.read_byte(abs_addr) {
        Ok(original) => match proc.write_byte(abs_addr, INT3) {
            Ok(()) => {
                bp.planted_address = Some(abs_addr);
                bp.original_byte = Some(original);
                bp.state = BreakpointState::Active;
            }
            Err(_) => bp.state = BreakpointState::Failed,
        },
        Err(_) => bp.state = BreakpointState::Failed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::debuggee::process::fake::FakeProcess;

    #[test]
    fn set_by_address_in_known_module_becomes_active() {
        let mut modules = ModuleRegistry::new();
        modules.add(crate::debuggee::module::Module {
            id: 0,
            path: "a.exe".into(),
            base_address: 0x1000,
            size: 0x1000,
            line_index: None,
            is_executable: true,
        });
        let mut proc = FakeProcess::new();
        let mut mgr = BreakpointManager::new();
        let id = mgr.set_by_address(0x1050, &modules, &mut proc);
        assert_eq!(mgr.get(id).unwrap().state, BreakpointState::Active);
        assert_eq!(proc.memory[&0x1050], INT3);
    }

    #[test]
    fn set_by_address_outside_any_module_fails() {
        let modules = ModuleRegistry::new();
        let mut proc = FakeProcess::new();
        let mut mgr = BreakpointManager::new();
        let id = mgr.set_by_address(0x9999, &modules, &mut proc);
        assert_eq!(mgr.get(id).unwrap().state, BreakpointState::Failed);
    }

    #[test]
    fn remove_restores_original_byte() {
        let mut modules = ModuleRegistry::new();
        modules.add(crate::debuggee::module::Module {
            id: 0,
            path: "a.exe".into(),
            base_address: 0x1000,
            size: 0x1000,
            line_index: None,
            is_executable: true,
        });
        let mut proc = FakeProcess::new();
        proc.memory.insert(0x1050, 0x55);
        let mut mgr = BreakpointManager::new();
        let id = mgr.set_by_address(0x1050, &modules, &mut proc);
        mgr.remove(id, &mut proc);
        assert_eq!(proc.memory[&0x1050], 0x55);
    }

    #[test]
    fn remove_is_idempotent() {
        let mut proc = FakeProcess::new();
        let mut mgr = BreakpointManager::new();
        let id = Uuid::new_v4();
        mgr.remove(id, &mut proc); // no panic
        mgr.remove(id, &mut proc);
    }

    #[test]
    fn module_unload_moves_active_to_pending() {
        let mut modules = ModuleRegistry::new();
        let mid = modules.add(crate::debuggee::module::Module {
            id: 0,
            path: "a.dll".into(),
            base_address: 0x4000,
            size: 0x1000,
            line_index: None,
            is_executable: false,
        });
        let mut proc = FakeProcess::new();
        let mut mgr = BreakpointManager::new();
        let id = mgr.set_by_address(0x4010, &modules, &mut proc);
        assert_eq!(mgr.get(id).unwrap().state, BreakpointState::Active);

        mgr.on_module_unloaded(mid);
        assert_eq!(mgr.get(id).unwrap().state, BreakpointState::Pending);
    }
}
