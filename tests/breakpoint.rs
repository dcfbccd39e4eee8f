//! Integration coverage for the plant/hit/rearm cycle across several passes
//! through the same breakpoint, driven directly against
//! `BreakpointManager` + `ModuleRegistry` + `FakeProcess` the way the
//! debug-event loop does it internally (restore byte, decrement EIP,
//! single-step, replant) without needing a live debuggee.

use watcom_dbg_server::debuggee::module::{Module, ModuleRegistry};
use watcom_dbg_server::debuggee::process::fake::FakeProcess;
use watcom_dbg_server::debuggee::process::{ProcessController, Registers};
use watcom_dbg_server::debuggee::{BreakpointManager, BreakpointState};

fn exe_module(base: u32, size: u32) -> Module {
    Module {
        id: 0,
        path: "app.exe".into(),
        base_address: base,
        size,
        line_index: None,
        is_executable: true,
    }
}

/// Mirrors `EventLoop::restore_and_rewind` + the single-step re-arm dance,
/// without the async/thread machinery around it.
fn hit_and_rearm(mgr: &mut BreakpointManager, proc: &mut FakeProcess, id: uuid::Uuid, addr: u32, thread: u32) {
    let original = mgr.record_hit(id).expect("breakpoint was planted");
    proc.write_byte(addr, original).unwrap();
    let regs = proc.get_registers(thread).unwrap();
    proc.set_registers(thread, Registers { eip: regs.eip.wrapping_sub(1), ..regs })
        .unwrap();

    // The re-arm single-step: the fake has no real CPU to execute the
    // restored instruction, so this just stands in for "one instruction
    // later" before replanting.
    mgr.rearm(id, proc);
}

#[test]
fn breakpoint_survives_three_hit_and_resume_cycles() {
    let mut modules = ModuleRegistry::new();
    modules.add(exe_module(0x10000, 0x4000));
    let mut proc = FakeProcess::new();
    proc.memory.insert(0x10100, 0x55); // the "real" instruction byte
    proc.registers.insert(1, Registers { eip: 0x10101, ..Default::default() });

    let mut mgr = BreakpointManager::new();
    let id = mgr.set_by_address(0x10100, &modules, &mut proc);
    assert_eq!(mgr.get(id).unwrap().state, BreakpointState::Active);
    assert_eq!(proc.memory[&0x10100], 0xCC);

    for iteration in 0..3 {
        assert_eq!(proc.memory[&0x10100], 0xCC, "planted before iteration {iteration}");
        hit_and_rearm(&mut mgr, &mut proc, id, 0x10100, 1);
        assert_eq!(proc.get_registers(1).unwrap().eip, 0x10100, "eip rewound after hit {iteration}");
        assert_eq!(proc.memory[&0x10100], 0xCC, "replanted after iteration {iteration}");
        // Advance the fake past the restored instruction for the next hit,
        // same as a real debuggee would after actually executing it.
        proc.registers.insert(1, Registers { eip: 0x10101, ..proc.registers[&1] });
    }

    assert_eq!(mgr.get(id).unwrap().hit_count, 3);
}

#[test]
fn disabling_between_hit_and_rearm_leaves_byte_restored() {
    let mut modules = ModuleRegistry::new();
    modules.add(exe_module(0x10000, 0x4000));
    let mut proc = FakeProcess::new();
    proc.memory.insert(0x10100, 0x55);
    proc.registers.insert(1, Registers { eip: 0x10101, ..Default::default() });

    let mut mgr = BreakpointManager::new();
    let id = mgr.set_by_address(0x10100, &modules, &mut proc);

    let original = mgr.record_hit(id).unwrap();
    proc.write_byte(0x10100, original).unwrap();
    assert_eq!(proc.memory[&0x10100], 0x55);

    // Simulate the caller removing the breakpoint mid-stop, before the
    // re-arm single-step completes.
    mgr.remove(id, &mut proc);
    mgr.rearm(id, &mut proc); // no-op: id no longer exists
    assert_eq!(proc.memory[&0x10100], 0x55, "never replanted once removed");
}

#[test]
fn module_unload_then_reload_replants_pending_breakpoint() {
    let mut modules = ModuleRegistry::new();
    let dll_id = modules.add(Module {
        id: 0,
        path: "plugin.dll".into(),
        base_address: 0x20000,
        size: 0x1000,
        line_index: None,
        is_executable: false,
    });
    let mut proc = FakeProcess::new();
    proc.memory.insert(0x20050, 0x90);

    let mut mgr = BreakpointManager::new();
    let id = mgr.set_by_address(0x20050, &modules, &mut proc);
    assert_eq!(mgr.get(id).unwrap().state, BreakpointState::Active);

    modules.remove(dll_id);
    mgr.on_module_unloaded(dll_id);
    assert_eq!(mgr.get(id).unwrap().state, BreakpointState::Pending);
    assert_eq!(proc.memory[&0x20050], 0x90, "unload does not touch memory directly");

    let reloaded_id = modules.add(Module {
        id: 0,
        path: "plugin.dll".into(),
        base_address: 0x20000,
        size: 0x1000,
        line_index: None,
        is_executable: false,
    });
    mgr.on_module_loaded(reloaded_id, &modules, &mut proc);
    assert_eq!(mgr.get(id).unwrap().state, BreakpointState::Active);
    assert_eq!(proc.memory[&0x20050], 0xCC);
}
