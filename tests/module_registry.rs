//! `ModuleRegistry` behavior that does not require a real DWARF-indexed
//! module: deterministic iteration order, address-bounds lookup, and the
//! resolvers degrading to `None` rather than panicking when nothing has a
//! line index yet.

use watcom_dbg_server::debuggee::module::{Module, ModuleRegistry};
use std::path::Path;

fn module(path: &str, base: u32, size: u32, exe: bool) -> Module {
    Module {
        id: 0,
        path: path.into(),
        base_address: base,
        size,
        line_index: None,
        is_executable: exe,
    }
}

#[test]
fn executables_iterate_before_dlls_regardless_of_load_order() {
    let mut reg = ModuleRegistry::new();
    reg.add(module("first.dll", 0x1000, 0x100, false));
    reg.add(module("second.dll", 0x2000, 0x100, false));
    reg.add(module("app.exe", 0x3000, 0x100, true));

    let order: Vec<&str> = reg
        .iterate()
        .map(|m| m.path.file_name().unwrap().to_str().unwrap())
        .collect();
    assert_eq!(order, vec!["app.exe", "first.dll", "second.dll"]);
}

#[test]
fn lookup_by_address_is_half_open() {
    let mut reg = ModuleRegistry::new();
    reg.add(module("app.exe", 0x10000, 0x1000, true));

    assert!(reg.lookup_by_address(0x10000).is_some()); // base is in range
    assert!(reg.lookup_by_address(0x10FFF).is_some()); // last byte in range
    assert!(reg.lookup_by_address(0x11000).is_none()); // one past the end
    assert!(reg.lookup_by_address(0xFFFF).is_none());
}

#[test]
fn resolvers_return_none_without_a_line_index() {
    let mut reg = ModuleRegistry::new();
    reg.add(module("app.exe", 0x10000, 0x1000, true));

    assert!(reg.resolve_address_to_line(0x10050).is_none());
    assert!(reg.resolve_line_to_address(Path::new("main.c"), 10).is_none());
    assert!(reg.find_source_path(Path::new("main.c")).is_none());
}

#[test]
fn remove_drops_module_and_lookups_fail_after() {
    let mut reg = ModuleRegistry::new();
    let id = reg.add(module("plugin.dll", 0x20000, 0x500, false));
    assert!(reg.lookup_by_address(0x20010).is_some());

    let removed = reg.remove(id).expect("module was present");
    assert_eq!(removed.base_address, 0x20000);
    assert!(reg.lookup_by_address(0x20010).is_none());
    assert!(reg.get(id).is_none());
}

#[test]
fn assigned_ids_are_unique_and_increasing() {
    let mut reg = ModuleRegistry::new();
    let a = reg.add(module("a.dll", 0x1000, 0x100, false));
    let b = reg.add(module("b.dll", 0x2000, 0x100, false));
    assert_ne!(a, b);
    assert!(b > a);
}
