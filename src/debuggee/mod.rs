//! Components D, E, F: module registry, breakpoint manager, process controller.

pub mod breakpoint;
pub mod module;
pub mod process;

pub use breakpoint::{Breakpoint, BreakpointId, BreakpointManager, BreakpointState, Location};
pub use module::{Module, ModuleId, ModuleRegistry};
pub use process::{ContinueDisposition, ProcessController, RawDebugEvent, Registers};
