//! Shared vocabulary between the debug-event loop worker (component G) and
//! the session conductor (component H): commands the worker accepts, the
//! state it publishes, and the snapshots returned to callers.
//!
//! Kept as a closed set of tagged enums/structs rather than anything
//! dynamically typed, per §9's "no runtime attribute bags" design note.

use crate::debuggee::breakpoint::{BreakpointId, BreakpointState, Location};
use crate::debuggee::module::ModuleId;
use crate::debuggee::process::{ContinueDisposition, Registers};
use crate::error::Result;
use std::path::PathBuf;
use std::time::Duration;
use uuid::Uuid;

pub type SessionId = Uuid;

pub const DEFAULT_RUN_TIMEOUT: Duration = Duration::from_secs(5);

/// §3 `DebuggerState.status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Created,
    Running,
    Stopped,
    Exited,
    Crashed,
}

/// §3 `DebuggerState.last stop reason`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Entry,
    Breakpoint,
    SingleStep,
    Exception,
    ModuleLoad,
    ModuleUnload,
    Exited,
}

/// A point-in-time copy of `DebuggerState`, cheap to clone and safe to hand
/// across the command-channel/watch-channel boundary to the async side.
#[derive(Debug, Clone)]
pub struct StateSnapshot {
    pub status: Status,
    pub stop_reason: Option<StopReason>,
    pub stop_thread: Option<u32>,
    pub stop_address: Option<u32>,
}

impl Default for StateSnapshot {
    fn default() -> Self {
        Self {
            status: Status::Created,
            stop_reason: None,
            stop_thread: None,
            stop_address: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BreakpointSummary {
    pub id: BreakpointId,
    pub location: Location,
    pub state: BreakpointState,
    pub module: Option<ModuleId>,
    pub address: Option<u32>,
    pub hit_count: u64,
    pub enabled: bool,
}

#[derive(Debug, Clone)]
pub struct ModuleSummary {
    pub id: ModuleId,
    pub path: PathBuf,
    pub base_address: u32,
    pub size: u32,
    pub is_executable: bool,
    pub has_line_index: bool,
    pub file_count: usize,
}

/// Commands the worker accepts over the command channel. `Run` has no
/// variant here: the worker pumps OS debug events towards the initial
/// breakpoint autonomously from the moment the debuggee is created, so
/// `SessionConductor::run` is purely the async side waiting on the state
///-publication channel for that to happen (see `conductor.rs`).
pub enum Command {
    Continue { disposition: ContinueDisposition },
    Step,
    SetBreakpointByAddress(u32),
    SetBreakpointByLine(PathBuf, u64),
    RemoveBreakpoint(BreakpointId),
    ListBreakpoints,
    GetRegisters,
    ListModules,
    /// Resolve a bare or relative source-file hint against every loaded
    /// module's line index (used by `get_source`); a module registry read,
    /// so it goes through the worker like every other table lookup (§5).
    ResolveSourcePath(PathBuf),
    Close,
}

pub enum Reply {
    State(StateSnapshot),
    BreakpointId(BreakpointId),
    Breakpoints(Vec<BreakpointSummary>),
    Registers(Registers),
    Modules(Vec<ModuleSummary>),
    Path(Option<PathBuf>),
    Unit,
}

pub(crate) type ReplySender = tokio::sync::oneshot::Sender<Result<Reply>>;
pub(crate) type CommandEnvelope = (Command, ReplySender);
