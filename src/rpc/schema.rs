//! JSON-RPC 2.0 envelope and the per-tool request/response shapes from §6.
//!
//! This is ambient transport plumbing the core spec explicitly treats as an
//! external collaborator — kept deliberately thin, with `serde_json::Value`
//! doing the heavy lifting rather than a deep type hierarchy.

use crate::debuggee::breakpoint::{BreakpointState, Location};
use crate::debuggee::process::Registers;
use crate::error::Error;
use crate::session::types::{BreakpointSummary, ModuleSummary, StateSnapshot, Status, StopReason};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct JsonRpcRequest {
    #[allow(dead_code)]
    pub jsonrpc: Option<String>,
    #[serde(default)]
    pub id: Value,
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
}

#[derive(Debug, Serialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: &'static str,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

#[derive(Debug, Serialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcResponse {
    pub fn ok(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn err(id: Value, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: None,
            error: Some(error),
        }
    }
}

/// Map a core `Error` onto a JSON-RPC error, carrying the kind tag in `data`
/// rather than ever surfacing a raw OS error code, per §7.
impl From<&Error> for JsonRpcError {
    fn from(e: &Error) -> Self {
        let code = match e {
            Error::UnknownMethod(_) => -32601,
            Error::InvalidParams(_) | Error::InvalidSession(_) | Error::InvalidBreakpointId(_) => {
                -32602
            }
            _ => -32000,
        };
        Self {
            code,
            message: e.to_string(),
            data: Some(serde_json::json!({ "kind": e.kind_tag() })),
        }
    }
}

// --------------------------------- tool params ---------------------------------

#[derive(Debug, Deserialize)]
pub struct CreateSessionParams {
    pub exe_path: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub source_dirs: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct SessionIdParams {
    pub id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct ContinueParams {
    pub id: Uuid,
    /// Extension beyond §6's bare `continue(id)`: lets a caller pass an
    /// exception through to the debuggee instead of marking it handled
    /// (needed for S8's "exception, continue unhandled" scenario).
    #[serde(default)]
    pub disposition: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SetBreakpointParams {
    pub id: Uuid,
    pub location: String,
}

#[derive(Debug, Deserialize)]
pub struct RemoveBreakpointParams {
    pub id: Uuid,
    pub bp_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct GetSourceParams {
    pub id: Uuid,
    pub path: String,
    pub line: u64,
    #[serde(default)]
    pub context: Option<u64>,
}

// --------------------------------- tool results --------------------------------

#[derive(Debug, Serialize)]
pub struct CreateSessionResult {
    pub session_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct StateResult {
    pub state: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<u32>,
}

impl From<StateSnapshot> for StateResult {
    fn from(s: StateSnapshot) -> Self {
        Self {
            state: status_name(s.status),
            stop_reason: s.stop_reason.map(stop_reason_name),
            stop_address: s.stop_address.map(|a| format!("{a:#010x}")),
            thread_id: s.stop_thread,
        }
    }
}

fn status_name(s: Status) -> &'static str {
    match s {
        Status::Created => "created",
        Status::Running => "running",
        Status::Stopped => "stopped",
        Status::Exited => "exited",
        Status::Crashed => "crashed",
    }
}

fn stop_reason_name(r: StopReason) -> &'static str {
    match r {
        StopReason::Entry => "entry",
        StopReason::Breakpoint => "breakpoint",
        StopReason::SingleStep => "single_step",
        StopReason::Exception => "exception",
        StopReason::ModuleLoad => "module_load",
        StopReason::ModuleUnload => "module_unload",
        StopReason::Exited => "exited",
    }
}

#[derive(Debug, Serialize)]
pub struct BreakpointView {
    pub id: Uuid,
    pub location: String,
    pub state: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    pub hit_count: u64,
    pub enabled: bool,
}

impl From<BreakpointSummary> for BreakpointView {
    fn from(bp: BreakpointSummary) -> Self {
        let location = match bp.location {
            Location::Address(a) => format!("{a:#010x}"),
            Location::SourceLine { path, line } => format!("{}:{}", path.display(), line),
        };
        Self {
            id: bp.id,
            location,
            state: match bp.state {
                BreakpointState::Pending => "pending",
                BreakpointState::Active => "active",
                BreakpointState::Failed => "failed",
            },
            address: bp.address.map(|a| format!("{a:#010x}")),
            hit_count: bp.hit_count,
            enabled: bp.enabled,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct BreakpointsResult {
    pub breakpoints: Vec<BreakpointView>,
}

#[derive(Debug, Serialize)]
pub struct RegistersResult {
    pub eax: String,
    pub ebx: String,
    pub ecx: String,
    pub edx: String,
    pub esi: String,
    pub edi: String,
    pub ebp: String,
    pub esp: String,
    pub eip: String,
    pub eflags: String,
}

impl From<Registers> for RegistersResult {
    fn from(r: Registers) -> Self {
        Self {
            eax: format!("{:#010x}", r.eax),
            ebx: format!("{:#010x}", r.ebx),
            ecx: format!("{:#010x}", r.ecx),
            edx: format!("{:#010x}", r.edx),
            esi: format!("{:#010x}", r.esi),
            edi: format!("{:#010x}", r.edi),
            ebp: format!("{:#010x}", r.ebp),
            esp: format!("{:#010x}", r.esp),
            eip: format!("{:#010x}", r.eip),
            eflags: format!("{:#010x}", r.eflags),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ModuleView {
    pub id: u32,
    pub path: String,
    pub base_address: String,
    pub size: u32,
    pub is_executable: bool,
    pub has_line_index: bool,
    pub file_count: usize,
}

impl From<ModuleSummary> for ModuleView {
    fn from(m: ModuleSummary) -> Self {
        Self {
            id: m.id,
            path: m.path.display().to_string(),
            base_address: format!("{:#010x}", m.base_address),
            size: m.size,
            is_executable: m.is_executable,
            has_line_index: m.has_line_index,
            file_count: m.file_count,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ModulesResult {
    pub modules: Vec<ModuleView>,
}

#[derive(Debug, Serialize)]
pub struct SourceResult {
    pub path: String,
    pub first_line: u64,
    pub lines: Vec<String>,
}
