//! Dispatch from a JSON-RPC method name to the session conductor (§6).
//!
//! Kept thin on purpose: this crate's hard engineering is the four core
//! subsystems (A-G) the conductor sits on top of; everything here is just
//! translating JSON params into conductor calls and results back into JSON.

use crate::config::ServerConfig;
use crate::debuggee::breakpoint::Location;
use crate::debuggee::process::ContinueDisposition;
use crate::error::{Error, Result};
use crate::rpc::schema::*;
use crate::session::SessionConductor;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use uuid::Uuid;

/// Everything a tool dispatch needs: the conductor plus the server's
/// ambient config (default source-search directories, carried over per
/// session so `filename:line` and `get_source` can accept bare names).
pub struct ToolState {
    pub conductor: SessionConductor,
    pub config: ServerConfig,
    session_source_dirs: Mutex<HashMap<Uuid, Vec<PathBuf>>>,
}

impl ToolState {
    pub fn new(conductor: SessionConductor, config: ServerConfig) -> Self {
        Self {
            conductor,
            config,
            session_source_dirs: Mutex::new(HashMap::new()),
        }
    }
}

/// Dispatch one JSON-RPC method call, returning its `result` value.
pub async fn dispatch(state: &ToolState, method: &str, params: Option<serde_json::Value>) -> Result<serde_json::Value> {
    let params = params.unwrap_or(serde_json::Value::Null);

    match method {
        "create_session" => {
            let p: CreateSessionParams = parse_params(params)?;
            let session_id = state
                .conductor
                .create(PathBuf::from(&p.exe_path), p.args)
                .await?;
            let mut dirs: Vec<PathBuf> = state.config.source_dirs.clone();
            dirs.extend(p.source_dirs.into_iter().map(PathBuf::from));
            state
                .session_source_dirs
                .lock()
                .await
                .insert(session_id, dirs);
            Ok(serde_json::to_value(CreateSessionResult { session_id })?)
        }
        "close_session" => {
            let p: SessionIdParams = parse_params(params)?;
            state.conductor.close(p.id).await?;
            state.session_source_dirs.lock().await.remove(&p.id);
            Ok(serde_json::json!({}))
        }
        "run" => {
            let p: SessionIdParams = parse_params(params)?;
            let snapshot = state.conductor.run(p.id).await?;
            Ok(serde_json::to_value(StateResult::from(snapshot))?)
        }
        "continue" => {
            let p: ContinueParams = parse_params(params)?;
            let disposition = match p.disposition.as_deref() {
                Some("unhandled") => ContinueDisposition::Unhandled,
                _ => ContinueDisposition::Handled,
            };
            let snapshot = state
                .conductor
                .continue_with_disposition(p.id, disposition)
                .await?;
            Ok(serde_json::to_value(StateResult::from(snapshot))?)
        }
        "step" => {
            let p: SessionIdParams = parse_params(params)?;
            let snapshot = state.conductor.step(p.id).await?;
            Ok(serde_json::to_value(StateResult::from(snapshot))?)
        }
        "set_breakpoint" => {
            let p: SetBreakpointParams = parse_params(params)?;
            let bp_id = set_breakpoint(state, p.id, &p.location).await?;
            Ok(serde_json::json!({ "id": bp_id, "state": breakpoint_state_name(state, p.id, bp_id).await? }))
        }
        "list_breakpoints" => {
            let p: SessionIdParams = parse_params(params)?;
            let breakpoints = state.conductor.list_breakpoints(p.id).await?;
            Ok(serde_json::to_value(BreakpointsResult {
                breakpoints: breakpoints.into_iter().map(BreakpointView::from).collect(),
            })?)
        }
        "remove_breakpoint" => {
            let p: RemoveBreakpointParams = parse_params(params)?;
            state.conductor.remove_breakpoint(p.id, p.bp_id).await?;
            Ok(serde_json::json!({}))
        }
        "get_registers" => {
            let p: SessionIdParams = parse_params(params)?;
            let regs = state.conductor.get_registers(p.id).await?;
            Ok(serde_json::to_value(RegistersResult::from(regs))?)
        }
        "list_modules" => {
            let p: SessionIdParams = parse_params(params)?;
            let modules = state.conductor.list_modules(p.id).await?;
            Ok(serde_json::to_value(ModulesResult {
                modules: modules.into_iter().map(ModuleView::from).collect(),
            })?)
        }
        "get_source" => {
            let p: GetSourceParams = parse_params(params)?;
            let result = get_source(state, p).await?;
            Ok(serde_json::to_value(result)?)
        }
        other => Err(Error::UnknownMethod(other.to_string())),
    }
}

fn parse_params<T: serde::de::DeserializeOwned>(params: serde_json::Value) -> Result<T> {
    serde_json::from_value(params).map_err(|e| Error::InvalidParams(e.to_string()))
}

async fn set_breakpoint(state: &ToolState, session: Uuid, location: &str) -> Result<Uuid> {
    match parse_location(location)? {
        Location::Address(addr) => state.conductor.set_breakpoint_by_address(session, addr).await,
        Location::SourceLine { path, line } => {
            let resolved = state
                .conductor
                .resolve_source_path(session, path.clone())
                .await?
                .unwrap_or(path);
            state
                .conductor
                .set_breakpoint_by_line(session, resolved, line)
                .await
        }
    }
}

async fn breakpoint_state_name(state: &ToolState, session: Uuid, bp_id: Uuid) -> Result<&'static str> {
    let breakpoints = state.conductor.list_breakpoints(session).await?;
    let bp = breakpoints
        .into_iter()
        .find(|bp| bp.id == bp_id)
        .ok_or(Error::InvalidBreakpointId(bp_id))?;
    Ok(match bp.state {
        crate::debuggee::breakpoint::BreakpointState::Pending => "pending",
        crate::debuggee::breakpoint::BreakpointState::Active => "active",
        crate::debuggee::breakpoint::BreakpointState::Failed => "failed",
    })
}

/// Parse §6's breakpoint location grammar: `0x...` absolute address, or
/// `filename:line`. The rightmost `:` is the separator, so a Windows drive
/// letter (`C:\...`) in the path doesn't get mistaken for it.
fn parse_location(raw: &str) -> Result<Location> {
    if let Some(hex) = raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        let addr = u32::from_str_radix(hex, 16)
            .map_err(|_| Error::InvalidParams(format!("not a valid hex address: {raw}")))?;
        return Ok(Location::Address(addr));
    }
    let (path, line) = raw
        .rsplit_once(':')
        .ok_or_else(|| Error::InvalidParams(format!("not a valid filename:line location: {raw}")))?;
    let line: u64 = line
        .parse()
        .map_err(|_| Error::InvalidParams(format!("not a valid line number: {line}")))?;
    Ok(Location::SourceLine {
        path: PathBuf::from(path),
        line,
    })
}

async fn get_source(state: &ToolState, p: GetSourceParams) -> Result<SourceResult> {
    let hint = PathBuf::from(&p.path);
    let resolved = resolve_source_file(state, p.id, &hint).await?;
    let contents = std::fs::read_to_string(&resolved).map_err(Error::IO)?;
    let lines: Vec<&str> = contents.lines().collect();
    let context = p.context.unwrap_or(0);
    let requested = p.line.max(1);
    let first_line = requested.saturating_sub(context).max(1);
    let last_line = requested
        .saturating_add(context)
        .min(lines.len() as u64);

    let slice = if first_line as usize <= lines.len() {
        lines[(first_line - 1) as usize..last_line as usize]
            .iter()
            .map(|s| s.to_string())
            .collect()
    } else {
        Vec::new()
    };

    Ok(SourceResult {
        path: resolved.display().to_string(),
        first_line,
        lines: slice,
    })
}

async fn resolve_source_file(state: &ToolState, session: Uuid, hint: &Path) -> Result<PathBuf> {
    if hint.is_absolute() && hint.exists() {
        return Ok(hint.to_path_buf());
    }
    if let Some(found) = state
        .conductor
        .resolve_source_path(session, hint.to_path_buf())
        .await?
    {
        if found.exists() {
            return Ok(found);
        }
    }
    let dirs = state
        .session_source_dirs
        .lock()
        .await
        .get(&session)
        .cloned()
        .unwrap_or_default();
    for dir in dirs {
        let candidate = dir.join(hint);
        if candidate.exists() {
            return Ok(candidate);
        }
    }
    Err(Error::IO(std::io::Error::new(
        std::io::ErrorKind::NotFound,
        format!("source file not found: {}", hint.display()),
    )))
}
