//! Error kinds for the debugger core and tool server.
//!
//! Every variant maps onto a stable kind tag. User-visible failures always
//! cross the JSON-RPC boundary as `{kind, message}` — never a raw OS error
//! code (see [`Error::kind_tag`]).

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    // --------------------------------- PE / DWARF parsing -----------------------------------
    #[error("no debug information container found in {0}")]
    NoDebugInfo(PathBuf),
    #[error("malformed dwarf data: {0}")]
    MalformedDwarf(String),
    #[error(transparent)]
    DwarfParsing(#[from] gimli::Error),
    #[error("object file parsing error: {0}")]
    ObjParsing(#[from] object::Error),

    // --------------------------------- breakpoints -------------------------------------------
    #[error("failed to plant breakpoint at {address:#010x}: {reason}")]
    BreakpointPlantFailed { address: u32, reason: String },
    #[error("location did not resolve to an address yet")]
    UnresolvedLocation,
    #[error("unknown breakpoint id {0}")]
    InvalidBreakpointId(uuid::Uuid),

    // --------------------------------- sessions ----------------------------------------------
    #[error("unknown or closed session {0}")]
    InvalidSession(uuid::Uuid),
    #[error("debuggee process lost: {0}")]
    ProcessLost(String),
    #[error("timed out waiting for debug event")]
    Timeout,

    // --------------------------------- process controller (§4.F) ----------------------------
    #[error("invalid process or thread handle")]
    InvalidHandle,
    #[error("memory access denied at {address:#010x}")]
    MemoryAccessDenied { address: u32 },
    #[error("thread {0} not found")]
    ThreadNotFound(u32),

    // --------------------------------- JSON-RPC transport (§6) --------------------------------
    #[error("unknown method {0}")]
    UnknownMethod(String),
    #[error("invalid params: {0}")]
    InvalidParams(String),

    // --------------------------------- generic ------------------------------------------------
    #[error(transparent)]
    IO(#[from] std::io::Error),
}

impl Error {
    /// The stable tag surfaced to JSON-RPC clients in place of an OS error code.
    pub fn kind_tag(&self) -> &'static str {
        match self {
            Error::NoDebugInfo(_) => "NoDebugInfo",
            Error::MalformedDwarf(_) | Error::DwarfParsing(_) | Error::ObjParsing(_) => {
                "MalformedDwarf"
            }
            Error::BreakpointPlantFailed { .. } => "BreakpointPlantFailed",
            Error::UnresolvedLocation => "UnresolvedLocation",
            Error::InvalidBreakpointId(_) => "InvalidBreakpointId",
            Error::InvalidSession(_) => "InvalidSession",
            Error::ProcessLost(_) => "ProcessLost",
            Error::Timeout => "Timeout",
            Error::InvalidHandle | Error::MemoryAccessDenied { .. } | Error::ThreadNotFound(_) => {
                "ProcessControllerError"
            }
            Error::UnknownMethod(_) => "UnknownMethod",
            Error::InvalidParams(_) => "InvalidParams",
            Error::IO(_) => "IOError",
        }
    }

    /// Errors that are recovered locally and never surfaced as a session-wide
    /// failure: `NoDebugInfo`/`MalformedDwarf` are per-unit/per-module recoveries.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::NoDebugInfo(_) | Error::MalformedDwarf(_) | Error::DwarfParsing(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
