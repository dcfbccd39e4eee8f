//! Component H: bridges the async tool-server surface to the synchronous
//! debug-event loop worker. Exactly one worker per session; sessions are
//! otherwise fully independent (§5 — no ordering guarantees across them).

use crate::debuggee::breakpoint::BreakpointId;
use crate::debuggee::process::{ContinueDisposition, ProcessController, Registers};
use crate::error::{Error, Result};
use crate::session::event_loop::EventLoop;
use crate::session::types::{
    BreakpointSummary, Command, CommandEnvelope, ModuleSummary, Reply, SessionId, StateSnapshot,
    StopReason, DEFAULT_RUN_TIMEOUT,
};
use indexmap::IndexMap;
use log::info;
use std::path::PathBuf;
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch, Mutex};

struct SessionHandle {
    commands: mpsc::Sender<CommandEnvelope>,
    state: watch::Receiver<StateSnapshot>,
    worker: Option<JoinHandle<()>>,
}

/// One conductor per server process; owns every live session.
pub struct SessionConductor {
    sessions: Mutex<IndexMap<SessionId, SessionHandle>>,
    run_timeout: Duration,
}

impl SessionConductor {
    pub fn new(run_timeout: Duration) -> Self {
        Self {
            sessions: Mutex::new(IndexMap::new()),
            run_timeout,
        }
    }

    pub fn with_default_timeout() -> Self {
        Self::new(DEFAULT_RUN_TIMEOUT)
    }

    /// Spawn a debuggee and its worker. Returns as soon as the worker has
    /// registered the main image in its module registry — it does not wait
    /// for the initial breakpoint (that's `run`'s job).
    pub async fn create(&self, exe_path: PathBuf, args: Vec<String>) -> Result<SessionId> {
        let controller = spawn_controller(&exe_path, &args)?;
        self.create_with_controller(exe_path, controller).await
    }

    /// Core primitive behind `create`, parameterized over the process
    /// controller so tests can inject a `FakeProcess` instead of a real
    /// Win32 debuggee.
    pub async fn create_with_controller(
        &self,
        exe_path: PathBuf,
        controller: Box<dyn ProcessController + Send>,
    ) -> Result<SessionId> {
        let (cmd_tx, cmd_rx) = mpsc::channel(8);
        let (state_tx, state_rx) = watch::channel(StateSnapshot::default());
        let (registered_tx, registered_rx) = oneshot::channel();

        let id = SessionId::new_v4();
        let worker_name = format!("session-{id}-worker");
        let event_loop = EventLoop::new(controller, exe_path, cmd_rx, state_tx, registered_tx);
        let worker = std::thread::Builder::new()
            .name(worker_name)
            .spawn(move || event_loop.run())
            .map_err(Error::IO)?;

        // Bounded: a debuggee that fails to start at all must not hang `create`.
        tokio::time::timeout(self.run_timeout, registered_rx)
            .await
            .map_err(|_| Error::Timeout)?
            .map_err(|_| Error::ProcessLost("worker exited before registering main image".into()))?;

        let mut sessions = self.sessions.lock().await;
        sessions.insert(
            id,
            SessionHandle {
                commands: cmd_tx,
                state: state_rx,
                worker: Some(worker),
            },
        );
        info!("session {id} created");
        Ok(id)
    }

    /// Wait until the initial-breakpoint latch fires or `run_timeout`
    /// elapses; never auto-continues past entry.
    pub async fn run(&self, id: SessionId) -> Result<StateSnapshot> {
        let mut state_rx = self.state_receiver(id).await?;
        let wait = async {
            loop {
                if at_entry(&state_rx.borrow()) {
                    return;
                }
                if state_rx.changed().await.is_err() {
                    return;
                }
            }
        };
        let _ = tokio::time::timeout(self.run_timeout, wait).await;
        Ok(state_rx.borrow().clone())
    }

    pub async fn continue_session(&self, id: SessionId) -> Result<StateSnapshot> {
        self.continue_with_disposition(id, ContinueDisposition::Handled)
            .await
    }

    pub async fn continue_with_disposition(
        &self,
        id: SessionId,
        disposition: ContinueDisposition,
    ) -> Result<StateSnapshot> {
        match self
            .send(id, Command::Continue { disposition })
            .await?
        {
            Reply::State(s) => Ok(s),
            _ => unreachable!("Continue always replies with State"),
        }
    }

    pub async fn step(&self, id: SessionId) -> Result<StateSnapshot> {
        match self.send(id, Command::Step).await? {
            Reply::State(s) => Ok(s),
            _ => unreachable!("Step always replies with State"),
        }
    }

    pub async fn set_breakpoint_by_address(&self, id: SessionId, addr: u32) -> Result<BreakpointId> {
        match self.send(id, Command::SetBreakpointByAddress(addr)).await? {
            Reply::BreakpointId(bp) => Ok(bp),
            _ => unreachable!("SetBreakpointByAddress always replies with BreakpointId"),
        }
    }

    pub async fn set_breakpoint_by_line(
        &self,
        id: SessionId,
        path: PathBuf,
        line: u64,
    ) -> Result<BreakpointId> {
        match self
            .send(id, Command::SetBreakpointByLine(path, line))
            .await?
        {
            Reply::BreakpointId(bp) => Ok(bp),
            _ => unreachable!("SetBreakpointByLine always replies with BreakpointId"),
        }
    }

    pub async fn remove_breakpoint(&self, id: SessionId, bp_id: BreakpointId) -> Result<()> {
        self.send(id, Command::RemoveBreakpoint(bp_id)).await?;
        Ok(())
    }

    pub async fn list_breakpoints(&self, id: SessionId) -> Result<Vec<BreakpointSummary>> {
        match self.send(id, Command::ListBreakpoints).await? {
            Reply::Breakpoints(v) => Ok(v),
            _ => unreachable!("ListBreakpoints always replies with Breakpoints"),
        }
    }

    pub async fn get_registers(&self, id: SessionId) -> Result<Registers> {
        match self.send(id, Command::GetRegisters).await? {
            Reply::Registers(r) => Ok(r),
            _ => unreachable!("GetRegisters always replies with Registers"),
        }
    }

    pub async fn list_modules(&self, id: SessionId) -> Result<Vec<ModuleSummary>> {
        match self.send(id, Command::ListModules).await? {
            Reply::Modules(v) => Ok(v),
            _ => unreachable!("ListModules always replies with Modules"),
        }
    }

    pub async fn resolve_source_path(&self, id: SessionId, hint: PathBuf) -> Result<Option<PathBuf>> {
        match self.send(id, Command::ResolveSourcePath(hint)).await? {
            Reply::Path(p) => Ok(p),
            _ => unreachable!("ResolveSourcePath always replies with Path"),
        }
    }

    /// Remove breakpoints (best-effort), terminate the debuggee, join the
    /// worker. Idempotent — closing an unknown or already-closed session is
    /// not an error.
    pub async fn close(&self, id: SessionId) -> Result<()> {
        let handle = {
            let mut sessions = self.sessions.lock().await;
            sessions.shift_remove(&id)
        };
        let Some(mut handle) = handle else {
            return Ok(());
        };

        let (reply_tx, reply_rx) = oneshot::channel();
        if handle.commands.send((Command::Close, reply_tx)).await.is_ok() {
            let _ = reply_rx.await;
        }
        if let Some(worker) = handle.worker.take() {
            let _ = tokio::task::spawn_blocking(move || worker.join()).await;
        }
        info!("session {id} closed");
        Ok(())
    }

    /// Snapshot of the session's current state without touching the
    /// command channel (used for a cheap status poll).
    pub async fn state(&self, id: SessionId) -> Result<StateSnapshot> {
        Ok(self.state_receiver(id).await?.borrow().clone())
    }

    /// Close every live session. Used by the server's graceful-shutdown path
    /// so a Ctrl-C doesn't leave debuggees running under a dead debugger.
    pub async fn close_all(&self) {
        let ids: Vec<SessionId> = {
            let sessions = self.sessions.lock().await;
            sessions.keys().copied().collect()
        };
        for id in ids {
            let _ = self.close(id).await;
        }
    }

    async fn state_receiver(&self, id: SessionId) -> Result<watch::Receiver<StateSnapshot>> {
        let sessions = self.sessions.lock().await;
        sessions
            .get(&id)
            .map(|h| h.state.clone())
            .ok_or(Error::InvalidSession(id))
    }

    async fn send(&self, id: SessionId, cmd: Command) -> Result<Reply> {
        let tx = {
            let sessions = self.sessions.lock().await;
            sessions
                .get(&id)
                .map(|h| h.commands.clone())
                .ok_or(Error::InvalidSession(id))?
        };
        let (reply_tx, reply_rx) = oneshot::channel();
        tx.send((cmd, reply_tx))
            .await
            .map_err(|_| Error::InvalidSession(id))?;
        reply_rx
            .await
            .map_err(|_| Error::ProcessLost("worker terminated before replying".into()))?
    }
}

fn at_entry(snapshot: &StateSnapshot) -> bool {
    matches!(snapshot.status, crate::session::types::Status::Stopped)
        && snapshot.stop_reason == Some(StopReason::Entry)
}

#[cfg(windows)]
fn spawn_controller(
    exe_path: &std::path::Path,
    args: &[String],
) -> Result<Box<dyn ProcessController + Send>> {
    use crate::debuggee::process::WindowsProcess;
    Ok(Box::new(WindowsProcess::spawn(exe_path, args)?))
}

#[cfg(not(windows))]
fn spawn_controller(
    _exe_path: &std::path::Path,
    _args: &[String],
) -> Result<Box<dyn ProcessController + Send>> {
    Err(Error::IO(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "the Win32 debug API is only available on Windows targets",
    )))
}
