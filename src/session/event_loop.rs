//! Component G: the debug-event loop.
//!
//! One worker per session, running on its own OS thread (never inside the
//! tokio runtime — every call here may block in a Win32 debug API wait).
//! It is the sole writer of the session's `DebuggerState`, module registry,
//! and breakpoint table; the conductor only ever reaches these through the
//! command channel or the published state snapshot.

use crate::debuggee::breakpoint::BreakpointId;
use crate::debuggee::module::{Module, ModuleRegistry};
use crate::debuggee::process::{ContinueDisposition, ProcessController, RawDebugEvent, Registers};
use crate::debuggee::BreakpointManager;
use crate::error::{Error, Result};
use crate::session::types::{
    BreakpointSummary, Command, CommandEnvelope, ModuleSummary, Reply, StateSnapshot, Status,
    StopReason,
};
use log::{debug, info, trace, warn};
use std::path::PathBuf;
use tokio::sync::{mpsc, oneshot, watch};

/// Poll interval while the debuggee is running: short enough that a `close`
/// request isn't starved for long, long enough to not busy-loop.
const POLL_TIMEOUT_MS: u32 = 50;
/// Ceiling on the nested wait for the re-arm/step single-step event; bounds
/// what would otherwise be an unbounded block if the debuggee's thread never
/// traps (e.g. it exited underneath us).
const SINGLE_STEP_WAIT_ATTEMPTS: u32 = 200;

pub struct EventLoop {
    proc: Box<dyn ProcessController + Send>,
    modules: ModuleRegistry,
    breakpoints: BreakpointManager,
    exe_path: PathBuf,
    status: Status,
    stop_reason: Option<StopReason>,
    stop_thread: Option<u32>,
    stop_address: Option<u32>,
    /// Set once the very first `EXCEPTION_BREAKPOINT` (the OS-reported
    /// initial system breakpoint) has been seen; every later breakpoint trap
    /// is dispatched to the breakpoint manager instead.
    entry_seen: bool,
    /// The breakpoint a hit most recently stopped at, byte already restored,
    /// awaiting the single-step-then-replant re-arm dance on the next
    /// `continue`/`step`.
    last_hit_bp: Option<BreakpointId>,
    commands: mpsc::Receiver<CommandEnvelope>,
    publish: watch::Sender<StateSnapshot>,
    registered: Option<oneshot::Sender<()>>,
}

impl EventLoop {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        proc: Box<dyn ProcessController + Send>,
        exe_path: PathBuf,
        commands: mpsc::Receiver<CommandEnvelope>,
        publish: watch::Sender<StateSnapshot>,
        registered: oneshot::Sender<()>,
    ) -> Self {
        Self {
            proc,
            modules: ModuleRegistry::new(),
            breakpoints: BreakpointManager::new(),
            exe_path,
            status: Status::Created,
            stop_reason: None,
            stop_thread: None,
            stop_address: None,
            entry_seen: false,
            last_hit_bp: None,
            commands,
            publish,
            registered: Some(registered),
        }
    }

    /// Drive the debug-event loop until the debuggee exits, is lost, or the
    /// session is closed. Runs entirely on the calling (worker) thread.
    pub fn run(mut self) {
        loop {
            match self.status {
                Status::Created | Status::Running => {
                    if !self.pump_one_event() {
                        break;
                    }
                    // Drain at most one queued command per tick so `close`
                    // isn't starved while the debuggee runs free.
                    match self.commands.try_recv() {
                        Ok((cmd, reply)) => {
                            if !self.handle_command(cmd, reply) {
                                break;
                            }
                        }
                        Err(mpsc::error::TryRecvError::Empty) => {}
                        Err(mpsc::error::TryRecvError::Disconnected) => break,
                    }
                    if matches!(self.status, Status::Exited | Status::Crashed) {
                        break;
                    }
                }
                Status::Stopped => {
                    // The second (and only other) suspension point: block on
                    // the command channel while the debuggee is stopped.
                    match self.commands.blocking_recv() {
                        Some((cmd, reply)) => {
                            if !self.handle_command(cmd, reply) {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                Status::Exited | Status::Crashed => break,
            }
        }
        let _ = self.proc.terminate();
        debug!("event loop for {} terminated", self.exe_path.display());
    }

    /// Poll one OS debug event (or time out idly) and dispatch it. Returns
    /// `false` if the debuggee is definitively gone and the loop should stop.
    fn pump_one_event(&mut self) -> bool {
        match self.proc.poll_event(POLL_TIMEOUT_MS) {
            Ok(Some(event)) => {
                self.handle_event(event);
                true
            }
            Ok(None) => true, // idle timeout; not an error, per §4.G.
            Err(e) => {
                warn!("debuggee lost: {e}");
                self.status = Status::Crashed;
                self.publish_state();
                false
            }
        }
    }

    fn handle_event(&mut self, event: RawDebugEvent) {
        match event {
            RawDebugEvent::ProcessCreated {
                thread_id,
                base_address,
                ..
            } => {
                let mut module = Module::from_load_event(self.exe_path.clone(), base_address, true);
                module.try_build_line_index();
                self.modules.add(module);
                self.stop_thread = Some(thread_id);
                info!("process created, main image at {base_address:#010x}");
                if let Some(tx) = self.registered.take() {
                    let _ = tx.send(());
                }
                self.publish_state();
            }
            RawDebugEvent::ModuleLoaded {
                image_path,
                base_address,
                ..
            } => {
                let mut module = Module::from_load_event(image_path.clone(), base_address, false);
                module.try_build_line_index();
                let id = self.modules.add(module);
                self.breakpoints
                    .on_module_loaded(id, &self.modules, self.proc.as_mut());
                self.stop_reason = Some(StopReason::ModuleLoad);
                debug!("module loaded: {} at {base_address:#010x}", image_path.display());
            }
            RawDebugEvent::ModuleUnloaded { base_address, .. } => {
                if let Some(module) = self.modules.lookup_by_address(base_address) {
                    let id = module.id;
                    self.modules.remove(id);
                    self.breakpoints.on_module_unloaded(id);
                    self.stop_reason = Some(StopReason::ModuleUnload);
                    debug!("module at {base_address:#010x} unloaded");
                }
            }
            RawDebugEvent::ThreadCreated { thread_id } => {
                trace!("thread {thread_id} created");
            }
            RawDebugEvent::ThreadExited { thread_id } => {
                trace!("thread {thread_id} exited");
            }
            RawDebugEvent::Breakpoint { thread_id, address } => self.handle_breakpoint(thread_id, address),
            RawDebugEvent::SingleStep { thread_id } => {
                // A stray single-step that arrived outside the nested
                // re-arm/step wait (e.g. leftover trap flag on another
                // thread). Nothing owns it; just keep running.
                trace!("unsolicited single-step on thread {thread_id}, ignoring");
            }
            RawDebugEvent::Exception {
                thread_id,
                address,
                first_chance,
            } => {
                debug!("exception at {address:#010x} on thread {thread_id} (first_chance={first_chance})");
                self.status = Status::Stopped;
                self.stop_reason = Some(StopReason::Exception);
                self.stop_thread = Some(thread_id);
                self.stop_address = Some(address);
                self.publish_state();
            }
            RawDebugEvent::OutputDebugString { message, .. } => {
                trace!("debuggee output: {message:?}");
            }
            RawDebugEvent::ProcessExited { exit_code } => {
                info!("process exited with code {exit_code}");
                self.status = Status::Exited;
                self.stop_reason = Some(StopReason::Exited);
                self.publish_state();
            }
        }
    }

    fn handle_breakpoint(&mut self, thread_id: u32, address: u32) {
        if !self.entry_seen {
            // §4.G: the initial system breakpoint. Stop-at-entry, never
            // auto-continue past it — this is the load-bearing guarantee
            // that lets breakpoints plant before any DLL init/TLS callback
            // runs.
            self.entry_seen = true;
            self.status = Status::Stopped;
            self.stop_reason = Some(StopReason::Entry);
            self.stop_thread = Some(thread_id);
            self.stop_address = Some(address);
            info!("initial system breakpoint reached at {address:#010x}");
            self.publish_state();
            return;
        }

        match self.breakpoints.find_by_planted_address(address) {
            Some(id) => {
                if let Some(original_byte) = self.breakpoints.record_hit(id) {
                    if let Err(e) = self.restore_and_rewind(thread_id, address, original_byte) {
                        warn!("failed to restore original byte at {address:#010x}: {e}");
                    }
                }
                self.last_hit_bp = Some(id);
                self.status = Status::Stopped;
                self.stop_reason = Some(StopReason::Breakpoint);
                self.stop_thread = Some(thread_id);
                self.stop_address = Some(address);
                debug!("breakpoint {id} hit at {address:#010x}");
                self.publish_state();
            }
            None => {
                // Spurious/external breakpoint we don't own; leave it to the
                // debuggee's own exception policy rather than stopping.
                warn!("unowned breakpoint trap at {address:#010x}, forwarding");
                let _ = self.proc.continue_event(ContinueDisposition::Unhandled);
            }
        }
    }

    fn restore_and_rewind(&mut self, thread_id: u32, address: u32, original_byte: u8) -> Result<()> {
        self.proc.write_byte(address, original_byte)?;
        let regs = self.proc.get_registers(thread_id)?;
        self.proc
            .set_registers(thread_id, Registers { eip: regs.eip.wrapping_sub(1), ..regs })
    }

    /// Block until `thread_id` reports a single-step trap, dispatching any
    /// other event that interleaves in the meantime. Bounded by
    /// `SINGLE_STEP_WAIT_ATTEMPTS` so a debuggee that vanishes mid-step
    /// can't wedge the worker forever.
    fn wait_for_single_step(&mut self, thread_id: u32) -> Result<()> {
        for _ in 0..SINGLE_STEP_WAIT_ATTEMPTS {
            match self.proc.poll_event(POLL_TIMEOUT_MS)? {
                Some(RawDebugEvent::SingleStep { thread_id: tid }) if tid == thread_id => {
                    return Ok(());
                }
                Some(other) => {
                    self.handle_event(other);
                    if matches!(self.status, Status::Exited | Status::Crashed) {
                        return Err(Error::ProcessLost(
                            "debuggee left while waiting for single-step".into(),
                        ));
                    }
                }
                None => {}
            }
        }
        Err(Error::Timeout)
    }

    /// Handle one command. Returns `false` if the worker should shut down.
    fn handle_command(&mut self, cmd: Command, reply: oneshot::Sender<Result<Reply>>) -> bool {
        let (result, keep_running) = match cmd {
            Command::Continue { disposition } => (self.do_continue(disposition), true),
            Command::Step => (self.do_step(), true),
            Command::SetBreakpointByAddress(addr) => {
                let id = self
                    .breakpoints
                    .set_by_address(addr, &self.modules, self.proc.as_mut());
                (Ok(Reply::BreakpointId(id)), true)
            }
            Command::SetBreakpointByLine(path, line) => {
                let id =
                    self.breakpoints
                        .set_by_line(path, line, &self.modules, self.proc.as_mut());
                (Ok(Reply::BreakpointId(id)), true)
            }
            Command::RemoveBreakpoint(id) => {
                self.breakpoints.remove(id, self.proc.as_mut());
                (Ok(Reply::Unit), true)
            }
            Command::ListBreakpoints => (Ok(Reply::Breakpoints(self.list_breakpoints())), true),
            Command::GetRegisters => (self.do_get_registers(), true),
            Command::ListModules => (Ok(Reply::Modules(self.list_modules())), true),
            Command::ResolveSourcePath(hint) => {
                (Ok(Reply::Path(self.modules.find_source_path(&hint))), true)
            }
            Command::Close => {
                self.do_close();
                (Ok(Reply::Unit), false)
            }
        };
        let _ = reply.send(result);
        keep_running
    }

    /// `continue`: requires `stopped`; otherwise a no-op returning the
    /// unchanged state. If the last stop was a breakpoint hit, performs the
    /// single-step-then-replant re-arm dance before resuming for real — the
    /// only correct sequence per §4.E.
    fn do_continue(&mut self, disposition: ContinueDisposition) -> Result<Reply> {
        if self.status != Status::Stopped {
            return Ok(Reply::State(self.snapshot()));
        }
        if let Some(id) = self.last_hit_bp.take() {
            self.rearm_after_hit(id)?;
        }
        self.proc.continue_event(disposition)?;
        self.status = Status::Running;
        Ok(Reply::State(self.snapshot()))
    }

    /// `step`: requires `stopped`; single-steps exactly one instruction and
    /// expects a `single_step` stop. If resuming from a breakpoint hit, the
    /// step itself executes the restored original instruction, then the
    /// breakpoint is replanted (if still enabled) before reporting the stop.
    fn do_step(&mut self) -> Result<Reply> {
        if self.status != Status::Stopped {
            return Ok(Reply::State(self.snapshot()));
        }
        let thread_id = self
            .stop_thread
            .ok_or_else(|| Error::ProcessLost("no current thread to step".into()))?;
        let rearm_id = self.last_hit_bp.take();

        self.proc.set_single_step(thread_id, true)?;
        self.proc.continue_event(ContinueDisposition::Handled)?;
        self.wait_for_single_step(thread_id)?;
        self.proc.set_single_step(thread_id, false)?;

        if let Some(id) = rearm_id {
            self.breakpoints.rearm(id, self.proc.as_mut());
        }

        self.status = Status::Stopped;
        self.stop_reason = Some(StopReason::SingleStep);
        self.stop_thread = Some(thread_id);
        Ok(Reply::State(self.snapshot()))
    }

    /// The re-arm dance: single-step once to let the original instruction
    /// execute, then write `0xCC` back, then the caller's own continue can
    /// proceed. Skipping the step would miss the original instruction;
    /// skipping the replant loses the breakpoint on future passes.
    fn rearm_after_hit(&mut self, id: BreakpointId) -> Result<()> {
        let thread_id = self
            .stop_thread
            .ok_or_else(|| Error::ProcessLost("no current thread to rearm on".into()))?;
        self.proc.set_single_step(thread_id, true)?;
        self.proc.continue_event(ContinueDisposition::Handled)?;
        self.wait_for_single_step(thread_id)?;
        self.proc.set_single_step(thread_id, false)?;
        self.breakpoints.rearm(id, self.proc.as_mut());
        Ok(())
    }

    fn do_get_registers(&mut self) -> Result<Reply> {
        let thread_id = self.stop_thread.unwrap_or(0);
        self.proc.get_registers(thread_id).map(Reply::Registers)
    }

    fn do_close(&mut self) {
        for bp in self.breakpoints.list() {
            self.breakpoints.remove(bp.id, self.proc.as_mut());
        }
        let _ = self.proc.terminate();
        self.status = Status::Exited;
        self.publish_state();
    }

    fn list_breakpoints(&self) -> Vec<BreakpointSummary> {
        self.breakpoints
            .list()
            .into_iter()
            .map(|bp| BreakpointSummary {
                id: bp.id,
                location: bp.location,
                state: bp.state,
                module: bp.module,
                address: bp.planted_address,
                hit_count: bp.hit_count,
                enabled: bp.enabled,
            })
            .collect()
    }

    fn list_modules(&self) -> Vec<ModuleSummary> {
        self.modules
            .iterate()
            .map(|m| ModuleSummary {
                id: m.id,
                path: m.path.clone(),
                base_address: m.base_address,
                size: m.size,
                is_executable: m.is_executable,
                has_line_index: m.line_index.is_some(),
                file_count: m.line_index.as_ref().map(|i| i.files().count()).unwrap_or(0),
            })
            .collect()
    }

    fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            status: self.status,
            stop_reason: self.stop_reason,
            stop_thread: self.stop_thread,
            stop_address: self.stop_address,
        }
    }

    fn publish_state(&self) {
        let _ = self.publish.send(self.snapshot());
    }
}
