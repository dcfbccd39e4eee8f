//! Platform-abstract process/thread primitives.
//!
//! All operations here are synchronous and are called exclusively from the
//! debug-event loop worker. Real bindings (`WindowsProcess`) talk to the
//! Win32 debug API through `winapi`. A trait seam (`ProcessController`) lets
//! the breakpoint manager and event loop be tested against a fake without a
//! live Windows debuggee.

use crate::error::{Error, Result};
use std::collections::HashMap;
use std::ffi::OsString;
use std::path::PathBuf;

/// x86 (32-bit) general-purpose register snapshot, the subset `get_registers`
/// and the breakpoint/single-step machinery need. Maps directly onto the
/// fields of a Win32 `CONTEXT` structure for `i386`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Registers {
    pub eax: u32,
    pub ebx: u32,
    pub ecx: u32,
    pub edx: u32,
    pub esi: u32,
    pub edi: u32,
    pub ebp: u32,
    pub esp: u32,
    pub eip: u32,
    pub eflags: u32,
}

const TRAP_FLAG: u32 = 1 << 8;

impl Registers {
    pub fn trap_flag_set(&self) -> bool {
        self.eflags & TRAP_FLAG != 0
    }

    pub fn with_trap_flag(mut self, enabled: bool) -> Self {
        if enabled {
            self.eflags |= TRAP_FLAG;
        } else {
            self.eflags &= !TRAP_FLAG;
        }
        self
    }
}

/// A raw OS debug event, translated from `DEBUG_EVENT` into the shape the
/// event loop (component G) dispatches on.
#[derive(Debug, Clone)]
pub enum RawDebugEvent {
    ProcessCreated {
        process_id: u32,
        thread_id: u32,
        image_path: PathBuf,
        base_address: u32,
    },
    ModuleLoaded {
        thread_id: u32,
        image_path: PathBuf,
        base_address: u32,
    },
    ModuleUnloaded {
        thread_id: u32,
        base_address: u32,
    },
    ThreadCreated {
        thread_id: u32,
    },
    ThreadExited {
        thread_id: u32,
    },
    Breakpoint {
        thread_id: u32,
        address: u32,
    },
    SingleStep {
        thread_id: u32,
    },
    Exception {
        thread_id: u32,
        address: u32,
        first_chance: bool,
    },
    OutputDebugString {
        thread_id: u32,
        message: OsString,
    },
    ProcessExited {
        exit_code: u32,
    },
}

/// Disposition passed back to `ContinueDebugEvent`.
#[derive(Debug, Clone, Copy)]
pub enum ContinueDisposition {
    Handled,
    Unhandled,
}

/// Platform-abstract operations over a single debuggee.
pub trait ProcessController {
    fn read_byte(&mut self, addr: u32) -> Result<u8> {
        let mut buf = [0u8; 1];
        self.read_memory(addr, &mut buf)?;
        Ok(buf[0])
    }

    fn write_byte(&mut self, addr: u32, value: u8) -> Result<()> {
        self.write_memory(addr, &[value])
    }

    fn read_memory(&mut self, addr: u32, buf: &mut [u8]) -> Result<()>;
    fn write_memory(&mut self, addr: u32, data: &[u8]) -> Result<()>;

    fn get_registers(&mut self, thread_id: u32) -> Result<Registers>;
    fn set_registers(&mut self, thread_id: u32, regs: Registers) -> Result<()>;

    fn set_single_step(&mut self, thread_id: u32, enabled: bool) -> Result<()> {
        let regs = self.get_registers(thread_id)?;
        self.set_registers(thread_id, regs.with_trap_flag(enabled))
    }

    /// Block up to `timeout_ms` waiting for the next OS debug event.
    /// `Ok(None)` means an idle timeout, not an error: debug events are
    /// polled, and an idle wait is expected, not exceptional.
    fn poll_event(&mut self, timeout_ms: u32) -> Result<Option<RawDebugEvent>>;

    /// Resume the debuggee after the most recently polled event.
    fn continue_event(&mut self, disposition: ContinueDisposition) -> Result<()>;

    fn terminate(&mut self) -> Result<()>;
}

#[cfg(windows)]
pub use win32::WindowsProcess;

#[cfg(windows)]
mod win32 {
    use super::*;
    use std::mem::MaybeUninit;
    use std::os::windows::ffi::OsStringExt;
    use std::os::windows::process::CommandExt;
    use std::process::Command;
    use winapi::shared::minwindef::{DWORD, FALSE, TRUE};
    use winapi::um::debugapi::{ContinueDebugEvent, WaitForDebugEvent};
    use winapi::um::fileapi::GetFinalPathNameByHandleW;
    use winapi::um::handleapi::CloseHandle;
    use winapi::um::memoryapi::{ReadProcessMemory, WriteProcessMemory};
    use winapi::um::minwinbase::{
        CREATE_PROCESS_DEBUG_EVENT, CREATE_THREAD_DEBUG_EVENT, EXCEPTION_DEBUG_EVENT,
        EXIT_PROCESS_DEBUG_EVENT, EXIT_THREAD_DEBUG_EVENT, LOAD_DLL_DEBUG_EVENT,
        OUTPUT_DEBUG_STRING_EVENT, UNLOAD_DLL_DEBUG_EVENT,
    };
    use winapi::um::processthreadsapi::{
        GetThreadContext, ResumeThread, SetThreadContext, TerminateProcess,
    };
    use winapi::um::winbase::DEBUG_PROCESS;
    use winapi::um::winnt::{CONTEXT, CONTEXT_FULL, DBG_CONTINUE, DBG_EXCEPTION_NOT_HANDLED, HANDLE};

    /// Win32-backed `ProcessController`. One instance owns one debuggee for
    /// the lifetime of its session worker.
    pub struct WindowsProcess {
        process_handle: HANDLE,
        threads: std::collections::HashMap<u32, HANDLE>,
        process_id: u32,
        last_thread_id: u32,
        continue_pending: bool,
    }

    // HANDLE is just a raw pointer-sized value owned exclusively by the
    // worker thread that created this process; the worker never shares it.
    unsafe impl Send for WindowsProcess {}

    impl WindowsProcess {
        /// Spawn `exe_path` with `DEBUG_PROCESS` set, so the OS attaches this
        /// process as the debugger at creation.
        pub fn spawn(exe_path: &std::path::Path, args: &[String]) -> Result<Self> {
            let mut cmd = Command::new(exe_path);
            cmd.args(args).creation_flags(DEBUG_PROCESS);
            let child = cmd.spawn().map_err(Error::IO)?;

            Ok(Self {
                process_handle: std::ptr::null_mut(),
                threads: std::collections::HashMap::new(),
                process_id: child.id(),
                last_thread_id: 0,
                continue_pending: false,
            })
        }

        fn thread_handle(&self, thread_id: u32) -> Result<HANDLE> {
            self.threads
                .get(&thread_id)
                .copied()
                .ok_or(Error::ThreadNotFound(thread_id))
        }
    }

    /// Resolve the on-disk path of the file underlying `handle` (the `hFile`
    /// carried by `CREATE_PROCESS_DEBUG_INFO`/`LOAD_DLL_DEBUG_INFO`), or an
    /// empty path if the handle is null or resolution fails. The debugger
    /// owns this handle and must close it once the path is read.
    fn resolve_handle_path(handle: HANDLE) -> PathBuf {
        if handle.is_null() {
            return PathBuf::new();
        }
        let mut buf: Vec<u16> = vec![0u16; 1024];
        let len = unsafe {
            GetFinalPathNameByHandleW(handle, buf.as_mut_ptr(), buf.len() as DWORD, 0)
        };
        if len == 0 || len as usize >= buf.len() {
            return PathBuf::new();
        }
        buf.truncate(len as usize);
        let raw = OsString::from_wide(&buf);
        let s = raw.to_string_lossy();
        // Strip the `\\?\` extended-length prefix GetFinalPathNameByHandleW
        // prepends by default, so paths read the same as everywhere else.
        PathBuf::from(s.strip_prefix(r"\\?\").unwrap_or(&s))
    }

    impl ProcessController for WindowsProcess {
        fn read_memory(&mut self, addr: u32, buf: &mut [u8]) -> Result<()> {
            let mut read = 0usize;
            let ok = unsafe {
                ReadProcessMemory(
                    self.process_handle,
                    addr as *const _,
                    buf.as_mut_ptr() as *mut _,
                    buf.len(),
                    &mut read,
                )
            };
            if ok == FALSE || read != buf.len() {
                return Err(Error::MemoryAccessDenied { address: addr });
            }
            Ok(())
        }

        fn write_memory(&mut self, addr: u32, data: &[u8]) -> Result<()> {
            let mut written = 0usize;
            let ok = unsafe {
                WriteProcessMemory(
                    self.process_handle,
                    addr as *mut _,
                    data.as_ptr() as *const _,
                    data.len(),
                    &mut written,
                )
            };
            if ok == FALSE || written != data.len() {
                return Err(Error::MemoryAccessDenied { address: addr });
            }
            Ok(())
        }

        fn get_registers(&mut self, thread_id: u32) -> Result<Registers> {
            let handle = self.thread_handle(thread_id)?;
            let mut ctx: CONTEXT = unsafe { MaybeUninit::zeroed().assume_init() };
            ctx.ContextFlags = CONTEXT_FULL;
            let ok = unsafe { GetThreadContext(handle, &mut ctx) };
            if ok == FALSE {
                return Err(Error::InvalidHandle);
            }
            Ok(Registers {
                eax: ctx.Eax,
                ebx: ctx.Ebx,
                ecx: ctx.Ecx,
                edx: ctx.Edx,
                esi: ctx.Esi,
                edi: ctx.Edi,
                ebp: ctx.Ebp,
                esp: ctx.Esp,
                eip: ctx.Eip,
                eflags: ctx.EFlags,
            })
        }

        fn set_registers(&mut self, thread_id: u32, regs: Registers) -> Result<()> {
            let handle = self.thread_handle(thread_id)?;
            let mut ctx: CONTEXT = unsafe { MaybeUninit::zeroed().assume_init() };
            ctx.ContextFlags = CONTEXT_FULL;
            if unsafe { GetThreadContext(handle, &mut ctx) } == FALSE {
                return Err(Error::InvalidHandle);
            }
            ctx.Eax = regs.eax;
            ctx.Ebx = regs.ebx;
            ctx.Ecx = regs.ecx;
            ctx.Edx = regs.edx;
            ctx.Esi = regs.esi;
            ctx.Edi = regs.edi;
            ctx.Ebp = regs.ebp;
            ctx.Esp = regs.esp;
            ctx.Eip = regs.eip;
            ctx.EFlags = regs.eflags;
            if unsafe { SetThreadContext(handle, &ctx) } == FALSE {
                return Err(Error::InvalidHandle);
            }
            Ok(())
        }

        fn poll_event(&mut self, timeout_ms: u32) -> Result<Option<RawDebugEvent>> {
            let mut de = unsafe { MaybeUninit::zeroed().assume_init() };
            let ok = unsafe { WaitForDebugEvent(&mut de, timeout_ms as DWORD) };
            if ok == FALSE {
                // ERROR_SEM_TIMEOUT is the expected idle-wait outcome.
                return Ok(None);
            }

            self.last_thread_id = de.dwThreadId;
            self.continue_pending = true;

            let event = match de.dwDebugEventCode {
                CREATE_PROCESS_DEBUG_EVENT => {
                    let info = unsafe { de.u.CreateProcessInfo() };
                    self.process_handle = info.hProcess;
                    self.threads.insert(de.dwThreadId, info.hThread);
                    let image_path = resolve_handle_path(info.hFile);
                    if !info.hFile.is_null() {
                        unsafe { CloseHandle(info.hFile) };
                    }
                    RawDebugEvent::ProcessCreated {
                        process_id: de.dwProcessId,
                        thread_id: de.dwThreadId,
                        image_path,
                        base_address: info.lpBaseOfImage as u32,
                    }
                }
                LOAD_DLL_DEBUG_EVENT => {
                    let info = unsafe { de.u.LoadDll() };
                    let image_path = resolve_handle_path(info.hFile);
                    if !info.hFile.is_null() {
                        unsafe { CloseHandle(info.hFile) };
                    }
                    RawDebugEvent::ModuleLoaded {
                        thread_id: de.dwThreadId,
                        image_path,
                        base_address: info.lpBaseOfDll as u32,
                    }
                }
                UNLOAD_DLL_DEBUG_EVENT => {
                    let info = unsafe { de.u.UnloadDll() };
                    RawDebugEvent::ModuleUnloaded {
                        thread_id: de.dwThreadId,
                        base_address: info.lpBaseOfDll as u32,
                    }
                }
                CREATE_THREAD_DEBUG_EVENT => {
                    let info = unsafe { de.u.CreateThread() };
                    self.threads.insert(de.dwThreadId, info.hThread);
                    RawDebugEvent::ThreadCreated {
                        thread_id: de.dwThreadId,
                    }
                }
                EXIT_THREAD_DEBUG_EVENT => {
                    self.threads.remove(&de.dwThreadId);
                    RawDebugEvent::ThreadExited {
                        thread_id: de.dwThreadId,
                    }
                }
                EXCEPTION_DEBUG_EVENT => {
                    let info = unsafe { de.u.Exception() };
                    let record = &info.ExceptionRecord;
                    let addr = record.ExceptionAddress as u32;
                    let first_chance = info.dwFirstChance != 0;
                    match record.ExceptionCode {
                        winapi::um::minwinbase::EXCEPTION_BREAKPOINT => {
                            RawDebugEvent::Breakpoint {
                                thread_id: de.dwThreadId,
                                address: addr,
                            }
                        }
                        winapi::um::minwinbase::EXCEPTION_SINGLE_STEP => {
                            RawDebugEvent::SingleStep {
                                thread_id: de.dwThreadId,
                            }
                        }
                        _ => RawDebugEvent::Exception {
                            thread_id: de.dwThreadId,
                            address: addr,
                            first_chance,
                        },
                    }
                }
                OUTPUT_DEBUG_STRING_EVENT => RawDebugEvent::OutputDebugString {
                    thread_id: de.dwThreadId,
                    message: OsString::new(),
                },
                EXIT_PROCESS_DEBUG_EVENT => {
                    let info = unsafe { de.u.ExitProcess() };
                    RawDebugEvent::ProcessExited {
                        exit_code: info.dwExitCode,
                    }
                }
                _ => return Ok(None),
            };

            Ok(Some(event))
        }

        fn continue_event(&mut self, disposition: ContinueDisposition) -> Result<()> {
            if !self.continue_pending {
                return Ok(());
            }
            self.continue_pending = false;
            let status = match disposition {
                ContinueDisposition::Handled => DBG_CONTINUE,
                ContinueDisposition::Unhandled => DBG_EXCEPTION_NOT_HANDLED,
            };
            let ok = unsafe {
                ContinueDebugEvent(self.process_id, self.last_thread_id, status as DWORD)
            };
            if ok == FALSE {
                return Err(Error::ProcessLost("ContinueDebugEvent failed".into()));
            }
            Ok(())
        }

        fn terminate(&mut self) -> Result<()> {
            if self.process_handle.is_null() {
                return Ok(());
            }
            unsafe {
                TerminateProcess(self.process_handle, 1);
            }
            Ok(())
        }
    }

    impl Drop for WindowsProcess {
        fn drop(&mut self) {
            for handle in self.threads.values() {
                unsafe {
                    ResumeThread(*handle);
                    CloseHandle(*handle);
                }
            }
            if !self.process_handle.is_null() {
                unsafe { CloseHandle(self.process_handle) };
            }
        }
    }
}

/// In-memory fake used by unit and integration tests for the breakpoint
/// manager and event loop, so their logic is exercised without a real
/// Windows debuggee. Gated behind `test-support` (in addition to `cfg(test)`)
/// so `tests/*.rs` integration tests — compiled against the library without
/// `cfg(test)` — can still reach it; see `[dev-dependencies]` in Cargo.toml.
#[cfg(any(test, feature = "test-support"))]
pub mod fake {
    use super::*;

    pub struct FakeProcess {
        pub memory: HashMap<u32, u8>,
        pub registers: HashMap<u32, Registers>,
        pub events: std::collections::VecDeque<RawDebugEvent>,
    }

    impl FakeProcess {
        pub fn new() -> Self {
            Self {
                memory: HashMap::new(),
                registers: HashMap::new(),
                events: std::collections::VecDeque::new(),
            }
        }
    }

    impl ProcessController for FakeProcess {
        fn read_memory(&mut self, addr: u32, buf: &mut [u8]) -> Result<()> {
            for (i, b) in buf.iter_mut().enumerate() {
                *b = *self.memory.get(&(addr + i as u32)).unwrap_or(&0);
            }
            Ok(())
        }

        fn write_memory(&mut self, addr: u32, data: &[u8]) -> Result<()> {
            for (i, b) in data.iter().enumerate() {
                self.memory.insert(addr + i as u32, *b);
            }
            Ok(())
        }

        fn get_registers(&mut self, thread_id: u32) -> Result<Registers> {
            Ok(self.registers.get(&thread_id).copied().unwrap_or_default())
        }

        fn set_registers(&mut self, thread_id: u32, regs: Registers) -> Result<()> {
            self.registers.insert(thread_id, regs);
            Ok(())
        }

        fn poll_event(&mut self, _timeout_ms: u32) -> Result<Option<RawDebugEvent>> {
            Ok(self.events.pop_front())
        }

        fn continue_event(&mut self, _disposition: ContinueDisposition) -> Result<()> {
            Ok(())
        }

        fn terminate(&mut self) -> Result<()> {
            Ok(())
        }
    }
}
