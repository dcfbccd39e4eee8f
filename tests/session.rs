//! Exercises the async conductor <-> worker-thread event loop bridge end to
//! end: session creation blocking until the main image registers, `run`
//! observing the stop-at-entry latch, command round-trips while stopped, and
//! the exit path once the debuggee's `ProcessExited` event is drained.
//!
//! All events are queued on the `FakeProcess` up front — there is no live
//! debuggee to inject them mid-test, so the full lifecycle has to be laid
//! out in advance.

use std::path::PathBuf;
use std::time::Duration;
use watcom_dbg_server::debuggee::process::fake::FakeProcess;
use watcom_dbg_server::debuggee::process::RawDebugEvent;
use watcom_dbg_server::session::conductor::SessionConductor;
use watcom_dbg_server::session::types::{Status, StopReason};

fn seeded_process(exit_code: u32) -> Box<FakeProcess> {
    let mut proc = FakeProcess::new();
    proc.events.push_back(RawDebugEvent::ProcessCreated {
        process_id: 1,
        thread_id: 1,
        image_path: PathBuf::from("app.exe"),
        base_address: 0x10000,
    });
    proc.events.push_back(RawDebugEvent::Breakpoint {
        thread_id: 1,
        address: 0x10000,
    });
    proc.events.push_back(RawDebugEvent::ProcessExited { exit_code });
    Box::new(proc)
}

async fn wait_for_exit(conductor: &SessionConductor, id: uuid::Uuid) {
    for _ in 0..100 {
        if conductor.state(id).await.unwrap().status == Status::Exited {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("session never reached Exited");
}

#[tokio::test]
async fn single_session_runs_stops_at_entry_then_exits() {
    let conductor = SessionConductor::new(Duration::from_secs(2));
    let id = conductor
        .create_with_controller(PathBuf::from("app.exe"), seeded_process(0))
        .await
        .expect("session registers its main image");

    let stopped = conductor.run(id).await.unwrap();
    assert_eq!(stopped.status, Status::Stopped);
    assert_eq!(stopped.stop_reason, Some(StopReason::Entry));

    let regs = conductor.get_registers(id).await.unwrap();
    assert_eq!(regs.eip, 0); // FakeProcess default, no thread-1 registers seeded

    let modules = conductor.list_modules(id).await.unwrap();
    assert_eq!(modules.len(), 1);
    assert!(modules[0].is_executable);

    conductor.continue_session(id).await.unwrap();
    wait_for_exit(&conductor, id).await;

    conductor.close(id).await.unwrap();
    conductor.close(id).await.unwrap(); // idempotent
}

#[tokio::test]
async fn two_sessions_do_not_interfere() {
    let conductor = SessionConductor::new(Duration::from_secs(2));
    let a = conductor
        .create_with_controller(PathBuf::from("a.exe"), seeded_process(0))
        .await
        .unwrap();
    let b = conductor
        .create_with_controller(PathBuf::from("b.exe"), seeded_process(7))
        .await
        .unwrap();

    let stopped_a = conductor.run(a).await.unwrap();
    let stopped_b = conductor.run(b).await.unwrap();
    assert_eq!(stopped_a.stop_reason, Some(StopReason::Entry));
    assert_eq!(stopped_b.stop_reason, Some(StopReason::Entry));

    conductor.continue_session(a).await.unwrap();
    wait_for_exit(&conductor, a).await;

    // b is untouched by a's continue/exit.
    let b_state = conductor.state(b).await.unwrap();
    assert_eq!(b_state.status, Status::Stopped);

    conductor.continue_session(b).await.unwrap();
    wait_for_exit(&conductor, b).await;

    conductor.close(a).await.unwrap();
    conductor.close(b).await.unwrap();
}
