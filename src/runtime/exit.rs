//! Non-returning exits: thread termination during shutdown and fatal errors

use std::panic;

use tracing::error;

use super::error::ConsistencyViolation;

/// Unwind payload used to terminate a thread while another context finalizes
///
/// [`Runtime::spawn`](super::Runtime::spawn) recognizes it and reports the
/// thread as exited instead of panicked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThreadExit;

/// Terminate the calling thread
///
/// Unwinds without running the panic hook. Nothing up the stack observes a
/// return; only `catch_unwind` at the thread root sees the [`ThreadExit`]
/// payload.
pub fn exit_thread() -> ! {
    panic::resume_unwind(Box::new(ThreadExit))
}

/// Whether an unwind payload is a [`ThreadExit`]
pub fn is_thread_exit(payload: &(dyn std::any::Any + Send)) -> bool {
    payload.is::<ThreadExit>()
}

/// Report an unrecoverable protocol violation and abort the process
pub fn fatal_error(violation: ConsistencyViolation) -> ! {
    error!(target: "evalcore::fatal", %violation, "fatal runtime error");
    eprintln!("Fatal runtime error: {}", violation);
    std::process::abort()
}
