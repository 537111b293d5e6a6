//! Runtime statistics
//!
//! Counters are plain atomics updated with `Relaxed` ordering; they are
//! diagnostics only and never used for synchronization.

use std::sync::atomic::{AtomicU64, Ordering};

/// Lock-free counters shared by the gate, the lock and the sessions
#[derive(Debug, Default)]
pub struct Counters {
    pub(crate) compiled_runs: AtomicU64,
    pub(crate) interpreted_runs: AtomicU64,
    pub(crate) compile_attempts: AtomicU64,
    pub(crate) compile_successes: AtomicU64,
    pub(crate) compile_declined: AtomicU64,
    pub(crate) compile_failures: AtomicU64,
    pub(crate) pulses: AtomicU64,
    pub(crate) timed_drop_requests: AtomicU64,
    pub(crate) async_exceptions_delivered: AtomicU64,
    pub(crate) pending_calls_run: AtomicU64,
    pub(crate) threads_exited: AtomicU64,
}

/// Snapshot of the runtime counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuntimeStats {
    /// Invocations served by a compiled artifact
    pub compiled_runs: u64,

    /// Invocations served by the interpreter loop
    pub interpreted_runs: u64,

    /// Calls made into the external compiler
    pub compile_attempts: u64,

    /// Compiler calls that produced an artifact
    pub compile_successes: u64,

    /// Compiler calls that declined the unit
    pub compile_declined: u64,

    /// Compiler calls that reported a failure
    pub compile_failures: u64,

    /// Completed lock pulses (release + reacquire)
    pub pulses: u64,

    /// Drop requests raised by a waiter after the switch interval elapsed
    pub timed_drop_requests: u64,

    /// Asynchronous exceptions raised in their target context
    pub async_exceptions_delivered: u64,

    /// Pending calls executed
    pub pending_calls_run: u64,

    /// Threads terminated because another context was finalizing
    pub threads_exited: u64,
}

impl Counters {
    #[inline]
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Take a snapshot
    pub fn snapshot(&self) -> RuntimeStats {
        RuntimeStats {
            compiled_runs: self.compiled_runs.load(Ordering::Relaxed),
            interpreted_runs: self.interpreted_runs.load(Ordering::Relaxed),
            compile_attempts: self.compile_attempts.load(Ordering::Relaxed),
            compile_successes: self.compile_successes.load(Ordering::Relaxed),
            compile_declined: self.compile_declined.load(Ordering::Relaxed),
            compile_failures: self.compile_failures.load(Ordering::Relaxed),
            pulses: self.pulses.load(Ordering::Relaxed),
            timed_drop_requests: self.timed_drop_requests.load(Ordering::Relaxed),
            async_exceptions_delivered: self.async_exceptions_delivered.load(Ordering::Relaxed),
            pending_calls_run: self.pending_calls_run.load(Ordering::Relaxed),
            threads_exited: self.threads_exited.load(Ordering::Relaxed),
        }
    }

    /// Reset all counters to zero
    pub fn reset(&self) {
        self.compiled_runs.store(0, Ordering::Relaxed);
        self.interpreted_runs.store(0, Ordering::Relaxed);
        self.compile_attempts.store(0, Ordering::Relaxed);
        self.compile_successes.store(0, Ordering::Relaxed);
        self.compile_declined.store(0, Ordering::Relaxed);
        self.compile_failures.store(0, Ordering::Relaxed);
        self.pulses.store(0, Ordering::Relaxed);
        self.timed_drop_requests.store(0, Ordering::Relaxed);
        self.async_exceptions_delivered.store(0, Ordering::Relaxed);
        self.pending_calls_run.store(0, Ordering::Relaxed);
        self.threads_exited.store(0, Ordering::Relaxed);
    }
}

impl std::fmt::Display for RuntimeStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "runs:       {} compiled, {} interpreted",
            self.compiled_runs, self.interpreted_runs
        )?;
        writeln!(
            f,
            "compiler:   {} attempts, {} compiled, {} declined, {} failed",
            self.compile_attempts,
            self.compile_successes,
            self.compile_declined,
            self.compile_failures
        )?;
        writeln!(
            f,
            "lock:       {} pulses, {} timed drop requests",
            self.pulses, self.timed_drop_requests
        )?;
        write!(
            f,
            "async:      {} exceptions, {} pending calls, {} threads exited",
            self.async_exceptions_delivered, self.pending_calls_run, self.threads_exited
        )
    }
}
