//! Sessions: a context running managed code on its thread
//!
//! A [`Session`] exists while a context holds the execution lock (outside of
//! pulse windows) and is attached to its thread. It owns the thread's
//! [`ActiveToken`], is the entry point for calls into code units and carries
//! out periodic work when the interpreter sees the attention flag raised.

use std::sync::Arc;

use tracing::debug;

use super::active::ActiveToken;
use super::attention::Attention;
use super::context::{ContextId, ExecutionContext};
use super::error::ConsistencyViolation;
use super::exit::fatal_error;
use super::stats::Counters;
use super::Runtime;
use crate::bytecode::code::CodeUnit;
use crate::bytecode::dispatch::eval_frame;
use crate::bytecode::value::Value;
use crate::bytecode::vm::{Frame, VmError, VmResult};

/// A context attached to the current thread and holding the execution lock
pub struct Session<'rt> {
    runtime: &'rt Runtime,
    ctx: Arc<ExecutionContext>,
    token: Option<ActiveToken>,
    holds_lock: bool,
    depth: usize,
}

impl<'rt> Session<'rt> {
    pub(crate) fn new(
        runtime: &'rt Runtime,
        ctx: Arc<ExecutionContext>,
        token: ActiveToken,
    ) -> Self {
        Self {
            runtime,
            ctx,
            token: Some(token),
            holds_lock: true,
            depth: 0,
        }
    }

    #[inline]
    pub fn runtime(&self) -> &'rt Runtime {
        self.runtime
    }

    #[inline]
    pub fn context(&self) -> &Arc<ExecutionContext> {
        &self.ctx
    }

    #[inline]
    pub fn id(&self) -> ContextId {
        self.ctx.id()
    }

    /// Current nesting of calls into code units
    #[inline]
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Call a code unit with `args`
    ///
    /// Every call, nested ones included, goes through the compilation gate.
    pub fn call(&mut self, unit: &Arc<CodeUnit>, args: &[Value]) -> VmResult<Value> {
        if self.depth >= self.runtime.config().vm.max_call_depth {
            return Err(VmError::CallStackOverflow);
        }
        let mut frame = Frame::new(Arc::clone(unit), args)?;

        self.depth += 1;
        let result = eval_frame(self, &mut frame);
        self.depth -= 1;
        result
    }

    /// Service the needs-attention flag
    ///
    /// In order: drain pending calls, pulse the execution lock, deliver a
    /// pending asynchronous exception. Stops at the first error.
    pub fn periodic_work(&mut self) -> VmResult<()> {
        let runtime = self.runtime;
        let attention = runtime.attention();

        if attention.contains(Attention::PENDING_CALLS) {
            runtime.pending_calls().drain()?;
        }

        #[cfg(feature = "pulse")]
        self.pulse();

        if attention.contains(Attention::ASYNC_EXC) {
            if let Some(exc) = runtime.take_async_exc(&self.ctx) {
                Counters::bump(&runtime.counters().async_exceptions_delivered);
                debug!(target: "evalcore::async_exc", context = %self.id(), exception = %exc, "raising asynchronous exception");
                return Err(VmError::Raised(exc));
            }
        }

        Ok(())
    }

    /// Release and reacquire the execution lock if a drop was requested
    ///
    /// May not return: if another context began finalizing while this one
    /// waited, the thread is terminated.
    pub fn pulse(&mut self) {
        let runtime = self.runtime;
        let lock = runtime.lock();
        if !lock.drop_requested() {
            lock.sync_attention();
            return;
        }

        let id = self.id();
        let Some(token) = self.token.take() else {
            fatal_error(ConsistencyViolation::ContextMismatch {
                expected: id,
                found: None,
            })
        };
        let ctx = token.detach().unwrap_or_else(|violation| fatal_error(violation));

        if let Err(violation) = lock.release(id) {
            fatal_error(violation);
        }
        self.holds_lock = false;

        // Other contexts run here
        runtime.acquire(&ctx);
        self.holds_lock = true;

        match ActiveToken::attach(ctx) {
            Ok(token) => self.token = Some(token),
            Err(violation) => fatal_error(violation),
        }
        Counters::bump(&runtime.counters().pulses);
        debug!(target: "evalcore::pulse", context = %id, "pulse complete");
    }
}

impl Drop for Session<'_> {
    fn drop(&mut self) {
        if let Some(token) = self.token.take() {
            if let Err(violation) = token.detach() {
                fatal_error(violation);
            }
        }
        if self.holds_lock {
            self.holds_lock = false;
            if let Err(violation) = self.runtime.lock().release(self.id()) {
                fatal_error(violation);
            }
        }
        self.ctx.unclaim();
    }
}

impl std::fmt::Debug for Session<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("context", &self.ctx.id())
            .field("holds_lock", &self.holds_lock)
            .field("depth", &self.depth)
            .finish()
    }
}
