//! Process-wide runtime state
//!
//! A [`Runtime`] owns the execution lock, the needs-attention flag, the
//! pending call queue, the compilation gate and the registry of execution
//! contexts. Threads join it by entering a context, which yields a
//! [`Session`]; sessions run code units and cooperate through the lock's
//! pulse protocol.
//!
//! Shutdown: the context that calls [`Runtime::begin_finalization`] becomes
//! the finalizer. Any other context that acquires the lock afterwards,
//! whether entering or coming back from a pulse, releases it again and its
//! thread exits without returning to managed code.

pub mod active;
pub mod attention;
pub mod context;
pub mod error;
pub mod exit;
pub mod lock;
pub mod pending;
pub mod session;
pub mod stats;

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, info};

pub use active::ActiveToken;
pub use attention::Attention;
pub use context::{ContextId, ExecutionContext};
pub use error::{ConsistencyViolation, PendingCallError};
pub use exit::{exit_thread, fatal_error, ThreadExit};
pub use lock::ExecutionLock;
pub use pending::{PendingCall, PendingCalls};
pub use session::Session;
pub use stats::{Counters, RuntimeStats};

use crate::bytecode::artifact::Compiler;
use crate::bytecode::gate::CompilationGate;
use crate::bytecode::value::ExceptionRef;
use crate::bytecode::vm::VmResult;
use crate::config::RuntimeConfig;

/// The runtime
pub struct Runtime {
    config: RuntimeConfig,
    attention: Arc<Attention>,
    lock: ExecutionLock,
    pending: PendingCalls,
    gate: CompilationGate,
    contexts: DashMap<ContextId, Arc<ExecutionContext>>,
    /// Raw id of the finalizing context, 0 while running
    finalizer: AtomicU64,
    /// Number of contexts with an async exception pending
    async_pending: Mutex<usize>,
    counters: Arc<Counters>,
}

impl Runtime {
    /// Create a runtime without a compiler; every unit is interpreted
    pub fn new(config: RuntimeConfig) -> Arc<Self> {
        Self::build(config, None)
    }

    /// Create a runtime that consults `compiler` for each code unit
    pub fn with_compiler(config: RuntimeConfig, compiler: impl Compiler + 'static) -> Arc<Self> {
        Self::build(config, Some(Arc::new(compiler)))
    }

    fn build(config: RuntimeConfig, compiler: Option<Arc<dyn Compiler>>) -> Arc<Self> {
        let attention = Arc::new(Attention::new());
        let counters = Arc::new(Counters::default());
        let lock = ExecutionLock::new(
            config.switch_interval(),
            config.force_switching,
            Arc::clone(&attention),
            Arc::clone(&counters),
        );
        let pending = PendingCalls::new(
            config.pending_calls_capacity.max(1),
            Arc::clone(&attention),
            Arc::clone(&counters),
        );
        let gate = CompilationGate::new(compiler, config.compile_threshold, Arc::clone(&counters));

        Arc::new(Self {
            config,
            attention,
            lock,
            pending,
            gate,
            contexts: DashMap::new(),
            finalizer: AtomicU64::new(0),
            async_pending: Mutex::new(0),
            counters,
        })
    }

    // === Accessors ===

    #[inline]
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    #[inline]
    pub fn attention(&self) -> &Attention {
        &self.attention
    }

    #[inline]
    pub fn lock(&self) -> &ExecutionLock {
        &self.lock
    }

    #[inline]
    pub fn gate(&self) -> &CompilationGate {
        &self.gate
    }

    #[inline]
    pub fn pending_calls(&self) -> &PendingCalls {
        &self.pending
    }

    #[inline]
    pub fn counters(&self) -> &Counters {
        &self.counters
    }

    /// Snapshot of the runtime counters
    pub fn stats(&self) -> RuntimeStats {
        self.counters.snapshot()
    }

    pub fn reset_stats(&self) {
        self.counters.reset();
    }

    // === Contexts ===

    /// Register a new execution context
    pub fn new_context(&self, name: Option<String>) -> Arc<ExecutionContext> {
        let ctx = Arc::new(ExecutionContext::new(name));
        self.contexts.insert(ctx.id(), Arc::clone(&ctx));
        ctx
    }

    /// Look up a registered context
    pub fn context(&self, id: ContextId) -> Option<Arc<ExecutionContext>> {
        self.contexts.get(&id).map(|entry| Arc::clone(entry.value()))
    }

    /// Number of registered contexts
    pub fn context_count(&self) -> usize {
        self.contexts.len()
    }

    /// Unregister a context, discarding any pending async exception
    pub fn release_context(&self, id: ContextId) {
        if let Some((_, ctx)) = self.contexts.remove(&id) {
            self.replace_async_exc(&ctx, None);
        }
    }

    /// Acquire the execution lock for `ctx` and attach it to this thread
    ///
    /// Blocks until the lock is free. If another context is finalizing the
    /// runtime, the calling thread exits instead of returning.
    pub fn enter(&self, ctx: &Arc<ExecutionContext>) -> Result<Session<'_>, ConsistencyViolation> {
        if let Some(found) = active::current() {
            return Err(ConsistencyViolation::OrphanContext {
                attaching: ctx.id(),
                found: found.id(),
            });
        }
        if !ctx.claim() {
            return Err(ConsistencyViolation::Reentrant(ctx.id()));
        }

        self.acquire(ctx);
        match ActiveToken::attach(Arc::clone(ctx)) {
            Ok(token) => Ok(Session::new(self, Arc::clone(ctx), token)),
            Err(violation) => {
                let _ = self.lock.release(ctx.id());
                ctx.unclaim();
                Err(violation)
            }
        }
    }

    /// Take the lock for `ctx`, or exit the thread if someone else finalizes
    pub(crate) fn acquire(&self, ctx: &ExecutionContext) {
        if let Err(violation) = self.lock.take(ctx.id()) {
            fatal_error(violation);
        }

        if let Some(finalizer) = self.finalizer() {
            if finalizer != ctx.id() {
                if let Err(violation) = self.lock.release(ctx.id()) {
                    fatal_error(violation);
                }
                Counters::bump(&self.counters.threads_exited);
                debug!(target: "evalcore::lock", context = %ctx.id(), %finalizer, "runtime finalizing, exiting thread");
                ctx.unclaim();
                exit_thread();
            }
        }
    }

    /// Run `f` on a new OS thread inside a fresh context
    ///
    /// The thread's result is `None` if it was terminated because another
    /// context finalized the runtime.
    pub fn spawn<F, R>(
        self: &Arc<Self>,
        name: impl Into<String>,
        f: F,
    ) -> std::io::Result<ContextThread<R>>
    where
        F: FnOnce(&mut Session<'_>) -> R + Send + 'static,
        R: Send + 'static,
    {
        let name = name.into();
        let ctx = self.new_context(Some(name.clone()));
        let id = ctx.id();
        let runtime = Arc::clone(self);

        let spawned = std::thread::Builder::new().name(name).spawn(move || {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                let mut session = runtime
                    .enter(&ctx)
                    .unwrap_or_else(|violation| fatal_error(violation));
                f(&mut session)
            }));
            runtime.release_context(ctx.id());
            match outcome {
                Ok(result) => Some(result),
                Err(payload) if exit::is_thread_exit(payload.as_ref()) => None,
                Err(payload) => panic::resume_unwind(payload),
            }
        });

        match spawned {
            Ok(handle) => Ok(ContextThread { id, handle }),
            Err(e) => {
                self.release_context(id);
                Err(e)
            }
        }
    }

    // === Lock drop requests ===

    /// Ask the lock holder to release at its next instruction boundary
    pub fn request_drop(&self) {
        self.lock.request_drop();
    }

    // === Pending calls ===

    /// Queue a callback to run in whichever context next reaches a boundary
    pub fn add_pending_call<F>(&self, call: F) -> Result<(), PendingCallError>
    where
        F: FnOnce() -> VmResult<()> + Send + 'static,
    {
        if self.is_finalizing() {
            return Err(PendingCallError::Finalizing);
        }
        self.pending.add(Box::new(call))
    }

    // === Asynchronous exceptions ===

    /// Install (or with `None`, clear) the pending async exception of `id`
    ///
    /// Returns the number of contexts modified: 1, or 0 if `id` is unknown.
    pub fn set_async_exc(&self, id: ContextId, exc: Option<ExceptionRef>) -> usize {
        let Some(ctx) = self.context(id) else {
            return 0;
        };
        debug!(target: "evalcore::async_exc", context = %id, set = exc.is_some(), "set async exception");
        self.replace_async_exc(&ctx, exc);
        1
    }

    /// Take the pending async exception of `ctx`, clearing its slot
    pub fn take_async_exc(&self, ctx: &ExecutionContext) -> Option<ExceptionRef> {
        self.replace_async_exc(ctx, None)
    }

    fn replace_async_exc(
        &self,
        ctx: &ExecutionContext,
        exc: Option<ExceptionRef>,
    ) -> Option<ExceptionRef> {
        let mut slot = ctx.async_exc_slot().lock();
        let had = slot.is_some();
        let previous = std::mem::replace(&mut *slot, exc);
        let has = slot.is_some();

        if had != has {
            let mut pending = self.async_pending.lock();
            if has {
                *pending += 1;
            } else {
                *pending = pending.saturating_sub(1);
            }
            self.attention.assign(Attention::ASYNC_EXC, *pending > 0);
        }
        previous
    }

    // === Finalization ===

    /// Make the session's context the finalizer
    ///
    /// From now on every other context that acquires the execution lock
    /// exits its thread. Returns false if finalization had already begun.
    pub fn begin_finalization(&self, session: &Session<'_>) -> bool {
        let id = session.id();
        let started = self
            .finalizer
            .compare_exchange(0, id.as_u64(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if started {
            info!(target: "evalcore::runtime", finalizer = %id, contexts = self.contexts.len(), "finalization started");
        }
        started
    }

    /// The finalizing context, if shutdown has begun
    pub fn finalizer(&self) -> Option<ContextId> {
        ContextId::from_raw(self.finalizer.load(Ordering::Acquire))
    }

    #[inline]
    pub fn is_finalizing(&self) -> bool {
        self.finalizer.load(Ordering::Acquire) != 0
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("lock", &self.lock)
            .field("gate", &self.gate)
            .field("contexts", &self.contexts.len())
            .field("finalizer", &self.finalizer())
            .finish()
    }
}

/// A thread started by [`Runtime::spawn`]
#[derive(Debug)]
pub struct ContextThread<R> {
    id: ContextId,
    handle: JoinHandle<Option<R>>,
}

impl<R> ContextThread<R> {
    /// The context the thread runs in
    pub fn id(&self) -> ContextId {
        self.id
    }

    /// Wait for the thread; `Ok(None)` means it exited during finalization
    pub fn join(self) -> std::thread::Result<Option<R>> {
        self.handle.join()
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::value::Exception;

    #[test]
    fn test_enter_and_leave() {
        let runtime = Runtime::new(RuntimeConfig::default());
        let ctx = runtime.new_context(Some("main".into()));
        {
            let session = runtime.enter(&ctx).expect("free");
            assert_eq!(runtime.lock().holder(), Some(session.id()));
            assert!(ctx.is_attached());
        }
        assert_eq!(runtime.lock().holder(), None);
        assert!(!ctx.is_attached());
    }

    #[test]
    fn test_enter_twice_on_one_thread() {
        let runtime = Runtime::new(RuntimeConfig::default());
        let a = runtime.new_context(None);
        let b = runtime.new_context(None);
        let _session = runtime.enter(&a).expect("free");
        assert!(matches!(
            runtime.enter(&b),
            Err(ConsistencyViolation::OrphanContext { .. })
        ));
    }

    #[test]
    fn test_async_exc_bookkeeping() {
        let runtime = Runtime::new(RuntimeConfig::default());
        let ctx = runtime.new_context(None);
        let exc = Exception::shared("KeyboardInterrupt", "");

        assert_eq!(runtime.set_async_exc(ctx.id(), Some(Arc::clone(&exc))), 1);
        assert!(ctx.has_async_exc());
        assert!(runtime.attention().contains(Attention::ASYNC_EXC));

        // Replacing keeps a single slot
        let replacement = Exception::shared("SystemExit", "");
        runtime.set_async_exc(ctx.id(), Some(Arc::clone(&replacement)));
        let taken = runtime.take_async_exc(&ctx).expect("pending");
        assert!(Arc::ptr_eq(&taken, &replacement));
        assert!(!runtime.attention().contains(Attention::ASYNC_EXC));
        assert!(runtime.take_async_exc(&ctx).is_none());
    }

    #[test]
    fn test_async_exc_clear_and_unknown() {
        let runtime = Runtime::new(RuntimeConfig::default());
        let ctx = runtime.new_context(None);
        runtime.set_async_exc(ctx.id(), Some(Exception::shared("KeyboardInterrupt", "")));
        assert_eq!(runtime.set_async_exc(ctx.id(), None), 1);
        assert!(!ctx.has_async_exc());
        assert!(!runtime.attention().is_raised());

        runtime.release_context(ctx.id());
        assert_eq!(runtime.set_async_exc(ctx.id(), None), 0);
    }

    #[test]
    fn test_pending_call_rejected_while_finalizing() {
        let runtime = Runtime::new(RuntimeConfig::default());
        let ctx = runtime.new_context(None);
        let session = runtime.enter(&ctx).expect("free");
        assert!(runtime.begin_finalization(&session));
        assert!(!runtime.begin_finalization(&session));
        assert_eq!(runtime.finalizer(), Some(ctx.id()));
        assert_eq!(
            runtime.add_pending_call(|| Ok(())),
            Err(PendingCallError::Finalizing)
        );
    }
}
