//! Execution contexts
//!
//! One context per OS thread admitted to the runtime. A context carries the
//! single-slot asynchronous exception cell and whether it is currently
//! attached to its thread.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::bytecode::value::ExceptionRef;

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique context identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextId(u64);

impl ContextId {
    fn next() -> Self {
        Self(NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw identifier (never 0)
    #[inline]
    pub fn as_u64(self) -> u64 {
        self.0
    }

    pub(crate) fn from_raw(raw: u64) -> Option<Self> {
        (raw != 0).then_some(Self(raw))
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx#{}", self.0)
    }
}

/// Per-thread execution state
pub struct ExecutionContext {
    id: ContextId,
    name: Option<String>,
    async_exc: Mutex<Option<ExceptionRef>>,
    attached: AtomicBool,
    in_use: AtomicBool,
}

impl ExecutionContext {
    pub(crate) fn new(name: Option<String>) -> Self {
        Self {
            id: ContextId::next(),
            name,
            async_exc: Mutex::new(None),
            attached: AtomicBool::new(false),
            in_use: AtomicBool::new(false),
        }
    }

    #[inline]
    pub fn id(&self) -> ContextId {
        self.id
    }

    #[inline]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Whether the context is bound to a thread's active slot
    #[inline]
    pub fn is_attached(&self) -> bool {
        self.attached.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn set_attached(&self, attached: bool) {
        self.attached.store(attached, Ordering::Release);
    }

    /// Whether an asynchronous exception is waiting to be raised here
    pub fn has_async_exc(&self) -> bool {
        self.async_exc.lock().is_some()
    }

    /// The async exception cell; callers keep the runtime's pending count in step
    pub(crate) fn async_exc_slot(&self) -> &Mutex<Option<ExceptionRef>> {
        &self.async_exc
    }

    /// Mark the context as running a session, false if it already is
    pub(crate) fn claim(&self) -> bool {
        self.in_use
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
    }

    pub(crate) fn unclaim(&self) {
        self.in_use.store(false, Ordering::Release);
    }
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("attached", &self.is_attached())
            .finish()
    }
}
