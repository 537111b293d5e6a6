//! Per-code-unit compilation state
//!
//! Every [`CodeUnit`](super::CodeUnit) owns one `CompileSlot`. The slot is the
//! single synchronized cell holding the outcome of JIT compilation:
//!
//! ```text
//!               try_begin (CAS)          install
//! Uncompiled ───────────────────▶ Compiling ───────▶ Compiled(artifact)
//!                                     │
//!                                     │ fail
//!                                     ▼
//!                                   Failed
//! ```
//!
//! `Compiled` and `Failed` are terminal. Only the context that won the
//! `Uncompiled → Compiling` race may move the slot out of `Compiling`, so at
//! most one artifact is ever installed and `Failed` can never be recorded once
//! an artifact exists.

use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};

use super::artifact::CompiledArtifact;

/// Invocation counts saturate here instead of wrapping
pub const MAX_INVOCATION_COUNT: u32 = u32::MAX - 1;

/// Compilation state of a code unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SlotState {
    /// No compilation attempted yet
    Uncompiled = 0,
    /// A context won the race and is running the compiler
    Compiling = 1,
    /// An artifact is installed and used for every invocation
    Compiled = 2,
    /// The compiler declined or failed; interpret forever
    Failed = 3,
}

impl From<u8> for SlotState {
    fn from(v: u8) -> Self {
        match v {
            0 => SlotState::Uncompiled,
            1 => SlotState::Compiling,
            2 => SlotState::Compiled,
            3 => SlotState::Failed,
            _ => SlotState::Uncompiled,
        }
    }
}

/// Compilation slot attached to a code unit
///
/// All fields use atomic operations; the artifact is write-once via
/// `OnceLock` so reads after installation are lock-free.
pub struct CompileSlot {
    state: AtomicU8,
    artifact: OnceLock<Arc<CompiledArtifact>>,
    invocations: AtomicU32,
}

impl CompileSlot {
    /// Create an uncompiled slot
    pub const fn new() -> Self {
        Self {
            state: AtomicU8::new(SlotState::Uncompiled as u8),
            artifact: OnceLock::new(),
            invocations: AtomicU32::new(0),
        }
    }

    /// Current state
    #[inline]
    pub fn state(&self) -> SlotState {
        SlotState::from(self.state.load(Ordering::Acquire))
    }

    /// The installed artifact, if compilation succeeded
    #[inline]
    pub fn artifact(&self) -> Option<Arc<CompiledArtifact>> {
        if self.state() == SlotState::Compiled {
            self.artifact.get().cloned()
        } else {
            None
        }
    }

    /// True once compilation has permanently failed
    #[inline]
    pub fn is_failed(&self) -> bool {
        self.state() == SlotState::Failed
    }

    /// Try to move from `Uncompiled` to `Compiling`
    ///
    /// Returns true if this caller won the race and must finish with
    /// [`install`](Self::install) or [`fail`](Self::fail).
    #[inline]
    pub fn try_begin(&self) -> bool {
        self.state
            .compare_exchange(
                SlotState::Uncompiled as u8,
                SlotState::Compiling as u8,
                Ordering::AcqRel,
                Ordering::Relaxed,
            )
            .is_ok()
    }

    /// Install the compiled artifact and publish the `Compiled` state
    ///
    /// Returns the artifact that is now installed. The write-once cell keeps
    /// the first artifact if this is ever called twice.
    pub fn install(&self, artifact: Arc<CompiledArtifact>) -> Arc<CompiledArtifact> {
        let installed = Arc::clone(self.artifact.get_or_init(|| artifact));
        let published = self.state.compare_exchange(
            SlotState::Compiling as u8,
            SlotState::Compiled as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        debug_assert!(
            published.is_ok() || published == Err(SlotState::Compiled as u8),
            "install without winning the compile race"
        );
        installed
    }

    /// Mark compilation as permanently failed
    ///
    /// Has no effect unless the slot is `Compiling`; in particular an
    /// installed artifact is never downgraded.
    pub fn fail(&self) {
        let _ = self.state.compare_exchange(
            SlotState::Compiling as u8,
            SlotState::Failed as u8,
            Ordering::AcqRel,
            Ordering::Relaxed,
        );
    }

    /// Count one dispatch of the owning code unit, returns the new count
    #[inline]
    pub fn record_invocation(&self) -> u32 {
        let count = self.invocations.load(Ordering::Relaxed);
        if count >= MAX_INVOCATION_COUNT {
            return count;
        }
        self.invocations.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Number of recorded dispatches
    #[inline]
    pub fn invocations(&self) -> u32 {
        self.invocations.load(Ordering::Relaxed)
    }
}

impl Default for CompileSlot {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CompileSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompileSlot")
            .field("state", &self.state())
            .field("invocations", &self.invocations())
            .finish()
    }
}
