//! Compilation gate
//!
//! Decides, per invocation, whether a code unit runs as a compiled artifact or
//! in the interpreter. The external compiler is called at most once per unit:
//! the first dispatcher to win the slot's `Uncompiled → Compiling` race calls
//! it, everyone else either finds the installed artifact or interprets.
//!
//! A compiler that declines or fails marks the unit permanently failed. This
//! is never an error for the caller; the unit simply stays interpreted.

use std::sync::Arc;

use tracing::{debug, warn};

use super::artifact::{CompileOutcome, CompiledArtifact, Compiler};
use super::code::CodeUnit;
use super::compile_slot::CompileSlot;
use crate::runtime::stats::Counters;

/// Per-runtime compilation gate
pub struct CompilationGate {
    compiler: Option<Arc<dyn Compiler>>,
    /// Invocations that interpret before the first compile attempt
    threshold: u32,
    counters: Arc<Counters>,
}

impl CompilationGate {
    pub(crate) fn new(
        compiler: Option<Arc<dyn Compiler>>,
        threshold: u32,
        counters: Arc<Counters>,
    ) -> Self {
        Self {
            compiler,
            threshold,
            counters,
        }
    }

    /// Whether an external compiler is installed
    #[inline]
    pub fn has_compiler(&self) -> bool {
        self.compiler.is_some()
    }

    /// Resolve the artifact to run for `unit`, compiling it if needed
    ///
    /// Returns `None` when the unit must be interpreted.
    pub fn resolve(&self, unit: &CodeUnit) -> Option<Arc<CompiledArtifact>> {
        let slot = unit.slot();

        // Fast path: already compiled
        if let Some(artifact) = slot.artifact() {
            return Some(artifact);
        }
        if slot.is_failed() {
            return None;
        }

        // No compiler is not a compilation failure
        let compiler = self.compiler.as_ref()?;

        if slot.record_invocation() <= self.threshold {
            return None;
        }

        if !slot.try_begin() {
            // Lost the race; use the artifact if the winner already finished
            return slot.artifact();
        }

        Counters::bump(&self.counters.compile_attempts);
        let guard = FailOnUnwind { slot };
        let outcome = compiler.compile(unit);
        std::mem::forget(guard);

        match outcome {
            CompileOutcome::Compiled(artifact) => {
                let installed = slot.install(Arc::new(artifact));
                Counters::bump(&self.counters.compile_successes);
                debug!(target: "evalcore::gate", unit = unit.name(), "compiled");
                Some(installed)
            }
            CompileOutcome::Declined => {
                slot.fail();
                Counters::bump(&self.counters.compile_declined);
                debug!(target: "evalcore::gate", unit = unit.name(), "compiler declined, interpreting");
                None
            }
            CompileOutcome::Failed(reason) => {
                slot.fail();
                Counters::bump(&self.counters.compile_failures);
                warn!(target: "evalcore::gate", unit = unit.name(), %reason, "compilation failed, interpreting");
                None
            }
        }
    }
}

impl std::fmt::Debug for CompilationGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompilationGate")
            .field("has_compiler", &self.has_compiler())
            .field("threshold", &self.threshold)
            .finish()
    }
}

/// Marks the slot failed if the compiler panics
struct FailOnUnwind<'a> {
    slot: &'a CompileSlot,
}

impl Drop for FailOnUnwind<'_> {
    fn drop(&mut self) {
        self.slot.fail();
    }
}
