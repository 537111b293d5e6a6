//! Compiled artifacts and the external compiler contract
//!
//! The runtime never generates machine code itself. An external [`Compiler`]
//! turns a [`CodeUnit`] into a [`CompiledArtifact`]: an entry point plus
//! whatever state the compiler needs to run it. The dispatcher calls the entry
//! point in place of the interpreter and returns its result unchanged.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use super::code::CodeUnit;
use super::value::Value;
use super::vm::{Frame, VmResult};

/// Opaque compiler-owned state carried by an artifact
pub type ArtifactState = dyn Any + Send + Sync;

/// Entry point of a compiled artifact
///
/// Receives the artifact's own state and the frame prepared for the
/// invocation (arguments already in the local slots).
pub type EntryFn = fn(&ArtifactState, &mut Frame) -> VmResult<Value>;

/// The result of compiling a code unit
pub struct CompiledArtifact {
    entry: EntryFn,
    state: Arc<ArtifactState>,
}

impl CompiledArtifact {
    /// Create an artifact from an entry point and its state
    pub fn new<S: Any + Send + Sync>(entry: EntryFn, state: S) -> Self {
        Self {
            entry,
            state: Arc::new(state),
        }
    }

    /// Create an artifact with no state
    pub fn stateless(entry: EntryFn) -> Self {
        Self::new(entry, ())
    }

    /// Run the artifact on a prepared frame
    #[inline]
    pub fn invoke(&self, frame: &mut Frame) -> VmResult<Value> {
        (self.entry)(self.state.as_ref(), frame)
    }

    /// Borrow the compiler-owned state, downcast to its concrete type
    pub fn state<S: Any>(&self) -> Option<&S> {
        self.state.downcast_ref::<S>()
    }
}

impl fmt::Debug for CompiledArtifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledArtifact")
            .field("entry", &(self.entry as usize as *const ()))
            .finish_non_exhaustive()
    }
}

/// What a compiler made of a code unit
#[derive(Debug)]
pub enum CompileOutcome {
    /// Compilation succeeded
    Compiled(CompiledArtifact),
    /// The compiler does not handle this unit
    Declined,
    /// The compiler tried and failed
    Failed(String),
}

/// External just-in-time compiler
///
/// Called at most once per code unit. Any closure with the right signature
/// implements this trait.
pub trait Compiler: Send + Sync {
    /// Compile a code unit
    fn compile(&self, unit: &CodeUnit) -> CompileOutcome;
}

impl<F> Compiler for F
where
    F: Fn(&CodeUnit) -> CompileOutcome + Send + Sync,
{
    fn compile(&self, unit: &CodeUnit) -> CompileOutcome {
        self(unit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::code::CodeUnitBuilder;

    fn answer(state: &ArtifactState, _frame: &mut Frame) -> VmResult<Value> {
        let n = state.downcast_ref::<i64>().copied().unwrap_or_default();
        Ok(Value::Int(n))
    }

    #[test]
    fn test_invoke_passes_state() {
        let artifact = CompiledArtifact::new(answer, 42i64);
        let unit = CodeUnitBuilder::new("answer").build_arc();
        let mut frame = Frame::new(unit, &[]).expect("arity 0");
        assert_eq!(artifact.invoke(&mut frame).expect("ok"), Value::Int(42));
        assert_eq!(artifact.state::<i64>(), Some(&42));
        assert_eq!(artifact.state::<u8>(), None);
    }

    #[test]
    fn test_closure_is_compiler() {
        let compiler = |unit: &CodeUnit| {
            if unit.name() == "hot" {
                CompileOutcome::Compiled(CompiledArtifact::stateless(answer))
            } else {
                CompileOutcome::Declined
            }
        };
        let hot = CodeUnitBuilder::new("hot").build();
        let cold = CodeUnitBuilder::new("cold").build();
        assert!(matches!(compiler.compile(&hot), CompileOutcome::Compiled(_)));
        assert!(matches!(compiler.compile(&cold), CompileOutcome::Declined));
    }
}
