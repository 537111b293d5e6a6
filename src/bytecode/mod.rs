//! Bytecode execution
//!
//! Code units, their per-unit compilation slot, the gate that consults the
//! external compiler, the dispatcher and the interpreter loop.

pub mod artifact;
pub mod code;
pub mod compile_slot;
pub mod dispatch;
pub mod gate;
pub mod opcodes;
pub mod value;
pub mod vm;

pub use artifact::{ArtifactState, CompileOutcome, CompiledArtifact, Compiler, EntryFn};
pub use code::{CodeUnit, CodeUnitBuilder, JumpLabel, NativeEntry, NativeFn};
pub use compile_slot::{CompileSlot, SlotState};
pub use dispatch::eval_frame;
pub use gate::CompilationGate;
pub use opcodes::Opcode;
pub use value::{Exception, ExceptionRef, Value};
pub use vm::{Frame, Interpreter, VmConfig, VmError, VmResult};
