//! evalcore - Execution core of a managed bytecode runtime
//!
//! This library runs code units either as externally compiled artifacts or in
//! a bytecode interpreter loop, and lets several OS threads share a single
//! global execution lock cooperatively.
//!
//! # Architecture
//!
//! 1. **Dispatch** (`bytecode` module)
//!    - Each [`CodeUnit`] carries a compilation slot
//!    - The [`CompilationGate`](bytecode::CompilationGate) calls the external
//!      [`Compiler`] at most once per unit and falls back to interpretation
//!      for good if it declines or fails
//!    - The interpreter checks the needs-attention flag before every
//!      instruction with a single relaxed atomic load
//!
//! 2. **Scheduling** (`runtime` module)
//!    - One [`ExecutionLock`] serializes managed code
//!    - Waiting contexts request a drop after the switch interval; the holder
//!      answers with a pulse (detach, release, reacquire, reattach)
//!    - Pending calls and asynchronous exceptions are delivered at instruction
//!      boundaries
//!    - During finalization, threads other than the finalizer exit when they
//!      next acquire the lock
//!
//! # Example
//!
//! ```rust
//! use evalcore::{CodeUnitBuilder, Opcode, Runtime, RuntimeConfig, Value};
//!
//! // add(a, b) = a + b
//! let mut b = CodeUnitBuilder::new("add");
//! b.set_arity(2);
//! b.emit_byte(Opcode::LoadLocal, 0);
//! b.emit_byte(Opcode::LoadLocal, 1);
//! b.emit(Opcode::Add);
//! b.emit(Opcode::Return);
//! let add = b.build_arc();
//!
//! let runtime = Runtime::new(RuntimeConfig::default());
//! let ctx = runtime.new_context(Some("main".into()));
//! let mut session = runtime.enter(&ctx).unwrap();
//! let sum = session.call(&add, &[Value::Int(2), Value::Int(40)]).unwrap();
//! assert_eq!(sum, Value::Int(42));
//! ```
//!
//! # Logging
//!
//! All diagnostics go through `tracing` under `evalcore::*` targets. The
//! library never installs a subscriber.
//!
//! # Features
//!
//! - `pulse` (default): periodic work releases and reacquires the execution
//!   lock on request. Without it a context keeps the lock until its session
//!   ends.

pub mod bytecode;
pub mod config;
pub mod runtime;

pub use bytecode::{
    eval_frame, CodeUnit, CodeUnitBuilder, CompileOutcome, CompiledArtifact, Compiler,
    Exception, ExceptionRef, Frame, Opcode, Value, VmConfig, VmError, VmResult,
};
pub use config::{ConfigError, RuntimeConfig};
pub use runtime::{
    ConsistencyViolation, ContextId, ContextThread, ExecutionContext, ExecutionLock,
    PendingCallError, Runtime, RuntimeStats, Session,
};
