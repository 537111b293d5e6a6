//! Type definitions for the bytecode VM.
//!
//! This module contains the core types used throughout the VM:
//! - VmError: Error types that can occur during execution
//! - Frame: Activation record of one code unit invocation
//! - VmConfig: VM configuration options

use std::sync::Arc;

use serde::Deserialize;
use thiserror::Error;

use crate::bytecode::code::CodeUnit;
use crate::bytecode::value::{ExceptionRef, Value};

/// Result of VM execution
pub type VmResult<T> = Result<T, VmError>;

/// Errors that can occur during VM execution
#[derive(Debug, Clone, Error)]
pub enum VmError {
    /// A managed exception is propagating
    #[error("{0}")]
    Raised(ExceptionRef),
    /// Stack underflow
    #[error("Stack underflow")]
    StackUnderflow,
    /// Invalid opcode byte
    #[error("Invalid opcode: 0x{0:02x}")]
    InvalidOpcode(u8),
    /// Invalid constant index
    #[error("Invalid constant index: {0}")]
    InvalidConstant(u16),
    /// Invalid local variable index
    #[error("Invalid local variable index: {0}")]
    InvalidLocal(u16),
    /// Invalid callee index
    #[error("Invalid callee index: {0}")]
    InvalidCallee(u16),
    /// Invalid native function index
    #[error("Invalid native function index: {0}")]
    InvalidNative(u16),
    /// Type error in operation
    #[error("Type error: expected {expected}, got {got}")]
    TypeError { expected: &'static str, got: &'static str },
    /// Division by zero
    #[error("Division by zero")]
    DivisionByZero,
    /// Arithmetic overflow (e.g., i64::MIN / -1)
    #[error("Arithmetic overflow")]
    ArithmeticOverflow,
    /// Instruction pointer out of bounds
    #[error("Instruction pointer out of bounds")]
    IpOutOfBounds,
    /// Call depth exceeded `max_call_depth`
    #[error("Call stack overflow")]
    CallStackOverflow,
    /// Value stack exceeded `max_value_stack`
    #[error("Value stack overflow")]
    ValueStackOverflow,
    /// Wrong number of arguments for a code unit
    #[error("Arity mismatch: expected {expected} arguments, got {got}")]
    ArityMismatch { expected: u8, got: usize },
}

impl VmError {
    /// The exception carried by a `Raised` error
    pub fn exception(&self) -> Option<&ExceptionRef> {
        match self {
            Self::Raised(exc) => Some(exc),
            _ => None,
        }
    }
}

impl From<ExceptionRef> for VmError {
    fn from(exc: ExceptionRef) -> Self {
        Self::Raised(exc)
    }
}

/// Activation record of one code unit invocation
///
/// Arguments occupy the first `arity` local slots. Compiled artifacts receive
/// the same frame the interpreter would have run.
#[derive(Debug)]
pub struct Frame {
    /// The unit being executed
    pub unit: Arc<CodeUnit>,
    /// Local slots, parameters first
    pub locals: Vec<Value>,
    /// Operand stack
    pub stack: Vec<Value>,
    /// Instruction pointer
    pub ip: usize,
}

impl Frame {
    /// Prepare a frame for `unit` with the given arguments
    pub fn new(unit: Arc<CodeUnit>, args: &[Value]) -> VmResult<Self> {
        if args.len() != unit.arity() as usize {
            return Err(VmError::ArityMismatch {
                expected: unit.arity(),
                got: args.len(),
            });
        }

        let slots = (unit.local_count() as usize).max(args.len());
        let mut locals = Vec::with_capacity(slots);
        locals.extend_from_slice(args);
        locals.resize(slots, Value::Nil);

        Ok(Self {
            unit,
            locals,
            stack: Vec::with_capacity(16),
            ip: 0,
        })
    }

    /// Argument `index`, or Nil if out of range
    #[inline]
    pub fn arg(&self, index: usize) -> &Value {
        const NIL: &Value = &Value::Nil;
        self.locals.get(index).unwrap_or(NIL)
    }
}

/// Configuration for the VM
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct VmConfig {
    /// Maximum value stack size per frame
    pub max_value_stack: usize,
    /// Maximum nesting of `Call`
    pub max_call_depth: usize,
    /// Enable per-instruction tracing
    pub trace: bool,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            max_value_stack: 65536,
            max_call_depth: 1024,
            trace: false,
        }
    }
}
