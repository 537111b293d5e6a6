//! Shared builders for integration tests

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use evalcore::bytecode::ArtifactState;
use evalcore::{
    CodeUnit, CodeUnitBuilder, CompileOutcome, CompiledArtifact, Frame, Opcode, RuntimeConfig,
    Value, VmResult,
};

/// sum_to(n) = 1 + 2 + ... + n
pub fn sum_to() -> Arc<CodeUnit> {
    let mut b = CodeUnitBuilder::new("sum_to");
    b.set_arity(1);
    b.set_local_count(3);
    b.emit_int(0);
    b.emit_byte(Opcode::StoreLocal, 1);
    b.emit_int(1);
    b.emit_byte(Opcode::StoreLocal, 2);
    let top = b.current_offset();
    b.emit_byte(Opcode::LoadLocal, 2);
    b.emit_byte(Opcode::LoadLocal, 0);
    b.emit(Opcode::Le);
    let exit = b.emit_jump(Opcode::JumpIfFalse);
    b.emit_byte(Opcode::LoadLocal, 1);
    b.emit_byte(Opcode::LoadLocal, 2);
    b.emit(Opcode::Add);
    b.emit_byte(Opcode::StoreLocal, 1);
    b.emit_byte(Opcode::LoadLocal, 2);
    b.emit_int(1);
    b.emit(Opcode::Add);
    b.emit_byte(Opcode::StoreLocal, 2);
    b.emit_loop(top);
    b.patch_jump(exit);
    b.emit_byte(Opcode::LoadLocal, 1);
    b.emit(Opcode::Return);
    b.build_arc()
}

/// A unit that returns `n` when interpreted
pub fn constant(name: &str, n: i64) -> Arc<CodeUnit> {
    let mut b = CodeUnitBuilder::new(name);
    b.emit_int(n);
    b.emit(Opcode::Return);
    b.build_arc()
}

/// Entry point of artifacts built by [`CountingCompiler`]: returns the state
pub fn return_state(state: &ArtifactState, _: &mut Frame) -> VmResult<Value> {
    let n = state.downcast_ref::<i64>().copied().unwrap_or_default();
    Ok(Value::Int(n))
}

/// What [`CountingCompiler`] answers
#[derive(Debug, Clone, Copy)]
pub enum Answer {
    /// An artifact returning this value
    Compile(i64),
    Decline,
    Fail,
}

/// A compiler that counts how often it is invoked
#[derive(Clone)]
pub struct CountingCompiler {
    pub calls: Arc<AtomicUsize>,
    pub answer: Answer,
}

impl CountingCompiler {
    pub fn new(answer: Answer) -> Self {
        Self {
            calls: Arc::new(AtomicUsize::new(0)),
            answer,
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn compile(&self, _: &CodeUnit) -> CompileOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.answer {
            Answer::Compile(n) => CompileOutcome::Compiled(CompiledArtifact::new(return_state, n)),
            Answer::Decline => CompileOutcome::Declined,
            Answer::Fail => CompileOutcome::Failed("unsupported construct".into()),
        }
    }
}

/// Configuration with a short switch interval so tests hand over quickly
pub fn fast_switching() -> RuntimeConfig {
    RuntimeConfig {
        switch_interval_us: 200,
        ..RuntimeConfig::default()
    }
}
