//! Tests for the bytecode interpreter.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use super::types::VmError;
use super::VmResult;
use crate::bytecode::code::{CodeUnit, CodeUnitBuilder};
use crate::bytecode::opcodes::Opcode;
use crate::bytecode::value::{Exception, Value};
use crate::config::RuntimeConfig;
use crate::runtime::Runtime;

fn run_with(config: RuntimeConfig, unit: &Arc<CodeUnit>, args: &[Value]) -> VmResult<Value> {
    let runtime = Runtime::new(config);
    let ctx = runtime.new_context(None);
    let mut session = runtime.enter(&ctx).expect("lock is free");
    session.call(unit, args)
}

fn run(unit: &Arc<CodeUnit>, args: &[Value]) -> VmResult<Value> {
    run_with(RuntimeConfig::default(), unit, args)
}

/// sum_to(n) = 1 + 2 + ... + n
fn sum_to() -> Arc<CodeUnit> {
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

fn binary(a: i64, b: i64, op: Opcode) -> Arc<CodeUnit> {
    let mut builder = CodeUnitBuilder::new("binary");
    builder.emit_int(a);
    builder.emit_int(b);
    builder.emit(op);
    builder.emit(Opcode::Return);
    builder.build_arc()
}

#[test]
fn test_vm_push_dup_add() {
    let mut builder = CodeUnitBuilder::new("test");
    builder.emit_int(42);
    builder.emit(Opcode::Dup);
    builder.emit(Opcode::Add);
    builder.emit(Opcode::Return);

    let result = run(&builder.build_arc(), &[]).expect("VM should succeed");
    assert_eq!(result, Value::Int(84));
}

#[test]
fn test_vm_arithmetic() {
    assert_eq!(run(&binary(10, 3, Opcode::Sub), &[]).unwrap(), Value::Int(7));
    assert_eq!(run(&binary(6, 7, Opcode::Mul), &[]).unwrap(), Value::Int(42));
    assert_eq!(run(&binary(-7, 2, Opcode::Div), &[]).unwrap(), Value::Int(-3));
    assert_eq!(run(&binary(-7, 2, Opcode::Mod), &[]).unwrap(), Value::Int(-1));
    assert_eq!(run(&binary(1000, 24, Opcode::Add), &[]).unwrap(), Value::Int(1024));
}

#[test]
fn test_vm_comparison() {
    assert_eq!(run(&binary(5, 10, Opcode::Lt), &[]).unwrap(), Value::Bool(true));
    assert_eq!(run(&binary(5, 5, Opcode::Le), &[]).unwrap(), Value::Bool(true));
    assert_eq!(run(&binary(5, 10, Opcode::Gt), &[]).unwrap(), Value::Bool(false));
    assert_eq!(run(&binary(10, 10, Opcode::Ge), &[]).unwrap(), Value::Bool(true));
    assert_eq!(run(&binary(3, 3, Opcode::Eq), &[]).unwrap(), Value::Bool(true));
    assert_eq!(run(&binary(3, 4, Opcode::Ne), &[]).unwrap(), Value::Bool(true));
}

#[test]
fn test_vm_not_and_strings() {
    let mut builder = CodeUnitBuilder::new("test");
    builder.emit(Opcode::PushNil);
    builder.emit(Opcode::Not);
    builder.emit(Opcode::Return);
    assert_eq!(run(&builder.build_arc(), &[]).unwrap(), Value::Bool(true));

    let mut builder = CodeUnitBuilder::new("concat");
    builder.emit_constant(Value::str("eval"));
    builder.emit_constant(Value::str("core"));
    builder.emit(Opcode::Add);
    assert_eq!(run(&builder.build_arc(), &[]).unwrap(), Value::str("evalcore"));
}

#[test]
fn test_vm_stack_shuffles() {
    // [1, 2] over -> [1, 2, 1]; swap -> [1, 1, 2]; sub -> [1, -1]; sub -> [2]
    let mut builder = CodeUnitBuilder::new("test");
    builder.emit_int(1);
    builder.emit_int(2);
    builder.emit(Opcode::Over);
    builder.emit(Opcode::Swap);
    builder.emit(Opcode::Sub);
    builder.emit(Opcode::Sub);
    builder.emit(Opcode::Return);
    assert_eq!(run(&builder.build_arc(), &[]).unwrap(), Value::Int(2));
}

#[test]
fn test_vm_loop_with_locals() {
    let unit = sum_to();
    assert_eq!(run(&unit, &[Value::Int(10)]).unwrap(), Value::Int(55));
    assert_eq!(run(&unit, &[Value::Int(0)]).unwrap(), Value::Int(0));
}

#[test]
fn test_vm_conditional_branches() {
    // if cond { 1 } else { 2 }
    let build = |cond: bool| {
        let mut b = CodeUnitBuilder::new("if");
        b.emit(if cond { Opcode::PushTrue } else { Opcode::PushFalse });
        let else_jump = b.emit_jump(Opcode::JumpIfFalse);
        b.emit_int(1);
        let end_jump = b.emit_jump(Opcode::Jump);
        b.patch_jump(else_jump);
        b.emit_int(2);
        b.patch_jump(end_jump);
        b.emit(Opcode::Return);
        b.build_arc()
    };
    assert_eq!(run(&build(true), &[]).unwrap(), Value::Int(1));
    assert_eq!(run(&build(false), &[]).unwrap(), Value::Int(2));
}

#[test]
fn test_vm_end_of_code() {
    let mut builder = CodeUnitBuilder::new("implicit");
    builder.emit_int(7);
    assert_eq!(run(&builder.build_arc(), &[]).unwrap(), Value::Int(7));

    let empty = CodeUnitBuilder::new("empty").build_arc();
    assert_eq!(run(&empty, &[]).unwrap(), Value::Nil);
}

#[test]
fn test_vm_errors() {
    assert!(matches!(run(&binary(1, 0, Opcode::Div), &[]), Err(VmError::DivisionByZero)));
    assert!(matches!(run(&binary(1, 0, Opcode::Mod), &[]), Err(VmError::DivisionByZero)));
    assert!(matches!(
        run(&binary(i64::MAX, 1, Opcode::Add), &[]),
        Err(VmError::ArithmeticOverflow)
    ));

    let mut builder = CodeUnitBuilder::new("type");
    builder.emit_int(1);
    builder.emit(Opcode::PushTrue);
    builder.emit(Opcode::Sub);
    assert!(matches!(
        run(&builder.build_arc(), &[]),
        Err(VmError::TypeError { expected: "Int", got: "Bool" })
    ));

    let mut builder = CodeUnitBuilder::new("underflow");
    builder.emit(Opcode::Pop);
    assert!(matches!(run(&builder.build_arc(), &[]), Err(VmError::StackUnderflow)));

    let mut builder = CodeUnitBuilder::new("bad");
    builder.emit_raw(&[0xFF]);
    assert!(matches!(run(&builder.build_arc(), &[]), Err(VmError::InvalidOpcode(0xFF))));

    let mut builder = CodeUnitBuilder::new("truncated");
    builder.emit_raw(&[Opcode::PushConstant.to_byte(), 0]);
    assert!(matches!(run(&builder.build_arc(), &[]), Err(VmError::IpOutOfBounds)));

    let mut builder = CodeUnitBuilder::new("local");
    builder.emit_byte(Opcode::LoadLocal, 3);
    assert!(matches!(run(&builder.build_arc(), &[]), Err(VmError::InvalidLocal(3))));
}

#[test]
fn test_vm_value_stack_limit() {
    let mut config = RuntimeConfig::default();
    config.vm.max_value_stack = 4;
    let mut builder = CodeUnitBuilder::new("deep");
    for _ in 0..5 {
        builder.emit(Opcode::PushNil);
    }
    assert!(matches!(
        run_with(config, &builder.build_arc(), &[]),
        Err(VmError::ValueStackOverflow)
    ));
}

#[test]
fn test_vm_raise() {
    let mut builder = CodeUnitBuilder::new("raise");
    builder.emit_raise("boom");
    builder.emit_int(1);
    let err = run(&builder.build_arc(), &[]).expect_err("raises");
    let exc = err.exception().expect("managed exception");
    assert_eq!(exc.kind(), "RuntimeError");
    assert_eq!(exc.message(), "boom");
}

#[test]
fn test_vm_call_code_unit() {
    // double(x) = x + x
    let mut b = CodeUnitBuilder::new("double");
    b.set_arity(1);
    b.emit_byte(Opcode::LoadLocal, 0);
    b.emit(Opcode::Dup);
    b.emit(Opcode::Add);
    b.emit(Opcode::Return);
    let double = b.build_arc();

    let mut b = CodeUnitBuilder::new("main");
    let callee = b.add_callee(double);
    b.emit_int(21);
    b.emit_call(callee, 1);
    b.emit(Opcode::Return);

    assert_eq!(run(&b.build_arc(), &[]).unwrap(), Value::Int(42));
}

#[test]
fn test_vm_call_arity_mismatch() {
    let mut b = CodeUnitBuilder::new("pair");
    b.set_arity(2);
    let pair = b.build_arc();

    let mut b = CodeUnitBuilder::new("main");
    let callee = b.add_callee(pair);
    b.emit_int(1);
    b.emit_call(callee, 1);
    assert!(matches!(
        run(&b.build_arc(), &[]),
        Err(VmError::ArityMismatch { expected: 2, got: 1 })
    ));

    assert!(matches!(
        run(&sum_to(), &[]),
        Err(VmError::ArityMismatch { expected: 1, got: 0 })
    ));
}

#[test]
fn test_vm_call_depth_limit() {
    let mut config = RuntimeConfig::default();
    config.vm.max_call_depth = 2;

    let leaf = CodeUnitBuilder::new("leaf").build_arc();
    let mut b = CodeUnitBuilder::new("middle");
    let c = b.add_callee(leaf);
    b.emit_call(c, 0);
    let middle = b.build_arc();
    let mut b = CodeUnitBuilder::new("top");
    let c = b.add_callee(Arc::clone(&middle));
    b.emit_call(c, 0);
    let top = b.build_arc();

    assert!(run_with(config.clone(), &middle, &[]).is_ok());
    assert!(matches!(run_with(config, &top, &[]), Err(VmError::CallStackOverflow)));
}

#[test]
fn test_vm_call_native() {
    let mut b = CodeUnitBuilder::new("main");
    let max = b.add_native("max", |args: &[Value]| {
        let a = args[0].as_int().unwrap_or_default();
        let c = args[1].as_int().unwrap_or_default();
        Ok(Value::Int(a.max(c)))
    });
    b.emit_int(3);
    b.emit_int(9);
    b.emit_call_native(max, 2);
    b.emit(Opcode::Return);
    assert_eq!(run(&b.build_arc(), &[]).unwrap(), Value::Int(9));

    let mut b = CodeUnitBuilder::new("missing");
    b.emit_call_native(4, 0);
    assert!(matches!(run(&b.build_arc(), &[]), Err(VmError::InvalidNative(4))));
}

#[test]
fn test_vm_native_error_propagates() {
    let mut b = CodeUnitBuilder::new("main");
    let fail = b.add_native("fail", |_: &[Value]| {
        Err(VmError::Raised(Exception::shared("ValueError", "bad input")))
    });
    b.emit_call_native(fail, 0);
    b.emit_int(1);
    let err = run(&b.build_arc(), &[]).expect_err("native fails");
    assert_eq!(err.exception().map(|e| e.kind()), Some("ValueError"));
}

#[test]
fn test_vm_async_exception_at_next_boundary() {
    let runtime = Runtime::new(RuntimeConfig::default());
    let ctx = runtime.new_context(None);
    let exc = Exception::shared("KeyboardInterrupt", "");
    let after = Arc::new(AtomicUsize::new(0));

    let mut b = CodeUnitBuilder::new("main");
    let inject = {
        let runtime = Arc::clone(&runtime);
        let exc = Arc::clone(&exc);
        let id = ctx.id();
        b.add_native("inject", move |_: &[Value]| {
            runtime.set_async_exc(id, Some(Arc::clone(&exc)));
            Ok(Value::Nil)
        })
    };
    let count = {
        let after = Arc::clone(&after);
        b.add_native("count", move |_: &[Value]| {
            after.fetch_add(1, Ordering::SeqCst);
            Ok(Value::Nil)
        })
    };
    b.emit_call_native(inject, 0);
    b.emit_call_native(count, 0);
    let unit = b.build_arc();

    let mut session = runtime.enter(&ctx).expect("lock is free");
    let err = session.call(&unit, &[]).expect_err("exception delivered");
    let raised = err.exception().expect("managed exception");
    assert!(Arc::ptr_eq(raised, &exc));
    assert_eq!(after.load(Ordering::SeqCst), 0);
    assert!(!ctx.has_async_exc());

    // Delivered once
    let mut b = CodeUnitBuilder::new("plain");
    b.emit_int(5);
    assert_eq!(session.call(&b.build_arc(), &[]).unwrap(), Value::Int(5));
    assert_eq!(runtime.stats().async_exceptions_delivered, 1);
}

#[test]
fn test_vm_pending_calls_run_before_first_instruction() {
    let runtime = Runtime::new(RuntimeConfig::default());
    let ctx = runtime.new_context(None);
    let ran = Arc::new(AtomicUsize::new(0));
    {
        let ran = Arc::clone(&ran);
        runtime
            .add_pending_call(move || {
                ran.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .expect("capacity");
    }

    let mut session = runtime.enter(&ctx).expect("lock is free");
    assert_eq!(session.call(&sum_to(), &[Value::Int(3)]).unwrap(), Value::Int(6));
    assert_eq!(ran.load(Ordering::SeqCst), 1);
    assert_eq!(runtime.stats().pending_calls_run, 1);

    runtime
        .add_pending_call(|| Err(VmError::Raised(Exception::shared("SystemExit", ""))))
        .expect("capacity");
    let err = session.call(&sum_to(), &[Value::Int(3)]).expect_err("pending call fails");
    assert_eq!(err.exception().map(|e| e.kind()), Some("SystemExit"));
}

#[test]
fn test_vm_failed_pending_call_defers_async_exception() {
    let runtime = Runtime::new(RuntimeConfig::default());
    let ctx = runtime.new_context(None);
    let exc = Exception::shared("KeyboardInterrupt", "");

    runtime
        .add_pending_call(|| Err(VmError::Raised(Exception::shared("SystemExit", ""))))
        .expect("capacity");
    assert_eq!(runtime.set_async_exc(ctx.id(), Some(Arc::clone(&exc))), 1);

    let mut session = runtime.enter(&ctx).expect("lock is free");
    let unit = sum_to();

    let err = session.call(&unit, &[Value::Int(3)]).expect_err("pending call fails");
    assert_eq!(err.exception().map(|e| e.kind()), Some("SystemExit"));
    assert!(ctx.has_async_exc());
    assert_eq!(runtime.stats().async_exceptions_delivered, 0);

    let err = session.call(&unit, &[Value::Int(3)]).expect_err("async exception");
    assert!(Arc::ptr_eq(err.exception().expect("managed exception"), &exc));
    assert!(!ctx.has_async_exc());
    assert_eq!(session.call(&unit, &[Value::Int(3)]).unwrap(), Value::Int(6));
}
