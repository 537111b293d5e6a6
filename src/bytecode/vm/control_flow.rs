//! Control flow operations for the bytecode VM.
//!
//! Jumps are relative to the instruction following the operand. `Call`
//! re-enters the dispatcher through the session, so every callee goes
//! through the compilation gate on its own.

use std::ops::ControlFlow;
use std::sync::Arc;

use tracing::trace;

use super::types::{VmError, VmResult};
use super::Interpreter;
use crate::bytecode::value::{Exception, Value};

impl Interpreter<'_, '_> {
    // === Jump Operations ===

    #[inline]
    fn jump_by(&mut self, offset: i16) {
        self.frame.ip = (self.frame.ip as isize + offset as isize) as usize;
    }

    pub(super) fn op_jump(&mut self) -> VmResult<()> {
        let offset = self.read_i16()?;
        self.jump_by(offset);
        Ok(())
    }

    pub(super) fn op_jump_if_false(&mut self) -> VmResult<()> {
        let offset = self.read_i16()?;
        let cond = self.pop()?;
        if !cond.is_truthy() {
            self.jump_by(offset);
        }
        Ok(())
    }

    pub(super) fn op_jump_if_true(&mut self) -> VmResult<()> {
        let offset = self.read_i16()?;
        let cond = self.pop()?;
        if cond.is_truthy() {
            self.jump_by(offset);
        }
        Ok(())
    }

    // === Call Operations ===

    /// Call another code unit
    ///
    /// Opcode format: Call callee_index:u16 argc:u8
    pub(super) fn op_call(&mut self) -> VmResult<()> {
        let index = self.read_u16()?;
        let argc = self.read_u8()? as usize;
        let callee = self
            .frame
            .unit
            .get_callee(index)
            .map(Arc::clone)
            .ok_or(VmError::InvalidCallee(index))?;
        let args = self.pop_args(argc)?;
        trace!(target: "evalcore::vm::call", ip = self.frame.ip, callee = callee.name(), argc, "call");

        let result = self.session.call(&callee, &args)?;
        self.push(result)
    }

    /// Call a host function
    ///
    /// Opcode format: CallNative native_index:u16 argc:u8
    pub(super) fn op_call_native(&mut self) -> VmResult<()> {
        let index = self.read_u16()?;
        let argc = self.read_u8()? as usize;
        let unit = Arc::clone(&self.frame.unit);
        let native = unit.get_native(index).ok_or(VmError::InvalidNative(index))?;
        let args = self.pop_args(argc)?;
        trace!(target: "evalcore::vm::call", ip = self.frame.ip, native = native.name(), argc, "call_native");

        let result = native.call(&args)?;
        self.push(result)
    }

    pub(super) fn op_return(&mut self) -> VmResult<ControlFlow<Value>> {
        let value = self.frame.stack.pop().unwrap_or_default();
        Ok(ControlFlow::Break(value))
    }

    /// Build the error raised by `Raise`
    ///
    /// Opcode format: Raise message_index:u16 (string constant)
    pub(super) fn op_raise(&mut self) -> VmError {
        let index = match self.read_u16() {
            Ok(index) => index,
            Err(e) => return e,
        };
        match self.frame.unit.get_constant(index) {
            Some(Value::Str(message)) => {
                VmError::Raised(Exception::shared("RuntimeError", &**message))
            }
            Some(other) => VmError::TypeError {
                expected: "Str",
                got: other.type_name(),
            },
            None => VmError::InvalidConstant(index),
        }
    }
}
