//! Stack and local slot operations for the bytecode VM.

use smallvec::SmallVec;
use tracing::trace;

use super::types::{VmError, VmResult};
use super::Interpreter;
use crate::bytecode::value::Value;

/// Inline capacity for call arguments popped off the stack
pub(super) type Args = SmallVec<[Value; 8]>;

impl Interpreter<'_, '_> {
    // === Stack Operations ===

    #[inline]
    pub(super) fn push(&mut self, value: Value) -> VmResult<()> {
        if self.frame.stack.len() >= self.config.max_value_stack {
            return Err(VmError::ValueStackOverflow);
        }
        self.frame.stack.push(value);
        Ok(())
    }

    #[inline]
    pub(super) fn pop(&mut self) -> VmResult<Value> {
        self.frame.stack.pop().ok_or(VmError::StackUnderflow)
    }

    #[inline]
    pub(super) fn peek(&self) -> VmResult<&Value> {
        self.frame.stack.last().ok_or(VmError::StackUnderflow)
    }

    #[inline]
    pub(super) fn peek_n(&self, n: usize) -> VmResult<&Value> {
        let len = self.frame.stack.len();
        if n >= len {
            return Err(VmError::StackUnderflow);
        }
        Ok(&self.frame.stack[len - 1 - n])
    }

    /// Pop `argc` values, preserving push order
    pub(super) fn pop_args(&mut self, argc: usize) -> VmResult<Args> {
        let len = self.frame.stack.len();
        if argc > len {
            return Err(VmError::StackUnderflow);
        }
        Ok(self.frame.stack.drain(len - argc..).collect())
    }

    pub(super) fn op_dup(&mut self) -> VmResult<()> {
        let value = self.peek()?.clone();
        self.push(value)
    }

    pub(super) fn op_swap(&mut self) -> VmResult<()> {
        let len = self.frame.stack.len();
        if len < 2 {
            return Err(VmError::StackUnderflow);
        }
        self.frame.stack.swap(len - 1, len - 2);
        Ok(())
    }

    pub(super) fn op_over(&mut self) -> VmResult<()> {
        let value = self.peek_n(1)?.clone();
        self.push(value)
    }

    // === Value Creation ===

    pub(super) fn op_push_small(&mut self) -> VmResult<()> {
        let n = self.read_u8()? as i8;
        self.push(Value::Int(n as i64))
    }

    pub(super) fn op_push_constant(&mut self) -> VmResult<()> {
        let index = self.read_u16()?;
        let value = self
            .frame
            .unit
            .get_constant(index)
            .cloned()
            .ok_or(VmError::InvalidConstant(index))?;
        self.push(value)
    }

    // === Local Slots ===

    pub(super) fn op_load_local(&mut self) -> VmResult<()> {
        let index = self.read_u8()?;
        let value = self
            .frame
            .locals
            .get(index as usize)
            .cloned()
            .ok_or(VmError::InvalidLocal(index as u16))?;
        self.push(value)
    }

    pub(super) fn op_store_local(&mut self) -> VmResult<()> {
        let index = self.read_u8()?;
        let value = self.pop()?;
        trace!(target: "evalcore::vm::locals", ip = self.frame.ip, index, "store");
        let slot = self
            .frame
            .locals
            .get_mut(index as usize)
            .ok_or(VmError::InvalidLocal(index as u16))?;
        *slot = value;
        Ok(())
    }
}
