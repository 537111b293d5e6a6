//! Bytecode interpreter loop
//!
//! The interpreter executes one [`Frame`] using a stack-based architecture.
//! Before every instruction it performs a single relaxed load of the runtime's
//! needs-attention flag; only when the flag is raised does it leave the hot
//! path and run the session's periodic work (pending calls, lock pulse,
//! asynchronous exception delivery).
//!
//! This module is organized into submodules by functionality:
//! - `types`: Core type definitions (VmError, VmConfig, Frame)
//! - `stack`: Stack and local slot operations
//! - `arithmetic`: Arithmetic, comparison and boolean operations
//! - `control_flow`: Jumps, calls, returns and raise

use std::ops::ControlFlow;

use tracing::trace;

use super::opcodes::Opcode;
use super::value::Value;
use crate::runtime::Session;

// === Submodules ===

mod arithmetic;
mod control_flow;
mod stack;
mod types;

#[cfg(test)]
mod tests;

// === Re-exports ===

pub use types::{Frame, VmConfig, VmError, VmResult};

/// Interpreter for a single frame
///
/// Borrows the session for the duration of the run so that `Call` can
/// re-enter the dispatcher and the attention check can run periodic work.
pub struct Interpreter<'a, 'rt> {
    pub(super) session: &'a mut Session<'rt>,
    pub(super) frame: &'a mut Frame,
    pub(super) config: VmConfig,
}

impl<'a, 'rt> Interpreter<'a, 'rt> {
    /// Create an interpreter for `frame` using the runtime's VM configuration
    pub fn new(session: &'a mut Session<'rt>, frame: &'a mut Frame) -> Self {
        let config = session.runtime().config().vm.clone();
        Self {
            session,
            frame,
            config,
        }
    }

    /// Run the frame to completion
    pub fn run(&mut self) -> VmResult<Value> {
        let attention = self.session.runtime().attention();
        loop {
            if attention.is_raised() {
                self.session.periodic_work()?;
            }
            match self.step()? {
                ControlFlow::Continue(()) => continue,
                ControlFlow::Break(value) => return Ok(value),
            }
        }
    }

    /// Execute a single instruction
    pub fn step(&mut self) -> VmResult<ControlFlow<Value>> {
        // Falling off the end returns the top of stack
        if self.frame.ip >= self.frame.unit.len() {
            return Ok(ControlFlow::Break(self.frame.stack.pop().unwrap_or_default()));
        }

        let opcode_byte = self
            .frame
            .unit
            .read_byte(self.frame.ip)
            .ok_or(VmError::IpOutOfBounds)?;
        let opcode = Opcode::from_byte(opcode_byte).ok_or(VmError::InvalidOpcode(opcode_byte))?;

        if self.config.trace {
            let (disasm, _) = self.frame.unit.disassemble_instruction(self.frame.ip);
            trace!(
                target: "evalcore::vm::step",
                unit = self.frame.unit.name(),
                ip = self.frame.ip,
                mnemonic = %disasm,
                stack_depth = self.frame.stack.len()
            );
        }

        // Advance IP past opcode
        self.frame.ip += 1;

        match opcode {
            // Stack operations
            Opcode::Nop => {}
            Opcode::Pop => {
                self.pop()?;
            }
            Opcode::Dup => self.op_dup()?,
            Opcode::Swap => self.op_swap()?,
            Opcode::Over => self.op_over()?,

            // Value creation
            Opcode::PushNil => self.push(Value::Nil)?,
            Opcode::PushTrue => self.push(Value::Bool(true))?,
            Opcode::PushFalse => self.push(Value::Bool(false))?,
            Opcode::PushSmall => self.op_push_small()?,
            Opcode::PushConstant => self.op_push_constant()?,

            // Locals
            Opcode::LoadLocal => self.op_load_local()?,
            Opcode::StoreLocal => self.op_store_local()?,

            // Control flow
            Opcode::Jump => self.op_jump()?,
            Opcode::JumpIfFalse => self.op_jump_if_false()?,
            Opcode::JumpIfTrue => self.op_jump_if_true()?,
            Opcode::Call => self.op_call()?,
            Opcode::CallNative => self.op_call_native()?,
            Opcode::Return => return self.op_return(),
            Opcode::Raise => return Err(self.op_raise()),

            // Arithmetic
            Opcode::Add => self.op_add()?,
            Opcode::Sub => self.op_sub()?,
            Opcode::Mul => self.op_mul()?,
            Opcode::Div => self.op_div()?,
            Opcode::Mod => self.op_mod()?,
            Opcode::Neg => self.op_neg()?,

            // Comparison
            Opcode::Lt => self.op_lt()?,
            Opcode::Le => self.op_le()?,
            Opcode::Gt => self.op_gt()?,
            Opcode::Ge => self.op_ge()?,
            Opcode::Eq => self.op_eq()?,
            Opcode::Ne => self.op_ne()?,
            Opcode::Not => self.op_not()?,
        }

        Ok(ControlFlow::Continue(()))
    }

    // === Operand Decoding ===

    #[inline]
    pub(super) fn read_u8(&mut self) -> VmResult<u8> {
        let byte = self
            .frame
            .unit
            .read_byte(self.frame.ip)
            .ok_or(VmError::IpOutOfBounds)?;
        self.frame.ip += 1;
        Ok(byte)
    }

    #[inline]
    pub(super) fn read_u16(&mut self) -> VmResult<u16> {
        let value = self
            .frame
            .unit
            .read_u16(self.frame.ip)
            .ok_or(VmError::IpOutOfBounds)?;
        self.frame.ip += 2;
        Ok(value)
    }

    #[inline]
    pub(super) fn read_i16(&mut self) -> VmResult<i16> {
        self.read_u16().map(|u| u as i16)
    }
}
