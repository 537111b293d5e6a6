//! Arithmetic and comparison operations for the bytecode VM.
//!
//! Integer arithmetic is checked: overflow is an error rather than a wrap.

use super::types::{VmError, VmResult};
use super::Interpreter;
use crate::bytecode::value::Value;

impl Interpreter<'_, '_> {
    /// Pop two integer operands, `a` below `b`
    #[inline]
    fn pop_int_pair(&mut self) -> VmResult<(i64, i64)> {
        let b = self.pop()?;
        let a = self.pop()?;
        match (&a, &b) {
            (Value::Int(x), Value::Int(y)) => Ok((*x, *y)),
            (Value::Int(_), other) | (other, _) => Err(VmError::TypeError {
                expected: "Int",
                got: other.type_name(),
            }),
        }
    }

    // === Basic Arithmetic Operations ===

    pub(super) fn op_add(&mut self) -> VmResult<()> {
        let b = self.pop()?;
        let a = self.pop()?;
        let result = match (&a, &b) {
            (Value::Int(x), Value::Int(y)) => {
                Value::Int(x.checked_add(*y).ok_or(VmError::ArithmeticOverflow)?)
            }
            (Value::Str(x), Value::Str(y)) => {
                let mut s = String::with_capacity(x.len() + y.len());
                s.push_str(x);
                s.push_str(y);
                Value::str(s)
            }
            (Value::Int(_), other) | (Value::Str(_), other) => {
                return Err(VmError::TypeError {
                    expected: a.type_name(),
                    got: other.type_name(),
                })
            }
            (other, _) => {
                return Err(VmError::TypeError {
                    expected: "Int",
                    got: other.type_name(),
                })
            }
        };
        self.push(result)
    }

    pub(super) fn op_sub(&mut self) -> VmResult<()> {
        let (x, y) = self.pop_int_pair()?;
        let r = x.checked_sub(y).ok_or(VmError::ArithmeticOverflow)?;
        self.push(Value::Int(r))
    }

    pub(super) fn op_mul(&mut self) -> VmResult<()> {
        let (x, y) = self.pop_int_pair()?;
        let r = x.checked_mul(y).ok_or(VmError::ArithmeticOverflow)?;
        self.push(Value::Int(r))
    }

    pub(super) fn op_div(&mut self) -> VmResult<()> {
        let (x, y) = self.pop_int_pair()?;
        if y == 0 {
            return Err(VmError::DivisionByZero);
        }
        let r = x.checked_div(y).ok_or(VmError::ArithmeticOverflow)?;
        self.push(Value::Int(r))
    }

    pub(super) fn op_mod(&mut self) -> VmResult<()> {
        let (x, y) = self.pop_int_pair()?;
        if y == 0 {
            return Err(VmError::DivisionByZero);
        }
        let r = x.checked_rem(y).ok_or(VmError::ArithmeticOverflow)?;
        self.push(Value::Int(r))
    }

    pub(super) fn op_neg(&mut self) -> VmResult<()> {
        let result = match self.pop()? {
            Value::Int(x) => Value::Int(x.checked_neg().ok_or(VmError::ArithmeticOverflow)?),
            other => {
                return Err(VmError::TypeError {
                    expected: "Int",
                    got: other.type_name(),
                })
            }
        };
        self.push(result)
    }

    // === Comparison Operations ===

    pub(super) fn op_lt(&mut self) -> VmResult<()> {
        let (x, y) = self.pop_int_pair()?;
        self.push(Value::Bool(x < y))
    }

    pub(super) fn op_le(&mut self) -> VmResult<()> {
        let (x, y) = self.pop_int_pair()?;
        self.push(Value::Bool(x <= y))
    }

    pub(super) fn op_gt(&mut self) -> VmResult<()> {
        let (x, y) = self.pop_int_pair()?;
        self.push(Value::Bool(x > y))
    }

    pub(super) fn op_ge(&mut self) -> VmResult<()> {
        let (x, y) = self.pop_int_pair()?;
        self.push(Value::Bool(x >= y))
    }

    pub(super) fn op_eq(&mut self) -> VmResult<()> {
        let b = self.pop()?;
        let a = self.pop()?;
        self.push(Value::Bool(a == b))
    }

    pub(super) fn op_ne(&mut self) -> VmResult<()> {
        let b = self.pop()?;
        let a = self.pop()?;
        self.push(Value::Bool(a != b))
    }

    pub(super) fn op_not(&mut self) -> VmResult<()> {
        let a = self.pop()?;
        self.push(Value::Bool(!a.is_truthy()))
    }
}
