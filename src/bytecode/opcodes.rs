//! Bytecode opcodes
//!
//! This module defines the instructions executed by the interpreter loop.
//! Opcodes are grouped by category and assigned contiguous ranges so the
//! decoder can use a flat lookup table.

use std::fmt;

/// Bytecode opcode enumeration
///
/// Each opcode is a single byte, optionally followed by big-endian immediates
/// (see [`Opcode::immediate_size`]).
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    // === Stack Operations (0x00-0x0F) ===
    /// No operation
    Nop = 0x00,
    /// Discard top of stack
    Pop = 0x01,
    /// Duplicate top of stack
    Dup = 0x02,
    /// Swap top two stack elements
    Swap = 0x03,
    /// Copy second element: [a,b] -> [a,b,a]
    Over = 0x04,

    // === Value Creation (0x10-0x2F) ===
    /// Push Nil value
    PushNil = 0x10,
    /// Push Bool(true)
    PushTrue = 0x11,
    /// Push Bool(false)
    PushFalse = 0x12,
    /// Push small integer (-128 to 127), value is next byte
    PushSmall = 0x13,
    /// Push constant from pool, index is next 2 bytes
    PushConstant = 0x14,

    // === Local Operations (0x30-0x3F) ===
    /// Load value from local slot, index is next byte
    LoadLocal = 0x30,
    /// Store top of stack to local slot, index is next byte
    StoreLocal = 0x31,

    // === Control Flow (0x50-0x6F) ===
    /// Unconditional jump, offset is next 2 bytes (signed, relative to next instruction)
    Jump = 0x50,
    /// Pop and jump if falsy
    JumpIfFalse = 0x51,
    /// Pop and jump if truthy
    JumpIfTrue = 0x52,
    /// Call another code unit: callee index u16, argc u8
    Call = 0x60,
    /// Call a host function: native index u16, argc u8
    CallNative = 0x61,
    /// Return top of stack (or Nil) to the caller
    Return = 0x62,
    /// Raise RuntimeError with the string constant at index u16
    Raise = 0x63,

    // === Arithmetic (0x70-0x7F) ===
    /// [a, b] -> [a + b]
    Add = 0x70,
    /// [a, b] -> [a - b]
    Sub = 0x71,
    /// [a, b] -> [a * b]
    Mul = 0x72,
    /// [a, b] -> [a / b] (truncating)
    Div = 0x73,
    /// [a, b] -> [a % b]
    Mod = 0x74,
    /// [a] -> [-a]
    Neg = 0x75,

    // === Comparison and Boolean (0x80-0x8F) ===
    /// [a, b] -> [a < b]
    Lt = 0x80,
    /// [a, b] -> [a <= b]
    Le = 0x81,
    /// [a, b] -> [a > b]
    Gt = 0x82,
    /// [a, b] -> [a >= b]
    Ge = 0x83,
    /// [a, b] -> [a == b]
    Eq = 0x84,
    /// [a, b] -> [a != b]
    Ne = 0x85,
    /// [a] -> [!truthy(a)]
    Not = 0x86,
}

impl Opcode {
    /// Convert byte to opcode, returns None if invalid
    #[inline]
    pub fn from_byte(byte: u8) -> Option<Self> {
        OPCODE_TABLE[byte as usize]
    }

    /// Convert opcode to byte
    #[inline]
    pub fn to_byte(self) -> u8 {
        self as u8
    }

    /// Get the number of immediate bytes following this opcode
    #[inline]
    pub fn immediate_size(self) -> usize {
        match self {
            Self::Nop | Self::Pop | Self::Dup | Self::Swap | Self::Over
            | Self::PushNil | Self::PushTrue | Self::PushFalse
            | Self::Return
            | Self::Add | Self::Sub | Self::Mul | Self::Div | Self::Mod | Self::Neg
            | Self::Lt | Self::Le | Self::Gt | Self::Ge | Self::Eq | Self::Ne | Self::Not => 0,

            Self::PushSmall | Self::LoadLocal | Self::StoreLocal => 1,

            Self::PushConstant | Self::Jump | Self::JumpIfFalse | Self::JumpIfTrue
            | Self::Raise => 2,

            // 2-byte table index + 1-byte argument count
            Self::Call | Self::CallNative => 3,
        }
    }

    /// Get the mnemonic name for this opcode
    pub fn mnemonic(self) -> &'static str {
        match self {
            Self::Nop => "nop",
            Self::Pop => "pop",
            Self::Dup => "dup",
            Self::Swap => "swap",
            Self::Over => "over",
            Self::PushNil => "push_nil",
            Self::PushTrue => "push_true",
            Self::PushFalse => "push_false",
            Self::PushSmall => "push_small",
            Self::PushConstant => "push_const",
            Self::LoadLocal => "load_local",
            Self::StoreLocal => "store_local",
            Self::Jump => "jump",
            Self::JumpIfFalse => "jump_if_false",
            Self::JumpIfTrue => "jump_if_true",
            Self::Call => "call",
            Self::CallNative => "call_native",
            Self::Return => "return",
            Self::Raise => "raise",
            Self::Add => "add",
            Self::Sub => "sub",
            Self::Mul => "mul",
            Self::Div => "div",
            Self::Mod => "mod",
            Self::Neg => "neg",
            Self::Lt => "lt",
            Self::Le => "le",
            Self::Gt => "gt",
            Self::Ge => "ge",
            Self::Eq => "eq",
            Self::Ne => "ne",
            Self::Not => "not",
        }
    }

    /// Check if this opcode is a jump instruction
    #[inline]
    pub fn is_jump(self) -> bool {
        matches!(self, Self::Jump | Self::JumpIfFalse | Self::JumpIfTrue)
    }

    /// Check if this opcode is a call instruction
    #[inline]
    pub fn is_call(self) -> bool {
        matches!(self, Self::Call | Self::CallNative)
    }

    /// Check if this opcode ends the current frame
    #[inline]
    pub fn is_terminator(self) -> bool {
        matches!(self, Self::Return | Self::Raise)
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.mnemonic())
    }
}

/// Lookup table for byte -> Opcode conversion
static OPCODE_TABLE: [Option<Opcode>; 256] = {
    let mut table = [None; 256];

    // Stack operations
    table[0x00] = Some(Opcode::Nop);
    table[0x01] = Some(Opcode::Pop);
    table[0x02] = Some(Opcode::Dup);
    table[0x03] = Some(Opcode::Swap);
    table[0x04] = Some(Opcode::Over);

    // Value creation
    table[0x10] = Some(Opcode::PushNil);
    table[0x11] = Some(Opcode::PushTrue);
    table[0x12] = Some(Opcode::PushFalse);
    table[0x13] = Some(Opcode::PushSmall);
    table[0x14] = Some(Opcode::PushConstant);

    // Locals
    table[0x30] = Some(Opcode::LoadLocal);
    table[0x31] = Some(Opcode::StoreLocal);

    // Control flow
    table[0x50] = Some(Opcode::Jump);
    table[0x51] = Some(Opcode::JumpIfFalse);
    table[0x52] = Some(Opcode::JumpIfTrue);
    table[0x60] = Some(Opcode::Call);
    table[0x61] = Some(Opcode::CallNative);
    table[0x62] = Some(Opcode::Return);
    table[0x63] = Some(Opcode::Raise);

    // Arithmetic
    table[0x70] = Some(Opcode::Add);
    table[0x71] = Some(Opcode::Sub);
    table[0x72] = Some(Opcode::Mul);
    table[0x73] = Some(Opcode::Div);
    table[0x74] = Some(Opcode::Mod);
    table[0x75] = Some(Opcode::Neg);

    // Comparison
    table[0x80] = Some(Opcode::Lt);
    table[0x81] = Some(Opcode::Le);
    table[0x82] = Some(Opcode::Gt);
    table[0x83] = Some(Opcode::Ge);
    table[0x84] = Some(Opcode::Eq);
    table[0x85] = Some(Opcode::Ne);
    table[0x86] = Some(Opcode::Not);

    table
};
