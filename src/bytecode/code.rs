//! Code unit representation
//!
//! A CodeUnit is the smallest independently dispatchable body of bytecode:
//! the instruction stream plus its constant pool, the tables used by `Call`
//! and `CallNative`, and the compilation slot that records whether a compiled
//! artifact exists for it.

use std::fmt;
use std::sync::Arc;

use super::artifact::CompiledArtifact;
use super::compile_slot::CompileSlot;
use super::opcodes::Opcode;
use super::value::Value;
use super::vm::VmResult;

/// Host function callable through `CallNative`
pub type NativeFn = Arc<dyn Fn(&[Value]) -> VmResult<Value> + Send + Sync>;

/// Named host function entry
#[derive(Clone)]
pub struct NativeEntry {
    name: String,
    func: NativeFn,
}

impl NativeEntry {
    /// Name used in disassembly and traces
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Invoke the host function
    #[inline]
    pub fn call(&self, args: &[Value]) -> VmResult<Value> {
        (self.func)(args)
    }
}

impl fmt::Debug for NativeEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("NativeEntry").field(&self.name).finish()
    }
}

/// An immutable unit of bytecode
///
/// Units are shared across contexts as `Arc<CodeUnit>`. Everything except the
/// compilation slot is fixed at build time.
pub struct CodeUnit {
    /// The bytecode instructions
    code: Vec<u8>,

    /// Constant pool
    constants: Vec<Value>,

    /// Units reachable through `Call`
    callees: Vec<Arc<CodeUnit>>,

    /// Host functions reachable through `CallNative`
    natives: Vec<NativeEntry>,

    /// Name of this unit (for debugging and compiler selection)
    name: String,

    /// Number of parameters
    arity: u8,

    /// Number of local slots, parameters included
    local_count: u16,

    /// Compilation state and invocation counter
    slot: CompileSlot,
}

impl CodeUnit {
    /// Create a builder for constructing a unit
    pub fn builder(name: impl Into<String>) -> CodeUnitBuilder {
        CodeUnitBuilder::new(name)
    }

    /// Get the bytecode instructions
    #[inline]
    pub fn code(&self) -> &[u8] {
        &self.code
    }

    /// Get the length of the bytecode
    #[inline]
    pub fn len(&self) -> usize {
        self.code.len()
    }

    /// Check if the unit has no instructions
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    /// Get a byte at the given offset
    #[inline]
    pub fn read_byte(&self, offset: usize) -> Option<u8> {
        self.code.get(offset).copied()
    }

    /// Get an opcode at the given offset
    #[inline]
    pub fn read_opcode(&self, offset: usize) -> Option<Opcode> {
        self.code.get(offset).and_then(|&b| Opcode::from_byte(b))
    }

    /// Read a u16 from the bytecode (big-endian)
    #[inline]
    pub fn read_u16(&self, offset: usize) -> Option<u16> {
        if offset + 1 < self.code.len() {
            Some(u16::from_be_bytes([self.code[offset], self.code[offset + 1]]))
        } else {
            None
        }
    }

    /// Read a signed i16 from the bytecode (big-endian)
    #[inline]
    pub fn read_i16(&self, offset: usize) -> Option<i16> {
        self.read_u16(offset).map(|u| u as i16)
    }

    /// Get a constant from the pool
    #[inline]
    pub fn get_constant(&self, index: u16) -> Option<&Value> {
        self.constants.get(index as usize)
    }

    /// Get the number of constants
    #[inline]
    pub fn constant_count(&self) -> usize {
        self.constants.len()
    }

    /// Get a callee unit
    #[inline]
    pub fn get_callee(&self, index: u16) -> Option<&Arc<CodeUnit>> {
        self.callees.get(index as usize)
    }

    /// Get a host function
    #[inline]
    pub fn get_native(&self, index: u16) -> Option<&NativeEntry> {
        self.natives.get(index as usize)
    }

    /// Get the unit name
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the arity
    #[inline]
    pub fn arity(&self) -> u8 {
        self.arity
    }

    /// Get the number of local slots
    #[inline]
    pub fn local_count(&self) -> u16 {
        self.local_count
    }

    /// Compilation slot
    #[inline]
    pub fn slot(&self) -> &CompileSlot {
        &self.slot
    }

    /// Installed artifact, if any
    #[inline]
    pub fn compiled_artifact(&self) -> Option<Arc<CompiledArtifact>> {
        self.slot.artifact()
    }

    /// Whether compilation was attempted and permanently failed
    #[inline]
    pub fn compile_failed(&self) -> bool {
        self.slot.is_failed()
    }

    /// Disassemble the unit to a string
    pub fn disassemble(&self) -> String {
        let mut output = String::new();
        output.push_str(&format!("=== {} ===\n", self.name));
        output.push_str(&format!(
            "arity: {}, locals: {}, constants: {}, callees: {}, natives: {}\n",
            self.arity,
            self.local_count,
            self.constants.len(),
            self.callees.len(),
            self.natives.len()
        ));

        let mut offset = 0;
        while offset < self.code.len() {
            let (disasm, next_offset) = self.disassemble_instruction(offset);
            output.push_str(&format!("{:04x} {}\n", offset, disasm));
            offset = next_offset;
        }

        output
    }

    /// Disassemble a single instruction, returns (string, next_offset)
    pub fn disassemble_instruction(&self, offset: usize) -> (String, usize) {
        let Some(opcode) = self.read_opcode(offset) else {
            return (
                format!("??? (0x{:02x})", self.code.get(offset).copied().unwrap_or(0)),
                offset + 1,
            );
        };

        let mnemonic = opcode.mnemonic();
        let imm_size = opcode.immediate_size();
        let next_offset = offset + 1 + imm_size;

        let operand_str = match imm_size {
            0 => String::new(),
            1 => {
                let byte = self.code.get(offset + 1).copied().unwrap_or(0);
                match opcode {
                    Opcode::PushSmall => format!(" {}", byte as i8),
                    _ => format!(" {}", byte),
                }
            }
            2 => {
                let value = self.read_u16(offset + 1).unwrap_or(0);
                match opcode {
                    Opcode::Jump | Opcode::JumpIfFalse | Opcode::JumpIfTrue => {
                        let target = (offset as isize + 3 + (value as i16) as isize) as usize;
                        format!(" -> {:04x}", target)
                    }
                    Opcode::PushConstant | Opcode::Raise => {
                        let const_str = self
                            .constants
                            .get(value as usize)
                            .map(|c| c.to_string())
                            .unwrap_or_else(|| "???".to_string());
                        format!(" #{} ({})", value, const_str)
                    }
                    _ => format!(" {}", value),
                }
            }
            3 => {
                let index = self.read_u16(offset + 1).unwrap_or(0);
                let argc = self.code.get(offset + 3).copied().unwrap_or(0);
                let target = match opcode {
                    Opcode::Call => self.callees.get(index as usize).map(|u| u.name().to_string()),
                    _ => self.natives.get(index as usize).map(|n| n.name().to_string()),
                };
                format!(
                    " #{} ({}) argc={}",
                    index,
                    target.unwrap_or_else(|| "???".to_string()),
                    argc
                )
            }
            _ => String::new(),
        };

        (format!("{}{}", mnemonic, operand_str), next_offset)
    }
}

impl fmt::Debug for CodeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CodeUnit")
            .field("name", &self.name)
            .field("arity", &self.arity)
            .field("local_count", &self.local_count)
            .field("len", &self.code.len())
            .field("slot", &self.slot)
            .finish()
    }
}

/// Builder for constructing CodeUnits
pub struct CodeUnitBuilder {
    code: Vec<u8>,
    constants: Vec<Value>,
    callees: Vec<Arc<CodeUnit>>,
    natives: Vec<NativeEntry>,
    name: String,
    arity: u8,
    local_count: u16,
}

impl CodeUnitBuilder {
    /// Create a new unit builder
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            code: Vec::with_capacity(64),
            constants: Vec::new(),
            callees: Vec::new(),
            natives: Vec::new(),
            name: name.into(),
            arity: 0,
            local_count: 0,
        }
    }

    /// Set the arity
    ///
    /// The local slot count is raised to at least the arity, parameters
    /// occupy the first slots.
    pub fn set_arity(&mut self, arity: u8) {
        self.arity = arity;
        self.local_count = self.local_count.max(arity as u16);
    }

    /// Set the number of local slots
    pub fn set_local_count(&mut self, count: u16) {
        self.local_count = count.max(self.arity as u16);
    }

    /// Get the name of this unit
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the current bytecode offset
    #[inline]
    pub fn current_offset(&self) -> usize {
        self.code.len()
    }

    /// Emit a single opcode
    pub fn emit(&mut self, opcode: Opcode) {
        self.code.push(opcode.to_byte());
    }

    /// Emit an opcode with a 1-byte operand
    pub fn emit_byte(&mut self, opcode: Opcode, operand: u8) {
        self.code.push(opcode.to_byte());
        self.code.push(operand);
    }

    /// Emit an opcode with a 2-byte operand (big-endian)
    pub fn emit_u16(&mut self, opcode: Opcode, operand: u16) {
        self.code.push(opcode.to_byte());
        self.code.extend_from_slice(&operand.to_be_bytes());
    }

    /// Emit raw bytes
    pub fn emit_raw(&mut self, bytes: &[u8]) {
        self.code.extend_from_slice(bytes);
    }

    /// Add a constant to the pool, returns its index
    pub fn add_constant(&mut self, value: Value) -> u16 {
        if let Some(i) = self.constants.iter().position(|existing| existing == &value) {
            return i as u16;
        }

        let index = self.constants.len();
        if index > u16::MAX as usize {
            panic!("Too many constants in unit (max {})", u16::MAX);
        }
        self.constants.push(value);
        index as u16
    }

    /// Emit a constant load
    pub fn emit_constant(&mut self, value: Value) {
        let index = self.add_constant(value);
        self.emit_u16(Opcode::PushConstant, index);
    }

    /// Emit an integer load, using the short form when it fits in a byte
    pub fn emit_int(&mut self, n: i64) {
        match i8::try_from(n) {
            Ok(small) => self.emit_byte(Opcode::PushSmall, small as u8),
            Err(_) => self.emit_constant(Value::Int(n)),
        }
    }

    /// Emit a `Raise` of a `RuntimeError` carrying `message`
    pub fn emit_raise(&mut self, message: impl Into<Arc<str>>) {
        let index = self.add_constant(Value::Str(message.into()));
        self.emit_u16(Opcode::Raise, index);
    }

    /// Add a callee unit, returns its index
    pub fn add_callee(&mut self, unit: Arc<CodeUnit>) -> u16 {
        if let Some(i) = self.callees.iter().position(|c| Arc::ptr_eq(c, &unit)) {
            return i as u16;
        }

        let index = self.callees.len();
        if index > u16::MAX as usize {
            panic!("Too many callees in unit (max {})", u16::MAX);
        }
        self.callees.push(unit);
        index as u16
    }

    /// Register a host function, returns its index
    pub fn add_native<F>(&mut self, name: impl Into<String>, func: F) -> u16
    where
        F: Fn(&[Value]) -> VmResult<Value> + Send + Sync + 'static,
    {
        let index = self.natives.len();
        if index > u16::MAX as usize {
            panic!("Too many natives in unit (max {})", u16::MAX);
        }
        self.natives.push(NativeEntry {
            name: name.into(),
            func: Arc::new(func),
        });
        index as u16
    }

    /// Emit a Call opcode with callee index (u16) and argument count (u8)
    pub fn emit_call(&mut self, callee: u16, argc: u8) {
        self.code.push(Opcode::Call.to_byte());
        self.code.extend_from_slice(&callee.to_be_bytes());
        self.code.push(argc);
    }

    /// Emit a CallNative opcode with native index (u16) and argument count (u8)
    pub fn emit_call_native(&mut self, native: u16, argc: u8) {
        self.code.push(Opcode::CallNative.to_byte());
        self.code.extend_from_slice(&native.to_be_bytes());
        self.code.push(argc);
    }

    /// Create a forward jump, returns a label to patch later
    pub fn emit_jump(&mut self, opcode: Opcode) -> JumpLabel {
        debug_assert!(opcode.is_jump());
        let offset = self.code.len();
        self.code.push(opcode.to_byte());
        // Placeholder for jump offset
        self.code.extend_from_slice(&[0xFF, 0xFF]);
        JumpLabel { offset: offset + 1 }
    }

    /// Patch a jump label to jump to the current position
    pub fn patch_jump(&mut self, label: JumpLabel) {
        let target = self.code.len();
        let jump_from = label.offset + 2; // After the u16 operand
        let offset = (target as isize - jump_from as isize) as i16;
        let bytes = offset.to_be_bytes();
        self.code[label.offset] = bytes[0];
        self.code[label.offset + 1] = bytes[1];
    }

    /// Emit a backward jump to a known target
    pub fn emit_loop(&mut self, target: usize) {
        let offset = (target as isize - (self.code.len() as isize + 3)) as i16;
        self.code.push(Opcode::Jump.to_byte());
        self.code.extend_from_slice(&offset.to_be_bytes());
    }

    /// Build the final unit
    pub fn build(self) -> CodeUnit {
        CodeUnit {
            code: self.code,
            constants: self.constants,
            callees: self.callees,
            natives: self.natives,
            name: self.name,
            arity: self.arity,
            local_count: self.local_count,
            slot: CompileSlot::new(),
        }
    }

    /// Build and wrap in Arc
    pub fn build_arc(self) -> Arc<CodeUnit> {
        Arc::new(self.build())
    }
}

/// Label for a forward jump to be patched later
#[derive(Debug, Clone, Copy)]
pub struct JumpLabel {
    offset: usize,
}
