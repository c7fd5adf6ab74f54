//! Low-level bytecode emission.

use sha2::{Digest, Sha256};

use crate::opcode::Opcode;

/// Append-only program buffer with typed emit helpers.
///
/// Branch helpers write the target's *label index* into the low two bytes
/// of a 4-byte placeholder; the code generator's resolution pass turns
/// those into real displacements.
#[derive(Debug, Default)]
pub struct ScriptBuilder {
    buf: Vec<u8>,
}

impl ScriptBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn op(&mut self, op: Opcode) {
        self.buf.push(op as u8);
    }

    /// Opcode followed by a raw operand.
    pub fn instruction(&mut self, op: Opcode, operand: &[u8]) {
        self.buf.push(op as u8);
        self.buf.extend_from_slice(operand);
    }

    /// Push an integer in its narrowest encoding.
    pub fn int(&mut self, v: i64) {
        if v == -1 {
            self.op(Opcode::PushM1);
        } else if (0..=16).contains(&v) {
            self.buf.push(Opcode::Push0 as u8 + v as u8);
        } else if let Ok(v8) = i8::try_from(v) {
            self.instruction(Opcode::PushInt8, &v8.to_le_bytes());
        } else if let Ok(v16) = i16::try_from(v) {
            self.instruction(Opcode::PushInt16, &v16.to_le_bytes());
        } else if let Ok(v32) = i32::try_from(v) {
            self.instruction(Opcode::PushInt32, &v32.to_le_bytes());
        } else {
            self.instruction(Opcode::PushInt64, &v.to_le_bytes());
        }
    }

    pub fn bool(&mut self, v: bool) {
        self.op(if v { Opcode::Push1 } else { Opcode::Push0 });
    }

    /// Push raw bytes with the narrowest length prefix.
    pub fn bytes(&mut self, data: &[u8]) {
        if let Ok(len) = u8::try_from(data.len()) {
            self.instruction(Opcode::PushData1, &[len]);
        } else if let Ok(len) = u16::try_from(data.len()) {
            self.instruction(Opcode::PushData2, &len.to_le_bytes());
        } else {
            self.instruction(Opcode::PushData4, &(data.len() as u32).to_le_bytes());
        }
        self.buf.extend_from_slice(data);
    }

    pub fn string(&mut self, s: &str) {
        self.bytes(s.as_bytes());
    }

    /// Long-form branch with a label-index placeholder.
    pub fn jmp(&mut self, op: Opcode, label: u16) {
        debug_assert!(op.has_long_offset(), "jmp requires a long-form opcode");
        let mut operand = [0u8; 4];
        operand[..2].copy_from_slice(&label.to_le_bytes());
        self.instruction(op, &operand);
    }

    /// Direct call with a label-index placeholder.
    pub fn call(&mut self, label: u16) {
        self.jmp(Opcode::CallL, label);
    }

    /// Push-address of a function label; resolved like a long branch but
    /// never shortened.
    pub fn push_address(&mut self, label: u16) {
        self.jmp(Opcode::PushA, label);
    }

    /// Syscall by interop name.
    pub fn syscall(&mut self, name: &str) {
        self.instruction(Opcode::Syscall, &syscall_id(name).to_le_bytes());
    }
}

/// Interop API id: the first four bytes of the name's SHA-256, little-endian.
pub fn syscall_id(name: &str) -> u32 {
    let digest = Sha256::digest(name.as_bytes());
    u32::from_le_bytes([digest[0], digest[1], digest[2], digest[3]])
}
