//! Instruction set contract of the Vela stack VM.
//!
//! The compiler depends on the ISA only through this crate: the opcode
//! table with operand sizes, a linear decoder, low-level emit helpers over
//! a byte buffer, stack-item type tags for `CONVERT`, and the compile-time
//! address codec. Opcode semantics are the VM's business; the two encoding
//! facts the compiler relies on are that short branches carry a signed
//! 8-bit operand and long branches (and `PUSHA`) a signed 32-bit
//! little-endian operand.

pub mod address;
pub mod decode;
pub mod emit;
pub mod opcode;
pub mod stackitem;

pub use decode::{decode_at, DecodeError};
pub use emit::ScriptBuilder;
pub use opcode::Opcode;
pub use stackitem::StackItemType;
