//! Type-resolver output for the Vela compiler.
//!
//! The resolver itself runs upstream; the code generator consumes its
//! output read-only through this crate: resolved types with optional folded
//! constants, method-selection marks, and the program's deterministic
//! package order.

pub mod info;
pub mod types;

pub use info::{Package, Program, TypeInfo};
pub use types::{Field, NamedType, Signature, StructType, Type, TypeAndValue, Value};
