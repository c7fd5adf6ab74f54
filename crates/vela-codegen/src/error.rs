//! Codegen errors.

use thiserror::Error;

use vela_vm::address::AddressError;
use vela_vm::DecodeError;

/// The compiler's structured diagnostics. The first error latches the
/// program buffer; later emissions become no-ops and the latched error is
/// returned from [`crate::compile`].
#[derive(Debug, Error)]
pub enum CodegenError {
    /// Unknown VM syscall api.
    #[error("unknown VM syscall api: {api}.{name}")]
    UnknownSyscall { api: String, name: String },
    /// Unknown builtin function.
    #[error("unknown builtin: {0}")]
    UnknownBuiltin(String),
    /// Function or method could not be resolved.
    #[error("could not resolve function {0}")]
    FunctionNotFound(String),
    /// Selector onto a package that is not imported.
    #[error("unknown package: {0}")]
    UnknownPackage(String),
    /// A construct the compiler does not translate.
    #[error("unsupported construct: {0}")]
    Unsupported(String),
    /// More than 255 local variables in one function.
    #[error("maximum of 255 local variables is allowed")]
    TooManyLocals,
    /// More than 255 arguments in one function.
    #[error("maximum of 255 arguments is allowed")]
    TooManyArguments,
    /// Ran out of label indices.
    #[error("label number is too big")]
    LabelOverflow,
    /// A branch referenced a label index past the table.
    #[error("unexpected label number: {index} (max {max})")]
    BadLabelIndex { index: usize, max: usize },
    /// A branch target was never set.
    #[error("label {0} is unresolved")]
    UnresolvedLabel(usize),
    /// A resolved branch displacement does not fit in 32 bits.
    #[error("label offset is too big at the instruction {ip}: {offset}")]
    OffsetOverflow { ip: usize, offset: i64 },
    /// Bad compile-time address literal.
    #[error("invalid address literal: {0}")]
    Address(#[from] AddressError),
    /// The emitted stream failed to re-decode during jump resolution.
    #[error(transparent)]
    Decode(#[from] DecodeError),
    /// Missing resolver output or broken emitter invariant.
    #[error("internal error: {0}")]
    Internal(String),
}
