//! Builtin call lowering.

use vela_analysis::Value;
use vela_syntax::CallExpr;
use vela_vm::{Opcode, StackItemType};

use crate::error::CodegenError;
use crate::scope::FuncSrc;
use crate::syscall;
use crate::Codegen;

/// Language-level builtins, lowered inline.
pub(crate) fn is_go_builtin(name: &str) -> bool {
    matches!(name, "len" | "append" | "panic" | "copy")
}

/// Values a language builtin leaves on the stack.
pub(crate) fn result_count(name: &str) -> Option<usize> {
    match name {
        "len" | "append" => Some(1),
        "panic" | "copy" => Some(0),
        _ => None,
    }
}

/// Interop builtins whose wrapper declarations are replaced by inline
/// lowerings.
const CUSTOM_BUILTINS: [&str; 5] = ["FromAddress", "Equals", "ToInteger", "ToByteArray", "ToBool"];

impl<'a> Codegen<'a> {
    /// Is the registered function an interop builtin wrapper?
    pub(crate) fn is_custom_builtin(&self, idx: usize) -> bool {
        let scope = &self.arena[idx];
        if scope.body().is_some() || !crate::is_interop_path(&scope.pkg) {
            return false;
        }
        match scope.src {
            FuncSrc::Decl(d) => CUSTOM_BUILTINS.contains(&d.name.name.as_str()),
            FuncSrc::Lambda(_) => false,
        }
    }

    pub(crate) fn convert_builtin(&mut self, call: &'a CallExpr, name: &str) {
        match name {
            "len" => {
                // nil counts as empty: branch around SIZE when the operand
                // is null. These short jumps carry literal displacements and
                // stay outside the label table.
                self.prog.op(Opcode::Dup);
                self.prog.op(Opcode::IsNull);
                self.prog.instruction(Opcode::JmpIf, &[2 + 1 + 2]);
                self.prog.op(Opcode::Size);
                self.prog.instruction(Opcode::Jmp, &[2 + 1 + 1]);
                self.prog.op(Opcode::Drop);
                self.prog.op(Opcode::Push0);
            }
            "append" => {
                let Some(first) = call.args.first() else {
                    self.fail(CodegenError::Internal("append without arguments".into()));
                    return;
                };
                let is_bytes = self
                    .type_of(first.id)
                    .map(|t| t.is_byte_slice())
                    .unwrap_or(false);
                self.emit_reverse(call.args.len());
                // Replace a nil slice with an empty one before appending.
                self.prog.op(Opcode::Dup);
                self.prog.op(Opcode::IsNull);
                self.prog.instruction(Opcode::JmpIfNot, &[2 + 3]);
                if is_bytes {
                    self.prog.op(Opcode::Drop);
                    self.prog.op(Opcode::Push0);
                    self.prog.op(Opcode::NewBuffer);
                } else {
                    self.prog.op(Opcode::Drop);
                    self.prog.op(Opcode::NewArray0);
                    self.prog.op(Opcode::Nop);
                }
                for _ in &call.args[1..] {
                    if is_bytes {
                        self.prog.op(Opcode::Swap);
                        self.prog.op(Opcode::Cat);
                    } else {
                        self.prog.op(Opcode::Dup);
                        self.prog.op(Opcode::Rot);
                        self.prog.op(Opcode::Append);
                    }
                }
            }
            "panic" => {
                let Some(arg) = call.args.first() else {
                    self.fail(CodegenError::Internal("panic without argument".into()));
                    return;
                };
                let is_nil = matches!(&arg.kind, vela_syntax::ExprKind::Lit(vela_syntax::Lit::Nil));
                let is_string = self
                    .type_of(arg.id)
                    .map(|t| t.is_string())
                    .unwrap_or_else(|| {
                        matches!(&arg.kind, vela_syntax::ExprKind::Lit(vela_syntax::Lit::Str(_)))
                    });
                if is_nil {
                    self.prog.op(Opcode::Drop);
                    self.prog.op(Opcode::Throw);
                } else if is_string {
                    self.emit_expr(arg);
                    self.prog.syscall("System.Runtime.Log");
                    self.prog.op(Opcode::Throw);
                } else {
                    self.fail(CodegenError::Unsupported(
                        "panic should have string or nil argument".into(),
                    ));
                }
            }
            "copy" => {
                let bytes = call.args.len() == 2
                    && call.args.iter().all(|a| {
                        self.type_of(a.id).map(|t| t.is_byte_slice()).unwrap_or(false)
                    });
                if !bytes {
                    self.fail(CodegenError::Unsupported(
                        "copy is supported only for byte slices".into(),
                    ));
                    return;
                }
                // Arguments are already on the stack as [dst, src]; build
                // [dst, 0, src, 0, min(len(src), len(dst))] for MEMCPY.
                self.prog.op(Opcode::Push0);
                self.prog.op(Opcode::Swap);
                self.prog.op(Opcode::Push0);
                self.prog.op(Opcode::Over);
                self.prog.op(Opcode::Size);
                self.prog.int(4);
                self.prog.op(Opcode::Pick);
                self.prog.op(Opcode::Size);
                self.prog.op(Opcode::Min);
                self.prog.op(Opcode::MemCpy);
            }
            "ToInteger" | "ToByteArray" | "ToBool" => {
                let typ = match name {
                    "ToByteArray" => StackItemType::ByteArray,
                    "ToBool" => StackItemType::Boolean,
                    _ => StackItemType::Integer,
                };
                self.emit_convert(typ);
            }
            "Equals" => self.prog.op(Opcode::Equal),
            "FromAddress" => {
                // The address literal is resolved here, at compile time; no
                // argument is pushed and no call is performed.
                let lit = call
                    .args
                    .first()
                    .and_then(|a| self.constant_of(a))
                    .and_then(|tv| match tv.value {
                        Some(Value::Str(s)) => Some(s),
                        _ => None,
                    });
                let Some(addr) = lit else {
                    self.fail(CodegenError::Unsupported(
                        "FromAddress argument must be a string literal".into(),
                    ));
                    return;
                };
                match vela_vm::address::decode(&addr) {
                    Ok(hash) => {
                        self.prog.bytes(&hash);
                        self.emit_convert(StackItemType::Buffer);
                    }
                    Err(e) => self.fail(CodegenError::Address(e)),
                }
            }
            _ => self.fail(CodegenError::UnknownBuiltin(name.to_string())),
        }
    }

    /// Lower a call to a bodyless interop wrapper into a single syscall.
    pub(crate) fn convert_syscall(&mut self, idx: usize) {
        let scope = &self.arena[idx];
        let api = scope.pkg.rsplit('/').next().unwrap_or("").to_string();
        let name = match scope.src {
            FuncSrc::Decl(d) => d.name.name.clone(),
            FuncSrc::Lambda(_) => String::new(),
        };
        match syscall::lookup(&api, &name) {
            Some(sc) => {
                self.prog.syscall(sc.api);
                if sc.convert_result_to_struct {
                    self.emit_convert(StackItemType::Struct);
                }
                self.prog.op(Opcode::Nop);
            }
            None => self.fail(CodegenError::UnknownSyscall { api, name }),
        }
    }
}
