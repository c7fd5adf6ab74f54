//! Vela bytecode generation.
//!
//! This crate lowers a type-checked AST to stack-machine bytecode: a
//! single-pass tree walk emits long-form branches against a label table,
//! then a resolution pass rewrites label indices into relative offsets and
//! a shortening pass compacts branches whose displacement fits in a signed
//! byte. The emitter owns all of its registries; compiling two programs
//! concurrently just means two [`Codegen`] values.

mod builtin;
mod debug;
mod error;
mod expr;
mod jumps;
mod scope;
mod stmt;
mod syscall;
mod usage;

pub use debug::{DebugInfo, DebugRange, DebugSeqPoint, MethodDebugInfo};
pub use error::CodegenError;
pub use scope::FuncRange;

use std::collections::HashMap;

use tracing::debug;

use vela_analysis::{Program, Type, TypeAndValue, Value};
use vela_syntax::{Decl, FuncDecl, NodeId, Span};
use vela_vm::{Opcode, ScriptBuilder, StackItemType};

use scope::{FuncScope, FuncSrc, VarKind};

/// Branch-target role of a named label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum LabelKind {
    /// Loop or switch entry.
    Start,
    /// `break` target.
    End,
    /// `continue` target.
    Post,
}

/// `(name, evaluation-stack size)` of an enclosing loop or switch, used by
/// `break`/`continue`/`return` to drain the stack before branching out.
#[derive(Debug)]
struct StackLabel {
    name: String,
    size: usize,
}

/// One compilation's entire mutable state.
pub struct Codegen<'a> {
    program: &'a Program,

    /// Output buffer; long branches carry label-index placeholders until
    /// [`Codegen::write_jumps`].
    prog: ScriptBuilder,
    /// First-error latch: once set, statement and expression emission are
    /// no-ops.
    err: Option<CodegenError>,

    /// Label table: target program offsets, `-1` while unset.
    labels: Vec<i32>,
    named_labels: HashMap<(String, LabelKind), u16>,
    label_list: Vec<StackLabel>,

    /// Function registry: qualified name to arena index.
    funcs: HashMap<String, usize>,
    arena: Vec<FuncScope<'a>>,
    /// Lambdas waiting to be emitted after the current function.
    pending_lambdas: Vec<usize>,
    /// Arena index of the function currently being emitted.
    scope: Option<usize>,

    globals: HashMap<String, usize>,
    const_map: HashMap<String, TypeAndValue>,

    /// Enclosing loop/switch labels for unlabelled break/continue.
    current_for: String,
    current_switch: String,
    /// User label waiting to attach to the next loop or switch.
    next_label: Option<String>,

    /// Import alias resolution for the file being walked.
    import_map: HashMap<String, String>,
    curr_pkg: String,

    documents: Vec<String>,
    sequence_points: HashMap<String, Vec<DebugSeqPoint>>,
    init_end_offset: usize,
}

/// Compile a type-checked program to bytecode plus its debug record.
pub fn compile(program: &Program) -> Result<(Vec<u8>, DebugInfo), CodegenError> {
    let mut c = Codegen::new(program);
    c.fill_document_info();

    let used = usage::analyze(program);
    c.resolve_func_decls();

    let (n_globals, has_init) = c.traverse_globals();
    if n_globals > 0 || has_init {
        c.prog.op(Opcode::Ret);
        c.init_end_offset = c.prog.len();
    }

    for pkg in &program.packages {
        if is_interop_path(&pkg.path) {
            continue;
        }
        for file in &pkg.files {
            c.set_file(&pkg.path, file);
            for decl in &file.decls {
                if let Decl::Func(f) = decl {
                    // Unused functions are not emitted; this saves a lot of
                    // bytecode space.
                    if !f.is_init() && used.contains(&c.name_for_decl(f)) {
                        c.convert_func_decl(f);
                    }
                }
            }
        }
    }

    if let Some(err) = c.err.take() {
        return Err(err);
    }

    let buf = std::mem::take(&mut c.prog).into_bytes();
    debug!(bytes = buf.len(), functions = c.funcs.len(), "resolving jumps");
    let buf = c.write_jumps(buf)?;
    let info = c.emit_debug_info();
    Ok((buf, info))
}

impl<'a> Codegen<'a> {
    fn new(program: &'a Program) -> Self {
        Self {
            program,
            prog: ScriptBuilder::new(),
            err: None,
            labels: Vec::new(),
            named_labels: HashMap::new(),
            label_list: Vec::new(),
            funcs: HashMap::new(),
            arena: Vec::new(),
            pending_lambdas: Vec::new(),
            scope: None,
            globals: HashMap::new(),
            const_map: HashMap::new(),
            current_for: String::new(),
            current_switch: String::new(),
            next_label: None,
            import_map: HashMap::new(),
            curr_pkg: String::new(),
            documents: Vec::new(),
            sequence_points: HashMap::new(),
            init_end_offset: 0,
        }
    }

    // === Error latch ===

    pub(crate) fn fail(&mut self, err: CodegenError) {
        if self.err.is_none() {
            self.err = Some(err);
        }
    }

    pub(crate) fn latched(&self) -> bool {
        self.err.is_some()
    }

    // === Resolver lookups ===

    pub(crate) fn type_of(&self, id: NodeId) -> Option<&'a Type> {
        self.program.info.type_of(id)
    }

    pub(crate) fn tv_of(&self, id: NodeId) -> Option<&'a TypeAndValue> {
        self.program.info.type_and_value_of(id)
    }

    // === Labels ===

    /// Append a fresh unset label and return its index.
    pub(crate) fn new_label(&mut self) -> u16 {
        let li = self.labels.len();
        if li > u16::MAX as usize {
            self.fail(CodegenError::LabelOverflow);
            return 0;
        }
        self.labels.push(-1);
        li as u16
    }

    fn new_named_label(&mut self, kind: LabelKind, name: &str) -> u16 {
        let l = self.new_label();
        self.named_labels.insert((name.to_string(), kind), l);
        l
    }

    /// Point a label at the current end of the program.
    pub(crate) fn set_label(&mut self, l: u16) {
        self.labels[l as usize] = self.prog.len() as i32;
    }

    /// Allocate the start label of a loop or switch, consuming any user
    /// label attached to the preceding labelled statement.
    fn generate_label(&mut self, kind: LabelKind) -> (u16, String) {
        let name = self
            .next_label
            .take()
            .unwrap_or_else(|| format!("@{}", self.labels.len()));
        (self.new_named_label(kind, &name), name)
    }

    fn label_offset(&mut self, kind: LabelKind, name: &str) -> u16 {
        match self.named_labels.get(&(name.to_string(), kind)) {
            Some(&l) => l,
            None => {
                self.fail(CodegenError::Internal(format!(
                    "no {:?} label named {:?}",
                    kind, name
                )));
                0
            }
        }
    }

    // === Stack labels ===

    fn push_stack_label(&mut self, name: &str, size: usize) {
        self.label_list.push(StackLabel { name: name.to_string(), size });
    }

    /// Pop the innermost stack label, draining what it left on the stack.
    fn drop_stack_label(&mut self) {
        let last = self.label_list.pop().expect("unbalanced stack labels");
        self.drop_items(last.size);
    }

    /// Remove `n` items from the evaluation stack. Large counts are packed
    /// into an array and dropped with a single instruction.
    pub(crate) fn drop_items(&mut self, n: usize) {
        if n < 4 {
            for _ in 0..n {
                self.prog.op(Opcode::Drop);
            }
            return;
        }
        self.prog.int(n as i64);
        self.prog.op(Opcode::Pack);
        self.prog.op(Opcode::Drop);
    }

    /// Reverse the top `n` stack items.
    pub(crate) fn emit_reverse(&mut self, n: usize) {
        match n {
            0 | 1 => {}
            2 => self.prog.op(Opcode::Swap),
            3 => self.prog.op(Opcode::Reverse3),
            4 => self.prog.op(Opcode::Reverse4),
            _ => {
                self.prog.int(n as i64);
                self.prog.op(Opcode::ReverseN);
            }
        }
    }

    // === Files, packages, names ===

    fn fill_document_info(&mut self) {
        let program = self.program;
        program.for_each_file(|_, file| {
            self.documents.push(file.path.clone());
        });
    }

    fn set_file(&mut self, pkg_path: &str, file: &'a vela_syntax::File) {
        self.curr_pkg = pkg_path.to_string();
        self.import_map.clear();
        for imp in &file.imports {
            self.import_map
                .insert(imp.local_name().to_string(), imp.path.clone());
        }
    }

    /// Fully qualified name of `name` in package `pkg` (an import alias, or
    /// empty for the current package).
    pub(crate) fn ident_name(&self, pkg: &str, name: &str) -> String {
        let path = if pkg.is_empty() {
            self.curr_pkg.as_str()
        } else {
            self.import_map.get(pkg).map(String::as_str).unwrap_or(pkg)
        };
        format!("{}.{}", path, name)
    }

    pub(crate) fn resolve_alias(&self, alias: &str) -> Option<&str> {
        self.import_map.get(alias).map(String::as_str)
    }

    /// Qualified name a function declaration is registered under: methods
    /// by receiver type, plain functions by package path.
    pub(crate) fn name_for_decl(&self, decl: &FuncDecl) -> String {
        if let Some(recv) = &decl.recv {
            match self.type_of(recv.name.id) {
                Some(t) => format!("{}.{}", t, decl.name.name),
                None => format!("{}.{}", recv.name.name, decl.name.name),
            }
        } else {
            self.ident_name("", &decl.name.name)
        }
    }

    // === Variables ===

    pub(crate) fn new_global(&mut self, name: &str) {
        let qualified = self.ident_name("", name);
        let index = self.globals.len();
        self.globals.insert(qualified, index);
    }

    /// Variable kind and slot index according to the current scope stack.
    /// Unknown local names allocate a fresh local slot; the prologue's
    /// static count already reserved room for them.
    fn get_var_index(&mut self, pkg: &str, name: &str) -> (VarKind, usize) {
        if pkg.is_empty() {
            if let Some(si) = self.scope {
                if let Some(v) = self.arena[si].vars.get(name) {
                    return v;
                }
            }
        }
        let qualified = self.ident_name(pkg, name);
        if let Some(&i) = self.globals.get(&qualified) {
            return (VarKind::Global, i);
        }
        match self.scope {
            Some(si) => (VarKind::Local, self.arena[si].new_local(name)),
            None => {
                self.fail(CodegenError::Internal(format!(
                    "unresolved global {}",
                    qualified
                )));
                (VarKind::Global, 0)
            }
        }
    }

    fn base_opcode(kind: VarKind) -> (Opcode, Opcode) {
        match kind {
            VarKind::Global => (Opcode::LdSFld0, Opcode::StSFld0),
            VarKind::Local => (Opcode::LdLoc0, Opcode::StLoc0),
            VarKind::Argument => (Opcode::LdArg0, Opcode::StArg0),
        }
    }

    fn emit_slot_access(&mut self, base: Opcode, index: usize) {
        if index > u8::MAX as usize {
            self.fail(CodegenError::Internal(format!(
                "slot index {} out of range",
                index
            )));
            return;
        }
        if index < 7 {
            let op = Opcode::from_u8(base as u8 + index as u8).expect("dense opcode range");
            self.prog.op(op);
        } else {
            let op = Opcode::from_u8(base as u8 + 7).expect("dense opcode range");
            self.prog.instruction(op, &[index as u8]);
        }
    }

    /// Load the named variable onto the evaluation stack.
    pub(crate) fn emit_load_var(&mut self, pkg: &str, name: &str) {
        let (kind, index) = self.get_var_index(pkg, name);
        let (load, _) = Self::base_opcode(kind);
        self.emit_slot_access(load, index);
    }

    /// Store the top of the evaluation stack into the named variable; the
    /// blank identifier drops it.
    pub(crate) fn emit_store_var(&mut self, pkg: &str, name: &str) {
        if name == "_" {
            self.prog.op(Opcode::Drop);
            return;
        }
        let (kind, index) = self.get_var_index(pkg, name);
        let (_, store) = Self::base_opcode(kind);
        self.emit_slot_access(store, index);
    }

    pub(crate) fn emit_load_field(&mut self, index: usize) {
        self.prog.int(index as i64);
        self.prog.op(Opcode::PickItem);
    }

    pub(crate) fn emit_store_struct_field(&mut self, index: usize) {
        self.prog.int(index as i64);
        self.prog.op(Opcode::Rot);
        self.prog.op(Opcode::SetItem);
    }

    // === Constants and defaults ===

    /// Push a folded constant in its narrowest emission form.
    pub(crate) fn emit_load_const(&mut self, tv: &TypeAndValue) {
        if self.latched() {
            return;
        }
        match (tv.ty.underlying(), &tv.value) {
            (Type::Int | Type::Byte, Some(Value::Int(v))) => self.prog.int(*v),
            (Type::String, Some(Value::Str(s))) => {
                let s = s.clone();
                self.prog.string(&s)
            }
            (Type::Bool, Some(Value::Bool(b))) => self.prog.bool(*b),
            _ => self.fail(CodegenError::Internal(format!(
                "cannot emit constant of type {}",
                tv.ty
            ))),
        }
    }

    /// Push the zero value of a type.
    pub(crate) fn emit_default(&mut self, ty: &Type) {
        match ty.underlying() {
            Type::Int | Type::Byte => self.prog.int(0),
            Type::String => self.prog.bytes(&[]),
            Type::Bool => self.prog.bool(false),
            Type::Struct(s) => {
                let s = s.clone();
                self.prog.int(s.fields.len() as i64);
                self.prog.op(Opcode::NewStruct);
                for (i, field) in s.fields.iter().enumerate() {
                    self.prog.op(Opcode::Dup);
                    self.prog.int(i as i64);
                    self.emit_default(&field.ty);
                    self.prog.op(Opcode::SetItem);
                }
            }
            _ => self.prog.op(Opcode::PushNull),
        }
    }

    /// Convert the top stack item to the given stack-item type.
    pub(crate) fn emit_convert(&mut self, typ: StackItemType) {
        self.prog.instruction(Opcode::Convert, &[typ as u8]);
    }

    // === Debug info plumbing ===

    pub(crate) fn save_sequence_point(&mut self, span: Span) {
        if span.is_none() {
            return;
        }
        let method = match self.scope {
            Some(si) => self.arena[si].name.clone(),
            None => debug::INITIALIZE_METHOD.to_string(),
        };
        self.sequence_points
            .entry(method)
            .or_default()
            .push(DebugSeqPoint {
                opcode: self.prog.len(),
                document: span.doc as usize,
                start_line: span.start_line,
                start_col: span.start_col,
                end_line: span.end_line,
                end_col: span.end_col,
            });
    }

    pub(crate) fn register_debug_variable(&mut self, name: &str, id: NodeId) {
        let ty = match self.type_of(id) {
            Some(t) => t.to_string(),
            None => return,
        };
        if let Some(si) = self.scope {
            self.arena[si].variables.push(format!("{},{}", name, ty));
        }
    }

    // === Function registry ===

    fn new_func(&mut self, decl: &'a FuncDecl) -> usize {
        let label = self.new_label();
        let name = self.name_for_decl(decl);
        let scope = FuncScope::new(name.clone(), self.curr_pkg.clone(), label, FuncSrc::Decl(decl));
        let idx = self.arena.len();
        self.arena.push(scope);
        self.funcs.insert(name, idx);
        idx
    }

    /// Register a lambda under a fresh label; its body is emitted after the
    /// enclosing function.
    pub(crate) fn new_lambda(&mut self, lit: &'a vela_syntax::FuncLit) -> u16 {
        let label = self.new_label();
        let name = format!("lambda@{}", label);
        let scope = FuncScope::new(name, self.curr_pkg.clone(), label, FuncSrc::Lambda(lit));
        let idx = self.arena.len();
        self.arena.push(scope);
        self.pending_lambdas.push(idx);
        label
    }

    /// Bring every function declaration into scope so calls can resolve
    /// forward references.
    fn resolve_func_decls(&mut self) {
        let program = self.program;
        for pkg in &program.packages {
            for file in &pkg.files {
                self.set_file(&pkg.path, file);
                for decl in &file.decls {
                    if let Decl::Func(f) = decl {
                        if !f.is_init() {
                            self.new_func(f);
                        }
                    }
                }
            }
        }
    }

    pub(crate) fn func_index(&self, qualified: &str) -> Option<usize> {
        self.funcs.get(qualified).copied()
    }

    // === Globals and init preamble ===

    /// Emit the initialisation preamble: global variable stores, then user
    /// `init` bodies, in package-declaration order.
    fn traverse_globals(&mut self) -> (usize, bool) {
        let program = self.program;
        let mut n = 0usize;
        let mut has_init = false;
        for pkg in &program.packages {
            for file in &pkg.files {
                self.set_file(&pkg.path, file);
                for decl in &file.decls {
                    match decl {
                        Decl::Var(v) => {
                            n += v.specs.iter().map(|s| s.names.len()).sum::<usize>();
                            self.emit_var_decl(v);
                        }
                        Decl::Const(cd) => self.record_const_decl(cd),
                        Decl::Func(f) if f.is_init() => has_init = true,
                        Decl::Func(_) => {}
                    }
                }
            }
        }
        if has_init {
            for pkg in &program.packages {
                for file in &pkg.files {
                    self.set_file(&pkg.path, file);
                    for decl in &file.decls {
                        if let Decl::Func(f) = decl {
                            if f.is_init() {
                                self.convert_init_func(f);
                            }
                        }
                    }
                }
            }
        }
        (n, has_init)
    }

    // === Function emission ===

    fn convert_func_decl(&mut self, decl: &'a FuncDecl) {
        let name = self.name_for_decl(decl);
        let idx = match self.func_index(&name) {
            Some(idx) => {
                // Syscall and builtin wrappers have no body to lower.
                if self.arena[idx].body().is_none() {
                    return;
                }
                idx
            }
            None => self.new_func(decl),
        };
        let label = self.arena[idx].label;
        self.set_label(label);
        self.convert_func_scope(idx, false, false);
    }

    fn convert_init_func(&mut self, decl: &'a FuncDecl) {
        let label = self.new_label();
        let scope = FuncScope::new(
            "init".to_string(),
            self.curr_pkg.clone(),
            label,
            FuncSrc::Decl(decl),
        );
        let idx = self.arena.len();
        self.arena.push(scope);
        self.convert_func_scope(idx, true, false);
    }

    fn convert_lambda(&mut self, idx: usize) {
        let label = self.arena[idx].label;
        self.set_label(label);
        self.convert_func_scope(idx, false, true);
    }

    /// Emit one function: slot-reservation prologue, receiver/parameter
    /// bindings, body, and a trailing return when control can fall off the
    /// end. Lambdas collected along the way follow immediately after.
    fn convert_func_scope(&mut self, idx: usize, is_init: bool, is_lambda: bool) {
        let src = self.arena[idx].src;
        let (body, results, params, recv) = match src {
            FuncSrc::Decl(d) => (d.body.as_ref(), &d.results[..], &d.params[..], d.recv.as_ref()),
            FuncSrc::Lambda(l) => (Some(&l.body), &l.results[..], &l.params[..], None),
        };

        self.arena[idx].rng.start = self.prog.len() as u32;
        let prev_scope = self.scope.replace(idx);

        let size_loc = body.map_or(0, |b| scope::count_locals(results, b));
        if size_loc > 255 {
            self.fail(CodegenError::TooManyLocals);
        }
        let size_arg = usize::from(recv.is_some()) + params.len();
        if size_arg > 255 {
            self.fail(CodegenError::TooManyArguments);
        }
        if size_loc != 0 || size_arg != 0 {
            self.prog
                .instruction(Opcode::InitSlot, &[size_loc as u8, size_arg as u8]);
        }

        self.arena[idx].vars.new_scope();

        // The receiver is just the first argument.
        if let Some(r) = recv {
            self.arena[idx].new_variable(VarKind::Argument, &r.name.name);
            self.register_debug_variable(&r.name.name, r.name.id);
        }
        for p in params {
            self.arena[idx].new_variable(VarKind::Argument, &p.name.name);
            self.register_debug_variable(&p.name.name, p.name.id);
        }

        if let Some(body) = body {
            self.emit_block(body);
            if !is_init && !body.ends_with_return() {
                self.save_sequence_point(body.span);
                self.prog.op(Opcode::Ret);
            }
        }

        self.arena[idx].rng.end = self.prog.len().saturating_sub(1) as u32;
        self.arena[idx].vars.drop_scope();
        self.arena[idx].emitted = true;
        self.scope = prev_scope;

        if !is_lambda {
            let mut cursor = 0;
            while cursor < self.pending_lambdas.len() {
                let l = self.pending_lambdas[cursor];
                cursor += 1;
                self.convert_lambda(l);
            }
            self.pending_lambdas.clear();
        }
    }
}

/// Interop packages hold syscall wrappers; their declarations are never
/// lowered to bytecode.
pub(crate) fn is_interop_path(path: &str) -> bool {
    path.split('/').any(|seg| seg == "interop")
}
