//! Expression lowering.

use vela_analysis::Type;
use vela_syntax::{
    BinaryExpr, BinaryOp, CallExpr, CompositeLit, Expr, ExprKind, Lit, MakeExpr, SelectorExpr,
    SliceExpr, UnaryExpr, UnaryOp,
};
use vela_vm::{Opcode, StackItemType};

use crate::builtin;
use crate::error::CodegenError;
use crate::Codegen;

impl<'a> Codegen<'a> {
    pub(crate) fn emit_expr(&mut self, e: &'a Expr) {
        if self.latched() {
            return;
        }
        match &e.kind {
            ExprKind::Lit(Lit::Nil) => self.prog.op(Opcode::PushNull),
            ExprKind::Lit(_) => match self.constant_of(e) {
                Some(tv) => self.emit_load_const(&tv),
                None => self.fail(CodegenError::Internal("unresolved literal".into())),
            },
            ExprKind::Ident(ident) => {
                if let Some(tv) = self.tv_of(e.id) {
                    if tv.value.is_some() {
                        let tv = tv.clone();
                        self.emit_load_const(&tv);
                        return;
                    }
                }
                if ident.name == "nil" {
                    self.prog.op(Opcode::PushNull);
                } else {
                    let name = ident.name.clone();
                    self.emit_load_var("", &name);
                }
            }
            ExprKind::Binary(bin) => self.emit_binary_expr(e, bin, false, false, 0),
            ExprKind::Unary(unary) => self.emit_unary(unary),
            ExprKind::Deref(inner) => {
                if self
                    .type_of(inner.id)
                    .and_then(|t| t.struct_type())
                    .is_none()
                {
                    self.fail(CodegenError::Unsupported(
                        "dereferencing is only supported on structs".into(),
                    ));
                    return;
                }
                self.emit_expr(inner);
                self.emit_convert(StackItemType::Struct);
            }
            ExprKind::Paren(inner) => self.emit_expr(inner),
            ExprKind::Selector(sel) => self.emit_selector_load(sel),
            ExprKind::Index(index) => {
                self.emit_expr(&index.expr);
                self.emit_expr(&index.index);
                self.prog.op(Opcode::PickItem);
            }
            ExprKind::Slice(slice) => self.emit_slice_expr(slice),
            ExprKind::CompositeLit(lit) => self.emit_composite_lit(e, lit),
            ExprKind::Call(call) => self.emit_call(e, call),
            ExprKind::FuncLit(lit) => {
                let label = self.new_lambda(lit);
                self.prog.push_address(label);
            }
            ExprKind::TypeAssert(inner) => {
                self.emit_expr(inner);
                match self.type_of(e.id) {
                    Some(t) => {
                        let item = stackitem_type(t);
                        self.emit_convert(item);
                    }
                    None => self.fail(CodegenError::Internal("untyped assertion".into())),
                }
            }
            ExprKind::Conversion(inner) => {
                self.emit_expr(inner);
                match self.type_of(e.id) {
                    Some(t) if t.is_byte_slice() => self.emit_convert(StackItemType::Buffer),
                    Some(t) if t.is_string() => self.emit_convert(StackItemType::ByteArray),
                    // Integer-width conversions carry no runtime effect.
                    _ => {}
                }
            }
            ExprKind::Make(make) => self.emit_make(e, make),
        }
    }

    // === Boolean expressions and jump threading ===

    /// Emit a boolean expression. With `need_jump`, a jump to `jmp_label`
    /// is taken when the expression evaluates to `cond` and nothing is left
    /// on the stack.
    pub(crate) fn emit_bool_expr(&mut self, e: &'a Expr, need_jump: bool, cond: bool, jmp_label: u16) {
        if let ExprKind::Binary(bin) = &e.kind {
            self.emit_binary_expr(e, bin, need_jump, cond, jmp_label);
        } else {
            self.emit_expr(e);
            if need_jump {
                self.emit_jump_on_condition(cond, jmp_label);
            }
        }
    }

    fn emit_jump_on_condition(&mut self, cond: bool, jmp_label: u16) {
        if cond {
            self.prog.jmp(Opcode::JmpIfL, jmp_label);
        } else {
            self.prog.jmp(Opcode::JmpIfNotL, jmp_label);
        }
    }

    fn emit_binary_expr(
        &mut self,
        e: &'a Expr,
        bin: &'a BinaryExpr,
        need_jump: bool,
        cond: bool,
        jmp_label: u16,
    ) {
        // The resolver folds constant subtrees; emit the value directly.
        if let Some(tv) = self.tv_of(e.id) {
            if tv.value.is_some() {
                let tv = tv.clone();
                let is_bool = tv.ty.is_bool();
                self.emit_load_const(&tv);
                if need_jump && is_bool {
                    self.emit_jump_on_condition(cond, jmp_label);
                }
                return;
            }
        }

        if matches!(bin.op, BinaryOp::Eq | BinaryOp::NotEq) {
            if let Some(arg) = nil_compare_arg(bin) {
                self.emit_expr(arg);
                self.prog.op(Opcode::IsNull);
                if need_jump {
                    self.emit_jump_on_condition(cond == (bin.op == BinaryOp::Eq), jmp_label);
                } else if bin.op == BinaryOp::NotEq {
                    self.prog.op(Opcode::Not);
                }
                return;
            }
        }

        match bin.op {
            BinaryOp::LogAnd | BinaryOp::LogOr => {
                let end = self.new_label();

                // true || .. == true, false && .. == false
                let cond_short = bin.op == BinaryOp::LogOr;
                if need_jump {
                    let l = if cond == cond_short { jmp_label } else { end };
                    self.emit_bool_expr(&bin.left, true, cond_short, l);
                    self.emit_bool_expr(&bin.right, true, cond, jmp_label);
                } else {
                    let push = self.new_label();
                    self.emit_bool_expr(&bin.left, true, cond_short, push);
                    self.emit_bool_expr(&bin.right, false, false, 0);
                    self.prog.jmp(Opcode::JmpL, end);
                    self.set_label(push);
                    self.prog.bool(cond_short);
                }
                self.set_label(end);
            }
            _ => {
                self.emit_expr(&bin.left);
                self.emit_expr(&bin.right);
                let typ = self.type_of(bin.left.id);
                if !need_jump {
                    self.emit_binary_op(bin.op, typ);
                    return;
                }
                match jump_for_op(bin.op, typ) {
                    Some(mut op) => {
                        if !cond {
                            op = op.negate_jump();
                        }
                        self.prog.jmp(op, jmp_label);
                    }
                    None => {
                        self.emit_binary_op(bin.op, typ);
                        self.emit_jump_on_condition(cond, jmp_label);
                    }
                }
            }
        }
    }

    // === Operators ===

    fn emit_binary_op(&mut self, op: BinaryOp, typ: Option<&Type>) {
        let is_string = typ.map(Type::is_string).unwrap_or(false);
        let is_number = typ.map(Type::is_number).unwrap_or(false);
        let opcode = match op {
            // string concatenation has its own opcode
            BinaryOp::Add if is_string => Opcode::Cat,
            BinaryOp::Add => Opcode::Add,
            BinaryOp::Sub => Opcode::Sub,
            BinaryOp::Mul => Opcode::Mul,
            BinaryOp::Div => Opcode::Div,
            BinaryOp::Rem => Opcode::Mod,
            BinaryOp::Lt => Opcode::Lt,
            BinaryOp::LtEq => Opcode::Le,
            BinaryOp::Gt => Opcode::Gt,
            BinaryOp::GtEq => Opcode::Ge,
            BinaryOp::Eq if is_number => Opcode::NumEqual,
            BinaryOp::Eq => Opcode::Equal,
            BinaryOp::NotEq if is_number => Opcode::NumNotEqual,
            BinaryOp::NotEq => Opcode::NotEqual,
            BinaryOp::And => Opcode::And,
            BinaryOp::Or => Opcode::Or,
            BinaryOp::Xor => Opcode::Xor,
            BinaryOp::Shl => Opcode::Shl,
            BinaryOp::Shr => Opcode::Shr,
            BinaryOp::LogAnd | BinaryOp::LogOr => {
                self.fail(CodegenError::Internal(
                    "short-circuit operator reached plain emission".into(),
                ));
                return;
            }
        };
        self.prog.op(opcode);
    }

    /// Combined operator of a compound assignment.
    pub(crate) fn emit_assign_op(&mut self, op: vela_syntax::AssignOp, typ: Option<&Type>) {
        use vela_syntax::AssignOp;
        let bin = match op {
            AssignOp::Add => BinaryOp::Add,
            AssignOp::Sub => BinaryOp::Sub,
            AssignOp::Mul => BinaryOp::Mul,
            AssignOp::Div => BinaryOp::Div,
            AssignOp::Rem => BinaryOp::Rem,
            AssignOp::And => BinaryOp::And,
            AssignOp::Or => BinaryOp::Or,
            AssignOp::Xor => BinaryOp::Xor,
            AssignOp::Shl => BinaryOp::Shl,
            AssignOp::Shr => BinaryOp::Shr,
            AssignOp::Assign | AssignOp::Define => {
                self.fail(CodegenError::Internal("plain assign has no operator".into()));
                return;
            }
        };
        self.emit_binary_op(bin, typ);
    }

    /// Equality opcode for a switch tag of the given type.
    pub(crate) fn comparison_eq_opcode(&self, typ: Option<&Type>) -> Opcode {
        if typ.map(Type::is_number).unwrap_or(false) {
            Opcode::NumEqual
        } else {
            Opcode::Equal
        }
    }

    // === Selectors, indexing, slicing ===

    fn emit_selector_load(&mut self, sel: &'a SelectorExpr) {
        match self.type_of(sel.expr.id) {
            None => {
                // A package-qualified global or constant.
                let ExprKind::Ident(alias) = &sel.expr.kind else {
                    self.fail(CodegenError::Unsupported(
                        "selector on non-identifier package expression".into(),
                    ));
                    return;
                };
                if self.resolve_alias(&alias.name).is_none() {
                    self.fail(CodegenError::UnknownPackage(alias.name.clone()));
                    return;
                }
                let qualified = self.ident_name(&alias.name, &sel.sel.name);
                if let Some(tv) = self.const_map.get(&qualified) {
                    let tv = tv.clone();
                    self.emit_load_const(&tv);
                } else {
                    let (pkg, name) = (alias.name.clone(), sel.sel.name.clone());
                    self.emit_load_var(&pkg, &name);
                }
            }
            Some(typ) => {
                let Some(strct) = typ.struct_type() else {
                    self.fail(CodegenError::Unsupported(
                        "selectors are supported only on structs".into(),
                    ));
                    return;
                };
                let Some(index) = strct.field_index(&sel.sel.name) else {
                    self.fail(CodegenError::FunctionNotFound(format!(
                        "{}.{}",
                        typ, sel.sel.name
                    )));
                    return;
                };
                self.emit_expr(&sel.expr); // load the struct
                self.emit_load_field(index);
            }
        }
    }

    fn emit_slice_expr(&mut self, slice: &'a SliceExpr) {
        self.emit_expr(&slice.expr);

        match &slice.low {
            Some(low) => self.emit_expr(low),
            None => self.prog.int(0),
        }

        match &slice.high {
            Some(high) => self.emit_expr(high),
            None => {
                self.prog.op(Opcode::Over);
                self.prog.op(Opcode::Size);
            }
        }

        self.prog.op(Opcode::Over);
        self.prog.op(Opcode::Sub);
        self.prog.op(Opcode::SubStr);
    }

    fn emit_unary(&mut self, unary: &'a UnaryExpr) {
        if unary.op == UnaryOp::Addr {
            // Address-of materialises a struct literal with array (shared
            // reference) semantics.
            let ExprKind::CompositeLit(lit) = &unary.expr.kind else {
                self.fail(CodegenError::Unsupported(
                    "'&' can be used only with struct literals".into(),
                ));
                return;
            };
            self.convert_struct(&unary.expr, lit, true);
            return;
        }

        self.emit_expr(&unary.expr);
        match unary.op {
            UnaryOp::Pos => {} // +x == x
            UnaryOp::Neg => self.prog.op(Opcode::Negate),
            UnaryOp::Not => self.prog.op(Opcode::Not),
            UnaryOp::Invert => self.prog.op(Opcode::Invert),
            UnaryOp::Addr => unreachable!("handled above"),
        }
    }

    // === Composite literals ===

    fn emit_composite_lit(&mut self, e: &'a Expr, lit: &'a CompositeLit) {
        let Some(typ) = self.type_of(e.id) else {
            self.fail(CodegenError::Internal("untyped composite literal".into()));
            return;
        };
        match typ.underlying() {
            Type::Struct(_) => self.convert_struct(e, lit, false),
            Type::Map(_, _) => self.convert_map(lit),
            _ => {
                if typ.is_byte_slice() {
                    self.convert_byte_array(lit);
                    return;
                }
                let ln = lit.elems.len();
                for elem in lit.elems.iter().rev() {
                    self.emit_expr(&elem.value);
                }
                self.prog.int(ln as i64);
                self.prog.op(Opcode::Pack);
            }
        }
    }

    /// Build a struct value field by field. With `ptr` the literal gets
    /// array semantics, so the resulting item is shared rather than copied
    /// on assignment.
    fn convert_struct(&mut self, e: &'a Expr, lit: &'a CompositeLit, ptr: bool) {
        let strct = match self.type_of(e.id).map(|t| t.underlying()) {
            Some(Type::Struct(s)) => s,
            _ => {
                self.fail(CodegenError::Internal(
                    "the given literal is not of type struct".into(),
                ));
                return;
            }
        };

        self.prog.op(Opcode::Nop);
        self.prog.int(strct.fields.len() as i64);
        self.prog.op(if ptr { Opcode::NewArray } else { Opcode::NewStruct });

        let keyed = lit.elems.first().map(|el| el.key.is_some()).unwrap_or(false);

        // Every field gets a value, declared or zero.
        for (i, field) in strct.fields.iter().enumerate() {
            self.prog.op(Opcode::Dup);
            self.prog.int(i as i64);

            let mut initialized = false;
            if !keyed {
                if let Some(elem) = lit.elems.get(i) {
                    self.emit_expr(&elem.value);
                    initialized = true;
                }
            } else {
                for elem in &lit.elems {
                    let named = matches!(
                        &elem.key,
                        Some(Expr { kind: ExprKind::Ident(id), .. }) if id.name == field.name
                    );
                    if named {
                        self.emit_expr(&elem.value);
                        initialized = true;
                        break;
                    }
                }
            }
            if !initialized {
                self.emit_default(&field.ty);
            }
            self.prog.op(Opcode::SetItem);
        }
    }

    fn convert_map(&mut self, lit: &'a CompositeLit) {
        self.prog.op(Opcode::NewMap);
        for elem in &lit.elems {
            let Some(key) = &elem.key else {
                self.fail(CodegenError::Internal("map literal entry without key".into()));
                return;
            };
            self.prog.op(Opcode::Dup);
            self.emit_expr(key);
            self.emit_expr(&elem.value);
            self.prog.op(Opcode::SetItem);
        }
    }

    /// A byte-slice literal of constants becomes one bytes push converted
    /// to a buffer.
    fn convert_byte_array(&mut self, lit: &'a CompositeLit) {
        let mut buf = Vec::with_capacity(lit.elems.len());
        for elem in &lit.elems {
            match self.constant_of(&elem.value).and_then(|tv| tv.value) {
                Some(vela_analysis::Value::Int(v)) => buf.push(v as u8),
                _ => {
                    self.fail(CodegenError::Unsupported(
                        "byte slice literals must have constant elements".into(),
                    ));
                    return;
                }
            }
        }
        self.prog.bytes(&buf);
        self.emit_convert(StackItemType::Buffer);
    }

    // === Calls ===

    fn emit_call(&mut self, e: &'a Expr, call: &'a CallExpr) {
        let mut num_args = call.args.len();
        let mut fidx: Option<usize> = None;
        let mut builtin_name: Option<String> = None;
        let mut var_call: Option<String> = None;
        let mut is_literal = false;

        match &call.func.kind {
            ExprKind::Ident(ident) => {
                if builtin::is_go_builtin(&ident.name) {
                    builtin_name = Some(ident.name.clone());
                } else {
                    let qualified = self.ident_name("", &ident.name);
                    fidx = self.func_index(&qualified);
                    if fidx.is_none() {
                        // Not a declaration: this can only be a call through
                        // a function-typed variable.
                        let is_func_var = self
                            .type_of(call.func.id)
                            .map(|t| t.signature().is_some())
                            .unwrap_or(false);
                        if is_func_var {
                            var_call = Some(ident.name.clone());
                        } else {
                            self.fail(CodegenError::FunctionNotFound(ident.name.clone()));
                            return;
                        }
                    }
                }
            }
            ExprKind::Selector(sel) => {
                let (name, is_method) = self.func_name_from_selector(&call.func, sel);
                if is_method {
                    // The receiver is the callee's first argument.
                    self.emit_expr(&sel.expr);
                    num_args += 1;
                }
                match self.func_index(&name) {
                    Some(i) => {
                        fidx = Some(i);
                        if self.is_custom_builtin(i) {
                            builtin_name = Some(sel.sel.name.clone());
                        }
                    }
                    None => {
                        self.fail(CodegenError::FunctionNotFound(name));
                        return;
                    }
                }
            }
            ExprKind::FuncLit(_) => is_literal = true,
            _ => {
                self.fail(CodegenError::Unsupported("call target".into()));
                return;
            }
        }

        self.save_sequence_point(e.span);

        // FromAddress converts at compile time and panic walks its own
        // argument, so neither pushes arguments here.
        let args: &'a [Expr] = match builtin_name.as_deref() {
            Some("FromAddress") | Some("panic") => &[],
            _ => &call.args,
        };

        for arg in args {
            self.emit_expr(arg);
            let is_value_struct = matches!(
                self.type_of(arg.id).map(|t| t.underlying()),
                Some(Type::Struct(s)) if !s.interop
            );
            if is_value_struct {
                // Pass structs by value: bounce through a one-element array,
                // whose APPEND deep-copies struct items. Interop handles are
                // exempt, they are identities.
                self.prog.op(Opcode::NewArray0);
                self.prog.op(Opcode::Dup);
                self.prog.op(Opcode::Rot);
                self.prog.op(Opcode::Append);
                self.prog.int(0);
                self.prog.op(Opcode::PickItem);
            }
        }

        let is_builtin = builtin_name.is_some();
        if !is_builtin {
            let (variadic, param_count) = self.callee_shape(&call.func, fidx);
            if variadic && !call.ellipsis {
                // Pack the trailing arguments into one array argument,
                // which may be empty.
                let var_size = call.args.len() + 1 - param_count;
                self.emit_reverse(var_size);
                self.prog.int(var_size as i64);
                self.prog.op(Opcode::Pack);
                num_args = num_args + 1 - var_size;
            }
            // The callee expects its first argument topmost.
            self.emit_reverse(num_args);
        }

        if let Some(name) = builtin_name {
            self.convert_builtin(call, &name);
        } else if let Some(name) = var_call {
            self.emit_load_var("", &name);
            self.prog.op(Opcode::CallA);
        } else if is_literal {
            self.emit_expr(&call.func);
            self.prog.op(Opcode::CallA);
        } else {
            let idx = fidx.expect("resolved above");
            if self.arena[idx].body().is_none() && crate::is_interop_path(&self.arena[idx].pkg) {
                self.convert_syscall(idx);
            } else {
                let label = self.arena[idx].label;
                self.prog.call(label);
            }
        }
    }

    /// Variadic flag and parameter count of a callee, preferring its
    /// declaration over the resolver's type.
    fn callee_shape(&self, func: &Expr, fidx: Option<usize>) -> (bool, usize) {
        if let Some(i) = fidx {
            let params = self.arena[i].params();
            return (
                params.last().map(|p| p.variadic).unwrap_or(false),
                params.len(),
            );
        }
        if let ExprKind::FuncLit(lit) = &func.kind {
            return (
                lit.params.last().map(|p| p.variadic).unwrap_or(false),
                lit.params.len(),
            );
        }
        match self.type_of(func.id).and_then(|t| t.signature()) {
            Some(sig) => (sig.variadic, sig.params.len()),
            None => (false, 0),
        }
    }

    /// Qualified function name behind a selector callee; true when it is a
    /// method call rather than a package-qualified call.
    pub(crate) fn func_name_from_selector(
        &self,
        callee: &Expr,
        sel: &SelectorExpr,
    ) -> (String, bool) {
        if self.program.info.is_method_selection(callee.id) {
            let recv = self
                .type_of(sel.expr.id)
                .map(|t| t.to_string())
                .unwrap_or_default();
            (format!("{}.{}", recv, sel.sel.name), true)
        } else if let ExprKind::Ident(alias) = &sel.expr.kind {
            (self.ident_name(&alias.name, &sel.sel.name), false)
        } else {
            (String::new(), false)
        }
    }

    /// How many values a call leaves on the evaluation stack.
    pub(crate) fn call_result_count(&self, func: &Expr, _args: &[Expr]) -> usize {
        match &func.kind {
            ExprKind::Ident(ident) => {
                if let Some(n) = builtin::result_count(&ident.name) {
                    return n;
                }
                if let Some(i) = self.func_index(&self.ident_name("", &ident.name)) {
                    return self.arena[i].results().len();
                }
                self.type_of(func.id)
                    .and_then(|t| t.signature())
                    .map(|s| s.results.len())
                    .unwrap_or(0)
            }
            ExprKind::Selector(sel) => {
                let (name, _) = self.func_name_from_selector(func, sel);
                if let Some(i) = self.func_index(&name) {
                    return self.arena[i].results().len();
                }
                self.type_of(func.id)
                    .and_then(|t| t.signature())
                    .map(|s| s.results.len())
                    .unwrap_or(0)
            }
            ExprKind::FuncLit(lit) => lit.results.len(),
            _ => 0,
        }
    }

    fn emit_make(&mut self, e: &'a Expr, make: &'a MakeExpr) {
        let Some(typ) = self.type_of(e.id) else {
            self.fail(CodegenError::Internal("untyped make".into()));
            return;
        };
        if typ.is_byte_slice() {
            match &make.size {
                Some(size) => self.emit_expr(size),
                None => {
                    self.fail(CodegenError::Unsupported("make of a slice needs a size".into()));
                    return;
                }
            }
            self.prog.op(Opcode::NewBuffer);
            return;
        }
        match typ.underlying() {
            Type::Slice(_) => {
                match &make.size {
                    Some(size) => self.emit_expr(size),
                    None => {
                        self.fail(CodegenError::Unsupported(
                            "make of a slice needs a size".into(),
                        ));
                        return;
                    }
                }
                self.prog.op(Opcode::NewArray);
            }
            Type::Map(_, _) => self.prog.op(Opcode::NewMap),
            _ => self.fail(CodegenError::Unsupported("make of this type".into())),
        }
    }
}

/// The non-nil side of a nil comparison, when there is one.
fn nil_compare_arg<'e>(bin: &'e BinaryExpr) -> Option<&'e Expr> {
    if is_expr_nil(&bin.left) {
        Some(&bin.right)
    } else if is_expr_nil(&bin.right) {
        Some(&bin.left)
    } else {
        None
    }
}

fn is_expr_nil(e: &Expr) -> bool {
    match &e.kind {
        ExprKind::Lit(Lit::Nil) => true,
        ExprKind::Ident(id) => id.name == "nil",
        _ => false,
    }
}

/// Fused jump opcode for a comparison used directly as a branch condition.
fn jump_for_op(op: BinaryOp, typ: Option<&Type>) -> Option<Opcode> {
    match op {
        BinaryOp::Gt => Some(Opcode::JmpGtL),
        BinaryOp::GtEq => Some(Opcode::JmpGeL),
        BinaryOp::Lt => Some(Opcode::JmpLtL),
        BinaryOp::LtEq => Some(Opcode::JmpLeL),
        BinaryOp::Eq | BinaryOp::NotEq => {
            if typ.map(Type::is_number).unwrap_or(false) {
                if op == BinaryOp::Eq {
                    Some(Opcode::JmpEqL)
                } else {
                    Some(Opcode::JmpNeL)
                }
            } else {
                None
            }
        }
        _ => None,
    }
}

/// The VM stack item type a source type converts to.
fn stackitem_type(t: &Type) -> StackItemType {
    if t.is_byte_slice() {
        return StackItemType::Buffer;
    }
    match t.underlying() {
        Type::Int | Type::Byte => StackItemType::Integer,
        Type::Bool => StackItemType::Boolean,
        Type::String => StackItemType::ByteArray,
        Type::Slice(_) => StackItemType::Array,
        Type::Map(_, _) => StackItemType::Map,
        Type::Struct(_) => StackItemType::Struct,
        Type::Pointer(_) => StackItemType::Array,
        _ => StackItemType::Any,
    }
}
