//! Statement lowering.

use vela_analysis::{Type, TypeAndValue, Value};
use vela_syntax::{
    AssignStmt, Block, BranchKind, ConstDecl, ExprKind, ForStmt, IfStmt, IncDecStmt, Lit,
    RangeStmt, Stmt, StmtKind, SwitchStmt, VarDecl,
};
use vela_vm::Opcode;

use crate::error::CodegenError;
use crate::{Codegen, LabelKind};

impl<'a> Codegen<'a> {
    pub(crate) fn emit_block(&mut self, block: &'a Block) {
        if let Some(si) = self.scope {
            self.arena[si].vars.new_scope();
        }
        for stmt in &block.stmts {
            self.emit_stmt(stmt);
        }
        if let Some(si) = self.scope {
            self.arena[si].vars.drop_scope();
        }
    }

    pub(crate) fn emit_stmt(&mut self, stmt: &'a Stmt) {
        if self.latched() {
            return;
        }
        match &stmt.kind {
            StmtKind::Block(block) => self.emit_block(block),
            StmtKind::Var(decl) => self.emit_var_decl(decl),
            StmtKind::Const(decl) => self.record_const_decl(decl),
            StmtKind::Assign(assign) => self.emit_assign(assign, stmt),
            StmtKind::Expr(e) => {
                self.emit_expr(e);
                let results = match &e.kind {
                    ExprKind::Call(call) => self.call_result_count(&call.func, &call.args),
                    _ => 0,
                };
                self.drop_items(results);
            }
            StmtKind::Return(values) => self.emit_return(values, stmt),
            StmtKind::If(ifstmt) => self.emit_if(ifstmt),
            StmtKind::For(forstmt) => self.emit_for(forstmt),
            StmtKind::Range(range) => self.emit_range(range),
            StmtKind::Switch(switch) => self.emit_switch(switch),
            StmtKind::IncDec(incdec) => self.emit_inc_dec(incdec),
            StmtKind::Branch(branch) => self.emit_branch(branch.kind, branch.label.as_deref()),
            StmtKind::Labeled(labeled) => {
                self.next_label = Some(labeled.label.clone());
                self.emit_stmt(&labeled.stmt);
            }
            // A fallthrough in tail position is consumed by the switch
            // lowering; anywhere else it contributes nothing.
            StmtKind::Fallthrough => {}
            StmtKind::Empty => {}
        }
    }

    // === Declarations ===

    /// Lower a `var` declaration group. Names are registered first, then
    /// each variable is initialised with its value or the type's zero
    /// value.
    pub(crate) fn emit_var_decl(&mut self, decl: &'a VarDecl) {
        self.save_sequence_point(decl.span);
        for spec in &decl.specs {
            for name in &spec.names {
                match self.scope {
                    None => self.new_global(&name.name),
                    Some(si) => {
                        self.arena[si].new_local(&name.name);
                        self.register_debug_variable(&name.name, name.id);
                    }
                }
            }
            for (i, name) in spec.names.iter().enumerate() {
                if !spec.values.is_empty() {
                    self.emit_expr(&spec.values[i]);
                } else {
                    match self.type_of(name.id) {
                        Some(t) => {
                            let t = t.clone();
                            self.emit_default(&t);
                        }
                        None => self.fail(CodegenError::Internal(format!(
                            "no type for variable {}",
                            name.name
                        ))),
                    }
                }
                self.emit_store_var("", &name.name);
            }
        }
    }

    /// Record `const` declarations; references are inlined at use sites, no
    /// bytecode is emitted here.
    pub(crate) fn record_const_decl(&mut self, decl: &'a ConstDecl) {
        for spec in &decl.specs {
            for (i, name) in spec.names.iter().enumerate() {
                let Some(value) = spec.values.get(i) else {
                    self.fail(CodegenError::Internal(format!(
                        "constant {} has no value",
                        name.name
                    )));
                    return;
                };
                let Some(tv) = self.constant_of(value) else {
                    self.fail(CodegenError::Internal(format!(
                        "constant {} is not resolved",
                        name.name
                    )));
                    return;
                };
                let key = self.ident_name("", &name.name);
                self.const_map.insert(key, tv);
            }
        }
    }

    /// The folded constant of an expression: the resolver's, or the literal
    /// payload for plain literals.
    pub(crate) fn constant_of(&self, e: &vela_syntax::Expr) -> Option<TypeAndValue> {
        if let Some(tv) = self.tv_of(e.id) {
            if tv.value.is_some() {
                return Some(tv.clone());
            }
        }
        match &e.kind {
            ExprKind::Lit(Lit::Int(v)) => Some(TypeAndValue::constant(Type::Int, Value::Int(*v))),
            ExprKind::Lit(Lit::Str(s)) => {
                Some(TypeAndValue::constant(Type::String, Value::Str(s.clone())))
            }
            ExprKind::Lit(Lit::Bool(b)) => {
                Some(TypeAndValue::constant(Type::Bool, Value::Bool(*b)))
            }
            _ => None,
        }
    }

    // === Assignment ===

    fn emit_assign(&mut self, assign: &'a AssignStmt, stmt: &'a Stmt) {
        self.save_sequence_point(stmt.span);
        let multi_ret = assign.rhs.len() != assign.lhs.len();
        let is_assign_op = assign.op.is_compound();
        if is_assign_op {
            // Compound assignment has exactly one target: load it, evaluate
            // the operand, apply the combined operator.
            self.emit_expr(&assign.lhs[0]);
            self.emit_expr(&assign.rhs[0]);
            let typ = self.type_of(assign.rhs[0].id).cloned();
            self.emit_assign_op(assign.op, typ.as_ref());
        }
        for i in 0..assign.lhs.len() {
            match &assign.lhs[i].kind {
                ExprKind::Ident(ident) => {
                    if assign.op == vela_syntax::AssignOp::Define {
                        if !multi_ret {
                            self.register_debug_variable(&ident.name, assign.rhs[i].id);
                        }
                        if !ident.is_blank() {
                            if let Some(si) = self.scope {
                                self.arena[si].new_local(&ident.name);
                            }
                        }
                    }
                    if !is_assign_op && (i == 0 || !multi_ret) {
                        let rhs = if multi_ret { &assign.rhs[0] } else { &assign.rhs[i] };
                        self.emit_expr(rhs);
                    }
                    self.emit_store_var("", &ident.name);
                }
                ExprKind::Selector(sel) => {
                    if !is_assign_op {
                        self.emit_expr(&assign.rhs[i]);
                    }
                    match self.type_of(sel.expr.id) {
                        None => {
                            // Store to another package's global.
                            let ExprKind::Ident(pkg) = &sel.expr.kind else {
                                self.fail(CodegenError::Unsupported(
                                    "selector store on non-identifier".into(),
                                ));
                                return;
                            };
                            if self.resolve_alias(&pkg.name).is_none() {
                                self.fail(CodegenError::UnknownPackage(pkg.name.clone()));
                                return;
                            }
                            let (pkg, field) = (pkg.name.clone(), sel.sel.name.clone());
                            self.emit_store_var(&pkg, &field);
                        }
                        Some(typ) => {
                            let Some(strct) = typ.struct_type().cloned() else {
                                self.fail(CodegenError::Unsupported(
                                    "nested selector assigns not supported yet".into(),
                                ));
                                return;
                            };
                            let Some(index) = strct.field_index(&sel.sel.name) else {
                                self.fail(CodegenError::Internal(format!(
                                    "unknown field {}",
                                    sel.sel.name
                                )));
                                return;
                            };
                            self.emit_expr(&sel.expr); // load the struct
                            self.emit_store_struct_field(index);
                        }
                    }
                }
                ExprKind::Index(index) => {
                    if !is_assign_op {
                        self.emit_expr(&assign.rhs[i]);
                    }
                    self.emit_expr(&index.expr);
                    self.emit_expr(&index.index);
                    self.prog.op(Opcode::Rot);
                    self.prog.op(Opcode::SetItem);
                }
                _ => self.fail(CodegenError::Unsupported(
                    "assignment target must be a variable, field or index".into(),
                )),
            }
        }
    }

    // === Return ===

    fn emit_return(&mut self, values: &'a [vela_syntax::Expr], stmt: &'a Stmt) {
        // Drain everything enclosing loops and switches left on the stack
        // so the caller sees only the results.
        let cnt: usize = self.label_list.iter().map(|l| l.size).sum();
        self.drop_items(cnt);

        if values.is_empty() {
            if let Some(si) = self.scope {
                let results = self.arena[si].results();
                // Bare return with named results loads them back, first
                // result topmost.
                for result in results.iter().rev() {
                    if let Some(name) = &result.name {
                        self.emit_load_var("", &name.name);
                    }
                }
            }
        } else {
            for value in values.iter().rev() {
                self.emit_expr(value);
            }
        }

        self.save_sequence_point(stmt.span);
        self.prog.op(Opcode::Ret);
    }

    // === Control flow ===

    fn emit_if(&mut self, ifstmt: &'a IfStmt) {
        if let Some(si) = self.scope {
            self.arena[si].vars.new_scope();
        }
        if let Some(init) = &ifstmt.init {
            self.emit_stmt(init);
        }

        let l_if = self.new_label();
        let l_else = self.new_label();
        let l_else_end = self.new_label();

        self.emit_bool_expr(&ifstmt.cond, true, false, l_else);

        self.set_label(l_if);
        self.emit_block(&ifstmt.then);
        if ifstmt.els.is_some() {
            self.prog.jmp(Opcode::JmpL, l_else_end);
        }

        self.set_label(l_else);
        if let Some(els) = &ifstmt.els {
            self.emit_stmt(els);
        }
        self.set_label(l_else_end);

        if let Some(si) = self.scope {
            self.arena[si].vars.drop_scope();
        }
    }

    fn emit_for(&mut self, forstmt: &'a ForStmt) {
        if let Some(si) = self.scope {
            self.arena[si].vars.new_scope();
        }

        let (fstart, label) = self.generate_label(LabelKind::Start);
        let fend = self.new_named_label(LabelKind::End, &label);
        let fpost = self.new_named_label(LabelKind::Post, &label);

        let last_for = std::mem::replace(&mut self.current_for, label.clone());
        let last_switch = std::mem::replace(&mut self.current_switch, label.clone());

        if let Some(init) = &forstmt.init {
            self.emit_stmt(init);
        }

        self.push_stack_label(&label, 0);
        self.set_label(fstart);
        if let Some(cond) = &forstmt.cond {
            self.emit_expr(cond);
            self.prog.jmp(Opcode::JmpIfNotL, fend);
        }

        self.emit_block(&forstmt.body);
        self.set_label(fpost);
        if let Some(post) = &forstmt.post {
            self.emit_stmt(post);
        }

        self.prog.jmp(Opcode::JmpL, fstart);
        self.set_label(fend);
        self.drop_stack_label();

        self.current_for = last_for;
        self.current_switch = last_switch;

        if let Some(si) = self.scope {
            self.arena[si].vars.drop_scope();
        }
    }

    /// Range iterates an index from 0 to len-1. Slices keep
    /// `[slice, len, index]` on the stack across iterations; maps keep
    /// `[map, keys, len(keys), index]`.
    fn emit_range(&mut self, range: &'a RangeStmt) {
        if let Some(si) = self.scope {
            self.arena[si].vars.new_scope();
        }

        let (start, label) = self.generate_label(LabelKind::Start);
        let end = self.new_named_label(LabelKind::End, &label);
        let post = self.new_named_label(LabelKind::Post, &label);

        let last_for = std::mem::replace(&mut self.current_for, label.clone());
        let last_switch = std::mem::replace(&mut self.current_switch, label.clone());

        self.emit_expr(&range.expr);

        let is_map = matches!(
            self.type_of(range.expr.id).map(|t| t.underlying()),
            Some(Type::Map(_, _))
        );
        self.prog.op(Opcode::Dup);
        if is_map {
            self.prog.op(Opcode::Keys);
            self.prog.op(Opcode::Dup);
        }
        self.prog.op(Opcode::Size);
        self.prog.int(0);

        let stack_size = if is_map { 4 } else { 3 };
        self.push_stack_label(&label, stack_size);
        self.set_label(start);

        self.prog.op(Opcode::Over);
        self.prog.op(Opcode::Over);
        self.prog.jmp(Opcode::JmpLeL, end);

        let need_value = matches!(&range.value, Some(v) if !v.is_blank());
        let mut key_loaded = false;
        if let Some(key) = range.key.as_ref().filter(|k| !k.is_blank()) {
            if is_map {
                self.range_load_key();
                if need_value {
                    self.prog.op(Opcode::Dup);
                    key_loaded = true;
                }
            } else {
                self.prog.op(Opcode::Dup);
            }
            let name = key.name.clone();
            self.emit_store_var("", &name);
        }
        if need_value {
            if !is_map || !key_loaded {
                self.range_load_key();
            }
            if is_map {
                // the key array gave us the key, now index the map itself
                self.prog.int(4);
                self.prog.op(Opcode::Pick);
                self.prog.op(Opcode::Swap);
                self.prog.op(Opcode::PickItem);
            }
            let name = range.value.as_ref().unwrap().name.clone();
            self.emit_store_var("", &name);
        }

        self.emit_block(&range.body);

        self.set_label(post);
        self.prog.op(Opcode::Inc);
        self.prog.jmp(Opcode::JmpL, start);

        self.set_label(end);
        self.drop_stack_label();

        self.current_for = last_for;
        self.current_switch = last_switch;

        if let Some(si) = self.scope {
            self.arena[si].vars.drop_scope();
        }
    }

    fn range_load_key(&mut self) {
        self.prog.int(2);
        self.prog.op(Opcode::Pick);
        self.prog.op(Opcode::Over);
        self.prog.op(Opcode::PickItem);
    }

    fn emit_switch(&mut self, switch: &'a SwitchStmt) {
        self.emit_expr(&switch.tag);

        let tag_type = self.type_of(switch.tag.id).cloned();
        let eq_op = self.comparison_eq_opcode(tag_type.as_ref());
        let (switch_end, label) = self.generate_label(LabelKind::End);

        let last_switch = std::mem::replace(&mut self.current_switch, label.clone());
        self.push_stack_label(&label, 1);

        let start_labels: Vec<u16> = switch.cases.iter().map(|_| self.new_label()).collect();
        for (i, case) in switch.cases.iter().enumerate() {
            let l_end = self.new_label();
            let l_start = start_labels[i];

            // No expressions means this is the default clause.
            let n = case.exprs.len();
            for (j, case_expr) in case.exprs.iter().enumerate() {
                self.prog.op(Opcode::Dup);
                self.emit_expr(case_expr);
                self.prog.op(eq_op);
                if j == n - 1 {
                    self.prog.jmp(Opcode::JmpIfNotL, l_end);
                } else {
                    self.prog.jmp(Opcode::JmpIfL, l_start);
                }
            }

            if let Some(si) = self.scope {
                self.arena[si].vars.new_scope();
            }
            self.set_label(l_start);
            let last = case.body.len().saturating_sub(1);
            for (j, stmt) in case.body.iter().enumerate() {
                if j == last && matches!(stmt.kind, StmtKind::Fallthrough) {
                    match start_labels.get(i + 1) {
                        Some(&next) => self.prog.jmp(Opcode::JmpL, next),
                        None => self.fail(CodegenError::Unsupported(
                            "fallthrough in final switch clause".into(),
                        )),
                    }
                    break;
                }
                self.emit_stmt(stmt);
            }
            self.prog.jmp(Opcode::JmpL, switch_end);
            self.set_label(l_end);
            if let Some(si) = self.scope {
                self.arena[si].vars.drop_scope();
            }
        }

        self.set_label(switch_end);
        self.drop_stack_label();
        self.current_switch = last_switch;
    }

    fn emit_inc_dec(&mut self, incdec: &'a IncDecStmt) {
        self.emit_expr(&incdec.expr);
        self.prog.op(if incdec.dec { Opcode::Dec } else { Opcode::Inc });
        if let ExprKind::Ident(ident) = &incdec.expr.kind {
            let name = ident.name.clone();
            self.emit_store_var("", &name);
        }
    }

    /// Break and continue drain every stack label inside the target loop,
    /// then branch to its end (break) or post (continue) label.
    fn emit_branch(&mut self, kind: BranchKind, label: Option<&str>) {
        let label = match label {
            Some(l) => l.to_string(),
            None => match kind {
                BranchKind::Break => self.current_switch.clone(),
                BranchKind::Continue => self.current_for.clone(),
            },
        };

        // Inner constructs' leftovers are dropped here; the target's own
        // entry is drained by the code at its end label.
        let mut cnt = 0;
        for sl in self.label_list.iter().rev() {
            if sl.name == label {
                break;
            }
            cnt += sl.size;
        }
        self.drop_items(cnt);

        match kind {
            BranchKind::Break => {
                let end = self.label_offset(LabelKind::End, &label);
                self.prog.jmp(Opcode::JmpL, end);
            }
            BranchKind::Continue => {
                let post = self.label_offset(LabelKind::Post, &label);
                self.prog.jmp(Opcode::JmpL, post);
            }
        }
    }
}
