//! Shared fixtures: small typed-AST builders standing in for the upstream
//! parser and type resolver.

use std::rc::Rc;

use vela_analysis::{
    Field, NamedType, Package, Program, Signature, StructType, Type, TypeAndValue, TypeInfo, Value,
};
use vela_syntax::{
    AssignOp, AssignStmt, BinaryExpr, BinaryOp, Block, BranchKind, BranchStmt, CallExpr,
    CaseClause, CompositeElem, CompositeLit, Decl, Expr, ExprKind, File, ForStmt, FuncDecl,
    FuncLit, Ident, IfStmt, ImportDecl, IncDecStmt, IndexExpr, LabeledStmt, Lit, MakeExpr, NodeId,
    Param,
    RangeStmt, ResultSpec, SelectorExpr, SliceExpr, Span, Stmt, StmtKind, SwitchStmt, ValueSpec,
    VarDecl,
};
use vela_vm::{decode, Opcode};

/// Node-id allocator plus the resolver tables under construction.
pub struct B {
    next: u32,
    pub info: TypeInfo,
}

#[allow(dead_code)]
impl B {
    pub fn new() -> Self {
        Self { next: 0, info: TypeInfo::default() }
    }

    fn next_id(&mut self) -> NodeId {
        self.next += 1;
        NodeId(self.next)
    }

    // === Types ===

    pub fn int_slice() -> Type {
        Type::Slice(Box::new(Type::Int))
    }

    pub fn byte_slice() -> Type {
        Type::Slice(Box::new(Type::Byte))
    }

    pub fn int_map() -> Type {
        Type::Map(Box::new(Type::Int), Box::new(Type::Int))
    }

    pub fn struct_of(fields: &[(&str, Type)]) -> Type {
        Type::Struct(Rc::new(StructType {
            fields: fields
                .iter()
                .map(|(n, t)| Field { name: n.to_string(), ty: t.clone() })
                .collect(),
            interop: false,
        }))
    }

    pub fn named(name: &str, underlying: Type) -> Type {
        Type::Named(Rc::new(NamedType { name: name.to_string(), underlying }))
    }

    pub fn func_type(params: Vec<Type>, results: Vec<Type>) -> Type {
        Type::Func(Rc::new(Signature { params, results, variadic: false }))
    }

    // === Expressions ===

    pub fn e(&mut self, kind: ExprKind) -> Expr {
        Expr { id: self.next_id(), kind, span: Span::default() }
    }

    /// Register the resolver's type for an expression.
    pub fn typed(&mut self, e: Expr, ty: Type) -> Expr {
        self.info.types.insert(e.id, TypeAndValue::plain(ty));
        e
    }

    pub fn name(&mut self, n: &str) -> Ident {
        Ident { id: self.next_id(), name: n.to_string(), span: Span::default() }
    }

    pub fn tname(&mut self, n: &str, ty: Type) -> Ident {
        let id = self.name(n);
        self.info.types.insert(id.id, TypeAndValue::plain(ty));
        id
    }

    pub fn int(&mut self, v: i64) -> Expr {
        self.e(ExprKind::Lit(Lit::Int(v)))
    }

    pub fn str_(&mut self, s: &str) -> Expr {
        self.e(ExprKind::Lit(Lit::Str(s.to_string())))
    }

    pub fn bool_(&mut self, v: bool) -> Expr {
        self.e(ExprKind::Lit(Lit::Bool(v)))
    }

    pub fn nil(&mut self) -> Expr {
        self.e(ExprKind::Lit(Lit::Nil))
    }

    pub fn ident(&mut self, n: &str) -> Expr {
        let id = self.name(n);
        self.e(ExprKind::Ident(id))
    }

    pub fn tident(&mut self, n: &str, ty: Type) -> Expr {
        let e = self.ident(n);
        self.typed(e, ty)
    }

    /// A constant reference: an identifier the resolver folded to a value.
    pub fn const_int(&mut self, n: &str, v: i64) -> Expr {
        let e = self.ident(n);
        self.info
            .types
            .insert(e.id, TypeAndValue::constant(Type::Int, Value::Int(v)));
        e
    }

    pub fn bin(&mut self, left: Expr, op: BinaryOp, right: Expr) -> Expr {
        self.e(ExprKind::Binary(Box::new(BinaryExpr { left, op, right })))
    }

    pub fn index(&mut self, expr: Expr, index: Expr) -> Expr {
        self.e(ExprKind::Index(Box::new(IndexExpr { expr, index })))
    }

    pub fn tindex(&mut self, expr: Expr, index: Expr, ty: Type) -> Expr {
        let e = self.index(expr, index);
        self.typed(e, ty)
    }

    pub fn slice_expr(&mut self, expr: Expr, low: Option<Expr>, high: Option<Expr>) -> Expr {
        self.e(ExprKind::Slice(Box::new(SliceExpr { expr, low, high })))
    }

    pub fn selector(&mut self, expr: Expr, field: &str) -> Expr {
        let sel = self.name(field);
        self.e(ExprKind::Selector(Box::new(SelectorExpr { expr, sel })))
    }

    pub fn call(&mut self, func: Expr, args: Vec<Expr>) -> Expr {
        self.e(ExprKind::Call(Box::new(CallExpr { func, args, ellipsis: false })))
    }

    /// A method call `recv.method(args)`, marked as a method selection.
    pub fn method_call(&mut self, recv: Expr, method: &str, args: Vec<Expr>) -> Expr {
        let callee = self.selector(recv, method);
        self.info.method_selections.insert(callee.id);
        self.call(callee, args)
    }

    /// A typed composite literal with positional elements.
    pub fn lit_of(&mut self, ty: Type, elems: Vec<Expr>) -> Expr {
        let lit = CompositeLit {
            elems: elems
                .into_iter()
                .map(|value| CompositeElem { key: None, value })
                .collect(),
        };
        let e = self.e(ExprKind::CompositeLit(Box::new(lit)));
        self.typed(e, ty)
    }

    /// A typed composite literal with keyed elements.
    pub fn keyed_lit_of(&mut self, ty: Type, elems: Vec<(Expr, Expr)>) -> Expr {
        let lit = CompositeLit {
            elems: elems
                .into_iter()
                .map(|(key, value)| CompositeElem { key: Some(key), value })
                .collect(),
        };
        let e = self.e(ExprKind::CompositeLit(Box::new(lit)));
        self.typed(e, ty)
    }

    // === Statements ===

    pub fn define(&mut self, name: &str, rhs: Expr) -> Stmt {
        let lhs = self.ident(name);
        self.stmt(StmtKind::Assign(AssignStmt {
            lhs: vec![lhs],
            op: AssignOp::Define,
            rhs: vec![rhs],
        }))
    }

    pub fn define_multi(&mut self, names: &[&str], rhs: Expr) -> Stmt {
        let lhs = names.iter().map(|n| self.ident(n)).collect();
        self.stmt(StmtKind::Assign(AssignStmt { lhs, op: AssignOp::Define, rhs: vec![rhs] }))
    }

    pub fn assign(&mut self, lhs: Expr, rhs: Expr) -> Stmt {
        self.stmt(StmtKind::Assign(AssignStmt {
            lhs: vec![lhs],
            op: AssignOp::Assign,
            rhs: vec![rhs],
        }))
    }

    pub fn assign_op(&mut self, lhs: Expr, op: AssignOp, rhs: Expr) -> Stmt {
        self.stmt(StmtKind::Assign(AssignStmt { lhs: vec![lhs], op, rhs: vec![rhs] }))
    }

    pub fn expr_stmt(&mut self, e: Expr) -> Stmt {
        self.stmt(StmtKind::Expr(e))
    }

    pub fn ret(&mut self, values: Vec<Expr>) -> Stmt {
        self.stmt(StmtKind::Return(values))
    }

    pub fn brk(&mut self, label: Option<&str>) -> Stmt {
        self.stmt(StmtKind::Branch(BranchStmt {
            kind: BranchKind::Break,
            label: label.map(str::to_string),
        }))
    }

    pub fn stmt(&mut self, kind: StmtKind) -> Stmt {
        Stmt { kind, span: Span::default() }
    }

    /// `var name T` without an initialiser.
    pub fn var_decl(&mut self, name: &str, ty: Type) -> Stmt {
        let spec = ValueSpec {
            names: vec![self.tname(name, ty)],
            values: vec![],
            span: Span::default(),
        };
        self.stmt(StmtKind::Var(VarDecl { specs: vec![spec], span: Span::default() }))
    }

    pub fn if_stmt(&mut self, cond: Expr, then: Vec<Stmt>, els: Option<Stmt>) -> Stmt {
        self.stmt(StmtKind::If(Box::new(IfStmt {
            init: None,
            cond,
            then: Self::block(then),
            els,
        })))
    }

    pub fn for_stmt(
        &mut self,
        init: Option<Stmt>,
        cond: Option<Expr>,
        post: Option<Stmt>,
        body: Vec<Stmt>,
    ) -> Stmt {
        self.stmt(StmtKind::For(Box::new(ForStmt {
            init,
            cond,
            post,
            body: Self::block(body),
        })))
    }

    pub fn range_stmt(
        &mut self,
        key: Option<Ident>,
        value: Option<Ident>,
        expr: Expr,
        body: Vec<Stmt>,
    ) -> Stmt {
        self.stmt(StmtKind::Range(Box::new(RangeStmt {
            key,
            value,
            expr,
            body: Self::block(body),
        })))
    }

    pub fn switch_stmt(&mut self, tag: Expr, cases: Vec<(Vec<Expr>, Vec<Stmt>)>) -> Stmt {
        self.stmt(StmtKind::Switch(Box::new(SwitchStmt {
            tag,
            cases: cases
                .into_iter()
                .map(|(exprs, body)| CaseClause { exprs, body })
                .collect(),
        })))
    }

    pub fn fallthrough(&mut self) -> Stmt {
        self.stmt(StmtKind::Fallthrough)
    }

    pub fn labeled(&mut self, label: &str, stmt: Stmt) -> Stmt {
        self.stmt(StmtKind::Labeled(Box::new(LabeledStmt {
            label: label.to_string(),
            stmt,
        })))
    }

    pub fn inc(&mut self, expr: Expr) -> Stmt {
        self.stmt(StmtKind::IncDec(IncDecStmt { expr, dec: false }))
    }

    pub fn func_lit(&mut self, params: Vec<Param>, results: Vec<ResultSpec>, body: Vec<Stmt>) -> Expr {
        self.e(ExprKind::FuncLit(Box::new(FuncLit {
            params,
            results,
            body: Self::block(body),
        })))
    }

    /// `make(T, size)` typed with the made type.
    pub fn make(&mut self, ty: Type, size: Option<Expr>) -> Expr {
        let e = self.e(ExprKind::Make(Box::new(MakeExpr { size })));
        self.typed(e, ty)
    }

    pub fn block(stmts: Vec<Stmt>) -> Block {
        Block { stmts, span: Span::default() }
    }

    // === Declarations ===

    pub fn param(&mut self, name: &str, ty: Type) -> Param {
        Param { name: self.tname(name, ty), variadic: false }
    }

    pub fn variadic_param(&mut self, name: &str, ty: Type) -> Param {
        Param { name: self.tname(name, ty), variadic: true }
    }

    pub fn result(&mut self, ty: Type) -> ResultSpec {
        let id = self.next_id();
        self.info.types.insert(id, TypeAndValue::plain(ty));
        ResultSpec { id, name: None }
    }

    pub fn named_result(&mut self, name: &str, ty: Type) -> ResultSpec {
        let id = self.next_id();
        self.info.types.insert(id, TypeAndValue::plain(ty.clone()));
        ResultSpec { id, name: Some(self.tname(name, ty)) }
    }

    pub fn func(
        &mut self,
        name: &str,
        params: Vec<Param>,
        results: Vec<ResultSpec>,
        body: Vec<Stmt>,
    ) -> Decl {
        Decl::Func(FuncDecl {
            name: self.name(name),
            recv: None,
            params,
            results,
            body: Some(Self::block(body)),
            span: Span::default(),
        })
    }

    pub fn method(
        &mut self,
        recv: Param,
        name: &str,
        params: Vec<Param>,
        results: Vec<ResultSpec>,
        body: Vec<Stmt>,
    ) -> Decl {
        Decl::Func(FuncDecl {
            name: self.name(name),
            recv: Some(recv),
            params,
            results,
            body: Some(Self::block(body)),
            span: Span::default(),
        })
    }

    /// A bodyless declaration, as interop packages carry.
    pub fn extern_func(&mut self, name: &str, params: Vec<Param>, results: Vec<ResultSpec>) -> Decl {
        Decl::Func(FuncDecl {
            name: self.name(name),
            recv: None,
            params,
            results,
            body: None,
            span: Span::default(),
        })
    }

    /// `func Main() int { body }`
    pub fn main_fn(&mut self, body: Vec<Stmt>) -> Decl {
        let results = vec![self.result(Type::Int)];
        self.func("Main", vec![], results, body)
    }

    /// `const name = value` at package level.
    pub fn global_const(&mut self, name: &str, value: Expr) -> Decl {
        let spec = ValueSpec {
            names: vec![self.name(name)],
            values: vec![value],
            span: Span::default(),
        };
        Decl::Const(vela_syntax::ConstDecl { specs: vec![spec], span: Span::default() })
    }

    /// `var name = value` at package level.
    pub fn global_var(&mut self, name: &str, value: Expr) -> Decl {
        let spec = ValueSpec {
            names: vec![self.name(name)],
            values: vec![value],
            span: Span::default(),
        };
        Decl::Var(VarDecl { specs: vec![spec], span: Span::default() })
    }

    pub fn file(decls: Vec<Decl>) -> File {
        File {
            path: "main.vela".to_string(),
            package: "main".to_string(),
            imports: vec![],
            decls,
        }
    }

    pub fn file_with(path: &str, package: &str, imports: &[&str], decls: Vec<Decl>) -> File {
        File {
            path: path.to_string(),
            package: package.to_string(),
            imports: imports
                .iter()
                .map(|p| ImportDecl { alias: None, path: p.to_string() })
                .collect(),
            decls,
        }
    }

    pub fn program(self, files: Vec<File>) -> Program {
        Program {
            packages: vec![Package { path: "main".to_string(), files }],
            info: self.info,
        }
    }

    pub fn program_pkgs(self, packages: Vec<Package>) -> Program {
        Program { packages, info: self.info }
    }
}

/// Decode a compiled stream into its opcode sequence, asserting validity.
#[allow(dead_code)]
pub fn op_list(bytes: &[u8]) -> Vec<Opcode> {
    decode::instructions(bytes)
        .map(|r| r.expect("stream decodes").1)
        .collect()
}

/// Does `ops` contain `pat` as a contiguous run?
#[allow(dead_code)]
pub fn has_run(ops: &[Opcode], pat: &[Opcode]) -> bool {
    ops.windows(pat.len()).any(|w| w == pat)
}
