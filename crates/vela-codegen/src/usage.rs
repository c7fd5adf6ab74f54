//! Function usage analysis.
//!
//! A reachability walk over the call graph from the `Main` entry point,
//! `init` functions and global initialisers. Functions the walk never
//! reaches are not emitted, which saves a lot of bytecode space. Function
//! names referenced as values count as uses, since they can be called
//! indirectly.

use std::collections::{HashMap, HashSet};

use vela_analysis::Program;
use vela_syntax::{
    Block, CompositeLit, Decl, Expr, ExprKind, File, FuncDecl, Stmt, StmtKind,
};

use crate::builtin;

/// Qualified names of every function reachable from the program's entry
/// points.
pub(crate) fn analyze(program: &Program) -> HashSet<String> {
    let mut a = Analyzer {
        program,
        decls: HashMap::new(),
        used: HashSet::new(),
        work: Vec::new(),
        aliases: HashMap::new(),
        curr_pkg: String::new(),
    };
    a.collect_decls();
    a.seed();
    a.run();
    a.used
}

struct Analyzer<'a> {
    program: &'a Program,
    /// Qualified name to declaration plus its file context.
    decls: HashMap<String, DeclCtx<'a>>,
    used: HashSet<String>,
    work: Vec<String>,
    aliases: HashMap<String, String>,
    curr_pkg: String,
}

#[derive(Clone, Copy)]
struct DeclCtx<'a> {
    decl: &'a FuncDecl,
    pkg: &'a str,
    file: &'a File,
}

impl<'a> Analyzer<'a> {
    fn set_file(&mut self, pkg: &str, file: &'a File) {
        self.curr_pkg = pkg.to_string();
        self.aliases.clear();
        for imp in &file.imports {
            self.aliases
                .insert(imp.local_name().to_string(), imp.path.clone());
        }
    }

    fn ident_name(&self, pkg: &str, name: &str) -> String {
        let path = if pkg.is_empty() {
            self.curr_pkg.as_str()
        } else {
            self.aliases.get(pkg).map(String::as_str).unwrap_or(pkg)
        };
        format!("{}.{}", path, name)
    }

    fn name_for_decl(&self, decl: &FuncDecl) -> String {
        if let Some(recv) = &decl.recv {
            match self.program.info.type_of(recv.name.id) {
                Some(t) => format!("{}.{}", t, decl.name.name),
                None => format!("{}.{}", recv.name.name, decl.name.name),
            }
        } else {
            self.ident_name("", &decl.name.name)
        }
    }

    fn collect_decls(&mut self) {
        let program = self.program;
        for pkg in &program.packages {
            for file in &pkg.files {
                self.set_file(&pkg.path, file);
                for decl in &file.decls {
                    if let Decl::Func(f) = decl {
                        let name = self.name_for_decl(f);
                        self.decls.insert(name, DeclCtx { decl: f, pkg: &pkg.path, file });
                    }
                }
            }
        }
    }

    /// Entry points: `Main` of the main package, every `init` body, and
    /// every global initialiser expression.
    fn seed(&mut self) {
        let program = self.program;
        for pkg in &program.packages {
            for file in &pkg.files {
                self.set_file(&pkg.path, file);
                for decl in &file.decls {
                    match decl {
                        Decl::Func(f) if f.name.name == "Main" && file.package == "main" => {
                            self.mark(self.name_for_decl(f));
                        }
                        Decl::Func(f) if f.is_init() => {
                            if let Some(body) = &f.body {
                                self.walk_block(body);
                            }
                        }
                        Decl::Var(v) => {
                            for spec in &v.specs {
                                for value in &spec.values {
                                    self.walk_expr(value);
                                }
                            }
                        }
                        _ => {}
                    }
                }
            }
        }
    }

    fn run(&mut self) {
        while let Some(name) = self.work.pop() {
            let Some(ctx) = self.decls.get(&name).copied() else {
                continue;
            };
            self.set_file(ctx.pkg, ctx.file);
            if let Some(body) = &ctx.decl.body {
                self.walk_block(body);
            }
        }
    }

    fn mark(&mut self, name: String) {
        if self.used.insert(name.clone()) {
            self.work.push(name);
        }
    }

    fn walk_block(&mut self, block: &'a Block) {
        for stmt in &block.stmts {
            self.walk_stmt(stmt);
        }
    }

    fn walk_stmt(&mut self, stmt: &'a Stmt) {
        match &stmt.kind {
            StmtKind::Block(b) => self.walk_block(b),
            StmtKind::Var(v) => {
                for spec in &v.specs {
                    for value in &spec.values {
                        self.walk_expr(value);
                    }
                }
            }
            StmtKind::Const(_) => {}
            StmtKind::Assign(a) => {
                for e in a.lhs.iter().chain(a.rhs.iter()) {
                    self.walk_expr(e);
                }
            }
            StmtKind::Expr(e) => self.walk_expr(e),
            StmtKind::Return(values) => {
                for e in values {
                    self.walk_expr(e);
                }
            }
            StmtKind::If(i) => {
                if let Some(init) = &i.init {
                    self.walk_stmt(init);
                }
                self.walk_expr(&i.cond);
                self.walk_block(&i.then);
                if let Some(els) = &i.els {
                    self.walk_stmt(els);
                }
            }
            StmtKind::For(f) => {
                if let Some(init) = &f.init {
                    self.walk_stmt(init);
                }
                if let Some(cond) = &f.cond {
                    self.walk_expr(cond);
                }
                if let Some(post) = &f.post {
                    self.walk_stmt(post);
                }
                self.walk_block(&f.body);
            }
            StmtKind::Range(r) => {
                self.walk_expr(&r.expr);
                self.walk_block(&r.body);
            }
            StmtKind::Switch(s) => {
                self.walk_expr(&s.tag);
                for case in &s.cases {
                    for e in &case.exprs {
                        self.walk_expr(e);
                    }
                    for st in &case.body {
                        self.walk_stmt(st);
                    }
                }
            }
            StmtKind::IncDec(i) => self.walk_expr(&i.expr),
            StmtKind::Labeled(l) => self.walk_stmt(&l.stmt),
            StmtKind::Branch(_) | StmtKind::Fallthrough | StmtKind::Empty => {}
        }
    }

    fn walk_expr(&mut self, e: &'a Expr) {
        match &e.kind {
            ExprKind::Ident(ident) => {
                // A bare function name is a value reference; it can be
                // called indirectly later.
                if !builtin::is_go_builtin(&ident.name) {
                    let qualified = self.ident_name("", &ident.name);
                    if self.decls.contains_key(&qualified) {
                        self.mark(qualified);
                    }
                }
            }
            ExprKind::Lit(_) => {}
            ExprKind::Binary(b) => {
                self.walk_expr(&b.left);
                self.walk_expr(&b.right);
            }
            ExprKind::Unary(u) => self.walk_expr(&u.expr),
            ExprKind::Call(call) => {
                match &call.func.kind {
                    ExprKind::Ident(ident) => {
                        if !builtin::is_go_builtin(&ident.name) {
                            self.mark(self.ident_name("", &ident.name));
                        }
                    }
                    ExprKind::Selector(sel) => {
                        let name = if self.program.info.is_method_selection(call.func.id) {
                            let recv = self
                                .program
                                .info
                                .type_of(sel.expr.id)
                                .map(|t| t.to_string())
                                .unwrap_or_default();
                            format!("{}.{}", recv, sel.sel.name)
                        } else if let ExprKind::Ident(alias) = &sel.expr.kind {
                            self.ident_name(&alias.name, &sel.sel.name)
                        } else {
                            String::new()
                        };
                        if !name.is_empty() {
                            self.mark(name);
                        }
                        self.walk_expr(&sel.expr);
                    }
                    _ => self.walk_expr(&call.func),
                }
                for arg in &call.args {
                    self.walk_expr(arg);
                }
            }
            ExprKind::Index(i) => {
                self.walk_expr(&i.expr);
                self.walk_expr(&i.index);
            }
            ExprKind::Slice(s) => {
                self.walk_expr(&s.expr);
                if let Some(low) = &s.low {
                    self.walk_expr(low);
                }
                if let Some(high) = &s.high {
                    self.walk_expr(high);
                }
            }
            ExprKind::Selector(sel) => self.walk_expr(&sel.expr),
            ExprKind::CompositeLit(lit) => self.walk_composite(lit),
            ExprKind::Paren(inner)
            | ExprKind::TypeAssert(inner)
            | ExprKind::Conversion(inner)
            | ExprKind::Deref(inner) => self.walk_expr(inner),
            ExprKind::FuncLit(lit) => self.walk_block(&lit.body),
            ExprKind::Make(m) => {
                if let Some(size) = &m.size {
                    self.walk_expr(size);
                }
            }
        }
    }

    fn walk_composite(&mut self, lit: &'a CompositeLit) {
        for elem in &lit.elems {
            if let Some(key) = &elem.key {
                self.walk_expr(key);
            }
            self.walk_expr(&elem.value);
        }
    }
}
