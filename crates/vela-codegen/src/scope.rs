//! Function scopes and variable slot bookkeeping.

use std::collections::HashMap;

use vela_syntax::{Block, ExprKind, FuncDecl, FuncLit, Param, ResultSpec, Stmt, StmtKind};

/// Which slot pool a variable lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum VarKind {
    Global,
    Local,
    Argument,
}

/// Lexical block stack of a function. Slots are never reused: dropping a
/// block forgets the names but keeps the pool counters.
#[derive(Debug, Default)]
pub(crate) struct VarScope {
    blocks: Vec<HashMap<String, (VarKind, usize)>>,
}

impl VarScope {
    pub fn new_scope(&mut self) {
        self.blocks.push(HashMap::new());
    }

    pub fn drop_scope(&mut self) {
        self.blocks.pop();
    }

    /// Resolve a name against the block stack, innermost first.
    pub fn get(&self, name: &str) -> Option<(VarKind, usize)> {
        for block in self.blocks.iter().rev() {
            if let Some(&v) = block.get(name) {
                return Some(v);
            }
        }
        None
    }

    fn insert(&mut self, name: &str, kind: VarKind, index: usize) {
        if let Some(block) = self.blocks.last_mut() {
            block.insert(name.to_string(), (kind, index));
        }
    }
}

/// The body a function scope was made from.
#[derive(Debug, Clone, Copy)]
pub(crate) enum FuncSrc<'a> {
    Decl(&'a FuncDecl),
    Lambda(&'a FuncLit),
}

/// Emitted program range of a function, in byte offsets.
#[derive(Debug, Clone, Copy, Default)]
pub struct FuncRange {
    pub start: u32,
    pub end: u32,
}

/// Per-function emission state: entry label, slot pools, lexical blocks,
/// debug variables and the emitted byte range.
#[derive(Debug)]
pub(crate) struct FuncScope<'a> {
    pub name: String,
    pub pkg: String,
    pub label: u16,
    pub src: FuncSrc<'a>,
    pub rng: FuncRange,
    pub vars: VarScope,
    /// Lazily growing local pool; arguments are counted at prologue time.
    n_locals: usize,
    n_args: usize,
    /// `name,type` pairs for debug info, in declaration order.
    pub variables: Vec<String>,
    pub emitted: bool,
}

impl<'a> FuncScope<'a> {
    pub fn new(name: String, pkg: String, label: u16, src: FuncSrc<'a>) -> Self {
        Self {
            name,
            pkg,
            label,
            src,
            rng: FuncRange::default(),
            vars: VarScope::default(),
            n_locals: 0,
            n_args: 0,
            variables: Vec::new(),
            emitted: false,
        }
    }

    pub fn body(&self) -> Option<&'a Block> {
        match self.src {
            FuncSrc::Decl(d) => d.body.as_ref(),
            FuncSrc::Lambda(l) => Some(&l.body),
        }
    }

    pub fn params(&self) -> &'a [Param] {
        match self.src {
            FuncSrc::Decl(d) => &d.params,
            FuncSrc::Lambda(l) => &l.params,
        }
    }

    pub fn results(&self) -> &'a [ResultSpec] {
        match self.src {
            FuncSrc::Decl(d) => &d.results,
            FuncSrc::Lambda(l) => &l.results,
        }
    }

    pub fn recv(&self) -> Option<&'a Param> {
        match self.src {
            FuncSrc::Decl(d) => d.recv.as_ref(),
            FuncSrc::Lambda(_) => None,
        }
    }

    /// Allocate a slot in the given pool and bind the name in the current
    /// block.
    pub fn new_variable(&mut self, kind: VarKind, name: &str) -> usize {
        let index = match kind {
            VarKind::Local => {
                let i = self.n_locals;
                self.n_locals += 1;
                i
            }
            VarKind::Argument => {
                let i = self.n_args;
                self.n_args += 1;
                i
            }
            VarKind::Global => panic!("globals are not allocated per function"),
        };
        self.vars.insert(name, kind, index);
        index
    }

    pub fn new_local(&mut self, name: &str) -> usize {
        self.new_variable(VarKind::Local, name)
    }

    pub fn arg_count(&self) -> usize {
        self.n_args
    }
}

/// Statically count the local slots a body can allocate, so the prologue
/// can reserve them before the walk. Over-counting is harmless (the
/// reservation is an upper bound); under-counting is not, so every
/// allocation site below mirrors one in the emitter.
pub(crate) fn count_locals(results: &[ResultSpec], body: &Block) -> usize {
    let mut n = results.iter().filter(|r| r.name.is_some()).count();
    for stmt in &body.stmts {
        n += count_stmt(stmt);
    }
    n
}

fn count_stmt(stmt: &Stmt) -> usize {
    match &stmt.kind {
        StmtKind::Var(decl) => decl.specs.iter().map(|s| s.names.len()).sum(),
        StmtKind::Assign(assign) => {
            if assign.op == vela_syntax::AssignOp::Define {
                assign
                    .lhs
                    .iter()
                    .filter(|e| matches!(&e.kind, ExprKind::Ident(id) if !id.is_blank()))
                    .count()
            } else {
                0
            }
        }
        StmtKind::Block(b) => b.stmts.iter().map(count_stmt).sum(),
        StmtKind::If(i) => {
            i.init.as_ref().map_or(0, count_stmt)
                + i.then.stmts.iter().map(count_stmt).sum::<usize>()
                + i.els.as_ref().map_or(0, count_stmt)
        }
        StmtKind::For(f) => {
            f.init.as_ref().map_or(0, count_stmt)
                + f.post.as_ref().map_or(0, count_stmt)
                + f.body.stmts.iter().map(count_stmt).sum::<usize>()
        }
        StmtKind::Range(r) => {
            let bindings = [&r.key, &r.value]
                .into_iter()
                .filter(|i| i.as_ref().is_some_and(|id| !id.is_blank()))
                .count();
            bindings + r.body.stmts.iter().map(count_stmt).sum::<usize>()
        }
        StmtKind::Switch(s) => s
            .cases
            .iter()
            .flat_map(|c| c.body.iter())
            .map(count_stmt)
            .sum(),
        StmtKind::Labeled(l) => count_stmt(&l.stmt),
        _ => 0,
    }
}
