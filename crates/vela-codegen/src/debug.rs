//! Debug information emission.

use serde::Serialize;

use crate::scope::{FuncRange, FuncSrc};
use crate::Codegen;

/// Name the initialisation preamble is reported under.
pub(crate) const INITIALIZE_METHOD: &str = "_initialize";

/// The side artifact accompanying the bytecode: document table, per-method
/// descriptors and sequence points.
#[derive(Debug, Clone, Serialize)]
pub struct DebugInfo {
    pub documents: Vec<String>,
    pub methods: Vec<MethodDebugInfo>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MethodDebugInfo {
    /// Qualified method name.
    pub name: String,
    /// Program-counter range `[start, end]` of the method body.
    pub range: DebugRange,
    /// Parameter `name,type` pairs, receiver first for methods.
    pub parameters: Vec<String>,
    /// Result types, comma-separated; empty for void functions.
    pub return_type: String,
    /// Declared variable `name,type` pairs in declaration order.
    pub variables: Vec<String>,
    /// PC-to-source mapping, ascending by PC.
    pub seq_points: Vec<DebugSeqPoint>,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct DebugRange {
    pub start: u32,
    pub end: u32,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct DebugSeqPoint {
    /// Offset of the instruction the source span maps to.
    pub opcode: usize,
    /// Index into the document table.
    pub document: usize,
    pub start_line: u32,
    pub start_col: u32,
    pub end_line: u32,
    pub end_col: u32,
}

impl From<FuncRange> for DebugRange {
    fn from(r: FuncRange) -> Self {
        Self { start: r.start, end: r.end }
    }
}

impl<'a> Codegen<'a> {
    pub(crate) fn emit_debug_info(&self) -> DebugInfo {
        let mut methods = Vec::new();

        if self.init_end_offset > 0 {
            methods.push(MethodDebugInfo {
                name: INITIALIZE_METHOD.to_string(),
                range: DebugRange {
                    start: 0,
                    end: self.init_end_offset.saturating_sub(1) as u32,
                },
                parameters: Vec::new(),
                return_type: String::new(),
                variables: Vec::new(),
                seq_points: self
                    .sequence_points
                    .get(INITIALIZE_METHOD)
                    .cloned()
                    .unwrap_or_default(),
            });
        }

        // Named functions only; lambdas and init bodies are not in the
        // function registry.
        let mut indices: Vec<usize> = self
            .funcs
            .values()
            .copied()
            .filter(|&i| self.arena[i].emitted)
            .collect();
        indices.sort_by_key(|&i| self.arena[i].rng.start);

        for i in indices {
            let scope = &self.arena[i];
            let decl = match scope.src {
                FuncSrc::Decl(d) => d,
                FuncSrc::Lambda(_) => continue,
            };

            let mut parameters = Vec::new();
            if let Some(recv) = &decl.recv {
                parameters.push(self.debug_var_entry(&recv.name));
            }
            for p in &decl.params {
                parameters.push(self.debug_var_entry(&p.name));
            }

            let return_type = decl
                .results
                .iter()
                .map(|r| {
                    self.type_of(r.id)
                        .map(|t| t.to_string())
                        .unwrap_or_default()
                })
                .collect::<Vec<_>>()
                .join(",");

            methods.push(MethodDebugInfo {
                name: scope.name.clone(),
                range: scope.rng.into(),
                parameters,
                return_type,
                variables: scope.variables.clone(),
                seq_points: self
                    .sequence_points
                    .get(&scope.name)
                    .cloned()
                    .unwrap_or_default(),
            });
        }

        DebugInfo {
            documents: self.documents.clone(),
            methods,
        }
    }

    fn debug_var_entry(&self, ident: &vela_syntax::Ident) -> String {
        let ty = self
            .type_of(ident.id)
            .map(|t| t.to_string())
            .unwrap_or_default();
        format!("{},{}", ident.name, ty)
    }
}
