//! Program structure and resolver side tables.

use std::collections::{HashMap, HashSet};

use vela_syntax::{File, NodeId};

use crate::types::{Type, TypeAndValue};

/// A package: its import path plus its files in declaration order.
#[derive(Debug, Clone)]
pub struct Package {
    pub path: String,
    pub files: Vec<File>,
}

/// A loaded, type-checked program.
///
/// Packages appear in the loader's deterministic order (sorted by import
/// path); emission iterates them exactly in this order.
#[derive(Debug)]
pub struct Program {
    pub packages: Vec<Package>,
    pub info: TypeInfo,
}

impl Program {
    /// Visit every (package, file) pair in deterministic order.
    pub fn for_each_file<F: FnMut(&Package, &File)>(&self, mut f: F) {
        for pkg in &self.packages {
            for file in &pkg.files {
                f(pkg, file);
            }
        }
    }
}

/// Read-only resolver output keyed by node id.
#[derive(Debug, Default)]
pub struct TypeInfo {
    /// Per-expression type plus optional folded constant.
    pub types: HashMap<NodeId, TypeAndValue>,
    /// Selector nodes that resolve to method selections (as opposed to
    /// package-qualified or field selections).
    pub method_selections: HashSet<NodeId>,
}

impl TypeInfo {
    pub fn type_of(&self, id: NodeId) -> Option<&Type> {
        self.types.get(&id).map(|tv| &tv.ty)
    }

    pub fn type_and_value_of(&self, id: NodeId) -> Option<&TypeAndValue> {
        self.types.get(&id)
    }

    /// The folded constant of an expression, when the resolver computed one.
    pub fn value_of(&self, id: NodeId) -> Option<&crate::types::Value> {
        self.types.get(&id).and_then(|tv| tv.value.as_ref())
    }

    pub fn is_method_selection(&self, id: NodeId) -> bool {
        self.method_selections.contains(&id)
    }
}
