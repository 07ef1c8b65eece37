//! Compiled-module snapshots for cross-shader imports.
//!
//! Compiling a shader produces a snapshot of its exported surface. A shader
//! that lists the module in its inherit clause resolves names against the
//! snapshot; the generated code redeclares each used symbol with import
//! linkage and leaves the final join to the link step.

use std::sync::Arc;

use indexmap::IndexMap;

use crate::types::{FunctionType, SymbolType};

/// A module-level variable visible to importers.
#[derive(Debug, Clone)]
pub struct ExportedVar {
    pub ty: SymbolType,
    pub uniform: bool,
}

/// Exported surface of one compiled module.
#[derive(Debug, Clone, Default)]
pub struct ModuleSnapshot {
    pub name: String,
    /// Struct types declared by the module, resolvable from type references.
    pub types: IndexMap<String, SymbolType>,
    pub variables: IndexMap<String, ExportedVar>,
    /// Method overload sets, keyed by unqualified name.
    pub methods: IndexMap<String, Vec<Arc<FunctionType>>>,
}

impl ModuleSnapshot {
    pub fn new(name: impl Into<String>) -> Self {
        ModuleSnapshot { name: name.into(), ..Default::default() }
    }

    /// Name a symbol carries in linkage decorations, unique across modules.
    pub fn linkage_name(module: &str, symbol: &str) -> String {
        format!("{module}.{symbol}")
    }

    pub fn export_type(&mut self, name: impl Into<String>, ty: SymbolType) {
        self.types.insert(name.into(), ty);
    }

    pub fn export_var(&mut self, name: impl Into<String>, ty: SymbolType, uniform: bool) {
        self.variables.insert(name.into(), ExportedVar { ty, uniform });
    }

    pub fn export_method(&mut self, name: impl Into<String>, signature: Arc<FunctionType>) {
        self.methods.entry(name.into()).or_default().push(signature);
    }
}
