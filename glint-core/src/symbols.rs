//! Symbol table: lexical frames layered over shader members and imports.
//!
//! One table serves both compiler passes. Resolution fills it with typed
//! symbols whose `ir_ref` is still 0; code generation later binds generated
//! ids through the `bind_*` methods and pushes fresh frames as it re-walks
//! the same scopes. Identifier lookup follows a fixed order: innermost
//! frames outward, then imported modules in declaration order, then the
//! shader's own members.

use std::sync::Arc;

use indexmap::IndexMap;
use log::trace;
use rspirv::spirv::Word;

use crate::ast::{BufferContainer, TypeRef, VarStorage};
use crate::diag::{Diagnostic, DiagnosticKind, Diagnostics};
use crate::module::ModuleSnapshot;
use crate::scope::{Scope, ScopeStack};
use crate::types::{FunctionType, Storage, SymbolType};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind {
    Variable,
    Method,
    Constant,
    CBuffer,
    TBuffer,
    RGroup,
    SamplerState,
}

impl SymbolKind {
    pub fn of_container(container: BufferContainer) -> Self {
        match container {
            BufferContainer::CBuffer => Self::CBuffer,
            BufferContainer::TBuffer => Self::TBuffer,
            BufferContainer::RGroup => Self::RGroup,
        }
    }

    fn of_type(ty: &SymbolType) -> Self {
        match ty {
            SymbolType::Sampler => Self::SamplerState,
            _ => Self::Variable,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Symbol {
    pub name: String,
    pub kind: SymbolKind,
    pub storage: VarStorage,
    pub is_stage: bool,
    pub ty: SymbolType,
    /// Generated id, 0 until code generation binds it. A pointer id unless
    /// `is_value` is set.
    pub ir_ref: Word,
    pub is_value: bool,
    /// Storage class of the bound pointer. Locals keep the default.
    pub pointer_storage: Storage,
    /// For members of a uniform block: the member's index inside the block
    /// struct. `ir_ref` then refers to the block variable itself.
    pub field_index: Option<u32>,
    /// Module the symbol was imported from.
    pub source: Option<String>,
}

impl Symbol {
    pub fn new(name: impl Into<String>, kind: SymbolKind, ty: SymbolType) -> Self {
        Symbol {
            name: name.into(),
            kind,
            storage: VarStorage::Normal,
            is_stage: false,
            ty,
            ir_ref: 0,
            is_value: false,
            pointer_storage: Storage::Function,
            field_index: None,
            source: None,
        }
    }

    /// A function-local binding whose pointer id is already known.
    pub fn local(name: impl Into<String>, ty: SymbolType, ir_ref: Word) -> Self {
        let mut symbol = Self::new(name, SymbolKind::Variable, ty);
        symbol.ir_ref = ir_ref;
        symbol
    }

    pub fn with_storage(mut self, storage: VarStorage) -> Self {
        self.storage = storage;
        self
    }

    pub fn stage(mut self) -> Self {
        self.is_stage = true;
        self
    }

    pub fn with_field_index(mut self, index: u32) -> Self {
        self.field_index = Some(index);
        self
    }
}

/// One overload of a shader-defined method.
#[derive(Debug, Clone)]
pub struct MethodEntry {
    pub signature: Arc<FunctionType>,
    /// Function id, bound during code generation.
    pub ir_ref: Word,
}

/// Where a resolved method call lands: an own overload (by registration
/// index) or an overload imported from a named module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MethodSource {
    Own(usize),
    Imported(String),
}

pub struct SymbolTable {
    scopes: ScopeStack<Symbol>,
    members: IndexMap<String, Symbol>,
    methods: IndexMap<String, Vec<MethodEntry>>,
    imported_vars: IndexMap<String, Symbol>,
    /// Canonical type string to interned type, so two identical generic
    /// instantiations resolve to one type object.
    declared_types: IndexMap<String, SymbolType>,
    imports: Vec<Arc<ModuleSnapshot>>,
    pub diagnostics: Diagnostics,
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}

impl SymbolTable {
    pub fn new() -> Self {
        SymbolTable {
            scopes: ScopeStack::new(),
            members: IndexMap::new(),
            methods: IndexMap::new(),
            imported_vars: IndexMap::new(),
            declared_types: IndexMap::new(),
            imports: Vec::new(),
            diagnostics: Diagnostics::new(),
        }
    }

    // Frames

    pub fn push(&mut self) {
        self.scopes.push_scope();
    }

    /// Pop the innermost frame, returning it so a loop compiler may rebind
    /// the same names across emission passes.
    pub fn pop(&mut self) -> Option<Scope<Symbol>> {
        self.scopes.pop_scope()
    }

    pub fn insert_local(&mut self, symbol: Symbol) {
        self.scopes.insert(symbol.name.clone(), symbol);
    }

    // Shader surface

    pub fn declare_member(&mut self, symbol: Symbol) {
        if self.members.contains_key(&symbol.name) {
            trace!("member '{}' redeclared, replacing", symbol.name);
        }
        self.members.insert(symbol.name.clone(), symbol);
    }

    /// Register one overload of an own method, returning its index within
    /// the overload set.
    pub fn declare_method(&mut self, name: impl Into<String>, signature: Arc<FunctionType>) -> usize {
        let entries = self.methods.entry(name.into()).or_default();
        entries.push(MethodEntry { signature, ir_ref: 0 });
        entries.len() - 1
    }

    pub fn declare_type(&mut self, name: impl Into<String>, ty: SymbolType) {
        self.declared_types.insert(name.into(), ty);
    }

    pub fn add_import(&mut self, snapshot: Arc<ModuleSnapshot>) {
        trace!("importing module '{}'", snapshot.name);
        for (name, var) in &snapshot.variables {
            // First import of a name wins.
            if self.imported_vars.contains_key(name) {
                continue;
            }
            let mut symbol = Symbol::new(name.clone(), SymbolKind::of_type(&var.ty), var.ty.clone());
            symbol.storage = if var.uniform { VarStorage::Uniform } else { VarStorage::Normal };
            symbol.source = Some(snapshot.name.clone());
            self.imported_vars.insert(name.clone(), symbol);
        }
        self.imports.push(snapshot);
    }

    pub fn imports(&self) -> &[Arc<ModuleSnapshot>] {
        &self.imports
    }

    // Lookup

    pub fn resolve(&self, name: &str) -> Option<&Symbol> {
        self.scopes
            .lookup(name)
            .or_else(|| self.imported_vars.get(name))
            .or_else(|| self.members.get(name))
    }

    /// Candidate overloads for a free call. Own methods shadow imported
    /// ones; otherwise the first import carrying the name supplies the
    /// whole candidate set.
    pub fn method_candidates(&self, name: &str) -> Vec<(Arc<FunctionType>, MethodSource)> {
        if let Some(entries) = self.methods.get(name) {
            return entries
                .iter()
                .enumerate()
                .map(|(i, e)| (e.signature.clone(), MethodSource::Own(i)))
                .collect();
        }
        for snapshot in &self.imports {
            if let Some(signatures) = snapshot.methods.get(name) {
                return signatures
                    .iter()
                    .map(|s| (s.clone(), MethodSource::Imported(snapshot.name.clone())))
                    .collect();
            }
        }
        Vec::new()
    }

    pub fn own_method(&self, name: &str, index: usize) -> Option<&MethodEntry> {
        self.methods.get(name).and_then(|entries| entries.get(index))
    }

    pub fn members(&self) -> impl Iterator<Item = &Symbol> {
        self.members.values()
    }

    pub fn member(&self, name: &str) -> Option<&Symbol> {
        self.members.get(name)
    }

    pub fn declared_type(&self, name: &str) -> Option<&SymbolType> {
        self.declared_types.get(name)
    }

    /// Resolve a written type reference against the builtin vocabulary,
    /// declared types and imported types, interning the result. Unknown
    /// names report `UnknownType` and come back as a placeholder.
    pub fn resolve_type(&mut self, reference: &TypeRef) -> SymbolType {
        let canonical = canonical_name(reference);
        if let Some(ty) = self.declared_types.get(&canonical) {
            return ty.clone();
        }
        let args: Vec<SymbolType> = reference.args.iter().map(|a| self.resolve_type(a)).collect();
        let resolved = SymbolType::from_declared_name(&reference.name, &args).or_else(|| {
            self.imports.iter().find_map(|m| m.types.get(&reference.name).cloned())
        });
        match resolved {
            Some(ty) => {
                self.declared_types.insert(canonical, ty.clone());
                ty
            }
            None => {
                self.diagnostics.report(
                    DiagnosticKind::UnknownType,
                    reference.span,
                    format!("'{canonical}'"),
                );
                SymbolType::Undefined(reference.name.clone())
            }
        }
    }

    // Code generation bindings

    pub fn bind_member_ir(&mut self, name: &str, ir_ref: Word, storage: Storage) {
        if let Some(symbol) = self.members.get_mut(name) {
            symbol.ir_ref = ir_ref;
            symbol.pointer_storage = storage;
        }
    }

    /// Bind a member to a value id rather than a pointer (folded constants).
    pub fn bind_member_value(&mut self, name: &str, ir_ref: Word) {
        if let Some(symbol) = self.members.get_mut(name) {
            symbol.ir_ref = ir_ref;
            symbol.is_value = true;
        }
    }

    /// Bind an own uniform to a member slot of the block it was folded into.
    pub fn bind_member_field(&mut self, name: &str, block: Word, index: u32) {
        if let Some(symbol) = self.members.get_mut(name) {
            symbol.ir_ref = block;
            symbol.pointer_storage = Storage::Uniform;
            symbol.field_index = Some(index);
        }
    }

    pub fn bind_import_ir(&mut self, name: &str, ir_ref: Word, storage: Storage) {
        if let Some(symbol) = self.imported_vars.get_mut(name) {
            symbol.ir_ref = ir_ref;
            symbol.pointer_storage = storage;
        }
    }

    /// Bind an imported uniform to a member slot of the mirror block
    /// declared for its source module.
    pub fn bind_import_field(&mut self, name: &str, block: Word, index: u32) {
        if let Some(symbol) = self.imported_vars.get_mut(name) {
            symbol.ir_ref = block;
            symbol.pointer_storage = Storage::Uniform;
            symbol.field_index = Some(index);
        }
    }

    pub fn bind_method_ir(&mut self, name: &str, index: usize, ir_ref: Word) {
        if let Some(entry) = self.methods.get_mut(name).and_then(|e| e.get_mut(index)) {
            entry.ir_ref = ir_ref;
        }
    }

    pub fn take_diagnostics(&mut self) -> Vec<Diagnostic> {
        std::mem::take(&mut self.diagnostics).into_vec()
    }
}

fn canonical_name(reference: &TypeRef) -> String {
    if reference.args.is_empty() {
        reference.name.clone()
    } else {
        let args: Vec<String> = reference.args.iter().map(canonical_name).collect();
        format!("{}<{}>", reference.name, args.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ScalarKind;

    #[test]
    fn test_resolution_order() {
        let mut table = SymbolTable::new();
        table.declare_member(Symbol::new("x", SymbolKind::Variable, SymbolType::FLOAT));

        let mut imported = ModuleSnapshot::new("Base");
        imported.export_var("x", SymbolType::INT, false);
        table.add_import(Arc::new(imported));

        // Imports take precedence over own members.
        assert_eq!(table.resolve("x").unwrap().ty, SymbolType::INT);

        // Locals take precedence over both.
        table.push();
        table.insert_local(Symbol::local("x", SymbolType::BOOL, 7));
        assert_eq!(table.resolve("x").unwrap().ty, SymbolType::BOOL);
        table.pop();
        assert_eq!(table.resolve("x").unwrap().ty, SymbolType::INT);
    }

    #[test]
    fn test_type_reference_interning() {
        let mut table = SymbolTable::new();
        let buffer = TypeRef::generic("Buffer", vec![TypeRef::named("float4")]);

        let a = table.resolve_type(&buffer);
        let b = table.resolve_type(&buffer);
        assert_eq!(a, b);
        assert!(matches!(a, SymbolType::Buffer { .. }));
        assert!(table.diagnostics.is_empty());
    }

    #[test]
    fn test_unknown_type_reports_and_continues() {
        let mut table = SymbolTable::new();
        let ty = table.resolve_type(&TypeRef::named("vec3"));
        assert!(matches!(ty, SymbolType::Undefined(_)));
        assert_eq!(table.diagnostics.len(), 1);
        assert_eq!(
            table.diagnostics.iter().next().unwrap().kind,
            DiagnosticKind::UnknownType
        );
    }

    #[test]
    fn test_own_methods_shadow_imported() {
        let mut table = SymbolTable::new();
        let own = Arc::new(FunctionType::new(SymbolType::FLOAT, vec![]));
        table.declare_method("Shade", own);

        let mut imported = ModuleSnapshot::new("Base");
        imported.export_method(
            "Shade",
            Arc::new(FunctionType::new(SymbolType::Scalar(ScalarKind::Void), vec![])),
        );
        table.add_import(Arc::new(imported));

        let candidates = table.method_candidates("Shade");
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].1, MethodSource::Own(0));
        assert_eq!(*candidates[0].0.return_type, SymbolType::FLOAT);

        let other = table.method_candidates("Missing");
        assert!(other.is_empty());
    }
}
