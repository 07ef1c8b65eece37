//! Compiler core for a typed, C-like shading language.
//!
//! The input is an annotated shader-class AST; the output is a structured
//! SPIR-V module plus a snapshot of the class's exported surface. Shaders
//! compose by inheritance: a class lists the modules it mixes in, resolves
//! names against their snapshots, and the generated code links against them
//! through import/export linkage decorations.
//!
//! Compilation runs in two passes. Resolution annotates the AST with types
//! and collects diagnostics without giving up on the first error; code
//! generation walks the annotated tree and emits SPIR-V, treating anything
//! the resolver should have caught as a hard failure.

pub mod ast;
mod builder;
pub mod context;
pub mod diag;
pub mod error;
mod expr;
pub mod intrinsics;
pub mod module;
pub mod overload;
pub mod scope;
pub mod shader;
mod stmt;
pub mod symbols;
pub mod types;

#[cfg(test)]
mod codegen_tests;

use std::sync::Arc;

use indexmap::IndexMap;

use crate::intrinsics::Intrinsics;

pub use crate::diag::{Diagnostic, DiagnosticKind};
pub use crate::error::{CompilerError, Result};
pub use crate::module::ModuleSnapshot;
pub use crate::shader::CompiledShader;

#[derive(Debug, Clone, Default)]
pub struct CompileOptions {
    /// Attach OpName debug names to generated variables and functions.
    pub debug_names: bool,
}

/// Shader compiler with a registry of previously compiled modules.
///
/// The intrinsic overload cache is shared across every shader compiled
/// through the same instance.
pub struct Compiler {
    pub(crate) options: CompileOptions,
    pub(crate) intrinsics: Intrinsics,
    pub(crate) modules: IndexMap<String, Arc<ModuleSnapshot>>,
}

impl Default for Compiler {
    fn default() -> Self {
        Self::new()
    }
}

impl Compiler {
    pub fn new() -> Self {
        Self::with_options(CompileOptions::default())
    }

    pub fn with_options(options: CompileOptions) -> Self {
        Compiler { options, intrinsics: Intrinsics::new(), modules: IndexMap::new() }
    }

    /// Make a compiled module's exports available to shaders that inherit it.
    pub fn register_module(&mut self, snapshot: ModuleSnapshot) {
        self.modules.insert(snapshot.name.clone(), Arc::new(snapshot));
    }

    pub fn module(&self, name: &str) -> Option<&Arc<ModuleSnapshot>> {
        self.modules.get(name)
    }

    /// Compile one shader class against the registered modules. The class is
    /// taken mutably because resolution annotates the AST in place.
    pub fn compile(&self, class: &mut ast::ShaderClass) -> Result<CompiledShader> {
        shader::compile_class(self, class)
    }
}
