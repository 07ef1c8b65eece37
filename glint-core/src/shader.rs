//! Shader-class compilation: the driver tying both passes together.
//!
//! A class compiles in two strictly separated passes. Resolution walks every
//! member, interns types, declares the symbol surface and annotates method
//! bodies; it finishes with either an empty diagnostic set or a
//! `CompilerError::Semantic` carrying all of them. Code generation then
//! materializes module-scope storage, declares import stubs for inherited
//! symbols, compiles method bodies and assembles the word stream. The
//! exported surface comes back as a [`ModuleSnapshot`] so later shaders can
//! inherit this one.

use std::collections::HashMap;
use std::sync::Arc;

use log::debug;
use rspirv::binary::Assemble;
use rspirv::dr::Operand;
use rspirv::spirv::{Decoration, FunctionControl, LinkageType, StorageClass, Word};

use crate::ast::{
    BufferContainer, Expr, ExprKind, Function, ShaderClass, ShaderMember, ShaderVar, StructDecl,
    VarStorage,
};
use crate::context::{storage_class, SpirvContext};
use crate::error::{CompilerError, Result};
use crate::expr::{ExprCompiler, ExprResolver};
use crate::intrinsics::Intrinsics;
use crate::module::ModuleSnapshot;
use crate::stmt::{StmtCompiler, StmtResolver};
use crate::symbols::{Symbol, SymbolKind, SymbolTable};
use crate::types::{
    std140_size_align, FunctionParam, FunctionType, ScalarKind, Storage, StructField, SymbolType,
};
use crate::{bail_codegen, bail_module, Compiler};

/// Result of compiling one shader class.
#[derive(Debug)]
pub struct CompiledShader {
    /// Assembled SPIR-V word stream.
    pub words: Vec<u32>,
    /// Exported surface, ready to register for shaders that inherit this one.
    pub snapshot: Arc<ModuleSnapshot>,
}

pub(crate) fn compile_class(compiler: &Compiler, class: &mut ShaderClass) -> Result<CompiledShader> {
    let mut driver = ClassCompiler { intrinsics: &compiler.intrinsics, symbols: SymbolTable::new() };
    for module in &class.inherits {
        match compiler.modules.get(module) {
            Some(snapshot) => driver.symbols.add_import(snapshot.clone()),
            None => bail_module!("shader '{}' inherits unknown module '{}'", class.name, module),
        }
    }
    debug!("resolving shader '{}'", class.name);
    driver.resolve(class)?;
    debug!("generating code for shader '{}'", class.name);
    driver.generate(class, compiler.options.debug_names)
}

struct ClassCompiler<'a> {
    intrinsics: &'a Intrinsics,
    symbols: SymbolTable,
}

impl ClassCompiler<'_> {
    // Resolution pass

    fn resolve(&mut self, class: &mut ShaderClass) -> Result<()> {
        // The whole surface first, so method bodies see members and
        // overloads declared after them.
        for member in &mut class.members {
            match member {
                ShaderMember::Struct(decl) => self.declare_struct(decl),
                ShaderMember::Var(var) => self.declare_var(var)?,
                ShaderMember::Buffer { container, name, members, .. } => {
                    let container = *container;
                    let name = name.clone();
                    self.declare_buffer(container, &name, members)?;
                }
                ShaderMember::Method(method) => self.declare_signature(method)?,
            }
        }
        let mut seen = HashMap::new();
        for member in &mut class.members {
            if let ShaderMember::Method(method) = member {
                let index = next_overload(&mut seen, &method.name);
                self.resolve_body(method, index)?;
            }
        }
        let diagnostics = self.symbols.take_diagnostics();
        if diagnostics.is_empty() {
            Ok(())
        } else {
            Err(CompilerError::Semantic(diagnostics))
        }
    }

    fn declare_struct(&mut self, decl: &StructDecl) {
        let fields: Vec<StructField> = decl
            .fields
            .iter()
            .map(|(name, ty)| StructField { name: name.clone(), ty: self.symbols.resolve_type(ty) })
            .collect();
        let ty = SymbolType::Struct { name: decl.name.clone(), fields: Arc::new(fields) };
        self.symbols.declare_type(decl.name.clone(), ty);
    }

    fn declare_var(&mut self, var: &mut ShaderVar) -> Result<()> {
        let ty = self.symbols.resolve_type(&var.ty);
        let kind = if var.is_const {
            SymbolKind::Constant
        } else if matches!(ty, SymbolType::Sampler) {
            SymbolKind::SamplerState
        } else {
            SymbolKind::Variable
        };
        let mut symbol = Symbol::new(var.name.clone(), kind, ty.clone()).with_storage(var.storage);
        if var.is_stage {
            symbol = symbol.stage();
        }
        self.symbols.declare_member(symbol);
        if let Some(init) = &mut var.init {
            let mut resolver =
                ExprResolver { symbols: &mut self.symbols, intrinsics: self.intrinsics };
            let init_ty = resolver.resolve(init, Some(&ty))?;
            resolver.require_assignable(&init_ty, &ty, var.span);
        }
        Ok(())
    }

    fn declare_buffer(
        &mut self,
        container: BufferContainer,
        name: &str,
        members: &mut [ShaderVar],
    ) -> Result<()> {
        if container == BufferContainer::RGroup {
            // Resource groups only scope bindings; members stay individual.
            for member in members.iter_mut() {
                self.declare_var(member)?;
            }
            return Ok(());
        }
        let mut fields = Vec::with_capacity(members.len());
        for member in members.iter() {
            fields.push(StructField {
                name: member.name.clone(),
                ty: self.symbols.resolve_type(&member.ty),
            });
        }
        let buffer_ty =
            SymbolType::ConstantBuffer { name: name.to_string(), members: Arc::new(fields.clone()) };
        self.symbols
            .declare_member(Symbol::new(name, SymbolKind::of_container(container), buffer_ty));
        for (index, field) in fields.into_iter().enumerate() {
            let symbol = Symbol::new(field.name, SymbolKind::Variable, field.ty)
                .with_storage(VarStorage::Uniform)
                .with_field_index(index as u32);
            self.symbols.declare_member(symbol);
        }
        Ok(())
    }

    fn declare_signature(&mut self, method: &mut Function) -> Result<()> {
        let return_ty = self.symbols.resolve_type(&method.return_ty);
        let mut params = Vec::with_capacity(method.params.len());
        for param in &mut method.params {
            let ty = self.symbols.resolve_type(&param.ty);
            if let Some(default) = &mut param.default {
                let mut resolver =
                    ExprResolver { symbols: &mut self.symbols, intrinsics: self.intrinsics };
                let default_ty = resolver.resolve(default, Some(&ty))?;
                resolver.require_assignable(&default_ty, &ty, default.span);
            }
            params.push(FunctionParam {
                ty,
                modifier: param.modifier,
                has_default: param.default.is_some(),
            });
        }
        self.symbols
            .declare_method(method.name.clone(), Arc::new(FunctionType::new(return_ty, params)));
        Ok(())
    }

    fn resolve_body(&mut self, method: &mut Function, index: usize) -> Result<()> {
        let signature = match self.symbols.own_method(&method.name, index) {
            Some(entry) => entry.signature.clone(),
            None => bail_codegen!("method '{}' lost its signature", method.name),
        };
        self.symbols.push();
        for (param, declared) in method.params.iter().zip(&signature.params) {
            self.symbols.insert_local(Symbol::new(
                param.name.clone(),
                SymbolKind::Variable,
                declared.ty.clone(),
            ));
        }
        let mut resolver = StmtResolver {
            expr: ExprResolver { symbols: &mut self.symbols, intrinsics: self.intrinsics },
            return_ty: (*signature.return_type).clone(),
            loop_depth: 0,
        };
        let result = resolver.resolve_all(&mut method.body);
        self.symbols.pop();
        result
    }

    // Codegen pass

    fn generate(&mut self, class: &ShaderClass, debug_names: bool) -> Result<CompiledShader> {
        let mut ctx = SpirvContext::new(debug_names);
        let mut bindings = 0u32;
        self.materialize_imports(&mut ctx, &mut bindings)?;
        self.materialize_members(&mut ctx, class, &mut bindings)?;
        let imported = self.declare_imported_methods(&mut ctx)?;
        self.compile_methods(&mut ctx, class, &imported)?;
        let snapshot = self.export_snapshot(class);
        Ok(CompiledShader { words: ctx.into_module().assemble(), snapshot: Arc::new(snapshot) })
    }

    /// Redeclare every inherited symbol with import linkage. Uniforms with a
    /// std140 layout fold into one mirror block per source module, matching
    /// the block the exporting module emitted; everything else becomes an
    /// individual variable.
    fn materialize_imports(&mut self, ctx: &mut SpirvContext, bindings: &mut u32) -> Result<()> {
        let imports: Vec<Arc<ModuleSnapshot>> = self.symbols.imports().to_vec();
        for snapshot in &imports {
            let block_members: Vec<(String, SymbolType)> = snapshot
                .variables
                .iter()
                .filter(|(_, var)| var.uniform && std140_size_align(&var.ty).is_some())
                .map(|(name, var)| (name.clone(), var.ty.clone()))
                .collect();
            if !block_members.is_empty() {
                let fields: Vec<StructField> = block_members
                    .iter()
                    .map(|(name, ty)| StructField { name: name.clone(), ty: ty.clone() })
                    .collect();
                let block_ty = SymbolType::ConstantBuffer {
                    name: snapshot.name.clone(),
                    members: Arc::new(fields),
                };
                let block = declare_global(ctx, &block_ty, StorageClass::Uniform, None)?;
                bind_resource(ctx, block, bindings);
                decorate_linkage(ctx, block, &snapshot.name, LinkageType::Import);
                name_id(ctx, block, &snapshot.name);
                for (index, (name, _)) in block_members.iter().enumerate() {
                    self.symbols.bind_import_field(name, block, index as u32);
                }
            }
            for (name, exported) in &snapshot.variables {
                if exported.uniform && std140_size_align(&exported.ty).is_some() {
                    continue;
                }
                let storage = resource_storage(&exported.ty);
                let var = declare_global(ctx, &exported.ty, storage_class(storage), None)?;
                if storage != Storage::Private {
                    bind_resource(ctx, var, bindings);
                }
                decorate_linkage(
                    ctx,
                    var,
                    &ModuleSnapshot::linkage_name(&snapshot.name, name),
                    LinkageType::Import,
                );
                name_id(ctx, var, name);
                self.symbols.bind_import_ir(name, var, storage);
            }
        }
        Ok(())
    }

    fn materialize_members(
        &mut self,
        ctx: &mut SpirvContext,
        class: &ShaderClass,
        bindings: &mut u32,
    ) -> Result<()> {
        // Own uniforms fold into one implicit block named after the class,
        // mirroring what importers will declare on their side.
        let mut globals = Vec::new();
        for member in &class.members {
            if let ShaderMember::Var(var) = member {
                if var.storage != VarStorage::Uniform {
                    continue;
                }
                let Some(symbol) = self.symbols.member(&var.name) else { continue };
                if std140_size_align(&symbol.ty).is_some() {
                    globals.push((var.name.clone(), symbol.ty.clone()));
                }
            }
        }
        if !globals.is_empty() {
            let fields: Vec<StructField> = globals
                .iter()
                .map(|(name, ty)| StructField { name: name.clone(), ty: ty.clone() })
                .collect();
            let block_ty =
                SymbolType::ConstantBuffer { name: class.name.clone(), members: Arc::new(fields) };
            let block = declare_global(ctx, &block_ty, StorageClass::Uniform, None)?;
            bind_resource(ctx, block, bindings);
            decorate_linkage(ctx, block, &class.name, LinkageType::Export);
            name_id(ctx, block, &class.name);
            for (index, (name, _)) in globals.iter().enumerate() {
                self.symbols.bind_member_field(name, block, index as u32);
            }
        }
        for member in &class.members {
            match member {
                ShaderMember::Var(var) => self.materialize_var(ctx, &class.name, var, bindings)?,
                ShaderMember::Buffer { container: BufferContainer::RGroup, members, .. } => {
                    for var in members {
                        self.materialize_var(ctx, &class.name, var, bindings)?;
                    }
                }
                ShaderMember::Buffer { name, .. } => {
                    self.materialize_cbuffer(ctx, &class.name, name, bindings)?;
                }
                ShaderMember::Struct(_) | ShaderMember::Method(_) => {}
            }
        }
        Ok(())
    }

    fn materialize_var(
        &mut self,
        ctx: &mut SpirvContext,
        class_name: &str,
        var: &ShaderVar,
        bindings: &mut u32,
    ) -> Result<()> {
        let Some(symbol) = self.symbols.member(&var.name) else {
            bail_codegen!("member '{}' lost its declaration", var.name);
        };
        // Already folded into a uniform block.
        if symbol.field_index.is_some() || symbol.ir_ref != 0 {
            return Ok(());
        }
        let ty = symbol.ty.clone();
        if var.is_const {
            if let Some(init) = &var.init {
                // Literal constants fold to their value; no storage at all.
                if let Some(id) = literal_of(ctx, init, &ty)? {
                    self.symbols.bind_member_value(&var.name, id);
                    return Ok(());
                }
            }
        }
        let storage = resource_storage(&ty);
        let init = match (&var.init, storage) {
            (Some(init), Storage::Private) => literal_of(ctx, init, &ty)?,
            _ => None,
        };
        let id = declare_global(ctx, &ty, storage_class(storage), init)?;
        if storage == Storage::Private {
            decorate_linkage(
                ctx,
                id,
                &ModuleSnapshot::linkage_name(class_name, &var.name),
                LinkageType::Export,
            );
        } else {
            bind_resource(ctx, id, bindings);
        }
        name_id(ctx, id, &var.name);
        self.symbols.bind_member_ir(&var.name, id, storage);
        Ok(())
    }

    fn materialize_cbuffer(
        &mut self,
        ctx: &mut SpirvContext,
        class_name: &str,
        name: &str,
        bindings: &mut u32,
    ) -> Result<()> {
        let Some(symbol) = self.symbols.member(name) else {
            bail_codegen!("buffer '{name}' lost its declaration");
        };
        let ty = symbol.ty.clone();
        let block = declare_global(ctx, &ty, StorageClass::Uniform, None)?;
        bind_resource(ctx, block, bindings);
        decorate_linkage(
            ctx,
            block,
            &ModuleSnapshot::linkage_name(class_name, name),
            LinkageType::Export,
        );
        name_id(ctx, block, name);
        self.symbols.bind_member_ir(name, block, Storage::Uniform);
        let SymbolType::ConstantBuffer { members, .. } = &ty else {
            bail_codegen!("buffer '{name}' resolved to a non-buffer type");
        };
        for (index, field) in members.iter().enumerate() {
            self.symbols.bind_member_field(&field.name, block, index as u32);
        }
        Ok(())
    }

    /// Bodyless declarations for every inherited method, keyed by source
    /// module and name, one function id per overload in snapshot order.
    fn declare_imported_methods(
        &mut self,
        ctx: &mut SpirvContext,
    ) -> Result<HashMap<(String, String), Vec<Word>>> {
        let imports: Vec<Arc<ModuleSnapshot>> = self.symbols.imports().to_vec();
        let mut declared = HashMap::new();
        for snapshot in &imports {
            for (name, signatures) in &snapshot.methods {
                let mut ids = Vec::with_capacity(signatures.len());
                for (index, signature) in signatures.iter().enumerate() {
                    let id = declare_function_stub(ctx, signature)?;
                    decorate_linkage(
                        ctx,
                        id,
                        &overload_linkage_name(&snapshot.name, name, index),
                        LinkageType::Import,
                    );
                    name_id(ctx, id, name);
                    ids.push(id);
                }
                declared.insert((snapshot.name.clone(), name.clone()), ids);
            }
        }
        Ok(declared)
    }

    fn compile_methods(
        &mut self,
        ctx: &mut SpirvContext,
        class: &ShaderClass,
        imported: &HashMap<(String, String), Vec<Word>>,
    ) -> Result<()> {
        // Reserve function ids up front so a body can call a method that is
        // defined after it.
        let mut seen = HashMap::new();
        let mut plan = Vec::new();
        for method in class.methods() {
            let index = next_overload(&mut seen, &method.name);
            let signature = match self.symbols.own_method(&method.name, index) {
                Some(entry) => entry.signature.clone(),
                None => bail_codegen!("method '{}' lost its signature", method.name),
            };
            let id = ctx.id();
            self.symbols.bind_method_ir(&method.name, index, id);
            plan.push((id, index, signature));
        }
        for (method, (id, index, signature)) in class.methods().zip(plan) {
            debug!("compiling method '{}'", method.name);
            let (_, params) = ctx.begin_function(&signature, Some(id))?;
            self.symbols.push();
            for ((param, declared), value) in
                method.params.iter().zip(&signature.params).zip(&params)
            {
                self.symbols.insert_local(Symbol::local(
                    param.name.clone(),
                    declared.ty.clone(),
                    value.id,
                ));
            }
            let mut compiler = StmtCompiler {
                expr: ExprCompiler {
                    symbols: &mut self.symbols,
                    intrinsics: self.intrinsics,
                    ctx: &mut *ctx,
                    class,
                    imported_methods: imported,
                },
                return_ty: (*signature.return_type).clone(),
            };
            let result = compiler.compile_all(&method.body);
            self.symbols.pop();
            result?;
            ctx.end_function(signature.return_type.is_void())?;
            decorate_linkage(
                ctx,
                id,
                &overload_linkage_name(&class.name, &method.name, index),
                LinkageType::Export,
            );
            name_id(ctx, id, &method.name);
        }
        Ok(())
    }

    fn export_snapshot(&self, class: &ShaderClass) -> ModuleSnapshot {
        let mut snapshot = ModuleSnapshot::new(class.name.clone());
        for member in &class.members {
            if let ShaderMember::Struct(decl) = member {
                if let Some(ty) = self.symbols.declared_type(&decl.name) {
                    snapshot.export_type(decl.name.clone(), ty.clone());
                }
            }
        }
        for symbol in self.symbols.members() {
            match symbol.kind {
                SymbolKind::CBuffer | SymbolKind::TBuffer | SymbolKind::RGroup => {}
                _ => snapshot.export_var(
                    symbol.name.clone(),
                    symbol.ty.clone(),
                    symbol.storage == VarStorage::Uniform,
                ),
            }
        }
        let mut seen = HashMap::new();
        for method in class.methods() {
            let index = next_overload(&mut seen, &method.name);
            if let Some(entry) = self.symbols.own_method(&method.name, index) {
                snapshot.export_method(method.name.clone(), entry.signature.clone());
            }
        }
        snapshot
    }
}

fn next_overload(seen: &mut HashMap<String, usize>, name: &str) -> usize {
    let slot = seen.entry(name.to_string()).or_insert(0);
    let index = *slot;
    *slot += 1;
    index
}

/// Private variables link fine; resources bind by descriptor instead.
fn resource_storage(ty: &SymbolType) -> Storage {
    match ty {
        SymbolType::Texture { .. } | SymbolType::Sampler | SymbolType::Buffer { .. } => {
            Storage::UniformConstant
        }
        SymbolType::StructuredBuffer { .. } => Storage::StorageBuffer,
        _ => Storage::Private,
    }
}

fn declare_global(
    ctx: &mut SpirvContext,
    ty: &SymbolType,
    storage: StorageClass,
    init: Option<Word>,
) -> Result<Word> {
    let pointee = ctx.register_type(ty)?;
    let ptr_type = ctx.type_pointer_to(storage, pointee);
    Ok(ctx.builder.variable(ptr_type, None, storage, init))
}

fn declare_function_stub(ctx: &mut SpirvContext, signature: &Arc<FunctionType>) -> Result<Word> {
    let return_type = ctx.register_type(&signature.return_type)?;
    let fn_type = ctx.register_type(&SymbolType::Function(signature.clone()))?;
    let id = ctx.builder.begin_function(return_type, None, FunctionControl::NONE, fn_type)?;
    for param in &signature.params {
        let pointee = ctx.register_type(&param.ty)?;
        let ptr_type = ctx.type_pointer_to(StorageClass::Function, pointee);
        ctx.builder.function_parameter(ptr_type)?;
    }
    ctx.builder.end_function()?;
    Ok(id)
}

/// Overloads past the first get an index suffix so every linkage name in a
/// module stays unique.
fn overload_linkage_name(module: &str, method: &str, index: usize) -> String {
    let base = ModuleSnapshot::linkage_name(module, method);
    if index == 0 {
        base
    } else {
        format!("{base}#{index}")
    }
}

fn decorate_linkage(ctx: &mut SpirvContext, id: Word, name: &str, linkage: LinkageType) {
    ctx.builder.decorate(
        id,
        Decoration::LinkageAttributes,
        [Operand::LiteralString(name.to_string()), Operand::LinkageType(linkage)],
    );
}

fn bind_resource(ctx: &mut SpirvContext, id: Word, bindings: &mut u32) {
    ctx.builder.decorate(id, Decoration::DescriptorSet, [Operand::LiteralBit32(0)]);
    ctx.builder.decorate(id, Decoration::Binding, [Operand::LiteralBit32(*bindings)]);
    *bindings += 1;
}

fn name_id(ctx: &mut SpirvContext, id: Word, name: &str) {
    if ctx.debug_names {
        ctx.builder.name(id, name.to_string());
    }
}

/// Scalar literal initializers become SPIR-V constants; anything else has no
/// module-scope representation and is left for the host to write.
fn literal_of(ctx: &mut SpirvContext, init: &Expr, ty: &SymbolType) -> Result<Option<Word>> {
    let SymbolType::Scalar(kind) = ty else { return Ok(None) };
    let id = match &init.kind {
        ExprKind::IntLit(value) if kind.is_floating() => ctx.const_float(*kind, *value as f64)?,
        ExprKind::IntLit(value) if kind.is_numeric() => ctx.const_int(*kind, *value)?,
        ExprKind::FloatLit(value) if kind.is_floating() => ctx.const_float(*kind, *value)?,
        ExprKind::BoolLit(value) if *kind == ScalarKind::Bool => ctx.const_bool(*value)?,
        _ => return Ok(None),
    };
    Ok(Some(id))
}
