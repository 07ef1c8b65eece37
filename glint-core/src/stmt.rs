//! Statement resolution and lowering.
//!
//! Statements run through the same two passes as expressions: a resolution
//! pass that annotates the AST and collects diagnostics, then a codegen pass
//! that emits structured SPIR-V control flow. Each `if` arm gets a selection
//! merge, each loop gets the check/body/continue/merge block quartet, and
//! `foreach` lowers to the equivalent counted `for` with a hidden index.

use crate::ast::{BinOp, Expr, Span, Stmt, StmtKind, TypeRef, VarDeclarator};
use crate::context::Value;
use crate::diag::DiagnosticKind;
use crate::error::Result;
use crate::expr::{error_type, is_error, ty_of, ExprCompiler, ExprResolver, Place};
use crate::symbols::{Symbol, SymbolKind};
use crate::types::{ScalarKind, SymbolType};
use crate::{bail_codegen_at, bail_unsupported_at};

/// Resolution pass over method bodies.
///
/// Never aborts on a bad statement: the offense is reported and resolution
/// continues with the siblings so one body yields its full diagnostic set.
pub(crate) struct StmtResolver<'a> {
    pub(crate) expr: ExprResolver<'a>,
    /// Declared return type of the enclosing method.
    pub(crate) return_ty: SymbolType,
    /// Number of enclosing loops; zero means `break`/`continue` are illegal.
    pub(crate) loop_depth: u32,
}

impl StmtResolver<'_> {
    pub(crate) fn resolve_all(&mut self, stmts: &mut [Stmt]) -> Result<()> {
        for stmt in stmts {
            self.resolve(stmt)?;
        }
        Ok(())
    }

    fn resolve(&mut self, stmt: &mut Stmt) -> Result<()> {
        let span = stmt.span;
        match &mut stmt.kind {
            StmtKind::Declare { ty, decls } => self.resolve_declare(ty, decls, span),
            StmtKind::Assign { target, op, value } => {
                let target_ty = self.expr.resolve(target, None)?;
                self.expr.check_assignable_target(target);
                let value_ty = self.expr.resolve(value, Some(&target_ty))?;
                if is_error(&target_ty) || is_error(&value_ty) {
                    return Ok(());
                }
                match op.binary() {
                    None => self.expr.require_assignable(&value_ty, &target_ty, span),
                    Some(bin) => {
                        match crate::builder::binary_op_types(bin, &target_ty, &value_ty) {
                            Ok((_, result)) => {
                                self.expr.require_assignable(&result, &target_ty, span)
                            }
                            Err(message) => self.expr.symbols.diagnostics.report(
                                DiagnosticKind::TypeMismatch,
                                span,
                                message,
                            ),
                        }
                    }
                }
                Ok(())
            }
            StmtKind::Expr(expr) => {
                self.expr.resolve(expr, None)?;
                Ok(())
            }
            StmtKind::Block(body) => self.resolve_scoped(body),
            StmtKind::If { arms, else_body } => {
                for (cond, body) in arms {
                    self.resolve_condition(cond)?;
                    self.resolve_scoped(body)?;
                }
                if let Some(body) = else_body {
                    self.resolve_scoped(body)?;
                }
                Ok(())
            }
            StmtKind::For { init, cond, update, body } => {
                self.expr.symbols.push();
                let result = self.resolve_for(init, cond.as_mut(), update, body);
                self.expr.symbols.pop();
                result
            }
            StmtKind::While { cond, body } => {
                self.resolve_condition(cond)?;
                self.loop_depth += 1;
                let result = self.resolve_scoped(body);
                self.loop_depth -= 1;
                result
            }
            StmtKind::Foreach { ty, var, collection, body, elem_ty } => {
                self.resolve_foreach(ty, var, collection, body, elem_ty, span)
            }
            StmtKind::Break => {
                if self.loop_depth == 0 {
                    self.expr.symbols.diagnostics.report(
                        DiagnosticKind::InvalidControlFlow,
                        span,
                        "'break' outside of a loop",
                    );
                }
                Ok(())
            }
            StmtKind::Continue => {
                if self.loop_depth == 0 {
                    self.expr.symbols.diagnostics.report(
                        DiagnosticKind::InvalidControlFlow,
                        span,
                        "'continue' outside of a loop",
                    );
                }
                Ok(())
            }
            StmtKind::Return(value) => self.resolve_return(value.as_mut(), span),
        }
    }

    fn resolve_declare(
        &mut self,
        ty: &TypeRef,
        decls: &mut [VarDeclarator],
        span: Span,
    ) -> Result<()> {
        for decl in decls {
            let declared = if ty.is_var() {
                match &mut decl.init {
                    Some(init) => {
                        let inferred = self.expr.resolve(init, None)?;
                        if inferred.is_void() {
                            self.expr.symbols.diagnostics.report(
                                DiagnosticKind::TypeMismatch,
                                span,
                                format!("cannot infer a type for '{}' from a void value", decl.name),
                            );
                            error_type()
                        } else {
                            inferred
                        }
                    }
                    None => {
                        self.expr.symbols.diagnostics.report(
                            DiagnosticKind::TypeMismatch,
                            span,
                            format!("'{}' declared with 'var' needs an initializer", decl.name),
                        );
                        error_type()
                    }
                }
            } else {
                let declared = self.expr.symbols.resolve_type(ty);
                if let Some(init) = &mut decl.init {
                    let init_ty = self.expr.resolve(init, Some(&declared))?;
                    self.expr.require_assignable(&init_ty, &declared, init.span);
                }
                declared
            };
            decl.resolved_ty = Some(declared.clone());
            self.expr
                .symbols
                .insert_local(Symbol::new(decl.name.clone(), SymbolKind::Variable, declared));
        }
        Ok(())
    }

    fn resolve_for(
        &mut self,
        init: &mut [Stmt],
        cond: Option<&mut Expr>,
        update: &mut [Stmt],
        body: &mut Vec<Stmt>,
    ) -> Result<()> {
        self.resolve_all(init)?;
        if let Some(cond) = cond {
            self.resolve_condition(cond)?;
        }
        self.loop_depth += 1;
        let result = self.resolve_scoped(body).and_then(|_| self.resolve_all(update));
        self.loop_depth -= 1;
        result
    }

    fn resolve_foreach(
        &mut self,
        ty: &TypeRef,
        var: &str,
        collection: &mut Expr,
        body: &mut Vec<Stmt>,
        elem_ty: &mut Option<SymbolType>,
        span: Span,
    ) -> Result<()> {
        let collection_ty = self.expr.resolve(collection, None)?;
        let element = match &collection_ty {
            SymbolType::Array { base, len: Some(_) } => (**base).clone(),
            SymbolType::Array { len: None, .. } => {
                bail_unsupported_at!(span, "foreach over a runtime-sized array")
            }
            other if is_error(other) => error_type(),
            other => {
                self.expr.symbols.diagnostics.report(
                    DiagnosticKind::TypeMismatch,
                    span,
                    format!("cannot iterate a value of type {other}"),
                );
                error_type()
            }
        };
        let binding = if ty.is_var() {
            element.clone()
        } else {
            let declared = self.expr.symbols.resolve_type(ty);
            self.expr.require_assignable(&element, &declared, span);
            declared
        };
        *elem_ty = Some(binding.clone());
        self.expr.symbols.push();
        self.expr
            .symbols
            .insert_local(Symbol::new(var.to_string(), SymbolKind::Variable, binding));
        self.loop_depth += 1;
        let result = self.resolve_all(body);
        self.loop_depth -= 1;
        self.expr.symbols.pop();
        result
    }

    fn resolve_return(&mut self, value: Option<&mut Expr>, span: Span) -> Result<()> {
        match value {
            Some(value) => {
                let value_ty = self.expr.resolve(value, Some(&self.return_ty.clone()))?;
                if self.return_ty.is_void() {
                    self.expr.symbols.diagnostics.report(
                        DiagnosticKind::TypeMismatch,
                        span,
                        "cannot return a value from a void method",
                    );
                } else {
                    let expected = self.return_ty.clone();
                    self.expr.require_assignable(&value_ty, &expected, span);
                }
            }
            None => {
                if !self.return_ty.is_void() {
                    self.expr.symbols.diagnostics.report(
                        DiagnosticKind::TypeMismatch,
                        span,
                        format!("method must return a value of type {}", self.return_ty),
                    );
                }
            }
        }
        Ok(())
    }

    fn resolve_condition(&mut self, cond: &mut Expr) -> Result<()> {
        let ty = self.expr.resolve(cond, Some(&SymbolType::BOOL))?;
        if !is_error(&ty) && ty != SymbolType::BOOL {
            self.expr.symbols.diagnostics.report(
                DiagnosticKind::TypeMismatch,
                cond.span,
                format!("condition has type {ty}, expected bool"),
            );
        }
        Ok(())
    }

    fn resolve_scoped(&mut self, body: &mut Vec<Stmt>) -> Result<()> {
        self.expr.symbols.push();
        let result = self.resolve_all(body);
        self.expr.symbols.pop();
        result
    }
}

/// Codegen pass over resolved method bodies.
pub(crate) struct StmtCompiler<'a> {
    pub(crate) expr: ExprCompiler<'a>,
    pub(crate) return_ty: SymbolType,
}

impl StmtCompiler<'_> {
    pub(crate) fn compile_all(&mut self, stmts: &[Stmt]) -> Result<()> {
        for stmt in stmts {
            // A terminated block accepts no more instructions; anything after
            // a return/break/continue in the same block is unreachable.
            if !self.expr.ctx.block_open() {
                break;
            }
            self.compile(stmt)?;
        }
        Ok(())
    }

    fn compile(&mut self, stmt: &Stmt) -> Result<()> {
        let span = stmt.span;
        match &stmt.kind {
            StmtKind::Declare { decls, .. } => self.compile_declare(decls, span),
            StmtKind::Assign { target, op, value } => {
                let target_ty = ty_of(target)?.clone();
                let place = self.expr.compile_place(target)?;
                let computed = match op.binary() {
                    None => {
                        let value_ty = ty_of(value)?.clone();
                        let compiled = self.expr.compile(value)?;
                        self.expr.ctx.convert(compiled, &value_ty, &target_ty, false, value.span)?
                    }
                    Some(bin) => {
                        let current = self.expr.load_place(&place)?;
                        let value_ty = ty_of(value)?.clone();
                        let compiled = self.expr.compile(value)?;
                        let (result, result_ty) = self.expr.ctx.binary_op(
                            bin, current, &target_ty, compiled, &value_ty, span,
                        )?;
                        self.expr.ctx.convert(result, &result_ty, &target_ty, false, span)?
                    }
                };
                self.expr.store_place(&place, computed.id, span)
            }
            StmtKind::Expr(expr) => {
                self.expr.compile(expr)?;
                Ok(())
            }
            StmtKind::Block(body) => self.compile_scoped(body),
            StmtKind::If { arms, else_body } => {
                self.compile_if(arms, else_body.as_deref())
            }
            StmtKind::For { init, cond, update, body } => {
                self.compile_for(init, cond.as_ref(), update, body)
            }
            StmtKind::While { cond, body } => {
                self.compile_for(&[], Some(cond), &[], body)
            }
            StmtKind::Foreach { var, collection, body, elem_ty, .. } => {
                self.compile_foreach(var, collection, body, elem_ty, span)
            }
            StmtKind::Break => match self.expr.ctx.current_escape() {
                Some((_, merge)) => self.expr.ctx.branch(merge),
                None => bail_codegen_at!(span, "'break' outside of a loop"),
            },
            StmtKind::Continue => match self.expr.ctx.current_escape() {
                Some((continue_block, _)) => self.expr.ctx.branch(continue_block),
                None => bail_codegen_at!(span, "'continue' outside of a loop"),
            },
            StmtKind::Return(value) => match value {
                Some(value) => {
                    let value_ty = ty_of(value)?.clone();
                    let compiled = self.expr.compile(value)?;
                    let compiled = self
                        .expr
                        .ctx
                        .convert(compiled, &value_ty, &self.return_ty.clone(), false, span)?;
                    self.expr.ctx.ret_value(compiled.id)
                }
                None => self.expr.ctx.ret(),
            },
        }
    }

    fn compile_declare(&mut self, decls: &[VarDeclarator], span: Span) -> Result<()> {
        for decl in decls {
            let Some(ty) = decl.resolved_ty.clone() else {
                bail_codegen_at!(span, "declaration of '{}' was never resolved", decl.name);
            };
            let local = self.expr.ctx.declare_local(&ty)?;
            if let Some(init) = &decl.init {
                let init_ty = ty_of(init)?.clone();
                let value = self.expr.compile(init)?;
                let value = self.expr.ctx.convert(value, &init_ty, &ty, false, init.span)?;
                self.expr.ctx.store(local.id, value.id)?;
            }
            self.expr
                .symbols
                .insert_local(Symbol::local(decl.name.clone(), ty, local.id));
        }
        Ok(())
    }

    /// Lowers an if/else-if chain recursively. Each arm owns a selection
    /// construct; the nested merge blocks close innermost-first, so the
    /// outermost merge is the block left open for the statements that follow.
    fn compile_if(&mut self, arms: &[(Expr, Vec<Stmt>)], else_body: Option<&[Stmt]>) -> Result<()> {
        let Some(((cond, body), rest)) = arms.split_first() else {
            if let Some(body) = else_body {
                self.compile_scoped(body)?;
            }
            return Ok(());
        };
        let selector = self.expr.compile(cond)?;
        let true_block = self.expr.ctx.id();
        let merge_block = self.expr.ctx.id();
        let has_else = !rest.is_empty() || else_body.is_some();
        let false_block = if has_else { self.expr.ctx.id() } else { merge_block };
        self.expr
            .ctx
            .branch_conditional(selector.id, true_block, false_block, merge_block)?;
        self.expr.ctx.begin_block(true_block)?;
        self.compile_scoped(body)?;
        self.expr.ctx.branch_if_open(merge_block)?;
        if has_else {
            self.expr.ctx.begin_block(false_block)?;
            self.compile_if(rest, else_body)?;
            self.expr.ctx.branch_if_open(merge_block)?;
        }
        self.expr.ctx.begin_block(merge_block)
    }

    /// Shared lowering for `for` and `while`: check block holding the loop
    /// merge, body block, continue block with the update code, merge block.
    fn compile_for(
        &mut self,
        init: &[Stmt],
        cond: Option<&Expr>,
        update: &[Stmt],
        body: &[Stmt],
    ) -> Result<()> {
        self.expr.symbols.push();
        let result = self.compile_loop(init, cond, update, body);
        self.expr.symbols.pop();
        result
    }

    fn compile_loop(
        &mut self,
        init: &[Stmt],
        cond: Option<&Expr>,
        update: &[Stmt],
        body: &[Stmt],
    ) -> Result<()> {
        self.compile_all(init)?;
        let check = self.expr.ctx.id();
        let body_block = self.expr.ctx.id();
        let continue_block = self.expr.ctx.id();
        let merge = self.expr.ctx.id();
        self.expr.ctx.branch(check)?;
        self.expr.ctx.begin_block(check)?;
        let selector = match cond {
            Some(cond) => self.expr.compile(cond)?.id,
            None => self.expr.ctx.const_bool(true)?,
        };
        self.expr.ctx.loop_header(selector, body_block, continue_block, merge)?;
        self.expr.ctx.begin_block(body_block)?;
        self.expr.ctx.push_escape(continue_block, merge);
        let result = self.compile_scoped(body);
        self.expr.ctx.pop_escape();
        result?;
        self.expr.ctx.branch_if_open(continue_block)?;
        self.expr.ctx.begin_block(continue_block)?;
        self.compile_all(update)?;
        self.expr.ctx.branch(check)?;
        self.expr.ctx.begin_block(merge)
    }

    /// `foreach (T x in c) body` lowers to the counted loop
    /// `for (int i = 0; i < len(c); ++i) { T x = c[i]; body }` with the
    /// index hidden from the source scope.
    fn compile_foreach(
        &mut self,
        var: &str,
        collection: &Expr,
        body: &[Stmt],
        elem_ty: &Option<SymbolType>,
        span: Span,
    ) -> Result<()> {
        let Some(binding_ty) = elem_ty.clone() else {
            bail_codegen_at!(span, "loop variable of '{var}' was never resolved");
        };
        let collection_ty = ty_of(collection)?.clone();
        let SymbolType::Array { base, len: Some(len) } = &collection_ty else {
            bail_unsupported_at!(span, "iteration over a value of type {collection_ty}");
        };
        let element_ty = (**base).clone();
        let len = *len;

        let place = self.expr.compile_place(collection)?;
        let base = match place {
            Place::Pointer(pointer) => pointer,
            Place::Loaded(value) => {
                // Value collections spill to a local so elements stay addressable.
                let local = self.expr.ctx.declare_local(&collection_ty)?;
                self.expr.ctx.store(local.id, value.id)?;
                local
            }
            Place::Swizzle { .. } => bail_codegen_at!(span, "cannot iterate a swizzle"),
        };
        let Some((_, storage)) = self.expr.ctx.pointee_of(base.type_id) else {
            bail_codegen_at!(span, "collection has no addressable storage");
        };

        let index = self.expr.ctx.declare_local(&SymbolType::INT)?;
        let zero = self.expr.ctx.const_int(ScalarKind::Int, 0)?;
        self.expr.ctx.store(index.id, zero)?;
        let binding = self.expr.ctx.declare_local(&binding_ty)?;

        let check = self.expr.ctx.id();
        let body_block = self.expr.ctx.id();
        let continue_block = self.expr.ctx.id();
        let merge = self.expr.ctx.id();
        self.expr.ctx.branch(check)?;

        self.expr.ctx.begin_block(check)?;
        let current = self.expr.ctx.as_value(index)?;
        let int_type = self.expr.ctx.register_type(&SymbolType::INT)?;
        let limit = self.expr.ctx.const_int(ScalarKind::Int, len as i64)?;
        let (selector, _) = self.expr.ctx.binary_op(
            BinOp::Lt,
            current,
            &SymbolType::INT,
            Value::new(limit, int_type),
            &SymbolType::INT,
            span,
        )?;
        self.expr.ctx.loop_header(selector.id, body_block, continue_block, merge)?;

        self.expr.ctx.begin_block(body_block)?;
        self.expr.ctx.push_escape(continue_block, merge);
        let result = (|| -> Result<()> {
            let current = self.expr.ctx.as_value(index)?;
            let slot = self.expr.ctx.access_chain(&element_ty, storage, base.id, &[current.id])?;
            let element = self.expr.ctx.as_value(slot)?;
            let element = self.expr.ctx.convert(element, &element_ty, &binding_ty, false, span)?;
            self.expr.ctx.store(binding.id, element.id)?;
            self.expr.symbols.push();
            self.expr.symbols.insert_local(Symbol::local(
                var.to_string(),
                binding_ty.clone(),
                binding.id,
            ));
            let body_result = self.compile_all(body);
            self.expr.symbols.pop();
            body_result
        })();
        self.expr.ctx.pop_escape();
        result?;
        self.expr.ctx.branch_if_open(continue_block)?;

        self.expr.ctx.begin_block(continue_block)?;
        let current = self.expr.ctx.as_value(index)?;
        let one = self.expr.ctx.const_int(ScalarKind::Int, 1)?;
        let (next, _) = self.expr.ctx.binary_op(
            BinOp::Add,
            current,
            &SymbolType::INT,
            Value::new(one, int_type),
            &SymbolType::INT,
            span,
        )?;
        self.expr.ctx.store(index.id, next.id)?;
        self.expr.ctx.branch(check)?;

        self.expr.ctx.begin_block(merge)
    }

    fn compile_scoped(&mut self, body: &[Stmt]) -> Result<()> {
        self.expr.symbols.push();
        let result = self.compile_all(body);
        self.expr.symbols.pop();
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{AssignOp, ShaderClass};
    use crate::context::SpirvContext;
    use crate::diag::Diagnostic;
    use crate::intrinsics::Intrinsics;
    use crate::symbols::SymbolTable;
    use crate::types::FunctionType;
    use rspirv::spirv::Op;
    use std::collections::HashMap;
    use std::sync::Arc;

    fn try_lower(
        mut body: Vec<Stmt>,
        seed: impl Fn(&mut SymbolTable, &mut SpirvContext),
    ) -> (Option<rspirv::dr::Module>, Vec<Diagnostic>) {
        let intrinsics = Intrinsics::new();
        let mut ctx = SpirvContext::new(false);
        let signature = Arc::new(FunctionType::new(SymbolType::VOID, vec![]));
        ctx.begin_function(&signature, None).unwrap();

        let mut symbols = SymbolTable::new();
        symbols.push();
        seed(&mut symbols, &mut ctx);
        {
            let mut resolver = StmtResolver {
                expr: ExprResolver { symbols: &mut symbols, intrinsics: &intrinsics },
                return_ty: SymbolType::VOID,
                loop_depth: 0,
            };
            resolver.resolve_all(&mut body).unwrap();
        }
        let diagnostics = symbols.take_diagnostics();
        if !diagnostics.is_empty() {
            return (None, diagnostics);
        }

        let class = ShaderClass::new("Test");
        let imported = HashMap::new();
        {
            let mut compiler = StmtCompiler {
                expr: ExprCompiler {
                    symbols: &mut symbols,
                    intrinsics: &intrinsics,
                    ctx: &mut ctx,
                    class: &class,
                    imported_methods: &imported,
                },
                return_ty: SymbolType::VOID,
            };
            compiler.compile_all(&body).unwrap();
        }
        ctx.end_function(true).unwrap();
        (Some(ctx.into_module()), vec![])
    }

    fn lower(body: Vec<Stmt>) -> rspirv::dr::Module {
        let (module, diagnostics) = try_lower(body, |_, _| {});
        assert!(diagnostics.is_empty(), "unexpected diagnostics: {diagnostics:?}");
        module.unwrap()
    }

    fn count(module: &rspirv::dr::Module, op: Op) -> usize {
        module
            .functions
            .iter()
            .flat_map(|f| f.blocks.iter())
            .flat_map(|b| b.instructions.iter())
            .filter(|i| i.class.opcode == op)
            .count()
    }

    fn is_terminator(op: Op) -> bool {
        matches!(
            op,
            Op::Branch | Op::BranchConditional | Op::Return | Op::ReturnValue | Op::Unreachable
        )
    }

    fn assert_structured(module: &rspirv::dr::Module) {
        for function in &module.functions {
            for block in &function.blocks {
                let terminators = block
                    .instructions
                    .iter()
                    .filter(|i| is_terminator(i.class.opcode))
                    .count();
                assert_eq!(terminators, 1, "every block carries exactly one terminator");
                let last = block.instructions.last().unwrap();
                assert!(is_terminator(last.class.opcode), "terminator must close the block");
            }
        }
    }

    #[test]
    fn test_declare_and_compound_assign() {
        let module = lower(vec![
            Stmt::declare(TypeRef::named("var"), "x", Some(Expr::float(1.0))),
            Stmt::new(StmtKind::Assign {
                target: Expr::ident("x"),
                op: AssignOp::Mul,
                value: Expr::float(2.0),
            }),
        ]);
        assert_eq!(count(&module, Op::FMul), 1);
        // initializer store plus the compound write-back
        assert_eq!(count(&module, Op::Store), 2);
    }

    #[test]
    fn test_if_chain_opens_merges_in_reverse() {
        let module = lower(vec![
            Stmt::declare(TypeRef::named("float"), "x", Some(Expr::float(0.0))),
            Stmt::new(StmtKind::If {
                arms: vec![
                    (
                        Expr::binary(BinOp::Gt, Expr::ident("x"), Expr::float(1.0)),
                        vec![Stmt::assign(Expr::ident("x"), Expr::float(1.0))],
                    ),
                    (
                        Expr::binary(BinOp::Gt, Expr::ident("x"), Expr::float(0.5)),
                        vec![Stmt::assign(Expr::ident("x"), Expr::float(0.5))],
                    ),
                ],
                else_body: Some(vec![Stmt::assign(Expr::ident("x"), Expr::float(0.0))]),
            }),
        ]);
        assert_eq!(count(&module, Op::SelectionMerge), 2);
        assert_eq!(count(&module, Op::BranchConditional), 2);
        assert_structured(&module);
    }

    #[test]
    fn test_for_loop_emits_check_body_continue_merge() {
        let module = lower(vec![Stmt::new(StmtKind::For {
            init: vec![Stmt::declare(TypeRef::named("int"), "i", Some(Expr::int(0)))],
            cond: Some(Expr::binary(BinOp::Lt, Expr::ident("i"), Expr::int(4))),
            update: vec![Stmt::assign(
                Expr::ident("i"),
                Expr::binary(BinOp::Add, Expr::ident("i"), Expr::int(1)),
            )],
            body: vec![Stmt::new(StmtKind::If {
                arms: vec![(
                    Expr::binary(BinOp::Gt, Expr::ident("i"), Expr::int(2)),
                    vec![Stmt::new(StmtKind::Break)],
                )],
                else_body: None,
            })],
        })]);
        assert_eq!(count(&module, Op::LoopMerge), 1);
        assert_structured(&module);
    }

    #[test]
    fn test_while_loop_mirrors_for_shape() {
        let module = lower(vec![
            Stmt::declare(TypeRef::named("float"), "x", Some(Expr::float(4.0))),
            Stmt::new(StmtKind::While {
                cond: Expr::binary(BinOp::Gt, Expr::ident("x"), Expr::float(0.0)),
                body: vec![Stmt::new(StmtKind::Assign {
                    target: Expr::ident("x"),
                    op: AssignOp::Sub,
                    value: Expr::float(1.0),
                })],
            }),
        ]);
        assert_eq!(count(&module, Op::LoopMerge), 1);
        // empty continue block still closes with a back edge
        assert_structured(&module);
    }

    #[test]
    fn test_foreach_indexes_each_element() {
        let body = vec![
            Stmt::declare(TypeRef::named("float"), "sum", Some(Expr::float(0.0))),
            Stmt::new(StmtKind::Foreach {
                ty: TypeRef::named("var"),
                var: "value".into(),
                collection: Expr::ident("weights"),
                body: vec![Stmt::new(StmtKind::Assign {
                    target: Expr::ident("sum"),
                    op: AssignOp::Add,
                    value: Expr::ident("value"),
                })],
                elem_ty: None,
            }),
        ];
        let array = SymbolType::Array { base: Box::new(SymbolType::FLOAT), len: Some(4) };
        let (module, diagnostics) = try_lower(body, |symbols, ctx| {
            let local = ctx.declare_local(&array).unwrap();
            symbols.insert_local(Symbol::local("weights", array.clone(), local.id));
        });
        assert!(diagnostics.is_empty());
        let module = module.unwrap();
        assert_eq!(count(&module, Op::LoopMerge), 1);
        assert_eq!(count(&module, Op::AccessChain), 1);
        assert_structured(&module);
    }

    #[test]
    fn test_break_outside_loop_is_invalid_control_flow() {
        let (module, diagnostics) = try_lower(vec![Stmt::new(StmtKind::Break)], |_, _| {});
        assert!(module.is_none());
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].kind, DiagnosticKind::InvalidControlFlow);
    }

    #[test]
    fn test_narrowing_initializer_is_a_type_mismatch() {
        let (module, diagnostics) = try_lower(
            vec![Stmt::declare(TypeRef::named("int"), "x", Some(Expr::float(1.0)))],
            |_, _| {},
        );
        assert!(module.is_none());
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].kind, DiagnosticKind::TypeMismatch);
    }

    #[test]
    fn test_returning_a_value_from_void_is_rejected() {
        let (module, diagnostics) =
            try_lower(vec![Stmt::ret(Some(Expr::float(1.0)))], |_, _| {});
        assert!(module.is_none());
        assert_eq!(diagnostics[0].kind, DiagnosticKind::TypeMismatch);
    }

    #[test]
    fn test_statements_after_return_are_dropped() {
        let module = lower(vec![
            Stmt::declare(TypeRef::named("float"), "x", Some(Expr::float(1.0))),
            Stmt::ret(None),
            Stmt::assign(Expr::ident("x"), Expr::float(2.0)),
        ]);
        // only the initializer store survives
        assert_eq!(count(&module, Op::Store), 1);
        assert_structured(&module);
    }
}
