//! Expression resolution and lowering.
//!
//! [`ExprResolver`] runs over the tree first, filling every `Expr::ty` and
//! feeding problems to the diagnostic sink; failed nodes resolve to an
//! undefined placeholder so one mistake does not echo through its parents.
//! [`ExprCompiler`] then walks the same tree assuming the annotations are
//! complete and emits instructions through [`SpirvContext`].

use std::collections::HashMap;
use std::sync::Arc;

use rspirv::spirv::{StorageClass, Word};

use crate::ast::{BinOp, Expr, ExprKind, PostfixOp, ShaderClass, Span, UnaryOp, VarStorage};
use crate::builder::binary_op_types;
use crate::context::{storage_class, SpirvContext, Value};
use crate::diag::DiagnosticKind;
use crate::error::{CompilerError, Result};
use crate::intrinsics::{emit_call, Intrinsics};
use crate::overload::{conversion_score, select_overload, Selection, INCOMPATIBLE};
use crate::symbols::{MethodSource, SymbolKind, SymbolTable};
use crate::types::{promote, FunctionType, ScalarKind, SymbolType};
use crate::{bail_codegen_at, bail_unsupported_at};

/// Type of a resolved expression, or a codegen error for a node the
/// resolution pass never annotated.
pub(crate) fn ty_of(expr: &Expr) -> Result<&SymbolType> {
    match &expr.ty {
        Some(ty) => Ok(ty),
        None => Err(CompilerError::Codegen(
            "expression carries no resolved type".into(),
            Some(expr.span),
        )),
    }
}

/// Placeholder type for a node that already produced a diagnostic.
pub(crate) fn error_type() -> SymbolType {
    SymbolType::Undefined(String::new())
}

pub(crate) fn is_error(ty: &SymbolType) -> bool {
    matches!(ty, SymbolType::Undefined(_))
}

/// Whether `from` converts to `to` without an explicit cast.
pub(crate) fn implicitly_converts(from: &SymbolType, to: &SymbolType) -> bool {
    conversion_score(from, to) != INCOMPATIBLE
}

/// Whether a cast expression may turn `from` into `to`. Casts additionally
/// unlock narrowing, float to int and bool conversions, and may drop
/// trailing vector components, but never invent new ones.
pub(crate) fn explicitly_converts(from: &SymbolType, to: &SymbolType) -> bool {
    if from == to {
        return true;
    }
    match (from, to) {
        (SymbolType::Scalar(_), SymbolType::Scalar(_)) => true,
        (SymbolType::Scalar(_), SymbolType::Vector { .. }) => true,
        (SymbolType::Scalar(_), SymbolType::Matrix { .. }) => true,
        (SymbolType::Vector { size: m, .. }, SymbolType::Vector { size: n, .. }) => m >= n,
        _ => false,
    }
}

/// Decode a swizzle such as `xyz` or `rg` against a source with `size`
/// components. Mixed alphabets and out-of-range components are rejected.
pub(crate) fn parse_swizzle(name: &str, size: u32) -> Option<Vec<u32>> {
    if name.is_empty() || name.len() > 4 {
        return None;
    }
    let set = if name.chars().all(|c| matches!(c, 'x' | 'y' | 'z' | 'w')) {
        "xyzw"
    } else if name.chars().all(|c| matches!(c, 'r' | 'g' | 'b' | 'a')) {
        "rgba"
    } else {
        return None;
    };
    let mut indices = Vec::with_capacity(name.len());
    for c in name.chars() {
        let index = set.find(c)? as u32;
        if index >= size {
            return None;
        }
        indices.push(index);
    }
    Some(indices)
}

/// The swizzle indices of `base.member`, if the member access is a swizzle
/// at all. Relies on `base` being resolved.
fn swizzle_of(base: &Expr, member: &str) -> Option<Vec<u32>> {
    let size = match base.ty.as_ref()? {
        SymbolType::Vector { size, .. } => *size,
        SymbolType::Scalar(_) => 1,
        _ => return None,
    };
    parse_swizzle(member, size)
}

fn has_duplicates(indices: &[u32]) -> bool {
    indices.iter().enumerate().any(|(i, a)| indices[..i].contains(a))
}

/// Literals pick up the element kind of the surrounding expression instead
/// of forcing their own, so `half x = 1.0;` needs no cast. A negated
/// literal adopts the same way.
fn adopts_literally(kind: &ExprKind) -> bool {
    match kind {
        ExprKind::IntLit(_) | ExprKind::FloatLit(_) => true,
        ExprKind::Unary { op: UnaryOp::Neg, operand } => adopts_literally(&operand.kind),
        _ => false,
    }
}

/// Result type of a ternary whose arms resolved to `a` and `b`.
fn common_arm_type(a: &SymbolType, b: &SymbolType) -> Option<SymbolType> {
    if a == b {
        return Some(a.clone());
    }
    let elem = promote(a.element_type()?, b.element_type()?)?;
    match (a, b) {
        (SymbolType::Scalar(_), SymbolType::Scalar(_)) => Some(SymbolType::Scalar(elem)),
        (SymbolType::Vector { size: m, .. }, SymbolType::Vector { size: n, .. }) if m == n => {
            Some(SymbolType::vector(elem, *m))
        }
        (SymbolType::Vector { size, .. }, SymbolType::Scalar(_))
        | (SymbolType::Scalar(_), SymbolType::Vector { size, .. }) => {
            Some(SymbolType::vector(elem, *size))
        }
        _ => None,
    }
}

fn type_list(types: &[SymbolType]) -> String {
    types.iter().map(|ty| ty.to_string()).collect::<Vec<_>>().join(", ")
}

fn unary_symbol(op: UnaryOp) -> &'static str {
    match op {
        UnaryOp::Neg => "-",
        UnaryOp::Not => "!",
        UnaryOp::BitNot => "~",
        UnaryOp::PreInc => "++",
        UnaryOp::PreDec => "--",
    }
}

fn resolved_types(args: &[Expr]) -> Result<Vec<SymbolType>> {
    args.iter().map(|arg| ty_of(arg).cloned()).collect()
}

/// First pass over expressions: annotate every node with its type and
/// report what does not hold together. Never fails on bad input, only on
/// intrinsic table corruption.
pub(crate) struct ExprResolver<'a> {
    pub(crate) symbols: &'a mut SymbolTable,
    pub(crate) intrinsics: &'a Intrinsics,
}

impl ExprResolver<'_> {
    /// Resolve `expr` and store the result on the node. `expected` is the
    /// type the surrounding context would like to see; only literals and
    /// their negations actually adopt it.
    pub(crate) fn resolve(
        &mut self,
        expr: &mut Expr,
        expected: Option<&SymbolType>,
    ) -> Result<SymbolType> {
        let span = expr.span;
        let ty = self.resolve_kind(&mut expr.kind, span, expected)?;
        expr.ty = Some(ty.clone());
        Ok(ty)
    }

    fn resolve_kind(
        &mut self,
        kind: &mut ExprKind,
        span: Span,
        expected: Option<&SymbolType>,
    ) -> Result<SymbolType> {
        match kind {
            ExprKind::IntLit(_) => {
                let kind = match expected.and_then(|ty| ty.element_type()) {
                    Some(kind) if kind != ScalarKind::Bool => kind,
                    _ => ScalarKind::Int,
                };
                Ok(SymbolType::Scalar(kind))
            }
            ExprKind::FloatLit(_) => {
                let kind = match expected.and_then(|ty| ty.element_type()) {
                    Some(kind) if kind.is_floating() => kind,
                    _ => ScalarKind::Float,
                };
                Ok(SymbolType::Scalar(kind))
            }
            ExprKind::BoolLit(_) => Ok(SymbolType::BOOL),
            ExprKind::Ident(name) => match self.symbols.resolve(name) {
                Some(symbol) => Ok(symbol.ty.clone()),
                None => {
                    self.symbols.diagnostics.report(
                        DiagnosticKind::UnresolvedSymbol,
                        span,
                        format!("'{name}'"),
                    );
                    Ok(error_type())
                }
            },
            ExprKind::Unary { op, operand } => self.resolve_unary(*op, operand, span, expected),
            ExprKind::Postfix { op, operand } => {
                let symbol = match op {
                    PostfixOp::Inc => "++",
                    PostfixOp::Dec => "--",
                };
                let ty = self.resolve(operand, None)?;
                if is_error(&ty) {
                    return Ok(ty);
                }
                if !matches!(ty, SymbolType::Scalar(_) | SymbolType::Vector { .. })
                    || !ty.is_numeric_shaped()
                {
                    self.symbols.diagnostics.report(
                        DiagnosticKind::TypeMismatch,
                        span,
                        format!("operator '{symbol}' not applicable to {ty}"),
                    );
                    return Ok(error_type());
                }
                self.check_assignable_target(operand);
                Ok(ty)
            }
            ExprKind::Binary { op, lhs, rhs } => self.resolve_binary(*op, lhs, rhs, span, expected),
            ExprKind::Ternary { cond, then_expr, else_expr } => {
                self.resolve_ternary(cond, then_expr, else_expr, span, expected)
            }
            ExprKind::Member { base, member } => self.resolve_member(base, member, span),
            ExprKind::Index { base, index } => self.resolve_index(base, index, span),
            ExprKind::Call { callee, args } => self.resolve_call(callee, args, span),
            ExprKind::MethodCall { receiver, method, args } => {
                self.resolve_method_call(receiver, method, args, span)
            }
            ExprKind::Construct { ty, args } => {
                let target = self.symbols.resolve_type(ty);
                self.resolve_construct(&target, args, span)
            }
            ExprKind::Cast { ty, expr } => {
                let target = self.symbols.resolve_type(ty);
                self.resolve_cast(&target, expr, span)
            }
        }
    }

    fn resolve_unary(
        &mut self,
        op: UnaryOp,
        operand: &mut Expr,
        span: Span,
        expected: Option<&SymbolType>,
    ) -> Result<SymbolType> {
        let hint = match op {
            UnaryOp::Neg | UnaryOp::BitNot => expected,
            _ => None,
        };
        let ty = self.resolve(operand, hint)?;
        if is_error(&ty) {
            return Ok(ty);
        }
        let ok = match op {
            // Negation covers matrices, but only floating ones.
            UnaryOp::Neg => match &ty {
                SymbolType::Matrix { base, .. } => base.is_floating(),
                other => other.is_numeric_shaped(),
            },
            UnaryOp::Not => ty.element_type() == Some(ScalarKind::Bool),
            UnaryOp::BitNot => ty.element_type().map_or(false, |kind| kind.is_integer()),
            UnaryOp::PreInc | UnaryOp::PreDec => {
                matches!(ty, SymbolType::Scalar(_) | SymbolType::Vector { .. })
                    && ty.is_numeric_shaped()
            }
        };
        if !ok {
            self.symbols.diagnostics.report(
                DiagnosticKind::TypeMismatch,
                span,
                format!("operator '{}' not applicable to {ty}", unary_symbol(op)),
            );
            return Ok(error_type());
        }
        if matches!(op, UnaryOp::PreInc | UnaryOp::PreDec) {
            self.check_assignable_target(operand);
        }
        Ok(ty)
    }

    /// Resolve the two sides of a binary form, letting a literal side adopt
    /// the element kind of the concrete side.
    fn resolve_adopting(
        &mut self,
        first: &mut Expr,
        second: &mut Expr,
        expected: Option<&SymbolType>,
    ) -> Result<(SymbolType, SymbolType)> {
        if adopts_literally(&second.kind) && !adopts_literally(&first.kind) {
            let first_ty = self.resolve(first, expected)?;
            let hint = first_ty.element_type().map(SymbolType::Scalar);
            let second_ty = self.resolve(second, hint.as_ref().or(expected))?;
            Ok((first_ty, second_ty))
        } else if adopts_literally(&first.kind) && !adopts_literally(&second.kind) {
            let second_ty = self.resolve(second, expected)?;
            let hint = second_ty.element_type().map(SymbolType::Scalar);
            let first_ty = self.resolve(first, hint.as_ref().or(expected))?;
            Ok((first_ty, second_ty))
        } else {
            let first_ty = self.resolve(first, expected)?;
            let second_ty = self.resolve(second, expected)?;
            Ok((first_ty, second_ty))
        }
    }

    fn resolve_binary(
        &mut self,
        op: BinOp,
        lhs: &mut Expr,
        rhs: &mut Expr,
        span: Span,
        expected: Option<&SymbolType>,
    ) -> Result<SymbolType> {
        // The expected type describes the result; it only reaches the
        // operands when the operator preserves the element kind.
        let operand_expected = if op.is_comparison() || op.is_logical() { None } else { expected };
        let (lhs_ty, rhs_ty) = self.resolve_adopting(lhs, rhs, operand_expected)?;
        if is_error(&lhs_ty) || is_error(&rhs_ty) {
            return Ok(error_type());
        }
        match binary_op_types(op, &lhs_ty, &rhs_ty) {
            Ok((_, result)) => Ok(result),
            Err(message) => {
                self.symbols.diagnostics.report(DiagnosticKind::TypeMismatch, span, message);
                Ok(error_type())
            }
        }
    }

    fn resolve_ternary(
        &mut self,
        cond: &mut Expr,
        then_expr: &mut Expr,
        else_expr: &mut Expr,
        span: Span,
        expected: Option<&SymbolType>,
    ) -> Result<SymbolType> {
        let cond_ty = self.resolve(cond, Some(&SymbolType::BOOL))?;
        let by_component =
            matches!(cond_ty, SymbolType::Vector { base: ScalarKind::Bool, .. });
        if !is_error(&cond_ty) && cond_ty != SymbolType::BOOL && !by_component {
            self.symbols.diagnostics.report(
                DiagnosticKind::TypeMismatch,
                cond.span,
                format!("selector has type {cond_ty}, expected bool or a bool vector"),
            );
        }
        let (then_ty, else_ty) = self.resolve_adopting(then_expr, else_expr, expected)?;
        if is_error(&then_ty) || is_error(&else_ty) {
            return Ok(error_type());
        }
        match common_arm_type(&then_ty, &else_ty) {
            Some(ty) => {
                // Component-wise selection pairs every selector lane with
                // one arm lane.
                if let SymbolType::Vector { size, .. } = cond_ty {
                    if !matches!(&ty, SymbolType::Vector { size: n, .. } if *n == size) {
                        self.symbols.diagnostics.report(
                            DiagnosticKind::TypeMismatch,
                            span,
                            format!("selector {cond_ty} needs {size}-component arms, found {ty}"),
                        );
                        return Ok(error_type());
                    }
                }
                Ok(ty)
            }
            None => {
                self.symbols.diagnostics.report(
                    DiagnosticKind::TypeMismatch,
                    span,
                    format!("arms have incompatible types {then_ty} and {else_ty}"),
                );
                Ok(error_type())
            }
        }
    }

    fn resolve_member(&mut self, base: &mut Expr, member: &str, span: Span) -> Result<SymbolType> {
        let base_ty = self.resolve(base, None)?;
        if is_error(&base_ty) {
            return Ok(base_ty);
        }
        if let Some((_, field_ty)) = base_ty.field_index(member) {
            return Ok(field_ty);
        }
        let (elem, size) = match &base_ty {
            SymbolType::Scalar(kind) => (*kind, 1),
            SymbolType::Vector { base, size } => (*base, *size),
            other => {
                self.symbols.diagnostics.report(
                    DiagnosticKind::UnresolvedSymbol,
                    span,
                    format!("no member '{member}' on {other}"),
                );
                return Ok(error_type());
            }
        };
        match parse_swizzle(member, size) {
            Some(indices) if indices.len() == 1 => Ok(SymbolType::Scalar(elem)),
            Some(indices) => Ok(SymbolType::vector(elem, indices.len() as u32)),
            None => {
                self.symbols.diagnostics.report(
                    DiagnosticKind::UnresolvedSymbol,
                    span,
                    format!("invalid swizzle '{member}' on {base_ty}"),
                );
                Ok(error_type())
            }
        }
    }

    fn resolve_index(&mut self, base: &mut Expr, index: &mut Expr, span: Span) -> Result<SymbolType> {
        let base_ty = self.resolve(base, None)?;
        let index_ty = self.resolve(index, Some(&SymbolType::INT))?;
        if !is_error(&index_ty)
            && !matches!(index_ty, SymbolType::Scalar(kind) if kind.is_integer())
        {
            self.symbols.diagnostics.report(
                DiagnosticKind::TypeMismatch,
                index.span,
                format!("index has type {index_ty}, expected an integer"),
            );
        }
        if is_error(&base_ty) {
            return Ok(base_ty);
        }
        if let SymbolType::StructuredBuffer { base, .. } = &base_ty {
            return Ok((**base).clone());
        }
        match base_ty.indexed() {
            Some(elem) => Ok(elem),
            None => {
                self.symbols.diagnostics.report(
                    DiagnosticKind::TypeMismatch,
                    span,
                    format!("cannot index {base_ty}"),
                );
                Ok(error_type())
            }
        }
    }

    fn resolve_call(&mut self, callee: &str, args: &mut [Expr], span: Span) -> Result<SymbolType> {
        let mut arg_types = Vec::with_capacity(args.len());
        for arg in args.iter_mut() {
            arg_types.push(self.resolve(arg, None)?);
        }
        if arg_types.iter().any(is_error) {
            return Ok(error_type());
        }
        // Methods of the class shadow intrinsics of the same name.
        let candidates = self.symbols.method_candidates(callee);
        let signatures: Vec<Arc<FunctionType>> = if candidates.is_empty() {
            match self.intrinsics.global(callee)? {
                Some(overloads) => overloads.iter().map(|o| o.signature.clone()).collect(),
                None => {
                    self.symbols.diagnostics.report(
                        DiagnosticKind::UnresolvedSymbol,
                        span,
                        format!("'{callee}' is not a function"),
                    );
                    return Ok(error_type());
                }
            }
        } else {
            candidates.iter().map(|(signature, _)| signature.clone()).collect()
        };
        match self.select_named(callee, &signatures, &arg_types, span) {
            Some(index) => {
                self.check_out_args(&signatures[index], args);
                Ok((*signatures[index].return_type).clone())
            }
            None => Ok(error_type()),
        }
    }

    fn resolve_method_call(
        &mut self,
        receiver: &mut Expr,
        method: &str,
        args: &mut [Expr],
        span: Span,
    ) -> Result<SymbolType> {
        let receiver_ty = self.resolve(receiver, None)?;
        let mut arg_types = Vec::with_capacity(args.len());
        for arg in args.iter_mut() {
            arg_types.push(self.resolve(arg, None)?);
        }
        if is_error(&receiver_ty) || arg_types.iter().any(is_error) {
            return Ok(error_type());
        }
        let Some(overloads) = self.intrinsics.method(&receiver_ty, method)? else {
            self.symbols.diagnostics.report(
                DiagnosticKind::UnresolvedSymbol,
                span,
                format!("no method '{method}' on {receiver_ty}"),
            );
            return Ok(error_type());
        };
        let signatures: Vec<Arc<FunctionType>> =
            overloads.iter().map(|o| o.signature.clone()).collect();
        match self.select_named(method, &signatures, &arg_types, span) {
            Some(index) => {
                self.check_out_args(&signatures[index], args);
                Ok((*signatures[index].return_type).clone())
            }
            None => Ok(error_type()),
        }
    }

    fn resolve_construct(
        &mut self,
        target: &SymbolType,
        args: &mut [Expr],
        span: Span,
    ) -> Result<SymbolType> {
        if is_error(target) {
            for arg in args.iter_mut() {
                self.resolve(arg, None)?;
            }
            return Ok(target.clone());
        }
        let elem_hint = target.element_type().map(SymbolType::Scalar);
        let mut total = 0u32;
        let mut failed = false;
        for arg in args.iter_mut() {
            let arg_ty = self.resolve(arg, elem_hint.as_ref())?;
            match arg_ty {
                _ if is_error(&arg_ty) => failed = true,
                SymbolType::Scalar(kind) if kind != ScalarKind::Void => total += 1,
                SymbolType::Vector { size, .. } => total += size,
                other => {
                    self.symbols.diagnostics.report(
                        DiagnosticKind::TypeMismatch,
                        arg.span,
                        format!("cannot use {other} in a {target} constructor"),
                    );
                    failed = true;
                }
            }
        }
        if failed {
            return Ok(error_type());
        }
        let needed = match target {
            SymbolType::Scalar(_) => 1,
            SymbolType::Vector { size, .. } => *size,
            SymbolType::Matrix { rows, cols, .. } => rows * cols,
            other => {
                self.symbols.diagnostics.report(
                    DiagnosticKind::TypeMismatch,
                    span,
                    format!("cannot construct {other}"),
                );
                return Ok(error_type());
            }
        };
        // A single scalar splats across a vector target.
        let splat = matches!(target, SymbolType::Vector { .. }) && args.len() == 1 && total == 1;
        if total != needed && !splat {
            self.symbols.diagnostics.report(
                DiagnosticKind::TypeMismatch,
                span,
                format!("{target} constructor needs {needed} components, found {total}"),
            );
            return Ok(error_type());
        }
        Ok(target.clone())
    }

    fn resolve_cast(
        &mut self,
        target: &SymbolType,
        inner: &mut Expr,
        span: Span,
    ) -> Result<SymbolType> {
        let source = self.resolve(inner, Some(target))?;
        if is_error(target) || is_error(&source) {
            return Ok(error_type());
        }
        if !explicitly_converts(&source, target) {
            self.symbols.diagnostics.report(
                DiagnosticKind::TypeMismatch,
                span,
                format!("cannot cast {source} to {target}"),
            );
            return Ok(error_type());
        }
        Ok(target.clone())
    }

    fn select_named(
        &mut self,
        name: &str,
        signatures: &[Arc<FunctionType>],
        args: &[SymbolType],
        span: Span,
    ) -> Option<usize> {
        match select_overload(signatures.iter().map(|s| s.as_ref()), args) {
            Selection::Unique(index) => Some(index),
            Selection::Ambiguous(..) => {
                self.symbols.diagnostics.report(
                    DiagnosticKind::NoMatchingOverload,
                    span,
                    format!("call to '{name}' is ambiguous"),
                );
                None
            }
            Selection::NoMatch => {
                self.symbols.diagnostics.report(
                    DiagnosticKind::NoMatchingOverload,
                    span,
                    format!("no overload of '{name}' accepts ({})", type_list(args)),
                );
                None
            }
        }
    }

    fn check_out_args(&mut self, signature: &FunctionType, args: &[Expr]) {
        for (param, arg) in signature.params.iter().zip(args.iter()) {
            if param.modifier.copies_out() {
                self.check_assignable_target(arg);
            }
        }
    }

    /// Report a diagnostic when `target` cannot sit on the left of an
    /// assignment (or receive an `out` argument, or be stepped).
    pub(crate) fn check_assignable_target(&mut self, target: &Expr) {
        if let Some(problem) = self.assignability_problem(target) {
            self.symbols.diagnostics.report(DiagnosticKind::TypeMismatch, target.span, problem);
        }
    }

    fn assignability_problem(&self, target: &Expr) -> Option<String> {
        match &target.kind {
            ExprKind::Ident(name) => {
                // Unknown names were already reported during resolution.
                let symbol = self.symbols.resolve(name)?;
                match symbol.kind {
                    SymbolKind::Variable if symbol.storage == VarStorage::Uniform => {
                        Some(format!("cannot assign to uniform '{name}'"))
                    }
                    SymbolKind::Variable => None,
                    SymbolKind::Constant => Some(format!("cannot assign to constant '{name}'")),
                    _ => Some(format!("cannot assign to '{name}'")),
                }
            }
            ExprKind::Member { base, member } => {
                if let Some(indices) = swizzle_of(base, member) {
                    if has_duplicates(&indices) {
                        return Some(format!(
                            "cannot assign through swizzle '{member}' with repeated components"
                        ));
                    }
                }
                self.assignability_problem(base)
            }
            ExprKind::Index { base, .. } => {
                if matches!(
                    &base.ty,
                    Some(SymbolType::StructuredBuffer { write_allowed: false, .. })
                ) {
                    return Some("cannot write to a read-only buffer".into());
                }
                if let ExprKind::Member { base: inner, member } = &base.kind {
                    if swizzle_of(inner, member).map_or(false, |indices| indices.len() > 1) {
                        return Some("cannot assign through a swizzle".into());
                    }
                }
                self.assignability_problem(base)
            }
            _ => Some("expression is not assignable".into()),
        }
    }

    /// Report a type mismatch when `from` does not implicitly convert to
    /// `to`. Error placeholders pass silently.
    pub(crate) fn require_assignable(&mut self, from: &SymbolType, to: &SymbolType, span: Span) {
        if is_error(from) || is_error(to) {
            return;
        }
        if !implicitly_converts(from, to) {
            self.symbols.diagnostics.report(
                DiagnosticKind::TypeMismatch,
                span,
                format!("cannot convert {from} to {to}"),
            );
        }
    }
}

/// Where an lvalue lives after lowering.
#[derive(Debug, Clone)]
pub(crate) enum Place {
    /// A pointer that can be loaded and stored directly.
    Pointer(Value),
    /// A component selection over a vector pointer. Stores shuffle the new
    /// lanes into the loaded vector and write the whole vector back.
    Swizzle { pointer: Value, vector_ty: SymbolType, indices: Vec<u32> },
    /// A value with no backing storage. Readable only.
    Loaded(Value),
}

/// Second pass over expressions: lower an annotated tree to instructions.
/// Anything the resolver would have reported is a hard error here.
pub(crate) struct ExprCompiler<'a> {
    pub(crate) symbols: &'a mut SymbolTable,
    pub(crate) intrinsics: &'a Intrinsics,
    pub(crate) ctx: &'a mut SpirvContext,
    /// Source class, consulted for the bodies of defaulted arguments.
    pub(crate) class: &'a ShaderClass,
    /// Function ids of imported method declarations, one per overload in
    /// snapshot order.
    pub(crate) imported_methods: &'a HashMap<(String, String), Vec<Word>>,
}

impl ExprCompiler<'_> {
    pub(crate) fn compile(&mut self, expr: &Expr) -> Result<Value> {
        match &expr.kind {
            ExprKind::IntLit(value) => {
                let ty = ty_of(expr)?;
                let kind = ty.element_type().unwrap_or(ScalarKind::Int);
                let id = if kind.is_floating() {
                    self.ctx.const_float(kind, *value as f64)?
                } else {
                    self.ctx.const_int(kind, *value)?
                };
                let tid = self.ctx.register_type(ty)?;
                Ok(Value::new(id, tid))
            }
            ExprKind::FloatLit(value) => {
                let ty = ty_of(expr)?;
                let kind = ty.element_type().unwrap_or(ScalarKind::Float);
                let id = self.ctx.const_float(kind, *value)?;
                let tid = self.ctx.register_type(ty)?;
                Ok(Value::new(id, tid))
            }
            ExprKind::BoolLit(value) => {
                let id = self.ctx.const_bool(*value)?;
                let tid = self.ctx.register_type(&SymbolType::BOOL)?;
                Ok(Value::new(id, tid))
            }
            ExprKind::Ident(_) | ExprKind::Member { .. } | ExprKind::Index { .. } => {
                let place = self.compile_place(expr)?;
                self.load_place(&place)
            }
            ExprKind::Unary { op, operand } => match op {
                UnaryOp::PreInc | UnaryOp::PreDec => {
                    self.increment(operand, matches!(op, UnaryOp::PreDec), expr.span, true)
                }
                _ => {
                    let value = self.compile(operand)?;
                    self.ctx.unary_op(*op, value, ty_of(operand)?, expr.span)
                }
            },
            ExprKind::Postfix { op, operand } => {
                self.increment(operand, matches!(op, PostfixOp::Dec), expr.span, false)
            }
            ExprKind::Binary { op, lhs, rhs } => {
                let left = self.compile(lhs)?;
                let right = self.compile(rhs)?;
                let (value, _) =
                    self.ctx.binary_op(*op, left, ty_of(lhs)?, right, ty_of(rhs)?, expr.span)?;
                Ok(value)
            }
            ExprKind::Ternary { cond, then_expr, else_expr } => {
                let result_ty = ty_of(expr)?.clone();
                let selector = self.compile(cond)?;
                if matches!(ty_of(cond)?, SymbolType::Vector { .. }) {
                    // Component-wise selection evaluates both arms.
                    let then_value = self.compile(then_expr)?;
                    let then_value = self.ctx.convert(
                        then_value,
                        ty_of(then_expr)?,
                        &result_ty,
                        false,
                        then_expr.span,
                    )?;
                    let else_value = self.compile(else_expr)?;
                    let else_value = self.ctx.convert(
                        else_value,
                        ty_of(else_expr)?,
                        &result_ty,
                        false,
                        else_expr.span,
                    )?;
                    let rt = self.ctx.register_type(&result_ty)?;
                    let id = self.ctx.builder.select(
                        rt,
                        None,
                        selector.id,
                        then_value.id,
                        else_value.id,
                    )?;
                    Ok(Value::new(id, rt))
                } else {
                    self.compile_ternary_branches(selector, then_expr, else_expr, &result_ty)
                }
            }
            ExprKind::Call { callee, args } => {
                if self.symbols.method_candidates(callee).is_empty() {
                    self.compile_intrinsic_call(callee, args, expr.span)
                } else {
                    self.compile_user_call(callee, args, expr.span)
                }
            }
            ExprKind::MethodCall { receiver, method, args } => {
                self.compile_method_call(receiver, method, args, expr.span)
            }
            ExprKind::Construct { args, .. } => self.compile_construct(expr, args),
            ExprKind::Cast { expr: inner, .. } => {
                let target = ty_of(expr)?;
                let value = self.compile(inner)?;
                self.ctx.convert(value, ty_of(inner)?, target, true, expr.span)
            }
        }
    }

    /// Scalar selectors branch so only the chosen arm's side effects run;
    /// both arms store into a hoisted local that the merge block loads.
    fn compile_ternary_branches(
        &mut self,
        selector: Value,
        then_expr: &Expr,
        else_expr: &Expr,
        result_ty: &SymbolType,
    ) -> Result<Value> {
        let result = self.ctx.declare_local(result_ty)?;
        let true_block = self.ctx.id();
        let false_block = self.ctx.id();
        let merge_block = self.ctx.id();
        self.ctx.branch_conditional(selector.id, true_block, false_block, merge_block)?;
        self.ctx.begin_block(true_block)?;
        let then_value = self.compile(then_expr)?;
        let then_value =
            self.ctx.convert(then_value, ty_of(then_expr)?, result_ty, false, then_expr.span)?;
        self.ctx.store(result.id, then_value.id)?;
        self.ctx.branch_if_open(merge_block)?;
        self.ctx.begin_block(false_block)?;
        let else_value = self.compile(else_expr)?;
        let else_value =
            self.ctx.convert(else_value, ty_of(else_expr)?, result_ty, false, else_expr.span)?;
        self.ctx.store(result.id, else_value.id)?;
        self.ctx.branch_if_open(merge_block)?;
        self.ctx.begin_block(merge_block)?;
        self.ctx.as_value(result)
    }

    /// Lower `expr` to a place. Non-lvalue expressions land in
    /// [`Place::Loaded`] so read paths never special-case them.
    pub(crate) fn compile_place(&mut self, expr: &Expr) -> Result<Place> {
        match &expr.kind {
            ExprKind::Ident(name) => self.symbol_place(name, expr.span),
            ExprKind::Member { base, member } => {
                let base_ty = ty_of(base)?.clone();
                let result_ty = ty_of(expr)?.clone();
                let place = self.compile_place(base)?;
                self.member_place(place, &base_ty, member, expr.span, &result_ty)
            }
            ExprKind::Index { base, index } => {
                let base_ty = ty_of(base)?.clone();
                let elem_ty = ty_of(expr)?.clone();
                let place = self.compile_place(base)?;
                let index_value = self.compile(index)?;
                self.index_place(place, &base_ty, index_value, &elem_ty, expr.span)
            }
            _ => Ok(Place::Loaded(self.compile(expr)?)),
        }
    }

    pub(crate) fn load_place(&mut self, place: &Place) -> Result<Value> {
        match place {
            Place::Pointer(pointer) => self.ctx.as_value(*pointer),
            Place::Loaded(value) => Ok(*value),
            Place::Swizzle { pointer, vector_ty, indices } => {
                let (value, _) = self.ctx.swizzle_load(*pointer, vector_ty, indices)?;
                Ok(value)
            }
        }
    }

    pub(crate) fn store_place(&mut self, place: &Place, value: Word, span: Span) -> Result<()> {
        match place {
            Place::Pointer(pointer) => self.ctx.store(pointer.id, value),
            Place::Swizzle { pointer, vector_ty, indices } => {
                self.ctx.swizzle_store(*pointer, vector_ty, indices, value)
            }
            Place::Loaded(_) => bail_codegen_at!(span, "expression is not assignable"),
        }
    }

    fn symbol_place(&mut self, name: &str, span: Span) -> Result<Place> {
        let Some(symbol) = self.symbols.resolve(name) else {
            bail_codegen_at!(span, "unresolved identifier '{name}'");
        };
        let ty = symbol.ty.clone();
        let ir_ref = symbol.ir_ref;
        let is_value = symbol.is_value;
        let field_index = symbol.field_index;
        let storage = storage_class(symbol.pointer_storage);
        if ir_ref == 0 {
            bail_codegen_at!(span, "'{name}' has no storage binding");
        }
        if let Some(index) = field_index {
            let member = self.ctx.const_int(ScalarKind::Int, i64::from(index))?;
            let pointer = self.ctx.access_chain(&ty, storage, ir_ref, &[member])?;
            return Ok(Place::Pointer(pointer));
        }
        if is_value {
            let tid = self.ctx.register_type(&ty)?;
            return Ok(Place::Loaded(Value::new(ir_ref, tid)));
        }
        let tid = self.ctx.register_type(&ty)?;
        let ptr_ty = self.ctx.type_pointer_to(storage, tid);
        Ok(Place::Pointer(Value::new(ir_ref, ptr_ty)))
    }

    fn member_place(
        &mut self,
        base: Place,
        base_ty: &SymbolType,
        member: &str,
        span: Span,
        result_ty: &SymbolType,
    ) -> Result<Place> {
        if let Some((index, field_ty)) = base_ty.field_index(member) {
            return match base {
                Place::Pointer(pointer) => {
                    let storage = self.storage_of_ptr(pointer, span)?;
                    let member_id = self.ctx.const_int(ScalarKind::Int, i64::from(index))?;
                    let chained =
                        self.ctx.access_chain(&field_ty, storage, pointer.id, &[member_id])?;
                    Ok(Place::Pointer(chained))
                }
                Place::Loaded(value) => {
                    let extracted = self.ctx.composite_extract(&field_ty, value.id, &[index])?;
                    Ok(Place::Loaded(extracted))
                }
                Place::Swizzle { .. } => {
                    bail_codegen_at!(span, "no member '{member}' on a swizzle")
                }
            };
        }
        let size = match base_ty {
            SymbolType::Vector { size, .. } => *size,
            SymbolType::Scalar(_) => 1,
            other => bail_codegen_at!(span, "type {other} has no member '{member}'"),
        };
        let Some(indices) = parse_swizzle(member, size) else {
            bail_codegen_at!(span, "invalid swizzle '{member}' on {base_ty}");
        };
        match base {
            Place::Swizzle { pointer, vector_ty, indices: outer } => {
                // Compose with the outer selection instead of chaining.
                let composed: Vec<u32> =
                    indices.iter().map(|&i| outer[i as usize]).collect();
                Ok(Place::Swizzle { pointer, vector_ty, indices: composed })
            }
            Place::Pointer(pointer) => match (base_ty, indices.as_slice()) {
                (SymbolType::Scalar(_), [_]) => Ok(Place::Pointer(pointer)),
                (SymbolType::Scalar(_), _) => Ok(Place::Swizzle {
                    pointer,
                    vector_ty: base_ty.clone(),
                    indices,
                }),
                (_, [single]) => {
                    let storage = self.storage_of_ptr(pointer, span)?;
                    let component = self.ctx.const_int(ScalarKind::Int, i64::from(*single))?;
                    let chained =
                        self.ctx.access_chain(result_ty, storage, pointer.id, &[component])?;
                    Ok(Place::Pointer(chained))
                }
                _ => Ok(Place::Swizzle { pointer, vector_ty: base_ty.clone(), indices }),
            },
            Place::Loaded(value) => {
                let (loaded, _) = self.ctx.swizzle_load(value, base_ty, &indices)?;
                Ok(Place::Loaded(loaded))
            }
        }
    }

    fn index_place(
        &mut self,
        base: Place,
        base_ty: &SymbolType,
        index: Value,
        elem_ty: &SymbolType,
        span: Span,
    ) -> Result<Place> {
        // A swizzle cannot be chained into; materialize it first.
        let base = match base {
            Place::Swizzle { .. } => Place::Loaded(self.load_place(&base)?),
            other => other,
        };
        if matches!(base_ty, SymbolType::StructuredBuffer { .. }) {
            let Place::Pointer(pointer) = base else {
                bail_codegen_at!(span, "buffer access requires a variable");
            };
            let storage = self.storage_of_ptr(pointer, span)?;
            let zero = self.ctx.const_int(ScalarKind::Int, 0)?;
            let chained =
                self.ctx.access_chain(elem_ty, storage, pointer.id, &[zero, index.id])?;
            return Ok(Place::Pointer(chained));
        }
        match base {
            Place::Pointer(pointer) => {
                let storage = self.storage_of_ptr(pointer, span)?;
                let chained = self.ctx.access_chain(elem_ty, storage, pointer.id, &[index.id])?;
                Ok(Place::Pointer(chained))
            }
            Place::Loaded(value) => {
                // Spill so the element can be addressed dynamically.
                let local = self.ctx.declare_local(base_ty)?;
                self.ctx.store(local.id, value.id)?;
                let chained = self.ctx.access_chain(
                    elem_ty,
                    StorageClass::Function,
                    local.id,
                    &[index.id],
                )?;
                Ok(Place::Pointer(chained))
            }
            Place::Swizzle { .. } => bail_codegen_at!(span, "cannot index through a swizzle"),
        }
    }

    fn storage_of_ptr(&self, pointer: Value, span: Span) -> Result<StorageClass> {
        match self.ctx.pointee_of(pointer.type_id) {
            Some((_, storage)) => Ok(storage),
            None => bail_codegen_at!(span, "accessor base is not a pointer"),
        }
    }

    fn increment(
        &mut self,
        target: &Expr,
        negative: bool,
        span: Span,
        want_new: bool,
    ) -> Result<Value> {
        let ty = ty_of(target)?.clone();
        let place = self.compile_place(target)?;
        let current = self.load_place(&place)?;
        let Some(kind) = ty.element_type() else {
            bail_codegen_at!(span, "cannot step a value of type {ty}");
        };
        let one_ty = SymbolType::Scalar(kind);
        let one = if kind.is_floating() {
            self.ctx.const_float(kind, 1.0)?
        } else {
            self.ctx.const_int(kind, 1)?
        };
        let one_tid = self.ctx.register_type(&one_ty)?;
        let op = if negative { BinOp::Sub } else { BinOp::Add };
        let (updated, _) =
            self.ctx.binary_op(op, current, &ty, Value::new(one, one_tid), &one_ty, span)?;
        self.store_place(&place, updated.id, span)?;
        Ok(if want_new { updated } else { current })
    }

    /// Call a method of the class or of an imported module. Arguments are
    /// spilled into locals so parameters are uniformly pointers; `out` and
    /// `inout` arguments copy back after the call.
    fn compile_user_call(&mut self, callee: &str, args: &[Expr], span: Span) -> Result<Value> {
        let candidates = self.symbols.method_candidates(callee);
        let arg_types = resolved_types(args)?;
        let Selection::Unique(index) =
            select_overload(candidates.iter().map(|(s, _)| s.as_ref()), &arg_types)
        else {
            bail_codegen_at!(span, "call to '{callee}' did not resolve to a single overload");
        };
        let (signature, source) = &candidates[index];
        let signature = signature.clone();
        let function_id = match source {
            MethodSource::Own(own_index) => {
                match self.symbols.own_method(callee, *own_index) {
                    Some(entry) if entry.ir_ref != 0 => entry.ir_ref,
                    _ => bail_codegen_at!(span, "method '{callee}' has no generated body"),
                }
            }
            MethodSource::Imported(module) => {
                let ids = self.imported_methods.get(&(module.clone(), callee.to_string()));
                match ids.and_then(|ids| ids.get(index)) {
                    Some(&id) => id,
                    None => bail_codegen_at!(span, "imported method '{callee}' was not declared"),
                }
            }
        };
        // Defaults come from the declaration, so they only exist for own
        // methods.
        let declaration = match source {
            MethodSource::Own(own_index) => {
                let class = self.class;
                class.methods().filter(|m| m.name == callee).nth(*own_index)
            }
            MethodSource::Imported(_) => None,
        };
        let mut locals = Vec::with_capacity(signature.params.len());
        let mut writebacks: Vec<(Place, Value)> = Vec::new();
        for (i, param) in signature.params.iter().enumerate() {
            let local = self.ctx.declare_local(&param.ty)?;
            match args.get(i) {
                Some(arg) if param.modifier.copies_out() => {
                    let place = self.compile_place(arg)?;
                    if param.modifier.copies_in() {
                        let seed = self.load_place(&place)?;
                        self.ctx.store(local.id, seed.id)?;
                    }
                    writebacks.push((place, local));
                }
                Some(arg) => {
                    let value = self.compile(arg)?;
                    let value =
                        self.ctx.convert(value, ty_of(arg)?, &param.ty, false, arg.span)?;
                    self.ctx.store(local.id, value.id)?;
                }
                None => {
                    let default = declaration
                        .and_then(|f| f.params.get(i))
                        .and_then(|p| p.default.as_ref());
                    let Some(default) = default else {
                        if matches!(source, MethodSource::Imported(_)) {
                            bail_unsupported_at!(
                                span,
                                "default arguments of imported methods"
                            );
                        }
                        bail_codegen_at!(span, "call to '{callee}' is missing an argument");
                    };
                    let value = self.compile(default)?;
                    let value = self
                        .ctx
                        .convert(value, ty_of(default)?, &param.ty, false, default.span)?;
                    self.ctx.store(local.id, value.id)?;
                }
            }
            locals.push(local.id);
        }
        let result = self.ctx.call_function(&signature.return_type, function_id, &locals)?;
        for (place, local) in writebacks {
            let value = self.ctx.as_value(local)?;
            self.store_place(&place, value.id, span)?;
        }
        Ok(result)
    }

    fn compile_intrinsic_call(&mut self, callee: &str, args: &[Expr], span: Span) -> Result<Value> {
        let Some(overloads) = self.intrinsics.global(callee)? else {
            bail_codegen_at!(span, "unknown function '{callee}'");
        };
        let arg_types = resolved_types(args)?;
        let Selection::Unique(index) =
            select_overload(overloads.iter().map(|o| o.signature.as_ref()), &arg_types)
        else {
            bail_codegen_at!(span, "call to '{callee}' did not resolve to a single overload");
        };
        let overload = &overloads[index];
        let values = self.bind_intrinsic_args(&overload.signature, args)?;
        emit_call(self.ctx, overload, None, &values, span)
    }

    fn compile_method_call(
        &mut self,
        receiver: &Expr,
        method: &str,
        args: &[Expr],
        span: Span,
    ) -> Result<Value> {
        let receiver_ty = ty_of(receiver)?.clone();
        // Element access chains need the buffer variable itself, not a
        // loaded copy of the block.
        let object = if matches!(receiver_ty, SymbolType::StructuredBuffer { .. }) {
            match self.compile_place(receiver)? {
                Place::Pointer(pointer) => pointer,
                _ => bail_codegen_at!(span, "buffer access requires a variable"),
            }
        } else {
            self.compile(receiver)?
        };
        let Some(overloads) = self.intrinsics.method(&receiver_ty, method)? else {
            bail_codegen_at!(span, "no method '{method}' on {receiver_ty}");
        };
        let arg_types = resolved_types(args)?;
        let Selection::Unique(index) =
            select_overload(overloads.iter().map(|o| o.signature.as_ref()), &arg_types)
        else {
            bail_codegen_at!(span, "call to '{method}' did not resolve to a single overload");
        };
        let overload = &overloads[index];
        let values = self.bind_intrinsic_args(&overload.signature, args)?;
        emit_call(self.ctx, overload, Some(object), &values, span)
    }

    /// Intrinsics take values, except `out`/`inout` parameters which receive
    /// the argument's own pointer.
    fn bind_intrinsic_args(
        &mut self,
        signature: &FunctionType,
        args: &[Expr],
    ) -> Result<Vec<Value>> {
        let mut values = Vec::with_capacity(args.len());
        for (arg, param) in args.iter().zip(&signature.params) {
            if param.modifier.copies_out() {
                let place = self.compile_place(arg)?;
                let Place::Pointer(pointer) = place else {
                    bail_codegen_at!(arg.span, "argument must be addressable");
                };
                values.push(pointer);
            } else {
                let value = self.compile(arg)?;
                values.push(self.ctx.convert(value, ty_of(arg)?, &param.ty, false, arg.span)?);
            }
        }
        Ok(values)
    }

    fn compile_construct(&mut self, expr: &Expr, args: &[Expr]) -> Result<Value> {
        let target = ty_of(expr)?.clone();
        match &target {
            SymbolType::Scalar(_) => {
                let value = self.compile(&args[0])?;
                self.ctx.convert(value, ty_of(&args[0])?, &target, true, expr.span)
            }
            SymbolType::Vector { base, size } => {
                if args.len() == 1 && matches!(ty_of(&args[0])?, SymbolType::Scalar(_)) {
                    let elem = SymbolType::Scalar(*base);
                    let value = self.compile(&args[0])?;
                    let value =
                        self.ctx.convert(value, ty_of(&args[0])?, &elem, true, args[0].span)?;
                    return self.ctx.splat(value.id, &target, *size);
                }
                let parts = self.component_stream(args, *base)?;
                self.ctx.composite_construct(&target, &parts)
            }
            SymbolType::Matrix { base, rows, cols } => {
                // The argument stream is row-major; columns gather strided
                // components.
                let parts = self.component_stream(args, *base)?;
                if parts.len() as u32 != rows * cols {
                    bail_codegen_at!(expr.span, "matrix constructor arity mismatch");
                }
                let column_ty = SymbolType::vector(*base, *rows);
                let mut columns = Vec::with_capacity(*cols as usize);
                for c in 0..*cols {
                    let lanes: Vec<Word> = (0..*rows)
                        .map(|r| parts[(r * cols + c) as usize])
                        .collect();
                    columns.push(self.ctx.composite_construct(&column_ty, &lanes)?.id);
                }
                self.ctx.composite_construct(&target, &columns)
            }
            other => bail_codegen_at!(expr.span, "cannot construct {other}"),
        }
    }

    /// Flatten constructor arguments into scalar components of `base` kind,
    /// converting each argument as a whole first.
    fn component_stream(&mut self, args: &[Expr], base: ScalarKind) -> Result<Vec<Word>> {
        let elem = SymbolType::Scalar(base);
        let mut parts = Vec::new();
        for arg in args {
            let arg_ty = ty_of(arg)?.clone();
            let value = self.compile(arg)?;
            match &arg_ty {
                SymbolType::Scalar(_) => {
                    let converted = self.ctx.convert(value, &arg_ty, &elem, true, arg.span)?;
                    parts.push(converted.id);
                }
                SymbolType::Vector { size, .. } => {
                    let as_base = arg_ty.with_element_type(base);
                    let converted = self.ctx.convert(value, &arg_ty, &as_base, true, arg.span)?;
                    for i in 0..*size {
                        parts.push(self.ctx.composite_extract(&elem, converted.id, &[i])?.id);
                    }
                }
                other => bail_codegen_at!(arg.span, "cannot use {other} in a constructor"),
            }
        }
        Ok(parts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::TypeRef;
    use crate::diag::Diagnostic;
    use crate::symbols::Symbol;
    use rspirv::spirv::Op;

    fn test_table() -> SymbolTable {
        let mut symbols = SymbolTable::new();
        symbols.push();
        symbols.insert_local(Symbol::local("v", SymbolType::vector(ScalarKind::Float, 3), 0));
        symbols.insert_local(Symbol::local("d", SymbolType::DOUBLE, 0));
        symbols.insert_local(Symbol::local(
            "m",
            SymbolType::matrix(ScalarKind::Float, 3, 2),
            0,
        ));
        symbols
    }

    fn resolve_expr(expr: &mut Expr) -> (SymbolType, Vec<Diagnostic>) {
        let mut symbols = test_table();
        let intrinsics = Intrinsics::new();
        let ty = ExprResolver { symbols: &mut symbols, intrinsics: &intrinsics }
            .resolve(expr, None)
            .unwrap();
        (ty, symbols.take_diagnostics())
    }

    fn count_ops(module: &rspirv::dr::Module, op: Op) -> usize {
        module
            .functions
            .iter()
            .flat_map(|f| &f.blocks)
            .flat_map(|b| &b.instructions)
            .filter(|inst| inst.class.opcode == op)
            .count()
    }

    #[test]
    fn test_float_literal_adopts_double_operand() {
        let mut expr = Expr::binary(BinOp::Mul, Expr::float(2.0), Expr::ident("d"));
        let (ty, diags) = resolve_expr(&mut expr);
        assert!(diags.is_empty(), "{diags:?}");
        assert_eq!(ty, SymbolType::DOUBLE);
        let ExprKind::Binary { lhs, .. } = &expr.kind else { panic!() };
        assert_eq!(lhs.ty, Some(SymbolType::Scalar(ScalarKind::Double)));
    }

    #[test]
    fn test_unknown_identifier_reports_once() {
        let mut expr = Expr::binary(BinOp::Add, Expr::ident("missing"), Expr::int(1));
        let (ty, diags) = resolve_expr(&mut expr);
        assert!(is_error(&ty));
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].kind, DiagnosticKind::UnresolvedSymbol);
    }

    #[test]
    fn test_swizzle_selects_and_rejects() {
        let mut good = Expr::member(Expr::ident("v"), "xz");
        let (ty, diags) = resolve_expr(&mut good);
        assert!(diags.is_empty());
        assert_eq!(ty, SymbolType::vector(ScalarKind::Float, 2));

        let mut bad = Expr::member(Expr::ident("v"), "xq");
        let (ty, diags) = resolve_expr(&mut bad);
        assert!(is_error(&ty));
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].kind, DiagnosticKind::UnresolvedSymbol);

        let mut wide = Expr::member(Expr::ident("v"), "xyzw");
        let (ty, _) = resolve_expr(&mut wide);
        assert!(is_error(&ty), "w is out of range for a float3");
    }

    #[test]
    fn test_intrinsic_call_resolves_vector_overload() {
        let mut expr = Expr::call("sqrt", vec![Expr::ident("v")]);
        let (ty, diags) = resolve_expr(&mut expr);
        assert!(diags.is_empty(), "{diags:?}");
        assert_eq!(ty, SymbolType::vector(ScalarKind::Float, 3));
    }

    #[test]
    fn test_intrinsic_call_without_overload_reports() {
        let mut expr = Expr::call("sqrt", vec![Expr::bool_lit(true)]);
        let (ty, diags) = resolve_expr(&mut expr);
        assert!(is_error(&ty));
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].kind, DiagnosticKind::NoMatchingOverload);
    }

    #[test]
    fn test_ternary_promotes_arms() {
        let mut expr = Expr::ternary(Expr::bool_lit(true), Expr::int(1), Expr::float(0.5));
        let (ty, diags) = resolve_expr(&mut expr);
        assert!(diags.is_empty(), "{diags:?}");
        assert_eq!(ty, SymbolType::FLOAT);
    }

    #[test]
    fn test_cast_truncates_but_never_widens_shape() {
        let mut shrink = Expr::cast(TypeRef::named("float2"), Expr::ident("v"));
        let (ty, diags) = resolve_expr(&mut shrink);
        assert!(diags.is_empty(), "{diags:?}");
        assert_eq!(ty, SymbolType::vector(ScalarKind::Float, 2));

        let mut grow = Expr::cast(TypeRef::named("float4"), Expr::ident("v"));
        let (ty, diags) = resolve_expr(&mut grow);
        assert!(is_error(&ty));
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].kind, DiagnosticKind::TypeMismatch);
    }

    #[test]
    fn test_indexing_a_matrix_yields_a_column() {
        let mut expr = Expr::index(Expr::ident("m"), Expr::int(1));
        let (ty, diags) = resolve_expr(&mut expr);
        assert!(diags.is_empty(), "{diags:?}");
        assert_eq!(ty, SymbolType::vector(ScalarKind::Float, 3));
    }

    #[test]
    fn test_index_requires_an_integer() {
        let mut expr = Expr::index(Expr::ident("v"), Expr::float(1.5));
        let (_, diags) = resolve_expr(&mut expr);
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].kind, DiagnosticKind::TypeMismatch);
    }

    #[test]
    fn test_repeated_swizzle_is_not_assignable() {
        let mut expr = Expr::unary(UnaryOp::PreInc, Expr::member(Expr::ident("v"), "xx"));
        let (_, diags) = resolve_expr(&mut expr);
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].kind, DiagnosticKind::TypeMismatch);
    }

    #[test]
    fn test_constructor_counts_components() {
        let mut good = Expr::construct(
            TypeRef::named("float3"),
            vec![Expr::member(Expr::ident("v"), "xy"), Expr::float(1.0)],
        );
        let (ty, diags) = resolve_expr(&mut good);
        assert!(diags.is_empty(), "{diags:?}");
        assert_eq!(ty, SymbolType::vector(ScalarKind::Float, 3));

        let mut bad = Expr::construct(
            TypeRef::named("float3"),
            vec![
                Expr::member(Expr::ident("v"), "xy"),
                Expr::member(Expr::ident("v"), "xy"),
            ],
        );
        let (ty, diags) = resolve_expr(&mut bad);
        assert!(is_error(&ty));
        assert_eq!(diags.len(), 1);
    }

    // Compile-side checks run a real context and count the instructions
    // that land in the function.

    fn compile_resolved(build: impl Fn() -> Expr) -> rspirv::dr::Module {
        let mut symbols = SymbolTable::new();
        let intrinsics = Intrinsics::new();
        let mut ctx = SpirvContext::new(false);
        let void_sig = Arc::new(FunctionType::new(SymbolType::VOID, vec![]));
        ctx.begin_function(&void_sig, None).unwrap();
        let vec3 = SymbolType::vector(ScalarKind::Float, 3);
        let local = ctx.declare_local(&vec3).unwrap();
        symbols.push();
        symbols.insert_local(Symbol::local("v", vec3, local.id));

        let mut expr = build();
        ExprResolver { symbols: &mut symbols, intrinsics: &intrinsics }
            .resolve(&mut expr, None)
            .unwrap();
        let class = ShaderClass::new("Test");
        let imported = HashMap::new();
        ExprCompiler {
            symbols: &mut symbols,
            intrinsics: &intrinsics,
            ctx: &mut ctx,
            class: &class,
            imported_methods: &imported,
        }
        .compile(&expr)
        .unwrap();
        ctx.end_function(true).unwrap();
        ctx.into_module()
    }

    #[test]
    fn test_swizzle_read_shuffles_once() {
        let module = compile_resolved(|| Expr::member(Expr::ident("v"), "zyx"));
        assert_eq!(count_ops(&module, Op::VectorShuffle), 1);
        assert_eq!(count_ops(&module, Op::Load), 1);
    }

    #[test]
    fn test_matrix_constructor_gathers_columns() {
        let module = compile_resolved(|| {
            Expr::construct(
                TypeRef::named("float2x2"),
                vec![Expr::float(1.0), Expr::float(2.0), Expr::float(3.0), Expr::float(4.0)],
            )
        });
        // Two columns plus the matrix itself.
        assert_eq!(count_ops(&module, Op::CompositeConstruct), 3);
    }

    #[test]
    fn test_scalar_ternary_branches_its_arms() {
        let module = compile_resolved(|| {
            Expr::ternary(
                Expr::bool_lit(true),
                Expr::member(Expr::ident("v"), "x"),
                Expr::float(0.0),
            )
        });
        assert_eq!(count_ops(&module, Op::Select), 0);
        assert_eq!(count_ops(&module, Op::SelectionMerge), 1);
        assert_eq!(count_ops(&module, Op::BranchConditional), 1);
        // One store per arm into the hoisted result local.
        assert_eq!(count_ops(&module, Op::Store), 2);
    }

    #[test]
    fn test_vector_ternary_lowers_to_select() {
        let module = compile_resolved(|| {
            Expr::ternary(
                Expr::binary(BinOp::Lt, Expr::ident("v"), Expr::ident("v")),
                Expr::ident("v"),
                Expr::ident("v"),
            )
        });
        assert_eq!(count_ops(&module, Op::Select), 1);
        assert_eq!(count_ops(&module, Op::BranchConditional), 0);
    }

    #[test]
    fn test_shrinking_cast_shuffles_components() {
        let module =
            compile_resolved(|| Expr::cast(TypeRef::named("float2"), Expr::ident("v")));
        assert_eq!(count_ops(&module, Op::VectorShuffle), 1);
    }
}
