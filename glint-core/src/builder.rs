//! Function-level IR construction: blocks, locals, loads, conversions and
//! operator lowering. Continues `SpirvContext` from the context module.
//!
//! Every function body is built as a variables block followed by code
//! blocks. Locals always hoist into the variables block, which stays open
//! until `end_function` terminates it with a branch to the first code block.
//! A block ends in exactly one terminator; all branch helpers drop the
//! current-block marker so `block_open` reports whether a fallthrough branch
//! is still needed.

use std::sync::Arc;

use rspirv::spirv::{self, LoopControl, SelectionControl, StorageClass, Word};

use crate::ast::{BinOp, Span, UnaryOp};
use crate::context::{SpirvContext, Value};
use crate::error::Result;
use crate::types::{promote, FunctionType, ScalarKind, SymbolType};
use crate::{bail_codegen, bail_codegen_at};

impl SpirvContext {
    // Functions

    /// Begin a function whose parameters follow the pointer-passing call
    /// protocol. Returns the function id and one pointer per parameter.
    /// A pre-reserved `id` lets call sites refer to the function before its
    /// body is built.
    pub fn begin_function(
        &mut self,
        signature: &Arc<FunctionType>,
        id: Option<Word>,
    ) -> Result<(Word, Vec<Value>)> {
        let return_type = self.register_type(&signature.return_type)?;
        let fn_type = self.register_type(&SymbolType::Function(signature.clone()))?;
        let func_id = self.builder.begin_function(
            return_type,
            id,
            spirv::FunctionControl::NONE,
            fn_type,
        )?;

        let mut params = Vec::with_capacity(signature.params.len());
        for param in &signature.params {
            let pointee = self.register_type(&param.ty)?;
            let ptr_type = self.type_pointer_to(StorageClass::Function, pointee);
            let id = self.builder.function_parameter(ptr_type)?;
            params.push(Value::new(id, ptr_type));
        }

        // Two blocks: one for hoisted variables, one for code. The variables
        // block stays unterminated until end_function.
        let vars_block = self.builder.id();
        let code_block = self.builder.id();
        self.variables_block = Some(vars_block);
        self.first_code_block = Some(code_block);
        self.builder.begin_block(Some(vars_block))?;
        self.builder.select_block(None)?;
        self.builder.begin_block(Some(code_block))?;
        self.current_block = Some(code_block);

        Ok((func_id, params))
    }

    /// Close the current function. An open tail block is terminated with a
    /// return for void functions and marked unreachable otherwise (a valid
    /// non-void function returns on every path, so an open tail can only
    /// follow control flow that never falls through).
    pub fn end_function(&mut self, returns_void: bool) -> Result<()> {
        if self.block_open() {
            if returns_void {
                self.builder.ret()?;
            } else {
                self.builder.unreachable()?;
            }
        }

        if let (Some(vars_block), Some(code_block)) = (self.variables_block, self.first_code_block)
        {
            if let Some(index) = self.find_block_index(vars_block) {
                self.builder.select_block(Some(index))?;
                self.builder.branch(code_block)?;
            }
        }
        self.builder.end_function()?;

        self.variables_block = None;
        self.first_code_block = None;
        self.current_block = None;
        self.escape_blocks.clear();
        Ok(())
    }

    fn find_block_index(&self, label: Word) -> Option<usize> {
        let func = self.builder.module_ref().functions.last()?;
        func.blocks
            .iter()
            .position(|b| b.label.as_ref().map(|l| l.result_id) == Some(Some(label)))
    }

    /// Declare a function-local pointer in the variables block, leaving the
    /// currently selected block untouched.
    pub fn declare_local(&mut self, pointee: &SymbolType) -> Result<Value> {
        let pointee_id = self.register_type(pointee)?;
        self.declare_local_id(pointee_id)
    }

    pub fn declare_local_id(&mut self, pointee_id: Word) -> Result<Value> {
        let ptr_type = self.type_pointer_to(StorageClass::Function, pointee_id);
        let Some(vars_block) = self.variables_block else {
            bail_codegen!("local declared outside a function");
        };
        let Some(vars_index) = self.find_block_index(vars_block) else {
            bail_codegen!("variables block not found");
        };
        let saved = self.builder.selected_block();
        self.builder.select_block(Some(vars_index))?;
        let id = self.builder.variable(ptr_type, None, StorageClass::Function, None);
        self.builder.select_block(saved)?;
        Ok(Value::new(id, ptr_type))
    }

    // Blocks and terminators

    pub fn begin_block(&mut self, label: Word) -> Result<()> {
        self.builder.begin_block(Some(label))?;
        self.current_block = Some(label);
        Ok(())
    }

    /// Whether the current block still needs a terminator.
    pub fn block_open(&self) -> bool {
        self.builder.selected_block().is_some()
    }

    pub fn branch(&mut self, target: Word) -> Result<()> {
        self.builder.branch(target)?;
        self.current_block = None;
        Ok(())
    }

    /// Fallthrough branch, emitted only if user code has not already closed
    /// the block (a return or break may have).
    pub fn branch_if_open(&mut self, target: Word) -> Result<()> {
        if self.block_open() {
            self.branch(target)?;
        }
        Ok(())
    }

    /// Conditional branch with its selection merge.
    pub fn branch_conditional(
        &mut self,
        cond: Word,
        true_block: Word,
        false_block: Word,
        merge_block: Word,
    ) -> Result<()> {
        self.builder.selection_merge(merge_block, SelectionControl::NONE)?;
        self.builder.branch_conditional(cond, true_block, false_block, [])?;
        self.current_block = None;
        Ok(())
    }

    /// Loop header: merge declaration plus the conditional branch into the
    /// body or out to the merge block.
    pub fn loop_header(
        &mut self,
        cond: Word,
        body: Word,
        continue_target: Word,
        merge: Word,
    ) -> Result<()> {
        self.builder.loop_merge(merge, continue_target, LoopControl::NONE, [])?;
        self.builder.branch_conditional(cond, body, merge, [])?;
        self.current_block = None;
        Ok(())
    }

    pub fn ret(&mut self) -> Result<()> {
        self.builder.ret()?;
        self.current_block = None;
        Ok(())
    }

    pub fn ret_value(&mut self, value: Word) -> Result<()> {
        self.builder.ret_value(value)?;
        self.current_block = None;
        Ok(())
    }

    // Escape targets for break/continue

    pub fn push_escape(&mut self, continue_target: Word, merge: Word) {
        self.escape_blocks.push((continue_target, merge));
    }

    pub fn pop_escape(&mut self) {
        self.escape_blocks.pop();
    }

    pub fn current_escape(&self) -> Option<(Word, Word)> {
        self.escape_blocks.last().copied()
    }

    // Values

    /// Force a load if the value is pointer-typed; plain values pass through.
    pub fn as_value(&mut self, value: Value) -> Result<Value> {
        match self.pointee_of(value.type_id) {
            Some((pointee, _)) => {
                let id = self.builder.load(pointee, None, value.id, None, [])?;
                Ok(Value::new(id, pointee))
            }
            None => Ok(value),
        }
    }

    pub fn store(&mut self, pointer: Word, value: Word) -> Result<()> {
        self.builder.store(pointer, value, None, [])?;
        Ok(())
    }

    /// Collapse a resolved accessor chain into one access-chain instruction.
    pub fn access_chain(
        &mut self,
        pointee: &SymbolType,
        storage: StorageClass,
        base: Word,
        indices: &[Word],
    ) -> Result<Value> {
        let pointee_id = self.register_type(pointee)?;
        let ptr_type = self.type_pointer_to(storage, pointee_id);
        let id = self.builder.access_chain(ptr_type, None, base, indices.iter().copied())?;
        Ok(Value::new(id, ptr_type))
    }

    pub fn composite_extract(
        &mut self,
        result: &SymbolType,
        composite: Word,
        indices: &[u32],
    ) -> Result<Value> {
        let rt = self.register_type(result)?;
        let id = self.builder.composite_extract(rt, None, composite, indices.iter().copied())?;
        Ok(Value::new(id, rt))
    }

    pub fn composite_construct(&mut self, result: &SymbolType, parts: &[Word]) -> Result<Value> {
        let rt = self.register_type(result)?;
        let id = self.builder.composite_construct(rt, None, parts.iter().copied())?;
        Ok(Value::new(id, rt))
    }

    /// Broadcast a scalar into a vector.
    pub fn splat(&mut self, scalar: Word, vector: &SymbolType, size: u32) -> Result<Value> {
        let parts = vec![scalar; size as usize];
        self.composite_construct(vector, &parts)
    }

    pub fn call_function(
        &mut self,
        result: &SymbolType,
        function: Word,
        args: &[Word],
    ) -> Result<Value> {
        let rt = self.register_type(result)?;
        let id = self.builder.function_call(rt, None, function, args.iter().copied())?;
        Ok(Value::new(id, rt))
    }

    /// Call into the GLSL.std.450 extended set.
    pub fn glsl_op(&mut self, result_type: Word, instruction: u32, args: &[Word]) -> Result<Word> {
        let set = self.glsl_ext();
        let operands: Vec<rspirv::dr::Operand> =
            args.iter().map(|&w| rspirv::dr::Operand::IdRef(w)).collect();
        Ok(self.builder.ext_inst(result_type, None, set, instruction, operands)?)
    }

    // Conversions

    /// Convert a loaded value between numeric shapes. Implicit conversions
    /// cover widening, sign reinterpretation, int-to-float and scalar
    /// broadcast into vectors or matrices; narrowing, float-to-int, bool
    /// conversions and dropped vector components require `explicit`.
    pub fn convert(
        &mut self,
        value: Value,
        from: &SymbolType,
        to: &SymbolType,
        explicit: bool,
        span: Span,
    ) -> Result<Value> {
        if from == to {
            return Ok(value);
        }
        match (from, to) {
            (SymbolType::Scalar(a), SymbolType::Scalar(b)) => {
                self.convert_kind(value, *a, *b, to, explicit, span)
            }
            (
                SymbolType::Vector { base: a, size: n },
                SymbolType::Vector { base: b, size: m },
            ) => {
                if n == m {
                    return self.convert_kind(value, *a, *b, to, explicit, span);
                }
                if !explicit || n < m {
                    bail_codegen_at!(span, "cannot convert {from} to {to}");
                }
                // Truncate in the source element kind, then convert kinds.
                let kept = SymbolType::vector(*a, *m);
                let kept_id = self.register_type(&kept)?;
                let components: Vec<u32> = (0..*m).collect();
                let id = self.builder.vector_shuffle(
                    kept_id,
                    None,
                    value.id,
                    value.id,
                    components,
                )?;
                self.convert_kind(Value::new(id, kept_id), *a, *b, to, explicit, span)
            }
            (SymbolType::Scalar(a), SymbolType::Vector { base: b, size }) => {
                let elem = SymbolType::Scalar(*b);
                let scalar = self.convert_kind(value, *a, *b, &elem, explicit, span)?;
                self.splat(scalar.id, to, *size)
            }
            (SymbolType::Scalar(a), SymbolType::Matrix { base: b, rows, cols }) => {
                let elem = SymbolType::Scalar(*b);
                let scalar = self.convert_kind(value, *a, *b, &elem, explicit, span)?;
                let column_ty = SymbolType::vector(*b, *rows);
                let column = self.splat(scalar.id, &column_ty, *rows)?;
                let parts = vec![column.id; *cols as usize];
                self.composite_construct(to, &parts)
            }
            _ => bail_codegen_at!(span, "cannot convert {from} to {to}"),
        }
    }

    /// Component-wise scalar-kind conversion; `result` carries the target
    /// shape (scalar or vector of `to`).
    fn convert_kind(
        &mut self,
        value: Value,
        from: ScalarKind,
        to: ScalarKind,
        result: &SymbolType,
        explicit: bool,
        span: Span,
    ) -> Result<Value> {
        use ScalarKind::*;
        if from == to {
            return Ok(value);
        }
        let rt = self.register_type(result)?;
        let id = match (from, to) {
            (i, f) if i.is_integer() && f.is_floating() => {
                if i.is_signed() {
                    self.builder.convert_s_to_f(rt, None, value.id)?
                } else {
                    self.builder.convert_u_to_f(rt, None, value.id)?
                }
            }
            (a, b) if a.is_floating() && b.is_floating() => {
                if !explicit && b.bit_width() < a.bit_width() {
                    bail_codegen_at!(span, "narrowing {from} to {to} requires an explicit cast");
                }
                self.builder.f_convert(rt, None, value.id)?
            }
            (f, i) if f.is_floating() && i.is_integer() => {
                if !explicit {
                    bail_codegen_at!(span, "converting {from} to {to} requires an explicit cast");
                }
                if i.is_signed() {
                    self.builder.convert_f_to_s(rt, None, value.id)?
                } else {
                    self.builder.convert_f_to_u(rt, None, value.id)?
                }
            }
            (a, b) if a.is_integer() && b.is_integer() => {
                if !explicit && b.bit_width() < a.bit_width() {
                    bail_codegen_at!(span, "narrowing {from} to {to} requires an explicit cast");
                }
                match (a.bit_width() == b.bit_width(), a.is_signed() == b.is_signed()) {
                    (true, _) => self.builder.bitcast(rt, None, value.id)?,
                    (false, true) => {
                        if a.is_signed() {
                            self.builder.s_convert(rt, None, value.id)?
                        } else {
                            self.builder.u_convert(rt, None, value.id)?
                        }
                    }
                    (false, false) => {
                        // Resize in the source signedness, then reinterpret.
                        let mid_kind = int_kind(b.bit_width(), a.is_signed());
                        let mid_ty = result.with_element_type(mid_kind);
                        let mid = self.register_type(&mid_ty)?;
                        let resized = if a.is_signed() {
                            self.builder.s_convert(mid, None, value.id)?
                        } else {
                            self.builder.u_convert(mid, None, value.id)?
                        };
                        self.builder.bitcast(rt, None, resized)?
                    }
                }
            }
            (Bool, n) if n.is_numeric() => {
                if !explicit {
                    bail_codegen_at!(span, "converting bool to {to} requires an explicit cast");
                }
                let (one, zero) = self.one_zero(result, n)?;
                self.builder.select(rt, None, value.id, one, zero)?
            }
            (n, Bool) if n.is_numeric() => {
                if !explicit {
                    bail_codegen_at!(span, "converting {from} to bool requires an explicit cast");
                }
                let source_shape = result.with_element_type(n);
                let (_, zero) = self.one_zero(&source_shape, n)?;
                if n.is_floating() {
                    self.builder.f_unord_not_equal(rt, None, value.id, zero)?
                } else {
                    self.builder.i_not_equal(rt, None, value.id, zero)?
                }
            }
            _ => bail_codegen_at!(span, "cannot convert {from} to {to}"),
        };
        Ok(Value::new(id, rt))
    }

    /// One and zero constants in the given shape.
    fn one_zero(&mut self, shape: &SymbolType, kind: ScalarKind) -> Result<(Word, Word)> {
        let (one, zero) = if kind.is_floating() {
            (self.const_float(kind, 1.0)?, self.const_float(kind, 0.0)?)
        } else {
            (self.const_int(kind, 1)?, self.const_int(kind, 0)?)
        };
        match shape {
            SymbolType::Vector { size, .. } => {
                let vt = self.register_type(shape)?;
                let ones = vec![one; *size as usize];
                let zeros = vec![zero; *size as usize];
                Ok((self.const_composite(vt, ones), self.const_composite(vt, zeros)))
            }
            _ => Ok((one, zero)),
        }
    }

    // Operators

    pub fn unary_op(
        &mut self,
        op: UnaryOp,
        value: Value,
        ty: &SymbolType,
        span: Span,
    ) -> Result<Value> {
        let kind = ty.element_type().unwrap_or(ScalarKind::Void);
        let rt = self.register_type(ty)?;
        let id = match op {
            UnaryOp::Neg if kind.is_floating() => {
                if let SymbolType::Matrix { base, rows, cols } = ty {
                    return self.matrix_columnwise(
                        *base,
                        *rows,
                        *cols,
                        value.id,
                        MatrixRhs::Negate,
                        BinOp::Sub,
                    );
                }
                self.builder.f_negate(rt, None, value.id)?
            }
            UnaryOp::Neg if kind.is_integer() => self.builder.s_negate(rt, None, value.id)?,
            UnaryOp::Not if kind == ScalarKind::Bool => {
                self.builder.logical_not(rt, None, value.id)?
            }
            UnaryOp::BitNot if kind.is_integer() => self.builder.not(rt, None, value.id)?,
            _ => bail_codegen_at!(span, "operator not applicable to {ty}"),
        };
        Ok(Value::new(id, rt))
    }

    /// Type and emit a binary operator over loaded operands. Returns the
    /// result value together with its structural type.
    pub fn binary_op(
        &mut self,
        op: BinOp,
        lhs: Value,
        lhs_ty: &SymbolType,
        rhs: Value,
        rhs_ty: &SymbolType,
        span: Span,
    ) -> Result<(Value, SymbolType)> {
        let (operand_ty, result_ty) = match binary_op_types(op, lhs_ty, rhs_ty) {
            Ok(pair) => pair,
            Err(msg) => bail_codegen_at!(span, "{msg}"),
        };

        if op.is_logical() {
            let rt = self.register_type(&result_ty)?;
            let id = match op {
                BinOp::And => self.builder.logical_and(rt, None, lhs.id, rhs.id)?,
                _ => self.builder.logical_or(rt, None, lhs.id, rhs.id)?,
            };
            return Ok((Value::new(id, rt), result_ty));
        }

        if let SymbolType::Matrix { base, rows, cols } = &operand_ty {
            let value =
                self.matrix_op(op, lhs, lhs_ty, rhs, rhs_ty, *base, *rows, *cols, span)?;
            return Ok((value, result_ty));
        }

        let left = self.convert(lhs, lhs_ty, &operand_ty, false, span)?;
        let right = self.convert(rhs, rhs_ty, &operand_ty, false, span)?;
        let kind = operand_ty.element_type().unwrap_or(ScalarKind::Void);
        let rt = self.register_type(&result_ty)?;

        let id = if op.is_comparison() {
            self.compare(op, kind, rt, left.id, right.id)?
        } else {
            self.arithmetic(op, kind, rt, left.id, right.id, span)?
        };
        Ok((Value::new(id, rt), result_ty))
    }

    fn compare(
        &mut self,
        op: BinOp,
        kind: ScalarKind,
        rt: Word,
        l: Word,
        r: Word,
    ) -> Result<Word> {
        use BinOp::*;
        let b = &mut self.builder;
        let id = if kind == ScalarKind::Bool {
            match op {
                Eq => b.logical_equal(rt, None, l, r)?,
                _ => b.logical_not_equal(rt, None, l, r)?,
            }
        } else if kind.is_floating() {
            match op {
                Eq => b.f_ord_equal(rt, None, l, r)?,
                Ne => b.f_ord_not_equal(rt, None, l, r)?,
                Lt => b.f_ord_less_than(rt, None, l, r)?,
                Le => b.f_ord_less_than_equal(rt, None, l, r)?,
                Gt => b.f_ord_greater_than(rt, None, l, r)?,
                Ge => b.f_ord_greater_than_equal(rt, None, l, r)?,
                _ => unreachable!(),
            }
        } else if kind.is_signed() {
            match op {
                Eq => b.i_equal(rt, None, l, r)?,
                Ne => b.i_not_equal(rt, None, l, r)?,
                Lt => b.s_less_than(rt, None, l, r)?,
                Le => b.s_less_than_equal(rt, None, l, r)?,
                Gt => b.s_greater_than(rt, None, l, r)?,
                Ge => b.s_greater_than_equal(rt, None, l, r)?,
                _ => unreachable!(),
            }
        } else {
            match op {
                Eq => b.i_equal(rt, None, l, r)?,
                Ne => b.i_not_equal(rt, None, l, r)?,
                Lt => b.u_less_than(rt, None, l, r)?,
                Le => b.u_less_than_equal(rt, None, l, r)?,
                Gt => b.u_greater_than(rt, None, l, r)?,
                Ge => b.u_greater_than_equal(rt, None, l, r)?,
                _ => unreachable!(),
            }
        };
        Ok(id)
    }

    fn arithmetic(
        &mut self,
        op: BinOp,
        kind: ScalarKind,
        rt: Word,
        l: Word,
        r: Word,
        span: Span,
    ) -> Result<Word> {
        use BinOp::*;
        let b = &mut self.builder;
        let id = match (op, kind.is_floating(), kind.is_signed()) {
            (Add, true, _) => b.f_add(rt, None, l, r)?,
            (Add, false, _) => b.i_add(rt, None, l, r)?,
            (Sub, true, _) => b.f_sub(rt, None, l, r)?,
            (Sub, false, _) => b.i_sub(rt, None, l, r)?,
            (Mul, true, _) => b.f_mul(rt, None, l, r)?,
            (Mul, false, _) => b.i_mul(rt, None, l, r)?,
            (Div, true, _) => b.f_div(rt, None, l, r)?,
            (Div, false, true) => b.s_div(rt, None, l, r)?,
            (Div, false, false) => b.u_div(rt, None, l, r)?,
            // The % operator follows floor-mod semantics for floats.
            (Rem, true, _) => b.f_mod(rt, None, l, r)?,
            (Rem, false, true) => b.s_mod(rt, None, l, r)?,
            (Rem, false, false) => b.u_mod(rt, None, l, r)?,
            (BitAnd, false, _) => b.bitwise_and(rt, None, l, r)?,
            (BitOr, false, _) => b.bitwise_or(rt, None, l, r)?,
            (BitXor, false, _) => b.bitwise_xor(rt, None, l, r)?,
            (Shl, false, _) => b.shift_left_logical(rt, None, l, r)?,
            (Shr, false, true) => b.shift_right_arithmetic(rt, None, l, r)?,
            (Shr, false, false) => b.shift_right_logical(rt, None, l, r)?,
            _ => bail_codegen_at!(span, "operator '{}' not applicable here", op.symbol()),
        };
        Ok(id)
    }

    /// Component-wise matrix arithmetic and matrix-scalar forms.
    #[allow(clippy::too_many_arguments)]
    fn matrix_op(
        &mut self,
        op: BinOp,
        lhs: Value,
        lhs_ty: &SymbolType,
        rhs: Value,
        rhs_ty: &SymbolType,
        base: ScalarKind,
        rows: u32,
        cols: u32,
        span: Span,
    ) -> Result<Value> {
        let matrix_ty = SymbolType::matrix(base, rows, cols);
        match (lhs_ty, rhs_ty) {
            (SymbolType::Matrix { .. }, SymbolType::Matrix { .. }) => {
                self.matrix_columnwise(base, rows, cols, lhs.id, MatrixRhs::Matrix(rhs.id), op)
            }
            (SymbolType::Matrix { .. }, SymbolType::Scalar(k))
            | (SymbolType::Scalar(k), SymbolType::Matrix { .. }) => {
                let (mat, scalar_value, scalar_kind) = if matches!(lhs_ty, SymbolType::Matrix { .. })
                {
                    (lhs, rhs, *k)
                } else {
                    (rhs, lhs, *k)
                };
                let elem = SymbolType::Scalar(base);
                let scalar = self.convert(
                    scalar_value,
                    &SymbolType::Scalar(scalar_kind),
                    &elem,
                    false,
                    span,
                )?;
                match op {
                    BinOp::Mul => {
                        let rt = self.register_type(&matrix_ty)?;
                        let id =
                            self.builder.matrix_times_scalar(rt, None, mat.id, scalar.id)?;
                        Ok(Value::new(id, rt))
                    }
                    BinOp::Div if matches!(lhs_ty, SymbolType::Matrix { .. }) => {
                        let column = SymbolType::vector(base, rows);
                        let splat = self.splat(scalar.id, &column, rows)?;
                        self.matrix_columnwise(
                            base,
                            rows,
                            cols,
                            mat.id,
                            MatrixRhs::Column(splat.id),
                            op,
                        )
                    }
                    _ => bail_codegen_at!(span, "operator '{}' not applicable here", op.symbol()),
                }
            }
            _ => bail_codegen_at!(span, "operator '{}' not applicable here", op.symbol()),
        }
    }

    /// Apply a float operator column by column.
    fn matrix_columnwise(
        &mut self,
        base: ScalarKind,
        rows: u32,
        cols: u32,
        lhs: Word,
        rhs: MatrixRhs,
        op: BinOp,
    ) -> Result<Value> {
        let column_ty = SymbolType::vector(base, rows);
        let column_id = self.register_type(&column_ty)?;
        let matrix_ty = SymbolType::matrix(base, rows, cols);
        let mut columns = Vec::with_capacity(cols as usize);
        for c in 0..cols {
            let lc = self.builder.composite_extract(column_id, None, lhs, [c])?;
            let out = match rhs {
                MatrixRhs::Negate => self.builder.f_negate(column_id, None, lc)?,
                MatrixRhs::Matrix(other) | MatrixRhs::Column(other) => {
                    let rc = match rhs {
                        MatrixRhs::Matrix(_) => {
                            self.builder.composite_extract(column_id, None, other, [c])?
                        }
                        _ => other,
                    };
                    match op {
                        BinOp::Add => self.builder.f_add(column_id, None, lc, rc)?,
                        BinOp::Sub => self.builder.f_sub(column_id, None, lc, rc)?,
                        BinOp::Mul => self.builder.f_mul(column_id, None, lc, rc)?,
                        BinOp::Div => self.builder.f_div(column_id, None, lc, rc)?,
                        _ => {
                            bail_codegen!("operator '{}' not applicable to matrices", op.symbol())
                        }
                    }
                }
            };
            columns.push(out);
        }
        self.composite_construct(&matrix_ty, &columns)
    }

    // Swizzles

    /// Load a swizzle as a value: one index extracts a component, several
    /// shuffle the source with itself.
    pub fn swizzle_load(
        &mut self,
        base: Value,
        base_ty: &SymbolType,
        indices: &[u32],
    ) -> Result<(Value, SymbolType)> {
        let loaded = self.as_value(base)?;
        let (elem, _) = match base_ty {
            SymbolType::Vector { base, size } => (*base, *size),
            SymbolType::Scalar(kind) => {
                // Scalar swizzles: identity or broadcast.
                if indices.len() == 1 {
                    return Ok((loaded, SymbolType::Scalar(*kind)));
                }
                let out = SymbolType::vector(*kind, indices.len() as u32);
                let value = self.splat(loaded.id, &out, indices.len() as u32)?;
                return Ok((value, out));
            }
            other => bail_codegen!("cannot swizzle {other}"),
        };
        if indices.len() == 1 {
            let out = SymbolType::Scalar(elem);
            let value = self.composite_extract(&out, loaded.id, &[indices[0]])?;
            return Ok((value, out));
        }
        let out = SymbolType::vector(elem, indices.len() as u32);
        let rt = self.register_type(&out)?;
        let id = self
            .builder
            .vector_shuffle(rt, None, loaded.id, loaded.id, indices.iter().copied())?;
        Ok((Value::new(id, rt), out))
    }

    /// Store through a multi-component swizzle by shuffling the new lanes
    /// into the loaded vector and writing the whole vector back.
    pub fn swizzle_store(
        &mut self,
        pointer: Value,
        vector_ty: &SymbolType,
        indices: &[u32],
        value: Word,
    ) -> Result<()> {
        let SymbolType::Vector { size, .. } = vector_ty else {
            bail_codegen!("swizzle store target must be a vector, found {vector_ty}");
        };
        let old = self.as_value(pointer)?;
        let mut selection: Vec<u32> = (0..*size).collect();
        for (j, &component) in indices.iter().enumerate() {
            let Some(slot) = selection.get_mut(component as usize) else {
                bail_codegen!("swizzle component out of range for {vector_ty}");
            };
            *slot = *size + j as u32;
        }
        let rt = self.register_type(vector_ty)?;
        let merged = self.builder.vector_shuffle(rt, None, old.id, value, selection)?;
        self.store(pointer.id, merged)
    }
}

#[derive(Clone, Copy)]
enum MatrixRhs {
    Matrix(Word),
    Column(Word),
    Negate,
}

fn int_kind(width: u32, signed: bool) -> ScalarKind {
    match (width, signed) {
        (64, true) => ScalarKind::Int64,
        (64, false) => ScalarKind::UInt64,
        (_, true) => ScalarKind::Int,
        (_, false) => ScalarKind::UInt,
    }
}

/// Operand and result types of a binary operator, or a message for the
/// diagnostic sink. Operand type is what both sides convert to before
/// emission; the result differs from it only for comparisons.
pub(crate) fn binary_op_types(
    op: BinOp,
    lhs: &SymbolType,
    rhs: &SymbolType,
) -> std::result::Result<(SymbolType, SymbolType), String> {
    use SymbolType::*;

    if op.is_logical() {
        if lhs == &SymbolType::BOOL && rhs == &SymbolType::BOOL {
            return Ok((SymbolType::BOOL, SymbolType::BOOL));
        }
        return Err(format!(
            "operator '{}' requires scalar bool operands, found {lhs} and {rhs}",
            op.symbol()
        ));
    }

    // Matrix forms: component-wise same-shape arithmetic, scalar scaling.
    match (lhs, rhs) {
        (Matrix { .. }, _) | (_, Matrix { .. }) => {
            if op.is_comparison() {
                return Err(format!("cannot compare {lhs} and {rhs}"));
            }
            return match (lhs, rhs) {
                (a @ Matrix { base, .. }, b @ Matrix { .. }) if a == b => {
                    if !base.is_floating() {
                        return Err(format!("matrix arithmetic requires float elements: {lhs}"));
                    }
                    if matches!(op, BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div) {
                        Ok((lhs.clone(), lhs.clone()))
                    } else {
                        Err(format!("operator '{}' not defined for matrices", op.symbol()))
                    }
                }
                (Matrix { base, .. }, Scalar(k)) if matches!(op, BinOp::Mul | BinOp::Div) => {
                    check_scalar_feeds(*k, *base, lhs)?;
                    Ok((lhs.clone(), lhs.clone()))
                }
                (Scalar(k), Matrix { base, .. }) if op == BinOp::Mul => {
                    check_scalar_feeds(*k, *base, rhs)?;
                    Ok((rhs.clone(), rhs.clone()))
                }
                _ => Err(format!(
                    "operator '{}' not applicable to {lhs} and {rhs}",
                    op.symbol()
                )),
            };
        }
        _ => {}
    }

    let (l_elem, r_elem) = match (lhs.element_type(), rhs.element_type()) {
        (Some(a), Some(b)) => (a, b),
        _ => return Err(format!("operator '{}' not applicable to {lhs} and {rhs}", op.symbol())),
    };
    let Some(elem) = promote(l_elem, r_elem) else {
        return Err(format!("no common type for {lhs} and {rhs}"));
    };

    let operand = match (lhs, rhs) {
        (Vector { size: n, .. }, Vector { size: m, .. }) => {
            if n != m {
                return Err(format!("vector size mismatch: {lhs} and {rhs}"));
            }
            SymbolType::vector(elem, *n)
        }
        (Vector { size, .. }, Scalar(_)) | (Scalar(_), Vector { size, .. }) => {
            SymbolType::vector(elem, *size)
        }
        _ => SymbolType::Scalar(elem),
    };

    if op.is_comparison() {
        if elem == ScalarKind::Bool && !matches!(op, BinOp::Eq | BinOp::Ne) {
            return Err(format!("cannot order bool operands with '{}'", op.symbol()));
        }
        let result = operand.with_element_type(ScalarKind::Bool);
        return Ok((operand, result));
    }

    if elem == ScalarKind::Bool {
        return Err(format!("operator '{}' not applicable to bool", op.symbol()));
    }
    if matches!(op, BinOp::BitAnd | BinOp::BitOr | BinOp::BitXor | BinOp::Shl | BinOp::Shr)
        && !elem.is_integer()
    {
        return Err(format!("operator '{}' requires integer operands", op.symbol()));
    }

    Ok((operand.clone(), operand))
}

fn check_scalar_feeds(
    scalar: ScalarKind,
    base: ScalarKind,
    matrix: &SymbolType,
) -> std::result::Result<(), String> {
    if !base.is_floating() {
        return Err(format!("matrix arithmetic requires float elements: {matrix}"));
    }
    match promote(scalar, base) {
        Some(k) if k == base => Ok(()),
        _ => Err(format!("cannot scale {matrix} by {scalar}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::BinOp;

    #[test]
    fn test_binary_result_types() {
        let float3 = SymbolType::vector(ScalarKind::Float, 3);
        let (operand, result) =
            binary_op_types(BinOp::Add, &SymbolType::INT, &SymbolType::FLOAT).unwrap();
        assert_eq!(operand, SymbolType::FLOAT);
        assert_eq!(result, SymbolType::FLOAT);

        let (operand, result) = binary_op_types(BinOp::Mul, &float3, &SymbolType::FLOAT).unwrap();
        assert_eq!(operand, float3);
        assert_eq!(result, float3);

        let (_, result) = binary_op_types(BinOp::Lt, &float3, &float3).unwrap();
        assert_eq!(result, SymbolType::vector(ScalarKind::Bool, 3));

        // Size mismatch and mixed precision are rejected.
        let float2 = SymbolType::vector(ScalarKind::Float, 2);
        assert!(binary_op_types(BinOp::Add, &float3, &float2).is_err());
        assert!(binary_op_types(BinOp::Add, &SymbolType::FLOAT, &SymbolType::DOUBLE).is_err());
        assert!(binary_op_types(BinOp::And, &SymbolType::INT, &SymbolType::INT).is_err());
        assert!(binary_op_types(BinOp::Shl, &SymbolType::FLOAT, &SymbolType::INT).is_err());
    }

    #[test]
    fn test_matrix_operator_typing() {
        let m33 = SymbolType::matrix(ScalarKind::Float, 3, 3);
        let (operand, result) = binary_op_types(BinOp::Mul, &m33, &m33).unwrap();
        assert_eq!(operand, m33);
        assert_eq!(result, m33);

        let (_, result) = binary_op_types(BinOp::Mul, &m33, &SymbolType::FLOAT).unwrap();
        assert_eq!(result, m33);

        assert!(binary_op_types(BinOp::Lt, &m33, &m33).is_err());
        let m34 = SymbolType::matrix(ScalarKind::Float, 3, 4);
        assert!(binary_op_types(BinOp::Add, &m33, &m34).is_err());
    }

    #[test]
    fn test_function_scaffolding() {
        use crate::types::FunctionParam;
        let mut ctx = SpirvContext::new(false);
        let sig = Arc::new(FunctionType::new(
            SymbolType::VOID,
            vec![FunctionParam::new(SymbolType::FLOAT)],
        ));
        let (_, params) = ctx.begin_function(&sig, None).unwrap();
        assert_eq!(params.len(), 1);

        let local = ctx.declare_local(&SymbolType::FLOAT).unwrap();
        let loaded = ctx.as_value(local).unwrap();
        assert_ne!(loaded.type_id, local.type_id);
        ctx.end_function(true).unwrap();

        let module = ctx.into_module();
        let func = module.functions.last().unwrap();
        // Variables block plus one code block, each ending in a terminator.
        assert_eq!(func.blocks.len(), 2);
        assert_eq!(func.blocks[0].instructions.last().unwrap().class.opcode, spirv::Op::Branch);
        assert_eq!(func.blocks[1].instructions.last().unwrap().class.opcode, spirv::Op::Return);
    }
}
