//! The built-in function library: templated declarations, their expansion
//! into concrete overload sets, and the instruction selection behind each.
//!
//! A built-in is declared once as a small template (`IntrinsicDef`) whose
//! slots range over scalar classes and vector or matrix shapes. The
//! `expander` multiplies a template out into every concrete `FunctionType`
//! it denotes; the resulting `IntrinsicOverload` list is cached per compiler
//! and fed through the ordinary overload resolver. Matrix shapes produced by
//! an unnamed size axis additionally carry an `AutoLoop`, so elementwise
//! built-ins apply per column without needing a matrix instruction.

mod catalog;
mod emit;
mod expander;

#[cfg(test)]
mod tests;

pub use emit::{glsl, AtomicOp, CoreUnary, IntrinsicImpl};

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::ast::Span;
use crate::bail_codegen_at;
use crate::context::{SpirvContext, Value};
use crate::error::Result;
use crate::types::{FunctionType, ParamModifier, ScalarKind, SymbolType};

/// Slot index a template uses to copy shape or element information from the
/// method receiver.
pub const RECEIVER: i32 = -1;

/// Scalar classes a free template slot ranges over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BaseClass {
    Bool,
    Int,
    Uint,
    Float,
    Double,
    Void,
    AnyFloat,
    AnyInt,
    AnyInt32,
    UintAny,
    Numeric,
    Numeric32,
    Any,
}

impl BaseClass {
    pub fn kinds(self) -> &'static [ScalarKind] {
        use ScalarKind::*;
        match self {
            BaseClass::Bool => &[Bool],
            BaseClass::Int => &[Int],
            BaseClass::Uint => &[UInt],
            BaseClass::Float => &[Float],
            BaseClass::Double => &[Double],
            BaseClass::Void => &[Void],
            BaseClass::AnyFloat => &[Float, Double],
            BaseClass::AnyInt => &[Int, UInt, Int64, UInt64],
            BaseClass::AnyInt32 => &[Int, UInt],
            BaseClass::UintAny => &[UInt, UInt64],
            BaseClass::Numeric => &[Float, Double, Int, UInt, Int64, UInt64],
            BaseClass::Numeric32 => &[Float, Double, Int, UInt],
            BaseClass::Any => &[Float, Double, Int, UInt, Int64, UInt64, Bool],
        }
    }
}

/// One dimension of a slot's shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeSpec {
    /// A single size. `Fixed(1)` pins the dimension while still writing it.
    Fixed(u32),
    /// Unnamed axis over 1..=4, private to this slot.
    Any,
    /// Named axis over 2..=4, shared by every slot dimension naming it.
    Named(&'static str),
}

/// Where a slot's element kind comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum SlotBase {
    /// Free slot ranging over a scalar class.
    Class(BaseClass),
    /// Copy the element kind resolved for another slot.
    Matched(i32),
    /// A complete type; shape dimensions must be absent.
    Exact(SymbolType),
}

/// Shape template for one return or parameter slot.
#[derive(Debug, Clone, PartialEq)]
pub struct Slot {
    pub base: SlotBase,
    /// First shape dimension: vector length, or column count when `y` is set.
    pub x: Option<SizeSpec>,
    /// Second shape dimension, the column length.
    pub y: Option<SizeSpec>,
    /// Copy the shape of another slot (`RECEIVER` for the method receiver).
    /// An explicit `x` other than `Any` overrides the copied first dimension.
    pub match_layout: Option<i32>,
}

impl Slot {
    pub fn class(class: BaseClass) -> Slot {
        Slot { base: SlotBase::Class(class), x: None, y: None, match_layout: None }
    }

    pub fn matched(slot: i32) -> Slot {
        Slot { base: SlotBase::Matched(slot), x: None, y: None, match_layout: None }
    }

    pub fn exact(ty: SymbolType) -> Slot {
        Slot { base: SlotBase::Exact(ty), x: None, y: None, match_layout: None }
    }

    /// Slot whose element kind and shape both copy another slot.
    pub fn shaped_like(slot: i32) -> Slot {
        Slot::matched(slot).x(SizeSpec::Any).layout_of(slot)
    }

    /// Slot resolved entirely from the method receiver: the element kind and
    /// width of the value the receiver yields.
    pub fn from_receiver() -> Slot {
        Slot::class(BaseClass::Void).x(SizeSpec::Any).layout_of(RECEIVER)
    }

    pub fn x(mut self, spec: SizeSpec) -> Slot {
        self.x = Some(spec);
        self
    }

    pub fn y(mut self, spec: SizeSpec) -> Slot {
        self.y = Some(spec);
        self
    }

    pub fn layout_of(mut self, slot: i32) -> Slot {
        self.match_layout = Some(slot);
        self
    }
}

/// One templated built-in: a return slot, parameter slots with their passing
/// modes, and the instruction pattern implementing every expanded overload.
#[derive(Debug, Clone)]
pub struct IntrinsicDef {
    pub ret: Slot,
    pub params: Vec<(Slot, ParamModifier)>,
    pub imp: IntrinsicImpl,
}

impl IntrinsicDef {
    pub fn new(ret: Slot, params: Vec<(Slot, ParamModifier)>, imp: IntrinsicImpl) -> Self {
        IntrinsicDef { ret, params, imp }
    }

    /// Definition whose parameters are all plain by-value inputs.
    pub fn plain(ret: Slot, params: Vec<Slot>, imp: IntrinsicImpl) -> Self {
        let params = params.into_iter().map(|p| (p, ParamModifier::None)).collect();
        IntrinsicDef { ret, params, imp }
    }
}

/// Per-column application plan for matrix overloads of elementwise built-ins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AutoLoop {
    /// Slot indices rewritten to their column type; slot 0 is the return.
    pub slots: Vec<usize>,
    /// Column count shared by every rewritten slot.
    pub columns: u32,
}

/// One concrete signature produced by template expansion.
#[derive(Debug, Clone)]
pub struct IntrinsicOverload {
    pub signature: Arc<FunctionType>,
    pub imp: IntrinsicImpl,
    pub auto_loop: Option<AutoLoop>,
}

/// Expanded overload sets, keyed by built-in name (receiver methods under
/// `"{receiver}.{method}"`). Each compiler owns one; a set is immutable once
/// built and shared out behind `Arc`.
pub struct Intrinsics {
    cache: Mutex<HashMap<String, Arc<Vec<IntrinsicOverload>>>>,
}

impl Intrinsics {
    pub fn new() -> Self {
        Intrinsics { cache: Mutex::new(HashMap::new()) }
    }

    /// Overloads of a global built-in, or `None` when the name is not one.
    pub fn global(&self, name: &str) -> Result<Option<Arc<Vec<IntrinsicOverload>>>> {
        let mut cache = match self.cache.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(cached) = cache.get(name) {
            return Ok(Some(cached.clone()));
        }
        let Some(defs) = catalog::global_defs(name) else {
            return Ok(None);
        };
        let expanded = Arc::new(expander::expand(name, None, &defs)?);
        cache.insert(name.to_string(), expanded.clone());
        Ok(Some(expanded))
    }

    /// Overloads of a method on `receiver`, or `None` when the receiver type
    /// offers no method of that name.
    pub fn method(
        &self,
        receiver: &SymbolType,
        name: &str,
    ) -> Result<Option<Arc<Vec<IntrinsicOverload>>>> {
        let key = format!("{receiver}.{name}");
        let mut cache = match self.cache.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(cached) = cache.get(&key) {
            return Ok(Some(cached.clone()));
        }
        let Some(defs) = catalog::method_defs(receiver, name) else {
            return Ok(None);
        };
        let expanded = Arc::new(expander::expand(&key, Some(receiver), &defs)?);
        cache.insert(key, expanded.clone());
        Ok(Some(expanded))
    }
}

impl Default for Intrinsics {
    fn default() -> Self {
        Self::new()
    }
}

/// Emit one selected overload. Arguments arrive converted to the signature's
/// parameter types, as pointers for parameters that copy out. Calls with a
/// void result come back with a null id; the resolver rejects every use of a
/// void value, so the id is never read.
pub fn emit_call(
    ctx: &mut SpirvContext,
    overload: &IntrinsicOverload,
    receiver: Option<Value>,
    args: &[Value],
    span: Span,
) -> Result<Value> {
    if let Some(auto_loop) = &overload.auto_loop {
        return emit_per_column(ctx, overload, auto_loop, receiver, args, span);
    }
    let result = emit::apply(ctx, overload.imp, &overload.signature, receiver, args, span)?;
    finish(ctx, result)
}

fn finish(ctx: &mut SpirvContext, result: Option<Value>) -> Result<Value> {
    match result {
        Some(value) => Ok(value),
        None => {
            let void_id = ctx.register_type(&SymbolType::VOID)?;
            Ok(Value::new(0, void_id))
        }
    }
}

/// Apply an elementwise built-in to matrix arguments by running it once per
/// column and reassembling the columns into the declared matrix result.
fn emit_per_column(
    ctx: &mut SpirvContext,
    overload: &IntrinsicOverload,
    auto_loop: &AutoLoop,
    receiver: Option<Value>,
    args: &[Value],
    span: Span,
) -> Result<Value> {
    let mut column_sig = (*overload.signature).clone();
    let mut looped_params = Vec::new();
    let mut rebuild: Option<SymbolType> = None;
    for &slot in &auto_loop.slots {
        if slot == 0 {
            let matrix = column_sig.return_type.as_ref().clone();
            *column_sig.return_type = column_type(&matrix, span)?;
            rebuild = Some(matrix);
        } else {
            let Some(param) = column_sig.params.get_mut(slot - 1) else {
                bail_codegen_at!(span, "column loop names a parameter that does not exist");
            };
            param.ty = column_type(&param.ty, span)?;
            looped_params.push(slot - 1);
        }
    }

    let mut columns = Vec::with_capacity(auto_loop.columns as usize);
    for c in 0..auto_loop.columns {
        let mut column_args = args.to_vec();
        for &p in &looped_params {
            let (Some(param), Some(arg)) = (column_sig.params.get(p), args.get(p)) else {
                bail_codegen_at!(span, "column loop argument is missing");
            };
            column_args[p] = ctx.composite_extract(&param.ty, arg.id, &[c])?;
        }
        let result = emit::apply(ctx, overload.imp, &column_sig, receiver, &column_args, span)?;
        if rebuild.is_some() {
            if let Some(value) = result {
                columns.push(value.id);
            }
        }
    }

    match rebuild {
        Some(matrix) => ctx.composite_construct(&matrix, &columns),
        None => finish(ctx, None),
    }
}

fn column_type(matrix: &SymbolType, span: Span) -> Result<SymbolType> {
    match matrix {
        SymbolType::Matrix { base, rows, .. } => Ok(SymbolType::vector(*base, *rows)),
        other => bail_codegen_at!(span, "cannot split {other} into columns"),
    }
}
