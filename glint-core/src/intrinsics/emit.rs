//! Instruction selection for built-in calls.
//!
//! Every overload names one `IntrinsicImpl`; `apply` turns the selected
//! implementation, the concrete signature and the prepared argument list
//! into instructions. Matrix overloads of elementwise built-ins never reach
//! this level whole, the dispatcher splits them into column calls first.

use rspirv::dr::Operand;
use rspirv::spirv::{self, Capability, Word};

use crate::ast::Span;
use crate::bail_codegen_at;
use crate::context::{SpirvContext, Value};
use crate::error::Result;
use crate::types::{FunctionType, ScalarKind, SymbolType, TextureAccess};

/// GLSL.std.450 extended instruction numbers, the subset the library emits.
pub mod glsl {
    pub const ROUND: u32 = 1;
    pub const TRUNC: u32 = 3;
    pub const F_ABS: u32 = 4;
    pub const S_ABS: u32 = 5;
    pub const F_SIGN: u32 = 6;
    pub const S_SIGN: u32 = 7;
    pub const FLOOR: u32 = 8;
    pub const CEIL: u32 = 9;
    pub const FRACT: u32 = 10;
    pub const RADIANS: u32 = 11;
    pub const DEGREES: u32 = 12;
    pub const SIN: u32 = 13;
    pub const COS: u32 = 14;
    pub const TAN: u32 = 15;
    pub const ASIN: u32 = 16;
    pub const ACOS: u32 = 17;
    pub const ATAN: u32 = 18;
    pub const SINH: u32 = 19;
    pub const COSH: u32 = 20;
    pub const TANH: u32 = 21;
    pub const ATAN2: u32 = 25;
    pub const POW: u32 = 26;
    pub const EXP: u32 = 27;
    pub const LOG: u32 = 28;
    pub const EXP2: u32 = 29;
    pub const LOG2: u32 = 30;
    pub const SQRT: u32 = 31;
    pub const INVERSE_SQRT: u32 = 32;
    pub const DETERMINANT: u32 = 33;
    pub const MATRIX_INVERSE: u32 = 34;
    pub const F_MIN: u32 = 37;
    pub const U_MIN: u32 = 38;
    pub const S_MIN: u32 = 39;
    pub const F_MAX: u32 = 40;
    pub const U_MAX: u32 = 41;
    pub const S_MAX: u32 = 42;
    pub const F_CLAMP: u32 = 43;
    pub const U_CLAMP: u32 = 44;
    pub const S_CLAMP: u32 = 45;
    pub const F_MIX: u32 = 46;
    pub const STEP: u32 = 48;
    pub const SMOOTH_STEP: u32 = 49;
    pub const FMA: u32 = 50;
    pub const LENGTH: u32 = 66;
    pub const DISTANCE: u32 = 67;
    pub const CROSS: u32 = 68;
    pub const NORMALIZE: u32 = 69;
    pub const FACE_FORWARD: u32 = 70;
    pub const REFLECT: u32 = 71;
    pub const REFRACT: u32 = 72;
}

/// Core unary instructions built-ins map onto directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoreUnary {
    IsNan,
    IsInf,
    Transpose,
    Dpdx,
    Dpdy,
    DpdxCoarse,
    DpdyCoarse,
    DpdxFine,
    DpdyFine,
    Fwidth,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AtomicOp {
    Add,
    And,
    Or,
    Xor,
    Min,
    Max,
    Exchange,
}

/// How one built-in lowers to instructions. One implementation covers every
/// overload its template expands to; the concrete signature supplies the
/// types and, where needed, picks the instruction variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntrinsicImpl {
    /// One extended instruction, arguments in call order.
    Glsl(u32),
    /// Extended instruction picked by the element class of the result.
    GlslByElement { float: u32, signed: u32, unsigned: u32 },
    /// Core unary instruction on the sole argument.
    CoreUnary(CoreUnary),
    /// Clamp into [0, 1] in the element class of the result.
    Saturate,
    /// log2 rescaled; there is no base-10 instruction.
    Log10,
    /// The fmod() library call keeps C's truncated remainder, unlike the
    /// `%` operator.
    FRem,
    Bitcast,
    Dot,
    /// Shape-directed multiply: product of whatever scalar, vector and
    /// matrix combination the overload carries.
    Mul,
    /// Boolean reduction over every component, per column for matrices.
    AllAny { all: bool },
    Atomic(AtomicOp),
    AtomicCompare { exchange: bool },
    Barrier { group_sync: bool, semantics: u32 },
    /// Kill the invocation.
    Abort,
    Sample { explicit_lod: bool },
    /// Fetch from a sampled texture; the trailing coordinate component is
    /// the mip level.
    TexLoad,
    /// Read a texel from a storage texture.
    TexRead,
    /// Write a texel to a storage texture.
    TexStore,
    /// Fetch one element of a typed buffer.
    BufferLoad,
    /// Write one element of a typed buffer.
    BufferStore,
    /// Load one element of a structured buffer through its runtime array.
    StructuredLoad,
    /// Write one element of a structured buffer through its runtime array.
    StructuredStore,
}

pub(crate) fn apply(
    ctx: &mut SpirvContext,
    imp: IntrinsicImpl,
    signature: &FunctionType,
    receiver: Option<Value>,
    args: &[Value],
    span: Span,
) -> Result<Option<Value>> {
    match imp {
        IntrinsicImpl::Glsl(instruction) => ext_call(ctx, instruction, signature, args).map(Some),
        IntrinsicImpl::GlslByElement { float, signed, unsigned } => {
            let instruction = by_element(signature, float, signed, unsigned, span)?;
            ext_call(ctx, instruction, signature, args).map(Some)
        }
        IntrinsicImpl::CoreUnary(op) => core_unary(ctx, op, signature, args, span).map(Some),
        IntrinsicImpl::Saturate => saturate(ctx, signature, args, span).map(Some),
        IntrinsicImpl::Log10 => log10(ctx, signature, args, span).map(Some),
        IntrinsicImpl::FRem => {
            let rt = ctx.register_type(&signature.return_type)?;
            let a = arg(args, 0, span)?;
            let b = arg(args, 1, span)?;
            let id = ctx.builder.f_rem(rt, None, a.id, b.id)?;
            Ok(Some(Value::new(id, rt)))
        }
        IntrinsicImpl::Bitcast => {
            let rt = ctx.register_type(&signature.return_type)?;
            let x = arg(args, 0, span)?;
            let id = ctx.builder.bitcast(rt, None, x.id)?;
            Ok(Some(Value::new(id, rt)))
        }
        IntrinsicImpl::Dot => {
            let rt = ctx.register_type(&signature.return_type)?;
            let a = arg(args, 0, span)?;
            let b = arg(args, 1, span)?;
            let id = ctx.builder.dot(rt, None, a.id, b.id)?;
            Ok(Some(Value::new(id, rt)))
        }
        IntrinsicImpl::Mul => mul(ctx, signature, args, span).map(Some),
        IntrinsicImpl::AllAny { all } => all_any(ctx, all, signature, args, span).map(Some),
        IntrinsicImpl::Atomic(op) => {
            atomic(ctx, op, signature, args, span)?;
            Ok(None)
        }
        IntrinsicImpl::AtomicCompare { exchange } => {
            atomic_compare(ctx, exchange, signature, args, span)?;
            Ok(None)
        }
        IntrinsicImpl::Barrier { group_sync, semantics } => {
            barrier(ctx, group_sync, semantics)?;
            Ok(None)
        }
        IntrinsicImpl::Abort => {
            ctx.require_extension("SPV_KHR_terminate_invocation");
            ctx.builder.terminate_invocation()?;
            Ok(None)
        }
        IntrinsicImpl::Sample { explicit_lod } => {
            sample(ctx, explicit_lod, signature, receiver, args, span).map(Some)
        }
        IntrinsicImpl::TexLoad => tex_load(ctx, signature, receiver, args, span).map(Some),
        IntrinsicImpl::TexRead => tex_read(ctx, signature, receiver, args, span).map(Some),
        IntrinsicImpl::TexStore => {
            let image = receiver_value(ctx, receiver, span)?;
            let coord = arg(args, 0, span)?;
            let value = arg(args, 1, span)?;
            ctx.builder.image_write(image.id, coord.id, value.id, None, [])?;
            Ok(None)
        }
        IntrinsicImpl::BufferLoad => buffer_load(ctx, signature, receiver, args, span).map(Some),
        IntrinsicImpl::BufferStore => {
            buffer_store(ctx, signature, receiver, args, span)?;
            Ok(None)
        }
        IntrinsicImpl::StructuredLoad => {
            structured_load(ctx, signature, receiver, args, span).map(Some)
        }
        IntrinsicImpl::StructuredStore => {
            structured_store(ctx, signature, receiver, args, span)?;
            Ok(None)
        }
    }
}

fn arg(args: &[Value], index: usize, span: Span) -> Result<Value> {
    match args.get(index) {
        Some(value) => Ok(*value),
        None => bail_codegen_at!(span, "built-in call is missing argument {index}"),
    }
}

fn receiver_value(ctx: &mut SpirvContext, receiver: Option<Value>, span: Span) -> Result<Value> {
    let Some(receiver) = receiver else {
        bail_codegen_at!(span, "built-in method needs a receiver object");
    };
    ctx.as_value(receiver)
}

fn ext_call(
    ctx: &mut SpirvContext,
    instruction: u32,
    signature: &FunctionType,
    args: &[Value],
) -> Result<Value> {
    let rt = ctx.register_type(&signature.return_type)?;
    let ids: Vec<Word> = args.iter().map(|a| a.id).collect();
    let id = ctx.glsl_op(rt, instruction, &ids)?;
    Ok(Value::new(id, rt))
}

fn by_element(
    signature: &FunctionType,
    float: u32,
    signed: u32,
    unsigned: u32,
    span: Span,
) -> Result<u32> {
    let Some(kind) = signature.return_type.element_type() else {
        bail_codegen_at!(span, "{} has no element class", signature.return_type);
    };
    if kind.is_floating() {
        Ok(float)
    } else if kind.is_unsigned() {
        Ok(unsigned)
    } else if kind.is_signed() {
        Ok(signed)
    } else {
        bail_codegen_at!(span, "no instruction variant for {kind} elements");
    }
}

fn saturate(
    ctx: &mut SpirvContext,
    signature: &FunctionType,
    args: &[Value],
    span: Span,
) -> Result<Value> {
    let ret = signature.return_type.as_ref();
    let Some(kind) = ret.element_type() else {
        bail_codegen_at!(span, "{ret} has no element class");
    };
    let instruction = if kind.is_floating() {
        glsl::F_CLAMP
    } else if kind.is_unsigned() {
        glsl::U_CLAMP
    } else {
        glsl::S_CLAMP
    };
    let rt = ctx.register_type(ret)?;
    let zero = ctx.const_null(rt);
    let one = scalar_one(ctx, kind)?;
    let one = spread_constant(ctx, ret, rt, one);
    let x = arg(args, 0, span)?;
    let id = ctx.glsl_op(rt, instruction, &[x.id, zero, one])?;
    Ok(Value::new(id, rt))
}

fn log10(
    ctx: &mut SpirvContext,
    signature: &FunctionType,
    args: &[Value],
    span: Span,
) -> Result<Value> {
    let ret = signature.return_type.as_ref();
    let Some(kind) = ret.element_type() else {
        bail_codegen_at!(span, "{ret} has no element class");
    };
    let rt = ctx.register_type(ret)?;
    let x = arg(args, 0, span)?;
    let log2 = ctx.glsl_op(rt, glsl::LOG2, &[x.id])?;
    let scale = ctx.const_float(kind, std::f64::consts::LOG10_2)?;
    let scale = spread_constant(ctx, ret, rt, scale);
    let id = ctx.builder.f_mul(rt, None, log2, scale)?;
    Ok(Value::new(id, rt))
}

fn scalar_one(ctx: &mut SpirvContext, kind: ScalarKind) -> Result<Word> {
    if kind.is_floating() {
        ctx.const_float(kind, 1.0)
    } else {
        ctx.const_int(kind, 1)
    }
}

/// Repeat a scalar constant across a vector shape when the target asks for
/// one; scalars pass through.
fn spread_constant(ctx: &mut SpirvContext, ty: &SymbolType, type_id: Word, scalar: Word) -> Word {
    match ty {
        SymbolType::Vector { size, .. } => {
            ctx.const_composite(type_id, vec![scalar; *size as usize])
        }
        _ => scalar,
    }
}

fn core_unary(
    ctx: &mut SpirvContext,
    op: CoreUnary,
    signature: &FunctionType,
    args: &[Value],
    span: Span,
) -> Result<Value> {
    if matches!(
        op,
        CoreUnary::DpdxCoarse | CoreUnary::DpdyCoarse | CoreUnary::DpdxFine | CoreUnary::DpdyFine
    ) {
        ctx.require_capability(Capability::DerivativeControl);
    }
    let rt = ctx.register_type(&signature.return_type)?;
    let x = arg(args, 0, span)?;
    let id = match op {
        CoreUnary::IsNan => ctx.builder.is_nan(rt, None, x.id)?,
        CoreUnary::IsInf => ctx.builder.is_inf(rt, None, x.id)?,
        CoreUnary::Transpose => ctx.builder.transpose(rt, None, x.id)?,
        CoreUnary::Dpdx => ctx.builder.d_pdx(rt, None, x.id)?,
        CoreUnary::Dpdy => ctx.builder.d_pdy(rt, None, x.id)?,
        CoreUnary::DpdxCoarse => ctx.builder.d_pdx_coarse(rt, None, x.id)?,
        CoreUnary::DpdyCoarse => ctx.builder.d_pdy_coarse(rt, None, x.id)?,
        CoreUnary::DpdxFine => ctx.builder.d_pdx_fine(rt, None, x.id)?,
        CoreUnary::DpdyFine => ctx.builder.d_pdy_fine(rt, None, x.id)?,
        CoreUnary::Fwidth => ctx.builder.fwidth(rt, None, x.id)?,
    };
    Ok(Value::new(id, rt))
}

fn mul(
    ctx: &mut SpirvContext,
    signature: &FunctionType,
    args: &[Value],
    span: Span,
) -> Result<Value> {
    let a = arg(args, 0, span)?;
    let b = arg(args, 1, span)?;
    let [pa, pb] = signature.params.as_slice() else {
        bail_codegen_at!(span, "mul takes exactly two arguments");
    };
    let rt = ctx.register_type(&signature.return_type)?;
    let id = match (&pa.ty, &pb.ty) {
        (SymbolType::Scalar(_), SymbolType::Scalar(_)) => {
            ctx.builder.f_mul(rt, None, a.id, b.id)?
        }
        (SymbolType::Scalar(_), SymbolType::Vector { .. }) => {
            ctx.builder.vector_times_scalar(rt, None, b.id, a.id)?
        }
        (SymbolType::Scalar(_), SymbolType::Matrix { .. }) => {
            ctx.builder.matrix_times_scalar(rt, None, b.id, a.id)?
        }
        (SymbolType::Vector { .. }, SymbolType::Scalar(_)) => {
            ctx.builder.vector_times_scalar(rt, None, a.id, b.id)?
        }
        (SymbolType::Vector { .. }, SymbolType::Vector { .. }) => {
            ctx.builder.dot(rt, None, a.id, b.id)?
        }
        (SymbolType::Vector { .. }, SymbolType::Matrix { .. }) => {
            ctx.builder.vector_times_matrix(rt, None, a.id, b.id)?
        }
        (SymbolType::Matrix { .. }, SymbolType::Scalar(_)) => {
            ctx.builder.matrix_times_scalar(rt, None, a.id, b.id)?
        }
        (SymbolType::Matrix { .. }, SymbolType::Vector { .. }) => {
            ctx.builder.matrix_times_vector(rt, None, a.id, b.id)?
        }
        (SymbolType::Matrix { .. }, SymbolType::Matrix { .. }) => {
            ctx.builder.matrix_times_matrix(rt, None, a.id, b.id)?
        }
        (x, y) => bail_codegen_at!(span, "mul cannot combine {x} and {y}"),
    };
    Ok(Value::new(id, rt))
}

fn all_any(
    ctx: &mut SpirvContext,
    all: bool,
    signature: &FunctionType,
    args: &[Value],
    span: Span,
) -> Result<Value> {
    let x = arg(args, 0, span)?;
    let Some(input) = signature.params.first().map(|p| p.ty.clone()) else {
        bail_codegen_at!(span, "boolean reduction takes one argument");
    };
    let flag = match &input {
        SymbolType::Matrix { base, rows, cols } => {
            let column = SymbolType::vector(*base, *rows);
            let mut per_column = Vec::with_capacity(*cols as usize);
            for c in 0..*cols {
                let col = ctx.composite_extract(&column, x.id, &[c])?;
                let as_bool = to_flags(ctx, col, &column, span)?;
                per_column.push(reduce(ctx, all, as_bool.id, *rows)?);
            }
            let flags = SymbolType::vector(ScalarKind::Bool, *cols);
            let gathered = ctx.composite_construct(&flags, &per_column)?;
            reduce(ctx, all, gathered.id, *cols)?
        }
        other => {
            let as_bool = to_flags(ctx, x, other, span)?;
            reduce(ctx, all, as_bool.id, other.component_count())?
        }
    };
    let rt = ctx.register_type(&SymbolType::BOOL)?;
    Ok(Value::new(flag, rt))
}

fn to_flags(ctx: &mut SpirvContext, value: Value, from: &SymbolType, span: Span) -> Result<Value> {
    let target = from.with_element_type(ScalarKind::Bool);
    ctx.convert(value, from, &target, true, span)
}

fn reduce(ctx: &mut SpirvContext, all: bool, value: Word, count: u32) -> Result<Word> {
    if count <= 1 {
        return Ok(value);
    }
    let rt = ctx.register_type(&SymbolType::BOOL)?;
    Ok(if all {
        ctx.builder.all(rt, None, value)?
    } else {
        ctx.builder.any(rt, None, value)?
    })
}

fn atomic(
    ctx: &mut SpirvContext,
    op: AtomicOp,
    signature: &FunctionType,
    args: &[Value],
    span: Span,
) -> Result<()> {
    let dest = arg(args, 0, span)?;
    let value = arg(args, 1, span)?;
    let kind = atomic_kind(signature, span)?;
    let rt = ctx.register_type(&SymbolType::Scalar(kind))?;
    let scope = ctx.const_int(ScalarKind::UInt, spirv::Scope::Device as i64)?;
    let relaxed = ctx.const_int(ScalarKind::UInt, 0)?;
    let result = match op {
        AtomicOp::Add => ctx.builder.atomic_i_add(rt, None, dest.id, scope, relaxed, value.id)?,
        AtomicOp::And => ctx.builder.atomic_and(rt, None, dest.id, scope, relaxed, value.id)?,
        AtomicOp::Or => ctx.builder.atomic_or(rt, None, dest.id, scope, relaxed, value.id)?,
        AtomicOp::Xor => ctx.builder.atomic_xor(rt, None, dest.id, scope, relaxed, value.id)?,
        AtomicOp::Min => {
            if kind.is_unsigned() {
                ctx.builder.atomic_u_min(rt, None, dest.id, scope, relaxed, value.id)?
            } else {
                ctx.builder.atomic_s_min(rt, None, dest.id, scope, relaxed, value.id)?
            }
        }
        AtomicOp::Max => {
            if kind.is_unsigned() {
                ctx.builder.atomic_u_max(rt, None, dest.id, scope, relaxed, value.id)?
            } else {
                ctx.builder.atomic_s_max(rt, None, dest.id, scope, relaxed, value.id)?
            }
        }
        AtomicOp::Exchange => {
            ctx.builder.atomic_exchange(rt, None, dest.id, scope, relaxed, value.id)?
        }
    };
    if let Some(original) = args.get(2) {
        ctx.store(original.id, result)?;
    }
    Ok(())
}

fn atomic_compare(
    ctx: &mut SpirvContext,
    exchange: bool,
    signature: &FunctionType,
    args: &[Value],
    span: Span,
) -> Result<()> {
    let dest = arg(args, 0, span)?;
    let compare = arg(args, 1, span)?;
    let value = arg(args, 2, span)?;
    let kind = atomic_kind(signature, span)?;
    let rt = ctx.register_type(&SymbolType::Scalar(kind))?;
    let scope = ctx.const_int(ScalarKind::UInt, spirv::Scope::Device as i64)?;
    let relaxed = ctx.const_int(ScalarKind::UInt, 0)?;
    let result = ctx.builder.atomic_compare_exchange(
        rt, None, dest.id, scope, relaxed, relaxed, value.id, compare.id,
    )?;
    if exchange {
        if let Some(original) = args.get(3) {
            ctx.store(original.id, result)?;
        }
    }
    Ok(())
}

fn atomic_kind(signature: &FunctionType, span: Span) -> Result<ScalarKind> {
    match signature.params.first().map(|p| &p.ty) {
        Some(SymbolType::Scalar(kind)) if kind.is_integer() => Ok(*kind),
        _ => bail_codegen_at!(span, "atomic destination must be a scalar integer"),
    }
}

fn barrier(ctx: &mut SpirvContext, group_sync: bool, semantics: u32) -> Result<()> {
    let mask = ctx.const_int(ScalarKind::UInt, semantics as i64)?;
    let device = ctx.const_int(ScalarKind::UInt, spirv::Scope::Device as i64)?;
    if group_sync {
        let workgroup = ctx.const_int(ScalarKind::UInt, spirv::Scope::Workgroup as i64)?;
        ctx.builder.control_barrier(workgroup, device, mask)?;
    } else {
        ctx.builder.memory_barrier(device, mask)?;
    }
    Ok(())
}

fn sample(
    ctx: &mut SpirvContext,
    explicit_lod: bool,
    signature: &FunctionType,
    receiver: Option<Value>,
    args: &[Value],
    span: Span,
) -> Result<Value> {
    let image = receiver_value(ctx, receiver, span)?;
    let Some(texture) = ctx.lookup_type(image.type_id).cloned() else {
        bail_codegen_at!(span, "sampling needs a texture receiver");
    };
    // Separate-sampler textures bind the sampler argument into a combined
    // value first; combined receivers load one directly.
    let combined = match &texture {
        SymbolType::Texture { access: TextureAccess::Combined, .. } => image.id,
        SymbolType::Texture { dim, arrayed, multisampled, sampled, .. } => {
            let sampler = arg(args, 0, span)?;
            let combined_ty = SymbolType::Texture {
                dim: *dim,
                arrayed: *arrayed,
                multisampled: *multisampled,
                access: TextureAccess::Combined,
                sampled: *sampled,
            };
            let combined_id = ctx.register_type(&combined_ty)?;
            ctx.builder.sampled_image(combined_id, None, image.id, sampler.id)?
        }
        other => bail_codegen_at!(span, "cannot sample {other}"),
    };
    let coord_index =
        usize::from(matches!(signature.params.first().map(|p| &p.ty), Some(SymbolType::Sampler)));
    let coord = arg(args, coord_index, span)?;
    let rt = ctx.register_type(&signature.return_type)?;
    let id = if explicit_lod {
        let lod = arg(args, coord_index + 1, span)?;
        ctx.builder.image_sample_explicit_lod(
            rt,
            None,
            combined,
            coord.id,
            spirv::ImageOperands::LOD,
            [Operand::IdRef(lod.id)],
        )?
    } else {
        ctx.builder.image_sample_implicit_lod(rt, None, combined, coord.id, None, [])?
    };
    Ok(Value::new(id, rt))
}

fn tex_load(
    ctx: &mut SpirvContext,
    signature: &FunctionType,
    receiver: Option<Value>,
    args: &[Value],
    span: Span,
) -> Result<Value> {
    let image = receiver_value(ctx, receiver, span)?;
    // A combined receiver wraps the image in a sampled-image value; fetch
    // takes the image itself.
    let image = match ctx.lookup_type(image.type_id).cloned() {
        Some(SymbolType::Texture {
            dim,
            arrayed,
            multisampled,
            access: TextureAccess::Combined,
            sampled,
        }) => {
            let plain = SymbolType::Texture {
                dim,
                arrayed,
                multisampled,
                access: TextureAccess::ReadOnly,
                sampled,
            };
            let plain_id = ctx.register_type(&plain)?;
            let id = ctx.builder.image(plain_id, None, image.id)?;
            Value::new(id, plain_id)
        }
        _ => image,
    };
    let location = arg(args, 0, span)?;
    let Some(SymbolType::Vector { base, size }) = signature.params.first().map(|p| p.ty.clone())
    else {
        bail_codegen_at!(span, "texture load location must be an integer vector");
    };
    let coord_size = size - 1;
    let scalar = SymbolType::Scalar(base);
    let lod = ctx.composite_extract(&scalar, location.id, &[coord_size])?;
    let coord = if coord_size == 1 {
        ctx.composite_extract(&scalar, location.id, &[0])?
    } else {
        let coord_ty = SymbolType::vector(base, coord_size);
        let coord_id = ctx.register_type(&coord_ty)?;
        let components: Vec<u32> = (0..coord_size).collect();
        let id = ctx.builder.vector_shuffle(coord_id, None, location.id, location.id, components)?;
        Value::new(id, coord_id)
    };
    let rt = ctx.register_type(&signature.return_type)?;
    let id = ctx.builder.image_fetch(
        rt,
        None,
        image.id,
        coord.id,
        Some(spirv::ImageOperands::LOD),
        [Operand::IdRef(lod.id)],
    )?;
    Ok(Value::new(id, rt))
}

fn tex_read(
    ctx: &mut SpirvContext,
    signature: &FunctionType,
    receiver: Option<Value>,
    args: &[Value],
    span: Span,
) -> Result<Value> {
    let image = receiver_value(ctx, receiver, span)?;
    let coord = arg(args, 0, span)?;
    let rt = ctx.register_type(&signature.return_type)?;
    let id = ctx.builder.image_read(rt, None, image.id, coord.id, None, [])?;
    Ok(Value::new(id, rt))
}

fn buffer_load(
    ctx: &mut SpirvContext,
    signature: &FunctionType,
    receiver: Option<Value>,
    args: &[Value],
    span: Span,
) -> Result<Value> {
    let image = receiver_value(ctx, receiver, span)?;
    let index = arg(args, 0, span)?;
    let ret = signature.return_type.as_ref();
    let Some(kind) = ret.element_type() else {
        bail_codegen_at!(span, "buffer element {ret} has no scalar base");
    };
    let writable =
        matches!(ctx.lookup_type(image.type_id), Some(SymbolType::Buffer { write_allowed: true, .. }));
    // A texel fetch always yields four components; narrow to the element.
    let texel_ty = SymbolType::vector(kind, 4);
    let texel_id = ctx.register_type(&texel_ty)?;
    let texel = if writable {
        ctx.builder.image_read(texel_id, None, image.id, index.id, None, [])?
    } else {
        ctx.builder.image_fetch(texel_id, None, image.id, index.id, None, [])?
    };
    let rt = ctx.register_type(ret)?;
    match ret {
        SymbolType::Vector { size: 4, .. } => Ok(Value::new(texel, rt)),
        SymbolType::Vector { size, .. } => {
            let components: Vec<u32> = (0..*size).collect();
            let id = ctx.builder.vector_shuffle(rt, None, texel, texel, components)?;
            Ok(Value::new(id, rt))
        }
        _ => ctx.composite_extract(ret, texel, &[0]),
    }
}

fn buffer_store(
    ctx: &mut SpirvContext,
    signature: &FunctionType,
    receiver: Option<Value>,
    args: &[Value],
    span: Span,
) -> Result<()> {
    let image = receiver_value(ctx, receiver, span)?;
    let index = arg(args, 0, span)?;
    let value = arg(args, 1, span)?;
    let Some(elem) = signature.params.get(1).map(|p| p.ty.clone()) else {
        bail_codegen_at!(span, "buffer store needs an element argument");
    };
    let Some(kind) = elem.element_type() else {
        bail_codegen_at!(span, "buffer element {elem} has no scalar base");
    };
    // The image format carries four components; pad the texel out.
    let count = elem.component_count();
    let texel = if count == 4 {
        value.id
    } else {
        let zero = if kind.is_floating() {
            ctx.const_float(kind, 0.0)?
        } else {
            ctx.const_int(kind, 0)?
        };
        let mut parts = vec![value.id];
        parts.extend(std::iter::repeat(zero).take((4 - count) as usize));
        ctx.composite_construct(&SymbolType::vector(kind, 4), &parts)?.id
    };
    ctx.builder.image_write(image.id, index.id, texel, None, [])?;
    Ok(())
}

fn structured_load(
    ctx: &mut SpirvContext,
    signature: &FunctionType,
    receiver: Option<Value>,
    args: &[Value],
    span: Span,
) -> Result<Value> {
    let element = structured_element(ctx, receiver, args, &signature.return_type, span)?;
    ctx.as_value(element)
}

fn structured_store(
    ctx: &mut SpirvContext,
    signature: &FunctionType,
    receiver: Option<Value>,
    args: &[Value],
    span: Span,
) -> Result<()> {
    let Some(elem) = signature.params.get(1).map(|p| p.ty.clone()) else {
        bail_codegen_at!(span, "buffer store needs an element argument");
    };
    let element = structured_element(ctx, receiver, args, &elem, span)?;
    let value = arg(args, 1, span)?;
    ctx.store(element.id, value.id)
}

/// Pointer to one element of a structured buffer. The receiver arrives as
/// the buffer variable itself; the chain threads the block's sole member,
/// a runtime array, then the element index.
fn structured_element(
    ctx: &mut SpirvContext,
    receiver: Option<Value>,
    args: &[Value],
    elem: &SymbolType,
    span: Span,
) -> Result<Value> {
    let Some(buffer) = receiver else {
        bail_codegen_at!(span, "built-in method needs a receiver object");
    };
    let Some((_, storage)) = ctx.pointee_of(buffer.type_id) else {
        bail_codegen_at!(span, "buffer access requires a variable");
    };
    let index = arg(args, 0, span)?;
    let member = ctx.const_int(ScalarKind::Int, 0)?;
    ctx.access_chain(elem, storage, buffer.id, &[member, index.id])
}
