//! The built-in declarations, one template per name.
//!
//! Free slots here multiply out: `elementwise(AnyFloat)` alone denotes the
//! scalar, every vector and every matrix shape in both float widths. The
//! trigonometric and exponential names stay on 32-bit floats because the
//! extended instruction set defines them only there; rounding, clamping and
//! the geometric names take doubles as well.

use rspirv::spirv::MemorySemantics;

use crate::types::{ParamModifier, ScalarKind, SymbolType, TextureAccess, TextureDim};

use super::emit::{glsl, AtomicOp, CoreUnary, IntrinsicImpl};
use super::{BaseClass, IntrinsicDef, SizeSpec, Slot};

use SizeSpec::{Any, Fixed, Named};

/// Free slot over a class in every scalar, vector and matrix shape.
fn elementwise(class: BaseClass) -> Slot {
    Slot::class(class).x(Any).y(Any)
}

/// Free slot over a class in scalar and vector shapes only.
fn vector_of(class: BaseClass) -> Slot {
    Slot::class(class).x(Any)
}

fn unary(class: BaseClass, imp: IntrinsicImpl) -> IntrinsicDef {
    IntrinsicDef::plain(Slot::shaped_like(1), vec![elementwise(class)], imp)
}

fn binary(class: BaseClass, imp: IntrinsicImpl) -> IntrinsicDef {
    IntrinsicDef::plain(
        Slot::shaped_like(1),
        vec![elementwise(class), Slot::shaped_like(1)],
        imp,
    )
}

fn ternary(class: BaseClass, imp: IntrinsicImpl) -> IntrinsicDef {
    IntrinsicDef::plain(
        Slot::shaped_like(1),
        vec![elementwise(class), Slot::shaped_like(1), Slot::shaped_like(1)],
        imp,
    )
}

/// Reinterpret the bits of one 32-bit element class as another, shape kept.
fn reinterpret(to: BaseClass, from: BaseClass) -> IntrinsicDef {
    IntrinsicDef::plain(
        Slot::class(to).x(Any).layout_of(1),
        vec![vector_of(from)],
        IntrinsicImpl::Bitcast,
    )
}

fn derivative(op: CoreUnary) -> IntrinsicDef {
    IntrinsicDef::plain(
        Slot::shaped_like(1),
        vec![vector_of(BaseClass::Float)],
        IntrinsicImpl::CoreUnary(op),
    )
}

fn barrier(group_sync: bool, semantics: u32) -> Vec<IntrinsicDef> {
    vec![IntrinsicDef::plain(
        Slot::class(BaseClass::Void),
        vec![],
        IntrinsicImpl::Barrier { group_sync, semantics },
    )]
}

fn all_memory() -> u32 {
    (MemorySemantics::UNIFORM_MEMORY
        | MemorySemantics::WORKGROUP_MEMORY
        | MemorySemantics::IMAGE_MEMORY
        | MemorySemantics::ACQUIRE_RELEASE)
        .bits()
}

fn device_memory() -> u32 {
    (MemorySemantics::UNIFORM_MEMORY
        | MemorySemantics::IMAGE_MEMORY
        | MemorySemantics::ACQUIRE_RELEASE)
        .bits()
}

fn group_memory() -> u32 {
    (MemorySemantics::WORKGROUP_MEMORY | MemorySemantics::ACQUIRE_RELEASE).bits()
}

/// The `Interlocked*` family: a two-argument form, and a three-argument form
/// returning the prior value through `original`.
fn atomic(op: AtomicOp) -> Vec<IntrinsicDef> {
    vec![
        IntrinsicDef::new(
            Slot::class(BaseClass::Void),
            vec![
                (Slot::class(BaseClass::AnyInt32), ParamModifier::InOut),
                (Slot::matched(1), ParamModifier::None),
            ],
            IntrinsicImpl::Atomic(op),
        ),
        atomic_with_original(op),
    ]
}

fn atomic_with_original(op: AtomicOp) -> IntrinsicDef {
    IntrinsicDef::new(
        Slot::class(BaseClass::Void),
        vec![
            (Slot::class(BaseClass::AnyInt32), ParamModifier::InOut),
            (Slot::matched(1), ParamModifier::None),
            (Slot::matched(1), ParamModifier::Out),
        ],
        IntrinsicImpl::Atomic(op),
    )
}

pub(super) fn global_defs(name: &str) -> Option<Vec<IntrinsicDef>> {
    use BaseClass::{AnyFloat, Float, Int, Numeric};
    use IntrinsicImpl::{
        Abort, AllAny, AtomicCompare, Dot, FRem, Glsl, GlslByElement, Log10, Saturate,
    };
    let defs = match name {
        "sin" => vec![unary(Float, Glsl(glsl::SIN))],
        "cos" => vec![unary(Float, Glsl(glsl::COS))],
        "tan" => vec![unary(Float, Glsl(glsl::TAN))],
        "asin" => vec![unary(Float, Glsl(glsl::ASIN))],
        "acos" => vec![unary(Float, Glsl(glsl::ACOS))],
        "atan" => vec![unary(Float, Glsl(glsl::ATAN))],
        "atan2" => vec![binary(Float, Glsl(glsl::ATAN2))],
        "sinh" => vec![unary(Float, Glsl(glsl::SINH))],
        "cosh" => vec![unary(Float, Glsl(glsl::COSH))],
        "tanh" => vec![unary(Float, Glsl(glsl::TANH))],
        "exp" => vec![unary(Float, Glsl(glsl::EXP))],
        "exp2" => vec![unary(Float, Glsl(glsl::EXP2))],
        "log" => vec![unary(Float, Glsl(glsl::LOG))],
        "log2" => vec![unary(Float, Glsl(glsl::LOG2))],
        "log10" => vec![unary(Float, Log10)],
        "pow" => vec![binary(Float, Glsl(glsl::POW))],
        "radians" => vec![unary(Float, Glsl(glsl::RADIANS))],
        "degrees" => vec![unary(Float, Glsl(glsl::DEGREES))],

        "sqrt" => vec![unary(AnyFloat, Glsl(glsl::SQRT))],
        "rsqrt" => vec![unary(AnyFloat, Glsl(glsl::INVERSE_SQRT))],
        "floor" => vec![unary(AnyFloat, Glsl(glsl::FLOOR))],
        "ceil" => vec![unary(AnyFloat, Glsl(glsl::CEIL))],
        "frac" => vec![unary(AnyFloat, Glsl(glsl::FRACT))],
        "trunc" => vec![unary(AnyFloat, Glsl(glsl::TRUNC))],
        "round" => vec![unary(AnyFloat, Glsl(glsl::ROUND))],
        "abs" => vec![unary(AnyFloat, Glsl(glsl::F_ABS)), unary(Int, Glsl(glsl::S_ABS))],
        "sign" => vec![unary(AnyFloat, Glsl(glsl::F_SIGN)), unary(Int, Glsl(glsl::S_SIGN))],
        "saturate" => vec![unary(AnyFloat, Saturate)],
        "fmod" => vec![binary(AnyFloat, FRem)],
        "lerp" => vec![ternary(AnyFloat, Glsl(glsl::F_MIX))],
        "step" => vec![binary(AnyFloat, Glsl(glsl::STEP))],
        "smoothstep" => vec![ternary(AnyFloat, Glsl(glsl::SMOOTH_STEP))],
        "fma" | "mad" => vec![ternary(AnyFloat, Glsl(glsl::FMA))],

        "min" => vec![binary(
            Numeric,
            GlslByElement { float: glsl::F_MIN, signed: glsl::S_MIN, unsigned: glsl::U_MIN },
        )],
        "max" => vec![binary(
            Numeric,
            GlslByElement { float: glsl::F_MAX, signed: glsl::S_MAX, unsigned: glsl::U_MAX },
        )],
        "clamp" => vec![ternary(
            Numeric,
            GlslByElement { float: glsl::F_CLAMP, signed: glsl::S_CLAMP, unsigned: glsl::U_CLAMP },
        )],

        "length" => vec![IntrinsicDef::plain(
            Slot::matched(1),
            vec![vector_of(AnyFloat)],
            Glsl(glsl::LENGTH),
        )],
        "distance" => vec![IntrinsicDef::plain(
            Slot::matched(1),
            vec![vector_of(AnyFloat), Slot::shaped_like(1)],
            Glsl(glsl::DISTANCE),
        )],
        "normalize" => vec![IntrinsicDef::plain(
            Slot::shaped_like(1),
            vec![vector_of(AnyFloat)],
            Glsl(glsl::NORMALIZE),
        )],
        "dot" => vec![IntrinsicDef::plain(
            Slot::matched(1),
            vec![vector_of(AnyFloat), Slot::shaped_like(1)],
            Dot,
        )],
        "cross" => vec![IntrinsicDef::plain(
            Slot::shaped_like(1),
            vec![Slot::class(AnyFloat).x(Fixed(3)), Slot::shaped_like(1)],
            Glsl(glsl::CROSS),
        )],
        "reflect" => vec![IntrinsicDef::plain(
            Slot::shaped_like(1),
            vec![vector_of(AnyFloat), Slot::shaped_like(1)],
            Glsl(glsl::REFLECT),
        )],
        "refract" => vec![IntrinsicDef::plain(
            Slot::shaped_like(1),
            vec![vector_of(AnyFloat), Slot::shaped_like(1), Slot::matched(1)],
            Glsl(glsl::REFRACT),
        )],
        "faceforward" => vec![IntrinsicDef::plain(
            Slot::shaped_like(1),
            vec![vector_of(AnyFloat), Slot::shaped_like(1), Slot::shaped_like(1)],
            Glsl(glsl::FACE_FORWARD),
        )],

        "determinant" => vec![IntrinsicDef::plain(
            Slot::matched(1),
            vec![Slot::class(AnyFloat).x(Named("n")).y(Named("n"))],
            Glsl(glsl::DETERMINANT),
        )],
        "transpose" => vec![IntrinsicDef::plain(
            Slot::matched(1).x(Named("r")).y(Named("c")),
            vec![Slot::class(AnyFloat).x(Named("c")).y(Named("r"))],
            IntrinsicImpl::CoreUnary(CoreUnary::Transpose),
        )],
        "mul" => mul_defs(),

        "all" => vec![IntrinsicDef::plain(
            Slot::class(BaseClass::Bool),
            vec![elementwise(BaseClass::Any)],
            AllAny { all: true },
        )],
        "any" => vec![IntrinsicDef::plain(
            Slot::class(BaseClass::Bool),
            vec![elementwise(BaseClass::Any)],
            AllAny { all: false },
        )],
        "isnan" => vec![IntrinsicDef::plain(
            Slot::class(BaseClass::Bool).x(Any).layout_of(1),
            vec![vector_of(AnyFloat)],
            IntrinsicImpl::CoreUnary(CoreUnary::IsNan),
        )],
        "isinf" => vec![IntrinsicDef::plain(
            Slot::class(BaseClass::Bool).x(Any).layout_of(1),
            vec![vector_of(AnyFloat)],
            IntrinsicImpl::CoreUnary(CoreUnary::IsInf),
        )],

        "asfloat" => vec![reinterpret(Float, Int), reinterpret(Float, BaseClass::Uint)],
        "asint" => vec![reinterpret(Int, BaseClass::Uint), reinterpret(Int, Float)],
        "asuint" => vec![reinterpret(BaseClass::Uint, Int), reinterpret(BaseClass::Uint, Float)],

        "ddx" => vec![derivative(CoreUnary::Dpdx)],
        "ddy" => vec![derivative(CoreUnary::Dpdy)],
        "ddx_coarse" => vec![derivative(CoreUnary::DpdxCoarse)],
        "ddy_coarse" => vec![derivative(CoreUnary::DpdyCoarse)],
        "ddx_fine" => vec![derivative(CoreUnary::DpdxFine)],
        "ddy_fine" => vec![derivative(CoreUnary::DpdyFine)],
        "fwidth" => vec![derivative(CoreUnary::Fwidth)],

        "AllMemoryBarrier" => barrier(false, all_memory()),
        "AllMemoryBarrierWithGroupSync" => barrier(true, all_memory()),
        "DeviceMemoryBarrier" => barrier(false, device_memory()),
        "DeviceMemoryBarrierWithGroupSync" => barrier(true, device_memory()),
        "GroupMemoryBarrier" => barrier(false, group_memory()),
        "GroupMemoryBarrierWithGroupSync" => barrier(true, group_memory()),
        "abort" => vec![IntrinsicDef::plain(Slot::class(BaseClass::Void), vec![], Abort)],

        "InterlockedAdd" => atomic(AtomicOp::Add),
        "InterlockedAnd" => atomic(AtomicOp::And),
        "InterlockedOr" => atomic(AtomicOp::Or),
        "InterlockedXor" => atomic(AtomicOp::Xor),
        "InterlockedMin" => atomic(AtomicOp::Min),
        "InterlockedMax" => atomic(AtomicOp::Max),
        "InterlockedExchange" => vec![atomic_with_original(AtomicOp::Exchange)],
        "InterlockedCompareExchange" => vec![IntrinsicDef::new(
            Slot::class(BaseClass::Void),
            vec![
                (Slot::class(BaseClass::AnyInt32), ParamModifier::InOut),
                (Slot::matched(1), ParamModifier::None),
                (Slot::matched(1), ParamModifier::None),
                (Slot::matched(1), ParamModifier::Out),
            ],
            AtomicCompare { exchange: true },
        )],
        "InterlockedCompareStore" => vec![IntrinsicDef::new(
            Slot::class(BaseClass::Void),
            vec![
                (Slot::class(BaseClass::AnyInt32), ParamModifier::InOut),
                (Slot::matched(1), ParamModifier::None),
                (Slot::matched(1), ParamModifier::None),
            ],
            AtomicCompare { exchange: false },
        )],

        _ => return None,
    };
    Some(defs)
}

/// `mul` follows the operand shapes: scalars scale, two vectors contract to
/// a dot product, and the vector/matrix pairings pick the product whose
/// inner dimension lines up. The named axes keep only the well-formed
/// pairings in the overload set.
fn mul_defs() -> Vec<IntrinsicDef> {
    use BaseClass::AnyFloat;
    let scalar = || Slot::class(AnyFloat);
    let same_scalar = || Slot::matched(1);
    let matrix = |x: &'static str, y: &'static str| Slot::class(AnyFloat).x(Named(x)).y(Named(y));
    let same_matrix = |x: &'static str, y: &'static str| Slot::matched(1).x(Named(x)).y(Named(y));
    let mul = |ret, a, b| IntrinsicDef::plain(ret, vec![a, b], IntrinsicImpl::Mul);
    vec![
        mul(Slot::matched(1), scalar(), same_scalar()),
        mul(Slot::shaped_like(2), scalar(), Slot::matched(1).x(Any)),
        mul(Slot::shaped_like(1), vector_of(AnyFloat), same_scalar()),
        mul(same_matrix("c", "r"), scalar(), same_matrix("c", "r")),
        mul(same_matrix("c", "r"), matrix("c", "r"), same_scalar()),
        mul(Slot::matched(1), vector_of(AnyFloat), Slot::shaped_like(1)),
        mul(
            Slot::matched(1).x(Named("c")),
            Slot::class(AnyFloat).x(Named("n")),
            same_matrix("c", "n"),
        ),
        mul(
            Slot::matched(1).x(Named("r")),
            matrix("c", "r"),
            Slot::matched(1).x(Named("c")),
        ),
        mul(
            same_matrix("c", "r"),
            matrix("n", "r"),
            same_matrix("c", "n"),
        ),
    ]
}

pub(super) fn method_defs(receiver: &SymbolType, name: &str) -> Option<Vec<IntrinsicDef>> {
    match receiver {
        SymbolType::Texture { access, dim, arrayed, .. } => {
            texture_method(*access, *dim, *arrayed, name)
        }
        SymbolType::Buffer { base, write_allowed } => buffer_method(base, *write_allowed, name),
        SymbolType::StructuredBuffer { base, write_allowed } => {
            structured_method(base, *write_allowed, name)
        }
        _ => None,
    }
}

fn texture_method(
    access: TextureAccess,
    dim: TextureDim,
    arrayed: bool,
    name: &str,
) -> Option<Vec<IntrinsicDef>> {
    let coords = dim.coordinate_count() + u32::from(arrayed);
    let float_coords = || Slot::exact(SymbolType::shaped(ScalarKind::Float, coords, 1));
    // Fetch locations carry the mip level in a trailing component.
    let fetch_location = Slot::exact(SymbolType::vector(ScalarKind::Int, coords + 1));
    let texel_location = Slot::exact(SymbolType::shaped(ScalarKind::Int, coords, 1));
    let lod = Slot::exact(SymbolType::FLOAT);
    let sampler = Slot::exact(SymbolType::Sampler);
    let def = match (access, name) {
        (TextureAccess::ReadOnly, "Sample") => IntrinsicDef::plain(
            Slot::from_receiver(),
            vec![sampler, float_coords()],
            IntrinsicImpl::Sample { explicit_lod: false },
        ),
        (TextureAccess::ReadOnly, "SampleLevel") => IntrinsicDef::plain(
            Slot::from_receiver(),
            vec![sampler, float_coords(), lod],
            IntrinsicImpl::Sample { explicit_lod: true },
        ),
        (TextureAccess::ReadOnly, "Load") => IntrinsicDef::plain(
            Slot::from_receiver(),
            vec![fetch_location],
            IntrinsicImpl::TexLoad,
        ),
        (TextureAccess::Combined, "Sample") => IntrinsicDef::plain(
            Slot::from_receiver(),
            vec![float_coords()],
            IntrinsicImpl::Sample { explicit_lod: false },
        ),
        (TextureAccess::Combined, "SampleLevel") => IntrinsicDef::plain(
            Slot::from_receiver(),
            vec![float_coords(), lod],
            IntrinsicImpl::Sample { explicit_lod: true },
        ),
        (TextureAccess::Combined, "Load") => IntrinsicDef::plain(
            Slot::from_receiver(),
            vec![fetch_location],
            IntrinsicImpl::TexLoad,
        ),
        (TextureAccess::ReadWrite, "Load") => IntrinsicDef::plain(
            Slot::from_receiver(),
            vec![texel_location],
            IntrinsicImpl::TexRead,
        ),
        (TextureAccess::ReadWrite, "Store") => IntrinsicDef::plain(
            Slot::class(BaseClass::Void),
            vec![texel_location, Slot::from_receiver()],
            IntrinsicImpl::TexStore,
        ),
        _ => return None,
    };
    Some(vec![def])
}

fn buffer_method(
    base: &SymbolType,
    write_allowed: bool,
    name: &str,
) -> Option<Vec<IntrinsicDef>> {
    let def = match name {
        "Load" => IntrinsicDef::plain(
            Slot::from_receiver(),
            vec![Slot::exact(SymbolType::INT)],
            IntrinsicImpl::BufferLoad,
        ),
        "Store" if write_allowed => IntrinsicDef::plain(
            Slot::class(BaseClass::Void),
            vec![Slot::exact(SymbolType::INT), Slot::exact(base.clone())],
            IntrinsicImpl::BufferStore,
        ),
        _ => return None,
    };
    Some(vec![def])
}

/// Structured buffers address their elements through the block's runtime
/// array, so any element type with a fixed layout works.
fn structured_method(
    base: &SymbolType,
    write_allowed: bool,
    name: &str,
) -> Option<Vec<IntrinsicDef>> {
    let def = match name {
        "Load" => IntrinsicDef::plain(
            Slot::exact(base.clone()),
            vec![Slot::exact(SymbolType::INT)],
            IntrinsicImpl::StructuredLoad,
        ),
        "Store" if write_allowed => IntrinsicDef::plain(
            Slot::class(BaseClass::Void),
            vec![Slot::exact(SymbolType::INT), Slot::exact(base.clone())],
            IntrinsicImpl::StructuredStore,
        ),
        _ => return None,
    };
    Some(vec![def])
}
