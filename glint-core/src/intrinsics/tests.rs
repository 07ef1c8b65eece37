use std::collections::HashSet;
use std::sync::Arc;

use crate::overload::{select_overload, Selection};
use crate::types::{FunctionType, ParamModifier, ScalarKind, SymbolType, TextureAccess, TextureDim};

use super::{
    expander, glsl, BaseClass, IntrinsicDef, IntrinsicImpl, IntrinsicOverload, Intrinsics,
    SizeSpec, Slot,
};

fn float_vec(size: u32) -> SymbolType {
    SymbolType::vector(ScalarKind::Float, size)
}

fn overloads(name: &str) -> Arc<Vec<IntrinsicOverload>> {
    Intrinsics::new().global(name).unwrap().unwrap()
}

#[test]
fn test_elementwise_template_covers_both_float_widths() {
    let set = overloads("sqrt");
    let covers = |ty: &SymbolType| {
        set.iter()
            .any(|o| o.signature.params[0].ty == *ty && *o.signature.return_type == *ty)
    };
    assert!(covers(&SymbolType::FLOAT));
    assert!(covers(&float_vec(3)));
    assert!(covers(&SymbolType::Scalar(ScalarKind::Double)));
    assert!(covers(&SymbolType::matrix(ScalarKind::Float, 4, 4)));
    assert!(!set.iter().any(|o| o.signature.params[0].ty == SymbolType::INT));
}

#[test]
fn test_expansion_never_repeats_a_signature() {
    for name in ["sqrt", "min", "clamp", "mul", "all"] {
        let set = overloads(name);
        let mut seen = HashSet::new();
        for over in set.iter() {
            assert!(seen.insert((*over.signature).clone()), "{name} repeats {:?}", over.signature);
        }
    }
}

#[test]
fn test_matrix_shapes_carry_a_column_loop() {
    let set = overloads("min");
    let matrix = SymbolType::matrix(ScalarKind::Float, 3, 2);
    let looped = set.iter().find(|o| o.signature.params[0].ty == matrix).unwrap();
    let auto_loop = looped.auto_loop.as_ref().unwrap();
    assert_eq!(auto_loop.columns, 2);
    assert_eq!(auto_loop.slots, vec![0, 1, 2]);

    let plain = set.iter().find(|o| o.signature.params[0].ty == float_vec(3)).unwrap();
    assert!(plain.auto_loop.is_none());
}

#[test]
fn test_reductions_take_matrices_whole() {
    let set = overloads("all");
    let matrix = SymbolType::matrix(ScalarKind::Float, 3, 3);
    let over = set.iter().find(|o| o.signature.params[0].ty == matrix).unwrap();
    assert!(over.auto_loop.is_none());
    assert_eq!(*over.signature.return_type, SymbolType::BOOL);
}

#[test]
fn test_exact_call_selects_its_overload() {
    let set = overloads("sqrt");
    let signatures: Vec<&FunctionType> = set.iter().map(|o| o.signature.as_ref()).collect();
    let Selection::Unique(index) = select_overload(signatures, &[float_vec(3)]) else {
        panic!("expected a unique overload");
    };
    assert_eq!(set[index].signature.params[0].ty, float_vec(3));
}

#[test]
fn test_mul_pairs_inner_dimensions() {
    let set = overloads("mul");

    let by_params = |a: &SymbolType, b: &SymbolType| {
        set.iter().find(|o| o.signature.params[0].ty == *a && o.signature.params[1].ty == *b)
    };
    let m23 = SymbolType::matrix(ScalarKind::Float, 2, 3);
    let against_vector = by_params(&m23, &float_vec(3)).unwrap();
    assert_eq!(*against_vector.signature.return_type, float_vec(2));

    let contraction = by_params(&float_vec(3), &float_vec(3)).unwrap();
    assert_eq!(*contraction.signature.return_type, SymbolType::FLOAT);

    let m34 = SymbolType::matrix(ScalarKind::Float, 3, 4);
    let product = by_params(&m23, &m34).unwrap();
    assert_eq!(*product.signature.return_type, SymbolType::matrix(ScalarKind::Float, 2, 4));

    // No pairing admits a mismatched inner dimension.
    assert!(by_params(&float_vec(2), &float_vec(3)).is_none());
    assert!(by_params(&m34, &float_vec(3)).is_none());
}

#[test]
fn test_transpose_swaps_the_declared_shape() {
    let set = overloads("transpose");
    let m24 = SymbolType::matrix(ScalarKind::Float, 2, 4);
    let over = set.iter().find(|o| o.signature.params[0].ty == m24).unwrap();
    assert_eq!(*over.signature.return_type, SymbolType::matrix(ScalarKind::Float, 4, 2));
    assert!(over.auto_loop.is_none());
    // Vectors have no transpose; the named axes exclude the degenerate dim.
    assert!(!set.iter().any(|o| matches!(o.signature.params[0].ty, SymbolType::Vector { .. })));
}

#[test]
fn test_atomics_expand_both_argument_counts() {
    let set = overloads("InterlockedAdd");
    assert_eq!(set.len(), 4);
    let with_original = set
        .iter()
        .find(|o| o.signature.params.len() == 3 && o.signature.params[0].ty == SymbolType::INT)
        .unwrap();
    let modes: Vec<ParamModifier> =
        with_original.signature.params.iter().map(|p| p.modifier).collect();
    assert_eq!(modes, vec![ParamModifier::InOut, ParamModifier::None, ParamModifier::Out]);
    assert!(with_original.signature.return_type.is_void());
}

#[test]
fn test_barriers_take_no_arguments() {
    let set = overloads("GroupMemoryBarrierWithGroupSync");
    assert_eq!(set.len(), 1);
    assert!(set[0].signature.params.is_empty());
    assert!(set[0].signature.return_type.is_void());
}

#[test]
fn test_unknown_names_are_not_built_ins() {
    assert!(Intrinsics::new().global("definitely_not_a_built_in").unwrap().is_none());
}

#[test]
fn test_sampling_methods_come_from_the_receiver() {
    let texture = SymbolType::Texture {
        dim: TextureDim::Dim2D,
        arrayed: false,
        multisampled: false,
        access: TextureAccess::ReadOnly,
        sampled: ScalarKind::Float,
    };
    let library = Intrinsics::new();
    let set = library.method(&texture, "Sample").unwrap().unwrap();
    assert_eq!(set.len(), 1);
    let signature = &set[0].signature;
    assert_eq!(signature.params[0].ty, SymbolType::Sampler);
    assert_eq!(signature.params[1].ty, float_vec(2));
    assert_eq!(*signature.return_type, float_vec(4));

    // The fetch location gains a mip component.
    let load = library.method(&texture, "Load").unwrap().unwrap();
    assert_eq!(load[0].signature.params[0].ty, SymbolType::vector(ScalarKind::Int, 3));
}

#[test]
fn test_fetch_on_a_combined_receiver_unwraps_the_image() {
    use crate::ast::Span;
    use crate::context::SpirvContext;
    use crate::types::FunctionParam;
    use rspirv::spirv::Op;

    let combined = SymbolType::Texture {
        dim: TextureDim::Dim2D,
        arrayed: false,
        multisampled: false,
        access: TextureAccess::Combined,
        sampled: ScalarKind::Float,
    };
    let location_ty = SymbolType::vector(ScalarKind::Int, 3);
    let mut ctx = SpirvContext::new(false);
    let outer = Arc::new(FunctionType::new(
        SymbolType::VOID,
        vec![FunctionParam::new(combined), FunctionParam::new(location_ty.clone())],
    ));
    let (_, params) = ctx.begin_function(&outer, None).unwrap();
    let location = ctx.as_value(params[1]).unwrap();
    let load_sig = FunctionType::new(float_vec(4), vec![FunctionParam::new(location_ty)]);
    let fetched = super::emit::apply(
        &mut ctx,
        IntrinsicImpl::TexLoad,
        &load_sig,
        Some(params[0]),
        &[location],
        Span::default(),
    )
    .unwrap()
    .unwrap();
    assert_eq!(ctx.lookup_type(fetched.type_id), Some(&float_vec(4)));
    ctx.end_function(true).unwrap();

    let module = ctx.into_module();
    let body: Vec<_> = module
        .functions
        .last()
        .unwrap()
        .blocks
        .iter()
        .flat_map(|block| &block.instructions)
        .collect();
    let image = body.iter().find(|i| i.class.opcode == Op::Image).unwrap();
    let fetch = body.iter().find(|i| i.class.opcode == Op::ImageFetch).unwrap();
    // The fetch consumes the unwrapped image, never the sampled-image receiver.
    assert_eq!(fetch.operands[0].unwrap_id_ref(), image.result_id.unwrap());
}

#[test]
fn test_buffer_methods_follow_the_element_type() {
    let library = Intrinsics::new();
    let read_only = SymbolType::Buffer { base: Box::new(float_vec(2)), write_allowed: false };
    let load = library.method(&read_only, "Load").unwrap().unwrap();
    assert_eq!(*load[0].signature.return_type, float_vec(2));
    assert_eq!(load[0].signature.params[0].ty, SymbolType::INT);
    assert!(library.method(&read_only, "Store").unwrap().is_none());

    let writable = SymbolType::Buffer { base: Box::new(float_vec(2)), write_allowed: true };
    let store = library.method(&writable, "Store").unwrap().unwrap();
    assert!(store[0].signature.return_type.is_void());
    assert_eq!(store[0].signature.params[1].ty, float_vec(2));
}

#[test]
fn test_structured_buffer_methods_follow_the_element_type() {
    let library = Intrinsics::new();
    let read_only =
        SymbolType::StructuredBuffer { base: Box::new(float_vec(4)), write_allowed: false };
    let load = library.method(&read_only, "Load").unwrap().unwrap();
    assert_eq!(*load[0].signature.return_type, float_vec(4));
    assert_eq!(load[0].signature.params[0].ty, SymbolType::INT);
    assert!(library.method(&read_only, "Store").unwrap().is_none());

    let writable =
        SymbolType::StructuredBuffer { base: Box::new(float_vec(4)), write_allowed: true };
    let store = library.method(&writable, "Store").unwrap().unwrap();
    assert!(store[0].signature.return_type.is_void());
    assert_eq!(store[0].signature.params[0].ty, SymbolType::INT);
    assert_eq!(store[0].signature.params[1].ty, float_vec(4));
}

#[test]
fn test_one_float_axis_expands_to_eight_overloads() {
    // Two float widths times the four sizes, scalar through four-wide.
    let def = IntrinsicDef::plain(
        Slot::matched(1),
        vec![Slot::class(BaseClass::AnyFloat).x(SizeSpec::Any)],
        IntrinsicImpl::Glsl(glsl::SQRT),
    );
    let set = expander::expand("rsqrt", None, &[def]).unwrap();
    assert_eq!(set.len(), 8);
}

#[test]
fn test_conflicting_column_loops_are_rejected() {
    // Two independent matrix axes in one template cannot agree on a column
    // count, so expansion refuses the definition outright.
    let def = IntrinsicDef::plain(
        Slot::class(BaseClass::Float),
        vec![
            Slot::class(BaseClass::Float).x(SizeSpec::Any).y(SizeSpec::Any),
            Slot::class(BaseClass::Float).x(SizeSpec::Any).y(SizeSpec::Any),
        ],
        IntrinsicImpl::Glsl(glsl::POW),
    );
    assert!(expander::expand("pow", None, &[def]).is_err());
}
