//! End-to-end tests: whole shader classes through `Compiler::compile`, with
//! the assembled words parsed back for structural assertions.

use std::sync::Arc;

use rspirv::binary::parse_words;
use rspirv::dr::{Loader, Module, Operand};
use rspirv::spirv::{Decoration, Op, StorageClass};

use crate::ast::{
    BinOp, BufferContainer, Expr, Function, Param, ShaderClass, ShaderMember, ShaderVar, Span,
    Stmt, StmtKind, TypeRef,
};
use crate::diag::DiagnosticKind;
use crate::error::CompilerError;
use crate::module::ModuleSnapshot;
use crate::types::{FunctionParam, FunctionType, ParamModifier, SymbolType};
use crate::{CompileOptions, Compiler};

fn parse(words: &[u32]) -> Module {
    let mut loader = Loader::new();
    parse_words(words, &mut loader).expect("generated SPIR-V must parse");
    loader.module()
}

fn compile(class: &mut ShaderClass) -> (Module, Arc<ModuleSnapshot>) {
    let compiled = Compiler::new().compile(class).expect("compilation must succeed");
    (parse(&compiled.words), compiled.snapshot)
}

fn count_ops(module: &Module, op: Op) -> usize {
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

fn assert_structured(module: &Module) {
    for function in &module.functions {
        for block in &function.blocks {
            let terminators =
                block.instructions.iter().filter(|i| is_terminator(i.class.opcode)).count();
            assert_eq!(terminators, 1, "each block must hold exactly one terminator");
            let last = block.instructions.last().unwrap();
            assert!(is_terminator(last.class.opcode), "the terminator must close the block");
        }
    }
}

fn linkage_count(module: &Module) -> usize {
    module
        .annotations
        .iter()
        .filter(|i| {
            matches!(i.operands.get(1), Some(Operand::Decoration(Decoration::LinkageAttributes)))
        })
        .count()
}

#[test]
fn test_square_compiles_to_one_multiply() {
    let square = Function::new("square", TypeRef::named("float"))
        .with_params(vec![Param::new("x", TypeRef::named("float"))])
        .with_body(vec![Stmt::ret(Some(Expr::binary(
            BinOp::Mul,
            Expr::ident("x"),
            Expr::ident("x"),
        )))]);
    let mut class = ShaderClass::new("Math").with_method(square);
    let (module, snapshot) = compile(&mut class);
    assert_eq!(module.functions.len(), 1);
    assert_eq!(count_ops(&module, Op::FMul), 1);
    assert_eq!(count_ops(&module, Op::ReturnValue), 1);
    assert_eq!(snapshot.methods.get("square").map(Vec::len), Some(1));
    assert_structured(&module);
}

#[test]
fn test_narrowing_initializer_is_one_type_mismatch() {
    let run = Function::new("run", TypeRef::named("void")).with_body(vec![Stmt::declare(
        TypeRef::named("int"),
        "x",
        Some(Expr::float(1.0)),
    )]);
    let mut class = ShaderClass::new("Bad").with_method(run);
    let err = Compiler::new().compile(&mut class).unwrap_err();
    let CompilerError::Semantic(diagnostics) = err else {
        panic!("expected diagnostics, got {err}");
    };
    assert_eq!(diagnostics.len(), 1);
    assert_eq!(diagnostics[0].kind, DiagnosticKind::TypeMismatch);
}

#[test]
fn test_break_at_method_scope_is_invalid_control_flow() {
    let run = Function::new("run", TypeRef::named("void"))
        .with_body(vec![Stmt::new(StmtKind::Break)]);
    let mut class = ShaderClass::new("Bad").with_method(run);
    let err = Compiler::new().compile(&mut class).unwrap_err();
    let CompilerError::Semantic(diagnostics) = err else {
        panic!("expected diagnostics, got {err}");
    };
    assert_eq!(diagnostics.len(), 1);
    assert_eq!(diagnostics[0].kind, DiagnosticKind::InvalidControlFlow);
}

#[test]
fn test_control_flow_blocks_all_terminate() {
    let body = vec![
        Stmt::declare(TypeRef::named("float"), "acc", Some(Expr::float(0.0))),
        Stmt::new(StmtKind::For {
            init: vec![Stmt::declare(TypeRef::named("int"), "i", Some(Expr::int(0)))],
            cond: Some(Expr::binary(BinOp::Lt, Expr::ident("i"), Expr::int(8))),
            update: vec![Stmt::assign(
                Expr::ident("i"),
                Expr::binary(BinOp::Add, Expr::ident("i"), Expr::int(1)),
            )],
            body: vec![
                Stmt::new(StmtKind::If {
                    arms: vec![(
                        Expr::binary(BinOp::Gt, Expr::ident("acc"), Expr::float(4.0)),
                        vec![Stmt::new(StmtKind::Break)],
                    )],
                    else_body: None,
                }),
                Stmt::new(StmtKind::If {
                    arms: vec![(
                        Expr::binary(BinOp::Lt, Expr::ident("acc"), Expr::float(1.0)),
                        vec![Stmt::new(StmtKind::Continue)],
                    )],
                    else_body: None,
                }),
                Stmt::assign(
                    Expr::ident("acc"),
                    Expr::binary(BinOp::Add, Expr::ident("acc"), Expr::float(0.5)),
                ),
            ],
        }),
        Stmt::new(StmtKind::While {
            cond: Expr::binary(BinOp::Gt, Expr::ident("acc"), Expr::float(0.0)),
            body: vec![Stmt::assign(
                Expr::ident("acc"),
                Expr::binary(BinOp::Sub, Expr::ident("acc"), Expr::float(1.0)),
            )],
        }),
    ];
    let run = Function::new("run", TypeRef::named("void")).with_body(body);
    let mut class = ShaderClass::new("Flow").with_method(run);
    let (module, _) = compile(&mut class);
    assert_eq!(count_ops(&module, Op::LoopMerge), 2);
    assert_eq!(count_ops(&module, Op::SelectionMerge), 2);
    assert_structured(&module);
}

#[test]
fn test_matrix_intrinsic_decomposes_per_column() {
    let body = vec![
        Stmt::declare(TypeRef::named("float3x3"), "m", None),
        Stmt::declare(TypeRef::named("var"), "a", Some(Expr::call("abs", vec![Expr::ident("m")]))),
    ];
    let run = Function::new("run", TypeRef::named("void")).with_body(body);
    let mut class = ShaderClass::new("Mat").with_method(run);
    let (module, _) = compile(&mut class);
    // one FAbs per column, then one recompose
    assert_eq!(count_ops(&module, Op::ExtInst), 3);
    assert_eq!(count_ops(&module, Op::CompositeConstruct), 1);
}

#[test]
fn test_vector_intrinsic_emits_once() {
    let body = vec![
        Stmt::declare(TypeRef::named("float3"), "v", None),
        Stmt::declare(TypeRef::named("var"), "a", Some(Expr::call("abs", vec![Expr::ident("v")]))),
    ];
    let run = Function::new("run", TypeRef::named("void")).with_body(body);
    let mut class = ShaderClass::new("Vec").with_method(run);
    let (module, _) = compile(&mut class);
    assert_eq!(count_ops(&module, Op::ExtInst), 1);
    assert_eq!(count_ops(&module, Op::CompositeConstruct), 0);
}

#[test]
fn test_inout_argument_copies_back() {
    let bump = Function::new("bump", TypeRef::named("void"))
        .with_params(vec![
            Param::new("v", TypeRef::named("float")).with_modifier(ParamModifier::InOut)
        ])
        .with_body(vec![Stmt::assign(
            Expr::ident("v"),
            Expr::binary(BinOp::Add, Expr::ident("v"), Expr::float(1.0)),
        )]);
    let run = Function::new("run", TypeRef::named("float")).with_body(vec![
        Stmt::declare(TypeRef::named("float"), "x", Some(Expr::float(1.0))),
        Stmt::expr(Expr::call("bump", vec![Expr::ident("x")])),
        Stmt::ret(Some(Expr::ident("x"))),
    ]);
    let mut class = ShaderClass::new("Calls").with_method(bump).with_method(run);
    let (module, _) = compile(&mut class);
    assert_eq!(count_ops(&module, Op::FunctionCall), 1);
    // callee write-back, x initializer, argument seed, copy-back
    assert_eq!(count_ops(&module, Op::Store), 4);
}

#[test]
fn test_methods_may_call_forward() {
    let first = Function::new("first", TypeRef::named("float"))
        .with_body(vec![Stmt::ret(Some(Expr::call("second", vec![])))]);
    let second = Function::new("second", TypeRef::named("float"))
        .with_body(vec![Stmt::ret(Some(Expr::float(2.0)))]);
    let mut class = ShaderClass::new("Order").with_method(first).with_method(second);
    let (module, _) = compile(&mut class);
    assert_eq!(count_ops(&module, Op::FunctionCall), 1);
}

#[test]
fn test_ternary_branches_around_the_untaken_arm() {
    let first = Function::new("first", TypeRef::named("float"))
        .with_body(vec![Stmt::ret(Some(Expr::float(1.0)))]);
    let second = Function::new("second", TypeRef::named("float"))
        .with_body(vec![Stmt::ret(Some(Expr::float(2.0)))]);
    let pick = Function::new("pick", TypeRef::named("float"))
        .with_params(vec![Param::new("c", TypeRef::named("bool"))])
        .with_body(vec![Stmt::ret(Some(Expr::ternary(
            Expr::ident("c"),
            Expr::call("first", vec![]),
            Expr::call("second", vec![]),
        )))]);
    let mut class =
        ShaderClass::new("Pick").with_method(first).with_method(second).with_method(pick);
    let (module, _) = compile(&mut class);
    // A scalar selector branches; each call sits in its own arm block.
    assert_eq!(count_ops(&module, Op::Select), 0);
    assert_eq!(count_ops(&module, Op::BranchConditional), 1);
    assert_eq!(count_ops(&module, Op::SelectionMerge), 1);
    assert_eq!(count_ops(&module, Op::FunctionCall), 2);
    assert_structured(&module);
}

#[test]
fn test_structured_buffer_elements_chain_through_the_block() {
    let read = Function::new("read", TypeRef::named("float")).with_body(vec![Stmt::ret(Some(
        Expr::method_call(Expr::ident("data"), "Load", vec![Expr::int(3)]),
    ))]);
    let write = Function::new("write", TypeRef::named("void")).with_body(vec![Stmt::expr(
        Expr::method_call(Expr::ident("sink"), "Store", vec![Expr::int(0), Expr::float(1.0)]),
    )]);
    let mut class = ShaderClass::new("Buffers")
        .with_var(ShaderVar::new(
            "data",
            TypeRef::generic("StructuredBuffer", vec![TypeRef::named("float")]),
        ))
        .with_var(ShaderVar::new(
            "sink",
            TypeRef::generic("RWStructuredBuffer", vec![TypeRef::named("float")]),
        ))
        .with_method(read)
        .with_method(write);
    let (module, _) = compile(&mut class);
    // One two-index chain per access: block member zero, then the element.
    assert_eq!(count_ops(&module, Op::AccessChain), 2);
    assert_eq!(count_ops(&module, Op::Load), 1);
    assert_eq!(count_ops(&module, Op::Store), 1);
    let storage_buffers = module
        .types_global_values
        .iter()
        .filter(|i| {
            i.class.opcode == Op::Variable
                && matches!(
                    i.operands.first(),
                    Some(Operand::StorageClass(StorageClass::StorageBuffer))
                )
        })
        .count();
    assert_eq!(storage_buffers, 2);
}

#[test]
fn test_cbuffer_members_load_through_the_block() {
    let buffer = ShaderMember::Buffer {
        container: BufferContainer::CBuffer,
        name: "PerDraw".into(),
        members: vec![
            ShaderVar::new("Tint", TypeRef::named("float4")),
            ShaderVar::new("Exposure", TypeRef::named("float")),
        ],
        span: Span::default(),
    };
    let shade = Function::new("shade", TypeRef::named("float4")).with_body(vec![Stmt::ret(Some(
        Expr::binary(BinOp::Mul, Expr::ident("Tint"), Expr::ident("Exposure")),
    ))]);
    let mut class = ShaderClass::new("Lit").with_member(buffer).with_method(shade);
    let (module, snapshot) = compile(&mut class);
    // one chain per member access
    assert_eq!(count_ops(&module, Op::AccessChain), 2);
    let block_decorated = module.annotations.iter().any(|i| {
        matches!(i.operands.get(1), Some(Operand::Decoration(Decoration::Block)))
    });
    assert!(block_decorated, "uniform block must carry the Block decoration");
    assert!(snapshot.variables.get("Tint").is_some_and(|v| v.uniform));
}

#[test]
fn test_own_uniforms_fold_into_an_implicit_block() {
    let expose = Function::new("expose", TypeRef::named("float"))
        .with_body(vec![Stmt::ret(Some(Expr::ident("Exposure")))]);
    let mut class = ShaderClass::new("Film")
        .with_var(ShaderVar::new("Exposure", TypeRef::named("float")).uniform())
        .with_method(expose);
    let (module, snapshot) = compile(&mut class);
    let uniform_blocks = module
        .types_global_values
        .iter()
        .filter(|i| {
            i.class.opcode == Op::Variable
                && matches!(
                    i.operands.first(),
                    Some(Operand::StorageClass(StorageClass::Uniform))
                )
        })
        .count();
    assert_eq!(uniform_blocks, 1);
    assert_eq!(count_ops(&module, Op::AccessChain), 1);
    assert!(snapshot.variables.get("Exposure").is_some_and(|v| v.uniform));
}

#[test]
fn test_inherited_symbols_resolve_and_link() {
    let mut base = ModuleSnapshot::new("Base");
    base.export_var("Intensity", SymbolType::FLOAT, true);
    base.export_method(
        "Boost",
        Arc::new(FunctionType::new(SymbolType::FLOAT, vec![FunctionParam::new(SymbolType::FLOAT)])),
    );
    let mut compiler = Compiler::new();
    compiler.register_module(base);

    let run = Function::new("run", TypeRef::named("float"))
        .with_body(vec![Stmt::ret(Some(Expr::call("Boost", vec![Expr::ident("Intensity")])))]);
    let mut class =
        ShaderClass::new("Child").inheriting(vec!["Base".into()]).with_method(run);
    let compiled = compiler.compile(&mut class).expect("inheriting compile must succeed");
    let module = parse(&compiled.words);
    // the import stub plus the compiled body
    assert_eq!(module.functions.len(), 2);
    assert_eq!(count_ops(&module, Op::FunctionCall), 1);
    // mirror block import, method stub import, own method export
    assert_eq!(linkage_count(&module), 3);
}

#[test]
fn test_inheriting_an_unregistered_module_fails() {
    let mut class = ShaderClass::new("Orphan").inheriting(vec!["Missing".into()]);
    let err = Compiler::new().compile(&mut class).unwrap_err();
    assert!(matches!(err, CompilerError::Module(_)), "got {err}");
}

#[test]
fn test_debug_names_are_optional() {
    let run = Function::new("run", TypeRef::named("void")).with_body(vec![Stmt::ret(None)]);

    let mut class = ShaderClass::new("Named").with_method(run.clone());
    let compiled = Compiler::with_options(CompileOptions { debug_names: true })
        .compile(&mut class)
        .unwrap();
    assert!(!parse(&compiled.words).debug_names.is_empty());

    let mut class = ShaderClass::new("Anonymous").with_method(run);
    let compiled = Compiler::new().compile(&mut class).unwrap();
    assert!(parse(&compiled.words).debug_names.is_empty());
}
