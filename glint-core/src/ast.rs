//! Shader abstract syntax.
//!
//! A front end produces these nodes; the compiler decorates them in place
//! during resolution (`Expr::ty`, `VarDeclarator::resolved_ty`,
//! `Foreach::elem_ty`) and reads the annotations back while generating code.
//! The constructor helpers keep hand-built trees short in tests.

use std::fmt;

use crate::types::{ParamModifier, SymbolType};

/// Source position, 1-based. `Span::default()` marks synthesized nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub line: u32,
    pub col: u32,
}

impl Span {
    pub fn new(line: u32, col: u32) -> Self {
        Span { line, col }
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.col)
    }
}

/// A type as written in source, before resolution. The name `var` asks the
/// compiler to infer the type from the initializer.
#[derive(Debug, Clone, PartialEq)]
pub struct TypeRef {
    pub name: String,
    pub args: Vec<TypeRef>,
    pub span: Span,
}

impl TypeRef {
    pub fn named(name: impl Into<String>) -> Self {
        TypeRef { name: name.into(), args: Vec::new(), span: Span::default() }
    }

    pub fn generic(name: impl Into<String>, args: Vec<TypeRef>) -> Self {
        TypeRef { name: name.into(), args, span: Span::default() }
    }

    pub fn is_var(&self) -> bool {
        self.name == "var" && self.args.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
    BitNot,
    PreInc,
    PreDec,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostfixOp {
    Inc,
    Dec,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
    And,
    Or,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl BinOp {
    pub fn is_comparison(self) -> bool {
        matches!(self, Self::Eq | Self::Ne | Self::Lt | Self::Le | Self::Gt | Self::Ge)
    }

    pub fn is_logical(self) -> bool {
        matches!(self, Self::And | Self::Or)
    }

    pub fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Rem => "%",
            Self::BitAnd => "&",
            Self::BitOr => "|",
            Self::BitXor => "^",
            Self::Shl => "<<",
            Self::Shr => ">>",
            Self::And => "&&",
            Self::Or => "||",
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOp {
    Assign,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
}

impl AssignOp {
    /// The operator applied before the store, `None` for plain `=`.
    pub fn binary(self) -> Option<BinOp> {
        Some(match self {
            Self::Assign => return None,
            Self::Add => BinOp::Add,
            Self::Sub => BinOp::Sub,
            Self::Mul => BinOp::Mul,
            Self::Div => BinOp::Div,
            Self::Rem => BinOp::Rem,
            Self::BitAnd => BinOp::BitAnd,
            Self::BitOr => BinOp::BitOr,
            Self::BitXor => BinOp::BitXor,
            Self::Shl => BinOp::Shl,
            Self::Shr => BinOp::Shr,
        })
    }
}

#[derive(Debug, Clone)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
    /// Filled during resolution.
    pub ty: Option<SymbolType>,
}

#[derive(Debug, Clone)]
pub enum ExprKind {
    IntLit(i64),
    FloatLit(f64),
    BoolLit(bool),
    Ident(String),
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Postfix {
        op: PostfixOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Ternary {
        cond: Box<Expr>,
        then_expr: Box<Expr>,
        else_expr: Box<Expr>,
    },
    /// Field access or swizzle, disambiguated by the base type.
    Member {
        base: Box<Expr>,
        member: String,
    },
    Index {
        base: Box<Expr>,
        index: Box<Expr>,
    },
    /// Free call: user method or intrinsic, resolved by name and arguments.
    Call {
        callee: String,
        args: Vec<Expr>,
    },
    /// `receiver.Method(args)` on a texture, buffer or similar object.
    MethodCall {
        receiver: Box<Expr>,
        method: String,
        args: Vec<Expr>,
    },
    /// Type constructor such as `float3(x, y, z)`.
    Construct {
        ty: TypeRef,
        args: Vec<Expr>,
    },
    Cast {
        ty: TypeRef,
        expr: Box<Expr>,
    },
}

impl Expr {
    pub fn new(kind: ExprKind) -> Self {
        Expr { kind, span: Span::default(), ty: None }
    }

    pub fn at(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn int(value: i64) -> Self {
        Expr::new(ExprKind::IntLit(value))
    }

    pub fn float(value: f64) -> Self {
        Expr::new(ExprKind::FloatLit(value))
    }

    pub fn bool_lit(value: bool) -> Self {
        Expr::new(ExprKind::BoolLit(value))
    }

    pub fn ident(name: impl Into<String>) -> Self {
        Expr::new(ExprKind::Ident(name.into()))
    }

    pub fn unary(op: UnaryOp, operand: Expr) -> Self {
        Expr::new(ExprKind::Unary { op, operand: Box::new(operand) })
    }

    pub fn binary(op: BinOp, lhs: Expr, rhs: Expr) -> Self {
        Expr::new(ExprKind::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) })
    }

    pub fn ternary(cond: Expr, then_expr: Expr, else_expr: Expr) -> Self {
        Expr::new(ExprKind::Ternary {
            cond: Box::new(cond),
            then_expr: Box::new(then_expr),
            else_expr: Box::new(else_expr),
        })
    }

    pub fn member(base: Expr, member: impl Into<String>) -> Self {
        Expr::new(ExprKind::Member { base: Box::new(base), member: member.into() })
    }

    pub fn index(base: Expr, index: Expr) -> Self {
        Expr::new(ExprKind::Index { base: Box::new(base), index: Box::new(index) })
    }

    pub fn call(callee: impl Into<String>, args: Vec<Expr>) -> Self {
        Expr::new(ExprKind::Call { callee: callee.into(), args })
    }

    pub fn method_call(receiver: Expr, method: impl Into<String>, args: Vec<Expr>) -> Self {
        Expr::new(ExprKind::MethodCall {
            receiver: Box::new(receiver),
            method: method.into(),
            args,
        })
    }

    pub fn construct(ty: TypeRef, args: Vec<Expr>) -> Self {
        Expr::new(ExprKind::Construct { ty, args })
    }

    pub fn cast(ty: TypeRef, expr: Expr) -> Self {
        Expr::new(ExprKind::Cast { ty, expr: Box::new(expr) })
    }
}

#[derive(Debug, Clone)]
pub struct VarDeclarator {
    pub name: String,
    pub init: Option<Expr>,
    /// Filled during resolution.
    pub resolved_ty: Option<SymbolType>,
}

impl VarDeclarator {
    pub fn new(name: impl Into<String>, init: Option<Expr>) -> Self {
        VarDeclarator { name: name.into(), init, resolved_ty: None }
    }
}

#[derive(Debug, Clone)]
pub struct Stmt {
    pub kind: StmtKind,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub enum StmtKind {
    Declare {
        ty: TypeRef,
        decls: Vec<VarDeclarator>,
    },
    Assign {
        target: Expr,
        op: AssignOp,
        value: Expr,
    },
    Expr(Expr),
    Block(Vec<Stmt>),
    /// `if`/`else if`/`else` chain: one arm per condition, in source order.
    If {
        arms: Vec<(Expr, Vec<Stmt>)>,
        else_body: Option<Vec<Stmt>>,
    },
    For {
        init: Vec<Stmt>,
        cond: Option<Expr>,
        update: Vec<Stmt>,
        body: Vec<Stmt>,
    },
    While {
        cond: Expr,
        body: Vec<Stmt>,
    },
    Foreach {
        ty: TypeRef,
        var: String,
        collection: Expr,
        body: Vec<Stmt>,
        /// Filled during resolution.
        elem_ty: Option<SymbolType>,
    },
    Break,
    Continue,
    Return(Option<Expr>),
}

impl Stmt {
    pub fn new(kind: StmtKind) -> Self {
        Stmt { kind, span: Span::default() }
    }

    pub fn at(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn declare(ty: TypeRef, name: impl Into<String>, init: Option<Expr>) -> Self {
        Stmt::new(StmtKind::Declare { ty, decls: vec![VarDeclarator::new(name, init)] })
    }

    pub fn assign(target: Expr, value: Expr) -> Self {
        Stmt::new(StmtKind::Assign { target, op: AssignOp::Assign, value })
    }

    pub fn expr(expr: Expr) -> Self {
        Stmt::new(StmtKind::Expr(expr))
    }

    pub fn ret(value: Option<Expr>) -> Self {
        Stmt::new(StmtKind::Return(value))
    }
}

#[derive(Debug, Clone)]
pub struct Param {
    pub name: String,
    pub ty: TypeRef,
    pub modifier: ParamModifier,
    pub default: Option<Expr>,
}

impl Param {
    pub fn new(name: impl Into<String>, ty: TypeRef) -> Self {
        Param { name: name.into(), ty, modifier: ParamModifier::None, default: None }
    }

    pub fn with_modifier(mut self, modifier: ParamModifier) -> Self {
        self.modifier = modifier;
        self
    }

    pub fn with_default(mut self, default: Expr) -> Self {
        self.default = Some(default);
        self
    }
}

#[derive(Debug, Clone)]
pub struct Function {
    pub name: String,
    pub return_ty: TypeRef,
    pub params: Vec<Param>,
    pub body: Vec<Stmt>,
    pub span: Span,
}

impl Function {
    pub fn new(name: impl Into<String>, return_ty: TypeRef) -> Self {
        Function {
            name: name.into(),
            return_ty,
            params: Vec::new(),
            body: Vec::new(),
            span: Span::default(),
        }
    }

    pub fn with_params(mut self, params: Vec<Param>) -> Self {
        self.params = params;
        self
    }

    pub fn with_body(mut self, body: Vec<Stmt>) -> Self {
        self.body = body;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarStorage {
    Normal,
    Uniform,
    Stream,
}

/// Container class for grouped member declarations. `CBuffer` and `TBuffer`
/// lower to one uniform block each; `RGroup` only groups resources for
/// binding purposes and its members stay individually bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferContainer {
    CBuffer,
    TBuffer,
    RGroup,
}

#[derive(Debug, Clone)]
pub struct ShaderVar {
    pub name: String,
    pub ty: TypeRef,
    pub storage: VarStorage,
    pub is_stage: bool,
    pub is_const: bool,
    pub semantic: Option<String>,
    pub init: Option<Expr>,
    pub span: Span,
}

impl ShaderVar {
    pub fn new(name: impl Into<String>, ty: TypeRef) -> Self {
        ShaderVar {
            name: name.into(),
            ty,
            storage: VarStorage::Normal,
            is_stage: false,
            is_const: false,
            semantic: None,
            init: None,
            span: Span::default(),
        }
    }

    pub fn uniform(mut self) -> Self {
        self.storage = VarStorage::Uniform;
        self
    }

    pub fn constant(mut self) -> Self {
        self.is_const = true;
        self
    }

    pub fn stream(mut self) -> Self {
        self.storage = VarStorage::Stream;
        self
    }

    pub fn stage(mut self) -> Self {
        self.is_stage = true;
        self
    }

    pub fn with_semantic(mut self, semantic: impl Into<String>) -> Self {
        self.semantic = Some(semantic.into());
        self
    }

    pub fn with_init(mut self, init: Expr) -> Self {
        self.init = Some(init);
        self
    }
}

#[derive(Debug, Clone)]
pub struct StructDecl {
    pub name: String,
    pub fields: Vec<(String, TypeRef)>,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub enum ShaderMember {
    Var(ShaderVar),
    Buffer { container: BufferContainer, name: String, members: Vec<ShaderVar>, span: Span },
    Struct(StructDecl),
    Method(Function),
}

/// One shader class: the unit of compilation. `inherits` names modules that
/// must already be registered with the compiler.
#[derive(Debug, Clone)]
pub struct ShaderClass {
    pub name: String,
    pub inherits: Vec<String>,
    pub members: Vec<ShaderMember>,
}

impl ShaderClass {
    pub fn new(name: impl Into<String>) -> Self {
        ShaderClass { name: name.into(), inherits: Vec::new(), members: Vec::new() }
    }

    pub fn inheriting(mut self, modules: Vec<String>) -> Self {
        self.inherits = modules;
        self
    }

    pub fn with_member(mut self, member: ShaderMember) -> Self {
        self.members.push(member);
        self
    }

    pub fn with_method(self, method: Function) -> Self {
        self.with_member(ShaderMember::Method(method))
    }

    pub fn with_var(self, var: ShaderVar) -> Self {
        self.with_member(ShaderMember::Var(var))
    }

    pub fn methods(&self) -> impl Iterator<Item = &Function> {
        self.members.iter().filter_map(|m| match m {
            ShaderMember::Method(f) => Some(f),
            _ => None,
        })
    }
}
