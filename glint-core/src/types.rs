//! Structural shading-language types.
//!
//! `SymbolType` is a closed, by-value type model: two types are
//! interchangeable exactly when they are structurally equal, and that
//! equality is the deduplication key for IR type registration. A matrix is
//! `cols` column vectors of `rows` components, following the IR layout; the
//! declared name `floatRxC` resolves to `Matrix { rows: R, cols: C }`.

use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarKind {
    Void,
    Bool,
    Int,
    UInt,
    Int64,
    UInt64,
    Half,
    Float,
    Double,
}

impl ScalarKind {
    pub fn is_integer(self) -> bool {
        matches!(self, Self::Int | Self::UInt | Self::Int64 | Self::UInt64)
    }

    pub fn is_floating(self) -> bool {
        matches!(self, Self::Half | Self::Float | Self::Double)
    }

    pub fn is_numeric(self) -> bool {
        self.is_integer() || self.is_floating()
    }

    pub fn is_signed(self) -> bool {
        matches!(self, Self::Int | Self::Int64 | Self::Half | Self::Float | Self::Double)
    }

    pub fn is_unsigned(self) -> bool {
        matches!(self, Self::UInt | Self::UInt64)
    }

    pub fn bit_width(self) -> u32 {
        match self {
            Self::Void => 0,
            Self::Bool => 1,
            Self::Half => 16,
            Self::Int | Self::UInt | Self::Float => 32,
            Self::Int64 | Self::UInt64 | Self::Double => 64,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Void => "void",
            Self::Bool => "bool",
            Self::Int => "int",
            Self::UInt => "uint",
            Self::Int64 => "int64_t",
            Self::UInt64 => "uint64_t",
            Self::Half => "half",
            Self::Float => "float",
            Self::Double => "double",
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "void" => Self::Void,
            "bool" => Self::Bool,
            "int" => Self::Int,
            "uint" | "dword" => Self::UInt,
            "int64_t" => Self::Int64,
            "uint64_t" => Self::UInt64,
            "half" => Self::Half,
            "float" => Self::Float,
            "double" => Self::Double,
            _ => return None,
        })
    }
}

impl fmt::Display for ScalarKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureDim {
    Dim1D,
    Dim2D,
    Dim3D,
    Cube,
}

impl TextureDim {
    /// Number of coordinate components for a non-arrayed texture.
    pub fn coordinate_count(self) -> u32 {
        match self {
            Self::Dim1D => 1,
            Self::Dim2D => 2,
            Self::Dim3D | Self::Cube => 3,
        }
    }
}

/// How shader code may touch a texture: sampled through a separate sampler
/// object, as a storage image with direct loads and stores, or as a combined
/// texture-sampler pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureAccess {
    ReadOnly,
    ReadWrite,
    Combined,
}

/// Storage class of a pointer, mirrored from the IR's vocabulary so the type
/// model stays independent of the builder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Storage {
    Function,
    Private,
    Uniform,
    UniformConstant,
    StorageBuffer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamModifier {
    None,
    In,
    Out,
    InOut,
}

impl ParamModifier {
    pub fn copies_in(self) -> bool {
        !matches!(self, Self::Out)
    }

    pub fn copies_out(self) -> bool {
        matches!(self, Self::Out | Self::InOut)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FunctionParam {
    pub ty: SymbolType,
    pub modifier: ParamModifier,
    pub has_default: bool,
}

impl FunctionParam {
    pub fn new(ty: SymbolType) -> Self {
        FunctionParam { ty, modifier: ParamModifier::None, has_default: false }
    }

    pub fn with_modifier(mut self, modifier: ParamModifier) -> Self {
        self.modifier = modifier;
        self
    }

    pub fn defaulted(mut self) -> Self {
        self.has_default = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FunctionType {
    pub return_type: Box<SymbolType>,
    pub params: Vec<FunctionParam>,
}

impl FunctionType {
    pub fn new(return_type: SymbolType, params: Vec<FunctionParam>) -> Self {
        FunctionType { return_type: Box::new(return_type), params }
    }

    /// Number of parameters a call may omit from the tail.
    pub fn default_count(&self) -> usize {
        self.params.iter().rev().take_while(|p| p.has_default).count()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StructField {
    pub name: String,
    pub ty: SymbolType,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SymbolType {
    Scalar(ScalarKind),
    Vector {
        base: ScalarKind,
        size: u32,
    },
    Matrix {
        base: ScalarKind,
        rows: u32,
        cols: u32,
    },
    /// Never wraps another pointer.
    Pointer {
        base: Box<SymbolType>,
        storage: Storage,
    },
    Array {
        base: Box<SymbolType>,
        /// `None` marks a runtime-sized array.
        len: Option<u32>,
    },
    Struct {
        name: String,
        fields: Arc<Vec<StructField>>,
    },
    ConstantBuffer {
        name: String,
        members: Arc<Vec<StructField>>,
    },
    Function(Arc<FunctionType>),
    /// A named symbol that resolves to several signatures at once.
    FunctionGroup(Arc<Vec<FunctionType>>),
    Texture {
        dim: TextureDim,
        arrayed: bool,
        multisampled: bool,
        access: TextureAccess,
        sampled: ScalarKind,
    },
    Buffer {
        base: Box<SymbolType>,
        write_allowed: bool,
    },
    StructuredBuffer {
        base: Box<SymbolType>,
        write_allowed: bool,
    },
    Sampler,
    /// Placeholder carried while a declaration is still unresolved.
    Undefined(String),
}

impl SymbolType {
    pub const VOID: SymbolType = SymbolType::Scalar(ScalarKind::Void);
    pub const BOOL: SymbolType = SymbolType::Scalar(ScalarKind::Bool);
    pub const INT: SymbolType = SymbolType::Scalar(ScalarKind::Int);
    pub const UINT: SymbolType = SymbolType::Scalar(ScalarKind::UInt);
    pub const FLOAT: SymbolType = SymbolType::Scalar(ScalarKind::Float);
    pub const DOUBLE: SymbolType = SymbolType::Scalar(ScalarKind::Double);

    pub fn vector(base: ScalarKind, size: u32) -> Self {
        debug_assert!((1..=4).contains(&size));
        SymbolType::Vector { base, size }
    }

    pub fn matrix(base: ScalarKind, rows: u32, cols: u32) -> Self {
        SymbolType::Matrix { base, rows, cols }
    }

    pub fn pointer(base: SymbolType, storage: Storage) -> Self {
        debug_assert!(!matches!(base, SymbolType::Pointer { .. }));
        SymbolType::Pointer { base: Box::new(base), storage }
    }

    pub fn array(base: SymbolType, len: u32) -> Self {
        SymbolType::Array { base: Box::new(base), len: Some(len) }
    }

    /// Build a scalar, vector or matrix from a base kind and a (rows, cols)
    /// shape: both dimensions 1 is a scalar, one dimension >1 a vector.
    pub fn shaped(base: ScalarKind, rows: u32, cols: u32) -> Self {
        match (rows, cols) {
            (1, 1) => SymbolType::Scalar(base),
            (r, 1) => SymbolType::vector(base, r),
            (1, c) => SymbolType::vector(base, c),
            (r, c) => SymbolType::matrix(base, r, c),
        }
    }

    pub fn is_void(&self) -> bool {
        matches!(self, SymbolType::Scalar(ScalarKind::Void))
    }

    pub fn is_pointer(&self) -> bool {
        matches!(self, SymbolType::Pointer { .. })
    }

    /// The scalar base of a scalar/vector/matrix, `None` for anything else.
    pub fn element_type(&self) -> Option<ScalarKind> {
        match self {
            SymbolType::Scalar(kind) => Some(*kind),
            SymbolType::Vector { base, .. } | SymbolType::Matrix { base, .. } => Some(*base),
            _ => None,
        }
    }

    pub fn with_element_type(&self, kind: ScalarKind) -> SymbolType {
        match self {
            SymbolType::Scalar(_) => SymbolType::Scalar(kind),
            SymbolType::Vector { size, .. } => SymbolType::Vector { base: kind, size: *size },
            SymbolType::Matrix { rows, cols, .. } => {
                SymbolType::Matrix { base: kind, rows: *rows, cols: *cols }
            }
            other => other.clone(),
        }
    }

    pub fn component_count(&self) -> u32 {
        match self {
            SymbolType::Vector { size, .. } => *size,
            SymbolType::Matrix { rows, cols, .. } => rows * cols,
            _ => 1,
        }
    }

    pub fn is_numeric_shaped(&self) -> bool {
        self.element_type().map(|k| k.is_numeric()).unwrap_or(false)
    }

    /// The pointee of a pointer, or the type itself.
    pub fn pointee(&self) -> &SymbolType {
        match self {
            SymbolType::Pointer { base, .. } => base,
            other => other,
        }
    }

    /// Element type produced by indexing this type, if indexable.
    pub fn indexed(&self) -> Option<SymbolType> {
        match self {
            SymbolType::Array { base, .. } => Some((**base).clone()),
            SymbolType::Vector { base, .. } => Some(SymbolType::Scalar(*base)),
            // Indexing a matrix yields one column.
            SymbolType::Matrix { base, rows, .. } => Some(SymbolType::vector(*base, *rows)),
            _ => None,
        }
    }

    pub fn field_index(&self, name: &str) -> Option<(u32, SymbolType)> {
        let fields = match self {
            SymbolType::Struct { fields, .. } => fields,
            SymbolType::ConstantBuffer { members, .. } => members,
            _ => return None,
        };
        fields
            .iter()
            .position(|f| f.name == name)
            .map(|i| (i as u32, fields[i].ty.clone()))
    }

    /// Resolve the built-in type vocabulary: scalar names, `float3`-style
    /// vectors, `float3x4`-style matrices, texture/buffer/sampler names.
    /// Generic arguments feed `Buffer<T>` and friends. Unknown names return
    /// `None`; the caller reports `UnknownType`.
    pub fn from_declared_name(name: &str, args: &[SymbolType]) -> Option<SymbolType> {
        if args.is_empty() {
            if let Some(kind) = ScalarKind::from_name(name) {
                return Some(SymbolType::Scalar(kind));
            }
            if let Some(ty) = parse_shaped_name(name) {
                return Some(ty);
            }
            if let Some(ty) = parse_texture_name(name) {
                return Some(ty);
            }
            if name == "SamplerState" || name == "sampler" {
                return Some(SymbolType::Sampler);
            }
            return None;
        }

        let elem = || args.first().cloned();
        match name {
            "Buffer" => Some(SymbolType::Buffer { base: Box::new(elem()?), write_allowed: false }),
            "RWBuffer" => Some(SymbolType::Buffer { base: Box::new(elem()?), write_allowed: true }),
            "StructuredBuffer" => {
                Some(SymbolType::StructuredBuffer { base: Box::new(elem()?), write_allowed: false })
            }
            "RWStructuredBuffer" => {
                Some(SymbolType::StructuredBuffer { base: Box::new(elem()?), write_allowed: true })
            }
            "Texture1D" | "Texture2D" | "Texture3D" | "TextureCube" | "RWTexture1D"
            | "RWTexture2D" | "RWTexture3D" | "Texture1DArray" | "Texture2DArray"
            | "TextureCubeArray" | "Texture2DMS" | "Texture2DMSArray" => {
                let sampled = args.first().and_then(SymbolType::element_type)?;
                parse_texture_name(name).map(|t| match t {
                    SymbolType::Texture { dim, arrayed, multisampled, access, .. } => {
                        SymbolType::Texture { dim, arrayed, multisampled, access, sampled }
                    }
                    other => other,
                })
            }
            _ => None,
        }
    }
}

fn parse_shaped_name(name: &str) -> Option<SymbolType> {
    // Longest scalar prefix first so "uint2" does not stop at "int".
    for kind in [
        ScalarKind::UInt,
        ScalarKind::Int,
        ScalarKind::Half,
        ScalarKind::Float,
        ScalarKind::Double,
        ScalarKind::Bool,
    ] {
        let prefix = kind.name();
        if let Some(rest) = name.strip_prefix(prefix) {
            let mut it = rest.bytes();
            match (it.next(), it.next(), it.next(), it.next()) {
                (Some(n), None, _, _) if (b'1'..=b'4').contains(&n) => {
                    let size = (n - b'0') as u32;
                    return Some(if size == 1 {
                        SymbolType::Scalar(kind)
                    } else {
                        SymbolType::vector(kind, size)
                    });
                }
                (Some(r), Some(b'x'), Some(c), None)
                    if (b'1'..=b'4').contains(&r) && (b'1'..=b'4').contains(&c) =>
                {
                    return Some(SymbolType::matrix(kind, (r - b'0') as u32, (c - b'0') as u32));
                }
                _ => {}
            }
        }
    }
    None
}

fn parse_texture_name(name: &str) -> Option<SymbolType> {
    let (access, rest) = match name.strip_prefix("RW") {
        Some(rest) => (TextureAccess::ReadWrite, rest),
        None => (TextureAccess::ReadOnly, name),
    };
    let rest = rest.strip_prefix("Texture")?;
    let (dim, rest) = if let Some(r) = rest.strip_prefix("1D") {
        (TextureDim::Dim1D, r)
    } else if let Some(r) = rest.strip_prefix("2D") {
        (TextureDim::Dim2D, r)
    } else if let Some(r) = rest.strip_prefix("3D") {
        (TextureDim::Dim3D, r)
    } else if let Some(r) = rest.strip_prefix("Cube") {
        (TextureDim::Cube, r)
    } else {
        return None;
    };
    let (multisampled, rest) = match rest.strip_prefix("MS") {
        Some(r) => (true, r),
        None => (false, rest),
    };
    let arrayed = match rest {
        "" => false,
        "Array" => true,
        _ => return None,
    };
    Some(SymbolType::Texture { dim, arrayed, multisampled, access, sampled: ScalarKind::Float })
}

impl fmt::Display for SymbolType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SymbolType::Scalar(kind) => write!(f, "{kind}"),
            SymbolType::Vector { base, size } => write!(f, "{base}{size}"),
            SymbolType::Matrix { base, rows, cols } => write!(f, "{base}{rows}x{cols}"),
            SymbolType::Pointer { base, .. } => write!(f, "ptr<{base}>"),
            SymbolType::Array { base, len: Some(n) } => write!(f, "{base}[{n}]"),
            SymbolType::Array { base, len: None } => write!(f, "{base}[]"),
            SymbolType::Struct { name, .. } => write!(f, "struct {name}"),
            SymbolType::ConstantBuffer { name, .. } => write!(f, "cbuffer {name}"),
            SymbolType::Function(func) => {
                write!(f, "{}(", func.return_type)?;
                for (i, p) in func.params.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", p.ty)?;
                }
                write!(f, ")")
            }
            SymbolType::FunctionGroup(overloads) => {
                write!(f, "overload set ({} candidates)", overloads.len())
            }
            SymbolType::Texture { dim, arrayed, multisampled, access, sampled } => {
                match access {
                    TextureAccess::ReadOnly => {}
                    TextureAccess::ReadWrite => write!(f, "RW")?,
                    TextureAccess::Combined => write!(f, "Combined")?,
                }
                let d = match dim {
                    TextureDim::Dim1D => "1D",
                    TextureDim::Dim2D => "2D",
                    TextureDim::Dim3D => "3D",
                    TextureDim::Cube => "Cube",
                };
                write!(f, "Texture{d}")?;
                if *multisampled {
                    write!(f, "MS")?;
                }
                if *arrayed {
                    write!(f, "Array")?;
                }
                write!(f, "<{sampled}>")
            }
            SymbolType::Buffer { base, write_allowed } => {
                write!(f, "{}Buffer<{base}>", if *write_allowed { "RW" } else { "" })
            }
            SymbolType::StructuredBuffer { base, write_allowed } => {
                write!(f, "{}StructuredBuffer<{base}>", if *write_allowed { "RW" } else { "" })
            }
            SymbolType::Sampler => write!(f, "SamplerState"),
            SymbolType::Undefined(name) => write!(f, "undefined {name}"),
        }
    }
}

/// Numeric promotion for binary operators. Mixed float precision (half,
/// float, double in any combination) is rejected rather than widened:
/// without an explicit cast the intent is ambiguous.
pub fn promote(a: ScalarKind, b: ScalarKind) -> Option<ScalarKind> {
    use ScalarKind::*;
    match (a, b) {
        _ if a == b && a.is_numeric() => Some(a),
        (Bool, Bool) => Some(Bool),
        _ if a.is_floating() && b.is_floating() => None,
        (i, f) if i.is_integer() && f.is_floating() => Some(f),
        (f, i) if f.is_floating() && i.is_integer() => Some(f),
        (Int, UInt) | (UInt, Int) => Some(UInt),
        (Int64, UInt64) | (UInt64, Int64) => Some(UInt64),
        (Int, Int64) | (Int64, Int) => Some(Int64),
        (UInt, UInt64) | (UInt64, UInt) => Some(UInt64),
        (Int, UInt64) | (UInt64, Int) => Some(UInt64),
        (UInt, Int64) | (Int64, UInt) => Some(Int64),
        _ => None,
    }
}

/// std140 size and alignment of a constant-buffer member.
pub fn std140_size_align(ty: &SymbolType) -> Option<(u32, u32)> {
    match ty {
        SymbolType::Scalar(kind) if kind.is_numeric() => {
            let n = kind.bit_width() / 8;
            Some((n, n))
        }
        SymbolType::Vector { base, size } => {
            let n = base.bit_width() / 8;
            let align = match size {
                2 => n * 2,
                // vec3 aligns like vec4
                3 | 4 => n * 4,
                _ => n,
            };
            Some((n * size, align))
        }
        SymbolType::Matrix { base, rows, cols } => {
            // Column-major: an array of `cols` column vectors, each padded to
            // a 16-byte stride.
            let (_, col_align) = std140_size_align(&SymbolType::vector(*base, *rows))?;
            let stride = col_align.max(16);
            Some((stride * cols, stride))
        }
        SymbolType::Array { base, len: Some(n) } => {
            let (size, align) = std140_size_align(base)?;
            let stride = round_up(size.max(align), 16);
            Some((stride * n, stride))
        }
        _ => None,
    }
}

pub fn round_up(value: u32, align: u32) -> u32 {
    value.div_ceil(align) * align
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_structural_equality() {
        let a = SymbolType::vector(ScalarKind::Float, 3);
        let b = SymbolType::vector(ScalarKind::Float, 3);
        let c = SymbolType::vector(ScalarKind::Float, 4);
        assert_eq!(a, b);
        assert_ne!(a, c);

        let f1 = SymbolType::Function(Arc::new(FunctionType::new(
            SymbolType::FLOAT,
            vec![FunctionParam::new(SymbolType::FLOAT)],
        )));
        let f2 = SymbolType::Function(Arc::new(FunctionType::new(
            SymbolType::FLOAT,
            vec![FunctionParam::new(SymbolType::FLOAT)],
        )));
        assert_eq!(f1, f2);
    }

    #[test]
    fn test_declared_name_vocabulary() {
        assert_eq!(
            SymbolType::from_declared_name("float3", &[]),
            Some(SymbolType::vector(ScalarKind::Float, 3))
        );
        assert_eq!(
            SymbolType::from_declared_name("uint2", &[]),
            Some(SymbolType::vector(ScalarKind::UInt, 2))
        );
        assert_eq!(
            SymbolType::from_declared_name("float3x4", &[]),
            Some(SymbolType::matrix(ScalarKind::Float, 3, 4))
        );
        assert_eq!(SymbolType::from_declared_name("float1", &[]), Some(SymbolType::FLOAT));
        assert_eq!(SymbolType::from_declared_name("vec3", &[]), None);

        match SymbolType::from_declared_name("Texture2DArray", &[]) {
            Some(SymbolType::Texture { dim, arrayed, multisampled, access, .. }) => {
                assert_eq!(dim, TextureDim::Dim2D);
                assert!(arrayed);
                assert!(!multisampled);
                assert_eq!(access, TextureAccess::ReadOnly);
            }
            other => panic!("unexpected: {other:?}"),
        }
        match SymbolType::from_declared_name("RWTexture2D", &[]) {
            Some(SymbolType::Texture { access, .. }) => {
                assert_eq!(access, TextureAccess::ReadWrite)
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_promotion_rules() {
        use ScalarKind::*;
        assert_eq!(promote(Int, Int), Some(Int));
        assert_eq!(promote(Int, Float), Some(Float));
        assert_eq!(promote(UInt, Int), Some(UInt));
        assert_eq!(promote(Int, Double), Some(Double));
        // Mixed precision floats require an explicit cast.
        assert_eq!(promote(Float, Double), None);
        assert_eq!(promote(Half, Float), None);
        assert_eq!(promote(Bool, Int), None);
    }

    #[test]
    fn test_std140_vec3_padding() {
        let (size, align) = std140_size_align(&SymbolType::vector(ScalarKind::Float, 3)).unwrap();
        assert_eq!((size, align), (12, 16));

        let (size, align) = std140_size_align(&SymbolType::matrix(ScalarKind::Float, 3, 3)).unwrap();
        assert_eq!((size, align), (48, 16));

        let (size, align) =
            std140_size_align(&SymbolType::array(SymbolType::FLOAT, 4)).unwrap();
        assert_eq!((size, align), (64, 16));
    }

    #[test]
    fn test_shaped_builder() {
        assert_eq!(SymbolType::shaped(ScalarKind::Float, 1, 1), SymbolType::FLOAT);
        assert_eq!(
            SymbolType::shaped(ScalarKind::Float, 3, 1),
            SymbolType::vector(ScalarKind::Float, 3)
        );
        assert_eq!(
            SymbolType::shaped(ScalarKind::Float, 1, 4),
            SymbolType::vector(ScalarKind::Float, 4)
        );
        assert_eq!(
            SymbolType::shaped(ScalarKind::Float, 2, 3),
            SymbolType::matrix(ScalarKind::Float, 2, 3)
        );
    }
}
