//! SPIR-V module context: id allocation, type and constant interning.
//!
//! `SpirvContext` wraps `rspirv::dr::Builder` with the bookkeeping the
//! compiler leans on everywhere: a forward map interning structural
//! `SymbolType`s to one type id each (and a reverse map back), layout-
//! decorated array variants kept apart from their plain shapes, a constant
//! cache keyed by type and bit pattern, and capability tracking so wide
//! scalars and exotic image dimensions enable what they need exactly once.
//! Function-level block management lives in the `builder` module; both halves
//! are the same struct.

use std::collections::{HashMap, HashSet};

use log::trace;
use rspirv::dr::{Builder, Operand};
use rspirv::spirv::{
    self, AddressingModel, Capability, Decoration, ImageFormat, MemoryModel, StorageClass, Word,
};

use crate::bail_codegen;
use crate::error::Result;
use crate::types::{
    self, ScalarKind, Storage, StructField, SymbolType, TextureAccess, TextureDim,
};

/// An `(id, type id)` pair produced by every compiled expression. Whether it
/// denotes a value or a pointer is visible in its type id; nothing is
/// dereferenced implicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Value {
    pub id: Word,
    pub type_id: Word,
}

impl Value {
    pub fn new(id: Word, type_id: Word) -> Self {
        Value { id, type_id }
    }
}

pub struct SpirvContext {
    pub(crate) builder: Builder,

    // Type interning
    type_ids: HashMap<SymbolType, Word>,
    type_of_id: HashMap<Word, SymbolType>,
    ptr_type_cache: HashMap<(StorageClass, Word), Word>,
    ptr_pointee: HashMap<Word, (Word, StorageClass)>,
    /// Layout-decorated arrays, keyed by (element, length, stride). Kept out
    /// of `type_ids` so a decorated array never unifies with the plain array
    /// of the same shape.
    laid_out_arrays: HashMap<(SymbolType, Option<u32>, u32), Word>,

    // Constant interning
    const_cache: HashMap<(Word, u64), Word>,
    null_cache: HashMap<Word, Word>,

    capabilities: HashSet<Capability>,
    extensions: HashSet<&'static str>,
    glsl_ext: Word,

    // Current function state
    pub(crate) variables_block: Option<Word>,
    pub(crate) first_code_block: Option<Word>,
    pub(crate) current_block: Option<Word>,
    /// (continue target, merge target) per enclosing loop, innermost last.
    pub(crate) escape_blocks: Vec<(Word, Word)>,

    pub(crate) debug_names: bool,
}

impl SpirvContext {
    pub fn new(debug_names: bool) -> Self {
        let mut builder = Builder::new();
        builder.set_version(1, 5);
        builder.capability(Capability::Shader);
        builder.capability(Capability::Linkage);
        builder.memory_model(AddressingModel::Logical, MemoryModel::GLSL450);
        let glsl_ext = builder.ext_inst_import("GLSL.std.450");

        let mut capabilities = HashSet::new();
        capabilities.insert(Capability::Shader);
        capabilities.insert(Capability::Linkage);

        SpirvContext {
            builder,
            type_ids: HashMap::new(),
            type_of_id: HashMap::new(),
            ptr_type_cache: HashMap::new(),
            ptr_pointee: HashMap::new(),
            laid_out_arrays: HashMap::new(),
            const_cache: HashMap::new(),
            null_cache: HashMap::new(),
            capabilities,
            extensions: HashSet::new(),
            glsl_ext,
            variables_block: None,
            first_code_block: None,
            current_block: None,
            escape_blocks: Vec::new(),
            debug_names,
        }
    }

    /// Allocate a fresh id (used for block labels before the block exists).
    pub fn id(&mut self) -> Word {
        self.builder.id()
    }

    pub fn glsl_ext(&self) -> Word {
        self.glsl_ext
    }

    pub fn require_capability(&mut self, cap: Capability) {
        if self.capabilities.insert(cap) {
            trace!("enabling capability {cap:?}");
            self.builder.capability(cap);
        }
    }

    pub fn require_extension(&mut self, name: &'static str) {
        if self.extensions.insert(name) {
            self.builder.extension(name);
        }
    }

    /// Finish the module. Consumes the context.
    pub fn into_module(self) -> rspirv::dr::Module {
        self.builder.module()
    }

    // Types

    /// Intern a structural type, emitting its declaration on first sight.
    /// The same id comes back for structurally-equal types seen twice.
    pub fn register_type(&mut self, ty: &SymbolType) -> Result<Word> {
        if let Some(&id) = self.type_ids.get(ty) {
            return Ok(id);
        }
        let id = match ty {
            SymbolType::Scalar(kind) => self.register_scalar(*kind)?,
            SymbolType::Vector { base, size } => {
                let elem = self.register_scalar(*base)?;
                self.builder.type_vector(elem, *size)
            }
            SymbolType::Matrix { base, rows, cols } => {
                let column = self.register_type(&SymbolType::vector(*base, *rows))?;
                self.builder.type_matrix(column, *cols)
            }
            SymbolType::Pointer { base, storage } => {
                let pointee = self.register_type(base)?;
                self.type_pointer_to(storage_class(*storage), pointee)
            }
            SymbolType::Array { base, len: Some(len) } => {
                let elem = self.register_type(base)?;
                let len_id = self.const_int(ScalarKind::Int, *len as i64)?;
                self.builder.type_array(elem, len_id)
            }
            SymbolType::Array { base, len: None } => {
                let elem = self.register_type(base)?;
                self.builder.type_runtime_array(elem)
            }
            SymbolType::Struct { name, fields } => {
                let field_ids = fields
                    .iter()
                    .map(|f| self.register_type(&f.ty))
                    .collect::<Result<Vec<_>>>()?;
                let id = self.builder.type_struct(field_ids);
                if self.debug_names {
                    self.builder.name(id, name.clone());
                    for (i, field) in fields.iter().enumerate() {
                        self.builder.member_name(id, i as u32, field.name.clone());
                    }
                }
                id
            }
            SymbolType::ConstantBuffer { name, members } => {
                self.register_uniform_block(name, members)?
            }
            SymbolType::Function(func) => {
                // A function type at the IR level takes pointers for every
                // parameter; the call protocol materializes them.
                let ret = self.register_type(&func.return_type)?;
                let params = func
                    .params
                    .iter()
                    .map(|p| {
                        let pointee = self.register_type(&p.ty)?;
                        Ok(self.type_pointer_to(StorageClass::Function, pointee))
                    })
                    .collect::<Result<Vec<_>>>()?;
                self.builder.type_function(ret, params)
            }
            SymbolType::Texture { dim, arrayed, multisampled, access, sampled } => {
                self.register_image(*dim, *arrayed, *multisampled, *access, *sampled)?
            }
            SymbolType::Buffer { base, write_allowed } => {
                let Some(elem) = base.element_type() else {
                    bail_codegen!("buffer element type {base} has no scalar base");
                };
                let sampled_ty = self.register_scalar(elem)?;
                if *write_allowed {
                    self.require_capability(Capability::ImageBuffer);
                    let format = storage_format(elem);
                    self.builder.type_image(
                        sampled_ty,
                        spirv::Dim::DimBuffer,
                        0,
                        0,
                        0,
                        2,
                        format,
                        None,
                    )
                } else {
                    self.require_capability(Capability::SampledBuffer);
                    self.builder.type_image(
                        sampled_ty,
                        spirv::Dim::DimBuffer,
                        0,
                        0,
                        0,
                        1,
                        ImageFormat::Unknown,
                        None,
                    )
                }
            }
            SymbolType::StructuredBuffer { base, .. } => {
                let (size, align) = match types::std140_size_align(base) {
                    Some(pair) => pair,
                    None => bail_codegen!("structured buffer element {base} has no fixed layout"),
                };
                let stride = types::round_up(size, align);
                let array = self.laid_out_array(base, None, stride)?;
                let id = self.builder.type_struct([array]);
                self.builder.decorate(id, Decoration::Block, []);
                self.builder.member_decorate(
                    id,
                    0,
                    Decoration::Offset,
                    [Operand::LiteralBit32(0)],
                );
                id
            }
            SymbolType::Sampler => self.builder.type_sampler(),
            SymbolType::FunctionGroup(_) => {
                bail_codegen!("an overload set has no IR type");
            }
            SymbolType::Undefined(name) => {
                bail_codegen!("unresolved type '{name}' reached code generation");
            }
        };
        self.type_ids.insert(ty.clone(), id);
        self.type_of_id.entry(id).or_insert_with(|| ty.clone());
        Ok(id)
    }

    /// The structural type behind an interned id, if one was registered.
    pub fn lookup_type(&self, id: Word) -> Option<&SymbolType> {
        self.type_of_id.get(&id)
    }

    fn register_scalar(&mut self, kind: ScalarKind) -> Result<Word> {
        Ok(match kind {
            ScalarKind::Void => self.builder.type_void(),
            ScalarKind::Bool => self.builder.type_bool(),
            ScalarKind::Int => self.builder.type_int(32, 1),
            ScalarKind::UInt => self.builder.type_int(32, 0),
            ScalarKind::Int64 => {
                self.require_capability(Capability::Int64);
                self.builder.type_int(64, 1)
            }
            ScalarKind::UInt64 => {
                self.require_capability(Capability::Int64);
                self.builder.type_int(64, 0)
            }
            ScalarKind::Half => {
                self.require_capability(Capability::Float16);
                self.builder.type_float(16)
            }
            ScalarKind::Float => self.builder.type_float(32),
            ScalarKind::Double => {
                self.require_capability(Capability::Float64);
                self.builder.type_float(64)
            }
        })
    }

    fn register_image(
        &mut self,
        dim: TextureDim,
        arrayed: bool,
        multisampled: bool,
        access: TextureAccess,
        sampled: ScalarKind,
    ) -> Result<Word> {
        let sampled_ty = self.register_scalar(sampled)?;
        let dim_word = match dim {
            TextureDim::Dim1D => {
                self.require_capability(if access == TextureAccess::ReadWrite {
                    Capability::Image1D
                } else {
                    Capability::Sampled1D
                });
                spirv::Dim::Dim1D
            }
            TextureDim::Dim2D => spirv::Dim::Dim2D,
            TextureDim::Dim3D => spirv::Dim::Dim3D,
            TextureDim::Cube => {
                if arrayed {
                    self.require_capability(Capability::SampledCubeArray);
                }
                spirv::Dim::DimCube
            }
        };
        let (sampled_word, format) = match access {
            TextureAccess::ReadOnly | TextureAccess::Combined => (1, ImageFormat::Unknown),
            TextureAccess::ReadWrite => (2, storage_format(sampled)),
        };
        let image = self.builder.type_image(
            sampled_ty,
            dim_word,
            0,
            arrayed as u32,
            multisampled as u32,
            sampled_word,
            format,
            None,
        );
        Ok(match access {
            TextureAccess::Combined => self.builder.type_sampled_image(image),
            _ => image,
        })
    }

    /// Uniform block layout: std140 offsets per member, matrices column-major
    /// with their column stride, arrays through their laid-out variants.
    fn register_uniform_block(&mut self, name: &str, members: &[StructField]) -> Result<Word> {
        let mut member_ids = Vec::with_capacity(members.len());
        let mut offsets = Vec::with_capacity(members.len());
        let mut offset = 0u32;
        for member in members {
            let (size, align) = match types::std140_size_align(&member.ty) {
                Some(pair) => pair,
                None => bail_codegen!(
                    "'{}': type {} cannot be a uniform block member",
                    member.name,
                    member.ty
                ),
            };
            let member_id = match &member.ty {
                SymbolType::Array { base, len: Some(len) } => {
                    let (elem_size, elem_align) = match types::std140_size_align(base) {
                        Some(pair) => pair,
                        None => bail_codegen!("'{}': array element has no layout", member.name),
                    };
                    let stride = types::round_up(elem_size.max(elem_align), 16);
                    self.laid_out_array(base, Some(*len), stride)?
                }
                other => self.register_type(other)?,
            };
            offset = types::round_up(offset, align);
            member_ids.push(member_id);
            offsets.push(offset);
            offset += size;
        }

        let id = self.builder.type_struct(member_ids);
        self.builder.decorate(id, Decoration::Block, []);
        for (i, member) in members.iter().enumerate() {
            self.builder.member_decorate(
                id,
                i as u32,
                Decoration::Offset,
                [Operand::LiteralBit32(offsets[i])],
            );
            if let SymbolType::Matrix { .. } = member.ty {
                let (_, stride) = types::std140_size_align(&member.ty)
                    .unwrap_or((0, 16));
                self.builder.member_decorate(id, i as u32, Decoration::ColMajor, []);
                self.builder.member_decorate(
                    id,
                    i as u32,
                    Decoration::MatrixStride,
                    [Operand::LiteralBit32(stride)],
                );
            }
        }
        if self.debug_names {
            self.builder.name(id, name.to_string());
            for (i, member) in members.iter().enumerate() {
                self.builder.member_name(id, i as u32, member.name.clone());
            }
        }
        Ok(id)
    }

    /// An array type carrying an ArrayStride decoration. Length constants
    /// here use an unsigned type while plain arrays use a signed one, so the
    /// decorated declaration never unifies with an undecorated one.
    fn laid_out_array(
        &mut self,
        elem: &SymbolType,
        len: Option<u32>,
        stride: u32,
    ) -> Result<Word> {
        let key = (elem.clone(), len, stride);
        if let Some(&id) = self.laid_out_arrays.get(&key) {
            return Ok(id);
        }
        let elem_id = self.register_type(elem)?;
        let id = match len {
            Some(n) => {
                let len_id = self.const_int(ScalarKind::UInt, n as i64)?;
                self.builder.type_array(elem_id, len_id)
            }
            None => self.builder.type_runtime_array(elem_id),
        };
        self.builder
            .decorate(id, Decoration::ArrayStride, [Operand::LiteralBit32(stride)]);
        self.laid_out_arrays.insert(key, id);
        Ok(id)
    }

    /// Cached pointer type at the word level.
    pub fn type_pointer_to(&mut self, storage: StorageClass, pointee: Word) -> Word {
        if let Some(&id) = self.ptr_type_cache.get(&(storage, pointee)) {
            return id;
        }
        let id = self.builder.type_pointer(None, storage, pointee);
        self.ptr_type_cache.insert((storage, pointee), id);
        self.ptr_pointee.insert(id, (pointee, storage));
        id
    }

    /// Pointee type and storage class of a pointer type id.
    pub(crate) fn pointee_of(&self, ptr_type: Word) -> Option<(Word, StorageClass)> {
        self.ptr_pointee.get(&ptr_type).copied()
    }

    // Constants

    pub fn const_int(&mut self, kind: ScalarKind, value: i64) -> Result<Word> {
        let ty = self.register_scalar(kind)?;
        let key = (ty, value as u64);
        if let Some(&id) = self.const_cache.get(&key) {
            return Ok(id);
        }
        let id = if kind.bit_width() == 64 {
            self.builder.constant_bit64(ty, value as u64)
        } else {
            self.builder.constant_bit32(ty, value as u32)
        };
        self.const_cache.insert(key, id);
        Ok(id)
    }

    pub fn const_float(&mut self, kind: ScalarKind, value: f64) -> Result<Word> {
        let ty = self.register_scalar(kind)?;
        let bits = match kind {
            ScalarKind::Half => f32_to_f16_bits(value as f32) as u64,
            ScalarKind::Float => (value as f32).to_bits() as u64,
            ScalarKind::Double => value.to_bits(),
            other => bail_codegen!("{other} is not a floating-point kind"),
        };
        let key = (ty, bits);
        if let Some(&cached) = self.const_cache.get(&key) {
            return Ok(cached);
        }
        let id = match kind {
            ScalarKind::Double => self.builder.constant_bit64(ty, bits),
            _ => self.builder.constant_bit32(ty, bits as u32),
        };
        self.const_cache.insert(key, id);
        Ok(id)
    }

    pub fn const_bool(&mut self, value: bool) -> Result<Word> {
        let ty = self.register_scalar(ScalarKind::Bool)?;
        let key = (ty, value as u64);
        if let Some(&id) = self.const_cache.get(&key) {
            return Ok(id);
        }
        let id = if value {
            self.builder.constant_true(ty)
        } else {
            self.builder.constant_false(ty)
        };
        self.const_cache.insert(key, id);
        Ok(id)
    }

    pub fn const_null(&mut self, type_id: Word) -> Word {
        if let Some(&id) = self.null_cache.get(&type_id) {
            return id;
        }
        let id = self.builder.constant_null(type_id);
        self.null_cache.insert(type_id, id);
        id
    }

    pub fn const_composite(
        &mut self,
        type_id: Word,
        constituents: impl IntoIterator<Item = Word>,
    ) -> Word {
        self.builder.constant_composite(type_id, constituents)
    }
}

pub(crate) fn storage_class(storage: Storage) -> StorageClass {
    match storage {
        Storage::Function => StorageClass::Function,
        Storage::Private => StorageClass::Private,
        Storage::Uniform => StorageClass::Uniform,
        Storage::UniformConstant => StorageClass::UniformConstant,
        Storage::StorageBuffer => StorageClass::StorageBuffer,
    }
}

fn storage_format(kind: ScalarKind) -> ImageFormat {
    match kind {
        ScalarKind::Int | ScalarKind::Int64 => ImageFormat::Rgba32i,
        ScalarKind::UInt | ScalarKind::UInt64 => ImageFormat::Rgba32ui,
        _ => ImageFormat::Rgba32f,
    }
}

/// Round-to-nearest-even f32 to IEEE binary16 bit conversion.
fn f32_to_f16_bits(value: f32) -> u16 {
    let bits = value.to_bits();
    let sign = ((bits >> 16) & 0x8000) as u16;
    let exp = ((bits >> 23) & 0xff) as i32;
    let mantissa = bits & 0x007f_ffff;

    if exp == 0xff {
        // Inf or NaN
        let payload = if mantissa != 0 { 0x0200 } else { 0 };
        return sign | 0x7c00 | payload;
    }
    let unbiased = exp - 127;
    if unbiased > 15 {
        return sign | 0x7c00; // overflow to infinity
    }
    if unbiased >= -14 {
        let half_exp = ((unbiased + 15) as u16) << 10;
        let half_mant = (mantissa >> 13) as u16;
        let round = (mantissa >> 12) & 1;
        let sticky = (mantissa & 0x0fff != 0) as u32;
        let mut out = sign | half_exp | half_mant;
        if round == 1 && (sticky == 1 || half_mant & 1 == 1) {
            out = out.wrapping_add(1);
        }
        return out;
    }
    if unbiased >= -24 {
        // Subnormal
        let shift = (-1 - unbiased) as u32 + 9;
        let full = mantissa | 0x0080_0000;
        let half_mant = (full >> (shift + 1)) as u16;
        let round = (full >> shift) & 1;
        let mut out = sign | half_mant;
        if round == 1 {
            out = out.wrapping_add(1);
        }
        return out;
    }
    sign // underflow to zero
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_interning_idempotence() {
        let mut ctx = SpirvContext::new(false);
        let v3 = SymbolType::vector(ScalarKind::Float, 3);
        let a = ctx.register_type(&v3).unwrap();
        let b = ctx.register_type(&SymbolType::vector(ScalarKind::Float, 3)).unwrap();
        assert_eq!(a, b);
        assert_eq!(ctx.lookup_type(a), Some(&v3));

        let m = SymbolType::matrix(ScalarKind::Float, 4, 4);
        let c = ctx.register_type(&m).unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn test_constant_interning() {
        let mut ctx = SpirvContext::new(false);
        let a = ctx.const_int(ScalarKind::Int, 42).unwrap();
        let b = ctx.const_int(ScalarKind::Int, 42).unwrap();
        assert_eq!(a, b);
        // Same bits, different type: distinct constants.
        let c = ctx.const_int(ScalarKind::UInt, 42).unwrap();
        assert_ne!(a, c);

        let f = ctx.const_float(ScalarKind::Float, 1.5).unwrap();
        let g = ctx.const_float(ScalarKind::Float, 1.5).unwrap();
        assert_eq!(f, g);
    }

    #[test]
    fn test_wide_scalars_enable_capabilities() {
        let mut ctx = SpirvContext::new(false);
        ctx.register_type(&SymbolType::DOUBLE).unwrap();
        ctx.register_type(&SymbolType::Scalar(ScalarKind::Int64)).unwrap();
        let module = ctx.into_module();
        let caps: Vec<Capability> = module
            .capabilities
            .iter()
            .filter_map(|inst| match inst.operands.first() {
                Some(Operand::Capability(cap)) => Some(*cap),
                _ => None,
            })
            .collect();
        assert!(caps.contains(&Capability::Float64));
        assert!(caps.contains(&Capability::Int64));
        assert!(caps.contains(&Capability::Shader));
    }

    #[test]
    fn test_f16_encoding() {
        assert_eq!(f32_to_f16_bits(0.0), 0x0000);
        assert_eq!(f32_to_f16_bits(1.0), 0x3c00);
        assert_eq!(f32_to_f16_bits(-2.0), 0xc000);
        assert_eq!(f32_to_f16_bits(65504.0), 0x7bff);
        assert_eq!(f32_to_f16_bits(f32::INFINITY), 0x7c00);
    }
}
