// types.rs — IR type system and target data layout
//
// Types are structural except for named structs, which are resolved through
// the module's struct table. `Layout` answers the size/alignment questions the
// expansion pass needs (element strides, memcpy sizes, slot alignment, driver
// record field offsets) for a 32- or 64-bit little-endian target.
//
// Preconditions: named struct bodies must not be recursive by value.
// Postconditions: all size queries on unsized types (void, opaque) return None.
// Failure modes: none (unsized queries are reported as None).
// Side effects: none.

use std::collections::BTreeMap;
use std::fmt;

// ── Types ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    Void,
    /// Integer of the given bit width (`i1`, `i8`, `i32`, `i128`, ...).
    Int(u32),
    Float,
    Double,
    Ptr(Box<Type>),
    Vector(Box<Type>, u32),
    Array(Box<Type>, u32),
    /// Literal (anonymous) struct.
    Struct(Vec<Type>),
    /// Reference to a named struct in the module's struct table.
    Named(String),
}

impl Type {
    pub fn i1() -> Type {
        Type::Int(1)
    }

    pub fn i8() -> Type {
        Type::Int(8)
    }

    pub fn i32() -> Type {
        Type::Int(32)
    }

    pub fn i64() -> Type {
        Type::Int(64)
    }

    /// `i8*`, the untyped byte pointer.
    pub fn byte_ptr() -> Type {
        Type::i8().ptr_to()
    }

    pub fn named(name: impl Into<String>) -> Type {
        Type::Named(name.into())
    }

    pub fn ptr_to(self) -> Type {
        Type::Ptr(Box::new(self))
    }

    pub fn pointee(&self) -> Option<&Type> {
        match self {
            Type::Ptr(inner) => Some(inner),
            _ => None,
        }
    }

    pub fn is_pointer(&self) -> bool {
        matches!(self, Type::Ptr(_))
    }

    pub fn is_void(&self) -> bool {
        matches!(self, Type::Void)
    }

    pub fn is_int(&self, bits: u32) -> bool {
        matches!(self, Type::Int(b) if *b == bits)
    }

    /// True for `i8*`.
    pub fn is_byte_ptr(&self) -> bool {
        matches!(self.pointee(), Some(Type::Int(8)))
    }

    /// Name of a named struct type, if this is one.
    pub fn struct_name(&self) -> Option<&str> {
        match self {
            Type::Named(name) => Some(name),
            _ => None,
        }
    }

    /// True for types that fit in a single register-like runtime value.
    pub fn is_scalar(&self) -> bool {
        matches!(
            self,
            Type::Int(_) | Type::Float | Type::Double | Type::Ptr(_)
        )
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Void => write!(f, "void"),
            Type::Int(bits) => write!(f, "i{}", bits),
            Type::Float => write!(f, "float"),
            Type::Double => write!(f, "double"),
            Type::Ptr(inner) => write!(f, "{}*", inner),
            Type::Vector(elem, n) => write!(f, "<{} x {}>", n, elem),
            Type::Array(elem, n) => write!(f, "[{} x {}]", n, elem),
            Type::Struct(fields) => {
                write!(f, "{{ ")?;
                for (i, field) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", field)?;
                }
                write!(f, " }}")
            }
            Type::Named(name) => write!(f, "%{}", name),
        }
    }
}

// ── Struct table ────────────────────────────────────────────────────────────

/// Body of a named struct declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StructDef {
    Opaque,
    Body(Vec<Type>),
}

/// Named struct declarations, keyed by name (without the `%` sigil).
pub type StructTable = BTreeMap<String, StructDef>;

// ── Data layout ─────────────────────────────────────────────────────────────

/// Target pointer width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PointerWidth {
    W32,
    #[default]
    W64,
}

impl PointerWidth {
    pub fn bytes(self) -> u64 {
        match self {
            PointerWidth::W32 => 4,
            PointerWidth::W64 => 8,
        }
    }
}

impl fmt::Display for PointerWidth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PointerWidth::W32 => write!(f, "ptr32"),
            PointerWidth::W64 => write!(f, "ptr64"),
        }
    }
}

/// Size and alignment oracle for one module's target.
#[derive(Clone, Copy)]
pub struct Layout<'a> {
    pub pointer_width: PointerWidth,
    structs: &'a StructTable,
}

fn round_up(value: u64, align: u64) -> u64 {
    if align <= 1 {
        value
    } else {
        value.div_ceil(align) * align
    }
}

impl<'a> Layout<'a> {
    pub fn new(pointer_width: PointerWidth, structs: &'a StructTable) -> Self {
        Self {
            pointer_width,
            structs,
        }
    }

    pub fn is_sized(&self, ty: &Type) -> bool {
        self.store_size(ty).is_some()
    }

    /// Bit width of a scalar or vector element type.
    fn scalar_bits(&self, ty: &Type) -> Option<u64> {
        match ty {
            Type::Int(bits) => Some(*bits as u64),
            Type::Float => Some(32),
            Type::Double => Some(64),
            Type::Ptr(_) => Some(self.pointer_width.bytes() * 8),
            _ => None,
        }
    }

    /// Number of bytes a store of `ty` may overwrite.
    pub fn store_size(&self, ty: &Type) -> Option<u64> {
        match ty {
            Type::Void => None,
            Type::Int(_) | Type::Float | Type::Double | Type::Ptr(_) => {
                Some(self.scalar_bits(ty)?.div_ceil(8))
            }
            Type::Vector(elem, n) => Some((self.scalar_bits(elem)? * *n as u64).div_ceil(8)),
            Type::Array(..) | Type::Struct(_) | Type::Named(_) => self.alloc_size(ty),
        }
    }

    /// Distance in bytes between consecutive elements of type `ty` in memory.
    pub fn alloc_size(&self, ty: &Type) -> Option<u64> {
        match ty {
            Type::Void => None,
            Type::Array(elem, n) => Some(self.alloc_size(elem)? * *n as u64),
            Type::Struct(_) | Type::Named(_) => {
                let fields = self.struct_fields(ty)?;
                let (size, align) = self.struct_extent(fields)?;
                Some(round_up(size, align))
            }
            _ => Some(round_up(self.store_size(ty)?, self.abi_align(ty)?)),
        }
    }

    /// ABI alignment of `ty` in bytes.
    pub fn abi_align(&self, ty: &Type) -> Option<u64> {
        match ty {
            Type::Void => None,
            Type::Int(_) => {
                let bytes = self.store_size(ty)?;
                Some(bytes.next_power_of_two().min(16))
            }
            Type::Float => Some(4),
            Type::Double => Some(8),
            Type::Ptr(_) => Some(self.pointer_width.bytes()),
            Type::Vector(..) => Some(self.store_size(ty)?.next_power_of_two()),
            Type::Array(elem, _) => self.abi_align(elem),
            Type::Struct(_) | Type::Named(_) => {
                let fields = self.struct_fields(ty)?;
                Some(self.struct_extent(fields)?.1)
            }
        }
    }

    /// Byte offset of field `index` within struct type `ty`.
    pub fn field_offset(&self, ty: &Type, index: usize) -> Option<u64> {
        let fields = self.struct_fields(ty)?;
        if index >= fields.len() {
            return None;
        }
        let mut offset = 0;
        for (i, field) in fields.iter().enumerate() {
            offset = round_up(offset, self.abi_align(field)?);
            if i == index {
                return Some(offset);
            }
            offset += self.alloc_size(field)?;
        }
        None
    }

    /// Type of field `index` within struct type `ty`.
    pub fn field_type<'t>(&self, ty: &'t Type, index: usize) -> Option<&'t Type>
    where
        'a: 't,
    {
        self.struct_fields(ty)?.get(index)
    }

    /// Field list of a struct type, following named references.
    pub fn struct_fields<'t>(&self, ty: &'t Type) -> Option<&'t [Type]>
    where
        'a: 't,
    {
        match ty {
            Type::Struct(fields) => Some(fields),
            Type::Named(name) => match self.structs.get(name)? {
                StructDef::Body(fields) => Some(fields),
                StructDef::Opaque => None,
            },
            _ => None,
        }
    }

    /// Unpadded end offset and alignment of a field sequence.
    fn struct_extent(&self, fields: &[Type]) -> Option<(u64, u64)> {
        let mut offset = 0;
        let mut align = 1;
        for field in fields {
            let field_align = self.abi_align(field)?;
            offset = round_up(offset, field_align) + self.alloc_size(field)?;
            align = align.max(field_align);
        }
        Some((offset, align))
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> StructTable {
        let mut t = StructTable::new();
        t.insert(
            "struct.Mixed".to_string(),
            StructDef::Body(vec![Type::i8(), Type::i32(), Type::Int(16)]),
        );
        t.insert("struct.Handle".to_string(), StructDef::Opaque);
        t
    }

    #[test]
    fn scalar_sizes() {
        let t = table();
        let l = Layout::new(PointerWidth::W64, &t);
        assert_eq!(l.alloc_size(&Type::i32()), Some(4));
        assert_eq!(l.alloc_size(&Type::Double), Some(8));
        assert_eq!(l.alloc_size(&Type::i1()), Some(1));
        assert_eq!(l.alloc_size(&Type::byte_ptr()), Some(8));
        assert_eq!(l.abi_align(&Type::Int(128)), Some(16));
    }

    #[test]
    fn pointer_width_32() {
        let t = table();
        let l = Layout::new(PointerWidth::W32, &t);
        assert_eq!(l.alloc_size(&Type::byte_ptr()), Some(4));
        assert_eq!(l.abi_align(&Type::i32().ptr_to()), Some(4));
    }

    #[test]
    fn vector_store_vs_alloc() {
        let t = table();
        let l = Layout::new(PointerWidth::W64, &t);
        let v3 = Type::Vector(Box::new(Type::Float), 3);
        assert_eq!(l.store_size(&v3), Some(12));
        assert_eq!(l.alloc_size(&v3), Some(16));
        assert_eq!(l.abi_align(&v3), Some(16));
    }

    #[test]
    fn struct_padding_and_offsets() {
        let t = table();
        let l = Layout::new(PointerWidth::W64, &t);
        let mixed = Type::named("struct.Mixed");
        assert_eq!(l.field_offset(&mixed, 0), Some(0));
        assert_eq!(l.field_offset(&mixed, 1), Some(4));
        assert_eq!(l.field_offset(&mixed, 2), Some(8));
        assert_eq!(l.field_offset(&mixed, 3), None);
        assert_eq!(l.alloc_size(&mixed), Some(12));
        assert_eq!(l.abi_align(&mixed), Some(4));
    }

    #[test]
    fn opaque_and_void_are_unsized() {
        let t = table();
        let l = Layout::new(PointerWidth::W64, &t);
        assert!(!l.is_sized(&Type::named("struct.Handle")));
        assert!(!l.is_sized(&Type::named("struct.Missing")));
        assert!(!l.is_sized(&Type::Void));
        assert!(l.is_sized(&Type::named("struct.Handle").ptr_to()));
    }

    #[test]
    fn display_forms() {
        let ty = Type::Array(Box::new(Type::byte_ptr()), 8);
        assert_eq!(ty.to_string(), "[8 x i8*]");
        let s = Type::Struct(vec![Type::Float, Type::Vector(Box::new(Type::i64()), 2)]);
        assert_eq!(s.to_string(), "{ float, <2 x i64> }");
        assert_eq!(Type::named("struct.ctx").ptr_to().to_string(), "%struct.ctx*");
    }
}
