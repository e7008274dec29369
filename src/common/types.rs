//! Interned IR type system.
//!
//! Every distinct type has exactly one canonical instance, so type equality
//! is pointer equality and handles are `Copy`. The interners are process-wide
//! and append-only; handles stay valid for the lifetime of the process.
//!
//! Sizing follows the target VM's word alignment: `i1`, `i8`, `i32` and
//! pointers all occupy 4 bytes. Aggregates are laid out with no padding:
//! an array is N contiguous elements and a struct field's offset is the sum
//! of the sizes of the fields before it.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Mutex, OnceLock};

use rustc_hash::FxHashMap;

#[derive(Debug)]
pub enum TypeData {
    Void,
    I1,
    I8,
    I32,
    I64,
    Ptr(Type),
    Array(Type, usize),
    Struct(StructData),
}

#[derive(Debug)]
pub struct StructData {
    pub name: String,
    pub fields: Vec<StructField>,
}

#[derive(Debug)]
pub struct StructField {
    pub name: String,
    pub ty: Type,
}

/// A handle to an interned type. Compares and hashes by identity.
#[derive(Debug, Clone, Copy)]
pub struct Type(&'static TypeData);

impl PartialEq for Type {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.0, other.0)
    }
}

impl Eq for Type {}

impl Hash for Type {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (self.0 as *const TypeData as usize).hash(state);
    }
}

fn leak(data: TypeData) -> Type {
    Type(Box::leak(Box::new(data)))
}

macro_rules! primitive {
    ($fn_name:ident, $variant:ident) => {
        pub fn $fn_name() -> Type {
            static CACHE: OnceLock<Type> = OnceLock::new();
            *CACHE.get_or_init(|| leak(TypeData::$variant))
        }
    };
}

impl Type {
    primitive!(void, Void);
    primitive!(i1, I1);
    primitive!(i8, I8);
    primitive!(i32, I32);
    primitive!(i64, I64);

    pub fn pointer_to(base: Type) -> Type {
        static CACHE: OnceLock<Mutex<FxHashMap<Type, Type>>> = OnceLock::new();
        let mut cache = CACHE.get_or_init(Default::default).lock().unwrap();
        *cache.entry(base).or_insert_with(|| leak(TypeData::Ptr(base)))
    }

    pub fn char_ptr() -> Type {
        Type::pointer_to(Type::i8())
    }

    pub fn array_of(element: Type, len: usize) -> Type {
        static CACHE: OnceLock<Mutex<FxHashMap<(Type, usize), Type>>> = OnceLock::new();
        let mut cache = CACHE.get_or_init(Default::default).lock().unwrap();
        *cache
            .entry((element, len))
            .or_insert_with(|| leak(TypeData::Array(element, len)))
    }

    fn struct_registry() -> &'static Mutex<FxHashMap<String, Type>> {
        static REGISTRY: OnceLock<Mutex<FxHashMap<String, Type>>> = OnceLock::new();
        REGISTRY.get_or_init(Default::default)
    }

    /// Register a named struct type. Registering an already-known name
    /// returns the existing instance; field lists are not re-checked.
    pub fn register_struct(name: &str, fields: Vec<(String, Type)>) -> Type {
        let mut registry = Type::struct_registry().lock().unwrap();
        *registry.entry(name.to_string()).or_insert_with(|| {
            let fields = fields
                .into_iter()
                .map(|(name, ty)| StructField { name, ty })
                .collect();
            leak(TypeData::Struct(StructData { name: name.to_string(), fields }))
        })
    }

    pub fn struct_by_name(name: &str) -> Option<Type> {
        Type::struct_registry().lock().unwrap().get(name).copied()
    }

    pub fn data(&self) -> &'static TypeData {
        self.0
    }

    pub fn is_void(&self) -> bool {
        matches!(self.0, TypeData::Void)
    }

    pub fn is_bool(&self) -> bool {
        matches!(self.0, TypeData::I1)
    }

    pub fn is_char(&self) -> bool {
        matches!(self.0, TypeData::I8)
    }

    pub fn is_int(&self) -> bool {
        matches!(self.0, TypeData::I32)
    }

    pub fn is_pointer(&self) -> bool {
        matches!(self.0, TypeData::Ptr(_))
    }

    pub fn is_array(&self) -> bool {
        matches!(self.0, TypeData::Array(..))
    }

    pub fn is_struct(&self) -> bool {
        matches!(self.0, TypeData::Struct(_))
    }

    /// The type a pointer points at.
    pub fn pointee(&self) -> Option<Type> {
        match self.0 {
            TypeData::Ptr(base) => Some(*base),
            _ => None,
        }
    }

    /// An array's element type.
    pub fn element(&self) -> Option<Type> {
        match self.0 {
            TypeData::Array(element, _) => Some(*element),
            _ => None,
        }
    }

    pub fn array_len(&self) -> Option<usize> {
        match self.0 {
            TypeData::Array(_, len) => Some(*len),
            _ => None,
        }
    }

    /// Size in bytes. `i1`/`i8`/`i32`/pointers are all one 4-byte VM word;
    /// aggregates follow from their parts with no padding.
    pub fn size(&self) -> usize {
        match self.0 {
            TypeData::Void => 0,
            TypeData::I1 | TypeData::I8 | TypeData::I32 | TypeData::Ptr(_) => 4,
            TypeData::I64 => 8,
            TypeData::Array(element, len) => element.size() * len,
            TypeData::Struct(data) => data.fields.iter().map(|f| f.ty.size()).sum(),
        }
    }

    pub fn fields(&self) -> Option<&'static [StructField]> {
        match self.0 {
            TypeData::Struct(data) => Some(&data.fields),
            _ => None,
        }
    }

    pub fn struct_name(&self) -> Option<&'static str> {
        match self.0 {
            TypeData::Struct(data) => Some(&data.name),
            _ => None,
        }
    }

    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields()?.iter().position(|f| f.name == name)
    }

    pub fn field_type(&self, index: usize) -> Option<Type> {
        Some(self.fields()?.get(index)?.ty)
    }

    /// Byte offset of field `index`: the sum of the sizes of all earlier
    /// fields (no alignment padding).
    pub fn field_offset(&self, index: usize) -> usize {
        match self.fields() {
            Some(fields) => fields.iter().take(index).map(|f| f.ty.size()).sum(),
            None => 0,
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            TypeData::Void => write!(f, "void"),
            TypeData::I1 => write!(f, "i1"),
            TypeData::I8 => write!(f, "i8"),
            TypeData::I32 => write!(f, "i32"),
            TypeData::I64 => write!(f, "i64"),
            TypeData::Ptr(base) => write!(f, "{}*", base),
            TypeData::Array(element, len) => write!(f, "[{} x {}]", len, element),
            TypeData::Struct(data) => write!(f, "struct {}", data.name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primitives_are_interned() {
        assert_eq!(Type::i32(), Type::i32());
        assert_ne!(Type::i32(), Type::i8());
        assert_eq!(Type::pointer_to(Type::i32()), Type::pointer_to(Type::i32()));
        assert_ne!(Type::pointer_to(Type::i32()), Type::pointer_to(Type::i8()));
        assert_eq!(Type::array_of(Type::i8(), 3), Type::array_of(Type::i8(), 3));
        assert_ne!(Type::array_of(Type::i8(), 3), Type::array_of(Type::i8(), 4));
    }

    #[test]
    fn word_sized_scalars() {
        assert_eq!(Type::i1().size(), 4);
        assert_eq!(Type::i8().size(), 4);
        assert_eq!(Type::i32().size(), 4);
        assert_eq!(Type::char_ptr().size(), 4);
        assert_eq!(Type::i64().size(), 8);
        assert_eq!(Type::array_of(Type::i32(), 10).size(), 40);
    }

    #[test]
    fn struct_layout_has_no_padding() {
        let ty = Type::register_struct(
            "types_test_point",
            vec![
                ("x".to_string(), Type::i32()),
                ("tag".to_string(), Type::i8()),
                ("ys".to_string(), Type::array_of(Type::i32(), 2)),
            ],
        );
        assert_eq!(ty.size(), 4 + 4 + 8);
        assert_eq!(ty.field_index("tag"), Some(1));
        assert_eq!(ty.field_index("missing"), None);
        assert_eq!(ty.field_offset(0), 0);
        assert_eq!(ty.field_offset(1), 4);
        assert_eq!(ty.field_offset(2), 8);
        assert_eq!(ty.field_type(2), Some(Type::array_of(Type::i32(), 2)));
        assert_eq!(Type::struct_by_name("types_test_point"), Some(ty));
        assert_eq!(Type::struct_by_name("types_test_absent"), None);
    }

    #[test]
    fn display_forms() {
        assert_eq!(Type::pointer_to(Type::i8()).to_string(), "i8*");
        assert_eq!(Type::array_of(Type::i32(), 4).to_string(), "[4 x i32]");
    }
}
