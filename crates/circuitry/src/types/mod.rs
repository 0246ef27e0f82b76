//! Hash-consed structural types.
//!
//! Every non-primitive type is interned by the [`TypeRegistry`] so that two
//! structurally equal types are the same `Arc` and compare by identity.
//! Each interned type also carries its virtual method table.

use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use indexmap::IndexSet;

use crate::diagnostics::Diagnostic;
use crate::interp::Op;

/// Largest element count of a vector type.
pub const MAX_VECTOR_LEN: u32 = 1 << 16;

/// Largest number of values one instance of a type may hold.
pub const MAX_VALUE_CELLS: u64 = 1 << 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Primitive {
    Bool,
    I8,
    U8,
    I16,
    I32,
    I64,
    F32,
    F64,
    /// Interned name, stored as its `u32` id.
    Label,
}

impl Primitive {
    pub const ALL: [Primitive; 9] = [
        Primitive::Bool,
        Primitive::I8,
        Primitive::U8,
        Primitive::I16,
        Primitive::I32,
        Primitive::I64,
        Primitive::F32,
        Primitive::F64,
        Primitive::Label,
    ];

    pub fn size(self) -> u32 {
        match self {
            Primitive::Bool | Primitive::I8 | Primitive::U8 => 1,
            Primitive::I16 => 2,
            Primitive::I32 | Primitive::F32 | Primitive::Label => 4,
            Primitive::I64 | Primitive::F64 => 8,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Primitive::Bool => "bool",
            Primitive::I8 => "i8",
            Primitive::U8 => "u8",
            Primitive::I16 => "i16",
            Primitive::I32 => "i32",
            Primitive::I64 => "i64",
            Primitive::F32 => "f32",
            Primitive::F64 => "f64",
            Primitive::Label => "label",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|primitive| primitive.name() == name)
    }

    pub fn is_integer(self) -> bool {
        matches!(
            self,
            Primitive::I8 | Primitive::U8 | Primitive::I16 | Primitive::I32 | Primitive::I64
        )
    }

    pub fn is_float(self) -> bool {
        matches!(self, Primitive::F32 | Primitive::F64)
    }
}

/// Pointer qualifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PointerFlags(u8);

impl PointerFlags {
    pub const NONE: Self = Self(0);
    pub const NO_CAPTURE: Self = Self(1);
    pub const READ_ONLY: Self = Self(2);

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn bits(self) -> u8 {
        self.0
    }
}

impl std::ops::BitOr for PointerFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

#[derive(Debug, Clone)]
pub enum TypeKind {
    Primitive(Primitive),
    Vector {
        elem: Type,
        count: u32,
        simd: bool,
    },
    Struct {
        fields: Vec<Type>,
        names: Option<Vec<Arc<str>>>,
        /// Numeric id of the declaring definition; not part of structural identity.
        owner: Option<u32>,
    },
    Pointer {
        target: Option<Type>,
        flags: PointerFlags,
    },
    Function {
        ret: Type,
        params: Vec<Type>,
    },
}

pub struct TypeData {
    id: u32,
    kind: TypeKind,
    size: u32,
    align: u32,
    /// Values a zero-initialized instance holds, itself included.
    cells: u64,
    methods: RwLock<HashMap<Arc<str>, Arc<dyn Op>>>,
}

/// Interned type handle. Equality is identity.
#[derive(Clone)]
pub struct Type(Arc<TypeData>);

impl PartialEq for Type {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for Type {}

impl Hash for Type {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.id.hash(state);
    }
}

impl fmt::Debug for Type {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Type#{}({self})", self.0.id)
    }
}

impl Type {
    pub fn id(&self) -> u32 {
        self.0.id
    }

    pub fn kind(&self) -> &TypeKind {
        &self.0.kind
    }

    pub fn size(&self) -> u32 {
        self.0.size
    }

    pub fn align(&self) -> u32 {
        self.0.align
    }

    /// Number of values in a zero-initialized instance, nested ones included.
    pub fn cells(&self) -> u64 {
        self.0.cells
    }

    /// Definition error when an instance would exceed [`MAX_VALUE_CELLS`].
    pub fn check_cells(&self) -> Result<(), Diagnostic> {
        if self.cells() > MAX_VALUE_CELLS {
            return Err(Diagnostic::definition(format!(
                "`{self}` holds {} values (limit {MAX_VALUE_CELLS})",
                self.cells()
            )));
        }
        Ok(())
    }

    pub fn primitive(&self) -> Option<Primitive> {
        match self.kind() {
            TypeKind::Primitive(primitive) => Some(*primitive),
            _ => None,
        }
    }

    pub fn is_void(&self) -> bool {
        matches!(self.kind(), TypeKind::Struct { fields, .. } if fields.is_empty())
    }

    /// Whether values of this type can be widened into SIMD lanes.
    pub fn simd_capable(&self) -> bool {
        match self.kind() {
            TypeKind::Primitive(Primitive::Label) => false,
            TypeKind::Primitive(_) => true,
            TypeKind::Vector { simd, elem, .. } => *simd || elem.simd_capable(),
            _ => false,
        }
    }

    /// Pointers without `READ_ONLY` alias their contents (lists, maps).
    pub fn is_shared(&self) -> bool {
        matches!(self.kind(), TypeKind::Pointer { flags, .. } if !flags.contains(PointerFlags::READ_ONLY))
    }

    pub fn field_names(&self) -> Option<&[Arc<str>]> {
        match self.kind() {
            TypeKind::Struct { names, .. } => names.as_deref(),
            _ => None,
        }
    }

    /// Element type at `index`.
    pub fn element(&self, index: usize) -> Result<Type, Diagnostic> {
        match self.kind() {
            TypeKind::Vector { elem, count, .. } if index < *count as usize => Ok(elem.clone()),
            TypeKind::Struct { fields, .. } if index < fields.len() => Ok(fields[index].clone()),
            TypeKind::Pointer {
                target: Some(target),
                ..
            } => Ok(target.clone()),
            TypeKind::Vector { .. } | TypeKind::Struct { .. } => Err(Diagnostic::type_error(
                format!("index {index} out of range for `{self}`"),
            )),
            _ => Err(Diagnostic::type_error(format!(
                "`{self}` does not support element access"
            ))),
        }
    }

    /// Single unnamed field structs are transparent wrappers around their field.
    pub fn wrapped(&self) -> Option<&Type> {
        match self.kind() {
            TypeKind::Struct {
                fields,
                names: None,
                ..
            } if fields.len() == 1 => fields.first(),
            _ => None,
        }
    }

    pub fn method(&self, name: &str) -> Option<Arc<dyn Op>> {
        let methods = self.0.methods.read().unwrap_or_else(PoisonError::into_inner);
        methods.get(name).cloned()
    }

    pub fn has_method(&self, name: &str) -> bool {
        let methods = self.0.methods.read().unwrap_or_else(PoisonError::into_inner);
        methods.contains_key(name)
    }

    fn define_method(&self, name: &str, op: Arc<dyn Op>) {
        let mut methods = self.0.methods.write().unwrap_or_else(PoisonError::into_inner);
        methods.insert(name.into(), op);
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.kind() {
            TypeKind::Primitive(primitive) => f.write_str(primitive.name()),
            TypeKind::Vector { elem, count, simd } => {
                if *simd {
                    write!(f, "<{elem}; {count}>")
                } else {
                    write!(f, "[{elem}; {count}]")
                }
            }
            TypeKind::Struct { fields, names, .. } => {
                f.write_str("{")?;
                for (index, field) in fields.iter().enumerate() {
                    if index > 0 {
                        f.write_str(", ")?;
                    }
                    if let Some(names) = names {
                        write!(f, "{}: ", names[index])?;
                    }
                    write!(f, "{field}")?;
                }
                f.write_str("}")
            }
            TypeKind::Pointer { target, flags } => {
                f.write_str("*")?;
                if flags.contains(PointerFlags::READ_ONLY) {
                    f.write_str("const ")?;
                }
                if flags.contains(PointerFlags::NO_CAPTURE) {
                    f.write_str("nocapture ")?;
                }
                match target {
                    Some(target) => write!(f, "{target}"),
                    None => f.write_str("void"),
                }
            }
            TypeKind::Function { ret, params } => {
                f.write_str("fn(")?;
                for (index, param) in params.iter().enumerate() {
                    if index > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{param}")?;
                }
                write!(f, ") -> {ret}")
            }
        }
    }
}

/// Structural identity of a non-primitive type; children by interned id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum TypeKey {
    Vector(u32, u32, bool),
    Struct(Vec<u32>, Option<Vec<Arc<str>>>),
    Pointer(Option<u32>, u8),
    Function(u32, Vec<u32>),
}

impl TypeKey {
    fn of(kind: &TypeKind) -> Option<Self> {
        Some(match kind {
            TypeKind::Primitive(_) => return None,
            TypeKind::Vector { elem, count, simd } => TypeKey::Vector(elem.id(), *count, *simd),
            TypeKind::Struct { fields, names, .. } => {
                TypeKey::Struct(fields.iter().map(Type::id).collect(), names.clone())
            }
            TypeKind::Pointer { target, flags } => {
                TypeKey::Pointer(target.as_ref().map(Type::id), flags.bits())
            }
            TypeKind::Function { ret, params } => {
                TypeKey::Function(ret.id(), params.iter().map(Type::id).collect())
            }
        })
    }
}

fn align_up(offset: u32, align: u32) -> u32 {
    offset.div_ceil(align.max(1)).saturating_mul(align.max(1))
}

/// Byte size of `count` elements of `elem`, `None` on overflow.
fn vector_size(elem: &Type, count: u32, simd: bool) -> Option<u32> {
    let size = elem.size().checked_mul(count)?;
    if simd && size != 0 {
        size.checked_next_power_of_two()
    } else {
        Some(size)
    }
}

fn cells(kind: &TypeKind) -> u64 {
    match kind {
        TypeKind::Vector { elem, count, .. } => {
            elem.cells().saturating_mul(u64::from(*count)).saturating_add(1)
        }
        TypeKind::Struct { fields, .. } => fields
            .iter()
            .fold(1, |total: u64, field| total.saturating_add(field.cells())),
        _ => 1,
    }
}

fn layout(kind: &TypeKind) -> (u32, u32) {
    match kind {
        TypeKind::Primitive(primitive) => (primitive.size(), primitive.size()),
        TypeKind::Vector { elem, count, simd } => {
            // `vector_of` has already rejected sizes that overflow.
            let size = vector_size(elem, *count, *simd).unwrap_or(u32::MAX);
            if *simd {
                (size, size.max(1))
            } else {
                (size, elem.align())
            }
        }
        TypeKind::Struct { fields, .. } => {
            let mut offset: u32 = 0;
            let mut align = 1;
            for field in fields {
                offset = align_up(offset, field.align()).saturating_add(field.size());
                align = align.max(field.align());
            }
            (align_up(offset, align), align)
        }
        TypeKind::Pointer { .. } | TypeKind::Function { .. } => (8, 8),
    }
}

struct Tables {
    interned: HashMap<TypeKey, Type>,
    primitives: Vec<Type>,
    next_id: u32,
    labels: IndexSet<Arc<str>>,
}

impl Tables {
    /// Fresh tables whose ids start at `first_id`.
    fn starting_at(first_id: u32) -> Self {
        let mut tables = Self {
            interned: HashMap::new(),
            primitives: Vec::with_capacity(Primitive::ALL.len()),
            next_id: first_id,
            labels: IndexSet::new(),
        };
        for primitive in Primitive::ALL {
            let ty = tables.build(TypeKind::Primitive(primitive));
            tables.primitives.push(ty);
        }
        tables
    }

    fn build(&mut self, kind: TypeKind) -> Type {
        let (size, align) = layout(&kind);
        let cells = cells(&kind);
        let id = self.next_id;
        self.next_id += 1;
        Type(Arc::new(TypeData {
            id,
            kind,
            size,
            align,
            cells,
            methods: RwLock::new(HashMap::new()),
        }))
    }
}

/// Process-wide (per session) intern table for types and label names.
pub struct TypeRegistry {
    tables: Mutex<Tables>,
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self {
            tables: Mutex::new(Tables::starting_at(0)),
        }
    }

    fn tables(&self) -> std::sync::MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Drop every interned type, label and method table.
    ///
    /// Ids keep counting up, so handles kept from before the reset never
    /// share an id with a new type.
    pub fn reset(&self) {
        let mut tables = self.tables();
        let next_id = tables.next_id;
        *tables = Tables::starting_at(next_id);
    }

    /// Number of interned non-primitive types.
    pub fn len(&self) -> usize {
        self.tables().interned.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Canonical instance for `kind`.
    pub fn intern(&self, kind: TypeKind) -> Type {
        let mut tables = self.tables();
        let Some(key) = TypeKey::of(&kind) else {
            let TypeKind::Primitive(primitive) = kind else {
                unreachable!("only primitives have no key")
            };
            return tables.primitives[primitive as usize].clone();
        };
        if let Some(existing) = tables.interned.get(&key) {
            return existing.clone();
        }
        let ty = tables.build(kind);
        tables.interned.insert(key, ty.clone());
        ty
    }

    pub fn primitive(&self, primitive: Primitive) -> Type {
        self.tables().primitives[primitive as usize].clone()
    }

    /// Vector of `count` elements. Counts above [`MAX_VECTOR_LEN`] and sizes
    /// that do not fit in `u32` bytes are definition errors.
    pub fn vector_of(&self, elem: &Type, count: u32, simd: bool) -> Result<Type, Diagnostic> {
        let cells = elem.cells().saturating_mul(u64::from(count));
        if count > MAX_VECTOR_LEN
            || cells >= MAX_VALUE_CELLS
            || vector_size(elem, count, simd).is_none()
        {
            return Err(Diagnostic::definition(format!(
                "vector of {count} `{elem}` elements is too large (limit {MAX_VECTOR_LEN})"
            )));
        }
        Ok(self.intern(TypeKind::Vector {
            elem: elem.clone(),
            count,
            simd,
        }))
    }

    pub fn struct_of(&self, fields: impl IntoIterator<Item = Type>) -> Type {
        self.intern(TypeKind::Struct {
            fields: fields.into_iter().collect(),
            names: None,
            owner: None,
        })
    }

    pub fn named_struct_of(
        &self,
        fields: impl IntoIterator<Item = (Arc<str>, Type)>,
        owner: Option<u32>,
    ) -> Type {
        let (names, fields): (Vec<_>, Vec<_>) = fields.into_iter().unzip();
        self.intern(TypeKind::Struct {
            fields,
            names: Some(names),
            owner,
        })
    }

    /// The zero-field struct.
    pub fn void(&self) -> Type {
        self.struct_of([])
    }

    pub fn pointer_to(&self, target: Option<&Type>, flags: PointerFlags) -> Type {
        self.intern(TypeKind::Pointer {
            target: target.cloned(),
            flags,
        })
    }

    pub fn function_of(&self, ret: &Type, params: impl IntoIterator<Item = Type>) -> Type {
        self.intern(TypeKind::Function {
            ret: ret.clone(),
            params: params.into_iter().collect(),
        })
    }

    /// Byte strings: `*const u8` with the bytes in the value's data buffer.
    pub fn text(&self) -> Type {
        let byte = self.primitive(Primitive::U8);
        self.pointer_to(Some(&byte), PointerFlags::READ_ONLY)
    }

    /// `{path: i64, payload: T}`, the tagged result that drives switches.
    pub fn selector_of(&self, payload: &Type) -> Type {
        self.named_struct_of(
            [
                (Arc::from("path"), self.primitive(Primitive::I64)),
                (Arc::from("payload"), payload.clone()),
            ],
            None,
        )
    }

    pub fn define_method(&self, ty: &Type, name: &str, op: Arc<dyn Op>) {
        ty.define_method(name, op);
    }

    pub fn label(&self, name: &str) -> u32 {
        let mut tables = self.tables();
        if let Some(index) = tables.labels.get_index_of(name) {
            return index as u32;
        }
        let (index, _) = tables.labels.insert_full(name.into());
        index as u32
    }

    pub fn label_name(&self, id: u32) -> Option<Arc<str>> {
        self.tables().labels.get_index(id as usize).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::DiagnosticKind;

    #[test]
    fn structural_types_collapse_to_one_instance() {
        let types = TypeRegistry::new();
        let int = types.primitive(Primitive::I64);
        let float = types.primitive(Primitive::F64);

        let a = types.struct_of([int.clone(), float.clone()]);
        let b = types.struct_of([types.primitive(Primitive::I64), float.clone()]);
        assert_eq!(a, b);
        assert_ne!(a, types.struct_of([float.clone(), int.clone()]));
        assert_ne!(a, types.struct_of([int.clone()]));

        let read_only = types.pointer_to(Some(&int), PointerFlags::READ_ONLY);
        assert_eq!(read_only, types.pointer_to(Some(&int), PointerFlags::READ_ONLY));
        assert_ne!(read_only, types.pointer_to(Some(&int), PointerFlags::NONE));
        assert_ne!(
            types.vector_of(&int, 4, false).unwrap(),
            types.vector_of(&int, 4, true).unwrap()
        );
    }

    #[test]
    fn named_struct_owner_is_not_identity() {
        let types = TypeRegistry::new();
        let int = types.primitive(Primitive::I64);
        let a = types.named_struct_of([("x".into(), int.clone())], Some(1));
        let b = types.named_struct_of([("x".into(), int.clone())], Some(2));
        assert_eq!(a, b);
        assert_ne!(a, types.named_struct_of([("y".into(), int)], Some(1)));
    }

    #[test]
    fn struct_layout_folds_padding() {
        let types = TypeRegistry::new();
        let byte = types.primitive(Primitive::U8);
        let int = types.primitive(Primitive::I64);
        let short = types.primitive(Primitive::I16);
        let padded = types.struct_of([byte, int, short]);
        assert_eq!(padded.align(), 8);
        assert_eq!(padded.size(), 24);
        assert_eq!(types.void().size(), 0);
        assert!(types.void().is_void());
    }

    #[test]
    fn simd_vectors_round_to_power_of_two() {
        let types = TypeRegistry::new();
        let float = types.primitive(Primitive::F32);
        let plain = types.vector_of(&float, 3, false).unwrap();
        let packed = types.vector_of(&float, 3, true).unwrap();
        assert_eq!(plain.size(), 12);
        assert_eq!(plain.align(), 4);
        assert_eq!(packed.size(), 16);
        assert_eq!(packed.align(), 16);
        assert!(packed.simd_capable());
    }

    #[test]
    fn element_access_errors_instead_of_panicking() {
        let types = TypeRegistry::new();
        let int = types.primitive(Primitive::I64);
        let pair = types.struct_of([int.clone(), int.clone()]);
        assert_eq!(pair.element(1).ok(), Some(int.clone()));
        assert!(pair.element(2).is_err());
        let function = types.function_of(&int, [int.clone()]);
        assert!(function.element(0).is_err());
        assert!(types.pointer_to(None, PointerFlags::NONE).element(0).is_err());
        assert!(int.element(0).is_err());
    }

    #[test]
    fn display_renders_type_literals() {
        let types = TypeRegistry::new();
        let int = types.primitive(Primitive::I64);
        let named = types.named_struct_of(
            [("a".into(), int.clone()), ("b".into(), types.text())],
            None,
        );
        assert_eq!(named.to_string(), "{a: i64, b: *const u8}");
        assert_eq!(
            types.function_of(&int, [int.clone(), int.clone()]).to_string(),
            "fn(i64, i64) -> i64"
        );
        assert_eq!(types.vector_of(&int, 2, true).unwrap().to_string(), "<i64; 2>");
    }

    #[test]
    fn reset_starts_a_fresh_table() {
        let types = TypeRegistry::new();
        let int = types.primitive(Primitive::I64);
        let pair = types.struct_of([int.clone(), int.clone()]);
        assert_eq!(types.label("red"), 0);
        types.reset();
        assert!(types.is_empty());
        let again = types.struct_of([
            types.primitive(Primitive::I64),
            types.primitive(Primitive::I64),
        ]);
        assert_ne!(pair, again);
        assert_ne!(pair.id(), again.id());
        assert_ne!(int.id(), types.primitive(Primitive::I64).id());
        assert_eq!(types.label("blue"), 0);
    }

    #[test]
    fn oversized_vectors_are_rejected() {
        let types = TypeRegistry::new();
        let int = types.primitive(Primitive::I64);
        let error = types.vector_of(&int, 3_000_000_000, false).unwrap_err();
        assert_eq!(error.kind, DiagnosticKind::Definition);
        assert!(types.vector_of(&int, MAX_VECTOR_LEN + 1, true).is_err());
        let wide = types.vector_of(&int, MAX_VECTOR_LEN, false).unwrap();
        assert_eq!(wide.cells(), u64::from(MAX_VECTOR_LEN) + 1);
        assert!(types.vector_of(&wide, 2, false).is_ok());
        assert!(types.vector_of(&wide, 64, false).is_err());
        let nothing = types.vector_of(&types.void(), MAX_VECTOR_LEN, false).unwrap();
        assert_eq!(nothing.size(), 0);
        assert!(types.vector_of(&nothing, MAX_VECTOR_LEN, false).is_err());
    }
}
