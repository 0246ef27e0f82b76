//! Runtime values.

use std::fmt;
use std::sync::Arc;

use crate::diagnostics::Diagnostic;
use crate::types::{Primitive, Type, TypeKind, TypeRegistry};

/// The universal runtime datum.
///
/// `scalar` holds integers (two's complement), float bit patterns, booleans,
/// label ids and byte counts. `data` carries inline blobs such as text bytes.
/// Composite values keep their children in `elements`. Values never change
/// after construction; [`Value::with_element`] builds a new value that shares
/// the untouched children.
#[derive(Clone)]
pub struct Value {
    ty: Type,
    elements: Arc<[Value]>,
    data: Arc<[u8]>,
    scalar: u64,
}

impl Value {
    pub fn scalar(ty: Type, scalar: u64) -> Self {
        Self {
            ty,
            elements: Arc::from([]),
            data: Arc::from([]),
            scalar,
        }
    }

    pub fn int(types: &TypeRegistry, value: i64) -> Self {
        Self::scalar(types.primitive(Primitive::I64), value as u64)
    }

    pub fn float(types: &TypeRegistry, value: f64) -> Self {
        Self::scalar(types.primitive(Primitive::F64), value.to_bits())
    }

    pub fn bool(types: &TypeRegistry, value: bool) -> Self {
        Self::scalar(types.primitive(Primitive::Bool), value as u64)
    }

    /// Interned label; the name travels in `data` so values print without the registry.
    pub fn label(types: &TypeRegistry, name: &str) -> Self {
        let id = types.label(name);
        Self {
            data: Arc::from(name.as_bytes()),
            ..Self::scalar(types.primitive(Primitive::Label), id as u64)
        }
    }

    pub fn text(types: &TypeRegistry, text: &str) -> Self {
        Self::bytes(types.text(), text.as_bytes())
    }

    pub fn bytes(ty: Type, bytes: &[u8]) -> Self {
        Self {
            data: Arc::from(bytes),
            ..Self::scalar(ty, bytes.len() as u64)
        }
    }

    /// Rebuild a value from stored parts without checking them against `ty`.
    pub(crate) fn from_parts(ty: Type, scalar: u64, data: &[u8], elements: Vec<Value>) -> Self {
        Self {
            ty,
            elements: elements.into(),
            data: Arc::from(data),
            scalar,
        }
    }

    /// Aggregate of `elements`; struct and vector counts must match the type.
    pub fn composite(ty: Type, elements: Vec<Value>) -> Result<Self, Diagnostic> {
        let expected = match ty.kind() {
            TypeKind::Struct { fields, .. } => Some(fields.len()),
            TypeKind::Vector { count, .. } => Some(*count as usize),
            TypeKind::Pointer { .. } => None,
            _ => {
                return Err(Diagnostic::type_error(format!(
                    "`{ty}` cannot hold elements"
                )));
            }
        };
        if let Some(expected) = expected {
            if expected != elements.len() {
                return Err(Diagnostic::type_error(format!(
                    "`{ty}` holds {expected} elements, got {}",
                    elements.len()
                )));
            }
        }
        let count = elements.len() as u64;
        Ok(Self {
            elements: elements.into(),
            ..Self::scalar(ty, count)
        })
    }

    /// Bundle values into an anonymous struct.
    pub fn pack(types: &TypeRegistry, values: Vec<Value>) -> Self {
        let ty = types.struct_of(values.iter().map(|value| value.ty.clone()));
        let count = values.len() as u64;
        Self {
            elements: values.into(),
            ..Self::scalar(ty, count)
        }
    }

    pub fn void(types: &TypeRegistry) -> Self {
        Self::pack(types, Vec::new())
    }

    /// Zero-initialized value of `ty`.
    pub fn zero(ty: &Type) -> Self {
        let elements: Vec<Value> = match ty.kind() {
            TypeKind::Struct { fields, .. } => fields.iter().map(Value::zero).collect(),
            TypeKind::Vector { elem, count, .. } => {
                (0..*count).map(|_| Value::zero(elem)).collect()
            }
            _ => Vec::new(),
        };
        let count = elements.len() as u64;
        Self {
            elements: elements.into(),
            ..Self::scalar(ty.clone(), count)
        }
    }

    pub fn ty(&self) -> &Type {
        &self.ty
    }

    pub fn raw(&self) -> u64 {
        self.scalar
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn elements(&self) -> &[Value] {
        &self.elements
    }

    pub fn is_primitive(&self, primitive: Primitive) -> bool {
        self.ty.primitive() == Some(primitive)
    }

    pub fn as_int(&self) -> Option<i64> {
        let primitive = self.ty.primitive()?;
        primitive.is_integer().then_some(match primitive {
            Primitive::U8 => self.scalar as u8 as i64,
            Primitive::I8 => self.scalar as i8 as i64,
            Primitive::I16 => self.scalar as i16 as i64,
            Primitive::I32 => self.scalar as i32 as i64,
            _ => self.scalar as i64,
        })
    }

    pub fn as_float(&self) -> Option<f64> {
        match self.ty.primitive()? {
            Primitive::F64 => Some(f64::from_bits(self.scalar)),
            Primitive::F32 => Some(f32::from_bits(self.scalar as u32) as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        self.is_primitive(Primitive::Bool).then_some(self.scalar != 0)
    }

    pub fn as_label(&self) -> Option<u32> {
        self.is_primitive(Primitive::Label).then_some(self.scalar as u32)
    }

    pub fn as_text(&self) -> Option<&str> {
        match self.ty.kind() {
            TypeKind::Pointer {
                target: Some(target),
                ..
            } if target.primitive() == Some(Primitive::U8) => std::str::from_utf8(&self.data).ok(),
            _ => None,
        }
    }

    /// Element `index` of a composite value.
    pub fn element(&self, index: usize) -> Result<Value, Diagnostic> {
        if let Some(element) = self.elements.get(index) {
            return Ok(element.clone());
        }
        match self.ty.kind() {
            TypeKind::Struct { .. } | TypeKind::Vector { .. } | TypeKind::Pointer { .. } => {
                Err(Diagnostic::type_error(format!(
                    "too few elements: index {index} of `{}` with {} elements",
                    self.ty,
                    self.elements.len()
                )))
            }
            _ => Err(Diagnostic::type_error(format!(
                "`{}` does not support element access",
                self.ty
            ))),
        }
    }

    /// Copy with element `index` replaced; the other children are shared.
    pub fn with_element(&self, index: usize, value: Value) -> Result<Value, Diagnostic> {
        self.element(index)?;
        let mut elements = self.elements.to_vec();
        elements[index] = value;
        Ok(Self {
            elements: elements.into(),
            ..self.clone()
        })
    }

    /// Whether both values share the same element buffer.
    pub fn shares_elements(&self, other: &Value) -> bool {
        Arc::ptr_eq(&self.elements, &other.elements)
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        if self.ty != other.ty || self.scalar != other.scalar || self.data != other.data {
            return false;
        }
        if self.ty.is_shared() {
            self.shares_elements(other)
        } else {
            self.elements == other.elements
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{self}: {}", self.ty)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if let Some(text) = self.as_text() {
            return write!(f, "{text:?}");
        }
        match self.ty.kind() {
            TypeKind::Primitive(Primitive::Bool) => write!(f, "{}", self.scalar != 0),
            TypeKind::Primitive(Primitive::Label) => {
                write!(f, "#{}", String::from_utf8_lossy(&self.data))
            }
            TypeKind::Primitive(primitive) if primitive.is_float() => {
                write!(f, "{:?}", self.as_float().unwrap_or_default())
            }
            TypeKind::Primitive(_) => write!(f, "{}", self.as_int().unwrap_or_default()),
            TypeKind::Struct { names, .. } => {
                f.write_str("{")?;
                for (index, element) in self.elements.iter().enumerate() {
                    if index > 0 {
                        f.write_str(", ")?;
                    }
                    if let Some(name) = names.as_ref().and_then(|names| names.get(index)) {
                        write!(f, "{name}: ")?;
                    }
                    write!(f, "{element}")?;
                }
                f.write_str("}")
            }
            TypeKind::Vector { .. } | TypeKind::Pointer { .. } => {
                f.write_str("[")?;
                for (index, element) in self.elements.iter().enumerate() {
                    if index > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{element}")?;
                }
                f.write_str("]")
            }
            TypeKind::Function { .. } => write!(f, "<{}>", self.ty),
        }
    }
}

/// Branch choice produced by a switch selector: which path, carrying what.
#[derive(Debug, Clone, PartialEq)]
pub struct Selector {
    pub path: u32,
    pub payload: Value,
}

impl Selector {
    /// Booleans pick `false = 0`, `true = 1`; integers pick themselves;
    /// `{path, payload}` structs unpack.
    pub fn from_value(value: &Value) -> Result<Self, Diagnostic> {
        if let Some(flag) = value.as_bool() {
            return Ok(Self {
                path: flag as u32,
                payload: value.clone(),
            });
        }
        if let Some(path) = value.as_int() {
            return u32::try_from(path)
                .map(|path| Self {
                    path,
                    payload: value.clone(),
                })
                .map_err(|_| {
                    let reason = if path < 0 { "is negative" } else { "is out of range" };
                    Diagnostic::dispatch(format!("switch path {path} {reason}"))
                });
        }
        let is_selector = value
            .ty()
            .field_names()
            .is_some_and(|names| names.len() == 2 && &*names[0] == "path" && &*names[1] == "payload");
        if is_selector {
            let path = value.element(0)?;
            let payload = value.element(1)?;
            let mut selector = Self::from_value(&path)?;
            selector.payload = payload;
            return Ok(selector);
        }
        Err(Diagnostic::dispatch(format!(
            "cannot switch on a value of type `{}`",
            value.ty()
        )))
    }

    pub fn into_value(self, types: &TypeRegistry) -> Value {
        let ty = types.selector_of(self.payload.ty());
        let path = Value::int(types, self.path as i64);
        Value {
            elements: Arc::from([path, self.payload]),
            ..Value::scalar(ty, 2)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PointerFlags;

    #[test]
    fn scalars_read_back() {
        let types = TypeRegistry::new();
        assert_eq!(Value::int(&types, -7).as_int(), Some(-7));
        assert_eq!(Value::float(&types, 2.5).as_float(), Some(2.5));
        assert_eq!(Value::bool(&types, true).as_bool(), Some(true));
        assert_eq!(Value::text(&types, "hi").as_text(), Some("hi"));
        assert_eq!(Value::int(&types, 1).as_float(), None);
        assert_eq!(Value::label(&types, "red").to_string(), "#red");
    }

    #[test]
    fn equality_is_structural_for_plain_aggregates() {
        let types = TypeRegistry::new();
        let a = Value::pack(&types, vec![Value::int(&types, 1), Value::text(&types, "x")]);
        let b = Value::pack(&types, vec![Value::int(&types, 1), Value::text(&types, "x")]);
        assert_eq!(a, b);
        assert_ne!(a, Value::pack(&types, vec![Value::int(&types, 2), Value::text(&types, "x")]));
        assert_ne!(Value::int(&types, 1), Value::float(&types, f64::from_bits(1)));
    }

    #[test]
    fn mutable_lists_compare_by_reference() {
        let types = TypeRegistry::new();
        let int = types.primitive(Primitive::I64);
        let list = types.pointer_to(Some(&int), PointerFlags::NONE);
        let items = vec![Value::int(&types, 1)];
        let a = Value::composite(list.clone(), items.clone()).unwrap();
        let b = Value::composite(list, items).unwrap();
        assert_ne!(a, b);
        assert_eq!(a, a.clone());
    }

    #[test]
    fn with_element_shares_untouched_children() {
        let types = TypeRegistry::new();
        let inner = Value::pack(&types, vec![Value::int(&types, 1)]);
        let outer = Value::pack(&types, vec![inner.clone(), Value::int(&types, 2)]);
        let updated = outer.with_element(1, Value::int(&types, 3)).unwrap();
        assert_eq!(updated.element(1).unwrap().as_int(), Some(3));
        assert!(updated.elements()[0].shares_elements(&outer.elements()[0]));
        assert_eq!(outer.element(1).unwrap().as_int(), Some(2));
        assert!(outer.with_element(5, Value::int(&types, 0)).is_err());
    }

    #[test]
    fn composite_rejects_inconsistent_counts() {
        let types = TypeRegistry::new();
        let int = types.primitive(Primitive::I64);
        let pair = types.struct_of([int.clone(), int.clone()]);
        assert!(Value::composite(pair, vec![Value::int(&types, 1)]).is_err());
        assert!(Value::composite(int, vec![]).is_err());
    }

    #[test]
    fn element_access_on_scalars_is_a_type_error() {
        let types = TypeRegistry::new();
        let error = Value::int(&types, 4).element(0).unwrap_err();
        assert_eq!(error.kind, crate::diagnostics::DiagnosticKind::Type);
        let short = Value::pack(&types, vec![Value::int(&types, 4)]);
        assert!(short.element(1).unwrap_err().message.contains("too few elements"));
    }

    #[test]
    fn selectors_from_bools_ints_and_structs() {
        let types = TypeRegistry::new();
        assert_eq!(Selector::from_value(&Value::bool(&types, true)).unwrap().path, 1);
        assert_eq!(Selector::from_value(&Value::int(&types, 3)).unwrap().path, 3);
        let negative = Selector::from_value(&Value::int(&types, -1)).unwrap_err();
        assert_eq!(negative.message, "switch path -1 is negative");
        let huge = Selector::from_value(&Value::int(&types, 1 << 40)).unwrap_err();
        assert_eq!(huge.message, "switch path 1099511627776 is out of range");
        assert!(Selector::from_value(&Value::text(&types, "no")).is_err());

        let tagged = Selector {
            path: 2,
            payload: Value::text(&types, "p"),
        }
        .into_value(&types);
        let selector = Selector::from_value(&tagged).unwrap();
        assert_eq!(selector.path, 2);
        assert_eq!(selector.payload.as_text(), Some("p"));
    }
}
