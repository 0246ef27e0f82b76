//! Constant-list cache.
//!
//! Circuits without inputs settle to constants. Their output values can be
//! stored once and handed back as constant nodes instead of re-expanding
//! the definition.
//!
//! Note: JSON serialization requires the `cli` feature.

use std::collections::HashMap;
use std::sync::Arc;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::diagnostics::Diagnostic;
use crate::expand::literal;
use crate::graph::{Behavior, Graph, Root};
use crate::types::{Primitive, TypeKind, TypeRegistry};
use crate::value::Value;

/// Settled output values of one circuit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstantCache {
    /// Version for migration support
    pub version: u32,
    pub circuit: String,
    /// Output name -> value.
    pub values: HashMap<String, SerializedValue>,
}

/// A value with its type written as a type literal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerializedValue {
    pub ty: String,
    pub scalar: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub data: Vec<u8>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub elements: Vec<SerializedValue>,
}

impl SerializedValue {
    pub fn capture(value: &Value) -> Self {
        Self {
            ty: value.ty().to_string(),
            scalar: value.raw(),
            data: value.data().to_vec(),
            elements: value.elements().iter().map(Self::capture).collect(),
        }
    }

    /// Rebuild the value, interning its types in `types`.
    ///
    /// Structs and vectors must list exactly the elements their type holds.
    pub fn restore(&self, types: &TypeRegistry) -> Result<Value, Diagnostic> {
        let ty = literal::parse_type(types, &self.ty)?;
        if ty.primitive() == Some(Primitive::Label) {
            // Label ids are per session; the name is what persists.
            let name = String::from_utf8_lossy(&self.data);
            return Ok(Value::label(types, &name));
        }
        let elements = self
            .elements
            .iter()
            .map(|element| element.restore(types))
            .collect::<Result<Vec<_>, _>>()?;
        match ty.kind() {
            TypeKind::Struct { .. } | TypeKind::Vector { .. } => Value::composite(ty, elements),
            _ => Ok(Value::from_parts(ty, self.scalar, &self.data, elements)),
        }
    }
}

impl ConstantCache {
    /// Current cache version.
    pub const VERSION: u32 = 1;

    pub fn new(circuit: &str) -> Self {
        Self {
            version: Self::VERSION,
            circuit: circuit.to_string(),
            values: HashMap::new(),
        }
    }

    /// Record every settled output of `root`; unsettled outputs are left out.
    pub fn capture(graph: &Graph, root: &Root) -> Self {
        let mut cache = Self::new(&root.name);
        for (name, node) in root.output_names.iter().zip(&root.outputs) {
            if let Some(value) = graph.output(*node) {
                cache
                    .values
                    .insert(name.to_string(), SerializedValue::capture(value));
            }
        }
        cache
    }

    /// True when the cache holds a current value for every output in `names`.
    pub fn covers<'a>(&self, circuit: &str, mut names: impl Iterator<Item = &'a str>) -> bool {
        self.version == Self::VERSION
            && self.circuit == circuit
            && names.all(|name| self.values.contains_key(name))
    }

    /// Serialize the cache to a JSON string.
    #[cfg(feature = "cli")]
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Deserialize a cache from a JSON string.
    #[cfg(feature = "cli")]
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

impl<'s> Graph<'s> {
    /// Instantiate `name` from `cache` when it covers every output with a
    /// well-formed value, otherwise expand it.
    pub fn instantiate_cached(&mut self, name: &str, cache: &ConstantCache) -> Result<Root, Diagnostic> {
        let Some(def) = self.session().registry().definition(name) else {
            return Err(Diagnostic::definition(format!("unknown circuit `{name}`")));
        };
        let pins = def.output_pins();
        if !def.inputs.is_empty() || !cache.covers(name, pins.names()) {
            return self.instantiate(name, &[]);
        }

        let types = self.session().types();
        let mut values = Vec::with_capacity(pins.len());
        for output in pins.names() {
            match cache.values[output].restore(types) {
                Ok(value) => values.push((Arc::from(output), value)),
                Err(diagnostic) => {
                    debug!("stale cache for `{name}`: {}", diagnostic.message);
                    return self.instantiate(name, &[]);
                }
            }
        }
        let mut outputs = Vec::with_capacity(values.len());
        let mut output_names = Vec::with_capacity(values.len());
        for (output, value) in values {
            outputs.push(self.add_node(Behavior::Const(value), 0));
            output_names.push(output);
        }
        debug!("`{name}` restored from the constant cache");
        Ok(Root {
            name: def.name.clone(),
            expansion: None,
            params: Vec::new(),
            outputs,
            output_names,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expand::{BlockDescriptor, CircuitDef, ModuleRegistry};
    use crate::session::Session;

    #[test]
    fn nested_values_survive_a_new_session() {
        let first = Session::new(Arc::new(ModuleRegistry::with_builtins()));
        let types = first.types();
        let value = Value::pack(
            types,
            vec![
                Value::int(types, -3),
                Value::text(types, "hi"),
                Value::label(types, "north"),
            ],
        );
        let stored = SerializedValue::capture(&value);

        let second = Session::new(Arc::new(ModuleRegistry::with_builtins()));
        second.types().label("unrelated");
        let restored = stored.restore(second.types()).unwrap();
        assert_eq!(restored.elements().len(), 3);
        assert_eq!(restored.to_string(), value.to_string());
        assert_eq!(restored.element(0).unwrap().as_int(), Some(-3));
        assert_eq!(restored.element(1).unwrap().as_text(), Some("hi"));
        let label = restored.element(2).unwrap();
        assert_eq!(label.as_label(), Some(second.types().label("north")));
    }

    #[test]
    fn partial_caches_fall_back_to_expansion() {
        let registry = ModuleRegistry::with_builtins().with_definitions([CircuitDef::new("pair")
            .outputs(["a", "b"])
            .block(BlockDescriptor::new("int").outputs(["a"]).arguments(["1"]))
            .block(BlockDescriptor::new("int").outputs(["b"]).arguments(["2"]))]);
        let session = Session::new(Arc::new(registry));
        let mut cache = ConstantCache::new("pair");
        cache.values.insert(
            "a".into(),
            SerializedValue::capture(&Value::int(session.types(), 1)),
        );

        let mut graph = Graph::new(&session);
        let root = graph.instantiate_cached("pair", &cache).unwrap();
        assert!(root.expansion.is_some());
    }

    #[test]
    fn element_counts_must_match_the_type() {
        let types = TypeRegistry::new();
        let int = SerializedValue::capture(&Value::int(&types, 4));
        let short = SerializedValue {
            ty: "{i64, i64}".into(),
            scalar: 2,
            data: Vec::new(),
            elements: vec![int.clone()],
        };
        let error = short.restore(&types).unwrap_err();
        assert_eq!(error.message, "`{i64, i64}` holds 2 elements, got 1");

        let empty = SerializedValue {
            ty: "[i64; 3]".into(),
            scalar: 0,
            data: Vec::new(),
            elements: Vec::new(),
        };
        assert!(empty.restore(&types).is_err());
    }
}
