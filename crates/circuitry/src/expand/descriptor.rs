//! Block and circuit descriptors supplied by the module source.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Marks the last declared input, output or argument as variadic.
pub const VARIADIC_SUFFIX: &str = "...";

/// One block inside a circuit: a block type plus its named links.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockDescriptor {
    pub block_type: Arc<str>,
    #[serde(default)]
    pub inputs: Vec<Arc<str>>,
    #[serde(default)]
    pub outputs: Vec<Arc<str>>,
    #[serde(default)]
    pub arguments: Vec<Arc<str>>,
}

impl BlockDescriptor {
    pub fn new(block_type: &str) -> Self {
        Self {
            block_type: block_type.into(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            arguments: Vec::new(),
        }
    }

    pub fn inputs<'a>(mut self, names: impl IntoIterator<Item = &'a str>) -> Self {
        self.inputs = names.into_iter().map(Arc::from).collect();
        self
    }

    pub fn outputs<'a>(mut self, names: impl IntoIterator<Item = &'a str>) -> Self {
        self.outputs = names.into_iter().map(Arc::from).collect();
        self
    }

    pub fn arguments<'a>(mut self, values: impl IntoIterator<Item = &'a str>) -> Self {
        self.arguments = values.into_iter().map(Arc::from).collect();
        self
    }
}

/// A named circuit definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitDef {
    pub name: Arc<str>,
    #[serde(default)]
    pub inputs: Vec<Arc<str>>,
    #[serde(default)]
    pub outputs: Vec<Arc<str>>,
    #[serde(default)]
    pub arguments: Vec<Arc<str>>,
    #[serde(default)]
    pub blocks: Vec<BlockDescriptor>,
}

impl CircuitDef {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.into(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            arguments: Vec::new(),
            blocks: Vec::new(),
        }
    }

    pub fn inputs<'a>(mut self, names: impl IntoIterator<Item = &'a str>) -> Self {
        self.inputs = names.into_iter().map(Arc::from).collect();
        self
    }

    pub fn outputs<'a>(mut self, names: impl IntoIterator<Item = &'a str>) -> Self {
        self.outputs = names.into_iter().map(Arc::from).collect();
        self
    }

    pub fn arguments<'a>(mut self, names: impl IntoIterator<Item = &'a str>) -> Self {
        self.arguments = names.into_iter().map(Arc::from).collect();
        self
    }

    pub fn block(mut self, block: BlockDescriptor) -> Self {
        self.blocks.push(block);
        self
    }

    pub fn input_pins(&self) -> Pins<'_> {
        Pins::new(&self.inputs)
    }

    pub fn output_pins(&self) -> Pins<'_> {
        Pins::new(&self.outputs)
    }

    pub fn argument_pins(&self) -> Pins<'_> {
        Pins::new(&self.arguments)
    }
}

/// Declared pin names with the variadic tail split off.
#[derive(Debug, Clone, Copy)]
pub struct Pins<'a> {
    names: &'a [Arc<str>],
    variadic: bool,
}

impl<'a> Pins<'a> {
    fn new(names: &'a [Arc<str>]) -> Self {
        let variadic = names
            .last()
            .is_some_and(|name| name.ends_with(VARIADIC_SUFFIX));
        Self { names, variadic }
    }

    /// Number of pins before the variadic one.
    pub fn fixed(&self) -> usize {
        self.names.len() - self.variadic as usize
    }

    pub fn is_variadic(&self) -> bool {
        self.variadic
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Link name of pin `index`, without the variadic marker.
    pub fn name(&self, index: usize) -> Option<&'a str> {
        let name = self.names.get(index)?;
        Some(name.strip_suffix(VARIADIC_SUFFIX).unwrap_or(name))
    }

    /// Index of the variadic pin.
    pub fn rest(&self) -> Option<usize> {
        self.variadic.then(|| self.names.len() - 1)
    }

    /// Whether `supplied` pins fit: exactly the fixed count, or more when variadic.
    pub fn accepts(&self, supplied: usize) -> bool {
        if self.variadic {
            supplied >= self.fixed()
        } else {
            supplied <= self.names.len()
        }
    }

    pub fn names(&self) -> impl Iterator<Item = &'a str> + 'a {
        let names = self.names;
        (0..names.len()).filter_map(move |index| {
            let name = names.get(index)?;
            Some(name.strip_suffix(VARIADIC_SUFFIX).unwrap_or(name))
        })
    }
}
