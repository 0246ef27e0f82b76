//! Block registry: circuit definitions plus the assemblers for primitive blocks.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use smallvec::{SmallVec, smallvec};

use super::descriptor::{BlockDescriptor, CircuitDef};
use super::literal;
use crate::diagnostics::Diagnostic;
use crate::graph::{Behavior, ExpansionId, Graph, NodeId};
use crate::interp::{Arity, NativeFn, Op, builtin_natives};
use crate::session::Session;
use crate::types::TypeRegistry;
use crate::value::Value;

/// Nodes standing for a block's declared outputs, in pin order.
pub type Outputs = SmallVec<[NodeId; 2]>;

/// Source of circuit definitions and block assemblers.
pub trait Registry: Send + Sync {
    fn definition(&self, name: &str) -> Option<Arc<CircuitDef>>;

    fn assembler(&self, block_type: &str) -> Option<Arc<dyn Assembler>>;
}

/// Turns one block descriptor into graph nodes.
pub trait Assembler: Send + Sync {
    fn assemble(&self, assembly: &mut Assembly<'_, '_>) -> Result<Outputs, Diagnostic>;
}

impl<F> Assembler for F
where
    F: Fn(&mut Assembly<'_, '_>) -> Result<Outputs, Diagnostic> + Send + Sync,
{
    fn assemble(&self, assembly: &mut Assembly<'_, '_>) -> Result<Outputs, Diagnostic> {
        self(assembly)
    }
}

/// Context handed to an [`Assembler`] for one block.
pub struct Assembly<'g, 's> {
    graph: &'g mut Graph<'s>,
    owner: ExpansionId,
    block: BlockDescriptor,
    arguments: Vec<Arc<str>>,
}

impl<'g, 's> Assembly<'g, 's> {
    pub(crate) fn new(
        graph: &'g mut Graph<'s>,
        owner: ExpansionId,
        block: BlockDescriptor,
        arguments: Vec<Arc<str>>,
    ) -> Self {
        Self {
            graph,
            owner,
            block,
            arguments,
        }
    }

    pub fn session(&self) -> &'s Session {
        self.graph.session()
    }

    pub fn types(&self) -> &'s TypeRegistry {
        self.graph.session().types()
    }

    pub fn descriptor(&self) -> &BlockDescriptor {
        &self.block
    }

    /// Arguments after substitution through the enclosing circuits.
    pub fn arguments(&self) -> &[Arc<str>] {
        &self.arguments
    }

    pub fn argument(&self, index: usize) -> Result<&str, Diagnostic> {
        self.arguments.get(index).map(|argument| &**argument).ok_or_else(|| {
            Diagnostic::definition(format!(
                "`{}` block is missing argument {index}",
                self.block.block_type
            ))
        })
    }

    /// Argument `index` read as a `tag` literal.
    pub fn literal(&self, index: usize, tag: &str) -> Result<Value, Diagnostic> {
        literal::parse(self.types(), tag, self.argument(index)?)
    }

    fn expect(&self, what: &str, arity: Arity, count: usize) -> Result<(), Diagnostic> {
        if arity.accepts(count) {
            return Ok(());
        }
        Err(Diagnostic::definition(format!(
            "`{}` block takes {arity} {what}, got {count}",
            self.block.block_type
        )))
    }

    pub fn expect_inputs(&self, arity: Arity) -> Result<(), Diagnostic> {
        self.expect("inputs", arity, self.block.inputs.len())
    }

    pub fn expect_outputs(&self, arity: Arity) -> Result<(), Diagnostic> {
        self.expect("outputs", arity, self.block.outputs.len())
    }

    pub fn expect_arguments(&self, arity: Arity) -> Result<(), Diagnostic> {
        self.expect("arguments", arity, self.arguments.len())
    }

    /// Node fed by every declared input of the block.
    pub fn add_node(&mut self, behavior: Behavior) -> NodeId {
        let links = self.block.inputs.clone();
        self.add_linked(behavior, &links)
    }

    /// Node fed by the given links, resolved lazily in the enclosing circuit.
    pub fn add_linked(&mut self, behavior: Behavior, links: &[Arc<str>]) -> NodeId {
        let node = self.graph.add_owned(behavior, links.len(), Some(self.owner));
        for (pin, link) in links.iter().enumerate() {
            self.graph.add_pending_link(node, pin, link);
        }
        node
    }

    /// Node with `inputs` unconnected pins, wired by the assembler itself.
    pub fn add_detached(&mut self, behavior: Behavior, inputs: usize) -> NodeId {
        self.graph.add_owned(behavior, inputs, Some(self.owner))
    }

    pub fn connect(&mut self, node: NodeId, pin: usize, source: Option<NodeId>) {
        self.graph.connect(node, pin, source);
    }
}

/// Literal block: one argument read as `tag`.
struct LiteralBlock(&'static str);

impl Assembler for LiteralBlock {
    fn assemble(&self, assembly: &mut Assembly<'_, '_>) -> Result<Outputs, Diagnostic> {
        assembly.expect_inputs(Arity::Exact(0))?;
        assembly.expect_outputs(Arity::Exact(1))?;
        assembly.expect_arguments(Arity::Exact(1))?;
        let value = assembly.literal(0, self.0)?;
        Ok(smallvec![assembly.add_node(Behavior::Const(value))])
    }
}

/// `const`: `[text]` read as auto, or `[tag, text]`.
fn assemble_const(assembly: &mut Assembly<'_, '_>) -> Result<Outputs, Diagnostic> {
    assembly.expect_inputs(Arity::Exact(0))?;
    assembly.expect_outputs(Arity::Exact(1))?;
    let value = match assembly.arguments().len() {
        1 => assembly.literal(0, "auto")?,
        2 => {
            let tag = assembly.argument(0)?.to_string();
            assembly.literal(1, &tag)?
        }
        count => {
            return Err(Diagnostic::definition(format!(
                "`const` block takes 1 or 2 arguments, got {count}"
            )));
        }
    };
    Ok(smallvec![assembly.add_node(Behavior::Const(value))])
}

/// Operator block lowered to a virtual call on the operands' types.
struct OperatorBlock {
    name: &'static str,
    inputs: usize,
}

impl Assembler for OperatorBlock {
    fn assemble(&self, assembly: &mut Assembly<'_, '_>) -> Result<Outputs, Diagnostic> {
        assembly.expect_inputs(Arity::Exact(self.inputs))?;
        assembly.expect_outputs(Arity::Exact(1))?;
        let names: Arc<[Arc<str>]> = Arc::from([Arc::from(self.name)]);
        Ok(smallvec![assembly.add_node(Behavior::Virtual(names))])
    }
}

/// `vcall`: operator names as arguments, tried in order.
fn assemble_vcall(assembly: &mut Assembly<'_, '_>) -> Result<Outputs, Diagnostic> {
    assembly.expect_inputs(Arity::AtLeast(1))?;
    assembly.expect_outputs(Arity::Exact(1))?;
    assembly.expect_arguments(Arity::AtLeast(1))?;
    let names: Arc<[Arc<str>]> = assembly.arguments().iter().cloned().collect();
    Ok(smallvec![assembly.add_node(Behavior::Virtual(names))])
}

fn assemble_pack(assembly: &mut Assembly<'_, '_>) -> Result<Outputs, Diagnostic> {
    assembly.expect_outputs(Arity::Exact(1))?;
    Ok(smallvec![assembly.add_node(Behavior::Pack)])
}

/// `unpack`: one output per element, or a single output at the argument index.
fn assemble_unpack(assembly: &mut Assembly<'_, '_>) -> Result<Outputs, Diagnostic> {
    assembly.expect_inputs(Arity::Exact(1))?;
    if !assembly.arguments().is_empty() {
        assembly.expect_outputs(Arity::Exact(1))?;
        let index = assembly.literal(0, "int")?.as_int().unwrap_or_default();
        let index = usize::try_from(index).map_err(|_| {
            Diagnostic::definition(format!("`unpack` index {index} is negative"))
        })?;
        return Ok(smallvec![assembly.add_node(Behavior::Unpack(index))]);
    }
    let count = assembly.descriptor().outputs.len();
    Ok((0..count)
        .map(|index| assembly.add_node(Behavior::Unpack(index)))
        .collect())
}

fn assemble_begin(assembly: &mut Assembly<'_, '_>) -> Result<Outputs, Diagnostic> {
    assembly.expect_inputs(Arity::Exact(1))?;
    assembly.expect_outputs(Arity::Exact(1))?;
    Ok(smallvec![assembly.add_node(Behavior::Begin)])
}

/// `end`: inputs are `[begin, next, condition]`.
fn assemble_end(assembly: &mut Assembly<'_, '_>) -> Result<Outputs, Diagnostic> {
    assembly.expect_inputs(Arity::Exact(3))?;
    assembly.expect_outputs(Arity::Exact(1))?;
    Ok(smallvec![assembly.add_node(Behavior::End)])
}

/// `switch`: inputs are `[selector, branch0, branch1, ...]`.
fn assemble_switch(assembly: &mut Assembly<'_, '_>) -> Result<Outputs, Diagnostic> {
    assembly.expect_inputs(Arity::AtLeast(2))?;
    assembly.expect_outputs(Arity::Exact(1))?;
    Ok(smallvec![assembly.add_node(Behavior::Switch)])
}

/// `call`: argument 0 names the circuit to call as a function.
fn assemble_call(assembly: &mut Assembly<'_, '_>) -> Result<Outputs, Diagnostic> {
    assembly.expect_outputs(Arity::Exact(1))?;
    assembly.expect_arguments(Arity::Exact(1))?;
    let name: Arc<str> = assembly.argument(0)?.into();
    let Some(callee) = assembly.session().registry().definition(&name) else {
        return Err(Diagnostic::definition(format!("unknown circuit `{name}`")));
    };
    let pins = callee.input_pins();
    if pins.is_variadic() || pins.len() != assembly.descriptor().inputs.len() {
        return Err(Diagnostic::definition(format!(
            "`{name}` takes {} inputs, got {}",
            pins.len(),
            assembly.descriptor().inputs.len()
        )));
    }
    Ok(smallvec![assembly.add_node(Behavior::Call(name))])
}

/// Block backed by a native function.
struct NativeBlock(Arc<NativeFn>);

impl Assembler for NativeBlock {
    fn assemble(&self, assembly: &mut Assembly<'_, '_>) -> Result<Outputs, Diagnostic> {
        assembly.expect_inputs(self.0.arity())?;
        assembly.expect_outputs(Arity::Exact(1))?;
        let op: Arc<dyn Op> = self.0.clone();
        Ok(smallvec![assembly.add_node(Behavior::Op(op))])
    }
}

/// Operator blocks and their operand counts.
pub const OPERATORS: [(&str, usize); 17] = [
    ("add", 2),
    ("sub", 2),
    ("mul", 2),
    ("div", 2),
    ("rem", 2),
    ("neg", 1),
    ("lt", 2),
    ("le", 2),
    ("gt", 2),
    ("ge", 2),
    ("eq", 2),
    ("ne", 2),
    ("and", 2),
    ("or", 2),
    ("not", 1),
    ("min", 2),
    ("max", 2),
];

/// In-memory registry; definitions can be replaced and invalidated at any time.
#[derive(Default)]
pub struct ModuleRegistry {
    definitions: RwLock<HashMap<Arc<str>, Arc<CircuitDef>>>,
    assemblers: RwLock<HashMap<Arc<str>, Arc<dyn Assembler>>>,
}

impl ModuleRegistry {
    /// Registry without any block types.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the literal, operator, structural and native blocks.
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        for tag in ["int", "float", "bool", "text", "label", "type"] {
            registry.register_assembler(tag, LiteralBlock(tag));
        }
        registry.register_assembler("const", assemble_const);
        for (name, inputs) in OPERATORS {
            registry.register_assembler(name, OperatorBlock { name, inputs });
        }
        registry.register_assembler("vcall", assemble_vcall);
        registry.register_assembler("pack", assemble_pack);
        registry.register_assembler("unpack", assemble_unpack);
        registry.register_assembler("begin", assemble_begin);
        registry.register_assembler("end", assemble_end);
        registry.register_assembler("switch", assemble_switch);
        registry.register_assembler("call", assemble_call);
        for native in builtin_natives() {
            registry.register_native(native);
        }
        registry
    }

    pub fn with_definitions(self, definitions: impl IntoIterator<Item = CircuitDef>) -> Self {
        for definition in definitions {
            self.insert(definition);
        }
        self
    }

    /// Add or replace a definition, returning the previous one.
    pub fn insert(&self, definition: CircuitDef) -> Option<Arc<CircuitDef>> {
        let mut definitions = self
            .definitions
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        definitions.insert(definition.name.clone(), Arc::new(definition))
    }

    /// Forget a cached definition.
    pub fn invalidate(&self, name: &str) -> Option<Arc<CircuitDef>> {
        let mut definitions = self
            .definitions
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        definitions.remove(name)
    }

    pub fn register_assembler(&self, block_type: &str, assembler: impl Assembler + 'static) {
        let mut assemblers = self
            .assemblers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        assemblers.insert(block_type.into(), Arc::new(assembler));
    }

    /// Make a native function available as a block of the same name.
    pub fn register_native(&self, native: NativeFn) {
        let name = native.name().to_string();
        self.register_assembler(&name, NativeBlock(Arc::new(native)));
    }

    /// Definition names, sorted.
    pub fn names(&self) -> Vec<Arc<str>> {
        let definitions = self
            .definitions
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<_> = definitions.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Registry for ModuleRegistry {
    fn definition(&self, name: &str) -> Option<Arc<CircuitDef>> {
        let definitions = self
            .definitions
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        definitions.get(name).cloned()
    }

    fn assembler(&self, block_type: &str) -> Option<Arc<dyn Assembler>> {
        let assemblers = self
            .assemblers
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        assemblers.get(block_type).cloned()
    }
}
