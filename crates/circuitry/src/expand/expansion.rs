//! Lazy macro expansion of circuit definitions into graph nodes.
//!
//! Every instantiated circuit gets an [`Expansion`] holding its link map and
//! one slot per block. Blocks are assembled only when one of their outputs is
//! first resolved, and nested circuits are expanded only when one of their
//! macro outputs is first evaluated.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;

use log::debug;

use super::descriptor::CircuitDef;
use super::literal;
use super::registry::{Assembly, Outputs};
use crate::diagnostics::Diagnostic;
use crate::graph::{Behavior, ExpansionId, Graph, NodeId, Pending, Root};
use crate::value::Value;

/// Block of the parent expansion a nested expansion stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallSite {
    pub expansion: ExpansionId,
    pub block: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LinkTarget {
    Input(usize),
    Argument(usize),
    Output { block: usize, pin: usize },
}

#[derive(Debug, Clone)]
enum BlockState {
    Unmaterialized,
    Nodes(Outputs),
    /// Nested circuit; `hidden` carries the variadic output the surplus unpacks read.
    Macro {
        outputs: Outputs,
        hidden: Option<NodeId>,
        child: Option<ExpansionId>,
    },
}

/// One instantiation of a circuit definition.
#[derive(Debug)]
pub struct Expansion {
    pub def: Arc<CircuitDef>,
    pub parent: Option<CallSite>,
    links: HashMap<Arc<str>, LinkTarget>,
    blocks: Vec<BlockState>,
    /// Arguments after substitution through the enclosing circuits.
    arguments: Vec<Arc<str>>,
    /// Arguments supplied past the fixed ones, gathered by the variadic argument.
    extra_args: usize,
    expanding: bool,
    /// Parameter nodes, for a root expansion.
    params: Vec<NodeId>,
    /// Output nodes of a root expansion; they survive redefinition.
    anchors: Vec<NodeId>,
    rest_pack: Option<NodeId>,
    argument_nodes: HashMap<usize, NodeId>,
    pub(crate) members: Vec<NodeId>,
}

impl Expansion {
    fn new(
        def: Arc<CircuitDef>,
        parent: Option<CallSite>,
        arguments: Vec<Arc<str>>,
    ) -> Result<Self, Diagnostic> {
        let links = link_map(&def)?;
        let extra_args = arguments
            .len()
            .saturating_sub(def.argument_pins().fixed());
        Ok(Self {
            blocks: vec![BlockState::Unmaterialized; def.blocks.len()],
            def,
            parent,
            links,
            arguments,
            extra_args,
            expanding: false,
            params: Vec::new(),
            anchors: Vec::new(),
            rest_pack: None,
            argument_nodes: HashMap::new(),
            members: Vec::new(),
        })
    }

    pub fn name(&self) -> &Arc<str> {
        &self.def.name
    }

    pub fn arguments(&self) -> &[Arc<str>] {
        &self.arguments
    }

    pub fn extra_args(&self) -> usize {
        self.extra_args
    }

    pub fn is_expanding(&self) -> bool {
        self.expanding
    }

    /// Replace enclosing argument names with the values supplied for them.
    fn specialize(&self, arguments: &[Arc<str>]) -> Vec<Arc<str>> {
        let pins = self.def.argument_pins();
        let mut specialized = Vec::with_capacity(arguments.len());
        for argument in arguments {
            match pins.names().position(|name| name == &**argument) {
                Some(index) if pins.rest() == Some(index) => {
                    specialized.extend(self.arguments.iter().skip(index).cloned());
                }
                Some(index) => specialized.push(
                    self.arguments
                        .get(index)
                        .cloned()
                        .unwrap_or_else(|| argument.clone()),
                ),
                None => specialized.push(argument.clone()),
            }
        }
        specialized
    }

    /// Macro child expansions, for teardown.
    fn children(&self) -> impl Iterator<Item = ExpansionId> + '_ {
        self.blocks.iter().filter_map(|state| match state {
            BlockState::Macro { child, .. } => *child,
            _ => None,
        })
    }
}

fn link_map(def: &CircuitDef) -> Result<HashMap<Arc<str>, LinkTarget>, Diagnostic> {
    let mut links = HashMap::new();
    let mut declare = |name: &str, target: LinkTarget| {
        if name.is_empty() {
            return Ok(());
        }
        match links.entry(Arc::from(name)) {
            Entry::Occupied(_) => Err(Diagnostic::definition(format!(
                "duplicate link `{name}` in `{}`",
                def.name
            ))
            .in_circuit(&def.name)),
            Entry::Vacant(entry) => {
                entry.insert(target);
                Ok(())
            }
        }
    };
    for (index, name) in def.input_pins().names().enumerate() {
        declare(name, LinkTarget::Input(index))?;
    }
    for (index, name) in def.argument_pins().names().enumerate() {
        declare(name, LinkTarget::Argument(index))?;
    }
    for (block, descriptor) in def.blocks.iter().enumerate() {
        for (pin, name) in descriptor.outputs.iter().enumerate() {
            declare(name, LinkTarget::Output { block, pin })?;
        }
    }
    Ok(links)
}

fn recursive_macro(name: &str) -> Diagnostic {
    Diagnostic::definition(format!("illegal recursive macro `{name}`"))
}

impl<'s> Graph<'s> {
    /// Instantiate circuit `name` as a root with its own parameter and output nodes.
    pub fn instantiate(&mut self, name: &str, arguments: &[&str]) -> Result<Root, Diagnostic> {
        let Some(def) = self.session().registry().definition(name) else {
            return Err(Diagnostic::definition(format!("unknown circuit `{name}`")));
        };
        let arguments = arguments.iter().map(|argument| Arc::from(*argument)).collect();
        let id = self.expansions.alloc(Expansion::new(def.clone(), None, arguments)?);

        let params: Vec<NodeId> = (0..def.inputs.len())
            .map(|index| self.add_owned(Behavior::Param(index), 0, Some(id)))
            .collect();
        let output_names: Vec<Arc<str>> = def.output_pins().names().map(Arc::from).collect();
        let outputs: Vec<NodeId> = output_names
            .iter()
            .map(|name| {
                let node = self.add_owned(Behavior::Pass, 1, Some(id));
                self.add_pending_link(node, 0, name);
                node
            })
            .collect();
        if let Some(expansion) = self.expansions.get_mut(id) {
            expansion.params = params.clone();
            expansion.anchors = outputs.clone();
        }
        debug!("instantiated `{name}` with {} outputs", outputs.len());
        Ok(Root {
            name: def.name.clone(),
            expansion: Some(id),
            params,
            outputs,
            output_names,
        })
    }

    pub fn expansion(&self, id: ExpansionId) -> Result<&Expansion, Diagnostic> {
        self.expansions
            .get(id)
            .ok_or_else(|| Diagnostic::definition("circuit expansion was torn down"))
    }

    fn expansion_mut(&mut self, id: ExpansionId) -> Result<&mut Expansion, Diagnostic> {
        self.expansions
            .get_mut(id)
            .ok_or_else(|| Diagnostic::definition("circuit expansion was torn down"))
    }

    /// Node currently standing for link `name` inside expansion `id`.
    pub(crate) fn resolve_link(
        &mut self,
        id: ExpansionId,
        name: &str,
    ) -> Result<Option<NodeId>, Diagnostic> {
        if name.is_empty() {
            return Ok(None);
        }
        let expansion = self.expansion(id)?;
        let Some(target) = expansion.links.get(name).copied() else {
            return Err(Diagnostic::definition(format!("unresolved link `{name}`"))
                .in_circuit(expansion.name()));
        };
        match target {
            LinkTarget::Input(index) => self.resolve_input(id, index),
            LinkTarget::Argument(index) => self.resolve_argument(id, index).map(Some),
            LinkTarget::Output { block, pin } => self.block_output(id, block, pin),
        }
    }

    fn resolve_input(&mut self, id: ExpansionId, index: usize) -> Result<Option<NodeId>, Diagnostic> {
        let expansion = self.expansion(id)?;
        let Some(site) = expansion.parent else {
            return Ok(expansion.params.get(index).copied());
        };
        let is_rest = expansion.def.input_pins().rest() == Some(index);
        if let Some(pack) = expansion.rest_pack.filter(|_| is_rest) {
            if self.contains(pack) {
                return Ok(Some(pack));
            }
        }
        let caller = self.expansion(site.expansion)?;
        let links = caller.def.blocks[site.block].inputs.clone();
        if !is_rest {
            return match links.get(index) {
                Some(link) => self.resolve_link(site.expansion, link),
                None => Ok(None),
            };
        }

        let rest = links.get(index..).unwrap_or_default();
        let pack = self.add_owned(Behavior::Pack, rest.len(), Some(id));
        for (pin, link) in rest.iter().enumerate() {
            let source = self.resolve_link(site.expansion, link)?;
            self.connect(pack, pin, source);
        }
        self.expansion_mut(id)?.rest_pack = Some(pack);
        Ok(Some(pack))
    }

    /// Constant node for argument `index`; the variadic argument packs every extra one.
    fn resolve_argument(&mut self, id: ExpansionId, index: usize) -> Result<NodeId, Diagnostic> {
        let expansion = self.expansion(id)?;
        if let Some(node) = expansion.argument_nodes.get(&index).copied() {
            if self.contains(node) {
                return Ok(node);
            }
        }
        let types = self.session().types();
        let pins = expansion.def.argument_pins();
        let value = if pins.rest() == Some(index) {
            let values = expansion
                .arguments
                .iter()
                .skip(index)
                .map(|argument| literal::parse_auto(types, argument))
                .collect::<Result<Vec<_>, _>>()?;
            Value::pack(types, values)
        } else {
            let Some(argument) = expansion.arguments.get(index) else {
                let name = pins.name(index).unwrap_or_default();
                return Err(Diagnostic::definition(format!(
                    "missing argument `{name}` for `{}`",
                    expansion.def.name
                )));
            };
            literal::parse_auto(types, argument)?
        };
        let node = self.add_owned(Behavior::Const(value), 0, Some(id));
        self.expansion_mut(id)?.argument_nodes.insert(index, node);
        Ok(node)
    }

    fn block_output(
        &mut self,
        id: ExpansionId,
        block: usize,
        pin: usize,
    ) -> Result<Option<NodeId>, Diagnostic> {
        self.materialize(id, block)?;
        let outputs = match &self.expansion(id)?.blocks[block] {
            BlockState::Nodes(outputs) | BlockState::Macro { outputs, .. } => outputs,
            BlockState::Unmaterialized => return Ok(None),
        };
        Ok(outputs.get(pin).copied().filter(|node| self.contains(*node)))
    }

    /// Create the nodes of block `block` unless they already exist.
    fn materialize(&mut self, id: ExpansionId, block: usize) -> Result<(), Diagnostic> {
        let expansion = self.expansion(id)?;
        if !matches!(expansion.blocks[block], BlockState::Unmaterialized) {
            return Ok(());
        }
        let circuit = expansion.def.name.clone();
        let descriptor = expansion.def.blocks[block].clone();
        let arguments = expansion.specialize(&descriptor.arguments);
        let registry = self.session().registry();

        let state = if let Some(assembler) = registry.assembler(&descriptor.block_type) {
            let declared = descriptor.outputs.len();
            let block_type = descriptor.block_type.clone();
            let outputs = assembler.assemble(&mut Assembly::new(self, id, descriptor, arguments))?;
            if outputs.len() != declared {
                return Err(Diagnostic::definition(format!(
                    "`{block_type}` block produced {} outputs, {declared} declared",
                    outputs.len()
                )));
            }
            BlockState::Nodes(outputs)
        } else if let Some(callee) = registry.definition(&descriptor.block_type) {
            let supplied = [
                descriptor.inputs.len(),
                descriptor.outputs.len(),
                arguments.len(),
            ];
            self.macro_outputs(id, block, &callee, supplied)?
        } else {
            return Err(Diagnostic::definition(format!(
                "unknown block type `{}`",
                descriptor.block_type
            )));
        };
        debug!("materialized block {block} of `{circuit}`");
        self.expansion_mut(id)?.blocks[block] = state;
        Ok(())
    }

    /// Pass-through nodes standing for the outputs of a nested circuit block.
    fn macro_outputs(
        &mut self,
        id: ExpansionId,
        block: usize,
        callee: &CircuitDef,
        [inputs, outputs, arguments]: [usize; 3],
    ) -> Result<BlockState, Diagnostic> {
        let checks = [
            ("inputs", callee.input_pins(), inputs),
            ("outputs", callee.output_pins(), outputs),
            ("arguments", callee.argument_pins(), arguments),
        ];
        for (what, pins, supplied) in checks {
            if !pins.accepts(supplied) {
                return Err(Diagnostic::definition(format!(
                    "`{}` takes {} {what}, got {supplied}",
                    callee.name,
                    pins.len()
                )));
            }
        }

        let pins = callee.output_pins();
        let fixed = if pins.is_variadic() { pins.fixed() } else { outputs };
        let mut nodes = Outputs::new();
        for pin in 0..fixed.min(outputs) {
            let node = self.add_owned(Behavior::MacroOut { block, pin }, 1, Some(id));
            self.add_pending(node, 0, Pending::MacroOutput { block, pin });
            nodes.push(node);
        }
        let mut hidden = None;
        if let Some(rest) = pins.rest().filter(|_| outputs > fixed) {
            let carrier = self.add_owned(Behavior::MacroOut { block, pin: rest }, 1, Some(id));
            self.add_pending(carrier, 0, Pending::MacroOutput { block, pin: rest });
            for index in 0..outputs - fixed {
                let unpack = self.add_owned(Behavior::Unpack(index), 1, Some(id));
                self.connect(unpack, 0, Some(carrier));
                nodes.push(unpack);
            }
            hidden = Some(carrier);
        }
        Ok(BlockState::Macro {
            outputs: nodes,
            hidden,
            child: None,
        })
    }

    /// Resolve output `pin` of nested circuit block `block`, expanding it on first use.
    pub(crate) fn resolve_macro_output(
        &mut self,
        id: ExpansionId,
        block: usize,
        pin: usize,
    ) -> Result<Option<NodeId>, Diagnostic> {
        let child = match &self.expansion(id)?.blocks[block] {
            BlockState::Macro {
                child: Some(child), ..
            } if self.expansions.is_valid(*child) => *child,
            BlockState::Macro { .. } => self.expand_macro(id, block)?,
            _ => return Ok(None),
        };
        let expansion = self.expansion(child)?;
        if expansion.expanding {
            return Err(recursive_macro(expansion.name()));
        }
        let Some(name) = expansion.def.output_pins().name(pin).map(Arc::<str>::from) else {
            return Ok(None);
        };
        self.expansion_mut(child)?.expanding = true;
        let resolved = self.resolve_link(child, &name);
        self.expansion_mut(child)?.expanding = false;
        resolved
    }

    fn expand_macro(&mut self, id: ExpansionId, block: usize) -> Result<ExpansionId, Diagnostic> {
        let expansion = self.expansion(id)?;
        let descriptor = &expansion.def.blocks[block];
        let Some(callee) = self.session().registry().definition(&descriptor.block_type) else {
            return Err(Diagnostic::definition(format!(
                "unknown block type `{}`",
                descriptor.block_type
            )));
        };
        let arguments = expansion.specialize(&descriptor.arguments);

        let mut ancestor = Some(id);
        while let Some(current) = ancestor {
            let enclosing = self.expansion(current)?;
            if enclosing.def.name == callee.name {
                return Err(recursive_macro(&callee.name));
            }
            ancestor = enclosing.parent.map(|site| site.expansion);
        }

        let name = callee.name.clone();
        let site = CallSite {
            expansion: id,
            block,
        };
        let child = self.expansions.alloc(Expansion::new(callee, Some(site), arguments)?);
        if let BlockState::Macro { child: slot, .. } = &mut self.expansion_mut(id)?.blocks[block] {
            *slot = Some(child);
        }
        debug!("expanded macro `{name}` at block {block}");
        Ok(child)
    }

    /// Tear down the macro behind `node` once none of its outputs remain.
    pub(crate) fn release_macro_output(&mut self, owner: ExpansionId, node: NodeId) {
        let Some(expansion) = self.expansions.get(owner) else {
            return;
        };
        let found = expansion.blocks.iter().enumerate().find_map(|(block, state)| match state {
            BlockState::Macro {
                outputs,
                hidden,
                child,
            } if outputs.contains(&node) => Some((block, outputs.clone(), *hidden, *child)),
            _ => None,
        });
        let Some((block, outputs, hidden, child)) = found else {
            return;
        };
        if outputs.iter().any(|output| self.contains(*output)) {
            return;
        }
        if let Some(expansion) = self.expansions.get_mut(owner) {
            expansion.blocks[block] = BlockState::Unmaterialized;
        }
        if let Some(hidden) = hidden {
            self.unlink(hidden);
        }
        if let Some(child) = child {
            self.teardown(child);
        }
        debug!("released macro block {block}");
    }

    /// Free expansion `id`, its nested expansions and every node it owns.
    fn teardown(&mut self, id: ExpansionId) {
        let Some(expansion) = self.expansions.free(id) else {
            return;
        };
        for child in expansion.children() {
            self.teardown(child);
        }
        for member in expansion.members {
            self.unlink(member);
        }
    }

    /// Re-expand every instantiation of `name` on the next tick.
    ///
    /// Nested expansions are torn down and their macro output nodes go back
    /// to pending; root expansions keep their parameter and output nodes.
    /// Compiled programs built from `name` are dropped from the session.
    pub fn invalidate_definition(&mut self, name: &str) {
        self.session().invalidate(name);
        let matching: Vec<ExpansionId> = self
            .expansions
            .iter()
            .filter(|(_, expansion)| &*expansion.def.name == name)
            .map(|(id, _)| id)
            .collect();
        debug!("invalidating {} expansions of `{name}`", matching.len());
        for id in matching {
            let Some(expansion) = self.expansions.get(id) else {
                continue;
            };
            match expansion.parent {
                Some(site) => self.reexpand(site),
                None => self.rebuild_root(id),
            }
        }
    }

    fn reexpand(&mut self, site: CallSite) {
        let Some(expansion) = self.expansions.get_mut(site.expansion) else {
            return;
        };
        let BlockState::Macro { outputs, hidden, child } = &mut expansion.blocks[site.block] else {
            return;
        };
        let stale = child.take();
        let carriers: Vec<NodeId> = outputs.iter().copied().chain(*hidden).collect();
        if let Some(stale) = stale {
            self.teardown(stale);
        }
        for node in carriers {
            let Some(Behavior::MacroOut { block, pin }) =
                self.node(node).map(|node| node.behavior.clone())
            else {
                continue;
            };
            self.add_pending(node, 0, Pending::MacroOutput { block, pin });
        }
    }

    fn rebuild_root(&mut self, id: ExpansionId) {
        let Some(expansion) = self.expansions.get(id) else {
            return;
        };
        let name = expansion.def.name.clone();
        let children: Vec<ExpansionId> = expansion.children().collect();
        let keep: Vec<NodeId> = expansion
            .params
            .iter()
            .chain(&expansion.anchors)
            .copied()
            .collect();
        let members: Vec<NodeId> = expansion
            .members
            .iter()
            .copied()
            .filter(|member| !keep.contains(member))
            .collect();
        let arguments = expansion.arguments.clone();
        for child in children {
            self.teardown(child);
        }
        for member in members {
            self.unlink(member);
        }

        let rebuilt = match self.session().registry().definition(&name) {
            Some(def) => Expansion::new(def, None, arguments),
            None => Err(Diagnostic::definition(format!("unknown circuit `{name}`"))),
        };
        let outputs = match rebuilt {
            Ok(mut fresh) => {
                let Some(expansion) = self.expansions.get_mut(id) else {
                    return;
                };
                fresh.params = std::mem::take(&mut expansion.params);
                fresh.anchors = std::mem::take(&mut expansion.anchors);
                fresh.members = keep;
                let names: Vec<Arc<str>> = fresh.def.output_pins().names().map(Arc::from).collect();
                let outputs = fresh.anchors.clone();
                *expansion = fresh;
                outputs.into_iter().zip(names).collect::<Vec<_>>()
            }
            Err(diagnostic) => {
                self.diagnostics_mut().push(diagnostic.in_circuit(&name));
                return;
            }
        };
        for (node, link) in outputs {
            self.add_pending_link(node, 0, &link);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expand::{BlockDescriptor, ModuleRegistry};
    use crate::session::Session;

    fn session(definitions: impl IntoIterator<Item = CircuitDef>) -> Session {
        Session::new(Arc::new(
            ModuleRegistry::with_builtins().with_definitions(definitions),
        ))
    }

    fn double() -> CircuitDef {
        CircuitDef::new("double")
            .inputs(["x"])
            .outputs(["y"])
            .block(BlockDescriptor::new("add").inputs(["x", "x"]).outputs(["y"]))
    }

    #[test]
    fn blocks_materialize_only_when_reached() {
        let session = session([CircuitDef::new("main")
            .outputs(["a"])
            .block(BlockDescriptor::new("int").outputs(["a"]).arguments(["1"]))
            .block(BlockDescriptor::new("int").outputs(["unused"]).arguments(["2"]))]);
        let mut graph = Graph::new(&session);
        let root = graph.instantiate("main", &[]).unwrap();
        assert!(graph.settle(1000));
        assert_eq!(graph.output(root.outputs[0]).and_then(Value::as_int), Some(1));
        // Output pass-through plus the one literal reached from it.
        assert_eq!(graph.node_count(), 2);
    }

    #[test]
    fn duplicate_links_are_rejected() {
        let session = session([CircuitDef::new("main")
            .inputs(["a"])
            .outputs(["a"])
            .block(BlockDescriptor::new("int").outputs(["a"]).arguments(["1"]))]);
        let mut graph = Graph::new(&session);
        let error = graph.instantiate("main", &[]).unwrap_err();
        assert!(error.message.contains("duplicate link `a`"));
    }

    #[test]
    fn unresolved_links_are_reported_on_the_node() {
        let session = session([CircuitDef::new("main")
            .outputs(["y"])
            .block(BlockDescriptor::new("neg").inputs(["missing"]).outputs(["y"]))]);
        let mut graph = Graph::new(&session);
        graph.instantiate("main", &[]).unwrap();
        assert!(graph.settle(1000));
        let messages: Vec<_> = graph.diagnostics().iter().map(|d| d.message.clone()).collect();
        assert_eq!(messages, ["unresolved link `missing`"]);
    }

    #[test]
    fn nested_circuits_expand_through_macro_outputs() {
        let session = session([
            double(),
            CircuitDef::new("main")
                .outputs(["out"])
                .block(BlockDescriptor::new("int").outputs(["three"]).arguments(["3"]))
                .block(BlockDescriptor::new("double").inputs(["three"]).outputs(["out"])),
        ]);
        let mut graph = Graph::new(&session);
        let root = graph.instantiate("main", &[]).unwrap();
        assert!(graph.settle(1000));
        assert_eq!(graph.output(root.outputs[0]).and_then(Value::as_int), Some(6));
        assert_eq!(graph.expansion_count(), 2);
    }

    #[test]
    fn arguments_substitute_through_nesting() {
        let session = session([
            CircuitDef::new("constant")
                .arguments(["value"])
                .outputs(["out"])
                .block(BlockDescriptor::new("const").outputs(["out"]).arguments(["value"])),
            CircuitDef::new("wrapper")
                .arguments(["n"])
                .outputs(["out"])
                .block(BlockDescriptor::new("constant").outputs(["out"]).arguments(["n"])),
            CircuitDef::new("main")
                .outputs(["out"])
                .block(BlockDescriptor::new("wrapper").outputs(["out"]).arguments(["42"])),
        ]);
        let mut graph = Graph::new(&session);
        let root = graph.instantiate("main", &[]).unwrap();
        assert!(graph.settle(1000));
        assert_eq!(graph.output(root.outputs[0]).and_then(Value::as_int), Some(42));
    }

    #[test]
    fn invalidation_reexpands_nested_definitions() {
        let registry = Arc::new(ModuleRegistry::with_builtins().with_definitions([
            double(),
            CircuitDef::new("main")
                .inputs(["x"])
                .outputs(["out"])
                .block(BlockDescriptor::new("double").inputs(["x"]).outputs(["out"])),
        ]));
        let session = Session::new(registry.clone());
        let mut graph = Graph::new(&session);
        let root = graph.instantiate("main", &[]).unwrap();
        graph.set_preview(root.params[0], Value::int(session.types(), 5));
        assert!(graph.settle(1000));
        assert_eq!(graph.output(root.outputs[0]).and_then(Value::as_int), Some(10));

        registry.insert(
            CircuitDef::new("double")
                .inputs(["x"])
                .outputs(["y"])
                .block(BlockDescriptor::new("mul").inputs(["x", "x"]).outputs(["y"])),
        );
        graph.invalidate_definition("double");
        assert!(graph.settle(1000));
        assert_eq!(graph.output(root.outputs[0]).and_then(Value::as_int), Some(25));
        assert_eq!(graph.expansion_count(), 2);
    }
}
