//! Mutable dataflow graph with incremental dirty propagation.
//!
//! Nodes live in a generational arena. Each input pin stores its source and
//! each source keeps the reverse edge, so a changed output only wakes the
//! pins that read it. Dirty nodes wait in a FIFO worklist drained in bounded
//! batches by [`Graph::tick`].

mod arena;
mod node;

pub use arena::{Arena, SlotId};
pub use node::{Behavior, Edge, Node, NodeKind, Pending};

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use log::{debug, trace, warn};

use crate::diagnostics::{Diagnostic, DiagnosticChain};
use crate::expand::Expansion;
use crate::interp::Interpreter;
use crate::session::Session;
use crate::value::Value;

pub type NodeId = SlotId;
pub type ExpansionId = SlotId;

/// Entry points of one instantiated circuit.
#[derive(Debug, Clone)]
pub struct Root {
    pub name: Arc<str>,
    /// `None` when the outputs came from a constant cache.
    pub expansion: Option<ExpansionId>,
    /// One parameter node per declared input.
    pub params: Vec<NodeId>,
    /// One pass-through node per declared output.
    pub outputs: Vec<NodeId>,
    pub output_names: Vec<Arc<str>>,
}

pub struct Graph<'s> {
    session: &'s Session,
    pub(crate) nodes: Arena<Node>,
    pub(crate) expansions: Arena<Expansion>,
    worklist: VecDeque<NodeId>,
    diagnostics: DiagnosticChain,
    previews: HashMap<NodeId, Value>,
    generation: u64,
}

impl<'s> Graph<'s> {
    pub fn new(session: &'s Session) -> Self {
        Self {
            session,
            nodes: Arena::new(),
            expansions: Arena::new(),
            worklist: VecDeque::new(),
            diagnostics: DiagnosticChain::new(),
            previews: HashMap::new(),
            generation: 0,
        }
    }

    pub fn session(&self) -> &'s Session {
        self.session
    }

    /// Bumped by every structural change.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id)
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.is_valid(id)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn expansion_count(&self) -> usize {
        self.expansions.len()
    }

    /// Current output of `id`, for live display.
    pub fn output(&self, id: NodeId) -> Option<&Value> {
        self.nodes.get(id)?.output.as_ref()
    }

    pub fn diagnostics(&self) -> &DiagnosticChain {
        &self.diagnostics
    }

    pub(crate) fn diagnostics_mut(&mut self) -> &mut DiagnosticChain {
        &mut self.diagnostics
    }

    pub fn take_diagnostics(&mut self) -> Vec<Diagnostic> {
        self.diagnostics.take()
    }

    /// Nodes waiting in the worklist.
    pub fn pending(&self) -> usize {
        self.worklist.len()
    }

    pub fn is_settled(&self) -> bool {
        self.worklist.is_empty()
    }

    /// Add a free-standing node with `inputs` unconnected pins.
    pub fn add_node(&mut self, behavior: Behavior, inputs: usize) -> NodeId {
        self.add_owned(behavior, inputs, None)
    }

    pub(crate) fn add_owned(
        &mut self,
        behavior: Behavior,
        inputs: usize,
        owner: Option<ExpansionId>,
    ) -> NodeId {
        let mut node = Node::new(behavior, inputs);
        node.owner = owner;
        let id = self.nodes.alloc(node);
        if let Some(expansion) = owner.and_then(|owner| self.expansions.get_mut(owner)) {
            expansion.members.push(id);
        }
        self.generation += 1;
        self.mark_dirty(id, 0);
        id
    }

    /// Leave `pin` of `node` to be resolved through its owner the next time it is evaluated.
    pub(crate) fn add_pending(&mut self, node: NodeId, pin: usize, pending: Pending) {
        if let Some(node_data) = self.nodes.get_mut(node) {
            node_data.pending.retain(|(existing, _)| *existing != pin);
            node_data.pending.push((pin, pending));
        }
        self.mark_dirty(node, pin);
    }

    pub(crate) fn add_pending_link(&mut self, node: NodeId, pin: usize, link: &Arc<str>) {
        if !link.is_empty() {
            self.add_pending(node, pin, Pending::Link(link.clone()));
        }
    }

    /// Rewire input `pin` of `node` to `source`.
    ///
    /// Removes the edge from the old source's consumers, adds it to the new
    /// one's and marks the pin dirty when the new source is `None` or already
    /// has an output.
    pub fn connect(&mut self, node: NodeId, pin: usize, source: Option<NodeId>) {
        let source = source.filter(|source| self.nodes.is_valid(*source));
        let Some(node_data) = self.nodes.get_mut(node) else {
            return;
        };
        if pin >= node_data.inputs.len() {
            node_data.inputs.resize(pin + 1, None);
        }
        let old = std::mem::replace(&mut node_data.inputs[pin], source);
        node_data.pending.retain(|(existing, _)| *existing != pin);

        let edge = Edge { node, pin };
        if let Some(old_data) = old.and_then(|old| self.nodes.get_mut(old)) {
            old_data.consumers.retain(|consumer| *consumer != edge);
        }
        let mut ready = true;
        if let Some(source_data) = source.and_then(|source| self.nodes.get_mut(source)) {
            if !source_data.consumers.contains(&edge) {
                source_data.consumers.push(edge);
            }
            ready = source_data.output.is_some();
        }
        self.generation += 1;
        if ready {
            self.mark_dirty(node, pin);
        }
    }

    /// Store a new output; consumers are woken only when it differs from the cached one.
    pub fn update_output(&mut self, node: NodeId, value: Option<Value>) -> bool {
        let Some(node_data) = self.nodes.get_mut(node) else {
            return false;
        };
        if node_data.output == value {
            return false;
        }
        node_data.output = value;
        let consumers = node_data.consumers.clone();
        for edge in consumers {
            self.mark_dirty(edge.node, edge.pin);
        }
        true
    }

    pub fn mark_dirty(&mut self, node: NodeId, pin: usize) {
        let Some(node_data) = self.nodes.get_mut(node) else {
            return;
        };
        node_data.dirty |= Node::pin_bit(pin);
        if !node_data.queued {
            node_data.queued = true;
            self.worklist.push_back(node);
        }
    }

    /// Preview value a parameter shows while settling.
    pub fn set_preview(&mut self, param: NodeId, value: Value) {
        self.previews.insert(param, value);
        self.mark_dirty(param, 0);
    }

    /// Remove `node`, redirecting its consumers.
    ///
    /// Pass-through nodes hand their consumers to their own source; others
    /// leave them unconnected. Removing the last output of an expanded macro
    /// tears the macro down.
    pub fn remove(&mut self, node: NodeId) {
        let Some(node_data) = self.nodes.get(node) else {
            return;
        };
        let owner = node_data.owner;
        let replaced = self.unlink(node);
        if let Some(owner) = owner {
            self.release_macro_output(owner, node);
        }
        debug!("removed node {} (consumers moved to {replaced:?})", node.index);
    }

    /// Disconnect and free `node` without touching macro bookkeeping.
    pub(crate) fn unlink(&mut self, node: NodeId) -> Option<NodeId> {
        let node_data = self.nodes.get(node)?;
        let inputs = node_data.inputs.clone();
        let consumers = node_data.consumers.clone();
        let replacement = if node_data.is_pass() {
            node_data.inputs.first().copied().flatten()
        } else {
            None
        };
        for (pin, source) in inputs.into_iter().enumerate() {
            let edge = Edge { node, pin };
            if let Some(source_data) = source.and_then(|source| self.nodes.get_mut(source)) {
                source_data.consumers.retain(|consumer| *consumer != edge);
            }
        }
        for edge in consumers {
            if edge.node != node {
                self.connect(edge.node, edge.pin, replacement);
            }
        }
        self.nodes.free(node);
        self.previews.remove(&node);
        self.diagnostics.clear_node(node);
        self.generation += 1;
        replacement
    }

    /// Process up to `steps` dirty nodes; returns whether work remains.
    pub fn tick(&mut self, steps: usize) -> bool {
        let mut processed = 0;
        while processed < steps {
            let Some(node) = self.worklist.pop_front() else {
                break;
            };
            processed += 1;
            self.process(node);
        }
        if processed > 0 {
            debug!(
                "tick processed {processed} nodes, {} pending",
                self.worklist.len()
            );
        }
        !self.worklist.is_empty()
    }

    /// Tick until idle; hitting `limit` processed nodes is a definition diagnostic.
    pub fn settle(&mut self, limit: usize) -> bool {
        let batch = 1024.min(limit.max(1));
        let mut budget = limit;
        while !self.worklist.is_empty() {
            if budget == 0 {
                warn!(
                    "graph did not settle within {limit} steps, {} nodes pending",
                    self.worklist.len()
                );
                self.diagnostics.push(Diagnostic::definition(format!(
                    "graph did not settle within {limit} steps"
                )));
                return false;
            }
            let steps = batch.min(budget);
            self.tick(steps);
            budget -= steps;
        }
        true
    }

    fn process(&mut self, id: NodeId) {
        if !self.nodes.is_valid(id) {
            return;
        }
        self.diagnostics.clear_node(id);
        let resolved = self.resolve_pending(id);
        if let Some(node_data) = self.nodes.get_mut(id) {
            node_data.queued = false;
            node_data.dirty = 0;
        }
        match resolved.and_then(|()| self.evaluate(id)) {
            Ok(value) => {
                trace!("node {} settled to {value:?}", id.index);
                self.update_output(id, value);
            }
            Err(diagnostic) => {
                let mut diagnostic = diagnostic.at_node(id);
                if let Some(name) = self.circuit_of(id) {
                    diagnostic = diagnostic.in_circuit(&name);
                }
                debug!("node {}: {diagnostic}", id.index);
                self.diagnostics.push(diagnostic);
                self.update_output(id, None);
            }
        }
    }

    /// Name of the circuit whose expansion owns `id`.
    pub fn circuit_of(&self, id: NodeId) -> Option<Arc<str>> {
        let owner = self.nodes.get(id)?.owner?;
        Some(self.expansions.get(owner)?.def.name.clone())
    }

    fn resolve_pending(&mut self, id: NodeId) -> Result<(), Diagnostic> {
        let Some(node_data) = self.nodes.get(id) else {
            return Ok(());
        };
        if node_data.pending.is_empty() {
            return Ok(());
        }
        let pending = node_data.pending.clone();
        let Some(owner) = node_data.owner else {
            return Err(Diagnostic::definition(
                "node has unresolved inputs but no owning circuit",
            ));
        };
        let mut first_error = None;
        for (pin, link) in pending {
            let resolved = match &link {
                Pending::Link(name) => self.resolve_link(owner, name),
                Pending::MacroOutput { block, pin: output } => {
                    self.resolve_macro_output(owner, *block, *output)
                }
            };
            match resolved {
                Ok(source) => self.connect(id, pin, source),
                Err(diagnostic) => {
                    first_error.get_or_insert(diagnostic.at_pin(pin));
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    fn input_values(&self, id: NodeId) -> Option<Vec<Value>> {
        let node_data = self.nodes.get(id)?;
        node_data
            .inputs
            .iter()
            .map(|input| self.output((*input)?).cloned())
            .collect()
    }

    fn input_value(&self, id: NodeId, pin: usize) -> Option<Value> {
        let source = (*self.nodes.get(id)?.inputs.get(pin)?)?;
        self.output(source).cloned()
    }

    /// Settle-time value of `id`.
    fn evaluate(&mut self, id: NodeId) -> Result<Option<Value>, Diagnostic> {
        let Some(node_data) = self.nodes.get(id) else {
            return Ok(None);
        };
        let session = self.session;
        let preview = || Interpreter::new(session).with_budget(session.config().preview_budget);
        Ok(match &node_data.behavior {
            Behavior::Const(value) => Some(value.clone()),
            Behavior::Param(_) => self.previews.get(&id).cloned(),
            Behavior::Begin
            | Behavior::End
            | Behavior::Pass
            | Behavior::MacroOut { .. } => self.input_value(id, 0),
            Behavior::Switch => self.input_value(id, 1),
            Behavior::Pack => self
                .input_values(id)
                .map(|values| Value::pack(session.types(), values)),
            Behavior::Unpack(index) => match self.input_value(id, 0) {
                Some(value) => Some(value.element(*index)?),
                None => None,
            },
            Behavior::Virtual(names) => match self.input_values(id) {
                Some(args) => {
                    let mut interp = preview();
                    let (op, args) = interp.resolve(names, &args)?;
                    if op.is_pure() {
                        Some(op.call(&mut interp, &args)?)
                    } else {
                        None
                    }
                }
                None => None,
            },
            Behavior::Op(op) if op.is_pure() => match self.input_values(id) {
                Some(args) => Some(op.call(&mut preview(), &args)?),
                None => None,
            },
            Behavior::Op(_) | Behavior::Call(_) => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expand::ModuleRegistry;
    use crate::session::Session;

    fn session() -> Session {
        Session::new(Arc::new(ModuleRegistry::with_builtins()))
    }

    #[test]
    fn connect_keeps_consumer_sets_consistent() {
        let session = session();
        let mut graph = Graph::new(&session);
        let a = graph.add_node(Behavior::Const(Value::int(session.types(), 1)), 0);
        let b = graph.add_node(Behavior::Const(Value::int(session.types(), 2)), 0);
        let sink = graph.add_node(Behavior::Pack, 2);

        graph.connect(sink, 0, Some(a));
        graph.connect(sink, 0, Some(a));
        graph.connect(sink, 1, Some(a));
        assert_eq!(graph.node(a).unwrap().consumers.len(), 2);

        graph.connect(sink, 0, Some(b));
        let consumers = &graph.node(a).unwrap().consumers;
        assert_eq!(consumers.as_slice(), &[Edge { node: sink, pin: 1 }]);
        assert_eq!(graph.node(b).unwrap().consumers.len(), 1);
        assert_eq!(graph.node(sink).unwrap().inputs[0], Some(b));
    }

    #[test]
    fn settling_folds_pure_values() {
        let session = session();
        let mut graph = Graph::new(&session);
        let a = graph.add_node(Behavior::Const(Value::int(session.types(), 2)), 0);
        let b = graph.add_node(Behavior::Const(Value::int(session.types(), 5)), 0);
        let sum = graph.add_node(Behavior::Virtual(Arc::from([Arc::from("add")])), 2);
        graph.connect(sum, 0, Some(a));
        graph.connect(sum, 1, Some(b));

        assert!(graph.tick(1));
        assert!(graph.settle(100));
        assert_eq!(graph.output(sum).and_then(Value::as_int), Some(7));
    }

    #[test]
    fn worklist_queues_each_node_once() {
        let session = session();
        let mut graph = Graph::new(&session);
        let a = graph.add_node(Behavior::Const(Value::int(session.types(), 2)), 0);
        let sink = graph.add_node(Behavior::Pass, 1);
        graph.connect(sink, 0, Some(a));
        assert!(graph.settle(100));

        graph.mark_dirty(sink, 0);
        graph.mark_dirty(sink, 3);
        assert_eq!(graph.pending(), 1);
        assert_eq!(graph.node(sink).unwrap().dirty, 0b1001);
    }

    #[test]
    fn failing_nodes_clear_their_output() {
        let session = session();
        let types = session.types();
        let mut graph = Graph::new(&session);
        let a = graph.add_node(Behavior::Const(Value::int(types, 2)), 0);
        let b = graph.add_node(Behavior::Const(Value::int(types, 3)), 0);
        let sum = graph.add_node(Behavior::Virtual(Arc::from([Arc::from("add")])), 2);
        graph.connect(sum, 0, Some(a));
        graph.connect(sum, 1, Some(b));
        assert!(graph.settle(100));
        assert!(graph.output(sum).is_some());

        graph.update_output(b, Some(Value::text(types, "x")));
        assert!(graph.settle(100));
        assert!(graph.output(sum).is_none());
        assert_eq!(graph.diagnostics().len(), 1);
        let diagnostic = graph.diagnostics().iter().next().unwrap();
        assert_eq!(diagnostic.locator.node, Some(sum));
    }

    #[test]
    fn removing_a_pass_through_reroutes_consumers() {
        let session = session();
        let mut graph = Graph::new(&session);
        let a = graph.add_node(Behavior::Const(Value::int(session.types(), 4)), 0);
        let pass = graph.add_node(Behavior::Pass, 1);
        let sink = graph.add_node(Behavior::Pass, 1);
        graph.connect(pass, 0, Some(a));
        graph.connect(sink, 0, Some(pass));
        assert!(graph.settle(100));

        graph.remove(pass);
        assert!(!graph.contains(pass));
        assert_eq!(graph.node(sink).unwrap().inputs[0], Some(a));
        assert_eq!(graph.node(a).unwrap().consumers.len(), 1);

        graph.remove(a);
        assert_eq!(graph.node(sink).unwrap().inputs[0], None);
        assert!(graph.settle(100));
        assert!(graph.output(sink).is_none());
    }
}
