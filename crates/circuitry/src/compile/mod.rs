//! Scope/address compiler: turns a settled graph into a [`Program`].
//!
//! Nodes reached from the root outputs are ordered postorder, placed in the
//! innermost scope common to all of their uses, given dense frame addresses
//! per scope and emitted into per-scope instruction sequences. Loops and
//! switches wrap the sequences of their child scopes.

mod cache;
mod scope;

pub use cache::{CompileError, CompiledSlot};
pub use scope::{ScopeId, ScopeKind, ScopeTree};

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use log::debug;

use crate::diagnostics::Diagnostic;
use crate::graph::{Behavior, Graph, NodeId, NodeKind, Root};
use crate::interp::{
    Addr, Addrs, Branch, Code, FunctionCall, Instruction, LoadConst, Loop, Pack, Switch, Unpack,
    VirtualCall,
};

/// A compiled circuit, ready for [`crate::interp::Interpreter::invoke`].
#[derive(Debug)]
pub struct Program {
    pub name: Arc<str>,
    pub code: Code,
    pub frame_size: usize,
    /// Arguments occupy addresses `0..params`.
    pub params: usize,
    /// Address of the return value.
    pub ret: Addr,
    /// Circuits called as functions.
    pub callees: Vec<Arc<str>>,
    /// Circuits expanded in place as macros.
    pub inlined: Vec<Arc<str>>,
}

impl Program {
    /// Top-level instruction count.
    pub fn len(&self) -> usize {
        self.code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }
}

fn write_code(f: &mut fmt::Formatter, code: &[Box<dyn Instruction>], indent: usize) -> fmt::Result {
    for instruction in code {
        writeln!(f, "{:indent$}{instruction:?}", "")?;
    }
    Ok(())
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(
            f,
            "{} ({} params, frame {}, returns {}):",
            self.name, self.params, self.frame_size, self.ret
        )?;
        write_code(f, &self.code, 2)
    }
}

fn unconnected(pin: usize) -> Diagnostic {
    Diagnostic::definition(format!("input {pin} is not connected")).at_pin(pin)
}

/// Follow pass-through nodes to the node computing the value.
fn resolve(graph: &Graph, mut id: NodeId) -> Result<Option<NodeId>, Diagnostic> {
    for _ in 0..=graph.node_count() {
        let Some(node) = graph.node(id) else {
            return Ok(None);
        };
        if !node.is_pass() {
            return Ok(Some(id));
        }
        if !node.pending.is_empty() {
            return Err(Diagnostic::definition("output depends on an unresolved link").at_node(id));
        }
        match node.inputs.first().copied().flatten() {
            Some(source) => id = source,
            None => return Ok(None),
        }
    }
    Err(Diagnostic::definition("dependency cycle through pass-through nodes").at_node(id))
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Done,
}

struct Compiler<'g, 's> {
    graph: &'g Graph<'s>,
    name: Arc<str>,
    params: HashMap<NodeId, Addr>,
    /// Resolved source of every input pin.
    inputs: HashMap<NodeId, Vec<Option<NodeId>>>,
    order: Vec<NodeId>,
    marks: HashMap<NodeId, Mark>,
    /// Owning end node of every loop begin.
    loops: HashMap<NodeId, NodeId>,
    tree: ScopeTree,
    placed: HashMap<NodeId, ScopeId>,
    loop_scopes: HashMap<NodeId, ScopeId>,
    branch_scopes: HashMap<NodeId, Vec<ScopeId>>,
    offsets: HashMap<NodeId, usize>,
}

impl<'g, 's> Compiler<'g, 's> {
    fn new(graph: &'g Graph<'s>, root: &Root) -> Self {
        let params = root
            .params
            .iter()
            .enumerate()
            .map(|(index, param)| (*param, index))
            .collect();
        Self {
            graph,
            name: root.name.clone(),
            params,
            inputs: HashMap::new(),
            order: Vec::new(),
            marks: HashMap::new(),
            loops: HashMap::new(),
            tree: ScopeTree::new(),
            placed: HashMap::new(),
            loop_scopes: HashMap::new(),
            branch_scopes: HashMap::new(),
            offsets: HashMap::new(),
        }
    }

    fn behavior(&self, id: NodeId) -> Result<&'g Behavior, Diagnostic> {
        self.graph
            .node(id)
            .map(|node| &node.behavior)
            .ok_or_else(|| Diagnostic::definition("node was removed").at_node(id))
    }

    fn kind(&self, id: NodeId) -> NodeKind {
        self.graph.node(id).map_or(NodeKind::Instr, |node| node.kind)
    }

    fn is_param(&self, id: NodeId) -> bool {
        self.params.contains_key(&id)
    }

    fn source(&self, id: NodeId, pin: usize) -> Option<NodeId> {
        self.inputs.get(&id)?.get(pin).copied().flatten()
    }

    /// Resolve the inputs of `id`, checking connectivity and loop structure.
    fn visit_inputs(&mut self, id: NodeId) -> Result<Vec<Option<NodeId>>, Diagnostic> {
        let node = self
            .graph
            .node(id)
            .ok_or_else(|| Diagnostic::definition("node was removed").at_node(id))?;
        if let Some((pin, _)) = node.pending.first() {
            return Err(Diagnostic::definition("input has an unresolved link")
                .at_node(id)
                .at_pin(*pin));
        }
        let mut sources = Vec::with_capacity(node.inputs.len());
        for (pin, input) in node.inputs.iter().enumerate() {
            let source = match input {
                Some(input) => resolve(self.graph, *input)?,
                None => None,
            };
            let optional = node.kind == NodeKind::Switch && pin > 0;
            if source.is_none() && !optional {
                return Err(unconnected(pin).at_node(id));
            }
            sources.push(source);
        }
        if node.kind == NodeKind::End {
            let begin = sources.first().copied().flatten();
            let Some(begin) = begin.filter(|begin| self.kind(*begin) == NodeKind::Begin) else {
                return Err(Diagnostic::definition("loop end must link to a loop begin")
                    .at_node(id)
                    .at_pin(0));
            };
            if let Some(owner) = self.loops.insert(begin, id) {
                if owner != id {
                    return Err(Diagnostic::definition("loop begin is closed by more than one end")
                        .at_node(begin));
                }
            }
        }
        Ok(sources)
    }

    /// Postorder over everything reachable from `start`.
    fn walk(&mut self, start: NodeId) -> Result<(), Diagnostic> {
        let mut stack: Vec<(NodeId, usize)> = Vec::new();
        if self.is_param(start) || self.marks.contains_key(&start) {
            return Ok(());
        }
        self.marks.insert(start, Mark::Visiting);
        let sources = self.visit_inputs(start)?;
        self.inputs.insert(start, sources);
        stack.push((start, 0));

        while let Some((id, pin)) = stack.last_mut() {
            let id = *id;
            let next = self.source(id, *pin);
            let count = self.inputs.get(&id).map_or(0, Vec::len);
            if *pin >= count {
                stack.pop();
                self.marks.insert(id, Mark::Done);
                self.order.push(id);
                continue;
            }
            *pin += 1;
            let Some(dependency) = next else {
                continue;
            };
            if self.is_param(dependency) {
                continue;
            }
            match self.marks.get(&dependency) {
                Some(Mark::Done) => {}
                Some(Mark::Visiting) => {
                    return Err(Diagnostic::definition("dependency cycle").at_node(dependency));
                }
                None => {
                    self.marks.insert(dependency, Mark::Visiting);
                    let sources = self.visit_inputs(dependency)?;
                    self.inputs.insert(dependency, sources);
                    stack.push((dependency, 0));
                }
            }
        }
        Ok(())
    }

    /// Scope in which consumer `user` reads its input `pin`.
    fn use_scope(&mut self, user: NodeId, pin: usize) -> Option<ScopeId> {
        let scope = *self.placed.get(&user)?;
        match self.kind(user) {
            NodeKind::End if pin == 0 => None,
            NodeKind::End => Some(self.loop_scope(user, scope)),
            NodeKind::Switch if pin > 0 => Some(self.branch_scope(user, scope, pin - 1)),
            // The begin's init is read by the enclosing scope, before the loop.
            NodeKind::Begin => self.tree.parent(scope),
            _ => Some(scope),
        }
    }

    fn loop_scope(&mut self, end: NodeId, scope: ScopeId) -> ScopeId {
        if let Some(existing) = self.loop_scopes.get(&end) {
            return *existing;
        }
        let id = self.tree.child(scope, ScopeKind::Loop(end));
        self.loop_scopes.insert(end, id);
        id
    }

    fn branch_scope(&mut self, switch: NodeId, scope: ScopeId, branch: usize) -> ScopeId {
        let branches = self.inputs.get(&switch).map_or(0, |inputs| inputs.len().saturating_sub(1));
        if !self.branch_scopes.contains_key(&switch) {
            let scopes = (0..branches)
                .map(|index| self.tree.child(scope, ScopeKind::Branch(switch, index)))
                .collect();
            self.branch_scopes.insert(switch, scopes);
        }
        self.branch_scopes[&switch][branch]
    }

    /// Place every node, consumers first.
    fn place(&mut self, outputs: &[NodeId]) -> Result<(), Diagnostic> {
        let mut uses: HashMap<NodeId, Vec<(NodeId, usize)>> = HashMap::new();
        for id in &self.order {
            for (pin, source) in self.inputs[id].iter().enumerate() {
                if let Some(source) = source {
                    uses.entry(*source).or_default().push((*id, pin));
                }
            }
        }

        for id in self.order.clone().into_iter().rev() {
            let scope = if self.kind(id) == NodeKind::Begin {
                let end = self
                    .loops
                    .get(&id)
                    .copied()
                    .ok_or_else(|| Diagnostic::definition("loop begin without end").at_node(id))?;
                let end_scope = *self
                    .placed
                    .get(&end)
                    .ok_or_else(|| Diagnostic::definition("loop end is unreachable").at_node(end))?;
                self.loop_scope(end, end_scope)
            } else {
                let mut scope: Option<ScopeId> = None;
                if outputs.contains(&id) {
                    scope = Some(ScopeId::ROOT);
                }
                for (user, pin) in uses.get(&id).cloned().unwrap_or_default() {
                    if let Some(used) = self.use_scope(user, pin) {
                        scope = Some(match scope {
                            Some(current) => self.tree.common(current, used),
                            None => used,
                        });
                    }
                }
                scope.unwrap_or(ScopeId::ROOT)
            };
            self.placed.insert(id, scope);
        }

        for (begin, end) in &self.loops {
            let body = self.loop_scopes[end];
            for (user, _) in uses.get(begin).cloned().unwrap_or_default() {
                // Every pin of the end itself is read inside the loop.
                if user == *end {
                    continue;
                }
                let inside = self.placed.get(&user).is_some_and(|used| self.tree.encloses(body, *used));
                if !inside {
                    return Err(Diagnostic::definition("value escapes loop").at_node(user));
                }
            }
        }
        Ok(())
    }

    fn address(&self, id: NodeId) -> Result<Addr, Diagnostic> {
        if let Some(param) = self.params.get(&id) {
            return Ok(*param);
        }
        let scope = self.placed.get(&id);
        let offset = self.offsets.get(&id);
        match (scope, offset) {
            (Some(scope), Some(offset)) => Ok(self.tree.address(*scope, *offset)),
            _ => Err(Diagnostic::definition("value has no address").at_node(id)),
        }
    }

    fn ins(&self, id: NodeId) -> Result<Addrs, Diagnostic> {
        self.inputs[&id]
            .iter()
            .enumerate()
            .map(|(pin, source)| match source {
                Some(source) => self.address(*source),
                None => Err(unconnected(pin).at_node(id)),
            })
            .collect()
    }

    fn instruction(
        &self,
        id: NodeId,
        scopes: &mut HashMap<ScopeId, Code>,
        callees: &mut Vec<Arc<str>>,
    ) -> Result<Option<Box<dyn Instruction>>, Diagnostic> {
        let out = self.address(id)?;
        let instruction: Box<dyn Instruction> = match self.behavior(id)? {
            Behavior::Const(value) => Box::new(LoadConst {
                value: value.clone(),
                out,
            }),
            Behavior::Op(op) => Box::new(op.clone().bind(self.ins(id)?, out)?),
            Behavior::Virtual(names) => Box::new(VirtualCall {
                names: names.clone(),
                ins: self.ins(id)?,
                out,
            }),
            Behavior::Pack => Box::new(Pack {
                ins: self.ins(id)?,
                out,
            }),
            Behavior::Unpack(index) => Box::new(Unpack {
                index: *index,
                input: self.ins(id)?[0],
                out,
            }),
            Behavior::Call(name) => {
                if !callees.contains(name) {
                    callees.push(name.clone());
                }
                Box::new(FunctionCall {
                    name: name.clone(),
                    slot: self.graph.session().slot(name),
                    ins: self.ins(id)?,
                    out,
                })
            }
            Behavior::End => {
                let begin = self.source(id, 0).ok_or_else(|| unconnected(0).at_node(id))?;
                let init = self
                    .source(begin, 0)
                    .ok_or_else(|| unconnected(0).at_node(begin))?;
                let body = self.loop_scopes[&id];
                let ins = self.ins(id)?;
                Box::new(Loop {
                    init: self.address(init)?,
                    state: self.address(begin)?,
                    next: ins[1],
                    cond: ins[2],
                    out,
                    clear: self.tree.extent(body),
                    body: scopes.remove(&body).unwrap_or_default(),
                })
            }
            Behavior::Switch => {
                let inputs = &self.inputs[&id];
                let mut branches = Vec::with_capacity(inputs.len().saturating_sub(1));
                for (index, source) in inputs.iter().enumerate().skip(1) {
                    let code = self
                        .branch_scopes
                        .get(&id)
                        .and_then(|scopes_of| scopes_of.get(index - 1))
                        .and_then(|scope| scopes.remove(scope))
                        .unwrap_or_default();
                    let result = source.map(|source| self.address(source)).transpose()?;
                    branches.push(Branch { code, result });
                }
                let selector = self.source(id, 0).ok_or_else(|| unconnected(0).at_node(id))?;
                Box::new(Switch {
                    selector: self.address(selector)?,
                    branches,
                    out,
                })
            }
            Behavior::Param(_) | Behavior::Begin | Behavior::Pass | Behavior::MacroOut { .. } => {
                return Ok(None);
            }
        };
        Ok(Some(instruction))
    }
}

/// Compile the settled graph reachable from `root` into a program.
pub fn compile(graph: &mut Graph, root: &Root) -> Result<Program, Diagnostic> {
    let mut compiler = Compiler::new(graph, root);
    let name = compiler.name.clone();
    let in_circuit = |diagnostic: Diagnostic| diagnostic.in_circuit(&name);

    let mut outputs = Vec::with_capacity(root.outputs.len());
    for (index, output) in root.outputs.iter().enumerate() {
        let Some(source) = resolve(graph, *output).map_err(in_circuit)? else {
            let output_name = root.output_names.get(index).map_or("?", |name| &**name);
            return Err(in_circuit(Diagnostic::definition(format!(
                "output `{output_name}` is not connected"
            ))));
        };
        compiler.walk(source).map_err(in_circuit)?;
        outputs.push(source);
    }
    compiler.place(&outputs).map_err(in_circuit)?;

    for id in compiler.order.clone() {
        let offset = compiler.tree.claim(compiler.placed[&id]);
        compiler.offsets.insert(id, offset);
    }
    let packed_ret = (outputs.len() != 1).then(|| compiler.tree.claim(ScopeId::ROOT));
    let frame_size = compiler.tree.layout(root.params.len());

    let mut scopes: HashMap<ScopeId, Code> = HashMap::new();
    let mut callees = Vec::new();
    for id in compiler.order.clone() {
        let emitted = compiler
            .instruction(id, &mut scopes, &mut callees)
            .map_err(in_circuit)?;
        if let Some(instruction) = emitted {
            scopes.entry(compiler.placed[&id]).or_default().push(instruction);
        }
    }
    let mut code = scopes.remove(&ScopeId::ROOT).unwrap_or_default();
    let ret = match packed_ret {
        Some(offset) => {
            let ret = compiler.tree.address(ScopeId::ROOT, offset);
            let ins = outputs
                .iter()
                .map(|output| compiler.address(*output))
                .collect::<Result<Addrs, _>>()
                .map_err(in_circuit)?;
            code.push(Box::new(Pack { ins, out: ret }));
            ret
        }
        None => compiler.address(outputs[0]).map_err(in_circuit)?,
    };

    let generation = graph.generation();
    let addresses: Vec<(NodeId, Addr)> = compiler
        .order
        .iter()
        .chain(compiler.params.keys())
        .filter_map(|id| Some((*id, compiler.address(*id).ok()?)))
        .collect();
    drop(compiler);
    for (id, address) in addresses {
        if let Some(node) = graph.node_mut(id) {
            node.address = Some(address);
            node.generation = generation;
        }
    }

    let mut inlined: Vec<Arc<str>> = Vec::new();
    for (_, expansion) in graph.expansions.iter() {
        if expansion.parent.is_some() && !inlined.contains(&expansion.def.name) {
            inlined.push(expansion.def.name.clone());
        }
    }

    debug!(
        "compiled `{name}`: {} instructions, frame size {frame_size}",
        code.len()
    );
    Ok(Program {
        name,
        code,
        frame_size,
        params: root.params.len(),
        ret,
        callees,
        inlined,
    })
}
