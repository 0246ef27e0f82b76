use std::fmt;
use std::sync::Arc;

use smallvec::SmallVec;

use super::{ExpansionId, NodeId};
use crate::interp::{Addr, Op};
use crate::value::Value;

/// Structural role of a node, as seen by the scope compiler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    /// Plain instruction.
    Instr,
    /// Loop begin: carries loop state.
    Begin,
    /// Loop end: closes the loop opened by its pin 0.
    End,
    /// Switch: pin 0 selects, pins 1.. are branches.
    Switch,
    /// Transparent forwarding of input 0.
    Pass,
}

/// What a node computes.
#[derive(Clone)]
pub enum Behavior {
    Const(Value),
    /// Argument `k` of the compiled function.
    Param(usize),
    /// Operator or native bound directly.
    Op(Arc<dyn Op>),
    /// Operator names dispatched on the runtime type of the operands.
    Virtual(Arc<[Arc<str>]>),
    Pack,
    Unpack(usize),
    /// Call another circuit as a compiled function.
    Call(Arc<str>),
    Begin,
    End,
    Switch,
    Pass,
    /// Output `pin` of nested circuit block `block` in the owning expansion.
    MacroOut { block: usize, pin: usize },
}

impl Behavior {
    pub fn kind(&self) -> NodeKind {
        match self {
            Behavior::Begin => NodeKind::Begin,
            Behavior::End => NodeKind::End,
            Behavior::Switch => NodeKind::Switch,
            Behavior::Pass | Behavior::MacroOut { .. } => NodeKind::Pass,
            _ => NodeKind::Instr,
        }
    }
}

impl fmt::Debug for Behavior {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Behavior::Const(value) => write!(f, "const {value}"),
            Behavior::Param(index) => write!(f, "param {index}"),
            Behavior::Op(op) => write!(f, "op {}", op.name()),
            Behavior::Virtual(names) => write!(f, "virtual {}", names.join("|")),
            Behavior::Pack => f.write_str("pack"),
            Behavior::Unpack(index) => write!(f, "unpack {index}"),
            Behavior::Call(name) => write!(f, "call {name}"),
            Behavior::Begin => f.write_str("begin"),
            Behavior::End => f.write_str("end"),
            Behavior::Switch => f.write_str("switch"),
            Behavior::Pass => f.write_str("pass"),
            Behavior::MacroOut { block, pin } => write!(f, "macro block {block} pin {pin}"),
        }
    }
}

/// One input pin of one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Edge {
    pub node: NodeId,
    pub pin: usize,
}

/// Input connection still waiting to be resolved through the owning expansion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pending {
    Link(Arc<str>),
    MacroOutput { block: usize, pin: usize },
}

#[derive(Debug, Clone)]
pub struct Node {
    pub kind: NodeKind,
    pub behavior: Behavior,
    pub inputs: SmallVec<[Option<NodeId>; 4]>,
    pub pending: SmallVec<[(usize, Pending); 2]>,
    pub owner: Option<ExpansionId>,
    pub consumers: SmallVec<[Edge; 4]>,
    pub output: Option<Value>,
    /// Bit `i` set when pin `i` changed since the last evaluation; bit 31 covers pins past 30.
    pub dirty: u32,
    pub queued: bool,
    /// Frame address assigned by the last compile.
    pub address: Option<Addr>,
    /// Graph generation the address was assigned in.
    pub generation: u64,
}

impl Node {
    pub fn new(behavior: Behavior, inputs: usize) -> Self {
        Self {
            kind: behavior.kind(),
            behavior,
            inputs: SmallVec::from_elem(None, inputs),
            pending: SmallVec::new(),
            owner: None,
            consumers: SmallVec::new(),
            output: None,
            dirty: 0,
            queued: false,
            address: None,
            generation: 0,
        }
    }

    pub fn pin_bit(pin: usize) -> u32 {
        1 << pin.min(31)
    }

    pub fn is_pass(&self) -> bool {
        self.kind == NodeKind::Pass
    }
}
