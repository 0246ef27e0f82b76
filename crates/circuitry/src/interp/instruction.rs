use std::fmt;
use std::ops::Range;
use std::sync::Arc;

use smallvec::SmallVec;

use super::{Addr, Frame, Interpreter};
use crate::compile::CompiledSlot;
use crate::diagnostics::Diagnostic;
use crate::value::{Selector, Value};

/// A compiled instruction sequence.
pub type Code = Vec<Box<dyn Instruction>>;

pub type Addrs = SmallVec<[Addr; 4]>;

/// One bound step of a compiled program.
pub trait Instruction: fmt::Debug + Send + Sync {
    fn eval(&self, interp: &mut Interpreter, frame: &mut Frame) -> Result<(), Diagnostic>;

    /// Address the instruction writes.
    fn output(&self) -> Addr;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exact(usize),
    AtLeast(usize),
}

impl Arity {
    pub fn accepts(self, count: usize) -> bool {
        match self {
            Arity::Exact(expected) => count == expected,
            Arity::AtLeast(minimum) => count >= minimum,
        }
    }
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Arity::Exact(expected) => write!(f, "{expected}"),
            Arity::AtLeast(minimum) => write!(f, "at least {minimum}"),
        }
    }
}

/// An unbound operation: a virtual method, a native, a built-in operator.
pub trait Op: Send + Sync {
    fn name(&self) -> &str;

    fn arity(&self) -> Arity;

    /// Pure operations may be folded while the graph settles.
    fn is_pure(&self) -> bool {
        true
    }

    /// Lets a method decline an operand shape so dispatch keeps looking.
    fn accepts(&self, args: &[Value]) -> bool {
        let _ = args;
        true
    }

    fn call(&self, interp: &mut Interpreter, args: &[Value]) -> Result<Value, Diagnostic>;
}

impl dyn Op {
    /// Capture input and output addresses; arity mismatches fail here, not at run time.
    pub fn bind(self: Arc<Self>, ins: Addrs, out: Addr) -> Result<Call, Diagnostic> {
        if !self.arity().accepts(ins.len()) {
            return Err(Diagnostic::definition(format!(
                "`{}` takes {} inputs, got {}",
                self.name(),
                self.arity(),
                ins.len()
            )));
        }
        Ok(Call { op: self, ins, out })
    }
}

#[derive(Debug)]
pub struct LoadConst {
    pub value: Value,
    pub out: Addr,
}

impl Instruction for LoadConst {
    fn eval(&self, _interp: &mut Interpreter, frame: &mut Frame) -> Result<(), Diagnostic> {
        frame.set(self.out, self.value.clone());
        Ok(())
    }

    fn output(&self) -> Addr {
        self.out
    }
}

pub struct Call {
    op: Arc<dyn Op>,
    ins: Addrs,
    out: Addr,
}

impl fmt::Debug for Call {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Call {}({:?}) -> {}", self.op.name(), self.ins, self.out)
    }
}

impl Instruction for Call {
    fn eval(&self, interp: &mut Interpreter, frame: &mut Frame) -> Result<(), Diagnostic> {
        let args = frame.gather(&self.ins)?;
        let value = self.op.call(interp, &args)?;
        frame.set(self.out, value);
        Ok(())
    }

    fn output(&self) -> Addr {
        self.out
    }
}

#[derive(Debug)]
pub struct VirtualCall {
    pub names: Arc<[Arc<str>]>,
    pub ins: Addrs,
    pub out: Addr,
}

impl Instruction for VirtualCall {
    fn eval(&self, interp: &mut Interpreter, frame: &mut Frame) -> Result<(), Diagnostic> {
        let args = frame.gather(&self.ins)?;
        let value = interp.dispatch(&self.names, &args)?;
        frame.set(self.out, value);
        Ok(())
    }

    fn output(&self) -> Addr {
        self.out
    }
}

#[derive(Debug)]
pub struct Pack {
    pub ins: Addrs,
    pub out: Addr,
}

impl Instruction for Pack {
    fn eval(&self, interp: &mut Interpreter, frame: &mut Frame) -> Result<(), Diagnostic> {
        let values = frame.gather(&self.ins)?;
        frame.set(self.out, Value::pack(interp.types(), values));
        Ok(())
    }

    fn output(&self) -> Addr {
        self.out
    }
}

#[derive(Debug)]
pub struct Unpack {
    pub index: usize,
    pub input: Addr,
    pub out: Addr,
}

impl Instruction for Unpack {
    fn eval(&self, _interp: &mut Interpreter, frame: &mut Frame) -> Result<(), Diagnostic> {
        let value = frame.get(self.input)?.element(self.index)?;
        frame.set(self.out, value);
        Ok(())
    }

    fn output(&self) -> Addr {
        self.out
    }
}

/// Call another circuit's compiled program with a fresh frame.
pub struct FunctionCall {
    pub name: Arc<str>,
    pub slot: Arc<CompiledSlot>,
    pub ins: Addrs,
    pub out: Addr,
}

impl fmt::Debug for FunctionCall {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "FunctionCall {}({:?}) -> {}", self.name, self.ins, self.out)
    }
}

impl Instruction for FunctionCall {
    fn eval(&self, interp: &mut Interpreter, frame: &mut Frame) -> Result<(), Diagnostic> {
        let program = interp
            .session()
            .compile_slot(&self.slot, &self.name)
            .map_err(Diagnostic::from)?;
        let args = frame.gather(&self.ins)?;
        let value = interp
            .invoke(&program, args)
            .map_err(|diagnostic| diagnostic.called_from(self.out))?;
        frame.set(self.out, value);
        Ok(())
    }

    fn output(&self) -> Addr {
        self.out
    }
}

/// `state = init; loop { body; if !cond { break } state = next }; out = state`.
#[derive(Debug)]
pub struct Loop {
    pub init: Addr,
    /// Address of the loop begin node; holds the current state inside the body.
    pub state: Addr,
    pub next: Addr,
    pub cond: Addr,
    pub out: Addr,
    /// Loop-scope addresses, emptied at the start of every iteration.
    pub clear: Range<Addr>,
    pub body: Code,
}

impl Instruction for Loop {
    fn eval(&self, interp: &mut Interpreter, frame: &mut Frame) -> Result<(), Diagnostic> {
        let mut state = frame.get(self.init)?.clone();
        loop {
            interp.step()?;
            frame.clear(self.clear.clone());
            frame.set(self.state, state.clone());
            interp.eval(&self.body, frame, 0)?;
            if Selector::from_value(frame.get(self.cond)?)?.path == 0 {
                break;
            }
            state = frame.get(self.next)?.clone();
        }
        frame.set(self.out, state);
        Ok(())
    }

    fn output(&self) -> Addr {
        self.out
    }
}

#[derive(Debug)]
pub struct Branch {
    pub code: Code,
    /// Address of the branch result; `None` forwards the selector payload.
    pub result: Option<Addr>,
}

/// Run exactly one branch, chosen by the selector value.
#[derive(Debug)]
pub struct Switch {
    pub selector: Addr,
    pub branches: Vec<Branch>,
    pub out: Addr,
}

impl Instruction for Switch {
    fn eval(&self, interp: &mut Interpreter, frame: &mut Frame) -> Result<(), Diagnostic> {
        let value = frame.get(self.selector)?.clone();
        let method = value.ty().method("switch");
        let selector = match method {
            Some(method) => Selector::from_value(&method.call(interp, &[value])?)?,
            None => Selector::from_value(&value)?,
        };
        let Some(branch) = self.branches.get(selector.path as usize) else {
            return Err(Diagnostic::dispatch(format!(
                "switch path {} out of range for {} branches",
                selector.path,
                self.branches.len()
            )));
        };
        interp.eval(&branch.code, frame, 0)?;
        let result = match branch.result {
            Some(address) => frame.get(address)?.clone(),
            None => selector.payload,
        };
        frame.set(self.out, result);
        Ok(())
    }

    fn output(&self) -> Addr {
        self.out
    }
}
