//! Execution of compiled programs.
//!
//! Instruction sequences run straight-line; loops and switches recurse into
//! [`Interpreter::eval`] for their own sub-sequences instead of jumping.

mod builtins;
mod instruction;
mod native;

pub use builtins::{install as install_builtin_methods, natives as builtin_natives};
pub use instruction::{
    Addrs, Arity, Branch, Call, Code, FunctionCall, Instruction, LoadConst, Loop, Op, Pack, Switch, Unpack,
    VirtualCall,
};
pub use native::{Args, NativeFn};

use std::ops::Range;
use std::sync::Arc;

use crate::compile::Program;
use crate::diagnostics::Diagnostic;
use crate::session::Session;
use crate::types::TypeRegistry;
use crate::value::Value;

/// Index into a [`Frame`].
pub type Addr = usize;

/// Value storage for one invocation.
#[derive(Debug, Clone, Default)]
pub struct Frame {
    slots: Vec<Option<Value>>,
}

impl Frame {
    pub fn new(size: usize) -> Self {
        Self {
            slots: vec![None; size],
        }
    }

    /// Frame of `size` slots with the arguments at `0..args.len()`.
    pub fn with_args(size: usize, args: Vec<Value>) -> Self {
        let mut slots: Vec<Option<Value>> = args.into_iter().map(Some).collect();
        slots.resize(size.max(slots.len()), None);
        Self { slots }
    }

    pub fn get(&self, address: Addr) -> Result<&Value, Diagnostic> {
        self.slots
            .get(address)
            .and_then(Option::as_ref)
            .ok_or_else(|| {
                Diagnostic::definition(format!("address {address} is read before it is written"))
            })
    }

    pub fn set(&mut self, address: Addr, value: Value) {
        if address >= self.slots.len() {
            self.slots.resize(address + 1, None);
        }
        self.slots[address] = Some(value);
    }

    pub fn gather(&self, addresses: &[Addr]) -> Result<Vec<Value>, Diagnostic> {
        addresses
            .iter()
            .map(|address| self.get(*address).cloned())
            .collect()
    }

    pub fn clear(&mut self, range: Range<Addr>) {
        let end = range.end.min(self.slots.len());
        let start = range.start.min(end);
        for slot in &mut self.slots[start..end] {
            *slot = None;
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

pub struct Interpreter<'s> {
    session: &'s Session,
    steps: u64,
    budget: u64,
    depth: usize,
    max_depth: usize,
}

impl<'s> Interpreter<'s> {
    pub fn new(session: &'s Session) -> Self {
        let config = session.config();
        Self {
            session,
            steps: 0,
            budget: config.step_budget,
            depth: 0,
            max_depth: config.max_call_depth,
        }
    }

    pub fn with_budget(mut self, budget: u64) -> Self {
        self.budget = budget;
        self
    }

    pub fn session(&self) -> &'s Session {
        self.session
    }

    pub fn types(&self) -> &'s TypeRegistry {
        self.session.types()
    }

    /// Steps executed so far.
    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// Count one step against the budget.
    pub fn step(&mut self) -> Result<(), Diagnostic> {
        self.steps += 1;
        if self.steps > self.budget {
            return Err(Diagnostic::budget(format!(
                "step budget of {} exhausted",
                self.budget
            )));
        }
        Ok(())
    }

    /// Run `code[from..]` against `frame`.
    pub fn eval(
        &mut self,
        code: &[Box<dyn Instruction>],
        frame: &mut Frame,
        from: usize,
    ) -> Result<(), Diagnostic> {
        for instruction in code.iter().skip(from) {
            let address = instruction.output();
            self.step()
                .and_then(|()| instruction.eval(self, frame))
                .map_err(|diagnostic| diagnostic.at_address(address))?;
        }
        Ok(())
    }

    /// Call `program` with a fresh frame and return its result.
    pub fn invoke(&mut self, program: &Program, args: Vec<Value>) -> Result<Value, Diagnostic> {
        if args.len() != program.params {
            return Err(Diagnostic::definition(format!(
                "`{}` takes {} arguments, got {}",
                program.name,
                program.params,
                args.len()
            ))
            .in_circuit(&program.name));
        }
        if self.depth >= self.max_depth {
            return Err(Diagnostic::budget(format!(
                "call depth limit of {} reached",
                self.max_depth
            ))
            .in_circuit(&program.name));
        }
        self.depth += 1;
        let mut frame = Frame::with_args(program.frame_size, args);
        let result = self
            .eval(&program.code, &mut frame, 0)
            .and_then(|()| frame.get(program.ret).cloned());
        self.depth -= 1;
        result.map_err(|diagnostic| diagnostic.in_circuit(&program.name))
    }

    /// Find the method implementing one of `names` for `args`.
    ///
    /// Each name is tried on the first operand's type, unwrapping single field
    /// wrappers, then `r`-prefixed on the second operand's type with the two
    /// operands swapped.
    pub fn resolve(
        &self,
        names: &[Arc<str>],
        args: &[Value],
    ) -> Result<(Arc<dyn Op>, Vec<Value>), Diagnostic> {
        for name in names {
            if let Some(found) = lookup(name, args.to_vec()) {
                return Ok(found);
            }
        }
        if args.len() >= 2 {
            let mut swapped = args.to_vec();
            swapped.swap(0, 1);
            for name in names {
                if let Some(found) = lookup(&format!("r{name}"), swapped.clone()) {
                    return Ok(found);
                }
            }
        }
        let operator = names.first().map(|name| &**name).unwrap_or("?");
        let operands = args
            .iter()
            .take(2)
            .map(|arg| arg.ty().to_string())
            .collect::<Vec<_>>()
            .join(" and ");
        Err(Diagnostic::dispatch(format!(
            "inputs don't support operator `{operator}`: {operands}"
        )))
    }

    pub fn dispatch(&mut self, names: &[Arc<str>], args: &[Value]) -> Result<Value, Diagnostic> {
        let (op, args) = self.resolve(names, args)?;
        op.call(self, &args)
    }
}

fn lookup(name: &str, mut args: Vec<Value>) -> Option<(Arc<dyn Op>, Vec<Value>)> {
    loop {
        let first = args.first()?;
        if let Some(op) = first.ty().method(name) {
            if op.arity().accepts(args.len()) && op.accepts(&args) {
                return Some((op, args));
            }
        }
        first.ty().wrapped()?;
        let inner = first.element(0).ok()?;
        args[0] = inner;
    }
}
