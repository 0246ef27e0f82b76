//! Block/circuit dataflow engine.
//!
//! Circuit definitions are expanded lazily into a mutable dataflow graph that
//! settles incrementally for live editing. Settled graphs compile into
//! scoped, addressed instruction sequences run by a budgeted interpreter.

pub mod compile;
pub mod config;
pub mod diagnostics;
pub mod expand;
pub mod graph;
pub mod interp;
pub mod session;
pub mod snapshot;
pub mod types;
pub mod value;

pub use compile::{CompileError, Program};
pub use config::EngineConfig;
pub use diagnostics::{Diagnostic, DiagnosticChain, DiagnosticKind};
pub use expand::{BlockDescriptor, CircuitDef, ModuleRegistry, Registry};
pub use graph::{Graph, NodeId, Root};
pub use interp::{Arity, Interpreter, NativeFn};
pub use session::Session;
pub use snapshot::ConstantCache;
pub use types::{Type, TypeRegistry};
pub use value::{Selector, Value};
