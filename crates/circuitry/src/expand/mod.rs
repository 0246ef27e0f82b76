//! Circuit definitions, block assembly and lazy macro expansion.

pub mod descriptor;
mod expansion;
pub mod literal;
mod registry;

pub use descriptor::{BlockDescriptor, CircuitDef, Pins, VARIADIC_SUFFIX};
pub use expansion::{CallSite, Expansion};
pub use registry::{Assembler, Assembly, ModuleRegistry, OPERATORS, Outputs, Registry};
