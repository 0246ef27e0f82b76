//! Compilation session: type tables, definitions and the compile cache.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use log::debug;

use crate::compile::{self, CompileError, CompiledSlot, Program};
use crate::config::EngineConfig;
use crate::diagnostics::Diagnostic;
use crate::expand::Registry;
use crate::graph::Graph;
use crate::interp::{Interpreter, install_builtin_methods};
use crate::types::TypeRegistry;
use crate::value::Value;

/// Shared state of one compilation session.
///
/// Graphs borrow the session while they are edited; compiled programs and
/// the type tables outlive them and are shared between threads.
pub struct Session {
    types: TypeRegistry,
    registry: Arc<dyn Registry>,
    config: EngineConfig,
    programs: Mutex<HashMap<Arc<str>, Arc<CompiledSlot>>>,
    compiles: AtomicUsize,
}

impl Session {
    pub fn new(registry: Arc<dyn Registry>) -> Self {
        Self::with_config(registry, EngineConfig::default())
    }

    pub fn with_config(registry: Arc<dyn Registry>, config: EngineConfig) -> Self {
        let types = TypeRegistry::new();
        install_builtin_methods(&types);
        Self {
            types,
            registry,
            config,
            programs: Mutex::new(HashMap::new()),
            compiles: AtomicUsize::new(0),
        }
    }

    pub fn types(&self) -> &TypeRegistry {
        &self.types
    }

    pub fn registry(&self) -> &dyn Registry {
        &*self.registry
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Compile slot for `name`, created empty on first request.
    pub fn slot(&self, name: &str) -> Arc<CompiledSlot> {
        let mut programs = self.programs.lock().unwrap_or_else(PoisonError::into_inner);
        programs.entry(Arc::from(name)).or_default().clone()
    }

    /// Compiled program of `name`, compiling it on first use.
    pub fn compile(&self, name: &str) -> Result<Arc<Program>, CompileError> {
        let slot = self.slot(name);
        self.compile_slot(&slot, name)
    }

    pub fn compile_slot(&self, slot: &CompiledSlot, name: &str) -> Result<Arc<Program>, CompileError> {
        slot.get_or_compile(|| self.compile_fresh(name))
    }

    /// How many times a definition was actually compiled.
    pub fn compile_count(&self) -> usize {
        self.compiles.load(Ordering::Relaxed)
    }

    fn compile_fresh(&self, name: &str) -> Result<Program, CompileError> {
        self.compiles.fetch_add(1, Ordering::Relaxed);
        let circuit: Arc<str> = name.into();
        let failed = |diagnostics: Vec<Diagnostic>| CompileError {
            circuit: circuit.clone(),
            diagnostics,
        };

        let mut graph = Graph::new(self);
        let root = graph
            .instantiate(name, &[])
            .map_err(|diagnostic| failed(vec![diagnostic]))?;
        graph.settle(self.config.settle_limit);
        let diagnostics: Vec<Diagnostic> = graph.diagnostics().definitions().cloned().collect();
        if !diagnostics.is_empty() {
            debug!("`{name}` has {} definition errors", diagnostics.len());
            return Err(failed(diagnostics));
        }
        compile::compile(&mut graph, &root).map_err(|diagnostic| failed(vec![diagnostic]))
    }

    /// Compile `name` if needed and run it with a fresh step budget.
    pub fn run(&self, name: &str, args: Vec<Value>) -> Result<Value, Diagnostic> {
        let program = self.compile(name)?;
        let mut interp = Interpreter::new(self);
        let result = interp.invoke(&program, args);
        debug!("ran `{name}` in {} steps", interp.steps());
        result
    }

    /// Drop the program of `name` and of every circuit that calls or inlines it.
    pub fn invalidate(&self, name: &str) {
        let mut programs = self.programs.lock().unwrap_or_else(PoisonError::into_inner);
        let mut stale: Vec<Arc<str>> = vec![name.into()];
        while let Some(name) = stale.pop() {
            if programs.remove(&name).is_none() {
                continue;
            }
            debug!("invalidated `{name}`");
            stale.extend(
                programs
                    .iter()
                    .filter(|(_, slot)| {
                        slot.get()
                            .is_some_and(|program| {
                                program.callees.contains(&name) || program.inlined.contains(&name)
                            })
                    })
                    .map(|(caller, _)| caller.clone()),
            );
        }
    }

    pub fn invalidate_all(&self) {
        self.programs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Forget all types and compiled programs; built-in methods are reinstalled.
    pub fn reset(&self) {
        self.invalidate_all();
        self.types.reset();
        install_builtin_methods(&self.types);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expand::{BlockDescriptor, CircuitDef, ModuleRegistry};

    fn assert_send_sync<T: Send + Sync>() {}

    #[test]
    fn session_is_shareable() {
        assert_send_sync::<Session>();
    }

    #[test]
    fn invalidation_cascades_to_callers() {
        let registry = ModuleRegistry::with_builtins().with_definitions([
            CircuitDef::new("one")
                .outputs(["y"])
                .block(BlockDescriptor::new("int").outputs(["y"]).arguments(["1"])),
            CircuitDef::new("two")
                .outputs(["y"])
                .block(BlockDescriptor::new("call").outputs(["a"]).arguments(["one"]))
                .block(BlockDescriptor::new("add").inputs(["a", "a"]).outputs(["y"])),
        ]);
        let session = Session::new(Arc::new(registry));
        let result = session.run("two", Vec::new()).unwrap();
        assert_eq!(result.as_int(), Some(2));
        assert!(session.slot("one").get().is_some());

        session.invalidate("one");
        assert!(session.slot("one").get().is_none());
        assert!(session.slot("two").get().is_none());
    }

    #[test]
    fn reset_keeps_builtin_methods() {
        let session = Session::new(Arc::new(ModuleRegistry::with_builtins()));
        session.types().label("stale");
        session.reset();
        let int = session.types().primitive(crate::types::Primitive::I64);
        assert!(int.has_method("add"));
    }
}
