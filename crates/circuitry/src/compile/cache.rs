use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use log::debug;

use super::Program;
use crate::diagnostics::Diagnostic;

/// Compilation failed with one or more definition diagnostics.
#[derive(Debug, Clone, thiserror::Error)]
#[error("`{circuit}` failed to compile: {}", .diagnostics.first().map(ToString::to_string).unwrap_or_default())]
pub struct CompileError {
    pub circuit: Arc<str>,
    pub diagnostics: Vec<Diagnostic>,
}

impl From<CompileError> for Diagnostic {
    fn from(error: CompileError) -> Self {
        let circuit = error.circuit;
        error
            .diagnostics
            .into_iter()
            .next()
            .unwrap_or_else(|| Diagnostic::definition(format!("`{circuit}` failed to compile")))
    }
}

/// Memoized program of one definition.
///
/// The first compile runs under `guard`; once the program is set, readers
/// never take the lock.
#[derive(Debug, Default)]
pub struct CompiledSlot {
    program: OnceLock<Arc<Program>>,
    guard: Mutex<()>,
}

impl CompiledSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<Arc<Program>> {
        self.program.get().cloned()
    }

    pub fn get_or_compile(
        &self,
        compile: impl FnOnce() -> Result<Program, CompileError>,
    ) -> Result<Arc<Program>, CompileError> {
        if let Some(program) = self.program.get() {
            return Ok(program.clone());
        }
        let _guard = self.guard.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(program) = self.program.get() {
            debug!("`{}` was compiled while waiting", program.name);
            return Ok(program.clone());
        }
        let program = Arc::new(compile()?);
        Ok(self.program.get_or_init(|| program).clone())
    }
}
