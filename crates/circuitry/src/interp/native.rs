//! Natively implemented block behaviour.
//!
//! A [`NativeFn`] is a plain closure behind the [`Op`] contract: it receives
//! typed accessors over its inputs and returns one value.

use std::fmt;
use std::sync::Arc;

use super::{Arity, Interpreter, Op};
use crate::diagnostics::{Diagnostic, DiagnosticKind};
use crate::types::TypeRegistry;
use crate::value::Value;

type Body = dyn Fn(&Args<'_>) -> Result<Value, Diagnostic> + Send + Sync;
type Filter = dyn Fn(&[Value]) -> bool + Send + Sync;

pub struct NativeFn {
    name: Arc<str>,
    arity: Arity,
    pure: bool,
    filter: Option<Box<Filter>>,
    body: Box<Body>,
}

impl NativeFn {
    pub fn new(
        name: &str,
        arity: Arity,
        body: impl Fn(&Args<'_>) -> Result<Value, Diagnostic> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            arity,
            pure: true,
            filter: None,
            body: Box::new(body),
        }
    }

    /// Never folded at settle time: I/O, clocks, randomness.
    pub fn impure(mut self) -> Self {
        self.pure = false;
        self
    }

    /// Only match operands for which `filter` holds; used by virtual methods.
    pub fn accepting(mut self, filter: impl Fn(&[Value]) -> bool + Send + Sync + 'static) -> Self {
        self.filter = Some(Box::new(filter));
        self
    }
}

impl fmt::Debug for NativeFn {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("NativeFn")
            .field("name", &self.name)
            .field("arity", &self.arity)
            .field("pure", &self.pure)
            .finish_non_exhaustive()
    }
}

impl Op for NativeFn {
    fn name(&self) -> &str {
        &self.name
    }

    fn arity(&self) -> Arity {
        self.arity
    }

    fn is_pure(&self) -> bool {
        self.pure
    }

    fn accepts(&self, args: &[Value]) -> bool {
        self.filter.as_ref().is_none_or(|filter| filter(args))
    }

    fn call(&self, interp: &mut Interpreter, args: &[Value]) -> Result<Value, Diagnostic> {
        let args = Args {
            name: &self.name,
            types: interp.types(),
            values: args,
        };
        (self.body)(&args).map_err(|diagnostic| match diagnostic.kind {
            DiagnosticKind::Budget | DiagnosticKind::Resource => diagnostic,
            _ => Diagnostic {
                kind: DiagnosticKind::Resource,
                ..diagnostic
            },
        })
    }
}

/// Typed view over a native's inputs.
pub struct Args<'a> {
    name: &'a str,
    types: &'a TypeRegistry,
    values: &'a [Value],
}

impl<'a> Args<'a> {
    pub fn types(&self) -> &'a TypeRegistry {
        self.types
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &'a [Value] {
        self.values
    }

    pub fn get(&self, index: usize) -> Result<&'a Value, Diagnostic> {
        self.values.get(index).ok_or_else(|| {
            Diagnostic::resource(format!("`{}` is missing input {index}", self.name))
        })
    }

    fn expected(&self, index: usize, what: &str) -> Diagnostic {
        let found = self
            .values
            .get(index)
            .map(|value| value.ty().to_string())
            .unwrap_or_default();
        Diagnostic::resource(format!(
            "`{}` expects {what} at input {index}, found `{found}`",
            self.name
        ))
    }

    pub fn int(&self, index: usize) -> Result<i64, Diagnostic> {
        self.get(index)?
            .as_int()
            .ok_or_else(|| self.expected(index, "an integer"))
    }

    /// Floats, or integers widened to floats.
    pub fn float(&self, index: usize) -> Result<f64, Diagnostic> {
        let value = self.get(index)?;
        value
            .as_float()
            .or_else(|| value.as_int().map(|int| int as f64))
            .ok_or_else(|| self.expected(index, "a number"))
    }

    pub fn bool(&self, index: usize) -> Result<bool, Diagnostic> {
        self.get(index)?
            .as_bool()
            .ok_or_else(|| self.expected(index, "a bool"))
    }

    pub fn text(&self, index: usize) -> Result<&'a str, Diagnostic> {
        self.get(index)?
            .as_text()
            .ok_or_else(|| self.expected(index, "text"))
    }

    pub fn bytes(&self, index: usize) -> Result<&'a [u8], Diagnostic> {
        Ok(self.get(index)?.data())
    }

    pub fn elements(&self, index: usize) -> Result<&'a [Value], Diagnostic> {
        Ok(self.get(index)?.elements())
    }
}
