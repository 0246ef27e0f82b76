//! Positioned, chainable errors shared by expansion, compilation and execution.

use std::fmt;
use std::io::Cursor;
use std::ops::Range;
use std::sync::Arc;

use ariadne::{Config, Label, Report, ReportKind, Source};

use crate::graph::NodeId;
use crate::interp::Addr;

/// Which stage raised a diagnostic and how callers should treat it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiagnosticKind {
    /// Malformed block descriptor: arity, unresolved link, bad literal, recursive macro.
    Definition,
    /// Element access on a value or type that does not support it.
    Type,
    /// No virtual method for an operator, or a selector out of range.
    Dispatch,
    /// Failure reported by a natively implemented function.
    Resource,
    /// Step or call-depth budget exhausted.
    Budget,
}

impl fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Self::Definition => "definition error",
            Self::Type => "type error",
            Self::Dispatch => "dispatch error",
            Self::Resource => "resource error",
            Self::Budget => "budget exhausted",
        };
        f.write_str(name)
    }
}

/// Where a diagnostic happened.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Locator {
    pub circuit: Option<Arc<str>>,
    pub node: Option<NodeId>,
    pub pin: Option<usize>,
    pub address: Option<Addr>,
    /// Call-site addresses, innermost first.
    pub trace: Vec<Addr>,
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut parts = Vec::new();
        if let Some(circuit) = &self.circuit {
            parts.push(format!("circuit `{circuit}`"));
        }
        if let Some(node) = self.node {
            parts.push(format!("node {}", node.index));
        }
        if let Some(pin) = self.pin {
            parts.push(format!("pin {pin}"));
        }
        if let Some(address) = self.address {
            parts.push(format!("address {address}"));
        }
        for call in &self.trace {
            parts.push(format!("called from address {call}"));
        }
        f.write_str(&parts.join(", "))
    }
}

/// Literal text a diagnostic points into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiteralSpan {
    pub text: Arc<str>,
    pub span: Range<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub message: String,
    pub locator: Locator,
    pub literal: Option<LiteralSpan>,
}

impl Diagnostic {
    pub fn new(kind: DiagnosticKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            locator: Locator::default(),
            literal: None,
        }
    }

    pub fn definition(message: impl Into<String>) -> Self {
        Self::new(DiagnosticKind::Definition, message)
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new(DiagnosticKind::Type, message)
    }

    pub fn dispatch(message: impl Into<String>) -> Self {
        Self::new(DiagnosticKind::Dispatch, message)
    }

    pub fn resource(message: impl Into<String>) -> Self {
        Self::new(DiagnosticKind::Resource, message)
    }

    pub fn budget(message: impl Into<String>) -> Self {
        Self::new(DiagnosticKind::Budget, message)
    }

    pub fn is_definition(&self) -> bool {
        self.kind == DiagnosticKind::Definition
    }

    /// Attach a node unless one is already recorded.
    pub fn at_node(mut self, node: NodeId) -> Self {
        self.locator.node.get_or_insert(node);
        self
    }

    pub fn at_pin(mut self, pin: usize) -> Self {
        self.locator.pin.get_or_insert(pin);
        self
    }

    /// Attach an instruction address unless one is already recorded.
    pub fn at_address(mut self, address: Addr) -> Self {
        self.locator.address.get_or_insert(address);
        self
    }

    pub fn in_circuit(mut self, circuit: &Arc<str>) -> Self {
        self.locator.circuit.get_or_insert_with(|| circuit.clone());
        self
    }

    /// Record that this diagnostic propagated out of a function call at `address`.
    pub fn called_from(mut self, address: Addr) -> Self {
        self.locator.trace.push(address);
        self
    }

    pub fn with_literal(mut self, text: &str, span: Range<usize>) -> Self {
        self.literal = Some(LiteralSpan {
            text: text.into(),
            span,
        });
        self
    }

    /// Human readable rendering; literal errors get an ariadne report.
    pub fn render(&self) -> String {
        let location = self.locator.to_string();
        let headline = if location.is_empty() {
            self.to_string()
        } else {
            format!("{self} ({location})")
        };
        let Some(literal) = &self.literal else {
            return headline;
        };
        let source_name = "argument";
        let mut report_bytes = Cursor::new(Vec::new());
        let written = Report::build(ReportKind::Error, (source_name, literal.span.clone()))
            .with_config(Config::default().with_color(false))
            .with_message(&headline)
            .with_label(
                Label::new((source_name, literal.span.clone())).with_message(&self.message),
            )
            .finish()
            .write(
                (source_name, Source::from(literal.text.as_ref())),
                &mut report_bytes,
            );
        match written {
            Ok(()) => String::from_utf8_lossy(report_bytes.get_ref()).into_owned(),
            Err(_) => headline,
        }
    }
}

/// Every diagnostic raised while settling, at most one per node.
#[derive(Debug, Default, Clone)]
pub struct DiagnosticChain {
    entries: Vec<Diagnostic>,
}

impl DiagnosticChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, diagnostic: Diagnostic) {
        if let Some(node) = diagnostic.locator.node {
            self.clear_node(node);
        }
        self.entries.push(diagnostic);
    }

    /// Forget whatever was reported for `node`; it is being evaluated again.
    pub fn clear_node(&mut self, node: NodeId) {
        self.entries.retain(|entry| entry.locator.node != Some(node));
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.entries.iter()
    }

    pub fn definitions(&self) -> impl Iterator<Item = &Diagnostic> {
        self.entries.iter().filter(|entry| entry.is_definition())
    }

    pub fn take(&mut self) -> Vec<Diagnostic> {
        std::mem::take(&mut self.entries)
    }
}

impl<'a> IntoIterator for &'a DiagnosticChain {
    type Item = &'a Diagnostic;
    type IntoIter = std::slice::Iter<'a, Diagnostic>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chain_keeps_one_entry_per_node() {
        let node = NodeId { index: 3, generation: 0 };
        let other = NodeId { index: 4, generation: 0 };
        let mut chain = DiagnosticChain::new();
        chain.push(Diagnostic::definition("first").at_node(node));
        chain.push(Diagnostic::definition("second").at_node(node));
        chain.push(Diagnostic::dispatch("elsewhere").at_node(other));

        assert_eq!(chain.len(), 2);
        let messages: Vec<_> = chain.iter().map(|d| d.message.as_str()).collect();
        assert_eq!(messages, vec!["second", "elsewhere"]);
        assert_eq!(chain.definitions().count(), 1);
    }

    #[test]
    fn call_trace_is_appended_in_order() {
        let diagnostic = Diagnostic::dispatch("boom")
            .at_address(7)
            .called_from(2)
            .called_from(5)
            .at_address(9);
        assert_eq!(diagnostic.locator.address, Some(7));
        assert_eq!(diagnostic.locator.trace, vec![2, 5]);
        assert!(diagnostic.render().contains("called from address 5"));
    }

    #[test]
    fn literal_errors_render_a_report() {
        let diagnostic =
            Diagnostic::definition("found 'x' expected digit").with_literal("12x", 2..3);
        let rendered = diagnostic.render();
        assert!(rendered.contains("12x"));
        assert!(rendered.contains("expected digit"));
    }
}
