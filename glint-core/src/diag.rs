//! Diagnostics collected during the symbol-resolution pass.
//!
//! Resolution keeps walking after an error so one compile surfaces as many
//! problems as possible; codegen errors are hard failures and live in
//! `error::CompilerError` instead.

use crate::ast::Span;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticKind {
    UnknownType,
    UnresolvedSymbol,
    TypeMismatch,
    NoMatchingOverload,
    InvalidControlFlow,
}

impl fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::UnknownType => "unknown type",
            Self::UnresolvedSymbol => "unresolved symbol",
            Self::TypeMismatch => "type mismatch",
            Self::NoMatchingOverload => "no matching overload",
            Self::InvalidControlFlow => "invalid control flow",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub message: String,
    pub span: Span,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}: {}", self.span, self.kind, self.message)
    }
}

/// Accumulating error sink owned by the symbol table.
#[derive(Debug, Default)]
pub struct Diagnostics {
    entries: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn report(&mut self, kind: DiagnosticKind, span: Span, message: impl Into<String>) {
        self.entries.push(Diagnostic { kind, message: message.into(), span });
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

    /// Drain the sink into the error type raised at the pass boundary.
    pub fn into_vec(self) -> Vec<Diagnostic> {
        self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sink_accumulates() {
        let mut diags = Diagnostics::new();
        assert!(diags.is_empty());
        diags.report(DiagnosticKind::TypeMismatch, Span::new(1, 5), "int vs float");
        diags.report(DiagnosticKind::UnresolvedSymbol, Span::new(2, 1), "no 'foo'");
        assert_eq!(diags.len(), 2);
        let rendered = diags.iter().next().unwrap().to_string();
        assert!(rendered.contains("type mismatch"));
        assert!(rendered.contains("1:5"));
    }
}
