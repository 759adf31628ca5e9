// diag.rs — Unified diagnostics model
//
// Provides the shared diagnostic types used by the text front-end (parse,
// resolve), the verifier and the pipeline's reporting of expansion faults.
//
// Preconditions: none (types only).
// Postconditions: none (types only).
// Failure modes: none.
// Side effects: none.

use std::fmt;

use crate::ast::Span;

// ── Diagnostic code ──────────────────────────────────────────────────────

/// A stable diagnostic code (e.g., `E0101`, `E0402`).
///
/// Codes are `&'static str` constants defined in the `codes` module.
/// Once assigned, a code must never be reassigned to a different meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DiagCode(pub &'static str);

impl fmt::Display for DiagCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stable codes, grouped by phase: `E01xx` lex/parse, `E02xx` resolve,
/// `E03xx` verify, `E04xx` expansion.
pub mod codes {
    use super::DiagCode;

    pub const E0100: DiagCode = DiagCode("E0100"); // syntax error
    pub const E0200: DiagCode = DiagCode("E0200"); // duplicate definition
    pub const E0201: DiagCode = DiagCode("E0201"); // undefined value or block
    pub const E0202: DiagCode = DiagCode("E0202"); // undefined function
    pub const E0203: DiagCode = DiagCode("E0203"); // undefined struct
    pub const E0204: DiagCode = DiagCode("E0204"); // operand type mismatch
    pub const E0205: DiagCode = DiagCode("E0205"); // invalid metadata tag
    pub const E0206: DiagCode = DiagCode("E0206"); // malformed instruction
    pub const E0300: DiagCode = DiagCode("E0300"); // malformed module
    pub const E0400: DiagCode = DiagCode("E0400"); // kernel plan error
    pub const E0401: DiagCode = DiagCode("E0401"); // expansion error
    pub const E0402: DiagCode = DiagCode("E0402"); // expansion certificate failed
}

// ── Severity level ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagLevel {
    Error,
    Warning,
}

// ── Related span ─────────────────────────────────────────────────────────

/// A secondary source location providing context for a diagnostic.
#[derive(Debug, Clone)]
pub struct RelatedSpan {
    pub span: Span,
    pub label: String,
}

// ── Diagnostic ───────────────────────────────────────────────────────────

/// A compiler diagnostic emitted by any phase.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub code: Option<DiagCode>,
    pub level: DiagLevel,
    /// Source location; `None` for faults found on the IR after resolution.
    pub span: Option<Span>,
    pub message: String,
    pub hint: Option<String>,
    pub related_spans: Vec<RelatedSpan>,
}

impl Diagnostic {
    /// Create a new diagnostic with no code, hint, or related spans.
    pub fn new(level: DiagLevel, span: Option<Span>, message: impl Into<String>) -> Self {
        Self {
            code: None,
            level,
            span,
            message: message.into(),
            hint: None,
            related_spans: Vec::new(),
        }
    }

    /// Shorthand for an error at a source location.
    pub fn error(span: Span, message: impl Into<String>) -> Self {
        Self::new(DiagLevel::Error, Some(span), message)
    }

    /// Attach a stable diagnostic code.
    pub fn with_code(mut self, code: DiagCode) -> Self {
        self.code = Some(code);
        self
    }

    /// Attach a remediation hint.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    /// Attach a related span.
    pub fn with_related(mut self, span: Span, label: impl Into<String>) -> Self {
        self.related_spans.push(RelatedSpan {
            span,
            label: label.into(),
        });
        self
    }

    /// Render with a `file:line:col` prefix when the diagnostic has a span.
    pub fn render(&self, file: &str, source: &str) -> String {
        match self.span {
            Some(span) => {
                let (line, col) = line_col(source, span.start);
                format!("{}:{}:{}: {}", file, line, col, self)
            }
            None => format!("{}: {}", file, self),
        }
    }
}

/// 1-based line and column of a byte offset.
fn line_col(source: &str, offset: usize) -> (usize, usize) {
    let before = &source[..offset.min(source.len())];
    let line = before.matches('\n').count() + 1;
    let col = before.len() - before.rfind('\n').map(|i| i + 1).unwrap_or(0) + 1;
    (line, col)
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.level {
            DiagLevel::Error => "error",
            DiagLevel::Warning => "warning",
        };
        if let Some(code) = &self.code {
            write!(f, "{}[{}]: {}", level, code, self.message)?;
        } else {
            write!(f, "{}: {}", level, self.message)?;
        }
        if let Some(hint) = &self.hint {
            write!(f, "\n  hint: {}", hint)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy_span() -> Span {
        use chumsky::span::Span as _;
        Span::new((), 0..1)
    }

    #[test]
    fn display_without_code() {
        let d = Diagnostic::error(dummy_span(), "something failed");
        assert_eq!(format!("{d}"), "error: something failed");
    }

    #[test]
    fn display_with_code() {
        let d = Diagnostic::new(DiagLevel::Warning, None, "kernel skipped")
            .with_code(DiagCode("W0001"));
        assert_eq!(format!("{d}"), "warning[W0001]: kernel skipped");
    }

    #[test]
    fn builder_chain() {
        let d = Diagnostic::error(dummy_span(), "duplicate function '@root'")
            .with_code(codes::E0200)
            .with_hint("rename one of the definitions")
            .with_related(dummy_span(), "first defined here");

        assert_eq!(d.code, Some(codes::E0200));
        assert_eq!(d.hint.as_deref(), Some("rename one of the definitions"));
        assert_eq!(d.related_spans.len(), 1);
    }

    #[test]
    fn render_prefixes_line_and_column() {
        use chumsky::span::Span as _;
        let source = "target ptr64\nexport foreach @nope 1\n";
        let d = Diagnostic::error(Span::new((), 28..33), "undefined function '@nope'")
            .with_code(codes::E0202);
        assert_eq!(
            d.render("k.kir", source),
            "k.kir:2:16: error[E0202]: undefined function '@nope'"
        );
    }

    #[test]
    fn render_without_span() {
        let d = Diagnostic::new(DiagLevel::Error, None, "module malformed");
        assert_eq!(d.render("k.kir", ""), "k.kir: error: module malformed");
    }
}
