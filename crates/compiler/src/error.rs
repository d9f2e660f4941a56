//! Compiler diagnostics
//!
//! Every pass reports failures as a [`CompileError`]: a kind from the fixed
//! set below, a human-readable message, and a pre-formatted source location
//! (`file:line`) when one is available. Resource overruns (too many
//! variables or tags) are deliberately *not* errors; they surface as
//! warnings next to the usage summary.

use std::fmt;

/// The categories of compile-time failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A construct outside the supported C subset.
    SyntaxUnsupported,
    /// Redeclaration, unresolved identifier, bad extern, missing main.
    Scope,
    /// Void in a value context, arity mismatch, non-int type.
    Type,
    /// A cycle in the static call graph.
    Recursion,
    /// Expression nesting exceeded the three scratch slots.
    ScratchExhaustion,
    /// Duplicate tag definition (inline asm shares the generated namespace).
    TagCollision,
    /// Malformed `asm()` statement.
    Asm,
    /// An internal invariant was violated; always a compiler bug.
    Internal,
}

impl ErrorKind {
    fn label(self) -> &'static str {
        match self {
            ErrorKind::SyntaxUnsupported => "unsupported syntax",
            ErrorKind::Scope => "scope error",
            ErrorKind::Type => "type error",
            ErrorKind::Recursion => "recursion error",
            ErrorKind::ScratchExhaustion => "scratch exhaustion",
            ErrorKind::TagCollision => "tag collision",
            ErrorKind::Asm => "asm error",
            ErrorKind::Internal => "internal error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileError {
    pub kind: ErrorKind,
    pub message: String,
    /// Pre-formatted `file:line`, when known.
    pub location: Option<String>,
}

impl CompileError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        CompileError {
            kind,
            message: message.into(),
            location: None,
        }
    }

    pub fn at(kind: ErrorKind, message: impl Into<String>, location: String) -> Self {
        CompileError {
            kind,
            message: message.into(),
            location: Some(location),
        }
    }

    pub fn unsupported(message: impl Into<String>, location: String) -> Self {
        Self::at(ErrorKind::SyntaxUnsupported, message, location)
    }

    pub fn scope(message: impl Into<String>, location: String) -> Self {
        Self::at(ErrorKind::Scope, message, location)
    }

    pub fn ty(message: impl Into<String>, location: String) -> Self {
        Self::at(ErrorKind::Type, message, location)
    }

    pub fn asm(message: impl Into<String>, location: String) -> Self {
        Self::at(ErrorKind::Asm, message, location)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.location {
            Some(location) => write!(f, "{}: {}: {}", location, self.kind.label(), self.message),
            None => write!(f, "{}: {}", self.kind.label(), self.message),
        }
    }
}

impl std::error::Error for CompileError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_with_location() {
        let err = CompileError::scope("undeclared identifier 'x'", "blink.c:12".to_string());
        assert_eq!(
            err.to_string(),
            "blink.c:12: scope error: undeclared identifier 'x'"
        );
    }

    #[test]
    fn test_display_without_location() {
        let err = CompileError::internal("tag counter overflow");
        assert_eq!(err.to_string(), "internal error: tag counter overflow");
    }
}
