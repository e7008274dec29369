//! The compiler's single error type.
//!
//! Every failure is fatal: the first error raised by any stage aborts the
//! compilation with a non-zero exit. There are no warnings.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CompileError {
    /// Lexer or parser rejected the input.
    #[error("line {line}: {msg}")]
    Syntax { line: u32, msg: String },

    /// Reference to an undeclared variable, function, struct, or field.
    #[error("unknown symbol '{0}'")]
    UnknownSymbol(String),

    /// An operation was applied to a value of the wrong type, e.g. indexing
    /// a non-aggregate, dereferencing a non-pointer, or using a struct value
    /// as an r-value.
    #[error("type error: {0}")]
    TypeMisuse(String),

    /// `break` or `continue` outside any loop or switch.
    #[error("control flow error: {0}")]
    MalformedControlFlow(String),

    /// A pass or the emitter observed IR that violates an invariant it
    /// depends on. Always a compiler bug, never a user error.
    #[error("internal invariant violation: {0}")]
    Internal(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CompileError {
    pub fn syntax(line: u32, msg: impl Into<String>) -> Self {
        CompileError::Syntax { line, msg: msg.into() }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        CompileError::Internal(msg.into())
    }
}
