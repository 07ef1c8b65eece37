use crate::ast::Span;
use crate::diag::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CompilerError {
    /// Diagnostics accumulated during the symbol-resolution pass.
    #[error("{} semantic error(s)", .0.len())]
    Semantic(Vec<Diagnostic>),

    #[error("Codegen error: {0}")]
    Codegen(String, Option<Span>),

    /// Recognized construct with no code generation yet. Unrecoverable:
    /// there is no safe way to continue past a missing instruction sequence.
    #[error("Unsupported construct: {0}")]
    Unsupported(String, Option<Span>),

    #[error("Intrinsic template error: {0}")]
    Template(String),

    #[error("Module error: {0}")]
    Module(String),

    #[error("SPIR-V builder error: {0}")]
    Builder(#[from] rspirv::dr::Error),
}

impl CompilerError {
    pub fn span(&self) -> Option<Span> {
        match self {
            Self::Semantic(diags) => diags.first().map(|d| d.span),
            Self::Codegen(_, span) | Self::Unsupported(_, span) => *span,
            Self::Template(_) | Self::Module(_) | Self::Builder(_) => None,
        }
    }

    /// The diagnostics of a failed resolution pass, if that is what this is.
    pub fn diagnostics(&self) -> &[Diagnostic] {
        match self {
            Self::Semantic(diags) => diags,
            _ => &[],
        }
    }
}

pub type Result<T> = std::result::Result<T, CompilerError>;

// Bail macros without span

#[macro_export]
macro_rules! bail_codegen {
    ($($arg:tt)*) => {
        return Err($crate::error::CompilerError::Codegen(format!($($arg)*), None))
    };
}

#[macro_export]
macro_rules! bail_template {
    ($($arg:tt)*) => {
        return Err($crate::error::CompilerError::Template(format!($($arg)*)))
    };
}

#[macro_export]
macro_rules! bail_module {
    ($($arg:tt)*) => {
        return Err($crate::error::CompilerError::Module(format!($($arg)*)))
    };
}

// Bail macros with span

#[macro_export]
macro_rules! bail_codegen_at {
    ($span:expr, $($arg:tt)*) => {
        return Err($crate::error::CompilerError::Codegen(format!($($arg)*), Some($span)))
    };
}

#[macro_export]
macro_rules! bail_unsupported_at {
    ($span:expr, $($arg:tt)*) => {
        return Err($crate::error::CompilerError::Unsupported(format!($($arg)*), Some($span)))
    };
}
