//! # hdx-expr
//!
//! Path-expression compiler interface for mapping schemas.
//!
//! Schemas carry their mapping logic as path-expression strings (`value`,
//! `resource`, `condition`, `bundleProperty`, constants). The schema engine
//! never evaluates those expressions; it only needs them checked and compiled
//! once so the downstream evaluator can reuse the compiled form. This crate
//! defines that seam:
//!
//! - [`ExpressionCompiler`]: the narrow capability injected into validation
//! - [`CompiledExpression`]: the reusable, checked form of one expression
//! - [`SyntaxCompiler`]: a built-in compiler performing a lexical and
//!   structural syntax check, used when no full evaluator is plugged in
//!
//! ```rust
//! use hdx_expr::{ExpressionCompiler, SyntaxCompiler};
//!
//! let compiler = SyntaxCompiler::new();
//! assert!(compiler.compile("Bundle.entry.resource.ofType(Patient)").is_ok());
//! assert!(compiler.compile("Bundle.entry.resource.ofType(Patient").is_err());
//! ```

pub mod lexer;
pub mod syntax;

pub use lexer::{Lexer, Token, TokenKind};
pub use syntax::SyntaxCompiler;

use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Error raised when an expression fails to compile
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileError {
    /// Human readable syntax detail
    pub message: String,
    /// Byte offset into the expression where the problem was detected
    pub position: Option<usize>,
    /// The expression text that failed
    pub expression: String,
}

impl CompileError {
    /// Build a compile error for `expression`
    pub fn new(expression: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            position: None,
            expression: expression.into(),
        }
    }

    /// Attach the offset the error was detected at
    #[must_use]
    pub fn at(mut self, position: usize) -> Self {
        self.position = Some(position);
        self
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(position) = self.position {
            write!(f, " at offset {position}")?;
        }
        Ok(())
    }
}

impl std::error::Error for CompileError {}

/// Crate-local result type for compilation.
pub type Result<T> = std::result::Result<T, CompileError>;

/// A checked, reusable compiled expression.
///
/// The compiled program is opaque to the schema engine; each compiler stores
/// whatever representation it needs and recovers it with [`CompiledExpression::program`].
#[derive(Clone)]
pub struct CompiledExpression {
    text: Arc<str>,
    program: Arc<dyn Any + Send + Sync>,
}

impl CompiledExpression {
    /// Wrap a compiler-specific program together with its source text
    pub fn new<P>(text: impl Into<Arc<str>>, program: P) -> Self
    where
        P: Any + Send + Sync,
    {
        Self {
            text: text.into(),
            program: Arc::new(program),
        }
    }

    /// Source text this expression was compiled from
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Downcast the compiled program to the compiler's representation
    pub fn program<P: Any>(&self) -> Option<&P> {
        self.program.downcast_ref::<P>()
    }
}

impl fmt::Debug for CompiledExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledExpression")
            .field("text", &self.text)
            .finish_non_exhaustive()
    }
}

impl PartialEq for CompiledExpression {
    fn eq(&self, other: &Self) -> bool {
        self.text == other.text
    }
}

/// Capability that turns an expression string into a [`CompiledExpression`].
///
/// Implementations must be pure and in-memory: validation calls this while
/// walking a whole schema tree and never expects it to block on I/O.
pub trait ExpressionCompiler: Send + Sync {
    /// Compile `text`, failing with a [`CompileError`] on bad syntax
    fn compile(&self, text: &str) -> Result<CompiledExpression>;
}

impl<C: ExpressionCompiler + ?Sized> ExpressionCompiler for Arc<C> {
    fn compile(&self, text: &str) -> Result<CompiledExpression> {
        (**self).compile(text)
    }
}

impl<C: ExpressionCompiler + ?Sized> ExpressionCompiler for &C {
    fn compile(&self, text: &str) -> Result<CompiledExpression> {
        (**self).compile(text)
    }
}
