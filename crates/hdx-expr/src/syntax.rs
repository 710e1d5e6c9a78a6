//! Built-in syntax-checking compiler
//!
//! [`SyntaxCompiler`] does not evaluate anything. It tokenizes the expression
//! and walks the token stream once, checking the structural rules every
//! path expression has to satisfy: balanced delimiters, operators with
//! operands on both sides, members after every `.`, and argument lists only
//! inside function calls.

use crate::lexer::{Lexer, Token, TokenKind};
use crate::{CompileError, CompiledExpression, ExpressionCompiler, Result};
use tracing::trace;

/// Keywords acting as binary operators when not used as a member or call
const KEYWORD_OPERATORS: [&str; 10] = [
    "and", "or", "xor", "implies", "div", "mod", "in", "contains", "is", "as",
];

/// Compiled form produced by [`SyntaxCompiler`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntaxProgram {
    pub tokens: Vec<Token>,
}

/// Expression compiler that performs a syntax check only
#[derive(Debug, Clone, Copy, Default)]
pub struct SyntaxCompiler;

impl SyntaxCompiler {
    /// Create a new syntax compiler
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl ExpressionCompiler for SyntaxCompiler {
    fn compile(&self, text: &str) -> Result<CompiledExpression> {
        let tokens = Lexer::new(text).tokenize()?;
        check_structure(text, &tokens)?;
        trace!("Compiled expression '{}' ({} tokens)", text, tokens.len());
        Ok(CompiledExpression::new(text, SyntaxProgram { tokens }))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Frame {
    Call,
    Group,
    Index,
    Collection,
}

impl Frame {
    fn closer(self) -> char {
        match self {
            Frame::Call | Frame::Group => ')',
            Frame::Index => ']',
            Frame::Collection => '}',
        }
    }
}

fn check_structure(text: &str, tokens: &[Token]) -> Result<()> {
    let error = |message: String, offset: usize| CompileError::new(text, message).at(offset);

    if tokens.is_empty() {
        return Err(CompileError::new(text, "expression is empty"));
    }

    let mut stack: Vec<(Frame, usize)> = Vec::new();
    let mut expect_operand = true;
    let mut previous: Option<&Token> = None;

    for (idx, token) in tokens.iter().enumerate() {
        let after_dot = matches!(previous, Some(p) if p.kind == TokenKind::Dot);
        let next = tokens.get(idx + 1);

        if after_dot
            && !matches!(
                token.kind,
                TokenKind::Identifier | TokenKind::DelimitedIdentifier | TokenKind::Variable
            )
        {
            return Err(error(
                format!("expected a member name after '.', found '{}'", token.text),
                token.offset,
            ));
        }

        match token.kind {
            TokenKind::Identifier
                if !after_dot
                    && KEYWORD_OPERATORS.contains(&token.text.as_str())
                    && !matches!(next, Some(n) if n.kind == TokenKind::Open('(')) =>
            {
                if expect_operand {
                    return Err(error(
                        format!("operator '{}' is missing its left operand", token.text),
                        token.offset,
                    ));
                }
                expect_operand = true;
            }
            TokenKind::Identifier
            | TokenKind::DelimitedIdentifier
            | TokenKind::ExternalConstant
            | TokenKind::Variable
            | TokenKind::String
            | TokenKind::Number
            | TokenKind::DateTime => {
                let quantity_unit = matches!(previous, Some(p) if p.kind == TokenKind::Number)
                    && matches!(token.kind, TokenKind::String | TokenKind::Identifier);
                if !expect_operand && !after_dot && !quantity_unit {
                    return Err(error(
                        format!("missing operator before '{}'", token.text),
                        token.offset,
                    ));
                }
                expect_operand = false;
            }
            TokenKind::Dot => {
                if expect_operand {
                    return Err(error("unexpected '.'".to_string(), token.offset));
                }
            }
            TokenKind::Comma => {
                if !matches!(stack.last(), Some((Frame::Call, _))) {
                    return Err(error(
                        "',' is only allowed between function arguments".to_string(),
                        token.offset,
                    ));
                }
                if expect_operand {
                    return Err(error("missing argument before ','".to_string(), token.offset));
                }
                expect_operand = true;
            }
            TokenKind::Open(c) => {
                let frame = match c {
                    '(' if expect_operand => Frame::Group,
                    '(' => {
                        if !matches!(
                            previous,
                            Some(p) if matches!(p.kind, TokenKind::Identifier | TokenKind::DelimitedIdentifier)
                        ) {
                            return Err(error(
                                "'(' must follow a function name".to_string(),
                                token.offset,
                            ));
                        }
                        Frame::Call
                    }
                    '[' if !expect_operand => Frame::Index,
                    '{' if expect_operand => Frame::Collection,
                    _ => return Err(error(format!("unexpected '{c}'"), token.offset)),
                };
                stack.push((frame, token.offset));
                expect_operand = true;
            }
            TokenKind::Close(c) => {
                let Some((frame, _)) = stack.pop() else {
                    return Err(error(format!("unbalanced '{c}'"), token.offset));
                };
                if frame.closer() != c {
                    return Err(error(
                        format!("expected '{}' but found '{c}'", frame.closer()),
                        token.offset,
                    ));
                }
                let just_opened = matches!(previous, Some(p) if matches!(p.kind, TokenKind::Open(_)));
                let empty_allowed = matches!(frame, Frame::Call | Frame::Collection);
                if expect_operand && !(just_opened && empty_allowed) {
                    return Err(error(format!("missing operand before '{c}'"), token.offset));
                }
                if frame == Frame::Collection && !just_opened {
                    return Err(error(
                        "only the empty collection '{}' is supported".to_string(),
                        token.offset,
                    ));
                }
                expect_operand = false;
            }
            TokenKind::Operator => {
                if expect_operand {
                    if !matches!(token.text.as_str(), "+" | "-") {
                        return Err(error(
                            format!("operator '{}' is missing its left operand", token.text),
                            token.offset,
                        ));
                    }
                } else {
                    expect_operand = true;
                }
            }
        }

        previous = Some(token);
    }

    if let Some((frame, offset)) = stack.last() {
        return Err(error(
            format!("unbalanced delimiter, expected '{}'", frame.closer()),
            *offset,
        ));
    }

    let last = &tokens[tokens.len() - 1];
    if expect_operand || last.kind == TokenKind::Dot {
        return Err(error(
            format!("expression ends with dangling '{}'", last.text),
            last.offset,
        ));
    }

    Ok(())
}
