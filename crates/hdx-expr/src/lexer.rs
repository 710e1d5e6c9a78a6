//! Path-expression tokenizer
//!
//! Splits an expression into tokens the way a path-expression engine would
//! see them: identifiers, `%` external constants, `$` special variables,
//! quoted strings, delimited identifiers, numbers, date/time literals and
//! operators.

use crate::{CompileError, Result};

/// Kind of a lexed token
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /// Plain identifier or keyword (`Patient`, `where`, `and`)
    Identifier,
    /// Back-tick delimited identifier
    DelimitedIdentifier,
    /// `%name`, `%'name'` or `` %`name` ``
    ExternalConstant,
    /// `$this`, `$index`, `$total`
    Variable,
    /// Single-quoted string literal
    String,
    /// Integer or decimal literal
    Number,
    /// `@2020-01-01`, `@T12:00`
    DateTime,
    /// `.`
    Dot,
    /// `,`
    Comma,
    /// One of `( [ {`
    Open(char),
    /// One of `) ] }`
    Close(char),
    /// Binary or unary operator symbol
    Operator,
}

/// A token with its byte span in the source expression
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    pub offset: usize,
}

/// Streaming tokenizer over one expression
pub struct Lexer<'a> {
    source: &'a str,
    pos: usize,
}

const TWO_CHAR_OPERATORS: [&str; 4] = ["!=", "!~", "<=", ">="];
const ONE_CHAR_OPERATORS: [char; 10] = ['+', '-', '*', '/', '|', '&', '=', '~', '<', '>'];

impl<'a> Lexer<'a> {
    /// Create a lexer positioned at the start of `source`
    pub fn new(source: &'a str) -> Self {
        Self { source, pos: 0 }
    }

    /// Tokenize the whole expression
    ///
    /// # Errors
    ///
    /// Fails on unterminated literals and characters outside the grammar.
    pub fn tokenize(mut self) -> Result<Vec<Token>> {
        let mut tokens = Vec::new();
        while let Some(token) = self.next_token()? {
            tokens.push(token);
        }
        Ok(tokens)
    }

    fn peek(&self) -> Option<char> {
        self.source[self.pos..].chars().next()
    }

    fn peek_second(&self) -> Option<char> {
        let mut chars = self.source[self.pos..].chars();
        chars.next();
        chars.next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn error(&self, message: impl Into<String>, at: usize) -> CompileError {
        CompileError::new(self.source, message).at(at)
    }

    fn skip_whitespace_and_comments(&mut self) -> Result<()> {
        loop {
            match (self.peek(), self.peek_second()) {
                (Some(c), _) if c.is_whitespace() => {
                    self.bump();
                }
                (Some('/'), Some('/')) => {
                    while let Some(c) = self.bump() {
                        if c == '\n' {
                            break;
                        }
                    }
                }
                (Some('/'), Some('*')) => {
                    let start = self.pos;
                    self.pos += 2;
                    match self.source[self.pos..].find("*/") {
                        Some(end) => self.pos += end + 2,
                        None => return Err(self.error("unterminated comment", start)),
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    fn next_token(&mut self) -> Result<Option<Token>> {
        self.skip_whitespace_and_comments()?;
        let start = self.pos;
        let Some(c) = self.peek() else {
            return Ok(None);
        };

        let kind = match c {
            '\'' => {
                self.quoted('\'', start)?;
                TokenKind::String
            }
            '`' => {
                self.quoted('`', start)?;
                TokenKind::DelimitedIdentifier
            }
            '%' => {
                self.bump();
                match self.peek() {
                    Some('\'') => self.quoted('\'', start)?,
                    Some('`') => self.quoted('`', start)?,
                    Some(n) if is_identifier_start(n) => self.identifier(),
                    _ => return Err(self.error("expected a constant name after '%'", start)),
                }
                TokenKind::ExternalConstant
            }
            '$' => {
                self.bump();
                match self.peek() {
                    Some(n) if is_identifier_start(n) => self.identifier(),
                    _ => return Err(self.error("expected a variable name after '$'", start)),
                }
                TokenKind::Variable
            }
            '@' => {
                self.bump();
                let literal_start = self.pos;
                while matches!(self.peek(), Some(n) if n.is_ascii_alphanumeric() || matches!(n, '-' | ':' | '.' | '+')) {
                    self.bump();
                }
                if self.pos == literal_start {
                    return Err(self.error("empty date/time literal", start));
                }
                TokenKind::DateTime
            }
            c if c.is_ascii_digit() => {
                self.number();
                TokenKind::Number
            }
            c if is_identifier_start(c) => {
                self.identifier();
                TokenKind::Identifier
            }
            '.' => {
                self.bump();
                TokenKind::Dot
            }
            ',' => {
                self.bump();
                TokenKind::Comma
            }
            '(' | '[' | '{' => {
                self.bump();
                TokenKind::Open(c)
            }
            ')' | ']' | '}' => {
                self.bump();
                TokenKind::Close(c)
            }
            _ => {
                let rest = &self.source[self.pos..];
                if let Some(op) = TWO_CHAR_OPERATORS.iter().find(|op| rest.starts_with(**op)) {
                    self.pos += op.len();
                } else if ONE_CHAR_OPERATORS.contains(&c) {
                    self.bump();
                } else {
                    return Err(self.error(format!("unexpected character '{c}'"), start));
                }
                TokenKind::Operator
            }
        };

        Ok(Some(Token {
            kind,
            text: self.source[start..self.pos].to_string(),
            offset: start,
        }))
    }

    fn quoted(&mut self, delimiter: char, start: usize) -> Result<()> {
        self.bump();
        while let Some(c) = self.bump() {
            if c == '\\' {
                if self.bump().is_none() {
                    break;
                }
            } else if c == delimiter {
                return Ok(());
            }
        }
        let what = if delimiter == '`' {
            "delimited identifier"
        } else {
            "string literal"
        };
        Err(self.error(format!("unterminated {what}"), start))
    }

    fn identifier(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_ascii_alphanumeric() || c == '_') {
            self.bump();
        }
    }

    fn number(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
            self.bump();
        }
        if self.peek() == Some('.') && matches!(self.peek_second(), Some(c) if c.is_ascii_digit()) {
            self.bump();
            while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
                self.bump();
            }
        }
    }
}

fn is_identifier_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        Lexer::new(source)
            .tokenize()
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn test_tokenize_path() {
        assert_eq!(
            kinds("Bundle.entry.resource"),
            vec![
                TokenKind::Identifier,
                TokenKind::Dot,
                TokenKind::Identifier,
                TokenKind::Dot,
                TokenKind::Identifier,
            ]
        );
    }

    #[test]
    fn test_tokenize_constants_and_variables() {
        let tokens = Lexer::new("%resource.where($this = %`rs-ext`)")
            .tokenize()
            .unwrap();
        assert_eq!(tokens[0].kind, TokenKind::ExternalConstant);
        assert_eq!(tokens[0].text, "%resource");
        assert_eq!(tokens[4].kind, TokenKind::Variable);
        assert_eq!(tokens[6].kind, TokenKind::ExternalConstant);
        assert_eq!(tokens[6].text, "%`rs-ext`");
    }

    #[test]
    fn test_tokenize_literals() {
        assert_eq!(
            kinds("'a\\'b' 1.5 @2020-01-01T10:00:00Z"),
            vec![TokenKind::String, TokenKind::Number, TokenKind::DateTime]
        );
    }

    #[test]
    fn test_tokenize_operators() {
        let tokens = Lexer::new("a != b and c <= 2").tokenize().unwrap();
        let ops: Vec<&str> = tokens
            .iter()
            .filter(|t| t.kind == TokenKind::Operator)
            .map(|t| t.text.as_str())
            .collect();
        assert_eq!(ops, vec!["!=", "<="]);
    }

    #[test]
    fn test_skip_comments() {
        assert_eq!(kinds("a // trailing"), vec![TokenKind::Identifier]);
        assert_eq!(kinds("/* lead */ a"), vec![TokenKind::Identifier]);
    }

    #[test]
    fn test_unterminated_string() {
        let err = Lexer::new("name = 'abc").tokenize().unwrap_err();
        assert!(err.message.contains("unterminated string"));
        assert_eq!(err.position, Some(7));
    }

    #[test]
    fn test_unexpected_character() {
        let err = Lexer::new("a # b").tokenize().unwrap_err();
        assert!(err.message.contains("unexpected character '#'"));
    }

    #[test]
    fn test_dangling_percent() {
        assert!(Lexer::new("% ").tokenize().is_err());
    }
}
