//! Lexer for LASM assembly source.

use crate::error::{AsmError, Result};

/// Token types in LASM.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// Identifier: label, mnemonic or defined-constant name.
    Ident(String),
    /// Register name including the leading `$`, lower-cased.
    Register(String),
    /// Directive including the leading `.`, lower-cased.
    Directive(String),
    /// Integer literal: decimal, `0x` hex or `0b` binary, optionally
    /// negative.
    Num(i64),
    /// String literal with escapes already translated.
    Str(String),
    Comma,
    Colon,
    LParen,
    RParen,
    Newline,
    Eof,
}

/// Token with its source position (1-based line and column).
#[derive(Debug, Clone, PartialEq)]
pub struct TokenWithPos {
    pub token: Token,
    pub line: usize,
    pub col: usize,
}

pub struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    col: usize,
    path: String,
}

impl Lexer {
    pub fn new(source: &str, path: &str) -> Self {
        Self {
            chars: source.chars().collect(),
            pos: 0,
            line: 1,
            col: 1,
            path: path.to_string(),
        }
    }

    /// Tokenize the whole input. The returned stream always ends with
    /// an Eof token.
    pub fn tokenize(mut self) -> Result<Vec<TokenWithPos>> {
        let mut tokens = Vec::new();
        loop {
            let tok = self.next_token()?;
            let done = tok.token == Token::Eof;
            tokens.push(tok);
            if done {
                return Ok(tokens);
            }
        }
    }

    fn syntax_error(&self, message: String) -> AsmError {
        AsmError::Syntax {
            path: self.path.clone(),
            line: self.line,
            col: self.col,
            message,
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        Some(c)
    }

    fn next_token(&mut self) -> Result<TokenWithPos> {
        // Skip whitespace (except newline) and comments
        loop {
            match self.peek() {
                Some(' ') | Some('\t') | Some('\r') => {
                    self.bump();
                }
                Some('#') => {
                    while let Some(c) = self.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.bump();
                    }
                }
                _ => break,
            }
        }

        let (line, col) = (self.line, self.col);
        let at = |token| TokenWithPos { token, line, col };

        let c = match self.peek() {
            None => return Ok(at(Token::Eof)),
            Some(c) => c,
        };

        match c {
            '\n' => {
                self.bump();
                Ok(at(Token::Newline))
            }
            ',' => {
                self.bump();
                Ok(at(Token::Comma))
            }
            ':' => {
                self.bump();
                Ok(at(Token::Colon))
            }
            '(' => {
                self.bump();
                Ok(at(Token::LParen))
            }
            ')' => {
                self.bump();
                Ok(at(Token::RParen))
            }
            '"' => {
                let s = self.read_string()?;
                Ok(at(Token::Str(s)))
            }
            '$' => {
                self.bump();
                let name = self.read_ident_chars();
                if name.is_empty() {
                    return Err(self.syntax_error("expected register name after '$'".into()));
                }
                Ok(at(Token::Register(format!("${}", name.to_lowercase()))))
            }
            '.' => {
                self.bump();
                let name = self.read_ident_chars();
                if name.is_empty() {
                    return Err(self.syntax_error("expected directive name after '.'".into()));
                }
                Ok(at(Token::Directive(format!(".{}", name.to_lowercase()))))
            }
            '-' => {
                self.bump();
                match self.peek() {
                    Some(d) if d.is_ascii_digit() => {
                        let num = self.read_number(line, col)?;
                        Ok(at(Token::Num(-num)))
                    }
                    _ => Err(self.syntax_error("expected digit after '-'".into())),
                }
            }
            _ if c.is_ascii_digit() => {
                let num = self.read_number(line, col)?;
                Ok(at(Token::Num(num)))
            }
            _ if c.is_ascii_alphabetic() || c == '_' => {
                let name = self.read_ident_chars();
                Ok(at(Token::Ident(name)))
            }
            _ => Err(self.syntax_error(format!("illegal character {:?}", c))),
        }
    }

    fn read_ident_chars(&mut self) -> String {
        let mut s = String::new();
        while let Some(c) = self.peek() {
            if c.is_ascii_alphanumeric() || c == '_' {
                s.push(c);
                self.bump();
            } else {
                break;
            }
        }
        s
    }

    fn read_number(&mut self, line: usize, col: usize) -> Result<i64> {
        let mut digits = String::new();
        let radix = if self.peek() == Some('0') {
            self.bump();
            match self.peek() {
                Some('x') | Some('X') => {
                    self.bump();
                    16
                }
                Some('b') | Some('B') => {
                    self.bump();
                    2
                }
                _ => {
                    digits.push('0');
                    10
                }
            }
        } else {
            10
        };

        while let Some(c) = self.peek() {
            if c.is_ascii_alphanumeric() {
                digits.push(c);
                self.bump();
            } else {
                break;
            }
        }
        if digits.is_empty() {
            return Err(AsmError::Syntax {
                path: self.path.clone(),
                line,
                col,
                message: "malformed numeric literal".into(),
            });
        }

        i64::from_str_radix(&digits, radix).map_err(|_| AsmError::Syntax {
            path: self.path.clone(),
            line,
            col,
            message: format!("malformed numeric literal '{}'", digits),
        })
    }

    fn read_string(&mut self) -> Result<String> {
        self.bump(); // opening quote
        let mut s = String::new();
        loop {
            match self.peek() {
                None | Some('\n') => {
                    return Err(self.syntax_error("unterminated string literal".into()));
                }
                Some('"') => {
                    self.bump();
                    return Ok(s);
                }
                Some('\\') => {
                    self.bump();
                    match self.bump() {
                        Some('n') => s.push('\n'),
                        Some('t') => s.push('\t'),
                        Some('\\') => s.push('\\'),
                        Some('"') => s.push('"'),
                        Some(c) => {
                            return Err(
                                self.syntax_error(format!("unknown escape sequence '\\{}'", c))
                            );
                        }
                        None => {
                            return Err(self.syntax_error("unterminated string literal".into()));
                        }
                    }
                }
                Some(c) => {
                    s.push(c);
                    self.bump();
                }
            }
        }
    }
}
