//! Parser for LASM assembly source.
//!
//! Turns the token stream into a flat list of statements. The parser
//! does not know which mnemonics or directives exist, nor how many
//! operands each expects; that is checked by the assembler. It only
//! enforces the line shape:
//!
//! ```text
//! line ::= [ident ':'] [directive args | ident args] newline
//! args ::= arg (',' arg)*
//! arg  ::= register | number | string | ident | (number | ident) '(' register ')'
//! ```

use crate::error::{AsmError, Result};
use crate::lexer::{Token, TokenWithPos};
use luz_isa::parse_register;

/// A parsed instruction or directive operand. Register names are
/// resolved to numbers here; everything else stays symbolic.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Reg(u8),
    Num(i64),
    /// Label or defined-constant reference (case preserved).
    Ident(String),
    Str(String),
    /// Memory addressing form `offset(reg)`.
    Mem { base: u8, offset: MemOffset },
}

#[derive(Debug, Clone, PartialEq)]
pub enum MemOffset {
    Num(i64),
    Name(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum StmtBody {
    /// Directive with its arguments, e.g. `.word 1, 2, 3`.
    Directive { name: String, args: Vec<Operand> },
    /// Instruction; the mnemonic is lower-cased.
    Instruction { mnemonic: String, args: Vec<Operand> },
}

/// One source statement: an optional label binding plus an optional
/// directive or instruction. A bare `name:` line has `body == None`.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub label: Option<String>,
    pub body: Option<StmtBody>,
    pub line: usize,
    pub col: usize,
}

pub struct Parser {
    tokens: Vec<TokenWithPos>,
    pos: usize,
    path: String,
}

impl Parser {
    pub fn new(tokens: Vec<TokenWithPos>, path: &str) -> Self {
        Self {
            tokens,
            pos: 0,
            path: path.to_string(),
        }
    }

    /// Parse the token stream into statements, skipping blank lines.
    pub fn parse(&mut self) -> Result<Vec<Statement>> {
        let mut stmts = Vec::new();
        loop {
            match self.current().token {
                Token::Newline => {
                    self.advance();
                }
                Token::Eof => return Ok(stmts),
                _ => stmts.push(self.parse_statement()?),
            }
        }
    }

    fn current(&self) -> &TokenWithPos {
        // The lexer guarantees a trailing Eof token.
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn advance(&mut self) {
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
    }

    fn error_at(&self, tok: &TokenWithPos, message: String) -> AsmError {
        AsmError::Syntax {
            path: self.path.clone(),
            line: tok.line,
            col: tok.col,
            message,
        }
    }

    fn error_here(&self, message: String) -> AsmError {
        self.error_at(self.current(), message)
    }

    fn parse_statement(&mut self) -> Result<Statement> {
        let start = self.current().clone();
        let mut label = None;

        // Label prefix: identifier directly followed by ':'
        if let Token::Ident(name) = &start.token {
            if self.tokens.get(self.pos + 1).map(|t| &t.token) == Some(&Token::Colon) {
                label = Some(name.clone());
                self.advance();
                self.advance();
            }
        }

        let body = match self.current().token.clone() {
            Token::Newline | Token::Eof => {
                if label.is_none() {
                    return Err(self.error_here("expected a statement".into()));
                }
                None
            }
            Token::Directive(name) => {
                self.advance();
                let args = self.parse_args()?;
                Some(StmtBody::Directive { name, args })
            }
            Token::Ident(name) => {
                self.advance();
                let args = self.parse_args()?;
                Some(StmtBody::Instruction {
                    mnemonic: name.to_lowercase(),
                    args,
                })
            }
            _ => {
                return Err(self.error_here("expected an instruction or directive".into()));
            }
        };

        // Every statement ends at a line boundary
        match self.current().token {
            Token::Newline => self.advance(),
            Token::Eof => {}
            _ => {
                return Err(self.error_here("unexpected token at end of statement".into()));
            }
        }

        Ok(Statement {
            label,
            body,
            line: start.line,
            col: start.col,
        })
    }

    fn parse_args(&mut self) -> Result<Vec<Operand>> {
        let mut args = Vec::new();
        if matches!(self.current().token, Token::Newline | Token::Eof) {
            return Ok(args);
        }
        loop {
            args.push(self.parse_arg()?);
            if self.current().token == Token::Comma {
                self.advance();
            } else {
                return Ok(args);
            }
        }
    }

    fn parse_arg(&mut self) -> Result<Operand> {
        let tok = self.current().clone();
        match tok.token {
            Token::Register(ref name) => {
                let num = parse_register(name)
                    .ok_or_else(|| self.error_at(&tok, format!("invalid register '{}'", name)))?;
                self.advance();
                Ok(Operand::Reg(num))
            }
            Token::Num(n) => {
                self.advance();
                if self.current().token == Token::LParen {
                    let base = self.parse_mem_base()?;
                    Ok(Operand::Mem {
                        base,
                        offset: MemOffset::Num(n),
                    })
                } else {
                    Ok(Operand::Num(n))
                }
            }
            Token::Ident(ref name) => {
                self.advance();
                if self.current().token == Token::LParen {
                    let base = self.parse_mem_base()?;
                    Ok(Operand::Mem {
                        base,
                        offset: MemOffset::Name(name.clone()),
                    })
                } else {
                    Ok(Operand::Ident(name.clone()))
                }
            }
            Token::Str(ref s) => {
                self.advance();
                Ok(Operand::Str(s.clone()))
            }
            _ => Err(self.error_at(&tok, "expected an operand".into())),
        }
    }

    /// Parse the `(reg)` tail of a memory operand; the opening paren is
    /// the current token.
    fn parse_mem_base(&mut self) -> Result<u8> {
        self.advance(); // '('
        let tok = self.current().clone();
        let base = match tok.token {
            Token::Register(ref name) => parse_register(name)
                .ok_or_else(|| self.error_at(&tok, format!("invalid register '{}'", name)))?,
            _ => return Err(self.error_at(&tok, "expected a register inside parentheses".into())),
        };
        self.advance();
        if self.current().token != Token::RParen {
            return Err(self.error_here("expected ')'".into()));
        }
        self.advance();
        Ok(base)
    }
}
