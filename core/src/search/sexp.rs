/*
 * sexp.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * This file is part of Schedario, a mail and contact backend library.
 *
 * Schedario is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Schedario is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Schedario.  If not, see <http://www.gnu.org/licenses/>.
 */

//! Parser for the s-expression query language. Function names are folded to
//! lower case; stray trailing parentheses are tolerated, as the expressions
//! written by mail clients are not always well balanced.

use crate::error::{Result, StoreError};

/// A parsed search expression node.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Bool(bool),
    Int(i64),
    Str(String),
    Call(String, Vec<Expr>),
}

impl Expr {
    /// The call name when this node is a call.
    pub fn call_name(&self) -> Option<&str> {
        match self {
            Expr::Call(name, _) => Some(name.as_str()),
            _ => None,
        }
    }

    pub fn call_args(&self) -> &[Expr] {
        match self {
            Expr::Call(_, args) => args,
            _ => &[],
        }
    }
}

/// Parse one expression; surplus closing parentheses after it are ignored.
pub fn parse(input: &str) -> Result<Expr> {
    let mut parser = Parser { input: input.as_bytes(), pos: 0 };
    parser.skip_ws();
    let expr = parser.parse_expr()?;
    parser.skip_ws();
    while parser.peek() == Some(b')') {
        parser.pos += 1;
        parser.skip_ws();
    }
    if parser.pos != parser.input.len() {
        return Err(StoreError::parse(format!(
            "unexpected trailing input at offset {}",
            parser.pos
        )));
    }
    Ok(expr)
}

struct Parser<'a> {
    input: &'a [u8],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(b' ' | b'\t' | b'\r' | b'\n')) {
            self.pos += 1;
        }
    }

    fn parse_expr(&mut self) -> Result<Expr> {
        self.skip_ws();
        match self.peek() {
            Some(b'(') => self.parse_call(),
            Some(b'"') => self.parse_string().map(Expr::Str),
            Some(b'#') => self.parse_bool(),
            Some(c) if c == b'-' || c.is_ascii_digit() => self.parse_int(),
            Some(c) => Err(StoreError::parse(format!(
                "unexpected character '{}' at offset {}",
                c as char, self.pos
            ))),
            None => Err(StoreError::parse("unexpected end of expression")),
        }
    }

    fn parse_call(&mut self) -> Result<Expr> {
        self.pos += 1; // consume '('
        self.skip_ws();
        let name = self.parse_symbol()?;
        let mut args = Vec::new();
        loop {
            self.skip_ws();
            match self.peek() {
                Some(b')') => {
                    self.pos += 1;
                    return Ok(Expr::Call(name, args));
                }
                Some(_) => args.push(self.parse_expr()?),
                None => return Err(StoreError::parse("missing closing parenthesis")),
            }
        }
    }

    fn parse_symbol(&mut self) -> Result<String> {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c.is_ascii_alphanumeric() || matches!(c, b'-' | b'_' | b'+' | b'=' | b'<' | b'>') {
                self.pos += 1;
            } else {
                break;
            }
        }
        if self.pos == start {
            return Err(StoreError::parse(format!(
                "expected function name at offset {}",
                start
            )));
        }
        let raw = std::str::from_utf8(&self.input[start..self.pos])
            .map_err(|_| StoreError::parse("function name is not UTF-8"))?;
        Ok(raw.to_lowercase())
    }

    fn parse_string(&mut self) -> Result<String> {
        self.pos += 1; // consume '"'
        let mut out = Vec::new();
        loop {
            match self.peek() {
                Some(b'"') => {
                    self.pos += 1;
                    break;
                }
                Some(b'\\') => {
                    self.pos += 1;
                    match self.peek() {
                        Some(c) => {
                            out.push(c);
                            self.pos += 1;
                        }
                        None => return Err(StoreError::parse("unterminated escape")),
                    }
                }
                Some(c) => {
                    out.push(c);
                    self.pos += 1;
                }
                None => return Err(StoreError::parse("unterminated string")),
            }
        }
        String::from_utf8(out).map_err(|_| StoreError::parse("string is not UTF-8"))
    }

    fn parse_bool(&mut self) -> Result<Expr> {
        self.pos += 1; // consume '#'
        let value = match self.peek() {
            Some(b't') | Some(b'T') => true,
            Some(b'f') | Some(b'F') => false,
            _ => return Err(StoreError::parse("expected #t or #f")),
        };
        self.pos += 1;
        Ok(Expr::Bool(value))
    }

    fn parse_int(&mut self) -> Result<Expr> {
        let start = self.pos;
        if self.peek() == Some(b'-') {
            self.pos += 1;
        }
        while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
            self.pos += 1;
        }
        let text = std::str::from_utf8(&self.input[start..self.pos]).unwrap_or("");
        text.parse::<i64>()
            .map(Expr::Int)
            .map_err(|_| StoreError::parse(format!("invalid integer '{}'", text)))
    }
}
