//! Parser for the textual schema language.
//!
//! ```text
//! schema      := { "type" name "=" type-expr { attribute } }
//! type-expr   := primary { ("+" | "<+" | "+>") primary | "-" field-path }
//! primary     := scalar | "enum" "{" name { "," name } "}"
//!              | "list" "<" type-expr ">"
//!              | "map" "<" type-expr "," type-expr ">"
//!              | "record" "{" field { "," field } "}"
//!              | name
//! field       := name ":" type-expr { attribute }
//! attribute   := "#" name [ "=" (name | string) ]
//! ```
//!
//! Names may contain dots, which is how field paths for the `-` operator
//! and schema-qualified type names are written. `//` starts a line
//! comment.

use slate_error::{slate_bail, SlateResult};

use crate::schema::SymbolMap;
use crate::{AlgebraOp, AlgebraOperand, LegacyKind, LegacyType};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Ident(String),
    Str(String),
    Plus,
    PreferLeft,
    PreferRight,
    Minus,
    Equals,
    Colon,
    Comma,
    Hash,
    LAngle,
    RAngle,
    LBrace,
    RBrace,
    Eof,
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Token::Ident(name) => write!(f, "`{name}`"),
            Token::Str(_) => f.write_str("string literal"),
            Token::Plus => f.write_str("`+`"),
            Token::PreferLeft => f.write_str("`<+`"),
            Token::PreferRight => f.write_str("`+>`"),
            Token::Minus => f.write_str("`-`"),
            Token::Equals => f.write_str("`=`"),
            Token::Colon => f.write_str("`:`"),
            Token::Comma => f.write_str("`,`"),
            Token::Hash => f.write_str("`#`"),
            Token::LAngle => f.write_str("`<`"),
            Token::RAngle => f.write_str("`>`"),
            Token::LBrace => f.write_str("`{`"),
            Token::RBrace => f.write_str("`}`"),
            Token::Eof => f.write_str("end of input"),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Position {
    line: usize,
    column: usize,
}

fn lex(input: &str) -> SlateResult<Vec<(Token, Position)>> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();
    let mut line = 1;
    let mut column = 1;
    while let Some(&ch) = chars.peek() {
        let position = Position { line, column };
        let mut advance = |chars: &mut std::iter::Peekable<std::str::Chars<'_>>| {
            let ch = chars.next();
            match ch {
                Some('\n') => {
                    line += 1;
                    column = 1;
                }
                Some(_) => column += 1,
                None => {}
            }
            ch
        };
        match ch {
            ' ' | '\t' | '\r' | '\n' => {
                advance(&mut chars);
            }
            '/' => {
                advance(&mut chars);
                if chars.peek() != Some(&'/') {
                    slate_bail!(
                        Parse: "unexpected character `/` at {}:{}",
                        position.line, position.column
                    );
                }
                while let Some(&ch) = chars.peek() {
                    if ch == '\n' {
                        break;
                    }
                    advance(&mut chars);
                }
            }
            '"' => {
                advance(&mut chars);
                let mut value = String::new();
                loop {
                    match advance(&mut chars) {
                        Some('"') => break,
                        Some('\\') => match advance(&mut chars) {
                            Some(escaped @ ('"' | '\\')) => value.push(escaped),
                            _ => slate_bail!(
                                Parse: "invalid escape in string literal at {}:{}",
                                position.line, position.column
                            ),
                        },
                        Some(ch) => value.push(ch),
                        None => slate_bail!(
                            Parse: "unterminated string literal at {}:{}",
                            position.line, position.column
                        ),
                    }
                }
                tokens.push((Token::Str(value), position));
            }
            '+' => {
                advance(&mut chars);
                if chars.peek() == Some(&'>') {
                    advance(&mut chars);
                    tokens.push((Token::PreferRight, position));
                } else {
                    tokens.push((Token::Plus, position));
                }
            }
            '<' => {
                advance(&mut chars);
                if chars.peek() == Some(&'+') {
                    advance(&mut chars);
                    tokens.push((Token::PreferLeft, position));
                } else {
                    tokens.push((Token::LAngle, position));
                }
            }
            '-' => {
                advance(&mut chars);
                tokens.push((Token::Minus, position));
            }
            '=' => {
                advance(&mut chars);
                tokens.push((Token::Equals, position));
            }
            ':' => {
                advance(&mut chars);
                tokens.push((Token::Colon, position));
            }
            ',' => {
                advance(&mut chars);
                tokens.push((Token::Comma, position));
            }
            '#' => {
                advance(&mut chars);
                tokens.push((Token::Hash, position));
            }
            '>' => {
                advance(&mut chars);
                tokens.push((Token::RAngle, position));
            }
            '{' => {
                advance(&mut chars);
                tokens.push((Token::LBrace, position));
            }
            '}' => {
                advance(&mut chars);
                tokens.push((Token::RBrace, position));
            }
            ch if ch.is_ascii_alphabetic() || ch == '_' => {
                let mut name = String::new();
                while let Some(&ch) = chars.peek() {
                    if ch.is_ascii_alphanumeric() || ch == '_' || ch == '.' {
                        name.push(ch);
                        advance(&mut chars);
                    } else {
                        break;
                    }
                }
                tokens.push((Token::Ident(name), position));
            }
            ch => slate_bail!(
                Parse: "unexpected character `{ch}` at {}:{}",
                position.line, position.column
            ),
        }
    }
    tokens.push((
        Token::Eof,
        Position { line, column },
    ));
    Ok(tokens)
}

struct Parser {
    tokens: Vec<(Token, Position)>,
    position: usize,
}

impl Parser {
    fn current(&self) -> &Token {
        &self.tokens[self.position].0
    }

    fn current_position(&self) -> Position {
        self.tokens[self.position].1
    }

    fn bump(&mut self) -> Token {
        let token = self.tokens[self.position].0.clone();
        if self.position + 1 < self.tokens.len() {
            self.position += 1;
        }
        token
    }

    fn expect(&mut self, expected: &Token) -> SlateResult<()> {
        if self.current() != expected {
            let position = self.current_position();
            slate_bail!(
                Parse: "expected {expected}, found {} at {}:{}",
                self.current(), position.line, position.column
            );
        }
        self.bump();
        Ok(())
    }

    fn ident(&mut self) -> SlateResult<String> {
        match self.bump() {
            Token::Ident(name) => Ok(name),
            token => {
                let position = self.tokens[self.position.saturating_sub(1)].1;
                slate_bail!(
                    Parse: "expected a name, found {token} at {}:{}",
                    position.line, position.column
                )
            }
        }
    }

    fn schema(&mut self) -> SlateResult<SymbolMap> {
        let mut symbols = SymbolMap::default();
        while self.current() != &Token::Eof {
            let position = self.current_position();
            let keyword = self.ident()?;
            if keyword != "type" {
                slate_bail!(
                    Parse: "expected `type`, found `{keyword}` at {}:{}",
                    position.line, position.column
                );
            }
            let name = self.ident()?;
            self.expect(&Token::Equals)?;
            let mut legacy = self.type_expr()?;
            legacy.attributes.extend(self.attributes()?);
            symbols.insert(name, legacy)?;
        }
        Ok(symbols)
    }

    fn type_expr(&mut self) -> SlateResult<LegacyType> {
        let base = self.primary()?;
        let mut operations = Vec::new();
        loop {
            let op = match self.current() {
                Token::Plus => AlgebraOp::Union,
                Token::PreferLeft => AlgebraOp::PreferLeft,
                Token::PreferRight => AlgebraOp::PreferRight,
                Token::Minus => AlgebraOp::Remove,
                _ => break,
            };
            self.bump();
            let operand = if op == AlgebraOp::Remove {
                AlgebraOperand::Path(self.ident()?)
            } else {
                AlgebraOperand::Type(self.primary()?)
            };
            operations.push((op, operand));
        }
        if operations.is_empty() {
            Ok(base)
        } else {
            Ok(LegacyType::from_kind(LegacyKind::Algebra(
                Box::new(base),
                operations,
            )))
        }
    }

    fn primary(&mut self) -> SlateResult<LegacyType> {
        let name = self.ident()?;
        let kind = match name.as_str() {
            "bool" => LegacyKind::Bool,
            "int64" => LegacyKind::Int64,
            "uint64" => LegacyKind::UInt64,
            "double" => LegacyKind::Double,
            "duration" => LegacyKind::Duration,
            "time" => LegacyKind::Time,
            "string" => LegacyKind::String,
            "blob" => LegacyKind::Blob,
            "ip" => LegacyKind::Ip,
            "subnet" => LegacyKind::Subnet,
            "pattern" => LegacyKind::Pattern,
            "enum" => {
                self.expect(&Token::LBrace)?;
                let mut variants = vec![self.ident()?];
                while self.current() == &Token::Comma {
                    self.bump();
                    if self.current() == &Token::RBrace {
                        break;
                    }
                    variants.push(self.ident()?);
                }
                self.expect(&Token::RBrace)?;
                LegacyKind::Enumeration(variants)
            }
            "list" => {
                self.expect(&Token::LAngle)?;
                let element = self.type_expr()?;
                self.expect(&Token::RAngle)?;
                LegacyKind::List(Box::new(element))
            }
            "map" => {
                self.expect(&Token::LAngle)?;
                let key = self.type_expr()?;
                self.expect(&Token::Comma)?;
                let value = self.type_expr()?;
                self.expect(&Token::RAngle)?;
                LegacyKind::Map(Box::new(key), Box::new(value))
            }
            "record" => {
                self.expect(&Token::LBrace)?;
                let mut fields = Vec::new();
                loop {
                    if self.current() == &Token::RBrace {
                        break;
                    }
                    let field_name = self.ident()?;
                    self.expect(&Token::Colon)?;
                    let mut field = self.type_expr()?;
                    field.attributes.extend(self.attributes()?);
                    fields.push((field_name, field));
                    if self.current() == &Token::Comma {
                        self.bump();
                    } else {
                        break;
                    }
                }
                self.expect(&Token::RBrace)?;
                LegacyKind::Record(fields)
            }
            _ => LegacyKind::Reference(name),
        };
        Ok(LegacyType::from_kind(kind))
    }

    fn attributes(&mut self) -> SlateResult<Vec<(String, Option<String>)>> {
        let mut attributes = Vec::new();
        while self.current() == &Token::Hash {
            self.bump();
            let key = self.ident()?;
            let value = if self.current() == &Token::Equals {
                self.bump();
                Some(match self.bump() {
                    Token::Ident(value) | Token::Str(value) => value,
                    token => slate_bail!(Parse: "expected an attribute value, found {token}"),
                })
            } else {
                None
            };
            attributes.push((key, value));
        }
        Ok(attributes)
    }
}

/// Parses schema text into a symbol map of legacy types.
pub fn parse(input: &str) -> SlateResult<SymbolMap> {
    let mut parser = Parser {
        tokens: lex(input)?,
        position: 0,
    };
    parser.schema()
}
