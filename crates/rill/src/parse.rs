//! Lexer and parser for the rill language.
//!
//! `parse_program` turns raw source text plus a source-file id and line offset
//! into an ordered sequence of top-level expressions, each carrying the
//! [`SourcePosition`] of its first token. Positions flow through evaluation so
//! the debugger and fault reporting can map back to the editor's buffers.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A position in a source file known to the remote caller.
///
/// `file_id` is an opaque identifier assigned by the caller (an editor buffer
/// id, a chunk id, ...); `line` is 1-based and already includes the caller's
/// line offset.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourcePosition {
    /// Opaque source-file identifier assigned by the remote caller.
    pub file_id: String,
    /// 1-based line number, offset already applied.
    pub line: u32,
}

impl fmt::Display for SourcePosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file_id, self.line)
    }
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    And,
    Or,
}

impl BinOp {
    pub(crate) fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::And => "&&",
            Self::Or => "||",
        }
    }
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    Neg,
    Not,
}

/// One parsed expression with its source position.
#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub pos: SourcePosition,
}

/// Expression shapes of the rill language.
#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Number(f64),
    Str(String),
    Logical(bool),
    Null,
    Ident(String),
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
    },
    Binary {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Unary {
        op: UnOp,
        operand: Box<Expr>,
    },
    Assign {
        target: String,
        value: Box<Expr>,
    },
    Block(Vec<Expr>),
    If {
        cond: Box<Expr>,
        then_branch: Box<Expr>,
        else_branch: Option<Box<Expr>>,
    },
    While {
        cond: Box<Expr>,
        body: Box<Expr>,
    },
    Function {
        params: Vec<String>,
        body: Box<Expr>,
    },
}

/// Parse failure with the position of the offending token.
///
/// Surfaced to callers before any evaluation happens: a malformed turn aborts
/// without touching interpreter state.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    pub message: String,
    pub position: SourcePosition,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "parse error at {}: {}", self.position, self.message)
    }
}

impl std::error::Error for ParseError {}

/// Parses a batch of top-level expressions.
///
/// `line_offset` shifts all reported line numbers, so code extracted from the
/// middle of a document keeps positions meaningful to the caller.
pub fn parse_program(code: &str, file_id: &str, line_offset: u32) -> Result<Vec<Expr>, ParseError> {
    let tokens = Lexer::new(code, file_id, line_offset).lex()?;
    Parser::new(tokens, file_id, line_offset).parse_program()
}

// =============================================================================
// Lexer
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Num(f64),
    Str(String),
    Ident(String),
    True,
    False,
    Null,
    If,
    Else,
    While,
    Function,
    LParen,
    RParen,
    LBrace,
    RBrace,
    Comma,
    Semi,
    Newline,
    Plus,
    Minus,
    Star,
    Slash,
    Lt,
    Le,
    Gt,
    Ge,
    EqEq,
    Ne,
    Not,
    AndAnd,
    OrOr,
    Arrow,
    Equals,
}

impl Tok {
    fn describe(&self) -> String {
        match self {
            Self::Num(n) => format!("number {n}"),
            Self::Str(_) => "string constant".to_owned(),
            Self::Ident(name) => format!("symbol '{name}'"),
            Self::Newline => "end of line".to_owned(),
            other => format!("'{}'", token_text(other)),
        }
    }
}

fn token_text(tok: &Tok) -> &'static str {
    match tok {
        Tok::True => "TRUE",
        Tok::False => "FALSE",
        Tok::Null => "NULL",
        Tok::If => "if",
        Tok::Else => "else",
        Tok::While => "while",
        Tok::Function => "function",
        Tok::LParen => "(",
        Tok::RParen => ")",
        Tok::LBrace => "{",
        Tok::RBrace => "}",
        Tok::Comma => ",",
        Tok::Semi => ";",
        Tok::Plus => "+",
        Tok::Minus => "-",
        Tok::Star => "*",
        Tok::Slash => "/",
        Tok::Lt => "<",
        Tok::Le => "<=",
        Tok::Gt => ">",
        Tok::Ge => ">=",
        Tok::EqEq => "==",
        Tok::Ne => "!=",
        Tok::Not => "!",
        Tok::AndAnd => "&&",
        Tok::OrOr => "||",
        Tok::Arrow => "<-",
        Tok::Equals => "=",
        Tok::Num(_) | Tok::Str(_) | Tok::Ident(_) | Tok::Newline => "",
    }
}

#[derive(Debug, Clone)]
struct Token {
    tok: Tok,
    line: u32,
}

struct Lexer<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
    file_id: &'a str,
    line: u32,
    paren_depth: u32,
    tokens: Vec<Token>,
}

impl<'a> Lexer<'a> {
    fn new(code: &'a str, file_id: &'a str, line_offset: u32) -> Self {
        Self {
            chars: code.chars().peekable(),
            file_id,
            line: line_offset + 1,
            paren_depth: 0,
            tokens: Vec::new(),
        }
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        ParseError {
            message: message.into(),
            position: SourcePosition {
                file_id: self.file_id.to_owned(),
                line: self.line,
            },
        }
    }

    fn push(&mut self, tok: Tok) {
        self.tokens.push(Token { tok, line: self.line });
    }

    fn lex(mut self) -> Result<Vec<Token>, ParseError> {
        while let Some(&c) = self.chars.peek() {
            match c {
                ' ' | '\t' | '\r' => {
                    self.chars.next();
                }
                '\n' => {
                    self.chars.next();
                    // Newlines terminate statements only outside parentheses,
                    // matching R's continuation rule for open calls.
                    if self.paren_depth == 0 {
                        self.push(Tok::Newline);
                    }
                    self.line += 1;
                }
                '#' => {
                    while let Some(&c) = self.chars.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.chars.next();
                    }
                }
                '"' | '\'' => self.lex_string(c)?,
                '0'..='9' | '.' => self.lex_number()?,
                c if c.is_alphabetic() || c == '_' => self.lex_ident(),
                _ => self.lex_operator(c)?,
            }
        }
        Ok(self.tokens)
    }

    fn lex_string(&mut self, quote: char) -> Result<(), ParseError> {
        self.chars.next();
        let mut text = String::new();
        loop {
            match self.chars.next() {
                None => return Err(self.error("unexpected end of input in string constant")),
                Some(c) if c == quote => break,
                Some('\\') => match self.chars.next() {
                    Some('n') => text.push('\n'),
                    Some('t') => text.push('\t'),
                    Some('\\') => text.push('\\'),
                    Some(c) if c == quote => text.push(c),
                    Some(c) => return Err(self.error(format!("unrecognized escape '\\{c}'"))),
                    None => return Err(self.error("unexpected end of input in string constant")),
                },
                Some('\n') => {
                    self.line += 1;
                    text.push('\n');
                }
                Some(c) => text.push(c),
            }
        }
        self.push(Tok::Str(text));
        Ok(())
    }

    fn lex_number(&mut self) -> Result<(), ParseError> {
        let mut text = String::new();
        while let Some(&c) = self.chars.peek() {
            if c.is_ascii_digit() || c == '.' || c == 'e' || c == 'E' {
                text.push(c);
                self.chars.next();
            } else {
                break;
            }
        }
        match text.parse::<f64>() {
            Ok(n) => {
                self.push(Tok::Num(n));
                Ok(())
            }
            Err(_) => Err(self.error(format!("malformed number '{text}'"))),
        }
    }

    fn lex_ident(&mut self) {
        let mut name = String::new();
        while let Some(&c) = self.chars.peek() {
            // `.` is a regular name character in R (`Sys.time`).
            if c.is_alphanumeric() || c == '_' || c == '.' {
                name.push(c);
                self.chars.next();
            } else {
                break;
            }
        }
        let tok = match name.as_str() {
            "TRUE" => Tok::True,
            "FALSE" => Tok::False,
            "NULL" => Tok::Null,
            "if" => Tok::If,
            "else" => Tok::Else,
            "while" => Tok::While,
            "function" => Tok::Function,
            _ => Tok::Ident(name),
        };
        self.push(tok);
    }

    fn lex_operator(&mut self, c: char) -> Result<(), ParseError> {
        self.chars.next();
        let tok = match c {
            '(' => {
                self.paren_depth += 1;
                Tok::LParen
            }
            ')' => {
                self.paren_depth = self.paren_depth.saturating_sub(1);
                Tok::RParen
            }
            '{' => Tok::LBrace,
            '}' => Tok::RBrace,
            ',' => Tok::Comma,
            ';' => Tok::Semi,
            '+' => Tok::Plus,
            '-' => Tok::Minus,
            '*' => Tok::Star,
            '/' => Tok::Slash,
            '<' => {
                if self.chars.peek() == Some(&'-') {
                    self.chars.next();
                    Tok::Arrow
                } else if self.chars.peek() == Some(&'=') {
                    self.chars.next();
                    Tok::Le
                } else {
                    Tok::Lt
                }
            }
            '>' => {
                if self.chars.peek() == Some(&'=') {
                    self.chars.next();
                    Tok::Ge
                } else {
                    Tok::Gt
                }
            }
            '=' => {
                if self.chars.peek() == Some(&'=') {
                    self.chars.next();
                    Tok::EqEq
                } else {
                    Tok::Equals
                }
            }
            '!' => {
                if self.chars.peek() == Some(&'=') {
                    self.chars.next();
                    Tok::Ne
                } else {
                    Tok::Not
                }
            }
            '&' => {
                if self.chars.peek() == Some(&'&') {
                    self.chars.next();
                }
                Tok::AndAnd
            }
            '|' => {
                if self.chars.peek() == Some(&'|') {
                    self.chars.next();
                }
                Tok::OrOr
            }
            _ => return Err(self.error(format!("unexpected character '{c}'"))),
        };
        self.push(tok);
        Ok(())
    }
}

// =============================================================================
// Parser
// =============================================================================

struct Parser {
    tokens: Vec<Token>,
    index: usize,
    file_id: String,
    last_line: u32,
}

impl Parser {
    fn new(tokens: Vec<Token>, file_id: &str, line_offset: u32) -> Self {
        Self {
            tokens,
            index: 0,
            file_id: file_id.to_owned(),
            last_line: line_offset + 1,
        }
    }

    fn peek(&self) -> Option<&Tok> {
        self.tokens.get(self.index).map(|t| &t.tok)
    }

    fn position(&self) -> SourcePosition {
        let line = self.tokens.get(self.index).map_or(self.last_line, |t| t.line);
        SourcePosition {
            file_id: self.file_id.clone(),
            line,
        }
    }

    fn advance(&mut self) -> Option<Tok> {
        let token = self.tokens.get(self.index).cloned();
        if let Some(token) = token {
            self.last_line = token.line;
            self.index += 1;
            Some(token.tok)
        } else {
            None
        }
    }

    fn error_here(&self, message: impl Into<String>) -> ParseError {
        ParseError {
            message: message.into(),
            position: self.position(),
        }
    }

    fn expect(&mut self, expected: &Tok) -> Result<(), ParseError> {
        match self.peek() {
            Some(tok) if tok == expected => {
                self.advance();
                Ok(())
            }
            Some(tok) => Err(self.error_here(format!(
                "expected '{}' but found {}",
                token_text(expected),
                tok.describe()
            ))),
            None => Err(self.error_here(format!("expected '{}' but found end of input", token_text(expected)))),
        }
    }

    /// Skips newline tokens; used after operators and keywords where a line
    /// break continues the expression.
    fn skip_newlines(&mut self) {
        while self.peek() == Some(&Tok::Newline) {
            self.advance();
        }
    }

    fn skip_separators(&mut self) {
        while matches!(self.peek(), Some(Tok::Newline | Tok::Semi)) {
            self.advance();
        }
    }

    fn parse_program(mut self) -> Result<Vec<Expr>, ParseError> {
        let mut exprs = Vec::new();
        loop {
            self.skip_separators();
            if self.peek().is_none() {
                break;
            }
            exprs.push(self.parse_expr()?);
            match self.peek() {
                None | Some(Tok::Newline | Tok::Semi) => {}
                Some(tok) => return Err(self.error_here(format!("unexpected {}", tok.describe()))),
            }
        }
        Ok(exprs)
    }

    fn parse_expr(&mut self) -> Result<Expr, ParseError> {
        let pos = self.position();
        let lhs = self.parse_or()?;
        if matches!(self.peek(), Some(Tok::Arrow | Tok::Equals)) {
            let ExprKind::Ident(target) = lhs.kind else {
                return Err(self.error_here("invalid assignment target"));
            };
            self.advance();
            self.skip_newlines();
            let value = self.parse_expr()?;
            return Ok(Expr {
                kind: ExprKind::Assign {
                    target,
                    value: Box::new(value),
                },
                pos,
            });
        }
        Ok(lhs)
    }

    fn parse_or(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_and()?;
        while self.peek() == Some(&Tok::OrOr) {
            let pos = lhs.pos.clone();
            self.advance();
            self.skip_newlines();
            let rhs = self.parse_and()?;
            lhs = binary(BinOp::Or, lhs, rhs, pos);
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_comparison()?;
        while self.peek() == Some(&Tok::AndAnd) {
            let pos = lhs.pos.clone();
            self.advance();
            self.skip_newlines();
            let rhs = self.parse_comparison()?;
            lhs = binary(BinOp::And, lhs, rhs, pos);
        }
        Ok(lhs)
    }

    fn parse_comparison(&mut self) -> Result<Expr, ParseError> {
        let lhs = self.parse_additive()?;
        let op = match self.peek() {
            Some(Tok::Lt) => BinOp::Lt,
            Some(Tok::Le) => BinOp::Le,
            Some(Tok::Gt) => BinOp::Gt,
            Some(Tok::Ge) => BinOp::Ge,
            Some(Tok::EqEq) => BinOp::Eq,
            Some(Tok::Ne) => BinOp::Ne,
            _ => return Ok(lhs),
        };
        let pos = lhs.pos.clone();
        self.advance();
        self.skip_newlines();
        let rhs = self.parse_additive()?;
        Ok(binary(op, lhs, rhs, pos))
    }

    fn parse_additive(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                Some(Tok::Plus) => BinOp::Add,
                Some(Tok::Minus) => BinOp::Sub,
                _ => return Ok(lhs),
            };
            let pos = lhs.pos.clone();
            self.advance();
            self.skip_newlines();
            let rhs = self.parse_multiplicative()?;
            lhs = binary(op, lhs, rhs, pos);
        }
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Tok::Star) => BinOp::Mul,
                Some(Tok::Slash) => BinOp::Div,
                _ => return Ok(lhs),
            };
            let pos = lhs.pos.clone();
            self.advance();
            self.skip_newlines();
            let rhs = self.parse_unary()?;
            lhs = binary(op, lhs, rhs, pos);
        }
    }

    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        let pos = self.position();
        let op = match self.peek() {
            Some(Tok::Minus) => UnOp::Neg,
            Some(Tok::Not) => UnOp::Not,
            _ => return self.parse_postfix(),
        };
        self.advance();
        self.skip_newlines();
        let operand = self.parse_unary()?;
        Ok(Expr {
            kind: ExprKind::Unary {
                op,
                operand: Box::new(operand),
            },
            pos,
        })
    }

    fn parse_postfix(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.parse_primary()?;
        while self.peek() == Some(&Tok::LParen) {
            let pos = expr.pos.clone();
            self.advance();
            self.skip_newlines();
            let mut args = Vec::new();
            if self.peek() != Some(&Tok::RParen) {
                loop {
                    args.push(self.parse_expr()?);
                    self.skip_newlines();
                    if self.peek() == Some(&Tok::Comma) {
                        self.advance();
                        self.skip_newlines();
                    } else {
                        break;
                    }
                }
            }
            self.expect(&Tok::RParen)?;
            expr = Expr {
                kind: ExprKind::Call {
                    callee: Box::new(expr),
                    args,
                },
                pos,
            };
        }
        Ok(expr)
    }

    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        let pos = self.position();
        let Some(tok) = self.advance() else {
            return Err(self.error_here("unexpected end of input"));
        };
        let kind = match tok {
            Tok::Num(n) => ExprKind::Number(n),
            Tok::Str(s) => ExprKind::Str(s),
            Tok::True => ExprKind::Logical(true),
            Tok::False => ExprKind::Logical(false),
            Tok::Null => ExprKind::Null,
            Tok::Ident(name) => ExprKind::Ident(name),
            Tok::LParen => {
                self.skip_newlines();
                let inner = self.parse_expr()?;
                self.skip_newlines();
                self.expect(&Tok::RParen)?;
                inner.kind
            }
            Tok::LBrace => {
                let mut body = Vec::new();
                loop {
                    self.skip_separators();
                    if self.peek() == Some(&Tok::RBrace) {
                        self.advance();
                        break;
                    }
                    if self.peek().is_none() {
                        return Err(self.error_here("expected '}' but found end of input"));
                    }
                    body.push(self.parse_expr()?);
                    match self.peek() {
                        Some(Tok::Newline | Tok::Semi | Tok::RBrace) => {}
                        Some(tok) => return Err(self.error_here(format!("unexpected {}", tok.describe()))),
                        None => {}
                    }
                }
                ExprKind::Block(body)
            }
            Tok::If => {
                self.expect(&Tok::LParen)?;
                self.skip_newlines();
                let cond = self.parse_expr()?;
                self.skip_newlines();
                self.expect(&Tok::RParen)?;
                self.skip_newlines();
                let then_branch = self.parse_expr()?;
                let checkpoint = self.index;
                self.skip_newlines();
                let else_branch = if self.peek() == Some(&Tok::Else) {
                    self.advance();
                    self.skip_newlines();
                    Some(Box::new(self.parse_expr()?))
                } else {
                    self.index = checkpoint;
                    None
                };
                ExprKind::If {
                    cond: Box::new(cond),
                    then_branch: Box::new(then_branch),
                    else_branch,
                }
            }
            Tok::While => {
                self.expect(&Tok::LParen)?;
                self.skip_newlines();
                let cond = self.parse_expr()?;
                self.skip_newlines();
                self.expect(&Tok::RParen)?;
                self.skip_newlines();
                let body = self.parse_expr()?;
                ExprKind::While {
                    cond: Box::new(cond),
                    body: Box::new(body),
                }
            }
            Tok::Function => {
                self.expect(&Tok::LParen)?;
                self.skip_newlines();
                let mut params = Vec::new();
                if self.peek() != Some(&Tok::RParen) {
                    loop {
                        match self.advance() {
                            Some(Tok::Ident(name)) => params.push(name),
                            Some(tok) => {
                                return Err(self.error_here(format!("expected parameter name, found {}", tok.describe())));
                            }
                            None => return Err(self.error_here("unexpected end of input in parameter list")),
                        }
                        self.skip_newlines();
                        if self.peek() == Some(&Tok::Comma) {
                            self.advance();
                            self.skip_newlines();
                        } else {
                            break;
                        }
                    }
                }
                self.expect(&Tok::RParen)?;
                self.skip_newlines();
                let body = self.parse_expr()?;
                ExprKind::Function {
                    params,
                    body: Box::new(body),
                }
            }
            other => return Err(self.error_here(format!("unexpected {}", other.describe()))),
        };
        Ok(Expr { kind, pos })
    }
}

fn binary(op: BinOp, lhs: Expr, rhs: Expr, pos: SourcePosition) -> Expr {
    Expr {
        kind: ExprKind::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        },
        pos,
    }
}
