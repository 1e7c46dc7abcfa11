//! Lexer and recursive-descent parser for filter expressions

use std::fmt;

use serde_json::Value;

/// Parsed filter expression tree
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Ast {
    Identity,
    Literal(Value),
    Field(Box<Ast>, String),
    Index(Box<Ast>, Box<Ast>),
    Iterate(Box<Ast>),
    Optional(Box<Ast>),
    Pipe(Box<Ast>, Box<Ast>),
    Comma(Box<Ast>, Box<Ast>),
    Alternative(Box<Ast>, Box<Ast>),
    And(Box<Ast>, Box<Ast>),
    Or(Box<Ast>, Box<Ast>),
    Compare(CmpOp, Box<Ast>, Box<Ast>),
    Add(Box<Ast>, Box<Ast>),
    Sub(Box<Ast>, Box<Ast>),
    Neg(Box<Ast>),
    Collect(Box<Ast>),
    Call(Builtin, Option<Box<Ast>>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

/// Built-in functions, validated at parse time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Builtin {
    Length,
    Type,
    Keys,
    Not,
    Empty,
    Halt,
    HaltError,
    Any,
    All,
    Has,
    Select,
    First,
    Test,
}

impl Builtin {
    /// Map a name to a builtin plus whether it takes an argument
    fn lookup(name: &str) -> Option<(Builtin, bool)> {
        let entry = match name {
            "length" => (Builtin::Length, false),
            "type" => (Builtin::Type, false),
            "keys" => (Builtin::Keys, false),
            "not" => (Builtin::Not, false),
            "empty" => (Builtin::Empty, false),
            "halt" => (Builtin::Halt, false),
            "halt_error" => (Builtin::HaltError, false),
            "any" => (Builtin::Any, false),
            "all" => (Builtin::All, false),
            "has" => (Builtin::Has, true),
            "select" => (Builtin::Select, true),
            "first" => (Builtin::First, true),
            "test" => (Builtin::Test, true),
            _ => return None,
        };
        Some(entry)
    }
}

/// Parse a filter expression into its tree form
pub(crate) fn parse(source: &str) -> Result<Ast, String> {
    let tokens = lex(source)?;
    let mut parser = Parser { tokens, pos: 0 };
    let ast = parser.parse_pipe()?;
    match parser.peek() {
        Token::Eof => Ok(ast),
        tok => Err(format!("unexpected {} after expression", tok)),
    }
}

/// Convert an f64 into a JSON number, preferring integer representation
pub(crate) fn number_value(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < 9e15 {
        Value::from(n as i64)
    } else {
        serde_json::Number::from_f64(n).map(Value::Number).unwrap_or(Value::Null)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Dot,
    LBracket,
    RBracket,
    LParen,
    RParen,
    Pipe,
    Comma,
    Alt,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Plus,
    Minus,
    Question,
    And,
    Or,
    Ident(String),
    Str(String),
    Num(f64),
    Eof,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Dot => write!(f, "'.'"),
            Token::LBracket => write!(f, "'['"),
            Token::RBracket => write!(f, "']'"),
            Token::LParen => write!(f, "'('"),
            Token::RParen => write!(f, "')'"),
            Token::Pipe => write!(f, "'|'"),
            Token::Comma => write!(f, "','"),
            Token::Alt => write!(f, "'//'"),
            Token::Eq => write!(f, "'=='"),
            Token::Ne => write!(f, "'!='"),
            Token::Lt => write!(f, "'<'"),
            Token::Le => write!(f, "'<='"),
            Token::Gt => write!(f, "'>'"),
            Token::Ge => write!(f, "'>='"),
            Token::Plus => write!(f, "'+'"),
            Token::Minus => write!(f, "'-'"),
            Token::Question => write!(f, "'?'"),
            Token::And => write!(f, "'and'"),
            Token::Or => write!(f, "'or'"),
            Token::Ident(name) => write!(f, "'{}'", name),
            Token::Str(s) => write!(f, "string \"{}\"", s),
            Token::Num(n) => write!(f, "number {}", n),
            Token::Eof => write!(f, "end of expression"),
        }
    }
}

fn lex(source: &str) -> Result<Vec<Token>, String> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut pos = 0;

    while pos < chars.len() {
        let c = chars[pos];
        match c {
            ' ' | '\t' | '\n' | '\r' => pos += 1,
            '.' => {
                tokens.push(Token::Dot);
                pos += 1;
            }
            '[' => {
                tokens.push(Token::LBracket);
                pos += 1;
            }
            ']' => {
                tokens.push(Token::RBracket);
                pos += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                pos += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                pos += 1;
            }
            '|' => {
                tokens.push(Token::Pipe);
                pos += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                pos += 1;
            }
            '+' => {
                tokens.push(Token::Plus);
                pos += 1;
            }
            '-' => {
                tokens.push(Token::Minus);
                pos += 1;
            }
            '?' => {
                tokens.push(Token::Question);
                pos += 1;
            }
            '/' => {
                if chars.get(pos + 1) == Some(&'/') {
                    tokens.push(Token::Alt);
                    pos += 2;
                } else {
                    return Err("unexpected '/' (division is not supported)".to_string());
                }
            }
            '=' => {
                if chars.get(pos + 1) == Some(&'=') {
                    tokens.push(Token::Eq);
                    pos += 2;
                } else {
                    return Err("unexpected '=' (did you mean '=='?)".to_string());
                }
            }
            '!' => {
                if chars.get(pos + 1) == Some(&'=') {
                    tokens.push(Token::Ne);
                    pos += 2;
                } else {
                    return Err("unexpected '!' (did you mean '!='?)".to_string());
                }
            }
            '<' => {
                if chars.get(pos + 1) == Some(&'=') {
                    tokens.push(Token::Le);
                    pos += 2;
                } else {
                    tokens.push(Token::Lt);
                    pos += 1;
                }
            }
            '>' => {
                if chars.get(pos + 1) == Some(&'=') {
                    tokens.push(Token::Ge);
                    pos += 2;
                } else {
                    tokens.push(Token::Gt);
                    pos += 1;
                }
            }
            '"' => {
                let (s, next) = lex_string(&chars, pos + 1)?;
                tokens.push(Token::Str(s));
                pos = next;
            }
            '0'..='9' => {
                let (n, next) = lex_number(&chars, pos)?;
                tokens.push(Token::Num(n));
                pos = next;
            }
            'a'..='z' | 'A'..='Z' | '_' => {
                let start = pos;
                while pos < chars.len() && (chars[pos].is_ascii_alphanumeric() || chars[pos] == '_') {
                    pos += 1;
                }
                let word: String = chars[start..pos].iter().collect();
                match word.as_str() {
                    "and" => tokens.push(Token::And),
                    "or" => tokens.push(Token::Or),
                    _ => tokens.push(Token::Ident(word)),
                }
            }
            _ => return Err(format!("unexpected character '{}'", c)),
        }
    }

    tokens.push(Token::Eof);
    Ok(tokens)
}

fn lex_string(chars: &[char], mut pos: usize) -> Result<(String, usize), String> {
    let mut out = String::new();
    while pos < chars.len() {
        match chars[pos] {
            '"' => return Ok((out, pos + 1)),
            '\\' => {
                pos += 1;
                let escape = chars.get(pos).ok_or("unterminated string")?;
                match escape {
                    '"' => out.push('"'),
                    '\\' => out.push('\\'),
                    '/' => out.push('/'),
                    'n' => out.push('\n'),
                    't' => out.push('\t'),
                    'r' => out.push('\r'),
                    'b' => out.push('\u{8}'),
                    'f' => out.push('\u{c}'),
                    'u' => {
                        if pos + 4 >= chars.len() {
                            return Err("truncated \\u escape".to_string());
                        }
                        let hex: String = chars[pos + 1..pos + 5].iter().collect();
                        let code = u32::from_str_radix(&hex, 16)
                            .map_err(|_| format!("invalid \\u escape '{}'", hex))?;
                        let decoded =
                            char::from_u32(code).ok_or_else(|| format!("invalid \\u escape '{}'", hex))?;
                        out.push(decoded);
                        pos += 4;
                    }
                    other => return Err(format!("invalid escape '\\{}'", other)),
                }
                pos += 1;
            }
            c => {
                out.push(c);
                pos += 1;
            }
        }
    }
    Err("unterminated string".to_string())
}

fn lex_number(chars: &[char], mut pos: usize) -> Result<(f64, usize), String> {
    let start = pos;
    while pos < chars.len() && chars[pos].is_ascii_digit() {
        pos += 1;
    }
    if pos < chars.len() && chars[pos] == '.' && chars.get(pos + 1).is_some_and(|c| c.is_ascii_digit()) {
        pos += 1;
        while pos < chars.len() && chars[pos].is_ascii_digit() {
            pos += 1;
        }
    }
    if pos < chars.len() && (chars[pos] == 'e' || chars[pos] == 'E') {
        let mut exp = pos + 1;
        if exp < chars.len() && (chars[exp] == '+' || chars[exp] == '-') {
            exp += 1;
        }
        if exp < chars.len() && chars[exp].is_ascii_digit() {
            pos = exp;
            while pos < chars.len() && chars[pos].is_ascii_digit() {
                pos += 1;
            }
        }
    }
    let text: String = chars[start..pos].iter().collect();
    let n: f64 = text.parse().map_err(|_| format!("invalid number '{}'", text))?;
    Ok((n, pos))
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> &Token {
        self.tokens.get(self.pos).unwrap_or(&Token::Eof)
    }

    fn advance(&mut self) -> Token {
        let tok = self.tokens.get(self.pos).cloned().unwrap_or(Token::Eof);
        self.pos += 1;
        tok
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek() == expected {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: Token) -> Result<(), String> {
        let tok = self.advance();
        if tok == expected {
            Ok(())
        } else {
            Err(format!("expected {} but found {}", expected, tok))
        }
    }

    fn parse_pipe(&mut self) -> Result<Ast, String> {
        let mut lhs = self.parse_comma()?;
        while self.eat(&Token::Pipe) {
            let rhs = self.parse_comma()?;
            lhs = Ast::Pipe(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_comma(&mut self) -> Result<Ast, String> {
        let mut lhs = self.parse_alternative()?;
        while self.eat(&Token::Comma) {
            let rhs = self.parse_alternative()?;
            lhs = Ast::Comma(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_alternative(&mut self) -> Result<Ast, String> {
        let mut lhs = self.parse_or()?;
        while self.eat(&Token::Alt) {
            let rhs = self.parse_or()?;
            lhs = Ast::Alternative(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_or(&mut self) -> Result<Ast, String> {
        let mut lhs = self.parse_and()?;
        while self.eat(&Token::Or) {
            let rhs = self.parse_and()?;
            lhs = Ast::Or(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Ast, String> {
        let mut lhs = self.parse_compare()?;
        while self.eat(&Token::And) {
            let rhs = self.parse_compare()?;
            lhs = Ast::And(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_compare(&mut self) -> Result<Ast, String> {
        let lhs = self.parse_sum()?;
        let op = match self.peek() {
            Token::Eq => CmpOp::Eq,
            Token::Ne => CmpOp::Ne,
            Token::Lt => CmpOp::Lt,
            Token::Le => CmpOp::Le,
            Token::Gt => CmpOp::Gt,
            Token::Ge => CmpOp::Ge,
            _ => return Ok(lhs),
        };
        self.pos += 1;
        let rhs = self.parse_sum()?;
        Ok(Ast::Compare(op, Box::new(lhs), Box::new(rhs)))
    }

    fn parse_sum(&mut self) -> Result<Ast, String> {
        let mut lhs = self.parse_unary()?;
        loop {
            if self.eat(&Token::Plus) {
                let rhs = self.parse_unary()?;
                lhs = Ast::Add(Box::new(lhs), Box::new(rhs));
            } else if self.eat(&Token::Minus) {
                let rhs = self.parse_unary()?;
                lhs = Ast::Sub(Box::new(lhs), Box::new(rhs));
            } else {
                return Ok(lhs);
            }
        }
    }

    fn parse_unary(&mut self) -> Result<Ast, String> {
        if self.eat(&Token::Minus) {
            let inner = self.parse_postfix()?;
            Ok(Ast::Neg(Box::new(inner)))
        } else {
            self.parse_postfix()
        }
    }

    fn parse_postfix(&mut self) -> Result<Ast, String> {
        let mut expr = self.parse_primary()?;
        loop {
            match self.peek() {
                Token::Dot => {
                    self.pos += 1;
                    match self.advance() {
                        Token::Ident(name) => expr = Ast::Field(Box::new(expr), name),
                        Token::Str(name) => expr = Ast::Field(Box::new(expr), name),
                        tok => return Err(format!("expected field name after '.' but found {}", tok)),
                    }
                }
                Token::LBracket => {
                    self.pos += 1;
                    if self.eat(&Token::RBracket) {
                        expr = Ast::Iterate(Box::new(expr));
                    } else {
                        let idx = self.parse_pipe()?;
                        self.expect(Token::RBracket)?;
                        expr = Ast::Index(Box::new(expr), Box::new(idx));
                    }
                }
                Token::Question => {
                    self.pos += 1;
                    expr = Ast::Optional(Box::new(expr));
                }
                _ => return Ok(expr),
            }
        }
    }

    fn parse_primary(&mut self) -> Result<Ast, String> {
        match self.advance() {
            Token::Dot => match self.peek().clone() {
                Token::Ident(name) => {
                    self.pos += 1;
                    Ok(Ast::Field(Box::new(Ast::Identity), name))
                }
                Token::Str(name) => {
                    self.pos += 1;
                    Ok(Ast::Field(Box::new(Ast::Identity), name))
                }
                Token::LBracket => {
                    self.pos += 1;
                    if self.eat(&Token::RBracket) {
                        Ok(Ast::Iterate(Box::new(Ast::Identity)))
                    } else {
                        let idx = self.parse_pipe()?;
                        self.expect(Token::RBracket)?;
                        Ok(Ast::Index(Box::new(Ast::Identity), Box::new(idx)))
                    }
                }
                _ => Ok(Ast::Identity),
            },
            Token::LParen => {
                let inner = self.parse_pipe()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Token::LBracket => {
                if self.eat(&Token::RBracket) {
                    Ok(Ast::Literal(Value::Array(Vec::new())))
                } else {
                    let inner = self.parse_pipe()?;
                    self.expect(Token::RBracket)?;
                    Ok(Ast::Collect(Box::new(inner)))
                }
            }
            Token::Num(n) => Ok(Ast::Literal(number_value(n))),
            Token::Str(s) => Ok(Ast::Literal(Value::String(s))),
            Token::Ident(name) => match name.as_str() {
                "true" => Ok(Ast::Literal(Value::Bool(true))),
                "false" => Ok(Ast::Literal(Value::Bool(false))),
                "null" => Ok(Ast::Literal(Value::Null)),
                _ => self.parse_call(&name),
            },
            tok => Err(format!("unexpected {}", tok)),
        }
    }

    fn parse_call(&mut self, name: &str) -> Result<Ast, String> {
        let (builtin, takes_arg) =
            Builtin::lookup(name).ok_or_else(|| format!("unknown function '{}'", name))?;
        if self.eat(&Token::LParen) {
            if !takes_arg {
                return Err(format!("function '{}' takes no argument", name));
            }
            let arg = self.parse_pipe()?;
            self.expect(Token::RParen)?;
            Ok(Ast::Call(builtin, Some(Box::new(arg))))
        } else {
            if takes_arg {
                return Err(format!("function '{}' requires an argument", name));
            }
            Ok(Ast::Call(builtin, None))
        }
    }
}
