// Expression interpreter for function snippets
// A small dynamically-typed language over the context slots: dot navigation,
// regex match, short-circuit booleans, ternary, comparisons and literals

use serde_json::Value;

use crate::error::{CoreError, Result};
use crate::snippet::context::SnippetContext;

/// Evaluate an expression (or `return`-statement list) against a context
///
/// Identifiers resolve to context slots; an absent slot is the undefined
/// value, and member access through it propagates undefined. The result may
/// be `Null`; callers decide whether that is an error.
pub fn evaluate(source: &str, ctx: &SnippetContext) -> Result<Value> {
    let tokens = Lexer::new(source).tokenize()?;
    let mut parser = Parser {
        source,
        tokens,
        pos: 0,
        ctx,
    };

    let has_return = parser.tokens.iter().any(|t| matches!(t, Token::Return));
    let value = if has_return {
        parser.eval_statements()?
    } else {
        let value = parser.eval_expr()?;
        parser.expect_end()?;
        value
    };
    Ok(value)
}

/// JavaScript-style truthiness over JSON values
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Render a value the way it appears inside a resolved snippet
pub fn stringify(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                i.to_string()
            } else if let Some(f) = n.as_f64() {
                if f.fract() == 0.0 && f.abs() < 1e15 {
                    format!("{}", f as i64)
                } else {
                    format!("{}", f)
                }
            } else {
                n.to_string()
            }
        }
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn to_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

fn number(f: f64) -> Value {
    serde_json::Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null)
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Number(f64),
    Str(String),
    Regex { pattern: String, flags: String },
    Return,
    True,
    False,
    Null,
    LParen,
    RParen,
    Dot,
    Question,
    Colon,
    Not,
    AndAnd,
    OrOr,
    StrictEq,
    StrictNe,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Plus,
    Minus,
    Star,
    Slash,
    Semi,
    Comma,
}

struct Lexer<'a> {
    chars: Vec<char>,
    pos: usize,
    source: &'a str,
}

impl<'a> Lexer<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            chars: source.chars().collect(),
            pos: 0,
            source,
        }
    }

    fn error(&self, message: &str) -> CoreError {
        CoreError::SnippetEvalError(format!("{} in '{}'", message, self.source))
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek();
        if c.is_some() {
            self.pos += 1;
        }
        c
    }

    fn eat(&mut self, c: char) -> bool {
        if self.peek() == Some(c) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn tokenize(mut self) -> Result<Vec<Token>> {
        let mut tokens: Vec<Token> = Vec::new();

        while let Some(c) = self.peek() {
            if c.is_whitespace() {
                self.pos += 1;
                continue;
            }

            let token = match c {
                '(' => {
                    self.pos += 1;
                    Token::LParen
                }
                ')' => {
                    self.pos += 1;
                    Token::RParen
                }
                '.' => {
                    self.pos += 1;
                    Token::Dot
                }
                '?' => {
                    self.pos += 1;
                    Token::Question
                }
                ':' => {
                    self.pos += 1;
                    Token::Colon
                }
                ';' => {
                    self.pos += 1;
                    Token::Semi
                }
                ',' => {
                    self.pos += 1;
                    Token::Comma
                }
                '+' => {
                    self.pos += 1;
                    Token::Plus
                }
                '-' => {
                    self.pos += 1;
                    Token::Minus
                }
                '*' => {
                    self.pos += 1;
                    Token::Star
                }
                '&' => {
                    self.pos += 1;
                    if !self.eat('&') {
                        return Err(self.error("expected '&&'"));
                    }
                    Token::AndAnd
                }
                '|' => {
                    self.pos += 1;
                    if !self.eat('|') {
                        return Err(self.error("expected '||'"));
                    }
                    Token::OrOr
                }
                '=' => {
                    self.pos += 1;
                    if !self.eat('=') {
                        return Err(self.error("assignment is not supported"));
                    }
                    if self.eat('=') {
                        Token::StrictEq
                    } else {
                        Token::Eq
                    }
                }
                '!' => {
                    self.pos += 1;
                    if self.eat('=') {
                        if self.eat('=') {
                            Token::StrictNe
                        } else {
                            Token::Ne
                        }
                    } else {
                        Token::Not
                    }
                }
                '<' => {
                    self.pos += 1;
                    if self.eat('=') {
                        Token::Le
                    } else {
                        Token::Lt
                    }
                }
                '>' => {
                    self.pos += 1;
                    if self.eat('=') {
                        Token::Ge
                    } else {
                        Token::Gt
                    }
                }
                '\'' | '"' => self.string(c)?,
                '/' => {
                    // A slash is a regex literal except right after a value
                    let after_value = matches!(
                        tokens.last(),
                        Some(Token::Ident(_))
                            | Some(Token::Number(_))
                            | Some(Token::Str(_))
                            | Some(Token::RParen)
                    );
                    if after_value {
                        self.pos += 1;
                        Token::Slash
                    } else {
                        self.regex()?
                    }
                }
                c if c.is_ascii_digit() => self.number()?,
                c if c.is_alphabetic() || c == '_' || c == '$' => self.ident(),
                other => return Err(self.error(&format!("unexpected character '{}'", other))),
            };

            tokens.push(token);
        }

        Ok(tokens)
    }

    fn string(&mut self, quote: char) -> Result<Token> {
        self.pos += 1;
        let mut out = String::new();
        loop {
            match self.bump() {
                Some('\\') => match self.bump() {
                    Some(c) => out.push(c),
                    None => return Err(self.error("unterminated string")),
                },
                Some(c) if c == quote => return Ok(Token::Str(out)),
                Some(c) => out.push(c),
                None => return Err(self.error("unterminated string")),
            }
        }
    }

    fn regex(&mut self) -> Result<Token> {
        self.pos += 1;
        let mut pattern = String::new();
        loop {
            match self.bump() {
                Some('\\') => match self.bump() {
                    Some(c) => {
                        pattern.push('\\');
                        pattern.push(c);
                    }
                    None => return Err(self.error("unterminated regex")),
                },
                Some('/') => break,
                Some(c) => pattern.push(c),
                None => return Err(self.error("unterminated regex")),
            }
        }

        let mut flags = String::new();
        while let Some(c) = self.peek() {
            if c.is_ascii_alphabetic() {
                flags.push(c);
                self.pos += 1;
            } else {
                break;
            }
        }

        Ok(Token::Regex { pattern, flags })
    }

    fn number(&mut self) -> Result<Token> {
        let start = self.pos;
        while self.peek().map(|c| c.is_ascii_digit()).unwrap_or(false) {
            self.pos += 1;
        }
        if self.peek() == Some('.')
            && self
                .chars
                .get(self.pos + 1)
                .map(|c| c.is_ascii_digit())
                .unwrap_or(false)
        {
            self.pos += 1;
            while self.peek().map(|c| c.is_ascii_digit()).unwrap_or(false) {
                self.pos += 1;
            }
        }
        let text: String = self.chars[start..self.pos].iter().collect();
        text.parse()
            .map(Token::Number)
            .map_err(|_| self.error(&format!("invalid number '{}'", text)))
    }

    fn ident(&mut self) -> Token {
        let start = self.pos;
        while self
            .peek()
            .map(|c| c.is_alphanumeric() || c == '_' || c == '$')
            .unwrap_or(false)
        {
            self.pos += 1;
        }
        let text: String = self.chars[start..self.pos].iter().collect();
        match text.as_str() {
            "return" => Token::Return,
            "true" => Token::True,
            "false" => Token::False,
            "null" | "undefined" => Token::Null,
            _ => Token::Ident(text),
        }
    }
}

struct Parser<'a> {
    source: &'a str,
    tokens: Vec<Token>,
    pos: usize,
    ctx: &'a SnippetContext,
}

impl<'a> Parser<'a> {
    fn error(&self, message: &str) -> CoreError {
        CoreError::SnippetEvalError(format!("{} in '{}'", message, self.source))
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn bump(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: Token) -> Result<()> {
        if self.eat(&token) {
            Ok(())
        } else {
            Err(self.error(&format!("expected {:?}", token)))
        }
    }

    fn expect_end(&self) -> Result<()> {
        if self.pos == self.tokens.len() {
            Ok(())
        } else {
            Err(self.error("trailing tokens after expression"))
        }
    }

    /// Statement list: the first executed `return` yields the result
    ///
    /// The language has no side effects, so statements before the `return`
    /// are evaluated and discarded.
    fn eval_statements(&mut self) -> Result<Value> {
        loop {
            if self.eat(&Token::Return) {
                let value = self.eval_expr()?;
                return Ok(value);
            }

            self.eval_expr()?;
            if !self.eat(&Token::Semi) {
                break;
            }
            if self.peek().is_none() {
                break;
            }
        }
        Ok(Value::Null)
    }

    fn eval_expr(&mut self) -> Result<Value> {
        self.eval_ternary()
    }

    fn eval_ternary(&mut self) -> Result<Value> {
        let cond = self.eval_or()?;
        if !self.eat(&Token::Question) {
            return Ok(cond);
        }

        // Both branches are parsed; only the taken one decides the value.
        let then = self.eval_expr()?;
        self.expect(Token::Colon)?;
        let other = self.eval_expr()?;
        Ok(if truthy(&cond) { then } else { other })
    }

    fn eval_or(&mut self) -> Result<Value> {
        let mut value = self.eval_and()?;
        while self.eat(&Token::OrOr) {
            let rhs = self.eval_and()?;
            if !truthy(&value) {
                value = rhs;
            }
        }
        Ok(value)
    }

    fn eval_and(&mut self) -> Result<Value> {
        let mut value = self.eval_equality()?;
        while self.eat(&Token::AndAnd) {
            let rhs = self.eval_equality()?;
            if truthy(&value) {
                value = rhs;
            }
        }
        Ok(value)
    }

    fn eval_equality(&mut self) -> Result<Value> {
        let mut value = self.eval_relational()?;
        loop {
            let strict = match self.peek() {
                Some(Token::StrictEq) | Some(Token::StrictNe) => true,
                Some(Token::Eq) | Some(Token::Ne) => false,
                _ => break,
            };
            let negated = matches!(self.peek(), Some(Token::StrictNe) | Some(Token::Ne));
            self.pos += 1;
            let rhs = self.eval_relational()?;
            let equal = values_equal(&value, &rhs, strict);
            value = Value::Bool(equal != negated);
        }
        Ok(value)
    }

    fn eval_relational(&mut self) -> Result<Value> {
        let mut value = self.eval_additive()?;
        loop {
            let op = match self.peek() {
                Some(Token::Lt) => Token::Lt,
                Some(Token::Le) => Token::Le,
                Some(Token::Gt) => Token::Gt,
                Some(Token::Ge) => Token::Ge,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.eval_additive()?;
            value = Value::Bool(compare(&value, &rhs, &op));
        }
        Ok(value)
    }

    fn eval_additive(&mut self) -> Result<Value> {
        let mut value = self.eval_multiplicative()?;
        loop {
            let plus = match self.peek() {
                Some(Token::Plus) => true,
                Some(Token::Minus) => false,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.eval_multiplicative()?;

            if plus && (value.is_string() || rhs.is_string()) {
                value = Value::String(format!("{}{}", stringify(&value), stringify(&rhs)));
                continue;
            }

            value = match (to_number(&value), to_number(&rhs)) {
                (Some(a), Some(b)) => number(if plus { a + b } else { a - b }),
                _ => Value::Null,
            };
        }
        Ok(value)
    }

    fn eval_multiplicative(&mut self) -> Result<Value> {
        let mut value = self.eval_unary()?;
        loop {
            let star = match self.peek() {
                Some(Token::Star) => true,
                Some(Token::Slash) => false,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.eval_unary()?;
            value = match (to_number(&value), to_number(&rhs)) {
                (Some(a), Some(b)) => number(if star { a * b } else { a / b }),
                _ => Value::Null,
            };
        }
        Ok(value)
    }

    fn eval_unary(&mut self) -> Result<Value> {
        if self.eat(&Token::Not) {
            let value = self.eval_unary()?;
            return Ok(Value::Bool(!truthy(&value)));
        }
        if self.eat(&Token::Minus) {
            let value = self.eval_unary()?;
            return Ok(to_number(&value).map(|f| number(-f)).unwrap_or(Value::Null));
        }
        self.eval_postfix()
    }

    fn eval_postfix(&mut self) -> Result<Value> {
        let mut value = self.eval_primary()?;

        while self.eat(&Token::Dot) {
            let name = match self.bump() {
                Some(Token::Ident(name)) => name,
                _ => return Err(self.error("expected member name after '.'")),
            };

            if self.eat(&Token::LParen) {
                let mut args = Vec::new();
                if !self.eat(&Token::RParen) {
                    loop {
                        args.push(self.eval_expr()?);
                        if self.eat(&Token::RParen) {
                            break;
                        }
                        self.expect(Token::Comma)?;
                    }
                }
                value = self.call_method(&value, &name, &args)?;
            } else {
                value = member(&value, &name);
            }
        }

        Ok(value)
    }

    fn eval_primary(&mut self) -> Result<Value> {
        match self.bump() {
            Some(Token::Number(f)) => Ok(number(f)),
            Some(Token::Str(s)) => Ok(Value::String(s)),
            Some(Token::True) => Ok(Value::Bool(true)),
            Some(Token::False) => Ok(Value::Bool(false)),
            Some(Token::Null) => Ok(Value::Null),
            Some(Token::Regex { pattern, flags }) => Ok(regex_value(&pattern, &flags)),
            Some(Token::LParen) => {
                let value = self.eval_expr()?;
                self.expect(Token::RParen)?;
                Ok(value)
            }
            Some(Token::Ident(name)) => match self.ctx.slot(&name) {
                Some(value) => Ok(value.clone()),
                None => Err(self.error(&format!("unknown identifier '{}'", name))),
            },
            other => Err(self.error(&format!("unexpected token {:?}", other))),
        }
    }

    /// The only supported method is `match(regex)` on strings
    ///
    /// Returns true on match and undefined otherwise, so the result keeps the
    /// truthiness of the host language's `String.match`.
    fn call_method(&self, receiver: &Value, name: &str, args: &[Value]) -> Result<Value> {
        if name != "match" {
            return Err(self.error(&format!("unsupported method '{}'", name)));
        }

        let text = match receiver {
            Value::String(s) => s,
            // undefined propagates through the call
            _ => return Ok(Value::Null),
        };

        let pattern = match args.first() {
            Some(Value::Object(obj)) if obj.contains_key("__regex") => obj
                .get("__regex")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            Some(Value::String(s)) => regex::escape(s),
            _ => return Ok(Value::Null),
        };

        let re = regex::Regex::new(&pattern)
            .map_err(|e| self.error(&format!("invalid regex: {}", e)))?;
        Ok(if re.is_match(text) {
            Value::Bool(true)
        } else {
            Value::Null
        })
    }
}

/// Regex literals travel as tagged objects until they reach `match`
fn regex_value(pattern: &str, flags: &str) -> Value {
    let mut compiled = String::new();
    if flags.contains('i') {
        compiled.push_str("(?i)");
    }
    compiled.push_str(pattern);

    let mut obj = serde_json::Map::new();
    obj.insert("__regex".to_string(), Value::String(compiled));
    Value::Object(obj)
}

fn member(value: &Value, name: &str) -> Value {
    match value {
        Value::Object(obj) => obj.get(name).cloned().unwrap_or(Value::Null),
        // member access through undefined (or a non-object) yields undefined
        _ => Value::Null,
    }
}

fn values_equal(a: &Value, b: &Value, strict: bool) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        (Value::String(x), Value::String(y)) => x == y,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Null, Value::Null) => true,
        _ if strict => false,
        // loose equality coerces a number/string (or bool) pair numerically
        _ => match (to_number(a), to_number(b)) {
            (Some(x), Some(y)) => x == y,
            _ => false,
        },
    }
}

fn compare(a: &Value, b: &Value, op: &Token) -> bool {
    if let (Some(x), Some(y)) = (to_number(a), to_number(b)) {
        return match op {
            Token::Lt => x < y,
            Token::Le => x <= y,
            Token::Gt => x > y,
            Token::Ge => x >= y,
            _ => false,
        };
    }
    if let (Value::String(x), Value::String(y)) = (a, b) {
        return match op {
            Token::Lt => x < y,
            Token::Le => x <= y,
            Token::Gt => x > y,
            Token::Ge => x >= y,
            _ => false,
        };
    }
    false
}
