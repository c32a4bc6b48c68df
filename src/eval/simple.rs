//! Default expression dialect
//!
//! A small recursive-descent evaluator: literals, dotted and indexed
//! paths resolved against the environment, calls into function-valued
//! entries, `!`, comparisons and `&&`/`||`. Missing roots resolve to
//! null so validation expressions can probe outputs safely.

use serde_json::{Number, Value};
use std::cmp::Ordering;

use super::{resolve_template, truthy, Env, EnvValue, EvalError, Evaluator};

/// The built-in expression evaluator
#[derive(Debug, Clone, Default)]
pub struct SimpleEvaluator;

impl SimpleEvaluator {
    /// Create the default evaluator
    pub fn new() -> Self {
        Self
    }
}

impl Evaluator for SimpleEvaluator {
    fn evaluate(&self, raw: &str, env: &Env) -> Result<Value, EvalError> {
        if raw.contains("{{") {
            return resolve_template(self, raw, env);
        }
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Ok(Value::Null);
        }
        let tokens = tokenize(trimmed)?;
        let mut parser = Parser {
            tokens,
            pos: 0,
            env,
        };
        let value = parser.parse_or()?;
        parser.expect_end()?;
        Ok(value)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Str(String),
    Num(f64),
    Ident(String),
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Dot,
    Not,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

fn tokenize(input: &str) -> Result<Vec<Token>, EvalError> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = input.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' | '\n' | '\r' => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '[' => {
                tokens.push(Token::LBracket);
                i += 1;
            }
            ']' => {
                tokens.push(Token::RBracket);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '.' => {
                tokens.push(Token::Dot);
                i += 1;
            }
            '\'' | '"' => {
                let quote = c;
                let mut s = String::new();
                i += 1;
                loop {
                    if i >= chars.len() {
                        return Err(EvalError::Parse(format!(
                            "unterminated string in '{}'",
                            input
                        )));
                    }
                    let ch = chars[i];
                    if ch == quote {
                        i += 1;
                        break;
                    }
                    if ch == '\\' && i + 1 < chars.len() {
                        i += 1;
                        let esc = chars[i];
                        s.push(match esc {
                            'n' => '\n',
                            't' => '\t',
                            'r' => '\r',
                            other => other,
                        });
                    } else {
                        s.push(ch);
                    }
                    i += 1;
                }
                tokens.push(Token::Str(s));
            }
            '=' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Eq);
                    i += 2;
                } else {
                    return Err(EvalError::Parse(format!("unexpected '=' in '{}'", input)));
                }
            }
            '!' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Ne);
                    i += 2;
                } else {
                    tokens.push(Token::Not);
                    i += 1;
                }
            }
            '<' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Le);
                    i += 2;
                } else {
                    tokens.push(Token::Lt);
                    i += 1;
                }
            }
            '>' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Ge);
                    i += 2;
                } else {
                    tokens.push(Token::Gt);
                    i += 1;
                }
            }
            '&' => {
                if chars.get(i + 1) == Some(&'&') {
                    tokens.push(Token::And);
                    i += 2;
                } else {
                    return Err(EvalError::Parse(format!("unexpected '&' in '{}'", input)));
                }
            }
            '|' => {
                if chars.get(i + 1) == Some(&'|') {
                    tokens.push(Token::Or);
                    i += 2;
                } else {
                    return Err(EvalError::Parse(format!("unexpected '|' in '{}'", input)));
                }
            }
            '-' if chars.get(i + 1).map(|c| c.is_ascii_digit()).unwrap_or(false) => {
                let (num, next) = lex_number(&chars, i)?;
                tokens.push(Token::Num(num));
                i = next;
            }
            c if c.is_ascii_digit() => {
                let (num, next) = lex_number(&chars, i)?;
                tokens.push(Token::Num(num));
                i = next;
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_ascii_alphanumeric() || chars[i] == '_' || chars[i] == '-')
                {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            other => {
                return Err(EvalError::Parse(format!(
                    "unexpected character '{}' in '{}'",
                    other, input
                )))
            }
        }
    }
    Ok(tokens)
}

fn lex_number(chars: &[char], mut i: usize) -> Result<(f64, usize), EvalError> {
    let start = i;
    if chars[i] == '-' {
        i += 1;
    }
    while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
        i += 1;
    }
    let text: String = chars[start..i].iter().collect();
    text.parse::<f64>()
        .map(|n| (n, i))
        .map_err(|_| EvalError::Parse(format!("invalid number '{}'", text)))
}

struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    env: &'a Env,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn expect(&mut self, expected: Token) -> Result<(), EvalError> {
        match self.next() {
            Some(ref t) if *t == expected => Ok(()),
            other => Err(EvalError::Parse(format!(
                "expected {:?}, found {:?}",
                expected, other
            ))),
        }
    }

    fn expect_end(&self) -> Result<(), EvalError> {
        if self.pos == self.tokens.len() {
            Ok(())
        } else {
            Err(EvalError::Parse(format!(
                "trailing tokens starting at {:?}",
                self.tokens[self.pos]
            )))
        }
    }

    fn parse_or(&mut self) -> Result<Value, EvalError> {
        let mut left = self.parse_and()?;
        while self.peek() == Some(&Token::Or) {
            self.next();
            let right = self.parse_and()?;
            left = Value::Bool(truthy(&left) || truthy(&right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Value, EvalError> {
        let mut left = self.parse_equality()?;
        while self.peek() == Some(&Token::And) {
            self.next();
            let right = self.parse_equality()?;
            left = Value::Bool(truthy(&left) && truthy(&right));
        }
        Ok(left)
    }

    fn parse_equality(&mut self) -> Result<Value, EvalError> {
        let mut left = self.parse_comparison()?;
        loop {
            match self.peek() {
                Some(Token::Eq) => {
                    self.next();
                    let right = self.parse_comparison()?;
                    left = Value::Bool(values_equal(&left, &right));
                }
                Some(Token::Ne) => {
                    self.next();
                    let right = self.parse_comparison()?;
                    left = Value::Bool(!values_equal(&left, &right));
                }
                _ => break,
            }
        }
        Ok(left)
    }

    fn parse_comparison(&mut self) -> Result<Value, EvalError> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Lt) => Ordering::Less,
                Some(Token::Gt) => Ordering::Greater,
                Some(Token::Le) | Some(Token::Ge) => {
                    let inclusive_less = self.peek() == Some(&Token::Le);
                    self.next();
                    let right = self.parse_unary()?;
                    left = Value::Bool(match compare_values(&left, &right) {
                        Some(ord) if inclusive_less => ord != Ordering::Greater,
                        Some(ord) => ord != Ordering::Less,
                        None => false,
                    });
                    continue;
                }
                _ => break,
            };
            self.next();
            let right = self.parse_unary()?;
            left = Value::Bool(matches!(compare_values(&left, &right), Some(ord) if ord == op));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Value, EvalError> {
        if self.peek() == Some(&Token::Not) {
            self.next();
            let value = self.parse_unary()?;
            return Ok(Value::Bool(!truthy(&value)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Value, EvalError> {
        match self.next() {
            Some(Token::Str(s)) => self.parse_postfix(Value::String(s)),
            Some(Token::Num(n)) => Ok(number_value(n)),
            Some(Token::LParen) => {
                let value = self.parse_or()?;
                self.expect(Token::RParen)?;
                self.parse_postfix(value)
            }
            Some(Token::Ident(first)) => self.parse_path_or_call(first),
            other => Err(EvalError::Parse(format!(
                "unexpected token {:?}",
                other
            ))),
        }
    }

    /// A dotted name is either a call into a function-valued env entry
    /// or a value path into the environment.
    fn parse_path_or_call(&mut self, first: String) -> Result<Value, EvalError> {
        match first.as_str() {
            "true" => return self.parse_postfix(Value::Bool(true)),
            "false" => return self.parse_postfix(Value::Bool(false)),
            "null" => return self.parse_postfix(Value::Null),
            _ => {}
        }

        let mut segments = vec![first];
        while self.peek() == Some(&Token::Dot) {
            let mark = self.pos;
            self.next();
            match self.next() {
                Some(Token::Ident(seg)) => segments.push(seg),
                _ => {
                    self.pos = mark;
                    break;
                }
            }
        }

        if self.peek() == Some(&Token::LParen) {
            self.next();
            let mut args = Vec::new();
            if self.peek() != Some(&Token::RParen) {
                loop {
                    args.push(self.parse_or()?);
                    if self.peek() == Some(&Token::Comma) {
                        self.next();
                    } else {
                        break;
                    }
                }
            }
            self.expect(Token::RParen)?;
            let name = segments.join(".");
            let value = self.call(&name, &args)?;
            return self.parse_postfix(value);
        }

        let value = self.resolve_path(&segments);
        self.parse_postfix(value)
    }

    fn call(&self, name: &str, args: &[Value]) -> Result<Value, EvalError> {
        match self.env.get(name) {
            Some(EnvValue::Function(f)) => f(args),
            Some(EnvValue::Value(_)) => {
                Err(EvalError::Eval(format!("'{}' is not callable", name)))
            }
            None => Err(EvalError::Eval(format!("unknown function '{}'", name))),
        }
    }

    /// Resolve dotted segments: the longest leading prefix naming an
    /// env value is the root, remaining segments index into it.
    /// Unknown roots resolve to null rather than erroring.
    fn resolve_path(&self, segments: &[String]) -> Value {
        for take in (1..=segments.len()).rev() {
            let name = segments[..take].join(".");
            if let Some(EnvValue::Value(root)) = self.env.get(&name) {
                let mut value = root.clone();
                for seg in &segments[take..] {
                    value = index_map(&value, seg);
                }
                return value;
            }
        }
        Value::Null
    }

    fn parse_postfix(&mut self, mut value: Value) -> Result<Value, EvalError> {
        loop {
            match self.peek() {
                Some(Token::Dot) => {
                    let mark = self.pos;
                    self.next();
                    match self.next() {
                        Some(Token::Ident(seg)) => value = index_map(&value, &seg),
                        _ => {
                            self.pos = mark;
                            break;
                        }
                    }
                }
                Some(Token::LBracket) => {
                    self.next();
                    let key = self.parse_or()?;
                    self.expect(Token::RBracket)?;
                    value = index_value(&value, &key);
                }
                _ => break,
            }
        }
        Ok(value)
    }
}

fn number_value(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
        Value::Number(Number::from(n as i64))
    } else {
        Number::from_f64(n).map(Value::Number).unwrap_or(Value::Null)
    }
}

/// Object field lookup with a case-insensitive fallback so header maps
/// resolve regardless of wire casing
fn index_map(value: &Value, key: &str) -> Value {
    match value {
        Value::Object(map) => map
            .get(key)
            .cloned()
            .or_else(|| {
                map.iter()
                    .find(|(k, _)| k.eq_ignore_ascii_case(key))
                    .map(|(_, v)| v.clone())
            })
            .unwrap_or(Value::Null),
        _ => Value::Null,
    }
}

fn index_value(value: &Value, key: &Value) -> Value {
    match (value, key) {
        (Value::Array(items), Value::Number(n)) => n
            .as_i64()
            .and_then(|i| {
                let idx = if i < 0 { items.len() as i64 + i } else { i };
                usize::try_from(idx).ok().and_then(|u| items.get(u))
            })
            .cloned()
            .unwrap_or(Value::Null),
        (_, Value::String(s)) => index_map(value, s),
        _ => Value::Null,
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(fx), Some(fy)) => fx == fy,
            _ => x == y,
        },
        _ => a == b,
    }
}

/// Order two values: numbers numerically, strings lexicographically.
/// Incomparable pairs (null, mixed types) yield no ordering, so
/// probing comparisons evaluate to false instead of erroring.
fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => None,
    }
}
