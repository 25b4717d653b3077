use bevy::{math::DVec3, prelude::*};
use serde_json::Value;
use thiserror::Error;

use crate::cast::CastData;

pub type ConfigSection = serde_json::Map<String, Value>;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("'{key}' must be three comma separated numbers, got '{value}'")]
    MalformedVector { key: String, value: String },
    #[error("effect section is missing the 'type' key")]
    MissingEffectType,
    #[error("'{0}' is required but missing")]
    MissingKey(String),
    #[error("no effect type is registered under the name '{0}'")]
    UnknownEffectType(String),
    #[error("no modifier is registered under the name '{0}'")]
    UnknownModifier(String),
    #[error("modifier '{name}': {reason}")]
    InvalidModifier { name: String, reason: String },
    #[error("malformed spell section: {0}")]
    MalformedSpell(String),
}

/// A configuration value that is either a constant or a formula evaluated
/// against the cast at the moment of use.
///
/// Resolution is pure and infallible: the same cast data always yields the
/// same value, and malformed input already degraded to the key's default
/// when the definition was parsed.
#[derive(Debug, Clone)]
pub enum ConfigValue<T: ConfigType> {
    Constant(T),
    Dynamic(Expression),
}

impl<T: ConfigType> ConfigValue<T> {
    /// Reads `key` from a flat configuration section. Missing keys resolve
    /// to the default, as do values that can neither be read as a literal
    /// nor parsed as an expression.
    pub fn parse(section: &ConfigSection, key: &str, default: T) -> Self {
        let Some(value) = section.get(key) else {
            return Self::Constant(default);
        };

        if let Some(literal) = T::from_json(value) {
            return Self::Constant(literal);
        }

        if let Value::String(source) = value {
            match Expression::parse(source) {
                Some(expression) => match expression.as_constant() {
                    Some(constant) => return Self::Constant(T::from_number(constant)),
                    None => return Self::Dynamic(expression),
                },
                None => {
                    warn!(
                        "'{}' is not a literal or a valid expression: '{}', using default",
                        key, source
                    );
                    return Self::Constant(default);
                }
            }
        }

        warn!("'{}' has the wrong type, using default", key);
        return Self::Constant(default);
    }

    pub fn get(&self, data: Option<&CastData>) -> T {
        match self {
            Self::Constant(value) => value.clone(),
            Self::Dynamic(expression) => T::from_number(expression.eval(data)),
        }
    }

    pub fn is_dynamic(&self) -> bool {
        matches!(self, Self::Dynamic(_))
    }
}

/// The primitive types a [`ConfigValue`] can resolve to.
pub trait ConfigType: Clone + sealed::Sealed {
    fn from_json(value: &Value) -> Option<Self>;
    fn from_number(value: f64) -> Self;
}

mod sealed {
    pub trait Sealed {}
    impl Sealed for i32 {}
    impl Sealed for f32 {}
    impl Sealed for f64 {}
    impl Sealed for bool {}
    impl Sealed for String {}
}

impl ConfigType for i32 {
    fn from_json(value: &Value) -> Option<Self> {
        value.as_i64().map(|v| v as i32)
    }

    fn from_number(value: f64) -> Self {
        value as i32
    }
}

impl ConfigType for f32 {
    fn from_json(value: &Value) -> Option<Self> {
        value.as_f64().map(|v| v as f32)
    }

    fn from_number(value: f64) -> Self {
        value as f32
    }
}

impl ConfigType for f64 {
    fn from_json(value: &Value) -> Option<Self> {
        value.as_f64()
    }

    fn from_number(value: f64) -> Self {
        value
    }
}

impl ConfigType for bool {
    fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Bool(boolean) => Some(*boolean),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    fn from_number(value: f64) -> Self {
        value != 0.0
    }
}

impl ConfigType for String {
    fn from_json(value: &Value) -> Option<Self> {
        value.as_str().map(|s| s.to_owned())
    }

    fn from_number(value: f64) -> Self {
        value.to_string()
    }
}

/// A small arithmetic formula over the cast's numeric value.
///
/// Supports `+ - * /`, unary minus, parentheses, number literals and the
/// identifiers `power`/`value`, which resolve to the cast's power (1.0
/// when cast data is absent). Parsed once at load, evaluated without
/// allocating.
#[derive(Debug, Clone)]
pub struct Expression {
    root: Expr,
}

#[derive(Debug, Clone)]
enum Expr {
    Number(f64),
    Power,
    Neg(Box<Expr>),
    Add(Box<Expr>, Box<Expr>),
    Sub(Box<Expr>, Box<Expr>),
    Mul(Box<Expr>, Box<Expr>),
    Div(Box<Expr>, Box<Expr>),
}

impl Expression {
    pub fn parse(source: &str) -> Option<Self> {
        let mut parser = Parser {
            tokens: tokenize(source)?,
            position: 0,
        };
        let root = parser.expression()?;
        if parser.position != parser.tokens.len() {
            return None;
        }
        return Some(Self { root });
    }

    pub fn eval(&self, data: Option<&CastData>) -> f64 {
        self.root.eval(data)
    }

    /// The expression's value if it does not depend on the cast.
    pub fn as_constant(&self) -> Option<f64> {
        if self.root.references_cast() {
            return None;
        }
        return Some(self.root.eval(None));
    }
}

impl Expr {
    fn eval(&self, data: Option<&CastData>) -> f64 {
        match self {
            Expr::Number(number) => *number,
            Expr::Power => data.map(CastData::power).unwrap_or(1.0),
            Expr::Neg(inner) => -inner.eval(data),
            Expr::Add(lhs, rhs) => lhs.eval(data) + rhs.eval(data),
            Expr::Sub(lhs, rhs) => lhs.eval(data) - rhs.eval(data),
            Expr::Mul(lhs, rhs) => lhs.eval(data) * rhs.eval(data),
            Expr::Div(lhs, rhs) => lhs.eval(data) / rhs.eval(data),
        }
    }

    fn references_cast(&self) -> bool {
        match self {
            Expr::Number(_) => false,
            Expr::Power => true,
            Expr::Neg(inner) => inner.references_cast(),
            Expr::Add(lhs, rhs)
            | Expr::Sub(lhs, rhs)
            | Expr::Mul(lhs, rhs)
            | Expr::Div(lhs, rhs) => lhs.references_cast() || rhs.references_cast(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Power,
    Plus,
    Minus,
    Star,
    Slash,
    Open,
    Close,
}

fn tokenize(source: &str) -> Option<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = source.chars().peekable();

    while let Some(&character) = chars.peek() {
        match character {
            ' ' | '\t' => {
                chars.next();
            }
            '+' => {
                chars.next();
                tokens.push(Token::Plus);
            }
            '-' => {
                chars.next();
                tokens.push(Token::Minus);
            }
            '*' => {
                chars.next();
                tokens.push(Token::Star);
            }
            '/' => {
                chars.next();
                tokens.push(Token::Slash);
            }
            '(' => {
                chars.next();
                tokens.push(Token::Open);
            }
            ')' => {
                chars.next();
                tokens.push(Token::Close);
            }
            '0'..='9' | '.' => {
                let mut number = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_ascii_digit() || c == '.' {
                        number.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Number(number.parse().ok()?));
            }
            c if c.is_ascii_alphabetic() => {
                let mut identifier = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_ascii_alphanumeric() || c == '_' {
                        identifier.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                match identifier.as_str() {
                    "power" | "value" => tokens.push(Token::Power),
                    _ => return None,
                }
            }
            _ => return None,
        }
    }

    if tokens.is_empty() {
        return None;
    }
    return Some(tokens);
}

struct Parser {
    tokens: Vec<Token>,
    position: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.position)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.position).cloned();
        self.position += 1;
        return token;
    }

    fn expression(&mut self) -> Option<Expr> {
        let mut lhs = self.term()?;
        while let Some(token) = self.peek() {
            match token {
                Token::Plus => {
                    self.next();
                    lhs = Expr::Add(Box::new(lhs), Box::new(self.term()?));
                }
                Token::Minus => {
                    self.next();
                    lhs = Expr::Sub(Box::new(lhs), Box::new(self.term()?));
                }
                _ => break,
            }
        }
        return Some(lhs);
    }

    fn term(&mut self) -> Option<Expr> {
        let mut lhs = self.factor()?;
        while let Some(token) = self.peek() {
            match token {
                Token::Star => {
                    self.next();
                    lhs = Expr::Mul(Box::new(lhs), Box::new(self.factor()?));
                }
                Token::Slash => {
                    self.next();
                    lhs = Expr::Div(Box::new(lhs), Box::new(self.factor()?));
                }
                _ => break,
            }
        }
        return Some(lhs);
    }

    fn factor(&mut self) -> Option<Expr> {
        match self.next()? {
            Token::Number(number) => Some(Expr::Number(number)),
            Token::Power => Some(Expr::Power),
            Token::Minus => Some(Expr::Neg(Box::new(self.factor()?))),
            Token::Open => {
                let inner = self.expression()?;
                match self.next()? {
                    Token::Close => Some(inner),
                    _ => None,
                }
            }
            _ => None,
        }
    }
}

/// Parses a `"x,y,z"` string (or a three element array) into a vector.
///
/// Used for the offset keys. A missing key yields the default, anything
/// else malformed is a fatal configuration error.
pub fn parse_vector(
    section: &ConfigSection,
    key: &str,
    default: DVec3,
) -> Result<DVec3, ConfigError> {
    let Some(value) = section.get(key) else {
        return Ok(default);
    };

    let malformed = || ConfigError::MalformedVector {
        key: key.to_owned(),
        value: value.to_string(),
    };

    match value {
        Value::String(string) => {
            let components: Vec<&str> = string.split(',').collect();
            if components.len() != 3 {
                return Err(malformed());
            }
            let mut vector = DVec3::ZERO;
            for (index, component) in components.iter().enumerate() {
                vector[index] = component.trim().parse().map_err(|_| malformed())?;
            }
            Ok(vector)
        }
        Value::Array(values) => {
            if values.len() != 3 {
                return Err(malformed());
            }
            let mut vector = DVec3::ZERO;
            for (index, component) in values.iter().enumerate() {
                vector[index] = component.as_f64().ok_or_else(malformed)?;
            }
            Ok(vector)
        }
        _ => Err(malformed()),
    }
}

pub fn get_string(section: &ConfigSection, key: &str, default: &str) -> String {
    match section.get(key).and_then(Value::as_str) {
        Some(value) => value.to_owned(),
        None => default.to_owned(),
    }
}

pub fn get_bool(section: &ConfigSection, key: &str, default: bool) -> bool {
    match section.get(key).and_then(Value::as_bool) {
        Some(value) => value,
        None => default,
    }
}

pub fn get_string_list(section: &ConfigSection, key: &str) -> Vec<String> {
    let Some(value) = section.get(key) else {
        return Vec::new();
    };

    let Some(values) = value.as_array() else {
        warn!("'{}' must be a list of strings, ignoring it", key);
        return Vec::new();
    };

    let mut strings = Vec::with_capacity(values.len());
    for value in values {
        match value.as_str() {
            Some(string) => strings.push(string.to_owned()),
            None => warn!("'{}' contains a non-string entry, ignoring it", key),
        }
    }
    return strings;
}
