//! Attribute values.
//!
//! The queue's evaluator is three-valued: besides ordinary literals an
//! expression may produce `UNDEFINED` (a referenced attribute is missing) or
//! `ERROR` (operands of the wrong type).

use std::fmt;

use serde::{Deserialize, Serialize};

/// A value an expression can evaluate to, or an attribute can hold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "serde_json::Value", into = "serde_json::Value")]
pub enum Value {
    Undefined,
    Error,
    Bool(bool),
    Int(i64),
    Real(f64),
    Str(String),
}

impl Value {
    /// Returns true only for `Bool(true)`.
    ///
    /// This is how the queue interprets a constraint or policy expression:
    /// anything other than a literal `true` (including `UNDEFINED`) does not match.
    pub fn is_true(&self) -> bool {
        matches!(self, Value::Bool(true))
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    /// Numeric view of the value, if it has one
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Real(r) => Some(*r),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Real(r) if r.fract() == 0.0 => Some(*r as i64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Interpret a submit-description right-hand side as a value.
    ///
    /// Submit descriptions carry everything as text; `16` is an integer,
    /// `"x"` is a string, `true` is a boolean. Anything else is kept as a bare string.
    pub fn from_submit_text(text: &str) -> Value {
        let trimmed = text.trim();
        if let Ok(i) = trimmed.parse::<i64>() {
            return Value::Int(i);
        }
        if let Ok(r) = trimmed.parse::<f64>() {
            if trimmed.contains('.') {
                return Value::Real(r);
            }
        }
        match trimmed.to_ascii_lowercase().as_str() {
            "true" => return Value::Bool(true),
            "false" => return Value::Bool(false),
            "undefined" => return Value::Undefined,
            _ => {}
        }
        if trimmed.len() >= 2 && trimmed.starts_with('"') && trimmed.ends_with('"') {
            return Value::Str(unescape(&trimmed[1..trimmed.len() - 1]));
        }
        Value::Str(trimmed.to_string())
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => write!(f, "UNDEFINED"),
            Value::Error => write!(f, "ERROR"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Real(r) => {
                if r.fract() == 0.0 && r.is_finite() {
                    write!(f, "{:.1}", r)
                } else {
                    write!(f, "{}", r)
                }
            }
            Value::Str(s) => write!(f, "{}", quote(s)),
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Undefined,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => n.as_f64().map(Value::Real).unwrap_or(Value::Error),
            },
            serde_json::Value::String(s) => Value::Str(s),
            // Lists and nested ads are outside the subset we model
            _ => Value::Error,
        }
    }
}

impl From<Value> for serde_json::Value {
    fn from(value: Value) -> Self {
        match value {
            Value::Undefined | Value::Error => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(b),
            Value::Int(i) => serde_json::Value::from(i),
            Value::Real(r) => serde_json::Number::from_f64(r)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Str(s) => serde_json::Value::String(s),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

/// Quote a string as a string literal of the expression language.
pub fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

/// Reverse of the escaping done by [`quote`], without the surrounding quotes.
pub(crate) fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_escapes() {
        assert_eq!(quote("plain"), "\"plain\"");
        assert_eq!(quote("a\"b"), "\"a\\\"b\"");
        assert_eq!(quote("back\\slash"), "\"back\\\\slash\"");
        assert_eq!(unescape("a\\\"b"), "a\"b");
    }

    #[test]
    fn test_from_submit_text() {
        assert_eq!(Value::from_submit_text("16"), Value::Int(16));
        assert_eq!(Value::from_submit_text("1.5"), Value::Real(1.5));
        assert_eq!(Value::from_submit_text("TRUE"), Value::Bool(true));
        assert_eq!(
            Value::from_submit_text("\"Spooling input files\""),
            Value::Str("Spooling input files".to_string())
        );
        assert_eq!(Value::from_submit_text("/bin/cat"), Value::Str("/bin/cat".to_string()));
    }

    #[test]
    fn test_json_conversion() {
        let v: Value = serde_json::json!(4).into();
        assert_eq!(v, Value::Int(4));
        let v: Value = serde_json::Value::Null.into();
        assert!(v.is_undefined());

        let back: serde_json::Value = Value::Str("x".into()).into();
        assert_eq!(back, serde_json::json!("x"));
    }

    #[test]
    fn test_real_display_keeps_decimal_point() {
        assert_eq!(Value::Real(3.0).to_string(), "3.0");
        assert_eq!(Value::Real(0.25).to_string(), "0.25");
    }
}
