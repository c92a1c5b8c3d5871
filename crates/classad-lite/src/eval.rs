//! Three-valued evaluation.
//!
//! Follows the queue evaluator's rules for the modelled subset: a missing
//! attribute is `UNDEFINED`, `UNDEFINED` propagates through arithmetic and
//! comparisons, `&&`/`||` short-circuit over it, and `=?=`/`=!=` never yield it.

use std::collections::BTreeMap;
use std::cmp::Ordering;

use crate::expr::{BinOp, Expr};
use crate::value::Value;

/// Evaluation environment: attribute lookup plus the evaluator's clock
pub trait Env {
    /// Look up an attribute. Names are matched case-insensitively.
    fn lookup(&self, name: &str) -> Value;

    /// Current time in seconds since the epoch, as returned by `time()`
    fn now(&self) -> i64;
}

/// Simple map-backed environment
#[derive(Debug, Clone, Default)]
pub struct MapEnv {
    attributes: BTreeMap<String, Value>,
    now: i64,
}

impl MapEnv {
    pub fn new(now: i64) -> Self {
        Self {
            attributes: BTreeMap::new(),
            now,
        }
    }

    pub fn with(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.set(name, value);
        self
    }

    pub fn set(&mut self, name: &str, value: impl Into<Value>) {
        self.attributes.insert(name.to_ascii_lowercase(), value.into());
    }
}

impl Env for MapEnv {
    fn lookup(&self, name: &str) -> Value {
        self.attributes
            .get(&name.to_ascii_lowercase())
            .cloned()
            .unwrap_or(Value::Undefined)
    }

    fn now(&self) -> i64 {
        self.now
    }
}

impl Expr {
    /// Evaluate against an environment
    pub fn eval(&self, env: &dyn Env) -> Value {
        match self {
            Expr::Lit(v) => v.clone(),
            Expr::Attr(name) => env.lookup(name),
            Expr::Time => Value::Int(env.now()),
            Expr::Not(inner) => match inner.eval(env) {
                Value::Bool(b) => Value::Bool(!b),
                Value::Undefined => Value::Undefined,
                _ => Value::Error,
            },
            Expr::Neg(inner) => match inner.eval(env) {
                Value::Int(i) => Value::Int(-i),
                Value::Real(r) => Value::Real(-r),
                Value::Undefined => Value::Undefined,
                _ => Value::Error,
            },
            Expr::Binary(BinOp::And, lhs, rhs) => eval_and(lhs, rhs, env),
            Expr::Binary(BinOp::Or, lhs, rhs) => eval_or(lhs, rhs, env),
            Expr::Binary(op, lhs, rhs) => {
                let l = lhs.eval(env);
                let r = rhs.eval(env);
                match op {
                    BinOp::MetaEq => Value::Bool(identical(&l, &r)),
                    BinOp::MetaNe => Value::Bool(!identical(&l, &r)),
                    BinOp::Add | BinOp::Sub => arithmetic(*op, &l, &r),
                    _ => compare(*op, &l, &r),
                }
            }
        }
    }

    /// Evaluate and report whether the result is exactly `true`
    pub fn matches(&self, env: &dyn Env) -> bool {
        self.eval(env).is_true()
    }
}

fn eval_and(lhs: &Expr, rhs: &Expr, env: &dyn Env) -> Value {
    match lhs.eval(env) {
        Value::Bool(false) => Value::Bool(false),
        Value::Bool(true) => match rhs.eval(env) {
            v @ (Value::Bool(_) | Value::Undefined) => v,
            _ => Value::Error,
        },
        Value::Undefined => match rhs.eval(env) {
            Value::Bool(false) => Value::Bool(false),
            Value::Bool(true) | Value::Undefined => Value::Undefined,
            _ => Value::Error,
        },
        _ => Value::Error,
    }
}

fn eval_or(lhs: &Expr, rhs: &Expr, env: &dyn Env) -> Value {
    match lhs.eval(env) {
        Value::Bool(true) => Value::Bool(true),
        Value::Bool(false) => match rhs.eval(env) {
            v @ (Value::Bool(_) | Value::Undefined) => v,
            _ => Value::Error,
        },
        Value::Undefined => match rhs.eval(env) {
            Value::Bool(true) => Value::Bool(true),
            Value::Bool(false) | Value::Undefined => Value::Undefined,
            _ => Value::Error,
        },
        _ => Value::Error,
    }
}

fn identical(l: &Value, r: &Value) -> bool {
    match (l, r) {
        (Value::Undefined, Value::Undefined) => true,
        (Value::Error, Value::Error) => true,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::Int(a), Value::Int(b)) => a == b,
        (Value::Real(a), Value::Real(b)) => a == b,
        (Value::Str(a), Value::Str(b)) => a == b,
        _ => false,
    }
}

fn arithmetic(op: BinOp, l: &Value, r: &Value) -> Value {
    match (l, r) {
        (Value::Error, _) | (_, Value::Error) => Value::Error,
        (Value::Undefined, _) | (_, Value::Undefined) => Value::Undefined,
        (Value::Int(a), Value::Int(b)) => match op {
            BinOp::Add => a.checked_add(*b).map(Value::Int).unwrap_or(Value::Error),
            _ => a.checked_sub(*b).map(Value::Int).unwrap_or(Value::Error),
        },
        _ => match (l.as_f64(), r.as_f64()) {
            (Some(a), Some(b)) => Value::Real(if op == BinOp::Add { a + b } else { a - b }),
            _ => Value::Error,
        },
    }
}

fn compare(op: BinOp, l: &Value, r: &Value) -> Value {
    let ordering = match (l, r) {
        (Value::Error, _) | (_, Value::Error) => return Value::Error,
        (Value::Undefined, _) | (_, Value::Undefined) => return Value::Undefined,
        (Value::Str(a), Value::Str(b)) => a.to_ascii_lowercase().cmp(&b.to_ascii_lowercase()),
        (Value::Bool(a), Value::Bool(b)) => {
            return match op {
                BinOp::Eq => Value::Bool(a == b),
                BinOp::Ne => Value::Bool(a != b),
                _ => Value::Error,
            }
        }
        _ => match (l.as_f64(), r.as_f64()) {
            (Some(a), Some(b)) => match a.partial_cmp(&b) {
                Some(ordering) => ordering,
                None => return Value::Error,
            },
            _ => return Value::Error,
        },
    };

    let result = match op {
        BinOp::Eq => ordering == Ordering::Equal,
        BinOp::Ne => ordering != Ordering::Equal,
        BinOp::Lt => ordering == Ordering::Less,
        BinOp::Le => ordering != Ordering::Greater,
        BinOp::Gt => ordering == Ordering::Greater,
        BinOp::Ge => ordering != Ordering::Less,
        _ => return Value::Error,
    };
    Value::Bool(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse;

    fn eval(text: &str, env: &MapEnv) -> Value {
        parse(text).unwrap().eval(env)
    }

    #[test]
    fn test_missing_attribute_is_undefined() {
        let env = MapEnv::new(0);
        assert_eq!(eval("Nope", &env), Value::Undefined);
        assert_eq!(eval("Nope == 1", &env), Value::Undefined);
        assert_eq!(eval("Nope =?= UNDEFINED", &env), Value::Bool(true));
        assert_eq!(eval("Nope =!= UNDEFINED", &env), Value::Bool(false));
    }

    #[test]
    fn test_short_circuit_over_undefined() {
        let env = MapEnv::new(0);
        assert_eq!(eval("Nope && false", &env), Value::Bool(false));
        assert_eq!(eval("Nope || true", &env), Value::Bool(true));
        assert_eq!(eval("Nope || false", &env), Value::Undefined);
        assert_eq!(eval("false && Nope", &env), Value::Bool(false));
    }

    #[test]
    fn test_case_insensitive_lookup_and_string_compare() {
        let env = MapEnv::new(0).with("Owner", "Alice");
        assert!(parse("owner == \"alice\"").unwrap().matches(&env));
        assert!(!parse("owner =?= \"alice\"").unwrap().matches(&env));
    }

    #[test]
    fn test_time_arithmetic() {
        let env = MapEnv::new(1_000).with("CompletionDate", 900i64);
        assert_eq!(eval("time() - CompletionDate", &env), Value::Int(100));
        assert!(parse("time() - CompletionDate < 101").unwrap().matches(&env));
        assert!(!parse("time() - CompletionDate < 100").unwrap().matches(&env));
    }

    #[test]
    fn test_type_mismatch_is_error() {
        let env = MapEnv::new(0).with("s", "x");
        assert_eq!(eval("s + 1", &env), Value::Error);
        assert_eq!(eval("s < 1", &env), Value::Error);
        assert_eq!(eval("!s", &env), Value::Error);
        assert_eq!(eval("s && true", &env), Value::Error);
    }

    #[test]
    fn test_mixed_numeric_compare() {
        let env = MapEnv::new(0).with("x", 2i64);
        assert!(parse("x == 2.0").unwrap().matches(&env));
        assert!(!parse("x =?= 2.0").unwrap().matches(&env));
    }
}
