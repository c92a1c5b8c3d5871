//! Expression tree and rendering.
//!
//! Expressions are built with the combinators on [`Expr`] and rendered to the
//! queue's textual syntax with `Display`. Rendering inserts parentheses only
//! where precedence requires them, so the output re-parses to the same tree.

use std::fmt;

use crate::value::Value;

/// Binary operators, in the queue's syntax
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    /// `=?=`: identical type and value, never undefined
    MetaEq,
    /// `=!=`: negation of `=?=`
    MetaNe,
    And,
    Or,
}

impl BinOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
            BinOp::MetaEq => "=?=",
            BinOp::MetaNe => "=!=",
            BinOp::And => "&&",
            BinOp::Or => "||",
        }
    }

    /// Binding strength; higher binds tighter.
    pub(crate) fn precedence(&self) -> u8 {
        match self {
            BinOp::Or => 1,
            BinOp::And => 2,
            BinOp::Eq | BinOp::Ne | BinOp::MetaEq | BinOp::MetaNe => 3,
            BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => 4,
            BinOp::Add | BinOp::Sub => 5,
        }
    }

    fn is_associative(&self) -> bool {
        matches!(self, BinOp::And | BinOp::Or | BinOp::Add)
    }

    fn is_comparison(&self) -> bool {
        self.precedence() == 3 || self.precedence() == 4
    }
}

/// An expression of the queue's expression language
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Lit(Value),
    Attr(String),
    /// `time()`: seconds since the epoch, as seen by the evaluator
    Time,
    Not(Box<Expr>),
    Neg(Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
}

const UNARY_PRECEDENCE: u8 = 6;

impl Expr {
    // === Leaves ===

    pub fn attr(name: impl Into<String>) -> Self {
        Expr::Attr(name.into())
    }

    pub fn int(value: i64) -> Self {
        Expr::Lit(Value::Int(value))
    }

    pub fn real(value: f64) -> Self {
        Expr::Lit(Value::Real(value))
    }

    pub fn string(value: impl Into<String>) -> Self {
        Expr::Lit(Value::Str(value.into()))
    }

    pub fn boolean(value: bool) -> Self {
        Expr::Lit(Value::Bool(value))
    }

    pub fn undefined() -> Self {
        Expr::Lit(Value::Undefined)
    }

    pub fn time() -> Self {
        Expr::Time
    }

    // === Combinators ===

    fn binary(self, op: BinOp, rhs: Expr) -> Self {
        Expr::Binary(op, Box::new(self), Box::new(rhs))
    }

    pub fn and(self, rhs: Expr) -> Self {
        self.binary(BinOp::And, rhs)
    }

    pub fn or(self, rhs: Expr) -> Self {
        self.binary(BinOp::Or, rhs)
    }

    pub fn equals(self, rhs: Expr) -> Self {
        self.binary(BinOp::Eq, rhs)
    }

    pub fn not_equals(self, rhs: Expr) -> Self {
        self.binary(BinOp::Ne, rhs)
    }

    pub fn less_than(self, rhs: Expr) -> Self {
        self.binary(BinOp::Lt, rhs)
    }

    pub fn less_or_equal(self, rhs: Expr) -> Self {
        self.binary(BinOp::Le, rhs)
    }

    pub fn greater_than(self, rhs: Expr) -> Self {
        self.binary(BinOp::Gt, rhs)
    }

    pub fn greater_or_equal(self, rhs: Expr) -> Self {
        self.binary(BinOp::Ge, rhs)
    }

    pub fn plus(self, rhs: Expr) -> Self {
        self.binary(BinOp::Add, rhs)
    }

    pub fn minus(self, rhs: Expr) -> Self {
        self.binary(BinOp::Sub, rhs)
    }

    /// `self =?= rhs`
    pub fn is(self, rhs: Expr) -> Self {
        self.binary(BinOp::MetaEq, rhs)
    }

    /// `self =!= rhs`
    pub fn is_not(self, rhs: Expr) -> Self {
        self.binary(BinOp::MetaNe, rhs)
    }

    /// `self =?= UNDEFINED`
    pub fn is_undefined(self) -> Self {
        self.is(Expr::undefined())
    }

    pub fn negated(self) -> Self {
        Expr::Not(Box::new(self))
    }

    /// Fold a sequence of expressions with `||`. Returns `false` for an empty sequence.
    pub fn any(exprs: impl IntoIterator<Item = Expr>) -> Self {
        exprs
            .into_iter()
            .reduce(|acc, e| acc.or(e))
            .unwrap_or(Expr::boolean(false))
    }

    /// Fold a sequence of expressions with `&&`. Returns `true` for an empty sequence.
    pub fn all(exprs: impl IntoIterator<Item = Expr>) -> Self {
        exprs
            .into_iter()
            .reduce(|acc, e| acc.and(e))
            .unwrap_or(Expr::boolean(true))
    }

    fn precedence(&self) -> u8 {
        match self {
            Expr::Binary(op, _, _) => op.precedence(),
            Expr::Not(_) | Expr::Neg(_) => UNARY_PRECEDENCE,
            Expr::Lit(Value::Int(i)) if *i < 0 => UNARY_PRECEDENCE,
            Expr::Lit(Value::Real(r)) if *r < 0.0 => UNARY_PRECEDENCE,
            _ => u8::MAX,
        }
    }

    /// Names of all attributes referenced by this expression, in order of appearance
    pub fn attributes(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_attributes(&mut out);
        out
    }

    fn collect_attributes<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Expr::Attr(name) => {
                if !out.iter().any(|n| n.eq_ignore_ascii_case(name)) {
                    out.push(name);
                }
            }
            Expr::Not(inner) | Expr::Neg(inner) => inner.collect_attributes(out),
            Expr::Binary(_, lhs, rhs) => {
                lhs.collect_attributes(out);
                rhs.collect_attributes(out);
            }
            Expr::Lit(_) | Expr::Time => {}
        }
    }
}

fn write_child(
    f: &mut fmt::Formatter<'_>,
    child: &Expr,
    parenthesize: bool,
) -> fmt::Result {
    if parenthesize {
        write!(f, "({})", child)
    } else {
        write!(f, "{}", child)
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Lit(value) => write!(f, "{}", value),
            Expr::Attr(name) => write!(f, "{}", name),
            Expr::Time => write!(f, "time()"),
            Expr::Not(inner) => {
                write!(f, "!")?;
                write_child(f, inner, inner.precedence() < UNARY_PRECEDENCE)
            }
            Expr::Neg(inner) => {
                write!(f, "-")?;
                write_child(f, inner, inner.precedence() <= UNARY_PRECEDENCE)
            }
            Expr::Binary(op, lhs, rhs) => {
                let prec = op.precedence();
                let lhs_parens = lhs.precedence() < prec
                    || (lhs.precedence() == prec && op.is_comparison());
                let rhs_parens = rhs.precedence() < prec
                    || (rhs.precedence() == prec && !op.is_associative());
                write_child(f, lhs, lhs_parens)?;
                write!(f, " {} ", op.symbol())?;
                write_child(f, rhs, rhs_parens)
            }
        }
    }
}
