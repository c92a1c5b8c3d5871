//! classad-lite
//!
//! A small subset of the job queue's expression language: typed values,
//! an expression tree with a precedence-aware renderer, a parser for the
//! rendered form, and three-valued evaluation against an attribute map.

pub mod eval;
pub mod expr;
pub mod parser;
pub mod value;

pub use eval::{Env, MapEnv};
pub use expr::{BinOp, Expr};
pub use parser::{parse, ParseError};
pub use value::{quote, Value};
