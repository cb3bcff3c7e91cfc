//! Restricted expression language.
//!
//! Conditions, rule checks and query filters are written in a small SQL-like
//! subset (comparisons, `AND`/`OR`/`NOT`, `IS NULL`, `IN`, `LIKE`, basic
//! arithmetic) and evaluated against JSON scopes.

pub mod ast;
pub mod eval;
pub mod parser;
pub mod template;

pub use ast::{BinaryOp, Expr};
pub use eval::{evaluate, evaluate_bool, resolve_path};
pub use parser::parse_expression;
