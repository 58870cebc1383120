//! This library implements the symbolic expression engine and the constraint set
//! used by tunebox to describe objectives and constraints as user-supplied text.
//!
//! Expressions are parsed by a small recursive descent parser into a closed
//! tree ([Expr]) made of constants, variables, arithmetic operators and a fixed
//! allow-list of functions: `sin`, `cos`, `tan`, `log`, `exp`, `sqrt`, `abs` and
//! `power`. Anything else is rejected with [ExprError::ExpressionSyntaxError],
//! no user text is ever executed.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use tunebox_expr::{ConstraintSet, ExpressionEngine};
//!
//! let engine = Arc::new(ExpressionEngine::new());
//! let mut constraints = ConstraintSet::new(engine, vec!["x".to_string(), "y".to_string()]);
//! constraints.add("capacity", "inequality", "x + y", 3., None).unwrap();
//!
//! assert!(constraints.is_feasible(&[1., 2.]));
//! assert_eq!(constraints.penalty(&[1., 2.]), 0.);
//! // quadratic penalty with the default 1e6 weight
//! assert_eq!(constraints.penalty(&[2., 2.]), 1e6);
//! ```
#![warn(missing_docs)]
#![warn(rustdoc::broken_intra_doc_links)]
mod ast;
mod constraints;
mod engine;
mod errors;
mod parser;

pub use ast::{BinOp, Bindings, BoundExpr, Expr, Func};
pub use constraints::*;
pub use engine::{ExpressionEngine, DEFAULT_CACHE_CAPACITY};
pub use errors::*;
pub use parser::{parse, MAX_NESTING_DEPTH};
