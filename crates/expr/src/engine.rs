use crate::ast::{Bindings, Expr};
use crate::errors::Result;
use crate::parser::parse;

use log::debug;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, RwLock};

/// Default number of parsed expressions kept by an engine
pub const DEFAULT_CACHE_CAPACITY: usize = 1024;

/// Parses, evaluates and differentiates user expressions.
///
/// Parsed trees are cached by source text and shared through `Arc`, the engine
/// is meant to be shared by handle between constraint sets and concurrent runs.
/// The cache is flushed once it holds `capacity` trees, handed out trees stay valid.
#[derive(Debug)]
pub struct ExpressionEngine {
    cache: RwLock<HashMap<String, Arc<Expr>>>,
    capacity: usize,
}

impl Default for ExpressionEngine {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CACHE_CAPACITY)
    }
}

impl ExpressionEngine {
    /// Constructor of an engine with an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Engine caching at most `capacity` parsed expressions, 0 disables the cache
    pub fn with_capacity(capacity: usize) -> Self {
        ExpressionEngine {
            cache: RwLock::new(HashMap::new()),
            capacity,
        }
    }

    /// Parses `src` or returns the cached tree of a previous parse
    pub fn parse(&self, src: &str) -> Result<Arc<Expr>> {
        if let Some(expr) = self
            .cache
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(src)
        {
            return Ok(Arc::clone(expr));
        }
        let expr = Arc::new(parse(src)?);
        debug!("Parsed expression '{src}' as {expr}");
        if self.capacity == 0 {
            return Ok(expr);
        }
        let mut cache = self.cache.write().unwrap_or_else(|e| e.into_inner());
        if cache.len() >= self.capacity && !cache.contains_key(src) {
            debug!("Expression cache full ({} entries), flushed", cache.len());
            cache.clear();
        }
        Ok(Arc::clone(cache.entry(src.to_string()).or_insert(expr)))
    }

    /// Drops every cached expression
    pub fn clear(&self) {
        self.cache.write().unwrap_or_else(|e| e.into_inner()).clear();
    }

    /// Sorted set of free variables of `expr`
    pub fn free_variables(&self, expr: &Expr) -> BTreeSet<String> {
        expr.free_variables()
    }

    /// Evaluates `expr` against `bindings`
    pub fn evaluate(&self, expr: &Expr, bindings: &impl Bindings) -> Result<f64> {
        expr.evaluate(bindings)
    }

    /// Parses and evaluates in one go
    pub fn evaluate_str(&self, src: &str, bindings: &impl Bindings) -> Result<f64> {
        self.parse(src)?.evaluate(bindings)
    }

    /// Symbolic partial derivatives of `expr` with respect to each of `vars`
    pub fn gradient<S: AsRef<str>>(&self, expr: &Expr, vars: &[S]) -> BTreeMap<String, Expr> {
        vars.iter()
            .map(|v| (v.as_ref().to_string(), expr.derivative(v.as_ref())))
            .collect()
    }

    /// Number of cached expressions
    pub fn cache_size(&self) -> usize {
        self.cache.read().unwrap_or_else(|e| e.into_inner()).len()
    }
}
