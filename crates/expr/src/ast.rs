//! Closed expression tree produced by the parser.
use crate::errors::{ExprError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;

/// Functions callable from an expression. This is the whole allow-list,
/// `power(a, b)` being parsed as [BinOp::Pow].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Func {
    /// sine
    Sin,
    /// cosine
    Cos,
    /// tangent
    Tan,
    /// natural logarithm
    Log,
    /// exponential
    Exp,
    /// square root
    Sqrt,
    /// absolute value
    Abs,
}

impl Func {
    /// Returns the allow-listed unary function with the given name
    pub fn from_name(name: &str) -> Option<Func> {
        match name {
            "sin" => Some(Func::Sin),
            "cos" => Some(Func::Cos),
            "tan" => Some(Func::Tan),
            "log" => Some(Func::Log),
            "exp" => Some(Func::Exp),
            "sqrt" => Some(Func::Sqrt),
            "abs" => Some(Func::Abs),
            _ => None,
        }
    }

    /// Name as written in expressions
    pub fn name(&self) -> &'static str {
        match self {
            Func::Sin => "sin",
            Func::Cos => "cos",
            Func::Tan => "tan",
            Func::Log => "log",
            Func::Exp => "exp",
            Func::Sqrt => "sqrt",
            Func::Abs => "abs",
        }
    }

    #[inline]
    pub(crate) fn apply(&self, v: f64) -> f64 {
        match self {
            Func::Sin => v.sin(),
            Func::Cos => v.cos(),
            Func::Tan => v.tan(),
            Func::Log => v.ln(),
            Func::Exp => v.exp(),
            Func::Sqrt => v.sqrt(),
            Func::Abs => v.abs(),
        }
    }
}

/// Binary arithmetic operators
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinOp {
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `/`
    Div,
    /// `^`, `**` or `power(a, b)`
    Pow,
}

impl BinOp {
    #[inline]
    pub(crate) fn apply(&self, a: f64, b: f64) -> f64 {
        match self {
            BinOp::Add => a + b,
            BinOp::Sub => a - b,
            BinOp::Mul => a * b,
            BinOp::Div => a / b,
            BinOp::Pow => a.powf(b),
        }
    }

    fn symbol(&self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Pow => "^",
        }
    }
}

/// Expression tree
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    /// Numeric literal
    Const(f64),
    /// Free variable
    Var(String),
    /// Unary minus
    Neg(Box<Expr>),
    /// Allow-listed function call
    Call(Func, Box<Expr>),
    /// Binary operation
    Binary(BinOp, Box<Expr>, Box<Expr>),
}

/// Source of variable values used by [Expr::evaluate]
pub trait Bindings {
    /// Value bound to `name` if any
    fn value_of(&self, name: &str) -> Option<f64>;
}

impl Bindings for HashMap<String, f64> {
    fn value_of(&self, name: &str) -> Option<f64> {
        self.get(name).copied()
    }
}

impl Bindings for std::collections::BTreeMap<String, f64> {
    fn value_of(&self, name: &str) -> Option<f64> {
        self.get(name).copied()
    }
}

impl Expr {
    /// Sorted set of variable names the expression depends on
    pub fn free_variables(&self) -> BTreeSet<String> {
        let mut vars = BTreeSet::new();
        self.collect_variables(&mut vars);
        vars
    }

    fn collect_variables(&self, vars: &mut BTreeSet<String>) {
        match self {
            Expr::Const(_) => (),
            Expr::Var(name) => {
                vars.insert(name.clone());
            }
            Expr::Neg(a) | Expr::Call(_, a) => a.collect_variables(vars),
            Expr::Binary(_, a, b) => {
                a.collect_variables(vars);
                b.collect_variables(vars);
            }
        }
    }

    /// Evaluates the expression against the given bindings.
    ///
    /// Math domain errors (`log(-1)`, `1/0`) give NaN or infinite values, an unbound
    /// variable is an [ExprError::UndefinedVariableError].
    pub fn evaluate(&self, bindings: &impl Bindings) -> Result<f64> {
        Ok(match self {
            Expr::Const(v) => *v,
            Expr::Var(name) => bindings
                .value_of(name)
                .ok_or_else(|| ExprError::UndefinedVariableError(name.clone()))?,
            Expr::Neg(a) => -a.evaluate(bindings)?,
            Expr::Call(f, a) => f.apply(a.evaluate(bindings)?),
            Expr::Binary(op, a, b) => op.apply(a.evaluate(bindings)?, b.evaluate(bindings)?),
        })
    }

    /// Resolves variable names to positions in `variables` once so that the
    /// returned [BoundExpr] evaluates on plain slices.
    pub fn bind<S: AsRef<str>>(&self, variables: &[S]) -> Result<BoundExpr> {
        Ok(BoundExpr {
            root: self.to_node(variables)?,
            arity: variables.len(),
        })
    }

    fn to_node<S: AsRef<str>>(&self, variables: &[S]) -> Result<Node> {
        Ok(match self {
            Expr::Const(v) => Node::Const(*v),
            Expr::Var(name) => Node::Var(
                variables
                    .iter()
                    .position(|v| v.as_ref() == name)
                    .ok_or_else(|| ExprError::UndefinedVariableError(name.clone()))?,
            ),
            Expr::Neg(a) => Node::Neg(Box::new(a.to_node(variables)?)),
            Expr::Call(f, a) => Node::Call(*f, Box::new(a.to_node(variables)?)),
            Expr::Binary(op, a, b) => Node::Binary(
                *op,
                Box::new(a.to_node(variables)?),
                Box::new(b.to_node(variables)?),
            ),
        })
    }

    fn constant(&self) -> Option<f64> {
        match self {
            Expr::Const(v) => Some(*v),
            _ => None,
        }
    }

    /// Symbolic derivative with respect to `var`, constant parts are folded
    pub fn derivative(&self, var: &str) -> Expr {
        match self {
            Expr::Const(_) => Expr::Const(0.),
            Expr::Var(name) => Expr::Const(if name == var { 1. } else { 0. }),
            Expr::Neg(a) => neg(a.derivative(var)),
            Expr::Binary(op, a, b) => {
                let (da, db) = (a.derivative(var), b.derivative(var));
                let (a, b) = (a.as_ref().clone(), b.as_ref().clone());
                match op {
                    BinOp::Add => add(da, db),
                    BinOp::Sub => sub(da, db),
                    BinOp::Mul => add(mul(da, b.clone()), mul(a, db)),
                    BinOp::Div => div(
                        sub(mul(da, b.clone()), mul(a, db)),
                        pow(b, Expr::Const(2.)),
                    ),
                    BinOp::Pow => match (a.constant(), b.constant()) {
                        (_, Some(c)) => mul(mul(Expr::Const(c), pow(a, Expr::Const(c - 1.))), da),
                        (Some(_), None) => mul(mul(pow(a.clone(), b), call(Func::Log, a)), db),
                        (None, None) => mul(
                            pow(a.clone(), b.clone()),
                            add(mul(db, call(Func::Log, a.clone())), div(mul(b, da), a)),
                        ),
                    },
                }
            }
            Expr::Call(f, a) => {
                let da = a.derivative(var);
                let a = a.as_ref().clone();
                let outer = match f {
                    Func::Sin => call(Func::Cos, a),
                    Func::Cos => neg(call(Func::Sin, a)),
                    Func::Tan => div(Expr::Const(1.), pow(call(Func::Cos, a), Expr::Const(2.))),
                    Func::Log => div(Expr::Const(1.), a),
                    Func::Exp => call(Func::Exp, a),
                    Func::Sqrt => div(Expr::Const(1.), mul(Expr::Const(2.), call(Func::Sqrt, a))),
                    Func::Abs => div(a.clone(), call(Func::Abs, a)),
                };
                mul(outer, da)
            }
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Expr::Const(v) if *v < 0. => write!(f, "({v})"),
            Expr::Const(v) => write!(f, "{v}"),
            Expr::Var(name) => write!(f, "{name}"),
            Expr::Neg(a) => write!(f, "-({a})"),
            Expr::Call(func, a) => write!(f, "{}({a})", func.name()),
            Expr::Binary(op, a, b) => write!(f, "({a} {} {b})", op.symbol()),
        }
    }
}

fn is_const(e: &Expr, value: f64) -> bool {
    matches!(e, Expr::Const(v) if *v == value)
}

fn neg(a: Expr) -> Expr {
    match a {
        Expr::Const(v) => Expr::Const(-v),
        Expr::Neg(inner) => *inner,
        a => Expr::Neg(Box::new(a)),
    }
}

fn call(f: Func, a: Expr) -> Expr {
    match a {
        Expr::Const(v) => Expr::Const(f.apply(v)),
        a => Expr::Call(f, Box::new(a)),
    }
}

fn binary(op: BinOp, a: Expr, b: Expr) -> Expr {
    match (a, b) {
        (Expr::Const(x), Expr::Const(y)) => Expr::Const(op.apply(x, y)),
        (a, b) => Expr::Binary(op, Box::new(a), Box::new(b)),
    }
}

fn add(a: Expr, b: Expr) -> Expr {
    if is_const(&a, 0.) {
        b
    } else if is_const(&b, 0.) {
        a
    } else {
        binary(BinOp::Add, a, b)
    }
}

fn sub(a: Expr, b: Expr) -> Expr {
    if is_const(&b, 0.) {
        a
    } else if is_const(&a, 0.) {
        neg(b)
    } else {
        binary(BinOp::Sub, a, b)
    }
}

fn mul(a: Expr, b: Expr) -> Expr {
    if is_const(&a, 0.) || is_const(&b, 0.) {
        Expr::Const(0.)
    } else if is_const(&a, 1.) {
        b
    } else if is_const(&b, 1.) {
        a
    } else {
        binary(BinOp::Mul, a, b)
    }
}

fn div(a: Expr, b: Expr) -> Expr {
    if is_const(&b, 1.) {
        a
    } else if is_const(&a, 0.) && !is_const(&b, 0.) {
        Expr::Const(0.)
    } else {
        binary(BinOp::Div, a, b)
    }
}

fn pow(a: Expr, b: Expr) -> Expr {
    if is_const(&b, 1.) {
        a
    } else if is_const(&b, 0.) {
        Expr::Const(1.)
    } else {
        binary(BinOp::Pow, a, b)
    }
}

#[derive(Clone, Debug)]
enum Node {
    Const(f64),
    Var(usize),
    Neg(Box<Node>),
    Call(Func, Box<Node>),
    Binary(BinOp, Box<Node>, Box<Node>),
}

impl Node {
    #[inline]
    fn eval(&self, x: &[f64]) -> f64 {
        match self {
            Node::Const(v) => *v,
            Node::Var(i) => x[*i],
            Node::Neg(a) => -a.eval(x),
            Node::Call(f, a) => f.apply(a.eval(x)),
            Node::Binary(op, a, b) => op.apply(a.eval(x), b.eval(x)),
        }
    }
}

/// Expression whose variables are resolved to positions in a parameter vector.
#[derive(Clone, Debug)]
pub struct BoundExpr {
    root: Node,
    arity: usize,
}

impl BoundExpr {
    /// Evaluates the expression at `x` ordered as the variables given to [Expr::bind]
    ///
    /// **Panics** if `x` is shorter than the bound variable list.
    #[inline]
    pub fn eval(&self, x: &[f64]) -> f64 {
        self.root.eval(x)
    }

    /// Number of variables the expression was bound to
    pub fn arity(&self) -> usize {
        self.arity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse;
    use approx::assert_abs_diff_eq;

    fn bindings(pairs: &[(&str, f64)]) -> HashMap<String, f64> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn test_free_variables_sorted() {
        let e = parse("z * sin(a) + power(b, 2) - a").unwrap();
        let vars: Vec<_> = e.free_variables().into_iter().collect();
        assert_eq!(vars, vec!["a", "b", "z"]);
    }

    #[test]
    fn test_undefined_variable() {
        let e = parse("x + y").unwrap();
        assert_eq!(
            e.evaluate(&bindings(&[("x", 1.)])),
            Err(ExprError::UndefinedVariableError("y".to_string()))
        );
        assert!(matches!(
            e.bind(&["x"]),
            Err(ExprError::UndefinedVariableError(v)) if v == "y"
        ));
    }

    #[test]
    fn test_bound_matches_tree_evaluation() {
        let e = parse("exp(x / 2) * cos(y) - abs(x - y)^1.5 + sqrt(4)").unwrap();
        let bound = e.bind(&["y", "x"]).unwrap();
        for (x, y) in [(0.5, -1.), (2., 3.), (-1.5, 0.25)] {
            let expected = e.evaluate(&bindings(&[("x", x), ("y", y)])).unwrap();
            assert_abs_diff_eq!(bound.eval(&[y, x]), expected, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_domain_errors_are_not_fatal() {
        let e = parse("log(x) + 1 / y").unwrap();
        let v = e.evaluate(&bindings(&[("x", -1.), ("y", 1.)])).unwrap();
        assert!(v.is_nan());
        let v = e.evaluate(&bindings(&[("x", 1.), ("y", 0.)])).unwrap();
        assert!(v.is_infinite());
    }

    #[test]
    fn test_derivatives() {
        let cases = [
            ("x^3 + 2*x*y", "x", vec![(2., 1.), (-1., 3.)]),
            ("sin(x) * exp(y)", "y", vec![(0.3, 0.2), (1., -1.)]),
            ("log(x) / (1 + y^2)", "x", vec![(0.5, 2.), (3., 0.)]),
            ("sqrt(x*y) + tan(x)", "x", vec![(0.4, 2.), (1.1, 0.5)]),
            ("x^y", "y", vec![(2., 3.), (1.5, 0.5)]),
            ("power(x, y) - abs(x)", "x", vec![(2., 3.), (-1.5, 2.)]),
        ];
        let h = 1e-6;
        for (src, var, points) in cases {
            let e = parse(src).unwrap();
            let d = e.derivative(var);
            for (x, y) in points {
                let at = |dx: f64, dy: f64| {
                    e.evaluate(&bindings(&[("x", x + dx), ("y", y + dy)])).unwrap()
                };
                let fd = if var == "x" {
                    (at(h, 0.) - at(-h, 0.)) / (2. * h)
                } else {
                    (at(0., h) - at(0., -h)) / (2. * h)
                };
                let exact = d.evaluate(&bindings(&[("x", x), ("y", y)])).unwrap();
                assert_abs_diff_eq!(exact, fd, epsilon = 1e-5);
            }
        }
    }

    #[test]
    fn test_derivative_folds_constants() {
        let e = parse("3 * x + y").unwrap();
        assert_eq!(e.derivative("x"), Expr::Const(3.));
        assert_eq!(e.derivative("z"), Expr::Const(0.));
    }

    #[test]
    fn test_display_reparses() {
        let e = parse("-x^2 + power(y, 3) / sin(2 * x) - (-1.5)").unwrap();
        let reparsed = parse(&e.to_string()).unwrap();
        let b = bindings(&[("x", 0.7), ("y", 1.3)]);
        assert_abs_diff_eq!(
            e.evaluate(&b).unwrap(),
            reparsed.evaluate(&b).unwrap(),
            epsilon = 1e-12
        );
    }
}
