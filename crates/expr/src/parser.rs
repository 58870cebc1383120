use crate::ast::{BinOp, Expr, Func};
use crate::errors::{ExprError, Result};

/// Nesting depth above which an expression is rejected
pub const MAX_NESTING_DEPTH: usize = 128;

#[derive(Clone, Debug, PartialEq)]
enum Token {
    Number(f64),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    Caret,
    LParen,
    RParen,
    Comma,
    End,
}

fn syntax_error<T>(position: usize, message: impl Into<String>) -> Result<T> {
    Err(ExprError::ExpressionSyntaxError {
        position,
        message: message.into(),
    })
}

fn tokenize(src: &str) -> Result<Vec<(usize, Token)>> {
    let bytes = src.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i];
        let start = i;
        let token = match c {
            b' ' | b'\t' | b'\n' | b'\r' => {
                i += 1;
                continue;
            }
            b'+' => Token::Plus,
            b'-' => Token::Minus,
            b'*' if bytes.get(i + 1) == Some(&b'*') => {
                i += 1;
                Token::Caret
            }
            b'*' => Token::Star,
            b'/' => Token::Slash,
            b'^' => Token::Caret,
            b'(' => Token::LParen,
            b')' => Token::RParen,
            b',' => Token::Comma,
            b'0'..=b'9' | b'.' => {
                while i < bytes.len() && (bytes[i].is_ascii_digit() || bytes[i] == b'.') {
                    i += 1;
                }
                if i < bytes.len() && (bytes[i] == b'e' || bytes[i] == b'E') {
                    let mut j = i + 1;
                    if j < bytes.len() && (bytes[j] == b'+' || bytes[j] == b'-') {
                        j += 1;
                    }
                    if j < bytes.len() && bytes[j].is_ascii_digit() {
                        while j < bytes.len() && bytes[j].is_ascii_digit() {
                            j += 1;
                        }
                        i = j;
                    }
                }
                let text = &src[start..i];
                let value = text.parse::<f64>().or_else(|_| {
                    syntax_error(start, format!("invalid number literal '{text}'"))
                })?;
                tokens.push((start, Token::Number(value)));
                continue;
            }
            c if c.is_ascii_alphabetic() || c == b'_' => {
                while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
                    i += 1;
                }
                tokens.push((start, Token::Ident(src[start..i].to_string())));
                continue;
            }
            _ => {
                let ch = src[start..].chars().next().unwrap_or('?');
                return syntax_error(start, format!("unexpected character '{ch}'"));
            }
        };
        tokens.push((start, token));
        i += 1;
    }
    tokens.push((src.len(), Token::End));
    Ok(tokens)
}

struct Parser {
    tokens: Vec<(usize, Token)>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> &Token {
        &self.tokens[self.pos].1
    }

    fn position(&self) -> usize {
        self.tokens[self.pos].0
    }

    fn advance(&mut self) -> Token {
        let token = self.tokens[self.pos].1.clone();
        if token != Token::End {
            self.pos += 1;
        }
        token
    }

    fn expect(&mut self, expected: Token, what: &str) -> Result<()> {
        if *self.peek() == expected {
            self.advance();
            Ok(())
        } else {
            syntax_error(self.position(), format!("expected {what}"))
        }
    }

    fn enter(&mut self) -> Result<()> {
        self.depth += 1;
        if self.depth > MAX_NESTING_DEPTH {
            return syntax_error(self.position(), "expression nested too deeply");
        }
        Ok(())
    }

    // expr := term (('+' | '-') term)*
    fn expression(&mut self) -> Result<Expr> {
        self.enter()?;
        let mut lhs = self.term()?;
        loop {
            let op = match self.peek() {
                Token::Plus => BinOp::Add,
                Token::Minus => BinOp::Sub,
                _ => break,
            };
            self.advance();
            let rhs = self.term()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        self.depth -= 1;
        Ok(lhs)
    }

    // term := unary (('*' | '/') unary)*
    fn term(&mut self) -> Result<Expr> {
        let mut lhs = self.unary()?;
        loop {
            let op = match self.peek() {
                Token::Star => BinOp::Mul,
                Token::Slash => BinOp::Div,
                _ => break,
            };
            self.advance();
            let rhs = self.unary()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    // unary := ('-' | '+') unary | power
    fn unary(&mut self) -> Result<Expr> {
        match self.peek() {
            Token::Minus => {
                self.advance();
                self.enter()?;
                let operand = self.unary()?;
                self.depth -= 1;
                Ok(match operand {
                    Expr::Const(v) => Expr::Const(-v),
                    e => Expr::Neg(Box::new(e)),
                })
            }
            Token::Plus => {
                self.advance();
                self.enter()?;
                let operand = self.unary();
                self.depth -= 1;
                operand
            }
            _ => self.power(),
        }
    }

    // power := primary ('^' unary)?, right associative
    fn power(&mut self) -> Result<Expr> {
        let base = self.primary()?;
        if *self.peek() == Token::Caret {
            self.advance();
            self.enter()?;
            let exponent = self.unary()?;
            self.depth -= 1;
            return Ok(Expr::Binary(BinOp::Pow, Box::new(base), Box::new(exponent)));
        }
        Ok(base)
    }

    fn primary(&mut self) -> Result<Expr> {
        let position = self.position();
        match self.advance() {
            Token::Number(v) => Ok(Expr::Const(v)),
            Token::LParen => {
                let inner = self.expression()?;
                self.expect(Token::RParen, "')'")?;
                Ok(inner)
            }
            Token::Ident(name) => {
                if *self.peek() == Token::LParen {
                    self.advance();
                    self.call(&name, position)
                } else if name == "power" || Func::from_name(&name).is_some() {
                    syntax_error(position, format!("function '{name}' used without arguments"))
                } else if name == "pi" {
                    Ok(Expr::Const(std::f64::consts::PI))
                } else {
                    Ok(Expr::Var(name))
                }
            }
            Token::End => syntax_error(position, "unexpected end of expression"),
            token => syntax_error(position, format!("unexpected token {token:?}")),
        }
    }

    fn call(&mut self, name: &str, position: usize) -> Result<Expr> {
        let expr = if name == "power" {
            let base = self.expression()?;
            self.expect(Token::Comma, "',' in power(base, exponent)")?;
            let exponent = self.expression()?;
            Expr::Binary(BinOp::Pow, Box::new(base), Box::new(exponent))
        } else if let Some(func) = Func::from_name(name) {
            Expr::Call(func, Box::new(self.expression()?))
        } else {
            return syntax_error(position, format!("function '{name}' is not allowed"));
        };
        self.expect(Token::RParen, "')' closing function call")?;
        Ok(expr)
    }
}

/// Parses an expression made of numbers, variables, `+ - * / ^ **`, parentheses
/// and the allow-listed functions `sin cos tan log exp sqrt abs power`.
///
/// ```
/// use tunebox_expr::parse;
/// use std::collections::HashMap;
///
/// let expr = parse("x + y").unwrap();
/// let bindings = HashMap::from([("x".to_string(), 2.), ("y".to_string(), 3.)]);
/// assert_eq!(expr.evaluate(&bindings).unwrap(), 5.);
///
/// assert!(parse("__import__('os')").is_err());
/// ```
pub fn parse(src: &str) -> Result<Expr> {
    let tokens = tokenize(src)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
    };
    let expr = parser.expression()?;
    if *parser.peek() != Token::End {
        return syntax_error(
            parser.position(),
            format!("unexpected trailing token {:?}", parser.peek()),
        );
    }
    Ok(expr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use std::collections::HashMap;

    fn eval(src: &str, pairs: &[(&str, f64)]) -> f64 {
        let b: HashMap<String, f64> = pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect();
        parse(src).unwrap().evaluate(&b).unwrap()
    }

    #[test]
    fn test_arithmetic() {
        assert_abs_diff_eq!(eval("x + y", &[("x", 2.), ("y", 3.)]), 5.);
        assert_abs_diff_eq!(eval("sin(x)", &[("x", 0.)]), 0., epsilon = 1e-12);
        assert_abs_diff_eq!(eval("1 + 2 * 3 - 4 / 2", &[]), 5.);
        assert_abs_diff_eq!(eval("(1 + 2) * 3", &[]), 9.);
        assert_abs_diff_eq!(eval("2 - 3 - 4", &[]), -5.);
        assert_abs_diff_eq!(eval("1.5e2 + .5 + 2E-1", &[]), 150.7, epsilon = 1e-12);
    }

    #[test]
    fn test_power_precedence() {
        assert_abs_diff_eq!(eval("2^3^2", &[]), 512.);
        assert_abs_diff_eq!(eval("2**3", &[]), 8.);
        assert_abs_diff_eq!(eval("-x^2", &[("x", 3.)]), -9.);
        assert_abs_diff_eq!(eval("2^-1", &[]), 0.5);
        assert_abs_diff_eq!(eval("power(x, 3) * 2", &[("x", 2.)]), 16.);
        assert_abs_diff_eq!(eval("(x - 1)^2 + (y - 2)^2", &[("x", 1.), ("y", 1.)]), 1.);
    }

    #[test]
    fn test_functions_and_constants() {
        assert_abs_diff_eq!(eval("cos(pi)", &[]), -1., epsilon = 1e-12);
        assert_abs_diff_eq!(eval("log(exp(2))", &[]), 2., epsilon = 1e-12);
        assert_abs_diff_eq!(eval("sqrt(abs(-16))", &[]), 4.);
        assert_abs_diff_eq!(eval("tan(0)", &[]), 0.);
        assert_abs_diff_eq!(eval("flow_rate_2 * 2", &[("flow_rate_2", 1.5)]), 3.);
    }

    #[test]
    fn test_rejects_non_allow_listed() {
        for src in [
            "__import__('os')",
            "eval(x)",
            "x.real",
            "open(f)",
            "x; y",
            "a = 1",
            "lambda: 0",
            "x[0]",
            "sinh(x)",
        ] {
            assert!(
                matches!(parse(src), Err(ExprError::ExpressionSyntaxError { .. })),
                "{src} should be rejected"
            );
        }
    }

    #[test]
    fn test_malformed() {
        for src in ["", "x +", "(x + 1", "x + 1)", "2x", "sin", "power(x)", "sin(x, y)", "1..2", "* x"] {
            assert!(
                matches!(parse(src), Err(ExprError::ExpressionSyntaxError { .. })),
                "{src:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_error_position() {
        match parse("x + $y") {
            Err(ExprError::ExpressionSyntaxError { position, .. }) => assert_eq!(position, 4),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_nesting_limit() {
        let deep = format!("{}x{}", "(".repeat(1000), ")".repeat(1000));
        assert!(parse(&deep).is_err());
        let fine = format!("{}x{}", "(".repeat(20), ")".repeat(20));
        assert!(parse(&fine).is_ok());
    }
}
