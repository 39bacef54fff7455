//! Expression language for sequence-flow conditions and task assignees.
//!
//! Expressions are written `${...}` (or `#{...}`) and support boolean
//! logic, comparisons, literals and variable references:
//!
//! ```text
//! ${approved}
//! ${!approved}
//! ${nrOfHolidays > 5 && employee != 'Reto'}
//! ${amount le 1000 or (priority == "high")}
//! ```
//!
//! Text that is not wrapped in `${...}` is a string literal, so a fixed
//! assignee like `kermit` evaluates to itself.

use nom::{
    branch::alt,
    bytes::complete::{tag, take_while},
    character::complete::{char, digit1, multispace0, satisfy},
    combinator::{all_consuming, map, not, opt, recognize, value},
    multi::many0,
    sequence::{delimited, pair, preceded, terminated},
    IResult,
};

use crate::types::{VariableValue, Variables};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExprError {
    #[error("Syntax error in '{expr}': {message}")]
    Syntax { expr: String, message: String },

    #[error("Unknown variable '{0}'")]
    UnknownVariable(String),

    #[error("Operator '{op}' cannot be applied to {left} and {right}")]
    TypeMismatch {
        op: &'static str,
        left: &'static str,
        right: &'static str,
    },

    #[error("Expected a boolean but the expression produced {0}")]
    NotBoolean(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpOp {
    fn symbol(self) -> &'static str {
        match self {
            CmpOp::Eq => "==",
            CmpOp::Ne => "!=",
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(VariableValue),
    Var(String),
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Cmp(CmpOp, Box<Expr>, Box<Expr>),
}

// =============================================================================
// PARSER ENTRY POINT
// =============================================================================

/// Parse an expression string. Non-`${}` text becomes a string literal.
pub fn parse_expression(text: &str) -> Result<Expr, ExprError> {
    let trimmed = text.trim();
    let body = match strip_delimiters(trimmed) {
        Some(body) => body,
        None => return Ok(Expr::Literal(VariableValue::String(trimmed.to_string()))),
    };

    match all_consuming(ws(or_expr))(body) {
        Ok((_, expr)) => Ok(expr),
        Err(e) => Err(ExprError::Syntax {
            expr: trimmed.to_string(),
            message: e.to_string(),
        }),
    }
}

/// True when the text is a `${...}` / `#{...}` expression rather than a literal.
pub fn is_expression(text: &str) -> bool {
    strip_delimiters(text.trim()).is_some()
}

fn strip_delimiters(text: &str) -> Option<&str> {
    text.strip_prefix("${")
        .or_else(|| text.strip_prefix("#{"))
        .and_then(|rest| rest.strip_suffix('}'))
}

// =============================================================================
// GRAMMAR
// =============================================================================

fn ws<'a, O, F>(inner: F) -> impl FnMut(&'a str) -> IResult<&'a str, O>
where
    F: FnMut(&'a str) -> IResult<&'a str, O>,
{
    delimited(multispace0, inner, multispace0)
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// A word operator such as `and`; must not run into an identifier.
fn keyword<'a>(kw: &'static str) -> impl FnMut(&'a str) -> IResult<&'a str, &'a str> {
    terminated(tag(kw), not(satisfy(is_ident_char)))
}

fn or_expr(input: &str) -> IResult<&str, Expr> {
    let (input, first) = and_expr(input)?;
    let (input, rest) = many0(preceded(ws(alt((tag("||"), keyword("or")))), and_expr))(input)?;
    let expr = rest
        .into_iter()
        .fold(first, |acc, rhs| Expr::Or(Box::new(acc), Box::new(rhs)));
    Ok((input, expr))
}

fn and_expr(input: &str) -> IResult<&str, Expr> {
    let (input, first) = cmp_expr(input)?;
    let (input, rest) = many0(preceded(ws(alt((tag("&&"), keyword("and")))), cmp_expr))(input)?;
    let expr = rest
        .into_iter()
        .fold(first, |acc, rhs| Expr::And(Box::new(acc), Box::new(rhs)));
    Ok((input, expr))
}

fn cmp_op(input: &str) -> IResult<&str, CmpOp> {
    alt((
        value(CmpOp::Le, tag("<=")),
        value(CmpOp::Ge, tag(">=")),
        value(CmpOp::Eq, tag("==")),
        value(CmpOp::Ne, tag("!=")),
        value(CmpOp::Lt, tag("<")),
        value(CmpOp::Gt, tag(">")),
        value(CmpOp::Eq, keyword("eq")),
        value(CmpOp::Ne, keyword("ne")),
        value(CmpOp::Le, keyword("le")),
        value(CmpOp::Ge, keyword("ge")),
        value(CmpOp::Lt, keyword("lt")),
        value(CmpOp::Gt, keyword("gt")),
    ))(input)
}

fn cmp_expr(input: &str) -> IResult<&str, Expr> {
    let (input, left) = unary_expr(input)?;
    let (input, tail) = opt(pair(ws(cmp_op), unary_expr))(input)?;
    let expr = match tail {
        Some((op, right)) => Expr::Cmp(op, Box::new(left), Box::new(right)),
        None => left,
    };
    Ok((input, expr))
}

fn unary_expr(input: &str) -> IResult<&str, Expr> {
    alt((
        map(
            preceded(ws(alt((tag("!"), keyword("not")))), unary_expr),
            |e| Expr::Not(Box::new(e)),
        ),
        ws(primary),
    ))(input)
}

fn primary(input: &str) -> IResult<&str, Expr> {
    alt((
        delimited(char('('), ws(or_expr), char(')')),
        number,
        map(string_literal, |s| {
            Expr::Literal(VariableValue::String(s.to_string()))
        }),
        word,
    ))(input)
}

fn number(input: &str) -> IResult<&str, Expr> {
    let (rest, text) = recognize(pair(
        pair(opt(char('-')), digit1),
        opt(pair(char('.'), digit1)),
    ))(input)?;
    let literal = if text.contains('.') {
        text.parse::<f64>().ok().map(VariableValue::Double)
    } else {
        text.parse::<i64>().ok().map(VariableValue::Integer)
    };
    match literal {
        Some(v) => Ok((rest, Expr::Literal(v))),
        None => Err(nom::Err::Error(nom::error::Error::new(
            input,
            nom::error::ErrorKind::Digit,
        ))),
    }
}

fn string_literal(input: &str) -> IResult<&str, &str> {
    alt((
        delimited(char('\''), take_while(|c| c != '\''), char('\'')),
        delimited(char('"'), take_while(|c| c != '"'), char('"')),
    ))(input)
}

/// Identifier or one of the keyword literals `true`, `false`, `null`.
fn word(input: &str) -> IResult<&str, Expr> {
    let (rest, ident) = recognize(pair(
        satisfy(|c| c.is_alphabetic() || c == '_'),
        take_while(is_ident_char),
    ))(input)?;
    let expr = match ident {
        "true" => Expr::Literal(VariableValue::Bool(true)),
        "false" => Expr::Literal(VariableValue::Bool(false)),
        "null" => Expr::Literal(VariableValue::Null),
        _ => Expr::Var(ident.to_string()),
    };
    Ok((rest, expr))
}

// =============================================================================
// EVALUATION
// =============================================================================

pub fn evaluate(expr: &Expr, vars: &Variables) -> Result<VariableValue, ExprError> {
    match expr {
        Expr::Literal(v) => Ok(v.clone()),
        Expr::Var(name) => vars
            .get(name)
            .cloned()
            .ok_or_else(|| ExprError::UnknownVariable(name.clone())),
        Expr::Not(inner) => Ok(VariableValue::Bool(!as_bool(&evaluate(inner, vars)?)?)),
        Expr::And(l, r) => {
            if !as_bool(&evaluate(l, vars)?)? {
                return Ok(VariableValue::Bool(false));
            }
            Ok(VariableValue::Bool(as_bool(&evaluate(r, vars)?)?))
        }
        Expr::Or(l, r) => {
            if as_bool(&evaluate(l, vars)?)? {
                return Ok(VariableValue::Bool(true));
            }
            Ok(VariableValue::Bool(as_bool(&evaluate(r, vars)?)?))
        }
        Expr::Cmp(op, l, r) => {
            let left = evaluate(l, vars)?;
            let right = evaluate(r, vars)?;
            compare(*op, &left, &right).map(VariableValue::Bool)
        }
    }
}

/// Evaluate a sequence-flow condition; the result must be boolean.
pub fn evaluate_condition(expr: &Expr, vars: &Variables) -> Result<bool, ExprError> {
    as_bool(&evaluate(expr, vars)?)
}

fn as_bool(v: &VariableValue) -> Result<bool, ExprError> {
    v.as_bool().ok_or(ExprError::NotBoolean(v.type_name()))
}

fn as_f64(v: &VariableValue) -> Option<f64> {
    match v {
        VariableValue::Integer(n) => Some(*n as f64),
        VariableValue::Double(d) => Some(*d),
        _ => None,
    }
}

fn compare(op: CmpOp, left: &VariableValue, right: &VariableValue) -> Result<bool, ExprError> {
    use std::cmp::Ordering;

    let ordering = match (left, right) {
        (VariableValue::Integer(a), VariableValue::Integer(b)) => Some(a.cmp(b)),
        (VariableValue::String(a), VariableValue::String(b)) => Some(a.cmp(b)),
        _ => match (as_f64(left), as_f64(right)) {
            (Some(a), Some(b)) => a.partial_cmp(&b),
            _ => None,
        },
    };

    match (op, ordering) {
        (CmpOp::Eq, Some(o)) => Ok(o == Ordering::Equal),
        (CmpOp::Ne, Some(o)) => Ok(o != Ordering::Equal),
        (CmpOp::Eq, None) => Ok(left == right),
        (CmpOp::Ne, None) => Ok(left != right),
        (CmpOp::Lt, Some(o)) => Ok(o == Ordering::Less),
        (CmpOp::Le, Some(o)) => Ok(o != Ordering::Greater),
        (CmpOp::Gt, Some(o)) => Ok(o == Ordering::Greater),
        (CmpOp::Ge, Some(o)) => Ok(o != Ordering::Less),
        (_, None) => Err(ExprError::TypeMismatch {
            op: op.symbol(),
            left: left.type_name(),
            right: right.type_name(),
        }),
    }
}
