//! Recursive-descent expression parser built on `nom` combinators
//! (spec §4.3.1: arithmetic/boolean grammar, conventional precedence).

use nom::branch::alt;
use nom::bytes::complete::tag;
use nom::character::complete::{alpha1, alphanumeric1, char, digit1, multispace0};
use nom::combinator::{cut, map, opt, recognize, value};
use nom::multi::{many0, separated_list0};
use nom::number::complete::recognize_float;
use nom::sequence::{delimited, pair, preceded, tuple};
use nom::IResult;

use crate::ast::{BinOp, Expr, UnOp};
use crate::error::FormulaError;

fn ws<'a, F, O>(mut inner: F) -> impl FnMut(&'a str) -> IResult<&'a str, O>
where
    F: FnMut(&'a str) -> IResult<&'a str, O>,
{
    move |input| delimited(multispace0, |i| inner(i), multispace0)(input)
}

fn number(input: &str) -> IResult<&str, Expr> {
    map(recognize_float, |s: &str| Expr::Num(s.parse::<f64>().unwrap_or(f64::NAN)))(input)
}

fn identifier(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        alt((alpha1, tag("_"))),
        many0(alt((alphanumeric1, tag("_")))),
    ))(input)
}

fn call_or_ident(input: &str) -> IResult<&str, Expr> {
    let (input, name) = identifier(input)?;
    let (input, args) = opt(delimited(
        ws(char('(')),
        separated_list0(ws(char(',')), expr),
        cut(ws(char(')'))),
    ))(input)?;
    Ok((input, Expr::Call(name.to_string(), args.unwrap_or_default())))
}

fn parens(input: &str) -> IResult<&str, Expr> {
    delimited(ws(char('(')), expr, cut(ws(char(')'))))(input)
}

fn atom(input: &str) -> IResult<&str, Expr> {
    ws(alt((number, call_or_ident, parens)))(input)
}

fn unary(input: &str) -> IResult<&str, Expr> {
    alt((
        map(preceded(ws(char('-')), unary), |e| Expr::Unary(UnOp::Neg, Box::new(e))),
        map(preceded(ws(char('!')), unary), |e| Expr::Unary(UnOp::Not, Box::new(e))),
        atom,
    ))(input)
}

fn binop_level<'a>(
    next: impl Fn(&'a str) -> IResult<&'a str, Expr> + Copy,
    ops: &'a [(&'a str, BinOp)],
) -> impl Fn(&'a str) -> IResult<&'a str, Expr> {
    move |input: &'a str| {
        let (mut input, mut lhs) = next(input)?;
        loop {
            let mut matched = None;
            for (sym, op) in ops {
                if let Ok((rest, _)) = ws(tag::<_, _, nom::error::Error<&str>>(*sym))(input) {
                    matched = Some((rest, *op));
                    break;
                }
            }
            match matched {
                Some((rest, op)) => {
                    let (rest, rhs) = next(rest)?;
                    lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
                    input = rest;
                }
                None => break,
            }
        }
        Ok((input, lhs))
    }
}

fn mul_expr(input: &str) -> IResult<&str, Expr> {
    binop_level(unary, &[("*", BinOp::Mul), ("/", BinOp::Div), ("%", BinOp::Mod)])(input)
}

fn add_expr(input: &str) -> IResult<&str, Expr> {
    binop_level(mul_expr, &[("+", BinOp::Add), ("-", BinOp::Sub)])(input)
}

fn cmp_expr(input: &str) -> IResult<&str, Expr> {
    binop_level(
        add_expr,
        &[
            ("<=", BinOp::Le),
            (">=", BinOp::Ge),
            ("==", BinOp::Eq),
            ("!=", BinOp::Ne),
            ("<", BinOp::Lt),
            (">", BinOp::Gt),
        ],
    )(input)
}

fn and_expr(input: &str) -> IResult<&str, Expr> {
    binop_level(cmp_expr, &[("&&", BinOp::And)])(input)
}

fn or_expr(input: &str) -> IResult<&str, Expr> {
    binop_level(and_expr, &[("||", BinOp::Or)])(input)
}

pub fn expr(input: &str) -> IResult<&str, Expr> {
    or_expr(input)
}

/// Parse a complete expression, requiring the whole (trimmed) input to be consumed.
pub fn parse(source: &str) -> Result<Expr, FormulaError> {
    match expr(source) {
        Ok((rest, e)) if rest.trim().is_empty() => Ok(e),
        Ok((rest, _)) => Err(FormulaError::Parse {
            pos: source.len() - rest.len(),
            reason: format!("unexpected trailing input: {rest:?}"),
        }),
        Err(e) => Err(FormulaError::Parse { pos: 0, reason: e.to_string() }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_arithmetic_with_precedence() {
        let e = parse("1 + 2 * 3").unwrap();
        assert_eq!(
            e,
            Expr::Binary(
                BinOp::Add,
                Box::new(Expr::Num(1.0)),
                Box::new(Expr::Binary(BinOp::Mul, Box::new(Expr::Num(2.0)), Box::new(Expr::Num(3.0))))
            )
        );
    }

    #[test]
    fn parses_calls_with_args() {
        let e = parse("Val(5) + SetVal(6, 1)").unwrap();
        match e {
            Expr::Binary(BinOp::Add, lhs, rhs) => {
                assert_eq!(*lhs, Expr::Call("Val".into(), vec![Expr::Num(5.0)]));
                assert_eq!(*rhs, Expr::Call("SetVal".into(), vec![Expr::Num(6.0), Expr::Num(1.0)]));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn parses_zero_arg_call() {
        assert_eq!(parse("Val()").unwrap(), Expr::Call("Val".into(), vec![]));
    }

    #[test]
    fn rejects_trailing_garbage() {
        assert!(parse("1 + 2)").is_err());
    }

    #[test]
    fn division_parses_as_expected() {
        let e = parse("1/0").unwrap();
        assert_eq!(
            e,
            Expr::Binary(BinOp::Div, Box::new(Expr::Num(1.0)), Box::new(Expr::Num(0.0)))
        );
    }
}
