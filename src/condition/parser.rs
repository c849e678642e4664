//! Condition parser
//!
//! Parses `<side><op><side>` comparison text such as `age>20` or
//! `"bob"==name`. Two-character operators are tried before their one
//! character prefixes.

use nom::{
    branch::alt,
    bytes::complete::{tag, take_till1},
    combinator::{all_consuming, map, value},
    sequence::tuple,
    IResult,
};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Comparison operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareOp {
    Lt,
    Le,
    Eq,
    Ge,
    Gt,
}

impl CompareOp {
    /// Canonical operator text
    pub fn symbol(&self) -> &'static str {
        match self {
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Eq => "==",
            CompareOp::Ge => ">=",
            CompareOp::Gt => ">",
        }
    }

    /// The operator that holds with the operands swapped
    pub fn flip(self) -> CompareOp {
        match self {
            CompareOp::Lt => CompareOp::Gt,
            CompareOp::Le => CompareOp::Ge,
            CompareOp::Eq => CompareOp::Eq,
            CompareOp::Ge => CompareOp::Le,
            CompareOp::Gt => CompareOp::Lt,
        }
    }

    /// Whether `left <op> right` holds given `left.cmp(right)`
    pub fn holds(self, ordering: Ordering) -> bool {
        match self {
            CompareOp::Lt => ordering == Ordering::Less,
            CompareOp::Le => ordering != Ordering::Greater,
            CompareOp::Eq => ordering == Ordering::Equal,
            CompareOp::Ge => ordering != Ordering::Less,
            CompareOp::Gt => ordering == Ordering::Greater,
        }
    }
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// A parsed, unresolved condition; either side may name a column
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Condition {
    pub left: String,
    pub op: CompareOp,
    pub right: String,
}

fn is_operator_char(c: char) -> bool {
    matches!(c, '<' | '>' | '=' | '!')
}

fn operand(input: &str) -> IResult<&str, &str> {
    map(take_till1(is_operator_char), str::trim)(input)
}

fn operator(input: &str) -> IResult<&str, CompareOp> {
    alt((
        value(CompareOp::Le, tag("<=")),
        value(CompareOp::Ge, tag(">=")),
        value(CompareOp::Eq, tag("==")),
        value(CompareOp::Lt, tag("<")),
        value(CompareOp::Gt, tag(">")),
        value(CompareOp::Eq, tag("=")),
    ))(input)
}

fn condition(input: &str) -> IResult<&str, (&str, CompareOp, &str)> {
    all_consuming(tuple((operand, operator, operand)))(input)
}

impl FromStr for Condition {
    type Err = Error;

    fn from_str(text: &str) -> Result<Self> {
        match condition(text) {
            Ok((_, (left, op, right))) if !left.is_empty() && !right.is_empty() => Ok(Condition {
                left: left.to_string(),
                op,
                right: right.to_string(),
            }),
            Ok(_) => Err(Error::InvalidCondition(format!(
                "'{}' is missing an operand",
                text
            ))),
            Err(_) if text.contains('!') || !text.contains(&['<', '>', '='][..]) => {
                Err(Error::UnknownOperator(text.to_string()))
            }
            Err(_) => Err(Error::InvalidCondition(format!(
                "cannot parse '{}'",
                text
            ))),
        }
    }
}

/// Remove one pair of matching surrounding quotes
pub fn unquote(text: &str) -> &str {
    for quote in ['"', '\''] {
        if text.len() >= 2 && text.starts_with(quote) && text.ends_with(quote) {
            return &text[1..text.len() - 1];
        }
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> Condition {
        text.parse().unwrap()
    }

    #[test]
    fn test_parse_each_operator() {
        assert_eq!(parse("age<30").op, CompareOp::Lt);
        assert_eq!(parse("age<=30").op, CompareOp::Le);
        assert_eq!(parse("age==30").op, CompareOp::Eq);
        assert_eq!(parse("age>=30").op, CompareOp::Ge);
        assert_eq!(parse("age>30").op, CompareOp::Gt);
        assert_eq!(parse("age=30").op, CompareOp::Eq);
    }

    #[test]
    fn test_two_char_operator_wins() {
        let cond = parse("age <= 30");
        assert_eq!(cond.left, "age");
        assert_eq!(cond.op, CompareOp::Le);
        assert_eq!(cond.right, "30");
    }

    #[test]
    fn test_value_on_left() {
        let cond = parse("'bob'==name");
        assert_eq!(cond.left, "'bob'");
        assert_eq!(cond.right, "name");
    }

    #[test]
    fn test_rejects_unknown_operator() {
        assert!(matches!(
            "age!=3".parse::<Condition>(),
            Err(Error::UnknownOperator(_))
        ));
        assert!(matches!(
            "age 3".parse::<Condition>(),
            Err(Error::UnknownOperator(_))
        ));
    }

    #[test]
    fn test_rejects_malformed() {
        assert!(matches!(
            "age=>3".parse::<Condition>(),
            Err(Error::InvalidCondition(_))
        ));
        assert!(matches!(
            " <3".parse::<Condition>(),
            Err(Error::InvalidCondition(_))
        ));
        assert!(matches!(
            "a<b<c".parse::<Condition>(),
            Err(Error::InvalidCondition(_))
        ));
    }

    #[test]
    fn test_flip_and_holds() {
        assert_eq!(CompareOp::Lt.flip(), CompareOp::Gt);
        assert_eq!(CompareOp::Ge.flip(), CompareOp::Le);
        assert!(CompareOp::Le.holds(Ordering::Equal));
        assert!(!CompareOp::Gt.holds(Ordering::Equal));
    }

    #[test]
    fn test_unquote() {
        assert_eq!(unquote("\"a b\""), "a b");
        assert_eq!(unquote("'x'"), "x");
        assert_eq!(unquote("'x\""), "'x\"");
        assert_eq!(unquote("\""), "\"");
    }
}
