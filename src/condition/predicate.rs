//! Resolved predicates
//!
//! A `Condition` names its sides by text; resolving it against a schema
//! decides which side is the column and coerces the other side to the
//! column's declared type.

use super::parser::{unquote, CompareOp, Condition};
use crate::catalog::Schema;
use crate::error::{Error, Result};
use crate::storage::{Table, Tuple, Value};

/// `column <op> literal`, with the literal already cast to the column type
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    pub column: usize,
    pub column_name: String,
    pub op: CompareOp,
    pub value: Value,
}

impl Predicate {
    /// Parse and resolve condition text against a schema
    pub fn parse(text: &str, schema: &Schema) -> Result<Self> {
        Self::resolve(&text.parse()?, schema)
    }

    /// Resolve a parsed condition; exactly one side must name a column
    pub fn resolve(condition: &Condition, schema: &Schema) -> Result<Self> {
        let left = schema.get_column(&condition.left);
        let right = schema.get_column(&condition.right);

        let (column, literal, op) = match (left, right) {
            (Some(col), None) => (col, condition.right.as_str(), condition.op),
            (None, Some(col)) => (col, condition.left.as_str(), condition.op.flip()),
            (Some(_), Some(_)) => {
                return Err(Error::InvalidCondition(format!(
                    "both '{}' and '{}' are columns",
                    condition.left, condition.right
                )))
            }
            (None, None) => {
                return Err(Error::InvalidCondition(format!(
                    "neither '{}' nor '{}' is a column",
                    condition.left, condition.right
                )))
            }
        };

        Ok(Self {
            column: column.position,
            column_name: column.name.clone(),
            op,
            value: column.data_type.parse_literal(unquote(literal))?,
        })
    }

    /// Evaluate against a row; incomparable values never match
    pub fn matches(&self, tuple: &Tuple) -> bool {
        tuple
            .get(self.column)
            .and_then(|v| v.compare(&self.value))
            .map_or(false, |ord| self.op.holds(ord))
    }
}

/// `left.column <op> right.column` between two tables
#[derive(Debug, Clone, PartialEq)]
pub struct JoinPredicate {
    pub left: usize,
    pub op: CompareOp,
    pub right: usize,
}

impl JoinPredicate {
    /// Parse and resolve a join condition; each side names one table's column
    pub fn parse(text: &str, left: &Table, right: &Table) -> Result<Self> {
        let condition: Condition = text.parse()?;

        let forward = (
            join_column(left, &condition.left),
            join_column(right, &condition.right),
        );
        if let (Some(l), Some(r)) = forward {
            return Ok(Self {
                left: l,
                op: condition.op,
                right: r,
            });
        }

        let swapped = (
            join_column(left, &condition.right),
            join_column(right, &condition.left),
        );
        if let (Some(l), Some(r)) = swapped {
            return Ok(Self {
                left: l,
                op: condition.op.flip(),
                right: r,
            });
        }

        Err(Error::InvalidCondition(format!(
            "'{}' must compare a column of '{}' with a column of '{}'",
            text,
            left.name(),
            right.name()
        )))
    }

    /// Evaluate against a pair of rows
    pub fn matches(&self, left: &Tuple, right: &Tuple) -> bool {
        match (left.get(self.left), right.get(self.right)) {
            (Some(l), Some(r)) => l.compare(r).map_or(false, |ord| self.op.holds(ord)),
            _ => false,
        }
    }
}

/// Column index for a bare or `table.column` qualified name
fn join_column(table: &Table, name: &str) -> Option<usize> {
    let schema = table.schema();
    schema.get_column_index(name).or_else(|| {
        name.strip_prefix(table.name())
            .and_then(|rest| rest.strip_prefix('.'))
            .and_then(|column| schema.get_column_index(column))
    })
}
