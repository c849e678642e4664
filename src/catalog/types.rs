//! Data types for CairnDB
//!
//! This module defines the column types supported by the database and the
//! coercions that turn arbitrary values into a column's declared type.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::storage::Value;

/// Column data types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    /// 64-bit signed integer
    Int,
    /// 64-bit floating point
    Float,
    /// UTF-8 string
    Str,
    /// Boolean
    Bool,
    /// Ordered list of values
    List,
}

impl DataType {
    /// Lowercase type name, as accepted by `FromStr`
    pub fn name(&self) -> &'static str {
        match self {
            DataType::Int => "int",
            DataType::Float => "float",
            DataType::Str => "str",
            DataType::Bool => "bool",
            DataType::List => "list",
        }
    }

    /// Check if this type is numeric
    pub fn is_numeric(&self) -> bool {
        matches!(self, DataType::Int | DataType::Float)
    }

    /// Coerce a value to this type
    pub fn cast(&self, value: &Value) -> Result<Value> {
        let cast = match (self, value) {
            (DataType::Int, Value::Int(i)) => Some(Value::Int(*i)),
            (DataType::Int, Value::Float(f)) => float_to_int(*f).map(Value::Int),
            (DataType::Int, Value::Bool(b)) => Some(Value::Int(*b as i64)),
            (DataType::Int, Value::Str(s)) => s.trim().parse().ok().map(Value::Int),

            (DataType::Float, Value::Int(i)) => Some(Value::Float(*i as f64)),
            (DataType::Float, Value::Float(f)) => finite_float(*f),
            (DataType::Float, Value::Bool(b)) => Some(Value::Float(if *b { 1.0 } else { 0.0 })),
            (DataType::Float, Value::Str(s)) => s.trim().parse().ok().and_then(finite_float),

            (DataType::Str, Value::Str(s)) => Some(Value::Str(s.clone())),
            (DataType::Str, other) => Some(Value::Str(other.to_string())),

            (DataType::Bool, Value::Bool(b)) => Some(Value::Bool(*b)),
            (DataType::Bool, Value::Int(i)) => Some(Value::Bool(*i != 0)),
            (DataType::Bool, Value::Float(f)) => Some(Value::Bool(*f != 0.0)),
            (DataType::Bool, Value::Str(s)) => parse_bool(s).map(Value::Bool),

            (DataType::List, Value::List(items)) => Some(Value::List(items.clone())),
            (DataType::List, Value::Str(s)) => parse_list(s).map(Value::List),

            _ => None,
        };

        cast.ok_or_else(|| Error::CastError {
            value: value.to_string(),
            to: *self,
        })
    }

    /// Coerce literal text to this type
    pub fn parse_literal(&self, text: &str) -> Result<Value> {
        self.cast(&Value::Str(text.to_string()))
    }
}

/// NaN and infinities have no stored form; `-0.0` is stored as `0.0`
fn finite_float(f: f64) -> Option<Value> {
    if !f.is_finite() {
        return None;
    }
    Some(Value::Float(if f == 0.0 { 0.0 } else { f }))
}

/// Truncate toward zero, refusing values outside the `i64` range
fn float_to_int(f: f64) -> Option<i64> {
    let t = f.trunc();
    // i64::MAX as f64 rounds up to 2^63, which is itself out of range
    if t.is_finite() && t >= i64::MIN as f64 && t < i64::MAX as f64 {
        Some(t as i64)
    } else {
        None
    }
}

fn parse_bool(text: &str) -> Option<bool> {
    match text.trim().to_ascii_lowercase().as_str() {
        "true" | "t" | "1" | "yes" => Some(true),
        "false" | "f" | "0" | "no" => Some(false),
        _ => None,
    }
}

/// `[a, b, c]` with each element inferred as int, float or string
fn parse_list(text: &str) -> Option<Vec<Value>> {
    let inner = text.trim().strip_prefix('[')?.strip_suffix(']')?.trim();
    if inner.is_empty() {
        return Some(Vec::new());
    }
    Some(inner.split(',').map(Value::infer).collect())
}

impl FromStr for DataType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "int" | "integer" => Ok(DataType::Int),
            "float" | "double" => Ok(DataType::Float),
            "str" | "string" | "text" => Ok(DataType::Str),
            "bool" | "boolean" => Ok(DataType::Bool),
            "list" => Ok(DataType::List),
            _ => Err(Error::UnknownType(s.to_string())),
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
