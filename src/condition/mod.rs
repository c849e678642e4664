//! Condition module
//!
//! This module parses comparison conditions and resolves them into
//! predicates over a table's rows.

pub mod parser;
pub mod predicate;

pub use parser::{CompareOp, Condition};
pub use predicate::{JoinPredicate, Predicate};
