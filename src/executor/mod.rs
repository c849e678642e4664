//! Query execution module
//!
//! This module contains the access-path planner, trigger dispatch and the
//! operator surface.

pub mod csv;
pub mod executor;
pub mod planner;
pub mod trigger;

pub use executor::{Access, ExecutionEngine, SelectQuery, TableSource};
pub use planner::{IndexLookup, QueryPlan};
pub use trigger::{LogTriggerHandler, TriggerAction, TriggerDispatcher, TriggerHandler, TriggerTiming};
