//! CairnDB - a small file-persisted relational engine written in Rust
//!
//! This library provides:
//! - Row store tables with tombstone slot reuse
//! - A primary-key B+ tree index
//! - Exclusive table locks shared between processes
//! - Relational operators with before/after triggers
//! - System catalog with metadata tables

pub mod catalog;
pub mod condition;
pub mod config;
pub mod error;
pub mod executor;
pub mod lock;
pub mod storage;

pub use config::DatabaseConfig;
pub use error::{Error, Result};
pub use executor::{Access, ExecutionEngine, SelectQuery};
