//! System catalog
//!
//! Manages table schemas, column types and the metadata tables.

pub mod catalog;
pub mod schema;
pub mod types;

pub use catalog::{
    is_metadata, Catalog, META_INDEXES, META_INSERT_STACK, META_LENGTH, META_LOCKS, META_PREFIX,
    TRIGGERS,
};
pub use schema::{Column, Schema};
pub use types::DataType;
