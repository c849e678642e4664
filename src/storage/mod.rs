//! Storage layer for CairnDB
//!
//! This module handles:
//! - Values and rows
//! - Row store tables with tombstone slots
//! - B+ tree primary-key index
//! - Persisted units on disk

pub mod btree;
pub mod codec;
pub mod disk;
pub mod table;
pub mod tuple;

pub use btree::{BPlusTree, ScanOrder};
pub use disk::DiskManager;
pub use table::{Projection, SelectSpec, Slot, Table};
pub use tuple::{Tuple, Value};
