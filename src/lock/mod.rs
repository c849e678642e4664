//! Table locking
//!
//! Exclusive per-table locks shared between processes through the
//! `meta_locks` metadata table.

pub mod file_guard;
pub mod lock_manager;

pub use file_guard::FileGuard;
pub use lock_manager::{LockManager, LockMode, LockRecord, LockTable};
