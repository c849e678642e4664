//! Database configuration
//!
//! Where a database lives on disk, how wide its B+ tree nodes are and which
//! process identity its lock records carry.

use std::path::PathBuf;

use crate::error::{Error, Result};

/// Default directory holding every database directory
pub const DEFAULT_DATA_ROOT: &str = "dbdata";

/// Default branching order of primary-key indexes
pub const DEFAULT_BTREE_ORDER: usize = 3;

/// Environment variable overriding the data root
pub const ENV_DATA_ROOT: &str = "CAIRNDB_DATA_ROOT";

/// Environment variable overriding the B+ tree order
pub const ENV_BTREE_ORDER: &str = "CAIRNDB_BTREE_ORDER";

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Database name
    pub name: String,
    /// Directory containing `<name>_db`
    pub data_root: PathBuf,
    /// Maximum number of children per B+ tree node
    pub btree_order: usize,
    /// Lock owner identity; the OS process id when unset
    pub process_id: Option<u32>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            data_root: PathBuf::from(DEFAULT_DATA_ROOT),
            btree_order: DEFAULT_BTREE_ORDER,
            process_id: None,
        }
    }
}

impl DatabaseConfig {
    /// Create a config for the named database with default values
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Set the data root
    pub fn data_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.data_root = root.into();
        self
    }

    /// Set the B+ tree order
    pub fn btree_order(mut self, order: usize) -> Self {
        self.btree_order = order;
        self
    }

    /// Set the lock owner identity
    pub fn process_id(mut self, pid: u32) -> Self {
        self.process_id = Some(pid);
        self
    }

    /// Apply `CAIRNDB_DATA_ROOT` and `CAIRNDB_BTREE_ORDER` when present
    pub fn with_env_overrides(mut self) -> Result<Self> {
        if let Ok(root) = std::env::var(ENV_DATA_ROOT) {
            self.data_root = PathBuf::from(root);
        }
        if let Ok(order) = std::env::var(ENV_BTREE_ORDER) {
            self.btree_order = order.trim().parse().map_err(|_| {
                Error::InvalidConfig(format!("{} must be an integer, got '{}'", ENV_BTREE_ORDER, order))
            })?;
        }
        Ok(self)
    }

    /// Directory holding this database's units
    pub fn database_dir(&self) -> PathBuf {
        self.data_root.join(format!("{}_db", self.name))
    }

    /// Identity recorded in lock records
    pub fn owner_pid(&self) -> u32 {
        self.process_id.unwrap_or_else(std::process::id)
    }

    /// Reject configurations the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::InvalidConfig("database name is empty".to_string()));
        }
        if self.btree_order < 3 {
            return Err(Error::InvalidConfig(format!(
                "btree order must be at least 3, got {}",
                self.btree_order
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_database_dir() {
        let config = DatabaseConfig::new("school").data_root("/tmp/data");
        assert_eq!(config.database_dir(), PathBuf::from("/tmp/data/school_db"));
    }

    #[test]
    fn test_owner_pid_override() {
        assert_eq!(DatabaseConfig::new("x").owner_pid(), std::process::id());
        assert_eq!(DatabaseConfig::new("x").process_id(7).owner_pid(), 7);
    }

    #[test]
    fn test_validate() {
        assert!(DatabaseConfig::new("x").validate().is_ok());
        assert!(matches!(
            DatabaseConfig::new("x").btree_order(2).validate(),
            Err(Error::InvalidConfig(_))
        ));
        assert!(matches!(
            DatabaseConfig::new(" ").validate(),
            Err(Error::InvalidConfig(_))
        ));
    }
}
