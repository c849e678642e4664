//! Persisted exclusive table locks
//!
//! Lock records live in the `meta_locks` table so every process sharing a
//! database directory sees them. Each acquire or release re-reads that unit,
//! edits the record map and writes it back while holding the file guard.
//! A conflicting acquire fails immediately; nothing ever waits for a table.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use super::file_guard::FileGuard;
use crate::catalog::catalog::bootstrap_table;
use crate::catalog::{is_metadata, Catalog, META_LOCKS};
use crate::error::{Error, Result};
use crate::storage::{Table, Value};

pub const GUARD_FILE: &str = "meta_locks.guard";

/// Lock mode; only exclusive locks exist
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Exclusive,
}

impl fmt::Display for LockMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockMode::Exclusive => write!(f, "x"),
        }
    }
}

impl FromStr for LockMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "x" => Ok(LockMode::Exclusive),
            other => Err(Error::Corrupted(format!("unknown lock mode '{}'", other))),
        }
    }
}

/// Holder of one table's lock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockRecord {
    pub pid: u32,
    pub mode: LockMode,
}

/// Lock records keyed by table name
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LockTable {
    records: BTreeMap<String, LockRecord>,
}

impl LockTable {
    /// Read the records stored in a `meta_locks` table
    pub fn from_table(table: &Table) -> Result<Self> {
        let mut records = BTreeMap::new();
        for (_, row) in table.live_rows() {
            let (Some(Value::Str(name)), Some(Value::Int(pid)), Some(Value::Str(mode))) =
                (row.get(0), row.get(1), row.get(2))
            else {
                return Err(Error::Corrupted(format!("malformed lock record {:?}", row)));
            };
            let pid = u32::try_from(*pid)
                .map_err(|_| Error::Corrupted(format!("bad lock holder {}", pid)))?;
            records.insert(
                name.clone(),
                LockRecord {
                    pid,
                    mode: mode.parse()?,
                },
            );
        }
        Ok(Self { records })
    }

    /// Render the records as a fresh `meta_locks` table
    pub fn to_table(&self) -> Result<Table> {
        let mut table = bootstrap_table(META_LOCKS)?;
        let mut no_reuse = Vec::new();
        for (name, record) in &self.records {
            table.insert(
                vec![
                    Value::from(name.as_str()),
                    Value::from(record.pid as i64),
                    Value::from(record.mode.to_string()),
                ],
                &mut no_reuse,
            )?;
        }
        Ok(table)
    }

    pub fn get(&self, table: &str) -> Option<&LockRecord> {
        self.records.get(table)
    }

    pub fn insert(&mut self, table: &str, record: LockRecord) {
        self.records.insert(table.to_string(), record);
    }

    pub fn remove(&mut self, table: &str) -> Option<LockRecord> {
        self.records.remove(table)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Lock manager acting for one owner process id
#[derive(Debug, Clone)]
pub struct LockManager {
    owner: u32,
    guard_path: PathBuf,
}

impl LockManager {
    pub fn new(owner: u32, data_dir: &Path) -> Self {
        Self {
            owner,
            guard_path: data_dir.join(GUARD_FILE),
        }
    }

    /// Process id recorded as lock holder
    pub fn owner(&self) -> u32 {
        self.owner
    }

    /// Metadata tables and tables outside the catalog never take part in locking
    pub fn is_exempt(catalog: &Catalog, table: &str) -> bool {
        is_metadata(table) || !catalog.contains(table)
    }

    /// Current persisted records
    pub fn records(&self, catalog: &mut Catalog) -> Result<LockTable> {
        catalog.reload_table(META_LOCKS)?;
        match catalog.get(META_LOCKS) {
            Ok(table) => LockTable::from_table(table),
            Err(_) => Ok(LockTable::default()),
        }
    }

    /// Take the exclusive lock on a table
    ///
    /// Returns `Ok(true)` if this call took the lock and `Ok(false)` if the
    /// table is exempt or already held by this owner; only a call that
    /// returned `true` should release.
    pub fn try_acquire_exclusive(&self, catalog: &mut Catalog, table: &str) -> Result<bool> {
        if Self::is_exempt(catalog, table) {
            return Ok(false);
        }

        let _guard = FileGuard::lock(&self.guard_path)?;
        let mut locks = self.records(catalog)?;

        match locks.get(table) {
            Some(record) if record.pid != self.owner => {
                tracing::debug!("table '{}' is held by process {}", table, record.pid);
                Err(Error::TableLocked {
                    table: table.to_string(),
                    holder: record.pid,
                })
            }
            Some(_) => Ok(false),
            None => {
                locks.insert(
                    table,
                    LockRecord {
                        pid: self.owner,
                        mode: LockMode::Exclusive,
                    },
                );
                catalog.store_table(locks.to_table()?)?;
                tracing::debug!("process {} locked '{}'", self.owner, table);
                Ok(true)
            }
        }
    }

    /// Drop a table's lock record
    ///
    /// Without `force` the record must belong to this owner. A missing
    /// record is not an error.
    pub fn release(&self, catalog: &mut Catalog, table: &str, force: bool) -> Result<()> {
        if is_metadata(table) {
            return Ok(());
        }

        let _guard = FileGuard::lock(&self.guard_path)?;
        let mut locks = self.records(catalog)?;

        match locks.get(table) {
            None => Ok(()),
            Some(record) if record.pid != self.owner && !force => Err(Error::NotOwner {
                table: table.to_string(),
                holder: record.pid,
            }),
            Some(_) => {
                locks.remove(table);
                catalog.store_table(locks.to_table()?)?;
                tracing::debug!("process {} unlocked '{}'", self.owner, table);
                Ok(())
            }
        }
    }

    /// Process holding a table's lock
    pub fn holder(&self, catalog: &mut Catalog, table: &str) -> Result<Option<u32>> {
        if Self::is_exempt(catalog, table) {
            return Ok(None);
        }
        Ok(self.records(catalog)?.get(table).map(|r| r.pid))
    }

    pub fn is_locked(&self, catalog: &mut Catalog, table: &str) -> Result<bool> {
        Ok(self.holder(catalog, table)?.is_some())
    }

    /// Fail if another process holds the table
    pub fn ensure_readable(&self, catalog: &mut Catalog, table: &str) -> Result<()> {
        match self.holder(catalog, table)? {
            Some(pid) if pid != self.owner => Err(Error::TableLocked {
                table: table.to_string(),
                holder: pid,
            }),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::DataType;
    use tempfile::TempDir;

    fn setup() -> (TempDir, Catalog, Catalog) {
        let dir = TempDir::new().unwrap();
        let mut a = Catalog::open(dir.path()).unwrap();
        a.add_table(Table::create("accounts", &["id"], &[DataType::Int], Some("id")).unwrap())
            .unwrap();
        a.commit().unwrap();
        let b = Catalog::open(dir.path()).unwrap();
        (dir, a, b)
    }

    #[test]
    fn test_acquire_blocks_other_owner() {
        let (dir, mut cat_a, mut cat_b) = setup();
        let a = LockManager::new(100, dir.path());
        let b = LockManager::new(200, dir.path());

        assert!(a.try_acquire_exclusive(&mut cat_a, "accounts").unwrap());
        assert!(matches!(
            b.try_acquire_exclusive(&mut cat_b, "accounts"),
            Err(Error::TableLocked { holder: 100, .. })
        ));
        assert!(matches!(
            b.ensure_readable(&mut cat_b, "accounts"),
            Err(Error::TableLocked { .. })
        ));

        a.release(&mut cat_a, "accounts", false).unwrap();
        assert!(b.try_acquire_exclusive(&mut cat_b, "accounts").unwrap());
        assert_eq!(a.holder(&mut cat_a, "accounts").unwrap(), Some(200));
    }

    #[test]
    fn test_reacquire_by_owner_is_not_new() {
        let (dir, mut cat, _) = setup();
        let a = LockManager::new(100, dir.path());

        assert!(a.try_acquire_exclusive(&mut cat, "accounts").unwrap());
        assert!(!a.try_acquire_exclusive(&mut cat, "accounts").unwrap());
        assert!(a.is_locked(&mut cat, "accounts").unwrap());
        assert_eq!(a.records(&mut cat).unwrap().len(), 1);
    }

    #[test]
    fn test_release_requires_owner_unless_forced() {
        let (dir, mut cat_a, mut cat_b) = setup();
        let a = LockManager::new(100, dir.path());
        let b = LockManager::new(200, dir.path());

        a.try_acquire_exclusive(&mut cat_a, "accounts").unwrap();
        assert!(matches!(
            b.release(&mut cat_b, "accounts", false),
            Err(Error::NotOwner { holder: 100, .. })
        ));
        b.release(&mut cat_b, "accounts", true).unwrap();
        assert!(!a.is_locked(&mut cat_a, "accounts").unwrap());

        // Nothing to release
        a.release(&mut cat_a, "accounts", false).unwrap();
    }

    #[test]
    fn test_exempt_tables() {
        let (dir, mut cat, _) = setup();
        let a = LockManager::new(100, dir.path());

        assert!(!a.try_acquire_exclusive(&mut cat, META_LOCKS).unwrap());
        assert!(!a.try_acquire_exclusive(&mut cat, "not_a_table").unwrap());
        assert!(!a.is_locked(&mut cat, "meta_length").unwrap());
        assert!(a.records(&mut cat).unwrap().is_empty());
    }

    #[test]
    fn test_lock_table_round_trip() {
        let mut locks = LockTable::default();
        locks.insert(
            "accounts",
            LockRecord {
                pid: 7,
                mode: LockMode::Exclusive,
            },
        );
        let table = locks.to_table().unwrap();
        assert_eq!(table.name(), META_LOCKS);
        assert_eq!(LockTable::from_table(&table).unwrap(), locks);
    }
}
