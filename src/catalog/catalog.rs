//! System Catalog for CairnDB
//!
//! This module manages the set of tables of one database directory,
//! including the metadata tables that track row counts, insert stacks,
//! lock records, index registrations and triggers.
//!
//! The catalog is a snapshot of the persisted state: operators `reload` it
//! before they run and `commit` it afterwards. Only tables touched through
//! `get_mut`/`add_table` are written back.

use indexmap::{IndexMap, IndexSet};
use std::path::PathBuf;

use super::schema::Schema;
use super::types::DataType;
use crate::error::{Error, Result};
use crate::storage::{BPlusTree, DiskManager, Table, Value};

/// Prefix of every metadata table name
pub const META_PREFIX: &str = "meta_";
/// `(table_name, no_of_rows)`
pub const META_LENGTH: &str = "meta_length";
/// `(table_name, pid, mode)`
pub const META_LOCKS: &str = "meta_locks";
/// `(table_name, indexes)`
pub const META_INSERT_STACK: &str = "meta_insert_stack";
/// `(table_name, index_name)`
pub const META_INDEXES: &str = "meta_indexes";
/// `(trigger_name, trigger_table, action, when)`
pub const TRIGGERS: &str = "triggers";

/// Whether a table name is a metadata table
pub fn is_metadata(name: &str) -> bool {
    name.starts_with(META_PREFIX)
}

pub(crate) fn bootstrap_table(name: &str) -> Result<Table> {
    use DataType::*;
    match name {
        META_LENGTH => Table::create(name, &["table_name", "no_of_rows"], &[Str, Int], Some("table_name")),
        META_LOCKS => Table::create(name, &["table_name", "pid", "mode"], &[Str, Int, Str], Some("table_name")),
        META_INSERT_STACK => Table::create(name, &["table_name", "indexes"], &[Str, List], Some("table_name")),
        META_INDEXES => Table::create(name, &["table_name", "index_name"], &[Str, Str], Some("index_name")),
        TRIGGERS => Table::create(
            name,
            &["trigger_name", "trigger_table", "action", "when"],
            &[Str, Str, Str, Str],
            Some("trigger_name"),
        ),
        _ => Err(Error::Internal(format!("'{}' is not a bootstrap table", name))),
    }
}

const BOOTSTRAP_TABLES: [&str; 5] = [META_LENGTH, META_LOCKS, META_INSERT_STACK, META_INDEXES, TRIGGERS];

/// System Catalog - the tables of one database
#[derive(Debug)]
pub struct Catalog {
    disk: DiskManager,
    /// Tables by name, in load order
    tables: IndexMap<String, Table>,
    /// Tables changed since the last reload or commit
    dirty: IndexSet<String>,
}

impl Catalog {
    /// Open a database directory, creating any missing metadata table
    pub fn open(data_dir: impl Into<PathBuf>) -> Result<Self> {
        let mut catalog = Self {
            disk: DiskManager::new(data_dir)?,
            tables: IndexMap::new(),
            dirty: IndexSet::new(),
        };
        catalog.reload()?;

        for name in BOOTSTRAP_TABLES {
            if !catalog.tables.contains_key(name) {
                let table = bootstrap_table(name)?;
                catalog.disk.write_table(&table)?;
                catalog.tables.insert(name.to_string(), table);
                tracing::info!("created metadata table '{}'", name);
            }
        }
        Ok(catalog)
    }

    pub fn disk(&self) -> &DiskManager {
        &self.disk
    }

    /// Discard in-memory state and load every persisted table
    pub fn reload(&mut self) -> Result<()> {
        self.tables = self
            .disk
            .load_tables()?
            .into_iter()
            .map(|t| (t.name().to_string(), t))
            .collect();
        self.dirty.clear();
        Ok(())
    }

    /// Reload one table from disk, dropping it if its unit is gone
    pub fn reload_table(&mut self, name: &str) -> Result<()> {
        match self.disk.read_table(name)? {
            Some(table) => {
                self.tables.insert(name.to_string(), table);
            }
            None => {
                self.tables.shift_remove(name);
            }
        }
        self.dirty.shift_remove(name);
        Ok(())
    }

    /// Refresh derived metadata and persist every changed table
    ///
    /// `meta_locks` is never written here; the lock manager owns that unit.
    pub fn commit(&mut self) -> Result<()> {
        self.refresh_metadata()?;

        let dirty: Vec<String> = self.dirty.drain(..).collect();
        for name in dirty {
            if name == META_LOCKS {
                continue;
            }
            if let Some(table) = self.tables.get(&name) {
                self.disk.write_table(table)?;
            }
        }
        Ok(())
    }

    /// Insert or replace a table and write it immediately
    pub fn store_table(&mut self, table: Table) -> Result<()> {
        self.disk.write_table(&table)?;
        self.dirty.shift_remove(table.name());
        self.tables.insert(table.name().to_string(), table);
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tables.contains_key(name)
    }

    /// Get a table by name
    pub fn get(&self, name: &str) -> Result<&Table> {
        self.tables
            .get(name)
            .ok_or_else(|| Error::TableNotFound(name.to_string()))
    }

    /// Get a table for modification; it is written on the next commit
    pub fn get_mut(&mut self, name: &str) -> Result<&mut Table> {
        let table = self
            .tables
            .get_mut(name)
            .ok_or_else(|| Error::TableNotFound(name.to_string()))?;
        self.dirty.insert(name.to_string());
        Ok(table)
    }

    /// Register a new table
    pub fn add_table(&mut self, table: Table) -> Result<()> {
        if self.tables.contains_key(table.name()) {
            return Err(Error::TableAlreadyExists(table.name().to_string()));
        }
        self.dirty.insert(table.name().to_string());
        self.tables.insert(table.name().to_string(), table);
        Ok(())
    }

    /// Add a table, replacing any table of the same name
    pub fn put_table(&mut self, table: Table) {
        self.dirty.insert(table.name().to_string());
        self.tables.insert(table.name().to_string(), table);
    }

    /// Forget a table and delete its unit
    pub fn remove_table(&mut self, name: &str) -> Result<Table> {
        let table = self
            .tables
            .shift_remove(name)
            .ok_or_else(|| Error::TableNotFound(name.to_string()))?;
        self.dirty.shift_remove(name);
        self.disk.remove_table(name)?;
        Ok(table)
    }

    /// All table names, metadata tables included
    pub fn table_names(&self) -> Vec<String> {
        self.tables.keys().cloned().collect()
    }

    /// Recorded live-row count of a table
    pub fn length(&self, name: &str) -> Result<usize> {
        let meta = self.get(META_LENGTH)?;
        let row = meta
            .position_where(0, &Value::from(name))
            .and_then(|pos| meta.row(pos))
            .ok_or_else(|| Error::TableNotFound(name.to_string()))?;
        row.get(1)
            .and_then(Value::as_i64)
            .map(|n| n as usize)
            .ok_or_else(|| Error::Corrupted(format!("bad length record for '{}'", name)))
    }

    /// Recorded insert stack of a table, bottom first
    pub fn insert_stack(&self, name: &str) -> Vec<usize> {
        let Ok(meta) = self.get(META_INSERT_STACK) else {
            return Vec::new();
        };
        meta.position_where(0, &Value::from(name))
            .and_then(|pos| meta.row(pos))
            .and_then(|row| row.get(1))
            .and_then(Value::as_list)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_i64)
                    .map(|p| p as usize)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn set_insert_stack(&mut self, name: &str, stack: &[usize]) -> Result<()> {
        let list = Value::List(stack.iter().map(|&p| Value::from(p)).collect());
        self.upsert_meta(META_INSERT_STACK, vec![Value::from(name), list])
    }

    /// Push tombstoned positions onto a table's insert stack
    pub fn push_insert_stack(&mut self, name: &str, positions: &[usize]) -> Result<()> {
        let mut stack = self.insert_stack(name);
        stack.extend_from_slice(positions);
        self.set_insert_stack(name, &stack)
    }

    /// Name of the index registered for a table
    pub fn index_for(&self, table: &str) -> Option<String> {
        let meta = self.get(META_INDEXES).ok()?;
        meta.live_rows()
            .find(|(_, row)| row.get(0).and_then(Value::as_str) == Some(table))
            .and_then(|(_, row)| row.get(1).and_then(Value::as_str).map(str::to_string))
    }

    /// Table an index is registered on
    pub fn index_table(&self, index_name: &str) -> Option<String> {
        let meta = self.get(META_INDEXES).ok()?;
        let pos = meta.position_where(1, &Value::from(index_name))?;
        meta.row(pos)
            .and_then(|row| row.get(0))
            .and_then(Value::as_str)
            .map(str::to_string)
    }

    pub fn register_index(&mut self, table: &str, index_name: &str) -> Result<()> {
        let meta = self.get_mut(META_INDEXES)?;
        let mut stack = meta.tombstone_positions();
        meta.insert(vec![Value::from(table), Value::from(index_name)], &mut stack)?;
        Ok(())
    }

    pub fn unregister_index(&mut self, index_name: &str) -> Result<()> {
        let meta = self.get_mut(META_INDEXES)?;
        match meta.position_where(1, &Value::from(index_name)) {
            Some(pos) => {
                meta.tombstone(pos);
                Ok(())
            }
            None => Err(Error::IndexNotFound(index_name.to_string())),
        }
    }

    pub fn load_index(&self, index_name: &str) -> Result<BPlusTree> {
        self.disk
            .read_index(index_name)?
            .ok_or_else(|| Error::IndexNotFound(index_name.to_string()))
    }

    pub fn save_index(&self, index_name: &str, tree: &BPlusTree) -> Result<()> {
        self.disk.write_index(index_name, tree)
    }

    /// Insert a metadata row keyed by its first column, or overwrite it
    fn upsert_meta(&mut self, meta_name: &str, values: Vec<Value>) -> Result<()> {
        let meta = self
            .tables
            .get_mut(meta_name)
            .ok_or_else(|| Error::TableNotFound(meta_name.to_string()))?;

        match meta.position_where(0, &values[0]) {
            Some(pos) => {
                if meta.row(pos).map(|row| row.values()) == Some(values.as_slice()) {
                    return Ok(());
                }
                meta.replace(pos, values)?;
            }
            None => {
                let mut stack = meta.tombstone_positions();
                meta.insert(values, &mut stack)?;
            }
        }
        self.dirty.insert(meta_name.to_string());
        Ok(())
    }

    fn remove_meta(&mut self, meta_name: &str, key: &str) {
        if let Some(meta) = self.tables.get_mut(meta_name) {
            if let Some(pos) = meta.position_where(0, &Value::from(key)) {
                meta.tombstone(pos);
                self.dirty.insert(meta_name.to_string());
            }
        }
    }

    /// Bring length and insert-stack records in line with the tables
    fn refresh_metadata(&mut self) -> Result<()> {
        let tracked: Vec<(String, usize, Vec<usize>)> = self
            .tables
            .values()
            .filter(|t| !is_metadata(t.name()))
            .map(|t| (t.name().to_string(), t.live_count(), t.tombstone_positions()))
            .collect();

        for (name, live, tombstones) in &tracked {
            self.upsert_meta(META_LENGTH, vec![Value::from(name.as_str()), Value::from(*live)])?;

            // Keep only entries that still name a tombstone, once each
            let mut seen = IndexSet::new();
            let stack: Vec<usize> = self
                .insert_stack(name)
                .into_iter()
                .filter(|p| tombstones.binary_search(p).is_ok() && seen.insert(*p))
                .collect();
            self.set_insert_stack(name, &stack)?;
        }

        for meta_name in [META_LENGTH, META_INSERT_STACK] {
            let stale: Vec<String> = match self.tables.get(meta_name) {
                Some(meta) => meta
                    .live_rows()
                    .filter_map(|(_, row)| row.get(0).and_then(Value::as_str).map(str::to_string))
                    .filter(|name| !tracked.iter().any(|(t, _, _)| t == name))
                    .collect(),
                None => continue,
            };
            for name in stale {
                self.remove_meta(meta_name, &name);
            }
        }
        Ok(())
    }

    /// Table description (for the .schema command)
    pub fn table_info(&self, name: &str) -> Result<String> {
        let table = self.get(name)?;
        let schema: &Schema = table.schema();
        let mut info = format!("Table: {}\n", table.name());
        info.push_str("Columns:\n");
        for col in schema.columns() {
            let flag = if schema.primary_key_index() == Some(col.position) {
                " [PRIMARY KEY]"
            } else {
                ""
            };
            info.push_str(&format!("  {} {}{}\n", col.name, col.data_type, flag));
        }
        if let Some(index) = self.index_for(name) {
            info.push_str(&format!("Index:\n  {}\n", index));
        }
        Ok(info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn people() -> Table {
        Table::create(
            "people",
            &["id", "name"],
            &[DataType::Int, DataType::Str],
            Some("id"),
        )
        .unwrap()
    }

    #[test]
    fn test_open_bootstraps_metadata() {
        let dir = TempDir::new().unwrap();
        let catalog = Catalog::open(dir.path()).unwrap();

        for name in BOOTSTRAP_TABLES {
            assert!(catalog.contains(name), "missing {}", name);
            assert!(catalog.disk().table_path(name).exists());
        }
        assert!(is_metadata(META_LOCKS));
        assert!(!is_metadata(TRIGGERS));
    }

    #[test]
    fn test_commit_tracks_length_and_stack() {
        let dir = TempDir::new().unwrap();
        let mut catalog = Catalog::open(dir.path()).unwrap();
        catalog.add_table(people()).unwrap();
        catalog.commit().unwrap();
        assert_eq!(catalog.length("people").unwrap(), 0);
        assert!(catalog.insert_stack("people").is_empty());

        {
            let table = catalog.get_mut("people").unwrap();
            let mut stack = Vec::new();
            table.insert(vec![Value::Int(1), Value::from("a")], &mut stack).unwrap();
            table.insert(vec![Value::Int(2), Value::from("b")], &mut stack).unwrap();
            table.tombstone(0);
        }
        catalog.push_insert_stack("people", &[0, 0, 1]).unwrap();
        catalog.commit().unwrap();

        assert_eq!(catalog.length("people").unwrap(), 1);
        assert_eq!(catalog.insert_stack("people"), vec![0]);

        let reopened = Catalog::open(dir.path()).unwrap();
        assert_eq!(reopened.length("people").unwrap(), 1);
        assert_eq!(reopened.insert_stack("people"), vec![0]);
        assert_eq!(reopened.get("people").unwrap(), catalog.get("people").unwrap());
    }

    #[test]
    fn test_add_existing_table_fails() {
        let dir = TempDir::new().unwrap();
        let mut catalog = Catalog::open(dir.path()).unwrap();
        catalog.add_table(people()).unwrap();
        assert!(matches!(
            catalog.add_table(people()),
            Err(Error::TableAlreadyExists(_))
        ));
    }

    #[test]
    fn test_remove_table_drops_metadata_rows() {
        let dir = TempDir::new().unwrap();
        let mut catalog = Catalog::open(dir.path()).unwrap();
        catalog.add_table(people()).unwrap();
        catalog.commit().unwrap();

        catalog.remove_table("people").unwrap();
        catalog.commit().unwrap();

        assert!(!catalog.disk().table_path("people").exists());
        assert!(catalog.length("people").is_err());
        assert!(matches!(catalog.get("people"), Err(Error::TableNotFound(_))));
    }

    #[test]
    fn test_index_registry() {
        let dir = TempDir::new().unwrap();
        let mut catalog = Catalog::open(dir.path()).unwrap();
        catalog.add_table(people()).unwrap();
        catalog.register_index("people", "people_pk").unwrap();
        catalog.commit().unwrap();

        assert_eq!(catalog.index_for("people").as_deref(), Some("people_pk"));
        assert_eq!(catalog.index_table("people_pk").as_deref(), Some("people"));

        catalog.unregister_index("people_pk").unwrap();
        assert_eq!(catalog.index_for("people"), None);
        assert!(matches!(
            catalog.unregister_index("people_pk"),
            Err(Error::IndexNotFound(_))
        ));
    }

    #[test]
    fn test_commit_never_writes_lock_records() {
        let dir = TempDir::new().unwrap();
        let mut catalog = Catalog::open(dir.path()).unwrap();
        let before = std::fs::read(catalog.disk().table_path(META_LOCKS)).unwrap();

        catalog
            .get_mut(META_LOCKS)
            .unwrap()
            .insert(
                vec![Value::from("people"), Value::Int(1), Value::from("x")],
                &mut Vec::new(),
            )
            .unwrap();
        catalog.commit().unwrap();

        let after = std::fs::read(catalog.disk().table_path(META_LOCKS)).unwrap();
        assert_eq!(before, after);
    }
}
