//! Query Executor for CairnDB
//!
//! The `ExecutionEngine` is the operator surface of a database. Every
//! operator reloads the catalog from disk, works on the in-memory snapshot
//! and commits what it changed. Mutations additionally take the table's
//! exclusive lock and dispatch before/after triggers.

use std::path::PathBuf;
use std::sync::Arc;

use super::planner::QueryPlan;
use super::trigger::{TriggerAction, TriggerDispatcher, TriggerHandler, TriggerTiming};
use crate::catalog::{is_metadata, Catalog, DataType, Schema, TRIGGERS};
use crate::condition::{CompareOp, Condition, Predicate};
use crate::config::DatabaseConfig;
use crate::error::{Error, Result};
use crate::lock::LockManager;
use crate::storage::{BPlusTree, Projection, SelectSpec, Table, Value};

/// Whether an operator may touch protected tables
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Access {
    #[default]
    Standard,
    /// Allows writes to `triggers` and the metadata tables
    Administrative,
}

/// A table given by name or as an already materialized value
#[derive(Debug, Clone)]
pub enum TableSource {
    Named(String),
    Value(Table),
}

impl From<&str> for TableSource {
    fn from(name: &str) -> Self {
        TableSource::Named(name.to_string())
    }
}

impl From<String> for TableSource {
    fn from(name: String) -> Self {
        TableSource::Named(name)
    }
}

impl From<Table> for TableSource {
    fn from(table: Table) -> Self {
        TableSource::Value(table)
    }
}

/// Arguments of a select
#[derive(Debug, Clone)]
pub struct SelectQuery {
    pub source: TableSource,
    pub condition: Option<String>,
    pub spec: SelectSpec,
    pub save_as: Option<String>,
}

impl SelectQuery {
    /// `columns` is `*` or a comma separated list, optionally prefixed by `distinct`
    pub fn new(columns: &str, source: impl Into<TableSource>) -> Self {
        let columns = columns.trim();
        let (distinct, columns) = match columns.get(..9) {
            Some(prefix) if prefix.eq_ignore_ascii_case("distinct ") => (true, &columns[9..]),
            _ => (false, columns),
        };
        Self {
            source: source.into(),
            condition: None,
            spec: SelectSpec {
                columns: Projection::parse(columns),
                distinct,
                ..SelectSpec::default()
            },
            save_as: None,
        }
    }

    pub fn condition(mut self, condition: impl Into<String>) -> Self {
        self.condition = Some(condition.into());
        self
    }

    pub fn order_by(mut self, column: impl Into<String>) -> Self {
        self.spec.order_by = Some(column.into());
        self
    }

    pub fn descending(mut self, descending: bool) -> Self {
        self.spec.descending = descending;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.spec.limit = Some(limit);
        self
    }

    pub fn distinct(mut self) -> Self {
        self.spec.distinct = true;
        self
    }

    /// Store the result in the catalog under a new name
    pub fn save_as(mut self, name: impl Into<String>) -> Self {
        self.save_as = Some(name.into());
        self
    }
}

fn is_protected(table: &str) -> bool {
    table == TRIGGERS || is_metadata(table)
}

/// Rebuild a table's index from its live rows, if it has one
pub(super) fn rebuild_index(catalog: &mut Catalog, table: &str, order: usize) -> Result<()> {
    let Some(index_name) = catalog.index_for(table) else {
        return Ok(());
    };
    let entries = catalog.get(table)?.primary_key_entries().unwrap_or_default();
    let tree = BPlusTree::build(order, entries)?;
    catalog.save_index(&index_name, &tree)?;
    tracing::debug!("rebuilt index '{}' on '{}' ({} keys)", index_name, table, tree.len());
    Ok(())
}

/// Add one inserted row to a table's index, if it has one
fn index_insert(catalog: &mut Catalog, table: &str, key: Value, position: usize, order: usize) -> Result<()> {
    let Some(index_name) = catalog.index_for(table) else {
        return Ok(());
    };
    match catalog.load_index(&index_name) {
        Ok(mut tree) => {
            tree.insert(key, position);
            catalog.save_index(&index_name, &tree)
        }
        Err(Error::IndexNotFound(_)) => rebuild_index(catalog, table, order),
        Err(e) => Err(e),
    }
}

/// Execution Engine
pub struct ExecutionEngine {
    pub(super) config: DatabaseConfig,
    pub(super) catalog: Catalog,
    pub(super) locks: LockManager,
    triggers: TriggerDispatcher,
}

impl ExecutionEngine {
    /// Open (or create) the database described by `config`
    pub fn open(config: DatabaseConfig) -> Result<Self> {
        config.validate()?;
        let catalog = Catalog::open(config.database_dir())?;
        let locks = LockManager::new(config.owner_pid(), catalog.disk().data_dir());
        tracing::info!(
            "opened database '{}' at {} as process {}",
            config.name,
            config.database_dir().display(),
            locks.owner()
        );
        Ok(Self {
            config,
            catalog,
            locks,
            triggers: TriggerDispatcher::default(),
        })
    }

    /// Replace the trigger notification handler
    pub fn with_trigger_handler(mut self, handler: Arc<dyn TriggerHandler>) -> Self {
        self.triggers = TriggerDispatcher::new(handler);
        self
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    /// Catalog snapshot as of the last operator
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    // ========== Locking helpers ==========

    /// Run `op` holding the table's exclusive lock, then commit
    ///
    /// The catalog is reloaded once the lock is held, so `op` sees every
    /// commit made before it. On failure the in-memory
    /// snapshot is reloaded so nothing from the failed attempt is committed
    /// later. A lock taken here is released on both paths.
    pub(super) fn locked<T>(&mut self, table: &str, op: impl FnOnce(&mut Catalog) -> Result<T>) -> Result<T> {
        self.catalog.get(table)?;
        let acquired = self.locks.try_acquire_exclusive(&mut self.catalog, table)?;

        // Another process may have committed between the caller's reload and the lock
        let result = self
            .catalog
            .reload()
            .and_then(|()| op(&mut self.catalog))
            .and_then(|value| {
                self.catalog.commit()?;
                Ok(value)
            });

        if let Err(e) = &result {
            tracing::warn!("operation on '{}' aborted: {}", table, e);
            if let Err(reload_err) = self.catalog.reload() {
                tracing::warn!("could not reload catalog: {}", reload_err);
            }
        }

        if acquired {
            if let Err(e) = self.locks.release(&mut self.catalog, table, false) {
                tracing::warn!("could not release lock on '{}': {}", table, e);
            }
        }
        result
    }

    /// Insert, update and delete share this shape: protection check, before
    /// triggers, locked mutation, after triggers when data changed
    fn run_mutation<T>(
        &mut self,
        table: &str,
        action: TriggerAction,
        access: Access,
        changed: impl FnOnce(&T) -> bool,
        op: impl FnOnce(&mut Catalog) -> Result<T>,
    ) -> Result<T> {
        if access == Access::Standard && is_protected(table) {
            return Err(Error::ProtectedTable(table.to_string()));
        }

        self.catalog.reload()?;
        self.catalog.get(table)?;
        self.triggers
            .dispatch(&self.catalog, table, action, TriggerTiming::Before);

        let value = self.locked(table, op)?;

        if changed(&value) {
            self.triggers
                .dispatch(&self.catalog, table, action, TriggerTiming::After);
        }
        Ok(value)
    }

    // ========== DDL ==========

    /// Create an empty table
    pub fn create_table(
        &mut self,
        name: &str,
        column_names: &[&str],
        column_types: &[DataType],
        primary_key: Option<&str>,
    ) -> Result<()> {
        if is_metadata(name) {
            return Err(Error::ProtectedTable(name.to_string()));
        }
        let table = Table::create(name, column_names, column_types, primary_key)?;

        self.catalog.reload()?;
        self.catalog.add_table(table)?;
        self.catalog.commit()?;
        tracing::info!("created table '{}'", name);
        Ok(())
    }

    /// Drop a table with its index, lock and metadata records
    pub fn drop_table(&mut self, name: &str) -> Result<()> {
        if is_protected(name) {
            return Err(Error::ProtectedTable(name.to_string()));
        }

        self.catalog.reload()?;
        self.locked(name, |catalog| {
            if let Some(index_name) = catalog.index_for(name) {
                catalog.unregister_index(&index_name)?;
                catalog.disk().remove_index(&index_name)?;
            }
            catalog.remove_table(name)?;
            Ok(())
        })?;
        // A lock taken earlier through lock_table outlives the operator
        self.locks.release(&mut self.catalog, name, true)?;

        tracing::info!("dropped table '{}'", name);
        Ok(())
    }

    /// Convert every value of a column to a new type
    pub fn cast_column(&mut self, table: &str, column: &str, data_type: DataType) -> Result<()> {
        if is_protected(table) {
            return Err(Error::ProtectedTable(table.to_string()));
        }
        let order = self.config.btree_order;

        self.catalog.reload()?;
        self.locked(table, |catalog| {
            catalog.get_mut(table)?.cast_column(column, data_type)?;
            rebuild_index(catalog, table, order)
        })
    }

    // ========== DML ==========

    /// Insert one row; returns its position
    pub fn insert(&mut self, table: &str, values: Vec<Value>) -> Result<usize> {
        self.insert_as(table, values, Access::Standard)
    }

    pub fn insert_as(&mut self, table: &str, values: Vec<Value>, access: Access) -> Result<usize> {
        let order = self.config.btree_order;
        self.run_mutation(table, TriggerAction::Insert, access, |_| true, |catalog| {
            let mut stack = catalog.insert_stack(table);
            let target = catalog.get_mut(table)?;
            let position = target.insert(values, &mut stack)?;
            let key = target
                .schema()
                .primary_key_index()
                .and_then(|pk| target.row(position).and_then(|row| row.get(pk)).cloned());

            if !is_metadata(table) {
                catalog.set_insert_stack(table, &stack)?;
            }
            if let Some(key) = key {
                index_insert(catalog, table, key, position, order)?;
            }
            Ok(position)
        })
    }

    /// Set one column on every row matching `condition`; returns whether any row matched
    pub fn update(&mut self, table: &str, column: &str, value: Value, condition: &str) -> Result<bool> {
        self.update_as(table, column, value, condition, Access::Standard)
    }

    pub fn update_as(
        &mut self,
        table: &str,
        column: &str,
        value: Value,
        condition: &str,
        access: Access,
    ) -> Result<bool> {
        let condition: Condition = condition.parse()?;
        let order = self.config.btree_order;
        self.run_mutation(table, TriggerAction::Update, access, |changed| *changed, |catalog| {
            let target = catalog.get_mut(table)?;
            let predicate = Predicate::resolve(&condition, target.schema())?;
            let changed = target.update_where(column, &value, &predicate)?;
            if changed {
                rebuild_index(catalog, table, order)?;
            }
            Ok(changed)
        })
    }

    /// Tombstone every row matching `condition`; returns the freed positions
    pub fn delete(&mut self, table: &str, condition: &str) -> Result<Vec<usize>> {
        self.delete_as(table, condition, Access::Standard)
    }

    pub fn delete_as(&mut self, table: &str, condition: &str, access: Access) -> Result<Vec<usize>> {
        let condition: Condition = condition.parse()?;
        self.delete_resolved(table, access, move |schema| Predicate::resolve(&condition, schema))
    }

    fn delete_resolved(
        &mut self,
        table: &str,
        access: Access,
        resolve: impl FnOnce(&Schema) -> Result<Predicate>,
    ) -> Result<Vec<usize>> {
        let order = self.config.btree_order;
        self.run_mutation(table, TriggerAction::Delete, access, |deleted: &Vec<usize>| !deleted.is_empty(), |catalog| {
            let target = catalog.get_mut(table)?;
            let predicate = resolve(target.schema())?;
            let deleted = target.delete_where(&predicate);

            if !deleted.is_empty() {
                if !is_metadata(table) {
                    catalog.push_insert_stack(table, &deleted)?;
                }
                rebuild_index(catalog, table, order)?;
            }
            Ok(deleted)
        })
    }

    /// Reorder a table's live rows by one column, dropping tombstones
    pub fn sort(&mut self, table: &str, column: &str, ascending: bool) -> Result<()> {
        if is_protected(table) {
            return Err(Error::ProtectedTable(table.to_string()));
        }
        let order = self.config.btree_order;

        self.catalog.reload()?;
        self.locked(table, |catalog| {
            catalog.get_mut(table)?.sort(column, ascending)?;
            catalog.set_insert_stack(table, &[])?;
            rebuild_index(catalog, table, order)
        })
    }

    // ========== Queries ==========

    /// Resolve a source to a table value, refusing tables locked by another process
    fn source_table(&mut self, source: TableSource) -> Result<(Table, Option<String>)> {
        match source {
            TableSource::Named(name) => {
                self.locks.ensure_readable(&mut self.catalog, &name)?;
                let table = self.catalog.get(&name)?.clone();
                Ok((table, Some(name)))
            }
            TableSource::Value(table) => Ok((table, None)),
        }
    }

    /// Run a select; the result is a new table value
    pub fn select(&mut self, query: SelectQuery) -> Result<Table> {
        let condition = query
            .condition
            .as_deref()
            .map(str::parse::<Condition>)
            .transpose()?;

        self.catalog.reload()?;
        let (table, name) = self.source_table(query.source)?;
        let predicate = condition
            .map(|c| Predicate::resolve(&c, table.schema()))
            .transpose()?;
        let index_name = name.as_deref().and_then(|n| self.catalog.index_for(n));

        let mut result = match QueryPlan::choose(&table, predicate, index_name.as_deref()) {
            QueryPlan::FullScan { predicate } => table.select_where(&query.spec, predicate.as_ref())?,
            QueryPlan::IndexScan {
                index_name,
                lookup,
                predicate,
            } => {
                let tree = self.catalog.load_index(&index_name)?;
                table.select_positions(&lookup.positions(&tree), &query.spec, Some(&predicate))?
            }
        };

        if let Some(save_as) = query.save_as {
            result.rename(save_as);
            self.save_result(result.clone())?;
        }
        Ok(result)
    }

    /// Inner join of two tables; no other join mode exists
    pub fn join(
        &mut self,
        mode: &str,
        left: impl Into<TableSource>,
        right: impl Into<TableSource>,
        condition: &str,
        save_as: Option<&str>,
    ) -> Result<Table> {
        if !mode.trim().eq_ignore_ascii_case("inner") {
            return Err(Error::UnimplementedJoinMode(mode.to_string()));
        }
        condition.parse::<Condition>()?;

        self.catalog.reload()?;
        let (left, _) = self.source_table(left.into())?;
        let (right, _) = self.source_table(right.into())?;
        let mut result = left.inner_join(&right, condition)?;

        if let Some(save_as) = save_as {
            result.rename(save_as);
            self.save_result(result.clone())?;
        }
        Ok(result)
    }

    fn save_result(&mut self, table: Table) -> Result<()> {
        if is_protected(table.name()) {
            return Err(Error::ProtectedTable(table.name().to_string()));
        }
        let name = table.name().to_string();
        self.catalog.add_table(table)?;
        self.catalog.commit()?;
        tracing::info!("saved result as table '{}'", name);
        Ok(())
    }

    // ========== Indexes ==========

    /// Build a B+ tree over a table's primary key
    pub fn create_index(&mut self, index_name: &str, table: &str) -> Result<()> {
        if is_protected(table) {
            return Err(Error::ProtectedTable(table.to_string()));
        }

        self.catalog.reload()?;
        if self.catalog.get(table)?.schema().primary_key().is_none() {
            return Err(Error::NoPrimaryKey(table.to_string()));
        }
        if self.catalog.index_table(index_name).is_some() {
            return Err(Error::DuplicateIndex(index_name.to_string()));
        }
        if let Some(existing) = self.catalog.index_for(table) {
            return Err(Error::TableAlreadyIndexed {
                table: table.to_string(),
                index: existing,
            });
        }

        let order = self.config.btree_order;
        self.locked(table, |catalog| {
            let entries = catalog.get(table)?.primary_key_entries().unwrap_or_default();
            let tree = BPlusTree::build(order, entries)?;
            catalog.save_index(index_name, &tree)?;
            catalog.register_index(table, index_name)
        })?;
        tracing::info!("created index '{}' on '{}'", index_name, table);
        Ok(())
    }

    /// Remove an index registration and its unit
    pub fn drop_index(&mut self, index_name: &str) -> Result<()> {
        self.catalog.reload()?;
        if self.catalog.index_table(index_name).is_none() {
            return Err(Error::IndexNotFound(index_name.to_string()));
        }
        self.catalog.unregister_index(index_name)?;
        self.catalog.commit()?;
        self.catalog.disk().remove_index(index_name)?;
        tracing::info!("dropped index '{}'", index_name);
        Ok(())
    }

    /// On-disk location of an index
    pub fn index_path(&mut self, index_name: &str) -> Result<PathBuf> {
        self.catalog.reload()?;
        if self.catalog.index_table(index_name).is_none() {
            return Err(Error::IndexNotFound(index_name.to_string()));
        }
        Ok(self.catalog.disk().index_path(index_name))
    }

    pub fn index_for(&mut self, table: &str) -> Result<Option<String>> {
        self.catalog.reload()?;
        self.catalog.get(table)?;
        Ok(self.catalog.index_for(table))
    }

    // ========== Triggers ==========

    /// Register a trigger on a table
    pub fn create_trigger(&mut self, name: &str, table: &str, action: &str, timing: &str) -> Result<()> {
        let action: TriggerAction = action.parse()?;
        let timing: TriggerTiming = timing.parse()?;
        if name.trim().is_empty() {
            return Err(Error::InvalidTrigger("trigger name is empty".to_string()));
        }

        self.catalog.reload()?;
        if is_protected(table) || !self.catalog.contains(table) {
            return Err(Error::InvalidTrigger(format!(
                "cannot attach a trigger to '{}'",
                table
            )));
        }

        let row = vec![
            Value::from(name.trim()),
            Value::from(table),
            Value::from(action.as_str()),
            Value::from(timing.as_str()),
        ];
        self.insert_as(TRIGGERS, row, Access::Administrative)?;
        tracing::info!("created trigger '{}' ({} {} on '{}')", name, timing, action, table);
        Ok(())
    }

    pub fn drop_trigger(&mut self, name: &str) -> Result<()> {
        let name = name.trim().to_string();
        let deleted = self.delete_resolved(TRIGGERS, Access::Administrative, |schema| {
            let column = schema.index_of("trigger_name")?;
            Ok(Predicate {
                column,
                column_name: "trigger_name".to_string(),
                op: CompareOp::Eq,
                value: Value::from(name.as_str()),
            })
        })?;
        if deleted.is_empty() {
            return Err(Error::InvalidTrigger(format!("trigger '{}' does not exist", name)));
        }
        Ok(())
    }

    // ========== Locks ==========

    /// Take a table's exclusive lock; `false` if this process already holds it
    pub fn lock_table(&mut self, table: &str) -> Result<bool> {
        self.catalog.reload()?;
        self.catalog.get(table)?;
        self.locks.try_acquire_exclusive(&mut self.catalog, table)
    }

    pub fn unlock_table(&mut self, table: &str, force: bool) -> Result<()> {
        self.locks.release(&mut self.catalog, table, force)
    }

    pub fn is_locked(&mut self, table: &str) -> Result<bool> {
        self.catalog.reload()?;
        self.locks.is_locked(&mut self.catalog, table)
    }

    // ========== Introspection ==========

    /// Number of live rows
    pub fn length(&mut self, table: &str) -> Result<usize> {
        self.catalog.reload()?;
        if is_metadata(table) {
            return Ok(self.catalog.get(table)?.live_count());
        }
        self.catalog.length(table)
    }

    /// Positions awaiting reuse, most recent last
    pub fn insert_stack(&mut self, table: &str) -> Result<Vec<usize>> {
        self.catalog.reload()?;
        self.catalog.get(table)?;
        Ok(self.catalog.insert_stack(table))
    }

    /// Current contents of a table
    pub fn table(&mut self, name: &str) -> Result<Table> {
        self.catalog.reload()?;
        Ok(self.catalog.get(name)?.clone())
    }

    pub fn table_names(&mut self) -> Result<Vec<String>> {
        self.catalog.reload()?;
        Ok(self.catalog.table_names())
    }

    /// Description of a table for display
    pub fn table_info(&mut self, name: &str) -> Result<String> {
        self.catalog.reload()?;
        self.catalog.table_info(name)
    }
}
