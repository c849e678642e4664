//! Table storage for CairnDB
//!
//! A table is a schema plus an ordered vector of row slots. A slot is either
//! a live row or a tombstone; deleting a row tombstones its slot so every
//! other position stays valid, and inserts refill tombstones handed to them
//! through the table's insert stack.

use std::cmp::Ordering;
use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use super::tuple::{Tuple, Value};
use crate::catalog::{DataType, Schema};
use crate::condition::{JoinPredicate, Predicate};
use crate::error::{Error, Result};

/// One row position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Slot {
    Live(Tuple),
    Tombstone,
}

impl Slot {
    pub fn is_tombstone(&self) -> bool {
        matches!(self, Slot::Tombstone)
    }

    pub fn as_live(&self) -> Option<&Tuple> {
        match self {
            Slot::Live(tuple) => Some(tuple),
            Slot::Tombstone => None,
        }
    }
}

/// Columns kept by a select
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Projection {
    #[default]
    All,
    Columns(Vec<String>),
}

impl Projection {
    /// `*` or a comma separated column list
    pub fn parse(text: &str) -> Self {
        let text = text.trim();
        if text == "*" || text.is_empty() {
            return Projection::All;
        }
        Projection::Columns(text.split(',').map(|c| c.trim().to_string()).collect())
    }
}

/// Shape of a select result: projection, DISTINCT, ORDER BY and limit
#[derive(Debug, Clone, Default)]
pub struct SelectSpec {
    pub columns: Projection,
    /// Deduplicate on the projected columns; ignored for `*`
    pub distinct: bool,
    pub order_by: Option<String>,
    pub descending: bool,
    pub limit: Option<usize>,
}

/// A table combining schema and row slots
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    /// Table name
    name: String,
    /// Table schema
    schema: Schema,
    /// Row slots; a position is a row's identity
    rows: Vec<Slot>,
}

impl Table {
    /// Create a new empty table
    pub fn new(name: impl Into<String>, schema: Schema) -> Self {
        Self {
            name: name.into(),
            schema,
            rows: Vec::new(),
        }
    }

    /// Create a new empty table from parallel name/type lists
    pub fn create(name: &str, column_names: &[&str], column_types: &[DataType], primary_key: Option<&str>) -> Result<Self> {
        Ok(Self::new(name, Schema::new(column_names, column_types, primary_key)?))
    }

    /// Get table name
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn rename(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    /// Get table schema
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Column index by name
    pub fn column_index(&self, column: &str) -> Result<usize> {
        self.schema
            .get_column_index(column)
            .ok_or_else(|| Error::ColumnNotFound(column.to_string(), self.name.clone()))
    }

    /// Every slot, tombstones included
    pub fn slots(&self) -> &[Slot] {
        &self.rows
    }

    /// Live row at a position
    pub fn row(&self, position: usize) -> Option<&Tuple> {
        self.rows.get(position).and_then(Slot::as_live)
    }

    /// Live rows with their positions
    pub fn live_rows(&self) -> impl Iterator<Item = (usize, &Tuple)> + '_ {
        self.rows
            .iter()
            .enumerate()
            .filter_map(|(pos, slot)| slot.as_live().map(|t| (pos, t)))
    }

    /// Number of live rows
    pub fn live_count(&self) -> usize {
        self.rows.iter().filter(|slot| !slot.is_tombstone()).count()
    }

    /// Positions of every tombstone, ascending
    pub fn tombstone_positions(&self) -> Vec<usize> {
        self.rows
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_tombstone())
            .map(|(pos, _)| pos)
            .collect()
    }

    /// Live values of one column, in row order
    pub fn column_values(&self, column: &str) -> Result<Vec<&Value>> {
        let idx = self.column_index(column)?;
        Ok(self.live_rows().map(|(_, t)| &t.values()[idx]).collect())
    }

    /// `(primary key, position)` for every live row, in row order
    pub fn primary_key_entries(&self) -> Option<Vec<(Value, usize)>> {
        let pk = self.schema.primary_key_index()?;
        Some(
            self.live_rows()
                .map(|(pos, t)| (t.values()[pk].clone(), pos))
                .collect(),
        )
    }

    /// First live position whose column equals `value`
    pub fn position_where(&self, column: usize, value: &Value) -> Option<usize> {
        self.live_rows()
            .find(|(_, t)| t.get(column) == Some(value))
            .map(|(pos, _)| pos)
    }

    /// Keys collide when they compare equal, the same test the index uses
    fn check_primary_key(&self, value: &Value, ignore: Option<usize>) -> Result<()> {
        let Some(pk) = self.schema.primary_key_index() else {
            return Ok(());
        };
        let taken = self
            .live_rows()
            .any(|(pos, t)| {
                Some(pos) != ignore
                    && t.get(pk).and_then(|v| v.compare(value)) == Some(Ordering::Equal)
            });
        if taken {
            return Err(Error::PrimaryKeyViolation {
                table: self.name.clone(),
                key: value.to_string(),
            });
        }
        Ok(())
    }

    fn cast_row(&self, values: Vec<Value>) -> Result<Tuple> {
        if values.len() != self.schema.column_count() {
            return Err(Error::SchemaViolation(format!(
                "table '{}' expects {} values, got {}",
                self.name,
                self.schema.column_count(),
                values.len()
            )));
        }
        let cast = self
            .schema
            .columns()
            .iter()
            .zip(values.iter())
            .map(|(col, value)| {
                col.data_type.cast(value).map_err(|e| {
                    Error::SchemaViolation(format!("column '{}': {}", col.name, e))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Tuple::new(cast))
    }

    /// Insert a row, refilling the most recently pushed tombstone first
    ///
    /// Stack entries that no longer name a tombstone are discarded. A
    /// rejected row leaves both the table and the stack untouched.
    pub fn insert(&mut self, values: Vec<Value>, insert_stack: &mut Vec<usize>) -> Result<usize> {
        let tuple = self.cast_row(values)?;
        if let Some(pk) = self.schema.primary_key_index() {
            self.check_primary_key(&tuple.values()[pk], None)?;
        }

        while let Some(position) = insert_stack.pop() {
            if let Some(slot @ Slot::Tombstone) = self.rows.get_mut(position) {
                *slot = Slot::Live(tuple);
                return Ok(position);
            }
        }

        self.rows.push(Slot::Live(tuple));
        Ok(self.rows.len() - 1)
    }

    /// Tombstone every live row matching the predicate
    ///
    /// Returns the newly tombstoned positions; the slot vector never shrinks.
    pub fn delete_where(&mut self, predicate: &Predicate) -> Vec<usize> {
        let mut deleted = Vec::new();
        for (pos, slot) in self.rows.iter_mut().enumerate() {
            if slot.as_live().map_or(false, |t| predicate.matches(t)) {
                *slot = Slot::Tombstone;
                deleted.push(pos);
            }
        }
        deleted
    }

    /// Overwrite the live row at `position` in place
    pub(crate) fn replace(&mut self, position: usize, values: Vec<Value>) -> Result<()> {
        let tuple = self.cast_row(values)?;
        if let Some(pk) = self.schema.primary_key_index() {
            self.check_primary_key(&tuple.values()[pk], Some(position))?;
        }
        match self.rows.get_mut(position) {
            Some(slot @ Slot::Live(_)) => {
                *slot = Slot::Live(tuple);
                Ok(())
            }
            _ => Err(Error::Internal(format!(
                "no live row at position {} of '{}'",
                position, self.name
            ))),
        }
    }

    /// Tombstone one slot; returns whether it held a live row
    pub(crate) fn tombstone(&mut self, position: usize) -> bool {
        match self.rows.get_mut(position) {
            Some(slot) if !slot.is_tombstone() => {
                *slot = Slot::Tombstone;
                true
            }
            _ => false,
        }
    }

    /// Set one column of every matching live row; returns whether any matched
    pub fn update_where(&mut self, column: &str, value: &Value, predicate: &Predicate) -> Result<bool> {
        let idx = self.column_index(column)?;
        let data_type = self.schema.columns()[idx].data_type;
        let value = data_type
            .cast(value)
            .map_err(|e| Error::SchemaViolation(format!("column '{}': {}", column, e)))?;

        let targets: Vec<usize> = self
            .live_rows()
            .filter(|(_, t)| predicate.matches(t))
            .map(|(pos, _)| pos)
            .collect();

        if self.schema.primary_key_index() == Some(idx) {
            if targets.len() > 1 {
                return Err(Error::PrimaryKeyViolation {
                    table: self.name.clone(),
                    key: value.to_string(),
                });
            }
            if let Some(&pos) = targets.first() {
                self.check_primary_key(&value, Some(pos))?;
            }
        }

        for &pos in &targets {
            self.set_value(pos, idx, value.clone());
        }
        Ok(!targets.is_empty())
    }

    pub(crate) fn set_value(&mut self, position: usize, column: usize, value: Value) {
        if let Some(Slot::Live(tuple)) = self.rows.get_mut(position) {
            tuple.set(column, value);
        }
    }

    /// Re-type a column, converting every live value or none of them
    pub fn cast_column(&mut self, column: &str, data_type: DataType) -> Result<()> {
        let idx = self.column_index(column)?;
        let converted = self
            .live_rows()
            .map(|(pos, t)| data_type.cast(&t.values()[idx]).map(|v| (pos, v)))
            .collect::<Result<Vec<_>>>()?;

        for (pos, value) in converted {
            self.set_value(pos, idx, value);
        }
        self.schema.set_column_type(idx, data_type);
        Ok(())
    }

    /// Filter live rows, then order, project, deduplicate and truncate
    pub fn select_where(&self, spec: &SelectSpec, predicate: Option<&Predicate>) -> Result<Table> {
        let rows = self
            .live_rows()
            .map(|(_, t)| t)
            .filter(|t| predicate.map_or(true, |p| p.matches(t)))
            .collect();
        self.materialize(rows, spec)
    }

    /// Like `select_where`, over candidate positions (e.g. from an index)
    ///
    /// Positions that are tombstones, out of range or no longer satisfy the
    /// predicate are skipped; candidate order is kept unless `order_by` is set.
    pub fn select_positions(&self, positions: &[usize], spec: &SelectSpec, predicate: Option<&Predicate>) -> Result<Table> {
        let rows = positions
            .iter()
            .filter_map(|&pos| self.row(pos))
            .filter(|t| predicate.map_or(true, |p| p.matches(t)))
            .collect();
        self.materialize(rows, spec)
    }

    fn materialize(&self, mut rows: Vec<&Tuple>, spec: &SelectSpec) -> Result<Table> {
        let indices: Vec<usize> = match &spec.columns {
            Projection::All => (0..self.schema.column_count()).collect(),
            Projection::Columns(columns) => columns
                .iter()
                .map(|c| self.column_index(c))
                .collect::<Result<_>>()?,
        };

        if let Some(order_by) = &spec.order_by {
            let idx = self.column_index(order_by)?;
            rows.sort_by(|a, b| {
                let ord = a.values()[idx]
                    .compare(&b.values()[idx])
                    .unwrap_or(Ordering::Equal);
                if spec.descending {
                    ord.reverse()
                } else {
                    ord
                }
            });
        }

        let mut projected: Vec<Tuple> = rows.iter().map(|t| t.project(&indices)).collect();

        if spec.distinct && spec.columns != Projection::All {
            let mut seen = HashSet::new();
            projected.retain(|t| seen.insert(t.clone()));
        }

        if let Some(limit) = spec.limit {
            projected.truncate(limit);
        }

        Ok(Table {
            name: self.name.clone(),
            schema: self.schema.project(&indices),
            rows: projected.into_iter().map(Slot::Live).collect(),
        })
    }

    /// Reorder live rows by one column; tombstones are dropped
    pub fn sort(&mut self, column: &str, ascending: bool) -> Result<()> {
        let idx = self.column_index(column)?;
        let mut live: Vec<Tuple> = std::mem::take(&mut self.rows)
            .into_iter()
            .filter_map(|slot| match slot {
                Slot::Live(t) => Some(t),
                Slot::Tombstone => None,
            })
            .collect();

        live.sort_by(|a, b| {
            let ord = a.values()[idx]
                .compare(&b.values()[idx])
                .unwrap_or(Ordering::Equal);
            if ascending {
                ord
            } else {
                ord.reverse()
            }
        });

        self.rows = live.into_iter().map(Slot::Live).collect();
        Ok(())
    }

    /// Nested-loop inner join; columns are qualified with their table names
    pub fn inner_join(&self, right: &Table, condition: &str) -> Result<Table> {
        let predicate = JoinPredicate::parse(condition, self, right)?;
        let schema = Schema::qualified_join(&self.name, &self.schema, &right.name, &right.schema)?;

        let mut rows = Vec::new();
        for (_, l) in self.live_rows() {
            for (_, r) in right.live_rows() {
                if predicate.matches(l, r) {
                    rows.push(Slot::Live(l.concat(r)));
                }
            }
        }

        Ok(Table {
            name: format!("{}_join_{}", self.name, right.name),
            schema,
            rows,
        })
    }
}
