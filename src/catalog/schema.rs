//! Schema definitions for CairnDB
//!
//! This module defines table schemas and column metadata.

use super::types::DataType;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Column definition in a table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    /// Column name
    pub name: String,
    /// Data type
    pub data_type: DataType,
    /// Column position (0-indexed)
    pub position: usize,
}

impl Column {
    /// Create a new column
    pub fn new(name: impl Into<String>, data_type: DataType, position: usize) -> Self {
        Self {
            name: name.into(),
            data_type,
            position,
        }
    }
}

/// Table schema - ordered columns plus an optional primary key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    /// Ordered list of columns
    columns: Vec<Column>,
    /// Column name to index mapping
    name_to_index: HashMap<String, usize>,
    /// Position of the primary-key column
    primary_key: Option<usize>,
}

impl Schema {
    /// Build a schema from parallel name/type lists
    pub fn new(names: &[&str], types: &[DataType], primary_key: Option<&str>) -> Result<Self> {
        if names.len() != types.len() {
            return Err(Error::SchemaViolation(format!(
                "{} column names but {} column types",
                names.len(),
                types.len()
            )));
        }
        let columns = names
            .iter()
            .zip(types)
            .enumerate()
            .map(|(i, (name, data_type))| Column::new(name.trim(), *data_type, i))
            .collect();
        Self::from_columns(columns, primary_key)
    }

    /// Create a schema from a list of columns
    pub fn from_columns(columns: Vec<Column>, primary_key: Option<&str>) -> Result<Self> {
        let mut schema = Self {
            columns: Vec::with_capacity(columns.len()),
            name_to_index: HashMap::new(),
            primary_key: None,
        };
        for col in columns {
            schema.add_column(col)?;
        }
        if let Some(pk) = primary_key {
            schema.primary_key = Some(schema.index_of(pk)?);
        }
        Ok(schema)
    }

    fn add_column(&mut self, mut column: Column) -> Result<()> {
        if column.name.is_empty() {
            return Err(Error::SchemaViolation("empty column name".to_string()));
        }
        if self.name_to_index.contains_key(&column.name) {
            return Err(Error::SchemaViolation(format!(
                "duplicate column name '{}'",
                column.name
            )));
        }
        column.position = self.columns.len();
        self.name_to_index
            .insert(column.name.clone(), column.position);
        self.columns.push(column);
        Ok(())
    }

    /// Get column by name
    pub fn get_column(&self, name: &str) -> Option<&Column> {
        self.name_to_index.get(name).map(|&idx| &self.columns[idx])
    }

    /// Get column index by name
    pub fn get_column_index(&self, name: &str) -> Option<usize> {
        self.name_to_index.get(name).copied()
    }

    /// Column index by name, as an error when missing
    pub fn index_of(&self, name: &str) -> Result<usize> {
        self.get_column_index(name)
            .ok_or_else(|| Error::ColumnNotFound(name.to_string(), String::new()))
    }

    /// Get all columns
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Get number of columns
    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Check if column exists
    pub fn has_column(&self, name: &str) -> bool {
        self.name_to_index.contains_key(name)
    }

    /// Get column names
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Get column types
    pub fn column_types(&self) -> Vec<DataType> {
        self.columns.iter().map(|c| c.data_type).collect()
    }

    /// Position of the primary-key column
    pub fn primary_key_index(&self) -> Option<usize> {
        self.primary_key
    }

    /// The primary-key column
    pub fn primary_key(&self) -> Option<&Column> {
        self.primary_key.map(|idx| &self.columns[idx])
    }

    pub(crate) fn set_column_type(&mut self, index: usize, data_type: DataType) {
        self.columns[index].data_type = data_type;
    }

    /// Schema of a projection; the primary key survives only if projected
    pub fn project(&self, indices: &[usize]) -> Schema {
        let columns: Vec<Column> = indices
            .iter()
            .enumerate()
            .map(|(pos, &idx)| Column::new(self.columns[idx].name.clone(), self.columns[idx].data_type, pos))
            .collect();
        let name_to_index = columns
            .iter()
            .map(|c| (c.name.clone(), c.position))
            .collect();
        let primary_key = self
            .primary_key
            .and_then(|pk| indices.iter().position(|&idx| idx == pk));
        Schema {
            columns,
            name_to_index,
            primary_key,
        }
    }

    /// Concatenate two schemas, qualifying every column with its table name
    pub fn qualified_join(left_name: &str, left: &Schema, right_name: &str, right: &Schema) -> Result<Schema> {
        let columns = left
            .columns
            .iter()
            .map(|c| (left_name, c))
            .chain(right.columns.iter().map(|c| (right_name, c)))
            .enumerate()
            .map(|(pos, (table, c))| Column::new(format!("{}.{}", table, c.name), c.data_type, pos))
            .collect();
        Schema::from_columns(columns, None)
    }
}
