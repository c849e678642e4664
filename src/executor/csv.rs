//! CSV import and export
//!
//! Plain comma separated text: the first line holds column names, no
//! quoting or escaping.

use std::fs;
use std::path::{Path, PathBuf};

use super::executor::ExecutionEngine;
use crate::catalog::DataType;
use crate::error::{Error, Result};
use crate::storage::Value;

fn split_line(line: &str) -> Vec<&str> {
    line.split(',').map(str::trim).collect()
}

impl ExecutionEngine {
    /// Create `table` from a CSV file and load its rows under one lock
    ///
    /// Columns are `str` unless `column_types` is given. Returns the number
    /// of rows inserted.
    pub fn import_csv(
        &mut self,
        table: &str,
        path: impl AsRef<Path>,
        column_types: Option<&[DataType]>,
        primary_key: Option<&str>,
    ) -> Result<usize> {
        let text = fs::read_to_string(path.as_ref())?;
        let mut lines = text.lines().filter(|l| !l.trim().is_empty());

        let header = lines
            .next()
            .ok_or_else(|| Error::SchemaViolation(format!("{} has no header line", path.as_ref().display())))?;
        let names = split_line(header);
        let types = match column_types {
            Some(types) => types.to_vec(),
            None => vec![DataType::Str; names.len()],
        };

        self.create_table(table, &names, &types, primary_key)?;

        let order = self.config.btree_order;
        let rows: Vec<Vec<Value>> = lines
            .map(|line| split_line(line).into_iter().map(Value::from).collect())
            .collect();

        self.catalog.reload()?;
        let count = self.locked(table, |catalog| {
            let mut stack = catalog.insert_stack(table);
            let target = catalog.get_mut(table)?;
            for row in rows.iter().cloned() {
                target.insert(row, &mut stack)?;
            }
            catalog.set_insert_stack(table, &stack)?;
            super::executor::rebuild_index(catalog, table, order)?;
            Ok(rows.len())
        })?;

        tracing::info!("imported {} rows into '{}'", count, table);
        Ok(count)
    }

    /// Write a table's header and live rows; defaults to `<table>.csv`
    pub fn export_csv(&mut self, table: &str, path: Option<&Path>) -> Result<PathBuf> {
        let snapshot = self.table(table)?;
        let path = path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(format!("{}.csv", table)));

        let mut out = snapshot.schema().column_names().join(",");
        out.push('\n');
        for (_, row) in snapshot.live_rows() {
            let fields: Vec<String> = row.values().iter().map(|v| v.to_string().replace(' ', "")).collect();
            out.push_str(&fields.join(","));
            out.push('\n');
        }

        fs::write(&path, out)?;
        tracing::info!("exported '{}' to {}", table, path.display());
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DatabaseConfig;
    use tempfile::TempDir;

    #[test]
    fn test_import_then_export() {
        let dir = TempDir::new().unwrap();
        let mut engine =
            ExecutionEngine::open(DatabaseConfig::new("csv").data_root(dir.path())).unwrap();

        let source = dir.path().join("cities.csv");
        fs::write(&source, "id,city,population\n1,Athens,664046\n2,Patras,213984\n").unwrap();

        let count = engine
            .import_csv(
                "cities",
                &source,
                Some(&[DataType::Int, DataType::Str, DataType::Int]),
                Some("id"),
            )
            .unwrap();
        assert_eq!(count, 2);
        assert_eq!(engine.length("cities").unwrap(), 2);
        assert!(!engine.is_locked("cities").unwrap());

        let target = dir.path().join("out.csv");
        engine.export_csv("cities", Some(target.as_path())).unwrap();
        assert_eq!(
            fs::read_to_string(&target).unwrap(),
            "id,city,population\n1,Athens,664046\n2,Patras,213984\n"
        );
    }

    #[test]
    fn test_import_defaults_to_str_columns() {
        let dir = TempDir::new().unwrap();
        let mut engine =
            ExecutionEngine::open(DatabaseConfig::new("csv").data_root(dir.path())).unwrap();
        let source = dir.path().join("codes.csv");
        fs::write(&source, "code\n007\n").unwrap();

        engine.import_csv("codes", &source, None, None).unwrap();
        let table = engine.table("codes").unwrap();
        assert_eq!(table.schema().column_types(), vec![DataType::Str]);
        assert_eq!(table.column_values("code").unwrap(), vec![&Value::from("007")]);
    }
}
