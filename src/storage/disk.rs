//! Disk manager for CairnDB
//!
//! This module handles file I/O for one database directory: one unit per
//! table and one per index under `indexes/`.

use crate::error::Result;
use crate::storage::btree::BPlusTree;
use crate::storage::codec;
use crate::storage::table::Table;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

pub const TABLE_EXTENSION: &str = "tbl";
pub const INDEX_EXTENSION: &str = "idx";
pub const INDEX_DIR: &str = "indexes";

/// Disk manager
#[derive(Debug, Clone)]
pub struct DiskManager {
    /// Directory where data files are stored
    data_dir: PathBuf,
}

impl DiskManager {
    /// Open a database directory, creating it and `indexes/` if missing
    pub fn new(data_dir: impl Into<PathBuf>) -> Result<Self> {
        let data_dir = data_dir.into();
        fs::create_dir_all(data_dir.join(INDEX_DIR))?;
        Ok(Self { data_dir })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn table_path(&self, name: &str) -> PathBuf {
        self.data_dir.join(format!("{}.{}", name, TABLE_EXTENSION))
    }

    pub fn index_path(&self, index_name: &str) -> PathBuf {
        self.data_dir
            .join(INDEX_DIR)
            .join(format!("meta_{}_index.{}", index_name, INDEX_EXTENSION))
    }

    pub fn write_table(&self, table: &Table) -> Result<()> {
        let bytes = codec::save_table(table)?;
        write_atomic(&self.table_path(table.name()), &bytes)?;
        tracing::debug!("wrote table unit '{}' ({} bytes)", table.name(), bytes.len());
        Ok(())
    }

    /// Read one table unit; `None` if it does not exist
    pub fn read_table(&self, name: &str) -> Result<Option<Table>> {
        match fs::read(self.table_path(name)) {
            Ok(data) => Ok(Some(codec::load_table(&data)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn remove_table(&self, name: &str) -> Result<()> {
        remove_if_exists(&self.table_path(name))
    }

    /// Load every table unit in the directory, ordered by file name
    pub fn load_tables(&self) -> Result<Vec<Table>> {
        let mut paths = Vec::new();
        for entry in fs::read_dir(&self.data_dir)? {
            let path = entry?.path();
            if path.is_file() && path.extension().map_or(false, |e| e == TABLE_EXTENSION) {
                paths.push(path);
            }
        }
        paths.sort();

        let mut tables = Vec::with_capacity(paths.len());
        for path in paths {
            tables.push(codec::load_table(&fs::read(&path)?)?);
        }
        Ok(tables)
    }

    pub fn write_index(&self, index_name: &str, tree: &BPlusTree) -> Result<()> {
        let bytes = codec::save_index(tree)?;
        write_atomic(&self.index_path(index_name), &bytes)?;
        tracing::debug!("wrote index unit '{}' ({} entries)", index_name, tree.len());
        Ok(())
    }

    /// Read one index unit; `None` if it does not exist
    pub fn read_index(&self, index_name: &str) -> Result<Option<BPlusTree>> {
        match fs::read(self.index_path(index_name)) {
            Ok(data) => Ok(Some(codec::load_index(&data)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn remove_index(&self, index_name: &str) -> Result<()> {
        remove_if_exists(&self.index_path(index_name))
    }
}

/// Write to a `.tmp` sibling, fsync, then rename over the target
pub fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let tmp = path.with_extension("tmp");
    {
        let mut file: File = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp)?;
        file.write_all(data)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
