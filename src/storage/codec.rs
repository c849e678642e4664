//! Binary envelope for persisted units
//!
//! Layout:
//! ```text
//! +--------+-------------+----------------+-------------------+
//! | magic  | version u16 | length u64     | JSON payload      |
//! | 4 B    | LE          | LE             | `length` bytes    |
//! +--------+-------------+----------------+-------------------+
//! ```

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use bytes::{BufMut, Bytes, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::Read;

use super::btree::BPlusTree;
use super::table::Table;
use crate::error::{Error, Result};

pub const TABLE_MAGIC: &[u8; 4] = b"CDBT";
pub const INDEX_MAGIC: &[u8; 4] = b"CDBI";
pub const FORMAT_VERSION: u16 = 1;

const HEADER_SIZE: usize = 4 + 2 + 8;

fn encode<T: Serialize>(magic: &[u8; 4], value: &T) -> Result<Bytes> {
    let payload = serde_json::to_vec(value)?;
    let mut writer = BytesMut::with_capacity(HEADER_SIZE + payload.len()).writer();

    std::io::Write::write_all(&mut writer, magic)?;
    writer.write_u16::<LittleEndian>(FORMAT_VERSION)?;
    writer.write_u64::<LittleEndian>(payload.len() as u64)?;
    std::io::Write::write_all(&mut writer, &payload)?;

    Ok(writer.into_inner().freeze())
}

fn decode<T: DeserializeOwned>(magic: &[u8; 4], data: &[u8]) -> Result<T> {
    if data.len() < HEADER_SIZE {
        return Err(Error::Corrupted(format!(
            "unit is {} bytes, shorter than its header",
            data.len()
        )));
    }

    let mut reader = data;
    let mut found = [0u8; 4];
    reader.read_exact(&mut found)?;
    if &found != magic {
        return Err(Error::Corrupted(format!(
            "bad magic {:?}, expected {:?}",
            String::from_utf8_lossy(&found),
            String::from_utf8_lossy(magic)
        )));
    }

    let version = reader.read_u16::<LittleEndian>()?;
    if version != FORMAT_VERSION {
        return Err(Error::Corrupted(format!("unsupported format version {}", version)));
    }

    let length = reader.read_u64::<LittleEndian>()? as usize;
    if reader.len() != length {
        return Err(Error::Corrupted(format!(
            "payload length {} does not match header {}",
            reader.len(),
            length
        )));
    }

    Ok(serde_json::from_slice(reader)?)
}

/// Serialize a table into a self-describing unit
pub fn save_table(table: &Table) -> Result<Bytes> {
    encode(TABLE_MAGIC, table)
}

/// Deserialize a table unit
pub fn load_table(data: &[u8]) -> Result<Table> {
    decode(TABLE_MAGIC, data)
}

/// Serialize a B+ tree index
pub fn save_index(tree: &BPlusTree) -> Result<Bytes> {
    encode(INDEX_MAGIC, tree)
}

/// Deserialize a B+ tree index unit
pub fn load_index(data: &[u8]) -> Result<BPlusTree> {
    decode(INDEX_MAGIC, data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::DataType;
    use crate::condition::Predicate;
    use crate::storage::Value;

    fn people() -> Table {
        Table::create(
            "people",
            &["id", "name", "tags"],
            &[DataType::Int, DataType::Str, DataType::List],
            Some("id"),
        )
        .unwrap()
    }

    #[test]
    fn test_empty_table_round_trip() {
        let table = people();
        let bytes = save_table(&table).unwrap();

        assert_eq!(&bytes[..4], TABLE_MAGIC);
        assert_eq!(load_table(&bytes).unwrap(), table);
    }

    #[test]
    fn test_table_with_tombstones_round_trip() {
        let mut table = people();
        let mut stack = Vec::new();
        for i in 0..5 {
            let tags = Value::List(vec![Value::Int(i), Value::from("x")]);
            table
                .insert(vec![Value::Int(i), Value::from(format!("p{}", i)), tags], &mut stack)
                .unwrap();
        }
        let pred = Predicate::parse("id<=1", table.schema()).unwrap();
        table.delete_where(&pred);
        let pred = Predicate::parse("id==3", table.schema()).unwrap();
        table.delete_where(&pred);

        let loaded = load_table(&save_table(&table).unwrap()).unwrap();
        assert_eq!(loaded, table);
        assert_eq!(loaded.tombstone_positions(), vec![0, 1, 3]);
        assert_eq!(loaded.schema().primary_key().map(|c| c.name.as_str()), Some("id"));
    }

    #[test]
    fn test_float_values_round_trip() {
        let mut table = Table::create(
            "readings",
            &["k", "v"],
            &[DataType::Float, DataType::Float],
            Some("k"),
        )
        .unwrap();
        let mut stack = Vec::new();
        for (k, v) in [(-0.0, 0.1), (1.5, -0.0), (-2.25, 1e300), (3.0, f64::MIN_POSITIVE)] {
            table
                .insert(vec![Value::Float(k), Value::Float(v)], &mut stack)
                .unwrap();
        }

        let loaded = load_table(&save_table(&table).unwrap()).unwrap();
        assert_eq!(loaded, table);
        assert_eq!(loaded.row(0).unwrap().values()[0], Value::Float(0.0));
        assert_eq!(loaded.row(1).unwrap().values()[1], Value::Float(0.0));
        assert_eq!(loaded.row(2).unwrap().values()[1], Value::Float(1e300));

        let tree = BPlusTree::build(3, loaded.primary_key_entries().unwrap()).unwrap();
        let tree = load_index(&save_index(&tree).unwrap()).unwrap();
        assert_eq!(tree.lookup_equal(&Value::Float(-2.25)), Some(2));
        assert_eq!(tree.lookup_equal(&Value::Float(0.0)), Some(0));
    }

    #[test]
    fn test_index_round_trip() {
        let tree = BPlusTree::build(3, (0..50).map(|i| (Value::Int(i), i as usize))).unwrap();
        let loaded = load_index(&save_index(&tree).unwrap()).unwrap();
        assert_eq!(loaded, tree);
        assert_eq!(loaded.lookup_equal(&Value::Int(42)), Some(42));
    }

    #[test]
    fn test_rejects_damaged_units() {
        let bytes = save_table(&people()).unwrap();

        assert!(matches!(load_index(&bytes), Err(Error::Corrupted(_))));
        assert!(matches!(load_table(&bytes[..8]), Err(Error::Corrupted(_))));
        assert!(matches!(
            load_table(&bytes[..bytes.len() - 1]),
            Err(Error::Corrupted(_))
        ));

        let mut bad_version = bytes.to_vec();
        bad_version[4] = 9;
        assert!(matches!(load_table(&bad_version), Err(Error::Corrupted(_))));
    }
}
