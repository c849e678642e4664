//! Query Planner for CairnDB
//!
//! Chooses how a select reads its source table. The choice is made once,
//! from the resolved predicate and the table's registered index, before
//! anything is read.

use crate::condition::{CompareOp, Predicate};
use crate::storage::{BPlusTree, ScanOrder, Table, Value};

/// How an index scan searches the tree
#[derive(Debug, Clone, PartialEq)]
pub enum IndexLookup {
    Equal(Value),
    Range(CompareOp, Value),
}

impl IndexLookup {
    /// Candidate row positions, in key order
    pub fn positions(&self, tree: &BPlusTree) -> Vec<usize> {
        match self {
            IndexLookup::Equal(key) => tree.lookup_equal(key).into_iter().collect(),
            IndexLookup::Range(op, key) => tree
                .lookup_range(*op, key, ScanOrder::Ascending)
                .into_iter()
                .map(|(_, pos)| pos)
                .collect(),
        }
    }
}

/// Physical access path of a select
#[derive(Debug, Clone, PartialEq)]
pub enum QueryPlan {
    /// Visit every live row
    FullScan { predicate: Option<Predicate> },
    /// Probe the primary-key index, then re-check the predicate
    IndexScan {
        index_name: String,
        lookup: IndexLookup,
        predicate: Predicate,
    },
}

impl QueryPlan {
    /// Use the index when the predicate targets the indexed primary key
    pub fn choose(table: &Table, predicate: Option<Predicate>, index_name: Option<&str>) -> QueryPlan {
        let Some(index_name) = index_name else {
            return QueryPlan::FullScan { predicate };
        };
        let Some(predicate) = predicate else {
            return QueryPlan::FullScan { predicate: None };
        };

        if table.schema().primary_key_index() != Some(predicate.column) {
            return QueryPlan::FullScan {
                predicate: Some(predicate),
            };
        }

        let lookup = match predicate.op {
            CompareOp::Eq => IndexLookup::Equal(predicate.value.clone()),
            op => IndexLookup::Range(op, predicate.value.clone()),
        };
        let plan = QueryPlan::IndexScan {
            index_name: index_name.to_string(),
            lookup,
            predicate,
        };
        tracing::debug!("select on '{}' uses {:?}", table.name(), plan);
        plan
    }

    pub fn is_index_scan(&self) -> bool {
        matches!(self, QueryPlan::IndexScan { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::DataType;

    fn people() -> Table {
        Table::create(
            "people",
            &["id", "name", "age"],
            &[DataType::Int, DataType::Str, DataType::Int],
            Some("id"),
        )
        .unwrap()
    }

    fn pred(table: &Table, text: &str) -> Option<Predicate> {
        Some(Predicate::parse(text, table.schema()).unwrap())
    }

    #[test]
    fn test_primary_key_with_index_uses_index() {
        let table = people();
        let plan = QueryPlan::choose(&table, pred(&table, "id==3"), Some("people_pk"));
        assert!(matches!(
            plan,
            QueryPlan::IndexScan {
                lookup: IndexLookup::Equal(Value::Int(3)),
                ..
            }
        ));

        let plan = QueryPlan::choose(&table, pred(&table, "5<id"), Some("people_pk"));
        assert!(matches!(
            plan,
            QueryPlan::IndexScan {
                lookup: IndexLookup::Range(CompareOp::Gt, Value::Int(5)),
                ..
            }
        ));
    }

    #[test]
    fn test_full_scan_otherwise() {
        let table = people();
        assert!(!QueryPlan::choose(&table, pred(&table, "id==3"), None).is_index_scan());
        assert!(!QueryPlan::choose(&table, pred(&table, "age==3"), Some("people_pk")).is_index_scan());
        assert_eq!(
            QueryPlan::choose(&table, None, Some("people_pk")),
            QueryPlan::FullScan { predicate: None }
        );
    }

    #[test]
    fn test_lookup_positions() {
        let tree = BPlusTree::build(3, (0..10).map(|i| (Value::Int(i), i as usize * 2))).unwrap();
        assert_eq!(IndexLookup::Equal(Value::Int(4)).positions(&tree), vec![8]);
        assert!(IndexLookup::Equal(Value::Int(40)).positions(&tree).is_empty());
        assert_eq!(
            IndexLookup::Range(CompareOp::Ge, Value::Int(8)).positions(&tree),
            vec![16, 18]
        );
    }
}
