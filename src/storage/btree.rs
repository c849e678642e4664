//! B+ Tree Index for CairnDB
//!
//! This module implements the primary-key index: a B+ tree of configurable
//! order mapping key values to row-slot positions. Leaves hold the
//! `(key, position)` pairs; internal nodes hold separator keys only. Height
//! grows only when the root splits.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use super::tuple::Value;
use crate::condition::CompareOp;
use crate::error::{Error, Result};

/// Direction of a range lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanOrder {
    Ascending,
    Descending,
}

fn key_cmp(a: &Value, b: &Value) -> Ordering {
    a.compare(b).unwrap_or(Ordering::Equal)
}

/// Child to descend into; keys equal to a separator live on its right
fn child_index(keys: &[Value], key: &Value) -> usize {
    match keys.binary_search_by(|k| key_cmp(k, key)) {
        Ok(pos) => pos + 1,
        Err(pos) => pos,
    }
}

/// B+ Tree Node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
enum BPlusNode {
    /// Internal node with separator keys and child pointers
    Internal {
        keys: Vec<Value>,
        children: Vec<BPlusNode>,
    },
    /// Leaf node with keys and row positions
    Leaf { keys: Vec<Value>, values: Vec<usize> },
}

impl BPlusNode {
    fn empty_leaf() -> Self {
        BPlusNode::Leaf {
            keys: Vec::new(),
            values: Vec::new(),
        }
    }
}

/// Result of inserting into a subtree
struct Inserted {
    /// False when an existing key had its value replaced
    new_key: bool,
    /// Separator and right sibling when the node split
    split: Option<(Value, BPlusNode)>,
}

/// B+ Tree Index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BPlusTree {
    /// Maximum children per internal node; nodes hold at most `order - 1` keys
    order: usize,
    /// Root node
    root: BPlusNode,
    /// Number of entries
    size: usize,
}

impl BPlusTree {
    /// Create a new empty B+ tree; `order` must be at least 3
    pub fn new(order: usize) -> Result<Self> {
        if order < 3 {
            return Err(Error::InvalidConfig(format!(
                "B+ tree order must be at least 3, got {}",
                order
            )));
        }
        Ok(Self {
            order,
            root: BPlusNode::empty_leaf(),
            size: 0,
        })
    }

    /// Build a tree from `(key, position)` pairs in the given order
    pub fn build(order: usize, entries: impl IntoIterator<Item = (Value, usize)>) -> Result<Self> {
        let mut tree = Self::new(order)?;
        for (key, position) in entries {
            tree.insert(key, position);
        }
        Ok(tree)
    }

    /// Insert a key-value pair; an existing key takes the new value
    pub fn insert(&mut self, key: Value, value: usize) {
        let max_keys = self.order - 1;
        let inserted = Self::insert_recursive(&mut self.root, key, value, max_keys);

        if let Some((separator, right)) = inserted.split {
            // Root split, create new root
            let left = std::mem::replace(&mut self.root, BPlusNode::empty_leaf());
            self.root = BPlusNode::Internal {
                keys: vec![separator],
                children: vec![left, right],
            };
        }

        if inserted.new_key {
            self.size += 1;
        }
    }

    fn insert_recursive(node: &mut BPlusNode, key: Value, value: usize, max_keys: usize) -> Inserted {
        match node {
            BPlusNode::Leaf { keys, values } => {
                let pos = match keys.binary_search_by(|k| key_cmp(k, &key)) {
                    Ok(pos) => {
                        values[pos] = value;
                        return Inserted {
                            new_key: false,
                            split: None,
                        };
                    }
                    Err(pos) => pos,
                };
                keys.insert(pos, key);
                values.insert(pos, value);

                let split = if keys.len() > max_keys {
                    let mid = keys.len() / 2;
                    let right_keys = keys.split_off(mid);
                    let right_values = values.split_off(mid);
                    let separator = right_keys[0].clone();
                    Some((
                        separator,
                        BPlusNode::Leaf {
                            keys: right_keys,
                            values: right_values,
                        },
                    ))
                } else {
                    None
                };
                Inserted {
                    new_key: true,
                    split,
                }
            }
            BPlusNode::Internal { keys, children } => {
                let pos = child_index(keys, &key);
                let inserted = Self::insert_recursive(&mut children[pos], key, value, max_keys);

                let split = match inserted.split {
                    Some((separator, right)) => {
                        keys.insert(pos, separator);
                        children.insert(pos + 1, right);

                        if keys.len() > max_keys {
                            let mid = keys.len() / 2;
                            let right_keys = keys.split_off(mid + 1);
                            // keys[mid] moves up rather than staying in either half
                            let separator = keys.pop();
                            let right_children = children.split_off(mid + 1);
                            separator.map(|sep| {
                                (
                                    sep,
                                    BPlusNode::Internal {
                                        keys: right_keys,
                                        children: right_children,
                                    },
                                )
                            })
                        } else {
                            None
                        }
                    }
                    None => None,
                };
                Inserted {
                    new_key: inserted.new_key,
                    split,
                }
            }
        }
    }

    /// Position stored for a key
    pub fn lookup_equal(&self, key: &Value) -> Option<usize> {
        let mut curr = &self.root;
        loop {
            match curr {
                BPlusNode::Leaf { keys, values } => {
                    return keys
                        .binary_search_by(|k| key_cmp(k, key))
                        .ok()
                        .map(|pos| values[pos]);
                }
                BPlusNode::Internal { keys, children } => {
                    curr = &children[child_index(keys, key)];
                }
            }
        }
    }

    /// All entries whose key satisfies `entry_key <op> key`, ordered by key
    pub fn lookup_range(&self, op: CompareOp, key: &Value, order: ScanOrder) -> Vec<(Value, usize)> {
        let mut result = Vec::new();
        if op == CompareOp::Eq {
            if let Some(position) = self.lookup_equal(key) {
                result.push((key.clone(), position));
            }
            return result;
        }

        Self::range_recursive(&self.root, op, key, &mut result);
        if order == ScanOrder::Descending {
            result.reverse();
        }
        result
    }

    fn range_recursive(node: &BPlusNode, op: CompareOp, key: &Value, result: &mut Vec<(Value, usize)>) {
        match node {
            BPlusNode::Leaf { keys, values } => {
                for (k, v) in keys.iter().zip(values) {
                    if k.compare(key).map_or(false, |ord| op.holds(ord)) {
                        result.push((k.clone(), *v));
                    }
                }
            }
            BPlusNode::Internal { keys, children } => {
                // Children left of the boundary hold only smaller keys,
                // children right of it only larger ones.
                let boundary = child_index(keys, key);
                let range = match op {
                    CompareOp::Gt | CompareOp::Ge => boundary..children.len(),
                    _ => 0..boundary + 1,
                };
                for child in &children[range] {
                    Self::range_recursive(child, op, key, result);
                }
            }
        }
    }

    /// All entries in ascending key order
    pub fn entries(&self) -> Vec<(Value, usize)> {
        let mut result = Vec::with_capacity(self.size);
        Self::collect_all(&self.root, &mut result);
        result
    }

    fn collect_all(node: &BPlusNode, result: &mut Vec<(Value, usize)>) {
        match node {
            BPlusNode::Leaf { keys, values } => {
                result.extend(keys.iter().cloned().zip(values.iter().copied()));
            }
            BPlusNode::Internal { children, .. } => {
                for child in children {
                    Self::collect_all(child, result);
                }
            }
        }
    }

    /// Number of levels from root to leaves
    pub fn height(&self) -> usize {
        let mut height = 1;
        let mut curr = &self.root;
        while let BPlusNode::Internal { children, .. } = curr {
            height += 1;
            curr = &children[0];
        }
        height
    }

    /// Branching order
    pub fn order(&self) -> usize {
        self.order
    }

    /// Number of entries in the tree
    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::seq::SliceRandom;
    use rand::SeedableRng;

    fn key(i: i64) -> Value {
        Value::Int(i)
    }

    fn keys_of(entries: &[(Value, usize)]) -> Vec<i64> {
        entries.iter().filter_map(|(k, _)| k.as_i64()).collect()
    }

    #[test]
    fn test_btree_insert_and_search() {
        let mut tree = BPlusTree::new(3).unwrap();

        tree.insert(key(5), 0);
        tree.insert(key(3), 1);
        tree.insert(key(7), 2);
        tree.insert(key(1), 3);

        assert_eq!(tree.lookup_equal(&key(5)), Some(0));
        assert_eq!(tree.lookup_equal(&key(3)), Some(1));
        assert_eq!(tree.lookup_equal(&key(7)), Some(2));
        assert_eq!(tree.lookup_equal(&key(1)), Some(3));
        assert_eq!(tree.lookup_equal(&key(99)), None);
        assert_eq!(tree.len(), 4);
    }

    #[test]
    fn test_btree_latest_value_wins() {
        let mut tree = BPlusTree::new(3).unwrap();
        for i in 0..10 {
            tree.insert(key(i), i as usize);
        }
        tree.insert(key(4), 40);

        assert_eq!(tree.lookup_equal(&key(4)), Some(40));
        assert_eq!(tree.len(), 10);
    }

    #[test]
    fn test_btree_random_order_range_scan() {
        let n = 500;
        let mut keys: Vec<i64> = (0..n).collect();
        keys.shuffle(&mut StdRng::seed_from_u64(7));

        let mut tree = BPlusTree::new(3).unwrap();
        for &k in &keys {
            tree.insert(key(k), k as usize);
        }

        let all = tree.lookup_range(CompareOp::Ge, &key(0), ScanOrder::Ascending);
        assert_eq!(keys_of(&all), (0..n).collect::<Vec<_>>());
        for k in 0..n {
            assert_eq!(tree.lookup_equal(&key(k)), Some(k as usize));
        }
    }

    #[test]
    fn test_btree_range_operators() {
        let mut tree = BPlusTree::new(4).unwrap();
        for i in [1, 3, 5, 7, 9, 11, 13, 15] {
            tree.insert(key(i), i as usize);
        }

        let gt = tree.lookup_range(CompareOp::Gt, &key(7), ScanOrder::Ascending);
        assert_eq!(keys_of(&gt), vec![9, 11, 13, 15]);

        let ge = tree.lookup_range(CompareOp::Ge, &key(7), ScanOrder::Ascending);
        assert_eq!(keys_of(&ge), vec![7, 9, 11, 13, 15]);

        let lt = tree.lookup_range(CompareOp::Lt, &key(7), ScanOrder::Descending);
        assert_eq!(keys_of(&lt), vec![5, 3, 1]);

        let le = tree.lookup_range(CompareOp::Le, &key(6), ScanOrder::Ascending);
        assert_eq!(keys_of(&le), vec![1, 3, 5]);

        let eq = tree.lookup_range(CompareOp::Eq, &key(9), ScanOrder::Ascending);
        assert_eq!(eq, vec![(key(9), 9)]);
    }

    #[test]
    fn test_btree_height_is_logarithmic() {
        let mut tree = BPlusTree::new(3).unwrap();
        for i in 0..1024 {
            tree.insert(key(i), i as usize);
        }
        // Order 3: leaves hold 1..=2 keys, internal nodes 2..=3 children.
        assert!(tree.height() >= 7);
        assert!(tree.height() <= 11);
    }

    #[test]
    fn test_btree_string_keys() {
        let mut tree = BPlusTree::new(5).unwrap();
        for (i, name) in ["delta", "alpha", "echo", "charlie", "bravo"].iter().enumerate() {
            tree.insert(Value::from(*name), i);
        }
        let names: Vec<String> = tree.entries().into_iter().map(|(k, _)| k.to_string()).collect();
        assert_eq!(names, vec!["alpha", "bravo", "charlie", "delta", "echo"]);
    }

    #[test]
    fn test_btree_rejects_small_order() {
        assert!(matches!(BPlusTree::new(2), Err(Error::InvalidConfig(_))));
        assert!(matches!(
            BPlusTree::build(0, vec![(key(1), 0)]),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_btree_build() {
        let tree = BPlusTree::build(3, (0..20).map(|i| (key(i * 2), i as usize))).unwrap();
        assert_eq!(tree.len(), 20);
        assert_eq!(tree.lookup_equal(&key(38)), Some(19));
        assert_eq!(tree.lookup_equal(&key(37)), None);
    }
}
