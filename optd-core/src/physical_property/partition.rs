// Copyright (c) 2023-2024 CMU Database Group
//
// Use of this source code is governed by an MIT-style license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.

//! Partition propagation. A partitioned-table scan (the partition consumer) may skip partitions when an
//! operator elsewhere in the plan (the propagator) computes which partitions can hold matching rows. The
//! required side of these specs tells a subtree which consumers it must resolve and, optionally, which filter
//! the propagator should evaluate.

use std::collections::BTreeMap;
use std::fmt::Display;

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use super::PhysicalProperty;
use crate::nodes::{ArcPredNode, ColumnRef};

/// Identifies one partition consumer in the query.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug, Hash, Serialize, Deserialize)]
pub struct ScanId(pub usize);

impl Display for ScanId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "scan{}", self.0)
    }
}

/// The partition key of a table, one key column per partitioning level.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PartKeys(pub Vec<ColumnRef>);

impl PartKeys {
    pub fn contains(&self, col: &ColumnRef) -> bool {
        self.0.contains(col)
    }
}

impl Display for PartKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({})", self.0.iter().join(", "))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PartInfoEntry {
    pub table: String,
    pub part_keys: Vec<PartKeys>,
}

/// The partition consumers found in a subtree. This is a logical property.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PartInfo(BTreeMap<ScanId, PartInfoEntry>);

impl PartInfo {
    pub fn add_consumer(
        &mut self,
        scan_id: ScanId,
        table: impl Into<String>,
        part_keys: Vec<PartKeys>,
    ) {
        self.0.insert(
            scan_id,
            PartInfoEntry {
                table: table.into(),
                part_keys,
            },
        );
    }

    pub fn contains(&self, scan_id: ScanId) -> bool {
        self.0.contains_key(&scan_id)
    }

    pub fn get(&self, scan_id: ScanId) -> Option<&PartInfoEntry> {
        self.0.get(&scan_id)
    }

    pub fn combine(&self, other: &PartInfo) -> PartInfo {
        let mut combined = self.clone();
        for (scan_id, entry) in &other.0 {
            combined.0.entry(*scan_id).or_insert_with(|| entry.clone());
        }
        combined
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PartIndexEntry {
    pub table: String,
    pub part_keys: Vec<PartKeys>,
    /// Number of propagators still expected to resolve this consumer.
    pub propagators: usize,
}

/// Partition consumers a subtree has to resolve, keyed by scan id.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PartIndexMap(BTreeMap<ScanId, PartIndexEntry>);

impl PartIndexMap {
    pub fn insert(&mut self, scan_id: ScanId, entry: PartIndexEntry) {
        self.0.insert(scan_id, entry);
    }

    pub fn get(&self, scan_id: ScanId) -> Option<&PartIndexEntry> {
        self.0.get(&scan_id)
    }

    pub fn contains(&self, scan_id: ScanId) -> bool {
        self.0.contains_key(&scan_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ScanId, &PartIndexEntry)> {
        self.0.iter()
    }

    /// Scan ids in ascending order.
    pub fn scan_ids(&self) -> impl Iterator<Item = ScanId> + '_ {
        self.0.keys().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Copies the requirement for `scan_id` from `source`, keeping its expected propagators. Returns false if
    /// `source` has no such requirement.
    pub fn add_required(&mut self, source: &PartIndexMap, scan_id: ScanId) -> bool {
        match source.get(scan_id) {
            Some(entry) => {
                self.insert(scan_id, entry.clone());
                true
            }
            None => false,
        }
    }

    /// Union of both maps. Consumers present in both add up their expected propagators.
    pub fn combine(&self, other: &PartIndexMap) -> PartIndexMap {
        let mut combined = self.clone();
        for (scan_id, entry) in &other.0 {
            combined
                .0
                .entry(*scan_id)
                .and_modify(|existing| existing.propagators += entry.propagators)
                .or_insert_with(|| entry.clone());
        }
        combined
    }
}

/// Filters on the partition keys of partition consumers, keyed by scan id.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PartFilterMap(BTreeMap<ScanId, ArcPredNode>);

impl PartFilterMap {
    pub fn insert(&mut self, scan_id: ScanId, filter: ArcPredNode) {
        self.0.insert(scan_id, filter);
    }

    pub fn get(&self, scan_id: ScanId) -> Option<&ArcPredNode> {
        self.0.get(&scan_id)
    }

    pub fn contains(&self, scan_id: ScanId) -> bool {
        self.0.contains_key(&scan_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ScanId, &ArcPredNode)> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Union of both maps. When both have a filter for the same consumer, the one from `self` is kept.
    pub fn combine(&self, other: &PartFilterMap) -> PartFilterMap {
        let mut combined = self.clone();
        for (scan_id, filter) in &other.0 {
            combined.0.entry(*scan_id).or_insert_with(|| filter.clone());
        }
        combined
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PartitionPropagationSpec {
    pub part_index_map: PartIndexMap,
    pub part_filter_map: PartFilterMap,
}

impl PartitionPropagationSpec {
    pub fn new(part_index_map: PartIndexMap, part_filter_map: PartFilterMap) -> Self {
        Self {
            part_index_map,
            part_filter_map,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.part_index_map.is_empty()
    }
}

impl PhysicalProperty for PartitionPropagationSpec {
    fn satisfies(&self, required: &Self) -> bool {
        required
            .part_index_map
            .scan_ids()
            .all(|scan_id| self.part_index_map.contains(scan_id))
            && required
                .part_filter_map
                .iter()
                .all(|(scan_id, _)| self.part_filter_map.contains(*scan_id))
    }

    fn property_name(&self) -> &'static str {
        "partition_propagation"
    }
}

impl Display for PartitionPropagationSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}]",
            self.part_index_map
                .iter()
                .map(|(scan_id, entry)| match self.part_filter_map.get(*scan_id) {
                    Some(filter) => format!("{}:{} filter({})", scan_id, entry.table, filter),
                    None => format!("{}:{}", scan_id, entry.table),
                })
                .join(", ")
        )
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn entry(table: &str, propagators: usize) -> PartIndexEntry {
        PartIndexEntry {
            table: table.to_string(),
            part_keys: vec![PartKeys(vec![ColumnRef(1)])],
            propagators,
        }
    }

    #[test]
    fn combine_index_maps_adds_propagators() {
        let mut a = PartIndexMap::default();
        a.insert(ScanId(1), entry("sales", 1));
        let mut b = PartIndexMap::default();
        b.insert(ScanId(1), entry("sales", 2));
        b.insert(ScanId(2), entry("orders", 1));
        let combined = a.combine(&b);
        assert_eq!(combined.len(), 2);
        assert_eq!(combined.get(ScanId(1)).unwrap().propagators, 3);
        assert_eq!(combined.get(ScanId(2)).unwrap().table, "orders");
    }

    #[test]
    fn add_required_copies_from_source() {
        let mut source = PartIndexMap::default();
        source.insert(ScanId(4), entry("sales", 1));
        let mut target = PartIndexMap::default();
        assert!(target.add_required(&source, ScanId(4)));
        assert!(!target.add_required(&source, ScanId(5)));
        assert_eq!(target, source);
    }
}
