// Copyright (c) 2023-2024 CMU Database Group
//
// Use of this source code is governed by an MIT-style license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.

//! Routing of partition elimination through a join. Each required partition consumer is sent to the child
//! that contains it, and when the join condition compares the consumer's partition key with columns of the
//! other child, that comparison is attached as a filter for the consumer to evaluate at run time.

use anyhow::Result;
use itertools::Itertools;
use optd_core::cascades::ExprHandle;
use optd_core::nodes::{
    and_all, conjuncts, disjuncts, ArcPredNode, ColumnRefSet, LogOpType, PredNode,
};
use optd_core::physical_property::{
    PartFilterMap, PartIndexMap, PartKeys, PartitionPropagationSpec, ScanId,
};
use tracing::{debug, trace};

use super::{child_rel_props, JoinKind, PhysicalJoin, INNER_CHILD, OUTER_CHILD, SCALAR_CHILD};

/// Whether `child_index` hosts the partition consumer. With `outer_test` the consumer is expected in
/// `first`, otherwise in `second`.
pub fn processing_child_with_part_consumer(
    outer_test: bool,
    first: usize,
    second: usize,
    child_index: usize,
) -> bool {
    if outer_test {
        child_index == first
    } else {
        child_index == second
    }
}

/// A comparison between a bare partition key column and an expression over `allowed_refs` only.
fn compares_part_key(pred: &PredNode, part_keys: &PartKeys, allowed_refs: &ColumnRefSet) -> bool {
    let PredNode::BinOp { op, left, right } = pred else {
        return false;
    };
    if !op.is_comparison() {
        return false;
    }
    let key_against = |key: &ArcPredNode, other: &ArcPredNode| {
        let used = other.used_columns();
        key.as_column_ref().is_some_and(|col| part_keys.contains(&col))
            && !used.is_empty()
            && allowed_refs.contains_all(&used)
    };
    key_against(left, right) || key_against(right, left)
}

fn qualifies(pred: &ArcPredNode, part_keys: &PartKeys, allowed_refs: &ColumnRefSet) -> bool {
    match pred.as_ref() {
        PredNode::LogOp {
            op: LogOpType::Or, ..
        } => disjuncts(pred)
            .iter()
            .all(|disjunct| qualifies(disjunct, part_keys, allowed_refs)),
        PredNode::LogOp {
            op: LogOpType::And, ..
        } => conjuncts(pred)
            .iter()
            .all(|conjunct| qualifies(conjunct, part_keys, allowed_refs)),
        _ => compares_part_key(pred, part_keys, allowed_refs),
    }
}

/// The conjuncts of `scalar` that restrict a partition key of `scan_id` using only `allowed_refs`. The key
/// sets of the scan are tried in order and the first one with a match is used.
pub fn join_pred_on_part_keys(
    scalar: &ArcPredNode,
    index_map: &PartIndexMap,
    scan_id: ScanId,
    allowed_refs: &ColumnRefSet,
) -> Option<ArcPredNode> {
    let entry = index_map.get(scan_id)?;
    let conjuncts = conjuncts(scalar);
    entry.part_keys.iter().find_map(|part_keys| {
        let preds = conjuncts
            .iter()
            .filter(|conjunct| qualifies(conjunct, part_keys, allowed_refs))
            .cloned()
            .collect_vec();
        (!preds.is_empty()).then(|| and_all(preds))
    })
}

impl PhysicalJoin {
    pub(super) fn compute_part_propagation(
        &self,
        handle: &dyn ExprHandle,
        required: &PartitionPropagationSpec,
        child_index: usize,
    ) -> Result<PartitionPropagationSpec> {
        let outer = child_rel_props(handle, OUTER_CHILD)?;
        let inner = child_rel_props(handle, INNER_CHILD)?;
        let scalar = handle.scalar_child(SCALAR_CHILD);

        let mut index_map = PartIndexMap::default();
        let mut filter_map = PartFilterMap::default();
        for scan_id in required.part_index_map.scan_ids() {
            if required.part_filter_map.contains(scan_id) {
                // Resolved by a selection above the join.
                trace!(event = "part_prop_already_filtered", scan_id = %scan_id);
                continue;
            }

            let outer_consumer = outer.part_info.contains(scan_id);
            if !outer_consumer && !inner.part_info.contains(scan_id) {
                debug!(
                    event = "part_prop_skipped",
                    scan_id = %scan_id,
                    "no join child consumes partitions of this scan"
                );
                continue;
            }
            let allowed_refs = if outer_consumer {
                &inner.output_columns
            } else {
                &outer.output_columns
            };

            let consumer_child = if outer_consumer { OUTER_CHILD } else { INNER_CHILD };
            if self.first_child_to_optimize(consumer_child) {
                // The consumer runs before its sibling, which cannot feed it.
                if child_index == consumer_child {
                    index_map.add_required(&required.part_index_map, scan_id);
                }
                continue;
            }

            let (outer_test, first, second) = match self.kind {
                JoinKind::Hash(_) => (outer_consumer, OUTER_CHILD, INNER_CHILD),
                JoinKind::NestedLoop | JoinKind::CorrelatedNestedLoop => {
                    (!outer_consumer, INNER_CHILD, OUTER_CHILD)
                }
            };
            if !processing_child_with_part_consumer(outer_test, first, second, child_index) {
                continue;
            }

            index_map.add_required(&required.part_index_map, scan_id);
            let filter = scalar
                .as_ref()
                .filter(|_| !self.props.disable_dynamic_partition_elimination)
                .and_then(|scalar| {
                    join_pred_on_part_keys(scalar, &required.part_index_map, scan_id, allowed_refs)
                });
            if let Some(filter) = filter {
                trace!(
                    event = "part_prop_filter",
                    scan_id = %scan_id,
                    child_index,
                    filter = %filter
                );
                filter_map.insert(scan_id, filter);
            }
        }
        Ok(PartitionPropagationSpec::new(index_map, filter_map))
    }
}
