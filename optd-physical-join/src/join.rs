// Copyright (c) 2023-2024 CMU Database Group
//
// Use of this source code is governed by an MIT-style license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.

//! The physical join operator and the property contract it offers to the cascades search.
//!
//! The search optimizes the children of a join one after another, in [`ChildExecOrder`]. For every property
//! dimension it asks what a child must deliver, passing the plan properties derived for the children it has
//! already optimized (the sibling context), and an optimization request ordinal that picks one of several
//! alternative strategies. Once both children are optimized, it asks the join to derive its own properties.

mod correlated;
mod derived;
mod partition;
mod required;

use std::sync::Arc;

use anyhow::{ensure, Context, Result};
use optd_core::cascades::ExprHandle;
use optd_core::physical_property::PlanProps;
use optd_core::property::RelProps;
use serde::{Deserialize, Serialize};

pub use correlated::{
    distribution_requests_for_correlated_join, CORRELATED_JOIN_DISTRIBUTION_REQUESTS,
};
pub use partition::{join_pred_on_part_keys, processing_child_with_part_consumer};

use crate::hash_keys::HashKeys;
use crate::part_prop_cache::PartPropCache;

pub const OUTER_CHILD: usize = 0;
pub const INNER_CHILD: usize = 1;
pub const SCALAR_CHILD: usize = 2;

const NESTED_LOOP_DISTRIBUTION_REQUESTS: usize = 2;
const HASH_JOIN_DISTRIBUTION_REQUESTS: usize = 3;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JoinKind {
    /// Builds a hash table on the inner child and probes it with the outer child.
    Hash(HashKeys),
    NestedLoop,
    /// A nested loop join whose inner child is re-executed for every outer row, with the outer row's values
    /// bound to the inner child's outer references.
    CorrelatedNestedLoop,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
pub enum JoinType {
    Inner,
    LeftOuter,
    LeftSemi,
    LeftAnti,
}

impl JoinType {
    /// Semi and anti joins only output the columns of their outer child.
    pub fn is_semi_or_anti(&self) -> bool {
        matches!(self, JoinType::LeftSemi | JoinType::LeftAnti)
    }
}

/// The order in which the search optimizes the relational children of a join.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ChildExecOrder {
    LeftToRight,
    RightToLeft,
}

#[derive(Default, Clone, Debug, Deserialize)]
#[serde(default)]
pub struct JoinOptimizerProperties {
    /// Recompute partition propagation requests instead of serving them from the per-join cache.
    pub disable_part_prop_cache: bool,
    /// Never attach join predicates as partition filters.
    pub disable_dynamic_partition_elimination: bool,
}

#[derive(Debug)]
pub struct PhysicalJoin {
    kind: JoinKind,
    join_type: JoinType,
    props: JoinOptimizerProperties,
    part_prop_cache: PartPropCache,
}

impl PhysicalJoin {
    pub fn new(kind: JoinKind, join_type: JoinType) -> Self {
        Self::new_with_props(kind, join_type, JoinOptimizerProperties::default())
    }

    pub fn new_with_props(
        kind: JoinKind,
        join_type: JoinType,
        props: JoinOptimizerProperties,
    ) -> Self {
        Self {
            kind,
            join_type,
            props,
            part_prop_cache: PartPropCache::default(),
        }
    }

    pub fn hash(keys: HashKeys, join_type: JoinType) -> Self {
        Self::new(JoinKind::Hash(keys), join_type)
    }

    pub fn nested_loop(join_type: JoinType) -> Self {
        Self::new(JoinKind::NestedLoop, join_type)
    }

    pub fn correlated_nested_loop(join_type: JoinType) -> Self {
        Self::new(JoinKind::CorrelatedNestedLoop, join_type)
    }

    pub fn kind(&self) -> &JoinKind {
        &self.kind
    }

    pub fn join_type(&self) -> JoinType {
        self.join_type
    }

    pub fn props(&self) -> &JoinOptimizerProperties {
        &self.props
    }

    pub fn part_prop_cache(&self) -> &PartPropCache {
        &self.part_prop_cache
    }

    pub fn exec_order(&self) -> ChildExecOrder {
        match self.kind {
            JoinKind::Hash(_) => ChildExecOrder::RightToLeft,
            JoinKind::NestedLoop | JoinKind::CorrelatedNestedLoop => ChildExecOrder::LeftToRight,
        }
    }

    pub fn first_child_to_optimize(&self, child_index: usize) -> bool {
        match self.exec_order() {
            ChildExecOrder::LeftToRight => child_index == OUTER_CHILD,
            ChildExecOrder::RightToLeft => child_index == INNER_CHILD,
        }
    }

    /// The order of the join's output depends on the order of its inputs.
    pub fn input_order_sensitive(&self) -> bool {
        true
    }

    /// Number of alternative distribution requests the join issues for its children.
    pub fn num_distribution_requests(&self) -> usize {
        match self.kind {
            JoinKind::Hash(_) => HASH_JOIN_DISTRIBUTION_REQUESTS,
            JoinKind::NestedLoop => NESTED_LOOP_DISTRIBUTION_REQUESTS,
            JoinKind::CorrelatedNestedLoop => CORRELATED_JOIN_DISTRIBUTION_REQUESTS,
        }
    }

    fn ensure_relational_child(&self, child_index: usize) -> Result<()> {
        ensure!(
            child_index < SCALAR_CHILD,
            "child {} of a join is not relational",
            child_index
        );
        Ok(())
    }

    fn ensure_opt_req(&self, opt_req: usize) -> Result<()> {
        ensure!(
            opt_req < self.num_distribution_requests(),
            "optimization request {} out of range, {:?} join issues {}",
            opt_req,
            self.kind,
            self.num_distribution_requests()
        );
        Ok(())
    }

    /// The plan properties of the child optimized before `child_index`.
    fn sibling<'a>(
        &self,
        ctx: &'a [Arc<PlanProps>],
        child_index: usize,
    ) -> Result<&'a Arc<PlanProps>> {
        ensure!(
            !self.first_child_to_optimize(child_index),
            "child {} is optimized first and has no sibling context",
            child_index
        );
        ctx.first()
            .with_context(|| format!("missing sibling context for child {}", child_index))
    }
}

/// The operator's cache is per instance and does not take part in equality.
impl PartialEq for PhysicalJoin {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind && self.join_type == other.join_type
    }
}

impl Eq for PhysicalJoin {}

fn child_rel_props(handle: &dyn ExprHandle, child_index: usize) -> Result<Arc<RelProps>> {
    handle
        .child_rel_props(child_index)
        .with_context(|| format!("missing logical properties of join child {}", child_index))
}

fn child_plan_props(handle: &dyn ExprHandle, child_index: usize) -> Result<Arc<PlanProps>> {
    handle
        .child_plan_props(child_index)
        .with_context(|| format!("join child {} has not been optimized", child_index))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    use super::*;

    #[test_case(PhysicalJoin::hash(HashKeys::default(), JoinType::Inner), 3, INNER_CHILD)]
    #[test_case(PhysicalJoin::nested_loop(JoinType::Inner), 2, OUTER_CHILD)]
    #[test_case(PhysicalJoin::correlated_nested_loop(JoinType::LeftSemi), 2, OUTER_CHILD)]
    fn request_fan_out_and_exec_order(join: PhysicalJoin, requests: usize, first: usize) {
        assert_eq!(join.num_distribution_requests(), requests);
        assert!(join.first_child_to_optimize(first));
        assert!(!join.first_child_to_optimize(1 - first));
        assert!(join.input_order_sensitive());
    }

    #[test]
    fn equality_ignores_cache_and_config() {
        let a = PhysicalJoin::nested_loop(JoinType::Inner);
        let b = PhysicalJoin::new_with_props(
            JoinKind::NestedLoop,
            JoinType::Inner,
            JoinOptimizerProperties {
                disable_part_prop_cache: true,
                ..Default::default()
            },
        );
        assert_eq!(a, b);
        assert_ne!(a, PhysicalJoin::nested_loop(JoinType::LeftOuter));
    }

    #[test]
    fn sibling_context_is_required_for_second_child() {
        let join = PhysicalJoin::nested_loop(JoinType::Inner);
        assert!(join.sibling(&[], INNER_CHILD).is_err());
        assert!(join.sibling(&[], OUTER_CHILD).is_err());
    }
}
