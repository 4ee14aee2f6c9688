// Copyright (c) 2023-2024 CMU Database Group
//
// Use of this source code is governed by an MIT-style license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.

use std::sync::Arc;

use anyhow::{ensure, Result};
use optd_core::cascades::ExprHandle;
use optd_core::nodes::{ArcPredNode, ColumnRefSet};
use optd_core::physical_property::{
    CteMap, CteReq, DistributionMatching, DistributionSpec, HashedSpec, OrderSpec,
    PartitionPropagationSpec, PlanProps, RewindabilitySpec, SingletonType,
};
use tracing::trace;

use super::{
    child_rel_props, ChildExecOrder, JoinKind, PhysicalJoin, INNER_CHILD, OUTER_CHILD, SCALAR_CHILD,
};
use crate::hash_keys::HashKeys;
use crate::part_prop_cache::PartPropReq;

/// What the inner child has to deliver so that every outer row meets every inner row.
pub(super) fn inner_matching_outer(outer: &DistributionSpec) -> DistributionSpec {
    match outer {
        DistributionSpec::Universal => DistributionSpec::Singleton(SingletonType::Master),
        DistributionSpec::Singleton(t) => DistributionSpec::Singleton(*t),
        _ => DistributionSpec::Replicated,
    }
}

/// The outer keys lined up with the exprs the inner child is actually hashed on. Falls back to the join's outer
/// keys when no equivalent hashing of the inner child is made of inner keys only.
fn aligned_outer_keys(keys: &HashKeys, inner_hashed: &HashedSpec) -> Vec<ArcPredNode> {
    inner_hashed
        .equivalents()
        .find_map(|spec| {
            if spec.exprs.is_empty() {
                return None;
            }
            spec.exprs
                .iter()
                .map(|expr| {
                    keys.inner
                        .iter()
                        .position(|key| key == expr)
                        .and_then(|idx| keys.outer.get(idx).cloned())
                })
                .collect::<Option<Vec<_>>>()
        })
        .unwrap_or_else(|| keys.outer.clone())
}

impl PhysicalJoin {
    /// Columns `child_index` has to produce: the columns required from the join plus those used by the join
    /// condition, restricted to what the child outputs.
    pub fn required_columns(
        &self,
        handle: &dyn ExprHandle,
        required: &ColumnRefSet,
        child_index: usize,
        _ctx: &[Arc<PlanProps>],
        _opt_req: usize,
    ) -> Result<ColumnRefSet> {
        self.ensure_relational_child(child_index)?;
        let outer = child_rel_props(handle, OUTER_CHILD)?;
        let produced = if self.join_type.is_semi_or_anti() {
            outer.output_columns.clone()
        } else {
            let inner = child_rel_props(handle, INNER_CHILD)?;
            outer.output_columns.union(&inner.output_columns)
        };
        let missing = required.difference(&produced);
        ensure!(
            missing.is_empty(),
            "columns {} required from {} join are produced by none of its children",
            missing,
            self.join_type
        );

        let mut columns = required.clone();
        if let Some(cond) = handle.scalar_child(SCALAR_CHILD) {
            columns.extend(&cond.used_columns());
        }
        let child = child_rel_props(handle, child_index)?;
        Ok(columns.intersection(&child.output_columns))
    }

    /// The child optimized last resolves whatever CTEs its siblings did not. Everything asked from earlier
    /// children is optional.
    pub fn required_ctes(
        &self,
        _handle: &dyn ExprHandle,
        required: &CteReq,
        child_index: usize,
        ctx: &[Arc<PlanProps>],
        _opt_req: usize,
    ) -> Result<CteReq> {
        self.ensure_relational_child(child_index)?;
        let last_child = match self.exec_order() {
            ChildExecOrder::LeftToRight => INNER_CHILD,
            ChildExecOrder::RightToLeft => OUTER_CHILD,
        };
        if child_index != last_child {
            return Ok(required.all_optional());
        }
        let resolved = ctx
            .iter()
            .fold(CteMap::default(), |acc, props| acc.combine(&props.cte_map));
        Ok(required.unresolved(&resolved))
    }

    pub fn required_distribution(
        &self,
        handle: &dyn ExprHandle,
        required: &DistributionSpec,
        child_index: usize,
        ctx: &[Arc<PlanProps>],
        opt_req: usize,
    ) -> Result<DistributionSpec> {
        self.ensure_relational_child(child_index)?;
        self.ensure_opt_req(opt_req)?;

        // Correlated subtrees are executed where their bindings are, so they cannot be redistributed.
        if handle.has_outer_refs() {
            return Ok(match required {
                DistributionSpec::Singleton(_) | DistributionSpec::Replicated => required.clone(),
                _ => DistributionSpec::Replicated,
            });
        }

        let distribution = match &self.kind {
            JoinKind::Hash(keys) => {
                self.required_distribution_hash(keys, child_index, ctx, opt_req)?
            }
            JoinKind::NestedLoop => {
                if child_index == OUTER_CHILD {
                    if opt_req == 0 {
                        DistributionSpec::Any
                    } else {
                        DistributionSpec::Singleton(SingletonType::Master)
                    }
                } else {
                    inner_matching_outer(&self.sibling(ctx, child_index)?.distribution)
                }
            }
            JoinKind::CorrelatedNestedLoop => {
                self.required_distribution_correlated(required, child_index, ctx, opt_req)?
            }
        };
        trace!(
            event = "required_distribution",
            join = ?self.kind,
            child_index,
            opt_req,
            required = %required,
            distribution = %distribution
        );
        Ok(distribution)
    }

    fn required_distribution_hash(
        &self,
        keys: &HashKeys,
        child_index: usize,
        ctx: &[Arc<PlanProps>],
        opt_req: usize,
    ) -> Result<DistributionSpec> {
        Ok(match (opt_req, child_index) {
            (0, INNER_CHILD) => {
                ensure!(!keys.is_empty(), "hash join without hash keys");
                DistributionSpec::Hashed(HashedSpec::new(keys.inner.clone(), keys.nulls_colocated))
            }
            (0, _) => match self.sibling(ctx, child_index)?.distribution.as_ref() {
                DistributionSpec::Hashed(inner) => DistributionSpec::Hashed(HashedSpec::new(
                    aligned_outer_keys(keys, inner),
                    keys.nulls_colocated,
                )),
                DistributionSpec::Replicated => DistributionSpec::NonSingleton,
                DistributionSpec::Universal => DistributionSpec::Any,
                DistributionSpec::Singleton(t) => DistributionSpec::Singleton(*t),
                _ => DistributionSpec::Hashed(HashedSpec::new(
                    keys.outer.clone(),
                    keys.nulls_colocated,
                )),
            },
            (1, INNER_CHILD) => DistributionSpec::Replicated,
            (1, _) => DistributionSpec::NonSingleton,
            (_, INNER_CHILD) => DistributionSpec::Singleton(SingletonType::Master),
            (_, _) => match self.sibling(ctx, child_index)?.distribution.as_ref() {
                DistributionSpec::Singleton(t) => DistributionSpec::Singleton(*t),
                _ => DistributionSpec::Singleton(SingletonType::Master),
            },
        })
    }

    pub fn required_rewindability(
        &self,
        handle: &dyn ExprHandle,
        required: &RewindabilitySpec,
        child_index: usize,
        _ctx: &[Arc<PlanProps>],
        _opt_req: usize,
    ) -> Result<RewindabilitySpec> {
        self.ensure_relational_child(child_index)?;
        Ok(match self.kind {
            JoinKind::CorrelatedNestedLoop => {
                self.required_rewindability_correlated(required, child_index)
            }
            // The inner child is rescanned once per outer row.
            JoinKind::NestedLoop if child_index == INNER_CHILD => RewindabilitySpec::Rewindable,
            JoinKind::NestedLoop => *required,
            JoinKind::Hash(_) if handle.has_outer_refs() => *required,
            JoinKind::Hash(_) => RewindabilitySpec::NotRewindable,
        })
    }

    /// The partition consumers `child_index` has to resolve and the filters it may use to do so.
    pub fn required_part_propagation(
        &self,
        handle: &dyn ExprHandle,
        required: &Arc<PartitionPropagationSpec>,
        child_index: usize,
        _ctx: &[Arc<PlanProps>],
        _opt_req: usize,
    ) -> Result<Arc<PartitionPropagationSpec>> {
        self.ensure_relational_child(child_index)?;
        let context = match handle.context() {
            Some(context) if !self.props.disable_part_prop_cache => context,
            _ => {
                return Ok(Arc::new(
                    self.compute_part_propagation(handle, required, child_index)?,
                ))
            }
        };
        let req = PartPropReq::new(required.clone(), child_index, context)?;
        self.part_prop_cache.get_or_compute(req, || {
            self.compute_part_propagation(handle, required, child_index)
        })
    }

    /// The join keeps the order of its outer child, so a required order is pushed there when it only sorts on
    /// outer columns.
    pub fn required_order(
        &self,
        handle: &dyn ExprHandle,
        required: &OrderSpec,
        child_index: usize,
        _ctx: &[Arc<PlanProps>],
        _opt_req: usize,
    ) -> Result<OrderSpec> {
        self.ensure_relational_child(child_index)?;
        if child_index != OUTER_CHILD || required.is_empty() {
            return Ok(OrderSpec::default());
        }
        let outer = child_rel_props(handle, OUTER_CHILD)?;
        if outer.output_columns.contains_all(&required.used_columns()) {
            Ok(required.clone())
        } else {
            Ok(OrderSpec::default())
        }
    }

    pub fn distribution_matching(
        &self,
        required_for_child: &DistributionSpec,
        child_index: usize,
        _ctx: &[Arc<PlanProps>],
        _opt_req: usize,
    ) -> Result<DistributionMatching> {
        self.ensure_relational_child(child_index)?;
        Ok(match required_for_child {
            DistributionSpec::Any => DistributionMatching::Unconstrained,
            _ if self.first_child_to_optimize(child_index) => DistributionMatching::Satisfy,
            // The second child is hashed to line up with the first one key for key.
            DistributionSpec::Hashed(_) => DistributionMatching::Exact,
            _ => DistributionMatching::Satisfy,
        })
    }

    pub fn provides_required_columns(
        &self,
        handle: &dyn ExprHandle,
        required: &ColumnRefSet,
        _opt_req: usize,
    ) -> Result<bool> {
        if self.join_type.is_semi_or_anti() {
            return self.outer_provides_required_columns(handle, required);
        }
        let outer = child_rel_props(handle, OUTER_CHILD)?;
        let inner = child_rel_props(handle, INNER_CHILD)?;
        Ok(outer
            .output_columns
            .union(&inner.output_columns)
            .contains_all(required))
    }

    pub fn outer_provides_required_columns(
        &self,
        handle: &dyn ExprHandle,
        required: &ColumnRefSet,
    ) -> Result<bool> {
        Ok(child_rel_props(handle, OUTER_CHILD)?
            .output_columns
            .contains_all(required))
    }
}

#[cfg(test)]
mod tests {
    use arrow_schema::DataType;
    use optd_core::nodes::{and_all, BinOpType, PredNode};
    use optd_core::physical_property::{CteId, CteType, SortKey, SortOrderType};
    use optd_core::property::RelProps;
    use optd_core::testing::TestExprHandle;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    use super::*;
    use crate::join::JoinType;

    fn col(id: usize) -> ArcPredNode {
        PredNode::column(id, DataType::Int64)
    }

    fn handle() -> TestExprHandle {
        TestExprHandle::binary(
            RelProps::new(ColumnRefSet::from([1, 2, 3])),
            RelProps::new(ColumnRefSet::from([10, 11])),
            and_all(vec![
                PredNode::eq(col(1), col(10)),
                PredNode::bin_op(BinOpType::Gt, col(2), PredNode::int64(5)),
            ]),
        )
    }

    fn keys() -> HashKeys {
        HashKeys {
            outer: vec![col(1), col(2)],
            inner: vec![col(10), col(11)],
            nulls_colocated: false,
        }
    }

    fn ctx(distribution: DistributionSpec) -> Vec<Arc<PlanProps>> {
        vec![Arc::new(PlanProps::new(distribution))]
    }

    fn hashed(exprs: Vec<ArcPredNode>) -> DistributionSpec {
        DistributionSpec::Hashed(HashedSpec::new(exprs, false))
    }

    #[test]
    fn required_columns_add_condition_columns() {
        let join = PhysicalJoin::nested_loop(JoinType::Inner);
        let required = ColumnRefSet::from([3, 11]);
        let outer = join
            .required_columns(&handle(), &required, OUTER_CHILD, &[], 0)
            .unwrap();
        let inner = join
            .required_columns(&handle(), &required, INNER_CHILD, &[], 0)
            .unwrap();
        assert_eq!(outer, ColumnRefSet::from([1, 2, 3]));
        assert_eq!(inner, ColumnRefSet::from([10, 11]));
    }

    #[test]
    fn required_columns_errors() {
        let join = PhysicalJoin::nested_loop(JoinType::Inner);
        assert!(join
            .required_columns(&handle(), &ColumnRefSet::from([1]), SCALAR_CHILD, &[], 0)
            .is_err());
        assert!(join
            .required_columns(&handle(), &ColumnRefSet::from([42]), OUTER_CHILD, &[], 0)
            .is_err());
        let semi = PhysicalJoin::nested_loop(JoinType::LeftSemi);
        assert!(semi
            .required_columns(&handle(), &ColumnRefSet::from([10]), OUTER_CHILD, &[], 0)
            .is_err());
    }

    #[test]
    fn last_child_resolves_remaining_ctes() {
        let mut required = CteReq::default();
        required.insert(CteId(1), CteType::Consumer, true);
        required.insert(CteId(2), CteType::Producer, true);
        let mut resolved = CteMap::default();
        resolved.insert(CteId(1), CteType::Consumer);
        let ctx = vec![Arc::new(
            PlanProps::new(DistributionSpec::Any).with_cte_map(resolved),
        )];

        let join = PhysicalJoin::nested_loop(JoinType::Inner);
        let outer = join
            .required_ctes(&handle(), &required, OUTER_CHILD, &[], 0)
            .unwrap();
        assert_eq!(outer, required.all_optional());

        let inner = join
            .required_ctes(&handle(), &required, INNER_CHILD, &ctx, 0)
            .unwrap();
        let mut expected = CteReq::default();
        expected.insert(CteId(2), CteType::Producer, true);
        assert_eq!(inner, expected);

        // Hash joins optimize the inner child first.
        let hash = PhysicalJoin::hash(keys(), JoinType::Inner);
        let inner = hash
            .required_ctes(&handle(), &required, INNER_CHILD, &[], 0)
            .unwrap();
        assert_eq!(inner, required.all_optional());
    }

    #[test_case(DistributionSpec::Universal, DistributionSpec::Singleton(SingletonType::Master))]
    #[test_case(
        DistributionSpec::Singleton(SingletonType::Segment),
        DistributionSpec::Singleton(SingletonType::Segment)
    )]
    #[test_case(hashed(vec![col(1)]), DistributionSpec::Replicated)]
    #[test_case(DistributionSpec::Random, DistributionSpec::Replicated)]
    fn nested_loop_inner_matches_outer(outer: DistributionSpec, expected: DistributionSpec) {
        let join = PhysicalJoin::nested_loop(JoinType::Inner);
        let inner = join
            .required_distribution(&handle(), &DistributionSpec::Any, INNER_CHILD, &ctx(outer), 0)
            .unwrap();
        assert_eq!(inner, expected);
    }

    #[test]
    fn nested_loop_outer_requests() {
        let join = PhysicalJoin::nested_loop(JoinType::Inner);
        let req = |opt_req| {
            join.required_distribution(&handle(), &DistributionSpec::Any, OUTER_CHILD, &[], opt_req)
        };
        assert_eq!(req(0).unwrap(), DistributionSpec::Any);
        assert_eq!(
            req(1).unwrap(),
            DistributionSpec::Singleton(SingletonType::Master)
        );
        assert!(req(2).is_err());
    }

    #[test]
    fn hash_join_co_locates_on_keys() {
        let join = PhysicalJoin::hash(keys(), JoinType::Inner);
        let inner = join
            .required_distribution(&handle(), &DistributionSpec::Any, INNER_CHILD, &[], 0)
            .unwrap();
        assert_eq!(inner, hashed(vec![col(10), col(11)]));

        // The inner child ended up hashed on a subset of its keys, in a different order.
        let outer = join
            .required_distribution(
                &handle(),
                &DistributionSpec::Any,
                OUTER_CHILD,
                &ctx(hashed(vec![col(11)])),
                0,
            )
            .unwrap();
        assert_eq!(outer, hashed(vec![col(2)]));

        let outer = join
            .required_distribution(
                &handle(),
                &DistributionSpec::Any,
                OUTER_CHILD,
                &ctx(hashed(vec![col(99)])),
                0,
            )
            .unwrap();
        assert_eq!(outer, hashed(vec![col(1), col(2)]));
    }

    #[test]
    fn inner_key_without_outer_counterpart_falls_back() {
        let keys = HashKeys {
            outer: vec![col(1)],
            inner: vec![col(10), col(11)],
            nulls_colocated: false,
        };
        let join = PhysicalJoin::hash(keys, JoinType::Inner);
        let outer = join
            .required_distribution(
                &handle(),
                &DistributionSpec::Any,
                OUTER_CHILD,
                &ctx(hashed(vec![col(11)])),
                0,
            )
            .unwrap();
        assert_eq!(outer, hashed(vec![col(1)]));
    }

    #[test_case(DistributionSpec::Replicated, DistributionSpec::NonSingleton)]
    #[test_case(DistributionSpec::Universal, DistributionSpec::Any)]
    #[test_case(
        DistributionSpec::Singleton(SingletonType::Segment),
        DistributionSpec::Singleton(SingletonType::Segment)
    )]
    fn hash_join_outer_follows_unhashed_inner(inner: DistributionSpec, expected: DistributionSpec) {
        let join = PhysicalJoin::hash(keys(), JoinType::Inner);
        let outer = join
            .required_distribution(&handle(), &DistributionSpec::Any, OUTER_CHILD, &ctx(inner), 0)
            .unwrap();
        assert_eq!(outer, expected);
    }

    #[test]
    fn hash_join_broadcast_and_gather() {
        let join = PhysicalJoin::hash(keys(), JoinType::Inner);
        let any = DistributionSpec::Any;
        let master = DistributionSpec::Singleton(SingletonType::Master);
        assert_eq!(
            join.required_distribution(&handle(), &any, INNER_CHILD, &[], 1)
                .unwrap(),
            DistributionSpec::Replicated
        );
        assert_eq!(
            join.required_distribution(
                &handle(),
                &any,
                OUTER_CHILD,
                &ctx(DistributionSpec::Replicated),
                1
            )
            .unwrap(),
            DistributionSpec::NonSingleton
        );
        assert_eq!(
            join.required_distribution(&handle(), &any, INNER_CHILD, &[], 2)
                .unwrap(),
            master
        );
        assert_eq!(
            join.required_distribution(&handle(), &any, OUTER_CHILD, &ctx(master.clone()), 2)
                .unwrap(),
            master
        );
        assert!(join
            .required_distribution(&handle(), &any, OUTER_CHILD, &[], 0)
            .is_err());
    }

    #[test_case(DistributionSpec::Replicated, DistributionSpec::Replicated)]
    #[test_case(
        DistributionSpec::Singleton(SingletonType::Segment),
        DistributionSpec::Singleton(SingletonType::Segment)
    )]
    #[test_case(DistributionSpec::Any, DistributionSpec::Replicated)]
    #[test_case(hashed(vec![col(1)]), DistributionSpec::Replicated)]
    fn outer_refs_pin_distribution(required: DistributionSpec, expected: DistributionSpec) {
        let handle = handle().with_rel_props(
            RelProps::new(ColumnRefSet::from([1, 2, 3, 10, 11]))
                .with_outer_refs(ColumnRefSet::from([50])),
        );
        for join in [
            PhysicalJoin::hash(keys(), JoinType::Inner),
            PhysicalJoin::nested_loop(JoinType::Inner),
        ] {
            let outer = join
                .required_distribution(&handle, &required, OUTER_CHILD, &[], 0)
                .unwrap();
            assert_eq!(outer, expected);
        }
    }

    #[test]
    fn rewindability_requests() {
        let required = RewindabilitySpec::Rescannable;
        let nlj = PhysicalJoin::nested_loop(JoinType::Inner);
        assert_eq!(
            nlj.required_rewindability(&handle(), &required, INNER_CHILD, &[], 0)
                .unwrap(),
            RewindabilitySpec::Rewindable
        );
        assert_eq!(
            nlj.required_rewindability(&handle(), &required, OUTER_CHILD, &[], 0)
                .unwrap(),
            required
        );

        let hash = PhysicalJoin::hash(keys(), JoinType::Inner);
        for child in [OUTER_CHILD, INNER_CHILD] {
            assert_eq!(
                hash.required_rewindability(&handle(), &required, child, &[], 0)
                    .unwrap(),
                RewindabilitySpec::NotRewindable
            );
        }
    }

    #[test]
    fn correlated_hash_join_passes_rewindability_through() {
        let handle = handle().with_rel_props(
            RelProps::new(ColumnRefSet::from([1, 2, 3, 10, 11]))
                .with_outer_refs(ColumnRefSet::from([50])),
        );
        let join = PhysicalJoin::hash(keys(), JoinType::Inner);
        for required in [RewindabilitySpec::Rescannable, RewindabilitySpec::MarkRestore] {
            for child in [OUTER_CHILD, INNER_CHILD] {
                assert_eq!(
                    join.required_rewindability(&handle, &required, child, &[], 0)
                        .unwrap(),
                    required
                );
            }
        }
    }

    #[test]
    fn order_is_pushed_to_outer_only() {
        let join = PhysicalJoin::nested_loop(JoinType::Inner);
        let on = |col| {
            OrderSpec::new(vec![SortKey {
                col: optd_core::nodes::ColumnRef(col),
                order: SortOrderType::Asc,
            }])
        };
        assert_eq!(
            join.required_order(&handle(), &on(2), OUTER_CHILD, &[], 0)
                .unwrap(),
            on(2)
        );
        assert!(join
            .required_order(&handle(), &on(2), INNER_CHILD, &[], 0)
            .unwrap()
            .is_empty());
        assert!(join
            .required_order(&handle(), &on(10), OUTER_CHILD, &[], 0)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn distribution_matching_modes() {
        let join = PhysicalJoin::hash(keys(), JoinType::Inner);
        let matching = |required: &DistributionSpec, child| {
            join.distribution_matching(required, child, &[], 0).unwrap()
        };
        assert_eq!(
            matching(&DistributionSpec::Any, OUTER_CHILD),
            DistributionMatching::Unconstrained
        );
        assert_eq!(
            matching(&hashed(vec![col(10)]), INNER_CHILD),
            DistributionMatching::Satisfy
        );
        assert_eq!(
            matching(&hashed(vec![col(1)]), OUTER_CHILD),
            DistributionMatching::Exact
        );
        assert_eq!(
            matching(&DistributionSpec::NonSingleton, OUTER_CHILD),
            DistributionMatching::Satisfy
        );
    }

    #[test]
    fn provided_columns_depend_on_join_type() {
        let required = ColumnRefSet::from([1, 10]);
        let inner_join = PhysicalJoin::nested_loop(JoinType::Inner);
        let anti_join = PhysicalJoin::nested_loop(JoinType::LeftAnti);
        assert!(inner_join
            .provides_required_columns(&handle(), &required, 0)
            .unwrap());
        assert!(!anti_join
            .provides_required_columns(&handle(), &required, 0)
            .unwrap());
        assert!(anti_join
            .provides_required_columns(&handle(), &ColumnRefSet::from([1, 2]), 0)
            .unwrap());
    }
}
