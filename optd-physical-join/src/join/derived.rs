// Copyright (c) 2023-2024 CMU Database Group
//
// Use of this source code is governed by an MIT-style license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.

use std::sync::Arc;

use anyhow::{Context, Result};
use optd_core::cascades::ExprHandle;
use optd_core::physical_property::{
    DistributionSpec, EnforcingType, OrderSpec, PartFilterMap, PartIndexMap, PhysicalProperty,
    RewindabilitySpec,
};
use tracing::trace;

use super::{child_plan_props, JoinKind, JoinType, PhysicalJoin, INNER_CHILD, OUTER_CHILD};

impl PhysicalJoin {
    /// Rows come out in the order of the outer child.
    pub fn derive_order(&self, handle: &dyn ExprHandle) -> Result<Arc<OrderSpec>> {
        Ok(child_plan_props(handle, OUTER_CHILD)?.order.clone())
    }

    pub fn derive_distribution(&self, handle: &dyn ExprHandle) -> Result<Arc<DistributionSpec>> {
        let outer = child_plan_props(handle, OUTER_CHILD)?;
        let inner = child_plan_props(handle, INNER_CHILD)?;

        if let (JoinKind::Hash(_), JoinType::Inner) = (&self.kind, self.join_type) {
            if let (
                DistributionSpec::Hashed(outer_hashed),
                DistributionSpec::Hashed(inner_hashed),
            ) = (outer.distribution.as_ref(), inner.distribution.as_ref())
            {
                // Matching rows meet on the same segment, so the output is hashed on either side's keys.
                return Ok(Arc::new(DistributionSpec::Hashed(
                    outer_hashed.clone().append_equiv(inner_hashed.clone()),
                )));
            }
        }

        if outer.distribution.is_replicated_or_universal() {
            return Ok(inner.distribution.clone());
        }
        Ok(outer.distribution.clone())
    }

    /// A join can only be replayed if both of its children can.
    pub fn derive_rewindability(&self, handle: &dyn ExprHandle) -> Result<Arc<RewindabilitySpec>> {
        let outer = child_plan_props(handle, OUTER_CHILD)?;
        let inner = child_plan_props(handle, INNER_CHILD)?;
        Ok(Arc::new((*outer.rewindability).min(*inner.rewindability)))
    }

    pub fn derive_part_index_map(&self, handle: &dyn ExprHandle) -> Result<Arc<PartIndexMap>> {
        let outer = child_plan_props(handle, OUTER_CHILD)?;
        let inner = child_plan_props(handle, INNER_CHILD)?;
        Ok(Arc::new(outer.part_index_map.combine(&inner.part_index_map)))
    }

    pub fn derive_part_filter_map(&self, handle: &dyn ExprHandle) -> Result<Arc<PartFilterMap>> {
        let outer = child_plan_props(handle, OUTER_CHILD)?;
        let inner = child_plan_props(handle, INNER_CHILD)?;
        Ok(Arc::new(outer.part_filter_map.combine(&inner.part_filter_map)))
    }

    /// Whether a spool may be placed on top of the join to meet a rewindability requirement.
    pub fn rewindability_enforcing_type(
        &self,
        handle: &dyn ExprHandle,
        required: &RewindabilitySpec,
    ) -> Result<EnforcingType> {
        let derived = handle
            .plan_props()
            .context("join plan properties have not been derived")?
            .rewindability
            .clone();
        let enforcing_type = if derived.satisfies(required) {
            EnforcingType::Unnecessary
        } else if handle.has_outer_refs() {
            // A spool would replay rows computed for stale outer bindings.
            EnforcingType::Prohibited
        } else if *derived >= RewindabilitySpec::Rescannable
            && *required != RewindabilitySpec::MarkRestore
        {
            EnforcingType::Optional
        } else {
            EnforcingType::Required
        };
        trace!(
            event = "rewindability_enforcing_type",
            derived = %derived,
            required = %required,
            enforcing_type = %enforcing_type
        );
        Ok(enforcing_type)
    }

    /// Statistics of a join are never those of one of its children.
    pub fn passes_through_stats(&self) -> bool {
        false
    }
}
