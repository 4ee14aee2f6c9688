// Copyright (c) 2023-2024 CMU Database Group
//
// Use of this source code is governed by an MIT-style license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.

//! Requirements of correlated nested loop joins. The inner child is evaluated once per outer row with the
//! outer row's values bound, so it has to run next to the outer rows and can never be repartitioned.

use std::sync::Arc;

use anyhow::Result;
use optd_core::physical_property::{DistributionSpec, PlanProps, RewindabilitySpec, SingletonType};

use super::required::inner_matching_outer;
use super::{PhysicalJoin, OUTER_CHILD};

/// Number of distribution requests a correlated join issues. Rules that build correlated joins use it to size
/// the search before an operator exists.
pub const CORRELATED_JOIN_DISTRIBUTION_REQUESTS: usize = 2;

pub fn distribution_requests_for_correlated_join() -> usize {
    CORRELATED_JOIN_DISTRIBUTION_REQUESTS
}

impl PhysicalJoin {
    pub(super) fn required_distribution_correlated(
        &self,
        required: &DistributionSpec,
        child_index: usize,
        ctx: &[Arc<PlanProps>],
        opt_req: usize,
    ) -> Result<DistributionSpec> {
        if child_index == OUTER_CHILD {
            return Ok(match required {
                DistributionSpec::Singleton(_) | DistributionSpec::Replicated => required.clone(),
                _ => DistributionSpec::Any,
            });
        }

        let outer = self.sibling(ctx, child_index)?;
        if opt_req == 0 && required.is_singleton() {
            return Ok(match outer.distribution.as_ref() {
                DistributionSpec::Singleton(t) => DistributionSpec::Singleton(*t),
                _ => DistributionSpec::Singleton(SingletonType::Master),
            });
        }
        Ok(inner_matching_outer(&outer.distribution))
    }

    pub(super) fn required_rewindability_correlated(
        &self,
        required: &RewindabilitySpec,
        child_index: usize,
    ) -> RewindabilitySpec {
        if child_index == OUTER_CHILD {
            *required
        } else {
            RewindabilitySpec::Rewindable
        }
    }
}
