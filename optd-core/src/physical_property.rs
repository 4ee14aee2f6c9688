// Copyright (c) 2023-2024 CMU Database Group
//
// Use of this source code is governed by an MIT-style license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.

//! Physical property specs. A spec is used both as a requirement pushed down to a child and as the property
//! a subtree derives once it is optimized. Specs are immutable once built and are shared through `Arc`.

mod cte;
mod distribution;
mod order;
mod partition;
mod rewindability;

use std::fmt::{Debug, Display};
use std::hash::Hash;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

pub use cte::{CteId, CteMap, CteReq, CteReqEntry, CteType};
pub use distribution::{DistributionSpec, HashedSpec, SingletonType};
pub use order::{OrderSpec, SortKey, SortOrderType};
pub use partition::{
    PartFilterMap, PartIndexEntry, PartIndexMap, PartInfo, PartInfoEntry, PartKeys,
    PartitionPropagationSpec, ScanId,
};
pub use rewindability::RewindabilitySpec;

pub trait PhysicalProperty: 'static + Send + Sync + Sized + Clone + Debug + Display + Hash + Eq {
    // satisfies checks if the derived property (self) satisfies the required property
    // eg. for sort, required property is x ordered(asc), derived property is x ordered(asc), y ordered(asc)
    // then satisfies should return true
    fn satisfies(&self, required: &Self) -> bool;

    fn property_name(&self) -> &'static str;
}

/// How an enforcer for a property relates to an operator: whether it has to be placed on top of the operator,
/// may be placed, must not be placed, or is not needed because the operator already delivers the property.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
pub enum EnforcingType {
    Required,
    Optional,
    Prohibited,
    Unnecessary,
}

/// How strictly a child's derived distribution has to match the distribution requested from it.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
pub enum DistributionMatching {
    /// The derived distribution must be equal to the requested one.
    Exact,
    /// The derived distribution must satisfy the requested one.
    Satisfy,
    /// Any derived distribution is acceptable.
    Unconstrained,
}

/// The plan properties derived for an optimized subtree.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlanProps {
    pub distribution: Arc<DistributionSpec>,
    pub order: Arc<OrderSpec>,
    pub rewindability: Arc<RewindabilitySpec>,
    pub part_index_map: Arc<PartIndexMap>,
    pub part_filter_map: Arc<PartFilterMap>,
    pub cte_map: Arc<CteMap>,
}

impl PlanProps {
    /// Plan properties of a subtree that only declares its distribution: no order, not rewindable, and no
    /// partition or CTE information.
    pub fn new(distribution: DistributionSpec) -> Self {
        Self {
            distribution: Arc::new(distribution),
            order: Arc::new(OrderSpec::default()),
            rewindability: Arc::new(RewindabilitySpec::NotRewindable),
            part_index_map: Arc::new(PartIndexMap::default()),
            part_filter_map: Arc::new(PartFilterMap::default()),
            cte_map: Arc::new(CteMap::default()),
        }
    }

    pub fn with_order(mut self, order: OrderSpec) -> Self {
        self.order = Arc::new(order);
        self
    }

    pub fn with_rewindability(mut self, rewindability: RewindabilitySpec) -> Self {
        self.rewindability = Arc::new(rewindability);
        self
    }

    pub fn with_part_index_map(mut self, part_index_map: PartIndexMap) -> Self {
        self.part_index_map = Arc::new(part_index_map);
        self
    }

    pub fn with_part_filter_map(mut self, part_filter_map: PartFilterMap) -> Self {
        self.part_filter_map = Arc::new(part_filter_map);
        self
    }

    pub fn with_cte_map(mut self, cte_map: CteMap) -> Self {
        self.cte_map = Arc::new(cte_map);
        self
    }
}
