// Copyright (c) 2023-2024 CMU Database Group
//
// Use of this source code is governed by an MIT-style license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.

pub mod hash_keys;
pub mod join;
pub mod part_prop_cache;

pub use hash_keys::{
    extract_hash_join_exprs, extract_hash_keys, hash_join_compatible, hash_join_possible,
    HashJoinAnalysis, HashKeys, ResidualPredicate,
};
pub use join::{
    ChildExecOrder, JoinKind, JoinOptimizerProperties, JoinType, PhysicalJoin, INNER_CHILD,
    OUTER_CHILD, SCALAR_CHILD,
};
pub use part_prop_cache::{PartPropCache, PartPropReq};
