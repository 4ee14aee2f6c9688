// Copyright (c) 2023-2024 CMU Database Group
//
// Use of this source code is governed by an MIT-style license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.

//! The interface between the cascades search and the physical operators it asks for property requirements.

use std::fmt::Display;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::nodes::ArcPredNode;
use crate::physical_property::PlanProps;
use crate::property::RelProps;

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug, Default, Hash, Serialize, Deserialize)]
pub struct GroupId(pub usize);

impl Display for GroupId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "!{}", self.0)
    }
}

/// An operator only knows its own plan node. During the optimization phase we sometimes need more context,
/// i.e. the group of the expression and the groups of its children. All that is collected in this struct.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Debug, Default, Hash)]
pub struct RelNodeContext {
    pub group_id: GroupId,
    pub children_group_ids: Vec<GroupId>,
}

/// A read-only view over one expression of the search space. The search engine hands one to an operator every
/// time it asks for requirements or derivations. Lookups must not have side effects visible to the operator.
///
/// Children are addressed by position. Relational children come first and scalar children (e.g. a join
/// condition) come after them.
pub trait ExprHandle: Send + Sync {
    /// Number of children, relational and scalar.
    fn arity(&self) -> usize;

    /// The memo context of the expression, if it lives in the memo.
    fn context(&self) -> Option<&RelNodeContext>;

    /// Logical properties of a relational child.
    fn child_rel_props(&self, child_idx: usize) -> Option<Arc<RelProps>>;

    /// Derived plan properties of a relational child, once it has been optimized.
    fn child_plan_props(&self, child_idx: usize) -> Option<Arc<PlanProps>>;

    /// A scalar child.
    fn scalar_child(&self, child_idx: usize) -> Option<ArcPredNode>;

    /// Logical properties of the expression itself.
    fn rel_props(&self) -> Arc<RelProps>;

    /// Derived plan properties of the expression itself, once its children have been optimized.
    fn plan_props(&self) -> Option<Arc<PlanProps>>;

    fn has_outer_refs(&self) -> bool {
        self.rel_props().has_outer_refs()
    }
}
