// Copyright (c) 2023-2024 CMU Database Group
//
// Use of this source code is governed by an MIT-style license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.

//! An in-memory [`ExprHandle`] for testing operators without running the cascades search.

use std::sync::Arc;

use crate::cascades::{ExprHandle, GroupId, RelNodeContext};
use crate::nodes::ArcPredNode;
use crate::physical_property::PlanProps;
use crate::property::RelProps;

#[derive(Clone, Debug, Default)]
pub struct TestExprHandle {
    context: Option<RelNodeContext>,
    children_rel_props: Vec<Arc<RelProps>>,
    children_plan_props: Vec<Option<Arc<PlanProps>>>,
    scalar_children: Vec<ArcPredNode>,
    rel_props: Arc<RelProps>,
    plan_props: Option<Arc<PlanProps>>,
}

impl TestExprHandle {
    /// A binary operator over `outer` and `inner` with condition `cond`. The scalar child comes last.
    pub fn binary(outer: RelProps, inner: RelProps, cond: ArcPredNode) -> Self {
        let rel_props = Arc::new(RelProps::combine(&outer, &inner));
        Self {
            context: None,
            children_rel_props: vec![Arc::new(outer), Arc::new(inner)],
            children_plan_props: vec![None, None],
            scalar_children: vec![cond],
            rel_props,
            plan_props: None,
        }
    }

    /// Places the expression in the memo, with one group per child.
    pub fn with_group_ids(mut self, group_id: usize, children_group_ids: &[usize]) -> Self {
        self.context = Some(RelNodeContext {
            group_id: GroupId(group_id),
            children_group_ids: children_group_ids.iter().copied().map(GroupId).collect(),
        });
        self
    }

    pub fn with_child_plan_props(mut self, child_idx: usize, plan_props: PlanProps) -> Self {
        self.children_plan_props[child_idx] = Some(Arc::new(plan_props));
        self
    }

    pub fn with_plan_props(mut self, plan_props: PlanProps) -> Self {
        self.plan_props = Some(Arc::new(plan_props));
        self
    }

    /// Overrides the logical properties derived from the children, e.g. to add outer references.
    pub fn with_rel_props(mut self, rel_props: RelProps) -> Self {
        self.rel_props = Arc::new(rel_props);
        self
    }
}

impl ExprHandle for TestExprHandle {
    fn arity(&self) -> usize {
        self.children_rel_props.len() + self.scalar_children.len()
    }

    fn context(&self) -> Option<&RelNodeContext> {
        self.context.as_ref()
    }

    fn child_rel_props(&self, child_idx: usize) -> Option<Arc<RelProps>> {
        self.children_rel_props.get(child_idx).cloned()
    }

    fn child_plan_props(&self, child_idx: usize) -> Option<Arc<PlanProps>> {
        self.children_plan_props.get(child_idx).cloned().flatten()
    }

    fn scalar_child(&self, child_idx: usize) -> Option<ArcPredNode> {
        child_idx
            .checked_sub(self.children_rel_props.len())
            .and_then(|idx| self.scalar_children.get(idx))
            .cloned()
    }

    fn rel_props(&self) -> Arc<RelProps> {
        self.rel_props.clone()
    }

    fn plan_props(&self) -> Option<Arc<PlanProps>> {
        self.plan_props.clone()
    }
}
