// Copyright (c) 2023-2024 CMU Database Group
//
// Use of this source code is governed by an MIT-style license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.

//! Recognizes join conditions that can drive a hash join. These helpers only look at the condition and at the
//! columns each join side produces, so implementation rules can use them before a physical join exists.

use itertools::Itertools;
use optd_core::nodes::{
    and_all, conjuncts, disjuncts, is_hashable, ArcPredNode, BinOpType, ColumnRefSet, PredNode,
};
use serde::{Deserialize, Serialize};

/// Hash keys of a join. `outer[i]` is matched against `inner[i]`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HashKeys {
    pub outer: Vec<ArcPredNode>,
    pub inner: Vec<ArcPredNode>,
    /// Some key pair is compared with IS NOT DISTINCT FROM, so NULL keys have to meet as well.
    pub nulls_colocated: bool,
}

impl HashKeys {
    pub fn len(&self) -> usize {
        self.outer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outer.is_empty()
    }

    fn push(&mut self, outer: ArcPredNode, inner: ArcPredNode, nulls_colocated: bool) {
        self.outer.push(outer);
        self.inner.push(inner);
        self.nulls_colocated |= nulls_colocated;
    }
}

/// Splits an equality into its two sides. The flag is set for IS NOT DISTINCT FROM.
pub fn extract_hash_join_exprs(pred: &PredNode) -> Option<(ArcPredNode, ArcPredNode, bool)> {
    match pred {
        PredNode::BinOp {
            op: op @ (BinOpType::Eq | BinOpType::IsNotDistinctFrom),
            left,
            right,
        } => Some((
            left.clone(),
            right.clone(),
            *op == BinOpType::IsNotDistinctFrom,
        )),
        _ => None,
    }
}

fn sides_hash_join_compatible(
    outer_cols: &ColumnRefSet,
    inner_cols: &ColumnRefSet,
    pred_outer: &PredNode,
    pred_inner: &PredNode,
) -> bool {
    let used_by = |side: &PredNode, cols: &ColumnRefSet| {
        let used = side.used_columns();
        !used.is_empty() && cols.contains_all(&used)
    };
    let outer_side_on_outer = used_by(pred_outer, outer_cols);
    let outer_side_on_inner = used_by(pred_outer, inner_cols);
    let inner_side_on_outer = used_by(pred_inner, outer_cols);
    let inner_side_on_inner = used_by(pred_inner, inner_cols);

    ((outer_side_on_outer && inner_side_on_inner) || (outer_side_on_inner && inner_side_on_outer))
        && is_hashable(&pred_outer.data_type())
        && is_hashable(&pred_inner.data_type())
}

/// Is `pred` an equality whose sides are computed from different join children, each side from exactly one of
/// them?
pub fn hash_join_compatible(
    pred: &PredNode,
    outer_cols: &ColumnRefSet,
    inner_cols: &ColumnRefSet,
) -> bool {
    match extract_hash_join_exprs(pred) {
        Some((left, right, _)) => sides_hash_join_compatible(outer_cols, inner_cols, &left, &right),
        None => false,
    }
}

/// The (outer, inner) key pair of a compatible equality, sides swapped when the equality is written inner
/// side first.
fn hash_key_pair(
    pred: &PredNode,
    outer_cols: &ColumnRefSet,
    inner_cols: &ColumnRefSet,
) -> Option<(ArcPredNode, ArcPredNode, bool)> {
    if !hash_join_compatible(pred, outer_cols, inner_cols) {
        return None;
    }
    let (left, right, nulls_colocated) = extract_hash_join_exprs(pred)?;
    if outer_cols.contains_all(&left.used_columns()) {
        Some((left, right, nulls_colocated))
    } else {
        Some((right, left, nulls_colocated))
    }
}

/// Collects the hash keys of every compatible equality conjunct of `pred`, in conjunct order.
pub fn extract_hash_keys(
    pred: &ArcPredNode,
    outer_cols: &ColumnRefSet,
    inner_cols: &ColumnRefSet,
) -> HashKeys {
    let mut keys = HashKeys::default();
    for conjunct in conjuncts(pred) {
        if let Some((outer, inner, nulls_colocated)) =
            hash_key_pair(&conjunct, outer_cols, inner_cols)
        {
            keys.push(outer, inner, nulls_colocated);
        }
    }
    keys
}

/// Conjuncts of a join condition that are evaluated after the hash match.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResidualPredicate {
    /// Only reference outer columns.
    pub outer_only: Vec<ArcPredNode>,
    /// Only reference inner columns.
    pub inner_only: Vec<ArcPredNode>,
    /// Reference both sides, columns from neither, or nothing at all.
    pub mixed: Vec<ArcPredNode>,
}

impl ResidualPredicate {
    pub fn is_empty(&self) -> bool {
        self.outer_only.is_empty() && self.inner_only.is_empty() && self.mixed.is_empty()
    }

    fn push(
        &mut self,
        conjunct: ArcPredNode,
        outer_cols: &ColumnRefSet,
        inner_cols: &ColumnRefSet,
    ) {
        let used = conjunct.used_columns();
        if !used.is_empty() && outer_cols.contains_all(&used) {
            self.outer_only.push(conjunct);
        } else if !used.is_empty() && inner_cols.contains_all(&used) {
            self.inner_only.push(conjunct);
        } else {
            self.mixed.push(conjunct);
        }
    }

    pub fn conjuncts(&self) -> impl Iterator<Item = &ArcPredNode> {
        self.outer_only
            .iter()
            .chain(self.inner_only.iter())
            .chain(self.mixed.iter())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HashJoinAnalysis {
    pub keys: HashKeys,
    /// The equalities the keys were taken from, in key order.
    pub hash_conjuncts: Vec<ArcPredNode>,
    pub residual: ResidualPredicate,
}

impl HashJoinAnalysis {
    pub fn is_feasible(&self) -> bool {
        !self.keys.is_empty()
    }

    pub fn hash_predicate(&self) -> Option<ArcPredNode> {
        (!self.hash_conjuncts.is_empty()).then(|| and_all(self.hash_conjuncts.clone()))
    }

    pub fn residual_predicate(&self) -> Option<ArcPredNode> {
        (!self.residual.is_empty()).then(|| and_all(self.residual.conjuncts().cloned().collect()))
    }

    /// The join condition rewritten with the hash equalities first and the residual after them.
    pub fn join_predicate(&self) -> ArcPredNode {
        and_all(
            self.hash_conjuncts
                .iter()
                .chain(self.residual.conjuncts())
                .cloned()
                .collect(),
        )
    }
}

/// Equalities that appear in every disjunct of `pred`. Each of them is implied by the disjunction.
fn common_disjunct_equalities(
    pred: &ArcPredNode,
    outer_cols: &ColumnRefSet,
    inner_cols: &ColumnRefSet,
) -> Vec<ArcPredNode> {
    let disjuncts = disjuncts(pred);
    if disjuncts.len() < 2 {
        return vec![];
    }
    let per_disjunct = disjuncts
        .iter()
        .map(|disjunct| {
            conjuncts(disjunct)
                .into_iter()
                .filter(|x| hash_join_compatible(x, outer_cols, inner_cols))
                .collect_vec()
        })
        .collect_vec();
    let Some((first, rest)) = per_disjunct.split_first() else {
        return vec![];
    };
    first
        .iter()
        .filter(|eq| rest.iter().all(|other| other.contains(eq)))
        .unique()
        .cloned()
        .collect()
}

/// Checks whether the join condition `pred` can be implemented by a hash join and splits it into hash keys and
/// a residual. Equalities shared by every branch of an OR conjunct are inferred as extra keys; the OR itself
/// stays in the residual.
pub fn hash_join_possible(
    pred: &ArcPredNode,
    outer_cols: &ColumnRefSet,
    inner_cols: &ColumnRefSet,
) -> HashJoinAnalysis {
    let mut analysis = HashJoinAnalysis::default();
    let mut disjunctions = vec![];
    for conjunct in conjuncts(pred) {
        if let Some((outer, inner, nulls_colocated)) =
            hash_key_pair(&conjunct, outer_cols, inner_cols)
        {
            analysis.keys.push(outer, inner, nulls_colocated);
            analysis.hash_conjuncts.push(conjunct);
        } else {
            if matches!(conjunct.as_ref(), PredNode::LogOp { .. }) {
                disjunctions.push(conjunct.clone());
            }
            analysis.residual.push(conjunct, outer_cols, inner_cols);
        }
    }

    for disjunction in disjunctions {
        for eq in common_disjunct_equalities(&disjunction, outer_cols, inner_cols) {
            if analysis.hash_conjuncts.contains(&eq) {
                continue;
            }
            if let Some((outer, inner, nulls_colocated)) =
                hash_key_pair(&eq, outer_cols, inner_cols)
            {
                analysis.keys.push(outer, inner, nulls_colocated);
                analysis.hash_conjuncts.push(eq);
            }
        }
    }
    analysis
}
