// Copyright (c) 2023-2024 CMU Database Group
//
// Use of this source code is governed by an MIT-style license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.

//! Column references and scalar predicate trees shared by the property specs and the physical operators.

use std::collections::BTreeSet;
use std::fmt::Display;
use std::sync::Arc;

use arrow_schema::DataType;
use itertools::Itertools;
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};

/// A column produced somewhere in the query. Ids are unique across the whole query so a column can be
/// attributed to the subtree that produces it.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug, Hash, Serialize, Deserialize)]
pub struct ColumnRef(pub usize);

impl Display for ColumnRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Clone, Default, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub struct ColumnRefSet(BTreeSet<ColumnRef>);

impl ColumnRefSet {
    pub fn new() -> Self {
        Self(BTreeSet::new())
    }

    pub fn insert(&mut self, col: ColumnRef) -> bool {
        self.0.insert(col)
    }

    pub fn contains(&self, col: &ColumnRef) -> bool {
        self.0.contains(col)
    }

    /// Returns true if every column of `other` is in this set.
    pub fn contains_all(&self, other: &ColumnRefSet) -> bool {
        self.0.is_superset(&other.0)
    }

    pub fn is_subset(&self, other: &ColumnRefSet) -> bool {
        self.0.is_subset(&other.0)
    }

    pub fn union(&self, other: &ColumnRefSet) -> ColumnRefSet {
        Self(self.0.union(&other.0).copied().collect())
    }

    pub fn intersection(&self, other: &ColumnRefSet) -> ColumnRefSet {
        Self(self.0.intersection(&other.0).copied().collect())
    }

    pub fn difference(&self, other: &ColumnRefSet) -> ColumnRefSet {
        Self(self.0.difference(&other.0).copied().collect())
    }

    pub fn extend(&mut self, other: &ColumnRefSet) {
        self.0.extend(other.0.iter().copied());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ColumnRef> {
        self.0.iter()
    }
}

impl FromIterator<ColumnRef> for ColumnRefSet {
    fn from_iter<I: IntoIterator<Item = ColumnRef>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<const N: usize> From<[usize; N]> for ColumnRefSet {
    fn from(ids: [usize; N]) -> Self {
        ids.into_iter().map(ColumnRef).collect()
    }
}

impl Display for ColumnRefSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{{{}}}", self.0.iter().join(", "))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConstantValue {
    Null,
    Bool(bool),
    Int64(i64),
    Float64(OrderedFloat<f64>),
    Utf8(String),
}

impl ConstantValue {
    pub fn data_type(&self) -> DataType {
        match self {
            ConstantValue::Null => DataType::Null,
            ConstantValue::Bool(_) => DataType::Boolean,
            ConstantValue::Int64(_) => DataType::Int64,
            ConstantValue::Float64(_) => DataType::Float64,
            ConstantValue::Utf8(_) => DataType::Utf8,
        }
    }
}

impl Display for ConstantValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConstantValue::Null => write!(f, "NULL"),
            ConstantValue::Bool(x) => write!(f, "{}", x),
            ConstantValue::Int64(x) => write!(f, "{}", x),
            ConstantValue::Float64(x) => write!(f, "{}", x),
            ConstantValue::Utf8(x) => write!(f, "'{}'", x),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
pub enum BinOpType {
    // numerical
    #[strum(to_string = "+")]
    Add,
    #[strum(to_string = "-")]
    Sub,
    #[strum(to_string = "*")]
    Mul,
    #[strum(to_string = "/")]
    Div,

    // comparison
    #[strum(to_string = "=")]
    Eq,
    #[strum(to_string = "<>")]
    Neq,
    #[strum(to_string = ">")]
    Gt,
    #[strum(to_string = "<")]
    Lt,
    #[strum(to_string = ">=")]
    Geq,
    #[strum(to_string = "<=")]
    Leq,
    #[strum(to_string = "IS NOT DISTINCT FROM")]
    IsNotDistinctFrom,
}

impl BinOpType {
    pub fn is_numerical(&self) -> bool {
        matches!(self, Self::Add | Self::Sub | Self::Mul | Self::Div)
    }

    pub fn is_comparison(&self) -> bool {
        !self.is_numerical()
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
pub enum LogOpType {
    #[strum(to_string = "AND")]
    And,
    #[strum(to_string = "OR")]
    Or,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
pub enum UnOpType {
    #[strum(to_string = "NOT")]
    Not,
    #[strum(to_string = "-")]
    Neg,
}

pub type ArcPredNode = Arc<PredNode>;

/// A scalar expression, e.g. a join condition or a hash key.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PredNode {
    ColumnRef { col: ColumnRef, typ: DataType },
    Constant(ConstantValue),
    BinOp {
        op: BinOpType,
        left: ArcPredNode,
        right: ArcPredNode,
    },
    LogOp {
        op: LogOpType,
        children: Vec<ArcPredNode>,
    },
    UnOp {
        op: UnOpType,
        child: ArcPredNode,
    },
}

impl PredNode {
    pub fn column(id: usize, typ: DataType) -> ArcPredNode {
        Arc::new(PredNode::ColumnRef {
            col: ColumnRef(id),
            typ,
        })
    }

    pub fn constant(value: ConstantValue) -> ArcPredNode {
        Arc::new(PredNode::Constant(value))
    }

    pub fn int64(value: i64) -> ArcPredNode {
        Self::constant(ConstantValue::Int64(value))
    }

    pub fn bool(value: bool) -> ArcPredNode {
        Self::constant(ConstantValue::Bool(value))
    }

    pub fn bin_op(op: BinOpType, left: ArcPredNode, right: ArcPredNode) -> ArcPredNode {
        Arc::new(PredNode::BinOp { op, left, right })
    }

    pub fn eq(left: ArcPredNode, right: ArcPredNode) -> ArcPredNode {
        Self::bin_op(BinOpType::Eq, left, right)
    }

    pub fn not(child: ArcPredNode) -> ArcPredNode {
        Arc::new(PredNode::UnOp {
            op: UnOpType::Not,
            child,
        })
    }

    /// The column this node refers to, if it is a bare column reference.
    pub fn as_column_ref(&self) -> Option<ColumnRef> {
        match self {
            PredNode::ColumnRef { col, .. } => Some(*col),
            _ => None,
        }
    }

    pub fn is_const_true(&self) -> bool {
        matches!(self, PredNode::Constant(ConstantValue::Bool(true)))
    }

    pub fn is_equality(&self) -> bool {
        matches!(
            self,
            PredNode::BinOp {
                op: BinOpType::Eq | BinOpType::IsNotDistinctFrom,
                ..
            }
        )
    }

    pub fn is_comparison(&self) -> bool {
        matches!(self, PredNode::BinOp { op, .. } if op.is_comparison())
    }

    pub fn data_type(&self) -> DataType {
        match self {
            PredNode::ColumnRef { typ, .. } => typ.clone(),
            PredNode::Constant(value) => value.data_type(),
            PredNode::BinOp { op, left, .. } => {
                if op.is_comparison() {
                    DataType::Boolean
                } else {
                    left.data_type()
                }
            }
            PredNode::LogOp { .. } => DataType::Boolean,
            PredNode::UnOp { op, child } => match op {
                UnOpType::Not => DataType::Boolean,
                UnOpType::Neg => child.data_type(),
            },
        }
    }

    /// All columns referenced anywhere in this expression.
    pub fn used_columns(&self) -> ColumnRefSet {
        let mut cols = ColumnRefSet::new();
        self.collect_columns(&mut cols);
        cols
    }

    fn collect_columns(&self, cols: &mut ColumnRefSet) {
        stacker::maybe_grow(32 * 1024, 1024 * 1024, || match self {
            PredNode::ColumnRef { col, .. } => {
                cols.insert(*col);
            }
            PredNode::Constant(_) => {}
            PredNode::BinOp { left, right, .. } => {
                left.collect_columns(cols);
                right.collect_columns(cols);
            }
            PredNode::LogOp { children, .. } => {
                for child in children {
                    child.collect_columns(cols);
                }
            }
            PredNode::UnOp { child, .. } => child.collect_columns(cols),
        })
    }
}

/// Whether values of this type can be hashed by the executor. Nested types are compared structurally and
/// have no hash opclass.
pub fn is_hashable(typ: &DataType) -> bool {
    !matches!(
        typ,
        DataType::Null
            | DataType::List(_)
            | DataType::LargeList(_)
            | DataType::FixedSizeList(_, _)
            | DataType::Struct(_)
            | DataType::Map(_, _)
            | DataType::Union(_, _)
    )
}

fn flatten_log_op(op: LogOpType, pred: &ArcPredNode, out: &mut Vec<ArcPredNode>) {
    stacker::maybe_grow(32 * 1024, 1024 * 1024, || match pred.as_ref() {
        PredNode::LogOp { op: child_op, children } if *child_op == op => {
            for child in children {
                flatten_log_op(op, child, out);
            }
        }
        _ => out.push(pred.clone()),
    })
}

/// Splits a predicate into its top-level conjuncts, flattening nested ANDs. A constant TRUE has no conjuncts.
pub fn conjuncts(pred: &ArcPredNode) -> Vec<ArcPredNode> {
    let mut out = Vec::new();
    flatten_log_op(LogOpType::And, pred, &mut out);
    out.retain(|x| !x.is_const_true());
    out
}

/// Splits a predicate into its top-level disjuncts, flattening nested ORs.
pub fn disjuncts(pred: &ArcPredNode) -> Vec<ArcPredNode> {
    let mut out = Vec::new();
    flatten_log_op(LogOpType::Or, pred, &mut out);
    out
}

fn build_log_op(op: LogOpType, preds: Vec<ArcPredNode>, empty: bool) -> ArcPredNode {
    let mut flattened = Vec::with_capacity(preds.len());
    for pred in &preds {
        flatten_log_op(op, pred, &mut flattened);
    }
    match flattened.len() {
        0 => PredNode::bool(empty),
        1 => flattened.remove(0),
        _ => Arc::new(PredNode::LogOp {
            op,
            children: flattened,
        }),
    }
}

/// Emits an AND over `preds` if there is more than one, the single element otherwise, and TRUE for none.
pub fn and_all(preds: Vec<ArcPredNode>) -> ArcPredNode {
    build_log_op(LogOpType::And, preds, true)
}

/// Emits an OR over `preds` if there is more than one, the single element otherwise, and FALSE for none.
pub fn or_all(preds: Vec<ArcPredNode>) -> ArcPredNode {
    build_log_op(LogOpType::Or, preds, false)
}

impl Display for PredNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PredNode::ColumnRef { col, .. } => write!(f, "{}", col),
            PredNode::Constant(value) => write!(f, "{}", value),
            PredNode::BinOp { op, left, right } => write!(f, "{} {} {}", left, op, right),
            PredNode::LogOp { op, children } => write!(
                f,
                "{}",
                children
                    .iter()
                    .map(|x| format!("({})", x))
                    .join(&format!(" {} ", op))
            ),
            PredNode::UnOp { op, child } => write!(f, "{} ({})", op, child),
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn col(id: usize) -> ArcPredNode {
        PredNode::column(id, DataType::Int64)
    }

    #[test]
    fn conjuncts_flatten_nested_and() {
        let a = PredNode::eq(col(1), col(2));
        let b = PredNode::bin_op(BinOpType::Gt, col(3), PredNode::int64(5));
        let c = PredNode::eq(col(4), col(5));
        let pred = and_all(vec![a.clone(), and_all(vec![b.clone(), c.clone()])]);
        assert_eq!(conjuncts(&pred), vec![a, b, c]);
    }

    #[test]
    fn conjuncts_of_true_is_empty() {
        assert!(conjuncts(&PredNode::bool(true)).is_empty());
    }

    #[test]
    fn and_all_single_is_identity() {
        let a = PredNode::eq(col(1), col(2));
        assert_eq!(and_all(vec![a.clone()]), a);
        assert!(and_all(vec![]).is_const_true());
    }

    #[test]
    fn used_columns_walks_whole_tree() {
        let pred = and_all(vec![
            PredNode::eq(col(1), col(2)),
            PredNode::not(PredNode::bin_op(BinOpType::Lt, col(7), PredNode::int64(1))),
        ]);
        assert_eq!(pred.used_columns(), ColumnRefSet::from([1, 2, 7]));
    }

    #[test]
    fn display_predicate() {
        let pred = and_all(vec![
            PredNode::eq(col(1), col(2)),
            PredNode::bin_op(BinOpType::Gt, col(3), PredNode::int64(5)),
        ]);
        assert_eq!(pred.to_string(), "(#1 = #2) AND (#3 > 5)");
    }

    #[test]
    fn nested_types_are_not_hashable() {
        assert!(is_hashable(&DataType::Int32));
        assert!(is_hashable(&DataType::Utf8));
        assert!(!is_hashable(&DataType::Null));
        assert!(!is_hashable(&DataType::Struct(arrow_schema::Fields::empty())));
    }
}
