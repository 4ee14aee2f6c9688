// Copyright (c) 2023-2024 CMU Database Group
//
// Use of this source code is governed by an MIT-style license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.

use serde::{Deserialize, Serialize};

use crate::nodes::ColumnRefSet;
use crate::physical_property::{PartInfo, PartKeys, ScanId};

/// Logical properties of a relational subtree. They hold for every expression in a group, regardless of which
/// physical implementation is picked.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RelProps {
    pub output_columns: ColumnRefSet,
    /// Columns the subtree references but does not produce, i.e. bindings from an enclosing correlated scope.
    pub outer_refs: ColumnRefSet,
    pub part_info: PartInfo,
}

impl RelProps {
    pub fn new(output_columns: ColumnRefSet) -> Self {
        Self {
            output_columns,
            ..Default::default()
        }
    }

    pub fn with_outer_refs(mut self, outer_refs: ColumnRefSet) -> Self {
        self.outer_refs = outer_refs;
        self
    }

    pub fn with_part_consumer(
        mut self,
        scan_id: ScanId,
        table: impl Into<String>,
        part_keys: Vec<PartKeys>,
    ) -> Self {
        self.part_info.add_consumer(scan_id, table, part_keys);
        self
    }

    pub fn has_outer_refs(&self) -> bool {
        !self.outer_refs.is_empty()
    }

    /// Logical properties of a binary operator over `left` and `right`: the union of their outputs, with
    /// references resolved by either side no longer counted as outer references.
    pub fn combine(left: &RelProps, right: &RelProps) -> RelProps {
        let output_columns = left.output_columns.union(&right.output_columns);
        let outer_refs = left
            .outer_refs
            .union(&right.outer_refs)
            .difference(&output_columns);
        RelProps {
            output_columns,
            outer_refs,
            part_info: left.part_info.combine(&right.part_info),
        }
    }
}
