// Copyright (c) 2023-2024 CMU Database Group
//
// Use of this source code is governed by an MIT-style license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.

use std::fmt::Display;

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use super::PhysicalProperty;
use crate::nodes::{ColumnRef, ColumnRefSet};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
pub enum SortOrderType {
    Asc,
    Desc,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SortKey {
    pub col: ColumnRef,
    pub order: SortOrderType,
}

impl Display for SortKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.col, self.order)
    }
}

/// Sort order of the rows. An empty spec means no particular order.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrderSpec {
    pub keys: Vec<SortKey>,
}

impl OrderSpec {
    pub fn new(keys: Vec<SortKey>) -> Self {
        Self { keys }
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn used_columns(&self) -> ColumnRefSet {
        self.keys.iter().map(|key| key.col).collect()
    }
}

impl PhysicalProperty for OrderSpec {
    fn satisfies(&self, required: &Self) -> bool {
        self.keys.starts_with(&required.keys)
    }

    fn property_name(&self) -> &'static str {
        "order"
    }
}

impl Display for OrderSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}]", self.keys.iter().join(", "))
    }
}
