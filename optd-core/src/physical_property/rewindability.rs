// Copyright (c) 2023-2024 CMU Database Group
//
// Use of this source code is governed by an MIT-style license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.

use serde::{Deserialize, Serialize};

use super::PhysicalProperty;

/// Whether a subtree can be replayed from the start. The levels are ordered: a stronger level can stand in
/// for any weaker one.
#[derive(
    Copy,
    Clone,
    Debug,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
)]
pub enum RewindabilitySpec {
    NotRewindable,
    /// Can be re-executed from scratch, producing the same rows again.
    Rescannable,
    /// Can be rewound cheaply, e.g. because its output is materialized.
    Rewindable,
    /// Can additionally restore a previously marked position.
    MarkRestore,
}

impl PhysicalProperty for RewindabilitySpec {
    fn satisfies(&self, required: &Self) -> bool {
        self >= required
    }

    fn property_name(&self) -> &'static str {
        "rewindability"
    }
}
