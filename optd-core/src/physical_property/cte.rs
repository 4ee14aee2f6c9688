// Copyright (c) 2023-2024 CMU Database Group
//
// Use of this source code is governed by an MIT-style license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.

use std::collections::BTreeMap;
use std::fmt::Display;

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use super::PhysicalProperty;

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug, Hash, Serialize, Deserialize)]
pub struct CteId(pub usize);

impl Display for CteId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "cte{}", self.0)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
pub enum CteType {
    Producer,
    Consumer,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CteReqEntry {
    pub cte_type: CteType,
    /// Whether the subtree must contain the producer/consumer, or merely may.
    pub required: bool,
}

/// CTE producers and consumers a subtree is asked to contain.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CteReq(BTreeMap<CteId, CteReqEntry>);

impl CteReq {
    pub fn insert(&mut self, id: CteId, cte_type: CteType, required: bool) {
        self.0.insert(id, CteReqEntry { cte_type, required });
    }

    pub fn get(&self, id: CteId) -> Option<&CteReqEntry> {
        self.0.get(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&CteId, &CteReqEntry)> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// The same request with every entry made optional.
    pub fn all_optional(&self) -> CteReq {
        CteReq(
            self.0
                .iter()
                .map(|(id, entry)| {
                    (
                        *id,
                        CteReqEntry {
                            cte_type: entry.cte_type,
                            required: false,
                        },
                    )
                })
                .collect(),
        )
    }

    /// The entries of this request that `resolved` does not already provide.
    pub fn unresolved(&self, resolved: &CteMap) -> CteReq {
        CteReq(
            self.0
                .iter()
                .filter(|(id, entry)| resolved.get(**id) != Some(entry.cte_type))
                .map(|(id, entry)| (*id, *entry))
                .collect(),
        )
    }
}

impl Display for CteReq {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}]",
            self.0
                .iter()
                .map(|(id, entry)| format!(
                    "{}:{}{}",
                    id,
                    entry.cte_type,
                    if entry.required { "" } else { "?" }
                ))
                .join(", ")
        )
    }
}

/// CTE producers and consumers a subtree contains. This is the derived counterpart of [`CteReq`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CteMap(BTreeMap<CteId, CteType>);

impl CteMap {
    pub fn insert(&mut self, id: CteId, cte_type: CteType) {
        self.0.insert(id, cte_type);
    }

    pub fn get(&self, id: CteId) -> Option<CteType> {
        self.0.get(&id).copied()
    }

    pub fn combine(&self, other: &CteMap) -> CteMap {
        let mut combined = self.clone();
        for (id, cte_type) in &other.0 {
            combined.0.entry(*id).or_insert(*cte_type);
        }
        combined
    }

    pub fn satisfies_req(&self, required: &CteReq) -> bool {
        required
            .iter()
            .filter(|(_, entry)| entry.required)
            .all(|(id, entry)| self.get(*id) == Some(entry.cte_type))
    }
}

impl PhysicalProperty for CteReq {
    fn satisfies(&self, required: &Self) -> bool {
        required
            .iter()
            .filter(|(_, entry)| entry.required)
            .all(|(id, entry)| self.get(*id).map(|x| x.cte_type) == Some(entry.cte_type))
    }

    fn property_name(&self) -> &'static str {
        "cte"
    }
}
