// Copyright (c) 2023-2024 CMU Database Group
//
// Use of this source code is governed by an MIT-style license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.

use std::fmt::Display;

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use super::PhysicalProperty;
use crate::nodes::ArcPredNode;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
pub enum SingletonType {
    /// All rows are on the coordinator.
    Master,
    /// All rows are on one (arbitrary) segment.
    Segment,
}

/// Rows are spread across segments by the hash of `exprs`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HashedSpec {
    pub exprs: Vec<ArcPredNode>,
    /// Rows whose hash exprs are NULL are all sent to the same segment.
    pub nulls_colocated: bool,
    /// An equivalent hashing of the same rows, e.g. on the other side's keys of an equi-join.
    pub equiv: Option<Box<HashedSpec>>,
}

impl HashedSpec {
    pub fn new(exprs: Vec<ArcPredNode>, nulls_colocated: bool) -> Self {
        Self {
            exprs,
            nulls_colocated,
            equiv: None,
        }
    }

    pub fn with_equiv(mut self, equiv: HashedSpec) -> Self {
        self.equiv = Some(Box::new(equiv));
        self
    }

    /// Adds `equiv` at the end of the chain of equivalent hashings.
    pub fn append_equiv(mut self, equiv: HashedSpec) -> Self {
        self.equiv = Some(Box::new(match self.equiv.take() {
            Some(existing) => (*existing).append_equiv(equiv),
            None => equiv,
        }));
        self
    }

    /// This hashing followed by its chain of equivalent hashings.
    pub fn equivalents(&self) -> impl Iterator<Item = &HashedSpec> {
        std::iter::successors(Some(self), |spec| spec.equiv.as_deref())
    }

    fn satisfies(&self, required: &HashedSpec) -> bool {
        self.equivalents().any(|spec| {
            spec.exprs == required.exprs && (spec.nulls_colocated || !required.nulls_colocated)
        })
    }
}

impl Display for HashedSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Hashed[{}]", self.exprs.iter().join(", "))?;
        if self.nulls_colocated {
            write!(f, " nulls colocated")?;
        }
        if let Some(equiv) = &self.equiv {
            write!(f, " equiv {}", equiv)?;
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DistributionSpec {
    /// No requirement. Only used on the requirement side.
    Any,
    /// Anything but a singleton. Only used on the requirement side.
    NonSingleton,
    Singleton(SingletonType),
    Hashed(HashedSpec),
    /// Every segment holds all rows.
    Replicated,
    /// Every segment can produce all rows on its own, e.g. a constant table.
    Universal,
    /// Rows are spread across segments without a known rule.
    Random,
}

impl DistributionSpec {
    pub fn is_singleton(&self) -> bool {
        matches!(self, DistributionSpec::Singleton(_))
    }

    pub fn is_replicated_or_universal(&self) -> bool {
        matches!(self, DistributionSpec::Replicated | DistributionSpec::Universal)
    }

    pub fn as_hashed(&self) -> Option<&HashedSpec> {
        match self {
            DistributionSpec::Hashed(spec) => Some(spec),
            _ => None,
        }
    }
}

impl PhysicalProperty for DistributionSpec {
    fn satisfies(&self, required: &Self) -> bool {
        use DistributionSpec::*;
        match (self, required) {
            (_, Any) => true,
            (Singleton(_), NonSingleton) => false,
            (Any, _) => false,
            (_, NonSingleton) => true,
            (Singleton(derived), Singleton(required)) => derived == required,
            (Universal, Singleton(_) | Replicated | Universal) => true,
            (Replicated, Replicated) => true,
            (Hashed(derived), Hashed(required)) => derived.satisfies(required),
            (Random | Hashed(_), Random) => true,
            _ => false,
        }
    }

    fn property_name(&self) -> &'static str {
        "distribution"
    }
}

impl Display for DistributionSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DistributionSpec::Any => write!(f, "Any"),
            DistributionSpec::NonSingleton => write!(f, "NonSingleton"),
            DistributionSpec::Singleton(typ) => write!(f, "Singleton({})", typ),
            DistributionSpec::Hashed(spec) => write!(f, "{}", spec),
            DistributionSpec::Replicated => write!(f, "Replicated"),
            DistributionSpec::Universal => write!(f, "Universal"),
            DistributionSpec::Random => write!(f, "Random"),
        }
    }
}

#[cfg(test)]
mod tests {
    use arrow_schema::DataType;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    use super::*;
    use crate::nodes::PredNode;

    fn hashed(ids: &[usize]) -> HashedSpec {
        HashedSpec::new(
            ids.iter()
                .map(|id| PredNode::column(*id, DataType::Int64))
                .collect(),
            false,
        )
    }

    #[test_case(DistributionSpec::Singleton(SingletonType::Master))]
    #[test_case(DistributionSpec::Replicated)]
    #[test_case(DistributionSpec::Universal)]
    #[test_case(DistributionSpec::Random)]
    #[test_case(DistributionSpec::Hashed(hashed(&[1])))]
    fn any_is_satisfied_by_everything(derived: DistributionSpec) {
        assert!(derived.satisfies(&DistributionSpec::Any));
    }

    #[test]
    fn appended_equivalent_keeps_existing_chain() {
        let derived = hashed(&[1])
            .with_equiv(hashed(&[2]))
            .append_equiv(hashed(&[3]));
        assert_eq!(
            derived
                .equivalents()
                .map(|spec| spec.exprs.clone())
                .collect::<Vec<_>>(),
            vec![hashed(&[1]).exprs, hashed(&[2]).exprs, hashed(&[3]).exprs]
        );
    }

    #[test]
    fn singleton_does_not_satisfy_non_singleton() {
        assert!(!DistributionSpec::Singleton(SingletonType::Master)
            .satisfies(&DistributionSpec::NonSingleton));
        assert!(DistributionSpec::Replicated.satisfies(&DistributionSpec::NonSingleton));
    }

    #[test]
    fn universal_satisfies_singleton_and_replicated() {
        let universal = DistributionSpec::Universal;
        assert!(universal.satisfies(&DistributionSpec::Singleton(SingletonType::Segment)));
        assert!(universal.satisfies(&DistributionSpec::Replicated));
        assert!(!universal.satisfies(&DistributionSpec::Hashed(hashed(&[1]))));
    }

    #[test]
    fn hashed_satisfied_through_equivalent() {
        let derived = DistributionSpec::Hashed(hashed(&[1]).with_equiv(hashed(&[2])));
        assert!(derived.satisfies(&DistributionSpec::Hashed(hashed(&[1]))));
        assert!(derived.satisfies(&DistributionSpec::Hashed(hashed(&[2]))));
        assert!(!derived.satisfies(&DistributionSpec::Hashed(hashed(&[3]))));
    }

    #[test]
    fn hashed_needs_colocated_nulls_when_required() {
        let derived = DistributionSpec::Hashed(hashed(&[1]));
        let mut required = hashed(&[1]);
        required.nulls_colocated = true;
        assert!(!derived.satisfies(&DistributionSpec::Hashed(required)));
    }
}
