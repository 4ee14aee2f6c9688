// Copyright (c) 2023-2024 CMU Database Group
//
// Use of this source code is governed by an MIT-style license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{ensure, Result};
use optd_core::cascades::{GroupId, RelNodeContext};
use optd_core::physical_property::PartitionPropagationSpec;
use parking_lot::Mutex;
use tracing::trace;

use crate::join::{INNER_CHILD, OUTER_CHILD, SCALAR_CHILD};

/// Key of a partition propagation request: the spec required from the join, the child it is computed for,
/// and the groups of the join's children. Two keys are equal when the required specs are structurally equal,
/// whether or not they share an allocation.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PartPropReq {
    required: Arc<PartitionPropagationSpec>,
    child_index: usize,
    outer_child: GroupId,
    inner_child: GroupId,
    scalar_child: GroupId,
}

impl PartPropReq {
    pub fn new(
        required: Arc<PartitionPropagationSpec>,
        child_index: usize,
        context: &RelNodeContext,
    ) -> Result<Self> {
        let children = &context.children_group_ids;
        ensure!(
            children.len() > SCALAR_CHILD,
            "join in group {} has {} children, expected {}",
            context.group_id,
            children.len(),
            SCALAR_CHILD + 1
        );
        Ok(Self {
            required,
            child_index,
            outer_child: children[OUTER_CHILD],
            inner_child: children[INNER_CHILD],
            scalar_child: children[SCALAR_CHILD],
        })
    }

    pub fn required(&self) -> &Arc<PartitionPropagationSpec> {
        &self.required
    }

    pub fn child_index(&self) -> usize {
        self.child_index
    }
}

/// Memoizes the partition propagation spec computed for each child of one join. A miss is computed without
/// holding the lock; if another thread inserted the same key in the meantime, its result is kept.
#[derive(Debug, Default)]
pub struct PartPropCache {
    entries: Mutex<HashMap<PartPropReq, Arc<PartitionPropagationSpec>>>,
    misses: AtomicUsize,
}

impl PartPropCache {
    pub fn get_or_compute(
        &self,
        req: PartPropReq,
        compute: impl FnOnce() -> Result<PartitionPropagationSpec>,
    ) -> Result<Arc<PartitionPropagationSpec>> {
        if let Some(cached) = self.entries.lock().get(&req).cloned() {
            trace!(
                event = "part_prop_cache_hit",
                child_index = req.child_index,
                required = %req.required
            );
            return Ok(cached);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        trace!(
            event = "part_prop_cache_miss",
            child_index = req.child_index,
            required = %req.required
        );
        let computed = Arc::new(compute()?);
        let mut entries = self.entries.lock();
        Ok(entries.entry(req).or_insert(computed).clone())
    }

    /// Number of requests that were not served from the cache.
    pub fn misses(&self) -> usize {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use anyhow::bail;
    use optd_core::physical_property::{PartFilterMap, PartIndexEntry, PartIndexMap, ScanId};
    use pretty_assertions::assert_eq;

    use super::*;

    fn context() -> RelNodeContext {
        RelNodeContext {
            group_id: GroupId(7),
            children_group_ids: vec![GroupId(1), GroupId(2), GroupId(3)],
        }
    }

    fn spec(scan_id: usize) -> PartitionPropagationSpec {
        let mut index_map = PartIndexMap::default();
        index_map.insert(
            ScanId(scan_id),
            PartIndexEntry {
                table: "t".into(),
                part_keys: vec![],
                propagators: 1,
            },
        );
        PartitionPropagationSpec::new(index_map, PartFilterMap::default())
    }

    #[test]
    fn keys_compare_specs_structurally() {
        let a = PartPropReq::new(Arc::new(spec(1)), 0, &context()).unwrap();
        let b = PartPropReq::new(Arc::new(spec(1)), 0, &context()).unwrap();
        let c = PartPropReq::new(Arc::new(spec(1)), 1, &context()).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn key_needs_three_children() {
        let context = RelNodeContext {
            group_id: GroupId(7),
            children_group_ids: vec![GroupId(1), GroupId(2)],
        };
        assert!(PartPropReq::new(Arc::new(spec(1)), 0, &context).is_err());
    }

    #[test]
    fn second_lookup_is_a_hit() {
        let cache = PartPropCache::default();
        let req = PartPropReq::new(Arc::new(spec(1)), 0, &context()).unwrap();
        let first = cache.get_or_compute(req.clone(), || Ok(spec(2))).unwrap();
        let second = cache
            .get_or_compute(req, || bail!("should have been cached"))
            .unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.misses(), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn failed_computation_is_not_cached() {
        let cache = PartPropCache::default();
        let req = PartPropReq::new(Arc::new(spec(1)), 0, &context()).unwrap();
        assert!(cache.get_or_compute(req.clone(), || bail!("boom")).is_err());
        assert!(cache.is_empty());
        assert!(cache.get_or_compute(req, || Ok(spec(2))).is_ok());
        assert_eq!(cache.misses(), 2);
    }
}
