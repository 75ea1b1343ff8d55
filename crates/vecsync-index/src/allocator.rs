//! Node id allocation and the tombstone set.
//!
//! Ids come from a monotonic counter unless the free-list holds a reclaimed
//! id, in which case the smallest one is reused. The free-list is filled only
//! by compaction: until the graph is rebuilt, other nodes may still hold edges
//! to a tombstoned id, so handing it out again would corrupt the graph.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::warn;
use vecsync_types::NodeId;

use crate::error::IndexError;

/// Old id -> new id for every node that survives compaction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompactionPlan {
    pub remap: BTreeMap<NodeId, NodeId>,
    /// Ids that will no longer hold a vector
    pub reclaimed: usize,
}

impl CompactionPlan {
    pub fn live(&self) -> usize {
        self.remap.len()
    }
}

/// Id counter, free-list and tombstone set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdAllocator {
    next: NodeId,
    free: BTreeSet<NodeId>,
    tombstones: BTreeSet<NodeId>,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hand out an id, preferring the smallest reclaimed one.
    pub fn allocate(&mut self) -> Result<NodeId, IndexError> {
        if let Some(id) = self.free.pop_first() {
            return Ok(id);
        }
        let id = self.next;
        self.next = self.next.checked_add(1).ok_or(IndexError::IdsExhausted)?;
        Ok(id)
    }

    /// The ids the next `n` calls to [`allocate`](Self::allocate) would return.
    pub fn peek(&self, n: usize) -> Result<Vec<NodeId>, IndexError> {
        let mut ids: Vec<NodeId> = self.free.iter().copied().take(n).collect();
        let mut next = self.next;
        while ids.len() < n {
            ids.push(next);
            next = next.checked_add(1).ok_or(IndexError::IdsExhausted)?;
        }
        Ok(ids)
    }

    /// Whether the id is currently handed out (tombstoned or not).
    pub fn is_allocated(&self, id: NodeId) -> bool {
        id < self.next && !self.free.contains(&id)
    }

    /// Mark an allocated id as logically deleted.
    ///
    /// Tombstoning twice or tombstoning an id that is not handed out is an
    /// error; callers log it and carry on.
    pub fn tombstone(&mut self, id: NodeId) -> Result<(), IndexError> {
        if !self.is_allocated(id) {
            warn!(node_id = id, "Tombstone for id that was never allocated");
            return Err(IndexError::NeverAllocated(id));
        }
        if !self.tombstones.insert(id) {
            warn!(node_id = id, "Tombstone for id that is already tombstoned");
            return Err(IndexError::AlreadyTombstoned(id));
        }
        Ok(())
    }

    pub fn is_tombstoned(&self, id: NodeId) -> bool {
        self.tombstones.contains(&id)
    }

    /// Whether the id is handed out and not tombstoned.
    pub fn is_live(&self, id: NodeId) -> bool {
        self.is_allocated(id) && !self.is_tombstoned(id)
    }

    pub fn tombstones(&self) -> &BTreeSet<NodeId> {
        &self.tombstones
    }

    pub fn tombstone_count(&self) -> usize {
        self.tombstones.len()
    }

    /// Ids currently handed out.
    pub fn allocated_count(&self) -> usize {
        self.next as usize - self.free.len()
    }

    pub fn live_count(&self) -> usize {
        self.allocated_count() - self.tombstones.len()
    }

    /// Tombstoned share of all handed-out ids.
    pub fn tombstone_fraction(&self) -> f32 {
        let allocated = self.allocated_count();
        if allocated == 0 {
            0.0
        } else {
            self.tombstones.len() as f32 / allocated as f32
        }
    }

    /// Counter value; ids at or above it were never handed out.
    pub fn high_water(&self) -> NodeId {
        self.next
    }

    pub fn free_list(&self) -> &BTreeSet<NodeId> {
        &self.free
    }

    /// Live ids, ascending.
    pub fn live_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        (0..self.next).filter(move |id| self.is_live(*id))
    }

    /// Assign live ids densely to `0..L` in ascending old-id order.
    pub fn plan_compaction(&self) -> CompactionPlan {
        let remap: BTreeMap<NodeId, NodeId> = self
            .live_ids()
            .enumerate()
            .map(|(new, old)| (old, new as NodeId))
            .collect();
        let reclaimed = self.allocated_count() - remap.len();
        CompactionPlan { remap, reclaimed }
    }

    /// Adopt the dense numbering of a plan: ids `L..counter` become free and
    /// the tombstone set is emptied. The counter itself never moves back.
    pub fn apply_compaction(&mut self, plan: &CompactionPlan) {
        let live = plan.live() as NodeId;
        self.free = (live..self.next).collect();
        self.tombstones.clear();
    }

    /// Check the allocator against the set of ids present in the graph.
    pub fn verify(&self, graph_ids: &BTreeSet<NodeId>) -> Result<(), IndexError> {
        if let Some(&id) = self.free.iter().find(|id| **id >= self.next) {
            return Err(IndexError::Invariant(format!(
                "free id {} is above the counter {}",
                id, self.next
            )));
        }
        if let Some(&id) = self.tombstones.iter().find(|id| !self.is_allocated(**id)) {
            return Err(IndexError::Invariant(format!(
                "tombstoned id {} is not allocated",
                id
            )));
        }
        if let Some(&id) = graph_ids.iter().find(|id| !self.is_allocated(**id)) {
            return Err(IndexError::Invariant(format!(
                "graph node {} is not covered by the allocator",
                id
            )));
        }
        if graph_ids.len() != self.allocated_count() {
            return Err(IndexError::Invariant(format!(
                "allocator has {} ids handed out but graph holds {} nodes",
                self.allocated_count(),
                graph_ids.len()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn allocate_n(alloc: &mut IdAllocator, n: usize) -> Vec<NodeId> {
        (0..n).map(|_| alloc.allocate().unwrap()).collect()
    }

    #[test]
    fn test_allocate_is_monotonic() {
        let mut alloc = IdAllocator::new();
        assert_eq!(allocate_n(&mut alloc, 3), vec![0, 1, 2]);
        assert_eq!(alloc.allocated_count(), 3);
        assert_eq!(alloc.live_count(), 3);
    }

    #[test]
    fn test_tombstone_does_not_free() {
        let mut alloc = IdAllocator::new();
        allocate_n(&mut alloc, 3);
        alloc.tombstone(1).unwrap();

        assert!(alloc.is_tombstoned(1));
        assert!(!alloc.is_live(1));
        // Not reused before compaction
        assert_eq!(alloc.allocate().unwrap(), 3);
        assert!((alloc.tombstone_fraction() - 0.25).abs() < 1e-6);
    }

    #[test]
    fn test_double_tombstone_is_error() {
        let mut alloc = IdAllocator::new();
        allocate_n(&mut alloc, 2);
        alloc.tombstone(0).unwrap();
        assert!(matches!(
            alloc.tombstone(0),
            Err(IndexError::AlreadyTombstoned(0))
        ));
        assert_eq!(alloc.tombstone_count(), 1);
    }

    #[test]
    fn test_unknown_tombstone_is_error() {
        let mut alloc = IdAllocator::new();
        allocate_n(&mut alloc, 2);
        assert!(matches!(
            alloc.tombstone(5),
            Err(IndexError::NeverAllocated(5))
        ));
        assert_eq!(alloc.tombstone_count(), 0);
    }

    #[test]
    fn test_compaction_remaps_densely_and_frees_tail() {
        let mut alloc = IdAllocator::new();
        allocate_n(&mut alloc, 6);
        alloc.tombstone(1).unwrap();
        alloc.tombstone(4).unwrap();

        let plan = alloc.plan_compaction();
        let pairs: Vec<(NodeId, NodeId)> = plan.remap.iter().map(|(o, n)| (*o, *n)).collect();
        assert_eq!(pairs, vec![(0, 0), (2, 1), (3, 2), (5, 3)]);
        assert_eq!(plan.reclaimed, 2);

        alloc.apply_compaction(&plan);
        assert_eq!(alloc.tombstone_count(), 0);
        assert_eq!(alloc.live_count(), 4);
        assert_eq!(alloc.high_water(), 6);
        assert_eq!(alloc.free_list().iter().copied().collect::<Vec<_>>(), vec![4, 5]);

        // Reclaimed ids are reused smallest first, then the counter resumes
        assert_eq!(allocate_n(&mut alloc, 3), vec![4, 5, 6]);
    }

    #[test]
    fn test_freed_id_cannot_be_tombstoned() {
        let mut alloc = IdAllocator::new();
        allocate_n(&mut alloc, 3);
        alloc.tombstone(2).unwrap();
        let plan = alloc.plan_compaction();
        alloc.apply_compaction(&plan);
        assert!(matches!(
            alloc.tombstone(2),
            Err(IndexError::NeverAllocated(2))
        ));
    }

    #[test]
    fn test_verify_against_graph_ids() {
        let mut alloc = IdAllocator::new();
        allocate_n(&mut alloc, 3);
        let ids: BTreeSet<NodeId> = [0, 1, 2].into_iter().collect();
        assert!(alloc.verify(&ids).is_ok());

        let missing: BTreeSet<NodeId> = [0, 1].into_iter().collect();
        assert!(alloc.verify(&missing).is_err());

        let stray: BTreeSet<NodeId> = [0, 1, 2, 9].into_iter().collect();
        assert!(alloc.verify(&stray).is_err());
    }

    #[test]
    fn test_peek_matches_allocation_order() {
        let mut alloc = IdAllocator::new();
        let ids = allocate_n(&mut alloc, 6);
        alloc.tombstone(ids[1]).unwrap();
        alloc.tombstone(ids[4]).unwrap();
        let plan = alloc.plan_compaction();
        alloc.apply_compaction(&plan);

        let peeked = alloc.peek(4).unwrap();
        assert_eq!(alloc.live_count(), 4);
        assert_eq!(peeked, allocate_n(&mut alloc, 4));
    }
}
