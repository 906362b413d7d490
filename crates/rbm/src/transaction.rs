//! Transaction-scoped allocation deltas.
//!
//! A `Transaction` is owned by the caller and accumulates the allocation
//! and free operations of one logical mutation. Nothing here touches the
//! device: deltas become durable only when the manager's
//! `complete_allocation` folds them into the on-disk bitmap.

use rbm_types::{BlockId, IntervalSet};

/// Direction of a recorded delta.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocOp {
    /// Blocks to be marked allocated on commit.
    Set,
    /// Blocks to be marked free on commit.
    Clear,
}

/// One pending allocation or free, covering a set of block-id ranges.
#[derive(Debug, Clone)]
pub struct AllocDelta {
    pub op: AllocOp,
    pub blk_ids: IntervalSet,
}

/// Caller-owned accumulator of allocation deltas.
///
/// Deltas are kept in insertion order; commit replays them in that order.
#[derive(Debug, Default)]
pub struct Transaction {
    deltas: Vec<AllocDelta>,
}

impl Transaction {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a delta.
    pub fn push(&mut self, delta: AllocDelta) {
        self.deltas.push(delta);
    }

    /// Deltas in insertion order.
    #[must_use]
    pub fn deltas(&self) -> &[AllocDelta] {
        &self.deltas
    }

    /// Whether `id` lies in any pending `Set` delta.
    ///
    /// The free-block finder uses this so that two allocations on the same
    /// transaction never hand out overlapping blocks.
    #[must_use]
    pub fn reserves(&self, id: BlockId) -> bool {
        self.deltas
            .iter()
            .filter(|delta| delta.op == AllocOp::Set)
            .any(|delta| delta.blk_ids.contains(id))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.deltas.is_empty()
    }

    /// Drop every pending delta.
    pub fn clear(&mut self) {
        self.deltas.clear();
    }
}
