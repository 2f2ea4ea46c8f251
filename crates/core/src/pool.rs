//! Working pool of blocks seen but not yet folded into a completed structure.
//!
//! Consumed ids are remembered as tombstones so a reducer can tell a child
//! that has not arrived yet from one another aggregate already folded in.

use std::collections::{HashMap, HashSet};

use crate::block::{BlockId, RawBlock};
use crate::fault::FaultKind;

/// Deepest relationship chain walked from a declared child.
pub const MAX_DEPTH: usize = 64;

/// State of an id in the pool.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Slot<'a> {
    Present(&'a RawBlock),
    Consumed,
    Pending,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkingPool {
    blocks: HashMap<BlockId, RawBlock>,
    consumed: HashSet<BlockId>,
}

impl WorkingPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, block: RawBlock) {
        if self.consumed.contains(&block.id) {
            log::debug!("Ignoring re-delivered block {}", block.id);
            return;
        }
        self.blocks.insert(block.id.clone(), block);
    }

    pub fn extend(&mut self, blocks: impl IntoIterator<Item = RawBlock>) {
        for block in blocks {
            self.insert(block);
        }
    }

    pub fn lookup(&self, id: &str) -> Slot<'_> {
        match self.blocks.get(id) {
            Some(block) => Slot::Present(block),
            None if self.consumed.contains(id) => Slot::Consumed,
            None => Slot::Pending,
        }
    }

    pub fn get(&self, id: &str) -> Option<&RawBlock> {
        self.blocks.get(id)
    }

    /// Remove a block and remember it as consumed.
    pub fn take(&mut self, id: &str) -> Option<RawBlock> {
        let block = self.blocks.remove(id)?;
        self.consumed.insert(block.id.clone());
        Some(block)
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// True when `id` and all of its transitive descendants are either
    /// present or already consumed.
    ///
    /// Walks with an explicit worklist in the same pre-order as text and
    /// value resolution; a block reachable twice (shared child or cycle) is
    /// visited once, at the depth it is first reached. `Ok(true)` therefore
    /// means resolving `id` stays within [`MAX_DEPTH`].
    pub fn subtree_ready(&self, id: &str) -> Result<bool, FaultKind> {
        let mut visited: HashSet<&str> = HashSet::new();
        let mut stack: Vec<(&str, usize)> = vec![(id, 0)];

        while let Some((current, depth)) = stack.pop() {
            if depth > MAX_DEPTH {
                return Err(FaultKind::DepthExceeded { limit: MAX_DEPTH });
            }
            if !visited.insert(current) {
                continue;
            }
            match self.lookup(current) {
                Slot::Pending => return Ok(false),
                Slot::Consumed => {}
                Slot::Present(block) => {
                    let children = block.child_ids().rev();
                    stack.extend(children.map(|child| (child.as_str(), depth + 1)));
                }
            }
        }

        Ok(true)
    }
}
