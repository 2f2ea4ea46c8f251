//! Text and geometry resolution over a block's descendants.
//!
//! Both walks are depth-first, pre-order, children left-to-right, and remove
//! every visited block from the pool as its contribution is folded in. A
//! child that has not arrived yet contributes nothing and stays available
//! for a later call.

use crate::block::{BlockId, BlockKind, BoundingBox, RawBlock};
use crate::fault::FaultKind;
use crate::pool::{WorkingPool, MAX_DEPTH};

/// Appended after every literal; aggregates trim the trailing one.
pub const SEPARATOR: char = ' ';

/// Running accumulators threaded through [`resolve_value`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ValueAccumulator {
    pub text: String,
    pub confidence: f64,
    pub bounds: BoundingBox,
}

impl ValueAccumulator {
    pub fn new(confidence: f64, bounds: BoundingBox) -> Self {
        Self {
            text: String::new(),
            confidence,
            bounds,
        }
    }
}

/// Declared ids with duplicates dropped, first occurrence wins.
pub fn unique_ids<'a>(ids: impl Iterator<Item = &'a BlockId>) -> Vec<BlockId> {
    let mut seen = std::collections::HashSet::new();
    ids.filter(|id| seen.insert(id.as_str()))
        .cloned()
        .collect()
}

/// Strip the trailing separator; `None` when nothing is left.
pub fn trimmed(text: &str) -> Option<String> {
    let text = text.trim_end();
    if text.is_empty() {
        None
    } else {
        Some(text.to_string())
    }
}

/// Concatenate the literal text of `id` and its descendants.
pub fn resolve_text(id: &str, pool: &mut WorkingPool) -> Result<String, FaultKind> {
    let mut text = String::new();

    walk(id, pool, |block| {
        if let Some(literal) = &block.text {
            text.push_str(literal);
            text.push(SEPARATOR);
        }
    })?;

    Ok(text)
}

/// Like [`resolve_text`], but selection elements read as `TRUE`/`FALSE`,
/// and `VALUE` blocks and selection elements widen the running box.
/// `VALUE` blocks also raise the running confidence.
pub fn resolve_value(
    id: &str,
    acc: ValueAccumulator,
    pool: &mut WorkingPool,
) -> Result<ValueAccumulator, FaultKind> {
    let mut acc = acc;

    walk(id, pool, |block| match block.kind {
        BlockKind::SelectionElement => {
            if let Some(status) = block.selection_status {
                acc.text.push_str(status.as_literal());
                acc.text.push(SEPARATOR);
            }
            acc.bounds = acc.bounds.union(&block.bounds);
        }
        BlockKind::KeyValueSet if block.is_value() => {
            acc.bounds = acc.bounds.union(&block.bounds);
            acc.confidence = acc.confidence.max(block.confidence);
        }
        _ => {
            if let Some(literal) = &block.text {
                acc.text.push_str(literal);
                acc.text.push(SEPARATOR);
            }
        }
    })?;

    Ok(acc)
}

fn walk<F>(id: &str, pool: &mut WorkingPool, mut visit: F) -> Result<(), FaultKind>
where
    F: FnMut(&RawBlock),
{
    let mut stack: Vec<(BlockId, usize)> = vec![(id.to_string(), 0)];

    while let Some((current, depth)) = stack.pop() {
        if depth > MAX_DEPTH {
            return Err(FaultKind::DepthExceeded { limit: MAX_DEPTH });
        }
        let Some(block) = pool.take(&current) else {
            continue;
        };
        visit(&block);
        stack.extend(block.child_ids().rev().map(|child| (child.clone(), depth + 1)));
    }

    Ok(())
}
