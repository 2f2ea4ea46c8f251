//! Key-value reducer
//!
//! Form fields arrive as a `KEY_VALUE_SET` tagged `KEY` whose `CHILD` ids
//! spell the key and whose `VALUE` ids point at `KEY_VALUE_SET` blocks tagged
//! `VALUE`. Only `KEY` blocks open an aggregate; `VALUE` blocks are reached
//! through their key. A pair is emitted once both child sets are resolved.

use std::collections::{BTreeMap, HashSet};

use serde::Serialize;

use crate::block::{BlockId, BlockKind, BoundingBox, RawBlock, RelationshipType};
use crate::fault::{FaultKind, IntegrityFault, Structure};
use crate::pool::{Slot, WorkingPool};
use crate::resolve::{resolve_text, resolve_value, unique_ids, ValueAccumulator};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KeyValueAggregate {
    pub id: BlockId,
    pub page: u32,
    pub key: String,
    pub value: String,
    pub key_confidence: f64,
    pub value_confidence: f64,
    /// Union of the key's box and every resolved value/selection box.
    pub bounds: BoundingBox,
    #[serde(skip)]
    value_children: Vec<BlockId>,
    #[serde(skip)]
    text_children: Vec<BlockId>,
    #[serde(skip)]
    processed_values: HashSet<BlockId>,
    #[serde(skip)]
    processed_text: HashSet<BlockId>,
    #[serde(skip)]
    key_parts: BTreeMap<usize, String>,
    #[serde(skip)]
    value_parts: BTreeMap<usize, String>,
}

enum Readiness {
    Waiting,
    Consumed,
    Ready,
    Rejected(FaultKind),
}

fn readiness(pool: &WorkingPool, id: &str, accepts: fn(&RawBlock) -> bool) -> Readiness {
    match pool.lookup(id) {
        Slot::Pending => Readiness::Waiting,
        Slot::Consumed => Readiness::Consumed,
        Slot::Present(block) if !accepts(block) => {
            Readiness::Rejected(FaultKind::UnexpectedChild { found: block.kind })
        }
        Slot::Present(_) => match pool.subtree_ready(id) {
            Ok(true) => Readiness::Ready,
            Ok(false) => Readiness::Waiting,
            Err(kind) => Readiness::Rejected(kind),
        },
    }
}

fn is_value_block(block: &RawBlock) -> bool {
    block.is_value()
}

fn is_key_text(block: &RawBlock) -> bool {
    block.kind == BlockKind::Word
}

fn joined(parts: &BTreeMap<usize, String>) -> String {
    parts
        .values()
        .map(String::as_str)
        .collect::<String>()
        .trim_end()
        .to_string()
}

impl KeyValueAggregate {
    fn open(block: RawBlock) -> Self {
        let value_children = unique_ids(block.ids_of(RelationshipType::Value));
        let text_children = unique_ids(block.ids_of(RelationshipType::Child));

        Self {
            id: block.id,
            page: block.page,
            key: String::new(),
            value: String::new(),
            key_confidence: block.confidence,
            value_confidence: 0.0,
            bounds: block.bounds,
            value_children,
            text_children,
            processed_values: HashSet::new(),
            processed_text: HashSet::new(),
            key_parts: BTreeMap::new(),
            value_parts: BTreeMap::new(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.processed_values.len() + self.processed_text.len()
            == self.value_children.len() + self.text_children.len()
    }

    pub fn value_children(&self) -> &[BlockId] {
        &self.value_children
    }

    pub fn text_children(&self) -> &[BlockId] {
        &self.text_children
    }

    pub fn processed_count(&self) -> usize {
        self.processed_values.len() + self.processed_text.len()
    }

    pub fn pending_children(&self) -> impl Iterator<Item = &BlockId> {
        let values = self
            .value_children
            .iter()
            .filter(move |id| !self.processed_values.contains(*id));
        let text = self
            .text_children
            .iter()
            .filter(move |id| !self.processed_text.contains(*id));
        values.chain(text)
    }

    fn advance(&mut self, pool: &mut WorkingPool, faults: &mut Vec<IntegrityFault>) {
        for (position, child_id) in self.value_children.clone().into_iter().enumerate() {
            if self.processed_values.contains(&child_id) {
                continue;
            }
            let folded = match readiness(pool, &child_id, is_value_block) {
                Readiness::Waiting => continue,
                Readiness::Consumed => Ok(()),
                Readiness::Ready => self.fold_value(position, &child_id, pool),
                Readiness::Rejected(kind) => {
                    pool.take(&child_id);
                    Err(kind)
                }
            };
            self.record(faults, &child_id, folded);
            self.processed_values.insert(child_id);
        }

        for (position, child_id) in self.text_children.clone().into_iter().enumerate() {
            if self.processed_text.contains(&child_id) {
                continue;
            }
            let folded = match readiness(pool, &child_id, is_key_text) {
                Readiness::Waiting => continue,
                Readiness::Consumed => Ok(()),
                Readiness::Ready => resolve_text(&child_id, pool).map(|text| {
                    self.key_parts.insert(position, text);
                }),
                Readiness::Rejected(kind) => {
                    pool.take(&child_id);
                    Err(kind)
                }
            };
            self.record(faults, &child_id, folded);
            self.processed_text.insert(child_id);
        }

        self.key = joined(&self.key_parts);
        self.value = joined(&self.value_parts);
    }

    fn fold_value(
        &mut self,
        position: usize,
        child_id: &str,
        pool: &mut WorkingPool,
    ) -> Result<(), FaultKind> {
        let acc = ValueAccumulator::new(self.value_confidence, self.bounds);
        let acc = resolve_value(child_id, acc, pool)?;
        self.value_confidence = acc.confidence;
        self.bounds = acc.bounds;
        self.value_parts.insert(position, acc.text);
        Ok(())
    }

    fn record(
        &self,
        faults: &mut Vec<IntegrityFault>,
        child_id: &str,
        folded: Result<(), FaultKind>,
    ) {
        if let Err(kind) = folded {
            faults.push(IntegrityFault::new(
                Structure::KeyValue,
                &self.id,
                child_id,
                kind,
            ));
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct KeyValueReducer {
    in_progress: Vec<KeyValueAggregate>,
    pool: WorkingPool,
    faults: Vec<IntegrityFault>,
}

impl KeyValueReducer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold a batch of form and leaf blocks, returning completed pairs.
    pub fn reduce(mut self, blocks: Vec<RawBlock>) -> (Self, Vec<KeyValueAggregate>) {
        let (roots, rest): (Vec<RawBlock>, Vec<RawBlock>) =
            blocks.into_iter().partition(RawBlock::is_key);

        self.in_progress
            .extend(roots.into_iter().map(KeyValueAggregate::open));
        self.pool.extend(rest);

        let mut completed = Vec::new();
        for mut pair in std::mem::take(&mut self.in_progress) {
            pair.advance(&mut self.pool, &mut self.faults);
            if pair.is_complete() {
                log::debug!("Key-value pair {} on page {} complete", pair.id, pair.page);
                completed.push(pair);
            } else {
                self.in_progress.push(pair);
            }
        }

        (self, completed)
    }

    pub fn in_progress(&self) -> &[KeyValueAggregate] {
        &self.in_progress
    }

    pub fn pool(&self) -> &WorkingPool {
        &self.pool
    }

    /// Faults seen so far plus one per declared child that never resolved.
    pub fn finish(self) -> Vec<IntegrityFault> {
        let mut faults = self.faults;
        for pair in &self.in_progress {
            faults.extend(pair.pending_children().map(|child| {
                IntegrityFault::new(
                    Structure::KeyValue,
                    &pair.id,
                    child,
                    FaultKind::MissingChild,
                )
            }));
        }
        faults
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::{EntityType, SelectionStatus};
    use crate::pool::MAX_DEPTH;

    fn word(id: &str, text: &str) -> RawBlock {
        RawBlock::new(id, BlockKind::Word).with_text(text)
    }

    fn key(id: &str, values: &[&str], words: &[&str]) -> RawBlock {
        RawBlock::new(id, BlockKind::KeyValueSet)
            .with_entity(EntityType::Key)
            .with_page(3)
            .with_confidence(0.95)
            .with_bounds(BoundingBox::new(0.1, 0.5, 0.2, 0.03))
            .with_relationship(RelationshipType::Value, values.iter().copied())
            .with_children(words.iter().copied())
    }

    fn value(id: &str, bounds: BoundingBox, children: &[&str]) -> RawBlock {
        RawBlock::new(id, BlockKind::KeyValueSet)
            .with_entity(EntityType::Value)
            .with_confidence(0.88)
            .with_bounds(bounds)
            .with_children(children.iter().copied())
    }

    #[test]
    fn test_key_without_value_children() {
        let (reducer, done) = KeyValueReducer::new().reduce(vec![
            key("k", &[], &["w-1"]),
            word("w-1", "Patient Name"),
        ]);

        assert_eq!(done.len(), 1);
        assert_eq!(done[0].key, "Patient Name");
        assert_eq!(done[0].value, "");
        assert_eq!(done[0].page, 3);
        assert!(reducer.finish().is_empty());
    }

    #[test]
    fn test_pair_resolves_across_batches() {
        let value_box = BoundingBox::new(0.35, 0.49, 0.3, 0.04);

        let (reducer, done) = KeyValueReducer::new().reduce(vec![
            key("k", &["v"], &["w-1", "w-2"]),
            word("w-2", "Number"),
            value("v", value_box, &["w-3"]),
        ]);
        assert!(done.is_empty());
        assert_eq!(reducer.in_progress()[0].processed_count(), 1);
        assert_eq!(reducer.in_progress()[0].key, "Number");

        let (reducer, done) = reducer.reduce(vec![word("w-1", "Member"), word("w-3", "A12345")]);
        assert_eq!(done.len(), 1);

        let pair = &done[0];
        assert_eq!(pair.key, "Member Number");
        assert_eq!(pair.value, "A12345");
        assert!((pair.key_confidence - 0.95).abs() < 1e-12);
        assert!((pair.value_confidence - 0.88).abs() < 1e-12);
        assert!(pair.bounds.contains(&BoundingBox::new(0.1, 0.5, 0.2, 0.03)));
        assert!(pair.bounds.contains(&value_box));
        assert!(reducer.pool().is_empty());
    }

    #[test]
    fn test_checkbox_value() {
        let check = BoundingBox::new(0.7, 0.52, 0.02, 0.02);
        let (_, done) = KeyValueReducer::new().reduce(vec![
            key("k", &["v"], &["w-1"]),
            word("w-1", "Urgent"),
            value("v", BoundingBox::new(0.68, 0.5, 0.05, 0.05), &["sel"]),
            RawBlock::new("sel", BlockKind::SelectionElement)
                .with_selection(SelectionStatus::Selected)
                .with_bounds(check),
        ]);

        assert_eq!(done[0].key, "Urgent");
        assert_eq!(done[0].value, "TRUE");
        assert!(done[0].bounds.contains(&check));
    }

    #[test]
    fn test_value_blocks_never_open_pairs() {
        let (reducer, done) = KeyValueReducer::new().reduce(vec![value(
            "v",
            BoundingBox::default(),
            &[],
        )]);

        assert!(done.is_empty());
        assert!(reducer.in_progress().is_empty());
        assert_eq!(reducer.pool().len(), 1);
    }

    #[test]
    fn test_missing_value_reported_on_finish() {
        let (reducer, done) =
            KeyValueReducer::new().reduce(vec![key("k", &["v"], &["w-1"]), word("w-1", "DOB")]);
        assert!(done.is_empty());

        assert_eq!(
            reducer.finish(),
            vec![IntegrityFault::new(
                Structure::KeyValue,
                "k",
                "v",
                FaultKind::MissingChild
            )]
        );
    }

    #[test]
    fn test_non_value_child_is_a_fault() {
        let (reducer, done) = KeyValueReducer::new().reduce(vec![
            key("k", &["w-9"], &["w-1"]),
            word("w-1", "Plan"),
            word("w-9", "stray"),
        ]);

        assert_eq!(done.len(), 1);
        assert_eq!(done[0].value, "");
        assert_eq!(
            reducer.finish(),
            vec![IntegrityFault::new(
                Structure::KeyValue,
                "k",
                "w-9",
                FaultKind::UnexpectedChild {
                    found: BlockKind::Word
                }
            )]
        );
    }

    #[test]
    fn test_too_deep_value_is_a_fault_and_pair_completes() {
        let mut blocks = vec![
            key("k", &["v"], &["w-1"]),
            word("w-1", "Diagnosis"),
            value("v", BoundingBox::default(), &["n-0"]),
        ];
        for i in 0..=MAX_DEPTH {
            blocks.push(
                RawBlock::new(format!("n-{i}"), BlockKind::Line)
                    .with_children([format!("n-{}", i + 1)]),
            );
        }
        blocks.push(word(&format!("n-{}", MAX_DEPTH + 1), "deep"));

        let (reducer, done) = KeyValueReducer::new().reduce(blocks);

        assert_eq!(done.len(), 1);
        assert_eq!(done[0].key, "Diagnosis");
        assert_eq!(done[0].value, "");
        assert_eq!(reducer.pool().lookup("v"), Slot::Consumed);
        assert_eq!(
            reducer.finish(),
            vec![IntegrityFault::new(
                Structure::KeyValue,
                "k",
                "v",
                FaultKind::DepthExceeded { limit: MAX_DEPTH }
            )]
        );
    }
}
