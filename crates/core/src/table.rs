//! Table reducer
//!
//! Keeps a set of in-progress [`TableAggregate`]s and a pool of everything
//! else seen so far (titles, footers, cells, words). Each call attaches the
//! declared children whose subtree has fully arrived and emits the tables
//! whose children are all processed.

use std::collections::HashSet;

use serde::Serialize;

use crate::block::{BlockId, BlockKind, BoundingBox, RawBlock, RelationshipType};
use crate::fault::{FaultKind, IntegrityFault, Structure};
use crate::pool::{Slot, WorkingPool};
use crate::resolve::{resolve_text, trimmed, unique_ids};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableCell {
    pub row_index: u32,
    pub column_index: u32,
    pub row_span: u32,
    pub column_span: u32,
    pub confidence: f64,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableAggregate {
    pub id: BlockId,
    pub page: u32,
    pub title: Option<String>,
    pub footer: Option<String>,
    pub confidence: f64,
    pub bounds: BoundingBox,
    /// Cells with non-empty text, in declared-children order.
    pub cells: Vec<TableCell>,
    #[serde(skip)]
    declared: Vec<BlockId>,
    #[serde(skip)]
    merged: HashSet<BlockId>,
    #[serde(skip)]
    processed: HashSet<BlockId>,
    #[serde(skip)]
    cell_positions: Vec<usize>,
}

impl TableAggregate {
    fn open(block: RawBlock) -> Self {
        let declared = unique_ids(block.child_ids());
        let merged = block
            .ids_of(RelationshipType::MergedCell)
            .cloned()
            .collect();

        Self {
            id: block.id,
            page: block.page,
            title: None,
            footer: None,
            confidence: block.confidence,
            bounds: block.bounds,
            cells: Vec::new(),
            declared,
            merged,
            processed: HashSet::new(),
            cell_positions: Vec::new(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.processed.len() == self.declared.len()
    }

    pub fn declared_children(&self) -> &[BlockId] {
        &self.declared
    }

    pub fn processed_count(&self) -> usize {
        self.processed.len()
    }

    pub fn pending_children(&self) -> impl Iterator<Item = &BlockId> {
        self.declared
            .iter()
            .filter(move |id| !self.processed.contains(*id))
    }

    /// Merged cells are held back until every plain child is processed, so
    /// the cells they span are always folded individually first.
    fn advance(&mut self, pool: &mut WorkingPool, faults: &mut Vec<IntegrityFault>) {
        let plain = self.pending(pool, false);
        self.fold_pending(plain, pool, faults);

        let plain_done = self
            .declared
            .iter()
            .filter(|id| !self.is_merged(id, pool))
            .all(|id| self.processed.contains(id));
        if plain_done {
            let merged = self.pending(pool, true);
            self.fold_pending(merged, pool, faults);
        }
    }

    fn is_merged(&self, id: &str, pool: &WorkingPool) -> bool {
        self.merged.contains(id)
            || matches!(
                pool.lookup(id),
                Slot::Present(block) if block.kind == BlockKind::MergedCell
            )
    }

    fn pending(&self, pool: &WorkingPool, merged: bool) -> Vec<(usize, BlockId)> {
        self.declared
            .iter()
            .enumerate()
            .filter(|(_, id)| !self.processed.contains(*id))
            .filter(|(_, id)| self.is_merged(id, pool) == merged)
            .map(|(position, id)| (position, id.clone()))
            .collect()
    }

    fn fold_pending(
        &mut self,
        pending: Vec<(usize, BlockId)>,
        pool: &mut WorkingPool,
        faults: &mut Vec<IntegrityFault>,
    ) {
        for (position, child_id) in pending {
            let kind = match pool.lookup(&child_id) {
                Slot::Pending => continue,
                Slot::Consumed => {
                    // Folded in elsewhere.
                    self.processed.insert(child_id);
                    continue;
                }
                Slot::Present(block) => block.kind,
            };

            let folded = match pool.subtree_ready(&child_id) {
                Ok(false) => continue,
                Ok(true) => self.fold_child(position, &child_id, kind, pool),
                Err(err) => {
                    pool.take(&child_id);
                    Err(err)
                }
            };

            if let Err(kind) = folded {
                faults.push(IntegrityFault::new(
                    Structure::Table,
                    &self.id,
                    &child_id,
                    kind,
                ));
            }
            self.processed.insert(child_id);
        }
    }

    fn fold_child(
        &mut self,
        position: usize,
        child_id: &str,
        kind: BlockKind,
        pool: &mut WorkingPool,
    ) -> Result<(), FaultKind> {
        match kind {
            BlockKind::TableTitle => {
                self.title = trimmed(&resolve_text(child_id, pool)?);
            }
            BlockKind::TableFooter => {
                self.footer = trimmed(&resolve_text(child_id, pool)?);
            }
            BlockKind::Cell | BlockKind::MergedCell => {
                let Some(block) = pool.get(child_id) else {
                    return Ok(());
                };
                let row_index = block.row_index.unwrap_or_default();
                let column_index = block.column_index.unwrap_or_default();
                let row_span = block.row_span.unwrap_or(1);
                let column_span = block.column_span.unwrap_or(1);
                let confidence = block.confidence;

                if let Some(text) = trimmed(&resolve_text(child_id, pool)?) {
                    self.insert_cell(
                        position,
                        TableCell {
                            row_index,
                            column_index,
                            row_span,
                            column_span,
                            confidence,
                            text,
                        },
                    );
                }
            }
            found => {
                pool.take(child_id);
                return Err(FaultKind::UnexpectedChild { found });
            }
        }
        Ok(())
    }

    fn insert_cell(&mut self, position: usize, cell: TableCell) {
        let at = self.cell_positions.partition_point(|&p| p < position);
        self.cell_positions.insert(at, position);
        self.cells.insert(at, cell);
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TableReducer {
    in_progress: Vec<TableAggregate>,
    pool: WorkingPool,
    faults: Vec<IntegrityFault>,
}

impl TableReducer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold a batch of table-kind and leaf blocks, returning completed tables.
    pub fn reduce(mut self, blocks: Vec<RawBlock>) -> (Self, Vec<TableAggregate>) {
        let (roots, rest): (Vec<RawBlock>, Vec<RawBlock>) = blocks
            .into_iter()
            .partition(|b| b.kind == BlockKind::Table);

        self.in_progress
            .extend(roots.into_iter().map(TableAggregate::open));
        self.pool.extend(rest);

        let mut completed = Vec::new();
        for mut table in std::mem::take(&mut self.in_progress) {
            table.advance(&mut self.pool, &mut self.faults);
            if table.is_complete() {
                log::debug!(
                    "Table {} on page {} complete with {} cells",
                    table.id,
                    table.page,
                    table.cells.len()
                );
                completed.push(table);
            } else {
                self.in_progress.push(table);
            }
        }

        (self, completed)
    }

    pub fn in_progress(&self) -> &[TableAggregate] {
        &self.in_progress
    }

    pub fn pool(&self) -> &WorkingPool {
        &self.pool
    }

    /// Faults seen so far plus one per declared child that never resolved.
    pub fn finish(self) -> Vec<IntegrityFault> {
        let mut faults = self.faults;
        for table in &self.in_progress {
            faults.extend(table.pending_children().map(|child| {
                IntegrityFault::new(
                    Structure::Table,
                    &table.id,
                    child,
                    FaultKind::MissingChild,
                )
            }));
        }
        faults
    }
}
