//! Pagination state machine
//!
//! [`StreamState`] consumes the service's result pages one at a time,
//! demultiplexes each page of blocks by kind into the three reducers and
//! collects what they complete. It is `Streaming` until a page arrives
//! without a continuation token, then `Done`; [`StreamState::finish`] flushes
//! the leftovers and groups everything by page.
//!
//! No I/O happens here: the shell fetches pages and feeds them in.

use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

use crate::block::{BlockKind, RawBlock};
use crate::fault::IntegrityFault;
use crate::key_value::{KeyValueAggregate, KeyValueReducer};
use crate::page::{PageAggregate, PageReducer};
use crate::progress::Progress;
use crate::table::{TableAggregate, TableReducer};

/// One paginated response from the service.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all(deserialize = "PascalCase"))]
pub struct ResultsPage {
    #[serde(default)]
    pub blocks: Vec<RawBlock>,
    #[serde(default)]
    pub next_token: Option<String>,
    #[serde(
        default,
        rename(deserialize = "DocumentMetadata"),
        deserialize_with = "metadata_pages"
    )]
    pub page_count: Option<u32>,
}

fn metadata_pages<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(rename_all = "PascalCase")]
    struct DocumentMetadata {
        pages: Option<u32>,
    }

    Ok(Option::<DocumentMetadata>::deserialize(deserializer)?.and_then(|m| m.pages))
}

impl ResultsPage {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// Blocks of one response page, partitioned per reducer.
///
/// Words and selection elements carry no structure of their own and are
/// handed to both the table and key-value reducers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Demux {
    pub pages: Vec<RawBlock>,
    pub tables: Vec<RawBlock>,
    pub key_values: Vec<RawBlock>,
}

impl Demux {
    pub fn split(blocks: Vec<RawBlock>) -> Self {
        let mut demux = Demux::default();

        for block in blocks {
            match block.kind {
                BlockKind::Page | BlockKind::Line => demux.pages.push(block),
                BlockKind::Table
                | BlockKind::TableTitle
                | BlockKind::TableFooter
                | BlockKind::Cell
                | BlockKind::MergedCell => demux.tables.push(block),
                BlockKind::KeyValueSet => demux.key_values.push(block),
                BlockKind::Word | BlockKind::SelectionElement => {
                    demux.tables.push(block.clone());
                    demux.key_values.push(block);
                }
                BlockKind::Other => log::trace!("Skipping unsupported block {}", block.id),
            }
        }

        demux
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Phase {
    Streaming,
    Done,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StreamError {
    #[error("Result stream already finished")]
    AlreadyDone,
    #[error("Result stream still has pages pending")]
    StillStreaming,
}

/// Completed structures, each indexed by `page - 1`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reassembly {
    pub text_pages: Vec<Vec<RawBlock>>,
    pub tables: Vec<Vec<TableAggregate>>,
    pub key_value_pairs: Vec<Vec<KeyValueAggregate>>,
    pub progress: u8,
    /// Aggregates that failed to resolve; empty for a clean run.
    pub faults: Vec<IntegrityFault>,
}

impl Reassembly {
    pub fn is_clean(&self) -> bool {
        self.faults.is_empty()
    }

    pub fn page_count(&self) -> usize {
        self.text_pages
            .len()
            .max(self.tables.len())
            .max(self.key_value_pairs.len())
    }

    pub fn table_count(&self) -> usize {
        self.tables.iter().map(Vec::len).sum()
    }

    pub fn pair_count(&self) -> usize {
        self.key_value_pairs.iter().map(Vec::len).sum()
    }

    /// Line text of a 1-based page.
    pub fn page_text(&self, page: usize) -> Option<String> {
        let blocks = self.text_pages.get(page.checked_sub(1)?)?;
        Some(
            blocks
                .iter()
                .filter(|b| b.kind == BlockKind::Line)
                .filter_map(|b| b.text.as_deref())
                .collect::<Vec<_>>()
                .join("\n"),
        )
    }
}

#[derive(Debug, Clone)]
pub struct StreamState {
    phase: Phase,
    next_token: Option<String>,
    steps: usize,
    page_count: u32,
    pages: PageReducer,
    tables: TableReducer,
    key_values: KeyValueReducer,
    text_pages: Vec<PageAggregate>,
    completed_tables: Vec<TableAggregate>,
    completed_pairs: Vec<KeyValueAggregate>,
    progress: Progress,
}

impl Default for StreamState {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamState {
    pub fn new() -> Self {
        Self {
            phase: Phase::Streaming,
            next_token: None,
            steps: 0,
            page_count: 0,
            pages: PageReducer::new(),
            tables: TableReducer::new(),
            key_values: KeyValueReducer::new(),
            text_pages: Vec::new(),
            completed_tables: Vec::new(),
            completed_pairs: Vec::new(),
            progress: Progress::default(),
        }
    }

    /// Seed the page count reported by the job status, before any results.
    pub fn with_page_count(mut self, page_count: u32) -> Self {
        self.page_count = page_count;
        self
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Token to request the next page with; `None` on the first request.
    pub fn next_token(&self) -> Option<&str> {
        self.next_token.as_deref()
    }

    pub fn steps(&self) -> usize {
        self.steps
    }

    pub fn progress(&self) -> Progress {
        self.progress
    }

    /// One pagination step.
    pub fn apply(&mut self, page: ResultsPage) -> Result<(), StreamError> {
        if self.phase == Phase::Done {
            return Err(StreamError::AlreadyDone);
        }

        if let Some(count) = page.page_count {
            self.page_count = self.page_count.max(count);
        }

        let block_count = page.blocks.len();
        let Demux {
            pages,
            tables,
            key_values,
        } = Demux::split(page.blocks);

        let (reducer, sealed) = std::mem::take(&mut self.pages).reduce(pages);
        self.pages = reducer;
        self.text_pages.extend(sealed);

        let (reducer, completed) = std::mem::take(&mut self.tables).reduce(tables);
        self.tables = reducer;
        self.completed_tables.extend(completed);

        let (reducer, completed) = std::mem::take(&mut self.key_values).reduce(key_values);
        self.key_values = reducer;
        self.completed_pairs.extend(completed);

        self.next_token = page.next_token.filter(|token| !token.is_empty());
        if self.next_token.is_none() {
            self.phase = Phase::Done;
        }
        self.steps += 1;
        self.refresh_progress();

        log::debug!(
            "Step {}: {} blocks, {} pages, {} tables, {} pairs, {}% done",
            self.steps,
            block_count,
            self.text_pages.len(),
            self.completed_tables.len(),
            self.completed_pairs.len(),
            self.progress.percent()
        );

        Ok(())
    }

    fn refresh_progress(&mut self) {
        let tables_page = self.completed_tables.iter().map(|t| t.page).max();
        let pairs_page = self.completed_pairs.iter().map(|p| p.page).max();
        self.progress = self.progress.update(
            self.page_count,
            self.text_pages.len() as u32,
            tables_page.unwrap_or(0),
            pairs_page.unwrap_or(0),
        );
    }

    /// Flush leftovers and group completed structures by page.
    pub fn finish(self) -> Result<Reassembly, StreamError> {
        if self.phase == Phase::Streaming {
            return Err(StreamError::StillStreaming);
        }

        let mut text_pages = self.text_pages;
        text_pages.extend(self.pages.finish());

        let mut faults = self.tables.finish();
        faults.extend(self.key_values.finish());
        for fault in &faults {
            log::warn!("Integrity fault: {}", fault);
        }

        let last_page = text_pages
            .iter()
            .map(|p| p.page)
            .chain(self.completed_tables.iter().map(|t| t.page))
            .chain(self.completed_pairs.iter().map(|p| p.page))
            .map(|page| page.max(1))
            .max()
            .unwrap_or(0);
        let len = self.page_count.max(last_page) as usize;

        let mut grouped_pages: Vec<Vec<RawBlock>> = vec![Vec::new(); len];
        for page in text_pages {
            grouped_pages[page_index(page.page)].extend(page.blocks);
        }

        Ok(Reassembly {
            text_pages: grouped_pages,
            tables: group_by_page(self.completed_tables, |t| t.page, len),
            key_value_pairs: group_by_page(self.completed_pairs, |p| p.page, len),
            progress: self.progress.complete().percent(),
            faults,
        })
    }
}

fn page_index(page: u32) -> usize {
    page.saturating_sub(1) as usize
}

fn group_by_page<T>(items: Vec<T>, page_of: impl Fn(&T) -> u32, len: usize) -> Vec<Vec<T>> {
    let mut grouped: Vec<Vec<T>> = (0..len).map(|_| Vec::new()).collect();
    for item in items {
        grouped[page_index(page_of(&item))].push(item);
    }
    grouped
}

/// Run a full, already fetched sequence of result pages through the reducers.
pub fn reassemble_pages(
    pages: impl IntoIterator<Item = ResultsPage>,
) -> Result<Reassembly, StreamError> {
    let mut state = StreamState::new();
    for page in pages {
        state.apply(page)?;
    }
    state.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::{BoundingBox, EntityType, RelationshipType, SelectionStatus};
    use crate::fault::{FaultKind, Structure};

    fn word(id: &str, page: u32, text: &str) -> RawBlock {
        RawBlock::new(id, BlockKind::Word)
            .with_page(page)
            .with_text(text)
    }

    fn line(id: &str, page: u32, text: &str, words: &[&str]) -> RawBlock {
        RawBlock::new(id, BlockKind::Line)
            .with_page(page)
            .with_text(text)
            .with_children(words.iter().copied())
    }

    /// Two pages: a denial letter header with a form on page 1 and a
    /// table of denied services on page 2.
    fn document() -> Vec<RawBlock> {
        vec![
            RawBlock::new("p-1", BlockKind::Page).with_page(1),
            line("l-1", 1, "Member ID A12345", &["w-1", "w-2", "w-3"]),
            word("w-1", 1, "Member"),
            word("w-2", 1, "ID"),
            word("w-3", 1, "A12345"),
            RawBlock::new("k-1", BlockKind::KeyValueSet)
                .with_page(1)
                .with_entity(EntityType::Key)
                .with_bounds(BoundingBox::new(0.1, 0.1, 0.15, 0.02))
                .with_relationship(RelationshipType::Value, ["v-1"])
                .with_children(["w-1", "w-2"]),
            RawBlock::new("v-1", BlockKind::KeyValueSet)
                .with_page(1)
                .with_entity(EntityType::Value)
                .with_bounds(BoundingBox::new(0.3, 0.1, 0.1, 0.02))
                .with_children(["w-3"]),
            RawBlock::new("k-2", BlockKind::KeyValueSet)
                .with_page(1)
                .with_entity(EntityType::Key)
                .with_relationship(RelationshipType::Value, ["v-2"])
                .with_children(["w-4"]),
            word("w-4", 1, "Expedited"),
            RawBlock::new("v-2", BlockKind::KeyValueSet)
                .with_page(1)
                .with_entity(EntityType::Value)
                .with_children(["s-1"]),
            RawBlock::new("s-1", BlockKind::SelectionElement)
                .with_page(1)
                .with_selection(SelectionStatus::NotSelected),
            RawBlock::new("p-2", BlockKind::Page).with_page(2),
            line("l-2", 2, "Denied services", &["w-5", "w-6"]),
            word("w-5", 2, "Denied"),
            word("w-6", 2, "services"),
            RawBlock::new("t-1", BlockKind::Table)
                .with_page(2)
                .with_children(["c-1", "c-2"])
                .with_relationship(RelationshipType::TableTitle, ["tt-1"]),
            RawBlock::new("tt-1", BlockKind::TableTitle)
                .with_page(2)
                .with_children(["w-5", "w-6"]),
            RawBlock::new("c-1", BlockKind::Cell)
                .with_page(2)
                .with_cell(1, 1)
                .with_children(["w-7"]),
            RawBlock::new("c-2", BlockKind::Cell)
                .with_page(2)
                .with_cell(1, 2)
                .with_children(["w-8"]),
            word("w-7", 2, "MRI"),
            word("w-8", 2, "Not medically necessary"),
        ]
    }

    fn split(blocks: Vec<RawBlock>, chunk: usize) -> Vec<ResultsPage> {
        let chunks: Vec<Vec<RawBlock>> = blocks.chunks(chunk).map(<[RawBlock]>::to_vec).collect();
        let last = chunks.len() - 1;
        chunks
            .into_iter()
            .enumerate()
            .map(|(i, blocks)| ResultsPage {
                blocks,
                next_token: (i < last).then(|| format!("token-{}", i + 1)),
                page_count: Some(2),
            })
            .collect()
    }

    fn sorted_by_id(mut result: Reassembly) -> Reassembly {
        for tables in &mut result.tables {
            tables.sort_by(|a, b| a.id.cmp(&b.id));
        }
        for pairs in &mut result.key_value_pairs {
            pairs.sort_by(|a, b| a.id.cmp(&b.id));
        }
        result
    }

    #[test]
    fn test_full_document_in_one_page() {
        let result = reassemble_pages(split(document(), usize::MAX)).unwrap();

        assert!(result.is_clean());
        assert_eq!(result.progress, 100);
        assert_eq!(result.page_count(), 2);
        assert_eq!(result.page_text(1).as_deref(), Some("Member ID A12345"));
        assert_eq!(result.page_text(2).as_deref(), Some("Denied services"));

        assert!(result.tables[0].is_empty());
        assert_eq!(result.tables[1].len(), 1);
        let table = &result.tables[1][0];
        assert_eq!(table.title.as_deref(), Some("Denied services"));
        let cells: Vec<&str> = table.cells.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(cells, vec!["MRI", "Not medically necessary"]);

        assert_eq!(result.key_value_pairs[0].len(), 2);
        assert!(result.key_value_pairs[1].is_empty());
        let pairs: Vec<(&str, &str)> = result.key_value_pairs[0]
            .iter()
            .map(|p| (p.key.as_str(), p.value.as_str()))
            .collect();
        assert_eq!(pairs, vec![("Member ID", "A12345"), ("Expedited", "FALSE")]);
    }

    #[test]
    fn test_batch_invariance() {
        let whole = reassemble_pages(split(document(), usize::MAX)).unwrap();

        for chunk in [1, 2, 3, 5, 8] {
            let chunked = reassemble_pages(split(document(), chunk)).unwrap();
            assert_eq!(chunked, whole, "chunk size {chunk}");
        }
    }

    #[test]
    fn test_invariant_under_reordered_structure_blocks() {
        let whole = reassemble_pages(split(document(), usize::MAX)).unwrap();

        // Keep page/line order, reverse everything else.
        let (ordered, mut rest): (Vec<RawBlock>, Vec<RawBlock>) = document()
            .into_iter()
            .partition(|b| matches!(b.kind, BlockKind::Page | BlockKind::Line));
        rest.reverse();
        let mut blocks = ordered;
        blocks.extend(rest);

        // Completion order follows arrival order, so compare per page by id.
        let reordered = sorted_by_id(reassemble_pages(split(blocks, 4)).unwrap());
        assert_eq!(reordered, sorted_by_id(whole));
    }

    #[test]
    fn test_page_numbers_form_a_prefix() {
        let result = reassemble_pages(split(document(), 3)).unwrap();
        let pages: Vec<u32> = result
            .text_pages
            .iter()
            .map(|blocks| blocks[0].page)
            .collect();
        assert_eq!(pages, vec![1, 2]);
    }

    #[test]
    fn test_orphaned_table_is_reported_not_emitted() {
        let blocks: Vec<RawBlock> = document().into_iter().filter(|b| b.id != "c-2").collect();
        let result = reassemble_pages(split(blocks, 4)).unwrap();

        assert_eq!(result.table_count(), 0);
        assert!(!result.is_clean());
        assert_eq!(
            result.faults,
            vec![IntegrityFault::new(
                Structure::Table,
                "t-1",
                "c-2",
                FaultKind::MissingChild
            )]
        );
    }

    #[test]
    fn test_groups_leave_gaps_for_empty_pages() {
        let page = ResultsPage {
            blocks: vec![
                RawBlock::new("p-1", BlockKind::Page).with_page(1),
                RawBlock::new("p-2", BlockKind::Page).with_page(2),
                RawBlock::new("t", BlockKind::Table).with_page(2),
                RawBlock::new("p-3", BlockKind::Page).with_page(3),
            ],
            next_token: None,
            page_count: Some(3),
        };

        let result = reassemble_pages([page]).unwrap();
        assert_eq!(result.tables.len(), 3);
        assert!(result.tables[0].is_empty());
        assert_eq!(result.tables[1].len(), 1);
        assert!(result.tables[2].is_empty());
        assert_eq!(result.key_value_pairs, vec![Vec::new(), Vec::new(), Vec::new()]);
    }

    #[test]
    fn test_progress_is_monotonic() {
        let mut state = StreamState::new();
        let mut seen = Vec::new();
        for page in split(document(), 3) {
            state.apply(page).unwrap();
            seen.push(state.progress().percent());
        }

        assert!(seen.windows(2).all(|w| w[0] <= w[1]), "{seen:?}");
        assert!(seen.iter().all(|p| *p <= 100));
    }

    #[test]
    fn test_state_transitions() {
        let mut state = StreamState::new().with_page_count(1);
        assert_eq!(state.phase(), Phase::Streaming);
        assert_eq!(state.next_token(), None);

        state
            .apply(ResultsPage {
                next_token: Some("abc".to_string()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(state.phase(), Phase::Streaming);
        assert_eq!(state.next_token(), Some("abc"));

        let pending = state.clone();
        assert_eq!(pending.finish(), Err(StreamError::StillStreaming));

        // An empty token ends the stream like a missing one.
        state
            .apply(ResultsPage {
                next_token: Some(String::new()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(state.phase(), Phase::Done);
        assert_eq!(state.steps(), 2);
        assert_eq!(
            state.apply(ResultsPage::default()),
            Err(StreamError::AlreadyDone)
        );
    }

    #[test]
    fn test_parse_wire_results_page() {
        let json = r#"{
            "JobStatus": "SUCCEEDED",
            "NextToken": "next-1",
            "DocumentMetadata": {"Pages": 7},
            "Blocks": [
                {"BlockType": "PAGE", "Id": "p-1", "Page": 1, "Confidence": 99.9},
                {"BlockType": "LINE", "Id": "l-1", "Page": 1, "Text": "Notice of Denial"}
            ]
        }"#;

        let page = ResultsPage::from_json(json).unwrap();
        assert_eq!(page.next_token.as_deref(), Some("next-1"));
        assert_eq!(page.page_count, Some(7));
        assert_eq!(page.blocks.len(), 2);
        assert_eq!(page.blocks[1].text.as_deref(), Some("Notice of Denial"));
    }

    #[test]
    fn test_demux_shares_leaves() {
        let demux = Demux::split(vec![
            RawBlock::new("p", BlockKind::Page),
            RawBlock::new("w", BlockKind::Word),
            RawBlock::new("c", BlockKind::Cell),
            RawBlock::new("k", BlockKind::KeyValueSet),
            RawBlock::new("x", BlockKind::Other),
        ]);

        assert_eq!(demux.pages.len(), 1);
        assert_eq!(demux.tables.len(), 2);
        assert_eq!(demux.key_values.len(), 2);
    }
}
