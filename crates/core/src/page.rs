//! Page reducer
//!
//! Groups `PAGE`/`LINE` blocks into one ordered block list per logical page.
//! A page is sealed the moment the next `PAGE` marker shows up; whatever is
//! pending when the stream ends is flushed by [`PageReducer::finish`].

use serde::Serialize;

use crate::block::{BlockKind, RawBlock};

/// Ordered blocks of one logical page, starting with its `PAGE` marker.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PageAggregate {
    pub page: u32,
    pub blocks: Vec<RawBlock>,
}

impl PageAggregate {
    fn seal(blocks: Vec<RawBlock>) -> Self {
        let page = blocks.first().map(|b| b.page).unwrap_or(1);
        Self { page, blocks }
    }

    /// Text of the page's lines, one per line.
    pub fn text(&self) -> String {
        self.blocks
            .iter()
            .filter(|b| b.kind == BlockKind::Line)
            .filter_map(|b| b.text.as_deref())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageReducer {
    leftover: Vec<RawBlock>,
}

impl PageReducer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold a batch of `PAGE`/`LINE` blocks, returning the pages it sealed.
    pub fn reduce(mut self, blocks: Vec<RawBlock>) -> (Self, Vec<PageAggregate>) {
        let mut completed = Vec::new();

        for block in blocks {
            if block.kind == BlockKind::Page && !self.leftover.is_empty() {
                completed.push(PageAggregate::seal(std::mem::take(&mut self.leftover)));
            }
            self.leftover.push(block);
        }

        (self, completed)
    }

    /// Seal the partially built page, if any.
    pub fn finish(self) -> Option<PageAggregate> {
        if self.leftover.is_empty() {
            None
        } else {
            Some(PageAggregate::seal(self.leftover))
        }
    }

    /// Blocks accumulated since the last sealed page.
    pub fn pending(&self) -> &[RawBlock] {
        &self.leftover
    }
}
