//! Progress estimate for a reassembly job.
//!
//! Each page is processed once per reducer, so the total unit count is
//! `page_count * 3`. Completed pages count one unit each; tables and
//! key-value pairs count up to the highest page they have completed on.

use serde::Serialize;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Progress {
    pub page_count: u32,
    /// Text pages sealed so far.
    pub pages: u32,
    /// Highest page among completed tables.
    pub tables_page: u32,
    /// Highest page among completed key-value pairs.
    pub key_values_page: u32,
    percent: u8,
}

impl Progress {
    /// Integer percentage in 0..=100.
    pub fn percent(&self) -> u8 {
        self.percent
    }

    /// Fold new observations in. Every field, and the percentage, only
    /// ever moves forward.
    pub fn update(
        self,
        page_count: u32,
        pages: u32,
        tables_page: u32,
        key_values_page: u32,
    ) -> Self {
        let mut next = Self {
            page_count: self.page_count.max(page_count),
            pages: self.pages.max(pages),
            tables_page: self.tables_page.max(tables_page),
            key_values_page: self.key_values_page.max(key_values_page),
            percent: 0,
        };
        next.percent = self.percent.max(next.estimate());
        next
    }

    pub fn complete(self) -> Self {
        Self {
            percent: 100,
            ..self
        }
    }

    fn estimate(&self) -> u8 {
        if self.page_count == 0 {
            return 0;
        }
        let done = u64::from(self.pages)
            + u64::from(self.tables_page)
            + u64::from(self.key_values_page);
        let total = u64::from(self.page_count) * 3;
        (done * 100 / total).min(100) as u8
    }
}
