//! Core library for ocrstream
//!
//! This crate implements the **Functional Core** of the ocrstream application:
//! it turns the flat, paginated block stream of an asynchronous document
//! analysis job back into pages, tables and key-value pairs.
//!
//! # Architecture Overview
//!
//! - **`ocrstream_core`** (this crate): block model, reducers and the
//!   pagination state machine, with zero I/O
//! - **`ocrstream`**: the analysis service client, job polling and the CLI
//!   (the Imperative Shell)
//!
//! The shell fetches result pages and hands them to [`stream::StreamState`];
//! everything it gets back is plain data.
//!
//! # Module Organization
//!
//! - [`block`]: wire block model and bounding boxes
//! - [`pool`]: working pool of unclaimed blocks with consumption tombstones
//! - [`resolve`]: text and value resolution over a block's descendants
//! - [`page`], [`table`], [`key_value`]: the three reducers
//! - [`fault`]: integrity faults raised by the reducers
//! - [`progress`]: monotonic progress estimate
//! - [`stream`]: demultiplexing and the pagination state machine
//!
//! # Example Usage
//!
//! ```rust,ignore
//! use ocrstream_core::stream::{reassemble_pages, ResultsPage};
//!
//! let pages = vec![ResultsPage::from_json(&body)?];
//! let result = reassemble_pages(pages)?;
//!
//! for table in result.tables.iter().flatten() {
//!     println!("{} cells on page {}", table.cells.len(), table.page);
//! }
//! ```

pub mod block;
pub mod fault;
pub mod key_value;
pub mod page;
pub mod pool;
pub mod progress;
pub mod resolve;
pub mod stream;
pub mod table;

pub use block::{BlockId, BlockKind, BoundingBox, RawBlock};
pub use fault::{FaultKind, IntegrityFault, Structure};
pub use key_value::{KeyValueAggregate, KeyValueReducer};
pub use page::{PageAggregate, PageReducer};
pub use progress::Progress;
pub use stream::{reassemble_pages, Phase, Reassembly, ResultsPage, StreamError, StreamState};
pub use table::{TableAggregate, TableCell, TableReducer};
