//! Integrity faults
//!
//! Every declared child is guaranteed to arrive before the stream ends, and
//! every child is expected to be of a kind its parent can hold. When either
//! guarantee is broken the reducers report an [`IntegrityFault`] instead of
//! dropping or coercing data, so callers can tell "no table on this page"
//! apart from "a table failed to resolve".

use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::block::{BlockId, BlockKind};

/// Which reducer produced the fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Structure {
    Table,
    KeyValue,
}

impl fmt::Display for Structure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Structure::Table => write!(f, "table"),
            Structure::KeyValue => write!(f, "key-value pair"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FaultKind {
    #[error("declared child never arrived")]
    MissingChild,
    #[error("child has unexpected block type {found:?}")]
    UnexpectedChild { found: BlockKind },
    #[error("relationship graph deeper than {limit} levels")]
    DepthExceeded { limit: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Error)]
#[error("{structure} {aggregate_id}, child {child_id}: {kind}")]
pub struct IntegrityFault {
    pub structure: Structure,
    pub aggregate_id: BlockId,
    pub child_id: BlockId,
    pub kind: FaultKind,
}

impl IntegrityFault {
    pub fn new(
        structure: Structure,
        aggregate_id: impl Into<BlockId>,
        child_id: impl Into<BlockId>,
        kind: FaultKind,
    ) -> Self {
        Self {
            structure,
            aggregate_id: aggregate_id.into(),
            child_id: child_id.into(),
            kind,
        }
    }
}
