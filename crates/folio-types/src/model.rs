//! Record types for documents, blocks, versions, revisions, and snapshots.
//!
//! These are plain data; the engine owns all invariants. Clock values are
//! the engine's logical clock (monotonic integer shared by versions and
//! revisions); `*_ms` fields are wall-clock milliseconds for display only.

use std::collections::BTreeMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use strum::EnumString;

use crate::ids::{BlockId, DocumentId, PrincipalId, WorkspaceId};
use crate::payload::Payload;
use crate::sort_key::SortKey;

/// Exact version of every live block at one revision.
pub type VersionMap = BTreeMap<BlockId, u64>;

/// Block type tag given to a document's root block.
pub const ROOT_BLOCK_TYPE: &str = "root";

/// Document lifecycle state. Deletion is soft.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(ascii_case_insensitive)]
pub enum DocStatus {
    Draft,
    #[default]
    Normal,
    Archived,
    Deleted,
}

impl DocStatus {
    /// Parse from string (case-insensitive).
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        <Self as FromStr>::from_str(s).ok()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DocStatus::Draft => "draft",
            DocStatus::Normal => "normal",
            DocStatus::Archived => "archived",
            DocStatus::Deleted => "deleted",
        }
    }
}

impl std::fmt::Display for DocStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One knowledge unit: a root block plus its revision history.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,
    pub workspace_id: WorkspaceId,
    pub title: String,
    /// Current head revision. Starts at 1.
    pub head: u64,
    /// Last published revision, 0 if never published.
    pub published_head: u64,
    pub root_block_id: BlockId,
    pub status: DocStatus,
    pub tags: Vec<String>,
    pub created_by: PrincipalId,
    pub created_at_ms: u64,
    pub updated_at_ms: u64,
}

/// The mutable pointer record of a block.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub id: BlockId,
    pub doc_id: DocumentId,
    pub block_type: String,
    /// Current version number (≥ 1).
    pub latest_ver: u64,
    /// Clock of the current version.
    pub latest_at: u64,
    pub latest_by: PrincipalId,
    pub deleted: bool,
    pub deleted_at: Option<u64>,
    pub deleted_by: Option<PrincipalId>,
}

/// Immutable snapshot of one block at one point in time.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BlockVersion {
    pub block_id: BlockId,
    pub doc_id: DocumentId,
    pub ver: u64,
    pub clock: u64,
    pub created_at_ms: u64,
    pub author: PrincipalId,
    /// `None` only for the root block.
    pub parent_id: Option<BlockId>,
    pub sort_key: SortKey,
    pub indent: u32,
    pub collapsed: bool,
    pub payload: Payload,
    pub content_hash: String,
    pub plain_text: String,
    pub refs: Vec<String>,
    /// Tombstone marker: this version records the block's deletion.
    pub deleted: bool,
}

/// One committed step of a document's history.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DocRevision {
    pub doc_id: DocumentId,
    pub doc_ver: u64,
    pub clock: u64,
    pub created_at_ms: u64,
    pub author: PrincipalId,
    pub message: Option<String>,
    /// Informational only, never replayed.
    pub op_summary: serde_json::Value,
}

/// Materialized `{block → ver}` checkpoint at one revision.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DocSnapshot {
    pub doc_id: DocumentId,
    pub doc_ver: u64,
    pub clock: u64,
    pub created_at_ms: u64,
    pub versions: VersionMap,
}

/// Offset pagination for history listings.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub offset: u64,
    pub limit: u64,
}

impl Page {
    pub fn first(limit: u64) -> Self {
        Self { offset: 0, limit }
    }

    pub fn next(&self) -> Self {
        Self {
            offset: self.offset + self.limit,
            limit: self.limit,
        }
    }
}
