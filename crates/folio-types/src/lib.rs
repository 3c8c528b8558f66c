//! Identifiers, ordering keys, and record types for folio.
//!
//! This crate is the leaf of the workspace: typed ids, fractional sort keys,
//! opaque payloads, and the plain records the engine persists. It has **no
//! internal folio dependencies**.
//!
//! # Entity-Relationship Overview
//!
//! ```text
//! Document (DocumentId)
//!     └── owns exactly one root Block
//!     └── head: DocRevision 1..=head, gapless
//!     └── optional DocSnapshot checkpoints
//!
//! Block (BlockId) ← pointer record: latest_ver, soft-delete flag
//!     └── BlockVersion 1..=latest_ver, write-once
//!         └── parent_id + sort_key place the block in the tree
//! ```
//!
//! |-------------------|----------------------------------------------|
//! | Type              | Purpose                                      |
//! |-------------------|----------------------------------------------|
//! | [`DocumentId`]    | Which document                               |
//! | [`BlockId`]       | Which block                                  |
//! | [`PrincipalId`]   | Who authored a change                        |
//! | [`WorkspaceId`]   | Which workspace owns a document              |
//! | [`SortKey`]       | Numeric position among siblings              |
//! | [`Payload`]       | Opaque block content                         |
//! | [`BlockVersion`]  | Immutable block state at one version         |
//! | [`DocRevision`]   | One committed step in a document's history   |
//! | [`VersionMap`]    | `{block → ver}` at one revision              |
//! |-------------------|----------------------------------------------|

pub mod ids;
pub mod model;
pub mod payload;
pub mod sort_key;

pub use ids::{
    BlockId, DocumentId, IdError, IdKind, PrincipalId, WorkspaceId, new_id, revision_id,
    version_id,
};
pub use model::{
    Block, BlockVersion, DocRevision, DocSnapshot, DocStatus, Document, Page, ROOT_BLOCK_TYPE,
    VersionMap,
};
pub use payload::Payload;
pub use sort_key::{SortKey, SortKeyError, sibling_order};

/// Current time as Unix milliseconds.
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
