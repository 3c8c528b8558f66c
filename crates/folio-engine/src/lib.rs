//! # folio-engine
//!
//! Versioned block-tree storage for folio documents.
//!
//! A document is a tree of blocks rooted at one root block. Every edit
//! appends an immutable block version; documents advance through gapless
//! revisions that name a `{block → ver}` map. The engine:
//! - Serializes writers with `BEGIN IMMEDIATE` transactions and retries them
//! - Commits immediately or defers, counting pending ops per document
//! - Resolves any past revision through snapshots plus a clock-ordered overlay
//! - Reconstructs paginated trees live or at a revision
//! - Reverts forward-only, appending a new head

pub mod collab;
pub mod config;
pub mod coordinator;
pub mod db;
pub mod documents;
pub mod error;
pub mod events;
pub mod pending;
pub mod revisions;
pub mod tree;
pub mod versions;

pub use collab::{
    AccessDecision, AccessPolicy, Action, AllowAll, InMemoryTags, ReadOnlyExcept, TagError,
    TagRegistry, authorize,
};
pub use config::EngineConfig;
pub use coordinator::{
    BatchOp, BatchOutcome, CommitMode, Engine, MutationOutcome, OpOutcome, TreeDiff,
};
pub use db::Database;
pub use error::{EngineError, ErrorKind, Result};
pub use events::{ActivityAction, ActivityEvent, ActivitySink, BroadcastSink, EntityType, NullSink};
pub use pending::PendingVersions;
pub use revisions::RevertStats;
pub use tree::{TreeNode, TreePage, TreeQuery};
pub use versions::{MoveTo, NewBlock, Placement};
