//! Mutation coordinator: the transactional façade over the engine.
//!
//! Every public mutation runs as one `BEGIN IMMEDIATE` transaction, retried
//! as a whole on busy/locked storage and unique-key races. Taking the write
//! lock at transaction start serializes writers, so a second writer on the
//! same block always re-reads the advanced pointer before computing its own
//! version number.
//!
//! Commit policy per call:
//! - [`CommitMode::Immediate`] appends one revision in the same transaction
//!   and absorbs the document's pending counter.
//! - [`CommitMode::Deferred`] leaves the head alone and bumps the pending
//!   counter after commit; [`Engine::commit_pending`] flushes it later.

use std::path::Path;
use std::sync::Arc;

use folio_types::{
    Block, BlockId, BlockVersion, DocRevision, DocSnapshot, DocStatus, Document, DocumentId, Page,
    Payload, PrincipalId, VersionMap, WorkspaceId,
};
use rusqlite::{Connection, TransactionBehavior};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::collab::TagRegistry;
use crate::config::EngineConfig;
use crate::db::{self, Database};
use crate::documents;
use crate::error::{EngineError, Result};
use crate::events::{ActivityAction, ActivityEvent, ActivitySink, EntityType, NullSink};
use crate::pending::PendingVersions;
use crate::revisions::{self, RevertStats};
use crate::tree::{self, TreePage, TreeQuery};
use crate::versions::{self, MoveTo, NewBlock};

/// Whether a mutation appends a revision right away.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitMode {
    #[default]
    Immediate,
    Deferred,
}

/// Result of a single-block mutation.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationOutcome {
    /// The block's current version after the call.
    pub version: BlockVersion,
    /// `false` for idempotent no-ops (identical content, unchanged flag).
    pub changed: bool,
    /// Revision committed by this call, if any.
    pub revision: Option<DocRevision>,
}

/// One entry of a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "op")]
pub enum BatchOp {
    Create(NewBlock),
    Update { block_id: BlockId, payload: Payload },
    Move { block_id: BlockId, to: MoveTo },
    Delete { block_id: BlockId },
}

#[derive(Debug)]
pub enum OpOutcome {
    Applied {
        index: usize,
        version: BlockVersion,
        changed: bool,
    },
    Failed {
        index: usize,
        error: EngineError,
    },
}

impl OpOutcome {
    pub fn index(&self) -> usize {
        match self {
            OpOutcome::Applied { index, .. } | OpOutcome::Failed { index, .. } => *index,
        }
    }

    pub fn is_applied(&self) -> bool {
        matches!(self, OpOutcome::Applied { .. })
    }

    fn changed(&self) -> bool {
        matches!(self, OpOutcome::Applied { changed: true, .. })
    }
}

#[derive(Debug)]
pub struct BatchOutcome {
    pub results: Vec<OpOutcome>,
    /// At most one revision for the whole batch.
    pub revision: Option<DocRevision>,
}

/// Both sides of a revision diff, for external comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeDiff {
    pub from: TreePage,
    pub to: TreePage,
}

/// What a single-block mutation did inside its transaction.
struct Applied {
    doc: Document,
    version: BlockVersion,
    changed: bool,
    summary: serde_json::Value,
}

/// The engine façade.
pub struct Engine {
    db: Database,
    config: EngineConfig,
    pending: Arc<PendingVersions>,
    sink: Arc<dyn ActivitySink>,
}

impl Engine {
    pub fn new(db: Database, config: EngineConfig) -> Self {
        Self {
            db,
            config,
            pending: Arc::new(PendingVersions::new()),
            sink: Arc::new(NullSink),
        }
    }

    /// Open or create a database file.
    pub fn open<P: AsRef<Path>>(path: P, config: EngineConfig) -> Result<Self> {
        let db = Database::open(path, &config.storage)?;
        Ok(Self::new(db, config))
    }

    /// In-memory engine (for testing).
    pub fn in_memory(config: EngineConfig) -> Result<Self> {
        Ok(Self::new(Database::in_memory()?, config))
    }

    pub fn with_sink(mut self, sink: Arc<dyn ActivitySink>) -> Self {
        self.sink = sink;
        self
    }

    /// Share pending counters with other engine handles on the same database.
    pub fn with_pending(mut self, pending: Arc<PendingVersions>) -> Self {
        self.pending = pending;
        self
    }

    pub fn pending(&self) -> &Arc<PendingVersions> {
        &self.pending
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Start the periodic stale-counter sweep on the current tokio runtime.
    pub fn spawn_pending_sweeper(&self) -> JoinHandle<()> {
        self.pending.spawn_sweeper(
            self.config.pending.sweep_interval(),
            self.config.pending.stale_after(),
        )
    }

    // ========================================================================
    // Transactions
    // ========================================================================

    /// Run `f` in a write transaction, retrying the whole closure on
    /// retryable failures with exponential backoff.
    fn write<T>(&self, op: &'static str, mut f: impl FnMut(&Connection) -> Result<T>) -> Result<T> {
        let retry = &self.config.retry;
        let max_attempts = retry.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.try_write(&mut f) {
                Ok(out) => return Ok(out),
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    let delay = retry.backoff(attempt);
                    warn!(op, attempt, ?delay, error = %e, "retrying transaction");
                    std::thread::sleep(delay);
                }
                Err(e) if e.is_retryable() => {
                    warn!(op, attempt, error = %e, "retries exhausted");
                    return Err(e.exhausted(attempt));
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn try_write<T>(&self, f: &mut impl FnMut(&Connection) -> Result<T>) -> Result<T> {
        let mut conn = self.db.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }

    /// Run `f` in a read transaction (one consistent view).
    fn read<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let mut conn = self.db.conn()?;
        let tx = conn.transaction()?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }

    /// Commit a revision if the mode asks for one. Returns the revision and
    /// the pending count it absorbed.
    fn finish(
        &self,
        conn: &Connection,
        doc: &Document,
        author: PrincipalId,
        mode: CommitMode,
        message: Option<String>,
        mut summary: serde_json::Value,
    ) -> Result<(Option<DocRevision>, u64)> {
        match mode {
            CommitMode::Deferred => Ok((None, 0)),
            CommitMode::Immediate => {
                let absorbed = self.pending.count(doc.id);
                if absorbed > 0 {
                    if let Some(obj) = summary.as_object_mut() {
                        obj.insert("absorbedPending".into(), json!(absorbed));
                    }
                }
                let rev = revisions::commit_revision(
                    conn,
                    doc.id,
                    author,
                    message,
                    summary,
                    self.config.snapshot.interval,
                )?;
                Ok((Some(rev), absorbed))
            }
        }
    }

    fn settle(&self, doc_id: DocumentId, mode: CommitMode, ops: u64, absorbed: u64) {
        self.pending.absorb(doc_id, absorbed);
        if mode == CommitMode::Deferred {
            self.pending.record(doc_id, ops);
        }
    }

    fn emit(&self, doc: &Document, action: ActivityAction, entity: EntityType, id: String, actor: PrincipalId, details: serde_json::Value) {
        self.sink.record(ActivityEvent::new(doc.workspace_id, action, entity, id, actor, details));
    }

    /// Shared path of every single-block mutation.
    fn mutate(
        &self,
        op: &'static str,
        action: ActivityAction,
        author: PrincipalId,
        mode: CommitMode,
        mut apply: impl FnMut(&Connection) -> Result<Applied>,
    ) -> Result<MutationOutcome> {
        let (applied, revision, absorbed) = self.write(op, |conn| {
            let applied = apply(conn)?;
            let (revision, absorbed) = if applied.changed {
                self.finish(conn, &applied.doc, author, mode, None, applied.summary.clone())?
            } else {
                (None, 0)
            };
            Ok((applied, revision, absorbed))
        })?;

        if applied.changed {
            self.settle(applied.doc.id, mode, 1, absorbed);
            self.emit(
                &applied.doc,
                action,
                EntityType::Block,
                applied.version.block_id.to_prefixed(),
                author,
                json!({
                    "docId": applied.doc.id,
                    "ver": applied.version.ver,
                    "docVer": revision.as_ref().map(|r| r.doc_ver),
                }),
            );
        }
        Ok(MutationOutcome {
            version: applied.version,
            changed: applied.changed,
            revision,
        })
    }

    // ========================================================================
    // Documents
    // ========================================================================

    /// Create a document with its root block and revision 1.
    #[tracing::instrument(skip_all, name = "mutation.create_document", fields(workspace = %workspace_id))]
    pub fn create_document(
        &self,
        workspace_id: WorkspaceId,
        title: &str,
        root_payload: Payload,
        author: PrincipalId,
    ) -> Result<Document> {
        let (doc, _) = self.write("create_document", |conn| {
            documents::create(conn, workspace_id, title, author, root_payload.clone(), &[])
        })?;
        self.emit(
            &doc,
            ActivityAction::DocumentCreated,
            EntityType::Document,
            doc.id.to_prefixed(),
            author,
            json!({ "title": doc.title, "rootBlockId": doc.root_block_id }),
        );
        Ok(doc)
    }

    #[tracing::instrument(skip(self), name = "store.get_document")]
    pub fn get_document(&self, doc_id: DocumentId) -> Result<Document> {
        self.read(|conn| documents::load_live(conn, doc_id))
    }

    #[tracing::instrument(skip(self), name = "store.list_documents")]
    pub fn list_documents(&self, workspace_id: WorkspaceId) -> Result<Vec<Document>> {
        self.read(|conn| db::select_documents(conn, workspace_id))
    }

    #[tracing::instrument(skip(self), name = "mutation.set_status")]
    pub fn set_status(&self, doc_id: DocumentId, status: DocStatus, author: PrincipalId) -> Result<Document> {
        let doc = self.write("set_status", |conn| documents::set_status(conn, doc_id, status))?;
        self.emit(
            &doc,
            ActivityAction::StatusChanged,
            EntityType::Document,
            doc.id.to_prefixed(),
            author,
            json!({ "status": status }),
        );
        Ok(doc)
    }

    #[tracing::instrument(skip(self), name = "mutation.publish")]
    pub fn publish(&self, doc_id: DocumentId, author: PrincipalId) -> Result<Document> {
        let doc = self.write("publish", |conn| documents::publish(conn, doc_id))?;
        self.emit(
            &doc,
            ActivityAction::DocumentPublished,
            EntityType::Document,
            doc.id.to_prefixed(),
            author,
            json!({ "publishedHead": doc.published_head }),
        );
        Ok(doc)
    }

    /// Replace a document's tags after the registry validates them. Usage
    /// counters are adjusted once the change is committed.
    #[tracing::instrument(skip(self, tags, registry), name = "mutation.set_tags")]
    pub fn set_tags(
        &self,
        doc_id: DocumentId,
        tags: &[String],
        registry: &dyn TagRegistry,
        author: PrincipalId,
    ) -> Result<Document> {
        let doc = self.get_document(doc_id)?;
        registry.validate(doc.workspace_id, tags)?;
        let (added, removed) = self.write("set_tags", |conn| documents::set_tags(conn, doc_id, tags))?;
        registry.adjust_usage(doc.workspace_id, &added, &removed);
        let doc = self.get_document(doc_id)?;
        self.emit(
            &doc,
            ActivityAction::TagsChanged,
            EntityType::Document,
            doc.id.to_prefixed(),
            author,
            json!({ "added": added, "removed": removed }),
        );
        Ok(doc)
    }

    // ========================================================================
    // Block mutations
    // ========================================================================

    #[tracing::instrument(skip(self, new, author), name = "mutation.create_block", fields(parent = %new.parent_id))]
    pub fn create_block(
        &self,
        doc_id: DocumentId,
        new: NewBlock,
        author: PrincipalId,
        mode: CommitMode,
    ) -> Result<MutationOutcome> {
        self.mutate("create_block", ActivityAction::BlockCreated, author, mode, |conn| {
            let doc = documents::load_live(conn, doc_id)?;
            let version = versions::create_block(conn, &doc, &new, author)?;
            let summary = json!({ "op": "create", "blockId": version.block_id, "type": new.block_type });
            Ok(Applied {
                doc,
                version,
                changed: true,
                summary,
            })
        })
    }

    /// Replace a block's payload. Identical content returns the current
    /// version with `changed == false` and commits nothing.
    #[tracing::instrument(skip(self, payload, author), name = "mutation.update_block")]
    pub fn update_block(
        &self,
        block_id: BlockId,
        payload: Payload,
        author: PrincipalId,
        mode: CommitMode,
    ) -> Result<MutationOutcome> {
        self.mutate("update_block", ActivityAction::BlockUpdated, author, mode, |conn| {
            let doc = self.block_document(conn, block_id)?;
            let (version, changed) = versions::update_content(conn, block_id, &payload, author)?;
            Ok(Applied {
                doc,
                summary: json!({ "op": "update", "blockId": block_id, "ver": version.ver }),
                version,
                changed,
            })
        })
    }

    #[tracing::instrument(skip(self, to, author), name = "mutation.move_block", fields(parent = %to.parent_id))]
    pub fn move_block(
        &self,
        block_id: BlockId,
        to: MoveTo,
        author: PrincipalId,
        mode: CommitMode,
    ) -> Result<MutationOutcome> {
        self.mutate("move_block", ActivityAction::BlockMoved, author, mode, |conn| {
            let doc = self.block_document(conn, block_id)?;
            let version = versions::move_block(conn, &doc, block_id, &to, author)?;
            Ok(Applied {
                doc,
                summary: json!({ "op": "move", "blockId": block_id, "parentId": to.parent_id }),
                version,
                changed: true,
            })
        })
    }

    #[tracing::instrument(skip(self, author), name = "mutation.set_collapsed")]
    pub fn set_collapsed(
        &self,
        block_id: BlockId,
        collapsed: bool,
        author: PrincipalId,
        mode: CommitMode,
    ) -> Result<MutationOutcome> {
        self.mutate("set_collapsed", ActivityAction::BlockUpdated, author, mode, |conn| {
            let doc = self.block_document(conn, block_id)?;
            let (version, changed) = versions::set_collapsed(conn, block_id, collapsed, author)?;
            Ok(Applied {
                doc,
                summary: json!({ "op": "collapse", "blockId": block_id, "collapsed": collapsed }),
                version,
                changed,
            })
        })
    }

    /// Soft-delete a block. Descendants are not cascaded.
    #[tracing::instrument(skip(self, author), name = "mutation.delete_block")]
    pub fn delete_block(&self, block_id: BlockId, author: PrincipalId, mode: CommitMode) -> Result<MutationOutcome> {
        self.mutate("delete_block", ActivityAction::BlockDeleted, author, mode, |conn| {
            let doc = self.block_document(conn, block_id)?;
            let version = versions::delete_block(conn, block_id, author)?;
            Ok(Applied {
                doc,
                summary: json!({ "op": "delete", "blockId": block_id }),
                version,
                changed: true,
            })
        })
    }

    #[tracing::instrument(skip(self, author), name = "mutation.restore_block")]
    pub fn restore_block(&self, block_id: BlockId, author: PrincipalId, mode: CommitMode) -> Result<MutationOutcome> {
        self.mutate("restore_block", ActivityAction::BlockRestored, author, mode, |conn| {
            let block = db::select_block(conn, block_id)?.ok_or(EngineError::BlockNotFound(block_id))?;
            let doc = documents::load_live(conn, block.doc_id)?;
            let (version, changed) = versions::restore_block(conn, block_id, author)?;
            Ok(Applied {
                doc,
                summary: json!({ "op": "restore", "blockId": block_id }),
                version,
                changed,
            })
        })
    }

    /// Owning document of a live block, which must itself be live.
    fn block_document(&self, conn: &Connection, block_id: BlockId) -> Result<Document> {
        let (block, _) = versions::load_live(conn, block_id)?;
        documents::load_live(conn, block.doc_id)
    }

    /// Apply heterogeneous operations in one transaction. Each operation runs
    /// in its own savepoint: a failure rolls back only that entry and is
    /// reported in place. At most one revision covers the batch.
    #[tracing::instrument(skip(self, ops, author), name = "mutation.batch", fields(ops = ops.len()))]
    pub fn batch(
        &self,
        doc_id: DocumentId,
        ops: &[BatchOp],
        author: PrincipalId,
        mode: CommitMode,
    ) -> Result<BatchOutcome> {
        let (doc, results, revision, absorbed) = self.write("batch", |conn| {
            let doc = documents::load_live(conn, doc_id)?;
            let mut results = Vec::with_capacity(ops.len());
            for (index, op) in ops.iter().enumerate() {
                conn.execute_batch("SAVEPOINT batch_op")?;
                match apply_op(conn, &doc, op, author) {
                    Ok((version, changed)) => {
                        conn.execute_batch("RELEASE batch_op")?;
                        results.push(OpOutcome::Applied {
                            index,
                            version,
                            changed,
                        });
                    }
                    Err(e) if e.is_retryable() => return Err(e),
                    Err(error) => {
                        conn.execute_batch("ROLLBACK TO batch_op; RELEASE batch_op")?;
                        tracing::debug!(index, %error, "batch entry failed");
                        results.push(OpOutcome::Failed { index, error });
                    }
                }
            }
            let changed = results.iter().filter(|r| r.changed()).count();
            let failed = results.iter().filter(|r| !r.is_applied()).count();
            let (revision, absorbed) = if changed > 0 {
                let summary = json!({ "op": "batch", "applied": changed, "failed": failed });
                self.finish(conn, &doc, author, mode, None, summary)?
            } else {
                (None, 0)
            };
            Ok((doc, results, revision, absorbed))
        })?;

        let changed = results.iter().filter(|r| r.changed()).count() as u64;
        if changed > 0 {
            self.settle(doc.id, mode, changed, absorbed);
        }
        let failed = results.iter().filter(|r| !r.is_applied()).count();
        self.emit(
            &doc,
            ActivityAction::BatchApplied,
            EntityType::Document,
            doc.id.to_prefixed(),
            author,
            json!({
                "applied": changed,
                "failed": failed,
                "docVer": revision.as_ref().map(|r| r.doc_ver),
            }),
        );
        Ok(BatchOutcome { results, revision })
    }

    /// Flush the document's pending counter into one revision. `None` when
    /// nothing is pending.
    #[tracing::instrument(skip(self, author, message), name = "revision.commit_pending")]
    pub fn commit_pending(
        &self,
        doc_id: DocumentId,
        author: PrincipalId,
        message: Option<String>,
    ) -> Result<Option<DocRevision>> {
        let count = self.pending.count(doc_id);
        if count == 0 {
            return Ok(None);
        }
        let (doc, rev) = self.write("commit_pending", |conn| {
            let doc = documents::load_live(conn, doc_id)?;
            let rev = revisions::commit_revision(
                conn,
                doc_id,
                author,
                message.clone(),
                json!({ "op": "flush", "pendingOps": count }),
                self.config.snapshot.interval,
            )?;
            Ok((doc, rev))
        })?;
        self.pending.absorb(doc_id, count);
        self.emit(
            &doc,
            ActivityAction::RevisionCommitted,
            EntityType::Document,
            doc.id.to_prefixed(),
            author,
            json!({ "docVer": rev.doc_ver, "pendingOps": count }),
        );
        Ok(Some(rev))
    }

    // ========================================================================
    // Revisions & snapshots
    // ========================================================================

    #[tracing::instrument(skip(self), name = "store.get_block")]
    pub fn get_block(&self, block_id: BlockId) -> Result<(Block, BlockVersion)> {
        self.read(|conn| versions::load_live(conn, block_id))
    }

    /// Versions newest first. `None` uses the configured page size.
    #[tracing::instrument(skip(self), name = "store.version_history")]
    pub fn version_history(&self, block_id: BlockId, page: Option<Page>) -> Result<Vec<BlockVersion>> {
        let page = page.unwrap_or(Page::first(self.config.history.page_size));
        self.read(|conn| versions::history(conn, block_id, page))
    }

    #[tracing::instrument(skip(self), name = "revision.list")]
    pub fn list_revisions(&self, doc_id: DocumentId, page: Option<Page>) -> Result<Vec<DocRevision>> {
        let page = page.unwrap_or(Page::first(self.config.history.page_size));
        self.read(|conn| {
            documents::load_live(conn, doc_id)?;
            revisions::list_revisions(conn, doc_id, page)
        })
    }

    #[tracing::instrument(skip(self), name = "revision.get")]
    pub fn get_revision(&self, doc_id: DocumentId, doc_ver: u64) -> Result<DocRevision> {
        self.read(|conn| revisions::get_revision(conn, doc_id, doc_ver))
    }

    #[tracing::instrument(skip(self), name = "revision.resolve")]
    pub fn resolve_version_map_at(&self, doc_id: DocumentId, doc_ver: u64) -> Result<VersionMap> {
        self.read(|conn| {
            let doc = documents::load_live(conn, doc_id)?;
            revisions::resolve_version_map_at(conn, &doc, doc_ver)
        })
    }

    /// Live pointers, including deferred versions not yet in a revision.
    pub fn current_version_map(&self, doc_id: DocumentId) -> Result<VersionMap> {
        self.read(|conn| {
            let doc = documents::load_live(conn, doc_id)?;
            revisions::current_version_map(conn, &doc)
        })
    }

    #[tracing::instrument(skip(self), name = "revision.snapshot")]
    pub fn create_snapshot(&self, doc_id: DocumentId) -> Result<DocSnapshot> {
        let (doc, snap, created) = self.write("create_snapshot", |conn| {
            let doc = documents::load_live(conn, doc_id)?;
            let (snap, created) = revisions::create_snapshot(conn, &doc)?;
            Ok((doc, snap, created))
        })?;
        if created {
            self.emit(
                &doc,
                ActivityAction::SnapshotCreated,
                EntityType::Document,
                doc.id.to_prefixed(),
                PrincipalId::system(),
                json!({ "docVer": snap.doc_ver, "blocks": snap.versions.len() }),
            );
        }
        Ok(snap)
    }

    /// Revert to `target` by appending a new head revision.
    #[tracing::instrument(skip(self, author), name = "revision.revert")]
    pub fn revert(&self, doc_id: DocumentId, target: u64, author: PrincipalId) -> Result<(Document, RevertStats)> {
        let (doc, stats, absorbed) = self.write("revert", |conn| {
            let doc = documents::load_live(conn, doc_id)?;
            let absorbed = self.pending.count(doc_id);
            let (_, stats) = revisions::revert(conn, &doc, target, author, self.config.snapshot.interval)?;
            let doc = documents::load_live(conn, doc_id)?;
            Ok((doc, stats, absorbed))
        })?;
        self.pending.absorb(doc_id, absorbed);
        self.emit(
            &doc,
            ActivityAction::DocumentReverted,
            EntityType::Document,
            doc.id.to_prefixed(),
            author,
            json!({ "revertedFrom": target, "docVer": doc.head, "stats": stats }),
        );
        Ok((doc, stats))
    }

    // ========================================================================
    // Trees
    // ========================================================================

    /// One page of the tree, live (`at == None`) or at a revision.
    #[tracing::instrument(skip(self, query), name = "tree.reconstruct")]
    pub fn tree(&self, doc_id: DocumentId, at: Option<u64>, query: &TreeQuery) -> Result<TreePage> {
        let mut query = query.clone();
        if query.limit.is_none() {
            query.limit = self.config.tree.default_limit;
        }
        let ceiling = self.config.tree.max_depth_ceiling;
        self.read(|conn| {
            let doc = documents::load_live(conn, doc_id)?;
            let map = match at {
                Some(ver) => revisions::resolve_version_map_at(conn, &doc, ver)?,
                None => revisions::current_version_map(conn, &doc)?,
            };
            tree::reconstruct(conn, &doc, &map, at, &query, ceiling)
        })
    }

    /// Full trees at two revisions.
    #[tracing::instrument(skip(self), name = "tree.diff")]
    pub fn diff(&self, doc_id: DocumentId, from: u64, to: u64) -> Result<TreeDiff> {
        let ceiling = self.config.tree.max_depth_ceiling;
        let query = TreeQuery::default();
        self.read(|conn| {
            let doc = documents::load_live(conn, doc_id)?;
            revisions::check_range(&doc, from, to)?;
            let from_map = revisions::resolve_version_map_at(conn, &doc, from)?;
            let to_map = revisions::resolve_version_map_at(conn, &doc, to)?;
            Ok(TreeDiff {
                from: tree::reconstruct(conn, &doc, &from_map, Some(from), &query, ceiling)?,
                to: tree::reconstruct(conn, &doc, &to_map, Some(to), &query, ceiling)?,
            })
        })
    }
}

fn apply_op(
    conn: &Connection,
    doc: &Document,
    op: &BatchOp,
    author: PrincipalId,
) -> Result<(BlockVersion, bool)> {
    let owned = |block_id: BlockId| -> Result<()> {
        let (block, _) = versions::load_live(conn, block_id)?;
        if block.doc_id != doc.id {
            return Err(EngineError::invalid(format!(
                "block {block_id} belongs to document {}",
                block.doc_id
            )));
        }
        Ok(())
    };
    match op {
        BatchOp::Create(new) => versions::create_block(conn, doc, new, author).map(|v| (v, true)),
        BatchOp::Update { block_id, payload } => {
            owned(*block_id)?;
            versions::update_content(conn, *block_id, payload, author)
        }
        BatchOp::Move { block_id, to } => {
            owned(*block_id)?;
            versions::move_block(conn, doc, *block_id, to, author).map(|v| (v, true))
        }
        BatchOp::Delete { block_id } => {
            owned(*block_id)?;
            versions::delete_block(conn, *block_id, author).map(|v| (v, true))
        }
    }
}
