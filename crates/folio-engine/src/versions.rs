//! Block-version store: the append-only ledger of block content.
//!
//! Every create, update, move, delete, and restore appends one write-once
//! [`BlockVersion`] and advances the block's pointer row by exactly one.
//! All functions here run inside a caller-owned write transaction; the
//! coordinator decides whether a revision follows.

use std::collections::HashSet;

use folio_types::{
    Block, BlockId, BlockVersion, Document, Page, Payload, PrincipalId, ROOT_BLOCK_TYPE, SortKey,
    now_millis, sibling_order,
};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::db;
use crate::error::{EngineError, Result};

/// Upper bound on ancestor walks during cycle detection.
pub const MAX_ANCESTOR_WALK: usize = 10_000;

/// Where a block lands among its new siblings.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "at", content = "anchor")]
pub enum Placement {
    #[default]
    End,
    Start,
    Before(BlockId),
    After(BlockId),
    /// Caller-chosen key, used verbatim.
    Key(SortKey),
}

/// Arguments for creating a block.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NewBlock {
    pub parent_id: BlockId,
    pub block_type: String,
    pub payload: Payload,
    #[serde(default)]
    pub placement: Placement,
    #[serde(default)]
    pub indent: u32,
}

impl NewBlock {
    pub fn new(parent_id: BlockId, block_type: impl Into<String>, payload: Payload) -> Self {
        Self {
            parent_id,
            block_type: block_type.into(),
            payload,
            placement: Placement::End,
            indent: 0,
        }
    }

    pub fn placed(mut self, placement: Placement) -> Self {
        self.placement = placement;
        self
    }
}

/// Arguments for moving a block.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MoveTo {
    pub parent_id: BlockId,
    #[serde(default)]
    pub placement: Placement,
    /// Keep the current indent when `None`.
    #[serde(default)]
    pub indent: Option<u32>,
}

impl MoveTo {
    pub fn under(parent_id: BlockId, placement: Placement) -> Self {
        Self {
            parent_id,
            placement,
            indent: None,
        }
    }
}

// ============================================================================
// Reads
// ============================================================================

/// Pointer and current version of a live block.
pub fn load_live(conn: &Connection, block_id: BlockId) -> Result<(Block, BlockVersion)> {
    let block = db::select_block(conn, block_id)?
        .filter(|b| !b.deleted)
        .ok_or(EngineError::BlockNotFound(block_id))?;
    let current = load_current(conn, &block)?;
    Ok((block, current))
}

/// Current version named by a pointer row, deleted or not.
pub fn load_current(conn: &Connection, block: &Block) -> Result<BlockVersion> {
    db::select_version(conn, block.id, block.latest_ver)?.ok_or_else(|| {
        EngineError::Internal(format!(
            "pointer names missing version {}",
            folio_types::version_id(block.id, block.latest_ver)
        ))
    })
}

/// Versions of a block, newest first. Deleted blocks keep their history.
pub fn history(conn: &Connection, block_id: BlockId, page: Page) -> Result<Vec<BlockVersion>> {
    if db::select_block(conn, block_id)?.is_none() {
        return Err(EngineError::BlockNotFound(block_id));
    }
    db::select_version_history(conn, block_id, page)
}

fn require_live_parent(conn: &Connection, doc: &Document, parent_id: BlockId) -> Result<Block> {
    let parent = db::select_block(conn, parent_id)?
        .filter(|b| !b.deleted)
        .ok_or(EngineError::ParentNotFound {
            doc_id: doc.id,
            parent_id,
        })?;
    if parent.doc_id != doc.id {
        return Err(EngineError::CrossDocumentParent {
            doc_id: doc.id,
            parent_id,
            parent_doc: parent.doc_id,
        });
    }
    Ok(parent)
}

/// Live siblings under `parent_id` in display order, skipping `exclude`.
fn ordered_siblings(
    conn: &Connection,
    doc: &Document,
    parent_id: BlockId,
    exclude: Option<BlockId>,
) -> Result<Vec<BlockVersion>> {
    let mut siblings: Vec<BlockVersion> = db::select_live_children(conn, doc.id, parent_id)?
        .into_iter()
        .filter(|v| Some(v.block_id) != exclude)
        .collect();
    siblings.sort_by(|a, b| sibling_order((a.sort_key, a.block_id), (b.sort_key, b.block_id)));
    Ok(siblings)
}

// ============================================================================
// Version append
// ============================================================================

/// Append the version following `base` (which must be current) and advance
/// the pointer. `edit` adjusts the copied fields; derived content fields are
/// recomputed afterwards.
pub(crate) fn append_version(
    conn: &Connection,
    base: &BlockVersion,
    author: PrincipalId,
    edit: impl FnOnce(&mut BlockVersion),
) -> Result<BlockVersion> {
    let mut next = base.clone();
    next.ver = base.ver + 1;
    next.clock = db::tick_clock(conn)?;
    next.created_at_ms = now_millis();
    next.author = author;
    next.deleted = false;
    edit(&mut next);
    derive_content(&mut next);

    db::insert_version(conn, &next)?;
    db::advance_pointer(conn, &next)?;
    debug!(
        version = %folio_types::version_id(next.block_id, next.ver),
        clock = next.clock,
        deleted = next.deleted,
        "appended block version"
    );
    Ok(next)
}

fn derive_content(v: &mut BlockVersion) {
    v.content_hash = v.payload.content_hash();
    v.plain_text = v.payload.plain_text();
    v.refs = v.payload.refs();
}

/// Pick a sort key for `placement` under `parent_id`, re-spacing the sibling
/// group first when the gap is exhausted.
fn resolve_slot(
    conn: &Connection,
    doc: &Document,
    parent_id: BlockId,
    placement: &Placement,
    moving: Option<BlockId>,
    author: PrincipalId,
) -> Result<SortKey> {
    if let Placement::Key(key) = placement {
        return Ok(*key);
    }
    let mut siblings = ordered_siblings(conn, doc, parent_id, moving)?;
    let (prev, next) = slot_neighbours(&siblings, placement)?;

    let keys = |s: &[BlockVersion]| {
        (
            prev.map(|i: usize| s[i].sort_key),
            next.map(|i: usize| s[i].sort_key),
        )
    };
    let (p, n) = keys(&siblings);
    if let Some(key) = SortKey::for_slot(p, n) {
        return Ok(key);
    }

    warn!(
        parent = %parent_id,
        siblings = siblings.len(),
        "sort key space exhausted, rebalancing siblings"
    );
    siblings = rebalance(conn, siblings, author)?;
    let (p, n) = keys(&siblings);
    SortKey::for_slot(p, n)
        .ok_or_else(|| EngineError::Internal(format!("no sort key slot under {parent_id} after rebalance")))
}

/// Indexes of the siblings immediately before and after the insertion slot.
fn slot_neighbours(
    siblings: &[BlockVersion],
    placement: &Placement,
) -> Result<(Option<usize>, Option<usize>)> {
    let position = |anchor: BlockId| {
        siblings
            .iter()
            .position(|s| s.block_id == anchor)
            .ok_or_else(|| EngineError::invalid(format!("anchor {anchor} is not a live sibling")))
    };
    let last = siblings.len().checked_sub(1);
    Ok(match placement {
        Placement::End => (last, None),
        Placement::Start => (None, (!siblings.is_empty()).then_some(0)),
        Placement::Before(anchor) => {
            let i = position(*anchor)?;
            (i.checked_sub(1), Some(i))
        }
        Placement::After(anchor) => {
            let i = position(*anchor)?;
            (Some(i), (i + 1 < siblings.len()).then_some(i + 1))
        }
        Placement::Key(_) => (None, None),
    })
}

/// Re-space siblings to `STEP, 2*STEP, …`, versioning each one that moves.
fn rebalance(
    conn: &Connection,
    siblings: Vec<BlockVersion>,
    author: PrincipalId,
) -> Result<Vec<BlockVersion>> {
    let keys = SortKey::spread(siblings.len());
    siblings
        .into_iter()
        .zip(keys)
        .map(|(sibling, key)| {
            if sibling.sort_key == key {
                Ok(sibling)
            } else {
                append_version(conn, &sibling, author, |v| v.sort_key = key)
            }
        })
        .collect()
}

// ============================================================================
// Mutations
// ============================================================================

/// Create the root block of a freshly inserted document.
pub(crate) fn create_root(
    conn: &Connection,
    doc: &Document,
    payload: Payload,
    author: PrincipalId,
) -> Result<BlockVersion> {
    insert_first_version(conn, doc, doc.root_block_id, ROOT_BLOCK_TYPE, None, SortKey::first(), 0, payload, author)
}

/// Create a block under a live parent in the same document.
pub fn create_block(
    conn: &Connection,
    doc: &Document,
    new: &NewBlock,
    author: PrincipalId,
) -> Result<BlockVersion> {
    if new.block_type.trim().is_empty() {
        return Err(EngineError::invalid("block type must not be empty"));
    }
    if new.block_type == ROOT_BLOCK_TYPE {
        return Err(EngineError::invalid("a document has exactly one root block"));
    }
    require_live_parent(conn, doc, new.parent_id)?;
    let sort_key = resolve_slot(conn, doc, new.parent_id, &new.placement, None, author)?;
    insert_first_version(
        conn,
        doc,
        BlockId::new(),
        &new.block_type,
        Some(new.parent_id),
        sort_key,
        new.indent,
        new.payload.clone(),
        author,
    )
}

#[allow(clippy::too_many_arguments)]
fn insert_first_version(
    conn: &Connection,
    doc: &Document,
    block_id: BlockId,
    block_type: &str,
    parent_id: Option<BlockId>,
    sort_key: SortKey,
    indent: u32,
    payload: Payload,
    author: PrincipalId,
) -> Result<BlockVersion> {
    let clock = db::tick_clock(conn)?;
    let mut version = BlockVersion {
        block_id,
        doc_id: doc.id,
        ver: 1,
        clock,
        created_at_ms: now_millis(),
        author,
        parent_id,
        sort_key,
        indent,
        collapsed: false,
        payload,
        content_hash: String::new(),
        plain_text: String::new(),
        refs: Vec::new(),
        deleted: false,
    };
    derive_content(&mut version);

    db::insert_block(
        conn,
        &Block {
            id: block_id,
            doc_id: doc.id,
            block_type: block_type.to_string(),
            latest_ver: 1,
            latest_at: clock,
            latest_by: author,
            deleted: false,
            deleted_at: None,
            deleted_by: None,
        },
    )?;
    db::insert_version(conn, &version)?;
    debug!(block = %block_id, block_type, sort_key = %sort_key, "created block");
    Ok(version)
}

/// Replace a block's payload. Identical content is a no-op returning the
/// current version and `false`.
pub fn update_content(
    conn: &Connection,
    block_id: BlockId,
    payload: &Payload,
    author: PrincipalId,
) -> Result<(BlockVersion, bool)> {
    let (_, current) = load_live(conn, block_id)?;
    if current.content_hash == payload.content_hash() {
        debug!(block = %block_id, ver = current.ver, "identical content, no new version");
        return Ok((current, false));
    }
    let next = append_version(conn, &current, author, |v| v.payload = payload.clone())?;
    Ok((next, true))
}

/// Toggle the collapsed flag. Unchanged state is a no-op.
pub fn set_collapsed(
    conn: &Connection,
    block_id: BlockId,
    collapsed: bool,
    author: PrincipalId,
) -> Result<(BlockVersion, bool)> {
    let (_, current) = load_live(conn, block_id)?;
    if current.collapsed == collapsed {
        return Ok((current, false));
    }
    let next = append_version(conn, &current, author, |v| v.collapsed = collapsed)?;
    Ok((next, true))
}

/// Move a block under a new parent. Always appends a version.
pub fn move_block(
    conn: &Connection,
    doc: &Document,
    block_id: BlockId,
    to: &MoveTo,
    author: PrincipalId,
) -> Result<BlockVersion> {
    let (block, current) = load_live(conn, block_id)?;
    if current.parent_id.is_none() {
        return Err(EngineError::invalid("the root block cannot be moved"));
    }
    if block.doc_id != doc.id {
        return Err(EngineError::invalid(format!(
            "block {block_id} belongs to document {}",
            block.doc_id
        )));
    }
    require_live_parent(conn, doc, to.parent_id)?;
    check_cycle(conn, block_id, to.parent_id)?;

    let sort_key = resolve_slot(conn, doc, to.parent_id, &to.placement, Some(block_id), author)?;
    // Rebalancing may have versioned the moving block's old siblings, never
    // the moving block itself, so `current` is still current.
    append_version(conn, &current, author, |v| {
        v.parent_id = Some(to.parent_id);
        v.sort_key = sort_key;
        if let Some(indent) = to.indent {
            v.indent = indent;
        }
    })
}

/// Walk parent pointers from `new_parent` toward the root. Reaching
/// `block_id` means the move would create a cycle.
fn check_cycle(conn: &Connection, block_id: BlockId, new_parent: BlockId) -> Result<()> {
    let mut path = vec![new_parent];
    let mut visited = HashSet::new();
    let mut cursor = new_parent;

    loop {
        if cursor == block_id {
            return Err(EngineError::CycleDetected {
                block_id,
                new_parent_id: new_parent,
                path,
            });
        }
        if !visited.insert(cursor) || visited.len() > MAX_ANCESTOR_WALK {
            return Err(EngineError::Internal(format!(
                "ancestor chain of {new_parent} does not terminate"
            )));
        }
        match db::select_current_parent(conn, cursor)? {
            Some(Some(parent)) => {
                path.push(parent);
                cursor = parent;
            }
            Some(None) | None => return Ok(()),
        }
    }
}

/// Soft-delete a block by appending a tombstone version. Descendants are
/// left untouched.
pub fn delete_block(conn: &Connection, block_id: BlockId, author: PrincipalId) -> Result<BlockVersion> {
    let (_, current) = load_live(conn, block_id)?;
    if current.parent_id.is_none() {
        return Err(EngineError::invalid("the root block cannot be deleted"));
    }
    append_version(conn, &current, author, |v| v.deleted = true)
}

/// Undo a soft delete. Restoring a live block is a no-op.
pub fn restore_block(
    conn: &Connection,
    block_id: BlockId,
    author: PrincipalId,
) -> Result<(BlockVersion, bool)> {
    let block = db::select_block(conn, block_id)?.ok_or(EngineError::BlockNotFound(block_id))?;
    let current = load_current(conn, &block)?;
    if !block.deleted {
        return Ok((current, false));
    }
    if let Some(parent_id) = current.parent_id {
        let parent_live = db::select_block(conn, parent_id)?.is_some_and(|p| !p.deleted);
        if !parent_live {
            return Err(EngineError::ParentNotFound {
                doc_id: block.doc_id,
                parent_id,
            });
        }
    }
    let next = append_version(conn, &current, author, |v| v.deleted = false)?;
    Ok((next, true))
}

/// Make `target`'s content and position current again on a block whose
/// current version differs. Returns `None` when nothing needed to change.
pub(crate) fn reinstate(
    conn: &Connection,
    block: &Block,
    target: &BlockVersion,
    author: PrincipalId,
) -> Result<Option<BlockVersion>> {
    let current = load_current(conn, block)?;
    let same = !current.deleted
        && current.content_hash == target.content_hash
        && current.parent_id == target.parent_id
        && current.sort_key == target.sort_key
        && current.indent == target.indent
        && current.collapsed == target.collapsed;
    if same {
        return Ok(None);
    }
    let next = append_version(conn, &current, author, |v| {
        v.payload = target.payload.clone();
        v.parent_id = target.parent_id;
        v.sort_key = target.sort_key;
        v.indent = target.indent;
        v.collapsed = target.collapsed;
    })?;
    Ok(Some(next))
}

/// Tombstone a live block during a revert. Root blocks are never touched.
pub(crate) fn retire(conn: &Connection, block: &Block, author: PrincipalId) -> Result<Option<BlockVersion>> {
    if block.deleted {
        return Ok(None);
    }
    let current = load_current(conn, block)?;
    if current.parent_id.is_none() {
        return Ok(None);
    }
    append_version(conn, &current, author, |v| v.deleted = true).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use folio_types::{DocStatus, DocumentId, WorkspaceId};
    use serde_json::json;

    fn setup(conn: &Connection) -> (Document, BlockVersion) {
        let author = PrincipalId::system();
        let doc = Document {
            id: DocumentId::new(),
            workspace_id: WorkspaceId::new(),
            title: "t".into(),
            head: 1,
            published_head: 0,
            root_block_id: BlockId::new(),
            status: DocStatus::Normal,
            tags: vec![],
            created_by: author,
            created_at_ms: 0,
            updated_at_ms: 0,
        };
        db::insert_document(conn, &doc).unwrap();
        let root = create_root(conn, &doc, Payload::empty(), author).unwrap();
        (doc, root)
    }

    fn para(text: &str) -> Payload {
        Payload::new(json!({ "text": text }))
    }

    fn child_order(conn: &Connection, doc: &Document, parent: BlockId) -> Vec<BlockId> {
        ordered_siblings(conn, doc, parent, None)
            .unwrap()
            .into_iter()
            .map(|v| v.block_id)
            .collect()
    }

    #[test]
    fn test_create_assigns_version_one() {
        let db = Database::in_memory().unwrap();
        let conn = db.conn().unwrap();
        let (doc, root) = setup(&conn);
        let v = create_block(&conn, &doc, &NewBlock::new(root.block_id, "paragraph", para("a")), PrincipalId::system()).unwrap();
        assert_eq!(v.ver, 1);
        assert_eq!(v.sort_key, SortKey::first());
        assert_eq!(v.plain_text, "a");
    }

    #[test]
    fn test_placement_orders_siblings() {
        let db = Database::in_memory().unwrap();
        let conn = db.conn().unwrap();
        let (doc, root) = setup(&conn);
        let me = PrincipalId::system();
        let a = create_block(&conn, &doc, &NewBlock::new(root.block_id, "p", para("a")), me).unwrap();
        let c = create_block(&conn, &doc, &NewBlock::new(root.block_id, "p", para("c")), me).unwrap();
        let b = create_block(
            &conn,
            &doc,
            &NewBlock::new(root.block_id, "p", para("b")).placed(Placement::After(a.block_id)),
            me,
        )
        .unwrap();
        let z = create_block(
            &conn,
            &doc,
            &NewBlock::new(root.block_id, "p", para("z")).placed(Placement::Start),
            me,
        )
        .unwrap();
        assert_eq!(
            child_order(&conn, &doc, root.block_id),
            vec![z.block_id, a.block_id, b.block_id, c.block_id]
        );
    }

    #[test]
    fn test_unknown_anchor_is_invalid() {
        let db = Database::in_memory().unwrap();
        let conn = db.conn().unwrap();
        let (doc, root) = setup(&conn);
        let err = create_block(
            &conn,
            &doc,
            &NewBlock::new(root.block_id, "p", para("x")).placed(Placement::Before(BlockId::new())),
            PrincipalId::system(),
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::InvalidArgument(_)));
    }

    #[test]
    fn test_exhausted_gap_rebalances_with_new_versions() {
        let db = Database::in_memory().unwrap();
        let conn = db.conn().unwrap();
        let (doc, root) = setup(&conn);
        let me = PrincipalId::system();
        let a = create_block(
            &conn,
            &doc,
            &NewBlock::new(root.block_id, "p", para("a")).placed(Placement::Key(SortKey::new(10))),
            me,
        )
        .unwrap();
        let b = create_block(
            &conn,
            &doc,
            &NewBlock::new(root.block_id, "p", para("b")).placed(Placement::Key(SortKey::new(11))),
            me,
        )
        .unwrap();
        let mid = create_block(
            &conn,
            &doc,
            &NewBlock::new(root.block_id, "p", para("mid")).placed(Placement::After(a.block_id)),
            me,
        )
        .unwrap();

        assert_eq!(
            child_order(&conn, &doc, root.block_id),
            vec![a.block_id, mid.block_id, b.block_id]
        );
        let (_, a_now) = load_live(&conn, a.block_id).unwrap();
        let (_, b_now) = load_live(&conn, b.block_id).unwrap();
        assert_eq!(a_now.ver, 2);
        assert_eq!(a_now.sort_key, SortKey::new(SortKey::STEP));
        assert_eq!(b_now.ver, 2);
        assert_eq!(a_now.payload, para("a"));
    }

    #[test]
    fn test_identical_update_is_noop() {
        let db = Database::in_memory().unwrap();
        let conn = db.conn().unwrap();
        let (doc, root) = setup(&conn);
        let me = PrincipalId::system();
        let v1 = create_block(&conn, &doc, &NewBlock::new(root.block_id, "p", para("a")), me).unwrap();
        let (v2, changed) = update_content(&conn, v1.block_id, &para("b"), me).unwrap();
        assert!(changed);
        assert_eq!(v2.ver, 2);
        assert_eq!(v2.sort_key, v1.sort_key);
        let (v2_again, changed) = update_content(&conn, v1.block_id, &para("b"), me).unwrap();
        assert!(!changed);
        assert_eq!(v2_again.ver, 2);
    }

    #[test]
    fn test_cycle_rejected_without_writes() {
        let db = Database::in_memory().unwrap();
        let conn = db.conn().unwrap();
        let (doc, root) = setup(&conn);
        let me = PrincipalId::system();
        let a = create_block(&conn, &doc, &NewBlock::new(root.block_id, "p", para("a")), me).unwrap();
        let b = create_block(&conn, &doc, &NewBlock::new(a.block_id, "p", para("b")), me).unwrap();
        let c = create_block(&conn, &doc, &NewBlock::new(b.block_id, "p", para("c")), me).unwrap();
        let before = db::current_clock(&conn).unwrap();

        let err = move_block(&conn, &doc, a.block_id, &MoveTo::under(c.block_id, Placement::End), me).unwrap_err();
        match err {
            EngineError::CycleDetected { block_id, path, .. } => {
                assert_eq!(block_id, a.block_id);
                assert_eq!(path, vec![c.block_id, b.block_id, a.block_id]);
            }
            other => panic!("expected cycle, got {other:?}"),
        }
        assert_eq!(db::current_clock(&conn).unwrap(), before);
        assert_eq!(load_live(&conn, a.block_id).unwrap().1.ver, 1);

        let self_move = move_block(&conn, &doc, a.block_id, &MoveTo::under(a.block_id, Placement::End), me);
        assert!(matches!(self_move, Err(EngineError::CycleDetected { .. })));
    }

    #[test]
    fn test_move_keeps_payload() {
        let db = Database::in_memory().unwrap();
        let conn = db.conn().unwrap();
        let (doc, root) = setup(&conn);
        let me = PrincipalId::system();
        let a = create_block(&conn, &doc, &NewBlock::new(root.block_id, "p", para("a")), me).unwrap();
        let b = create_block(&conn, &doc, &NewBlock::new(root.block_id, "p", para("b")), me).unwrap();
        let moved = move_block(
            &conn,
            &doc,
            b.block_id,
            &MoveTo { parent_id: a.block_id, placement: Placement::End, indent: Some(1) },
            me,
        )
        .unwrap();
        assert_eq!(moved.ver, 2);
        assert_eq!(moved.parent_id, Some(a.block_id));
        assert_eq!(moved.indent, 1);
        assert_eq!(moved.content_hash, b.content_hash);
    }

    #[test]
    fn test_delete_and_restore() {
        let db = Database::in_memory().unwrap();
        let conn = db.conn().unwrap();
        let (doc, root) = setup(&conn);
        let me = PrincipalId::system();
        let a = create_block(&conn, &doc, &NewBlock::new(root.block_id, "p", para("a")), me).unwrap();

        let tomb = delete_block(&conn, a.block_id, me).unwrap();
        assert!(tomb.deleted);
        assert_eq!(tomb.ver, 2);
        assert!(matches!(load_live(&conn, a.block_id), Err(EngineError::BlockNotFound(_))));
        assert!(matches!(delete_block(&conn, a.block_id, me), Err(EngineError::BlockNotFound(_))));
        assert!(matches!(
            update_content(&conn, a.block_id, &para("x"), me),
            Err(EngineError::BlockNotFound(_))
        ));

        let (restored, changed) = restore_block(&conn, a.block_id, me).unwrap();
        assert!(changed);
        assert!(!restored.deleted);
        assert_eq!(restored.ver, 3);
        assert_eq!(restored.payload, para("a"));
    }

    #[test]
    fn test_root_cannot_be_deleted_or_moved() {
        let db = Database::in_memory().unwrap();
        let conn = db.conn().unwrap();
        let (doc, root) = setup(&conn);
        let me = PrincipalId::system();
        let a = create_block(&conn, &doc, &NewBlock::new(root.block_id, "p", para("a")), me).unwrap();
        assert!(matches!(delete_block(&conn, root.block_id, me), Err(EngineError::InvalidArgument(_))));
        assert!(matches!(
            move_block(&conn, &doc, root.block_id, &MoveTo::under(a.block_id, Placement::End), me),
            Err(EngineError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_deleted_parent_is_not_found() {
        let db = Database::in_memory().unwrap();
        let conn = db.conn().unwrap();
        let (doc, root) = setup(&conn);
        let me = PrincipalId::system();
        let a = create_block(&conn, &doc, &NewBlock::new(root.block_id, "p", para("a")), me).unwrap();
        delete_block(&conn, a.block_id, me).unwrap();
        let err = create_block(&conn, &doc, &NewBlock::new(a.block_id, "p", para("b")), me).unwrap_err();
        assert!(matches!(err, EngineError::ParentNotFound { .. }));
    }

    #[test]
    fn test_cross_document_parent() {
        let db = Database::in_memory().unwrap();
        let conn = db.conn().unwrap();
        let (doc, _) = setup(&conn);
        let (other, other_root) = setup(&conn);
        let err = create_block(
            &conn,
            &doc,
            &NewBlock::new(other_root.block_id, "p", para("x")),
            PrincipalId::system(),
        )
        .unwrap_err();
        match err {
            EngineError::CrossDocumentParent { parent_doc, .. } => assert_eq!(parent_doc, other.id),
            other => panic!("expected cross-document error, got {other:?}"),
        }
    }

    #[test]
    fn test_history_newest_first() {
        let db = Database::in_memory().unwrap();
        let conn = db.conn().unwrap();
        let (doc, root) = setup(&conn);
        let me = PrincipalId::system();
        let a = create_block(&conn, &doc, &NewBlock::new(root.block_id, "p", para("a")), me).unwrap();
        update_content(&conn, a.block_id, &para("b"), me).unwrap();
        update_content(&conn, a.block_id, &para("c"), me).unwrap();
        let vers: Vec<u64> = history(&conn, a.block_id, Page::first(2))
            .unwrap()
            .iter()
            .map(|v| v.ver)
            .collect();
        assert_eq!(vers, vec![3, 2]);
        let rest: Vec<u64> = history(&conn, a.block_id, Page::first(2).next())
            .unwrap()
            .iter()
            .map(|v| v.ver)
            .collect();
        assert_eq!(rest, vec![1]);
    }
}
