//! Revision log and snapshot manager.
//!
//! A revision is a point on the logical clock: it covers every block version
//! stamped at or before its own clock. Resolving a historical version map is
//! therefore a scan of version stamps up to that clock, optionally starting
//! from the newest snapshot at or before the target.

use folio_types::{
    BlockId, BlockVersion, DocRevision, DocSnapshot, Document, DocumentId, Page, PrincipalId,
    VersionMap, now_millis,
};
use rusqlite::Connection;
use serde::Serialize;
use tracing::{debug, info};

use crate::db;
use crate::error::{EngineError, Result};
use crate::versions;

/// Append revision `head + 1` for a document and advance its head.
///
/// Takes an auto-snapshot when the new head is a multiple of
/// `snapshot_interval` (0 disables).
pub fn commit_revision(
    conn: &Connection,
    doc_id: DocumentId,
    author: PrincipalId,
    message: Option<String>,
    op_summary: serde_json::Value,
    snapshot_interval: u64,
) -> Result<DocRevision> {
    let doc = db::select_document(conn, doc_id)?.ok_or(EngineError::DocumentNotFound(doc_id))?;
    let now = now_millis();
    let rev = DocRevision {
        doc_id,
        doc_ver: doc.head + 1,
        clock: db::tick_clock(conn)?,
        created_at_ms: now,
        author,
        message,
        op_summary,
    };
    db::insert_revision(conn, &rev)?;
    db::update_head(conn, doc_id, rev.doc_ver, now)?;
    info!(
        revision = %folio_types::revision_id(doc_id, rev.doc_ver),
        clock = rev.clock,
        "committed revision"
    );

    if snapshot_interval > 0 && rev.doc_ver % snapshot_interval == 0 {
        let doc = Document {
            head: rev.doc_ver,
            ..doc
        };
        create_snapshot(conn, &doc)?;
    }
    Ok(rev)
}

pub fn get_revision(conn: &Connection, doc_id: DocumentId, doc_ver: u64) -> Result<DocRevision> {
    db::select_revision(conn, doc_id, doc_ver)?.ok_or(EngineError::RevisionNotFound { doc_id, doc_ver })
}

/// Revisions newest first.
pub fn list_revisions(conn: &Connection, doc_id: DocumentId, page: Page) -> Result<Vec<DocRevision>> {
    db::select_revisions(conn, doc_id, page)
}

/// `{block → latest_ver}` of every live block right now, including versions
/// not yet covered by a revision.
pub fn current_version_map(conn: &Connection, doc: &Document) -> Result<VersionMap> {
    db::select_live_pointers(conn, doc.id)
}

/// Exact version of every live block as of revision `doc_ver`.
pub fn resolve_version_map_at(conn: &Connection, doc: &Document, doc_ver: u64) -> Result<VersionMap> {
    if doc_ver == 0 || doc_ver > doc.head {
        return Err(EngineError::RevisionNotFound {
            doc_id: doc.id,
            doc_ver,
        });
    }
    let rev = get_revision(conn, doc.id, doc_ver)?;

    let (mut map, base_clock) = match db::select_snapshot_at_or_before(conn, doc.id, doc_ver)? {
        Some(snap) => {
            debug!(doc = %doc.id, snapshot = snap.doc_ver, target = doc_ver, "resolving from snapshot");
            (snap.versions, snap.clock)
        }
        None => (VersionMap::new(), 0),
    };
    overlay(conn, doc.id, &mut map, base_clock, rev.clock)?;
    force_root(conn, doc, &mut map, rev.clock)?;
    Ok(map)
}

/// Resolution without snapshots: a full scan of version stamps.
pub fn resolve_by_scan(conn: &Connection, doc: &Document, upto_clock: u64) -> Result<VersionMap> {
    let mut map = VersionMap::new();
    overlay(conn, doc.id, &mut map, 0, upto_clock)?;
    force_root(conn, doc, &mut map, upto_clock)?;
    Ok(map)
}

fn overlay(
    conn: &Connection,
    doc_id: DocumentId,
    map: &mut VersionMap,
    after: u64,
    upto: u64,
) -> Result<()> {
    for stamp in db::select_stamps_between(conn, doc_id, after, upto)? {
        if stamp.deleted {
            map.remove(&stamp.block_id);
        } else {
            map.insert(stamp.block_id, stamp.ver);
        }
    }
    Ok(())
}

/// The root is structurally mandatory: include it unless its pointer row is
/// gone or flagged deleted, which tree reconstruction reports separately.
fn force_root(conn: &Connection, doc: &Document, map: &mut VersionMap, upto: u64) -> Result<()> {
    if map.contains_key(&doc.root_block_id) {
        return Ok(());
    }
    let Some(root) = db::select_block(conn, doc.root_block_id)? else {
        return Ok(());
    };
    if root.deleted {
        return Ok(());
    }
    let ver = match db::select_stamp_at(conn, root.id, upto)? {
        Some((ver, _)) => ver,
        None => 1,
    };
    map.insert(root.id, ver);
    Ok(())
}

/// Snapshot the document at its head. Returns the existing snapshot (and
/// `false`) when the head is already snapshotted.
pub fn create_snapshot(conn: &Connection, doc: &Document) -> Result<(DocSnapshot, bool)> {
    let existing = db::select_snapshot_at_or_before(conn, doc.id, doc.head)?;
    if let Some(existing) = existing.filter(|s| s.doc_ver == doc.head) {
        return Ok((existing, false));
    }
    let rev = get_revision(conn, doc.id, doc.head)?;
    let snap = DocSnapshot {
        doc_id: doc.id,
        doc_ver: doc.head,
        clock: rev.clock,
        created_at_ms: now_millis(),
        versions: resolve_version_map_at(conn, doc, doc.head)?,
    };
    let created = db::insert_snapshot(conn, &snap)?;
    info!(
        revision = %folio_types::revision_id(doc.id, doc.head),
        blocks = snap.versions.len(),
        "created snapshot"
    );
    Ok((snap, created))
}

/// Counts of block-level changes made by a revert.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RevertStats {
    pub reinstated: usize,
    pub retired: usize,
    pub unchanged: usize,
}

/// Bring every block back to its state at `target` with new versions, then
/// commit one forward revision recording `revertedFrom`.
pub fn revert(
    conn: &Connection,
    doc: &Document,
    target: u64,
    author: PrincipalId,
    snapshot_interval: u64,
) -> Result<(DocRevision, RevertStats)> {
    if target == 0 || target >= doc.head {
        return Err(EngineError::InvalidRevert {
            doc_id: doc.id,
            target,
            head: doc.head,
        });
    }
    let target_map = resolve_version_map_at(conn, doc, target)?;
    let mut stats = RevertStats::default();

    for block in db::select_blocks(conn, doc.id)? {
        match target_map.get(&block.id) {
            Some(&ver) => {
                let wanted = load_version(conn, block.id, ver)?;
                match versions::reinstate(conn, &block, &wanted, author)? {
                    Some(_) => stats.reinstated += 1,
                    None => stats.unchanged += 1,
                }
            }
            None => match versions::retire(conn, &block, author)? {
                Some(_) => stats.retired += 1,
                None => stats.unchanged += 1,
            },
        }
    }

    let summary = serde_json::json!({
        "revertedFrom": target,
        "reinstated": stats.reinstated,
        "retired": stats.retired,
    });
    let rev = commit_revision(
        conn,
        doc.id,
        author,
        Some(format!("revert to revision {target}")),
        summary,
        snapshot_interval,
    )?;
    info!(doc = %doc.id, target, head = rev.doc_ver, ?stats, "reverted document");
    Ok((rev, stats))
}

fn load_version(conn: &Connection, block_id: BlockId, ver: u64) -> Result<BlockVersion> {
    db::select_version(conn, block_id, ver)?.ok_or_else(|| {
        EngineError::Internal(format!(
            "missing version {}",
            folio_types::version_id(block_id, ver)
        ))
    })
}

/// Validate a `from..=to` revision range for diffing.
pub fn check_range(doc: &Document, from: u64, to: u64) -> Result<()> {
    if from == 0 || from > to || to > doc.head {
        return Err(EngineError::InvalidRange {
            doc_id: doc.id,
            from,
            to,
            head: doc.head,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::documents;
    use crate::versions::{MoveTo, NewBlock, Placement};
    use folio_types::{Payload, WorkspaceId};
    use serde_json::json;

    fn para(text: &str) -> Payload {
        Payload::new(json!({ "text": text }))
    }

    fn commit(conn: &Connection, doc: DocumentId) -> DocRevision {
        commit_revision(conn, doc, PrincipalId::system(), None, json!({}), 0).unwrap()
    }

    fn reload(conn: &Connection, doc: DocumentId) -> Document {
        db::select_document(conn, doc).unwrap().unwrap()
    }

    #[test]
    fn test_commit_advances_head_gaplessly() {
        let db = Database::in_memory().unwrap();
        let conn = db.conn().unwrap();
        let (doc, _) = documents::create(&conn, WorkspaceId::new(), "t", PrincipalId::system(), Payload::empty(), &[]).unwrap();
        let r2 = commit(&conn, doc.id);
        let r3 = commit(&conn, doc.id);
        assert_eq!((r2.doc_ver, r3.doc_ver), (2, 3));
        assert!(r3.clock > r2.clock);
        assert_eq!(reload(&conn, doc.id).head, 3);
        let listed: Vec<u64> = list_revisions(&conn, doc.id, Page::first(10))
            .unwrap()
            .iter()
            .map(|r| r.doc_ver)
            .collect();
        assert_eq!(listed, vec![3, 2, 1]);
    }

    #[test]
    fn test_resolution_tracks_history() {
        let db = Database::in_memory().unwrap();
        let conn = db.conn().unwrap();
        let me = PrincipalId::system();
        let (doc, _) = documents::create(&conn, WorkspaceId::new(), "t", me, Payload::empty(), &[]).unwrap();
        let a = versions::create_block(&conn, &doc, &NewBlock::new(doc.root_block_id, "p", para("a")), me).unwrap();
        commit(&conn, doc.id); // 2
        versions::update_content(&conn, a.block_id, &para("a2"), me).unwrap();
        commit(&conn, doc.id); // 3
        versions::delete_block(&conn, a.block_id, me).unwrap();
        commit(&conn, doc.id); // 4
        let doc = reload(&conn, doc.id);

        let at = |v| resolve_version_map_at(&conn, &doc, v).unwrap();
        assert_eq!(at(1), VersionMap::from([(doc.root_block_id, 1)]));
        assert_eq!(at(2), VersionMap::from([(doc.root_block_id, 1), (a.block_id, 1)]));
        assert_eq!(at(3), VersionMap::from([(doc.root_block_id, 1), (a.block_id, 2)]));
        // the deletion only hides the block from revisions after it
        assert_eq!(at(4), VersionMap::from([(doc.root_block_id, 1)]));
        assert_eq!(at(4), current_version_map(&conn, &doc).unwrap());

        assert!(matches!(
            resolve_version_map_at(&conn, &doc, 5),
            Err(EngineError::RevisionNotFound { doc_ver: 5, .. })
        ));
    }

    #[test]
    fn test_snapshot_path_matches_scan() {
        let db = Database::in_memory().unwrap();
        let conn = db.conn().unwrap();
        let me = PrincipalId::system();
        let (doc, _) = documents::create(&conn, WorkspaceId::new(), "t", me, Payload::empty(), &[]).unwrap();
        let a = versions::create_block(&conn, &doc, &NewBlock::new(doc.root_block_id, "p", para("a")), me).unwrap();
        let b = versions::create_block(&conn, &doc, &NewBlock::new(doc.root_block_id, "p", para("b")), me).unwrap();
        commit(&conn, doc.id); // 2
        let (snap, created) = create_snapshot(&conn, &reload(&conn, doc.id)).unwrap();
        assert!(created);
        assert_eq!(snap.doc_ver, 2);
        let (again, created) = create_snapshot(&conn, &reload(&conn, doc.id)).unwrap();
        assert!(!created);
        assert_eq!(again, snap);

        versions::move_block(&conn, &doc, b.block_id, &MoveTo::under(a.block_id, Placement::End), me).unwrap();
        versions::delete_block(&conn, a.block_id, me).unwrap();
        let r3 = commit(&conn, doc.id);
        let doc = reload(&conn, doc.id);

        let via_snapshot = resolve_version_map_at(&conn, &doc, 3).unwrap();
        let via_scan = resolve_by_scan(&conn, &doc, r3.clock).unwrap();
        assert_eq!(via_snapshot, via_scan);
        assert_eq!(via_scan, VersionMap::from([(doc.root_block_id, 1), (b.block_id, 2)]));
    }

    #[test]
    fn test_auto_snapshot_interval() {
        let db = Database::in_memory().unwrap();
        let conn = db.conn().unwrap();
        let me = PrincipalId::system();
        let (doc, _) = documents::create(&conn, WorkspaceId::new(), "t", me, Payload::empty(), &[]).unwrap();
        for _ in 0..5 {
            commit_revision(&conn, doc.id, me, None, json!({}), 3).unwrap();
        }
        // heads 2..=6, snapshots at 3 and 6
        assert_eq!(db::count_snapshots(&conn, doc.id).unwrap(), 2);
    }

    #[test]
    fn test_deferred_versions_not_in_snapshot() {
        let db = Database::in_memory().unwrap();
        let conn = db.conn().unwrap();
        let me = PrincipalId::system();
        let (doc, _) = documents::create(&conn, WorkspaceId::new(), "t", me, Payload::empty(), &[]).unwrap();
        // created but never committed
        versions::create_block(&conn, &doc, &NewBlock::new(doc.root_block_id, "p", para("a")), me).unwrap();
        let (snap, _) = create_snapshot(&conn, &doc).unwrap();
        assert_eq!(snap.versions, VersionMap::from([(doc.root_block_id, 1)]));
    }

    #[test]
    fn test_revert_is_forward_only() {
        let db = Database::in_memory().unwrap();
        let conn = db.conn().unwrap();
        let me = PrincipalId::system();
        let (doc, _) = documents::create(&conn, WorkspaceId::new(), "t", me, Payload::empty(), &[]).unwrap();
        let a = versions::create_block(&conn, &doc, &NewBlock::new(doc.root_block_id, "p", para("a")), me).unwrap();
        commit(&conn, doc.id); // 2
        versions::update_content(&conn, a.block_id, &para("changed"), me).unwrap();
        let b = versions::create_block(&conn, &doc, &NewBlock::new(doc.root_block_id, "p", para("b")), me).unwrap();
        commit(&conn, doc.id); // 3
        let doc = reload(&conn, doc.id);

        let (rev, stats) = revert(&conn, &doc, 2, me, 0).unwrap();
        assert_eq!(rev.doc_ver, 4);
        assert_eq!(rev.op_summary["revertedFrom"], json!(2));
        assert_eq!(stats.reinstated, 1);
        assert_eq!(stats.retired, 1);

        let (_, a_now) = versions::load_live(&conn, a.block_id).unwrap();
        assert_eq!(a_now.ver, 3);
        assert_eq!(a_now.payload, para("a"));
        assert!(matches!(versions::load_live(&conn, b.block_id), Err(EngineError::BlockNotFound(_))));

        let doc = reload(&conn, doc.id);
        assert_eq!(doc.head, 4);
        // the reverted-from revision is still intact
        let at3 = resolve_version_map_at(&conn, &doc, 3).unwrap();
        assert_eq!(at3.get(&b.block_id), Some(&1));
        assert_eq!(at3.get(&a.block_id), Some(&2));
    }

    #[test]
    fn test_revert_rejects_head_and_future() {
        let db = Database::in_memory().unwrap();
        let conn = db.conn().unwrap();
        let me = PrincipalId::system();
        let (doc, _) = documents::create(&conn, WorkspaceId::new(), "t", me, Payload::empty(), &[]).unwrap();
        commit(&conn, doc.id);
        let doc = reload(&conn, doc.id);
        for target in [2, 3, 0] {
            assert!(matches!(
                revert(&conn, &doc, target, me, 0),
                Err(EngineError::InvalidRevert { .. })
            ));
        }
        assert_eq!(reload(&conn, doc.id).head, 2);
    }

    #[test]
    fn test_check_range() {
        let doc = Document {
            head: 5,
            ..documents::draft(WorkspaceId::new(), "t", PrincipalId::system(), &[])
        };
        assert!(check_range(&doc, 1, 5).is_ok());
        assert!(check_range(&doc, 3, 3).is_ok());
        assert!(check_range(&doc, 4, 3).is_err());
        assert!(check_range(&doc, 1, 6).is_err());
        assert!(check_range(&doc, 0, 2).is_err());
    }
}
