//! Document lifecycle: creation with root block and revision 1, status,
//! publishing, and tags.

use folio_types::{
    BlockId, DocRevision, DocStatus, Document, DocumentId, Payload, PrincipalId, WorkspaceId,
    now_millis,
};
use rusqlite::Connection;
use tracing::info;

use crate::db;
use crate::error::{EngineError, Result};
use crate::versions;

/// An unsaved document at head 1 with a fresh root id.
pub fn draft(workspace_id: WorkspaceId, title: &str, author: PrincipalId, tags: &[String]) -> Document {
    let now = now_millis();
    Document {
        id: DocumentId::new(),
        workspace_id,
        title: title.to_string(),
        head: 1,
        published_head: 0,
        root_block_id: BlockId::new(),
        status: DocStatus::Normal,
        tags: normalize_tags(tags),
        created_by: author,
        created_at_ms: now,
        updated_at_ms: now,
    }
}

/// Insert a document, its root block, and revision 1 together.
pub fn create(
    conn: &Connection,
    workspace_id: WorkspaceId,
    title: &str,
    author: PrincipalId,
    root_payload: Payload,
    tags: &[String],
) -> Result<(Document, DocRevision)> {
    if title.trim().is_empty() {
        return Err(EngineError::invalid("document title must not be empty"));
    }
    let doc = draft(workspace_id, title, author, tags);
    db::insert_document(conn, &doc)?;
    let root = versions::create_root(conn, &doc, root_payload, author)?;

    let rev = DocRevision {
        doc_id: doc.id,
        doc_ver: 1,
        clock: db::tick_clock(conn)?,
        created_at_ms: doc.created_at_ms,
        author,
        message: Some("created".to_string()),
        op_summary: serde_json::json!({ "created": root.block_id }),
    };
    db::insert_revision(conn, &rev)?;
    info!(doc = %doc.id, root = %doc.root_block_id, title, "created document");
    Ok((doc, rev))
}

/// Load a document that is not soft-deleted.
pub fn load_live(conn: &Connection, doc_id: DocumentId) -> Result<Document> {
    db::select_document(conn, doc_id)?
        .filter(|d| d.status != DocStatus::Deleted)
        .ok_or(EngineError::DocumentNotFound(doc_id))
}

/// Change lifecycle status. Deletion is soft and reversible here.
pub fn set_status(conn: &Connection, doc_id: DocumentId, status: DocStatus) -> Result<Document> {
    let doc = db::select_document(conn, doc_id)?.ok_or(EngineError::DocumentNotFound(doc_id))?;
    db::update_status(conn, doc_id, status, now_millis())?;
    Ok(Document {
        status,
        ..doc
    })
}

/// Mark the current head as published.
pub fn publish(conn: &Connection, doc_id: DocumentId) -> Result<Document> {
    let doc = load_live(conn, doc_id)?;
    db::update_published_head(conn, doc_id, doc.head, now_millis())?;
    Ok(Document {
        published_head: doc.head,
        ..doc
    })
}

/// Replace the tag set. Returns `(added, removed)` relative to the old set.
pub fn set_tags(conn: &Connection, doc_id: DocumentId, tags: &[String]) -> Result<(Vec<String>, Vec<String>)> {
    let doc = load_live(conn, doc_id)?;
    let new = normalize_tags(tags);
    let added: Vec<String> = new.iter().filter(|t| !doc.tags.contains(t)).cloned().collect();
    let removed: Vec<String> = doc.tags.iter().filter(|t| !new.contains(t)).cloned().collect();
    db::replace_tags(conn, doc_id, &new)?;
    Ok((added, removed))
}

/// Trimmed, non-empty, sorted, deduplicated.
fn normalize_tags(tags: &[String]) -> Vec<String> {
    let mut out: Vec<String> = tags
        .iter()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect();
    out.sort();
    out.dedup();
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use serde_json::json;

    fn tags(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_create_is_atomic_unit() {
        let db = Database::in_memory().unwrap();
        let conn = db.conn().unwrap();
        let me = PrincipalId::system();
        let (doc, rev) = create(&conn, WorkspaceId::new(), "Notes", me, Payload::new(json!({"title": "Notes"})), &[]).unwrap();
        assert_eq!(doc.head, 1);
        assert_eq!(rev.doc_ver, 1);
        let root = db::select_block(&conn, doc.root_block_id).unwrap().unwrap();
        assert_eq!(root.block_type, folio_types::ROOT_BLOCK_TYPE);
        assert_eq!(root.latest_ver, 1);
        let root_v1 = db::select_version(&conn, doc.root_block_id, 1).unwrap().unwrap();
        assert!(root_v1.clock < rev.clock);
        assert_eq!(root_v1.parent_id, None);
    }

    #[test]
    fn test_empty_title_rejected() {
        let db = Database::in_memory().unwrap();
        let conn = db.conn().unwrap();
        let err = create(&conn, WorkspaceId::new(), "  ", PrincipalId::system(), Payload::empty(), &[]).unwrap_err();
        assert!(matches!(err, EngineError::InvalidArgument(_)));
    }

    #[test]
    fn test_deleted_document_is_not_found() {
        let db = Database::in_memory().unwrap();
        let conn = db.conn().unwrap();
        let (doc, _) = create(&conn, WorkspaceId::new(), "t", PrincipalId::system(), Payload::empty(), &[]).unwrap();
        set_status(&conn, doc.id, DocStatus::Deleted).unwrap();
        assert!(matches!(load_live(&conn, doc.id), Err(EngineError::DocumentNotFound(_))));
        let restored = set_status(&conn, doc.id, DocStatus::Archived).unwrap();
        assert_eq!(restored.status, DocStatus::Archived);
        assert!(load_live(&conn, doc.id).is_ok());
    }

    #[test]
    fn test_publish_tracks_head() {
        let db = Database::in_memory().unwrap();
        let conn = db.conn().unwrap();
        let (doc, _) = create(&conn, WorkspaceId::new(), "t", PrincipalId::system(), Payload::empty(), &[]).unwrap();
        assert_eq!(doc.published_head, 0);
        let published = publish(&conn, doc.id).unwrap();
        assert_eq!(published.published_head, 1);
        assert_eq!(load_live(&conn, doc.id).unwrap().published_head, 1);
    }

    #[test]
    fn test_tag_diff() {
        let db = Database::in_memory().unwrap();
        let conn = db.conn().unwrap();
        let (doc, _) = create(&conn, WorkspaceId::new(), "t", PrincipalId::system(), Payload::empty(), &tags(&["a", "b", " b "])).unwrap();
        assert_eq!(doc.tags, tags(&["a", "b"]));
        let (added, removed) = set_tags(&conn, doc.id, &tags(&["b", "c", ""])).unwrap();
        assert_eq!(added, tags(&["c"]));
        assert_eq!(removed, tags(&["a"]));
        assert_eq!(load_live(&conn, doc.id).unwrap().tags, tags(&["b", "c"]));
    }
}
