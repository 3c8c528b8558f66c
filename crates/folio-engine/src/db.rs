//! SQLite persistence for documents, blocks, versions, revisions, and snapshots.
//!
//! Everything here is row-level: inserts, selects, and pointer updates taking a
//! plain `&Connection` so they run unchanged inside a transaction or a
//! savepoint. Invariants live in the modules above this one.

use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use folio_types::{
    Block, BlockId, BlockVersion, DocRevision, DocSnapshot, DocStatus, Document, DocumentId, Page,
    Payload, PrincipalId, SortKey, VersionMap, WorkspaceId,
};
use parking_lot::{Mutex, MutexGuard};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, params};

use crate::config::StorageConfig;
use crate::error::{EngineError, Result};

const SCHEMA: &str = r#"
-- Document metadata plus the head pointer
CREATE TABLE IF NOT EXISTS documents (
    id TEXT PRIMARY KEY,
    workspace_id TEXT NOT NULL,
    title TEXT NOT NULL,
    head INTEGER NOT NULL,
    published_head INTEGER NOT NULL DEFAULT 0,
    root_block_id TEXT NOT NULL,
    status TEXT NOT NULL,
    created_by TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_documents_workspace ON documents(workspace_id, updated_at DESC);

CREATE TABLE IF NOT EXISTS doc_tags (
    doc_id TEXT NOT NULL,
    tag TEXT NOT NULL,
    PRIMARY KEY (doc_id, tag),
    FOREIGN KEY (doc_id) REFERENCES documents(id) ON DELETE CASCADE
);

-- Block pointer rows: the only mutable per-block state
CREATE TABLE IF NOT EXISTS blocks (
    id TEXT PRIMARY KEY,
    doc_id TEXT NOT NULL,
    block_type TEXT NOT NULL,
    latest_ver INTEGER NOT NULL,
    latest_at INTEGER NOT NULL,
    latest_by TEXT NOT NULL,
    deleted INTEGER NOT NULL DEFAULT 0,
    deleted_at INTEGER,
    deleted_by TEXT,
    FOREIGN KEY (doc_id) REFERENCES documents(id) ON DELETE CASCADE
);
CREATE INDEX IF NOT EXISTS idx_blocks_doc ON blocks(doc_id, deleted);

-- Write-once block versions
CREATE TABLE IF NOT EXISTS block_versions (
    block_id TEXT NOT NULL,
    doc_id TEXT NOT NULL,
    ver INTEGER NOT NULL,
    clock INTEGER NOT NULL,
    created_at INTEGER NOT NULL,
    author TEXT NOT NULL,
    parent_id TEXT,
    sort_key TEXT NOT NULL,
    indent INTEGER NOT NULL DEFAULT 0,
    collapsed INTEGER NOT NULL DEFAULT 0,
    payload TEXT NOT NULL,
    content_hash TEXT NOT NULL,
    plain_text TEXT NOT NULL,
    refs TEXT NOT NULL,
    deleted INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (block_id, ver),
    FOREIGN KEY (block_id) REFERENCES blocks(id) ON DELETE CASCADE
);
CREATE INDEX IF NOT EXISTS idx_versions_doc_clock ON block_versions(doc_id, clock);

CREATE TABLE IF NOT EXISTS doc_revisions (
    doc_id TEXT NOT NULL,
    doc_ver INTEGER NOT NULL,
    clock INTEGER NOT NULL,
    created_at INTEGER NOT NULL,
    author TEXT NOT NULL,
    message TEXT,
    op_summary TEXT NOT NULL,
    PRIMARY KEY (doc_id, doc_ver),
    FOREIGN KEY (doc_id) REFERENCES documents(id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS doc_snapshots (
    doc_id TEXT NOT NULL,
    doc_ver INTEGER NOT NULL,
    clock INTEGER NOT NULL,
    created_at INTEGER NOT NULL,
    versions TEXT NOT NULL,
    PRIMARY KEY (doc_id, doc_ver),
    FOREIGN KEY (doc_id) REFERENCES documents(id) ON DELETE CASCADE
);

-- Logical clock shared by versions and revisions (single row)
CREATE TABLE IF NOT EXISTS engine_clock (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    tick INTEGER NOT NULL
);
INSERT OR IGNORE INTO engine_clock (id, tick) VALUES (1, 0);
"#;

// =============================================================================
// Connection handling
// =============================================================================

enum Source {
    File {
        path: PathBuf,
        idle: Mutex<Vec<Connection>>,
    },
    Memory(Mutex<Connection>),
}

/// Database handle. Cheap to share behind an `Arc`.
pub struct Database {
    source: Source,
    busy_timeout: Duration,
    pool_size: usize,
}

/// A connection borrowed from the [`Database`].
///
/// File connections return to the idle pool on drop; the in-memory database
/// has exactly one connection, held under its mutex for the guard's lifetime.
pub enum DbConn<'a> {
    Pooled {
        conn: Option<Connection>,
        db: &'a Database,
    },
    Shared(MutexGuard<'a, Connection>),
}

impl Deref for DbConn<'_> {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        match self {
            DbConn::Pooled { conn: Some(c), .. } => c,
            DbConn::Pooled { conn: None, .. } => unreachable!("pooled connection already released"),
            DbConn::Shared(guard) => &**guard,
        }
    }
}

impl DerefMut for DbConn<'_> {
    fn deref_mut(&mut self) -> &mut Connection {
        match self {
            DbConn::Pooled { conn: Some(c), .. } => c,
            DbConn::Pooled { conn: None, .. } => unreachable!("pooled connection already released"),
            DbConn::Shared(guard) => &mut **guard,
        }
    }
}

impl Drop for DbConn<'_> {
    fn drop(&mut self) {
        if let DbConn::Pooled { conn, db } = self {
            if let (Some(conn), Source::File { idle, .. }) = (conn.take(), &db.source) {
                let mut idle = idle.lock();
                if idle.len() < db.pool_size {
                    idle.push(conn);
                }
            }
        }
    }
}

impl Database {
    /// Open or create a database file.
    pub fn open<P: AsRef<Path>>(path: P, storage: &StorageConfig) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let db = Self {
            source: Source::File {
                path: path.clone(),
                idle: Mutex::new(Vec::new()),
            },
            busy_timeout: storage.busy_timeout(),
            pool_size: storage.pool_size.max(1),
        };
        let conn = db.connect_file(&path)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))?;
        conn.execute_batch(SCHEMA)?;
        if let Source::File { idle, .. } = &db.source {
            idle.lock().push(conn);
        }
        tracing::debug!(path = %path.display(), "opened database");
        Ok(db)
    }

    /// Create an in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            source: Source::Memory(Mutex::new(conn)),
            busy_timeout: Duration::ZERO,
            pool_size: 1,
        })
    }

    /// Borrow a connection.
    pub fn conn(&self) -> Result<DbConn<'_>> {
        match &self.source {
            Source::Memory(conn) => Ok(DbConn::Shared(conn.lock())),
            Source::File { path, idle } => {
                let reused = idle.lock().pop();
                let conn = match reused {
                    Some(conn) => conn,
                    None => self.connect_file(path)?,
                };
                Ok(DbConn::Pooled {
                    conn: Some(conn),
                    db: self,
                })
            }
        }
    }

    fn connect_file(&self, path: &Path) -> Result<Connection> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(self.busy_timeout)?;
        conn.execute_batch("PRAGMA foreign_keys = ON; PRAGMA synchronous = NORMAL;")?;
        Ok(conn)
    }
}

// =============================================================================
// Logical clock
// =============================================================================

/// Advance the logical clock and return the new value.
pub fn tick_clock(conn: &Connection) -> Result<u64> {
    let tick: i64 = conn.query_row(
        "UPDATE engine_clock SET tick = tick + 1 WHERE id = 1 RETURNING tick",
        [],
        |row| row.get(0),
    )?;
    Ok(tick as u64)
}

pub fn current_clock(conn: &Connection) -> Result<u64> {
    let tick: i64 = conn.query_row("SELECT tick FROM engine_clock WHERE id = 1", [], |row| {
        row.get(0)
    })?;
    Ok(tick as u64)
}

// =============================================================================
// Column helpers
// =============================================================================

fn parsed<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let s: String = row.get(idx)?;
    s.parse::<T>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn parsed_opt<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let s: Option<String> = row.get(idx)?;
    s.map(|s| {
        s.parse::<T>()
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
    })
    .transpose()
}

fn json_col<T: serde::de::DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let s: String = row.get(idx)?;
    serde_json::from_str(&s)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

// =============================================================================
// Documents
// =============================================================================

const DOCUMENT_COLUMNS: &str = "id, workspace_id, title, head, published_head, root_block_id, \
     status, created_by, created_at, updated_at";

fn row_to_document(row: &Row<'_>) -> rusqlite::Result<Document> {
    let status: String = row.get(6)?;
    Ok(Document {
        id: parsed(row, 0)?,
        workspace_id: parsed::<WorkspaceId>(row, 1)?,
        title: row.get(2)?,
        head: row.get::<_, i64>(3)? as u64,
        published_head: row.get::<_, i64>(4)? as u64,
        root_block_id: parsed(row, 5)?,
        status: DocStatus::from_str(&status).unwrap_or_default(),
        tags: Vec::new(),
        created_by: parsed(row, 7)?,
        created_at_ms: row.get::<_, i64>(8)? as u64,
        updated_at_ms: row.get::<_, i64>(9)? as u64,
    })
}

pub fn insert_document(conn: &Connection, doc: &Document) -> Result<()> {
    conn.execute(
        "INSERT INTO documents (id, workspace_id, title, head, published_head, root_block_id,
                                status, created_by, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            doc.id.to_hex(),
            doc.workspace_id.to_hex(),
            doc.title,
            doc.head as i64,
            doc.published_head as i64,
            doc.root_block_id.to_hex(),
            doc.status.as_str(),
            doc.created_by.to_hex(),
            doc.created_at_ms as i64,
            doc.updated_at_ms as i64,
        ],
    )?;
    replace_tags(conn, doc.id, &doc.tags)
}

pub fn select_document(conn: &Connection, id: DocumentId) -> Result<Option<Document>> {
    let doc = conn
        .query_row(
            &format!("SELECT {DOCUMENT_COLUMNS} FROM documents WHERE id = ?1"),
            params![id.to_hex()],
            row_to_document,
        )
        .optional()?;
    match doc {
        Some(mut doc) => {
            doc.tags = select_tags(conn, id)?;
            Ok(Some(doc))
        }
        None => Ok(None),
    }
}

pub fn select_documents(conn: &Connection, workspace_id: WorkspaceId) -> Result<Vec<Document>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {DOCUMENT_COLUMNS} FROM documents
         WHERE workspace_id = ?1 AND status != 'deleted'
         ORDER BY updated_at DESC"
    ))?;
    let docs = stmt
        .query_map(params![workspace_id.to_hex()], row_to_document)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    docs.into_iter()
        .map(|mut doc| {
            doc.tags = select_tags(conn, doc.id)?;
            Ok(doc)
        })
        .collect()
}

pub fn update_head(conn: &Connection, id: DocumentId, head: u64, now_ms: u64) -> Result<()> {
    conn.execute(
        "UPDATE documents SET head = ?2, updated_at = ?3 WHERE id = ?1",
        params![id.to_hex(), head as i64, now_ms as i64],
    )?;
    Ok(())
}

pub fn update_status(conn: &Connection, id: DocumentId, status: DocStatus, now_ms: u64) -> Result<()> {
    conn.execute(
        "UPDATE documents SET status = ?2, updated_at = ?3 WHERE id = ?1",
        params![id.to_hex(), status.as_str(), now_ms as i64],
    )?;
    Ok(())
}

pub fn update_published_head(conn: &Connection, id: DocumentId, published: u64, now_ms: u64) -> Result<()> {
    conn.execute(
        "UPDATE documents SET published_head = ?2, updated_at = ?3 WHERE id = ?1",
        params![id.to_hex(), published as i64, now_ms as i64],
    )?;
    Ok(())
}

pub fn select_tags(conn: &Connection, id: DocumentId) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT tag FROM doc_tags WHERE doc_id = ?1 ORDER BY tag")?;
    let tags = stmt
        .query_map(params![id.to_hex()], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<String>>>()?;
    Ok(tags)
}

pub fn replace_tags(conn: &Connection, id: DocumentId, tags: &[String]) -> Result<()> {
    conn.execute("DELETE FROM doc_tags WHERE doc_id = ?1", params![id.to_hex()])?;
    let mut stmt = conn.prepare("INSERT OR IGNORE INTO doc_tags (doc_id, tag) VALUES (?1, ?2)")?;
    for tag in tags {
        stmt.execute(params![id.to_hex(), tag])?;
    }
    Ok(())
}

// =============================================================================
// Block pointers
// =============================================================================

const BLOCK_COLUMNS: &str =
    "id, doc_id, block_type, latest_ver, latest_at, latest_by, deleted, deleted_at, deleted_by";

fn row_to_block(row: &Row<'_>) -> rusqlite::Result<Block> {
    Ok(Block {
        id: parsed(row, 0)?,
        doc_id: parsed(row, 1)?,
        block_type: row.get(2)?,
        latest_ver: row.get::<_, i64>(3)? as u64,
        latest_at: row.get::<_, i64>(4)? as u64,
        latest_by: parsed(row, 5)?,
        deleted: row.get(6)?,
        deleted_at: row.get::<_, Option<i64>>(7)?.map(|v| v as u64),
        deleted_by: parsed_opt::<PrincipalId>(row, 8)?,
    })
}

pub fn insert_block(conn: &Connection, block: &Block) -> Result<()> {
    conn.execute(
        "INSERT INTO blocks (id, doc_id, block_type, latest_ver, latest_at, latest_by,
                             deleted, deleted_at, deleted_by)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            block.id.to_hex(),
            block.doc_id.to_hex(),
            block.block_type,
            block.latest_ver as i64,
            block.latest_at as i64,
            block.latest_by.to_hex(),
            block.deleted,
            block.deleted_at.map(|v| v as i64),
            block.deleted_by.map(|p| p.to_hex()),
        ],
    )?;
    Ok(())
}

pub fn select_block(conn: &Connection, id: BlockId) -> Result<Option<Block>> {
    let block = conn
        .query_row(
            &format!("SELECT {BLOCK_COLUMNS} FROM blocks WHERE id = ?1"),
            params![id.to_hex()],
            row_to_block,
        )
        .optional()?;
    Ok(block)
}

/// Point a block at `version`. The pointer only ever moves forward.
///
/// Returns an error if the stored pointer is not exactly `version.ver - 1`.
pub fn advance_pointer(conn: &Connection, version: &BlockVersion) -> Result<()> {
    let (deleted_at, deleted_by) = if version.deleted {
        (Some(version.clock as i64), Some(version.author.to_hex()))
    } else {
        (None, None)
    };
    let updated = conn.execute(
        "UPDATE blocks
         SET latest_ver = ?2, latest_at = ?3, latest_by = ?4,
             deleted = ?5, deleted_at = ?6, deleted_by = ?7
         WHERE id = ?1 AND latest_ver = ?2 - 1",
        params![
            version.block_id.to_hex(),
            version.ver as i64,
            version.clock as i64,
            version.author.to_hex(),
            version.deleted,
            deleted_at,
            deleted_by,
        ],
    )?;
    if updated != 1 {
        return Err(EngineError::Conflict(format!(
            "block {} pointer moved underneath version {}",
            version.block_id, version.ver
        )));
    }
    Ok(())
}

// =============================================================================
// Block versions
// =============================================================================

const VERSION_COLUMNS: &str = "v.block_id, v.doc_id, v.ver, v.clock, v.created_at, v.author, \
     v.parent_id, v.sort_key, v.indent, v.collapsed, v.payload, v.content_hash, v.plain_text, \
     v.refs, v.deleted";

fn row_to_version(row: &Row<'_>) -> rusqlite::Result<BlockVersion> {
    let payload: String = row.get(10)?;
    Ok(BlockVersion {
        block_id: parsed(row, 0)?,
        doc_id: parsed(row, 1)?,
        ver: row.get::<_, i64>(2)? as u64,
        clock: row.get::<_, i64>(3)? as u64,
        created_at_ms: row.get::<_, i64>(4)? as u64,
        author: parsed(row, 5)?,
        parent_id: parsed_opt::<BlockId>(row, 6)?,
        sort_key: parsed::<SortKey>(row, 7)?,
        indent: row.get(8)?,
        collapsed: row.get(9)?,
        payload: Payload::from_json(&payload)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(10, Type::Text, Box::new(e)))?,
        content_hash: row.get(11)?,
        plain_text: row.get(12)?,
        refs: json_col(row, 13)?,
        deleted: row.get(14)?,
    })
}

/// Insert a write-once version row. A duplicate `(block_id, ver)` fails with
/// a unique-constraint error, which the coordinator retries.
pub fn insert_version(conn: &Connection, v: &BlockVersion) -> Result<()> {
    conn.execute(
        "INSERT INTO block_versions (block_id, doc_id, ver, clock, created_at, author,
                                     parent_id, sort_key, indent, collapsed, payload,
                                     content_hash, plain_text, refs, deleted)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
        params![
            v.block_id.to_hex(),
            v.doc_id.to_hex(),
            v.ver as i64,
            v.clock as i64,
            v.created_at_ms as i64,
            v.author.to_hex(),
            v.parent_id.map(|p| p.to_hex()),
            v.sort_key.to_string(),
            v.indent,
            v.collapsed,
            v.payload.to_canonical_json(),
            v.content_hash,
            v.plain_text,
            serde_json::to_string(&v.refs)?,
            v.deleted,
        ],
    )?;
    Ok(())
}

pub fn select_version(conn: &Connection, block_id: BlockId, ver: u64) -> Result<Option<BlockVersion>> {
    let v = conn
        .query_row(
            &format!("SELECT {VERSION_COLUMNS} FROM block_versions v WHERE v.block_id = ?1 AND v.ver = ?2"),
            params![block_id.to_hex(), ver as i64],
            row_to_version,
        )
        .optional()?;
    Ok(v)
}

/// Versions of one block, newest first.
pub fn select_version_history(conn: &Connection, block_id: BlockId, page: Page) -> Result<Vec<BlockVersion>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {VERSION_COLUMNS} FROM block_versions v
         WHERE v.block_id = ?1 ORDER BY v.ver DESC LIMIT ?2 OFFSET ?3"
    ))?;
    let rows = stmt
        .query_map(
            params![block_id.to_hex(), page.limit as i64, page.offset as i64],
            row_to_version,
        )?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

/// Current versions of the live children of `parent_id`, unordered.
pub fn select_live_children(
    conn: &Connection,
    doc_id: DocumentId,
    parent_id: BlockId,
) -> Result<Vec<BlockVersion>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {VERSION_COLUMNS} FROM blocks b
         JOIN block_versions v ON v.block_id = b.id AND v.ver = b.latest_ver
         WHERE b.doc_id = ?1 AND b.deleted = 0 AND v.parent_id = ?2"
    ))?;
    let rows = stmt
        .query_map(params![doc_id.to_hex(), parent_id.to_hex()], row_to_version)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

/// Parent of a block's current version.
///
/// `None` if the block does not exist, `Some(None)` for a root.
pub fn select_current_parent(conn: &Connection, block_id: BlockId) -> Result<Option<Option<BlockId>>> {
    let parent = conn
        .query_row(
            "SELECT v.parent_id FROM blocks b
             JOIN block_versions v ON v.block_id = b.id AND v.ver = b.latest_ver
             WHERE b.id = ?1",
            params![block_id.to_hex()],
            |row| parsed_opt::<BlockId>(row, 0),
        )
        .optional()?;
    Ok(parent)
}

/// `{block → latest_ver}` for every live block of a document.
pub fn select_live_pointers(conn: &Connection, doc_id: DocumentId) -> Result<VersionMap> {
    let mut stmt = conn.prepare("SELECT id, latest_ver FROM blocks WHERE doc_id = ?1 AND deleted = 0")?;
    let rows = stmt
        .query_map(params![doc_id.to_hex()], |row| {
            Ok((parsed::<BlockId>(row, 0)?, row.get::<_, i64>(1)? as u64))
        })?
        .collect::<rusqlite::Result<VersionMap>>()?;
    Ok(rows)
}

/// Every block pointer of a document, deleted ones included.
pub fn select_blocks(conn: &Connection, doc_id: DocumentId) -> Result<Vec<Block>> {
    let mut stmt = conn.prepare(&format!("SELECT {BLOCK_COLUMNS} FROM blocks WHERE doc_id = ?1"))?;
    let rows = stmt
        .query_map(params![doc_id.to_hex()], row_to_block)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

/// One entry of the version log: which version a block reached at which tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionStamp {
    pub block_id: BlockId,
    pub ver: u64,
    pub deleted: bool,
}

/// Version stamps of a document with `after < clock ≤ upto`, in clock order.
pub fn select_stamps_between(
    conn: &Connection,
    doc_id: DocumentId,
    after: u64,
    upto: u64,
) -> Result<Vec<VersionStamp>> {
    let mut stmt = conn.prepare(
        "SELECT block_id, ver, deleted FROM block_versions
         WHERE doc_id = ?1 AND clock > ?2 AND clock <= ?3
         ORDER BY clock ASC",
    )?;
    let rows = stmt
        .query_map(params![doc_id.to_hex(), after as i64, upto as i64], |row| {
            Ok(VersionStamp {
                block_id: parsed(row, 0)?,
                ver: row.get::<_, i64>(1)? as u64,
                deleted: row.get(2)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

/// Newest version of a block with `clock ≤ upto`, as `(ver, deleted)`.
pub fn select_stamp_at(conn: &Connection, block_id: BlockId, upto: u64) -> Result<Option<(u64, bool)>> {
    let stamp = conn
        .query_row(
            "SELECT ver, deleted FROM block_versions
             WHERE block_id = ?1 AND clock <= ?2 ORDER BY ver DESC LIMIT 1",
            params![block_id.to_hex(), upto as i64],
            |row| Ok((row.get::<_, i64>(0)? as u64, row.get::<_, bool>(1)?)),
        )
        .optional()?;
    Ok(stamp)
}

/// A version joined with its block's type tag.
#[derive(Debug, Clone, PartialEq)]
pub struct TypedVersion {
    pub block_type: String,
    pub version: BlockVersion,
}

/// Load the exact versions named by `map`.
pub fn select_mapped_versions(conn: &Connection, map: &VersionMap) -> Result<Vec<TypedVersion>> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT b.block_type, {VERSION_COLUMNS} FROM block_versions v
         JOIN blocks b ON b.id = v.block_id
         WHERE v.block_id = ?1 AND v.ver = ?2"
    ))?;
    let mut out = Vec::with_capacity(map.len());
    for (block_id, ver) in map {
        let found = stmt
            .query_row(params![block_id.to_hex(), *ver as i64], |row| {
                let block_type: String = row.get(0)?;
                let version = row_to_version_offset(row)?;
                Ok(TypedVersion { block_type, version })
            })
            .optional()?;
        match found {
            Some(tv) => out.push(tv),
            None => {
                return Err(EngineError::Internal(format!(
                    "version map names missing version {}",
                    folio_types::version_id(*block_id, *ver)
                )));
            }
        }
    }
    Ok(out)
}

// Same as `row_to_version` with the columns shifted by one (block_type first).
fn row_to_version_offset(row: &Row<'_>) -> rusqlite::Result<BlockVersion> {
    let payload: String = row.get(11)?;
    Ok(BlockVersion {
        block_id: parsed(row, 1)?,
        doc_id: parsed(row, 2)?,
        ver: row.get::<_, i64>(3)? as u64,
        clock: row.get::<_, i64>(4)? as u64,
        created_at_ms: row.get::<_, i64>(5)? as u64,
        author: parsed(row, 6)?,
        parent_id: parsed_opt::<BlockId>(row, 7)?,
        sort_key: parsed::<SortKey>(row, 8)?,
        indent: row.get(9)?,
        collapsed: row.get(10)?,
        payload: Payload::from_json(&payload)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(11, Type::Text, Box::new(e)))?,
        content_hash: row.get(12)?,
        plain_text: row.get(13)?,
        refs: json_col(row, 14)?,
        deleted: row.get(15)?,
    })
}

// =============================================================================
// Revisions
// =============================================================================

const REVISION_COLUMNS: &str = "doc_id, doc_ver, clock, created_at, author, message, op_summary";

fn row_to_revision(row: &Row<'_>) -> rusqlite::Result<DocRevision> {
    Ok(DocRevision {
        doc_id: parsed(row, 0)?,
        doc_ver: row.get::<_, i64>(1)? as u64,
        clock: row.get::<_, i64>(2)? as u64,
        created_at_ms: row.get::<_, i64>(3)? as u64,
        author: parsed(row, 4)?,
        message: row.get(5)?,
        op_summary: json_col(row, 6)?,
    })
}

pub fn insert_revision(conn: &Connection, rev: &DocRevision) -> Result<()> {
    conn.execute(
        "INSERT INTO doc_revisions (doc_id, doc_ver, clock, created_at, author, message, op_summary)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            rev.doc_id.to_hex(),
            rev.doc_ver as i64,
            rev.clock as i64,
            rev.created_at_ms as i64,
            rev.author.to_hex(),
            rev.message,
            serde_json::to_string(&rev.op_summary)?,
        ],
    )?;
    Ok(())
}

pub fn select_revision(conn: &Connection, doc_id: DocumentId, doc_ver: u64) -> Result<Option<DocRevision>> {
    let rev = conn
        .query_row(
            &format!("SELECT {REVISION_COLUMNS} FROM doc_revisions WHERE doc_id = ?1 AND doc_ver = ?2"),
            params![doc_id.to_hex(), doc_ver as i64],
            row_to_revision,
        )
        .optional()?;
    Ok(rev)
}

/// Revisions of a document, newest first.
pub fn select_revisions(conn: &Connection, doc_id: DocumentId, page: Page) -> Result<Vec<DocRevision>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {REVISION_COLUMNS} FROM doc_revisions
         WHERE doc_id = ?1 ORDER BY doc_ver DESC LIMIT ?2 OFFSET ?3"
    ))?;
    let rows = stmt
        .query_map(
            params![doc_id.to_hex(), page.limit as i64, page.offset as i64],
            row_to_revision,
        )?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

// =============================================================================
// Snapshots
// =============================================================================

fn row_to_snapshot(row: &Row<'_>) -> rusqlite::Result<DocSnapshot> {
    Ok(DocSnapshot {
        doc_id: parsed(row, 0)?,
        doc_ver: row.get::<_, i64>(1)? as u64,
        clock: row.get::<_, i64>(2)? as u64,
        created_at_ms: row.get::<_, i64>(3)? as u64,
        versions: json_col(row, 4)?,
    })
}

/// Insert a snapshot unless one exists for `(doc_id, doc_ver)`.
///
/// Returns whether a row was written.
pub fn insert_snapshot(conn: &Connection, snap: &DocSnapshot) -> Result<bool> {
    let written = conn.execute(
        "INSERT OR IGNORE INTO doc_snapshots (doc_id, doc_ver, clock, created_at, versions)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            snap.doc_id.to_hex(),
            snap.doc_ver as i64,
            snap.clock as i64,
            snap.created_at_ms as i64,
            serde_json::to_string(&snap.versions)?,
        ],
    )?;
    Ok(written == 1)
}

/// Newest snapshot at or before `doc_ver`.
pub fn select_snapshot_at_or_before(
    conn: &Connection,
    doc_id: DocumentId,
    doc_ver: u64,
) -> Result<Option<DocSnapshot>> {
    let snap = conn
        .query_row(
            "SELECT doc_id, doc_ver, clock, created_at, versions FROM doc_snapshots
             WHERE doc_id = ?1 AND doc_ver <= ?2 ORDER BY doc_ver DESC LIMIT 1",
            params![doc_id.to_hex(), doc_ver as i64],
            row_to_snapshot,
        )
        .optional()?;
    Ok(snap)
}

pub fn count_snapshots(conn: &Connection, doc_id: DocumentId) -> Result<u64> {
    let n: i64 = conn.query_row(
        "SELECT COUNT(*) FROM doc_snapshots WHERE doc_id = ?1",
        params![doc_id.to_hex()],
        |row| row.get(0),
    )?;
    Ok(n as u64)
}
