//! `folio` command-line front end.
//!
//! Every command opens the engine, authorizes the caller against the
//! document, runs one engine operation, and prints the result.

pub mod render;

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use folio_engine::{
    Action, AllowAll, BatchOp, CommitMode, Engine, EngineConfig, InMemoryTags, MoveTo, NewBlock,
    OpOutcome, Placement, TreeQuery, authorize,
};
use folio_types::{BlockId, DocStatus, Document, DocumentId, Payload, PrincipalId, WorkspaceId};

/// Versioned block-tree documents.
#[derive(Parser, Debug)]
#[command(name = "folio", version, about = "Versioned block-tree documents")]
pub struct Cli {
    /// Database file (default: `$XDG_DATA_HOME/folio/folio.db`)
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    /// Engine config (default: `$XDG_CONFIG_HOME/folio/engine.toml`)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Acting principal (default: the system principal)
    #[arg(long = "as", global = true)]
    pub principal: Option<PrincipalId>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create a document
    Init {
        title: String,
        #[arg(long)]
        workspace: Option<WorkspaceId>,
    },
    /// List documents in a workspace
    Docs {
        #[arg(long)]
        workspace: Option<WorkspaceId>,
    },
    /// Add a block
    Add {
        doc: DocumentId,
        text: String,
        /// Parent block (default: the root)
        #[arg(long)]
        under: Option<BlockId>,
        #[arg(long = "type", default_value = "paragraph")]
        block_type: String,
        #[command(flatten)]
        place: PlaceArgs,
    },
    /// Replace a block's text
    Edit { block: BlockId, text: String },
    /// Move a block under a new parent
    Mv {
        block: BlockId,
        parent: BlockId,
        #[command(flatten)]
        place: PlaceArgs,
    },
    /// Soft-delete a block
    Rm { block: BlockId },
    /// Undo a soft delete
    Restore { block: BlockId },
    /// Collapse or expand a block
    Collapse {
        block: BlockId,
        #[arg(long)]
        off: bool,
    },
    /// Print the tree, live or at a revision
    Tree {
        doc: DocumentId,
        #[arg(long)]
        at: Option<u64>,
        #[arg(long)]
        depth: Option<u32>,
        #[arg(long)]
        limit: Option<usize>,
        /// Resume cursor from a previous page
        #[arg(long)]
        from: Option<BlockId>,
        #[arg(long)]
        json: bool,
    },
    /// Version history of a block
    History {
        block: BlockId,
        #[arg(long)]
        limit: Option<u64>,
    },
    /// Revision log of a document
    Log {
        doc: DocumentId,
        #[arg(long)]
        limit: Option<u64>,
    },
    /// Revert a document to an earlier revision (appends a new one)
    Revert { doc: DocumentId, target: u64 },
    /// Compare two revisions
    Diff { doc: DocumentId, from: u64, to: u64 },
    /// Snapshot the current head
    Snapshot { doc: DocumentId },
    /// Apply a JSON array of batch operations
    Import {
        doc: DocumentId,
        file: PathBuf,
        /// Operations per deferred batch; all are committed as one revision
        #[arg(long, default_value_t = 100)]
        chunk: usize,
    },
    /// Mark the head revision as published
    Publish { doc: DocumentId },
    /// Change lifecycle status (draft, normal, archived, deleted)
    Status { doc: DocumentId, status: String },
    /// Replace a document's tags
    Tag { doc: DocumentId, tags: Vec<String> },
}

#[derive(Args, Debug, Default)]
pub struct PlaceArgs {
    #[arg(long, conflicts_with_all = ["after", "start"])]
    pub before: Option<BlockId>,
    #[arg(long, conflicts_with = "start")]
    pub after: Option<BlockId>,
    #[arg(long)]
    pub start: bool,
}

impl PlaceArgs {
    fn placement(&self) -> Placement {
        match (self.before, self.after, self.start) {
            (Some(anchor), _, _) => Placement::Before(anchor),
            (_, Some(anchor), _) => Placement::After(anchor),
            (_, _, true) => Placement::Start,
            _ => Placement::End,
        }
    }
}

pub fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("folio")
        .join("folio.db")
}

pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("folio")
        .join("engine.toml")
}

/// Open the engine named by the global flags.
pub fn open_engine(cli: &Cli) -> Result<Engine> {
    let config_path = cli.config.clone().unwrap_or_else(default_config_path);
    let config = EngineConfig::load(&config_path)
        .with_context(|| format!("loading config {}", config_path.display()))?;
    let db_path = cli.db.clone().unwrap_or_else(default_db_path);
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    tracing::debug!(db = %db_path.display(), "opening engine");
    Engine::open(&db_path, config).with_context(|| format!("opening {}", db_path.display()))
}

/// Run one command against `engine`, writing human output to `out`.
pub fn run(engine: &Engine, cli: &Cli, out: &mut dyn Write) -> Result<()> {
    let me = cli.principal.unwrap_or_else(PrincipalId::system);
    let policy = AllowAll;
    let doc_for = |doc_id: DocumentId, action: Action| -> Result<Document> {
        let doc = engine.get_document(doc_id)?;
        authorize(&policy, action, &doc, me)?;
        Ok(doc)
    };
    let block_doc = |block_id: BlockId, action: Action| -> Result<Document> {
        let (block, _) = engine.get_block(block_id)?;
        doc_for(block.doc_id, action)
    };
    let mode = CommitMode::Immediate;

    match &cli.command {
        Command::Init { title, workspace } => {
            let ws = workspace.unwrap_or_else(WorkspaceId::nil);
            let doc = engine.create_document(ws, title, Payload::empty(), me)?;
            writeln!(out, "{}", doc.id.to_prefixed())?;
            writeln!(out, "root {}", doc.root_block_id.to_prefixed())?;
        }
        Command::Docs { workspace } => {
            let ws = workspace.unwrap_or_else(WorkspaceId::nil);
            for doc in engine.list_documents(ws)? {
                writeln!(
                    out,
                    "{}  r{:<4} {:<8} {}",
                    doc.id.to_prefixed(),
                    doc.head,
                    doc.status.as_str(),
                    doc.title
                )?;
            }
        }
        Command::Add {
            doc,
            text,
            under,
            block_type,
            place,
        } => {
            let doc = doc_for(*doc, Action::Edit)?;
            let parent = under.unwrap_or(doc.root_block_id);
            let new = NewBlock::new(parent, block_type.as_str(), text_payload(text)).placed(place.placement());
            let outcome = engine.create_block(doc.id, new, me, mode)?;
            writeln!(out, "{}", outcome.version.block_id.to_prefixed())?;
        }
        Command::Edit { block, text } => {
            block_doc(*block, Action::Edit)?;
            let outcome = engine.update_block(*block, text_payload(text), me, mode)?;
            if outcome.changed {
                writeln!(out, "v{}", outcome.version.ver)?;
            } else {
                writeln!(out, "unchanged (v{})", outcome.version.ver)?;
            }
        }
        Command::Mv { block, parent, place } => {
            block_doc(*block, Action::Edit)?;
            let outcome = engine.move_block(*block, MoveTo::under(*parent, place.placement()), me, mode)?;
            writeln!(out, "v{}", outcome.version.ver)?;
        }
        Command::Rm { block } => {
            block_doc(*block, Action::Edit)?;
            let outcome = engine.delete_block(*block, me, mode)?;
            writeln!(out, "deleted (v{})", outcome.version.ver)?;
        }
        Command::Restore { block } => {
            let outcome = engine.restore_block(*block, me, mode)?;
            writeln!(out, "v{}", outcome.version.ver)?;
        }
        Command::Collapse { block, off } => {
            block_doc(*block, Action::Edit)?;
            let outcome = engine.set_collapsed(*block, !off, me, mode)?;
            writeln!(out, "v{}", outcome.version.ver)?;
        }
        Command::Tree {
            doc,
            at,
            depth,
            limit,
            from,
            json,
        } => {
            let doc = doc_for(*doc, Action::Read)?;
            let query = TreeQuery {
                max_depth: *depth,
                limit: *limit,
                start_block_id: *from,
            };
            let page = engine.tree(doc.id, *at, &query)?;
            if *json {
                writeln!(out, "{}", serde_json::to_string_pretty(&page)?)?;
            } else {
                for line in render::format_tree(&page) {
                    writeln!(out, "{line}")?;
                }
            }
        }
        Command::History { block, limit } => {
            block_doc(*block, Action::Read)?;
            let page = limit.map(folio_types::Page::first);
            for line in render::format_history(&engine.version_history(*block, page)?) {
                writeln!(out, "{line}")?;
            }
        }
        Command::Log { doc, limit } => {
            let doc = doc_for(*doc, Action::Read)?;
            let page = limit.map(folio_types::Page::first);
            for line in render::format_log(&engine.list_revisions(doc.id, page)?) {
                writeln!(out, "{line}")?;
            }
        }
        Command::Revert { doc, target } => {
            let doc = doc_for(*doc, Action::Admin)?;
            let (doc, stats) = engine.revert(doc.id, *target, me)?;
            writeln!(
                out,
                "r{} reverted to r{target}: {} reinstated, {} retired",
                doc.head, stats.reinstated, stats.retired
            )?;
        }
        Command::Diff { doc, from, to } => {
            let doc = doc_for(*doc, Action::Read)?;
            for line in render::format_diff(&engine.diff(doc.id, *from, *to)?) {
                writeln!(out, "{line}")?;
            }
        }
        Command::Snapshot { doc } => {
            let doc = doc_for(*doc, Action::Admin)?;
            let snap = engine.create_snapshot(doc.id)?;
            writeln!(out, "snapshot r{} ({} blocks)", snap.doc_ver, snap.versions.len())?;
        }
        Command::Import { doc, file, chunk } => {
            let doc = doc_for(*doc, Action::Edit)?;
            import(engine, &doc, file, *chunk, me, out)?;
        }
        Command::Publish { doc } => {
            let doc = doc_for(*doc, Action::Admin)?;
            let doc = engine.publish(doc.id, me)?;
            writeln!(out, "published r{}", doc.published_head)?;
        }
        Command::Status { doc, status } => {
            let Some(status) = DocStatus::from_str(status) else {
                bail!("unknown status '{status}'");
            };
            doc_for(*doc, Action::Admin)?;
            let doc = engine.set_status(*doc, status, me)?;
            writeln!(out, "{}", doc.status)?;
        }
        Command::Tag { doc, tags } => {
            let doc = doc_for(*doc, Action::Edit)?;
            let registry = InMemoryTags::open();
            let doc = engine.set_tags(doc.id, tags, &registry, me)?;
            writeln!(out, "{}", doc.tags.join(" "))?;
        }
    }
    Ok(())
}

fn text_payload(text: &str) -> Payload {
    Payload::new(serde_json::json!({ "text": text }))
}

/// Apply ops from a JSON file in deferred chunks, then commit once.
fn import(
    engine: &Engine,
    doc: &Document,
    file: &Path,
    chunk: usize,
    me: PrincipalId,
    out: &mut dyn Write,
) -> Result<()> {
    let raw = std::fs::read_to_string(file).with_context(|| format!("reading {}", file.display()))?;
    let ops: Vec<BatchOp> = serde_json::from_str(&raw).with_context(|| format!("parsing {}", file.display()))?;

    let mut failed = 0;
    for (n, ops) in ops.chunks(chunk.max(1)).enumerate() {
        let outcome = engine.batch(doc.id, ops, me, CommitMode::Deferred)?;
        for result in &outcome.results {
            if let OpOutcome::Failed { index, error } = result {
                failed += 1;
                writeln!(out, "op {} failed: {error}", n * chunk.max(1) + index)?;
            }
        }
    }
    match engine.commit_pending(doc.id, me, Some(format!("import {}", file.display())))? {
        Some(rev) => writeln!(out, "imported {} ops as r{} ({failed} failed)", ops.len() - failed, rev.doc_ver)?,
        None => writeln!(out, "nothing imported ({failed} failed)")?,
    }
    Ok(())
}
