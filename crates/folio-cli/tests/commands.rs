//! Drive the CLI through parsed argument vectors against a temp database.

use std::path::Path;

use clap::Parser;
use folio_cli::{Cli, open_engine, run};

/// Parse `args`, open the engine at `db`, run, and return stdout.
fn folio(db: &Path, args: &[&str]) -> anyhow::Result<String> {
    let mut argv = vec!["folio", "--db", db.to_str().unwrap(), "--config", "/nonexistent/engine.toml"];
    argv.extend_from_slice(args);
    let cli = Cli::try_parse_from(argv)?;
    let engine = open_engine(&cli)?;
    let mut out = Vec::new();
    run(&engine, &cli, &mut out)?;
    Ok(String::from_utf8(out)?)
}

fn first_line(s: &str) -> String {
    s.lines().next().unwrap().to_string()
}

#[test]
fn test_edit_history_and_time_travel() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("folio.db");

    let doc = first_line(&folio(&db, &["init", "notes"]).unwrap());
    assert!(doc.starts_with("doc_"));
    let a = first_line(&folio(&db, &["add", &doc, "alpha"]).unwrap());
    let b = first_line(&folio(&db, &["add", &doc, "beta", "--before", &a]).unwrap());
    assert_eq!(folio(&db, &["edit", &a, "alpha two"]).unwrap().trim(), "v2");
    assert!(folio(&db, &["edit", &a, "alpha two"]).unwrap().starts_with("unchanged"));

    let tree = folio(&db, &["tree", &doc]).unwrap();
    let lines: Vec<&str> = tree.lines().collect();
    assert_eq!(lines.len(), 3);
    assert!(lines[1].contains("beta"));
    assert!(lines[2].contains("alpha two"));

    let past = folio(&db, &["tree", &doc, "--at", "2"]).unwrap();
    assert!(past.contains("\"alpha\""));
    assert!(!past.contains("beta"));

    let history = folio(&db, &["history", &a]).unwrap();
    assert_eq!(history.lines().count(), 2);
    let log = folio(&db, &["log", &doc]).unwrap();
    assert!(log.lines().next().unwrap().starts_with("r4"));

    let diff = folio(&db, &["diff", &doc, "2", "4"]).unwrap();
    assert!(diff.contains(&format!("+ {b}")));
    assert!(diff.contains(&format!("~ {a}")));
}

#[test]
fn test_revert_and_errors() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("folio.db");
    let doc = first_line(&folio(&db, &["init", "notes"]).unwrap());
    let a = first_line(&folio(&db, &["add", &doc, "alpha"]).unwrap());
    folio(&db, &["rm", &a]).unwrap();

    let out = folio(&db, &["revert", &doc, "2"]).unwrap();
    assert!(out.starts_with("r4 reverted to r2"));
    assert!(folio(&db, &["tree", &doc]).unwrap().contains("alpha"));

    let err = folio(&db, &["revert", &doc, "4"]).unwrap_err();
    let engine_err = err.downcast_ref::<folio_engine::EngineError>().unwrap();
    assert_eq!(engine_err.kind(), folio_engine::ErrorKind::InvalidArgument);

    assert!(folio(&db, &["status", &doc, "bogus"]).is_err());
    assert_eq!(folio(&db, &["status", &doc, "archived"]).unwrap().trim(), "archived");
}

#[test]
fn test_import_commits_one_revision() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("folio.db");
    let doc = first_line(&folio(&db, &["init", "bulk"]).unwrap());

    let tree = folio(&db, &["tree", &doc, "--json"]).unwrap();
    let page: serde_json::Value = serde_json::from_str(&tree).unwrap();
    let root_id = page["root"]["block_id"].as_str().unwrap().to_string();

    let ops = serde_json::json!([
        { "op": "create", "parent_id": root_id, "block_type": "paragraph", "payload": { "text": "one" } },
        { "op": "create", "parent_id": root_id, "block_type": "paragraph", "payload": { "text": "two" } },
        { "op": "delete", "block_id": root_id },
        { "op": "create", "parent_id": root_id, "block_type": "paragraph", "payload": { "text": "three" } },
    ]);
    let file = dir.path().join("ops.json");
    std::fs::write(&file, ops.to_string()).unwrap();

    let out = folio(&db, &["import", &doc, file.to_str().unwrap(), "--chunk", "2"]).unwrap();
    assert!(out.contains("op 2 failed"));
    assert!(out.trim_end().ends_with("imported 3 ops as r2 (1 failed)"));
    assert_eq!(folio(&db, &["tree", &doc, "--at", "2"]).unwrap().lines().count(), 4);
}
