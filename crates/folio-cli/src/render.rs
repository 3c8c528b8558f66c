//! Plain-text rendering of trees, histories, and diffs.

use std::collections::BTreeMap;

use folio_engine::{TreeDiff, TreeNode, TreePage};
use folio_types::{BlockId, BlockVersion, DocRevision};

/// Format a tree page as ASCII tree lines.
pub fn format_tree(page: &TreePage) -> Vec<String> {
    let mut lines = Vec::new();
    format_node(&page.root, "", true, true, &mut lines);
    if let Some(next) = page.next_start_block_id {
        lines.push(format!("… more (resume with --from {})", next.to_prefixed()));
    }
    lines
}

fn format_node(node: &TreeNode, prefix: &str, is_last: bool, is_top: bool, lines: &mut Vec<String>) {
    let connector = if is_top {
        ""
    } else if is_last {
        "└─ "
    } else {
        "├─ "
    };
    let marker = match (node.context, node.collapsed) {
        (true, _) => "… ",
        (false, true) => "▸ ",
        (false, false) => "",
    };
    lines.push(format!(
        "{prefix}{connector}{marker}{} [{}] v{} \"{}\"",
        node.block_id.short(),
        node.block_type,
        node.ver,
        summary(&node.payload.plain_text(), 40)
    ));

    let child_prefix = if is_top {
        String::new()
    } else if is_last {
        format!("{prefix}   ")
    } else {
        format!("{prefix}│  ")
    };
    for (i, child) in node.children.iter().enumerate() {
        format_node(child, &child_prefix, i == node.children.len() - 1, false, lines);
    }
}

/// First line, trimmed and truncated to `max_chars`.
pub fn summary(content: &str, max_chars: usize) -> String {
    let first_line = content.lines().next().unwrap_or("");
    let trimmed = first_line.trim();

    if trimmed.chars().count() <= max_chars {
        trimmed.to_string()
    } else {
        let truncated: String = trimmed.chars().take(max_chars.saturating_sub(3)).collect();
        format!("{truncated}...")
    }
}

pub fn format_history(versions: &[BlockVersion]) -> Vec<String> {
    versions
        .iter()
        .map(|v| {
            let state = if v.deleted { " (deleted)" } else { "" };
            format!(
                "v{:<4} clock {:<6} by {} \"{}\"{state}",
                v.ver,
                v.clock,
                v.author.short(),
                summary(&v.plain_text, 50)
            )
        })
        .collect()
}

pub fn format_log(revisions: &[DocRevision]) -> Vec<String> {
    revisions
        .iter()
        .map(|r| {
            format!(
                "r{:<4} by {} {} {}",
                r.doc_ver,
                r.author.short(),
                r.message.as_deref().unwrap_or("-"),
                r.op_summary
            )
        })
        .collect()
}

/// Block-level changes between the two sides of a diff.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct DiffSummary {
    pub added: Vec<BlockId>,
    pub removed: Vec<BlockId>,
    /// Same block, different content.
    pub edited: Vec<BlockId>,
    /// Same block, different parent.
    pub moved: Vec<BlockId>,
}

pub fn diff_summary(diff: &TreeDiff) -> DiffSummary {
    let index = |page: &TreePage| -> BTreeMap<BlockId, (Option<BlockId>, String)> {
        page.root
            .walk()
            .map(|n| (n.block_id, (n.parent_id, n.payload.content_hash())))
            .collect()
    };
    let from = index(&diff.from);
    let to = index(&diff.to);

    let mut out = DiffSummary::default();
    for (id, (parent, hash)) in &to {
        match from.get(id) {
            None => out.added.push(*id),
            Some((old_parent, old_hash)) => {
                if old_hash != hash {
                    out.edited.push(*id);
                }
                if old_parent != parent {
                    out.moved.push(*id);
                }
            }
        }
    }
    out.removed = from.keys().filter(|id| !to.contains_key(id)).copied().collect();
    out
}

pub fn format_diff(diff: &TreeDiff) -> Vec<String> {
    let s = diff_summary(diff);
    let mut lines = Vec::new();
    for (sign, ids) in [("+", &s.added), ("-", &s.removed), ("~", &s.edited), (">", &s.moved)] {
        lines.extend(ids.iter().map(|id| format!("{sign} {}", id.to_prefixed())));
    }
    if lines.is_empty() {
        lines.push("no changes".to_string());
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_truncates() {
        assert_eq!(summary("short", 10), "short");
        assert_eq!(summary("first\nsecond", 10), "first");
        assert_eq!(summary("abcdefghijkl", 8), "abcde...");
    }
}
