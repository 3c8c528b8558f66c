//! Tree reconstruction from a version map.
//!
//! A [`TreeIndex`] is an ephemeral parent → ordered-children index built from
//! the exact versions named by a `{block → ver}` map. Pages are cut from its
//! pre-order traversal (parent before children, siblings by numeric sort key
//! with block id as tie-break).
//!
//! # Pagination
//!
//! `limit` counts returned non-root nodes. The first page carries the real
//! root; a resumed page (`start_block_id`) wraps the rest of the pre-order in
//! synthesized ancestors marked `context: true`, which are never counted:
//!
//! ```text
//! page 1 (limit 3)        page 2 (cursor = B)
//! R                       R*
//! ├─ A                    ├─ B
//! │  └─ A1                └─ C
//! └─ A2                   (* = context)
//! ```
//!
//! Blocks whose parent is absent from the map (a deleted ancestor) are not
//! reachable from the root and are omitted.

use std::collections::{HashMap, HashSet};

use folio_types::{BlockId, Document, Payload, SortKey, VersionMap, sibling_order};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::db::{self, TypedVersion};
use crate::error::{EngineError, Result};

/// Options for one tree page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeQuery {
    /// Deepest level returned, measured from the root (0 = root only).
    pub max_depth: Option<u32>,
    /// Non-root nodes per page.
    pub limit: Option<usize>,
    /// Resume cursor from a previous page's `next_start_block_id`.
    pub start_block_id: Option<BlockId>,
}

impl TreeQuery {
    pub fn page(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            ..Self::default()
        }
    }

    pub fn resume(mut self, cursor: BlockId) -> Self {
        self.start_block_id = Some(cursor);
        self
    }

    pub fn depth(mut self, max_depth: u32) -> Self {
        self.max_depth = Some(max_depth);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeNode {
    pub block_id: BlockId,
    pub block_type: String,
    pub ver: u64,
    pub payload: Payload,
    pub parent_id: Option<BlockId>,
    pub sort_key: SortKey,
    pub indent: u32,
    pub collapsed: bool,
    pub depth: u32,
    /// Synthesized ancestor on a resumed page, not counted toward the limit.
    pub context: bool,
    pub children: Vec<TreeNode>,
}

impl TreeNode {
    /// Pre-order iteration over this node and its descendants.
    pub fn walk(&self) -> impl Iterator<Item = &TreeNode> {
        let mut stack = vec![self];
        std::iter::from_fn(move || {
            let node = stack.pop()?;
            stack.extend(node.children.iter().rev());
            Some(node)
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreePage {
    /// Revision the tree was resolved at; `None` for the live tree.
    pub doc_ver: Option<u64>,
    pub root: TreeNode,
    pub has_more: bool,
    pub next_start_block_id: Option<BlockId>,
    /// Non-context, non-root nodes on this page.
    pub returned: usize,
}

impl TreePage {
    /// Ids of the counted nodes on this page, in pre-order.
    pub fn returned_ids(&self) -> Vec<BlockId> {
        self.root
            .walk()
            .filter(|n| !n.context && n.parent_id.is_some())
            .map(|n| n.block_id)
            .collect()
    }
}

/// Parent → ordered children over one resolved version set.
#[derive(Debug, Clone)]
pub struct TreeIndex {
    root: BlockId,
    nodes: HashMap<BlockId, TypedVersion>,
    children: HashMap<BlockId, Vec<BlockId>>,
}

impl TreeIndex {
    pub fn build(root: BlockId, versions: Vec<TypedVersion>) -> Self {
        let nodes: HashMap<BlockId, TypedVersion> = versions
            .into_iter()
            .map(|tv| (tv.version.block_id, tv))
            .collect();

        let mut keyed: HashMap<BlockId, Vec<(SortKey, BlockId)>> = HashMap::new();
        for tv in nodes.values() {
            let v = &tv.version;
            if v.block_id == root {
                continue;
            }
            if let Some(parent) = v.parent_id.filter(|p| nodes.contains_key(p)) {
                keyed.entry(parent).or_default().push((v.sort_key, v.block_id));
            }
        }
        let children = keyed
            .into_iter()
            .map(|(parent, mut kids)| {
                kids.sort_by(|a, b| sibling_order(*a, *b));
                (parent, kids.into_iter().map(|(_, id)| id).collect())
            })
            .collect();

        Self {
            root,
            nodes,
            children,
        }
    }

    pub fn get(&self, id: &BlockId) -> Option<&TypedVersion> {
        self.nodes.get(id)
    }

    pub fn children_of(&self, id: &BlockId) -> &[BlockId] {
        self.children.get(id).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// `(block, depth)` in pre-order, root first, nothing deeper than `max_depth`.
    pub fn preorder(&self, max_depth: u32) -> Preorder<'_> {
        Preorder {
            index: self,
            stack: vec![(self.root, 0)],
            visited: HashSet::new(),
            max_depth,
        }
    }

    /// Ancestors of `id` from the root down to its parent.
    fn ancestors(&self, id: BlockId, ceiling: u32) -> Vec<BlockId> {
        let mut chain = Vec::new();
        let mut current = self.nodes.get(&id).and_then(|tv| tv.version.parent_id);
        while let Some(parent) = current {
            if chain.len() as u32 > ceiling {
                warn!("ancestor walk hit depth ceiling ({ceiling}), truncating");
                break;
            }
            chain.push(parent);
            if parent == self.root {
                break;
            }
            current = self.nodes.get(&parent).and_then(|tv| tv.version.parent_id);
        }
        chain.reverse();
        chain
    }

    /// Cut one page out of the pre-order.
    pub fn paginate(&self, query: &TreeQuery, ceiling: u32) -> Result<(TreeNode, PageCut)> {
        if query.limit == Some(0) {
            return Err(EngineError::invalid("tree page limit must be at least 1"));
        }
        let max_depth = query.max_depth.unwrap_or(ceiling).min(ceiling);
        let mut walk = self.preorder(max_depth);
        walk.next(); // root

        let mut emitted: Vec<(BlockId, u32)> = Vec::new();
        let cursor = query.start_block_id.filter(|c| *c != self.root);
        if let Some(cursor) = cursor {
            let found = walk.by_ref().find(|(id, _)| *id == cursor).ok_or_else(|| {
                EngineError::invalid(format!("cursor {cursor} is not in the tree within depth {max_depth}"))
            })?;
            emitted.push(found);
        }
        while query.limit.is_none_or(|l| emitted.len() < l) {
            match walk.next() {
                Some(entry) => emitted.push(entry),
                None => break,
            }
        }
        let next = if query.limit.is_some_and(|l| emitted.len() >= l) {
            walk.next().map(|(id, _)| id)
        } else {
            None
        };

        let mut entries: Vec<(BlockId, u32, bool)> = match (cursor, emitted.first()) {
            (Some(_), Some((first, _))) => self
                .ancestors(*first, ceiling)
                .into_iter()
                .enumerate()
                .map(|(depth, id)| (id, depth as u32, true))
                .collect(),
            _ => vec![(self.root, 0, false)],
        };
        entries.extend(emitted.iter().map(|(id, depth)| (*id, *depth, false)));

        let root = self.nest(&entries)?;
        let cut = PageCut {
            returned: emitted.len(),
            next_start_block_id: next,
        };
        debug!(returned = cut.returned, has_more = next.is_some(), "cut tree page");
        Ok((root, cut))
    }

    /// Assemble `entries` (each parent listed before its children) into a
    /// nested tree without recursion.
    fn nest(&self, entries: &[(BlockId, u32, bool)]) -> Result<TreeNode> {
        let position: HashMap<BlockId, usize> =
            entries.iter().enumerate().map(|(i, (id, _, _))| (*id, i)).collect();
        let mut kids: Vec<Vec<usize>> = vec![Vec::new(); entries.len()];
        let mut slots: Vec<Option<TreeNode>> = Vec::with_capacity(entries.len());

        for (i, (id, depth, context)) in entries.iter().enumerate() {
            let tv = self
                .nodes
                .get(id)
                .ok_or_else(|| EngineError::Internal(format!("tree entry {id} has no version")))?;
            if i > 0 {
                let parent = tv.version.parent_id.and_then(|p| position.get(&p)).ok_or_else(|| {
                    EngineError::Internal(format!("tree entry {id} listed before its parent"))
                })?;
                kids[*parent].push(i);
            }
            slots.push(Some(to_node(tv, *depth, *context)));
        }

        for i in (0..slots.len()).rev() {
            let children: Vec<TreeNode> = kids[i].iter().filter_map(|c| slots[*c].take()).collect();
            if let Some(node) = slots[i].as_mut() {
                node.children = children;
            }
        }
        slots
            .first_mut()
            .and_then(Option::take)
            .ok_or_else(|| EngineError::Internal("empty tree page".into()))
    }
}

/// Where a page stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageCut {
    pub returned: usize,
    pub next_start_block_id: Option<BlockId>,
}

fn to_node(tv: &TypedVersion, depth: u32, context: bool) -> TreeNode {
    let v = &tv.version;
    TreeNode {
        block_id: v.block_id,
        block_type: tv.block_type.clone(),
        ver: v.ver,
        payload: v.payload.clone(),
        parent_id: v.parent_id,
        sort_key: v.sort_key,
        indent: v.indent,
        collapsed: v.collapsed,
        depth,
        context,
        children: Vec::new(),
    }
}

pub struct Preorder<'a> {
    index: &'a TreeIndex,
    stack: Vec<(BlockId, u32)>,
    visited: HashSet<BlockId>,
    max_depth: u32,
}

impl Iterator for Preorder<'_> {
    type Item = (BlockId, u32);

    fn next(&mut self) -> Option<Self::Item> {
        while let Some((id, depth)) = self.stack.pop() {
            if !self.visited.insert(id) {
                continue; // cycle in stored data, skip
            }
            if depth < self.max_depth {
                for child in self.index.children_of(&id).iter().rev() {
                    self.stack.push((*child, depth + 1));
                }
            }
            return Some((id, depth));
        }
        None
    }
}

/// Reconstruct one page of the tree named by `map`.
pub fn reconstruct(
    conn: &Connection,
    doc: &Document,
    map: &VersionMap,
    doc_ver: Option<u64>,
    query: &TreeQuery,
    ceiling: u32,
) -> Result<TreePage> {
    if !map.contains_key(&doc.root_block_id) {
        return Err(match db::select_block(conn, doc.root_block_id)? {
            Some(root) if root.deleted => EngineError::RootDeleted {
                doc_id: doc.id,
                root_id: root.id,
            },
            _ => EngineError::RootMissing {
                doc_id: doc.id,
                root_id: doc.root_block_id,
            },
        });
    }
    let versions = db::select_mapped_versions(conn, map)?;
    let index = TreeIndex::build(doc.root_block_id, versions);
    let (root, cut) = index.paginate(query, ceiling)?;
    Ok(TreePage {
        doc_ver,
        root,
        has_more: cut.next_start_block_id.is_some(),
        next_start_block_id: cut.next_start_block_id,
        returned: cut.returned,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use folio_types::{BlockVersion, DocumentId, PrincipalId};

    struct Fixture {
        root: BlockId,
        versions: Vec<TypedVersion>,
    }

    impl Fixture {
        fn new() -> Self {
            let root = BlockId::new();
            let mut f = Self {
                root,
                versions: Vec::new(),
            };
            f.push(root, None, 0);
            f
        }

        fn push(&mut self, id: BlockId, parent: Option<BlockId>, key: i64) {
            self.versions.push(TypedVersion {
                block_type: if parent.is_none() { "root".into() } else { "p".into() },
                version: BlockVersion {
                    block_id: id,
                    doc_id: DocumentId::nil(),
                    ver: 1,
                    clock: 0,
                    created_at_ms: 0,
                    author: PrincipalId::system(),
                    parent_id: parent,
                    sort_key: SortKey::new(key),
                    indent: 0,
                    collapsed: false,
                    payload: Payload::empty(),
                    content_hash: String::new(),
                    plain_text: String::new(),
                    refs: Vec::new(),
                    deleted: false,
                },
            });
        }

        fn add(&mut self, parent: BlockId, key: i64) -> BlockId {
            let id = BlockId::new();
            self.push(id, Some(parent), key);
            id
        }

        fn index(&self) -> TreeIndex {
            TreeIndex::build(self.root, self.versions.clone())
        }
    }

    /// R ─ A(A1, A2) ─ B ─ C(C1)
    fn sample() -> (Fixture, [BlockId; 6]) {
        let mut f = Fixture::new();
        let r = f.root;
        let c = f.add(r, 300);
        let a = f.add(r, 100);
        let b = f.add(r, 200);
        let a2 = f.add(a, 20);
        let a1 = f.add(a, 10);
        let c1 = f.add(c, 1);
        (f, [a, a1, a2, b, c, c1])
    }

    #[test]
    fn test_full_preorder() {
        let (f, [a, a1, a2, b, c, c1]) = sample();
        let (root, cut) = f.index().paginate(&TreeQuery::default(), 512).unwrap();
        let order: Vec<BlockId> = root.walk().map(|n| n.block_id).collect();
        assert_eq!(order, vec![f.root, a, a1, a2, b, c, c1]);
        assert_eq!(cut.returned, 6);
        assert_eq!(cut.next_start_block_id, None);
        assert!(!root.context);
    }

    #[test]
    fn test_numeric_ordering_with_id_tiebreak() {
        let mut f = Fixture::new();
        let r = f.root;
        let big = f.add(r, 1000);
        let small = f.add(r, 900);
        let tie1 = f.add(r, 5);
        let tie2 = f.add(r, 5);
        let (lo, hi) = if tie1 < tie2 { (tie1, tie2) } else { (tie2, tie1) };
        let index = f.index();
        assert_eq!(index.children_of(&r), &[lo, hi, small, big]);
    }

    #[test]
    fn test_max_depth_excludes_deeper_nodes() {
        let (f, [a, _, _, b, c, _]) = sample();
        let (root, cut) = f.index().paginate(&TreeQuery::default().depth(1), 512).unwrap();
        let order: Vec<BlockId> = root.walk().map(|n| n.block_id).collect();
        assert_eq!(order, vec![f.root, a, b, c]);
        assert_eq!(cut.returned, 3);

        let (root, cut) = f.index().paginate(&TreeQuery::default().depth(0), 512).unwrap();
        assert!(root.children.is_empty());
        assert_eq!(cut.returned, 0);
    }

    #[test]
    fn test_pages_cover_tree_exactly_once() {
        let (f, ids) = sample();
        let index = f.index();
        for limit in 1..=7 {
            let mut seen = Vec::new();
            let mut query = TreeQuery::page(limit);
            let mut pages = 0;
            loop {
                let (root, cut) = index.paginate(&query, 512).unwrap();
                pages += 1;
                let page = TreePage {
                    doc_ver: None,
                    root,
                    has_more: cut.next_start_block_id.is_some(),
                    next_start_block_id: cut.next_start_block_id,
                    returned: cut.returned,
                };
                let got = page.returned_ids();
                assert_eq!(got.len(), page.returned);
                assert!(page.returned <= limit);
                seen.extend(got);
                match page.next_start_block_id {
                    Some(next) => query = TreeQuery::page(limit).resume(next),
                    None => break,
                }
            }
            assert_eq!(seen, ids.to_vec(), "limit {limit}");
            assert_eq!(pages, ids.len().div_ceil(limit), "limit {limit}");
        }
    }

    #[test]
    fn test_resumed_page_synthesizes_ancestors() {
        let (f, [a, a1, a2, b, _, _]) = sample();
        let index = f.index();
        let (_, cut) = index.paginate(&TreeQuery::page(2), 512).unwrap();
        assert_eq!(cut.next_start_block_id, Some(a2));

        let (root, cut) = index.paginate(&TreeQuery::page(2).resume(a2), 512).unwrap();
        assert!(root.context);
        assert_eq!(root.children.len(), 2);
        let a_node = &root.children[0];
        assert_eq!(a_node.block_id, a);
        assert!(a_node.context);
        assert_eq!(a_node.children.len(), 1);
        assert_eq!(a_node.children[0].block_id, a2);
        assert!(!a_node.children[0].context);
        assert_eq!(root.children[1].block_id, b);
        assert_eq!(cut.returned, 2);
        assert!(root.walk().all(|n| n.block_id != a1));
    }

    #[test]
    fn test_bad_cursor_and_zero_limit() {
        let (f, [_, a1, ..]) = sample();
        let index = f.index();
        assert!(matches!(
            index.paginate(&TreeQuery::page(2).resume(BlockId::new()), 512),
            Err(EngineError::InvalidArgument(_))
        ));
        // a1 is deeper than the requested depth
        assert!(matches!(
            index.paginate(&TreeQuery::page(2).depth(1).resume(a1), 512),
            Err(EngineError::InvalidArgument(_))
        ));
        assert!(matches!(index.paginate(&TreeQuery::page(0), 512), Err(EngineError::InvalidArgument(_))));
    }

    #[test]
    fn test_orphans_are_unreachable() {
        let mut f = Fixture::new();
        let r = f.root;
        let a = f.add(r, 1);
        f.add(BlockId::new(), 1); // parent not in map
        let (root, cut) = f.index().paginate(&TreeQuery::default(), 512).unwrap();
        assert_eq!(cut.returned, 1);
        assert_eq!(root.children[0].block_id, a);
    }

    #[test]
    fn test_ceiling_clamps_depth() {
        let mut f = Fixture::new();
        let mut parent = f.root;
        for _ in 0..10 {
            parent = f.add(parent, 1);
        }
        let (_, cut) = f.index().paginate(&TreeQuery::default().depth(100), 4).unwrap();
        assert_eq!(cut.returned, 4);
    }
}
