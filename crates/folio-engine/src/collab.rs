//! Collaborator seams: access policy and tag registry.
//!
//! The engine performs no authorization itself. Transport layers (the CLI
//! here) call [`authorize`] before entering it.

use std::collections::HashSet;

use dashmap::DashMap;
use folio_types::{Document, PrincipalId, WorkspaceId};
use parking_lot::RwLock;
use thiserror::Error;

use crate::error::{EngineError, Result};

/// Outcome of an access check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessDecision {
    Allow,
    Forbidden,
    /// Hide the document's existence from the caller.
    NotFound,
}

/// Which permission an operation needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Read,
    Edit,
    Admin,
}

pub trait AccessPolicy: Send + Sync {
    fn check_document_access(&self, doc: &Document, principal: PrincipalId) -> AccessDecision;
    fn check_edit_permission(&self, doc: &Document, principal: PrincipalId) -> AccessDecision;
    fn check_admin_permission(&self, doc: &Document, principal: PrincipalId) -> AccessDecision;
}

/// Grants everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAll;

impl AccessPolicy for AllowAll {
    fn check_document_access(&self, _doc: &Document, _principal: PrincipalId) -> AccessDecision {
        AccessDecision::Allow
    }

    fn check_edit_permission(&self, _doc: &Document, _principal: PrincipalId) -> AccessDecision {
        AccessDecision::Allow
    }

    fn check_admin_permission(&self, _doc: &Document, _principal: PrincipalId) -> AccessDecision {
        AccessDecision::Allow
    }
}

/// Anyone may read; only listed principals may edit or administer.
#[derive(Debug, Default)]
pub struct ReadOnlyExcept {
    editors: RwLock<HashSet<PrincipalId>>,
}

impl ReadOnlyExcept {
    pub fn new(editors: impl IntoIterator<Item = PrincipalId>) -> Self {
        Self {
            editors: RwLock::new(editors.into_iter().collect()),
        }
    }

    pub fn grant(&self, principal: PrincipalId) {
        self.editors.write().insert(principal);
    }
}

impl AccessPolicy for ReadOnlyExcept {
    fn check_document_access(&self, _doc: &Document, _principal: PrincipalId) -> AccessDecision {
        AccessDecision::Allow
    }

    fn check_edit_permission(&self, _doc: &Document, principal: PrincipalId) -> AccessDecision {
        if self.editors.read().contains(&principal) {
            AccessDecision::Allow
        } else {
            AccessDecision::Forbidden
        }
    }

    fn check_admin_permission(&self, doc: &Document, principal: PrincipalId) -> AccessDecision {
        self.check_edit_permission(doc, principal)
    }
}

/// Map a policy decision onto the engine's error taxonomy.
pub fn authorize(
    policy: &dyn AccessPolicy,
    action: Action,
    doc: &Document,
    principal: PrincipalId,
) -> Result<()> {
    let decision = match action {
        Action::Read => policy.check_document_access(doc, principal),
        Action::Edit => policy.check_edit_permission(doc, principal),
        Action::Admin => policy.check_admin_permission(doc, principal),
    };
    match decision {
        AccessDecision::Allow => Ok(()),
        AccessDecision::NotFound => Err(EngineError::DocumentNotFound(doc.id)),
        AccessDecision::Forbidden => {
            tracing::debug!(doc = %doc.id, %principal, action = action_name(action), "access denied");
            Err(EngineError::Forbidden {
                principal,
                action: action_name(action),
                doc_id: doc.id,
            })
        }
    }
}

fn action_name(action: Action) -> &'static str {
    match action {
        Action::Read => "read",
        Action::Edit => "edit",
        Action::Admin => "administer",
    }
}

// ============================================================================
// Tags
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TagError {
    #[error("unknown tag '{0}'")]
    Unknown(String),
    #[error("invalid tag '{0}'")]
    Invalid(String),
}

impl From<TagError> for EngineError {
    fn from(e: TagError) -> Self {
        EngineError::InvalidArgument(e.to_string())
    }
}

/// Validates tag ids and keeps per-workspace usage counters.
pub trait TagRegistry: Send + Sync {
    fn validate(&self, workspace_id: WorkspaceId, tags: &[String]) -> std::result::Result<(), TagError>;
    fn adjust_usage(&self, workspace_id: WorkspaceId, added: &[String], removed: &[String]);
}

/// In-process registry. With `open` set, unknown tags are registered on
/// first use; otherwise they must be defined up front.
#[derive(Debug, Default)]
pub struct InMemoryTags {
    open: bool,
    usage: DashMap<(WorkspaceId, String), i64>,
}

impl InMemoryTags {
    /// Registry accepting any well-formed tag.
    pub fn open() -> Self {
        Self {
            open: true,
            usage: DashMap::new(),
        }
    }

    /// Registry accepting only the tags in `known`.
    pub fn closed(workspace_id: WorkspaceId, known: &[&str]) -> Self {
        let usage = DashMap::new();
        for tag in known {
            usage.insert((workspace_id, tag.to_string()), 0);
        }
        Self { open: false, usage }
    }

    pub fn usage(&self, workspace_id: WorkspaceId, tag: &str) -> i64 {
        self.usage
            .get(&(workspace_id, tag.to_string()))
            .map(|n| *n)
            .unwrap_or(0)
    }
}

impl TagRegistry for InMemoryTags {
    fn validate(&self, workspace_id: WorkspaceId, tags: &[String]) -> std::result::Result<(), TagError> {
        for tag in tags {
            let tag = tag.trim();
            if tag.is_empty() || tag.chars().any(char::is_whitespace) {
                return Err(TagError::Invalid(tag.to_string()));
            }
            if !self.open && !self.usage.contains_key(&(workspace_id, tag.to_string())) {
                return Err(TagError::Unknown(tag.to_string()));
            }
        }
        Ok(())
    }

    fn adjust_usage(&self, workspace_id: WorkspaceId, added: &[String], removed: &[String]) {
        for tag in added {
            *self.usage.entry((workspace_id, tag.clone())).or_insert(0) += 1;
        }
        for tag in removed {
            if let Some(mut n) = self.usage.get_mut(&(workspace_id, tag.clone())) {
                *n = (*n - 1).max(0);
            }
        }
    }
}
