//! Typed identifiers for documents, blocks, principals, and workspaces.
//!
//! All ID types wrap UUIDv7 (time-ordered, globally unique). In storage they
//! are kept as 32-char simple hex; `Display` uses the hyphenated UUID form for
//! log readability and `short()` (first 8 hex chars) is for humans only,
//! never used as a lookup key.
//!
//! `new_id(kind)` produces the prefixed opaque string form (`doc_…`, `blk_…`)
//! used at the library boundary, and `version_id` / `revision_id` build the
//! deterministic composite strings that show up in logs. Lookups always go
//! through the composite key itself, not these strings.

use std::fmt;

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumIter, EnumString};

/// A document identifier (UUIDv7).
#[derive(Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(uuid::Uuid);

/// A block identifier (UUIDv7).
#[derive(Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlockId(uuid::Uuid);

/// A principal identifier (UUIDv7, or UUIDv5 for sentinels).
#[derive(Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PrincipalId(uuid::Uuid);

/// A workspace identifier (UUIDv7).
#[derive(Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkspaceId(uuid::Uuid);

// ── Shared behavior ─────────────────────────────────────────────────────────

macro_rules! impl_typed_id {
    ($T:ident, $name:literal, $kind:expr) => {
        impl $T {
            /// Create a new time-ordered ID (UUIDv7).
            pub fn new() -> Self {
                Self(uuid::Uuid::now_v7())
            }

            /// First 8 hex characters, for human display only (not lookup).
            pub fn short(&self) -> String {
                self.0.as_simple().to_string()[..8].to_string()
            }

            /// Full 32-character hex string (no hyphens). This is the storage form.
            pub fn to_hex(&self) -> String {
                self.0.as_simple().to_string()
            }

            /// Prefixed opaque form, e.g. `blk_0190c3…`.
            pub fn to_prefixed(&self) -> String {
                format!("{}_{}", $kind.prefix(), self.to_hex())
            }

            /// Parse from hex (32 chars), hyphenated UUID, or the prefixed form.
            pub fn parse(s: &str) -> Result<Self, IdError> {
                let raw = s
                    .strip_prefix($kind.prefix())
                    .and_then(|rest| rest.strip_prefix('_'))
                    .unwrap_or(s);
                uuid::Uuid::parse_str(raw)
                    .map(Self)
                    .map_err(|_| IdError::Malformed {
                        kind: $kind,
                        input: s.to_string(),
                    })
            }

            /// A nil / zero ID, for sentinel values only.
            pub fn nil() -> Self {
                Self(uuid::Uuid::nil())
            }

            /// Check if this is the nil ID.
            pub fn is_nil(&self) -> bool {
                self.0.is_nil()
            }
        }

        impl Default for $T {
            fn default() -> Self {
                Self::new()
            }
        }

        impl From<uuid::Uuid> for $T {
            fn from(u: uuid::Uuid) -> Self {
                Self(u)
            }
        }

        impl From<$T> for uuid::Uuid {
            fn from(id: $T) -> uuid::Uuid {
                id.0
            }
        }

        impl std::str::FromStr for $T {
            type Err = IdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }

        impl fmt::Display for $T {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl fmt::Debug for $T {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", $name, self.short())
            }
        }
    };
}

impl_typed_id!(DocumentId, "DocumentId", IdKind::Document);
impl_typed_id!(BlockId, "BlockId", IdKind::Block);
impl_typed_id!(PrincipalId, "PrincipalId", IdKind::Principal);
impl_typed_id!(WorkspaceId, "WorkspaceId", IdKind::Workspace);

// ── Entity kinds ────────────────────────────────────────────────────────────

/// The entity kinds that get generated identifiers.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, AsRefStr, EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum IdKind {
    Document,
    Block,
    Principal,
    Workspace,
}

impl IdKind {
    /// Short prefix used by the prefixed string form.
    pub fn prefix(&self) -> &'static str {
        match self {
            IdKind::Document => "doc",
            IdKind::Block => "blk",
            IdKind::Principal => "usr",
            IdKind::Workspace => "wsp",
        }
    }
}

impl fmt::Display for IdKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_ref())
    }
}

/// Error parsing an identifier.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdError {
    #[error("malformed {kind} id '{input}'")]
    Malformed { kind: IdKind, input: String },
}

/// Generate a fresh, collision-resistant opaque id for an entity kind.
pub fn new_id(kind: IdKind) -> String {
    format!("{}_{}", kind.prefix(), uuid::Uuid::now_v7().as_simple())
}

/// Deterministic composite id of one block version, for logging.
pub fn version_id(block_id: BlockId, ver: u64) -> String {
    format!("{}@v{}", block_id.to_hex(), ver)
}

/// Deterministic composite id of one document revision, for logging.
pub fn revision_id(doc_id: DocumentId, doc_ver: u64) -> String {
    format!("{}#r{}", doc_id.to_hex(), doc_ver)
}

// ── PrincipalId sentinels ───────────────────────────────────────────────────

/// Fixed namespace for deriving deterministic PrincipalIds via UUIDv5.
const FOLIO_PRINCIPAL_NS: uuid::Uuid = uuid::uuid!("4d1f7a9e-2c3b-4f60-8e15-b7a0c9d2e841");

impl PrincipalId {
    /// The well-known "system" principal.
    ///
    /// Authors engine-generated changes (rebalancing, sweeps, CLI without a user).
    /// Deterministic: same value every time (UUIDv5 derived from `b"system"`).
    pub fn system() -> Self {
        Self(uuid::Uuid::new_v5(&FOLIO_PRINCIPAL_NS, b"system"))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn test_new_is_unique() {
        let a = BlockId::new();
        let b = BlockId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn test_short_is_8_chars() {
        assert_eq!(DocumentId::new().short().len(), 8);
    }

    #[test]
    fn test_parse_all_forms() {
        let id = BlockId::new();
        assert_eq!(BlockId::parse(&id.to_hex()).unwrap(), id);
        assert_eq!(BlockId::parse(&id.to_string()).unwrap(), id);
        assert_eq!(BlockId::parse(&id.to_prefixed()).unwrap(), id);
        assert!(id.to_prefixed().starts_with("blk_"));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        let err = DocumentId::parse("doc_nothex").unwrap_err();
        assert!(err.to_string().contains("document"));
    }

    #[test]
    fn test_new_id_prefixes() {
        for kind in IdKind::iter() {
            let id = new_id(kind);
            assert!(id.starts_with(&format!("{}_", kind.prefix())));
            assert_eq!(id.len(), kind.prefix().len() + 1 + 32);
        }
        assert_ne!(new_id(IdKind::Block), new_id(IdKind::Block));
    }

    #[test]
    fn test_composite_ids_are_deterministic() {
        let block = BlockId::new();
        let doc = DocumentId::new();
        assert_eq!(version_id(block, 3), version_id(block, 3));
        assert_ne!(version_id(block, 3), version_id(block, 4));
        assert!(revision_id(doc, 7).ends_with("#r7"));
    }

    #[test]
    fn test_ordering_is_time_ordered() {
        let ids: Vec<BlockId> = (0..10).map(|_| BlockId::new()).collect();
        for i in 1..ids.len() {
            assert!(ids[i] >= ids[i - 1]);
        }
    }

    #[test]
    fn test_system_principal_is_deterministic() {
        assert_eq!(PrincipalId::system(), PrincipalId::system());
        assert_ne!(PrincipalId::system(), PrincipalId::new());
    }

    #[test]
    fn test_debug_shows_type_and_short() {
        let id = WorkspaceId::new();
        let debug = format!("{:?}", id);
        assert!(debug.starts_with("WorkspaceId("));
        assert_eq!(debug.len(), "WorkspaceId(".len() + 8 + 1);
    }

    #[test]
    fn test_serde_is_transparent() {
        let id = DocumentId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id));
        let back: DocumentId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
