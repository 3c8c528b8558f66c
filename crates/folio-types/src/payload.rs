//! Opaque block payloads.
//!
//! The engine never interprets a payload beyond three derived values: a
//! content hash (idempotence), flattened plain text (handed to search), and
//! the list of outgoing references. Decoding by block type is left to
//! presentation-layer collaborators.

use serde::{Deserialize, Serialize};

/// A block's content, kept as a JSON-like document.
///
/// Object keys are re-inserted in sorted order on construction, so the
/// canonical form does not depend on serde_json's `preserve_order` feature.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "serde_json::Value", into = "serde_json::Value")]
pub struct Payload(serde_json::Value);

impl Payload {
    pub fn new(value: serde_json::Value) -> Self {
        Self(sorted(value))
    }

    /// The empty object `{}`.
    pub fn empty() -> Self {
        Self(serde_json::Value::Object(Default::default()))
    }

    pub fn as_value(&self) -> &serde_json::Value {
        &self.0
    }

    pub fn into_value(self) -> serde_json::Value {
        self.0
    }

    /// Canonical serialized form (sorted keys, no whitespace).
    pub fn to_canonical_json(&self) -> String {
        self.0.to_string()
    }

    /// Parse a stored payload.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str::<serde_json::Value>(json).map(Self::new)
    }

    /// blake3 hash of the canonical form, hex encoded.
    pub fn content_hash(&self) -> String {
        hex::encode(blake3::hash(self.to_canonical_json().as_bytes()).as_bytes())
    }

    /// All string leaves joined with single spaces, in document order.
    pub fn plain_text(&self) -> String {
        let mut parts = Vec::new();
        collect_text(&self.0, &mut parts);
        parts.join(" ")
    }

    /// Values of every `ref` string field and every string inside a `refs`
    /// array, deduplicated in first-seen order (canonical key order).
    pub fn refs(&self) -> Vec<String> {
        let mut out = Vec::new();
        collect_refs(&self.0, &mut out);
        out
    }
}

impl From<serde_json::Value> for Payload {
    fn from(value: serde_json::Value) -> Self {
        Self::new(value)
    }
}

impl From<Payload> for serde_json::Value {
    fn from(payload: Payload) -> Self {
        payload.0
    }
}

fn sorted(value: serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            let mut entries: Vec<_> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            serde_json::Value::Object(entries.into_iter().map(|(k, v)| (k, sorted(v))).collect())
        }
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.into_iter().map(sorted).collect())
        }
        other => other,
    }
}

fn collect_text<'a>(value: &'a serde_json::Value, out: &mut Vec<&'a str>) {
    match value {
        serde_json::Value::String(s) if !s.trim().is_empty() => out.push(s.trim()),
        serde_json::Value::Array(items) => items.iter().for_each(|v| collect_text(v, out)),
        serde_json::Value::Object(map) => map
            .iter()
            .filter(|(k, _)| k.as_str() != "ref" && k.as_str() != "refs")
            .for_each(|(_, v)| collect_text(v, out)),
        _ => {}
    }
}

fn collect_refs(value: &serde_json::Value, out: &mut Vec<String>) {
    match value {
        serde_json::Value::Object(map) => {
            for (k, v) in map {
                match (k.as_str(), v) {
                    ("ref", serde_json::Value::String(s)) => push_unique(out, s),
                    ("refs", serde_json::Value::Array(items)) => {
                        for s in items.iter().filter_map(|i| i.as_str()) {
                            push_unique(out, s);
                        }
                    }
                    _ => collect_refs(v, out),
                }
            }
        }
        serde_json::Value::Array(items) => items.iter().for_each(|v| collect_refs(v, out)),
        _ => {}
    }
}

fn push_unique(out: &mut Vec<String>, s: &str) {
    if !out.iter().any(|r| r == s) {
        out.push(s.to_string());
    }
}
