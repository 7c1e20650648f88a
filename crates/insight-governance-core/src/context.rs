// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 MuVeraAI Corporation

//! Context meta builder.
//!
//! Request contexts are untrusted, arbitrarily nested trees supplied by the
//! dashboard's data layer.  They are modelled as [`serde_json::Value`] (null,
//! bool, number, string, array, map) and every traversal in this crate goes
//! through the bounded visitor here, so adversarial or deeply nested input
//! always terminates.
//!
//! * [`collect_source_ids`]  - provenance tokens found under known key names
//! * [`resolve_snapshot_ts`] - observation timestamp, or "now"
//! * [`fingerprint_context`] - canonical SHA-256 fingerprint
//! * [`build_context_meta`]  - all of the above as a [`ContextMeta`]

use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::types::{ContextMeta, CONTEXT_META_VERSION};

/// Maximum number of provenance tokens kept per context.
pub const MAX_SOURCE_IDS: usize = 8;

/// Maximum characters kept per provenance token.
pub const MAX_SOURCE_ID_CHARS: usize = 48;

/// Node budget for any single traversal.
pub const MAX_VISITED_NODES: usize = 512;

/// Depth limit for any single traversal.
pub const MAX_DEPTH: usize = 16;

/// Key names (lowercased, `_`/`-` stripped) whose values are provenance.
const PROVENANCE_KEYS: &[&str] = &[
    "venue", "venueid", "exchange", "chain", "chainid", "network", "route", "routeid", "bridge",
    "provider", "source", "sourceid", "protocol", "dex",
];

/// Timestamp fields in priority order.  Dotted entries are nested paths.
const SNAPSHOT_TS_PATHS: &[&str] = &[
    "snapshotTs",
    "snapshot_ts",
    "asOf",
    "as_of",
    "updatedAt",
    "updated_at",
    "portfolio.snapshotTs",
    "portfolio.updatedAt",
    "meta.snapshotTs",
    "timestamp",
];

// ---------------------------------------------------------------------------
// Bounded visitor
// ---------------------------------------------------------------------------

/// Control returned by a visitor callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visit {
    Continue,
    Stop,
}

/// Depth-first, document-order walk over `root` with explicit node and depth
/// caps.  The callback receives the key the node hangs under (if any), the
/// node, and its depth.
pub fn walk_bounded<F>(root: &Value, mut visit: F)
where
    F: FnMut(Option<&str>, &Value, usize) -> Visit,
{
    let mut stack: Vec<(Option<&str>, &Value, usize)> = vec![(None, root, 0)];
    let mut visited = 0usize;

    while let Some((key, node, depth)) = stack.pop() {
        visited += 1;
        if visited > MAX_VISITED_NODES {
            return;
        }
        if visit(key, node, depth) == Visit::Stop {
            return;
        }
        if depth >= MAX_DEPTH {
            continue;
        }
        match node {
            Value::Object(map) => {
                // Reverse so the first key is popped first.
                for (child_key, child) in map.iter().rev() {
                    stack.push((Some(child_key.as_str()), child, depth + 1));
                }
            }
            Value::Array(items) => {
                for child in items.iter().rev() {
                    stack.push((key, child, depth + 1));
                }
            }
            _ => {}
        }
    }
}

// ---------------------------------------------------------------------------
// Defensive readers
// ---------------------------------------------------------------------------

/// Read a dotted path (`"portfolio.updatedAt"`) from a context tree.
pub fn lookup<'a>(context: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .try_fold(context, |node, segment| node.as_object()?.get(segment))
}

/// Coerce a node to a finite `f64`.  Numeric strings are accepted.
pub fn as_finite(value: &Value) -> Option<f64> {
    let number = match value {
        Value::Number(number) => number.as_f64()?,
        Value::String(text) => text.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    number.is_finite().then_some(number)
}

/// First finite number among `paths`.
pub fn first_finite(context: &Value, paths: &[&str]) -> Option<f64> {
    paths
        .iter()
        .filter_map(|path| lookup(context, path))
        .find_map(as_finite)
}

/// Coerce a scalar node to a trimmed, non-empty string.
pub fn as_text(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(text) => text.trim().to_owned(),
        Value::Number(number) => number.to_string(),
        Value::Bool(flag) => flag.to_string(),
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}

/// First non-empty string among `keys` on an object node.
pub fn first_text(node: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|key| lookup(node, key))
        .find_map(as_text)
}

/// Truncate to at most `max_chars` characters without splitting a code point.
pub fn clip_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_index, _)) => text[..byte_index].to_owned(),
        None => text.to_owned(),
    }
}

// ---------------------------------------------------------------------------
// Meta builder
// ---------------------------------------------------------------------------

fn is_provenance_key(key: &str) -> bool {
    let normalized: String = key
        .chars()
        .filter(|c| *c != '_' && *c != '-')
        .flat_map(char::to_lowercase)
        .collect();
    PROVENANCE_KEYS.contains(&normalized.as_str())
}

/// Collect up to [`MAX_SOURCE_IDS`] distinct provenance tokens.
///
/// Scalar values found under a provenance key (or inside an array held by
/// one) are kept, trimmed and clipped to [`MAX_SOURCE_ID_CHARS`].
pub fn collect_source_ids(context: &Value) -> Vec<String> {
    let mut source_ids: Vec<String> = Vec::new();

    walk_bounded(context, |key, node, _depth| {
        let Some(key) = key else {
            return Visit::Continue;
        };
        if !is_provenance_key(key) {
            return Visit::Continue;
        }
        if let Some(text) = as_text(node) {
            if matches!(node, Value::Bool(_)) {
                return Visit::Continue;
            }
            let token = clip_chars(&text, MAX_SOURCE_ID_CHARS);
            if !source_ids.contains(&token) {
                source_ids.push(token);
            }
        }
        if source_ids.len() >= MAX_SOURCE_IDS {
            Visit::Stop
        } else {
            Visit::Continue
        }
    });

    source_ids
}

/// First finite, positive timestamp among the prioritised candidate fields,
/// otherwise `now_ms`.
pub fn resolve_snapshot_ts(context: &Value, now_ms: u64) -> u64 {
    SNAPSHOT_TS_PATHS
        .iter()
        .filter_map(|path| lookup(context, path))
        .filter_map(as_finite)
        .find(|ts| *ts > 0.0)
        .map(|ts| ts as u64)
        .unwrap_or(now_ms)
}

/// Deterministic fingerprint of a context.
///
/// Hashes the canonical JSON form (object keys sorted) with SHA-256 and keeps
/// the first 16 bytes as lowercase hex.
pub fn fingerprint_context(context: &Value) -> String {
    let canonical = serde_json::to_string(context).unwrap_or_default();
    let digest = Sha256::digest(canonical.as_bytes());
    hex::encode(&digest[..16])
}

/// Assemble the [`ContextMeta`] for a request.
pub fn build_context_meta(context: &Value, context_hash: &str, now_ms: u64) -> ContextMeta {
    ContextMeta {
        context_version: CONTEXT_META_VERSION,
        snapshot_ts: resolve_snapshot_ts(context, now_ms),
        context_hash: context_hash.to_owned(),
        source_ids: collect_source_ids(context),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn source_ids_are_deduplicated_and_capped() {
        let context = json!({
            "positions": [
                { "venue": "hyperliquid", "symbol": "BTC" },
                { "venue": "hyperliquid", "symbol": "ETH" },
                { "venue_id": "dydx" }
            ],
            "transfers": [
                { "route": "across", "chain": 42161 },
                { "bridge": "stargate", "Chain-Id": "base" }
            ]
        });
        let ids = collect_source_ids(&context);
        // Object keys are visited in sorted order.
        assert_eq!(ids, vec!["hyperliquid", "dydx", "42161", "across", "base", "stargate"]);

        let many: Vec<Value> = (0..20).map(|i| json!({ "provider": format!("p{i}") })).collect();
        let ids = collect_source_ids(&json!({ "items": many }));
        assert_eq!(ids.len(), MAX_SOURCE_IDS);
    }

    #[test]
    fn source_ids_are_truncated() {
        let long = "x".repeat(100);
        let ids = collect_source_ids(&json!({ "source": long }));
        assert_eq!(ids[0].chars().count(), MAX_SOURCE_ID_CHARS);
    }

    #[test]
    fn deep_nesting_terminates() {
        let mut node = json!({ "venue": "bottom" });
        for _ in 0..64 {
            node = json!({ "next": node });
        }
        assert!(collect_source_ids(&node).is_empty());
    }

    #[test]
    fn snapshot_ts_prefers_first_positive_candidate() {
        let context = json!({ "snapshotTs": -5, "updatedAt": "1700000000000", "timestamp": 3 });
        assert_eq!(resolve_snapshot_ts(&context, 99), 1_700_000_000_000);
        assert_eq!(resolve_snapshot_ts(&json!({ "portfolio": { "updatedAt": 42 } }), 99), 42);
        assert_eq!(resolve_snapshot_ts(&json!({ "snapshotTs": "soon" }), 99), 99);
    }

    #[test]
    fn fingerprint_ignores_key_order() {
        let a = json!({ "a": 1, "b": [1, 2, { "c": true }] });
        let b = json!({ "b": [1, 2, { "c": true }], "a": 1 });
        assert_eq!(fingerprint_context(&a), fingerprint_context(&b));
        assert_eq!(fingerprint_context(&a).len(), 32);
        assert_ne!(fingerprint_context(&a), fingerprint_context(&json!({ "a": 2 })));
    }

    #[test]
    fn clip_chars_respects_code_points() {
        assert_eq!(clip_chars("ééé", 2), "éé");
        assert_eq!(clip_chars("ab", 5), "ab");
    }
}
