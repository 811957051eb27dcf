//! Normalization passes and the pure rewrites behind them.
//!
//! Every rewrite returns whether it changed anything, and applying it to
//! its own output is a no-op.

use crate::error::CacheError;
use serde_json::Value;
use specforge_scraper::ARRAY_FIELDS;
use std::fmt;
use std::str::FromStr;

/// Decoding stops after this many layers.
const MAX_DECODE_DEPTH: usize = 8;

/// A versioned, re-runnable normalization pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NormalizationPass {
    /// `"a | b | c"` strings in array fields become arrays
    PipeDelimitedArrays,
    /// Container fields stored as encoded JSON strings are decoded
    DoubleEncodedJson,
    /// Missing price redirect types are backfilled from raw offers
    PriceRedirectType,
    /// Derived records are recomputed from raw payloads
    RebuildDerived,
}

impl NormalizationPass {
    /// Every pass, in the order they should run.
    pub const ALL: [Self; 4] = [
        Self::DoubleEncodedJson,
        Self::PipeDelimitedArrays,
        Self::PriceRedirectType,
        Self::RebuildDerived,
    ];

    /// Ledger name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PipeDelimitedArrays => "pipe-delimited-arrays",
            Self::DoubleEncodedJson => "double-encoded-json",
            Self::PriceRedirectType => "price-redirect-type",
            Self::RebuildDerived => "rebuild-derived",
        }
    }
}

impl fmt::Display for NormalizationPass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NormalizationPass {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| CacheError::UnknownPass(s.to_string()))
    }
}

/// Parse a string that is itself an encoded JSON array or object.
///
/// Strings holding an encoded string are unwrapped as long as the inner
/// string is an encoded array or object.
fn decode_container(raw: &str) -> Option<Value> {
    let mut current = raw.trim().to_string();
    for _ in 0..MAX_DECODE_DEPTH {
        if !(current.starts_with('[') || current.starts_with('{') || current.starts_with('"')) {
            return None;
        }
        match serde_json::from_str::<Value>(&current).ok()? {
            value @ (Value::Array(_) | Value::Object(_)) => return Some(value),
            Value::String(inner) => current = inner.trim().to_string(),
            _ => return None,
        }
    }
    None
}

/// Array-typed field of the `prices` payload.
const OFFERS_FIELD: &str = "offers";

/// Object-typed field holding category -> label -> value.
const SPECS_FIELD: &str = "specs";

/// Decode `slot` in place when it is a string encoding the expected shape.
fn decode_slot(slot: &mut Value, want_array: bool) -> bool {
    let Value::String(raw) = slot else {
        return false;
    };
    match decode_container(raw) {
        Some(decoded) if decoded.is_array() == want_array => {
            *slot = decoded;
            true
        }
        _ => false,
    }
}

/// Decode container-typed fields that were stored as encoded JSON strings.
///
/// Only fields whose canonical type is an array or object are touched:
/// the array fields, `offers`, `specs` and each `specs` category. Spec
/// values are plain strings and stay as they are even when they look
/// like JSON.
pub fn decode_double_encoded(payload: &mut Value) -> bool {
    let Value::Object(map) = payload else {
        return false;
    };

    let mut changed = false;
    for field in ARRAY_FIELDS.iter().copied().chain([OFFERS_FIELD]) {
        if let Some(slot) = map.get_mut(field) {
            changed |= decode_slot(slot, true);
        }
    }

    if let Some(specs) = map.get_mut(SPECS_FIELD) {
        changed |= decode_slot(specs, false);
        if let Value::Object(categories) = specs {
            for category in categories.values_mut() {
                changed |= decode_slot(category, false);
            }
        }
    }
    changed
}

/// Split a pipe-delimited string into trimmed, non-empty parts.
#[must_use]
pub fn split_pipes(raw: &str) -> Vec<Value> {
    raw.split('|')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| Value::String(s.to_string()))
        .collect()
}

/// Rewrite array-typed top-level fields that hold a delimited string.
///
/// Strings that are encoded JSON arrays are left for the decoding pass.
pub fn normalize_pipe_arrays(payload: &mut Value) -> bool {
    let Value::Object(map) = payload else {
        return false;
    };

    let mut changed = false;
    for field in ARRAY_FIELDS {
        let Some(slot) = map.get_mut(*field) else {
            continue;
        };
        let Value::String(raw) = slot else {
            continue;
        };
        if decode_container(raw).is_some() {
            continue;
        }
        *slot = Value::Array(split_pipes(raw));
        changed = true;
    }
    changed
}

/// Read an array-typed field, accepting the legacy encodings.
#[must_use]
pub fn string_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        Some(Value::String(raw)) => match decode_container(raw) {
            Some(decoded) => string_list(Some(&decoded)),
            None => split_pipes(raw)
                .into_iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
        },
        _ => Vec::new(),
    }
}
