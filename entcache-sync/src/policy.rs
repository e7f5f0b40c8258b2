//! Depth/Role policy: how much of the entity graph a write emits.
//!
//! A policy is chosen per HTTP exchange. It selects which relationship
//! directions are traversed and bounds the traversal depth; the write path
//! counts the remaining depth down at every nested-entity boundary.

use crate::protocol::{
    header_bool, header_int, header_text, invalid_header, X_GET_FULL_JSON, X_JSON_KEYS,
    X_JSON_MAX_DEPTH,
};
use crate::CodecResult;
use bitflags::bitflags;
use http::{HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};

bitflags! {
    /// Relationship directions traversed by the write path.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct JsonKeys: u32 {
        /// Outgoing single references are embedded.
        const REFERENCED  = 1 << 0;
        /// Incoming edges (collections) are embedded.
        const REFERENCING = 1 << 1;
        /// A reference that is not embedded is written as its bare key.
        const REF         = 1 << 2;
    }
}

impl Default for JsonKeys {
    fn default() -> Self {
        Self::REFERENCED | Self::REFERENCING
    }
}

impl JsonKeys {
    /// Parses an integer mask (`3`) or a list of flag names
    /// (`Referenced, Referencing`). Names are case-insensitive and may be
    /// separated by commas or `|`.
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        if let Ok(bits) = text.parse::<u32>() {
            return Some(Self::from_bits_truncate(bits));
        }
        text.split([',', '|'])
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .try_fold(Self::empty(), |keys, name| {
                let flag = match name.to_ascii_lowercase().as_str() {
                    "referenced" => Self::REFERENCED,
                    "referencing" => Self::REFERENCING,
                    "ref" => Self::REF,
                    "none" => Self::empty(),
                    _ => return None,
                };
                Some(keys | flag)
            })
    }
}

/// Per-exchange serialisation policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct JsonPolicy {
    pub keys: JsonKeys,
    /// Remaining depth at the root; `None` is unbounded.
    pub max_depth: Option<u32>,
    /// Emit every property regardless of the change ledger.
    pub full_json: bool,
}

impl JsonPolicy {
    /// Full snapshot of the whole reachable graph.
    pub fn full() -> Self {
        Self {
            full_json: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_keys(mut self, keys: JsonKeys) -> Self {
        self.keys = keys;
        self
    }

    #[must_use]
    pub fn with_max_depth(mut self, depth: u32) -> Self {
        self.max_depth = Some(depth);
        self
    }

    /// Reads a policy from request headers, starting from the default.
    pub fn from_headers(headers: &HeaderMap) -> CodecResult<Self> {
        Self::default().merge_headers(headers)
    }

    /// Overrides fields named by request headers; absent headers keep the
    /// current value.
    pub fn merge_headers(mut self, headers: &HeaderMap) -> CodecResult<Self> {
        if let Some(text) = header_text(headers, &X_JSON_KEYS)? {
            self.keys = JsonKeys::parse(text).ok_or_else(|| invalid_header(&X_JSON_KEYS, text))?;
        }
        if let Some(depth) = header_int(headers, &X_JSON_MAX_DEPTH)? {
            self.max_depth = if depth < 0 {
                None
            } else {
                Some(u32::try_from(depth).unwrap_or(u32::MAX))
            };
        }
        if let Some(full) = header_bool(headers, &X_GET_FULL_JSON)? {
            self.full_json = full;
        }
        Ok(self)
    }

    /// Writes the policy as request headers.
    pub fn write_headers(&self, headers: &mut HeaderMap) {
        headers.insert(X_JSON_KEYS, HeaderValue::from(self.keys.bits()));
        match self.max_depth {
            Some(depth) => {
                headers.insert(X_JSON_MAX_DEPTH, HeaderValue::from(depth));
            }
            None => {
                headers.remove(X_JSON_MAX_DEPTH);
            }
        }
        if self.full_json {
            headers.insert(X_GET_FULL_JSON, HeaderValue::from_static("true"));
        } else {
            headers.remove(X_GET_FULL_JSON);
        }
    }
}
