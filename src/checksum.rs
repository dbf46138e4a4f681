//! Content digests deciding whether cached page work is still valid.
//!
//! Every artifact cached for a page (entities, boxes, synthesized speech)
//! stores its own digest of the transcript it was computed from. A cached
//! artifact is reusable only while that digest equals the digest of the
//! live transcript.

use serde::{Deserialize, Serialize};
use std::fmt;

/// BLAKE3-256 digest of a transcript, rendered as lowercase hex.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TextDigest(String);

impl TextDigest {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Wrap a stored hex string (e.g. read from a sidecar record)
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }
}

impl fmt::Display for TextDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Digest the exact transcript string. No trimming or normalization.
pub fn digest(text: &str) -> TextDigest {
    TextDigest(blake3::hash(text.as_bytes()).to_hex().to_string())
}

/// True iff a stored digest exists and matches the digest of `text`.
pub fn is_valid(stored: Option<&TextDigest>, text: &str) -> bool {
    matches(stored, &digest(text))
}

/// Same as [`is_valid`] for a digest already computed from the live text
pub fn matches(stored: Option<&TextDigest>, live: &TextDigest) -> bool {
    stored == Some(live)
}
