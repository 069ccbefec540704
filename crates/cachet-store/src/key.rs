//! Hierarchical store keys.
//!
//! A key is a non-empty sequence of segments, e.g.
//! `values/int/<hash>` or `queue/<hash>/claimed`. Segments map directly to
//! directory names in [`FsKvStore`](crate::FsKvStore), so they are
//! restricted to characters that are safe on every filesystem:
//! - Must be non-empty and at most [`MAX_SEGMENT_LEN`] bytes
//! - Must not contain `.`, `/`, `\`, whitespace, or any of `: * ? " < > |`

use std::fmt;

use crate::error::{StoreError, StoreResult};

pub const MAX_SEGMENT_LEN: usize = 200;

/// Characters that are forbidden anywhere in a segment.
const FORBIDDEN_CHARS: &[char] = &['.', '/', '\\', ':', '*', '?', '"', '<', '>', '|'];

/// Validate a single key segment.
pub fn validate_segment(segment: &str) -> StoreResult<()> {
    let invalid = |reason: String| StoreError::InvalidKey {
        key: segment.to_string(),
        reason,
    };
    if segment.is_empty() {
        return Err(invalid("segment must not be empty".into()));
    }
    if segment.len() > MAX_SEGMENT_LEN {
        return Err(invalid(format!(
            "segment exceeds {MAX_SEGMENT_LEN} bytes"
        )));
    }
    if let Some(ch) = segment
        .chars()
        .find(|c| FORBIDDEN_CHARS.contains(c) || c.is_whitespace() || c.is_control())
    {
        return Err(invalid(format!("contains forbidden character: {ch:?}")));
    }
    Ok(())
}

/// A validated, hierarchical key.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StoreKey(Vec<String>);

impl StoreKey {
    pub fn new<I, S>(segments: I) -> StoreResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let segments: Vec<String> = segments.into_iter().map(Into::into).collect();
        if segments.is_empty() {
            return Err(StoreError::InvalidKey {
                key: String::new(),
                reason: "key must have at least one segment".into(),
            });
        }
        for segment in &segments {
            validate_segment(segment)?;
        }
        Ok(Self(segments))
    }

    /// Append one segment.
    pub fn child(&self, segment: impl Into<String>) -> StoreResult<Self> {
        let segment = segment.into();
        validate_segment(&segment)?;
        let mut segments = self.0.clone();
        segments.push(segment);
        Ok(Self(segments))
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// The final segment.
    pub fn last(&self) -> &str {
        // Keys always have at least one segment.
        self.0.last().map(String::as_str).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn parent(&self) -> Option<Self> {
        (self.0.len() > 1).then(|| Self(self.0[..self.0.len() - 1].to_vec()))
    }

    /// Whether `prefix` names this key or one of its ancestors.
    pub fn starts_with(&self, prefix: &StoreKey) -> bool {
        self.0.starts_with(&prefix.0)
    }

    /// Segment at `index`, if present.
    pub fn segment(&self, index: usize) -> Option<&str> {
        self.0.get(index).map(String::as_str)
    }
}

impl fmt::Display for StoreKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("/"))
    }
}

impl fmt::Debug for StoreKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StoreKey({self})")
    }
}
