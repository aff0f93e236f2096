//! # Canonical Keys
//!
//! Dotted hierarchical identifiers (`environment.temperature.dewpoint`) used
//! as the join key between sources. Keys are interned through a process-wide
//! DashMap so repeated constructions of the same textual key share one
//! allocation and compare by pointer on the fast path. Segments are
//! case-insensitive and normalized to lowercase at construction.

use crate::error::{MergeError, Result};
use dashmap::DashMap;
use rustc_hash::FxHasher;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, OnceLock};

/// Separator between key segments in the dotted form.
pub const KEY_SEPARATOR: char = '.';

#[derive(Debug)]
struct KeyData {
    /// Normalized dotted form, e.g. `environment.wind.speed`
    dotted: String,
    /// Normalized segments in order
    segments: Vec<String>,
    /// Hash of the dotted form, precomputed once
    hash: u64,
}

/// An immutable, interned, dotted hierarchical key.
#[derive(Clone)]
pub struct CategoryKey(Arc<KeyData>);

impl CategoryKey {
    /// Parse a dotted key string. Fails with `InvalidKey` on an empty input,
    /// an empty segment, or leading/trailing separators.
    pub fn parse(text: &str) -> Result<Self> {
        KeyInterner::global().intern(text)
    }

    /// Build a key from individual segments. Fails with `InvalidKey` if any
    /// segment is empty or contains the separator.
    pub fn from_segments<I, S>(segments: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut normalized = Vec::new();
        for segment in segments {
            let segment = segment.as_ref();
            if segment.is_empty() {
                return Err(MergeError::InvalidKey {
                    key: normalized.join("."),
                    reason: "empty segment",
                });
            }
            if segment.contains(KEY_SEPARATOR) {
                return Err(MergeError::InvalidKey {
                    key: segment.to_string(),
                    reason: "segment contains separator",
                });
            }
            normalized.push(segment.to_lowercase());
        }
        if normalized.is_empty() {
            return Err(MergeError::InvalidKey {
                key: String::new(),
                reason: "no segments",
            });
        }
        Ok(KeyInterner::global().intern_normalized(normalized))
    }

    /// The dotted textual form.
    pub fn as_str(&self) -> &str {
        &self.0.dotted
    }

    /// The normalized segments in order.
    pub fn segments(&self) -> &[String] {
        &self.0.segments
    }

    /// Number of segments.
    pub fn depth(&self) -> usize {
        self.0.segments.len()
    }

    /// True if `self` is a proper ancestor category of `other`
    /// (`environment.wind` is an ancestor of `environment.wind.speed`).
    pub fn is_ancestor_of(&self, other: &CategoryKey) -> bool {
        self.depth() < other.depth() && other.0.segments[..self.depth()] == self.0.segments[..]
    }

    /// True if `self` is a proper descendant of `other`.
    pub fn is_descendant_of(&self, other: &CategoryKey) -> bool {
        other.is_ancestor_of(self)
    }

    /// True if `self` equals `category` or sits below it. Used for
    /// category-default source selection.
    pub fn is_within(&self, category: &CategoryKey) -> bool {
        self == category || category.is_ancestor_of(self)
    }

    /// Lowest common ancestor of two keys, or `None` when they share no
    /// leading segments.
    pub fn join(&self, other: &CategoryKey) -> Option<CategoryKey> {
        let shared = self
            .0
            .segments
            .iter()
            .zip(other.0.segments.iter())
            .take_while(|(a, b)| a == b)
            .count();
        if shared == 0 {
            return None;
        }
        Some(KeyInterner::global().intern_normalized(self.0.segments[..shared].to_vec()))
    }

    /// The immediate parent category, or `None` for a single-segment key.
    pub fn parent(&self) -> Option<CategoryKey> {
        if self.depth() < 2 {
            return None;
        }
        Some(
            KeyInterner::global()
                .intern_normalized(self.0.segments[..self.depth() - 1].to_vec()),
        )
    }

    /// The final segment (the leaf name).
    pub fn leaf(&self) -> &str {
        self.0
            .segments
            .last()
            .map(String::as_str)
            .unwrap_or_default()
    }
}

impl PartialEq for CategoryKey {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0) || self.0.dotted == other.0.dotted
    }
}

impl Eq for CategoryKey {}

impl Hash for CategoryKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.0.hash);
    }
}

impl PartialOrd for CategoryKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for CategoryKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.dotted.cmp(&other.0.dotted)
    }
}

impl fmt::Display for CategoryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.dotted)
    }
}

impl fmt::Debug for CategoryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CategoryKey({})", self.0.dotted)
    }
}

impl Serialize for CategoryKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.dotted)
    }
}

impl<'de> Deserialize<'de> for CategoryKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        CategoryKey::parse(&text).map_err(serde::de::Error::custom)
    }
}

/// Process-wide key interner.
pub struct KeyInterner {
    keys: DashMap<String, CategoryKey>,
}

static GLOBAL_INTERNER: OnceLock<KeyInterner> = OnceLock::new();

impl KeyInterner {
    fn new() -> Self {
        Self {
            keys: DashMap::with_capacity(256),
        }
    }

    /// The shared process-wide interner.
    pub fn global() -> &'static KeyInterner {
        GLOBAL_INTERNER.get_or_init(KeyInterner::new)
    }

    /// Validate, normalize, and intern a dotted key string.
    pub fn intern(&self, text: &str) -> Result<CategoryKey> {
        // Fast path: already interned under its normalized form
        let normalized_text = text.to_lowercase();
        if let Some(key) = self.keys.get(&normalized_text) {
            return Ok(key.clone());
        }

        if text.is_empty() {
            return Err(MergeError::InvalidKey {
                key: String::new(),
                reason: "empty key",
            });
        }
        let mut segments = Vec::new();
        for segment in normalized_text.split(KEY_SEPARATOR) {
            if segment.is_empty() {
                return Err(MergeError::InvalidKey {
                    key: text.to_string(),
                    reason: "empty segment",
                });
            }
            segments.push(segment.to_string());
        }
        Ok(self.intern_normalized(segments))
    }

    /// Intern segments that are already validated and lowercased.
    fn intern_normalized(&self, segments: Vec<String>) -> CategoryKey {
        let dotted = segments.join(".");
        if let Some(key) = self.keys.get(&dotted) {
            return key.clone();
        }
        // Use the entry API so a concurrent insert of the same key wins once
        let entry = self.keys.entry(dotted.clone()).or_insert_with(|| {
            let mut hasher = FxHasher::default();
            hasher.write(dotted.as_bytes());
            CategoryKey(Arc::new(KeyData {
                hash: hasher.finish(),
                dotted,
                segments,
            }))
        });
        entry.clone()
    }

    /// Number of distinct keys interned so far.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// True if nothing has been interned yet.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Identity of a registered data source (e.g. `"wf"`, `"openmeteo"`).
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SourceId(Arc<str>);

impl SourceId {
    pub fn new(id: &str) -> Self {
        SourceId(Arc::from(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SourceId {
    fn from(id: &str) -> Self {
        SourceId::new(id)
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SourceId({})", self.0)
    }
}

impl Serialize for SourceId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for SourceId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Ok(SourceId::new(&text))
    }
}

/// The cadence/bucket a reading belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Period {
    /// Realtime conditions; doubles as the historical log as entries age.
    Now,
    Minute,
    QuarterHour,
    Hour,
    Day,
    Week,
}

impl Period {
    /// Every period, in ascending bucket width.
    pub const ALL: [Period; 6] = [
        Period::Now,
        Period::Minute,
        Period::QuarterHour,
        Period::Hour,
        Period::Day,
        Period::Week,
    ];

    /// Human-readable label used in summaries.
    pub const fn label(self) -> &'static str {
        match self {
            Period::Now => "now",
            Period::Minute => "minute",
            Period::QuarterHour => "quarter-hour",
            Period::Hour => "hour",
            Period::Day => "day",
            Period::Week => "week",
        }
    }

    /// Nominal bucket width in seconds (0 for realtime).
    pub const fn seconds(self) -> i64 {
        match self {
            Period::Now => 0,
            Period::Minute => 60,
            Period::QuarterHour => 900,
            Period::Hour => 3_600,
            Period::Day => 86_400,
            Period::Week => 604_800,
        }
    }

    /// True for forecast buckets (everything except realtime).
    pub const fn is_forecast(self) -> bool {
        !matches!(self, Period::Now)
    }

    /// True for the realtime series.
    pub const fn is_realtime(self) -> bool {
        matches!(self, Period::Now)
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
