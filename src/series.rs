//! # Observations and Series
//!
//! A translator-driven snapshot of canonical-key → measurement pairs for one
//! source at one instant, and the timestamp-ordered series that owns such
//! snapshots per (source, period). Realtime series grow by insertion and age
//! out past a retention horizon; forecast series are replaced wholesale on
//! each refresh.

use crate::key::{CategoryKey, Period, SourceId};
use crate::units::Measurement;
use rustc_hash::FxHashMap;
use std::collections::BTreeMap;

/// Seconds since the Unix epoch.
pub type Timestamp = i64;

/// Current wall-clock time as a [`Timestamp`].
pub fn now_timestamp() -> Timestamp {
    time::OffsetDateTime::now_utc().unix_timestamp()
}

/// One timestamped snapshot from one source. Fields only ever hold keys the
/// owning translator declares; a re-send of the same timestamp merges fields
/// in place rather than creating a duplicate entry.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    timestamp: Timestamp,
    source: SourceId,
    period: Period,
    values: FxHashMap<CategoryKey, Measurement>,
}

impl Observation {
    pub fn new(timestamp: Timestamp, source: SourceId, period: Period) -> Self {
        Self {
            timestamp,
            source,
            period,
            values: FxHashMap::default(),
        }
    }

    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    pub fn source(&self) -> &SourceId {
        &self.source
    }

    pub fn period(&self) -> Period {
        self.period
    }

    /// Set one field, returning the previous value when it was already set.
    pub fn insert(&mut self, key: CategoryKey, measurement: Measurement) -> Option<Measurement> {
        self.values.insert(key, measurement)
    }

    /// Look up one field. Absence is a normal outcome, not an error.
    pub fn get(&self, key: &CategoryKey) -> Option<&Measurement> {
        self.values.get(key)
    }

    pub fn contains(&self, key: &CategoryKey) -> bool {
        self.values.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &CategoryKey> {
        self.values.keys()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// In-place refresh: fields from `other` are added or overwritten.
    pub fn merge_from(&mut self, other: Observation) {
        for (key, measurement) in other.values {
            self.values.insert(key, measurement);
        }
    }
}

/// Timestamp-ordered collection of observations for one (source, period).
#[derive(Debug, Clone)]
pub struct ObservationSeries {
    period: Period,
    entries: BTreeMap<Timestamp, Observation>,
}

impl ObservationSeries {
    pub fn new(period: Period) -> Self {
        Self {
            period,
            entries: BTreeMap::new(),
        }
    }

    pub fn period(&self) -> Period {
        self.period
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Insert an observation. An existing entry at the exact timestamp is
    /// merged in place; returns true when that happened.
    pub fn insert(&mut self, observation: Observation) -> bool {
        use std::collections::btree_map::Entry;
        match self.entries.entry(observation.timestamp()) {
            Entry::Occupied(mut existing) => {
                existing.get_mut().merge_from(observation);
                true
            }
            Entry::Vacant(slot) => {
                slot.insert(observation);
                false
            }
        }
    }

    /// Swap in a fresh set of observations (forecast refresh semantics).
    pub fn replace_all(&mut self, observations: Vec<Observation>) {
        self.entries.clear();
        for observation in observations {
            self.insert(observation);
        }
    }

    /// The closest observation within `tolerance` seconds of `timestamp`, or
    /// `None` when nothing qualifies. Ties prefer the earlier entry.
    pub fn nearest(&self, timestamp: Timestamp, tolerance: i64) -> Option<&Observation> {
        let before = self.entries.range(..=timestamp).next_back();
        let after = self.entries.range(timestamp + 1..).next();

        let candidate = match (before, after) {
            (Some((ts_b, obs_b)), Some((ts_a, obs_a))) => {
                if timestamp - ts_b <= ts_a - timestamp {
                    (timestamp - ts_b, obs_b)
                } else {
                    (ts_a - timestamp, obs_a)
                }
            }
            (Some((ts_b, obs_b)), None) => (timestamp - ts_b, obs_b),
            (None, Some((ts_a, obs_a))) => (ts_a - timestamp, obs_a),
            (None, None) => return None,
        };

        (candidate.0 <= tolerance).then_some(candidate.1)
    }

    /// Earliest observation, if any.
    pub fn first(&self) -> Option<&Observation> {
        self.entries.values().next()
    }

    /// Most recent observation, if any.
    pub fn latest(&self) -> Option<&Observation> {
        self.entries.values().next_back()
    }

    /// Earliest observation carrying `key`, with the value.
    pub fn first_with(&self, key: &CategoryKey) -> Option<(Timestamp, &Measurement)> {
        self.entries
            .iter()
            .find_map(|(ts, obs)| obs.get(key).map(|m| (*ts, m)))
    }

    /// Most recent observation carrying `key`, with the value.
    pub fn latest_with(&self, key: &CategoryKey) -> Option<(Timestamp, &Measurement)> {
        self.entries
            .iter()
            .rev()
            .find_map(|(ts, obs)| obs.get(key).map(|m| (*ts, m)))
    }

    /// All points carrying `key` in timestamp order (the forecast curve).
    pub fn curve_for(&self, key: &CategoryKey) -> Vec<(Timestamp, Measurement)> {
        self.entries
            .iter()
            .filter_map(|(ts, obs)| obs.get(key).map(|m| (*ts, m.clone())))
            .collect()
    }

    /// Union of keys present anywhere in the series.
    pub fn keys(&self) -> Vec<CategoryKey> {
        let mut seen = Vec::new();
        for observation in self.entries.values() {
            for key in observation.keys() {
                if !seen.contains(key) {
                    seen.push(key.clone());
                }
            }
        }
        seen
    }

    /// Drop entries strictly older than `cutoff`; returns how many were
    /// removed.
    pub fn prune_older_than(&mut self, cutoff: Timestamp) -> usize {
        let before = self.entries.len();
        self.entries = self.entries.split_off(&cutoff);
        before - self.entries.len()
    }

    pub fn timestamps(&self) -> impl Iterator<Item = Timestamp> + '_ {
        self.entries.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Observation> {
        self.entries.values()
    }
}
