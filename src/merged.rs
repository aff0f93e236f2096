//! # Merged Values
//!
//! Cross-source resolution for one canonical key. Every registered source
//! contributes at most one container; the merged value picks a winner
//! deterministically: an exact per-key preference first, then the most
//! specific category default, then source registration rank.
//!
//! Resolution state sits behind a lock, readers take away a shared
//! `ResolvedValue` snapshot and never hold the lock across work.

use crate::container::{Container, ForecastCurve};
use crate::key::{CategoryKey, Period, SourceId};
use crate::series::Timestamp;
use crate::units::Measurement;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::sync::Arc;

/// Declarative source-preference table, applied uniformly at resolution.
#[derive(Debug, Clone, Default)]
pub struct SourcePreferences {
    /// Exact canonical key → source that wins when it has the key.
    preferred: FxHashMap<CategoryKey, SourceId>,
    /// Category subtree → default source, kept deepest-first so lookup finds
    /// the most specific prefix.
    category_defaults: Vec<(CategoryKey, SourceId)>,
}

impl SourcePreferences {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pin one exact key to a source.
    pub fn prefer(&mut self, key: CategoryKey, source: SourceId) {
        self.preferred.insert(key, source);
    }

    /// Set the default source for a whole category subtree.
    pub fn prefer_category(&mut self, category: CategoryKey, source: SourceId) {
        self.category_defaults.retain(|(prefix, _)| *prefix != category);
        self.category_defaults.push((category, source));
        // Stable sort keeps registration order among equal depths
        self.category_defaults
            .sort_by(|(a, _), (b, _)| b.depth().cmp(&a.depth()));
    }

    pub fn preferred_for(&self, key: &CategoryKey) -> Option<&SourceId> {
        self.preferred.get(key)
    }

    /// The most specific category default covering `key`, if any.
    pub fn default_for(&self, key: &CategoryKey) -> Option<&SourceId> {
        self.category_defaults
            .iter()
            .find(|(prefix, _)| key.is_within(prefix))
            .map(|(_, source)| source)
    }

    pub fn is_empty(&self) -> bool {
        self.preferred.is_empty() && self.category_defaults.is_empty()
    }
}

/// The winning reading for a key after cross-source resolution. Shared
/// snapshot: cheap to clone, safe to hand to subscribers.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedValue {
    key: CategoryKey,
    source: SourceId,
    origin: Period,
    timestamp: Timestamp,
    measurement: Measurement,
}

impl ResolvedValue {
    pub fn key(&self) -> &CategoryKey {
        &self.key
    }

    /// The source the winning reading came from.
    pub fn source(&self) -> &SourceId {
        &self.source
    }

    /// The period bucket the reading fell back to inside that source.
    pub fn origin(&self) -> Period {
        self.origin
    }

    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    pub fn measurement(&self) -> &Measurement {
        &self.measurement
    }
}

#[derive(Debug)]
struct SourceSlot {
    rank: usize,
    source: SourceId,
    container: Container,
}

#[derive(Debug, Default)]
struct MergedState {
    /// One slot per contributing source, ascending rank.
    slots: Vec<SourceSlot>,
    resolved: Option<Arc<ResolvedValue>>,
}

/// One canonical key's cross-source merge cell.
#[derive(Debug)]
pub struct MergedValue {
    key: CategoryKey,
    state: RwLock<MergedState>,
}

impl MergedValue {
    pub fn new(key: CategoryKey) -> Self {
        Self {
            key,
            state: RwLock::new(MergedState::default()),
        }
    }

    pub fn key(&self) -> &CategoryKey {
        &self.key
    }

    /// Attach or refresh one source's container and re-resolve.
    pub fn attach(&self, rank: usize, container: Container, preferences: &SourcePreferences) {
        let mut state = self.state.write();
        let source = container.source().clone();
        match state.slots.iter_mut().find(|slot| slot.source == source) {
            Some(slot) => {
                slot.rank = rank;
                slot.container = container;
            }
            None => {
                let position = state
                    .slots
                    .partition_point(|slot| slot.rank <= rank);
                state.slots.insert(
                    position,
                    SourceSlot {
                        rank,
                        source,
                        container,
                    },
                );
            }
        }
        Self::recompute(&mut state, &self.key, preferences);
    }

    fn recompute(state: &mut MergedState, key: &CategoryKey, preferences: &SourcePreferences) {
        let winner = preferences
            .preferred_for(key)
            .and_then(|source| state.slots.iter().find(|slot| slot.source == *source))
            .or_else(|| {
                preferences
                    .default_for(key)
                    .and_then(|source| state.slots.iter().find(|slot| slot.source == *source))
            })
            .or_else(|| state.slots.first());

        state.resolved = winner.map(|slot| {
            Arc::new(ResolvedValue {
                key: key.clone(),
                source: slot.source.clone(),
                origin: slot.container.origin(),
                timestamp: slot.container.timestamp(),
                measurement: slot.container.value().clone(),
            })
        });
    }

    /// The current winner, if any source has contributed.
    pub fn value(&self) -> Option<Arc<ResolvedValue>> {
        self.state.read().resolved.clone()
    }

    /// Sources contributing to this key, ascending rank.
    pub fn sources(&self) -> Vec<SourceId> {
        self.state
            .read()
            .slots
            .iter()
            .map(|slot| slot.source.clone())
            .collect()
    }

    pub fn source_count(&self) -> usize {
        self.state.read().slots.len()
    }

    /// One source's snapshot, bypassing resolution.
    pub fn container_for(&self, source: &SourceId) -> Option<Container> {
        self.state
            .read()
            .slots
            .iter()
            .find(|slot| slot.source == *source)
            .map(|slot| slot.container.clone())
    }

    /// The forward curve in resolution order: the winning source's curve when
    /// it has one, otherwise the first contributing source that does.
    pub fn forecast(&self) -> Option<ForecastCurve> {
        let state = self.state.read();
        if let Some(resolved) = &state.resolved {
            let winner = state
                .slots
                .iter()
                .find(|slot| slot.source == *resolved.source());
            if let Some(curve) = winner.and_then(|slot| slot.container.forecast()) {
                return Some(curve.clone());
            }
        }
        state
            .slots
            .iter()
            .find_map(|slot| slot.container.forecast().cloned())
    }

    pub fn has_forecast(&self) -> bool {
        self.state
            .read()
            .slots
            .iter()
            .any(|slot| slot.container.has_forecast())
    }
}
