//! # Skymerge
//!
//! A multi-source observation ingestion, normalization, and merge engine.
//!
//! Raw payloads enter through per-source declarative translators that map
//! vendor field names onto canonical dotted keys and dimensioned
//! measurements. Each source keeps its own period-bucketed observation
//! store; a dispatcher folds every source's view of a key into one resolved
//! value and delivers debounced, deduplicated change notifications.

pub mod coalescer;
pub mod config;
pub mod container;
pub mod dispatch;
pub mod error;
pub mod key;
pub mod merged;
pub mod series;
pub mod store;
pub mod translate;
pub mod units;
pub mod utils;

// Re-export main types for convenience
pub use coalescer::{CoalescerConfig, CoalescerStats, KeyCoalescer};
pub use config::{ConfigOverrides, EngineConfig, PreferencesConfig, Profile};
pub use container::{Container, ForecastCurve, PointValue};
pub use dispatch::{
    ChangeEvent, DispatchConfig, DispatchStats, Dispatcher, KeyFilter, KeyRequest, SubscriberId,
};
pub use error::{MergeError, Result};
pub use key::{CategoryKey, Period, SourceId};
pub use merged::{MergedValue, ResolvedValue, SourcePreferences};
pub use series::{now_timestamp, Observation, ObservationSeries, Timestamp};
pub use store::SourceStore;
pub use translate::{Decoded, RawPayload, Translator, TranslatorConfig};
pub use units::{Dimension, EnumUnit, Measurement, Unit, UnitSystem};

use parking_lot::RwLock;
use rustc_hash::FxHashSet;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, trace};

/// Outcome of one ingest call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestReport {
    /// Payload sections that mapped to a period bucket
    pub sections: usize,
    /// Fields decoded into canonical measurements
    pub decoded: usize,
    /// Fields skipped by gates or unusable values
    pub skipped: usize,
    /// Payload fields no translator entry claims
    pub unmapped: usize,
    /// Distinct canonical keys pushed through the merge registry
    pub keys_updated: usize,
}

impl IngestReport {
    fn absorb(&mut self, decoded: &Decoded) {
        self.decoded += decoded.values.len();
        self.skipped += decoded.skipped;
        self.unmapped += decoded.unmapped;
    }
}

/// Point-in-time engine statistics.
#[derive(Debug, Clone)]
pub struct EngineStats {
    /// Registered sources
    pub sources: usize,
    /// Observations held across every source store
    pub observations: usize,
    /// Merge registry and notification counters
    pub dispatch: DispatchStats,
}

struct SourceEntry {
    id: SourceId,
    rank: usize,
    translator: Translator,
    store: RwLock<SourceStore>,
}

/// Main API for observation merging
pub struct Skymerge {
    config: EngineConfig,
    dispatcher: Arc<Dispatcher>,
    sources: RwLock<Vec<Arc<SourceEntry>>>,
}

impl Skymerge {
    /// Engine with default configuration and no source preferences.
    pub fn new() -> Self {
        let config = EngineConfig::default();
        let dispatcher = Arc::new(Dispatcher::new(
            config.dispatch_config(),
            SourcePreferences::new(),
        ));
        Self {
            config,
            dispatcher,
            sources: RwLock::new(Vec::new()),
        }
    }

    /// Engine driven by a loaded configuration, including its preference
    /// tables.
    pub fn with_config(config: EngineConfig) -> Result<Self> {
        let preferences = config.build_preferences()?;
        let dispatcher = Arc::new(Dispatcher::new(config.dispatch_config(), preferences));
        Ok(Self {
            config,
            dispatcher,
            sources: RwLock::new(Vec::new()),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Shared dispatcher handle, for callers that wire notifications
    /// directly.
    pub fn dispatcher(&self) -> Arc<Dispatcher> {
        Arc::clone(&self.dispatcher)
    }

    /// Spawn the background notifier and monitor-sweep tasks.
    pub fn start(&self) {
        self.dispatcher.start();
    }

    /// Stop background tasks, flushing any buffered notifications.
    pub fn stop(&self) {
        self.dispatcher.stop();
    }

    /// Register a source under its translator table. Registration order sets
    /// the fallback rank used when no preference names a winner.
    pub fn register_source(&self, id: &str, table: &TranslatorConfig) -> Result<SourceId> {
        let source = SourceId::new(id);
        let translator = Translator::from_config(source.clone(), table)?;
        let mut sources = self.sources.write();
        if sources.iter().any(|entry| entry.id == source) {
            return Err(MergeError::DuplicateSource {
                source: id.to_string(),
            });
        }
        let rank = sources.len();
        info!(source = %source, rank, fields = translator.entry_count(), "source registered");
        sources.push(Arc::new(SourceEntry {
            id: source.clone(),
            rank,
            translator,
            store: RwLock::new(SourceStore::new(source.clone())),
        }));
        Ok(source)
    }

    pub fn sources(&self) -> Vec<SourceId> {
        self.sources
            .read()
            .iter()
            .map(|entry| entry.id.clone())
            .collect()
    }

    pub fn source_count(&self) -> usize {
        self.sources.read().len()
    }

    fn entry(&self, source: &SourceId) -> Result<Arc<SourceEntry>> {
        self.sources
            .read()
            .iter()
            .find(|entry| &entry.id == source)
            .cloned()
            .ok_or_else(|| MergeError::UnknownSource {
                source: source.to_string(),
            })
    }

    /// Decode one flat payload into the given period bucket and fold the
    /// result into the merge registry.
    pub fn ingest(
        &self,
        source: &SourceId,
        period: Period,
        payload: &RawPayload,
    ) -> Result<IngestReport> {
        let entry = self.entry(source)?;
        let mut report = IngestReport {
            sections: 1,
            ..IngestReport::default()
        };

        let decoded = entry.translator.decode(payload);
        report.absorb(&decoded);
        let timestamp = entry
            .translator
            .timestamp_of(payload)
            .unwrap_or_else(now_timestamp);

        let keys: Vec<CategoryKey> = decoded.values.keys().cloned().collect();
        let mut observation = Observation::new(timestamp, entry.id.clone(), period);
        for (key, measurement) in decoded.values {
            observation.insert(key, measurement);
        }

        let containers = {
            let mut store = entry.store.write();
            if !observation.is_empty() {
                store.insert(period, observation);
            }
            store.prune_realtime(now_timestamp() - self.config.realtime_retention_secs);
            keys.iter()
                .filter_map(|key| Container::capture(&store, key))
                .collect::<Vec<_>>()
        };

        report.keys_updated = containers.len();
        for container in containers {
            self.dispatcher.update(entry.rank, container);
        }
        Ok(report)
    }

    /// Ingest a whole multi-section document, the shape a polled feed
    /// returns. Sections route by the translator's section table; unmapped
    /// sections are skipped. Forecast-period arrays replace their bucket
    /// wholesale, realtime entries merge in.
    pub fn ingest_document(&self, source: &SourceId, document: &Value) -> Result<IngestReport> {
        let entry = self.entry(source)?;
        let Some(sections) = document.as_object() else {
            return Err(MergeError::Payload {
                detail: "document root must be a JSON object".to_string(),
            });
        };

        let mut report = IngestReport::default();
        let mut touched: FxHashSet<CategoryKey> = FxHashSet::default();

        for (name, body) in sections {
            let Some(period) = entry.translator.period_for_section(name) else {
                trace!(source = %entry.id, section = %name, "unmapped section, skipping");
                continue;
            };
            report.sections += 1;

            match body {
                Value::Array(items) => {
                    let mut batch = Vec::with_capacity(items.len());
                    for item in items {
                        let Some(payload) = item.as_object() else {
                            report.skipped += 1;
                            continue;
                        };
                        let Some(timestamp) = entry.translator.timestamp_of(payload) else {
                            debug!(
                                source = %entry.id, section = %name,
                                "array item without a timestamp, dropped"
                            );
                            report.skipped += 1;
                            continue;
                        };
                        let decoded = entry.translator.decode(payload);
                        report.absorb(&decoded);
                        let mut observation = Observation::new(timestamp, entry.id.clone(), period);
                        for (key, measurement) in decoded.values {
                            touched.insert(key.clone());
                            observation.insert(key, measurement);
                        }
                        batch.push(observation);
                    }

                    let mut store = entry.store.write();
                    if period.is_forecast() {
                        // A forecast poll is authoritative for its whole window
                        store.replace_all(period, batch);
                    } else {
                        for observation in batch {
                            store.insert(period, observation);
                        }
                    }
                }
                Value::Object(payload) => {
                    let decoded = entry.translator.decode(payload);
                    report.absorb(&decoded);
                    let timestamp = entry
                        .translator
                        .timestamp_of(payload)
                        .unwrap_or_else(now_timestamp);
                    let mut observation = Observation::new(timestamp, entry.id.clone(), period);
                    for (key, measurement) in decoded.values {
                        touched.insert(key.clone());
                        observation.insert(key, measurement);
                    }
                    if !observation.is_empty() {
                        entry.store.write().insert(period, observation);
                    }
                }
                _ => {
                    debug!(
                        source = %entry.id, section = %name,
                        "section body is neither object nor array, skipped"
                    );
                    report.skipped += 1;
                }
            }
        }

        let containers = {
            let mut store = entry.store.write();
            store.prune_realtime(now_timestamp() - self.config.realtime_retention_secs);
            touched
                .iter()
                .filter_map(|key| Container::capture(&store, key))
                .collect::<Vec<_>>()
        };

        report.keys_updated = containers.len();
        for container in containers {
            self.dispatcher.update(entry.rank, container);
        }
        Ok(report)
    }

    /// The resolved cross-source reading for a key.
    pub fn value(&self, key: &CategoryKey) -> Option<Arc<ResolvedValue>> {
        self.dispatcher.value(key)
    }

    /// The merge cell carrying every source's container for a key.
    pub fn merged(&self, key: &CategoryKey) -> Option<Arc<MergedValue>> {
        self.dispatcher.merged(key)
    }

    /// The resolved reading rendered in the configured display system.
    pub fn display_value(&self, key: &CategoryKey) -> Option<String> {
        let resolved = self.dispatcher.value(key)?;
        let converted = resolved
            .measurement()
            .convert(self.config.display_system)
            .ok()?;
        Some(converted.to_string())
    }

    /// Every known canonical key, sorted.
    pub fn keys(&self) -> Vec<CategoryKey> {
        self.dispatcher.keys()
    }

    pub fn key_count(&self) -> usize {
        self.dispatcher.key_count()
    }

    /// Request a key, monitoring it when no source carries it yet.
    pub fn request_key(&self, key: &CategoryKey) -> KeyRequest {
        self.dispatcher.request_key(key, None, false)
    }

    /// Request a key on behalf of a subscriber, optionally insisting on
    /// forecast coverage before the monitor is satisfied.
    pub fn request_key_with(
        &self,
        key: &CategoryKey,
        requester: SubscriberId,
        requires_forecast: bool,
    ) -> KeyRequest {
        self.dispatcher
            .request_key(key, Some(requester), requires_forecast)
    }

    /// Register a change callback.
    pub fn on_change<F>(&self, filter: KeyFilter, callback: F) -> SubscriberId
    where
        F: Fn(&ChangeEvent) + Send + Sync + 'static,
    {
        self.dispatcher.on_change(filter, callback)
    }

    /// Remove a subscription. Returns false when the id was not registered.
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        self.dispatcher.unsubscribe(id)
    }

    /// The stored observation closest to `timestamp` within the configured
    /// tolerance, from one source's series.
    pub fn observation_at(
        &self,
        source: &SourceId,
        period: Period,
        timestamp: Timestamp,
    ) -> Result<Option<Observation>> {
        let entry = self.entry(source)?;
        let store = entry.store.read();
        Ok(store
            .series(period)
            .and_then(|series| series.nearest(timestamp, self.config.nearest_tolerance_secs))
            .cloned())
    }

    /// Drop realtime observations older than the retention horizon across
    /// every source. Returns how many were removed.
    pub fn prune_aged(&self) -> usize {
        let cutoff = now_timestamp() - self.config.realtime_retention_secs;
        self.sources
            .read()
            .iter()
            .map(|entry| entry.store.write().prune_realtime(cutoff))
            .sum()
    }

    /// Render the merge registry as a text summary.
    pub fn summary(&self) -> anyhow::Result<String> {
        utils::export_to_text_summary(&self.dispatcher, self.config.display_system)
    }

    pub fn stats(&self) -> EngineStats {
        let sources = self.sources.read();
        EngineStats {
            sources: sources.len(),
            observations: sources.iter().map(|entry| entry.store.read().len()).sum(),
            dispatch: self.dispatcher.stats(),
        }
    }
}

impl Default for Skymerge {
    fn default() -> Self {
        Self::new()
    }
}
