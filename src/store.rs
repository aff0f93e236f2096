//! # Source Store
//!
//! Per-source observation storage: one timestamp-ordered series for each
//! period bucket the source actually populates. Buckets are created on first
//! insert, so a realtime-only station never carries empty forecast series.

use crate::key::{CategoryKey, Period, SourceId};
use crate::series::{Observation, ObservationSeries, Timestamp};
use rustc_hash::FxHashMap;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct SourceStore {
    source: SourceId,
    series: FxHashMap<Period, ObservationSeries>,
}

impl SourceStore {
    pub fn new(source: SourceId) -> Self {
        Self {
            source,
            series: FxHashMap::default(),
        }
    }

    pub fn source(&self) -> &SourceId {
        &self.source
    }

    /// Insert one observation into its period bucket, merging in place when
    /// the timestamp is already present. Returns true on a merge.
    pub fn insert(&mut self, period: Period, observation: Observation) -> bool {
        self.series
            .entry(period)
            .or_insert_with(|| ObservationSeries::new(period))
            .insert(observation)
    }

    /// Wholesale-replace a period bucket, the refresh path for forecast
    /// sections which arrive as complete snapshots.
    pub fn replace_all(&mut self, period: Period, observations: Vec<Observation>) {
        self.series
            .entry(period)
            .or_insert_with(|| ObservationSeries::new(period))
            .replace_all(observations);
    }

    pub fn series(&self, period: Period) -> Option<&ObservationSeries> {
        self.series.get(&period)
    }

    pub fn latest(&self, period: Period) -> Option<&Observation> {
        self.series.get(&period)?.latest()
    }

    /// Periods this source has data for, in ascending bucket width.
    pub fn periods(&self) -> impl Iterator<Item = Period> + '_ {
        Period::ALL
            .into_iter()
            .filter(|period| self.series.contains_key(period))
    }

    /// Union of canonical keys across every bucket.
    pub fn keys(&self) -> Vec<CategoryKey> {
        let mut keys: Vec<CategoryKey> = self
            .series
            .values()
            .flat_map(|series| series.keys())
            .collect();
        keys.sort_unstable();
        keys.dedup();
        keys
    }

    /// Drop realtime entries older than the cutoff. Forecast buckets are
    /// refreshed wholesale and never pruned by age.
    pub fn prune_realtime(&mut self, cutoff: Timestamp) -> usize {
        let Some(series) = self.series.get_mut(&Period::Now) else {
            return 0;
        };
        let removed = series.prune_older_than(cutoff);
        if removed > 0 {
            debug!(source = %self.source, removed, "pruned aged realtime entries");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.series.values().map(ObservationSeries::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.series.values().all(ObservationSeries::is_empty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::units::{Measurement, Unit};

    fn observation(source: &SourceId, period: Period, ts: Timestamp, celsius: f64) -> Observation {
        let mut obs = Observation::new(ts, source.clone(), period);
        obs.insert(
            CategoryKey::parse("environment.temperature.temperature").unwrap(),
            Measurement::new(celsius, Unit::Celsius),
        );
        obs
    }

    #[test]
    fn test_buckets_created_on_demand() {
        let source = SourceId::new("wf");
        let mut store = SourceStore::new(source.clone());
        assert!(store.is_empty());
        assert!(store.series(Period::Now).is_none());

        store.insert(Period::Now, observation(&source, Period::Now, 100, 20.0));
        store.insert(Period::Hour, observation(&source, Period::Hour, 3600, 18.0));

        assert_eq!(
            store.periods().collect::<Vec<_>>(),
            vec![Period::Now, Period::Hour]
        );
        assert_eq!(store.len(), 2);
        assert_eq!(store.latest(Period::Now).unwrap().timestamp(), 100);
    }

    #[test]
    fn test_replace_all_refreshes_forecast_bucket() {
        let source = SourceId::new("wf");
        let mut store = SourceStore::new(source.clone());
        store.insert(Period::Hour, observation(&source, Period::Hour, 3600, 18.0));
        store.insert(Period::Hour, observation(&source, Period::Hour, 7200, 17.0));

        store.replace_all(
            Period::Hour,
            vec![observation(&source, Period::Hour, 10800, 16.0)],
        );

        let series = store.series(Period::Hour).unwrap();
        assert_eq!(series.len(), 1);
        assert_eq!(series.first().unwrap().timestamp(), 10800);
    }

    #[test]
    fn test_prune_only_touches_realtime() {
        let source = SourceId::new("wf");
        let mut store = SourceStore::new(source.clone());
        for ts in [100, 200, 300] {
            store.insert(Period::Now, observation(&source, Period::Now, ts, 20.0));
        }
        store.insert(Period::Day, observation(&source, Period::Day, 100, 15.0));

        assert_eq!(store.prune_realtime(250), 2);
        assert_eq!(store.series(Period::Now).unwrap().len(), 1);
        assert_eq!(store.series(Period::Day).unwrap().len(), 1);
    }

    #[test]
    fn test_keys_union_across_buckets() {
        let source = SourceId::new("wf");
        let mut store = SourceStore::new(source.clone());
        store.insert(Period::Now, observation(&source, Period::Now, 100, 20.0));

        let mut hourly = Observation::new(3600, source.clone(), Period::Hour);
        hourly.insert(
            CategoryKey::parse("environment.wind.speed.speed").unwrap(),
            Measurement::new(3.0, Unit::per(Unit::Meter, Unit::Second)),
        );
        store.insert(Period::Hour, hourly);

        let keys = store.keys();
        assert_eq!(keys.len(), 2);
        assert!(keys.contains(&CategoryKey::parse("environment.temperature.temperature").unwrap()));
        assert!(keys.contains(&CategoryKey::parse("environment.wind.speed.speed").unwrap()));
    }
}
