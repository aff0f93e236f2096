//! # Containers
//!
//! Owned snapshots of one canonical key's state within a single source.
//! A container is captured from the source's store at update time and is
//! immutable afterwards; merge resolution reads containers, never stores.
//!
//! The headline value falls back across period buckets in ascending width:
//! a live reading wins, otherwise the nearest upcoming hourly forecast,
//! otherwise daily.

use crate::key::{CategoryKey, Period, SourceId};
use crate::series::Timestamp;
use crate::store::SourceStore;
use crate::units::Measurement;
use std::sync::Arc;

/// One timestamped reading inside a container.
#[derive(Debug, Clone, PartialEq)]
pub struct PointValue {
    timestamp: Timestamp,
    measurement: Measurement,
}

impl PointValue {
    pub fn new(timestamp: Timestamp, measurement: Measurement) -> Self {
        Self {
            timestamp,
            measurement,
        }
    }

    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    pub fn measurement(&self) -> &Measurement {
        &self.measurement
    }
}

/// The full forward curve for a key, taken from the finest-grained forecast
/// bucket that carries it. Points are shared, so cloning a curve is cheap.
#[derive(Debug, Clone)]
pub struct ForecastCurve {
    period: Period,
    points: Arc<Vec<(Timestamp, Measurement)>>,
}

impl ForecastCurve {
    pub fn period(&self) -> Period {
        self.period
    }

    pub fn points(&self) -> &[(Timestamp, Measurement)] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// The point nearest the given time, by absolute distance. Ties between
    /// an earlier and a later point go to the earlier one.
    pub fn nearest(&self, timestamp: Timestamp) -> Option<&(Timestamp, Measurement)> {
        let index = self
            .points
            .partition_point(|(point_ts, _)| *point_ts <= timestamp);
        let before = index.checked_sub(1).and_then(|i| self.points.get(i));
        let after = self.points.get(index);
        match (before, after) {
            (Some(b), Some(a)) => {
                if (timestamp - b.0) <= (a.0 - timestamp) {
                    Some(b)
                } else {
                    Some(a)
                }
            }
            (Some(b), None) => Some(b),
            (None, Some(a)) => Some(a),
            (None, None) => None,
        }
    }
}

/// Per-source snapshot of one key across every period bucket that carries it.
#[derive(Debug, Clone)]
pub struct Container {
    source: SourceId,
    key: CategoryKey,
    /// At most one point per period, ascending bucket width. Realtime points
    /// are the latest reading; forecast points the earliest upcoming one.
    points: Vec<(Period, PointValue)>,
    forecast: Option<ForecastCurve>,
}

impl Container {
    /// Snapshot the store's current state for one key. Returns `None` when
    /// the source has no reading for the key in any bucket.
    pub fn capture(store: &SourceStore, key: &CategoryKey) -> Option<Container> {
        let mut points = Vec::new();
        let mut forecast = None;

        for period in Period::ALL {
            let Some(series) = store.series(period) else {
                continue;
            };
            if period.is_realtime() {
                if let Some((timestamp, measurement)) = series.latest_with(key) {
                    points.push((period, PointValue::new(timestamp, measurement.clone())));
                }
            } else {
                if let Some((timestamp, measurement)) = series.first_with(key) {
                    points.push((period, PointValue::new(timestamp, measurement.clone())));
                }
                if forecast.is_none() {
                    let curve = series.curve_for(key);
                    if !curve.is_empty() {
                        forecast = Some(ForecastCurve {
                            period,
                            points: Arc::new(curve),
                        });
                    }
                }
            }
        }

        if points.is_empty() {
            return None;
        }
        Some(Container {
            source: store.source().clone(),
            key: key.clone(),
            points,
            forecast,
        })
    }

    pub fn source(&self) -> &SourceId {
        &self.source
    }

    pub fn key(&self) -> &CategoryKey {
        &self.key
    }

    /// The headline reading after period fallback.
    pub fn value(&self) -> &Measurement {
        self.resolved().1.measurement()
    }

    /// The bucket the headline reading came from.
    pub fn origin(&self) -> Period {
        self.resolved().0
    }

    pub fn timestamp(&self) -> Timestamp {
        self.resolved().1.timestamp()
    }

    fn resolved(&self) -> (Period, &PointValue) {
        // Non-empty by construction; points are in fallback order already
        let (period, point) = &self.points[0];
        (*period, point)
    }

    /// The reading in one specific bucket, bypassing fallback.
    pub fn point_for(&self, period: Period) -> Option<&PointValue> {
        self.points
            .iter()
            .find(|(p, _)| *p == period)
            .map(|(_, point)| point)
    }

    pub fn forecast(&self) -> Option<&ForecastCurve> {
        self.forecast.as_ref()
    }

    pub fn has_forecast(&self) -> bool {
        self.forecast.is_some()
    }
}
