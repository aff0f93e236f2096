//! # Dispatcher
//!
//! The merge registry and notification hub. One [`MergedValue`] cell per
//! canonical key; every source update lands here, re-resolves its cell, and
//! queues the key for notification. Keys are debounced through the
//! [`KeyCoalescer`] so a burst of ingests produces one batch of change
//! events rather than a callback per reading.
//!
//! Keys requested before any source carries them become monitors: a bounded
//! background sweep re-checks them and gives up after a configured number of
//! attempts. A satisfied monitor notifies its requesters through the same
//! debounced delivery path as ordinary subscriptions, exactly once.

use crate::coalescer::{CoalescerConfig, CoalescerStats, KeyCoalescer};
use crate::container::Container;
use crate::key::CategoryKey;
use crate::merged::{MergedValue, ResolvedValue, SourcePreferences};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use rustc_hash::{FxHashMap, FxHashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, trace};

/// Configuration for the dispatcher and its background tasks
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Debounce settings for change batching
    pub coalescer: CoalescerConfig,
    /// How often pending key monitors are re-checked
    pub monitor_sweep_interval: Duration,
    /// Sweep attempts before an unsatisfied monitor is dropped
    pub monitor_max_attempts: u32,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            coalescer: CoalescerConfig::default(),
            monitor_sweep_interval: Duration::from_secs(5),
            monitor_max_attempts: 12,
        }
    }
}

/// Handle identifying one registered subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

/// Which keys a subscription wants to hear about.
#[derive(Debug, Clone)]
pub enum KeyFilter {
    /// Every key
    All,
    /// One exact key
    Exact(CategoryKey),
    /// A key and everything beneath it
    Subtree(CategoryKey),
}

impl KeyFilter {
    pub fn matches(&self, key: &CategoryKey) -> bool {
        match self {
            KeyFilter::All => true,
            KeyFilter::Exact(exact) => exact == key,
            KeyFilter::Subtree(prefix) => key.is_within(prefix),
        }
    }
}

/// One change notification, carrying the merge cell so the receiver can read
/// the resolved value, per-source containers, or the forecast curve.
#[derive(Clone)]
pub struct ChangeEvent {
    key: CategoryKey,
    merged: Arc<MergedValue>,
}

impl ChangeEvent {
    pub fn key(&self) -> &CategoryKey {
        &self.key
    }

    pub fn merged(&self) -> &Arc<MergedValue> {
        &self.merged
    }

    pub fn value(&self) -> Option<Arc<ResolvedValue>> {
        self.merged.value()
    }
}

impl std::fmt::Debug for ChangeEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeEvent").field("key", &self.key).finish()
    }
}

/// Outcome of a key request.
#[derive(Debug)]
pub enum KeyRequest {
    /// The key has a resolved value now
    Ready(Arc<MergedValue>),
    /// No source carries the key yet; a monitor was registered
    Pending,
}

type Callback = Arc<dyn Fn(&ChangeEvent) + Send + Sync>;

#[derive(Clone)]
struct Subscription {
    id: SubscriberId,
    filter: KeyFilter,
    callback: Callback,
}

#[derive(Debug)]
struct MonitoredKey {
    requesters: Vec<SubscriberId>,
    requires_forecast: bool,
    attempts: u32,
}

impl MonitoredKey {
    fn satisfied_by(&self, merged: &MergedValue) -> bool {
        merged.value().is_some() && (!self.requires_forecast || merged.has_forecast())
    }
}

/// Point-in-time dispatcher statistics
#[derive(Debug, Clone)]
pub struct DispatchStats {
    /// Keys with a merge cell
    pub keys: usize,
    /// Container updates applied
    pub updates: u64,
    /// Notification batches delivered
    pub batches_delivered: u64,
    /// Per-key change events delivered
    pub events_delivered: u64,
    /// Monitors still waiting
    pub pending_monitors: usize,
    /// Monitors satisfied and retired
    pub monitors_satisfied: u64,
    /// Monitors dropped after exhausting their attempts
    pub monitors_expired: u64,
    /// Active subscriptions
    pub subscribers: usize,
    /// Debounce buffer statistics
    pub coalescer: CoalescerStats,
}

/// The merge registry and notification hub.
pub struct Dispatcher {
    config: DispatchConfig,
    preferences: SourcePreferences,
    registry: DashMap<CategoryKey, Arc<MergedValue>>,
    coalescer: Mutex<KeyCoalescer>,
    subscribers: RwLock<Vec<Subscription>>,
    next_subscriber: AtomicU64,
    monitors: Mutex<FxHashMap<CategoryKey, MonitoredKey>>,
    changes_tx: mpsc::UnboundedSender<CategoryKey>,
    changes_rx: Mutex<Option<mpsc::UnboundedReceiver<CategoryKey>>>,
    shutdown_tx: watch::Sender<bool>,
    running: AtomicBool,
    updates: AtomicU64,
    batches_delivered: AtomicU64,
    events_delivered: AtomicU64,
    monitors_satisfied: AtomicU64,
    monitors_expired: AtomicU64,
}

impl Dispatcher {
    pub fn new(config: DispatchConfig, preferences: SourcePreferences) -> Self {
        let (changes_tx, changes_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            coalescer: Mutex::new(KeyCoalescer::with_config(config.coalescer.clone())),
            config,
            preferences,
            registry: DashMap::new(),
            subscribers: RwLock::new(Vec::new()),
            next_subscriber: AtomicU64::new(0),
            monitors: Mutex::new(FxHashMap::default()),
            changes_tx,
            changes_rx: Mutex::new(Some(changes_rx)),
            shutdown_tx,
            running: AtomicBool::new(false),
            updates: AtomicU64::new(0),
            batches_delivered: AtomicU64::new(0),
            events_delivered: AtomicU64::new(0),
            monitors_satisfied: AtomicU64::new(0),
            monitors_expired: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    pub fn preferences(&self) -> &SourcePreferences {
        &self.preferences
    }

    /// Spawn the notifier and monitor-sweep tasks. Updates queued before
    /// this point are delivered once the notifier runs. Idempotent.
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let Some(rx) = self.changes_rx.lock().take() else {
            return;
        };

        let notifier = Arc::clone(self);
        tokio::spawn(async move { notifier.run_notifier(rx).await });

        let sweeper = Arc::clone(self);
        tokio::spawn(async move { sweeper.run_sweep().await });
        debug!("dispatcher started");
    }

    /// Stop the background tasks. Buffered notifications are flushed on the
    /// way out; merge state stays readable afterwards.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        let _ = self.shutdown_tx.send(true);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Apply one source's refreshed container and queue the key for
    /// notification.
    pub fn update(&self, rank: usize, container: Container) {
        let key = container.key().clone();
        let merged = self
            .registry
            .entry(key.clone())
            .or_insert_with(|| Arc::new(MergedValue::new(key.clone())))
            .value()
            .clone();
        merged.attach(rank, container, &self.preferences);
        self.updates.fetch_add(1, Ordering::Relaxed);
        self.enqueue(key);
    }

    fn enqueue(&self, key: CategoryKey) {
        if self.changes_tx.send(key).is_err() {
            trace!("change channel closed, notification dropped");
        }
    }

    /// The resolved reading for a key, if any source carries it.
    pub fn value(&self, key: &CategoryKey) -> Option<Arc<ResolvedValue>> {
        self.registry.get(key)?.value().value()
    }

    /// The merge cell for a key.
    pub fn merged(&self, key: &CategoryKey) -> Option<Arc<MergedValue>> {
        self.registry.get(key).map(|entry| entry.value().clone())
    }

    /// Every known key, sorted.
    pub fn keys(&self) -> Vec<CategoryKey> {
        let mut keys: Vec<CategoryKey> = self
            .registry
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        keys.sort_unstable();
        keys
    }

    pub fn key_count(&self) -> usize {
        self.registry.len()
    }

    /// Request a key, monitoring it when unavailable. The optional requester
    /// is notified through its subscription callback once the key (and, when
    /// required, its forecast) shows up, regardless of its filter.
    pub fn request_key(
        &self,
        key: &CategoryKey,
        requester: Option<SubscriberId>,
        requires_forecast: bool,
    ) -> KeyRequest {
        if let Some(merged) = self.merged(key) {
            let available =
                merged.value().is_some() && (!requires_forecast || merged.has_forecast());
            if available {
                return KeyRequest::Ready(merged);
            }
        }

        let mut monitors = self.monitors.lock();
        let monitor = monitors.entry(key.clone()).or_insert_with(|| MonitoredKey {
            requesters: Vec::new(),
            requires_forecast,
            attempts: 0,
        });
        monitor.requires_forecast |= requires_forecast;
        // Fresh interest restarts the attempt budget
        monitor.attempts = 0;
        if let Some(id) = requester {
            if !monitor.requesters.contains(&id) {
                monitor.requesters.push(id);
            }
        }
        trace!(key = %key, requires_forecast, "key unavailable, monitor registered");
        KeyRequest::Pending
    }

    pub fn pending_count(&self) -> usize {
        self.monitors.lock().len()
    }

    /// Register a change callback. Callbacks run on the notifier task, so
    /// they should hand heavy work elsewhere.
    pub fn on_change<F>(&self, filter: KeyFilter, callback: F) -> SubscriberId
    where
        F: Fn(&ChangeEvent) + Send + Sync + 'static,
    {
        let id = SubscriberId(self.next_subscriber.fetch_add(1, Ordering::Relaxed));
        self.subscribers.write().push(Subscription {
            id,
            filter,
            callback: Arc::new(callback),
        });
        id
    }

    /// Remove a subscription. Returns false when the id was not registered.
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        let mut subscribers = self.subscribers.write();
        let before = subscribers.len();
        subscribers.retain(|subscription| subscription.id != id);
        before != subscribers.len()
    }

    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            keys: self.registry.len(),
            updates: self.updates.load(Ordering::Relaxed),
            batches_delivered: self.batches_delivered.load(Ordering::Relaxed),
            events_delivered: self.events_delivered.load(Ordering::Relaxed),
            pending_monitors: self.monitors.lock().len(),
            monitors_satisfied: self.monitors_satisfied.load(Ordering::Relaxed),
            monitors_expired: self.monitors_expired.load(Ordering::Relaxed),
            subscribers: self.subscribers.read().len(),
            coalescer: self.coalescer.lock().stats(),
        }
    }

    async fn run_notifier(self: Arc<Self>, mut rx: mpsc::UnboundedReceiver<CategoryKey>) {
        let mut shutdown = self.shutdown_tx.subscribe();
        loop {
            let wait = self.coalescer.lock().time_until_deadline();
            tokio::select! {
                _ = shutdown.changed() => break,
                key = rx.recv() => match key {
                    Some(key) => {
                        let overflow = self.coalescer.lock().add(key);
                        if let Some(batch) = overflow {
                            self.deliver(batch);
                        }
                    }
                    None => break,
                },
                _ = tokio::time::sleep(wait.unwrap_or(Duration::from_secs(3600))), if wait.is_some() => {
                    let batch = self.coalescer.lock().flush();
                    if let Some(batch) = batch {
                        self.deliver(batch);
                    }
                }
            }
        }

        // Flush whatever is still buffered so a stop loses nothing
        while let Ok(key) = rx.try_recv() {
            let _ = self.coalescer.lock().add(key);
        }
        let batch = self.coalescer.lock().flush();
        if let Some(batch) = batch {
            self.deliver(batch);
        }
        debug!("change notifier stopped");
    }

    async fn run_sweep(self: Arc<Self>) {
        let mut shutdown = self.shutdown_tx.subscribe();
        let period = self.config.monitor_sweep_interval;
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = ticker.tick() => self.sweep_monitors(),
            }
        }
        debug!("monitor sweep stopped");
    }

    /// One sweep pass: re-queue satisfied monitors through the ordinary
    /// delivery path, age the rest, drop the ones out of attempts.
    fn sweep_monitors(&self) {
        let mut satisfied = Vec::new();
        {
            let mut monitors = self.monitors.lock();
            monitors.retain(|key, monitor| {
                if let Some(merged) = self.registry.get(key) {
                    if monitor.satisfied_by(merged.value()) {
                        satisfied.push(key.clone());
                        // Kept here; delivery retires it
                        return true;
                    }
                }
                monitor.attempts += 1;
                if monitor.attempts >= self.config.monitor_max_attempts {
                    debug!(key = %key, attempts = monitor.attempts, "monitor never satisfied, dropping");
                    self.monitors_expired.fetch_add(1, Ordering::Relaxed);
                    false
                } else {
                    true
                }
            });
        }
        for key in satisfied {
            self.enqueue(key);
        }
    }

    /// Deliver one batch: each key goes to every filter-matched subscriber,
    /// plus the requesters of a now-satisfied monitor, each at most once.
    fn deliver(&self, batch: Vec<CategoryKey>) {
        let subscriptions: Vec<Subscription> = self.subscribers.read().clone();
        let batch_len = batch.len();

        for key in batch {
            let Some(merged) = self.merged(&key) else {
                continue;
            };
            let event = ChangeEvent {
                key: key.clone(),
                merged,
            };

            let mut notified: FxHashSet<SubscriberId> = FxHashSet::default();
            for subscription in &subscriptions {
                if subscription.filter.matches(&key) {
                    (subscription.callback)(&event);
                    notified.insert(subscription.id);
                }
            }

            let requesters = {
                let mut monitors = self.monitors.lock();
                match monitors.get(&key) {
                    Some(monitor) if monitor.satisfied_by(event.merged()) => monitors
                        .remove(&key)
                        .map(|monitor| monitor.requesters),
                    _ => None,
                }
            };
            if let Some(requesters) = requesters {
                self.monitors_satisfied.fetch_add(1, Ordering::Relaxed);
                for id in requesters {
                    if notified.contains(&id) {
                        continue;
                    }
                    if let Some(subscription) =
                        subscriptions.iter().find(|subscription| subscription.id == id)
                    {
                        (subscription.callback)(&event);
                    }
                }
            }

            self.events_delivered.fetch_add(1, Ordering::Relaxed);
        }

        self.batches_delivered.fetch_add(1, Ordering::Relaxed);
        trace!(keys = batch_len, "change batch delivered");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::{Period, SourceId};
    use crate::series::Observation;
    use crate::store::SourceStore;
    use crate::units::{Measurement, Unit};

    fn key(text: &str) -> CategoryKey {
        CategoryKey::parse(text).unwrap()
    }

    fn container(source: &str, period: Period, ts: i64, k: &str, v: f64) -> Container {
        let source = SourceId::new(source);
        let mut store = SourceStore::new(source.clone());
        let mut obs = Observation::new(ts, source, period);
        obs.insert(key(k), Measurement::new(v, Unit::Celsius));
        store.insert(period, obs);
        Container::capture(&store, &key(k)).unwrap()
    }

    fn collector() -> (Arc<Mutex<Vec<String>>>, impl Fn(&ChangeEvent) + Send + Sync) {
        let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        (seen, move |event: &ChangeEvent| {
            sink.lock().push(event.key().as_str().to_string())
        })
    }

    #[test]
    fn test_update_registers_and_resolves() {
        let dispatcher = Dispatcher::new(DispatchConfig::default(), SourcePreferences::new());

        dispatcher.update(0, container("wf", Period::Now, 100, "environment.temperature.temperature", 21.0));

        assert_eq!(dispatcher.key_count(), 1);
        let resolved = dispatcher
            .value(&key("environment.temperature.temperature"))
            .unwrap();
        assert_eq!(resolved.measurement().value(), 21.0);
        assert_eq!(dispatcher.stats().updates, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_debounced_batch_delivery() {
        let dispatcher = Arc::new(Dispatcher::new(
            DispatchConfig::default(),
            SourcePreferences::new(),
        ));
        dispatcher.start();

        let (seen, callback) = collector();
        dispatcher.on_change(KeyFilter::All, callback);

        dispatcher.update(0, container("wf", Period::Now, 100, "environment.temperature.temperature", 21.0));
        dispatcher.update(0, container("wf", Period::Now, 100, "environment.humidity.humidity", 50.0));
        dispatcher.update(0, container("wf", Period::Now, 101, "environment.temperature.temperature", 21.1));

        // Inside the window nothing is delivered yet
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(seen.lock().is_empty());

        tokio::time::sleep(Duration::from_millis(200)).await;
        let delivered = seen.lock().clone();
        assert_eq!(delivered.len(), 2);
        assert!(delivered.contains(&"environment.temperature.temperature".to_string()));
        assert!(delivered.contains(&"environment.humidity.humidity".to_string()));

        let stats = dispatcher.stats();
        assert_eq!(stats.batches_delivered, 1);
        assert_eq!(stats.events_delivered, 2);
        dispatcher.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_filters_scope_delivery() {
        let dispatcher = Arc::new(Dispatcher::new(
            DispatchConfig::default(),
            SourcePreferences::new(),
        ));
        dispatcher.start();

        let (wind_seen, wind_callback) = collector();
        dispatcher.on_change(KeyFilter::Subtree(key("environment.wind")), wind_callback);
        let (exact_seen, exact_callback) = collector();
        dispatcher.on_change(
            KeyFilter::Exact(key("environment.humidity.humidity")),
            exact_callback,
        );

        dispatcher.update(0, container("wf", Period::Now, 100, "environment.wind.speed.speed", 3.0));
        dispatcher.update(0, container("wf", Period::Now, 100, "environment.wind.direction.direction", 180.0));
        dispatcher.update(0, container("wf", Period::Now, 100, "environment.humidity.humidity", 50.0));

        tokio::time::sleep(Duration::from_millis(250)).await;

        assert_eq!(wind_seen.lock().len(), 2);
        assert_eq!(
            exact_seen.lock().clone(),
            vec!["environment.humidity.humidity".to_string()]
        );
        dispatcher.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_collapses_to_one_event_per_key() {
        let dispatcher = Arc::new(Dispatcher::new(
            DispatchConfig::default(),
            SourcePreferences::new(),
        ));
        dispatcher.start();

        let (seen, callback) = collector();
        dispatcher.on_change(KeyFilter::All, callback);

        for i in 0..5 {
            dispatcher.update(
                0,
                container("wf", Period::Now, 100 + i, "environment.temperature.temperature", 21.0),
            );
        }
        tokio::time::sleep(Duration::from_millis(250)).await;

        assert_eq!(seen.lock().len(), 1);
        assert_eq!(dispatcher.stats().events_delivered, 1);
        dispatcher.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_monitor_notifies_requester_once() {
        let dispatcher = Arc::new(Dispatcher::new(
            DispatchConfig::default(),
            SourcePreferences::new(),
        ));
        dispatcher.start();

        // The requester's own filter never matches the monitored key
        let (seen, callback) = collector();
        let requester = dispatcher.on_change(KeyFilter::Exact(key("some.other.key")), callback);

        let wanted = key("environment.pressure.pressure");
        let request = dispatcher.request_key(&wanted, Some(requester), false);
        assert!(matches!(request, KeyRequest::Pending));
        assert_eq!(dispatcher.pending_count(), 1);

        dispatcher.update(0, container("wf", Period::Now, 100, "environment.pressure.pressure", 1013.0));
        tokio::time::sleep(Duration::from_millis(250)).await;

        assert_eq!(seen.lock().clone(), vec!["environment.pressure.pressure".to_string()]);
        assert_eq!(dispatcher.pending_count(), 0);
        assert_eq!(dispatcher.stats().monitors_satisfied, 1);

        // Later updates to the key no longer reach the requester
        dispatcher.update(0, container("wf", Period::Now, 200, "environment.pressure.pressure", 1014.0));
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(seen.lock().len(), 1);

        match dispatcher.request_key(&wanted, None, false) {
            KeyRequest::Ready(merged) => {
                assert_eq!(merged.value().unwrap().measurement().value(), 1014.0)
            }
            KeyRequest::Pending => panic!("key should be ready"),
        }
        dispatcher.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_monitor_with_overlapping_filter_fires_once() {
        let dispatcher = Arc::new(Dispatcher::new(
            DispatchConfig::default(),
            SourcePreferences::new(),
        ));
        dispatcher.start();

        let (seen, callback) = collector();
        let requester = dispatcher.on_change(KeyFilter::All, callback);

        let wanted = key("environment.pressure.pressure");
        dispatcher.request_key(&wanted, Some(requester), false);
        dispatcher.update(0, container("wf", Period::Now, 100, "environment.pressure.pressure", 1013.0));
        tokio::time::sleep(Duration::from_millis(250)).await;

        assert_eq!(seen.lock().len(), 1);
        dispatcher.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_forecast_requirement_defers_readiness() {
        let dispatcher = Arc::new(Dispatcher::new(
            DispatchConfig::default(),
            SourcePreferences::new(),
        ));
        dispatcher.start();

        let (seen, callback) = collector();
        let requester = dispatcher.on_change(KeyFilter::Exact(key("unrelated.key")), callback);

        let wanted = key("environment.temperature.temperature");
        dispatcher.update(0, container("wf", Period::Now, 100, "environment.temperature.temperature", 21.0));
        tokio::time::sleep(Duration::from_millis(250)).await;

        // Value exists but carries no forecast, so the request stays pending
        let request = dispatcher.request_key(&wanted, Some(requester), true);
        assert!(matches!(request, KeyRequest::Pending));

        dispatcher.update(1, container("om", Period::Hour, 3_600, "environment.temperature.temperature", 18.0));
        tokio::time::sleep(Duration::from_millis(250)).await;

        assert_eq!(seen.lock().clone(), vec!["environment.temperature.temperature".to_string()]);
        assert_eq!(dispatcher.pending_count(), 0);
        dispatcher.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_monitor_expires_after_max_attempts() {
        let config = DispatchConfig {
            monitor_sweep_interval: Duration::from_secs(1),
            monitor_max_attempts: 2,
            ..DispatchConfig::default()
        };
        let dispatcher = Arc::new(Dispatcher::new(config, SourcePreferences::new()));
        dispatcher.start();

        dispatcher.request_key(&key("never.reported.anywhere"), None, false);
        assert_eq!(dispatcher.pending_count(), 1);

        tokio::time::sleep(Duration::from_millis(2_500)).await;

        assert_eq!(dispatcher.pending_count(), 0);
        assert_eq!(dispatcher.stats().monitors_expired, 1);
        dispatcher.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_unsubscribe_stops_delivery() {
        let dispatcher = Arc::new(Dispatcher::new(
            DispatchConfig::default(),
            SourcePreferences::new(),
        ));
        dispatcher.start();

        let (seen, callback) = collector();
        let id = dispatcher.on_change(KeyFilter::All, callback);

        dispatcher.update(0, container("wf", Period::Now, 100, "environment.temperature.temperature", 21.0));
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(seen.lock().len(), 1);

        assert!(dispatcher.unsubscribe(id));
        assert!(!dispatcher.unsubscribe(id));

        dispatcher.update(0, container("wf", Period::Now, 200, "environment.temperature.temperature", 22.0));
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(seen.lock().len(), 1);
        dispatcher.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_flushes_buffered_batch() {
        let dispatcher = Arc::new(Dispatcher::new(
            DispatchConfig::default(),
            SourcePreferences::new(),
        ));
        dispatcher.start();

        let (seen, callback) = collector();
        dispatcher.on_change(KeyFilter::All, callback);

        dispatcher.update(0, container("wf", Period::Now, 100, "environment.temperature.temperature", 21.0));
        dispatcher.update(0, container("wf", Period::Now, 100, "environment.humidity.humidity", 50.0));

        // Stop before the debounce window closes
        tokio::time::sleep(Duration::from_millis(10)).await;
        dispatcher.stop();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(seen.lock().len(), 2);
        assert!(!dispatcher.is_running());
    }
}
