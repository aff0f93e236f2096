//! # Key Coalescing Module
//!
//! Debounces change notifications by combining the keys touched in a burst
//! of updates into one batch. A batch opens when the first key arrives and
//! closes when the debounce window elapses (or the batch hits capacity);
//! within a batch each key appears once, however many updates touched it.
//!
//! ## Configuration
//!
//! - `window`: Debounce window measured from the first key in the batch
//! - `capacity`: Maximum distinct keys to buffer before forcing a flush

use crate::key::CategoryKey;
use rustc_hash::FxHashSet;
use std::time::Duration;
use tokio::time::Instant;

/// Configuration for key coalescing
#[derive(Debug, Clone)]
pub struct CoalescerConfig {
    /// Debounce window measured from the first key of a batch
    pub window: Duration,
    /// Maximum number of distinct keys to buffer before flush
    pub capacity: usize,
}

impl Default for CoalescerConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_millis(200),
            capacity: 4096,
        }
    }
}

impl CoalescerConfig {
    /// Low-latency configuration: short window, small batches
    pub fn low_latency() -> Self {
        Self {
            window: Duration::from_millis(50),
            capacity: 1024,
        }
    }

    /// High-throughput configuration: wide window, large batches
    pub fn high_throughput() -> Self {
        Self {
            window: Duration::from_millis(500),
            capacity: 8192,
        }
    }

    /// Create config with a custom debounce window
    pub fn with_window(window: Duration) -> Self {
        Self {
            window,
            ..Default::default()
        }
    }
}

/// Statistics for the key coalescer
#[derive(Debug, Clone)]
pub struct CoalescerStats {
    /// Updates absorbed, counting duplicate keys within a batch
    pub total_updates: u64,
    /// Distinct keys that entered batches
    pub total_keys: u64,
    /// Batches flushed
    pub total_flushes: u64,
    /// Keys currently pending
    pub current_pending: usize,
    /// Average distinct keys per flushed batch
    pub average_batch_size: f64,
}

/// Deduplicating batch buffer for changed keys.
///
/// Keys keep first-touch order within a batch. The owner drives time-based
/// flushing via [`KeyCoalescer::time_until_deadline`]; only capacity
/// overflow flushes from inside [`KeyCoalescer::add`].
pub struct KeyCoalescer {
    pending: Vec<CategoryKey>,
    seen: FxHashSet<CategoryKey>,
    config: CoalescerConfig,
    /// Deadline for the open batch; `None` while empty
    deadline: Option<Instant>,
    total_updates: u64,
    total_keys: u64,
    total_flushes: u64,
}

impl KeyCoalescer {
    pub fn new() -> Self {
        Self::with_config(CoalescerConfig::default())
    }

    pub fn with_config(config: CoalescerConfig) -> Self {
        Self {
            pending: Vec::with_capacity(config.capacity),
            seen: FxHashSet::default(),
            config,
            deadline: None,
            total_updates: 0,
            total_keys: 0,
            total_flushes: 0,
        }
    }

    /// Record one touched key.
    ///
    /// Returns `Some(batch)` only when the buffer overflows capacity; the
    /// normal path leaves the batch open until its window deadline.
    pub fn add(&mut self, key: CategoryKey) -> Option<Vec<CategoryKey>> {
        self.total_updates += 1;

        if self.seen.insert(key.clone()) {
            if self.pending.is_empty() {
                self.deadline = Some(Instant::now() + self.config.window);
            }
            self.pending.push(key);
            self.total_keys += 1;
        }

        if self.pending.len() >= self.config.capacity {
            self.flush()
        } else {
            None
        }
    }

    /// Close the open batch, returning it if non-empty.
    pub fn flush(&mut self) -> Option<Vec<CategoryKey>> {
        if self.pending.is_empty() {
            return None;
        }

        self.deadline = None;
        self.seen.clear();
        self.total_flushes += 1;

        Some(std::mem::replace(
            &mut self.pending,
            Vec::with_capacity(self.config.capacity),
        ))
    }

    /// Time remaining until the open batch's deadline, `None` while empty.
    pub fn time_until_deadline(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn stats(&self) -> CoalescerStats {
        CoalescerStats {
            total_updates: self.total_updates,
            total_keys: self.total_keys,
            total_flushes: self.total_flushes,
            current_pending: self.pending.len(),
            average_batch_size: if self.total_flushes > 0 {
                self.total_keys as f64 / self.total_flushes as f64
            } else {
                0.0
            },
        }
    }
}

impl Default for KeyCoalescer {
    fn default() -> Self {
        Self::new()
    }
}
