//! # Configuration
//!
//! Engine configuration, loaded with precedence: overrides > env vars >
//! config file > profile defaults. The tuning profile supplies the baseline;
//! anything set explicitly in the file or environment wins over it.
//!
//! # Example config file (skymerge.toml)
//! ```toml
//! profile = "low-latency"
//! coalesce_window_ms = 150
//! display_system = "metric"
//!
//! [preferences.preferred]
//! "environment.temperature.temperature" = "wf"
//!
//! [preferences.categories]
//! "environment.wind" = "openmeteo"
//! ```

use crate::coalescer::CoalescerConfig;
use crate::dispatch::DispatchConfig;
use crate::error::Result;
use crate::key::{CategoryKey, SourceId};
use crate::merged::SourcePreferences;
use crate::units::UnitSystem;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

// =============================================================================
// Notification Defaults
// =============================================================================

/// Default debounce window for change batching (milliseconds)
pub const DEFAULT_COALESCE_WINDOW_MS: u64 = 200;

/// Default cap on distinct keys buffered per batch
pub const DEFAULT_COALESCER_CAPACITY: usize = 4096;

// =============================================================================
// Monitor Defaults
// =============================================================================

/// Default interval between pending-key monitor sweeps (seconds)
pub const DEFAULT_MONITOR_SWEEP_SECS: u64 = 5;

/// Default sweep attempts before an unsatisfied monitor is dropped
pub const DEFAULT_MONITOR_MAX_ATTEMPTS: u32 = 12;

// =============================================================================
// Storage Defaults
// =============================================================================

/// Default horizon for aged realtime entries (seconds)
pub const DEFAULT_REALTIME_RETENTION_SECS: i64 = 86_400;

/// Default tolerance for nearest-timestamp lookups (seconds)
pub const DEFAULT_NEAREST_TOLERANCE_SECS: i64 = 1_800;

/// Engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Tuning profile supplying the baseline for everything below
    pub profile: Profile,
    /// Debounce window for change batching (milliseconds)
    pub coalesce_window_ms: u64,
    /// Cap on distinct keys buffered per batch
    pub coalescer_capacity: usize,
    /// Interval between pending-key monitor sweeps (seconds)
    pub monitor_sweep_secs: u64,
    /// Sweep attempts before an unsatisfied monitor is dropped
    pub monitor_max_attempts: u32,
    /// How long aged realtime entries are kept (seconds)
    pub realtime_retention_secs: i64,
    /// Tolerance for nearest-timestamp lookups (seconds)
    pub nearest_tolerance_secs: i64,
    /// Unit system values are rendered in
    pub display_system: UnitSystem,
    /// Source preference tables applied at merge resolution
    pub preferences: PreferencesConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            profile: Profile::Balanced,
            coalesce_window_ms: DEFAULT_COALESCE_WINDOW_MS,
            coalescer_capacity: DEFAULT_COALESCER_CAPACITY,
            monitor_sweep_secs: DEFAULT_MONITOR_SWEEP_SECS,
            monitor_max_attempts: DEFAULT_MONITOR_MAX_ATTEMPTS,
            realtime_retention_secs: DEFAULT_REALTIME_RETENTION_SECS,
            nearest_tolerance_secs: DEFAULT_NEAREST_TOLERANCE_SECS,
            display_system: UnitSystem::Metric,
            preferences: PreferencesConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load configuration with precedence: overrides > env > file > profile.
    ///
    /// The profile is resolved first so its preset becomes the default
    /// layer; explicit values from any later layer override the preset.
    pub fn load(config_path: Option<&str>, overrides: ConfigOverrides) -> Result<Self> {
        let probe = Self::layered(
            Figment::from(Serialized::defaults(EngineConfig::default())),
            config_path,
            &overrides,
        );
        let profile: Profile = probe.extract_inner("profile").unwrap_or_default();

        let figment = Self::layered(
            Figment::from(Serialized::defaults(EngineConfig::for_profile(profile))),
            config_path,
            &overrides,
        );
        Ok(figment.extract()?)
    }

    /// Load from environment and optional config file only (no overrides).
    pub fn from_env(config_path: Option<&str>) -> Result<Self> {
        Self::load(config_path, ConfigOverrides::default())
    }

    fn layered(base: Figment, config_path: Option<&str>, overrides: &ConfigOverrides) -> Figment {
        let mut figment = base;
        if let Some(path) = config_path {
            figment = figment.merge(Toml::file(path));
        }
        figment = figment.merge(Env::prefixed("SKYMERGE_").split("__"));
        figment.merge(Serialized::defaults(overrides.clone()))
    }

    /// The configuration a profile starts from.
    pub fn for_profile(profile: Profile) -> Self {
        let base = Self {
            profile,
            ..Self::default()
        };
        match profile {
            Profile::Balanced => base,
            Profile::LowLatency => Self {
                coalesce_window_ms: 50,
                coalescer_capacity: 1024,
                monitor_sweep_secs: 2,
                ..base
            },
            Profile::HighThroughput => Self {
                coalesce_window_ms: 500,
                coalescer_capacity: 8192,
                monitor_sweep_secs: 10,
                ..base
            },
        }
    }

    /// Dispatcher settings derived from this configuration.
    pub fn dispatch_config(&self) -> DispatchConfig {
        DispatchConfig {
            coalescer: CoalescerConfig {
                window: Duration::from_millis(self.coalesce_window_ms),
                capacity: self.coalescer_capacity,
            },
            monitor_sweep_interval: Duration::from_secs(self.monitor_sweep_secs),
            monitor_max_attempts: self.monitor_max_attempts,
        }
    }

    /// Build the merge-time preference table. Fails on malformed keys.
    pub fn build_preferences(&self) -> Result<SourcePreferences> {
        let mut preferences = SourcePreferences::new();
        for (key, source) in &self.preferences.preferred {
            preferences.prefer(CategoryKey::parse(key)?, SourceId::new(source));
        }
        for (category, source) in &self.preferences.categories {
            preferences.prefer_category(CategoryKey::parse(category)?, SourceId::new(source));
        }
        Ok(preferences)
    }
}

/// Performance tuning profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum Profile {
    /// Balanced settings for general workloads
    #[default]
    Balanced,
    /// Snappier notification at the cost of more wakeups
    LowLatency,
    /// Wider batches for heavy ingest fan-in
    HighThroughput,
}

/// Source preference tables, keyed by canonical key text.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PreferencesConfig {
    /// Exact key → source that wins when it carries the key
    pub preferred: BTreeMap<String, String>,
    /// Category subtree → default source
    pub categories: BTreeMap<String, String>,
}

/// Programmatic overrides that take precedence over file and env config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile: Option<Profile>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coalesce_window_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub monitor_sweep_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub realtime_retention_secs: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_system: Option<UnitSystem>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.profile, Profile::Balanced);
        assert_eq!(config.coalesce_window_ms, DEFAULT_COALESCE_WINDOW_MS);
        assert_eq!(config.monitor_max_attempts, DEFAULT_MONITOR_MAX_ATTEMPTS);
        assert_eq!(config.display_system, UnitSystem::Metric);
    }

    #[test]
    fn test_profile_presets() {
        let low = EngineConfig::for_profile(Profile::LowLatency);
        assert_eq!(low.coalesce_window_ms, 50);
        assert_eq!(low.coalescer_capacity, 1024);

        let high = EngineConfig::for_profile(Profile::HighThroughput);
        assert_eq!(high.coalesce_window_ms, 500);

        let dispatch = high.dispatch_config();
        assert_eq!(dispatch.coalescer.window, Duration::from_millis(500));
        assert_eq!(dispatch.coalescer.capacity, 8192);
    }

    #[test]
    fn test_profile_serde() {
        let json = serde_json::to_string(&Profile::HighThroughput).unwrap();
        assert_eq!(json, "\"high-throughput\"");

        let profile: Profile = serde_json::from_str("\"low-latency\"").unwrap();
        assert_eq!(profile, Profile::LowLatency);
    }

    #[test]
    fn test_env_overrides_defaults() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("SKYMERGE_COALESCE_WINDOW_MS", "350");
            jail.set_env("SKYMERGE_DISPLAY_SYSTEM", "imperial");

            let config = EngineConfig::from_env(None).expect("load");
            assert_eq!(config.coalesce_window_ms, 350);
            assert_eq!(config.display_system, UnitSystem::Imperial);
            Ok(())
        });
    }

    #[test]
    fn test_file_values_override_profile_preset() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                "skymerge.toml",
                r#"
                profile = "low-latency"
                coalesce_window_ms = 120

                [preferences.categories]
                "environment.wind" = "openmeteo"
            "#,
            )?;

            let config = EngineConfig::from_env(Some("skymerge.toml")).expect("load");
            assert_eq!(config.profile, Profile::LowLatency);
            // Explicit value wins over the preset's 50
            assert_eq!(config.coalesce_window_ms, 120);
            // Untouched fields still come from the preset
            assert_eq!(config.coalescer_capacity, 1024);
            assert_eq!(
                config.preferences.categories.get("environment.wind"),
                Some(&"openmeteo".to_string())
            );
            Ok(())
        });
    }

    #[test]
    fn test_overrides_beat_env() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("SKYMERGE_COALESCE_WINDOW_MS", "350");

            let overrides = ConfigOverrides {
                coalesce_window_ms: Some(75),
                ..ConfigOverrides::default()
            };
            let config = EngineConfig::load(None, overrides).expect("load");
            assert_eq!(config.coalesce_window_ms, 75);
            Ok(())
        });
    }

    #[test]
    fn test_build_preferences() {
        let mut config = EngineConfig::default();
        config.preferences.preferred.insert(
            "environment.temperature.temperature".to_string(),
            "wf".to_string(),
        );
        config
            .preferences
            .categories
            .insert("environment.wind".to_string(), "openmeteo".to_string());

        let preferences = config.build_preferences().unwrap();
        let temp = CategoryKey::parse("environment.temperature.temperature").unwrap();
        assert_eq!(preferences.preferred_for(&temp).unwrap().as_str(), "wf");
        let gust = CategoryKey::parse("environment.wind.speed.gust").unwrap();
        assert_eq!(preferences.default_for(&gust).unwrap().as_str(), "openmeteo");

        config
            .preferences
            .preferred
            .insert("not..a..key".to_string(), "wf".to_string());
        assert!(config.build_preferences().is_err());
    }
}
