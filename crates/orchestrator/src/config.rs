//! Engine configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::model::JobKind;

/// Shortest tick or poll period accepted
pub const MIN_PERIOD: Duration = Duration::from_millis(1);

/// Timing and sizing for the ticks and the work pool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Interval of the dispatch tick (capacity, reclaim, admission)
    #[serde(with = "duration_millis")]
    pub dispatch_interval: Duration,

    /// Interval of the reconciliation tick (polling, progress)
    #[serde(with = "duration_millis")]
    pub reconcile_interval: Duration,

    /// Work pool size
    pub worker_count: usize,

    /// Delay between polls in a blocking handler loop
    #[serde(with = "duration_millis")]
    pub poll_interval: Duration,

    /// How long a Running unit must have been unchanged before it can be reclaimed
    #[serde(with = "duration_millis")]
    pub reclaim_grace: Duration,

    /// Job kinds whose Running units are never reclaimed
    pub reclaim_excluded_kinds: Vec<JobKind>,

    /// Pending units fetched per page during admission
    pub scan_page_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            dispatch_interval: Duration::from_secs(5),
            reconcile_interval: Duration::from_secs(5),
            worker_count: 2,
            poll_interval: Duration::from_secs(1),
            reclaim_grace: Duration::from_secs(5),
            reclaim_excluded_kinds: Vec::new(),
            scan_page_size: 32,
        }
    }
}

impl EngineConfig {
    /// Load from environment variables, falling back to defaults
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup
    ///
    /// Unparseable values fall back to the default for that field; unknown
    /// job kinds in the exclusion list are skipped.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let millis = |key: &str, default: Duration| {
            lookup(key)
                .and_then(|s| s.trim().parse::<u64>().ok())
                .map(Duration::from_millis)
                .unwrap_or(default)
        };
        // Tick and poll periods must be non-zero
        let period = |key: &str, default: Duration| {
            lookup(key)
                .and_then(|s| s.trim().parse::<u64>().ok())
                .filter(|ms| *ms > 0)
                .map(Duration::from_millis)
                .unwrap_or(default)
        };
        let count = |key: &str, default: usize| {
            lookup(key)
                .and_then(|s| s.trim().parse::<usize>().ok())
                .unwrap_or(default)
        };

        let reclaim_excluded_kinds = lookup("RECLAIM_EXCLUDED_JOB_KINDS")
            .map(|list| {
                list.split(',')
                    .filter(|s| !s.trim().is_empty())
                    .filter_map(|s| s.parse::<JobKind>().ok())
                    .collect()
            })
            .unwrap_or_default();

        Self {
            dispatch_interval: period("DISPATCH_INTERVAL_MS", defaults.dispatch_interval),
            reconcile_interval: period("RECONCILE_INTERVAL_MS", defaults.reconcile_interval),
            worker_count: count("WORKER_COUNT", defaults.worker_count).max(1),
            poll_interval: period("POLL_INTERVAL_MS", defaults.poll_interval),
            reclaim_grace: millis("RECLAIM_GRACE_MS", defaults.reclaim_grace),
            reclaim_excluded_kinds,
            scan_page_size: count("SCAN_PAGE_SIZE", defaults.scan_page_size).max(1),
        }
    }

    /// Set both tick intervals, raised to at least one millisecond
    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        let interval = interval.max(MIN_PERIOD);
        self.dispatch_interval = interval;
        self.reconcile_interval = interval;
        self
    }

    pub fn with_worker_count(mut self, count: usize) -> Self {
        self.worker_count = count.max(1);
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval.max(MIN_PERIOD);
        self
    }

    pub fn with_reclaim_grace(mut self, grace: Duration) -> Self {
        self.reclaim_grace = grace;
        self
    }

    pub fn with_reclaim_excluded(mut self, kinds: Vec<JobKind>) -> Self {
        self.reclaim_excluded_kinds = kinds;
        self
    }

    pub fn with_scan_page_size(mut self, size: usize) -> Self {
        self.scan_page_size = size.max(1);
        self
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_millis().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.dispatch_interval, Duration::from_secs(5));
        assert_eq!(config.reconcile_interval, Duration::from_secs(5));
        assert_eq!(config.worker_count, 2);
        assert_eq!(config.reclaim_grace, config.dispatch_interval);
        assert!(config.reclaim_excluded_kinds.is_empty());
    }

    #[test]
    fn test_config_builder() {
        let config = EngineConfig::default()
            .with_tick_interval(Duration::from_millis(200))
            .with_worker_count(0)
            .with_reclaim_excluded(vec![JobKind::OneClickClone]);

        assert_eq!(config.dispatch_interval, Duration::from_millis(200));
        assert_eq!(config.reconcile_interval, Duration::from_millis(200));
        assert_eq!(config.worker_count, 1);
        assert_eq!(config.reclaim_excluded_kinds, vec![JobKind::OneClickClone]);
    }

    #[test]
    fn test_from_lookup() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("DISPATCH_INTERVAL_MS", "1500"),
            ("WORKER_COUNT", "4"),
            ("POLL_INTERVAL_MS", "not-a-number"),
            (
                "RECLAIM_EXCLUDED_JOB_KINDS",
                "one_click_clone, LIP_SYNC_VIDEO_VOICE,bogus,",
            ),
        ]);
        let config = EngineConfig::from_lookup(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.dispatch_interval, Duration::from_millis(1500));
        assert_eq!(config.reconcile_interval, Duration::from_secs(5));
        assert_eq!(config.worker_count, 4);
        assert_eq!(config.poll_interval, Duration::from_secs(1));
        assert_eq!(
            config.reclaim_excluded_kinds,
            vec![JobKind::OneClickClone, JobKind::LipSyncVideoVoice]
        );
    }

    #[test]
    fn test_zero_periods_are_rejected() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("DISPATCH_INTERVAL_MS", "0"),
            ("RECONCILE_INTERVAL_MS", "0"),
            ("POLL_INTERVAL_MS", "0"),
            ("RECLAIM_GRACE_MS", "0"),
        ]);
        let config = EngineConfig::from_lookup(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.dispatch_interval, Duration::from_secs(5));
        assert_eq!(config.reconcile_interval, Duration::from_secs(5));
        assert_eq!(config.poll_interval, Duration::from_secs(1));
        assert_eq!(config.reclaim_grace, Duration::ZERO);

        let config = EngineConfig::default()
            .with_tick_interval(Duration::ZERO)
            .with_poll_interval(Duration::ZERO);
        assert_eq!(config.dispatch_interval, MIN_PERIOD);
        assert_eq!(config.reconcile_interval, MIN_PERIOD);
        assert_eq!(config.poll_interval, MIN_PERIOD);
    }

    #[test]
    fn test_serde_uses_millis() {
        let json = serde_json::to_value(EngineConfig::default()).unwrap();
        assert_eq!(json["dispatch_interval"], 5000);
        let back: EngineConfig = serde_json::from_value(json).unwrap();
        assert_eq!(back, EngineConfig::default());
    }
}
