use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::limits::MAX_TURNAROUND_DAYS;

/// Settings each engine needs at runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    /// Longest a write waits for a stock key's lock before failing with `LockTimeout`.
    pub lock_timeout: Duration,
    /// Turnaround applied to stock provisioned without an explicit one.
    pub default_turnaround_days: u32,
    /// Cancelled and returned bookings that ended more than this many days ago are dropped at
    /// compaction. `None` keeps them forever.
    pub retention_days: Option<u32>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_secs(3),
            default_turnaround_days: 0,
            retention_days: Some(90),
        }
    }
}

/// Process-level configuration, read from `RENTLOCK_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub data_dir: PathBuf,
    /// WAL appends between compactions.
    pub compact_threshold: u64,
    pub engine: EngineSettings,
    /// Pending bookings older than this are cancelled by the reaper. `None` disables it.
    pub pending_ttl: Option<Duration>,
    pub metrics_port: Option<u16>,
    pub log_filter: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            compact_threshold: 1000,
            engine: EngineSettings::default(),
            pending_ttl: None,
            metrics_port: None,
            log_filter: "info".into(),
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from any variable source. Unparseable values fall back to the default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let parsed = |name: &str| -> Option<u64> { parse(&lookup, name) };

        let data_dir = lookup("RENTLOCK_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.data_dir);
        let compact_threshold = parsed("RENTLOCK_COMPACT_THRESHOLD")
            .filter(|n| *n > 0)
            .unwrap_or(defaults.compact_threshold);
        let lock_timeout = parsed("RENTLOCK_LOCK_TIMEOUT_MS")
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
            .unwrap_or(defaults.engine.lock_timeout);
        let default_turnaround_days = parse::<u32>(&lookup, "RENTLOCK_TURNAROUND_DAYS")
            .map(|d| d.min(MAX_TURNAROUND_DAYS))
            .unwrap_or(defaults.engine.default_turnaround_days);
        let retention_days = match parse::<u32>(&lookup, "RENTLOCK_RETENTION_DAYS") {
            Some(0) => None,
            Some(days) => Some(days),
            None => defaults.engine.retention_days,
        };
        let pending_ttl = parsed("RENTLOCK_PENDING_TTL_SECS")
            .filter(|s| *s > 0)
            .map(Duration::from_secs);
        let metrics_port = parse::<u16>(&lookup, "RENTLOCK_METRICS_PORT");
        let log_filter = lookup("RENTLOCK_LOG").unwrap_or(defaults.log_filter);

        Self {
            data_dir,
            compact_threshold,
            engine: EngineSettings {
                lock_timeout,
                default_turnaround_days,
                retention_days,
            },
            pending_ttl,
            metrics_port,
            log_filter,
        }
    }
}

fn parse<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Option<T> {
    let raw = lookup(name)?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!("ignoring unparseable {name}={raw:?}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from_pairs(pairs: &[(&str, &str)]) -> EngineConfig {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        EngineConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn empty_environment_gives_defaults() {
        assert_eq!(from_pairs(&[]), EngineConfig::default());
    }

    #[test]
    fn reads_all_variables() {
        let cfg = from_pairs(&[
            ("RENTLOCK_DATA_DIR", "/var/lib/rentlock"),
            ("RENTLOCK_COMPACT_THRESHOLD", "50"),
            ("RENTLOCK_LOCK_TIMEOUT_MS", "750"),
            ("RENTLOCK_TURNAROUND_DAYS", "1"),
            ("RENTLOCK_PENDING_TTL_SECS", "900"),
            ("RENTLOCK_METRICS_PORT", "9100"),
            ("RENTLOCK_LOG", "rentlock=debug"),
            ("RENTLOCK_RETENTION_DAYS", "30"),
        ]);
        assert_eq!(cfg.data_dir, PathBuf::from("/var/lib/rentlock"));
        assert_eq!(cfg.compact_threshold, 50);
        assert_eq!(cfg.engine.lock_timeout, Duration::from_millis(750));
        assert_eq!(cfg.engine.default_turnaround_days, 1);
        assert_eq!(cfg.pending_ttl, Some(Duration::from_secs(900)));
        assert_eq!(cfg.metrics_port, Some(9100));
        assert_eq!(cfg.log_filter, "rentlock=debug");
        assert_eq!(cfg.engine.retention_days, Some(30));
    }

    #[test]
    fn bad_values_fall_back() {
        let cfg = from_pairs(&[
            ("RENTLOCK_LOCK_TIMEOUT_MS", "soon"),
            ("RENTLOCK_COMPACT_THRESHOLD", "0"),
            ("RENTLOCK_METRICS_PORT", "70000"),
            ("RENTLOCK_PENDING_TTL_SECS", "0"),
        ]);
        assert_eq!(cfg.engine.lock_timeout, Duration::from_secs(3));
        assert_eq!(cfg.compact_threshold, 1000);
        assert_eq!(cfg.metrics_port, None);
        assert_eq!(cfg.pending_ttl, None);
    }

    #[test]
    fn zero_retention_keeps_everything() {
        let cfg = from_pairs(&[("RENTLOCK_RETENTION_DAYS", "0")]);
        assert_eq!(cfg.engine.retention_days, None);
    }

    #[test]
    fn turnaround_is_capped() {
        let cfg = from_pairs(&[("RENTLOCK_TURNAROUND_DAYS", "400")]);
        assert_eq!(cfg.engine.default_turnaround_days, MAX_TURNAROUND_DAYS);
    }
}
