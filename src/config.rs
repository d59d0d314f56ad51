//! Configuration for the block-sync engine.
//!
//! `EngineConfig` is the top-level document a host process loads from TOML;
//! `PoolConfig` exposes every scheduler tunable as an overridable field
//! defaulting to its fixed constant, so tests can shrink timeouts and
//! thresholds without touching the scheduler itself.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants;
use crate::error::CoreError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub chain_id: String,
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl EngineConfig {
    pub fn load_from_file(path: &str) -> Result<Self, CoreError> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| CoreError::Config(e.to_string()))?;
        toml::from_str(&contents).map_err(|e| CoreError::Config(e.to_string()))
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            chain_id: "default-chain".to_string(),
            pool: PoolConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    #[serde(default = "default_spin_interval_ms")]
    pub request_spin_interval_ms: u64,

    #[serde(default = "default_retry_window_secs")]
    pub request_retry_window_secs: u64,

    #[serde(default = "default_inactivity_timeout_secs")]
    pub peer_inactivity_timeout_secs: u64,

    #[serde(default = "default_min_recv_rate")]
    pub min_recv_rate_bytes_per_sec: f64,

    #[serde(default = "default_recv_sample_secs")]
    pub recv_rate_sample_window_secs: u64,

    #[serde(default = "default_recv_smoothing_secs")]
    pub recv_rate_smoothing_window_secs: u64,

    #[serde(default = "default_drift_bound")]
    pub drift_bound: i64,

    #[serde(default = "default_max_requesters")]
    pub max_requesters: usize,

    #[serde(default = "default_max_pending")]
    pub max_pending: usize,

    #[serde(default = "default_max_pending_per_peer")]
    pub max_pending_per_peer: usize,

    #[serde(default = "default_caught_up_grace_secs")]
    pub caught_up_grace_period_secs: u64,
}

impl PoolConfig {
    pub fn request_spin_interval(&self) -> Duration {
        Duration::from_millis(self.request_spin_interval_ms)
    }

    pub fn request_retry_window(&self) -> Duration {
        Duration::from_secs(self.request_retry_window_secs)
    }

    pub fn peer_inactivity_timeout(&self) -> Duration {
        Duration::from_secs(self.peer_inactivity_timeout_secs)
    }

    pub fn recv_rate_sample_window(&self) -> Duration {
        Duration::from_secs(self.recv_rate_sample_window_secs)
    }

    pub fn recv_rate_smoothing_window(&self) -> Duration {
        Duration::from_secs(self.recv_rate_smoothing_window_secs)
    }

    pub fn caught_up_grace_period(&self) -> Duration {
        Duration::from_secs(self.caught_up_grace_period_secs)
    }

    /// `MIN_RECV_RATE * e`, the seed value new peers' EMA starts at so they
    /// aren't evicted before their first sample.
    pub fn initial_recv_rate_ema(&self) -> f64 {
        self.min_recv_rate_bytes_per_sec * std::f64::consts::E
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            request_spin_interval_ms: constants::REQUEST_SPIN_INTERVAL.as_millis() as u64,
            request_retry_window_secs: constants::REQUEST_RETRY_WINDOW.as_secs(),
            peer_inactivity_timeout_secs: constants::PEER_INACTIVITY_TIMEOUT.as_secs(),
            min_recv_rate_bytes_per_sec: constants::MIN_RECV_RATE,
            recv_rate_sample_window_secs: constants::RECV_RATE_SAMPLE_WINDOW.as_secs(),
            recv_rate_smoothing_window_secs: constants::RECV_RATE_SMOOTHING_WINDOW.as_secs(),
            drift_bound: constants::DRIFT_BOUND,
            max_requesters: constants::MAX_REQUESTERS,
            max_pending: constants::MAX_PENDING,
            max_pending_per_peer: constants::MAX_PENDING_PER_PEER,
            caught_up_grace_period_secs: constants::CAUGHT_UP_GRACE_PERIOD.as_secs(),
        }
    }
}

fn default_spin_interval_ms() -> u64 {
    constants::REQUEST_SPIN_INTERVAL.as_millis() as u64
}
fn default_retry_window_secs() -> u64 {
    constants::REQUEST_RETRY_WINDOW.as_secs()
}
fn default_inactivity_timeout_secs() -> u64 {
    constants::PEER_INACTIVITY_TIMEOUT.as_secs()
}
fn default_min_recv_rate() -> f64 {
    constants::MIN_RECV_RATE
}
fn default_recv_sample_secs() -> u64 {
    constants::RECV_RATE_SAMPLE_WINDOW.as_secs()
}
fn default_recv_smoothing_secs() -> u64 {
    constants::RECV_RATE_SMOOTHING_WINDOW.as_secs()
}
fn default_drift_bound() -> i64 {
    constants::DRIFT_BOUND
}
fn default_max_requesters() -> usize {
    constants::MAX_REQUESTERS
}
fn default_max_pending() -> usize {
    constants::MAX_PENDING
}
fn default_max_pending_per_peer() -> usize {
    constants::MAX_PENDING_PER_PEER
}
fn default_caught_up_grace_secs() -> u64 {
    constants::CAUGHT_UP_GRACE_PERIOD.as_secs()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_pool_config_matches_fixed_defaults() {
        let cfg = PoolConfig::default();
        assert_eq!(cfg.max_requesters, 600);
        assert_eq!(cfg.max_pending, 600);
        assert_eq!(cfg.max_pending_per_peer, 20);
        assert_eq!(cfg.drift_bound, 100);
        assert!((cfg.min_recv_rate_bytes_per_sec - 7680.0).abs() < f64::EPSILON);
    }

    #[test]
    fn initial_ema_is_seeded_at_min_rate_times_e() {
        let cfg = PoolConfig::default();
        let expected = 7680.0 * std::f64::consts::E;
        assert!((cfg.initial_recv_rate_ema() - expected).abs() < 1e-6);
    }

    #[test]
    fn toml_round_trip_with_partial_overrides() {
        let toml_src = r#"
            chain_id = "test-chain"

            [pool]
            max_pending_per_peer = 5
        "#;
        let cfg: EngineConfig = toml::from_str(toml_src).unwrap();
        assert_eq!(cfg.pool.max_pending_per_peer, 5);
        assert_eq!(cfg.pool.max_pending, 600); // untouched field keeps its default
    }

    #[test]
    fn load_from_file_reads_a_real_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "chain_id = \"file-chain\"\n").unwrap();

        let cfg = EngineConfig::load_from_file(path.to_str().unwrap()).unwrap();
        assert_eq!(cfg.chain_id, "file-chain");
        assert_eq!(cfg.pool.max_requesters, 600);
    }

    #[test]
    fn load_from_file_reports_missing_file() {
        let err = EngineConfig::load_from_file("/nonexistent/path/config.toml").unwrap_err();
        assert!(matches!(err, CoreError::Config(_)));
    }
}
