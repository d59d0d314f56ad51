//! Per-peer scheduling metadata.
//!
//! One [`PeerTracker`] exists per peer the pool currently knows about. It
//! holds the peer's advertised height window, how many requests are
//! outstanding against it, a receive-rate EMA the scheduler uses to spot
//! slow senders before they stall the whole pipeline, and a last-activity
//! timestamp the scheduler uses separately to catch peers that have gone
//! silent entirely.

use std::time::Instant;

use crate::config::PoolConfig;
use crate::types::PeerId;

/// Tracks one peer's advertised range, outstanding work, and throughput.
#[derive(Debug, Clone)]
pub struct PeerTracker {
    pub id: PeerId,
    pub base: u64,
    pub height: u64,
    pub num_pending: usize,

    recv_rate_ema: f64,
    window_bytes: u64,
    window_started: Instant,
    last_activity: Instant,
    did_timeout: bool,
}

impl PeerTracker {
    pub fn new(id: PeerId, base: u64, height: u64, cfg: &PoolConfig) -> Self {
        let now = Instant::now();
        Self {
            id,
            base,
            height,
            num_pending: 0,
            recv_rate_ema: cfg.initial_recv_rate_ema(),
            window_bytes: 0,
            window_started: now,
            last_activity: now,
            did_timeout: false,
        }
    }

    /// Whether this peer's advertised range can serve the given height.
    pub fn can_serve(&self, height: u64) -> bool {
        height >= self.base && height <= self.height
    }

    pub fn set_range(&mut self, base: u64, height: u64) {
        self.base = base;
        self.height = height;
        self.touch();
    }

    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
        self.did_timeout = false;
    }

    pub fn inactive_for(&self) -> std::time::Duration {
        self.last_activity.elapsed()
    }

    pub fn mark_timed_out(&mut self) {
        self.did_timeout = true;
    }

    pub fn did_timeout(&self) -> bool {
        self.did_timeout
    }

    /// Record delivered bytes; folds a new 1-second sample into the EMA once
    /// the sample window elapses.
    pub fn record_received(&mut self, bytes: u64, cfg: &PoolConfig) {
        self.touch();
        self.window_bytes += bytes;
        let elapsed = self.window_started.elapsed();
        if elapsed >= cfg.recv_rate_sample_window() {
            let sample_rate = self.window_bytes as f64 / elapsed.as_secs_f64().max(f64::EPSILON);
            let smoothing = cfg.recv_rate_smoothing_window_secs as f64;
            let sample_secs = cfg.recv_rate_sample_window_secs as f64;
            let alpha = (sample_secs / smoothing).min(1.0);
            self.recv_rate_ema = self.recv_rate_ema * (1.0 - alpha) + sample_rate * alpha;
            self.window_bytes = 0;
            self.window_started = Instant::now();
        }
    }

    pub fn recv_rate_ema(&self) -> f64 {
        self.recv_rate_ema
    }

    /// True once the peer has had a full sample window to prove itself and
    /// still falls below the configured minimum.
    pub fn is_slow_sender(&self, cfg: &PoolConfig) -> bool {
        self.num_pending > 0
            && self.window_started.elapsed() >= cfg.recv_rate_sample_window()
            && self.recv_rate_ema < cfg.min_recv_rate_bytes_per_sec
    }
}
