//! Design-fixed defaults for the block-sync scheduler.
//!
//! These are the values the engine behaves with out of the box; every one
//! of them is also a field on [`crate::config::PoolConfig`] so tests and
//! deployments can override them without touching the algorithm.

use std::time::Duration;

/// How long the scheduler sleeps when saturated before re-checking.
pub const REQUEST_SPIN_INTERVAL: Duration = Duration::from_millis(2);

/// How long a requester waits for its in-flight request before retrying.
pub const REQUEST_RETRY_WINDOW: Duration = Duration::from_secs(30);

/// How long a peer may go without activity before it's considered inactive.
pub const PEER_INACTIVITY_TIMEOUT: Duration = Duration::from_secs(15);

/// Minimum acceptable receive rate, in bytes/sec, before a peer is judged a
/// slow sender.
pub const MIN_RECV_RATE: f64 = 7680.0;

/// Receive-rate EMA sample window.
pub const RECV_RATE_SAMPLE_WINDOW: Duration = Duration::from_secs(1);

/// Receive-rate EMA smoothing window.
pub const RECV_RATE_SMOOTHING_WINDOW: Duration = Duration::from_secs(40);

/// Maximum tolerated distance between `pool.height` and an unsolicited
/// block's height before it's treated as a peer fault.
pub const DRIFT_BOUND: i64 = 100;

/// Maximum number of requesters (i.e. the scheduler window size).
pub const MAX_REQUESTERS: usize = 600;

/// Maximum total pending requests across all peers.
pub const MAX_PENDING: usize = 600;

/// Maximum pending requests for any single peer.
pub const MAX_PENDING_PER_PEER: usize = 20;

/// How often the reactor broadcasts a `StatusRequest` to all peers.
pub const STATUS_INTERVAL: Duration = Duration::from_secs(10);

/// How often the apply loop attempts to apply the next block.
pub const SYNC_TICK_INTERVAL: Duration = Duration::from_millis(10);

/// How often the reactor checks whether it has caught up to consensus.
pub const CONSENSUS_SWITCH_TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Grace period before `IsCaughtUp` can return true purely on elapsed time,
/// even if no block has yet been applied.
pub const CAUGHT_UP_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Blocks-per-second EWMA is refreshed every this many applied blocks.
pub const BLOCKS_SYNCED_RATE_WINDOW: u64 = 100;

/// Smoothing factor for the blocks/sec EWMA: `new = 0.9*old + 0.1*sample`.
pub const BLOCKS_SYNCED_RATE_ALPHA: f64 = 0.9;

/// Maximum size of an encoded block on the wire, used to bound message
/// frames.
pub const MAX_BLOCK_BYTES: usize = 4 * 1024 * 1024;
