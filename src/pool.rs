//! The scheduler: a sliding window of [`Requester`]s anchored at the
//! next height to apply, a registry of [`PeerTracker`]s, and the policy that
//! assigns requesters to peers, bounds concurrency, and sweeps peers that are
//! either too slow or have gone silent.
//!
//! All mutable pool state lives behind one `tokio::sync::RwLock`; `num_pending`
//! is additionally mirrored in an `AtomicI64` so the scheduler's hot path
//! can read it without taking the lock.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex as SyncMutex;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::PoolConfig;
use crate::error::{CoreError, CoreResult};
use crate::peer_tracker::PeerTracker;
use crate::requester::Requester;
use crate::types::{Block, PeerId};

/// A `BlockRequest` the scheduler wants dispatched to a specific peer.
#[derive(Debug, Clone)]
pub struct BlockRequestMsg {
    pub height: u64,
    pub peer: PeerId,
}

/// A peer fault the reactor should act on by disconnecting the source.
#[derive(Debug, Clone)]
pub struct PeerErrorMsg {
    pub peer: PeerId,
    pub reason: String,
}

/// Read-only snapshot of pool state for logging/introspection.
#[derive(Debug, Clone)]
pub struct PoolStatus {
    pub height: u64,
    pub max_peer_height: u64,
    pub num_pending: i64,
    pub num_peers: usize,
}

struct PoolState {
    height: u64,
    max_peer_height: u64,
    peers: HashMap<PeerId, PeerTracker>,
    requesters: HashMap<u64, Requester>,
    requester_tasks: HashMap<u64, JoinHandle<()>>,
    start_time: Instant,
}

/// The scheduler. One instance exists per sync session; `start`/`stop` allow
/// the same pool to be reused across a `SwitchToBlockSync` re-entry.
pub struct Pool {
    state: RwLock<PoolState>,
    num_pending: AtomicI64,
    running: AtomicBool,
    cancel: SyncMutex<Option<CancellationToken>>,
    cfg: PoolConfig,
    initial_height: u64,
    requests_tx: mpsc::UnboundedSender<BlockRequestMsg>,
    errors_tx: mpsc::UnboundedSender<PeerErrorMsg>,
}

impl Pool {
    pub fn new(
        cfg: PoolConfig,
        anchor_height: u64,
    ) -> (
        Arc<Pool>,
        mpsc::UnboundedReceiver<BlockRequestMsg>,
        mpsc::UnboundedReceiver<PeerErrorMsg>,
    ) {
        let (requests_tx, requests_rx) = mpsc::unbounded_channel();
        let (errors_tx, errors_rx) = mpsc::unbounded_channel();
        let pool = Arc::new(Pool {
            state: RwLock::new(PoolState {
                height: anchor_height,
                max_peer_height: 0,
                peers: HashMap::new(),
                requesters: HashMap::new(),
                requester_tasks: HashMap::new(),
                start_time: Instant::now(),
            }),
            num_pending: AtomicI64::new(0),
            running: AtomicBool::new(false),
            cancel: SyncMutex::new(None),
            cfg,
            initial_height: anchor_height,
            requests_tx,
            errors_tx,
        });
        (pool, requests_rx, errors_rx)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Launch the scheduler task. Returns `AlreadyRunning` if called twice
    /// without an intervening `stop`.
    pub async fn start(self: &Arc<Self>) -> CoreResult<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(CoreError::AlreadyRunning);
        }
        {
            let mut state = self.state.write().await;
            state.start_time = Instant::now();
        }
        let token = CancellationToken::new();
        *self.cancel.lock() = Some(token.clone());

        let pool = Arc::clone(self);
        tokio::spawn(async move {
            pool.scheduler_loop(token).await;
        });
        Ok(())
    }

    /// Signal the scheduler to exit and release every requester.
    pub async fn stop(&self) -> CoreResult<()> {
        if !self.running.swap(false, Ordering::SeqCst) {
            return Err(CoreError::NotRunning);
        }
        if let Some(token) = self.cancel.lock().take() {
            token.cancel();
        }
        let mut state = self.state.write().await;
        for (_, task) in state.requester_tasks.drain() {
            task.abort();
        }
        state.requesters.clear();
        self.num_pending.store(0, Ordering::SeqCst);
        Ok(())
    }

    async fn scheduler_loop(self: Arc<Self>, cancel: CancellationToken) {
        loop {
            if cancel.is_cancelled() || !self.is_running() {
                return;
            }

            let (num_pending, num_requesters, height, max_peer_height) = {
                let state = self.state.read().await;
                (
                    self.num_pending.load(Ordering::SeqCst),
                    state.requesters.len(),
                    state.height,
                    state.max_peer_height,
                )
            };

            if num_pending as usize >= self.cfg.max_pending || num_requesters >= self.cfg.max_requesters {
                tokio::select! {
                    _ = tokio::time::sleep(self.cfg.request_spin_interval()) => {}
                    _ = cancel.cancelled() => return,
                }
                self.sweep_slow_senders().await;
                continue;
            }

            let next_height = height + num_requesters as u64;
            if next_height > max_peer_height {
                tokio::select! {
                    _ = tokio::time::sleep(self.cfg.request_spin_interval()) => {}
                    _ = cancel.cancelled() => return,
                }
                self.sweep_slow_senders().await;
                continue;
            }

            let (requester, task) = Requester::spawn(next_height, Arc::clone(&self), cancel.clone());
            self.num_pending.fetch_add(1, Ordering::SeqCst);
            let mut state = self.state.write().await;
            state.requesters.insert(next_height, requester);
            state.requester_tasks.insert(next_height, task);
        }
    }

    /// Two independent reasons a peer can be evicted: a receive rate that's
    /// fallen below the minimum while requests are outstanding against it, or
    /// plain silence (no activity at all, pending or not) past the
    /// inactivity timeout. The two catch different failure modes — a peer
    /// trickling bytes too slowly still touches its tracker on every partial
    /// delivery, while a peer that's simply gone dark never does.
    async fn sweep_slow_senders(&self) {
        let mut state = self.state.write().await;
        let mut timed_out = Vec::new();
        for (id, tracker) in state.peers.iter_mut() {
            if tracker.did_timeout() {
                continue;
            }
            if tracker.num_pending > 0 && tracker.is_slow_sender(&self.cfg) {
                tracker.mark_timed_out();
                timed_out.push((id.clone(), "receive rate below minimum"));
            } else if tracker.inactive_for() >= self.cfg.peer_inactivity_timeout() {
                tracker.mark_timed_out();
                timed_out.push((id.clone(), "peer inactive past timeout"));
            }
        }
        for (id, reason) in timed_out {
            warn!("⏱️  Sweep removing peer {} ({})", id, reason);
            let _ = self.errors_tx.send(PeerErrorMsg {
                peer: id.clone(),
                reason: reason.to_string(),
            });
            remove_peer_locked(&mut state, &id);
        }
    }

    /// Upsert a peer's advertised window.
    pub async fn set_peer_range(&self, peer: PeerId, base: u64, height: u64) {
        let mut state = self.state.write().await;
        match state.peers.get_mut(&peer) {
            Some(tracker) => tracker.set_range(base, height),
            None => {
                state
                    .peers
                    .insert(peer.clone(), PeerTracker::new(peer, base, height, &self.cfg));
            }
        }
        if height > state.max_peer_height {
            state.max_peer_height = height;
        }
    }

    /// Remove a peer, reassigning (via redo) every requester bound to it.
    pub async fn remove_peer(&self, peer: &PeerId) {
        let mut state = self.state.write().await;
        remove_peer_locked(&mut state, peer);
    }

    /// Attach a delivered block to its requester.
    pub async fn add_block(&self, peer: PeerId, block: Block, size: u64) -> CoreResult<()> {
        let height = block.height();
        let mut state = self.state.write().await;

        let requester = match state.requesters.get(&height) {
            Some(r) => r.clone(),
            None => {
                let drift = (state.height as i64 - height as i64).abs();
                return if drift > self.cfg.drift_bound {
                    Err(CoreError::UnsolicitedDrift { peer, height, drift })
                } else {
                    debug!("🔄 Ignoring unsolicited block {} from {} (within drift bound)", height, peer);
                    Ok(())
                };
            }
        };

        if requester.set_block(block, &peer) {
            self.num_pending.fetch_sub(1, Ordering::SeqCst);
            if let Some(tracker) = state.peers.get_mut(&peer) {
                tracker.num_pending = tracker.num_pending.saturating_sub(1);
                tracker.record_received(size, &self.cfg);
            }
            Ok(())
        } else {
            Err(CoreError::MismatchedDelivery { peer, height })
        }
    }

    /// Return the blocks at `height` and `height + 1`, if both have been
    /// delivered — two are needed because block `h`'s commit travels in
    /// block `h + 1`.
    pub async fn peek_two_blocks(&self) -> Option<(Block, Block)> {
        let state = self.state.read().await;
        let first = state.requesters.get(&state.height)?.block()?;
        let second = state.requesters.get(&(state.height + 1))?.block()?;
        Some((first, second))
    }

    /// Release the requester at the current height and advance it. Panics
    /// if none exists — the reactor should only call this after a
    /// successful `peek_two_blocks`, so an absent requester here indicates
    /// a protocol violation.
    pub async fn pop_request(&self) {
        let mut state = self.state.write().await;
        let height = state.height;
        let task = state
            .requester_tasks
            .remove(&height)
            .expect("pop_request called with no requester at current height");
        state
            .requesters
            .remove(&height)
            .expect("pop_request called with no requester at current height");
        task.abort();
        state.height += 1;
    }

    /// Mark the peer assigned to `height`'s requester as bad and remove it,
    /// returning that peer so the caller can also disconnect its transport.
    pub async fn redo_request(&self, height: u64) -> Option<PeerId> {
        let mut state = self.state.write().await;
        let peer = state.requesters.get(&height)?.assigned_peer();
        if let Some(p) = &peer {
            remove_peer_locked(&mut state, p);
        }
        peer
    }

    /// Iterate peers looking for one eligible to serve `height`, arming its
    /// pending counter on success.
    pub(crate) async fn pick_incr_available_peer(&self, height: u64) -> Option<PeerId> {
        let mut state = self.state.write().await;
        let ids: Vec<PeerId> = state.peers.keys().cloned().collect();
        for id in ids {
            let timed_out = state.peers.get(&id).map(|t| t.did_timeout()).unwrap_or(false);
            if timed_out {
                remove_peer_locked(&mut state, &id);
                continue;
            }
            let Some(tracker) = state.peers.get_mut(&id) else {
                continue;
            };
            if tracker.num_pending >= self.cfg.max_pending_per_peer || !tracker.can_serve(height) {
                continue;
            }
            if tracker.num_pending == 0 {
                *tracker = PeerTracker::new(id.clone(), tracker.base, tracker.height, &self.cfg);
            }
            tracker.num_pending += 1;
            tracker.touch();
            return Some(id);
        }
        None
    }

    /// Give back a peer's pending slot without a delivery — used when a
    /// requester abandons its assigned peer on a plain retry timeout rather
    /// than a fault. The peer stays registered; only its pending count
    /// changes, mirroring the decrement in `add_block`.
    pub(crate) async fn release_peer_slot(&self, peer: &PeerId) {
        let mut state = self.state.write().await;
        if let Some(tracker) = state.peers.get_mut(peer) {
            tracker.num_pending = tracker.num_pending.saturating_sub(1);
        }
    }

    pub(crate) fn dispatch_request(&self, height: u64, peer: PeerId) {
        let _ = self.requests_tx.send(BlockRequestMsg { height, peer });
    }

    /// True once the pool has at least one peer, has either run past the
    /// grace period or advanced past its starting height, and is within one
    /// block of the highest known peer height.
    pub async fn is_caught_up(&self) -> bool {
        let state = self.state.read().await;
        if state.peers.is_empty() {
            return false;
        }
        let ran_long_enough = state.start_time.elapsed() > self.cfg.caught_up_grace_period();
        let advanced = state.height > self.initial_height;
        if !ran_long_enough && !advanced {
            return false;
        }
        state.height + 1 >= state.max_peer_height
    }

    pub async fn max_peer_height(&self) -> u64 {
        self.state.read().await.max_peer_height
    }

    pub async fn get_status(&self) -> PoolStatus {
        let state = self.state.read().await;
        PoolStatus {
            height: state.height,
            max_peer_height: state.max_peer_height,
            num_pending: self.num_pending.load(Ordering::SeqCst),
            num_peers: state.peers.len(),
        }
    }

    pub async fn current_height(&self) -> u64 {
        self.state.read().await.height
    }

    pub(crate) fn request_spin_interval(&self) -> std::time::Duration {
        self.cfg.request_spin_interval()
    }

    pub(crate) fn request_retry_window(&self) -> std::time::Duration {
        self.cfg.request_retry_window()
    }
}

/// Remove `peer` from the map and fire a redo signal for every requester it
/// was assigned to; recompute `max_peer_height` if the removed peer held
/// it. Caller must already hold the write lock.
///
/// A redo'd requester keeps its pool-level pending slot — it still counts
/// towards `numPending` until it either delivers a block or its height is
/// popped, it just needs a new peer.
fn remove_peer_locked(state: &mut PoolState, peer: &PeerId) {
    let removed = state.peers.remove(peer);
    let Some(removed) = removed else {
        return;
    };

    for requester in state.requesters.values() {
        if requester.assigned_peer().as_deref() == Some(peer.as_str()) {
            requester.redo(peer.clone());
        }
    }

    if removed.height >= state.max_peer_height {
        state.max_peer_height = state.peers.values().map(|t| t.height).max().unwrap_or(0);
    }
    info!("❌ Peer {} removed from pool", peer);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolConfig;

    #[tokio::test]
    async fn set_peer_range_raises_max_peer_height() {
        let (pool, _req_rx, _err_rx) = Pool::new(PoolConfig::default(), 1);
        pool.set_peer_range("p1".to_string(), 1, 50).await;
        assert_eq!(pool.max_peer_height().await, 50);
        pool.set_peer_range("p2".to_string(), 1, 10).await;
        assert_eq!(pool.max_peer_height().await, 50);
    }

    #[tokio::test]
    async fn sweep_removes_peer_inactive_past_timeout() {
        let cfg = PoolConfig {
            peer_inactivity_timeout_secs: 0,
            ..PoolConfig::default()
        };
        let (pool, _req_rx, _err_rx) = Pool::new(cfg, 1);
        pool.set_peer_range("p1".to_string(), 1, 10).await;
        pool.sweep_slow_senders().await;
        assert_eq!(pool.get_status().await.num_peers, 0);
    }

    #[tokio::test]
    async fn is_caught_up_requires_at_least_one_peer() {
        let (pool, _req_rx, _err_rx) = Pool::new(PoolConfig::default(), 1);
        assert!(!pool.is_caught_up().await);
    }

    #[tokio::test]
    async fn pick_incr_available_peer_respects_window() {
        let (pool, _req_rx, _err_rx) = Pool::new(PoolConfig::default(), 1);
        pool.set_peer_range("p1".to_string(), 10, 20).await;
        assert!(pool.pick_incr_available_peer(5).await.is_none());
        assert_eq!(pool.pick_incr_available_peer(15).await, Some("p1".to_string()));
    }

    #[tokio::test]
    async fn release_peer_slot_gives_back_a_retry_timed_out_assignment() {
        let cfg = PoolConfig {
            max_pending_per_peer: 2,
            ..PoolConfig::default()
        };
        let (pool, _req_rx, _err_rx) = Pool::new(cfg, 1);
        pool.set_peer_range("p1".to_string(), 1, 100).await;

        // Saturate the peer's pending cap without ever delivering a block,
        // releasing each slot the way a retry timeout does, and confirm the
        // peer stays selectable instead of being silently excluded forever.
        for height in 1..=10u64 {
            let peer = pool
                .pick_incr_available_peer(height)
                .await
                .expect("peer should remain selectable across repeated retry timeouts");
            assert_eq!(peer, "p1");
            pool.release_peer_slot(&peer).await;
        }
        assert_eq!(pool.get_status().await.num_peers, 1);
    }

    #[tokio::test]
    async fn add_block_with_no_requester_and_small_drift_is_ignored() {
        let (pool, _req_rx, _err_rx) = Pool::new(PoolConfig::default(), 100);
        let block = crate::types::Block {
            header: crate::types::BlockHeader {
                height: 101,
                ..Default::default()
            },
            last_commit: None,
            data: vec![],
        };
        assert!(pool.add_block("p1".to_string(), block, 10).await.is_ok());
    }

    #[tokio::test]
    async fn add_block_with_no_requester_and_large_drift_is_a_fault() {
        let (pool, _req_rx, _err_rx) = Pool::new(PoolConfig::default(), 1);
        let block = crate::types::Block {
            header: crate::types::BlockHeader {
                height: 1000,
                ..Default::default()
            },
            last_commit: None,
            data: vec![],
        };
        let result = pool.add_block("p1".to_string(), block, 10).await;
        assert!(matches!(result, Err(CoreError::UnsolicitedDrift { .. })));
    }
}
