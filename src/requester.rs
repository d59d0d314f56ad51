//! Per-height request lifecycle.
//!
//! A [`Requester`] is spawned by the pool's scheduler for exactly one
//! height. Its task repeatedly asks the pool for an eligible peer, issues a
//! `BlockRequest`, and waits for either the block to arrive, a retry timeout,
//! or a redo signal telling it its current assignment has gone bad. Once a
//! block is accepted the task stays resident (not exits) so `PeekTwoBlocks`
//! and `PopRequest` can still find it — a redo can still evict an accepted
//! block if commit verification later rejects it.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::pool::Pool;
use crate::types::{Block, PeerId};

#[derive(Default)]
struct RequesterState {
    peer: Option<PeerId>,
    block: Option<Block>,
}

/// Handle to one in-flight request. Cloning shares the same underlying
/// state and task; the pool keeps exactly one handle per pending height.
#[derive(Clone)]
pub struct Requester {
    pub height: u64,
    state: Arc<Mutex<RequesterState>>,
    got_block: Arc<Notify>,
    redo_tx: mpsc::UnboundedSender<PeerId>,
}

impl Requester {
    /// Spawn a requester task for `height` and return its handle alongside
    /// the task's `JoinHandle`.
    pub fn spawn(
        height: u64,
        pool: Arc<Pool>,
        cancel: CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        let (redo_tx, redo_rx) = mpsc::unbounded_channel();
        let requester = Requester {
            height,
            state: Arc::new(Mutex::new(RequesterState::default())),
            got_block: Arc::new(Notify::new()),
            redo_tx,
        };

        let task_handle = requester.clone();
        let handle = tokio::spawn(async move {
            task_handle.run(pool, cancel, redo_rx).await;
        });

        (requester, handle)
    }

    /// Current assigned peer, if any.
    pub fn assigned_peer(&self) -> Option<PeerId> {
        self.state.lock().peer.clone()
    }

    /// Currently held block, if the requester has accepted one.
    pub fn block(&self) -> Option<Block> {
        self.state.lock().block.clone()
    }

    /// Accept delivery from `from_peer`. Succeeds only if no block is held
    /// yet and `from_peer` matches the current assignment.
    pub fn set_block(&self, block: Block, from_peer: &PeerId) -> bool {
        let mut state = self.state.lock();
        if state.block.is_some() {
            return false;
        }
        if state.peer.as_deref() != Some(from_peer.as_str()) {
            return false;
        }
        state.block = Some(block);
        drop(state);
        self.got_block.notify_one();
        true
    }

    /// Send a redo signal naming the peer whose assignment should be
    /// invalidated. Stale signals (naming a peer the requester has already
    /// moved on from) are ignored by the task loop.
    pub fn redo(&self, peer: PeerId) {
        let _ = self.redo_tx.send(peer);
    }

    fn reset(&self) {
        let mut state = self.state.lock();
        state.peer = None;
        state.block = None;
    }

    /// Like `reset`, but for a plain retry timeout rather than a redo or
    /// peer removal: the peer stays registered in the pool, so its pending
    /// slot has to be handed back explicitly or it leaks forever.
    async fn reset_after_retry_timeout(&self, pool: &Pool) {
        let stale_peer = {
            let mut state = self.state.lock();
            let peer = state.peer.take();
            state.block = None;
            peer
        };
        if let Some(peer) = stale_peer {
            pool.release_peer_slot(&peer).await;
        }
    }

    async fn run(
        &self,
        pool: Arc<Pool>,
        cancel: CancellationToken,
        mut redo_rx: mpsc::UnboundedReceiver<PeerId>,
    ) {
        loop {
            // Step 1: acquire a peer, retrying until one is available or we're
            // asked to stop.
            let peer = loop {
                if cancel.is_cancelled() || !pool.is_running() {
                    return;
                }
                match pool.pick_incr_available_peer(self.height).await {
                    Some(p) => break p,
                    None => {
                        tokio::select! {
                            _ = tokio::time::sleep(pool.request_spin_interval()) => {}
                            _ = cancel.cancelled() => return,
                        }
                    }
                }
            };

            {
                let mut state = self.state.lock();
                state.peer = Some(peer.clone());
                state.block = None;
            }
            pool.dispatch_request(self.height, peer.clone());

            // Step 3: wait for stop, retry timeout, redo, or delivery. Once a
            // block has been accepted the retry timer no longer applies —
            // the requester stays resident purely to answer PeekTwoBlocks /
            // PopRequest, only a redo can still evict it.
            let mut has_block = false;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(pool.request_retry_window()), if !has_block => {
                        self.reset_after_retry_timeout(&pool).await;
                        break;
                    }
                    Some(offending) = redo_rx.recv() => {
                        let current = self.state.lock().peer.clone();
                        if current.as_deref() == Some(offending.as_str()) {
                            self.reset();
                            break;
                        }
                        // stale signal for a prior assignment; keep waiting
                    }
                    _ = self.got_block.notified(), if !has_block => {
                        has_block = true;
                    }
                }

                if !pool.is_running() {
                    return;
                }
            }
        }
    }
}
