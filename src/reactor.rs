//! The I/O edge: translates between wire messages and pool
//! operations, drives the apply loop, and hands off to consensus once
//! caught up.
//!
//! Collaborators are held as trait objects rather than generic parameters —
//! a single reactor talks to one block store, one executor, one transport
//! and one consensus client for the node's whole lifetime, so there's
//! nothing monomorphization would buy here.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex as SyncMutex;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::collaborators::{BlockStore, ConsensusClient, StateExecutor, Transport};
use crate::config::PoolConfig;
use crate::constants::{
    BLOCKS_SYNCED_RATE_ALPHA, BLOCKS_SYNCED_RATE_WINDOW, CONSENSUS_SWITCH_TICK_INTERVAL,
    STATUS_INTERVAL, SYNC_TICK_INTERVAL,
};
use crate::error::CoreError;
use crate::network::message::{validate_msg, WireMessage};
use crate::pool::{Pool, PoolStatus};
use crate::types::{PeerId, State};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReactorState {
    Idle,
    BlockSyncing,
    SwitchedToConsensus,
}

struct Runtime {
    pool: Arc<Pool>,
    apply_task: JoinHandle<()>,
    outbound_task: JoinHandle<()>,
    cancel: CancellationToken,
}

pub struct Reactor {
    block_store: Arc<dyn BlockStore>,
    executor: Arc<dyn StateExecutor>,
    transport: Arc<dyn Transport>,
    consensus: Arc<dyn ConsensusClient>,
    cfg: PoolConfig,
    state: SyncMutex<ReactorState>,
    runtime: RwLock<Option<Runtime>>,
    blocks_synced: AtomicU64,
    blocks_per_sec: SyncMutex<f64>,
}

impl Reactor {
    pub fn new(
        cfg: PoolConfig,
        block_store: Arc<dyn BlockStore>,
        executor: Arc<dyn StateExecutor>,
        transport: Arc<dyn Transport>,
        consensus: Arc<dyn ConsensusClient>,
    ) -> Self {
        Reactor {
            block_store,
            executor,
            transport,
            consensus,
            cfg,
            state: SyncMutex::new(ReactorState::Idle),
            runtime: RwLock::new(None),
            blocks_synced: AtomicU64::new(0),
            blocks_per_sec: SyncMutex::new(0.0),
        }
    }

    pub fn current_state(&self) -> ReactorState {
        *self.state.lock()
    }

    /// Enter `BlockSyncing` from `Idle`, anchoring the pool at
    /// `state.last_block_height + 1`.
    pub async fn start(self: &Arc<Self>, state: State) -> Result<(), CoreError> {
        self.enter_block_syncing(state).await
    }

    /// Re-enter `BlockSyncing` after a prior `SwitchedToConsensus`, e.g.
    /// because consensus fell behind again.
    pub async fn switch_to_block_sync(self: &Arc<Self>, state: State) -> Result<(), CoreError> {
        self.enter_block_syncing(state).await
    }

    async fn enter_block_syncing(self: &Arc<Self>, state: State) -> Result<(), CoreError> {
        {
            let mut phase = self.state.lock();
            if *phase == ReactorState::BlockSyncing {
                return Err(CoreError::AlreadyRunning);
            }
            *phase = ReactorState::BlockSyncing;
        }

        let anchor = state.last_block_height + 1;
        let (pool, requests_rx, errors_rx) = Pool::new(self.cfg.clone(), anchor);
        pool.start().await?;

        let cancel = CancellationToken::new();

        let outbound_task = {
            let reactor = Arc::clone(self);
            let cancel = cancel.clone();
            tokio::spawn(async move {
                reactor.outbound_io_loop(requests_rx, errors_rx, cancel).await;
            })
        };

        let apply_task = {
            let reactor = Arc::clone(self);
            let pool = Arc::clone(&pool);
            let cancel = cancel.clone();
            tokio::spawn(async move {
                reactor.apply_loop(pool, state, cancel).await;
            })
        };

        *self.runtime.write().await = Some(Runtime {
            pool,
            apply_task,
            outbound_task,
            cancel,
        });
        Ok(())
    }

    pub async fn pool_status(&self) -> Option<PoolStatus> {
        let runtime = self.runtime.read().await;
        match runtime.as_ref() {
            Some(r) => Some(r.pool.get_status().await),
            None => None,
        }
    }

    /// Entry point a transport implementation calls with each decoded
    /// inbound message.
    pub async fn on_message(&self, from: PeerId, msg: WireMessage) {
        if let Err(reason) = validate_msg(&msg) {
            warn!("⚠️  Rejecting invalid message from {}: {}", from, reason);
            self.transport.disconnect(&from).await;
            return;
        }

        let runtime = self.runtime.read().await;
        let Some(runtime) = runtime.as_ref() else {
            debug!("🔌 Message from {} received while reactor idle, dropping", from);
            return;
        };

        match msg {
            WireMessage::BlockRequest { height } => match self.block_store.load_block(height as u64).await {
                Ok(Some(block)) => {
                    let _ = self
                        .transport
                        .send(&from, WireMessage::BlockResponse { block })
                        .await;
                }
                Ok(None) => {
                    let _ = self
                        .transport
                        .send(&from, WireMessage::NoBlockResponse { height })
                        .await;
                }
                Err(e) => error!("❌ Failed to load block for request from {}: {}", from, e),
            },
            WireMessage::BlockResponse { block } => {
                let size = WireMessage::BlockResponse {
                    block: block.clone(),
                }
                .encode()
                .len() as u64;
                if let Err(e) = runtime.pool.add_block(from.clone(), block, size).await {
                    warn!("⚠️  Block delivery from {} rejected: {}", from, e);
                    if e.is_peer_fault() {
                        self.transport.disconnect(&from).await;
                    }
                }
            }
            WireMessage::NoBlockResponse { height } => {
                debug!("📭 Peer {} has no block at height {}", from, height);
            }
            WireMessage::StatusRequest => {
                let base = self.block_store.base_height().await.unwrap_or(0);
                let height = self.block_store.latest_height().await.unwrap_or(0);
                let _ = self
                    .transport
                    .send(
                        &from,
                        WireMessage::StatusResponse {
                            height: height as i64,
                            base: base as i64,
                        },
                    )
                    .await;
            }
            WireMessage::StatusResponse { height, base } => {
                runtime
                    .pool
                    .set_peer_range(from, base as u64, height as u64)
                    .await;
            }
        }
    }

    async fn outbound_io_loop(
        &self,
        mut requests_rx: tokio::sync::mpsc::UnboundedReceiver<crate::pool::BlockRequestMsg>,
        mut errors_rx: tokio::sync::mpsc::UnboundedReceiver<crate::pool::PeerErrorMsg>,
        cancel: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                Some(req) = requests_rx.recv() => {
                    if self
                        .transport
                        .send(&req.peer, WireMessage::BlockRequest { height: req.height as i64 })
                        .await
                        .is_err()
                    {
                        debug!("📡 Send queue full for {}, dropping request for height {} (retry will reissue)", req.peer, req.height);
                    }
                }
                Some(err) = errors_rx.recv() => {
                    warn!("❌ Disconnecting peer {}: {}", err.peer, err.reason);
                    self.transport.disconnect(&err.peer).await;
                }
            }
        }
    }

    async fn apply_loop(self: Arc<Self>, pool: Arc<Pool>, mut state: State, cancel: CancellationToken) {
        let mut sync_ticker = tokio::time::interval(SYNC_TICK_INTERVAL);
        let mut status_ticker = tokio::time::interval(STATUS_INTERVAL);
        let mut consensus_ticker = tokio::time::interval(CONSENSUS_SWITCH_TICK_INTERVAL);
        let mut last_rate_sample = Instant::now();
        let mut blocks_since_sample = 0u64;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = sync_ticker.tick() => {
                    if let Some((first, second)) = pool.peek_two_blocks().await {
                        match self.try_apply(&pool, &mut state, first, second).await {
                            Ok(applied) if applied => {
                                blocks_since_sample += 1;
                                self.blocks_synced.fetch_add(1, Ordering::SeqCst);
                                if blocks_since_sample >= BLOCKS_SYNCED_RATE_WINDOW {
                                    let elapsed = last_rate_sample.elapsed().as_secs_f64().max(f64::EPSILON);
                                    let sample_rate = blocks_since_sample as f64 / elapsed;
                                    let mut rate = self.blocks_per_sec.lock();
                                    *rate = BLOCKS_SYNCED_RATE_ALPHA * *rate
                                        + (1.0 - BLOCKS_SYNCED_RATE_ALPHA) * sample_rate;
                                    info!("✅ Sync progress: {:.1} blocks/sec at height {}", *rate, state.last_block_height);
                                    blocks_since_sample = 0;
                                    last_rate_sample = Instant::now();
                                }
                            }
                            Ok(false) => {}
                            Err(e) => {
                                error!("❌ Fatal error applying verified block, halting: {}", e);
                                panic!("block-sync: non-recoverable error applying a commit-verified block: {e}");
                            }
                        }
                    }
                }
                _ = status_ticker.tick() => {
                    let _ = self.transport.broadcast(WireMessage::StatusRequest).await;
                }
                _ = consensus_ticker.tick() => {
                    if pool.is_caught_up().await {
                        let _ = pool.stop().await;
                        *self.state.lock() = ReactorState::SwitchedToConsensus;
                        info!("✅ Caught up, switching to consensus at height {}", state.last_block_height);
                        self.consensus.switch_to_consensus(state.clone()).await;
                        return;
                    }
                }
            }
        }
    }

    /// Verify and apply the block at the pool's current height, given the
    /// next block (whose `last_commit` authenticates it). Returns `Ok(true)`
    /// on a successful apply, `Ok(false)` if verification failed and both
    /// heights were redone (not a fatal error, just no progress this tick).
    async fn try_apply(
        &self,
        pool: &Arc<Pool>,
        state: &mut State,
        first: crate::types::Block,
        second: crate::types::Block,
    ) -> Result<bool, CoreError> {
        let first_id = first.block_id();
        let first_height = first.height();
        let second_height = second.height();

        let verify_result = match &second.last_commit {
            Some(commit) => state.validators.verify_commit_light(&first_id, commit),
            None => Err("second block carries no commit".to_string()),
        };

        if let Err(reason) = verify_result {
            warn!(
                "⚠️  Commit verification failed at height {}: {}, redoing both heights",
                first_height, reason
            );
            self.redo_both(pool, first_height, second_height).await;
            return Ok(false);
        }

        if let Err(reason) = self.executor.validate_block(&first, state).await {
            warn!(
                "⚠️  Block validation failed at height {}: {}, redoing both heights",
                first_height, reason
            );
            self.redo_both(pool, first_height, second_height).await;
            return Ok(false);
        }

        pool.pop_request().await;
        if let Err(e) = self.block_store.save_block(&first).await {
            error!(
                "❌ Failed to persist applied block at height {}: {}",
                first_height, e
            );
            return Err(e);
        }
        let new_state = self.executor.apply_block(&first, state).await?;
        *state = new_state;
        state.last_block_height = first_height;
        Ok(true)
    }

    async fn redo_both(&self, pool: &Arc<Pool>, first_height: u64, second_height: u64) {
        for height in [first_height, second_height] {
            if let Some(peer) = pool.redo_request(height).await {
                self.transport.disconnect(&peer).await;
            }
        }
    }

    /// Tear down the running pool and its companion tasks. Used on process
    /// shutdown; does not change `current_state()`.
    pub async fn shutdown(&self) {
        if let Some(runtime) = self.runtime.write().await.take() {
            runtime.cancel.cancel();
            runtime.apply_task.abort();
            runtime.outbound_task.abort();
            let _ = runtime.pool.stop().await;
        }
    }

    pub fn blocks_synced(&self) -> u64 {
        self.blocks_synced.load(Ordering::SeqCst)
    }

    pub fn blocks_per_sec(&self) -> f64 {
        *self.blocks_per_sec.lock()
    }
}
