//! In-memory collaborator implementations.
//!
//! Used by the demo binary and by the integration tests under `tests/` —
//! nothing here talks to a real database or socket. A production
//! deployment supplies its own `BlockStore`/`StateExecutor`/`Transport`
//! backed by real storage and a real p2p stack; these stand in for that so
//! the engine can be exercised end to end without one.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, RwLock};

use crate::collaborators::{BlockStore, ConsensusClient, StateExecutor, Transport};
use crate::error::{CoreError, CoreResult};
use crate::network::message::WireMessage;
use crate::types::{Block, PeerId, State};

#[derive(Default)]
pub struct InMemoryBlockStore {
    blocks: RwLock<HashMap<u64, Block>>,
    base: RwLock<u64>,
}

impl InMemoryBlockStore {
    pub fn new(base: u64) -> Self {
        Self {
            blocks: RwLock::new(HashMap::new()),
            base: RwLock::new(base),
        }
    }
}

#[async_trait]
impl BlockStore for InMemoryBlockStore {
    async fn load_block(&self, height: u64) -> CoreResult<Option<Block>> {
        Ok(self.blocks.read().await.get(&height).cloned())
    }

    async fn save_block(&self, block: &Block) -> CoreResult<()> {
        self.blocks.write().await.insert(block.height(), block.clone());
        Ok(())
    }

    async fn base_height(&self) -> CoreResult<u64> {
        Ok(*self.base.read().await)
    }

    async fn latest_height(&self) -> CoreResult<u64> {
        Ok(self.blocks.read().await.keys().copied().max().unwrap_or(0))
    }
}

/// Applies every block unconditionally and advances `last_block_height`.
/// Real deployments delegate to their own VM/ledger here; this exists only
/// to exercise the engine's scheduling and verification logic.
pub struct PassthroughExecutor;

#[async_trait]
impl StateExecutor for PassthroughExecutor {
    async fn current_state(&self) -> CoreResult<State> {
        Ok(State::default())
    }

    async fn validate_block(&self, _block: &Block, _state: &State) -> CoreResult<()> {
        Ok(())
    }

    async fn apply_block(&self, block: &Block, state: &State) -> CoreResult<State> {
        let mut next = state.clone();
        next.last_block_height = block.height();
        Ok(next)
    }
}

/// Hands each peer's outbound traffic to an mpsc channel the test harness
/// reads from, instead of a real socket.
pub struct LoopbackTransport {
    outboxes: RwLock<HashMap<PeerId, mpsc::UnboundedSender<WireMessage>>>,
    disconnected: RwLock<Vec<PeerId>>,
}

impl Default for LoopbackTransport {
    fn default() -> Self {
        Self {
            outboxes: RwLock::new(HashMap::new()),
            disconnected: RwLock::new(Vec::new()),
        }
    }
}

impl LoopbackTransport {
    pub async fn register(&self, peer: PeerId) -> mpsc::UnboundedReceiver<WireMessage> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.outboxes.write().await.insert(peer, tx);
        rx
    }

    pub async fn disconnected_peers(&self) -> Vec<PeerId> {
        self.disconnected.read().await.clone()
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn send(&self, peer: &PeerId, msg: WireMessage) -> CoreResult<()> {
        let outboxes = self.outboxes.read().await;
        match outboxes.get(peer) {
            Some(tx) => tx
                .send(msg)
                .map_err(|_| CoreError::Collaborator(format!("peer {peer} outbox closed"))),
            None => Err(CoreError::Collaborator(format!("unknown peer {peer}"))),
        }
    }

    async fn broadcast(&self, msg: WireMessage) -> CoreResult<()> {
        let outboxes = self.outboxes.read().await;
        for tx in outboxes.values() {
            let _ = tx.send(msg.clone());
        }
        Ok(())
    }

    async fn disconnect(&self, peer: &PeerId) {
        self.outboxes.write().await.remove(peer);
        self.disconnected.write().await.push(peer.clone());
    }
}

/// Records whether/when the engine handed control over; never asks for
/// block-sync to resume.
#[derive(Default)]
pub struct NoopConsensusClient {
    switched: RwLock<Option<State>>,
}

#[async_trait]
impl ConsensusClient for NoopConsensusClient {
    async fn switch_to_consensus(&self, state: State) {
        *self.switched.write().await = Some(state);
    }

    async fn request_block_sync(&self) -> bool {
        false
    }
}

impl NoopConsensusClient {
    pub async fn switched_state(&self) -> Option<State> {
        self.switched.read().await.clone()
    }
}

pub fn default_collaborators(
    base_height: u64,
) -> (
    Arc<InMemoryBlockStore>,
    Arc<PassthroughExecutor>,
    Arc<LoopbackTransport>,
    Arc<NoopConsensusClient>,
) {
    (
        Arc::new(InMemoryBlockStore::new(base_height)),
        Arc::new(PassthroughExecutor),
        Arc::new(LoopbackTransport::default()),
        Arc::new(NoopConsensusClient::default()),
    )
}
