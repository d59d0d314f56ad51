//! Trait seams between the engine and the rest of a node.
//!
//! The engine never embeds a database, a VM, or a p2p stack directly. It's
//! generic over four collaborators a host process supplies: somewhere to
//! persist applied blocks, something that executes/validates block content,
//! a transport for sending and receiving wire messages per peer, and a
//! handle to whatever takes over once the engine reports caught up. Keeping
//! storage and execution as separate `async_trait` objects matters even
//! though most deployments wire them to the same backing store: storage is
//! an append-only fact, execution is a policy decision, and a future
//! deployment may want to swap one without touching the other.

use async_trait::async_trait;

use crate::error::CoreResult;
use crate::network::message::WireMessage;
use crate::types::{Block, PeerId, State};

/// Durable storage for applied blocks. The engine only ever appends at
/// `height + 1` and reads blocks it previously stored.
#[async_trait]
pub trait BlockStore: Send + Sync {
    async fn load_block(&self, height: u64) -> CoreResult<Option<Block>>;
    async fn save_block(&self, block: &Block) -> CoreResult<()>;
    async fn base_height(&self) -> CoreResult<u64>;
    async fn latest_height(&self) -> CoreResult<u64>;
}

/// Executes a validated block against application state. Block content
/// rules (what makes a transaction valid) are this collaborator's problem,
/// not the engine's.
///
/// `validate_block` and `apply_block` are deliberately separate calls: a
/// validation failure is a peer fault (the block gets redone against a
/// different source), while an `apply_block` failure on an already-verified
/// block indicates a state/store invariant violation and is fatal.
#[async_trait]
pub trait StateExecutor: Send + Sync {
    async fn current_state(&self) -> CoreResult<State>;
    async fn validate_block(&self, block: &Block, state: &State) -> CoreResult<()>;
    async fn apply_block(&self, block: &Block, state: &State) -> CoreResult<State>;
}

/// Sends and receives [`WireMessage`]s to/from a named peer. A single
/// implementation backs every peer; the engine addresses peers by
/// [`PeerId`] and never opens a socket itself.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, peer: &PeerId, msg: WireMessage) -> CoreResult<()>;

    /// Broadcast to every currently known peer. Implementations that can't
    /// enumerate peers efficiently may just fan out `send`.
    async fn broadcast(&self, msg: WireMessage) -> CoreResult<()>;

    /// Tear down the connection to a peer the reactor has judged faulty.
    async fn disconnect(&self, peer: &PeerId);
}

/// The consensus engine the node hands control to once block-sync reports
/// caught up (and that the reactor asks to be switched back from, on falling
/// behind again).
#[async_trait]
pub trait ConsensusClient: Send + Sync {
    async fn switch_to_consensus(&self, state: State);

    /// Consensus reporting that it has fallen behind and sync should resume.
    async fn request_block_sync(&self) -> bool;
}
