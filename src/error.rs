//! Error taxonomy for the block-sync engine.
//!
//! A flat top-level enum for everything the engine can fail with, wrapping
//! collaborator-specific causes via `#[from]`. Which variant is
//! peer-attributable vs. fatal is documented per variant.

use thiserror::Error;

use crate::types::PeerId;

/// Errors the core engine can surface. Most are peer-attributable and never
/// stop the engine — see [`CoreError::is_peer_fault`].
#[derive(Error, Debug)]
pub enum CoreError {
    /// A wire message failed its per-variant validation rule.
    #[error("invalid message from {peer}: {reason}")]
    InvalidMessage { peer: PeerId, reason: String },

    /// A block arrived from a peer other than the one the requester is
    /// waiting on, or a requester already holds a block.
    #[error("mismatched delivery from {peer} for height {height}")]
    MismatchedDelivery { peer: PeerId, height: u64 },

    /// A block arrived for a height with no requester and drift exceeding
    /// the configured bound.
    #[error("unsolicited block from {peer} at height {height}, drift {drift} exceeds bound")]
    UnsolicitedDrift {
        peer: PeerId,
        height: u64,
        drift: i64,
    },

    /// The peer's receive-rate EMA fell below the configured minimum while
    /// it had requests outstanding.
    #[error("peer {0} is sending too slowly")]
    SlowSender(PeerId),

    /// The peer's inactivity timer fired with a request outstanding.
    #[error("peer {0} went inactive")]
    PeerInactive(PeerId),

    /// Light commit verification failed for a candidate block.
    #[error("commit verification failed for height {height}: {source}")]
    CommitVerification { height: u64, source: String },

    /// The state executor rejected a candidate block.
    #[error("block validation failed for height {height}: {source}")]
    BlockValidation { height: u64, source: String },

    /// A collaborator's fallible call failed (block store, executor).
    #[error("collaborator error: {0}")]
    Collaborator(String),

    /// `Start` called on an already-running pool/reactor, or `Stop` called
    /// on one that is not running. Non-fatal, surfaced to the caller.
    #[error("already running")]
    AlreadyRunning,

    #[error("not running")]
    NotRunning,

    /// Wire codec failure decoding or encoding a message.
    #[error("wire codec error: {0}")]
    Codec(#[from] std::io::Error),

    /// Configuration failed to load or parse.
    #[error("configuration error: {0}")]
    Config(String),
}

impl CoreError {
    /// True for every variant whose remedy is "disconnect the peer and keep
    /// going" rather than "stop the engine" (peer-attributable
    /// failures never interrupt the engine).
    pub fn is_peer_fault(&self) -> bool {
        matches!(
            self,
            CoreError::InvalidMessage { .. }
                | CoreError::MismatchedDelivery { .. }
                | CoreError::UnsolicitedDrift { .. }
                | CoreError::SlowSender(_)
                | CoreError::PeerInactive(_)
                | CoreError::CommitVerification { .. }
        )
    }

    /// The offending peer, for errors that name one.
    pub fn offending_peer(&self) -> Option<&str> {
        match self {
            CoreError::InvalidMessage { peer, .. } => Some(peer),
            CoreError::MismatchedDelivery { peer, .. } => Some(peer),
            CoreError::UnsolicitedDrift { peer, .. } => Some(peer),
            CoreError::SlowSender(peer) => Some(peer),
            CoreError::PeerInactive(peer) => Some(peer),
            _ => None,
        }
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
