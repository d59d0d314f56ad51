//! Block-synchronization engine: fetches blocks from peers in parallel,
//! verifies them, applies them strictly in order, and hands off to
//! consensus once caught up.

pub mod collaborators;
pub mod config;
pub mod constants;
pub mod error;
pub mod memory;
pub mod network;
pub mod peer_tracker;
pub mod pool;
pub mod reactor;
pub mod requester;
pub mod shutdown;
pub mod types;

pub use collaborators::{BlockStore, ConsensusClient, StateExecutor, Transport};
pub use config::EngineConfig;
pub use error::{CoreError, CoreResult};
pub use pool::Pool;
pub use reactor::{Reactor, ReactorState};
