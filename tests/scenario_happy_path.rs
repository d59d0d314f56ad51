//! Scenario 1: happy path, single peer.
//!
//! Peer advertises `(base=1, height=5)`. Feeding blocks 1..5 in order
//! should drive the pool to `height = 5` and trigger exactly one
//! `SwitchToConsensus` call once `IsCaughtUp` goes true.

mod common;

use std::sync::Arc;
use std::time::Duration;

use blocksync::config::PoolConfig;
use blocksync::memory::default_collaborators;
use blocksync::network::message::WireMessage;
use blocksync::reactor::{Reactor, ReactorState};
use blocksync::types::State;

#[tokio::test]
async fn happy_path_single_peer_catches_up() {
    let (block_store, executor, transport, consensus) = default_collaborators(0);
    let validators = common::validator_set(4);
    let state = State {
        chain_id: "test-chain".to_string(),
        last_block_height: 0,
        validators: validators.clone(),
    };

    let reactor = Arc::new(Reactor::new(
        PoolConfig::default(),
        block_store.clone(),
        executor.clone(),
        transport.clone(),
        consensus.clone(),
    ));
    reactor.start(state).await.unwrap();

    let peer = "peerA".to_string();
    let mut rx = transport.register(peer.clone()).await;
    reactor
        .on_message(peer.clone(), WireMessage::StatusResponse { height: 5, base: 1 })
        .await;

    let chain = common::build_chain(&validators, 5);

    let outcome = tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            if reactor.current_state() == ReactorState::SwitchedToConsensus {
                return;
            }
            if let Ok(Some(WireMessage::BlockRequest { height })) =
                tokio::time::timeout(Duration::from_millis(200), rx.recv()).await
            {
                let block = chain[(height - 1) as usize].clone();
                reactor
                    .on_message(peer.clone(), WireMessage::BlockResponse { block })
                    .await;
            }
        }
    })
    .await;

    assert!(outcome.is_ok(), "engine did not catch up in time");
    assert_eq!(reactor.current_state(), ReactorState::SwitchedToConsensus);

    let switched = consensus.switched_state().await;
    assert_eq!(switched.unwrap().last_block_height, 4);
    assert!(transport.disconnected_peers().await.is_empty());
}
