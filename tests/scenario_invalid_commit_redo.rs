//! Scenario 3: invalid commit triggers redo.
//!
//! Peer A (the only peer covering heights 1..4) serves the real block 4.
//! Peer B (the only peer covering heights 5..10) serves a tampered block 5
//! whose `last_commit` no longer authenticates block 4 — the pair check at
//! height 4 spans both peers. It must fail light verification, disconnect
//! both A and B, and leave heights 4 and 5 to be re-fetched once peer C
//! comes online with the real chain, after which sync still completes.

mod common;

use std::sync::Arc;
use std::time::Duration;

use blocksync::config::PoolConfig;
use blocksync::memory::default_collaborators;
use blocksync::network::message::WireMessage;
use blocksync::reactor::{Reactor, ReactorState};
use blocksync::types::State;

#[tokio::test]
async fn corrupted_commit_disconnects_both_peers_and_recovers() {
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

    let peer_a = "peerA".to_string();
    let peer_b = "peerB".to_string();
    let peer_c = "peerC".to_string();
    let mut rx_a = transport.register(peer_a.clone()).await;
    let mut rx_b = transport.register(peer_b.clone()).await;
    let mut rx_c = transport.register(peer_c.clone()).await;

    // Disjoint ranges make peer assignment deterministic: only A can serve
    // heights 1..4, only B can serve 5..10. C stays unadvertised (range
    // 0) until A and B have been disconnected.
    reactor
        .on_message(peer_a.clone(), WireMessage::StatusResponse { height: 4, base: 1 })
        .await;
    reactor
        .on_message(peer_b.clone(), WireMessage::StatusResponse { height: 10, base: 5 })
        .await;

    let good_chain = common::build_chain(&validators, 10);
    let mut tampered_block_5 = good_chain[4].clone();
    common::corrupt_commit(&mut tampered_block_5);

    let mut c_online = false;

    let outcome = tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            if reactor.current_state() == ReactorState::SwitchedToConsensus {
                return;
            }

            if !c_online {
                let disconnected = transport.disconnected_peers().await;
                if disconnected.contains(&peer_a) && disconnected.contains(&peer_b) {
                    c_online = true;
                    reactor
                        .on_message(peer_c.clone(), WireMessage::StatusResponse { height: 10, base: 1 })
                        .await;
                }
            }

            tokio::select! {
                Some(msg) = rx_a.recv() => {
                    if let WireMessage::BlockRequest { height } = msg {
                        if height >= 1 && (height as usize) <= good_chain.len() {
                            let block = good_chain[(height - 1) as usize].clone();
                            reactor.on_message(peer_a.clone(), WireMessage::BlockResponse { block }).await;
                        }
                    }
                }
                Some(msg) = rx_b.recv() => {
                    if let WireMessage::BlockRequest { height } = msg {
                        if height == 5 {
                            reactor
                                .on_message(peer_b.clone(), WireMessage::BlockResponse { block: tampered_block_5.clone() })
                                .await;
                        } else if (height as usize) <= good_chain.len() {
                            let block = good_chain[(height - 1) as usize].clone();
                            reactor.on_message(peer_b.clone(), WireMessage::BlockResponse { block }).await;
                        }
                    }
                }
                Some(msg) = rx_c.recv() => {
                    if let WireMessage::BlockRequest { height } = msg {
                        if (height as usize) <= good_chain.len() {
                            let block = good_chain[(height - 1) as usize].clone();
                            reactor.on_message(peer_c.clone(), WireMessage::BlockResponse { block }).await;
                        }
                    }
                }
                _ = tokio::time::sleep(Duration::from_millis(50)) => {}
            }
        }
    })
    .await;

    assert!(outcome.is_ok(), "sync did not recover and complete in time");
    assert_eq!(reactor.current_state(), ReactorState::SwitchedToConsensus);

    let disconnected = transport.disconnected_peers().await;
    assert!(disconnected.contains(&peer_a), "peer serving the tampered block should be disconnected");
    assert!(disconnected.contains(&peer_b), "peer serving the corroborating block should be disconnected too");

    for h in 1..=9 {
        let stored = block_store.load_block(h).await.unwrap().expect("block should be applied");
        assert_eq!(
            stored.data,
            good_chain[(h - 1) as usize].data,
            "height {h} must be the real block, not the tampered one"
        );
    }
}
