//! Scenario 4: a peer whose receive-rate EMA falls below the
//! configured minimum is swept as a slow sender and removed, even though it
//! never stops responding outright.
//!
//! The peer answers its very first request after an artificial delay,
//! which folds a near-zero bytes/sec sample into its EMA (with the sample
//! and smoothing windows both shrunk to 1s, one fold fully replaces the
//! seeded EMA). It then goes silent. Once another sample window elapses
//! with a second request still outstanding, the sweep must catch it.

mod common;

use std::sync::Arc;
use std::time::Duration;

use blocksync::config::PoolConfig;
use blocksync::memory::default_collaborators;
use blocksync::network::message::WireMessage;
use blocksync::reactor::Reactor;
use blocksync::types::State;

#[tokio::test]
async fn slow_peer_is_swept_and_removed() {
    let cfg = PoolConfig {
        max_requesters: 2,
        max_pending: 2,
        max_pending_per_peer: 2,
        recv_rate_sample_window_secs: 1,
        recv_rate_smoothing_window_secs: 1,
        min_recv_rate_bytes_per_sec: 1_000_000.0,
        ..PoolConfig::default()
    };

    let (block_store, executor, transport, consensus) = default_collaborators(0);
    let validators = common::validator_set(3);
    let state = State {
        chain_id: "test-chain".to_string(),
        last_block_height: 0,
        validators: validators.clone(),
    };

    let reactor = Arc::new(Reactor::new(cfg, block_store, executor, transport.clone(), consensus));
    reactor.start(state).await.unwrap();

    let peer = "slow-peer".to_string();
    let mut rx = transport.register(peer.clone()).await;
    reactor
        .on_message(peer.clone(), WireMessage::StatusResponse { height: 1000, base: 1 })
        .await;

    let chain = common::build_chain(&validators, 2);
    let mut answered_once = false;

    let outcome = tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            if transport.disconnected_peers().await.contains(&peer) {
                return;
            }
            if !answered_once {
                if let Ok(Some(WireMessage::BlockRequest { height })) =
                    tokio::time::timeout(Duration::from_millis(200), rx.recv()).await
                {
                    answered_once = true;
                    tokio::time::sleep(Duration::from_millis(1_100)).await;
                    let block = chain[(height - 1) as usize].clone();
                    reactor.on_message(peer.clone(), WireMessage::BlockResponse { block }).await;
                }
            } else {
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
    })
    .await;

    assert!(outcome.is_ok(), "slow peer was never disconnected");
    assert!(transport.disconnected_peers().await.contains(&peer));

    let status = reactor.pool_status().await.unwrap();
    assert_eq!(status.num_peers, 0, "no peers should remain bound after the sweep");
}
