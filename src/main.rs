//! Demo/exerciser binary for the block-sync engine.
//!
//! The core crate (`blocksync`) has no CLI, environment, or persistent state
//! of its own — its lifecycle is controlled by whatever node process embeds
//! it. This binary is that node process's stand-in: it wires the
//! engine against the in-memory collaborators in [`blocksync::memory`],
//! spins up a handful of synthetic peers that serve a precomputed chain,
//! and logs sync progress until the engine reports caught up and hands off
//! to the (no-op) consensus collaborator.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;

use blocksync::config::{EngineConfig, LoggingConfig};
use blocksync::memory::default_collaborators;
use blocksync::network::message::WireMessage;
use blocksync::reactor::{Reactor, ReactorState};
use blocksync::shutdown::ShutdownManager;
use blocksync::types::{Block, BlockHeader, Commit, CommitSig, State, Validator, ValidatorSet};

#[derive(Parser, Debug)]
#[command(name = "blocksyncd")]
#[command(about = "Block-sync engine demo daemon", long_about = None)]
struct Args {
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    #[arg(long)]
    generate_config: bool,

    #[arg(short, long)]
    verbose: bool,

    /// Number of synthetic peers to simulate feeding blocks from.
    #[arg(long, default_value_t = 3)]
    demo_peers: usize,

    /// Chain height the synthetic peers advertise and serve.
    #[arg(long, default_value_t = 200)]
    demo_height: u64,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    if let Ok(hostname) = hostname::get() {
        if let Ok(hostname_str) = hostname.into_string() {
            let short_name = hostname_str.split('.').next().unwrap_or(&hostname_str);
            eprintln!("\n=== blocksyncd on {short_name} ===\n");
        }
    }

    if args.generate_config {
        let config = EngineConfig::default();
        match toml::to_string_pretty(&config) {
            Ok(rendered) => match std::fs::write(&args.config, rendered) {
                Ok(()) => {
                    println!("generated default config at {}", args.config);
                    return;
                }
                Err(e) => {
                    eprintln!("failed to write config: {e}");
                    std::process::exit(1);
                }
            },
            Err(e) => {
                eprintln!("failed to serialize default config: {e}");
                std::process::exit(1);
            }
        }
    }

    let config_path = resolve_config_path(&args.config);
    let config = match EngineConfig::load_from_file(&config_path) {
        Ok(cfg) => {
            println!("loaded configuration from {config_path}");
            cfg
        }
        Err(_) => {
            println!(
                "no config at {config_path}, falling back to defaults (run with --generate-config to write one)"
            );
            EngineConfig::default()
        }
    };

    setup_logging(&config.logging, args.verbose);

    let version = env!("CARGO_PKG_VERSION");
    let git_hash = option_env!("GIT_HASH").unwrap_or("unknown");
    let build_date = option_env!("BUILD_DATE").unwrap_or("unknown");
    info!(
        "🚀 blocksyncd starting (version {}, git {}, built {}, chain {})",
        version, git_hash, build_date, config.chain_id
    );

    let mut shutdown_manager = ShutdownManager::new();
    let shutdown_token = shutdown_manager.token();

    let (block_store, executor, transport, consensus) = default_collaborators(0);

    let peer_count = args.demo_peers.max(1);
    let validators = synthetic_validator_set(peer_count);
    let genesis_state = State {
        chain_id: config.chain_id.clone(),
        last_block_height: 0,
        validators: validators.clone(),
    };

    let reactor = Arc::new(Reactor::new(
        config.pool.clone(),
        block_store.clone(),
        executor.clone(),
        transport.clone(),
        consensus.clone(),
    ));

    reactor
        .start(genesis_state)
        .await
        .expect("reactor should not already be running on startup");

    let chain = build_chain(&validators, args.demo_height);
    for i in 0..peer_count {
        let peer_id = format!("demo-peer-{i}");
        let rx = transport.register(peer_id.clone()).await;
        reactor
            .on_message(
                peer_id.clone(),
                WireMessage::StatusResponse {
                    height: args.demo_height as i64,
                    base: 1,
                },
            )
            .await;

        let reactor = Arc::clone(&reactor);
        let chain = chain.clone();
        let token = shutdown_token.clone();
        let handle = tokio::spawn(async move {
            run_synthetic_peer(peer_id, rx, reactor, chain, args.demo_height, token).await;
        });
        shutdown_manager.register_task(handle);
    }

    let status_reactor = Arc::clone(&reactor);
    let status_token = shutdown_token.clone();
    let status_task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(2));
        loop {
            tokio::select! {
                _ = status_token.cancelled() => return,
                _ = ticker.tick() => {
                    if let Some(status) = status_reactor.pool_status().await {
                        info!(
                            "📊 Sync status: height {} (peer max {}), {} pending, {} peers, {} blocks synced ({:.1}/sec)",
                            status.height,
                            status.max_peer_height,
                            status.num_pending,
                            status.num_peers,
                            status_reactor.blocks_synced(),
                            status_reactor.blocks_per_sec(),
                        );
                    }
                    if status_reactor.current_state() == ReactorState::SwitchedToConsensus {
                        info!("✅ Caught up, handed off to consensus");
                        return;
                    }
                }
            }
        }
    });
    shutdown_manager.register_task(status_task);

    shutdown_manager.wait_for_shutdown().await;
    reactor.shutdown().await;
    info!("🛑 blocksyncd stopped");
}

/// Prefer an explicit config path if it exists, otherwise fall back to
/// `~/.blocksyncd/config.toml`, otherwise leave the explicit path as given
/// (so the subsequent load attempt produces a useful "not found" message).
fn resolve_config_path(explicit: &str) -> String {
    if Path::new(explicit).exists() {
        return explicit.to_string();
    }
    if let Some(home) = dirs::home_dir() {
        let candidate = home.join(".blocksyncd").join("config.toml");
        if candidate.exists() {
            return candidate.to_string_lossy().into_owned();
        }
    }
    explicit.to_string()
}

fn setup_logging(config: &LoggingConfig, verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let level = if verbose { "trace" } else { config.level.as_str() };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let is_systemd =
        std::env::var("JOURNAL_STREAM").is_ok() || std::env::var("INVOCATION_ID").is_ok();

    match config.format.as_str() {
        "json" => {
            fmt().json().with_env_filter(filter).with_thread_ids(false).init();
        }
        _ if is_systemd => {
            fmt()
                .with_env_filter(filter)
                .with_target(false)
                .with_thread_ids(false)
                .with_thread_names(false)
                .with_file(false)
                .with_line_number(false)
                .without_time()
                .compact()
                .init();
        }
        _ => {
            fmt().with_env_filter(filter).compact().init();
        }
    }
}

fn synthetic_validator_set(n: usize) -> ValidatorSet {
    ValidatorSet {
        validators: (0..n)
            .map(|i| Validator {
                id: format!("validator-{i}"),
                voting_power: 1,
            })
            .collect(),
    }
}

/// Build a self-consistent chain of `height` blocks, each carrying the
/// previous block's id in its `last_commit`, signed by every validator so
/// light verification's quorum check always passes.
fn build_chain(validators: &ValidatorSet, height: u64) -> Vec<Block> {
    let mut chain = Vec::with_capacity(height as usize);
    let mut base_timestamp = rand::random::<u16>() as i64;
    for h in 1..=height {
        let previous = chain.last();
        base_timestamp += 1;
        let header = BlockHeader {
            height: h,
            previous_hash: previous.map(|b| b.hash()).unwrap_or_default(),
            timestamp: base_timestamp,
        };
        let last_commit = previous.map(|p| Commit {
            height: p.height(),
            block_id: p.block_id(),
            signatures: validators
                .validators
                .iter()
                .map(|v| CommitSig {
                    validator: v.id.clone(),
                    signature: vec![0xAB; 8],
                })
                .collect(),
        });
        chain.push(Block {
            header,
            last_commit,
            data: h.to_be_bytes().to_vec(),
        });
    }
    chain
}

async fn run_synthetic_peer(
    peer_id: String,
    mut rx: tokio::sync::mpsc::UnboundedReceiver<WireMessage>,
    reactor: Arc<Reactor>,
    chain: Vec<Block>,
    demo_height: u64,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            msg = rx.recv() => {
                let Some(msg) = msg else { return };
                match msg {
                    WireMessage::BlockRequest { height } if height >= 1 && (height as usize) <= chain.len() => {
                        let block = chain[(height - 1) as usize].clone();
                        reactor.on_message(peer_id.clone(), WireMessage::BlockResponse { block }).await;
                    }
                    WireMessage::BlockRequest { height } => {
                        reactor.on_message(peer_id.clone(), WireMessage::NoBlockResponse { height }).await;
                    }
                    WireMessage::StatusRequest => {
                        reactor
                            .on_message(
                                peer_id.clone(),
                                WireMessage::StatusResponse {
                                    height: demo_height as i64,
                                    base: 1,
                                },
                            )
                            .await;
                    }
                    _ => {}
                }
            }
        }
    }
}
