//! Shared fixtures for the end-to-end scenario tests.
//!
//! Builds a self-consistent synthetic chain (each block's `last_commit`
//! references its predecessor and is signed by every validator) so tests
//! can exercise the full reactor/pool/requester pipeline against
//! `blocksync::memory`'s in-memory collaborators without a real transport.

use blocksync::types::{Block, BlockHeader, Commit, CommitSig, Validator, ValidatorSet};

#[allow(dead_code)]
pub fn validator_set(n: usize) -> ValidatorSet {
    ValidatorSet {
        validators: (0..n)
            .map(|i| Validator {
                id: format!("validator-{i}"),
                voting_power: 1,
            })
            .collect(),
    }
}

/// Build `height` blocks (1-indexed) with correct cross-referencing commits.
#[allow(dead_code)]
pub fn build_chain(validators: &ValidatorSet, height: u64) -> Vec<Block> {
    let mut chain: Vec<Block> = Vec::with_capacity(height as usize);
    for h in 1..=height {
        let previous = chain.last();
        let header = BlockHeader {
            height: h,
            previous_hash: previous.map(|b: &Block| b.hash()).unwrap_or_default(),
            timestamp: 1_700_000_000 + h as i64,
        };
        let last_commit = previous.map(|p: &Block| Commit {
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

/// Corrupt a block's `last_commit.block_id` so it no longer authenticates
/// its true predecessor — used to exercise the commit-verification-failure
/// redo path (scenario 3).
#[allow(dead_code)]
pub fn corrupt_commit(block: &mut Block) {
    if let Some(commit) = block.last_commit.as_mut() {
        commit.block_id.hash[0] ^= 0xFF;
    }
}
