//! Minimal chain types the block-sync engine operates over.
//!
//! The engine itself never interprets transaction content or re-executes a
//! block — that belongs to the state executor collaborator, not the engine.
//! What's here is just enough structure for the pool, requester, and
//! reactor to address blocks by height, form block IDs, and hand commits to
//! the validator-set collaborator for light verification.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub type Hash256 = [u8; 32];
pub type PeerId = String;

/// Chunked gossip representation of a block; only its header (count + Merkle
/// root of parts) is needed here to form a `BlockId`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct PartSetHeader {
    pub total: u32,
    pub hash: Hash256,
}

/// Uniquely identifies a block on the wire: its content hash plus the part
/// set header under which it was gossiped.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct BlockId {
    pub hash: Hash256,
    pub part_set_header: PartSetHeader,
}

/// A single signed precommit contributing to a `Commit`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommitSig {
    pub validator: PeerId,
    pub signature: Vec<u8>,
}

/// The set of precommits that finalized the previous block, carried in the
/// current block's header so it travels one block "ahead" of what it
/// authenticates.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Commit {
    pub height: u64,
    pub block_id: BlockId,
    pub signatures: Vec<CommitSig>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct BlockHeader {
    pub height: u64,
    pub previous_hash: Hash256,
    pub timestamp: i64,
}

/// The unit of replication. `last_commit` is `None` only for the genesis
/// block (height 1), which has nothing to authenticate.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Block {
    pub header: BlockHeader,
    pub last_commit: Option<Commit>,
    pub data: Vec<u8>,
}

impl Block {
    pub fn height(&self) -> u64 {
        self.header.height
    }

    pub fn hash(&self) -> Hash256 {
        let mut hasher = Sha256::new();
        hasher.update(self.header.height.to_be_bytes());
        hasher.update(self.header.previous_hash);
        hasher.update(self.header.timestamp.to_be_bytes());
        hasher.update(&self.data);
        hasher.finalize().into()
    }

    /// Build this block's part set header and combine it with its content
    /// hash into the `BlockId` other blocks' `last_commit` must reference.
    pub fn block_id(&self) -> BlockId {
        let parts_hash = {
            let mut hasher = Sha256::new();
            hasher.update(b"parts");
            hasher.update(self.hash());
            hasher.finalize().into()
        };
        BlockId {
            hash: self.hash(),
            part_set_header: PartSetHeader {
                total: (self.data.len() as u32 / 64).max(1),
                hash: parts_hash,
            },
        }
    }
}

/// A single validator's share of voting power, and the voting-power
/// threshold light verification checks against.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Validator {
    pub id: PeerId,
    pub voting_power: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ValidatorSet {
    pub validators: Vec<Validator>,
}

impl ValidatorSet {
    pub fn total_voting_power(&self) -> u64 {
        self.validators.iter().map(|v| v.voting_power).sum()
    }

    fn power_of(&self, id: &str) -> Option<u64> {
        self.validators.iter().find(|v| v.id == id).map(|v| v.voting_power)
    }

    /// Light verification: the signing set must represent more than 2/3 of
    /// total voting power, and every signature must come from a known
    /// validator for the expected block id. Actual cryptographic signature
    /// checking is delegated to the signer collaborator in a production
    /// build (commit cryptography is a non-goal here) — this checks the
    /// structural/quorum half of the contract.
    pub fn verify_commit_light(&self, expected_block_id: &BlockId, commit: &Commit) -> Result<(), String> {
        if commit.block_id != *expected_block_id {
            return Err("commit references a different block id".into());
        }
        let total = self.total_voting_power();
        if total == 0 {
            return Err("empty validator set".into());
        }
        let mut signed_power = 0u64;
        for sig in &commit.signatures {
            match self.power_of(&sig.validator) {
                Some(power) => signed_power += power,
                None => return Err(format!("unknown validator {}", sig.validator)),
            }
        }
        if signed_power * 3 <= total * 2 {
            return Err(format!(
                "commit carries {signed_power}/{total} voting power, need >2/3"
            ));
        }
        Ok(())
    }
}

/// Application state as far as the engine is concerned: just enough to pass
/// to the state executor and to track the chain's validator set across
/// height transitions.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct State {
    pub chain_id: String,
    pub last_block_height: u64,
    pub validators: ValidatorSet,
}
