// Copyright 2015-2020 Parity Technologies (UK) Ltd.
// This file is part of OpenEthereum.

// OpenEthereum is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// OpenEthereum is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.

// You should have received a copy of the GNU General Public License
// along with OpenEthereum.  If not, see <http://www.gnu.org/licenses/>.

//! Error kinds shared across the validator, consensus engine and chain-import pipeline.

use ethereum_types::{Address, H256};
use thiserror::Error;

/// Header validation and consensus-engine errors.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Header carries neither 32 bytes of vanity nor a 65 byte seal signature.
    #[error("extra data is missing vanity data")]
    MissingVanity,
    /// Seal signature is absent from the tail of `extra`.
    #[error("extra data is missing signature")]
    MissingSignature,
    /// Checkpoint block's embedded signer list is empty or not a multiple of 20 bytes.
    #[error("checkpoint signer list has invalid length {0}")]
    InvalidCheckpointSigners(usize),
    /// Non-checkpoint block embeds a signer list where none is allowed.
    #[error("non-checkpoint block contains extra signer list")]
    ExtraSigners,
    /// Checkpoint block references a snapshot that has not been resolved yet.
    #[error("missing checkpoint block: {0}")]
    MissingCheckpoint(H256),
    /// Checkpoint header's embedded signer list disagrees with the resolved snapshot.
    #[error("checkpoint signer list does not match snapshot")]
    MismatchingCheckpointSigners,
    /// `nonce` is neither the drop-vote nor the auth-vote magic value.
    #[error("invalid vote nonce {0:#x}")]
    InvalidNonce(u64),
    /// Checkpoint block carries a non-zero `coinbase` (no voting on epoch boundaries).
    #[error("beneficiary in checkpoint block non-zero")]
    InvalidCheckpointBeneficiary,
    /// Checkpoint block carries a vote nonce other than the drop-vote magic value.
    #[error("vote nonce in checkpoint block non-zero")]
    InvalidCheckpointVote,
    /// Header refers to the genesis block, which this operation does not support.
    #[error("unsupported operation on genesis block")]
    UnknownBlock,
    /// Header's `mix_digest` must be zero for Clique.
    #[error("non-zero mix digest")]
    InvalidMixDigest,
    /// Header `difficulty` outside `{1, 2}`.
    #[error("invalid difficulty {0}")]
    InvalidDifficulty(ethereum_types::U256),
    /// Header difficulty does not match the in-turn/out-of-turn expectation for its signer.
    #[error("wrong difficulty: expected {expected}, got {got}")]
    WrongDifficulty {
        /// Expected difficulty given the in-turn predicate.
        expected: ethereum_types::U256,
        /// Difficulty carried by the header.
        got: ethereum_types::U256,
    },
    /// Header timestamp is not strictly after `parent.time + period`.
    #[error("invalid timestamp")]
    InvalidTimestamp,
    /// Recovered signer is not a member of the resolved snapshot.
    #[error("signer {0} is not authorized")]
    UnauthorizedSigner(Address),
    /// Recovered signer appears within the recent-signers window.
    #[error("signer {0} has signed too recently")]
    RecentlySigned(Address),
    /// A vote's target does not move the snapshot in the direction it claims.
    #[error("invalid vote: target {0} is already in the requested membership state")]
    InvalidVote(Address),
    /// Snapshot resolution walked past the genesis without finding an anchor.
    #[error("invalid voting chain")]
    InvalidVotingChain,
    /// Operation requires a registered local signer, but none was configured via `authorize`.
    #[error("signing requested but no signer is registered")]
    RequiresSigner,
}

/// Chain-import errors.
#[derive(Debug, Error)]
pub enum ImportError {
    /// Block is already part of the canonical chain (or already imported as a side block).
    #[error("block {0} is already known")]
    KnownBlock(H256),
    /// No parent header can be located by hash or number.
    #[error("unknown ancestor for block {0}")]
    UnknownAncestor(H256),
    /// Parent header exists but its state has been pruned.
    #[error("ancestor {0} has been pruned")]
    PrunedAncestor(H256),
    /// Block's timestamp lies too far in the future to import immediately.
    #[error("block {0} is too far in the future")]
    FutureBlock(H256),
    /// Batch supplied to `insert_chain` is not a contiguous run of blocks.
    #[error("non-contiguous block batch at index {0}")]
    NonContiguous(usize),
    /// A side-chain block reuses a canonical state root under a different hash.
    #[error("sidechain block {0} claims a canonical state root under a different hash")]
    GhostState(H256),
    /// Insertion was interrupted by a stop signal.
    #[error("chain insertion was stopped")]
    Stopped,
    /// Reorg could not walk back to a common ancestor.
    #[error("invalid {which} chain during reorg")]
    InvalidReorgChain {
        /// Which side of the reorg failed to resolve (`"old"` or `"new"`).
        which: &'static str,
    },
}

/// Top-level crate error, aggregating the subsystem error enums.
#[derive(Debug, Error)]
pub enum Error {
    /// Error raised by header validation or the consensus engine.
    #[error(transparent)]
    Engine(#[from] EngineError),
    /// Error raised by the chain-import pipeline.
    #[error(transparent)]
    Import(#[from] ImportError),
    /// Error surfaced by an external collaborator (state executor, KV store, ...).
    #[error("external component failed: {0}")]
    External(String),
    /// RLP encoding/decoding failure.
    #[error("rlp codec error: {0}")]
    Rlp(#[from] rlp::DecoderError),
    /// Signature recovery or signing failure.
    #[error("cryptographic operation failed: {0}")]
    Crypto(String),
}

/// Convenience alias used throughout the crate.
pub type EthcoreResult<T> = Result<T, Error>;
