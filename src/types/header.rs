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

//! Block header and its RLP/hashing rules.

use ethereum_types::{Address, H256, U256};
use parity_crypto::publickey::{public_to_address, recover, Signature};
use rlp::{Rlp, RlpStream};
use rlp_derive::{RlpDecodable, RlpEncodable};

use crate::error::EngineError;

use super::BlockNumber;

/// Number of leading vanity bytes reserved in `extra` before any signer list or seal.
pub const EXTRA_VANITY: usize = 32;
/// Number of trailing bytes in `extra` reserved for the seal signature.
pub const EXTRA_SEAL: usize = 65;

/// Magic nonce voting to add a signer.
pub const NONCE_AUTH_VOTE: [u8; 8] = [0xff; 8];
/// Magic nonce voting to remove a signer.
pub const NONCE_DROP_VOTE: [u8; 8] = [0x00; 8];

/// Difficulty assigned to an in-turn seal.
pub const DIFF_IN_TURN: u64 = 2;
/// Difficulty assigned to an out-of-turn seal.
pub const DIFF_NO_TURN: u64 = 1;

/// A block header.
///
/// `extra` carries, in order: `EXTRA_VANITY` bytes of vanity, an optional signer list on
/// checkpoint blocks (20 bytes per signer), and `EXTRA_SEAL` bytes reserved for the seal
/// signature (zeroed until the engine seals the block).
#[derive(RlpEncodable, RlpDecodable, Debug, Clone, PartialEq, Eq)]
pub struct Header {
    /// Hash of the parent block.
    pub parent_hash: H256,
    /// Block height.
    pub number: BlockNumber,
    /// Address credited with any vote cast via this header (zero if none).
    pub coinbase: Address,
    /// Root hash of the post-execution state trie.
    pub state_root: H256,
    /// Root hash of this block's transaction trie.
    pub tx_root: H256,
    /// Root hash of this block's receipt trie.
    pub receipts_root: H256,
    /// Block difficulty; `DIFF_IN_TURN` or `DIFF_NO_TURN` for Clique-sealed blocks.
    pub difficulty: U256,
    /// Gas limit for this block.
    pub gas_limit: u64,
    /// Gas actually used by this block's transactions.
    pub gas_used: u64,
    /// Unix timestamp, in seconds.
    pub time: u64,
    /// Vote nonce (`NONCE_AUTH_VOTE` or `NONCE_DROP_VOTE`).
    pub nonce: [u8; 8],
    /// Reserved for fork-choice extensions; must be zero under Clique.
    pub mix_digest: H256,
    /// Vanity, optional checkpoint signer list, and seal signature.
    pub extra: Vec<u8>,
}

impl Header {
    /// Keccak256 hash of the RLP-encoded header, including the seal signature.
    pub fn hash(&self) -> H256 {
        keccak_hash::keccak(rlp::encode(self))
    }

    /// Keccak256 hash of the header with the trailing seal signature stripped from `extra`;
    /// this is the digest a signer actually signs and a verifier recovers against.
    pub fn seal_hash(&self) -> H256 {
        if self.extra.len() < EXTRA_SEAL {
            return self.hash();
        }
        let mut unsealed = self.clone();
        unsealed.extra.truncate(self.extra.len() - EXTRA_SEAL);
        let mut stream = RlpStream::new();
        unsealed.rlp_append_unsealed(&mut stream);
        keccak_hash::keccak(stream.out())
    }

    fn rlp_append_unsealed(&self, s: &mut RlpStream) {
        s.begin_list(13);
        s.append(&self.parent_hash);
        s.append(&self.number);
        s.append(&self.coinbase);
        s.append(&self.state_root);
        s.append(&self.tx_root);
        s.append(&self.receipts_root);
        s.append(&self.difficulty);
        s.append(&self.gas_limit);
        s.append(&self.gas_used);
        s.append(&self.time);
        s.append(&&self.nonce[..]);
        s.append(&self.mix_digest);
        s.append(&self.extra);
    }

    /// `true` at epoch-boundary heights, where the header must embed the checkpoint signer list
    /// and carry a zero coinbase / drop-vote nonce.
    pub fn is_checkpoint(&self, epoch: u64) -> bool {
        (self.number % U256::from(epoch)).is_zero()
    }

    /// Byte length of the signer list embedded in `extra`, or `None` if `extra` is shorter than
    /// the mandatory vanity + seal framing.
    pub fn embedded_signers_len(&self) -> Option<usize> {
        self.extra.len().checked_sub(EXTRA_VANITY + EXTRA_SEAL)
    }

    /// Decodes the checkpoint signer list embedded between the vanity prefix and the seal
    /// suffix. Callers must have already validated `embedded_signers_len` is a multiple of 20.
    pub fn embedded_signers(&self) -> Vec<Address> {
        let len = match self.embedded_signers_len() {
            Some(len) => len,
            None => return Vec::new(),
        };
        self.extra[EXTRA_VANITY..EXTRA_VANITY + len]
            .chunks_exact(20)
            .map(Address::from_slice)
            .collect()
    }

    /// Returns the 65-byte seal signature suffix of `extra`, if present.
    pub fn seal_signature(&self) -> Option<&[u8]> {
        if self.extra.len() < EXTRA_SEAL {
            return None;
        }
        Some(&self.extra[self.extra.len() - EXTRA_SEAL..])
    }

    /// Recovers the address that produced this header's seal signature.
    pub fn recover_signer(&self) -> Result<Address, EngineError> {
        let sig_bytes = self.seal_signature().ok_or(EngineError::MissingSignature)?;
        if sig_bytes.len() != EXTRA_SEAL {
            return Err(EngineError::MissingSignature);
        }
        let mut sig = [0u8; EXTRA_SEAL];
        sig.copy_from_slice(sig_bytes);
        let signature = Signature::from(sig);
        let hash = self.seal_hash();
        let public = recover(&signature, &hash).map_err(|_| EngineError::MissingSignature)?;
        Ok(public_to_address(&public))
    }
}
