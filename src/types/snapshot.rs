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

//! The authorization snapshot: signer set, recently-signed window, and pending votes.

use std::collections::BTreeMap;

use ethereum_types::{Address, H256};
use serde::{Deserialize, Serialize};

use crate::error::EngineError;

use super::header::Header;
use super::BlockNumber;

/// A single pending vote cast via a header's `coinbase`/`nonce` fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
    /// Signer that cast the vote.
    pub signer: Address,
    /// Height at which the vote was cast.
    pub block: BlockNumber,
    /// Address the vote concerns.
    pub target: Address,
    /// `true` to authorize `target`, `false` to remove it.
    pub authorize: bool,
}

/// Running tally for a single vote target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tally {
    /// Direction the tally is voting, `true` to add.
    pub authorize: bool,
    /// Number of un-cancelled votes accumulated so far.
    pub votes: usize,
}

/// Authorization state pinned to a specific `(number, hash)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Height this snapshot is valid at.
    pub number: BlockNumber,
    /// Hash of the header this snapshot is valid at.
    pub hash: H256,
    /// Epoch length this snapshot was produced under (kept alongside the snapshot so `apply`
    /// doesn't need a config reference).
    pub epoch: u64,
    /// Currently authorized signers.
    pub signers: BTreeMap<Address, ()>,
    /// Signer recorded at each of the last `limit()` heights.
    pub recents: BTreeMap<u64, Address>,
    /// Votes cast since the last epoch reset, in causal order.
    pub votes: Vec<Vote>,
    /// Running tally per vote target.
    pub tally: BTreeMap<Address, Tally>,
}

impl Snapshot {
    /// Seeds a fresh snapshot from a genesis or checkpoint header's embedded signer list.
    pub fn new(epoch: u64, number: BlockNumber, hash: H256, signers: Vec<Address>) -> Self {
        let mut set = BTreeMap::new();
        for signer in signers {
            set.insert(signer, ());
        }
        Snapshot {
            number,
            hash,
            epoch,
            signers: set,
            recents: BTreeMap::new(),
            votes: Vec::new(),
            tally: BTreeMap::new(),
        }
    }

    /// Number of consecutive blocks a signer must sit out after signing.
    pub fn signer_limit(&self) -> u64 {
        (self.signers.len() / 2 + 1) as u64
    }

    /// Whether `signer` is due to seal block `number` (i.e. it is that signer's turn).
    pub fn in_turn(&self, number: BlockNumber, signer: &Address) -> bool {
        let signers = self.sorted_signers();
        if signers.is_empty() {
            return false;
        }
        let offset = (number.low_u64() as usize) % signers.len();
        signers.get(offset) == Some(signer)
    }

    /// Signers in ascending address order, the order checkpoint blocks embed them in.
    pub fn sorted_signers(&self) -> Vec<Address> {
        self.signers.keys().cloned().collect()
    }

    /// A vote is only meaningful if it would actually change membership: voting to add an
    /// existing signer, or to remove a non-signer, is a no-op.
    pub fn valid_vote(&self, target: Address, authorize: bool) -> bool {
        let is_signer = self.signers.contains_key(&target);
        (authorize && !is_signer) || (!authorize && is_signer)
    }

    /// Replays a run of headers (strictly ascending, contiguous, starting right after this
    /// snapshot) on top of this snapshot and returns the resulting snapshot.
    pub fn apply(&self, headers: &[Header]) -> Result<Snapshot, EngineError> {
        if headers.is_empty() {
            return Ok(self.clone());
        }
        for pair in headers.windows(2) {
            if pair[1].number != pair[0].number + 1.into() {
                return Err(EngineError::InvalidVotingChain);
            }
        }
        if headers[0].number != self.number + 1.into() {
            return Err(EngineError::InvalidVotingChain);
        }

        let mut snap = self.clone();
        for header in headers {
            let number = header.number;

            let is_checkpoint = !number.is_zero() && (number % ethereum_types::U256::from(snap.epoch)).is_zero();
            if is_checkpoint {
                snap.votes.clear();
                snap.tally.clear();
            }

            let limit = snap.signer_limit();
            if number.low_u64() >= limit {
                snap.recents.remove(&(number.low_u64() - limit));
            }

            let signer = header.recover_signer()?;
            if !snap.signers.contains_key(&signer) {
                return Err(EngineError::UnauthorizedSigner(signer));
            }
            if snap.recents.values().any(|s| *s == signer) {
                return Err(EngineError::RecentlySigned(signer));
            }
            snap.recents.insert(number.low_u64(), signer);

            if header.coinbase != Address::zero() {
                let authorize = header.nonce == super::header::NONCE_AUTH_VOTE;
                if snap.valid_vote(header.coinbase, authorize) {
                    let recast = snap
                        .votes
                        .iter()
                        .any(|v| v.signer == signer && v.target == header.coinbase);
                    snap.votes
                        .retain(|v| !(v.signer == signer && v.target == header.coinbase));
                    if recast {
                        // Uncast the signer's prior vote for this target before recasting it,
                        // so the tally never counts the same signer twice.
                        if let Some(entry) = snap.tally.get_mut(&header.coinbase) {
                            entry.votes -= 1;
                            if entry.votes == 0 {
                                snap.tally.remove(&header.coinbase);
                            }
                        }
                    }
                    snap.votes.push(Vote {
                        signer,
                        block: number,
                        target: header.coinbase,
                        authorize,
                    });
                    let entry = snap.tally.entry(header.coinbase).or_insert(Tally {
                        authorize,
                        votes: 0,
                    });
                    entry.votes += 1;

                    if entry.votes * 2 > snap.signers.len() {
                        if authorize {
                            snap.signers.insert(header.coinbase, ());
                        } else {
                            snap.signers.remove(&header.coinbase);
                            let limit = snap.signer_limit();
                            snap.recents.retain(|n, _| *n + limit <= number.low_u64());
                            snap.votes.retain(|v| v.signer != header.coinbase);
                        }
                        snap.votes.retain(|v| v.target != header.coinbase);
                        snap.tally.remove(&header.coinbase);
                    }
                }
            }
        }

        snap.number = headers.last().unwrap().number;
        snap.hash = headers.last().unwrap().hash();
        Ok(snap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethereum_types::U256;

    fn signer_set(n: usize) -> Vec<Address> {
        (0..n as u64).map(Address::from_low_u64_be).collect()
    }

    #[test]
    fn signer_limit_matches_half_plus_one() {
        let snap = Snapshot::new(30_000, U256::zero(), H256::zero(), signer_set(5));
        assert_eq!(snap.signer_limit(), 3);
    }

    #[test]
    fn in_turn_cycles_through_sorted_signers() {
        let signers = signer_set(3);
        let snap = Snapshot::new(30_000, U256::zero(), H256::zero(), signers.clone());
        assert!(snap.in_turn(U256::from(0), &signers[0]));
        assert!(snap.in_turn(U256::from(1), &signers[1]));
        assert!(snap.in_turn(U256::from(3), &signers[0]));
    }

    #[test]
    fn valid_vote_rejects_noop_targets() {
        let signers = signer_set(2);
        let snap = Snapshot::new(30_000, U256::zero(), H256::zero(), signers.clone());
        assert!(!snap.valid_vote(signers[0], true));
        assert!(snap.valid_vote(signers[0], false));
        let stranger = Address::from_low_u64_be(99);
        assert!(snap.valid_vote(stranger, true));
        assert!(!snap.valid_vote(stranger, false));
    }
}
