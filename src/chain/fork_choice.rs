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

//! Decides, given the current head and a candidate tip, whether the candidate should become
//! canonical.

use ethereum_types::U256;

use crate::types::header::DIFF_IN_TURN;
use crate::types::Header;

/// `true` if `candidate` should replace `current` as the canonical head.
///
/// Ties at equal height favor the candidate only when the current head was sealed out-of-turn;
/// an equal-height in-turn current head is never displaced. This mirrors the reference engine's
/// `ReorgNeeded` exactly (see the open question in the design notes) rather than a symmetric
/// total-difficulty comparison.
pub fn reorg_needed(current: &Header, candidate: &Header) -> bool {
    match candidate.number.cmp(&current.number) {
        std::cmp::Ordering::Greater => true,
        std::cmp::Ordering::Less => false,
        std::cmp::Ordering::Equal => current.difficulty != U256::from(DIFF_IN_TURN),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::header::{DIFF_NO_TURN, EXTRA_SEAL, EXTRA_VANITY, NONCE_DROP_VOTE};
    use ethereum_types::{Address, H256};

    fn header(number: u64, difficulty: u64) -> Header {
        Header {
            parent_hash: H256::zero(),
            number: U256::from(number),
            coinbase: Address::zero(),
            state_root: H256::zero(),
            tx_root: H256::zero(),
            receipts_root: H256::zero(),
            difficulty: U256::from(difficulty),
            gas_limit: 8_000_000,
            gas_used: 0,
            time: 0,
            nonce: NONCE_DROP_VOTE,
            mix_digest: H256::zero(),
            extra: vec![0u8; EXTRA_VANITY + EXTRA_SEAL],
        }
    }

    #[test]
    fn higher_number_always_reorgs() {
        assert!(reorg_needed(&header(3, DIFF_IN_TURN), &header(4, DIFF_NO_TURN)));
    }

    #[test]
    fn lower_number_never_reorgs() {
        assert!(!reorg_needed(&header(4, DIFF_NO_TURN), &header(3, DIFF_IN_TURN)));
    }

    #[test]
    fn equal_height_prefers_in_turn_candidate_over_out_of_turn_current() {
        assert!(reorg_needed(&header(3, DIFF_NO_TURN), &header(3, DIFF_IN_TURN)));
    }

    #[test]
    fn equal_height_never_displaces_in_turn_current() {
        assert!(!reorg_needed(&header(3, DIFF_IN_TURN), &header(3, DIFF_NO_TURN)));
    }
}
