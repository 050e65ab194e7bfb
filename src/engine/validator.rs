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

//! Stateless and cascading header checks, independent of any resolved snapshot.

use ethereum_types::U256;

use crate::error::{EngineError, Error, ImportError};
use crate::types::header::{
    Header, DIFF_IN_TURN, DIFF_NO_TURN, EXTRA_SEAL, EXTRA_VANITY, NONCE_AUTH_VOTE, NONCE_DROP_VOTE,
};

/// Checks that require only `header` itself: no parent, no snapshot.
///
/// `now` is the verifier's wall-clock time; blocks timestamped further ahead than is tolerated
/// are reported as [`ImportError::FutureBlock`] rather than a consensus error, so the insert
/// pipeline can route them to the future queue instead of dropping them.
pub fn verify_basic(header: &Header, now: u64, epoch: u64, max_gas_limit: u64) -> Result<(), Error> {
    if header.time > now {
        return Err(ImportError::FutureBlock(header.hash()).into());
    }

    let checkpoint = header.is_checkpoint(epoch);
    if checkpoint && header.coinbase != Default::default() {
        return Err(EngineError::InvalidCheckpointBeneficiary.into());
    }
    if header.nonce != NONCE_AUTH_VOTE && header.nonce != NONCE_DROP_VOTE {
        return Err(EngineError::InvalidNonce(u64::from_be_bytes(header.nonce)).into());
    }
    if checkpoint && header.nonce != NONCE_DROP_VOTE {
        return Err(EngineError::InvalidCheckpointVote.into());
    }

    if header.extra.len() < EXTRA_VANITY {
        return Err(EngineError::MissingVanity.into());
    }
    if header.extra.len() < EXTRA_VANITY + EXTRA_SEAL {
        return Err(EngineError::MissingSignature.into());
    }
    let signers_len = header.extra.len() - EXTRA_VANITY - EXTRA_SEAL;
    if !checkpoint && signers_len != 0 {
        return Err(EngineError::ExtraSigners.into());
    }
    if checkpoint && signers_len % 20 != 0 {
        return Err(EngineError::InvalidCheckpointSigners(signers_len).into());
    }

    if !header.mix_digest.is_zero() {
        return Err(EngineError::InvalidMixDigest.into());
    }

    if !header.number.is_zero() {
        let diff = header.difficulty;
        if diff != U256::from(DIFF_IN_TURN) && diff != U256::from(DIFF_NO_TURN) {
            return Err(EngineError::InvalidDifficulty(diff).into());
        }
    }

    if header.gas_limit > max_gas_limit {
        return Err(Error::External(format!(
            "invalid gas limit: have {}, max {}",
            header.gas_limit, max_gas_limit
        )));
    }

    Ok(())
}

/// Checks that require the immediate parent header.
pub fn verify_cascading(header: &Header, parent: &Header, period: u64) -> Result<(), Error> {
    if header.number.is_zero() {
        return Ok(());
    }
    if parent.number + U256::one() != header.number || parent.hash() != header.parent_hash {
        return Err(ImportError::UnknownAncestor(header.hash()).into());
    }
    if parent.time + period > header.time {
        return Err(EngineError::InvalidTimestamp.into());
    }
    if header.gas_used > header.gas_limit {
        return Err(Error::External(format!(
            "invalid gas used: have {}, gas limit {}",
            header.gas_used, header.gas_limit
        )));
    }
    Ok(())
}
