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

//! Consensus engine specification and the Clique proof-of-authority implementation.

pub mod clique;
pub mod snapshot_store;
pub mod validator;

use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};
use ethereum_types::{Address, U256};

use crate::chain::interfaces::ChainReader;
use crate::error::Error;
use crate::types::{Block, Header};

/// Result of attempting to seal a block.
#[derive(Debug, PartialEq, Eq)]
pub enum Seal {
    /// A sealed block, ready to be inserted and broadcast.
    Regular(Block),
    /// The engine has nothing to seal right now (not our turn, or recently signed).
    None,
}

/// An abstract consensus engine: verifies headers, prepares and seals new ones, and finalizes
/// post-execution state. Mirrors the seams a pluggable engine needs; this crate ships exactly
/// one implementation, [`clique::Clique`].
pub trait Engine: Send + Sync {
    /// Recovers the address that authored `header`.
    fn author(&self, header: &Header) -> Result<Address, Error>;

    /// Runs the stateless and cascading header checks, then verifies the seal.
    fn verify_header(
        &self,
        chain: &dyn ChainReader,
        header: &Header,
        parents: &[Header],
    ) -> Result<(), Error>;

    /// Verifies a batch of headers in the background. Returns immediately with a channel of
    /// results in input order and a stop sender that aborts any verification still in flight.
    /// `chain` is `Arc`-wrapped because the verification runs on its own thread, outliving this
    /// call.
    fn verify_headers(
        &self,
        chain: Arc<dyn ChainReader>,
        headers: Vec<Header>,
    ) -> (Sender<()>, Receiver<Result<(), Error>>);

    /// Populates the consensus-relevant fields of `header` (difficulty, extra, nonce,
    /// timestamp) ahead of transaction execution.
    fn prepare(&self, chain: &dyn ChainReader, header: &mut Header) -> Result<(), Error>;

    /// Finalizes `header` after execution: sets the post-state root, no block reward under
    /// Clique.
    fn finalize(&self, header: &mut Header, state_root: ethereum_types::H256);

    /// Attempts to seal `block`, authorized by whichever signer was registered via
    /// [`clique::Clique::authorize`]. `stop` cancels the in-flight delay; a [`Seal::Regular`]
    /// is pushed onto `results` once the block is actually sealed.
    fn seal(
        &self,
        chain: &dyn ChainReader,
        block: Block,
        results: Sender<Seal>,
        stop: Receiver<()>,
    ) -> Result<(), Error>;

    /// Difficulty this engine's registered signer would produce for the next block after
    /// `parent`.
    fn calc_difficulty(&self, chain: &dyn ChainReader, parent: &Header) -> Result<U256, Error>;

    /// Whether the engine is currently able to seal on top of `parent`.
    fn sealing_state(&self, chain: &dyn ChainReader, parent: &Header) -> SealingState;
}

/// Whether the engine is presently able to produce a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SealingState {
    /// A signer is registered and not recently-signed; sealing may proceed.
    Ready,
    /// No signer registered, or the registered signer is inside the recent-signers window.
    NotReady,
}
