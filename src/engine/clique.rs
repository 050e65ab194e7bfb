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

//! Clique: the proof-of-authority [`Engine`] implementation. Signers are authorized through an
//! on-chain voting snapshot (see [`crate::engine::snapshot_store`]); block production alternates
//! between in-turn and out-of-turn signers, with out-of-turn seals delayed by a random jitter so
//! the in-turn signer gets first crack at each slot.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crossbeam_channel::{Receiver, Sender};
use ethereum_types::{Address, H256, U256};
use parking_lot::{Mutex, RwLock};
use parity_crypto::publickey::{sign, KeyPair};
use rand::Rng;
use rayon::prelude::*;

use crate::chain::interfaces::{ChainReader, SnapshotDb};
use crate::config::Config;
use crate::engine::snapshot_store::SnapshotStore;
use crate::engine::validator;
use crate::engine::{Engine, Seal, SealingState};
use crate::error::{EngineError, Error, ImportError};
use crate::types::header::{DIFF_IN_TURN, DIFF_NO_TURN, EXTRA_SEAL, EXTRA_VANITY};
use crate::types::{Block, Header};

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// The local signing identity registered via [`Clique::authorize`].
struct LocalSigner {
    keypair: KeyPair,
}

/// Clique proof-of-authority consensus engine.
pub struct Clique {
    config: Config,
    db: Arc<dyn SnapshotDb>,
    snapshots: Arc<SnapshotStore>,
    signer: RwLock<Option<LocalSigner>>,
    /// Addresses locally proposed for authorization changes, keyed by target, `true` to add.
    proposals: RwLock<HashMap<Address, bool>>,
    /// Caches the signer address recovered from a header's seal, keyed by header hash.
    signatures: Mutex<lru::LruCache<H256, Address>>,
}

impl Clique {
    /// Builds a fresh engine backed by `config` and an on-disk snapshot checkpoint store.
    pub fn new(config: Config, db: Arc<dyn SnapshotDb>) -> Self {
        let signatures = Mutex::new(lru::LruCache::new(config.in_memory_signatures.max(1)));
        let snapshots = Arc::new(SnapshotStore::new(&config));
        Clique {
            config,
            db,
            snapshots,
            signer: RwLock::new(None),
            proposals: RwLock::new(HashMap::new()),
            signatures,
        }
    }

    /// Registers the local signing identity. Required before [`Engine::seal`] will produce a
    /// block.
    pub fn authorize(&self, keypair: KeyPair) {
        *self.signer.write() = Some(LocalSigner { keypair });
    }

    /// Queues a local proposal to add or remove `target` from the signer set. Proposals are
    /// consulted by [`Engine::prepare`] and only cast as a vote when they would actually change
    /// membership.
    pub fn propose(&self, target: Address, authorize: bool) {
        self.proposals.write().insert(target, authorize);
    }

    /// Withdraws a previously queued proposal.
    pub fn discard(&self, target: Address) {
        self.proposals.write().remove(&target);
    }

    fn recover_cached(&self, header: &Header) -> Result<Address, Error> {
        let hash = header.hash();
        if let Some(addr) = self.signatures.lock().get(&hash) {
            return Ok(*addr);
        }
        let signer = header.recover_signer()?;
        self.signatures.lock().put(hash, signer);
        Ok(signer)
    }

    fn locate_parent(
        &self,
        chain: &dyn ChainReader,
        header: &Header,
        prior: &[Header],
    ) -> Result<Header, Error> {
        if let Some(last) = prior.last() {
            if last.hash() == header.parent_hash {
                return Ok(last.clone());
            }
        }
        chain
            .header(header.parent_hash, header.number - U256::one())
            .ok_or_else(|| ImportError::UnknownAncestor(header.hash()).into())
    }

    fn verify_cascading_and_seal(
        &self,
        chain: &dyn ChainReader,
        header: &Header,
        prior: &[Header],
    ) -> Result<(), Error> {
        if header.number.is_zero() {
            return Ok(());
        }

        let parent = self.locate_parent(chain, header, prior)?;
        validator::verify_cascading(header, &parent, self.config.period)?;

        let snapshot = self.snapshots.snapshot(
            chain,
            &*self.db,
            &self.config,
            parent.number,
            parent.hash(),
            prior,
        )?;

        if header.is_checkpoint(self.config.epoch) {
            let expected = snapshot.sorted_signers();
            if header.embedded_signers() != expected {
                return Err(EngineError::MismatchingCheckpointSigners.into());
            }
        }

        self.verify_seal_against(&snapshot, header)
    }

    fn verify_seal_against(
        &self,
        snapshot: &crate::types::Snapshot,
        header: &Header,
    ) -> Result<(), Error> {
        if header.number.is_zero() {
            return Err(EngineError::UnknownBlock.into());
        }
        let signer = self.recover_cached(header)?;
        if !snapshot.signers.contains_key(&signer) {
            return Err(EngineError::UnauthorizedSigner(signer).into());
        }
        if snapshot.recents.values().any(|s| *s == signer) {
            return Err(EngineError::RecentlySigned(signer).into());
        }
        let in_turn = snapshot.in_turn(header.number, &signer);
        let expected = if in_turn { DIFF_IN_TURN } else { DIFF_NO_TURN };
        if header.difficulty != U256::from(expected) {
            return Err(EngineError::WrongDifficulty {
                expected: U256::from(expected),
                got: header.difficulty,
            }
            .into());
        }
        Ok(())
    }
}

impl Engine for Clique {
    fn author(&self, header: &Header) -> Result<Address, Error> {
        self.recover_cached(header)
    }

    fn verify_header(
        &self,
        chain: &dyn ChainReader,
        header: &Header,
        parents: &[Header],
    ) -> Result<(), Error> {
        validator::verify_basic(header, unix_now(), self.config.epoch, self.config.max_gas_limit)?;
        self.verify_cascading_and_seal(chain, header, parents)
    }

    fn verify_headers(
        &self,
        chain: Arc<dyn ChainReader>,
        headers: Vec<Header>,
    ) -> (Sender<()>, Receiver<Result<(), Error>>) {
        let (stop_tx, stop_rx) = crossbeam_channel::bounded(1);
        let (result_tx, result_rx) = crossbeam_channel::bounded(headers.len().max(1));

        let config = self.config.clone();
        let db = self.db.clone();
        let snapshots = self.snapshots.clone();
        let signatures_cap = self.config.in_memory_signatures.max(1);

        std::thread::spawn(move || {
            // Stateless checks have no dependency on prior headers or chain state: run them
            // concurrently across the whole batch.
            let now = unix_now();
            let basic: Vec<Result<(), Error>> = headers
                .par_iter()
                .map(|h| validator::verify_basic(h, now, config.epoch, config.max_gas_limit))
                .collect();

            let mut signatures = lru::LruCache::new(signatures_cap);
            for (i, (header, basic_result)) in headers.iter().zip(basic.into_iter()).enumerate() {
                if stop_rx.try_recv().is_ok() {
                    return;
                }
                let result = basic_result.and_then(|_| {
                    verify_cascading_and_seal_standalone(
                        &*chain,
                        &snapshots,
                        &*db,
                        &config,
                        &mut signatures,
                        header,
                        &headers[..i],
                    )
                });
                if result_tx.send(result).is_err() {
                    return;
                }
            }
        });

        (stop_tx, result_rx)
    }

    fn prepare(&self, chain: &dyn ChainReader, header: &mut Header) -> Result<(), Error> {
        header.coinbase = Address::zero();
        header.nonce = crate::types::header::NONCE_DROP_VOTE;

        let parent = chain
            .header_by_number(header.number - U256::one())
            .ok_or_else(|| Error::from(ImportError::UnknownAncestor(header.parent_hash)))?;

        let snapshot =
            self.snapshots
                .snapshot(chain, &*self.db, &self.config, parent.number, parent.hash(), &[])?;

        if !header.is_checkpoint(self.config.epoch) {
            let proposals = self.proposals.read();
            let candidates: Vec<Address> = proposals
                .iter()
                .filter(|(addr, authorize)| snapshot.valid_vote(**addr, **authorize))
                .map(|(addr, _)| *addr)
                .collect();
            if !candidates.is_empty() {
                let target = candidates[rand::thread_rng().gen_range(0, candidates.len())];
                header.coinbase = target;
                header.nonce = if proposals[&target] {
                    crate::types::header::NONCE_AUTH_VOTE
                } else {
                    crate::types::header::NONCE_DROP_VOTE
                };
            }
        }

        let local_signer = self.signer.read();
        let signer_address = local_signer.as_ref().map(|s| s.keypair.address());
        header.difficulty = match signer_address {
            Some(addr) => calc_difficulty(&snapshot, &addr),
            None => U256::from(DIFF_NO_TURN),
        };
        drop(local_signer);

        let mut extra = header.extra.clone();
        extra.truncate(EXTRA_VANITY.min(extra.len()));
        extra.resize(EXTRA_VANITY, 0u8);
        if header.is_checkpoint(self.config.epoch) {
            for addr in snapshot.sorted_signers() {
                extra.extend_from_slice(addr.as_bytes());
            }
        }
        extra.extend_from_slice(&[0u8; EXTRA_SEAL]);
        header.extra = extra;
        header.mix_digest = H256::zero();

        header.time = (parent.time + self.config.period).max(unix_now());

        Ok(())
    }

    fn finalize(&self, header: &mut Header, state_root: H256) {
        header.state_root = state_root;
    }

    fn seal(
        &self,
        chain: &dyn ChainReader,
        block: Block,
        results: Sender<Seal>,
        stop: Receiver<()>,
    ) -> Result<(), Error> {
        let header = block.header.clone();
        if header.number.is_zero() {
            return Err(EngineError::UnknownBlock.into());
        }

        let local = self.signer.read();
        let local = local.as_ref().ok_or(EngineError::RequiresSigner)?;
        let signer_address = local.keypair.address();
        let secret = local.keypair.secret().clone();

        let parent = chain
            .header(header.parent_hash, header.number - U256::one())
            .ok_or_else(|| Error::from(ImportError::UnknownAncestor(header.parent_hash)))?;
        let snapshot = self.snapshots.snapshot(
            chain,
            &*self.db,
            &self.config,
            parent.number,
            parent.hash(),
            &[],
        )?;

        if !snapshot.signers.contains_key(&signer_address) {
            return Err(EngineError::UnauthorizedSigner(signer_address).into());
        }
        let limit = snapshot.signer_limit();
        if header.number.low_u64() < limit || snapshot.recents.values().any(|s| *s == signer_address) {
            return Err(EngineError::RecentlySigned(signer_address).into());
        }

        let now = unix_now() as i64;
        let mut delay = Duration::from_secs((header.time as i64 - now).max(0) as u64);
        if header.difficulty == U256::from(DIFF_NO_TURN) {
            let wiggle = self.config.wiggle_time() * (limit as u32);
            let jitter_ms = rand::thread_rng().gen_range(0, wiggle.as_millis().max(1) as u64);
            delay += Duration::from_millis(jitter_ms) + self.config.wiggle_time();
        }

        let wiggle_time = self.config.wiggle_time();
        std::thread::spawn(move || {
            let mut header = header;
            let mut block = block;
            loop {
                match stop.recv_timeout(delay) {
                    Ok(()) => return,
                    Err(crossbeam_channel::RecvTimeoutError::Disconnected) => return,
                    Err(crossbeam_channel::RecvTimeoutError::Timeout) => {}
                }
                let now = unix_now();
                if header.time > now {
                    delay = Duration::from_secs(header.time - now).min(wiggle_time * 32);
                    continue;
                }
                break;
            }

            let digest = header.seal_hash();
            let signature = match sign(&secret, &digest) {
                Ok(sig) => sig,
                Err(_) => return,
            };
            let extra_len = header.extra.len();
            header.extra[extra_len - EXTRA_SEAL..].copy_from_slice(&signature[..]);
            block.header = header;
            let _ = results.send(Seal::Regular(block));
        });

        Ok(())
    }

    fn calc_difficulty(&self, chain: &dyn ChainReader, parent: &Header) -> Result<U256, Error> {
        let snapshot =
            self.snapshots
                .snapshot(chain, &*self.db, &self.config, parent.number, parent.hash(), &[])?;
        let local = self.signer.read();
        Ok(match local.as_ref() {
            Some(signer) => calc_difficulty(&snapshot, &signer.keypair.address()),
            None => U256::from(DIFF_NO_TURN),
        })
    }

    fn sealing_state(&self, chain: &dyn ChainReader, parent: &Header) -> SealingState {
        let local = self.signer.read();
        let signer_address = match local.as_ref() {
            Some(s) => s.keypair.address(),
            None => return SealingState::NotReady,
        };
        let snapshot = match self.snapshots.snapshot(
            chain,
            &*self.db,
            &self.config,
            parent.number,
            parent.hash(),
            &[],
        ) {
            Ok(s) => s,
            Err(_) => return SealingState::NotReady,
        };
        if !snapshot.signers.contains_key(&signer_address) {
            return SealingState::NotReady;
        }
        if snapshot.recents.values().any(|s| *s == signer_address) {
            return SealingState::NotReady;
        }
        SealingState::Ready
    }
}

/// Difficulty this signer would produce for the block following `snapshot`.
fn calc_difficulty(snapshot: &crate::types::Snapshot, signer: &Address) -> U256 {
    if snapshot.in_turn(snapshot.number + U256::one(), signer) {
        U256::from(DIFF_IN_TURN)
    } else {
        U256::from(DIFF_NO_TURN)
    }
}

/// Free function mirror of [`Clique::verify_cascading_and_seal`], usable from the background
/// verification thread without capturing `&self`.
fn verify_cascading_and_seal_standalone(
    chain: &dyn ChainReader,
    snapshots: &SnapshotStore,
    db: &dyn SnapshotDb,
    config: &Config,
    signatures: &mut lru::LruCache<H256, Address>,
    header: &Header,
    prior: &[Header],
) -> Result<(), Error> {
    if header.number.is_zero() {
        return Ok(());
    }

    let parent = if let Some(last) = prior.last() {
        if last.hash() == header.parent_hash {
            last.clone()
        } else {
            chain
                .header(header.parent_hash, header.number - U256::one())
                .ok_or_else(|| ImportError::UnknownAncestor(header.hash()))?
        }
    } else {
        chain
            .header(header.parent_hash, header.number - U256::one())
            .ok_or_else(|| ImportError::UnknownAncestor(header.hash()))?
    };

    validator::verify_cascading(header, &parent, config.period)?;

    let snapshot = snapshots.snapshot(chain, db, config, parent.number, parent.hash(), prior)?;

    if header.is_checkpoint(config.epoch) {
        let expected = snapshot.sorted_signers();
        if header.embedded_signers() != expected {
            return Err(EngineError::MismatchingCheckpointSigners.into());
        }
    }

    let signer = match signatures.get(&header.hash()) {
        Some(addr) => *addr,
        None => {
            let recovered = header.recover_signer()?;
            signatures.put(header.hash(), recovered);
            recovered
        }
    };
    if !snapshot.signers.contains_key(&signer) {
        return Err(EngineError::UnauthorizedSigner(signer).into());
    }
    if snapshot.recents.values().any(|s| *s == signer) {
        return Err(EngineError::RecentlySigned(signer).into());
    }
    let in_turn = snapshot.in_turn(header.number, &signer);
    let expected = if in_turn { DIFF_IN_TURN } else { DIFF_NO_TURN };
    if header.difficulty != U256::from(expected) {
        return Err(EngineError::WrongDifficulty {
            expected: U256::from(expected),
            got: header.difficulty,
        }
        .into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::interfaces::SnapshotDb;
    use crate::types::header::{DIFF_IN_TURN, NONCE_DROP_VOTE};
    use crate::types::Snapshot;
    use parity_crypto::publickey::{Generator, Random};
    use std::collections::HashMap as StdHashMap;
    use std::sync::Mutex as StdMutex;

    struct FakeChain {
        by_hash: StdMutex<StdHashMap<H256, Header>>,
    }

    impl ChainReader for FakeChain {
        fn header(&self, hash: H256, number: U256) -> Option<Header> {
            self.by_hash
                .lock()
                .unwrap()
                .get(&hash)
                .filter(|h| h.number == number)
                .cloned()
        }
        fn header_by_number(&self, number: U256) -> Option<Header> {
            self.by_hash
                .lock()
                .unwrap()
                .values()
                .find(|h| h.number == number)
                .cloned()
        }
        fn canonical_hash(&self, number: U256) -> Option<H256> {
            self.header_by_number(number).map(|h| h.hash())
        }
    }

    #[derive(Default)]
    struct FakeSnapshotDb;
    impl SnapshotDb for FakeSnapshotDb {
        fn load_snapshot(&self, _hash: H256) -> Option<Snapshot> {
            None
        }
        fn store_snapshot(&self, _snapshot: &Snapshot) -> Result<(), Error> {
            Ok(())
        }
    }

    fn header_at(number: u64, parent: H256, difficulty: u64, time: u64) -> Header {
        Header {
            parent_hash: parent,
            number: U256::from(number),
            coinbase: Address::zero(),
            state_root: H256::zero(),
            tx_root: H256::zero(),
            receipts_root: H256::zero(),
            difficulty: U256::from(difficulty),
            gas_limit: 8_000_000,
            gas_used: 0,
            time,
            nonce: NONCE_DROP_VOTE,
            mix_digest: H256::zero(),
            extra: vec![0u8; EXTRA_VANITY + EXTRA_SEAL],
        }
    }

    fn sign_header(header: &mut Header, keypair: &KeyPair) {
        let digest = header.seal_hash();
        let sig = sign(keypair.secret(), &digest).unwrap();
        let len = header.extra.len();
        header.extra[len - EXTRA_SEAL..].copy_from_slice(&sig[..]);
    }

    #[test]
    fn rejects_unauthorized_signer_seal() {
        let genesis_signer = Random.generate();
        let mut extra = vec![0u8; EXTRA_VANITY];
        extra.extend_from_slice(genesis_signer.address().as_bytes());
        extra.extend_from_slice(&[0u8; EXTRA_SEAL]);
        let genesis = Header {
            extra,
            ..header_at(0, H256::zero(), DIFF_IN_TURN, 0)
        };

        let mut child = header_at(1, genesis.hash(), DIFF_IN_TURN, 100);
        let stranger = Random.generate();
        sign_header(&mut child, &stranger);

        let mut by_hash = StdHashMap::new();
        by_hash.insert(genesis.hash(), genesis.clone());
        let chain = FakeChain {
            by_hash: StdMutex::new(by_hash),
        };

        let engine = Clique::new(Config::default(), Arc::new(FakeSnapshotDb::default()));
        let err = engine.verify_header(&chain, &child, &[genesis]).unwrap_err();
        assert!(matches!(err, Error::Engine(EngineError::UnauthorizedSigner(_))));
    }

    #[test]
    fn in_turn_signer_seals_successfully() {
        let signer = Random.generate();
        let mut extra = vec![0u8; EXTRA_VANITY];
        extra.extend_from_slice(signer.address().as_bytes());
        extra.extend_from_slice(&[0u8; EXTRA_SEAL]);
        let genesis = Header {
            extra,
            ..header_at(0, H256::zero(), DIFF_IN_TURN, 0)
        };

        let mut child = header_at(1, genesis.hash(), DIFF_IN_TURN, genesis.time + 15);
        sign_header(&mut child, &signer);

        let mut by_hash = StdHashMap::new();
        by_hash.insert(genesis.hash(), genesis.clone());
        let chain = FakeChain {
            by_hash: StdMutex::new(by_hash),
        };

        let engine = Clique::new(Config::default(), Arc::new(FakeSnapshotDb::default()));
        engine.verify_header(&chain, &child, &[genesis]).unwrap();
    }
}
