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

//! Resolves and caches PoA voting snapshots, walking back through ancestor headers only as far
//! as necessary before replaying forward.

use std::sync::Arc;

use ethereum_types::{H256, U256};
use lru::LruCache;
use parking_lot::Mutex;

use crate::chain::interfaces::{ChainReader, SnapshotDb};
use crate::config::Config;
use crate::error::{EngineError, Error, ImportError};
use crate::types::{Header, Snapshot};

/// Caches resolved snapshots in memory, keyed by the hash they are pinned to. Disk checkpoints
/// and genesis/epoch seeding are consulted through the supplied [`ChainReader`]/[`SnapshotDb`].
pub struct SnapshotStore {
    cache: Mutex<LruCache<H256, Arc<Snapshot>>>,
}

impl SnapshotStore {
    /// Creates a store whose in-memory cache holds `config.in_memory_snapshots` entries.
    pub fn new(config: &Config) -> Self {
        SnapshotStore {
            cache: Mutex::new(LruCache::new(config.in_memory_snapshots.max(1))),
        }
    }

    /// Resolves the snapshot valid at `(number, hash)`, preferring `parents` (ascending order,
    /// closest ancestor last) over database lookups while walking backward.
    pub fn snapshot(
        &self,
        chain: &dyn ChainReader,
        db: &dyn SnapshotDb,
        config: &Config,
        number: U256,
        hash: H256,
        parents: &[Header],
    ) -> Result<Arc<Snapshot>, Error> {
        if let Some(snap) = self.cache.lock().get(&hash) {
            return Ok(snap.clone());
        }

        let mut parents: Vec<Header> = parents.to_vec();
        let mut headers: Vec<Header> = Vec::new();
        let mut walk_number = number;
        let mut walk_hash = hash;

        let base = loop {
            if let Some(snap) = self.cache.lock().get(&walk_hash) {
                break snap.clone();
            }

            if (walk_number % U256::from(config.checkpoint_interval)).is_zero() {
                if let Some(snap) = db.load_snapshot(walk_hash) {
                    log::debug!(target: "snapshot", "loaded voting snapshot from disk number={}", walk_number);
                    break Arc::new(snap);
                }
            }

            let is_epoch = (walk_number % U256::from(config.epoch)).is_zero();
            let parent_locatable = walk_number.is_zero()
                || chain.header_by_number(walk_number - U256::one()).is_some();
            if walk_number.is_zero()
                || (is_epoch
                    && (headers.len() as u64 > config.full_immutability_threshold
                        || !parent_locatable))
            {
                if let Some(checkpoint) = chain.header_by_number(walk_number) {
                    let signers = checkpoint.embedded_signers();
                    let snap = Snapshot::new(config.epoch, walk_number, checkpoint.hash(), signers);
                    db.store_snapshot(&snap)?;
                    log::info!(target: "snapshot", "stored checkpoint snapshot to disk number={} hash={}", walk_number, snap.hash);
                    break Arc::new(snap);
                }
            }

            let header = match parents.pop() {
                Some(header) => {
                    if header.hash() != walk_hash || header.number != walk_number {
                        return Err(ImportError::UnknownAncestor(walk_hash).into());
                    }
                    header
                }
                None => chain
                    .header(walk_hash, walk_number)
                    .ok_or(ImportError::UnknownAncestor(walk_hash))?,
            };
            walk_number = walk_number.saturating_sub(U256::one());
            walk_hash = header.parent_hash;
            headers.push(header);
        };

        headers.reverse();
        let snap = base.apply(&headers)?;
        let snap = Arc::new(snap);
        self.cache.lock().put(snap.hash, snap.clone());

        if (snap.number % U256::from(config.checkpoint_interval)).is_zero() && !headers.is_empty() {
            db.store_snapshot(&snap)?;
            log::debug!(target: "snapshot", "stored voting snapshot to disk number={} hash={}", snap.number, snap.hash);
        }

        Ok(snap)
    }

    /// Inserts a snapshot into the cache directly, bypassing resolution. Used to seed the
    /// genesis snapshot ahead of the first verification.
    pub fn insert(&self, snapshot: Arc<Snapshot>) {
        self.cache.lock().put(snapshot.hash, snapshot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethereum_types::Address;
    use std::collections::HashMap;
    use std::sync::Mutex as StdMutex;

    use crate::types::header::{DIFF_IN_TURN, EXTRA_SEAL, EXTRA_VANITY, NONCE_DROP_VOTE};

    struct FakeChain {
        by_hash: HashMap<H256, Header>,
        by_number: HashMap<U256, Header>,
    }

    impl ChainReader for FakeChain {
        fn header(&self, hash: H256, number: U256) -> Option<Header> {
            self.by_hash
                .get(&hash)
                .filter(|h| h.number == number)
                .cloned()
        }
        fn header_by_number(&self, number: U256) -> Option<Header> {
            self.by_number.get(&number).cloned()
        }
        fn canonical_hash(&self, number: U256) -> Option<H256> {
            self.by_number.get(&number).map(Header::hash)
        }
    }

    #[derive(Default)]
    struct FakeSnapshotDb {
        store: StdMutex<HashMap<H256, Snapshot>>,
    }

    impl SnapshotDb for FakeSnapshotDb {
        fn load_snapshot(&self, hash: H256) -> Option<Snapshot> {
            self.store.lock().unwrap().get(&hash).cloned()
        }
        fn store_snapshot(&self, snapshot: &Snapshot) -> Result<(), Error> {
            self.store
                .lock()
                .unwrap()
                .insert(snapshot.hash, snapshot.clone());
            Ok(())
        }
    }

    fn genesis_with_signers(signers: &[Address]) -> Header {
        let mut extra = vec![0u8; EXTRA_VANITY];
        for s in signers {
            extra.extend_from_slice(s.as_bytes());
        }
        extra.extend_from_slice(&[0u8; EXTRA_SEAL]);
        Header {
            parent_hash: H256::zero(),
            number: U256::zero(),
            coinbase: Address::zero(),
            state_root: H256::zero(),
            tx_root: H256::zero(),
            receipts_root: H256::zero(),
            difficulty: U256::from(DIFF_IN_TURN),
            gas_limit: 8_000_000,
            gas_used: 0,
            time: 0,
            nonce: NONCE_DROP_VOTE,
            mix_digest: H256::zero(),
            extra,
        }
    }

    #[test]
    fn resolves_genesis_snapshot_from_embedded_signers() {
        let signer = Address::from_low_u64_be(7);
        let genesis = genesis_with_signers(&[signer]);
        let hash = genesis.hash();

        let mut by_hash = HashMap::new();
        by_hash.insert(hash, genesis.clone());
        let mut by_number = HashMap::new();
        by_number.insert(U256::zero(), genesis);
        let chain = FakeChain { by_hash, by_number };
        let db = FakeSnapshotDb::default();

        let store = SnapshotStore::new(&Config::default());
        let snap = store
            .snapshot(&chain, &db, &Config::default(), U256::zero(), hash, &[])
            .unwrap();
        assert!(snap.signers.contains_key(&signer));
        assert_eq!(snap.number, U256::zero());
    }
}
