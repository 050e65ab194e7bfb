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

//! End-to-end scenarios against in-memory fakes of every external collaborator: the chain-import
//! pipeline and Clique engine are exercised exactly as a host process would drive them, with no
//! real key-value store or EVM behind the seams.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use ethereum_types::{Address, H256, U256};
use parity_crypto::publickey::{sign, Generator, KeyPair, Random};
use pretty_assertions::assert_eq;

use poa_chain::chain::interfaces::{
    ChainReader, EventChannel, KvStore, StateDb, StateDbFactory, StateExecutor,
};
use poa_chain::chain::Chain;
use poa_chain::config::Config;
use poa_chain::engine::clique::Clique;
use poa_chain::engine::Engine;
use poa_chain::error::{EngineError, Error, ImportError};
use poa_chain::types::header::{
    DIFF_IN_TURN, DIFF_NO_TURN, EXTRA_SEAL, EXTRA_VANITY, NONCE_DROP_VOTE,
};
use poa_chain::types::{Block, Header, Receipt};

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[derive(Default)]
struct MemKv {
    blocks: Mutex<HashMap<H256, Block>>,
    canonical: Mutex<HashMap<U256, H256>>,
    td: Mutex<HashMap<H256, U256>>,
    receipts: Mutex<HashMap<H256, Vec<Receipt>>>,
    latest: Mutex<Option<Block>>,
}

impl KvStore for MemKv {
    fn get_latest_block(&self) -> Option<Block> {
        self.latest.lock().unwrap().clone()
    }

    fn save_blocks(&self, blocks: &[Block]) -> Result<usize, Error> {
        let mut store = self.blocks.lock().unwrap();
        for block in blocks {
            store.insert(block.hash(), block.clone());
        }
        Ok(blocks.len())
    }

    fn save_latest_block(&self, block: &Block) -> Result<(), Error> {
        *self.latest.lock().unwrap() = Some(block.clone());
        Ok(())
    }

    fn header_by_hash(&self, hash: H256) -> Option<(Header, Option<H256>)> {
        let block = self.blocks.lock().unwrap().get(&hash)?.clone();
        let canonical = self.canonical.lock().unwrap().get(&block.number()).copied();
        Some((block.header, canonical))
    }

    fn body(&self, hash: H256) -> Option<Vec<poa_chain::types::block::Transaction>> {
        self.blocks
            .lock()
            .unwrap()
            .get(&hash)
            .map(|b| b.transactions.clone())
    }

    fn receipts(&self, hash: H256) -> Option<Vec<Receipt>> {
        self.receipts.lock().unwrap().get(&hash).cloned()
    }

    fn store_receipts(&self, hash: H256, receipts: &[Receipt]) -> Result<(), Error> {
        self.receipts.lock().unwrap().insert(hash, receipts.to_vec());
        Ok(())
    }

    fn read_td(&self, hash: H256) -> Option<U256> {
        self.td.lock().unwrap().get(&hash).copied()
    }

    fn write_td(&self, hash: H256, td: U256) -> Result<(), Error> {
        self.td.lock().unwrap().insert(hash, td);
        Ok(())
    }

    fn read_canonical_hash(&self, number: U256) -> Option<H256> {
        self.canonical.lock().unwrap().get(&number).copied()
    }

    fn write_canonical_hash(&self, hash: H256, number: U256) -> Result<(), Error> {
        self.canonical.lock().unwrap().insert(number, hash);
        Ok(())
    }

    fn delete_canonical_hash(&self, number: U256) -> Result<(), Error> {
        self.canonical.lock().unwrap().remove(&number);
        Ok(())
    }

    fn delete_transaction_index(&self, _tx_hash: H256) -> Result<(), Error> {
        Ok(())
    }
}

#[derive(Default)]
struct NoopSnapshotDb;

impl poa_chain::chain::interfaces::SnapshotDb for NoopSnapshotDb {
    fn load_snapshot(&self, _hash: H256) -> Option<poa_chain::types::Snapshot> {
        None
    }
    fn store_snapshot(&self, _snapshot: &poa_chain::types::Snapshot) -> Result<(), Error> {
        Ok(())
    }
}

struct NoopExecutor;

impl StateExecutor for NoopExecutor {
    fn process(
        &self,
        _block: &Block,
        _state: &mut dyn StateDb,
    ) -> Result<(Vec<Receipt>, u64), Error> {
        Ok((Vec::new(), 0))
    }
}

struct NoopStateDb;

impl StateDb for NoopStateDb {
    fn intermediate_root(&self) -> H256 {
        H256::zero()
    }
    fn commit(&mut self, _number: U256) -> Result<H256, Error> {
        Ok(H256::zero())
    }
}

struct NoopStateFactory;

impl StateDbFactory for NoopStateFactory {
    fn new_state(&self, _parent_state_root: H256) -> Result<Box<dyn StateDb>, Error> {
        Ok(Box::new(NoopStateDb))
    }
}

fn raw_header(number: u64, parent: H256, time: u64, difficulty: u64) -> Header {
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

fn genesis_with_signers(signers: &[Address]) -> Header {
    let mut extra = vec![0u8; EXTRA_VANITY];
    let mut sorted = signers.to_vec();
    sorted.sort();
    for addr in &sorted {
        extra.extend_from_slice(addr.as_bytes());
    }
    extra.extend_from_slice(&[0u8; EXTRA_SEAL]);
    Header {
        extra,
        ..raw_header(0, H256::zero(), 0, DIFF_IN_TURN)
    }
}

fn sign_header(header: &mut Header, keypair: &KeyPair) {
    let digest = header.seal_hash();
    let signature = sign(keypair.secret(), &digest).unwrap();
    let len = header.extra.len();
    header.extra[len - EXTRA_SEAL..].copy_from_slice(&signature[..]);
}

fn block(header: Header) -> Block {
    Block {
        header,
        transactions: Vec::new(),
    }
}

fn new_chain(genesis: Header, config: Config) -> (Arc<Chain>, Arc<dyn Engine>) {
    let db = Arc::new(NoopSnapshotDb::default());
    let engine: Arc<dyn Engine> = Arc::new(Clique::new(config.clone(), db));
    let kv: Arc<dyn KvStore> = Arc::new(MemKv::default());
    let chain = Chain::new(
        block(genesis),
        config,
        engine.clone(),
        kv,
        Arc::new(NoopExecutor),
        Arc::new(NoopStateFactory),
        Arc::new(EventChannel::new()),
        None,
    )
    .unwrap();
    (chain, engine)
}

/// Scenario 1: linear canonical growth with a single signer, always in turn.
#[test]
fn linear_canonical_growth() {
    let signer = Random.generate();
    let genesis = genesis_with_signers(&[signer.address()]);
    let mut config = Config::default();
    config.period = 1;
    let (chain, _engine) = new_chain(genesis.clone(), config);

    let mut b1 = raw_header(1, genesis.hash(), genesis.time + 1, DIFF_IN_TURN);
    sign_header(&mut b1, &signer);
    let mut b2 = raw_header(2, b1.hash(), b1.time + 1, DIFF_IN_TURN);
    sign_header(&mut b2, &signer);
    let mut b3 = raw_header(3, b2.hash(), b2.time + 1, DIFF_IN_TURN);
    sign_header(&mut b3, &signer);

    let count = chain
        .insert_chain(vec![block(b1.clone()), block(b2.clone()), block(b3.clone())])
        .unwrap();

    assert_eq!(count, 3);
    assert_eq!(chain.current_block().hash(), b3.hash());
    assert_eq!(chain.canonical_hash(U256::from(1)), Some(b1.hash()));
    assert_eq!(chain.canonical_hash(U256::from(2)), Some(b2.hash()));
    assert_eq!(chain.canonical_hash(U256::from(3)), Some(b3.hash()));
    assert_eq!(chain.td(b3.hash()), Some(U256::from(DIFF_IN_TURN * 3)));
}

/// Scenario 2: a non-contiguous batch is rejected wholesale, with no partial writes.
#[test]
fn non_contiguous_batch_rejected() {
    let signer = Random.generate();
    let genesis = genesis_with_signers(&[signer.address()]);
    let mut config = Config::default();
    config.period = 1;
    let (chain, _engine) = new_chain(genesis.clone(), config);

    let mut b1 = raw_header(1, genesis.hash(), genesis.time + 1, DIFF_IN_TURN);
    sign_header(&mut b1, &signer);
    let mut b3 = raw_header(3, b1.hash(), b1.time + 2, DIFF_IN_TURN);
    sign_header(&mut b3, &signer);

    let err = chain.insert_chain(vec![block(b1), block(b3)]).unwrap_err();
    assert!(matches!(err, Error::Import(ImportError::NonContiguous(1))));
    assert_eq!(chain.current_block().hash(), genesis.hash());
    assert_eq!(chain.canonical_hash(U256::from(1)), None);
}

/// Scenario 3: a block timestamped a couple of seconds ahead is queued rather than rejected,
/// and is accepted once that time has actually passed.
#[test]
fn future_block_is_queued_then_admitted() {
    let signer = Random.generate();
    let genesis = genesis_with_signers(&[signer.address()]);
    let mut config = Config::default();
    config.period = 1;
    let (chain, _engine) = new_chain(genesis.clone(), config);

    let future_time = unix_now() + 2;
    let mut b1 = raw_header(1, genesis.hash(), future_time, DIFF_IN_TURN);
    sign_header(&mut b1, &signer);

    let consumed = chain.insert_chain(vec![block(b1.clone())]).unwrap();
    assert_eq!(consumed, 1);
    assert_eq!(
        chain.current_block().hash(),
        genesis.hash(),
        "future block must not advance the head immediately"
    );

    std::thread::sleep(Duration::from_millis(2_200));

    let consumed = chain.insert_chain(vec![block(b1.clone())]).unwrap();
    assert_eq!(consumed, 1);
    assert_eq!(chain.current_block().hash(), b1.hash());
}

/// Scenario 4: an out-of-turn current head is displaced by an equal-height in-turn competitor.
#[test]
fn equal_height_reorg_prefers_in_turn_block() {
    let mut signers: Vec<KeyPair> = (0..3).map(|_| Random.generate()).collect();
    signers.sort_by_key(|k| k.address());
    let (a, b, c) = (&signers[0], &signers[1], &signers[2]);

    let genesis = genesis_with_signers(&[a.address(), b.address(), c.address()]);
    let mut config = Config::default();
    config.period = 1;
    let (chain, _engine) = new_chain(genesis.clone(), config);

    // height 1 in turn: index 1 % 3 == 1 -> b
    let mut b1 = raw_header(1, genesis.hash(), genesis.time + 1, DIFF_IN_TURN);
    sign_header(&mut b1, b);
    // height 2 in turn: index 2 % 3 == 2 -> c
    let mut b2 = raw_header(2, b1.hash(), b1.time + 1, DIFF_IN_TURN);
    sign_header(&mut b2, c);

    chain
        .insert_chain(vec![block(b1.clone()), block(b2.clone())])
        .unwrap();

    // height 3 in turn is `a` (index 0); seal out of turn with `b` instead (diff 1).
    let mut b3_out_of_turn = raw_header(3, b2.hash(), b2.time + 1, DIFF_NO_TURN);
    sign_header(&mut b3_out_of_turn, b);
    chain.insert_chain(vec![block(b3_out_of_turn.clone())]).unwrap();
    assert_eq!(chain.current_block().hash(), b3_out_of_turn.hash());

    // Competing in-turn block at the same height, signed by `a`.
    let mut b3_in_turn = raw_header(3, b2.hash(), b2.time + 1, DIFF_IN_TURN);
    sign_header(&mut b3_in_turn, a);
    chain.insert_chain(vec![block(b3_in_turn.clone())]).unwrap();

    assert_eq!(chain.current_block().hash(), b3_in_turn.hash());
    assert_eq!(
        chain.canonical_hash(U256::from(3)),
        Some(b3_in_turn.hash())
    );
    // The displaced block is still in the store, just no longer canonical.
    assert!(chain.get_block(b3_out_of_turn.hash()).is_some());
}

/// Scenario 5: a signer may not seal twice within the recent-signers window.
#[test]
fn signer_window_rejects_consecutive_seal() {
    let mut signers: Vec<KeyPair> = (0..3).map(|_| Random.generate()).collect();
    signers.sort_by_key(|k| k.address());
    let a = &signers[0];

    let addrs: Vec<Address> = signers.iter().map(|k| k.address()).collect();
    let genesis = genesis_with_signers(&addrs);
    let mut config = Config::default();
    config.period = 1;
    let (chain, engine) = new_chain(genesis.clone(), config);

    let mut b1 = raw_header(1, genesis.hash(), genesis.time + 1, DIFF_IN_TURN);
    sign_header(&mut b1, a);
    chain.insert_chain(vec![block(b1.clone())]).unwrap();

    let mut b2 = raw_header(2, b1.hash(), b1.time + 1, DIFF_IN_TURN);
    sign_header(&mut b2, a);

    let err = engine
        .verify_header(&*chain, &b2, &[])
        .expect_err("same signer must not seal two blocks inside the recents window");
    assert!(matches!(err, Error::Engine(EngineError::RecentlySigned(_))));
}

/// Scenario 6: a checkpoint block's embedded signer list must match the resolved snapshot
/// byte-for-byte.
#[test]
fn checkpoint_signer_list_mismatch_is_rejected() {
    let mut signers: Vec<KeyPair> = (0..2).map(|_| Random.generate()).collect();
    signers.sort_by_key(|k| k.address());
    let (a, b) = (&signers[0], &signers[1]);

    let genesis = genesis_with_signers(&[a.address(), b.address()]);
    let mut config = Config::default();
    config.period = 1;
    config.epoch = 3;
    let (chain, engine) = new_chain(genesis.clone(), config);

    // height 1 in turn: index 1 % 2 == 1 -> b
    let mut b1 = raw_header(1, genesis.hash(), genesis.time + 1, DIFF_IN_TURN);
    sign_header(&mut b1, b);
    // height 2 in turn: index 0 -> a
    let mut b2 = raw_header(2, b1.hash(), b1.time + 1, DIFF_IN_TURN);
    sign_header(&mut b2, a);
    chain
        .insert_chain(vec![block(b1.clone()), block(b2.clone())])
        .unwrap();

    // height 3 is a checkpoint (3 % epoch == 0); in turn signer is index 1 -> b.
    let mut extra = vec![0u8; EXTRA_VANITY];
    extra.extend_from_slice(a.address().as_bytes()); // only one signer embedded, should be [a, b]
    extra.extend_from_slice(&[0u8; EXTRA_SEAL]);
    let mut b3 = Header {
        extra,
        ..raw_header(3, b2.hash(), b2.time + 1, DIFF_IN_TURN)
    };
    sign_header(&mut b3, b);

    let err = engine
        .verify_header(&*chain, &b3, &[])
        .expect_err("checkpoint signer list must match the snapshot exactly");
    assert!(matches!(
        err,
        Error::Engine(EngineError::MismatchingCheckpointSigners)
    ));
}
