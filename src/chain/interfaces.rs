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

//! Traits describing every external collaborator the chain-import pipeline and consensus
//! engine depend on but do not implement: persistence, execution, gossip and eventing.

use ethereum_types::{H256, U256};

use crate::error::Error;
use crate::types::{Block, Header, Receipt, Snapshot};

/// Read-only view of stored headers, consumed by the consensus engine while verifying and
/// sealing. Implementations must be safe to call concurrently from the parallel header
/// verifier.
pub trait ChainReader: Send + Sync {
    /// Looks up a header by hash, confirming it sits at `number`.
    fn header(&self, hash: H256, number: U256) -> Option<Header>;
    /// Looks up the canonical header at `number`.
    fn header_by_number(&self, number: U256) -> Option<Header>;
    /// Hash of the canonical block at `number`, if any.
    fn canonical_hash(&self, number: U256) -> Option<H256>;
}

/// Deterministic function of `(block, parent_state)`; execution semantics (EVM or otherwise)
/// live entirely behind this seam.
pub trait StateExecutor: Send + Sync {
    /// Executes every transaction in `block` against `state`, returning receipts and the gas
    /// actually used.
    fn process(&self, block: &Block, state: &mut dyn StateDb) -> Result<(Vec<Receipt>, u64), Error>;
}

/// A pending change set rooted at a particular parent state.
pub trait StateDb: Send {
    /// Root hash of the state as of the last commit, with any pending changes applied but not
    /// yet persisted.
    fn intermediate_root(&self) -> H256;
    /// Persists pending changes and returns the resulting root.
    fn commit(&mut self, number: U256) -> Result<H256, Error>;
}

/// Opens a [`StateDb`] rooted at an arbitrary parent state, so the insert pipeline and miner can
/// stand up execution state without depending on how it is actually stored.
pub trait StateDbFactory: Send + Sync {
    /// Opens a state handle whose unmodified root is `parent_state_root`.
    fn new_state(&self, parent_state_root: H256) -> Result<Box<dyn StateDb>, Error>;
}

/// Builds the body of a candidate block, drawing transactions from whatever mempool the host
/// maintains. Transaction pool management itself lives entirely behind this seam.
pub trait BlockAssembler: Send + Sync {
    /// Returns the ordered transaction list a block built on top of `parent` should include.
    fn assemble(&self, parent: &Header) -> Result<Vec<crate::types::block::Transaction>, Error>;
}

/// Opaque, atomically-batched key-value store backing the chain's own bookkeeping (bodies,
/// headers, receipts, total difficulty, canonical index, head pointer).
pub trait KvStore: Send + Sync {
    /// Most recently saved block, if any.
    fn get_latest_block(&self) -> Option<Block>;
    /// Persists a run of blocks; returns the count written.
    fn save_blocks(&self, blocks: &[Block]) -> Result<usize, Error>;
    /// Marks `block` as the latest block known to the store (not necessarily canonical).
    fn save_latest_block(&self, block: &Block) -> Result<(), Error>;
    /// Fetches a stored header along with the hash currently canonical at its height.
    fn header_by_hash(&self, hash: H256) -> Option<(Header, Option<H256>)>;
    /// Fetches a stored block body by hash.
    fn body(&self, hash: H256) -> Option<Vec<crate::types::block::Transaction>>;
    /// Fetches receipts stored for a block.
    fn receipts(&self, hash: H256) -> Option<Vec<Receipt>>;
    /// Persists receipts for a block.
    fn store_receipts(&self, hash: H256, receipts: &[Receipt]) -> Result<(), Error>;
    /// Reads the cumulative difficulty recorded for `hash`.
    fn read_td(&self, hash: H256) -> Option<U256>;
    /// Records the cumulative difficulty for `hash`.
    fn write_td(&self, hash: H256, td: U256) -> Result<(), Error>;
    /// Reads the canonical hash recorded at `number`.
    fn read_canonical_hash(&self, number: U256) -> Option<H256>;
    /// Records `hash` as canonical at `number`.
    fn write_canonical_hash(&self, hash: H256, number: U256) -> Result<(), Error>;
    /// Removes the canonical-index entry at `number`.
    fn delete_canonical_hash(&self, number: U256) -> Result<(), Error>;
    /// Removes a transaction's hash-to-block index entry.
    fn delete_transaction_index(&self, tx_hash: H256) -> Result<(), Error>;
}

/// On-disk checkpoint storage for PoA snapshots, consulted by the snapshot store at heights
/// that are a multiple of the configured checkpoint interval.
pub trait SnapshotDb: Send + Sync {
    /// Loads a previously stored checkpoint snapshot keyed by the header hash it is pinned to.
    fn load_snapshot(&self, hash: H256) -> Option<Snapshot>;
    /// Persists a checkpoint snapshot.
    fn store_snapshot(&self, snapshot: &Snapshot) -> Result<(), Error>;
}

/// Gossip transport: topics carry protobuf-serialized `wire::SyncTask` envelopes.
pub trait PubSub: Send + Sync {
    /// Publishes a `SyncTask` on `topic`.
    fn publish(&self, topic: &str, message: &crate::wire::SyncTask) -> Result<(), Error>;
}

/// In-process event kinds published on the `EventBus`.
#[derive(Debug, Clone)]
pub enum Event {
    /// New logs produced by a just-applied block.
    NewLogs,
    /// The canonical head advanced.
    ChainHighestBlock {
        /// Hash of the new head.
        hash: H256,
        /// Height of the new head.
        number: U256,
    },
    /// The downloader began a sync session; the miner should stop sealing.
    DownloaderStart,
    /// The downloader finished a sync session; the miner may resume sealing.
    DownloaderFinish,
}

/// Typed in-process publish/subscribe, used to decouple the chain, downloader and miner.
pub trait EventBus: Send + Sync {
    /// Publishes an event to every subscriber.
    fn publish(&self, event: Event);
}

/// A channel-backed [`EventBus`]: every [`EventChannel::subscribe`] call gets its own receiver,
/// fed by a fan-out over all subscribers on [`publish`](EventBus::publish).
#[derive(Default)]
pub struct EventChannel {
    subscribers: parking_lot::Mutex<Vec<crossbeam_channel::Sender<Event>>>,
}

impl EventChannel {
    /// Creates an empty bus with no subscribers.
    pub fn new() -> Self {
        EventChannel::default()
    }

    /// Registers a new subscriber and returns its receiver.
    pub fn subscribe(&self) -> crossbeam_channel::Receiver<Event> {
        let (tx, rx) = crossbeam_channel::unbounded();
        self.subscribers.lock().push(tx);
        rx
    }
}

impl EventBus for EventChannel {
    fn publish(&self, event: Event) {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}
