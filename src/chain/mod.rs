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

//! The chain-import pipeline: classifies incoming blocks against local state, routes them to the
//! clean-execution path, the side-chain path or the future-block queue, and keeps the canonical
//! index and head pointer in sync via the reorg engine.

pub mod fork_choice;
pub mod future_queue;
pub mod interfaces;
pub mod reorg;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crossbeam_channel::{Receiver, Sender};
use ethereum_types::{H256, U256};
use lru::LruCache;
use parking_lot::{Mutex, RwLock};

use crate::config::Config;
use crate::engine::Engine;
use crate::error::{Error, ImportError};
use crate::types::{Block, Header, Receipt};

use interfaces::{ChainReader, EventBus, EventChannel, KvStore, PubSub, StateDbFactory, StateExecutor};

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn is_known_block_err(result: &Result<(), Error>) -> bool {
    matches!(result, Err(Error::Import(ImportError::KnownBlock(_))))
}

fn is_future_block_err(result: &Result<(), Error>) -> bool {
    matches!(result, Err(Error::Import(ImportError::FutureBlock(_))))
}

fn is_pruned_ancestor_err(result: &Result<(), Error>) -> bool {
    matches!(result, Err(Error::Import(ImportError::PrunedAncestor(_))))
}

/// Outcome of writing a processed block to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStatus {
    /// The block extended or replaced the canonical chain.
    Canon,
    /// The block was written but sits on a non-canonical branch.
    Side,
    /// The block was written but its canonical status could not be determined.
    NonStat,
}

/// Owns the canonical head, the bookkeeping store, and every collaborator the insert pipeline
/// needs: the consensus engine, the state executor, and the future-block queue.
pub struct Chain {
    #[allow(dead_code)]
    config: Config,
    kv: Arc<dyn KvStore>,
    engine: Arc<dyn Engine>,
    executor: Arc<dyn StateExecutor>,
    state_factory: Arc<dyn StateDbFactory>,
    events: Arc<EventChannel>,
    pubsub: Option<Arc<dyn PubSub>>,
    future_blocks: future_queue::FutureQueue,
    td_cache: Mutex<LruCache<H256, U256>>,
    current: RwLock<Block>,
    insert_lock: Mutex<()>,
    insert_stopped: AtomicBool,
}

impl Chain {
    /// Opens the chain against `kv`, seeding it with `genesis` if the store is empty.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        genesis: Block,
        config: Config,
        engine: Arc<dyn Engine>,
        kv: Arc<dyn KvStore>,
        executor: Arc<dyn StateExecutor>,
        state_factory: Arc<dyn StateDbFactory>,
        events: Arc<EventChannel>,
        pubsub: Option<Arc<dyn PubSub>>,
    ) -> Result<Arc<Chain>, Error> {
        let current = match kv.get_latest_block() {
            Some(block) => block,
            None => {
                kv.save_blocks(std::slice::from_ref(&genesis))?;
                kv.save_latest_block(&genesis)?;
                kv.write_canonical_hash(genesis.hash(), genesis.number())?;
                kv.write_td(genesis.hash(), genesis.header.difficulty)?;
                genesis
            }
        };

        Ok(Arc::new(Chain {
            future_blocks: future_queue::FutureQueue::new(
                config.max_future_blocks,
                config.max_time_future_blocks(),
            ),
            td_cache: Mutex::new(LruCache::new(4096)),
            current: RwLock::new(current),
            insert_lock: Mutex::new(()),
            insert_stopped: AtomicBool::new(false),
            config,
            kv,
            engine,
            executor,
            state_factory,
            events,
            pubsub,
        }))
    }

    /// The current canonical head block.
    pub fn current_block(&self) -> Block {
        self.current.read().clone()
    }

    /// Looks up a header by hash, confirming it sits at `number`.
    pub fn header(&self, hash: H256, number: U256) -> Option<Header> {
        self.kv
            .header_by_hash(hash)
            .map(|(h, _)| h)
            .filter(|h| h.number == number)
    }

    /// Looks up the canonical header at `number`.
    pub fn header_by_number(&self, number: U256) -> Option<Header> {
        let hash = self.kv.read_canonical_hash(number)?;
        self.kv.header_by_hash(hash).map(|(h, _)| h)
    }

    /// Hash of the canonical block at `number`, if any.
    pub fn canonical_hash(&self, number: U256) -> Option<H256> {
        self.kv.read_canonical_hash(number)
    }

    /// Fetches a full block (header plus body) by hash.
    pub fn get_block(&self, hash: H256) -> Option<Block> {
        let (header, _) = self.kv.header_by_hash(hash)?;
        let transactions = self.kv.body(hash).unwrap_or_default();
        Some(Block {
            header,
            transactions,
        })
    }

    /// Cumulative difficulty recorded for `hash`, consulting the in-memory cache first.
    pub fn td(&self, hash: H256) -> Option<U256> {
        if let Some(td) = self.td_cache.lock().get(&hash) {
            return Some(*td);
        }
        let td = self.kv.read_td(hash)?;
        self.td_cache.lock().put(hash, td);
        Some(td)
    }

    /// `true` if a header is stored for `hash`.
    pub fn has_block(&self, hash: H256) -> bool {
        self.kv.header_by_hash(hash).is_some()
    }

    /// `true` if the block at `hash` has had its post-state computed and persisted, approximated
    /// by the presence of a recorded total difficulty (only ever written once a block's state has
    /// been processed).
    fn has_state(&self, hash: H256) -> bool {
        self.td(hash).is_some()
    }

    /// `true` if both the block and its post-state are available.
    pub fn has_block_and_state(&self, hash: H256) -> bool {
        self.has_block(hash) && self.has_state(hash)
    }

    /// Requests that any in-flight [`insert_chain`](Chain::insert_chain) call stop at the next
    /// block boundary.
    pub fn stop_insert(&self) {
        self.insert_stopped.store(true, Ordering::SeqCst);
    }

    /// Clears a previously requested stop.
    pub fn resume_insert(&self) {
        self.insert_stopped.store(false, Ordering::SeqCst);
    }

    /// `true` if a stop has been requested.
    pub fn insert_stopped(&self) -> bool {
        self.insert_stopped.load(Ordering::SeqCst)
    }

    fn combine_result(&self, block: &Block, consensus: Result<(), Error>) -> Result<(), Error> {
        let consensus = match consensus {
            Err(Error::Import(ImportError::UnknownAncestor(hash)))
                if self.has_block(block.parent_hash()) =>
            {
                Err(ImportError::PrunedAncestor(hash).into())
            }
            other => other,
        };
        if consensus.is_ok() && self.has_block_and_state(block.hash()) {
            return Err(ImportError::KnownBlock(block.hash()).into());
        }
        consensus
    }

    fn pull_next(
        &self,
        blocks: &mut std::vec::IntoIter<Block>,
        results: &Receiver<Result<(), Error>>,
    ) -> Option<(Block, Result<(), Error>)> {
        let block = blocks.next()?;
        let consensus = results.recv().unwrap_or_else(|_| {
            Err(Error::External(
                "header verifier closed before yielding a result".into(),
            ))
        });
        let result = self.combine_result(&block, consensus);
        Some((block, result))
    }

    fn report_bad_block(&self, block: &Block, receipts: &[Receipt], err: &Error) {
        let mut detail = String::new();
        for (i, receipt) in receipts.iter().enumerate() {
            detail.push_str(&format!(
                "\t{}: cumulative_gas={} gas={} contract={:?} status={} tx={:#x} bloom={:?} post_state={:?}\n",
                i,
                receipt.cumulative_gas_used,
                receipt.gas_used,
                receipt.contract_address,
                receipt.status,
                receipt.tx_hash,
                receipt.bloom,
                receipt.post_state,
            ));
        }
        log::error!(
            target: "chain",
            "bad block number={} hash={:#x}\n{}error: {}",
            block.number(),
            block.hash(),
            detail,
            err
        );
    }

    /// Extension seam mirroring the external state-validation contract; a no-op until a host
    /// supplies stateful invariants (e.g. gas-used or bloom cross-checks) beyond what the executor
    /// itself already enforces.
    fn validate_state(&self, _block: &Block, _receipts: &[Receipt], _used_gas: u64) -> Result<(), Error> {
        Ok(())
    }

    fn write_head_block(&self, block: &Block) -> Result<(), Error> {
        self.kv.save_latest_block(block)?;
        self.kv.write_canonical_hash(block.hash(), block.number())?;
        *self.current.write() = block.clone();
        Ok(())
    }

    fn write_block_with_state(self: &Arc<Self>, block: &Block, receipts: &[Receipt]) -> Result<WriteStatus, Error> {
        let parent_td = self.td(block.parent_hash()).unwrap_or_default();
        let external_td = parent_td + block.header.difficulty;
        self.kv.write_td(block.hash(), external_td)?;
        self.td_cache.lock().put(block.hash(), external_td);

        self.kv.save_blocks(std::slice::from_ref(block))?;

        let current = self.current_block();
        let status = if fork_choice::reorg_needed(&current.header, &block.header) {
            if block.parent_hash() != current.hash() {
                let outcome = reorg::reorg(&*self.kv, &current, block, |b| self.write_head_block(b))?;
                log::debug!(
                    target: "chain",
                    "reorg at block {}: added={} deleted={}",
                    block.number(),
                    outcome.added_txs.len(),
                    outcome.deleted_txs.len()
                );
            }
            self.write_head_block(block)?;
            WriteStatus::Canon
        } else {
            WriteStatus::Side
        };

        if !receipts.is_empty() {
            self.kv.store_receipts(block.hash(), receipts)?;
        }
        self.future_blocks.remove(block.hash());

        Ok(status)
    }

    fn write_known_block(self: &Arc<Self>, block: &Block) -> Result<(), Error> {
        let current = self.current_block();
        if block.parent_hash() != current.hash() {
            reorg::reorg(&*self.kv, &current, block, |b| self.write_head_block(b))?;
        }
        self.write_head_block(block)
    }

    /// Imports a contiguous run of blocks. Returns the number of blocks actually consumed from
    /// `blocks` (including those routed to the future-block queue), which can be fewer than
    /// `blocks.len()` if insertion was stopped partway through, or zero on a batch-level error.
    pub fn insert_chain(self: &Arc<Self>, blocks: Vec<Block>) -> Result<usize, Error> {
        if blocks.is_empty() {
            return Ok(0);
        }
        for i in 1..blocks.len() {
            let (prev, block) = (&blocks[i - 1], &blocks[i]);
            if block.number() != prev.number() + U256::one() || block.parent_hash() != prev.hash() {
                return Err(ImportError::NonContiguous(i).into());
            }
        }
        let _guard = self.insert_lock.lock();
        self.insert_chain_locked(blocks)
    }

    fn insert_chain_locked(self: &Arc<Self>, blocks: Vec<Block>) -> Result<usize, Error> {
        if self.insert_stopped() {
            return Ok(0);
        }

        let headers: Vec<Header> = blocks.iter().map(|b| b.header.clone()).collect();
        let reader: Arc<dyn ChainReader> = self.clone();
        let (stop_verify, results) = self.engine.verify_headers(reader, headers);

        let mut iter = blocks.into_iter();
        let mut index = 0usize;
        let mut current = self.pull_next(&mut iter, &results);
        let mut last_canon: Option<Block> = None;

        // Skip blocks we already hold, as long as no reorg is warranted by them.
        loop {
            let should_skip = matches!(&current, Some((_, result)) if is_known_block_err(result));
            if !should_skip {
                break;
            }
            let (block, _) = current.take().expect("matched Some above");
            let head = self.current_block();
            if fork_choice::reorg_needed(&head.header, &block.header)
                && (block.number() > head.number() || self.canonical_hash(block.number()) != Some(block.hash()))
            {
                current = Some((block, Ok(())));
                break;
            }
            log::debug!(target: "chain", "ignoring already known block number={} hash={}", block.number(), block.hash());
            index += 1;
            current = self.pull_next(&mut iter, &results);
        }

        // Any further known blocks are re-imports whose canonical status changed underneath them
        // (a reorg just made them worth re-writing); their state is already computed.
        loop {
            let is_known = matches!(&current, Some((_, result)) if is_known_block_err(result));
            if !is_known {
                break;
            }
            let (block, _) = current.take().expect("matched Some above");
            log::debug!(target: "chain", "writing previously known block number={} hash={}", block.number(), block.hash());
            self.write_known_block(&block)?;
            index += 1;
            last_canon = Some(block);
            current = self.pull_next(&mut iter, &results);
        }

        if let Some((block, result)) = current.take() {
            let pruned = is_pruned_ancestor_err(&result);
            let future_like = is_future_block_err(&result)
                || matches!(&result, Err(Error::Import(ImportError::UnknownAncestor(_))))
                    && self.future_blocks.contains(block.parent_hash());

            if pruned {
                return self.insert_side_chain(block, iter, &results, index);
            } else if future_like {
                self.future_blocks.add(block)?;
                index += 1;
                for remaining in iter {
                    self.future_blocks.add(remaining)?;
                    index += 1;
                }
                let _ = stop_verify.try_send(());
                return Ok(index);
            } else if let Err(err) = result {
                self.future_blocks.remove(block.hash());
                self.report_bad_block(&block, &[], &err);
                let _ = stop_verify.try_send(());
                return Err(err);
            } else {
                current = Some((block, Ok(())));
            }
        }

        while let Some((block, result)) = current {
            if self.insert_stopped() {
                log::debug!(target: "chain", "insertion interrupted between blocks");
                let _ = stop_verify.try_send(());
                return Ok(index);
            }

            match result {
                Ok(()) => {}
                Err(Error::Import(ImportError::FutureBlock(_))) => {
                    self.future_blocks.add(block)?;
                    index += 1;
                    current = self.pull_next(&mut iter, &results);
                    continue;
                }
                Err(err) => {
                    self.future_blocks.remove(block.hash());
                    self.report_bad_block(&block, &[], &err);
                    let _ = stop_verify.try_send(());
                    return Err(err);
                }
            }

            let mut state = self.state_factory.new_state(block.parent_hash())?;
            let (receipts, used_gas) = match self.executor.process(&block, &mut *state) {
                Ok(result) => result,
                Err(err) => {
                    self.report_bad_block(&block, &[], &err);
                    let _ = stop_verify.try_send(());
                    return Err(err);
                }
            };
            if let Err(err) = self.validate_state(&block, &receipts, used_gas) {
                self.report_bad_block(&block, &receipts, &err);
                let _ = stop_verify.try_send(());
                return Err(err);
            }
            state.commit(block.number())?;

            match self.write_block_with_state(&block, &receipts)? {
                WriteStatus::Canon => last_canon = Some(block),
                WriteStatus::Side => {}
                WriteStatus::NonStat => {
                    log::warn!(target: "chain", "inserted block with indeterminate status number={} hash={}", block.number(), block.hash());
                }
            }

            index += 1;
            current = self.pull_next(&mut iter, &results);
        }

        let _ = stop_verify.try_send(());
        if let Some(block) = last_canon {
            self.events.publish(interfaces::Event::ChainHighestBlock {
                hash: block.hash(),
                number: block.number(),
            });
        }
        Ok(index)
    }

    fn insert_side_chain(
        self: &Arc<Self>,
        mut block: Block,
        mut iter: std::vec::IntoIter<Block>,
        results: &Receiver<Result<(), Error>>,
        mut index: usize,
    ) -> Result<usize, Error> {
        let current = self.current_block();
        let mut external_td: Option<U256> = None;
        let mut last_block = block.clone();
        let mut leftover: Option<(Block, Result<(), Error>)> = None;

        loop {
            if current.number() >= block.number() {
                if let Some(canon_hash) = self.canonical_hash(block.number()) {
                    if let Some(canon_header) = self.header(canon_hash, block.number()) {
                        if canon_hash != block.hash() && canon_header.state_root == block.header.state_root {
                            return Err(ImportError::GhostState(block.hash()).into());
                        }
                    }
                }
            }

            let parent_td = external_td.or_else(|| self.td(block.parent_hash())).unwrap_or_default();
            external_td = Some(parent_td + block.header.difficulty);

            if !self.has_block(block.hash()) {
                self.kv.save_blocks(std::slice::from_ref(&block))?;
                log::debug!(target: "chain", "injected sidechain block number={} hash={}", block.number(), block.hash());
            }
            last_block = block.clone();
            index += 1;

            match self.pull_next(&mut iter, results) {
                Some((next_block, result)) if is_pruned_ancestor_err(&result) => {
                    block = next_block;
                }
                Some(other) => {
                    leftover = Some(other);
                    break;
                }
                None => break,
            }
        }

        // A block that turned out not to extend the pruned-ancestor run (or the unconsumed tail
        // of the batch) still needs to go through the ordinary pipeline; it and everything after
        // it are re-verified fresh rather than trusting the now-abandoned results channel.
        let mut resumed = 0usize;
        if let Some((block, _)) = leftover {
            let mut remaining = vec![block];
            remaining.extend(iter);
            resumed = self.insert_chain_locked(remaining)?;
        }

        if !fork_choice::reorg_needed(&current.header, &last_block.header) {
            log::info!(target: "chain", "sidechain written to disk, head remains at {}", current.number());
            return Ok(index + resumed);
        }

        let mut hashes: Vec<H256> = Vec::new();
        let mut reached_state = last_block.number().is_zero();
        let mut cursor = if reached_state {
            None
        } else {
            self.header(last_block.parent_hash(), last_block.number() - U256::one())
        };
        while let Some(header) = cursor.take() {
            if self.has_state(header.hash()) {
                reached_state = true;
                break;
            }
            hashes.push(header.hash());
            if header.number.is_zero() {
                break;
            }
            cursor = self.header(header.parent_hash, header.number - U256::one());
        }
        if !reached_state {
            return Err(Error::External(
                "missing parent while recovering sidechain ancestors".into(),
            ));
        }

        let mut batch: Vec<Block> = Vec::new();
        let mut batch_bytes: usize = 0;
        const MAX_BATCH_BLOCKS: usize = 2048;
        const MAX_BATCH_BYTES: usize = 64 * 1024 * 1024;

        for hash in hashes.into_iter().rev() {
            let block = self
                .get_block(hash)
                .ok_or_else(|| Error::External("sidechain ancestor missing from store".into()))?;
            batch_bytes += block.transactions.iter().map(|t| t.data.len()).sum::<usize>();
            batch.push(block);
            if batch.len() >= MAX_BATCH_BLOCKS || batch_bytes >= MAX_BATCH_BYTES {
                log::info!(target: "chain", "importing sidechain segment of {} blocks", batch.len());
                self.insert_chain_locked(std::mem::take(&mut batch))?;
                batch_bytes = 0;
                if self.insert_stopped() {
                    log::debug!(target: "chain", "insertion interrupted during sidechain recovery");
                    return Ok(index + resumed);
                }
            }
        }
        if !batch.is_empty() {
            log::info!(target: "chain", "importing sidechain segment of {} blocks", batch.len());
            self.insert_chain_locked(batch)?;
        }
        Ok(index + resumed)
    }

    /// Spawns a background thread that drains the future-block queue every two seconds,
    /// re-attempting insertion of any block whose timestamp has since arrived. Returns a sender
    /// that stops the ticker when sent to (or dropped), and its join handle.
    pub fn spawn_future_block_ticker(self: &Arc<Self>) -> (Sender<()>, thread::JoinHandle<()>) {
        let (stop_tx, stop_rx) = crossbeam_channel::bounded(1);
        let chain = Arc::clone(self);
        let handle = thread::spawn(move || loop {
            match stop_rx.recv_timeout(Duration::from_secs(2)) {
                Ok(()) => return,
                Err(crossbeam_channel::RecvTimeoutError::Disconnected) => return,
                Err(crossbeam_channel::RecvTimeoutError::Timeout) => {}
            }
            for candidate in chain.future_blocks.drain_candidates() {
                if candidate.header.time > unix_now() {
                    continue;
                }
                if let Err(err) = chain.insert_chain(vec![candidate]) {
                    log::debug!(target: "chain", "future-block retry failed: {}", err);
                }
            }
        });
        (stop_tx, handle)
    }
}

impl ChainReader for Chain {
    fn header(&self, hash: H256, number: U256) -> Option<Header> {
        Chain::header(self, hash, number)
    }

    fn header_by_number(&self, number: U256) -> Option<Header> {
        Chain::header_by_number(self, number)
    }

    fn canonical_hash(&self, number: U256) -> Option<H256> {
        Chain::canonical_hash(self, number)
    }
}
