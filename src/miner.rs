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

//! Cooperative sealer: assembles and seals a new block whenever both `can_start` (gated by the
//! downloader) and `should_start` (gated by a configured coinbase) hold, cancelling any in-flight
//! attempt before starting another.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use crossbeam_channel::{select, Receiver, Sender};
use ethereum_types::Address;

use crate::chain::interfaces::{BlockAssembler, ChainReader, Event, StateDbFactory, StateExecutor};
use crate::chain::Chain;
use crate::engine::{Engine, Seal, SealingState};
use crate::types::header::{EXTRA_SEAL, EXTRA_VANITY, NONCE_DROP_VOTE};
use crate::types::{Block, Header};

enum Control {
    DownloaderFinished,
    DownloaderStarted,
    SetCoinbase(Address),
    Stop,
    Shutdown,
}

/// Drives the cooperative sealing loop on a background thread.
pub struct Miner {
    control: Sender<Control>,
    running: Arc<AtomicBool>,
    thread: Option<thread::JoinHandle<()>>,
}

impl Miner {
    /// Spawns the miner's control loop. `head_events` should be obtained from
    /// [`crate::chain::interfaces::EventChannel::subscribe`] on the same bus the chain publishes
    /// to.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        chain: Arc<Chain>,
        engine: Arc<dyn Engine>,
        assembler: Arc<dyn BlockAssembler>,
        executor: Arc<dyn StateExecutor>,
        state_factory: Arc<dyn StateDbFactory>,
        head_events: Receiver<Event>,
    ) -> Self {
        let (control_tx, control_rx) = crossbeam_channel::unbounded();
        let running = Arc::new(AtomicBool::new(false));
        let running_for_loop = Arc::clone(&running);
        let thread = thread::spawn(move || {
            run_loop(
                chain,
                engine,
                assembler,
                executor,
                state_factory,
                head_events,
                control_rx,
                running_for_loop,
            )
        });
        Miner {
            control: control_tx,
            running,
            thread: Some(thread),
        }
    }

    /// `true` if a sealing attempt is currently in flight.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// The downloader finished a sync session; the worker may start once a coinbase is set.
    pub fn downloader_finished(&self) {
        let _ = self.control.send(Control::DownloaderFinished);
    }

    /// The downloader began a sync session; any in-flight sealing attempt is cancelled.
    pub fn downloader_started(&self) {
        let _ = self.control.send(Control::DownloaderStarted);
    }

    /// Registers the local coinbase, allowing the worker to start once the downloader permits it.
    pub fn set_coinbase(&self, addr: Address) {
        let _ = self.control.send(Control::SetCoinbase(addr));
    }

    /// Operator-requested stop; cancels any in-flight sealing attempt.
    pub fn stop(&self) {
        let _ = self.control.send(Control::Stop);
    }
}

impl Drop for Miner {
    fn drop(&mut self) {
        let _ = self.control.send(Control::Shutdown);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn run_loop(
    chain: Arc<Chain>,
    engine: Arc<dyn Engine>,
    assembler: Arc<dyn BlockAssembler>,
    executor: Arc<dyn StateExecutor>,
    state_factory: Arc<dyn StateDbFactory>,
    head_events: Receiver<Event>,
    control: Receiver<Control>,
    running: Arc<AtomicBool>,
) {
    let mut can_start = false;
    let mut should_start = false;
    let mut in_flight: Option<Sender<()>> = None;

    loop {
        select! {
            recv(control) -> msg => match msg {
                Ok(Control::DownloaderFinished) => {
                    can_start = true;
                    if should_start && in_flight.is_none() {
                        in_flight = try_seal(&chain, &engine, &assembler, &executor, &state_factory, &running);
                    }
                }
                Ok(Control::DownloaderStarted) => {
                    can_start = false;
                    cancel(&mut in_flight);
                }
                Ok(Control::SetCoinbase(_)) => {
                    should_start = true;
                    if can_start && in_flight.is_none() {
                        in_flight = try_seal(&chain, &engine, &assembler, &executor, &state_factory, &running);
                    }
                }
                Ok(Control::Stop) => {
                    should_start = false;
                    cancel(&mut in_flight);
                }
                Ok(Control::Shutdown) | Err(_) => {
                    cancel(&mut in_flight);
                    return;
                }
            },
            recv(head_events) -> msg => {
                if let Ok(Event::ChainHighestBlock { .. }) = msg {
                    if can_start && should_start {
                        cancel(&mut in_flight);
                        in_flight = try_seal(&chain, &engine, &assembler, &executor, &state_factory, &running);
                    }
                }
            }
        }
    }
}

fn cancel(in_flight: &mut Option<Sender<()>>) {
    if let Some(stop) = in_flight.take() {
        let _ = stop.try_send(());
    }
}

fn blank_header(parent: &Header) -> Header {
    Header {
        parent_hash: parent.hash(),
        number: parent.number + ethereum_types::U256::one(),
        coinbase: Address::zero(),
        state_root: Default::default(),
        tx_root: Default::default(),
        receipts_root: Default::default(),
        difficulty: Default::default(),
        gas_limit: parent.gas_limit,
        gas_used: 0,
        time: 0,
        nonce: NONCE_DROP_VOTE,
        mix_digest: Default::default(),
        extra: vec![0u8; EXTRA_VANITY + EXTRA_SEAL],
    }
}

fn tx_trie_root(block: &Block) -> ethereum_types::H256 {
    let hashes: Vec<ethereum_types::H256> = block.transactions.iter().map(|t| t.hash).collect();
    keccak_hash::keccak(rlp::encode_list(&hashes))
}

fn receipts_trie_root(receipts: &[crate::types::Receipt]) -> ethereum_types::H256 {
    let hashes: Vec<ethereum_types::H256> = receipts.iter().map(|r| r.tx_hash).collect();
    keccak_hash::keccak(rlp::encode_list(&hashes))
}

#[allow(clippy::too_many_arguments)]
fn try_seal(
    chain: &Arc<Chain>,
    engine: &Arc<dyn Engine>,
    assembler: &Arc<dyn BlockAssembler>,
    executor: &Arc<dyn StateExecutor>,
    state_factory: &Arc<dyn StateDbFactory>,
    running: &Arc<AtomicBool>,
) -> Option<Sender<()>> {
    let parent = chain.current_block().header;
    let reader: Arc<dyn ChainReader> = Arc::clone(chain);

    if engine.sealing_state(&*reader, &parent) != SealingState::Ready {
        return None;
    }

    let mut header = blank_header(&parent);
    if let Err(err) = engine.prepare(&*reader, &mut header) {
        log::debug!(target: "miner", "skipping attempt: prepare failed: {}", err);
        return None;
    }

    let transactions = match assembler.assemble(&parent) {
        Ok(txs) => txs,
        Err(err) => {
            log::debug!(target: "miner", "skipping attempt: block assembly failed: {}", err);
            return None;
        }
    };
    let candidate = Block { header, transactions };
    let tx_root = tx_trie_root(&candidate);

    let mut state = match state_factory.new_state(candidate.parent_hash()) {
        Ok(state) => state,
        Err(err) => {
            log::debug!(target: "miner", "skipping attempt: state open failed: {}", err);
            return None;
        }
    };
    let (receipts, used_gas) = match executor.process(&candidate, &mut *state) {
        Ok(result) => result,
        Err(err) => {
            log::debug!(target: "miner", "skipping attempt: execution failed: {}", err);
            return None;
        }
    };
    let state_root = match state.commit(candidate.number()) {
        Ok(root) => root,
        Err(err) => {
            log::debug!(target: "miner", "skipping attempt: state commit failed: {}", err);
            return None;
        }
    };

    let mut header = candidate.header;
    header.tx_root = tx_root;
    header.receipts_root = receipts_trie_root(&receipts);
    header.gas_used = used_gas;
    engine.finalize(&mut header, state_root);

    let block = Block {
        header,
        transactions: candidate.transactions,
    };

    let (stop_tx, stop_rx) = crossbeam_channel::bounded(1);
    let (results_tx, results_rx) = crossbeam_channel::bounded(1);
    if let Err(err) = engine.seal(&*reader, block, results_tx, stop_rx) {
        log::debug!(target: "miner", "seal rejected: {}", err);
        return None;
    }

    running.store(true, Ordering::SeqCst);
    let chain = Arc::clone(chain);
    let running = Arc::clone(running);
    thread::spawn(move || {
        if let Ok(Seal::Regular(sealed)) = results_rx.recv() {
            if let Err(err) = chain.insert_chain(vec![sealed]) {
                log::warn!(target: "miner", "failed to insert sealed block: {}", err);
            }
        }
        running.store(false, Ordering::SeqCst);
    });

    Some(stop_tx)
}
