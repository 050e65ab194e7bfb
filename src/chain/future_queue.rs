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

//! A bounded LRU holding blocks whose parent or timestamp isn't valid yet, drained periodically
//! back through the insert pipeline.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use ethereum_types::H256;
use lru::LruCache;
use parking_lot::Mutex;

use crate::error::{Error, ImportError};
use crate::types::Block;

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Bounded queue of blocks awaiting a parent or timestamp that hasn't arrived yet.
pub struct FutureQueue {
    blocks: Mutex<LruCache<H256, Block>>,
    max_time_future: Duration,
}

impl FutureQueue {
    /// Creates an empty queue with the configured capacity and future-timestamp tolerance.
    pub fn new(capacity: usize, max_time_future: Duration) -> Self {
        FutureQueue {
            blocks: Mutex::new(LruCache::new(capacity.max(1))),
            max_time_future,
        }
    }

    /// Queues `block` unless its timestamp is too far ahead, or its difficulty is zero (a
    /// post-merge, non-PoA block, which must never be retried through this queue).
    pub fn add(&self, block: Block) -> Result<(), Error> {
        let max = unix_now() + self.max_time_future.as_secs();
        if block.header.time > max {
            return Err(ImportError::FutureBlock(block.hash()).into());
        }
        if block.header.difficulty.is_zero() {
            return Ok(());
        }
        self.blocks.lock().put(block.hash(), block);
        Ok(())
    }

    /// Removes `hash` from the queue, if present.
    pub fn remove(&self, hash: H256) {
        self.blocks.lock().pop(&hash);
    }

    /// `true` if `hash` is currently queued.
    pub fn contains(&self, hash: H256) -> bool {
        self.blocks.lock().contains(&hash)
    }

    /// Snapshots every queued block, sorted ascending by `(number, hash)`. Does not remove them;
    /// callers remove blocks individually once actually inserted.
    pub fn drain_candidates(&self) -> Vec<Block> {
        let queue = self.blocks.lock();
        let mut blocks: Vec<Block> = queue.iter().map(|(_, b)| b.clone()).collect();
        blocks.sort_by(|a, b| (a.number(), a.hash()).cmp(&(b.number(), b.hash())));
        blocks
    }

    /// Number of blocks currently queued.
    pub fn len(&self) -> usize {
        self.blocks.lock().len()
    }

    /// `true` if the queue holds no blocks.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::header::{DIFF_IN_TURN, EXTRA_SEAL, EXTRA_VANITY, NONCE_DROP_VOTE};
    use crate::types::Header;
    use ethereum_types::{Address, U256};

    fn block_at(number: u64, time: u64) -> Block {
        Block {
            header: Header {
                parent_hash: H256::zero(),
                number: U256::from(number),
                coinbase: Address::zero(),
                state_root: H256::zero(),
                tx_root: H256::zero(),
                receipts_root: H256::zero(),
                difficulty: U256::from(DIFF_IN_TURN),
                gas_limit: 8_000_000,
                gas_used: 0,
                time,
                nonce: NONCE_DROP_VOTE,
                mix_digest: H256::zero(),
                extra: vec![0u8; EXTRA_VANITY + EXTRA_SEAL],
            },
            transactions: Vec::new(),
        }
    }

    #[test]
    fn rejects_blocks_too_far_in_the_future() {
        let queue = FutureQueue::new(256, Duration::from_secs(10));
        let far = block_at(1, unix_now() + 3_600);
        let err = queue.add(far).unwrap_err();
        assert!(matches!(err, Error::Import(ImportError::FutureBlock(_))));
    }

    #[test]
    fn silently_drops_zero_difficulty_blocks() {
        let queue = FutureQueue::new(256, Duration::from_secs(10));
        let mut block = block_at(1, unix_now());
        block.header.difficulty = U256::zero();
        let hash = block.hash();
        queue.add(block).unwrap();
        assert!(!queue.contains(hash));
    }

    #[test]
    fn drain_is_sorted_ascending_by_number() {
        let queue = FutureQueue::new(256, Duration::from_secs(10));
        queue.add(block_at(3, unix_now())).unwrap();
        queue.add(block_at(1, unix_now())).unwrap();
        queue.add(block_at(2, unix_now())).unwrap();
        let drained = queue.drain_candidates();
        let numbers: Vec<U256> = drained.iter().map(|b| b.number()).collect();
        assert_eq!(numbers, vec![U256::from(1), U256::from(2), U256::from(3)]);
    }
}
