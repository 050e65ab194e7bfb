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

//! Reconstructs the canonical chain when fork choice prefers a competing branch: walks both
//! sides back to their common ancestor, rewrites the canonical index, and reports which
//! transactions were added or dropped along the way.

use ethereum_types::{H256, U256};

use crate::chain::interfaces::KvStore;
use crate::error::{Error, ImportError};
use crate::types::Block;

/// Transaction hashes added to and dropped from the canonical chain by a reorg.
#[derive(Debug, Default, Clone)]
pub struct ReorgOutcome {
    /// Transactions newly canonical because their block joined the main chain.
    pub added_txs: Vec<H256>,
    /// Transactions no longer canonical because their block left the main chain.
    pub deleted_txs: Vec<H256>,
}

fn get_block(kv: &dyn KvStore, hash: H256) -> Option<Block> {
    let (header, _) = kv.header_by_hash(hash)?;
    let transactions = kv.body(hash).unwrap_or_default();
    Some(Block {
        header,
        transactions,
    })
}

/// Reorganizes the canonical chain from `old_head` to `new_head`. `write_head` is invoked, in
/// ascending order, for every new-chain block strictly between the common ancestor and
/// `new_head` (the caller writes `new_head` itself once this returns). Returns the set of
/// transactions that entered and left canonical status.
pub fn reorg(
    kv: &dyn KvStore,
    old_head: &Block,
    new_head: &Block,
    mut write_head: impl FnMut(&Block) -> Result<(), Error>,
) -> Result<ReorgOutcome, Error> {
    let mut old_chain: Vec<Block> = Vec::new();
    let mut new_chain: Vec<Block> = Vec::new();
    let mut deleted_txs: Vec<H256> = Vec::new();

    let mut old_block = Some(old_head.clone());
    let mut new_block = Some(new_head.clone());

    if old_head.number() > new_head.number() {
        while let Some(ob) = &old_block {
            if ob.number() == new_head.number() {
                break;
            }
            deleted_txs.extend(ob.transactions.iter().map(|t| t.hash));
            let parent = ob.parent_hash();
            old_chain.push(ob.clone());
            old_block = get_block(kv, parent);
        }
    } else if new_head.number() > old_head.number() {
        while let Some(nb) = &new_block {
            if nb.number() == old_head.number() {
                break;
            }
            let parent = nb.parent_hash();
            new_chain.push(nb.clone());
            new_block = get_block(kv, parent);
        }
    }

    let common_block = loop {
        let ob = old_block.clone().ok_or(ImportError::InvalidReorgChain { which: "old" })?;
        let nb = new_block.clone().ok_or(ImportError::InvalidReorgChain { which: "new" })?;
        if ob.hash() == nb.hash() {
            break ob;
        }
        deleted_txs.extend(ob.transactions.iter().map(|t| t.hash));
        old_chain.push(ob.clone());
        new_chain.push(nb.clone());
        old_block = get_block(kv, ob.parent_hash());
        new_block = get_block(kv, nb.parent_hash());
    };

    if !old_chain.is_empty() && !new_chain.is_empty() {
        let msg = if old_chain.len() > 63 {
            "large chain reorg detected"
        } else {
            "chain reorg detected"
        };
        let log_fn: fn(&str) = if old_chain.len() > 63 {
            |m| log::warn!(target: "reorg", "{}", m)
        } else {
            |m| log::info!(target: "reorg", "{}", m)
        };
        log_fn(&format!(
            "{}: common={} drop={} add={}",
            msg,
            common_block.number(),
            old_chain.len(),
            new_chain.len()
        ));
    } else if !new_chain.is_empty() {
        log::info!(target: "reorg", "chain extended by {} blocks from {}", new_chain.len(), new_chain[new_chain.len() - 1].number());
    } else if !old_chain.is_empty() {
        log::error!(target: "reorg", "impossible reorg: old chain non-empty but new chain empty at common={}", common_block.number());
    }

    let mut added_txs: Vec<H256> = Vec::new();
    for idx in (1..new_chain.len()).rev() {
        let block = &new_chain[idx];
        write_head(block)?;
        added_txs.extend(block.transactions.iter().map(|t| t.hash));
    }

    for tx in &deleted_txs {
        if !added_txs.contains(tx) {
            kv.delete_transaction_index(*tx)?;
        }
    }

    let start = if new_chain.len() > 1 {
        new_chain[1].number()
    } else {
        common_block.number()
    } + U256::one();
    let mut number = start;
    loop {
        if kv.read_canonical_hash(number).is_none() {
            break;
        }
        kv.delete_canonical_hash(number)?;
        number += U256::one();
    }

    Ok(ReorgOutcome {
        added_txs,
        deleted_txs,
    })
}
