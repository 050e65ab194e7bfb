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

//! Per-transaction execution results.

use ethereum_types::{Address, Bloom, H256};

/// Outcome of executing a single transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    /// Hash of the transaction this receipt belongs to.
    pub tx_hash: H256,
    /// Cumulative gas used by the block up to and including this transaction.
    pub cumulative_gas_used: u64,
    /// Gas used by this transaction alone.
    pub gas_used: u64,
    /// Address of the contract created by this transaction, if any.
    pub contract_address: Option<Address>,
    /// `true` if the transaction succeeded.
    pub status: bool,
    /// Bloom filter over this transaction's logs.
    pub bloom: Bloom,
    /// Intermediate state root after this transaction, when the chain uses root-carrying
    /// receipts rather than a status byte.
    pub post_state: Option<H256>,
}
