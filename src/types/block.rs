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

//! Blocks: a header plus its ordered transaction list.

use ethereum_types::H256;

use super::header::Header;

/// A transaction as seen by the chain-import pipeline. Transaction pool management, signature
/// verification and execution semantics live outside this crate; only the hash is needed to
/// maintain the tx-by-hash index across reorgs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    /// Opaque transaction hash.
    pub hash: H256,
    /// RLP-encoded transaction payload, opaque to this crate.
    pub data: Vec<u8>,
}

impl Transaction {
    /// Hash identifying this transaction.
    pub fn hash(&self) -> H256 {
        self.hash
    }
}

/// A full block: header plus transactions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    /// Block header.
    pub header: Header,
    /// Ordered transaction list.
    pub transactions: Vec<Transaction>,
}

impl Block {
    /// Block hash, delegating to the header.
    pub fn hash(&self) -> H256 {
        self.header.hash()
    }

    /// Parent block hash.
    pub fn parent_hash(&self) -> H256 {
        self.header.parent_hash
    }

    /// Block height.
    pub fn number(&self) -> super::BlockNumber {
        self.header.number
    }
}
