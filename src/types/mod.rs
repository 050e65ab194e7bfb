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

//! Core data model: headers, blocks, receipts and consensus snapshots.

pub mod block;
pub mod header;
pub mod receipt;
pub mod snapshot;

pub use block::Block;
pub use header::Header;
pub use receipt::Receipt;
pub use snapshot::Snapshot;

/// Block height. The reference implementation this crate is ported from carries block numbers
/// as 256-bit integers throughout; we keep that width rather than narrowing to `u64` so that
/// RLP-encoded headers round-trip byte-for-byte with peers running the original client.
pub type BlockNumber = ethereum_types::U256;
