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

//! Protobuf wire types exchanged between sync peers.
//!
//! Generated directly from `proto/sync.proto` by `build.rs`; field tags and the `SyncType`
//! enum values are part of the wire contract and must not be renumbered.

#![allow(missing_docs)]

include!(concat!(env!("OUT_DIR"), "/sync_proto.rs"));

use ethereum_types::U256;

/// Encodes a `U256` as the big-endian byte string the wire messages carry in place of a
/// fixed-width integer field.
pub fn encode_u256(value: &U256) -> Vec<u8> {
    let mut buf = [0u8; 32];
    value.to_big_endian(&mut buf);
    buf.to_vec()
}

/// Decodes a big-endian byte string back into a `U256`.
pub fn decode_u256(bytes: &[u8]) -> U256 {
    U256::from_big_endian(bytes)
}

impl sync_task::Payload {
    /// The `SyncType` a given payload variant is expected to be carried under.
    pub fn sync_type(&self) -> SyncType {
        match self {
            sync_task::Payload::SyncHeaderRequest(_) => SyncType::HeaderReq,
            sync_task::Payload::SyncHeaderResponse(_) => SyncType::HeaderRes,
            sync_task::Payload::SyncBlockRequest(_) => SyncType::BodyReq,
            sync_task::Payload::SyncBlockResponse(_) => SyncType::BodyRes,
            sync_task::Payload::SyncTransactionRequest(_) => SyncType::TransactionReq,
            sync_task::Payload::SyncTransactionResponse(_) => SyncType::TransactionRes,
            sync_task::Payload::SyncPeerInfoBroadcast(_) => SyncType::PeerInfoBroadcast,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn u256_round_trips_through_big_endian_bytes() {
        let value = U256::from(123_456_789u64);
        assert_eq!(decode_u256(&encode_u256(&value)), value);
    }

    #[test]
    fn payload_variant_reports_its_own_sync_type() {
        let payload = sync_task::Payload::SyncPeerInfoBroadcast(SyncPeerInfoBroadcast {
            difficulty: encode_u256(&U256::from(2u64)),
            number: encode_u256(&U256::from(10u64)),
        });
        assert_eq!(payload.sync_type(), SyncType::PeerInfoBroadcast);
    }
}
