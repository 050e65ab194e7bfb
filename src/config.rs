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

//! Configuration for the consensus engine and chain-import pipeline.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Clique engine and chain-import configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Minimum number of seconds between two consecutive blocks.
    pub period: u64,
    /// Number of blocks after which to reset votes and require a checkpoint.
    pub epoch: u64,
    /// Number of blocks between on-disk snapshot checkpoints.
    pub checkpoint_interval: u64,
    /// Number of recently-resolved snapshots kept in the in-memory cache.
    pub in_memory_snapshots: usize,
    /// Number of recently-recovered signer addresses kept in the in-memory cache.
    pub in_memory_signatures: usize,
    /// Maximum number of blocks held in the future-block queue.
    pub max_future_blocks: usize,
    /// Maximum distance into the future, in seconds, that a block may be queued for.
    pub max_time_future_blocks_secs: u64,
    /// Random jitter applied to out-of-turn sealing, in milliseconds.
    pub wiggle_time_ms: u64,
    /// Accumulated-header threshold past which an epoch checkpoint is trusted without a
    /// locatable on-disk snapshot or parent.
    pub full_immutability_threshold: u64,
    /// Upper bound on `gas_limit` accepted by the header validator.
    pub max_gas_limit: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            period: 15,
            epoch: 30_000,
            checkpoint_interval: 1024,
            in_memory_snapshots: 128,
            in_memory_signatures: 4096,
            max_future_blocks: 256,
            max_time_future_blocks_secs: 10,
            wiggle_time_ms: 500,
            full_immutability_threshold: 90_000,
            max_gas_limit: i64::max_value() as u64,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file, falling back to `Default` for any field the file
    /// omits.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Config, Error> {
        let contents =
            fs::read_to_string(path).map_err(|e| Error::External(format!("config read: {}", e)))?;
        toml::from_str(&contents).map_err(|e| Error::External(format!("config parse: {}", e)))
    }

    /// Distance into the future a block's timestamp may be before it is rejected outright.
    pub fn max_time_future_blocks(&self) -> Duration {
        Duration::from_secs(self.max_time_future_blocks_secs)
    }

    /// Maximum out-of-turn sealing jitter.
    pub fn wiggle_time(&self) -> Duration {
        Duration::from_millis(self.wiggle_time_ms)
    }

    /// Window, in blocks, within which a signer may not sign twice.
    pub fn signer_limit(&self, signer_count: usize) -> usize {
        signer_count / 2 + 1
    }
}
