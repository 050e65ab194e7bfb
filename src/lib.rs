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

#![warn(missing_docs)]

//! Chain-import pipeline and Clique-style proof-of-authority consensus engine.

pub mod chain;
pub mod config;
pub mod engine;
pub mod error;
pub mod miner;
pub mod types;
pub mod wire;

pub use chain::Chain;
pub use config::Config;
pub use engine::clique::Clique;
pub use error::Error;
pub use miner::Miner;
