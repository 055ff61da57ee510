// Copyright 2021 The Equipool Developers
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Peer client configuration, events and errors.

use failure::Fail;
use std::io;

use crate::core::core::hash::Hash;
use crate::core::ser;

/// P2P client errors.
#[derive(Debug, Fail)]
pub enum Error {
	/// The peer actively refused the connection. Not retried.
	#[fail(display = "peer connection refused: {}", _0)]
	ConnectionRefused(String),
	/// Any other socket problem.
	#[fail(display = "peer connection: {}", _0)]
	Connection(io::Error),
	/// A message arrived whose checksum did not cover its payload.
	#[fail(display = "bad message checksum for command {}", _0)]
	BadChecksum(String),
	/// A payload advertised an unreasonable length.
	#[fail(display = "oversized message payload: {} bytes", _0)]
	Oversized(u32),
	/// Payload (de)serialization failed.
	#[fail(display = "message serialization: {}", _0)]
	Ser(ser::Error),
}

impl From<io::Error> for Error {
	fn from(e: io::Error) -> Error {
		Error::Connection(e)
	}
}

impl From<ser::Error> for Error {
	fn from(e: ser::Error) -> Error {
		Error::Ser(e)
	}
}

/// P2P client configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct P2PConfig {
	/// Whether to run the peer client at all.
	#[serde(default)]
	pub enabled: bool,
	/// Peer host, usually the daemon itself.
	pub host: String,
	/// The coin's P2P port.
	pub port: u16,
	/// Suppress transaction_received events, blocks only.
	#[serde(default)]
	pub disable_transactions: bool,
}

impl Default for P2PConfig {
	fn default() -> P2PConfig {
		P2PConfig {
			enabled: false,
			host: "127.0.0.1".to_string(),
			port: 0,
			disable_transactions: true,
		}
	}
}

/// Implemented by whoever wants to hear what the peer observes on the
/// gossip network. All callbacks fire on the peer's own thread.
pub trait PeerAdapter: Send + Sync {
	/// A block hash was announced.
	fn block_found(&self, hash: Hash);
	/// A transaction hash was announced.
	fn transaction_received(&self, hash: Hash);
	/// The connection could not be established and will not be retried.
	fn connection_failed(&self, error: &Error);
}
