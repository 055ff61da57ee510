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

//! Server types: the pool configuration record, the share event record and
//! the error type wrapping underlying module errors.

use std::collections::{BTreeMap, HashMap};
use std::convert::From;
use std::io;

use crate::core::core::block;
use crate::core::pow;
use crate::p2p;
use crate::rpc;
use crate::util;

/// Error type wrapping underlying module errors.
#[derive(Debug)]
pub enum Error {
	/// Error originating from job/template handling.
	Core(block::Error),
	/// Error originating from the proof-of-work layer.
	Pow(pow::Error),
	/// Error originating from daemon RPC calls.
	Rpc(rpc::Error),
	/// Error originating from the peer-to-peer client.
	P2P(p2p::Error),
	/// Error originating from some I/O operation.
	IOError(io::Error),
	/// Invalid or inconsistent configuration, fatal at startup.
	Configuration(String),
	/// TLS material could not be loaded.
	Tls(String),
}

impl From<block::Error> for Error {
	fn from(e: block::Error) -> Error {
		Error::Core(e)
	}
}

impl From<pow::Error> for Error {
	fn from(e: pow::Error) -> Error {
		Error::Pow(e)
	}
}

impl From<rpc::Error> for Error {
	fn from(e: rpc::Error) -> Error {
		Error::Rpc(e)
	}
}

impl From<p2p::Error> for Error {
	fn from(e: p2p::Error) -> Error {
		Error::P2P(e)
	}
}

impl From<io::Error> for Error {
	fn from(e: io::Error) -> Error {
		Error::IOError(e)
	}
}

/// Equihash parameter block from the coin definition.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct AlgorithmParameters {
	/// Equihash N.
	#[serde(default)]
	pub n: Option<u32>,
	/// Equihash K.
	#[serde(default)]
	pub k: Option<u32>,
	/// blake2b personalization prefix.
	#[serde(default)]
	pub personalization: Option<String>,
}

/// The coin this pool serves.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CoinConfig {
	/// Display name.
	pub name: String,
	/// Ticker symbol.
	pub symbol: String,
	/// Proof-of-work algorithm, one of "equihash" or "verushash".
	pub algorithm: String,
	/// Network magic for the P2P wire, 8 hex chars.
	pub peer_magic: String,
	/// Testnet network magic.
	#[serde(default)]
	pub peer_magic_testnet: Option<String>,
	/// Algorithm parameters.
	#[serde(default)]
	pub parameters: AlgorithmParameters,
}

impl CoinConfig {
	/// Magic bytes for the given network.
	pub fn magic(&self, testnet: bool) -> Option<[u8; 4]> {
		let hex = if testnet {
			self.peer_magic_testnet.as_ref().unwrap_or(&self.peer_magic)
		} else {
			&self.peer_magic
		};
		let bytes = util::from_hex(hex.clone()).ok()?;
		if bytes.len() != 4 {
			return None;
		}
		let mut magic = [0u8; 4];
		magic.copy_from_slice(&bytes);
		Some(magic)
	}
}

/// Per-client difficulty retargeting options for one stratum port.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VarDiffConfig {
	/// Lowest difficulty the controller will assign.
	pub min_diff: f64,
	/// Highest difficulty the controller will assign.
	pub max_diff: f64,
	/// Desired seconds between shares.
	pub target_time: u64,
	/// Seconds between retarget considerations.
	pub retarget_time: u64,
	/// Allowed deviation around target_time, in percent.
	pub variance_percent: f64,
	/// Restrict adjustments to doubling/halving.
	#[serde(default)]
	pub x2_mode: bool,
}

/// One stratum listening port.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PortConfig {
	/// Starting difficulty for clients on this port.
	pub diff: f64,
	/// Whether this port speaks TLS.
	#[serde(default)]
	pub tls: bool,
	/// Variable difficulty; fixed difficulty when absent.
	#[serde(default)]
	pub var_diff: Option<VarDiffConfig>,
}

/// Client banning policy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BanningConfig {
	/// Whether dynamic banning is on.
	pub enabled: bool,
	/// Ban duration in seconds.
	pub time: u64,
	/// Percentage of invalid shares that triggers a ban.
	pub invalid_percent: f64,
	/// Shares in a window before the ban check runs.
	pub check_threshold: u64,
	/// Seconds between purges of expired bans.
	pub purge_interval: u64,
	/// Statically banned addresses.
	#[serde(default)]
	pub banned: Vec<String>,
}

impl Default for BanningConfig {
	fn default() -> BanningConfig {
		BanningConfig {
			enabled: true,
			time: 600,
			invalid_percent: 50.0,
			check_threshold: 500,
			purge_interval: 300,
			banned: vec![],
		}
	}
}

/// TLS material for stratum ports marked `tls`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TlsConfig {
	/// Whether any TLS port may be opened.
	pub enabled: bool,
	/// PEM file with the server private key.
	pub server_key: String,
	/// PEM file with the server certificate chain.
	pub server_cert: String,
}

fn default_connection_timeout() -> u64 {
	600
}

fn default_job_rebroadcast_timeout() -> u64 {
	55
}

/// Full configuration of one pool worker process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
	/// Pool address receiving the block reward remainder.
	pub address: String,
	/// Seconds of client silence tolerated before the socket is destroyed
	/// at the next broadcast.
	#[serde(default = "default_connection_timeout")]
	pub connection_timeout: u64,
	/// Seconds without a fresh job before a template refresh is requested.
	#[serde(default = "default_job_rebroadcast_timeout")]
	pub job_rebroadcast_timeout: u64,
	/// Milliseconds between template polls; 0 disables polling.
	#[serde(default)]
	pub block_refresh_interval: u64,
	/// Credit shares for jobs no longer in the live set.
	#[serde(default)]
	pub accept_old_job_shares: bool,
	/// Credit shares below the assigned difficulty.
	#[serde(default)]
	pub accept_low_diff_shares: bool,
	/// Include block hashes of invalid blocks in share events.
	#[serde(default)]
	pub emit_invalid_block_hashes: bool,
	/// Identifier of this pool, prefixed to subscription ids.
	#[serde(default)]
	pub pool_id: u32,
	/// 5-bit instance id seeding the extranonce counter. Random when
	/// unset; operators running several worker processes must assign
	/// distinct values.
	#[serde(default)]
	pub instance_id: Option<u8>,
	/// The coin being mined.
	pub coin: CoinConfig,
	/// Addresses taking a percentage of each coinbase.
	#[serde(default)]
	pub reward_recipients: HashMap<String, f64>,
	/// Stratum listening ports, keyed by port number. Keys are strings
	/// because that is all TOML tables can carry.
	pub ports: BTreeMap<String, PortConfig>,
	/// Backing daemons; the first is the primary.
	pub daemons: Vec<rpc::DaemonConfig>,
	/// P2P block notification client.
	#[serde(default)]
	pub p2p: p2p::P2PConfig,
	/// Banning policy.
	#[serde(default)]
	pub banning: BanningConfig,
	/// TLS options, required when any port sets `tls`.
	#[serde(default)]
	pub tls_options: Option<TlsConfig>,
}

impl PoolConfig {
	/// The ports table with its keys parsed into actual port numbers.
	/// `validate` guarantees this cannot lose entries.
	pub fn port_map(&self) -> BTreeMap<u16, PortConfig> {
		self.ports
			.iter()
			.filter_map(|(port, pc)| port.parse().ok().map(|p| (p, pc.clone())))
			.collect()
	}

	/// Semantic validation beyond what serde enforces. Each failure here
	/// is fatal at startup.
	pub fn validate(&self) -> Result<(), Error> {
		if self.daemons.is_empty() {
			return Err(Error::Configuration("no daemons configured".to_string()));
		}
		if self.ports.is_empty() {
			return Err(Error::Configuration(
				"no stratum ports configured".to_string(),
			));
		}
		for port in self.ports.keys() {
			if port.parse::<u16>().is_err() {
				return Err(Error::Configuration(format!(
					"stratum port {} is not a port number",
					port
				)));
			}
		}
		if self.coin.magic(false).is_none() {
			return Err(Error::Configuration(format!(
				"coin.peer_magic is not 4 bytes of hex: {}",
				self.coin.peer_magic
			)));
		}
		if let Some(id) = self.instance_id {
			if id > 31 {
				return Err(Error::Configuration(format!(
					"instance_id must fit 5 bits, got {}",
					id
				)));
			}
		}
		let tls_wanted = self.ports.values().any(|p| p.tls);
		match self.tls_options {
			Some(ref tls) if tls.enabled => {}
			_ if tls_wanted => {
				return Err(Error::Configuration(
					"a port requests tls but tls_options is not enabled".to_string(),
				));
			}
			_ => {}
		}
		let percent: f64 = self.reward_recipients.values().sum();
		if percent >= 100.0 {
			return Err(Error::Configuration(format!(
				"reward recipients take {}% leaving nothing for the pool",
				percent
			)));
		}
		for port in self.ports.values() {
			if let Some(ref vd) = port.var_diff {
				if vd.min_diff <= 0.0 || vd.max_diff < vd.min_diff || vd.target_time == 0 {
					return Err(Error::Configuration(
						"invalid var_diff bounds".to_string(),
					));
				}
			}
		}
		Ok(())
	}
}

/// The record emitted for every processed share, valid or not. Downstream
/// collectors (payment tracking, stats) consume these and never see
/// partial state.
#[derive(Debug, Clone, Serialize)]
pub struct ShareEvent {
	/// Fully qualified worker name.
	pub worker: String,
	/// Client address.
	pub ip: String,
	/// Local port the share arrived on.
	pub port: u16,
	/// Height of the job the share was for.
	pub height: u64,
	/// Coinbase value of the job, base units.
	pub block_reward: u64,
	/// Difficulty the client was targeting.
	pub difficulty: f64,
	/// Actual difficulty of the submitted share.
	pub share_difficulty: f64,
	/// Network difficulty of the job.
	pub block_difficulty: f64,
	/// Whether the share was credited.
	pub is_valid_share: bool,
	/// Whether the share solved a block.
	pub is_valid_block: bool,
	/// The share met only the merged-mining target.
	pub block_only_merged: bool,
	/// Solved block hash, display hex.
	pub block_hash: Option<String>,
	/// Coinbase transaction id once the block was confirmed on the daemon.
	pub tx_hash: Option<String>,
	/// Stratum error tuple when the share was rejected, and submission
	/// errors for blocks.
	pub error: Option<(i32, String)>,
}
