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

//! Typed views over the daemon RPC responses the pool consumes. Only the
//! fields the pool actually reads are declared; everything else in the
//! daemon's JSON is ignored.

use serde_json::Value;

use crate::client::Error;

/// Deserializes an RPC `result` into a typed response.
pub fn result_to<T: serde::de::DeserializeOwned>(value: Value) -> Result<T, Error> {
	serde_json::from_value(value).map_err(|e| Error::ParseError(format!("{}", e)))
}

/// `getinfo` response.
#[derive(Debug, Clone, Deserialize)]
pub struct GetInfo {
	/// Daemon protocol version.
	#[serde(default)]
	pub protocolversion: u32,
	/// Current chain height.
	#[serde(default)]
	pub blocks: u64,
	/// Whether the daemon runs on testnet.
	#[serde(default)]
	pub testnet: bool,
	/// Network difficulty as the daemon reports it.
	#[serde(default)]
	pub difficulty: f64,
	/// Connected peer count.
	#[serde(default)]
	pub connections: u32,
}

/// `validateaddress` response.
#[derive(Debug, Clone, Deserialize)]
pub struct ValidateAddress {
	/// Whether the address parses for this chain.
	pub isvalid: bool,
	/// Normalized address.
	#[serde(default)]
	pub address: Option<String>,
	/// Locking script for the address, hex.
	#[serde(default, rename = "scriptPubKey")]
	pub script_pub_key: Option<String>,
	/// Whether the daemon wallet owns the address.
	#[serde(default)]
	pub ismine: Option<bool>,
	/// Public key behind the address, when the wallet owns it. Required
	/// for POS coins.
	#[serde(default)]
	pub pubkey: Option<String>,
}

/// `getmininginfo` response.
#[derive(Debug, Clone, Deserialize)]
pub struct GetMiningInfo {
	/// Current chain height.
	#[serde(default)]
	pub blocks: u64,
	/// Network difficulty.
	#[serde(default)]
	pub difficulty: f64,
	/// Network solutions per second, when reported.
	#[serde(default, alias = "networkhashps")]
	pub networksolps: Option<f64>,
}

/// `getblock` response, used to confirm block acceptance after submission.
#[derive(Debug, Clone, Deserialize)]
pub struct GetBlock {
	/// Block hash, display hex.
	pub hash: String,
	/// Confirmation count. Negative means the block was orphaned.
	pub confirmations: i64,
	/// Block height.
	#[serde(default)]
	pub height: u64,
	/// Transaction ids, coinbase first.
	#[serde(default)]
	pub tx: Vec<String>,
}

/// `getblocksubsidy` response.
#[derive(Debug, Clone, Deserialize)]
pub struct GetBlockSubsidy {
	/// Miner subsidy in coins.
	#[serde(default)]
	pub miner: f64,
}

/// `getpeerinfo` entry, used to estimate sync progress.
#[derive(Debug, Clone, Deserialize)]
pub struct PeerInfo {
	/// Peer address.
	pub addr: String,
	/// Peer protocol version.
	#[serde(default)]
	pub version: u32,
	/// Height the peer reported when it connected.
	#[serde(default)]
	pub startingheight: Option<u64>,
}

#[cfg(test)]
mod test {
	use super::*;
	use serde_json::json;

	#[test]
	fn validate_address_with_script() {
		let v: ValidateAddress = result_to(json!({
			"isvalid": true,
			"address": "t1abc",
			"scriptPubKey": "76a914aa88ac",
			"ismine": false
		}))
		.unwrap();
		assert!(v.isvalid);
		assert_eq!(v.script_pub_key.as_deref(), Some("76a914aa88ac"));
		assert_eq!(v.pubkey, None);
	}

	#[test]
	fn getblock_orphan_has_negative_confirmations() {
		let v: GetBlock = result_to(json!({
			"hash": "00ff",
			"confirmations": -1,
			"height": 10,
			"tx": ["aa", "bb"]
		}))
		.unwrap();
		assert!(v.confirmations < 0);
		assert_eq!(v.tx[0], "aa");
	}

	#[test]
	fn mininginfo_accepts_hashps_alias() {
		let v: GetMiningInfo = result_to(json!({
			"blocks": 7,
			"difficulty": 2.5,
			"networkhashps": 1234.0
		}))
		.unwrap();
		assert_eq!(v.networksolps, Some(1234.0));
	}

	#[test]
	fn tolerates_missing_optional_fields() {
		let v: GetInfo = result_to(json!({"blocks": 1})).unwrap();
		assert_eq!(v.blocks, 1);
		assert!(!v.testnet);
	}
}
