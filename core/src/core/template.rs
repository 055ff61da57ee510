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

//! The raw `getblocktemplate` payload as received from a coin daemon.
//! Treated as immutable once received; the job manager never mutates a
//! template after binding it to a job.

/// A transaction included in a block template.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TemplateTx {
	/// Raw transaction bytes, hex encoded.
	pub data: String,
	/// Transaction id in display (big-endian) hex.
	pub hash: String,
	/// Fee in base units, when the daemon reports it.
	#[serde(default)]
	pub fee: Option<i64>,
}

/// A pre-built coinbase supplied by the daemon (PBaaS-style merged mining).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CoinbaseTxn {
	/// Raw coinbase bytes, hex encoded.
	pub data: String,
	/// Coinbase fee adjustment, when present.
	#[serde(default)]
	pub fee: Option<i64>,
}

/// Block template as returned by `getblocktemplate`. Field names follow the
/// daemon's JSON; everything the job derivation needs and nothing more.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RpcData {
	/// Height of the block being worked on.
	pub height: u64,
	/// Hash of the chain tip, display hex.
	pub previousblockhash: String,
	/// Transactions to include after the coinbase.
	#[serde(default)]
	pub transactions: Vec<TemplateTx>,
	/// Current network-adjusted time.
	pub curtime: u32,
	/// Compact difficulty encoding.
	pub bits: String,
	/// Full 256-bit target, hex.
	pub target: String,
	/// Block version.
	pub version: u32,
	/// Reserved solution-version bytes for VerusHash-family coins.
	#[serde(default)]
	pub solution: Option<String>,
	/// Daemon-assembled coinbase for the PBaaS path.
	#[serde(default)]
	pub coinbasetxn: Option<CoinbaseTxn>,
	/// Sapling commitment tree root, display hex.
	#[serde(default)]
	pub finalsaplingroothash: Option<String>,
	/// Merged-mining compact target, when the daemon is merge mining.
	#[serde(default, alias = "mergeminebits")]
	pub merged_bits: Option<String>,
	/// Total coinbase value (reward plus fees) in base units.
	#[serde(default)]
	pub coinbasevalue: Option<u64>,
}

impl RpcData {
	/// The first byte of the reserved solution field, which carries the
	/// solution version on VerusHash-family chains.
	pub fn solution_version(&self) -> Option<u8> {
		let sol = self.solution.as_ref()?;
		if sol.len() < 2 {
			return None;
		}
		u8::from_str_radix(&sol[0..2], 16).ok()
	}

	/// Key used by the streamed-template dedup cache.
	pub fn dedup_key(&self) -> String {
		format!("{}_{}", self.previousblockhash, self.curtime)
	}
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn parses_minimal_template() {
		let json = r#"{
			"height": 1000,
			"previousblockhash": "000000000000000000000000000000000000000000000000000000000000abcd",
			"transactions": [],
			"curtime": 1600000000,
			"bits": "1d00ffff",
			"target": "0007ffffffffffffffffffffffffffffffffffffffffffffffffffffffffffff",
			"version": 4
		}"#;
		let data: RpcData = serde_json::from_str(json).unwrap();
		assert_eq!(data.height, 1000);
		assert_eq!(data.solution_version(), None);
		assert!(data.coinbasetxn.is_none());
	}

	#[test]
	fn parses_merged_bits_alias() {
		let json = r#"{
			"height": 5,
			"previousblockhash": "00",
			"curtime": 1,
			"bits": "1d00ffff",
			"target": "00ffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffff",
			"version": 4,
			"mergeminebits": "1e012345",
			"solution": "0301ab"
		}"#;
		let data: RpcData = serde_json::from_str(json).unwrap();
		assert_eq!(data.merged_bits.as_deref(), Some("1e012345"));
		assert_eq!(data.solution_version(), Some(3));
	}

	#[test]
	fn dedup_key_combines_prevhash_and_curtime() {
		let json = r#"{
			"height": 5,
			"previousblockhash": "beef",
			"curtime": 42,
			"bits": "1d00ffff",
			"target": "00ffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffff",
			"version": 4
		}"#;
		let data: RpcData = serde_json::from_str(json).unwrap();
		assert_eq!(data.dedup_key(), "beef_42");
	}
}
