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

//! A mining job bound to a single block template: targets, difficulty,
//! pre-reversed header fields, assembled coinbase, the cached
//! `mining.notify` parameter vector and the serializers that turn a miner's
//! submission back into header and block bytes.

use failure::Fail;
use num_bigint::BigUint;
use std::cmp;
use std::collections::HashSet;

use crate::consensus;
use crate::core::hash::{dsha256, Hash, ZERO_HASH};
use crate::core::merkle;
use crate::core::template::RpcData;
use crate::libtx::{self, CoinbasePlan};
use crate::ser::{self, BinWriter, Writer};
use crate::util;

/// Error building a job out of a template.
#[derive(Debug, Fail)]
pub enum Error {
	/// A template field failed to parse or was missing.
	#[fail(display = "invalid template: {}", _0)]
	Template(String),
	/// A hex field in the template failed to decode.
	#[fail(display = "invalid hex in template: {}", _0)]
	Hex(String),
	/// Serialization of coinbase or header failed.
	#[fail(display = "serialization error: {}", _0)]
	Ser(String),
}

impl From<ser::Error> for Error {
	fn from(e: ser::Error) -> Error {
		Error::Ser(format!("{}", e))
	}
}

fn hex_field(name: &str, hex: &str) -> Result<Vec<u8>, Error> {
	util::from_hex(hex.to_string()).map_err(|_| Error::Hex(name.to_string()))
}

/// A job derived from exactly one block template.
pub struct JobTemplate {
	/// Job id, unique within the process for the lifetime of the live set.
	pub job_id: String,
	/// The template this job was built from, kept immutable.
	pub rpc_data: RpcData,
	/// Network target as a 256-bit integer.
	pub target: BigUint,
	/// Merged-mining target, always <= target.
	pub merged_target: BigUint,
	/// Pool-normalized difficulty of the network target.
	pub difficulty: f64,
	/// Previous block hash in header (internal) byte order.
	pub prev_hash_le: Hash,
	/// Merkle root of coinbase plus template transactions, internal order.
	pub merkle_root_le: Hash,
	/// Final sapling root in internal order, zero when absent.
	pub final_sapling_root_le: Hash,
	/// Compact bits in header byte order.
	pub bits_le: [u8; 4],
	/// Serialized coinbase transaction.
	pub coinbase: Vec<u8>,
	/// Double SHA-256 of the coinbase.
	pub coinbase_hash: Hash,
	// template transactions, concatenated raw bytes
	tx_blob: Vec<u8>,
	tx_count: u64,
	notify_params: Vec<String>,
	submits: HashSet<String>,
}

impl JobTemplate {
	/// Derives a job from a template. Assembles the coinbase (verbatim from
	/// the daemon when it supplied one, otherwise built from the reward
	/// plan), computes the merkle root and caches the notify params.
	pub fn new(job_id: String, rpc_data: RpcData, plan: &CoinbasePlan) -> Result<JobTemplate, Error> {
		let target = consensus::target_from_hex(&rpc_data.target)
			.ok_or_else(|| Error::Hex("target".to_string()))?;
		let difficulty = consensus::target_to_difficulty(&target);

		let merged_target = match rpc_data.merged_bits {
			Some(ref hex) => {
				let bits = u32::from_str_radix(hex, 16)
					.map_err(|_| Error::Hex("merged_bits".to_string()))?;
				cmp::min(consensus::compact_to_target(bits), target.clone())
			}
			None => target.clone(),
		};

		let prev_hash_le = Hash::from_display_hex(&rpc_data.previousblockhash)
			.ok_or_else(|| Error::Hex("previousblockhash".to_string()))?;

		let final_sapling_root_le = match rpc_data.finalsaplingroothash {
			Some(ref hex) => Hash::from_display_hex(hex)
				.ok_or_else(|| Error::Hex("finalsaplingroothash".to_string()))?,
			None => ZERO_HASH,
		};

		let coinbase = match rpc_data.coinbasetxn {
			Some(ref txn) => hex_field("coinbasetxn", &txn.data)?,
			None => {
				let value = rpc_data.coinbasevalue.ok_or_else(|| {
					Error::Template("no coinbasetxn and no coinbasevalue".to_string())
				})?;
				libtx::build_coinbase(rpc_data.height, value, rpc_data.version >= 4, plan)?
			}
		};
		let coinbase_hash = dsha256(&coinbase);

		let mut leaves = vec![coinbase_hash];
		let mut tx_blob = Vec::new();
		for tx in &rpc_data.transactions {
			leaves.push(
				Hash::from_display_hex(&tx.hash)
					.ok_or_else(|| Error::Hex("transaction hash".to_string()))?,
			);
			tx_blob.extend_from_slice(&hex_field("transaction data", &tx.data)?);
		}
		let merkle_root_le = merkle::merkle_root(&leaves);

		let bits_bytes = hex_field("bits", &rpc_data.bits)?;
		if bits_bytes.len() != 4 {
			return Err(Error::Hex("bits".to_string()));
		}
		let mut bits_le = [0u8; 4];
		bits_le.copy_from_slice(&bits_bytes);
		bits_le.reverse();

		let mut notify_params = vec![
			job_id.clone(),
			util::to_hex(rpc_data.version.to_le_bytes().to_vec()),
			prev_hash_le.to_hex(),
			merkle_root_le.to_hex(),
			final_sapling_root_le.to_hex(),
			util::to_hex(rpc_data.curtime.to_le_bytes().to_vec()),
			util::to_hex(bits_le.to_vec()),
		];
		if let Some(ref sol) = rpc_data.solution {
			notify_params.push(sol.clone());
		}

		let tx_count = rpc_data.transactions.len() as u64 + 1;

		Ok(JobTemplate {
			job_id,
			target,
			merged_target,
			difficulty,
			prev_hash_le,
			merkle_root_le,
			final_sapling_root_le,
			bits_le,
			coinbase,
			coinbase_hash,
			tx_blob,
			tx_count,
			notify_params,
			submits: HashSet::new(),
			rpc_data,
		})
	}

	/// Height of the template this job was built from.
	pub fn height(&self) -> u64 {
		self.rpc_data.height
	}

	/// Template curtime, which submitted nTime must match exactly.
	pub fn curtime(&self) -> u32 {
		self.rpc_data.curtime
	}

	/// Solution version byte of the reserved solution field, when present.
	pub fn solution_version(&self) -> Option<u8> {
		self.rpc_data.solution_version()
	}

	/// The cached `mining.notify` params. The clean-jobs flag is not part
	/// of the cache; the stratum server splices it in at position 7.
	pub fn notify_params(&self) -> &[String] {
		&self.notify_params
	}

	/// Serializes the 140-byte header for the given miner-chosen nTime and
	/// nonce bytes.
	pub fn header_bytes(&self, ntime: &[u8], nonce: &[u8]) -> Result<Vec<u8>, Error> {
		debug_assert_eq!(ntime.len(), 4);
		debug_assert_eq!(nonce.len(), 32);
		let mut header = Vec::with_capacity(consensus::HEADER_SIZE);
		{
			let mut w = BinWriter::new(&mut header);
			w.write_u32(self.rpc_data.version)?;
			w.write_fixed_bytes(&self.prev_hash_le.0)?;
			w.write_fixed_bytes(&self.merkle_root_le.0)?;
			w.write_fixed_bytes(&self.final_sapling_root_le.0)?;
			w.write_fixed_bytes(ntime)?;
			w.write_fixed_bytes(&self.bits_le)?;
			w.write_fixed_bytes(nonce)?;
		}
		debug_assert_eq!(header.len(), consensus::HEADER_SIZE);
		Ok(header)
	}

	/// Serializes the full block: header, solution (as submitted, length
	/// prefix included), transaction count, coinbase, template transactions
	/// in template order.
	pub fn block_hex(&self, header: &[u8], solution: &[u8]) -> Result<String, Error> {
		let mut block = Vec::with_capacity(
			header.len() + solution.len() + 9 + self.coinbase.len() + self.tx_blob.len(),
		);
		{
			let mut w = BinWriter::new(&mut block);
			w.write_fixed_bytes(header)?;
			w.write_fixed_bytes(solution)?;
			w.write_varint(self.tx_count)?;
			w.write_fixed_bytes(&self.coinbase)?;
			w.write_fixed_bytes(&self.tx_blob)?;
		}
		Ok(util::to_hex(block))
	}

	/// Registers a submission against the duplicate guard. Returns false if
	/// the same header and solution were seen before on this job.
	pub fn register_submit(&mut self, header_hex: &str, solution_hex: &str) -> bool {
		let key = format!("{}{}", header_hex, solution_hex).to_lowercase();
		self.submits.insert(key)
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::core::template::TemplateTx;
	use crate::libtx::RewardRecipient;

	fn plan() -> CoinbasePlan {
		CoinbasePlan {
			pool_script: vec![0x76, 0xa9, 0x14, 0xaa, 0x88, 0xac],
			recipients: vec![RewardRecipient {
				script: vec![0x76, 0xa9, 0x14, 0xbb, 0x88, 0xac],
				percent: 1.0,
			}],
			tag: b"/equipool/".to_vec(),
		}
	}

	fn template() -> RpcData {
		RpcData {
			height: 1000,
			previousblockhash: "00000000000000000000000000000000000000000000000000000000000000ff"
				.to_string(),
			transactions: vec![TemplateTx {
				data: "0100".to_string(),
				hash: "00000000000000000000000000000000000000000000000000000000000000aa"
					.to_string(),
				fee: None,
			}],
			curtime: 0x5f5e1000,
			bits: "1d00ffff".to_string(),
			target: consensus::DIFF1_HEX.to_string(),
			version: 4,
			solution: None,
			coinbasetxn: None,
			finalsaplingroothash: None,
			merged_bits: None,
			coinbasevalue: Some(10_000_000_000),
		}
	}

	fn job() -> JobTemplate {
		JobTemplate::new("1".to_string(), template(), &plan()).unwrap()
	}

	#[test]
	fn difficulty_of_diff1_target() {
		let job = job();
		assert!((job.difficulty - 1.0).abs() < 1e-9);
		assert_eq!(job.merged_target, job.target);
	}

	#[test]
	fn notify_params_little_endian_fields() {
		let job = job();
		let params = job.notify_params();
		assert_eq!(params[0], "1");
		assert_eq!(params[1], "04000000");
		// prev hash reversed: leading ff
		assert!(params[2].starts_with("ff"));
		// sapling root absent -> zero
		assert_eq!(params[4], "0".repeat(64));
		assert_eq!(params[5], "00105e5f");
		assert_eq!(params[6], "ffff001d");
	}

	#[test]
	fn header_layout() {
		let job = job();
		let ntime = job.curtime().to_le_bytes();
		let nonce = [7u8; 32];
		let header = job.header_bytes(&ntime, &nonce).unwrap();
		assert_eq!(header.len(), consensus::HEADER_SIZE);
		assert_eq!(&header[0..4], &[4, 0, 0, 0]);
		assert_eq!(header[4], 0xff); // reversed prev hash
		assert_eq!(&header[100..104], &ntime[..]);
		assert_eq!(&header[104..108], &[0xff, 0xff, 0x00, 0x1d]);
		assert_eq!(&header[108..140], &nonce[..]);
	}

	#[test]
	fn block_serialization_appends_txs() {
		let job = job();
		let header = job
			.header_bytes(&job.curtime().to_le_bytes(), &[0u8; 32])
			.unwrap();
		let solution = vec![0x05, 1, 2, 3, 4, 5];
		let hex = job.block_hex(&header, &solution).unwrap();
		let bytes = util::from_hex(hex).unwrap();
		// header || solution || varint(2) || coinbase || tx
		assert_eq!(&bytes[0..140], &header[..]);
		assert_eq!(&bytes[140..146], &solution[..]);
		assert_eq!(bytes[146], 2);
		assert_eq!(&bytes[bytes.len() - 2..], &[0x01, 0x00]);
	}

	#[test]
	fn duplicate_submit_guard() {
		let mut job = job();
		assert!(job.register_submit("AABB", "ccdd"));
		assert!(!job.register_submit("aabb", "CCDD"));
		assert!(job.register_submit("aabb", "ccde"));
	}

	#[test]
	fn merged_bits_clamped_to_target() {
		let mut data = template();
		// merged bits decode far above the network target; must clamp
		data.merged_bits = Some("207fffff".to_string());
		let job = JobTemplate::new("2".to_string(), data, &plan()).unwrap();
		assert!(job.merged_target <= job.target);
	}
}
