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

//! Coinbase transaction assembly. Builds the generation transaction that
//! pays the block reward out to the pool address and any configured reward
//! recipients, with the BIP-34 height push in the input script.

use crate::ser::{BinWriter, Error, Writer};

/// Bit flagged into the version field of Overwinter/Sapling transactions.
const OVERWINTER_BIT: u32 = 0x8000_0000;
/// Version group id of Sapling (v4) transactions.
const SAPLING_VERSION_GROUP_ID: u32 = 0x892f_2085;

/// One output of the reward split, script plus its percentage share.
#[derive(Debug, Clone)]
pub struct RewardRecipient {
	/// Locking script of the recipient, as raw bytes.
	pub script: Vec<u8>,
	/// Percentage of the total coinbase value this recipient receives.
	pub percent: f64,
}

/// Everything needed to assemble a coinbase besides the template itself.
#[derive(Debug, Clone)]
pub struct CoinbasePlan {
	/// Locking script of the pool address; receives the remainder of the
	/// reward after recipients are paid.
	pub pool_script: Vec<u8>,
	/// Fee recipients, each taking a percentage slice off the top.
	pub recipients: Vec<RewardRecipient>,
	/// Free-form tag appended to the input script after the height push.
	pub tag: Vec<u8>,
}

/// Minimal CScriptNum push of a block height, as BIP-34 requires in the
/// coinbase input script.
pub fn script_number(n: u64) -> Vec<u8> {
	if n >= 1 && n <= 16 {
		// OP_1 .. OP_16
		return vec![0x50 + n as u8];
	}
	let mut digits = Vec::new();
	let mut rest = n;
	while rest > 0 {
		digits.push((rest & 0xff) as u8);
		rest >>= 8;
	}
	if digits.is_empty() {
		digits.push(0);
	}
	// keep the sign bit clear
	if *digits.last().unwrap() >= 0x80 {
		digits.push(0);
	}
	let mut out = Vec::with_capacity(digits.len() + 1);
	out.push(digits.len() as u8);
	out.extend_from_slice(&digits);
	out
}

/// Assembles the serialized coinbase transaction for a block at `height`
/// carrying `value` base units of reward plus fees. `sapling` selects the
/// v4 transaction layout used from the Sapling network upgrade onwards.
pub fn build_coinbase(
	height: u64,
	value: u64,
	sapling: bool,
	plan: &CoinbasePlan,
) -> Result<Vec<u8>, Error> {
	let mut script_sig = script_number(height);
	script_sig.extend_from_slice(&plan.tag);

	// percentage slices round down, the pool keeps the dust
	let mut outputs: Vec<(u64, &[u8])> = Vec::with_capacity(plan.recipients.len() + 1);
	let mut paid: u64 = 0;
	for r in &plan.recipients {
		let amount = (value as f64 * r.percent / 100.0).floor() as u64;
		paid += amount;
		outputs.push((amount, &r.script));
	}
	outputs.insert(0, (value.saturating_sub(paid), &plan.pool_script));

	let mut bytes = Vec::new();
	{
		let mut w = BinWriter::new(&mut bytes);
		if sapling {
			w.write_u32(4 | OVERWINTER_BIT)?;
			w.write_u32(SAPLING_VERSION_GROUP_ID)?;
		} else {
			w.write_u32(1)?;
		}

		// single generation input
		w.write_varint(1)?;
		w.write_fixed_bytes(&[0u8; 32])?;
		w.write_u32(0xffff_ffff)?;
		w.write_vec(&script_sig)?;
		w.write_u32(0xffff_ffff)?;

		w.write_varint(outputs.len() as u64)?;
		for (amount, script) in outputs {
			w.write_u64(amount)?;
			w.write_vec(script)?;
		}

		// locktime
		w.write_u32(0)?;

		if sapling {
			// expiry height, value balance, no shielded elements
			w.write_u32(0)?;
			w.write_i64(0)?;
			w.write_varint(0)?;
			w.write_varint(0)?;
			w.write_varint(0)?;
		}
	}
	Ok(bytes)
}

#[cfg(test)]
mod test {
	use super::*;
	use std::convert::TryInto;

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

	#[test]
	fn script_number_encodings() {
		assert_eq!(script_number(1), vec![0x51]);
		assert_eq!(script_number(16), vec![0x60]);
		assert_eq!(script_number(17), vec![0x01, 0x11]);
		assert_eq!(script_number(1000), vec![0x02, 0xe8, 0x03]);
		// 128 needs a padding byte to keep the sign bit clear
		assert_eq!(script_number(128), vec![0x02, 0x80, 0x00]);
	}

	#[test]
	fn v1_coinbase_layout() {
		let tx = build_coinbase(1000, 10_000_000_000, false, &plan()).unwrap();
		// version 1
		assert_eq!(&tx[0..4], &[1, 0, 0, 0]);
		// one input, null prevout
		assert_eq!(tx[4], 1);
		assert_eq!(&tx[5..37], &[0u8; 32][..]);
		assert_eq!(&tx[37..41], &[0xff; 4][..]);
		// scriptSig starts with the BIP-34 height push
		let script_len = tx[41] as usize;
		assert_eq!(&tx[42..45], &script_number(1000)[..]);
		assert_eq!(script_len, 3 + b"/equipool/".len());
		// two outputs
		let vout_at = 42 + script_len + 4;
		assert_eq!(tx[vout_at], 2);
		// ends with a zero locktime
		assert_eq!(&tx[tx.len() - 4..], &[0, 0, 0, 0]);
	}

	#[test]
	fn sapling_coinbase_layout() {
		let tx = build_coinbase(1, 100, true, &plan()).unwrap();
		// overwintered v4 header
		assert_eq!(&tx[0..4], &[0x04, 0x00, 0x00, 0x80]);
		assert_eq!(&tx[4..8], &[0x85, 0x20, 0x2f, 0x89]);
		// tail: locktime, expiry, value balance, 3 empty vectors
		assert_eq!(&tx[tx.len() - 19..], &[0u8; 19][..]);
	}

	#[test]
	fn reward_split_pays_recipients_and_remainder() {
		let value = 10_000_000_000u64;
		let tx = build_coinbase(1000, value, false, &plan()).unwrap();
		// locate outputs: 4 version + 1 vin count + 32 prevout + 4 index
		// + 1 script len + script + 4 sequence + 1 vout count
		let script_len = tx[41] as usize;
		let mut at = 42 + script_len + 4 + 1;
		let pool_amount = u64::from_le_bytes(tx[at..at + 8].try_into().unwrap());
		at += 8;
		let pool_script_len = tx[at] as usize;
		at += 1 + pool_script_len;
		let fee_amount = u64::from_le_bytes(tx[at..at + 8].try_into().unwrap());
		assert_eq!(fee_amount, value / 100);
		assert_eq!(pool_amount + fee_amount, value);
	}
}
