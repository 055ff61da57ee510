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

//! Consensus-relevant constants and the short pure functions built on them:
//! the diff1 baseline target, compact-bits decoding and the conversions
//! between 256-bit targets and floating point difficulties.

use num::ToPrimitive;
use num_bigint::BigUint;

/// Size in bytes of a serialized block header, solution excluded.
pub const HEADER_SIZE: usize = 140;

/// Offset in bytes of the nTime field within a serialized header.
pub const HEADER_NTIME_OFFSET: usize = 100;

/// Offset in bytes of the 32-byte nonce within a serialized header.
pub const HEADER_NONCE_OFFSET: usize = 108;

/// The baseline target used to normalize difficulty for the
/// Equihash/VerusHash family of algorithms. difficulty 1 == this target.
pub const DIFF1_HEX: &str = "0007ffffffffffffffffffffffffffffffffffffffffffffffffffffffffffff";

lazy_static! {
	static ref DIFF1: BigUint = BigUint::parse_bytes(DIFF1_HEX.as_bytes(), 16).unwrap();
}

/// The diff1 baseline target as a 256-bit unsigned integer.
pub fn diff1() -> BigUint {
	DIFF1.clone()
}

/// Decode a Bitcoin-style compact difficulty encoding ("bits") into a
/// 256-bit target.
pub fn compact_to_target(bits: u32) -> BigUint {
	let exponent = (bits >> 24) as usize;
	let mantissa = BigUint::from(bits & 0x007f_ffff);
	if exponent <= 3 {
		mantissa >> (8 * (3 - exponent))
	} else {
		mantissa << (8 * (exponent - 3))
	}
}

/// The pool-normalized difficulty of a target: diff1 / target.
///
/// Computed through f64 at the very end. Above 2^53 the quotient loses
/// precision, which is why share acceptance applies a 0.99 tolerance rather
/// than comparing difficulties exactly.
pub fn target_to_difficulty(target: &BigUint) -> f64 {
	let t = target.to_f64().unwrap_or(0.0);
	if t == 0.0 {
		return 0.0;
	}
	DIFF1.to_f64().unwrap() / t
}

/// The target a client at the given difficulty must meet: floor(diff1 / d).
/// Divides through a 2^32 fixed-point scaling of `d` so fractional
/// difficulties keep their precision.
pub fn difficulty_to_target(difficulty: f64) -> BigUint {
	let scaled = (difficulty * 4294967296.0).round();
	if scaled < 1.0 {
		return DIFF1.clone();
	}
	let divisor = BigUint::from(scaled as u128);
	(DIFF1.clone() << 32) / divisor
}

/// Hex-encode a target zero-padded to the full 64 characters the
/// `mining.set_target` notification requires.
pub fn target_to_hex(target: &BigUint) -> String {
	format!("{:0>64}", target.to_str_radix(16))
}

/// Parse a 64-char target hex string from a block template.
pub fn target_from_hex(hex: &str) -> Option<BigUint> {
	BigUint::parse_bytes(hex.as_bytes(), 16)
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn diff1_roundtrips_through_hex() {
		assert_eq!(target_to_hex(&diff1()), DIFF1_HEX);
	}

	#[test]
	fn difficulty_of_diff1_is_one() {
		let d = target_to_difficulty(&diff1());
		assert!((d - 1.0).abs() < 1e-9);
	}

	#[test]
	fn difficulty_to_target_halves() {
		// difficulty 2 halves the target
		let t = difficulty_to_target(2.0);
		let expected = diff1() / BigUint::from(2u32);
		// fixed-point scaling may truncate the last bit
		let delta = if t > expected.clone() {
			t - expected
		} else {
			expected - t
		};
		assert!(delta < BigUint::from(2u32));
	}

	#[test]
	fn compact_decodes_bitcoin_genesis_bits() {
		// 0x1d00ffff => 0x00ffff << 8*(0x1d-3)
		let t = compact_to_target(0x1d00ffff);
		let expected = BigUint::from(0x00ffffu32) << (8 * (0x1d - 3));
		assert_eq!(t, expected);
	}

	#[test]
	fn compact_handles_small_exponent() {
		let t = compact_to_target(0x0200ffff);
		assert_eq!(t, BigUint::from(0x00ffu32));
	}
}
