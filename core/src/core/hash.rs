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

//! Hash Function wrappers. The coin family hashes headers and transactions
//! with double SHA-256; hashes travel the wire in two byte orders, so the
//! type keeps the internal order and reverses on demand.

use num_bigint::BigUint;
use sha2::{Digest, Sha256};
use std::fmt;

use crate::util;

/// A hash consisting of all zeroes, often used as a sentinel.
pub const ZERO_HASH: Hash = Hash([0; 32]);

/// A 32-byte hash in internal (little-endian) byte order, as it appears
/// inside serialized headers and transactions.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Hash(pub [u8; 32]);

impl fmt::Debug for Hash {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.to_hex())
	}
}

impl fmt::Display for Hash {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		// display in the reversed order daemons and explorers use
		write!(f, "{}", self.reversed().to_hex())
	}
}

impl Hash {
	/// Builds a Hash from a 32-byte slice in internal order. Panics if the
	/// slice is not 32 bytes.
	pub fn from_vec(v: &[u8]) -> Hash {
		let mut h = [0; 32];
		h.copy_from_slice(&v[0..32]);
		Hash(h)
	}

	/// Parses a display-order (big-endian) hex string, as found in daemon
	/// RPC responses, into an internal-order Hash.
	pub fn from_display_hex(hex: &str) -> Option<Hash> {
		let bytes = util::from_hex(hex.to_string()).ok()?;
		if bytes.len() != 32 {
			return None;
		}
		Some(Hash::from_vec(&bytes).reversed())
	}

	/// The hash with its byte order flipped.
	pub fn reversed(&self) -> Hash {
		let mut r = self.0;
		r.reverse();
		Hash(r)
	}

	/// Internal-order bytes.
	pub fn to_vec(&self) -> Vec<u8> {
		self.0.to_vec()
	}

	/// Hex of the internal-order bytes.
	pub fn to_hex(&self) -> String {
		util::to_hex(self.0.to_vec())
	}

	/// The hash interpreted as a little-endian 256-bit unsigned integer,
	/// which is how it is compared against targets.
	pub fn to_biguint(&self) -> BigUint {
		BigUint::from_bytes_le(&self.0)
	}
}

/// Double SHA-256 of arbitrary bytes.
pub fn dsha256(data: &[u8]) -> Hash {
	let first = Sha256::digest(data);
	let second = Sha256::digest(first.as_slice());
	Hash::from_vec(second.as_slice())
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn dsha256_empty_vector() {
		// well-known double-sha256 of the empty string
		let h = dsha256(b"");
		assert_eq!(
			h.to_hex(),
			"5df6e0e2761359d30a8275058e299fcc0381534545f55cf43e41983f5d4c9456"
		);
	}

	#[test]
	fn display_reverses_byte_order() {
		let mut bytes = [0u8; 32];
		bytes[0] = 0xaa;
		let h = Hash(bytes);
		assert!(h.to_hex().starts_with("aa"));
		assert!(format!("{}", h).ends_with("aa"));
	}

	#[test]
	fn display_hex_roundtrip() {
		let h = dsha256(b"roundtrip");
		let display = format!("{}", h);
		let parsed = Hash::from_display_hex(&display).unwrap();
		assert_eq!(parsed, h);
	}

	#[test]
	fn biguint_is_little_endian() {
		let mut bytes = [0u8; 32];
		bytes[31] = 1;
		assert_eq!(Hash(bytes).to_biguint(), BigUint::from(1u8) << 248);
	}
}
