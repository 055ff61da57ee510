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

//! Equihash solution verification. Checks a minimal-encoded solution
//! against a serialized header: expands the index list, regenerates the
//! per-index blake2b rows and walks the collision tree checking collisions,
//! index ordering and distinctness, and the final zero XOR.

use blake2_rfc::blake2b::Blake2b;
use byteorder::{ByteOrder, LittleEndian};

use crate::pow::Verifier;

/// Size in bytes of a minimal-encoded solution for the given parameters.
pub fn solution_bytes(n: u32, k: u32) -> usize {
	let collision_bit_length = (n / (k + 1)) as usize;
	((1usize << k) * (collision_bit_length + 1)) / 8
}

// Builds the raw blake2b parameter block (8 little-endian u64 words, per
// RFC 7693) for an unkeyed hash of the given digest length with the given
// 16-byte personalization and no salt, equivalent to what `with_params`
// would have produced on a blake2-rfc version that exposed it.
fn blake2b_param_block(digest_length: usize, personal: &[u8; 16]) -> [u64; 8] {
	let word0 = digest_length as u64 | (0u64 << 8) | (1u64 << 16) | (1u64 << 24);
	let salt = [0u8; 16];
	[
		word0,
		0,
		0,
		0,
		LittleEndian::read_u64(&salt[0..8]),
		LittleEndian::read_u64(&salt[8..16]),
		LittleEndian::read_u64(&personal[0..8]),
		LittleEndian::read_u64(&personal[8..16]),
	]
}

/// Verifier for one (N, K, personalization) Equihash instance.
pub struct EquihashVerifier {
	n: u32,
	k: u32,
	personal: [u8; 16],
}

impl EquihashVerifier {
	/// Creates a verifier. The personalization string is the 8-character
	/// prefix of the blake2b personal field ("ZcashPoW" and friends), with
	/// N and K appended little-endian.
	pub fn new(n: u32, k: u32, personalization: &str) -> EquihashVerifier {
		let mut personal = [0u8; 16];
		let prefix = personalization.as_bytes();
		let len = prefix.len().min(8);
		personal[..len].copy_from_slice(&prefix[..len]);
		LittleEndian::write_u32(&mut personal[8..12], n);
		LittleEndian::write_u32(&mut personal[12..16], k);
		EquihashVerifier { n, k, personal }
	}

	fn collision_bit_length(&self) -> usize {
		(self.n / (self.k + 1)) as usize
	}

	fn collision_byte_length(&self) -> usize {
		(self.collision_bit_length() + 7) / 8
	}

	fn indices_per_hash_output(&self) -> usize {
		(512 / self.n) as usize
	}

	fn hash_output(&self) -> usize {
		self.indices_per_hash_output() * (self.n as usize) / 8
	}

	// The expanded blake2b row for one index: the index'th n-bit slice of
	// the hash of (header || le32(block)), re-aligned so each round's
	// collision chunk is byte aligned.
	fn index_row(&self, header: &[u8], index: u32) -> Vec<u8> {
		let ipho = self.indices_per_hash_output();
		let mut state = Blake2b::with_parameter_block(&blake2b_param_block(
			self.hash_output(),
			&self.personal,
		));
		state.update(header);
		let mut block = [0u8; 4];
		LittleEndian::write_u32(&mut block, index / ipho as u32);
		state.update(&block);
		let digest = state.finalize();
		let start = (index as usize % ipho) * (self.n as usize) / 8;
		let end = start + (self.n as usize) / 8;
		expand_array(
			&digest.as_bytes()[start..end],
			self.collision_bit_length(),
			0,
		)
	}

	fn indices_from_minimal(&self, minimal: &[u8]) -> Option<Vec<u32>> {
		let c_bit_len = self.collision_bit_length();
		if minimal.len() != solution_bytes(self.n, self.k) {
			return None;
		}
		// an index must fit a u32 once expanded
		if (c_bit_len + 1 + 7) / 8 > 4 {
			return None;
		}
		let byte_pad = 4 - ((c_bit_len + 1) + 7) / 8;
		let expanded = expand_array(minimal, c_bit_len + 1, byte_pad);
		Some(
			expanded
				.chunks(4)
				.map(|chunk| byteorder::BigEndian::read_u32(chunk))
				.collect(),
		)
	}
}

impl Verifier for EquihashVerifier {
	fn verify(&self, header: &[u8], solution: &[u8]) -> bool {
		let indices = match self.indices_from_minimal(solution) {
			Some(indices) => indices,
			None => return false,
		};

		let c_byte_len = self.collision_byte_length();
		let mut rows: Vec<(Vec<u8>, Vec<u32>)> = indices
			.iter()
			.map(|&i| (self.index_row(header, i), vec![i]))
			.collect();

		while rows.len() > 1 {
			let mut merged = Vec::with_capacity(rows.len() / 2);
			for pair in rows.chunks(2) {
				let (ref a_hash, ref a_indices) = pair[0];
				let (ref b_hash, ref b_indices) = pair[1];
				// colliding chunk, ordering and distinctness per level
				if a_hash[..c_byte_len] != b_hash[..c_byte_len] {
					return false;
				}
				if a_indices[0] >= b_indices[0] {
					return false;
				}
				if a_indices.iter().any(|i| b_indices.contains(i)) {
					return false;
				}
				let hash: Vec<u8> = a_hash[c_byte_len..]
					.iter()
					.zip(&b_hash[c_byte_len..])
					.map(|(x, y)| x ^ y)
					.collect();
				let mut indices = Vec::with_capacity(a_indices.len() * 2);
				indices.extend_from_slice(a_indices);
				indices.extend_from_slice(b_indices);
				merged.push((hash, indices));
			}
			rows = merged;
		}

		rows[0].0.iter().all(|&b| b == 0)
	}
}

// Expands an array packed with bit_len-bit chunks into chunks padded to
// whole bytes, each preceded by byte_pad zero bytes.
fn expand_array(vin: &[u8], bit_len: usize, byte_pad: usize) -> Vec<u8> {
	assert!(bit_len >= 8);
	assert!(8 * 4 >= 7 + bit_len);

	let out_width = (bit_len + 7) / 8 + byte_pad;
	let out_len = 8 * out_width * vin.len() / bit_len;
	let mut vout = vec![0u8; out_len];
	let bit_len_mask: u32 = (1 << bit_len) - 1;

	// The accumulator shifts bits in from the input and flushes a chunk
	// whenever at least bit_len bits are pending.
	let mut acc_bits = 0usize;
	let mut acc_value = 0u32;
	let mut j = 0usize;
	for &b in vin {
		acc_value = (acc_value << 8) | b as u32;
		acc_bits += 8;

		if acc_bits >= bit_len {
			acc_bits -= bit_len;
			for x in byte_pad..out_width {
				vout[j + x] = ((acc_value >> (acc_bits + 8 * (out_width - x - 1))) as u8)
					& ((bit_len_mask >> (8 * (out_width - x - 1))) as u8);
			}
			j += out_width;
		}
	}

	vout
}

#[cfg(test)]
mod test {
	use super::*;

	// inverse of expand_array, for roundtrip tests only
	fn compress_array(vin: &[u8], bit_len: usize, byte_pad: usize) -> Vec<u8> {
		let in_width = (bit_len + 7) / 8 + byte_pad;
		let out_len = bit_len * vin.len() / (8 * in_width);
		let mut vout = vec![0u8; out_len];
		let bit_len_mask: u32 = (1 << bit_len) - 1;

		let mut acc_bits = 0usize;
		let mut acc_value = 0u32;
		let mut j = 0usize;
		for byte in &mut vout {
			if acc_bits < 8 {
				acc_value <<= bit_len;
				for x in byte_pad..in_width {
					acc_value |= ((vin[j + x] & ((bit_len_mask >> (8 * (in_width - x - 1))) as u8))
						as u32) << (8 * (in_width - x - 1));
				}
				j += in_width;
				acc_bits += bit_len;
			}
			acc_bits -= 8;
			*byte = (acc_value >> acc_bits) as u8;
		}

		vout
	}

	#[test]
	fn expand_is_identity_for_byte_aligned_chunks() {
		let data = [0xde, 0xad, 0xbe, 0xef];
		assert_eq!(expand_array(&data, 8, 0), data.to_vec());
	}

	#[test]
	fn expand_twelve_bit_chunks() {
		// 0xffffff = two 12-bit chunks of 0xfff
		let data = [0xff, 0xff, 0xff];
		assert_eq!(expand_array(&data, 12, 0), vec![0x0f, 0xff, 0x0f, 0xff]);
		// 0xabcdef = 0xabc, 0xdef
		let data = [0xab, 0xcd, 0xef];
		assert_eq!(expand_array(&data, 12, 0), vec![0x0a, 0xbc, 0x0d, 0xef]);
	}

	#[test]
	fn expand_with_byte_pad() {
		let data = [0xff, 0xff, 0xff];
		assert_eq!(
			expand_array(&data, 12, 1),
			vec![0x00, 0x0f, 0xff, 0x00, 0x0f, 0xff]
		);
	}

	#[test]
	fn expand_compress_roundtrip() {
		let data = [0x12, 0x34, 0x56, 0x78, 0x9a, 0xbc, 0xde, 0xf0, 0x11];
		for &(bit_len, byte_pad) in &[(9usize, 0usize), (12, 0), (12, 1), (18, 0), (24, 0)] {
			let expanded = expand_array(&data, bit_len, byte_pad);
			assert_eq!(compress_array(&expanded, bit_len, byte_pad), data.to_vec());
		}
	}

	#[test]
	fn solution_sizes() {
		assert_eq!(solution_bytes(200, 9), 1344);
		assert_eq!(solution_bytes(144, 5), 100);
		assert_eq!(solution_bytes(192, 7), 400);
	}

	#[test]
	fn rejects_wrong_length_solution() {
		let verifier = EquihashVerifier::new(200, 9, "ZcashPoW");
		assert!(!verifier.verify(&[0u8; 140], &[0u8; 1343]));
		assert!(!verifier.verify(&[0u8; 140], &[0u8; 1345]));
	}

	#[test]
	fn rejects_all_zero_solution() {
		// every index decodes to 0, which trips the ordering check before
		// any hashing can succeed
		let verifier = EquihashVerifier::new(200, 9, "ZcashPoW");
		assert!(!verifier.verify(&[0u8; 140], &[0u8; 1344]));
	}

	#[test]
	fn indices_roundtrip_through_minimal_encoding() {
		// 144/5: c_bit_len 24, index width 25 bits
		let verifier = EquihashVerifier::new(144, 5, "ZcashPoW");
		let minimal = [0x80u8; 100];
		let indices = verifier.indices_from_minimal(&minimal).unwrap();
		assert_eq!(indices.len(), 32);
		// 100 bytes of 0x80: first 25-bit chunk = 0b1000000010000000100000001
		assert_eq!(indices[0], 0b1_0000_0001_0000_0001_0000_0001);
	}
}
