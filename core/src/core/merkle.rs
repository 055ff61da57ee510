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

//! Merkle root calculation over the transactions of a block template.

use crate::core::hash::{dsha256, Hash};

/// Computes the merkle root of the given leaf hashes (coinbase hash first,
/// then template transactions in template order). Pairs are combined with
/// double SHA-256, an odd leaf is paired with itself.
pub fn merkle_root(leaves: &[Hash]) -> Hash {
	assert!(!leaves.is_empty());
	let mut level: Vec<Hash> = leaves.to_vec();
	while level.len() > 1 {
		let mut next = Vec::with_capacity((level.len() + 1) / 2);
		for pair in level.chunks(2) {
			let left = pair[0];
			let right = if pair.len() == 2 { pair[1] } else { pair[0] };
			let mut concat = Vec::with_capacity(64);
			concat.extend_from_slice(&left.0);
			concat.extend_from_slice(&right.0);
			next.push(dsha256(&concat));
		}
		level = next;
	}
	level[0]
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn single_leaf_is_root() {
		let leaf = dsha256(b"coinbase");
		assert_eq!(merkle_root(&[leaf]), leaf);
	}

	#[test]
	fn two_leaves() {
		let a = dsha256(b"a");
		let b = dsha256(b"b");
		let mut concat = a.to_vec();
		concat.extend_from_slice(&b.0);
		assert_eq!(merkle_root(&[a, b]), dsha256(&concat));
	}

	#[test]
	fn odd_leaf_duplicated() {
		let a = dsha256(b"a");
		let b = dsha256(b"b");
		let c = dsha256(b"c");
		// manually: root = H(H(a||b) || H(c||c))
		let mut ab = a.to_vec();
		ab.extend_from_slice(&b.0);
		let hab = dsha256(&ab);
		let mut cc = c.to_vec();
		cc.extend_from_slice(&c.0);
		let hcc = dsha256(&cc);
		let mut top = hab.to_vec();
		top.extend_from_slice(&hcc.0);
		assert_eq!(merkle_root(&[a, b, c]), dsha256(&top));
	}
}
