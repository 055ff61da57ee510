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

//! The pluggable proof-of-work layer. The pool itself never mines; it only
//! checks returned solutions, so all we need per algorithm is a solution
//! verifier and the header hash function the target comparison uses.
//!
//! Equihash verification ships built in. The VerusHash primitive family is
//! registered by the embedder; a configured algorithm with no registered
//! verifier refuses to start.

pub mod equihash;

use failure::Fail;
use std::collections::HashMap;
use std::sync::Arc;

use crate::core::hash::{dsha256, Hash};

pub use self::equihash::EquihashVerifier;

/// Proof-of-work selection and verification errors.
#[derive(Debug, Fail)]
pub enum Error {
	/// The configured algorithm name is not one we know about.
	#[fail(display = "unsupported algorithm: {}", _0)]
	UnsupportedAlgorithm(String),
	/// The selected variant has no registered verifier.
	#[fail(display = "no verifier registered for {}", _0)]
	MissingVerifier(String),
}

/// Verifies a miner's solution against a serialized 140-byte header.
/// The solution passed in has its compact-size length prefix stripped.
pub trait Verifier: Send + Sync {
	/// True when the solution is valid for the header.
	fn verify(&self, header: &[u8], solution: &[u8]) -> bool;
}

/// Hashes a serialized header (solution appended, length prefix included)
/// into the 256-bit value that is compared against share and network
/// targets.
pub trait HeaderHasher: Send + Sync {
	/// Hash the full header bytes.
	fn hash(&self, data: &[u8]) -> Hash;
}

/// The standard Bitcoin-family double SHA-256 header hash.
pub struct DoubleSha256;

impl HeaderHasher for DoubleSha256 {
	fn hash(&self, data: &[u8]) -> Hash {
		dsha256(data)
	}
}

/// The algorithm a pool instance is configured for.
#[derive(Debug, Clone, PartialEq)]
pub enum Algorithm {
	/// Equihash with the given (N, K) and blake2b personalization string.
	Equihash {
		/// Equihash N parameter.
		n: u32,
		/// Equihash K parameter.
		k: u32,
		/// 8-character blake2b personalization prefix, e.g. "ZcashPoW".
		personalization: String,
	},
	/// VerusHash family; the concrete variant is chosen per block from the
	/// solution version.
	Verushash,
}

impl Algorithm {
	/// Resolves a configured algorithm name plus parameters.
	pub fn from_config(
		name: &str,
		n: Option<u32>,
		k: Option<u32>,
		personalization: Option<&str>,
	) -> Result<Algorithm, Error> {
		match name {
			"equihash" => {
				let n = n.unwrap_or(200);
				let k = k.unwrap_or(9);
				match (n, k) {
					(144, 5) | (192, 7) | (200, 9) => {}
					_ => return Err(Error::UnsupportedAlgorithm(format!("equihash {}/{}", n, k))),
				}
				Ok(Algorithm::Equihash {
					n,
					k,
					personalization: personalization.unwrap_or("ZcashPoW").to_string(),
				})
			}
			"verushash" => Ok(Algorithm::Verushash),
			other => Err(Error::UnsupportedAlgorithm(other.to_string())),
		}
	}

	/// Expected length in hex characters of a submitted solution, length
	/// prefix included. None for VerusHash, whose solutions are
	/// variant-defined.
	pub fn solution_hex_length(&self) -> Option<usize> {
		match *self {
			Algorithm::Equihash { n, k, .. } => {
				let body = equihash::solution_bytes(n, k);
				let prefix = if body < 0xfd { 1 } else { 3 };
				Some(2 * (body + prefix))
			}
			Algorithm::Verushash => None,
		}
	}

	/// Share difficulty multiplier applied on top of diff1 normalization.
	pub fn multiplier(&self) -> f64 {
		1.0
	}
}

/// A resolved proof-of-work variant: how to verify solutions and how to
/// hash headers, plus where the solution body starts within the submitted
/// solution hex.
pub struct PowVariant {
	/// Variant name, for logs.
	pub name: String,
	/// Solution verifier.
	pub verifier: Arc<dyn Verifier>,
	/// Header hash function.
	pub hasher: Arc<dyn HeaderHasher>,
	/// Offset in hex characters where the solution body starts (skips the
	/// compact-size length prefix when the encoding carries one).
	pub solution_slice_offset: usize,
}

/// Registry of proof-of-work variants for the configured algorithm.
/// Equihash registers itself; VerusHash variants come from the embedder.
pub struct PowRegistry {
	algorithm: Algorithm,
	variants: HashMap<String, PowVariant>,
}

impl PowRegistry {
	/// Builds a registry for the algorithm, wiring in the built-in
	/// Equihash verifier when applicable.
	pub fn new(algorithm: Algorithm) -> PowRegistry {
		let mut registry = PowRegistry {
			algorithm: algorithm.clone(),
			variants: HashMap::new(),
		};
		if let Algorithm::Equihash {
			n,
			k,
			ref personalization,
		} = algorithm
		{
			let body = equihash::solution_bytes(n, k);
			let prefix_hex = if body < 0xfd { 2 } else { 6 };
			registry.register(PowVariant {
				name: "equihash".to_string(),
				verifier: Arc::new(EquihashVerifier::new(n, k, personalization)),
				hasher: Arc::new(DoubleSha256),
				solution_slice_offset: prefix_hex,
			});
		}
		registry
	}

	/// Registers (or replaces) a variant under its name.
	pub fn register(&mut self, variant: PowVariant) {
		debug!("registering pow variant {}", variant.name);
		self.variants.insert(variant.name.clone(), variant);
	}

	/// Whether any variant is available at all. A pool configured for an
	/// algorithm with an empty registry must refuse to start.
	pub fn is_empty(&self) -> bool {
		self.variants.is_empty()
	}

	/// The algorithm this registry serves.
	pub fn algorithm(&self) -> &Algorithm {
		&self.algorithm
	}

	/// Selects the variant for a block, per the
	/// (algorithm, solution version, block version) tuple.
	pub fn select(
		&self,
		block_version: u32,
		solution_version: Option<u8>,
	) -> Result<&PowVariant, Error> {
		let key = match self.algorithm {
			Algorithm::Equihash { .. } => "equihash",
			Algorithm::Verushash => {
				if block_version <= 4 {
					"verushash_v1"
				} else {
					match solution_version {
						None => "verushash_2b",
						Some(3) => "verushash_2b1",
						Some(_) => "verushash_2b2",
					}
				}
			}
		};
		self.variants
			.get(key)
			.ok_or_else(|| Error::MissingVerifier(key.to_string()))
	}
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn solution_lengths_match_known_algorithms() {
		let algo = |n, k| Algorithm::Equihash {
			n,
			k,
			personalization: "ZcashPoW".to_string(),
		};
		assert_eq!(algo(144, 5).solution_hex_length(), Some(202));
		assert_eq!(algo(192, 7).solution_hex_length(), Some(806));
		assert_eq!(algo(200, 9).solution_hex_length(), Some(2694));
		assert_eq!(Algorithm::Verushash.solution_hex_length(), None);
	}

	#[test]
	fn rejects_unknown_algorithm() {
		assert!(Algorithm::from_config("scrypt", None, None, None).is_err());
		assert!(Algorithm::from_config("equihash", Some(125), Some(4), None).is_err());
	}

	#[test]
	fn equihash_registry_selects_builtin() {
		let algo = Algorithm::from_config("equihash", Some(200), Some(9), None).unwrap();
		let registry = PowRegistry::new(algo);
		assert!(!registry.is_empty());
		let variant = registry.select(4, None).unwrap();
		assert_eq!(variant.name, "equihash");
		assert_eq!(variant.solution_slice_offset, 6);
	}

	#[test]
	fn verushash_registry_starts_empty() {
		let registry = PowRegistry::new(Algorithm::Verushash);
		assert!(registry.is_empty());
		assert!(registry.select(4, None).is_err());
	}

	#[test]
	fn verushash_variant_selection() {
		let mut registry = PowRegistry::new(Algorithm::Verushash);
		for name in &[
			"verushash_v1",
			"verushash_2b",
			"verushash_2b1",
			"verushash_2b2",
		] {
			struct Nothing;
			impl Verifier for Nothing {
				fn verify(&self, _: &[u8], _: &[u8]) -> bool {
					false
				}
			}
			registry.register(PowVariant {
				name: name.to_string(),
				verifier: Arc::new(Nothing),
				hasher: Arc::new(DoubleSha256),
				solution_slice_offset: if name.len() > 12 { 2 } else { 0 },
			});
		}
		assert_eq!(registry.select(4, None).unwrap().name, "verushash_v1");
		assert_eq!(registry.select(5, None).unwrap().name, "verushash_2b");
		assert_eq!(registry.select(5, Some(3)).unwrap().name, "verushash_2b1");
		assert_eq!(registry.select(5, Some(7)).unwrap().name, "verushash_2b2");
	}
}
