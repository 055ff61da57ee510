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

//! Turns daemon block templates into live mining jobs and validates the
//! shares miners send back. Template intake is serialized by the owner;
//! every client always works on a current, valid job.

use num::ToPrimitive;
use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::core::consensus;
use crate::core::core::block::{self, JobTemplate};
use crate::core::core::template::RpcData;
use crate::core::libtx::CoinbasePlan;
use crate::core::pow::PowRegistry;
use crate::util;

use crate::common::types::ShareEvent;

/// Clean jobs are rate limited to one per this interval so miners are not
/// asked to restart more often than the network justifies.
const CLEAN_JOB_INTERVAL: Duration = Duration::from_secs(15);

/// How long a processed template's identity is remembered to suppress
/// duplicate streamed daemon responses.
const DEDUP_TTL: Duration = Duration::from_secs(15);

/// Share acceptance tolerance. Share difficulty is computed through f64,
/// which loses precision above 2^53, so a share is allowed to undershoot
/// its assigned difficulty by one percent.
const SHARE_TOLERANCE: f64 = 0.99;

/// What the job manager's owner hears about job transitions. Invoked by
/// the owner after the manager's lock is released, never from inside the
/// intake itself, so handlers are free to take other locks.
pub trait JobHandler: Send + Sync {
	/// A new block appeared; all previous jobs were evicted.
	fn new_block(&self, job: &JobSummary);
	/// The current job was refreshed. `clean` tells miners to restart.
	fn updated_block(&self, job: &JobSummary, clean: bool);
}

/// What happened to a processed template.
pub enum TemplateOutcome {
	/// The template started a new block; previous jobs were evicted.
	NewBlock(JobSummary),
	/// The template refreshed the current height.
	Updated(JobSummary, bool),
	/// Stale, duplicate or already seen; nothing changed.
	Ignored,
}

impl TemplateOutcome {
	/// Routes the outcome to a handler. Call this with no locks held.
	pub fn dispatch(&self, handler: &dyn JobHandler) {
		match self {
			TemplateOutcome::NewBlock(summary) => handler.new_block(summary),
			TemplateOutcome::Updated(summary, clean) => handler.updated_block(summary, *clean),
			TemplateOutcome::Ignored => {}
		}
	}
}

/// The slice of a job the stratum server needs to notify miners.
#[derive(Debug, Clone)]
pub struct JobSummary {
	/// Job id.
	pub job_id: String,
	/// Job height.
	pub height: u64,
	/// Network difficulty of the job.
	pub difficulty: f64,
	/// Cached `mining.notify` params (clean flag excluded).
	pub notify_params: Vec<String>,
}

/// Share validation policy knobs from the pool configuration.
#[derive(Debug, Clone, Default)]
pub struct JobPolicy {
	/// Credit shares whose job has been evicted.
	pub accept_old_job_shares: bool,
	/// Credit shares below their assigned difficulty.
	pub accept_low_diff_shares: bool,
	/// Attach block hashes to rejected-share events as well.
	pub emit_invalid_block_hashes: bool,
}

/// A miner's submission, normalized by the stratum server.
#[derive(Debug, Clone)]
pub struct ShareParams {
	/// Job id the miner worked on.
	pub job_id: String,
	/// Previously assigned difficulty, if a retarget is in flight.
	pub prev_diff: Option<f64>,
	/// Difficulty assigned to the client.
	pub diff: f64,
	/// Pool-assigned extranonce prefix, hex.
	pub extra_nonce1: String,
	/// Miner-chosen extranonce suffix, hex.
	pub extra_nonce2: String,
	/// Full 32-byte header nonce, hex.
	pub nonce: String,
	/// Header time, 8 hex chars little-endian.
	pub n_time: String,
	/// Submitted solution, hex, length prefix included.
	pub solution: String,
	/// Client address.
	pub remote_addr: String,
	/// Port the client is connected to.
	pub local_port: u16,
	/// Fully qualified worker name.
	pub worker: String,
}

/// The fully judged result of one submission.
pub struct ShareOutcome {
	/// Share event for downstream collectors, valid or not.
	pub event: ShareEvent,
	/// Serialized block when the share is a block candidate.
	pub block_hex: Option<String>,
	/// Stratum error tuple when the share was rejected.
	pub error: Option<(i32, String)>,
}

/// Owns the live jobs and the validation pipeline.
pub struct JobManager {
	registry: PowRegistry,
	plan: CoinbasePlan,
	policy: JobPolicy,
	job_counter: u32,
	current_job_id: Option<String>,
	jobs: HashMap<String, JobTemplate>,
	last_clean_job: Option<Instant>,
	dedup: HashMap<String, Instant>,
}

impl JobManager {
	/// Creates a job manager. No job exists until the first template is
	/// processed.
	pub fn new(registry: PowRegistry, plan: CoinbasePlan, policy: JobPolicy) -> JobManager {
		JobManager {
			registry,
			plan,
			policy,
			job_counter: 0,
			current_job_id: None,
			jobs: HashMap::new(),
			last_clean_job: None,
			dedup: HashMap::new(),
		}
	}

	/// Height of the current job, zero before the first template.
	pub fn current_height(&self) -> u64 {
		self.current_job().map(|j| j.height()).unwrap_or(0)
	}

	/// Summary of the current job for (re)broadcasting.
	pub fn current_summary(&self) -> Option<JobSummary> {
		self.current_job().map(summarize)
	}

	/// Whether the current job already builds on the given block hash
	/// (display hex), i.e. a notification for it needs no refresh.
	pub fn building_on(&self, block_hash: &str) -> bool {
		self.current_job()
			.map(|job| {
				job.rpc_data
					.previousblockhash
					.eq_ignore_ascii_case(block_hash)
			})
			.unwrap_or(false)
	}

	fn current_job(&self) -> Option<&JobTemplate> {
		self.current_job_id.as_ref().and_then(|id| self.jobs.get(id))
	}

	fn next_job_id(&mut self) -> String {
		self.job_counter = self.job_counter.wrapping_add(1);
		format!("{:x}", self.job_counter)
	}

	/// Processes one template from a daemon. The returned outcome tells
	/// the caller what, if anything, must be broadcast.
	pub fn process_template(&mut self, rpc_data: RpcData) -> Result<TemplateOutcome, block::Error> {
		self.process_template_at(rpc_data, Instant::now())
	}

	/// As `process_template` with an explicit clock, for tests.
	pub fn process_template_at(
		&mut self,
		rpc_data: RpcData,
		now: Instant,
	) -> Result<TemplateOutcome, block::Error> {
		// identical streamed responses from several daemons collapse here
		self.dedup.retain(|_, at| now.duration_since(*at) < DEDUP_TTL);
		let key = rpc_data.dedup_key();
		if self.dedup.contains_key(&key) {
			trace!("template {} already processed, skipping", key);
			return Ok(TemplateOutcome::Ignored);
		}
		self.dedup.insert(key, now);

		let job_id = self.next_job_id();
		let candidate = JobTemplate::new(job_id, rpc_data, &self.plan)?;

		let is_new_block = match self.current_job() {
			None => true,
			Some(current) => {
				if candidate.height() < current.height() {
					debug!(
						"discarding stale template at height {} (current {})",
						candidate.height(),
						current.height()
					);
					return Ok(TemplateOutcome::Ignored);
				}
				if !critical_fields_differ(current, &candidate) {
					trace!("duplicate template broadcast at height {}", candidate.height());
					return Ok(TemplateOutcome::Ignored);
				}
				candidate.height() != current.height()
			}
		};

		if is_new_block {
			self.jobs.clear();
			self.last_clean_job = Some(now);
			let summary = summarize(&candidate);
			info!(
				"new block to mine at height {}, job {}, difficulty {}",
				summary.height, summary.job_id, summary.difficulty
			);
			self.current_job_id = Some(candidate.job_id.clone());
			self.jobs.insert(candidate.job_id.clone(), candidate);
			return Ok(TemplateOutcome::NewBlock(summary));
		}

		Ok(self.apply_update(candidate, now))
	}

	/// Replaces the current job with a same-height refresh. Clean unless a
	/// clean job went out within the rate limit window.
	fn apply_update(&mut self, job: JobTemplate, now: Instant) -> TemplateOutcome {
		let mut clean = true;
		if let Some(last) = self.last_clean_job {
			if now.duration_since(last) < CLEAN_JOB_INTERVAL {
				clean = false;
			}
		}
		if clean {
			self.last_clean_job = Some(now);
		}
		let summary = summarize(&job);
		debug!(
			"job {} updates height {} (clean: {})",
			summary.job_id, summary.height, clean
		);
		self.current_job_id = Some(job.job_id.clone());
		// older jobs stay in the map so late submissions remain validatable
		self.jobs.insert(job.job_id.clone(), job);
		TemplateOutcome::Updated(summary, clean)
	}

	/// Runs the full validation pipeline over one submission.
	pub fn process_share(&mut self, params: &ShareParams) -> ShareOutcome {
		let (job_height, job_difficulty, block_reward) = match self.jobs.get(&params.job_id) {
			Some(job) => (
				job.height(),
				job.difficulty,
				job.rpc_data.coinbasevalue.unwrap_or(0),
			),
			None => {
				if self.policy.accept_old_job_shares {
					// nothing left to validate against; credit at the
					// assigned difficulty
					return accepted_event(params, 0, 0.0, 0, params.diff, None, false, None);
				}
				return rejected_event(params, 0, 0.0, 0, 21, "job not found".to_string());
			}
		};

		macro_rules! reject {
			($code:expr, $msg:expr) => {
				return rejected_event(
					params,
					job_height,
					job_difficulty,
					block_reward,
					$code,
					$msg.to_string(),
				)
			};
		}

		// ntime: exactly 8 hex chars, little-endian, equal to the template
		if params.n_time.len() != 8 || !util::is_hex(&params.n_time) {
			reject!(20, "invalid ntime");
		}
		let ntime_bytes = util::from_hex(params.n_time.clone()).unwrap();
		let ntime = u32::from_le_bytes([
			ntime_bytes[0],
			ntime_bytes[1],
			ntime_bytes[2],
			ntime_bytes[3],
		]);

		let job = self.jobs.get(&params.job_id).unwrap();
		if ntime != job.curtime() {
			reject!(20, "ntime out of range");
		}

		if params.nonce.len() != 64 || !util::is_hex(&params.nonce) {
			reject!(20, "incorrect size of nonce");
		}

		let variant = match self
			.registry
			.select(job.rpc_data.version, job.solution_version())
		{
			Ok(variant) => variant,
			Err(e) => {
				error!("share for job {} has no verifier: {}", params.job_id, e);
				reject!(20, "invalid solution version");
			}
		};

		if let Some(expected) = self.registry.algorithm().solution_hex_length() {
			if params.solution.len() != expected {
				reject!(20, "incorrect size of solution");
			}
		}
		if !util::is_hex(&params.solution) {
			reject!(20, "invalid hex in solution");
		}

		let offset = variant.solution_slice_offset;
		if let Some(ref job_solution) = job.rpc_data.solution {
			let have = params.solution.get(offset..offset + 8);
			let want = job_solution.get(0..8);
			match (have, want) {
				(Some(have), Some(want)) if have.eq_ignore_ascii_case(want) => {}
				_ => reject!(22, "invalid solution version"),
			}
		}

		if !util::is_hex(&params.extra_nonce2) {
			reject!(20, "invalid hex in extra_nonce2");
		}

		let nonce_bytes = util::from_hex(params.nonce.clone()).unwrap();
		let header = {
			let job = self.jobs.get(&params.job_id).unwrap();
			match job.header_bytes(&ntime_bytes, &nonce_bytes) {
				Ok(header) => header,
				Err(e) => {
					error!("header serialization failed: {}", e);
					reject!(20, "invalid share");
				}
			}
		};
		let header_hex = util::to_hex(header.clone());

		// duplicate guard must mutate the job, hence the re-borrow
		{
			let job = self.jobs.get_mut(&params.job_id).unwrap();
			if !job.register_submit(&header_hex, &params.solution) {
				reject!(22, "duplicate share");
			}
		}
		let job = self.jobs.get(&params.job_id).unwrap();

		// PBaaS blocks embed the daemon's nonce; the pool's extranonce must
		// come back inside the solution instead
		if job.solution_version().unwrap_or(0) > 6 {
			let tail_at = params.solution.len().saturating_sub(30);
			let tail = &params.solution[tail_at..];
			if !tail
				.to_lowercase()
				.contains(&params.extra_nonce1.to_lowercase())
			{
				reject!(20, "invalid solution, pool nonce missing");
			}
		}

		let variant = self
			.registry
			.select(job.rpc_data.version, job.solution_version())
			.unwrap();
		let solution_body =
			util::from_hex(params.solution.get(offset..).unwrap_or("").to_string()).unwrap();
		if !variant.verifier.verify(&header, &solution_body) {
			reject!(20, "invalid solution");
		}

		let solution_bytes = util::from_hex(params.solution.clone()).unwrap();
		let mut header_with_solution = header.clone();
		header_with_solution.extend_from_slice(&solution_bytes);
		let header_hash = variant.hasher.hash(&header_with_solution);
		let hash_value = header_hash.to_biguint();

		let multiplier = self.registry.algorithm().multiplier();
		let hash_f = hash_value.to_f64().unwrap_or(0.0);
		let share_difficulty = if hash_f > 0.0 {
			consensus::diff1().to_f64().unwrap() / hash_f * multiplier
		} else {
			f64::INFINITY
		};

		let is_block = hash_value <= job.target;
		let block_only_merged = !is_block && hash_value <= job.merged_target;

		if is_block || block_only_merged {
			let block_hash = format!("{}", header_hash);
			let block_hex = match job.block_hex(&header, &solution_bytes) {
				Ok(hex) => hex,
				Err(e) => {
					error!("block serialization failed: {}", e);
					reject!(20, "invalid share");
				}
			};
			info!(
				"block candidate {} found at height {} by {}",
				block_hash,
				job.height(),
				params.worker
			);
			return accepted_event(
				params,
				job_height,
				job_difficulty,
				block_reward,
				share_difficulty,
				Some(block_hash),
				block_only_merged,
				Some(block_hex),
			);
		}

		// plain share: must reach the assigned difficulty, allowing for the
		// documented tolerance and an in-flight vardiff retarget
		if share_difficulty / params.diff < SHARE_TOLERANCE {
			let prev_ok = params
				.prev_diff
				.map(|prev| share_difficulty >= prev)
				.unwrap_or(false);
			if prev_ok {
				return accepted_event(
					params,
					job_height,
					job_difficulty,
					block_reward,
					share_difficulty,
					None,
					false,
					None,
				);
			}
			if !self.policy.accept_low_diff_shares {
				let block_hash = if self.policy.emit_invalid_block_hashes {
					Some(format!("{}", header_hash))
				} else {
					None
				};
				let mut outcome = rejected_event(
					params,
					job_height,
					job_difficulty,
					block_reward,
					23,
					format!("low difficulty share of {}", share_difficulty),
				);
				outcome.event.share_difficulty = share_difficulty;
				outcome.event.block_hash = block_hash;
				return outcome;
			}
		}

		accepted_event(
			params,
			job_height,
			job_difficulty,
			block_reward,
			share_difficulty,
			None,
			false,
			None,
		)
	}
}

fn summarize(job: &JobTemplate) -> JobSummary {
	JobSummary {
		job_id: job.job_id.clone(),
		height: job.height(),
		difficulty: job.difficulty,
		notify_params: job.notify_params().to_vec(),
	}
}

fn critical_fields_differ(current: &JobTemplate, candidate: &JobTemplate) -> bool {
	let solution_prefix = |job: &JobTemplate| {
		job.rpc_data
			.solution
			.as_ref()
			.and_then(|s| s.get(0..8).map(|p| p.to_string()))
	};
	current.prev_hash_le != candidate.prev_hash_le
		|| current.merkle_root_le != candidate.merkle_root_le
		|| current.final_sapling_root_le != candidate.final_sapling_root_le
		|| current.bits_le != candidate.bits_le
		|| solution_prefix(current) != solution_prefix(candidate)
}

fn base_event(params: &ShareParams, height: u64, block_difficulty: f64, reward: u64) -> ShareEvent {
	ShareEvent {
		worker: params.worker.clone(),
		ip: params.remote_addr.clone(),
		port: params.local_port,
		height,
		block_reward: reward,
		difficulty: params.diff,
		share_difficulty: 0.0,
		block_difficulty,
		is_valid_share: false,
		is_valid_block: false,
		block_only_merged: false,
		block_hash: None,
		tx_hash: None,
		error: None,
	}
}

fn accepted_event(
	params: &ShareParams,
	height: u64,
	block_difficulty: f64,
	reward: u64,
	share_difficulty: f64,
	block_hash: Option<String>,
	block_only_merged: bool,
	block_hex: Option<String>,
) -> ShareOutcome {
	let mut event = base_event(params, height, block_difficulty, reward);
	event.is_valid_share = true;
	event.is_valid_block = block_hash.is_some() && !block_only_merged;
	event.block_only_merged = block_only_merged;
	event.share_difficulty = share_difficulty;
	event.block_hash = block_hash;
	ShareOutcome {
		event,
		block_hex,
		error: None,
	}
}

fn rejected_event(
	params: &ShareParams,
	height: u64,
	block_difficulty: f64,
	reward: u64,
	code: i32,
	message: String,
) -> ShareOutcome {
	let mut event = base_event(params, height, block_difficulty, reward);
	event.error = Some((code, message.clone()));
	ShareOutcome {
		event,
		block_hex: None,
		error: Some((code, message)),
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::core::core::hash::{dsha256, Hash};
	use crate::core::core::template::TemplateTx;
	use crate::core::libtx::RewardRecipient;
	use crate::core::pow::{Algorithm, DoubleSha256, HeaderHasher, PowVariant, Verifier};
	use num_bigint::BigUint;
	use std::sync::Arc;

	fn is_new(outcome: &TemplateOutcome) -> bool {
		match outcome {
			TemplateOutcome::NewBlock(_) => true,
			_ => false,
		}
	}

	fn is_ignored(outcome: &TemplateOutcome) -> bool {
		match outcome {
			TemplateOutcome::Ignored => true,
			_ => false,
		}
	}

	fn update_clean(outcome: &TemplateOutcome) -> Option<bool> {
		match outcome {
			TemplateOutcome::Updated(_, clean) => Some(*clean),
			_ => None,
		}
	}

	struct OkVerifier;
	impl Verifier for OkVerifier {
		fn verify(&self, _: &[u8], _: &[u8]) -> bool {
			true
		}
	}

	struct FailVerifier;
	impl Verifier for FailVerifier {
		fn verify(&self, _: &[u8], _: &[u8]) -> bool {
			false
		}
	}

	struct FixedHasher(Hash);
	impl HeaderHasher for FixedHasher {
		fn hash(&self, _: &[u8]) -> Hash {
			self.0
		}
	}

	fn hash_of(value: &BigUint) -> Hash {
		let mut bytes = value.to_bytes_le();
		bytes.resize(32, 0);
		Hash::from_vec(&bytes)
	}

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

	fn registry_with(
		key: &str,
		verifier: Arc<dyn Verifier>,
		hasher: Arc<dyn HeaderHasher>,
		offset: usize,
	) -> PowRegistry {
		let mut registry = PowRegistry::new(Algorithm::Verushash);
		registry.register(PowVariant {
			name: key.to_string(),
			verifier,
			hasher,
			solution_slice_offset: offset,
		});
		registry
	}

	fn template(height: u64, prev_suffix: u8, curtime: u32) -> RpcData {
		RpcData {
			height,
			previousblockhash: format!("{:064x}", prev_suffix),
			transactions: vec![],
			curtime,
			bits: "1d00ffff".to_string(),
			// a hard target so ordinary shares are not block candidates
			target: format!("{:0>64}", "7ffffffffffffffffffffff"),
			version: 5,
			solution: None,
			coinbasetxn: None,
			finalsaplingroothash: None,
			merged_bits: None,
			coinbasevalue: Some(625_000_000),
		}
	}

	fn manager_with(registry: PowRegistry, policy: JobPolicy) -> JobManager {
		JobManager::new(registry, plan(), policy)
	}

	fn share(job_id: &str, curtime: u32) -> ShareParams {
		ShareParams {
			job_id: job_id.to_string(),
			prev_diff: None,
			diff: 1.0,
			extra_nonce1: "1c000001".to_string(),
			extra_nonce2: "01020304".to_string(),
			nonce: format!("1c00000101020304{:048x}", 0),
			n_time: util::to_hex(curtime.to_le_bytes().to_vec()),
			solution: "0011223344556677".to_string(),
			remote_addr: "10.0.0.9".to_string(),
			local_port: 3032,
			worker: "t1PoolAddr.rig1".to_string(),
		}
	}

	fn default_registry(share_difficulty: f64) -> PowRegistry {
		// a hash whose normalized difficulty is exactly share_difficulty
		let value = if share_difficulty == 2.0 {
			consensus::diff1() / BigUint::from(2u32)
		} else {
			consensus::diff1() * BigUint::from(2u32)
		};
		registry_with(
			"verushash_2b",
			Arc::new(OkVerifier),
			Arc::new(FixedHasher(hash_of(&value))),
			0,
		)
	}

	#[test]
	fn first_template_becomes_new_block() {
		let mut manager = manager_with(default_registry(2.0), JobPolicy::default());
		let outcome = manager.process_template(template(100, 1, 600)).unwrap();
		assert!(is_new(&outcome));
		assert_eq!(manager.current_height(), 100);
	}

	#[test]
	fn stale_template_is_discarded() {
		let mut manager = manager_with(default_registry(2.0), JobPolicy::default());
		manager.process_template(template(100, 1, 600)).unwrap();
		let outcome = manager.process_template(template(99, 2, 601)).unwrap();
		assert!(is_ignored(&outcome));
		assert_eq!(manager.current_height(), 100);
	}

	#[test]
	fn identical_critical_fields_are_duplicate_broadcasts() {
		let mut manager = manager_with(default_registry(2.0), JobPolicy::default());
		manager.process_template(template(100, 1, 600)).unwrap();
		// same prev hash and merkle inputs, only curtime moved
		let outcome = manager.process_template(template(100, 1, 601)).unwrap();
		assert!(is_ignored(&outcome));
	}

	#[test]
	fn streamed_duplicates_hit_the_dedup_cache() {
		let mut manager = manager_with(default_registry(2.0), JobPolicy::default());
		let now = Instant::now();
		let first = manager
			.process_template_at(template(100, 1, 600), now)
			.unwrap();
		assert!(is_new(&first));
		let again = manager
			.process_template_at(template(100, 1, 600), now + Duration::from_secs(1))
			.unwrap();
		assert!(is_ignored(&again));
	}

	#[test]
	fn same_height_update_is_rate_limited_to_non_clean() {
		let mut manager = manager_with(default_registry(2.0), JobPolicy::default());
		let now = Instant::now();
		let adopted = manager
			.process_template_at(template(100, 1, 600), now)
			.unwrap();
		assert!(is_new(&adopted));

		// new transactions change the merkle root
		let mut refresh = template(100, 1, 610);
		refresh.transactions = vec![TemplateTx {
			data: "0100".to_string(),
			hash: format!("{:064x}", 0xabu8),
			fee: None,
		}];
		let update = manager
			.process_template_at(refresh.clone(), now + Duration::from_secs(5))
			.unwrap();
		// within 15s of the clean new-block job
		assert_eq!(update_clean(&update), Some(false));

		refresh.curtime = 630;
		refresh.transactions.push(TemplateTx {
			data: "0200".to_string(),
			hash: format!("{:064x}", 0xcdu8),
			fee: None,
		});
		let update = manager
			.process_template_at(refresh, now + Duration::from_secs(25))
			.unwrap();
		// past the rate limit again
		assert_eq!(update_clean(&update), Some(true));
	}

	#[test]
	fn share_happy_path() {
		let mut manager = manager_with(default_registry(2.0), JobPolicy::default());
		manager.process_template(template(100, 1, 600)).unwrap();
		let mut params = share("1", 600);
		params.diff = 2.0;
		let outcome = manager.process_share(&params);
		assert!(outcome.error.is_none());
		assert!(outcome.event.is_valid_share);
		assert!(!outcome.event.is_valid_block);
		assert!(outcome.block_hex.is_none());
		assert_eq!(outcome.event.height, 100);
		assert_eq!(outcome.event.block_reward, 625_000_000);
		assert!((outcome.event.share_difficulty - 2.0).abs() < 1e-6);
	}

	#[test]
	fn unknown_job_is_rejected_unless_old_shares_accepted() {
		let mut manager = manager_with(default_registry(2.0), JobPolicy::default());
		manager.process_template(template(100, 1, 600)).unwrap();
		let outcome = manager.process_share(&share("nope", 600));
		assert_eq!(outcome.error, Some((21, "job not found".to_string())));

		let mut policy = JobPolicy::default();
		policy.accept_old_job_shares = true;
		let mut manager = manager_with(default_registry(2.0), policy);
		manager.process_template(template(100, 1, 600)).unwrap();
		let outcome = manager.process_share(&share("nope", 600));
		assert!(outcome.error.is_none());
		assert!(outcome.event.is_valid_share);
	}

	#[test]
	fn ntime_must_match_template_exactly() {
		let mut manager = manager_with(default_registry(2.0), JobPolicy::default());
		manager.process_template(template(100, 1, 600)).unwrap();

		let mut params = share("1", 600);
		params.n_time = "00".to_string();
		let outcome = manager.process_share(&params);
		assert_eq!(outcome.error, Some((20, "invalid ntime".to_string())));

		// one off the template curtime
		let params = share("1", 601);
		let outcome = manager.process_share(&params);
		assert_eq!(outcome.error, Some((20, "ntime out of range".to_string())));
	}

	#[test]
	fn nonce_must_be_64_hex_chars() {
		let mut manager = manager_with(default_registry(2.0), JobPolicy::default());
		manager.process_template(template(100, 1, 600)).unwrap();
		let mut params = share("1", 600);
		params.nonce.pop();
		let outcome = manager.process_share(&params);
		assert_eq!(
			outcome.error,
			Some((20, "incorrect size of nonce".to_string()))
		);
	}

	#[test]
	fn duplicate_share_credited_once() {
		let mut manager = manager_with(default_registry(2.0), JobPolicy::default());
		manager.process_template(template(100, 1, 600)).unwrap();
		let mut params = share("1", 600);
		params.diff = 2.0;
		let first = manager.process_share(&params);
		let second = manager.process_share(&params);
		assert!(first.event.is_valid_share);
		assert_eq!(second.error, Some((22, "duplicate share".to_string())));
		assert!(!second.event.is_valid_share);
	}

	#[test]
	fn low_difficulty_share_paths() {
		// hash decodes to exactly half of diff1
		let mut manager = manager_with(default_registry(0.5), JobPolicy::default());
		manager.process_template(template(100, 1, 600)).unwrap();

		let params = share("1", 600);
		let outcome = manager.process_share(&params);
		assert_eq!(
			outcome.error,
			Some((23, "low difficulty share of 0.5".to_string()))
		);

		// a vardiff retarget in flight rescues the share
		let mut params = share("1", 600);
		params.nonce = format!("{:064x}", 2);
		params.prev_diff = Some(0.4);
		let outcome = manager.process_share(&params);
		assert!(outcome.error.is_none());

		// or the pool can be configured to take anything
		let mut policy = JobPolicy::default();
		policy.accept_low_diff_shares = true;
		let mut manager = manager_with(default_registry(0.5), policy);
		manager.process_template(template(100, 1, 600)).unwrap();
		let outcome = manager.process_share(&share("1", 600));
		assert!(outcome.error.is_none());
	}

	#[test]
	fn share_at_tolerance_boundary() {
		// share difficulty exactly half of assigned 0.505 -> ratio 0.99..
		let mut manager = manager_with(default_registry(0.5), JobPolicy::default());
		manager.process_template(template(100, 1, 600)).unwrap();

		// 0.5 / 0.505 = 0.9901, just inside the tolerance
		let mut params = share("1", 600);
		params.diff = 0.505;
		let outcome = manager.process_share(&params);
		assert!(outcome.error.is_none());

		// 0.5 / 0.5102 = 0.98, just outside
		let mut params = share("1", 600);
		params.nonce = format!("{:064x}", 3);
		params.diff = 0.5102;
		let outcome = manager.process_share(&params);
		assert_eq!(outcome.error.as_ref().map(|e| e.0), Some(23));
	}

	#[test]
	fn invalid_solution_is_rejected() {
		let registry = registry_with(
			"verushash_2b",
			Arc::new(FailVerifier),
			Arc::new(DoubleSha256),
			0,
		);
		let mut manager = manager_with(registry, JobPolicy::default());
		manager.process_template(template(100, 1, 600)).unwrap();
		let outcome = manager.process_share(&share("1", 600));
		assert_eq!(outcome.error, Some((20, "invalid solution".to_string())));
	}

	#[test]
	fn solution_version_prefix_must_match_job() {
		let registry = registry_with(
			"verushash_2b1",
			Arc::new(OkVerifier),
			Arc::new(DoubleSha256),
			2,
		);
		let mut manager = manager_with(registry, JobPolicy::default());
		let mut data = template(100, 1, 600);
		data.solution = Some(format!("03000000{}", "ab".repeat(40)));
		manager.process_template(data).unwrap();

		let mut params = share("1", 600);
		// solution version at offset 2 disagrees with the job's
		params.solution = format!("fd04000000{}", "cd".repeat(40));
		let outcome = manager.process_share(&params);
		assert_eq!(
			outcome.error,
			Some((22, "invalid solution version".to_string()))
		);

		let mut params = share("1", 600);
		params.solution = format!("fd03000000{}", "cd".repeat(40));
		// a real double-sha256 hash lands far above diff1, so target a
		// difficulty low enough for the share to clear
		params.diff = 1e-60;
		let outcome = manager.process_share(&params);
		assert!(outcome.error.is_none());
	}

	#[test]
	fn pbaas_solutions_must_embed_pool_nonce() {
		let registry = registry_with(
			"verushash_2b2",
			Arc::new(OkVerifier),
			Arc::new(DoubleSha256),
			2,
		);
		let mut manager = manager_with(registry, JobPolicy::default());
		let mut data = template(100, 1, 600);
		data.solution = Some(format!("07000000{}", "ab".repeat(40)));
		manager.process_template(data).unwrap();

		let mut params = share("1", 600);
		params.solution = format!("fd07000000{}", "cd".repeat(40));
		let outcome = manager.process_share(&params);
		assert_eq!(
			outcome.error,
			Some((20, "invalid solution, pool nonce missing".to_string()))
		);

		// same share with the extranonce inside the last 15 bytes
		let mut params = share("1", 600);
		params.solution = format!(
			"fd07000000{}{}0000000000",
			"cd".repeat(30),
			params.extra_nonce1
		);
		params.diff = 1e-60;
		let outcome = manager.process_share(&params);
		assert!(outcome.error.is_none());
	}

	#[test]
	fn block_candidate_produces_serialized_block() {
		// an easy target makes every share a block
		let registry = registry_with(
			"verushash_2b",
			Arc::new(OkVerifier),
			Arc::new(DoubleSha256),
			0,
		);
		let mut manager = manager_with(registry, JobPolicy::default());
		let mut data = template(100, 1, 600);
		data.target = "f".repeat(64);
		manager.process_template(data).unwrap();

		let params = share("1", 600);
		let outcome = manager.process_share(&params);
		assert!(outcome.error.is_none());
		assert!(outcome.event.is_valid_block);
		let block_hex = outcome.block_hex.expect("serialized block");

		// the reported block hash is the double-sha256 of header plus
		// solution, displayed in reversed byte order
		let header_plus_solution = util::from_hex(block_hex[0..296].to_string()).unwrap();
		let expected = format!("{}", dsha256(&header_plus_solution));
		assert_eq!(outcome.event.block_hash, Some(expected));
	}
}
