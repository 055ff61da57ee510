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

//! Pool server implementation: boots the components in dependency order,
//! glues them with adapters and acts as a facade. Owns the share-to-block
//! submission path and the block acceptance check.

use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::core::core::hash::Hash;
use crate::core::core::template::RpcData;
use crate::core::libtx::{CoinbasePlan, RewardRecipient};
use crate::core::pow::{Algorithm, PowRegistry};
use crate::p2p;
use crate::rpc::types::{
	self, GetBlock, GetBlockSubsidy, GetInfo, GetMiningInfo, PeerInfo, ValidateAddress,
};
use crate::rpc::DaemonClient;
use crate::util;
use crate::util::{Mutex, RwLock, StopState};

use crate::common::adapters::{
	JobToServerAdapter, LogShareHandler, PeerToPoolAdapter, ServerToPoolAdapter, ShareHandler,
};
use crate::common::stats::PoolStats;
use crate::common::types::{Error, PoolConfig, ShareEvent};
use crate::mining::job_manager::{JobManager, JobPolicy};
use crate::mining::stratumserver::{StratumServer, Worker};

/// The getblocktemplate error code daemons answer with while still
/// downloading blocks.
const ERR_CLIENT_IN_INITIAL_DOWNLOAD: i64 = -10;
/// The getblocktemplate error code while verifying already known blocks.
const ERR_CLIENT_SYNCING: i64 = -9;

/// Chain facts probed from the daemons at startup.
#[derive(Debug, Clone, Default)]
pub struct PoolInfo {
	/// Whether the daemons run a testnet chain.
	pub is_testnet: bool,
	/// Proof-of-stake coin; requires a wallet-owned pool address.
	pub is_pos: bool,
	/// Whether the daemon knows the submitblock method.
	pub has_submit_method: bool,
	/// Daemon protocol version, advertised on the P2P handshake.
	pub protocol_version: u32,
	/// Chain height at startup.
	pub start_height: u64,
	/// Network difficulty at startup, multiplier applied.
	pub initial_difficulty: f64,
	/// Network solution rate, when reported.
	pub network_sols: f64,
}

/// Pool server holding internal structures together.
pub struct Server {
	/// Server config.
	pub config: PoolConfig,
	/// Probed chain facts.
	pub info: PoolInfo,
	client: DaemonClient,
	job_manager: Arc<RwLock<JobManager>>,
	job_handler: Arc<JobToServerAdapter>,
	stratum: Arc<StratumServer>,
	stats: Arc<RwLock<PoolStats>>,
	stop_state: Arc<StopState>,
	submitted_blocks: Mutex<HashSet<String>>,
	authorized_addresses: Mutex<HashMap<String, bool>>,
	share_handlers: Mutex<Vec<Arc<dyn ShareHandler>>>,
	threads: Mutex<Vec<JoinHandle<()>>>,
}

impl Server {
	/// Boots a pool worker with the built-in proof-of-work registry for
	/// the configured algorithm.
	pub fn start(config: PoolConfig) -> Result<Arc<Server>, Error> {
		let algorithm = Algorithm::from_config(
			&config.coin.algorithm,
			config.coin.parameters.n,
			config.coin.parameters.k,
			config.coin.parameters.personalization.as_deref(),
		)?;
		Server::start_with_registry(config, PowRegistry::new(algorithm))
	}

	/// Boots a pool worker with a caller-supplied registry, the hook for
	/// embedders providing VerusHash primitives.
	pub fn start_with_registry(
		config: PoolConfig,
		registry: PowRegistry,
	) -> Result<Arc<Server>, Error> {
		config.validate()?;
		if registry.is_empty() {
			return Err(Error::Configuration(format!(
				"unsupported algorithm: no verifier available for {}",
				config.coin.algorithm
			)));
		}

		let stop_state = Arc::new(StopState::new());
		let client = DaemonClient::new(config.daemons.clone())?;

		// every daemon must answer getinfo before anything else starts
		let infos = client.check_online()?;
		info!("all {} daemons online", infos.len());

		// one batch probe against the primary daemon decides chain facts
		let (info, plan) = probe_chain(&client, &config, &registry)?;
		info!(
			"chain probe: testnet={} pos={} submitblock={} protocol={} height={} difficulty={}",
			info.is_testnet,
			info.is_pos,
			info.has_submit_method,
			info.protocol_version,
			info.start_height,
			info.initial_difficulty
		);

		let job_adapter = Arc::new(JobToServerAdapter::new());
		let policy = JobPolicy {
			accept_old_job_shares: config.accept_old_job_shares,
			accept_low_diff_shares: config.accept_low_diff_shares,
			emit_invalid_block_hashes: config.emit_invalid_block_hashes,
		};
		let job_manager = Arc::new(RwLock::new(JobManager::new(registry, plan, policy)));

		// block until the daemon finishes syncing, then adopt the first
		// template. Nobody is connected yet, so the outcome needs no
		// broadcast.
		let mut first_template = wait_for_sync(&client, &stop_state)?;
		if first_template.coinbasevalue.is_none() && first_template.coinbasetxn.is_none() {
			first_template.coinbasevalue =
				Some(block_subsidy(&client, first_template.height).map_err(Error::Rpc)?);
		}
		let _ = job_manager.write().process_template(first_template)?;

		let stats = Arc::new(RwLock::new(PoolStats::default()));
		let server_adapter = Arc::new(ServerToPoolAdapter::new());
		let stratum = Arc::new(StratumServer::new(
			config.clone(),
			job_manager.clone(),
			server_adapter.clone(),
			stats.clone(),
			stop_state.clone(),
		)?);
		job_adapter.init(Arc::downgrade(&stratum));

		let server = Arc::new(Server {
			info: info.clone(),
			client,
			job_manager,
			job_handler: job_adapter,
			stratum: stratum.clone(),
			stats,
			stop_state: stop_state.clone(),
			submitted_blocks: Mutex::new(HashSet::new()),
			authorized_addresses: Mutex::new(HashMap::new()),
			share_handlers: Mutex::new(vec![Arc::new(LogShareHandler)]),
			threads: Mutex::new(Vec::new()),
			config,
		});
		server_adapter.init(Arc::downgrade(&server));

		let mut threads = Vec::new();

		let stratum_thread = thread::Builder::new()
			.name("stratum-server".to_string())
			.spawn(move || {
				if let Err(e) = StratumServer::run_loop(stratum) {
					error!("stratum server failed: {:?}", e);
				}
			})?;
		threads.push(stratum_thread);

		if server.config.block_refresh_interval > 0 {
			let poller = server.clone();
			let interval = Duration::from_millis(server.config.block_refresh_interval);
			let poll_thread = thread::Builder::new()
				.name("block-poller".to_string())
				.spawn(move || {
					// cheap height poll; the rebroadcast timer covers
					// transaction-only refreshes
					while !poller.stop_state.is_stopped() {
						thread::sleep(interval);
						match poller.client.call_primary("getblockcount", json!([])) {
							Ok(raw) => {
								let height = raw.as_u64().unwrap_or(0);
								let working_on = poller.job_manager.read().current_height();
								if height + 1 != working_on {
									debug!(
										"poll: chain height {} vs job height {}, refreshing",
										height, working_on
									);
									poller.update_current_job();
								}
							}
							Err(e) => warn!("getblockcount poll failed: {}", e),
						}
					}
				})?;
			threads.push(poll_thread);
		}

		if server.config.p2p.enabled {
			let magic = server
				.config
				.coin
				.magic(server.info.is_testnet)
				.ok_or_else(|| Error::Configuration("bad peer magic".to_string()))?;
			let peer_adapter = Arc::new(PeerToPoolAdapter::new());
			peer_adapter.init(Arc::downgrade(&server));
			let peer = p2p::Peer::new(
				server.config.p2p.clone(),
				magic,
				server.info.protocol_version,
				server.info.start_height as i32,
				peer_adapter,
				stop_state,
			);
			threads.push(peer.start()?);
		}

		*server.threads.lock() = threads;
		warn!("Pool server started for {}", server.config.coin.name);
		Ok(server)
	}

	/// Registers a downstream share collector.
	pub fn add_share_handler(&self, handler: Arc<dyn ShareHandler>) {
		self.share_handlers.lock().push(handler);
	}

	/// Detaches every connected miner matching the predicate and hands
	/// the sessions to the caller, e.g. for a coin switch.
	pub fn relinquish_miners<F>(&self, predicate: F) -> Vec<Worker>
	where
		F: Fn(&Worker) -> bool,
	{
		self.stratum.relinquish_workers(predicate)
	}

	/// Hands previously relinquished miners back; each is immediately
	/// sent the current job.
	pub fn attach_miners(&self, miners: Vec<Worker>) {
		self.stratum.attach_workers(miners)
	}

	/// Fetches fresh templates from every daemon, streaming each response
	/// into the job manager as it lands. Duplicates collapse in the
	/// manager's dedup cache.
	pub fn update_current_job(&self) {
		let job_manager = self.job_manager.clone();
		let job_handler = self.job_handler.clone();
		// templates without a coinbase value need a getblocksubsidy round
		// trip, which cannot run inside the streaming callback
		let mut deferred: Vec<RpcData> = Vec::new();
		self.client
			.call_stream("getblocktemplate", json!([]), |response| {
				let raw = match response.result {
					Ok(raw) => raw,
					Err(e) => {
						warn!(
							"getblocktemplate failed on daemon {}: {}",
							response.daemon_id, e
						);
						return;
					}
				};
				match types::result_to::<RpcData>(raw) {
					Ok(template) => {
						if template.coinbasevalue.is_none() && template.coinbasetxn.is_none() {
							deferred.push(template);
							return;
						}
						// the write guard drops before the dispatch so the
						// broadcast path stays lock-free on the manager
						let outcome = job_manager.write().process_template(template);
						match outcome {
							Ok(outcome) => outcome.dispatch(job_handler.as_ref()),
							Err(e) => {
								error!(
									"rejecting template from daemon {}: {}",
									response.daemon_id, e
								);
							}
						}
					}
					Err(e) => {
						error!("unparseable template from daemon {}: {}", response.daemon_id, e);
					}
				}
			});
		for mut template in deferred {
			match block_subsidy(&self.client, template.height) {
				Ok(value) => {
					template.coinbasevalue = Some(value);
					let outcome = self.job_manager.write().process_template(template);
					match outcome {
						Ok(outcome) => outcome.dispatch(self.job_handler.as_ref()),
						Err(e) => error!("rejecting template: {}", e),
					}
				}
				Err(e) => error!("getblocksubsidy failed: {}", e),
			}
		}
	}

	/// P2P block announcement: refresh unless we already build on it.
	pub fn block_notify(&self, hash: Hash) {
		let display = format!("{}", hash);
		if self.job_manager.read().building_on(&display) {
			trace!("block notify for {} is already our parent", display);
			return;
		}
		debug!("block notify: {}", display);
		self.update_current_job();
	}

	/// The peer gave up reconnecting; polling keeps the pool alive.
	pub fn peer_connection_failed(&self, error: &p2p::Error) {
		error!("p2p peer unavailable, relying on polling: {}", error);
	}

	/// A stratum client was banned; sibling workers would be told here.
	pub fn client_banned(&self, ip: IpAddr) {
		warn!("banned client {}", ip);
	}

	/// Authorizes a worker name of the form `address[.rig]` by validating
	/// the address against the daemon, with a process-lifetime cache.
	pub fn authorize_worker(
		&self,
		ip: &str,
		port: u16,
		worker: &str,
		_password: &str,
	) -> (bool, bool) {
		let address = worker.split('.').next().unwrap_or("").to_string();
		if address.is_empty() {
			return (false, true);
		}
		if let Some(&known) = self.authorized_addresses.lock().get(&address) {
			return (known, !known);
		}
		let valid = match self
			.client
			.call_primary("validateaddress", json!([address]))
			.and_then(types::result_to::<ValidateAddress>)
		{
			Ok(result) => result.isvalid,
			Err(e) => {
				warn!("validateaddress for {} failed: {}", address, e);
				false
			}
		};
		self.authorized_addresses.lock().insert(address, valid);
		info!(
			"authorize {} from {}:{} -> {}",
			worker, ip, port, valid
		);
		(valid, !valid)
	}

	/// A judged share from the stratum server. Plain shares flow straight
	/// to the collectors; block candidates are submitted to the daemon
	/// first and annotated with the outcome.
	pub fn handle_share(self: Arc<Self>, event: ShareEvent, block_hex: Option<String>) {
		match block_hex {
			Some(hex) if event.block_hash.is_some() => {
				let server = self.clone();
				// daemon round trips must not stall the share loop
				let submit_thread = thread::Builder::new()
					.name("block-submit".to_string())
					.spawn(move || {
						let annotated = server.submit_block(event, &hex);
						server.emit_share(annotated);
					});
				if let Err(e) = submit_thread {
					error!("could not spawn block submission thread: {}", e);
				}
			}
			_ => self.emit_share(event),
		}
	}

	// Submits a block candidate, verifies acceptance via getblock and
	// annotates the share event with the outcome. Never re-submits a
	// block hex seen before.
	fn submit_block(&self, mut event: ShareEvent, block_hex: &str) -> ShareEvent {
		let block_hash = event.block_hash.clone().unwrap_or_default();
		{
			let mut submitted = self.submitted_blocks.lock();
			if !submitted.insert(block_hash.clone()) {
				debug!("block {} already submitted, ignoring duplicate", block_hash);
				event.error = Some((22, "duplicate block submission".to_string()));
				return event;
			}
		}

		let merged = solution_version_from_block_hex(block_hex)
			.map(|v| v > 6)
			.unwrap_or(false);
		let method = choose_submit_method(merged, self.info.has_submit_method);
		let params = if method == "getblocktemplate" {
			json!([{ "mode": "submit", "data": block_hex }])
		} else {
			json!([block_hex])
		};

		info!("submitting block {} via {}", block_hash, method);
		match self.client.call_primary(method, params) {
			Ok(Value::Null) => {}
			Ok(Value::String(rejection)) => {
				error!("daemon rejected block {}: {}", block_hash, rejection);
				event.error = Some((20, format!("block rejected: {}", rejection)));
				return event;
			}
			Ok(other) => {
				debug!("unexpected submitblock response: {}", other);
			}
			Err(e) => {
				error!("block submission failed for {}: {}", block_hash, e);
				event.error = Some((20, format!("block submission failed: {}", e)));
				return event;
			}
		}

		// confirm the daemon actually accepted it
		match self
			.client
			.call_primary("getblock", json!([block_hash]))
			.and_then(types::result_to::<GetBlock>)
		{
			Ok(block) => {
				if block.confirmations >= 0 {
					event.tx_hash = block.tx.first().cloned();
				} else {
					warn!("block {} was orphaned", block_hash);
					event.error = Some((20, "block orphaned".to_string()));
				}
			}
			Err(e) => {
				warn!("could not confirm block {}: {}", block_hash, e);
				event.error = Some((20, format!("block not found after submit: {}", e)));
			}
		}
		event
	}

	fn emit_share(&self, event: ShareEvent) {
		let handlers = self.share_handlers.lock();
		for handler in handlers.iter() {
			handler.on_share(&event);
		}
	}

	/// Current aggregate stats snapshot.
	pub fn stats(&self) -> PoolStats {
		self.stats.read().clone()
	}

	/// Requests a graceful stop of every component.
	pub fn stop(&self) {
		warn!("stopping pool server");
		self.stop_state.stop();
	}

	/// Waits for component threads to wind down.
	pub fn join(&self) {
		let threads = {
			let mut guard = self.threads.lock();
			std::mem::replace(&mut *guard, Vec::new())
		};
		for handle in threads {
			let _ = handle.join();
		}
	}
}

// The one batch call deciding address validity, POW/POS, submitblock
// support and initial network numbers.
fn probe_chain(
	client: &DaemonClient,
	config: &PoolConfig,
	registry: &PowRegistry,
) -> Result<(PoolInfo, CoinbasePlan), Error> {
	let results = client.batch(&[
		("validateaddress", json!([config.address])),
		("getdifficulty", json!([])),
		("getinfo", json!([])),
		("getmininginfo", json!([])),
		("submitblock", json!([])),
	])?;
	let mut results = results.into_iter();
	let validate = results.next().unwrap();
	let difficulty = results.next().unwrap();
	let getinfo = results.next().unwrap();
	let mininginfo = results.next().unwrap();
	let submit_probe = results.next().unwrap();

	let validate: ValidateAddress =
		types::result_to(validate.map_err(Error::Rpc)?).map_err(Error::Rpc)?;
	if !validate.isvalid {
		return Err(Error::Configuration(format!(
			"invalid pool address: {}",
			config.address
		)));
	}
	let pool_script = match validate.script_pub_key {
		Some(ref hex) => util::from_hex(hex.clone())
			.map_err(|_| Error::Configuration("daemon returned bad scriptPubKey".to_string()))?,
		None => {
			return Err(Error::Configuration(
				"validateaddress returned no scriptPubKey for the pool address".to_string(),
			));
		}
	};

	let difficulty = difficulty.map_err(Error::Rpc)?;
	let (is_pos, mut initial_difficulty) = match difficulty {
		Value::Object(ref map) => (
			map.contains_key("proof-of-stake"),
			map.get("proof-of-work").and_then(Value::as_f64).unwrap_or(1.0),
		),
		ref v => (false, v.as_f64().unwrap_or(1.0)),
	};
	initial_difficulty *= registry.algorithm().multiplier();

	if is_pos && !(validate.ismine == Some(true) && validate.pubkey.is_some()) {
		return Err(Error::Configuration(
			"proof-of-stake coins require a wallet-owned pool address with a public key"
				.to_string(),
		));
	}

	let getinfo: GetInfo = types::result_to(getinfo.map_err(Error::Rpc)?).map_err(Error::Rpc)?;
	let mininginfo: GetMiningInfo =
		types::result_to(mininginfo.map_err(Error::Rpc)?).map_err(Error::Rpc)?;

	let has_submit_method = match submit_probe {
		Err(crate::rpc::Error::Rpc { code, ref message }) => {
			if message.contains("Method not found") {
				false
			} else if code == -1 {
				true
			} else {
				return Err(Error::Configuration(format!(
					"unexpected submitblock probe response: {} {}",
					code, message
				)));
			}
		}
		Err(e) => return Err(Error::Rpc(e)),
		Ok(_) => true,
	};

	// recipients resolve to scripts through the daemon as well
	let mut recipients = Vec::new();
	for (address, percent) in &config.reward_recipients {
		let validated: ValidateAddress = types::result_to(
			client
				.call_primary("validateaddress", json!([address]))
				.map_err(Error::Rpc)?,
		)
		.map_err(Error::Rpc)?;
		let script = validated
			.script_pub_key
			.as_ref()
			.and_then(|hex| util::from_hex(hex.clone()).ok())
			.filter(|_| validated.isvalid)
			.ok_or_else(|| {
				Error::Configuration(format!("invalid reward recipient address: {}", address))
			})?;
		recipients.push(RewardRecipient {
			script,
			percent: *percent,
		});
	}

	let info = PoolInfo {
		is_testnet: getinfo.testnet,
		is_pos,
		has_submit_method,
		protocol_version: getinfo.protocolversion,
		start_height: getinfo.blocks,
		initial_difficulty,
		network_sols: mininginfo.networksolps.unwrap_or(0.0),
	};
	let plan = CoinbasePlan {
		pool_script,
		recipients,
		tag: b"/equipool/".to_vec(),
	};
	Ok((info, plan))
}

// Base-unit coinbase value for a height, for daemons whose templates
// carry no coinbasevalue.
fn block_subsidy(client: &DaemonClient, height: u64) -> Result<u64, crate::rpc::Error> {
	let subsidy: GetBlockSubsidy =
		types::result_to(client.call_primary("getblocksubsidy", json!([height]))?)?;
	Ok((subsidy.miner * 1e8).round() as u64)
}

// Polls getblocktemplate until the daemon stops reporting sync progress,
// returning the first usable template.
fn wait_for_sync(client: &DaemonClient, stop_state: &Arc<StopState>) -> Result<RpcData, Error> {
	loop {
		if stop_state.is_stopped() {
			return Err(Error::Configuration("stopped during sync wait".to_string()));
		}
		match client.call_primary("getblocktemplate", json!([])) {
			Ok(raw) => return types::result_to::<RpcData>(raw).map_err(Error::Rpc),
			Err(crate::rpc::Error::Rpc { code, ref message })
				if code == ERR_CLIENT_SYNCING || code == ERR_CLIENT_IN_INITIAL_DOWNLOAD =>
			{
				let our_height = client
					.call_primary("getblockcount", json!([]))
					.ok()
					.and_then(|v| v.as_u64())
					.unwrap_or(0);
				let best_height = client
					.call_primary("getpeerinfo", json!([]))
					.ok()
					.and_then(|v| types::result_to::<Vec<PeerInfo>>(v).ok())
					.and_then(|peers| peers.iter().filter_map(|p| p.startingheight).max())
					.unwrap_or(0);
				info!(
					"daemon is syncing ({}): {} of {} blocks, waiting",
					message, our_height, best_height
				);
				thread::sleep(Duration::from_secs(5));
			}
			Err(e) => return Err(Error::Rpc(e)),
		}
	}
}

/// Reads the solution-version byte out of a serialized block: it is the
/// first solution byte following the 140-byte header and the solution's
/// compact-size length prefix.
pub fn solution_version_from_block_hex(block_hex: &str) -> Option<u8> {
	let after_header = block_hex.get(280..)?;
	let prefix = after_header.get(0..2)?;
	let body_at = match prefix {
		"fd" => 6,
		"fe" => 10,
		_ => 2,
	};
	u8::from_str_radix(after_header.get(body_at..body_at + 2)?, 16).ok()
}

fn choose_submit_method(merged: bool, has_submit_method: bool) -> &'static str {
	if merged {
		"submitmergedblock"
	} else if has_submit_method {
		"submitblock"
	} else {
		"getblocktemplate"
	}
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn solution_version_skips_varint_prefixes() {
		// short solution, one-byte prefix
		let mut block = "00".repeat(140);
		block.push_str("05aa00000000");
		assert_eq!(solution_version_from_block_hex(&block), Some(0xaa));

		// fd-prefixed solution
		let mut block = "00".repeat(140);
		block.push_str("fd400507bbccdd");
		assert_eq!(solution_version_from_block_hex(&block), Some(0x07));

		// truncated block
		assert_eq!(solution_version_from_block_hex("00"), None);
	}

	#[test]
	fn submit_method_selection() {
		assert_eq!(choose_submit_method(true, true), "submitmergedblock");
		assert_eq!(choose_submit_method(true, false), "submitmergedblock");
		assert_eq!(choose_submit_method(false, true), "submitblock");
		assert_eq!(choose_submit_method(false, false), "getblocktemplate");
	}
}
