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

//! Mining Stratum Server: TCP/TLS listeners per configured port,
//! line-framed JSON-RPC, the per-client protocol state machine, banning,
//! extranonce management and job broadcast.

use bufstream::BufStream;
use rand::Rng;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::net::{IpAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::core::consensus;
use crate::util::{Mutex, RwLock, StopState};

use crate::common::stats::PoolStats;
use crate::common::types::{Error, PoolConfig, ShareEvent, TlsConfig};
use crate::mining::job_manager::{JobManager, JobSummary, ShareParams};
use crate::mining::vardiff::{VarDiffController, VarDiffState};

/// A client whose buffered, unsplit input grows past this is flooding.
const MAX_LINE_BYTES: usize = 10 * 1024;

/// The header nonce is 32 bytes: extranonce1, extranonce2, zero padding.
const NONCE_HEX_CHARS: usize = 64;

/// Size in bytes of the miner-chosen extranonce suffix we advertise.
const EXTRANONCE2_SIZE: usize = 4;

// ----------------------------------------
// http://www.jsonrpc.org/specification
// RPC Methods

#[derive(Serialize, Deserialize, Debug)]
struct RpcRequest {
	#[serde(default)]
	id: Value,
	method: String,
	#[serde(default)]
	params: Value,
}

#[derive(Serialize, Debug)]
struct RpcResponse {
	id: Value,
	result: Value,
	error: Value,
}

fn stratum_error(code: i32, message: &str) -> Value {
	json!([code, message, Value::Null])
}

/// What the stratum server needs from its surroundings. Implemented by the
/// pool orchestrator through an adapter.
pub trait ServerEvents: Send + Sync {
	/// Authorize a worker. Returns (authorized, force_disconnect).
	fn authorize(&self, ip: &str, port: u16, worker: &str, password: &str) -> (bool, bool);
	/// A share was fully judged; blocks carry their serialized hex.
	fn share(&self, event: ShareEvent, block_hex: Option<String>);
	/// The rebroadcast timer fired without a fresh job.
	fn refresh_job(&self);
	/// A client crossed the invalid-share threshold and was banned.
	fn client_banned(&self, ip: IpAddr);
}

// ----------------------------------------
// ExtraNonce1 generator

/// Process-wide 32-bit counter producing unique 4-byte extranonces,
/// seeded with a 5-bit instance id in the top bits. Operators running
/// multiple worker processes must assign distinct instance ids.
pub struct ExtraNonceCounter {
	counter: u32,
}

impl ExtraNonceCounter {
	/// New counter with the given instance id, or a random one.
	pub fn new(instance_id: Option<u8>) -> ExtraNonceCounter {
		let id = match instance_id {
			Some(id) => id & 0x1f,
			None => rand::thread_rng().gen_range(0, 32) as u8,
		};
		ExtraNonceCounter {
			counter: (id as u32) << 27,
		}
	}

	/// Next extranonce1 as 8 hex chars (big-endian u32).
	pub fn next(&mut self) -> String {
		self.counter = self.counter.wrapping_add(1);
		format!("{:08x}", self.counter)
	}

	/// Size in bytes of the miner-chosen suffix.
	pub fn extranonce2_size(&self) -> usize {
		EXTRANONCE2_SIZE
	}
}

// ----------------------------------------
// Worker connection

enum WorkerStream {
	Plain(BufStream<TcpStream>),
	Tls(Box<BufStream<rustls::StreamOwned<rustls::ServerConnection, TcpStream>>>),
}

impl WorkerStream {
	fn read_line(&mut self, buf: &mut String) -> std::io::Result<usize> {
		match self {
			WorkerStream::Plain(s) => s.read_line(buf),
			WorkerStream::Tls(s) => s.read_line(buf),
		}
	}

	fn write_and_flush(&mut self, bytes: &[u8]) -> std::io::Result<()> {
		match self {
			WorkerStream::Plain(s) => {
				s.write_all(bytes)?;
				s.flush()
			}
			WorkerStream::Tls(s) => {
				s.write_all(bytes)?;
				s.flush()
			}
		}
	}
}

/// Session state machine: a connection advances monotonically and submits
/// are only accepted once subscribed and authorized.
#[derive(Debug, Clone, Copy, PartialEq)]
enum WorkerState {
	Connected,
	Subscribed,
	Authorized,
}

/// A connected stratum client: a miner, proxy or pool.
pub struct Worker {
	/// Subscription id, unique within the process.
	pub id: String,
	stream: WorkerStream,
	pending: String,
	/// Remote IP.
	pub remote_ip: IpAddr,
	/// Local port the client connected to.
	pub local_port: u16,
	state: WorkerState,
	/// Fully qualified worker name once authorized.
	pub worker_name: Option<String>,
	/// Pool-assigned extranonce prefix.
	pub extra_nonce1: Option<String>,
	supports_extranonce: bool,
	/// Current difficulty target of this client.
	pub difficulty: f64,
	previous_difficulty: Option<f64>,
	pending_difficulty: Option<f64>,
	last_activity: Instant,
	valid_shares: u64,
	invalid_shares: u64,
	vardiff: Option<VarDiffState>,
	error: bool,
}

impl Worker {
	fn new(
		id: String,
		stream: WorkerStream,
		remote_ip: IpAddr,
		local_port: u16,
		difficulty: f64,
		vardiff: Option<VarDiffState>,
	) -> Worker {
		Worker {
			id,
			stream,
			pending: String::new(),
			remote_ip,
			local_port,
			state: WorkerState::Connected,
			worker_name: None,
			extra_nonce1: None,
			supports_extranonce: false,
			difficulty,
			previous_difficulty: None,
			pending_difficulty: None,
			last_activity: Instant::now(),
			valid_shares: 0,
			invalid_shares: 0,
			vardiff,
			error: false,
		}
	}

	// Get a complete line from the worker, if one is buffered. Marks the
	// worker for disconnect on socket errors and on flooding.
	fn read_message(&mut self) -> Option<String> {
		match self.stream.read_line(&mut self.pending) {
			Ok(0) => {
				// remote closed
				self.error = true;
				None
			}
			Ok(_) => {
				if self.pending.ends_with('\n') {
					let line = self.pending.trim().to_string();
					self.pending.clear();
					self.last_activity = Instant::now();
					if line.is_empty() {
						None
					} else {
						Some(line)
					}
				} else {
					// EOF mid-line
					self.error = true;
					None
				}
			}
			Err(ref e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut => {
				if self.pending.len() > MAX_LINE_BYTES {
					warn!("client {} flooded the socket, dropping", self.id);
					self.error = true;
				}
				None
			}
			Err(e) => {
				debug!("error in connection with stratum client {}: {}", self.id, e);
				self.error = true;
				None
			}
		}
	}

	// Send a JSON line to the worker.
	fn write_message(&mut self, mut message: String) {
		if !message.ends_with('\n') {
			message.push('\n');
		}
		if let Err(e) = self.stream.write_and_flush(message.as_bytes()) {
			if e.kind() != ErrorKind::WouldBlock {
				debug!("error writing to stratum client {}: {}", self.id, e);
				self.error = true;
			}
		}
	}

	fn respond(&mut self, id: Value, result: Value) {
		let response = RpcResponse {
			id,
			result,
			error: Value::Null,
		};
		self.write_message(serde_json::to_string(&response).unwrap());
	}

	fn respond_error(&mut self, id: Value, code: i32, message: &str) {
		let response = RpcResponse {
			id,
			result: Value::Null,
			error: stratum_error(code, message),
		};
		self.write_message(serde_json::to_string(&response).unwrap());
	}

	fn notify(&mut self, method: &str, params: Value) {
		let notification = json!({ "id": Value::Null, "method": method, "params": params });
		self.write_message(notification.to_string());
	}

	/// Sends `mining.set_target` for a new difficulty. Returns false when
	/// the difficulty is unchanged.
	fn send_difficulty(&mut self, difficulty: f64) -> bool {
		if (difficulty - self.difficulty).abs() < f64::EPSILON {
			return false;
		}
		self.previous_difficulty = Some(self.difficulty);
		self.difficulty = difficulty;
		let target = consensus::difficulty_to_target(difficulty);
		self.notify("mining.set_target", json!([consensus::target_to_hex(&target)]));
		true
	}

	/// Defers a difficulty change to the next job notification so miners
	/// get the new target and the job atomically.
	fn enqueue_next_difficulty(&mut self, difficulty: f64) {
		self.pending_difficulty = Some(difficulty);
	}

	/// Sends the current job, applying any pending difficulty first.
	fn send_mining_job(&mut self, job: &JobSummary, clean: bool) {
		if let Some(pending) = self.pending_difficulty.take() {
			self.send_difficulty(pending);
		}
		let mut params: Vec<Value> = Vec::with_capacity(9);
		for (at, param) in job.notify_params.iter().enumerate() {
			if at == 7 {
				params.push(Value::Bool(clean));
			}
			params.push(Value::String(param.clone()));
		}
		if params.len() == 7 {
			params.push(Value::Bool(clean));
		}
		self.notify("mining.notify", Value::Array(params));
	}
}

// ----------------------------------------
// Stratum server

/// The stratum protocol server over all configured ports.
pub struct StratumServer {
	id: String,
	config: PoolConfig,
	job_manager: Arc<RwLock<JobManager>>,
	adapter: Arc<dyn ServerEvents>,
	workers: Mutex<Vec<Worker>>,
	banned: Mutex<HashMap<IpAddr, Instant>>,
	static_bans: Vec<IpAddr>,
	extra_nonce: Mutex<ExtraNonceCounter>,
	subscription_counter: Mutex<u64>,
	vardiff: HashMap<u16, VarDiffController>,
	stats: Arc<RwLock<PoolStats>>,
	stop_state: Arc<StopState>,
	tls: Option<Arc<rustls::ServerConfig>>,
	last_job: Mutex<Instant>,
}

impl StratumServer {
	/// Creates a new Stratum Server. TLS material is loaded here, once.
	pub fn new(
		config: PoolConfig,
		job_manager: Arc<RwLock<JobManager>>,
		adapter: Arc<dyn ServerEvents>,
		stats: Arc<RwLock<PoolStats>>,
		stop_state: Arc<StopState>,
	) -> Result<StratumServer, Error> {
		let tls = match config.tls_options {
			Some(ref tls) if tls.enabled => Some(load_tls_config(tls)?),
			_ => None,
		};
		let static_bans = config
			.banning
			.banned
			.iter()
			.filter_map(|ip| ip.parse().ok())
			.collect();
		let vardiff = config
			.port_map()
			.into_iter()
			.filter_map(|(port, pc)| {
				pc.var_diff
					.clone()
					.map(|vd| (port, VarDiffController::new(vd)))
			})
			.collect();
		Ok(StratumServer {
			id: String::from("StratumServer"),
			extra_nonce: Mutex::new(ExtraNonceCounter::new(config.instance_id)),
			subscription_counter: Mutex::new(0),
			job_manager,
			adapter,
			workers: Mutex::new(Vec::new()),
			banned: Mutex::new(HashMap::new()),
			static_bans,
			vardiff,
			stats,
			stop_state,
			tls,
			last_job: Mutex::new(Instant::now()),
			config,
		})
	}

	/// Whether an address is currently banned, statically or dynamically.
	pub fn is_banned(&self, ip: &IpAddr) -> bool {
		if self.static_bans.contains(ip) {
			return true;
		}
		let banned = self.banned.lock();
		match banned.get(ip) {
			Some(since) => since.elapsed().as_secs() < self.config.banning.time,
			None => false,
		}
	}

	/// Drops expired entries from the dynamic ban map.
	fn purge_bans(&self) {
		let duration = self.config.banning.time;
		let mut banned = self.banned.lock();
		let before = banned.len();
		banned.retain(|_, since| since.elapsed().as_secs() < duration);
		let purged = before - banned.len();
		if purged > 0 {
			debug!("(Server ID: {}) unbanned {} addresses", self.id, purged);
		}
	}

	fn next_subscription_id(&self) -> String {
		let mut counter = self.subscription_counter.lock();
		*counter += 1;
		format!("{:x}{:08x}", self.config.pool_id, *counter)
	}

	/// Pushes the current job to every live client. Clients quiet for
	/// longer than the connection timeout are destroyed instead.
	pub fn broadcast_mining_jobs(&self, job: &JobSummary, clean: bool) {
		{
			let mut stats = self.stats.write();
			stats.block_height = job.height;
			stats.network_difficulty = job.difficulty;
		}
		let timeout = Duration::from_secs(self.config.connection_timeout);
		let mut workers = self.workers.lock();
		let mut sent = 0;
		for worker in workers.iter_mut() {
			if worker.error || worker.state == WorkerState::Connected {
				continue;
			}
			if worker.last_activity.elapsed() > timeout {
				debug!(
					"(Server ID: {}) client {} timed out, destroying socket",
					self.id, worker.id
				);
				worker.error = true;
				continue;
			}
			worker.send_mining_job(job, clean);
			sent += 1;
		}
		debug!(
			"(Server ID: {}) sent job {} at height {} to {} clients (clean: {})",
			self.id, job.job_id, job.height, sent, clean
		);
		*self.last_job.lock() = Instant::now();
	}

	// Purge dead/sick workers - remove all workers marked in error state.
	fn clean_workers(&self) -> usize {
		let mut workers = self.workers.lock();
		let mut stats = self.stats.write();
		workers.retain(|w| {
			if w.error {
				warn!("(Server ID: {}) dropping worker: {}", self.id, w.id);
				stats.worker_mut(&w.id).is_connected = false;
			}
			!w.error
		});
		stats.num_workers = workers.len();
		workers.len()
	}

	// Handle an RPC request message from the worker(s)
	fn handle_messages(&self) {
		let mut workers = self.workers.lock();
		for at in 0..workers.len() {
			loop {
				let message = match workers[at].read_message() {
					Some(message) => message,
					None => break,
				};
				let request: RpcRequest = match serde_json::from_str(&message) {
					Ok(request) => request,
					Err(e) => {
						debug!(
							"(Server ID: {}) failed to parse request from {}: {} - {:?}",
							self.id, workers[at].id, e, message
						);
						workers[at].error = true;
						break;
					}
				};
				self.handle_request(&mut workers[at], request);
				if workers[at].error {
					break;
				}
			}
		}
	}

	fn handle_request(&self, worker: &mut Worker, request: RpcRequest) {
		{
			let mut stats = self.stats.write();
			stats.worker_mut(&worker.id).last_seen = chrono::Utc::now();
		}
		match request.method.as_str() {
			"mining.subscribe" => self.handle_subscribe(worker, request.id),
			"mining.extranonce.subscribe" => {
				worker.supports_extranonce = true;
				worker.respond(request.id, Value::Bool(true));
			}
			"mining.authorize" => self.handle_authorize(worker, request.id, request.params),
			"mining.submit" => self.handle_submit(worker, request.id, request.params),
			"mining.get_transactions" => worker.respond(request.id, json!([])),
			other => {
				debug!(
					"(Server ID: {}) unknown method {} from {}",
					self.id, other, worker.id
				);
			}
		}
	}

	fn handle_subscribe(&self, worker: &mut Worker, id: Value) {
		let extra_nonce1 = self.extra_nonce.lock().next();
		let subscription_id = worker.id.clone();
		worker.extra_nonce1 = Some(extra_nonce1.clone());
		if worker.state == WorkerState::Connected {
			worker.state = WorkerState::Subscribed;
		}
		let result = json!([
			[
				["mining.set_difficulty", subscription_id],
				["mining.notify", subscription_id]
			],
			extra_nonce1,
			EXTRANONCE2_SIZE
		]);
		worker.respond(id, result);
		debug!(
			"(Server ID: {}) subscribed {} with extranonce1 {}",
			self.id, worker.id, extra_nonce1
		);
	}

	fn handle_authorize(&self, worker: &mut Worker, id: Value, params: Value) {
		if worker.state == WorkerState::Connected {
			worker.respond_error(id, 25, "not subscribed");
			return;
		}
		let name = params
			.get(0)
			.and_then(Value::as_str)
			.unwrap_or("")
			.to_string();
		let password = params.get(1).and_then(Value::as_str).unwrap_or("");
		let (authorized, disconnect) = self.adapter.authorize(
			&worker.remote_ip.to_string(),
			worker.local_port,
			&name,
			password,
		);
		if authorized {
			worker.worker_name = Some(name.clone());
			worker.state = WorkerState::Authorized;
			let mut stats = self.stats.write();
			stats.worker_mut(&worker.id).worker_name = Some(name);
		}
		worker.respond(id, Value::Bool(authorized));
		if authorized {
			// push the initial target and the current job right away
			let target = consensus::difficulty_to_target(worker.difficulty);
			worker.notify(
				"mining.set_target",
				json!([consensus::target_to_hex(&target)]),
			);
			if let Some(job) = self.job_manager.read().current_summary() {
				worker.send_mining_job(&job, true);
			}
		} else if disconnect {
			worker.error = true;
		}
	}

	fn handle_submit(&self, worker: &mut Worker, id: Value, params: Value) {
		match worker.state {
			WorkerState::Connected => {
				worker.respond_error(id, 25, "not subscribed");
				return;
			}
			WorkerState::Subscribed => {
				worker.respond_error(id, 24, "unauthorized worker");
				return;
			}
			WorkerState::Authorized => {}
		}

		let field = |at: usize| {
			params
				.get(at)
				.and_then(Value::as_str)
				.unwrap_or("")
				.to_string()
		};
		let extra_nonce1 = worker.extra_nonce1.clone().unwrap_or_default();
		let extra_nonce2 = field(3);

		// header nonce = extranonce1 || extranonce2, zero padded
		let mut nonce = format!("{}{}", extra_nonce1, extra_nonce2);
		if nonce.len() < NONCE_HEX_CHARS {
			nonce.push_str(&"0".repeat(NONCE_HEX_CHARS - nonce.len()));
		}

		let share = ShareParams {
			job_id: field(1),
			prev_diff: worker.previous_difficulty,
			diff: worker.difficulty,
			extra_nonce1,
			extra_nonce2,
			nonce,
			n_time: field(2),
			solution: field(4),
			remote_addr: worker.remote_ip.to_string(),
			local_port: worker.local_port,
			worker: field(0),
		};

		let outcome = self.job_manager.write().process_share(&share);

		{
			let mut stats = self.stats.write();
			let worker_stats = stats.worker_mut(&worker.id);
			if outcome.event.is_valid_share {
				worker_stats.num_accepted += 1;
				if outcome.event.is_valid_block {
					worker_stats.num_blocks_found += 1;
				}
			} else if outcome.error.as_ref().map(|e| e.0) == Some(21) {
				worker_stats.num_stale += 1;
			} else {
				worker_stats.num_rejected += 1;
			}
			worker_stats.pow_difficulty = worker.difficulty;
		}
		if outcome.event.is_valid_block {
			self.stats.write().blocks_found += 1;
		}

		match outcome.error {
			None => worker.respond(id, Value::Bool(true)),
			Some((code, ref message)) => worker.respond_error(id, code, message),
		}

		let valid = outcome.event.is_valid_share;
		if valid {
			worker.valid_shares += 1;
		} else {
			worker.invalid_shares += 1;
		}

		self.adapter.share(outcome.event, outcome.block_hex);

		// vardiff retarget on every submit
		if let Some(controller) = self.vardiff.get(&worker.local_port) {
			if let Some(state) = worker.vardiff.as_mut() {
				if let Some(new_diff) =
					controller.on_submit(state, worker.difficulty, Instant::now())
				{
					debug!(
						"(Server ID: {}) retargeting {} from {} to {}",
						self.id, worker.id, worker.difficulty, new_diff
					);
					worker.enqueue_next_difficulty(new_diff);
				}
			}
		}

		self.check_ban(worker);
	}

	// After each share result, once the window fills, either ban or reset.
	fn check_ban(&self, worker: &mut Worker) {
		if !self.config.banning.enabled {
			return;
		}
		let total = worker.valid_shares + worker.invalid_shares;
		if total < self.config.banning.check_threshold {
			return;
		}
		let invalid_pct = worker.invalid_shares as f64 / total as f64 * 100.0;
		if invalid_pct >= self.config.banning.invalid_percent {
			warn!(
				"(Server ID: {}) banning {} ({}): {:.1}% of {} shares invalid",
				self.id, worker.id, worker.remote_ip, invalid_pct, total
			);
			self.banned.lock().insert(worker.remote_ip, Instant::now());
			worker.error = true;
			self.adapter.client_banned(worker.remote_ip);
		} else {
			worker.valid_shares = 0;
			worker.invalid_shares = 0;
		}
	}

	/// Detaches every worker matching the predicate, handing the sessions
	/// to the caller. Their sockets stay open.
	pub fn relinquish_workers<F>(&self, predicate: F) -> Vec<Worker>
	where
		F: Fn(&Worker) -> bool,
	{
		let mut workers = self.workers.lock();
		let mut detached = Vec::new();
		let mut at = 0;
		while at < workers.len() {
			if predicate(&workers[at]) {
				detached.push(workers.remove(at));
			} else {
				at += 1;
			}
		}
		self.stats.write().num_workers = workers.len();
		detached
	}

	/// Re-attaches previously relinquished workers and immediately sends
	/// them the current job. Clients that subscribed to the extranonce
	/// extension get a fresh extranonce first, since the old one may
	/// collide with this server's counter.
	pub fn attach_workers(&self, workers: Vec<Worker>) {
		let job = self.job_manager.read().current_summary();
		let mut list = self.workers.lock();
		for mut worker in workers {
			if worker.supports_extranonce {
				let extra_nonce1 = self.extra_nonce.lock().next();
				worker.extra_nonce1 = Some(extra_nonce1.clone());
				worker.notify(
					"mining.set_extranonce",
					json!([extra_nonce1, EXTRANONCE2_SIZE]),
				);
			}
			if let Some(ref job) = job {
				worker.send_mining_job(job, true);
			}
			list.push(worker);
		}
		self.stats.write().num_workers = list.len();
	}

	/// "main()" - runs the server: accept threads per port plus the
	/// serialized handler loop, until the stop state flips.
	pub fn run_loop(server: Arc<StratumServer>) -> Result<(), Error> {
		info!(
			"(Server ID: {}) starting stratum server on ports {:?}",
			server.id,
			server.config.ports.keys().collect::<Vec<_>>()
		);

		for (port, port_config) in server.config.port_map() {
			let tls = if port_config.tls {
				server.tls.clone()
			} else {
				None
			};
			let server = server.clone();
			thread::Builder::new()
				.name(format!("stratum-accept-{}", port))
				.spawn(move || accept_workers(server, port, port_config.diff, tls))?;
		}

		{
			let mut stats = server.stats.write();
			stats.is_running = true;
		}
		warn!("Stratum server started on {:?}", server.config.ports.keys());

		let purge_interval = Duration::from_secs(server.config.banning.purge_interval);
		let rebroadcast = Duration::from_secs(server.config.job_rebroadcast_timeout);
		let mut last_purge = Instant::now();

		// Main Loop
		loop {
			if server.stop_state.is_stopped() {
				break;
			}

			server.clean_workers();
			server.handle_messages();

			if last_purge.elapsed() > purge_interval {
				server.purge_bans();
				last_purge = Instant::now();
			}

			// when no new job arrived for too long, ask for a refresh once
			let fire = server.last_job.lock().elapsed() > rebroadcast;
			if fire {
				*server.last_job.lock() = Instant::now();
				debug!("(Server ID: {}) rebroadcast timeout, requesting refresh", server.id);
				server.adapter.refresh_job();
			}

			thread::sleep(Duration::from_millis(50));
		}

		// graceful shutdown: destroy live clients
		let mut workers = server.workers.lock();
		workers.clear();
		let mut stats = server.stats.write();
		stats.is_running = false;
		stats.num_workers = 0;
		warn!("(Server ID: {}) stratum server stopped", server.id);
		Ok(())
	}
}

// Run in a thread. Adds new connections to the workers list.
fn accept_workers(
	server: Arc<StratumServer>,
	port: u16,
	starting_diff: f64,
	tls: Option<Arc<rustls::ServerConfig>>,
) {
	let listener = match TcpListener::bind(("0.0.0.0", port)) {
		Ok(listener) => listener,
		Err(e) => {
			error!("failed to bind stratum port {}: {}", port, e);
			return;
		}
	};
	listener
		.set_nonblocking(true)
		.expect("set_nonblocking call failed");

	for stream in listener.incoming() {
		match stream {
			Ok(stream) => {
				let peer_ip = match stream.peer_addr() {
					Ok(addr) => addr.ip(),
					Err(_) => continue,
				};
				if server.is_banned(&peer_ip) {
					info!("rejecting banned connection from {}", peer_ip);
					drop(stream);
					continue;
				}
				if let Err(e) = stream.set_nonblocking(true) {
					warn!("could not configure client socket: {}", e);
					continue;
				}
				let worker_stream = match tls {
					Some(ref tls_config) => {
						match rustls::ServerConnection::new(tls_config.clone()) {
							Ok(conn) => WorkerStream::Tls(Box::new(BufStream::new(
								rustls::StreamOwned::new(conn, stream),
							))),
							Err(e) => {
								warn!("tls session setup failed for {}: {}", peer_ip, e);
								continue;
							}
						}
					}
					None => WorkerStream::Plain(BufStream::new(stream)),
				};
				let id = server.next_subscription_id();
				info!(
					"(Server ID: {}) new connection: {} on port {} as {}",
					server.id, peer_ip, port, id
				);
				let vardiff_state = server.vardiff.get(&port).map(|c| c.new_state());
				let worker = Worker::new(
					id.clone(),
					worker_stream,
					peer_ip,
					port,
					starting_diff,
					vardiff_state,
				);
				server.workers.lock().push(worker);
				let mut stats = server.stats.write();
				let worker_stats = stats.worker_mut(&id);
				worker_stats.is_connected = true;
				worker_stats.pow_difficulty = starting_diff;
			}
			Err(ref e) if e.kind() == ErrorKind::WouldBlock => {
				if server.stop_state.is_stopped() {
					break;
				}
				thread::sleep(Duration::from_millis(100));
			}
			Err(e) => {
				warn!("(Server ID: {}) error accepting connection: {:?}", server.id, e);
			}
		}
	}
	drop(listener);
}

fn load_tls_config(tls: &TlsConfig) -> Result<Arc<rustls::ServerConfig>, Error> {
	let mut cert_reader = BufReader::new(
		File::open(&tls.server_cert)
			.map_err(|e| Error::Tls(format!("cannot open {}: {}", tls.server_cert, e)))?,
	);
	let certs: Vec<rustls::Certificate> = rustls_pemfile::certs(&mut cert_reader)
		.map_err(|e| Error::Tls(format!("bad certificate file: {}", e)))?
		.into_iter()
		.map(rustls::Certificate)
		.collect();
	if certs.is_empty() {
		return Err(Error::Tls(format!("no certificates in {}", tls.server_cert)));
	}

	let mut key_reader = BufReader::new(
		File::open(&tls.server_key)
			.map_err(|e| Error::Tls(format!("cannot open {}: {}", tls.server_key, e)))?,
	);
	let mut keys = rustls_pemfile::pkcs8_private_keys(&mut key_reader)
		.map_err(|e| Error::Tls(format!("bad key file: {}", e)))?;
	if keys.is_empty() {
		let mut key_reader = BufReader::new(
			File::open(&tls.server_key)
				.map_err(|e| Error::Tls(format!("cannot open {}: {}", tls.server_key, e)))?,
		);
		keys = rustls_pemfile::rsa_private_keys(&mut key_reader)
			.map_err(|e| Error::Tls(format!("bad key file: {}", e)))?;
	}
	let key = keys
		.into_iter()
		.next()
		.map(rustls::PrivateKey)
		.ok_or_else(|| Error::Tls(format!("no private key in {}", tls.server_key)))?;

	let config = rustls::ServerConfig::builder()
		.with_safe_defaults()
		.with_no_client_auth()
		.with_single_cert(certs, key)
		.map_err(|e| Error::Tls(format!("tls configuration rejected: {}", e)))?;
	Ok(Arc::new(config))
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn extranonce_counter_is_unique_and_seeded() {
		let mut counter = ExtraNonceCounter::new(Some(3));
		let mut seen = std::collections::HashSet::new();
		for _ in 0..10_000 {
			assert!(seen.insert(counter.next()));
		}
		// instance id 3 sits in bits 27..31
		let first = u32::from_str_radix(&ExtraNonceCounter::new(Some(3)).next(), 16).unwrap();
		assert_eq!(first >> 27, 3);
		assert_eq!(counter.extranonce2_size(), 4);
	}

	#[test]
	fn distinct_instance_ids_produce_disjoint_ranges() {
		let a = u32::from_str_radix(&ExtraNonceCounter::new(Some(1)).next(), 16).unwrap();
		let b = u32::from_str_radix(&ExtraNonceCounter::new(Some(2)).next(), 16).unwrap();
		assert_ne!(a >> 27, b >> 27);
	}

	#[test]
	fn stratum_error_tuple_shape() {
		let err = stratum_error(21, "job not found");
		assert_eq!(err, json!([21, "job not found", null]));
	}

	#[test]
	fn request_parses_null_and_numeric_ids() {
		let with_null: RpcRequest =
			serde_json::from_str(r#"{"id":null,"method":"mining.subscribe","params":[]}"#)
				.unwrap();
		assert_eq!(with_null.id, Value::Null);
		let with_number: RpcRequest =
			serde_json::from_str(r#"{"id":7,"method":"mining.submit","params":["a"]}"#).unwrap();
		assert_eq!(with_number.id, json!(7));
	}
}
