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

//! Adapters wiring the components to each other without reference cycles:
//! each adapter holds a late-bound weak reference to its target, so the
//! job manager, the stratum server, the peer client and the orchestrator
//! can be built in sequence and linked afterwards.

use std::net::IpAddr;
use std::sync::{Arc, Weak};

use crate::core::core::hash::Hash;
use crate::p2p;
use crate::util::OneTime;

use crate::common::types::ShareEvent;
use crate::mining::job_manager::{JobHandler, JobSummary};
use crate::mining::stratumserver::{ServerEvents, StratumServer};
use crate::pool::server::Server;

/// Receives job transitions from the job manager and pushes them to the
/// connected miners.
pub struct JobToServerAdapter {
	server: OneTime<Weak<StratumServer>>,
}

impl JobToServerAdapter {
	/// Adapter with an unbound target.
	pub fn new() -> JobToServerAdapter {
		JobToServerAdapter {
			server: OneTime::new(),
		}
	}

	/// Binds the stratum server once it exists.
	pub fn init(&self, server: Weak<StratumServer>) {
		self.server.init(server);
	}

	fn server(&self) -> Option<Arc<StratumServer>> {
		self.server.borrow().upgrade()
	}
}

impl JobHandler for JobToServerAdapter {
	fn new_block(&self, job: &JobSummary) {
		if let Some(server) = self.server() {
			server.broadcast_mining_jobs(job, true);
		}
	}

	fn updated_block(&self, job: &JobSummary, clean: bool) {
		if let Some(server) = self.server() {
			server.broadcast_mining_jobs(job, clean);
		}
	}
}

/// Routes stratum server events (authorization, judged shares, refresh
/// requests, bans) up to the pool orchestrator.
pub struct ServerToPoolAdapter {
	pool: OneTime<Weak<Server>>,
}

impl ServerToPoolAdapter {
	/// Adapter with an unbound target.
	pub fn new() -> ServerToPoolAdapter {
		ServerToPoolAdapter {
			pool: OneTime::new(),
		}
	}

	/// Binds the pool server once it exists.
	pub fn init(&self, pool: Weak<Server>) {
		self.pool.init(pool);
	}

	fn pool(&self) -> Option<Arc<Server>> {
		self.pool.borrow().upgrade()
	}
}

impl ServerEvents for ServerToPoolAdapter {
	fn authorize(&self, ip: &str, port: u16, worker: &str, password: &str) -> (bool, bool) {
		match self.pool() {
			Some(pool) => pool.authorize_worker(ip, port, worker, password),
			None => (false, false),
		}
	}

	fn share(&self, event: ShareEvent, block_hex: Option<String>) {
		if let Some(pool) = self.pool() {
			pool.handle_share(event, block_hex);
		}
	}

	fn refresh_job(&self) {
		if let Some(pool) = self.pool() {
			pool.update_current_job();
		}
	}

	fn client_banned(&self, ip: IpAddr) {
		if let Some(pool) = self.pool() {
			pool.client_banned(ip);
		}
	}
}

/// Feeds block and transaction announcements from the gossip network into
/// the orchestrator's template refresh.
pub struct PeerToPoolAdapter {
	pool: OneTime<Weak<Server>>,
}

impl PeerToPoolAdapter {
	/// Adapter with an unbound target.
	pub fn new() -> PeerToPoolAdapter {
		PeerToPoolAdapter {
			pool: OneTime::new(),
		}
	}

	/// Binds the pool server once it exists.
	pub fn init(&self, pool: Weak<Server>) {
		self.pool.init(pool);
	}

	fn pool(&self) -> Option<Arc<Server>> {
		self.pool.borrow().upgrade()
	}
}

impl p2p::PeerAdapter for PeerToPoolAdapter {
	fn block_found(&self, hash: Hash) {
		debug!("peer announced block {}", hash);
		if let Some(pool) = self.pool() {
			pool.block_notify(hash);
		}
	}

	fn transaction_received(&self, hash: Hash) {
		trace!("peer announced transaction {}", hash);
	}

	fn connection_failed(&self, error: &p2p::Error) {
		if let Some(pool) = self.pool() {
			pool.peer_connection_failed(error);
		}
	}
}

/// Downstream consumers of fully annotated share events: payment
/// trackers, stats collectors. Registered on the pool server.
pub trait ShareHandler: Send + Sync {
	/// One fully judged (and, for blocks, fully submitted) share.
	fn on_share(&self, share: &ShareEvent);
}

/// Default handler: structured log lines only.
pub struct LogShareHandler;

impl ShareHandler for LogShareHandler {
	fn on_share(&self, share: &ShareEvent) {
		if share.is_valid_block {
			warn!(
				"block {} found at height {} by {} (share diff {})",
				share.block_hash.as_deref().unwrap_or("?"),
				share.height,
				share.worker,
				share.share_difficulty
			);
		} else if share.is_valid_share {
			info!(
				"accepted share from {} at diff {}/{}",
				share.worker, share.share_difficulty, share.difficulty
			);
		} else {
			info!(
				"rejected share from {}: {:?}",
				share.worker,
				share.error.as_ref()
			);
		}
	}
}
