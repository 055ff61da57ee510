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

//! Server stats collection types, to be used by tests and the operator's
//! log lines.

use chrono::{DateTime, Utc};

/// Sums counters for one connected stratum worker.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerStats {
	/// Subscription id of the worker.
	pub id: String,
	/// Whether the worker is still connected.
	pub is_connected: bool,
	/// Authorized worker name, when known.
	pub worker_name: Option<String>,
	/// Difficulty currently assigned to the worker.
	pub pow_difficulty: f64,
	/// Accepted share count.
	pub num_accepted: u64,
	/// Rejected share count.
	pub num_rejected: u64,
	/// Stale/old-job share count.
	pub num_stale: u64,
	/// Blocks this worker solved.
	pub num_blocks_found: u64,
	/// Last message seen from the worker.
	pub last_seen: DateTime<Utc>,
}

impl Default for WorkerStats {
	fn default() -> WorkerStats {
		WorkerStats {
			id: String::new(),
			is_connected: false,
			worker_name: None,
			pow_difficulty: 1.0,
			num_accepted: 0,
			num_rejected: 0,
			num_stale: 0,
			num_blocks_found: 0,
			last_seen: Utc::now(),
		}
	}
}

/// Aggregate state of the stratum server, for logs and health checks.
/// Worker stat entries are added and updated but never removed.
#[derive(Debug, Clone, Serialize, Default)]
pub struct PoolStats {
	/// Whether the server accepts connections.
	pub is_running: bool,
	/// Currently connected worker count.
	pub num_workers: usize,
	/// Height of the current job.
	pub block_height: u64,
	/// Network difficulty of the current job.
	pub network_difficulty: f64,
	/// Blocks found over the process lifetime.
	pub blocks_found: u64,
	/// Per-worker counters.
	pub worker_stats: Vec<WorkerStats>,
}

impl PoolStats {
	/// The stats slot for a worker id, creating it on first sight.
	pub fn worker_mut(&mut self, id: &str) -> &mut WorkerStats {
		if let Some(at) = self.worker_stats.iter().position(|w| w.id == id) {
			return &mut self.worker_stats[at];
		}
		let mut stats = WorkerStats::default();
		stats.id = id.to_string();
		stats.is_connected = true;
		self.worker_stats.push(stats);
		self.worker_stats.last_mut().unwrap()
	}
}
