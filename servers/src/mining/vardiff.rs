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

//! Variable difficulty: keeps each client's share rate near the port's
//! target interval by watching a ring buffer of inter-submit times and
//! retargeting when the average drifts out of the variance band.

use std::time::Instant;

use crate::common::types::VarDiffConfig;

/// Fixed-size circular buffer of inter-submit time deltas.
pub struct RingBuffer {
	max_size: usize,
	data: Vec<f64>,
	cursor: usize,
	full: bool,
}

impl RingBuffer {
	/// A ring holding at most `max_size` samples.
	pub fn new(max_size: usize) -> RingBuffer {
		RingBuffer {
			max_size: max_size.max(1),
			data: Vec::with_capacity(max_size.max(1)),
			cursor: 0,
			full: false,
		}
	}

	/// Pushes a sample, overwriting the oldest once full.
	pub fn append(&mut self, value: f64) {
		if self.full {
			self.data[self.cursor] = value;
			self.cursor = (self.cursor + 1) % self.max_size;
		} else {
			self.data.push(value);
			if self.data.len() == self.max_size {
				self.full = true;
			}
		}
	}

	/// Mean of the held samples, zero when empty.
	pub fn avg(&self) -> f64 {
		if self.data.is_empty() {
			return 0.0;
		}
		self.data.iter().sum::<f64>() / self.data.len() as f64
	}

	/// Whether no samples are held.
	pub fn is_empty(&self) -> bool {
		self.data.is_empty()
	}

	/// Drops all samples.
	pub fn clear(&mut self) {
		self.data.clear();
		self.cursor = 0;
		self.full = false;
	}
}

/// Per-client retarget state, owned by the worker session.
pub struct VarDiffState {
	ring: RingBuffer,
	last_ts: Option<Instant>,
	last_retarget: Option<Instant>,
}

/// Per-port variable difficulty controller.
pub struct VarDiffController {
	config: VarDiffConfig,
	buffer_size: usize,
	t_min: f64,
	t_max: f64,
}

impl VarDiffController {
	/// Builds a controller for one port's options.
	pub fn new(config: VarDiffConfig) -> VarDiffController {
		let variance = config.target_time as f64 * config.variance_percent / 100.0;
		let buffer_size = (config.retarget_time as f64 / config.target_time as f64 * 4.0) as usize;
		VarDiffController {
			t_min: config.target_time as f64 - variance,
			t_max: config.target_time as f64 + variance,
			buffer_size,
			config,
		}
	}

	/// Fresh retarget state for a newly connected client.
	pub fn new_state(&self) -> VarDiffState {
		VarDiffState {
			ring: RingBuffer::new(self.buffer_size),
			last_ts: None,
			last_retarget: None,
		}
	}

	/// Called on every accepted or rejected submit. Returns the new
	/// difficulty to enqueue when a retarget is due, always clamped to
	/// `[min_diff, max_diff]`.
	pub fn on_submit(
		&self,
		state: &mut VarDiffState,
		current_diff: f64,
		now: Instant,
	) -> Option<f64> {
		let last_ts = match state.last_ts {
			None => {
				// first observation seeds the timers
				state.last_retarget =
					Some(now - std::time::Duration::from_secs(self.config.retarget_time / 2));
				state.last_ts = Some(now);
				return None;
			}
			Some(ts) => ts,
		};

		state.ring.append(now.duration_since(last_ts).as_secs_f64());
		state.last_ts = Some(now);

		let since_retarget = now
			.duration_since(state.last_retarget.unwrap_or(now))
			.as_secs_f64();
		if since_retarget < self.config.retarget_time as f64 && !state.ring.is_empty() {
			return None;
		}

		let avg = state.ring.avg();
		if avg <= 0.0 || !avg.is_finite() {
			return None;
		}

		let mut ddiff = self.config.target_time as f64 / avg;
		let new_diff;
		if avg > self.t_max && current_diff > self.config.min_diff {
			if self.config.x2_mode {
				ddiff = 0.5;
			}
			new_diff = (current_diff * ddiff).max(self.config.min_diff);
		} else if avg < self.t_min {
			if self.config.x2_mode {
				ddiff = 2.0;
			}
			new_diff = (current_diff * ddiff).min(self.config.max_diff);
		} else {
			return None;
		}

		state.last_retarget = Some(now);
		state.ring.clear();
		Some(round8(new_diff))
	}
}

fn round8(x: f64) -> f64 {
	(x * 1e8).round() / 1e8
}

#[cfg(test)]
mod test {
	use super::*;
	use std::time::Duration;

	fn config() -> VarDiffConfig {
		VarDiffConfig {
			min_diff: 1.0,
			max_diff: 512.0,
			target_time: 15,
			retarget_time: 90,
			variance_percent: 30.0,
			x2_mode: false,
		}
	}

	#[test]
	fn ring_buffer_rolls_over() {
		let mut ring = RingBuffer::new(3);
		for v in &[1.0, 2.0, 3.0] {
			ring.append(*v);
		}
		assert_eq!(ring.avg(), 2.0);
		ring.append(7.0); // overwrites 1.0
		assert_eq!(ring.avg(), 4.0);
		ring.clear();
		assert!(ring.is_empty());
		assert_eq!(ring.avg(), 0.0);
	}

	#[test]
	fn fast_shares_double_difficulty_within_bounds() {
		// 12 submits spaced 5s apart at diff 8
		let controller = VarDiffController::new(config());
		let mut state = controller.new_state();
		let start = Instant::now();
		let mut result = None;
		for i in 0..12 {
			let now = start + Duration::from_secs(5 * i);
			if let Some(d) = controller.on_submit(&mut state, 8.0, now) {
				result = Some(d);
			}
		}
		let new_diff = result.expect("retarget after retarget_time elapsed");
		assert!(new_diff >= 16.0);
		assert!(new_diff <= 512.0);
	}

	#[test]
	fn slow_shares_lower_difficulty_clamped_to_min() {
		let controller = VarDiffController::new(config());
		let mut state = controller.new_state();
		let start = Instant::now();
		let mut result = None;
		for i in 0..4 {
			let now = start + Duration::from_secs(60 * i);
			if let Some(d) = controller.on_submit(&mut state, 1.5, now) {
				result = Some(d);
			}
		}
		let new_diff = result.expect("retarget for slow shares");
		assert!(new_diff >= 1.0);
		assert!(new_diff < 1.5);
	}

	#[test]
	fn in_band_average_does_not_retarget() {
		let controller = VarDiffController::new(config());
		let mut state = controller.new_state();
		let start = Instant::now();
		for i in 0..20 {
			let now = start + Duration::from_secs(15 * i);
			assert_eq!(controller.on_submit(&mut state, 8.0, now), None);
		}
	}

	#[test]
	fn x2_mode_exactly_doubles() {
		let mut cfg = config();
		cfg.x2_mode = true;
		let controller = VarDiffController::new(cfg);
		let mut state = controller.new_state();
		let start = Instant::now();
		let mut result = None;
		for i in 0..40 {
			let now = start + Duration::from_secs(2 * i);
			if let Some(d) = controller.on_submit(&mut state, 8.0, now) {
				result = Some(d);
				break;
			}
		}
		assert_eq!(result, Some(16.0));
	}
}
