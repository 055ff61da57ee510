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

//! Logging configuration for a pool worker process.

use log::LevelFilter;

/// Logging setup for one worker. Supervisors typically run several worker
/// processes and capture all their stdout in one place, so the console
/// stays terse by default while each worker writes the full story to its
/// own rotated file. Levels parse from the usual strings ("warn", "info",
/// "debug", ...).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
	/// Verbosity of console output.
	pub stdout_log_level: LevelFilter,
	/// Turn console output off entirely.
	pub disable_stdout: bool,
	/// Path of the worker's log file. Empty disables file logging.
	pub log_file_path: String,
	/// Verbosity of the log file.
	pub file_log_level: LevelFilter,
	/// Start the log file fresh on boot instead of appending across
	/// restarts.
	pub truncate_log: bool,
	/// Rotate the log once it grows past this many bytes; unset keeps a
	/// single ever-growing file.
	pub rotate_size: Option<u64>,
	/// Rotated files kept before the oldest is dropped.
	pub rotate_keep: u32,
}

impl Default for LoggingConfig {
	fn default() -> LoggingConfig {
		LoggingConfig {
			stdout_log_level: LevelFilter::Warn,
			disable_stdout: false,
			log_file_path: "equipool.log".to_string(),
			file_log_level: LevelFilter::Info,
			truncate_log: false,
			rotate_size: Some(16 * 1024 * 1024),
			rotate_keep: 5,
		}
	}
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn partial_section_fills_from_defaults() {
		let config: LoggingConfig =
			toml::from_str("stdout_log_level = \"debug\"\nlog_file_path = \"\"").unwrap();
		assert_eq!(config.stdout_log_level, LevelFilter::Debug);
		assert!(config.log_file_path.is_empty());
		// untouched fields keep their defaults
		assert_eq!(config.file_log_level, LevelFilter::Info);
		assert_eq!(config.rotate_keep, 5);
	}
}
