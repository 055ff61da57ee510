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

//! Logging wrapper to be used throughout all crates in the workspace.

use backtrace::Backtrace;
use log::{error, LevelFilter};
use log4rs::append::console::ConsoleAppender;
use log4rs::append::file::FileAppender;
use log4rs::append::rolling_file::policy::compound::roll::fixed_window::FixedWindowRoller;
use log4rs::append::rolling_file::policy::compound::trigger::size::SizeTrigger;
use log4rs::append::rolling_file::policy::compound::CompoundPolicy;
use log4rs::append::rolling_file::RollingFileAppender;
use log4rs::append::Append;
use log4rs::config::{Appender, Config, Root};
use log4rs::encode::pattern::PatternEncoder;
use log4rs::filter::threshold::ThresholdFilter;
use log4rs::filter::{Filter, Response};
use std::{panic, thread};

use crate::types::LoggingConfig;
use crate::Mutex;

/// One record per line with millisecond timestamps, the format operators
/// grep when correlating share events with daemon logs.
const LOG_PATTERN: &str = "{d(%Y-%m-%d %H:%M:%S%.3f)} {h({l})} [{M}] {m}{n}";

lazy_static! {
	// set once the global logger is installed; further calls are no-ops
	static ref LOG_INIT: Mutex<bool> = Mutex::new(false);
}

/// Only records from our own crates reach the log. Dependency noise
/// (hyper connection churn, rustls handshakes) stays out.
#[derive(Debug)]
struct WorkspaceFilter;

impl Filter for WorkspaceFilter {
	fn filter(&self, record: &log::Record<'_>) -> Response {
		match record.module_path() {
			Some(path) if path.starts_with("equipool") => Response::Neutral,
			_ => Response::Reject,
		}
	}
}

// Every sink gets the same treatment: its own severity threshold plus the
// workspace filter.
fn filtered(name: &str, level: LevelFilter, sink: Box<dyn Append>) -> Appender {
	Appender::builder()
		.filter(Box::new(ThresholdFilter::new(level)))
		.filter(Box::new(WorkspaceFilter))
		.build(name, sink)
}

fn console_sink() -> Box<dyn Append> {
	Box::new(
		ConsoleAppender::builder()
			.encoder(Box::new(PatternEncoder::new(LOG_PATTERN)))
			.build(),
	)
}

// Plain file, or a rolling one when a rotation size is configured.
fn file_sink(config: &LoggingConfig) -> Box<dyn Append> {
	let encoder = Box::new(PatternEncoder::new(LOG_PATTERN));
	match config.rotate_size {
		Some(size) => {
			let roller = FixedWindowRoller::builder()
				.build(
					&format!("{}.{{}}", config.log_file_path),
					config.rotate_keep,
				)
				.expect("invalid log roller pattern");
			let policy = CompoundPolicy::new(Box::new(SizeTrigger::new(size)), Box::new(roller));
			Box::new(
				RollingFileAppender::builder()
					.append(!config.truncate_log)
					.encoder(encoder)
					.build(&config.log_file_path, Box::new(policy))
					.expect("cannot open log file"),
			)
		}
		None => Box::new(
			FileAppender::builder()
				.append(!config.truncate_log)
				.encoder(encoder)
				.build(&config.log_file_path)
				.expect("cannot open log file"),
		),
	}
}

/// Installs the process-wide logger from the `[logging]` section. Only
/// the first call does anything; the pool cannot re-route logs once its
/// threads are running.
pub fn init_logger(config: &LoggingConfig) {
	{
		let mut init = LOG_INIT.lock();
		if *init {
			return;
		}
		*init = true;
	}

	let mut appenders = vec![];
	let mut root = Root::builder();
	let mut verbosity = LevelFilter::Off;

	if !config.disable_stdout {
		appenders.push(filtered("stdout", config.stdout_log_level, console_sink()));
		root = root.appender("stdout");
		verbosity = verbosity.max(config.stdout_log_level);
	}

	if !config.log_file_path.is_empty() {
		appenders.push(filtered("file", config.file_log_level, file_sink(config)));
		root = root.appender("file");
		verbosity = verbosity.max(config.file_log_level);
	}

	let log_config = Config::builder()
		.appenders(appenders)
		.build(root.build(verbosity))
		.expect("invalid logging configuration");
	log4rs::init_config(log_config).expect("logger already installed");

	log_panics();
}

/// Console-only debug logging for unit and integration tests. Safe to
/// call from every test; only the first wins.
pub fn init_test_logger() {
	let mut config = LoggingConfig::default();
	config.stdout_log_level = LevelFilter::Debug;
	config.log_file_path = String::new();
	init_logger(&config);
}

// A crashed worker should leave its last words in the log file, not just
// on a long-gone stderr. Chains to the previous hook so stderr output is
// preserved too.
fn log_panics() {
	let previous = panic::take_hook();
	panic::set_hook(Box::new(move |info| {
		let thread = thread::current();
		error!(
			"thread '{}' {}\n{:?}",
			thread.name().unwrap_or("<unnamed>"),
			info,
			Backtrace::new()
		);
		previous(info);
	}));
}
