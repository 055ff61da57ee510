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

//! Main for building the binary of one equipool worker process.

#[macro_use]
extern crate log;

use clap::{App, Arg};
use std::process::exit;
use std::sync::mpsc;

use equipool_config as config;
use equipool_servers as servers;
use equipool_util as util;

fn main() {
	let args = App::new("equipool")
		.version(env!("CARGO_PKG_VERSION"))
		.about("Stratum mining pool server for Equihash-family coins")
		.arg(
			Arg::with_name("config")
				.short("c")
				.long("config")
				.help("Path to the configuration file")
				.takes_value(true),
		)
		.get_matches();

	let config_path = args.value_of("config").map(|p| p.to_string());
	let global_config = match config::GlobalConfig::new(config_path) {
		Ok(config) => config,
		Err(e) => {
			eprintln!("{}", e);
			exit(1);
		}
	};

	let logging = global_config.members.logging.clone().unwrap_or_default();
	util::init_logger(&logging);
	info!(
		"using configuration file at {}",
		global_config.config_file_path.display()
	);

	let server = match servers::Server::start(global_config.members.pool) {
		Ok(server) => server,
		Err(e) => {
			error!("pool failed to start: {:?}", e);
			exit(1);
		}
	};

	// park until ctrl-c, then wind the components down in order
	let (stop_tx, stop_rx) = mpsc::channel();
	ctrlc::set_handler(move || {
		let _ = stop_tx.send(());
	})
	.expect("error setting ctrl-c handler");

	let _ = stop_rx.recv();
	server.stop();
	server.join();
	info!("equipool stopped");
}
