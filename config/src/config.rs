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

//! Configuration file management

use std::env;
use std::fs::File;
use std::io::Read;
use std::path::PathBuf;

use crate::types::{ConfigError, ConfigMembers};

/// The default configuration file name, looked up in the working
/// directory when no explicit path is given.
pub const CONFIG_FILE_NAME: &str = "equipool.toml";

/// Whether a config file exists at the given path, or at the default
/// location when no path is given.
pub fn config_file_exists(path: &Option<String>) -> bool {
	resolve_path(path).map(|p| p.exists()).unwrap_or(false)
}

fn resolve_path(path: &Option<String>) -> Result<PathBuf, ConfigError> {
	match path {
		Some(path) => Ok(PathBuf::from(path)),
		None => {
			let mut default = env::current_dir()?;
			default.push(CONFIG_FILE_NAME);
			Ok(default)
		}
	}
}

/// Fully parsed configuration, remembering where it was read from.
#[derive(Debug, Clone)]
pub struct GlobalConfig {
	/// The file the configuration was read from.
	pub config_file_path: PathBuf,
	/// The parsed configuration sections.
	pub members: ConfigMembers,
}

impl GlobalConfig {
	/// Loads and parses the configuration file at the given path, or the
	/// default location. There are no built-in defaults for the pool
	/// section: a coin, an address, ports and daemons must be configured.
	pub fn new(path: Option<String>) -> Result<GlobalConfig, ConfigError> {
		let config_file_path = resolve_path(&path)?;
		if !config_file_path.exists() {
			return Err(ConfigError::FileNotFoundError(
				config_file_path.to_string_lossy().into_owned(),
			));
		}

		let mut file = File::open(&config_file_path)?;
		let mut contents = String::new();
		file.read_to_string(&mut contents)?;

		let members: ConfigMembers = toml::from_str(&contents).map_err(|e| {
			ConfigError::ParseError(
				config_file_path.to_string_lossy().into_owned(),
				format!("{}", e),
			)
		})?;

		Ok(GlobalConfig {
			config_file_path,
			members,
		})
	}

	/// Serializes the configuration back to toml, for writing out a
	/// normalized copy.
	pub fn ser_config(&self) -> Result<String, ConfigError> {
		toml::to_string(&self.members)
			.map_err(|e| ConfigError::SerializationError(format!("{}", e)))
	}
}

#[cfg(test)]
mod test {
	use super::*;

	fn sample_toml() -> &'static str {
		r#"
			[pool]
			address = "t1PoolAddressXXXXXXXXXXXXXXXXXXXXXX"
			connection_timeout = 600
			job_rebroadcast_timeout = 55
			block_refresh_interval = 400
			pool_id = 3
			instance_id = 7

			[pool.coin]
			name = "zclassic"
			symbol = "ZCL"
			algorithm = "equihash"
			peer_magic = "24e92764"
			peer_magic_testnet = "fa1af9bf"

			[pool.coin.parameters]
			n = 200
			k = 9
			personalization = "ZcashPoW"

			[pool.ports.3032]
			diff = 8.0

			[pool.ports.3032.var_diff]
			min_diff = 1.0
			max_diff = 512.0
			target_time = 15
			retarget_time = 90
			variance_percent = 30.0

			[pool.ports.3443]
			diff = 64.0
			tls = true

			[[pool.daemons]]
			host = "127.0.0.1"
			port = 8232
			user = "user"
			password = "pass"

			[pool.p2p]
			enabled = true
			host = "127.0.0.1"
			port = 8233
			disable_transactions = true

			[pool.banning]
			enabled = true
			time = 600
			invalid_percent = 50.0
			check_threshold = 500
			purge_interval = 300
			banned = ["10.1.1.1"]

			[pool.tls_options]
			enabled = true
			server_key = "key.pem"
			server_cert = "cert.pem"

			[pool.reward_recipients]
			"t1FeeAddressXXXXXXXXXXXXXXXXXXXXXXX" = 1.0

			[logging]
			stdout_log_level = "info"
			log_file_path = "equipool.log"
			file_log_level = "debug"
			rotate_size = 16777216
			rotate_keep = 5
		"#
	}

	#[test]
	fn parses_full_config() {
		let members: ConfigMembers = toml::from_str(sample_toml()).unwrap();
		let pool = &members.pool;
		assert_eq!(pool.coin.symbol, "ZCL");
		assert_eq!(pool.coin.parameters.n, Some(200));
		assert_eq!(pool.ports.len(), 2);
		assert!(pool.ports["3443"].tls);
		assert!(pool.ports["3032"].var_diff.is_some());
		assert_eq!(pool.port_map().len(), 2);
		assert_eq!(pool.daemons[0].port, 8232);
		assert!(pool.p2p.enabled);
		assert_eq!(pool.banning.banned, vec!["10.1.1.1"]);
		assert_eq!(pool.instance_id, Some(7));
		assert_eq!(pool.reward_recipients.len(), 1);
		assert!(members.logging.is_some());
		assert!(pool.validate().is_ok());
	}

	#[test]
	fn defaults_fill_optional_sections() {
		let minimal = r#"
			[pool]
			address = "t1PoolAddressXXXXXXXXXXXXXXXXXXXXXX"

			[pool.coin]
			name = "zclassic"
			symbol = "ZCL"
			algorithm = "equihash"
			peer_magic = "24e92764"

			[pool.ports.3032]
			diff = 8.0

			[[pool.daemons]]
			host = "127.0.0.1"
			port = 8232
			user = "user"
			password = "pass"
		"#;
		let members: ConfigMembers = toml::from_str(minimal).unwrap();
		let pool = &members.pool;
		assert_eq!(pool.connection_timeout, 600);
		assert_eq!(pool.job_rebroadcast_timeout, 55);
		assert_eq!(pool.block_refresh_interval, 0);
		assert!(!pool.p2p.enabled);
		assert!(pool.banning.enabled);
		assert_eq!(pool.banning.check_threshold, 500);
		assert!(pool.tls_options.is_none());
		assert!(pool.validate().is_ok());
	}

	#[test]
	fn missing_file_is_reported() {
		match GlobalConfig::new(Some("/definitely/not/here.toml".to_string())) {
			Err(ConfigError::FileNotFoundError(_)) => {}
			other => panic!("expected FileNotFoundError, got {:?}", other.map(|_| ())),
		}
	}
}
