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

extern crate equipool_config as config;

use config::GlobalConfig;

// The sample file shipped at the repository root must always parse and
// pass semantic validation, since operators start from a copy of it.
#[test]
fn sample_config_file_is_valid() {
	let global_config = GlobalConfig::new(Some("../equipool.toml".to_string()))
		.unwrap_or_else(|e| panic!("Error parsing config file: {}", e));

	let pool = &global_config.members.pool;
	pool.validate().expect("sample config must validate");

	assert_eq!(pool.coin.algorithm, "equihash");
	assert_eq!(pool.coin.parameters.n, Some(200));
	assert_eq!(pool.port_map().len(), 2);
	assert!(pool.p2p.enabled);
	assert!(global_config.members.logging.is_some());

	// and it round-trips through the serializer
	let reserialized = global_config.ser_config().expect("serializable");
	assert!(reserialized.contains("peer_magic"));
}
