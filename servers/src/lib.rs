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

//! Main crate putting together all the other crates that compose the pool
//! worker: job management, the stratum server, vardiff and the
//! orchestrator that wires them to the coin daemons.

#![deny(non_upper_case_globals)]
#![deny(non_camel_case_types)]
#![deny(non_snake_case)]
#![deny(unused_mut)]
#![warn(missing_docs)]

extern crate bufstream;
extern crate rand;
extern crate serde;
#[macro_use]
extern crate serde_derive;
extern crate serde_json;
#[macro_use]
extern crate log;
extern crate chrono;

extern crate equipool_core as core;
extern crate equipool_p2p as p2p;
extern crate equipool_rpc as rpc;
extern crate equipool_util as util;

pub mod common;
pub mod mining;
mod pool;

pub use crate::common::stats::{PoolStats, WorkerStats};
pub use crate::common::types::{
	BanningConfig, CoinConfig, Error, PoolConfig, PortConfig, ShareEvent, TlsConfig,
	VarDiffConfig,
};
pub use crate::pool::server::Server;
