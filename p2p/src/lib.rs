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

//! Speaks just enough of the coin's native peer-to-peer wire protocol to
//! observe `inv` announcements, which the pool uses as its block
//! notification channel.

#![deny(non_upper_case_globals)]
#![deny(non_camel_case_types)]
#![deny(non_snake_case)]
#![deny(unused_mut)]
#![warn(missing_docs)]

#[macro_use]
extern crate serde_derive;
#[macro_use]
extern crate log;

extern crate equipool_core as core;
extern crate equipool_util as util;

pub mod msg;
pub mod peer;
pub mod types;

pub use crate::peer::Peer;
pub use crate::types::{Error, P2PConfig, PeerAdapter};
