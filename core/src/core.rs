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

//! Core types: hashes, merkle trees, daemon block templates and the mining
//! jobs derived from them.

pub mod block;
pub mod hash;
pub mod merkle;
pub mod template;

pub use self::block::JobTemplate;
pub use self::hash::Hash;
pub use self::template::RpcData;
