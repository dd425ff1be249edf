// Copyright 2026 the gdlm-plockd contributors.
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
//
// SPDX-License-Identifier: Apache-2.0

//! OS glue for the `plock` core: the request channel, the directory-backed
//! checkpoint, the in-process group-message loopback, configuration, and
//! the daemon event loop. Split out as a library (with `src/main.rs` as a
//! thin binary over it) so integration tests can drive multiple
//! `DaemonContext`s against a shared `LoopbackBus` the way a real
//! multi-node cluster would.

pub mod admin;
pub mod channel;
pub mod checkpoint;
pub mod config;
pub mod daemon;
pub mod devnode;
pub mod error;
pub mod transport;
