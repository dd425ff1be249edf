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

//! Cluster-wide POSIX advisory byte-range lock state machine.
//!
//! This crate is the portable core of a gdlm-style `plockd`: the wire
//! records, the range-overlap algebra, the per-file resource table, the
//! lock/unlock/get engine, the cluster-ordering dispatch, and the
//! checkpoint pack/unpack format. It has no knowledge of how requests
//! arrive (character device, socket, ...) or how a group is transported
//! (corosync, a loopback stub, ...) — those live behind the traits in
//! [`cluster`] and [`checkpoint`], implemented by a daemon crate.
#![forbid(unsafe_code)]

pub mod checkpoint;
pub mod cluster;
pub mod dump;
pub mod engine;
pub mod error;
pub mod range;
pub mod resource;
pub mod wire;

pub use engine::{do_get, do_lock, do_unlock, is_conflict, LockOutcome};
pub use error::{CheckpointError, ClusterError, RequestError};
pub use resource::{MountGroup, PosixLock, Resource, Waiter};
pub use wire::{GdlmHeader, GroupMessage, LockRequest, OpType, RANGE_EOF};
