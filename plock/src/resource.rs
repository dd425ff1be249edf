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

//! The per-file resource table.

use std::collections::{HashMap, VecDeque};

use crate::wire::LockRequest;

/// A granted POSIX advisory lock held on a [`Resource`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PosixLock {
	pub start: u64,
	pub end: u64,
	pub ex: bool,
	pub nodeid: u32,
	pub owner: u64,
	pub pid: u32,
}

impl PosixLock {
	#[inline]
	#[must_use]
	pub fn identity(&self) -> (u32, u64) {
		(self.nodeid, self.owner)
	}
}

/// A parked request, retried on every state change of its resource. Holds
/// the full original [`LockRequest`] so it can be re-applied verbatim once
/// it stops conflicting.
pub type Waiter = LockRequest;

/// The lock-state record for one file within a mount group.
///
/// `locks` and `waiters` preserve insertion order: the dump format, the
/// checkpoint section layout, and waiter FIFO semantics all depend on it.
#[derive(Clone, Debug, Default)]
pub struct Resource {
	pub number: u64,
	pub locks: Vec<PosixLock>,
	pub waiters: VecDeque<Waiter>,
}

impl Resource {
	#[must_use]
	pub fn new(number: u64) -> Resource {
		Resource {
			number,
			locks: Vec::new(),
			waiters: VecDeque::new(),
		}
	}

	/// A resource with no held locks and no waiters is garbage.
	#[inline]
	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.locks.is_empty() && self.waiters.is_empty()
	}
}

/// The set of files jointly mounted by a group of nodes.
#[derive(Clone, Debug)]
pub struct MountGroup {
	pub name: String,
	pub fsid: u32,
	pub resources: HashMap<u64, Resource>,
	/// Unix timestamp (seconds) of the last `lock`/`unlock` applied to this
	/// group. Used by the checkpoint write-skip optimization.
	pub last_plock_time: i64,
	/// Unix timestamp (seconds) of the last successful checkpoint write.
	pub last_checkpoint_time: i64,
	/// Opaque handle to a previously created checkpoint, if any, so it can
	/// be unlinked before a new one is written.
	pub ckpt_handle: Option<String>,
}

impl MountGroup {
	#[must_use]
	pub fn new(name: impl Into<String>, fsid: u32) -> MountGroup {
		MountGroup {
			name: name.into(),
			fsid,
			resources: HashMap::new(),
			last_plock_time: 0,
			last_checkpoint_time: 0,
			ckpt_handle: None,
		}
	}

	/// Finds a resource by number, optionally creating it if absent
	/// (`find_resource` in the original).
	pub fn find_resource(&mut self, number: u64, create: bool) -> Option<&mut Resource> {
		if create {
			Some(self.resources.entry(number).or_insert_with(|| Resource::new(number)))
		} else {
			self.resources.get_mut(&number)
		}
	}

	/// Garbage-collects a resource if both its lock and waiter lists are
	/// empty.
	pub fn gc_resource(&mut self, number: u64) {
		if let Some(r) = self.resources.get(&number) {
			if r.is_empty() {
				self.resources.remove(&number);
			}
		}
	}

	#[inline]
	#[must_use]
	pub fn resource_count(&self) -> usize {
		self.resources.len()
	}

	#[inline]
	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.resources.is_empty()
	}
}
