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

//! An in-process stand-in for the totally-ordered group-messaging
//! substrate, used for single-node deployment and for
//! exercising multi-replica convergence in tests without a real cluster
//! messaging service.
//!
//! [`LoopbackBus`] is a single append-only log shared by every
//! [`LoopbackTransport`] handle drawn from it. Broadcasting appends to the
//! log; each handle tracks its own read cursor into that same log, so
//! every handle observes every broadcast — including its own — in exactly
//! the order they were appended. That is the one property a real
//! clustered messaging substrate is required to provide, and it's what
//! the lock engine's determinism depends on.

use std::cell::RefCell;
use std::rc::Rc;

use plock::cluster::GroupTransport;
use plock::error::ClusterError;
use plock::wire::GroupMessage;

#[derive(Default)]
struct Bus {
	log: Vec<(u32, GroupMessage)>,
}

/// The shared broadcast log. Cheap to clone: clones share the same
/// underlying log via `Rc`.
#[derive(Clone, Default)]
pub struct LoopbackBus {
	inner: Rc<RefCell<Bus>>,
}

impl LoopbackBus {
	#[must_use]
	pub fn new() -> LoopbackBus {
		LoopbackBus::default()
	}

	/// Returns a transport handle for `nodeid`, reading from the start of
	/// the shared log.
	#[must_use]
	pub fn handle(&self, nodeid: u32) -> LoopbackTransport {
		LoopbackTransport {
			bus: self.inner.clone(),
			nodeid,
			cursor: 0,
		}
	}
}

/// One node's view of a [`LoopbackBus`]: a `GroupTransport` for
/// broadcasting, plus [`LoopbackTransport::try_recv`] to drain deliveries
/// (not part of the `GroupTransport` trait, since real delivery mechanisms
/// are too varied to unify behind one polling method — see
/// `plock::cluster::GroupTransport`'s docs).
pub struct LoopbackTransport {
	bus: Rc<RefCell<Bus>>,
	nodeid: u32,
	cursor: usize,
}

impl GroupTransport for LoopbackTransport {
	fn broadcast(&mut self, message: GroupMessage) -> Result<(), ClusterError> {
		self.bus.borrow_mut().log.push((self.nodeid, message));
		Ok(())
	}
}

impl LoopbackTransport {
	/// Returns the next undelivered message for this handle, if any, along
	/// with the nodeid that broadcast it.
	pub fn try_recv(&mut self) -> Option<(u32, GroupMessage)> {
		let bus = self.bus.borrow();
		let item = bus.log.get(self.cursor).copied();
		if item.is_some() {
			self.cursor += 1;
		}
		item
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use plock::wire::{GdlmHeader, LockRequest, OpType};

	fn sample(nodeid: u32) -> GroupMessage {
		GroupMessage {
			header: GdlmHeader { src_nodeid: nodeid, to_nodeid: 0 },
			payload: LockRequest {
				optype: OpType::Lock,
				fsid: 1,
				number: 1,
				start: 0,
				end: 9,
				ex: true,
				wait: false,
				pid: nodeid,
				owner: nodeid as u64,
				nodeid,
				rv: -1,
			},
		}
	}

	#[test]
	fn every_handle_sees_every_broadcast_in_order() {
		let bus = LoopbackBus::new();
		let mut a = bus.handle(1);
		let mut b = bus.handle(2);

		a.broadcast(sample(1)).unwrap();
		b.broadcast(sample(2)).unwrap();

		let a_seen: Vec<_> = std::iter::from_fn(|| a.try_recv()).collect();
		let b_seen: Vec<_> = std::iter::from_fn(|| b.try_recv()).collect();
		assert_eq!(a_seen.len(), 2);
		assert_eq!(a_seen, b_seen);
		assert_eq!(a_seen[0].0, 1);
		assert_eq!(a_seen[1].0, 2);
	}

	#[test]
	fn late_joining_handle_starts_from_the_beginning_of_the_log() {
		let bus = LoopbackBus::new();
		let mut a = bus.handle(1);
		a.broadcast(sample(1)).unwrap();

		let mut c = bus.handle(3);
		assert!(c.try_recv().is_some());
	}
}
