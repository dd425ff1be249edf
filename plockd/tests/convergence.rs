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

//! Every node applying the same broadcast stream should end up with the
//! same lock table, regardless of which node originated each request.
//! These tests drive two [`plockd::transport::LoopbackTransport`] handles
//! off one shared bus and replay the traffic into two independent
//! `MountGroup`s, the way two real daemon processes would each see their
//! own copy converge.

use plock::cluster::{process_delivery, submit};
use plock::resource::MountGroup;
use plock::wire::{LockRequest, OpType};
use plockd::transport::LoopbackBus;

const FSID: u32 = 7;
const NUMBER: u64 = 42;

fn lock_req(nodeid: u32, owner: u64, start: u64, end: u64, ex: bool, wait: bool) -> LockRequest {
	LockRequest {
		optype: OpType::Lock,
		fsid: FSID,
		number: NUMBER,
		start,
		end,
		ex,
		wait,
		pid: owner as u32,
		owner,
		nodeid,
		rv: 0,
	}
}

fn unlock_req(nodeid: u32, owner: u64, start: u64, end: u64) -> LockRequest {
	LockRequest {
		optype: OpType::Unlock,
		fsid: FSID,
		number: NUMBER,
		start,
		end,
		ex: false,
		wait: false,
		pid: owner as u32,
		owner,
		nodeid,
		rv: 0,
	}
}

/// Drains every message a transport handle has received so far, applying
/// each to `mg` as the originating or a peer node would.
fn drain(mg: &mut MountGroup, own_nodeid: u32, transport: &mut plockd::transport::LoopbackTransport) {
	while let Some((from, message)) = transport.try_recv() {
		process_delivery(mg, own_nodeid, from, &message).unwrap();
	}
}

#[test]
fn two_nodes_converge_on_the_same_lock_table() {
	let bus = LoopbackBus::new();
	let mut transport_a = bus.handle(1);
	let mut transport_b = bus.handle(2);
	let mut mg_a = MountGroup::new("convergence", FSID);
	let mut mg_b = MountGroup::new("convergence", FSID);

	// Node 1 locks [0, 9], node 2 locks the disjoint range [20, 29]; both
	// broadcasts land in the shared log regardless of which transport
	// handle originated them.
	submit(&mut transport_a, 1, lock_req(1, 100, 0, 9, true, false)).unwrap();
	submit(&mut transport_b, 2, lock_req(2, 200, 20, 29, true, false)).unwrap();

	drain(&mut mg_a, 1, &mut transport_a);
	drain(&mut mg_b, 2, &mut transport_b);

	let resource_a = &mg_a.resources[&NUMBER];
	let resource_b = &mg_b.resources[&NUMBER];
	assert_eq!(resource_a.locks.len(), 2);
	assert_eq!(resource_a.locks.len(), resource_b.locks.len());

	let mut a_sorted = resource_a.locks.clone();
	let mut b_sorted = resource_b.locks.clone();
	a_sorted.sort_by_key(|l| l.start);
	b_sorted.sort_by_key(|l| l.start);
	assert_eq!(a_sorted, b_sorted);
}

#[test]
fn a_blocked_waiter_is_granted_identically_on_every_replica_once_unlocked() {
	let bus = LoopbackBus::new();
	let mut transport_a = bus.handle(1);
	let mut transport_b = bus.handle(2);
	let mut mg_a = MountGroup::new("convergence", FSID);
	let mut mg_b = MountGroup::new("convergence", FSID);

	submit(&mut transport_a, 1, lock_req(1, 100, 0, 9, true, false)).unwrap();
	drain(&mut mg_a, 1, &mut transport_a);
	drain(&mut mg_b, 2, &mut transport_b);

	// Node 2 wants the same range and must wait.
	submit(&mut transport_b, 2, lock_req(2, 200, 0, 9, true, true)).unwrap();
	drain(&mut mg_a, 1, &mut transport_a);
	drain(&mut mg_b, 2, &mut transport_b);
	assert_eq!(mg_a.resources[&NUMBER].waiters.len(), 1);
	assert_eq!(mg_b.resources[&NUMBER].waiters.len(), 1);

	// Node 1 unlocks; the drain on every replica grants node 2's waiter.
	submit(&mut transport_a, 1, unlock_req(1, 100, 0, 9)).unwrap();
	drain(&mut mg_a, 1, &mut transport_a);
	drain(&mut mg_b, 2, &mut transport_b);

	assert!(mg_a.resources[&NUMBER].waiters.is_empty());
	assert!(mg_b.resources[&NUMBER].waiters.is_empty());
	assert_eq!(mg_a.resources[&NUMBER].locks, mg_b.resources[&NUMBER].locks);
	assert_eq!(mg_a.resources[&NUMBER].locks[0].nodeid, 2);
}
