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

//! The lock engine: `do_lock`, `do_unlock`, `do_get`, and waiter retry.

use crate::error::RequestError;
use crate::range::{overlap_type, ranges_overlap, shrink, Overlap};
use crate::resource::{MountGroup, PosixLock, Resource};
use crate::wire::{LockRequest, OpType};

/// What an engine operation produced, for the caller (the cluster dispatch
/// layer) to turn into kernel replies.
///
/// The original C daemon wrote a single reply inline from `receive_plock`
/// using the `rv` of the top-level operation; it did not reply for waiters
/// unblocked as a side effect. This type makes that side effect explicit so
/// every granted waiter gets its own reply, exactly one per waiter at the
/// moment it is granted.
#[derive(Clone, Debug, Default)]
pub struct LockOutcome {
	/// The reply for the request that triggered this operation, or `None`
	/// if the request was queued as a waiter (no reply is sent until it is
	/// later granted).
	pub reply: Option<LockRequest>,
	/// Previously queued waiters that this operation unblocked, each
	/// carrying its own `rv` for the transport to reply with.
	pub granted_waiters: Vec<LockRequest>,
}

/// Returns `true` if `req` conflicts with any currently held lock in
/// `resource`.
///
/// Locks sharing `req`'s identity key never conflict; of the remainder,
/// conflict requires both range overlap and at least one side exclusive.
#[must_use]
pub fn is_conflict(resource: &Resource, req: &LockRequest) -> bool {
	resource.locks.iter().any(|lk| {
		if lk.identity() == req.identity() {
			return false;
		}
		if !ranges_overlap(lk.start, lk.end, req.start, req.end) {
			return false;
		}
		req.ex || lk.ex
	})
}

fn new_lock(req: &LockRequest, start: u64, end: u64, ex: bool) -> PosixLock {
	PosixLock {
		start,
		end,
		ex,
		nodeid: req.nodeid,
		owner: req.owner,
		pid: req.pid,
	}
}

/// `N` is flush with one edge of `E` (case 1): `E` becomes `N`'s range and
/// mode; the residual non-overlapping portion of the old `E` survives as a
/// new lock in `E`'s old mode.
fn lock_case1(resource: &mut Resource, index: usize, req: &LockRequest) {
	let old = resource.locks[index];
	let mut start2 = old.start;
	let mut end2 = old.end;
	shrink(&mut start2, &mut end2, req.start, req.end);
	resource.locks[index] = new_lock(req, req.start, req.end, req.ex);
	resource.locks.push(new_lock(req, start2, end2, !req.ex));
}

/// `N` strictly inside `E`, which overlaps both sides (case 2): `E`'s front
/// and back fragments survive as new locks in `E`'s old mode; `E` itself
/// becomes `N`.
fn lock_case2(resource: &mut Resource, index: usize, req: &LockRequest) {
	let old = resource.locks[index];
	resource.locks.push(new_lock(req, old.start, req.start - 1, !req.ex));
	resource.locks.push(new_lock(req, req.end + 1, old.end, !req.ex));
	resource.locks[index] = new_lock(req, req.start, req.end, req.ex);
}

/// Applies a granted lock request against same-identity-key held locks,
/// rewriting the lock set to reflect the merge/split/shrink. Assumes the
/// caller has already established there is no cross-owner conflict.
fn lock_internal(resource: &mut Resource, req: &LockRequest) -> Result<(), RequestError> {
	let mut i = 0;
	while i < resource.locks.len() {
		let lk = resource.locks[i];
		if lk.identity() != req.identity() || !ranges_overlap(lk.start, lk.end, req.start, req.end)
		{
			i += 1;
			continue;
		}

		let overlap = overlap_type(req.start, req.end, lk.start, lk.end)
			.ok_or(RequestError::Invalid)?;

		match overlap {
			Overlap::Identical => {
				if lk.ex != req.ex {
					resource.locks[i].ex = req.ex;
				}
				return Ok(());
			}
			Overlap::FlushInside => {
				if lk.ex == req.ex {
					return Ok(());
				}
				lock_case1(resource, i, req);
				return Ok(());
			}
			Overlap::StrictlyInside => {
				if lk.ex == req.ex {
					return Ok(());
				}
				lock_case2(resource, i, req);
				return Ok(());
			}
			Overlap::Covered => {
				// RE within RN: remove and keep scanning, RN may cover
				// further same-owner ranges (mirrors unlock_internal's
				// identical case; the C source's bare `break` here only
				// exits the `switch`, not the enclosing list iteration).
				resource.locks.remove(i);
				continue;
			}
			Overlap::Partial => {
				if lk.start < req.start {
					resource.locks[i].end = req.start - 1;
				} else {
					resource.locks[i].start = req.end + 1;
				}
				i += 1;
				continue;
			}
		}
	}

	// Cases 3 and 4 (and "no overlap found at all") fall through here: the
	// new range was not subsumed by an existing same-owner mutation, so it
	// is appended as a new held lock.
	resource
		.locks
		.push(new_lock(req, req.start, req.end, req.ex));
	Ok(())
}

/// Removes `req`'s range from same-identity-key held locks, splitting or
/// shrinking as needed.
fn unlock_internal(resource: &mut Resource, req: &LockRequest) -> Result<(), RequestError> {
	let mut i = 0;
	while i < resource.locks.len() {
		let lk = resource.locks[i];
		if lk.identity() != req.identity() || !ranges_overlap(lk.start, lk.end, req.start, req.end)
		{
			i += 1;
			continue;
		}

		let overlap = overlap_type(req.start, req.end, lk.start, lk.end)
			.ok_or(RequestError::Invalid)?;

		match overlap {
			Overlap::Identical => {
				resource.locks.remove(i);
				return Ok(());
			}
			Overlap::FlushInside => {
				let mut start2 = lk.start;
				let mut end2 = lk.end;
				shrink(&mut start2, &mut end2, req.start, req.end);
				resource.locks[i].start = start2;
				resource.locks[i].end = end2;
				return Ok(());
			}
			Overlap::StrictlyInside => {
				let back = PosixLock {
					start: req.end + 1,
					end: lk.end,
					ex: lk.ex,
					nodeid: lk.nodeid,
					owner: lk.owner,
					pid: lk.pid,
				};
				resource.locks[i].end = req.start - 1;
				resource.locks.insert(i + 1, back);
				return Ok(());
			}
			Overlap::Covered => {
				// RE within RN: remove and keep scanning, RN may cover
				// further same-owner ranges.
				resource.locks.remove(i);
				continue;
			}
			Overlap::Partial => {
				let mut start2 = lk.start;
				let mut end2 = lk.end;
				shrink(&mut start2, &mut end2, req.start, req.end);
				resource.locks[i].start = start2;
				resource.locks[i].end = end2;
				i += 1;
				continue;
			}
		}
	}
	Ok(())
}

/// Single-pass FIFO drain of a resource's waiter queue, retried after every
/// successful lock/unlock.
fn drain_waiters(resource: &mut Resource) -> Vec<LockRequest> {
	let mut granted = Vec::new();
	let mut i = 0;
	while i < resource.waiters.len() {
		let waiting = resource.waiters[i];
		if is_conflict(resource, &waiting) {
			i += 1;
			continue;
		}
		resource.waiters.remove(i);

		let mut reply = waiting;
		reply.rv = match lock_internal(resource, &waiting) {
			Ok(()) => 0,
			Err(e) => e.to_rv(),
		};
		granted.push(reply);
		// Do not advance `i`: the next waiter has shifted into this slot.
	}
	granted
}

/// Locates-or-creates the target resource, tests for conflict, queues or
/// applies the request, and drains the waiter queue.
pub fn do_lock(mg: &mut MountGroup, req: &LockRequest) -> LockOutcome {
	let resource = mg
		.resources
		.entry(req.number)
		.or_insert_with(|| Resource::new(req.number));

	if is_conflict(resource, req) {
		let mut reply = *req;
		if !req.wait {
			reply.rv = RequestError::Again.to_rv();
			return LockOutcome {
				reply: Some(reply),
				granted_waiters: Vec::new(),
			};
		}
		resource.waiters.push_back(*req);
		return LockOutcome {
			reply: None,
			granted_waiters: Vec::new(),
		};
	}

	let mut reply = *req;
	let outcome = match lock_internal(resource, req) {
		Ok(()) => {
			reply.rv = 0;
			let granted_waiters = drain_waiters(resource);
			LockOutcome {
				reply: Some(reply),
				granted_waiters,
			}
		}
		Err(e) => {
			reply.rv = e.to_rv();
			LockOutcome {
				reply: Some(reply),
				granted_waiters: Vec::new(),
			}
		}
	};

	mg.gc_resource(req.number);
	outcome
}

/// Removes `req`'s range from the target resource's held locks and drains
/// its waiter queue.
///
/// An unlock of a resource with no entry is tolerated: the original daemon
/// returns `-ENOENT` but treats it leniently, since an already-gone resource
/// means there was nothing to unlock.
pub fn do_unlock(mg: &mut MountGroup, req: &LockRequest) -> LockOutcome {
	let mut reply = *req;

	let Some(resource) = mg.resources.get_mut(&req.number) else {
		reply.rv = RequestError::NotFound.to_rv();
		return LockOutcome {
			reply: Some(reply),
			granted_waiters: Vec::new(),
		};
	};

	let outcome = match unlock_internal(resource, req) {
		Ok(()) => {
			reply.rv = 0;
			let granted_waiters = drain_waiters(resource);
			LockOutcome {
				reply: Some(reply),
				granted_waiters,
			}
		}
		Err(e) => {
			reply.rv = e.to_rv();
			LockOutcome {
				reply: Some(reply),
				granted_waiters: Vec::new(),
			}
		}
	};

	mg.gc_resource(req.number);
	outcome
}

/// The `GET` operation: poll-only, never broadcast, never mutates state.
///
/// The original daemon stubs this out (`/* rv = do_get(mg, &info); */`)
/// and its intended semantics were never filled in. This preserves the
/// stub rather than inventing behavior: always succeeds, reports no
/// conflict, touches nothing.
pub fn do_get(_mg: &MountGroup, req: &LockRequest) -> LockOutcome {
	debug_assert_eq!(req.optype, OpType::Get);
	let mut reply = *req;
	reply.rv = 0;
	LockOutcome {
		reply: Some(reply),
		granted_waiters: Vec::new(),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn req(
		number: u64,
		start: u64,
		end: u64,
		ex: bool,
		wait: bool,
		nodeid: u32,
		owner: u64,
	) -> LockRequest {
		LockRequest {
			optype: OpType::Lock,
			fsid: 1,
			number,
			start,
			end,
			ex,
			wait,
			pid: owner as u32,
			owner,
			nodeid,
			rv: -1,
		}
	}

	fn held(mg: &MountGroup, number: u64) -> Vec<(u64, u64, bool, u32, u64)> {
		let mut v: Vec<_> = mg.resources[&number]
			.locks
			.iter()
			.map(|l| (l.start, l.end, l.ex, l.nodeid, l.owner))
			.collect();
		v.sort();
		v
	}

	#[test]
	fn shared_locks_from_different_owners_coexist() {
		let mut mg = MountGroup::new("g", 1);
		let a = do_lock(&mut mg, &req(1, 0, 99, false, false, 1, 1));
		assert_eq!(a.reply.unwrap().rv, 0);
		let b = do_lock(&mut mg, &req(1, 0, 99, false, false, 2, 2));
		assert_eq!(b.reply.unwrap().rv, 0);
		assert_eq!(held(&mg, 1).len(), 2);
	}

	#[test]
	fn exclusive_conflict_with_wait_then_unlock_grants_waiter() {
		let mut mg = MountGroup::new("g", 1);
		let a = do_lock(&mut mg, &req(1, 0, 99, true, false, 1, 1));
		assert_eq!(a.reply.unwrap().rv, 0);

		let b = do_lock(&mut mg, &req(1, 50, 150, true, true, 2, 2));
		assert!(b.reply.is_none(), "queued request gets no immediate reply");
		assert!(b.granted_waiters.is_empty());
		assert_eq!(mg.resources[&1].waiters.len(), 1);

		let unlock_req = LockRequest { optype: OpType::Unlock, ..req(1, 0, 99, true, false, 1, 1) };
		let u = do_unlock(&mut mg, &unlock_req);
		assert_eq!(u.reply.unwrap().rv, 0);
		assert_eq!(u.granted_waiters.len(), 1);
		assert_eq!(u.granted_waiters[0].rv, 0);
		assert_eq!(u.granted_waiters[0].owner, 2);
		assert!(mg.resources[&1].waiters.is_empty());
	}

	#[test]
	fn non_waiting_conflict_returns_eagain_without_mutation() {
		let mut mg = MountGroup::new("g", 1);
		do_lock(&mut mg, &req(1, 0, 99, true, false, 1, 1));
		let before = held(&mg, 1);

		let b = do_lock(&mut mg, &req(1, 0, 99, true, false, 2, 2));
		assert_eq!(b.reply.unwrap().rv, RequestError::Again.to_rv());
		assert_eq!(held(&mg, 1), before);
	}

	#[test]
	fn same_owner_upgrade_is_single_lock_case0() {
		let mut mg = MountGroup::new("g", 1);
		do_lock(&mut mg, &req(1, 10, 20, false, false, 1, 1));
		do_lock(&mut mg, &req(1, 10, 20, true, false, 1, 1));
		assert_eq!(held(&mg, 1), vec![(10, 20, true, 1, 1)]);
	}

	#[test]
	fn same_owner_repeat_identical_lock_is_noop() {
		let mut mg = MountGroup::new("g", 1);
		do_lock(&mut mg, &req(1, 10, 20, true, false, 1, 1));
		do_lock(&mut mg, &req(1, 10, 20, true, false, 1, 1));
		assert_eq!(held(&mg, 1), vec![(10, 20, true, 1, 1)]);
	}

	#[test]
	fn same_owner_split_case2_differing_mode() {
		let mut mg = MountGroup::new("g", 1);
		do_lock(&mut mg, &req(1, 0, 100, true, false, 1, 1));
		do_lock(&mut mg, &req(1, 40, 60, false, false, 1, 1));
		assert_eq!(
			held(&mg, 1),
			vec![(0, 39, true, 1, 1), (40, 60, false, 1, 1), (61, 100, true, 1, 1)],
		);
	}

	#[test]
	fn lock_covering_multiple_same_owner_ranges_merges_them_all() {
		let mut mg = MountGroup::new("g", 1);
		do_lock(&mut mg, &req(1, 0, 10, true, false, 1, 1));
		do_lock(&mut mg, &req(1, 20, 30, true, false, 1, 1));
		let outcome = do_lock(&mut mg, &req(1, 0, 35, true, false, 1, 1));
		assert_eq!(outcome.reply.unwrap().rv, 0);
		assert_eq!(held(&mg, 1), vec![(0, 35, true, 1, 1)]);
	}

	#[test]
	fn unlock_covering_multiple_ranges_removes_all_and_gcs() {
		let mut mg = MountGroup::new("g", 1);
		do_lock(&mut mg, &req(1, 0, 10, true, false, 1, 1));
		do_lock(&mut mg, &req(1, 20, 30, true, false, 1, 1));
		do_lock(&mut mg, &req(1, 40, 50, true, false, 1, 1));

		let unlock_req = LockRequest { optype: OpType::Unlock, ..req(1, 0, 60, true, false, 1, 1) };
		let u = do_unlock(&mut mg, &unlock_req);
		assert_eq!(u.reply.unwrap().rv, 0);
		assert!(mg.resources.get(&1).is_none(), "resource is GC'd");
	}

	#[test]
	fn unlock_of_unknown_resource_reports_enoent() {
		let mut mg = MountGroup::new("g", 1);
		let unlock_req = LockRequest { optype: OpType::Unlock, ..req(99, 0, 10, true, false, 1, 1) };
		let u = do_unlock(&mut mg, &unlock_req);
		assert_eq!(u.reply.unwrap().rv, RequestError::NotFound.to_rv());
	}

	#[test]
	fn get_never_mutates_state() {
		let mut mg = MountGroup::new("g", 1);
		do_lock(&mut mg, &req(1, 0, 10, true, false, 1, 1));
		let before = held(&mg, 1);
		let get_req = LockRequest { optype: OpType::Get, ..req(1, 0, 10, true, false, 2, 2) };
		let g = do_get(&mg, &get_req);
		assert_eq!(g.reply.unwrap().rv, 0);
		assert_eq!(held(&mg, 1), before);
	}

	#[test]
	fn whole_file_range_interacts_with_narrower_lock() {
		let mut mg = MountGroup::new("g", 1);
		do_lock(&mut mg, &req(1, 100, 200, true, false, 1, 1));
		let outcome = do_lock(&mut mg, &req(1, 0, u64::MAX, true, false, 1, 1));
		assert_eq!(outcome.reply.unwrap().rv, 0);
		assert_eq!(held(&mg, 1), vec![(0, u64::MAX, true, 1, 1)]);
	}
}
