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

//! Checkpoint snapshot and handover for joining nodes.
//!
//! A mount group's full lock state is written to a checkpoint section per
//! resource so a node joining mid-life can retrieve it instead of starting
//! from nothing. The checkpoint service itself (SA Forum `SaCkpt` in the
//! system this was distilled from) is a collaborator outside this crate's
//! scope; [`CheckpointBackend`] is the seam a daemon implements over
//! whatever storage stands in for it.

use std::collections::VecDeque;
use std::time::Duration;

use crate::error::CheckpointError;
use crate::resource::{MountGroup, PosixLock, Resource};
use crate::wire::LockRequest;

/// The number of bytes one packed lock or waiter record occupies in a
/// checkpoint section.
///
/// Grounded in the original `struct pack_plock` (start/end/owner as
/// `uint64_t`, pid/nodeid as `uint32_t`, ex/waiter as `uint8_t` plus
/// padding to a round size). Unlike the original, `owner` is actually
/// packed here: the C source declares the field but its `pack_section_buf`
/// never assigns it, so every lock restored from a checkpoint there comes
/// back with `owner == 0` and can no longer be told apart from a
/// same-node, different-fd lock by the same process. That's carried
/// forward as a latent bug in the source this was distilled from, not a
/// behavior worth reproducing.
pub const PACKED_PLOCK_LEN: usize = 40;

/// One packed held lock or waiter.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PackedPlock {
	pub start: u64,
	pub end: u64,
	pub owner: u64,
	pub pid: u32,
	pub nodeid: u32,
	pub ex: bool,
	pub waiter: bool,
}

impl PackedPlock {
	pub fn encode(&self, out: &mut [u8; PACKED_PLOCK_LEN]) {
		out[0..8].copy_from_slice(&self.start.to_le_bytes());
		out[8..16].copy_from_slice(&self.end.to_le_bytes());
		out[16..24].copy_from_slice(&self.owner.to_le_bytes());
		out[24..28].copy_from_slice(&self.pid.to_le_bytes());
		out[28..32].copy_from_slice(&self.nodeid.to_le_bytes());
		out[32] = self.ex as u8;
		out[33] = self.waiter as u8;
		out[34..40].fill(0); // reserved
	}

	pub fn decode(raw: &[u8; PACKED_PLOCK_LEN]) -> PackedPlock {
		PackedPlock {
			start: u64::from_le_bytes(raw[0..8].try_into().unwrap()),
			end: u64::from_le_bytes(raw[8..16].try_into().unwrap()),
			owner: u64::from_le_bytes(raw[16..24].try_into().unwrap()),
			pid: u32::from_le_bytes(raw[24..28].try_into().unwrap()),
			nodeid: u32::from_le_bytes(raw[28..32].try_into().unwrap()),
			ex: raw[32] != 0,
			waiter: raw[33] != 0,
		}
	}
}

/// Packs one resource's held locks, then its waiters, into a flat section
/// buffer. Order is significant: unpacking
/// relies on it to restore waiter FIFO order.
#[must_use]
pub fn pack_resource(resource: &Resource) -> Vec<u8> {
	let mut buf = Vec::with_capacity((resource.locks.len() + resource.waiters.len()) * PACKED_PLOCK_LEN);
	let mut record = [0u8; PACKED_PLOCK_LEN];

	for lock in &resource.locks {
		PackedPlock {
			start: lock.start,
			end: lock.end,
			owner: lock.owner,
			pid: lock.pid,
			nodeid: lock.nodeid,
			ex: lock.ex,
			waiter: false,
		}
		.encode(&mut record);
		buf.extend_from_slice(&record);
	}
	for waiter in &resource.waiters {
		PackedPlock {
			start: waiter.start,
			end: waiter.end,
			owner: waiter.owner,
			pid: waiter.pid,
			nodeid: waiter.nodeid,
			ex: waiter.ex,
			waiter: true,
		}
		.encode(&mut record);
		buf.extend_from_slice(&record);
	}
	buf
}

/// Rebuilds a resource from a packed section buffer (`unpack_section_buf`
/// in the original).
pub fn unpack_resource(number: u64, fsid: u32, buf: &[u8]) -> Result<Resource, CheckpointError> {
	if buf.len() % PACKED_PLOCK_LEN != 0 {
		return Err(CheckpointError::Malformed(format!(
			"section for resource {number:#x} has length {} not a multiple of {PACKED_PLOCK_LEN}",
			buf.len(),
		)));
	}

	let mut locks = Vec::new();
	let mut waiters = VecDeque::new();

	for chunk in buf.chunks_exact(PACKED_PLOCK_LEN) {
		let raw: [u8; PACKED_PLOCK_LEN] = chunk.try_into().unwrap();
		let packed = PackedPlock::decode(&raw);
		if packed.waiter {
			waiters.push_back(LockRequest {
				optype: crate::wire::OpType::Lock,
				fsid,
				number,
				start: packed.start,
				end: packed.end,
				ex: packed.ex,
				wait: true,
				pid: packed.pid,
				owner: packed.owner,
				nodeid: packed.nodeid,
				rv: -1,
			});
		} else {
			locks.push(PosixLock {
				start: packed.start,
				end: packed.end,
				ex: packed.ex,
				nodeid: packed.nodeid,
				owner: packed.owner,
				pid: packed.pid,
			});
		}
	}

	Ok(Resource { number, locks, waiters })
}

/// Storage for checkpoint sections, keyed by mount-group name and a
/// resource-number section id.
///
/// Stands in for the SA Forum checkpoint service the daemon this was
/// distilled from relies on (`saCkptCheckpointOpen`,
/// `saCkptSectionCreate`/iteration). A production backend is free to wrap
/// any durable or cluster-shared store; what matters is that every node's
/// backend instance can see sections another node wrote.
pub trait CheckpointBackend {
	/// Removes a previously created checkpoint for `group_name`, if any.
	fn unlink(&mut self, group_name: &str) -> Result<(), CheckpointError>;

	/// Creates (or replaces) the checkpoint for `group_name` with exactly
	/// the given `(section_id, data)` sections, replacing whatever was
	/// there before in a single atomic swap.
	fn write_sections(
		&mut self,
		group_name: &str,
		sections: Vec<(String, Vec<u8>)>,
	) -> Result<(), CheckpointError>;

	/// Iterates every section of `group_name`'s checkpoint, or an empty
	/// list if none exists.
	fn read_sections(&mut self, group_name: &str) -> Result<Vec<(String, Vec<u8>)>, CheckpointError>;
}

/// Retries `attempt` while it reports [`CheckpointError::TryAgain`], waiting
/// `delay` between tries via `sleep`. Grounded in the original's
/// `TRY_AGAIN` handling, which slept one second and retried without limit
/// (`store_plocks`/`retrieve_plocks`).
///
/// `sleep` is a parameter rather than a direct `std::thread::sleep` call so
/// callers (and tests) can supply a non-blocking stand-in.
pub fn retry_on_try_again<T>(
	delay: Duration,
	mut sleep: impl FnMut(Duration),
	mut attempt: impl FnMut() -> Result<T, CheckpointError>,
) -> Result<T, CheckpointError> {
	loop {
		match attempt() {
			Err(CheckpointError::TryAgain) => sleep(delay),
			other => return other,
		}
	}
}

/// Snapshots every resource in `mg` into its checkpoint, skipping the
/// write entirely if nothing has changed since the last one (`store_plocks`
/// in the original).
pub fn store_plocks(
	mg: &mut MountGroup,
	now: i64,
	backend: &mut impl CheckpointBackend,
) -> Result<(), CheckpointError> {
	if mg.last_checkpoint_time > mg.last_plock_time {
		log::debug!("{}: checkpoint up to date, skipping store", mg.name);
		return Ok(());
	}

	if mg.ckpt_handle.is_some() {
		backend.unlink(&mg.name)?;
	}

	let sections = mg
		.resources
		.values()
		.map(|r| (r.number.to_string(), pack_resource(r)))
		.collect();
	backend.write_sections(&mg.name, sections)?;

	mg.last_checkpoint_time = now;
	mg.ckpt_handle = Some(mg.name.clone());
	Ok(())
}

/// Rebuilds `mg`'s resource table from its checkpoint, for a node that has
/// just joined the group.
///
/// Any resource already present in `mg` (there should be none, for a
/// freshly joining node) is overwritten by the checkpointed copy.
pub fn retrieve_plocks(
	mg: &mut MountGroup,
	backend: &mut impl CheckpointBackend,
) -> Result<(), CheckpointError> {
	for (section_id, data) in backend.read_sections(&mg.name)? {
		let number: u64 = section_id.parse().map_err(|_| {
			CheckpointError::Malformed(format!("section id {section_id:?} is not a resource number"))
		})?;
		let resource = unpack_resource(number, mg.fsid, &data)?;
		if !resource.is_empty() {
			mg.resources.insert(number, resource);
		}
	}
	Ok(())
}
