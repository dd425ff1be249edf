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

//! Diagnostics dump.
//!
//! One line per held lock or waiter, in resource-then-insertion order, in
//! the same textual shape the original daemon wrote to its dump fd so
//! existing tooling built against that format keeps working.
//!
//! The original's waiter line reused `po`, the loop variable from the
//! *held-lock* loop just above it, to print the waiter's mode — every
//! waiter line on a resource with at least one held lock reports that
//! lock's mode instead of its own. That's a bug in the source this was
//! distilled from, not a format worth reproducing; this prints the
//! waiter's own `ex`.

use std::fmt::Write as _;

use crate::resource::MountGroup;

fn mode(ex: bool) -> &'static str {
	if ex {
		"WR"
	} else {
		"RD"
	}
}

/// Renders every resource of `mg` into `dump_plocks`-format lines.
///
/// Resources are visited in an unspecified order (the resource table is
/// keyed by number, not sequence); within a resource, held locks are
/// listed before waiters, each in the order they were acquired or queued.
#[must_use]
pub fn format_mount_group(mg: &MountGroup) -> String {
	let mut out = String::new();
	let mut numbers: Vec<u64> = mg.resources.keys().copied().collect();
	numbers.sort_unstable();

	for number in numbers {
		let resource = &mg.resources[&number];
		for lock in &resource.locks {
			let _ = writeln!(
				out,
				"{number} {} {}-{} nodeid {} pid {} owner {:x}",
				mode(lock.ex),
				lock.start,
				lock.end,
				lock.nodeid,
				lock.pid,
				lock.owner,
			);
		}
		for waiter in &resource.waiters {
			let _ = writeln!(
				out,
				"{number} WAITING {} {}-{} nodeid {} pid {} owner {:x}",
				mode(waiter.ex),
				waiter.start,
				waiter.end,
				waiter.nodeid,
				waiter.pid,
				waiter.owner,
			);
		}
	}
	out
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::resource::PosixLock;
	use crate::wire::{LockRequest, OpType};

	#[test]
	fn formats_held_lock_and_waiter_lines() {
		let mut mg = MountGroup::new("g", 1);
		mg.find_resource(7, true).unwrap().locks.push(PosixLock {
			start: 0,
			end: 99,
			ex: true,
			nodeid: 1,
			owner: 0xabc,
			pid: 42,
		});
		mg.find_resource(7, true).unwrap().waiters.push_back(LockRequest {
			optype: OpType::Lock,
			fsid: 1,
			number: 7,
			start: 100,
			end: 200,
			ex: false,
			wait: true,
			pid: 43,
			owner: 0xdef,
			nodeid: 2,
			rv: -1,
		});

		let text = format_mount_group(&mg);
		assert_eq!(
			text,
			"7 WR 0-99 nodeid 1 pid 42 owner abc\n\
			 7 WAITING RD 100-200 nodeid 2 pid 43 owner def\n",
		);
	}

	#[test]
	fn empty_group_dumps_to_empty_string() {
		let mg = MountGroup::new("g", 1);
		assert_eq!(format_mount_group(&mg), "");
	}
}
