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

//! Error taxonomy for the lock coordinator.

use thiserror::Error;

/// Caller-visible reply codes placed into `LockRequest::rv`.
///
/// These mirror the errno values the original C daemon wrote back to the
/// kernel: negative on failure, zero on success. [`RequestError::to_rv`]
/// performs that mapping.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Error)]
pub enum RequestError {
	/// A non-waiting request conflicted with an existing lock.
	#[error("lock conflict, try again later")]
	Again,

	/// The wire message was malformed (bad opcode, zero-length range, ...).
	#[error("invalid lock request")]
	Invalid,

	/// `unlock`/`get` referenced a resource with no held locks or waiters.
	#[error("no such resource")]
	NotFound,

	/// Allocation of a new lock or resource record failed.
	#[error("out of memory")]
	NoMemory,
}

impl RequestError {
	/// Maps this error to the negative `rv` the kernel expects.
	#[inline]
	#[must_use]
	pub const fn to_rv(self) -> i32 {
		match self {
			RequestError::Again => -11,    // EAGAIN
			RequestError::Invalid => -22,  // EINVAL
			RequestError::NotFound => -2,  // ENOENT
			RequestError::NoMemory => -12, // ENOMEM
		}
	}
}

/// Errors surfaced by the cluster-message dispatch path.
#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum ClusterError {
	/// `message.header.src`, `delivery.from`, and `payload.nodeid` disagreed.
	#[error("delivered message origin mismatch: header={header_nodeid} delivery={delivery_from} payload={payload_nodeid}")]
	OriginMismatch {
		header_nodeid: u32,
		delivery_from: u32,
		payload_nodeid: u32,
	},

	/// The mount group named by the message is not one this node has joined.
	#[error("unknown mount group {fsid:#x}")]
	UnknownGroup { fsid: u32 },

	/// The underlying broadcast transport failed to send.
	#[error("group broadcast failed: {0}")]
	SendFailed(String),
}

/// Errors surfaced by the checkpoint subsystem.
#[derive(Debug, Error)]
pub enum CheckpointError {
	/// The checkpoint service is not ready; the caller should retry after a
	/// delay. Handled internally by [`crate::checkpoint::retry_on_try_again`]
	/// for the store/retrieve procedures, but exposed so backends can report
	/// it.
	#[error("checkpoint service temporarily unavailable, try again")]
	TryAgain,

	/// Any other, non-retryable backend failure.
	#[error("checkpoint backend error: {0}")]
	Backend(#[from] std::io::Error),

	/// A stored section had a length that wasn't a multiple of the packed
	/// record size, or a section id that didn't parse as a resource number.
	#[error("malformed checkpoint section: {0}")]
	Malformed(String),
}
