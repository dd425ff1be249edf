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

//! Daemon-level errors: the OS glue's view of the failures `plock`'s
//! traits don't have an opinion about.

use std::io;

use thiserror::Error;

/// A raw OS error captured via `errno`, wrapped so the portable `plock`
/// crate's error types never have to depend on a libc binding directly.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct LibcError {
	code: i32,
}

impl LibcError {
	#[must_use]
	pub fn raw_os_error(&self) -> i32 {
		self.code
	}

	#[must_use]
	pub fn is_not_found(&self) -> bool {
		self.code == libc::ENOENT
	}

	pub(crate) fn last_os_error() -> LibcError {
		LibcError::from_raw_os_error(errno())
	}

	pub(crate) fn from_raw_os_error(code: i32) -> LibcError {
		LibcError { code }
	}
}

impl std::fmt::Display for LibcError {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}", io::Error::from_raw_os_error(self.code))
	}
}

impl std::error::Error for LibcError {}

impl From<LibcError> for io::Error {
	fn from(err: LibcError) -> io::Error {
		io::Error::from_raw_os_error(err.code)
	}
}

/// Errors surfaced by the request-channel transport.
#[derive(Debug, Error)]
pub enum ChannelError {
	/// The control device or its socket fallback does not exist.
	#[error("control channel not found: {0}")]
	NotFound(LibcError),

	/// The peer cleanly closed the channel (`ENODEV` on a real device, EOF
	/// on the socket fallback).
	#[error("control channel closed")]
	Closed,

	#[error("control channel I/O error: {0}")]
	Other(#[from] io::Error),
}

impl ChannelError {
	#[must_use]
	pub fn is_not_found(&self) -> bool {
		matches!(self, ChannelError::NotFound(_))
	}
}

pub(crate) fn errno() -> i32 {
	#[cfg(target_os = "linux")]
	unsafe {
		*libc::__errno_location()
	}
	#[cfg(not(target_os = "linux"))]
	unsafe {
		*libc::__error()
	}
}

pub(crate) fn last_libc_error() -> LibcError {
	LibcError::last_os_error()
}

/// Top-level daemon error, surfaced from `main` and mapped to a process
/// exit code.
#[derive(Debug, Error)]
pub enum DaemonError {
	#[error("configuration error: {0}")]
	Config(String),

	#[error(transparent)]
	Channel(#[from] ChannelError),

	#[error(transparent)]
	Cluster(#[from] plock::ClusterError),

	#[error(transparent)]
	Checkpoint(#[from] plock::CheckpointError),

	#[error("I/O error: {0}")]
	Io(#[from] io::Error),
}
