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

//! The request channel: the character device through which the in-kernel
//! lock client submits requests and receives replies.
//!
//! [`DeviceChannel`] is the production path: open, read, and write the
//! control device via raw `libc` calls, looping past `EINTR`/`ENOENT` the
//! way a raw device binding commonly does. When that
//! device can't be found — expected in any environment that doesn't also
//! run the in-kernel `lock_dlm` module this daemon talks to — `open`
//! falls back to [`SocketChannel`], a Unix-domain socket at a sibling
//! path, so the daemon is still runnable end to end.

use std::ffi::CString;
use std::io::{self, Read, Write};
use std::os::unix::io::{AsRawFd, RawFd};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::Path;

use plock::wire::{LockRequest, LOCK_REQUEST_LEN};

use crate::devnode;
use crate::error::{last_libc_error, ChannelError};

/// A request-channel endpoint: fixed-size [`LockRequest`] records in both
/// directions.
pub trait RequestChannel: AsRawFd {
	/// Reads the next request. `Ok(None)` means the channel was closed
	/// cleanly (`ENODEV` on the real device) and the daemon should stop
	/// servicing it.
	fn recv(&mut self) -> Result<Option<LockRequest>, ChannelError>;

	/// Writes a reply record.
	fn send(&mut self, reply: &LockRequest) -> Result<(), ChannelError>;
}

/// Ensures the control device node exists (creating or recreating it as
/// needed), then opens the control device at `device_path`, falling
/// back to a Unix-domain socket at `socket_fallback_path` if the device's
/// major/minor can't be discovered or the device itself can't be opened —
/// expected in any environment that doesn't also run the in-kernel
/// `lock_dlm` module this daemon talks to.
pub fn open(
	device_path: &Path,
	misc_device_name: &str,
	socket_fallback_path: &Path,
) -> Result<Box<dyn RequestChannel>, ChannelError> {
	let device_path_str = device_path.to_string_lossy().into_owned();
	match devnode::control_device_number(misc_device_name)
		.and_then(|(major, minor)| devnode::ensure_control_device(device_path, major, minor))
	{
		Ok(()) => {}
		Err(e) => {
			log::warn!(
				"control device {device_path_str} unavailable ({e}), falling back to unix \
				 socket {} (not a real lock_dlm channel)",
				socket_fallback_path.display(),
			);
			return Ok(Box::new(SocketChannel::listen(socket_fallback_path)?));
		}
	}

	match DeviceChannel::open(&device_path_str) {
		Ok(device) => Ok(Box::new(device)),
		Err(e) if e.is_not_found() => {
			log::warn!(
				"control device {device_path_str} not found, falling back to unix socket {} \
				 (not a real lock_dlm channel)",
				socket_fallback_path.display(),
			);
			Ok(Box::new(SocketChannel::listen(socket_fallback_path)?))
		}
		Err(e) => Err(e),
	}
}

/// The production request channel: a character device opened read-write.
pub struct DeviceChannel {
	fd: RawFd,
}

impl DeviceChannel {
	pub fn open(path: &str) -> Result<DeviceChannel, ChannelError> {
		let cpath = CString::new(path).map_err(|e| ChannelError::Other(io::Error::new(io::ErrorKind::InvalidInput, e)))?;
		let rc = unsafe { libc::open(cpath.as_ptr(), libc::O_RDWR | libc::O_CLOEXEC) };
		if rc == -1 {
			let err = last_libc_error();
			return Err(if err.is_not_found() {
				ChannelError::NotFound(err)
			} else {
				ChannelError::Other(err.into())
			});
		}
		Ok(DeviceChannel { fd: rc })
	}

	fn read_record(&self, buf: &mut [u8; LOCK_REQUEST_LEN]) -> Result<bool, ChannelError> {
		loop {
			let rc = unsafe {
				libc::read(self.fd, buf.as_mut_ptr().cast(), buf.len())
			};
			if rc < 0 {
				let err = last_libc_error();
				match err.raw_os_error() {
					libc::EINTR | libc::ENOENT => continue,
					libc::ENODEV => return Ok(false),
					_ => return Err(ChannelError::Other(err.into())),
				}
			}
			if rc == 0 {
				return Ok(false);
			}
			return Ok(true);
		}
	}

	fn write_record(&self, buf: &[u8; LOCK_REQUEST_LEN]) -> Result<(), ChannelError> {
		loop {
			let rc = unsafe {
				libc::write(self.fd, buf.as_ptr().cast(), buf.len())
			};
			if rc == -1 {
				let err = last_libc_error();
				if err.raw_os_error() == libc::EINTR {
					continue;
				}
				return Err(ChannelError::Other(err.into()));
			}
			return Ok(());
		}
	}
}

impl Drop for DeviceChannel {
	fn drop(&mut self) {
		unsafe {
			let _ = libc::close(self.fd);
		}
	}
}

impl AsRawFd for DeviceChannel {
	fn as_raw_fd(&self) -> RawFd {
		self.fd
	}
}

impl RequestChannel for DeviceChannel {
	fn recv(&mut self) -> Result<Option<LockRequest>, ChannelError> {
		let mut buf = [0u8; LOCK_REQUEST_LEN];
		if !self.read_record(&mut buf)? {
			return Ok(None);
		}
		LockRequest::decode(&buf)
			.map(Some)
			.map_err(|e| ChannelError::Other(io::Error::new(io::ErrorKind::InvalidData, e)))
	}

	fn send(&mut self, reply: &LockRequest) -> Result<(), ChannelError> {
		let mut buf = [0u8; LOCK_REQUEST_LEN];
		reply.encode(&mut buf);
		self.write_record(&buf)
	}
}

/// The development/test fallback: a Unix-domain socket standing in for
/// the control device, speaking the same fixed-size record framing.
pub struct SocketChannel {
	stream: UnixStream,
}

impl SocketChannel {
	/// Binds `path`, accepting exactly one connection (one local client
	/// stands in for the kernel's single control channel).
	pub fn listen(path: &Path) -> Result<SocketChannel, ChannelError> {
		let _ = std::fs::remove_file(path);
		let listener = UnixListener::bind(path)?;
		let (stream, _) = listener.accept()?;
		Ok(SocketChannel { stream })
	}

	pub fn connect(path: &Path) -> Result<SocketChannel, ChannelError> {
		Ok(SocketChannel { stream: UnixStream::connect(path)? })
	}
}

impl AsRawFd for SocketChannel {
	fn as_raw_fd(&self) -> RawFd {
		self.stream.as_raw_fd()
	}
}

impl RequestChannel for SocketChannel {
	fn recv(&mut self) -> Result<Option<LockRequest>, ChannelError> {
		let mut buf = [0u8; LOCK_REQUEST_LEN];
		match self.stream.read_exact(&mut buf) {
			Ok(()) => {}
			Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
			Err(e) => return Err(e.into()),
		}
		LockRequest::decode(&buf)
			.map(Some)
			.map_err(|e| ChannelError::Other(io::Error::new(io::ErrorKind::InvalidData, e)))
	}

	fn send(&mut self, reply: &LockRequest) -> Result<(), ChannelError> {
		let mut buf = [0u8; LOCK_REQUEST_LEN];
		reply.encode(&mut buf);
		self.stream.write_all(&buf)?;
		Ok(())
	}
}
