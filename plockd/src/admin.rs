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

//! The line-oriented administrative socket.
//!
//! One request per connection: a single line in, a reply blob out, then
//! the connection closes. This is ambient scaffolding around
//! `plock::dump`'s pure formatter and the join/checkpoint operations that
//! a real cluster would drive from membership events but are exposed here
//! as explicit admin commands for testability:
//!
//! - `DUMP <group>` — the group's diagnostics dump.
//! - `JOIN <group> <fsid>` — join a mount group from an empty table.
//! - `RETRIEVE <group> <fsid>` — join a mount group by retrieving its
//!   checkpoint.
//! - `CHECKPOINT <group>` — write the group's checkpoint now.

use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;

use crate::daemon::DaemonContext;
use crate::error::DaemonError;

pub fn handle_connection(ctx: &mut DaemonContext, stream: UnixStream) -> Result<(), DaemonError> {
	let mut reader = BufReader::new(stream.try_clone()?);
	let mut writer = stream;

	let mut line = String::new();
	reader.read_line(&mut line)?;
	let mut parts = line.trim().split_whitespace();

	match parts.next() {
		Some("DUMP") => match parts.next() {
			Some(name) => match ctx.dump_group(name) {
				Some(text) => write!(writer, "{text}")?,
				None => writeln!(writer, "ERR unknown group {name}")?,
			},
			None => writeln!(writer, "ERR usage: DUMP <group>")?,
		},
		Some("JOIN") => match parse_join_args(&mut parts) {
			Ok((name, fsid)) => reply_result(&mut writer, ctx.join_group(name, fsid, false))?,
			Err(msg) => writeln!(writer, "ERR {msg}")?,
		},
		Some("RETRIEVE") => match parse_join_args(&mut parts) {
			Ok((name, fsid)) => reply_result(&mut writer, ctx.join_group(name, fsid, true))?,
			Err(msg) => writeln!(writer, "ERR {msg}")?,
		},
		Some("CHECKPOINT") => match parts.next() {
			Some(name) => reply_result(&mut writer, ctx.checkpoint_group(name))?,
			None => writeln!(writer, "ERR usage: CHECKPOINT <group>")?,
		},
		Some(other) => writeln!(writer, "ERR unknown command {other}")?,
		None => writeln!(writer, "ERR empty command")?,
	}
	Ok(())
}

fn parse_join_args<'a>(
	parts: &mut impl Iterator<Item = &'a str>,
) -> Result<(&'a str, u32), String> {
	let name = parts.next().ok_or("usage: JOIN|RETRIEVE <group> <fsid>")?;
	let fsid_str = parts.next().ok_or("usage: JOIN|RETRIEVE <group> <fsid>")?;
	let fsid = fsid_str
		.strip_prefix("0x")
		.map_or_else(|| fsid_str.parse(), |hex| u32::from_str_radix(hex, 16))
		.map_err(|_| format!("bad fsid {fsid_str}"))?;
	Ok((name, fsid))
}

fn reply_result(writer: &mut UnixStream, result: Result<(), DaemonError>) -> Result<(), DaemonError> {
	match result {
		Ok(()) => writeln!(writer, "OK")?,
		Err(e) => writeln!(writer, "ERR {e}")?,
	}
	Ok(())
}
