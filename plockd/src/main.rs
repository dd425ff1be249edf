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

//! `plockd`: the cluster-wide POSIX advisory byte-range lock coordinator
//! daemon.
//!
//! This binary is the OS glue around the portable `plock` core: it opens
//! the request channel, joins the mount groups named in its configuration,
//! and runs the single-threaded event loop that keeps every node's lock
//! state converged. A `join`/`dump`/`checkpoint` subcommand
//! instead talks to a running daemon's admin socket, for manual use and
//! testing.

use std::io::{Read, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::process::ExitCode;

use clap::Parser;

use plockd::channel;
use plockd::checkpoint::DirCheckpointBackend;
use plockd::config::{Cli, Command, Config};
use plockd::daemon::DaemonContext;
use plockd::error::DaemonError;
use plockd::transport::LoopbackBus;

fn main() -> ExitCode {
	let cli = Cli::parse();
	env_logger::Builder::new()
		.filter_level(cli.log_level())
		.init();

	match run(cli) {
		Ok(()) => ExitCode::SUCCESS,
		Err(e) => {
			log::error!("{e}");
			ExitCode::FAILURE
		}
	}
}

fn run(cli: Cli) -> Result<(), DaemonError> {
	let config = Config::load(&cli.config)?;

	match cli.command {
		Some(Command::Join { group }) => {
			let fsid = group_fsid(&config, &group)?;
			admin_request(&config, &format!("RETRIEVE {group} {fsid:#x}\n"))
		}
		Some(Command::Dump { group }) => admin_request(&config, &format!("DUMP {group}\n")),
		Some(Command::Checkpoint { group }) => {
			admin_request(&config, &format!("CHECKPOINT {group}\n"))
		}
		None => serve(&config),
	}
}

/// Resolves a mount-group name to its configured `fsid`, the way the
/// running daemon itself would have learned it at startup from the same
/// `plockd.toml` (`config.rs`'s `GroupConfig`).
fn group_fsid(config: &Config, group: &str) -> Result<u32, DaemonError> {
	config
		.groups
		.iter()
		.find(|g| g.name == group)
		.map(|g| g.fsid)
		.ok_or_else(|| DaemonError::Config(format!("no fsid configured for mount group {group}")))
}

/// Sends one line to a running daemon's admin socket and prints back
/// whatever it replies with.
fn admin_request(config: &Config, line: &str) -> Result<(), DaemonError> {
	let mut stream = UnixStream::connect(&config.admin_socket)?;
	stream.write_all(line.as_bytes())?;
	stream.shutdown(std::net::Shutdown::Write)?;
	let mut reply = String::new();
	stream.read_to_string(&mut reply)?;
	print!("{reply}");
	Ok(())
}

fn serve(config: &Config) -> Result<(), DaemonError> {
	let request_channel = channel::open(
		&config.control_device,
		&config.misc_device_name,
		&config.control_socket,
	)?;

	let _ = std::fs::remove_file(&config.admin_socket);
	if let Some(parent) = config.admin_socket.parent() {
		std::fs::create_dir_all(parent)?;
	}
	let admin_listener = UnixListener::bind(&config.admin_socket)?;

	let bus = LoopbackBus::new();
	let checkpoint_backend = DirCheckpointBackend::new(&config.checkpoint_dir);

	let mut ctx = DaemonContext::new(
		config.node_id,
		request_channel,
		&bus,
		checkpoint_backend,
		admin_listener,
	);

	for group in &config.groups {
		log::info!("joining mount group {} (fsid {:#x})", group.name, group.fsid);
		ctx.join_group(&group.name, group.fsid, true)?;
	}

	log::info!("plockd node {} ready", config.node_id);
	ctx.run()
}
