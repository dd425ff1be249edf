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

//! On-disk configuration (`plockd.toml`) and command-line parsing.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use serde::Deserialize;

/// The daemon's static configuration, loaded once at startup.
#[derive(Clone, Debug, Deserialize)]
pub struct Config {
	/// Path of the control device this node's in-kernel client talks to.
	#[serde(default = "default_control_device")]
	pub control_device: PathBuf,

	/// This device's registered name in `/proc/misc`, used to look up its
	/// minor number alongside the `misc` major from `/proc/devices`.
	#[serde(default = "default_misc_device_name")]
	pub misc_device_name: String,

	/// Unix-domain socket used in place of the control device when the
	/// real `lock_dlm` misc device can't be found (development/test
	/// environments without the in-kernel module loaded).
	#[serde(default = "default_control_socket")]
	pub control_socket: PathBuf,

	/// Directory holding one subdirectory per mount group's checkpoint.
	#[serde(default = "default_checkpoint_dir")]
	pub checkpoint_dir: PathBuf,

	/// Path of the line-oriented admin socket.
	#[serde(default = "default_admin_socket")]
	pub admin_socket: PathBuf,

	/// This node's cluster-wide node id.
	pub node_id: u32,

	/// Mount groups to join at startup.
	#[serde(default)]
	pub groups: Vec<GroupConfig>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct GroupConfig {
	pub name: String,
	pub fsid: u32,
}

fn default_control_device() -> PathBuf {
	PathBuf::from("/dev/misc/lock_dlm_plock")
}

fn default_misc_device_name() -> String {
	"lock_dlm_plock".to_string()
}

fn default_control_socket() -> PathBuf {
	PathBuf::from("/run/plockd-control.sock")
}

fn default_checkpoint_dir() -> PathBuf {
	PathBuf::from("/var/lib/plockd/checkpoints")
}

fn default_admin_socket() -> PathBuf {
	PathBuf::from("/run/plockd.sock")
}

impl Config {
	pub fn load(path: &std::path::Path) -> Result<Config, crate::error::DaemonError> {
		let text = std::fs::read_to_string(path)
			.map_err(|e| crate::error::DaemonError::Config(format!("reading {}: {e}", path.display())))?;
		toml::from_str(&text)
			.map_err(|e| crate::error::DaemonError::Config(format!("parsing {}: {e}", path.display())))
	}
}

/// Cluster-wide POSIX advisory byte-range lock coordinator.
#[derive(Parser, Debug)]
#[command(name = "plockd", version, about)]
pub struct Cli {
	/// Path to `plockd.toml`.
	#[arg(short, long, default_value = "/etc/plockd.toml")]
	pub config: PathBuf,

	/// Stay attached to the controlling terminal instead of daemonizing.
	#[arg(short, long)]
	pub foreground: bool,

	/// Increase log verbosity (repeatable).
	#[arg(short, long, action = clap::ArgAction::Count)]
	pub verbose: u8,

	/// Decrease log verbosity (repeatable).
	#[arg(short = 'q', long, action = clap::ArgAction::Count)]
	pub quiet: u8,

	#[command(subcommand)]
	pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
	/// Ask a running daemon to join a mount group (testing/manual use; real
	/// joins normally arrive as membership events from the cluster layer).
	Join { group: String },

	/// Stream a mount group's diagnostics dump from a running daemon.
	Dump { group: String },

	/// Ask a running daemon to write a mount group's checkpoint now
	/// (testing/manual use; in production this runs on whichever node the
	/// membership layer designates).
	Checkpoint { group: String },
}

impl Cli {
	#[must_use]
	pub fn log_level(&self) -> log::LevelFilter {
		let base = 2i8; // Info
		let level = base + i8::try_from(self.verbose).unwrap_or(i8::MAX)
			- i8::try_from(self.quiet).unwrap_or(i8::MAX);
		match level {
			i8::MIN..=0 => log::LevelFilter::Error,
			1 => log::LevelFilter::Warn,
			2 => log::LevelFilter::Info,
			3 => log::LevelFilter::Debug,
			_ => log::LevelFilter::Trace,
		}
	}
}
