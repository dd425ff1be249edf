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

//! A filesystem-backed [`plock::checkpoint::CheckpointBackend`], standing
//! in for a cluster's external checkpoint service.
//!
//! Each mount group's checkpoint is a directory named `gfsplock.<group>`
//! under a configured root; each section is one file inside it, named by
//! its decimal resource number, matching the naming scheme the original
//! used for its SA Forum checkpoint names and section ids. Replacing a
//! checkpoint is a write-to-temp-then-rename so a reader never observes a
//! half-written set of sections.

use std::io;
use std::path::{Path, PathBuf};

use plock::error::CheckpointError;

/// A [`plock::checkpoint::CheckpointBackend`] over ordinary files.
pub struct DirCheckpointBackend {
	base_dir: PathBuf,
}

impl DirCheckpointBackend {
	pub fn new(base_dir: impl Into<PathBuf>) -> DirCheckpointBackend {
		DirCheckpointBackend { base_dir: base_dir.into() }
	}

	fn group_dir(&self, group_name: &str) -> PathBuf {
		self.base_dir.join(format!("gfsplock.{group_name}"))
	}
}

fn map_io(err: io::Error) -> CheckpointError {
	// A containing directory not existing yet (e.g. a concurrent unlink
	// racing a store) is the local stand-in for the checkpoint service not
	// being ready: worth a retry, not a hard failure.
	if err.kind() == io::ErrorKind::NotFound {
		CheckpointError::TryAgain
	} else {
		CheckpointError::Backend(err)
	}
}

impl plock::checkpoint::CheckpointBackend for DirCheckpointBackend {
	fn unlink(&mut self, group_name: &str) -> Result<(), CheckpointError> {
		match std::fs::remove_dir_all(self.group_dir(group_name)) {
			Ok(()) => Ok(()),
			Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
			Err(e) => Err(CheckpointError::Backend(e)),
		}
	}

	fn write_sections(
		&mut self,
		group_name: &str,
		sections: Vec<(String, Vec<u8>)>,
	) -> Result<(), CheckpointError> {
		std::fs::create_dir_all(&self.base_dir).map_err(map_io)?;

		let tmp = self.base_dir.join(format!(".gfsplock.{group_name}.tmp"));
		let _ = std::fs::remove_dir_all(&tmp);
		std::fs::create_dir_all(&tmp).map_err(map_io)?;
		for (section_id, data) in &sections {
			std::fs::write(tmp.join(section_id), data).map_err(map_io)?;
		}

		let dir = self.group_dir(group_name);
		let _ = std::fs::remove_dir_all(&dir);
		std::fs::rename(&tmp, &dir).map_err(map_io)?;
		log::debug!("{group_name}: wrote {} checkpoint section(s)", sections.len());
		Ok(())
	}

	fn read_sections(&mut self, group_name: &str) -> Result<Vec<(String, Vec<u8>)>, CheckpointError> {
		let dir = self.group_dir(group_name);
		let entries = match std::fs::read_dir(&dir) {
			Ok(entries) => entries,
			Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
			Err(e) => return Err(CheckpointError::Backend(e)),
		};

		let mut sections = Vec::new();
		for entry in entries {
			let entry = entry.map_err(map_io)?;
			let section_id = entry.file_name().to_string_lossy().into_owned();
			let data = std::fs::read(entry.path()).map_err(map_io)?;
			sections.push((section_id, data));
		}
		Ok(sections)
	}
}
