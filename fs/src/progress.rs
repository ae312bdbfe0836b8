// Copyright 2024 Kevin Ludwig
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

use std::{fmt, path::Path};

use log::{info, warn};

use crate::Error;

/// Per-file outcome reported while a volume is walked. Paths are relative
/// to the recovery root.
#[derive(Debug)]
pub enum RecoveryEvent<'a> {
    DirectoryEntered { path: &'a Path, lba: u64 },
    FileRecovered { path: &'a Path, bytes: u64 },
    FilePartial {
        path: &'a Path,
        written: u64,
        expected: u64,
        reason: &'a str,
    },
    FileFailed { path: &'a Path, error: &'a Error },
}

/// Sink for [`RecoveryEvent`]s. The engine emits one event per directory
/// entered and per file attempted; consumers decide how to surface them.
pub trait Progress {
    fn event(&mut self, event: RecoveryEvent<'_>);
}

/// Routes recovery events to the `log` facade.
#[derive(Debug, Default)]
pub struct LogProgress;

impl Progress for LogProgress {
    fn event(&mut self, event: RecoveryEvent<'_>) {
        match event {
            RecoveryEvent::DirectoryEntered { path, lba } => {
                info!("scanning directory {} (LBA {lba})", path.display());
            }
            RecoveryEvent::FileRecovered { path, bytes } => {
                info!("recovered {} ({bytes} bytes)", path.display());
            }
            RecoveryEvent::FilePartial {
                path,
                written,
                expected,
                reason,
            } => {
                warn!(
                    "partially recovered {} ({written} of {expected} bytes, {reason})",
                    path.display()
                );
            }
            RecoveryEvent::FileFailed { path, error } => {
                warn!("failed to recover {}: {error}", path.display());
            }
        }
    }
}

/// Totals accumulated over one recovery run.
#[derive(Debug, Default, Clone, Copy)]
pub struct RecoverySummary {
    pub directories: u64,
    pub files_recovered: u64,
    pub files_partial: u64,
    pub files_failed: u64,
    pub bytes_recovered: u64,
}

impl fmt::Display for RecoverySummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} directories, {} files recovered ({} bytes), {} partial, {} failed",
            self.directories,
            self.files_recovered,
            self.bytes_recovered,
            self.files_partial,
            self.files_failed
        )
    }
}
