// Copyright 2025 Sushanth (https://github.com/sushanthpy)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Scoped advisory file locks
//!
//! Every read-modify-write over shared workspace files happens while holding
//! an exclusive lock on a sidecar `<file>.lock`. Acquisition polls with a
//! bounded wait; the lock is released when the guard drops, and by the OS
//! when the process exits.

use fs2::FileExt;
use keeper_core::{KeeperError, KeeperResult, LockConfig};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, warn};

/// Held exclusive lock on a lock file
#[derive(Debug)]
pub struct FileLock {
    file: File,
    path: PathBuf,
}

impl FileLock {
    /// Acquire an exclusive lock on `path`, waiting at most `config.timeout()`
    pub fn acquire(path: &Path, config: &LockConfig) -> KeeperResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let started = Instant::now();
        let contended = fs2::lock_contended_error().raw_os_error();
        loop {
            match file.try_lock_exclusive() {
                Ok(()) => {
                    debug!(
                        "Acquired lock {} after {}ms",
                        path.display(),
                        started.elapsed().as_millis()
                    );
                    return Ok(Self {
                        file,
                        path: path.to_path_buf(),
                    });
                }
                Err(e)
                    if e.raw_os_error() == contended
                        || e.kind() == std::io::ErrorKind::WouldBlock =>
                {
                    let waited = started.elapsed();
                    if waited >= config.timeout() {
                        warn!("Gave up waiting for lock {}", path.display());
                        return Err(KeeperError::LockTimeout {
                            path: path.to_path_buf(),
                            waited_ms: waited.as_millis() as u64,
                        });
                    }
                    std::thread::sleep(config.poll_interval());
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            warn!("Failed to release lock {}: {}", self.path.display(), e);
        }
    }
}
