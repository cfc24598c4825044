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

//! Watermark Store
//!
//! Per-session cursor recording the highest sequence already committed to the
//! event log. Stored as one small JSON object beside (not inside) the log and
//! overwritten atomically on every advance.

use crate::jsonl::{atomic_write, read_to_string_if_exists};
use crate::lock::FileLock;
use keeper_core::{lock_path_for, KeeperError, KeeperResult, LockConfig, WorkspaceLayout};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::debug;

/// Persistent per-session watermarks
#[derive(Debug, Clone)]
pub struct WatermarkStore {
    path: PathBuf,
    lock: LockConfig,
}

impl WatermarkStore {
    pub fn new(layout: &WorkspaceLayout, lock: LockConfig) -> Self {
        Self {
            path: layout.watermark_file(),
            lock,
        }
    }

    /// Current watermark for a session
    pub fn get(&self, session_key: &str) -> KeeperResult<Option<u64>> {
        Ok(self.load()?.get(session_key).copied())
    }

    /// Every stored watermark
    pub fn all(&self) -> KeeperResult<BTreeMap<String, u64>> {
        self.load()
    }

    /// Move a session's watermark forward.
    ///
    /// Moving it backward is rejected with `Regression`; advancing to the
    /// current value is a no-op. Returns the previous value.
    pub fn advance(&self, session_key: &str, sequence: u64) -> KeeperResult<Option<u64>> {
        let _guard = FileLock::acquire(&lock_path_for(&self.path), &self.lock)?;

        let mut marks = self.load()?;
        let previous = marks.get(session_key).copied();
        match previous {
            Some(current) if sequence < current => {
                return Err(KeeperError::Regression {
                    session_key: session_key.to_string(),
                    current,
                    attempted: sequence,
                });
            }
            Some(current) if sequence == current => return Ok(previous),
            _ => {}
        }

        marks.insert(session_key.to_string(), sequence);
        let body = serde_json::to_string_pretty(&marks)?;
        atomic_write(&self.path, body.as_bytes())?;
        debug!("Watermark for {} advanced {:?} -> {}", session_key, previous, sequence);

        Ok(previous)
    }

    fn load(&self) -> KeeperResult<BTreeMap<String, u64>> {
        let raw = read_to_string_if_exists(&self.path)?;
        if raw.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        serde_json::from_str(&raw).map_err(|e| KeeperError::corrupt(&self.path, e.line(), e))
    }
}
