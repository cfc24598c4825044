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

//! Where workspace state lives on disk

use chrono::NaiveDate;
use std::path::{Path, PathBuf};

/// File locations inside one agent workspace
#[derive(Debug, Clone)]
pub struct WorkspaceLayout {
    root: PathBuf,
    direct_sessions_dir: PathBuf,
    notes_file: PathBuf,
}

impl WorkspaceLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            direct_sessions_dir: root.join("sessions"),
            notes_file: root.join("MEMORY.md"),
            root,
        }
    }

    /// Override the directory scanned by direct-mode ingestion
    pub fn with_direct_sessions_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.direct_sessions_dir = self.resolve(dir.as_ref());
        self
    }

    /// Override the long-term notes file
    pub fn with_notes_file(mut self, file: impl AsRef<Path>) -> Self {
        self.notes_file = self.resolve(file.as_ref());
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a possibly relative path against the workspace root
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }

    pub fn event_log_dir(&self) -> PathBuf {
        self.root.join("logs").join("sessions")
    }

    pub fn event_log_file(&self, date: NaiveDate) -> PathBuf {
        self.event_log_dir().join(format!("{}.jsonl", date.format("%Y-%m-%d")))
    }

    pub fn watermark_file(&self) -> PathBuf {
        self.event_log_dir().join(".watermark")
    }

    /// Held for the whole read-watermark / append / advance sequence
    pub fn ingest_lock_file(&self) -> PathBuf {
        self.event_log_dir().join(".ingest.lock")
    }

    pub fn action_ledger_file(&self) -> PathBuf {
        self.root.join("logs").join("actions.jsonl")
    }

    pub fn hourly_dir(&self) -> PathBuf {
        self.root.join("memory").join("hourly")
    }

    pub fn hourly_summary_file(&self, date: NaiveDate) -> PathBuf {
        self.hourly_dir().join(format!("{}.md", date.format("%Y-%m-%d")))
    }

    pub fn aggregator_state_file(&self) -> PathBuf {
        self.hourly_dir().join(".aggregator-state")
    }

    pub fn daily_note_file(&self, date: NaiveDate) -> PathBuf {
        self.root
            .join("memory")
            .join(format!("{}.md", date.format("%Y-%m-%d")))
    }

    /// Categorized index generated from the notes file
    pub fn notes_index_file(&self) -> PathBuf {
        self.root.join("memory").join("memory-index.md")
    }

    pub fn notes_file(&self) -> &Path {
        &self.notes_file
    }

    pub fn direct_sessions_dir(&self) -> &Path {
        &self.direct_sessions_dir
    }
}

/// Sidecar lock file guarding `path`
pub fn lock_path_for(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".lock");
    path.with_file_name(name)
}
