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

//! Conversation Ingestor
//!
//! Copies turns from a history snapshot into the event log exactly once.
//! Per session: read the cursor, append every turn above it, then advance the
//! watermark to the highest sequence now logged. The event log refuses any
//! sequence it already holds, so a retry after a failure anywhere in that
//! sequence neither duplicates nor loses turns.

use crate::snapshot::{self, group_by_session, reread_truncated_reads, session_key_from_file};
use chrono::{DateTime, Utc};
use keeper_core::{
    EventLogEntry, IngestConfig, KeeperConfig, KeeperError, KeeperResult, LockConfig, Turn,
    WorkspaceLayout,
};
use keeper_storage::{EventLog, FileLock, WatermarkStore};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::{debug, info};

/// Where the cursor comes from and where turns are read from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IngestMode {
    /// Cursor is the stored watermark
    #[default]
    Normal,
    /// Cursor is the highest sequence found in the event log
    Backfill,
    /// Like normal, but turns come from the on-disk session files
    Direct,
}

impl IngestMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            IngestMode::Normal => "normal",
            IngestMode::Backfill => "backfill",
            IngestMode::Direct => "direct",
        }
    }
}

impl std::fmt::Display for IngestMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IngestMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "normal" => Ok(IngestMode::Normal),
            "backfill" => Ok(IngestMode::Backfill),
            "direct" => Ok(IngestMode::Direct),
            other => Err(format!("unknown ingest mode: {other}")),
        }
    }
}

/// What happened to one session
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionReport {
    pub session_key: String,
    /// Turns offered by the snapshot
    pub offered: usize,
    /// Turns above the cursor
    pub selected: usize,
    /// Sequences written to the event log
    pub appended: Vec<u64>,
    /// Sequences the event log already held
    pub skipped: Vec<u64>,
    /// Sequences the event log refused as dated before the session's latest day
    pub rejected: Vec<u64>,
    pub watermark_before: Option<u64>,
    pub watermark_after: Option<u64>,
}

/// Result of one ingest run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub mode: IngestMode,
    pub sessions: Vec<SessionReport>,
}

impl IngestReport {
    pub fn total_appended(&self) -> usize {
        self.sessions.iter().map(|s| s.appended.len()).sum()
    }
}

/// Snapshot-to-event-log ingestion for one workspace
#[derive(Debug, Clone)]
pub struct Ingestor {
    layout: WorkspaceLayout,
    lock: LockConfig,
    config: IngestConfig,
    event_log: EventLog,
    watermarks: WatermarkStore,
}

impl Ingestor {
    pub fn new(layout: WorkspaceLayout, config: &KeeperConfig) -> Self {
        Self {
            event_log: EventLog::new(layout.clone(), config.lock.clone()),
            watermarks: WatermarkStore::new(&layout, config.lock.clone()),
            lock: config.lock.clone(),
            config: config.ingest.clone(),
            layout,
        }
    }

    pub fn event_log(&self) -> &EventLog {
        &self.event_log
    }

    pub fn watermarks(&self) -> &WatermarkStore {
        &self.watermarks
    }

    /// Ingest a snapshot document in normal or backfill mode
    pub fn ingest_snapshot(
        &self,
        raw: &str,
        session_key: &str,
        mode: IngestMode,
        now: DateTime<Utc>,
    ) -> KeeperResult<IngestReport> {
        if mode == IngestMode::Direct {
            return Err(KeeperError::Config(
                "direct mode reads session files, not a snapshot".into(),
            ));
        }
        let turns = snapshot::parse_snapshot(raw, session_key, now)?;
        self.ingest_turns(turns, mode, now)
    }

    /// Ingest the on-disk session files, optionally only one session.
    ///
    /// The filter applies to each turn's own session key, which a line may
    /// set independently of its file name.
    pub fn ingest_direct(
        &self,
        session_filter: Option<&str>,
        now: DateTime<Utc>,
    ) -> KeeperResult<IngestReport> {
        let mut offsets: BTreeMap<String, u64> = BTreeMap::new();
        let mut turns = Vec::new();

        for path in self.session_files()? {
            let Some(key) = session_key_from_file(&path) else {
                continue;
            };
            let raw = std::fs::read_to_string(&path)?;
            let offset = offsets.entry(key.clone()).or_insert(0);
            let parsed = snapshot::parse_session_file(&path, &raw, &key, *offset, now);
            *offset += raw.lines().count() as u64;
            debug!("Read session file {}", path.display());

            turns.extend(
                parsed
                    .into_iter()
                    .filter(|t| session_filter.map_or(true, |f| t.session_key == f)),
            );
        }

        self.ingest_turns(turns, IngestMode::Direct, now)
    }

    /// Ingest already-parsed turns.
    ///
    /// Holds the ingest lock for the whole run so concurrent ingestors
    /// serialize on the read-cursor / append / advance sequence.
    pub fn ingest_turns(
        &self,
        turns: Vec<Turn>,
        mode: IngestMode,
        now: DateTime<Utc>,
    ) -> KeeperResult<IngestReport> {
        let _guard = FileLock::acquire(&self.layout.ingest_lock_file(), &self.lock)?;

        let mut sessions = Vec::new();
        for (session_key, turns) in group_by_session(turns) {
            sessions.push(self.ingest_session(&session_key, turns, mode, now)?);
        }

        let report = IngestReport { mode, sessions };
        info!(
            "Ingested {} turns across {} sessions ({} mode)",
            report.total_appended(),
            report.sessions.len(),
            mode
        );
        Ok(report)
    }

    fn ingest_session(
        &self,
        session_key: &str,
        turns: Vec<Turn>,
        mode: IngestMode,
        now: DateTime<Utc>,
    ) -> KeeperResult<SessionReport> {
        let watermark_before = self.watermarks.get(session_key)?;
        let cursor = match mode {
            IngestMode::Backfill => self.event_log.highest_sequence(session_key)?,
            IngestMode::Normal | IngestMode::Direct => watermark_before,
        };

        let offered = turns.len();
        let entries: Vec<EventLogEntry> = turns
            .into_iter()
            .filter(|t| cursor.map_or(true, |c| t.sequence > c))
            .map(|mut turn| {
                if self.config.reread_truncated_reads {
                    reread_truncated_reads(&mut turn, &self.layout);
                }
                EventLogEntry::new(turn, now)
            })
            .collect();
        debug!(
            "{}: {} of {} turns above cursor {:?}",
            session_key,
            entries.len(),
            offered,
            cursor
        );

        let outcome = self.event_log.append(session_key, &entries)?;

        let mut watermark_after = watermark_before;
        if let Some(highest) = outcome.highest {
            if watermark_before.map_or(true, |w| highest > w) {
                self.watermarks.advance(session_key, highest)?;
                watermark_after = Some(highest);
            }
        }

        Ok(SessionReport {
            session_key: session_key.to_string(),
            offered,
            selected: entries.len(),
            appended: outcome.written,
            skipped: outcome.skipped,
            rejected: outcome.rejected,
            watermark_before,
            watermark_after,
        })
    }

    fn session_files(&self) -> KeeperResult<Vec<PathBuf>> {
        let dir = self.layout.direct_sessions_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut files = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.is_file() && path.extension().and_then(|e| e.to_str()) == Some("jsonl") {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }
}
