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

//! Append-only event log
//!
//! One JSONL file per UTC date (`logs/sessions/YYYY-MM-DD.jsonl`), one
//! [`EventLogEntry`] per line. Writers only append; nothing rewrites or
//! reorders an existing line.
//!
//! Appends carry their own duplicate guard: for each session the log only
//! accepts sequences strictly above the highest sequence already physically
//! present. A retry after a partial write or a crash before the watermark
//! advanced therefore cannot duplicate or reorder turns.
//!
//! A session's entries also never move back in date: an entry dated before
//! the day file holding the session's highest sequence is refused. Reading
//! day files in date order thus yields each session in sequence order, and
//! the newest day holding a session holds its highest sequence.

use crate::jsonl::{self, CorruptLine};
use crate::lock::FileLock;
use chrono::NaiveDate;
use keeper_core::{EventLogEntry, KeeperResult, LockConfig, WorkspaceLayout};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// Result of one append call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppendOutcome {
    /// Sequences written, in order
    pub written: Vec<u64>,
    /// Sequences rejected because the log already covers them
    pub skipped: Vec<u64>,
    /// Sequences refused because they are dated before the session's last day
    pub rejected: Vec<u64>,
    /// Highest sequence logged for the session after the append
    pub highest: Option<u64>,
}

/// One day of the log
#[derive(Debug, Clone)]
pub struct DayLog {
    pub date: NaiveDate,
    /// Entries with their 1-based line numbers, in file order
    pub entries: Vec<(usize, EventLogEntry)>,
    pub corrupt: Vec<CorruptLine>,
    /// Physical lines in the file
    pub line_count: usize,
}

impl DayLog {
    /// Entries on lines after `line`
    pub fn after_line(&self, line: usize) -> impl Iterator<Item = &EventLogEntry> {
        self.entries
            .iter()
            .filter(move |(n, _)| *n > line)
            .map(|(_, e)| e)
    }
}

/// Date-partitioned append-only log of ingested turns
#[derive(Debug, Clone)]
pub struct EventLog {
    layout: WorkspaceLayout,
    lock: LockConfig,
}

impl EventLog {
    pub fn new(layout: WorkspaceLayout, lock: LockConfig) -> Self {
        Self { layout, lock }
    }

    fn lock_path(&self) -> PathBuf {
        self.layout.event_log_dir().join(".log.lock")
    }

    /// Append entries for one session, skipping sequences the log already covers.
    ///
    /// Entries are written in ascending sequence order with one write per
    /// touched day file.
    pub fn append(
        &self,
        session_key: &str,
        entries: &[EventLogEntry],
    ) -> KeeperResult<AppendOutcome> {
        let _guard = FileLock::acquire(&self.lock_path(), &self.lock)?;

        let mut sorted: Vec<&EventLogEntry> = entries
            .iter()
            .filter(|e| e.turn.session_key == session_key)
            .collect();
        if sorted.len() != entries.len() {
            warn!(
                "Ignoring {} entries not belonging to session {}",
                entries.len() - sorted.len(),
                session_key
            );
        }
        sorted.sort_by_key(|e| e.turn.sequence);

        let tip = self.session_tip_unlocked(session_key)?;
        let mut highest = tip.map(|(seq, _)| seq);
        let mut last_day = tip.map(|(_, date)| date);
        let mut outcome = AppendOutcome::default();
        let mut by_day: BTreeMap<NaiveDate, Vec<String>> = BTreeMap::new();

        for entry in sorted {
            let seq = entry.turn.sequence;
            if highest.is_some_and(|h| seq <= h) {
                outcome.skipped.push(seq);
                continue;
            }
            let date = entry.turn.date();
            if last_day.is_some_and(|d| date < d) {
                outcome.rejected.push(seq);
                continue;
            }
            by_day
                .entry(date)
                .or_default()
                .push(serde_json::to_string(entry)?);
            outcome.written.push(seq);
            highest = Some(seq);
            last_day = Some(date);
        }

        for (date, lines) in &by_day {
            let path = self.layout.event_log_file(*date);
            jsonl::append_lines(&path, lines)?;
            debug!("Appended {} lines to {}", lines.len(), path.display());
        }

        if !outcome.skipped.is_empty() {
            info!(
                "Skipped {} already-logged sequences for {}",
                outcome.skipped.len(),
                session_key
            );
        }
        if !outcome.rejected.is_empty() {
            warn!(
                "Refused sequences {:?} for {}: dated before the session's latest day",
                outcome.rejected, session_key
            );
        }
        outcome.highest = highest;
        Ok(outcome)
    }

    /// Highest sequence logged for a session across every day file
    pub fn highest_sequence(&self, session_key: &str) -> KeeperResult<Option<u64>> {
        let _guard = FileLock::acquire(&self.lock_path(), &self.lock)?;
        Ok(self.session_tip_unlocked(session_key)?.map(|(seq, _)| seq))
    }

    /// Highest sequence of a session and the day file holding it.
    ///
    /// Scans newest days first and stops at the first day holding the session.
    fn session_tip_unlocked(&self, session_key: &str) -> KeeperResult<Option<(u64, NaiveDate)>> {
        for date in self.dates()?.into_iter().rev() {
            let highest = self
                .read_day(date)?
                .entries
                .iter()
                .filter(|(_, e)| e.turn.session_key == session_key)
                .map(|(_, e)| e.turn.sequence)
                .max();
            if let Some(seq) = highest {
                return Ok(Some((seq, date)));
            }
        }
        Ok(None)
    }

    /// Dates with a log file, ascending
    pub fn dates(&self) -> KeeperResult<Vec<NaiveDate>> {
        let dir = self.layout.event_log_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut dates = Vec::new();
        for entry in std::fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("jsonl") {
                continue;
            }
            let parsed = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok());
            if let Some(date) = parsed {
                dates.push(date);
            }
        }
        dates.sort();
        Ok(dates)
    }

    /// Read one day; corrupt lines are collected, not fatal.
    ///
    /// Text after the last newline belongs to an append still in flight and
    /// is not part of the day yet.
    pub fn read_day(&self, date: NaiveDate) -> KeeperResult<DayLog> {
        let path = self.layout.event_log_file(date);
        let raw = jsonl::read_to_string_if_exists(&path)?;
        let complete = raw.rfind('\n').map_or("", |end| &raw[..=end]);
        let parsed = jsonl::parse_lines::<EventLogEntry>(&path, complete);
        parsed.report_corrupt();
        Ok(DayLog {
            date,
            entries: parsed.records,
            corrupt: parsed.corrupt,
            line_count: parsed.line_count,
        })
    }

    /// All entries for a session in log order
    pub fn read_session(&self, session_key: &str) -> KeeperResult<Vec<EventLogEntry>> {
        let mut out = Vec::new();
        for date in self.dates()? {
            out.extend(
                self.read_day(date)?
                    .entries
                    .into_iter()
                    .map(|(_, e)| e)
                    .filter(|e| e.turn.session_key == session_key),
            );
        }
        Ok(out)
    }
}
