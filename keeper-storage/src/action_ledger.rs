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

//! Action Dedup Ledger
//!
//! An append-only JSONL ledger (`logs/actions.jsonl`) of external actions an
//! agent attempted, plus the windowed lookup used to refuse re-firing the same
//! action. Status updates rewrite the ledger atomically and touch exactly one
//! line; every other line is carried over byte for byte.
//!
//! The ledger fails closed: a line that does not parse makes `check` return
//! `CorruptRecord` rather than guessing that no duplicate exists.

use crate::jsonl::{self, atomic_write};
use crate::lock::FileLock;
use chrono::{DateTime, Duration, DurationRound, Utc};
use keeper_core::{
    format_key, lock_path_for, parse_key, ActionRecord, ActionStatus, ActionType, DedupConfig,
    KeeperError, KeeperResult, LockConfig, SummaryMatch, WorkspaceLayout,
};
use std::path::PathBuf;
use tracing::{debug, info};

/// Result of a status update
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateOutcome {
    pub record: ActionRecord,
    /// False when the record already carried the requested status
    pub changed: bool,
}

/// Persistent log of attempted external actions
#[derive(Debug, Clone)]
pub struct ActionLedger {
    path: PathBuf,
    lock: LockConfig,
    dedup: DedupConfig,
}

impl ActionLedger {
    pub fn new(layout: &WorkspaceLayout, lock: LockConfig, dedup: DedupConfig) -> Self {
        Self {
            path: layout.action_ledger_file(),
            lock,
            dedup,
        }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    /// Record an action about to be attempted
    pub fn log(
        &self,
        action_type: ActionType,
        target: &str,
        summary: &str,
        session: Option<String>,
        status: ActionStatus,
    ) -> KeeperResult<ActionRecord> {
        self.log_at(Utc::now(), action_type, target, summary, session, status)
    }

    /// Record an action at a given instant.
    ///
    /// The key is `now` at microsecond precision, bumped past the newest key
    /// already in the ledger so keys stay unique.
    pub fn log_at(
        &self,
        now: DateTime<Utc>,
        action_type: ActionType,
        target: &str,
        summary: &str,
        session: Option<String>,
        status: ActionStatus,
    ) -> KeeperResult<ActionRecord> {
        let _guard = FileLock::acquire(&lock_path_for(&self.path), &self.lock)?;

        let mut ts = now
            .duration_trunc(Duration::microseconds(1))
            .unwrap_or(now);
        let existing = jsonl::read_lines::<ActionRecord>(&self.path)?;
        if let Some(newest) = existing.records.iter().map(|(_, r)| r.ts).max() {
            if ts <= newest {
                ts = newest + Duration::microseconds(1);
            }
        }

        let record = ActionRecord {
            ts,
            action_type,
            target: target.to_string(),
            summary: summary.to_string(),
            session,
            status,
        };
        jsonl::append_lines(&self.path, &[serde_json::to_string(&record)?])?;
        info!(
            "Logged {} action to {} ({}) as {}",
            record.action_type,
            record.target,
            record.status,
            record.key()
        );
        Ok(record)
    }

    /// Move the record keyed by `key` from pending to a terminal status
    pub fn update(&self, key: &str, status: ActionStatus) -> KeeperResult<UpdateOutcome> {
        let ts = parse_key(key).ok_or_else(|| KeeperError::RecordNotFound(key.to_string()))?;
        let _guard = FileLock::acquire(&lock_path_for(&self.path), &self.lock)?;

        let raw = jsonl::read_to_string_if_exists(&self.path)?;
        let parsed = jsonl::parse_lines::<ActionRecord>(&self.path, &raw).strict()?;
        let (line_no, mut record) = parsed
            .into_iter()
            .find(|(_, r)| r.ts == ts)
            .ok_or_else(|| KeeperError::RecordNotFound(key.to_string()))?;

        if record.status == status && status.is_terminal() {
            debug!("Action {} already {}", key, status);
            return Ok(UpdateOutcome {
                record,
                changed: false,
            });
        }
        if record.status.is_terminal() || !status.is_terminal() {
            return Err(KeeperError::InvalidTransition {
                key: format_key(&record.ts),
                from: record.status.to_string(),
                to: status.to_string(),
            });
        }

        record.status = status;
        let patched = serde_json::to_string(&record)?;
        let mut body = String::with_capacity(raw.len() + 8);
        for (idx, line) in raw.lines().enumerate() {
            if idx + 1 == line_no {
                body.push_str(&patched);
            } else {
                body.push_str(line);
            }
            body.push('\n');
        }
        atomic_write(&self.path, body.as_bytes())?;
        info!("Action {} marked {}", key, status);

        Ok(UpdateOutcome {
            record,
            changed: true,
        })
    }

    /// Most recent matching action within `window_hours` of now, if any
    pub fn check(
        &self,
        action_type: ActionType,
        target: &str,
        summary: Option<&str>,
        window_hours: f64,
    ) -> KeeperResult<Option<ActionRecord>> {
        self.check_at(Utc::now(), action_type, target, summary, window_hours)
    }

    /// Windowed duplicate lookup evaluated at `now`.
    ///
    /// A record matches on type and target, and on summary when one is given
    /// (per the configured policy). Status is not consulted: failed attempts
    /// count as recent attempts.
    pub fn check_at(
        &self,
        now: DateTime<Utc>,
        action_type: ActionType,
        target: &str,
        summary: Option<&str>,
        window_hours: f64,
    ) -> KeeperResult<Option<ActionRecord>> {
        let since = cutoff(now, window_hours)?;
        let records = {
            let _guard = FileLock::acquire(&lock_path_for(&self.path), &self.lock)?;
            jsonl::read_lines::<ActionRecord>(&self.path)?.strict()?
        };

        let found = records
            .into_iter()
            .rev()
            .map(|(_, r)| r)
            .find(|r| {
                r.ts >= since
                    && r.action_type == action_type
                    && r.target == target
                    && summary.map_or(true, |s| self.summary_matches(&r.summary, s))
            });

        match &found {
            Some(dup) => info!(
                "Duplicate {} action to {} found: {}",
                action_type,
                target,
                dup.key()
            ),
            None => debug!("No {} action to {} within {}h", action_type, target, window_hours),
        }
        Ok(found)
    }

    /// Every record in ledger order; any corrupt line fails the read
    pub fn records(&self) -> KeeperResult<Vec<ActionRecord>> {
        Ok(jsonl::read_lines::<ActionRecord>(&self.path)?
            .strict()?
            .into_iter()
            .map(|(_, r)| r)
            .collect())
    }

    fn summary_matches(&self, recorded: &str, candidate: &str) -> bool {
        match self.dedup.summary_match {
            SummaryMatch::Exact => recorded == candidate,
            SummaryMatch::Ignore => true,
            SummaryMatch::Fuzzy => {
                let a = recorded.trim().to_lowercase();
                let b = candidate.trim().to_lowercase();
                strsim::normalized_levenshtein(&a, &b) >= self.dedup.fuzzy_threshold
            }
        }
    }
}

/// Oldest record time still inside a window of `hours` ending at `now`.
///
/// Windows reaching past the representable range cover the whole ledger.
fn cutoff(now: DateTime<Utc>, hours: f64) -> KeeperResult<DateTime<Utc>> {
    if hours.is_nan() || hours < 0.0 {
        return Err(KeeperError::Config(format!(
            "dedup window must be a non-negative number of hours, got {}",
            hours
        )));
    }
    // float-to-int casts saturate, so huge windows land on i64::MAX
    let millis = (hours * 3_600_000.0).round() as i64;
    Ok(Duration::try_milliseconds(millis)
        .and_then(|window| now.checked_sub_signed(window))
        .unwrap_or(DateTime::<Utc>::MIN_UTC))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::tempdir;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, 1, 8, 0, 0).unwrap()
    }

    fn ledger(dir: &std::path::Path, policy: SummaryMatch) -> ActionLedger {
        let dedup = DedupConfig {
            summary_match: policy,
            ..DedupConfig::default()
        };
        ActionLedger::new(&WorkspaceLayout::new(dir), LockConfig::default(), dedup)
    }

    fn post(ledger: &ActionLedger, at: DateTime<Utc>, summary: &str) -> ActionRecord {
        ledger
            .log_at(
                at,
                ActionType::DiscordPost,
                "channel-1",
                summary,
                None,
                ActionStatus::Pending,
            )
            .unwrap()
    }

    #[test]
    fn test_window_boundaries() {
        let dir = tempdir().unwrap();
        let ledger = ledger(dir.path(), SummaryMatch::Exact);
        post(&ledger, t0(), "daily update");

        let check = |minutes: i64| {
            ledger
                .check_at(
                    t0() + Duration::minutes(minutes),
                    ActionType::DiscordPost,
                    "channel-1",
                    Some("daily update"),
                    2.0,
                )
                .unwrap()
        };
        assert!(check(90).is_some());
        assert!(check(120).is_some());
        assert!(check(150).is_none());
    }

    #[test]
    fn test_unbounded_windows_cover_whole_ledger() {
        let dir = tempdir().unwrap();
        let ledger = ledger(dir.path(), SummaryMatch::Exact);
        post(&ledger, t0(), "daily update");

        let later = t0() + Duration::days(3650);
        for hours in [1.0e12, f64::MAX, f64::INFINITY] {
            let found = ledger
                .check_at(later, ActionType::DiscordPost, "channel-1", None, hours)
                .unwrap();
            assert!(found.is_some(), "window {hours}");
        }

        for hours in [-1.0, f64::NAN] {
            let err = ledger
                .check_at(later, ActionType::DiscordPost, "channel-1", None, hours)
                .unwrap_err();
            assert!(matches!(err, KeeperError::Config(_)));
        }
    }

    #[test]
    fn test_match_requires_type_and_target() {
        let dir = tempdir().unwrap();
        let ledger = ledger(dir.path(), SummaryMatch::Exact);
        post(&ledger, t0(), "daily update");

        let now = t0() + Duration::minutes(1);
        assert!(ledger
            .check_at(now, ActionType::Email, "channel-1", None, 2.0)
            .unwrap()
            .is_none());
        assert!(ledger
            .check_at(now, ActionType::DiscordPost, "channel-2", None, 2.0)
            .unwrap()
            .is_none());
        assert!(ledger
            .check_at(now, ActionType::DiscordPost, "channel-1", None, 2.0)
            .unwrap()
            .is_some());
        assert!(ledger
            .check_at(now, ActionType::DiscordPost, "channel-1", Some("weekly"), 2.0)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_fuzzy_and_ignore_policies() {
        let dir = tempdir().unwrap();
        let fuzzy = ledger(dir.path(), SummaryMatch::Fuzzy);
        post(&fuzzy, t0(), "Daily update for the team");

        let now = t0() + Duration::minutes(5);
        let hit = fuzzy
            .check_at(now, ActionType::DiscordPost, "channel-1", Some("daily update for the team."), 2.0)
            .unwrap();
        assert!(hit.is_some());
        let miss = fuzzy
            .check_at(now, ActionType::DiscordPost, "channel-1", Some("release announcement"), 2.0)
            .unwrap();
        assert!(miss.is_none());

        let ignore = ledger(dir.path(), SummaryMatch::Ignore);
        assert!(ignore
            .check_at(now, ActionType::DiscordPost, "channel-1", Some("anything"), 2.0)
            .unwrap()
            .is_some());
    }

    #[test]
    fn test_failed_attempts_still_count() {
        let dir = tempdir().unwrap();
        let ledger = ledger(dir.path(), SummaryMatch::Exact);
        let record = post(&ledger, t0(), "daily update");
        ledger.update(&record.key(), ActionStatus::Failed).unwrap();

        let dup = ledger
            .check_at(
                t0() + Duration::minutes(30),
                ActionType::DiscordPost,
                "channel-1",
                Some("daily update"),
                2.0,
            )
            .unwrap();
        assert_eq!(dup.unwrap().status, ActionStatus::Failed);
    }

    #[test]
    fn test_keys_are_unique() {
        let dir = tempdir().unwrap();
        let ledger = ledger(dir.path(), SummaryMatch::Exact);
        let a = post(&ledger, t0(), "one");
        let b = post(&ledger, t0(), "two");
        assert!(b.ts > a.ts);
        assert_ne!(a.key(), b.key());
    }

    #[test]
    fn test_update_touches_exactly_one_record() {
        let dir = tempdir().unwrap();
        let ledger = ledger(dir.path(), SummaryMatch::Exact);
        let first = post(&ledger, t0(), "one");
        let second = post(&ledger, t0() + Duration::seconds(1), "two");
        let before = std::fs::read_to_string(ledger.path()).unwrap();

        let outcome = ledger.update(&second.key(), ActionStatus::Success).unwrap();
        assert!(outcome.changed);

        let after = std::fs::read_to_string(ledger.path()).unwrap();
        assert_eq!(before.lines().next(), after.lines().next());
        let records = ledger.records().unwrap();
        assert_eq!(records[0], first);
        assert_eq!(records[1].status, ActionStatus::Success);
    }

    #[test]
    fn test_status_never_reverts() {
        let dir = tempdir().unwrap();
        let ledger = ledger(dir.path(), SummaryMatch::Exact);
        let record = post(&ledger, t0(), "one");
        ledger.update(&record.key(), ActionStatus::Success).unwrap();

        let repeat = ledger.update(&record.key(), ActionStatus::Success).unwrap();
        assert!(!repeat.changed);

        for status in [ActionStatus::Pending, ActionStatus::Failed] {
            let err = ledger.update(&record.key(), status).unwrap_err();
            assert!(matches!(err, KeeperError::InvalidTransition { .. }));
        }
        assert_eq!(ledger.records().unwrap()[0].status, ActionStatus::Success);
    }

    #[test]
    fn test_unknown_key() {
        let dir = tempdir().unwrap();
        let ledger = ledger(dir.path(), SummaryMatch::Exact);
        post(&ledger, t0(), "one");

        let err = ledger
            .update("2020-01-01T00:00:00.000000Z", ActionStatus::Success)
            .unwrap_err();
        assert!(matches!(err, KeeperError::RecordNotFound(_)));
        assert!(matches!(
            ledger.update("yesterday", ActionStatus::Success),
            Err(KeeperError::RecordNotFound(_))
        ));
    }

    #[test]
    fn test_corrupt_ledger_fails_closed() {
        let dir = tempdir().unwrap();
        let ledger = ledger(dir.path(), SummaryMatch::Exact);
        post(&ledger, t0(), "one");
        jsonl::append_lines(ledger.path(), &["{\"ts\":".to_string()]).unwrap();

        let err = ledger
            .check_at(t0(), ActionType::Webhook, "nobody", None, 2.0)
            .unwrap_err();
        assert!(matches!(err, KeeperError::CorruptRecord { line: 2, .. }));
    }
}
