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

//! Integration tests for the action dedup ledger

use chrono::{Duration, Utc};
use keeper_core::{ActionStatus, ActionType, DedupConfig, LockConfig, WorkspaceLayout};
use keeper_storage::ActionLedger;
use std::collections::HashSet;
use tempfile::tempdir;

fn ledger(root: &std::path::Path) -> ActionLedger {
    ActionLedger::new(
        &WorkspaceLayout::new(root),
        LockConfig::default(),
        DedupConfig::default(),
    )
}

/// Test that an action logged a moment ago is reported as a duplicate
#[test]
fn test_log_then_check_is_duplicate() {
    let dir = tempdir().unwrap();
    let ledger = ledger(dir.path());

    assert!(ledger
        .check(ActionType::DiscordPost, "channel-1", Some("daily update"), 2.0)
        .unwrap()
        .is_none());

    let record = ledger
        .log(
            ActionType::DiscordPost,
            "channel-1",
            "daily update",
            Some("agent:main".into()),
            ActionStatus::Pending,
        )
        .unwrap();
    let dup = ledger
        .check(ActionType::DiscordPost, "channel-1", Some("daily update"), 2.0)
        .unwrap()
        .expect("duplicate expected");
    assert_eq!(dup, record);
}

/// Test the pending -> terminal lifecycle through the public API
#[test]
fn test_status_lifecycle() {
    let dir = tempdir().unwrap();
    let ledger = ledger(dir.path());
    let t0 = Utc::now() - Duration::minutes(10);

    let keep = ledger
        .log_at(t0, ActionType::Email, "ops@example.com", "weekly report", None, ActionStatus::Pending)
        .unwrap();
    let done = ledger
        .log_at(t0, ActionType::Webhook, "https://hooks.example.com/x", "ping", None, ActionStatus::Pending)
        .unwrap();

    let outcome = ledger.update(&done.key(), ActionStatus::Failed).unwrap();
    assert!(outcome.changed);
    assert_eq!(outcome.record.status, ActionStatus::Failed);

    let records = ledger.records().unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0], keep);
    assert_eq!(records[1].status, ActionStatus::Failed);
}

/// Test that concurrent loggers all land with distinct keys
#[test]
fn test_concurrent_logging() {
    let dir = tempdir().unwrap();
    let root = dir.path().to_path_buf();

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let root = root.clone();
            std::thread::spawn(move || {
                ledger(&root)
                    .log(
                        ActionType::ApiCall,
                        "api.example.com",
                        &format!("call {i}"),
                        None,
                        ActionStatus::Pending,
                    )
                    .unwrap()
                    .key()
            })
        })
        .collect();
    let keys: HashSet<String> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert_eq!(keys.len(), 8);
    assert_eq!(ledger(&root).records().unwrap().len(), 8);
}
