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

//! Snapshot parsing
//!
//! Converts the agent runtime's history export into [`Turn`]s. The runtime is
//! loose about shape: the export may be a bare array or an object wrapping a
//! `messages`/`history` array, timestamps arrive as RFC 3339, naive UTC or
//! epoch numbers, and content may be a string or a list of typed blocks.

use chrono::{DateTime, NaiveDateTime, Utc};
use keeper_core::{looks_truncated, KeeperError, KeeperResult, Role, ToolCall, Turn, WorkspaceLayout};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use tracing::{debug, warn};

/// Epoch values above this are milliseconds
const EPOCH_MILLIS_THRESHOLD: f64 = 1e12;

/// Prefix given to flattened thinking blocks
const THINKING_PREFIX: &str = "[THINKING] ";

/// Parse a snapshot document.
///
/// Turns without a `session_key` of their own belong to `default_session`.
/// Turns without a timestamp take the time of the turn before them in the
/// same session. Turns whose role the log does not record are skipped; they
/// still occupy their position.
pub fn parse_snapshot(
    raw: &str,
    default_session: &str,
    now: DateTime<Utc>,
) -> KeeperResult<Vec<Turn>> {
    let doc: Value = serde_json::from_str(raw)
        .map_err(|e| KeeperError::InvalidSnapshot(format!("not valid JSON: {e}")))?;

    let items = match doc {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("messages").or_else(|| map.remove("history")) {
            Some(Value::Array(items)) => items,
            _ => {
                return Err(KeeperError::InvalidSnapshot(
                    "expected a JSON array or an object with a messages/history array".into(),
                ))
            }
        },
        _ => {
            return Err(KeeperError::InvalidSnapshot(
                "expected a JSON array or an object with a messages/history array".into(),
            ))
        }
    };

    let mut parsed = Vec::with_capacity(items.len());
    for (idx, item) in items.iter().enumerate() {
        if let Some(turn) = parse_turn(item, idx as u64 + 1, default_session, now)? {
            parsed.push(turn);
        }
    }
    Ok(inherit_timestamps(parsed))
}

/// Parse one on-disk session file (one raw turn per line).
///
/// Lines without an explicit sequence are numbered `position_offset + line`.
/// Unlike [`parse_snapshot`], unusable lines are skipped with a warning: the
/// runtime may be mid-write on the last line.
pub fn parse_session_file(
    path: &Path,
    raw: &str,
    session_key: &str,
    position_offset: u64,
    now: DateTime<Utc>,
) -> Vec<Turn> {
    let mut turns = Vec::new();
    for (idx, line) in raw.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let parsed = serde_json::from_str::<Value>(line)
            .map_err(|e| KeeperError::InvalidSnapshot(e.to_string()))
            .and_then(|value| {
                parse_turn(&value, position_offset + idx as u64 + 1, session_key, now)
            });
        match parsed {
            Ok(Some(turn)) => turns.push(turn),
            Ok(None) => {}
            Err(e) => warn!("Skipping line {} of {}: {}", idx + 1, path.display(), e),
        }
    }
    inherit_timestamps(turns)
}

/// A turn as read from the source, before timestamp inheritance
#[derive(Debug)]
struct ParsedTurn {
    turn: Turn,
    /// Whether the source carried a timestamp for this turn
    stamped: bool,
}

/// Fill in missing timestamps from the session's neighbours.
///
/// An unstamped turn takes the time of the last stamped turn before it in its
/// session, or of the first stamped one when none precedes it. Only a session
/// with no timestamps at all keeps the ingestion time. This keeps a session's
/// turns in non-decreasing date order, which the event log requires.
fn inherit_timestamps(parsed: Vec<ParsedTurn>) -> Vec<Turn> {
    let mut last: HashMap<String, DateTime<Utc>> = HashMap::new();
    for p in &parsed {
        if p.stamped && !last.contains_key(&p.turn.session_key) {
            last.insert(p.turn.session_key.clone(), p.turn.timestamp);
        }
    }

    parsed
        .into_iter()
        .map(|ParsedTurn { mut turn, stamped }| {
            if stamped {
                last.insert(turn.session_key.clone(), turn.timestamp);
            } else if let Some(ts) = last.get(&turn.session_key) {
                debug!("Turn {} has no timestamp, using {}", turn.sequence, ts);
                turn.timestamp = *ts;
            } else {
                warn!(
                    "Turn {} of {} has no timestamp, using ingestion time",
                    turn.sequence, turn.session_key
                );
            }
            turn
        })
        .collect()
}

/// Session key encoded in a direct-mode file name.
///
/// `2026-05-01_main.jsonl` and `main.jsonl` both name session `main`.
pub fn session_key_from_file(path: &Path) -> Option<String> {
    let stem = path.file_stem()?.to_str()?;
    let key = match stem.split_once('_') {
        Some((date, rest))
            if !rest.is_empty()
                && chrono::NaiveDate::parse_from_str(date, "%Y-%m-%d").is_ok() =>
        {
            rest
        }
        _ => stem,
    };
    Some(key.to_string())
}

/// Group turns by session, ordered by sequence.
///
/// When a snapshot repeats a sequence the first occurrence wins.
pub fn group_by_session(turns: Vec<Turn>) -> BTreeMap<String, Vec<Turn>> {
    let mut grouped: BTreeMap<String, Vec<Turn>> = BTreeMap::new();
    let mut seen: HashSet<(String, u64)> = HashSet::new();

    for turn in turns {
        if !seen.insert((turn.session_key.clone(), turn.sequence)) {
            debug!(
                "Dropping repeated sequence {} for {}",
                turn.sequence, turn.session_key
            );
            continue;
        }
        grouped.entry(turn.session_key.clone()).or_default().push(turn);
    }
    for turns in grouped.values_mut() {
        turns.sort_by_key(|t| t.sequence);
    }
    grouped
}

/// Replace truncated file-read output with the file's current content
pub fn reread_truncated_reads(turn: &mut Turn, layout: &WorkspaceLayout) {
    for call in &mut turn.tool_calls {
        if call.reread || !looks_truncated(&call.output_text()) {
            continue;
        }
        let Some(path) = call.read_path().map(|p| layout.resolve(Path::new(p))) else {
            continue;
        };
        match std::fs::read_to_string(&path) {
            Ok(content) => {
                debug!("Re-read {} for seq {}", path.display(), turn.sequence);
                call.output = Value::String(content);
                call.reread = true;
            }
            Err(e) => debug!("Cannot re-read {}: {}", path.display(), e),
        }
    }
    turn.mark_truncation();
}

/// Parse one raw turn; `None` for roles the log does not record.
///
/// A missing timestamp is provisionally set to `now`.
fn parse_turn(
    item: &Value,
    position: u64,
    default_session: &str,
    now: DateTime<Utc>,
) -> KeeperResult<Option<ParsedTurn>> {
    let obj = item.as_object().ok_or_else(|| {
        KeeperError::InvalidSnapshot(format!("turn at position {position} is not an object"))
    })?;

    let sequence = match obj.get("seq").or_else(|| obj.get("sequence")) {
        None | Some(Value::Null) => position,
        Some(v) => v.as_u64().ok_or_else(|| {
            KeeperError::InvalidSnapshot(format!("turn at position {position} has a bad sequence: {v}"))
        })?,
    };

    let role_name = obj.get("role").and_then(Value::as_str).unwrap_or_default();
    let Some(role) = Role::parse(role_name) else {
        warn!("Skipping turn {} with unsupported role {:?}", sequence, role_name);
        return Ok(None);
    };

    let timestamp = match obj.get("timestamp").or_else(|| obj.get("ts")) {
        None | Some(Value::Null) => None,
        Some(v) => Some(parse_timestamp(v).ok_or_else(|| {
            KeeperError::InvalidSnapshot(format!("turn {sequence} has a bad timestamp: {v}"))
        })?),
    };

    let session_key = obj
        .get("session_key")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .unwrap_or(default_session);

    let content = obj.get("content").map(flatten_content).unwrap_or_default();

    let mut turn = Turn::new(session_key, sequence, role, content, timestamp.unwrap_or(now));
    turn.model = obj
        .get("model")
        .and_then(Value::as_str)
        .map(str::to_string);
    if let Some(Value::Array(calls)) = obj.get("tool_calls") {
        turn.tool_calls = calls.iter().filter_map(parse_tool_call).collect();
    }
    turn.mark_truncation();
    Ok(Some(ParsedTurn {
        turn,
        stamped: timestamp.is_some(),
    }))
}

fn parse_tool_call(value: &Value) -> Option<ToolCall> {
    let obj = value.as_object()?;
    let tool = obj
        .get("tool")
        .or_else(|| obj.get("name"))
        .and_then(Value::as_str)?
        .to_string();
    let input = obj
        .get("input")
        .or_else(|| obj.get("arguments"))
        .cloned()
        .map(decode_embedded_json)
        .unwrap_or(Value::Null);
    let output = obj
        .get("output")
        .or_else(|| obj.get("result"))
        .cloned()
        .unwrap_or(Value::Null);
    Some(ToolCall {
        tool,
        input,
        output,
        reread: false,
    })
}

/// Tool arguments are sometimes a JSON object encoded as a string
fn decode_embedded_json(value: Value) -> Value {
    match &value {
        Value::String(s) if s.trim_start().starts_with('{') => {
            serde_json::from_str(s).unwrap_or(value)
        }
        _ => value,
    }
}

fn flatten_content(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        Value::Array(blocks) => blocks
            .iter()
            .filter_map(|block| match block {
                Value::String(s) => Some(s.clone()),
                Value::Object(b) => {
                    if let Some(text) = b.get("text").and_then(Value::as_str) {
                        Some(text.to_string())
                    } else {
                        b.get("thinking")
                            .and_then(Value::as_str)
                            .map(|t| format!("{THINKING_PREFIX}{t}"))
                    }
                }
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n"),
        other => other.to_string(),
    }
}

fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => {
            let raw = n.as_f64()?;
            if raw > EPOCH_MILLIS_THRESHOLD {
                DateTime::from_timestamp_millis(raw as i64)
            } else {
                DateTime::from_timestamp_millis((raw * 1000.0) as i64)
            }
        }
        Value::String(s) => {
            let s = s.trim();
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Some(dt.with_timezone(&Utc));
            }
            ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
                .map(|naive| naive.and_utc())
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::tempdir;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_array_and_wrapped_forms() {
        let array = r#"[{"role":"user","content":"hi","timestamp":"2026-05-01T10:00:00Z"}]"#;
        let wrapped = r#"{"messages":[{"role":"user","content":"hi","timestamp":"2026-05-01T10:00:00Z"}]}"#;
        let history = r#"{"history":[{"role":"user","content":"hi","timestamp":"2026-05-01T10:00:00Z"}]}"#;

        let a = parse_snapshot(array, "main", now()).unwrap();
        assert_eq!(a, parse_snapshot(wrapped, "main", now()).unwrap());
        assert_eq!(a, parse_snapshot(history, "main", now()).unwrap());
        assert_eq!(a[0].sequence, 1);
        assert_eq!(a[0].session_key, "main");
    }

    #[test]
    fn test_rejects_other_shapes() {
        for raw in [r#"{"turns":[]}"#, "42", "not json"] {
            let err = parse_snapshot(raw, "main", now()).unwrap_err();
            assert!(matches!(err, KeeperError::InvalidSnapshot(_)), "{raw}");
        }
    }

    #[test]
    fn test_unsupported_roles_are_skipped() {
        let raw = r#"[
            {"role":"user","content":"run it"},
            {"role":"toolResult","content":"ok"},
            {"role":"assistant","content":"done"},
            {"content":"no role"}
        ]"#;
        let turns = parse_snapshot(raw, "main", now()).unwrap();
        let seqs: Vec<u64> = turns.iter().map(|t| t.sequence).collect();
        assert_eq!(seqs, vec![1, 3]);
    }

    #[test]
    fn test_timestamp_forms() {
        let raw = r#"[
            {"seq":1,"role":"user","content":"a","ts":1777629600},
            {"seq":2,"role":"user","content":"b","ts":1777629600000},
            {"seq":3,"role":"user","content":"c","timestamp":"2026-05-01T10:00:00"},
            {"seq":4,"role":"user","content":"d","timestamp":"2026-05-01T12:00:00+02:00"},
            {"seq":5,"role":"user","content":"e"}
        ]"#;
        let turns = parse_snapshot(raw, "main", now()).unwrap();
        let expected = Utc.with_ymd_and_hms(2026, 5, 1, 10, 0, 0).unwrap();
        for turn in &turns {
            assert_eq!(turn.timestamp, expected, "seq {}", turn.sequence);
        }
    }

    #[test]
    fn test_missing_timestamps_follow_session_neighbours() {
        let raw = r#"[
            {"seq":1,"role":"user","content":"a"},
            {"seq":2,"role":"user","content":"b","ts":"2026-04-30T23:50:00Z"},
            {"seq":3,"role":"user","content":"c"},
            {"seq":4,"role":"user","content":"d","ts":"2026-05-01T00:10:00Z"},
            {"seq":5,"role":"user","content":"e"},
            {"seq":1,"role":"user","content":"f","session_key":"side"}
        ]"#;
        let turns = parse_snapshot(raw, "main", now()).unwrap();
        let late = Utc.with_ymd_and_hms(2026, 4, 30, 23, 50, 0).unwrap();
        let early = Utc.with_ymd_and_hms(2026, 5, 1, 0, 10, 0).unwrap();
        let stamps: Vec<_> = turns[..5].iter().map(|t| t.timestamp).collect();
        assert_eq!(stamps, vec![late, late, late, early, early]);
        assert_eq!(turns[5].timestamp, now());
    }

    #[test]
    fn test_content_blocks_and_tool_calls() {
        let raw = r#"[{
            "sequence": 7,
            "role": "assistant",
            "model": "m-1",
            "content": [
                {"type":"thinking","thinking":"weigh options"},
                {"type":"text","text":"Done."}
            ],
            "tool_calls": [
                {"name":"exec","arguments":"{\"command\":\"ls\"}","result":"a b"}
            ]
        }]"#;
        let turn = &parse_snapshot(raw, "main", now()).unwrap()[0];
        assert_eq!(turn.sequence, 7);
        assert_eq!(turn.role, Role::Agent);
        assert_eq!(turn.content, "[THINKING] weigh options\nDone.");
        assert_eq!(turn.model.as_deref(), Some("m-1"));
        assert_eq!(turn.tool_calls[0].tool, "exec");
        assert_eq!(turn.tool_calls[0].input["command"], "ls");
        assert_eq!(turn.tool_calls[0].output_text(), "a b");
    }

    #[test]
    fn test_group_keeps_first_duplicate() {
        let raw = r#"[
            {"seq":2,"role":"user","content":"second"},
            {"seq":1,"role":"user","content":"first"},
            {"seq":2,"role":"user","content":"again"},
            {"seq":1,"role":"user","content":"other","session_key":"side"}
        ]"#;
        let grouped = group_by_session(parse_snapshot(raw, "main", now()).unwrap());
        let main: Vec<_> = grouped["main"].iter().map(|t| t.content.as_str()).collect();
        assert_eq!(main, vec!["first", "second"]);
        assert_eq!(grouped["side"].len(), 1);
    }

    #[test]
    fn test_session_key_from_file() {
        assert_eq!(
            session_key_from_file(Path::new("s/2026-05-01_abc-123.jsonl")).as_deref(),
            Some("abc-123")
        );
        assert_eq!(
            session_key_from_file(Path::new("s/main_chat.jsonl")).as_deref(),
            Some("main_chat")
        );
    }

    #[test]
    fn test_session_file_skips_bad_lines() {
        let raw = "{\"role\":\"user\",\"content\":\"one\"}\n{\"role\":\n{\"role\":\"assistant\",\"content\":\"three\"}\n";
        let turns = parse_session_file(Path::new("main.jsonl"), raw, "main", 0, now());
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[1].sequence, 3);
    }

    #[test]
    fn test_reread_truncated_read() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("notes.txt"), "full file body").unwrap();
        let layout = WorkspaceLayout::new(dir.path());

        let raw = r#"[{"seq":1,"role":"assistant","content":"reading","tool_calls":[
            {"tool":"read","input":{"path":"notes.txt"},"output":"full fi..."}
        ]}]"#;
        let mut turn = parse_snapshot(raw, "main", now()).unwrap().remove(0);
        assert!(turn.truncated);

        reread_truncated_reads(&mut turn, &layout);
        assert!(turn.tool_calls[0].reread);
        assert_eq!(turn.tool_calls[0].output_text(), "full file body");
        assert!(!turn.truncated);
    }
}
