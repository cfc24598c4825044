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

//! Conversation turns and event log entries
//!
//! A [`Turn`] is one unit of conversation as supplied by the agent runtime.
//! The ingestor copies turns verbatim into the event log, wrapping each in an
//! [`EventLogEntry`] that records when it was ingested. Turns are immutable once
//! logged; nothing in the workspace rewrites an event log line.

use chrono::{DateTime, NaiveDate, Timelike, Utc};
use serde::{Deserialize, Serialize};

/// Markers the agent runtime leaves at the end of clipped content
const TRUNCATION_MARKERS: [&str; 4] = ["...", "[truncated]", "(truncated)", "…"];

/// How many trailing characters are inspected for a truncation marker
const TRUNCATION_TAIL_CHARS: usize = 50;

/// Who produced a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    #[serde(alias = "assistant")]
    Agent,
    System,
    Thinking,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Agent => "agent",
            Role::System => "system",
            Role::Thinking => "thinking",
        }
    }

    /// Parse a role name, accepting the runtime's `assistant` spelling
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "user" => Some(Role::User),
            "agent" | "assistant" => Some(Role::Agent),
            "system" => Some(Role::System),
            "thinking" => Some(Role::Thinking),
            _ => None,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A tool invocation attached to a turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub tool: String,
    #[serde(default)]
    pub input: serde_json::Value,
    #[serde(default)]
    pub output: serde_json::Value,
    /// Output was replaced by re-reading the file it came from
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub reread: bool,
}

impl ToolCall {
    /// Path named by a file-read tool call, if this is one
    pub fn read_path(&self) -> Option<&str> {
        if self.tool != "read" && self.tool != "Read" {
            return None;
        }
        self.input
            .get("file_path")
            .or_else(|| self.input.get("path"))
            .and_then(|v| v.as_str())
    }

    /// Output rendered as text (strings unquoted)
    pub fn output_text(&self) -> String {
        match &self.output {
            serde_json::Value::String(s) => s.clone(),
            serde_json::Value::Null => String::new(),
            other => other.to_string(),
        }
    }
}

/// One conversational unit from the external history source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub session_key: String,
    #[serde(rename = "seq")]
    pub sequence: u64,
    pub role: Role,
    pub content: String,
    #[serde(rename = "ts")]
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub truncated: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub truncated_fields: Vec<String>,
}

impl Turn {
    pub fn new(
        session_key: impl Into<String>,
        sequence: u64,
        role: Role,
        content: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            session_key: session_key.into(),
            sequence,
            role,
            content: content.into(),
            timestamp,
            tool_calls: Vec::new(),
            model: None,
            truncated: false,
            truncated_fields: Vec::new(),
        }
    }

    pub fn with_tool_call(mut self, call: ToolCall) -> Self {
        self.tool_calls.push(call);
        self
    }

    /// Recompute `truncated` / `truncated_fields` from the current content
    pub fn mark_truncation(&mut self) {
        let mut fields = Vec::new();
        if looks_truncated(&self.content) {
            fields.push("content".to_string());
        }
        for call in &self.tool_calls {
            if !call.reread && looks_truncated(&call.output_text()) {
                fields.push(format!("tool_call.{}", call.tool));
            }
        }
        self.truncated = !fields.is_empty();
        self.truncated_fields = fields;
    }

    /// UTC calendar date of the turn, which selects its event log file
    pub fn date(&self) -> NaiveDate {
        self.timestamp.date_naive()
    }

    /// UTC hour of the turn, which selects its hourly summary bucket
    pub fn hour(&self) -> u32 {
        self.timestamp.hour()
    }
}

/// A logged turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventLogEntry {
    #[serde(flatten)]
    pub turn: Turn,
    pub ingested_at: DateTime<Utc>,
}

impl EventLogEntry {
    pub fn new(turn: Turn, ingested_at: DateTime<Utc>) -> Self {
        Self { turn, ingested_at }
    }
}

/// Whether text ends with one of the runtime's truncation markers
pub fn looks_truncated(text: &str) -> bool {
    if text.is_empty() {
        return false;
    }
    let tail_start = text
        .char_indices()
        .rev()
        .nth(TRUNCATION_TAIL_CHARS - 1)
        .map(|(i, _)| i)
        .unwrap_or(0);
    let tail = &text[tail_start..];
    TRUNCATION_MARKERS.iter().any(|m| tail.contains(m))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 14, 9, 26, 53).unwrap()
    }

    #[test]
    fn test_entry_line_format() {
        let entry = EventLogEntry::new(Turn::new("main", 7, Role::Agent, "done", ts()), ts());
        let line = serde_json::to_string(&entry).unwrap();

        assert!(line.contains("\"seq\":7"));
        assert!(line.contains("\"role\":\"agent\""));
        assert!(line.contains("\"ts\":\"2026-03-14T09:26:53Z\""));
        assert!(!line.contains("tool_calls"));

        let back: EventLogEntry = serde_json::from_str(&line).unwrap();
        assert_eq!(back, entry);
    }

    #[test]
    fn test_assistant_alias() {
        let json = r#"{"session_key":"s","seq":1,"role":"assistant","content":"hi","ts":"2026-03-14T09:00:00Z"}"#;
        let turn: Turn = serde_json::from_str(json).unwrap();
        assert_eq!(turn.role, Role::Agent);
        assert_eq!(Role::parse("Assistant"), Some(Role::Agent));
        assert_eq!(Role::parse("tool"), None);
    }

    #[test]
    fn test_truncation_detection() {
        assert!(looks_truncated("the output was cut [truncated]"));
        assert!(looks_truncated("and so on…"));
        assert!(!looks_truncated(""));
        // marker far from the end does not count
        let long = format!("... {}", "x".repeat(80));
        assert!(!looks_truncated(&long));

        let mut turn = Turn::new("s", 1, Role::Agent, "fine", ts()).with_tool_call(ToolCall {
            tool: "read".into(),
            input: serde_json::json!({"file_path": "notes.md"}),
            output: serde_json::json!("first lines..."),
            reread: false,
        });
        turn.mark_truncation();
        assert!(turn.truncated);
        assert_eq!(turn.truncated_fields, vec!["tool_call.read".to_string()]);
        assert_eq!(turn.tool_calls[0].read_path(), Some("notes.md"));
    }

    #[test]
    fn test_date_and_hour() {
        let turn = Turn::new("s", 1, Role::User, "q", ts());
        assert_eq!(turn.date(), NaiveDate::from_ymd_opt(2026, 3, 14).unwrap());
        assert_eq!(turn.hour(), 9);
    }
}
