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

//! Hourly Aggregator
//!
//! Folds one day of the event log into `memory/hourly/YYYY-MM-DD.md`, one
//! section per UTC hour. Each section is a pure function of that hour's log
//! entries, so a section only changes when new entries land in its hour.
//!
//! Progress is tracked per day in `memory/hourly/.aggregator-state` as the
//! number of log lines already folded in plus a digest of the document that
//! was written. A missing or edited document, or a state that claims more
//! lines than the log holds, triggers a full rebuild of the day.

use chrono::{NaiveDate, Utc};
use keeper_core::{
    lock_path_for, EventLogEntry, KeeperConfig, KeeperResult, LockConfig, Role, ToolCall,
    WorkspaceLayout,
};
use keeper_storage::jsonl::{atomic_write, read_to_string_if_exists};
use keeper_storage::{EventLog, FileLock};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::Path;
use tracing::{debug, info, warn};

const DECISION_PATTERNS: &[&str] = &[
    r"\b(?:chose|choosing|decided to|decided on|going with|will use|opted for)\b",
    r"\b(?:rejected|not using|avoiding|won't use|skipping)\b",
    r"\breason:\s*(.+)",
];

const ACTION_PATTERNS: &[&str] = &[
    r"\b(?:created|built|wrote|posted|sent|deployed|updated|modified|deleted)\b",
    r"\b(?:running|executing|spawning|starting|stopping)\b",
];

const TASK_PATTERNS: &[&str] = &[
    r"Phase\s+\d+",
    r"\b(?:working on|building|debugging|implementing|designing|testing)\b",
    r"\bin progress\b",
];

const CONTEXT_PATTERNS: &[&str] = &[
    r"\buser (?:said|mentioned|requested|asked|wants|needs)\b",
    r"\bconstraint:\s*(.+)",
    r"\brequirement:\s*(.+)",
    r"\bexplicitly\s+(?:rejected|requested|specified)\b",
];

/// Sentences this short carry no information
const MIN_ITEM_CHARS: usize = 10;
/// Longer items are clipped to `MAX_ITEM_CHARS - 3` plus an ellipsis
const MAX_ITEM_CHARS: usize = 150;
const MAX_ACTIONS: usize = 10;
const MAX_EXCERPTS: usize = 5;
const MAX_COMMAND_CHARS: usize = 100;

/// One family of case-insensitive extraction rules
#[derive(Debug, Clone)]
pub(crate) struct RuleFamily {
    patterns: Vec<Regex>,
}

impl RuleFamily {
    pub(crate) fn new(patterns: &[&str]) -> Self {
        Self {
            patterns: patterns
                .iter()
                .filter_map(|p| Regex::new(&format!("(?i){p}")).ok())
                .collect(),
        }
    }

    pub(crate) fn matches(&self, text: &str) -> bool {
        self.patterns.iter().any(|re| re.is_match(text))
    }

    /// Number of rules matching `text`
    pub(crate) fn score(&self, text: &str) -> usize {
        self.patterns.iter().filter(|re| re.is_match(text)).count()
    }

    /// Matching sentences of `text`, clipped
    fn extract(&self, text: &str) -> Vec<String> {
        if !self.matches(text) {
            return Vec::new();
        }
        sentences(text)
            .filter(|s| s.chars().count() > MIN_ITEM_CHARS && self.matches(s))
            .map(clip)
            .collect()
    }
}

/// Summary of one hour bucket
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HourSummary {
    pub hour: u32,
    pub entries: usize,
    pub roles: BTreeMap<Role, usize>,
    /// Sequence range per session
    pub sessions: BTreeMap<String, (u64, u64)>,
    pub decisions: Vec<String>,
    pub actions: Vec<String>,
    pub tasks: Vec<String>,
    pub context: Vec<String>,
    /// Opening lines of the hour, kept when no rule matched
    pub excerpts: Vec<String>,
}

impl HourSummary {
    fn is_empty_of_items(&self) -> bool {
        self.decisions.is_empty()
            && self.actions.is_empty()
            && self.tasks.is_empty()
            && self.context.is_empty()
    }

    /// Markdown section, starting with its `## HH:00-HH:59` header
    pub fn render(&self) -> String {
        let mut lines = vec![format!("## {:02}:00-{:02}:59", self.hour, self.hour), String::new()];

        let roles = self
            .roles
            .iter()
            .map(|(role, n)| format!("{role} {n}"))
            .collect::<Vec<_>>()
            .join(", ");
        lines.push(format!("Entries: {} ({})", self.entries, roles));
        let sessions = self
            .sessions
            .iter()
            .map(|(key, (lo, hi))| format!("{} {lo}-{hi}", flatten(key)))
            .collect::<Vec<_>>()
            .join(", ");
        lines.push(format!("Sessions: {sessions}"));

        for (title, items) in [
            ("Decisions", &self.decisions),
            ("Actions Taken", &self.actions),
            ("Active Tasks", &self.tasks),
            ("Key Context", &self.context),
            ("Excerpts", &self.excerpts),
        ] {
            if items.is_empty() {
                continue;
            }
            lines.push(String::new());
            lines.push(format!("**{title}:**"));
            lines.extend(items.iter().map(|item| format!("- {item}")));
        }

        let mut out = lines.join("\n");
        out.push('\n');
        out
    }
}

/// Rule-based extraction over log entries
#[derive(Debug, Clone)]
pub struct Summarizer {
    decisions: RuleFamily,
    actions: RuleFamily,
    tasks: RuleFamily,
    context: RuleFamily,
}

impl Default for Summarizer {
    fn default() -> Self {
        Self {
            decisions: RuleFamily::new(DECISION_PATTERNS),
            actions: RuleFamily::new(ACTION_PATTERNS),
            tasks: RuleFamily::new(TASK_PATTERNS),
            context: RuleFamily::new(CONTEXT_PATTERNS),
        }
    }
}

impl Summarizer {
    /// Summarize one hour's entries, given in log order
    pub fn summarize(&self, hour: u32, entries: &[&EventLogEntry]) -> HourSummary {
        let mut summary = HourSummary {
            hour,
            entries: entries.len(),
            ..HourSummary::default()
        };

        for entry in entries {
            let turn = &entry.turn;
            *summary.roles.entry(turn.role).or_default() += 1;
            let range = summary
                .sessions
                .entry(turn.session_key.clone())
                .or_insert((turn.sequence, turn.sequence));
            range.0 = range.0.min(turn.sequence);
            range.1 = range.1.max(turn.sequence);

            match turn.role {
                Role::Thinking => summary.decisions.extend(self.decisions.extract(&turn.content)),
                Role::Agent => {
                    summary.actions.extend(self.entry_actions(entry));
                    summary.tasks.extend(self.tasks.extract(&turn.content));
                }
                Role::User => summary.context.extend(self.context.extract(&turn.content)),
                Role::System => {}
            }
        }

        dedup(&mut summary.decisions);
        dedup(&mut summary.actions);
        summary.actions.truncate(MAX_ACTIONS);
        dedup(&mut summary.tasks);
        dedup(&mut summary.context);

        if summary.is_empty_of_items() {
            summary.excerpts = entries
                .iter()
                .filter(|e| !e.turn.content.trim().is_empty())
                .take(MAX_EXCERPTS)
                .map(|e| format!("[{}] {}: {}", e.turn.sequence, e.turn.role, clip(&e.turn.content)))
                .collect();
        }
        summary
    }

    fn entry_actions(&self, entry: &EventLogEntry) -> Vec<String> {
        let mut actions: Vec<String> = entry.turn.tool_calls.iter().filter_map(tool_action).collect();
        for sentence in self.actions.extract(&entry.turn.content) {
            if sentence.chars().count() >= MAX_ITEM_CHARS {
                continue;
            }
            if !actions.iter().any(|a| sentence.contains(a.as_str())) {
                actions.push(sentence);
            }
        }
        actions
    }
}

/// Action line derived from a tool call the agent made
fn tool_action(call: &ToolCall) -> Option<String> {
    match call.tool.as_str() {
        "exec" => {
            let command = input_str(call, "command").or_else(|| call.input.as_str())?;
            Some(format!(
                "Executed: {}",
                flatten(command).chars().take(MAX_COMMAND_CHARS).collect::<String>()
            ))
        }
        "message" => input_str(call, "target").map(|t| format!("Posted to {}", flatten(t))),
        "sessions_spawn" => {
            input_str(call, "label").map(|l| format!("Spawned subagent: {}", flatten(l)))
        }
        "write" | "Write" => {
            let path = input_str(call, "file_path").or_else(|| input_str(call, "path"))?;
            let name = Path::new(path).file_name()?.to_string_lossy().into_owned();
            Some(format!("Created/updated {}", flatten(&name)))
        }
        _ => None,
    }
}

fn input_str<'a>(call: &'a ToolCall, field: &str) -> Option<&'a str> {
    call.input
        .get(field)
        .and_then(|v| v.as_str())
        .filter(|s| !s.trim().is_empty())
}

/// Split on sentence punctuation followed by whitespace
fn sentences(text: &str) -> impl Iterator<Item = &str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();
    while let Some((idx, ch)) = chars.next() {
        if matches!(ch, '.' | '!' | '?') {
            if let Some(&(next_idx, next)) = chars.peek() {
                if next.is_whitespace() {
                    parts.push(&text[start..idx]);
                    let mut resume = next_idx;
                    while let Some(&(i, c)) = chars.peek() {
                        if !c.is_whitespace() {
                            break;
                        }
                        chars.next();
                        resume = i + c.len_utf8();
                    }
                    start = resume;
                }
            }
        }
    }
    parts.push(&text[start..]);
    parts.into_iter().map(str::trim).filter(|s| !s.is_empty())
}

/// Collapse every whitespace run to one space
fn flatten(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Single-line item, clipped to `MAX_ITEM_CHARS`.
///
/// Items are rendered as list entries, so they must never carry a line
/// break into the document.
fn clip(text: &str) -> String {
    let text = flatten(text);
    if text.chars().count() > MAX_ITEM_CHARS {
        let head: String = text.chars().take(MAX_ITEM_CHARS - 3).collect();
        format!("{head}...")
    } else {
        text
    }
}

fn dedup(items: &mut Vec<String>) {
    let mut seen = HashSet::new();
    items.retain(|item| seen.insert(item.clone()));
}

/// Progress record for one day
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayState {
    /// Event log lines already folded into the document
    pub lines: usize,
    /// blake3 of the document as last written
    pub digest: String,
}

/// Outcome of aggregating one day
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AggregateReport {
    pub date: NaiveDate,
    /// Log lines seen for the first time
    pub new_lines: usize,
    pub regenerated_hours: Vec<u32>,
    pub corrupt_lines: usize,
    pub full_rebuild: bool,
    /// Whether the summary document changed on disk
    pub written: bool,
}

/// Incremental event-log-to-hourly-summary folding
#[derive(Debug, Clone)]
pub struct Aggregator {
    layout: WorkspaceLayout,
    lock: LockConfig,
    event_log: EventLog,
    summarizer: Summarizer,
}

impl Aggregator {
    pub fn new(layout: WorkspaceLayout, config: &KeeperConfig) -> Self {
        Self {
            event_log: EventLog::new(layout.clone(), config.lock.clone()),
            lock: config.lock.clone(),
            summarizer: Summarizer::default(),
            layout,
        }
    }

    /// Aggregate today (UTC)
    pub fn run_today(&self) -> KeeperResult<AggregateReport> {
        self.run_date(Utc::now().date_naive())
    }

    /// Aggregate every day present in the event log
    pub fn run_all(&self) -> KeeperResult<Vec<AggregateReport>> {
        self.event_log
            .dates()?
            .into_iter()
            .map(|date| self.run_date(date))
            .collect()
    }

    /// Fold new log lines for `date` into its summary document
    pub fn run_date(&self, date: NaiveDate) -> KeeperResult<AggregateReport> {
        let state_path = self.layout.aggregator_state_file();
        let _guard = FileLock::acquire(&lock_path_for(&state_path), &self.lock)?;

        let mut state = self.load_state();
        let day = self.event_log.read_day(date)?;
        let doc_path = self.layout.hourly_summary_file(date);
        let existing = match std::fs::read_to_string(&doc_path) {
            Ok(doc) => Some(doc),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };

        let key = date.format("%Y-%m-%d").to_string();
        let prior = state.get(&key);
        let full_rebuild = match (prior, &existing) {
            (Some(p), Some(doc)) => p.lines > day.line_count || p.digest != digest(doc),
            _ => true,
        };
        let processed = if full_rebuild {
            0
        } else {
            prior.map_or(0, |p| p.lines)
        };

        let mut report = AggregateReport {
            date,
            new_lines: day.line_count - processed,
            regenerated_hours: Vec::new(),
            corrupt_lines: day.corrupt.len(),
            full_rebuild,
            written: false,
        };

        if report.new_lines == 0 || (full_rebuild && day.entries.is_empty()) {
            debug!("Nothing new to aggregate for {}", key);
            report.full_rebuild = false;
            return Ok(report);
        }

        let mut by_hour: BTreeMap<u32, Vec<&EventLogEntry>> = BTreeMap::new();
        for (_, entry) in &day.entries {
            by_hour.entry(entry.turn.hour()).or_default().push(entry);
        }
        let touched: BTreeSet<u32> = if full_rebuild {
            by_hour.keys().copied().collect()
        } else {
            day.after_line(processed).map(|e| e.turn.hour()).collect()
        };

        let mut sections = match (&existing, full_rebuild) {
            (Some(doc), false) => parse_sections(doc),
            _ => BTreeMap::new(),
        };
        for hour in &touched {
            if let Some(entries) = by_hour.get(hour) {
                sections.insert(*hour, self.summarizer.summarize(*hour, entries).render());
            }
        }
        report.regenerated_hours = touched.into_iter().collect();

        let doc = render_document(date, &sections);
        if existing.as_deref() != Some(doc.as_str()) {
            atomic_write(&doc_path, doc.as_bytes())?;
            report.written = true;
        }

        state.insert(
            key,
            DayState {
                lines: day.line_count,
                digest: digest(&doc),
            },
        );
        atomic_write(&state_path, serde_json::to_string_pretty(&state)?.as_bytes())?;

        info!(
            "Aggregated {}: {} new lines, hours {:?}{}",
            date,
            report.new_lines,
            report.regenerated_hours,
            if full_rebuild { " (full rebuild)" } else { "" }
        );
        Ok(report)
    }

    /// Log lines of `date` already reflected in its summary document
    pub fn processed_lines(&self, date: NaiveDate) -> usize {
        self.load_state()
            .get(&date.format("%Y-%m-%d").to_string())
            .map_or(0, |s| s.lines)
    }

    /// Persisted progress; an unreadable state file means starting over
    fn load_state(&self) -> BTreeMap<String, DayState> {
        let path = self.layout.aggregator_state_file();
        let raw = match read_to_string_if_exists(&path) {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Cannot read {}: {}", path.display(), e);
                return BTreeMap::new();
            }
        };
        if raw.trim().is_empty() {
            return BTreeMap::new();
        }
        serde_json::from_str(&raw).unwrap_or_else(|e| {
            warn!("Ignoring corrupt aggregator state {}: {}", path.display(), e);
            BTreeMap::new()
        })
    }
}

fn digest(doc: &str) -> String {
    hex::encode(blake3::hash(doc.as_bytes()).as_bytes())
}

fn render_document(date: NaiveDate, sections: &BTreeMap<u32, String>) -> String {
    let mut doc = format!("# Hourly Summary {}\n", date.format("%Y-%m-%d"));
    for section in sections.values() {
        doc.push('\n');
        doc.push_str(section);
    }
    doc
}

/// Hour sections of a previously rendered document
fn parse_sections(doc: &str) -> BTreeMap<u32, String> {
    let mut sections = BTreeMap::new();
    let mut current: Option<(u32, Vec<&str>)> = None;

    for line in doc.lines() {
        if let Some(hour) = section_hour(line) {
            if let Some((h, body)) = current.take() {
                sections.insert(h, finish_section(&body));
            }
            current = Some((hour, vec![line]));
        } else if let Some((_, body)) = current.as_mut() {
            body.push(line);
        }
    }
    if let Some((h, body)) = current {
        sections.insert(h, finish_section(&body));
    }
    sections
}

fn section_hour(line: &str) -> Option<u32> {
    let rest = line.strip_prefix("## ")?;
    let (start, end) = rest.split_once('-')?;
    let hour: u32 = start.strip_suffix(":00")?.parse().ok()?;
    (end == format!("{hour:02}:59") && hour < 24).then_some(hour)
}

fn finish_section(lines: &[&str]) -> String {
    let mut out = lines.join("\n").trim_end().to_string();
    out.push('\n');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone};
    use keeper_core::Turn;
    use keeper_storage::jsonl::append_lines;
    use tempfile::tempdir;

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 1, hour, minute, 0).unwrap()
    }

    fn entry(seq: u64, role: Role, content: &str, ts: DateTime<Utc>) -> EventLogEntry {
        EventLogEntry::new(Turn::new("main", seq, role, content, ts), ts)
    }

    fn date() -> NaiveDate {
        at(0, 0).date_naive()
    }

    #[test]
    fn test_sentences_split() {
        let parts: Vec<_> = sentences("First one. Second!  Third? end").collect();
        assert_eq!(parts, vec!["First one", "Second", "Third", "end"]);
        let parts: Vec<_> = sentences("v1.2 is out").collect();
        assert_eq!(parts, vec!["v1.2 is out"]);
    }

    #[test]
    fn test_rule_families_by_role() {
        let summarizer = Summarizer::default();
        let a = entry(1, Role::Thinking, "We decided to use the file ledger. Fine", at(9, 0));
        let b = entry(
            2,
            Role::Agent,
            "I deployed the build to staging. Now working on the retry logic",
            at(9, 5),
        );
        let c = entry(3, Role::User, "The user wants daily digests only. Thanks", at(9, 10));
        let summary = summarizer.summarize(9, &[&a, &b, &c]);

        assert_eq!(summary.decisions, vec!["We decided to use the file ledger"]);
        assert_eq!(summary.actions, vec!["I deployed the build to staging"]);
        assert_eq!(summary.tasks, vec!["Now working on the retry logic"]);
        assert_eq!(summary.context, vec!["The user wants daily digests only"]);
        assert!(summary.excerpts.is_empty());
        assert_eq!(summary.sessions["main"], (1, 3));
    }

    #[test]
    fn test_tool_call_actions() {
        let summarizer = Summarizer::default();
        let turn = Turn::new("main", 1, Role::Agent, "", at(9, 0))
            .with_tool_call(ToolCall {
                tool: "exec".into(),
                input: serde_json::json!({"command": "cargo fmt"}),
                output: serde_json::Value::Null,
                reread: false,
            })
            .with_tool_call(ToolCall {
                tool: "Write".into(),
                input: serde_json::json!({"file_path": "/tmp/notes/plan.md"}),
                output: serde_json::Value::Null,
                reread: false,
            });
        let e = EventLogEntry::new(turn, at(9, 0));
        let summary = summarizer.summarize(9, &[&e]);
        assert_eq!(
            summary.actions,
            vec!["Executed: cargo fmt", "Created/updated plan.md"]
        );
    }

    #[test]
    fn test_excerpts_when_nothing_matches() {
        let summarizer = Summarizer::default();
        let e = entry(4, Role::User, "hello\nthere", at(9, 0));
        let summary = summarizer.summarize(9, &[&e]);
        assert_eq!(summary.excerpts, vec!["[4] user: hello there"]);
        assert!(summary.render().starts_with("## 09:00-09:59\n\nEntries: 1 (user 1)\n"));
    }

    #[test]
    fn test_section_round_trip() {
        let summarizer = Summarizer::default();
        let a = entry(1, Role::User, "hello", at(9, 0));
        let b = entry(2, Role::User, "later", at(14, 0));
        let mut sections = BTreeMap::new();
        sections.insert(9, summarizer.summarize(9, &[&a]).render());
        sections.insert(14, summarizer.summarize(14, &[&b]).render());

        let doc = render_document(date(), &sections);
        assert_eq!(parse_sections(&doc), sections);
    }

    #[test]
    fn test_incremental_run_regenerates_touched_hours_only() {
        let dir = tempdir().unwrap();
        let layout = WorkspaceLayout::new(dir.path());
        let log = EventLog::new(layout.clone(), LockConfig::default());
        let aggregator = Aggregator::new(layout.clone(), &KeeperConfig::default());

        log.append(
            "main",
            &[
                entry(1, Role::User, "morning", at(9, 0)),
                entry(2, Role::User, "midday", at(12, 0)),
            ],
        )
        .unwrap();
        let first = aggregator.run_date(date()).unwrap();
        assert!(first.full_rebuild);
        assert_eq!(first.regenerated_hours, vec![9, 12]);

        log.append("main", &[entry(3, Role::User, "still midday", at(12, 30))])
            .unwrap();
        let second = aggregator.run_date(date()).unwrap();
        assert!(!second.full_rebuild);
        assert_eq!(second.new_lines, 1);
        assert_eq!(second.regenerated_hours, vec![12]);

        let doc = std::fs::read_to_string(layout.hourly_summary_file(date())).unwrap();
        assert!(doc.contains("Sessions: main 2-3"));
        assert_eq!(aggregator.processed_lines(date()), 3);
    }

    #[test]
    fn test_multiline_content_stays_inside_its_hour() {
        let dir = tempdir().unwrap();
        let layout = WorkspaceLayout::new(dir.path());
        let log = EventLog::new(layout.clone(), LockConfig::default());
        let aggregator = Aggregator::new(layout.clone(), &KeeperConfig::default());

        let deploy = entry(
            1,
            Role::Agent,
            "I deployed the build\n## 03:00-03:59\nand it went fine",
            at(9, 0),
        )
        .turn
        .with_tool_call(ToolCall {
            tool: "exec".into(),
            input: serde_json::json!({"command": "make\n## 04:00-04:59\nrelease"}),
            output: serde_json::Value::Null,
            reread: false,
        });
        log.append("main", &[EventLogEntry::new(deploy, at(9, 0))])
            .unwrap();
        aggregator.run_date(date()).unwrap();
        log.append("main", &[entry(2, Role::User, "next hour", at(10, 0))])
            .unwrap();
        aggregator.run_date(date()).unwrap();

        let path = layout.hourly_summary_file(date());
        let incremental = std::fs::read_to_string(&path).unwrap();
        let hours: Vec<u32> = incremental.lines().filter_map(section_hour).collect();
        assert_eq!(hours, vec![9, 10]);
        assert!(incremental.contains("- I deployed the build ## 03:00-03:59 and it went fine"));

        std::fs::remove_file(&path).unwrap();
        assert!(aggregator.run_date(date()).unwrap().full_rebuild);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), incremental);
    }

    #[test]
    fn test_edited_document_forces_rebuild() {
        let dir = tempdir().unwrap();
        let layout = WorkspaceLayout::new(dir.path());
        let log = EventLog::new(layout.clone(), LockConfig::default());
        let aggregator = Aggregator::new(layout.clone(), &KeeperConfig::default());

        log.append("main", &[entry(1, Role::User, "morning", at(9, 0))])
            .unwrap();
        aggregator.run_date(date()).unwrap();
        let clean = std::fs::read_to_string(layout.hourly_summary_file(date())).unwrap();

        std::fs::write(layout.hourly_summary_file(date()), "scribbled over\n").unwrap();
        log.append("main", &[entry(2, Role::User, "again", at(10, 0))])
            .unwrap();
        let report = aggregator.run_date(date()).unwrap();
        assert!(report.full_rebuild);

        let doc = std::fs::read_to_string(layout.hourly_summary_file(date())).unwrap();
        assert!(doc.starts_with(&clean));
        assert!(!doc.contains("scribbled"));
    }

    #[test]
    fn test_corrupt_lines_reported() {
        let dir = tempdir().unwrap();
        let layout = WorkspaceLayout::new(dir.path());
        let log = EventLog::new(layout.clone(), LockConfig::default());
        log.append("main", &[entry(1, Role::User, "morning", at(9, 0))])
            .unwrap();
        append_lines(&layout.event_log_file(date()), &["not json".to_string()]).unwrap();

        let report = Aggregator::new(layout, &KeeperConfig::default())
            .run_date(date())
            .unwrap();
        assert_eq!(report.corrupt_lines, 1);
        assert_eq!(report.regenerated_hours, vec![9]);
    }
}
