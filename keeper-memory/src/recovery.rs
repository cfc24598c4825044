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

//! Recovery Payload Assembler
//!
//! Builds the context re-injected after a compaction: recent raw turns not yet
//! folded into an hourly summary, today's hourly summary document, then the
//! long-term notes. Blocks are packed in that priority under a token budget.
//! The first block that does not fit is truncated to the remaining budget and
//! nothing after it is included. Notes that would be truncated are replaced
//! by their categorized index when the index is smaller.

use crate::aggregate::Aggregator;
use crate::notes_index::NotesIndexer;
use chrono::{DateTime, SecondsFormat, Utc};
use keeper_core::{
    lock_path_for, EventLogEntry, KeeperConfig, KeeperResult, LockConfig, RecoveryConfig,
    TokenCalculator, WorkspaceLayout,
};
use keeper_storage::jsonl::{append_lines, read_to_string_if_exists};
use keeper_storage::{EventLog, FileLock};
use serde::Serialize;
use std::path::PathBuf;
use tracing::{debug, info};

/// Where a block's content came from, in priority order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockSource {
    RecentTurns,
    HourlySummary,
    Notes,
}

impl BlockSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockSource::RecentTurns => "recent_turns",
            BlockSource::HourlySummary => "hourly_summary",
            BlockSource::Notes => "notes",
        }
    }
}

/// Content offered to the packer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateBlock {
    pub source: BlockSource,
    pub title: String,
    pub body: String,
}

impl CandidateBlock {
    pub fn new(source: BlockSource, title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            source,
            title: title.into(),
            body: body.into(),
        }
    }

    fn heading(&self) -> String {
        format!("\n## {}\n\n", self.title)
    }

    fn full_text(&self) -> String {
        format!("{}{}\n", self.heading(), self.body.trim_end())
    }

    /// Clip to `budget` tokens, keeping the heading when it fits.
    ///
    /// Recent turns keep their newest (last) lines, everything else its start.
    fn clip(&self, calc: &TokenCalculator, budget: usize) -> String {
        let clip_body = |text: &str, budget: usize| {
            if self.source == BlockSource::RecentTurns {
                calc.truncate_tail(text, budget)
            } else {
                calc.truncate_head(text, budget)
            }
        };
        let heading = self.heading();
        let heading_tokens = calc.estimate(&heading);
        if heading_tokens < budget {
            format!("{}{}", heading, clip_body(self.body.trim_end(), budget - heading_tokens))
        } else {
            clip_body(&self.full_text(), budget)
        }
    }
}

/// A block as included in the payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PayloadBlock {
    pub source: BlockSource,
    pub content: String,
    pub tokens: usize,
    pub truncated: bool,
}

/// Bounded post-compaction context
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecoveryPayload {
    pub generated_at: DateTime<Utc>,
    pub budget: usize,
    pub session_key: Option<String>,
    /// Raw turns offered in the recent-turns block
    pub recent_turns: usize,
    pub header: Option<String>,
    pub blocks: Vec<PayloadBlock>,
    pub total_tokens: usize,
    /// Sources left out because an earlier block filled the budget
    pub omitted: Vec<BlockSource>,
    /// The highest-priority block alone exceeded the budget
    pub budget_exceeded_at_first_block: bool,
    /// The notes block holds the notes index rather than the notes
    pub notes_indexed: bool,
}

impl RecoveryPayload {
    /// Pack candidate blocks, in the order given, under `budget` tokens
    pub fn pack(
        generated_at: DateTime<Utc>,
        budget: usize,
        candidates: Vec<CandidateBlock>,
        calc: &TokenCalculator,
    ) -> Self {
        let mut payload = RecoveryPayload {
            generated_at,
            budget,
            session_key: None,
            recent_turns: 0,
            header: None,
            blocks: Vec::new(),
            total_tokens: 0,
            omitted: Vec::new(),
            budget_exceeded_at_first_block: false,
            notes_indexed: false,
        };

        let header = format!(
            "# Post-Compaction Context Recovery\nGenerated: {}\n",
            generated_at.to_rfc3339_opts(SecondsFormat::Secs, true)
        );
        let header_tokens = calc.estimate(&header);
        if header_tokens < budget {
            payload.total_tokens = header_tokens;
            payload.header = Some(header);
        }

        let candidates: Vec<CandidateBlock> = candidates
            .into_iter()
            .filter(|c| !c.body.trim().is_empty())
            .collect();

        for (idx, candidate) in candidates.iter().enumerate() {
            let remaining = budget - payload.total_tokens;
            let text = candidate.full_text();
            let tokens = calc.estimate(&text);

            if tokens <= remaining {
                payload.total_tokens += tokens;
                payload.blocks.push(PayloadBlock {
                    source: candidate.source,
                    content: text,
                    tokens,
                    truncated: false,
                });
                continue;
            }

            let clipped = candidate.clip(calc, remaining);
            if !clipped.is_empty() {
                let tokens = calc.estimate(&clipped);
                payload.total_tokens += tokens;
                payload.blocks.push(PayloadBlock {
                    source: candidate.source,
                    content: clipped,
                    tokens,
                    truncated: true,
                });
            }
            payload.budget_exceeded_at_first_block = idx == 0;
            payload.omitted = candidates[idx + 1..].iter().map(|c| c.source).collect();
            debug!(
                "Truncated {} to {} tokens, omitted {:?}",
                candidate.source.as_str(),
                remaining,
                payload.omitted
            );
            break;
        }
        payload
    }

    /// Whether any block was clipped
    pub fn truncated(&self) -> bool {
        self.blocks.iter().any(|b| b.truncated)
    }

    fn notes_truncated(&self) -> bool {
        self.blocks
            .last()
            .is_some_and(|b| b.source == BlockSource::Notes && b.truncated)
    }

    /// Payload text as injected into the agent's context
    pub fn render(&self) -> String {
        let mut out = self.header.clone().unwrap_or_default();
        for block in &self.blocks {
            out.push_str(&block.content);
        }
        out
    }
}

/// Gathers workspace state into a [`RecoveryPayload`]
#[derive(Debug, Clone)]
pub struct RecoveryAssembler {
    layout: WorkspaceLayout,
    config: RecoveryConfig,
    lock: LockConfig,
    event_log: EventLog,
    aggregator: Aggregator,
    indexer: NotesIndexer,
    calc: TokenCalculator,
}

impl RecoveryAssembler {
    pub fn new(layout: WorkspaceLayout, config: &KeeperConfig) -> Self {
        Self {
            event_log: EventLog::new(layout.clone(), config.lock.clone()),
            aggregator: Aggregator::new(layout.clone(), config),
            indexer: NotesIndexer::default(),
            config: config.recovery.clone(),
            lock: config.lock.clone(),
            calc: TokenCalculator::new(),
            layout,
        }
    }

    /// Assemble with the configured token budget
    pub fn assemble_default(
        &self,
        session_key: Option<&str>,
        now: DateTime<Utc>,
    ) -> KeeperResult<RecoveryPayload> {
        self.assemble(self.config.token_budget, session_key, now)
    }

    /// Assemble the payload as of `now`.
    ///
    /// Without a session key the active session is the one that produced the
    /// newest event log entry.
    pub fn assemble(
        &self,
        budget: usize,
        session_key: Option<&str>,
        now: DateTime<Utc>,
    ) -> KeeperResult<RecoveryPayload> {
        let pending = self.unaggregated_entries()?;
        let session = match session_key {
            Some(key) => Some(key.to_string()),
            None => self.newest_session()?,
        };

        let mut recent: Vec<&EventLogEntry> = pending
            .iter()
            .filter(|e| session.as_deref() == Some(e.turn.session_key.as_str()))
            .collect();
        recent.sort_by_key(|e| e.turn.sequence);
        let skip = recent.len().saturating_sub(self.config.recent_turn_limit);
        let recent = &recent[skip..];

        let turns_body = recent
            .iter()
            .map(|e| self.format_turn(e))
            .collect::<Vec<_>>()
            .join("\n");
        let turns_title = match &session {
            Some(key) => format!("Recent Turns ({key})"),
            None => "Recent Turns".to_string(),
        };

        let today = now.date_naive();
        let hourly = read_to_string_if_exists(&self.layout.hourly_summary_file(today))?;
        let hourly_body = match hourly.split_once('\n') {
            Some((first, rest)) if first.starts_with("# ") => rest.trim_start().to_string(),
            _ => hourly,
        };
        let notes = read_to_string_if_exists(self.layout.notes_file())?;
        let notes_name = self
            .layout
            .notes_file()
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let mut candidates = vec![
            CandidateBlock::new(BlockSource::RecentTurns, turns_title, turns_body),
            CandidateBlock::new(
                BlockSource::HourlySummary,
                format!("Hourly Summaries ({})", today.format("%Y-%m-%d")),
                hourly_body,
            ),
            CandidateBlock::new(
                BlockSource::Notes,
                format!("Long-Term Notes ({notes_name})"),
                notes.as_str(),
            ),
        ];

        let mut payload = RecoveryPayload::pack(now, budget, candidates.clone(), &self.calc);
        if payload.notes_truncated() {
            let index = self.indexer.build(&notes).render_sections();
            if !index.is_empty() && self.calc.estimate(&index) < self.calc.estimate(&notes) {
                debug!("Notes exceed the remaining budget, packing their index instead");
                if let Some(last) = candidates.last_mut() {
                    *last = CandidateBlock::new(
                        BlockSource::Notes,
                        format!("Long-Term Notes Index ({notes_name})"),
                        index,
                    );
                }
                payload = RecoveryPayload::pack(now, budget, candidates, &self.calc);
                payload.notes_indexed = true;
            }
        }
        payload.session_key = session;
        payload.recent_turns = recent.len();

        info!(
            "Assembled recovery payload: {} blocks, {} of {} tokens{}",
            payload.blocks.len(),
            payload.total_tokens,
            budget,
            if payload.truncated() { " (truncated)" } else { "" }
        );
        Ok(payload)
    }

    /// Record the compaction in the daily note for `payload.generated_at`
    pub fn log_event(&self, payload: &RecoveryPayload) -> KeeperResult<PathBuf> {
        let path = self
            .layout
            .daily_note_file(payload.generated_at.date_naive());
        let _guard = FileLock::acquire(&lock_path_for(&path), &self.lock)?;

        let sources = payload
            .blocks
            .iter()
            .map(|b| {
                let name = if b.source == BlockSource::Notes && payload.notes_indexed {
                    "notes_index"
                } else {
                    b.source.as_str()
                };
                if b.truncated {
                    format!("{name} (truncated)")
                } else {
                    name.to_string()
                }
            })
            .collect::<Vec<_>>()
            .join(", ");
        let event = format!(
            "\n## {} Compaction Event\n\
             Context compaction detected. Recovery payload: ~{} of {} tokens, \
             {} recent turns from {}.\n\
             Blocks: {}\n",
            payload.generated_at.format("%H:%M"),
            payload.total_tokens,
            payload.budget,
            payload.recent_turns,
            payload.session_key.as_deref().unwrap_or("no session"),
            if sources.is_empty() { "none" } else { sources.as_str() },
        );
        append_lines(&path, &[event.trim_end_matches('\n').to_string()])?;
        info!("Logged compaction event to {}", path.display());
        Ok(path)
    }

    fn format_turn(&self, entry: &EventLogEntry) -> String {
        let turn = &entry.turn;
        let flat = turn.content.split_whitespace().collect::<Vec<_>>().join(" ");
        let limit = self.config.message_char_limit;
        let content = if flat.chars().count() > limit {
            let head: String = flat.chars().take(limit).collect();
            format!("{head}...")
        } else {
            flat
        };
        format!(
            "[{}] {} {}: {}",
            turn.sequence,
            turn.timestamp.format("%H:%M:%S"),
            turn.role,
            content
        )
    }

    /// Log entries past each day's aggregated position
    fn unaggregated_entries(&self) -> KeeperResult<Vec<EventLogEntry>> {
        let mut out = Vec::new();
        for date in self.event_log.dates()? {
            let processed = self.aggregator.processed_lines(date);
            let day = self.event_log.read_day(date)?;
            out.extend(day.after_line(processed).cloned());
        }
        Ok(out)
    }

    fn newest_session(&self) -> KeeperResult<Option<String>> {
        for date in self.event_log.dates()?.into_iter().rev() {
            let day = self.event_log.read_day(date)?;
            if let Some((_, entry)) = day.entries.last() {
                return Ok(Some(entry.turn.session_key.clone()));
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use keeper_core::{Role, Turn};
    use proptest::prelude::*;
    use tempfile::tempdir;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 1, 16, 30, 0).unwrap()
    }

    fn block(source: BlockSource, chars: usize) -> CandidateBlock {
        let body = (0..chars)
            .map(|i| if i % 40 == 39 { '\n' } else { 'x' })
            .collect::<String>();
        CandidateBlock::new(source, source.as_str(), body)
    }

    #[test]
    fn test_everything_fits() {
        let calc = TokenCalculator::new();
        let payload = RecoveryPayload::pack(
            now(),
            1_000,
            vec![
                block(BlockSource::RecentTurns, 100),
                block(BlockSource::HourlySummary, 100),
                block(BlockSource::Notes, 100),
            ],
            &calc,
        );
        assert!(payload.header.is_some());
        assert_eq!(payload.blocks.len(), 3);
        assert!(!payload.truncated());
        assert!(payload.omitted.is_empty());
        assert!(calc.estimate(&payload.render()) <= payload.total_tokens);
    }

    #[test]
    fn test_truncation_stops_assembly() {
        let calc = TokenCalculator::new();
        let payload = RecoveryPayload::pack(
            now(),
            120,
            vec![
                block(BlockSource::RecentTurns, 100),
                block(BlockSource::HourlySummary, 2_000),
                block(BlockSource::Notes, 10),
            ],
            &calc,
        );
        assert_eq!(payload.blocks.len(), 2);
        assert!(payload.blocks[1].truncated);
        assert_eq!(payload.omitted, vec![BlockSource::Notes]);
        assert!(!payload.budget_exceeded_at_first_block);
        assert!(payload.total_tokens <= 120);
    }

    #[test]
    fn test_first_block_over_budget_is_flagged() {
        let calc = TokenCalculator::new();
        let payload = RecoveryPayload::pack(
            now(),
            50,
            vec![block(BlockSource::RecentTurns, 5_000), block(BlockSource::Notes, 10)],
            &calc,
        );
        assert!(payload.budget_exceeded_at_first_block);
        assert_eq!(payload.blocks.len(), 1);
        assert!(payload.blocks[0].content.contains("[truncated]"));
        assert!(payload.blocks[0].content.ends_with("xxx"));
    }

    #[test]
    fn test_empty_sources_are_skipped() {
        let calc = TokenCalculator::new();
        let payload = RecoveryPayload::pack(
            now(),
            1_000,
            vec![
                CandidateBlock::new(BlockSource::RecentTurns, "Recent Turns", "  \n"),
                block(BlockSource::Notes, 10),
            ],
            &calc,
        );
        assert_eq!(payload.blocks.len(), 1);
        assert_eq!(payload.blocks[0].source, BlockSource::Notes);
    }

    proptest! {
        #[test]
        fn prop_budget_law(
            budget in 1usize..600,
            sizes in proptest::collection::vec(0usize..3_000, 0..4),
        ) {
            let calc = TokenCalculator::new();
            let sources = [BlockSource::RecentTurns, BlockSource::HourlySummary, BlockSource::Notes];
            let candidates: Vec<_> = sizes
                .iter()
                .zip(sources.iter().cycle())
                .map(|(n, s)| block(*s, *n))
                .collect();

            let payload = RecoveryPayload::pack(now(), budget, candidates, &calc);

            prop_assert!(payload.total_tokens <= budget);
            prop_assert!(calc.estimate(&payload.render()) <= budget);
            let truncated: Vec<_> = payload.blocks.iter().filter(|b| b.truncated).collect();
            prop_assert!(truncated.len() <= 1);
            if let Some(pos) = payload.blocks.iter().position(|b| b.truncated) {
                prop_assert_eq!(pos, payload.blocks.len() - 1);
            }
            let order: Vec<_> = payload.blocks.iter().map(|b| b.source).collect();
            let mut sorted = order.clone();
            sorted.sort();
            prop_assert_eq!(order, sorted);
        }
    }

    #[test]
    fn test_assemble_from_workspace() {
        let dir = tempdir().unwrap();
        let layout = WorkspaceLayout::new(dir.path());
        let config = KeeperConfig::default();
        let log = EventLog::new(layout.clone(), config.lock.clone());

        let at = |h, m| Utc.with_ymd_and_hms(2026, 5, 1, h, m, 0).unwrap();
        let entries: Vec<_> = (1..=3)
            .map(|seq| {
                let ts = at(9, seq as u32);
                EventLogEntry::new(Turn::new("main", seq, Role::User, format!("msg {seq}"), ts), ts)
            })
            .collect();
        log.append("main", &entries).unwrap();
        Aggregator::new(layout.clone(), &config)
            .run_date(at(9, 0).date_naive())
            .unwrap();
        let later = EventLogEntry::new(Turn::new("main", 4, Role::Agent, "fresh", at(16, 0)), at(16, 0));
        log.append("main", &[later]).unwrap();
        std::fs::write(layout.notes_file(), "Remember the deadline.\n").unwrap();

        let assembler = RecoveryAssembler::new(layout.clone(), &config);
        let payload = assembler.assemble_default(None, now()).unwrap();

        assert_eq!(payload.session_key.as_deref(), Some("main"));
        assert_eq!(payload.recent_turns, 1);
        let sources: Vec<_> = payload.blocks.iter().map(|b| b.source).collect();
        assert_eq!(
            sources,
            vec![BlockSource::RecentTurns, BlockSource::HourlySummary, BlockSource::Notes]
        );
        let text = payload.render();
        assert!(text.contains("[4] 16:00:00 agent: fresh"));
        assert!(!payload.blocks[0].content.contains("msg 1"));
        assert!(text.contains("## 09:00-09:59"));
        assert!(text.contains("Remember the deadline."));

        let path = assembler.log_event(&payload).unwrap();
        let note = std::fs::read_to_string(path).unwrap();
        assert!(note.starts_with("\n## 16:30 Compaction Event\n"));
        assert!(note.ends_with("Blocks: recent_turns, hourly_summary, notes\n"));
    }

    #[test]
    fn test_oversized_notes_fall_back_to_index() {
        let dir = tempdir().unwrap();
        let layout = WorkspaceLayout::new(dir.path());
        let config = KeeperConfig::default();

        let mut notes = String::from("## Never Forget\n- Never deploy on Fridays without a rollback plan\n\n## Journal\n");
        for day in 1..=60 {
            notes.push_str(&format!(
                "Day {day}: long free-form notes about meetings, people and plans that the index leaves out.\n"
            ));
        }
        std::fs::write(layout.notes_file(), &notes).unwrap();

        let assembler = RecoveryAssembler::new(layout, &config);
        let payload = assembler.assemble(300, None, now()).unwrap();

        assert!(payload.notes_indexed);
        assert_eq!(payload.blocks.len(), 1);
        let notes_block = &payload.blocks[0];
        assert!(!notes_block.truncated);
        assert!(notes_block.content.contains("## Long-Term Notes Index (MEMORY.md)"));
        assert!(notes_block.content.contains("- G01: Never deploy on Fridays without a rollback plan"));
        assert!(payload.total_tokens <= 300);

        let small = assembler.assemble(100_000, None, now()).unwrap();
        assert!(!small.notes_indexed);
        assert!(small.render().contains("Day 60:"));
    }
}
