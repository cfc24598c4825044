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

//! Long-term notes index
//!
//! Condenses the notes file (`MEMORY.md`) into a categorized list of its
//! bullet points, written to `memory/memory-index.md`. Entries are numbered
//! per category (`G01`, `D01`, ...) and clipped, so the index is a fraction of
//! the notes' size and can stand in for them when the recovery budget is
//! tight.
//!
//! A bullet's category comes from its section heading when the heading is a
//! known one, otherwise from whichever rule family matches it most.

use crate::aggregate::RuleFamily;
use chrono::{DateTime, SecondsFormat, Utc};
use keeper_core::{lock_path_for, KeeperResult, LockConfig, TokenCalculator, WorkspaceLayout};
use keeper_storage::jsonl::{atomic_write, read_to_string_if_exists};
use keeper_storage::FileLock;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::{info, warn};

const GOTCHA_PATTERNS: &[&str] = &[
    r"\bnever\b",
    r"\bdon't\b",
    r"\bwarning\b",
    r"\bcareful\b",
    r"\bNOT\b",
    r"\bbroken\b",
    r"\balways check\b",
    r"\bavoid\b",
];

const DECISION_PATTERNS: &[&str] = &[
    r"\bchose\b",
    r"\bdecided\b",
    r"\bgoing with\b",
    r"\bover\b",
    r"\binstead of\b",
    r"\bapproach:",
    r"\bpath\b",
];

const DISCOVERY_PATTERNS: &[&str] = &[
    r"\bdiscovered\b",
    r"\bfound that\b",
    r"\bturns out\b",
    r"\blearned that\b",
    r"\brealized\b",
];

const LESSON_PATTERNS: &[&str] = &[
    r"\blesson:",
    r"\bdon't repeat\b",
    r"\bremember to\b",
    r"\bnext time\b",
    r"\bmistake\b",
];

const PROBLEM_FIX_PATTERNS: &[&str] = &[
    r"\bfix:",
    r"\bsolved by\b",
    r"\bworkaround:",
    r"\bissue:",
    r"→",
    r"\bproblem\b.*\bsolution\b",
];

const GOTCHA_SECTIONS: &[&str] = &["never forget"];
const LESSON_SECTIONS: &[&str] = &["lessons learned"];
const ACTIVE_SECTIONS: &[&str] = &[
    "active now",
    "on deck",
    "goals",
    "primary",
    "secondary",
    "tertiary",
    "milestones",
];

const MIN_ENTRY_CHARS: usize = 15;
const MAX_ENTRY_CHARS: usize = 100;

/// Index size beyond which it stops being a cheap stand-in for the notes
pub const INDEX_CHAR_TARGET: usize = 16_000;

/// Index categories, in rendering order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoteCategory {
    Gotcha,
    Decision,
    Discovery,
    Lesson,
    ProblemFix,
    Active,
}

impl NoteCategory {
    pub fn title(&self) -> &'static str {
        match self {
            NoteCategory::Gotcha => "Gotchas",
            NoteCategory::Decision => "Decisions",
            NoteCategory::Discovery => "Discoveries",
            NoteCategory::Lesson => "Lessons",
            NoteCategory::ProblemFix => "Problem-Fix Pairs",
            NoteCategory::Active => "Active Context",
        }
    }

    /// Letter starting each entry id
    pub fn id_prefix(&self) -> char {
        match self {
            NoteCategory::Gotcha => 'G',
            NoteCategory::Decision => 'D',
            NoteCategory::Discovery => 'V',
            NoteCategory::Lesson => 'L',
            NoteCategory::ProblemFix => 'P',
            NoteCategory::Active => 'A',
        }
    }
}

/// Categorized notes entries
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NotesIndex {
    pub entries: BTreeMap<NoteCategory, Vec<String>>,
}

impl NotesIndex {
    pub fn len(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// One `## Title` section per non-empty category
    pub fn render_sections(&self) -> String {
        let mut out = String::new();
        for (category, items) in &self.entries {
            if items.is_empty() {
                continue;
            }
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str(&format!("## {}\n", category.title()));
            for (idx, item) in items.iter().enumerate() {
                out.push_str(&format!("- {}{:02}: {}\n", category.id_prefix(), idx + 1, item));
            }
        }
        out
    }

    /// The index document
    pub fn render(&self, generated_at: DateTime<Utc>, source: &str) -> String {
        let mut doc = format!(
            "# Memory Index\nGenerated: {} | Entries: {} | Source: {}\n\n\
             <!-- Generated from {}; look entries up there by their text -->\n",
            generated_at.to_rfc3339_opts(SecondsFormat::Secs, true),
            self.len(),
            source,
            source,
        );
        let sections = self.render_sections();
        if !sections.is_empty() {
            doc.push('\n');
            doc.push_str(&sections);
        }
        doc
    }
}

/// Outcome of writing the index file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexReport {
    pub path: PathBuf,
    pub entries: usize,
    pub chars: usize,
    pub tokens: usize,
    /// Notes file size, for comparison
    pub source_chars: usize,
    pub over_target: bool,
}

/// Rule-based notes categorizer
#[derive(Debug, Clone)]
pub struct NotesIndexer {
    families: Vec<(NoteCategory, RuleFamily)>,
}

impl Default for NotesIndexer {
    fn default() -> Self {
        Self {
            families: vec![
                (NoteCategory::Gotcha, RuleFamily::new(GOTCHA_PATTERNS)),
                (NoteCategory::Decision, RuleFamily::new(DECISION_PATTERNS)),
                (NoteCategory::Discovery, RuleFamily::new(DISCOVERY_PATTERNS)),
                (NoteCategory::Lesson, RuleFamily::new(LESSON_PATTERNS)),
                (NoteCategory::ProblemFix, RuleFamily::new(PROBLEM_FIX_PATTERNS)),
            ],
        }
    }
}

impl NotesIndexer {
    /// Category for one entry found under `section` (normalized heading text).
    ///
    /// Known sections decide first; otherwise the family with the most
    /// matching rules wins, earlier families winning ties.
    pub fn categorize(&self, text: &str, section: &str) -> Option<NoteCategory> {
        if GOTCHA_SECTIONS.contains(&section) {
            return Some(NoteCategory::Gotcha);
        }
        if LESSON_SECTIONS.contains(&section) {
            return Some(NoteCategory::Lesson);
        }
        if ACTIVE_SECTIONS.contains(&section) {
            return Some(NoteCategory::Active);
        }

        let mut best: Option<(NoteCategory, usize)> = None;
        for (category, family) in &self.families {
            let score = family.score(text);
            if score > 0 && best.map_or(true, |(_, top)| score > top) {
                best = Some((*category, score));
            }
        }
        match best {
            Some((category, _)) => Some(category),
            None if section == "context" || section.ends_with("expertise") => {
                Some(NoteCategory::Active)
            }
            None => None,
        }
    }

    /// Categorize every bullet of a notes document
    pub fn build(&self, content: &str) -> NotesIndex {
        let mut index = NotesIndex::default();
        let mut section = String::new();

        for line in content.lines() {
            let line = line.trim();
            if line.starts_with('#') {
                section = section_name(line);
                continue;
            }
            if line.is_empty() || line.starts_with("---") || line.starts_with('_') {
                continue;
            }
            if line.len() > 4 && line.starts_with("**") && line.ends_with("**") {
                continue;
            }
            let Some(text) = bullet_text(line) else {
                continue;
            };
            if text.chars().count() < MIN_ENTRY_CHARS {
                continue;
            }
            if let Some(category) = self.categorize(&text, &section) {
                index.entries.entry(category).or_default().push(clip_entry(&text));
            }
        }
        index
    }

    /// Rebuild the index file from the workspace's notes file
    pub fn write(
        &self,
        layout: &WorkspaceLayout,
        lock: &LockConfig,
        now: DateTime<Utc>,
    ) -> KeeperResult<IndexReport> {
        let notes = read_to_string_if_exists(layout.notes_file())?;
        let source = layout
            .notes_file()
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let index = self.build(&notes);
        let doc = index.render(now, &source);

        let path = layout.notes_index_file();
        {
            let _guard = FileLock::acquire(&lock_path_for(&path), lock)?;
            atomic_write(&path, doc.as_bytes())?;
        }

        let chars = doc.chars().count();
        let report = IndexReport {
            path,
            entries: index.len(),
            chars,
            tokens: TokenCalculator::new().estimate(&doc),
            source_chars: notes.chars().count(),
            over_target: chars > INDEX_CHAR_TARGET,
        };
        if report.over_target {
            warn!(
                "Notes index is {} chars, above the {} char target",
                report.chars, INDEX_CHAR_TARGET
            );
        }
        info!(
            "Indexed {} notes entries into {} ({} chars)",
            report.entries,
            report.path.display(),
            report.chars
        );
        Ok(report)
    }
}

/// Heading text without markers or symbols, lowercased
fn section_name(heading: &str) -> String {
    heading
        .trim_start_matches('#')
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace() || matches!(*c, '\'' | '\u{2019}'))
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Bullet body with bold markers removed, or `None` for non-bullet lines
fn bullet_text(line: &str) -> Option<String> {
    let body = line
        .strip_prefix('-')
        .or_else(|| line.strip_prefix('•'))
        .or_else(|| line.strip_prefix("* "))?;
    Some(body.trim().replace("**", ""))
}

fn clip_entry(text: &str) -> String {
    if text.chars().count() > MAX_ENTRY_CHARS {
        let head: String = text.chars().take(MAX_ENTRY_CHARS - 3).collect();
        format!("{head}...")
    } else {
        text.to_string()
    }
}
