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

//! Workspace configuration
//!
//! Every setting has a default, so a workspace needs no configuration file.
//! When `<workspace>/keeper.toml` exists it is layered over the defaults, and
//! `KEEPER_*` environment variables are layered over the file. Command-line
//! flags are applied last by the binary.

use crate::error::{KeeperError, KeeperResult};
use crate::layout::WorkspaceLayout;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Name of the optional configuration file at the workspace root
pub const CONFIG_FILE_NAME: &str = "keeper.toml";

/// Default token budget for recovery payloads
pub const DEFAULT_TOKEN_BUDGET: usize = 8_000;

/// Default dedup lookback in hours
pub const DEFAULT_DEDUP_WINDOW_HOURS: f64 = 2.0;

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct KeeperConfig {
    pub lock: LockConfig,
    pub ingest: IngestConfig,
    pub dedup: DedupConfig,
    pub recovery: RecoveryConfig,
}

/// Advisory lock behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    /// Longest wait for a lock before failing with a timeout
    pub timeout_ms: u64,
    /// Delay between acquisition attempts
    pub poll_interval_ms: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 5_000,
            poll_interval_ms: 50,
        }
    }
}

impl LockConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

/// Conversation ingestion
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Directory scanned in direct mode, relative to the workspace root
    pub direct_sessions_dir: PathBuf,
    /// Replace truncated file-read tool output with the file's current content
    pub reread_truncated_reads: bool,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            direct_sessions_dir: PathBuf::from("sessions"),
            reread_truncated_reads: false,
        }
    }
}

/// How an action summary is compared during a duplicate check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SummaryMatch {
    /// Summaries must be identical
    #[default]
    Exact,
    /// Summaries must be similar above `fuzzy_threshold`
    Fuzzy,
    /// Only type and target are compared
    Ignore,
}

impl FromStr for SummaryMatch {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "exact" => Ok(SummaryMatch::Exact),
            "fuzzy" => Ok(SummaryMatch::Fuzzy),
            "ignore" => Ok(SummaryMatch::Ignore),
            other => Err(format!("unknown summary match policy: {other}")),
        }
    }
}

/// Action dedup ledger
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    pub window_hours: f64,
    pub summary_match: SummaryMatch,
    /// Normalized similarity (0.0..=1.0) at which fuzzy summaries match
    pub fuzzy_threshold: f64,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            window_hours: DEFAULT_DEDUP_WINDOW_HOURS,
            summary_match: SummaryMatch::Exact,
            fuzzy_threshold: 0.85,
        }
    }
}

/// Recovery payload assembly
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    pub token_budget: usize,
    /// Newest unsummarized turns considered for the payload
    pub recent_turn_limit: usize,
    /// Per-message clip applied when rendering recent turns
    pub message_char_limit: usize,
    /// Long-term notes file, relative to the workspace root
    pub notes_file: PathBuf,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            token_budget: DEFAULT_TOKEN_BUDGET,
            recent_turn_limit: 30,
            message_char_limit: 500,
            notes_file: PathBuf::from("MEMORY.md"),
        }
    }
}

impl KeeperConfig {
    /// Load `<workspace>/keeper.toml` (if present) and apply environment overrides
    pub fn load(workspace: &Path) -> KeeperResult<Self> {
        let path = workspace.join(CONFIG_FILE_NAME);
        let mut config = if path.exists() {
            let raw = std::fs::read_to_string(&path)?;
            let parsed = Self::from_toml(&raw)
                .map_err(|e| KeeperError::Config(format!("{}: {}", path.display(), e)))?;
            tracing::debug!("Loaded configuration from {}", path.display());
            parsed
        } else {
            Self::default()
        };
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration text
    pub fn from_toml(raw: &str) -> KeeperResult<Self> {
        toml::from_str(raw).map_err(|e| KeeperError::Config(e.to_string()))
    }

    /// Layer `KEEPER_*` environment variables over the current values
    pub fn apply_env(&mut self) -> KeeperResult<()> {
        if let Some(v) = env_parse::<usize>("KEEPER_TOKEN_BUDGET")? {
            self.recovery.token_budget = v;
        }
        if let Some(v) = env_parse::<u64>("KEEPER_LOCK_TIMEOUT_MS")? {
            self.lock.timeout_ms = v;
        }
        if let Some(v) = env_parse::<f64>("KEEPER_DEDUP_WINDOW_HOURS")? {
            self.dedup.window_hours = v;
        }
        if let Ok(v) = env::var("KEEPER_SUMMARY_MATCH") {
            self.dedup.summary_match = v.parse().map_err(KeeperError::Config)?;
        }
        Ok(())
    }

    /// Reject values no operation can work with
    pub fn validate(&self) -> KeeperResult<()> {
        if !(self.dedup.window_hours.is_finite() && self.dedup.window_hours >= 0.0) {
            return Err(KeeperError::Config(format!(
                "dedup.window_hours must be a non-negative number, got {}",
                self.dedup.window_hours
            )));
        }
        if !(0.0..=1.0).contains(&self.dedup.fuzzy_threshold) {
            return Err(KeeperError::Config(format!(
                "dedup.fuzzy_threshold must be within 0.0..=1.0, got {}",
                self.dedup.fuzzy_threshold
            )));
        }
        if self.recovery.token_budget == 0 {
            return Err(KeeperError::Config(
                "recovery.token_budget must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Workspace layout with the configured overrides applied
    pub fn layout(&self, workspace: impl Into<PathBuf>) -> WorkspaceLayout {
        WorkspaceLayout::new(workspace)
            .with_direct_sessions_dir(&self.ingest.direct_sessions_dir)
            .with_notes_file(&self.recovery.notes_file)
    }
}

/// Workspace used when none is given: `$KEEPER_WORKSPACE`, else `~/.openclaw/workspace`
pub fn default_workspace() -> PathBuf {
    if let Ok(dir) = env::var("KEEPER_WORKSPACE") {
        return PathBuf::from(dir);
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".openclaw")
        .join("workspace")
}

fn env_parse<T: FromStr>(name: &str) -> KeeperResult<Option<T>>
where
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| KeeperError::Config(format!("{}={:?}: {}", name, raw, e))),
        Err(_) => Ok(None),
    }
}
