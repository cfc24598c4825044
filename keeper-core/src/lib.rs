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

//! Keeper Core
//!
//! Data model, configuration and error types for compaction-safe agent memory:
//! conversation turns and their event log entries, action records for the
//! dedup ledger, the on-disk workspace layout and token estimation.

pub mod action;
pub mod config;
pub mod error;
pub mod layout;
pub mod tokens;
pub mod turn;

pub use action::{format_key, parse_key, ActionRecord, ActionStatus, ActionType};
pub use config::{
    default_workspace, DedupConfig, IngestConfig, KeeperConfig, LockConfig, RecoveryConfig,
    SummaryMatch, CONFIG_FILE_NAME, DEFAULT_DEDUP_WINDOW_HOURS, DEFAULT_TOKEN_BUDGET,
};
pub use error::{KeeperError, KeeperResult};
pub use layout::{lock_path_for, WorkspaceLayout};
pub use tokens::{TokenCalculator, TRUNCATION_MARKER};
pub use turn::{looks_truncated, EventLogEntry, Role, ToolCall, Turn};
