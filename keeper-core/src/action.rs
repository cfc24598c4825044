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

//! Action records kept by the dedup ledger

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Kind of external side effect an agent is about to perform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    DiscordPost,
    Dm,
    Email,
    ApiCall,
    FileCreate,
    Webhook,
    Other,
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::DiscordPost => "discord_post",
            ActionType::Dm => "dm",
            ActionType::Email => "email",
            ActionType::ApiCall => "api_call",
            ActionType::FileCreate => "file_create",
            ActionType::Webhook => "webhook",
            ActionType::Other => "other",
        }
    }
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "discord_post" => Ok(ActionType::DiscordPost),
            "dm" => Ok(ActionType::Dm),
            "email" => Ok(ActionType::Email),
            "api_call" => Ok(ActionType::ApiCall),
            "file_create" => Ok(ActionType::FileCreate),
            "webhook" => Ok(ActionType::Webhook),
            "other" => Ok(ActionType::Other),
            _ => Err(format!("unknown action type: {s}")),
        }
    }
}

/// Outcome of an attempted action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionStatus {
    Pending,
    Success,
    Failed,
}

impl ActionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionStatus::Pending => "pending",
            ActionStatus::Success => "success",
            ActionStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ActionStatus::Pending)
    }
}

impl std::fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ActionStatus::Pending),
            "success" => Ok(ActionStatus::Success),
            "failed" => Ok(ActionStatus::Failed),
            _ => Err(format!("unknown action status: {s}")),
        }
    }
}

/// One attempted external action.
///
/// `ts` is the record's key: callers get it back from `log` and hand it to
/// `update` once the outcome is known.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRecord {
    pub ts: DateTime<Utc>,
    #[serde(rename = "type")]
    pub action_type: ActionType,
    pub target: String,
    pub summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<String>,
    pub status: ActionStatus,
}

impl ActionRecord {
    /// Textual form of the key, as printed to callers
    pub fn key(&self) -> String {
        format_key(&self.ts)
    }
}

/// Render an action key with fixed microsecond precision
pub fn format_key(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse an action key previously produced by [`format_key`]
pub fn parse_key(key: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(key.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
