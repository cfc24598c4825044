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

//! Error types shared by every keeper crate

use std::path::PathBuf;
use thiserror::Error;

/// Result type for keeper operations
pub type KeeperResult<T> = Result<T, KeeperError>;

/// Errors that can occur while reading or mutating workspace state
#[derive(Debug, Error)]
pub enum KeeperError {
    /// A watermark would move backward
    #[error("Watermark regression for {session_key}: current {current}, attempted {attempted}")]
    Regression {
        session_key: String,
        current: u64,
        attempted: u64,
    },

    /// Another invocation held a lock past the configured wait
    #[error("Timed out after {waited_ms}ms waiting for lock {}", path.display())]
    LockTimeout { path: PathBuf, waited_ms: u64 },

    /// A stored line could not be parsed
    #[error("Corrupt record in {} at line {line}: {reason}", path.display())]
    CorruptRecord {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    /// No action record carries the requested key
    #[error("Action record not found: {0}")]
    RecordNotFound(String),

    /// Status may only move pending -> success | failed
    #[error("Invalid status transition for {key}: {from} -> {to}")]
    InvalidTransition {
        key: String,
        from: String,
        to: String,
    },

    /// The external history snapshot could not be interpreted
    #[error("Invalid snapshot: {0}")]
    InvalidSnapshot(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for KeeperError {
    fn from(e: serde_json::Error) -> Self {
        KeeperError::Serialization(e.to_string())
    }
}

impl KeeperError {
    /// Build a corrupt-record error for a 1-based line number
    pub fn corrupt(path: impl Into<PathBuf>, line: usize, reason: impl ToString) -> Self {
        KeeperError::CorruptRecord {
            path: path.into(),
            line,
            reason: reason.to_string(),
        }
    }
}
