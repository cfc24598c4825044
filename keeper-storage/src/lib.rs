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

//! Keeper storage layer
//!
//! File-backed stores under the agent workspace:
//!
//! - [`WatermarkStore`]: per-session ingestion cursor
//! - [`EventLog`]: date-partitioned append-only turn log
//! - [`ActionLedger`]: external action ledger with windowed dedup
//!
//! All writers serialize through advisory lock files ([`FileLock`]) so that
//! concurrent invocations of the tooling never interleave writes.

pub mod action_ledger;
pub mod event_log;
pub mod jsonl;
pub mod lock;
pub mod watermark;

pub use action_ledger::{ActionLedger, UpdateOutcome};
pub use event_log::{AppendOutcome, DayLog, EventLog};
pub use jsonl::{append_lines, atomic_write, read_lines, CorruptLine, JsonLines};
pub use lock::FileLock;
pub use watermark::WatermarkStore;
