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

//! Keeper memory pipeline
//!
//! The moving parts that keep an agent's history safe across context
//! compaction:
//!
//! - [`Ingestor`]: copies runtime history snapshots into the event log once
//! - [`Aggregator`]: folds the event log into hourly summary documents
//! - [`RecoveryAssembler`]: builds the token-bounded recovery payload
//! - [`NotesIndexer`]: condenses the long-term notes into a categorized index
//!
//! ```no_run
//! use keeper_core::KeeperConfig;
//! use keeper_memory::RecoveryAssembler;
//!
//! let workspace = keeper_core::default_workspace();
//! let config = KeeperConfig::load(&workspace)?;
//! let assembler = RecoveryAssembler::new(config.layout(&workspace), &config);
//! let payload = assembler.assemble_default(None, chrono::Utc::now())?;
//! println!("{}", payload.render());
//! # Ok::<(), keeper_core::KeeperError>(())
//! ```

pub mod aggregate;
pub mod ingest;
pub mod notes_index;
pub mod recovery;
pub mod snapshot;

pub use aggregate::{AggregateReport, Aggregator, DayState, HourSummary, Summarizer};
pub use ingest::{IngestMode, IngestReport, Ingestor, SessionReport};
pub use notes_index::{IndexReport, NoteCategory, NotesIndex, NotesIndexer, INDEX_CHAR_TARGET};
pub use recovery::{BlockSource, CandidateBlock, PayloadBlock, RecoveryAssembler, RecoveryPayload};
