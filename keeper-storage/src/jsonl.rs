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

//! Newline-delimited JSON files
//!
//! Appends are a single `write_all` on an `O_APPEND` handle so concurrent
//! appenders never interleave partial lines. Rewrites go through a temp file
//! and a rename so readers see either the old or the new file.

use keeper_core::{KeeperError, KeeperResult};
use serde::de::DeserializeOwned;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// A line that failed to parse
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorruptLine {
    /// 1-based physical line number
    pub line: usize,
    pub reason: String,
}

/// Parsed contents of a JSONL file
#[derive(Debug, Clone)]
pub struct JsonLines<T> {
    pub path: PathBuf,
    /// Parsed records with their 1-based line numbers
    pub records: Vec<(usize, T)>,
    pub corrupt: Vec<CorruptLine>,
    /// Physical lines in the file, blank and corrupt ones included
    pub line_count: usize,
}

impl<T> JsonLines<T> {
    /// Fail on the first corrupt line instead of skipping it
    pub fn strict(self) -> KeeperResult<Vec<(usize, T)>> {
        match self.corrupt.into_iter().next() {
            Some(bad) => Err(KeeperError::corrupt(self.path, bad.line, bad.reason)),
            None => Ok(self.records),
        }
    }

    /// Log every corrupt line and keep the rest
    pub fn report_corrupt(&self) {
        for bad in &self.corrupt {
            tracing::warn!(
                "Skipping corrupt line {} in {}: {}",
                bad.line,
                self.path.display(),
                bad.reason
            );
        }
    }
}

/// Read and parse every line of `path`; a missing file reads as empty
pub fn read_lines<T: DeserializeOwned>(path: &Path) -> KeeperResult<JsonLines<T>> {
    let content = read_to_string_if_exists(path)?;
    Ok(parse_lines(path, &content))
}

/// Parse JSONL text already in memory
pub fn parse_lines<T: DeserializeOwned>(path: &Path, content: &str) -> JsonLines<T> {
    let mut records = Vec::new();
    let mut corrupt = Vec::new();
    let mut line_count = 0;

    for (idx, line) in content.lines().enumerate() {
        line_count = idx + 1;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        match serde_json::from_str::<T>(trimmed) {
            Ok(value) => records.push((idx + 1, value)),
            Err(e) => corrupt.push(CorruptLine {
                line: idx + 1,
                reason: e.to_string(),
            }),
        }
    }

    JsonLines {
        path: path.to_path_buf(),
        records,
        corrupt,
        line_count,
    }
}

/// File content, or an empty string when the file does not exist
pub fn read_to_string_if_exists(path: &Path) -> KeeperResult<String> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(content),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
        Err(e) => Err(e.into()),
    }
}

/// Append already-serialized lines with one write.
///
/// If the file does not end in a newline (an earlier writer died mid-line)
/// the write starts with one, leaving the torn line isolated.
pub fn append_lines(path: &Path, lines: &[String]) -> KeeperResult<()> {
    if lines.is_empty() {
        return Ok(());
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut file = OpenOptions::new()
        .read(true)
        .append(true)
        .create(true)
        .open(path)?;

    let mut buf = String::new();
    if !ends_with_newline(&mut file)? {
        buf.push('\n');
    }
    for line in lines {
        buf.push_str(line);
        buf.push('\n');
    }

    file.write_all(buf.as_bytes())?;
    file.sync_data()?;
    Ok(())
}

/// Replace `path` with `content` via temp file + rename
pub fn atomic_write(path: &Path, content: &[u8]) -> KeeperResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut tmp_name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);

    {
        let mut file = File::create(&tmp_path)?;
        file.write_all(content)?;
        file.sync_all()?;
    }

    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

fn ends_with_newline(file: &mut File) -> KeeperResult<bool> {
    let len = file.metadata()?.len();
    if len == 0 {
        return Ok(true);
    }
    file.seek(SeekFrom::Start(len - 1))?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last)?;
    Ok(last[0] == b'\n')
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::tempdir;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Row {
        n: u32,
    }

    #[test]
    fn test_append_and_read() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("logs").join("rows.jsonl");

        append_lines(&path, &[r#"{"n":1}"#.to_string(), r#"{"n":2}"#.to_string()]).unwrap();
        append_lines(&path, &[r#"{"n":3}"#.to_string()]).unwrap();

        let parsed = read_lines::<Row>(&path).unwrap();
        assert_eq!(parsed.line_count, 3);
        assert_eq!(parsed.records[2], (3, Row { n: 3 }));
        assert!(parsed.corrupt.is_empty());
    }

    #[test]
    fn test_torn_line_is_isolated() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("rows.jsonl");
        std::fs::write(&path, "{\"n\":1}\n{\"n\":").unwrap();

        append_lines(&path, &[r#"{"n":2}"#.to_string()]).unwrap();

        let parsed = read_lines::<Row>(&path).unwrap();
        assert_eq!(parsed.records.len(), 2);
        assert_eq!(parsed.corrupt.len(), 1);
        assert_eq!(parsed.corrupt[0].line, 2);

        let err = parsed.strict().unwrap_err();
        assert!(matches!(err, KeeperError::CorruptRecord { line: 2, .. }));
    }

    #[test]
    fn test_missing_file_reads_empty() {
        let dir = tempdir().unwrap();
        let parsed = read_lines::<Row>(&dir.path().join("absent.jsonl")).unwrap();
        assert_eq!(parsed.line_count, 0);
        assert!(parsed.records.is_empty());
    }

    #[test]
    fn test_atomic_write_replaces() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        atomic_write(&path, b"one").unwrap();
        atomic_write(&path, b"two").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "two");
        assert!(!dir.path().join("state.json.tmp").exists());
    }
}
