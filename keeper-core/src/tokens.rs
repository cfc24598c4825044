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

//! Token estimation utilities.
//!
//! Tokens are approximated from character counts (about 4 characters per
//! token). Truncation helpers guarantee that the returned text estimates at or
//! under the requested budget, marker included.

/// Appended (or prepended) to text clipped to fit a budget.
pub const TRUNCATION_MARKER: &str = "[truncated]";

/// Token calculator for estimating text token counts.
#[derive(Debug, Clone, Copy)]
pub struct TokenCalculator {
    /// Average characters per token (approximately 4 for English text).
    chars_per_token: usize,
}

impl Default for TokenCalculator {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenCalculator {
    /// Create a new token calculator with default settings.
    pub fn new() -> Self {
        Self { chars_per_token: 4 }
    }

    /// Estimate the number of tokens in a string.
    pub fn estimate(&self, text: &str) -> usize {
        text.chars().count().div_ceil(self.chars_per_token)
    }

    /// Check if text fits within a token budget.
    pub fn fits_budget(&self, text: &str, budget: usize) -> bool {
        self.estimate(text) <= budget
    }

    /// Keep the beginning of `text`, cutting at a line break when one is close.
    pub fn truncate_head(&self, text: &str, budget: usize) -> String {
        if self.fits_budget(text, budget) {
            return text.to_string();
        }
        let char_limit = budget * self.chars_per_token;
        let marker = format!("\n{}", TRUNCATION_MARKER);
        let marker_chars = marker.chars().count();
        if char_limit <= marker_chars {
            return text.chars().take(char_limit).collect();
        }

        let keep = char_limit - marker_chars;
        let head: String = text.chars().take(keep).collect();
        let head = match head.rfind('\n') {
            Some(pos) if head[..pos].chars().count() * 2 >= keep => head[..pos].to_string(),
            _ => head,
        };
        format!("{}{}", head, marker)
    }

    /// Keep the end of `text`, cutting at a line break when one is close.
    pub fn truncate_tail(&self, text: &str, budget: usize) -> String {
        if self.fits_budget(text, budget) {
            return text.to_string();
        }
        let char_limit = budget * self.chars_per_token;
        let marker = format!("{}\n", TRUNCATION_MARKER);
        let marker_chars = marker.chars().count();
        let total = text.chars().count();
        if char_limit <= marker_chars {
            return text.chars().skip(total - char_limit).collect();
        }

        let keep = char_limit - marker_chars;
        let tail: String = text.chars().skip(total - keep).collect();
        let tail = match tail.find('\n') {
            Some(pos) if tail[pos + 1..].chars().count() * 2 >= keep => tail[pos + 1..].to_string(),
            _ => tail,
        };
        format!("{}{}", marker, tail)
    }
}
