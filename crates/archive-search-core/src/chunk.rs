//! Paragraph- and sentence-boundary text chunker with overlapping windows.
//!
//! Splits one narrative field into ordered [`TextChunk`]s of at most
//! `max_chars` characters. Lengths are measured after [`normalize_text`],
//! so formatting noise in stored text (literal `\n` escapes, tab runs,
//! stray control characters) never changes where chunks break.
//!
//! # Algorithm
//!
//! 1. Decode literal escape sequences and split on blank lines.
//! 2. Normalize each paragraph (strip control characters, collapse
//!    whitespace).
//! 3. Pack paragraphs greedily into a buffer until the next one would
//!    exceed `max_chars`.
//! 4. A paragraph over `max_chars` is split into sentences, which are
//!    packed the same way.
//! 5. A sentence over `max_chars` is cut into windows of `max_chars` with
//!    `overlap_chars` of shared context between neighbours.
//!
//! Empty input yields no chunks. A chunk without a single letter or digit
//! (separator lines such as `---` or `* * *`) carries nothing retrievable
//! and is dropped before ordinals are assigned.
//!
//! # Example
//!
//! ```rust
//! use archive_search_core::chunk::{chunk_text, ChunkingConfig};
//!
//! let cfg = ChunkingConfig { max_chars: 800, overlap_chars: 100 };
//! let chunks = chunk_text("It hums.\n\nIt is cold to the touch.", &cfg);
//! assert_eq!(chunks.len(), 1);
//! assert_eq!(chunks[0].text, "It hums. It is cold to the touch.");
//! ```

use serde::Deserialize;

use crate::error::{Result, RetrievalError};

/// Chunk size budget, in characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct ChunkingConfig {
    pub max_chars: usize,
    #[serde(default)]
    pub overlap_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chars: 800,
            overlap_chars: 100,
        }
    }
}

impl ChunkingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_chars == 0 {
            return Err(RetrievalError::InvalidChunk(
                "chunking.max_chars must be > 0".to_string(),
            ));
        }
        if self.overlap_chars >= self.max_chars {
            return Err(RetrievalError::InvalidChunk(format!(
                "chunking.overlap_chars ({}) must be smaller than max_chars ({})",
                self.overlap_chars, self.max_chars
            )));
        }
        Ok(())
    }
}

/// One segment of a narrative field, before embedding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
    pub ordinal: i64,
    pub text: String,
}

/// Collapse whitespace runs to one space, drop control characters, trim.
///
/// Literal two-character escapes (`\n`, `\r`, `\t`) count as whitespace.
pub fn normalize_text(text: &str) -> String {
    let decoded = decode_escapes(text);
    let mut out = String::with_capacity(decoded.len());
    let mut pending_space = false;
    for c in decoded.chars() {
        if c.is_whitespace() {
            pending_space = true;
        } else if c.is_control() {
            continue;
        } else {
            if pending_space && !out.is_empty() {
                out.push(' ');
            }
            pending_space = false;
            out.push(c);
        }
    }
    out
}

fn decode_escapes(text: &str) -> String {
    text.replace("\\r\\n", "\n")
        .replace("\\n", "\n")
        .replace("\\r", "\n")
        .replace("\\t", " ")
        .replace("\r\n", "\n")
        .replace('\r', "\n")
}

fn split_paragraphs(text: &str) -> Vec<String> {
    let decoded = decode_escapes(text);
    let mut paragraphs = Vec::new();
    let mut current = String::new();
    for line in decoded.split('\n') {
        if line.trim().is_empty() {
            if !current.is_empty() {
                paragraphs.push(std::mem::take(&mut current));
            }
            continue;
        }
        current.push_str(line);
        current.push('\n');
    }
    if !current.is_empty() {
        paragraphs.push(current);
    }
    paragraphs
        .iter()
        .map(|p| normalize_text(p))
        .filter(|p| !p.is_empty())
        .collect()
}

/// Split normalized text after `.`, `!` or `?` followed by a space.
fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut prev_terminal = false;
    for (i, c) in text.char_indices() {
        if c == ' ' && prev_terminal {
            let sentence = text[start..i].trim();
            if !sentence.is_empty() {
                sentences.push(sentence);
            }
            start = i + 1;
        }
        prev_terminal = matches!(c, '.' | '!' | '?');
    }
    let tail = text[start..].trim();
    if !tail.is_empty() {
        sentences.push(tail);
    }
    sentences
}

/// Cut `text` into overlapping windows of at most `max` characters.
fn split_windows(text: &str, max: usize, overlap: usize) -> Vec<String> {
    let chars: Vec<(usize, char)> = text.char_indices().collect();
    let n = chars.len();
    let byte_at = |i: usize| if i < n { chars[i].0 } else { text.len() };

    let mut windows = Vec::new();
    let mut start = 0;
    while start < n {
        let hard_end = (start + max).min(n);
        let mut end = hard_end;
        if hard_end < n {
            // Break before the last space that still leaves room for overlap.
            if let Some(pos) = (start + overlap + 1..hard_end)
                .rev()
                .find(|&i| chars[i].1 == ' ')
            {
                end = pos;
            }
        }

        let piece = text[byte_at(start)..byte_at(end)].trim();
        if !piece.is_empty() {
            windows.push(piece.to_string());
        }
        if end >= n {
            break;
        }

        let mut next = end.saturating_sub(overlap).max(start + 1);
        if let Some(pos) = (next..end).find(|&i| chars[i].1 == ' ') {
            if pos + 1 < end {
                next = pos + 1;
            }
        }
        start = next;
    }
    windows
}

struct Packer {
    max_chars: usize,
    buf: String,
    buf_chars: usize,
    out: Vec<String>,
}

impl Packer {
    fn push_unit(&mut self, unit: &str) {
        let unit_chars = unit.chars().count();
        let would_be = if self.buf.is_empty() {
            unit_chars
        } else {
            self.buf_chars + 1 + unit_chars
        };
        if would_be > self.max_chars {
            self.flush();
        }
        if !self.buf.is_empty() {
            self.buf.push(' ');
            self.buf_chars += 1;
        }
        self.buf.push_str(unit);
        self.buf_chars += unit_chars;
    }

    fn push_whole(&mut self, piece: String) {
        self.flush();
        self.out.push(piece);
    }

    fn flush(&mut self) {
        if !self.buf.is_empty() {
            self.out.push(std::mem::take(&mut self.buf));
            self.buf_chars = 0;
        }
    }
}

/// Split one narrative field into chunks.
///
/// # Guarantees
///
/// - Ordinals are contiguous: `0, 1, …, N-1`.
/// - No chunk is empty and none exceeds `max_chars` characters.
/// - Every chunk contains at least one letter or digit.
/// - Identical `(text, config)` always yields an identical sequence.
pub fn chunk_text(text: &str, config: &ChunkingConfig) -> Vec<TextChunk> {
    let max = config.max_chars.max(1);
    let overlap = config.overlap_chars.min(max - 1);

    let mut packer = Packer {
        max_chars: max,
        buf: String::new(),
        buf_chars: 0,
        out: Vec::new(),
    };

    for para in split_paragraphs(text) {
        if para.chars().count() <= max {
            packer.push_unit(&para);
            continue;
        }

        packer.flush();
        for sentence in split_sentences(&para) {
            if sentence.chars().count() <= max {
                packer.push_unit(sentence);
            } else {
                for window in split_windows(sentence, max, overlap) {
                    packer.push_whole(window);
                }
            }
        }
        packer.flush();
    }
    packer.flush();

    packer
        .out
        .into_iter()
        .filter(|text| text.chars().any(char::is_alphanumeric))
        .enumerate()
        .map(|(i, text)| TextChunk {
            ordinal: i as i64,
            text,
        })
        .collect()
}
