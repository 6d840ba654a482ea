//! Overlapping fixed-window text chunker.
//!
//! Splits extracted document text into [`Chunk`]s of at most `chunk_size`
//! characters, with consecutive windows sharing up to `overlap`
//! characters so a sentence cut at one boundary still appears whole in a
//! neighbour.
//!
//! # Algorithm
//!
//! 1. Open a window of `chunk_size` characters at `start`.
//! 2. If the window stops short of the end of the text, pull its end back
//!    to the last space inside it, but only when that space lies past the
//!    window's midpoint (so a word is not cut, and windows do not collapse).
//! 3. Trim surrounding whitespace; drop the window if nothing remains.
//! 4. Start the next window `overlap` characters before this one's end,
//!    or stop if this window reached the end of the text.
//!
//! All positions are in characters, so multi-byte text never splits inside
//! a code point.
//!
//! # Example
//!
//! ```rust
//! use knowledgeops_core::chunk::chunk_text;
//!
//! let chunks = chunk_text("alpha beta gamma delta", 12, 4).unwrap();
//! assert_eq!(chunks[0].text, "alpha beta");
//! assert!(chunks.iter().all(|c| c.char_count <= 12));
//! ```

use thiserror::Error;

use crate::models::Chunk;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChunkError {
    #[error("chunk_size ({chunk_size}) must be greater than overlap ({overlap})")]
    InvalidWindow { chunk_size: usize, overlap: usize },
}

/// Split `text` into overlapping windows.
///
/// Empty or whitespace-only input yields no chunks. Chunk indices are
/// contiguous from 0, `start_pos` never decreases, and every
/// non-whitespace character of `text` lies in at least one chunk.
///
/// # Errors
///
/// [`ChunkError::InvalidWindow`] when `chunk_size <= overlap`.
pub fn chunk_text(text: &str, chunk_size: usize, overlap: usize) -> Result<Vec<Chunk>, ChunkError> {
    if chunk_size <= overlap {
        return Err(ChunkError::InvalidWindow {
            chunk_size,
            overlap,
        });
    }

    let chars: Vec<char> = text.chars().collect();
    let len = chars.len();
    let mut chunks = Vec::new();
    let mut start = 0usize;

    while start < len {
        let mut end = (start + chunk_size).min(len);

        if end < len {
            if let Some(space) = chars[start..end].iter().rposition(|&c| c == ' ') {
                let boundary = start + space;
                if boundary > start + chunk_size / 2 {
                    end = boundary;
                }
            }
        }

        if let Some((lo, hi)) = trimmed_span(&chars, start, end) {
            chunks.push(make_chunk(chunks.len(), &chars, lo, hi));
        }

        if end >= len {
            break;
        }
        // A window shrunk to a word boundary may be no longer than the
        // overlap; always move forward by at least one character.
        start = end.saturating_sub(overlap).max(start + 1);
    }

    Ok(chunks)
}

/// Narrow `[start, end)` to exclude leading and trailing whitespace.
fn trimmed_span(chars: &[char], start: usize, end: usize) -> Option<(usize, usize)> {
    let window = &chars[start..end];
    let lo = window.iter().position(|c| !c.is_whitespace())?;
    let hi = window.iter().rposition(|c| !c.is_whitespace())? + 1;
    Some((start + lo, start + hi))
}

fn make_chunk(index: usize, chars: &[char], lo: usize, hi: usize) -> Chunk {
    let text: String = chars[lo..hi].iter().collect();
    Chunk {
        index,
        start_pos: lo,
        end_pos: hi,
        char_count: hi - lo,
        word_count: text.split_whitespace().count(),
        text,
    }
}
