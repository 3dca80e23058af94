//! Chunking utilities for splitting a document into retrieval passages.
//!
//! Text is split on whitespace and words are packed greedily into passages
//! of at most [`DEFAULT_CHUNK_SIZE`] characters (configurable). A word is
//! never split across two passages, so joining the passages with single
//! spaces reproduces the whitespace-normalized source text.

use serde::Serialize;

/// Default passage budget in characters, separating spaces included.
pub const DEFAULT_CHUNK_SIZE: usize = 512;

/// A passage of text taken from a larger document.
///
/// Produced by [`chunk_text`]. Offsets are byte positions in the text that
/// was chunked, so `&source[p.start_offset..p.end_offset]` covers the
/// passage's words (with their original spacing).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Passage {
    /// Words of the passage joined by single spaces.
    pub text: String,
    /// Zero-based position of the passage within the document.
    pub index: usize,
    /// Byte offset of the passage's first word in the source text.
    pub start_offset: usize,
    /// Byte offset one past the passage's last word in the source text.
    pub end_offset: usize,
    /// Length of `text` in characters.
    pub char_len: usize,
}

impl Passage {
    /// True when the passage is longer than `max_chunk_size`, which only
    /// happens for a single word that does not fit the budget on its own.
    pub fn is_oversized(&self, max_chunk_size: usize) -> bool {
        self.char_len > max_chunk_size
    }
}

/// Split text into passages of at most `max_chunk_size` characters.
///
/// Words are accumulated until adding the next one (plus its separating
/// space) would exceed the budget; the passage is then closed and the next
/// one starts with that word. A word longer than the budget becomes its own
/// oversized passage. Empty or whitespace-only input yields no passages.
///
/// # Examples
///
/// ```
/// use docchat::chunking::chunk_text;
///
/// let passages = chunk_text("the quick brown fox", 10);
/// let texts: Vec<_> = passages.iter().map(|p| p.text.as_str()).collect();
/// assert_eq!(texts, ["the quick", "brown fox"]);
///
/// assert!(chunk_text("   ", 10).is_empty());
/// ```
pub fn chunk_text(text: &str, max_chunk_size: usize) -> Vec<Passage> {
    let base = text.as_ptr() as usize;
    let mut passages = Vec::new();
    let mut current = PassageBuilder::default();

    for word in text.split_whitespace() {
        let start = word.as_ptr() as usize - base;
        let word_chars = word.chars().count();

        if !current.is_empty()
            && current.char_len + 1 + word_chars > max_chunk_size
        {
            passages.push(current.finish(passages.len()));
        }

        current.push(word, word_chars, start);
    }

    if !current.is_empty() {
        passages.push(current.finish(passages.len()));
    }

    passages
}

/// Apply the configured preprocessing before chunking.
pub fn preprocess(text: &str, lowercase: bool) -> String {
    if lowercase {
        text.to_lowercase()
    } else {
        text.to_string()
    }
}

#[derive(Default)]
struct PassageBuilder {
    text: String,
    char_len: usize,
    start_offset: usize,
    end_offset: usize,
}

impl PassageBuilder {
    fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    fn push(&mut self, word: &str, word_chars: usize, start: usize) {
        if self.text.is_empty() {
            self.start_offset = start;
        } else {
            self.text.push(' ');
            self.char_len += 1;
        }
        self.text.push_str(word);
        self.char_len += word_chars;
        self.end_offset = start + word.len();
    }

    fn finish(&mut self, index: usize) -> Passage {
        let builder = std::mem::take(self);
        Passage {
            text: builder.text,
            index,
            start_offset: builder.start_offset,
            end_offset: builder.end_offset,
            char_len: builder.char_len,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(passages: &[Passage]) -> Vec<&str> {
        passages.iter().map(|p| p.text.as_str()).collect()
    }

    #[test]
    fn short_text_single_passage() {
        let passages = chunk_text("Hello, world!", DEFAULT_CHUNK_SIZE);
        assert_eq!(passages.len(), 1);
        assert_eq!(passages[0].text, "Hello, world!");
        assert_eq!(passages[0].index, 0);
        assert_eq!(passages[0].start_offset, 0);
        assert_eq!(passages[0].end_offset, 13);
    }

    #[test]
    fn empty_input_has_no_passages() {
        assert!(chunk_text("", 100).is_empty());
        assert!(chunk_text(" \n\t  ", 100).is_empty());
    }

    #[test]
    fn budget_counts_separating_spaces() {
        // "aaaa bbbb" is exactly 9 characters.
        let passages = chunk_text("aaaa bbbb cccc", 9);
        assert_eq!(texts(&passages), ["aaaa bbbb", "cccc"]);

        let passages = chunk_text("aaaa bbbb cccc", 8);
        assert_eq!(texts(&passages), ["aaaa", "bbbb", "cccc"]);
    }

    #[test]
    fn oversized_word_gets_its_own_passage() {
        let long = "x".repeat(40);
        let text = format!("tiny {long} end");
        let passages = chunk_text(&text, 10);

        assert_eq!(texts(&passages), ["tiny", long.as_str(), "end"]);
        assert!(passages[1].is_oversized(10));
        assert!(!passages[0].is_oversized(10));
    }

    #[test]
    fn zero_budget_splits_every_word() {
        let passages = chunk_text("one two three", 0);
        assert_eq!(texts(&passages), ["one", "two", "three"]);
    }

    #[test]
    fn joining_passages_restores_normalized_text() {
        let text = "  Rust   is a systems\nprogramming language.\n\n\
                    It is fast,  memory-safe\tand fun to write.  ";
        let normalized =
            text.split_whitespace().collect::<Vec<_>>().join(" ");

        for size in [1, 5, 12, 20, 64, 512] {
            let passages = chunk_text(text, size);
            let joined = texts(&passages).join(" ");
            assert_eq!(joined, normalized, "size {size}");

            for p in &passages {
                let single_word = !p.text.contains(' ');
                assert!(
                    p.char_len <= size || single_word,
                    "passage {:?} exceeds {size}",
                    p.text
                );
            }
        }
    }

    #[test]
    fn indexes_are_sequential() {
        let text = "word ".repeat(300);
        let passages = chunk_text(&text, 50);
        assert!(passages.len() > 1);
        for (i, p) in passages.iter().enumerate() {
            assert_eq!(p.index, i);
        }
    }

    #[test]
    fn offsets_point_into_source() {
        let text = "alpha  beta\ngamma delta";
        let passages = chunk_text(text, 11);
        assert_eq!(texts(&passages), ["alpha beta", "gamma delta"]);

        let span = |p: &Passage| &text[p.start_offset..p.end_offset];
        assert_eq!(span(&passages[0]), "alpha  beta");
        assert_eq!(span(&passages[1]), "gamma delta");
    }

    #[test]
    fn deterministic() {
        let text = "The same input always yields the same passages. "
            .repeat(40);
        assert_eq!(chunk_text(&text, 64), chunk_text(&text, 64));
    }

    #[test]
    fn sizes_are_measured_in_characters() {
        // Each word is 4 chars but 8+ bytes.
        let text = "日本語だ 日本語だ 日本語だ";
        let passages = chunk_text(text, 9);
        assert_eq!(texts(&passages), ["日本語だ 日本語だ", "日本語だ"]);
        assert_eq!(passages[0].char_len, 9);
    }

    #[test]
    fn handles_emoji_and_multibyte_chars() {
        let text = "Hello 👉 world 🌍 test ".repeat(100);
        let passages = chunk_text(&text, 40);

        assert!(!passages.is_empty());
        for p in &passages {
            assert!(!p.text.is_empty());
            assert!(p.char_len <= 40);
            assert_eq!(p.char_len, p.text.chars().count());
        }
    }

    #[test]
    fn preprocess_lowercases_when_enabled() {
        assert_eq!(preprocess("Hello World", true), "hello world");
        assert_eq!(preprocess("Hello World", false), "Hello World");
    }
}
