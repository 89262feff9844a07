//! Sentence-aligned text chunking.
//!
//! A sentence ends at a run of terminal punctuation (`.`, `!`, `?`), optionally followed
//! by closing quotes or brackets, when whitespace or the end of input comes next. Text after
//! the last terminator forms a final sentence of its own. Limits bound the number of
//! sentences per chunk, never the character length.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref SENTENCE_END_RE: Regex = Regex::new(r#"[.!?]+["'”’)\]]*(?:\s+|$)"#).unwrap();
}

/// Split text into trimmed sentences, in order.
pub fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;

    for m in SENTENCE_END_RE.find_iter(text) {
        let sentence = text[start..m.end()].trim();
        if !sentence.is_empty() {
            sentences.push(sentence);
        }
        start = m.end();
    }

    let rest = text[start..].trim();
    if !rest.is_empty() {
        sentences.push(rest);
    }

    sentences
}

/// Group consecutive sentences into chunks of at most `max_sentences` sentences.
///
/// Sentences inside a chunk are joined by a single space. A limit of zero is treated as one.
pub fn split(text: &str, max_sentences: usize) -> Vec<String> {
    split_sentences(text)
        .chunks(max_sentences.max(1))
        .map(|group| group.join(" "))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_grouping() {
        let chunks = split("One. Two. Three. Four.", 2);
        assert_eq!(chunks, vec!["One. Two.", "Three. Four."]);
    }

    #[test]
    fn test_last_chunk_may_be_short() {
        let chunks = split("This is one. This is two! Is this three?", 2);
        assert_eq!(chunks, vec!["This is one. This is two!", "Is this three?"]);
    }

    #[test]
    fn test_empty_input() {
        assert!(split("", 3).is_empty());
        assert!(split("   \n\t ", 3).is_empty());
    }

    #[test]
    fn test_trailing_text_without_terminator() {
        assert_eq!(
            split_sentences("First. And then nothing"),
            vec!["First.", "And then nothing"]
        );
    }

    #[test]
    fn test_no_split_inside_tokens() {
        assert_eq!(
            split_sentences("Version 1.5 shipped. See www.example.com for notes."),
            vec!["Version 1.5 shipped.", "See www.example.com for notes."]
        );
    }

    #[test]
    fn test_closing_quotes_stay_with_sentence() {
        assert_eq!(
            split_sentences(r#"He said "stop." Then he left."#),
            vec![r#"He said "stop.""#, "Then he left."]
        );
    }

    #[test]
    fn test_long_sentence_emitted_whole() {
        let long = format!("{}.", "word ".repeat(2_000).trim_end());
        let chunks = split(&long, 1);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0], long);
    }

    #[test]
    fn test_zero_limit_is_one() {
        assert_eq!(split("A. B.", 0), vec!["A.", "B."]);
    }

    #[test]
    fn test_chunk_completeness() {
        let texts = [
            "One. Two. Three. Four. Five. Six. Seven.",
            "Why? Because!  It works...\nNew line here. tail without stop",
            "Single sentence only",
            "a. b. c. d. e. f. g. h. i. j. k.",
        ];

        for text in texts {
            let expected = split_sentences(text);
            for n in 1..=5 {
                let chunks = split(text, n);
                assert_eq!(chunks.len(), expected.len().div_ceil(n), "{text:?} n={n}");

                let mut rejoined = Vec::new();
                for chunk in &chunks {
                    let sentences = split_sentences(chunk);
                    assert!(sentences.len() <= n);
                    rejoined.extend(sentences);
                }
                assert_eq!(rejoined, expected, "{text:?} n={n}");
            }
        }
    }

    #[test]
    fn test_deterministic() {
        let text = "Alpha. Beta. Gamma. Delta.";
        assert_eq!(split(text, 3), split(text, 3));
    }
}
