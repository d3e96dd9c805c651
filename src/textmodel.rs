//! Sentence/word tokenisation shared by the storage-node write-transaction
//! protocol and its tests.
//!
//! A sentence is a maximal run of non-delimiter text ending in one of
//! `.`, `!`, `?` (the delimiter is retained as the sentence's terminal
//! token); a trailing run with no terminating delimiter is still returned as
//! a (non-terminated) final sentence so editors can always address it. A
//! word is a whitespace-separated token within a sentence; each delimiter is
//! itself a one-character word.

/// The three sentence-terminating characters recognised by the protocol.
pub const DELIMITERS: [char; 3] = ['.', '!', '?'];

pub fn is_delimiter(c: char) -> bool {
    DELIMITERS.contains(&c)
}

/// A word token is a delimiter token iff it is exactly one of the
/// terminating characters.
pub fn is_delimiter_token(word: &str) -> bool {
    let mut chars = word.chars();
    matches!((chars.next(), chars.next()), (Some(c), None) if is_delimiter(c))
}

/// Splits `text` into sentences. The partition is exact: concatenating the
/// result always reproduces `text` byte-for-byte, including a
/// non-terminated trailing remainder when `text` does not end in a
/// delimiter.
pub fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut start = 0;
    for (i, c) in text.char_indices() {
        if is_delimiter(c) {
            sentences.push(text[start..i + c.len_utf8()].to_string());
            start = i + c.len_utf8();
        }
    }
    if start < text.len() {
        sentences.push(text[start..].to_string());
    }
    sentences
}

/// Reassembles sentences produced by [`split_sentences`]. Exact inverse:
/// plain concatenation, since each sentence already carries its own
/// delimiter (and any inter-sentence whitespace belongs to the following
/// sentence's leading run).
pub fn join_sentences(sentences: &[String]) -> String {
    sentences.concat()
}

/// True when `sentence`'s last non-whitespace character is a delimiter.
/// Used by the write-transaction append rule (spec §4.3 step 3): appending a
/// brand new sentence at `index == num_sentences` is only legal when the
/// file is empty or the current last sentence is already terminated.
pub fn ends_with_delimiter(sentence: &str) -> bool {
    sentence.chars().rev().find(|c| !c.is_whitespace()).is_some_and(is_delimiter)
}

/// Splits a sentence into words. Whitespace runs separate words; each
/// delimiter character is emitted as its own one-character word even when
/// directly adjacent to the preceding word (no whitespace required).
pub fn split_words(sentence: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    for c in sentence.chars() {
        if is_delimiter(c) {
            if !current.is_empty() {
                words.push(std::mem::take(&mut current));
            }
            words.push(c.to_string());
        } else if c.is_whitespace() {
            if !current.is_empty() {
                words.push(std::mem::take(&mut current));
            }
        } else {
            current.push(c);
        }
    }
    if !current.is_empty() {
        words.push(current);
    }
    words
}

/// A sentence's leading whitespace run, the part [`split_words`] discards
/// and [`join_words`] never reinstates. A write transaction must capture
/// this separately before tokenising and splice it back in on commit, or
/// every non-first sentence silently loses the whitespace that joins it to
/// its predecessor.
pub fn leading_whitespace(sentence: &str) -> &str {
    let end = sentence.find(|c: char| !c.is_whitespace()).unwrap_or(sentence.len());
    &sentence[..end]
}

/// Rejoins words produced by [`split_words`]: a single space between
/// adjacent non-delimiter words, no space before a delimiter token, nothing
/// before the first word.
pub fn join_words(words: &[String]) -> String {
    let mut out = String::new();
    for word in words {
        if out.is_empty() || is_delimiter_token(word) {
            out.push_str(word);
        } else {
            out.push(' ');
            out.push_str(word);
        }
    }
    out
}

/// Canonical form of a sentence: whitespace runs collapsed to a single
/// space, no space retained before a delimiter. Independent of
/// [`split_words`]/[`join_words`] so tests can cross-check the round trip
/// rather than relying on a tautology.
pub fn canonical_sentence(sentence: &str) -> String {
    join_words(&split_words(sentence))
}

/// Inserts `new_words` at `word_index` within `words`, shifting the tail.
/// Caller is responsible for validating `word_index <= words.len()`.
pub fn insert_words(words: &mut Vec<String>, word_index: usize, new_words: Vec<String>) {
    words.splice(word_index..word_index, new_words);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentence_split_join_round_trips_arbitrary_text() {
        let samples = [
            "Hello world.",
            "A. B. C.",
            "No terminator here",
            "",
            "Trailing partial after done. still going",
            "Multiple!!! delimiters??.",
        ];
        for s in samples {
            let sentences = split_sentences(s);
            assert_eq!(join_sentences(&sentences), s);
        }
    }

    #[test]
    fn word_split_join_matches_canonical_form() {
        let samples = ["Hello world.", "A   big   gap!", "NoSpaceBeforeDot.", "just one"];
        for s in samples {
            let words = split_words(s);
            assert_eq!(join_words(&words), canonical_sentence(s));
        }
    }

    #[test]
    fn delimiter_is_its_own_word() {
        let words = split_words("Hello world.");
        assert_eq!(words, vec!["Hello", "world", "."]);
    }

    #[test]
    fn ends_with_delimiter_detects_trailing_punctuation() {
        assert!(ends_with_delimiter("Roses."));
        assert!(!ends_with_delimiter("Roses"));
        assert!(ends_with_delimiter("Roses. "));
    }

    #[test]
    fn leading_whitespace_isolates_the_separator_split_words_drops() {
        let sentences = split_sentences("A. B. C.");
        assert_eq!(leading_whitespace(&sentences[0]), "");
        assert_eq!(leading_whitespace(&sentences[1]), " ");
        assert_eq!(leading_whitespace(&sentences[2]), " ");
    }

    #[test]
    fn insert_words_shifts_tail() {
        let mut words = vec!["A".to_string(), "B".to_string(), ".".to_string()];
        insert_words(&mut words, 1, vec!["very".to_string()]);
        assert_eq!(words, vec!["A", "very", "B", "."]);
    }
}
