//! # Paragraph Formatting
//!
//! Segments corrected transcript text into readable paragraphs. Speech
//! engines emit one unbroken wall of text; this pass splits it on sentence
//! boundaries and groups sentences using discourse cues and size limits.
//!
//! Pure function of its input; no shared state.

/// Lexical cues that usually open a new line of thought. A sentence starting
/// with one of these begins a new paragraph.
const DISCOURSE_MARKERS: &[&str] = &[
    "however",
    "therefore",
    "furthermore",
    "moreover",
    "meanwhile",
    "nevertheless",
    "consequently",
    "finally",
    "in summary",
    "in conclusion",
    "on the other hand",
    "for example",
    "in addition",
    "as a result",
];

/// Question openers also start a new paragraph.
const QUESTION_WORDS: &[&str] = &["who", "what", "when", "where", "why", "how", "which"];

/// A paragraph closes once it reaches this many sentences.
const MAX_SENTENCES_PER_PARAGRAPH: usize = 5;

/// A paragraph closes once it reaches this many characters.
const MAX_CHARS_PER_PARAGRAPH: usize = 500;

/// Group the sentences of `text` into paragraphs separated by blank lines.
///
/// A new paragraph starts when a sentence opens with a discourse marker or
/// question word, or when the running paragraph already holds
/// `MAX_SENTENCES_PER_PARAGRAPH` sentences or `MAX_CHARS_PER_PARAGRAPH`
/// characters.
pub fn format_paragraphs(text: &str) -> String {
    let sentences = split_sentences(text);
    if sentences.is_empty() {
        return String::new();
    }

    let mut paragraphs: Vec<String> = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut current_chars = 0usize;

    for sentence in &sentences {
        let should_break = !current.is_empty()
            && (starts_new_thought(sentence)
                || current.len() >= MAX_SENTENCES_PER_PARAGRAPH
                || current_chars >= MAX_CHARS_PER_PARAGRAPH);

        if should_break {
            paragraphs.push(current.join(" "));
            current.clear();
            current_chars = 0;
        }

        current_chars += sentence.len();
        current.push(sentence);
    }

    if !current.is_empty() {
        paragraphs.push(current.join(" "));
    }

    paragraphs.join("\n\n")
}

/// Split text into trimmed sentences, keeping the terminal punctuation.
fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;

    for (i, c) in text.char_indices() {
        if matches!(c, '.' | '!' | '?') {
            let end = i + c.len_utf8();
            let sentence = text[start..end].trim();
            if !sentence.is_empty() {
                sentences.push(sentence);
            }
            start = end;
        }
    }

    let tail = text[start..].trim();
    if !tail.is_empty() {
        sentences.push(tail);
    }

    sentences
}

/// Whether a sentence opens with a discourse marker or question word.
fn starts_new_thought(sentence: &str) -> bool {
    let lowered = sentence.to_lowercase();

    for marker in DISCOURSE_MARKERS {
        if let Some(rest) = lowered.strip_prefix(marker) {
            // Must be a whole-word prefix: "however," yes, "howevermore" no.
            if rest.is_empty() || rest.starts_with([' ', ',', '.', '!', '?', ';', ':']) {
                return true;
            }
        }
    }

    let first_word = lowered
        .split(|c: char| !c.is_alphanumeric())
        .next()
        .unwrap_or("");
    QUESTION_WORDS.contains(&first_word)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_text_stays_single_paragraph() {
        let text = "The talk began at dawn. Everyone sat quietly.";
        let formatted = format_paragraphs(text);
        assert_eq!(formatted, "The talk began at dawn. Everyone sat quietly.");
    }

    #[test]
    fn test_discourse_marker_starts_paragraph() {
        let text = "The practice is simple. However, simple is not easy.";
        let formatted = format_paragraphs(text);
        assert_eq!(
            formatted,
            "The practice is simple.\n\nHowever, simple is not easy."
        );
    }

    #[test]
    fn test_question_word_starts_paragraph() {
        let text = "We sat for an hour. What is the mind doing in that time?";
        let formatted = format_paragraphs(text);
        assert!(formatted.contains("\n\nWhat is the mind doing"));
    }

    #[test]
    fn test_marker_must_be_whole_word() {
        let text = "He spoke first. Howeverish words followed after that.";
        let formatted = format_paragraphs(text);
        assert!(!formatted.contains("\n\n"));
    }

    #[test]
    fn test_sentence_count_limit() {
        let text = "One. Two. Three. Four. Five. Six. Seven.";
        let formatted = format_paragraphs(text);
        let paragraphs: Vec<&str> = formatted.split("\n\n").collect();
        assert_eq!(paragraphs.len(), 2);
        assert_eq!(paragraphs[0], "One. Two. Three. Four. Five.");
        assert_eq!(paragraphs[1], "Six. Seven.");
    }

    #[test]
    fn test_character_limit() {
        let long_sentence = format!("{}.", "word ".repeat(120).trim());
        assert!(long_sentence.len() >= 500);
        let text = format!("{} And a short one after. And another.", long_sentence);
        let formatted = format_paragraphs(&text);
        let paragraphs: Vec<&str> = formatted.split("\n\n").collect();
        assert_eq!(paragraphs.len(), 2);
        assert!(paragraphs[1].starts_with("And a short one after."));
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(format_paragraphs(""), "");
        assert_eq!(format_paragraphs("   "), "");
    }

    #[test]
    fn test_no_terminal_punctuation() {
        let formatted = format_paragraphs("a fragment without an ending");
        assert_eq!(formatted, "a fragment without an ending");
    }
}
