//! Text normalization for speech output.
//!
//! LLM replies arrive as markdown; speaking markers aloud ("asterisk
//! asterisk") ruins the voice experience, so replies pass through
//! [`normalize_voice_text`] before synthesis. Long replies are then split
//! into sentence-sized chunks with [`split_into_chunks`] — streaming TTS
//! vendors handle short inputs more reliably, and the first chunk's audio
//! reaches the client sooner.

/// Maximum character length per TTS chunk (roughly 2-3 sentences).
const MAX_CHUNK_CHARS: usize = 400;

/// Strip markdown formatting, producing plain text suitable for TTS.
///
/// Handles fenced code blocks (replaced with "Code omitted."), inline code,
/// headers, emphasis, strikethrough, links and images, list markers,
/// blockquotes, horizontal rules, and HTML tags.
#[must_use]
pub fn normalize_voice_text(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut in_code_block = false;
    let mut code_block_replaced = false;

    for line in text.lines() {
        let trimmed = line.trim();

        if trimmed.starts_with("```") {
            in_code_block = !in_code_block;
            code_block_replaced = false;
            continue;
        }
        if in_code_block {
            if !code_block_replaced {
                push_word(&mut result, "Code omitted.");
                code_block_replaced = true;
            }
            continue;
        }

        if is_horizontal_rule(trimmed) {
            continue;
        }

        let processed = strip_line_markdown(line);
        let processed = processed.trim();
        if !processed.is_empty() {
            push_word(&mut result, processed);
        }
    }

    collapse_whitespace(&result)
}

/// Split normalized text into TTS-friendly chunks at sentence boundaries.
///
/// Each chunk is at most [`MAX_CHUNK_CHARS`] characters; short sentences
/// are merged up to the limit, and a single oversized sentence is split at
/// whitespace rather than mid-word.
#[must_use]
pub fn split_into_chunks(text: &str) -> Vec<String> {
    let text = text.trim();
    if text.is_empty() {
        return Vec::new();
    }
    if text.len() <= MAX_CHUNK_CHARS {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut current = String::new();
    for sentence in split_sentences(text) {
        if sentence.is_empty() {
            continue;
        }
        if sentence.len() > MAX_CHUNK_CHARS {
            if !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
            }
            chunks.extend(split_at_whitespace(sentence));
            continue;
        }
        if !current.is_empty() && current.len() + 1 + sentence.len() > MAX_CHUNK_CHARS {
            chunks.push(std::mem::take(&mut current));
        }
        push_word(&mut current, sentence);
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// Split at sentence-ending punctuation followed by whitespace.
fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut prev_was_terminal = false;
    for (i, c) in text.char_indices() {
        if prev_was_terminal && c.is_whitespace() {
            sentences.push(text[start..i].trim());
            start = i;
        }
        prev_was_terminal = matches!(c, '.' | '!' | '?');
    }
    let tail = text[start..].trim();
    if !tail.is_empty() {
        sentences.push(tail);
    }
    sentences
}

/// Last-resort split for a single overlong sentence.
fn split_at_whitespace(sentence: &str) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    for word in sentence.split_whitespace() {
        if !current.is_empty() && current.len() + 1 + word.len() > MAX_CHUNK_CHARS {
            chunks.push(std::mem::take(&mut current));
        }
        push_word(&mut current, word);
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

fn push_word(out: &mut String, word: &str) {
    if !out.is_empty() && !out.ends_with(' ') {
        out.push(' ');
    }
    out.push_str(word);
}

fn is_horizontal_rule(line: &str) -> bool {
    line.len() >= 3
        && (line.chars().all(|c| c == '-')
            || line.chars().all(|c| c == '*')
            || line.chars().all(|c| c == '_'))
}

/// Strip inline markdown from a single line.
fn strip_line_markdown(line: &str) -> String {
    let mut s = line.trim_start();

    // Headers
    while let Some(rest) = s.strip_prefix('#') {
        s = rest;
    }
    // Blockquotes
    if let Some(rest) = s.strip_prefix('>') {
        s = rest;
    }
    // Bullet markers
    if let Some(rest) = s
        .strip_prefix("- ")
        .or_else(|| s.strip_prefix("* "))
        .or_else(|| s.strip_prefix("+ "))
    {
        s = rest;
    }
    // Numbered list markers ("1. ", "12. ")
    let without_number = s
        .find(". ")
        .filter(|&dot| s[..dot].chars().all(|c| c.is_ascii_digit()) && dot > 0 && dot <= 3)
        .map(|dot| &s[dot + 2..]);
    if let Some(rest) = without_number {
        s = rest;
    }

    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            // Emphasis and strikethrough markers drop out entirely.
            '*' | '_' | '~' | '`' => {}
            // Images speak as their alt text; links as their label.
            '!' if chars.peek() == Some(&'[') => {}
            '[' => {}
            ']' => {
                // Skip the "(url)" that follows a link/image label.
                if chars.peek() == Some(&'(') {
                    for c in chars.by_ref() {
                        if c == ')' {
                            break;
                        }
                    }
                }
            }
            // HTML tags drop out.
            '<' => {
                for c in chars.by_ref() {
                    if c == '>' {
                        break;
                    }
                }
            }
            _ => out.push(c),
        }
    }
    out
}

fn collapse_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last_was_space = false;
    for c in text.chars() {
        if c.is_whitespace() {
            if !last_was_space && !out.is_empty() {
                out.push(' ');
            }
            last_was_space = true;
        } else {
            out.push(c);
            last_was_space = false;
        }
    }
    out.trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_passes_through() {
        assert_eq!(normalize_voice_text("It is sunny."), "It is sunny.");
    }

    #[test]
    fn code_blocks_are_summarized() {
        let text = "Here you go:\n```rust\nfn main() {}\n```\nDone.";
        assert_eq!(normalize_voice_text(text), "Here you go: Code omitted. Done.");
    }

    #[test]
    fn emphasis_and_inline_code_unwrap() {
        assert_eq!(
            normalize_voice_text("Use **bold** and `code` and _italics_."),
            "Use bold and code and italics."
        );
    }

    #[test]
    fn links_speak_their_label() {
        assert_eq!(
            normalize_voice_text("See [the docs](https://example.com) for more."),
            "See the docs for more."
        );
    }

    #[test]
    fn headers_lists_and_rules_reduce_to_text() {
        let text = "# Plan\n- first\n- second\n---\n1. third";
        assert_eq!(normalize_voice_text(text), "Plan first second third");
    }

    #[test]
    fn html_tags_are_removed() {
        assert_eq!(normalize_voice_text("a <br/> b"), "a b");
    }

    #[test]
    fn short_text_is_a_single_chunk() {
        assert_eq!(split_into_chunks("Hello there."), vec!["Hello there."]);
        assert!(split_into_chunks("   ").is_empty());
    }

    #[test]
    fn long_text_splits_at_sentence_boundaries() {
        let sentence = "This sentence is about sixty characters long, give or take. ";
        let text = sentence.repeat(12);
        let chunks = split_into_chunks(&text);
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.len() <= 400, "chunk too long: {}", chunk.len());
            assert!(chunk.ends_with('.'), "split mid-sentence: {chunk:?}");
        }
        // Nothing is lost.
        assert_eq!(chunks.join(" "), text.trim());
    }

    #[test]
    fn overlong_sentence_splits_at_whitespace() {
        let text = "word ".repeat(200);
        let chunks = split_into_chunks(&text);
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.len() <= 400);
            assert!(!chunk.contains("wo rd"));
        }
    }
}
