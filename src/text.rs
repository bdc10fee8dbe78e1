//! Text helpers for composing answers.

/// Answer used when retrieval produced nothing to work with.
pub const NO_CONTEXT_ANSWER: &str =
    "No supporting documents were located. Please provide additional detail.";

/// Maximum length of a synthesized answer, in characters.
pub const ANSWER_WIDTH: usize = 320;

const PLACEHOLDER: &str = " ...";

/// Collapse whitespace and truncate `text` to at most `width` characters.
///
/// Words are dropped from the end until the remaining text plus
/// `placeholder` fits. If not even one word fits, only the trimmed
/// placeholder is returned.
pub fn shorten(text: &str, width: usize, placeholder: &str) -> String {
    let words: Vec<&str> = text.split_whitespace().collect();
    let collapsed = words.join(" ");
    if collapsed.chars().count() <= width {
        return collapsed;
    }

    let budget = width.saturating_sub(placeholder.chars().count());
    let mut out = String::new();
    let mut len = 0;
    for word in words {
        let word_len = word.chars().count();
        let needed = if out.is_empty() { word_len } else { word_len + 1 };
        if len + needed > budget {
            break;
        }
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(word);
        len += needed;
    }

    if out.is_empty() {
        return placeholder.trim_start().to_string();
    }
    out.push_str(placeholder);
    out
}

/// Compose a short answer for `query` from retrieved snippets.
pub fn synthesize_answer(query: &str, snippets: &[String]) -> String {
    let Some((first, rest)) = snippets.split_first() else {
        return NO_CONTEXT_ANSWER.to_string();
    };
    let remaining: Vec<&str> = rest.iter().map(|s| s.trim()).collect();
    let combined = format!(
        "Question: {}\nContext: {} {}",
        query,
        first.trim(),
        remaining.join(" ")
    );
    shorten(combined.trim(), ANSWER_WIDTH, PLACEHOLDER)
}
