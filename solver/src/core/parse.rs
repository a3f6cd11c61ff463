//! Tolerant parsers for the model response protocol.
//!
//! Model text is only ever split and trimmed here. None of these functions fail:
//! a response missing the expected marker or delimiter degrades to empty
//! sections so that the recursion can continue.

use std::sync::LazyLock;

use regex::Regex;

static CODE_FENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```[A-Za-z0-9_+-]*[ \t]*\r?\n(.*?)```").expect("code fence regex")
});

static LIST_PREFIX_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:[-*•]\s+|\(?\d+[.)]\s+|\[\d+\]\s+)").expect("list prefix regex")
});

/// Result of splitting a response into code and documentation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodeDoc {
    /// The documentation marker was present.
    Pair { code: String, documentation: String },
    /// No marker; the whole response is treated as code.
    Unmarked { text: String },
}

impl CodeDoc {
    pub fn marker_found(&self) -> bool {
        matches!(self, CodeDoc::Pair { .. })
    }

    pub fn into_pair(self) -> (String, String) {
        match self {
            CodeDoc::Pair {
                code,
                documentation,
            } => (code, documentation),
            CodeDoc::Unmarked { text } => (text, String::new()),
        }
    }
}

/// Split `response` at the first occurrence of `marker`.
pub fn parse_code_and_doc(response: &str, marker: &str) -> CodeDoc {
    match response.split_once(marker) {
        Some((code, documentation)) => CodeDoc::Pair {
            code: strip_code_fence(code),
            documentation: documentation.trim().to_string(),
        },
        None => CodeDoc::Unmarked {
            text: strip_code_fence(response),
        },
    }
}

/// Return the body of the first fenced code block, or the trimmed input when there is none.
pub fn strip_code_fence(text: &str) -> String {
    match CODE_FENCE_RE.captures(text).and_then(|caps| caps.get(1)) {
        Some(body) => body.as_str().trim().to_string(),
        None => text.trim().to_string(),
    }
}

/// True when the response is the stop sentinel, ignoring case, surrounding
/// whitespace and trailing punctuation.
pub fn is_stop_sentinel(response: &str, sentinel: &str) -> bool {
    let trimmed = response
        .trim()
        .trim_end_matches(['.', '!'])
        .trim_matches(['"', '\'', '`'])
        .trim();
    trimmed.eq_ignore_ascii_case(sentinel.trim())
}

/// Split a subproblem list on `delimiter`.
///
/// Segments are trimmed and stripped of list bullets, numbering and wrapping
/// brackets. Empty segments are dropped and exact duplicates keep their first
/// position.
pub fn parse_subproblems(response: &str, delimiter: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for segment in response.split(delimiter) {
        let cleaned = clean_segment(segment);
        if cleaned.is_empty() || out.contains(&cleaned) {
            continue;
        }
        out.push(cleaned);
    }
    out
}

fn clean_segment(segment: &str) -> String {
    let mut text = segment.trim();
    text = text
        .strip_prefix("[[[")
        .or_else(|| text.strip_prefix('['))
        .unwrap_or(text)
        .trim();
    text = text
        .strip_suffix("]]]")
        .or_else(|| text.strip_suffix(']'))
        .unwrap_or(text)
        .trim();
    let text = LIST_PREFIX_RE.replace(text, "");
    let mut text = text.trim().trim_end_matches(',').trim();
    if let Some(inner) = text.strip_prefix('(').and_then(|t| t.strip_suffix(')')) {
        text = inner.trim();
    }
    text.to_string()
}

/// Normalize a description for cycle comparison.
pub fn normalize_description(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .trim_end_matches('.')
        .to_lowercase()
}

/// How the critic's selection maps onto the candidate list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    /// The response is exactly one of the candidates (ignoring surrounding whitespace).
    Candidate(usize),
    /// The response does not match any candidate and is used verbatim.
    Freeform,
}

pub fn match_candidate(response: &str, candidates: &[String]) -> Selection {
    let wanted = response.trim();
    candidates
        .iter()
        .position(|candidate| candidate.trim() == wanted)
        .map_or(Selection::Freeform, Selection::Candidate)
}
