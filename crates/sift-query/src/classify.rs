//! Query classification.
//!
//! Decides which search path a query takes. Two patterns are checked on the
//! raw text before ordinary classification: direct id lookups (`id:123`,
//! `#123`, `item id 123`) and counting questions ("how many ...").

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::parser::ParsedQuery;

/// Search path chosen for a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryKind {
    Structured,
    Vector,
    Hybrid,
    Counting,
}

impl QueryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryKind::Structured => "structured",
            QueryKind::Vector => "vector",
            QueryKind::Hybrid => "hybrid",
            QueryKind::Counting => "counting",
        }
    }
}

/// A counting question with its trigger and grouping phrases stripped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountingQuery {
    /// Noun following the trigger ("jobs" in "how many jobs ...").
    pub target: Option<String>,
    pub group_by: Option<String>,
    /// Remaining text, to be parsed as an ordinary query.
    pub cleaned: String,
}

// =============================================================================
// Compiled regex sets
// =============================================================================

static ID_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r#"(?i)^\s*id\s*[:=]\s*["']?([\w.\-]+)["']?\s*$"#,
        r"^\s*#([\w.\-]+)\s*$",
        r"(?i)^\s*(?:\w+\s+)?id\s+([\w.\-]+)\s*$",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("Invalid id regex"))
    .collect()
});

static COUNT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:how\s+many|number\s+of|count(?:\s+of)?|total(?:\s+number\s+of)?)\b")
        .expect("Invalid count regex")
});

static COUNT_TARGET_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:\s+the)?\s+(\w+)(\S?)").expect("Invalid count target regex")
});

static GROUP_BY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:group(?:ed)?\s+by|broken\s+down\s+by|per)\s+(\w+)")
        .expect("Invalid group-by regex")
});

static SEMANTIC_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)\blike\b",
        r"(?i)\bsimilar\b",
        r"(?i)\babout\b",
        r"(?i)\brelated\s+to\b",
        r"(?i)\bfind\b",
        r"(?i)\bsearch\b",
        r"(?i)\bshow\s+me\b",
        r"(?i)\bconcerning\b",
        r"(?i)\bregarding\b",
        r"(?i)\bresembling\b",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("Invalid semantic regex"))
    .collect()
});

// =============================================================================
// Detection
// =============================================================================

/// Id requested by a direct-lookup query, if the whole query is one.
pub fn detect_id_lookup(raw: &str) -> Option<String> {
    ID_PATTERNS
        .iter()
        .find_map(|re| re.captures(raw))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Recognise a counting question.
pub fn detect_counting(raw: &str) -> Option<CountingQuery> {
    let trigger = COUNT_RE.find(raw)?;

    // A word directly followed by an operator belongs to a filter, not the target.
    let target = COUNT_TARGET_RE
        .captures(&raw[trigger.end()..])
        .filter(|c| {
            !c.get(2)
                .is_some_and(|m| matches!(m.as_str(), ":" | "=" | "<" | ">" | "!" | "~"))
        })
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_lowercase());

    let group_by = GROUP_BY_RE
        .captures(raw)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string());

    let without_group = GROUP_BY_RE.replace_all(raw, " ");
    let cleaned = COUNT_RE
        .replace_all(&without_group, " ")
        .split_whitespace()
        .map(|w| w.trim_end_matches('?'))
        .filter(|w| !w.is_empty())
        .collect::<Vec<_>>()
        .join(" ");

    Some(CountingQuery {
        target,
        group_by,
        cleaned,
    })
}

/// True when the raw text carries a semantic trigger word or phrase.
pub fn has_semantic_intent(raw: &str) -> bool {
    SEMANTIC_PATTERNS.iter().any(|re| re.is_match(raw))
}

/// Classify a parsed query.
///
/// Counting wins outright. Otherwise structured signals and semantic
/// triggers together give `Hybrid`, structured signals alone give
/// `Structured`, and everything else is `Vector`.
pub fn classify(parsed: &ParsedQuery) -> QueryKind {
    if COUNT_RE.is_match(&parsed.raw) {
        return QueryKind::Counting;
    }
    let structured = parsed.has_structured();
    let semantic = has_semantic_intent(&parsed.raw);
    match (structured, semantic) {
        (true, true) => QueryKind::Hybrid,
        (true, false) => QueryKind::Structured,
        _ => QueryKind::Vector,
    }
}
