//! Pre-run screening of user queries.
//!
//! Screening is a cheap heuristic filter applied before a run starts: it
//! rejects input that is clearly not a data-analysis request and flags
//! queries that are too vague to analyze. It never calls the oracle.

use std::sync::LazyLock;

use regex::Regex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryScreen {
    Accept,
    /// The query should not be run.
    Reject(String),
    /// The query may run, but a more specific one would work better.
    Ambiguous(String),
}

const UNRELATED_KEYWORDS: &[&str] = &[
    "recipe",
    "cooking",
    "how to cook",
    "ingredients",
    "weather",
    "forecast",
    "temperature",
    "joke",
    "funny",
    "meme",
    "lol",
    "what is love",
    "meaning of life",
    "philosophy",
    "random",
    "test",
    "asdf",
    "qwerty",
    "hello world",
    "hi there",
    "just testing",
];

/// Keywords matched as whole words, so "latest" never matches "test".
static UNRELATED: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
    UNRELATED_KEYWORDS
        .iter()
        .map(|k| {
            let re = Regex::new(&format!(r"\b{}\b", regex::escape(k))).expect("keyword pattern");
            (*k, re)
        })
        .collect()
});

static OFF_TOPIC: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"\btell me (a|the) (story|joke|tale)\b",
        r"\bsing (me|a|the)\b",
        r"\bwhat (color|animal|food) (do|does|is)\b",
        r"\b(draw|paint|sketch)\b",
        r"\bplay (music|song|game)\b",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("off-topic pattern"))
    .collect()
});

static VAGUE: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"^what('s| is) (our|the) (performance|status|situation)( like)?\??$",
        r"^how (are|is) (we|things|it)( doing)?\??$",
        r"^tell me (about|something) (our|the)",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("vague pattern"))
    .collect()
});

pub const VAGUE_SUGGESTION: &str = "Query is too vague. Please specify what metrics or data you want analyzed (e.g., 'What are our revenue trends?' or 'Analyze profit margins').";

pub fn screen_query(query: &str) -> QueryScreen {
    if let Some(reason) = rejection_reason(query) {
        return QueryScreen::Reject(reason);
    }
    let lower = query.trim().to_lowercase();
    if VAGUE.iter().any(|re| re.is_match(&lower)) {
        return QueryScreen::Ambiguous(VAGUE_SUGGESTION.to_string());
    }
    QueryScreen::Accept
}

fn rejection_reason(query: &str) -> Option<String> {
    if query.trim().is_empty() {
        return Some("Query is empty".to_string());
    }
    let lower = query.trim().to_lowercase();

    let compact: Vec<char> = query.chars().filter(|c| *c != ' ').collect();
    let alpha = compact.iter().filter(|c| c.is_alphabetic()).count();
    if compact.len() > 10 && (alpha as f64) < compact.len() as f64 * 0.3 {
        return Some("Query contains too many non-alphabetic characters".to_string());
    }

    if query.chars().count() > 5 {
        let mut counts = std::collections::HashMap::new();
        for c in &compact {
            *counts.entry(*c).or_insert(0usize) += 1;
        }
        let max_repeat = counts.values().copied().max().unwrap_or(0);
        if max_repeat as f64 > compact.len() as f64 * 0.7 {
            return Some("Query contains too many repeated characters".to_string());
        }
    }

    if lower.split_whitespace().count() <= 3
        && let Some((keyword, _)) = UNRELATED.iter().find(|(_, re)| re.is_match(&lower))
    {
        return Some(format!(
            "Query appears to be unrelated to data analysis: '{keyword}'"
        ));
    }

    if OFF_TOPIC.iter().any(|re| re.is_match(&lower)) {
        return Some("Query is not a data analysis question".to_string());
    }
    None
}
