//! Chapter-number grammar shared by every extractor.
//!
//! One ordered rule table turns a piece of text (link text, an href, a page
//! title) into a chapter number. The DOM extractor and the metadata extractor
//! both go through [`parse_chapter_number`], so identical text always yields
//! an identical result.
//!
//! Rules, tried in order until one produces a valid value:
//!
//! ```text
//! custom regex      last non-empty capture group per match   (only when configured)
//! keyword-number    "Chapter 12", "ep-3", "Kapitel: 7.5"
//! number-keyword    "12 chapter", "3 ep"
//! url-path          "/chapter-123/", "_ch12"
//! query-param       "?chapter=123", "&ep=4"
//! ```
//!
//! Metadata parsing uses [`parse_chapter_number_strict`], the same table
//! minus the number-keyword rule. Neither has a bare-number rule: "2025" in a
//! footer is not a chapter.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

/// Upper bound of the validity window; anything larger is treated as noise
/// (years, database ids).
pub const MAX_CHAPTER: f64 = 20000.0;

/// Which heuristic produced a number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuleKind {
    Custom,
    KeywordNumber,
    NumberKeyword,
    UrlPath,
    QueryParam,
}

impl RuleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleKind::Custom => "custom",
            RuleKind::KeywordNumber => "keyword-number",
            RuleKind::NumberKeyword => "number-keyword",
            RuleKind::UrlPath => "url-path",
            RuleKind::QueryParam => "query-param",
        }
    }
}

impl fmt::Display for RuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A number produced by one rule.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParsedNumber {
    pub value: f64,
    pub rule: RuleKind,
}

struct Rule {
    kind: RuleKind,
    pattern: &'static str,
}

const RULES: &[Rule] = &[
    Rule {
        kind: RuleKind::KeywordNumber,
        pattern: r"(?i)(?:^|[\s\-_/\[\(])(?:chapter|chap|ch|episode|ep|kapitel)\s*[:#\-]?\s*(\d+(?:\.\d+)?)\b",
    },
    Rule {
        kind: RuleKind::NumberKeyword,
        pattern: r"(?i)\b(\d+(?:\.\d+)?)\s*[:#\-]?\s*(?:chapter|chap|ch|episode|ep|kapitel)\b",
    },
    Rule {
        kind: RuleKind::UrlPath,
        pattern: r"(?i)(?:^|[/\-_])(?:chapter|chap|ch)[/\-_]*(\d+(?:\.\d+)?)(?:[/\-_]|$)",
    },
    Rule {
        kind: RuleKind::QueryParam,
        pattern: r"(?i)[?&](?:chapter|ch|ep)=(\d+(?:\.\d+)?)",
    },
];

static COMPILED: LazyLock<Vec<(RuleKind, Regex)>> = LazyLock::new(|| {
    RULES
        .iter()
        .filter_map(|rule| match Regex::new(rule.pattern) {
            Ok(re) => Some((rule.kind, re)),
            Err(e) => {
                tracing::error!(rule = %rule.kind, error = %e, "Chapter grammar rule failed to compile");
                None
            }
        })
        .collect()
});

/// Returns true if `v` lies inside the validity window `0 < v <= 20000`.
pub fn is_valid_chapter(v: f64) -> bool {
    v.is_finite() && v > 0.0 && v <= MAX_CHAPTER
}

/// Compile a user-supplied custom pattern (case-insensitive).
pub fn compile_custom(pattern: &str) -> Result<Regex, regex::Error> {
    regex::RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
}

/// Parse a chapter number out of `input`.
///
/// The custom regex, when given, is always tried first; each built-in rule is
/// only consulted if every rule before it produced nothing valid. Within one
/// rule the largest valid match wins.
pub fn parse_chapter_number(input: &str, custom: Option<&Regex>) -> Option<ParsedNumber> {
    if input.trim().is_empty() {
        return None;
    }

    if let Some(re) = custom
        && let Some(value) = best_custom_match(re, input)
    {
        return Some(ParsedNumber {
            value,
            rule: RuleKind::Custom,
        });
    }

    COMPILED.iter().find_map(|(kind, re)| {
        best_capture(re, input).map(|value| ParsedNumber { value, rule: *kind })
    })
}

/// Keyword-before-number, URL-path and query rules only. Used on page
/// metadata (titles, headings, canonical links), where "number keyword"
/// phrasing is too loose to trust.
pub fn parse_chapter_number_strict(input: &str) -> Option<ParsedNumber> {
    if input.trim().is_empty() {
        return None;
    }
    COMPILED
        .iter()
        .filter(|(kind, _)| *kind != RuleKind::NumberKeyword)
        .find_map(|(kind, re)| {
            best_capture(re, input).map(|value| ParsedNumber { value, rule: *kind })
        })
}

/// Largest valid number from capture group 1 across all matches.
fn best_capture(re: &Regex, input: &str) -> Option<f64> {
    re.captures_iter(input)
        .filter_map(|caps| caps.get(1))
        .filter_map(|m| m.as_str().parse::<f64>().ok())
        .filter(|v| is_valid_chapter(*v))
        .reduce(f64::max)
}

/// For each match take the last non-empty capture group that parses, then
/// keep the largest across matches.
fn best_custom_match(re: &Regex, input: &str) -> Option<f64> {
    re.captures_iter(input)
        .filter_map(|caps| {
            (1..caps.len()).rev().find_map(|i| {
                caps.get(i)
                    .map(|m| m.as_str().trim())
                    .filter(|s| !s.is_empty())
                    .and_then(|s| s.parse::<f64>().ok())
            })
        })
        .filter(|v| is_valid_chapter(*v))
        .reduce(f64::max)
}
