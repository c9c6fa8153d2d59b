use std::fmt;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::AppError;
use crate::grammar::{self, RuleKind};
use crate::template::ChapterTemplate;
use crate::util::normalize_url;

/// One series the user follows.
///
/// The page URL is the identity. `chapter` only moves forward; the
/// `has_new_chapter` flag is set by the scanner and cleared by
/// [`TrackedSeries::acknowledge`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedSeries {
    pub title: String,
    pub url: String,
    pub chapter: u32,
    #[serde(default)]
    pub has_new_chapter: bool,
    /// Chapter URL template containing `$chapter`.
    #[serde(default)]
    pub chapter_url_template: Option<String>,
    /// CSS selector override for the chapter list.
    #[serde(default)]
    pub chapter_selector: Option<String>,
    /// Regex override; the last non-empty capture group is the chapter.
    #[serde(default)]
    pub chapter_regex: Option<String>,
    #[serde(default)]
    pub last_checked_at: Option<DateTime<Utc>>,
}

/// The parsed, ready-to-use form of a [`TrackedSeries`].
#[derive(Debug, Clone)]
pub struct ValidatedSeries {
    pub url: Url,
    pub template: Option<ChapterTemplate>,
    pub regex: Option<Regex>,
    pub selector: Option<String>,
}

impl TrackedSeries {
    pub fn new(title: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            url: url.into(),
            chapter: 0,
            has_new_chapter: false,
            chapter_url_template: None,
            chapter_selector: None,
            chapter_regex: None,
            last_checked_at: None,
        }
    }

    pub fn with_chapter(mut self, chapter: u32) -> Self {
        self.chapter = chapter;
        self
    }

    pub fn with_template(mut self, template: impl Into<String>) -> Self {
        self.chapter_url_template = Some(template.into());
        self
    }

    pub fn with_selector(mut self, selector: impl Into<String>) -> Self {
        self.chapter_selector = Some(selector.into());
        self
    }

    pub fn with_regex(mut self, regex: impl Into<String>) -> Self {
        self.chapter_regex = Some(regex.into());
        self
    }

    /// Check URL, template and custom regex before the entry touches the
    /// network. Blank optional fields count as absent.
    pub fn validate(&self) -> Result<ValidatedSeries, AppError> {
        let url = normalize_url(&self.url)?;

        let template = non_blank(&self.chapter_url_template)
            .map(ChapterTemplate::parse)
            .transpose()?;

        let regex = non_blank(&self.chapter_regex)
            .map(|p| {
                grammar::compile_custom(p)
                    .map_err(|e| AppError::InvalidPattern(format!("'{p}': {e}")))
            })
            .transpose()?;

        Ok(ValidatedSeries {
            url,
            template,
            regex,
            selector: non_blank(&self.chapter_selector).map(str::to_string),
        })
    }

    /// Mark the advance as consumed.
    ///
    /// When the user arrived at a concrete chapter URL that matches the
    /// template and names a higher chapter, the stored chapter is raised to
    /// it. Returns true if the stored chapter changed.
    pub fn acknowledge(&mut self, visited_url: Option<&str>) -> bool {
        self.has_new_chapter = false;

        let Some(visited) = visited_url else {
            return false;
        };
        let Some(template) = non_blank(&self.chapter_url_template)
            .and_then(|raw| ChapterTemplate::parse(raw).ok())
        else {
            return false;
        };

        match template.chapter_from_url(visited) {
            Some(n) if grammar::is_valid_chapter(n) && n.floor() > f64::from(self.chapter) => {
                self.chapter = n.floor() as u32;
                true
            }
            _ => false,
        }
    }
}

fn non_blank(field: &Option<String>) -> Option<&str> {
    field.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

/// Which fetch tier a host needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HostStrategy {
    Direct,
    RenderRequired,
}

impl fmt::Display for HostStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostStrategy::Direct => f.write_str("direct"),
            HostStrategy::RenderRequired => f.write_str("render-required"),
        }
    }
}

/// Where in the document a candidate was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateOrigin {
    CustomSelector,
    ChapterList,
    LinkedData,
    MetaTitle,
    Heading,
    Canonical,
}

impl fmt::Display for CandidateOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CandidateOrigin::CustomSelector => "custom-selector",
            CandidateOrigin::ChapterList => "chapter-list",
            CandidateOrigin::LinkedData => "ld+json",
            CandidateOrigin::MetaTitle => "meta-title",
            CandidateOrigin::Heading => "heading",
            CandidateOrigin::Canonical => "canonical",
        };
        f.write_str(s)
    }
}

/// A chapter number found by one heuristic.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChapterCandidate {
    pub value: f64,
    pub origin: CandidateOrigin,
    pub rule: RuleKind,
}

impl fmt::Display for ChapterCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}/{})", self.value, self.origin, self.rule)
    }
}

/// The tier that produced a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchTier {
    Direct,
    CookieWarmup,
    Render,
    MobileRender,
    Interactive,
}

impl fmt::Display for FetchTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FetchTier::Direct => "direct",
            FetchTier::CookieWarmup => "cookie-warmup",
            FetchTier::Render => "render",
            FetchTier::MobileRender => "mobile-render",
            FetchTier::Interactive => "interactive",
        };
        f.write_str(s)
    }
}

/// Result of one orchestrated fetch. Never persisted.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    Html { html: String, tier: FetchTier },
    Blocked(String),
    NetworkError(String),
    Timeout,
}

impl FetchOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, FetchOutcome::Html { .. })
    }

    pub fn into_html(self) -> Option<String> {
        match self {
            FetchOutcome::Html { html, .. } => Some(html),
            _ => None,
        }
    }

    /// Convert failures into [`AppError`], for callers that want `?`.
    pub fn into_result(self) -> Result<(String, FetchTier), AppError> {
        match self {
            FetchOutcome::Html { html, tier } => Ok((html, tier)),
            FetchOutcome::Blocked(reason) => Err(AppError::Blocked(reason)),
            FetchOutcome::NetworkError(reason) => Err(AppError::NetworkError(reason)),
            FetchOutcome::Timeout => Err(AppError::Timeout(0)),
        }
    }
}

impl fmt::Display for FetchOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchOutcome::Html { html, tier } => write!(f, "html ({} bytes via {tier})", html.len()),
            FetchOutcome::Blocked(reason) => write!(f, "blocked: {reason}"),
            FetchOutcome::NetworkError(reason) => write!(f, "network error: {reason}"),
            FetchOutcome::Timeout => f.write_str("timeout"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn series() -> TrackedSeries {
        TrackedSeries::new("Foo", "https://site.com/manga/foo/")
            .with_chapter(5)
            .with_template("https://site.com/manga/foo/chapter-$chapter/")
    }

    #[test]
    fn validate_accepts_complete_entry() {
        let v = series().with_regex(r"ch\.(\d+)").validate().unwrap();
        assert_eq!(v.url.host_str(), Some("site.com"));
        assert!(v.template.is_some());
        assert!(v.regex.is_some());
        assert!(v.selector.is_none());
    }

    #[test]
    fn validate_rejects_bad_fields() {
        assert!(matches!(
            TrackedSeries::new("x", "not a url").validate(),
            Err(AppError::InvalidUrl(_))
        ));
        assert!(matches!(
            series().with_template("https://site.com/no-token").validate(),
            Err(AppError::InvalidTemplate(_))
        ));
        assert!(matches!(
            series().with_regex("(unclosed").validate(),
            Err(AppError::InvalidPattern(_))
        ));
    }

    #[test]
    fn blank_overrides_are_ignored() {
        let v = series().with_regex("  ").with_selector("").validate().unwrap();
        assert!(v.regex.is_none());
        assert!(v.selector.is_none());
    }

    #[test]
    fn acknowledge_clears_flag_and_raises_chapter() {
        let mut s = series();
        s.has_new_chapter = true;
        assert!(s.acknowledge(Some("https://site.com/manga/foo/chapter-7/")));
        assert!(!s.has_new_chapter);
        assert_eq!(s.chapter, 7);
    }

    #[test]
    fn acknowledge_never_lowers_chapter() {
        let mut s = series();
        s.has_new_chapter = true;
        assert!(!s.acknowledge(Some("https://site.com/manga/foo/chapter-3/")));
        assert_eq!(s.chapter, 5);
        assert!(!s.has_new_chapter);

        assert!(!s.acknowledge(None));
        assert!(!s.acknowledge(Some("https://other.com/whatever")));
    }

    #[test]
    fn fetch_outcome_into_result() {
        let ok = FetchOutcome::Html {
            html: "<html/>".into(),
            tier: FetchTier::Direct,
        };
        assert!(ok.is_success());
        assert_eq!(ok.into_result().unwrap().1, FetchTier::Direct);
        assert!(matches!(
            FetchOutcome::Blocked("403".into()).into_result(),
            Err(AppError::Blocked(_))
        ));
    }

    #[test]
    fn series_json_tolerates_missing_optional_fields() {
        let s: TrackedSeries =
            serde_json::from_str(r#"{"title":"Foo","url":"https://a.com/","chapter":3}"#).unwrap();
        assert_eq!(s.chapter, 3);
        assert!(!s.has_new_chapter);
        assert!(s.chapter_url_template.is_none());
    }
}
