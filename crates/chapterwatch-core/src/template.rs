//! Chapter URL templates: `https://site.com/manga/foo/chapter-$chapter/`.

use std::fmt;

use regex::Regex;
use url::Url;

use crate::error::AppError;
use crate::util::normalize_url;

/// The single substitution token a template must contain.
pub const CHAPTER_TOKEN: &str = "$chapter";

/// A validated chapter URL template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChapterTemplate {
    prefix: String,
    suffix: String,
}

impl ChapterTemplate {
    /// Parse a raw template. It must contain [`CHAPTER_TOKEN`] exactly once
    /// and yield an absolute http(s) URL once substituted.
    pub fn parse(raw: &str) -> Result<Self, AppError> {
        let raw = raw.trim();
        match raw.matches(CHAPTER_TOKEN).count() {
            1 => {}
            0 => {
                return Err(AppError::InvalidTemplate(format!(
                    "'{raw}' does not contain {CHAPTER_TOKEN}"
                )));
            }
            n => {
                return Err(AppError::InvalidTemplate(format!(
                    "'{raw}' contains {CHAPTER_TOKEN} {n} times"
                )));
            }
        }

        let (prefix, suffix) = raw
            .split_once(CHAPTER_TOKEN)
            .ok_or_else(|| AppError::InvalidTemplate(raw.to_string()))?;
        let template = Self {
            prefix: prefix.to_string(),
            suffix: suffix.to_string(),
        };

        normalize_url(&template.render(1.0))
            .map_err(|e| AppError::InvalidTemplate(format!("'{raw}': {e}")))?;

        Ok(template)
    }

    /// Substitute the chapter number.
    pub fn render(&self, chapter: f64) -> String {
        format!("{}{}{}", self.prefix, format_chapter(chapter), self.suffix)
    }

    /// Substitute and parse into a URL.
    pub fn render_url(&self, chapter: f64) -> Result<Url, AppError> {
        normalize_url(&self.render(chapter))
    }

    /// Read the chapter number back out of a concrete reading URL.
    ///
    /// A trailing slash on either side is ignored. Returns `None` when the
    /// URL does not match the template.
    pub fn chapter_from_url(&self, url: &str) -> Option<f64> {
        let suffix = self.suffix.trim_end_matches('/');
        let pattern = format!(
            r"(?i)^{}(\d+(?:\.\d+)?){}/?$",
            regex::escape(&self.prefix),
            regex::escape(suffix)
        );
        let re = Regex::new(&pattern).ok()?;
        let caps = re.captures(url.trim())?;
        caps.get(1)?.as_str().parse().ok()
    }
}

impl fmt::Display for ChapterTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.prefix, CHAPTER_TOKEN, self.suffix)
    }
}

/// Integer formatting when the fractional part is zero, otherwise at most
/// two decimals with trailing zeros trimmed.
pub fn format_chapter(chapter: f64) -> String {
    let rounded = chapter.round();
    if (chapter - rounded).abs() < 1e-4 {
        return format!("{}", rounded as i64);
    }
    let s = format!("{chapter:.2}");
    s.trim_end_matches('0').trim_end_matches('.').to_string()
}
