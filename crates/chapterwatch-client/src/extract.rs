//! Latest-chapter extraction from a series page.
//!
//! Candidates come from the custom selector (if any) and a fixed list of
//! chapter-list containers, never from arbitrary links on the page. Links
//! that leave the series (other host, other path prefix, not chapter-shaped)
//! are dropped before their text is even parsed. The answer is the largest
//! surviving number.

use std::sync::LazyLock;

use chapterwatch_core::grammar::{self, ParsedNumber};
use chapterwatch_core::models::{CandidateOrigin, ChapterCandidate};
use chapterwatch_core::template::format_chapter;
use chapterwatch_core::traits::ChapterExtractor;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use url::Url;

/// Chapter-list containers seen on common reader themes, most specific first.
const STRUCTURAL_SELECTORS: &[&str] = &[
    "li.wp-manga-chapter a",
    "ul[class*='version-chap'] li a",
    "div[class*='chapter-list'] a",
    "ul[class*='chapter-list'] a",
    "div[class*='listing-chapters_wrap'] a",
    "div[class*='eplist'] a",
    "[class*='episode-list'] a",
    "div[class*='chapters'] a",
    "ul[class*='chap'] li a",
    "[class~='chapter'] a",
    "[class~='episode'] a",
];

static STRUCTURAL: LazyLock<Vec<Selector>> = LazyLock::new(|| compile_all(STRUCTURAL_SELECTORS));

static ANCHORS: LazyLock<Vec<Selector>> = LazyLock::new(|| compile_all(&["a[href]"]));

static CHAPTER_PATH: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"(?i)[/\-_](?:ch|chap|chapter|ep|episode)[\-_]?\d").ok()
});

fn compile_all(selectors: &[&str]) -> Vec<Selector> {
    selectors
        .iter()
        .filter_map(|s| match Selector::parse(s) {
            Ok(sel) => Some(sel),
            Err(e) => {
                tracing::error!(selector = %s, error = %e, "Built-in selector failed to parse");
                None
            }
        })
        .collect()
}

/// [`ChapterExtractor`] over a `scraper` DOM.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScraperChapterExtractor;

impl ScraperChapterExtractor {
    pub fn new() -> Self {
        Self
    }

    /// Every candidate that passed the filters, in document order per
    /// selector. [`ChapterExtractor::extract`] returns the largest.
    pub fn candidates(
        &self,
        html: &str,
        page_url: Option<&Url>,
        selector: Option<&str>,
        regex: Option<&Regex>,
    ) -> Vec<ChapterCandidate> {
        let document = Html::parse_document(html);
        let mut out = Vec::new();

        if let Some(custom) = selector.map(str::trim).filter(|s| !s.is_empty()) {
            match Selector::parse(custom) {
                Ok(sel) => {
                    for el in document.select(&sel) {
                        collect(el, page_url, regex, CandidateOrigin::CustomSelector, &mut out);
                    }
                }
                Err(e) => {
                    tracing::warn!(selector = %custom, error = %e, "Custom selector ignored");
                }
            }
        }

        for sel in STRUCTURAL.iter() {
            for el in document.select(sel) {
                collect(el, page_url, regex, CandidateOrigin::ChapterList, &mut out);
            }
        }

        out
    }
}

impl ChapterExtractor for ScraperChapterExtractor {
    fn extract(
        &self,
        html: &str,
        page_url: Option<&Url>,
        selector: Option<&str>,
        regex: Option<&Regex>,
    ) -> Option<ChapterCandidate> {
        let best = self
            .candidates(html, page_url, selector, regex)
            .into_iter()
            .reduce(|best, c| if c.value > best.value { c } else { best });

        match &best {
            Some(c) => tracing::debug!(candidate = %c, "Latest chapter selected"),
            None => tracing::debug!("No chapter candidates"),
        }
        best
    }
}

fn collect(
    el: ElementRef<'_>,
    page_url: Option<&Url>,
    regex: Option<&Regex>,
    origin: CandidateOrigin,
    out: &mut Vec<ChapterCandidate>,
) {
    let href = el.value().attr("href").map(str::trim);
    if let (Some(page), Some(href)) = (page_url, href)
        && !is_same_series_chapter_link(page, href)
    {
        tracing::trace!(%href, "Off-series link skipped");
        return;
    }

    let text = element_text(el);
    let parsed = grammar::parse_chapter_number(&text, regex)
        .or_else(|| href.and_then(|h| grammar::parse_chapter_number(h, regex)));

    if let Some(ParsedNumber { value, rule }) = parsed {
        out.push(ChapterCandidate {
            value,
            origin,
            rule,
        });
    }
}

fn element_text(el: ElementRef<'_>) -> String {
    el.text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Same host, under the page's own path, and shaped like a chapter link.
pub fn is_same_series_chapter_link(page: &Url, href: &str) -> bool {
    let Ok(link) = page.join(href) else {
        return false;
    };

    let same_host = match (link.host_str(), page.host_str()) {
        (Some(a), Some(b)) => a.eq_ignore_ascii_case(b),
        _ => false,
    };
    if !same_host {
        return false;
    }

    let prefix = format!("{}/", page.path().trim_end_matches('/')).to_lowercase();
    let path = link.path().to_lowercase();
    if !path.starts_with(&prefix) {
        return false;
    }

    // Keep the prefix's trailing slash so "/series/foo/chapter-3" counts.
    let rest = &path[prefix.len() - 1..];
    rest.contains("/chapter")
        || rest.contains("/episode")
        || CHAPTER_PATH.as_ref().is_some_and(|re| re.is_match(rest))
}

/// Find the link to exactly `chapter` on a series page.
///
/// Chapter-list containers are searched first, then every link. A link
/// matches when its href or text names the chapter with a `chapter`/`ch`
/// keyword and no further digits; there is no fallback to a nearby chapter.
pub fn resolve_chapter_link(html: &str, page_url: &Url, chapter: f64) -> Option<Url> {
    let wanted = regex::escape(&format_chapter(chapter));
    let pattern =
        format!(r"(?i)(?:^|\D)(?:chapter|ch)[-_/\s]*{wanted}(?:$|[^\d.]|\.(?:\D|$))");
    let exact = Regex::new(&pattern).ok()?;

    let document = Html::parse_document(html);
    for group in [&*STRUCTURAL, &*ANCHORS] {
        for sel in group {
            for el in document.select(sel) {
                let Some(href) = el.value().attr("href").map(str::trim) else {
                    continue;
                };
                if href.is_empty() {
                    continue;
                }
                if exact.is_match(href) || exact.is_match(&element_text(el)) {
                    if let Ok(url) = page_url.join(href) {
                        tracing::debug!(chapter, %url, "Chapter link resolved");
                        return Some(url);
                    }
                }
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use chapterwatch_core::grammar::{RuleKind, compile_custom};

    use super::*;

    fn page() -> Url {
        Url::parse("https://site.com/manga/foo/").unwrap()
    }

    fn extract(html: &str) -> Option<f64> {
        ScraperChapterExtractor
            .extract(html, Some(&page()), None, None)
            .map(|c| c.value)
    }

    const MADARA: &str = r#"
        <html><body>
          <ul class="main version-chap">
            <li class="wp-manga-chapter"><a href="https://site.com/manga/foo/chapter-12/">Chapter 12</a></li>
            <li class="wp-manga-chapter"><a href="https://site.com/manga/foo/chapter-11/">Chapter 11</a></li>
            <li class="wp-manga-chapter"><a href="https://site.com/manga/foo/chapter-10-5/">Chapter 10.5</a></li>
          </ul>
          <div class="related chapters">
            <a href="https://site.com/manga/other/chapter-980/">Chapter 980</a>
            <a href="https://elsewhere.com/manga/foo/chapter-999/">Chapter 999</a>
          </div>
          <footer>Copyright 2025</footer>
        </body></html>"#;

    #[test]
    fn off_series_links_never_win() {
        assert_eq!(extract(MADARA), Some(12.0));
    }

    #[test]
    fn no_chapter_anchors_is_none() {
        let html = r#"<html><body><p>Chapter 99 coming soon</p><a href="/about">About</a></body></html>"#;
        assert_eq!(extract(html), None);
        assert_eq!(extract(""), None);
    }

    #[test]
    fn relative_links_resolve_against_page() {
        let html = r#"<div class="chapter-list"><a href="chapter-7/">Read</a><a href="chapter-8/">Read</a></div>"#;
        let c = ScraperChapterExtractor
            .extract(html, Some(&page()), None, None)
            .unwrap();
        assert_eq!(c.value, 8.0);
        assert_eq!(c.rule, RuleKind::KeywordNumber);
        assert_eq!(c.origin, CandidateOrigin::ChapterList);
    }

    #[test]
    fn without_page_url_nothing_is_filtered() {
        let c = ScraperChapterExtractor.extract(MADARA, None, None, None).unwrap();
        assert_eq!(c.value, 999.0);
    }

    #[test]
    fn custom_selector_pools_with_structural_candidates() {
        let html = r#"
            <div class="latest"><span>Episode 14</span></div>
            <div class="chapter-list"><a href="/manga/foo/chapter-13/">Chapter 13</a></div>"#;
        let c = ScraperChapterExtractor
            .extract(html, Some(&page()), Some("div.latest span"), None)
            .unwrap();
        assert_eq!(c.value, 14.0);
        assert_eq!(c.origin, CandidateOrigin::CustomSelector);

        let html = r#"
            <div class="latest"><span>Episode 2</span></div>
            <div class="chapter-list"><a href="/manga/foo/chapter-13/">Chapter 13</a></div>"#;
        assert_eq!(
            ScraperChapterExtractor
                .extract(html, Some(&page()), Some("div.latest span"), None)
                .map(|c| c.value),
            Some(13.0)
        );
    }

    #[test]
    fn invalid_custom_selector_is_ignored() {
        let c = ScraperChapterExtractor
            .extract(MADARA, Some(&page()), Some("li[[["), None)
            .unwrap();
        assert_eq!(c.value, 12.0);
    }

    #[test]
    fn custom_regex_applies_to_link_text() {
        let html = r#"<ul class="chapter-list"><li><a href="/manga/foo/chapter-40/">Vol.3 #41</a></li></ul>"#;
        let re = compile_custom(r"#(\d+)").unwrap();
        let c = ScraperChapterExtractor
            .extract(html, Some(&page()), None, Some(&re))
            .unwrap();
        assert_eq!(c.value, 41.0);
        assert_eq!(c.rule, RuleKind::Custom);
    }

    #[test]
    fn href_is_used_when_text_has_no_number() {
        let html = r#"<ul class="chapter-list"><li><a href="/manga/foo/ch-21">Latest</a></li></ul>"#;
        assert_eq!(extract(html), Some(21.0));
    }

    #[test]
    fn same_series_filter() {
        let p = page();
        assert!(is_same_series_chapter_link(&p, "chapter-3/"));
        assert!(is_same_series_chapter_link(&p, "/manga/foo/vol-1/chapter-3"));
        assert!(is_same_series_chapter_link(&p, "/MANGA/Foo/Chapter-3"));
        assert!(!is_same_series_chapter_link(&p, "/manga/foobar/chapter-3"));
        assert!(!is_same_series_chapter_link(&p, "/manga/foo/reviews"));
        assert!(!is_same_series_chapter_link(&p, ""));
        assert!(!is_same_series_chapter_link(&p, "https://other.com/manga/foo/chapter-3"));
    }

    #[test]
    fn resolves_exact_chapter_link() {
        let url = resolve_chapter_link(MADARA, &page(), 11.0).unwrap();
        assert_eq!(url.as_str(), "https://site.com/manga/foo/chapter-11/");
    }

    #[test]
    fn resolve_does_not_confuse_prefixes() {
        let html = r#"
            <a href="/manga/foo/chapter-110/">Chapter 110</a>
            <a href="/manga/foo/chapter-11.5/">Chapter 11.5</a>"#;
        assert_eq!(resolve_chapter_link(html, &page(), 11.0), None);
        assert_eq!(
            resolve_chapter_link(html, &page(), 11.5).map(|u| u.path().to_string()),
            Some("/manga/foo/chapter-11.5/".to_string())
        );
    }

    #[test]
    fn resolve_has_no_nearby_fallback() {
        assert_eq!(resolve_chapter_link(MADARA, &page(), 13.0), None);
    }
}
