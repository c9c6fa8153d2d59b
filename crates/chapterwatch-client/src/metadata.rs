//! Chapter detection from page metadata.
//!
//! Used on reader pages (a single chapter open in the browser) rather than
//! series pages: the number comes from structured data, titles and headings
//! instead of a chapter list. Text goes through the strict grammar.

use std::sync::LazyLock;

use chapterwatch_core::grammar::{self, ParsedNumber, RuleKind};
use chapterwatch_core::models::{CandidateOrigin, ChapterCandidate};
use scraper::{Html, Selector};
use serde_json::Value;
use url::Url;

struct Selectors {
    ld_json: Selector,
    og_title: Selector,
    meta_title: Selector,
    title: Selector,
    headings: Selector,
    canonical: Selector,
}

static SELECTORS: LazyLock<Option<Selectors>> = LazyLock::new(|| {
    let parse = |s: &str| Selector::parse(s).ok();
    Some(Selectors {
        ld_json: parse(r#"script[type="application/ld+json"]"#)?,
        og_title: parse(r#"meta[property="og:title"]"#)?,
        meta_title: parse(r#"meta[name="title"]"#)?,
        title: parse("title")?,
        headings: parse(
            "h1, h2, .chapter-title, .entry-title, .post-title, .reader-header, .wp-manga-chapter, .cha-title",
        )?,
        canonical: parse(r#"link[rel="canonical"]"#)?,
    })
});

/// A chapter number detected on a reader page, with the text it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct MetadataHit {
    pub candidate: ChapterCandidate,
    pub title: String,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MetadataExtractor;

impl MetadataExtractor {
    pub fn new() -> Self {
        Self
    }

    /// Try linked data, meta titles, headings, then the canonical path.
    /// The first source that yields a number wins.
    pub fn detect(&self, html: &str, page_url: Option<&Url>) -> Option<MetadataHit> {
        let sel = SELECTORS.as_ref()?;
        let document = Html::parse_document(html);

        let doc_title = document
            .select(&sel.title)
            .next()
            .map(|el| normalize(&el.text().collect::<String>()))
            .unwrap_or_default();

        let hit = from_linked_data(&document, sel, &doc_title)
            .or_else(|| from_meta(&document, sel, &doc_title))
            .or_else(|| from_headings(&document, sel, &doc_title))
            .or_else(|| from_canonical(&document, sel, page_url, &doc_title));

        if let Some(h) = &hit {
            tracing::debug!(candidate = %h.candidate, title = %h.title, "Metadata chapter detected");
        }
        hit
    }
}

fn hit(parsed: ParsedNumber, origin: CandidateOrigin, title: &str, fallback: &str) -> MetadataHit {
    MetadataHit {
        candidate: ChapterCandidate {
            value: parsed.value,
            origin,
            rule: parsed.rule,
        },
        title: if title.is_empty() { fallback } else { title }.to_string(),
    }
}

fn from_linked_data(document: &Html, sel: &Selectors, doc_title: &str) -> Option<MetadataHit> {
    for script in document.select(&sel.ld_json) {
        let raw: String = script.text().collect();
        let Ok(json) = serde_json::from_str::<Value>(&raw) else {
            tracing::trace!("Unparseable ld+json block skipped");
            continue;
        };
        let objects = match json {
            Value::Array(items) => items,
            other => vec![other],
        };
        for obj in &objects {
            if let Some(found) = linked_data_object(obj, doc_title) {
                return Some(found);
            }
        }
    }
    None
}

fn linked_data_object(obj: &Value, doc_title: &str) -> Option<MetadataHit> {
    let kind = obj
        .get("@type")
        .map(|t| match t {
            Value::String(s) => s.to_lowercase(),
            other => other.to_string().to_lowercase(),
        })
        .unwrap_or_default();
    let name = ["name", "headline"]
        .iter()
        .find_map(|k| obj.get(*k).and_then(Value::as_str))
        .unwrap_or_default();
    let name_parsed = grammar::parse_chapter_number_strict(name);

    let mut explicit = obj
        .get("chapterNumber")
        .or_else(|| obj.get("episodeNumber"))
        .and_then(number_of);
    if explicit.is_none()
        && (kind.contains("chapter") || kind.contains("episode") || name_parsed.is_some())
    {
        explicit = obj.get("position").and_then(number_of);
    }

    if let Some(value) = explicit.filter(|v| grammar::is_valid_chapter(*v)) {
        let parsed = ParsedNumber {
            value,
            rule: RuleKind::KeywordNumber,
        };
        return Some(hit(parsed, CandidateOrigin::LinkedData, name, doc_title));
    }
    name_parsed.map(|p| hit(p, CandidateOrigin::LinkedData, name, doc_title))
}

fn number_of(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn from_meta(document: &Html, sel: &Selectors, doc_title: &str) -> Option<MetadataHit> {
    let content = |s: &Selector| {
        document
            .select(s)
            .next()
            .and_then(|el| el.value().attr("content"))
            .map(normalize)
    };
    [content(&sel.og_title), content(&sel.meta_title), Some(doc_title.to_string())]
        .into_iter()
        .flatten()
        .find_map(|text| {
            grammar::parse_chapter_number_strict(&text)
                .map(|p| hit(p, CandidateOrigin::MetaTitle, &text, doc_title))
        })
}

fn from_headings(document: &Html, sel: &Selectors, doc_title: &str) -> Option<MetadataHit> {
    document.select(&sel.headings).find_map(|el| {
        let text = normalize(&el.text().collect::<String>());
        grammar::parse_chapter_number_strict(&text)
            .map(|p| hit(p, CandidateOrigin::Heading, &text, doc_title))
    })
}

fn from_canonical(
    document: &Html,
    sel: &Selectors,
    page_url: Option<&Url>,
    doc_title: &str,
) -> Option<MetadataHit> {
    let canonical = document
        .select(&sel.canonical)
        .next()
        .and_then(|el| el.value().attr("href"))
        .map(str::trim)
        .filter(|h| !h.is_empty());

    let path = match (canonical, page_url) {
        (Some(href), Some(base)) => base.join(href).ok().map(|u| u.path().to_string()),
        (Some(href), None) => Url::parse(href).ok().map(|u| u.path().to_string()),
        (None, Some(base)) => Some(base.path().to_string()),
        (None, None) => None,
    }?;

    let text = format!("{path} {doc_title}");
    grammar::parse_chapter_number_strict(&text)
        .map(|p| hit(p, CandidateOrigin::Canonical, doc_title, doc_title))
}

fn normalize(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detect(html: &str) -> Option<MetadataHit> {
        MetadataExtractor.detect(html, None)
    }

    #[test]
    fn linked_data_chapter_number() {
        let html = r#"<html><head>
            <title>Some Series</title>
            <script type="application/ld+json">{"@type":"Chapter","chapterNumber":"42","name":"Finale"}</script>
            </head></html>"#;
        let h = detect(html).unwrap();
        assert_eq!(h.candidate.value, 42.0);
        assert_eq!(h.candidate.origin, CandidateOrigin::LinkedData);
        assert_eq!(h.title, "Finale");
    }

    #[test]
    fn linked_data_position_needs_chapter_type() {
        let chapter = r#"<script type="application/ld+json">[{"@type":"Breadcrumb"},{"@type":"ComicChapter","position":9}]</script>"#;
        assert_eq!(detect(chapter).unwrap().candidate.value, 9.0);

        let article = r#"<script type="application/ld+json">{"@type":"Article","position":9}</script>"#;
        assert_eq!(detect(article), None);
    }

    #[test]
    fn linked_data_name_uses_grammar() {
        let html = r#"<script type="application/ld+json">{"@type":"WebPage","headline":"Foo Chapter 17"}</script>"#;
        let h = detect(html).unwrap();
        assert_eq!(h.candidate.value, 17.0);
        assert_eq!(h.candidate.rule, RuleKind::KeywordNumber);
    }

    #[test]
    fn broken_linked_data_falls_through_to_meta() {
        let html = r#"<html><head>
            <script type="application/ld+json">{not json</script>
            <meta property="og:title" content="Foo - Chapter 31">
            <title>Foo - Chapter 30</title>
            </head></html>"#;
        let h = detect(html).unwrap();
        assert_eq!(h.candidate.value, 31.0);
        assert_eq!(h.candidate.origin, CandidateOrigin::MetaTitle);
    }

    #[test]
    fn document_title_then_headings() {
        let html = "<html><head><title>Foo Ep. 5</title></head><body><h1>Chapter 6</h1></body></html>";
        // "Ep. 5" does not fit the keyword rule, so the heading wins.
        let h = detect(html).unwrap();
        assert_eq!(h.candidate.value, 6.0);
        assert_eq!(h.candidate.origin, CandidateOrigin::Heading);
    }

    #[test]
    fn strict_grammar_ignores_number_keyword() {
        let html = "<html><head><title>Read 12 chapter now</title></head></html>";
        assert_eq!(detect(html), None);
    }

    #[test]
    fn canonical_path_is_last_resort() {
        let html = r#"<html><head><title>Foo</title>
            <link rel="canonical" href="/manga/foo/chapter-88/"></head></html>"#;
        let page = Url::parse("https://site.com/read?id=1").unwrap();
        let h = MetadataExtractor.detect(html, Some(&page)).unwrap();
        assert_eq!(h.candidate.value, 88.0);
        assert_eq!(h.candidate.origin, CandidateOrigin::Canonical);
        assert_eq!(h.title, "Foo");
    }

    #[test]
    fn page_url_used_without_canonical() {
        let page = Url::parse("https://site.com/manga/foo/chapter-3/").unwrap();
        let h = MetadataExtractor
            .detect("<html><body><p>nothing</p></body></html>", Some(&page))
            .unwrap();
        assert_eq!(h.candidate.value, 3.0);
        assert_eq!(detect("<p>2025</p>"), None);
    }
}
