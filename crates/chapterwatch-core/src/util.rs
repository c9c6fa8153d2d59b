use url::Url;
use uuid::Uuid;

use crate::error::AppError;

/// Normalize a hostname for use as a map key.
///
/// Trims whitespace, strips any trailing run of dots and whitespace, and
/// lowercases. Idempotent:
/// `normalize_host(&normalize_host(h)) == normalize_host(h)`.
pub fn normalize_host(host: &str) -> String {
    host.trim()
        .trim_end_matches(|c: char| c == '.' || c.is_whitespace())
        .to_lowercase()
}

/// Parse a user-supplied URL, retrying with an `https://` prefix when the
/// scheme is missing (`example.com/manga/x`).
pub fn normalize_url(raw: &str) -> Result<Url, AppError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(AppError::InvalidUrl("empty URL".into()));
    }

    if let Ok(url) = Url::parse(trimmed)
        && matches!(url.scheme(), "http" | "https")
        && url.host_str().is_some()
    {
        return Ok(url);
    }

    if !trimmed.contains("://") {
        if let Ok(url) = Url::parse(&format!("https://{trimmed}"))
            && url.host_str().is_some_and(|h| !h.is_empty())
        {
            return Ok(url);
        }
    }

    Err(AppError::InvalidUrl(format!(
        "'{trimmed}' is not an absolute http(s) URL"
    )))
}

/// Normalized host of a URL, if it has one.
pub fn host_of(url: &Url) -> Option<String> {
    url.host_str().map(normalize_host)
}

/// `scheme://host[:port]/` of a URL, used as a Referer and as the warm-up
/// landing page.
pub fn origin_of(url: &Url) -> String {
    format!("{}/", url.origin().ascii_serialization())
}

/// Short correlation id attached to every log line of one fetch.
pub fn short_cid() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_host_is_idempotent() {
        for h in [
            "Example.COM.",
            "  manga.site..  ",
            "site.com .",
            "site.com.\t. ",
            "a.b",
            "",
            "...",
            "XN--BCHER-KVA.de.",
        ] {
            let once = normalize_host(h);
            assert_eq!(normalize_host(&once), once, "not idempotent for {h:?}");
        }
        assert_eq!(normalize_host("Example.COM."), "example.com");
        assert_eq!(normalize_host("site.com ."), "site.com");
    }

    #[test]
    fn normalize_url_accepts_absolute_and_bare_hosts() {
        assert_eq!(
            normalize_url("https://example.com/manga/x/").unwrap().as_str(),
            "https://example.com/manga/x/"
        );
        assert_eq!(
            normalize_url("  example.com/manga/x ").unwrap().as_str(),
            "https://example.com/manga/x"
        );
    }

    #[test]
    fn normalize_url_rejects_garbage() {
        assert!(matches!(normalize_url(""), Err(AppError::InvalidUrl(_))));
        assert!(matches!(
            normalize_url("ftp://example.com/file"),
            Err(AppError::InvalidUrl(_))
        ));
        assert!(matches!(normalize_url("http://"), Err(AppError::InvalidUrl(_))));
    }

    #[test]
    fn origin_includes_port_when_not_default() {
        let u = Url::parse("http://example.com:8080/a/b?c=1").unwrap();
        assert_eq!(origin_of(&u), "http://example.com:8080/");
        let u = Url::parse("https://example.com/a").unwrap();
        assert_eq!(origin_of(&u), "https://example.com/");
    }

    #[test]
    fn short_cid_is_eight_hex_chars() {
        let cid = short_cid();
        assert_eq!(cid.len(), 8);
        assert!(cid.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
