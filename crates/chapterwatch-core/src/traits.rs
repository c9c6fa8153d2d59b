use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use regex::Regex;
use url::Url;

use crate::error::AppError;
use crate::models::{ChapterCandidate, TrackedSeries};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Head,
}

/// One request the orchestrator or prober wants sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: Url,
    pub user_agent: Option<String>,
    pub referer: Option<String>,
    /// Inclusive byte range, sent as `Range: bytes=start-end`.
    pub range: Option<(u64, u64)>,
    /// When false, a 3xx comes back as the response instead of being followed.
    pub follow_redirects: bool,
}

impl HttpRequest {
    pub fn get(url: Url) -> Self {
        Self {
            method: HttpMethod::Get,
            url,
            user_agent: None,
            referer: None,
            range: None,
            follow_redirects: true,
        }
    }

    pub fn head(url: Url) -> Self {
        Self {
            method: HttpMethod::Head,
            ..Self::get(url)
        }
    }

    pub fn with_user_agent(mut self, ua: impl Into<String>) -> Self {
        self.user_agent = Some(ua.into());
        self
    }

    pub fn with_referer(mut self, referer: impl Into<String>) -> Self {
        self.referer = Some(referer.into());
        self
    }

    pub fn with_range(mut self, start: u64, end: u64) -> Self {
        self.range = Some((start, end));
        self
    }

    pub fn without_redirects(mut self) -> Self {
        self.follow_redirects = false;
        self
    }
}

/// Status, headers and the decoded body (`None` for HEAD).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

impl HttpResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// First value of a header, matched case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_redirect(&self) -> bool {
        matches!(self.status, 301 | 302 | 303 | 307 | 308)
    }
}

/// A cookie harvested by the render tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookieRecord {
    pub name: String,
    pub value: String,
    pub domain: String,
    pub path: String,
    pub expires: Option<DateTime<Utc>>,
    pub secure: bool,
    pub http_only: bool,
}

impl CookieRecord {
    /// `Set-Cookie` form, as accepted by a cookie jar.
    pub fn to_set_cookie(&self) -> String {
        let mut s = format!("{}={}", self.name, self.value);
        if !self.domain.is_empty() {
            s.push_str(&format!("; Domain={}", self.domain));
        }
        let path = if self.path.is_empty() { "/" } else { &self.path };
        s.push_str(&format!("; Path={path}"));
        if let Some(exp) = self.expires {
            s.push_str(&format!("; Expires={}", exp.format("%a, %d %b %Y %H:%M:%S GMT")));
        }
        if self.secure {
            s.push_str("; Secure");
        }
        if self.http_only {
            s.push_str("; HttpOnly");
        }
        s
    }
}

/// Plain HTTP access with a persistent cookie store.
pub trait HttpTransport: Send + Sync + Clone {
    /// Send a request. Non-2xx statuses are returned, not raised; only
    /// transport failures (DNS, connect, timeout) are errors.
    fn send(
        &self,
        request: &HttpRequest,
    ) -> impl Future<Output = Result<HttpResponse, AppError>> + Send;

    /// Merge cookies harvested elsewhere into the transport's store.
    fn import_cookies(&self, url: &Url, cookies: &[CookieRecord]) -> Result<usize, AppError>;
}

/// Browser-grade rendering, cookie warm-up and human-assisted solving.
///
/// Implementations serialize access to their engine; callers may issue
/// requests concurrently.
pub trait RenderFallback: Send + Sync + Clone {
    /// Render `url` and return its final markup, or `None` if nothing usable
    /// came back.
    fn render(
        &self,
        url: &Url,
        timeout: Duration,
        user_agent: Option<&str>,
    ) -> impl Future<Output = Result<Option<String>, AppError>> + Send;

    /// Visit the origin and then `url`, returning the resulting cookie set.
    fn warm_up_cookies(
        &self,
        url: &Url,
        timeout: Duration,
    ) -> impl Future<Output = Result<Vec<CookieRecord>, AppError>> + Send;

    /// Let a human clear the challenge. Resolves to true once a clearance
    /// cookie for `url` appears.
    fn solve_interactively(
        &self,
        url: &Url,
        timeout: Duration,
    ) -> impl Future<Output = Result<bool, AppError>> + Send;
}

/// A RenderFallback for builds without a browser: every tier above direct
/// HTTP reports itself unavailable.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRenderer;

impl RenderFallback for NoRenderer {
    async fn render(
        &self,
        _url: &Url,
        _timeout: Duration,
        _user_agent: Option<&str>,
    ) -> Result<Option<String>, AppError> {
        Ok(None)
    }

    async fn warm_up_cookies(
        &self,
        _url: &Url,
        _timeout: Duration,
    ) -> Result<Vec<CookieRecord>, AppError> {
        Err(AppError::RenderUnavailable(
            "no browser renderer configured".into(),
        ))
    }

    async fn solve_interactively(&self, _url: &Url, _timeout: Duration) -> Result<bool, AppError> {
        Ok(false)
    }
}

/// Persists the render-required host list.
pub trait HostListStore: Send + Sync + Clone {
    fn load_hosts(&self) -> impl Future<Output = Result<Vec<String>, AppError>> + Send;

    /// Store every host in `hosts`. Hosts stored earlier and missing from
    /// `hosts` may be kept; callers always pass the full set.
    fn save_hosts(&self, hosts: &[String]) -> impl Future<Output = Result<(), AppError>> + Send;
}

/// Persists tracked series as an ordered collection.
pub trait SeriesStore: Send + Sync + Clone {
    fn load_series(&self) -> impl Future<Output = Result<Vec<TrackedSeries>, AppError>> + Send;

    fn save_series(
        &self,
        series: &[TrackedSeries],
    ) -> impl Future<Output = Result<(), AppError>> + Send;
}

/// A HostListStore that keeps nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullHostList;

impl HostListStore for NullHostList {
    async fn load_hosts(&self) -> Result<Vec<String>, AppError> {
        Ok(vec![])
    }

    async fn save_hosts(&self, _hosts: &[String]) -> Result<(), AppError> {
        Ok(())
    }
}

/// Turns fetched markup into the best latest-chapter candidate.
pub trait ChapterExtractor: Send + Sync + Clone {
    /// `None` means "no chapter found", which is not an error.
    fn extract(
        &self,
        html: &str,
        page_url: Option<&Url>,
        selector: Option<&str>,
        regex: Option<&Regex>,
    ) -> Option<ChapterCandidate>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_lookup_ignores_case() {
        let r = HttpResponse::new(403).with_header("CF-Ray", "abc");
        assert_eq!(r.header("cf-ray"), Some("abc"));
        assert_eq!(r.header("server"), None);
    }

    #[test]
    fn redirect_statuses() {
        for s in [301, 302, 303, 307, 308] {
            assert!(HttpResponse::new(s).is_redirect());
        }
        assert!(!HttpResponse::new(304).is_redirect());
        assert!(HttpResponse::new(204).is_success());
    }

    #[test]
    fn cookie_serializes_for_jar() {
        let c = CookieRecord {
            name: "cf_clearance".into(),
            value: "xyz".into(),
            domain: ".site.com".into(),
            path: String::new(),
            expires: None,
            secure: true,
            http_only: true,
        };
        assert_eq!(
            c.to_set_cookie(),
            "cf_clearance=xyz; Domain=.site.com; Path=/; Secure; HttpOnly"
        );
    }

    #[tokio::test]
    async fn no_renderer_reports_unavailable() {
        let url = Url::parse("https://a.com/").unwrap();
        let r = NoRenderer;
        assert_eq!(r.render(&url, Duration::from_secs(1), None).await.unwrap(), None);
        assert!(r.warm_up_cookies(&url, Duration::from_secs(1)).await.is_err());
        assert!(!r.solve_interactively(&url, Duration::from_secs(1)).await.unwrap());
    }
}
