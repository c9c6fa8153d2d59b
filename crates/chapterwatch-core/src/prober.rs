//! Cheap existence check for a speculative next-chapter URL.
//!
//! HEAD first; a failed, refused or unsupported HEAD (403, 429, 405 without a
//! vendor fingerprint) falls back to a GET of the first kilobyte. Redirects
//! are not followed: 2xx or a 3xx itself means the chapter exists. Anything
//! else, including a challenge page, means "cannot tell", which the scanner
//! treats as "not yet". The probe never touches the render tier.

use std::time::Duration;

use url::Url;

use crate::challenge::{self, ChallengeSignal, Classification};
use crate::config::DESKTOP_USER_AGENTS;
use crate::error::AppError;
use crate::template::ChapterTemplate;
use crate::throttle::HostThrottle;
use crate::traits::{HttpMethod, HttpRequest, HttpResponse, HttpTransport};
use crate::util::{host_of, origin_of};

/// Bytes requested by the ranged GET fallback.
const PROBE_RANGE_END: u64 = 1023;

/// What a probe concluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeResult {
    Exists,
    Missing,
}

impl ProbeResult {
    pub fn exists(&self) -> bool {
        matches!(self, ProbeResult::Exists)
    }
}

#[derive(Debug, Clone)]
pub struct Prober<T> {
    transport: T,
    throttle: HostThrottle,
    timeout: Duration,
}

impl<T: HttpTransport> Prober<T> {
    pub fn new(transport: T, throttle: HostThrottle, timeout: Duration) -> Self {
        Self {
            transport,
            throttle,
            timeout,
        }
    }

    /// Substitute `chapter` into `template` and probe the resulting URL.
    pub async fn probe_chapter(
        &self,
        template: &ChapterTemplate,
        chapter: f64,
    ) -> Result<ProbeResult, AppError> {
        let url = template.render_url(chapter)?;
        Ok(self.probe(&url).await)
    }

    /// Probe a concrete URL. Transport failures count as [`ProbeResult::Missing`].
    pub async fn probe(&self, url: &Url) -> ProbeResult {
        match self.send(HttpRequest::head(url.clone())).await {
            Some(resp) if head_is_inconclusive(&resp) => {
                tracing::debug!(%url, status = resp.status, "HEAD inconclusive, trying ranged GET");
            }
            Some(resp) => return verdict(url, HttpMethod::Head, &resp),
            None => {
                tracing::debug!(%url, "HEAD failed, trying ranged GET");
            }
        }

        let get = HttpRequest::get(url.clone()).with_range(0, PROBE_RANGE_END);
        match self.send(get).await {
            Some(resp) => verdict(url, HttpMethod::Get, &resp),
            None => ProbeResult::Missing,
        }
    }

    async fn send(&self, request: HttpRequest) -> Option<HttpResponse> {
        let url = request.url.clone();
        if let Some(host) = host_of(&url) {
            self.throttle.wait(&host).await;
        }
        let request = request
            .with_user_agent(DESKTOP_USER_AGENTS[0])
            .with_referer(origin_of(&url))
            .without_redirects();

        match tokio::time::timeout(self.timeout, self.transport.send(&request)).await {
            Ok(Ok(resp)) => Some(resp),
            Ok(Err(e)) => {
                tracing::debug!(%url, method = ?request.method, error = %e, "Probe request failed");
                None
            }
            Err(_) => {
                tracing::debug!(%url, method = ?request.method, "Probe request timed out");
                None
            }
        }
    }
}

/// A bare refusal of HEAD is worth a second try with GET; a vendor
/// fingerprint on it is not.
fn head_is_inconclusive(resp: &HttpResponse) -> bool {
    matches!(resp.status, 403 | 429 | 405)
        && matches!(
            challenge::classify(resp.status, &resp.headers, resp.body.as_deref()),
            Classification::Page | Classification::Challenge(ChallengeSignal::Status(_))
        )
}

fn verdict(url: &Url, method: HttpMethod, resp: &HttpResponse) -> ProbeResult {
    let classification = challenge::classify(resp.status, &resp.headers, resp.body.as_deref());
    let result = match classification {
        Classification::Challenge(_) => ProbeResult::Missing,
        Classification::Page if resp.is_success() || resp.is_redirect() => ProbeResult::Exists,
        Classification::Page => ProbeResult::Missing,
    };
    tracing::debug!(%url, ?method, status = resp.status, %classification, ?result, "Probe finished");
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::MockTransport;
    use crate::throttle::ThrottleConfig;

    fn prober(transport: &MockTransport) -> Prober<MockTransport> {
        Prober::new(
            transport.clone(),
            HostThrottle::new(ThrottleConfig::new(Duration::ZERO)),
            Duration::from_secs(5),
        )
    }

    fn url() -> Url {
        Url::parse("https://site.com/manga/foo/chapter-7/").unwrap()
    }

    #[tokio::test]
    async fn head_redirect_means_exists() {
        let transport = MockTransport::with_responses(vec![Ok(
            HttpResponse::new(301).with_header("Location", "/manga/foo/chapter-7")
        )]);
        assert_eq!(prober(&transport).probe(&url()).await, ProbeResult::Exists);

        let requests = transport.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].method, HttpMethod::Head);
        assert!(!requests[0].follow_redirects);
    }

    #[tokio::test]
    async fn head_not_found_means_missing() {
        let transport = MockTransport::with_responses(vec![Ok(
            HttpResponse::new(404).with_header("Server", "nginx")
        )]);
        assert_eq!(prober(&transport).probe(&url()).await, ProbeResult::Missing);
        assert_eq!(transport.requests().len(), 1);
    }

    #[tokio::test]
    async fn method_not_allowed_falls_back_to_ranged_get() {
        let transport = MockTransport::with_responses(vec![
            Ok(HttpResponse::new(405)),
            Ok(HttpResponse::new(206).with_body("<html>")),
        ]);
        assert_eq!(prober(&transport).probe(&url()).await, ProbeResult::Exists);

        let requests = transport.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].method, HttpMethod::Get);
        assert_eq!(requests[1].range, Some((0, 1023)));
        assert!(requests.iter().all(|r| !r.follow_redirects));
    }

    #[tokio::test]
    async fn challenge_on_ranged_get_means_missing() {
        let transport = MockTransport::with_responses(vec![
            Ok(HttpResponse::new(403)),
            Ok(HttpResponse::new(403).with_header("cf-ray", "abc")),
        ]);
        assert_eq!(prober(&transport).probe(&url()).await, ProbeResult::Missing);
    }

    #[tokio::test]
    async fn challenge_body_on_200_means_missing() {
        let transport = MockTransport::with_responses(vec![
            Ok(HttpResponse::new(429)),
            Ok(HttpResponse::new(200).with_body("Checking your browser before accessing")),
        ]);
        assert_eq!(prober(&transport).probe(&url()).await, ProbeResult::Missing);
    }

    #[tokio::test]
    async fn vendor_challenge_on_head_skips_get() {
        let transport = MockTransport::with_responses(vec![Ok(
            HttpResponse::new(403).with_header("Server", "cloudflare")
        )]);
        assert_eq!(prober(&transport).probe(&url()).await, ProbeResult::Missing);
        assert_eq!(transport.requests().len(), 1);
    }

    #[tokio::test]
    async fn transport_errors_mean_missing() {
        let transport = MockTransport::with_responses(vec![
            Err(AppError::NetworkError("dns".into())),
            Err(AppError::NetworkError("dns".into())),
        ]);
        assert_eq!(prober(&transport).probe(&url()).await, ProbeResult::Missing);
        assert_eq!(transport.requests().len(), 2);
    }

    #[tokio::test]
    async fn probe_chapter_renders_template() {
        let transport = MockTransport::with_responses(vec![Ok(HttpResponse::new(200))]);
        let template = ChapterTemplate::parse("https://site.com/manga/foo/chapter-$chapter/").unwrap();

        let result = prober(&transport).probe_chapter(&template, 6.0).await.unwrap();

        assert!(result.exists());
        assert_eq!(
            transport.requests()[0].url.as_str(),
            "https://site.com/manga/foo/chapter-6/"
        );
    }
}
