use std::sync::Arc;
use std::time::Duration;

use chapterwatch_core::error::AppError;
use chapterwatch_core::traits::{CookieRecord, HttpMethod, HttpRequest, HttpResponse, HttpTransport};
use encoding_rs::Encoding;
use reqwest::cookie::{CookieStore, Jar};
use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::redirect::Policy;
use reqwest::{Client, ClientBuilder};
use url::Url;

const ACCEPT: &str =
    "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8";
const ACCEPT_LANGUAGE: &str = "de-DE,de;q=0.7,en-US;q=0.6,en;q=0.5";

/// HTTP transport using reqwest.
///
/// Two clients over one shared cookie jar, so cookies harvested by the
/// render tier and cookies set by earlier responses ride along on every
/// request. `no_redirect` serves requests that want to see 3xx statuses.
/// Bodies are decoded with the charset the response declares.
#[derive(Clone)]
pub struct ReqwestTransport {
    client: Client,
    no_redirect: Client,
    jar: Arc<Jar>,
    timeout_secs: u64,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self, AppError> {
        Self::with_timeout(Duration::from_secs(35))
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, AppError> {
        let mut headers = HeaderMap::new();
        headers.insert(header::ACCEPT, HeaderValue::from_static(ACCEPT));
        headers.insert(
            header::ACCEPT_LANGUAGE,
            HeaderValue::from_static(ACCEPT_LANGUAGE),
        );

        let jar = Arc::new(Jar::default());
        let builder = || {
            Client::builder()
                .default_headers(headers.clone())
                .cookie_provider(jar.clone())
                .gzip(true)
                .brotli(true)
                .deflate(true)
                .timeout(timeout)
        };
        let client = build(builder())?;
        let no_redirect = build(builder().redirect(Policy::none()))?;

        Ok(Self {
            client,
            no_redirect,
            jar,
            timeout_secs: timeout.as_secs(),
        })
    }

    fn map_error(&self, e: reqwest::Error) -> AppError {
        if e.is_timeout() {
            AppError::Timeout(self.timeout_secs)
        } else if e.is_connect() {
            AppError::NetworkError(format!("Connection failed: {e}"))
        } else if e.is_request() || e.is_body() || e.is_decode() {
            AppError::NetworkError(e.to_string())
        } else {
            AppError::HttpError(e.to_string())
        }
    }
}

impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse, AppError> {
        let client = if request.follow_redirects {
            &self.client
        } else {
            &self.no_redirect
        };
        let mut builder = match request.method {
            HttpMethod::Get => client.get(request.url.clone()),
            HttpMethod::Head => client.head(request.url.clone()),
        };
        if let Some(ua) = &request.user_agent {
            builder = builder.header(header::USER_AGENT, ua);
        }
        if let Some(referer) = &request.referer {
            builder = builder.header(header::REFERER, referer);
        }
        if let Some((start, end)) = request.range {
            builder = builder.header(header::RANGE, format!("bytes={start}-{end}"));
        }

        let response = builder.send().await.map_err(|e| self.map_error(e))?;

        let status = response.status().as_u16();
        let headers: Vec<(String, String)> = response
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str().to_string(), v.to_string())))
            .collect();

        let body = match request.method {
            HttpMethod::Head => None,
            HttpMethod::Get => {
                let content_type = response
                    .headers()
                    .get(header::CONTENT_TYPE)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string);
                let bytes = response.bytes().await.map_err(|e| {
                    AppError::NetworkError(format!("Failed to read response body: {e}"))
                })?;
                Some(decode_body(&bytes, content_type.as_deref()))
            }
        };

        tracing::debug!(url = %request.url, method = ?request.method, status, "HTTP response");
        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }

    /// Counts only cookies the jar accepted and will send to `url`; the jar
    /// drops malformed cookies and foreign domains without an error.
    fn import_cookies(&self, url: &Url, cookies: &[CookieRecord]) -> Result<usize, AppError> {
        for cookie in cookies {
            self.jar.add_cookie_str(&cookie.to_set_cookie(), url);
        }

        let sent: Vec<(String, String)> = self
            .jar
            .cookies(url)
            .and_then(|v| v.to_str().ok().map(str::to_string))
            .map(|line| {
                line.split(';')
                    .filter_map(|pair| pair.trim().split_once('='))
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect()
            })
            .unwrap_or_default();

        let accepted = cookies
            .iter()
            .filter(|c| sent.iter().any(|(k, v)| *k == c.name && *v == c.value))
            .count();
        if accepted < cookies.len() {
            tracing::debug!(%url, offered = cookies.len(), accepted, "Some cookies were rejected by the jar");
        }
        Ok(accepted)
    }
}

fn build(builder: ClientBuilder) -> Result<Client, AppError> {
    builder
        .build()
        .map_err(|e| AppError::HttpError(e.to_string()))
}

/// Decode with the BOM, then the declared charset, then UTF-8.
pub fn decode_body(bytes: &[u8], content_type: Option<&str>) -> String {
    let encoding = Encoding::for_bom(bytes)
        .map(|(enc, _)| enc)
        .or_else(|| {
            content_type
                .and_then(charset_of)
                .and_then(|label| Encoding::for_label(label.as_bytes()))
        })
        .unwrap_or(encoding_rs::UTF_8);

    let (text, _, had_errors) = encoding.decode(bytes);
    if had_errors {
        tracing::debug!(encoding = encoding.name(), "Body contained malformed sequences");
    }
    text.into_owned()
}

fn charset_of(content_type: &str) -> Option<String> {
    content_type.split(';').find_map(|part| {
        let (key, value) = part.trim().split_once('=')?;
        key.trim()
            .eq_ignore_ascii_case("charset")
            .then(|| value.trim().trim_matches(['"', '\'']).to_string())
    })
}
