//! Mocks for every collaborator trait, shared with the other crates' tests.
//!
//! State sits behind `Arc<Mutex<_>>` so a test can keep a clone and inspect
//! recorded requests and calls after handing the mock to a service.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use regex::Regex;
use url::Url;

use crate::error::AppError;
use crate::grammar::RuleKind;
use crate::models::{CandidateOrigin, ChapterCandidate, TrackedSeries};
use crate::scanner::{ScanEvent, ScanReporter};
use crate::traits::{
    ChapterExtractor, CookieRecord, HostListStore, HttpRequest, HttpResponse, HttpTransport,
    RenderFallback, SeriesStore,
};

/// A 200 response whose body holds one chapter link with `text`.
pub fn html_page(text: &str) -> HttpResponse {
    HttpResponse::new(200)
        .with_header("content-type", "text/html; charset=utf-8")
        .with_body(format!(
            "<html><body><ul class=\"chapter-list\"><li><a href=\"chapter-1/\">{text}</a></li></ul></body></html>"
        ))
}

/// A session cookie for `site.com`.
pub fn cookie(name: &str) -> CookieRecord {
    CookieRecord {
        name: name.to_string(),
        value: "test".to_string(),
        domain: "site.com".to_string(),
        path: "/".to_string(),
        expires: None,
        secure: true,
        http_only: true,
    }
}

// ---------------------------------------------------------------------------
// MockTransport
// ---------------------------------------------------------------------------

/// Mock transport with per-URL routes and a queue of canned responses.
///
/// Lookup order: route for the exact URL, then the queue, then the
/// `always` response, then a default 200 page.
#[derive(Clone, Default)]
pub struct MockTransport {
    routes: Arc<Mutex<HashMap<String, HttpResponse>>>,
    responses: Arc<Mutex<VecDeque<Result<HttpResponse, AppError>>>>,
    always: Option<HttpResponse>,
    delay: Option<Duration>,
    requests: Arc<Mutex<Vec<HttpRequest>>>,
    imported: Arc<Mutex<Vec<CookieRecord>>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_responses(responses: Vec<Result<HttpResponse, AppError>>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(responses.into())),
            ..Self::default()
        }
    }

    /// Answer every request with the same response.
    pub fn always(response: HttpResponse) -> Self {
        Self {
            always: Some(response),
            ..Self::default()
        }
    }

    pub fn with_route(self, url: &str, response: HttpResponse) -> Self {
        self.routes
            .lock()
            .unwrap()
            .insert(url.to_string(), response);
        self
    }

    /// Sleep before answering (use with a paused clock).
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn imported_cookies(&self) -> usize {
        self.imported.lock().unwrap().len()
    }
}

impl HttpTransport for MockTransport {
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse, AppError> {
        self.requests.lock().unwrap().push(request.clone());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(resp) = self.routes.lock().unwrap().get(request.url.as_str()) {
            return Ok(resp.clone());
        }
        if let Some(next) = self.responses.lock().unwrap().pop_front() {
            return next;
        }
        if let Some(resp) = &self.always {
            return Ok(resp.clone());
        }
        Ok(HttpResponse::new(200).with_body("<html><body>default</body></html>"))
    }

    fn import_cookies(&self, _url: &Url, cookies: &[CookieRecord]) -> Result<usize, AppError> {
        self.imported.lock().unwrap().extend_from_slice(cookies);
        Ok(cookies.len())
    }
}

// ---------------------------------------------------------------------------
// MockRenderer
// ---------------------------------------------------------------------------

/// Mock render collaborator with queued results per operation.
///
/// Empty queues mean: render returns nothing, warm-up fails, solve fails.
#[derive(Clone, Default)]
pub struct MockRenderer {
    renders: Arc<Mutex<VecDeque<Result<Option<String>, AppError>>>>,
    warmups: Arc<Mutex<VecDeque<Result<Vec<CookieRecord>, AppError>>>>,
    solves: Arc<Mutex<VecDeque<Result<bool, AppError>>>>,
    render_agents: Arc<Mutex<Vec<Option<String>>>>,
    warmup_calls: Arc<Mutex<usize>>,
    solve_calls: Arc<Mutex<usize>>,
}

impl MockRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_renders(self, renders: Vec<Result<Option<String>, AppError>>) -> Self {
        self.renders.lock().unwrap().extend(renders);
        self
    }

    pub fn with_warmups(self, warmups: Vec<Result<Vec<CookieRecord>, AppError>>) -> Self {
        self.warmups.lock().unwrap().extend(warmups);
        self
    }

    pub fn with_solves(self, solves: Vec<Result<bool, AppError>>) -> Self {
        self.solves.lock().unwrap().extend(solves);
        self
    }

    pub fn render_calls(&self) -> usize {
        self.render_agents.lock().unwrap().len()
    }

    /// User-agent override passed to each render call, in order.
    pub fn render_user_agents(&self) -> Vec<Option<String>> {
        self.render_agents.lock().unwrap().clone()
    }

    pub fn warmup_calls(&self) -> usize {
        *self.warmup_calls.lock().unwrap()
    }

    pub fn solve_calls(&self) -> usize {
        *self.solve_calls.lock().unwrap()
    }
}

impl RenderFallback for MockRenderer {
    async fn render(
        &self,
        _url: &Url,
        _timeout: Duration,
        user_agent: Option<&str>,
    ) -> Result<Option<String>, AppError> {
        self.render_agents
            .lock()
            .unwrap()
            .push(user_agent.map(str::to_string));
        self.renders.lock().unwrap().pop_front().unwrap_or(Ok(None))
    }

    async fn warm_up_cookies(
        &self,
        _url: &Url,
        _timeout: Duration,
    ) -> Result<Vec<CookieRecord>, AppError> {
        *self.warmup_calls.lock().unwrap() += 1;
        self.warmups
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(AppError::RenderUnavailable("mock".into())))
    }

    async fn solve_interactively(&self, _url: &Url, _timeout: Duration) -> Result<bool, AppError> {
        *self.solve_calls.lock().unwrap() += 1;
        self.solves.lock().unwrap().pop_front().unwrap_or(Ok(false))
    }
}

// ---------------------------------------------------------------------------
// MockHostList
// ---------------------------------------------------------------------------

/// In-memory host list store that records saves.
#[derive(Clone, Default)]
pub struct MockHostList {
    hosts: Arc<Mutex<Vec<String>>>,
    save_count: Arc<Mutex<usize>>,
    fail_saves: bool,
    first_save_delay: Option<Duration>,
}

impl MockHostList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_hosts(hosts: &[&str]) -> Self {
        Self {
            hosts: Arc::new(Mutex::new(hosts.iter().map(|h| h.to_string()).collect())),
            ..Self::default()
        }
    }

    /// Every save fails with a database error.
    pub fn failing() -> Self {
        Self {
            fail_saves: true,
            ..Self::default()
        }
    }

    /// The first save sleeps for `delay` before writing, so a later save can
    /// overtake it.
    pub fn with_first_save_delay(mut self, delay: Duration) -> Self {
        self.first_save_delay = Some(delay);
        self
    }

    pub fn saved(&self) -> Vec<String> {
        self.hosts.lock().unwrap().clone()
    }

    pub fn save_count(&self) -> usize {
        *self.save_count.lock().unwrap()
    }
}

impl HostListStore for MockHostList {
    async fn load_hosts(&self) -> Result<Vec<String>, AppError> {
        Ok(self.hosts.lock().unwrap().clone())
    }

    async fn save_hosts(&self, hosts: &[String]) -> Result<(), AppError> {
        if self.fail_saves {
            return Err(AppError::DatabaseError("mock save failure".into()));
        }
        let previous = {
            let mut count = self.save_count.lock().unwrap();
            *count += 1;
            *count - 1
        };
        if previous == 0
            && let Some(delay) = self.first_save_delay
        {
            tokio::time::sleep(delay).await;
        }
        *self.hosts.lock().unwrap() = hosts.to_vec();
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MockSeriesStore
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
pub struct MockSeriesStore {
    series: Arc<Mutex<Vec<TrackedSeries>>>,
}

impl MockSeriesStore {
    pub fn with_series(series: Vec<TrackedSeries>) -> Self {
        Self {
            series: Arc::new(Mutex::new(series)),
        }
    }

    pub fn series(&self) -> Vec<TrackedSeries> {
        self.series.lock().unwrap().clone()
    }
}

impl SeriesStore for MockSeriesStore {
    async fn load_series(&self) -> Result<Vec<TrackedSeries>, AppError> {
        Ok(self.series.lock().unwrap().clone())
    }

    async fn save_series(&self, series: &[TrackedSeries]) -> Result<(), AppError> {
        *self.series.lock().unwrap() = series.to_vec();
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MockExtractor
// ---------------------------------------------------------------------------

/// Mock extractor answering by page URL.
#[derive(Clone, Default)]
pub struct MockExtractor {
    values: Arc<Mutex<HashMap<String, f64>>>,
    calls: Arc<Mutex<usize>>,
}

impl MockExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_value(self, page_url: &str, value: f64) -> Self {
        self.values
            .lock()
            .unwrap()
            .insert(page_url.to_string(), value);
        self
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

impl ChapterExtractor for MockExtractor {
    fn extract(
        &self,
        _html: &str,
        page_url: Option<&Url>,
        _selector: Option<&str>,
        _regex: Option<&Regex>,
    ) -> Option<ChapterCandidate> {
        *self.calls.lock().unwrap() += 1;
        let url = page_url?;
        self.values
            .lock()
            .unwrap()
            .get(url.as_str())
            .map(|value| ChapterCandidate {
                value: *value,
                origin: CandidateOrigin::ChapterList,
                rule: RuleKind::KeywordNumber,
            })
    }
}

// ---------------------------------------------------------------------------
// MockReporter
// ---------------------------------------------------------------------------

/// Records scan events as short strings (`"advanced:Title"`).
#[derive(Clone, Default)]
pub struct MockReporter {
    events: Arc<Mutex<Vec<String>>>,
}

impl MockReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

impl ScanReporter for MockReporter {
    fn report(&self, event: ScanEvent<'_>) {
        let line = match event {
            ScanEvent::Started { .. } => "started".to_string(),
            ScanEvent::EntrySkipped { title } => format!("skipped:{title}"),
            ScanEvent::EntryInvalid { title, .. } => format!("invalid:{title}"),
            ScanEvent::ProbeHit { title, .. } => format!("probe-hit:{title}"),
            ScanEvent::Advanced { title, .. } => format!("advanced:{title}"),
            ScanEvent::NoChange { title, .. } => format!("no-change:{title}"),
            ScanEvent::EntryFailed { title, .. } => format!("failed:{title}"),
            ScanEvent::EntryTimedOut { title } => format!("timed-out:{title}"),
            ScanEvent::EntryCancelled { title } => format!("cancelled:{title}"),
            ScanEvent::Finished { .. } => "finished".to_string(),
        };
        self.events.lock().unwrap().push(line);
    }
}
