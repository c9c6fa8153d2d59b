//! Multi-tier fetch state machine.
//!
//! ```text
//!                 render-required host
//!   ┌──────────────────────────────────────────────┐
//!   │                                              ▼
//! start ─► HttpAttempt ─► Page(2xx) ─► Success   RenderCapture ─► Success
//!             │  ▲                                 │  (desktop, then mobile UA)
//!             │  └── CookieWarmup ◄── Challenge    ▼
//!             │        (once)            │       InteractiveSolve ─► RenderCapture ─► Success
//!             │                          └──────►  (if enabled)       │
//!             └─ transient error ─► backoff ─►                         ▼
//!                 (max attempts, then RenderCapture)                  Failed
//! ```
//!
//! Every fetch runs inside a `fetch{cid, host}` span so the attempt, tier and
//! classification lines of one URL can be followed in the logs.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;
use tracing::Instrument;
use url::Url;

use crate::challenge::{self, Classification};
use crate::config::{DESKTOP_USER_AGENTS, FetchConfig, MOBILE_USER_AGENT};
use crate::error::AppError;
use crate::host_strategy::HostStrategyStore;
use crate::models::{FetchOutcome, FetchTier};
use crate::throttle::HostThrottle;
use crate::traits::{HostListStore, HttpRequest, HttpTransport, RenderFallback};
use crate::util::{host_of, origin_of, short_cid};

/// Extra time granted to a render collaborator beyond the timeout it was
/// handed, before the call is abandoned.
const COLLABORATOR_GRACE: Duration = Duration::from_secs(5);

/// Drives one URL through direct HTTP, cookie warm-up, render capture and
/// interactive solve until a tier yields markup.
#[derive(Debug, Clone)]
pub struct FetchOrchestrator<T, R, S> {
    transport: T,
    renderer: R,
    strategies: HostStrategyStore<S>,
    throttle: HostThrottle,
    config: FetchConfig,
    ua_cursor: Arc<AtomicUsize>,
}

impl<T, R, S> FetchOrchestrator<T, R, S>
where
    T: HttpTransport,
    R: RenderFallback,
    S: HostListStore,
{
    pub fn new(
        transport: T,
        renderer: R,
        strategies: HostStrategyStore<S>,
        config: FetchConfig,
    ) -> Self {
        let throttle = HostThrottle::new(config.throttle.clone());
        Self {
            transport,
            renderer,
            strategies,
            throttle,
            config,
            ua_cursor: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Share an existing throttle, e.g. with a [`Prober`](crate::prober::Prober).
    pub fn with_throttle(mut self, throttle: HostThrottle) -> Self {
        self.throttle = throttle;
        self
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn throttle(&self) -> &HostThrottle {
        &self.throttle
    }

    pub fn strategies(&self) -> &HostStrategyStore<S> {
        &self.strategies
    }

    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    /// Fetch `url` through the tier ladder. Failures come back as
    /// [`FetchOutcome`] variants, never as errors.
    pub async fn fetch(&self, url: &Url) -> FetchOutcome {
        let host = host_of(url).unwrap_or_default();
        let cid = short_cid();
        let span = tracing::info_span!("fetch", %cid, %host);

        async {
            let started = Instant::now();
            let outcome = self.run(url, &host).await;
            let elapsed_ms = started.elapsed().as_millis() as u64;
            match &outcome {
                FetchOutcome::Html { html, tier } => {
                    tracing::info!(%url, %tier, bytes = html.len(), elapsed_ms, "Fetch succeeded");
                }
                failure => {
                    tracing::warn!(%url, outcome = %failure, elapsed_ms, "Fetch failed");
                }
            }
            outcome
        }
        .instrument(span)
        .await
    }

    async fn run(&self, url: &Url, host: &str) -> FetchOutcome {
        if self.strategies.is_render_required(host) {
            tracing::info!(tier = %FetchTier::Render, "Host is render-required, skipping direct HTTP");
            return self
                .escalate(url, host, FetchOutcome::Blocked("render tier exhausted".into()))
                .await;
        }

        let referer = origin_of(url);
        let mut attempt: u32 = 0;
        let mut warmed = false;

        loop {
            attempt += 1;
            self.throttle.wait(host).await;

            let request = HttpRequest::get(url.clone())
                .with_user_agent(self.next_user_agent())
                .with_referer(referer.clone());

            let attempt_started = Instant::now();
            let result = match tokio::time::timeout(
                self.config.request_timeout,
                self.transport.send(&request),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(AppError::Timeout(self.config.request_timeout.as_secs())),
            };
            let elapsed_ms = attempt_started.elapsed().as_millis() as u64;

            let failure = match result {
                Ok(response) => {
                    let classification = challenge::classify(
                        response.status,
                        &response.headers,
                        response.body.as_deref(),
                    );
                    tracing::info!(
                        attempt,
                        tier = %FetchTier::Direct,
                        status = response.status,
                        %classification,
                        elapsed_ms,
                        "Direct attempt finished"
                    );

                    match classification {
                        Classification::Challenge(signal) => {
                            if !warmed {
                                warmed = true;
                                if self.warm_up(url).await {
                                    if !self.config.warmup_pause.is_zero() {
                                        tokio::time::sleep(self.config.warmup_pause).await;
                                    }
                                    tracing::info!("Retrying direct HTTP after warm-up");
                                    attempt -= 1;
                                    continue;
                                }
                            }
                            return self
                                .escalate(url, host, FetchOutcome::Blocked(signal.to_string()))
                                .await;
                        }
                        Classification::Page if response.is_success() => {
                            let tier = if warmed {
                                FetchTier::CookieWarmup
                            } else {
                                FetchTier::Direct
                            };
                            return FetchOutcome::Html {
                                html: response.body.unwrap_or_default(),
                                tier,
                            };
                        }
                        Classification::Page if response.status >= 500 => {
                            FetchOutcome::NetworkError(format!("HTTP {}", response.status))
                        }
                        Classification::Page => {
                            return FetchOutcome::NetworkError(format!(
                                "HTTP {}",
                                response.status
                            ));
                        }
                    }
                }
                Err(AppError::Timeout(secs)) => {
                    tracing::warn!(attempt, timeout_secs = secs, elapsed_ms, "Direct attempt timed out");
                    FetchOutcome::Timeout
                }
                Err(e) if e.is_retryable() => {
                    tracing::warn!(attempt, error = %e, elapsed_ms, "Direct attempt failed");
                    FetchOutcome::NetworkError(e.to_string())
                }
                Err(e) => {
                    tracing::warn!(attempt, error = %e, elapsed_ms, "Direct attempt failed, not retrying");
                    return FetchOutcome::NetworkError(e.to_string());
                }
            };

            if attempt >= self.config.max_attempts {
                tracing::warn!(attempt, "Direct attempts exhausted, escalating");
                return self.escalate(url, host, failure).await;
            }

            let backoff = self.backoff(attempt);
            tracing::info!(backoff_ms = backoff.as_millis() as u64, "Backing off before retry");
            if !backoff.is_zero() {
                tokio::time::sleep(backoff).await;
            }
        }
    }

    /// Harvest cookies through the renderer and merge them into the
    /// transport. True if at least one cookie was imported.
    async fn warm_up(&self, url: &Url) -> bool {
        let started = Instant::now();
        let timeout = self.config.warmup_timeout;
        let result = tokio::time::timeout(
            timeout + COLLABORATOR_GRACE,
            self.renderer.warm_up_cookies(url, timeout),
        )
        .await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let cookies = match result {
            Ok(Ok(cookies)) => cookies,
            Ok(Err(e)) => {
                tracing::warn!(tier = %FetchTier::CookieWarmup, error = %e, elapsed_ms, "Cookie warm-up failed");
                return false;
            }
            Err(_) => {
                tracing::warn!(tier = %FetchTier::CookieWarmup, elapsed_ms, "Cookie warm-up timed out");
                return false;
            }
        };

        match self.transport.import_cookies(url, &cookies) {
            Ok(imported) => {
                tracing::info!(tier = %FetchTier::CookieWarmup, imported, elapsed_ms, "Cookie warm-up finished");
                imported > 0
            }
            Err(e) => {
                tracing::warn!(tier = %FetchTier::CookieWarmup, error = %e, "Cookie import failed");
                false
            }
        }
    }

    /// Render capture, then the interactive solve when enabled. Returns
    /// `fallback` once every tier is exhausted.
    async fn escalate(&self, url: &Url, host: &str, fallback: FetchOutcome) -> FetchOutcome {
        for (user_agent, tier) in [
            (None, FetchTier::Render),
            (Some(MOBILE_USER_AGENT), FetchTier::MobileRender),
        ] {
            if let Some(html) = self.render_once(url, user_agent, tier).await {
                self.strategies.mark_render_required(host).await;
                return FetchOutcome::Html { html, tier };
            }
        }

        if !self.config.interactive {
            return fallback;
        }

        let started = Instant::now();
        let timeout = self.config.interactive_timeout;
        tracing::info!(tier = %FetchTier::Interactive, timeout_secs = timeout.as_secs(), "Waiting for interactive solve");
        let solved = tokio::time::timeout(
            timeout + COLLABORATOR_GRACE,
            self.renderer.solve_interactively(url, timeout),
        )
        .await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match solved {
            Ok(Ok(true)) => {
                tracing::info!(tier = %FetchTier::Interactive, elapsed_ms, "Interactive solve succeeded");
                if let Some(html) = self.render_once(url, None, FetchTier::Interactive).await {
                    self.strategies.mark_render_required(host).await;
                    return FetchOutcome::Html {
                        html,
                        tier: FetchTier::Interactive,
                    };
                }
            }
            Ok(Ok(false)) => {
                tracing::warn!(tier = %FetchTier::Interactive, elapsed_ms, "Interactive solve not completed");
            }
            Ok(Err(e)) => {
                tracing::warn!(tier = %FetchTier::Interactive, error = %e, elapsed_ms, "Interactive solve failed");
            }
            Err(_) => {
                tracing::warn!(tier = %FetchTier::Interactive, elapsed_ms, "Interactive solve timed out");
            }
        }

        fallback
    }

    async fn render_once(&self, url: &Url, user_agent: Option<&str>, tier: FetchTier) -> Option<String> {
        let started = Instant::now();
        let timeout = self.config.render_timeout;
        let result = tokio::time::timeout(
            timeout + COLLABORATOR_GRACE,
            self.renderer.render(url, timeout, user_agent),
        )
        .await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(Ok(Some(html))) if !html.trim().is_empty() => {
                tracing::info!(%tier, bytes = html.len(), elapsed_ms, "Render capture succeeded");
                Some(html)
            }
            Ok(Ok(_)) => {
                tracing::warn!(%tier, elapsed_ms, "Render capture returned nothing");
                None
            }
            Ok(Err(e)) => {
                tracing::warn!(%tier, error = %e, elapsed_ms, "Render capture failed");
                None
            }
            Err(_) => {
                tracing::warn!(%tier, elapsed_ms, "Render capture timed out");
                None
            }
        }
    }

    fn next_user_agent(&self) -> &'static str {
        let n = self.ua_cursor.fetch_add(1, Ordering::Relaxed);
        DESKTOP_USER_AGENTS[n % DESKTOP_USER_AGENTS.len()]
    }

    /// `base * 2^(attempt-1)` plus up to `backoff_jitter` of noise.
    fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        let base = self.config.backoff_base.saturating_mul(factor);
        let jitter_ms = self.config.backoff_jitter.as_millis() as u64;
        if jitter_ms == 0 {
            return base;
        }
        base + Duration::from_millis(rand::thread_rng().gen_range(0..jitter_ms))
    }
}
