use std::path::PathBuf;
use std::time::Duration;

use chapterwatch_core::challenge;
use chapterwatch_core::error::AppError;
use chapterwatch_core::traits::{CookieRecord, RenderFallback};
use chapterwatch_core::util::origin_of;
use chromiumoxide::cdp::browser_protocol::emulation::SetUserAgentOverrideParams;
use chromiumoxide::cdp::browser_protocol::network::Cookie;
use chromiumoxide::error::CdpError;
use chromiumoxide::{Browser, BrowserConfig, Page};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use url::Url;

const CLEARANCE_COOKIE: &str = "cf_clearance";
const SOLVE_POLL: Duration = Duration::from_millis(800);
const SETTLE_POLL: Duration = Duration::from_millis(500);
const SETTLE_WINDOW: Duration = Duration::from_secs(12);

/// True once no challenge text is visible and enough chapter-like links exist.
const READY_PROBE: &str = r#"(() => {
  const text = (document.body && document.body.innerText || '').toLowerCase();
  const blocked = ['just a moment', 'checking your browser', 'verify you are human',
                   'überprüfung', 'einen moment'].some(m => text.includes(m));
  const links = Array.from(document.querySelectorAll('a[href]'))
    .filter(a => /(chapter|chap|episode|kapitel)[-_\/ ]?\d|[-_\/]ch[-_]?\d/i.test(a.href + ' ' + a.textContent))
    .length;
  return !blocked && links >= 3;
})()"#;

const SCROLL_NUDGE: &str =
    "window.scrollBy(0, Math.max(400, (document.body && document.body.scrollHeight || 0) / 2)); true";

const OUTER_HTML: &str = "document.documentElement.outerHTML";

/// Launch settings for [`BrowserRenderer`].
#[derive(Debug, Clone)]
pub struct BrowserSettings {
    /// Profile directory shared by the headless and headed sessions.
    pub profile_dir: PathBuf,
    pub chrome_binary: Option<PathBuf>,
    pub launch_timeout: Duration,
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            profile_dir: std::env::temp_dir().join("chapterwatch-profile"),
            chrome_binary: find_chrome_binary(),
            launch_timeout: Duration::from_secs(30),
        }
    }
}

impl BrowserSettings {
    /// Defaults, overridden by `CHAPTERWATCH_PROFILE_DIR` and `CHROME_BIN`.
    pub fn from_env() -> Self {
        let mut settings = Self::default();
        if let Ok(dir) = std::env::var("CHAPTERWATCH_PROFILE_DIR")
            && !dir.trim().is_empty()
        {
            settings.profile_dir = PathBuf::from(dir);
        }
        settings
    }

    pub fn with_profile_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.profile_dir = dir.into();
        self
    }
}

/// Locate a real Chrome/Chromium binary.
///
/// The snap wrapper at `/snap/bin/chromium` strips unknown flags, so the
/// binary inside the snap is preferred. `None` lets chromiumoxide search.
fn find_chrome_binary() -> Option<PathBuf> {
    if let Ok(p) = std::env::var("CHROME_BIN") {
        let path = PathBuf::from(p);
        if path.exists() {
            return Some(path);
        }
    }
    [
        "/snap/chromium/current/usr/lib/chromium-browser/chrome",
        "/var/lib/flatpak/exports/bin/org.chromium.Chromium",
        "/usr/bin/google-chrome-stable",
        "/usr/bin/google-chrome",
        "/usr/bin/chromium",
        "/usr/bin/chromium-browser",
    ]
    .iter()
    .map(PathBuf::from)
    .find(|p| p.exists())
}

enum Command {
    Render {
        url: Url,
        timeout: Duration,
        user_agent: Option<String>,
        reply: oneshot::Sender<Result<Option<String>, AppError>>,
    },
    WarmUp {
        url: Url,
        timeout: Duration,
        reply: oneshot::Sender<Result<Vec<CookieRecord>, AppError>>,
    },
    Solve {
        url: Url,
        timeout: Duration,
        reply: oneshot::Sender<Result<bool, AppError>>,
    },
}

impl Command {
    /// The caller gave up (timed out or was cancelled) while queued.
    fn reply_closed(&self) -> bool {
        match self {
            Command::Render { reply, .. } => reply.is_closed(),
            Command::WarmUp { reply, .. } => reply.is_closed(),
            Command::Solve { reply, .. } => reply.is_closed(),
        }
    }

    fn url(&self) -> &Url {
        match self {
            Command::Render { url, .. } | Command::WarmUp { url, .. } | Command::Solve { url, .. } => {
                url
            }
        }
    }
}

/// [`RenderFallback`] backed by Chromium over the DevTools protocol.
///
/// One actor task owns the browser and its profile. Clones share the actor
/// and their requests are served one at a time, in arrival order. The
/// headless session starts on first use; an interactive solve swaps it for a
/// headed window on the same profile and the next render relaunches headless.
#[derive(Clone)]
pub struct BrowserRenderer {
    tx: mpsc::Sender<Command>,
}

impl BrowserRenderer {
    pub fn spawn(settings: BrowserSettings) -> Self {
        let (tx, rx) = mpsc::channel(16);
        let actor = Actor {
            settings,
            session: None,
        };
        tokio::spawn(actor.run(rx));
        Self { tx }
    }

    async fn call<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<T, AppError>>) -> Command,
    ) -> Result<T, AppError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(build(reply))
            .await
            .map_err(|_| AppError::RenderUnavailable("browser actor stopped".into()))?;
        rx.await
            .map_err(|_| AppError::RenderUnavailable("browser actor dropped the request".into()))?
    }
}

impl RenderFallback for BrowserRenderer {
    async fn render(
        &self,
        url: &Url,
        timeout: Duration,
        user_agent: Option<&str>,
    ) -> Result<Option<String>, AppError> {
        let user_agent = user_agent.map(str::to_string);
        self.call(|reply| Command::Render {
            url: url.clone(),
            timeout,
            user_agent,
            reply,
        })
        .await
    }

    async fn warm_up_cookies(
        &self,
        url: &Url,
        timeout: Duration,
    ) -> Result<Vec<CookieRecord>, AppError> {
        self.call(|reply| Command::WarmUp {
            url: url.clone(),
            timeout,
            reply,
        })
        .await
    }

    async fn solve_interactively(&self, url: &Url, timeout: Duration) -> Result<bool, AppError> {
        self.call(|reply| Command::Solve {
            url: url.clone(),
            timeout,
            reply,
        })
        .await
    }
}

struct Session {
    browser: Browser,
    handler: JoinHandle<()>,
}

impl Session {
    async fn launch(settings: &BrowserSettings, headless: bool) -> Result<Self, AppError> {
        let mut builder = BrowserConfig::builder()
            .no_sandbox()
            .user_data_dir(&settings.profile_dir)
            .request_timeout(settings.launch_timeout);
        builder = if headless {
            builder.new_headless_mode()
        } else {
            builder.with_head()
        };
        if let Some(bin) = &settings.chrome_binary {
            builder = builder.chrome_executable(bin);
        }

        let config = builder
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-extensions")
            .arg("--disable-popup-blocking")
            .arg("--disable-translate")
            .arg("--no-first-run")
            .build()
            .map_err(|e| AppError::RenderUnavailable(format!("Browser config error: {e}")))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| AppError::RenderUnavailable(format!("Failed to launch browser: {e}")))?;

        // The CDP handler must be polled for the connection to make progress.
        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    tracing::warn!(error = %e, "Browser CDP handler error");
                    break;
                }
            }
        });

        tracing::info!(headless, profile = %settings.profile_dir.display(), "Browser launched");
        Ok(Self { browser, handler })
    }

    async fn shutdown(mut self) {
        if let Err(e) = self.browser.close().await {
            tracing::debug!(error = %e, "Browser close failed");
        }
        let _ = self.browser.wait().await;
        self.handler.abort();
    }
}

struct Actor {
    settings: BrowserSettings,
    session: Option<Session>,
}

impl Actor {
    async fn run(mut self, mut rx: mpsc::Receiver<Command>) {
        while let Some(command) = rx.recv().await {
            if command.reply_closed() {
                tracing::debug!(url = %command.url(), "Skipping browser request abandoned by its caller");
                continue;
            }
            match command {
                Command::Render {
                    url,
                    timeout,
                    user_agent,
                    reply,
                } => {
                    let result = self.render(&url, timeout, user_agent.as_deref()).await;
                    let _ = reply.send(result);
                }
                Command::WarmUp {
                    url,
                    timeout,
                    reply,
                } => {
                    let result = self.warm_up(&url, timeout).await;
                    let _ = reply.send(result);
                }
                Command::Solve {
                    url,
                    timeout,
                    mut reply,
                } => {
                    let result = self.solve(&url, timeout, &mut reply).await;
                    let _ = reply.send(result);
                }
            }
        }
        if let Some(session) = self.session.take() {
            session.shutdown().await;
        }
        tracing::debug!("Browser actor stopped");
    }

    async fn headless(&mut self) -> Result<&Browser, AppError> {
        if self.session.is_none() {
            self.session = Some(Session::launch(&self.settings, true).await?);
        }
        match &self.session {
            Some(session) => Ok(&session.browser),
            None => Err(AppError::RenderUnavailable("browser not running".into())),
        }
    }

    async fn render(
        &mut self,
        url: &Url,
        timeout: Duration,
        user_agent: Option<&str>,
    ) -> Result<Option<String>, AppError> {
        let page = self
            .headless()
            .await?
            .new_page("about:blank")
            .await
            .map_err(cdp)?;

        let result = tokio::time::timeout(timeout, capture(&page, url, user_agent)).await;
        let _ = page.close().await;

        match result {
            Ok(Ok(html)) if challenge::body_marker(&html).is_some() => {
                tracing::debug!(%url, "Rendered page is still a challenge");
                Ok(None)
            }
            Ok(Ok(html)) => Ok(Some(html)),
            Ok(Err(e)) => Err(e),
            Err(_) => {
                tracing::debug!(%url, timeout_secs = timeout.as_secs(), "Render timed out");
                Ok(None)
            }
        }
    }

    async fn warm_up(&mut self, url: &Url, timeout: Duration) -> Result<Vec<CookieRecord>, AppError> {
        let page = self
            .headless()
            .await?
            .new_page("about:blank")
            .await
            .map_err(cdp)?;

        let origin = origin_of(url);
        let visit = async {
            for target in [origin.as_str(), url.as_str()] {
                page.goto(target).await.map_err(cdp)?;
                page.find_element("body").await.map_err(cdp)?;
            }
            page.get_cookies().await.map_err(cdp)
        };
        let result = tokio::time::timeout(timeout, visit).await;
        let _ = page.close().await;

        match result {
            Ok(cookies) => Ok(cookies?.iter().map(to_record).collect()),
            Err(_) => Err(AppError::Timeout(timeout.as_secs())),
        }
    }

    /// Headed window on the shared profile; resolves once a persistent
    /// clearance cookie shows up, the timeout passes, or the caller goes
    /// away.
    async fn solve(
        &mut self,
        url: &Url,
        timeout: Duration,
        reply: &mut oneshot::Sender<Result<bool, AppError>>,
    ) -> Result<bool, AppError> {
        // The profile can only be open in one browser at a time.
        if let Some(session) = self.session.take() {
            session.shutdown().await;
        }

        let headed = Session::launch(&self.settings, false).await?;
        let outcome = wait_for_clearance(&headed.browser, url, timeout, reply).await;
        headed.shutdown().await;
        outcome
    }
}

async fn capture(page: &Page, url: &Url, user_agent: Option<&str>) -> Result<String, AppError> {
    if let Some(ua) = user_agent {
        page.set_user_agent(SetUserAgentOverrideParams::new(ua))
            .await
            .map_err(cdp)?;
    }
    page.goto(url.as_str()).await.map_err(cdp)?;
    page.find_element("body").await.map_err(cdp)?;

    let deadline = Instant::now() + SETTLE_WINDOW;
    loop {
        let ready = page
            .evaluate(READY_PROBE)
            .await
            .map_err(cdp)?
            .into_value::<bool>()
            .unwrap_or(false);
        if ready || Instant::now() >= deadline {
            break;
        }
        tokio::time::sleep(SETTLE_POLL).await;
    }

    page.evaluate(SCROLL_NUDGE).await.map_err(cdp)?;
    tokio::time::sleep(Duration::from_millis(300)).await;

    Ok(page
        .evaluate(OUTER_HTML)
        .await
        .map_err(cdp)?
        .into_value::<String>()?)
}

async fn wait_for_clearance(
    browser: &Browser,
    url: &Url,
    timeout: Duration,
    reply: &mut oneshot::Sender<Result<bool, AppError>>,
) -> Result<bool, AppError> {
    let page = browser.new_page(origin_of(url).as_str()).await.map_err(cdp)?;
    page.goto(url.as_str()).await.map_err(cdp)?;
    tracing::info!(%url, timeout_secs = timeout.as_secs(), "Waiting for the challenge to be solved");

    let deadline = Instant::now() + timeout;
    let solved = loop {
        if reply.is_closed() {
            tracing::info!(%url, "Interactive solve cancelled");
            break false;
        }
        if Instant::now() >= deadline {
            tracing::info!(%url, "Interactive solve timed out");
            break false;
        }
        match page.get_cookies().await {
            Ok(cookies) if cookies.iter().any(is_clearance) => break true,
            Ok(_) => {}
            Err(e) => tracing::debug!(error = %e, "Cookie poll failed"),
        }
        tokio::time::sleep(SOLVE_POLL).await;
    };

    let _ = page.close().await;
    if solved {
        tracing::info!(%url, "Clearance cookie obtained");
    }
    Ok(solved)
}

fn is_clearance(cookie: &Cookie) -> bool {
    cookie.name == CLEARANCE_COOKIE && !cookie.session
}

fn to_record(cookie: &Cookie) -> CookieRecord {
    CookieRecord {
        name: cookie.name.clone(),
        value: cookie.value.clone(),
        domain: cookie.domain.clone(),
        path: cookie.path.clone(),
        expires: expiry(cookie.expires, cookie.session),
        secure: cookie.secure,
        http_only: cookie.http_only,
    }
}

fn expiry(expires: f64, session: bool) -> Option<DateTime<Utc>> {
    if session || !expires.is_finite() || expires <= 0.0 {
        return None;
    }
    DateTime::from_timestamp(expires as i64, 0)
}

fn cdp(e: CdpError) -> AppError {
    AppError::Generic(format!("Browser: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_cookies_have_no_expiry() {
        assert_eq!(expiry(-1.0, true), None);
        assert_eq!(expiry(0.0, false), None);
        assert_eq!(
            expiry(1_767_225_600.0, false).map(|d| d.timestamp()),
            Some(1_767_225_600)
        );
    }

    #[test]
    fn abandoned_requests_are_detected() {
        let url = Url::parse("https://site.com/manga/foo/").unwrap();

        let (reply, rx) = oneshot::channel();
        let live = Command::Render {
            url: url.clone(),
            timeout: Duration::from_secs(1),
            user_agent: None,
            reply,
        };
        assert!(!live.reply_closed());
        drop(rx);
        assert!(live.reply_closed());

        let (reply, rx) = oneshot::channel();
        drop(rx);
        let warm_up = Command::WarmUp {
            url,
            timeout: Duration::from_secs(1),
            reply,
        };
        assert!(warm_up.reply_closed());
        assert_eq!(warm_up.url().host_str(), Some("site.com"));
    }

    #[test]
    fn settings_profile_override() {
        let s = BrowserSettings::default().with_profile_dir("/tmp/cw-profile");
        assert_eq!(s.profile_dir, PathBuf::from("/tmp/cw-profile"));
    }
}
