use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use url::Url;

use chapterwatch_client::{
    MetadataExtractor, ReqwestTransport, ScraperChapterExtractor, resolve_chapter_link,
};
use chapterwatch_core::grammar::compile_custom;
use chapterwatch_core::models::ChapterCandidate;
use chapterwatch_core::traits::{ChapterExtractor, HostListStore, RenderFallback, SeriesStore};
use chapterwatch_core::{
    ChapterTemplate, FetchConfig, FetchOrchestrator, HostStrategyStore, HostThrottle, Prober,
    ScanConfig, TrackedSeries, TracingScanReporter, UpdateScanner, normalize_url,
};
use chapterwatch_store::{Database, HostRepository, StoreConfig};

#[derive(Parser)]
#[command(name = "chapterwatch", version, about = "Track new chapters of web serials")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check every tracked series for a new chapter
    Scan {
        /// Allow a human-assisted challenge solve in a visible browser window
        #[arg(long, default_value_t = false)]
        interactive: bool,

        /// Per-series time limit in seconds
        #[arg(long, env = "CHAPTERWATCH_ENTRY_TIMEOUT_SECS")]
        entry_timeout: Option<u64>,

        /// Skip the cheap next-chapter probe and always fetch the series page
        #[arg(long, default_value_t = false)]
        no_probe: bool,
    },

    /// Fetch a page through the tier pipeline and print its HTML
    Fetch {
        #[arg(short, long)]
        url: String,
    },

    /// Check whether a chapter URL exists
    Probe {
        /// Chapter URL template containing `$chapter`
        #[arg(short, long)]
        template: String,

        #[arg(short, long)]
        chapter: f64,
    },

    /// Fetch a series page and report its latest chapter; on a reader page
    /// without a chapter list, report the chapter it shows
    Extract {
        #[arg(short, long)]
        url: String,

        /// CSS selector for the chapter list
        #[arg(short, long)]
        selector: Option<String>,

        /// Regex whose last non-empty group is the chapter number
        #[arg(short, long)]
        regex: Option<String>,
    },

    /// Start tracking a series
    Add {
        #[arg(long)]
        title: String,

        #[arg(short, long)]
        url: String,

        #[arg(long)]
        template: Option<String>,

        #[arg(long)]
        selector: Option<String>,

        #[arg(long)]
        regex: Option<String>,

        /// Last chapter already read
        #[arg(long, default_value_t = 0)]
        chapter: u32,
    },

    /// Show tracked series
    List,

    /// Stop tracking a series
    Remove {
        #[arg(short, long)]
        url: String,
    },

    /// Mark a series' new chapter as seen
    Ack {
        #[arg(short, long)]
        url: String,

        /// Chapter URL that was read; raises the stored chapter when it is newer
        #[arg(long)]
        visited: Option<String>,
    },

    /// Print the URL of the next unread chapter
    Open {
        #[arg(short, long)]
        url: String,
    },

    /// List hosts that need the browser tier
    Hosts,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("chapterwatch=info".parse()?))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    #[cfg(feature = "browser")]
    let renderer = chapterwatch_client::BrowserRenderer::spawn(
        chapterwatch_client::BrowserSettings::from_env(),
    );
    #[cfg(not(feature = "browser"))]
    let renderer = chapterwatch_core::NoRenderer;

    run(cli.command, renderer).await
}

async fn run<R: RenderFallback + 'static>(command: Commands, renderer: R) -> Result<()> {
    let db = connect_db().await?;

    match command {
        Commands::Scan {
            interactive,
            entry_timeout,
            no_probe,
        } => {
            let mut config = FetchConfig::from_env()?;
            let interactive = config.interactive || interactive;
            config = config.with_interactive(interactive);
            let mut scan_config = ScanConfig::default().with_probe(!no_probe);
            if let Some(secs) = entry_timeout {
                scan_config = scan_config.with_entry_timeout(Duration::from_secs(secs));
            }
            cmd_scan(&db, renderer, config, scan_config).await
        }
        Commands::Fetch { url } => cmd_fetch(&db, renderer, &url).await,
        Commands::Probe { template, chapter } => cmd_probe(&template, chapter).await,
        Commands::Extract {
            url,
            selector,
            regex,
        } => cmd_extract(&db, renderer, &url, selector.as_deref(), regex.as_deref()).await,
        Commands::Add {
            title,
            url,
            template,
            selector,
            regex,
            chapter,
        } => {
            let mut entry = TrackedSeries::new(title, url).with_chapter(chapter);
            entry.chapter_url_template = template;
            entry.chapter_selector = selector;
            entry.chapter_regex = regex;
            cmd_add(&db, entry).await
        }
        Commands::List => cmd_list(&db).await,
        Commands::Remove { url } => cmd_remove(&db, &url).await,
        Commands::Ack { url, visited } => cmd_ack(&db, &url, visited.as_deref()).await,
        Commands::Open { url } => cmd_open(&db, renderer, &url).await,
        Commands::Hosts => cmd_hosts(&db).await,
    }
}

/// Open the SQLite database from DATABASE_URL and apply migrations.
async fn connect_db() -> Result<Database> {
    let config = StoreConfig::from_env()?;
    let db = Database::connect(&config)
        .await
        .with_context(|| format!("Failed to open database at {}", config.url))?;
    db.migrate().await.context("Failed to run migrations")?;
    Ok(db)
}

async fn orchestrator<R: RenderFallback>(
    db: &Database,
    renderer: R,
    config: FetchConfig,
) -> Result<FetchOrchestrator<ReqwestTransport, R, HostRepository>> {
    let transport = ReqwestTransport::with_timeout(config.request_timeout)
        .context("Failed to create HTTP client")?;
    let strategies = HostStrategyStore::new(db.host_repo());
    let loaded = strategies
        .load()
        .await
        .context("Failed to load render-required hosts")?;
    tracing::debug!(hosts = loaded, "Host strategies loaded");
    Ok(FetchOrchestrator::new(transport, renderer, strategies, config))
}

async fn fetch_html<R: RenderFallback>(
    orchestrator: &FetchOrchestrator<ReqwestTransport, R, HostRepository>,
    url: &Url,
) -> Result<String> {
    let (html, tier) = orchestrator
        .fetch(url)
        .await
        .into_result()
        .with_context(|| format!("Failed to fetch {url}"))?;
    tracing::info!(%url, %tier, bytes = html.len(), "Fetched");
    Ok(html)
}

async fn cmd_scan<R: RenderFallback + 'static>(
    db: &Database,
    renderer: R,
    config: FetchConfig,
    scan_config: ScanConfig,
) -> Result<()> {
    let orchestrator = orchestrator(db, renderer, config).await?;
    let scanner = UpdateScanner::new(orchestrator, ScraperChapterExtractor, scan_config);

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling scan");
            on_signal.cancel();
        }
    });

    let report = scanner
        .run_once(&db.series_repo(), &cancel, &TracingScanReporter)
        .await
        .context("Scan failed")?;

    let mut any = false;
    for entry in report.advanced() {
        any = true;
        println!("{}\t{}", entry.title, entry.url);
    }
    if !any {
        println!("No new chapters.");
    }

    let failed = report.failed().count();
    if failed > 0 {
        tracing::warn!(failed, "Some series could not be checked");
    }
    Ok(())
}

async fn cmd_fetch<R: RenderFallback>(db: &Database, renderer: R, raw: &str) -> Result<()> {
    let url = normalize_url(raw)?;
    let orchestrator = orchestrator(db, renderer, FetchConfig::from_env()?).await?;
    let html = fetch_html(&orchestrator, &url).await?;
    println!("{html}");
    Ok(())
}

async fn cmd_probe(template: &str, chapter: f64) -> Result<()> {
    let template = ChapterTemplate::parse(template)?;
    let config = FetchConfig::from_env()?;
    let transport = ReqwestTransport::with_timeout(config.request_timeout)
        .context("Failed to create HTTP client")?;
    let prober = Prober::new(
        transport,
        HostThrottle::new(config.throttle.clone()),
        config.request_timeout,
    );

    let url = template.render_url(chapter)?;
    let result = prober.probe_chapter(&template, chapter).await?;
    if result.exists() {
        println!("exists\t{url}");
    } else {
        println!("missing\t{url}");
    }
    Ok(())
}

async fn cmd_extract<R: RenderFallback>(
    db: &Database,
    renderer: R,
    raw: &str,
    selector: Option<&str>,
    regex: Option<&str>,
) -> Result<()> {
    let url = normalize_url(raw)?;
    let regex = regex
        .map(compile_custom)
        .transpose()
        .context("Invalid --regex")?;

    let orchestrator = orchestrator(db, renderer, FetchConfig::from_env()?).await?;
    let html = fetch_html(&orchestrator, &url).await?;

    match detect_chapter(&html, &url, selector, regex.as_ref()) {
        Some(candidate) => {
            println!("{}", candidate.value);
            tracing::info!(origin = %candidate.origin, rule = %candidate.rule, "Chapter found");
            Ok(())
        }
        None => bail!("No chapter found on {url}"),
    }
}

/// The chapter list first; a page without one is read as a single chapter
/// through its metadata.
fn detect_chapter(
    html: &str,
    url: &Url,
    selector: Option<&str>,
    regex: Option<&regex::Regex>,
) -> Option<ChapterCandidate> {
    ScraperChapterExtractor
        .extract(html, Some(url), selector, regex)
        .or_else(|| {
            let hit = MetadataExtractor::new().detect(html, Some(url))?;
            tracing::debug!(title = %hit.title, "No chapter list, using page metadata");
            Some(hit.candidate)
        })
}

async fn cmd_add(db: &Database, mut entry: TrackedSeries) -> Result<()> {
    let validated = entry
        .validate()
        .with_context(|| format!("Cannot track '{}'", entry.title))?;
    entry.url = validated.url.to_string();

    let repo = db.series_repo();
    let mut series = repo.load_series().await?;
    if find_series(&series, &entry.url).is_some() {
        bail!("{} is already tracked", entry.url);
    }

    println!("Tracking {} at chapter {}", entry.title, entry.chapter);
    series.push(entry);
    repo.save_series(&series).await?;
    Ok(())
}

async fn cmd_list(db: &Database) -> Result<()> {
    let series = db.series_repo().load_series().await?;
    if series.is_empty() {
        println!("No tracked series.");
        return Ok(());
    }

    for entry in &series {
        let flag = if entry.has_new_chapter { "NEW" } else { "" };
        let checked = entry
            .last_checked_at
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "never".to_string());
        println!(
            "{:>5} {:3} {}  ({}, checked {})",
            entry.chapter, flag, entry.title, entry.url, checked
        );
    }
    println!("\nTotal: {} series", series.len());
    Ok(())
}

async fn cmd_remove(db: &Database, raw: &str) -> Result<()> {
    let repo = db.series_repo();
    let mut series = repo.load_series().await?;
    let Some(index) = find_series(&series, raw) else {
        bail!("{raw} is not tracked");
    };
    let removed = series.remove(index);
    repo.save_series(&series).await?;
    println!("Stopped tracking {}", removed.title);
    Ok(())
}

async fn cmd_ack(db: &Database, raw: &str, visited: Option<&str>) -> Result<()> {
    let repo = db.series_repo();
    let mut series = repo.load_series().await?;
    let Some(index) = find_series(&series, raw) else {
        bail!("{raw} is not tracked");
    };

    let entry = &mut series[index];
    if entry.acknowledge(visited) {
        println!("{} now at chapter {}", entry.title, entry.chapter);
    } else {
        println!("{} acknowledged", entry.title);
    }
    repo.save_series(&series).await?;
    Ok(())
}

/// Link to the chapter after the stored one: the series page's own link
/// first, then the template, then the series page itself.
async fn cmd_open<R: RenderFallback>(db: &Database, renderer: R, raw: &str) -> Result<()> {
    let series = db.series_repo().load_series().await?;
    let Some(index) = find_series(&series, raw) else {
        bail!("{raw} is not tracked");
    };
    let entry = &series[index];
    let validated = entry.validate()?;
    let next = f64::from(entry.chapter) + 1.0;

    let orchestrator = orchestrator(db, renderer, FetchConfig::from_env()?).await?;
    let from_page = match fetch_html(&orchestrator, &validated.url).await {
        Ok(html) => resolve_chapter_link(&html, &validated.url, next),
        Err(e) => {
            tracing::warn!(error = %e, "Series page unavailable, falling back to template");
            None
        }
    };

    let target = match (from_page, &validated.template) {
        (Some(url), _) => url,
        (None, Some(template)) => template.render_url(next)?,
        (None, None) => validated.url.clone(),
    };
    println!("{target}");
    Ok(())
}

async fn cmd_hosts(db: &Database) -> Result<()> {
    let hosts = db.host_repo().load_hosts().await?;
    if hosts.is_empty() {
        println!("No render-required hosts.");
    }
    for host in hosts {
        println!("{host}");
    }
    Ok(())
}

/// Index of the entry whose URL matches `raw` after normalization.
fn find_series(series: &[TrackedSeries], raw: &str) -> Option<usize> {
    let wanted = normalize_url(raw).ok()?;
    series.iter().position(|s| {
        normalize_url(&s.url)
            .map(|u| u == wanted)
            .unwrap_or(false)
    })
}

#[cfg(test)]
mod tests {
    use chapterwatch_core::models::CandidateOrigin;
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn scan_flags_parse() {
        let cli = Cli::try_parse_from([
            "chapterwatch",
            "scan",
            "--interactive",
            "--entry-timeout",
            "60",
        ])
        .unwrap();
        match cli.command {
            Commands::Scan {
                interactive,
                entry_timeout,
                no_probe,
            } => {
                assert!(interactive);
                assert_eq!(entry_timeout, Some(60));
                assert!(!no_probe);
            }
            _ => panic!("expected scan"),
        }
    }

    #[test]
    fn reader_page_falls_back_to_metadata() {
        let url = Url::parse("https://site.com/read?id=9").unwrap();
        let html = r#"<html><head><title>Foo</title>
            <meta property="og:title" content="Foo - Chapter 23"></head>
            <body><img src="page1.jpg"></body></html>"#;

        let candidate = detect_chapter(html, &url, None, None).unwrap();
        assert_eq!(candidate.value, 23.0);
        assert_eq!(candidate.origin, CandidateOrigin::MetaTitle);
    }

    #[test]
    fn chapter_list_wins_over_metadata() {
        let url = Url::parse("https://site.com/manga/foo/").unwrap();
        let html = r#"<html><head><title>Foo Chapter 2</title></head><body>
            <ul class="chapter-list">
              <li><a href="https://site.com/manga/foo/chapter-14/">Chapter 14</a></li>
              <li><a href="https://site.com/manga/foo/chapter-13/">Chapter 13</a></li>
            </ul></body></html>"#;

        let candidate = detect_chapter(html, &url, None, None).unwrap();
        assert_eq!(candidate.value, 14.0);
        assert_ne!(candidate.origin, CandidateOrigin::MetaTitle);
        assert_eq!(detect_chapter("<p>nothing</p>", &url, None, None), None);
    }

    #[test]
    fn find_series_normalizes_urls() {
        let series = vec![
            TrackedSeries::new("A", "https://site.com/manga/a/"),
            TrackedSeries::new("B", "https://site.com/manga/b/"),
        ];
        assert_eq!(find_series(&series, "site.com/manga/b/"), Some(1));
        assert_eq!(find_series(&series, "https://site.com/manga/c/"), None);
        assert_eq!(find_series(&series, "not a url"), None);
    }
}
