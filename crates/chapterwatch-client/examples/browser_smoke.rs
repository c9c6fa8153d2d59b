/// Smoke-test for `BrowserRenderer`.
///
/// Spawns the browser actor, renders a page headless, harvests its cookies,
/// and runs the chapter extractor over the result.
///
/// Run with:
///   cargo run -p chapterwatch-client --example browser_smoke --features browser -- <url>
use std::time::Duration;

use chapterwatch_client::{BrowserRenderer, BrowserSettings, ScraperChapterExtractor};
use chapterwatch_core::traits::{ChapterExtractor, RenderFallback};
use url::Url;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let raw = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "https://example.com".to_string());
    let url = Url::parse(&raw)?;

    let renderer = BrowserRenderer::spawn(BrowserSettings::from_env());

    println!("Rendering {url} …");
    let Some(html) = renderer.render(&url, Duration::from_secs(45), None).await? else {
        anyhow::bail!("render produced nothing usable");
    };
    assert!(
        html.len() > 200,
        "HTML suspiciously short ({} bytes)",
        html.len()
    );
    println!("OK: got {} bytes of rendered HTML", html.len());

    let cookies = renderer
        .warm_up_cookies(&url, Duration::from_secs(45))
        .await?;
    println!("Warm-up returned {} cookies", cookies.len());

    match ScraperChapterExtractor.extract(&html, Some(&url), None, None) {
        Some(candidate) => println!("Latest chapter: {candidate}"),
        None => println!("No chapter links on this page"),
    }
    Ok(())
}
