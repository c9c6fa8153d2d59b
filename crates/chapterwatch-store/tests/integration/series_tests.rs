use chapterwatch_core::models::TrackedSeries;
use chapterwatch_core::traits::SeriesStore;
use chrono::{TimeZone, Utc};

use crate::common::setup_test_db;

fn sample() -> Vec<TrackedSeries> {
    vec![
        TrackedSeries::new("Zeta", "https://site.com/manga/zeta/")
            .with_chapter(40)
            .with_template("https://site.com/manga/zeta/chapter-$chapter/"),
        TrackedSeries::new("Alpha", "https://other.net/series/alpha")
            .with_chapter(3)
            .with_selector("ul.chapters a")
            .with_regex(r"Ep\.(\d+)"),
    ]
}

#[tokio::test]
async fn save_and_load_preserves_order_and_fields() {
    let db = setup_test_db().await;
    let repo = db.series_repo();

    let mut series = sample();
    series[1].has_new_chapter = true;
    series[1].last_checked_at = Some(Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap());

    repo.save_series(&series).await.unwrap();
    let loaded = repo.load_series().await.unwrap();

    assert_eq!(loaded, series);
    assert_eq!(loaded[0].title, "Zeta");
}

#[tokio::test]
async fn save_rewrites_the_whole_list() {
    let db = setup_test_db().await;
    let repo = db.series_repo();

    repo.save_series(&sample()).await.unwrap();

    let mut reordered = sample();
    reordered.reverse();
    reordered.pop();
    repo.save_series(&reordered).await.unwrap();

    let loaded = repo.load_series().await.unwrap();
    assert_eq!(loaded.len(), 1);
    assert_eq!(loaded[0].title, "Alpha");
}

#[tokio::test]
async fn duplicate_urls_roll_back_the_save() {
    let db = setup_test_db().await;
    let repo = db.series_repo();
    repo.save_series(&sample()).await.unwrap();

    let mut dupes = sample();
    dupes.push(TrackedSeries::new("Again", "https://site.com/manga/zeta/"));
    let err = repo.save_series(&dupes).await.unwrap_err();
    assert!(err.to_string().contains("https://site.com/manga/zeta/"));

    // The earlier list is untouched.
    assert_eq!(repo.load_series().await.unwrap(), sample());
}

#[tokio::test]
async fn empty_save_clears() {
    let db = setup_test_db().await;
    let repo = db.series_repo();
    repo.save_series(&sample()).await.unwrap();
    repo.save_series(&[]).await.unwrap();
    assert!(repo.load_series().await.unwrap().is_empty());
}
