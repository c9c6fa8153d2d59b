use chapterwatch_core::models::TrackedSeries;
use chapterwatch_core::traits::{HostListStore, SeriesStore};
use chapterwatch_store::{Database, StoreConfig};

#[tokio::test]
async fn file_database_is_created_and_survives_reconnect() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("watch.db");
    let config = StoreConfig::new(format!("sqlite://{}", path.display()));

    let db = Database::connect(&config).await.unwrap();
    db.migrate().await.unwrap();
    db.series_repo()
        .save_series(&[TrackedSeries::new("Foo", "https://site.com/manga/foo/").with_chapter(9)])
        .await
        .unwrap();
    db.host_repo().save_hosts(&["site.com".into()]).await.unwrap();
    db.pool().close().await;
    assert!(path.exists());

    let reopened = Database::connect(&config).await.unwrap();
    reopened.migrate().await.unwrap();
    let series = reopened.series_repo().load_series().await.unwrap();
    assert_eq!(series.len(), 1);
    assert_eq!(series[0].chapter, 9);
    assert_eq!(
        reopened.host_repo().load_hosts().await.unwrap(),
        vec!["site.com".to_string()]
    );
}

#[tokio::test]
async fn migrations_are_idempotent() {
    let db = Database::in_memory().await.unwrap();
    db.migrate().await.unwrap();
}
