use chapterwatch_core::HostStrategyStore;
use chapterwatch_core::models::HostStrategy;
use chapterwatch_core::traits::HostListStore;

use crate::common::setup_test_db;

#[tokio::test]
async fn empty_database_has_no_hosts() {
    let db = setup_test_db().await;
    assert!(db.host_repo().load_hosts().await.unwrap().is_empty());
}

#[tokio::test]
async fn save_normalizes_and_sorts() {
    let db = setup_test_db().await;
    let repo = db.host_repo();

    repo.save_hosts(&["Site.COM.".into(), "alpha.net".into(), "  ".into()])
        .await
        .unwrap();

    assert_eq!(
        repo.load_hosts().await.unwrap(),
        vec!["alpha.net".to_string(), "site.com".to_string()]
    );
}

#[tokio::test]
async fn stale_snapshot_never_drops_hosts() {
    let db = setup_test_db().await;
    let repo = db.host_repo();

    repo.save_hosts(&["a.com".into(), "b.com".into()]).await.unwrap();
    repo.save_hosts(&["a.com".into()]).await.unwrap();

    assert_eq!(
        repo.load_hosts().await.unwrap(),
        vec!["a.com".to_string(), "b.com".to_string()]
    );
}

#[tokio::test]
async fn marked_at_survives_resave() {
    let db = setup_test_db().await;
    let repo = db.host_repo();
    repo.save_hosts(&["a.com".into()]).await.unwrap();

    let (first,): (String,) =
        sqlx::query_as("SELECT marked_at FROM render_required_hosts WHERE host = 'a.com'")
            .fetch_one(db.pool())
            .await
            .unwrap();

    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    repo.save_hosts(&["a.com".into(), "b.com".into()]).await.unwrap();

    let (second,): (String,) =
        sqlx::query_as("SELECT marked_at FROM render_required_hosts WHERE host = 'a.com'")
            .fetch_one(db.pool())
            .await
            .unwrap();
    assert_eq!(first, second);
}

#[tokio::test]
async fn strategy_store_round_trips_through_sqlite() {
    let db = setup_test_db().await;

    let store = HostStrategyStore::new(db.host_repo());
    assert_eq!(store.load().await.unwrap(), 0);
    store.mark_render_required("WWW.Site.com").await;
    assert_eq!(store.strategy_for("www.site.com"), HostStrategy::RenderRequired);

    let reloaded = HostStrategyStore::new(db.host_repo());
    assert_eq!(reloaded.load().await.unwrap(), 1);
    assert!(reloaded.is_render_required("www.site.com"));
    assert_eq!(reloaded.strategy_for("other.com"), HostStrategy::Direct);
}

#[tokio::test]
async fn concurrent_marks_both_survive_reload() {
    let db = setup_test_db().await;
    let store = HostStrategyStore::new(db.host_repo());

    let (a, b) = tokio::join!(
        store.mark_render_required("a.example"),
        store.mark_render_required("b.example"),
    );
    assert!(a && b);

    let reloaded = HostStrategyStore::new(db.host_repo());
    assert_eq!(reloaded.load().await.unwrap(), 2);
    assert!(reloaded.is_render_required("a.example"));
    assert!(reloaded.is_render_required("b.example"));
}
