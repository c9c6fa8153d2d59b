use chapterwatch_store::Database;

/// A fresh in-memory database with every migration applied.
///
/// Each call gets its own database; nothing is shared between tests.
pub async fn setup_test_db() -> Database {
    Database::in_memory()
        .await
        .expect("Failed to open in-memory database")
}
