use chapterwatch_core::error::AppError;
use chapterwatch_core::traits::HostListStore;
use chapterwatch_core::util::normalize_host;
use chrono::Utc;
use sqlx::SqlitePool;

/// Render-required host list in SQLite.
#[derive(Clone)]
pub struct HostRepository {
    pool: SqlitePool,
}

impl HostRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

impl HostListStore for HostRepository {
    async fn load_hosts(&self) -> Result<Vec<String>, AppError> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT host FROM render_required_hosts ORDER BY host")
                .fetch_all(&self.pool)
                .await
                .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(rows.into_iter().map(|(host,)| host).collect())
    }

    /// Insert every host not stored yet. Nothing is ever deleted and hosts
    /// already present keep their original `marked_at`, so an older snapshot
    /// written late cannot drop a host another save added.
    async fn save_hosts(&self, hosts: &[String]) -> Result<(), AppError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        let now = Utc::now();
        let mut inserted = 0u64;
        for host in hosts {
            let host = normalize_host(host);
            if host.is_empty() {
                continue;
            }
            inserted += sqlx::query(
                "INSERT INTO render_required_hosts (host, marked_at) VALUES (?, ?) \
                 ON CONFLICT(host) DO NOTHING",
            )
            .bind(&host)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?
            .rows_affected();
        }

        tx.commit()
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        tracing::debug!(inserted, "Render-required hosts saved");
        Ok(())
    }
}
