use chapterwatch_core::error::AppError;
use chapterwatch_core::models::TrackedSeries;
use chapterwatch_core::traits::SeriesStore;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

/// Ordered tracked-series list in SQLite.
#[derive(Clone)]
pub struct SeriesRepository {
    pool: SqlitePool,
}

impl SeriesRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

// -- Internal row type for sqlx deserialization --

#[derive(sqlx::FromRow)]
struct SeriesRow {
    title: String,
    url: String,
    chapter: i64,
    has_new_chapter: bool,
    chapter_url_template: Option<String>,
    chapter_selector: Option<String>,
    chapter_regex: Option<String>,
    last_checked_at: Option<DateTime<Utc>>,
}

impl From<SeriesRow> for TrackedSeries {
    fn from(row: SeriesRow) -> Self {
        TrackedSeries {
            title: row.title,
            url: row.url,
            chapter: u32::try_from(row.chapter).unwrap_or(0),
            has_new_chapter: row.has_new_chapter,
            chapter_url_template: row.chapter_url_template,
            chapter_selector: row.chapter_selector,
            chapter_regex: row.chapter_regex,
            last_checked_at: row.last_checked_at,
        }
    }
}

impl SeriesStore for SeriesRepository {
    async fn load_series(&self) -> Result<Vec<TrackedSeries>, AppError> {
        let rows = sqlx::query_as::<_, SeriesRow>(
            r#"
            SELECT title, url, chapter, has_new_chapter, chapter_url_template,
                   chapter_selector, chapter_regex, last_checked_at
            FROM tracked_series
            ORDER BY position ASC, id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    /// Rewrite the whole list in one transaction; slice order becomes the
    /// stored order.
    async fn save_series(&self, series: &[TrackedSeries]) -> Result<(), AppError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        sqlx::query("DELETE FROM tracked_series")
            .execute(&mut *tx)
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        for (position, entry) in series.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO tracked_series (
                    position, title, url, chapter, has_new_chapter, chapter_url_template,
                    chapter_selector, chapter_regex, last_checked_at
                )
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(position as i64)
            .bind(&entry.title)
            .bind(&entry.url)
            .bind(i64::from(entry.chapter))
            .bind(entry.has_new_chapter)
            .bind(&entry.chapter_url_template)
            .bind(&entry.chapter_selector)
            .bind(&entry.chapter_regex)
            .bind(entry.last_checked_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                AppError::DatabaseError(format!("Failed to save '{}': {e}", entry.url))
            })?;
        }

        tx.commit()
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        tracing::debug!(count = series.len(), "Tracked series saved");
        Ok(())
    }
}
