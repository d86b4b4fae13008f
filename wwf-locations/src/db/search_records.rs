//! Search history
//!
//! Write-only from the pipeline; read back for the "recently searched" list.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{Row, SqlitePool};
use wwf_common::{Error, Result};

use crate::services::pipeline::SearchRecorder;

/// Longest stored title
pub const MAX_TITLE_CHARS: usize = 80;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchRecord {
    pub movie_id: String,
    pub title: String,
    pub searched_at: DateTime<Utc>,
}

/// Append a search; the title is cut to [`MAX_TITLE_CHARS`]
pub async fn record_search(pool: &SqlitePool, movie_id: &str, title: &str) -> Result<()> {
    let movie_id = movie_id.trim();
    if movie_id.is_empty() {
        return Err(Error::InvalidInput("movie id is required".to_string()));
    }
    let title: String = title.trim().chars().take(MAX_TITLE_CHARS).collect();

    sqlx::query("INSERT INTO search_records (movie_id, title, searched_at) VALUES (?, ?, ?)")
        .bind(movie_id)
        .bind(&title)
        .bind(Utc::now().to_rfc3339())
        .execute(pool)
        .await?;

    Ok(())
}

/// Latest search per movie id, newest first
pub async fn recent_searches(pool: &SqlitePool, limit: u32) -> Result<Vec<SearchRecord>> {
    let rows = sqlx::query(
        r#"
        SELECT s.movie_id, s.title, s.searched_at
        FROM search_records s
        WHERE s.id = (
            SELECT MAX(id) FROM search_records WHERE movie_id = s.movie_id
        )
        ORDER BY s.id DESC
        LIMIT ?
        "#,
    )
    .bind(i64::from(limit))
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| {
            let searched_at: String = row.get("searched_at");
            let searched_at = DateTime::parse_from_rfc3339(&searched_at)
                .map_err(|e| Error::Internal(format!("Invalid searched_at '{}': {}", searched_at, e)))?
                .with_timezone(&Utc);
            Ok(SearchRecord {
                movie_id: row.get("movie_id"),
                title: row.get("title"),
                searched_at,
            })
        })
        .collect()
}

/// SQLite-backed [`SearchRecorder`]
#[derive(Clone)]
pub struct SqliteSearchLog {
    pool: SqlitePool,
}

impl SqliteSearchLog {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SearchRecorder for SqliteSearchLog {
    async fn record_search(&self, movie_id: &str, title: &str) -> Result<()> {
        record_search(&self.pool, movie_id, title).await
    }
}
