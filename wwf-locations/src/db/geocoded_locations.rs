//! Pre-geocoded location store
//!
//! Rows are written by an offline geocoding job and read back per title.
//! Only rows with both coordinates are returned, in insertion order.

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use wwf_common::Result;

use crate::services::locations_fetcher::GeocodedStore;
use crate::types::{GeocodedLocation, TitleId, NO_DESCRIPTION};

/// Plottable rows for a title, ordered by id
pub async fn load_geocoded_locations(
    pool: &SqlitePool,
    title_id: &TitleId,
) -> Result<Vec<GeocodedLocation>> {
    let rows = sqlx::query(
        r#"
        SELECT location_value, description, lon, lat, bbox, place_type, formatted_address
        FROM geocoded_locations
        WHERE imdb_id = ? AND lat IS NOT NULL AND lon IS NOT NULL
        ORDER BY id
        "#,
    )
    .bind(title_id.as_str())
    .fetch_all(pool)
    .await?;

    let locations = rows
        .iter()
        .map(|row| {
            let place: String = row.get("location_value");
            let desc: Option<String> = row.get("description");
            let bbox: Option<String> = row.get("bbox");
            let formatted: Option<String> = row.get("formatted_address");

            GeocodedLocation {
                desc: desc
                    .filter(|d| !d.trim().is_empty())
                    .unwrap_or_else(|| NO_DESCRIPTION.to_string()),
                lon: row.get("lon"),
                lat: row.get("lat"),
                bbox: bbox.as_deref().and_then(parse_bbox),
                place_type: row
                    .get::<Option<String>, _>("place_type")
                    .filter(|t| !t.is_empty()),
                formatted: formatted
                    .filter(|f| !f.trim().is_empty())
                    .unwrap_or_else(|| place.clone()),
                place,
            }
        })
        .collect();

    Ok(locations)
}

/// Insert one row for a title; returns the row id
pub async fn insert_geocoded_location(
    pool: &SqlitePool,
    title_id: &TitleId,
    location: &GeocodedLocation,
) -> Result<i64> {
    let bbox = location
        .bbox
        .map(|b| serde_json::to_string(&b))
        .transpose()
        .map_err(|e| wwf_common::Error::Internal(format!("Failed to serialize bbox: {}", e)))?;

    let result = sqlx::query(
        r#"
        INSERT INTO geocoded_locations (
            imdb_id, location_value, description, lon, lat, bbox,
            place_type, formatted_address, created_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(title_id.as_str())
    .bind(&location.place)
    .bind(&location.desc)
    .bind(location.lon)
    .bind(location.lat)
    .bind(bbox)
    .bind(&location.place_type)
    .bind(&location.formatted)
    .bind(chrono::Utc::now().to_rfc3339())
    .execute(pool)
    .await?;

    Ok(result.last_insert_rowid())
}

/// Stored bbox: JSON array `[min_lon, min_lat, max_lon, max_lat]` or an object
/// with four numeric values
fn parse_bbox(raw: &str) -> Option<[f64; 4]> {
    let value: serde_json::Value = serde_json::from_str(raw).ok()?;
    let numbers: Vec<f64> = match value {
        serde_json::Value::Array(items) => items.iter().filter_map(|v| v.as_f64()).collect(),
        serde_json::Value::Object(map) => map.values().filter_map(|v| v.as_f64()).collect(),
        _ => return None,
    };
    match numbers.as_slice() {
        [a, b, c, d, ..] => Some([*a, *b, *c, *d]),
        _ => None,
    }
}

/// SQLite-backed [`GeocodedStore`]
#[derive(Clone)]
pub struct SqliteGeocodedStore {
    pool: SqlitePool,
}

impl SqliteGeocodedStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl GeocodedStore for SqliteGeocodedStore {
    async fn geocoded_locations(&self, title_id: &TitleId) -> Result<Vec<GeocodedLocation>> {
        load_geocoded_locations(&self.pool, title_id).await
    }
}
