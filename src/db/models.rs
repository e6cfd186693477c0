use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Canonical weather record for one city/date, as persisted in the snapshot
/// and returned by the API. The row id never leaves the repository.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct WeatherRecord {
    pub city: String,
    pub date: String,
    pub condition: String,
    pub temperature: String,
    pub humidity: String,
    pub wind: String,
}

#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub api_key: Option<String>,
    pub created_at: DateTime<Utc>,
}
