use crate::db::{DbError, SnapshotRepository, WeatherRecord};

/// Read side of the weather snapshot, used by the query API.
#[derive(Clone)]
pub struct WeatherService {
    snapshot_repo: SnapshotRepository,
    default_city: String,
}

impl WeatherService {
    pub fn new(snapshot_repo: SnapshotRepository, default_city: String) -> Self {
        Self {
            snapshot_repo,
            default_city,
        }
    }

    pub fn default_city(&self) -> &str {
        &self.default_city
    }

    /// Forecast for the configured default city
    pub async fn get_default_forecast(&self) -> Result<Option<WeatherRecord>, DbError> {
        self.snapshot_repo.find_first_by_city(&self.default_city).await
    }

    /// First (nearest) forecast day for a city
    pub async fn get_city_forecast(&self, city: &str) -> Result<Option<WeatherRecord>, DbError> {
        self.snapshot_repo.find_first_by_city(city.trim()).await
    }

    /// Every forecast day held for a city, nearest first
    pub async fn get_city_week(&self, city: &str) -> Result<Vec<WeatherRecord>, DbError> {
        self.snapshot_repo.find_by_city(city.trim()).await
    }
}
