//! Normalization of scraped forecast sections into canonical weather records,
//! and the full-snapshot commit that publishes a finished batch.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::db::{DbError, SnapshotStore, WeatherRecord};
use crate::fetcher::RawObservation;

const CELSIUS: &str = "°C";
const PERCENT: &str = "%";
const TRAILING_SEPARATORS: [char; 4] = [':', ',', ';', '-'];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("Malformed location/date '{0}': expected 'City,Region-DD-MM'")]
    MalformedLocation(String),
    #[error("Invalid {field} value '{value}'")]
    InvalidNumber { field: &'static str, value: String },
}

#[derive(Debug, thiserror::Error)]
pub enum CommitError {
    #[error("Failed to replace weather snapshot: {0}")]
    Store(#[from] DbError),
}

fn parse_measure(value: &str, suffix: &str, field: &'static str) -> Result<i64, ParseError> {
    let trimmed = value.trim();
    let number = trimmed.strip_suffix(suffix).unwrap_or(trimmed).trim();
    number.parse::<i64>().map_err(|_| ParseError::InvalidNumber {
        field,
        value: value.to_string(),
    })
}

/// Floor of the mean, also for negative sums (-5 / 2 is -3).
fn midpoint(min: i64, max: i64, field: &'static str) -> Result<i64, ParseError> {
    min.checked_add(max)
        .map(|sum| sum.div_euclid(2))
        .ok_or_else(|| ParseError::InvalidNumber {
            field,
            value: format!("{}..{}", min, max),
        })
}

fn clean_text(value: &str) -> String {
    value.trim().trim_end_matches(TRAILING_SEPARATORS).trim_end().to_string()
}

/// Turn one scraped section into a weather record.
///
/// `location_and_date` is split on both `,` and `-`: the first token is the
/// city and the third and fourth form the `DD-MM` date. Temperatures and
/// humidities collapse to the floored midpoint of their min/max pair.
pub fn normalize(raw: &RawObservation) -> Result<WeatherRecord, ParseError> {
    let tokens: Vec<&str> = raw
        .location_and_date
        .split([',', '-'])
        .map(str::trim)
        .collect();

    if tokens.len() < 4 || tokens[0].is_empty() || tokens[2].is_empty() || tokens[3].is_empty() {
        return Err(ParseError::MalformedLocation(raw.location_and_date.clone()));
    }

    let temp_min = parse_measure(&raw.temp_min, CELSIUS, "minimum temperature")?;
    let temp_max = parse_measure(&raw.temp_max, CELSIUS, "maximum temperature")?;
    let humidity_min = parse_measure(&raw.humidity_min, PERCENT, "minimum humidity")?;
    let humidity_max = parse_measure(&raw.humidity_max, PERCENT, "maximum humidity")?;

    let temperature = midpoint(temp_min, temp_max, "temperature")?;
    let humidity = midpoint(humidity_min, humidity_max, "humidity")?;

    Ok(WeatherRecord {
        city: tokens[0].to_string(),
        date: format!("{}-{}", tokens[2], tokens[3]),
        condition: clean_text(&raw.condition),
        temperature: format!("{}{}", temperature, CELSIUS),
        humidity: format!("{}{}", humidity, PERCENT),
        wind: clean_text(&raw.wind),
    })
}

/// Working set of records for one harvest run. Nothing is persisted until
/// the batch is handed to [`SnapshotCommitter::commit`].
#[derive(Debug, Default)]
pub struct SnapshotBatch {
    records: Vec<WeatherRecord>,
    dropped: usize,
}

impl SnapshotBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stage_batch(&mut self, records: impl IntoIterator<Item = WeatherRecord>) {
        self.records.extend(records);
    }

    /// Normalize and stage raw sections. A section that fails to parse is
    /// dropped on its own; returns how many were staged.
    pub fn stage_observations(&mut self, observations: &[RawObservation]) -> usize {
        let mut staged = 0;
        for raw in observations {
            match normalize(raw) {
                Ok(record) => {
                    self.records.push(record);
                    staged += 1;
                }
                Err(e) => {
                    warn!("Dropping forecast section: {}", e);
                    self.dropped += 1;
                }
            }
        }
        staged
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Sections dropped because they did not parse
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    pub fn records(&self) -> &[WeatherRecord] {
        &self.records
    }

    pub fn into_records(self) -> Vec<WeatherRecord> {
        self.records
    }
}

/// Single writer for the snapshot store. Clones share one write lock, so
/// clear+insert cycles never interleave.
pub struct SnapshotCommitter<S> {
    store: Arc<S>,
    write_lock: Arc<Mutex<()>>,
}

impl<S> Clone for SnapshotCommitter<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            write_lock: Arc::clone(&self.write_lock),
        }
    }
}

impl<S: SnapshotStore> SnapshotCommitter<S> {
    pub fn new(store: S) -> Self {
        Self {
            store: Arc::new(store),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Replace the whole persisted snapshot with `batch`. On failure the batch
    /// is discarded; the next run commits a fresh one.
    #[instrument(skip(self, batch), fields(records = batch.len()))]
    pub async fn commit(&self, batch: SnapshotBatch) -> Result<usize, CommitError> {
        let _guard = self.write_lock.lock().await;
        debug!("Acquired snapshot write lock");

        let records = batch.into_records();
        let written = self.store.replace_all(&records).await?;

        info!("Committed snapshot with {} records", written);
        Ok(written)
    }
}
