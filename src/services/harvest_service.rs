use std::sync::Arc;

use futures::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{error, info, instrument, warn};

use crate::db::{SnapshotRepository, SnapshotStore};
use crate::fetcher::{ForecastFetcher, RawObservation};
use crate::fetch_error::FetchError;
use crate::pipeline::{CommitError, SnapshotBatch, SnapshotCommitter};

#[derive(Debug, Clone, Default, Serialize)]
pub struct HarvestReport {
    pub cities_fetched: usize,
    pub cities_failed: usize,
    pub records_staged: usize,
    pub sections_dropped: usize,
    /// Records written to the snapshot, `None` when the commit was skipped.
    pub records_committed: Option<usize>,
}

/// One harvest run: fetch every configured city page, normalize each
/// section and replace the persisted snapshot with the result.
pub struct HarvestService<S = SnapshotRepository> {
    fetcher: ForecastFetcher,
    committer: SnapshotCommitter<S>,
    city_codes: Arc<Vec<String>>,
    concurrency: usize,
}

impl<S> Clone for HarvestService<S> {
    fn clone(&self) -> Self {
        Self {
            fetcher: self.fetcher.clone(),
            committer: self.committer.clone(),
            city_codes: Arc::clone(&self.city_codes),
            concurrency: self.concurrency,
        }
    }
}

impl<S: SnapshotStore> HarvestService<S> {
    pub fn new(
        fetcher: ForecastFetcher,
        committer: SnapshotCommitter<S>,
        city_codes: Vec<String>,
        concurrency: usize,
    ) -> Self {
        Self {
            fetcher,
            committer,
            city_codes: Arc::new(city_codes),
            concurrency: concurrency.max(1),
        }
    }

    pub fn city_codes(&self) -> &[String] {
        &self.city_codes
    }

    /// Fetch and normalize every city page without touching the store.
    #[instrument(skip(self), fields(cities = self.city_codes.len()))]
    pub async fn collect(&self) -> (SnapshotBatch, HarvestReport) {
        let pages: Vec<(String, Result<Vec<RawObservation>, FetchError>)> =
            stream::iter(self.city_codes.iter().cloned())
                .map(|code| {
                    let fetcher = self.fetcher.clone();
                    async move {
                        let result = fetcher.fetch_observations(&code).await;
                        (code, result)
                    }
                })
                .buffered(self.concurrency)
                .collect()
                .await;

        let mut batch = SnapshotBatch::new();
        let mut report = HarvestReport::default();

        for (code, result) in pages {
            match result {
                Ok(observations) => {
                    let staged = batch.stage_observations(&observations);
                    info!(city_code = %code, sections = observations.len(), staged, "Harvested city page");
                    report.cities_fetched += 1;
                }
                Err(e) => {
                    warn!(city_code = %code, error = %e, "Skipping city page");
                    report.cities_failed += 1;
                }
            }
        }

        report.records_staged = batch.len();
        report.sections_dropped = batch.dropped();
        (batch, report)
    }

    /// Full run: collect, then commit the batch as the new snapshot.
    ///
    /// A run that stages no records (every city failed or every section was
    /// dropped) ends without a commit, so the current snapshot is kept
    /// instead of being replaced by an empty one. `records_committed` is
    /// `None` in that case.
    #[instrument(skip(self))]
    pub async fn run_once(&self) -> Result<HarvestReport, CommitError> {
        let (batch, mut report) = self.collect().await;

        if batch.is_empty() {
            warn!(
                cities_failed = report.cities_failed,
                "Harvest produced no records, keeping previous snapshot"
            );
            return Ok(report);
        }

        match self.committer.commit(batch).await {
            Ok(written) => {
                report.records_committed = Some(written);
                info!(
                    records = written,
                    dropped = report.sections_dropped,
                    cities_failed = report.cities_failed,
                    "Harvest run completed"
                );
                Ok(report)
            }
            Err(e) => {
                error!("Harvest batch discarded: {}", e);
                Err(e)
            }
        }
    }
}
