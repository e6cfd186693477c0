use std::future::Future;

use sqlx::{PgConnection, PgPool, Postgres, QueryBuilder};
use tracing::{debug, info, instrument};

use crate::db::{DbError, WeatherRecord};

// Six binds per row keeps each statement well under the Postgres bind limit.
const INSERT_CHUNK_SIZE: usize = 1000;

/// Write side of the persisted weather snapshot.
///
/// `replace_all` is the only operation the harvest pipeline calls. The default
/// implementation clears and then inserts, so a reader may briefly observe an
/// empty snapshot; stores that can do better override it.
pub trait SnapshotStore: Send + Sync {
    fn clear_all(&self) -> impl Future<Output = Result<u64, DbError>> + Send;

    fn insert_many(
        &self,
        records: &[WeatherRecord],
    ) -> impl Future<Output = Result<usize, DbError>> + Send;

    fn replace_all(
        &self,
        records: &[WeatherRecord],
    ) -> impl Future<Output = Result<usize, DbError>> + Send {
        async move {
            self.clear_all().await?;
            self.insert_many(records).await
        }
    }
}

#[derive(Clone)]
pub struct SnapshotRepository {
    pool: PgPool,
}

impl SnapshotRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// All records for a city in the order they were harvested
    #[instrument(skip(self))]
    pub async fn find_by_city(&self, city: &str) -> Result<Vec<WeatherRecord>, DbError> {
        debug!("Querying snapshot records for city {}", city);

        let records = sqlx::query_as::<_, WeatherRecord>(
            r#"
            SELECT city, date, condition, temperature, humidity, wind
            FROM weather_snapshots
            WHERE city = $1
            ORDER BY id
            "#,
        )
        .bind(city)
        .fetch_all(&self.pool)
        .await?;

        debug!("Found {} records", records.len());
        Ok(records)
    }

    #[instrument(skip(self))]
    pub async fn find_first_by_city(&self, city: &str) -> Result<Option<WeatherRecord>, DbError> {
        let record = sqlx::query_as::<_, WeatherRecord>(
            r#"
            SELECT city, date, condition, temperature, humidity, wind
            FROM weather_snapshots
            WHERE city = $1
            ORDER BY id
            LIMIT 1
            "#,
        )
        .bind(city)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    #[instrument(skip(self))]
    pub async fn find_all(&self) -> Result<Vec<WeatherRecord>, DbError> {
        let records = sqlx::query_as::<_, WeatherRecord>(
            r#"
            SELECT city, date, condition, temperature, humidity, wind
            FROM weather_snapshots
            ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }
}

async fn insert_records(
    conn: &mut PgConnection,
    records: &[WeatherRecord],
) -> Result<usize, DbError> {
    let mut inserted = 0;

    for chunk in records.chunks(INSERT_CHUNK_SIZE) {
        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
            "INSERT INTO weather_snapshots (city, date, condition, temperature, humidity, wind) ",
        );
        builder.push_values(chunk, |mut row, record| {
            row.push_bind(&record.city)
                .push_bind(&record.date)
                .push_bind(&record.condition)
                .push_bind(&record.temperature)
                .push_bind(&record.humidity)
                .push_bind(&record.wind);
        });

        let result = builder.build().execute(&mut *conn).await?;
        inserted += result.rows_affected() as usize;
    }

    Ok(inserted)
}

impl SnapshotStore for SnapshotRepository {
    #[instrument(skip(self))]
    async fn clear_all(&self) -> Result<u64, DbError> {
        let result = sqlx::query("DELETE FROM weather_snapshots")
            .execute(&self.pool)
            .await?;
        debug!("Cleared {} snapshot records", result.rows_affected());
        Ok(result.rows_affected())
    }

    #[instrument(skip(self, records), fields(count = records.len()))]
    async fn insert_many(&self, records: &[WeatherRecord]) -> Result<usize, DbError> {
        let mut conn = self.pool.acquire().await?;
        insert_records(&mut conn, records).await
    }

    /// Clear and reinsert inside one transaction so readers see either the
    /// previous snapshot or the new one.
    #[instrument(skip(self, records), fields(count = records.len()))]
    async fn replace_all(&self, records: &[WeatherRecord]) -> Result<usize, DbError> {
        debug!("Beginning transaction to replace snapshot with {} records", records.len());
        let mut tx = self.pool.begin().await?;

        let cleared = sqlx::query("DELETE FROM weather_snapshots")
            .execute(&mut *tx)
            .await?
            .rows_affected();
        let inserted = insert_records(&mut tx, records).await?;

        tx.commit().await?;
        info!("Replaced snapshot: {} records removed, {} inserted", cleared, inserted);
        Ok(inserted)
    }
}
