use std::marker::PhantomData;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use config::shared::SourceConfig;
use pg_escape::quote_identifier;
use secrecy::ExposeSecret;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgRow};
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use tracing::{debug, info};

use crate::error::IndexerResult;
use crate::partition::{InclusiveBucket, chain_buckets};
use crate::source::ChangeSource;
use crate::types::{BatchBucket, ChangeRow, ChangedEntityIdentifier, IdRange};

/// Entity specific queries run by [`PgChangeSource`].
///
/// Every query must return rows ordered by group key.
/// - `changed_since` binds the checkpoint as `$1`.
/// - `range` binds the nullable lower bound as `$1` and nullable upper bound as `$2`.
/// - `by_ids` binds a `text[]` of entity ids as `$1`.
#[derive(Debug, Clone)]
pub struct PgSourceQueries {
    pub changed_since: String,
    pub range: String,
    pub by_ids: String,
    /// Column of the driver table holding entity ids.
    pub id_column: String,
}

/// Builds a connection pool for the configured source database.
pub async fn connect_source_pool(config: &SourceConfig) -> IndexerResult<PgPool> {
    let mut options = PgConnectOptions::new()
        .host(&config.host)
        .port(config.port)
        .database(&config.name)
        .username(&config.username);

    if let Some(password) = &config.password {
        options = options.password(password.expose_secret());
    }

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect_with(options)
        .await?;

    info!(host = %config.host, database = %config.name, "connected to source database");

    Ok(pool)
}

/// Change source reading denormalized rows from Postgres.
#[derive(Debug)]
pub struct PgChangeSource<R> {
    pool: PgPool,
    queries: Arc<PgSourceQueries>,
    _row: PhantomData<fn() -> R>,
}

impl<R> PgChangeSource<R> {
    pub fn new(pool: PgPool, queries: PgSourceQueries) -> Self {
        Self {
            pool,
            queries: Arc::new(queries),
            _row: PhantomData,
        }
    }
}

impl<R> Clone for PgChangeSource<R> {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            queries: self.queries.clone(),
            _row: PhantomData,
        }
    }
}

/// Quotes a possibly schema qualified table name.
fn quote_table_name(table: &str) -> String {
    table
        .split('.')
        .map(|part| quote_identifier(part).into_owned())
        .collect::<Vec<_>>()
        .join(".")
}

/// Builds the query ranking every driver table id and folding ranks into buckets.
///
/// Ranks are grouped in chunks of `count / $1` (at least one), and ranks past the last full
/// chunk fold into the last bucket.
fn bucket_allocation_query(driver_table: &str, id_column: &str) -> String {
    let table = quote_table_name(driver_table);
    let id = quote_identifier(id_column);

    format!(
        r#"
        with ranked as (
            select {id}::text as id,
                   row_number() over (order by {id}::text) - 1 as rn,
                   count(*) over () as total
            from {table}
        ), assigned as (
            select id,
                   least(rn / greatest(total / $1, 1), least($1, total) - 1) + 1 as bucket
            from ranked
        )
        select bucket::int4 as bucket_number,
               min(id) as min_id,
               max(id) as max_id,
               count(*)::int8 as row_count
        from assigned
        group by bucket
        order by bucket
        "#
    )
}

/// Statement making the current transaction read only.
const READ_ONLY_TRANSACTION: &str = "set transaction read only";

impl<R> PgChangeSource<R> {
    /// Opens the read only transaction a single pull runs in.
    ///
    /// Dropping the transaction without committing rolls it back, so a failing pull leaves
    /// nothing open and returns none of its rows.
    async fn begin_read(&self) -> IndexerResult<Transaction<'static, Postgres>> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(READ_ONLY_TRANSACTION).execute(&mut *tx).await?;

        Ok(tx)
    }
}

impl<R> ChangeSource for PgChangeSource<R>
where
    R: ChangeRow + for<'r> FromRow<'r, PgRow> + Unpin,
{
    type Row = R;

    fn name() -> &'static str {
        "postgres"
    }

    async fn pull_changed_since(&self, checkpoint: DateTime<Utc>) -> IndexerResult<Vec<R>> {
        let mut tx = self.begin_read().await?;
        let rows = sqlx::query_as::<_, R>(&self.queries.changed_since)
            .bind(checkpoint)
            .fetch_all(&mut *tx)
            .await?;
        tx.commit().await?;

        debug!(%checkpoint, rows = rows.len(), "pulled changed rows");

        Ok(rows)
    }

    async fn pull_range(&self, range: &IdRange) -> IndexerResult<Vec<R>> {
        let mut tx = self.begin_read().await?;
        let rows = sqlx::query_as::<_, R>(&self.queries.range)
            .bind(range.min_id.as_deref())
            .bind(range.max_id.as_deref())
            .fetch_all(&mut *tx)
            .await?;
        tx.commit().await?;

        debug!(%range, rows = rows.len(), "pulled range rows");

        Ok(rows)
    }

    async fn pull_identifiers(
        &self,
        identifiers: &[ChangedEntityIdentifier],
    ) -> IndexerResult<Vec<R>> {
        let ids: Vec<String> = identifiers.iter().map(|id| id.id().to_string()).collect();

        let mut tx = self.begin_read().await?;
        let rows = sqlx::query_as::<_, R>(&self.queries.by_ids)
            .bind(&ids)
            .fetch_all(&mut *tx)
            .await?;
        tx.commit().await?;

        debug!(identifiers = ids.len(), rows = rows.len(), "pulled identifier rows");

        Ok(rows)
    }

    async fn allocate_buckets(
        &self,
        total_buckets: u32,
        driver_table: &str,
    ) -> IndexerResult<Vec<BatchBucket>> {
        let query = bucket_allocation_query(driver_table, &self.queries.id_column);

        let mut tx = self.begin_read().await?;
        let rows: Vec<(i32, String, String, i64)> = sqlx::query_as(&query)
            .bind(i64::from(total_buckets))
            .fetch_all(&mut *tx)
            .await?;
        tx.commit().await?;

        let inclusive = rows
            .into_iter()
            .map(
                |(bucket_number, min_id, max_id, row_count)| InclusiveBucket {
                    bucket_number: bucket_number as u32,
                    min_id,
                    max_id,
                    row_count: row_count as u64,
                },
            )
            .collect();

        Ok(chain_buckets(inclusive))
    }
}
