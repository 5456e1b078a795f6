//! Process-wide cache of system codes used by document mappers.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use sqlx::PgPool;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::concurrency::shutdown::ShutdownRx;
use crate::error::IndexerResult;

/// A coded value of the source system, such as a gender or a language.
#[derive(Debug, Clone, PartialEq, Eq, Hash, sqlx::FromRow)]
pub struct SystemCode {
    pub id: i32,
    pub category: String,
    pub short_description: String,
}

/// Loads the full set of system codes.
#[async_trait]
pub trait ReferenceDataLoader: Send + Sync + 'static {
    async fn load(&self) -> IndexerResult<Vec<SystemCode>>;
}

/// Loads system codes from a Postgres query returning `id`, `category` and
/// `short_description` columns.
#[derive(Debug, Clone)]
pub struct PgReferenceDataLoader {
    pool: PgPool,
    query: String,
}

impl PgReferenceDataLoader {
    pub fn new(pool: PgPool, query: impl Into<String>) -> Self {
        Self {
            pool,
            query: query.into(),
        }
    }
}

#[async_trait]
impl ReferenceDataLoader for PgReferenceDataLoader {
    async fn load(&self) -> IndexerResult<Vec<SystemCode>> {
        let codes = sqlx::query_as::<_, SystemCode>(&self.query)
            .fetch_all(&self.pool)
            .await?;

        Ok(codes)
    }
}

/// Read-through cache of system codes.
///
/// The scheduler loads it on start and refreshes it on a long interval. Lookups never wait on
/// the loader; a refresh swaps the whole map at once.
#[derive(Clone)]
pub struct ReferenceDataCache {
    loader: Arc<dyn ReferenceDataLoader>,
    codes: Arc<RwLock<HashMap<i32, SystemCode>>>,
}

impl ReferenceDataCache {
    pub fn new(loader: impl ReferenceDataLoader) -> Self {
        Self {
            loader: Arc::new(loader),
            codes: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Reloads every code, keeping the previous codes if loading fails.
    pub async fn refresh(&self) -> IndexerResult<usize> {
        let loaded = self.loader.load().await?;
        let codes: HashMap<i32, SystemCode> =
            loaded.into_iter().map(|code| (code.id, code)).collect();
        let count = codes.len();

        *self.codes.write().unwrap_or_else(PoisonError::into_inner) = codes;
        info!(codes = count, "reference data loaded");

        Ok(count)
    }

    pub fn get(&self, id: i32) -> Option<SystemCode> {
        self.codes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
    }

    /// Returns the short description of code `id`.
    pub fn description(&self, id: i32) -> Option<String> {
        self.get(id).map(|code| code.short_description)
    }

    pub fn len(&self) -> usize {
        self.codes.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Refreshes the cache every `interval` until shutdown is requested.
    pub fn spawn_refresh_task(&self, interval: Duration, mut shutdown: ShutdownRx) -> JoinHandle<()> {
        let cache = self.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The first tick completes immediately and the cache was just loaded.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = shutdown.wait() => {
                        info!("reference data refresh stopped");
                        return;
                    }
                    _ = ticker.tick() => {
                        if let Err(err) = cache.refresh().await {
                            error!(error = %err, "reference data refresh failed, keeping previous codes");
                        }
                    }
                }
            }
        })
    }
}

impl fmt::Debug for ReferenceDataCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReferenceDataCache")
            .field("codes", &self.len())
            .finish()
    }
}
