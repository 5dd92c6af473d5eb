//! Repository seam used by the dispatcher and the manual trigger.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::db::{self, Pool};
use crate::lifecycle::{AttemptOrigin, FailedRetry};
use crate::model::Post;

#[async_trait]
pub trait PostStore: Send + Sync {
    /// Posts due for a scheduled attempt at `now`, in a stable order.
    async fn list_due(&self, now: DateTime<Utc>) -> Result<Vec<Post>>;

    /// Atomic claim into `PROCESSING`; the claimed post iff this caller won it.
    async fn claim_for_processing(
        &self,
        id: i64,
        origin: AttemptOrigin,
        now: DateTime<Utc>,
    ) -> Result<Option<Post>>;

    async fn record_success(
        &self,
        id: i64,
        external_id: &str,
        published_at: DateTime<Utc>,
    ) -> Result<()>;

    async fn record_failure(&self, id: i64, reason: &str) -> Result<()>;

    async fn get(&self, id: i64) -> Result<Option<Post>>;

    /// Policy the due query and scheduled claims apply to `FAILED` posts.
    fn failed_retry(&self) -> FailedRetry;
}

/// SQLite-backed store.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: Pool,
    retry: FailedRetry,
}

impl SqliteStore {
    pub fn new(pool: Pool, retry: FailedRetry) -> Self {
        Self { pool, retry }
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }
}

#[async_trait]
impl PostStore for SqliteStore {
    async fn list_due(&self, now: DateTime<Utc>) -> Result<Vec<Post>> {
        db::list_due(&self.pool, now, self.retry).await
    }

    async fn claim_for_processing(
        &self,
        id: i64,
        origin: AttemptOrigin,
        now: DateTime<Utc>,
    ) -> Result<Option<Post>> {
        db::claim_for_processing(&self.pool, id, origin, now).await
    }

    async fn record_success(
        &self,
        id: i64,
        external_id: &str,
        published_at: DateTime<Utc>,
    ) -> Result<()> {
        db::record_success(&self.pool, id, external_id, published_at).await
    }

    async fn record_failure(&self, id: i64, reason: &str) -> Result<()> {
        db::record_failure(&self.pool, id, reason).await
    }

    async fn get(&self, id: i64) -> Result<Option<Post>> {
        db::get_post(&self.pool, id).await
    }

    fn failed_retry(&self) -> FailedRetry {
        self.retry
    }
}
