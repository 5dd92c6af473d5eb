use anyhow::Result;
use async_trait::async_trait;

use crate::db::{self, Pool};
use crate::model::Credentials;

/// Source of the current publishing credentials.
///
/// Implementations must read fresh on every call: tokens may be rotated
/// between dispatch cycles.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn current(&self) -> Result<Option<Credentials>>;
}

/// Credentials kept in the `settings` table.
#[derive(Debug, Clone)]
pub struct SqliteCredentials {
    pool: Pool,
}

impl SqliteCredentials {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    pub async fn replace(&self, creds: &Credentials) -> Result<()> {
        db::save_credentials(&self.pool, creds).await
    }
}

#[async_trait]
impl CredentialProvider for SqliteCredentials {
    async fn current(&self) -> Result<Option<Credentials>> {
        db::load_credentials(&self.pool).await
    }
}
