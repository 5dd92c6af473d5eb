//! Row mapping for repository queries.
//!
//! Keep this focused on decoding columns. Business logic should live in
//! higher layers.

use crate::model::{Credentials, Post, PostStatus};
use anyhow::{anyhow, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

pub(crate) const POST_COLUMNS: &str = "id, caption, video_url, scheduled_at, status, \
     failure_reason, published_at, external_id, created_at, updated_at";

pub(crate) fn post_from_row(row: &SqliteRow) -> Result<Post> {
    let id: i64 = row.try_get("id")?;
    let status_str: String = row.try_get("status")?;
    let status = PostStatus::parse_state(&status_str)
        .ok_or_else(|| anyhow!("post {} has unknown status {}", id, status_str))?;

    Ok(Post {
        id,
        caption: row.try_get("caption")?,
        video_url: row.try_get("video_url")?,
        scheduled_at: row.try_get("scheduled_at")?,
        status,
        failure_reason: row.try_get("failure_reason")?,
        published_at: row.try_get("published_at")?,
        external_id: row.try_get("external_id")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

pub(crate) fn credentials_from_row(row: &SqliteRow) -> Result<Credentials> {
    Ok(Credentials {
        access_token: row.try_get("access_token")?,
        account_id: row.try_get("account_id")?,
    })
}
