use super::model::{credentials_from_row, post_from_row, POST_COLUMNS};
use crate::lifecycle::{claimable_states, AttemptOrigin, FailedRetry};
use crate::model::{Credentials, NewPost, Post, PostStatus, PostUpdate};
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::str::FromStr;
use tracing::{debug, instrument};

pub type Pool = SqlitePool;

/// Reason stored on posts whose claim was abandoned mid-attempt.
pub const INTERRUPTED_REASON: &str = "interrupted: publish attempt did not complete";

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    let options = SqliteConnectOptions::from_str(&normalized)
        .with_context(|| format!("invalid database url {}", normalized))?
        .create_if_missing(true)
        // WAL with full sync: the claim and outcome writes must survive a crash.
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Full);
    let pool = SqlitePoolOptions::new()
        .connect_with(options)
        .await
        .context("failed to open database")?;
    Ok(pool)
}

/// Expand a leading `~/` in file-backed `sqlite:` URLs and make sure the parent
/// directory exists. In-memory and non-sqlite URLs pass through untouched.
fn prepare_sqlite_url(url: &str) -> String {
    let Some(rest) = url.strip_prefix("sqlite:") else {
        return url.to_string();
    };
    if rest.starts_with(":memory") {
        return url.to_string();
    }

    let rest = rest.strip_prefix("//").unwrap_or(rest);
    let (path, query) = match rest.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (rest, None),
    };
    if path.is_empty() {
        return url.to_string();
    }

    let path = match (path.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(tail), Ok(home)) => format!("{}/{}", home.trim_end_matches('/'), tail),
        _ => path.to_string(),
    };

    if let Some(parent) = std::path::Path::new(&path).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    match query {
        Some(q) => format!("sqlite://{}?{}", path, q),
        None => format!("sqlite://{}", path),
    }
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

#[instrument(skip_all)]
pub async fn create_post(pool: &Pool, new: &NewPost) -> Result<Post> {
    new.validate()?;
    let now = Utc::now();
    let sql = format!(
        "INSERT INTO posts (caption, video_url, scheduled_at, status, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?) RETURNING {}",
        POST_COLUMNS
    );
    let row = sqlx::query(&sql)
        .bind(new.caption.trim())
        .bind(new.video_url.trim())
        .bind(new.scheduled_at)
        .bind(PostStatus::Pending.as_str())
        .bind(now)
        .bind(now)
        .fetch_one(pool)
        .await
        .context("failed to insert post")?;
    post_from_row(&row)
}

#[instrument(skip_all, fields(post_id = id))]
pub async fn get_post(pool: &Pool, id: i64) -> Result<Option<Post>> {
    let sql = format!("SELECT {} FROM posts WHERE id = ?", POST_COLUMNS);
    let row = sqlx::query(&sql).bind(id).fetch_optional(pool).await?;
    row.as_ref().map(post_from_row).transpose()
}

#[instrument(skip_all)]
pub async fn list_posts(pool: &Pool) -> Result<Vec<Post>> {
    let sql = format!(
        "SELECT {} FROM posts ORDER BY julianday(scheduled_at) ASC, id ASC",
        POST_COLUMNS
    );
    let rows = sqlx::query(&sql).fetch_all(pool).await?;
    rows.iter().map(post_from_row).collect()
}

/// Apply a partial edit. Status and publication fields are never touched.
/// Returns `None` when the post does not exist.
#[instrument(skip_all, fields(post_id = id))]
pub async fn update_post(pool: &Pool, id: i64, update: &PostUpdate) -> Result<Option<Post>> {
    update.validate()?;
    if update.is_empty() {
        return get_post(pool, id).await;
    }
    let sql = format!(
        "UPDATE posts SET caption = COALESCE(?, caption), video_url = COALESCE(?, video_url), \
         scheduled_at = COALESCE(?, scheduled_at), updated_at = ? WHERE id = ? RETURNING {}",
        POST_COLUMNS
    );
    let row = sqlx::query(&sql)
        .bind(update.caption.as_deref().map(str::trim))
        .bind(update.video_url.as_deref().map(str::trim))
        .bind(update.scheduled_at)
        .bind(Utc::now())
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("failed to update post")?;
    row.as_ref().map(post_from_row).transpose()
}

#[instrument(skip_all, fields(post_id = id))]
pub async fn delete_post(pool: &Pool, id: i64) -> Result<bool> {
    let res = sqlx::query("DELETE FROM posts WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(res.rows_affected() > 0)
}

/// Posts eligible for a scheduled attempt, oldest schedule first.
#[instrument(skip_all)]
pub async fn list_due(pool: &Pool, now: DateTime<Utc>, retry: FailedRetry) -> Result<Vec<Post>> {
    let states = claimable_states(AttemptOrigin::Scheduled(retry));
    let sql = format!(
        "SELECT {} FROM posts WHERE status IN ({}) AND julianday(scheduled_at) <= julianday(?) \
         ORDER BY julianday(scheduled_at) ASC, id ASC",
        POST_COLUMNS,
        placeholders(states.len())
    );
    let mut query = sqlx::query(&sql);
    for state in states {
        query = query.bind(state.as_str());
    }
    let rows = query.bind(now).fetch_all(pool).await?;
    rows.iter().map(post_from_row).collect()
}

/// Atomically move a post into `PROCESSING`.
///
/// This is a single conditional update: it only matches while the post is in
/// one of the states `origin` may claim from (and, for scheduled attempts,
/// while it is still due). Returns the claimed row iff this caller won the
/// claim; the attempt publishes that row rather than an earlier read.
#[instrument(skip_all, fields(post_id = id, origin = ?origin))]
pub async fn claim_for_processing(
    pool: &Pool,
    id: i64,
    origin: AttemptOrigin,
    now: DateTime<Utc>,
) -> Result<Option<Post>> {
    let states = claimable_states(origin);
    if states.is_empty() {
        debug!(won = false, "nothing claimable");
        return Ok(None);
    }
    let scheduled = matches!(origin, AttemptOrigin::Scheduled(_));
    let due_clause = if scheduled {
        " AND julianday(scheduled_at) <= julianday(?)"
    } else {
        ""
    };
    let sql = format!(
        "UPDATE posts SET status = ?, failure_reason = NULL, published_at = NULL, \
         external_id = NULL, updated_at = ? WHERE id = ? AND status IN ({}){} RETURNING {}",
        placeholders(states.len()),
        due_clause,
        POST_COLUMNS
    );
    let mut query = sqlx::query(&sql)
        .bind(PostStatus::Processing.as_str())
        .bind(Utc::now())
        .bind(id);
    for state in states {
        query = query.bind(state.as_str());
    }
    if scheduled {
        query = query.bind(now);
    }
    let row = query
        .fetch_optional(pool)
        .await
        .context("failed to claim post")?;
    debug!(won = row.is_some(), "claim attempted");
    row.as_ref().map(post_from_row).transpose()
}

#[instrument(skip_all, fields(post_id = id))]
pub async fn record_success(
    pool: &Pool,
    id: i64,
    external_id: &str,
    published_at: DateTime<Utc>,
) -> Result<()> {
    let res = sqlx::query(
        "UPDATE posts SET status = ?, published_at = ?, external_id = ?, failure_reason = NULL, \
         updated_at = ? WHERE id = ? AND status = ?",
    )
    .bind(PostStatus::Published.as_str())
    .bind(published_at)
    .bind(external_id)
    .bind(Utc::now())
    .bind(id)
    .bind(PostStatus::Processing.as_str())
    .execute(pool)
    .await
    .context("failed to persist publish success")?;
    if res.rows_affected() == 0 {
        return Err(anyhow!("post {} is not processing; success not recorded", id));
    }
    Ok(())
}

#[instrument(skip_all, fields(post_id = id))]
pub async fn record_failure(pool: &Pool, id: i64, reason: &str) -> Result<()> {
    let res = sqlx::query(
        "UPDATE posts SET status = ?, failure_reason = ?, published_at = NULL, external_id = NULL, \
         updated_at = ? WHERE id = ? AND status = ?",
    )
    .bind(PostStatus::Failed.as_str())
    .bind(reason)
    .bind(Utc::now())
    .bind(id)
    .bind(PostStatus::Processing.as_str())
    .execute(pool)
    .await
    .context("failed to persist publish failure")?;
    if res.rows_affected() == 0 {
        return Err(anyhow!("post {} is not processing; failure not recorded", id));
    }
    Ok(())
}

/// Fail posts stuck in `PROCESSING` since before `claimed_before`.
#[instrument(skip_all)]
pub async fn recover_stale_claims(pool: &Pool, claimed_before: DateTime<Utc>) -> Result<u64> {
    let res = sqlx::query(
        "UPDATE posts SET status = ?, failure_reason = ?, updated_at = ? \
         WHERE status = ? AND julianday(updated_at) <= julianday(?)",
    )
    .bind(PostStatus::Failed.as_str())
    .bind(INTERRUPTED_REASON)
    .bind(Utc::now())
    .bind(PostStatus::Processing.as_str())
    .bind(claimed_before)
    .execute(pool)
    .await
    .context("failed to recover stale claims")?;
    Ok(res.rows_affected())
}

#[instrument(skip_all)]
pub async fn load_credentials(pool: &Pool) -> Result<Option<Credentials>> {
    let row = sqlx::query("SELECT access_token, account_id FROM settings WHERE id = 1")
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(credentials_from_row).transpose()
}

#[instrument(skip_all)]
pub async fn save_credentials(pool: &Pool, creds: &Credentials) -> Result<()> {
    creds.validate()?;
    sqlx::query(
        "INSERT INTO settings (id, access_token, account_id, updated_at) VALUES (1, ?, ?, ?) \
         ON CONFLICT(id) DO UPDATE SET access_token = excluded.access_token, \
         account_id = excluded.account_id, updated_at = excluded.updated_at",
    )
    .bind(creds.access_token.trim())
    .bind(creds.account_id.trim())
    .bind(Utc::now())
    .execute(pool)
    .await
    .context("failed to persist credentials")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    async fn setup_pool() -> Pool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        pool
    }

    async fn insert(pool: &Pool, caption: &str, scheduled_at: DateTime<Utc>) -> Post {
        create_post(
            pool,
            &NewPost {
                caption: caption.into(),
                video_url: "https://cdn.example/clip.mp4".into(),
                scheduled_at,
            },
        )
        .await
        .unwrap()
    }

    const SCHEDULED: AttemptOrigin = AttemptOrigin::Scheduled(FailedRetry::ManualOnly);

    async fn claim(pool: &Pool, id: i64, origin: AttemptOrigin, now: DateTime<Utc>) -> bool {
        claim_for_processing(pool, id, origin, now)
            .await
            .unwrap()
            .is_some()
    }

    fn manual(observed: PostStatus) -> AttemptOrigin {
        AttemptOrigin::Manual { observed }
    }

    #[test]
    fn prepare_sqlite_url_passes_memory_through() {
        assert_eq!(prepare_sqlite_url("sqlite::memory:"), "sqlite::memory:");
        assert_eq!(
            prepare_sqlite_url("postgres://localhost/db"),
            "postgres://localhost/db"
        );
    }

    #[test]
    fn prepare_sqlite_url_keeps_query() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("reels.db");
        let url = format!("sqlite:{}?mode=rwc", path.display());
        let prepared = prepare_sqlite_url(&url);
        assert_eq!(prepared, format!("sqlite://{}?mode=rwc", path.display()));
        assert!(path.parent().unwrap().exists());
    }

    #[tokio::test]
    async fn create_starts_pending_and_rejects_invalid_input() {
        let pool = setup_pool().await;
        let post = insert(&pool, "  hello  ", Utc::now()).await;
        assert_eq!(post.status, PostStatus::Pending);
        assert_eq!(post.caption, "hello");
        assert!(post.failure_reason.is_none());
        assert!(post.published_at.is_none());

        let err = create_post(
            &pool,
            &NewPost {
                caption: "x".into(),
                video_url: "nope".into(),
                scheduled_at: Utc::now(),
            },
        )
        .await;
        assert!(err.is_err());
        assert_eq!(list_posts(&pool).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn list_due_orders_by_schedule_and_respects_policy() {
        let pool = setup_pool().await;
        let now = Utc::now();
        let later = insert(&pool, "later", now - Duration::minutes(1)).await;
        let earlier = insert(&pool, "earlier", now - Duration::minutes(10)).await;
        let _future = insert(&pool, "future", now + Duration::hours(1)).await;
        let failed = insert(&pool, "failed", now - Duration::minutes(5)).await;
        assert!(claim(&pool, failed.id, SCHEDULED, now).await);
        record_failure(&pool, failed.id, "boom").await.unwrap();

        let due: Vec<i64> = list_due(&pool, now, FailedRetry::ManualOnly)
            .await
            .unwrap()
            .iter()
            .map(|p| p.id)
            .collect();
        assert_eq!(due, vec![earlier.id, later.id]);

        let due: Vec<i64> = list_due(&pool, now, FailedRetry::Automatic)
            .await
            .unwrap()
            .iter()
            .map(|p| p.id)
            .collect();
        assert_eq!(due, vec![earlier.id, failed.id, later.id]);
    }

    #[tokio::test]
    async fn claim_is_compare_and_set() {
        let pool = setup_pool().await;
        let now = Utc::now();
        let post = insert(&pool, "c", now - Duration::seconds(1)).await;

        assert!(claim(&pool, post.id, SCHEDULED, now).await);
        assert!(!claim(&pool, post.id, SCHEDULED, now).await);
        assert!(!claim(&pool, post.id, manual(PostStatus::Pending), now).await);
        assert!(!claim(&pool, post.id, manual(PostStatus::Processing), now).await);

        let stored = get_post(&pool, post.id).await.unwrap().unwrap();
        assert_eq!(stored.status, PostStatus::Processing);
    }

    #[tokio::test]
    async fn scheduled_claim_rechecks_schedule() {
        let pool = setup_pool().await;
        let now = Utc::now();
        let post = insert(&pool, "future", now + Duration::hours(1)).await;
        assert!(!claim(&pool, post.id, SCHEDULED, now).await);
        assert!(claim(&pool, post.id, manual(PostStatus::Pending), now).await);
    }

    #[tokio::test]
    async fn claim_returns_the_row_as_claimed() {
        let pool = setup_pool().await;
        let now = Utc::now();
        let post = insert(&pool, "draft", now).await;
        update_post(
            &pool,
            post.id,
            &PostUpdate {
                caption: Some("final".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let claimed = claim_for_processing(&pool, post.id, SCHEDULED, now)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(claimed.caption, "final");
        assert_eq!(claimed.status, PostStatus::Processing);
    }

    #[tokio::test]
    async fn manual_claim_loses_once_the_post_moved_on() {
        let pool = setup_pool().await;
        let now = Utc::now();
        let post = insert(&pool, "c", now).await;
        assert!(claim(&pool, post.id, SCHEDULED, now).await);
        record_success(&pool, post.id, "ig-1", now).await.unwrap();

        assert!(!claim(&pool, post.id, manual(PostStatus::Pending), now).await);
        let stored = get_post(&pool, post.id).await.unwrap().unwrap();
        assert_eq!(stored.status, PostStatus::Published);
        assert_eq!(stored.external_id.as_deref(), Some("ig-1"));

        assert!(claim(&pool, post.id, manual(PostStatus::Published), now).await);
    }

    #[tokio::test]
    async fn outcomes_keep_fields_exclusive() {
        let pool = setup_pool().await;
        let now = Utc::now();
        let post = insert(&pool, "c", now).await;

        assert!(claim(&pool, post.id, SCHEDULED, now).await);
        record_failure(&pool, post.id, "rate_limited").await.unwrap();
        let failed = get_post(&pool, post.id).await.unwrap().unwrap();
        assert_eq!(failed.status, PostStatus::Failed);
        assert_eq!(failed.failure_reason.as_deref(), Some("rate_limited"));

        assert!(claim(&pool, post.id, manual(PostStatus::Failed), now).await);
        let claimed = get_post(&pool, post.id).await.unwrap().unwrap();
        assert!(claimed.failure_reason.is_none());

        record_success(&pool, post.id, "ig-1", now).await.unwrap();
        let published = get_post(&pool, post.id).await.unwrap().unwrap();
        assert_eq!(published.status, PostStatus::Published);
        assert_eq!(published.external_id.as_deref(), Some("ig-1"));
        assert!(published.published_at.is_some());
        assert!(published.failure_reason.is_none());
    }

    #[tokio::test]
    async fn outcomes_require_a_claim() {
        let pool = setup_pool().await;
        let post = insert(&pool, "c", Utc::now()).await;
        assert!(record_success(&pool, post.id, "ig-1", Utc::now()).await.is_err());
        assert!(record_failure(&pool, post.id, "x").await.is_err());
        let stored = get_post(&pool, post.id).await.unwrap().unwrap();
        assert_eq!(stored.status, PostStatus::Pending);
    }

    #[tokio::test]
    async fn edit_never_changes_status() {
        let pool = setup_pool().await;
        let now = Utc::now();
        let post = insert(&pool, "c", now).await;
        assert!(claim(&pool, post.id, SCHEDULED, now).await);
        record_failure(&pool, post.id, "boom").await.unwrap();

        let new_time = now + Duration::days(1);
        let edited = update_post(
            &pool,
            post.id,
            &PostUpdate {
                caption: Some("edited".into()),
                scheduled_at: Some(new_time),
                ..Default::default()
            },
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(edited.caption, "edited");
        assert_eq!(edited.scheduled_at, new_time);
        assert_eq!(edited.status, PostStatus::Failed);
        assert_eq!(edited.failure_reason.as_deref(), Some("boom"));
        assert!(edited.updated_at >= post.updated_at);

        assert!(update_post(&pool, 9999, &PostUpdate::default())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn delete_reports_existence() {
        let pool = setup_pool().await;
        let post = insert(&pool, "c", Utc::now()).await;
        assert!(delete_post(&pool, post.id).await.unwrap());
        assert!(!delete_post(&pool, post.id).await.unwrap());
        assert!(get_post(&pool, post.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn stale_claims_are_failed() {
        let pool = setup_pool().await;
        let now = Utc::now();
        let stuck = insert(&pool, "stuck", now).await;
        let pending = insert(&pool, "pending", now).await;
        assert!(claim(&pool, stuck.id, SCHEDULED, now).await);

        // Nothing is older than an hour ago.
        assert_eq!(
            recover_stale_claims(&pool, now - Duration::hours(1)).await.unwrap(),
            0
        );
        let recovered = recover_stale_claims(&pool, Utc::now() + Duration::seconds(1))
            .await
            .unwrap();
        assert_eq!(recovered, 1);

        let stuck = get_post(&pool, stuck.id).await.unwrap().unwrap();
        assert_eq!(stuck.status, PostStatus::Failed);
        assert_eq!(stuck.failure_reason.as_deref(), Some(INTERRUPTED_REASON));
        let pending = get_post(&pool, pending.id).await.unwrap().unwrap();
        assert_eq!(pending.status, PostStatus::Pending);
    }

    #[tokio::test]
    async fn credentials_upsert() {
        let pool = setup_pool().await;
        assert!(load_credentials(&pool).await.unwrap().is_none());
        save_credentials(&pool, &Credentials::new("tok-1", "acct")).await.unwrap();
        save_credentials(&pool, &Credentials::new("tok-2", "acct")).await.unwrap();
        let creds = load_credentials(&pool).await.unwrap().unwrap();
        assert_eq!(creds.access_token, "tok-2");
        assert!(save_credentials(&pool, &Credentials::new("", "acct")).await.is_err());
    }
}
