//! The publish-and-record step shared by the dispatcher and the manual trigger.

use anyhow::Result;
use chrono::Utc;
use tracing::{info, instrument, warn};

use crate::model::{Credentials, Post};
use crate::publish::{PublishClient, PublishOutcome, PublishRequest};
use crate::store::PostStore;

/// Publish a post the caller has already claimed and persist the outcome.
///
/// A rejected publish is data, not an error: it comes back as
/// [`PublishOutcome::Failed`] after being stored on the post. Only a
/// repository fault is returned as `Err`.
#[instrument(skip_all, fields(post_id = post.id))]
pub async fn publish_claimed(
    store: &dyn PostStore,
    publisher: &dyn PublishClient,
    post: &Post,
    credentials: &Credentials,
) -> Result<PublishOutcome> {
    let outcome = publisher
        .publish(PublishRequest::for_post(post, credentials))
        .await;

    match &outcome {
        PublishOutcome::Published { external_id } => {
            store.record_success(post.id, external_id, Utc::now()).await?;
            info!(%external_id, "post published");
        }
        PublishOutcome::Failed { reason } => {
            store.record_failure(post.id, reason).await?;
            warn!(%reason, "publish failed");
        }
    }
    Ok(outcome)
}
