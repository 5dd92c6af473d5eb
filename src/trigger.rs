use chrono::Utc;
use serde::Serialize;
use tracing::{info, instrument};

use crate::attempt::publish_claimed;
use crate::credentials::CredentialProvider;
use crate::error::DispatchError;
use crate::lifecycle::{check_transition, AttemptOrigin};
use crate::model::PostStatus;
use crate::publish::{PublishClient, PublishOutcome};
use crate::store::PostStore;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ManualOutcome {
    Published {
        #[serde(rename = "externalId")]
        external_id: String,
    },
    Failed {
        reason: String,
    },
    /// Another attempt holds the post, or moved it on since it was read;
    /// nothing was sent.
    AlreadyInFlight,
}

impl From<PublishOutcome> for ManualOutcome {
    fn from(outcome: PublishOutcome) -> Self {
        match outcome {
            PublishOutcome::Published { external_id } => ManualOutcome::Published { external_id },
            PublishOutcome::Failed { reason } => ManualOutcome::Failed { reason },
        }
    }
}

/// Publish one post now, whatever its schedule or current status.
///
/// This bypasses the due-post query entirely but still takes the atomic claim,
/// bound to the status read here, so it never overlaps a batch attempt on the
/// same post and never republishes a post a batch published in the meantime.
#[instrument(skip_all, fields(post_id = id))]
pub async fn run_manual(
    store: &dyn PostStore,
    credentials: &dyn CredentialProvider,
    publisher: &dyn PublishClient,
    id: i64,
) -> Result<ManualOutcome, DispatchError> {
    let post = store.get(id).await?.ok_or(DispatchError::NotFound(id))?;

    let Some(creds) = credentials.current().await? else {
        return Err(DispatchError::Configuration);
    };

    let origin = AttemptOrigin::Manual {
        observed: post.status,
    };
    if check_transition(post.status, PostStatus::Processing, origin).is_err() {
        info!("post already being published");
        return Ok(ManualOutcome::AlreadyInFlight);
    }
    let Some(claimed) = store.claim_for_processing(id, origin, Utc::now()).await? else {
        info!(observed = %post.status, "post changed before it could be claimed");
        return Ok(ManualOutcome::AlreadyInFlight);
    };

    let outcome = publish_claimed(store, publisher, &claimed, &creds).await?;
    Ok(outcome.into())
}
