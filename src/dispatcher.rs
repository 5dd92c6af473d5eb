use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, instrument, warn, Span};
use uuid::Uuid;

use crate::attempt::publish_claimed;
use crate::credentials::CredentialProvider;
use crate::error::DispatchError;
use crate::lifecycle::AttemptOrigin;
use crate::publish::{PublishClient, PublishOutcome};
use crate::store::PostStore;

/// Aggregate result of one dispatch cycle.
///
/// `processed` counts every due post considered; `skipped` are the ones another
/// invocation claimed first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub processed: usize,
    pub successes: usize,
    pub failures: usize,
    pub skipped: usize,
}

/// Run one batch cycle: publish every post that is due at `now`.
///
/// Posts are attempted one at a time in the order the store returns them. A
/// failed publish is recorded on its post and the cycle moves on; only missing
/// credentials or a repository fault abort the cycle.
#[instrument(skip_all, fields(cycle_id = %Uuid::new_v4(), processed = tracing::field::Empty))]
pub async fn run_cycle(
    store: &dyn PostStore,
    credentials: &dyn CredentialProvider,
    publisher: &dyn PublishClient,
    now: DateTime<Utc>,
) -> Result<CycleReport, DispatchError> {
    let Some(creds) = credentials.current().await? else {
        warn!("credentials not configured; cycle skipped");
        return Err(DispatchError::Configuration);
    };

    let due = store.list_due(now).await?;
    Span::current().record("processed", due.len());
    let mut report = CycleReport {
        processed: due.len(),
        ..Default::default()
    };
    if due.is_empty() {
        return Ok(report);
    }
    info!(due = due.len(), "dispatching due posts");

    let origin = AttemptOrigin::Scheduled(store.failed_retry());
    for post in &due {
        let Some(claimed) = store.claim_for_processing(post.id, origin, now).await? else {
            info!(post_id = post.id, "post claimed elsewhere; skipping");
            report.skipped += 1;
            continue;
        };
        match publish_claimed(store, publisher, &claimed, &creds).await? {
            PublishOutcome::Published { .. } => report.successes += 1,
            PublishOutcome::Failed { .. } => report.failures += 1,
        }
    }

    info!(
        successes = report.successes,
        failures = report.failures,
        skipped = report.skipped,
        "cycle complete"
    );
    Ok(report)
}
