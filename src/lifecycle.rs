//! Post lifecycle state machine.
//!
//! ```text
//! PENDING ──┐
//!           ├──> PROCESSING ──> PUBLISHED
//! FAILED ───┘         └───────> FAILED
//! ```
//!
//! Every publish attempt enters `PROCESSING` first. The repository applies the
//! claim as a single conditional update whose permitted source states come from
//! [`claimable_states`], so the rules here are the ones the store enforces.

use crate::model::PostStatus;
use thiserror::Error;

/// Whether `FAILED` posts are picked up again by scheduled cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailedRetry {
    /// Failed posts wait for a manual trigger.
    #[default]
    ManualOnly,
    /// Failed posts whose schedule has passed are due again.
    Automatic,
}

impl FailedRetry {
    pub fn from_flag(retry_failed: bool) -> Self {
        if retry_failed {
            FailedRetry::Automatic
        } else {
            FailedRetry::ManualOnly
        }
    }
}

/// Who is starting a publish attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOrigin {
    Scheduled(FailedRetry),
    /// Operator override: ignores the schedule and may republish a published
    /// post, but only claims from the status the operator last read.
    Manual { observed: PostStatus },
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid transition {from} -> {to}")]
pub struct TransitionError {
    pub from: PostStatus,
    pub to: PostStatus,
}

/// Source states from which `origin` may claim a post into `PROCESSING`.
pub fn claimable_states(origin: AttemptOrigin) -> &'static [PostStatus] {
    match origin {
        AttemptOrigin::Scheduled(FailedRetry::ManualOnly) => &[PostStatus::Pending],
        AttemptOrigin::Scheduled(FailedRetry::Automatic) => {
            &[PostStatus::Pending, PostStatus::Failed]
        }
        AttemptOrigin::Manual { observed } => match observed {
            PostStatus::Pending => &[PostStatus::Pending],
            PostStatus::Failed => &[PostStatus::Failed],
            PostStatus::Published => &[PostStatus::Published],
            PostStatus::Processing => &[],
        },
    }
}

pub fn can_claim(status: PostStatus, origin: AttemptOrigin) -> bool {
    claimable_states(origin).contains(&status)
}

/// Validate a single step of the machine.
pub fn check_transition(
    from: PostStatus,
    to: PostStatus,
    origin: AttemptOrigin,
) -> Result<(), TransitionError> {
    let allowed = match (from, to) {
        (_, PostStatus::Processing) => can_claim(from, origin),
        (PostStatus::Processing, PostStatus::Published | PostStatus::Failed) => true,
        _ => false,
    };
    if allowed {
        Ok(())
    } else {
        Err(TransitionError { from, to })
    }
}
