use thiserror::Error;

/// Errors that abort a whole dispatch cycle or manual trigger.
///
/// Individual publish failures are not errors: they are recorded on the post.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("publishing credentials are not configured")]
    Configuration,
    #[error("post {0} not found")]
    NotFound(i64),
    #[error("repository error: {0:#}")]
    Repository(#[from] anyhow::Error),
}

impl DispatchError {
    pub fn is_configuration(&self) -> bool {
        matches!(self, DispatchError::Configuration)
    }
}
