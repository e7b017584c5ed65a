use crate::api::scheme::SchemeError;
use crate::api::store::StoreError;
use std::fmt;

/// Fatal, non-retryable failure of a reconcile pass, identified by a numeric id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandError {
    pub id: i32,
    pub result: String,
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "id = {}; result = {}", self.id, self.result)
    }
}

impl std::error::Error for CommandError {}

#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("invalid reconcile key {0:?}, expected <namespace>/<name>")]
    InvalidKey(String),
    #[error(transparent)]
    Command(#[from] CommandError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Scheme(#[from] SchemeError),
    #[error("job {job} exists but is controlled by another object")]
    ForeignJob { job: String },
}
