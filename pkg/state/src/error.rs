/// Store failures callers branch on. Everything else is a plain `anyhow` error.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("conflict writing {key}: expected version {expected}, found {found}")]
    Conflict {
        key: String,
        expected: u64,
        found: u64,
    },
    #[error("{key} not found")]
    NotFound { key: String },
    #[error("{key} already exists")]
    AlreadyExists { key: String },
}

/// Objects that contradict each other. Only a change to them can clear it,
/// so controllers record it and wait instead of retrying.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct InvalidConfig(pub String);

pub fn is_invalid_config(err: &anyhow::Error) -> bool {
    err.downcast_ref::<InvalidConfig>().is_some()
}

pub fn is_conflict(err: &anyhow::Error) -> bool {
    matches!(
        err.downcast_ref::<StoreError>(),
        Some(StoreError::Conflict { .. })
    )
}
