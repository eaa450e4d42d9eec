use thiserror::Error;

/// Returned when a persisted status string does not name a known
/// [`RunStatus`](crate::types::RunStatus) variant.
#[derive(Error, Debug, PartialEq, Eq)]
#[error("Unknown run status: {0:?}")]
pub struct InvalidStatus(pub String);
