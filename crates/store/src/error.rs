use thiserror::Error;

/// Errors surfaced by the Record Store Gateway.
///
/// `Conflict` and `NotFound` map directly to the HTTP 400/404 split spec §7
/// describes for configuration errors; `Backend` is an opaque database
/// failure that the caller logs and treats as a transient failure.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0}")]
    Conflict(String),
    #[error("not found")]
    NotFound,
    #[error("store backend error: {0}")]
    Backend(#[from] sqlx::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Classify a raw `sqlx::Error` coming out of an insert/update as either a
/// uniqueness violation (-> [`StoreError::Conflict`]) or a generic backend
/// failure. SQLite reports constraint violations via `Error::Database` with
/// a code in the `23xxx` family; we match on the message since the crate
/// feature set here doesn't pull in the vendor-specific error downcast.
pub fn classify(err: sqlx::Error, conflict_message: impl Into<String>) -> StoreError {
    if let sqlx::Error::Database(ref db_err) = err {
        if db_err.message().contains("UNIQUE constraint failed") {
            return StoreError::Conflict(conflict_message.into());
        }
    }
    StoreError::Backend(err)
}
