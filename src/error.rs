//! Error taxonomy for the sync subsystem.
//!
//! One closed enum with structured fields. `NetworkUnavailable` is checked
//! proactively before each remote call and degrades to cached data rather
//! than failing the caller; the other variants surface as error results and
//! always leave the cache untouched (transactional rollback).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    /// Connectivity probe failed before any remote call was attempted.
    #[error("network unavailable")]
    NetworkUnavailable,

    /// The remote listener errored or was cancelled mid-fetch.
    #[error("remote fetch failed: {reason}")]
    RemoteFetchFailed { reason: String },

    /// A local cache transaction aborted; nothing was persisted.
    #[error("cache transaction failed: {source}")]
    TransactionFailed {
        #[from]
        source: sqlx::Error,
    },

    /// A push/event payload could not be decoded. Callers on the
    /// reconciliation path log and drop this instead of propagating it.
    #[error("malformed payload: {reason}")]
    MalformedPayload { reason: String },
}

impl From<crate::db::DbError> for SyncError {
    fn from(e: crate::db::DbError) -> Self {
        match e {
            crate::db::DbError::Sqlx(source) => SyncError::TransactionFailed { source },
        }
    }
}

impl SyncError {
    pub fn remote(reason: impl Into<String>) -> Self {
        SyncError::RemoteFetchFailed { reason: reason.into() }
    }

    pub fn malformed(reason: impl Into<String>) -> Self {
        SyncError::MalformedPayload { reason: reason.into() }
    }
}
