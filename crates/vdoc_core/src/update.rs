use crate::{DocumentStore, PutMode, StoreError, Versioned, VersionToken};
use thiserror::Error;

/// Outcome of a successful [`update`]
#[derive(Debug)]
pub struct Updated<T> {
    pub doc: T,
    pub version: VersionToken,
    /// Number of conditional writes issued; 1 means no conflict was hit
    pub attempts: u32,
}

#[derive(Debug, Error)]
pub enum UpdateError {
    #[error("document `{0}` does not exist")]
    NotFound(String),
    #[error("update of `{key}` lost the version race on all {attempts} attempts")]
    ConflictExhausted { key: String, attempts: u32 },
    #[error(transparent)]
    Store(StoreError),
}

/// Updates the document at `key` by applying `transform` to its current
/// state and writing the result back conditioned on the version it was read
/// at.
///
/// A conflicting concurrent writer makes the conditional write fail, in
/// which case the document is read again (never reapplied to the stale
/// state) and the cycle repeats, up to `max_retries` extra rounds. Retries
/// are immediate. `transform` must be pure: under contention it runs once
/// per attempt.
///
/// Only version conflicts are retried. A missing document, an unavailable
/// store, or any other failure is returned right away.
pub async fn update<T, S, F>(
    store: &S,
    key: &str,
    max_retries: u32,
    transform: F,
) -> Result<Updated<T>, UpdateError>
where
    S: DocumentStore<T> + ?Sized,
    F: Fn(T) -> T,
{
    let mut attempts = 0;
    loop {
        let Versioned { doc, version } = store.get(key).await.map_err(|err| match err {
            StoreError::NotFound(key) => UpdateError::NotFound(key),
            other => UpdateError::Store(other),
        })?;

        let next = transform(doc);
        attempts += 1;

        match store.put(key, &next, PutMode::IfVersion(version)).await {
            Ok(version) => {
                return Ok(Updated {
                    doc: next,
                    version,
                    attempts,
                })
            }
            Err(StoreError::Conflict { .. }) if attempts <= max_retries => {
                log::debug!(
                    "update of `{}` conflicted at {}, retrying ({}/{})",
                    key,
                    version,
                    attempts,
                    max_retries + 1,
                );
            }
            Err(StoreError::Conflict { key, .. }) => {
                return Err(UpdateError::ConflictExhausted { key, attempts })
            }
            Err(other) => return Err(UpdateError::Store(other)),
        }
    }
}
