//! Document store abstraction with optimistic concurrency control.
//!
//! A [`DocumentStore`] hands out a [`VersionToken`] with every read and
//! accepts one back on conditional writes. [`update`] builds the
//! read-modify-write retry loop on top of that contract.

pub mod memory;
mod update;

pub use update::{update, UpdateError, Updated};

use futures::future::BoxFuture;
use std::{cmp::Ordering, fmt};
use thiserror::Error;

/// Marker of how far a document's write history has advanced.
///
/// Tokens compare equal only when both parts match, which is exactly the
/// condition [`PutMode::IfVersion`] writes are accepted under. Every
/// successful write hands back a strictly greater token for the key.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct VersionToken {
    pub seq_no: i64,
    pub primary_term: i64,
}

impl VersionToken {
    /// Token assigned to the very first write of a key
    pub fn initial() -> Self {
        Self {
            seq_no: 0,
            primary_term: 1,
        }
    }

    /// Token a single-writer store assigns after one more write
    pub fn next(self) -> Self {
        Self {
            seq_no: self.seq_no + 1,
            ..self
        }
    }
}

impl Ord for VersionToken {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.primary_term, self.seq_no).cmp(&(other.primary_term, other.seq_no))
    }
}

impl PartialOrd for VersionToken {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for VersionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "(seq_no: {}, primary_term: {})",
            self.seq_no, self.primary_term
        )
    }
}

/// Document together with the version token it was read at
#[derive(Debug, Clone)]
pub struct Versioned<T> {
    pub doc: T,
    pub version: VersionToken,
}

/// How a write should treat the key's current state
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum PutMode {
    /// Write only if the key does not exist yet
    Create,
    /// Write unconditionally
    Overwrite,
    /// Write only if the stored token still equals the given one
    IfVersion(VersionToken),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("document `{0}` does not exist")]
    NotFound(String),
    #[error("document `{0}` already exists")]
    AlreadyExists(String),
    #[error("version conflict on `{key}`: stored version no longer matches {expected}")]
    Conflict {
        key: String,
        expected: VersionToken,
    },
    #[error("malformed store response: {0}")]
    Malformed(String),
    #[error("document store unavailable")]
    Unavailable(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Keyed document storage with conditional writes.
///
/// Methods return boxed futures so the trait stays object-safe and
/// implementable on stable without extra machinery.
pub trait DocumentStore<T> {
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Versioned<T>, StoreError>>;

    fn put<'a>(
        &'a self,
        key: &'a str,
        doc: &'a T,
        mode: PutMode,
    ) -> BoxFuture<'a, Result<VersionToken, StoreError>>;

    fn delete<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<(), StoreError>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_tokens_order_by_term_then_seq_no() {
        let token = |seq_no, primary_term| VersionToken {
            seq_no,
            primary_term,
        };

        assert!(token(0, 1) < token(1, 1));
        assert!(token(5, 1) < token(0, 2));
        assert_eq!(token(3, 2), token(3, 2));
        assert!(token(3, 2).next() > token(3, 2));
    }
}
