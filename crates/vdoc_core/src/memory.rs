//! In-process [`DocumentStore`] with the same token semantics as the real
//! backend. Handy for tests and contention experiments that should not need
//! a running cluster.

use crate::{DocumentStore, PutMode, StoreError, Versioned, VersionToken};
use futures::future::BoxFuture;
use std::{collections::HashMap, sync::Mutex};

pub struct MemStore<T> {
    docs: Mutex<HashMap<String, (T, VersionToken)>>,
}

impl<T> MemStore<T> {
    pub fn new() -> Self {
        Self {
            docs: Mutex::new(HashMap::new()),
        }
    }
}

impl<T> Default for MemStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + Sync> DocumentStore<T> for MemStore<T> {
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Versioned<T>, StoreError>> {
        Box::pin(async move {
            let docs = self.docs.lock().unwrap();
            match docs.get(key) {
                Some((doc, version)) => Ok(Versioned {
                    doc: doc.clone(),
                    version: *version,
                }),
                None => Err(StoreError::NotFound(key.to_owned())),
            }
        })
    }

    fn put<'a>(
        &'a self,
        key: &'a str,
        doc: &'a T,
        mode: PutMode,
    ) -> BoxFuture<'a, Result<VersionToken, StoreError>> {
        Box::pin(async move {
            let mut docs = self.docs.lock().unwrap();
            let current = docs.get(key).map(|(_, version)| *version);

            let assigned = match (mode, current) {
                (PutMode::Create, Some(_)) => {
                    return Err(StoreError::AlreadyExists(key.to_owned()))
                }
                (PutMode::IfVersion(expected), stored) if stored != Some(expected) => {
                    return Err(StoreError::Conflict {
                        key: key.to_owned(),
                        expected,
                    })
                }
                // the token advances on every accepted write, also when the
                // value itself is unchanged
                (_, Some(version)) => version.next(),
                (_, None) => VersionToken::initial(),
            };

            docs.insert(key.to_owned(), (doc.clone(), assigned));
            Ok(assigned)
        })
    }

    fn delete<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            let mut docs = self.docs.lock().unwrap();
            match docs.remove(key) {
                Some(_) => Ok(()),
                None => Err(StoreError::NotFound(key.to_owned())),
            }
        })
    }
}
