//! Elasticsearch-backed document store.
//!
//! [`Repository`] wraps one aliased index and exposes typed CRUD with the
//! version-token contract of [`vdoc_core::DocumentStore`], so the optimistic
//! update coordinator runs against a live cluster exactly like it runs
//! against the in-memory store.

mod bulk;
mod index_version;
mod search;

pub use bulk::{BulkSession, BulkStats, ItemOutcome};
pub use index_version::IndexVersion;
pub use search::{FulltextSearchOpts, Hit, ScrollOpts, SearchResults};

use anyhow::{anyhow, Context, Result};
use elasticsearch::{
    http::response::Response as ElasticsearchResponse,
    indices::{
        IndicesCreateParts, IndicesDeleteParts, IndicesGetAliasParts, IndicesRefreshParts,
    },
    params::{OpType, Refresh},
    DeleteParts, Elasticsearch, GetParts, IndexParts,
};
use futures::future::BoxFuture;
use itertools::Itertools;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::json;
use std::{marker::PhantomData, num::NonZeroU32};
use vdoc_core::{
    DocumentStore, PutMode, StoreError, UpdateError, Updated, Versioned, VersionToken,
};
use vdoc_es_utils::{es_types, Success};

/// Typed handle to the documents behind one index alias
pub struct Repository<T> {
    elastic: Elasticsearch,
    alias: String,
    refresh_writes: bool,
    _entity: PhantomData<fn() -> T>,
}

impl<T> Repository<T> {
    pub fn new(elastic: Elasticsearch, alias: impl Into<String>) -> Self {
        Self {
            elastic,
            alias: alias.into(),
            refresh_writes: false,
            _entity: PhantomData,
        }
    }

    /// Makes every write wait for a refresh, so that reads and searches
    /// observe it immediately. Meant for demos and tests, not for ingestion
    /// throughput.
    pub fn refresh_writes(mut self) -> Self {
        self.refresh_writes = true;
        self
    }

    pub fn elastic(&self) -> &Elasticsearch {
        &self.elastic
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }

    pub(crate) fn refreshes_writes(&self) -> bool {
        self.refresh_writes
    }

    /// Creates the physical index for `version` of this alias. The mapping
    /// is left dynamic; only shard topology is configured.
    pub async fn create_index(&self, opts: &CreateIndexOpts) -> Result<String> {
        let index_name = opts.version.index_name(&self.alias);
        self.elastic
            .indices()
            .create(IndicesCreateParts::Index(&index_name))
            .body(json!({
                "settings": {
                    "index": {
                        "number_of_shards": opts.number_of_shards,
                        "number_of_replicas": opts.number_of_replicas,
                    }
                },
            }))
            .wait_for_active_shards("all")
            .send()
            .await
            .with_context(|| format!("Failed to create index '{}'", index_name))?
            .success()
            .await?;

        Ok(index_name)
    }

    pub async fn delete_index(&self, version: IndexVersion) -> Result<()> {
        self.elastic
            .indices()
            .delete(IndicesDeleteParts::Index(&[&version.index_name(&self.alias)]))
            .send()
            .await?
            .success()
            .await?;
        Ok(())
    }

    /// Atomically repoints the alias from `prev_version` to `new_version`
    pub async fn update_index_alias(
        &self,
        prev_version: Option<IndexVersion>,
        new_version: IndexVersion,
    ) -> Result<()> {
        let mut actions = vec![];

        if let Some(prev_version) = prev_version {
            actions.push(json!({
                "remove": {
                    "index": prev_version.index_name(&self.alias),
                    "alias": &self.alias,
                }
            }));
        }

        actions.push(json!({
            "add": {
                "index": new_version.index_name(&self.alias),
                "alias": &self.alias,
            }
        }));

        self.elastic
            .indices()
            .update_aliases()
            .body(json!({ "actions": actions }))
            .send()
            .await?
            .success()
            .await?;

        Ok(())
    }

    /// Version of the physical index currently behind the alias, or `None`
    /// when the alias does not exist yet
    pub async fn fetch_index_version(&self) -> Result<Option<IndexVersion>> {
        let response: ElasticsearchResponse = self
            .elastic
            .indices()
            .get_alias(IndicesGetAliasParts::Name(&[&self.alias]))
            .send()
            .await?;

        if response.status_code() == http::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        response.error_for_status_code_ref()?;

        let response = response.json::<es_types::GetAliasesResponse>().await?;

        let (index_name,) = response
            .0
            .into_iter()
            .map(|(index_name, _aliases)| index_name)
            .collect_tuple()
            .ok_or_else(|| anyhow!("expected exactly one index behind alias '{}'", self.alias))?;

        IndexVersion::of_index(&self.alias, &index_name)
            .map(Some)
            .ok_or_else(|| {
                anyhow!(
                    "index '{}' does not follow the '{}_<version>' naming",
                    index_name,
                    self.alias
                )
            })
    }

    /// Commits outstanding writes so that searches observe them
    pub async fn refresh(&self) -> Result<()> {
        self.elastic
            .indices()
            .refresh(IndicesRefreshParts::Index(&[&self.alias]))
            .send()
            .await?
            .success()
            .await?;
        Ok(())
    }
}

impl<T: Serialize + DeserializeOwned + Send + Sync> Repository<T> {
    pub async fn get(&self, id: &str) -> Result<Versioned<T>, StoreError> {
        let response = self
            .elastic
            .get(GetParts::IndexId(&self.alias, id))
            .send()
            .await
            .map_err(transport)?;

        if response.status_code() == http::StatusCode::NOT_FOUND {
            return Err(StoreError::NotFound(id.to_owned()));
        }
        if !response.status_code().is_success() {
            return Err(unexpected_status(response).await);
        }

        let body: es_types::GetDocResponse<T> = response.json().await.map_err(transport)?;
        if !body.found {
            return Err(StoreError::NotFound(id.to_owned()));
        }

        let doc = body
            ._source
            .ok_or_else(|| StoreError::Malformed(format!("document `{}` came without source", id)))?;
        let version = match (body._seq_no, body._primary_term) {
            (Some(seq_no), Some(primary_term)) => VersionToken {
                seq_no,
                primary_term,
            },
            _ => {
                return Err(StoreError::Malformed(format!(
                    "document `{}` came without version fields",
                    id
                )))
            }
        };

        Ok(Versioned { doc, version })
    }

    pub async fn put(&self, id: &str, doc: &T, mode: PutMode) -> Result<VersionToken, StoreError> {
        let request = self.elastic.index(IndexParts::IndexId(&self.alias, id));
        let request = match mode {
            PutMode::Create => request.op_type(OpType::Create),
            PutMode::Overwrite => request,
            PutMode::IfVersion(expected) => request
                .if_seq_no(expected.seq_no)
                .if_primary_term(expected.primary_term),
        };
        let request = if self.refresh_writes {
            request.refresh(Refresh::True)
        } else {
            request
        };

        let response = request.body(doc).send().await.map_err(transport)?;

        if response.status_code() == http::StatusCode::CONFLICT {
            return match mode {
                PutMode::Create => Err(StoreError::AlreadyExists(id.to_owned())),
                PutMode::IfVersion(expected) => Err(StoreError::Conflict {
                    key: id.to_owned(),
                    expected,
                }),
                // unconditional writes don't race on versions; the status
                // means the engine refused the operation outright
                PutMode::Overwrite => Err(unexpected_status(response).await),
            };
        }
        if !response.status_code().is_success() {
            return Err(unexpected_status(response).await);
        }

        let body: es_types::WriteResponse = response.json().await.map_err(transport)?;
        Ok(VersionToken {
            seq_no: body._seq_no,
            primary_term: body._primary_term,
        })
    }

    pub async fn delete(&self, id: &str) -> Result<(), StoreError> {
        let request = self.elastic.delete(DeleteParts::IndexId(&self.alias, id));
        let request = if self.refresh_writes {
            request.refresh(Refresh::True)
        } else {
            request
        };

        let response = request.send().await.map_err(transport)?;

        if response.status_code() == http::StatusCode::NOT_FOUND {
            return Err(StoreError::NotFound(id.to_owned()));
        }
        if !response.status_code().is_success() {
            return Err(unexpected_status(response).await);
        }
        Ok(())
    }

    /// Optimistic read-modify-write of one document; see [`vdoc_core::update`]
    pub async fn update<F>(
        &self,
        id: &str,
        max_retries: u32,
        transform: F,
    ) -> Result<Updated<T>, UpdateError>
    where
        F: Fn(T) -> T,
    {
        vdoc_core::update(self, id, max_retries, transform).await
    }

    /// Opens a bulk session that flushes every `batch_size` operations
    pub fn bulk(&self, batch_size: NonZeroU32) -> BulkSession<'_, T> {
        BulkSession::new(self, self.alias.clone(), batch_size)
    }

    /// Like [`Repository::bulk`], but writing to an explicit physical index
    /// instead of the alias (for loading a new index version before the
    /// alias is repointed)
    pub fn bulk_into(&self, index: impl Into<String>, batch_size: NonZeroU32) -> BulkSession<'_, T> {
        BulkSession::new(self, index.into(), batch_size)
    }
}

impl<T: Serialize + DeserializeOwned + Send + Sync> DocumentStore<T> for Repository<T> {
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Versioned<T>, StoreError>> {
        Box::pin(self.get(key))
    }

    fn put<'a>(
        &'a self,
        key: &'a str,
        doc: &'a T,
        mode: PutMode,
    ) -> BoxFuture<'a, Result<VersionToken, StoreError>> {
        Box::pin(self.put(key, doc, mode))
    }

    fn delete<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(self.delete(key))
    }
}

pub struct CreateIndexOpts {
    pub version: IndexVersion,
    pub number_of_shards: NonZeroU32,
    pub number_of_replicas: u32,
}

pub(crate) fn transport(err: elasticsearch::Error) -> StoreError {
    StoreError::Unavailable(Box::new(err))
}

pub(crate) async fn unexpected_status(response: ElasticsearchResponse) -> StoreError {
    let status = response.status_code();
    match response.text().await {
        Ok(body) => StoreError::Unavailable(
            format!("Elasticsearch returned {} response: {}", status, body).into(),
        ),
        Err(err) => StoreError::Unavailable(Box::new(err)),
    }
}
