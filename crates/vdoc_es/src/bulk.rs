//! Batched writes over the `_bulk` ndjson protocol.

use crate::Repository;
use anyhow::Result;
use elasticsearch::{params::Refresh, BulkParts};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::json;
use std::{mem, num::NonZeroU32};
use vdoc_core::VersionToken;
use vdoc_es_utils::es_types;

/// What Elasticsearch did to a single queued operation
pub struct ItemOutcome<'i> {
    pub id: Option<&'i str>,
    /// The bulk action name: "index", "create" or "delete"
    pub action: &'i str,
    pub status: u16,
    pub error: Option<&'i str>,
}

impl ItemOutcome<'_> {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_conflict(&self) -> bool {
        self.status == http::StatusCode::CONFLICT.as_u16()
    }
}

#[derive(Debug, Default, Clone)]
pub struct BulkStats {
    pub succeeded: u64,
    pub failed: u64,
    /// Subset of `failed` that lost a version race (item status 409)
    pub conflicts: u64,
    pub flushes: u64,
}

/// Queue of bulk operations that flushes itself every `batch_size` entries.
///
/// Item-level failures do not fail the session: they are counted in
/// [`BulkStats`] and handed to the item callback, so one conflicted
/// operation cannot sink a batch of thousands. Conflicted version-checked
/// writes are not retried here; re-running them safely needs a fresh read,
/// which is what [`vdoc_core::update`] is for.
pub struct BulkSession<'a, T> {
    repo: &'a Repository<T>,
    index: String,
    lines: Vec<String>,
    queued: usize,
    batch_size: usize,
    on_item: Option<Box<dyn FnMut(&ItemOutcome<'_>) + 'a>>,
    stats: BulkStats,
}

impl<'a, T: Serialize + DeserializeOwned + Send + Sync> BulkSession<'a, T> {
    pub(crate) fn new(repo: &'a Repository<T>, index: String, batch_size: NonZeroU32) -> Self {
        Self {
            repo,
            index,
            lines: vec![],
            queued: 0,
            batch_size: batch_size.get() as usize,
            on_item: None,
            stats: BulkStats::default(),
        }
    }

    /// Registers a callback invoked with every item outcome, failed or not
    pub fn on_item(mut self, callback: impl FnMut(&ItemOutcome<'_>) + 'a) -> Self {
        self.on_item = Some(Box::new(callback));
        self
    }

    pub async fn index(&mut self, id: &str, doc: &T) -> Result<()> {
        self.push(json!({ "index": { "_id": id } }), Some(doc)).await
    }

    /// Indexes a document letting Elasticsearch assign the id
    pub async fn index_auto(&mut self, doc: &T) -> Result<()> {
        self.push(json!({ "index": {} }), Some(doc)).await
    }

    pub async fn create(&mut self, id: &str, doc: &T) -> Result<()> {
        self.push(json!({ "create": { "_id": id } }), Some(doc)).await
    }

    /// Indexes a document only if its stored version still equals `expected`;
    /// a losing write surfaces as a 409 item outcome
    pub async fn index_if(&mut self, id: &str, doc: &T, expected: VersionToken) -> Result<()> {
        self.push(
            json!({
                "index": {
                    "_id": id,
                    "if_seq_no": expected.seq_no,
                    "if_primary_term": expected.primary_term,
                }
            }),
            Some(doc),
        )
        .await
    }

    pub async fn delete(&mut self, id: &str) -> Result<()> {
        self.push(json!({ "delete": { "_id": id } }), None).await
    }

    async fn push(&mut self, header: serde_json::Value, doc: Option<&T>) -> Result<()> {
        self.lines.push(header.to_string());
        if let Some(doc) = doc {
            self.lines.push(serde_json::to_string(doc)?);
        }
        self.queued += 1;

        if self.queued >= self.batch_size {
            self.flush().await?;
        }
        Ok(())
    }

    /// Sends everything queued so far. Called automatically at the batch
    /// boundary and by [`BulkSession::finish`].
    pub async fn flush(&mut self) -> Result<()> {
        if self.queued == 0 {
            return Ok(());
        }

        let _t = stdx::debug_time_it("Flushing a bulk batch");

        let lines = mem::take(&mut self.lines);
        let batch_len = mem::replace(&mut self.queued, 0);
        log::debug!("bulk: sending {} operations to '{}'", batch_len, self.index);

        let request = self.repo.elastic().bulk(BulkParts::Index(&self.index));
        let request = if self.repo.refreshes_writes() {
            request.refresh(Refresh::WaitFor)
        } else {
            request
        };

        let response = request.body(lines).send().await?;
        response.error_for_status_code_ref()?;
        let response: es_types::BulkResponse = response.json().await?;

        self.stats.flushes += 1;
        for item in &response.items {
            for (action, body) in item {
                let outcome = ItemOutcome {
                    id: body._id.as_deref(),
                    action,
                    status: body.status,
                    error: body
                        .error
                        .as_ref()
                        .map(|err| err.reason.as_deref().unwrap_or(&err.kind)),
                };

                if outcome.is_success() {
                    self.stats.succeeded += 1;
                } else {
                    self.stats.failed += 1;
                    if outcome.is_conflict() {
                        self.stats.conflicts += 1;
                    }
                    log::warn!(
                        "bulk: {} of `{}` failed with status {}: {}",
                        outcome.action,
                        outcome.id.unwrap_or("<no id>"),
                        outcome.status,
                        outcome.error.unwrap_or("<no error body>"),
                    );
                }

                if let Some(on_item) = &mut self.on_item {
                    on_item(&outcome);
                }
            }
        }

        Ok(())
    }

    /// Flushes the tail batch and returns the session statistics
    pub async fn finish(mut self) -> Result<BulkStats> {
        self.flush().await?;
        Ok(self.stats)
    }
}
