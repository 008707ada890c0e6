//! Search, count and scrolling over a repository's alias.

use crate::Repository;
use anyhow::Result;
use elasticsearch::{ClearScrollParts, ScrollParts, SearchParts};
use serde::de::DeserializeOwned;
use serde_json::json;
use vdoc_core::VersionToken;
use vdoc_es_utils::es_types;

/// One search hit, carrying the version token so that results can feed
/// version-checked writes (the classic scroll-then-bulk-update flow)
pub struct Hit<T> {
    pub id: String,
    pub doc: T,
    /// Absent when the search did not ask for version fields
    pub version: Option<VersionToken>,
}

pub struct SearchResults<T> {
    pub total: u64,
    pub hits: Vec<Hit<T>>,
}

pub struct FulltextSearchOpts<'a> {
    pub query: &'a str,
    /// Field to match on; matches across all text fields when absent
    pub field: Option<&'a str>,
    pub size: u64,
}

pub struct ScrollOpts<'a> {
    /// Query to scroll through; everything when absent
    pub query: Option<serde_json::Value>,
    /// How long to keep the scroll context alive between pages, e.g. "1m"
    pub keep_alive: &'a str,
    pub page_size: u64,
}

impl<T: DeserializeOwned> Repository<T> {
    /// Fulltext `match` search on one field, or `multi_match` across all of
    /// them
    pub async fn fulltext_search(&self, opts: &FulltextSearchOpts<'_>) -> Result<SearchResults<T>> {
        let query = match opts.field {
            Some(field) => json!({ "match": { field: { "query": opts.query } } }),
            None => json!({ "multi_match": { "query": opts.query } }),
        };

        self.search_raw(json!({ "size": opts.size, "query": query }))
            .await
    }

    /// Runs a caller-supplied search body as-is (for queries pasted from
    /// console tooling that the typed helpers don't cover)
    pub async fn search_raw(&self, body: serde_json::Value) -> Result<SearchResults<T>> {
        let response = self
            .elastic()
            .search(SearchParts::Index(&[self.alias()]))
            .seq_no_primary_term(true)
            .body(body)
            .send()
            .await?;
        response.error_for_status_code_ref()?;

        let response: es_types::SearchResponse<T> = response.json().await?;
        Ok(SearchResults {
            total: response.hits.total.map(|total| total.value).unwrap_or(0),
            hits: response.hits.hits.into_iter().map(to_hit).collect(),
        })
    }

    /// Number of documents matching `query`, or all documents when absent
    pub async fn count(&self, query: Option<serde_json::Value>) -> Result<u64> {
        let indices = [self.alias()];
        let request = self
            .elastic()
            .count(elasticsearch::CountParts::Index(&indices));
        let request = match query {
            Some(query) => request.body(json!({ "query": query })),
            None => request.body(json!({})),
        };

        let response = request.send().await?;
        response.error_for_status_code_ref()?;

        let response: es_types::CountResponse = response.json().await?;
        Ok(response.count)
    }

    /// Feeds every hit of a (potentially huge) result set through `on_hit`,
    /// page by page, and returns how many hits were processed. The scroll
    /// context is released when the result set is exhausted.
    pub async fn scroll_each<F>(&self, opts: &ScrollOpts<'_>, mut on_hit: F) -> Result<u64>
    where
        F: FnMut(Hit<T>),
    {
        let query = opts
            .query
            .clone()
            .unwrap_or_else(|| json!({ "match_all": {} }));

        let response = self
            .elastic()
            .search(SearchParts::Index(&[self.alias()]))
            .scroll(opts.keep_alive)
            .seq_no_primary_term(true)
            .body(json!({ "size": opts.page_size, "query": query }))
            .send()
            .await?;
        response.error_for_status_code_ref()?;
        let mut page: es_types::SearchResponse<T> = response.json().await?;

        let mut scroll_id = None;
        let mut processed = 0;

        loop {
            if let Some(id) = page._scroll_id.take() {
                scroll_id = Some(id);
            }
            if page.hits.hits.is_empty() {
                break;
            }
            for hit in page.hits.hits {
                processed += 1;
                on_hit(to_hit(hit));
            }

            let id = match &scroll_id {
                Some(id) => id,
                None => break,
            };
            let response = self
                .elastic()
                .scroll(ScrollParts::None)
                .body(json!({ "scroll": opts.keep_alive, "scroll_id": id }))
                .send()
                .await?;
            response.error_for_status_code_ref()?;
            page = response.json().await?;
        }

        if let Some(id) = scroll_id {
            log::debug!("clearing scroll context after {} hits", processed);
            self.elastic()
                .clear_scroll(ClearScrollParts::None)
                .body(json!({ "scroll_id": [id] }))
                .send()
                .await?
                .error_for_status_code_ref()?;
        }

        Ok(processed)
    }
}

fn to_hit<T>(hit: es_types::SearchHit<T>) -> Hit<T> {
    let version = match (hit._seq_no, hit._primary_term) {
        (Some(seq_no), Some(primary_term)) => Some(VersionToken {
            seq_no,
            primary_term,
        }),
        _ => None,
    };
    Hit {
        id: hit._id,
        doc: hit._source,
        version,
    }
}
