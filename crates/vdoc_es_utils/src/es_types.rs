//! Serde mappings for the slices of Elasticsearch responses we consume.
//! Only the fields that are actually read are declared; everything else in
//! the payloads is ignored.

use serde::Deserialize;
use std::collections::HashMap;

/// Response of the document get API
#[derive(Deserialize)]
pub struct GetDocResponse<Entity> {
    pub _id: String,
    pub found: bool,
    // absent when `found` is false
    pub _seq_no: Option<i64>,
    pub _primary_term: Option<i64>,
    #[serde(default = "default_none")]
    pub _source: Option<Entity>,
}

// default fn so that Entity itself doesn't need to implement Default
fn default_none<Entity>() -> Option<Entity> {
    None
}

/// Response of the index/create/delete document APIs
#[derive(Deserialize)]
pub struct WriteResponse {
    pub _id: String,
    pub _seq_no: i64,
    pub _primary_term: i64,
    pub result: String,
}

#[derive(Deserialize)]
pub struct SearchResponse<Entity> {
    pub _scroll_id: Option<String>,
    pub hits: SearchHits<Entity>,
}

#[derive(Deserialize)]
pub struct SearchHits<Entity> {
    pub total: Option<TotalHits>,
    pub hits: Vec<SearchHit<Entity>>,
}

#[derive(Deserialize)]
pub struct TotalHits {
    pub value: u64,
}

#[derive(Deserialize)]
pub struct SearchHit<Entity> {
    pub _id: String,
    // present only when the search asked for seq_no_primary_term
    pub _seq_no: Option<i64>,
    pub _primary_term: Option<i64>,
    pub _source: Entity,
}

#[derive(Deserialize)]
pub struct CountResponse {
    pub count: u64,
}

#[derive(Deserialize)]
pub struct BulkResponse {
    pub errors: bool,
    pub items: Vec<HashMap<String, BulkItemBody>>,
}

/// Body of one `items` entry, keyed by the action name ("index", "create",
/// "delete", ...)
#[derive(Deserialize)]
pub struct BulkItemBody {
    pub _id: Option<String>,
    pub status: u16,
    pub error: Option<BulkItemError>,
}

#[derive(Deserialize)]
pub struct BulkItemError {
    #[serde(rename = "type")]
    pub kind: String,
    pub reason: Option<String>,
}

#[derive(Deserialize)]
pub struct GetAliasesResponse(pub HashMap<String, IndexAliases>);

#[derive(Deserialize)]
pub struct IndexAliases {
    pub aliases: HashMap<String, IndexAlias>,
}

#[derive(Deserialize)]
pub struct IndexAlias {}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn get_doc_response_works_for_found_and_missing() {
        let found = serde_json::from_value::<GetDocResponse<serde_json::Value>>(json!({
            "_index": "docs_1",
            "_id": "first",
            "_version": 3,
            "_seq_no": 2,
            "_primary_term": 1,
            "found": true,
            "_source": { "name": "a thing", "amount": 42 }
        }))
        .unwrap();
        assert!(found.found);
        assert_eq!(found._seq_no, Some(2));
        assert_eq!(found._primary_term, Some(1));
        assert!(found._source.is_some());

        let missing = serde_json::from_value::<GetDocResponse<serde_json::Value>>(json!({
            "_index": "docs_1",
            "_id": "ghost",
            "found": false
        }))
        .unwrap();
        assert!(!missing.found);
        assert!(missing._seq_no.is_none());
        assert!(missing._source.is_none());
    }

    #[test]
    fn search_response_carries_version_fields_when_requested() {
        let response = serde_json::from_value::<SearchResponse<serde_json::Value>>(json!({
            "took": 2,
            "timed_out": false,
            "hits": {
                "total": { "value": 1, "relation": "eq" },
                "max_score": 1.0,
                "hits": [{
                    "_index": "docs_1",
                    "_id": "first",
                    "_seq_no": 5,
                    "_primary_term": 1,
                    "_score": 1.0,
                    "_source": { "name": "a thing" }
                }]
            }
        }))
        .unwrap();

        assert_eq!(response.hits.total.unwrap().value, 1);
        let hit = &response.hits.hits[0];
        assert_eq!(hit._id, "first");
        assert_eq!(hit._seq_no, Some(5));
        assert!(response._scroll_id.is_none());
    }

    #[test]
    fn bulk_response_reports_item_level_conflicts() {
        let response = serde_json::from_value::<BulkResponse>(json!({
            "took": 30,
            "errors": true,
            "items": [
                {
                    "index": { "_index": "docs_1", "_id": "doc-1", "status": 200,
                               "_seq_no": 7, "_primary_term": 1, "result": "updated" }
                },
                {
                    "index": { "_index": "docs_1", "_id": "doc-2", "status": 409,
                               "error": { "type": "version_conflict_engine_exception",
                                          "reason": "[doc-2]: version conflict" } }
                }
            ]
        }))
        .unwrap();

        assert!(response.errors);
        let conflicted = response.items[1].get("index").unwrap();
        assert_eq!(conflicted.status, 409);
        assert_eq!(
            conflicted.error.as_ref().unwrap().kind,
            "version_conflict_engine_exception"
        );
    }

    #[test]
    fn get_aliases_response_works() {
        serde_json::from_value::<GetAliasesResponse>(json!({
            "docs_1": { "aliases": { "docs": {} } },
            ".kibana_1": { "aliases": { ".kibana": {} } }
        }))
        .unwrap();
    }
}
