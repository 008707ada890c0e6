//! Round trips against a live cluster. Every test is a no-op unless
//! `VDOC_TEST_ES_URL` points at a disposable Elasticsearch instance.

use serde::{Deserialize, Serialize};
use std::num::NonZeroU32;
use vdoc_core::{PutMode, StoreError, UpdateError};
use vdoc_es::{CreateIndexOpts, FulltextSearchOpts, IndexVersion, Repository, ScrollOpts};
use vdoc_es_utils::elasticsearch_client_or_return;

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
struct Thing {
    name: String,
    amount: i64,
}

impl Thing {
    fn new(name: &str, amount: i64) -> Self {
        Self {
            name: name.to_owned(),
            amount,
        }
    }
}

async fn fresh_repo(alias: &str, elastic: elasticsearch::Elasticsearch) -> Repository<Thing> {
    let repo = Repository::new(elastic, alias).refresh_writes();

    // drop leftovers of an earlier run, then start at version 1
    if let Some(version) = repo.fetch_index_version().await.unwrap() {
        repo.delete_index(version).await.unwrap();
    }
    repo.create_index(&CreateIndexOpts {
        version: IndexVersion::default(),
        number_of_shards: NonZeroU32::new(1).unwrap(),
        number_of_replicas: 0,
    })
    .await
    .unwrap();
    repo.update_index_alias(None, IndexVersion::default())
        .await
        .unwrap();

    repo
}

async fn teardown(repo: &Repository<Thing>) {
    let version = repo.fetch_index_version().await.unwrap().unwrap();
    repo.delete_index(version).await.unwrap();
}

#[tokio::test]
async fn crud_roundtrip_works() {
    let elastic = elasticsearch_client_or_return!();
    let repo = fresh_repo("vdoc_test_crud", elastic).await;

    match repo.get("first").await {
        Err(StoreError::NotFound(id)) => assert_eq!(id, "first"),
        other => panic!("unexpected result: {:?}", other.map(|it| it.doc)),
    }

    let created = repo
        .put("first", &Thing::new("a thing", 42), PutMode::Create)
        .await
        .unwrap();

    let read = repo.get("first").await.unwrap();
    assert_eq!(read.doc, Thing::new("a thing", 42));
    assert_eq!(read.version, created);

    match repo
        .put("first", &Thing::new("again", 40), PutMode::Create)
        .await
    {
        Err(StoreError::AlreadyExists(id)) => assert_eq!(id, "first"),
        other => panic!("unexpected result: {:?}", other),
    }

    let overwritten = repo
        .put("first", &Thing::new("another thing", 666), PutMode::Overwrite)
        .await
        .unwrap();
    assert!(overwritten > created);

    repo.delete("first").await.unwrap();
    assert!(matches!(
        repo.get("first").await,
        Err(StoreError::NotFound(_))
    ));

    teardown(&repo).await;
}

#[tokio::test]
async fn stale_version_writes_are_rejected() {
    let elastic = elasticsearch_client_or_return!();
    let repo = fresh_repo("vdoc_test_conflicts", elastic).await;

    repo.put("2", &Thing::new("another thing", 1), PutMode::Create)
        .await
        .unwrap();
    let stale = repo.get("2").await.unwrap().version;

    // consume the token once...
    repo.put(
        "2",
        &Thing::new("another thing", 2),
        PutMode::IfVersion(stale),
    )
    .await
    .unwrap();

    // ...using it again must lose
    match repo
        .put(
            "2",
            &Thing::new("another thing", 3),
            PutMode::IfVersion(stale),
        )
        .await
    {
        Err(StoreError::Conflict { key, expected }) => {
            assert_eq!(key, "2");
            assert_eq!(expected, stale);
        }
        other => panic!("unexpected result: {:?}", other),
    }
    assert_eq!(repo.get("2").await.unwrap().doc.amount, 2);

    teardown(&repo).await;
}

#[tokio::test]
async fn update_applies_the_transform_through_the_coordinator() {
    let elastic = elasticsearch_client_or_return!();
    let repo = fresh_repo("vdoc_test_update", elastic).await;

    repo.put("counter", &Thing::new("counter", 0), PutMode::Create)
        .await
        .unwrap();

    let updated = repo
        .update("counter", 2, |mut thing| {
            thing.amount += 1;
            thing
        })
        .await
        .unwrap();

    assert_eq!(updated.attempts, 1);
    assert_eq!(updated.doc.amount, 1);
    assert_eq!(repo.get("counter").await.unwrap().doc.amount, 1);

    match repo.update("ghost", 0, |thing| thing).await {
        Err(UpdateError::NotFound(id)) => assert_eq!(id, "ghost"),
        other => panic!("unexpected result: {:?}", other.map(|it| it.doc)),
    }

    teardown(&repo).await;
}

#[tokio::test]
async fn bulk_sessions_batch_and_report_conflicts() {
    let elastic = elasticsearch_client_or_return!();
    let repo = fresh_repo("vdoc_test_bulk", elastic).await;

    let mut session = repo.bulk(NonZeroU32::new(25).unwrap());
    for i in 0..60 {
        session
            .index(&format!("doc-{}", i), &Thing::new("bulk thing", i))
            .await
            .unwrap();
    }
    // a version-checked write with a made-up token must surface as a
    // conflict item, not sink the batch
    session
        .index_if(
            "doc-0",
            &Thing::new("too late", 0),
            vdoc_core::VersionToken {
                seq_no: 12,
                primary_term: 34,
            },
        )
        .await
        .unwrap();
    let stats = session.finish().await.unwrap();

    assert_eq!(stats.succeeded, 60);
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.conflicts, 1);
    // 61 operations at a batch size of 25: two full flushes plus the tail
    assert_eq!(stats.flushes, 3);

    repo.refresh().await.unwrap();
    assert_eq!(repo.count(None).await.unwrap(), 60);

    teardown(&repo).await;
}

#[tokio::test]
async fn search_and_scroll_see_indexed_documents() {
    let elastic = elasticsearch_client_or_return!();
    let repo = fresh_repo("vdoc_test_search", elastic).await;

    let mut session = repo.bulk(NonZeroU32::new(100).unwrap());
    for i in 0..30 {
        let name = if i % 3 == 0 { "quick brown fox" } else { "lazy dog" };
        session
            .index(&format!("doc-{}", i), &Thing::new(name, i))
            .await
            .unwrap();
    }
    session.finish().await.unwrap();
    repo.refresh().await.unwrap();

    let results = repo
        .fulltext_search(&FulltextSearchOpts {
            query: "brown",
            field: Some("name"),
            size: 100,
        })
        .await
        .unwrap();
    assert_eq!(results.total, 10);
    assert!(results.hits.iter().all(|hit| hit.version.is_some()));

    let mut scrolled = 0;
    let processed = repo
        .scroll_each(
            &ScrollOpts {
                query: None,
                keep_alive: "1m",
                page_size: 7,
            },
            |hit| {
                assert!(hit.version.is_some());
                scrolled += 1;
            },
        )
        .await
        .unwrap();
    assert_eq!(processed, 30);
    assert_eq!(scrolled, 30);

    teardown(&repo).await;
}
