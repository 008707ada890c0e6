//! vdoc cli entrypoint

use anyhow::{Context, Result};
use serde_json::{json, Value};
use std::{
    fs,
    io::{self, BufRead},
    num::NonZeroU32,
    path::PathBuf,
    sync::Arc,
};
use structopt::StructOpt;
use url::Url;
use vdoc_core::{PutMode, StoreError, UpdateError};
use vdoc_es::{CreateIndexOpts, FulltextSearchOpts, IndexVersion, Repository};

#[derive(Debug, StructOpt)]
#[structopt(name = "vdoc")]
enum CliArgs {
    /// Create the next version of the index and repoint the alias to it
    Init {
        /// Number of shards to use for the index (min: 1)
        #[structopt(long, default_value = "1")]
        n_shards: NonZeroU32,

        /// Number of replicas to create for the index
        #[structopt(long, default_value = "0")]
        n_replicas: u32,

        /// Whether to keep the previous index version once the new one is live
        #[structopt(long)]
        leave_old_index: bool,

        #[structopt(flatten)]
        elasticsearch: ElasticsearchArgs,

        #[structopt(flatten)]
        index: IndexArgs,
    },

    /// Store a document under the given id
    Put {
        /// Document id
        id: String,

        /// Document body as a JSON object
        doc: String,

        /// Fail instead of overwriting when the id already exists
        #[structopt(long)]
        create_only: bool,

        #[structopt(flatten)]
        elasticsearch: ElasticsearchArgs,

        #[structopt(flatten)]
        index: IndexArgs,
    },

    /// Fetch a document and its version
    Get {
        id: String,

        #[structopt(flatten)]
        elasticsearch: ElasticsearchArgs,

        #[structopt(flatten)]
        index: IndexArgs,
    },

    /// Delete a document
    Delete {
        id: String,

        #[structopt(flatten)]
        elasticsearch: ElasticsearchArgs,

        #[structopt(flatten)]
        index: IndexArgs,
    },

    /// Increment a numeric field of a document with optimistic concurrency,
    /// retrying when concurrent writers get in the way
    Update {
        /// Document id
        id: String,

        /// Name of the numeric field to increment
        #[structopt(long)]
        incr: String,

        /// Amount to add to the field
        #[structopt(long, default_value = "1")]
        by: i64,

        /// How many version conflicts to absorb before giving up
        #[structopt(long, default_value = "3")]
        max_retries: u32,

        #[structopt(flatten)]
        elasticsearch: ElasticsearchArgs,

        #[structopt(flatten)]
        index: IndexArgs,
    },

    /// Load a newline-delimited JSON file into a fresh index version, then
    /// repoint the alias
    BulkLoad {
        /// Path to the dataset; one JSON document per line
        #[structopt(long, env = "VDOC_DATASET_PATH")]
        file: PathBuf,

        /// Number of documents per bulk request
        #[structopt(long, default_value = "5000")]
        ingest_batch: NonZeroU32,

        /// Number of shards to use for the new index (min: 1)
        #[structopt(long, default_value = "1")]
        n_shards: NonZeroU32,

        /// Number of replicas to create for the new index
        #[structopt(long, default_value = "0")]
        n_replicas: u32,

        /// Whether to keep the previous index version once the new one is live
        #[structopt(long)]
        leave_old_index: bool,

        #[structopt(flatten)]
        elasticsearch: ElasticsearchArgs,

        #[structopt(flatten)]
        index: IndexArgs,
    },

    /// Issue a fulltext search thru all the documents
    Search {
        /// String of text to search for
        query: stdx::NonHollowString,

        /// Particular field to search by. If none is specified (which is the
        /// default) searches across all text fields
        #[structopt(long)]
        field_name: Option<String>,

        /// Maximum number of hits to return
        #[structopt(long, default_value = "10")]
        size: u64,

        #[structopt(flatten)]
        elasticsearch: ElasticsearchArgs,

        #[structopt(flatten)]
        index: IndexArgs,
    },

    /// Count documents, optionally restricted to a fulltext match
    Count {
        /// String of text to count matches for; counts everything when absent
        query: Option<stdx::NonHollowString>,

        /// Particular field to match on
        #[structopt(long)]
        field_name: Option<String>,

        #[structopt(flatten)]
        elasticsearch: ElasticsearchArgs,

        #[structopt(flatten)]
        index: IndexArgs,
    },

    /// Hammer one document with concurrent optimistic updates and report
    /// how the writers fared
    Contend {
        /// Document id to contend on; created with the field at 0 if missing
        id: String,

        /// Name of the numeric field to increment
        #[structopt(long)]
        incr: String,

        /// Number of concurrent writers to spawn
        #[structopt(long, default_value = "10")]
        writers: u32,

        /// How many version conflicts each writer absorbs before giving up
        #[structopt(long, default_value = "9")]
        max_retries: u32,

        #[structopt(flatten)]
        elasticsearch: ElasticsearchArgs,

        #[structopt(flatten)]
        index: IndexArgs,
    },
}

#[derive(Debug, StructOpt)]
struct ElasticsearchArgs {
    /// Elasticsearch endpoint url to use
    #[structopt(long, env = "VDOC_ES_URL")]
    es_url: Url,
}

#[derive(Debug, StructOpt)]
struct IndexArgs {
    /// Alias of the index to work with
    #[structopt(long, env = "VDOC_INDEX", default_value = "docs")]
    index: String,
}

fn make_repo(elasticsearch: ElasticsearchArgs, index: IndexArgs) -> Result<Repository<Value>> {
    let elastic = vdoc_es_utils::create_client(elasticsearch.es_url)?;
    Ok(Repository::new(elastic, index.index))
}

/// Creates the next physical index version, leaving the alias untouched
async fn next_index(
    repo: &Repository<Value>,
    n_shards: NonZeroU32,
    n_replicas: u32,
) -> Result<(Option<IndexVersion>, IndexVersion, String)> {
    let prev_version = repo.fetch_index_version().await?;
    let new_version = prev_version.map(IndexVersion::next).unwrap_or_default();

    let index_name = repo
        .create_index(&CreateIndexOpts {
            version: new_version,
            number_of_shards: n_shards,
            number_of_replicas: n_replicas,
        })
        .await?;

    Ok((prev_version, new_version, index_name))
}

fn increment(field: String, by: i64) -> impl Fn(Value) -> Value {
    move |mut doc: Value| {
        let current = doc.get(&field).and_then(Value::as_i64).unwrap_or(0);
        if let Some(object) = doc.as_object_mut() {
            object.insert(field.clone(), json!(current + by));
        }
        doc
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    if let Err(err) = dotenv::dotenv() {
        log::debug!("Dotenv could not be loaded: {:?}", err);
    }

    env_logger::init();

    let cli_args = CliArgs::from_args();

    log::debug!("Using cli args: {:?}", cli_args);

    match cli_args {
        CliArgs::Init {
            n_shards,
            n_replicas,
            leave_old_index,
            elasticsearch,
            index,
        } => {
            let repo = make_repo(elasticsearch, index)?;

            let (prev_version, new_version, index_name) =
                next_index(&repo, n_shards, n_replicas).await?;
            repo.update_index_alias(prev_version, new_version).await?;

            if let (false, Some(version)) = (leave_old_index, prev_version) {
                repo.delete_index(version).await?;
            }

            eprintln!(
                "Alias '{}' now points at index '{}'",
                repo.alias(),
                index_name
            );
        }
        CliArgs::Put {
            id,
            doc,
            create_only,
            elasticsearch,
            index,
        } => {
            let repo = make_repo(elasticsearch, index)?;
            let doc: Value =
                serde_json::from_str(&doc).context("document is not valid JSON")?;

            let mode = if create_only {
                PutMode::Create
            } else {
                PutMode::Overwrite
            };
            let version = repo.put(&id, &doc, mode).await?;

            eprintln!("Stored `{}` at version {}", id, version);
        }
        CliArgs::Get {
            id,
            elasticsearch,
            index,
        } => {
            let repo = make_repo(elasticsearch, index)?;
            let read = repo.get(&id).await?;

            eprintln!("`{}` is at version {}", id, read.version);
            println!("{}", serde_json::to_string_pretty(&read.doc)?);
        }
        CliArgs::Delete {
            id,
            elasticsearch,
            index,
        } => {
            let repo = make_repo(elasticsearch, index)?;
            repo.delete(&id).await?;

            eprintln!("Deleted `{}`", id);
        }
        CliArgs::Update {
            id,
            incr,
            by,
            max_retries,
            elasticsearch,
            index,
        } => {
            let repo = make_repo(elasticsearch, index)?;

            let updated = repo
                .update(&id, max_retries, increment(incr, by))
                .await?;

            eprintln!(
                "Updated `{}` in {} attempt(s), now at version {}",
                id, updated.attempts, updated.version
            );
            println!("{}", serde_json::to_string_pretty(&updated.doc)?);
        }
        CliArgs::BulkLoad {
            file,
            ingest_batch,
            n_shards,
            n_replicas,
            leave_old_index,
            elasticsearch,
            index,
        } => {
            eprintln!("Running bulk load...");
            let time = std::time::Instant::now();

            let repo = make_repo(elasticsearch, index)?;
            let (prev_version, new_version, index_name) =
                next_index(&repo, n_shards, n_replicas).await?;

            let mut session = repo.bulk_into(index_name.clone(), ingest_batch);
            let mut skipped = 0u64;

            let reader = io::BufReader::new(
                fs::File::open(&file)
                    .with_context(|| format!("Failed to open dataset {}", file.display()))?,
            );
            for line in reader.lines() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<Value>(&line) {
                    Ok(doc) => session.index_auto(&doc).await?,
                    Err(err) => {
                        skipped += 1;
                        log::warn!("skipping malformed dataset line: {}", err);
                    }
                }
            }
            let stats = session.finish().await?;

            repo.update_index_alias(prev_version, new_version).await?;
            if let (false, Some(version)) = (leave_old_index, prev_version) {
                repo.delete_index(version).await?;
            }

            eprintln!(
                "Bulk load has finished\n\
                took: {:?},\n\
                new_index_name: {},\n\
                indexed: {}, failed: {}, skipped lines: {}\n",
                time.elapsed(),
                index_name,
                stats.succeeded,
                stats.failed,
                skipped,
            );
        }
        CliArgs::Search {
            query,
            field_name,
            size,
            elasticsearch,
            index,
        } => {
            eprintln!("Searching documents...");
            let repo = make_repo(elasticsearch, index)?;

            let results = repo
                .fulltext_search(&FulltextSearchOpts {
                    query: &query,
                    field: field_name.as_deref(),
                    size,
                })
                .await?;

            eprintln!("Found {} documents", results.total);
            for hit in results.hits {
                eprintln!("{} (version {:?}):", hit.id, hit.version);
                eprintln!("{}", serde_json::to_string_pretty(&hit.doc)?);
            }
        }
        CliArgs::Count {
            query,
            field_name,
            elasticsearch,
            index,
        } => {
            let repo = make_repo(elasticsearch, index)?;

            let query = query.map(|text| match &field_name {
                Some(field) => json!({ "match": { field.as_str(): { "query": &*text } } }),
                None => json!({ "multi_match": { "query": &*text } }),
            });

            let count = repo.count(query).await?;
            eprintln!("Total documents: {}", count);
        }
        CliArgs::Contend {
            id,
            incr,
            writers,
            max_retries,
            elasticsearch,
            index,
        } => {
            eprintln!(
                "Spawning {} writers against `{}` (max_retries: {})...",
                writers, id, max_retries
            );
            let time = std::time::Instant::now();

            let repo = Arc::new(make_repo(elasticsearch, index)?);

            // seed the document so that every writer starts from a real read
            match repo.get(&id).await {
                Err(StoreError::NotFound(_)) => {
                    match repo
                        .put(&id, &json!({ incr.as_str(): 0 }), PutMode::Create)
                        .await
                    {
                        // another process seeded it first, which is fine
                        Ok(_) | Err(StoreError::AlreadyExists(_)) => {}
                        Err(err) => return Err(err.into()),
                    }
                }
                Ok(_) => {}
                Err(err) => return Err(err.into()),
            }

            let tasks: Vec<_> = (0..writers)
                .map(|worker| {
                    let repo = Arc::clone(&repo);
                    let id = id.clone();
                    let transform = increment(incr.clone(), 1);
                    tokio::spawn(async move {
                        let result = repo.update(&id, max_retries, transform).await;
                        (worker, result)
                    })
                })
                .collect();

            let mut succeeded = 0u32;
            let mut exhausted = 0u32;
            let mut failed = 0u32;
            let mut total_attempts = 0u64;

            for outcome in futures::future::join_all(tasks).await {
                match outcome? {
                    (_, Ok(updated)) => {
                        succeeded += 1;
                        total_attempts += u64::from(updated.attempts);
                    }
                    (worker, Err(UpdateError::ConflictExhausted { attempts, .. })) => {
                        exhausted += 1;
                        total_attempts += u64::from(attempts);
                        log::debug!("writer {} exhausted its {} attempts", worker, attempts);
                    }
                    (worker, Err(err)) => {
                        failed += 1;
                        log::error!("writer {} failed: {:#}", worker, anyhow::Error::new(err));
                    }
                }
            }

            let settled = repo.get(&id).await?;
            eprintln!(
                "Contention run has finished\n\
                took: {:?},\n\
                succeeded: {}, exhausted: {}, failed: {},\n\
                total attempts: {},\n\
                final version: {},\n\
                final document: {}",
                time.elapsed(),
                succeeded,
                exhausted,
                failed,
                total_attempts,
                settled.version,
                serde_json::to_string(&settled.doc)?,
            );
        }
    }

    Ok(())
}
