//! Assorted low-level utilities for talking to Elasticsearch

pub use elasticsearch;
pub mod es_types;

use anyhow::{bail, Result};
use elasticsearch::{
    http::{
        response::Response as ElasticsearchResponse,
        transport::{SingleNodeConnectionPool, TransportBuilder},
    },
    Elasticsearch,
};
use futures::future::BoxFuture;
use url::Url;

/// Extension for response types that only carry interesting information
/// when the request failed.
pub trait Success {
    type Ok;
    type Err;
    fn success(self) -> BoxFuture<'static, Result<Self::Ok, Self::Err>>;
}

impl Success for ElasticsearchResponse {
    type Ok = ();
    type Err = anyhow::Error;

    /// Resolves to an error carrying the response body (Elasticsearch puts
    /// the reason for the failure there, not in the status line).
    fn success(self) -> BoxFuture<'static, Result<Self::Ok, Self::Err>> {
        Box::pin(async move {
            let status_code = self.status_code();
            if !status_code.is_success() {
                let backtrace = backtrace::Backtrace::new();
                let body: serde_json::Value = self.json().await?;
                bail!(
                    "Elasticsearch returned {} response: {:#} at\n{:?}",
                    status_code,
                    body,
                    backtrace
                );
            }
            Ok(())
        })
    }
}

/// Create an instance of a simple proxy-less elasticsearch client
pub fn create_client(url: Url) -> Result<Elasticsearch> {
    let conn_pool = SingleNodeConnectionPool::new(url);
    let transport = TransportBuilder::new(conn_pool).disable_proxy().build()?;
    Ok(Elasticsearch::new(transport))
}

/// Returns from the surrounding test when no test cluster is configured,
/// otherwise evaluates to a client connected to it.
#[macro_export]
macro_rules! elasticsearch_client_or_return {
    () => {
        match $crate::try_create_test_client() {
            Some(it) => it,
            None => return,
        }
    };
}

/// Client for the cluster named by `VDOC_TEST_ES_URL`, if any is configured
pub fn try_create_test_client() -> Option<Elasticsearch> {
    let es_url: Url = std::env::var("VDOC_TEST_ES_URL").ok()?.parse().ok()?;
    create_client(es_url).ok()
}
