//! Fetchers: pull flat records from the external maintenance API.

pub mod api;
pub mod fields;
pub mod http_client;

pub use api::{ApiFetcher, EndpointConfig};
pub use fields::{FieldAlias, FieldReader};
pub use http_client::HttpClient;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::DomainType;
use crate::sync::context::RunContext;

/// A flat key/value record as delivered by the external API.
pub type RawRecord = serde_json::Map<String, serde_json::Value>;

/// Fetch failure. Always fails the whole call; there are no partial results.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("malformed payload from {url}: {reason}")]
    Payload { url: String, reason: String },

    #[error("fetch timed out after {0:?}")]
    Timeout(Duration),

    #[error("invalid endpoint: {0}")]
    Endpoint(String),

    #[error("source unavailable: {0}")]
    Unavailable(String),
}

/// Source of raw records for each domain type.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetch every record of `domain` for the plants and date window in `ctx`.
    async fn fetch(&self, domain: DomainType, ctx: &RunContext) -> Result<Vec<RawRecord>, FetchError>;
}
