//! Upstream adapters: problem catalog API, problem detail pages, statement extraction.

use async_trait::async_trait;
use cpsync_core::{Catalog, ProblemKey};
use thiserror::Error;

mod catalog;
mod detail;
mod extract;

pub use catalog::{parse_catalog, CatalogFetcher, DEFAULT_CATALOG_URL};
pub use detail::{DetailFetcher, DEFAULT_DETAIL_BASE_URL};
pub use extract::extract_statement;

pub const CRATE_NAME: &str = "cpsync-adapters";

#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("upstream unavailable at {url}: {message}")]
    Unavailable { url: String, message: String },
    #[error("unexpected upstream data: {0}")]
    Data(String),
}

/// Source of the full problem catalog, fetched in one call.
#[async_trait]
pub trait CatalogSource: Send + Sync {
    async fn fetch_catalog(&self) -> Result<Catalog, UpstreamError>;
}

/// Source of problem statements.
///
/// `None` means "nothing to persist for this problem right now": not found,
/// no statement on the page, or transient failures exhausted.
#[async_trait]
pub trait DetailSource: Send + Sync {
    async fn fetch_detail(&self, key: &ProblemKey) -> Option<String>;
}
