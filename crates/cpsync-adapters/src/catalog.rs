use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use cpsync_core::{Catalog, ProblemKey, ProblemKind, ProblemSummary, PLACEHOLDER_NAME};
use cpsync_storage::{classify_status, HttpFetcher, RetryDisposition};
use serde::Deserialize;
use tracing::{info, warn};

use crate::{CatalogSource, UpstreamError};

pub const DEFAULT_CATALOG_URL: &str = "https://codeforces.com/api/problemset.problems?lang=ru";

#[derive(Debug, Deserialize)]
struct CatalogEnvelope {
    status: Option<String>,
    #[serde(default)]
    comment: Option<String>,
    #[serde(default)]
    result: Option<CatalogResult>,
}

#[derive(Debug, Deserialize)]
struct CatalogResult {
    problems: Vec<RawProblem>,
    #[serde(default, rename = "problemStatistics")]
    problem_statistics: Vec<RawStatistic>,
}

#[derive(Debug, Deserialize)]
struct RawProblem {
    #[serde(default, rename = "contestId")]
    contest_id: Option<i32>,
    #[serde(default)]
    index: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    tags: Option<Vec<String>>,
    #[serde(default)]
    rating: Option<i32>,
}

#[derive(Debug, Deserialize)]
struct RawStatistic {
    #[serde(rename = "contestId")]
    contest_id: Option<i32>,
    index: Option<String>,
    #[serde(rename = "solvedCount")]
    solved_count: Option<i32>,
}

/// Parses a `problemset.problems` response body.
///
/// A non-`OK` status or a missing `result.problems` array is a data error.
/// Missing per-problem fields degrade to defaults; rows without a contest id
/// or index are dropped and counted in [`Catalog::malformed`].
pub fn parse_catalog(body: &[u8]) -> Result<Catalog, UpstreamError> {
    let envelope: CatalogEnvelope = serde_json::from_slice(body)
        .map_err(|e| UpstreamError::Data(format!("catalog is not valid JSON: {e}")))?;

    match envelope.status.as_deref() {
        Some("OK") => {}
        Some(other) => {
            let comment = envelope.comment.unwrap_or_default();
            return Err(UpstreamError::Data(format!(
                "catalog status {other}: {comment}"
            )));
        }
        None => return Err(UpstreamError::Data("catalog has no status field".to_string())),
    }

    let result = envelope
        .result
        .ok_or_else(|| UpstreamError::Data("catalog status OK but no result".to_string()))?;

    let solved: HashMap<ProblemKey, i32> = result
        .problem_statistics
        .into_iter()
        .filter_map(|s| {
            Some((
                ProblemKey::new(s.contest_id?, s.index?.trim()),
                s.solved_count?,
            ))
        })
        .collect();

    let mut catalog = Catalog::default();
    for raw in result.problems {
        let index = raw.index.as_deref().map(str::trim).unwrap_or_default();
        let (Some(contest_id), false) = (raw.contest_id, index.is_empty()) else {
            catalog.malformed += 1;
            continue;
        };
        let key = ProblemKey::new(contest_id, index);
        let name = raw
            .name
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| PLACEHOLDER_NAME.to_string());
        let tags = raw
            .tags
            .unwrap_or_default()
            .into_iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();
        catalog.problems.push(ProblemSummary {
            solved_count: solved.get(&key).copied(),
            key,
            name,
            kind: ProblemKind::from_upstream(raw.kind.as_deref()),
            tags,
            rating: raw.rating,
        });
    }

    if catalog.malformed > 0 {
        warn!(malformed = catalog.malformed, "catalog rows without a natural key dropped");
    }
    Ok(catalog)
}

/// Fetches the whole catalog in one request. No retries at this layer.
#[derive(Debug, Clone)]
pub struct CatalogFetcher {
    http: Arc<HttpFetcher>,
    url: String,
}

impl CatalogFetcher {
    pub fn new(http: Arc<HttpFetcher>, url: impl Into<String>) -> Self {
        Self {
            http,
            url: url.into(),
        }
    }
}

#[async_trait]
impl CatalogSource for CatalogFetcher {
    async fn fetch_catalog(&self) -> Result<Catalog, UpstreamError> {
        info!(url = %self.url, "fetching problem catalog");
        let resp = self
            .http
            .get(&self.url)
            .await
            .map_err(|e| UpstreamError::Unavailable {
                url: self.url.clone(),
                message: e.to_string(),
            })?;

        if classify_status(resp.status) == RetryDisposition::Retryable {
            return Err(UpstreamError::Unavailable {
                url: resp.final_url,
                message: format!("http status {}", resp.status),
            });
        }

        let catalog = parse_catalog(&resp.body)?;
        info!(problems = catalog.len(), "catalog fetched");
        Ok(catalog)
    }
}
