use std::sync::Arc;

use async_trait::async_trait;
use cpsync_core::ProblemKey;
use cpsync_storage::{
    classify_reqwest_error, classify_status, retry_bounded, Attempt, BackoffPolicy, HttpFetcher,
    RetryDisposition,
};
use reqwest::StatusCode;
use tracing::{debug, warn};

use crate::extract::extract_statement;
use crate::DetailSource;

pub const DEFAULT_DETAIL_BASE_URL: &str = "https://codeforces.com/problemset/problem";

/// Fetches a problem page and extracts its statement, retrying transient failures.
#[derive(Debug, Clone)]
pub struct DetailFetcher {
    http: Arc<HttpFetcher>,
    base_url: String,
    backoff: BackoffPolicy,
}

impl DetailFetcher {
    pub fn new(http: Arc<HttpFetcher>, base_url: impl Into<String>, backoff: BackoffPolicy) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            backoff,
        }
    }

    pub fn detail_url(&self, key: &ProblemKey) -> String {
        format!(
            "{}/{}/{}",
            self.base_url.trim_end_matches('/'),
            key.contest_id,
            key.index
        )
    }
}

#[async_trait]
impl DetailSource for DetailFetcher {
    async fn fetch_detail(&self, key: &ProblemKey) -> Option<String> {
        let url = self.detail_url(key);
        let label = key.to_string();
        let http = &self.http;
        let url_ref = url.as_str();

        let html = retry_bounded(&self.backoff, &label, |attempt| async move {
            debug!(problem = %key, attempt = attempt + 1, "fetching detail page");
            match http.get(url_ref).await {
                Ok(resp) if resp.status.is_success() => Attempt::Done(Some(resp.text())),
                Ok(resp) if resp.status == StatusCode::NOT_FOUND => {
                    warn!(problem = %key, "detail page not found");
                    Attempt::Done(None)
                }
                Ok(resp) => match classify_status(resp.status) {
                    RetryDisposition::Retryable => {
                        Attempt::Retry(format!("http status {}", resp.status))
                    }
                    RetryDisposition::NonRetryable => {
                        warn!(problem = %key, status = resp.status.as_u16(), "detail page refused");
                        Attempt::Done(None)
                    }
                },
                Err(err) => match classify_reqwest_error(&err) {
                    RetryDisposition::Retryable => Attempt::Retry(err.to_string()),
                    RetryDisposition::NonRetryable => {
                        warn!(problem = %key, error = %err, "detail request failed");
                        Attempt::Done(None)
                    }
                },
            }
        })
        .await?;

        let statement = extract_statement(&html);
        if statement.is_none() {
            warn!(problem = %key, "no statement found on detail page");
        }
        statement
    }
}
