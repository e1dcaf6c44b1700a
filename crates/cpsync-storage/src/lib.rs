//! Problem repository (Postgres) + HTTP fetch utilities for cpsync.

use std::collections::HashSet;

use async_trait::async_trait;
use cpsync_core::{
    DifficultyRef, NewProblem, Problem, ProblemKey, ProblemQuery, StoreCounts, SyncState, TagRef,
    UpsertOutcome,
};
use thiserror::Error;

pub mod http;
#[cfg(any(test, feature = "test-utils"))]
pub mod memory;
pub mod postgres;

pub use http::{
    classify_reqwest_error, classify_status, retry_bounded, Attempt, BackoffPolicy,
    FetchedResponse, HttpClientConfig, HttpFetcher, RetryDisposition, BROWSER_USER_AGENT,
};
#[cfg(any(test, feature = "test-utils"))]
pub use memory::MemoryStore;
pub use postgres::PgProblemStore;

pub const CRATE_NAME: &str = "cpsync-storage";

#[derive(Debug, Error)]
pub enum StoreError {
    /// A unique constraint rejected an insert. Callers treat this as "already exists".
    #[error("unique constraint violated: {0}")]
    Conflict(String),
    #[error("storage unavailable: {0}")]
    Unavailable(#[source] sqlx::Error),
    #[error("database error: {0}")]
    Database(#[source] sqlx::Error),
    #[error("migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("invalid query: {0}")]
    InvalidQuery(String),
    /// A row does not fit the schema (column width, dangling reference).
    #[error("rejected by schema: {0}")]
    Constraint(String),
}

impl StoreError {
    /// Fatal errors abort a whole sync run; anything else is charged to the current item.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Migrate(_))
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                Self::Conflict(db.message().to_string())
            }
            sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::Io(_)
            | sqlx::Error::Tls(_) => Self::Unavailable(err),
            other => Self::Database(other),
        }
    }
}

/// Write/read access to problems, tags, difficulty buckets and sync states.
///
/// One store instance is owned by one sync run; implementations are not
/// expected to coordinate concurrent runs.
#[async_trait]
pub trait ProblemStore: Send + Sync {
    /// Returns the tag named `name`, inserting it first if needed.
    async fn upsert_tag(&self, name: &str) -> Result<TagRef, StoreError>;

    /// Returns the difficulty bucket for `value`, inserting it first if needed.
    async fn upsert_difficulty(&self, value: i32) -> Result<DifficultyRef, StoreError>;

    /// Inserts a problem and its tag links in one transaction.
    ///
    /// An existing row with the same natural key is left untouched and
    /// reported as [`UpsertOutcome::AlreadyExists`].
    async fn upsert_problem(
        &self,
        problem: &NewProblem,
        tags: &[TagRef],
        difficulty: Option<DifficultyRef>,
    ) -> Result<UpsertOutcome, StoreError>;

    /// Stores one catalog problem together with its tags and difficulty bucket
    /// as a single unit of work.
    ///
    /// Missing tags and the bucket are created inside the same transaction as
    /// the problem row, so a rejected problem leaves none of them behind. An
    /// existing natural key yields [`UpsertOutcome::AlreadyExists`] and writes
    /// nothing.
    async fn upsert_item(
        &self,
        problem: &NewProblem,
        tag_names: &[String],
        rating: Option<i32>,
    ) -> Result<UpsertOutcome, StoreError>;

    async fn stored_keys(&self) -> Result<HashSet<ProblemKey>, StoreError>;

    /// Most recently recorded sync state, if any.
    async fn get_last_sync_state(&self) -> Result<Option<SyncState>, StoreError>;

    async fn record_sync_state(
        &self,
        fingerprint: &str,
        problem_count: usize,
        outstanding: usize,
    ) -> Result<SyncState, StoreError>;

    async fn find_problem(&self, key: &ProblemKey) -> Result<Option<Problem>, StoreError>;

    async fn search(&self, query: &ProblemQuery) -> Result<Vec<Problem>, StoreError>;

    async fn counts(&self) -> Result<StoreCounts, StoreError>;

    /// Deletes every problem, tag, difficulty bucket and sync state.
    async fn reset(&self) -> Result<(), StoreError>;
}

pub(crate) fn ensure_criteria(query: &ProblemQuery) -> Result<(), StoreError> {
    if query.has_criteria() {
        Ok(())
    } else {
        Err(StoreError::InvalidQuery(
            "at least one of name, tag or rating is required".to_string(),
        ))
    }
}
