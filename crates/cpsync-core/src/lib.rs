//! Core domain model for the problem catalog sync.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const CRATE_NAME: &str = "cpsync-core";

/// Name stored for catalog entries that arrive without one.
pub const PLACEHOLDER_NAME: &str = "Untitled";

/// Natural key of a problem: contest id plus the problem index inside that contest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProblemKey {
    pub contest_id: i32,
    pub index: String,
}

impl ProblemKey {
    pub fn new(contest_id: i32, index: impl Into<String>) -> Self {
        Self {
            contest_id,
            index: index.into(),
        }
    }
}

impl fmt::Display for ProblemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.contest_id, self.index)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseProblemKeyError(pub String);

impl fmt::Display for ParseProblemKeyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid problem key `{}` (expected e.g. 1520A or 1520/A)", self.0)
    }
}

impl std::error::Error for ParseProblemKeyError {}

impl FromStr for ProblemKey {
    type Err = ParseProblemKeyError;

    /// Accepts `1520A`, `1520/A` and `1520 A`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let split = trimmed
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(trimmed.len());
        let (digits, rest) = trimmed.split_at(split);
        let index = rest.trim_start_matches(['/', ' ']).trim();
        let contest_id = digits
            .parse::<i32>()
            .map_err(|_| ParseProblemKeyError(s.to_string()))?;
        if index.is_empty() {
            return Err(ParseProblemKeyError(s.to_string()));
        }
        Ok(Self::new(contest_id, index))
    }
}

/// Problem type as reported by the upstream catalog.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(from = "String", into = "String")]
pub enum ProblemKind {
    #[default]
    Programming,
    Question,
    Other(String),
}

impl ProblemKind {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Programming => "PROGRAMMING",
            Self::Question => "QUESTION",
            Self::Other(other) => other,
        }
    }

    /// Missing or blank upstream values fall back to `PROGRAMMING`.
    pub fn from_upstream(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            None | Some("") => Self::Programming,
            Some(v) => Self::from(v.to_string()),
        }
    }
}

impl From<String> for ProblemKind {
    fn from(value: String) -> Self {
        match value.as_str() {
            "PROGRAMMING" => Self::Programming,
            "QUESTION" => Self::Question,
            _ => Self::Other(value),
        }
    }
}

impl From<ProblemKind> for String {
    fn from(value: ProblemKind) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for ProblemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One catalog entry as fetched from the upstream problem list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProblemSummary {
    pub key: ProblemKey,
    pub name: String,
    pub kind: ProblemKind,
    pub tags: BTreeSet<String>,
    pub rating: Option<i32>,
    pub solved_count: Option<i32>,
}

/// Result of a single catalog fetch.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Catalog {
    pub problems: Vec<ProblemSummary>,
    /// Upstream rows dropped because they carried no usable natural key.
    pub malformed: usize,
}

impl Catalog {
    pub fn len(&self) -> usize {
        self.problems.len()
    }

    pub fn is_empty(&self) -> bool {
        self.problems.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagRef {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DifficultyRef {
    pub id: i64,
    pub value: i32,
}

/// Column values for a problem row about to be inserted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewProblem {
    pub key: ProblemKey,
    pub name: String,
    pub kind: ProblemKind,
    pub statement: String,
    pub solved_count: Option<i32>,
}

impl NewProblem {
    pub fn from_summary(summary: &ProblemSummary, statement: String) -> Self {
        Self {
            key: summary.key.clone(),
            name: summary.name.clone(),
            kind: summary.kind.clone(),
            statement,
            solved_count: summary.solved_count,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpsertOutcome {
    Created,
    AlreadyExists,
}

/// A stored problem with its tags and rating resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Problem {
    pub id: i64,
    pub key: ProblemKey,
    pub name: String,
    pub kind: ProblemKind,
    pub statement: String,
    pub rating: Option<i32>,
    pub solved_count: Option<i32>,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// Append-only record written after each completed sync run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncState {
    pub id: i64,
    pub fingerprint: String,
    pub problem_count: i64,
    /// Items the recording run skipped or failed on.
    pub outstanding: i64,
    pub recorded_at: DateTime<Utc>,
}

/// Exact-match search criteria. At least one of `name`, `tag`, `rating` must be set.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProblemQuery {
    pub name: Option<String>,
    pub tag: Option<String>,
    pub rating: Option<i32>,
    pub limit: Option<i64>,
}

impl ProblemQuery {
    pub fn has_criteria(&self) -> bool {
        self.name.is_some() || self.tag.is_some() || self.rating.is_some()
    }

    pub fn matches(&self, problem: &Problem) -> bool {
        self.name.as_ref().map_or(true, |n| &problem.name == n)
            && self.tag.as_ref().map_or(true, |t| problem.tags.contains(t))
            && self.rating.map_or(true, |r| problem.rating == Some(r))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StoreCounts {
    pub problems: i64,
    pub tags: i64,
    pub difficulties: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncPhase {
    Idle,
    FetchingCatalog,
    NoChange,
    FetchingDetails,
    Persisting,
    Done,
    Failed,
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::FetchingCatalog => "fetching_catalog",
            Self::NoChange => "no_change",
            Self::FetchingDetails => "fetching_details",
            Self::Persisting => "persisting",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Summary returned by a completed (possibly no-op) sync run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStats {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub catalog_size: usize,
    pub changed: bool,
    pub processed: usize,
    pub skipped: usize,
    pub errors: usize,
    /// Catalog entries already stored before this run and not re-fetched.
    pub existing: usize,
    /// Catalog rows without a natural key. Included in `errors`.
    pub malformed: usize,
}

impl RunStats {
    pub fn started(run_id: Uuid, started_at: DateTime<Utc>) -> Self {
        Self {
            run_id,
            started_at,
            finished_at: started_at,
            catalog_size: 0,
            changed: false,
            processed: 0,
            skipped: 0,
            errors: 0,
            existing: 0,
            malformed: 0,
        }
    }

    /// Items this run could not complete and should be retried.
    ///
    /// Malformed catalog rows count as errors but can never be fetched, so
    /// they are left out.
    pub fn outstanding(&self) -> usize {
        self.skipped + self.errors.saturating_sub(self.malformed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn problem_key_parses_common_spellings() {
        assert_eq!("1520A".parse::<ProblemKey>().unwrap(), ProblemKey::new(1520, "A"));
        assert_eq!("1520/B1".parse::<ProblemKey>().unwrap(), ProblemKey::new(1520, "B1"));
        assert_eq!(" 4 A ".parse::<ProblemKey>().unwrap(), ProblemKey::new(4, "A"));
        assert!("A1".parse::<ProblemKey>().is_err());
        assert!("1520".parse::<ProblemKey>().is_err());
    }

    #[test]
    fn problem_key_display_round_trips_through_parse() {
        let key = ProblemKey::new(1846, "G");
        assert_eq!(key.to_string(), "1846G");
        assert_eq!(key.to_string().parse::<ProblemKey>().unwrap(), key);
    }

    #[test]
    fn problem_kind_defaults_to_programming() {
        assert_eq!(ProblemKind::from_upstream(None), ProblemKind::Programming);
        assert_eq!(ProblemKind::from_upstream(Some("  ")), ProblemKind::Programming);
        assert_eq!(ProblemKind::from_upstream(Some("QUESTION")), ProblemKind::Question);
        assert_eq!(
            ProblemKind::from_upstream(Some("INTERACTIVE")),
            ProblemKind::Other("INTERACTIVE".to_string())
        );
    }

    #[test]
    fn problem_kind_serializes_as_upstream_string() {
        let json = serde_json::to_string(&ProblemKind::Programming).unwrap();
        assert_eq!(json, "\"PROGRAMMING\"");
        let back: ProblemKind = serde_json::from_str("\"QUESTION\"").unwrap();
        assert_eq!(back, ProblemKind::Question);
    }

    #[test]
    fn query_matching_requires_every_given_criterion() {
        let problem = Problem {
            id: 1,
            key: ProblemKey::new(1, "A"),
            name: "X".into(),
            kind: ProblemKind::Programming,
            statement: "text".into(),
            rating: Some(1500),
            solved_count: None,
            tags: vec!["dp".into(), "greedy".into()],
            created_at: Utc::now(),
        };
        let query = ProblemQuery {
            tag: Some("dp".into()),
            rating: Some(1500),
            ..Default::default()
        };
        assert!(query.has_criteria());
        assert!(query.matches(&problem));
        let miss = ProblemQuery {
            tag: Some("dp".into()),
            rating: Some(1600),
            ..Default::default()
        };
        assert!(!miss.matches(&problem));
        assert!(!ProblemQuery::default().has_criteria());
    }

    #[test]
    fn outstanding_excludes_malformed_rows() {
        let mut stats = RunStats::started(Uuid::nil(), Utc::now());
        stats.skipped = 2;
        stats.malformed = 3;
        stats.errors = 4;
        assert_eq!(stats.outstanding(), 3);
    }
}
