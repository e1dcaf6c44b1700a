//! In-memory [`ProblemStore`] with the same uniqueness rules as the SQL schema.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cpsync_core::{
    DifficultyRef, NewProblem, Problem, ProblemKey, ProblemQuery, StoreCounts, SyncState, TagRef,
    UpsertOutcome,
};

use crate::{ensure_criteria, ProblemStore, StoreError};

/// Column widths from `migrations/0001_init.sql`.
const INDEX_WIDTH: usize = 10;
const KIND_WIDTH: usize = 40;

fn check_widths(problem: &NewProblem) -> Result<(), StoreError> {
    if problem.key.index.chars().count() > INDEX_WIDTH {
        return Err(StoreError::Constraint(format!(
            "problem index {:?} longer than {INDEX_WIDTH}",
            problem.key.index
        )));
    }
    if problem.kind.as_str().chars().count() > KIND_WIDTH {
        return Err(StoreError::Constraint(format!(
            "problem type {:?} longer than {KIND_WIDTH}",
            problem.kind.as_str()
        )));
    }
    Ok(())
}

#[derive(Debug, Clone)]
struct StoredProblem {
    id: i64,
    row: NewProblem,
    difficulty: Option<DifficultyRef>,
    tag_ids: BTreeSet<i64>,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Tables {
    next_id: i64,
    tags: BTreeMap<String, i64>,
    difficulties: BTreeMap<i32, i64>,
    problems: BTreeMap<ProblemKey, StoredProblem>,
    sync_states: Vec<SyncState>,
}

impl Tables {
    fn allocate_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn tag_id(&mut self, name: &str) -> i64 {
        if let Some(id) = self.tags.get(name).copied() {
            return id;
        }
        let id = self.allocate_id();
        self.tags.insert(name.to_string(), id);
        id
    }

    fn difficulty_id(&mut self, value: i32) -> i64 {
        if let Some(id) = self.difficulties.get(&value).copied() {
            return id;
        }
        let id = self.allocate_id();
        self.difficulties.insert(value, id);
        id
    }

    fn insert_problem(
        &mut self,
        problem: &NewProblem,
        tag_ids: BTreeSet<i64>,
        difficulty: Option<DifficultyRef>,
    ) {
        let id = self.allocate_id();
        self.problems.insert(
            problem.key.clone(),
            StoredProblem {
                id,
                row: problem.clone(),
                difficulty,
                tag_ids,
                created_at: Utc::now(),
            },
        );
    }

    fn to_problem(&self, stored: &StoredProblem) -> Problem {
        let tags = self
            .tags
            .iter()
            .filter(|(_, id)| stored.tag_ids.contains(*id))
            .map(|(name, _)| name.clone())
            .collect();
        Problem {
            id: stored.id,
            key: stored.row.key.clone(),
            name: stored.row.name.clone(),
            kind: stored.row.kind.clone(),
            statement: stored.row.statement.clone(),
            rating: stored.difficulty.map(|d| d.value),
            solved_count: stored.row.solved_count,
            tags,
            created_at: stored.created_at,
        }
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn tag_names(&self) -> Vec<String> {
        self.lock().tags.keys().cloned().collect()
    }

    pub fn difficulty_values(&self) -> Vec<i32> {
        self.lock().difficulties.keys().copied().collect()
    }

    pub fn problem_keys(&self) -> Vec<ProblemKey> {
        self.lock().problems.keys().cloned().collect()
    }

    pub fn sync_states(&self) -> Vec<SyncState> {
        self.lock().sync_states.clone()
    }
}

#[async_trait]
impl ProblemStore for MemoryStore {
    async fn upsert_tag(&self, name: &str) -> Result<TagRef, StoreError> {
        let name = name.trim().to_string();
        let id = self.lock().tag_id(&name);
        Ok(TagRef { id, name })
    }

    async fn upsert_difficulty(&self, value: i32) -> Result<DifficultyRef, StoreError> {
        let id = self.lock().difficulty_id(value);
        Ok(DifficultyRef { id, value })
    }

    async fn upsert_problem(
        &self,
        problem: &NewProblem,
        tags: &[TagRef],
        difficulty: Option<DifficultyRef>,
    ) -> Result<UpsertOutcome, StoreError> {
        let mut tables = self.lock();
        if tables.problems.contains_key(&problem.key) {
            return Ok(UpsertOutcome::AlreadyExists);
        }
        check_widths(problem)?;
        if let Some(unknown) = tags.iter().find(|t| tables.tags.get(&t.name) != Some(&t.id)) {
            return Err(StoreError::Constraint(format!(
                "tag {:?} (id {}) is not stored",
                unknown.name, unknown.id
            )));
        }
        tables.insert_problem(problem, tags.iter().map(|t| t.id).collect(), difficulty);
        Ok(UpsertOutcome::Created)
    }

    async fn upsert_item(
        &self,
        problem: &NewProblem,
        tag_names: &[String],
        rating: Option<i32>,
    ) -> Result<UpsertOutcome, StoreError> {
        let mut tables = self.lock();
        if tables.problems.contains_key(&problem.key) {
            return Ok(UpsertOutcome::AlreadyExists);
        }
        check_widths(problem)?;
        let tag_ids = tag_names
            .iter()
            .map(|name| tables.tag_id(name.trim()))
            .collect();
        let difficulty = rating.map(|value| DifficultyRef {
            id: tables.difficulty_id(value),
            value,
        });
        tables.insert_problem(problem, tag_ids, difficulty);
        Ok(UpsertOutcome::Created)
    }

    async fn stored_keys(&self) -> Result<HashSet<ProblemKey>, StoreError> {
        Ok(self.lock().problems.keys().cloned().collect())
    }

    async fn get_last_sync_state(&self) -> Result<Option<SyncState>, StoreError> {
        Ok(self
            .lock()
            .sync_states
            .iter()
            .max_by_key(|s| (s.recorded_at, s.id))
            .cloned())
    }

    async fn record_sync_state(
        &self,
        fingerprint: &str,
        problem_count: usize,
        outstanding: usize,
    ) -> Result<SyncState, StoreError> {
        let mut tables = self.lock();
        let state = SyncState {
            id: tables.allocate_id(),
            fingerprint: fingerprint.to_string(),
            problem_count: problem_count as i64,
            outstanding: outstanding as i64,
            recorded_at: Utc::now(),
        };
        tables.sync_states.push(state.clone());
        Ok(state)
    }

    async fn find_problem(&self, key: &ProblemKey) -> Result<Option<Problem>, StoreError> {
        let tables = self.lock();
        Ok(tables.problems.get(key).map(|p| tables.to_problem(p)))
    }

    async fn search(&self, query: &ProblemQuery) -> Result<Vec<Problem>, StoreError> {
        ensure_criteria(query)?;
        let tables = self.lock();
        let limit = query
            .limit
            .map(|l| l.max(0) as usize)
            .unwrap_or(usize::MAX);
        Ok(tables
            .problems
            .values()
            .map(|p| tables.to_problem(p))
            .filter(|p| query.matches(p))
            .take(limit)
            .collect())
    }

    async fn counts(&self) -> Result<StoreCounts, StoreError> {
        let tables = self.lock();
        Ok(StoreCounts {
            problems: tables.problems.len() as i64,
            tags: tables.tags.len() as i64,
            difficulties: tables.difficulties.len() as i64,
        })
    }

    async fn reset(&self) -> Result<(), StoreError> {
        *self.lock() = Tables::default();
        Ok(())
    }
}
