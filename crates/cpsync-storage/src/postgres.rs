//! Postgres-backed [`ProblemStore`].

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cpsync_core::{
    DifficultyRef, NewProblem, Problem, ProblemKey, ProblemKind, ProblemQuery, StoreCounts,
    SyncState, TagRef, UpsertOutcome,
};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgConnection, PgPool};
use tracing::{debug, info};

use crate::{ensure_criteria, ProblemStore, StoreError};

const PROBLEM_SELECT: &str = r#"
    SELECT p.id, p.contest_id, p.problem_index, p.name, p.problem_type, p.statement,
           p.total_solved, p.created_at, d.value AS rating
    FROM problems p
    LEFT JOIN difficulties d ON d.id = p.difficulty_id
"#;

#[derive(Debug, sqlx::FromRow)]
struct ProblemRow {
    id: i64,
    contest_id: i32,
    problem_index: String,
    name: String,
    problem_type: String,
    statement: String,
    total_solved: Option<i32>,
    created_at: DateTime<Utc>,
    rating: Option<i32>,
}

impl ProblemRow {
    fn into_problem(self, tags: Vec<String>) -> Problem {
        Problem {
            id: self.id,
            key: ProblemKey::new(self.contest_id, self.problem_index),
            name: self.name,
            kind: ProblemKind::from(self.problem_type),
            statement: self.statement,
            rating: self.rating,
            solved_count: self.total_solved,
            tags,
            created_at: self.created_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct SyncStateRow {
    id: i64,
    fingerprint: String,
    problem_count: i64,
    outstanding: i64,
    recorded_at: DateTime<Utc>,
}

impl From<SyncStateRow> for SyncState {
    fn from(row: SyncStateRow) -> Self {
        Self {
            id: row.id,
            fingerprint: row.fingerprint,
            problem_count: row.problem_count,
            outstanding: row.outstanding,
            recorded_at: row.recorded_at,
        }
    }
}

async fn tag_in(conn: &mut PgConnection, name: &str) -> Result<TagRef, StoreError> {
    let name = name.trim();
    let inserted: Option<i64> = sqlx::query_scalar(
        "INSERT INTO tags (name) VALUES ($1) ON CONFLICT (name) DO NOTHING RETURNING id",
    )
    .bind(name)
    .fetch_optional(&mut *conn)
    .await?;

    let id = match inserted {
        Some(id) => id,
        None => {
            sqlx::query_scalar("SELECT id FROM tags WHERE name = $1")
                .bind(name)
                .fetch_one(&mut *conn)
                .await?
        }
    };
    Ok(TagRef {
        id,
        name: name.to_string(),
    })
}

async fn difficulty_in(conn: &mut PgConnection, value: i32) -> Result<DifficultyRef, StoreError> {
    let inserted: Option<i64> = sqlx::query_scalar(
        "INSERT INTO difficulties (value) VALUES ($1) ON CONFLICT (value) DO NOTHING RETURNING id",
    )
    .bind(value)
    .fetch_optional(&mut *conn)
    .await?;

    let id = match inserted {
        Some(id) => id,
        None => {
            sqlx::query_scalar("SELECT id FROM difficulties WHERE value = $1")
                .bind(value)
                .fetch_one(&mut *conn)
                .await?
        }
    };
    Ok(DifficultyRef { id, value })
}

/// Inserts the problem row and its tag links. `None` when the natural key is taken.
async fn problem_in(
    conn: &mut PgConnection,
    problem: &NewProblem,
    tags: &[TagRef],
    difficulty: Option<DifficultyRef>,
) -> Result<Option<i64>, StoreError> {
    let inserted: Option<i64> = sqlx::query_scalar(
        r#"
        INSERT INTO problems (
            contest_id, problem_index, name, problem_type,
            difficulty_id, statement, total_solved
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        ON CONFLICT (contest_id, problem_index) DO NOTHING
        RETURNING id
        "#,
    )
    .bind(problem.key.contest_id)
    .bind(&problem.key.index)
    .bind(&problem.name)
    .bind(problem.kind.as_str())
    .bind(difficulty.map(|d| d.id))
    .bind(&problem.statement)
    .bind(problem.solved_count)
    .fetch_optional(&mut *conn)
    .await?;

    let Some(problem_id) = inserted else {
        return Ok(None);
    };

    for tag in tags {
        sqlx::query(
            "INSERT INTO problem_tags (problem_id, tag_id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
        )
        .bind(problem_id)
        .bind(tag.id)
        .execute(&mut *conn)
        .await?;
    }
    Ok(Some(problem_id))
}

/// Repository over a Postgres pool handed in at construction.
///
/// ```no_run
/// # async fn example() -> Result<(), cpsync_storage::StoreError> {
/// let store = cpsync_storage::PgProblemStore::connect("postgres://localhost/cpsync", 5).await?;
/// store.migrate().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct PgProblemStore {
    pool: PgPool,
}

impl PgProblemStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections.max(1))
            .acquire_timeout(Duration::from_secs(30))
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        info!("schema migrations applied");
        Ok(())
    }

    async fn attach_tags(&self, rows: Vec<ProblemRow>) -> Result<Vec<Problem>, StoreError> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<i64> = rows.iter().map(|r| r.id).collect();
        let links: Vec<(i64, String)> = sqlx::query_as(
            r#"
            SELECT pt.problem_id, t.name
            FROM problem_tags pt
            JOIN tags t ON t.id = pt.tag_id
            WHERE pt.problem_id = ANY($1)
            ORDER BY t.name
            "#,
        )
        .bind(&ids[..])
        .fetch_all(&self.pool)
        .await?;

        let mut by_problem: HashMap<i64, Vec<String>> = HashMap::new();
        for (problem_id, name) in links {
            by_problem.entry(problem_id).or_default().push(name);
        }

        Ok(rows
            .into_iter()
            .map(|row| {
                let tags = by_problem.remove(&row.id).unwrap_or_default();
                row.into_problem(tags)
            })
            .collect())
    }
}

#[async_trait]
impl ProblemStore for PgProblemStore {
    async fn upsert_tag(&self, name: &str) -> Result<TagRef, StoreError> {
        let mut conn = self.pool.acquire().await?;
        tag_in(&mut *conn, name).await
    }

    async fn upsert_difficulty(&self, value: i32) -> Result<DifficultyRef, StoreError> {
        let mut conn = self.pool.acquire().await?;
        difficulty_in(&mut *conn, value).await
    }

    async fn upsert_problem(
        &self,
        problem: &NewProblem,
        tags: &[TagRef],
        difficulty: Option<DifficultyRef>,
    ) -> Result<UpsertOutcome, StoreError> {
        let mut tx = self.pool.begin().await?;
        match problem_in(&mut *tx, problem, tags, difficulty).await {
            Ok(Some(_)) => {
                tx.commit().await?;
                Ok(UpsertOutcome::Created)
            }
            Ok(None) => {
                tx.rollback().await?;
                Ok(UpsertOutcome::AlreadyExists)
            }
            Err(StoreError::Conflict(detail)) => {
                debug!(problem = %problem.key, %detail, "insert raced an existing row");
                tx.rollback().await?;
                Ok(UpsertOutcome::AlreadyExists)
            }
            Err(err) => Err(err),
        }
    }

    async fn upsert_item(
        &self,
        problem: &NewProblem,
        tag_names: &[String],
        rating: Option<i32>,
    ) -> Result<UpsertOutcome, StoreError> {
        let mut tx = self.pool.begin().await?;

        let mut tags = Vec::with_capacity(tag_names.len());
        for name in tag_names {
            tags.push(tag_in(&mut *tx, name).await?);
        }
        let difficulty = match rating {
            Some(value) => Some(difficulty_in(&mut *tx, value).await?),
            None => None,
        };

        match problem_in(&mut *tx, problem, &tags, difficulty).await {
            Ok(Some(problem_id)) => {
                tx.commit().await?;
                debug!(problem = %problem.key, problem_id, tags = tags.len(), "problem stored");
                Ok(UpsertOutcome::Created)
            }
            Ok(None) => {
                tx.rollback().await?;
                Ok(UpsertOutcome::AlreadyExists)
            }
            Err(StoreError::Conflict(detail)) => {
                debug!(problem = %problem.key, %detail, "insert raced an existing row");
                tx.rollback().await?;
                Ok(UpsertOutcome::AlreadyExists)
            }
            Err(err) => Err(err),
        }
    }

    async fn stored_keys(&self) -> Result<HashSet<ProblemKey>, StoreError> {
        let rows: Vec<(i32, String)> =
            sqlx::query_as("SELECT contest_id, problem_index FROM problems")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows
            .into_iter()
            .map(|(contest_id, index)| ProblemKey::new(contest_id, index))
            .collect())
    }

    async fn get_last_sync_state(&self) -> Result<Option<SyncState>, StoreError> {
        let row: Option<SyncStateRow> = sqlx::query_as(
            r#"
            SELECT id, fingerprint, problem_count, outstanding, recorded_at
            FROM sync_states
            ORDER BY recorded_at DESC, id DESC
            LIMIT 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(SyncState::from))
    }

    async fn record_sync_state(
        &self,
        fingerprint: &str,
        problem_count: usize,
        outstanding: usize,
    ) -> Result<SyncState, StoreError> {
        let row: SyncStateRow = sqlx::query_as(
            r#"
            INSERT INTO sync_states (fingerprint, problem_count, outstanding)
            VALUES ($1, $2, $3)
            RETURNING id, fingerprint, problem_count, outstanding, recorded_at
            "#,
        )
        .bind(fingerprint)
        .bind(problem_count as i64)
        .bind(outstanding as i64)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.into())
    }

    async fn find_problem(&self, key: &ProblemKey) -> Result<Option<Problem>, StoreError> {
        let sql = format!("{PROBLEM_SELECT} WHERE p.contest_id = $1 AND p.problem_index = $2");
        let row: Option<ProblemRow> = sqlx::query_as(&sql)
            .bind(key.contest_id)
            .bind(&key.index)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Ok(self.attach_tags(vec![row]).await?.pop()),
            None => Ok(None),
        }
    }

    async fn search(&self, query: &ProblemQuery) -> Result<Vec<Problem>, StoreError> {
        ensure_criteria(query)?;
        let sql = format!(
            r#"{PROBLEM_SELECT}
            WHERE ($1::text IS NULL OR p.name = $1)
              AND ($2::text IS NULL OR EXISTS (
                    SELECT 1 FROM problem_tags pt
                    JOIN tags t ON t.id = pt.tag_id
                    WHERE pt.problem_id = p.id AND t.name = $2))
              AND ($3::int IS NULL OR d.value = $3)
            ORDER BY p.contest_id, p.problem_index
            LIMIT $4"#
        );
        let rows: Vec<ProblemRow> = sqlx::query_as(&sql)
            .bind(query.name.as_deref())
            .bind(query.tag.as_deref())
            .bind(query.rating)
            .bind(query.limit)
            .fetch_all(&self.pool)
            .await?;
        self.attach_tags(rows).await
    }

    async fn counts(&self) -> Result<StoreCounts, StoreError> {
        let (problems, tags, difficulties): (i64, i64, i64) = sqlx::query_as(
            r#"
            SELECT
                (SELECT COUNT(*) FROM problems),
                (SELECT COUNT(*) FROM tags),
                (SELECT COUNT(*) FROM difficulties)
            "#,
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(StoreCounts {
            problems,
            tags,
            difficulties,
        })
    }

    async fn reset(&self) -> Result<(), StoreError> {
        sqlx::query(
            "TRUNCATE problem_tags, problems, tags, difficulties, sync_states RESTART IDENTITY",
        )
        .execute(&self.pool)
        .await?;
        info!("all problem data removed");
        Ok(())
    }
}
