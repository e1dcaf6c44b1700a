use chrono::Utc;
use cpsync_adapters::{CatalogSource, DetailSource};
use cpsync_core::{NewProblem, ProblemSummary, RunStats, SyncPhase, UpsertOutcome};
use cpsync_storage::{ProblemStore, StoreError};
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::detect::{catalog_fingerprint, ChangeDetector};
use crate::SyncError;

#[derive(Debug, Clone, Copy)]
pub struct SyncOptions {
    /// Log a progress line after this many catalog entries.
    pub progress_every: usize,
    /// Run the detail pass even when the catalog looks unchanged.
    pub force: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            progress_every: 10,
            force: false,
        }
    }
}

enum ItemOutcome {
    Stored(UpsertOutcome),
    NoDetail,
}

fn enter(phase: SyncPhase) {
    info!(%phase, "sync phase");
}

fn fail(err: impl Into<SyncError>) -> SyncError {
    let err = err.into();
    enter(SyncPhase::Failed);
    error!(error = %err, "sync run aborted");
    err
}

/// Drives one sync run at a time over a catalog source, a detail source and a store.
///
/// Entries are processed one by one in catalog order. A failing entry is
/// counted and logged; only catalog failures and fatal storage errors end the
/// run early, and in that case no sync state is recorded.
pub struct SyncOrchestrator<C, D, S> {
    catalog: C,
    details: D,
    store: S,
    detector: ChangeDetector,
    options: SyncOptions,
}

impl<C, D, S> SyncOrchestrator<C, D, S>
where
    C: CatalogSource,
    D: DetailSource,
    S: ProblemStore,
{
    pub fn new(catalog: C, details: D, store: S) -> Self {
        Self {
            catalog,
            details,
            store,
            detector: ChangeDetector,
            options: SyncOptions::default(),
        }
    }

    pub fn with_options(mut self, options: SyncOptions) -> Self {
        self.options = options;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub async fn run_sync(&self) -> Result<RunStats, SyncError> {
        let run_id = Uuid::new_v4();
        self.run(run_id)
            .instrument(info_span!("sync_run", %run_id))
            .await
    }

    async fn run(&self, run_id: Uuid) -> Result<RunStats, SyncError> {
        let mut stats = RunStats::started(run_id, Utc::now());
        enter(SyncPhase::Idle);

        enter(SyncPhase::FetchingCatalog);
        let catalog = self.catalog.fetch_catalog().await.map_err(fail)?;
        stats.catalog_size = catalog.len();

        let last_state = self.store.get_last_sync_state().await.map_err(fail)?;
        let fingerprint = catalog_fingerprint(&catalog.problems);
        let changed = self.options.force
            || self
                .detector
                .has_changed_fingerprint(&fingerprint, catalog.len(), last_state.as_ref());

        if !changed {
            enter(SyncPhase::NoChange);
            enter(SyncPhase::Done);
            stats.finished_at = Utc::now();
            info!(catalog_size = stats.catalog_size, "catalog unchanged; nothing to do");
            return Ok(stats);
        }
        stats.changed = true;
        stats.malformed = catalog.malformed;
        stats.errors = catalog.malformed;

        enter(SyncPhase::FetchingDetails);
        let mut known = self.store.stored_keys().await.map_err(fail)?;
        let every = self.options.progress_every.max(1);

        for (position, summary) in catalog.problems.iter().enumerate() {
            if known.contains(&summary.key) {
                stats.existing += 1;
            } else {
                match self.sync_item(summary).await {
                    Ok(ItemOutcome::Stored(UpsertOutcome::Created)) => {
                        stats.processed += 1;
                        known.insert(summary.key.clone());
                    }
                    Ok(ItemOutcome::Stored(UpsertOutcome::AlreadyExists)) => {
                        stats.existing += 1;
                        known.insert(summary.key.clone());
                    }
                    Ok(ItemOutcome::NoDetail) => stats.skipped += 1,
                    Err(err) if err.is_fatal() => return Err(fail(err)),
                    Err(err) => {
                        warn!(
                            contest_id = summary.key.contest_id,
                            index = %summary.key.index,
                            error = %err,
                            "failed to persist problem"
                        );
                        stats.errors += 1;
                    }
                }
            }

            if (position + 1) % every == 0 {
                info!(
                    done = position + 1,
                    total = catalog.len(),
                    processed = stats.processed,
                    skipped = stats.skipped,
                    errors = stats.errors,
                    existing = stats.existing,
                    "sync progress"
                );
            }
        }

        enter(SyncPhase::Persisting);
        let outstanding = stats.outstanding();
        let state = self
            .store
            .record_sync_state(&fingerprint, catalog.len(), outstanding)
            .await
            .map_err(fail)?;
        debug!(state_id = state.id, outstanding, "recorded sync state");

        enter(SyncPhase::Done);
        stats.finished_at = Utc::now();
        info!(
            catalog_size = stats.catalog_size,
            processed = stats.processed,
            skipped = stats.skipped,
            errors = stats.errors,
            existing = stats.existing,
            "sync run finished"
        );
        Ok(stats)
    }

    async fn sync_item(&self, summary: &ProblemSummary) -> Result<ItemOutcome, StoreError> {
        let Some(statement) = self.details.fetch_detail(&summary.key).await else {
            debug!(problem = %summary.key, "no statement this run");
            return Ok(ItemOutcome::NoDetail);
        };

        let problem = NewProblem::from_summary(summary, statement);
        let tags: Vec<String> = summary.tags.iter().cloned().collect();
        let outcome = self
            .store
            .upsert_item(&problem, &tags, summary.rating)
            .await?;
        Ok(ItemOutcome::Stored(outcome))
    }
}
