use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;

use super::domain::{ApplicationId, RunId, RunStatus, SourceHit, SourceReport, VerificationRun};
use super::scoring::ScoreOutcome;

/// Error enumeration for repository failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RepositoryError {
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("record not found")]
    NotFound,
    #[error("repository unavailable: {0}")]
    Unavailable(String),
}

/// Durable store for verification runs.
///
/// Every method is a single atomic operation. In particular `insert_queued` and
/// `reset_for_retry` enforce "at most one queued or in-progress run per
/// application" inside the store, never as a read followed by a write.
pub trait RunRepository: Send + Sync {
    /// Insert a queued run; `Conflict` if the application already has an active run.
    fn insert_queued(&self, run: VerificationRun) -> Result<VerificationRun, RepositoryError>;
    fn fetch(&self, id: RunId) -> Result<Option<VerificationRun>, RepositoryError>;
    /// Newest first.
    fn list_by_application(
        &self,
        application_id: ApplicationId,
    ) -> Result<Vec<VerificationRun>, RepositoryError>;
    fn active_for_application(
        &self,
        application_id: ApplicationId,
    ) -> Result<Option<VerificationRun>, RepositoryError>;
    /// Move a queued run to in progress. `None` when the run is not queued, so a
    /// second worker never processes the same run.
    fn claim(&self, id: RunId) -> Result<Option<VerificationRun>, RepositoryError>;
    fn record_source_report(
        &self,
        id: RunId,
        source: &str,
        report: SourceReport,
    ) -> Result<(), RepositoryError>;
    /// Persist the scoring outcome and mark an in-progress run completed.
    fn complete(
        &self,
        id: RunId,
        outcome: &ScoreOutcome,
    ) -> Result<VerificationRun, RepositoryError>;
    /// Mark a queued or in-progress run failed; clears any partial decision.
    fn fail(&self, id: RunId) -> Result<VerificationRun, RepositoryError>;
    /// Reset a settled run back to queued, clearing its outcome and timestamps.
    fn reset_for_retry(&self, id: RunId) -> Result<VerificationRun, RepositoryError>;
}

/// Append-only store of hits, owned by their run.
pub trait HitStore: Send + Sync {
    fn append(&self, hits: Vec<SourceHit>) -> Result<(), RepositoryError>;
    /// Sorted by match confidence, highest first.
    fn list_for_run(&self, run_id: RunId) -> Result<Vec<SourceHit>, RepositoryError>;
    fn delete_for_run(&self, run_id: RunId) -> Result<usize, RepositoryError>;
}

#[derive(Default)]
struct RunTable {
    runs: HashMap<RunId, VerificationRun>,
    /// Unique index over active runs, keyed by application.
    active_by_application: HashMap<ApplicationId, RunId>,
}

impl RunTable {
    fn get_mut(&mut self, id: RunId) -> Result<&mut VerificationRun, RepositoryError> {
        self.runs.get_mut(&id).ok_or(RepositoryError::NotFound)
    }
}

/// In-process run store; one mutex covers the rows and the active-run index.
#[derive(Default)]
pub struct InMemoryRunRepository {
    table: Mutex<RunTable>,
}

impl InMemoryRunRepository {
    fn table(&self) -> Result<MutexGuard<'_, RunTable>, RepositoryError> {
        self.table
            .lock()
            .map_err(|_| RepositoryError::Unavailable("run table lock poisoned".to_string()))
    }
}

impl RunRepository for InMemoryRunRepository {
    fn insert_queued(&self, run: VerificationRun) -> Result<VerificationRun, RepositoryError> {
        let mut table = self.table()?;
        if table.active_by_application.contains_key(&run.application_id) {
            return Err(RepositoryError::Conflict(
                "verification already active for application".to_string(),
            ));
        }
        if table.runs.contains_key(&run.id) {
            return Err(RepositoryError::Conflict("run id already exists".to_string()));
        }

        table.active_by_application.insert(run.application_id, run.id);
        table.runs.insert(run.id, run.clone());
        Ok(run)
    }

    fn fetch(&self, id: RunId) -> Result<Option<VerificationRun>, RepositoryError> {
        Ok(self.table()?.runs.get(&id).cloned())
    }

    fn list_by_application(
        &self,
        application_id: ApplicationId,
    ) -> Result<Vec<VerificationRun>, RepositoryError> {
        let table = self.table()?;
        let mut runs: Vec<VerificationRun> = table
            .runs
            .values()
            .filter(|run| run.application_id == application_id)
            .cloned()
            .collect();
        runs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(runs)
    }

    fn active_for_application(
        &self,
        application_id: ApplicationId,
    ) -> Result<Option<VerificationRun>, RepositoryError> {
        let table = self.table()?;
        Ok(table
            .active_by_application
            .get(&application_id)
            .and_then(|id| table.runs.get(id))
            .cloned())
    }

    fn claim(&self, id: RunId) -> Result<Option<VerificationRun>, RepositoryError> {
        let mut table = self.table()?;
        let run = table.get_mut(id)?;
        if run.status != RunStatus::Queued {
            return Ok(None);
        }

        let now = Utc::now();
        run.status = RunStatus::InProgress;
        run.started_at = Some(now);
        run.updated_at = now;
        Ok(Some(run.clone()))
    }

    fn record_source_report(
        &self,
        id: RunId,
        source: &str,
        report: SourceReport,
    ) -> Result<(), RepositoryError> {
        let mut table = self.table()?;
        let run = table.get_mut(id)?;
        run.source_results.insert(source.to_string(), report);
        run.updated_at = Utc::now();
        Ok(())
    }

    fn complete(
        &self,
        id: RunId,
        outcome: &ScoreOutcome,
    ) -> Result<VerificationRun, RepositoryError> {
        let mut table = self.table()?;
        let run = table.get_mut(id)?;
        if run.status != RunStatus::InProgress {
            return Err(RepositoryError::Conflict(format!(
                "cannot complete a {} run",
                run.status.label()
            )));
        }

        let now = Utc::now();
        run.status = RunStatus::Completed;
        run.decision = Some(outcome.decision);
        run.risk_score = Some(outcome.score);
        run.reason_codes = outcome.reason_codes.clone();
        run.scoring_breakdown = outcome.breakdown.clone();
        run.completed_at = Some(now);
        run.updated_at = now;

        let completed = run.clone();
        table.active_by_application.remove(&completed.application_id);
        Ok(completed)
    }

    fn fail(&self, id: RunId) -> Result<VerificationRun, RepositoryError> {
        let mut table = self.table()?;
        let run = table.get_mut(id)?;
        if !run.status.is_active() {
            return Err(RepositoryError::Conflict(format!(
                "cannot fail a {} run",
                run.status.label()
            )));
        }

        let now = Utc::now();
        run.status = RunStatus::Failed;
        run.decision = None;
        run.risk_score = None;
        run.completed_at = Some(now);
        run.updated_at = now;

        let failed = run.clone();
        table.active_by_application.remove(&failed.application_id);
        Ok(failed)
    }

    fn reset_for_retry(&self, id: RunId) -> Result<VerificationRun, RepositoryError> {
        let mut table = self.table()?;
        let (status, application_id) = {
            let run = table.runs.get(&id).ok_or(RepositoryError::NotFound)?;
            (run.status, run.application_id)
        };

        if !status.can_retry() {
            return Err(RepositoryError::Conflict(format!(
                "cannot retry a {} run",
                status.label()
            )));
        }
        if table.active_by_application.contains_key(&application_id) {
            return Err(RepositoryError::Conflict(
                "another verification is active for application".to_string(),
            ));
        }

        let run = table.get_mut(id)?;
        run.status = RunStatus::Queued;
        run.decision = None;
        run.risk_score = None;
        run.reason_codes.clear();
        run.source_results.clear();
        run.scoring_breakdown = Default::default();
        run.started_at = None;
        run.completed_at = None;
        run.updated_at = Utc::now();

        let reset = run.clone();
        table.active_by_application.insert(application_id, id);
        Ok(reset)
    }
}

/// In-process hit store.
#[derive(Default)]
pub struct InMemoryHitStore {
    hits: Mutex<HashMap<RunId, Vec<SourceHit>>>,
}

impl InMemoryHitStore {
    fn hits(&self) -> Result<MutexGuard<'_, HashMap<RunId, Vec<SourceHit>>>, RepositoryError> {
        self.hits
            .lock()
            .map_err(|_| RepositoryError::Unavailable("hit store lock poisoned".to_string()))
    }
}

impl HitStore for InMemoryHitStore {
    fn append(&self, hits: Vec<SourceHit>) -> Result<(), RepositoryError> {
        let mut guard = self.hits()?;
        for hit in hits {
            guard.entry(hit.verification_run_id).or_default().push(hit);
        }
        Ok(())
    }

    fn list_for_run(&self, run_id: RunId) -> Result<Vec<SourceHit>, RepositoryError> {
        let mut hits = self.hits()?.get(&run_id).cloned().unwrap_or_default();
        hits.sort_by(|a, b| {
            b.match_confidence
                .total_cmp(&a.match_confidence)
                .then_with(|| a.created_at.cmp(&b.created_at))
        });
        Ok(hits)
    }

    fn delete_for_run(&self, run_id: RunId) -> Result<usize, RepositoryError> {
        Ok(self
            .hits()?
            .remove(&run_id)
            .map(|hits| hits.len())
            .unwrap_or(0))
    }
}
