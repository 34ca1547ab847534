use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use super::collaborators::{
    ApplicantDirectory, ApplicationGateway, ApplicationStatusUpdate, AuditAction, AuditEvent,
    AuditSink, CollaboratorError, Notifier,
};
use super::dispatch::{DispatchError, RunDispatcher, RunHandler};
use super::domain::{ApplicationId, RunId, SourceHit, VerificationRun};
use super::notify::NotificationRelay;
use super::policy::{PolicyError, PolicyResolver};
use super::scoring::RiskScorer;
use super::sources::{run_checks, CheckLimits, SourceCheck};
use super::store::{HitStore, RepositoryError, RunRepository};
use crate::config::VerificationSettings;

/// Everything the coordinator needs, injected explicitly.
pub struct VerificationDeps {
    pub runs: Arc<dyn RunRepository>,
    pub hits: Arc<dyn HitStore>,
    pub policies: PolicyResolver,
    pub sources: Vec<Arc<dyn SourceCheck>>,
    pub applications: Arc<dyn ApplicationGateway>,
    pub applicants: Arc<dyn ApplicantDirectory>,
    pub notifier: Arc<dyn Notifier>,
    pub audit: Arc<dyn AuditSink>,
    pub settings: VerificationSettings,
}

/// Error enumeration for coordinator operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VerificationError {
    #[error("invalid request: {0}")]
    Validation(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("{0} not found")]
    NotFound(String),
    #[error("verification pipeline failed: {0}")]
    Orchestration(String),
}

impl From<RepositoryError> for VerificationError {
    fn from(value: RepositoryError) -> Self {
        match value {
            RepositoryError::Conflict(message) => VerificationError::Conflict(message),
            RepositoryError::NotFound => VerificationError::NotFound("verification run".to_string()),
            RepositoryError::Unavailable(message) => VerificationError::Orchestration(message),
        }
    }
}

impl From<PolicyError> for VerificationError {
    fn from(value: PolicyError) -> Self {
        VerificationError::Orchestration(value.to_string())
    }
}

impl From<DispatchError> for VerificationError {
    fn from(value: DispatchError) -> Self {
        VerificationError::Orchestration(value.to_string())
    }
}

impl From<CollaboratorError> for VerificationError {
    fn from(value: CollaboratorError) -> Self {
        match value {
            CollaboratorError::NotFound(entity) => VerificationError::NotFound(entity),
            CollaboratorError::Precondition(message) => VerificationError::Validation(message),
            CollaboratorError::Unavailable(message) => VerificationError::Orchestration(message),
        }
    }
}

/// Owns the run lifecycle: admission, retry and the read side. Processing
/// happens on the dispatcher's workers through [`RunPipeline`].
pub struct RunCoordinator {
    pipeline: Arc<RunPipeline>,
    dispatcher: RunDispatcher,
    runs: Arc<dyn RunRepository>,
    hits: Arc<dyn HitStore>,
    policies: PolicyResolver,
    applications: Arc<dyn ApplicationGateway>,
    audit: Arc<dyn AuditSink>,
}

impl RunCoordinator {
    /// Build the coordinator and start its workers. Requires a tokio runtime.
    pub fn new(deps: VerificationDeps) -> Self {
        let VerificationDeps {
            runs,
            hits,
            policies,
            sources,
            applications,
            applicants,
            notifier,
            audit,
            settings,
        } = deps;

        let relay = NotificationRelay::new(
            Arc::clone(&applications),
            notifier,
            Arc::clone(&audit),
            settings.notify_retry_delays.clone(),
        );

        let pipeline = Arc::new(RunPipeline {
            runs: Arc::clone(&runs),
            hits: Arc::clone(&hits),
            policies: policies.clone(),
            sources,
            applicants,
            audit: Arc::clone(&audit),
            relay,
            scorer: RiskScorer,
            limits: CheckLimits::new(settings.max_concurrent_checks, settings.provider_timeout),
        });

        let dispatcher = RunDispatcher::spawn(
            Arc::clone(&pipeline) as Arc<dyn RunHandler>,
            settings.workers,
            settings.queue_capacity,
        );

        Self {
            pipeline,
            dispatcher,
            runs,
            hits,
            policies,
            applications,
            audit,
        }
    }

    /// Admit a new run for a paid application and queue it for processing.
    /// Returns as soon as the run is queued.
    pub async fn start(
        &self,
        application_id: &str,
        actor: Option<String>,
        ip_address: Option<String>,
    ) -> Result<VerificationRun, VerificationError> {
        let application_id = parse_application_id(application_id)?;
        let application = self
            .applications
            .require_payment_completed(application_id)
            .await?;

        let policy = self
            .policies
            .resolve_active(application.destination_country.as_deref(), Utc::now())?;
        let run = self
            .runs
            .insert_queued(VerificationRun::queued(application_id, &policy))?;

        info!(
            run_id = %run.id,
            application_id = %application_id,
            policy_id = %run.policy_id,
            policy_version = %run.policy_version,
            "verification run queued"
        );

        if let Err(err) = self
            .applications
            .transition(application_id, ApplicationStatusUpdate::InProgress)
            .await
        {
            warn!(application_id = %application_id, error = %err, "application status update failed");
        }

        let event = AuditEvent::for_run(AuditAction::VerificationStarted, run.id)
            .by(actor, ip_address)
            .detail("application_id", application_id.to_string())
            .detail("policy_id", run.policy_id.to_string())
            .detail("policy_version", run.policy_version.clone());
        emit(self.audit.as_ref(), event).await;

        self.enqueue(&run).await?;
        Ok(run)
    }

    /// Reset a settled run and process it again. Prior hits are deleted; the
    /// audit trail keeps a summary of what they produced.
    pub async fn retry(
        &self,
        run_id: RunId,
        actor: Option<String>,
        ip_address: Option<String>,
    ) -> Result<VerificationRun, VerificationError> {
        let prior = self.get_run(run_id).await?;
        if !prior.status.can_retry() {
            return Err(VerificationError::Conflict(format!(
                "cannot retry a {} run",
                prior.status.label()
            )));
        }
        let prior_hits = self.hits.list_for_run(run_id)?.len();

        // Hits go first so a failed delete leaves the run settled and retryable.
        let deleted = self.hits.delete_for_run(run_id)?;
        let run = self.runs.reset_for_retry(run_id)?;

        info!(
            run_id = %run_id,
            application_id = %run.application_id,
            deleted_hits = deleted,
            "verification run reset for retry"
        );

        let event = AuditEvent::for_run(AuditAction::VerificationRetried, run_id)
            .by(actor, ip_address)
            .detail("application_id", run.application_id.to_string())
            .detail("previous_status", prior.status.label())
            .detail(
                "previous_decision",
                prior.decision.map_or(Value::Null, |decision| decision.label().into()),
            )
            .detail(
                "previous_risk_score",
                prior.risk_score.map_or(Value::Null, Value::from),
            )
            .detail("previous_reason_codes", reason_labels(&prior))
            .detail("previous_hit_count", prior_hits as u64);
        emit(self.audit.as_ref(), event).await;

        self.enqueue(&run).await?;
        Ok(run)
    }

    pub async fn get_run(&self, run_id: RunId) -> Result<VerificationRun, VerificationError> {
        self.runs
            .fetch(run_id)?
            .ok_or_else(|| VerificationError::NotFound("verification run".to_string()))
    }

    pub async fn list_runs_by_application(
        &self,
        application_id: &str,
    ) -> Result<Vec<VerificationRun>, VerificationError> {
        let application_id = parse_application_id(application_id)?;
        Ok(self.runs.list_by_application(application_id)?)
    }

    pub async fn get_active_run(
        &self,
        application_id: &str,
    ) -> Result<Option<VerificationRun>, VerificationError> {
        let application_id = parse_application_id(application_id)?;
        Ok(self.runs.active_for_application(application_id)?)
    }

    /// Hits for a run, highest confidence first.
    pub async fn list_hits(&self, run_id: RunId) -> Result<Vec<SourceHit>, VerificationError> {
        self.get_run(run_id).await?;
        Ok(self.hits.list_for_run(run_id)?)
    }

    /// Run the pipeline inline. Workers call the same code path.
    pub async fn process(
        &self,
        run_id: RunId,
    ) -> Result<Option<VerificationRun>, VerificationError> {
        self.pipeline.process(run_id).await
    }

    /// Runs waiting for a worker.
    pub fn pending(&self) -> usize {
        self.dispatcher.pending()
    }

    /// Wait up to `within` for outcome notifications still being delivered.
    /// Returns the number left undelivered.
    pub async fn drain_notifications(&self, within: Duration) -> usize {
        self.pipeline.relay.drain(within).await
    }

    async fn enqueue(&self, run: &VerificationRun) -> Result<(), VerificationError> {
        if let Err(err) = self.dispatcher.submit(run.id).await {
            error!(run_id = %run.id, error = %err, "unable to queue verification run");
            self.pipeline.mark_failed(run.id, &err.to_string()).await;
            return Err(err.into());
        }
        Ok(())
    }
}

/// The per-run processing steps, shared with the dispatcher's workers.
pub struct RunPipeline {
    runs: Arc<dyn RunRepository>,
    hits: Arc<dyn HitStore>,
    policies: PolicyResolver,
    sources: Vec<Arc<dyn SourceCheck>>,
    applicants: Arc<dyn ApplicantDirectory>,
    audit: Arc<dyn AuditSink>,
    relay: NotificationRelay,
    scorer: RiskScorer,
    limits: CheckLimits,
}

impl RunPipeline {
    /// Claim and process a queued run. `Ok(None)` when the run was not queued,
    /// which is how a duplicate submission is ignored.
    pub async fn process(
        &self,
        run_id: RunId,
    ) -> Result<Option<VerificationRun>, VerificationError> {
        let Some(run) = self.runs.claim(run_id)? else {
            debug!(run_id = %run_id, "run not queued, skipping");
            return Ok(None);
        };
        info!(run_id = %run_id, application_id = %run.application_id, "verification run started");

        match self.execute(&run).await {
            Ok(completed) => {
                let Some(decision) = completed.decision else {
                    return Ok(Some(completed));
                };
                info!(
                    run_id = %run_id,
                    application_id = %completed.application_id,
                    decision = decision.label(),
                    risk_score = completed.risk_score.unwrap_or_default(),
                    "verification run completed"
                );

                let degraded: Vec<&str> = completed
                    .source_results
                    .iter()
                    .filter(|(_, report)| report.is_degraded())
                    .map(|(source, _)| source.as_str())
                    .collect();
                let event = AuditEvent::for_run(AuditAction::VerificationCompleted, run_id)
                    .detail("application_id", completed.application_id.to_string())
                    .detail("decision", decision.label())
                    .detail("risk_score", completed.risk_score.map_or(Value::Null, Value::from))
                    .detail("reason_codes", reason_labels(&completed))
                    .detail("policy_version", completed.policy_version.clone())
                    .detail("degraded_sources", degraded);
                emit(self.audit.as_ref(), event).await;

                // Tracked by the relay and awaited by `drain_notifications`.
                let _ = self.relay.relay(run_id, completed.application_id, decision);
                Ok(Some(completed))
            }
            Err(err) => {
                error!(
                    run_id = %run_id,
                    application_id = %run.application_id,
                    error = %err,
                    "verification run failed"
                );
                self.mark_failed(run_id, &err.to_string()).await;
                Err(err)
            }
        }
    }

    async fn execute(&self, run: &VerificationRun) -> Result<VerificationRun, VerificationError> {
        let applicant = self
            .applicants
            .snapshot(run.application_id)
            .await
            .map_err(|err| VerificationError::Orchestration(format!("applicant snapshot: {err}")))?;

        let outcomes = run_checks(&self.sources, Arc::new(applicant), &self.limits).await;

        let mut source_results = BTreeMap::new();
        let mut new_hits = Vec::new();
        for outcome in outcomes {
            for hit in outcome.hits {
                debug!(
                    run_id = %run.id,
                    source = %outcome.source,
                    confidence = hit.match_confidence,
                    "source hit"
                );
                new_hits.push(SourceHit::from_new(run.id, &outcome.source, hit));
            }
            source_results.insert(outcome.source, outcome.report);
        }

        self.hits.append(new_hits)?;
        for (source, report) in &source_results {
            self.runs
                .record_source_report(run.id, source, report.clone())?;
        }

        let policy = self
            .policies
            .resolve_pinned(run.policy_id, &run.policy_version)?;
        let hits = self.hits.list_for_run(run.id)?;
        let outcome = self.scorer.score(&hits, &source_results, &policy);

        Ok(self.runs.complete(run.id, &outcome)?)
    }

    async fn mark_failed(&self, run_id: RunId, reason: &str) {
        let application_id = match self.runs.fail(run_id) {
            Ok(run) => Some(run.application_id),
            Err(err) => {
                error!(run_id = %run_id, error = %err, "unable to mark run failed");
                None
            }
        };

        let event = AuditEvent::for_run(AuditAction::VerificationFailed, run_id)
            .failed()
            .detail(
                "application_id",
                application_id.map_or(Value::Null, |id| id.to_string().into()),
            )
            .detail("error", reason);
        emit(self.audit.as_ref(), event).await;
    }
}

#[async_trait]
impl RunHandler for RunPipeline {
    async fn handle(&self, run_id: RunId) {
        // Failures are already logged, audited and recorded on the run.
        let _ = self.process(run_id).await;
    }
}

fn parse_application_id(raw: &str) -> Result<ApplicationId, VerificationError> {
    if raw.trim().is_empty() {
        return Err(VerificationError::Validation(
            "application_id is required".to_string(),
        ));
    }
    ApplicationId::parse(raw).ok_or_else(|| {
        VerificationError::Validation("application_id must be a UUID".to_string())
    })
}

fn reason_labels(run: &VerificationRun) -> Vec<&'static str> {
    run.reason_codes.iter().map(|code| code.as_str()).collect()
}

async fn emit(audit: &dyn AuditSink, event: AuditEvent) {
    let action = event.action.label();
    if let Err(err) = audit.log(event).await {
        warn!(action, error = %err, "audit log unavailable");
    }
}
