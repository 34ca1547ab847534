use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::response::Response;
use chrono::{NaiveDate, Utc};
use serde_json::Value;
use uuid::Uuid;

use crate::config::VerificationSettings;
use crate::verification::collaborators::{
    ApplicantDirectory, ApplicationGateway, ApplicationStatusUpdate, ApplicationSummary,
    AuditAction, AuditEvent, AuditSink, CollaboratorError, Notifier,
};
use crate::verification::coordinator::{RunCoordinator, VerificationDeps};
use crate::verification::domain::{
    ApplicantSnapshot, ApplicationId, Decision, DocumentCheckResult, DocumentKind, DocumentRef,
    DocumentReport, DocumentStatus, MatchType, NewHit, QueryTerms, RecordData, RunId,
    Severity, SourceHit, SourceReport, VerificationRun, WatchlistReport,
};
use crate::verification::policy::{InMemoryPolicyRepository, PolicyResolver};
use crate::verification::sources::{SourceCheck, SourceError, SourceOutcome};
use crate::verification::store::{
    HitStore, InMemoryHitStore, InMemoryRunRepository, RepositoryError, RunRepository,
};

pub(super) fn settings() -> VerificationSettings {
    VerificationSettings {
        provider_timeout: Duration::from_millis(200),
        max_concurrent_checks: 8,
        workers: 2,
        queue_capacity: 16,
        notify_retry_delays: vec![Duration::from_millis(10); 3],
    }
}

pub(super) fn applicant(first_name: &str, last_name: &str) -> ApplicantSnapshot {
    ApplicantSnapshot {
        applicant_id: Uuid::new_v4(),
        first_name: first_name.to_string(),
        middle_name: None,
        last_name: last_name.to_string(),
        date_of_birth: NaiveDate::from_ymd_opt(1988, 4, 12).expect("valid date"),
        nationality: "GB".to_string(),
        passport_number: "K1234567".to_string(),
        passport_country: "GB".to_string(),
        passport_expiry: NaiveDate::from_ymd_opt(2035, 1, 1),
        documents: vec![
            DocumentRef {
                id: Uuid::new_v4(),
                kind: DocumentKind::Passport,
                storage_key: "passports/k1234567.jpg".to_string(),
                mrz: None,
                liveness_score: None,
            },
            DocumentRef {
                id: Uuid::new_v4(),
                kind: DocumentKind::Selfie,
                storage_key: "selfies/k1234567.jpg".to_string(),
                mrz: None,
                liveness_score: Some(88),
            },
        ],
    }
}

pub(super) fn query_terms() -> QueryTerms {
    applicant("Ada", "Lovelace").query_terms(false)
}

pub(super) fn new_hit(confidence: f64) -> NewHit {
    NewHit {
        source_type: "sanctions_list".to_string(),
        query_terms: query_terms(),
        match_confidence: confidence,
        match_type: if confidence > 90.0 {
            MatchType::Exact
        } else {
            MatchType::Fuzzy
        },
        severity: Severity::High,
        record_data: RecordData::Sanctions {
            name: "ADA LOVELACE".to_string(),
            list_name: "OFAC SDN List".to_string(),
            date_added: NaiveDate::from_ymd_opt(2020, 1, 15).expect("valid date"),
            reason: "Test listing".to_string(),
            program: "TEST".to_string(),
        },
        jurisdiction: Some("US".to_string()),
        record_url: None,
        record_date: None,
        metadata: BTreeMap::new(),
    }
}

pub(super) fn stored_hit(source: &str, confidence: f64) -> SourceHit {
    SourceHit::from_new(RunId::new(), source, new_hit(confidence))
}

pub(super) fn watchlist_report(total_hits: usize) -> SourceReport {
    SourceReport::Watchlist(WatchlistReport {
        checked_at: Utc::now(),
        query_terms: query_terms(),
        total_hits,
        confidence_threshold: 70,
    })
}

pub(super) fn document_report(verified: bool, confidence_score: u8) -> SourceReport {
    SourceReport::Documents(DocumentReport {
        checked_at: Utc::now(),
        verified,
        confidence_score,
        overall_status: if verified {
            DocumentStatus::Verified
        } else {
            DocumentStatus::Failed
        },
        document_results: vec![DocumentCheckResult {
            document_id: Uuid::new_v4(),
            kind: DocumentKind::Passport,
            verified,
            confidence_score,
            findings: Vec::new(),
        }],
        face_match: None,
    })
}

pub(super) fn source_results(
    entries: Vec<(&str, SourceReport)>,
) -> BTreeMap<String, SourceReport> {
    entries
        .into_iter()
        .map(|(name, report)| (name.to_string(), report))
        .collect()
}

/// Source returning a fixed outcome.
pub(super) struct StaticSource {
    pub(super) name: &'static str,
    pub(super) hits: Vec<NewHit>,
    pub(super) report: SourceReport,
}

impl StaticSource {
    pub(super) fn watchlist(name: &'static str, confidences: &[f64]) -> Arc<dyn SourceCheck> {
        Arc::new(Self {
            name,
            hits: confidences.iter().copied().map(new_hit).collect(),
            report: watchlist_report(confidences.len()),
        })
    }

    pub(super) fn documents(verified: bool, confidence: u8) -> Arc<dyn SourceCheck> {
        Arc::new(Self {
            name: "documents",
            hits: Vec::new(),
            report: document_report(verified, confidence),
        })
    }
}

#[async_trait]
impl SourceCheck for StaticSource {
    fn name(&self) -> &str {
        self.name
    }

    fn source_type(&self) -> &str {
        "static"
    }

    async fn check(&self, _applicant: &ApplicantSnapshot) -> Result<SourceOutcome, SourceError> {
        Ok(SourceOutcome {
            hits: self.hits.clone(),
            report: self.report.clone(),
        })
    }
}

pub(super) struct FailingSource(pub(super) &'static str);

#[async_trait]
impl SourceCheck for FailingSource {
    fn name(&self) -> &str {
        self.0
    }

    fn source_type(&self) -> &str {
        "registry"
    }

    async fn check(&self, _applicant: &ApplicantSnapshot) -> Result<SourceOutcome, SourceError> {
        Err(SourceError::Unavailable("registry offline".to_string()))
    }
}

pub(super) struct PanickingSource(pub(super) &'static str);

#[async_trait]
impl SourceCheck for PanickingSource {
    fn name(&self) -> &str {
        self.0
    }

    fn source_type(&self) -> &str {
        "registry"
    }

    async fn check(&self, _applicant: &ApplicantSnapshot) -> Result<SourceOutcome, SourceError> {
        panic!("provider bug");
    }
}

pub(super) struct SlowSource {
    pub(super) name: &'static str,
    pub(super) delay: Duration,
}

#[async_trait]
impl SourceCheck for SlowSource {
    fn name(&self) -> &str {
        self.name
    }

    fn source_type(&self) -> &str {
        "watchlist"
    }

    async fn check(&self, _applicant: &ApplicantSnapshot) -> Result<SourceOutcome, SourceError> {
        tokio::time::sleep(self.delay).await;
        Ok(SourceOutcome {
            hits: Vec::new(),
            report: watchlist_report(0),
        })
    }
}

#[derive(Default)]
pub(super) struct MemoryApplications {
    pub(super) applications: Mutex<HashMap<ApplicationId, (ApplicationSummary, bool)>>,
    pub(super) transitions: Mutex<Vec<(ApplicationId, ApplicationStatusUpdate)>>,
    pub(super) failing_transitions: AtomicUsize,
}

impl MemoryApplications {
    pub(super) fn register(&self, paid: bool) -> ApplicationId {
        let id = ApplicationId(Uuid::new_v4());
        let summary = ApplicationSummary {
            id,
            applicant_id: Uuid::new_v4(),
            destination_country: Some("JP".to_string()),
        };
        self.applications
            .lock()
            .expect("applications mutex poisoned")
            .insert(id, (summary, paid));
        id
    }

    pub(super) fn transitions(&self) -> Vec<(ApplicationId, ApplicationStatusUpdate)> {
        self.transitions
            .lock()
            .expect("transitions mutex poisoned")
            .clone()
    }
}

#[async_trait]
impl ApplicationGateway for MemoryApplications {
    async fn require_payment_completed(
        &self,
        application_id: ApplicationId,
    ) -> Result<ApplicationSummary, CollaboratorError> {
        let guard = self.applications.lock().expect("applications mutex poisoned");
        match guard.get(&application_id) {
            Some((summary, true)) => Ok(summary.clone()),
            Some((_, false)) => Err(CollaboratorError::Precondition(
                "payment has not completed".to_string(),
            )),
            None => Err(CollaboratorError::NotFound("application".to_string())),
        }
    }

    async fn transition(
        &self,
        application_id: ApplicationId,
        status: ApplicationStatusUpdate,
    ) -> Result<(), CollaboratorError> {
        let remaining = self.failing_transitions.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failing_transitions.store(remaining - 1, Ordering::SeqCst);
            return Err(CollaboratorError::Unavailable("application service down".to_string()));
        }
        self.transitions
            .lock()
            .expect("transitions mutex poisoned")
            .push((application_id, status));
        Ok(())
    }
}

#[derive(Default)]
pub(super) struct MemoryApplicants {
    pub(super) snapshots: Mutex<HashMap<ApplicationId, ApplicantSnapshot>>,
}

impl MemoryApplicants {
    pub(super) fn insert(&self, application_id: ApplicationId, snapshot: ApplicantSnapshot) {
        self.snapshots
            .lock()
            .expect("applicants mutex poisoned")
            .insert(application_id, snapshot);
    }
}

#[async_trait]
impl ApplicantDirectory for MemoryApplicants {
    async fn snapshot(
        &self,
        application_id: ApplicationId,
    ) -> Result<ApplicantSnapshot, CollaboratorError> {
        self.snapshots
            .lock()
            .expect("applicants mutex poisoned")
            .get(&application_id)
            .cloned()
            .ok_or_else(|| CollaboratorError::NotFound("applicant".to_string()))
    }
}

#[derive(Default)]
pub(super) struct RecordingNotifier {
    pub(super) delivered: Mutex<Vec<(ApplicationId, Decision)>>,
    pub(super) failures_remaining: AtomicUsize,
}

impl RecordingNotifier {
    pub(super) fn failing(times: usize) -> Self {
        Self {
            delivered: Mutex::new(Vec::new()),
            failures_remaining: AtomicUsize::new(times),
        }
    }

    pub(super) fn delivered(&self) -> Vec<(ApplicationId, Decision)> {
        self.delivered.lock().expect("notifier mutex poisoned").clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify_verification_complete(
        &self,
        application_id: ApplicationId,
        decision: Decision,
    ) -> Result<(), CollaboratorError> {
        let remaining = self.failures_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures_remaining.store(remaining - 1, Ordering::SeqCst);
            return Err(CollaboratorError::Unavailable("smtp relay down".to_string()));
        }
        self.delivered
            .lock()
            .expect("notifier mutex poisoned")
            .push((application_id, decision));
        Ok(())
    }
}

#[derive(Default)]
pub(super) struct RecordingAudit {
    pub(super) events: Mutex<Vec<AuditEvent>>,
}

impl RecordingAudit {
    pub(super) fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().expect("audit mutex poisoned").clone()
    }

    pub(super) fn actions(&self) -> Vec<AuditAction> {
        self.events().into_iter().map(|event| event.action).collect()
    }
}

#[async_trait]
impl AuditSink for RecordingAudit {
    async fn log(&self, event: AuditEvent) -> Result<(), CollaboratorError> {
        self.events
            .lock()
            .expect("audit mutex poisoned")
            .push(event);
        Ok(())
    }
}

/// In-memory hit store whose deletes can be made to fail.
#[derive(Default)]
pub(super) struct FaultyHitStore {
    inner: InMemoryHitStore,
    pub(super) failing_deletes: AtomicUsize,
}

impl HitStore for FaultyHitStore {
    fn append(&self, hits: Vec<SourceHit>) -> Result<(), RepositoryError> {
        self.inner.append(hits)
    }

    fn list_for_run(&self, run_id: RunId) -> Result<Vec<SourceHit>, RepositoryError> {
        self.inner.list_for_run(run_id)
    }

    fn delete_for_run(&self, run_id: RunId) -> Result<usize, RepositoryError> {
        let remaining = self.failing_deletes.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failing_deletes.store(remaining - 1, Ordering::SeqCst);
            return Err(RepositoryError::Unavailable("hit store offline".to_string()));
        }
        self.inner.delete_for_run(run_id)
    }
}

/// Fully wired coordinator over in-memory collaborators.
pub(super) struct Harness {
    pub(super) coordinator: Arc<RunCoordinator>,
    pub(super) runs: Arc<InMemoryRunRepository>,
    pub(super) hits: Arc<FaultyHitStore>,
    pub(super) policies: Arc<InMemoryPolicyRepository>,
    pub(super) applications: Arc<MemoryApplications>,
    pub(super) applicants: Arc<MemoryApplicants>,
    pub(super) notifier: Arc<RecordingNotifier>,
    pub(super) audit: Arc<RecordingAudit>,
}

impl Harness {
    /// Register a paid application whose applicant is `first last`.
    pub(super) fn paid_application(&self, first_name: &str, last_name: &str) -> ApplicationId {
        let id = self.applications.register(true);
        self.applicants.insert(id, applicant(first_name, last_name));
        id
    }
}

pub(super) fn harness(sources: Vec<Arc<dyn SourceCheck>>) -> Harness {
    harness_with(sources, RecordingNotifier::default())
}

pub(super) fn harness_with(
    sources: Vec<Arc<dyn SourceCheck>>,
    notifier: RecordingNotifier,
) -> Harness {
    let runs = Arc::new(InMemoryRunRepository::default());
    let hits = Arc::new(FaultyHitStore::default());
    let policies = Arc::new(InMemoryPolicyRepository::default());
    let applications = Arc::new(MemoryApplications::default());
    let applicants = Arc::new(MemoryApplicants::default());
    let notifier = Arc::new(notifier);
    let audit = Arc::new(RecordingAudit::default());

    let coordinator = Arc::new(RunCoordinator::new(VerificationDeps {
        runs: runs.clone(),
        hits: hits.clone(),
        policies: PolicyResolver::new(policies.clone()),
        sources,
        applications: applications.clone(),
        applicants: applicants.clone(),
        notifier: notifier.clone(),
        audit: audit.clone(),
        settings: settings(),
    }));

    Harness {
        coordinator,
        runs,
        hits,
        policies,
        applications,
        applicants,
        notifier,
        audit,
    }
}

/// Poll until the run leaves the active states.
pub(super) async fn wait_for_terminal(
    runs: &InMemoryRunRepository,
    run_id: RunId,
) -> VerificationRun {
    for _ in 0..200 {
        if let Some(run) = runs.fetch(run_id).expect("fetch run") {
            if run.status.is_terminal() {
                return run;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("run {run_id} never reached a terminal state");
}

/// Poll until `condition` holds or give up after two seconds.
pub(super) async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json payload")
}
