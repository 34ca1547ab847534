use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, TimeZone, Utc};
use uuid::Uuid;
use verifly::config::VerificationSettings;
use verifly::verification::{
    reference_sources, ApplicantDirectory, ApplicantSnapshot, ApplicationGateway, ApplicationId,
    ApplicationStatusUpdate, ApplicationSummary, AuditEvent, AuditSink, CollaboratorError,
    Decision, DocumentKind, DocumentRef, InMemoryHitStore, InMemoryPolicyRepository,
    InMemoryRunRepository, Notifier, Policy, PolicyResolver, ReasonCode, RunCoordinator, RunId,
    RunStatus, VerificationDeps, VerificationRun,
};

struct Application {
    summary: ApplicationSummary,
    applicant: ApplicantSnapshot,
}

#[derive(Default)]
struct Platform {
    applications: Mutex<HashMap<ApplicationId, Application>>,
    notifications: Mutex<Vec<(ApplicationId, Decision)>>,
    audit: Mutex<Vec<AuditEvent>>,
}

impl Platform {
    fn submit(&self, first_name: &str, last_name: &str, destination: &str) -> ApplicationId {
        let id = ApplicationId(Uuid::new_v4());
        let applicant = ApplicantSnapshot {
            applicant_id: Uuid::new_v4(),
            first_name: first_name.to_string(),
            middle_name: None,
            last_name: last_name.to_string(),
            date_of_birth: NaiveDate::from_ymd_opt(1979, 8, 30).expect("valid date"),
            nationality: "CA".to_string(),
            passport_number: "AB123456".to_string(),
            passport_country: "CA".to_string(),
            passport_expiry: NaiveDate::from_ymd_opt(2034, 5, 1),
            documents: vec![
                DocumentRef {
                    id: Uuid::new_v4(),
                    kind: DocumentKind::Passport,
                    storage_key: "passport.jpg".to_string(),
                    mrz: None,
                    liveness_score: None,
                },
                DocumentRef {
                    id: Uuid::new_v4(),
                    kind: DocumentKind::Selfie,
                    storage_key: "selfie.jpg".to_string(),
                    mrz: None,
                    liveness_score: Some(95),
                },
                DocumentRef {
                    id: Uuid::new_v4(),
                    kind: DocumentKind::Itinerary,
                    storage_key: "itinerary.pdf".to_string(),
                    mrz: None,
                    liveness_score: None,
                },
            ],
        };
        let summary = ApplicationSummary {
            id,
            applicant_id: applicant.applicant_id,
            destination_country: Some(destination.to_string()),
        };
        self.applications
            .lock()
            .expect("applications lock")
            .insert(id, Application { summary, applicant });
        id
    }
}

#[async_trait]
impl ApplicationGateway for Platform {
    async fn require_payment_completed(
        &self,
        application_id: ApplicationId,
    ) -> Result<ApplicationSummary, CollaboratorError> {
        self.applications
            .lock()
            .expect("applications lock")
            .get(&application_id)
            .map(|application| application.summary.clone())
            .ok_or_else(|| CollaboratorError::NotFound("application".to_string()))
    }

    async fn transition(
        &self,
        _application_id: ApplicationId,
        _status: ApplicationStatusUpdate,
    ) -> Result<(), CollaboratorError> {
        Ok(())
    }
}

#[async_trait]
impl ApplicantDirectory for Platform {
    async fn snapshot(
        &self,
        application_id: ApplicationId,
    ) -> Result<ApplicantSnapshot, CollaboratorError> {
        self.applications
            .lock()
            .expect("applications lock")
            .get(&application_id)
            .map(|application| application.applicant.clone())
            .ok_or_else(|| CollaboratorError::NotFound("applicant".to_string()))
    }
}

#[async_trait]
impl Notifier for Platform {
    async fn notify_verification_complete(
        &self,
        application_id: ApplicationId,
        decision: Decision,
    ) -> Result<(), CollaboratorError> {
        self.notifications
            .lock()
            .expect("notifications lock")
            .push((application_id, decision));
        Ok(())
    }
}

#[async_trait]
impl AuditSink for Platform {
    async fn log(&self, event: AuditEvent) -> Result<(), CollaboratorError> {
        self.audit.lock().expect("audit lock").push(event);
        Ok(())
    }
}

fn strict_policy_for(destination: &str) -> Policy {
    let mut policy = Policy::default_policy();
    policy.id = Uuid::new_v4();
    policy.name = format!("{destination} entry policy");
    policy.version = format!("{}-2.0.0", destination.to_lowercase());
    policy.destination_country = Some(destination.to_string());
    policy.thresholds.clear.max = 9.0;
    policy.thresholds.review.min = 10.0;
    policy.thresholds.review.max = 19.0;
    policy.thresholds.not_clear.min = 20.0;
    policy.effective_from = Utc
        .with_ymd_and_hms(2024, 6, 1, 0, 0, 0)
        .single()
        .expect("valid timestamp");
    policy
}

struct Engine {
    coordinator: RunCoordinator,
    platform: Arc<Platform>,
}

fn engine(policies: Vec<Policy>) -> Engine {
    let platform = Arc::new(Platform::default());
    let settings = VerificationSettings {
        provider_timeout: Duration::from_secs(1),
        notify_retry_delays: vec![Duration::from_millis(5)],
        ..VerificationSettings::default()
    };

    let coordinator = RunCoordinator::new(VerificationDeps {
        runs: Arc::new(InMemoryRunRepository::default()),
        hits: Arc::new(InMemoryHitStore::default()),
        policies: PolicyResolver::new(Arc::new(InMemoryPolicyRepository::with_policies(
            policies,
        ))),
        sources: reference_sources(0.7),
        applications: platform.clone(),
        applicants: platform.clone(),
        notifier: platform.clone(),
        audit: platform.clone(),
        settings,
    });

    Engine {
        coordinator,
        platform,
    }
}

async fn settled(engine: &Engine, run_id: RunId) -> VerificationRun {
    for _ in 0..300 {
        let run = engine.coordinator.get_run(run_id).await.expect("run exists");
        if run.status.is_terminal() {
            return run;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("run {run_id} did not settle");
}

#[tokio::test]
async fn clean_traveller_is_cleared_under_default_policy() {
    let engine = engine(Vec::new());
    let application_id = engine.platform.submit("Ada", "Lovelace", "PT");

    let queued = engine
        .coordinator
        .start(&application_id.to_string(), None, None)
        .await
        .expect("start");
    let run = settled(&engine, queued.id).await;

    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.decision, Some(Decision::Clear));
    assert_eq!(run.policy_version, "1.0.0");
    let audited: Vec<&str> = engine
        .platform
        .audit
        .lock()
        .expect("audit lock")
        .iter()
        .map(|event| event.action.label())
        .collect();
    assert_eq!(audited, vec!["verification_started", "verification_completed"]);
    assert!(engine
        .coordinator
        .list_hits(run.id)
        .await
        .expect("hits")
        .is_empty());
    assert!(engine
        .coordinator
        .get_active_run(&application_id.to_string())
        .await
        .expect("active lookup")
        .is_none());
    assert_eq!(
        engine
            .coordinator
            .list_runs_by_application(&application_id.to_string())
            .await
            .expect("runs")
            .len(),
        1
    );
}

#[tokio::test]
async fn destination_policy_is_pinned_and_applied() {
    let engine = engine(vec![strict_policy_for("JP")]);
    let application_id = engine.platform.submit("Pat", "Miller", "JP");

    let queued = engine
        .coordinator
        .start(&application_id.to_string(), None, None)
        .await
        .expect("start");
    assert_eq!(queued.policy_version, "jp-2.0.0");

    let run = settled(&engine, queued.id).await;
    // Associate surname hit alone earns the PEP low tier, which this policy rejects.
    assert_eq!(run.risk_score, Some(20.0));
    assert_eq!(run.decision, Some(Decision::NotClear));
    assert_eq!(run.reason_codes, vec![ReasonCode::PotentialPepMatch]);

    let mut delivered = false;
    for _ in 0..100 {
        if !engine
            .platform
            .notifications
            .lock()
            .expect("notifications lock")
            .is_empty()
        {
            delivered = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(delivered, "applicant notified of outcome");
}

#[tokio::test]
async fn pinned_policy_survives_a_shared_version_string() {
    let mut strict = strict_policy_for("JP");
    strict.version = "1.0.0".to_string();
    let engine = engine(vec![Policy::default_policy(), strict.clone()]);
    let application_id = engine.platform.submit("Pat", "Miller", "JP");

    let queued = engine
        .coordinator
        .start(&application_id.to_string(), None, None)
        .await
        .expect("start");
    assert_eq!(queued.policy_id, strict.id);
    assert_eq!(queued.policy_version, "1.0.0");

    let run = settled(&engine, queued.id).await;
    assert_eq!(run.policy_id, strict.id);
    assert_eq!(run.risk_score, Some(20.0));
    assert_eq!(run.decision, Some(Decision::NotClear));
}
