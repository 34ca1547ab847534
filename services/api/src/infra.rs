use async_trait::async_trait;
use chrono::NaiveDate;
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::info;
use uuid::Uuid;
use verifly::config::VerificationSettings;
use verifly::verification::{
    reference_sources, ApplicantDirectory, ApplicantSnapshot, ApplicationGateway, ApplicationId,
    ApplicationStatusUpdate, ApplicationSummary, AuditEvent, AuditSink, CollaboratorError,
    Decision, DocumentRef, InMemoryHitStore, InMemoryPolicyRepository, InMemoryRunRepository,
    Notifier, Policy, PolicyResolver, RunCoordinator, VerificationDeps,
};

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

/// Applicant details accepted when registering an application with the
/// in-memory platform.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ApplicationIntake {
    pub(crate) first_name: String,
    #[serde(default)]
    pub(crate) middle_name: Option<String>,
    pub(crate) last_name: String,
    pub(crate) date_of_birth: NaiveDate,
    pub(crate) nationality: String,
    pub(crate) passport_number: String,
    pub(crate) passport_country: String,
    #[serde(default)]
    pub(crate) passport_expiry: Option<NaiveDate>,
    #[serde(default)]
    pub(crate) destination_country: Option<String>,
    #[serde(default = "payment_completed_by_default")]
    pub(crate) payment_completed: bool,
    #[serde(default)]
    pub(crate) documents: Vec<DocumentRef>,
}

fn payment_completed_by_default() -> bool {
    true
}

struct StoredApplication {
    summary: ApplicationSummary,
    applicant: ApplicantSnapshot,
    payment_completed: bool,
    status: Option<ApplicationStatusUpdate>,
}

/// Application and applicant records held in process memory.
#[derive(Default)]
pub(crate) struct InMemoryPlatform {
    applications: Mutex<HashMap<ApplicationId, StoredApplication>>,
}

impl InMemoryPlatform {
    pub(crate) fn register(
        &self,
        intake: ApplicationIntake,
    ) -> Result<ApplicationSummary, CollaboratorError> {
        let id = ApplicationId(Uuid::new_v4());
        let applicant = ApplicantSnapshot {
            applicant_id: Uuid::new_v4(),
            first_name: intake.first_name,
            middle_name: intake.middle_name,
            last_name: intake.last_name,
            date_of_birth: intake.date_of_birth,
            nationality: intake.nationality,
            passport_number: intake.passport_number,
            passport_country: intake.passport_country,
            passport_expiry: intake.passport_expiry,
            documents: intake.documents,
        };
        let summary = ApplicationSummary {
            id,
            applicant_id: applicant.applicant_id,
            destination_country: intake.destination_country,
        };

        self.lock()?.insert(
            id,
            StoredApplication {
                summary: summary.clone(),
                applicant,
                payment_completed: intake.payment_completed,
                status: None,
            },
        );
        info!(application_id = %id, "application registered");
        Ok(summary)
    }

    pub(crate) fn status_of(
        &self,
        application_id: ApplicationId,
    ) -> Option<ApplicationStatusUpdate> {
        self.lock()
            .ok()?
            .get(&application_id)
            .and_then(|application| application.status)
    }

    fn lock(
        &self,
    ) -> Result<MutexGuard<'_, HashMap<ApplicationId, StoredApplication>>, CollaboratorError> {
        self.applications
            .lock()
            .map_err(|_| CollaboratorError::Unavailable("application store poisoned".to_string()))
    }
}

#[async_trait]
impl ApplicationGateway for InMemoryPlatform {
    async fn require_payment_completed(
        &self,
        application_id: ApplicationId,
    ) -> Result<ApplicationSummary, CollaboratorError> {
        let guard = self.lock()?;
        let application = guard
            .get(&application_id)
            .ok_or_else(|| CollaboratorError::NotFound("application".to_string()))?;
        if !application.payment_completed {
            return Err(CollaboratorError::Precondition(
                "payment must be completed before verification".to_string(),
            ));
        }
        Ok(application.summary.clone())
    }

    async fn transition(
        &self,
        application_id: ApplicationId,
        status: ApplicationStatusUpdate,
    ) -> Result<(), CollaboratorError> {
        let mut guard = self.lock()?;
        let application = guard
            .get_mut(&application_id)
            .ok_or_else(|| CollaboratorError::NotFound("application".to_string()))?;
        application.status = Some(status);
        info!(
            application_id = %application_id,
            status = status.label(),
            "application status updated"
        );
        Ok(())
    }
}

#[async_trait]
impl ApplicantDirectory for InMemoryPlatform {
    async fn snapshot(
        &self,
        application_id: ApplicationId,
    ) -> Result<ApplicantSnapshot, CollaboratorError> {
        self.lock()?
            .get(&application_id)
            .map(|application| application.applicant.clone())
            .ok_or_else(|| CollaboratorError::NotFound("applicant".to_string()))
    }
}

/// Writes applicant notifications to the log instead of sending email.
#[derive(Default)]
pub(crate) struct LoggingNotifier {
    delivered: Mutex<Vec<(ApplicationId, Decision)>>,
}

impl LoggingNotifier {
    pub(crate) fn delivered(&self) -> Vec<(ApplicationId, Decision)> {
        self.delivered
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Notifier for LoggingNotifier {
    async fn notify_verification_complete(
        &self,
        application_id: ApplicationId,
        decision: Decision,
    ) -> Result<(), CollaboratorError> {
        info!(
            application_id = %application_id,
            decision = decision.label(),
            message = decision.applicant_text(),
            "applicant notified"
        );
        self.delivered
            .lock()
            .map_err(|_| CollaboratorError::Unavailable("notifier poisoned".to_string()))?
            .push((application_id, decision));
        Ok(())
    }
}

/// Audit sink that emits each event as a structured log line and keeps a copy.
#[derive(Default)]
pub(crate) struct TracingAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl TracingAuditSink {
    pub(crate) fn events(&self) -> Vec<AuditEvent> {
        self.events
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn log(&self, event: AuditEvent) -> Result<(), CollaboratorError> {
        let details = serde_json::Value::Object(event.details.clone());
        info!(
            target: "audit",
            action = event.action.label(),
            entity_type = event.entity_type,
            entity_id = %event.entity_id,
            actor = event.actor.as_deref().unwrap_or("system"),
            ip_address = event.ip_address.as_deref().unwrap_or("-"),
            result = ?event.result,
            details = %details,
            "audit event"
        );
        self.events
            .lock()
            .map_err(|_| CollaboratorError::Unavailable("audit sink poisoned".to_string()))?
            .push(event);
        Ok(())
    }
}

/// In-process collaborators shared by the server and the demo.
#[derive(Clone, Default)]
pub(crate) struct Platform {
    pub(crate) applications: Arc<InMemoryPlatform>,
    pub(crate) notifier: Arc<LoggingNotifier>,
    pub(crate) audit: Arc<TracingAuditSink>,
}

impl Platform {
    /// Wire a coordinator over in-memory stores, the seeded default policy
    /// and the built-in reference sources.
    pub(crate) fn coordinator(&self, settings: VerificationSettings) -> RunCoordinator {
        let seeded = Policy::default_policy();
        let face_match_threshold = seeded.rules.face_match.threshold;
        let policies = InMemoryPolicyRepository::with_policies(vec![seeded]);

        RunCoordinator::new(VerificationDeps {
            runs: Arc::new(InMemoryRunRepository::default()),
            hits: Arc::new(InMemoryHitStore::default()),
            policies: PolicyResolver::new(Arc::new(policies)),
            sources: reference_sources(face_match_threshold),
            applications: self.applications.clone(),
            applicants: self.applications.clone(),
            notifier: self.notifier.clone(),
            audit: self.audit.clone(),
            settings,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use verifly::verification::{AuditAction, RunId};

    fn intake(paid: bool) -> ApplicationIntake {
        ApplicationIntake {
            first_name: "Grace".to_string(),
            middle_name: None,
            last_name: "Hopper".to_string(),
            date_of_birth: NaiveDate::from_ymd_opt(1986, 12, 9).expect("valid date"),
            nationality: "US".to_string(),
            passport_number: "X9876543".to_string(),
            passport_country: "US".to_string(),
            passport_expiry: None,
            destination_country: Some("FR".to_string()),
            payment_completed: paid,
            documents: Vec::new(),
        }
    }

    #[tokio::test]
    async fn unpaid_applications_fail_the_payment_gate() {
        let platform = InMemoryPlatform::default();
        let summary = platform.register(intake(false)).expect("registered");

        let err = platform
            .require_payment_completed(summary.id)
            .await
            .expect_err("unpaid");
        assert!(matches!(err, CollaboratorError::Precondition(_)));
    }

    #[tokio::test]
    async fn transitions_are_recorded_per_application() {
        let platform = InMemoryPlatform::default();
        let summary = platform.register(intake(true)).expect("registered");

        platform
            .transition(summary.id, ApplicationStatusUpdate::UnderReview)
            .await
            .expect("transition");

        assert_eq!(
            platform.status_of(summary.id),
            Some(ApplicationStatusUpdate::UnderReview)
        );
        let unknown = ApplicationId(Uuid::new_v4());
        assert!(matches!(
            platform.snapshot(unknown).await,
            Err(CollaboratorError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn audit_sink_keeps_events_with_their_details() {
        let sink = TracingAuditSink::default();
        let run_id = RunId::new();
        let event = AuditEvent::for_run(AuditAction::VerificationRetried, run_id)
            .by(Some("supervisor".to_string()), None)
            .detail("previous_hit_count", 2u64);

        sink.log(event).await.expect("logged");

        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].entity_id, run_id.to_string());
        assert_eq!(events[0].details["previous_hit_count"], 2);
    }

    #[test]
    fn intake_defaults_to_paid_without_documents() {
        let intake: ApplicationIntake = serde_json::from_value(serde_json::json!({
            "first_name": "Grace",
            "last_name": "Hopper",
            "date_of_birth": "1986-12-09",
            "nationality": "US",
            "passport_number": "X9876543",
            "passport_country": "US"
        }))
        .expect("deserializes");

        assert!(intake.payment_completed);
        assert!(intake.documents.is_empty());
        assert!(intake.destination_country.is_none());
    }
}
