//! Capabilities the engine consumes from the rest of the platform.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};
use uuid::Uuid;

use super::domain::{ApplicantSnapshot, ApplicationId, Decision};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CollaboratorError {
    #[error("{0} not found")]
    NotFound(String),
    #[error("precondition failed: {0}")]
    Precondition(String),
    #[error("collaborator unavailable: {0}")]
    Unavailable(String),
}

/// Application fields the engine needs to admit a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplicationSummary {
    pub id: ApplicationId,
    pub applicant_id: Uuid,
    pub destination_country: Option<String>,
}

/// Application status changes driven by verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplicationStatusUpdate {
    InProgress,
    Clear,
    UnderReview,
    NotClear,
}

impl ApplicationStatusUpdate {
    pub const fn label(self) -> &'static str {
        match self {
            ApplicationStatusUpdate::InProgress => "in_progress",
            ApplicationStatusUpdate::Clear => "clear",
            ApplicationStatusUpdate::UnderReview => "under_review",
            ApplicationStatusUpdate::NotClear => "not_clear",
        }
    }
}

impl From<Decision> for ApplicationStatusUpdate {
    fn from(decision: Decision) -> Self {
        match decision {
            Decision::Clear => ApplicationStatusUpdate::Clear,
            Decision::Review => ApplicationStatusUpdate::UnderReview,
            Decision::NotClear => ApplicationStatusUpdate::NotClear,
        }
    }
}

#[async_trait]
pub trait ApplicationGateway: Send + Sync {
    /// Fails with `Precondition` unless payment for the application has completed.
    async fn require_payment_completed(
        &self,
        application_id: ApplicationId,
    ) -> Result<ApplicationSummary, CollaboratorError>;

    async fn transition(
        &self,
        application_id: ApplicationId,
        status: ApplicationStatusUpdate,
    ) -> Result<(), CollaboratorError>;
}

#[async_trait]
pub trait ApplicantDirectory: Send + Sync {
    async fn snapshot(
        &self,
        application_id: ApplicationId,
    ) -> Result<ApplicantSnapshot, CollaboratorError>;
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify_verification_complete(
        &self,
        application_id: ApplicationId,
        decision: Decision,
    ) -> Result<(), CollaboratorError>;
}

#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn log(&self, event: AuditEvent) -> Result<(), CollaboratorError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    VerificationStarted,
    VerificationCompleted,
    VerificationFailed,
    VerificationRetried,
    NotificationAbandoned,
}

impl AuditAction {
    pub const fn label(self) -> &'static str {
        match self {
            AuditAction::VerificationStarted => "verification_started",
            AuditAction::VerificationCompleted => "verification_completed",
            AuditAction::VerificationFailed => "verification_failed",
            AuditAction::VerificationRetried => "verification_retried",
            AuditAction::NotificationAbandoned => "notification_abandoned",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditResult {
    Success,
    Failure,
}

/// Audit record. `details` is free-form JSON.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditEvent {
    pub action: AuditAction,
    pub entity_type: &'static str,
    pub entity_id: String,
    pub actor: Option<String>,
    pub ip_address: Option<String>,
    pub result: AuditResult,
    pub details: Map<String, Value>,
}

impl AuditEvent {
    pub fn for_run(action: AuditAction, run_id: impl ToString) -> Self {
        Self {
            action,
            entity_type: "verification_run",
            entity_id: run_id.to_string(),
            actor: None,
            ip_address: None,
            result: AuditResult::Success,
            details: Map::new(),
        }
    }

    pub fn by(mut self, actor: Option<String>, ip_address: Option<String>) -> Self {
        self.actor = actor;
        self.ip_address = ip_address;
        self
    }

    pub fn failed(mut self) -> Self {
        self.result = AuditResult::Failure;
        self
    }

    pub fn detail(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.details.insert(key.to_string(), value.into());
        self
    }
}
