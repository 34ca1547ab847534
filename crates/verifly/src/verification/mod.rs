//! Travel background verification: run lifecycle, source fan-out, policy
//! resolution and risk scoring.

pub mod collaborators;
pub mod coordinator;
pub mod dispatch;
pub mod domain;
pub mod notify;
pub mod policy;
pub mod router;
pub mod scoring;
pub mod sources;
pub mod store;

#[cfg(test)]
mod tests;

pub use collaborators::{
    ApplicantDirectory, ApplicationGateway, ApplicationStatusUpdate, ApplicationSummary,
    AuditAction, AuditEvent, AuditResult, AuditSink, CollaboratorError, Notifier,
};
pub use coordinator::{RunCoordinator, RunPipeline, VerificationDeps, VerificationError};
pub use dispatch::{DispatchError, RunDispatcher, RunHandler};
pub use domain::{
    ApplicantSnapshot, ApplicationId, Decision, DocumentKind, DocumentRef, HitId, MatchType,
    NewHit, QueryTerms, ReasonCode, RecordData, RunId, RunStatus, RunStatusView,
    ScoringBreakdown, Severity, SourceHit, SourceReport, VerificationRun,
};
pub use notify::{NotificationRelay, RelayOutcome};
pub use policy::{
    InMemoryPolicyRepository, Policy, PolicyError, PolicyRepository, PolicyResolver,
    DEFAULT_POLICY_VERSION,
};
pub use router::verification_router;
pub use scoring::{decide, RiskScorer, ScoreOutcome};
pub use sources::{
    reference_sources, run_checks, CheckLimits, CheckOutcome, SourceCheck, SourceError,
    SourceOutcome,
};
pub use store::{HitStore, InMemoryHitStore, InMemoryRunRepository, RepositoryError, RunRepository};
