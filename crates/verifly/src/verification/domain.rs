use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::policy::Policy;

/// Identifier of a single verification attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub Uuid);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Uuid::parse_str(raw.trim()).ok().map(Self)
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Identifier of a persisted source hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HitId(pub Uuid);

impl HitId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for HitId {
    fn default() -> Self {
        Self::new()
    }
}

/// Identifier of the application being verified (owned by the application service).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ApplicationId(pub Uuid);

impl ApplicationId {
    pub fn parse(raw: &str) -> Option<Self> {
        Uuid::parse_str(raw.trim()).ok().map(Self)
    }
}

impl fmt::Display for ApplicationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Lifecycle of a run: `queued -> in_progress -> {completed | failed}`, and back
/// to `queued` only through a retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub const fn label(self) -> &'static str {
        match self {
            RunStatus::Queued => "queued",
            RunStatus::InProgress => "in_progress",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        }
    }

    /// Active runs count against the one-active-run-per-application rule.
    pub const fn is_active(self) -> bool {
        matches!(self, RunStatus::Queued | RunStatus::InProgress)
    }

    pub const fn is_terminal(self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed)
    }

    pub const fn can_retry(self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Failed | RunStatus::Cancelled
        )
    }
}

/// Verdict of a completed run. A failed run carries no decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Clear,
    Review,
    NotClear,
}

impl Decision {
    pub const fn label(self) -> &'static str {
        match self {
            Decision::Clear => "clear",
            Decision::Review => "review",
            Decision::NotClear => "not_clear",
        }
    }

    /// Applicant-facing wording used in notifications.
    pub const fn applicant_text(self) -> &'static str {
        match self {
            Decision::Clear => "Approved",
            Decision::Review => "Under Review",
            Decision::NotClear => "Not Approved",
        }
    }
}

/// Audit-facing tag explaining a score contribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReasonCode {
    SanctionsMatch,
    PotentialSanctionsMatch,
    PepMatch,
    PotentialPepMatch,
    DocumentVerificationFailed,
    LowDocumentConfidence,
}

impl ReasonCode {
    pub const fn as_str(self) -> &'static str {
        match self {
            ReasonCode::SanctionsMatch => "SANCTIONS_MATCH",
            ReasonCode::PotentialSanctionsMatch => "POTENTIAL_SANCTIONS_MATCH",
            ReasonCode::PepMatch => "PEP_MATCH",
            ReasonCode::PotentialPepMatch => "POTENTIAL_PEP_MATCH",
            ReasonCode::DocumentVerificationFailed => "DOCUMENT_VERIFICATION_FAILED",
            ReasonCode::LowDocumentConfidence => "LOW_DOCUMENT_CONFIDENCE",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    Exact,
    Fuzzy,
    Phonetic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// Normalized input actually sent to a source, kept so a hit can be reproduced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryTerms {
    pub first_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub middle_name: Option<String>,
    pub last_name: String,
    pub date_of_birth: NaiveDate,
    pub nationality: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub passport_number: Option<String>,
}

/// Redacted details of the matched record, one shape per kind of source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "record", rename_all = "snake_case")]
pub enum RecordData {
    Sanctions {
        name: String,
        list_name: String,
        date_added: NaiveDate,
        reason: String,
        program: String,
    },
    Pep {
        name: String,
        position: String,
        country: String,
        category: String,
        risk_level: String,
    },
    PepAssociate {
        name: String,
        relationship: String,
        associated_pep: String,
        country: String,
    },
}

/// Hit produced by a provider, before the coordinator attaches it to a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewHit {
    pub source_type: String,
    pub query_terms: QueryTerms,
    pub match_confidence: f64,
    pub match_type: MatchType,
    pub severity: Severity,
    pub record_data: RecordData,
    pub jurisdiction: Option<String>,
    pub record_url: Option<String>,
    pub record_date: Option<NaiveDate>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

/// A matched record, owned by its run. Hits are append-only within a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceHit {
    pub id: HitId,
    pub verification_run_id: RunId,
    pub source_name: String,
    pub source_type: String,
    pub query_terms: QueryTerms,
    pub match_confidence: f64,
    pub match_type: MatchType,
    pub severity: Severity,
    pub record_data: RecordData,
    pub jurisdiction: Option<String>,
    pub record_url: Option<String>,
    pub record_date: Option<NaiveDate>,
    pub metadata: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
}

impl SourceHit {
    pub fn from_new(run_id: RunId, source_name: &str, hit: NewHit) -> Self {
        Self {
            id: HitId::new(),
            verification_run_id: run_id,
            source_name: source_name.to_string(),
            source_type: hit.source_type,
            query_terms: hit.query_terms,
            match_confidence: round_two(hit.match_confidence.clamp(0.0, 100.0)),
            match_type: hit.match_type,
            severity: hit.severity,
            record_data: hit.record_data,
            jurisdiction: hit.jurisdiction,
            record_url: hit.record_url,
            record_date: hit.record_date,
            metadata: hit.metadata,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    Passport,
    Selfie,
    Itinerary,
    Other,
}

impl DocumentKind {
    pub const fn label(self) -> &'static str {
        match self {
            DocumentKind::Passport => "passport",
            DocumentKind::Selfie => "selfie",
            DocumentKind::Itinerary => "itinerary",
            DocumentKind::Other => "other",
        }
    }
}

/// Reference to an uploaded document plus the capture signals the document
/// source inspects. File contents stay in document storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRef {
    pub id: Uuid,
    pub kind: DocumentKind,
    pub storage_key: String,
    /// Second line of the machine readable zone, when OCR extracted one.
    #[serde(default)]
    pub mrz: Option<String>,
    /// Liveness score (0-100) reported by the selfie capture SDK.
    #[serde(default)]
    pub liveness_score: Option<u8>,
}

/// Read-only view of the applicant handed to every source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicantSnapshot {
    pub applicant_id: Uuid,
    pub first_name: String,
    pub middle_name: Option<String>,
    pub last_name: String,
    pub date_of_birth: NaiveDate,
    pub nationality: String,
    pub passport_number: String,
    pub passport_country: String,
    pub passport_expiry: Option<NaiveDate>,
    pub documents: Vec<DocumentRef>,
}

impl ApplicantSnapshot {
    /// Lowercase "first last" form used for name matching.
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name.trim(), self.last_name.trim()).to_lowercase()
    }

    pub fn query_terms(&self, include_passport: bool) -> QueryTerms {
        QueryTerms {
            first_name: self.first_name.clone(),
            middle_name: self.middle_name.clone(),
            last_name: self.last_name.clone(),
            date_of_birth: self.date_of_birth,
            nationality: self.nationality.clone(),
            passport_number: include_passport.then(|| self.passport_number.clone()),
        }
    }
}

/// Summary recorded by watchlist-style sources (sanctions, PEP).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchlistReport {
    pub checked_at: DateTime<Utc>,
    pub query_terms: QueryTerms,
    pub total_hits: usize,
    pub confidence_threshold: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Verified,
    Failed,
    FaceMatchFailed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentCheckResult {
    pub document_id: Uuid,
    pub kind: DocumentKind,
    pub verified: bool,
    pub confidence_score: u8,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub findings: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceMatchResult {
    pub verified: bool,
    pub confidence_score: u8,
    pub match_score: f64,
    pub threshold: f64,
}

/// Summary recorded by the document-integrity source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentReport {
    pub checked_at: DateTime<Utc>,
    pub verified: bool,
    pub confidence_score: u8,
    pub overall_status: DocumentStatus,
    pub document_results: Vec<DocumentCheckResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub face_match: Option<FaceMatchResult>,
}

/// Captured provider failure. Recorded, scored, never propagated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DegradedReport {
    pub error: String,
    pub checked_at: DateTime<Utc>,
}

/// Per-source status payload stored under `source_results[source_name]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceReport {
    Watchlist(WatchlistReport),
    Documents(DocumentReport),
    Degraded(DegradedReport),
}

impl SourceReport {
    pub fn degraded(error: impl Into<String>) -> Self {
        SourceReport::Degraded(DegradedReport {
            error: error.into(),
            checked_at: Utc::now(),
        })
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, SourceReport::Degraded(_))
    }
}

/// Points contributed per scoring category plus their sum.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoringBreakdown {
    #[serde(flatten)]
    pub categories: BTreeMap<String, f64>,
    pub total: f64,
}

/// One verification attempt for an application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationRun {
    pub id: RunId,
    pub application_id: ApplicationId,
    pub status: RunStatus,
    pub decision: Option<Decision>,
    pub risk_score: Option<f64>,
    pub reason_codes: Vec<ReasonCode>,
    pub policy_id: Uuid,
    pub policy_version: String,
    pub source_results: BTreeMap<String, SourceReport>,
    pub scoring_breakdown: ScoringBreakdown,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl VerificationRun {
    /// A new queued run pinned to `policy` by id and version.
    pub fn queued(application_id: ApplicationId, policy: &Policy) -> Self {
        let now = Utc::now();
        Self {
            id: RunId::new(),
            application_id,
            status: RunStatus::Queued,
            decision: None,
            risk_score: None,
            reason_codes: Vec::new(),
            policy_id: policy.id,
            policy_version: policy.version.clone(),
            source_results: BTreeMap::new(),
            scoring_breakdown: ScoringBreakdown::default(),
            started_at: None,
            completed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn status_view(&self) -> RunStatusView {
        RunStatusView {
            run_id: self.id,
            application_id: self.application_id,
            status: self.status.label(),
            decision: self.decision.map(Decision::label),
            risk_score: self.risk_score,
            policy_id: self.policy_id,
            policy_version: self.policy_version.clone(),
        }
    }
}

/// Compact projection returned when a run is admitted or polled in bulk.
#[derive(Debug, Clone, Serialize)]
pub struct RunStatusView {
    pub run_id: RunId,
    pub application_id: ApplicationId,
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub risk_score: Option<f64>,
    pub policy_id: Uuid,
    pub policy_version: String,
}

pub(crate) fn round_two(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
