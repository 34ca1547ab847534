//! Source checks: the contract every external data source satisfies, the three
//! reference sources, and the guarded fan-out the coordinator runs them through.

mod document;
mod pep;
mod sanctions;
pub mod similarity;

pub use document::{inspect_documents, DocumentCheck, MrzError};
pub use pep::{PepCheck, PepEntry};
pub use sanctions::{SanctionsCheck, WatchlistEntry};

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use super::domain::{ApplicantSnapshot, NewHit, SourceReport};

pub const SANCTIONS_SOURCE: &str = "sanctions";
pub const PEP_SOURCE: &str = "pep";
pub const DOCUMENTS_SOURCE: &str = "documents";

/// Result of one successful source invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceOutcome {
    pub hits: Vec<NewHit>,
    pub report: SourceReport,
}

/// Failure raised by a source. Callers never see it: the fan-out turns it into a
/// degraded report.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SourceError {
    #[error("source timed out after {0:?}")]
    Timeout(Duration),
    #[error("source unavailable: {0}")]
    Unavailable(String),
    #[error("source rejected query: {0}")]
    InvalidInput(String),
    #[error("source task panicked")]
    Panicked,
}

/// One independent external capability queried about an applicant.
///
/// Implementations must be safe to call concurrently, both alongside other
/// sources and with themselves across runs.
#[async_trait]
pub trait SourceCheck: Send + Sync {
    /// Key under which results land in `source_results` and on each hit.
    fn name(&self) -> &str;

    /// Free-form category, e.g. `watchlist` or `registry`.
    fn source_type(&self) -> &str;

    async fn check(&self, applicant: &ApplicantSnapshot) -> Result<SourceOutcome, SourceError>;
}

/// Per-source result after the guard has absorbed any failure.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckOutcome {
    pub source: String,
    pub hits: Vec<NewHit>,
    pub report: SourceReport,
}

impl CheckOutcome {
    fn degraded(source: String, error: &SourceError) -> Self {
        Self {
            source,
            hits: Vec::new(),
            report: SourceReport::degraded(error.to_string()),
        }
    }
}

/// Bounds applied to every source invocation.
#[derive(Debug, Clone)]
pub struct CheckLimits {
    pub limiter: Arc<Semaphore>,
    pub timeout: Duration,
}

impl CheckLimits {
    pub fn new(max_concurrent: usize, timeout: Duration) -> Self {
        Self {
            limiter: Arc::new(Semaphore::new(max_concurrent.max(1))),
            timeout,
        }
    }
}

/// Run every source in its own task and wait for all of them.
///
/// Each call holds a permit from the shared limiter and is cut off at the
/// timeout. Errors, timeouts and panics all resolve to a degraded outcome, so
/// the returned vector always has one entry per source, in source order.
pub async fn run_checks(
    sources: &[Arc<dyn SourceCheck>],
    applicant: Arc<ApplicantSnapshot>,
    limits: &CheckLimits,
) -> Vec<CheckOutcome> {
    let handles: Vec<_> = sources
        .iter()
        .map(|source| {
            let name = source.name().to_string();
            debug!(source = %name, source_type = source.source_type(), "dispatching source check");
            let source = Arc::clone(source);
            let applicant = Arc::clone(&applicant);
            let limits = limits.clone();
            let handle = tokio::spawn(async move { guarded_check(source, applicant, limits).await });
            (name, handle)
        })
        .collect();

    let mut outcomes = Vec::with_capacity(handles.len());
    for (name, handle) in handles {
        let outcome = match handle.await {
            Ok(Ok(outcome)) => {
                debug!(source = %name, hits = outcome.hits.len(), "source check finished");
                CheckOutcome {
                    source: name,
                    hits: outcome.hits,
                    report: outcome.report,
                }
            }
            Ok(Err(error)) => {
                warn!(source = %name, %error, "source check degraded");
                CheckOutcome::degraded(name, &error)
            }
            Err(join_error) => {
                warn!(source = %name, %join_error, "source check task aborted");
                CheckOutcome::degraded(name, &SourceError::Panicked)
            }
        };
        outcomes.push(outcome);
    }

    outcomes
}

async fn guarded_check(
    source: Arc<dyn SourceCheck>,
    applicant: Arc<ApplicantSnapshot>,
    limits: CheckLimits,
) -> Result<SourceOutcome, SourceError> {
    let _permit = limits
        .limiter
        .acquire_owned()
        .await
        .map_err(|_| SourceError::Unavailable("source limiter closed".to_string()))?;

    match tokio::time::timeout(limits.timeout, source.check(&applicant)).await {
        Ok(result) => result,
        Err(_) => Err(SourceError::Timeout(limits.timeout)),
    }
}

/// Reference sources wired the way the service runs them.
pub fn reference_sources(face_match_threshold: f64) -> Vec<Arc<dyn SourceCheck>> {
    vec![
        Arc::new(SanctionsCheck::reference()),
        Arc::new(PepCheck::reference()),
        Arc::new(DocumentCheck::new(face_match_threshold)),
    ]
}
