use crate::verification::domain::{
    DocumentReport, DocumentStatus, ReasonCode, SourceHit, SourceReport,
};
use crate::verification::policy::{DocumentRule, FaceMatchRule, TieredRule};

pub(crate) struct Contribution {
    pub points: f64,
    pub reason: Option<ReasonCode>,
}

impl Contribution {
    const NONE: Contribution = Contribution {
        points: 0.0,
        reason: None,
    };

    fn of(points: f64, reason: ReasonCode) -> Self {
        Self {
            points,
            reason: Some(reason),
        }
    }
}

/// Only the presence of a qualifying hit matters, never the count.
pub(crate) fn tiered_contribution(
    hits: &[SourceHit],
    source: &str,
    rule: &TieredRule,
    high_reason: ReasonCode,
    low_reason: ReasonCode,
) -> Contribution {
    if !rule.enabled {
        return Contribution::NONE;
    }

    let mut source_hits = hits.iter().filter(|hit| hit.source_name == source).peekable();
    if source_hits.peek().is_none() {
        return Contribution::NONE;
    }

    if source_hits.any(|hit| hit.match_confidence > rule.high_confidence_above) {
        Contribution::of(rule.high_tier_points, high_reason)
    } else {
        Contribution::of(rule.low_tier_points, low_reason)
    }
}

/// A missing, degraded or unverified document report is a failure; a verified
/// one below the confidence floor is a smaller penalty. The face comparison is
/// judged against the policy's face-match rule, not the verdict the source
/// reached with its own threshold.
pub(crate) fn document_contribution(
    report: Option<&SourceReport>,
    rule: &DocumentRule,
    face_rule: &FaceMatchRule,
) -> Contribution {
    if !rule.enabled {
        return Contribution::NONE;
    }

    match report {
        Some(SourceReport::Documents(documents))
            if documents_pass(documents) && face_passes(documents, face_rule) =>
        {
            if f64::from(documents.confidence_score) < rule.min_confidence {
                Contribution::of(rule.low_confidence_points, ReasonCode::LowDocumentConfidence)
            } else {
                Contribution::NONE
            }
        }
        _ => Contribution::of(rule.failure_points, ReasonCode::DocumentVerificationFailed),
    }
}

/// Document checks alone, ignoring the face comparison.
fn documents_pass(report: &DocumentReport) -> bool {
    match report.overall_status {
        DocumentStatus::Verified => true,
        DocumentStatus::Failed => false,
        DocumentStatus::FaceMatchFailed => {
            report.document_results.iter().all(|result| result.verified)
        }
    }
}

fn face_passes(report: &DocumentReport, rule: &FaceMatchRule) -> bool {
    if !rule.enabled {
        return true;
    }
    report
        .face_match
        .as_ref()
        .map_or(true, |face| face.match_score >= rule.threshold)
}
