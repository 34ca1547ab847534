use async_trait::async_trait;
use chrono::{NaiveDate, Utc};

use super::{SourceCheck, SourceError, SourceOutcome, DOCUMENTS_SOURCE};
use crate::verification::domain::{
    ApplicantSnapshot, DocumentCheckResult, DocumentKind, DocumentRef, DocumentReport,
    DocumentStatus, FaceMatchResult, SourceReport,
};

const PASSPORT_VERIFIED_CONFIDENCE: u8 = 92;
const PASSPORT_REJECTED_CONFIDENCE: u8 = 45;
const MIN_LIVENESS: u8 = 60;
const MISSING_LIVENESS_CONFIDENCE: u8 = 35;
const ITINERARY_CONFIDENCE: u8 = 85;
const GENERIC_CONFIDENCE: u8 = 80;

/// Document integrity source: per-document checks plus a passport/selfie face match.
#[derive(Debug, Clone)]
pub struct DocumentCheck {
    face_match_threshold: f64,
}

impl DocumentCheck {
    pub fn new(face_match_threshold: f64) -> Self {
        let face_match_threshold = if (0.0..=1.0).contains(&face_match_threshold) {
            face_match_threshold
        } else {
            0.7
        };
        Self {
            face_match_threshold,
        }
    }
}

#[async_trait]
impl SourceCheck for DocumentCheck {
    fn name(&self) -> &str {
        DOCUMENTS_SOURCE
    }

    fn source_type(&self) -> &str {
        "document_integrity"
    }

    async fn check(&self, applicant: &ApplicantSnapshot) -> Result<SourceOutcome, SourceError> {
        let today = Utc::now().date_naive();
        let report = inspect_documents(applicant, today, self.face_match_threshold);
        Ok(SourceOutcome {
            hits: Vec::new(),
            report: SourceReport::Documents(report),
        })
    }
}

/// Inspect every referenced document and combine the results.
///
/// Overall confidence is the minimum per-document confidence; the run is
/// verified only when every document and the face match (if any) pass.
pub fn inspect_documents(
    applicant: &ApplicantSnapshot,
    today: NaiveDate,
    face_match_threshold: f64,
) -> DocumentReport {
    let document_results: Vec<DocumentCheckResult> = applicant
        .documents
        .iter()
        .map(|document| match document.kind {
            DocumentKind::Passport => inspect_passport(document, applicant, today),
            DocumentKind::Selfie => inspect_selfie(document),
            DocumentKind::Itinerary => accepted(document, ITINERARY_CONFIDENCE),
            DocumentKind::Other => accepted(document, GENERIC_CONFIDENCE),
        })
        .collect();

    let documents_verified = document_results.iter().all(|result| result.verified);
    let confidence_score = document_results
        .iter()
        .map(|result| result.confidence_score)
        .min()
        .unwrap_or(100);

    let passport = first_of(&document_results, DocumentKind::Passport);
    let selfie = first_of(&document_results, DocumentKind::Selfie);
    let face_match = match (passport, selfie) {
        (Some(passport), Some(selfie)) => Some(match_faces(passport, selfie, face_match_threshold)),
        _ => None,
    };
    let face_verified = face_match.as_ref().map_or(true, |result| result.verified);

    let overall_status = if !face_verified {
        DocumentStatus::FaceMatchFailed
    } else if !documents_verified {
        DocumentStatus::Failed
    } else {
        DocumentStatus::Verified
    };

    DocumentReport {
        checked_at: Utc::now(),
        verified: documents_verified && face_verified,
        confidence_score,
        overall_status,
        document_results,
        face_match,
    }
}

fn first_of(results: &[DocumentCheckResult], kind: DocumentKind) -> Option<&DocumentCheckResult> {
    results.iter().find(|result| result.kind == kind)
}

fn accepted(document: &DocumentRef, confidence_score: u8) -> DocumentCheckResult {
    DocumentCheckResult {
        document_id: document.id,
        kind: document.kind,
        verified: true,
        confidence_score,
        findings: Vec::new(),
    }
}

fn inspect_passport(
    document: &DocumentRef,
    applicant: &ApplicantSnapshot,
    today: NaiveDate,
) -> DocumentCheckResult {
    let mut findings = Vec::new();
    let number = applicant.passport_number.trim();

    let well_formed = (6..=9).contains(&number.len())
        && number
            .chars()
            .all(|c| c.is_ascii_digit() || c.is_ascii_uppercase());
    if !well_formed {
        findings.push("passport number format invalid".to_string());
    }

    if let Some(expiry) = applicant.passport_expiry {
        if expiry <= today {
            findings.push(format!("passport expired on {expiry}"));
        }
    }

    if let Some(mrz) = &document.mrz {
        match mrz_document_number(mrz) {
            Ok(mrz_number) if mrz_number != number => {
                findings.push("mrz document number does not match application".to_string())
            }
            Ok(_) => {}
            Err(error) => findings.push(error.to_string()),
        }
    }

    let verified = findings.is_empty();
    DocumentCheckResult {
        document_id: document.id,
        kind: DocumentKind::Passport,
        verified,
        confidence_score: if verified {
            PASSPORT_VERIFIED_CONFIDENCE
        } else {
            PASSPORT_REJECTED_CONFIDENCE
        },
        findings,
    }
}

fn inspect_selfie(document: &DocumentRef) -> DocumentCheckResult {
    let (verified, confidence_score, findings) = match document.liveness_score {
        Some(score) if score >= MIN_LIVENESS => (true, score.min(100), Vec::new()),
        Some(score) => (
            false,
            score,
            vec![format!("liveness score {score} below {MIN_LIVENESS}")],
        ),
        None => (
            false,
            MISSING_LIVENESS_CONFIDENCE,
            vec!["liveness score unavailable".to_string()],
        ),
    };

    DocumentCheckResult {
        document_id: document.id,
        kind: DocumentKind::Selfie,
        verified,
        confidence_score,
        findings,
    }
}

/// Geometric mean of the two capture confidences, compared against the threshold.
fn match_faces(
    passport: &DocumentCheckResult,
    selfie: &DocumentCheckResult,
    threshold: f64,
) -> FaceMatchResult {
    let product = f64::from(passport.confidence_score) * f64::from(selfie.confidence_score);
    let match_score = product.sqrt().round() / 100.0;

    FaceMatchResult {
        verified: match_score >= threshold,
        confidence_score: (match_score * 100.0).round() as u8,
        match_score,
        threshold,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MrzError {
    #[error("mrz line too short")]
    TooShort,
    #[error("mrz contains invalid character '{0}'")]
    InvalidCharacter(char),
    #[error("mrz check digit mismatch (expected {expected}, found {found})")]
    CheckDigitMismatch { expected: u32, found: char },
}

/// ICAO 9303 check digit: weights 7, 3, 1 over digits, letters (A=10) and filler `<`.
pub(crate) fn mrz_check_digit(field: &str) -> Result<u32, MrzError> {
    const WEIGHTS: [u32; 3] = [7, 3, 1];

    field
        .chars()
        .enumerate()
        .try_fold(0u32, |sum, (index, c)| {
            let value = match c {
                '0'..='9' => c as u32 - '0' as u32,
                'A'..='Z' => c as u32 - 'A' as u32 + 10,
                '<' => 0,
                other => return Err(MrzError::InvalidCharacter(other)),
            };
            Ok(sum + value * WEIGHTS[index % 3])
        })
        .map(|sum| sum % 10)
}

/// Extract and validate the document number field of MRZ line two.
pub(crate) fn mrz_document_number(line: &str) -> Result<String, MrzError> {
    let line = line.trim();
    let field = line.get(..9).ok_or(MrzError::TooShort)?;
    let found = line[9..].chars().next().ok_or(MrzError::TooShort)?;

    let expected = mrz_check_digit(field)?;
    if found.to_digit(10) != Some(expected) {
        return Err(MrzError::CheckDigitMismatch { expected, found });
    }

    Ok(field.trim_end_matches('<').to_string())
}
