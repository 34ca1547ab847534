use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};

use super::similarity::{match_type_for, name_similarity};
use super::{SourceCheck, SourceError, SourceOutcome, PEP_SOURCE};
use crate::verification::domain::{
    ApplicantSnapshot, MatchType, NewHit, QueryTerms, RecordData, Severity, SourceReport,
    WatchlistReport,
};

const MIN_HIT_CONFIDENCE: u8 = 50;
const HIGH_RISK_ABOVE: u8 = 85;
const ASSOCIATE_CONFIDENCE: f64 = 40.0;
const REPORT_CONFIDENCE_THRESHOLD: u8 = 70;

/// A politically exposed person in the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PepEntry {
    /// Lowercase "first last".
    pub name: String,
    pub position: String,
    pub country: String,
    pub category: String,
    pub last_updated: NaiveDate,
}

/// Politically-exposed-person screening with an associate surname fallback.
#[derive(Debug, Clone)]
pub struct PepCheck {
    entries: Vec<PepEntry>,
    associate_surnames: Vec<String>,
}

impl PepCheck {
    pub fn new(entries: Vec<PepEntry>, associate_surnames: Vec<String>) -> Self {
        let associate_surnames = associate_surnames
            .into_iter()
            .map(|surname| surname.to_lowercase())
            .collect();
        Self {
            entries,
            associate_surnames,
        }
    }

    pub fn reference() -> Self {
        let last_updated = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap_or_default();
        let entry = |name: &str, position: &str, country: &str| PepEntry {
            name: name.to_string(),
            position: position.to_string(),
            country: country.to_string(),
            category: "Head of State".to_string(),
            last_updated,
        };

        Self::new(
            vec![
                entry("marta kovacs", "President", "Hungary"),
                entry("henrik dahl", "Prime Minister", "Norway"),
                entry("amara okafor", "Minister of Finance", "Nigeria"),
                entry("lucas ferreira", "Governor", "Brazil"),
            ],
            ["smith", "johnson", "brown", "davis", "miller"]
                .into_iter()
                .map(str::to_string)
                .collect(),
        )
    }

    fn screen(&self, applicant: &ApplicantSnapshot) -> Vec<NewHit> {
        let full_name = applicant.full_name();
        let query_terms = applicant.query_terms(false);

        let mut hits: Vec<NewHit> = self
            .entries
            .iter()
            .filter_map(|entry| {
                let confidence = name_similarity(&full_name, &entry.name);
                if confidence <= MIN_HIT_CONFIDENCE {
                    return None;
                }

                let high_risk = confidence > HIGH_RISK_ABOVE;
                let mut metadata = BTreeMap::new();
                metadata.insert("pep_category".to_string(), entry.category.clone());
                metadata.insert("political_exposure".to_string(), "Direct".to_string());

                Some(NewHit {
                    source_type: "pep_database".to_string(),
                    query_terms: query_terms.clone(),
                    match_confidence: f64::from(confidence),
                    match_type: match_type_for(confidence),
                    severity: if high_risk {
                        Severity::High
                    } else {
                        Severity::Medium
                    },
                    record_data: RecordData::Pep {
                        name: entry.name.to_uppercase(),
                        position: entry.position.clone(),
                        country: entry.country.clone(),
                        category: entry.category.clone(),
                        risk_level: if high_risk { "High" } else { "Medium" }.to_string(),
                    },
                    jurisdiction: Some(entry.country.clone()),
                    record_url: None,
                    record_date: Some(entry.last_updated),
                    metadata,
                })
            })
            .collect();

        if hits.is_empty() {
            if let Some(hit) = self.associate_hit(applicant, query_terms) {
                hits.push(hit);
            }
        }

        hits
    }

    /// Common-surname heuristic for possible family members or associates.
    fn associate_hit(
        &self,
        applicant: &ApplicantSnapshot,
        query_terms: QueryTerms,
    ) -> Option<NewHit> {
        let surname = applicant.last_name.trim().to_lowercase();
        if !self.associate_surnames.contains(&surname) {
            return None;
        }

        let mut metadata = BTreeMap::new();
        metadata.insert("pep_category".to_string(), "Associate".to_string());
        metadata.insert("political_exposure".to_string(), "Indirect".to_string());
        metadata.insert(
            "confidence_note".to_string(),
            "Common surname match".to_string(),
        );

        Some(NewHit {
            source_type: "pep_associates".to_string(),
            query_terms,
            match_confidence: ASSOCIATE_CONFIDENCE,
            match_type: MatchType::Fuzzy,
            severity: Severity::Low,
            record_data: RecordData::PepAssociate {
                name: applicant.full_name().to_uppercase(),
                relationship: "Possible family member".to_string(),
                associated_pep: "Unresolved registry association".to_string(),
                country: applicant.nationality.clone(),
            },
            jurisdiction: Some(applicant.nationality.clone()),
            record_url: None,
            record_date: Some(Utc::now().date_naive()),
            metadata,
        })
    }
}

#[async_trait]
impl SourceCheck for PepCheck {
    fn name(&self) -> &str {
        PEP_SOURCE
    }

    fn source_type(&self) -> &str {
        "registry"
    }

    async fn check(&self, applicant: &ApplicantSnapshot) -> Result<SourceOutcome, SourceError> {
        if applicant.last_name.trim().is_empty() {
            return Err(SourceError::InvalidInput("last name is required".to_string()));
        }

        let hits = self.screen(applicant);
        let report = SourceReport::Watchlist(WatchlistReport {
            checked_at: Utc::now(),
            query_terms: applicant.query_terms(false),
            total_hits: hits.len(),
            confidence_threshold: REPORT_CONFIDENCE_THRESHOLD,
        });

        Ok(SourceOutcome { hits, report })
    }
}
