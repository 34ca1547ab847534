use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};

use super::similarity::{match_type_for, name_similarity, watchlist_severity};
use super::{SourceCheck, SourceError, SourceOutcome, SANCTIONS_SOURCE};
use crate::verification::domain::{
    ApplicantSnapshot, NewHit, RecordData, SourceReport, WatchlistReport,
};

const MIN_HIT_CONFIDENCE: u8 = 60;
const REPORT_CONFIDENCE_THRESHOLD: u8 = 70;

/// A listed individual on a sanctions watchlist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchlistEntry {
    /// Lowercase "first last".
    pub name: String,
    pub date_of_birth: Option<NaiveDate>,
    pub list_name: String,
    pub program: String,
    pub reason: String,
    pub date_added: NaiveDate,
    pub jurisdiction: String,
    pub record_url: String,
}

/// Watchlist name matching against a sanctions list snapshot.
#[derive(Debug, Clone)]
pub struct SanctionsCheck {
    entries: Vec<WatchlistEntry>,
}

impl SanctionsCheck {
    pub fn new(entries: Vec<WatchlistEntry>) -> Self {
        Self { entries }
    }

    /// Small fixed list used by the demo and the in-memory service.
    pub fn reference() -> Self {
        let date_added = NaiveDate::from_ymd_opt(2020, 1, 15).unwrap_or_default();
        let entry = |name: &str, program: &str, reason: &str| WatchlistEntry {
            name: name.to_string(),
            date_of_birth: None,
            list_name: "OFAC SDN List".to_string(),
            program: program.to_string(),
            reason: reason.to_string(),
            date_added,
            jurisdiction: "US".to_string(),
            record_url: "https://sanctionslist.ofac.treas.gov/".to_string(),
        };

        Self::new(vec![
            entry("john smith", "NARCOTICS", "Narcotics trafficking"),
            entry("jane doe", "NARCOTICS", "Narcotics trafficking"),
            entry("ivan drago", "CYBER", "Malicious cyber activity"),
            entry("viktor stahl", "NPWMD", "Proliferation financing"),
        ])
    }

    fn screen(&self, applicant: &ApplicantSnapshot) -> Vec<NewHit> {
        let full_name = applicant.full_name();
        let query_terms = applicant.query_terms(true);

        self.entries
            .iter()
            .filter(|entry| {
                entry
                    .name
                    .split_whitespace()
                    .any(|token| full_name.contains(token))
            })
            .filter_map(|entry| {
                let confidence = name_similarity(&full_name, &entry.name);
                if confidence <= MIN_HIT_CONFIDENCE {
                    return None;
                }

                let mut metadata = BTreeMap::new();
                metadata.insert("list_type".to_string(), "SDN".to_string());
                metadata.insert("program".to_string(), entry.program.clone());
                metadata.insert("entity_type".to_string(), "Individual".to_string());
                if let Some(listed_dob) = entry.date_of_birth {
                    metadata.insert(
                        "dob_match".to_string(),
                        (listed_dob == applicant.date_of_birth).to_string(),
                    );
                }

                Some(NewHit {
                    source_type: "sanctions_list".to_string(),
                    query_terms: query_terms.clone(),
                    match_confidence: f64::from(confidence),
                    match_type: match_type_for(confidence),
                    severity: watchlist_severity(confidence),
                    record_data: RecordData::Sanctions {
                        name: entry.name.to_uppercase(),
                        list_name: entry.list_name.clone(),
                        date_added: entry.date_added,
                        reason: entry.reason.clone(),
                        program: entry.program.clone(),
                    },
                    jurisdiction: Some(entry.jurisdiction.clone()),
                    record_url: Some(entry.record_url.clone()),
                    record_date: Some(entry.date_added),
                    metadata,
                })
            })
            .collect()
    }
}

#[async_trait]
impl SourceCheck for SanctionsCheck {
    fn name(&self) -> &str {
        SANCTIONS_SOURCE
    }

    fn source_type(&self) -> &str {
        "watchlist"
    }

    async fn check(&self, applicant: &ApplicantSnapshot) -> Result<SourceOutcome, SourceError> {
        if applicant.last_name.trim().is_empty() {
            return Err(SourceError::InvalidInput("last name is required".to_string()));
        }

        let hits = self.screen(applicant);
        let report = SourceReport::Watchlist(WatchlistReport {
            checked_at: Utc::now(),
            query_terms: applicant.query_terms(true),
            total_hits: hits.len(),
            confidence_threshold: REPORT_CONFIDENCE_THRESHOLD,
        });

        Ok(SourceOutcome { hits, report })
    }
}
