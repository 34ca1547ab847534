mod decision;
mod rules;

pub use decision::decide;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::domain::{round_two, Decision, ReasonCode, ScoringBreakdown, SourceHit, SourceReport};
use super::policy::Policy;
use super::sources::{DOCUMENTS_SOURCE, PEP_SOURCE, SANCTIONS_SOURCE};
use rules::{document_contribution, tiered_contribution, Contribution};

const MAX_RISK_SCORE: f64 = 100.0;

/// Scoring output persisted on a completed run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreOutcome {
    pub score: f64,
    pub decision: Decision,
    pub reason_codes: Vec<ReasonCode>,
    pub breakdown: ScoringBreakdown,
}

/// Stateless scorer: the same hits, source results and policy always produce
/// the same outcome, regardless of hit order.
#[derive(Debug, Clone, Copy, Default)]
pub struct RiskScorer;

impl RiskScorer {
    pub fn score(
        &self,
        hits: &[SourceHit],
        source_results: &BTreeMap<String, SourceReport>,
        policy: &Policy,
    ) -> ScoreOutcome {
        let rules = &policy.rules;
        let contributions = [
            (
                SANCTIONS_SOURCE,
                tiered_contribution(
                    hits,
                    SANCTIONS_SOURCE,
                    &rules.sanctions,
                    ReasonCode::SanctionsMatch,
                    ReasonCode::PotentialSanctionsMatch,
                ),
            ),
            (
                PEP_SOURCE,
                tiered_contribution(
                    hits,
                    PEP_SOURCE,
                    &rules.pep,
                    ReasonCode::PepMatch,
                    ReasonCode::PotentialPepMatch,
                ),
            ),
            (
                DOCUMENTS_SOURCE,
                document_contribution(
                    source_results.get(DOCUMENTS_SOURCE),
                    &rules.documents,
                    &rules.face_match,
                ),
            ),
        ];

        let mut breakdown = ScoringBreakdown::default();
        let mut reason_codes = Vec::new();
        let mut total = 0.0;

        for (category, contribution) in contributions {
            let Contribution { points, reason } = contribution;
            breakdown.categories.insert(category.to_string(), points);
            total += points;
            if let Some(code) = reason {
                if !reason_codes.contains(&code) {
                    reason_codes.push(code);
                }
            }
        }

        // Tier points can sum past 100; the breakdown keeps the raw total.
        breakdown.total = round_two(total);
        let score = round_two(total.min(MAX_RISK_SCORE));

        ScoreOutcome {
            score,
            decision: decide(breakdown.total, &policy.thresholds),
            reason_codes,
            breakdown,
        }
    }
}
