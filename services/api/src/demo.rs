use crate::infra::{ApplicationIntake, Platform};
use chrono::{Months, NaiveDate, Utc};
use clap::Args;
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;
use uuid::Uuid;
use verifly::config::VerificationSettings;
use verifly::error::AppError;
use verifly::verification::domain::{DocumentReport, DocumentStatus};
use verifly::verification::sources::similarity::{match_type_for, watchlist_severity};
use verifly::verification::sources::{DOCUMENTS_SOURCE, PEP_SOURCE, SANCTIONS_SOURCE};
use verifly::verification::{
    DocumentKind, DocumentRef, NewHit, Policy, QueryTerms, RecordData, RiskScorer, RunId,
    ScoreOutcome, SourceHit, SourceReport, VerificationError, VerificationRun,
};

const POLL_INTERVAL: Duration = Duration::from_millis(25);
const POLL_ATTEMPTS: usize = 400;

#[derive(Args, Debug)]
pub(crate) struct DemoArgs {
    /// Applicant first name
    #[arg(long, default_value = "Ada")]
    pub(crate) first_name: String,
    /// Applicant last name
    #[arg(long, default_value = "Lovelace")]
    pub(crate) last_name: String,
    /// Destination country (ISO code); omit to use the global policy
    #[arg(long)]
    pub(crate) destination: Option<String>,
}

#[derive(Args, Debug, Default)]
pub(crate) struct ScoreArgs {
    /// Sanctions hit confidence (0-100); repeat for several hits
    #[arg(long)]
    pub(crate) sanctions: Vec<f64>,
    /// PEP hit confidence (0-100); repeat for several hits
    #[arg(long)]
    pub(crate) pep: Vec<f64>,
    /// Treat every submitted document as verified
    #[arg(long)]
    pub(crate) documents_verified: bool,
    /// Overall document confidence (defaults to 100 when verified, 0 otherwise)
    #[arg(long)]
    pub(crate) document_confidence: Option<u8>,
}

pub(crate) async fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let DemoArgs {
        first_name,
        last_name,
        destination,
    } = args;

    let settings = VerificationSettings {
        notify_retry_delays: vec![Duration::from_millis(100); 3],
        ..VerificationSettings::default()
    };
    let platform = Platform::default();
    let coordinator = platform.coordinator(settings);

    println!("Travel verification demo");
    let summary = platform
        .applications
        .register(demo_intake(first_name, last_name, destination))
        .map_err(VerificationError::from)?;
    println!(
        "- Registered application {} (destination {})",
        summary.id,
        summary.destination_country.as_deref().unwrap_or("any")
    );

    let queued = coordinator
        .start(&summary.id.to_string(), Some("cli-demo".to_string()), None)
        .await?;
    println!(
        "- Run {} queued under policy {}",
        queued.id, queued.policy_version
    );

    let mut run = queued;
    for _ in 0..POLL_ATTEMPTS {
        if run.status.is_terminal() {
            break;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
        run = coordinator.get_run(run.id).await?;
    }
    if !run.status.is_terminal() {
        println!("  Run still {} after polling; giving up", run.status.label());
        return Ok(());
    }

    let hits = coordinator.list_hits(run.id).await?;
    render_run(&run, &hits);

    for _ in 0..POLL_ATTEMPTS {
        if !platform.notifier.delivered().is_empty() {
            break;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
    match platform.applications.status_of(summary.id) {
        Some(status) => println!("- Application status: {}", status.label()),
        None => println!("- Application status unchanged"),
    }
    match platform.notifier.delivered().first() {
        Some((_, decision)) => println!("- Applicant notified: {}", decision.applicant_text()),
        None => println!("- Applicant notification pending"),
    }

    let actions: Vec<&str> = platform
        .audit
        .events()
        .iter()
        .map(|event| event.action.label())
        .collect();
    println!("- Audit trail: {}", actions.join(" -> "));

    Ok(())
}

pub(crate) fn run_score(args: ScoreArgs) -> Result<(), AppError> {
    let policy = Policy::default_policy();
    let (hits, source_results) = score_inputs(&args);
    let outcome = RiskScorer.score(&hits, &source_results, &policy);
    render_outcome(&policy, &outcome);
    Ok(())
}

fn demo_intake(
    first_name: String,
    last_name: String,
    destination: Option<String>,
) -> ApplicationIntake {
    let today = Utc::now().date_naive();
    ApplicationIntake {
        first_name,
        middle_name: None,
        last_name,
        date_of_birth: NaiveDate::from_ymd_opt(1985, 4, 12).unwrap_or_default(),
        nationality: "GB".to_string(),
        passport_number: "K1234567".to_string(),
        passport_country: "GB".to_string(),
        passport_expiry: today.checked_add_months(Months::new(60)),
        destination_country: destination,
        payment_completed: true,
        documents: vec![
            DocumentRef {
                id: Uuid::new_v4(),
                kind: DocumentKind::Passport,
                storage_key: "demo/passport.jpg".to_string(),
                mrz: None,
                liveness_score: None,
            },
            DocumentRef {
                id: Uuid::new_v4(),
                kind: DocumentKind::Selfie,
                storage_key: "demo/selfie.jpg".to_string(),
                mrz: None,
                liveness_score: Some(91),
            },
        ],
    }
}

/// Synthetic hits and a documents report equivalent to the given inputs.
fn score_inputs(args: &ScoreArgs) -> (Vec<SourceHit>, BTreeMap<String, SourceReport>) {
    let run_id = RunId::new();
    let today = Utc::now().date_naive();
    let terms = QueryTerms {
        first_name: "manual".to_string(),
        middle_name: None,
        last_name: "input".to_string(),
        date_of_birth: NaiveDate::default(),
        nationality: "XX".to_string(),
        passport_number: None,
    };

    let sanctions = args.sanctions.iter().map(|&confidence| {
        let record = RecordData::Sanctions {
            name: "manual input".to_string(),
            list_name: "cli".to_string(),
            date_added: today,
            reason: "supplied on the command line".to_string(),
            program: "cli".to_string(),
        };
        SourceHit::from_new(
            run_id,
            SANCTIONS_SOURCE,
            manual_hit("sanctions_list", &terms, confidence, record),
        )
    });
    let pep = args.pep.iter().map(|&confidence| {
        let record = RecordData::Pep {
            name: "manual input".to_string(),
            position: "unknown".to_string(),
            country: "XX".to_string(),
            category: "cli".to_string(),
            risk_level: "unknown".to_string(),
        };
        SourceHit::from_new(
            run_id,
            PEP_SOURCE,
            manual_hit("pep_registry", &terms, confidence, record),
        )
    });
    let hits = sanctions.chain(pep).collect();

    let verified = args.documents_verified;
    let confidence_score = args
        .document_confidence
        .unwrap_or(if verified { 100 } else { 0 })
        .min(100);
    let mut source_results = BTreeMap::new();
    source_results.insert(
        DOCUMENTS_SOURCE.to_string(),
        SourceReport::Documents(DocumentReport {
            checked_at: Utc::now(),
            verified,
            confidence_score,
            overall_status: if verified {
                DocumentStatus::Verified
            } else {
                DocumentStatus::Failed
            },
            document_results: Vec::new(),
            face_match: None,
        }),
    );

    (hits, source_results)
}

fn manual_hit(
    source_type: &str,
    terms: &QueryTerms,
    confidence: f64,
    record: RecordData,
) -> NewHit {
    let rounded = confidence.clamp(0.0, 100.0).round() as u8;
    NewHit {
        source_type: source_type.to_string(),
        query_terms: terms.clone(),
        match_confidence: confidence,
        match_type: match_type_for(rounded),
        severity: watchlist_severity(rounded),
        record_data: record,
        jurisdiction: None,
        record_url: None,
        record_date: None,
        metadata: BTreeMap::new(),
    }
}

fn render_run(run: &VerificationRun, hits: &[SourceHit]) {
    println!("\nRun {} {}", run.id, run.status.label());
    match (run.decision, run.risk_score) {
        (Some(decision), Some(score)) => {
            println!("- Decision: {} (risk score {:.2})", decision.label(), score)
        }
        _ => println!("- No decision recorded"),
    }
    println!("- Reason codes: {}", joined(&run.reason_codes));
    for (category, points) in &run.scoring_breakdown.categories {
        println!("  - {category}: {points:.0} points");
    }

    println!("Source results:");
    for (source, report) in &run.source_results {
        let summary = match report {
            SourceReport::Watchlist(report) => format!("{} hit(s)", report.total_hits),
            SourceReport::Documents(report) => format!(
                "{} (confidence {})",
                wire_name(&report.overall_status),
                report.confidence_score
            ),
            SourceReport::Degraded(report) => format!("degraded: {}", report.error),
        };
        println!("  - {source}: {summary}");
    }

    if hits.is_empty() {
        println!("No watchlist hits");
        return;
    }
    println!("Hits (highest confidence first):");
    for hit in hits {
        println!(
            "  - {} {:.2} {} / {}",
            hit.source_name,
            hit.match_confidence,
            wire_name(&hit.match_type),
            wire_name(&hit.severity)
        );
    }
}

fn render_outcome(policy: &Policy, outcome: &ScoreOutcome) {
    println!("Scored under {} {}", policy.name, policy.version);
    for (category, points) in &outcome.breakdown.categories {
        println!("  - {category}: {points:.0} points");
    }
    println!(
        "- Total {:.2} | risk score {:.2} | decision {}",
        outcome.breakdown.total,
        outcome.score,
        outcome.decision.label()
    );
    println!("- Reason codes: {}", joined(&outcome.reason_codes));
}

fn joined<T: Serialize>(values: &[T]) -> String {
    if values.is_empty() {
        return "none".to_string();
    }
    values.iter().map(wire_name).collect::<Vec<_>>().join(", ")
}

/// The serde wire name of a unit enum variant.
fn wire_name<T: Serialize>(value: &T) -> String {
    match serde_json::to_value(value) {
        Ok(serde_json::Value::String(name)) => name,
        Ok(other) => other.to_string(),
        Err(_) => "unknown".to_string(),
    }
}
