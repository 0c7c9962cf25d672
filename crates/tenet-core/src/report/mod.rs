//! Report shapes written after a run.
//!
//! One `<ID>_validation.json` per scenario plus `summary.json` when several
//! scenarios ran. Neither carries credentials or prompt text.

pub mod console;
pub mod json;
pub mod progress;

use crate::errors::FailureKind;
use crate::guidelines::assertion::AssertionCheck;
use crate::model::ParseStatus;
use crate::prompt::ScenarioFamily;
use crate::validate::{AccuracyReport, DirectionalErrorTag, ValidationOutcome};
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    /// Decoded with a registered label.
    Ok,
    /// Decoded, but the label is not registered for the scenario.
    UnknownLabel,
    Malformed,
    Empty,
    /// The completion call itself failed.
    Failed,
}

/// One completion attempt for a case.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttemptRow {
    pub attempt_no: u32,
    pub status: AttemptStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub duration_ms: u64,
}

/// Per-case row of the validation report.
#[derive(Debug, Clone, Serialize)]
pub struct CaseResult {
    #[serde(flatten)]
    pub outcome: ValidationOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parse_status: Option<ParseStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_decision: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_response: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub reasoning_steps: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub violated_policies: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub citations: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub evidence_used: Vec<String>,
    pub retrieved_guidelines: Vec<String>,
    pub match_scores: BTreeMap<String, u32>,
    pub used_fallback: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub assertion_checks: Vec<AssertionCheck>,
    pub attempts: Vec<AttemptRow>,
    pub duration_ms: u64,
}

impl CaseResult {
    /// Row for a case that never reached the completion service.
    pub fn without_attempts(outcome: ValidationOutcome) -> Self {
        Self {
            outcome,
            parse_status: None,
            raw_decision: None,
            raw_response: None,
            reasoning_steps: Vec::new(),
            violated_policies: Vec::new(),
            citations: Vec::new(),
            evidence_used: Vec::new(),
            retrieved_guidelines: Vec::new(),
            match_scores: BTreeMap::new(),
            used_fallback: false,
            fingerprint: None,
            assertion_checks: Vec::new(),
            attempts: Vec::new(),
            duration_ms: 0,
        }
    }

    pub fn case_id(&self) -> &str {
        &self.outcome.case_id
    }
}

/// Everything the runner produced for one scenario.
#[derive(Debug, Clone)]
pub struct ScenarioRun {
    pub scenario_id: String,
    pub family: ScenarioFamily,
    pub results: Vec<CaseResult>,
    pub accuracy: AccuracyReport,
    pub cancelled: bool,
}

/// Identity shared by every report of one invocation.
#[derive(Debug, Clone, Serialize)]
pub struct RunInfo {
    pub run_id: String,
    pub timestamp: String,
    pub provider: String,
    pub model: String,
}

impl RunInfo {
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            timestamp: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
            provider: provider.into(),
            model: model.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccuracySection {
    pub correct: u64,
    pub total: u64,
    /// Percentage, rounded to two decimals.
    pub pct: f64,
}

impl From<&AccuracyReport> for AccuracySection {
    fn from(r: &AccuracyReport) -> Self {
        Self {
            correct: r.correct,
            total: r.total,
            pct: round2(r.percent()),
        }
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// `<ID>_validation.json`.
#[derive(Debug, Clone, Serialize)]
pub struct ValidationReport {
    pub scenario_id: String,
    pub family: ScenarioFamily,
    pub timestamp: String,
    pub run_id: String,
    pub provider: String,
    pub model: String,
    pub accuracy: AccuracySection,
    pub error_breakdown: BTreeMap<DirectionalErrorTag, u64>,
    pub failure_breakdown: BTreeMap<FailureKind, u64>,
    pub cancelled: bool,
    pub results: Vec<CaseResult>,
}

impl ValidationReport {
    pub fn new(run: &ScenarioRun, info: &RunInfo) -> Self {
        Self {
            scenario_id: run.scenario_id.clone(),
            family: run.family,
            timestamp: info.timestamp.clone(),
            run_id: info.run_id.clone(),
            provider: info.provider.clone(),
            model: info.model.clone(),
            accuracy: AccuracySection::from(&run.accuracy),
            error_breakdown: run.accuracy.error_breakdown.clone(),
            failure_breakdown: run.accuracy.failure_breakdown.clone(),
            cancelled: run.cancelled,
            results: run.results.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ScenarioSummary {
    pub scenario_id: String,
    pub family: ScenarioFamily,
    pub accuracy: AccuracySection,
    pub cancelled: bool,
}

/// `summary.json`: the merged report across every scenario of the run.
#[derive(Debug, Clone, Serialize)]
pub struct CorpusSummary {
    pub timestamp: String,
    pub run_id: String,
    pub provider: String,
    pub model: String,
    pub accuracy: AccuracySection,
    pub error_breakdown: BTreeMap<DirectionalErrorTag, u64>,
    pub failure_breakdown: BTreeMap<FailureKind, u64>,
    pub cancelled: bool,
    pub scenarios: Vec<ScenarioSummary>,
}

impl CorpusSummary {
    pub fn new(runs: &[ScenarioRun], info: &RunInfo) -> Self {
        let merged = AccuracyReport::merge(runs.iter().map(|r| &r.accuracy));
        Self {
            timestamp: info.timestamp.clone(),
            run_id: info.run_id.clone(),
            provider: info.provider.clone(),
            model: info.model.clone(),
            accuracy: AccuracySection::from(&merged),
            error_breakdown: merged.error_breakdown,
            failure_breakdown: merged.failure_breakdown,
            cancelled: runs.iter().any(|r| r.cancelled),
            scenarios: runs
                .iter()
                .map(|r| ScenarioSummary {
                    scenario_id: r.scenario_id.clone(),
                    family: r.family,
                    accuracy: AccuracySection::from(&r.accuracy),
                    cancelled: r.cancelled,
                })
                .collect(),
        }
    }
}
