//! Scoring and aggregation.
//!
//! Matching is strict label equality. Aggregates are plain sums, so merging
//! is associative and commutative; `accuracy` is always recomputed from the
//! summed counts.

use crate::errors::{CaseFailure, FailureKind};
use crate::model::{DecisionLabel, GroundTruthRecord};
use crate::parse::ClassifiedResponse;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const ERROR_LABEL: &str = "ERROR";

/// Observed decision: a registered label or `ERROR` for any case-level failure.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum Observed {
    Label(DecisionLabel),
    Error,
}

impl From<Observed> for String {
    fn from(o: Observed) -> Self {
        match o {
            Observed::Label(l) => l.as_str().to_string(),
            Observed::Error => ERROR_LABEL.to_string(),
        }
    }
}

impl From<String> for Observed {
    fn from(s: String) -> Self {
        if s == ERROR_LABEL {
            Observed::Error
        } else {
            Observed::Label(DecisionLabel::new(s))
        }
    }
}

impl std::fmt::Display for Observed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Observed::Label(l) => write!(f, "{}", l),
            Observed::Error => f.write_str(ERROR_LABEL),
        }
    }
}

/// `(ground_truth, observed)` pair for a mismatch, rendered `GT->OBS`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct DirectionalErrorTag {
    pub ground_truth: DecisionLabel,
    pub observed: Observed,
}

impl DirectionalErrorTag {
    pub fn new(ground_truth: DecisionLabel, observed: Observed) -> Self {
        Self {
            ground_truth,
            observed,
        }
    }
}

impl std::fmt::Display for DirectionalErrorTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}->{}", self.ground_truth, self.observed)
    }
}

impl From<DirectionalErrorTag> for String {
    fn from(t: DirectionalErrorTag) -> Self {
        t.to_string()
    }
}

impl TryFrom<String> for DirectionalErrorTag {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        let (gt, obs) = s
            .split_once("->")
            .ok_or_else(|| format!("invalid error tag '{}': expected GT->OBS", s))?;
        Ok(Self::new(
            DecisionLabel::new(gt),
            Observed::from(obs.to_string()),
        ))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationOutcome {
    pub scenario_id: String,
    pub case_id: String,
    pub ground_truth: DecisionLabel,
    pub observed: Observed,
    #[serde(rename = "match")]
    pub is_match: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_class: Option<DirectionalErrorTag>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<CaseFailure>,
}

impl ValidationOutcome {
    pub fn new(
        truth: &GroundTruthRecord,
        observed: Observed,
        failure: Option<CaseFailure>,
    ) -> Self {
        let is_match = matches!(&observed, Observed::Label(l) if *l == truth.expected_decision);
        let error_class = (!is_match)
            .then(|| DirectionalErrorTag::new(truth.expected_decision.clone(), observed.clone()));
        Self {
            scenario_id: truth.scenario_id.clone(),
            case_id: truth.case_id.clone(),
            ground_truth: truth.expected_decision.clone(),
            observed,
            is_match,
            error_class,
            failure,
        }
    }

    /// Unregistered labels and parse failures both score as `ERROR`.
    pub fn from_classified(truth: &GroundTruthRecord, classified: &ClassifiedResponse) -> Self {
        match (&classified.decision, classified.failure()) {
            (Some(label), None) => Self::new(truth, Observed::Label(label.clone()), None),
            (_, failure) => Self::new(truth, Observed::Error, failure),
        }
    }

    pub fn from_failure(truth: &GroundTruthRecord, failure: CaseFailure) -> Self {
        Self::new(truth, Observed::Error, Some(failure))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccuracyReport {
    pub correct: u64,
    pub total: u64,
    pub accuracy: f64,
    #[serde(default)]
    pub error_breakdown: BTreeMap<DirectionalErrorTag, u64>,
    #[serde(default)]
    pub failure_breakdown: BTreeMap<FailureKind, u64>,
}

impl AccuracyReport {
    pub fn from_counts(correct: u64, total: u64) -> Self {
        Self {
            correct,
            total,
            accuracy: ratio(correct, total),
            ..Self::default()
        }
    }

    /// Reduce per-case outcomes into one report.
    ///
    /// Cases cancelled before they started show up in `failure_breakdown`
    /// only; they are not part of `correct`/`total`.
    pub fn score<'a, I>(outcomes: I) -> Self
    where
        I: IntoIterator<Item = &'a ValidationOutcome>,
    {
        let mut report = Self::default();
        for o in outcomes {
            if matches!(o.failure, Some(CaseFailure::Cancelled)) {
                *report
                    .failure_breakdown
                    .entry(FailureKind::Cancelled)
                    .or_insert(0) += 1;
                continue;
            }
            report.total += 1;
            if o.is_match {
                report.correct += 1;
            }
            if let Some(tag) = &o.error_class {
                *report.error_breakdown.entry(tag.clone()).or_insert(0) += 1;
            }
            if let Some(f) = &o.failure {
                *report.failure_breakdown.entry(f.kind()).or_insert(0) += 1;
            }
        }
        report.accuracy = ratio(report.correct, report.total);
        report
    }

    pub fn merge_with(&self, other: &Self) -> Self {
        let mut out = self.clone();
        out.correct += other.correct;
        out.total += other.total;
        for (tag, n) in &other.error_breakdown {
            *out.error_breakdown.entry(tag.clone()).or_insert(0) += n;
        }
        for (kind, n) in &other.failure_breakdown {
            *out.failure_breakdown.entry(*kind).or_insert(0) += n;
        }
        out.accuracy = ratio(out.correct, out.total);
        out
    }

    /// Corpus-wide reduction. An empty input yields the zero report.
    pub fn merge<'a, I>(reports: I) -> Self
    where
        I: IntoIterator<Item = &'a AccuracyReport>,
    {
        reports
            .into_iter()
            .fold(Self::default(), |acc, r| acc.merge_with(r))
    }

    pub fn percent(&self) -> f64 {
        self.accuracy * 100.0
    }
}

fn ratio(correct: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        correct as f64 / total as f64
    }
}
