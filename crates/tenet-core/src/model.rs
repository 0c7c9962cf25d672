use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Labels registered for every scenario unless the routing config narrows them.
pub const DEFAULT_LABELS: &[&str] = &[
    "APPROVE",
    "CONDITIONAL_APPROVE",
    "REJECT",
    "REJECT_WITH_ALTERNATIVE",
    "UNCERTAIN",
    "EXPLAIN_ONLY",
    "CHOOSE_A",
    "CHOOSE_B",
];

/// A retrievable unit of decision policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Guideline {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub text: String,
    pub keywords: BTreeSet<String>,
    pub scope: Scope,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub structured_assertions: Vec<Assertion>,
}

impl Guideline {
    /// True when the keyword set carries the literal scenario id.
    pub fn is_tagged_for(&self, scenario_id: &str) -> bool {
        let needle = scenario_id.to_lowercase();
        !needle.is_empty() && self.keywords.contains(&needle)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    #[serde(alias = "regulation", alias = "REGULATION")]
    Regulatory,
    #[serde(alias = "sop", alias = "SOP")]
    Operational,
    Safety,
    Ethical,
    #[serde(other)]
    Other,
}

/// Machine-checkable condition attached to a guideline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assertion {
    pub parameter: String,
    pub operator: Operator,
    pub threshold: Threshold,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default)]
    pub severity: Severity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operator {
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "==")]
    Eq,
}

impl Operator {
    pub fn is_ordering(self) -> bool {
        !matches!(self, Operator::Eq)
    }

    pub fn symbol(self) -> &'static str {
        match self {
            Operator::Lt => "<",
            Operator::Le => "<=",
            Operator::Gt => ">",
            Operator::Ge => ">=",
            Operator::Eq => "==",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Threshold {
    Bool(bool),
    Number(f64),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    #[default]
    Critical,
}

/// A decision label. Registered per scenario via [`LabelRegistry`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DecisionLabel(String);

impl DecisionLabel {
    pub fn new(label: impl Into<String>) -> Self {
        Self(label.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DecisionLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Closed set of labels accepted for one scenario.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelRegistry {
    labels: BTreeSet<String>,
}

impl LabelRegistry {
    pub fn new<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            labels: labels.into_iter().map(Into::into).collect(),
        }
    }

    /// Exact match after trimming surrounding whitespace. No case folding.
    pub fn resolve(&self, raw: &str) -> Option<DecisionLabel> {
        let trimmed = raw.trim();
        self.labels
            .contains(trimmed)
            .then(|| DecisionLabel::new(trimmed))
    }

    pub fn contains(&self, label: &str) -> bool {
        self.labels.contains(label)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.labels.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

impl Default for LabelRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_LABELS.iter().copied())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionOption {
    #[serde(alias = "option_id")]
    pub id: String,
    #[serde(default, alias = "name")]
    pub description: String,
}

/// One concrete input to the agent under test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioTestCase {
    pub scenario_id: String,
    pub case_id: String,
    pub description: String,
    pub mission_facts: BTreeMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub provided_options: Vec<DecisionOption>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroundTruthRecord {
    pub scenario_id: String,
    pub case_id: String,
    pub expected_decision: DecisionLabel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub evidence: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ParseStatus {
    Ok,
    Malformed,
    Empty,
}

impl std::fmt::Display for ParseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ParseStatus::Ok => "OK",
            ParseStatus::Malformed => "MALFORMED",
            ParseStatus::Empty => "EMPTY",
        })
    }
}

/// Ranked guidelines for one query. Discarded after prompt assembly.
#[derive(Debug, Clone, Default)]
pub struct RetrievalResult {
    pub matched_guidelines: Vec<Arc<Guideline>>,
    pub match_scores: BTreeMap<String, u32>,
    pub used_fallback: bool,
}

impl RetrievalResult {
    pub fn ids(&self) -> Vec<String> {
        self.matched_guidelines
            .iter()
            .map(|g| g.id.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_resolves_exact_labels_only() {
        let reg = LabelRegistry::default();
        assert_eq!(reg.resolve("REJECT"), Some(DecisionLabel::new("REJECT")));
        assert_eq!(
            reg.resolve("  APPROVE\n"),
            Some(DecisionLabel::new("APPROVE"))
        );
        assert_eq!(reg.resolve("reject"), None);
        assert_eq!(reg.resolve("REJECTED"), None);
        assert_eq!(reg.resolve(""), None);
    }

    #[test]
    fn guideline_tolerates_unknown_fields_and_scope_aliases() {
        let g: Guideline = serde_json::from_str(
            r#"{"id":"R1","text":"keep 20% reserve","keywords":["battery","s021"],
                "scope":"REGULATION","source_doc":"part-107","version":3}"#,
        )
        .unwrap();
        assert_eq!(g.scope, Scope::Regulatory);
        assert!(g.is_tagged_for("S021"));
        assert!(!g.is_tagged_for("S022"));

        let g: Guideline = serde_json::from_str(
            r#"{"id":"R2","text":"t","keywords":[],"scope":"community"}"#,
        )
        .unwrap();
        assert_eq!(g.scope, Scope::Other);
    }

    #[test]
    fn assertion_operators_and_thresholds_deserialize() {
        let a: Assertion = serde_json::from_str(
            r#"{"parameter":"battery.reserve_pct","operator":">=","threshold":20,"unit":"%"}"#,
        )
        .unwrap();
        assert_eq!(a.operator, Operator::Ge);
        assert_eq!(a.threshold, Threshold::Number(20.0));
        assert_eq!(a.severity, Severity::Critical);

        let a: Assertion = serde_json::from_str(
            r#"{"parameter":"vlos","operator":"==","threshold":true,"severity":"warning"}"#,
        )
        .unwrap();
        assert_eq!(a.threshold, Threshold::Bool(true));
        assert_eq!(a.severity, Severity::Warning);
    }

    #[test]
    fn parse_status_wire_names() {
        let wire = serde_json::to_string(&ParseStatus::Malformed).unwrap();
        assert_eq!(wire, "\"MALFORMED\"");
        assert_eq!(ParseStatus::Empty.to_string(), "EMPTY");
    }
}
