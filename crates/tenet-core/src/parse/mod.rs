//! Response parsing and decision classification.
//!
//! Decoding never guesses a label: anything that does not decode into an
//! object with a string `decision` is `Malformed`, blank input is `Empty`, and
//! a decoded label outside the scenario's registry is kept as `raw_decision`
//! with `decision = None`.

pub mod repair;

use crate::errors::CaseFailure;
use crate::model::{DecisionLabel, LabelRegistry, ParseStatus};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Structured fields recovered from a decodable response.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub decision: String,
    #[serde(default)]
    pub reasoning_steps: Vec<String>,
    #[serde(default)]
    pub violated_policies: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub citations: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub evidence_used: Vec<String>,
}

/// Result of decoding raw model text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseOutcome {
    Ok(DecisionRecord),
    Malformed { reason: String },
    Empty,
}

impl ParseOutcome {
    pub fn status(&self) -> ParseStatus {
        match self {
            ParseOutcome::Ok(_) => ParseStatus::Ok,
            ParseOutcome::Malformed { .. } => ParseStatus::Malformed,
            ParseOutcome::Empty => ParseStatus::Empty,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifiedResponse {
    pub raw_text: String,
    pub parse_status: ParseStatus,
    pub decision: Option<DecisionLabel>,
    /// Decision string as emitted, before registry lookup.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_decision: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub malformed_reason: Option<String>,
    pub reasoning_steps: Vec<String>,
    pub violated_policies: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub citations: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub evidence_used: Vec<String>,
}

impl ClassifiedResponse {
    /// Case-level failure, if the response does not carry a registered label.
    pub fn failure(&self) -> Option<CaseFailure> {
        match (self.parse_status, &self.decision) {
            (ParseStatus::Ok, Some(_)) => None,
            (ParseStatus::Ok, None) => Some(CaseFailure::UnknownDecisionLabel {
                raw: self.raw_decision.clone().unwrap_or_default(),
            }),
            (status, _) => Some(CaseFailure::ParseFailure {
                status,
                reason: self.malformed_reason.clone(),
            }),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResponseParser {
    labels: LabelRegistry,
}

impl ResponseParser {
    pub fn new(labels: LabelRegistry) -> Self {
        Self { labels }
    }

    pub fn parse(&self, raw_text: &str) -> ClassifiedResponse {
        let outcome = decode(raw_text);
        let status = outcome.status();
        let mut out = ClassifiedResponse {
            raw_text: raw_text.to_string(),
            parse_status: status,
            decision: None,
            raw_decision: None,
            malformed_reason: None,
            reasoning_steps: Vec::new(),
            violated_policies: Vec::new(),
            citations: Vec::new(),
            evidence_used: Vec::new(),
        };
        match outcome {
            ParseOutcome::Ok(record) => {
                out.decision = self.labels.resolve(&record.decision);
                out.raw_decision = Some(record.decision);
                out.reasoning_steps = record.reasoning_steps;
                out.violated_policies = record.violated_policies;
                out.citations = record.citations;
                out.evidence_used = record.evidence_used;
            }
            ParseOutcome::Malformed { reason } => out.malformed_reason = Some(reason),
            ParseOutcome::Empty => {}
        }
        out
    }
}

/// Decode `raw_text`, applying recovery steps in order until one yields an object.
pub fn decode(raw_text: &str) -> ParseOutcome {
    let trimmed = raw_text.trim();
    if trimmed.is_empty() {
        return ParseOutcome::Empty;
    }

    let mut last_error = match decode_object(trimmed) {
        Ok(obj) => return record_from(obj),
        Err(e) => e,
    };

    let unfenced = repair::strip_fences(trimmed);
    if unfenced.is_empty() {
        return ParseOutcome::Empty;
    }
    let Some(candidate) = repair::extract_object(unfenced) else {
        return ParseOutcome::Malformed {
            reason: "no JSON object found".to_string(),
        };
    };

    let repaired_commas = repair::remove_trailing_commas(candidate);
    let repaired_quotes = repair::remove_trailing_commas(&repair::normalize_quotes(candidate));
    for attempt in [candidate, repaired_commas.as_str(), repaired_quotes.as_str()] {
        match decode_object(attempt) {
            Ok(obj) => return record_from(obj),
            Err(e) => last_error = e,
        }
    }
    ParseOutcome::Malformed { reason: last_error }
}

fn decode_object(text: &str) -> Result<Map<String, Value>, String> {
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(obj)) => Ok(obj),
        Ok(other) => Err(format!("expected a JSON object, found {}", kind_of(&other))),
        Err(e) => Err(e.to_string()),
    }
}

fn kind_of(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn record_from(obj: Map<String, Value>) -> ParseOutcome {
    let decision = match obj.get("decision") {
        Some(Value::String(s)) => s.clone(),
        Some(other) => {
            return ParseOutcome::Malformed {
                reason: format!(
                    "field `decision` must be a string, found {}",
                    kind_of(other)
                ),
            }
        }
        None => {
            return ParseOutcome::Malformed {
                reason: "missing field `decision`".to_string(),
            }
        }
    };

    let reasoning_steps = ["reasoning_steps", "reasons", "reasoning", "analysis"]
        .iter()
        .find_map(|k| obj.get(*k).map(string_list))
        .unwrap_or_default();
    let violated_policies = ["violated_policies", "violations"]
        .iter()
        .find_map(|k| obj.get(*k).map(string_list))
        .unwrap_or_default();

    ParseOutcome::Ok(DecisionRecord {
        decision,
        reasoning_steps,
        violated_policies,
        citations: obj.get("citations").map(string_list).unwrap_or_default(),
        evidence_used: obj
            .get("evidence_used")
            .map(string_list)
            .unwrap_or_default(),
    })
}

/// Arrays keep element order; a single string is split into non-empty lines.
fn string_list(v: &Value) -> Vec<String> {
    match v {
        Value::Array(items) => items
            .iter()
            .map(|item| match item {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect(),
        Value::String(s) => s
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect(),
        Value::Null => Vec::new(),
        other => vec![other.to_string()],
    }
}
