//! Scenario and ground-truth documents.
//!
//! Both are loaded eagerly and cross-checked before any completion call:
//! every test case needs a ground-truth record, and every expected label must
//! be registered for the scenario.

pub mod jsonc;

use crate::config::{RoutingTable, ScenarioRoute};
use crate::errors::LoadError;
use crate::model::{DecisionLabel, DecisionOption, GroundTruthRecord, ScenarioTestCase};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

const CASE_ID_KEYS: &[&str] = &["id", "case_id", "test_case_id"];
const CASE_CONTAINERS: &[&str] = &["test_info", "tests", "metadata"];
const SCENARIO_HEADER_KEYS: &[&str] = &[
    "id",
    "scenario_id",
    "name",
    "description",
    "test_cases",
    "test_info",
    "tests",
    "metadata",
];
const GROUND_TRUTH_META_KEYS: &[&str] = &[
    "scenario_id",
    "scenario",
    "id",
    "version",
    "description",
    "generated_at",
    "notes",
    "metadata",
];

#[derive(Debug, Clone)]
pub struct Scenario {
    pub id: String,
    pub name: Option<String>,
    pub description: String,
    pub cases: Vec<ScenarioTestCase>,
    pub origin: String,
}

impl Scenario {
    pub fn load(path: &Path) -> Result<Self, LoadError> {
        let origin = path.display().to_string();
        let text = std::fs::read_to_string(path).map_err(|e| LoadError::io(&origin, e))?;
        Self::from_str(&text, &origin)
    }

    pub fn from_str(text: &str, origin: &str) -> Result<Self, LoadError> {
        let doc = jsonc::from_str(text).map_err(|e| LoadError::document(origin, e.to_string()))?;
        let obj = doc
            .as_object()
            .ok_or_else(|| LoadError::document(origin, "scenario must be an object"))?;

        let id = str_field(obj, &["id", "scenario_id"])
            .ok_or_else(|| LoadError::document(origin, "scenario has no 'id'"))?;
        let name = str_field(obj, &["name"]);
        let description = str_field(obj, &["description"])
            .or_else(|| name.clone())
            .unwrap_or_default();

        let scenario_facts: Map<String, Value> = match obj.get("mission_facts") {
            Some(Value::Object(facts)) => facts.clone(),
            Some(_) => {
                let reason = "'mission_facts' must be an object";
                return Err(LoadError::document(origin, reason));
            }
            None => obj
                .iter()
                .filter(|(k, _)| !SCENARIO_HEADER_KEYS.contains(&k.as_str()))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        };

        let mut seen = BTreeSet::new();
        let mut cases = Vec::new();
        for (index, raw) in test_cases(obj).iter().enumerate() {
            let tc = raw.as_object().ok_or_else(|| {
                LoadError::document(origin, format!("test case #{} is not an object", index + 1))
            })?;
            let case_id = str_field(tc, CASE_ID_KEYS).ok_or_else(|| {
                LoadError::document(origin, format!("test case #{} has no id", index + 1))
            })?;
            if !seen.insert(case_id.clone()) {
                return Err(LoadError::DuplicateCase {
                    origin: origin.to_string(),
                    case_id,
                });
            }
            cases.push(build_case(&id, case_id, tc, &scenario_facts, origin)?);
        }
        if cases.is_empty() {
            let reason = format!("scenario {} has no test cases", id);
            return Err(LoadError::document(origin, reason));
        }

        tracing::debug!(scenario_id = %id, cases = cases.len(), origin, "loaded scenario");
        Ok(Self {
            id,
            name,
            description,
            cases,
            origin: origin.to_string(),
        })
    }
}

/// `test_cases` at the top level, or nested under a known container.
fn test_cases(obj: &Map<String, Value>) -> &[Value] {
    if let Some(Value::Array(cases)) = obj.get("test_cases") {
        return cases;
    }
    for key in CASE_CONTAINERS {
        match obj.get(*key) {
            Some(Value::Object(inner)) => {
                if let Some(Value::Array(cases)) = inner.get("test_cases") {
                    return cases;
                }
            }
            Some(Value::Array(cases)) if *key == "tests" => return cases,
            _ => {}
        }
    }
    &[]
}

fn build_case(
    scenario_id: &str,
    case_id: String,
    tc: &Map<String, Value>,
    scenario_facts: &Map<String, Value>,
    origin: &str,
) -> Result<ScenarioTestCase, LoadError> {
    let description_key = ["description", "command"]
        .into_iter()
        .find(|k| tc.get(*k).and_then(Value::as_str).is_some());
    let description = description_key
        .and_then(|k| tc.get(k))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let mut facts: BTreeMap<String, Value> = scenario_facts
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    if let Some(Value::Object(own)) = tc.get("mission_facts") {
        facts.extend(own.iter().map(|(k, v)| (k.clone(), v.clone())));
    }
    for (k, v) in tc {
        let reserved = CASE_ID_KEYS.contains(&k.as_str())
            || Some(k.as_str()) == description_key
            || k.starts_with("expected")
            || matches!(
                k.as_str(),
                "mission_facts" | "options" | "provided_options" | "ground_truth"
            );
        if !reserved {
            facts.insert(k.clone(), v.clone());
        }
    }

    let provided_options = match tc.get("provided_options").or_else(|| tc.get("options")) {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items
            .iter()
            .enumerate()
            .map(|(i, item)| option_from(item, i))
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| {
                LoadError::document(
                    origin,
                    format!("test case '{}' has an invalid option", case_id),
                )
            })?,
        Some(_) => {
            return Err(LoadError::document(
                origin,
                format!("test case '{}': options must be a list", case_id),
            ))
        }
    };

    Ok(ScenarioTestCase {
        scenario_id: scenario_id.to_string(),
        case_id,
        description,
        mission_facts: facts,
        provided_options,
    })
}

/// Options are objects, or bare strings labelled A, B, C...
fn option_from(item: &Value, index: usize) -> Option<DecisionOption> {
    match item {
        Value::String(s) => Some(DecisionOption {
            id: option_letter(index),
            description: s.clone(),
        }),
        Value::Object(_) => serde_json::from_value(item.clone()).ok(),
        _ => None,
    }
}

fn option_letter(index: usize) -> String {
    match u8::try_from(index).ok().filter(|i| *i < 26) {
        Some(i) => char::from(b'A' + i).to_string(),
        None => (index + 1).to_string(),
    }
}

fn str_field(obj: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|k| obj.get(*k))
        .find_map(|v| match v {
            Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
}

/// Expected decisions for one scenario, keyed by case id.
#[derive(Debug, Clone)]
pub struct GroundTruth {
    pub scenario_id: String,
    pub records: BTreeMap<String, GroundTruthRecord>,
    pub origin: String,
}

impl GroundTruth {
    pub fn load(path: &Path, scenario_id: &str) -> Result<Self, LoadError> {
        let origin = path.display().to_string();
        let text = std::fs::read_to_string(path).map_err(|e| LoadError::io(&origin, e))?;
        Self::from_str(&text, &origin, scenario_id)
    }

    /// Accepts the list form (`test_cases: [...]`) and the map form
    /// (`cases: {id: ...}` or case ids at the top level).
    pub fn from_str(text: &str, origin: &str, scenario_id: &str) -> Result<Self, LoadError> {
        let doc = jsonc::from_str(text).map_err(|e| LoadError::document(origin, e.to_string()))?;
        let obj = doc
            .as_object()
            .ok_or_else(|| LoadError::document(origin, "ground truth must be an object"))?;

        if let Some(declared) = str_field(obj, &["scenario_id", "scenario", "id"]) {
            if declared != scenario_id {
                return Err(LoadError::document(
                    origin,
                    format!(
                        "ground truth is for {} but scenario is {}",
                        declared, scenario_id
                    ),
                ));
            }
        }

        let entries: Vec<(String, &Value)> = match (obj.get("test_cases"), obj.get("cases")) {
            (Some(Value::Array(list)), _) => list
                .iter()
                .enumerate()
                .map(|(i, v)| {
                    v.as_object()
                        .and_then(|tc| str_field(tc, CASE_ID_KEYS))
                        .map(|id| (id, v))
                        .ok_or_else(|| {
                            LoadError::document(origin, format!("test_cases[{}] has no id", i))
                        })
                })
                .collect::<Result<_, _>>()?,
            (_, Some(Value::Object(map))) => map.iter().map(|(k, v)| (k.clone(), v)).collect(),
            _ => obj
                .iter()
                .filter(|(k, _)| !GROUND_TRUTH_META_KEYS.contains(&k.as_str()))
                .map(|(k, v)| (k.clone(), v))
                .collect(),
        };

        let mut records = BTreeMap::new();
        for (case_id, value) in entries {
            let record = record_from(scenario_id, &case_id, value).ok_or_else(|| {
                LoadError::document(
                    origin,
                    format!("case '{}' has no expected decision", case_id),
                )
            })?;
            if records.insert(case_id.clone(), record).is_some() {
                return Err(LoadError::DuplicateCase {
                    origin: origin.to_string(),
                    case_id,
                });
            }
        }

        Ok(Self {
            scenario_id: scenario_id.to_string(),
            records,
            origin: origin.to_string(),
        })
    }
}

fn record_from(scenario_id: &str, case_id: &str, value: &Value) -> Option<GroundTruthRecord> {
    let (decision, reason, evidence) = match value {
        Value::String(s) => (Some(s.trim().to_string()), None, Vec::new()),
        Value::Object(obj) => {
            let behavior = obj.get("expected_behavior").and_then(Value::as_object);
            let decision = str_field(obj, &["expected_decision", "decision"])
                .or_else(|| behavior.and_then(|b| str_field(b, &["decision"])))
                .or_else(|| {
                    behavior
                        .and_then(|b| b.get("should_reject"))
                        .or_else(|| obj.get("should_reject"))
                        .and_then(Value::as_bool)
                        .map(|reject| if reject { "REJECT" } else { "APPROVE" })
                        .map(str::to_string)
                });
            let reason = str_field(obj, &["expected_reason", "reason"])
                .or_else(|| behavior.and_then(|b| str_field(b, &["reason"])));
            let evidence = obj
                .get("evidence")
                .or_else(|| behavior.and_then(|b| b.get("evidence")))
                .map(strings)
                .unwrap_or_default();
            (decision, reason, evidence)
        }
        _ => (None, None, Vec::new()),
    };
    let decision = decision.filter(|d| !d.is_empty())?;
    Some(GroundTruthRecord {
        scenario_id: scenario_id.to_string(),
        case_id: case_id.to_string(),
        expected_decision: DecisionLabel::new(decision),
        expected_reason: reason,
        evidence,
    })
}

fn strings(v: &Value) -> Vec<String> {
    match v {
        Value::String(s) => vec![s.clone()],
        Value::Array(items) => items
            .iter()
            .filter_map(|i| i.as_str().map(str::to_string))
            .collect(),
        _ => Vec::new(),
    }
}

/// A scenario ready to run: route resolved, every case paired with its truth.
#[derive(Debug, Clone)]
pub struct Suite {
    pub scenario: Scenario,
    pub route: ScenarioRoute,
    pub cases: Vec<(ScenarioTestCase, GroundTruthRecord)>,
}

impl Suite {
    /// Pair cases with ground truth. Fails on the first case without a
    /// record or with an expected label outside the scenario's registry.
    pub fn assemble(
        scenario: Scenario,
        mut truth: GroundTruth,
        routing: &RoutingTable,
    ) -> Result<Self, LoadError> {
        let route = routing.route(&scenario.id);
        let mut cases = Vec::with_capacity(scenario.cases.len());
        for case in &scenario.cases {
            let record = truth.records.remove(&case.case_id).ok_or_else(|| {
                LoadError::MissingGroundTruth {
                    origin: truth.origin.clone(),
                    scenario_id: scenario.id.clone(),
                    case_id: case.case_id.clone(),
                }
            })?;
            if !route.labels.contains(record.expected_decision.as_str()) {
                return Err(LoadError::UnregisteredLabel {
                    origin: truth.origin.clone(),
                    scenario_id: scenario.id.clone(),
                    case_id: case.case_id.clone(),
                    label: record.expected_decision.to_string(),
                });
            }
            cases.push((case.clone(), record));
        }
        if !truth.records.is_empty() {
            tracing::warn!(
                scenario_id = %scenario.id,
                extra = ?truth.records.keys().collect::<Vec<_>>(),
                "ground truth has records for unknown test cases"
            );
        }
        Ok(Self {
            scenario,
            route,
            cases,
        })
    }

    pub fn load(
        scenario_path: &Path,
        ground_truth_path: &Path,
        routing: &RoutingTable,
    ) -> Result<Self, LoadError> {
        let scenario = Scenario::load(scenario_path)?;
        let truth = GroundTruth::load(ground_truth_path, &scenario.id)?;
        Self::assemble(scenario, truth, routing)
    }

    pub fn scenario_id(&self) -> &str {
        &self.scenario.id
    }
}

/// `<ID>.jsonc`, `<ID>.json`, then the first `<ID>_*.jsonc` in name order.
pub fn locate_scenario(dir: &Path, scenario_id: &str) -> Option<PathBuf> {
    locate(dir, scenario_id, &["jsonc", "json"], &["jsonc"])
}

/// `path` itself when it is a file; otherwise `<ID>.json`,
/// `<ID>_ground_truth.json` or the first `<ID>_*.json` inside it.
pub fn locate_ground_truth(path: &Path, scenario_id: &str) -> Option<PathBuf> {
    if path.is_file() {
        return Some(path.to_path_buf());
    }
    let direct = path.join(format!("{}_ground_truth.json", scenario_id));
    if direct.is_file() {
        return Some(direct);
    }
    locate(path, scenario_id, &["json", "jsonc"], &["json", "jsonc"])
}

fn locate(
    dir: &Path,
    id: &str,
    exact_exts: &[&str],
    prefixed_exts: &[&str],
) -> Option<PathBuf> {
    for ext in exact_exts {
        let candidate = dir.join(format!("{}.{}", id, ext));
        if candidate.is_file() {
            return Some(candidate);
        }
    }
    let prefix = format!("{}_", id);
    let mut matches: Vec<PathBuf> = std::fs::read_dir(dir)
        .ok()?
        .filter_map(Result::ok)
        .map(|e| e.path())
        .filter(|p| {
            p.is_file()
                && p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with(&prefix))
                && p.extension()
                    .and_then(|e| e.to_str())
                    .is_some_and(|e| prefixed_exts.contains(&e))
        })
        .collect();
    matches.sort();
    matches.into_iter().next()
}
