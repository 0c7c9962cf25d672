//! Post-hoc evaluation of structured assertions against mission facts.
//!
//! Checks annotate a result row. They never change the observed decision.

use crate::model::{Assertion, Guideline, Operator, Severity, Threshold};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

const EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    Holds,
    Violated,
    NotApplicable,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssertionCheck {
    pub guideline_id: String,
    pub parameter: String,
    pub operator: Operator,
    pub threshold: Threshold,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed: Option<Value>,
    pub severity: Severity,
    pub status: CheckStatus,
}

/// Evaluate every assertion carried by `guidelines`, in order.
pub fn check_guidelines(
    guidelines: &[Arc<Guideline>],
    facts: &BTreeMap<String, Value>,
) -> Vec<AssertionCheck> {
    guidelines
        .iter()
        .flat_map(|g| {
            g.structured_assertions.iter().map(move |a| {
                let (status, observed) = evaluate(a, facts);
                AssertionCheck {
                    guideline_id: g.id.clone(),
                    parameter: a.parameter.clone(),
                    operator: a.operator,
                    threshold: a.threshold,
                    unit: a.unit.clone(),
                    observed,
                    severity: a.severity,
                    status,
                }
            })
        })
        .collect()
}

/// Returns the status plus the observed value after unit conversion.
pub fn evaluate(
    assertion: &Assertion,
    facts: &BTreeMap<String, Value>,
) -> (CheckStatus, Option<Value>) {
    let Some(raw) = lookup(facts, &assertion.parameter) else {
        return (CheckStatus::NotApplicable, None);
    };

    match assertion.threshold {
        Threshold::Bool(expected) => match raw.as_bool() {
            Some(actual) => (verdict(actual == expected), Some(Value::Bool(actual))),
            None => (CheckStatus::NotApplicable, Some(raw.clone())),
        },
        Threshold::Number(threshold) => {
            let Some(actual) = numeric(raw, assertion.unit.as_deref()) else {
                return (CheckStatus::NotApplicable, Some(raw.clone()));
            };
            let holds = match assertion.operator {
                Operator::Lt => actual < threshold,
                Operator::Le => actual <= threshold + EPSILON,
                Operator::Gt => actual > threshold,
                Operator::Ge => actual + EPSILON >= threshold,
                Operator::Eq => (actual - threshold).abs() < EPSILON,
            };
            let observed = serde_json::Number::from_f64(actual).map(Value::Number);
            (verdict(holds), observed)
        }
    }
}

fn verdict(holds: bool) -> CheckStatus {
    if holds {
        CheckStatus::Holds
    } else {
        CheckStatus::Violated
    }
}

/// Flat dotted keys win over nested traversal.
fn lookup<'a>(facts: &'a BTreeMap<String, Value>, path: &str) -> Option<&'a Value> {
    if let Some(v) = facts.get(path) {
        return Some(v);
    }
    let mut parts = path.split('.');
    let mut current = facts.get(parts.next()?)?;
    for part in parts {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

/// Numbers are taken as already in the assertion's unit; `{value, unit}`
/// objects are converted when both units share a dimension.
fn numeric(raw: &Value, target_unit: Option<&str>) -> Option<f64> {
    match raw {
        Value::Number(n) => n.as_f64(),
        Value::Object(obj) => {
            let value = obj.get("value")?.as_f64()?;
            match (obj.get("unit").and_then(Value::as_str), target_unit) {
                (Some(from), Some(to)) => convert(value, from, to),
                _ => Some(value),
            }
        }
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dimension {
    Speed,
    Length,
    Time,
    Ratio,
}

fn unit_factor(unit: &str) -> Option<(Dimension, f64)> {
    let u = unit.trim().to_lowercase();
    let entry = match u.as_str() {
        "m/s" | "mps" => (Dimension::Speed, 1.0),
        "km/h" | "kmh" | "kph" => (Dimension::Speed, 1000.0 / 3600.0),
        "mph" => (Dimension::Speed, 0.44704),
        "knots" | "knot" | "kt" | "kn" => (Dimension::Speed, 0.514444),
        "m" | "meters" | "metres" => (Dimension::Length, 1.0),
        "km" => (Dimension::Length, 1000.0),
        "ft" | "feet" => (Dimension::Length, 0.3048),
        "s" | "sec" | "seconds" => (Dimension::Time, 1.0),
        "min" | "minutes" => (Dimension::Time, 60.0),
        "h" | "hr" | "hours" => (Dimension::Time, 3600.0),
        "%" | "percent" => (Dimension::Ratio, 1.0),
        _ => return None,
    };
    Some(entry)
}

fn convert(value: f64, from: &str, to: &str) -> Option<f64> {
    if from.trim().eq_ignore_ascii_case(to.trim()) {
        return Some(value);
    }
    let (from_dim, from_factor) = unit_factor(from)?;
    let (to_dim, to_factor) = unit_factor(to)?;
    (from_dim == to_dim).then(|| value * from_factor / to_factor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn facts(v: Value) -> BTreeMap<String, Value> {
        serde_json::from_value(v).unwrap()
    }

    fn assertion(
        parameter: &str,
        operator: Operator,
        threshold: Threshold,
        unit: Option<&str>,
    ) -> Assertion {
        Assertion {
            parameter: parameter.into(),
            operator,
            threshold,
            unit: unit.map(Into::into),
            severity: Severity::Critical,
        }
    }

    #[test]
    fn nested_and_flat_paths_resolve() {
        let f = facts(json!({
            "battery": {"reserve_pct": 18},
            "wind.gust_ms": 12.5
        }));
        let a = assertion(
            "battery.reserve_pct",
            Operator::Ge,
            Threshold::Number(20.0),
            Some("%"),
        );
        assert_eq!(evaluate(&a, &f).0, CheckStatus::Violated);

        let a = assertion("wind.gust_ms", Operator::Le, Threshold::Number(15.0), None);
        assert_eq!(evaluate(&a, &f).0, CheckStatus::Holds);
    }

    #[test]
    fn converts_speed_units_before_comparing() {
        let f = facts(json!({"speed": {"value": 72, "unit": "km/h"}}));
        let a = assertion("speed", Operator::Le, Threshold::Number(20.0), Some("m/s"));
        let (status, observed) = evaluate(&a, &f);
        assert_eq!(status, CheckStatus::Holds);
        let observed = observed.unwrap().as_f64().unwrap();
        assert!((observed - 20.0).abs() < 1e-6);

        let f = facts(json!({"speed": {"value": 50, "unit": "knots"}}));
        assert_eq!(evaluate(&a, &f).0, CheckStatus::Violated);

        // 40 mph is 17.88 m/s, 50 mph is 22.35 m/s
        let f = facts(json!({"speed": {"value": 40, "unit": "mph"}}));
        assert_eq!(evaluate(&a, &f).0, CheckStatus::Holds);
        let f = facts(json!({"speed": {"value": 50, "unit": "mph"}}));
        assert_eq!(evaluate(&a, &f).0, CheckStatus::Violated);
    }

    #[test]
    fn incompatible_or_missing_values_are_not_applicable() {
        let a = assertion("speed", Operator::Le, Threshold::Number(20.0), Some("m/s"));
        let f = facts(json!({"speed": {"value": 3, "unit": "km"}}));
        assert_eq!(evaluate(&a, &f).0, CheckStatus::NotApplicable);

        let f = facts(json!({"altitude": 100}));
        assert_eq!(evaluate(&a, &f), (CheckStatus::NotApplicable, None));

        let f = facts(json!({"speed": "fast"}));
        assert_eq!(evaluate(&a, &f).0, CheckStatus::NotApplicable);
    }

    #[test]
    fn boolean_equality() {
        let a = assertion("vlos_maintained", Operator::Eq, Threshold::Bool(true), None);
        let check = |v: Value| evaluate(&a, &facts(json!({ "vlos_maintained": v }))).0;
        assert_eq!(check(json!(true)), CheckStatus::Holds);
        assert_eq!(check(json!(false)), CheckStatus::Violated);
        assert_eq!(check(json!(1)), CheckStatus::NotApplicable);
    }

    #[test]
    fn check_guidelines_tags_each_assertion_with_its_guideline() {
        let g = Arc::new(Guideline {
            id: "R1".into(),
            title: None,
            text: "reserve".into(),
            keywords: Default::default(),
            scope: crate::model::Scope::Regulatory,
            structured_assertions: vec![
                assertion("battery_pct", Operator::Ge, Threshold::Number(20.0), None),
                assertion("altitude_m", Operator::Le, Threshold::Number(120.0), None),
            ],
        });
        let checks = check_guidelines(&[g], &facts(json!({"battery_pct": 35})));
        assert_eq!(checks.len(), 2);
        assert!(checks.iter().all(|c| c.guideline_id == "R1"));
        assert_eq!(checks[0].status, CheckStatus::Holds);
        assert_eq!(checks[1].status, CheckStatus::NotApplicable);
    }
}
