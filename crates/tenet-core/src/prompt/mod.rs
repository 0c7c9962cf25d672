mod family;

pub use family::{ScenarioFamily, Template};

use crate::model::{LabelRegistry, RetrievalResult, ScenarioTestCase};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fmt::Write as _;

/// Request sent to the completion service for one test case.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Payload {
    pub scenario_id: String,
    pub case_id: String,
    pub family: ScenarioFamily,
    pub system: String,
    pub prompt: String,
    pub guideline_ids: Vec<String>,
    pub used_fallback: bool,
    /// sha256 over system and prompt text.
    pub fingerprint: String,
}

#[derive(Debug, Clone, Default)]
pub struct PromptAssembler;

impl PromptAssembler {
    pub fn new() -> Self {
        Self
    }

    /// Baseline rules always lead; retrieved guideline text is appended after them.
    pub fn assemble(
        &self,
        family: ScenarioFamily,
        case: &ScenarioTestCase,
        retrieved: &RetrievalResult,
        base_rules: &str,
        labels: &LabelRegistry,
    ) -> Payload {
        let template = family.template();

        let mut system = String::new();
        let _ = writeln!(system, "{}", template.role);
        let _ = writeln!(system, "{}", template.focus);
        let _ = writeln!(system);
        let _ = writeln!(system, "Baseline rules:");
        let _ = writeln!(system, "{}", base_rules.trim());

        if !retrieved.matched_guidelines.is_empty() {
            let _ = writeln!(system);
            let _ = writeln!(system, "Relevant decision rules (retrieved):");
            for g in &retrieved.matched_guidelines {
                let name = g.title.as_deref().unwrap_or(&g.id);
                let _ = writeln!(system, "- [{}] {}: {}", g.id, name, g.text.trim());
            }
        }

        let prompt = render_case(case, labels);
        let fingerprint = fingerprint(&system, &prompt);

        Payload {
            scenario_id: case.scenario_id.clone(),
            case_id: case.case_id.clone(),
            family,
            system,
            prompt,
            guideline_ids: retrieved.ids(),
            used_fallback: retrieved.used_fallback,
            fingerprint,
        }
    }
}

fn render_case(case: &ScenarioTestCase, labels: &LabelRegistry) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Scenario: {}", case.scenario_id);
    let _ = writeln!(out, "Test case: {}", case.case_id);
    if !case.description.trim().is_empty() {
        let _ = writeln!(out, "Request: {}", case.description.trim());
    }

    // sorted keys: the fingerprint depends on this rendering
    let facts = serde_json::to_string_pretty(&case.mission_facts).unwrap_or_default();
    let _ = writeln!(out);
    let _ = writeln!(out, "Mission facts:");
    let _ = writeln!(out, "{}", facts);

    if !case.provided_options.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "Options:");
        for opt in &case.provided_options {
            let _ = writeln!(out, "- {}: {}", opt.id, opt.description);
        }
    }

    let allowed = labels.iter().collect::<Vec<_>>().join(", ");
    let _ = writeln!(out);
    let _ = writeln!(out, "Respond with a single JSON object and nothing else:");
    let _ = writeln!(
        out,
        r#"{{"decision": "<one of: {}>", "reasoning_steps": ["..."], "violated_policies": ["<guideline id>"]}}"#,
        allowed
    );
    out
}

fn fingerprint(system: &str, prompt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(system.as_bytes());
    hasher.update([0u8]);
    hasher.update(prompt.as_bytes());
    hex::encode(hasher.finalize())
}
