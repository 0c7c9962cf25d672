use serde::{Deserialize, Serialize};

use super::LoadError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Diagnostic {
    pub code: String,
    pub severity: String,
    pub source: String,
    pub message: String,
    pub context: serde_json::Value,
    pub fix_steps: Vec<String>,
}

impl Diagnostic {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            severity: "error".into(),
            source: "unknown".into(),
            message: message.into(),
            context: serde_json::json!({}),
            fix_steps: vec![],
        }
    }

    pub fn with_severity(mut self, severity: impl Into<String>) -> Self {
        self.severity = severity.into();
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    pub fn with_context(mut self, context: serde_json::Value) -> Self {
        self.context = context;
        self
    }

    pub fn with_fix_step(mut self, step: impl Into<String>) -> Self {
        self.fix_steps.push(step.into());
        self
    }

    pub fn format_terminal(&self) -> String {
        let icon = if self.severity == "warn" {
            "⚠️ "
        } else {
            "❌"
        };
        let mut s = format!("{} [{}] {}\n", icon, self.code, self.message);
        s.push_str(&format!("  source: {}\n", self.source));

        if self.context.as_object().is_some_and(|o| !o.is_empty()) {
            if let Ok(json) = serde_json::to_string_pretty(&self.context) {
                for line in json.lines() {
                    s.push_str(&format!("  {}\n", line));
                }
            }
        }

        if !self.fix_steps.is_empty() {
            s.push_str("\nFix:\n");
            for (i, step) in self.fix_steps.iter().enumerate() {
                s.push_str(&format!("  {}. {}\n", i + 1, step));
            }
        }
        s
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.format_terminal())
    }
}

impl std::error::Error for Diagnostic {}

impl From<&LoadError> for Diagnostic {
    fn from(err: &LoadError) -> Self {
        let code = match err {
            LoadError::Io { .. } => codes::E_PATH_NOT_FOUND,
            LoadError::InvalidRecord { .. }
            | LoadError::DuplicateId { .. }
            | LoadError::MalformedAssertion { .. } => codes::E_LOAD_GUIDELINES,
            LoadError::InvalidDocument { .. } | LoadError::DuplicateCase { .. } => {
                codes::E_LOAD_SCENARIO
            }
            LoadError::MissingGroundTruth { .. } => codes::E_MISSING_GROUND_TRUTH,
            LoadError::UnregisteredLabel { .. } => codes::E_LOAD_GROUND_TRUTH,
            LoadError::UnknownGuideline { .. } | LoadError::Routing { .. } => codes::E_CFG_PARSE,
        };
        let mut diag = Diagnostic::new(code, err.to_string()).with_source(err.origin());
        diag = match err {
            LoadError::Io { .. } => {
                diag.with_fix_step("Check that the path exists and is readable")
            }
            LoadError::DuplicateId { id, .. } => {
                let step = format!("Rename or remove one of the records with id '{}'", id);
                diag.with_fix_step(step)
            }
            LoadError::MissingGroundTruth { case_id, .. } => diag.with_fix_step(format!(
                "Add a ground truth entry for '{}' or remove the test case",
                case_id
            )),
            LoadError::UnregisteredLabel { label, .. } => diag.with_fix_step(format!(
                "Register '{}' in the scenario's labels in the routing config",
                label
            )),
            LoadError::UnknownGuideline { id, .. } => diag.with_fix_step(format!(
                "Add guideline '{}' to the guideline file or drop it from the routing config",
                id
            )),
            _ => diag,
        };
        diag
    }
}

impl From<LoadError> for Diagnostic {
    fn from(err: LoadError) -> Self {
        Self::from(&err)
    }
}

// Common error codes
pub mod codes {
    // Errors (Exit 2)
    pub const E_CFG_PARSE: &str = "E_CFG_PARSE";
    pub const E_PATH_NOT_FOUND: &str = "E_PATH_NOT_FOUND";
    pub const E_INVALID_ARGS: &str = "E_INVALID_ARGS";
    pub const E_LOAD_GUIDELINES: &str = "E_LOAD_GUIDELINES";
    pub const E_LOAD_SCENARIO: &str = "E_LOAD_SCENARIO";
    pub const E_LOAD_GROUND_TRUTH: &str = "E_LOAD_GROUND_TRUTH";
    pub const E_MISSING_GROUND_TRUTH: &str = "E_MISSING_GROUND_TRUTH";
    pub const E_MISSING_API_KEY: &str = "E_MISSING_API_KEY";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_error_maps_to_code_and_fix_step() {
        let err = LoadError::MissingGroundTruth {
            origin: "gt/S021.json".into(),
            scenario_id: "S021".into(),
            case_id: "TC3".into(),
        };
        let diag = Diagnostic::from(&err);
        assert_eq!(diag.code, codes::E_MISSING_GROUND_TRUTH);
        assert_eq!(diag.source, "gt/S021.json");
        let text = diag.format_terminal();
        assert!(text.contains("[E_MISSING_GROUND_TRUTH]"));
        assert!(text.contains("TC3"));
        assert!(text.contains("Fix:"));
    }

    #[test]
    fn empty_context_is_not_printed() {
        let diag = Diagnostic::new(codes::E_INVALID_ARGS, "bad range");
        let text = diag.format_terminal();
        assert_eq!(text.lines().count(), 2);
    }
}
